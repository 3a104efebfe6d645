//! Tokenizer for the expression language.
//!
//! Positions are character offsets into the source, so carets line up
//! under non-ASCII input too.

use std::fmt;

use crate::error::{PrismError, Result, SyntaxError};

#[derive(Debug, Clone, PartialEq)]
pub enum TokenKind {
    Number(f64),
    String(String),
    /// Bare or backtick-quoted identifier.
    Ident(String),
    True,
    False,
    Null,

    Plus,
    Minus,
    Star,
    Slash,
    Percent,
    Caret,

    EqEq,
    NotEq,
    Lt,
    Lte,
    Gt,
    Gte,
    AndAnd,
    OrOr,
    Bang,

    LParen,
    RParen,
    LBracket,
    RBracket,
    Comma,

    Eof,
}

impl fmt::Display for TokenKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TokenKind::Number(n) => write!(f, "{}", n),
            TokenKind::String(s) => write!(f, "'{}'", s),
            TokenKind::Ident(name) => write!(f, "{}", name),
            TokenKind::True => f.write_str("true"),
            TokenKind::False => f.write_str("false"),
            TokenKind::Null => f.write_str("null"),
            TokenKind::Plus => f.write_str("+"),
            TokenKind::Minus => f.write_str("-"),
            TokenKind::Star => f.write_str("*"),
            TokenKind::Slash => f.write_str("/"),
            TokenKind::Percent => f.write_str("%"),
            TokenKind::Caret => f.write_str("^"),
            TokenKind::EqEq => f.write_str("=="),
            TokenKind::NotEq => f.write_str("!="),
            TokenKind::Lt => f.write_str("<"),
            TokenKind::Lte => f.write_str("<="),
            TokenKind::Gt => f.write_str(">"),
            TokenKind::Gte => f.write_str(">="),
            TokenKind::AndAnd => f.write_str("&&"),
            TokenKind::OrOr => f.write_str("||"),
            TokenKind::Bang => f.write_str("!"),
            TokenKind::LParen => f.write_str("("),
            TokenKind::RParen => f.write_str(")"),
            TokenKind::LBracket => f.write_str("["),
            TokenKind::RBracket => f.write_str("]"),
            TokenKind::Comma => f.write_str(","),
            TokenKind::Eof => f.write_str("end of expression"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    pub kind: TokenKind,
    /// Character offset of the token's first character.
    pub position: usize,
}

/// Split `input` into tokens, ending with [`TokenKind::Eof`].
pub fn tokenize(input: &str) -> Result<Vec<Token>> {
    Lexer::new(input).run()
}

struct Lexer<'a> {
    input: &'a str,
    chars: Vec<char>,
    pos: usize,
}

impl<'a> Lexer<'a> {
    fn new(input: &'a str) -> Self {
        Self {
            input,
            chars: input.chars().collect(),
            pos: 0,
        }
    }

    fn error(&self, message: impl Into<String>, position: usize) -> PrismError {
        SyntaxError::new(message, position, self.input).into()
    }

    fn peek(&self) -> Option<char> {
        self.chars.get(self.pos).copied()
    }

    fn peek_next(&self) -> Option<char> {
        self.chars.get(self.pos + 1).copied()
    }

    fn run(mut self) -> Result<Vec<Token>> {
        let mut tokens = Vec::new();
        while let Some(c) = self.peek() {
            if c.is_whitespace() {
                self.pos += 1;
                continue;
            }
            let start = self.pos;
            let kind = if c.is_ascii_digit()
                || (c == '.' && self.peek_next().is_some_and(|n| n.is_ascii_digit()))
            {
                self.number()?
            } else if c == '\'' || c == '"' {
                self.string(c)?
            } else if c == '`' {
                self.quoted_ident()?
            } else if c.is_alphabetic() || c == '_' {
                self.word()
            } else {
                self.operator(c)?
            };
            tokens.push(Token {
                kind,
                position: start,
            });
        }
        tokens.push(Token {
            kind: TokenKind::Eof,
            position: self.chars.len(),
        });
        Ok(tokens)
    }

    fn number(&mut self) -> Result<TokenKind> {
        let start = self.pos;
        while self.peek().is_some_and(|c| c.is_ascii_digit()) {
            self.pos += 1;
        }
        if self.peek() == Some('.') {
            self.pos += 1;
            while self.peek().is_some_and(|c| c.is_ascii_digit()) {
                self.pos += 1;
            }
        }
        if matches!(self.peek(), Some('e' | 'E')) {
            let exponent_digit = match self.peek_next() {
                Some('+' | '-') => self.chars.get(self.pos + 2).copied(),
                other => other,
            };
            if exponent_digit.is_some_and(|c| c.is_ascii_digit()) {
                self.pos += 1;
                if matches!(self.peek(), Some('+' | '-')) {
                    self.pos += 1;
                }
                while self.peek().is_some_and(|c| c.is_ascii_digit()) {
                    self.pos += 1;
                }
            }
        }
        let text: String = self.chars[start..self.pos].iter().collect();
        text.parse::<f64>()
            .map(TokenKind::Number)
            .map_err(|_| self.error(format!("Invalid number '{}'", text), start))
    }

    fn string(&mut self, quote: char) -> Result<TokenKind> {
        let start = self.pos;
        self.pos += 1;
        let mut value = String::new();
        loop {
            match self.peek() {
                None => return Err(self.error("Unterminated string literal", start)),
                Some(c) if c == quote => {
                    self.pos += 1;
                    return Ok(TokenKind::String(value));
                }
                Some('\\') => {
                    let escaped = self
                        .peek_next()
                        .ok_or_else(|| self.error("Unterminated string literal", start))?;
                    value.push(match escaped {
                        'n' => '\n',
                        't' => '\t',
                        'r' => '\r',
                        other => other,
                    });
                    self.pos += 2;
                }
                Some(c) => {
                    value.push(c);
                    self.pos += 1;
                }
            }
        }
    }

    fn quoted_ident(&mut self) -> Result<TokenKind> {
        let start = self.pos;
        self.pos += 1;
        let mut name = String::new();
        loop {
            match self.peek() {
                None => return Err(self.error("Unterminated backtick identifier", start)),
                Some('`') => {
                    self.pos += 1;
                    if name.is_empty() {
                        return Err(self.error("Empty backtick identifier", start));
                    }
                    return Ok(TokenKind::Ident(name));
                }
                Some(c) => {
                    name.push(c);
                    self.pos += 1;
                }
            }
        }
    }

    fn word(&mut self) -> TokenKind {
        let start = self.pos;
        while self
            .peek()
            .is_some_and(|c| c.is_alphanumeric() || c == '_')
        {
            self.pos += 1;
        }
        let word: String = self.chars[start..self.pos].iter().collect();
        match word.to_ascii_lowercase().as_str() {
            "true" => TokenKind::True,
            "false" => TokenKind::False,
            "null" => TokenKind::Null,
            _ => TokenKind::Ident(word),
        }
    }

    fn operator(&mut self, c: char) -> Result<TokenKind> {
        let start = self.pos;
        let next = self.peek_next();
        let (kind, width) = match (c, next) {
            ('=', Some('=')) => (TokenKind::EqEq, 2),
            ('!', Some('=')) => (TokenKind::NotEq, 2),
            ('<', Some('=')) => (TokenKind::Lte, 2),
            ('>', Some('=')) => (TokenKind::Gte, 2),
            ('&', Some('&')) => (TokenKind::AndAnd, 2),
            ('|', Some('|')) => (TokenKind::OrOr, 2),
            ('=', _) => return Err(self.error("Unexpected character '='. Did you mean '=='?", start)),
            ('&', _) => return Err(self.error("Unexpected character '&'. Did you mean '&&'?", start)),
            ('|', _) => return Err(self.error("Unexpected character '|'. Did you mean '||'?", start)),
            ('<', _) => (TokenKind::Lt, 1),
            ('>', _) => (TokenKind::Gt, 1),
            ('!', _) => (TokenKind::Bang, 1),
            ('+', _) => (TokenKind::Plus, 1),
            ('-', _) => (TokenKind::Minus, 1),
            ('*', _) => (TokenKind::Star, 1),
            ('/', _) => (TokenKind::Slash, 1),
            ('%', _) => (TokenKind::Percent, 1),
            ('^', _) => (TokenKind::Caret, 1),
            ('(', _) => (TokenKind::LParen, 1),
            (')', _) => (TokenKind::RParen, 1),
            ('[', _) => (TokenKind::LBracket, 1),
            (']', _) => (TokenKind::RBracket, 1),
            (',', _) => (TokenKind::Comma, 1),
            (other, _) => {
                return Err(self.error(format!("Unexpected character '{}'", other), start))
            }
        };
        self.pos += width;
        Ok(kind)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(input: &str) -> Vec<TokenKind> {
        tokenize(input).unwrap().into_iter().map(|t| t.kind).collect()
    }

    #[test]
    fn test_arithmetic_tokens() {
        assert_eq!(
            kinds("score * 2.5 + 1e3"),
            vec![
                TokenKind::Ident("score".into()),
                TokenKind::Star,
                TokenKind::Number(2.5),
                TokenKind::Plus,
                TokenKind::Number(1000.0),
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn test_strings_and_backticks() {
        assert_eq!(
            kinds(r#"`first name` == 'O\'Brien' || "a\tb""#),
            vec![
                TokenKind::Ident("first name".into()),
                TokenKind::EqEq,
                TokenKind::String("O'Brien".into()),
                TokenKind::OrOr,
                TokenKind::String("a\tb".into()),
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn test_keywords_case_insensitive() {
        assert_eq!(
            kinds("TRUE false Null"),
            vec![TokenKind::True, TokenKind::False, TokenKind::Null, TokenKind::Eof]
        );
    }

    #[test]
    fn test_positions_are_characters() {
        let tokens = tokenize("'é' + x").unwrap();
        assert_eq!(tokens[1].position, 4);
        assert_eq!(tokens[2].position, 6);
        assert_eq!(tokens[3].position, 7);
    }

    #[test]
    fn test_single_equals_suggests_double() {
        let err = tokenize("a = 1").unwrap_err();
        let text = err.to_string();
        assert!(text.contains("Did you mean '=='?"));
        assert!(text.ends_with("    ^"), "{}", text);
    }

    #[test]
    fn test_unexpected_character_position() {
        match tokenize("score @ 2").unwrap_err() {
            PrismError::Syntax(err) => assert_eq!(err.position, 6),
            other => panic!("unexpected error {:?}", other),
        }
    }

    #[test]
    fn test_unterminated_string() {
        let err = tokenize("'abc").unwrap_err();
        assert!(err.to_string().starts_with("Unterminated string literal at position 0"));
    }
}
