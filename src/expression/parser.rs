/*!
# Expression Parsing

Recursive-descent parser producing an [`AstNode`] tree.

## Precedence Pyramid

```text
Level 1 (Lowest):  Logic          && ||             (parse_logic)
Level 2:           Comparison     > >= < <= == !=   (parse_comparison)
Level 3:           Additive       + -               (parse_additive)
Level 4:           Multiplicative * / %             (parse_multiplicative)
Level 5:           Power          ^ (right assoc)   (parse_power)
Level 6:           Unary          - !               (parse_unary)
Level 7:           Call           name(args)        (parse_call)
Level 8 (Highest): Atom                             (parse_atom)
```

`&&` and `||` share one level and associate left to right, so
`a || b && c` groups as `(a || b) && c`. Parenthesize to mix them.

Atoms are numbers, string literals, `true`/`false`/`null`, bare or
backtick-quoted column names, parenthesized expressions and bracketed
array literals (`[1, 2, 3]`, used by `in` and `cut`).

Every error carries the character position of the offending token and
renders a caret under it.
*/

use super::ast::{AstNode, BinaryOp, UnaryOp};
use super::lexer::{tokenize, Token, TokenKind};
use crate::error::{PrismError, Result, SyntaxError};

/// Parse an expression into its syntax tree.
pub fn parse(input: &str) -> Result<AstNode> {
    let tokens = tokenize(input)?;
    let mut parser = Parser {
        tokens,
        current: 0,
        input,
    };
    if parser.current_token().kind == TokenKind::Eof {
        return Err(parser.error("Empty expression"));
    }
    let ast = parser.parse_logic()?;
    let trailing = parser.current_token();
    if trailing.kind != TokenKind::Eof {
        return Err(parser.error(format!("Unexpected '{}' after expression", trailing.kind)));
    }
    Ok(ast)
}

struct Parser<'a> {
    tokens: Vec<Token>,
    current: usize,
    input: &'a str,
}

impl<'a> Parser<'a> {
    fn current_token(&self) -> &Token {
        // The lexer always terminates the stream with Eof and advance never
        // moves past it.
        &self.tokens[self.current.min(self.tokens.len() - 1)]
    }

    fn advance(&mut self) {
        if self.current < self.tokens.len() - 1 {
            self.current += 1;
        }
    }

    /// Error positioned at the current token.
    fn error(&self, message: impl Into<String>) -> PrismError {
        SyntaxError::new(message, self.current_token().position, self.input).into()
    }

    fn expect(&mut self, expected: TokenKind) -> Result<()> {
        let found = &self.current_token().kind;
        if *found == expected {
            self.advance();
            Ok(())
        } else {
            Err(self.error(format!("Expected '{}' but found '{}'", expected, found)))
        }
    }

    fn parse_logic(&mut self) -> Result<AstNode> {
        let mut left = self.parse_comparison()?;
        loop {
            let op = match self.current_token().kind {
                TokenKind::AndAnd => BinaryOp::And,
                TokenKind::OrOr => BinaryOp::Or,
                _ => break,
            };
            self.advance();
            let right = self.parse_comparison()?;
            left = AstNode::binary(op, left, right);
        }
        Ok(left)
    }

    fn parse_comparison(&mut self) -> Result<AstNode> {
        let mut left = self.parse_additive()?;
        loop {
            let op = match self.current_token().kind {
                TokenKind::EqEq => BinaryOp::Eq,
                TokenKind::NotEq => BinaryOp::Ne,
                TokenKind::Lt => BinaryOp::Lt,
                TokenKind::Lte => BinaryOp::Lte,
                TokenKind::Gt => BinaryOp::Gt,
                TokenKind::Gte => BinaryOp::Gte,
                _ => break,
            };
            self.advance();
            let right = self.parse_additive()?;
            left = AstNode::binary(op, left, right);
        }
        Ok(left)
    }

    fn parse_additive(&mut self) -> Result<AstNode> {
        let mut left = self.parse_multiplicative()?;
        loop {
            let op = match self.current_token().kind {
                TokenKind::Plus => BinaryOp::Add,
                TokenKind::Minus => BinaryOp::Sub,
                _ => break,
            };
            self.advance();
            let right = self.parse_multiplicative()?;
            left = AstNode::binary(op, left, right);
        }
        Ok(left)
    }

    fn parse_multiplicative(&mut self) -> Result<AstNode> {
        let mut left = self.parse_power()?;
        loop {
            let op = match self.current_token().kind {
                TokenKind::Star => BinaryOp::Mul,
                TokenKind::Slash => BinaryOp::Div,
                TokenKind::Percent => BinaryOp::Mod,
                _ => break,
            };
            self.advance();
            let right = self.parse_power()?;
            left = AstNode::binary(op, left, right);
        }
        Ok(left)
    }

    /// `unary (^ power)?`, so `2 ^ 3 ^ 2` is `2 ^ (3 ^ 2)`.
    fn parse_power(&mut self) -> Result<AstNode> {
        let base = self.parse_unary()?;
        if self.current_token().kind == TokenKind::Caret {
            self.advance();
            let exponent = self.parse_power()?;
            return Ok(AstNode::binary(BinaryOp::Pow, base, exponent));
        }
        Ok(base)
    }

    fn parse_unary(&mut self) -> Result<AstNode> {
        let op = match self.current_token().kind {
            TokenKind::Minus => UnaryOp::Neg,
            TokenKind::Bang => UnaryOp::Not,
            _ => return self.parse_call(),
        };
        self.advance();
        let operand = self.parse_unary()?;
        Ok(AstNode::unary(op, operand))
    }

    /// An identifier directly followed by `(` is a function call.
    fn parse_call(&mut self) -> Result<AstNode> {
        let is_call = matches!(self.current_token().kind, TokenKind::Ident(_))
            && self
                .tokens
                .get(self.current + 1)
                .is_some_and(|t| t.kind == TokenKind::LParen);
        if !is_call {
            return self.parse_atom();
        }

        let name = match &self.current_token().kind {
            TokenKind::Ident(name) => name.clone(),
            _ => return self.parse_atom(),
        };
        self.advance(); // name
        self.advance(); // (
        let args = self.parse_list(TokenKind::RParen)?;
        Ok(AstNode::Call { name, args })
    }

    /// Comma-separated expressions up to and including `close`.
    fn parse_list(&mut self, close: TokenKind) -> Result<Vec<AstNode>> {
        let mut items = Vec::new();
        if self.current_token().kind == close {
            self.advance();
            return Ok(items);
        }
        loop {
            items.push(self.parse_logic()?);
            if self.current_token().kind == TokenKind::Comma {
                self.advance();
                continue;
            }
            self.expect(close)?;
            return Ok(items);
        }
    }

    fn parse_atom(&mut self) -> Result<AstNode> {
        let node = match &self.current_token().kind {
            TokenKind::Number(n) => AstNode::Number(*n),
            TokenKind::String(s) => AstNode::String(s.clone()),
            TokenKind::True => AstNode::Boolean(true),
            TokenKind::False => AstNode::Boolean(false),
            TokenKind::Null => AstNode::Null,
            TokenKind::Ident(name) => AstNode::ColumnRef(name.clone()),
            TokenKind::LParen => {
                self.advance();
                let inner = self.parse_logic()?;
                self.expect(TokenKind::RParen)?;
                return Ok(inner);
            }
            TokenKind::LBracket => {
                self.advance();
                return Ok(AstNode::Array(self.parse_list(TokenKind::RBracket)?));
            }
            TokenKind::Eof => return Err(self.error("Unexpected end of expression")),
            other => return Err(self.error(format!("Unexpected '{}'", other))),
        };
        self.advance();
        Ok(node)
    }
}
