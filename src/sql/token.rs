//! SQL tokens, the atomic units of emitted SQL.
//!
//! Tokens are dialect-agnostic and serialize to dialect-specific text.

use super::dialect::{Dialect, SqlDialect};

/// Every element the builder can emit.
///
/// Adding a variant forces every `serialize` arm to handle it.
#[derive(Debug, Clone, PartialEq)]
pub enum Token {
    // === Keywords ===
    Select,
    From,
    Where,
    And,
    Or,
    Not,
    As,
    On,
    Join,
    Inner,
    Left,
    GroupBy,
    Having,
    OrderBy,
    Asc,
    Desc,
    NullsFirst,
    NullsLast,
    Limit,
    Offset,
    Fetch,
    Next,
    Rows,
    Only,
    Case,
    When,
    Then,
    Else,
    End,
    In,
    Between,
    Like,
    Escape,
    IsNull,
    IsNotNull,
    Distinct,
    With,
    Null,
    True,
    False,
    WithinGroup,

    // === Window keywords ===
    Over,
    PartitionBy,
    Unbounded,
    Preceding,
    CurrentRow,

    // === Statement keywords ===
    Alter,
    Table,
    Add,
    Drop,
    Column,
    Update,
    Set,

    // === Punctuation ===
    Comma,
    Dot,
    Star,
    LParen,
    RParen,

    // === Operators ===
    Eq,
    Ne,
    Lt,
    Gt,
    Lte,
    Gte,
    Plus,
    Minus,
    Mul,
    Div,
    Mod,
    Concat,

    // === Formatting ===
    Space,
    Newline,
    Indent(usize),

    // === Dynamic content ===
    /// Table, column or alias name; quoted per dialect.
    Ident(String),
    LitInt(i64),
    LitFloat(f64),
    LitString(String),
    LitBool(bool),
    LitNull,
    /// Positional bind parameter, 1-based.
    Placeholder(usize),
    /// Function name, uppercased and remapped per dialect.
    FunctionName(String),

    /// Trusted SQL fragment emitted verbatim. Never built from user input:
    /// user values travel as literals, user names as identifiers.
    Raw(String),
}

impl Token {
    /// Serialize this token for the given dialect.
    pub fn serialize(&self, dialect: Dialect) -> String {
        match self {
            Token::Select => "SELECT".into(),
            Token::From => "FROM".into(),
            Token::Where => "WHERE".into(),
            Token::And => "AND".into(),
            Token::Or => "OR".into(),
            Token::Not => "NOT".into(),
            Token::As => "AS".into(),
            Token::On => "ON".into(),
            Token::Join => "JOIN".into(),
            Token::Inner => "INNER".into(),
            Token::Left => "LEFT".into(),
            Token::GroupBy => "GROUP BY".into(),
            Token::Having => "HAVING".into(),
            Token::OrderBy => "ORDER BY".into(),
            Token::Asc => "ASC".into(),
            Token::Desc => "DESC".into(),
            Token::NullsFirst => "NULLS FIRST".into(),
            Token::NullsLast => "NULLS LAST".into(),
            Token::Limit => "LIMIT".into(),
            Token::Offset => "OFFSET".into(),
            Token::Fetch => "FETCH".into(),
            Token::Next => "NEXT".into(),
            Token::Rows => "ROWS".into(),
            Token::Only => "ONLY".into(),
            Token::Case => "CASE".into(),
            Token::When => "WHEN".into(),
            Token::Then => "THEN".into(),
            Token::Else => "ELSE".into(),
            Token::End => "END".into(),
            Token::In => "IN".into(),
            Token::Between => "BETWEEN".into(),
            Token::Like => "LIKE".into(),
            Token::Escape => "ESCAPE".into(),
            Token::IsNull => "IS NULL".into(),
            Token::IsNotNull => "IS NOT NULL".into(),
            Token::Distinct => "DISTINCT".into(),
            Token::With => "WITH".into(),
            Token::Null => "NULL".into(),
            Token::True => dialect.format_bool(true).into(),
            Token::False => dialect.format_bool(false).into(),
            Token::WithinGroup => "WITHIN GROUP".into(),

            Token::Over => "OVER".into(),
            Token::PartitionBy => "PARTITION BY".into(),
            Token::Unbounded => "UNBOUNDED".into(),
            Token::Preceding => "PRECEDING".into(),
            Token::CurrentRow => "CURRENT ROW".into(),

            Token::Alter => "ALTER".into(),
            Token::Table => "TABLE".into(),
            Token::Add => "ADD".into(),
            Token::Drop => "DROP".into(),
            Token::Column => "COLUMN".into(),
            Token::Update => "UPDATE".into(),
            Token::Set => "SET".into(),

            Token::Comma => ",".into(),
            Token::Dot => ".".into(),
            Token::Star => "*".into(),
            Token::LParen => "(".into(),
            Token::RParen => ")".into(),

            Token::Eq => "=".into(),
            Token::Ne => "<>".into(),
            Token::Lt => "<".into(),
            Token::Gt => ">".into(),
            Token::Lte => "<=".into(),
            Token::Gte => ">=".into(),
            Token::Plus => "+".into(),
            Token::Minus => "-".into(),
            Token::Mul => "*".into(),
            Token::Div => "/".into(),
            Token::Mod => "%".into(),
            Token::Concat => dialect.concat_operator().into(),

            Token::Space => " ".into(),
            Token::Newline => "\n".into(),
            Token::Indent(n) => "  ".repeat(*n),

            Token::Ident(name) => dialect.quote_identifier(name),
            Token::LitInt(n) => n.to_string(),
            Token::LitFloat(f) => format_float(*f),
            Token::LitString(s) => dialect.quote_string(s),
            Token::LitBool(b) => dialect.format_bool(*b).into(),
            Token::LitNull => "NULL".into(),
            Token::Placeholder(n) => dialect.format_placeholder(*n),
            Token::FunctionName(name) => match dialect.remap_function(name) {
                Some(remapped) => remapped.to_uppercase(),
                None => name.to_uppercase(),
            },

            Token::Raw(s) => s.clone(),
        }
    }
}

/// Floats go through ryu; non-finite values have no SQL literal and
/// render as NULL.
fn format_float(f: f64) -> String {
    if !f.is_finite() {
        return "NULL".into();
    }
    let mut buffer = ryu::Buffer::new();
    buffer.format(f).to_string()
}

/// A stream of tokens that serializes to SQL.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TokenStream {
    tokens: Vec<Token>,
}

impl TokenStream {
    pub fn new() -> Self {
        Self { tokens: vec![] }
    }

    pub fn push(&mut self, token: Token) -> &mut Self {
        self.tokens.push(token);
        self
    }

    pub fn extend(&mut self, tokens: impl IntoIterator<Item = Token>) -> &mut Self {
        self.tokens.extend(tokens);
        self
    }

    pub fn append(&mut self, other: &TokenStream) -> &mut Self {
        self.tokens.extend(other.tokens.iter().cloned());
        self
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }

    pub fn serialize(&self, dialect: Dialect) -> String {
        self.tokens.iter().map(|t| t.serialize(dialect)).collect()
    }

    pub fn space(&mut self) -> &mut Self {
        self.push(Token::Space)
    }
    pub fn newline(&mut self) -> &mut Self {
        self.push(Token::Newline)
    }
    pub fn indent(&mut self, n: usize) -> &mut Self {
        self.push(Token::Indent(n))
    }
    pub fn comma(&mut self) -> &mut Self {
        self.push(Token::Comma)
    }
    pub fn lparen(&mut self) -> &mut Self {
        self.push(Token::LParen)
    }
    pub fn rparen(&mut self) -> &mut Self {
        self.push(Token::RParen)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ident_serialize() {
        let tok = Token::Ident("orders".into());
        assert_eq!(tok.serialize(Dialect::DuckDb), "\"orders\"");
        assert_eq!(tok.serialize(Dialect::TSql), "[orders]");
        assert_eq!(tok.serialize(Dialect::MySql), "`orders`");
        assert_eq!(tok.serialize(Dialect::Sqlite), "\"orders\"");
    }

    #[test]
    fn test_token_stream() {
        let mut ts = TokenStream::new();
        ts.push(Token::Select)
            .space()
            .push(Token::Ident("amount".into()))
            .space()
            .push(Token::From)
            .space()
            .push(Token::Ident("orders".into()));

        assert_eq!(
            ts.serialize(Dialect::Postgres),
            "SELECT \"amount\" FROM \"orders\""
        );
    }

    #[test]
    fn test_float_serialize() {
        assert_eq!(Token::LitFloat(3.25).serialize(Dialect::DuckDb), "3.25");
        assert_eq!(Token::LitFloat(100.0).serialize(Dialect::DuckDb), "100.0");
        assert_eq!(Token::LitFloat(f64::NAN).serialize(Dialect::DuckDb), "NULL");
        assert_eq!(
            Token::LitFloat(f64::INFINITY).serialize(Dialect::Postgres),
            "NULL"
        );
    }

    #[test]
    fn test_placeholder_per_dialect() {
        assert_eq!(Token::Placeholder(2).serialize(Dialect::Sqlite), "?2");
        assert_eq!(Token::Placeholder(2).serialize(Dialect::Postgres), "$2");
        assert_eq!(Token::Placeholder(2).serialize(Dialect::MySql), "?");
    }

    #[test]
    fn test_string_literal_escaping() {
        assert_eq!(
            Token::LitString("O'Brien".into()).serialize(Dialect::DuckDb),
            "'O''Brien'"
        );
    }
}
