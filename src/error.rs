//! Error taxonomy shared by the query, expression and transform subsystems.
//!
//! Every failure a caller can observe is one of six kinds. None of them is
//! fatal: the transform pipeline turns each of them into a rollback.

use std::fmt;

/// Result type used across the crate.
pub type Result<T> = std::result::Result<T, PrismError>;

/// A tokenizer or parser failure, positioned in the expression source.
///
/// Display renders the message, the source text and a caret under the
/// offending character:
///
/// ```text
/// Unexpected character '@' at position 6
///   score @ 2
///         ^
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct SyntaxError {
    pub message: String,
    /// Character offset (not byte offset) into `input`.
    pub position: usize,
    pub input: String,
}

impl SyntaxError {
    pub fn new(message: impl Into<String>, position: usize, input: &str) -> Self {
        Self {
            message: message.into(),
            position,
            input: input.to_string(),
        }
    }
}

impl fmt::Display for SyntaxError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{} at position {}", self.message, self.position)?;
        writeln!(f, "  {}", self.input)?;
        write!(f, "  {}^", " ".repeat(self.position))
    }
}

impl std::error::Error for SyntaxError {}

/// Unified error type.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum PrismError {
    /// Tokenizer/parser error with source position.
    #[error(transparent)]
    Syntax(#[from] SyntaxError),

    /// Query or transform does not fit the schema. `message` is complete and
    /// already names the suggestion and the available alternatives.
    #[error("{message}")]
    Validation {
        message: String,
        suggestion: Option<String>,
    },

    /// Derived column definitions form a cycle.
    #[error("Circular dependency: {}", path.join(" -> "))]
    Cycle { path: Vec<String> },

    /// Illegal or colliding column name.
    #[error("{0}")]
    Name(String),

    /// Evaluation-time failure such as an unknown column reference.
    #[error("{0}")]
    Evaluation(String),

    /// Storage or engine failure, message passed through.
    #[error("{0}")]
    Execution(String),
}

impl PrismError {
    pub fn validation(message: impl Into<String>) -> Self {
        PrismError::Validation {
            message: message.into(),
            suggestion: None,
        }
    }

    pub fn validation_with(message: impl Into<String>, suggestion: Option<String>) -> Self {
        PrismError::Validation {
            message: message.into(),
            suggestion,
        }
    }

    /// The concrete cycle path, if this is a cycle error.
    pub fn cycle_path(&self) -> Option<&[String]> {
        match self {
            PrismError::Cycle { path } => Some(path),
            _ => None,
        }
    }
}

impl From<rusqlite::Error> for PrismError {
    fn from(err: rusqlite::Error) -> Self {
        PrismError::Execution(err.to_string())
    }
}

impl From<serde_json::Error> for PrismError {
    fn from(err: serde_json::Error) -> Self {
        PrismError::Execution(format!("JSON error: {}", err))
    }
}

impl From<std::io::Error> for PrismError {
    fn from(err: std::io::Error) -> Self {
        PrismError::Execution(format!("I/O error: {}", err))
    }
}
