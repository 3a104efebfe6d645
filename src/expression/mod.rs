//! Expression language for derived columns.
//!
//! ```text
//! score * 2
//! if_else(`final grade` >= 50, 'pass', 'fail')
//! zscore(income)                  -- column-wise
//! date_diff(shipped, ordered, 'day')
//! ```
//!
//! Source text goes through [`tokenize`] and [`parse`] into an
//! [`AstNode`] tree, which [`evaluate_expression`] runs over a set of rows.
//! Syntax errors carry the failing character position and render a caret.

pub mod ast;
pub mod evaluator;
pub mod functions;
pub mod inference;
pub mod lexer;
pub mod parser;

pub use ast::{AstNode, BinaryOp, UnaryOp};
pub use evaluator::{check_expression, evaluate_ast, evaluate_expression, EvalOptions, Evaluation};
pub use functions::{FunctionKind, FunctionSpec, CATALOGUE};
pub use inference::{EvalStats, ValueType};
pub use lexer::{tokenize, Token, TokenKind};
pub use parser::parse;

/// Column names an expression references, unique, in order of appearance.
pub fn extract_column_refs(ast: &AstNode) -> Vec<String> {
    ast.column_refs()
}
