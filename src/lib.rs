//! # Prism
//!
//! Declarative analytic queries and derived columns over tabular data.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────┐      ┌──────────────────────────────┐
//! │   Query (JSON-shaped)    │      │  Expression ("score * 2")    │
//! └──────────────────────────┘      └──────────────────────────────┘
//!              │ [dsl::validation]                │ [expression::parser]
//!              ▼                                  ▼
//! ┌──────────────────────────┐      ┌──────────────────────────────┐
//! │ Validated against Schema │      │            AstNode           │
//! └──────────────────────────┘      └──────────────────────────────┘
//!              │ [dsl::compile]                   │ [transform::dependency]
//!              ▼                                  ▼
//! ┌──────────────────────────┐      ┌──────────────────────────────┐
//! │  SQL (5 dialects)  or    │      │  Cycle check, evaluation,    │
//! │  in-process fallback     │      │  materialized column         │
//! └──────────────────────────┘      └──────────────────────────────┘
//!              │                                  │
//!              └───────────────┬──────────────────┘
//!                              ▼
//!                 ┌──────────────────────────┐
//!                 │ storage (SQLite, memory) │
//!                 └──────────────────────────┘
//! ```
//!
//! - [`dsl`]: declarative queries, validation, SQL compilation and the
//!   aggregate fallback
//! - [`expression`]: the derived-column expression language
//! - [`transform`]: layered derived columns, dependency graph and manifest
//! - [`sql`]: the multi-dialect SQL builder the compiler emits through
//! - [`storage`]: table storage the pipeline and fallback run against

pub mod config;
pub mod dsl;
pub mod error;
pub mod expression;
pub mod fuzzy;
pub mod schema;
pub mod sql;
mod stats;
pub mod storage;
pub mod transform;
pub mod value;

pub use error::{PrismError, Result, SyntaxError};
pub use value::{ResultSet, Row, Value};

/// Re-exports for convenient usage.
pub mod prelude {
    pub use crate::config::Settings;
    pub use crate::dsl::{
        compile_query, correct_query, execute_aggregate_fallback, has_fallback_aggregates,
        has_window_functions, validate_query, ExecutionPath, Query,
    };
    pub use crate::error::{PrismError, Result};
    pub use crate::expression::{evaluate_expression, parse, tokenize, EvalOptions, ValueType};
    pub use crate::schema::{Column, ColumnType, Schema, SchemaProvider, Table};
    pub use crate::sql::{Dialect, SqlDialect};
    pub use crate::storage::{MemoryStore, SqliteStore, Storage};
    pub use crate::transform::{
        replay, Layer, Manifest, TransformPipeline, TransformRecord, TransformSpec,
    };
    pub use crate::value::{ResultSet, Row, Value};
}
