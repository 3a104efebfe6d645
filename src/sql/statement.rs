//! Column-level DDL and DML used when materializing derived columns.

use super::dialect::Dialect;
use super::expr::{Expr, ExprExt};
use super::token::{Token, TokenStream};

/// Storage affinity for an added column.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnAffinity {
    Integer,
    Real,
    Text,
}

impl ColumnAffinity {
    fn keyword(&self) -> &'static str {
        match self {
            ColumnAffinity::Integer => "INTEGER",
            ColumnAffinity::Real => "REAL",
            ColumnAffinity::Text => "TEXT",
        }
    }
}

/// ALTER TABLE actions.
#[derive(Debug, Clone, PartialEq)]
pub enum AlterAction {
    AddColumn {
        name: String,
        affinity: Option<ColumnAffinity>,
    },
    DropColumn {
        name: String,
    },
}

/// ALTER TABLE with a single action (the form every dialect accepts).
#[derive(Debug, Clone, PartialEq)]
#[must_use = "DDL statements have no effect until converted to SQL with to_sql()"]
pub struct AlterTable {
    pub name: String,
    pub action: AlterAction,
}

impl AlterTable {
    pub fn add_column(
        table: impl Into<String>,
        column: impl Into<String>,
        affinity: Option<ColumnAffinity>,
    ) -> Self {
        Self {
            name: table.into(),
            action: AlterAction::AddColumn {
                name: column.into(),
                affinity,
            },
        }
    }

    pub fn drop_column(table: impl Into<String>, column: impl Into<String>) -> Self {
        Self {
            name: table.into(),
            action: AlterAction::DropColumn {
                name: column.into(),
            },
        }
    }

    pub fn to_sql(&self, dialect: Dialect) -> String {
        self.to_tokens().serialize(dialect)
    }

    pub fn to_tokens(&self) -> TokenStream {
        let mut ts = TokenStream::new();
        ts.push(Token::Alter)
            .space()
            .push(Token::Table)
            .space()
            .push(Token::Ident(self.name.clone()))
            .space();

        match &self.action {
            AlterAction::AddColumn { name, affinity } => {
                ts.push(Token::Add)
                    .space()
                    .push(Token::Column)
                    .space()
                    .push(Token::Ident(name.clone()));
                if let Some(affinity) = affinity {
                    ts.space().push(Token::Raw(affinity.keyword().into()));
                }
            }
            AlterAction::DropColumn { name } => {
                ts.push(Token::Drop)
                    .space()
                    .push(Token::Column)
                    .space()
                    .push(Token::Ident(name.clone()));
            }
        }

        ts
    }
}

/// UPDATE statement.
#[derive(Debug, Clone, PartialEq)]
#[must_use = "DML statements have no effect until converted to SQL with to_sql()"]
pub struct Update {
    pub table: String,
    pub set: Vec<(String, Expr)>,
    pub filter: Option<Expr>,
}

impl Update {
    pub fn table(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            set: Vec::new(),
            filter: None,
        }
    }

    /// Set a column to a value.
    pub fn set(mut self, column: impl Into<String>, value: impl Into<Expr>) -> Self {
        self.set.push((column.into(), value.into()));
        self
    }

    /// Add WHERE clause (ANDed with existing conditions).
    pub fn filter(mut self, expr: Expr) -> Self {
        self.filter = Some(match self.filter {
            Some(existing) => existing.and(expr),
            None => expr,
        });
        self
    }

    pub fn to_sql(&self, dialect: Dialect) -> String {
        self.to_tokens(dialect).serialize(dialect)
    }

    pub fn to_tokens(&self, dialect: Dialect) -> TokenStream {
        let mut ts = TokenStream::new();

        ts.push(Token::Update)
            .space()
            .push(Token::Ident(self.table.clone()));

        ts.space().push(Token::Set).space();
        for (i, (col, expr)) in self.set.iter().enumerate() {
            if i > 0 {
                ts.comma().space();
            }
            ts.push(Token::Ident(col.clone()))
                .space()
                .push(Token::Eq)
                .space()
                .append(&expr.to_tokens_for_dialect(dialect));
        }

        if let Some(filter) = &self.filter {
            ts.space()
                .push(Token::Where)
                .space()
                .append(&filter.to_tokens_for_dialect(dialect));
        }

        ts
    }
}
