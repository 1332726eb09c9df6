//! Remote access layer.
//!
//! Executes parameterized SQL statements against the backing store over an
//! HTTPS pipeline, singly or batched in one round trip. The [`Executor`]
//! trait is the seam between the store services and the transport, so
//! tests run against canned-row executors instead of a live endpoint.

mod http;
mod retry;
mod row;

pub use http::HttpExecutor;
pub use retry::RetryPolicy;
pub use row::{Row, Value};

use crate::Result;

/// A parameterized SQL statement.
///
/// All arguments travel as text or null; numeric and boolean encoding is
/// the caller's responsibility, matching the wire protocol.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Statement {
    /// The SQL text with `?` placeholders.
    pub sql: String,
    /// Positional arguments; `None` binds SQL NULL.
    pub args: Vec<Option<String>>,
}

impl Statement {
    /// Creates a statement with no arguments.
    #[must_use]
    pub fn new(sql: impl Into<String>) -> Self {
        Self {
            sql: sql.into(),
            args: Vec::new(),
        }
    }

    /// Creates a statement with positional arguments.
    #[must_use]
    pub fn with_args(sql: impl Into<String>, args: Vec<Option<String>>) -> Self {
        Self {
            sql: sql.into(),
            args,
        }
    }

    /// Appends a text argument.
    #[must_use]
    pub fn bind(mut self, value: impl Into<String>) -> Self {
        self.args.push(Some(value.into()));
        self
    }

    /// Appends an optional text argument (`None` binds NULL).
    #[must_use]
    pub fn bind_opt(mut self, value: Option<String>) -> Self {
        self.args.push(value);
        self
    }
}

/// Executes statements against the backing store.
///
/// `exec_batch` sends every statement in one round trip, preserving
/// order; statement-level failures come back in their slot so siblings
/// are unaffected. A transport-level failure fails the whole call.
pub trait Executor: Send + Sync + 'static {
    /// Executes a single statement and returns its rows.
    fn exec(&self, stmt: Statement) -> Result<Vec<Row>>;

    /// Executes all statements in one round trip.
    fn exec_batch(&self, stmts: Vec<Statement>) -> Result<Vec<Result<Vec<Row>>>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_statement_builder() {
        let stmt = Statement::new("SELECT 1");
        assert!(stmt.args.is_empty());

        let stmt = Statement::new("INSERT INTO t VALUES (?, ?)")
            .bind("a")
            .bind_opt(None);
        assert_eq!(stmt.args, vec![Some("a".to_string()), None]);
    }
}
