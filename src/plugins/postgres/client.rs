//! Client abstraction consumed by the handlers.
//!
//! Handlers only see [`PostgresClient`] and [`Row`]; the sqlx-backed
//! implementation lives in [`conn`](super::conn) and tests plug in stubs.

use thiserror::Error;

use crate::plugin::{ExportContext, Interrupted};
use crate::plugins::postgres::ConnKey;

/// Errors raised by the client layer.
#[derive(Debug, Error)]
pub enum ClientError {
    /// The query returned no rows.
    #[error("no rows in result set")]
    NoRows,

    /// The scanned column is NULL.
    #[error("unexpected NULL value")]
    NullValue,

    /// Deadline elapsed or the call was cancelled.
    #[error(transparent)]
    Interrupted(#[from] Interrupted),

    /// Database driver error.
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// The connection manager was closed by `stop`.
    #[error("connection manager is closed")]
    Closed,
}

/// One result row. Only the first column is read.
pub trait Row: Send + Sync {
    /// Read the first column as text.
    ///
    /// Returns [`ClientError::NoRows`] when the query produced no row.
    fn scan_text(&self) -> Result<String, ClientError>;

    /// Read the first column as a 64-bit integer.
    ///
    /// Returns [`ClientError::NoRows`] when the query produced no row.
    fn scan_i64(&self) -> Result<i64, ClientError>;
}

/// A query-capable connection lent to a handler for one call.
#[async_trait::async_trait]
pub trait PostgresClient: Send + Sync {
    /// Run `query` with positional text `args` and return its first row.
    ///
    /// Errors are deferred to [`Row`] when the query simply returns no row.
    async fn query_row(
        &self,
        ctx: &ExportContext,
        query: &str,
        args: &[&str],
    ) -> Result<Box<dyn Row>, ClientError>;
}

/// Source of connections, shared by all export calls of a plugin.
///
/// Implementations must be safe for concurrent acquire and release.
#[async_trait::async_trait]
pub trait ConnectionProvider: Send + Sync {
    /// Obtain a connection for `key`. Dropping it returns it to the pool.
    async fn acquire(
        &self,
        ctx: &ExportContext,
        key: &ConnKey,
    ) -> Result<Box<dyn PostgresClient>, ClientError>;

    /// Release every pooled connection. New acquisitions fail with
    /// [`ClientError::Closed`]. Must not block.
    fn close(&self);
}
