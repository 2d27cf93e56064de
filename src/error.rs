//! Error types shared by the library store and its callers.

use thiserror::Error;

/// Failures surfaced by the music database layer.
///
/// Schema and transaction failures are fatal for the operation that raised
/// them. Row-level failures are reported per track so a batch can keep going.
#[derive(Debug, Error)]
pub enum DatabaseError {
    #[error("database schema setup failed in {context}: {source}")]
    Schema {
        context: &'static str,
        #[source]
        source: rusqlite::Error,
    },

    #[error("database query failed in {context}: {source}")]
    QueryExecution {
        context: &'static str,
        #[source]
        source: rusqlite::Error,
    },

    /// A unique constraint fired while inserting a row that a prior lookup
    /// said was absent. The caller re-queries and adopts the existing row.
    #[error("{kind} already exists under a different id")]
    DuplicateEntity { kind: &'static str },

    #[error("transaction {context} failed: {source}")]
    Transaction {
        context: &'static str,
        #[source]
        source: rusqlite::Error,
    },
}
