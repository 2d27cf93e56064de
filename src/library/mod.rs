//! Normalized music library persistence.
//!
//! `schema` owns DDL and versioning, `queries` holds the SQL catalog,
//! `changes` accumulates per-transaction notifications, and `store` is the
//! write/read engine built on top of all three.

pub mod changes;
pub mod queries;
pub mod schema;
pub mod store;
