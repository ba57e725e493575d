//! SQLite persistence for ledger rows, snapshots and drift reports.
//!
//! Ledger rows are stored with their idempotency key as a unique constraint,
//! so replaying the same transitions never double-books.

pub mod migrations;
pub mod repo;

pub use migrations::init_db;
pub use repo::Repository;
