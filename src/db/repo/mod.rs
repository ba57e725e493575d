//! Repository layer for database operations.
//!
//! Methods are organized across submodules:
//! - `ledger.rs` - Ledger row inserts and queries
//! - `snapshots.rs` - Orchestrator snapshots and drift reports

mod ledger;
mod snapshots;

use crate::domain::Decimal;
use sqlx::sqlite::SqlitePool;
use std::str::FromStr;
use tracing::warn;

/// Repository for database operations.
pub struct Repository {
    pool: SqlitePool,
}

impl Repository {
    /// Create a new repository with the given connection pool.
    pub fn new(pool: SqlitePool) -> Self {
        Repository { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

/// Decimal columns are TEXT; a malformed value is a decode error, not a zero.
fn decode_decimal(column: &str, raw: &str) -> Result<Decimal, sqlx::Error> {
    Decimal::from_str(raw).map_err(|e| {
        warn!(column = column, value = raw, error = %e, "malformed decimal column");
        sqlx::Error::Decode(Box::new(e))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_decimal() {
        assert_eq!(
            decode_decimal("fee", "0.0050").unwrap(),
            Decimal::from_str("0.005").unwrap()
        );
        assert!(matches!(
            decode_decimal("fee", "abc"),
            Err(sqlx::Error::Decode(_))
        ));
    }
}
