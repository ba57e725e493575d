//! Snapshot and drift report operations for the repository.

use crate::error::AppError;
use crate::ledger::DriftReport;
use crate::snapshot::Snapshot;
use sqlx::Row;
use tracing::warn;

use super::Repository;

impl Repository {
    /// Store a snapshot as JSON. Returns the new snapshot id.
    ///
    /// # Errors
    /// Returns an error if encoding or the insert fails.
    pub async fn store_snapshot(&self, snapshot: &Snapshot) -> Result<i64, AppError> {
        let payload = snapshot.to_json()?;
        let last_ledger_id = snapshot.ledger.as_ref().map(|l| l.last_id).unwrap_or(0);

        let result = sqlx::query(
            r#"
            INSERT INTO snapshots (taken_at, last_ledger_id, payload, created_at)
            VALUES (?, ?, ?, ?)
            "#,
        )
        .bind(snapshot.taken_at.as_ms())
        .bind(last_ledger_id as i64)
        .bind(payload)
        .bind(chrono::Utc::now().timestamp_millis())
        .execute(&self.pool)
        .await?;

        Ok(result.last_insert_rowid())
    }

    /// Most recent snapshot, if any.
    ///
    /// # Errors
    /// Returns an error if the query fails or the payload cannot be decoded.
    pub async fn load_latest_snapshot(&self) -> Result<Option<Snapshot>, sqlx::Error> {
        let row = sqlx::query(
            r#"
            SELECT snapshot_id, payload FROM snapshots
            ORDER BY snapshot_id DESC
            LIMIT 1
            "#,
        )
        .fetch_optional(&self.pool)
        .await?;

        let Some(row) = row else {
            return Ok(None);
        };
        let snapshot_id: i64 = row.get("snapshot_id");
        let payload: String = row.get("payload");
        Snapshot::from_json(&payload).map(Some).map_err(|e| {
            warn!(snapshot_id, error = %e, "stored snapshot could not be decoded");
            sqlx::Error::Decode(Box::new(e))
        })
    }

    /// Record a reconciliation outcome for operators.
    ///
    /// # Errors
    /// Returns an error if the insert fails.
    pub async fn insert_drift_report(&self, report: &DriftReport) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            INSERT INTO drift_reports (
                time_ms, status, price, quote_drift, base_drift, value_drift, created_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(report.at.as_ms())
        .bind(report.status.as_str())
        .bind(report.price.to_canonical_string())
        .bind(report.quote_drift.to_canonical_string())
        .bind(report.base_drift.to_canonical_string())
        .bind(report.value_drift.to_canonical_string())
        .bind(chrono::Utc::now().timestamp_millis())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Count of stored drift reports with the given status.
    ///
    /// # Errors
    /// Returns an error if the query fails.
    pub async fn count_drift_reports(&self, status: &str) -> Result<i64, sqlx::Error> {
        let row = sqlx::query("SELECT COUNT(*) AS n FROM drift_reports WHERE status = ?")
            .bind(status)
            .fetch_one(&self.pool)
            .await?;
        Ok(row.get("n"))
    }
}
