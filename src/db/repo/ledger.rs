//! Ledger row operations for the repository.

use crate::domain::{Decimal, SlotId, TimeMs, TradeId};
use crate::ledger::{EntryType, LedgerEntry};
use sqlx::sqlite::SqliteRow;
use sqlx::Row;
use std::str::FromStr;

use super::{decode_decimal, Repository};

impl Repository {
    /// Insert ledger rows in one transaction, skipping any whose idempotency
    /// key is already stored.
    ///
    /// Returns the number of newly inserted rows.
    ///
    /// # Errors
    /// Returns an error if the transaction fails.
    pub async fn insert_ledger_entries_batch(
        &self,
        entries: &[LedgerEntry],
    ) -> Result<usize, sqlx::Error> {
        if entries.is_empty() {
            return Ok(0);
        }

        let created_at = chrono::Utc::now().timestamp_millis();
        let mut total_inserted = 0usize;
        let mut tx = self.pool.begin().await?;

        for entry in entries {
            let result = sqlx::query(
                r#"
                INSERT INTO ledger_entries (
                    entry_id, idempotency_key, time_ms, slot_id, trade_id, cycle, entry_type,
                    quote_debit, quote_credit, base_debit, base_credit, fee, realized_pnl,
                    quote_balance_after, base_balance_after, created_at
                ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                ON CONFLICT(idempotency_key) DO NOTHING
                "#,
            )
            .bind(entry.id as i64)
            .bind(entry.key().to_string())
            .bind(entry.timestamp.as_ms())
            .bind(i64::from(entry.slot_id.0))
            .bind(entry.trade_id.as_str())
            .bind(i64::from(entry.cycle))
            .bind(entry.entry_type.as_str())
            .bind(entry.quote_debit.to_canonical_string())
            .bind(entry.quote_credit.to_canonical_string())
            .bind(entry.base_debit.to_canonical_string())
            .bind(entry.base_credit.to_canonical_string())
            .bind(entry.fee.to_canonical_string())
            .bind(entry.realized_pnl.to_canonical_string())
            .bind(entry.quote_balance_after.to_canonical_string())
            .bind(entry.base_balance_after.to_canonical_string())
            .bind(created_at)
            .execute(&mut *tx)
            .await?;

            if result.rows_affected() > 0 {
                total_inserted += 1;
            }
        }

        tx.commit().await?;
        Ok(total_inserted)
    }

    /// Ledger rows in insertion order, optionally for one slot.
    ///
    /// # Errors
    /// Returns an error if the query fails or a row cannot be decoded.
    pub async fn query_ledger_entries(
        &self,
        slot_id: Option<SlotId>,
    ) -> Result<Vec<LedgerEntry>, sqlx::Error> {
        let rows = match slot_id {
            Some(slot_id) => {
                sqlx::query(
                    r#"
                    SELECT * FROM ledger_entries
                    WHERE slot_id = ?
                    ORDER BY row_id ASC
                    "#,
                )
                .bind(i64::from(slot_id.0))
                .fetch_all(&self.pool)
                .await?
            }
            None => {
                sqlx::query("SELECT * FROM ledger_entries ORDER BY row_id ASC")
                    .fetch_all(&self.pool)
                    .await?
            }
        };

        rows.iter().map(decode_entry).collect()
    }

    /// Highest ledger sequence id stored.
    ///
    /// # Errors
    /// Returns an error if the query fails.
    pub async fn last_ledger_id(&self) -> Result<Option<u64>, sqlx::Error> {
        let row = sqlx::query("SELECT MAX(entry_id) AS max_id FROM ledger_entries")
            .fetch_one(&self.pool)
            .await?;
        let max_id: Option<i64> = row.get("max_id");
        Ok(max_id.map(|id| id as u64))
    }

    /// Net quote and base flow over all stored rows.
    ///
    /// Summed in Rust: SQLite would coerce the TEXT decimals to REAL.
    ///
    /// # Errors
    /// Returns an error if the query fails or a row cannot be decoded.
    pub async fn ledger_net_flows(&self) -> Result<(Decimal, Decimal), sqlx::Error> {
        let rows = sqlx::query(
            "SELECT quote_debit, quote_credit, base_debit, base_credit FROM ledger_entries",
        )
        .fetch_all(&self.pool)
        .await?;

        let mut quote = Decimal::zero();
        let mut base = Decimal::zero();
        for row in &rows {
            quote += decode_decimal("quote_debit", row.get("quote_debit"))?;
            quote -= decode_decimal("quote_credit", row.get("quote_credit"))?;
            base += decode_decimal("base_debit", row.get("base_debit"))?;
            base -= decode_decimal("base_credit", row.get("base_credit"))?;
        }
        Ok((quote, base))
    }
}

fn decode_entry(row: &SqliteRow) -> Result<LedgerEntry, sqlx::Error> {
    let trade_id = match row.get::<String, _>("trade_id").as_str() {
        "A" => TradeId::A,
        "B" => TradeId::B,
        other => {
            return Err(sqlx::Error::Decode(
                format!("unknown trade_id: {other}").into(),
            ))
        }
    };
    let entry_type = EntryType::from_str(row.get("entry_type"))
        .map_err(|e| sqlx::Error::Decode(e.into()))?;

    Ok(LedgerEntry {
        id: row.get::<i64, _>("entry_id") as u64,
        timestamp: TimeMs::new(row.get("time_ms")),
        slot_id: SlotId(row.get::<i64, _>("slot_id") as u32),
        trade_id,
        cycle: row.get::<i64, _>("cycle") as u32,
        entry_type,
        quote_debit: decode_decimal("quote_debit", row.get("quote_debit"))?,
        quote_credit: decode_decimal("quote_credit", row.get("quote_credit"))?,
        base_debit: decode_decimal("base_debit", row.get("base_debit"))?,
        base_credit: decode_decimal("base_credit", row.get("base_credit"))?,
        fee: decode_decimal("fee", row.get("fee"))?,
        realized_pnl: decode_decimal("realized_pnl", row.get("realized_pnl"))?,
        quote_balance_after: decode_decimal("quote_balance_after", row.get("quote_balance_after"))?,
        base_balance_after: decode_decimal("base_balance_after", row.get("base_balance_after"))?,
    })
}
