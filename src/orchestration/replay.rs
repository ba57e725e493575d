use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::io::{AsyncBufRead, AsyncBufReadExt};
use tracing::{error, info, warn};

use crate::config::Config;
use crate::db::Repository;
use crate::domain::{Decimal, ModeSource, SlotId, TimeMs};
use crate::engine::{DirectionalMode, Event};
use crate::error::AppError;
use crate::ledger::{Ledger, ObservedBalances};

use super::orchestrator::{OrchestrationError, SlotOrchestrator, StepOutcome};

/// One line of a replay file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ReplayLine {
    /// An event for one slot, or for every slot when `slot` is absent.
    Event {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        slot: Option<SlotId>,
        event: Event,
    },
    /// Balances observed on the exchange, for reconciliation.
    Balances {
        quote: Decimal,
        base: Decimal,
        price: Decimal,
        at: TimeMs,
    },
    Mode {
        slot: SlotId,
        mode: DirectionalMode,
        #[serde(default)]
        source: ModeSource,
    },
    Sticky {
        slot: SlotId,
        sticky: bool,
    },
}

impl ReplayLine {
    fn at(&self) -> Option<TimeMs> {
        match self {
            ReplayLine::Event { event, .. } => event.at(),
            ReplayLine::Balances { at, .. } => Some(*at),
            ReplayLine::Mode { .. } | ReplayLine::Sticky { .. } => None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReplaySummary {
    pub restored: bool,
    pub lines: usize,
    pub steps: usize,
    pub actions: usize,
    pub anomalies: usize,
    pub rejected: usize,
    pub skipped: usize,
    pub ledger_rows_new: usize,
    pub drift_reports: usize,
    pub total_profit: Decimal,
}

/// Drives a replay file through a [`SlotOrchestrator`] and persists what it
/// produces.
#[derive(Clone)]
pub struct Replayer {
    repo: Arc<Repository>,
    config: Config,
}

impl Replayer {
    pub fn new(repo: Arc<Repository>, config: Config) -> Self {
        Self { repo, config }
    }

    /// Restore from the latest stored snapshot, or start with no slots.
    async fn load(&self) -> Result<(SlotOrchestrator, bool), AppError> {
        match self.repo.load_latest_snapshot().await? {
            Some(snapshot) => {
                let orchestrator = SlotOrchestrator::from_snapshot(
                    snapshot,
                    self.config.ledger.clone(),
                    self.config.invariant_checks,
                )?;
                Ok((orchestrator, true))
            }
            None => {
                info!(slots = self.config.slot_count, "no snapshot stored; starting fresh");
                let ledger = Ledger::new(self.config.ledger.clone());
                Ok((
                    SlotOrchestrator::new(ledger, self.config.invariant_checks),
                    false,
                ))
            }
        }
    }

    /// Replay every line of `reader`, then store a snapshot.
    ///
    /// Slots are bootstrapped on the first line that carries a time, at
    /// `START_PRICE` or else at the first price tick.
    pub async fn run<R>(&self, reader: R) -> Result<ReplaySummary, AppError>
    where
        R: AsyncBufRead + Unpin,
    {
        let (mut orchestrator, restored) = self.load().await?;
        let mut summary = ReplaySummary {
            restored,
            ..ReplaySummary::default()
        };
        let mut last_at: Option<TimeMs> = None;
        let mut lines = reader.lines();
        let mut line_no = 0usize;

        while let Some(raw) = lines.next_line().await? {
            line_no += 1;
            let trimmed = raw.trim();
            if trimmed.is_empty() || trimmed.starts_with('#') {
                continue;
            }
            let line: ReplayLine =
                serde_json::from_str(trimmed).map_err(|e| AppError::InvalidInput {
                    line: line_no,
                    reason: e.to_string(),
                })?;
            summary.lines += 1;
            if let Some(at) = line.at() {
                last_at = Some(last_at.map_or(at, |prev| prev.max(at)));
                self.ensure_slots(&mut orchestrator, &line, at)?;
            }

            if let Err(e) = self
                .apply_line(&mut orchestrator, line, line_no, &mut summary)
                .await
            {
                summary.count_failure(line_no, e)?;
            }
        }

        let taken_at = last_at.unwrap_or_else(TimeMs::now);
        let snapshot_id = self
            .repo
            .store_snapshot(&orchestrator.snapshot(taken_at))
            .await?;
        summary.total_profit = orchestrator.total_profit();

        info!(
            snapshot_id,
            lines = summary.lines,
            ledger_rows_new = summary.ledger_rows_new,
            rejected = summary.rejected,
            anomalies = summary.anomalies,
            total_profit = %summary.total_profit,
            "replay finished"
        );
        Ok(summary)
    }

    fn ensure_slots(
        &self,
        orchestrator: &mut SlotOrchestrator,
        line: &ReplayLine,
        at: TimeMs,
    ) -> Result<(), AppError> {
        if !orchestrator.slot_ids().is_empty() {
            return Ok(());
        }
        let price = match (self.config.start_price, line) {
            (Some(price), _) => price,
            (None, ReplayLine::Event { event: Event::PriceTick { price, .. }, .. })
                if price.is_positive() =>
            {
                *price
            }
            _ => return Ok(()),
        };
        for n in 0..self.config.slot_count {
            let actions = orchestrator.bootstrap_slot(SlotId(n), price, at, &self.config.engine)?;
            for action in &actions {
                info!(slot = %SlotId(n), ?action, "action");
            }
        }
        Ok(())
    }

    async fn apply_line(
        &self,
        orchestrator: &mut SlotOrchestrator,
        line: ReplayLine,
        line_no: usize,
        summary: &mut ReplaySummary,
    ) -> Result<(), ReplayStepError> {
        let engine = &self.config.engine;
        let outcomes = match line {
            ReplayLine::Event {
                slot: Some(slot_id),
                event,
            } => vec![orchestrator.apply(slot_id, &event, engine)?],
            ReplayLine::Event { slot: None, event } => {
                let broadcast = orchestrator.broadcast(&event, engine);
                for err in broadcast.errors {
                    summary.count_failure(line_no, err.into())?;
                }
                broadcast.outcomes
            }
            ReplayLine::Mode { slot, mode, source } => {
                vec![orchestrator.set_directional_mode(slot, mode, source, engine)?]
            }
            ReplayLine::Sticky { slot, sticky } => {
                orchestrator.set_sticky(slot, sticky)?;
                Vec::new()
            }
            ReplayLine::Balances {
                quote,
                base,
                price,
                at,
            } => {
                let observed = ObservedBalances { quote, base };
                if let Some(report) = orchestrator.maybe_reconcile(observed, price, at) {
                    self.repo.insert_drift_report(&report).await?;
                    summary.drift_reports += 1;
                }
                Vec::new()
            }
        };

        for outcome in outcomes {
            self.persist(outcome, summary).await?;
        }
        Ok(())
    }

    async fn persist(
        &self,
        outcome: StepOutcome,
        summary: &mut ReplaySummary,
    ) -> Result<(), sqlx::Error> {
        summary.steps += 1;
        summary.actions += outcome.actions.len();
        summary.anomalies += outcome.anomalies.len();
        for action in &outcome.actions {
            info!(slot = %outcome.slot_id, ?action, "action");
        }
        summary.ledger_rows_new += self
            .repo
            .insert_ledger_entries_batch(&outcome.ledger_entries)
            .await?;
        Ok(())
    }
}

impl ReplaySummary {
    fn count_failure(&mut self, line: usize, err: ReplayStepError) -> Result<(), sqlx::Error> {
        match err {
            ReplayStepError::Rejected(e) => {
                error!(line, error = %e, "line rejected; slot state kept");
                self.rejected += 1;
            }
            ReplayStepError::Skipped(e) => {
                warn!(line, error = %e, "line skipped");
                self.skipped += 1;
            }
            ReplayStepError::Db(e) => return Err(e),
        }
        Ok(())
    }
}

enum ReplayStepError {
    Rejected(OrchestrationError),
    Skipped(OrchestrationError),
    Db(sqlx::Error),
}

impl From<OrchestrationError> for ReplayStepError {
    fn from(err: OrchestrationError) -> Self {
        match err {
            OrchestrationError::InvariantViolation { .. } => ReplayStepError::Rejected(err),
            OrchestrationError::UnknownSlot(_) | OrchestrationError::DuplicateSlot(_) => {
                ReplayStepError::Skipped(err)
            }
        }
    }
}

impl From<sqlx::Error> for ReplayStepError {
    fn from(err: sqlx::Error) -> Self {
        ReplayStepError::Db(err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::migrations::init_db;
    use crate::engine::EngineConfig;
    use crate::ledger::LedgerConfig;
    use crate::orchestration::InvariantChecks;
    use std::str::FromStr;
    use tempfile::TempDir;

    async fn setup_repo() -> (Arc<Repository>, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let db_path = temp_dir
            .path()
            .join("test.db")
            .to_string_lossy()
            .to_string();
        let pool = init_db(&db_path).await.expect("init_db failed");
        (Arc::new(Repository::new(pool)), temp_dir)
    }

    fn test_config() -> Config {
        Config {
            database_path: ":memory:".to_string(),
            events_path: None,
            slot_count: 1,
            start_price: None,
            engine: EngineConfig::default(),
            ledger: LedgerConfig::default(),
            invariant_checks: InvariantChecks::Always,
        }
    }

    // Slot 0 bootstraps at 0.1: #1 sells A at 0.1002, #2 buys B at 0.0998.
    const SESSION: &str = r#"
{"kind":"event","event":{"type":"price_tick","price":"0.1","at":1000}}
{"kind":"event","slot":0,"event":{"type":"fill","local_id":1,"price":"0.1002","volume":"20","at":2000}}
{"kind":"event","slot":0,"event":{"type":"fill","local_id":3,"price":"0.09920","volume":"20","at":3000}}
{"kind":"balances","quote":"0","base":"0","price":"0.1","at":4000}
"#;

    #[tokio::test]
    async fn test_replay_books_cycle_and_stores_snapshot() {
        let (repo, _temp) = setup_repo().await;
        let replayer = Replayer::new(repo.clone(), test_config());

        let summary = replayer.run(SESSION.as_bytes()).await.unwrap();
        assert!(!summary.restored);
        assert_eq!(summary.lines, 4);
        assert_eq!(summary.rejected, 0);
        assert_eq!(summary.anomalies, 0);
        assert_eq!(summary.drift_reports, 1);
        assert!(summary.total_profit.is_positive());

        // Entry fill, exit fill and the cycle booking.
        assert_eq!(summary.ledger_rows_new, 3);
        assert_eq!(repo.query_ledger_entries(None).await.unwrap().len(), 3);

        let snapshot = repo.load_latest_snapshot().await.unwrap().unwrap();
        assert_eq!(snapshot.slots.len(), 1);
        assert_eq!(snapshot.taken_at, TimeMs::new(4000));
        assert_eq!(snapshot.slots[0].state.completed_cycles.len(), 1);
    }

    #[tokio::test]
    async fn test_second_replay_books_nothing_new() {
        let (repo, _temp) = setup_repo().await;
        let replayer = Replayer::new(repo.clone(), test_config());

        let first = replayer.run(SESSION.as_bytes()).await.unwrap();
        let second = replayer.run(SESSION.as_bytes()).await.unwrap();

        assert!(second.restored);
        assert_eq!(second.ledger_rows_new, 0, "Second run should insert nothing new");
        assert_eq!(second.total_profit, first.total_profit);
        assert_eq!(
            repo.query_ledger_entries(None).await.unwrap().len(),
            first.ledger_rows_new
        );
    }

    #[tokio::test]
    async fn test_events_before_bootstrap_are_skipped() {
        let (repo, _temp) = setup_repo().await;
        let replayer = Replayer::new(repo, test_config());
        let input = r#"{"kind":"event","slot":0,"event":{"type":"timer_tick","at":10}}"#;

        let summary = replayer.run(input.as_bytes()).await.unwrap();
        assert_eq!(summary.skipped, 1);
        assert_eq!(summary.steps, 0);
    }

    #[tokio::test]
    async fn test_start_price_bootstraps_every_slot() {
        let (repo, _temp) = setup_repo().await;
        let config = Config {
            slot_count: 3,
            start_price: Some(Decimal::from_str("0.1").unwrap()),
            ..test_config()
        };
        let replayer = Replayer::new(repo.clone(), config);
        let input = r#"{"kind":"event","event":{"type":"timer_tick","at":10}}"#;

        let summary = replayer.run(input.as_bytes()).await.unwrap();
        assert_eq!(summary.steps, 3);
        let snapshot = repo.load_latest_snapshot().await.unwrap().unwrap();
        assert_eq!(snapshot.slots.len(), 3);
    }

    #[tokio::test]
    async fn test_malformed_line_is_an_error() {
        let (repo, _temp) = setup_repo().await;
        let replayer = Replayer::new(repo, test_config());
        let input = "{\"kind\":\"event\"}\n";

        match replayer.run(input.as_bytes()).await {
            Err(AppError::InvalidInput { line, .. }) => assert_eq!(line, 1),
            other => panic!("Expected InvalidInput error, got {:?}", other),
        }
    }

    #[test]
    fn test_replay_line_parses_mode_change() {
        let line: ReplayLine = serde_json::from_str(
            r#"{"kind":"mode","slot":2,"mode":"long_only","source":"policy_driven"}"#,
        )
        .unwrap();
        assert_eq!(
            line,
            ReplayLine::Mode {
                slot: SlotId(2),
                mode: DirectionalMode::LongOnly,
                source: ModeSource::PolicyDriven,
            }
        );
    }
}
