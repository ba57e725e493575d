use std::collections::HashMap;
use std::str::FromStr;
use thiserror::Error;

use crate::domain::Decimal;
use crate::engine::EngineConfig;
use crate::ledger::{DriftThresholds, LedgerConfig};
use crate::orchestration::InvariantChecks;

#[derive(Debug, Clone)]
pub struct Config {
    pub database_path: String,
    /// JSON-lines event file to replay; stdin when absent.
    pub events_path: Option<String>,
    pub slot_count: u32,
    /// Reference price for bootstrapping slots when no snapshot exists.
    pub start_price: Option<Decimal>,
    pub engine: EngineConfig,
    pub ledger: LedgerConfig,
    pub invariant_checks: InvariantChecks,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnv(String),
    #[error("Invalid value for {0}: {1}")]
    InvalidValue(String, String),
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_env_map(std::env::vars().collect())
    }

    pub fn from_env_map(env_map: HashMap<String, String>) -> Result<Self, ConfigError> {
        let database_path = env_map
            .get("DATABASE_PATH")
            .cloned()
            .ok_or_else(|| ConfigError::MissingEnv("DATABASE_PATH".to_string()))?;

        let events_path = env_map
            .get("EVENTS_PATH")
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty());

        let slot_count = parse_or(&env_map, "SLOT_COUNT", 1u32, "must be a valid u32")?;
        if slot_count == 0 {
            return Err(ConfigError::InvalidValue(
                "SLOT_COUNT".to_string(),
                "must be at least 1".to_string(),
            ));
        }

        let start_price = match env_map.get("START_PRICE") {
            Some(raw) => Some(parse_positive(&env_map, "START_PRICE", raw)?),
            None => None,
        };

        let defaults = EngineConfig::default();
        let engine = EngineConfig {
            order_size: parse_or(&env_map, "ORDER_SIZE", defaults.order_size, "must be a decimal")?,
            entry_pct_a: parse_or(&env_map, "ENTRY_PCT_A", defaults.entry_pct_a, "must be a decimal")?,
            entry_pct_b: parse_or(&env_map, "ENTRY_PCT_B", defaults.entry_pct_b, "must be a decimal")?,
            profit_pct: parse_or(&env_map, "PROFIT_PCT", defaults.profit_pct, "must be a decimal")?,
            refresh_pct: parse_or(&env_map, "REFRESH_PCT", defaults.refresh_pct, "must be a decimal")?,
            s1_orphan_after_sec: parse_or(
                &env_map,
                "S1_ORPHAN_AFTER_SEC",
                defaults.s1_orphan_after_sec,
                "must be a valid u64",
            )?,
            s2_orphan_after_sec: parse_or(
                &env_map,
                "S2_ORPHAN_AFTER_SEC",
                defaults.s2_orphan_after_sec,
                "must be a valid u64",
            )?,
            max_recovery_slots: parse_or(
                &env_map,
                "MAX_RECOVERY_SLOTS",
                defaults.max_recovery_slots,
                "must be a valid usize",
            )?,
            sticky_mode_enabled: parse_bool(&env_map, "STICKY_MODE", defaults.sticky_mode_enabled)?,
            min_volume: parse_or(&env_map, "MIN_VOLUME", defaults.min_volume, "must be a decimal")?,
            min_cost: parse_or(&env_map, "MIN_COST", defaults.min_cost, "must be a decimal")?,
            price_decimals: parse_or(
                &env_map,
                "PRICE_DECIMALS",
                defaults.price_decimals,
                "must be a valid u32",
            )?,
            volume_decimals: parse_or(
                &env_map,
                "VOLUME_DECIMALS",
                defaults.volume_decimals,
                "must be a valid u32",
            )?,
            fee_pct: parse_or(&env_map, "FEE_PCT", defaults.fee_pct, "must be a decimal")?,
            ..defaults
        };
        if !engine.order_size.is_positive() {
            return Err(ConfigError::InvalidValue(
                "ORDER_SIZE".to_string(),
                "must be positive".to_string(),
            ));
        }

        let ledger_defaults = LedgerConfig::default();
        let thresholds = DriftThresholds {
            soft: parse_or(&env_map, "DRIFT_SOFT", ledger_defaults.thresholds.soft, "must be a decimal")?,
            hard: parse_or(&env_map, "DRIFT_HARD", ledger_defaults.thresholds.hard, "must be a decimal")?,
        };
        if thresholds.soft > thresholds.hard {
            return Err(ConfigError::InvalidValue(
                "DRIFT_SOFT".to_string(),
                "must not exceed DRIFT_HARD".to_string(),
            ));
        }
        let ledger = LedgerConfig {
            opening_quote: parse_or(&env_map, "OPENING_QUOTE", Decimal::zero(), "must be a decimal")?,
            opening_base: parse_or(&env_map, "OPENING_BASE", Decimal::zero(), "must be a decimal")?,
            max_retained_entries: parse_or(
                &env_map,
                "MAX_RETAINED_ENTRIES",
                ledger_defaults.max_retained_entries,
                "must be a valid usize",
            )?,
            thresholds,
            reconcile_interval_sec: parse_or(
                &env_map,
                "RECONCILE_INTERVAL_SEC",
                ledger_defaults.reconcile_interval_sec,
                "must be a valid u64",
            )?,
        };

        let invariant_checks = parse_invariant_checks(
            env_map
                .get("INVARIANT_CHECKS")
                .map(|s| s.as_str())
                .unwrap_or("always"),
        )?;

        Ok(Config {
            database_path,
            events_path,
            slot_count,
            start_price,
            engine,
            ledger,
            invariant_checks,
        })
    }
}

fn parse_or<T: FromStr>(
    env_map: &HashMap<String, String>,
    key: &str,
    default: T,
    expectation: &str,
) -> Result<T, ConfigError> {
    match env_map.get(key) {
        None => Ok(default),
        Some(raw) => raw
            .trim()
            .parse::<T>()
            .map_err(|_| ConfigError::InvalidValue(key.to_string(), expectation.to_string())),
    }
}

fn parse_positive(
    env_map: &HashMap<String, String>,
    key: &str,
    raw: &str,
) -> Result<Decimal, ConfigError> {
    let value: Decimal = parse_or(env_map, key, Decimal::zero(), "must be a decimal")?;
    if !value.is_positive() {
        return Err(ConfigError::InvalidValue(
            key.to_string(),
            format!("must be positive, got {}", raw),
        ));
    }
    Ok(value)
}

fn parse_bool(
    env_map: &HashMap<String, String>,
    key: &str,
    default: bool,
) -> Result<bool, ConfigError> {
    match env_map.get(key).map(|s| s.trim().to_ascii_lowercase()) {
        None => Ok(default),
        Some(v) => match v.as_str() {
            "1" | "true" | "yes" | "on" => Ok(true),
            "0" | "false" | "no" | "off" => Ok(false),
            other => Err(ConfigError::InvalidValue(
                key.to_string(),
                format!("must be true or false, got {}", other),
            )),
        },
    }
}

fn parse_invariant_checks(raw: &str) -> Result<InvariantChecks, ConfigError> {
    let invalid = |detail: String| ConfigError::InvalidValue("INVARIANT_CHECKS".to_string(), detail);
    match raw.trim() {
        "always" => Ok(InvariantChecks::Always),
        "off" => Ok(InvariantChecks::Off),
        other => {
            let every = other
                .strip_prefix("sampled:")
                .ok_or_else(|| invalid(format!("must be always, off, or sampled:N, got {}", other)))?
                .parse::<u64>()
                .map_err(|_| invalid("sampled:N needs a positive integer".to_string()))?;
            if every == 0 {
                return Err(invalid("sampled:N needs a positive integer".to_string()));
            }
            Ok(InvariantChecks::Sampled(every))
        }
    }
}
