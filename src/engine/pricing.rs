//! Price and volume arithmetic for entries and exits.

use crate::domain::{Decimal, TradeId};

use super::EngineConfig;

/// Entry price for `trade_id` around `market`, widened by `multiplier`.
///
/// Trade A sells above market, trade B buys below it. `None` when the price
/// overflows.
pub fn entry_price(
    market: Decimal,
    trade_id: TradeId,
    config: &EngineConfig,
    multiplier: Decimal,
) -> Option<Decimal> {
    let offset = config.entry_pct(trade_id).checked_mul(multiplier)?.pct_fraction();
    let factor = match trade_id {
        TradeId::A => Decimal::one().checked_add(offset)?,
        TradeId::B => Decimal::one().checked_sub(offset)?,
    };
    Some(market.checked_mul(factor)?.round_dp(config.price_decimals))
}

/// Exit price closing an entry filled at `entry_fill`.
///
/// The profit target is never placed inside the current entry band: an A exit
/// (buy) is at most `market * (1 - entry_pct_b%)`, a B exit (sell) at least
/// `market * (1 + entry_pct_a%)`. The band is skipped when no reference price
/// is known. `None` when the price overflows.
pub fn exit_price(
    entry_fill: Decimal,
    market: Decimal,
    trade_id: TradeId,
    config: &EngineConfig,
) -> Option<Decimal> {
    let profit = config.profit_pct.pct_fraction();
    let raw = match trade_id {
        TradeId::A => {
            let target = entry_fill.checked_mul(Decimal::one() - profit)?;
            if market.is_positive() {
                let band = market.checked_mul(Decimal::one() - config.entry_pct_b.pct_fraction())?;
                target.min(band)
            } else {
                target
            }
        }
        TradeId::B => {
            let target = entry_fill.checked_mul(Decimal::one() + profit)?;
            if market.is_positive() {
                let band = market.checked_mul(Decimal::one() + config.entry_pct_a.pct_fraction())?;
                target.max(band)
            } else {
                target
            }
        }
    };
    Some(raw.round_dp(config.price_decimals))
}

/// Order volume for `config.order_size` of quote at `price`.
///
/// Returns None when the rounded volume falls under `min_volume` or its cost
/// under `min_cost`. Callers skip the placement; this is not an error.
pub fn order_volume(price: Decimal, config: &EngineConfig) -> Option<Decimal> {
    if !price.is_positive() || !config.order_size.is_positive() {
        return None;
    }
    let volume = config
        .order_size
        .checked_div(price)?
        .round_dp(config.volume_decimals);
    if !volume.is_positive() || volume < config.min_volume {
        return None;
    }
    if config.min_cost.is_positive() && volume.checked_mul(price)? < config.min_cost {
        return None;
    }
    Some(volume)
}

/// Entry-distance multiplier after `losses` consecutive losing cycles.
pub fn backoff_multiplier(losses: u32, config: &EngineConfig) -> Decimal {
    if config.loss_backoff_start == 0 || losses < config.loss_backoff_start {
        return Decimal::one();
    }
    let steps = Decimal::from_i64(i64::from(losses - config.loss_backoff_start + 1));
    let widened = Decimal::one() + config.backoff_factor * steps;
    if config.backoff_max_multiplier.is_positive() {
        widened.min(config.backoff_max_multiplier)
    } else {
        widened
    }
}
