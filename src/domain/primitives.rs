//! Domain primitives: identifiers, time, sides, roles and trade legs.

use serde::{Deserialize, Serialize};

/// Time in milliseconds since Unix epoch.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct TimeMs(pub i64);

impl TimeMs {
    /// Create a TimeMs from milliseconds.
    pub fn new(ms: i64) -> Self {
        TimeMs(ms)
    }

    /// Create a TimeMs from whole seconds.
    pub fn from_secs(secs: i64) -> Self {
        TimeMs(secs.saturating_mul(1000))
    }

    /// Current wall-clock time.
    pub fn now() -> Self {
        TimeMs(chrono::Utc::now().timestamp_millis())
    }

    /// Get the underlying milliseconds value.
    pub fn as_ms(&self) -> i64 {
        self.0
    }

    /// Milliseconds elapsed from `earlier` to `self` (zero if `earlier` is later).
    pub fn elapsed_since(&self, earlier: TimeMs) -> i64 {
        self.0.saturating_sub(earlier.0).max(0)
    }

    /// True when at least `secs` seconds separate `earlier` from `self`.
    pub fn reached(&self, earlier: TimeMs, secs: u64) -> bool {
        let threshold = i64::try_from(secs).unwrap_or(i64::MAX).saturating_mul(1000);
        self.elapsed_since(earlier) >= threshold
    }

    /// `self` shifted forward by `secs` seconds.
    pub fn plus_secs(&self, secs: u64) -> TimeMs {
        let delta = i64::try_from(secs).unwrap_or(i64::MAX).saturating_mul(1000);
        TimeMs(self.0.saturating_add(delta))
    }
}

impl std::fmt::Display for TimeMs {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}ms", self.0)
    }
}

/// Identity of one independent unit of grid capital.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct SlotId(pub u32);

impl std::fmt::Display for SlotId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "slot-{}", self.0)
    }
}

/// Process-local order identity, stable across restarts via the snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LocalOrderId(pub u64);

impl std::fmt::Display for LocalOrderId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Identity of a written-off exit kept on the book.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RecoveryId(pub u64);

impl std::fmt::Display for RecoveryId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "r{}", self.0)
    }
}

/// Order side: Buy or Sell.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    Buy,
    Sell,
}

impl Side {
    pub fn opposite(&self) -> Side {
        match self {
            Side::Buy => Side::Sell,
            Side::Sell => Side::Buy,
        }
    }
}

impl std::fmt::Display for Side {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Side::Buy => "buy",
            Side::Sell => "sell",
        })
    }
}

/// Whether an order opens or closes a round trip.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Entry,
    Exit,
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Role::Entry => write!(f, "entry"),
            Role::Exit => write!(f, "exit"),
        }
    }
}

/// One of the two directional round trips inside a slot.
///
/// Trade A sells first and buys back; trade B buys first and sells back.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum TradeId {
    A,
    B,
}

impl TradeId {
    pub const ALL: [TradeId; 2] = [TradeId::A, TradeId::B];

    pub fn entry_side(&self) -> Side {
        match self {
            TradeId::A => Side::Sell,
            TradeId::B => Side::Buy,
        }
    }

    pub fn exit_side(&self) -> Side {
        self.entry_side().opposite()
    }

    /// Expected side for an order of this trade in the given role.
    pub fn side_for(&self, role: Role) -> Side {
        match role {
            Role::Entry => self.entry_side(),
            Role::Exit => self.exit_side(),
        }
    }

    pub fn other(&self) -> TradeId {
        match self {
            TradeId::A => TradeId::B,
            TradeId::B => TradeId::A,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TradeId::A => "A",
            TradeId::B => "B",
        }
    }
}

impl std::fmt::Display for TradeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Exchange-facing lifecycle of an order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderStatus {
    /// Placement requested, no exchange acknowledgement yet.
    Pending,
    Open,
    Filled,
    Cancelled,
}

impl OrderStatus {
    pub fn is_live(&self) -> bool {
        matches!(self, OrderStatus::Pending | OrderStatus::Open)
    }
}

/// Why a slot is running one-sided.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModeSource {
    #[default]
    None,
    /// Degraded because the account could not fund one side.
    BalanceDriven,
    /// Requested by the governor/policy layer.
    PolicyDriven,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_trade_sides() {
        assert_eq!(TradeId::A.entry_side(), Side::Sell);
        assert_eq!(TradeId::A.exit_side(), Side::Buy);
        assert_eq!(TradeId::B.entry_side(), Side::Buy);
        assert_eq!(TradeId::B.exit_side(), Side::Sell);
        assert_eq!(TradeId::B.side_for(Role::Exit), Side::Sell);
    }

    #[test]
    fn test_side_serialization() {
        let json = serde_json::to_string(&Side::Buy).unwrap();
        assert_eq!(json, "\"buy\"");
        let json = serde_json::to_string(&ModeSource::BalanceDriven).unwrap();
        assert_eq!(json, "\"balance_driven\"");
    }

    #[test]
    fn test_time_reached() {
        let placed = TimeMs::from_secs(1_000);
        assert!(!TimeMs::from_secs(2_349).reached(placed, 1350));
        assert!(TimeMs::from_secs(2_350).reached(placed, 1350));
        assert!(TimeMs::from_secs(2_400).reached(placed, 1350));
    }

    #[test]
    fn test_elapsed_never_negative() {
        assert_eq!(TimeMs::new(5).elapsed_since(TimeMs::new(10)), 0);
    }

    #[test]
    fn test_order_status_live() {
        assert!(OrderStatus::Pending.is_live());
        assert!(OrderStatus::Open.is_live());
        assert!(!OrderStatus::Filled.is_live());
        assert!(!OrderStatus::Cancelled.is_live());
    }
}
