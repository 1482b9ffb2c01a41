use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Order side
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum Side {
    Buy,
    Sell,
}

/// Order type. Policy is LIMIT-only (market orders are unsafe or
/// non-executing outside regular hours); `Market` exists so the wire type is
/// honest, but the planner never emits it.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum OrderType {
    Limit,
    Market,
}

/// Why an intent was generated
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum IntentReason {
    StopHit,
    TargetHit,
    MaxHoldExpired,
    RotationRebalance,
    NewEntry,
    Manual,
}

/// Why a position was closed
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum CloseReason {
    StopHit,
    TargetHit,
    MaxHoldExpired,
    ManualClose,
    Rebalanced,
}

impl From<CloseReason> for IntentReason {
    fn from(reason: CloseReason) -> Self {
        match reason {
            CloseReason::StopHit => IntentReason::StopHit,
            CloseReason::TargetHit => IntentReason::TargetHit,
            CloseReason::MaxHoldExpired => IntentReason::MaxHoldExpired,
            CloseReason::ManualClose => IntentReason::Manual,
            CloseReason::Rebalanced => IntentReason::RotationRebalance,
        }
    }
}

impl IntentReason {
    /// Close reason recorded when a sell with this reason fills. Buy reasons
    /// have none.
    pub fn close_reason(self) -> Option<CloseReason> {
        match self {
            IntentReason::StopHit => Some(CloseReason::StopHit),
            IntentReason::TargetHit => Some(CloseReason::TargetHit),
            IntentReason::MaxHoldExpired => Some(CloseReason::MaxHoldExpired),
            IntentReason::Manual => Some(CloseReason::ManualClose),
            IntentReason::RotationRebalance => Some(CloseReason::Rebalanced),
            IntentReason::NewEntry => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum PositionStatus {
    Open,
    Closed,
}

/// One open or closed holding in the ledger
///
/// Created only by the execution engine on a filled buy, mutated only through
/// `PositionStore::apply_fill`. `entry_trading_day` is immutable once set; a
/// sell dated on it is always rejected by the risk gate.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Position {
    pub id: Uuid,
    pub symbol: String,
    pub sleeve_id: String,
    /// Whole shares only; fractional shares are never ordered
    pub quantity: u32,
    pub entry_price: f64,
    pub entry_time: DateTime<Utc>,
    pub entry_trading_day: NaiveDate,
    /// Negative percentage, e.g. -2.0 for a 2% stop
    pub stop_pct: f64,
    pub target_pct: f64,
    pub max_hold_days: u32,
    pub order_type_used: OrderType,
    pub status: PositionStatus,
    /// Set by the `close` subcommand; picked up on the next cycle
    #[serde(default)]
    pub manual_close_requested: bool,
    pub close_reason: Option<CloseReason>,
    pub close_price: Option<f64>,
    pub close_time: Option<DateTime<Utc>>,
}

impl Position {
    pub fn is_open(&self) -> bool {
        self.status == PositionStatus::Open
    }

    pub fn market_value(&self, price: f64) -> f64 {
        price * self.quantity as f64
    }

    pub fn unrealized_pnl(&self, price: f64) -> f64 {
        (price - self.entry_price) * self.quantity as f64
    }
}

/// Ephemeral order intent, produced each cycle and consumed by the risk gate
/// and execution engine. Never persisted beyond one cycle.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderIntent {
    pub symbol: String,
    pub sleeve_id: String,
    pub side: Side,
    pub quantity: u32,
    pub order_type: OrderType,
    pub limit_price: f64,
    pub extended_hours: bool,
    pub reason: IntentReason,
    /// For sells: the position this intent closes
    pub position_id: Option<Uuid>,
}

impl OrderIntent {
    pub fn notional(&self) -> f64 {
        self.limit_price * self.quantity as f64
    }
}

/// Ranked candidate from the scan source. Read-only input; the engine never
/// mutates the scan report.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Candidate {
    pub symbol: String,
    pub score: f64,
    pub scan_type: String,
    pub report_time: DateTime<Utc>,
}

/// Best known market for a symbol
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Quote {
    pub bid: f64,
    pub ask: f64,
    pub last: f64,
}

/// Confirmed execution from the broker
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Fill {
    pub order_id: Uuid,
    pub symbol: String,
    pub side: Side,
    pub quantity: u32,
    pub price: f64,
    pub time: DateTime<Utc>,
}

/// One past rotation decision, persisted so the rollover cadence survives
/// restarts
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RotationCycleRecord {
    pub cycle_start: NaiveDate,
    /// Ranked sector proxies with trailing returns, best first
    pub ranked: Vec<RankedSector>,
    /// Chosen symbols (after bull/bear substitution) with target dollars
    pub chosen: Vec<AllocationLeg>,
    pub bear_substituted: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RankedSector {
    pub symbol: String,
    pub trailing_return: f64,
}

/// One leg of a target allocation: a symbol and the dollars it should hold
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AllocationLeg {
    pub symbol: String,
    pub dollars: f64,
}

/// Per-sleeve target allocation for one cycle
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TargetAllocation {
    pub legs: Vec<AllocationLeg>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn sample_position() -> Position {
        Position {
            id: Uuid::new_v4(),
            symbol: "XLK".to_string(),
            sleeve_id: "rotation".to_string(),
            quantity: 10,
            entry_price: 100.0,
            entry_time: Utc.with_ymd_and_hms(2024, 6, 3, 14, 35, 0).unwrap(),
            entry_trading_day: NaiveDate::from_ymd_opt(2024, 6, 3).unwrap(),
            stop_pct: -2.0,
            target_pct: 3.0,
            max_hold_days: 5,
            order_type_used: OrderType::Limit,
            status: PositionStatus::Open,
            manual_close_requested: false,
            close_reason: None,
            close_price: None,
            close_time: None,
        }
    }

    #[test]
    fn test_position_market_value_and_pnl() {
        let position = sample_position();
        assert_eq!(position.market_value(103.0), 1030.0);
        assert_eq!(position.unrealized_pnl(103.0), 30.0);
        assert_eq!(position.unrealized_pnl(97.0), -30.0);
    }

    #[test]
    fn test_intent_notional() {
        let intent = OrderIntent {
            symbol: "XLK".to_string(),
            sleeve_id: "rotation".to_string(),
            side: Side::Buy,
            quantity: 7,
            order_type: OrderType::Limit,
            limit_price: 50.0,
            extended_hours: false,
            reason: IntentReason::NewEntry,
            position_id: None,
        };
        assert_eq!(intent.notional(), 350.0);
    }

    #[test]
    fn test_close_reason_maps_to_intent_reason() {
        assert_eq!(IntentReason::from(CloseReason::StopHit), IntentReason::StopHit);
        assert_eq!(IntentReason::from(CloseReason::ManualClose), IntentReason::Manual);
    }

    #[test]
    fn test_position_round_trips_through_json() {
        let position = sample_position();
        let json = serde_json::to_string(&position).unwrap();
        let back: Position = serde_json::from_str(&json).unwrap();
        assert_eq!(back.symbol, "XLK");
        assert_eq!(back.entry_trading_day, position.entry_trading_day);
        assert_eq!(back.status, PositionStatus::Open);
    }
}
