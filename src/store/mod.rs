//! Durable position ledger and cycle state.
//!
//! The ledger file is the single source of truth across restarts. Both files
//! are written atomically (temp file + rename) so a crash mid-write never
//! leaves a partial ledger visible. All position mutation goes through
//! `apply_fill`; no other component writes positions.

use crate::config::SleeveSettings;
use crate::error::{EngineError, Result};
use crate::models::{
    CloseReason, Fill, OrderIntent, OrderType, Position, PositionStatus, RotationCycleRecord, Side,
};
use crate::strategy::rotation::is_leveraged;
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use uuid::Uuid;

const LEDGER_FILE: &str = "positions.json";
const STATE_FILE: &str = "state.json";

/// Leveraged ETFs decay; they get a shorter hold ceiling by default
const LEVERAGED_MAX_HOLD_DAYS: u32 = 3;

/// Cross-cycle cursor state: last run timestamp plus the rotation decision
/// per sleeve, so rollover cadence survives restarts
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CycleState {
    pub last_run: Option<DateTime<Utc>>,
    #[serde(default)]
    pub rotation: HashMap<String, RotationCycleRecord>,
}

#[derive(Debug)]
pub struct PositionStore {
    dir: PathBuf,
}

impl PositionStore {
    /// Open the store under `dir`.
    ///
    /// A fresh directory (no ledger, no cycle state) bootstraps an empty
    /// ledger. A missing ledger next to existing cycle state means prior
    /// state was lost, and the engine must refuse to trade from an
    /// assumed-empty ledger.
    pub fn open(dir: &Path) -> Result<Self> {
        fs::create_dir_all(dir)?;
        let store = Self {
            dir: dir.to_path_buf(),
        };

        let ledger = store.ledger_path();
        if !ledger.exists() {
            if store.state_path().exists() {
                return Err(EngineError::CorruptState {
                    path: ledger.display().to_string(),
                    reason: "ledger missing but cycle state exists".to_string(),
                });
            }
            store.save(&[])?;
            tracing::info!("Bootstrapped empty ledger at {}", ledger.display());
        }
        Ok(store)
    }

    fn ledger_path(&self) -> PathBuf {
        self.dir.join(LEDGER_FILE)
    }

    fn state_path(&self) -> PathBuf {
        self.dir.join(STATE_FILE)
    }

    pub fn load(&self) -> Result<Vec<Position>> {
        let path = self.ledger_path();
        let bytes = fs::read(&path).map_err(|e| EngineError::CorruptState {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;
        serde_json::from_slice(&bytes).map_err(|e| EngineError::CorruptState {
            path: path.display().to_string(),
            reason: e.to_string(),
        })
    }

    pub fn save(&self, positions: &[Position]) -> Result<()> {
        write_atomic(&self.ledger_path(), &serde_json::to_vec_pretty(positions)?)
    }

    pub fn load_state(&self) -> Result<CycleState> {
        let path = self.state_path();
        if !path.exists() {
            return Ok(CycleState::default());
        }
        let bytes = fs::read(&path)?;
        serde_json::from_slice(&bytes).map_err(|e| EngineError::CorruptState {
            path: path.display().to_string(),
            reason: e.to_string(),
        })
    }

    pub fn save_state(&self, state: &CycleState) -> Result<()> {
        write_atomic(&self.state_path(), &serde_json::to_vec_pretty(state)?)
    }

    /// Record a confirmed fill against the in-memory ledger.
    ///
    /// A filled buy creates a position; a filled sell closes (or, on a
    /// partial fill, shrinks) the position the intent targeted. The caller
    /// saves the ledger afterwards.
    pub fn apply_fill(
        &self,
        positions: &mut Vec<Position>,
        intent: &OrderIntent,
        fill: &Fill,
        trading_day: NaiveDate,
        sleeve: &SleeveSettings,
    ) -> Result<()> {
        match intent.side {
            Side::Buy => {
                let max_hold_days = if is_leveraged(&fill.symbol) {
                    LEVERAGED_MAX_HOLD_DAYS
                } else {
                    sleeve.max_hold_days
                };
                positions.push(Position {
                    id: Uuid::new_v4(),
                    symbol: fill.symbol.clone(),
                    sleeve_id: intent.sleeve_id.clone(),
                    quantity: fill.quantity,
                    entry_price: fill.price,
                    entry_time: fill.time,
                    entry_trading_day: trading_day,
                    stop_pct: sleeve.stop_pct,
                    target_pct: sleeve.target_pct,
                    max_hold_days,
                    order_type_used: OrderType::Limit,
                    status: PositionStatus::Open,
                    manual_close_requested: false,
                    close_reason: None,
                    close_price: None,
                    close_time: None,
                });
                Ok(())
            }
            Side::Sell => {
                let position = positions
                    .iter_mut()
                    .find(|p| {
                        p.is_open()
                            && match intent.position_id {
                                Some(id) => p.id == id,
                                None => p.symbol == fill.symbol && p.sleeve_id == intent.sleeve_id,
                            }
                    })
                    .ok_or_else(|| EngineError::Broker(format!(
                        "sell fill for {} has no open position",
                        fill.symbol
                    )))?;

                if fill.quantity < position.quantity {
                    // Partial fill: the remainder stays open and is
                    // re-evaluated next cycle
                    position.quantity -= fill.quantity;
                    tracing::warn!(
                        "Partial sell fill for {}: {} of {} shares, remainder stays open",
                        fill.symbol,
                        fill.quantity,
                        fill.quantity + position.quantity
                    );
                } else {
                    position.status = PositionStatus::Closed;
                    position.close_reason =
                        Some(intent.reason.close_reason().unwrap_or(CloseReason::ManualClose));
                    position.close_price = Some(fill.price);
                    position.close_time = Some(fill.time);
                }
                Ok(())
            }
        }
    }
}

/// Write to a temp file in the same directory, then rename over the target.
/// A partial write is never visible.
fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    let tmp = path.with_extension("json.tmp");
    fs::write(&tmp, bytes)?;
    fs::rename(&tmp, path)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SleeveMode;
    use crate::models::IntentReason;
    use chrono::TimeZone;
    use tempfile::tempdir;

    fn sleeve() -> SleeveSettings {
        SleeveSettings {
            id: "swing".to_string(),
            mode: SleeveMode::ScanDriven,
            capital_cap: 10_000.0,
            max_positions: 3,
            position_dollar_cap: 5_000.0,
            stop_pct: -2.0,
            target_pct: 3.0,
            max_hold_days: 5,
            rotation_positions: 1,
            rotation_bear_enabled: false,
            rotation_leverage_enabled: false,
            rotation_cycle_days: 5,
            min_score: 85.0,
            scan_type: "swing".to_string(),
            size_tiers: Vec::new(),
        }
    }

    fn buy_intent(symbol: &str) -> OrderIntent {
        OrderIntent {
            symbol: symbol.to_string(),
            sleeve_id: "swing".to_string(),
            side: Side::Buy,
            quantity: 10,
            order_type: OrderType::Limit,
            limit_price: 100.0,
            extended_hours: false,
            reason: IntentReason::NewEntry,
            position_id: None,
        }
    }

    fn fill_for(intent: &OrderIntent, quantity: u32, price: f64) -> Fill {
        Fill {
            order_id: Uuid::new_v4(),
            symbol: intent.symbol.clone(),
            side: intent.side,
            quantity,
            price,
            time: Utc.with_ymd_and_hms(2024, 6, 4, 14, 0, 0).unwrap(),
        }
    }

    fn day() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 6, 4).unwrap()
    }

    #[test]
    fn test_bootstrap_creates_empty_ledger() {
        let dir = tempdir().unwrap();
        let store = PositionStore::open(dir.path()).unwrap();
        assert!(store.load().unwrap().is_empty());
    }

    #[test]
    fn test_save_load_round_trip() {
        let dir = tempdir().unwrap();
        let store = PositionStore::open(dir.path()).unwrap();

        let mut positions = Vec::new();
        let intent = buy_intent("AAPL");
        store
            .apply_fill(&mut positions, &intent, &fill_for(&intent, 10, 100.5), day(), &sleeve())
            .unwrap();
        store.save(&positions).unwrap();

        let loaded = store.load().unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].symbol, "AAPL");
        assert_eq!(loaded[0].quantity, 10);
        assert_eq!(loaded[0].entry_price, 100.5);
        assert_eq!(loaded[0].entry_trading_day, day());
    }

    #[test]
    fn test_corrupt_ledger_is_fatal() {
        let dir = tempdir().unwrap();
        let store = PositionStore::open(dir.path()).unwrap();
        fs::write(dir.path().join(LEDGER_FILE), b"{not json").unwrap();

        let err = store.load().unwrap_err();
        assert!(matches!(err, EngineError::CorruptState { .. }));
    }

    #[test]
    fn test_missing_ledger_with_state_is_fatal() {
        let dir = tempdir().unwrap();
        let store = PositionStore::open(dir.path()).unwrap();
        store.save_state(&CycleState::default()).unwrap();
        fs::remove_file(dir.path().join(LEDGER_FILE)).unwrap();

        let err = PositionStore::open(dir.path()).unwrap_err();
        assert!(matches!(err, EngineError::CorruptState { .. }));
    }

    #[test]
    fn test_buy_fill_stamps_sleeve_thresholds() {
        let dir = tempdir().unwrap();
        let store = PositionStore::open(dir.path()).unwrap();

        let mut positions = Vec::new();
        let intent = buy_intent("MSFT");
        store
            .apply_fill(&mut positions, &intent, &fill_for(&intent, 10, 99.0), day(), &sleeve())
            .unwrap();

        let p = &positions[0];
        assert_eq!(p.stop_pct, -2.0);
        assert_eq!(p.target_pct, 3.0);
        assert_eq!(p.max_hold_days, 5);
        assert!(p.is_open());
    }

    #[test]
    fn test_buy_fill_shortens_hold_for_leveraged_etf() {
        let dir = tempdir().unwrap();
        let store = PositionStore::open(dir.path()).unwrap();

        let mut positions = Vec::new();
        let intent = buy_intent("TECL");
        store
            .apply_fill(&mut positions, &intent, &fill_for(&intent, 10, 50.0), day(), &sleeve())
            .unwrap();

        assert_eq!(positions[0].max_hold_days, LEVERAGED_MAX_HOLD_DAYS);
    }

    #[test]
    fn test_sell_fill_closes_position() {
        let dir = tempdir().unwrap();
        let store = PositionStore::open(dir.path()).unwrap();

        let mut positions = Vec::new();
        let buy = buy_intent("AAPL");
        store
            .apply_fill(&mut positions, &buy, &fill_for(&buy, 10, 100.0), day(), &sleeve())
            .unwrap();

        let sell = OrderIntent {
            side: Side::Sell,
            reason: IntentReason::TargetHit,
            position_id: Some(positions[0].id),
            ..buy
        };
        store
            .apply_fill(&mut positions, &sell, &fill_for(&sell, 10, 103.2), day(), &sleeve())
            .unwrap();

        let p = &positions[0];
        assert_eq!(p.status, PositionStatus::Closed);
        assert_eq!(p.close_reason, Some(CloseReason::TargetHit));
        assert_eq!(p.close_price, Some(103.2));
    }

    #[test]
    fn test_partial_sell_fill_keeps_remainder_open() {
        let dir = tempdir().unwrap();
        let store = PositionStore::open(dir.path()).unwrap();

        let mut positions = Vec::new();
        let buy = buy_intent("AAPL");
        store
            .apply_fill(&mut positions, &buy, &fill_for(&buy, 10, 100.0), day(), &sleeve())
            .unwrap();

        let sell = OrderIntent {
            side: Side::Sell,
            reason: IntentReason::StopHit,
            position_id: Some(positions[0].id),
            ..buy
        };
        store
            .apply_fill(&mut positions, &sell, &fill_for(&sell, 4, 97.8), day(), &sleeve())
            .unwrap();

        let p = &positions[0];
        assert!(p.is_open());
        assert_eq!(p.quantity, 6);
    }

    #[test]
    fn test_sell_without_position_is_an_error() {
        let dir = tempdir().unwrap();
        let store = PositionStore::open(dir.path()).unwrap();

        let mut positions = Vec::new();
        let sell = OrderIntent {
            side: Side::Sell,
            reason: IntentReason::StopHit,
            ..buy_intent("NVDA")
        };
        let result =
            store.apply_fill(&mut positions, &sell, &fill_for(&sell, 10, 90.0), day(), &sleeve());
        assert!(result.is_err());
    }

    #[test]
    fn test_cycle_state_round_trip() {
        let dir = tempdir().unwrap();
        let store = PositionStore::open(dir.path()).unwrap();

        let mut state = CycleState::default();
        state.last_run = Some(Utc.with_ymd_and_hms(2024, 6, 4, 14, 0, 0).unwrap());
        store.save_state(&state).unwrap();

        let loaded = store.load_state().unwrap();
        assert_eq!(loaded.last_run, state.last_run);
    }
}
