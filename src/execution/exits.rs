//! Position state machine: OPEN -> {STOP_HIT, TARGET_HIT, MAX_HOLD_EXPIRED,
//! MANUAL_CLOSE} -> CLOSED.
//!
//! Evaluation only signals the transition; the position becomes CLOSED once
//! the execution engine confirms a sell fill, never on intent creation.

use crate::models::{CloseReason, Position};
use crate::scheduler::trading_day_age;
use chrono::NaiveDate;

/// Evaluate one open position against the current price.
///
/// Check order: manual request, stop, target, then the max-hold ceiling. The
/// ceiling applies regardless of price; a flat position still exits once it
/// has been held `max_hold_days` trading days.
pub fn evaluate(position: &Position, price: f64, today: NaiveDate) -> Option<CloseReason> {
    if !position.is_open() {
        return None;
    }
    if position.manual_close_requested {
        return Some(CloseReason::ManualClose);
    }

    let stop = position.entry_price * (1.0 + position.stop_pct / 100.0);
    if price <= stop {
        return Some(CloseReason::StopHit);
    }

    let target = position.entry_price * (1.0 + position.target_pct / 100.0);
    if price >= target {
        return Some(CloseReason::TargetHit);
    }

    if trading_day_age(position.entry_trading_day, today) >= position.max_hold_days {
        return Some(CloseReason::MaxHoldExpired);
    }

    None
}
