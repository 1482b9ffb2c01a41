//! Scan-driven selector: turn the newest ranked-candidate report into new
//! entry targets, sized by score tier and bounded by sleeve capital.

use crate::config::SleeveSettings;
use crate::models::{AllocationLeg, Candidate, Position, TargetAllocation};
use std::cmp::Ordering;
use std::collections::HashSet;

/// Dollar size for a candidate score. Tiers are checked highest first; with
/// no tiers configured every pick gets the per-position cap.
fn tier_dollars(score: f64, sleeve: &SleeveSettings) -> f64 {
    let mut tiers: Vec<_> = sleeve.size_tiers.iter().collect();
    tiers.sort_by(|a, b| {
        b.min_score
            .partial_cmp(&a.min_score)
            .unwrap_or(Ordering::Equal)
    });
    for tier in tiers {
        if score >= tier.min_score {
            return tier.dollars.min(sleeve.position_dollar_cap);
        }
    }
    sleeve.position_dollar_cap
}

/// Select new entries for a scan-driven sleeve.
///
/// Candidates below `min_score`, already held in this sleeve, or traded out
/// of today (same-day round trip) are excluded. The rest are taken in score
/// order until capital or the position slot count runs out. Existing
/// holdings are untouched; they exit only through the position state
/// machine.
pub fn select(
    sleeve: &SleeveSettings,
    candidates: &[Candidate],
    open_positions: &[&Position],
    closed_today: &HashSet<String>,
    open_value: f64,
) -> TargetAllocation {
    let held: HashSet<&str> = open_positions.iter().map(|p| p.symbol.as_str()).collect();

    let mut eligible: Vec<&Candidate> = candidates
        .iter()
        .filter(|c| c.score >= sleeve.min_score)
        .filter(|c| !held.contains(c.symbol.as_str()))
        .filter(|c| !closed_today.contains(&c.symbol))
        .collect();
    eligible.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(Ordering::Equal)
            .then_with(|| a.symbol.cmp(&b.symbol))
    });

    let mut available = (sleeve.capital_cap - open_value).max(0.0);
    let mut slots = (sleeve.max_positions as usize).saturating_sub(open_positions.len());
    let mut legs = Vec::new();

    for candidate in eligible {
        if slots == 0 || available <= 0.0 {
            break;
        }
        let dollars = tier_dollars(candidate.score, sleeve).min(available);
        if dollars <= 0.0 {
            break;
        }
        legs.push(AllocationLeg {
            symbol: candidate.symbol.clone(),
            dollars,
        });
        available -= dollars;
        slots -= 1;
    }

    TargetAllocation { legs }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{SizeTier, SleeveMode};
    use crate::models::{OrderType, PositionStatus};
    use chrono::{NaiveDate, TimeZone, Utc};
    use uuid::Uuid;

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

    fn candidate(symbol: &str, score: f64) -> Candidate {
        Candidate {
            symbol: symbol.to_string(),
            score,
            scan_type: "swing".to_string(),
            report_time: Utc.with_ymd_and_hms(2024, 6, 4, 13, 0, 0).unwrap(),
        }
    }

    fn open_position(symbol: &str) -> Position {
        Position {
            id: Uuid::new_v4(),
            symbol: symbol.to_string(),
            sleeve_id: "swing".to_string(),
            quantity: 10,
            entry_price: 100.0,
            entry_time: Utc.with_ymd_and_hms(2024, 6, 3, 14, 0, 0).unwrap(),
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
    fn test_two_passing_candidates_fill_the_sleeve() {
        // $10k cap, $5k per position: scores 92 and 88 both pass
        // min_score 85 and together exhaust the sleeve
        let candidates = vec![candidate("AAPL", 92.0), candidate("MSFT", 88.0)];
        let allocation = select(&sleeve(), &candidates, &[], &HashSet::new(), 0.0);

        assert_eq!(allocation.legs.len(), 2);
        assert_eq!(allocation.legs[0].symbol, "AAPL");
        assert_eq!(allocation.legs[0].dollars, 5_000.0);
        assert_eq!(allocation.legs[1].dollars, 5_000.0);
    }

    #[test]
    fn test_fully_allocated_sleeve_rejects_better_scorer() {
        // Next cycle: both picks are held, a 90 arrives, no capital left
        let held = [open_position("AAPL"), open_position("MSFT")];
        let held_refs: Vec<&Position> = held.iter().collect();
        let candidates = vec![candidate("NVDA", 90.0)];
        let allocation = select(&sleeve(), &candidates, &held_refs, &HashSet::new(), 10_000.0);
        assert!(allocation.legs.is_empty());
    }

    #[test]
    fn test_below_min_score_excluded() {
        let candidates = vec![candidate("AAPL", 84.9)];
        let allocation = select(&sleeve(), &candidates, &[], &HashSet::new(), 0.0);
        assert!(allocation.legs.is_empty());
    }

    #[test]
    fn test_held_symbol_excluded() {
        let held = [open_position("AAPL")];
        let held_refs: Vec<&Position> = held.iter().collect();
        let candidates = vec![candidate("AAPL", 95.0), candidate("MSFT", 90.0)];
        let allocation = select(&sleeve(), &candidates, &held_refs, &HashSet::new(), 1_000.0);
        assert_eq!(allocation.legs.len(), 1);
        assert_eq!(allocation.legs[0].symbol, "MSFT");
    }

    #[test]
    fn test_same_day_round_trip_symbol_excluded() {
        let mut closed_today = HashSet::new();
        closed_today.insert("AAPL".to_string());
        let candidates = vec![candidate("AAPL", 95.0)];
        let allocation = select(&sleeve(), &candidates, &[], &closed_today, 0.0);
        assert!(allocation.legs.is_empty());
    }

    #[test]
    fn test_max_positions_limits_selection() {
        let mut s = sleeve();
        s.max_positions = 1;
        let candidates = vec![candidate("AAPL", 92.0), candidate("MSFT", 88.0)];
        let allocation = select(&s, &candidates, &[], &HashSet::new(), 0.0);
        assert_eq!(allocation.legs.len(), 1);
    }

    #[test]
    fn test_score_tiers_size_positions() {
        let mut s = sleeve();
        s.size_tiers = vec![
            SizeTier {
                min_score: 90.0,
                dollars: 4_000.0,
            },
            SizeTier {
                min_score: 85.0,
                dollars: 2_000.0,
            },
        ];
        let candidates = vec![candidate("AAPL", 92.0), candidate("MSFT", 86.0)];
        let allocation = select(&s, &candidates, &[], &HashSet::new(), 0.0);
        assert_eq!(allocation.legs[0].dollars, 4_000.0);
        assert_eq!(allocation.legs[1].dollars, 2_000.0);
    }

    #[test]
    fn test_last_pick_clamped_to_remaining_capital() {
        let candidates = vec![
            candidate("AAPL", 92.0),
            candidate("MSFT", 90.0),
            candidate("NVDA", 88.0),
        ];
        let allocation = select(&sleeve(), &candidates, &[], &HashSet::new(), 2_000.0);
        // 8000 available: 5000 + 3000, then nothing for the third
        assert_eq!(allocation.legs.len(), 2);
        assert_eq!(allocation.legs[0].dollars, 5_000.0);
        assert_eq!(allocation.legs[1].dollars, 3_000.0);
    }
}
