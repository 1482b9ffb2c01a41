//! Sector-rotation selector: rank sector proxies by trailing return, take the
//! top K with fixed weights, and substitute leveraged bull or inverse bear
//! proxies where the sleeve allows.

use crate::config::SleeveSettings;
use crate::models::{AllocationLeg, RankedSector, RotationCycleRecord, TargetAllocation};
use crate::scheduler::trading_day_age;
use chrono::NaiveDate;
use std::cmp::Ordering;
use std::collections::HashSet;

/// Trailing-return lookback for ranking, in trading days
pub const TRAILING_RETURN_DAYS: u32 = 5;

/// Sector proxy universe: (sector ETF, 3x bull, inverse bear). Not every
/// sector has a liquid leveraged pair.
const SECTOR_PROXIES: &[(&str, Option<&str>, Option<&str>)] = &[
    ("XLB", None, None),
    ("XLE", Some("ERX"), Some("ERY")),
    ("XLF", Some("FAS"), Some("FAZ")),
    ("XLI", Some("DUSL"), None),
    ("XLK", Some("TECL"), Some("TECS")),
    ("XLP", None, None),
    ("XLRE", Some("DRN"), Some("DRV")),
    ("XLU", Some("UTSL"), None),
    ("XLV", Some("CURE"), None),
    ("XLY", Some("WANT"), None),
];

/// Top-K capital weights. K is the sleeve's configured position count.
fn weights(k: usize) -> &'static [f64] {
    match k {
        1 => &[1.0],
        2 => &[0.60, 0.40],
        _ => &[0.40, 0.35, 0.25],
    }
}

/// Symbols the selector needs trailing returns for
pub fn proxy_symbols() -> Vec<&'static str> {
    SECTOR_PROXIES.iter().map(|(s, _, _)| *s).collect()
}

/// Every instrument the rotation strategy can hold (plain, bull, and bear).
/// The planner uses this to know which holdings are rotation legs.
pub fn instrument_universe() -> HashSet<&'static str> {
    let mut set = HashSet::new();
    for (sector, bull, bear) in SECTOR_PROXIES {
        set.insert(*sector);
        if let Some(b) = bull {
            set.insert(*b);
        }
        if let Some(b) = bear {
            set.insert(*b);
        }
    }
    set
}

/// True for the leveraged bull/bear proxies; these carry the shorter
/// max-hold default
pub fn is_leveraged(symbol: &str) -> bool {
    SECTOR_PROXIES.iter().any(|(_, bull, bear)| {
        bull.map_or(false, |b| b == symbol) || bear.map_or(false, |b| b == symbol)
    })
}

fn mapped_instrument(sector: &str, trailing_return: f64, sleeve: &SleeveSettings) -> (String, bool) {
    let entry = SECTOR_PROXIES.iter().find(|(s, _, _)| *s == sector);
    let (bull, bear) = match entry {
        Some((_, bull, bear)) => (*bull, *bear),
        None => (None, None),
    };

    if trailing_return < 0.0 && sleeve.rotation_bear_enabled {
        if let Some(b) = bear {
            return (b.to_string(), true);
        }
    }
    if sleeve.rotation_leverage_enabled {
        if let Some(b) = bull {
            return (b.to_string(), false);
        }
    }
    (sector.to_string(), false)
}

pub struct RotationDecision {
    pub allocation: TargetAllocation,
    /// Updated record to persist; `None` when the previous cycle is still live
    pub record: Option<RotationCycleRecord>,
}

/// Compute the rotation allocation for `today`.
///
/// Between rollovers (default every 5 trading days) the previous allocation
/// is returned unchanged, so the planner only rebalances on cycle boundaries
/// or stop triggers.
pub fn select(
    sleeve: &SleeveSettings,
    returns: &[(String, f64)],
    today: NaiveDate,
    previous: Option<&RotationCycleRecord>,
) -> RotationDecision {
    if let Some(prev) = previous {
        if trading_day_age(prev.cycle_start, today) < sleeve.rotation_cycle_days {
            return RotationDecision {
                allocation: TargetAllocation {
                    legs: prev.chosen.clone(),
                },
                record: None,
            };
        }
    }

    let mut ranked: Vec<RankedSector> = returns
        .iter()
        .map(|(symbol, r)| RankedSector {
            symbol: symbol.clone(),
            trailing_return: *r,
        })
        .collect();
    // Descending by return; equal returns order alphabetically so the pick
    // is deterministic
    ranked.sort_by(|a, b| {
        b.trailing_return
            .partial_cmp(&a.trailing_return)
            .unwrap_or(Ordering::Equal)
            .then_with(|| a.symbol.cmp(&b.symbol))
    });

    let k = (sleeve.rotation_positions as usize).min(ranked.len());
    let weight_table = weights(sleeve.rotation_positions as usize);
    let mut legs = Vec::with_capacity(k);
    let mut bear_substituted = false;

    for (i, sector) in ranked.iter().take(k).enumerate() {
        let (symbol, used_bear) =
            mapped_instrument(&sector.symbol, sector.trailing_return, sleeve);
        bear_substituted |= used_bear;
        legs.push(AllocationLeg {
            symbol,
            dollars: weight_table[i] * sleeve.capital_cap,
        });
    }

    tracing::debug!(
        sleeve = %sleeve.id,
        legs = ?legs,
        "rotation rollover selected new allocation"
    );

    RotationDecision {
        allocation: TargetAllocation { legs: legs.clone() },
        record: Some(RotationCycleRecord {
            cycle_start: today,
            ranked,
            chosen: legs,
            bear_substituted,
        }),
    }
}
