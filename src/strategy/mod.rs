//! Per-sleeve target allocation.
//!
//! Each configured sleeve runs one of two algorithms (or a 50/50 split of
//! both) and yields a `SleeveTargets` the order planner diffs against
//! current holdings.

pub mod rotation;
pub mod scan_driven;

use crate::config::{SleeveMode, SleeveSettings};
use crate::models::{Candidate, Position, RotationCycleRecord, TargetAllocation};
use chrono::NaiveDate;
use std::collections::HashSet;

/// Everything a selector may need for one sleeve in one cycle. Assembled by
/// the orchestrator; selectors stay pure.
pub struct SelectorInputs<'a> {
    /// Trailing returns per sector proxy (rotation sleeves)
    pub returns: &'a [(String, f64)],
    /// Newest candidate set from the scan source (scan-driven sleeves)
    pub candidates: &'a [Candidate],
    /// Open positions in this sleeve, with current market value
    pub open_positions: Vec<(&'a Position, f64)>,
    /// Symbols with a position closed today (same-day round-trip exclusion)
    pub closed_today: &'a HashSet<String>,
    pub today: NaiveDate,
    /// Last persisted rotation decision for this sleeve
    pub previous_rotation: Option<&'a RotationCycleRecord>,
}

pub struct SleeveTargets {
    pub allocation: TargetAllocation,
    /// Holdings inside this universe that are absent from the allocation get
    /// sold down (rotation rebalancing). `None` means never sell on a diff;
    /// scan picks exit only through the position state machine.
    pub rebalance_universe: Option<HashSet<String>>,
    /// New rotation record to persist, when a rollover happened
    pub rotation_record: Option<RotationCycleRecord>,
}

pub fn select_targets(sleeve: &SleeveSettings, inputs: &SelectorInputs<'_>) -> SleeveTargets {
    match sleeve.mode {
        SleeveMode::Rotation => {
            let decision = rotation::select(
                sleeve,
                inputs.returns,
                inputs.today,
                inputs.previous_rotation,
            );
            SleeveTargets {
                allocation: decision.allocation,
                rebalance_universe: Some(owned_universe()),
                rotation_record: decision.record,
            }
        }
        SleeveMode::ScanDriven => {
            let open_refs: Vec<&Position> =
                inputs.open_positions.iter().map(|(p, _)| *p).collect();
            let open_value: f64 = inputs.open_positions.iter().map(|(_, v)| v).sum();
            let allocation = scan_driven::select(
                sleeve,
                inputs.candidates,
                &open_refs,
                inputs.closed_today,
                open_value,
            );
            SleeveTargets {
                allocation,
                rebalance_universe: None,
                rotation_record: None,
            }
        }
        SleeveMode::HybridSplit => hybrid_split(sleeve, inputs),
    }
}

/// Hybrid sleeve: capital cap split 50/50, rotation and scan halves selected
/// independently. A symbol collision resolves in favor of the rotation leg.
fn hybrid_split(sleeve: &SleeveSettings, inputs: &SelectorInputs<'_>) -> SleeveTargets {
    let universe = owned_universe();

    let mut half = sleeve.clone();
    half.capital_cap = sleeve.capital_cap / 2.0;
    half.position_dollar_cap = sleeve.position_dollar_cap.min(half.capital_cap);

    let rotation_decision = rotation::select(
        &half,
        inputs.returns,
        inputs.today,
        inputs.previous_rotation,
    );

    // The scan half only sees holdings that are not rotation instruments
    let scan_open: Vec<&Position> = inputs
        .open_positions
        .iter()
        .filter(|(p, _)| !universe.contains(&p.symbol))
        .map(|(p, _)| *p)
        .collect();
    let scan_value: f64 = inputs
        .open_positions
        .iter()
        .filter(|(p, _)| !universe.contains(&p.symbol))
        .map(|(_, v)| v)
        .sum();
    let scan_allocation = scan_driven::select(
        &half,
        inputs.candidates,
        &scan_open,
        inputs.closed_today,
        scan_value,
    );

    let mut allocation = rotation_decision.allocation;
    let taken: HashSet<&str> = allocation.legs.iter().map(|l| l.symbol.as_str()).collect();
    let extra: Vec<_> = scan_allocation
        .legs
        .into_iter()
        .filter(|l| !taken.contains(l.symbol.as_str()))
        .collect();
    allocation.legs.extend(extra);

    SleeveTargets {
        allocation,
        rebalance_universe: Some(universe),
        rotation_record: rotation_decision.record,
    }
}

fn owned_universe() -> HashSet<String> {
    rotation::instrument_universe()
        .into_iter()
        .map(str::to_string)
        .collect()
}
