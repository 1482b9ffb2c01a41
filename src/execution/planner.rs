//! Order planner: diff a target allocation against current holdings and emit
//! concrete limit-order intents.
//!
//! Policy is LIMIT-only. Buys price at the bid plus a small offset, sells at
//! the ask minus it, trading a little price control for fill probability.
//! Planning is a pure function of its inputs, so re-planning against an
//! unchanged ledger produces an identical intent set.

use crate::config::SleeveSettings;
use crate::models::{
    CloseReason, IntentReason, OrderIntent, OrderType, Position, Quote, Side,
};
use crate::strategy::SleeveTargets;
use std::collections::{HashMap, HashSet};

pub struct PlanContext<'a> {
    pub quotes: &'a HashMap<String, Quote>,
    pub limit_offset_pct: f64,
    /// True outside the regular session; stamped onto every intent
    pub extended_hours: bool,
}

fn buy_limit(quote: &Quote, offset_pct: f64) -> f64 {
    quote.bid * (1.0 + offset_pct / 100.0)
}

fn sell_limit(quote: &Quote, offset_pct: f64) -> f64 {
    quote.ask * (1.0 - offset_pct / 100.0)
}

/// Sell intent for a position whose state machine signalled an exit. These
/// override the rotation cadence and are planned before any entries.
pub fn plan_exit(
    position: &Position,
    reason: CloseReason,
    ctx: &PlanContext<'_>,
) -> Option<OrderIntent> {
    let quote = ctx.quotes.get(&position.symbol)?;
    Some(OrderIntent {
        symbol: position.symbol.clone(),
        sleeve_id: position.sleeve_id.clone(),
        side: Side::Sell,
        quantity: position.quantity,
        order_type: OrderType::Limit,
        limit_price: sell_limit(quote, ctx.limit_offset_pct),
        extended_hours: ctx.extended_hours,
        reason: reason.into(),
        position_id: Some(position.id),
    })
}

/// Diff the sleeve's target allocation against its open positions.
///
/// Sells come first (rotation legs that fell out of the target, then
/// overweight trims), so freed capital is accounted before buys. Buy sizes
/// are whole shares, rounded down, and the batch never plans more buy
/// dollars than `capital_cap` minus current open value.
///
/// Buy legs for symbols in `closed_today` are skipped: a rotation
/// allocation held between rollovers still lists a leg after its stop
/// fires, and re-buying it would be a same-day round trip.
pub fn plan_rebalance(
    targets: &SleeveTargets,
    sleeve: &SleeveSettings,
    open_positions: &[(&Position, f64)],
    closed_today: &HashSet<String>,
    ctx: &PlanContext<'_>,
) -> Vec<OrderIntent> {
    let mut intents = Vec::new();

    // Current holdings by symbol: total shares and market value
    let mut held: HashMap<&str, (u32, f64)> = HashMap::new();
    for (position, value) in open_positions {
        let entry = held.entry(position.symbol.as_str()).or_insert((0, 0.0));
        entry.0 += position.quantity;
        entry.1 += value;
    }

    let target_symbols: HashMap<&str, f64> = targets
        .allocation
        .legs
        .iter()
        .map(|l| (l.symbol.as_str(), l.dollars))
        .collect();

    // Rotation legs no longer in the target get sold down entirely
    if let Some(universe) = &targets.rebalance_universe {
        for (position, _) in open_positions {
            if universe.contains(&position.symbol)
                && !target_symbols.contains_key(position.symbol.as_str())
            {
                if let Some(quote) = ctx.quotes.get(&position.symbol) {
                    intents.push(OrderIntent {
                        symbol: position.symbol.clone(),
                        sleeve_id: sleeve.id.clone(),
                        side: Side::Sell,
                        quantity: position.quantity,
                        order_type: OrderType::Limit,
                        limit_price: sell_limit(quote, ctx.limit_offset_pct),
                        extended_hours: ctx.extended_hours,
                        reason: IntentReason::RotationRebalance,
                        position_id: Some(position.id),
                    });
                } else {
                    tracing::warn!(symbol = %position.symbol, "no quote, skipping rebalance sell");
                }
            }
        }
    }

    let open_value: f64 = open_positions.iter().map(|(_, v)| v).sum();
    let mut buy_budget = (sleeve.capital_cap - open_value).max(0.0);

    // Overweight trims, then buys, in stable leg order
    for leg in &targets.allocation.legs {
        let quote = match ctx.quotes.get(&leg.symbol) {
            Some(q) => q,
            None => {
                tracing::warn!(symbol = %leg.symbol, "no quote, skipping target leg");
                continue;
            }
        };
        let (held_qty, held_value) = held.get(leg.symbol.as_str()).copied().unwrap_or((0, 0.0));
        let delta = leg.dollars - held_value;

        if delta > 0.0 {
            if closed_today.contains(&leg.symbol) {
                tracing::info!(symbol = %leg.symbol, "closed today, not re-buying");
                continue;
            }
            let limit = buy_limit(quote, ctx.limit_offset_pct);
            let mut quantity = (delta / limit).floor() as u32;
            // Never plan past the sleeve's remaining capital
            let affordable = (buy_budget / limit).floor() as u32;
            quantity = quantity.min(affordable);
            if quantity == 0 {
                continue;
            }
            buy_budget -= limit * quantity as f64;
            intents.push(OrderIntent {
                symbol: leg.symbol.clone(),
                sleeve_id: sleeve.id.clone(),
                side: Side::Buy,
                quantity,
                order_type: OrderType::Limit,
                limit_price: limit,
                extended_hours: ctx.extended_hours,
                reason: if held_qty == 0 {
                    IntentReason::NewEntry
                } else {
                    IntentReason::RotationRebalance
                },
                position_id: None,
            });
        } else if targets.rebalance_universe.is_some() && held_qty > 0 {
            let limit = sell_limit(quote, ctx.limit_offset_pct);
            let quantity = ((-delta) / limit).floor() as u32;
            let quantity = quantity.min(held_qty);
            if quantity == 0 {
                continue;
            }
            intents.push(OrderIntent {
                symbol: leg.symbol.clone(),
                sleeve_id: sleeve.id.clone(),
                side: Side::Sell,
                quantity,
                order_type: OrderType::Limit,
                limit_price: limit,
                extended_hours: ctx.extended_hours,
                reason: IntentReason::RotationRebalance,
                position_id: None,
            });
        }
    }

    // Sells ahead of buys so exits free capital first
    intents.sort_by_key(|i| match i.side {
        Side::Sell => 0,
        Side::Buy => 1,
    });
    intents
}
