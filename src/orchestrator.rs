//! One trading cycle, end to end.
//!
//! Sleeves are processed sequentially in config order; nothing inside a
//! cycle runs concurrently, which is what keeps two sleeves from planning
//! against the same cash. Exits are always evaluated and executed for every
//! position before any new entry is planned, so stop and target sells free
//! capital first. The ledger on disk is the only state that survives between
//! cycles.

use crate::audit::{AuditEvent, AuditLog};
use crate::broker::BrokerAdapter;
use crate::config::{Settings, SleeveMode, SleeveSettings};
use crate::error::Result;
use crate::execution::planner::{plan_exit, plan_rebalance, PlanContext};
use crate::execution::{exits, ExecutionEngine};
use crate::models::{CloseReason, OrderIntent, Position, Quote, Side};
use crate::risk::{GateContext, GateDecision, RiskGate};
use crate::scan::ScanSource;
use crate::scheduler::{is_regular_session, trading_day};
use crate::store::PositionStore;
use crate::strategy::rotation::{self, TRAILING_RETURN_DAYS};
use crate::strategy::{select_targets, SelectorInputs};
use chrono::{DateTime, Utc};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use uuid::Uuid;

pub struct CycleReport {
    pub cycle_id: Uuid,
    pub fills: usize,
    pub skips: usize,
    pub aborts: usize,
}

#[derive(Default)]
struct Counters {
    fills: usize,
    skips: usize,
    aborts: usize,
}

pub struct Orchestrator {
    settings: Settings,
    store: PositionStore,
    broker: Arc<dyn BrokerAdapter>,
    scan: Arc<dyn ScanSource>,
    gate: RiskGate,
    engine: ExecutionEngine,
    audit: AuditLog,
}

impl Orchestrator {
    pub fn new(
        settings: Settings,
        store: PositionStore,
        broker: Arc<dyn BrokerAdapter>,
        scan: Arc<dyn ScanSource>,
        gate: RiskGate,
        engine: ExecutionEngine,
        audit: AuditLog,
    ) -> Self {
        Self {
            settings,
            store,
            broker,
            scan,
            gate,
            engine,
            audit,
        }
    }

    pub async fn run_cycle(&self, now: DateTime<Utc>) -> Result<CycleReport> {
        let cycle_id = Uuid::new_v4();
        let tz = self.settings.schedule.timezone;
        let today = trading_day(now, tz);
        let extended = !is_regular_session(now, tz);

        let mut positions = match self.store.load() {
            Ok(p) => p,
            Err(e) => {
                let _ = self.audit.append(
                    cycle_id,
                    AuditEvent::Fatal {
                        error: e.to_string(),
                    },
                );
                return Err(e);
            }
        };
        let mut state = match self.store.load_state() {
            Ok(s) => s,
            Err(e) => {
                let _ = self.audit.append(
                    cycle_id,
                    AuditEvent::Fatal {
                        error: e.to_string(),
                    },
                );
                return Err(e);
            }
        };

        let open_count = positions.iter().filter(|p| p.is_open()).count();
        tracing::info!(
            "🔄 Cycle {} starting: {} open positions, trading day {}",
            cycle_id,
            open_count,
            today
        );
        self.audit.append(
            cycle_id,
            AuditEvent::CycleStart {
                dry_run: self.settings.engine.dry_run,
                open_positions: open_count,
            },
        )?;

        if extended && !self.settings.engine.extended_hours_enabled {
            tracing::info!("Outside the regular session with extended hours disabled, no orders this cycle");
            state.last_run = Some(now);
            self.store.save_state(&state)?;
            self.audit.append(
                cycle_id,
                AuditEvent::CycleEnd {
                    fills: 0,
                    skips: 0,
                    aborts: 0,
                },
            )?;
            return Ok(CycleReport {
                cycle_id,
                fills: 0,
                skips: 0,
                aborts: 0,
            });
        }

        let mut counters = Counters::default();
        let mut quotes: HashMap<String, Quote> = HashMap::new();

        let open_symbols: Vec<String> = {
            let mut symbols: Vec<String> = positions
                .iter()
                .filter(|p| p.is_open())
                .map(|p| p.symbol.clone())
                .collect();
            symbols.sort();
            symbols.dedup();
            symbols
        };
        self.fetch_quotes(&open_symbols, &mut quotes, cycle_id, &mut counters)
            .await?;

        // Symbols with a position closed earlier today; selling and then
        // re-buying the same day is banned
        let mut closed_today: HashSet<String> = positions
            .iter()
            .filter(|p| !p.is_open())
            .filter(|p| p.close_time.map_or(false, |t| trading_day(t, tz) == today))
            .map(|p| p.symbol.clone())
            .collect();

        let offset = self.settings.engine.limit_offset_pct;

        // Phase 1: state-machine exits for every position, before any entry
        let exit_signals: Vec<(Uuid, CloseReason)> = positions
            .iter()
            .filter(|p| p.is_open())
            .filter_map(|p| {
                let quote = quotes.get(&p.symbol)?;
                exits::evaluate(p, quote.last, today).map(|reason| (p.id, reason))
            })
            .collect();

        for (id, reason) in exit_signals {
            let Some(position) = positions.iter().find(|p| p.id == id).cloned() else {
                continue;
            };
            let Some(sleeve) = self.sleeve_settings(&position.sleeve_id) else {
                tracing::warn!(
                    "Open position {} belongs to unknown sleeve {:?}, leaving it alone",
                    position.symbol,
                    position.sleeve_id
                );
                counters.skips += 1;
                continue;
            };
            tracing::info!("Exit signal {:?} for {}", reason, position.symbol);
            let ctx = PlanContext {
                quotes: &quotes,
                limit_offset_pct: offset,
                extended_hours: extended,
            };
            let Some(intent) = plan_exit(&position, reason, &ctx) else {
                counters.skips += 1;
                continue;
            };
            self.audit.append(
                cycle_id,
                AuditEvent::IntentPlanned {
                    intent: intent.clone(),
                },
            )?;
            if self
                .process_intent(&intent, sleeve, &mut positions, &quotes, today, cycle_id, &mut counters)
                .await?
            {
                closed_today.insert(intent.symbol.clone());
            }
        }

        // Phase 2: per-sleeve rebalancing and entries, in config order
        for sleeve in &self.settings.sleeves {
            let needs_rotation = matches!(sleeve.mode, SleeveMode::Rotation | SleeveMode::HybridSplit);
            let needs_scan = matches!(sleeve.mode, SleeveMode::ScanDriven | SleeveMode::HybridSplit);

            let mut returns: Vec<(String, f64)> = Vec::new();
            if needs_rotation {
                for symbol in rotation::proxy_symbols() {
                    match self.broker.get_trailing_return(symbol, TRAILING_RETURN_DAYS).await {
                        Ok(r) => returns.push((symbol.to_string(), r)),
                        Err(e) => {
                            self.audit.append(
                                cycle_id,
                                AuditEvent::SymbolSkipped {
                                    symbol: symbol.to_string(),
                                    reason: e.to_string(),
                                },
                            )?;
                            counters.skips += 1;
                        }
                    }
                }
            }

            let candidates = if needs_scan {
                match self.scan.latest_candidates(&sleeve.scan_type).await {
                    Ok(c) => c,
                    Err(e) => {
                        tracing::warn!("Scan source unavailable for sleeve {}: {}", sleeve.id, e);
                        Vec::new()
                    }
                }
            } else {
                Vec::new()
            };

            let targets = {
                let open = sleeve_open(&positions, &sleeve.id, &quotes);
                let inputs = SelectorInputs {
                    returns: &returns,
                    candidates: &candidates,
                    open_positions: open,
                    closed_today: &closed_today,
                    today,
                    previous_rotation: state.rotation.get(&sleeve.id),
                };
                select_targets(sleeve, &inputs)
            };
            self.audit.append(
                cycle_id,
                AuditEvent::TargetsComputed {
                    sleeve_id: sleeve.id.clone(),
                    targets: vec![targets.allocation.clone()],
                },
            )?;
            if let Some(record) = &targets.rotation_record {
                tracing::info!(
                    "Sleeve {} rotation rollover: {:?}",
                    sleeve.id,
                    record.chosen.iter().map(|l| l.symbol.as_str()).collect::<Vec<_>>()
                );
                state.rotation.insert(sleeve.id.clone(), record.clone());
            }

            let leg_symbols: Vec<String> = targets
                .allocation
                .legs
                .iter()
                .map(|l| l.symbol.clone())
                .collect();
            self.fetch_quotes(&leg_symbols, &mut quotes, cycle_id, &mut counters)
                .await?;

            // Sells first, then re-plan so the buys see the freed capital
            let sells: Vec<OrderIntent> = {
                let open = sleeve_open(&positions, &sleeve.id, &quotes);
                let ctx = PlanContext {
                    quotes: &quotes,
                    limit_offset_pct: offset,
                    extended_hours: extended,
                };
                plan_rebalance(&targets, sleeve, &open, &closed_today, &ctx)
                    .into_iter()
                    .filter(|i| i.side == Side::Sell)
                    .collect()
            };
            for intent in sells {
                self.audit.append(
                    cycle_id,
                    AuditEvent::IntentPlanned {
                        intent: intent.clone(),
                    },
                )?;
                if self
                    .process_intent(&intent, sleeve, &mut positions, &quotes, today, cycle_id, &mut counters)
                    .await?
                {
                    closed_today.insert(intent.symbol.clone());
                }
            }

            let buys: Vec<OrderIntent> = {
                let open = sleeve_open(&positions, &sleeve.id, &quotes);
                let ctx = PlanContext {
                    quotes: &quotes,
                    limit_offset_pct: offset,
                    extended_hours: extended,
                };
                plan_rebalance(&targets, sleeve, &open, &closed_today, &ctx)
                    .into_iter()
                    .filter(|i| i.side == Side::Buy)
                    .collect()
            };
            for intent in buys {
                self.audit.append(
                    cycle_id,
                    AuditEvent::IntentPlanned {
                        intent: intent.clone(),
                    },
                )?;
                self.process_intent(&intent, sleeve, &mut positions, &quotes, today, cycle_id, &mut counters)
                    .await?;
            }
        }

        self.store.save(&positions)?;
        state.last_run = Some(now);
        self.store.save_state(&state)?;

        self.reconcile_with_broker(&positions).await;
        self.log_summary(&positions, &quotes);
        self.audit.append(
            cycle_id,
            AuditEvent::CycleEnd {
                fills: counters.fills,
                skips: counters.skips,
                aborts: counters.aborts,
            },
        )?;
        tracing::info!(
            "✅ Cycle {} done: {} fills, {} skips, {} aborts",
            cycle_id,
            counters.fills,
            counters.skips,
            counters.aborts
        );

        Ok(CycleReport {
            cycle_id,
            fills: counters.fills,
            skips: counters.skips,
            aborts: counters.aborts,
        })
    }

    /// Gate, execute, and record one intent. Broker failures are contained to
    /// the intent; only fatal errors propagate. Returns true when a sell fill
    /// closed (or shrank) a position.
    async fn process_intent(
        &self,
        intent: &OrderIntent,
        sleeve: &SleeveSettings,
        positions: &mut Vec<Position>,
        quotes: &HashMap<String, Quote>,
        today: chrono::NaiveDate,
        cycle_id: Uuid,
        counters: &mut Counters,
    ) -> Result<bool> {
        let Some(quote) = quotes.get(&intent.symbol) else {
            counters.skips += 1;
            return Ok(false);
        };

        let decision = {
            let sleeve_positions: Vec<&Position> = positions
                .iter()
                .filter(|p| p.is_open() && p.sleeve_id == sleeve.id)
                .collect();
            let open_sleeve_value: f64 = sleeve_positions
                .iter()
                .map(|p| {
                    let price = quotes.get(&p.symbol).map(|q| q.last).unwrap_or(p.entry_price);
                    p.market_value(price)
                })
                .sum();
            let ctx = GateContext {
                today,
                sleeve,
                open_positions: &sleeve_positions,
                open_sleeve_value,
                quote,
            };
            self.gate.approve(intent, &ctx).await
        };

        match decision {
            GateDecision::Abort { reason } => {
                tracing::warn!(
                    "⛔ Gate aborted {:?} {} x{}: {}",
                    intent.side,
                    intent.symbol,
                    intent.quantity,
                    reason
                );
                self.audit.append(
                    cycle_id,
                    AuditEvent::GateDecision {
                        intent: intent.clone(),
                        approved: false,
                        detail: Some(reason),
                    },
                )?;
                counters.aborts += 1;
                Ok(false)
            }
            GateDecision::Proceed { annotation } => {
                self.audit.append(
                    cycle_id,
                    AuditEvent::GateDecision {
                        intent: intent.clone(),
                        approved: true,
                        detail: annotation,
                    },
                )?;
                match self.engine.execute(intent).await {
                    Ok(Some(fill)) => {
                        self.audit.append(
                            cycle_id,
                            AuditEvent::ExecutionResult {
                                intent: intent.clone(),
                                fill: Some(fill.clone()),
                                error: None,
                            },
                        )?;
                        self.store
                            .apply_fill(positions, intent, &fill, today, sleeve)?;
                        // Persist immediately; a crash after this point loses nothing
                        self.store.save(positions)?;
                        counters.fills += 1;
                        Ok(intent.side == Side::Sell)
                    }
                    Ok(None) => {
                        self.audit.append(
                            cycle_id,
                            AuditEvent::ExecutionResult {
                                intent: intent.clone(),
                                fill: None,
                                error: None,
                            },
                        )?;
                        Ok(false)
                    }
                    Err(e) if !e.is_fatal() => {
                        self.audit.append(
                            cycle_id,
                            AuditEvent::ExecutionResult {
                                intent: intent.clone(),
                                fill: None,
                                error: Some(e.to_string()),
                            },
                        )?;
                        counters.skips += 1;
                        Ok(false)
                    }
                    Err(e) => Err(e),
                }
            }
        }
    }

    async fn fetch_quotes(
        &self,
        symbols: &[String],
        quotes: &mut HashMap<String, Quote>,
        cycle_id: Uuid,
        counters: &mut Counters,
    ) -> Result<()> {
        for symbol in symbols {
            if quotes.contains_key(symbol) {
                continue;
            }
            match self.broker.get_quote(symbol).await {
                Ok(q) => {
                    quotes.insert(symbol.clone(), q);
                }
                Err(e) => {
                    tracing::warn!("No quote for {}: {}", symbol, e);
                    self.audit.append(
                        cycle_id,
                        AuditEvent::SymbolSkipped {
                            symbol: symbol.clone(),
                            reason: e.to_string(),
                        },
                    )?;
                    counters.skips += 1;
                }
            }
        }
        Ok(())
    }

    fn sleeve_settings(&self, sleeve_id: &str) -> Option<&SleeveSettings> {
        self.settings.sleeves.iter().find(|s| s.id == sleeve_id)
    }

    /// Warn when the broker's view of holdings drifts from the ledger. The
    /// ledger stays authoritative; this only surfaces the drift.
    async fn reconcile_with_broker(&self, positions: &[Position]) {
        let broker_positions = match self.broker.get_positions().await {
            Ok(p) => p,
            Err(e) => {
                tracing::warn!("Could not fetch broker positions for reconciliation: {}", e);
                return;
            }
        };
        let mut ledger: HashMap<&str, i64> = HashMap::new();
        for p in positions.iter().filter(|p| p.is_open()) {
            *ledger.entry(p.symbol.as_str()).or_insert(0) += p.quantity as i64;
        }
        for bp in &broker_positions {
            let local = ledger.remove(bp.symbol.as_str()).unwrap_or(0);
            if local != bp.quantity {
                tracing::warn!(
                    "⚠️ Reconciliation drift for {}: ledger {} vs broker {}",
                    bp.symbol,
                    local,
                    bp.quantity
                );
            }
        }
        for (symbol, quantity) in ledger {
            tracing::warn!(
                "⚠️ Reconciliation drift for {}: ledger {} vs broker 0",
                symbol,
                quantity
            );
        }
    }

    fn log_summary(&self, positions: &[Position], quotes: &HashMap<String, Quote>) {
        for sleeve in &self.settings.sleeves {
            let open: Vec<&Position> = positions
                .iter()
                .filter(|p| p.is_open() && p.sleeve_id == sleeve.id)
                .collect();
            let value: f64 = open
                .iter()
                .map(|p| {
                    let price = quotes.get(&p.symbol).map(|q| q.last).unwrap_or(p.entry_price);
                    p.market_value(price)
                })
                .sum();
            let pnl: f64 = open
                .iter()
                .map(|p| {
                    let price = quotes.get(&p.symbol).map(|q| q.last).unwrap_or(p.entry_price);
                    p.unrealized_pnl(price)
                })
                .sum();
            tracing::info!(
                "📊 Sleeve {}: {} open, ${:.2} of ${:.2} cap, unrealized P&L ${:+.2}",
                sleeve.id,
                open.len(),
                value,
                sleeve.capital_cap,
                pnl
            );
        }
    }
}

fn sleeve_open<'a>(
    positions: &'a [Position],
    sleeve_id: &str,
    quotes: &HashMap<String, Quote>,
) -> Vec<(&'a Position, f64)> {
    positions
        .iter()
        .filter(|p| p.is_open() && p.sleeve_id == sleeve_id)
        .map(|p| {
            let price = quotes.get(&p.symbol).map(|q| q.last).unwrap_or(p.entry_price);
            (p, p.market_value(price))
        })
        .collect()
}
