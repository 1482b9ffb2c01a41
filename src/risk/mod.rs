//! Pre-trade gating. Every intent passes through here between planning and
//! execution.
//!
//! Checks run in a fixed order and short-circuit on the first failure: the
//! same-day round-trip ban, sleeve capital and position caps, the optional
//! human-notification delay, then the optional AI consensus check. The first
//! two are hard rules and never bypassed.

pub mod consensus;

use crate::config::{EngineSettings, SleeveSettings};
use crate::models::{OrderIntent, Position, Quote, Side};
use crate::risk::consensus::{ConsensusService, DecisionContext, Verdict};
use chrono::{NaiveDate, Utc};
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

pub use consensus::{ConsensusReply, HttpConsensus};

const PENDING_TRADE_FILE: &str = "pending_trade.json";

#[derive(Debug, Clone, PartialEq)]
pub enum GateDecision {
    Proceed { annotation: Option<String> },
    Abort { reason: String },
}

impl GateDecision {
    fn proceed() -> Self {
        GateDecision::Proceed { annotation: None }
    }

    fn abort(reason: impl Into<String>) -> Self {
        GateDecision::Abort {
            reason: reason.into(),
        }
    }
}

/// Sleeve-local state the gate judges an intent against
pub struct GateContext<'a> {
    pub today: NaiveDate,
    pub sleeve: &'a SleeveSettings,
    pub open_positions: &'a [&'a Position],
    pub open_sleeve_value: f64,
    pub quote: &'a Quote,
}

/// Written to disk during the notification delay so an operator can see what
/// is about to execute
#[derive(Debug, Serialize)]
struct PendingTrade<'a> {
    intent: &'a OrderIntent,
    created_at: chrono::DateTime<Utc>,
    delay_sec: u64,
}

pub struct RiskGate {
    data_dir: PathBuf,
    notify_enabled: bool,
    delay_sec: u64,
    ai_check_enabled: bool,
    consensus_fail_open: bool,
    consensus: Option<Arc<dyn ConsensusService>>,
}

impl RiskGate {
    pub fn new(engine: &EngineSettings, consensus: Option<Arc<dyn ConsensusService>>) -> Self {
        Self {
            data_dir: engine.data_dir.clone(),
            notify_enabled: engine.pre_trade_notify_enabled,
            delay_sec: engine.pre_trade_delay_sec,
            ai_check_enabled: engine.pre_trade_ai_check_enabled,
            consensus_fail_open: engine.consensus_fail_open,
            consensus,
        }
    }

    /// Run the full check sequence for one intent.
    pub async fn approve(&self, intent: &OrderIntent, ctx: &GateContext<'_>) -> GateDecision {
        if let Some(decision) = self.check_hard_rules(intent, ctx) {
            return decision;
        }

        if self.notify_enabled && self.delay_sec > 0 {
            self.notify_and_wait(intent).await;
        }

        if self.ai_check_enabled {
            return self.consult_consensus(intent, ctx).await;
        }

        GateDecision::proceed()
    }

    fn check_hard_rules(&self, intent: &OrderIntent, ctx: &GateContext<'_>) -> Option<GateDecision> {
        match intent.side {
            Side::Sell => {
                let position = ctx.open_positions.iter().find(|p| match intent.position_id {
                    Some(id) => p.id == id,
                    None => p.symbol == intent.symbol,
                });
                if let Some(p) = position {
                    if p.entry_trading_day == ctx.today {
                        return Some(GateDecision::abort(format!(
                            "same-day round trip: {} entered {}",
                            p.symbol, p.entry_trading_day
                        )));
                    }
                }
                None
            }
            Side::Buy => {
                if ctx.open_positions.len() >= ctx.sleeve.max_positions as usize {
                    return Some(GateDecision::abort(format!(
                        "sleeve {} already holds {} positions (max {})",
                        ctx.sleeve.id,
                        ctx.open_positions.len(),
                        ctx.sleeve.max_positions
                    )));
                }
                let notional = intent.notional();
                if ctx.open_sleeve_value + notional > ctx.sleeve.capital_cap {
                    return Some(GateDecision::abort(format!(
                        "buy of ${:.2} would push sleeve {} past its ${:.2} cap",
                        notional, ctx.sleeve.id, ctx.sleeve.capital_cap
                    )));
                }
                if notional > ctx.sleeve.position_dollar_cap {
                    return Some(GateDecision::abort(format!(
                        "buy of ${:.2} exceeds per-position cap ${:.2}",
                        notional, ctx.sleeve.position_dollar_cap
                    )));
                }
                None
            }
        }
    }

    /// Write a pending-trade record and pause. The engine does not support
    /// cancellation during the wait; the operator intervenes externally
    /// (kill the process, flatten at the broker) if they disagree.
    async fn notify_and_wait(&self, intent: &OrderIntent) {
        let record = PendingTrade {
            intent,
            created_at: Utc::now(),
            delay_sec: self.delay_sec,
        };
        let path = self.data_dir.join(PENDING_TRADE_FILE);
        let written = serde_json::to_vec_pretty(&record)
            .map_err(crate::error::EngineError::from)
            .and_then(|bytes| std::fs::write(&path, bytes).map_err(Into::into));
        match written {
            Ok(()) => tracing::info!(
                "Pending {:?} {} x{}, waiting {}s before submission",
                intent.side,
                intent.symbol,
                intent.quantity,
                self.delay_sec
            ),
            // Notification is advisory; a write failure must not block trading
            Err(e) => tracing::warn!("Could not write pending-trade record at {:?}: {}", path, e),
        }
        tokio::time::sleep(Duration::from_secs(self.delay_sec)).await;
    }

    async fn consult_consensus(&self, intent: &OrderIntent, ctx: &GateContext<'_>) -> GateDecision {
        let Some(service) = &self.consensus else {
            tracing::warn!("AI check enabled but no consensus service configured");
            return if self.consensus_fail_open {
                GateDecision::proceed()
            } else {
                GateDecision::abort("consensus check enabled but unavailable")
            };
        };

        let context = DecisionContext {
            intent,
            quote: ctx.quote,
            sleeve_id: &ctx.sleeve.id,
            open_position_count: ctx.open_positions.len(),
            open_sleeve_value: ctx.open_sleeve_value,
        };

        match service.consult(&context).await {
            Ok(reply) => match reply.verdict {
                Verdict::Ok => GateDecision::proceed(),
                Verdict::Caution => GateDecision::Proceed {
                    annotation: Some(format!("consensus CAUTION: {}", reply.reasoning)),
                },
                Verdict::Abort => GateDecision::abort(format!("consensus ABORT: {}", reply.reasoning)),
            },
            Err(e) => {
                if self.consensus_fail_open {
                    tracing::warn!("Consensus check failed ({}), proceeding (fail-open)", e);
                    GateDecision::Proceed {
                        annotation: Some(format!("consensus unavailable: {}", e)),
                    }
                } else {
                    GateDecision::abort(format!("consensus unavailable: {}", e))
                }
            }
        }
    }
}
