//! Execution engine: submit approved intents to the broker and report fills.
//!
//! Transient broker errors are retried with bounded exponential backoff under
//! one idempotency key, so a retry after a lost acknowledgment cannot
//! double-execute. When retries run out the intent is abandoned for this
//! cycle; the next cycle replans from the ledger instead of replaying a
//! queue.

use crate::broker::BrokerAdapter;
use crate::error::{EngineError, Result};
use crate::models::{Fill, OrderIntent};
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

const INITIAL_BACKOFF_MS: u64 = 500;

pub struct ExecutionEngine {
    broker: Arc<dyn BrokerAdapter>,
    max_retries: u32,
    dry_run: bool,
}

impl ExecutionEngine {
    pub fn new(broker: Arc<dyn BrokerAdapter>, max_retries: u32, dry_run: bool) -> Self {
        Self {
            broker,
            max_retries,
            dry_run,
        }
    }

    /// Submit one intent. Returns `Ok(None)` in dry-run mode (logged, never
    /// sent), `Ok(Some(fill))` on confirmation, or the final broker error
    /// once retries are exhausted.
    pub async fn execute(&self, intent: &OrderIntent) -> Result<Option<Fill>> {
        if self.dry_run {
            tracing::info!(
                "[DRY RUN] would submit {:?} {} x{} limit ${:.2} ({:?})",
                intent.side,
                intent.symbol,
                intent.quantity,
                intent.limit_price,
                intent.reason
            );
            return Ok(None);
        }

        let idempotency_key = Uuid::new_v4();
        let mut attempt = 0u32;
        loop {
            match self.broker.place_order(intent, idempotency_key).await {
                Ok(fill) => {
                    tracing::info!(
                        "Filled {:?} {} x{} @ ${:.2}",
                        fill.side,
                        fill.symbol,
                        fill.quantity,
                        fill.price
                    );
                    return Ok(Some(fill));
                }
                Err(EngineError::Broker(reason)) if attempt < self.max_retries => {
                    let backoff =
                        Duration::from_millis(INITIAL_BACKOFF_MS * 2u64.pow(attempt));
                    attempt += 1;
                    tracing::warn!(
                        "Broker error for {} ({}), retry {}/{} after {:?}",
                        intent.symbol,
                        reason,
                        attempt,
                        self.max_retries,
                        backoff
                    );
                    tokio::time::sleep(backoff).await;
                }
                Err(e) => {
                    tracing::error!("Abandoning {} intent for this cycle: {}", intent.symbol, e);
                    return Err(e);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::PaperBroker;
    use crate::models::{IntentReason, OrderType, Quote, Side};

    fn intent(symbol: &str) -> OrderIntent {
        OrderIntent {
            symbol: symbol.to_string(),
            sleeve_id: "swing".to_string(),
            side: Side::Buy,
            quantity: 5,
            order_type: OrderType::Limit,
            limit_price: 100.0,
            extended_hours: false,
            reason: IntentReason::NewEntry,
            position_id: None,
        }
    }

    fn broker_with_quote(symbol: &str) -> Arc<PaperBroker> {
        let broker = Arc::new(PaperBroker::new());
        broker.set_quote(
            symbol,
            Quote {
                bid: 99.9,
                ask: 100.1,
                last: 100.0,
            },
        );
        broker
    }

    #[tokio::test]
    async fn test_executes_and_returns_fill() {
        let broker = broker_with_quote("AAPL");
        let engine = ExecutionEngine::new(broker.clone(), 3, false);

        let fill = engine.execute(&intent("AAPL")).await.unwrap().unwrap();
        assert_eq!(fill.quantity, 5);
        assert_eq!(broker.holding("AAPL"), 5);
    }

    #[tokio::test]
    async fn test_dry_run_submits_nothing() {
        let broker = broker_with_quote("AAPL");
        let engine = ExecutionEngine::new(broker.clone(), 3, true);

        let result = engine.execute(&intent("AAPL")).await.unwrap();
        assert!(result.is_none());
        assert_eq!(broker.holding("AAPL"), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retries_transient_errors_then_fills() {
        let broker = broker_with_quote("AAPL");
        broker.fail_next_submissions(2);
        let engine = ExecutionEngine::new(broker.clone(), 3, false);

        let fill = engine.execute(&intent("AAPL")).await.unwrap();
        assert!(fill.is_some());
        assert_eq!(broker.holding("AAPL"), 5);
    }

    #[tokio::test(start_paused = true)]
    async fn test_abandons_after_retry_budget() {
        let broker = broker_with_quote("AAPL");
        broker.fail_next_submissions(10);
        let engine = ExecutionEngine::new(broker.clone(), 2, false);

        let result = engine.execute(&intent("AAPL")).await;
        assert!(matches!(result, Err(EngineError::Broker(_))));
        assert_eq!(broker.holding("AAPL"), 0);
    }
}
