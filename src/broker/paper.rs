//! Simulated brokerage: fills limit orders against a quote table.
//!
//! This is the paper half of paper trading. Quotes and trailing returns are
//! fed in from a snapshot file (kept current by the scanner side of the
//! tool) or set directly in tests. Fills execute at the limit price; the
//! broker tracks net holdings and remembers idempotency keys so a
//! resubmitted order returns the original fill instead of executing twice.

use crate::broker::{BrokerAdapter, BrokerPosition};
use crate::error::{EngineError, Result};
use crate::models::{Fill, OrderIntent, Quote, Side};
use async_trait::async_trait;
use chrono::Utc;
use serde::Deserialize;
use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Mutex, RwLock};
use uuid::Uuid;

/// On-disk snapshot format for `PaperBroker::from_snapshot`
#[derive(Debug, Deserialize)]
struct MarketSnapshot {
    #[serde(default)]
    quotes: HashMap<String, Quote>,
    #[serde(default)]
    trailing_returns: HashMap<String, f64>,
}

#[derive(Default)]
pub struct PaperBroker {
    quotes: RwLock<HashMap<String, Quote>>,
    trailing_returns: RwLock<HashMap<String, f64>>,
    holdings: Mutex<HashMap<String, i64>>,
    fills_by_key: Mutex<HashMap<Uuid, Fill>>,
    /// Fail the next N submissions with a transient error (tests exercise
    /// the engine's backoff with this)
    fail_submissions: AtomicU32,
}

impl PaperBroker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load quotes and trailing returns from a JSON snapshot file
    pub fn from_snapshot(path: &Path) -> Result<Self> {
        let bytes = std::fs::read(path)?;
        let snapshot: MarketSnapshot = serde_json::from_slice(&bytes)?;
        let broker = Self::new();
        *broker.quotes.write().unwrap() = snapshot.quotes;
        *broker.trailing_returns.write().unwrap() = snapshot.trailing_returns;
        Ok(broker)
    }

    pub fn set_quote(&self, symbol: &str, quote: Quote) {
        self.quotes.write().unwrap().insert(symbol.to_string(), quote);
    }

    pub fn set_trailing_return(&self, symbol: &str, pct: f64) {
        self.trailing_returns
            .write()
            .unwrap()
            .insert(symbol.to_string(), pct);
    }

    pub fn fail_next_submissions(&self, count: u32) {
        self.fail_submissions.store(count, Ordering::SeqCst);
    }

    pub fn holding(&self, symbol: &str) -> i64 {
        self.holdings
            .lock()
            .unwrap()
            .get(symbol)
            .copied()
            .unwrap_or(0)
    }
}

#[async_trait]
impl BrokerAdapter for PaperBroker {
    async fn get_positions(&self) -> Result<Vec<BrokerPosition>> {
        Ok(self
            .holdings
            .lock()
            .unwrap()
            .iter()
            .filter(|(_, qty)| **qty != 0)
            .map(|(symbol, qty)| BrokerPosition {
                symbol: symbol.clone(),
                quantity: *qty,
            })
            .collect())
    }

    async fn get_quote(&self, symbol: &str) -> Result<Quote> {
        self.quotes
            .read()
            .unwrap()
            .get(symbol)
            .copied()
            .ok_or_else(|| EngineError::DataUnavailable {
                symbol: symbol.to_string(),
                reason: "no quote in snapshot".to_string(),
            })
    }

    async fn get_trailing_return(&self, symbol: &str, _days: u32) -> Result<f64> {
        self.trailing_returns
            .read()
            .unwrap()
            .get(symbol)
            .copied()
            .ok_or_else(|| EngineError::DataUnavailable {
                symbol: symbol.to_string(),
                reason: "no trailing return in snapshot".to_string(),
            })
    }

    async fn place_order(&self, intent: &OrderIntent, idempotency_key: Uuid) -> Result<Fill> {
        if let Some(previous) = self.fills_by_key.lock().unwrap().get(&idempotency_key) {
            tracing::debug!(key = %idempotency_key, "duplicate submission, returning original fill");
            return Ok(previous.clone());
        }

        let remaining = self.fail_submissions.load(Ordering::SeqCst);
        if remaining > 0 {
            self.fail_submissions.store(remaining - 1, Ordering::SeqCst);
            return Err(EngineError::Broker("simulated transient outage".to_string()));
        }

        // Quote must exist for the order to be marketable at all
        if !self.quotes.read().unwrap().contains_key(&intent.symbol) {
            return Err(EngineError::Broker(format!(
                "no market for {}",
                intent.symbol
            )));
        }

        let signed = match intent.side {
            Side::Buy => intent.quantity as i64,
            Side::Sell => -(intent.quantity as i64),
        };
        *self
            .holdings
            .lock()
            .unwrap()
            .entry(intent.symbol.clone())
            .or_insert(0) += signed;

        let fill = Fill {
            order_id: idempotency_key,
            symbol: intent.symbol.clone(),
            side: intent.side,
            quantity: intent.quantity,
            price: intent.limit_price,
            time: Utc::now(),
        };
        self.fills_by_key
            .lock()
            .unwrap()
            .insert(idempotency_key, fill.clone());
        Ok(fill)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{IntentReason, OrderType};

    fn intent(symbol: &str, side: Side, quantity: u32, limit: f64) -> OrderIntent {
        OrderIntent {
            symbol: symbol.to_string(),
            sleeve_id: "swing".to_string(),
            side,
            quantity,
            order_type: OrderType::Limit,
            limit_price: limit,
            extended_hours: false,
            reason: IntentReason::NewEntry,
            position_id: None,
        }
    }

    fn quote(bid: f64, ask: f64) -> Quote {
        Quote {
            bid,
            ask,
            last: (bid + ask) / 2.0,
        }
    }

    #[tokio::test]
    async fn test_fills_at_limit_price() {
        let broker = PaperBroker::new();
        broker.set_quote("AAPL", quote(100.0, 100.2));

        let fill = broker
            .place_order(&intent("AAPL", Side::Buy, 10, 100.1), Uuid::new_v4())
            .await
            .unwrap();
        assert_eq!(fill.price, 100.1);
        assert_eq!(fill.quantity, 10);
        assert_eq!(broker.holding("AAPL"), 10);
    }

    #[tokio::test]
    async fn test_sell_reduces_holding() {
        let broker = PaperBroker::new();
        broker.set_quote("AAPL", quote(100.0, 100.2));

        broker
            .place_order(&intent("AAPL", Side::Buy, 10, 100.1), Uuid::new_v4())
            .await
            .unwrap();
        broker
            .place_order(&intent("AAPL", Side::Sell, 10, 100.0), Uuid::new_v4())
            .await
            .unwrap();
        assert_eq!(broker.holding("AAPL"), 0);
    }

    #[tokio::test]
    async fn test_duplicate_key_returns_original_fill() {
        let broker = PaperBroker::new();
        broker.set_quote("AAPL", quote(100.0, 100.2));

        let key = Uuid::new_v4();
        let first = broker
            .place_order(&intent("AAPL", Side::Buy, 10, 100.1), key)
            .await
            .unwrap();
        let second = broker
            .place_order(&intent("AAPL", Side::Buy, 10, 100.1), key)
            .await
            .unwrap();

        assert_eq!(first.order_id, second.order_id);
        // The duplicate did not execute twice
        assert_eq!(broker.holding("AAPL"), 10);
    }

    #[tokio::test]
    async fn test_simulated_outage_then_recovery() {
        let broker = PaperBroker::new();
        broker.set_quote("AAPL", quote(100.0, 100.2));
        broker.fail_next_submissions(2);

        let order = intent("AAPL", Side::Buy, 10, 100.1);
        assert!(broker.place_order(&order, Uuid::new_v4()).await.is_err());
        assert!(broker.place_order(&order, Uuid::new_v4()).await.is_err());
        assert!(broker.place_order(&order, Uuid::new_v4()).await.is_ok());
    }

    #[tokio::test]
    async fn test_unknown_symbol_quote_is_data_unavailable() {
        let broker = PaperBroker::new();
        let err = broker.get_quote("ZZZZ").await.unwrap_err();
        assert!(matches!(err, EngineError::DataUnavailable { .. }));
    }
}
