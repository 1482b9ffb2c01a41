pub mod paper;

use crate::error::Result;
use crate::models::{Fill, OrderIntent, Quote};
use async_trait::async_trait;
use uuid::Uuid;

pub use paper::PaperBroker;

/// Holding as the broker sees it; used only for a reconciliation warning,
/// the local ledger stays the source of truth
#[derive(Debug, Clone)]
pub struct BrokerPosition {
    pub symbol: String,
    pub quantity: i64,
}

/// Narrow seam over the market-data and order-execution provider.
///
/// `place_order` takes an idempotency key so a retry after a lost
/// acknowledgment cannot double-submit.
#[async_trait]
pub trait BrokerAdapter: Send + Sync {
    async fn get_positions(&self) -> Result<Vec<BrokerPosition>>;

    async fn get_quote(&self, symbol: &str) -> Result<Quote>;

    /// Trailing return over the last `days` trading days, in percent
    async fn get_trailing_return(&self, symbol: &str, days: u32) -> Result<f64>;

    async fn place_order(&self, intent: &OrderIntent, idempotency_key: Uuid) -> Result<Fill>;
}
