//! Advisory AI consensus check before each trade.
//!
//! The engine POSTs a decision context to an external consensus endpoint and
//! expects a verdict back. The endpoint is advisory but the failure mode is
//! not: if the call errors or times out the gate treats it as ABORT unless
//! the operator opted into fail-open.

use crate::error::{EngineError, Result};
use crate::models::{OrderIntent, Quote};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Verdict {
    Ok,
    Caution,
    Abort,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ConsensusReply {
    pub verdict: Verdict,
    #[serde(default)]
    pub reasoning: String,
}

/// Everything the consensus side needs to judge one intent
#[derive(Debug, Serialize)]
pub struct DecisionContext<'a> {
    pub intent: &'a OrderIntent,
    pub quote: &'a Quote,
    pub sleeve_id: &'a str,
    pub open_position_count: usize,
    pub open_sleeve_value: f64,
}

#[async_trait]
pub trait ConsensusService: Send + Sync {
    async fn consult(&self, context: &DecisionContext<'_>) -> Result<ConsensusReply>;
}

pub struct HttpConsensus {
    client: reqwest::Client,
    url: String,
}

impl HttpConsensus {
    pub fn new(url: String, timeout_sec: u64) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_sec))
            .build()?;
        Ok(Self { client, url })
    }
}

#[async_trait]
impl ConsensusService for HttpConsensus {
    async fn consult(&self, context: &DecisionContext<'_>) -> Result<ConsensusReply> {
        let response = self
            .client
            .post(&self.url)
            .json(context)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(EngineError::Broker(format!(
                "consensus endpoint returned {}",
                response.status()
            )));
        }

        let reply: ConsensusReply = response.json().await?;
        Ok(reply)
    }
}
