//! Append-only audit trail. One JSON line per decision, order, and outcome,
//! so a cycle can be reconstructed after the fact without trusting logs.
//!
//! Records are only ever appended; a single `write` of one full line keeps
//! concurrent readers from seeing torn records. The file is never rewritten
//! or truncated by the engine.

use crate::error::Result;
use crate::models::{Fill, OrderIntent, TargetAllocation};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs::OpenOptions;
use std::io::Write;
use std::path::PathBuf;
use uuid::Uuid;

pub const AUDIT_FILE: &str = "audit.jsonl";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum AuditEvent {
    CycleStart {
        dry_run: bool,
        open_positions: usize,
    },
    SymbolSkipped {
        symbol: String,
        reason: String,
    },
    TargetsComputed {
        sleeve_id: String,
        targets: Vec<TargetAllocation>,
    },
    IntentPlanned {
        intent: OrderIntent,
    },
    GateDecision {
        intent: OrderIntent,
        approved: bool,
        detail: Option<String>,
    },
    ExecutionResult {
        intent: OrderIntent,
        fill: Option<Fill>,
        error: Option<String>,
    },
    CycleEnd {
        fills: usize,
        skips: usize,
        aborts: usize,
    },
    Fatal {
        error: String,
    },
}

#[derive(Debug, Serialize, Deserialize)]
pub struct AuditRecord {
    pub id: Uuid,
    pub time: DateTime<Utc>,
    pub cycle_id: Uuid,
    #[serde(flatten)]
    pub event: AuditEvent,
}

pub struct AuditLog {
    path: PathBuf,
}

impl AuditLog {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    pub fn append(&self, cycle_id: Uuid, event: AuditEvent) -> Result<()> {
        let record = AuditRecord {
            id: Uuid::new_v4(),
            time: Utc::now(),
            cycle_id,
            event,
        };
        let mut line = serde_json::to_vec(&record)?;
        line.push(b'\n');

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        file.write_all(&line)?;
        Ok(())
    }
}
