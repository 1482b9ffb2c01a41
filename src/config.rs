use crate::error::{EngineError, Result};
use chrono::NaiveTime;
use chrono_tz::Tz;
use serde::Deserialize;
use std::collections::HashSet;
use std::path::{Path, PathBuf};

/// Top-level settings, loaded once at startup and passed by value into each
/// component. No component reads configuration from disk mid-cycle.
#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub schedule: ScheduleSettings,
    #[serde(default)]
    pub engine: EngineSettings,
    #[serde(default)]
    pub sleeves: Vec<SleeveSettings>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ScheduleSettings {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_start_hour")]
    pub start_hour: u32,
    #[serde(default = "default_end_hour")]
    pub end_hour: u32,
    #[serde(default = "default_interval_min")]
    pub interval_min: u32,
    #[serde(default = "default_true")]
    pub weekdays_only: bool,
    /// Explicit run times ("HH:MM", market time). Non-empty list overrides
    /// interval mode.
    #[serde(default)]
    pub run_times: Vec<String>,
    #[serde(default = "default_timezone")]
    pub timezone: Tz,
}

impl Default for ScheduleSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            start_hour: default_start_hour(),
            end_hour: default_end_hour(),
            interval_min: default_interval_min(),
            weekdays_only: true,
            run_times: Vec::new(),
            timezone: default_timezone(),
        }
    }
}

impl ScheduleSettings {
    /// Parsed explicit run times; validation guarantees these parse
    pub fn parsed_run_times(&self) -> Vec<NaiveTime> {
        self.run_times
            .iter()
            .filter_map(|s| NaiveTime::parse_from_str(s, "%H:%M").ok())
            .collect()
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct EngineSettings {
    /// Ledger, cycle state, pending-trade record, and audit log live here
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
    /// Scan reports are read from here
    #[serde(default = "default_reports_dir")]
    pub reports_dir: PathBuf,
    /// Plan, gate, and audit intents but never submit them
    #[serde(default)]
    pub dry_run: bool,
    /// Limit offset in percent: buys at bid*(1+offset), sells at ask*(1-offset)
    #[serde(default = "default_limit_offset_pct")]
    pub limit_offset_pct: f64,
    #[serde(default = "default_true")]
    pub extended_hours_enabled: bool,
    #[serde(default)]
    pub pre_trade_notify_enabled: bool,
    #[serde(default = "default_pre_trade_delay_sec")]
    pub pre_trade_delay_sec: u64,
    #[serde(default)]
    pub pre_trade_ai_check_enabled: bool,
    pub consensus_url: Option<String>,
    #[serde(default = "default_consensus_timeout_sec")]
    pub consensus_timeout_sec: u64,
    /// On consensus timeout or transport error: false (default) aborts the
    /// intent, true proceeds with an audit annotation
    #[serde(default)]
    pub consensus_fail_open: bool,
    #[serde(default = "default_broker_retries")]
    pub broker_max_retries: u32,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            reports_dir: default_reports_dir(),
            dry_run: false,
            limit_offset_pct: default_limit_offset_pct(),
            extended_hours_enabled: true,
            pre_trade_notify_enabled: false,
            pre_trade_delay_sec: default_pre_trade_delay_sec(),
            pre_trade_ai_check_enabled: false,
            consensus_url: None,
            consensus_timeout_sec: default_consensus_timeout_sec(),
            consensus_fail_open: false,
            broker_max_retries: default_broker_retries(),
        }
    }
}

#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SleeveMode {
    Rotation,
    ScanDriven,
    HybridSplit,
}

/// Score tier for scan-driven sizing: a candidate scoring at least
/// `min_score` is sized at `dollars`, clamped to the sleeve's per-position cap
#[derive(Debug, Clone, Deserialize)]
pub struct SizeTier {
    pub min_score: f64,
    pub dollars: f64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SleeveSettings {
    pub id: String,
    pub mode: SleeveMode,
    pub capital_cap: f64,
    #[serde(default = "default_max_positions")]
    pub max_positions: u32,
    pub position_dollar_cap: f64,
    #[serde(default = "default_stop_pct")]
    pub stop_pct: f64,
    #[serde(default = "default_target_pct")]
    pub target_pct: f64,
    /// Default for ordinary equities; leveraged ETFs fall back to 3 days
    #[serde(default = "default_max_hold_days")]
    pub max_hold_days: u32,
    #[serde(default = "default_rotation_positions")]
    pub rotation_positions: u32,
    #[serde(default)]
    pub rotation_bear_enabled: bool,
    #[serde(default)]
    pub rotation_leverage_enabled: bool,
    #[serde(default = "default_rotation_cycle_days")]
    pub rotation_cycle_days: u32,
    #[serde(default = "default_min_score")]
    pub min_score: f64,
    #[serde(default = "default_scan_type")]
    pub scan_type: String,
    #[serde(default)]
    pub size_tiers: Vec<SizeTier>,
}

fn default_true() -> bool {
    true
}
fn default_start_hour() -> u32 {
    8
}
fn default_end_hour() -> u32 {
    20
}
fn default_interval_min() -> u32 {
    30
}
fn default_timezone() -> Tz {
    chrono_tz::America::New_York
}
fn default_data_dir() -> PathBuf {
    PathBuf::from("data")
}
fn default_reports_dir() -> PathBuf {
    PathBuf::from("reports")
}
fn default_limit_offset_pct() -> f64 {
    0.1
}
fn default_pre_trade_delay_sec() -> u64 {
    15
}
fn default_consensus_timeout_sec() -> u64 {
    20
}
fn default_broker_retries() -> u32 {
    3
}
fn default_max_positions() -> u32 {
    3
}
fn default_stop_pct() -> f64 {
    -2.0
}
fn default_target_pct() -> f64 {
    3.0
}
fn default_max_hold_days() -> u32 {
    5
}
fn default_rotation_positions() -> u32 {
    1
}
fn default_rotation_cycle_days() -> u32 {
    5
}
fn default_min_score() -> f64 {
    80.0
}
fn default_scan_type() -> String {
    "swing".to_string()
}

impl Settings {
    /// Load settings from a TOML file layered with PAPERTRADER__* environment
    /// overrides, then validate
    pub fn load(path: &Path) -> Result<Self> {
        let cfg = config::Config::builder()
            .add_source(config::File::from(path))
            .add_source(
                config::Environment::with_prefix("PAPERTRADER")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .map_err(|e| EngineError::Config(e.to_string()))?;

        let settings: Settings = cfg
            .try_deserialize()
            .map_err(|e| EngineError::Config(e.to_string()))?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> Result<()> {
        let s = &self.schedule;
        if s.start_hour > 23 || s.end_hour > 24 || s.start_hour >= s.end_hour {
            return Err(EngineError::Config(format!(
                "invalid schedule window {:02}:00-{:02}:00",
                s.start_hour, s.end_hour
            )));
        }
        if s.interval_min == 0 {
            return Err(EngineError::Config("interval_min must be >= 1".into()));
        }
        for t in &s.run_times {
            if NaiveTime::parse_from_str(t, "%H:%M").is_err() {
                return Err(EngineError::Config(format!("unparseable run time {:?}", t)));
            }
        }

        if self.engine.limit_offset_pct < 0.0 || self.engine.limit_offset_pct > 5.0 {
            return Err(EngineError::Config(format!(
                "limit_offset_pct {} out of range (0..=5)",
                self.engine.limit_offset_pct
            )));
        }
        if self.engine.pre_trade_ai_check_enabled && self.engine.consensus_url.is_none() {
            return Err(EngineError::Config(
                "pre_trade_ai_check_enabled requires consensus_url".into(),
            ));
        }

        if self.sleeves.is_empty() {
            return Err(EngineError::Config("at least one sleeve is required".into()));
        }
        let mut seen = HashSet::new();
        for sleeve in &self.sleeves {
            if sleeve.id.is_empty() {
                return Err(EngineError::Config("sleeve id must not be empty".into()));
            }
            if !seen.insert(sleeve.id.as_str()) {
                return Err(EngineError::Config(format!("duplicate sleeve id {:?}", sleeve.id)));
            }
            if sleeve.capital_cap <= 0.0 {
                return Err(EngineError::Config(format!(
                    "sleeve {:?}: capital_cap must be positive",
                    sleeve.id
                )));
            }
            if sleeve.position_dollar_cap <= 0.0 || sleeve.position_dollar_cap > sleeve.capital_cap {
                return Err(EngineError::Config(format!(
                    "sleeve {:?}: position_dollar_cap must be in (0, capital_cap]",
                    sleeve.id
                )));
            }
            if sleeve.max_positions == 0 {
                return Err(EngineError::Config(format!(
                    "sleeve {:?}: max_positions must be >= 1",
                    sleeve.id
                )));
            }
            if sleeve.stop_pct >= 0.0 {
                return Err(EngineError::Config(format!(
                    "sleeve {:?}: stop_pct must be negative",
                    sleeve.id
                )));
            }
            if sleeve.target_pct <= 0.0 {
                return Err(EngineError::Config(format!(
                    "sleeve {:?}: target_pct must be positive",
                    sleeve.id
                )));
            }
            if !(1..=3).contains(&sleeve.rotation_positions) {
                return Err(EngineError::Config(format!(
                    "sleeve {:?}: rotation_positions must be 1, 2 or 3",
                    sleeve.id
                )));
            }
            if sleeve.rotation_cycle_days == 0 {
                return Err(EngineError::Config(format!(
                    "sleeve {:?}: rotation_cycle_days must be >= 1",
                    sleeve.id
                )));
            }
            for tier in &sleeve.size_tiers {
                if tier.dollars <= 0.0 {
                    return Err(EngineError::Config(format!(
                        "sleeve {:?}: size tier dollars must be positive",
                        sleeve.id
                    )));
                }
            }
        }
        Ok(())
    }
}
