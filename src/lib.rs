// Core modules
pub mod audit;
pub mod broker;
pub mod config;
pub mod error;
pub mod execution;
pub mod models;
pub mod orchestrator;
pub mod risk;
pub mod scan;
pub mod scheduler;
pub mod store;
pub mod strategy;

// Re-export commonly used types
pub use error::{EngineError, Result};
pub use models::*;
pub use orchestrator::{CycleReport, Orchestrator};
