pub mod engine;
pub mod exits;
pub mod planner;

pub use engine::ExecutionEngine;
