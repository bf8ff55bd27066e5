//! 三段式工作流执行模式（Plan → Execute → Solve）

pub mod engine;
pub mod types;

pub use engine::WorkflowEngine;
pub use types::{dedupe_calls, WorkflowPhase, WorkflowTimings};
