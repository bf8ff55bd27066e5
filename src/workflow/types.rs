//! 工作流类型：阶段、耗时统计、工具调用去重

use std::collections::HashSet;

use serde::Serialize;
use serde_json::{json, Value};

use crate::memory::ToolCall;

/// 工作流阶段
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkflowPhase {
    /// 带工具调用模型，决定要查什么
    Plan,
    /// 串行执行去重后的工具调用
    Execute,
    /// 不带工具，基于结果作答
    Solve,
}

impl WorkflowPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            WorkflowPhase::Plan => "plan",
            WorkflowPhase::Execute => "execute",
            WorkflowPhase::Solve => "solve",
        }
    }
}

/// 各阶段耗时，写入回复的 data.workflow
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct WorkflowTimings {
    pub plan_ms: u64,
    pub execute_ms: u64,
    pub solve_ms: u64,
    pub tool_calls: usize,
}

impl WorkflowTimings {
    pub fn to_data(&self) -> Value {
        json!({ "workflow": self })
    }
}

/// 按 (name, arguments) 去重，保留首次出现的顺序与 ID
pub fn dedupe_calls(calls: &[ToolCall]) -> Vec<ToolCall> {
    let mut seen = HashSet::new();
    calls
        .iter()
        .filter(|c| seen.insert((c.name.clone(), c.arguments.to_string())))
        .cloned()
        .collect()
}
