//! Agent 错误类型
//!
//! 编排层内部统一使用 AgentError；到达 Orchestrator 边界后由 FallbackService 转为降级回复，
//! 不会原样抛给调用方。

use thiserror::Error;

use crate::agent::AgentType;
use crate::llm::LlmError;
use crate::store::StoreError;

/// 编排过程中可能出现的错误（模型、工具、委派、存储、配置）
#[derive(Error, Debug)]
pub enum AgentError {
    #[error("LLM error: {0}")]
    LlmError(#[from] LlmError),

    #[error("Tool execution failed: {0}")]
    ToolExecutionFailed(String),

    #[error("Tool timeout: {0}")]
    ToolTimeout(String),

    /// 模型请求了注册表中不存在的工具
    #[error("Hallucinated tool: {0}")]
    HallucinatedTool(String),

    /// 工具存在，但不在调用方 Agent 的工具列表中
    #[error("Tool {tool} not allowed for agent {agent}")]
    ToolNotAllowed { tool: String, agent: AgentType },

    #[error("Circuit open for tool: {0}")]
    CircuitOpen(String),

    /// 委派链超过最大深度（第 max+1 次委派）
    #[error("Delegation too deep: depth {attempted} exceeds max {max}")]
    DelegationTooDeep { attempted: usize, max: usize },

    #[error("Invalid delegation target: {0}")]
    InvalidDelegation(String),

    #[error("Storage error: {0}")]
    Storage(#[from] StoreError),

    #[error("Config error: {0}")]
    ConfigError(String),

    /// 流式调用方已断开
    #[error("Cancelled")]
    Cancelled,
}

impl AgentError {
    /// 错误名（用于 FallbackService 的子串分类）
    pub fn name(&self) -> &'static str {
        match self {
            AgentError::LlmError(_) => "LlmError",
            AgentError::ToolExecutionFailed(_) => "ToolExecutionFailed",
            AgentError::ToolTimeout(_) => "ToolTimeout",
            AgentError::HallucinatedTool(_) => "HallucinatedTool",
            AgentError::ToolNotAllowed { .. } => "ToolNotAllowed",
            AgentError::CircuitOpen(_) => "CircuitOpen",
            AgentError::DelegationTooDeep { .. } => "DelegationTooDeep",
            AgentError::InvalidDelegation(_) => "InvalidDelegation",
            AgentError::Storage(_) => "StorageError",
            AgentError::ConfigError(_) => "ConfigError",
            AgentError::Cancelled => "Cancelled",
        }
    }
}
