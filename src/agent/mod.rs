//! Agent 层：类型与静态配置、system prompt、回复结构、单轮执行（ReAct 运行器）

pub mod config;
pub mod prompt;
pub mod response;
pub mod runner;
pub mod turn;

pub use config::{validate_agent_configs, AgentConfig, AgentType, AGENT_CONFIGS};
pub use response::{AgentResponse, Delegation, SuggestedAction};
pub use runner::{AgentRunner, MAX_AGENT_ITERATIONS};
pub use turn::{AgentDeps, ModelOverrides, PromptSet, TurnContext, TurnEngine};
