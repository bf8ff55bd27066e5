//! liuxue - 留学申请助手的多智能体对话编排核心
//!
//! 模块划分：
//! - **agent**: Agent 类型与静态配置、system prompt、回复结构、ReAct 运行器
//! - **config**: 应用配置加载（TOML + 环境变量）
//! - **core**: 编排器、委派栈、降级与韧性（重试 / 熔断）、流式事件
//! - **llm**: 模型边界（OpenAI 兼容 / DeepSeek / Mock）
//! - **memory**: 会话存储（内存 / SQLite）、上下文窗口、事实抽取与摘要
//! - **routing**: 关键词 / 正则快速路由与语言检测
//! - **store**: 业务数据边界（档案、院校、文书、案例、时间线）
//! - **tools**: 工具注册表、领域 handler 与执行器
//! - **workflow**: Plan → Execute → Solve 执行模式

pub mod agent;
pub mod config;
pub mod core;
pub mod llm;
pub mod memory;
pub mod observability;
pub mod routing;
pub mod store;
pub mod tools;
pub mod workflow;

pub use agent::{AgentResponse, AgentType};
pub use core::{AgentError, Orchestrator, OrchestratorBuilder, StreamEvent};
