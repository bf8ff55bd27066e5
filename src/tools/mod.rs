//! 工具层：声明式注册表、领域 handler、带超时/重试/熔断的执行器

pub mod executor;
pub mod handlers;
pub mod registry;
pub mod schema;

pub use executor::{ToolExecutionResult, ToolExecutor, DEFAULT_TOOL_TIMEOUT_SECS};
pub use handlers::{builtin_handlers, ToolContext, ToolError, ToolHandler};
pub use registry::{
    HandlerCategory, HandlerRef, ToolDefinition, ToolRegistry, DELEGATE_TOOL, NON_RETRYABLE_TOOLS,
};
