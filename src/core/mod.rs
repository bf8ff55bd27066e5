//! 核心编排层：错误、降级与韧性、委派栈、流式事件、编排器与构建器

pub mod builder;
pub mod delegation;
pub mod error;
pub mod fallback;
pub mod orchestrator;
pub mod resilience;
pub mod stream;

pub use builder::OrchestratorBuilder;
pub use delegation::{DelegationFrame, DelegationStack, DEFAULT_MAX_DELEGATION_DEPTH};
pub use error::AgentError;
pub use fallback::{ErrorCategory, FallbackService};
pub use orchestrator::Orchestrator;
pub use resilience::{CircuitBreaker, CircuitBreakerConfig, CircuitState, RetryPolicy};
pub use stream::{EventStream, StreamEvent};
