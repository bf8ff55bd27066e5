//! LLM 层：客户端抽象与实现（OpenAI 兼容 / DeepSeek / Mock）

pub mod mock;
pub mod openai;
pub mod protocol;
pub mod provider;
pub mod traits;

pub use mock::{MockLlmClient, ScriptedLlmClient, ScriptedReply};
pub use openai::{OpenAiClient, TokenUsage};
pub use provider::{create_deepseek_client, create_llm_from_config, DEEPSEEK_CHAT, DEEPSEEK_REASONER};
pub use traits::{ChatChunk, ChatRequest, ChatResponse, ChatStream, LlmClient, LlmError, ToolSchema};
