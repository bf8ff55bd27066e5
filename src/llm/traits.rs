//! LLM 客户端抽象
//!
//! 所有后端（OpenAI 兼容 / DeepSeek / Mock）实现 LlmClient：chat（完整回复或工具调用列表）、
//! chat_stream（增量文本 / 工具调用块）。请求携带 system、历史消息、工具 schema 与采样参数。

use std::pin::Pin;

use async_trait::async_trait;
use futures_util::{stream, Stream};
use serde::Serialize;
use thiserror::Error;

use crate::memory::{Message, ToolCall};

/// 流式回复时每段字符数
pub const STREAM_CHUNK_CHARS: usize = 6;

/// 提供给模型的工具描述（名称、用途、JSON Schema 参数）
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ToolSchema {
    pub name: String,
    pub description: String,
    pub parameters: serde_json::Value,
}

/// 单次模型请求
#[derive(Debug, Clone)]
pub struct ChatRequest {
    pub system: String,
    pub messages: Vec<Message>,
    /// 为空表示本次调用不允许使用工具
    pub tools: Vec<ToolSchema>,
    pub temperature: f32,
    pub max_tokens: u32,
}

/// 模型回复：文本，或一组工具调用（两者可同时存在）
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChatResponse {
    pub content: String,
    pub tool_calls: Vec<ToolCall>,
}

impl ChatResponse {
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            tool_calls: Vec::new(),
        }
    }

    pub fn tool_calls(calls: Vec<ToolCall>) -> Self {
        Self {
            content: String::new(),
            tool_calls: calls,
        }
    }

    pub fn has_tool_calls(&self) -> bool {
        !self.tool_calls.is_empty()
    }
}

/// 流式回复块
#[derive(Debug, Clone, PartialEq)]
pub enum ChatChunk {
    Text(String),
    ToolCall(ToolCall),
}

pub type ChatStream = Pin<Box<dyn Stream<Item = Result<ChatChunk, LlmError>> + Send>>;

/// 模型调用错误
#[derive(Error, Debug, Clone, PartialEq)]
pub enum LlmError {
    #[error("LLM request timed out")]
    Timeout,

    #[error("Rate limited (retry after {retry_after_ms}ms)")]
    RateLimited { retry_after_ms: u64 },

    #[error("Quota exceeded: {0}")]
    QuotaExceeded(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Content moderation: {0}")]
    Moderation(String),

    #[error("API error: {0}")]
    ApiError(String),
}

impl LlmError {
    /// 按错误文本归类（provider SDK 只给出字符串时使用）
    pub fn from_message(message: &str) -> Self {
        let lower = message.to_lowercase();
        if mentions_code(&lower, "429") || lower.contains("rate limit") || lower.contains("too many requests") {
            LlmError::RateLimited { retry_after_ms: 1000 }
        } else if lower.contains("insufficient_quota") || lower.contains("quota") || mentions_code(&lower, "402") {
            LlmError::QuotaExceeded(message.to_string())
        } else if lower.contains("timed out") || lower.contains("timeout") {
            LlmError::Timeout
        } else if lower.contains("content_filter") || lower.contains("moderation") {
            LlmError::Moderation(message.to_string())
        } else if lower.contains("connection") || lower.contains("dns") || lower.contains("network") {
            LlmError::Network(message.to_string())
        } else {
            LlmError::ApiError(message.to_string())
        }
    }
}

/// 文本中是否以独立词形式出现状态码（前后不是字母数字）
pub(crate) fn mentions_code(text: &str, code: &str) -> bool {
    text.match_indices(code).any(|(i, _)| {
        let before = text[..i].chars().next_back();
        let after = text[i + code.len()..].chars().next();
        !before.is_some_and(|c| c.is_ascii_alphanumeric()) && !after.is_some_and(|c| c.is_ascii_alphanumeric())
    })
}

/// LLM 客户端 trait
#[async_trait]
pub trait LlmClient: Send + Sync {
    /// 非流式：返回完整回复或工具调用
    async fn chat(&self, request: &ChatRequest) -> Result<ChatResponse, LlmError>;

    /// 流式：默认实现将完整回复切分为小段文本，再依次给出工具调用
    async fn chat_stream(&self, request: &ChatRequest) -> Result<ChatStream, LlmError> {
        let response = self.chat(request).await?;
        let chars: Vec<char> = response.content.chars().collect();
        let mut chunks: Vec<Result<ChatChunk, LlmError>> = chars
            .chunks(STREAM_CHUNK_CHARS)
            .map(|c| Ok(ChatChunk::Text(c.iter().collect())))
            .collect();
        chunks.extend(response.tool_calls.into_iter().map(|c| Ok(ChatChunk::ToolCall(c))));
        Ok(Box::pin(stream::iter(chunks)))
    }

    /// 获取累计 token 使用统计：(prompt_tokens, completion_tokens, total_tokens)
    fn token_usage(&self) -> (u64, u64, u64) {
        (0, 0, 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_from_message() {
        assert!(matches!(
            LlmError::from_message("HTTP 429 Too Many Requests"),
            LlmError::RateLimited { .. }
        ));
        assert!(matches!(
            LlmError::from_message("insufficient_quota: check your plan"),
            LlmError::QuotaExceeded(_)
        ));
        assert_eq!(LlmError::from_message("operation timed out"), LlmError::Timeout);
        assert!(matches!(
            LlmError::from_message("error sending request: connection refused"),
            LlmError::Network(_)
        ));
        assert!(matches!(LlmError::from_message("bad request"), LlmError::ApiError(_)));
    }
}
