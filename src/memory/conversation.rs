//! 会话状态与消息
//!
//! ConversationState 按会话 ID 保存有序消息列表与上下文（档案快照、偏好、语言、事实）；
//! 消息创建后不可变，会话内只追加。

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::agent::AgentType;
use crate::routing::Locale;

/// 消息角色（与 LLM API 一致）
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
    System,
    Tool,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
            Role::System => "system",
            Role::Tool => "tool",
        }
    }

    /// 未知角色按 system 处理
    pub fn from_str_lossy(s: &str) -> Self {
        match s {
            "user" => Role::User,
            "assistant" => Role::Assistant,
            "tool" => Role::Tool,
            _ => Role::System,
        }
    }
}

/// 模型发起的工具调用
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    pub arguments: serde_json::Value,
}

impl ToolCall {
    pub fn new(name: impl Into<String>, arguments: serde_json::Value) -> Self {
        Self {
            id: format!("call_{}", Uuid::new_v4().simple()),
            name: name.into(),
            arguments,
        }
    }
}

/// 单条消息
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub id: String,
    pub role: Role,
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent_type: Option<AgentType>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Vec<ToolCall>>,
    /// role = tool 时对应的调用 ID
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl Message {
    fn with_role(role: Role, content: String) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            role,
            content,
            agent_type: None,
            tool_calls: None,
            tool_call_id: None,
            timestamp: Utc::now(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::with_role(Role::User, content.into())
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::with_role(Role::Assistant, content.into())
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::with_role(Role::System, content.into())
    }

    pub fn tool(tool_call_id: impl Into<String>, content: impl Into<String>) -> Self {
        let mut m = Self::with_role(Role::Tool, content.into());
        m.tool_call_id = Some(tool_call_id.into());
        m
    }

    pub fn with_agent(mut self, agent: AgentType) -> Self {
        self.agent_type = Some(agent);
        self
    }

    pub fn with_tool_calls(mut self, calls: Vec<ToolCall>) -> Self {
        self.tool_calls = Some(calls);
        self
    }
}

/// 会话状态：一个会话 ID 对应一个状态
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversationState {
    pub id: String,
    pub user_id: String,
    pub messages: Vec<Message>,
    #[serde(default)]
    pub context: HashMap<String, serde_json::Value>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ConversationState {
    /// 未指定 ID 时生成新的 UUID
    pub fn new(user_id: impl Into<String>, id: Option<&str>) -> Self {
        let now = Utc::now();
        Self {
            id: id
                .map(String::from)
                .unwrap_or_else(|| Uuid::new_v4().to_string()),
            user_id: user_id.into(),
            messages: Vec::new(),
            context: HashMap::new(),
            created_at: now,
            updated_at: now,
        }
    }

    pub fn push(&mut self, message: Message) {
        self.updated_at = message.timestamp.max(self.updated_at);
        self.messages.push(message);
    }

    /// 上下文中记录的语言；未记录时返回 None
    pub fn locale(&self) -> Option<Locale> {
        self.context
            .get("locale")
            .and_then(|v| v.as_str())
            .and_then(Locale::parse)
    }

    /// 最近 max_turns 轮（约 max_turns*2 条）消息；窗口不以孤立的 tool 消息开头，
    /// 且总是包含最后一条 user 消息之后的全部内容（当前轮的问题、委派说明与工具往返）
    pub fn recent(&self, max_turns: usize) -> &[Message] {
        let keep = max_turns.saturating_mul(2).max(1);
        let mut start = self.messages.len().saturating_sub(keep);
        while start < self.messages.len() && self.messages[start].role == Role::Tool {
            start += 1;
        }
        if let Some(current) = self.messages.iter().rposition(|m| m.role == Role::User) {
            start = start.min(current);
        }
        &self.messages[start..]
    }

    /// 窗口之外的较早消息（用于摘要）
    pub fn older_than_window(&self, max_turns: usize) -> &[Message] {
        let window = self.recent(max_turns).len();
        &self.messages[..self.messages.len() - window]
    }
}
