//! Mock LLM 客户端（用于测试与无 API Key 的本地运行）
//!
//! - MockLlmClient：回显最后一条 User 消息，不调用工具
//! - ScriptedLlmClient：按预设顺序返回回复 / 错误，并记录每次请求，便于断言调用次数

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;

use crate::llm::{ChatRequest, ChatResponse, LlmClient, LlmError};
use crate::memory::Role;

/// Mock 客户端：回显用户最后一条消息
#[derive(Debug, Default)]
pub struct MockLlmClient;

#[async_trait]
impl LlmClient for MockLlmClient {
    async fn chat(&self, request: &ChatRequest) -> Result<ChatResponse, LlmError> {
        let last_user = request
            .messages
            .iter()
            .rev()
            .find(|m| m.role == Role::User)
            .map(|m| m.content.as_str())
            .unwrap_or("(no input)");
        Ok(ChatResponse::text(format!("（Mock）收到：{}", last_user)))
    }
}

/// 预设回复
#[derive(Debug, Clone)]
pub enum ScriptedReply {
    Respond(ChatResponse),
    Fail(LlmError),
}

type ReplyFn = Box<dyn Fn(usize, &ChatRequest) -> ScriptedReply + Send + Sync>;

/// 脚本化客户端：队列耗尽后使用 fallback 生成器（默认返回「done」）
pub struct ScriptedLlmClient {
    queue: Mutex<VecDeque<ScriptedReply>>,
    fallback: Option<ReplyFn>,
    calls: AtomicUsize,
    requests: Mutex<Vec<ChatRequest>>,
}

impl ScriptedLlmClient {
    pub fn new(replies: Vec<ScriptedReply>) -> Self {
        Self {
            queue: Mutex::new(replies.into()),
            fallback: None,
            calls: AtomicUsize::new(0),
            requests: Mutex::new(Vec::new()),
        }
    }

    /// 仅由生成器产生回复（参数为第几次调用，从 0 开始）
    pub fn always<F>(f: F) -> Self
    where
        F: Fn(usize, &ChatRequest) -> ScriptedReply + Send + Sync + 'static,
    {
        Self::new(Vec::new()).with_fallback(f)
    }

    pub fn with_fallback<F>(mut self, f: F) -> Self
    where
        F: Fn(usize, &ChatRequest) -> ScriptedReply + Send + Sync + 'static,
    {
        self.fallback = Some(Box::new(f));
        self
    }

    /// 已发生的模型调用次数
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// 已记录的请求（按调用顺序）
    pub fn requests(&self) -> Vec<ChatRequest> {
        self.requests
            .lock()
            .map(|r| r.clone())
            .unwrap_or_default()
    }
}

#[async_trait]
impl LlmClient for ScriptedLlmClient {
    async fn chat(&self, request: &ChatRequest) -> Result<ChatResponse, LlmError> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst);
        if let Ok(mut reqs) = self.requests.lock() {
            reqs.push(request.clone());
        }
        let next = self.queue.lock().ok().and_then(|mut q| q.pop_front());
        let reply = match next {
            Some(r) => r,
            None => match &self.fallback {
                Some(f) => f(n, request),
                None => ScriptedReply::Respond(ChatResponse::text("done")),
            },
        };
        match reply {
            ScriptedReply::Respond(r) => Ok(r),
            ScriptedReply::Fail(e) => Err(e),
        }
    }
}
