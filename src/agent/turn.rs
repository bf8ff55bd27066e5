//! 单个 Agent 一轮处理的公共部分
//!
//! TurnEngine 是执行模式的接缝（ReAct 循环 AgentRunner / 三段式 WorkflowEngine），两者共享 AgentDeps：
//! 组装请求（system prompt + 上下文摘要 + 会话窗口 + 工具 schema）、调用模型（可流式）、委派判定、串行执行工具。

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use futures_util::StreamExt;
use tokio_util::sync::CancellationToken;

use crate::agent::prompt::build_system_prompt;
use crate::agent::{AgentResponse, AgentType, Delegation};
use crate::core::fallback::FallbackService;
use crate::core::resilience::RetryPolicy;
use crate::core::stream::{send_event, EventSink, StreamEvent};
use crate::core::AgentError;
use crate::llm::{ChatChunk, ChatRequest, ChatResponse, LlmClient, LlmError};
use crate::memory::{MemoryManager, Message, ToolCall};
use crate::routing::Locale;
use crate::tools::{ToolContext, ToolExecutionResult, ToolExecutor, DELEGATE_TOOL};

/// 每个 Agent 的 prompt 模板；未覆盖时使用内置模板
#[derive(Debug, Clone, Default)]
pub struct PromptSet {
    overrides: HashMap<AgentType, String>,
}

impl PromptSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_override(mut self, agent: AgentType, template: impl Into<String>) -> Self {
        self.overrides.insert(agent, template.into());
        self
    }

    pub fn template(&self, agent: AgentType) -> &str {
        self.overrides
            .get(&agent)
            .map(String::as_str)
            .unwrap_or(agent.config().prompt_template)
    }
}

/// 配置中的全局采样参数：temperature 覆盖各 Agent 默认值，max_tokens 作为上限
#[derive(Debug, Clone, Copy, Default)]
pub struct ModelOverrides {
    pub temperature: Option<f32>,
    pub max_tokens: Option<u32>,
}

/// 一轮处理的调用方上下文
#[derive(Clone)]
pub struct TurnContext {
    pub user_id: String,
    pub conversation_id: String,
    pub locale: Locale,
    pub cancel: CancellationToken,
    pub events: Option<EventSink>,
}

impl TurnContext {
    pub fn new(user_id: impl Into<String>, conversation_id: impl Into<String>, locale: Locale) -> Self {
        Self {
            user_id: user_id.into(),
            conversation_id: conversation_id.into(),
            locale,
            cancel: CancellationToken::new(),
            events: None,
        }
    }

    pub fn with_events(mut self, sink: EventSink) -> Self {
        self.events = Some(sink);
        self
    }

    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn emit(&self, event: StreamEvent) {
        send_event(self.events.as_ref(), event);
    }

    fn tool_context(&self, agent: AgentType) -> ToolContext {
        ToolContext::new(agent).with_conversation(self.conversation_id.clone())
    }
}

/// 执行模式接缝
#[async_trait]
pub trait TurnEngine: Send + Sync {
    fn name(&self) -> &'static str;

    /// 以 agent 身份处理会话中最新的请求（用户消息或委派说明已写入会话）
    async fn run_turn(&self, agent: AgentType, ctx: &TurnContext) -> Result<AgentResponse, AgentError>;
}

/// 执行一轮所需的协作者
#[derive(Clone)]
pub struct AgentDeps {
    pub llm: Arc<dyn LlmClient>,
    pub executor: Arc<ToolExecutor>,
    pub memory: Arc<MemoryManager>,
    pub prompts: Arc<PromptSet>,
    pub overrides: ModelOverrides,
    /// 模型调用失败时的重试策略
    pub model_retry: RetryPolicy,
}

impl AgentDeps {
    /// agent 可用的工具名；有委派目标时附加 delegate
    pub fn tool_names_for(agent: AgentType) -> Vec<&'static str> {
        let cfg = agent.config();
        let mut names: Vec<&'static str> = cfg.tools.to_vec();
        if !cfg.can_delegate_to.is_empty() {
            names.push(DELEGATE_TOOL);
        }
        names
    }

    /// with_tools = false 时不下发任何工具（Solve 阶段）
    pub async fn build_request(
        &self,
        agent: AgentType,
        ctx: &TurnContext,
        with_tools: bool,
        extra_instruction: Option<&str>,
    ) -> Result<ChatRequest, AgentError> {
        let cfg = agent.config();
        let summary = self.memory.context_summary(&ctx.conversation_id).await?;
        let mut system = build_system_prompt(self.prompts.template(agent), cfg, &summary, ctx.locale);
        if let Some(extra) = extra_instruction {
            system.push('\n');
            system.push_str(extra);
        }
        let tools = if with_tools {
            self.executor.registry().schemas_for(&Self::tool_names_for(agent))
        } else {
            Vec::new()
        };
        Ok(ChatRequest {
            system,
            messages: self.memory.window(&ctx.conversation_id).await?,
            tools,
            temperature: self.overrides.temperature.unwrap_or(cfg.temperature),
            max_tokens: self
                .overrides
                .max_tokens
                .map_or(cfg.max_tokens, |cap| cap.min(cfg.max_tokens)),
        })
    }

    /// 有事件通道时走流式并推送 content 事件；调用方取消时返回 Cancelled
    pub async fn call_model(
        &self,
        request: &ChatRequest,
        agent: AgentType,
        ctx: &TurnContext,
    ) -> Result<ChatResponse, AgentError> {
        if ctx.events.is_none() {
            return self.with_model_retry(agent, ctx, || self.llm.chat(request)).await;
        }

        let mut stream = self
            .with_model_retry(agent, ctx, || self.llm.chat_stream(request))
            .await?;
        let mut response = ChatResponse::default();
        loop {
            let next = tokio::select! {
                biased;
                _ = ctx.cancel.cancelled() => return Err(AgentError::Cancelled),
                item = stream.next() => item,
            };
            match next {
                None => break,
                Some(Ok(ChatChunk::Text(text))) => {
                    ctx.emit(StreamEvent::Content {
                        agent,
                        content: text.clone(),
                    });
                    response.content.push_str(&text);
                }
                Some(Ok(ChatChunk::ToolCall(call))) => response.tool_calls.push(call),
                Some(Err(e)) => return Err(e.into()),
            }
        }
        Ok(response)
    }

    /// 模型调用失败且类别可重试（timeout / network / unknown）时按 RetryPolicy 重试；
    /// 只包住请求本身，流式输出开始后的错误不重试
    async fn with_model_retry<T, F, Fut>(&self, agent: AgentType, ctx: &TurnContext, mut call: F) -> Result<T, AgentError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, LlmError>>,
    {
        let fallback = FallbackService::new();
        let mut attempt = 0;
        loop {
            let result = tokio::select! {
                biased;
                _ = ctx.cancel.cancelled() => return Err(AgentError::Cancelled),
                r = call() => r,
            };
            let err = match result {
                Ok(v) => return Ok(v),
                Err(e) => AgentError::LlmError(e),
            };
            let category = fallback.categorize(&err);
            if attempt >= self.model_retry.max_retries || !fallback.should_retry(category) {
                return Err(err);
            }
            let delay = self.model_retry.delay_for(attempt);
            tracing::warn!(
                agent = %agent,
                attempt,
                category = category.as_str(),
                error = %err,
                "model call failed, retrying"
            );
            attempt += 1;
            tokio::select! {
                biased;
                _ = ctx.cancel.cancelled() => return Err(AgentError::Cancelled),
                _ = tokio::time::sleep(delay) => {}
            }
        }
    }

    /// 若本批调用中含 delegate：合法时返回委派信号；不合法时返回其错误结果，稍后作为 tool 消息回传
    pub async fn try_delegate(
        &self,
        agent: AgentType,
        calls: &[ToolCall],
        ctx: &TurnContext,
    ) -> (Option<Delegation>, Option<ToolExecutionResult>) {
        let Some(call) = calls.iter().find(|c| c.name == DELEGATE_TOOL) else {
            return (None, None);
        };
        let result = self
            .executor
            .execute(call, &ctx.user_id, &ctx.tool_context(agent))
            .await;
        match result.delegation.clone() {
            Some(d) => {
                tracing::info!(from = %agent, to = %d.target, "delegation requested");
                (Some(d), None)
            }
            None => (None, Some(result)),
        }
    }

    /// 写入带工具调用的 assistant 消息，再逐个（串行）执行并写入 tool 消息
    pub async fn run_tools(
        &self,
        agent: AgentType,
        calls: &[ToolCall],
        ctx: &TurnContext,
        mut delegate_result: Option<ToolExecutionResult>,
        tools_used: &mut Vec<String>,
    ) -> Result<Vec<ToolExecutionResult>, AgentError> {
        self.memory
            .add_message(
                &ctx.conversation_id,
                Message::assistant("")
                    .with_agent(agent)
                    .with_tool_calls(calls.to_vec()),
            )
            .await?;

        let tool_ctx = ctx.tool_context(agent);
        let mut results = Vec::with_capacity(calls.len());
        for call in calls {
            if ctx.cancel.is_cancelled() {
                return Err(AgentError::Cancelled);
            }
            ctx.emit(StreamEvent::ToolStart {
                agent,
                tool: call.name.clone(),
                tool_call_id: call.id.clone(),
            });
            let result = match delegate_result.take_if(|r| r.tool_call_id == call.id) {
                Some(r) => r,
                None => self.executor.execute(call, &ctx.user_id, &tool_ctx).await,
            };
            ctx.emit(StreamEvent::ToolEnd {
                agent,
                tool: call.name.clone(),
                tool_call_id: call.id.clone(),
                success: result.success,
                duration_ms: result.duration_ms,
                error: result.error.clone(),
            });
            self.memory
                .add_message(
                    &ctx.conversation_id,
                    Message::tool(call.id.clone(), result.to_message_content()).with_agent(agent),
                )
                .await?;
            if !tools_used.contains(&call.name) {
                tools_used.push(call.name.clone());
            }
            results.push(result);
        }
        Ok(results)
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use crate::memory::{InMemoryConversationStore, MemorySettings};
    use crate::store::InMemoryAdmissionsStore;
    use crate::tools::{builtin_handlers, ToolRegistry};

    /// 内存存储 + 内置工具的最小依赖集合，返回 (deps, 已创建的会话 ID)
    pub async fn deps_with(llm: Arc<dyn LlmClient>, store: Arc<InMemoryAdmissionsStore>) -> (AgentDeps, String) {
        let registry = Arc::new(ToolRegistry::with_builtin_tools().unwrap());
        let executor = ToolExecutor::new(registry, builtin_handlers(store.clone()));
        let memory = MemoryManager::new(
            Arc::new(InMemoryConversationStore::default()),
            store,
            MemorySettings::default(),
        )
        .unwrap();
        let conv = memory.get_or_create("u1", None).await.unwrap();
        let deps = AgentDeps {
            llm,
            executor: Arc::new(executor),
            memory: Arc::new(memory),
            prompts: Arc::new(PromptSet::new()),
            overrides: ModelOverrides::default(),
            model_retry: RetryPolicy::none(),
        };
        (deps, conv.id)
    }
}
