//! 编排器：对外的唯一入口
//!
//! 处理一条用户消息：
//! 1. 取得或创建会话，按消息检测语言
//! 2. 极短寒暄直接给固定回复（不调用模型、不调用工具）
//! 3. 快速路由命中则直接交给对应专家 Agent，否则由总控 Agent 处理
//! 4. 以工作栈驱动委派链，每次委派写入系统说明并推送 agent_switch；深度超限给出明确提示
//! 5. 最终回复写入会话；任何其他错误都经 FallbackService 转为降级回复，不向调用方抛出
//!
//! 请求/响应与流式两条路径共用同一段处理逻辑，区别只在于是否带事件通道。

use std::sync::Arc;

use serde_json::json;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::agent::prompt::delegation_note;
use crate::agent::{AgentResponse, AgentType, TurnContext, TurnEngine};
use crate::core::delegation::{DelegationStack, DEFAULT_MAX_DELEGATION_DEPTH};
use crate::core::fallback::FallbackService;
use crate::core::stream::{EventSink, EventStream, StreamEvent};
use crate::core::AgentError;
use crate::memory::{MemoryManager, Message};
use crate::routing::{FastRouter, Locale};
use crate::store::StoreError;

/// 一次处理请求
struct TurnRequest {
    user_id: String,
    message: String,
    conversation_id: Option<String>,
    /// 指定时跳过路由
    agent: Option<AgentType>,
}

pub fn delegation_too_deep_message(locale: Locale) -> &'static str {
    locale.pick(
        "这个问题在几位助手之间转交了太多次，我先停在这里。可以把你的问题说得更具体一些吗？",
        "This request was handed between assistants too many times, so I stopped here. Could you make the question more specific?",
    )
}

pub struct Orchestrator {
    router: FastRouter,
    engine: Arc<dyn TurnEngine>,
    memory: Arc<MemoryManager>,
    fallback: FallbackService,
    max_delegation_depth: usize,
}

impl Orchestrator {
    pub fn new(router: FastRouter, engine: Arc<dyn TurnEngine>, memory: Arc<MemoryManager>) -> Self {
        Self {
            router,
            engine,
            memory,
            fallback: FallbackService::new(),
            max_delegation_depth: DEFAULT_MAX_DELEGATION_DEPTH,
        }
    }

    pub fn with_max_delegation_depth(mut self, depth: usize) -> Self {
        self.max_delegation_depth = depth;
        self
    }

    pub fn engine_name(&self) -> &'static str {
        self.engine.name()
    }

    pub fn memory(&self) -> &Arc<MemoryManager> {
        &self.memory
    }

    pub async fn handle_message(&self, user_id: &str, message: &str, conversation_id: Option<&str>) -> AgentResponse {
        let req = TurnRequest {
            user_id: user_id.to_string(),
            message: message.to_string(),
            conversation_id: conversation_id.map(String::from),
            agent: None,
        };
        self.process(req, None, CancellationToken::new()).await
    }

    /// 跳过路由，直接由指定 Agent 处理（仍允许其继续委派）
    pub async fn call_agent(
        &self,
        user_id: &str,
        agent: AgentType,
        message: &str,
        conversation_id: Option<&str>,
    ) -> AgentResponse {
        let req = TurnRequest {
            user_id: user_id.to_string(),
            message: message.to_string(),
            conversation_id: conversation_id.map(String::from),
            agent: Some(agent),
        };
        self.process(req, None, CancellationToken::new()).await
    }

    /// 流式处理：事件以 done 结束；丢弃返回的流即取消后台处理
    pub fn handle_message_stream(
        self: &Arc<Self>,
        user_id: impl Into<String>,
        message: impl Into<String>,
        conversation_id: Option<String>,
    ) -> EventStream {
        self.spawn_stream(TurnRequest {
            user_id: user_id.into(),
            message: message.into(),
            conversation_id,
            agent: None,
        })
    }

    pub fn call_agent_stream(
        self: &Arc<Self>,
        user_id: impl Into<String>,
        agent: AgentType,
        message: impl Into<String>,
        conversation_id: Option<String>,
    ) -> EventStream {
        self.spawn_stream(TurnRequest {
            user_id: user_id.into(),
            message: message.into(),
            conversation_id,
            agent: Some(agent),
        })
    }

    fn spawn_stream(self: &Arc<Self>, req: TurnRequest) -> EventStream {
        let (tx, rx) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();
        let guard = cancel.clone().drop_guard();
        let this = Arc::clone(self);
        tokio::spawn(async move {
            this.process(req, Some(tx), cancel).await;
        });
        EventStream::new(rx, guard)
    }

    /// 会话历史（按写入顺序）；会话不属于该用户时返回 Forbidden
    pub async fn get_history(
        &self,
        user_id: &str,
        conversation_id: &str,
        limit: Option<usize>,
    ) -> Result<Vec<Message>, AgentError> {
        self.check_owner(user_id, conversation_id).await?;
        self.memory.history(conversation_id, limit).await
    }

    pub async fn clear_conversation(&self, user_id: &str, conversation_id: &str) -> Result<bool, AgentError> {
        match self.check_owner(user_id, conversation_id).await {
            Ok(()) => self.memory.clear(conversation_id).await,
            Err(AgentError::Storage(StoreError::NotFound(_))) => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// 重新加载档案快照（用户在别处修改档案后调用）
    pub async fn refresh_context(&self, user_id: &str, conversation_id: &str) -> Result<(), AgentError> {
        self.check_owner(user_id, conversation_id).await?;
        self.memory.refresh_context(user_id, conversation_id, None).await
    }

    async fn check_owner(&self, user_id: &str, conversation_id: &str) -> Result<(), AgentError> {
        let state = self
            .memory
            .state(conversation_id)
            .await?
            .ok_or_else(|| StoreError::NotFound(format!("conversation {conversation_id}")))?;
        if state.user_id != user_id {
            return Err(StoreError::Forbidden {
                id: conversation_id.to_string(),
            }
            .into());
        }
        Ok(())
    }

    async fn process(&self, req: TurnRequest, events: Option<EventSink>, cancel: CancellationToken) -> AgentResponse {
        let locale = Locale::detect(&req.message);
        let conversation = match self
            .memory
            .get_or_create(&req.user_id, req.conversation_id.as_deref())
            .await
        {
            Ok(c) => c,
            Err(e) => {
                let ctx = TurnContext::new(req.user_id.as_str(), "", locale);
                let ctx = match events {
                    Some(tx) => ctx.with_events(tx),
                    None => ctx,
                };
                return self.fail(&ctx, &e, AgentType::Orchestrator);
            }
        };

        let mut ctx = TurnContext::new(req.user_id.as_str(), conversation.id.as_str(), locale).with_cancel(cancel);
        if let Some(tx) = events {
            ctx = ctx.with_events(tx);
        }

        if req.agent.is_none() {
            if let Some(reply) = self.router.get_simple_response(&req.message, locale) {
                return self.simple_reply(&ctx, &req.message, reply).await;
            }
        }

        let start = req.agent.unwrap_or_else(|| {
            let routed = self.router.route(&req.message);
            match routed.agent {
                Some(agent) if !routed.should_use_llm => {
                    tracing::info!(
                        agent = %agent,
                        confidence = routed.confidence,
                        keywords = ?routed.matched_keywords,
                        "fast routed"
                    );
                    agent
                }
                _ => AgentType::Orchestrator,
            }
        });
        ctx.emit(StreamEvent::Start {
            conversation_id: ctx.conversation_id.clone(),
            agent: start,
        });

        let mut current = start;
        let result = self
            .prepare(&ctx, &req.message, conversation.messages.is_empty())
            .await;
        let result = match result {
            Ok(()) => self.run_chain(&ctx, start, &mut current).await,
            Err(e) => Err(e),
        };
        self.finish(&ctx, result, current).await
    }

    /// 写入用户消息；新会话加载档案快照，旧会话只更新语言
    async fn prepare(&self, ctx: &TurnContext, message: &str, is_new: bool) -> Result<(), AgentError> {
        self.memory
            .add_message(&ctx.conversation_id, Message::user(message))
            .await?;
        if is_new {
            self.memory
                .refresh_context(&ctx.user_id, &ctx.conversation_id, Some(ctx.locale))
                .await
        } else {
            self.memory.set_locale(&ctx.conversation_id, ctx.locale).await
        }
    }

    async fn simple_reply(&self, ctx: &TurnContext, message: &str, reply: String) -> AgentResponse {
        let agent = AgentType::Orchestrator;
        ctx.emit(StreamEvent::Start {
            conversation_id: ctx.conversation_id.clone(),
            agent,
        });
        let persisted = async {
            self.memory
                .add_message(&ctx.conversation_id, Message::user(message))
                .await?;
            self.memory
                .add_message(&ctx.conversation_id, Message::assistant(reply.as_str()).with_agent(agent))
                .await
        };
        if let Err(e) = persisted.await {
            return self.fail(ctx, &e, agent);
        }
        ctx.emit(StreamEvent::Content {
            agent,
            content: reply.clone(),
        });
        let mut response = AgentResponse::new(agent, reply);
        response.conversation_id = Some(ctx.conversation_id.clone());
        ctx.emit(StreamEvent::Done {
            response: response.clone(),
        });
        response
    }

    /// 委派链：逐帧执行，直到某个 Agent 给出最终回复
    async fn run_chain(
        &self,
        ctx: &TurnContext,
        start: AgentType,
        current: &mut AgentType,
    ) -> Result<AgentResponse, AgentError> {
        let mut stack = DelegationStack::new(start, self.max_delegation_depth);
        let mut tools_used: Vec<String> = Vec::new();

        while let Some(frame) = stack.pop() {
            *current = frame.agent;
            tracing::debug!(agent = %frame.agent, depth = frame.depth, engine = self.engine.name(), "running agent");
            let mut response = self.engine.run_turn(frame.agent, ctx).await?;
            for tool in response.tools_used.drain(..) {
                if !tools_used.contains(&tool) {
                    tools_used.push(tool);
                }
            }

            let Some(delegation) = response.delegated_to.take() else {
                response.tools_used = tools_used;
                return Ok(response);
            };
            let next = stack.delegate(&frame, &delegation)?;
            let note = delegation_note(frame.agent, delegation.target, &delegation.task, delegation.reason.as_deref());
            self.memory
                .add_message(&ctx.conversation_id, Message::system(note).with_agent(frame.agent))
                .await?;
            tracing::info!(
                from = %frame.agent,
                to = %delegation.target,
                depth = next.depth,
                path = %stack.path_string(),
                "delegated"
            );
            ctx.emit(StreamEvent::AgentSwitch {
                from: frame.agent,
                to: delegation.target,
                task: delegation.task,
                depth: next.depth,
            });
        }
        Err(AgentError::InvalidDelegation("delegation stack drained without a reply".to_string()))
    }

    async fn finish(
        &self,
        ctx: &TurnContext,
        result: Result<AgentResponse, AgentError>,
        current: AgentType,
    ) -> AgentResponse {
        match result {
            Ok(mut response) => {
                if !response.message.is_empty() {
                    let stored = Message::assistant(response.message.as_str()).with_agent(response.agent_type);
                    if let Err(e) = self.memory.add_message(&ctx.conversation_id, stored).await {
                        return self.fail(ctx, &e, response.agent_type);
                    }
                }
                if let Err(e) = self.memory.maybe_summarize(&ctx.conversation_id).await {
                    tracing::warn!(error = %e, "summary refresh failed");
                }
                response.conversation_id = Some(ctx.conversation_id.clone());
                ctx.emit(StreamEvent::Done {
                    response: response.clone(),
                });
                response
            }
            Err(AgentError::DelegationTooDeep { attempted, max }) => {
                let mut response = AgentResponse::new(AgentType::Orchestrator, delegation_too_deep_message(ctx.locale))
                    .with_data(json!({ "error": "delegation_too_deep", "attempted": attempted, "maxDepth": max }));
                response.conversation_id = Some(ctx.conversation_id.clone());
                let stored = Message::assistant(response.message.as_str()).with_agent(AgentType::Orchestrator);
                if let Err(e) = self.memory.add_message(&ctx.conversation_id, stored).await {
                    tracing::warn!(error = %e, "failed to persist depth notice");
                }
                ctx.emit(StreamEvent::Error {
                    message: response.message.clone(),
                    code: "delegation_too_deep".to_string(),
                });
                ctx.emit(StreamEvent::Done {
                    response: response.clone(),
                });
                response
            }
            Err(AgentError::Cancelled) => {
                tracing::info!(conversation = %ctx.conversation_id, agent = %current, "stream consumer gone, turn cancelled");
                let mut response = AgentResponse::new(current, String::new());
                response.conversation_id = Some(ctx.conversation_id.clone());
                response
            }
            Err(e) => self.fail(ctx, &e, current),
        }
    }

    /// 降级回复，并在流上给出 error + done
    fn fail(&self, ctx: &TurnContext, err: &AgentError, agent: AgentType) -> AgentResponse {
        let category = self.fallback.categorize(err);
        let mut response = self.fallback.respond(err, agent, ctx.locale);
        if !ctx.conversation_id.is_empty() {
            response.conversation_id = Some(ctx.conversation_id.clone());
        }
        ctx.emit(StreamEvent::Error {
            message: response.message.clone(),
            code: category.as_str().to_string(),
        });
        ctx.emit(StreamEvent::Done {
            response: response.clone(),
        });
        response
    }
}
