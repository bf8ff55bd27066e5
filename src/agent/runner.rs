//! Agent 运行器：有界的「思考 → 工具 → 观察」循环
//!
//! 每次迭代重新读取会话窗口，因此工具结果（tool 消息）在下一次模型调用中可见。
//! 模型不再请求工具即结束；请求 delegate 立即以委派信号结束；迭代用尽返回提示用户简化问题的通用回复。

use async_trait::async_trait;

use crate::agent::turn::{AgentDeps, TurnContext, TurnEngine};
use crate::agent::{AgentResponse, AgentType};
use crate::core::AgentError;
use crate::routing::Locale;

pub const MAX_AGENT_ITERATIONS: usize = 8;

pub fn iteration_limit_message(locale: Locale) -> &'static str {
    locale.pick(
        "这个问题涉及的步骤有点多，我暂时没能完成。可以把问题拆小一点，或者说得更具体些吗？",
        "This request took too many steps to finish. Could you simplify it or split it into smaller questions?",
    )
}

pub struct AgentRunner {
    deps: AgentDeps,
    max_iterations: usize,
}

impl AgentRunner {
    pub fn new(deps: AgentDeps) -> Self {
        Self {
            deps,
            max_iterations: MAX_AGENT_ITERATIONS,
        }
    }

    pub fn with_max_iterations(mut self, n: usize) -> Self {
        self.max_iterations = n.max(1);
        self
    }
}

#[async_trait]
impl TurnEngine for AgentRunner {
    fn name(&self) -> &'static str {
        "react"
    }

    async fn run_turn(&self, agent: AgentType, ctx: &TurnContext) -> Result<AgentResponse, AgentError> {
        let mut tools_used: Vec<String> = Vec::new();

        for iteration in 1..=self.max_iterations {
            if ctx.cancel.is_cancelled() {
                return Err(AgentError::Cancelled);
            }
            let request = self.deps.build_request(agent, ctx, true, None).await?;
            let reply = self.deps.call_model(&request, agent, ctx).await?;
            tracing::debug!(agent = %agent, iteration, tool_calls = reply.tool_calls.len(), "model replied");

            if !reply.has_tool_calls() {
                return Ok(AgentResponse::new(agent, reply.content)
                    .with_tools(tools_used)
                    .enrich());
            }

            let (delegation, rejected) = self.deps.try_delegate(agent, &reply.tool_calls, ctx).await;
            if let Some(d) = delegation {
                return Ok(AgentResponse::delegation(agent, d).with_tools(tools_used));
            }
            self.deps
                .run_tools(agent, &reply.tool_calls, ctx, rejected, &mut tools_used)
                .await?;
        }

        tracing::warn!(agent = %agent, max = self.max_iterations, "iteration budget exhausted");
        Ok(AgentResponse::new(agent, iteration_limit_message(ctx.locale))
            .with_tools(tools_used)
            .with_data(serde_json::json!({ "iterationLimitReached": true })))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use serde_json::json;

    use crate::agent::turn::testing::deps_with;
    use crate::llm::{ChatResponse, ScriptedLlmClient, ScriptedReply};
    use crate::memory::{Role, ToolCall};
    use crate::store::InMemoryAdmissionsStore;

    fn respond(r: ChatResponse) -> ScriptedReply {
        ScriptedReply::Respond(r)
    }

    #[tokio::test]
    async fn test_tool_then_answer() {
        let llm = Arc::new(ScriptedLlmClient::new(vec![
            respond(ChatResponse::tool_calls(vec![ToolCall::new("search_schools", json!({"country": "US"}))])),
            respond(ChatResponse::text("为你找到了几所学校。")),
        ]));
        let (deps, conv) = deps_with(llm.clone(), Arc::new(InMemoryAdmissionsStore::new())).await;
        let runner = AgentRunner::new(deps.clone());
        let ctx = TurnContext::new("u1", conv.clone(), Locale::Zh);

        let resp = runner.run_turn(AgentType::School, &ctx).await.unwrap();
        assert_eq!(resp.message, "为你找到了几所学校。");
        assert_eq!(resp.tools_used, vec!["search_schools"]);
        assert_eq!(llm.calls(), 2);

        // 第二次请求能看到 tool 结果
        let second = &llm.requests()[1];
        assert!(second.messages.iter().any(|m| m.role == Role::Tool));
        let history = deps.memory.history(&conv, None).await.unwrap();
        assert_eq!(history.len(), 2);
        assert!(history[0].tool_calls.is_some());
    }

    #[tokio::test]
    async fn test_tool_failure_is_fed_back_with_error() {
        let llm = Arc::new(ScriptedLlmClient::new(vec![
            respond(ChatResponse::tool_calls(vec![ToolCall::new(
                "get_school_detail",
                json!({"schoolId": "nowhere"}),
            )])),
            respond(ChatResponse::text("没有找到这所学校。")),
        ]));
        let (deps, conv) = deps_with(llm.clone(), Arc::new(InMemoryAdmissionsStore::new())).await;
        let runner = AgentRunner::new(deps.clone());
        let resp = runner
            .run_turn(AgentType::School, &TurnContext::new("u1", conv.clone(), Locale::Zh))
            .await
            .unwrap();
        assert_eq!(resp.message, "没有找到这所学校。");
        let history = deps.memory.history(&conv, None).await.unwrap();
        let tool_msg = history.iter().find(|m| m.role == Role::Tool).unwrap();
        let v: serde_json::Value = serde_json::from_str(&tool_msg.content).unwrap();
        assert_eq!(v["success"], false);
        assert!(v["error"].as_str().unwrap().contains("nowhere"));
    }

    #[tokio::test]
    async fn test_delegate_short_circuits() {
        let llm = Arc::new(ScriptedLlmClient::new(vec![respond(ChatResponse::tool_calls(vec![
            ToolCall::new("delegate", json!({"target": "essay", "task": "润色个人陈述"})),
            ToolCall::new("get_profile", json!({})),
        ]))]));
        let (deps, conv) = deps_with(llm.clone(), Arc::new(InMemoryAdmissionsStore::new())).await;
        let resp = AgentRunner::new(deps.clone())
            .run_turn(AgentType::Orchestrator, &TurnContext::new("u1", conv.clone(), Locale::Zh))
            .await
            .unwrap();
        let d = resp.delegated_to.unwrap();
        assert_eq!(d.target, AgentType::Essay);
        assert_eq!(llm.calls(), 1);
        // 委派时同批的其他工具不执行
        assert!(deps.memory.history(&conv, None).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_iteration_cap() {
        let llm = Arc::new(ScriptedLlmClient::always(|n, _| {
            ScriptedReply::Respond(ChatResponse::tool_calls(vec![ToolCall::new(
                "search_cases",
                json!({ "limit": n + 1 }),
            )]))
        }));
        let (deps, conv) = deps_with(llm.clone(), Arc::new(InMemoryAdmissionsStore::new())).await;
        let resp = AgentRunner::new(deps)
            .run_turn(AgentType::Case, &TurnContext::new("u1", conv, Locale::En))
            .await
            .unwrap();
        assert_eq!(llm.calls(), MAX_AGENT_ITERATIONS);
        assert_eq!(resp.message, iteration_limit_message(Locale::En));
        assert_eq!(resp.data.unwrap()["iterationLimitReached"], true);
    }

    #[tokio::test]
    async fn test_cancelled_before_model_call() {
        let llm = Arc::new(ScriptedLlmClient::new(Vec::new()));
        let (deps, conv) = deps_with(llm.clone(), Arc::new(InMemoryAdmissionsStore::new())).await;
        let ctx = TurnContext::new("u1", conv, Locale::Zh);
        ctx.cancel.cancel();
        let err = AgentRunner::new(deps).run_turn(AgentType::Profile, &ctx).await.unwrap_err();
        assert!(matches!(err, AgentError::Cancelled));
        assert_eq!(llm.calls(), 0);
    }
}
