//! 工作流引擎：Plan → Execute → Solve
//!
//! 与 ReAct 循环相比模型调用次数固定（最多两次）：Plan 阶段一次性给出全部工具调用，
//! Execute 阶段去重后串行执行，Solve 阶段不再下发工具，只基于结果作答。
//! Plan 阶段请求委派时本轮直接以委派信号结束。

use std::time::Instant;

use async_trait::async_trait;

use crate::agent::turn::{AgentDeps, TurnContext, TurnEngine};
use crate::agent::{AgentResponse, AgentType};
use crate::core::AgentError;
use crate::routing::Locale;
use crate::workflow::types::{dedupe_calls, WorkflowPhase, WorkflowTimings};

fn solve_instruction(locale: Locale) -> &'static str {
    locale.pick(
        "# 作答\n工具结果已经在上面的对话中。现在不要再调用任何工具，直接基于这些结果回答学生的问题。",
        "# Answer\nThe tool results are in the conversation above. Do not call any tools now; answer the student directly from those results.",
    )
}

fn empty_answer(locale: Locale) -> &'static str {
    locale.pick(
        "相关信息已经查询完毕，但我暂时没能整理出答案。可以换个问法再试一次吗？",
        "I looked up the relevant information but could not put together an answer. Could you rephrase the question?",
    )
}

pub struct WorkflowEngine {
    deps: AgentDeps,
}

impl WorkflowEngine {
    pub fn new(deps: AgentDeps) -> Self {
        Self { deps }
    }
}

fn elapsed_ms(since: Instant) -> u64 {
    since.elapsed().as_millis() as u64
}

#[async_trait]
impl TurnEngine for WorkflowEngine {
    fn name(&self) -> &'static str {
        "workflow"
    }

    async fn run_turn(&self, agent: AgentType, ctx: &TurnContext) -> Result<AgentResponse, AgentError> {
        let mut timings = WorkflowTimings::default();

        let started = Instant::now();
        let request = self.deps.build_request(agent, ctx, true, None).await?;
        let plan = self.deps.call_model(&request, agent, ctx).await?;
        timings.plan_ms = elapsed_ms(started);

        if !plan.has_tool_calls() {
            tracing::debug!(agent = %agent, phase = WorkflowPhase::Plan.as_str(), "answered without tools");
            return Ok(AgentResponse::new(agent, plan.content)
                .with_data(timings.to_data())
                .enrich());
        }

        let (delegation, rejected) = self.deps.try_delegate(agent, &plan.tool_calls, ctx).await;
        if let Some(d) = delegation {
            return Ok(AgentResponse::delegation(agent, d).with_data(timings.to_data()));
        }

        let calls = dedupe_calls(&plan.tool_calls);
        if calls.len() < plan.tool_calls.len() {
            tracing::debug!(agent = %agent, planned = plan.tool_calls.len(), unique = calls.len(), "duplicate tool calls dropped");
        }
        let started = Instant::now();
        let mut tools_used = Vec::new();
        self.deps
            .run_tools(agent, &calls, ctx, rejected, &mut tools_used)
            .await?;
        timings.execute_ms = elapsed_ms(started);
        timings.tool_calls = calls.len();

        let started = Instant::now();
        let request = self
            .deps
            .build_request(agent, ctx, false, Some(solve_instruction(ctx.locale)))
            .await?;
        let answer = self.deps.call_model(&request, agent, ctx).await?;
        timings.solve_ms = elapsed_ms(started);

        tracing::info!(
            agent = %agent,
            plan_ms = timings.plan_ms,
            execute_ms = timings.execute_ms,
            solve_ms = timings.solve_ms,
            tool_calls = timings.tool_calls,
            "workflow finished"
        );

        let message = if answer.content.trim().is_empty() {
            empty_answer(ctx.locale).to_string()
        } else {
            answer.content
        };
        Ok(AgentResponse::new(agent, message)
            .with_tools(tools_used)
            .with_data(timings.to_data())
            .enrich())
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

    #[tokio::test]
    async fn test_plan_execute_solve() {
        let dup = json!({"country": "UK"});
        let llm = Arc::new(ScriptedLlmClient::new(vec![
            ScriptedReply::Respond(ChatResponse::tool_calls(vec![
                ToolCall::new("search_schools", dup.clone()),
                ToolCall::new("search_schools", dup),
                ToolCall::new("get_profile", json!({})),
            ])),
            ScriptedReply::Respond(ChatResponse::text("英国有几所合适的学校。")),
        ]));
        let (deps, conv) = deps_with(llm.clone(), Arc::new(InMemoryAdmissionsStore::new())).await;
        let resp = WorkflowEngine::new(deps.clone())
            .run_turn(AgentType::School, &TurnContext::new("u1", conv.clone(), Locale::Zh))
            .await
            .unwrap();

        assert_eq!(resp.message, "英国有几所合适的学校。");
        assert_eq!(resp.tools_used, vec!["search_schools", "get_profile"]);
        assert_eq!(resp.data.unwrap()["workflow"]["tool_calls"], 2);

        let requests = llm.requests();
        assert_eq!(requests.len(), 2);
        assert!(!requests[0].tools.is_empty());
        assert!(requests[1].tools.is_empty());

        let history = deps.memory.history(&conv, None).await.unwrap();
        assert_eq!(history.iter().filter(|m| m.role == Role::Tool).count(), 2);
    }

    #[tokio::test]
    async fn test_direct_answer_skips_solve() {
        let llm = Arc::new(ScriptedLlmClient::new(vec![ScriptedReply::Respond(ChatResponse::text(
            "申请季一般从九月开始。",
        ))]));
        let (deps, conv) = deps_with(llm.clone(), Arc::new(InMemoryAdmissionsStore::new())).await;
        let resp = WorkflowEngine::new(deps)
            .run_turn(AgentType::Timeline, &TurnContext::new("u1", conv, Locale::Zh))
            .await
            .unwrap();
        assert_eq!(llm.calls(), 1);
        assert_eq!(resp.data.unwrap()["workflow"]["tool_calls"], 0);
    }

    #[tokio::test]
    async fn test_delegation_during_plan() {
        let llm = Arc::new(ScriptedLlmClient::new(vec![ScriptedReply::Respond(ChatResponse::tool_calls(
            vec![ToolCall::new("delegate", json!({"target": "case", "task": "找类似背景的案例"}))],
        ))]));
        let (deps, conv) = deps_with(llm.clone(), Arc::new(InMemoryAdmissionsStore::new())).await;
        let resp = WorkflowEngine::new(deps)
            .run_turn(AgentType::School, &TurnContext::new("u1", conv, Locale::Zh))
            .await
            .unwrap();
        assert_eq!(resp.delegated_to.unwrap().target, AgentType::Case);
        assert_eq!(llm.calls(), 1);
    }
}
