//! 编排器集成测试：脚本化模型 + 内存业务存储，驱动公开 API

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use futures_util::StreamExt;
use serde_json::json;

use liuxue::agent::runner::iteration_limit_message;
use liuxue::agent::{AgentType, MAX_AGENT_ITERATIONS};
use liuxue::config::{AppConfig, ExecutionMode, MemoryBackend};
use liuxue::core::{AgentError, Orchestrator, OrchestratorBuilder, StreamEvent};
use liuxue::llm::{ChatResponse, LlmError, ScriptedLlmClient, ScriptedReply};
use liuxue::memory::{Role, ToolCall};
use liuxue::routing::Locale;
use liuxue::store::{
    AdmissionCase, AdmissionsStore, CaseQuery, Essay, InMemoryAdmissionsStore, PolishTicket, Profile,
    ProfileUpdate, School, SchoolQuery, StoreError, TimelineEvent,
};

fn config(mode: ExecutionMode) -> AppConfig {
    let mut cfg = AppConfig::default();
    cfg.orchestrator.execution_mode = mode;
    cfg.llm.max_retries = 0;
    cfg.tools.retry.initial_delay_ms = 1;
    cfg.tools.retry.max_delay_ms = 2;
    cfg
}

fn build(mode: ExecutionMode, llm: Arc<ScriptedLlmClient>, store: Arc<dyn AdmissionsStore>) -> Arc<Orchestrator> {
    build_with(config(mode), llm, store)
}

fn build_with(cfg: AppConfig, llm: Arc<ScriptedLlmClient>, store: Arc<dyn AdmissionsStore>) -> Arc<Orchestrator> {
    Arc::new(
        OrchestratorBuilder::new(cfg)
            .with_llm(llm)
            .with_admissions_store(store)
            .build()
            .unwrap(),
    )
}

fn text(s: &str) -> ScriptedReply {
    ScriptedReply::Respond(ChatResponse::text(s))
}

fn call(name: &str, args: serde_json::Value) -> ScriptedReply {
    ScriptedReply::Respond(ChatResponse::tool_calls(vec![ToolCall::new(name, args)]))
}

fn kinds(events: &[StreamEvent]) -> Vec<&'static str> {
    events.iter().map(|e| e.kind()).collect()
}

#[tokio::test]
async fn test_greeting_needs_no_model() {
    let llm = Arc::new(ScriptedLlmClient::new(Vec::new()));
    let orch = build(ExecutionMode::Workflow, llm.clone(), Arc::new(InMemoryAdmissionsStore::new()));

    let resp = orch.handle_message("u1", "你好", None).await;
    assert_eq!(resp.agent_type, AgentType::Orchestrator);
    assert!(resp.message.contains("留学"));
    assert!(resp.tools_used.is_empty());
    assert_eq!(llm.calls(), 0);

    let id = resp.conversation_id.unwrap();
    let history = orch.get_history("u1", &id, None).await.unwrap();
    assert_eq!(history.len(), 2);

    let events: Vec<StreamEvent> = orch.handle_message_stream("u1", "thanks", Some(id)).collect().await;
    assert_eq!(kinds(&events), vec!["start", "content", "done"]);
    assert_eq!(llm.calls(), 0);
}

#[tokio::test]
async fn test_high_confidence_essay_message_skips_orchestrator() {
    let llm = Arc::new(ScriptedLlmClient::always(|_, _| {
        ScriptedReply::Respond(ChatResponse::text("好的，先把你的个人陈述发给我看看。"))
    }));
    let orch = build(ExecutionMode::Workflow, llm.clone(), Arc::new(InMemoryAdmissionsStore::new()));

    let resp = orch
        .handle_message("u1", "帮我润色一下文书，这篇个人陈述还要修改", None)
        .await;
    assert_eq!(resp.agent_type, AgentType::Essay);
    assert_eq!(llm.calls(), 1);

    let request = &llm.requests()[0];
    let tools: Vec<&str> = request.tools.iter().map(|t| t.name.as_str()).collect();
    assert!(tools.contains(&"polish_essay"));
    assert!(!tools.contains(&"search_cases"));

    let history = orch.get_history("u1", &resp.conversation_id.unwrap(), None).await.unwrap();
    assert_eq!(history.last().unwrap().agent_type, Some(AgentType::Essay));
}

#[tokio::test]
async fn test_tool_failure_keeps_turn_alive() {
    let llm = Arc::new(ScriptedLlmClient::new(vec![
        call("get_essay", json!({"essayId": "missing"})),
        text("没有找到这篇文书，可以确认一下吗？"),
    ]));
    let orch = build(ExecutionMode::React, llm.clone(), Arc::new(InMemoryAdmissionsStore::new()));

    let resp = orch.call_agent("u1", AgentType::Essay, "看看我那篇文书", None).await;
    assert_eq!(resp.message, "没有找到这篇文书，可以确认一下吗？");
    assert_eq!(resp.tools_used, vec!["get_essay"]);

    let history = orch.get_history("u1", &resp.conversation_id.unwrap(), None).await.unwrap();
    let tool_msg = history.iter().find(|m| m.role == Role::Tool).unwrap();
    let content: serde_json::Value = serde_json::from_str(&tool_msg.content).unwrap();
    assert_eq!(content["success"], false);
    assert!(content["error"].as_str().unwrap().contains("missing"));
}

#[tokio::test]
async fn test_delegation_chain_stops_at_fourth_hop() {
    let llm = Arc::new(ScriptedLlmClient::always(|n, _| {
        let target = if n % 2 == 0 { "essay" } else { "orchestrator" };
        ScriptedReply::Respond(ChatResponse::tool_calls(vec![ToolCall::new(
            "delegate",
            json!({ "target": target, "task": format!("hop {}", n + 1) }),
        )]))
    }));
    let orch = build(ExecutionMode::Workflow, llm.clone(), Arc::new(InMemoryAdmissionsStore::new()));

    let events: Vec<StreamEvent> = orch
        .handle_message_stream("u1", "我最近压力很大，不知道从哪里开始", None)
        .collect()
        .await;
    assert_eq!(
        kinds(&events),
        vec!["start", "agent_switch", "agent_switch", "agent_switch", "error", "done"]
    );
    let depths: Vec<usize> = events
        .iter()
        .filter_map(|e| match e {
            StreamEvent::AgentSwitch { depth, .. } => Some(*depth),
            _ => None,
        })
        .collect();
    assert_eq!(depths, vec![1, 2, 3]);
    assert_eq!(llm.calls(), 4);

    match &events[4] {
        StreamEvent::Error { code, .. } => assert_eq!(code, "delegation_too_deep"),
        other => panic!("unexpected event {other:?}"),
    }
    let StreamEvent::Done { response } = &events[5] else {
        panic!("last event must be done");
    };
    assert_eq!(response.data.as_ref().unwrap()["error"], "delegation_too_deep");

    let history = orch
        .get_history("u1", response.conversation_id.as_deref().unwrap(), None)
        .await
        .unwrap();
    assert_eq!(history.iter().filter(|m| m.role == Role::System).count(), 3);
}

#[tokio::test]
async fn test_request_response_delegation_reaches_specialist() {
    let llm = Arc::new(ScriptedLlmClient::new(vec![
        call("delegate", json!({"target": "timeline", "task": "整理截止日期", "reason": "时间问题"})),
        text("你最近的截止日期在下个月。"),
    ]));
    let orch = build(ExecutionMode::Workflow, llm.clone(), Arc::new(InMemoryAdmissionsStore::new()));

    let resp = orch.handle_message("u1", "我最近压力很大，不知道从哪里开始", None).await;
    assert_eq!(resp.agent_type, AgentType::Timeline);
    assert_eq!(resp.message, "你最近的截止日期在下个月。");
    // 被委派的 Agent 能看到委派说明
    let second = &llm.requests()[1];
    assert!(second
        .messages
        .iter()
        .any(|m| m.role == Role::System && m.content.contains("整理截止日期")));
}

#[tokio::test]
async fn test_iteration_budget_in_react_mode() {
    let llm = Arc::new(ScriptedLlmClient::always(|n, _| {
        ScriptedReply::Respond(ChatResponse::tool_calls(vec![ToolCall::new(
            "search_cases",
            json!({ "limit": n + 1 }),
        )]))
    }));
    let orch = build(ExecutionMode::React, llm.clone(), Arc::new(InMemoryAdmissionsStore::new()));

    let resp = orch.call_agent("u1", AgentType::Case, "find cases like mine", None).await;
    assert_eq!(llm.calls(), MAX_AGENT_ITERATIONS);
    assert_eq!(resp.message, iteration_limit_message(Locale::En));
}

/// 档案更新总是失败并计数，其余委托给内存实现
struct FailingProfileStore {
    inner: InMemoryAdmissionsStore,
    updates: AtomicUsize,
}

#[async_trait]
impl AdmissionsStore for FailingProfileStore {
    async fn get_profile(&self, user_id: &str) -> Result<Option<Profile>, StoreError> {
        self.inner.get_profile(user_id).await
    }

    async fn update_profile(&self, _user_id: &str, _update: &ProfileUpdate) -> Result<Profile, StoreError> {
        self.updates.fetch_add(1, Ordering::SeqCst);
        Err(StoreError::Backend("db down".into()))
    }

    async fn search_schools(&self, query: &SchoolQuery) -> Result<Vec<School>, StoreError> {
        self.inner.search_schools(query).await
    }

    async fn get_school(&self, school_id: &str) -> Result<Option<School>, StoreError> {
        self.inner.get_school(school_id).await
    }

    async fn list_essays(&self, user_id: &str) -> Result<Vec<Essay>, StoreError> {
        self.inner.list_essays(user_id).await
    }

    async fn get_essay(&self, user_id: &str, essay_id: &str) -> Result<Option<Essay>, StoreError> {
        self.inner.get_essay(user_id, essay_id).await
    }

    async fn request_polish(&self, user_id: &str, essay_id: &str, focus: Option<&str>) -> Result<PolishTicket, StoreError> {
        self.inner.request_polish(user_id, essay_id, focus).await
    }

    async fn search_cases(&self, query: &CaseQuery) -> Result<Vec<AdmissionCase>, StoreError> {
        self.inner.search_cases(query).await
    }

    async fn get_timeline(&self, user_id: &str) -> Result<Vec<TimelineEvent>, StoreError> {
        self.inner.get_timeline(user_id).await
    }
}

#[tokio::test]
async fn test_non_retryable_tool_runs_once() {
    let store = Arc::new(FailingProfileStore {
        inner: InMemoryAdmissionsStore::new(),
        updates: AtomicUsize::new(0),
    });
    let llm = Arc::new(ScriptedLlmClient::new(vec![
        call("update_profile", json!({"gpa": 3.7})),
        text("更新失败了，请稍后再试。"),
    ]));
    let orch = build(ExecutionMode::React, llm, store.clone());

    let resp = orch.call_agent("u1", AgentType::Profile, "把我的GPA改成3.7", None).await;
    assert_eq!(store.updates.load(Ordering::SeqCst), 1);
    assert_eq!(resp.message, "更新失败了，请稍后再试。");
}

#[tokio::test]
async fn test_agent_cannot_use_tool_outside_its_list() {
    let store = Arc::new(InMemoryAdmissionsStore::new());
    let llm = Arc::new(ScriptedLlmClient::new(vec![
        call("update_profile", json!({"gpa": 1.0})),
        text("这个我帮不了你，请找档案顾问。"),
    ]));
    let orch = build(ExecutionMode::React, llm, store.clone());

    let resp = orch.call_agent("u1", AgentType::Case, "顺便把我的GPA改成1.0", None).await;
    assert_eq!(resp.message, "这个我帮不了你，请找档案顾问。");
    let profile = store.get_profile("u1").await.unwrap();
    assert!(profile.map_or(true, |p| p.gpa != Some(1.0)));

    let history = orch.get_history("u1", &resp.conversation_id.unwrap(), None).await.unwrap();
    let tool_msg = history.iter().find(|m| m.role == Role::Tool).unwrap();
    let content: serde_json::Value = serde_json::from_str(&tool_msg.content).unwrap();
    assert_eq!(content["success"], false);
    assert!(content["error"].as_str().unwrap().contains("not allowed for agent"));
}

#[tokio::test]
async fn test_missing_school_lookups_do_not_open_circuit() {
    let mut cfg = config(ExecutionMode::React);
    cfg.tools.circuit_breaker.failure_threshold = 2;
    let mut script = Vec::new();
    for _ in 0..4 {
        script.push(call("get_school_detail", json!({"schoolId": "nope"})));
        script.push(text("没找到这所学校。"));
    }
    let llm = Arc::new(ScriptedLlmClient::new(script));
    let orch = build_with(cfg, llm, Arc::new(InMemoryAdmissionsStore::new()));

    for _ in 0..3 {
        orch.call_agent("userA", AgentType::School, "查一下 nope 学校", None).await;
    }
    let resp = orch.call_agent("userB", AgentType::School, "查一下 nope 学校", None).await;
    assert_eq!(resp.message, "没找到这所学校。");

    let history = orch.get_history("userB", &resp.conversation_id.unwrap(), None).await.unwrap();
    let tool_msg = history.iter().find(|m| m.role == Role::Tool).unwrap();
    let content: serde_json::Value = serde_json::from_str(&tool_msg.content).unwrap();
    let error = content["error"].as_str().unwrap();
    assert!(error.contains("not found"), "{error}");
    assert!(!error.to_lowercase().contains("circuit"), "{error}");
}

#[tokio::test]
async fn test_model_failure_becomes_fallback() {
    let llm = Arc::new(ScriptedLlmClient::new(vec![ScriptedReply::Fail(LlmError::Network(
        "connection refused".into(),
    ))]));
    let orch = build(ExecutionMode::Workflow, llm, Arc::new(InMemoryAdmissionsStore::new()));

    let events: Vec<StreamEvent> = orch
        .handle_message_stream("u1", "我最近压力很大，不知道从哪里开始", None)
        .collect()
        .await;
    assert_eq!(kinds(&events), vec!["start", "error", "done"]);
    let StreamEvent::Done { response } = &events[2] else {
        panic!("last event must be done");
    };
    let data = response.data.as_ref().unwrap();
    assert_eq!(data["fallback"], true);
    assert_eq!(data["errorCategory"], "network");
    assert!(!response.message.contains("connection refused"));
}

#[tokio::test]
async fn test_history_order_and_ownership() {
    let llm = Arc::new(ScriptedLlmClient::always(|n, _| {
        ScriptedReply::Respond(ChatResponse::text(format!("回答 {n}")))
    }));
    let orch = build(ExecutionMode::Workflow, llm, Arc::new(InMemoryAdmissionsStore::new()));

    let first = orch.handle_message("u1", "第一个问题是什么呢", None).await;
    let id = first.conversation_id.unwrap();
    orch.handle_message("u1", "第二个问题是什么呢", Some(&id)).await;
    orch.handle_message("u1", "第三个问题是什么呢", Some(&id)).await;

    let history = orch.get_history("u1", &id, None).await.unwrap();
    let contents: Vec<&str> = history.iter().map(|m| m.content.as_str()).collect();
    assert_eq!(
        contents,
        vec!["第一个问题是什么呢", "回答 0", "第二个问题是什么呢", "回答 1", "第三个问题是什么呢", "回答 2"]
    );

    let err = orch.get_history("u2", &id, None).await.unwrap_err();
    assert!(matches!(err, AgentError::Storage(StoreError::Forbidden { .. })));

    // 其他用户使用该会话 ID 发消息得到降级回复，且不会写入该会话
    orch.handle_message("u2", "我也想问个问题呢", Some(&id)).await;
    assert_eq!(orch.get_history("u1", &id, None).await.unwrap().len(), 6);

    assert!(orch.clear_conversation("u1", &id).await.unwrap());
    assert!(!orch.clear_conversation("u1", &id).await.unwrap());
}

#[tokio::test]
async fn test_stream_reports_tools_and_content() {
    let llm = Arc::new(ScriptedLlmClient::new(vec![
        call("search_schools", json!({"country": "UK"})),
        text("暂时没有匹配的英国院校。"),
    ]));
    let orch = build(ExecutionMode::Workflow, llm, Arc::new(InMemoryAdmissionsStore::new()));

    let events: Vec<StreamEvent> = orch
        .call_agent_stream("u1", AgentType::School, "英国有哪些学校适合我", None)
        .collect()
        .await;
    let k = kinds(&events);
    assert_eq!(k.first(), Some(&"start"));
    assert_eq!(k.last(), Some(&"done"));
    let tool_start = k.iter().position(|e| *e == "tool_start").unwrap();
    let tool_end = k.iter().position(|e| *e == "tool_end").unwrap();
    let first_content = k.iter().position(|e| *e == "content").unwrap();
    assert!(tool_start < tool_end && tool_end < first_content);

    let streamed: String = events
        .iter()
        .filter_map(|e| match e {
            StreamEvent::Content { content, .. } => Some(content.as_str()),
            _ => None,
        })
        .collect();
    assert_eq!(streamed, "暂时没有匹配的英国院校。");
    let StreamEvent::Done { response } = events.last().unwrap() else {
        panic!("last event must be done");
    };
    assert_eq!(response.data.as_ref().unwrap()["workflow"]["tool_calls"], 1);
}

#[tokio::test]
async fn test_sqlite_history_survives_restart() {
    let dir = tempfile::tempdir().unwrap();
    let mut cfg = config(ExecutionMode::Workflow);
    cfg.memory.backend = MemoryBackend::Sqlite;
    cfg.memory.sqlite_path = dir.path().join("conv.db");

    let id = {
        let orch = OrchestratorBuilder::new(cfg.clone())
            .with_llm(Arc::new(ScriptedLlmClient::always(|_, _| {
                ScriptedReply::Respond(ChatResponse::text("记住了。"))
            })))
            .build()
            .unwrap();
        let resp = orch.handle_message("u1", "我的托福是105分", None).await;
        resp.conversation_id.unwrap()
    };

    let orch = OrchestratorBuilder::new(cfg)
        .with_llm(Arc::new(ScriptedLlmClient::new(Vec::new())))
        .build()
        .unwrap();
    let history = orch.get_history("u1", &id, None).await.unwrap();
    assert_eq!(history.len(), 2);
    assert_eq!(history[1].content, "记住了。");
}
