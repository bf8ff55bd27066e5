//! liuxue Web 接口
//!
//! 启动: cargo run --bin liuxue-web --features web
//! 端口默认 8080，可用 LIUXUE_WEB_PORT 覆盖。鉴权不在本服务内，用户 ID 由上游网关通过 x-user-id 头传入。

#![cfg(feature = "web")]

use std::convert::Infallible;
use std::sync::Arc;

use anyhow::Context;
use axum::{
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
    response::sse::{Event, KeepAlive, Sse},
    routing::{delete, get, post},
    Json, Router,
};
use futures_util::{Stream, StreamExt};
use serde::Deserialize;

use liuxue::agent::{AgentResponse, AgentType};
use liuxue::config::load_config;
use liuxue::core::{AgentError, Orchestrator, OrchestratorBuilder};
use liuxue::memory::Message;
use liuxue::store::StoreError;

const DEFAULT_PORT: u16 = 8080;
const ANONYMOUS_USER: &str = "anonymous";

struct AppState {
    orchestrator: Arc<Orchestrator>,
}

type ApiError = (StatusCode, String);

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ChatBody {
    message: String,
    conversation_id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct HistoryQuery {
    limit: Option<usize>,
}

fn user_id(headers: &HeaderMap) -> String {
    headers
        .get("x-user-id")
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .unwrap_or(ANONYMOUS_USER)
        .to_string()
}

fn validate(body: &ChatBody) -> Result<String, ApiError> {
    let message = body.message.trim();
    if message.is_empty() {
        return Err((StatusCode::BAD_REQUEST, "message is required".to_string()));
    }
    Ok(message.to_string())
}

fn conversation_id(body: &ChatBody) -> Option<String> {
    body.conversation_id.clone().filter(|s| !s.is_empty())
}

fn map_error(e: AgentError) -> ApiError {
    match e {
        AgentError::Storage(StoreError::NotFound(m)) => (StatusCode::NOT_FOUND, m),
        AgentError::Storage(StoreError::Forbidden { id }) => (StatusCode::FORBIDDEN, format!("conversation {id}")),
        other => {
            tracing::error!(error = %other, "request failed");
            (StatusCode::INTERNAL_SERVER_ERROR, "internal error".to_string())
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    liuxue::observability::init();

    let cfg = load_config(None).context("load config")?;
    let orchestrator = OrchestratorBuilder::new(cfg)
        .build()
        .context("build orchestrator")?;
    let state = Arc::new(AppState {
        orchestrator: Arc::new(orchestrator),
    });

    let app = Router::new()
        .route("/api/chat", post(api_chat))
        .route("/api/chat/stream", post(api_chat_stream))
        .route("/api/agents/:agent/chat", post(api_agent_chat))
        .route("/api/conversations/:id/history", get(api_history))
        .route("/api/conversations/:id", delete(api_clear))
        .route("/api/conversations/:id/refresh", post(api_refresh))
        .route("/api/health", get(|| async { "OK" }))
        .with_state(Arc::clone(&state));

    let port = std::env::var("LIUXUE_WEB_PORT")
        .ok()
        .and_then(|s| s.parse::<u16>().ok())
        .unwrap_or(DEFAULT_PORT);
    let addr = std::net::SocketAddr::from(([0, 0, 0, 0], port));
    tracing::info!("liuxue web: http://{}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}

/// POST /api/chat：完整回复
async fn api_chat(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(body): Json<ChatBody>,
) -> Result<Json<AgentResponse>, ApiError> {
    let message = validate(&body)?;
    let response = state
        .orchestrator
        .handle_message(&user_id(&headers), &message, conversation_id(&body).as_deref())
        .await;
    Ok(Json(response))
}

/// POST /api/chat/stream：SSE，事件名为 StreamEvent 的 type
async fn api_chat_stream(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(body): Json<ChatBody>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, ApiError> {
    let message = validate(&body)?;
    let events = state
        .orchestrator
        .handle_message_stream(user_id(&headers), message, conversation_id(&body));
    Ok(sse(events))
}

/// POST /api/agents/{agent}/chat：跳过路由直接调用指定 Agent（流式）
async fn api_agent_chat(
    State(state): State<Arc<AppState>>,
    Path(agent): Path<String>,
    headers: HeaderMap,
    Json(body): Json<ChatBody>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, ApiError> {
    let agent: AgentType = agent
        .parse()
        .map_err(|_| (StatusCode::NOT_FOUND, format!("unknown agent {agent}")))?;
    let message = validate(&body)?;
    let events = state
        .orchestrator
        .call_agent_stream(user_id(&headers), agent, message, conversation_id(&body));
    Ok(sse(events))
}

fn sse(events: liuxue::core::EventStream) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let stream = events.map(|ev| {
        let data = serde_json::to_string(&ev).unwrap_or_else(|e| {
            format!(r#"{{"type":"error","message":"serialize: {e}","code":"unknown"}}"#)
        });
        Ok(Event::default().event(ev.kind()).data(data))
    });
    Sse::new(stream).keep_alive(
        KeepAlive::new()
            .interval(std::time::Duration::from_secs(15))
            .text("keepalive"),
    )
}

/// GET /api/conversations/{id}/history
async fn api_history(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Query(q): Query<HistoryQuery>,
    headers: HeaderMap,
) -> Result<Json<Vec<Message>>, ApiError> {
    state
        .orchestrator
        .get_history(&user_id(&headers), &id, q.limit)
        .await
        .map(Json)
        .map_err(map_error)
}

/// DELETE /api/conversations/{id}
async fn api_clear(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    headers: HeaderMap,
) -> Result<StatusCode, ApiError> {
    let removed = state
        .orchestrator
        .clear_conversation(&user_id(&headers), &id)
        .await
        .map_err(map_error)?;
    Ok(if removed { StatusCode::NO_CONTENT } else { StatusCode::NOT_FOUND })
}

/// POST /api/conversations/{id}/refresh：档案变更后刷新上下文
async fn api_refresh(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    headers: HeaderMap,
) -> Result<StatusCode, ApiError> {
    state
        .orchestrator
        .refresh_context(&user_id(&headers), &id)
        .await
        .map_err(map_error)?;
    Ok(StatusCode::NO_CONTENT)
}
