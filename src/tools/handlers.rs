//! 领域 handler：按类别把 `category.method` 分发到业务存储
//!
//! 每个类别一个 ToolHandler 实现；返回 JSON 数据，失败返回 ToolError（由执行器写入 tool 消息的 error 字段）。
//! 只有 Backend 类错误是暂时性的：执行器对它重试并计入熔断，参数错误与查无此项直接交还模型。

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{Duration, Utc};
use serde_json::{json, Value};
use thiserror::Error;

use crate::agent::AgentType;
use crate::store::{AdmissionsStore, CaseQuery, ProfileUpdate, SchoolQuery, StoreError};
use crate::tools::schema::{
    parse_args, CompareSchoolsArgs, GetDeadlinesArgs, GetEssayArgs, PolishEssayArgs, SchoolDetailArgs,
};
use crate::tools::HandlerCategory;

/// 文书全文在工具结果中的最大字符数
const ESSAY_PREVIEW_CHARS: usize = 4000;

/// 工具调用上下文
#[derive(Debug, Clone)]
pub struct ToolContext {
    /// 发起调用的 Agent（委派白名单以它为准）
    pub agent: AgentType,
    pub conversation_id: Option<String>,
}

impl ToolContext {
    pub fn new(agent: AgentType) -> Self {
        Self {
            agent,
            conversation_id: None,
        }
    }

    pub fn with_conversation(mut self, id: impl Into<String>) -> Self {
        self.conversation_id = Some(id.into());
        self
    }
}

/// 工具 handler 错误
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ToolError {
    #[error("invalid arguments: {0}")]
    Invalid(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("forbidden: {0}")]
    Forbidden(String),

    /// 存储或下游服务故障，可重试
    #[error("backend error: {0}")]
    Backend(String),
}

impl ToolError {
    pub fn is_transient(&self) -> bool {
        matches!(self, ToolError::Backend(_))
    }

    /// 审计日志中的 outcome
    pub fn label(&self) -> &'static str {
        match self {
            ToolError::Invalid(_) => "invalid",
            ToolError::NotFound(_) => "not_found",
            ToolError::Forbidden(_) => "forbidden",
            ToolError::Backend(_) => "error",
        }
    }
}

impl From<StoreError> for ToolError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::NotFound(m) => ToolError::NotFound(m),
            StoreError::Forbidden { id } => ToolError::Forbidden(id),
            StoreError::Backend(m) => ToolError::Backend(m),
        }
    }
}

#[async_trait]
pub trait ToolHandler: Send + Sync {
    fn category(&self) -> HandlerCategory;

    async fn call(&self, method: &str, args: &Value, user_id: &str) -> Result<Value, ToolError>;
}

fn to_json<T: serde::Serialize>(v: &T) -> Result<Value, ToolError> {
    serde_json::to_value(v).map_err(|e| ToolError::Backend(format!("serialize result: {e}")))
}

fn unknown_method(category: HandlerCategory, method: &str) -> ToolError {
    ToolError::Invalid(format!("unknown method {}.{}", category.as_str(), method))
}

pub struct ProfileHandler {
    store: Arc<dyn AdmissionsStore>,
}

#[async_trait]
impl ToolHandler for ProfileHandler {
    fn category(&self) -> HandlerCategory {
        HandlerCategory::Profile
    }

    async fn call(&self, method: &str, args: &Value, user_id: &str) -> Result<Value, ToolError> {
        match method {
            "get" => match self.store.get_profile(user_id).await? {
                Some(p) => to_json(&p),
                None => Ok(json!({ "exists": false, "hint": "学生尚未填写档案" })),
            },
            "update" => {
                let update: ProfileUpdate = parse_args(args)?;
                if update.is_empty() {
                    return Err(ToolError::Invalid("no fields to update".to_string()));
                }
                let p = self
                    .store
                    .update_profile(user_id, &update)
                    .await
                    ?;
                to_json(&p)
            }
            other => Err(unknown_method(self.category(), other)),
        }
    }
}

pub struct SchoolHandler {
    store: Arc<dyn AdmissionsStore>,
}

#[async_trait]
impl ToolHandler for SchoolHandler {
    fn category(&self) -> HandlerCategory {
        HandlerCategory::School
    }

    async fn call(&self, method: &str, args: &Value, _user_id: &str) -> Result<Value, ToolError> {
        match method {
            "search" => {
                let q: SchoolQuery = parse_args(args)?;
                let schools = self.store.search_schools(&q).await?;
                Ok(json!({ "count": schools.len(), "schools": to_json(&schools)? }))
            }
            "detail" => {
                let a: SchoolDetailArgs = parse_args(args)?;
                match self.store.get_school(&a.school_id).await? {
                    Some(s) => to_json(&s),
                    None => Err(ToolError::NotFound(format!("school {}", a.school_id))),
                }
            }
            "compare" => {
                let a: CompareSchoolsArgs = parse_args(args)?;
                if !(2..=5).contains(&a.school_ids.len()) {
                    return Err(ToolError::Invalid("compare_schools needs 2-5 school ids".to_string()));
                }
                let mut found = Vec::new();
                let mut missing = Vec::new();
                for id in &a.school_ids {
                    match self.store.get_school(id).await? {
                        Some(s) => found.push(s),
                        None => missing.push(id.clone()),
                    }
                }
                Ok(json!({ "schools": to_json(&found)?, "missing": missing }))
            }
            other => Err(unknown_method(self.category(), other)),
        }
    }
}

pub struct EssayHandler {
    store: Arc<dyn AdmissionsStore>,
}

#[async_trait]
impl ToolHandler for EssayHandler {
    fn category(&self) -> HandlerCategory {
        HandlerCategory::Essay
    }

    async fn call(&self, method: &str, args: &Value, user_id: &str) -> Result<Value, ToolError> {
        match method {
            "list" => {
                let essays = self.store.list_essays(user_id).await?;
                let items: Vec<Value> = essays
                    .iter()
                    .map(|e| {
                        json!({
                            "id": e.id,
                            "title": e.title,
                            "essayType": e.essay_type,
                            "schoolId": e.school_id,
                            "wordCount": e.word_count,
                            "updatedAt": e.updated_at,
                        })
                    })
                    .collect();
                Ok(json!({ "count": items.len(), "essays": items }))
            }
            "get" => {
                let a: GetEssayArgs = parse_args(args)?;
                let essay = self
                    .store
                    .get_essay(user_id, &a.essay_id)
                    .await
                    ?
                    .ok_or_else(|| ToolError::NotFound(format!("essay {}", a.essay_id)))?;
                let mut v = to_json(&essay)?;
                if essay.content.chars().count() > ESSAY_PREVIEW_CHARS {
                    v["content"] = json!(essay.content.chars().take(ESSAY_PREVIEW_CHARS).collect::<String>());
                    v["truncated"] = json!(true);
                }
                Ok(v)
            }
            "polish" => {
                let a: PolishEssayArgs = parse_args(args)?;
                let ticket = self
                    .store
                    .request_polish(user_id, &a.essay_id, a.focus.as_deref())
                    .await
                    ?;
                to_json(&ticket)
            }
            other => Err(unknown_method(self.category(), other)),
        }
    }
}

pub struct CaseHandler {
    store: Arc<dyn AdmissionsStore>,
}

#[async_trait]
impl ToolHandler for CaseHandler {
    fn category(&self) -> HandlerCategory {
        HandlerCategory::Case
    }

    async fn call(&self, method: &str, args: &Value, _user_id: &str) -> Result<Value, ToolError> {
        match method {
            "search" => {
                let q: CaseQuery = parse_args(args)?;
                let cases = self.store.search_cases(&q).await?;
                Ok(json!({ "count": cases.len(), "cases": to_json(&cases)? }))
            }
            other => Err(unknown_method(self.category(), other)),
        }
    }
}

pub struct TimelineHandler {
    store: Arc<dyn AdmissionsStore>,
}

#[async_trait]
impl ToolHandler for TimelineHandler {
    fn category(&self) -> HandlerCategory {
        HandlerCategory::Timeline
    }

    async fn call(&self, method: &str, args: &Value, user_id: &str) -> Result<Value, ToolError> {
        match method {
            "get" => {
                let events = self.store.get_timeline(user_id).await?;
                Ok(json!({ "count": events.len(), "events": to_json(&events)? }))
            }
            "deadlines" => {
                let a: GetDeadlinesArgs = parse_args(args)?;
                let days = i64::from(a.within_days.unwrap_or(60));
                let today = Utc::now().date_naive();
                let until = today + Duration::days(days);
                let events: Vec<_> = self
                    .store
                    .get_timeline(user_id)
                    .await
                    ?
                    .into_iter()
                    .filter(|e| !e.completed && e.due_date >= today && e.due_date <= until)
                    .collect();
                Ok(json!({
                    "withinDays": days,
                    "count": events.len(),
                    "deadlines": to_json(&events)?,
                }))
            }
            other => Err(unknown_method(self.category(), other)),
        }
    }
}

/// 五个领域 handler，共享同一个业务存储
pub fn builtin_handlers(store: Arc<dyn AdmissionsStore>) -> Vec<Arc<dyn ToolHandler>> {
    vec![
        Arc::new(ProfileHandler { store: store.clone() }),
        Arc::new(SchoolHandler { store: store.clone() }),
        Arc::new(EssayHandler { store: store.clone() }),
        Arc::new(CaseHandler { store: store.clone() }),
        Arc::new(TimelineHandler { store }),
    ]
}
