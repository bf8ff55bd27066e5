//! 记忆管理器：会话获取/创建、消息追加、模型窗口、上下文摘要
//!
//! 组合 ConversationStore（会话状态）与 AdmissionsStore（档案快照）；
//! 用户消息写入时顺带抽取申请事实，会话变长后对窗口外的旧消息做抽取式摘要。

use std::sync::Arc;

use crate::core::AgentError;
use crate::memory::facts::{ExtractedFacts, FactExtractor};
use crate::memory::{ConversationState, ConversationStore, Message, Role};
use crate::routing::Locale;
use crate::store::{AdmissionsStore, Profile, StoreError};

/// 摘要中最多保留的旧用户消息条数
const SUMMARY_MAX_ITEMS: usize = 8;
/// 摘要中每条消息截取的字符数
const SUMMARY_ITEM_CHARS: usize = 60;

/// 记忆参数（来自配置 [app] / [memory]）
#[derive(Debug, Clone)]
pub struct MemorySettings {
    pub max_context_turns: usize,
    pub summary_threshold: usize,
}

impl Default for MemorySettings {
    fn default() -> Self {
        Self {
            max_context_turns: 10,
            summary_threshold: 40,
        }
    }
}

pub struct MemoryManager {
    store: Arc<dyn ConversationStore>,
    admissions: Arc<dyn AdmissionsStore>,
    extractor: FactExtractor,
    settings: MemorySettings,
}

impl MemoryManager {
    pub fn new(
        store: Arc<dyn ConversationStore>,
        admissions: Arc<dyn AdmissionsStore>,
        settings: MemorySettings,
    ) -> Result<Self, AgentError> {
        let extractor = FactExtractor::new()
            .map_err(|e| AgentError::ConfigError(format!("fact patterns: {e}")))?;
        Ok(Self {
            store,
            admissions,
            extractor,
            settings,
        })
    }

    pub fn backend_name(&self) -> &'static str {
        self.store.backend_name()
    }

    /// 指定 ID 时：存在则校验归属，不存在则以该 ID 新建；未指定时复用用户最近的会话
    pub async fn get_or_create(
        &self,
        user_id: &str,
        conversation_id: Option<&str>,
    ) -> Result<ConversationState, AgentError> {
        let existing_id = match conversation_id {
            Some(id) => Some(id.to_string()),
            None => self.store.latest_for_user(user_id).await?,
        };
        if let Some(id) = existing_id.as_deref() {
            if let Some(state) = self.store.get(id).await? {
                if state.user_id != user_id {
                    return Err(StoreError::Forbidden { id: id.to_string() }.into());
                }
                return Ok(state);
            }
        }
        let state = ConversationState::new(user_id, conversation_id);
        self.store.create(&state).await?;
        tracing::debug!(conversation = %state.id, user = %user_id, "conversation created");
        Ok(state)
    }

    /// 追加消息；用户消息会抽取事实并合并进 context["facts"]
    pub async fn add_message(&self, conversation_id: &str, message: Message) -> Result<(), AgentError> {
        let facts = (message.role == Role::User)
            .then(|| self.extractor.extract(&message.content))
            .filter(|f| !f.is_empty());
        self.store.append(conversation_id, &message).await?;

        if let Some(newer) = facts {
            let mut merged = self
                .store
                .get(conversation_id)
                .await?
                .and_then(|s| s.context.get("facts").cloned())
                .and_then(|v| serde_json::from_value::<ExtractedFacts>(v).ok())
                .unwrap_or_default();
            merged.merge(newer);
            let value = serde_json::to_value(&merged)
                .map_err(|e| AgentError::Storage(StoreError::Backend(e.to_string())))?;
            self.store.set_context(conversation_id, "facts", value).await?;
        }
        Ok(())
    }

    /// 送入模型的最近窗口
    pub async fn window(&self, conversation_id: &str) -> Result<Vec<Message>, AgentError> {
        let state = self
            .store
            .get(conversation_id)
            .await?
            .ok_or_else(|| StoreError::NotFound(format!("conversation {conversation_id}")))?;
        Ok(state.recent(self.settings.max_context_turns).to_vec())
    }

    pub async fn state(&self, conversation_id: &str) -> Result<Option<ConversationState>, AgentError> {
        Ok(self.store.get(conversation_id).await?)
    }

    /// 拼入 system prompt 的上下文段落；无内容时为空串
    pub async fn context_summary(&self, conversation_id: &str) -> Result<String, AgentError> {
        Ok(self
            .store
            .get(conversation_id)
            .await?
            .map(|s| render_context(&s))
            .unwrap_or_default())
    }

    pub async fn history(&self, conversation_id: &str, limit: Option<usize>) -> Result<Vec<Message>, AgentError> {
        Ok(self.store.history(conversation_id, limit).await?)
    }

    pub async fn clear(&self, conversation_id: &str) -> Result<bool, AgentError> {
        let removed = self.store.clear(conversation_id).await?;
        tracing::info!(conversation = %conversation_id, removed, "conversation cleared");
        Ok(removed)
    }

    pub async fn set_locale(&self, conversation_id: &str, locale: Locale) -> Result<(), AgentError> {
        self.store
            .set_context(conversation_id, "locale", serde_json::json!(locale.as_str()))
            .await?;
        Ok(())
    }

    /// 重新加载档案快照写入 context["profile"]；locale 给出时一并更新
    pub async fn refresh_context(
        &self,
        user_id: &str,
        conversation_id: &str,
        locale: Option<Locale>,
    ) -> Result<(), AgentError> {
        let profile = self.admissions.get_profile(user_id).await?;
        let value = match profile {
            Some(p) => serde_json::to_value(&p)
                .map_err(|e| AgentError::Storage(StoreError::Backend(e.to_string())))?,
            None => serde_json::Value::Null,
        };
        self.store.set_context(conversation_id, "profile", value).await?;
        if let Some(l) = locale {
            self.set_locale(conversation_id, l).await?;
        }
        Ok(())
    }

    /// 消息数超过阈值时，把窗口外的用户消息压缩为摘要写入 context["summary"]；返回是否写入
    pub async fn maybe_summarize(&self, conversation_id: &str) -> Result<bool, AgentError> {
        let Some(state) = self.store.get(conversation_id).await? else {
            return Ok(false);
        };
        if state.messages.len() <= self.settings.summary_threshold {
            return Ok(false);
        }
        let older = state.older_than_window(self.settings.max_context_turns);
        let items: Vec<String> = older
            .iter()
            .filter(|m| m.role == Role::User)
            .rev()
            .take(SUMMARY_MAX_ITEMS)
            .map(|m| truncate_chars(&m.content, SUMMARY_ITEM_CHARS))
            .collect::<Vec<_>>()
            .into_iter()
            .rev()
            .collect();
        if items.is_empty() {
            return Ok(false);
        }
        let summary = items
            .iter()
            .map(|s| format!("- {s}"))
            .collect::<Vec<_>>()
            .join("\n");
        self.store
            .set_context(conversation_id, "summary", serde_json::json!(summary))
            .await?;
        tracing::debug!(conversation = %conversation_id, items = items.len(), "summary refreshed");
        Ok(true)
    }
}

fn truncate_chars(s: &str, max: usize) -> String {
    if s.chars().count() > max {
        format!("{}…", s.chars().take(max).collect::<String>())
    } else {
        s.to_string()
    }
}

fn render_context(state: &ConversationState) -> String {
    let mut out = String::new();
    let profile_line = state
        .context
        .get("profile")
        .and_then(|v| serde_json::from_value::<Profile>(v.clone()).ok())
        .and_then(|p| p.summary_line());
    if let Some(line) = profile_line {
        out.push_str(&format!("## 用户档案\n{line}\n\n"));
    }
    let facts_line = state
        .context
        .get("facts")
        .and_then(|v| serde_json::from_value::<ExtractedFacts>(v.clone()).ok())
        .and_then(|f| f.summary_line());
    if let Some(line) = facts_line {
        out.push_str(&format!("## 对话中提到的信息\n{line}\n\n"));
    }
    if let Some(summary) = state.context.get("summary").and_then(|v| v.as_str()) {
        out.push_str(&format!("## 较早的对话要点\n{summary}\n\n"));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::InMemoryConversationStore;
    use crate::store::{InMemoryAdmissionsStore, ProfileUpdate};

    fn manager(settings: MemorySettings) -> (MemoryManager, Arc<InMemoryAdmissionsStore>) {
        let admissions = Arc::new(InMemoryAdmissionsStore::new());
        let m = MemoryManager::new(
            Arc::new(InMemoryConversationStore::default()),
            admissions.clone(),
            settings,
        )
        .unwrap();
        (m, admissions)
    }

    #[tokio::test]
    async fn test_get_or_create_reuses_latest_and_checks_owner() {
        let (m, _) = manager(MemorySettings::default());
        let a = m.get_or_create("u1", None).await.unwrap();
        let b = m.get_or_create("u1", None).await.unwrap();
        assert_eq!(a.id, b.id);

        let explicit = m.get_or_create("u1", Some("fixed")).await.unwrap();
        assert_eq!(explicit.id, "fixed");

        let err = m.get_or_create("u2", Some("fixed")).await.unwrap_err();
        assert!(matches!(err, AgentError::Storage(StoreError::Forbidden { .. })));
    }

    #[tokio::test]
    async fn test_facts_and_profile_in_context_summary() {
        let (m, admissions) = manager(MemorySettings::default());
        admissions
            .update_profile(
                "u1",
                &ProfileUpdate {
                    major: Some("软件工程".into()),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        let conv = m.get_or_create("u1", None).await.unwrap();
        m.add_message(&conv.id, Message::user("托福105，想去英国")).await.unwrap();
        m.refresh_context("u1", &conv.id, Some(Locale::Zh)).await.unwrap();

        let summary = m.context_summary(&conv.id).await.unwrap();
        assert!(summary.contains("本科专业 软件工程"));
        assert!(summary.contains("TOEFL 105"));
        assert!(summary.contains("目标国家 UK"));
        let state = m.state(&conv.id).await.unwrap().unwrap();
        assert_eq!(state.locale(), Some(Locale::Zh));
    }

    #[tokio::test]
    async fn test_summarize_after_threshold() {
        let (m, _) = manager(MemorySettings {
            max_context_turns: 2,
            summary_threshold: 6,
        });
        let conv = m.get_or_create("u1", None).await.unwrap();
        for i in 0..4 {
            m.add_message(&conv.id, Message::user(format!("问题{i}"))).await.unwrap();
            m.add_message(&conv.id, Message::assistant(format!("回答{i}"))).await.unwrap();
        }
        assert!(m.maybe_summarize(&conv.id).await.unwrap());
        let summary = m.context_summary(&conv.id).await.unwrap();
        assert!(summary.contains("- 问题0"));
        assert!(!summary.contains("问题3"));
        assert_eq!(m.window(&conv.id).await.unwrap().len(), 4);
    }
}
