//! 会话存储抽象层
//!
//! 定义统一的会话存储接口（一个会话 ID 对应一个状态），支持内存（带 TTL）和 SQLite 持久化两种实现。
//! 启动时选定一个实现，此后只通过 trait 调用。

use std::collections::HashMap;
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::memory::{ConversationState, Message};
use crate::store::StoreError;

/// 会话存储接口
#[async_trait]
pub trait ConversationStore: Send + Sync {
    /// 获取会话；不存在或已过期时返回 Ok(None)
    async fn get(&self, id: &str) -> Result<Option<ConversationState>, StoreError>;

    /// 保存新会话（ID 已存在时覆盖）
    async fn create(&self, state: &ConversationState) -> Result<(), StoreError>;

    /// 追加消息；会话不存在时返回 NotFound
    async fn append(&self, id: &str, message: &Message) -> Result<(), StoreError>;

    /// 按插入顺序返回消息；limit 表示只取最近 N 条
    async fn history(&self, id: &str, limit: Option<usize>) -> Result<Vec<Message>, StoreError>;

    /// 写入上下文键值
    async fn set_context(&self, id: &str, key: &str, value: serde_json::Value) -> Result<(), StoreError>;

    /// 删除会话；返回是否存在
    async fn clear(&self, id: &str) -> Result<bool, StoreError>;

    /// 用户最近更新的会话 ID
    async fn latest_for_user(&self, user_id: &str) -> Result<Option<String>, StoreError>;

    fn backend_name(&self) -> &'static str;
}

struct Entry {
    state: ConversationState,
    last_access: Instant,
}

/// 内存会话存储：超过 ttl 未访问的会话视为过期
pub struct InMemoryConversationStore {
    conversations: RwLock<HashMap<String, Entry>>,
    ttl: Duration,
}

impl InMemoryConversationStore {
    pub fn new(ttl_secs: u64) -> Self {
        Self {
            conversations: RwLock::new(HashMap::new()),
            ttl: Duration::from_secs(ttl_secs.max(1)),
        }
    }

    fn expired(&self, entry: &Entry) -> bool {
        entry.last_access.elapsed() > self.ttl
    }

    /// 清理过期会话，返回清理数量
    pub async fn cleanup_expired(&self) -> usize {
        let mut map = self.conversations.write().await;
        let before = map.len();
        map.retain(|_, e| e.last_access.elapsed() <= self.ttl);
        let removed = before - map.len();
        if removed > 0 {
            tracing::debug!(removed, "expired conversations evicted");
        }
        removed
    }

    /// 后台定时清理过期会话；存储被释放后任务自行退出
    pub fn spawn_cleanup(self: &Arc<Self>, every: Duration) -> tokio::task::JoinHandle<()> {
        let store: Weak<Self> = Arc::downgrade(self);
        tokio::spawn(async move {
            let mut timer = tokio::time::interval(every);
            timer.tick().await;
            loop {
                timer.tick().await;
                let Some(live) = store.upgrade() else {
                    break;
                };
                let expired = live.cleanup_expired().await;
                if expired > 0 {
                    tracing::info!("Cleaned up {} expired conversations", expired);
                }
            }
        })
    }

    /// 未过期的会话数
    pub async fn active_count(&self) -> usize {
        self.conversations
            .read()
            .await
            .values()
            .filter(|e| !self.expired(e))
            .count()
    }

    async fn with_entry<T>(
        &self,
        id: &str,
        f: impl FnOnce(&mut ConversationState) -> T + Send,
    ) -> Result<T, StoreError> {
        let mut map = self.conversations.write().await;
        match map.get(id) {
            Some(e) if self.expired(e) => {
                map.remove(id);
                Err(StoreError::NotFound(format!("conversation {id}")))
            }
            Some(_) => {
                let entry = map
                    .get_mut(id)
                    .ok_or_else(|| StoreError::NotFound(format!("conversation {id}")))?;
                entry.last_access = Instant::now();
                Ok(f(&mut entry.state))
            }
            None => Err(StoreError::NotFound(format!("conversation {id}"))),
        }
    }
}

impl Default for InMemoryConversationStore {
    fn default() -> Self {
        Self::new(24 * 3600)
    }
}

#[async_trait]
impl ConversationStore for InMemoryConversationStore {
    async fn get(&self, id: &str) -> Result<Option<ConversationState>, StoreError> {
        match self.with_entry(id, |s| s.clone()).await {
            Ok(state) => Ok(Some(state)),
            Err(StoreError::NotFound(_)) => Ok(None),
            Err(e) => Err(e),
        }
    }

    async fn create(&self, state: &ConversationState) -> Result<(), StoreError> {
        let mut map = self.conversations.write().await;
        map.retain(|_, e| !self.expired(e));
        map.insert(
            state.id.clone(),
            Entry {
                state: state.clone(),
                last_access: Instant::now(),
            },
        );
        Ok(())
    }

    async fn append(&self, id: &str, message: &Message) -> Result<(), StoreError> {
        let message = message.clone();
        self.with_entry(id, move |s| s.push(message)).await
    }

    async fn history(&self, id: &str, limit: Option<usize>) -> Result<Vec<Message>, StoreError> {
        self.with_entry(id, |s| {
            let start = limit.map_or(0, |n| s.messages.len().saturating_sub(n));
            s.messages[start..].to_vec()
        })
        .await
    }

    async fn set_context(&self, id: &str, key: &str, value: serde_json::Value) -> Result<(), StoreError> {
        let key = key.to_string();
        self.with_entry(id, move |s| {
            s.context.insert(key, value);
            s.updated_at = chrono::Utc::now();
        })
        .await
    }

    async fn clear(&self, id: &str) -> Result<bool, StoreError> {
        Ok(self.conversations.write().await.remove(id).is_some())
    }

    async fn latest_for_user(&self, user_id: &str) -> Result<Option<String>, StoreError> {
        let map = self.conversations.read().await;
        Ok(map
            .values()
            .filter(|e| e.state.user_id == user_id && !self.expired(e))
            .max_by_key(|e| e.state.updated_at)
            .map(|e| e.state.id.clone()))
    }

    fn backend_name(&self) -> &'static str {
        "memory"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_history_preserves_insertion_order() {
        let store = InMemoryConversationStore::default();
        let state = ConversationState::new("u1", Some("c1"));
        store.create(&state).await.unwrap();
        for i in 0..5 {
            store.append("c1", &Message::user(format!("m{i}"))).await.unwrap();
        }
        let all = store.history("c1", None).await.unwrap();
        let contents: Vec<_> = all.iter().map(|m| m.content.as_str()).collect();
        assert_eq!(contents, vec!["m0", "m1", "m2", "m3", "m4"]);

        let last_two = store.history("c1", Some(2)).await.unwrap();
        assert_eq!(last_two[0].content, "m3");
        assert_eq!(last_two[1].content, "m4");
    }

    #[tokio::test]
    async fn test_append_to_missing_conversation() {
        let store = InMemoryConversationStore::default();
        let err = store.append("nope", &Message::user("x")).await.unwrap_err();
        assert!(matches!(err, StoreError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_clear_and_latest_for_user() {
        let store = InMemoryConversationStore::default();
        store.create(&ConversationState::new("u1", Some("a"))).await.unwrap();
        assert_eq!(store.latest_for_user("u1").await.unwrap().as_deref(), Some("a"));
        assert!(store.clear("a").await.unwrap());
        assert!(!store.clear("a").await.unwrap());
        assert!(store.get("a").await.unwrap().is_none());
        assert!(store.latest_for_user("u1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_expired_entries_are_evicted() {
        let store = InMemoryConversationStore::new(1);
        store.create(&ConversationState::new("u1", Some("old"))).await.unwrap();
        {
            let mut map = store.conversations.write().await;
            if let Some(e) = map.get_mut("old") {
                e.last_access = Instant::now() - Duration::from_secs(5);
            }
        }
        assert_eq!(store.active_count().await, 0);
        assert_eq!(store.cleanup_expired().await, 1);
        assert!(store.get("old").await.unwrap().is_none());
    }

    async fn age(store: &InMemoryConversationStore, id: &str) {
        let mut map = store.conversations.write().await;
        if let Some(e) = map.get_mut(id) {
            e.last_access = Instant::now() - Duration::from_secs(5);
        }
    }

    #[tokio::test]
    async fn test_create_sweeps_expired_entries() {
        let store = InMemoryConversationStore::new(1);
        store.create(&ConversationState::new("u1", Some("old"))).await.unwrap();
        age(&store, "old").await;
        store.create(&ConversationState::new("u2", Some("new"))).await.unwrap();
        let map = store.conversations.read().await;
        assert_eq!(map.len(), 1);
        assert!(map.contains_key("new"));
    }

    #[tokio::test]
    async fn test_background_cleanup_evicts_idle_conversations() {
        let store = Arc::new(InMemoryConversationStore::new(1));
        store.create(&ConversationState::new("u1", Some("idle"))).await.unwrap();
        age(&store, "idle").await;
        let task = store.spawn_cleanup(Duration::from_millis(10));

        tokio::time::sleep(Duration::from_millis(80)).await;
        assert!(store.conversations.read().await.is_empty());

        drop(store);
        tokio::time::timeout(Duration::from_secs(1), task)
            .await
            .expect("cleanup task should stop once the store is gone")
            .unwrap();
    }
}
