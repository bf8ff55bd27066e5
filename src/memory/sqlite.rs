//! SQLite 会话存储（持久化，跨进程恢复）
//!
//! 单连接 + Mutex，所有数据库操作放在 spawn_blocking 中执行；消息按自增 seq 排序，保证回放顺序等于插入顺序。

use std::path::Path;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};

use crate::agent::AgentType;
use crate::memory::{ConversationState, ConversationStore, Message, Role, ToolCall};
use crate::store::StoreError;

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS conversations (
    id TEXT PRIMARY KEY,
    user_id TEXT NOT NULL,
    context_json TEXT NOT NULL DEFAULT '{}',
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS messages (
    seq INTEGER PRIMARY KEY AUTOINCREMENT,
    id TEXT NOT NULL,
    conversation_id TEXT NOT NULL,
    role TEXT NOT NULL,
    content TEXT NOT NULL DEFAULT '',
    agent_type TEXT,
    tool_calls_json TEXT,
    tool_call_id TEXT,
    timestamp TEXT NOT NULL,
    FOREIGN KEY (conversation_id) REFERENCES conversations(id) ON DELETE CASCADE
);

CREATE INDEX IF NOT EXISTS idx_messages_conversation ON messages(conversation_id, seq);
CREATE INDEX IF NOT EXISTS idx_conversations_user ON conversations(user_id, updated_at);
";

fn backend_err(e: impl std::fmt::Display) -> StoreError {
    StoreError::Backend(e.to_string())
}

pub struct SqliteConversationStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteConversationStore {
    /// 打开（或创建）数据库文件并建表；父目录不存在时自动创建
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(backend_err)?;
        }
        let conn = Connection::open(path).map_err(backend_err)?;
        Self::init(conn)
    }

    pub fn open_in_memory() -> Result<Self, StoreError> {
        Self::init(Connection::open_in_memory().map_err(backend_err)?)
    }

    fn init(conn: Connection) -> Result<Self, StoreError> {
        // 内存库不支持 WAL，忽略失败
        conn.execute_batch("PRAGMA journal_mode=WAL;").ok();
        conn.execute_batch("PRAGMA foreign_keys=ON;")
            .map_err(backend_err)?;
        conn.execute_batch(SCHEMA).map_err(backend_err)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    async fn run<T, F>(&self, f: F) -> Result<T, StoreError>
    where
        T: Send + 'static,
        F: FnOnce(&mut Connection) -> Result<T, StoreError> + Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let mut guard = conn.lock().map_err(|e| backend_err(format!("lock poisoned: {e}")))?;
            f(&mut guard)
        })
        .await
        .map_err(backend_err)?
    }
}

fn load_messages(conn: &Connection, id: &str, limit: Option<usize>) -> Result<Vec<Message>, StoreError> {
    // 取最近 limit 条后再按 seq 升序
    let limit = limit.map_or(-1, |n| n as i64);
    let mut stmt = conn
        .prepare(
            "SELECT id, role, content, agent_type, tool_calls_json, tool_call_id, timestamp FROM (
                SELECT * FROM messages WHERE conversation_id = ?1 ORDER BY seq DESC LIMIT ?2
             ) ORDER BY seq ASC",
        )
        .map_err(backend_err)?;
    let rows = stmt
        .query_map(params![id, limit], |row| {
            let role: String = row.get(1)?;
            let agent: Option<String> = row.get(3)?;
            let calls: Option<String> = row.get(4)?;
            Ok(Message {
                id: row.get(0)?,
                role: Role::from_str_lossy(&role),
                content: row.get(2)?,
                agent_type: agent.as_deref().and_then(AgentType::parse),
                tool_calls: calls.and_then(|j| serde_json::from_str::<Vec<ToolCall>>(&j).ok()),
                tool_call_id: row.get(5)?,
                timestamp: row.get::<_, DateTime<Utc>>(6)?,
            })
        })
        .map_err(backend_err)?;
    rows.collect::<Result<Vec<_>, _>>().map_err(backend_err)
}

fn conversation_exists(conn: &Connection, id: &str) -> Result<bool, StoreError> {
    conn.query_row("SELECT 1 FROM conversations WHERE id = ?1", params![id], |_| Ok(()))
        .optional()
        .map(|r| r.is_some())
        .map_err(backend_err)
}

#[async_trait]
impl ConversationStore for SqliteConversationStore {
    async fn get(&self, id: &str) -> Result<Option<ConversationState>, StoreError> {
        let id = id.to_string();
        self.run(move |conn| {
            let head = conn
                .query_row(
                    "SELECT user_id, context_json, created_at, updated_at FROM conversations WHERE id = ?1",
                    params![id],
                    |row| {
                        Ok((
                            row.get::<_, String>(0)?,
                            row.get::<_, String>(1)?,
                            row.get::<_, DateTime<Utc>>(2)?,
                            row.get::<_, DateTime<Utc>>(3)?,
                        ))
                    },
                )
                .optional()
                .map_err(backend_err)?;
            let Some((user_id, context_json, created_at, updated_at)) = head else {
                return Ok(None);
            };
            let messages = load_messages(conn, &id, None)?;
            Ok(Some(ConversationState {
                id,
                user_id,
                messages,
                context: serde_json::from_str(&context_json).unwrap_or_default(),
                created_at,
                updated_at,
            }))
        })
        .await
    }

    async fn create(&self, state: &ConversationState) -> Result<(), StoreError> {
        let state = state.clone();
        self.run(move |conn| {
            let tx = conn.transaction().map_err(backend_err)?;
            tx.execute("DELETE FROM messages WHERE conversation_id = ?1", params![state.id])
                .map_err(backend_err)?;
            tx.execute(
                "INSERT OR REPLACE INTO conversations (id, user_id, context_json, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    state.id,
                    state.user_id,
                    serde_json::to_string(&state.context).map_err(backend_err)?,
                    state.created_at,
                    state.updated_at,
                ],
            )
            .map_err(backend_err)?;
            for m in &state.messages {
                insert_message(&tx, &state.id, m)?;
            }
            tx.commit().map_err(backend_err)
        })
        .await
    }

    async fn append(&self, id: &str, message: &Message) -> Result<(), StoreError> {
        let id = id.to_string();
        let message = message.clone();
        self.run(move |conn| {
            if !conversation_exists(conn, &id)? {
                return Err(StoreError::NotFound(format!("conversation {id}")));
            }
            let tx = conn.transaction().map_err(backend_err)?;
            insert_message(&tx, &id, &message)?;
            tx.execute(
                "UPDATE conversations SET updated_at = ?1 WHERE id = ?2",
                params![message.timestamp, id],
            )
            .map_err(backend_err)?;
            tx.commit().map_err(backend_err)
        })
        .await
    }

    async fn history(&self, id: &str, limit: Option<usize>) -> Result<Vec<Message>, StoreError> {
        let id = id.to_string();
        self.run(move |conn| {
            if !conversation_exists(conn, &id)? {
                return Err(StoreError::NotFound(format!("conversation {id}")));
            }
            load_messages(conn, &id, limit)
        })
        .await
    }

    async fn set_context(&self, id: &str, key: &str, value: serde_json::Value) -> Result<(), StoreError> {
        let id = id.to_string();
        let key = key.to_string();
        self.run(move |conn| {
            let current: Option<String> = conn
                .query_row(
                    "SELECT context_json FROM conversations WHERE id = ?1",
                    params![id],
                    |row| row.get(0),
                )
                .optional()
                .map_err(backend_err)?;
            let Some(current) = current else {
                return Err(StoreError::NotFound(format!("conversation {id}")));
            };
            let mut ctx: serde_json::Map<String, serde_json::Value> =
                serde_json::from_str(&current).unwrap_or_default();
            ctx.insert(key, value);
            conn.execute(
                "UPDATE conversations SET context_json = ?1, updated_at = ?2 WHERE id = ?3",
                params![
                    serde_json::Value::Object(ctx).to_string(),
                    Utc::now(),
                    id
                ],
            )
            .map_err(backend_err)?;
            Ok(())
        })
        .await
    }

    async fn clear(&self, id: &str) -> Result<bool, StoreError> {
        let id = id.to_string();
        self.run(move |conn| {
            conn.execute("DELETE FROM messages WHERE conversation_id = ?1", params![id])
                .map_err(backend_err)?;
            let n = conn
                .execute("DELETE FROM conversations WHERE id = ?1", params![id])
                .map_err(backend_err)?;
            Ok(n > 0)
        })
        .await
    }

    async fn latest_for_user(&self, user_id: &str) -> Result<Option<String>, StoreError> {
        let user_id = user_id.to_string();
        self.run(move |conn| {
            conn.query_row(
                "SELECT id FROM conversations WHERE user_id = ?1 ORDER BY updated_at DESC LIMIT 1",
                params![user_id],
                |row| row.get(0),
            )
            .optional()
            .map_err(backend_err)
        })
        .await
    }

    fn backend_name(&self) -> &'static str {
        "sqlite"
    }
}

fn insert_message(conn: &Connection, conversation_id: &str, m: &Message) -> Result<(), StoreError> {
    let calls = match &m.tool_calls {
        Some(c) => Some(serde_json::to_string(c).map_err(backend_err)?),
        None => None,
    };
    conn.execute(
        "INSERT INTO messages (id, conversation_id, role, content, agent_type, tool_calls_json, tool_call_id, timestamp)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
        params![
            m.id,
            conversation_id,
            m.role.as_str(),
            m.content,
            m.agent_type.map(|a| a.as_str()),
            calls,
            m.tool_call_id,
            m.timestamp,
        ],
    )
    .map_err(backend_err)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_roundtrip_through_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("db").join("conversations.db");
        {
            let store = SqliteConversationStore::open(&path).unwrap();
            store.create(&ConversationState::new("u1", Some("c1"))).await.unwrap();
            store.append("c1", &Message::user("我的GPA是3.8")).await.unwrap();
            store
                .append(
                    "c1",
                    &Message::assistant("")
                        .with_agent(AgentType::Profile)
                        .with_tool_calls(vec![ToolCall::new("get_profile", serde_json::json!({}))]),
                )
                .await
                .unwrap();
            store
                .set_context("c1", "locale", serde_json::json!("zh"))
                .await
                .unwrap();
        }
        let store = SqliteConversationStore::open(&path).unwrap();
        let state = store.get("c1").await.unwrap().unwrap();
        assert_eq!(state.user_id, "u1");
        assert_eq!(state.messages.len(), 2);
        assert_eq!(state.messages[0].content, "我的GPA是3.8");
        assert_eq!(state.messages[1].agent_type, Some(AgentType::Profile));
        assert_eq!(state.messages[1].tool_calls.as_ref().unwrap()[0].name, "get_profile");
        assert_eq!(state.context["locale"], "zh");
    }

    #[tokio::test]
    async fn test_history_limit_keeps_order() {
        let store = SqliteConversationStore::open_in_memory().unwrap();
        store.create(&ConversationState::new("u1", Some("c1"))).await.unwrap();
        for i in 0..6 {
            store.append("c1", &Message::user(format!("m{i}"))).await.unwrap();
        }
        let last = store.history("c1", Some(3)).await.unwrap();
        let contents: Vec<_> = last.iter().map(|m| m.content.as_str()).collect();
        assert_eq!(contents, vec!["m3", "m4", "m5"]);
    }

    #[tokio::test]
    async fn test_clear_removes_messages() {
        let store = SqliteConversationStore::open_in_memory().unwrap();
        store.create(&ConversationState::new("u1", Some("c1"))).await.unwrap();
        store.append("c1", &Message::user("hi")).await.unwrap();
        assert!(store.clear("c1").await.unwrap());
        assert!(store.get("c1").await.unwrap().is_none());
        assert!(matches!(
            store.history("c1", None).await,
            Err(StoreError::NotFound(_))
        ));
    }
}
