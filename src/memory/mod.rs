//! 记忆层：会话状态（短期）、会话存储（内存 TTL / SQLite 持久化）、事实抽取与摘要

pub mod conversation;
pub mod facts;
pub mod manager;
pub mod sqlite;
pub mod store;

pub use conversation::{ConversationState, Message, Role, ToolCall};
pub use facts::{ExtractedFacts, FactExtractor};
pub use manager::{MemoryManager, MemorySettings};
pub use sqlite::SqliteConversationStore;
pub use store::{ConversationStore, InMemoryConversationStore};
