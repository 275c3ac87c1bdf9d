//! 会话记忆层：消息模型、TTL 缓存、持久存储与历史门面

pub mod cache;
pub mod manager;
pub mod message;
pub mod sqlite;
pub mod store;

pub use cache::ConversationCache;
pub use manager::HistoryManager;
pub use message::{ConversationKey, Message, Role};
pub use sqlite::SqliteHistoryStore;
pub use store::{HistoryStore, InMemoryHistoryStore};
