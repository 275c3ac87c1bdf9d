//! 历史持久化存储抽象
//!
//! 持久层是会话历史的事实来源，缓存只是可丢弃的派生视图。
//! 接口按会话键提供追加 / 全量读取 / 删除三个操作。

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::RwLock;

use super::message::{ConversationKey, Message};

/// 历史存储接口：追加式消息日志，读出顺序即写入顺序
#[async_trait]
pub trait HistoryStore: Send + Sync {
    /// 追加一条消息；持久成功后调用方才可更新缓存
    async fn append(&self, key: &ConversationKey, message: &Message) -> anyhow::Result<()>;

    /// 读取完整历史（插入顺序）
    async fn read_all(&self, key: &ConversationKey) -> anyhow::Result<Vec<Message>>;

    /// 删除整段会话
    async fn delete(&self, key: &ConversationKey) -> anyhow::Result<()>;
}

/// 内存历史存储（测试与无持久化配置时的兜底）
#[derive(Default)]
pub struct InMemoryHistoryStore {
    conversations: RwLock<HashMap<ConversationKey, Vec<Message>>>,
}

impl InMemoryHistoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl HistoryStore for InMemoryHistoryStore {
    async fn append(&self, key: &ConversationKey, message: &Message) -> anyhow::Result<()> {
        let mut conversations = self.conversations.write().await;
        conversations
            .entry(key.clone())
            .or_default()
            .push(message.clone());
        Ok(())
    }

    async fn read_all(&self, key: &ConversationKey) -> anyhow::Result<Vec<Message>> {
        let conversations = self.conversations.read().await;
        Ok(conversations.get(key).cloned().unwrap_or_default())
    }

    async fn delete(&self, key: &ConversationKey) -> anyhow::Result<()> {
        self.conversations.write().await.remove(key);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::message::Role;

    #[tokio::test]
    async fn test_append_then_read_in_order() {
        let store = InMemoryHistoryStore::new();
        let key = ConversationKey::new("u1", "s1");
        store.append(&key, &Message::user("q1")).await.unwrap();
        store.append(&key, &Message::assistant("a1")).await.unwrap();

        let all = store.read_all(&key).await.unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].role, Role::User);
        assert_eq!(all[1].role, Role::Assistant);
    }

    #[tokio::test]
    async fn test_read_unknown_key_is_empty() {
        let store = InMemoryHistoryStore::new();
        let all = store
            .read_all(&ConversationKey::new("nobody", "nowhere"))
            .await
            .unwrap();
        assert!(all.is_empty());
    }

    #[tokio::test]
    async fn test_delete_clears_conversation() {
        let store = InMemoryHistoryStore::new();
        let key = ConversationKey::new("u1", "s1");
        store.append(&key, &Message::user("q")).await.unwrap();
        store.delete(&key).await.unwrap();
        assert!(store.read_all(&key).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_conversations_are_isolated() {
        let store = InMemoryHistoryStore::new();
        let k1 = ConversationKey::new("u1", "s1");
        let k2 = ConversationKey::new("u1", "s2");
        store.append(&k1, &Message::user("in s1")).await.unwrap();
        assert!(store.read_all(&k2).await.unwrap().is_empty());
    }
}
