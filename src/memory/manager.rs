//! 历史管理器：缓存旁路门面
//!
//! 读走缓存，未命中回源持久层并回填；写先持久化、成功后再进缓存。
//! 同一会话键的写路径（含未命中回填）经按键互斥串行化，
//! 保证缓存序列始终是持久序列的后缀。

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{Mutex, RwLock};

use super::cache::ConversationCache;
use super::message::{ConversationKey, Message, Role};
use super::store::HistoryStore;

/// 历史管理器：其他组件读写会话状态的唯一入口
pub struct HistoryManager {
    cache: Arc<ConversationCache>,
    store: Arc<dyn HistoryStore>,
    context_limit: usize,
    key_locks: RwLock<HashMap<ConversationKey, Arc<Mutex<()>>>>,
}

impl HistoryManager {
    pub fn new(
        cache: Arc<ConversationCache>,
        store: Arc<dyn HistoryStore>,
        context_limit: usize,
    ) -> Self {
        Self {
            cache,
            store,
            context_limit,
            key_locks: RwLock::new(HashMap::new()),
        }
    }

    /// 供 LLM 使用的上下文窗口：最近 context_limit 条
    ///
    /// 命中缓存直接取尾部；未命中则全量读持久层、回填缓存再取尾部。
    /// 持久层读失败降级为空历史（记录 warn），不终止请求。
    pub async fn history_for_llm(&self, key: &ConversationKey) -> Vec<Message> {
        if let Some(messages) = self.cache.get(key).await {
            return Self::tail(messages, self.context_limit);
        }

        // 未命中回填与写共用按键互斥，避免回填覆盖并发追加
        let lock = self.lock_for(key).await;
        let _guard = lock.lock().await;

        if let Some(messages) = self.cache.get(key).await {
            return Self::tail(messages, self.context_limit);
        }

        match self.store.read_all(key).await {
            Ok(full) => {
                self.cache.put(key, full.clone()).await;
                Self::tail(full, self.context_limit)
            }
            Err(e) => {
                tracing::warn!("History read failed for {key} ({e}), continuing with empty context");
                Vec::new()
            }
        }
    }

    /// 写一条消息：先持久化（失败则整体失败且缓存保持原样），再追加缓存
    pub async fn add_message(
        &self,
        key: &ConversationKey,
        role: Role,
        content: impl Into<String>,
    ) -> anyhow::Result<Message> {
        let lock = self.lock_for(key).await;
        let _guard = lock.lock().await;

        let message = Message::new(role, content);
        self.store.append(key, &message).await?;
        self.cache.append(key, message.clone()).await;
        Ok(message)
    }

    /// 清空会话：缓存无条件失效；持久删除成功调用才算成功
    pub async fn clear_history(&self, key: &ConversationKey) -> anyhow::Result<()> {
        let lock = self.lock_for(key).await;
        let _guard = lock.lock().await;

        self.cache.invalidate(key).await;
        self.store.delete(key).await
    }

    /// 取（或建）该会话键的写互斥
    async fn lock_for(&self, key: &ConversationKey) -> Arc<Mutex<()>> {
        {
            let locks = self.key_locks.read().await;
            if let Some(lock) = locks.get(key) {
                return lock.clone();
            }
        }
        let mut locks = self.key_locks.write().await;
        locks
            .entry(key.clone())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    fn tail(messages: Vec<Message>, limit: usize) -> Vec<Message> {
        if messages.len() > limit {
            messages[messages.len() - limit..].to_vec()
        } else {
            messages
        }
    }
}
