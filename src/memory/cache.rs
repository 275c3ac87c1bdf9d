//! 会话缓存：按会话键的 TTL 缓存
//!
//! 持有每段会话最近 max_messages 条消息的有界片段，TTL 为滑动窗口：
//! 每次 put/append 成功都重置过期时间。get 时惰性过期，sweep 时主动清理。
//! 缓存只是持久存储的派生视图，整体丢失无害。

use std::collections::HashMap;
use std::time::{Duration, Instant};

use tokio::sync::RwLock;

use super::message::{ConversationKey, Message};

/// 单个会话的缓存条目；TTL 为滑动窗口，expires_at 即最后写入时间 + ttl
struct CacheEntry {
    messages: Vec<Message>,
    expires_at: Instant,
}

impl CacheEntry {
    fn is_expired(&self) -> bool {
        Instant::now() >= self.expires_at
    }
}

/// 会话缓存：所有变更经同一把锁进入，条目内按 FIFO 截断
pub struct ConversationCache {
    entries: RwLock<HashMap<ConversationKey, CacheEntry>>,
    ttl: Duration,
    max_messages: usize,
}

impl ConversationCache {
    pub fn new(ttl: Duration, max_messages: usize) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            ttl,
            max_messages,
        }
    }

    /// 命中且未过期时返回缓存的消息序列；过期条目当场删除并视为未命中
    pub async fn get(&self, key: &ConversationKey) -> Option<Vec<Message>> {
        {
            let entries = self.entries.read().await;
            match entries.get(key) {
                Some(entry) if !entry.is_expired() => return Some(entry.messages.clone()),
                Some(_) => {}
                None => return None,
            }
        }

        // 升级为写锁删除过期条目；期间条目可能已被并发写刷新
        let mut entries = self.entries.write().await;
        if let Some(entry) = entries.get(key) {
            if !entry.is_expired() {
                return Some(entry.messages.clone());
            }
            entries.remove(key);
        }
        None
    }

    /// 整体替换：截断到最近 max_messages 条并重置过期时间
    pub async fn put(&self, key: &ConversationKey, mut messages: Vec<Message>) {
        Self::truncate(&mut messages, self.max_messages);
        let mut entries = self.entries.write().await;
        entries.insert(
            key.clone(),
            CacheEntry {
                messages,
                expires_at: Instant::now() + self.ttl,
            },
        );
    }

    /// 追加一条消息；条目不存在（或已过期）时等价于 put(key, [message])
    pub async fn append(&self, key: &ConversationKey, message: Message) {
        let now = Instant::now();
        let mut entries = self.entries.write().await;
        match entries.get_mut(key) {
            Some(entry) if !entry.is_expired() => {
                entry.messages.push(message);
                Self::truncate(&mut entry.messages, self.max_messages);
                entry.expires_at = now + self.ttl;
            }
            _ => {
                entries.insert(
                    key.clone(),
                    CacheEntry {
                        messages: vec![message],
                        expires_at: now + self.ttl,
                    },
                );
            }
        }
    }

    /// 立即移除条目，无视 TTL
    pub async fn invalidate(&self, key: &ConversationKey) {
        self.entries.write().await.remove(key);
    }

    /// 清理所有已过期条目，返回清理数量；供后台任务周期调用
    pub async fn sweep(&self) -> usize {
        let mut entries = self.entries.write().await;
        let before = entries.len();
        entries.retain(|_, entry| !entry.is_expired());
        before - entries.len()
    }

    /// 当前条目数（含未清理的过期条目）
    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }

    /// 超出上限时丢弃最旧的消息，保留最近部分
    fn truncate(messages: &mut Vec<Message>, max: usize) {
        if messages.len() > max {
            let drop = messages.len() - max;
            messages.drain(..drop);
        }
    }
}
