//! SQLite 历史存储
//!
//! rusqlite 同步连接，异步接口经 spawn_blocking 进入；
//! messages 表以自增 id 保证读出顺序等于写入顺序。

use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection};
use uuid::Uuid;

use super::message::{ConversationKey, Message, Role};
use super::store::HistoryStore;

/// SQLite 持久化历史存储
pub struct SqliteHistoryStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteHistoryStore {
    /// 打开（或创建）数据库文件并初始化表结构
    pub fn open(db_path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let conn = Connection::open(db_path.as_ref())?;
        Self::init_tables(&conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// 内存数据库（测试用）
    pub fn open_in_memory() -> anyhow::Result<Self> {
        let conn = Connection::open_in_memory()?;
        Self::init_tables(&conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    fn init_tables(conn: &Connection) -> rusqlite::Result<()> {
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS conversations (
                user_id TEXT NOT NULL,
                session_id TEXT NOT NULL,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                PRIMARY KEY (user_id, session_id)
            );
            CREATE TABLE IF NOT EXISTS messages (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                message_id TEXT NOT NULL,
                user_id TEXT NOT NULL,
                session_id TEXT NOT NULL,
                role TEXT NOT NULL,
                content TEXT NOT NULL,
                created_at TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_messages_conversation
                ON messages(user_id, session_id);",
        )
    }

    fn lock(conn: &Arc<Mutex<Connection>>) -> MutexGuard<'_, Connection> {
        // 锁中毒时沿用内部连接继续工作
        match conn.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

#[async_trait]
impl HistoryStore for SqliteHistoryStore {
    async fn append(&self, key: &ConversationKey, message: &Message) -> anyhow::Result<()> {
        let conn = self.conn.clone();
        let key = key.clone();
        let message = message.clone();
        tokio::task::spawn_blocking(move || -> rusqlite::Result<()> {
            let conn = Self::lock(&conn);
            let now = Utc::now();
            conn.execute(
                "INSERT INTO conversations (user_id, session_id, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?3)
                 ON CONFLICT (user_id, session_id) DO UPDATE SET updated_at = ?3",
                params![key.user_id, key.session_id, now],
            )?;
            conn.execute(
                "INSERT INTO messages (message_id, user_id, session_id, role, content, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    message.id.to_string(),
                    key.user_id,
                    key.session_id,
                    message.role.as_str(),
                    message.content,
                    message.timestamp,
                ],
            )?;
            Ok(())
        })
        .await??;
        Ok(())
    }

    async fn read_all(&self, key: &ConversationKey) -> anyhow::Result<Vec<Message>> {
        let conn = self.conn.clone();
        let key = key.clone();
        let messages = tokio::task::spawn_blocking(move || -> rusqlite::Result<Vec<Message>> {
            let conn = Self::lock(&conn);
            let mut stmt = conn.prepare(
                "SELECT message_id, role, content, created_at
                 FROM messages
                 WHERE user_id = ?1 AND session_id = ?2
                 ORDER BY id",
            )?;
            let rows = stmt.query_map(params![key.user_id, key.session_id], |row| {
                let message_id: String = row.get(0)?;
                let role: String = row.get(1)?;
                let content: String = row.get(2)?;
                let created_at: DateTime<Utc> = row.get(3)?;
                Ok(Message {
                    id: Uuid::parse_str(&message_id).unwrap_or_else(|_| Uuid::new_v4()),
                    role: Role::parse(&role),
                    content,
                    timestamp: created_at,
                })
            })?;
            rows.collect()
        })
        .await??;
        Ok(messages)
    }

    async fn delete(&self, key: &ConversationKey) -> anyhow::Result<()> {
        let conn = self.conn.clone();
        let key = key.clone();
        tokio::task::spawn_blocking(move || -> rusqlite::Result<()> {
            let conn = Self::lock(&conn);
            conn.execute(
                "DELETE FROM messages WHERE user_id = ?1 AND session_id = ?2",
                params![key.user_id, key.session_id],
            )?;
            conn.execute(
                "DELETE FROM conversations WHERE user_id = ?1 AND session_id = ?2",
                params![key.user_id, key.session_id],
            )?;
            Ok(())
        })
        .await??;
        Ok(())
    }
}
