//! LLM 客户端抽象
//!
//! 所有后端（OpenAI 兼容 / DeepSeek / Mock）实现 LlmClient：
//! complete（缓冲一次取全）、complete_stream（按到达顺序产出增量分片）。

use std::pin::Pin;

use async_trait::async_trait;
use futures_util::Stream;

use crate::memory::Message;

/// 流式完成的分片流：按提供方产出顺序逐片交付，Err 表示流中断
pub type TokenStream = Pin<Box<dyn Stream<Item = Result<String, String>> + Send>>;

/// LLM 客户端 trait：缓冲完成与流式完成
#[async_trait]
pub trait LlmClient: Send + Sync {
    /// 缓冲完成：整段回答可用后一次返回
    async fn complete(&self, messages: &[Message]) -> Result<String, String>;

    /// 流式完成：返回增量分片流
    async fn complete_stream(&self, messages: &[Message]) -> Result<TokenStream, String>;

    /// 获取累计 token 使用统计：(prompt_tokens, completion_tokens, total_tokens)
    /// 默认返回 (0, 0, 0)，具体实现可覆盖
    fn token_usage(&self) -> (u64, u64, u64) {
        (0, 0, 0)
    }
}
