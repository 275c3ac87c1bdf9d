//! Mock LLM 客户端（用于测试，无需 API）
//!
//! 按脚本顺序弹出预设回复 / 预设分片流；脚本耗尽时回显最后一条 User 消息。
//! 每次调用的入参消息都会被记录，便于测试断言提示内容。

use std::collections::VecDeque;
use std::sync::Mutex;

use async_trait::async_trait;
use futures_util::stream;

use crate::llm::{LlmClient, TokenStream};
use crate::memory::{Message, Role};

/// Mock 客户端：可脚本化回复与分片流
#[derive(Default)]
pub struct MockLlmClient {
    responses: Mutex<VecDeque<String>>,
    streams: Mutex<VecDeque<Vec<Result<String, String>>>>,
    calls: Mutex<Vec<Vec<Message>>>,
}

impl MockLlmClient {
    pub fn new() -> Self {
        Self::default()
    }

    /// 预设若干条缓冲回复，按先进先出弹出
    pub fn with_responses<I, S>(responses: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let client = Self::default();
        for r in responses {
            client.push_response(r);
        }
        client
    }

    pub fn push_response(&self, response: impl Into<String>) {
        self.responses.lock().unwrap().push_back(response.into());
    }

    /// 预设一次流式完成的分片序列（Err 表示流中断）
    pub fn push_stream(&self, fragments: Vec<Result<String, String>>) {
        self.streams.lock().unwrap().push_back(fragments);
    }

    /// 已发生的调用入参（按调用顺序）
    pub fn calls(&self) -> Vec<Vec<Message>> {
        self.calls.lock().unwrap().clone()
    }

    fn record(&self, messages: &[Message]) {
        self.calls.lock().unwrap().push(messages.to_vec());
    }

    fn echo(messages: &[Message]) -> String {
        let last_user = messages
            .iter()
            .rev()
            .find(|m| matches!(m.role, Role::User))
            .map(|m| m.content.as_str())
            .unwrap_or("(no input)");
        format!("Echo from Mock: {last_user}")
    }
}

#[async_trait]
impl LlmClient for MockLlmClient {
    async fn complete(&self, messages: &[Message]) -> Result<String, String> {
        self.record(messages);
        let scripted = self.responses.lock().unwrap().pop_front();
        Ok(scripted.unwrap_or_else(|| Self::echo(messages)))
    }

    async fn complete_stream(&self, messages: &[Message]) -> Result<TokenStream, String> {
        self.record(messages);
        let fragments = self.streams.lock().unwrap().pop_front();
        let fragments = match fragments {
            Some(f) => f,
            None => {
                let scripted = self.responses.lock().unwrap().pop_front();
                vec![Ok(scripted.unwrap_or_else(|| Self::echo(messages)))]
            }
        };
        Ok(Box::pin(stream::iter(fragments)))
    }
}
