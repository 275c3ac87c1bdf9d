//! 响应合成器：检索上下文 + 会话历史 + 当前问题 → 单次模型调用
//!
//! 提示顺序固定：system（嵌入检索上下文）→ 裁剪后的历史 → 当前问题。
//! 流式模式按到达顺序经有界通道转发分片（通道满即停驻，背压完全由
//! 接收方决定），同时累积完整回答返回；缓冲模式一次取全。
//! 流中途出错即中止，已发出的分片不回收。

use std::sync::Arc;

use futures_util::StreamExt;
use tokio::sync::mpsc;

use crate::llm::LlmClient;
use crate::memory::Message;
use crate::retrieval::RetrievalResult;

const SYSTEM_PREAMBLE: &str = "You are Nectar, an assistant that answers questions \
about business data. Answer using ONLY the retrieved context below. If the context \
is empty or insufficient, say the data was not found; never invent figures.";

/// 响应合成器
pub struct ResponseSynthesizer {
    llm: Arc<dyn LlmClient>,
}

impl ResponseSynthesizer {
    pub fn new(llm: Arc<dyn LlmClient>) -> Self {
        Self { llm }
    }

    /// 组装提示：system（含检索上下文）→ 历史 → 当前问题
    fn build_messages(
        &self,
        history: &[Message],
        retrieval: &RetrievalResult,
        question: &str,
    ) -> Vec<Message> {
        let system = format!("{SYSTEM_PREAMBLE}\n\n{}", retrieval.render_context());
        let mut messages = Vec::with_capacity(history.len() + 2);
        messages.push(Message::system(system));
        messages.extend(history.iter().cloned());
        messages.push(Message::user(question));
        messages
    }

    /// 统一入口：给了分片通道走流式，否则走缓冲
    pub async fn run(
        &self,
        history: &[Message],
        retrieval: &RetrievalResult,
        question: &str,
        chunk_tx: Option<&mpsc::Sender<String>>,
    ) -> Result<String, String> {
        match chunk_tx {
            Some(tx) => self.synthesize_stream(history, retrieval, question, tx).await,
            None => self.synthesize(history, retrieval, question).await,
        }
    }

    /// 缓冲合成：整段回答可用后一次返回
    pub async fn synthesize(
        &self,
        history: &[Message],
        retrieval: &RetrievalResult,
        question: &str,
    ) -> Result<String, String> {
        let messages = self.build_messages(history, retrieval, question);
        self.llm.complete(&messages).await
    }

    /// 流式合成：分片按到达顺序转发至 chunk_tx，返回完整累计文本
    pub async fn synthesize_stream(
        &self,
        history: &[Message],
        retrieval: &RetrievalResult,
        question: &str,
        chunk_tx: &mpsc::Sender<String>,
    ) -> Result<String, String> {
        let messages = self.build_messages(history, retrieval, question);
        let mut stream = self.llm.complete_stream(&messages).await?;

        let mut answer = String::new();
        let mut sink_open = true;
        while let Some(item) = stream.next().await {
            // 出错即中止；answer 里已累积的内容与已发分片保持一致
            let chunk = item?;
            answer.push_str(&chunk);
            if sink_open && chunk_tx.send(chunk).await.is_err() {
                // 接收端已关闭：继续累积完整回答，但不再转发
                sink_open = false;
            }
        }
        Ok(answer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::MockLlmClient;
    use crate::memory::Role;
    use crate::retrieval::{RetrievalData, RetrievalResult};

    fn empty_retrieval() -> RetrievalResult {
        RetrievalResult {
            tool: "broad_search",
            data: RetrievalData::Empty,
        }
    }

    #[tokio::test]
    async fn test_stream_order_and_accumulation() {
        let mock = Arc::new(MockLlmClient::new());
        mock.push_stream(vec![Ok("Hel".into()), Ok("lo".into())]);
        let synth = ResponseSynthesizer::new(mock);

        let (tx, mut rx) = mpsc::channel(8);
        let answer = synth
            .synthesize_stream(&[], &empty_retrieval(), "greet me", &tx)
            .await
            .unwrap();
        drop(tx);

        assert_eq!(answer, "Hello");
        assert_eq!(rx.recv().await.unwrap(), "Hel");
        assert_eq!(rx.recv().await.unwrap(), "lo");
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_stream_error_aborts_after_sent_chunks() {
        let mock = Arc::new(MockLlmClient::new());
        mock.push_stream(vec![Ok("partial".into()), Err("provider died".into())]);
        let synth = ResponseSynthesizer::new(mock);

        let (tx, mut rx) = mpsc::channel(8);
        let result = synth
            .synthesize_stream(&[], &empty_retrieval(), "question", &tx)
            .await;
        drop(tx);

        assert!(result.is_err());
        // 已发出的分片不回收
        assert_eq!(rx.recv().await.unwrap(), "partial");
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_buffered_mode() {
        let mock = Arc::new(MockLlmClient::with_responses(["complete answer"]));
        let synth = ResponseSynthesizer::new(mock);
        let answer = synth
            .synthesize(&[], &empty_retrieval(), "question")
            .await
            .unwrap();
        assert_eq!(answer, "complete answer");
    }

    #[tokio::test]
    async fn test_prompt_order_system_history_question() {
        let mock = Arc::new(MockLlmClient::with_responses(["ok"]));
        let synth = ResponseSynthesizer::new(mock.clone());

        let history = vec![Message::user("earlier question"), Message::assistant("earlier answer")];
        synth
            .synthesize(&history, &empty_retrieval(), "current question")
            .await
            .unwrap();

        let calls = mock.calls();
        let prompt = &calls[0];
        assert_eq!(prompt.len(), 4);
        assert_eq!(prompt[0].role, Role::System);
        assert!(prompt[0].content.contains("Retrieved context"));
        assert_eq!(prompt[1].content, "earlier question");
        assert_eq!(prompt[2].content, "earlier answer");
        assert_eq!(prompt[3].role, Role::User);
        assert_eq!(prompt[3].content, "current question");
    }

    #[tokio::test]
    async fn test_run_without_sink_is_buffered() {
        let mock = Arc::new(MockLlmClient::with_responses(["buffered"]));
        let synth = ResponseSynthesizer::new(mock);
        let answer = synth
            .run(&[], &empty_retrieval(), "q", None)
            .await
            .unwrap();
        assert_eq!(answer, "buffered");
    }

    #[tokio::test]
    async fn test_closed_sink_still_returns_full_answer() {
        let mock = Arc::new(MockLlmClient::new());
        mock.push_stream(vec![Ok("a".into()), Ok("b".into()), Ok("c".into())]);
        let synth = ResponseSynthesizer::new(mock);

        let (tx, rx) = mpsc::channel(8);
        drop(rx);
        let answer = synth
            .synthesize_stream(&[], &empty_retrieval(), "q", &tx)
            .await
            .unwrap();
        assert_eq!(answer, "abc");
    }
}
