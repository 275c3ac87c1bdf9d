//! 请求编排：读历史 → 路由 → 检索 → 合成 → 持久化
//!
//! 各阶段严格串行、不自动重试。路由与检索失败在组件内降级；
//! 合成与持久化失败终止请求。持久化阶段对问题与回答都会尝试写入，
//! 保证历史与已返回给用户的内容一致。
//! 另提供按配置组装各组件的工厂，与后台缓存清扫任务。

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::config::AppConfig;
use crate::core::OrchestrationError;
use crate::intent::IntentRouter;
use crate::llm::{create_deepseek_client, LlmClient, MockLlmClient, OpenAiClient};
use crate::memory::{
    ConversationCache, ConversationKey, HistoryManager, HistoryStore, InMemoryHistoryStore, Role,
    SqliteHistoryStore,
};
use crate::retrieval::{ToolSet, VectorSearch};
use crate::synth::ResponseSynthesizer;

/// 编排器：每次请求的阶段状态机
pub struct Orchestrator {
    history: HistoryManager,
    router: IntentRouter,
    tools: ToolSet,
    synth: ResponseSynthesizer,
    streaming: bool,
}

impl Orchestrator {
    pub fn new(
        history: HistoryManager,
        router: IntentRouter,
        tools: ToolSet,
        synth: ResponseSynthesizer,
        streaming: bool,
    ) -> Self {
        Self {
            history,
            router,
            tools,
            synth,
            streaming,
        }
    }

    /// 处理一个问题
    ///
    /// 提供 chunk_tx 且配置启用流式时，回答分片边生成边经通道转发；
    /// 无论哪种模式，返回值都是完整回答。
    pub async fn handle_question(
        &self,
        user_id: &str,
        session_id: &str,
        question: &str,
        chunk_tx: Option<mpsc::Sender<String>>,
    ) -> Result<String, OrchestrationError> {
        let key = ConversationKey::new(user_id, session_id);

        // ReadHistory：读失败已在门面内降级为空上下文
        let history = self.history.history_for_llm(&key).await;

        // Route：内部兜底，从不失败
        let decision = self.router.route(question, &history).await;
        tracing::debug!(tool = decision.label(), conversation = %key, "Routed question");

        // Retrieve：存储错误已吸收为空结果
        let retrieval = self.tools.dispatch(&decision).await;

        // Synthesize
        let tx = if self.streaming {
            chunk_tx.as_ref()
        } else {
            None
        };
        let answer = self
            .synth
            .run(&history, &retrieval, question, tx)
            .await
            .map_err(OrchestrationError::Synthesis)?;

        // Persist：问题与回答都尝试写入；首个错误作为请求结果
        let mut persist_err: Option<anyhow::Error> = None;
        if let Err(e) = self.history.add_message(&key, Role::User, question).await {
            persist_err = Some(e);
        }
        if let Err(e) = self.history.add_message(&key, Role::Assistant, &answer).await {
            persist_err.get_or_insert(e);
        }
        if let Some(e) = persist_err {
            tracing::error!("Failed to persist conversation turn for {key}: {e}");
            return Err(OrchestrationError::Persistence {
                answer,
                reason: e.to_string(),
            });
        }

        Ok(answer)
    }

    /// 清空一段会话的历史（缓存 + 持久层）
    pub async fn clear_conversation(&self, user_id: &str, session_id: &str) -> anyhow::Result<()> {
        let key = ConversationKey::new(user_id, session_id);
        self.history.clear_history(&key).await
    }
}

/// 根据配置与环境变量选择 LLM 后端（DeepSeek / OpenAI 兼容 / Mock）
pub fn create_llm_from_config(cfg: &AppConfig) -> Arc<dyn LlmClient> {
    let provider = cfg.llm.provider.to_lowercase();
    let use_deepseek = std::env::var("DEEPSEEK_API_KEY").is_ok()
        || (provider == "deepseek" && std::env::var("OPENAI_API_KEY").is_ok());
    let use_openai = std::env::var("OPENAI_API_KEY").is_ok() && provider != "deepseek";

    if use_deepseek {
        let model = cfg
            .llm
            .deepseek
            .model
            .clone()
            .unwrap_or_else(|| cfg.llm.model.clone());
        tracing::info!("Using DeepSeek LLM ({})", model);
        Arc::new(create_deepseek_client(Some(&model)))
    } else if use_openai {
        let model = cfg
            .llm
            .openai
            .model
            .clone()
            .unwrap_or_else(|| cfg.llm.model.clone());
        let base = cfg.llm.base_url.as_deref();
        tracing::info!("Using OpenAI-compatible LLM ({})", model);
        Arc::new(OpenAiClient::new(
            base,
            &model,
            std::env::var("OPENAI_API_KEY").ok().as_deref(),
        ))
    } else {
        tracing::warn!("No API key set or provider unknown, using Mock LLM");
        Arc::new(MockLlmClient::new())
    }
}

/// 根据配置选择持久历史存储（SQLite / 内存兜底）
pub fn create_history_store(cfg: &AppConfig) -> Arc<dyn HistoryStore> {
    if let Some(path) = &cfg.history.db_path {
        match SqliteHistoryStore::open(path) {
            Ok(store) => {
                tracing::info!("Using SQLite history store: {:?}", path);
                return Arc::new(store);
            }
            Err(e) => {
                tracing::warn!("Failed to open SQLite store ({e}), falling back to memory");
            }
        }
    } else {
        tracing::info!("Using in-memory history store");
    }
    Arc::new(InMemoryHistoryStore::new())
}

/// 按配置组装编排器，并启动后台缓存清扫任务
///
/// 返回的 CancellationToken 用于停止清扫任务；请求处理本身不接受取消。
pub fn create_orchestrator(
    cfg: &AppConfig,
    vector: Arc<dyn VectorSearch>,
) -> (Arc<Orchestrator>, CancellationToken) {
    let llm = create_llm_from_config(cfg);
    let store = create_history_store(cfg);

    let cache = Arc::new(ConversationCache::new(
        Duration::from_secs(cfg.cache.ttl_secs),
        cfg.cache.max_messages,
    ));
    let history = HistoryManager::new(cache.clone(), store, cfg.history.context_limit);
    let router = IntentRouter::new(llm.clone());
    let tools = ToolSet::new(vector, cfg.retrieval.top_k);
    let synth = ResponseSynthesizer::new(llm);

    let orchestrator = Arc::new(Orchestrator::new(
        history,
        router,
        tools,
        synth,
        cfg.app.streaming,
    ));

    let token = CancellationToken::new();
    spawn_sweeper(
        cache,
        Duration::from_secs(cfg.cache.sweep_interval_secs),
        token.clone(),
    );

    (orchestrator, token)
}

/// 后台清扫：周期清理过期缓存条目；与请求处理互不阻塞
pub fn spawn_sweeper(
    cache: Arc<ConversationCache>,
    interval: Duration,
    token: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        // 首个 tick 立即触发，跳过
        ticker.tick().await;
        loop {
            tokio::select! {
                _ = token.cancelled() => break,
                _ = ticker.tick() => {
                    let removed = cache.sweep().await;
                    if removed > 0 {
                        tracing::debug!("Swept {removed} expired conversation cache entries");
                    }
                }
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::Message;

    #[tokio::test]
    async fn test_sweeper_cleans_expired_entries() {
        let cache = Arc::new(ConversationCache::new(Duration::from_millis(50), 20));
        let key = ConversationKey::new("u1", "s1");
        cache.put(&key, vec![Message::user("m")]).await;

        let token = CancellationToken::new();
        let handle = spawn_sweeper(cache.clone(), Duration::from_millis(40), token.clone());

        tokio::time::sleep(Duration::from_millis(150)).await;
        assert!(cache.is_empty().await);

        token.cancel();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn test_full_flow_with_mock_components() {
        let cfg = AppConfig::default();
        let llm: Arc<MockLlmClient> = Arc::new(MockLlmClient::new());
        let store = Arc::new(InMemoryHistoryStore::new());
        let cache = Arc::new(ConversationCache::new(
            Duration::from_secs(cfg.cache.ttl_secs),
            cfg.cache.max_messages,
        ));
        let orchestrator = Orchestrator::new(
            HistoryManager::new(cache, store, cfg.history.context_limit),
            IntentRouter::new(llm.clone()),
            ToolSet::new(
                Arc::new(crate::retrieval::InMemoryVectorIndex::new()),
                cfg.retrieval.top_k,
            ),
            ResponseSynthesizer::new(llm),
            cfg.app.streaming,
        );

        // Mock 回显下整条链路可跑通（路由兜底 + 空检索 + 回显合成）
        let answer = orchestrator
            .handle_question("u1", "s1", "hello", None)
            .await
            .unwrap();
        assert!(!answer.is_empty());
    }
}
