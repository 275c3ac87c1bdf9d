//! 意图路由：把用户问题分类到固定的检索工具集
//!
//! 构造分类提示（工具目录 + 结构化输出 schema + 裁剪后的会话历史），
//! 单次调用 LLM 要求 JSON 输出，并对封闭工具集做校验。
//! 任何解析 / 校验 / 调用失败都替换为 broad_search 兜底决策，不向上传播。

use std::sync::Arc;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::llm::LlmClient;
use crate::memory::{Message, Role};
use crate::retrieval::RecordFilter;

/// 聚合工具缺省的分组字段
pub const DEFAULT_GROUP_BY: &str = "category";

/// 工具决策：封闭变体集合，每个变体自带该工具的结构化输入
#[derive(Debug, Clone, PartialEq)]
pub enum ToolDecision {
    /// 点查：按精确过滤定位单条或少量记录
    RecordLookup { query: String, filters: RecordFilter },
    /// 聚合：宽取后按元数据字段分组统计
    Aggregate {
        query: String,
        filters: RecordFilter,
        group_by: String,
    },
    /// 混合检索：向量 + 关键词融合排序
    HybridSearch { query: String, filters: RecordFilter },
    /// 兜底宽检索：原始问题、空过滤
    BroadSearch { query: String },
}

impl ToolDecision {
    /// 工具标识（日志与检索结果标注用）
    pub fn label(&self) -> &'static str {
        match self {
            ToolDecision::RecordLookup { .. } => "record_lookup",
            ToolDecision::Aggregate { .. } => "aggregate",
            ToolDecision::HybridSearch { .. } => "hybrid_search",
            ToolDecision::BroadSearch { .. } => "broad_search",
        }
    }

    /// 兜底决策：原始问题 + 空过滤的宽检索
    pub fn fallback(question: &str) -> Self {
        ToolDecision::BroadSearch {
            query: question.to_string(),
        }
    }
}

/// LLM 结构化输出的线格式；缺省字段由路由器补齐
#[derive(Debug, Serialize, Deserialize, JsonSchema)]
struct WireDecision {
    /// record_lookup / aggregate / hybrid_search / broad_search 之一
    tool: String,
    /// 检索查询文本；缺省时使用原始问题
    #[serde(default)]
    query: Option<String>,
    /// 元数据过滤条件
    #[serde(default)]
    filters: RecordFilter,
    /// 聚合分组字段（仅 aggregate 使用）
    #[serde(default)]
    group_by: Option<String>,
}

/// 固定的工具目录描述（嵌入分类提示）
const TOOL_CATALOG: &str = r#"Available tools:
- record_lookup: pinpoint one specific record or metric.
  Example questions: "What was Acme's revenue in Q2?", "华东区 3 月的销售额是多少？"
- aggregate: group and summarize many records by a metadata field.
  Example questions: "Break down expenses by category", "每个地区各有多少订单？"
  Requires "group_by" (a metadata field name); defaults to "category" when unsure.
- hybrid_search: ranked search mixing semantic and keyword relevance, for
  report-style or comparison questions. Example: "Summarize how the east region
  performed last quarter", "对比两家公司的季度表现".
- broad_search: wide search with no filters, when nothing else clearly fits.

Use the conversation history to resolve follow-ups ("and for company B?" keeps
the previous tool and swaps the subject)."#;

/// 意图路由器
pub struct IntentRouter {
    llm: Arc<dyn LlmClient>,
}

impl IntentRouter {
    pub fn new(llm: Arc<dyn LlmClient>) -> Self {
        Self { llm }
    }

    /// 路由永不失败：任何错误都降级为兜底宽检索
    pub async fn route(&self, question: &str, history: &[Message]) -> ToolDecision {
        match self.classify(question, history).await {
            Ok(decision) => decision,
            Err(e) => {
                tracing::warn!("Intent classification failed ({e}), falling back to broad search");
                ToolDecision::fallback(question)
            }
        }
    }

    async fn classify(&self, question: &str, history: &[Message]) -> Result<ToolDecision, String> {
        let system = self.build_system_prompt(history);
        let messages = vec![
            Message::system(system),
            Message::user(format!("Question: {question}")),
        ];

        let response = self.llm.complete(&messages).await?;
        let json = extract_json(&response).ok_or("no JSON object in classifier output")?;
        let wire: WireDecision =
            serde_json::from_str(json).map_err(|e| format!("invalid decision JSON: {e}"))?;
        validate(wire, question)
    }

    fn build_system_prompt(&self, history: &[Message]) -> String {
        let schema = schemars::schema_for!(WireDecision);
        let schema_json =
            serde_json::to_string_pretty(&schema).unwrap_or_else(|_| "{}".to_string());

        let mut prompt = format!(
            "You are a query router for a business-data Q&A system. \
             Classify the user's question into exactly one tool.\n\n\
             {TOOL_CATALOG}\n\n\
             Respond with ONLY a JSON object matching this schema (no explanation):\n{schema_json}\n"
        );

        if !history.is_empty() {
            prompt.push_str("\nRecent conversation:\n");
            for m in history {
                let tag = match m.role {
                    Role::User => "user",
                    Role::Assistant => "assistant",
                    Role::System => "system",
                };
                prompt.push_str(&format!("[{tag}] {}\n", m.content));
            }
        }

        prompt
    }
}

/// 校验线格式并转为封闭决策；未知工具报错（由调用方兜底）
fn validate(wire: WireDecision, question: &str) -> Result<ToolDecision, String> {
    let query = wire
        .query
        .filter(|q| !q.trim().is_empty())
        .unwrap_or_else(|| question.to_string());

    match wire.tool.as_str() {
        "record_lookup" => Ok(ToolDecision::RecordLookup {
            query,
            filters: wire.filters,
        }),
        "aggregate" => Ok(ToolDecision::Aggregate {
            query,
            filters: wire.filters,
            // 缺分组字段时补文档化默认值，不再二次询问模型
            group_by: wire
                .group_by
                .filter(|g| !g.trim().is_empty())
                .unwrap_or_else(|| DEFAULT_GROUP_BY.to_string()),
        }),
        "hybrid_search" => Ok(ToolDecision::HybridSearch {
            query,
            filters: wire.filters,
        }),
        "broad_search" => Ok(ToolDecision::BroadSearch { query }),
        other => Err(format!("unknown tool: {other}")),
    }
}

/// 从文本提取 JSON 块（```json 围栏或最外层大括号）
fn extract_json(output: &str) -> Option<&str> {
    let trimmed = output.trim();

    if let Some(start) = trimmed.find("```json") {
        let rest = &trimmed[start + 7..];
        return Some(
            rest.find("```")
                .map(|end| rest[..end].trim())
                .unwrap_or_else(|| rest.trim()),
        );
    }

    let start = trimmed.find('{')?;
    let end = trimmed.rfind('}')?;
    if end < start {
        return None;
    }
    Some(&trimmed[start..=end])
}
