//! 检索工具集：封闭集合的检索 / 聚合模式
//!
//! 每个工具都是只读纯函数：区别仅在查询形态（点查 / 聚合 / 混合 / 宽查）
//! 与结果组织方式。决策枚举穷尽匹配，集合之外无工具可调。
//! 底层存储错误一律吸收为空结果，让模型如实回答“没查到”。

use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::Arc;

use crate::intent::ToolDecision;
use crate::retrieval::tokenizer;
use crate::retrieval::vector::{RecordFilter, ScoredRecord, VectorSearch};

/// 点查的固定取数
const LOOKUP_K: usize = 3;
/// 聚合取数相对 top_k 的放大倍数
const AGGREGATE_WIDEN: usize = 4;
/// 每组保留的代表样本数
const GROUP_SAMPLES: usize = 2;
/// RRF 融合常数
const RRF_K: f32 = 60.0;
/// 上下文渲染时单条正文的截断长度（字符）
const SNIPPET_CHARS: usize = 200;

/// 一个分组的聚合摘要
#[derive(Debug, Clone)]
pub struct GroupSummary {
    pub key: String,
    pub count: usize,
    pub samples: Vec<String>,
}

/// 检索结果载荷
#[derive(Debug, Clone)]
pub enum RetrievalData {
    /// 命中记录（按相关度降序）
    Records(Vec<ScoredRecord>),
    /// 分组聚合（按组内数量降序）
    Groups(Vec<GroupSummary>),
    /// 空结果（含被吸收的检索失败）
    Empty,
}

/// 一次工具调用的结果，供合成器嵌入提示
#[derive(Debug, Clone)]
pub struct RetrievalResult {
    pub tool: &'static str,
    pub data: RetrievalData,
}

impl RetrievalResult {
    fn empty(tool: &'static str) -> Self {
        Self {
            tool,
            data: RetrievalData::Empty,
        }
    }

    /// 渲染为提示上下文文本
    pub fn render_context(&self) -> String {
        match &self.data {
            RetrievalData::Empty => "Retrieved context: (no matching records)".to_string(),
            RetrievalData::Records(records) => {
                let mut out = String::from("Retrieved context:\n");
                for (i, hit) in records.iter().enumerate() {
                    out.push_str(&format!(
                        "[{}] (relevance: {:.2}) {}\n",
                        i + 1,
                        hit.score,
                        snippet(&hit.record.content),
                    ));
                }
                out
            }
            RetrievalData::Groups(groups) => {
                let mut out = String::from("Aggregated context:\n");
                for group in groups {
                    out.push_str(&format!("- {} ({} records)", group.key, group.count));
                    if !group.samples.is_empty() {
                        out.push_str(&format!("; e.g. {}", group.samples.join(" / ")));
                    }
                    out.push('\n');
                }
                out
            }
        }
    }
}

/// 检索工具集：持有向量检索接口，按决策分发
pub struct ToolSet {
    vector: Arc<dyn VectorSearch>,
    top_k: usize,
}

impl ToolSet {
    pub fn new(vector: Arc<dyn VectorSearch>, top_k: usize) -> Self {
        Self { vector, top_k }
    }

    /// 按决策执行检索；存储错误吸收为空结果，不让请求失败
    pub async fn dispatch(&self, decision: &ToolDecision) -> RetrievalResult {
        let tool = decision.label();
        let outcome = match decision {
            ToolDecision::RecordLookup { query, filters } => self.lookup(query, filters).await,
            ToolDecision::Aggregate {
                query,
                filters,
                group_by,
            } => self.aggregate(query, filters, group_by).await,
            ToolDecision::HybridSearch { query, filters } => self.hybrid(query, filters).await,
            ToolDecision::BroadSearch { query } => self.broad(query).await,
        };

        match outcome {
            Ok(RetrievalData::Records(records)) if records.is_empty() => {
                RetrievalResult::empty(tool)
            }
            Ok(RetrievalData::Groups(groups)) if groups.is_empty() => RetrievalResult::empty(tool),
            Ok(data) => RetrievalResult { tool, data },
            Err(e) => {
                tracing::warn!("Retrieval tool {tool} failed ({e}), returning empty context");
                RetrievalResult::empty(tool)
            }
        }
    }

    /// 点查：小取数 + 严格过滤
    async fn lookup(&self, query: &str, filters: &RecordFilter) -> Result<RetrievalData, String> {
        let hits = self.vector.search(query, filters, LOOKUP_K).await?;
        Ok(RetrievalData::Records(hits))
    }

    /// 聚合：宽取后按元数据字段分组计数，附代表样本
    async fn aggregate(
        &self,
        query: &str,
        filters: &RecordFilter,
        group_by: &str,
    ) -> Result<RetrievalData, String> {
        let hits = self
            .vector
            .search(query, filters, self.top_k * AGGREGATE_WIDEN)
            .await?;

        let mut groups: HashMap<String, GroupSummary> = HashMap::new();
        for hit in &hits {
            let key = hit
                .record
                .metadata
                .get(group_by)
                .cloned()
                .unwrap_or_else(|| "(unlabeled)".to_string());
            let entry = groups.entry(key.clone()).or_insert_with(|| GroupSummary {
                key,
                count: 0,
                samples: Vec::new(),
            });
            entry.count += 1;
            if entry.samples.len() < GROUP_SAMPLES {
                entry.samples.push(snippet(&hit.record.content));
            }
        }

        let mut groups: Vec<GroupSummary> = groups.into_values().collect();
        groups.sort_by(|a, b| b.count.cmp(&a.count).then_with(|| a.key.cmp(&b.key)));
        Ok(RetrievalData::Groups(groups))
    }

    /// 混合检索：向量序 + 关键词序做 RRF 融合后重排
    async fn hybrid(&self, query: &str, filters: &RecordFilter) -> Result<RetrievalData, String> {
        let candidates = self.vector.search(query, filters, self.top_k * 2).await?;
        if candidates.is_empty() {
            return Ok(RetrievalData::Records(Vec::new()));
        }

        // 关键词序：候选按与查询的 Jaccard 相似度排序
        let query_tokens = tokenizer::tokenize_to_set(query);
        let mut keyword_order: Vec<(usize, f32)> = candidates
            .iter()
            .enumerate()
            .map(|(i, hit)| {
                let tokens = tokenizer::tokenize_to_set(&hit.record.content);
                (i, tokenizer::jaccard_similarity(&query_tokens, &tokens))
            })
            .collect();
        keyword_order.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(Ordering::Equal));

        // RRF：两个序各贡献 1/(k+rank)
        let mut fused: HashMap<usize, f32> = HashMap::new();
        for (rank, _) in candidates.iter().enumerate() {
            *fused.entry(rank).or_insert(0.0) += 1.0 / (RRF_K + rank as f32);
        }
        for (rank, (idx, score)) in keyword_order.iter().enumerate() {
            if *score > 0.0 {
                *fused.entry(*idx).or_insert(0.0) += 1.0 / (RRF_K + rank as f32);
            }
        }

        let mut order: Vec<(usize, f32)> = fused.into_iter().collect();
        order.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(Ordering::Equal));

        let records: Vec<ScoredRecord> = order
            .into_iter()
            .take(self.top_k)
            .map(|(idx, fused_score)| ScoredRecord {
                record: candidates[idx].record.clone(),
                score: fused_score,
            })
            .collect();
        Ok(RetrievalData::Records(records))
    }

    /// 兜底宽检索：空过滤
    async fn broad(&self, query: &str) -> Result<RetrievalData, String> {
        let hits = self
            .vector
            .search(query, &RecordFilter::default(), self.top_k)
            .await?;
        Ok(RetrievalData::Records(hits))
    }
}

/// 正文截断（UTF-8 安全，按字符计）
fn snippet(content: &str) -> String {
    let mut chars = content.chars();
    let head: String = chars.by_ref().take(SNIPPET_CHARS).collect();
    if chars.next().is_some() {
        format!("{head}…")
    } else {
        head
    }
}
