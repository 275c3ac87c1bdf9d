//! 向量检索接口与记录模型
//!
//! 向量库本体是外部协作方；这里定义稳定的查询契约（查询文本 + 结构化过滤 + k）
//! 与记录/过滤模型，并附带一个进程内关键词评分实现，供测试与演示使用。

use std::collections::HashMap;

use async_trait::async_trait;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::tokenizer;

/// 一条可检索的业务记录：正文 + 元数据
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BusinessRecord {
    pub id: String,
    pub content: String,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

impl BusinessRecord {
    pub fn new(id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            content: content.into(),
            metadata: HashMap::new(),
        }
    }

    pub fn with_meta(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }
}

/// 检索命中：记录 + 相关度分数（降序排列）
#[derive(Debug, Clone)]
pub struct ScoredRecord {
    pub record: BusinessRecord,
    pub score: f32,
}

/// 数值范围过滤：作用于可解析为数值的元数据字段，闭区间
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct RangeFilter {
    pub field: String,
    #[serde(default)]
    pub min: Option<f64>,
    #[serde(default)]
    pub max: Option<f64>,
}

/// 记录过滤条件：元数据等值匹配 + 可选数值范围
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct RecordFilter {
    #[serde(default)]
    pub equals: HashMap<String, String>,
    #[serde(default)]
    pub range: Option<RangeFilter>,
}

impl RecordFilter {
    pub fn is_empty(&self) -> bool {
        self.equals.is_empty() && self.range.is_none()
    }

    /// 记录是否满足全部过滤条件
    pub fn matches(&self, record: &BusinessRecord) -> bool {
        for (field, expected) in &self.equals {
            match record.metadata.get(field) {
                Some(actual) if actual.eq_ignore_ascii_case(expected) => {}
                _ => return false,
            }
        }
        if let Some(range) = &self.range {
            let value = match record
                .metadata
                .get(&range.field)
                .and_then(|v| v.parse::<f64>().ok())
            {
                Some(v) => v,
                None => return false,
            };
            if range.min.is_some_and(|min| value < min) {
                return false;
            }
            if range.max.is_some_and(|max| value > max) {
                return false;
            }
        }
        true
    }
}

/// 向量相似检索接口（外部向量库的协作契约）
#[async_trait]
pub trait VectorSearch: Send + Sync {
    /// 返回满足 filter、按相关度降序的至多 k 条记录
    async fn search(
        &self,
        query: &str,
        filter: &RecordFilter,
        k: usize,
    ) -> Result<Vec<ScoredRecord>, String>;
}

/// 进程内索引：关键词 Jaccard 评分 + 过滤匹配
///
/// 不做真正的向量化，只为让整条链路在无外部服务时可运行（演示与测试）。
pub struct InMemoryVectorIndex {
    records: Vec<BusinessRecord>,
}

impl InMemoryVectorIndex {
    pub fn new() -> Self {
        Self {
            records: Vec::new(),
        }
    }

    pub fn add(&mut self, record: BusinessRecord) {
        self.records.push(record);
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

impl Default for InMemoryVectorIndex {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl VectorSearch for InMemoryVectorIndex {
    async fn search(
        &self,
        query: &str,
        filter: &RecordFilter,
        k: usize,
    ) -> Result<Vec<ScoredRecord>, String> {
        let query_tokens = tokenizer::tokenize_to_set(query);

        let mut scored: Vec<ScoredRecord> = self
            .records
            .iter()
            .filter(|r| filter.matches(r))
            .map(|r| {
                let tokens = tokenizer::tokenize_to_set(&r.content);
                ScoredRecord {
                    record: r.clone(),
                    score: tokenizer::jaccard_similarity(&query_tokens, &tokens),
                }
            })
            .filter(|s| s.score > 0.0)
            .collect();

        scored.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(k);
        Ok(scored)
    }
}
