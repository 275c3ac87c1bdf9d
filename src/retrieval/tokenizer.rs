//! 分词模块
//!
//! 中英文混合分词，供混合检索的关键词路评分使用。
//! 含 CJK 字符时走 jieba（搜索引擎模式），纯英文按空格分词。

use std::collections::HashSet;
use std::sync::OnceLock;

use jieba_rs::Jieba;

/// 全局 Jieba 实例（延迟初始化）
static JIEBA: OnceLock<Jieba> = OnceLock::new();

fn get_jieba() -> &'static Jieba {
    JIEBA.get_or_init(Jieba::new)
}

fn is_cjk(c: char) -> bool {
    matches!(c,
        '\u{4E00}'..='\u{9FFF}' |   // CJK Unified Ideographs
        '\u{3400}'..='\u{4DBF}' |   // CJK Extension A
        '\u{F900}'..='\u{FAFF}' |   // CJK Compatibility Ideographs
        '\u{3000}'..='\u{303F}' |   // CJK Symbols and Punctuation
        '\u{3040}'..='\u{309F}' |   // Hiragana
        '\u{30A0}'..='\u{30FF}'     // Katakana
    )
}

fn contains_cjk(text: &str) -> bool {
    text.chars().any(is_cjk)
}

/// 按文本内容自动选择分词策略
pub fn tokenize(text: &str) -> Vec<String> {
    let text = text.trim();
    if text.is_empty() {
        return Vec::new();
    }

    if contains_cjk(text) {
        get_jieba()
            .cut_for_search(text, true)
            .into_iter()
            .map(|s| s.to_lowercase())
            .filter(|s| s.len() > 1 || is_cjk(s.chars().next().unwrap_or(' ')))
            .collect()
    } else {
        text.split_whitespace()
            .map(|s| s.to_lowercase())
            .filter(|s| s.len() > 1)
            .collect()
    }
}

/// 分词并返回词集合（用于相似度计算）
pub fn tokenize_to_set(text: &str) -> HashSet<String> {
    tokenize(text).into_iter().collect()
}

/// Jaccard 相似度
pub fn jaccard_similarity(set1: &HashSet<String>, set2: &HashSet<String>) -> f32 {
    if set1.is_empty() || set2.is_empty() {
        return 0.0;
    }
    let intersection = set1.intersection(set2).count() as f32;
    let union = set1.union(set2).count() as f32;
    intersection / union
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tokenize_chinese() {
        let tokens = tokenize("华东区第二季度销售额");
        assert!(!tokens.is_empty());
        assert!(tokens.iter().any(|t| t.contains("华东") || t.contains("销售")));
    }

    #[test]
    fn test_tokenize_english() {
        let tokens = tokenize("quarterly revenue for east region");
        assert!(tokens.contains(&"revenue".to_string()));
        assert!(tokens.contains(&"quarterly".to_string()));
    }

    #[test]
    fn test_tokenize_mixed() {
        let tokens = tokenize("Acme 公司的营收报告");
        assert!(tokens.iter().any(|t| t == "acme" || t.contains("营收")));
    }

    #[test]
    fn test_tokenize_empty() {
        assert!(tokenize("   ").is_empty());
    }

    #[test]
    fn test_jaccard_similarity() {
        let a = tokenize_to_set("华东区销售额统计");
        let b = tokenize_to_set("华东区销售额同比");
        assert!(jaccard_similarity(&a, &b) > 0.0);

        let c = tokenize_to_set("completely unrelated words");
        assert_eq!(jaccard_similarity(&a, &c), 0.0);
    }
}
