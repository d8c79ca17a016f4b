//! 어휘 분석 - 토큰화 + BM25 스코어링
//!
//! 하이브리드 검색의 재순위화와 부서 분류기가 같은 토큰 규칙을 사용합니다.
//! ref: https://en.wikipedia.org/wiki/Okapi_BM25

use std::collections::{HashMap, HashSet};

/// BM25 term frequency 포화 파라미터
pub const BM25_K1: f32 = 1.2;
/// BM25 문서 길이 정규화 파라미터
pub const BM25_B: f32 = 0.75;

// ============================================================================
// Tokenizer
// ============================================================================

/// 텍스트를 정규화된 토큰으로 분할
///
/// 영숫자가 아닌 문자에서 끊고, 소문자화 후 간단한 복수형을 접습니다.
pub fn tokenize(text: &str) -> Vec<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(normalize_token)
        .collect()
}

/// 단일 토큰 정규화 (소문자 + 복수형 접기)
///
/// "policies" -> "policy", "leaves" -> "leave", "class"는 그대로.
pub fn normalize_token(token: &str) -> String {
    let lower = token.to_lowercase();
    let len = lower.chars().count();

    if len > 4 && lower.ends_with("ies") {
        return format!("{}y", &lower[..lower.len() - 3]);
    }
    if len > 3 && lower.ends_with('s') && !lower.ends_with("ss") && !lower.ends_with("us") {
        return lower[..lower.len() - 1].to_string();
    }
    lower
}

// ============================================================================
// BM25
// ============================================================================

/// 부서 인덱스 단위 BM25 통계
///
/// 인덱스 빌드 시 한 번 계산되어 인덱스와 함께 교체됩니다.
#[derive(Debug, Clone, Default)]
pub struct LexicalStats {
    doc_freq: HashMap<String, usize>,
    total_docs: usize,
    avg_len: f32,
}

impl LexicalStats {
    /// 토큰화된 청크 목록에서 통계 생성
    pub fn from_documents<'a, I>(docs: I) -> Self
    where
        I: IntoIterator<Item = &'a [String]>,
    {
        let mut doc_freq: HashMap<String, usize> = HashMap::new();
        let mut total_docs = 0usize;
        let mut total_len = 0usize;

        for tokens in docs {
            total_docs += 1;
            total_len += tokens.len();
            let unique: HashSet<&String> = tokens.iter().collect();
            for token in unique {
                *doc_freq.entry(token.clone()).or_insert(0) += 1;
            }
        }

        let avg_len = if total_docs == 0 {
            0.0
        } else {
            total_len as f32 / total_docs as f32
        };

        Self {
            doc_freq,
            total_docs,
            avg_len,
        }
    }

    /// 통계 대상 청크 수
    pub fn total_docs(&self) -> usize {
        self.total_docs
    }

    /// 역문서빈도 (BM25+ 스타일, 항상 양수)
    pub fn idf(&self, term: &str) -> f32 {
        let n = self.total_docs as f32;
        let df = self.doc_freq.get(term).copied().unwrap_or(0) as f32;
        ((n - df + 0.5) / (df + 0.5) + 1.0).ln()
    }

    /// 질의 토큰에 대한 청크 토큰의 BM25 스코어
    pub fn score(&self, query_tokens: &[String], doc_tokens: &[String]) -> f32 {
        if doc_tokens.is_empty() || query_tokens.is_empty() {
            return 0.0;
        }

        let mut tf: HashMap<&str, usize> = HashMap::new();
        for token in doc_tokens {
            *tf.entry(token.as_str()).or_insert(0) += 1;
        }

        let doc_len = doc_tokens.len() as f32;
        let avg_len = self.avg_len.max(1e-3);
        let unique_query: HashSet<&String> = query_tokens.iter().collect();

        unique_query
            .into_iter()
            .filter_map(|term| tf.get(term.as_str()).map(|freq| (term, *freq as f32)))
            .map(|(term, freq)| {
                let numerator = freq * (BM25_K1 + 1.0);
                let denominator = freq + BM25_K1 * (1.0 - BM25_B + BM25_B * doc_len / avg_len);
                self.idf(term) * numerator / denominator
            })
            .sum()
    }
}

// ============================================================================
// Tests
// ============================================================================
