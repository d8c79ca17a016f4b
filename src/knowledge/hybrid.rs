//! 하이브리드 검색 - 벡터 후보 + BM25 재정렬
//!
//! 1. 인덱싱과 같은 모델로 질의 임베딩
//! 2. 부서 인덱스에서 `k * oversample` 후보 조회 (코사인)
//! 3. 빌드 시 계산된 문서 빈도 통계로 BM25 재정렬
//! 4. BM25 상위 k개 반환 (동점은 벡터 스코어)
//!
//! ref: https://en.wikipedia.org/wiki/Okapi_BM25

use std::sync::Arc;

use serde::Serialize;

use crate::error::PipelineError;

use super::chunker::ChunkId;
use super::index::EmbeddingStore;
use super::lexical::tokenize;

/// 기본 후보 배수
pub const DEFAULT_OVERSAMPLE: usize = 4;

// ============================================================================
// Types
// ============================================================================

/// 검색된 청크
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RetrievedChunk {
    pub chunk_id: ChunkId,
    /// 원본 문서 출처
    pub source: String,
    pub text: String,
    /// 코사인 유사도
    pub dense_score: f32,
    /// BM25 스코어
    pub lexical_score: f32,
}

/// 검색 결과 (질의마다 새로 만들어지며 캐시되지 않음)
#[derive(Debug, Clone, Serialize)]
pub struct RetrievalResult {
    pub department: String,
    /// 검색에 사용된 인덱스 빌드
    pub build_id: String,
    /// 순위순 청크
    pub items: Vec<RetrievedChunk>,
}

impl RetrievalResult {
    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// 중복 없는 출처 목록 (순위순)
    pub fn sources(&self) -> Vec<String> {
        let mut sources: Vec<String> = Vec::new();
        for item in &self.items {
            if !sources.contains(&item.source) {
                sources.push(item.source.clone());
            }
        }
        sources
    }
}

// ============================================================================
// HybridRetriever
// ============================================================================

/// 하이브리드 검색기
pub struct HybridRetriever {
    store: Arc<EmbeddingStore>,
    oversample: usize,
    min_dense_score: f32,
}

impl HybridRetriever {
    pub fn new(store: Arc<EmbeddingStore>) -> Self {
        Self {
            store,
            oversample: DEFAULT_OVERSAMPLE,
            min_dense_score: 0.0,
        }
    }

    /// 후보 배수 설정 (최소 1)
    pub fn with_oversample(mut self, oversample: usize) -> Self {
        self.oversample = oversample.max(1);
        self
    }

    /// 벡터 스코어 하한 설정
    pub fn with_min_dense_score(mut self, min_dense_score: f32) -> Self {
        self.min_dense_score = min_dense_score;
        self
    }

    pub fn store(&self) -> &Arc<EmbeddingStore> {
        &self.store
    }

    /// 부서 인덱스에서 질의와 관련된 청크 검색
    ///
    /// # Errors
    /// - `Validation`: k == 0 또는 빈 질의
    /// - `IndexAbsent`: 부서 인덱스 없음
    /// - `RetrievalEmpty`: `min_dense_score` 이상인 후보 없음
    pub async fn retrieve(
        &self,
        department: &str,
        query: &str,
        k: usize,
    ) -> Result<RetrievalResult, PipelineError> {
        if k == 0 {
            return Err(PipelineError::validation("top_k must be at least 1"));
        }
        if query.trim().is_empty() {
            return Err(PipelineError::validation("query is empty"));
        }

        // 스냅샷을 먼저 잡아 질의 도중 재빌드와 분리
        let index = self.store.snapshot(department)?;

        let vector = self
            .store
            .embedder()
            .embed_query(query)
            .await
            .map_err(PipelineError::Embedding)?;

        let candidates = index.nearest(&vector, k.saturating_mul(self.oversample))?;

        let query_tokens = tokenize(query);
        let mut items: Vec<RetrievedChunk> = candidates
            .into_iter()
            .filter(|c| c.score >= self.min_dense_score)
            .filter_map(|c| {
                let chunk = index.get(&c.chunk_id)?;
                Some(RetrievedChunk {
                    chunk_id: c.chunk_id,
                    source: chunk.entry.source.clone(),
                    text: chunk.entry.chunk_text.clone(),
                    dense_score: c.score,
                    lexical_score: index.lexicon().score(&query_tokens, &chunk.tokens),
                })
            })
            .collect();

        if items.is_empty() {
            return Err(PipelineError::RetrievalEmpty {
                department: department.to_string(),
            });
        }

        items.sort_by(|a, b| {
            b.lexical_score
                .partial_cmp(&a.lexical_score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| {
                    b.dense_score
                        .partial_cmp(&a.dense_score)
                        .unwrap_or(std::cmp::Ordering::Equal)
                })
                .then_with(|| a.chunk_id.cmp(&b.chunk_id))
        });
        items.truncate(k);

        tracing::debug!(
            "Retrieved {} chunk(s) from {} (build {})",
            items.len(),
            department,
            index.meta().build_id
        );

        Ok(RetrievalResult {
            department: department.to_string(),
            build_id: index.meta().build_id.clone(),
            items,
        })
    }
}

// ============================================================================
// Tests
// ============================================================================
