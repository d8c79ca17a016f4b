//! Vector - 벡터 엔트리 타입 및 유사도 함수
//!
//! 인덱싱과 질의는 반드시 같은 `SimilarityMetric`을 사용합니다.

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::chunker::{Chunk, ChunkId};

// ============================================================================
// Types
// ============================================================================

/// 유사도 척도
///
/// 한 번 선언되어 인덱싱과 질의 모두에 사용됩니다.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SimilarityMetric {
    /// 코사인 유사도 (Gemini / 해시 임베딩 공통)
    #[default]
    Cosine,
    /// 내적 (정규화된 벡터 전용)
    InnerProduct,
}

impl SimilarityMetric {
    /// 두 벡터의 유사도 (높을수록 가까움)
    pub fn score(&self, a: &[f32], b: &[f32]) -> f32 {
        match self {
            Self::Cosine => cosine_similarity(a, b),
            Self::InnerProduct => inner_product(a, b),
        }
    }
}

/// 벡터 엔트리 (저장용)
#[derive(Debug, Clone, PartialEq)]
pub struct VectorEntry {
    pub chunk_id: ChunkId,
    /// 원본 문서 출처
    pub source: String,
    /// 청크 텍스트
    pub chunk_text: String,
    pub char_start: usize,
    pub char_end: usize,
    /// 임베딩 벡터
    pub embedding: Vec<f32>,
}

impl VectorEntry {
    /// 청크와 임베딩으로 생성
    pub fn from_chunk(chunk: &Chunk, embedding: Vec<f32>) -> Self {
        Self {
            chunk_id: chunk.id,
            source: chunk.source.clone(),
            chunk_text: chunk.text.clone(),
            char_start: chunk.char_start,
            char_end: chunk.char_end,
            embedding,
        }
    }
}

/// 최근접 검색 결과 (청크 ID + 유사도)
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScoredChunk {
    pub chunk_id: ChunkId,
    pub score: f32,
}

/// 부서 인덱스 메타데이터 (매니페스트에 기록)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexMeta {
    pub department: String,
    /// 빌드마다 새로 발급되는 ID (영속 테이블 이름에 사용)
    pub build_id: String,
    /// 임베딩 모델 식별자 - 다른 모델로 만든 벡터와 섞이지 않도록 확인
    pub embedding_model: String,
    pub dimension: usize,
    pub metric: SimilarityMetric,
    pub chunk_count: usize,
    /// 모델 + 청크 내용 해시 (같은 입력이면 같은 값)
    pub fingerprint: String,
    pub built_at: DateTime<Utc>,
}

// ============================================================================
// IndexPersistence Trait
// ============================================================================

/// 부서 인덱스 영속화 트레이트 (async)
///
/// `save`는 새 테이블을 끝까지 쓴 뒤에만 매니페스트를 교체합니다.
/// 저장 도중 실패하면 이전 인덱스가 그대로 남습니다.
#[async_trait]
pub trait IndexPersistence: Send + Sync {
    /// 새 빌드 저장 후 이전 빌드 제거
    async fn save(&self, meta: &IndexMeta, entries: &[VectorEntry]) -> Result<()>;

    /// 매니페스트에 기록된 모든 부서 인덱스 로드
    async fn load_all(&self) -> Result<Vec<(IndexMeta, Vec<VectorEntry>)>>;

    /// 부서 인덱스 제거 (없으면 false)
    async fn remove(&self, department: &str) -> Result<bool>;
}

// ============================================================================
// Utility Functions
// ============================================================================

/// 코사인 유사도 계산
///
/// 결과는 -1.0 ~ 1.0 범위이며, 길이가 다르거나 영벡터면 0.0입니다.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let dot_product: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();

    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }

    dot_product / (norm_a * norm_b)
}

/// 내적 계산
pub fn inner_product(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() {
        return 0.0;
    }
    a.iter().zip(b.iter()).map(|(x, y)| x * y).sum()
}

/// 벡터 L2 정규화 (영벡터는 그대로)
pub fn normalize(vector: &mut [f32]) {
    let norm: f32 = vector.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0.0 {
        vector.iter_mut().for_each(|x| *x /= norm);
    }
}

// ============================================================================
// Tests
// ============================================================================
