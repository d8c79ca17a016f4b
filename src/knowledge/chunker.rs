//! Text Chunking Module
//!
//! 문서 텍스트를 겹치는(overlap) 청크로 분할합니다.
//! 인접 청크는 정확히 `overlap_characters` 문자를 공유하며,
//! 오프셋을 기준으로 겹침을 제거하면 원문이 그대로 복원됩니다.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::PipelineError;

// ============================================================================
// Chunk Configuration
// ============================================================================

/// 청킹 설정
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChunkConfig {
    /// 최대 청크 크기 (문자 수)
    pub max_characters: usize,
    /// 오버랩 크기 (문자 수)
    pub overlap_characters: usize,
}

impl Default for ChunkConfig {
    fn default() -> Self {
        Self {
            max_characters: 1500,
            overlap_characters: 300,
        }
    }
}

impl ChunkConfig {
    /// 설정 검증
    pub fn validate(&self) -> Result<(), PipelineError> {
        if self.max_characters == 0 {
            return Err(PipelineError::validation("chunk size must be greater than zero"));
        }
        if self.overlap_characters >= self.max_characters {
            return Err(PipelineError::validation(format!(
                "chunk overlap ({}) must be smaller than chunk size ({})",
                self.overlap_characters, self.max_characters
            )));
        }
        Ok(())
    }
}

// ============================================================================
// Chunk
// ============================================================================

/// 청크 식별자 (문서 ID + 순번)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ChunkId {
    pub document_id: i64,
    pub ordinal: u32,
}

impl ChunkId {
    pub fn new(document_id: i64, ordinal: u32) -> Self {
        Self {
            document_id,
            ordinal,
        }
    }
}

impl fmt::Display for ChunkId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.document_id, self.ordinal)
    }
}

/// 문서에서 파생된 청크 (생성 후 불변)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chunk {
    pub id: ChunkId,
    /// 원본 문서의 출처 (파일명 등)
    pub source: String,
    pub text: String,
    /// 원문 기준 시작 문자 오프셋 (포함)
    pub char_start: usize,
    /// 원문 기준 끝 문자 오프셋 (미포함)
    pub char_end: usize,
}

impl Chunk {
    pub fn document_id(&self) -> i64 {
        self.id.document_id
    }

    pub fn ordinal(&self) -> u32 {
        self.id.ordinal
    }
}

// ============================================================================
// Chunker Trait
// ============================================================================

/// 텍스트 청킹 전략 트레이트
pub trait Chunker: Send + Sync {
    /// 문서 텍스트를 청크로 분할
    ///
    /// 빈 텍스트는 조용히 버리지 않고 `Validation` 에러로 보고합니다.
    fn chunk(&self, document_id: i64, source: &str, text: &str) -> Result<Vec<Chunk>, PipelineError>;

    /// 청커 이름
    fn name(&self) -> &'static str;
}

// ============================================================================
// OverlapChunker
// ============================================================================

/// 고정 크기 + 오버랩 청커
///
/// - 문자(char) 단위로 창을 이동
/// - 창 끝부분 1/4 안에서 공백 경계를 우선
/// - 다음 청크는 항상 이전 청크 끝 - overlap 위치에서 시작
pub struct OverlapChunker {
    config: ChunkConfig,
}

impl OverlapChunker {
    /// 설정으로 생성
    pub fn new(config: ChunkConfig) -> Result<Self, PipelineError> {
        config.validate()?;
        Ok(Self { config })
    }

    /// 기본 설정으로 생성
    pub fn with_defaults() -> Self {
        Self {
            config: ChunkConfig::default(),
        }
    }

    pub fn config(&self) -> &ChunkConfig {
        &self.config
    }

    /// 공백 경계를 찾아 청크 끝 조정
    ///
    /// `chars[end - 1]`이 공백인 가장 뒤쪽 `end`를 찾습니다.
    /// 다음 시작점(end - overlap)이 현재 시작점보다 뒤에 있도록 하한을 둡니다.
    fn soft_end(&self, chars: &[(usize, char)], start: usize, hard_end: usize) -> usize {
        let floor = start + self.config.overlap_characters + 1;
        let tail = hard_end.saturating_sub(self.config.max_characters / 4);
        let lower = floor.max(tail);

        (lower..=hard_end)
            .rev()
            .find(|&end| chars[end - 1].1.is_whitespace())
            .unwrap_or(hard_end)
    }
}

impl Chunker for OverlapChunker {
    fn chunk(&self, document_id: i64, source: &str, text: &str) -> Result<Vec<Chunk>, PipelineError> {
        if text.trim().is_empty() {
            return Err(PipelineError::validation(format!(
                "document '{}' has no text to chunk",
                source
            )));
        }

        let chars: Vec<(usize, char)> = text.char_indices().collect();
        let total = chars.len();
        let byte_at = |i: usize| if i < total { chars[i].0 } else { text.len() };

        let mut chunks = Vec::new();
        let mut start = 0usize;

        loop {
            let hard_end = (start + self.config.max_characters).min(total);
            let end = if hard_end < total {
                self.soft_end(&chars, start, hard_end)
            } else {
                total
            };

            chunks.push(Chunk {
                id: ChunkId::new(document_id, chunks.len() as u32),
                source: source.to_string(),
                text: text[byte_at(start)..byte_at(end)].to_string(),
                char_start: start,
                char_end: end,
            });

            if end >= total {
                break;
            }
            start = end - self.config.overlap_characters;
        }

        tracing::debug!(
            "Chunked '{}' into {} chunk(s) ({} chars)",
            source,
            chunks.len(),
            total
        );

        Ok(chunks)
    }

    fn name(&self) -> &'static str {
        "OverlapChunker"
    }
}

// ============================================================================
// Helper Functions
// ============================================================================

/// 오프셋 기준으로 겹침을 제거하고 청크를 이어붙여 원문 복원
///
/// 같은 문서의 청크가 순서대로 주어져야 합니다.
pub fn merge_chunks(chunks: &[Chunk]) -> String {
    let mut out = String::new();
    let mut covered = 0usize;

    for chunk in chunks {
        let skip = covered.saturating_sub(chunk.char_start);
        out.extend(chunk.text.chars().skip(skip));
        covered = covered.max(chunk.char_end);
    }

    out
}

// ============================================================================
// Factory Functions
// ============================================================================

/// 기본 청커 생성
pub fn default_chunker() -> Box<dyn Chunker> {
    Box::new(OverlapChunker::with_defaults())
}

/// 설정 지정 청커 생성
pub fn overlap_chunker(config: ChunkConfig) -> Result<Box<dyn Chunker>, PipelineError> {
    Ok(Box::new(OverlapChunker::new(config)?))
}

// ============================================================================
// Tests
// ============================================================================
