//! 에러 타입 - 질의 파이프라인 에러 분류
//!
//! 부서 불일치(Mismatch)와 번역 실패는 에러가 아니라 `Response`의
//! 태그로 표현됩니다. 여기에는 호출자에게 실패로 전달되는 것만 있습니다.

use serde::Serialize;
use thiserror::Error;

use crate::generation::GenerationError;

// ============================================================================
// PipelineError
// ============================================================================

/// 파이프라인 에러
#[derive(Debug, Error)]
pub enum PipelineError {
    /// 입력 검증 실패 (빈 문서, 빈 질의, 잘못된 설정 등)
    #[error("validation failed: {0}")]
    Validation(String),

    /// 부서 인덱스가 아직 빌드되지 않음
    #[error("no index has been built for department '{department}'")]
    IndexAbsent { department: String },

    /// 인덱스는 있으나 임계값을 넘는 후보가 없음
    #[error("no passages in the '{department}' index scored above the threshold")]
    RetrievalEmpty { department: String },

    /// 일시적 생성 실패 - 재시도 소진 후에만 노출됨
    #[error("generation failed after {attempts} attempt(s): {source}")]
    GenerationTransient {
        attempts: u32,
        #[source]
        source: GenerationError,
    },

    /// 영구적 생성 실패 (인증, 잘못된 요청) - 재시도하지 않음
    #[error("generation failed permanently after {attempts} attempt(s): {source}")]
    GenerationFatal {
        attempts: u32,
        #[source]
        source: GenerationError,
    },

    /// 최상위 청크 하나조차 컨텍스트 한도에 들어가지 않음
    #[error("context overflow: top passage needs {required} chars but the limit is {limit}")]
    ContextOverflow { required: usize, limit: usize },

    /// 임베딩 생성 또는 차원 불일치
    #[error("embedding failed: {0}")]
    Embedding(#[source] anyhow::Error),

    /// 인덱스 영속화 실패
    #[error("storage error: {0}")]
    Storage(#[source] anyhow::Error),
}

impl PipelineError {
    /// 사용자 응답용 실패 분류
    pub fn kind(&self) -> FailureKind {
        match self {
            Self::Validation(_) => FailureKind::Validation,
            Self::IndexAbsent { .. } => FailureKind::IndexAbsent,
            Self::RetrievalEmpty { .. } => FailureKind::RetrievalEmpty,
            Self::GenerationTransient { .. } => FailureKind::GenerationTransient,
            Self::GenerationFatal { .. } => FailureKind::GenerationFatal,
            Self::ContextOverflow { .. } => FailureKind::ContextOverflow,
            Self::Embedding(_) => FailureKind::Embedding,
            Self::Storage(_) => FailureKind::Storage,
        }
    }

    pub(crate) fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }
}

/// `Response::Failure`에 실리는 실패 종류
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    Validation,
    IndexAbsent,
    RetrievalEmpty,
    GenerationTransient,
    GenerationFatal,
    ContextOverflow,
    Embedding,
    Storage,
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_kind_mapping() {
        let err = PipelineError::IndexAbsent {
            department: "HR".to_string(),
        };
        assert_eq!(err.kind(), FailureKind::IndexAbsent);
        assert!(err.to_string().contains("HR"));

        let err = PipelineError::GenerationTransient {
            attempts: 3,
            source: GenerationError::RateLimited("quota".to_string()),
        };
        assert_eq!(err.kind(), FailureKind::GenerationTransient);
        assert!(err.to_string().contains("3 attempt"));
    }

    #[test]
    fn test_failure_kind_serialization() {
        let json = serde_json::to_string(&FailureKind::ContextOverflow).unwrap();
        assert_eq!(json, "\"context_overflow\"");
    }
}
