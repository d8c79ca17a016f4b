//! 응답 타입 - 질의 세션의 모든 종료 결과

use serde::Serialize;

use crate::error::{FailureKind, PipelineError};

/// 사용자에게 돌려주는 구조화된 응답
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Response {
    Answer(Answer),
    /// 질의가 다른 부서에 속함 (제안 부서 포함)
    Mismatch(MismatchReport),
    /// 선택 부서에 아직 인덱스가 없음
    IndexAbsent { department: String, message: String },
    Failure { kind: FailureKind, reason: String },
}

impl Response {
    /// 파이프라인 에러를 응답으로 변환 (인덱스 없음은 전용 태그)
    pub fn from_error(err: &PipelineError) -> Self {
        match err {
            PipelineError::IndexAbsent { department } => Self::IndexAbsent {
                department: department.clone(),
                message: format!(
                    "No documents have been indexed for the {} department yet.",
                    department
                ),
            },
            other => Self::Failure {
                kind: other.kind(),
                reason: other.to_string(),
            },
        }
    }

    pub fn answer(&self) -> Option<&Answer> {
        match self {
            Self::Answer(answer) => Some(answer),
            _ => None,
        }
    }

    pub fn is_answer(&self) -> bool {
        matches!(self, Self::Answer(_))
    }
}

/// 생성된 답변
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Answer {
    pub text: String,
    /// `text`의 실제 언어
    pub language: String,
    pub translation: TranslationStatus,
    /// 사용된 청크의 출처 (순위순, 중복 없음)
    pub sources: Vec<String>,
    /// 생성 시도 횟수
    pub attempts: u32,
    /// 컨텍스트 한도로 빠진 청크 수
    pub dropped_chunks: usize,
    /// 부서 분류 신뢰도
    pub confidence: f32,
    pub processing_ms: u64,
}

/// 번역 상태
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TranslationStatus {
    /// 세션 언어가 원어 - 번역 불필요
    Native,
    Translated { from: String, to: String },
    /// 번역 실패 - 원문 답변을 그대로 전달
    Fallback { target: String, reason: String },
}

/// 부서 불일치 안내
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MismatchReport {
    pub selected: String,
    pub suggested: String,
    pub message: String,
    /// 제안 부서의 예시 질문
    pub example_questions: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_index_absent_error_becomes_tagged_response() {
        let response = Response::from_error(&PipelineError::IndexAbsent {
            department: "IT".to_string(),
        });
        assert!(matches!(response, Response::IndexAbsent { ref department, .. } if department == "IT"));

        let json = serde_json::to_value(&response).unwrap();
        assert_eq!(json["status"], "index_absent");
    }

    #[test]
    fn test_failure_serialization() {
        let response = Response::from_error(&PipelineError::RetrievalEmpty {
            department: "HR".to_string(),
        });
        let json = serde_json::to_value(&response).unwrap();
        assert_eq!(json["status"], "failure");
        assert_eq!(json["kind"], "retrieval_empty");
        assert!(json["reason"].as_str().unwrap().contains("HR"));
    }

    #[test]
    fn test_answer_serialization() {
        let response = Response::Answer(Answer {
            text: "21 days".to_string(),
            language: "en".to_string(),
            translation: TranslationStatus::Fallback {
                target: "hi".to_string(),
                reason: "translation unavailable: down".to_string(),
            },
            sources: vec!["leave.pdf".to_string()],
            attempts: 1,
            dropped_chunks: 0,
            confidence: 1.0,
            processing_ms: 12,
        });
        let json = serde_json::to_value(&response).unwrap();
        assert_eq!(json["status"], "answer");
        assert_eq!(json["translation"]["kind"], "fallback");
        assert_eq!(json["translation"]["target"], "hi");
    }
}
