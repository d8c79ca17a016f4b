//! 생성 모듈 - 답변 생성 백엔드
//!
//! - `GenerationBackend`: 교체 가능한 생성 인터페이스
//! - `GeminiGeneration`: Gemini `generateContent` 호출 (단일 시도)
//! - `retry`: 시도별 타임아웃 + 지수 백오프 재시도
//!
//! 백엔드는 한 번만 시도하고 실패를 `GenerationError`로 분류합니다.
//! 재시도 여부는 호출자(`run_with_retry`)가 분류를 보고 결정합니다.

mod retry;

pub use retry::{run_with_retry, Attempted, RetryError, RetryPolicy};

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::Mutex;

use crate::config::{GenerationConfig, ModelConfig};
use crate::embedding::{get_api_key, GeminiError, RateLimiter, GEMINI_API_BASE};

// ============================================================================
// Types
// ============================================================================

/// 생성 요청
#[derive(Debug, Clone, PartialEq)]
pub struct GenerationRequest {
    /// 시스템 지시문
    pub system: String,
    /// 사용자 프롬프트 (컨텍스트 + 질문)
    pub prompt: String,
    pub temperature: f32,
    pub max_output_tokens: u32,
}

/// 생성 실패 분류
#[derive(Debug, Clone, PartialEq, Error)]
pub enum GenerationError {
    /// 429 / 쿼터 초과
    #[error("rate limited: {0}")]
    RateLimited(String),
    /// 401 / 403
    #[error("authentication rejected: {0}")]
    AuthInvalid(String),
    /// 시도당 타임아웃 초과
    #[error("timed out after {0:?}")]
    Timeout(Duration),
    /// 400 또는 해석할 수 없는 응답
    #[error("malformed request or response: {0}")]
    Malformed(String),
    /// 5xx / 네트워크 오류
    #[error("backend unavailable: {0}")]
    Unavailable(String),
}

impl GenerationError {
    /// 재시도하면 성공할 수 있는 실패인지
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::RateLimited(_) | Self::Timeout(_) | Self::Unavailable(_)
        )
    }
}

// ============================================================================
// GenerationBackend Trait
// ============================================================================

/// 생성 백엔드 트레이트
#[async_trait]
pub trait GenerationBackend: Send + Sync {
    /// 한 번 생성 시도
    async fn generate(&self, request: &GenerationRequest) -> Result<String, GenerationError>;

    /// 모델 식별자
    fn name(&self) -> &str;
}

// ============================================================================
// Google Gemini Generation
// ============================================================================

/// Gemini 생성 구현체
#[derive(Debug)]
pub struct GeminiGeneration {
    api_key: String,
    model: String,
    client: reqwest::Client,
    rate_limiter: Arc<Mutex<RateLimiter>>,
}

impl GeminiGeneration {
    /// 모델을 지정하여 생성
    ///
    /// HTTP 클라이언트 타임아웃은 시도당 타임아웃보다 약간 길게 둡니다.
    /// 실제 시도 시간 제한은 `RetryPolicy`가 겁니다.
    pub fn new(api_key: String, model: &str, timeout: Duration) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout + Duration::from_secs(5))
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            api_key,
            model: model.to_string(),
            client,
            rate_limiter: Arc::new(Mutex::new(RateLimiter::gemini_free_tier())),
        })
    }

    /// 설정 + 환경변수 API 키로 생성
    pub fn from_config(models: &ModelConfig, generation: &GenerationConfig) -> anyhow::Result<Self> {
        Self::new(
            get_api_key()?,
            &models.generation_model,
            Duration::from_secs(generation.timeout_secs),
        )
    }

    fn endpoint(&self) -> String {
        format!("{}/models/{}:generateContent", GEMINI_API_BASE, self.model)
    }
}

#[async_trait]
impl GenerationBackend for GeminiGeneration {
    async fn generate(&self, request: &GenerationRequest) -> Result<String, GenerationError> {
        self.rate_limiter.lock().await.acquire().await;

        let body = GenerateRequest {
            system_instruction: Content {
                role: None,
                parts: vec![Part {
                    text: request.system.clone(),
                }],
            },
            contents: vec![Content {
                role: Some("user".to_string()),
                parts: vec![Part {
                    text: request.prompt.clone(),
                }],
            }],
            generation_config: GenerateConfig {
                temperature: request.temperature,
                max_output_tokens: request.max_output_tokens,
            },
        };

        let response = self
            .client
            .post(self.endpoint())
            .header("x-goog-api-key", &self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| GenerationError::Unavailable(format!("request failed: {}", e)))?;

        let status = response.status().as_u16();
        let text = response
            .text()
            .await
            .map_err(|e| GenerationError::Unavailable(format!("failed to read body: {}", e)))?;

        if (200..300).contains(&status) {
            return parse_generation(&text);
        }

        let message = serde_json::from_str::<GeminiError>(&text)
            .map(|e| format!("{} {}", e.error.status, e.error.message))
            .unwrap_or(text);
        Err(error_for_status(status, message))
    }

    fn name(&self) -> &str {
        &self.model
    }
}

/// HTTP 상태 코드 -> 실패 분류
fn error_for_status(status: u16, message: String) -> GenerationError {
    match status {
        429 => GenerationError::RateLimited(message),
        401 | 403 => GenerationError::AuthInvalid(message),
        408 => GenerationError::Timeout(Duration::ZERO),
        400 | 404 | 413 | 422 => GenerationError::Malformed(message),
        _ => GenerationError::Unavailable(format!("HTTP {}: {}", status, message)),
    }
}

/// 응답 본문에서 텍스트 추출 (첫 후보의 모든 part 연결)
fn parse_generation(body: &str) -> Result<String, GenerationError> {
    let parsed: GenerateResponse = serde_json::from_str(body)
        .map_err(|e| GenerationError::Malformed(format!("unparseable response: {}", e)))?;

    let candidate = parsed
        .candidates
        .into_iter()
        .next()
        .ok_or_else(|| GenerationError::Malformed("response has no candidates".to_string()))?;

    let text: String = candidate
        .content
        .map(|c| c.parts.into_iter().map(|p| p.text).collect())
        .unwrap_or_default();

    if text.trim().is_empty() {
        return Err(GenerationError::Malformed(format!(
            "empty candidate (finish reason: {})",
            candidate.finish_reason.unwrap_or_else(|| "unknown".to_string())
        )));
    }

    Ok(text.trim().to_string())
}

/// Gemini API 요청 본문
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateRequest {
    system_instruction: Content,
    contents: Vec<Content>,
    generation_config: GenerateConfig,
}

#[derive(Debug, Serialize, Deserialize)]
struct Content {
    #[serde(skip_serializing_if = "Option::is_none", default)]
    role: Option<String>,
    #[serde(default)]
    parts: Vec<Part>,
}

#[derive(Debug, Serialize, Deserialize)]
struct Part {
    #[serde(default)]
    text: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateConfig {
    temperature: f32,
    max_output_tokens: u32,
}

/// Gemini API 응답
#[derive(Debug, Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Candidate {
    content: Option<Content>,
    finish_reason: Option<String>,
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_classification() {
        assert!(GenerationError::RateLimited("quota".into()).is_transient());
        assert!(GenerationError::Timeout(Duration::from_secs(1)).is_transient());
        assert!(GenerationError::Unavailable("503".into()).is_transient());
        assert!(!GenerationError::AuthInvalid("bad key".into()).is_transient());
        assert!(!GenerationError::Malformed("bad".into()).is_transient());
    }

    #[test]
    fn test_error_for_status() {
        assert!(matches!(error_for_status(429, "q".into()), GenerationError::RateLimited(_)));
        assert!(matches!(error_for_status(401, "k".into()), GenerationError::AuthInvalid(_)));
        assert!(matches!(error_for_status(403, "k".into()), GenerationError::AuthInvalid(_)));
        assert!(matches!(error_for_status(400, "b".into()), GenerationError::Malformed(_)));
        assert!(matches!(error_for_status(503, "u".into()), GenerationError::Unavailable(_)));
    }

    #[test]
    fn test_parse_generation() {
        let body = r#"{
            "candidates": [{
                "content": { "role": "model", "parts": [{ "text": "Annual leave is " }, { "text": "21 days." }] },
                "finishReason": "STOP"
            }]
        }"#;
        assert_eq!(parse_generation(body).unwrap(), "Annual leave is 21 days.");
    }

    #[test]
    fn test_parse_generation_blocked() {
        let body = r#"{ "candidates": [{ "finishReason": "SAFETY" }] }"#;
        let err = parse_generation(body).unwrap_err();
        assert!(err.to_string().contains("SAFETY"));

        assert!(matches!(
            parse_generation(r#"{ "candidates": [] }"#),
            Err(GenerationError::Malformed(_))
        ));
    }

    #[test]
    fn test_request_serialization() {
        let body = GenerateRequest {
            system_instruction: Content {
                role: None,
                parts: vec![Part { text: "sys".into() }],
            },
            contents: vec![],
            generation_config: GenerateConfig {
                temperature: 0.3,
                max_output_tokens: 1000,
            },
        };
        let json = serde_json::to_value(&body).unwrap();
        assert!(json.get("systemInstruction").is_some());
        assert_eq!(json["generationConfig"]["maxOutputTokens"], 1000);
        assert!(json["systemInstruction"].get("role").is_none());
    }
}
