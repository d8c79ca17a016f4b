//! 제한된 재시도 - 시도별 타임아웃 + 지수 백오프
//!
//! 일시적 실패(타임아웃, 429, 5xx)만 재시도하고 영구 실패는 즉시 반환합니다.
//! 백오프: `initial_backoff * 2^n` (최대 `max_backoff`)

use std::future::Future;
use std::time::Duration;

use thiserror::Error;

use super::GenerationError;
use crate::config::GenerationConfig;
use crate::error::PipelineError;

/// 재시도 정책
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
    /// 시도당 타임아웃
    pub attempt_timeout: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from(&GenerationConfig::default())
    }
}

impl From<&GenerationConfig> for RetryPolicy {
    fn from(config: &GenerationConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            initial_backoff: Duration::from_millis(config.initial_backoff_ms),
            max_backoff: Duration::from_millis(config.max_backoff_ms),
            attempt_timeout: Duration::from_secs(config.timeout_secs),
        }
    }
}

impl RetryPolicy {
    /// n번째 재시도 전 대기 시간 (n = 0부터)
    pub fn backoff(&self, retry: u32) -> Duration {
        let factor = 2u32.saturating_pow(retry);
        self.initial_backoff
            .checked_mul(factor)
            .unwrap_or(self.max_backoff)
            .min(self.max_backoff)
    }
}

/// 성공 값 + 사용한 시도 횟수
#[derive(Debug, Clone, PartialEq)]
pub struct Attempted<T> {
    pub value: T,
    pub attempts: u32,
}

/// 재시도 후 최종 실패
#[derive(Debug, Clone, PartialEq, Error)]
#[error("{error} (after {attempts} attempt(s))")]
pub struct RetryError {
    pub attempts: u32,
    #[source]
    pub error: GenerationError,
}

impl From<RetryError> for PipelineError {
    fn from(err: RetryError) -> Self {
        if err.error.is_transient() {
            PipelineError::GenerationTransient {
                attempts: err.attempts,
                source: err.error,
            }
        } else {
            PipelineError::GenerationFatal {
                attempts: err.attempts,
                source: err.error,
            }
        }
    }
}

/// 정책에 따라 작업 실행
///
/// `op`는 시도 번호(1부터)를 받습니다. 각 시도는 `attempt_timeout`으로 감싸지고,
/// 타임아웃은 일시적 실패로 취급됩니다. 반환된 future를 drop하면 진행 중인
/// 시도와 대기가 함께 취소됩니다.
pub async fn run_with_retry<T, F, Fut>(policy: &RetryPolicy, mut op: F) -> Result<Attempted<T>, RetryError>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, GenerationError>>,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 0;

    loop {
        attempt += 1;

        let outcome = match tokio::time::timeout(policy.attempt_timeout, op(attempt)).await {
            Ok(result) => result,
            Err(_) => Err(GenerationError::Timeout(policy.attempt_timeout)),
        };

        match outcome {
            Ok(value) => {
                return Ok(Attempted {
                    value,
                    attempts: attempt,
                })
            }
            Err(error) if error.is_transient() && attempt < max_attempts => {
                let backoff = policy.backoff(attempt - 1);
                tracing::warn!(
                    "Transient failure: {}, retrying in {:?} (attempt {}/{})",
                    error,
                    backoff,
                    attempt,
                    max_attempts
                );
                tokio::time::sleep(backoff).await;
            }
            Err(error) => {
                return Err(RetryError {
                    attempts: attempt,
                    error,
                })
            }
        }
    }
}
