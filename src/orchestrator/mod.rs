//! Response Orchestrator - 프롬프트 구성, 재시도 생성, 번역 폴백
//!
//! 세션 상태 전이:
//! `Received -> Classified -> Retrieved -> Generated -> {Translated | TranslationFallback}`
//! 또는 `Classified -> {MismatchReported | IndexAbsentReported}`, 어디서든 `Failed`.
//! 번역이 필요 없으면 `Generated`가 종료 상태입니다.

mod prompt;
mod response;

pub use prompt::{BuiltPrompt, PromptBuilder, CONTEXT_SEPARATOR};
pub use response::{Answer, MismatchReport, Response, TranslationStatus};

use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::Serialize;

use crate::config::{GenerationConfig, TranslationConfig};
use crate::error::PipelineError;
use crate::generation::{run_with_retry, GenerationBackend, GenerationRequest, RetryPolicy};
use crate::knowledge::RetrievalResult;
use crate::pipeline::QuerySession;
use crate::translation::{TranslationBackend, TranslationError};

// ============================================================================
// QueryStage
// ============================================================================

/// 세션 진행 단계
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum QueryStage {
    Received,
    Classified,
    Retrieved,
    Generated,
    Translated,
    TranslationFallback,
    MismatchReported,
    IndexAbsentReported,
    Failed,
}

impl QueryStage {
    /// 허용된 전이인지
    pub fn can_advance_to(self, next: QueryStage) -> bool {
        use QueryStage::*;
        match (self, next) {
            (s, Failed) => !s.is_terminal(),
            (Received, Classified) => true,
            (Classified, Retrieved | MismatchReported | IndexAbsentReported) => true,
            (Retrieved, Generated) => true,
            (Generated, Translated | TranslationFallback) => true,
            _ => false,
        }
    }

    /// 더 진행할 수 없는 단계인지 (`Generated`는 번역이 필요할 때만 이어짐)
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            Self::Translated
                | Self::TranslationFallback
                | Self::MismatchReported
                | Self::IndexAbsentReported
                | Self::Failed
        )
    }
}

/// 세션 단계 추적 (전이마다 debug 로그)
#[derive(Debug)]
pub struct StageTracker {
    turn: u32,
    stage: QueryStage,
}

impl StageTracker {
    pub fn new(turn: u32) -> Self {
        tracing::debug!("turn {}: {:?}", turn, QueryStage::Received);
        Self {
            turn,
            stage: QueryStage::Received,
        }
    }

    pub fn stage(&self) -> QueryStage {
        self.stage
    }

    pub fn advance(&mut self, next: QueryStage) {
        if !self.stage.can_advance_to(next) {
            tracing::warn!(
                "turn {}: unexpected transition {:?} -> {:?}",
                self.turn,
                self.stage,
                next
            );
        }
        tracing::debug!("turn {}: {:?} -> {:?}", self.turn, self.stage, next);
        self.stage = next;
    }
}

// ============================================================================
// ResponseOrchestrator
// ============================================================================

/// 응답 오케스트레이터
pub struct ResponseOrchestrator {
    generator: Arc<dyn GenerationBackend>,
    translator: Arc<dyn TranslationBackend>,
    prompt: PromptBuilder,
    retry: RetryPolicy,
    temperature: f32,
    max_output_tokens: u32,
    native_language: String,
    translation_timeout: Duration,
}

impl ResponseOrchestrator {
    pub fn new(
        generator: Arc<dyn GenerationBackend>,
        translator: Arc<dyn TranslationBackend>,
        generation: &GenerationConfig,
        translation: &TranslationConfig,
    ) -> Self {
        Self {
            generator,
            translator,
            prompt: PromptBuilder::new(generation.max_context_chars),
            retry: RetryPolicy::from(generation),
            temperature: generation.temperature,
            max_output_tokens: generation.max_output_tokens,
            native_language: translation.native_language.clone(),
            translation_timeout: Duration::from_secs(translation.timeout_secs),
        }
    }

    /// 재시도 정책 교체
    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// 번역 타임아웃 교체
    pub fn with_translation_timeout(mut self, timeout: Duration) -> Self {
        self.translation_timeout = timeout;
        self
    }

    pub fn native_language(&self) -> &str {
        &self.native_language
    }

    /// 검색 결과로 응답 생성 (모든 결과를 `Response`로)
    pub async fn respond(&self, session: &QuerySession, retrieval: &RetrievalResult) -> Response {
        let mut tracker = StageTracker::new(session.turn);
        tracker.advance(QueryStage::Classified);
        tracker.advance(QueryStage::Retrieved);
        match self.answer(session, retrieval, &mut tracker).await {
            Ok(answer) => Response::Answer(answer),
            Err(e) => {
                tracker.advance(QueryStage::Failed);
                Response::from_error(&e)
            }
        }
    }

    /// 답변 생성 + 번역
    ///
    /// `confidence`는 1.0으로 채워지며, 분류 결과를 아는 호출자가 덮어씁니다.
    pub async fn answer(
        &self,
        session: &QuerySession,
        retrieval: &RetrievalResult,
        tracker: &mut StageTracker,
    ) -> Result<Answer, PipelineError> {
        let started = Instant::now();

        let built = self
            .prompt
            .build(&session.department, &session.query, retrieval)?;

        let request = GenerationRequest {
            system: built.system.clone(),
            prompt: built.prompt.clone(),
            temperature: self.temperature,
            max_output_tokens: self.max_output_tokens,
        };

        let generator = &self.generator;
        let generated = run_with_retry(&self.retry, |attempt| {
            let request = &request;
            async move {
                tracing::debug!("Generation attempt {} with {}", attempt, generator.name());
                generator.generate(request).await
            }
        })
        .await?;
        tracker.advance(QueryStage::Generated);

        let (text, language, translation) = self.translate(session, generated.value).await;
        match translation {
            TranslationStatus::Native => {}
            TranslationStatus::Translated { .. } => tracker.advance(QueryStage::Translated),
            TranslationStatus::Fallback { .. } => tracker.advance(QueryStage::TranslationFallback),
        }

        let sources = {
            let mut sources: Vec<String> = Vec::new();
            for item in &built.used {
                if !sources.contains(&item.source) {
                    sources.push(item.source.clone());
                }
            }
            sources
        };

        tracing::info!(
            "Answered {} query in {} attempt(s) ({} chunk(s), {} dropped)",
            session.department,
            generated.attempts,
            built.used.len(),
            built.dropped
        );

        Ok(Answer {
            text,
            language,
            translation,
            sources,
            attempts: generated.attempts,
            dropped_chunks: built.dropped,
            confidence: 1.0,
            processing_ms: started.elapsed().as_millis() as u64,
        })
    }

    /// 세션 언어로 번역 (실패하면 원문 + Fallback)
    async fn translate(&self, session: &QuerySession, text: String) -> (String, String, TranslationStatus) {
        let target = session.language.as_str();
        if target == self.native_language {
            return (text, self.native_language.clone(), TranslationStatus::Native);
        }

        let outcome = tokio::time::timeout(
            self.translation_timeout,
            self.translator.translate(&text, &self.native_language, target),
        )
        .await
        .unwrap_or(Err(TranslationError::Timeout(self.translation_timeout)));

        match outcome {
            Ok(translated) => (
                translated,
                target.to_string(),
                TranslationStatus::Translated {
                    from: self.native_language.clone(),
                    to: target.to_string(),
                },
            ),
            Err(e) => {
                tracing::warn!("Translation to {} failed, returning untranslated answer: {}", target, e);
                (
                    text,
                    self.native_language.clone(),
                    TranslationStatus::Fallback {
                        target: target.to_string(),
                        reason: e.to_string(),
                    },
                )
            }
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
