//! Query Pipeline - 세션 하나를 끝까지 처리
//!
//! 질의 정리 -> 부서 분류 -> 하이브리드 검색 -> 응답 생성 순서로 진행하며,
//! 모든 종료 결과를 `Response`로 돌려줍니다. 단계는 세션 안에서 순서대로 실행되고,
//! `respond` future를 drop하면 세션이 취소됩니다 (공유 상태는 건드리지 않음).

use std::sync::{Arc, OnceLock};
use std::time::Instant;

use regex::Regex;
use serde::Serialize;

use crate::config::AppConfig;
use crate::department::{mismatch_message, Classification, DepartmentClassifier};
use crate::error::PipelineError;
use crate::generation::GenerationBackend;
use crate::knowledge::{EmbeddingStore, HybridRetriever};
use crate::orchestrator::{
    MismatchReport, QueryStage, Response, ResponseOrchestrator, StageTracker,
};
use crate::translation::TranslationBackend;

// ============================================================================
// QuerySession
// ============================================================================

/// 질의 세션
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QuerySession {
    pub department: String,
    /// 응답 언어 코드
    pub language: String,
    pub query: String,
    /// 대화 내 순번
    pub turn: u32,
}

impl QuerySession {
    pub fn new(department: &str, language: &str, query: &str) -> Self {
        Self {
            department: department.to_string(),
            language: language.to_string(),
            query: query.to_string(),
            turn: 0,
        }
    }

    pub fn with_turn(mut self, turn: u32) -> Self {
        self.turn = turn;
        self
    }

    /// 다음 질의 (같은 부서/언어, 순번 +1)
    pub fn next(&self, query: &str) -> Self {
        Self {
            query: query.to_string(),
            turn: self.turn + 1,
            ..self.clone()
        }
    }
}

/// 괄호/대괄호 조각 제거 (언어 태그 등)
pub fn clean_query(query: &str) -> String {
    static BRACKETS: OnceLock<Option<Regex>> = OnceLock::new();
    let pattern = BRACKETS.get_or_init(|| Regex::new(r"\([^)]*\)|\[[^\]]*\]").ok());

    let stripped = match pattern {
        Some(re) => re.replace_all(query, "").into_owned(),
        None => query.to_string(),
    };
    stripped.split_whitespace().collect::<Vec<_>>().join(" ")
}

// ============================================================================
// QueryPipeline
// ============================================================================

/// 질의 파이프라인
pub struct QueryPipeline {
    config: Arc<AppConfig>,
    classifier: DepartmentClassifier,
    retriever: HybridRetriever,
    orchestrator: ResponseOrchestrator,
}

impl QueryPipeline {
    pub fn new(
        config: Arc<AppConfig>,
        store: Arc<EmbeddingStore>,
        generator: Arc<dyn GenerationBackend>,
        translator: Arc<dyn TranslationBackend>,
    ) -> Self {
        let classifier = DepartmentClassifier::from_config(&config.departments, config.classifier);
        let retriever = HybridRetriever::new(store)
            .with_oversample(config.retrieval.oversample)
            .with_min_dense_score(config.retrieval.min_dense_score);
        let orchestrator =
            ResponseOrchestrator::new(generator, translator, &config.generation, &config.translation);

        Self {
            config,
            classifier,
            retriever,
            orchestrator,
        }
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn classifier(&self) -> &DepartmentClassifier {
        &self.classifier
    }

    pub fn retriever(&self) -> &HybridRetriever {
        &self.retriever
    }

    /// 세션 처리 (기본 top_k)
    pub async fn respond(&self, session: &QuerySession) -> Response {
        self.respond_with_k(session, self.config.retrieval.top_k).await
    }

    /// 세션 처리 (top_k 지정)
    pub async fn respond_with_k(&self, session: &QuerySession, k: usize) -> Response {
        let started = Instant::now();
        let mut tracker = StageTracker::new(session.turn);

        match self.run(session, k, &mut tracker).await {
            Ok(Response::Answer(mut answer)) => {
                answer.processing_ms = started.elapsed().as_millis() as u64;
                Response::Answer(answer)
            }
            Ok(response) => response,
            Err(PipelineError::IndexAbsent { department }) => {
                tracker.advance(QueryStage::IndexAbsentReported);
                tracing::info!("No index for {}; reporting index absent", department);
                Response::from_error(&PipelineError::IndexAbsent { department })
            }
            Err(e) => {
                tracker.advance(QueryStage::Failed);
                tracing::warn!("Query failed ({:?}): {}", e.kind(), e);
                Response::from_error(&e)
            }
        }
    }

    async fn run(
        &self,
        session: &QuerySession,
        k: usize,
        tracker: &mut StageTracker,
    ) -> Result<Response, PipelineError> {
        let session = self.validate(session)?;

        let classification = self.classifier.classify(&session.query, &session.department);
        tracker.advance(QueryStage::Classified);

        if let Classification::Mismatch { suggested, .. } = &classification {
            tracker.advance(QueryStage::MismatchReported);
            let example_questions = self
                .config
                .department(suggested)
                .map(|d| d.example_questions.clone())
                .unwrap_or_default();
            return Ok(Response::Mismatch(MismatchReport {
                message: mismatch_message(&session.department, suggested),
                selected: session.department.clone(),
                suggested: suggested.clone(),
                example_questions,
            }));
        }

        let retrieval = self
            .retriever
            .retrieve(&session.department, &session.query, k)
            .await?;
        tracker.advance(QueryStage::Retrieved);

        let mut answer = self.orchestrator.answer(&session, &retrieval, tracker).await?;
        answer.confidence = classification.confidence();
        Ok(Response::Answer(answer))
    }

    /// 질의 정리 + 부서 이름 정규화
    fn validate(&self, session: &QuerySession) -> Result<QuerySession, PipelineError> {
        let query = clean_query(&session.query);
        if query.is_empty() {
            return Err(PipelineError::validation("query is empty"));
        }

        let max = self.config.retrieval.max_query_chars;
        let len = query.chars().count();
        if len > max {
            return Err(PipelineError::validation(format!(
                "query is too long ({} chars, maximum {})",
                len, max
            )));
        }

        let department = self
            .config
            .canonical_department(&session.department)
            .ok_or_else(|| {
                PipelineError::validation(format!("unknown department '{}'", session.department))
            })?;

        Ok(QuerySession {
            department: department.to_string(),
            language: session.language.trim().to_lowercase(),
            query,
            turn: session.turn,
        })
    }
}

// ============================================================================
// Tests
// ============================================================================
