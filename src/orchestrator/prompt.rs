//! 프롬프트 구성 - 검색 청크를 제한된 컨텍스트로 묶기

use crate::error::PipelineError;
use crate::knowledge::{RetrievalResult, RetrievedChunk};

/// 컨텍스트 청크 구분자
pub const CONTEXT_SEPARATOR: &str = "\n---\n";

/// 완성된 프롬프트
#[derive(Debug, Clone, PartialEq)]
pub struct BuiltPrompt {
    pub system: String,
    pub prompt: String,
    /// 컨텍스트에 들어간 청크 (순위순)
    pub used: Vec<RetrievedChunk>,
    /// 한도 때문에 빠진 청크 수
    pub dropped: usize,
}

/// 프롬프트 빌더
#[derive(Debug, Clone)]
pub struct PromptBuilder {
    max_context_chars: usize,
}

impl PromptBuilder {
    pub fn new(max_context_chars: usize) -> Self {
        Self { max_context_chars }
    }

    pub fn max_context_chars(&self) -> usize {
        self.max_context_chars
    }

    /// 검색 결과로 프롬프트 구성
    ///
    /// 한도를 넘으면 순위가 낮은 청크부터 뺍니다. 최상위 청크 하나도
    /// 들어가지 않으면 `ContextOverflow`.
    pub fn build(
        &self,
        department: &str,
        question: &str,
        retrieval: &RetrievalResult,
    ) -> Result<BuiltPrompt, PipelineError> {
        let separator_len = CONTEXT_SEPARATOR.chars().count();
        let mut used: Vec<RetrievedChunk> = Vec::new();
        let mut total = 0;

        for item in &retrieval.items {
            let len = item.text.chars().count();
            let extra = if used.is_empty() { len } else { len + separator_len };
            if total + extra > self.max_context_chars {
                break;
            }
            total += extra;
            used.push(item.clone());
        }

        if used.is_empty() {
            let required = retrieval
                .items
                .first()
                .map(|item| item.text.chars().count())
                .unwrap_or(0);
            return Err(PipelineError::ContextOverflow {
                required,
                limit: self.max_context_chars,
            });
        }

        let dropped = retrieval.items.len() - used.len();
        if dropped > 0 {
            tracing::warn!(
                "Dropped {} lowest-ranked chunk(s) to fit {} context chars",
                dropped,
                self.max_context_chars
            );
        }

        let context = used
            .iter()
            .map(|item| item.text.as_str())
            .collect::<Vec<_>>()
            .join(CONTEXT_SEPARATOR);

        Ok(BuiltPrompt {
            system: system_prompt(department),
            prompt: format!("Context:\n{}\n\nQuestion: {}\n\nAnswer:", context, question),
            used,
            dropped,
        })
    }
}

fn system_prompt(department: &str) -> String {
    format!(
        "You are a helpful assistant for company employees. \
         Use the following {} department documents to answer the question. \
         If the answer is not present, say so politely.",
        department
    )
}
