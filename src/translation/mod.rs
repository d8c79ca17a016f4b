//! 번역 모듈 - 답변을 세션 언어로 번역
//!
//! 번역 실패는 답변 실패가 아닙니다. 오케스트레이터는 실패 시 원문 답변을
//! `TranslationStatus::Fallback`으로 표시해 그대로 돌려줍니다.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

use crate::generation::{GenerationBackend, GenerationError, GenerationRequest};

// ============================================================================
// Types
// ============================================================================

/// 번역 실패 분류
#[derive(Debug, Clone, PartialEq, Error)]
pub enum TranslationError {
    /// 지원하지 않는 언어 코드
    #[error("unsupported language: {0}")]
    Unsupported(String),
    /// 번역 백엔드 사용 불가
    #[error("translation unavailable: {0}")]
    Unavailable(String),
    #[error("translation timed out after {0:?}")]
    Timeout(Duration),
}

/// 번역 백엔드 트레이트
#[async_trait]
pub trait TranslationBackend: Send + Sync {
    /// `from` 언어 텍스트를 `to` 언어로 번역
    async fn translate(&self, text: &str, from: &str, to: &str) -> Result<String, TranslationError>;

    fn name(&self) -> &str;
}

/// 지원 언어 표 (코드 -> 표시 이름)
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LanguageTable {
    languages: BTreeMap<String, String>,
}

impl LanguageTable {
    pub fn new(languages: BTreeMap<String, String>) -> Self {
        Self { languages }
    }

    pub fn supports(&self, code: &str) -> bool {
        self.languages.contains_key(code)
    }

    pub fn display_name(&self, code: &str) -> Option<&str> {
        self.languages.get(code).map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.languages.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.languages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.languages.is_empty()
    }
}

// ============================================================================
// GenerationTranslator
// ============================================================================

const TRANSLATION_SYSTEM_PROMPT: &str = "You are a professional translator. \
Translate the user's text faithfully. Keep numbers, names and formatting unchanged. \
Return only the translated text without any commentary.";

/// 생성 모델을 이용한 번역기
pub struct GenerationTranslator {
    backend: Arc<dyn GenerationBackend>,
    languages: LanguageTable,
    max_output_tokens: u32,
}

impl GenerationTranslator {
    pub fn new(backend: Arc<dyn GenerationBackend>, languages: LanguageTable) -> Self {
        Self {
            backend,
            languages,
            max_output_tokens: 2048,
        }
    }

    fn language_name<'a>(&'a self, code: &'a str) -> Result<&'a str, TranslationError> {
        self.languages
            .display_name(code)
            .ok_or_else(|| TranslationError::Unsupported(code.to_string()))
    }
}

#[async_trait]
impl TranslationBackend for GenerationTranslator {
    async fn translate(&self, text: &str, from: &str, to: &str) -> Result<String, TranslationError> {
        let source = self.language_name(from)?;
        let target = self.language_name(to)?;

        if from == to || text.trim().is_empty() {
            return Ok(text.to_string());
        }

        let request = GenerationRequest {
            system: TRANSLATION_SYSTEM_PROMPT.to_string(),
            prompt: format!("Translate from {} to {}:\n\n{}", source, target, text),
            temperature: 0.0,
            max_output_tokens: self.max_output_tokens,
        };

        self.backend.generate(&request).await.map_err(|e| match e {
            GenerationError::Timeout(d) => TranslationError::Timeout(d),
            other => TranslationError::Unavailable(other.to_string()),
        })
    }

    fn name(&self) -> &str {
        self.backend.name()
    }
}

// ============================================================================
// DisabledTranslator
// ============================================================================

/// 번역이 꺼져 있을 때 사용 (항상 Unavailable)
#[derive(Debug, Default, Clone, Copy)]
pub struct DisabledTranslator;

#[async_trait]
impl TranslationBackend for DisabledTranslator {
    async fn translate(&self, _text: &str, _from: &str, _to: &str) -> Result<String, TranslationError> {
        Err(TranslationError::Unavailable("translation is disabled".to_string()))
    }

    fn name(&self) -> &str {
        "disabled"
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AppConfig;
    use std::sync::Mutex;

    /// 마지막 요청을 기록하고 고정 응답을 돌려주는 백엔드
    struct EchoBackend {
        reply: Result<String, GenerationError>,
        last_prompt: Mutex<Option<String>>,
    }

    #[async_trait]
    impl GenerationBackend for EchoBackend {
        async fn generate(&self, request: &GenerationRequest) -> Result<String, GenerationError> {
            *self.last_prompt.lock().unwrap() = Some(request.prompt.clone());
            self.reply.clone()
        }

        fn name(&self) -> &str {
            "echo"
        }
    }

    fn translator(reply: Result<String, GenerationError>) -> (Arc<EchoBackend>, GenerationTranslator) {
        let backend = Arc::new(EchoBackend {
            reply,
            last_prompt: Mutex::new(None),
        });
        let languages = LanguageTable::new(AppConfig::default().languages);
        let translator = GenerationTranslator::new(backend.clone(), languages);
        (backend, translator)
    }

    #[tokio::test]
    async fn test_translate_builds_prompt() {
        let (backend, translator) = translator(Ok("वार्षिक अवकाश: 21 दिन".to_string()));
        let text = translator.translate("Annual Leave: 21 days", "en", "hi").await.unwrap();

        assert_eq!(text, "वार्षिक अवकाश: 21 दिन");
        let prompt = backend.last_prompt.lock().unwrap().clone().unwrap();
        assert!(prompt.contains("English"));
        assert!(prompt.contains("Hindi"));
        assert!(prompt.ends_with("Annual Leave: 21 days"));
    }

    #[tokio::test]
    async fn test_unknown_language_is_unsupported() {
        let (_, translator) = translator(Ok("x".to_string()));
        let result = translator.translate("hello", "en", "xx").await;
        assert_eq!(result, Err(TranslationError::Unsupported("xx".to_string())));
    }

    #[tokio::test]
    async fn test_backend_errors_map_to_translation_errors() {
        let (_, translator) = translator(Err(GenerationError::Unavailable("503".to_string())));
        assert!(matches!(
            translator.translate("hello", "en", "ta").await,
            Err(TranslationError::Unavailable(_))
        ));

        let (_, translator) = self::translator(Err(GenerationError::Timeout(Duration::from_secs(3))));
        assert_eq!(
            translator.translate("hello", "en", "ta").await,
            Err(TranslationError::Timeout(Duration::from_secs(3)))
        );
    }

    #[tokio::test]
    async fn test_disabled_translator() {
        let result = DisabledTranslator.translate("hello", "en", "hi").await;
        assert!(matches!(result, Err(TranslationError::Unavailable(_))));
    }
}
