//! 설정 모듈 - 시작 시 한 번 로드되는 정적 설정
//!
//! 우선순위: 기본값 <- JSON 파일 (`~/.deptmind/config.json` 또는 `--config`) <- 환경변수
//!
//! | 환경변수 | 대상 |
//! |----------|------|
//! | `DEPTMIND_GENERATION_MODEL` | `models.generation_model` |
//! | `DEPTMIND_EMBEDDING_MODEL` | `models.embedding_model` |
//! | `DEPTMIND_TEMPERATURE` | `generation.temperature` |
//!
//! API 키는 설정 파일에 두지 않고 `GEMINI_API_KEY` / `GOOGLE_AI_API_KEY`에서 읽습니다.

use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::embedding::{DEFAULT_DIMENSION, DEFAULT_EMBEDDING_MODEL};
use crate::knowledge::{get_data_dir, ChunkConfig};

/// 기본 생성 모델
pub const DEFAULT_GENERATION_MODEL: &str = "gemini-1.5-flash";

/// 원어 (생성 모델 응답 언어)
pub const NATIVE_LANGUAGE: &str = "en";

// ============================================================================
// AppConfig
// ============================================================================

/// 애플리케이션 설정
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub chunking: ChunkConfig,
    pub retrieval: RetrievalConfig,
    pub classifier: ClassifierConfig,
    pub generation: GenerationConfig,
    pub translation: TranslationConfig,
    pub models: ModelConfig,
    /// 설정 순서가 분류기 동점 처리 순서
    pub departments: Vec<DepartmentConfig>,
    /// 언어 코드 -> 표시 이름
    pub languages: BTreeMap<String, String>,
    /// 데이터 디렉토리 (기본: ~/.deptmind)
    pub data_dir: Option<PathBuf>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            chunking: ChunkConfig::default(),
            retrieval: RetrievalConfig::default(),
            classifier: ClassifierConfig::default(),
            generation: GenerationConfig::default(),
            translation: TranslationConfig::default(),
            models: ModelConfig::default(),
            departments: default_departments(),
            languages: default_languages(),
            data_dir: None,
        }
    }
}

/// 검색 설정
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrievalConfig {
    pub top_k: usize,
    /// 재정렬 전 후보 배수
    pub oversample: usize,
    /// 벡터 스코어 하한 (미만이면 후보에서 제외)
    pub min_dense_score: f32,
    /// 질의 최대 길이 (문자)
    pub max_query_chars: usize,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            top_k: 3,
            oversample: 4,
            min_dense_score: 0.0,
            max_query_chars: 1000,
        }
    }
}

/// 부서 분류기 설정
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClassifierConfig {
    /// 선택 부서 스코어가 최고점에서 이만큼 안쪽이면 Match
    pub tolerance: f32,
    /// 최고점이 이보다 낮으면 Ambiguous
    pub min_score: f32,
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            tolerance: 0.5,
            min_score: 1.0,
        }
    }
}

/// 생성 호출 설정
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GenerationConfig {
    pub max_attempts: u32,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
    /// 시도당 타임아웃
    pub timeout_secs: u64,
    /// 프롬프트 컨텍스트 최대 길이 (문자)
    pub max_context_chars: usize,
    pub temperature: f32,
    pub max_output_tokens: u32,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff_ms: 500,
            max_backoff_ms: 8_000,
            timeout_secs: 30,
            max_context_chars: 12_000,
            temperature: 0.3,
            max_output_tokens: 1000,
        }
    }
}

/// 번역 설정
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TranslationConfig {
    /// false면 모든 번역이 Fallback으로 처리됨
    pub enabled: bool,
    pub native_language: String,
    pub timeout_secs: u64,
}

impl Default for TranslationConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            native_language: NATIVE_LANGUAGE.to_string(),
            timeout_secs: 15,
        }
    }
}

/// 임베딩 프로바이더 종류
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EmbeddingProviderKind {
    #[default]
    Gemini,
    /// 오프라인 해시 임베딩
    Hash,
}

/// 모델 설정
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelConfig {
    pub embedding_provider: EmbeddingProviderKind,
    pub embedding_model: String,
    pub embedding_dimension: usize,
    pub generation_model: String,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            embedding_provider: EmbeddingProviderKind::Gemini,
            embedding_model: DEFAULT_EMBEDDING_MODEL.to_string(),
            embedding_dimension: DEFAULT_DIMENSION,
            generation_model: DEFAULT_GENERATION_MODEL.to_string(),
        }
    }
}

/// 부서 설정 (키워드 프로필 + 예시 질문)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DepartmentConfig {
    pub name: String,
    #[serde(default)]
    pub keywords: Vec<KeywordConfig>,
    #[serde(default)]
    pub example_questions: Vec<String>,
}

/// 가중치 키워드 (단어 또는 여러 단어 구)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KeywordConfig {
    pub term: String,
    #[serde(default = "default_weight")]
    pub weight: f32,
}

fn default_weight() -> f32 {
    1.0
}

// ============================================================================
// Loading
// ============================================================================

impl AppConfig {
    /// 설정 로드 (기본값 <- 파일 <- 환경변수) 후 검증
    ///
    /// `path`가 주어지면 파일이 반드시 있어야 하고, 없으면 기본 경로를 시도합니다.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => {
                let default_path = default_config_path();
                if default_path.exists() {
                    Self::from_file(&default_path)?
                } else {
                    tracing::debug!("No config file at {}; using defaults", default_path.display());
                    Self::default()
                }
            }
        };

        config.apply_env(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// JSON 파일에서 로드 (빠진 항목은 기본값)
    pub fn from_file(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        let config: Self = serde_json::from_str(&raw)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;
        tracing::info!("Loaded config from {}", path.display());
        Ok(config)
    }

    /// 환경변수 덮어쓰기
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(model) = lookup("DEPTMIND_GENERATION_MODEL").filter(|v| !v.is_empty()) {
            self.models.generation_model = model;
        }
        if let Some(model) = lookup("DEPTMIND_EMBEDDING_MODEL").filter(|v| !v.is_empty()) {
            self.models.embedding_model = model;
        }
        if let Some(raw) = lookup("DEPTMIND_TEMPERATURE").filter(|v| !v.is_empty()) {
            self.generation.temperature = raw
                .trim()
                .parse()
                .with_context(|| format!("DEPTMIND_TEMPERATURE is not a number: {}", raw))?;
        }
        Ok(())
    }

    /// 설정 검증
    pub fn validate(&self) -> Result<()> {
        self.chunking.validate()?;

        if self.retrieval.top_k == 0 {
            anyhow::bail!("retrieval.top_k must be at least 1");
        }
        if self.retrieval.oversample == 0 {
            anyhow::bail!("retrieval.oversample must be at least 1");
        }
        if self.generation.max_attempts == 0 {
            anyhow::bail!("generation.max_attempts must be at least 1");
        }
        if self.generation.timeout_secs == 0 || self.translation.timeout_secs == 0 {
            anyhow::bail!("timeouts must be at least 1 second");
        }
        if !(0.0..=2.0).contains(&self.generation.temperature) {
            anyhow::bail!(
                "generation.temperature must be within 0.0..=2.0, got {}",
                self.generation.temperature
            );
        }
        if self.classifier.tolerance < 0.0 || self.classifier.min_score < 0.0 {
            anyhow::bail!("classifier thresholds must not be negative");
        }
        if self.departments.is_empty() {
            anyhow::bail!("at least one department must be configured");
        }

        let mut seen = HashSet::new();
        for dept in &self.departments {
            if dept.name.trim().is_empty() {
                anyhow::bail!("department name must not be empty");
            }
            if !seen.insert(dept.name.to_lowercase()) {
                anyhow::bail!("department '{}' is configured twice", dept.name);
            }
            for keyword in &dept.keywords {
                if keyword.term.trim().is_empty() {
                    anyhow::bail!("department '{}' has an empty keyword", dept.name);
                }
                if !(keyword.weight.is_finite() && keyword.weight > 0.0) {
                    anyhow::bail!(
                        "keyword '{}' of '{}' must have a positive weight",
                        keyword.term,
                        dept.name
                    );
                }
            }
        }

        if !self.languages.contains_key(&self.translation.native_language) {
            anyhow::bail!(
                "native language '{}' is not in the language table",
                self.translation.native_language
            );
        }

        Ok(())
    }

    /// 설정된 부서명 중 대소문자 무시 일치 항목 (정식 이름 반환)
    pub fn canonical_department(&self, name: &str) -> Option<&str> {
        let name = name.trim();
        self.departments
            .iter()
            .find(|d| d.name.eq_ignore_ascii_case(name))
            .map(|d| d.name.as_str())
    }

    pub fn department(&self, name: &str) -> Option<&DepartmentConfig> {
        self.departments.iter().find(|d| d.name == name)
    }

    /// 데이터 디렉토리 (설정값 또는 ~/.deptmind)
    pub fn data_dir(&self) -> PathBuf {
        self.data_dir.clone().unwrap_or_else(get_data_dir)
    }
}

/// 기본 설정 파일 경로
pub fn default_config_path() -> PathBuf {
    get_data_dir().join("config.json")
}

// ============================================================================
// Defaults
// ============================================================================

fn department(name: &str, keywords: &[&str], examples: &[&str]) -> DepartmentConfig {
    DepartmentConfig {
        name: name.to_string(),
        keywords: keywords
            .iter()
            .map(|term| KeywordConfig {
                term: term.to_string(),
                weight: default_weight(),
            })
            .collect(),
        example_questions: examples.iter().map(|q| q.to_string()).collect(),
    }
}

fn default_departments() -> Vec<DepartmentConfig> {
    vec![
        department(
            "HR",
            &["policy", "leave", "employee", "salary", "benefits", "recruitment"],
            &[
                "What is the leave policy?",
                "How to apply for performance appraisal?",
                "What are employee benefits?",
            ],
        ),
        department(
            "Accounts",
            &["invoice", "payment", "budget", "expense", "finance", "accounting"],
            &[
                "How to submit expense reports?",
                "What is the payment process?",
                "How to create invoices?",
            ],
        ),
        department(
            "Sales",
            &["sales", "customer", "lead", "revenue", "target", "commission"],
            &[
                "What are sales targets?",
                "How to track leads?",
                "What is commission structure?",
            ],
        ),
        department(
            "Marketing",
            &["campaign", "brand", "promotion", "advertising", "social media"],
            &[
                "How to create campaigns?",
                "What are brand guidelines?",
                "How to measure ROI?",
            ],
        ),
        department(
            "IT",
            &["software", "hardware", "network", "security", "database", "server"],
            &[
                "How to request software access?",
                "What are security policies?",
                "How to report technical issues?",
            ],
        ),
        department(
            "Operations",
            &["process", "workflow", "operations", "logistics", "supply chain"],
            &[
                "What are operational procedures?",
                "How to manage inventory?",
                "What are quality standards?",
            ],
        ),
        department(
            "Customer Support",
            &["support", "ticket", "complaint", "service", "help", "issue"],
            &[
                "How to handle complaints?",
                "What is ticket resolution process?",
                "How to escalate issues?",
            ],
        ),
    ]
}

fn default_languages() -> BTreeMap<String, String> {
    [
        ("en", "English"),
        ("hi", "Hindi (हिन्दी)"),
        ("ta", "Tamil (தமிழ்)"),
        ("te", "Telugu (తెలుగు)"),
        ("bn", "Bengali (বাংলা)"),
        ("ml", "Malayalam (മലയാളം)"),
        ("kn", "Kannada (ಕನ್ನಡ)"),
        ("gu", "Gujarati (ગુજરાતી)"),
        ("mr", "Marathi (मराठी)"),
        ("ur", "Urdu (اردو)"),
        ("or", "Odia (ଓଡ଼ିଆ)"),
        ("as", "Assamese (অসমীয়া)"),
        ("pa", "Punjabi (ਪੰਜਾਬੀ)"),
        ("sd", "Sindhi (سنڌي)"),
        ("yo", "Yoruba"),
        ("ig", "Igbo"),
        ("ha", "Hausa"),
        ("si", "Sinhala (සිංහල)"),
    ]
    .into_iter()
    .map(|(code, name)| (code.to_string(), name.to_string()))
    .collect()
}

// ============================================================================
// Tests
// ============================================================================
