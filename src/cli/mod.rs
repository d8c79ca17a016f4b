//! CLI 모듈
//!
//! deptmind 관리/질의 명령어 정의 및 구현

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};

use crate::config::{AppConfig, EmbeddingProviderKind};
use crate::embedding::{create_embedder, has_api_key};
use crate::extractor::extract_document;
use crate::generation::{GeminiGeneration, GenerationBackend};
use crate::knowledge::{
    overlap_chunker, Chunker, DepartmentIndexer, DocumentStore, EmbeddingStore, IndexHandle,
    LanceVectorStore, NewDocument,
};
use crate::orchestrator::{Response, TranslationStatus};
use crate::pipeline::{QueryPipeline, QuerySession};
use crate::translation::{
    DisabledTranslator, GenerationTranslator, LanguageTable, TranslationBackend,
};

// ============================================================================
// CLI Definition
// ============================================================================

#[derive(Parser)]
#[command(name = "deptmind")]
#[command(version, about = "부서별 하이브리드 RAG 질의 시스템", long_about = None)]
pub struct Cli {
    /// 설정 파일 경로 (기본: ~/.deptmind/config.json)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// 부서 문서 추가 후 인덱스 재빌드
    Ingest {
        /// 부서 이름
        #[arg(short, long)]
        department: String,

        /// 업로드할 파일 (.txt, .md, .pdf)
        #[arg(short, long)]
        file: Option<PathBuf>,

        /// 직접 입력할 텍스트
        #[arg(short, long)]
        text: Option<String>,

        /// 텍스트 입력 시 출처 이름
        #[arg(short, long)]
        source: Option<String>,
    },

    /// 부서 인덱스 재빌드 (부서 생략 시 전체)
    Rebuild {
        #[arg(short, long)]
        department: Option<String>,
    },

    /// 문서 삭제 후 인덱스 갱신
    Delete {
        /// 삭제할 문서 ID
        #[arg(short, long)]
        id: i64,
    },

    /// 저장된 문서 목록
    List {
        /// 부서 필터
        #[arg(short, long)]
        department: Option<String>,
    },

    /// 부서 문서에 질문
    Ask {
        /// 부서 이름
        #[arg(short, long)]
        department: String,

        /// 응답 언어 코드
        #[arg(short, long, default_value = "en")]
        language: String,

        /// 검색할 청크 수 (기본: 설정값)
        #[arg(short = 'k', long)]
        top_k: Option<usize>,

        /// JSON으로 출력
        #[arg(long)]
        json: bool,

        /// 질문
        query: String,
    },

    /// 부서 프로필과 예시 질문
    Departments,

    /// 상태 확인
    Status,
}

// ============================================================================
// CLI Runner
// ============================================================================

/// CLI 명령어 실행
pub async fn run(cli: Cli) -> Result<()> {
    let config = Arc::new(AppConfig::load(cli.config.as_deref()).context("설정 로드 실패")?);

    match cli.command {
        Commands::Ingest {
            department,
            file,
            text,
            source,
        } => cmd_ingest(config, &department, file, text, source).await,
        Commands::Rebuild { department } => cmd_rebuild(config, department).await,
        Commands::Delete { id } => cmd_delete(config, id).await,
        Commands::List { department } => cmd_list(&config, department),
        Commands::Ask {
            department,
            language,
            top_k,
            json,
            query,
        } => cmd_ask(config, &department, &language, top_k, json, &query).await,
        Commands::Departments => cmd_departments(&config),
        Commands::Status => cmd_status(config).await,
    }
}

// ============================================================================
// Runtime Wiring
// ============================================================================

/// 임베딩 저장소 열기 (LanceDB 영속화 + 복원)
async fn open_embedding_store(config: &AppConfig, data_dir: &Path) -> Result<Arc<EmbeddingStore>> {
    if config.models.embedding_provider == EmbeddingProviderKind::Gemini && !has_api_key() {
        bail!(
            "API 키가 설정되지 않았습니다.\n\n\
             설정 방법:\n  \
             export GEMINI_API_KEY=your-api-key\n  \
             또는\n  \
             export GOOGLE_AI_API_KEY=your-api-key\n\n\
             API 키 발급: https://aistudio.google.com/app/apikey"
        );
    }

    let embedder = create_embedder(&config.models).context("임베딩 프로바이더 생성 실패")?;
    let lance = LanceVectorStore::open(data_dir)
        .await
        .context("벡터 저장소 열기 실패")?;

    let store = EmbeddingStore::new(embedder).with_persistence(Arc::new(lance));
    store.restore().await.context("인덱스 복원 실패")?;
    Ok(Arc::new(store))
}

/// 인덱서 열기
async fn open_indexer(config: &AppConfig) -> Result<DepartmentIndexer> {
    let data_dir = config.data_dir();
    let documents = DocumentStore::open_in(&data_dir).context("DocumentStore 열기 실패")?;
    let store = open_embedding_store(config, &data_dir).await?;
    Ok(DepartmentIndexer::new(documents, configured_chunker(config)?, store))
}

/// 설정된 청커 (잘못된 설정은 기본값으로 바꾸지 않고 에러)
fn configured_chunker(config: &AppConfig) -> Result<Box<dyn Chunker>> {
    overlap_chunker(config.chunking.clone()).context("청킹 설정 오류")
}

/// 설정된 부서 이름으로 정규화
fn resolve_department<'a>(config: &'a AppConfig, name: &str) -> Result<&'a str> {
    config.canonical_department(name).ok_or_else(|| {
        let known: Vec<&str> = config.departments.iter().map(|d| d.name.as_str()).collect();
        anyhow::anyhow!("알 수 없는 부서 '{}' (가능: {})", name, known.join(", "))
    })
}

// ============================================================================
// Command Implementations
// ============================================================================

/// 문서 추가 명령어 (ingest)
async fn cmd_ingest(
    config: Arc<AppConfig>,
    department: &str,
    file: Option<PathBuf>,
    text: Option<String>,
    source: Option<String>,
) -> Result<()> {
    let department = resolve_department(&config, department)?.to_string();

    let (source, content) = match (file, text) {
        (Some(path), None) => {
            println!("[*] 파일 추출 중: {}", path.display());
            let doc = extract_document(&path).await?;
            (source.unwrap_or(doc.source), doc.text)
        }
        (None, Some(text)) => (source.unwrap_or_else(|| "manual-input".to_string()), text),
        _ => bail!("--file 또는 --text 중 하나만 지정해야 합니다"),
    };

    let indexer = open_indexer(&config).await?;
    let report = indexer
        .ingest(NewDocument {
            department: department.clone(),
            source: source.clone(),
            content,
        })
        .await
        .context("문서 추가 실패")?;

    if report.unchanged && report.index.is_none() {
        println!("[OK] 문서 #{} ({}) 변경 없음 - 인덱스 유지", report.document_id, source);
    } else {
        println!("[OK] 문서 #{} 저장됨: {}/{}", report.document_id, department, source);
    }
    if let Some(handle) = report.index {
        print_handle(&handle);
    }

    Ok(())
}

/// 재빌드 명령어 (rebuild)
async fn cmd_rebuild(config: Arc<AppConfig>, department: Option<String>) -> Result<()> {
    let indexer = open_indexer(&config).await?;

    match department {
        Some(name) => {
            let department = resolve_department(&config, &name)?;
            match indexer.rebuild(department).await.context("재빌드 실패")? {
                Some(handle) => print_handle(&handle),
                None => println!("[!] {} 부서에 문서가 없어 인덱스를 제거했습니다", department),
            }
        }
        None => {
            let handles = indexer.rebuild_all().await.context("재빌드 실패")?;
            if handles.is_empty() {
                println!("[!] 재빌드할 문서가 없습니다");
            }
            for handle in &handles {
                print_handle(handle);
            }
        }
    }

    Ok(())
}

/// 삭제 명령어 (delete)
async fn cmd_delete(config: Arc<AppConfig>, id: i64) -> Result<()> {
    let indexer = open_indexer(&config).await?;

    match indexer.delete(id).await.context("문서 삭제 실패")? {
        Some(report) => {
            println!("[OK] 문서 #{} 삭제됨 ({})", id, report.department);
            match report.index {
                Some(handle) => print_handle(&handle),
                None => println!("     {} 부서에 남은 문서가 없어 인덱스를 제거했습니다", report.department),
            }
        }
        None => bail!("ID {}인 문서를 찾을 수 없습니다", id),
    }

    Ok(())
}

/// 목록 명령어 (list)
fn cmd_list(config: &AppConfig, department: Option<String>) -> Result<()> {
    let department = department
        .map(|name| resolve_department(config, &name).map(str::to_string))
        .transpose()?;

    let store = DocumentStore::open_in(&config.data_dir()).context("DocumentStore 열기 실패")?;
    let docs = store
        .list_documents(department.as_deref())
        .context("문서 목록 조회 실패")?;

    if docs.is_empty() {
        println!("[!] 저장된 문서가 없습니다.");
        return Ok(());
    }

    println!("[OK] 저장된 문서 ({} 건):\n", docs.len());

    for doc in docs {
        println!("  #{:<4} [{}] {}", doc.id, doc.department, truncate_text(&doc.source, 50));
        println!(
            "        {} | {} chars | {}",
            doc.created_at.format("%Y-%m-%d %H:%M"),
            doc.content.chars().count(),
            &doc.content_hash[..12.min(doc.content_hash.len())]
        );
    }

    Ok(())
}

/// 질문 명령어 (ask)
async fn cmd_ask(
    config: Arc<AppConfig>,
    department: &str,
    language: &str,
    top_k: Option<usize>,
    json: bool,
    query: &str,
) -> Result<()> {
    let data_dir = config.data_dir();
    let store = open_embedding_store(&config, &data_dir).await?;

    let generator: Arc<dyn GenerationBackend> = Arc::new(
        GeminiGeneration::from_config(&config.models, &config.generation)
            .context("생성 모델 초기화 실패")?,
    );
    let translator: Arc<dyn TranslationBackend> = if config.translation.enabled {
        Arc::new(GenerationTranslator::new(
            Arc::clone(&generator),
            LanguageTable::new(config.languages.clone()),
        ))
    } else {
        Arc::new(DisabledTranslator)
    };

    let k = top_k.unwrap_or(config.retrieval.top_k);
    let pipeline = QueryPipeline::new(Arc::clone(&config), store, generator, translator);
    let response = pipeline
        .respond_with_k(&QuerySession::new(department, language, query), k)
        .await;

    if json {
        println!("{}", serde_json::to_string_pretty(&response)?);
    } else {
        print_response(&response);
    }

    Ok(())
}

/// 부서 목록 명령어 (departments)
fn cmd_departments(config: &AppConfig) -> Result<()> {
    for dept in &config.departments {
        let keywords: Vec<&str> = dept.keywords.iter().map(|k| k.term.as_str()).collect();
        println!("[{}]", dept.name);
        println!("  키워드: {}", keywords.join(", "));
        for question in &dept.example_questions {
            println!("  - {}", question);
        }
        println!();
    }
    Ok(())
}

/// 상태 명령어 (status)
async fn cmd_status(config: Arc<AppConfig>) -> Result<()> {
    println!("deptmind v{}", env!("CARGO_PKG_VERSION"));
    println!();

    let data_dir = config.data_dir();
    println!("[*] 데이터 디렉토리: {}", data_dir.display());
    println!(
        "[*] 모델: 생성 {} / 임베딩 {:?} {} ({}차원)",
        config.models.generation_model,
        config.models.embedding_provider,
        config.models.embedding_model,
        config.models.embedding_dimension
    );

    if has_api_key() {
        println!("[OK] API 키: 설정됨");
    } else {
        println!("[!] API 키: 미설정");
        println!("    설정: export GEMINI_API_KEY=your-key");
    }

    match DocumentStore::open_in(&data_dir).and_then(|store| store.stats()) {
        Ok(stats) => {
            println!(
                "[OK] 저장된 문서: {} 건 ({}개 부서)",
                stats.document_count, stats.department_count
            );
            println!("     총 콘텐츠: {}", format_bytes(stats.total_content_bytes));
        }
        Err(e) => println!("[!] 통계 조회 실패: {}", e),
    }

    match open_embedding_store(&config, &data_dir).await {
        Ok(store) => {
            let departments = store.departments();
            if departments.is_empty() {
                println!("[!] 빌드된 인덱스 없음");
            }
            for department in departments {
                if let Ok(index) = store.snapshot(&department) {
                    let meta = index.meta();
                    println!(
                        "[OK] 인덱스 {}: {} 청크 (빌드 {})",
                        department,
                        meta.chunk_count,
                        meta.built_at.format("%Y-%m-%d %H:%M")
                    );
                }
            }
        }
        Err(e) => tracing::debug!("벡터 저장소 상태 조회 실패: {}", e),
    }

    Ok(())
}

// ============================================================================
// Helper Functions
// ============================================================================

fn print_handle(handle: &IndexHandle) {
    println!(
        "[OK] {} 인덱스 빌드: {} 청크 ({}, {}차원, build {})",
        handle.department,
        handle.chunk_count,
        handle.embedding_model,
        handle.dimension,
        handle.build_id
    );
}

fn print_response(response: &Response) {
    match response {
        Response::Answer(answer) => {
            println!("{}\n", answer.text);
            match &answer.translation {
                TranslationStatus::Native => {}
                TranslationStatus::Translated { to, .. } => println!("[*] 번역됨: {}", to),
                TranslationStatus::Fallback { target, reason } => {
                    println!("[!] {} 번역 실패 - 원문으로 표시 ({})", target, reason)
                }
            }
            if !answer.sources.is_empty() {
                println!("[*] 출처: {}", answer.sources.join(", "));
            }
            println!(
                "[*] 신뢰도 {:.2} | 시도 {}회 | {} ms",
                answer.confidence, answer.attempts, answer.processing_ms
            );
            if answer.dropped_chunks > 0 {
                println!("[!] 컨텍스트 한도로 {}개 청크 제외", answer.dropped_chunks);
            }
        }
        Response::Mismatch(report) => {
            println!("[!] {}", report.message);
            if !report.example_questions.is_empty() {
                println!("\n{} 부서 예시 질문:", report.suggested);
                for question in &report.example_questions {
                    println!("  - {}", question);
                }
            }
        }
        Response::IndexAbsent { message, .. } => println!("[!] {}", message),
        Response::Failure { kind, reason } => println!("[X] {:?}: {}", kind, reason),
    }
}

/// 텍스트 자르기 (UTF-8 안전)
fn truncate_text(text: &str, max_chars: usize) -> String {
    let cleaned = text.replace('\n', " ").replace('\r', "");
    let cleaned = cleaned.trim();

    if cleaned.chars().count() <= max_chars {
        cleaned.to_string()
    } else {
        let truncated: String = cleaned.chars().take(max_chars).collect();
        format!("{}...", truncated)
    }
}

/// 바이트 크기 포맷팅
fn format_bytes(bytes: usize) -> String {
    const KB: usize = 1024;
    const MB: usize = KB * 1024;

    if bytes >= MB {
        format!("{:.2} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.2} KB", bytes as f64 / KB as f64)
    } else {
        format!("{} B", bytes)
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truncate_text() {
        assert_eq!(truncate_text("handbook.pdf", 20), "handbook.pdf");
        assert_eq!(truncate_text("employee handbook", 8), "employee...");
        assert_eq!(truncate_text("leave\npolicy", 20), "leave policy");
        assert_eq!(truncate_text("연차휴가 규정", 4), "연차휴가...");
    }

    #[test]
    fn test_format_bytes() {
        assert_eq!(format_bytes(500), "500 B");
        assert_eq!(format_bytes(1536), "1.50 KB");
        assert_eq!(format_bytes(1048576), "1.00 MB");
    }

    #[test]
    fn test_resolve_department() {
        let config = AppConfig::default();
        assert_eq!(resolve_department(&config, "accounts").unwrap(), "Accounts");
        let err = resolve_department(&config, "Legal").unwrap_err().to_string();
        assert!(err.contains("Legal"));
        assert!(err.contains("HR"));
    }

    #[test]
    fn test_configured_chunker_rejects_invalid_config() {
        let mut config = AppConfig::default();
        assert!(configured_chunker(&config).is_ok());

        config.chunking.max_characters = 200;
        config.chunking.overlap_characters = 200;
        let err = configured_chunker(&config).err().unwrap();
        assert!(format!("{:#}", err).contains("overlap"));
    }

    #[test]
    fn test_cli_parses_ask() {
        let cli = Cli::parse_from([
            "deptmind", "ask", "--department", "HR", "--language", "hi", "-k", "5", "--json",
            "What is the leave policy?",
        ]);
        match cli.command {
            Commands::Ask {
                department,
                language,
                top_k,
                json,
                query,
            } => {
                assert_eq!(department, "HR");
                assert_eq!(language, "hi");
                assert_eq!(top_k, Some(5));
                assert!(json);
                assert_eq!(query, "What is the leave policy?");
            }
            _ => panic!("expected ask"),
        }
    }

    #[test]
    fn test_cli_global_config_flag() {
        let cli = Cli::parse_from(["deptmind", "status", "--config", "/tmp/deptmind.json"]);
        assert_eq!(cli.config, Some(PathBuf::from("/tmp/deptmind.json")));
        assert!(matches!(cli.command, Commands::Status));
    }
}
