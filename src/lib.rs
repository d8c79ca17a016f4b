//! deptmind - 부서별 하이브리드 RAG 질의 시스템
//!
//! 부서 문서를 청크 단위로 임베딩해 부서 인덱스를 만들고,
//! 질의를 부서 키워드로 분류한 뒤 벡터 + BM25 하이브리드 검색으로
//! 근거를 모아 답변을 생성합니다. 생성은 재시도, 번역은 원문 폴백을 가집니다.

pub mod cli;
pub mod config;
pub mod department;
pub mod embedding;
pub mod error;
pub mod extractor;
pub mod generation;
pub mod knowledge;
pub mod orchestrator;
pub mod pipeline;
pub mod translation;

// Re-exports
pub use config::AppConfig;
pub use department::{Classification, DepartmentClassifier, ProfileSet};
pub use embedding::{
    create_embedder, get_api_key, has_api_key, EmbeddingProvider, GeminiEmbedding, HashEmbedding,
};
pub use error::{FailureKind, PipelineError};
pub use generation::{GeminiGeneration, GenerationBackend, GenerationError, RetryPolicy};
pub use knowledge::{
    default_chunker, overlap_chunker, Chunk, ChunkConfig, ChunkId, Chunker, DepartmentIndex,
    DepartmentIndexer, Document, DocumentStore, EmbeddingStore, HybridRetriever, IndexHandle,
    LanceVectorStore, NewDocument, RetrievalResult, RetrievedChunk, StoreStats,
};
pub use orchestrator::{Answer, MismatchReport, Response, ResponseOrchestrator, TranslationStatus};
pub use pipeline::{QueryPipeline, QuerySession};
pub use translation::{DisabledTranslator, GenerationTranslator, LanguageTable, TranslationBackend};
