//! Knowledge 모듈 - 부서별 하이브리드 RAG 지식 저장소
//!
//! - Store: SQLite 업로드 저장소 (부서별 원문)
//! - Chunker: 문자 단위 오버랩 분할
//! - Index: 부서별 불변 임베딩 스냅샷 + copy-on-write 레지스트리
//! - Lance: LanceDB 영속화 (매니페스트 교체 방식)
//! - Hybrid: 벡터 후보 + BM25 재정렬

mod chunker;
mod hybrid;
mod index;
mod indexer;
mod lance;
mod lexical;
mod store;
mod vector;

// Re-exports
pub use chunker::{
    default_chunker, merge_chunks, overlap_chunker, Chunk, ChunkConfig, ChunkId, Chunker,
    OverlapChunker,
};
pub use hybrid::{HybridRetriever, RetrievalResult, RetrievedChunk, DEFAULT_OVERSAMPLE};
pub use index::{DepartmentIndex, EmbeddingStore, IndexHandle, IndexRegistry, IndexedChunk};
pub use indexer::{DeleteReport, DepartmentIndexer, IngestReport};
pub use lance::LanceVectorStore;
pub use lexical::{normalize_token, tokenize, LexicalStats, BM25_B, BM25_K1};
pub use store::{
    content_hash, get_data_dir, AddOutcome, Document, DocumentStore, NewDocument, StoreStats,
};
pub use vector::{
    cosine_similarity, inner_product, normalize, IndexMeta, IndexPersistence, ScoredChunk,
    SimilarityMetric, VectorEntry,
};
