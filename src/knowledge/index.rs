//! Department Index - 부서별 임베딩 인덱스와 레지스트리
//!
//! - `DepartmentIndex`: 한 번 빌드되면 불변인 스냅샷 (벡터 + 원문 + BM25 통계)
//! - `IndexRegistry`: 부서 -> `Arc<DepartmentIndex>` (copy-on-write 교체)
//! - `EmbeddingStore`: 빌드 / 질의 / 영속화 진입점
//!
//! 재빌드는 새 스냅샷을 완성한 뒤 포인터만 바꿉니다. 질의 중인 세션은
//! 자신이 잡은 `Arc`를 계속 읽으므로 부분적으로 쓰인 인덱스를 보지 않습니다.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};

use anyhow::anyhow;
use chrono::{DateTime, Utc};
use serde::Serialize;
use sha2::{Digest, Sha256};

use crate::embedding::EmbeddingProvider;
use crate::error::PipelineError;

use super::chunker::{Chunk, ChunkId};
use super::lexical::{tokenize, LexicalStats};
use super::vector::{IndexMeta, IndexPersistence, ScoredChunk, SimilarityMetric, VectorEntry};

// ============================================================================
// DepartmentIndex
// ============================================================================

/// 인덱스에 저장된 청크 (벡터 + 원문 + 토큰)
#[derive(Debug, Clone)]
pub struct IndexedChunk {
    pub entry: VectorEntry,
    pub tokens: Vec<String>,
}

/// 불변 부서 인덱스 스냅샷
#[derive(Debug)]
pub struct DepartmentIndex {
    meta: IndexMeta,
    chunks: Vec<IndexedChunk>,
    positions: HashMap<ChunkId, usize>,
    lexicon: LexicalStats,
}

impl DepartmentIndex {
    /// 엔트리와 메타데이터로 스냅샷 생성
    ///
    /// 모든 벡터 차원이 `meta.dimension`과 같아야 합니다.
    pub fn new(meta: IndexMeta, mut entries: Vec<VectorEntry>) -> Result<Self, PipelineError> {
        if let Some(bad) = entries.iter().find(|e| e.embedding.len() != meta.dimension) {
            return Err(PipelineError::Embedding(anyhow!(
                "chunk {} has dimension {}, index '{}' expects {}",
                bad.chunk_id,
                bad.embedding.len(),
                meta.department,
                meta.dimension
            )));
        }

        entries.sort_by_key(|e| e.chunk_id);

        let chunks: Vec<IndexedChunk> = entries
            .into_iter()
            .map(|entry| IndexedChunk {
                tokens: tokenize(&entry.chunk_text),
                entry,
            })
            .collect();

        let positions = chunks
            .iter()
            .enumerate()
            .map(|(i, c)| (c.entry.chunk_id, i))
            .collect();

        let lexicon = LexicalStats::from_documents(chunks.iter().map(|c| c.tokens.as_slice()));

        Ok(Self {
            meta,
            chunks,
            positions,
            lexicon,
        })
    }

    pub fn meta(&self) -> &IndexMeta {
        &self.meta
    }

    pub fn department(&self) -> &str {
        &self.meta.department
    }

    pub fn len(&self) -> usize {
        self.chunks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }

    /// 청크 ID로 조회
    pub fn get(&self, id: &ChunkId) -> Option<&IndexedChunk> {
        self.positions.get(id).map(|&i| &self.chunks[i])
    }

    pub fn contains(&self, id: &ChunkId) -> bool {
        self.positions.contains_key(id)
    }

    /// BM25 통계
    pub fn lexicon(&self) -> &LexicalStats {
        &self.lexicon
    }

    /// 질의 벡터의 k-최근접 청크 (유사도 내림차순, 동점은 청크 ID 오름차순)
    pub fn nearest(&self, query: &[f32], k: usize) -> Result<Vec<ScoredChunk>, PipelineError> {
        if query.len() != self.meta.dimension {
            return Err(PipelineError::Embedding(anyhow!(
                "query vector has dimension {}, index '{}' expects {}",
                query.len(),
                self.meta.department,
                self.meta.dimension
            )));
        }

        let metric = self.meta.metric;
        let mut scored: Vec<ScoredChunk> = self
            .chunks
            .iter()
            .map(|c| ScoredChunk {
                chunk_id: c.entry.chunk_id,
                score: metric.score(query, &c.entry.embedding),
            })
            .collect();

        scored.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.chunk_id.cmp(&b.chunk_id))
        });
        scored.truncate(k);

        Ok(scored)
    }
}

// ============================================================================
// IndexRegistry
// ============================================================================

/// 부서 -> 인덱스 스냅샷 레지스트리
///
/// 쓰기 잠금은 포인터 교체 동안에만 잡힙니다.
#[derive(Debug, Default)]
pub struct IndexRegistry {
    indexes: RwLock<HashMap<String, Arc<DepartmentIndex>>>,
}

impl IndexRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// 현재 스냅샷 조회
    pub fn get(&self, department: &str) -> Option<Arc<DepartmentIndex>> {
        let guard = self.indexes.read().unwrap_or_else(|e| e.into_inner());
        guard.get(department).cloned()
    }

    /// 새 스냅샷으로 교체 (이전 스냅샷 반환)
    pub fn swap(&self, index: DepartmentIndex) -> Option<Arc<DepartmentIndex>> {
        let department = index.department().to_string();
        let mut guard = self.indexes.write().unwrap_or_else(|e| e.into_inner());
        guard.insert(department, Arc::new(index))
    }

    /// 스냅샷 제거
    pub fn remove(&self, department: &str) -> Option<Arc<DepartmentIndex>> {
        let mut guard = self.indexes.write().unwrap_or_else(|e| e.into_inner());
        guard.remove(department)
    }

    /// 인덱스가 있는 부서 목록 (정렬됨)
    pub fn departments(&self) -> Vec<String> {
        let guard = self.indexes.read().unwrap_or_else(|e| e.into_inner());
        let mut names: Vec<String> = guard.keys().cloned().collect();
        names.sort();
        names
    }
}

// ============================================================================
// EmbeddingStore
// ============================================================================

/// 빌드 결과 (관리자 화면에 보고)
#[derive(Debug, Clone, Serialize)]
pub struct IndexHandle {
    pub department: String,
    pub build_id: String,
    pub chunk_count: usize,
    pub dimension: usize,
    pub embedding_model: String,
    pub fingerprint: String,
    pub built_at: DateTime<Utc>,
}

impl From<&IndexMeta> for IndexHandle {
    fn from(meta: &IndexMeta) -> Self {
        Self {
            department: meta.department.clone(),
            build_id: meta.build_id.clone(),
            chunk_count: meta.chunk_count,
            dimension: meta.dimension,
            embedding_model: meta.embedding_model.clone(),
            fingerprint: meta.fingerprint.clone(),
            built_at: meta.built_at,
        }
    }
}

/// 부서별 임베딩 저장소
///
/// 같은 부서의 빌드/제거는 부서별 잠금으로 직렬화되어, 영속화 순서와
/// 레지스트리 교체 순서가 항상 같습니다. 질의는 잠금을 잡지 않습니다.
pub struct EmbeddingStore {
    embedder: Arc<dyn EmbeddingProvider>,
    registry: IndexRegistry,
    persistence: Option<Arc<dyn IndexPersistence>>,
    metric: SimilarityMetric,
    build_locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl EmbeddingStore {
    /// 메모리 전용 저장소
    pub fn new(embedder: Arc<dyn EmbeddingProvider>) -> Self {
        Self {
            embedder,
            registry: IndexRegistry::new(),
            persistence: None,
            metric: SimilarityMetric::Cosine,
            build_locks: Mutex::new(HashMap::new()),
        }
    }

    /// 영속화 백엔드 연결
    pub fn with_persistence(mut self, persistence: Arc<dyn IndexPersistence>) -> Self {
        self.persistence = Some(persistence);
        self
    }

    pub fn embedder(&self) -> &Arc<dyn EmbeddingProvider> {
        &self.embedder
    }

    pub fn metric(&self) -> SimilarityMetric {
        self.metric
    }

    fn build_lock(&self, department: &str) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = self.build_locks.lock().unwrap_or_else(|e| e.into_inner());
        Arc::clone(locks.entry(department.to_string()).or_default())
    }

    /// 현재 인덱스가 이 청크들로, 현재 모델로 빌드되었는지
    pub fn is_current(&self, department: &str, chunks: &[Chunk]) -> bool {
        self.registry
            .get(department)
            .is_some_and(|index| index.meta().fingerprint == fingerprint(self.embedder.name(), chunks))
    }

    /// 부서 인덱스 빌드 (copy-then-swap)
    ///
    /// 1. 모든 청크 임베딩
    /// 2. 새 스냅샷 생성
    /// 3. 영속화 (설정된 경우)
    /// 4. 레지스트리 포인터 교체
    ///
    /// 어느 단계에서 실패해도 이전 인덱스는 그대로 질의 가능합니다.
    pub async fn build(&self, department: &str, chunks: &[Chunk]) -> Result<IndexHandle, PipelineError> {
        if chunks.is_empty() {
            return Err(PipelineError::validation(format!(
                "no chunks to index for department '{}'",
                department
            )));
        }

        // 임베딩 -> 저장 -> 교체 전체를 부서 단위로 직렬화
        let lock = self.build_lock(department);
        let _guard = lock.lock().await;

        let texts: Vec<String> = chunks.iter().map(|c| c.text.clone()).collect();
        let vectors = self
            .embedder
            .embed_batch(&texts)
            .await
            .map_err(PipelineError::Embedding)?;

        if vectors.len() != chunks.len() {
            return Err(PipelineError::Embedding(anyhow!(
                "embedder returned {} vectors for {} chunks",
                vectors.len(),
                chunks.len()
            )));
        }

        let entries: Vec<VectorEntry> = chunks
            .iter()
            .zip(vectors)
            .map(|(chunk, vector)| VectorEntry::from_chunk(chunk, vector))
            .collect();

        let meta = IndexMeta {
            department: department.to_string(),
            build_id: uuid::Uuid::new_v4().simple().to_string(),
            embedding_model: self.embedder.name().to_string(),
            dimension: self.embedder.dimension(),
            metric: self.metric,
            chunk_count: entries.len(),
            fingerprint: fingerprint(self.embedder.name(), chunks),
            built_at: Utc::now(),
        };

        let index = DepartmentIndex::new(meta.clone(), entries)?;

        if let Some(persistence) = &self.persistence {
            let entries: Vec<VectorEntry> = index.chunks.iter().map(|c| c.entry.clone()).collect();
            persistence
                .save(&meta, &entries)
                .await
                .map_err(PipelineError::Storage)?;
        }

        let previous = self.registry.swap(index);
        tracing::info!(
            "Built index for {} ({} chunks, model {}, replaced: {})",
            department,
            meta.chunk_count,
            meta.embedding_model,
            previous.is_some()
        );

        Ok(IndexHandle::from(&meta))
    }

    /// k-최근접 질의
    ///
    /// 인덱스가 없으면 빈 성공이 아니라 `IndexAbsent`를 반환합니다.
    pub fn query(&self, department: &str, vector: &[f32], k: usize) -> Result<Vec<ScoredChunk>, PipelineError> {
        self.snapshot(department)?.nearest(vector, k)
    }

    /// 현재 스냅샷 (없으면 `IndexAbsent`)
    pub fn snapshot(&self, department: &str) -> Result<Arc<DepartmentIndex>, PipelineError> {
        self.registry
            .get(department)
            .ok_or_else(|| PipelineError::IndexAbsent {
                department: department.to_string(),
            })
    }

    /// 부서 인덱스 제거
    pub async fn remove(&self, department: &str) -> Result<bool, PipelineError> {
        let lock = self.build_lock(department);
        let _guard = lock.lock().await;

        if let Some(persistence) = &self.persistence {
            persistence
                .remove(department)
                .await
                .map_err(PipelineError::Storage)?;
        }
        let removed = self.registry.remove(department).is_some();
        if removed {
            tracing::info!("Removed index for {}", department);
        }
        Ok(removed)
    }

    /// 영속화된 인덱스 복원
    ///
    /// 현재 임베딩 모델/차원과 다른 인덱스는 섞이지 않도록 건너뜁니다.
    pub async fn restore(&self) -> Result<usize, PipelineError> {
        let Some(persistence) = &self.persistence else {
            return Ok(0);
        };

        let loaded = persistence.load_all().await.map_err(PipelineError::Storage)?;
        let mut restored = 0;

        for (meta, entries) in loaded {
            if meta.embedding_model != self.embedder.name()
                || meta.dimension != self.embedder.dimension()
            {
                tracing::warn!(
                    "Skipping stale index for {} (built with {}/{}d, current {}/{}d); rebuild required",
                    meta.department,
                    meta.embedding_model,
                    meta.dimension,
                    self.embedder.name(),
                    self.embedder.dimension()
                );
                continue;
            }

            let department = meta.department.clone();
            match DepartmentIndex::new(meta, entries) {
                Ok(index) => {
                    self.registry.swap(index);
                    restored += 1;
                }
                Err(e) => tracing::warn!("Skipping corrupt index for {}: {}", department, e),
            }
        }

        tracing::info!("Restored {} department index(es)", restored);
        Ok(restored)
    }

    /// 인덱스가 있는 부서 목록
    pub fn departments(&self) -> Vec<String> {
        self.registry.departments()
    }
}

/// 모델 + 청크 ID/텍스트 해시
fn fingerprint(model: &str, chunks: &[Chunk]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(model.as_bytes());
    for chunk in chunks {
        hasher.update(chunk.id.to_string().as_bytes());
        hasher.update([0u8]);
        hasher.update(chunk.text.as_bytes());
        hasher.update([0u8]);
    }
    format!("{:x}", hasher.finalize())
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::HashEmbedding;
    use crate::knowledge::{Chunker, LanceVectorStore, OverlapChunker};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::time::Duration;
    use tempfile::TempDir;

    /// 스위치로 실패시킬 수 있는 임베딩
    struct SwitchableEmbedding {
        inner: HashEmbedding,
        failing: AtomicBool,
    }

    #[async_trait]
    impl EmbeddingProvider for SwitchableEmbedding {
        async fn embed(&self, text: &str) -> anyhow::Result<Vec<f32>> {
            if self.failing.load(Ordering::SeqCst) {
                anyhow::bail!("embedding service unreachable");
            }
            self.inner.embed(text).await
        }

        fn dimension(&self) -> usize {
            self.inner.dimension()
        }

        fn name(&self) -> &str {
            self.inner.name()
        }
    }

    /// 저장 순서를 기록하고, 저장 구간이 겹치는지 감시하는 영속화
    #[derive(Default)]
    struct RecordingPersistence {
        failing: AtomicBool,
        active: AtomicUsize,
        overlapped: AtomicBool,
        saved: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl IndexPersistence for RecordingPersistence {
        async fn save(&self, meta: &IndexMeta, _entries: &[VectorEntry]) -> anyhow::Result<()> {
            if self.active.fetch_add(1, Ordering::SeqCst) > 0 {
                self.overlapped.store(true, Ordering::SeqCst);
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
            self.active.fetch_sub(1, Ordering::SeqCst);

            if self.failing.load(Ordering::SeqCst) {
                anyhow::bail!("disk full");
            }
            self.saved.lock().unwrap().push(meta.build_id.clone());
            Ok(())
        }

        async fn load_all(&self) -> anyhow::Result<Vec<(IndexMeta, Vec<VectorEntry>)>> {
            Ok(Vec::new())
        }

        async fn remove(&self, _department: &str) -> anyhow::Result<bool> {
            Ok(false)
        }
    }

    fn remote_work_chunks() -> Vec<Chunk> {
        OverlapChunker::with_defaults()
            .chunk(9, "new.pdf", "Remote work policy")
            .unwrap()
    }

    fn hr_chunks() -> Vec<Chunk> {
        let chunker = OverlapChunker::with_defaults();
        let mut chunks = chunker
            .chunk(1, "leave.pdf", "Annual Leave: 21 days per year for all employees.")
            .unwrap();
        chunks.extend(
            chunker
                .chunk(2, "salary.pdf", "Salary is credited on the last working day.")
                .unwrap(),
        );
        chunks.extend(
            chunker
                .chunk(3, "benefits.pdf", "Health insurance benefits cover dependents.")
                .unwrap(),
        );
        chunks
    }

    fn store() -> EmbeddingStore {
        EmbeddingStore::new(Arc::new(HashEmbedding::new(512)))
    }

    #[tokio::test]
    async fn test_query_without_index_is_absent() {
        let store = store();
        let result = store.query("HR", &vec![0.0; 512], 3);
        assert!(matches!(result, Err(PipelineError::IndexAbsent { .. })));
    }

    #[tokio::test]
    async fn test_build_and_query() {
        let store = store();
        let handle = store.build("HR", &hr_chunks()).await.unwrap();
        assert_eq!(handle.chunk_count, 3);
        assert_eq!(handle.embedding_model, "hash-embedding-v1");

        let query = store.embedder().embed_query("annual leave days").await.unwrap();
        let results = store.query("HR", &query, 2).unwrap();
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].chunk_id, ChunkId::new(1, 0));

        let index = store.snapshot("HR").unwrap();
        assert!(results.iter().all(|r| index.contains(&r.chunk_id)));
    }

    #[tokio::test]
    async fn test_build_empty_is_validation_error() {
        let store = store();
        let result = store.build("HR", &[]).await;
        assert!(matches!(result, Err(PipelineError::Validation(_))));
    }

    #[tokio::test]
    async fn test_rebuild_is_idempotent() {
        let store = store();
        let chunks = hr_chunks();
        let query = store.embedder().embed_query("health insurance").await.unwrap();

        let first = store.build("HR", &chunks).await.unwrap();
        let top_first = store.query("HR", &query, 3).unwrap();

        let second = store.build("HR", &chunks).await.unwrap();
        let top_second = store.query("HR", &query, 3).unwrap();

        assert_eq!(first.fingerprint, second.fingerprint);
        assert_ne!(first.build_id, second.build_id);
        assert_eq!(top_first, top_second);
    }

    #[tokio::test]
    async fn test_old_snapshot_survives_swap() {
        let store = store();
        store.build("HR", &hr_chunks()).await.unwrap();
        let held = store.snapshot("HR").unwrap();

        let chunker = OverlapChunker::with_defaults();
        let replacement = chunker.chunk(9, "new.pdf", "Remote work policy").unwrap();
        store.build("HR", &replacement).await.unwrap();

        assert_eq!(held.len(), 3);
        assert_eq!(store.snapshot("HR").unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_failed_embedding_keeps_previous_index() {
        let embedder = Arc::new(SwitchableEmbedding {
            inner: HashEmbedding::new(512),
            failing: AtomicBool::new(false),
        });
        let store = EmbeddingStore::new(Arc::clone(&embedder) as Arc<dyn EmbeddingProvider>);
        let first = store.build("HR", &hr_chunks()).await.unwrap();

        embedder.failing.store(true, Ordering::SeqCst);
        let result = store.build("HR", &remote_work_chunks()).await;
        assert!(matches!(result, Err(PipelineError::Embedding(_))));

        let current = store.snapshot("HR").unwrap();
        assert_eq!(current.meta().build_id, first.build_id);
        assert_eq!(current.len(), 3);
    }

    #[tokio::test]
    async fn test_failed_persist_keeps_previous_index() {
        let persistence = Arc::new(RecordingPersistence::default());
        let store = store().with_persistence(Arc::clone(&persistence) as Arc<dyn IndexPersistence>);
        let first = store.build("HR", &hr_chunks()).await.unwrap();

        persistence.failing.store(true, Ordering::SeqCst);
        let result = store.build("HR", &remote_work_chunks()).await;
        assert!(matches!(result, Err(PipelineError::Storage(_))));

        let current = store.snapshot("HR").unwrap();
        assert_eq!(current.meta().build_id, first.build_id);
        assert_eq!(current.len(), 3);
    }

    #[tokio::test]
    async fn test_concurrent_builds_are_serialized() {
        let persistence = Arc::new(RecordingPersistence::default());
        let store = store().with_persistence(Arc::clone(&persistence) as Arc<dyn IndexPersistence>);
        let (hr, remote) = (hr_chunks(), remote_work_chunks());

        let (a, b) = tokio::join!(store.build("HR", &hr), store.build("HR", &remote));
        let (a, b) = (a.unwrap(), b.unwrap());

        assert!(!persistence.overlapped.load(Ordering::SeqCst));
        let saved = persistence.saved.lock().unwrap().clone();
        assert_eq!(saved.len(), 2);

        // 메모리에 올라간 빌드 = 마지막으로 저장된 빌드
        let served = store.snapshot("HR").unwrap().meta().build_id.clone();
        assert_eq!(saved.last(), Some(&served));
        assert!(served == a.build_id || served == b.build_id);
    }

    #[tokio::test]
    async fn test_is_current_tracks_fingerprint() {
        let store = store();
        assert!(!store.is_current("HR", &hr_chunks()));

        store.build("HR", &hr_chunks()).await.unwrap();
        assert!(store.is_current("HR", &hr_chunks()));

        let mut grown = hr_chunks();
        grown.extend(remote_work_chunks());
        assert!(!store.is_current("HR", &grown));
    }

    #[tokio::test]
    async fn test_query_dimension_mismatch() {
        let store = store();
        store.build("HR", &hr_chunks()).await.unwrap();
        let result = store.query("HR", &[1.0, 0.0], 3);
        assert!(matches!(result, Err(PipelineError::Embedding(_))));
    }

    #[tokio::test]
    async fn test_remove_index() {
        let store = store();
        store.build("HR", &hr_chunks()).await.unwrap();
        assert!(store.remove("HR").await.unwrap());
        assert!(matches!(
            store.snapshot("HR"),
            Err(PipelineError::IndexAbsent { .. })
        ));
    }

    #[tokio::test]
    async fn test_restore_from_lance_and_skip_stale_model() {
        let temp_dir = TempDir::new().unwrap();
        let lance: Arc<dyn IndexPersistence> =
            Arc::new(LanceVectorStore::open(temp_dir.path()).await.unwrap());

        let writer = EmbeddingStore::new(Arc::new(HashEmbedding::new(64)))
            .with_persistence(Arc::clone(&lance));
        writer.build("HR", &hr_chunks()).await.unwrap();

        let same_model = EmbeddingStore::new(Arc::new(HashEmbedding::new(64)))
            .with_persistence(Arc::clone(&lance));
        assert_eq!(same_model.restore().await.unwrap(), 1);
        assert_eq!(same_model.snapshot("HR").unwrap().len(), 3);

        let other_dimension = EmbeddingStore::new(Arc::new(HashEmbedding::new(32)))
            .with_persistence(lance);
        assert_eq!(other_dimension.restore().await.unwrap(), 0);
        assert!(other_dimension.snapshot("HR").is_err());
    }
}
