//! Department Indexer - 업로드 저장소 -> 청킹 -> 부서 인덱스
//!
//! 부서 문서가 바뀌면 해당 부서 인덱스를 통째로 다시 빌드합니다.

use std::sync::Arc;

use serde::Serialize;

use crate::error::PipelineError;

use super::chunker::{Chunk, Chunker};
use super::index::{EmbeddingStore, IndexHandle};
use super::store::{AddOutcome, DocumentStore, NewDocument};

/// 문서 추가 결과
#[derive(Debug, Clone, Serialize)]
pub struct IngestReport {
    pub document_id: i64,
    /// 같은 내용이 이미 있어 재빌드를 건너뜀
    pub unchanged: bool,
    pub index: Option<IndexHandle>,
}

/// 문서 삭제 결과
#[derive(Debug, Clone, Serialize)]
pub struct DeleteReport {
    pub department: String,
    /// 남은 문서로 재빌드된 인덱스 (남은 문서가 없으면 None, 인덱스 제거됨)
    pub index: Option<IndexHandle>,
}

/// 부서 인덱서
pub struct DepartmentIndexer {
    documents: DocumentStore,
    chunker: Box<dyn Chunker>,
    store: Arc<EmbeddingStore>,
}

impl DepartmentIndexer {
    pub fn new(documents: DocumentStore, chunker: Box<dyn Chunker>, store: Arc<EmbeddingStore>) -> Self {
        Self {
            documents,
            chunker,
            store,
        }
    }

    pub fn documents(&self) -> &DocumentStore {
        &self.documents
    }

    pub fn store(&self) -> &Arc<EmbeddingStore> {
        &self.store
    }

    /// 문서 저장 후 부서 인덱스 재빌드
    ///
    /// 내용이 바뀌지 않았고 현재 인덱스가 저장소 내용과 일치하면 재빌드하지 않습니다.
    /// 이전 빌드가 실패해 인덱스가 뒤처져 있으면 같은 파일 재업로드로도 재빌드됩니다.
    pub async fn ingest(&self, doc: NewDocument) -> Result<IngestReport, PipelineError> {
        if doc.content.trim().is_empty() {
            return Err(PipelineError::validation(format!(
                "document '{}' has no text",
                doc.source
            )));
        }

        let department = doc.department.clone();
        let outcome = self.documents.add_document(doc).map_err(PipelineError::Storage)?;

        let chunks = self.chunks_for(&department)?;

        if let AddOutcome::Unchanged(id) = outcome {
            if self.store.is_current(&department, &chunks) {
                tracing::info!("Document {} unchanged; index for {} kept", id, department);
                return Ok(IngestReport {
                    document_id: id,
                    unchanged: true,
                    index: None,
                });
            }
            tracing::warn!(
                "Document {} unchanged but index for {} is out of date; rebuilding",
                id,
                department
            );
        }

        let index = self.rebuild_from(&department, chunks).await?;
        Ok(IngestReport {
            document_id: outcome.id(),
            unchanged: matches!(outcome, AddOutcome::Unchanged(_)),
            index,
        })
    }

    /// 부서 인덱스 재빌드
    ///
    /// 부서에 문서가 없으면 기존 인덱스를 제거하고 `None`을 반환합니다.
    pub async fn rebuild(&self, department: &str) -> Result<Option<IndexHandle>, PipelineError> {
        let chunks = self.chunks_for(department)?;
        self.rebuild_from(department, chunks).await
    }

    async fn rebuild_from(
        &self,
        department: &str,
        chunks: Vec<Chunk>,
    ) -> Result<Option<IndexHandle>, PipelineError> {
        if chunks.is_empty() {
            self.store.remove(department).await?;
            return Ok(None);
        }

        self.store.build(department, &chunks).await.map(Some)
    }

    /// 문서가 있는 모든 부서 재빌드
    pub async fn rebuild_all(&self) -> Result<Vec<IndexHandle>, PipelineError> {
        let departments = self.documents.departments_with_documents().map_err(PipelineError::Storage)?;
        let mut handles = Vec::with_capacity(departments.len());
        for department in departments {
            if let Some(handle) = self.rebuild(&department).await? {
                handles.push(handle);
            }
        }
        Ok(handles)
    }

    /// 문서 삭제 후 부서 인덱스 갱신 (없는 ID면 None)
    pub async fn delete(&self, id: i64) -> Result<Option<DeleteReport>, PipelineError> {
        let Some(doc) = self.documents.get_document(id).map_err(PipelineError::Storage)? else {
            return Ok(None);
        };

        self.documents.delete_document(id).map_err(PipelineError::Storage)?;
        let index = self.rebuild(&doc.department).await?;

        Ok(Some(DeleteReport {
            department: doc.department,
            index,
        }))
    }

    fn chunks_for(&self, department: &str) -> Result<Vec<Chunk>, PipelineError> {
        let docs = self
            .documents
            .list_documents(Some(department))
            .map_err(PipelineError::Storage)?;

        let mut chunks = Vec::new();
        for doc in docs {
            if doc.content.trim().is_empty() {
                tracing::warn!("Skipping empty document {} ({})", doc.id, doc.source);
                continue;
            }
            chunks.extend(self.chunker.chunk(doc.id, &doc.source, &doc.content)?);
        }
        Ok(chunks)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::HashEmbedding;
    use crate::embedding::EmbeddingProvider;
    use crate::knowledge::default_chunker;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicBool, Ordering};
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

    fn indexer(temp_dir: &TempDir) -> DepartmentIndexer {
        let documents = DocumentStore::open_in(temp_dir.path()).unwrap();
        let store = Arc::new(EmbeddingStore::new(Arc::new(HashEmbedding::new(64))));
        DepartmentIndexer::new(documents, default_chunker(), store)
    }

    fn doc(department: &str, source: &str, content: &str) -> NewDocument {
        NewDocument {
            department: department.to_string(),
            source: source.to_string(),
            content: content.to_string(),
        }
    }

    #[tokio::test]
    async fn test_ingest_builds_index() {
        let temp_dir = TempDir::new().unwrap();
        let indexer = indexer(&temp_dir);

        let report = indexer
            .ingest(doc("HR", "leave.txt", "Annual Leave: 21 days"))
            .await
            .unwrap();
        assert!(!report.unchanged);
        assert_eq!(report.index.unwrap().chunk_count, 1);

        let second = indexer
            .ingest(doc("HR", "salary.txt", "Salary is paid monthly"))
            .await
            .unwrap();
        assert_eq!(second.index.unwrap().chunk_count, 2);
    }

    #[tokio::test]
    async fn test_ingest_unchanged_skips_rebuild() {
        let temp_dir = TempDir::new().unwrap();
        let indexer = indexer(&temp_dir);

        indexer.ingest(doc("HR", "leave.txt", "Annual Leave: 21 days")).await.unwrap();
        let build_id = indexer.store().snapshot("HR").unwrap().meta().build_id.clone();

        let report = indexer.ingest(doc("HR", "leave.txt", "Annual Leave: 21 days")).await.unwrap();
        assert!(report.unchanged);
        assert!(report.index.is_none());
        assert_eq!(indexer.store().snapshot("HR").unwrap().meta().build_id, build_id);
    }

    #[tokio::test]
    async fn test_reupload_after_failed_build_rebuilds() {
        let temp_dir = TempDir::new().unwrap();
        let embedder = Arc::new(SwitchableEmbedding {
            inner: HashEmbedding::new(64),
            failing: AtomicBool::new(false),
        });
        let store = Arc::new(EmbeddingStore::new(
            Arc::clone(&embedder) as Arc<dyn EmbeddingProvider>
        ));
        let documents = DocumentStore::open_in(temp_dir.path()).unwrap();
        let indexer = DepartmentIndexer::new(documents, default_chunker(), store);

        indexer.ingest(doc("HR", "leave.txt", "Annual Leave: 21 days")).await.unwrap();

        embedder.failing.store(true, Ordering::SeqCst);
        let failed = indexer.ingest(doc("HR", "salary.txt", "Salary is paid monthly")).await;
        assert!(matches!(failed, Err(PipelineError::Embedding(_))));
        assert_eq!(indexer.store().snapshot("HR").unwrap().len(), 1);
        assert_eq!(indexer.documents().list_documents(Some("HR")).unwrap().len(), 2);

        embedder.failing.store(false, Ordering::SeqCst);
        let retried = indexer
            .ingest(doc("HR", "salary.txt", "Salary is paid monthly"))
            .await
            .unwrap();
        assert!(retried.unchanged);
        assert_eq!(retried.index.unwrap().chunk_count, 2);
        assert_eq!(indexer.store().snapshot("HR").unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_ingest_empty_text_is_rejected() {
        let temp_dir = TempDir::new().unwrap();
        let indexer = indexer(&temp_dir);
        let result = indexer.ingest(doc("HR", "blank.txt", "   ")).await;
        assert!(matches!(result, Err(PipelineError::Validation(_))));
    }

    #[tokio::test]
    async fn test_delete_last_document_drops_index() {
        let temp_dir = TempDir::new().unwrap();
        let indexer = indexer(&temp_dir);

        let report = indexer.ingest(doc("IT", "vpn.txt", "VPN setup guide")).await.unwrap();
        let deleted = indexer.delete(report.document_id).await.unwrap().unwrap();

        assert_eq!(deleted.department, "IT");
        assert!(deleted.index.is_none());
        assert!(matches!(
            indexer.store().snapshot("IT"),
            Err(PipelineError::IndexAbsent { .. })
        ));
        assert!(indexer.delete(report.document_id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_rebuild_all() {
        let temp_dir = TempDir::new().unwrap();
        let indexer = indexer(&temp_dir);
        indexer.ingest(doc("HR", "a.txt", "leave policy")).await.unwrap();
        indexer.ingest(doc("Sales", "b.txt", "commission targets")).await.unwrap();

        let handles = indexer.rebuild_all().await.unwrap();
        let departments: Vec<&str> = handles.iter().map(|h| h.department.as_str()).collect();
        assert_eq!(departments, vec!["HR", "Sales"]);
    }
}
