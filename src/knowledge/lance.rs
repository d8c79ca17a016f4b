//! LanceDB Index Persistence - 부서 인덱스 영속화
//!
//! 빌드마다 새 테이블(`{부서}_{build_id}`)을 만들고, 테이블이 다 쓰인 뒤에
//! 매니페스트(indexes.json)를 원자적으로 교체합니다 (copy-then-swap).
//! 교체가 끝나면 이전 테이블을 삭제합니다.
//! ref: https://lancedb.github.io/lancedb/

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use arrow_array::{
    Array, FixedSizeListArray, Float32Array, Int32Array, Int64Array, RecordBatch,
    RecordBatchIterator, StringArray,
};
use arrow_schema::{DataType, Field, Schema};
use async_trait::async_trait;
use futures::TryStreamExt;
use lancedb::connection::Connection;
use lancedb::query::ExecutableQuery;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use super::chunker::ChunkId;
use super::vector::{IndexMeta, IndexPersistence, VectorEntry};

/// 매니페스트 파일 이름
const MANIFEST_FILE: &str = "indexes.json";
/// LanceDB 디렉토리 이름
const LANCE_DIR: &str = "vectors.lance";

// ============================================================================
// Manifest
// ============================================================================

/// 부서 -> 현재 테이블 매핑
#[derive(Debug, Default, Serialize, Deserialize)]
struct IndexManifest {
    departments: BTreeMap<String, ManifestEntry>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct ManifestEntry {
    table: String,
    meta: IndexMeta,
}

// ============================================================================
// LanceVectorStore
// ============================================================================

/// LanceDB 기반 부서 인덱스 저장소
pub struct LanceVectorStore {
    db: Connection,
    manifest_path: PathBuf,
    /// 매니페스트 읽기-수정-쓰기 직렬화
    manifest_lock: Mutex<()>,
}

impl LanceVectorStore {
    /// 데이터 디렉토리 안에서 열기
    ///
    /// # Arguments
    /// * `data_dir` - vectors.lance 와 indexes.json 이 위치할 디렉토리
    pub async fn open(data_dir: &Path) -> Result<Self> {
        if !data_dir.exists() {
            tokio::fs::create_dir_all(data_dir)
                .await
                .context("Failed to create LanceDB directory")?;
        }

        let lance_path = data_dir.join(LANCE_DIR);
        let path_str = lance_path
            .to_str()
            .ok_or_else(|| anyhow::anyhow!("Invalid path encoding"))?;

        let db = lancedb::connect(path_str)
            .execute()
            .await
            .context("Failed to connect to LanceDB")?;

        Ok(Self {
            db,
            manifest_path: data_dir.join(MANIFEST_FILE),
            manifest_lock: Mutex::new(()),
        })
    }

    /// 벡터 테이블 스키마 생성
    fn create_schema(dimension: i32) -> Schema {
        Schema::new(vec![
            Field::new("doc_id", DataType::Int64, false),
            Field::new("ordinal", DataType::Int32, false),
            Field::new("source", DataType::Utf8, false),
            Field::new("chunk_text", DataType::Utf8, false),
            Field::new("char_start", DataType::Int64, false),
            Field::new("char_end", DataType::Int64, false),
            Field::new(
                "embedding",
                DataType::FixedSizeList(
                    Arc::new(Field::new("item", DataType::Float32, true)),
                    dimension,
                ),
                false,
            ),
        ])
    }

    /// 엔트리들을 Arrow RecordBatch로 변환
    fn entries_to_batch(entries: &[VectorEntry], dimension: usize) -> Result<RecordBatch> {
        if entries.is_empty() {
            anyhow::bail!("Cannot create batch from empty entries");
        }
        if let Some(bad) = entries.iter().find(|e| e.embedding.len() != dimension) {
            anyhow::bail!(
                "Embedding for chunk {} has dimension {}, expected {}",
                bad.chunk_id,
                bad.embedding.len(),
                dimension
            );
        }

        let dimension = i32::try_from(dimension).context("Embedding dimension too large")?;

        let doc_ids: Vec<i64> = entries.iter().map(|e| e.chunk_id.document_id).collect();
        let ordinals: Vec<i32> = entries.iter().map(|e| e.chunk_id.ordinal as i32).collect();
        let sources: Vec<&str> = entries.iter().map(|e| e.source.as_str()).collect();
        let texts: Vec<&str> = entries.iter().map(|e| e.chunk_text.as_str()).collect();
        let starts: Vec<i64> = entries.iter().map(|e| e.char_start as i64).collect();
        let ends: Vec<i64> = entries.iter().map(|e| e.char_end as i64).collect();

        let embeddings_flat: Vec<f32> = entries
            .iter()
            .flat_map(|e| e.embedding.iter().copied())
            .collect();

        let values = Float32Array::from(embeddings_flat);
        let field = Arc::new(Field::new("item", DataType::Float32, true));
        let embeddings_list = FixedSizeListArray::try_new(
            field,
            dimension,
            Arc::new(values) as Arc<dyn Array>,
            None,
        )
        .context("Failed to create embedding array")?;

        let batch = RecordBatch::try_new(
            Arc::new(Self::create_schema(dimension)),
            vec![
                Arc::new(Int64Array::from(doc_ids)),
                Arc::new(Int32Array::from(ordinals)),
                Arc::new(StringArray::from(sources)),
                Arc::new(StringArray::from(texts)),
                Arc::new(Int64Array::from(starts)),
                Arc::new(Int64Array::from(ends)),
                Arc::new(embeddings_list),
            ],
        )
        .context("Failed to create RecordBatch")?;

        Ok(batch)
    }

    /// RecordBatch를 엔트리로 역변환
    fn batch_to_entries(batch: &RecordBatch) -> Result<Vec<VectorEntry>> {
        fn column<'a, T: 'static>(batch: &'a RecordBatch, name: &str) -> Result<&'a T> {
            batch
                .column_by_name(name)
                .and_then(|c| c.as_any().downcast_ref::<T>())
                .ok_or_else(|| anyhow::anyhow!("Missing {} column", name))
        }

        let doc_ids = column::<Int64Array>(batch, "doc_id")?;
        let ordinals = column::<Int32Array>(batch, "ordinal")?;
        let sources = column::<StringArray>(batch, "source")?;
        let texts = column::<StringArray>(batch, "chunk_text")?;
        let starts = column::<Int64Array>(batch, "char_start")?;
        let ends = column::<Int64Array>(batch, "char_end")?;
        let embeddings = column::<FixedSizeListArray>(batch, "embedding")?;

        let mut entries = Vec::with_capacity(batch.num_rows());
        for i in 0..batch.num_rows() {
            let row = embeddings.value(i);
            let floats = row
                .as_any()
                .downcast_ref::<Float32Array>()
                .ok_or_else(|| anyhow::anyhow!("Embedding column is not Float32"))?;

            entries.push(VectorEntry {
                chunk_id: ChunkId::new(doc_ids.value(i), ordinals.value(i) as u32),
                source: sources.value(i).to_string(),
                chunk_text: texts.value(i).to_string(),
                char_start: starts.value(i) as usize,
                char_end: ends.value(i) as usize,
                embedding: floats.values().to_vec(),
            });
        }

        Ok(entries)
    }

    async fn read_manifest(&self) -> Result<IndexManifest> {
        if !self.manifest_path.exists() {
            return Ok(IndexManifest::default());
        }
        let raw = tokio::fs::read_to_string(&self.manifest_path)
            .await
            .context("Failed to read index manifest")?;
        serde_json::from_str(&raw).context("Failed to parse index manifest")
    }

    /// 임시 파일에 쓰고 rename으로 교체
    async fn write_manifest(&self, manifest: &IndexManifest) -> Result<()> {
        let raw = serde_json::to_string_pretty(manifest)?;
        let tmp = self.manifest_path.with_extension("json.tmp");
        tokio::fs::write(&tmp, raw)
            .await
            .context("Failed to write index manifest")?;
        tokio::fs::rename(&tmp, &self.manifest_path)
            .await
            .context("Failed to swap index manifest")?;
        Ok(())
    }

    async fn drop_table_quietly(&self, table: &str) {
        if let Err(e) = self.db.drop_table(table).await {
            tracing::warn!("Failed to drop retired table {}: {}", table, e);
        }
    }

    async fn read_table(&self, table: &str) -> Result<Vec<VectorEntry>> {
        let table = self
            .db
            .open_table(table)
            .execute()
            .await
            .with_context(|| format!("Failed to open table {}", table))?;

        let batches: Vec<RecordBatch> = table
            .query()
            .execute()
            .await
            .context("Failed to scan table")?
            .try_collect()
            .await?;

        let mut entries = Vec::new();
        for batch in &batches {
            entries.extend(Self::batch_to_entries(batch)?);
        }
        entries.sort_by_key(|e| e.chunk_id);
        Ok(entries)
    }
}

#[async_trait]
impl IndexPersistence for LanceVectorStore {
    async fn save(&self, meta: &IndexMeta, entries: &[VectorEntry]) -> Result<()> {
        let batch = Self::entries_to_batch(entries, meta.dimension)?;
        let schema = batch.schema();
        let table = table_name(&meta.department, &meta.build_id);

        // 1. 새 테이블을 끝까지 쓴다
        let batches = RecordBatchIterator::new(vec![Ok(batch)], schema);
        self.db
            .create_table(&table, batches)
            .execute()
            .await
            .with_context(|| format!("Failed to create table {}", table))?;

        // 2. 매니페스트 교체
        let retired = {
            let _guard = self.manifest_lock.lock().await;
            let mut manifest = self.read_manifest().await?;
            let previous = manifest.departments.insert(
                meta.department.clone(),
                ManifestEntry {
                    table: table.clone(),
                    meta: meta.clone(),
                },
            );
            self.write_manifest(&manifest).await?;
            previous
        };

        // 3. 이전 테이블 정리
        if let Some(old) = retired {
            self.drop_table_quietly(&old.table).await;
        }

        tracing::info!(
            "Persisted index for {} ({} chunks, table {})",
            meta.department,
            entries.len(),
            table
        );
        Ok(())
    }

    async fn load_all(&self) -> Result<Vec<(IndexMeta, Vec<VectorEntry>)>> {
        let manifest = {
            let _guard = self.manifest_lock.lock().await;
            self.read_manifest().await?
        };

        let mut loaded = Vec::with_capacity(manifest.departments.len());
        for (department, entry) in manifest.departments {
            match self.read_table(&entry.table).await {
                Ok(entries) => loaded.push((entry.meta, entries)),
                Err(e) => {
                    tracing::warn!("Skipping index for {}: {:#}", department, e);
                }
            }
        }

        Ok(loaded)
    }

    async fn remove(&self, department: &str) -> Result<bool> {
        let removed = {
            let _guard = self.manifest_lock.lock().await;
            let mut manifest = self.read_manifest().await?;
            let removed = manifest.departments.remove(department);
            if removed.is_some() {
                self.write_manifest(&manifest).await?;
            }
            removed
        };

        match removed {
            Some(entry) => {
                self.drop_table_quietly(&entry.table).await;
                Ok(true)
            }
            None => Ok(false),
        }
    }
}

// ============================================================================
// Helper Functions
// ============================================================================

/// 부서 + 빌드 ID로 테이블 이름 생성 (영숫자와 `_`만 사용)
fn table_name(department: &str, build_id: &str) -> String {
    let slug: String = department
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c.to_ascii_lowercase() } else { '_' })
        .collect();
    let build: String = build_id.chars().filter(|c| c.is_ascii_alphanumeric()).collect();
    format!("{}_{}", slug, build)
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::knowledge::SimilarityMetric;
    use chrono::Utc;
    use tempfile::TempDir;

    const DIM: usize = 8;

    fn entry(doc_id: i64, ordinal: u32, text: &str) -> VectorEntry {
        VectorEntry {
            chunk_id: ChunkId::new(doc_id, ordinal),
            source: format!("doc{}.pdf", doc_id),
            chunk_text: text.to_string(),
            char_start: 0,
            char_end: text.chars().count(),
            embedding: vec![0.1 * (ordinal as f32 + 1.0); DIM],
        }
    }

    fn meta(department: &str, build_id: &str, count: usize) -> IndexMeta {
        IndexMeta {
            department: department.to_string(),
            build_id: build_id.to_string(),
            embedding_model: "hash-embedding-v1".to_string(),
            dimension: DIM,
            metric: SimilarityMetric::Cosine,
            chunk_count: count,
            fingerprint: "abc".to_string(),
            built_at: Utc::now(),
        }
    }

    #[test]
    fn test_table_name_sanitized() {
        assert_eq!(table_name("Customer Support", "1a-2b"), "customer_support_1a2b");
        assert_eq!(table_name("HR", "x"), "hr_x");
    }

    #[tokio::test]
    async fn test_save_and_load_roundtrip() {
        let temp_dir = TempDir::new().unwrap();
        let store = LanceVectorStore::open(temp_dir.path()).await.unwrap();

        let entries = vec![entry(1, 0, "Annual Leave: 21 days"), entry(1, 1, "Sick leave")];
        store.save(&meta("HR", "b1", 2), &entries).await.unwrap();

        let loaded = store.load_all().await.unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].0.department, "HR");
        assert_eq!(loaded[0].1, entries);
    }

    #[tokio::test]
    async fn test_rebuild_replaces_previous_table() {
        let temp_dir = TempDir::new().unwrap();
        let store = LanceVectorStore::open(temp_dir.path()).await.unwrap();

        store.save(&meta("HR", "b1", 1), &[entry(1, 0, "old")]).await.unwrap();
        store.save(&meta("HR", "b2", 1), &[entry(2, 0, "new")]).await.unwrap();

        let loaded = store.load_all().await.unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].0.build_id, "b2");
        assert_eq!(loaded[0].1[0].chunk_text, "new");
    }

    #[tokio::test]
    async fn test_remove_department() {
        let temp_dir = TempDir::new().unwrap();
        let store = LanceVectorStore::open(temp_dir.path()).await.unwrap();

        store.save(&meta("IT", "b1", 1), &[entry(3, 0, "vpn")]).await.unwrap();
        assert!(store.remove("IT").await.unwrap());
        assert!(!store.remove("IT").await.unwrap());
        assert!(store.load_all().await.unwrap().is_empty());
    }

    #[test]
    fn test_dimension_mismatch_rejected() {
        let mut bad = entry(1, 0, "x");
        bad.embedding.pop();
        assert!(LanceVectorStore::entries_to_batch(&[bad], DIM).is_err());
    }
}
