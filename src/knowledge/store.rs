//! Document Store - rusqlite 기반 부서별 업로드 저장소
//!
//! 관리자가 업로드한 원문 텍스트를 부서별로 보관합니다.
//! 부서 인덱스는 항상 이 저장소의 내용으로부터 통째로 재빌드됩니다.
//! 저장 위치: ~/.deptmind/documents.db

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OpenFlags, OptionalExtension, Row};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

// ============================================================================
// Data Directory
// ============================================================================

/// 데이터 디렉토리 경로 (~/.deptmind/)
pub fn get_data_dir() -> PathBuf {
    dirs::data_local_dir()
        .or_else(dirs::home_dir)
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".deptmind")
}

// ============================================================================
// Types
// ============================================================================

/// 저장된 문서 엔트리 (인덱싱 후 불변)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Document {
    pub id: i64,
    pub department: String,
    /// 출처 식별자 (파일명 등)
    pub source: String,
    pub content: String,
    /// 내용 SHA-256 (재업로드 변경 감지용)
    pub content_hash: String,
    pub created_at: DateTime<Utc>,
}

/// 새 문서 입력용 구조체
#[derive(Debug, Clone)]
pub struct NewDocument {
    pub department: String,
    pub source: String,
    pub content: String,
}

/// 문서 저장 결과
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddOutcome {
    /// 새로 저장되었거나 내용이 바뀌어 교체됨
    Stored(i64),
    /// 같은 출처에 같은 내용이 이미 있음
    Unchanged(i64),
}

impl AddOutcome {
    pub fn id(&self) -> i64 {
        match self {
            Self::Stored(id) | Self::Unchanged(id) => *id,
        }
    }
}

/// 저장소 통계
#[derive(Debug, Clone, Serialize)]
pub struct StoreStats {
    pub document_count: usize,
    pub department_count: usize,
    pub total_content_bytes: usize,
    pub db_path: PathBuf,
}

// ============================================================================
// DocumentStore
// ============================================================================

/// 부서별 문서 저장소 (동기)
pub struct DocumentStore {
    conn: Arc<Mutex<Connection>>,
    db_path: PathBuf,
}

const SELECT_COLUMNS: &str = "SELECT id, department, source, content, content_hash, created_at FROM documents";

impl DocumentStore {
    /// 저장소 열기 (없으면 생성)
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.exists() {
                std::fs::create_dir_all(parent)
                    .context("Failed to create database directory")?;
            }
        }

        let conn = Connection::open_with_flags(
            path,
            OpenFlags::SQLITE_OPEN_READ_WRITE
                | OpenFlags::SQLITE_OPEN_CREATE
                | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )
        .context("Failed to open SQLite database")?;

        let store = Self {
            conn: Arc::new(Mutex::new(conn)),
            db_path: path.to_path_buf(),
        };

        store.initialize()?;
        Ok(store)
    }

    /// 데이터 디렉토리 안에서 열기
    pub fn open_in(data_dir: &Path) -> Result<Self> {
        Self::open(&data_dir.join("documents.db"))
    }

    /// DB 경로 반환
    pub fn db_path(&self) -> &Path {
        &self.db_path
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|e| anyhow::anyhow!("Lock error: {}", e))
    }

    /// 스키마 초기화
    fn initialize(&self) -> Result<()> {
        let conn = self.lock()?;

        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS documents (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                department TEXT NOT NULL,
                source TEXT NOT NULL,
                content TEXT NOT NULL,
                content_hash TEXT NOT NULL,
                created_at TEXT NOT NULL,
                UNIQUE(department, source)
            );
            CREATE INDEX IF NOT EXISTS idx_documents_department ON documents(department);",
        )
        .context("Failed to create documents table")?;

        tracing::debug!("Document store initialized at {:?}", self.db_path);
        Ok(())
    }

    /// 문서 저장 (같은 부서/출처가 있으면 교체)
    ///
    /// 내용 해시가 같으면 아무것도 바꾸지 않고 `Unchanged`를 반환합니다.
    pub fn add_document(&self, doc: NewDocument) -> Result<AddOutcome> {
        let hash = content_hash(&doc.content);

        if let Some(existing) = self.find_by_source(&doc.department, &doc.source)? {
            if existing.content_hash == hash {
                tracing::info!(
                    "Document unchanged: {}/{} (id={})",
                    doc.department,
                    doc.source,
                    existing.id
                );
                return Ok(AddOutcome::Unchanged(existing.id));
            }
        }

        let conn = self.lock()?;
        conn.execute(
            "INSERT OR REPLACE INTO documents (department, source, content, content_hash, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![doc.department, doc.source, doc.content, hash, Utc::now().to_rfc3339()],
        )
        .context("Failed to insert document")?;

        let id = conn.last_insert_rowid();
        tracing::info!("Stored document: {}/{} (id={})", doc.department, doc.source, id);

        Ok(AddOutcome::Stored(id))
    }

    /// ID로 문서 조회
    pub fn get_document(&self, id: i64) -> Result<Option<Document>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(&format!("{} WHERE id = ?1", SELECT_COLUMNS))?;
        let doc = stmt.query_row(params![id], row_to_document).optional()?;
        Ok(doc)
    }

    /// 부서 + 출처로 문서 조회
    pub fn find_by_source(&self, department: &str, source: &str) -> Result<Option<Document>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(&format!(
            "{} WHERE department = ?1 AND source = ?2",
            SELECT_COLUMNS
        ))?;
        let doc = stmt
            .query_row(params![department, source], row_to_document)
            .optional()?;
        Ok(doc)
    }

    /// 문서 목록 조회 (부서 필터 선택)
    ///
    /// 부서 필터가 있으면 인덱스 빌드 순서가 결정적이도록 id 오름차순으로 반환합니다.
    pub fn list_documents(&self, department: Option<&str>) -> Result<Vec<Document>> {
        let conn = self.lock()?;

        let docs = if let Some(dept) = department {
            let mut stmt = conn.prepare(&format!(
                "{} WHERE department = ?1 ORDER BY id ASC",
                SELECT_COLUMNS
            ))?;
            let rows = stmt.query_map(params![dept], row_to_document)?;
            rows.collect::<rusqlite::Result<Vec<_>>>()?
        } else {
            let mut stmt = conn.prepare(&format!(
                "{} ORDER BY department ASC, id ASC",
                SELECT_COLUMNS
            ))?;
            let rows = stmt.query_map([], row_to_document)?;
            rows.collect::<rusqlite::Result<Vec<_>>>()?
        };

        Ok(docs)
    }

    /// 문서가 하나 이상 있는 부서 목록
    pub fn departments_with_documents(&self) -> Result<Vec<String>> {
        let conn = self.lock()?;
        let mut stmt =
            conn.prepare("SELECT DISTINCT department FROM documents ORDER BY department")?;
        let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    /// 문서 삭제
    pub fn delete_document(&self, id: i64) -> Result<bool> {
        let conn = self.lock()?;
        let rows = conn.execute("DELETE FROM documents WHERE id = ?1", params![id])?;
        Ok(rows > 0)
    }

    /// 저장소 통계
    pub fn stats(&self) -> Result<StoreStats> {
        let conn = self.lock()?;

        let (count, departments, total_size): (i64, i64, i64) = conn.query_row(
            "SELECT COUNT(*), COUNT(DISTINCT department), COALESCE(SUM(LENGTH(content)), 0)
             FROM documents",
            [],
            |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
        )?;

        Ok(StoreStats {
            document_count: count as usize,
            department_count: departments as usize,
            total_content_bytes: total_size as usize,
            db_path: self.db_path.clone(),
        })
    }
}

// ============================================================================
// Helper Functions
// ============================================================================

fn row_to_document(row: &Row<'_>) -> rusqlite::Result<Document> {
    Ok(Document {
        id: row.get(0)?,
        department: row.get(1)?,
        source: row.get(2)?,
        content: row.get(3)?,
        content_hash: row.get(4)?,
        created_at: parse_datetime(row.get::<_, String>(5)?),
    })
}

/// RFC3339 문자열을 DateTime<Utc>로 파싱
fn parse_datetime(s: String) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(&s)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}

/// 내용 SHA-256 (hex)
pub fn content_hash(content: &str) -> String {
    format!("{:x}", Sha256::digest(content.as_bytes()))
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn create_test_store() -> (TempDir, DocumentStore) {
        let dir = TempDir::new().unwrap();
        let store = DocumentStore::open_in(dir.path()).unwrap();
        (dir, store)
    }

    fn new_doc(department: &str, source: &str, content: &str) -> NewDocument {
        NewDocument {
            department: department.to_string(),
            source: source.to_string(),
            content: content.to_string(),
        }
    }

    #[test]
    fn test_add_and_get_document() {
        let (_dir, store) = create_test_store();

        let outcome = store
            .add_document(new_doc("HR", "leave.pdf", "Annual Leave: 21 days"))
            .unwrap();
        assert!(matches!(outcome, AddOutcome::Stored(_)));

        let doc = store.get_document(outcome.id()).unwrap().unwrap();
        assert_eq!(doc.department, "HR");
        assert_eq!(doc.source, "leave.pdf");
        assert_eq!(doc.content_hash, content_hash("Annual Leave: 21 days"));
    }

    #[test]
    fn test_readd_unchanged_and_changed() {
        let (_dir, store) = create_test_store();

        let first = store.add_document(new_doc("HR", "leave.pdf", "v1")).unwrap();
        let same = store.add_document(new_doc("HR", "leave.pdf", "v1")).unwrap();
        assert_eq!(same, AddOutcome::Unchanged(first.id()));

        let changed = store.add_document(new_doc("HR", "leave.pdf", "v2")).unwrap();
        assert!(matches!(changed, AddOutcome::Stored(_)));
        assert_eq!(store.list_documents(Some("HR")).unwrap().len(), 1);
    }

    #[test]
    fn test_list_and_departments() {
        let (_dir, store) = create_test_store();

        store.add_document(new_doc("HR", "a.pdf", "leave")).unwrap();
        store.add_document(new_doc("HR", "b.pdf", "salary")).unwrap();
        store.add_document(new_doc("IT", "c.pdf", "network")).unwrap();

        assert_eq!(store.list_documents(None).unwrap().len(), 3);

        let hr = store.list_documents(Some("HR")).unwrap();
        assert_eq!(hr.len(), 2);
        assert!(hr[0].id < hr[1].id);

        assert_eq!(store.departments_with_documents().unwrap(), vec!["HR", "IT"]);
    }

    #[test]
    fn test_delete_document() {
        let (_dir, store) = create_test_store();

        let id = store.add_document(new_doc("IT", "vpn.pdf", "VPN setup")).unwrap().id();
        assert!(store.delete_document(id).unwrap());
        assert!(store.get_document(id).unwrap().is_none());
        assert!(!store.delete_document(id).unwrap());
    }

    #[test]
    fn test_unreadable_row_is_error_not_missing() {
        let (_dir, store) = create_test_store();

        let id = {
            let conn = store.lock().unwrap();
            conn.execute(
                "INSERT INTO documents (department, source, content, content_hash, created_at)
                 VALUES ('HR', 'broken.bin', X'00FF', 'h', '2024-01-01T00:00:00Z')",
                [],
            )
            .unwrap();
            conn.last_insert_rowid()
        };

        assert!(store.get_document(id).is_err());
        assert!(store.find_by_source("HR", "broken.bin").is_err());
        assert!(store.get_document(id + 100).unwrap().is_none());
        assert!(store.find_by_source("HR", "missing.pdf").unwrap().is_none());
    }

    #[test]
    fn test_stats() {
        let (_dir, store) = create_test_store();

        store.add_document(new_doc("HR", "x", "1234567890")).unwrap();
        store.add_document(new_doc("IT", "y", "12345")).unwrap();

        let stats = store.stats().unwrap();
        assert_eq!(stats.document_count, 2);
        assert_eq!(stats.department_count, 2);
        assert_eq!(stats.total_content_bytes, 15);
    }
}
