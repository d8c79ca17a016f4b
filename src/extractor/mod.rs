//! 콘텐츠 추출 모듈
//!
//! 업로드 파일에서 부서 문서 텍스트를 추출합니다.
//! - 텍스트 파일 (.txt, .md 등): 직접 읽기
//! - PDF 파일: pdf-extract로 추출, 페이지는 빈 줄로 연결

pub mod pdf;

use std::path::Path;

use anyhow::{Context, Result};

/// 업로드 파일 종류
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocumentKind {
    Text,
    Pdf,
}

impl DocumentKind {
    /// 확장자로 판별 (모르는 확장자는 텍스트로 취급)
    pub fn from_path(path: &Path) -> Self {
        match path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_ascii_lowercase())
            .as_deref()
        {
            Some("pdf") => Self::Pdf,
            _ => Self::Text,
        }
    }
}

/// 추출된 문서
#[derive(Debug, Clone)]
pub struct ExtractedDocument {
    /// 출처 식별자 (파일 이름)
    pub source: String,
    pub text: String,
    pub kind: DocumentKind,
}

/// 파일에서 문서 텍스트 추출
pub async fn extract_document(path: &Path) -> Result<ExtractedDocument> {
    let kind = DocumentKind::from_path(path);
    let source = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string());

    let text = match kind {
        DocumentKind::Text => tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read text file: {:?}", path))?,
        DocumentKind::Pdf => {
            // CPU 바운드이므로 spawn_blocking
            let path = path.to_path_buf();
            tokio::task::spawn_blocking(move || pdf::extract_text(&path))
                .await
                .context("PDF extraction task failed")??
        }
    };

    tracing::debug!("Extracted {} chars from {}", text.chars().count(), source);

    Ok(ExtractedDocument { source, text, kind })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_kind_from_extension() {
        assert_eq!(DocumentKind::from_path(Path::new("handbook.PDF")), DocumentKind::Pdf);
        assert_eq!(DocumentKind::from_path(Path::new("policy.md")), DocumentKind::Text);
        assert_eq!(DocumentKind::from_path(Path::new("README")), DocumentKind::Text);
    }

    #[tokio::test]
    async fn test_extract_text_file() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("leave.txt");
        std::fs::write(&path, "Annual Leave: 21 days").unwrap();

        let doc = extract_document(&path).await.unwrap();
        assert_eq!(doc.source, "leave.txt");
        assert_eq!(doc.text, "Annual Leave: 21 days");
        assert_eq!(doc.kind, DocumentKind::Text);
    }
}
