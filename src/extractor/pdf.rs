//! PDF 텍스트 추출 모듈
//!
//! pdf-extract 크레이트로 텍스트를 뽑고 페이지 단위로 나눈 뒤
//! 빈 줄로 이어 붙여 하나의 업로드 문서로 만듭니다.

use std::path::Path;
use std::sync::OnceLock;

use anyhow::{Context, Result};
use regex::Regex;

/// 페이지 구분 (빈 줄)
pub const PAGE_SEPARATOR: &str = "\n\n";

/// PDF에서 페이지별 텍스트 추출
///
/// 빈 페이지는 제외합니다. 텍스트가 전혀 없으면 (스캔본 등) 빈 벡터를 반환합니다.
pub fn extract_pages(path: &Path) -> Result<Vec<String>> {
    let bytes = std::fs::read(path).with_context(|| format!("Failed to read PDF: {:?}", path))?;

    let text = pdf_extract::extract_text_from_mem(&bytes)
        .with_context(|| format!("Failed to extract text from PDF: {:?}", path))?;

    if text.trim().is_empty() {
        tracing::warn!(
            "No text extracted from PDF: {:?}. It might be a scanned document.",
            path
        );
        return Ok(Vec::new());
    }

    Ok(split_pages(&text))
}

/// PDF 전체 텍스트 (페이지를 빈 줄로 연결)
pub fn extract_text(path: &Path) -> Result<String> {
    Ok(join_pages(&extract_pages(path)?))
}

pub fn join_pages(pages: &[String]) -> String {
    pages.join(PAGE_SEPARATOR)
}

/// 텍스트를 페이지별로 분리
fn split_pages(text: &str) -> Vec<String> {
    // 폼피드 문자 (\x0c)
    let pages: Vec<String> = text
        .split('\x0c')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect();

    if pages.len() > 1 {
        return pages;
    }

    // "--- Page 1 ---" 형태의 구분자
    static PAGE_MARKER: OnceLock<Option<Regex>> = OnceLock::new();
    let marker = PAGE_MARKER.get_or_init(|| {
        Regex::new(r"(?m)^[\s]*[-=]+[\s]*(?:Page[\s]*)?(\d+)[\s]*[-=]+[\s]*$").ok()
    });

    if let Some(marker) = marker {
        let pages: Vec<String> = marker
            .split(text)
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();

        if pages.len() > 1 {
            return pages;
        }
    }

    vec![text.trim().to_string()]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_pages_with_formfeed() {
        let pages = split_pages("Leave policy\x0cSalary policy\x0c\x0cBenefits");
        assert_eq!(pages, vec!["Leave policy", "Salary policy", "Benefits"]);
    }

    #[test]
    fn test_split_pages_with_marker() {
        let text = "Intro\n--- Page 2 ---\nAnnual Leave: 21 days";
        let pages = split_pages(text);
        assert_eq!(pages, vec!["Intro", "Annual Leave: 21 days"]);
    }

    #[test]
    fn test_split_pages_no_separator() {
        let pages = split_pages("  Just one page  ");
        assert_eq!(pages, vec!["Just one page"]);
    }

    #[test]
    fn test_join_pages_with_blank_line() {
        let pages = vec!["Page one".to_string(), "Page two".to_string()];
        assert_eq!(join_pages(&pages), "Page one\n\nPage two");
    }

    #[test]
    fn test_missing_pdf_is_error() {
        assert!(extract_pages(Path::new("/nonexistent/handbook.pdf")).is_err());
    }
}
