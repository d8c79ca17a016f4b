//! 부서 분류기 - 질의가 선택된 부서와 맞는지 키워드 프로필로 판정
//!
//! 질의와 프로필 용어는 같은 토크나이저(소문자, 영숫자 토큰, 복수형 접기)로
//! 정규화됩니다. 용어(단어 또는 구)가 질의 토큰 안에 연속으로 나타나면
//! 가중치를 한 번 더합니다.
//!
//! 판정 순서:
//! 1. 최고점 < `min_score` -> `Ambiguous` (선택 부서로 진행)
//! 2. 선택 부서 >= 최고점 - `tolerance` -> `Match`
//! 3. 그 외 -> `Mismatch` (최고점 부서, 동점이면 설정 순서)
//!
//! 생성 모델을 호출하지 않으며 결정적입니다.

use std::sync::{Arc, RwLock};

use serde::Serialize;

use crate::config::{ClassifierConfig, DepartmentConfig};
use crate::knowledge::tokenize;

// ============================================================================
// Profiles
// ============================================================================

/// 정규화된 가중치 용어
#[derive(Debug, Clone, PartialEq)]
pub struct WeightedTerm {
    /// 설정에 적힌 원문
    pub term: String,
    pub tokens: Vec<String>,
    pub weight: f32,
}

impl WeightedTerm {
    pub fn new(term: &str, weight: f32) -> Self {
        Self {
            term: term.to_string(),
            tokens: tokenize(term),
            weight,
        }
    }

    /// 질의 토큰 안에 연속으로 나타나는지
    fn occurs_in(&self, query: &[String]) -> bool {
        !self.tokens.is_empty()
            && query
                .windows(self.tokens.len())
                .any(|window| window == self.tokens.as_slice())
    }
}

/// 부서 프로필
#[derive(Debug, Clone)]
pub struct DepartmentProfile {
    pub department: String,
    pub terms: Vec<WeightedTerm>,
    pub example_questions: Vec<String>,
}

impl DepartmentProfile {
    fn score(&self, query: &[String]) -> f32 {
        self.terms
            .iter()
            .filter(|t| t.occurs_in(query))
            .map(|t| t.weight)
            .sum()
    }
}

impl From<&DepartmentConfig> for DepartmentProfile {
    fn from(config: &DepartmentConfig) -> Self {
        Self {
            department: config.name.clone(),
            terms: config
                .keywords
                .iter()
                .map(|k| WeightedTerm::new(&k.term, k.weight))
                .collect(),
            example_questions: config.example_questions.clone(),
        }
    }
}

/// 불변 프로필 스냅샷 (설정 순서 유지)
#[derive(Debug, Clone, Default)]
pub struct ProfileSet {
    profiles: Vec<DepartmentProfile>,
}

impl ProfileSet {
    pub fn new(profiles: Vec<DepartmentProfile>) -> Self {
        Self { profiles }
    }

    pub fn from_config(departments: &[DepartmentConfig]) -> Self {
        Self::new(departments.iter().map(DepartmentProfile::from).collect())
    }

    pub fn get(&self, department: &str) -> Option<&DepartmentProfile> {
        self.profiles.iter().find(|p| p.department == department)
    }

    pub fn iter(&self) -> impl Iterator<Item = &DepartmentProfile> {
        self.profiles.iter()
    }

    pub fn len(&self) -> usize {
        self.profiles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.profiles.is_empty()
    }
}

// ============================================================================
// Classification
// ============================================================================

/// 부서별 스코어 (설정 순서)
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DepartmentScore {
    pub department: String,
    pub score: f32,
}

/// 분류 결과
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum Classification {
    /// 선택 부서가 맞음
    Match { score: f32, confidence: f32 },
    /// 다른 부서가 더 적합
    Mismatch {
        suggested: String,
        selected_score: f32,
        suggested_score: f32,
    },
    /// 어느 부서에도 뚜렷하게 속하지 않음 (선택 부서로 진행)
    Ambiguous,
}

impl Classification {
    /// 선택 부서로 질의를 진행해도 되는지
    pub fn proceeds(&self) -> bool {
        !matches!(self, Self::Mismatch { .. })
    }

    /// 선택 부서에 대한 신뢰도 (0.0 ~ 1.0, 모호하면 0.5)
    pub fn confidence(&self) -> f32 {
        match self {
            Self::Match { confidence, .. } => *confidence,
            Self::Mismatch {
                selected_score,
                suggested_score,
                ..
            } => {
                if *suggested_score > 0.0 {
                    selected_score / suggested_score
                } else {
                    0.0
                }
            }
            Self::Ambiguous => 0.5,
        }
    }
}

/// 부서 불일치 안내 문구
pub fn mismatch_message(selected: &str, suggested: &str) -> String {
    format!(
        "Query seems related to {} department, but {} is selected. Consider switching departments.",
        suggested, selected
    )
}

// ============================================================================
// DepartmentClassifier
// ============================================================================

/// 키워드 프로필 기반 부서 분류기
pub struct DepartmentClassifier {
    profiles: RwLock<Arc<ProfileSet>>,
    config: ClassifierConfig,
}

impl DepartmentClassifier {
    pub fn new(profiles: ProfileSet, config: ClassifierConfig) -> Self {
        Self {
            profiles: RwLock::new(Arc::new(profiles)),
            config,
        }
    }

    pub fn from_config(departments: &[DepartmentConfig], config: ClassifierConfig) -> Self {
        Self::new(ProfileSet::from_config(departments), config)
    }

    /// 현재 프로필 스냅샷
    pub fn profiles(&self) -> Arc<ProfileSet> {
        let guard = self.profiles.read().unwrap_or_else(|e| e.into_inner());
        Arc::clone(&guard)
    }

    /// 프로필 교체 (진행 중인 분류는 이전 스냅샷을 계속 사용)
    pub fn replace_profiles(&self, profiles: ProfileSet) {
        let mut guard = self.profiles.write().unwrap_or_else(|e| e.into_inner());
        *guard = Arc::new(profiles);
        tracing::info!("Department profiles replaced ({} departments)", guard.len());
    }

    /// 부서별 스코어 (설정 순서)
    pub fn scores(&self, query: &str) -> Vec<DepartmentScore> {
        let tokens = tokenize(query);
        self.profiles()
            .iter()
            .map(|p| DepartmentScore {
                department: p.department.clone(),
                score: p.score(&tokens),
            })
            .collect()
    }

    /// 질의를 선택 부서에 대해 분류
    pub fn classify(&self, query: &str, selected: &str) -> Classification {
        let scores = self.scores(query);

        let max = scores.iter().map(|s| s.score).fold(0.0_f32, f32::max);
        let selected_score = scores
            .iter()
            .find(|s| s.department == selected)
            .map(|s| s.score)
            .unwrap_or(0.0);

        let classification = if max < self.config.min_score {
            Classification::Ambiguous
        } else if selected_score >= max - self.config.tolerance {
            Classification::Match {
                score: selected_score,
                confidence: (selected_score / max).min(1.0),
            }
        } else {
            // 첫 번째 최고점 부서 = 설정 순서상 앞선 부서
            match scores.iter().find(|s| s.department != selected && s.score >= max) {
                Some(top) => Classification::Mismatch {
                    suggested: top.department.clone(),
                    selected_score,
                    suggested_score: top.score,
                },
                None => Classification::Ambiguous,
            }
        };

        tracing::debug!(
            "Classified query for {} (max {:.2}, selected {:.2}): {:?}",
            selected,
            max,
            selected_score,
            classification
        );

        classification
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{AppConfig, KeywordConfig};

    fn classifier() -> DepartmentClassifier {
        let config = AppConfig::default();
        DepartmentClassifier::from_config(&config.departments, config.classifier)
    }

    #[test]
    fn test_leave_policy_matches_hr() {
        let result = classifier().classify("What is the leave policy?", "HR");
        assert_eq!(
            result,
            Classification::Match {
                score: 2.0,
                confidence: 1.0
            }
        );
    }

    #[test]
    fn test_leave_policy_on_sales_suggests_hr() {
        match classifier().classify("What is the leave policy?", "Sales") {
            Classification::Mismatch { suggested, .. } => assert_eq!(suggested, "HR"),
            other => panic!("expected mismatch, got {:?}", other),
        }
    }

    #[test]
    fn test_generic_query_is_ambiguous() {
        let result = classifier().classify("Hello, who are you?", "IT");
        assert_eq!(result, Classification::Ambiguous);
        assert!(result.proceeds());
        assert_eq!(result.confidence(), 0.5);
    }

    #[test]
    fn test_keywords_of_one_department_name_their_owner() {
        let config = AppConfig::default();
        let classifier = classifier();

        for owner in &config.departments {
            let query = owner
                .keywords
                .iter()
                .map(|k| k.term.as_str())
                .collect::<Vec<_>>()
                .join(" ");

            for other in config.departments.iter().filter(|d| d.name != owner.name) {
                match classifier.classify(&query, &other.name) {
                    Classification::Mismatch { suggested, .. } => {
                        assert_eq!(suggested, owner.name, "query: {}", query)
                    }
                    result => panic!("{} on {}: {:?}", owner.name, other.name, result),
                }
            }
        }
    }

    #[test]
    fn test_phrase_matches_only_as_consecutive_run() {
        let classifier = classifier();
        let scores = classifier.scores("our social media plan");
        let marketing = scores.iter().find(|s| s.department == "Marketing").unwrap();
        assert_eq!(marketing.score, 1.0);

        let scores = classifier.scores("media for social events");
        let marketing = scores.iter().find(|s| s.department == "Marketing").unwrap();
        assert_eq!(marketing.score, 0.0);
    }

    #[test]
    fn test_plural_folding() {
        let scores = classifier().scores("Where are the invoices and payments?");
        let accounts = scores.iter().find(|s| s.department == "Accounts").unwrap();
        assert_eq!(accounts.score, 2.0);
    }

    #[test]
    fn test_term_weight_added_once() {
        let scores = classifier().scores("leave leave leave");
        let hr = scores.iter().find(|s| s.department == "HR").unwrap();
        assert_eq!(hr.score, 1.0);
    }

    #[test]
    fn test_tolerance_favours_selected() {
        // HR: salary (1), Accounts: payment + budget (2) -> 차이 1.0 > tolerance
        let classifier = classifier();
        assert!(matches!(
            classifier.classify("salary payment budget", "HR"),
            Classification::Mismatch { .. }
        ));

        // HR: salary (1), Accounts: payment (1) -> 동점이면 선택 부서
        assert!(matches!(
            classifier.classify("salary payment", "HR"),
            Classification::Match { .. }
        ));
    }

    #[test]
    fn test_ties_follow_config_order() {
        // Accounts(invoice)와 IT(server)가 동점 -> 설정 순서상 Accounts
        match classifier().classify("invoice server", "HR") {
            Classification::Mismatch { suggested, .. } => assert_eq!(suggested, "Accounts"),
            other => panic!("expected mismatch, got {:?}", other),
        }
    }

    #[test]
    fn test_replace_profiles() {
        let classifier = classifier();
        let held = classifier.profiles();

        let legal = DepartmentConfig {
            name: "Legal".to_string(),
            keywords: vec![KeywordConfig {
                term: "contract".to_string(),
                weight: 2.0,
            }],
            example_questions: vec![],
        };
        classifier.replace_profiles(ProfileSet::from_config(&[legal]));

        assert_eq!(held.len(), 7);
        assert_eq!(classifier.profiles().len(), 1);
        assert!(matches!(
            classifier.classify("sign the contract", "Legal"),
            Classification::Match { .. }
        ));
    }

    #[test]
    fn test_mismatch_message() {
        assert_eq!(
            mismatch_message("Sales", "HR"),
            "Query seems related to HR department, but Sales is selected. Consider switching departments."
        );
    }
}
