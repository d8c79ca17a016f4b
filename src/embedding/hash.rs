//! 해시 임베딩 - 네트워크 없이 동작하는 결정적 임베딩
//!
//! 토큰과 인접 토큰 쌍(bigram)을 FNV-1a로 해싱해 고정 차원 버킷에 누적한 뒤
//! L2 정규화합니다. 같은 입력은 항상 같은 벡터를 만듭니다.

use anyhow::Result;
use async_trait::async_trait;

use super::EmbeddingProvider;
use crate::knowledge::{normalize, tokenize};

const FNV_OFFSET: u64 = 0xcbf2_9ce4_8422_2325;
const FNV_PRIME: u64 = 0x0000_0100_0000_01b3;
/// bigram 가중치 (단일 토큰 = 1.0)
const BIGRAM_WEIGHT: f32 = 0.5;

/// Feature hashing 임베딩
#[derive(Debug, Clone)]
pub struct HashEmbedding {
    dimension: usize,
}

impl HashEmbedding {
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension: dimension.max(1),
        }
    }

    fn accumulate(&self, vector: &mut [f32], feature: &str, weight: f32) {
        let hash = fnv1a(feature.as_bytes());
        let bucket = (hash % self.dimension as u64) as usize;
        let sign = if hash >> 63 == 0 { 1.0 } else { -1.0 };
        vector[bucket] += sign * weight;
    }

    fn vectorize(&self, text: &str) -> Vec<f32> {
        let mut vector = vec![0.0; self.dimension];
        let tokens = tokenize(text);

        for token in &tokens {
            self.accumulate(&mut vector, token, 1.0);
        }
        for pair in tokens.windows(2) {
            self.accumulate(&mut vector, &format!("{} {}", pair[0], pair[1]), BIGRAM_WEIGHT);
        }

        normalize(&mut vector);
        vector
    }
}

#[async_trait]
impl EmbeddingProvider for HashEmbedding {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        Ok(self.vectorize(text))
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn name(&self) -> &str {
        "hash-embedding-v1"
    }
}

fn fnv1a(bytes: &[u8]) -> u64 {
    bytes.iter().fold(FNV_OFFSET, |hash, byte| {
        (hash ^ u64::from(*byte)).wrapping_mul(FNV_PRIME)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::knowledge::cosine_similarity;

    #[tokio::test]
    async fn test_hash_embedding_deterministic() {
        let embedder = HashEmbedding::new(64);
        let a = embedder.embed("Annual Leave: 21 days").await.unwrap();
        let b = embedder.embed("Annual Leave: 21 days").await.unwrap();
        assert_eq!(a, b);
        assert_eq!(a.len(), 64);
    }

    #[tokio::test]
    async fn test_hash_embedding_similarity() {
        let embedder = HashEmbedding::new(256);
        let doc = embedder.embed("annual leave policy allows 21 days").await.unwrap();
        let near = embedder.embed_query("what is the leave policy").await.unwrap();
        let far = embedder.embed_query("server network outage").await.unwrap();

        assert!(cosine_similarity(&doc, &near) > cosine_similarity(&doc, &far));
    }

    #[tokio::test]
    async fn test_hash_embedding_empty_text() {
        let embedder = HashEmbedding::new(16);
        let vector = embedder.embed("").await.unwrap();
        assert!(vector.iter().all(|v| *v == 0.0));
    }

    #[test]
    fn test_fnv1a_known_value() {
        // FNV-1a("a") = 0xaf63dc4c8601ec8c
        assert_eq!(fnv1a(b"a"), 0xaf63_dc4c_8601_ec8c);
    }
}
