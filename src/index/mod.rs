//! Index 모듈 - 벡터 유사도 검색
//!
//! 오케스트레이터 입장에서 인덱스는 외부 협력자입니다.
//! `search(text, k)`만 요구하며, 동시 읽기 일관성은 구현체의 책임입니다.
//!
//! - LanceDB: 디스크 기반 ANN 검색 (CLI 기본값)
//! - Memory: 프로세스 내 코사인 유사도 검색
//! - Chunker: tiktoken 토큰 예산 기반 분할

mod chunker;
mod lance;
mod memory;

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::Serialize;
use sha2::{Digest, Sha256};

use crate::embedding::{EmbedTask, EmbeddingProvider};
use crate::error::IndexError;

pub use chunker::{ChunkConfig, TokenChunker};
pub use lance::LanceIndex;
pub use memory::MemoryIndex;

// ============================================================================
// Types
// ============================================================================

/// 검색 결과 한 건
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IndexHit {
    /// 청크 식별자
    pub chunk_id: String,
    /// 원본 문서 (URL 등)
    pub source: String,
    /// 청크 텍스트
    pub text: String,
    /// 유사도 스코어 (높을수록 유사)
    pub score: f32,
}

/// 임베딩이 끝난 저장용 청크
#[derive(Debug, Clone)]
pub struct ChunkRecord {
    pub chunk_id: String,
    pub source: String,
    pub text: String,
    pub embedding: Vec<f32>,
}

// ============================================================================
// VectorIndex Trait
// ============================================================================

/// 벡터 인덱스 트레이트 (읽기 전용 검색)
#[async_trait]
pub trait VectorIndex: Send + Sync {
    /// 유사도 내림차순으로 최대 `k`건 반환
    async fn search(&self, text: &str, k: usize) -> Result<Vec<IndexHit>, IndexError>;
}

// ============================================================================
// Utility Functions
// ============================================================================

/// 코사인 유사도 (-1.0 ~ 1.0, 길이 불일치/영벡터는 0.0)
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let (dot, norm_a, norm_b) = a
        .iter()
        .zip(b)
        .fold((0.0f32, 0.0f32, 0.0f32), |(d, na, nb), (x, y)| {
            (d + x * y, na + x * x, nb + y * y)
        });

    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }

    dot / (norm_a.sqrt() * norm_b.sqrt())
}

/// 청크 ID 생성 (source 해시 앞 8바이트 + 순번)
pub fn chunk_id(source: &str, index: usize) -> String {
    let digest = Sha256::digest(source.as_bytes());
    let prefix: String = digest.iter().take(8).map(|b| format!("{:02x}", b)).collect();
    format!("{}-{:04}", prefix, index)
}

/// 유사도 내림차순 정렬 후 k건으로 자르기
pub(crate) fn rank_hits(mut hits: Vec<IndexHit>, k: usize) -> Vec<IndexHit> {
    hits.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
    hits.truncate(k);
    hits
}

/// 청크 목록을 임베딩하여 저장용 레코드로 변환
pub(crate) async fn embed_chunks(
    embedder: &dyn EmbeddingProvider,
    source: &str,
    chunks: &[String],
) -> Result<Vec<ChunkRecord>> {
    let mut records = Vec::with_capacity(chunks.len());

    for (i, chunk) in chunks.iter().enumerate() {
        tracing::debug!("Embedding chunk {}/{} of {}", i + 1, chunks.len(), source);
        let embedding = embedder
            .embed(chunk, EmbedTask::Document)
            .await
            .context("Failed to embed chunk")?;

        records.push(ChunkRecord {
            chunk_id: chunk_id(source, i),
            source: source.to_string(),
            text: chunk.clone(),
            embedding,
        });
    }

    Ok(records)
}

// ============================================================================
// Tests
// ============================================================================
