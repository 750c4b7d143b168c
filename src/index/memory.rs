//! 메모리 벡터 인덱스
//!
//! 전수 코사인 유사도 검색. 작은 코퍼스와 테스트용입니다.

use std::sync::{Arc, RwLock};

use anyhow::Result;
use async_trait::async_trait;

use super::{embed_chunks, rank_hits, ChunkRecord, IndexHit, VectorIndex};
use crate::embedding::{EmbedTask, EmbeddingProvider};
use crate::error::IndexError;

/// 프로세스 내 벡터 인덱스
pub struct MemoryIndex {
    embedder: Arc<dyn EmbeddingProvider>,
    records: RwLock<Vec<ChunkRecord>>,
}

impl MemoryIndex {
    pub fn new(embedder: Arc<dyn EmbeddingProvider>) -> Self {
        Self {
            embedder,
            records: RwLock::new(Vec::new()),
        }
    }

    /// 이미 분할된 청크 추가
    ///
    /// # Returns
    /// 추가된 청크 수
    pub async fn add_chunks(&self, source: &str, chunks: &[String]) -> Result<usize> {
        let records = embed_chunks(self.embedder.as_ref(), source, chunks).await?;
        let added = records.len();

        let mut guard = self
            .records
            .write()
            .map_err(|e| anyhow::anyhow!("Lock error: {}", e))?;
        guard.retain(|r| r.source != source);
        guard.extend(records);

        Ok(added)
    }

    /// 저장된 청크 수
    pub fn len(&self) -> usize {
        self.records.read().map(|r| r.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl VectorIndex for MemoryIndex {
    async fn search(&self, text: &str, k: usize) -> Result<Vec<IndexHit>, IndexError> {
        let query = self
            .embedder
            .embed(text, EmbedTask::Query)
            .await
            .map_err(IndexError::from)?;

        let guard = self
            .records
            .read()
            .map_err(|e| IndexError::Storage(format!("Lock error: {}", e)))?;

        let hits = guard
            .iter()
            .map(|r| IndexHit {
                chunk_id: r.chunk_id.clone(),
                source: r.source.clone(),
                text: r.text.clone(),
                score: super::cosine_similarity(&query, &r.embedding),
            })
            .collect();

        Ok(rank_hits(hits, k))
    }
}
