//! Retriever - 벡터 인덱스 검색

use std::sync::Arc;

use crate::error::RagError;
use crate::graph::{Passage, Query};
use crate::index::VectorIndex;

/// 패시지 검색기
pub struct Retriever {
    index: Arc<dyn VectorIndex>,
    top_k: usize,
}

impl Retriever {
    pub fn new(index: Arc<dyn VectorIndex>, top_k: usize) -> Self {
        Self { index, top_k }
    }

    /// 쿼리로 검색
    ///
    /// 최대 `top_k`건, 유사도 내림차순. 인덱스 연결 실패는 재시도 없이
    /// `IndexUnavailable`로 올립니다.
    pub async fn retrieve(&self, query: &Query) -> Result<Vec<Passage>, RagError> {
        let hits = self.index.search(query.text(), self.top_k).await?;

        let mut passages: Vec<Passage> = hits.into_iter().map(Passage::from).collect();
        passages.sort_by(|a, b| {
            b.score()
                .partial_cmp(&a.score())
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        passages.truncate(self.top_k);

        tracing::debug!(
            "Retrieved {} passages for query (attempt {})",
            passages.len(),
            query.attempt()
        );
        Ok(passages)
    }
}
