//! LanceDB 벡터 인덱스
//!
//! ref: https://lancedb.github.io/lancedb/
//!
//! 테이블 `chunks`: chunk_id, source, chunk_text, ingested_at, embedding

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use arrow_array::{
    Array, FixedSizeListArray, Float32Array, RecordBatch, RecordBatchIterator, StringArray,
};
use arrow_schema::{DataType, Field, Schema};
use async_trait::async_trait;
use futures::TryStreamExt;
use lancedb::connection::Connection;
use lancedb::query::{ExecutableQuery, QueryBase};

use super::{embed_chunks, rank_hits, ChunkRecord, IndexHit, TokenChunker, VectorIndex};
use crate::embedding::{EmbedTask, EmbeddingProvider};
use crate::error::IndexError;

/// 청크 테이블 이름
const TABLE_NAME: &str = "chunks";

/// LanceDB 기반 인덱스
pub struct LanceIndex {
    db: Connection,
    embedder: Arc<dyn EmbeddingProvider>,
    chunker: TokenChunker,
}

impl LanceIndex {
    /// 인덱스 열기 (없으면 생성)
    ///
    /// # Arguments
    /// * `path` - .lance 디렉토리 경로
    /// * `embedder` - 청크/쿼리 임베딩 프로바이더
    /// * `chunker` - 문서 분할기
    pub async fn open(
        path: &Path,
        embedder: Arc<dyn EmbeddingProvider>,
        chunker: TokenChunker,
    ) -> Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.exists() {
                tokio::fs::create_dir_all(parent)
                    .await
                    .context("Failed to create LanceDB directory")?;
            }
        }

        let path_str = path
            .to_str()
            .ok_or_else(|| anyhow::anyhow!("Invalid path encoding"))?;

        let db = lancedb::connect(path_str)
            .execute()
            .await
            .context("Failed to connect to LanceDB")?;

        Ok(Self {
            db,
            embedder,
            chunker,
        })
    }

    fn dimension(&self) -> i32 {
        self.embedder.dimension() as i32
    }

    fn schema(&self) -> Schema {
        Schema::new(vec![
            Field::new("chunk_id", DataType::Utf8, false),
            Field::new("source", DataType::Utf8, false),
            Field::new("chunk_text", DataType::Utf8, false),
            Field::new("ingested_at", DataType::Utf8, false),
            Field::new(
                "embedding",
                DataType::FixedSizeList(
                    Arc::new(Field::new("item", DataType::Float32, true)),
                    self.dimension(),
                ),
                false,
            ),
        ])
    }

    /// 레코드를 Arrow RecordBatch로 변환
    fn to_batch(&self, records: &[ChunkRecord]) -> Result<RecordBatch> {
        let ingested_at = chrono::Utc::now().to_rfc3339();
        let flat: Vec<f32> = records
            .iter()
            .flat_map(|r| r.embedding.iter().copied())
            .collect();

        let embeddings = FixedSizeListArray::try_new(
            Arc::new(Field::new("item", DataType::Float32, true)),
            self.dimension(),
            Arc::new(Float32Array::from(flat)) as Arc<dyn Array>,
            None,
        )
        .context("Failed to create embedding array")?;

        RecordBatch::try_new(
            Arc::new(self.schema()),
            vec![
                Arc::new(StringArray::from_iter_values(
                    records.iter().map(|r| r.chunk_id.as_str()),
                )),
                Arc::new(StringArray::from_iter_values(
                    records.iter().map(|r| r.source.as_str()),
                )),
                Arc::new(StringArray::from_iter_values(
                    records.iter().map(|r| r.text.as_str()),
                )),
                Arc::new(StringArray::from_iter_values(
                    records.iter().map(|_| ingested_at.as_str()),
                )),
                Arc::new(embeddings),
            ],
        )
        .context("Failed to create RecordBatch")
    }

    async fn table_exists(&self) -> Result<bool> {
        let names = self
            .db
            .table_names()
            .execute()
            .await
            .context("Failed to list tables")?;
        Ok(names.iter().any(|n| n == TABLE_NAME))
    }

    async fn open_table(&self) -> Result<Option<lancedb::table::Table>> {
        if !self.table_exists().await? {
            return Ok(None);
        }
        let table = self
            .db
            .open_table(TABLE_NAME)
            .execute()
            .await
            .context("Failed to open chunk table")?;
        Ok(Some(table))
    }

    /// 문서 추가 (분할 + 임베딩 + 저장)
    ///
    /// 같은 source의 기존 청크는 먼저 삭제합니다.
    ///
    /// # Returns
    /// 저장된 청크 수
    pub async fn add_document(&self, source: &str, text: &str) -> Result<usize> {
        let chunks = self.chunker.chunk(text);
        if chunks.is_empty() {
            tracing::warn!("No chunks generated for document: {}", source);
            return Ok(0);
        }
        self.add_chunks(source, &chunks).await
    }

    /// 이미 분할된 청크 추가
    pub async fn add_chunks(&self, source: &str, chunks: &[String]) -> Result<usize> {
        let records = embed_chunks(self.embedder.as_ref(), source, chunks).await?;
        if records.is_empty() {
            return Ok(0);
        }

        let batch = self.to_batch(&records)?;
        let schema = batch.schema();
        let batches = RecordBatchIterator::new(vec![Ok(batch)], schema);

        match self.open_table().await? {
            Some(table) => {
                self.delete_source(source).await?;
                table
                    .add(batches)
                    .execute()
                    .await
                    .context("Failed to add chunks")?;
            }
            None => {
                self.db
                    .create_table(TABLE_NAME, batches)
                    .execute()
                    .await
                    .context("Failed to create chunk table")?;
            }
        }

        tracing::info!("Indexed {} chunks from {}", records.len(), source);
        Ok(records.len())
    }

    /// source의 청크 삭제
    ///
    /// # Returns
    /// 삭제된 청크 수
    pub async fn delete_source(&self, source: &str) -> Result<usize> {
        let Some(table) = self.open_table().await? else {
            return Ok(0);
        };

        let filter = source_filter(source);
        let before = table
            .count_rows(Some(filter.clone()))
            .await
            .context("Failed to count rows for source")?;
        if before == 0 {
            return Ok(0);
        }

        table
            .delete(&filter)
            .await
            .context("Failed to delete chunks")?;
        Ok(before)
    }

    /// 전체 청크 수
    pub async fn count(&self) -> Result<usize> {
        match self.open_table().await? {
            Some(table) => table.count_rows(None).await.context("Failed to count rows"),
            None => Ok(0),
        }
    }

    async fn nearest(&self, query: Vec<f32>, k: usize) -> Result<Vec<RecordBatch>> {
        let Some(table) = self.open_table().await? else {
            return Ok(vec![]);
        };

        let stream = table
            .vector_search(query)
            .context("Failed to create vector search")?
            .limit(k)
            .execute()
            .await
            .context("Failed to execute vector search")?;

        let batches: Vec<RecordBatch> = stream
            .try_collect()
            .await
            .context("Failed to read search results")?;
        Ok(batches)
    }
}

/// source 일치 필터 (작은따옴표 이스케이프)
fn source_filter(source: &str) -> String {
    format!("source = '{}'", source.replace('\'', "''"))
}

/// 검색 결과 배치를 IndexHit로 변환
///
/// L2 거리를 `1 / (1 + d)` 유사도로 변환합니다.
fn batches_to_hits(batches: &[RecordBatch]) -> Result<Vec<IndexHit>, IndexError> {
    let mut hits = Vec::new();

    for batch in batches {
        let column = |name: &str| {
            batch
                .column_by_name(name)
                .ok_or_else(|| IndexError::Storage(format!("Missing {} column", name)))
        };
        let strings = |name: &str| -> Result<StringArray, IndexError> {
            column(name)?
                .as_any()
                .downcast_ref::<StringArray>()
                .cloned()
                .ok_or_else(|| IndexError::Storage(format!("Column {} is not utf8", name)))
        };

        let ids = strings("chunk_id")?;
        let sources = strings("source")?;
        let texts = strings("chunk_text")?;
        let distances = column("_distance")?
            .as_any()
            .downcast_ref::<Float32Array>()
            .cloned()
            .ok_or_else(|| IndexError::Storage("Column _distance is not f32".to_string()))?;

        for i in 0..batch.num_rows() {
            hits.push(IndexHit {
                chunk_id: ids.value(i).to_string(),
                source: sources.value(i).to_string(),
                text: texts.value(i).to_string(),
                score: 1.0 / (1.0 + distances.value(i)),
            });
        }
    }

    Ok(hits)
}

#[async_trait]
impl VectorIndex for LanceIndex {
    async fn search(&self, text: &str, k: usize) -> Result<Vec<IndexHit>, IndexError> {
        let query = self
            .embedder
            .embed(text, EmbedTask::Query)
            .await
            .map_err(IndexError::from)?;

        let batches = self
            .nearest(query, k)
            .await
            .map_err(|e| IndexError::Unavailable(format!("{:#}", e)))?;

        Ok(rank_hits(batches_to_hits(&batches)?, k))
    }
}

// ============================================================================
// Tests
// ============================================================================
