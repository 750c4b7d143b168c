//! 임베딩 모듈 - Gemini API를 통한 텍스트 벡터화
//!
//! 벡터 인덱스가 청크와 쿼리를 같은 공간에 놓기 위해 사용합니다.
//! 문서 청크는 `RETRIEVAL_DOCUMENT`, 검색 쿼리는 `RETRIEVAL_QUERY` 태스크로 임베딩합니다.
//!
//! ## 사용법
//! ```rust,ignore
//! let embedder = GeminiEmbedding::from_env()?;
//! let v = embedder.embed("What is an ETF?", EmbedTask::Query).await?;
//! ```

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use crate::error::EmbedError;
use crate::llm::{get_api_key, RateLimiter};

/// 기본 임베딩 차원
pub const DEFAULT_DIMENSION: usize = 768;

/// Gemini 임베딩 API 엔드포인트
/// source: https://ai.google.dev/gemini-api/docs/embeddings
const GEMINI_EMBED_URL: &str =
    "https://generativelanguage.googleapis.com/v1beta/models/gemini-embedding-001:embedContent";

// ============================================================================
// EmbeddingProvider Trait
// ============================================================================

/// 임베딩 용도
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EmbedTask {
    /// 인덱싱할 문서 청크
    Document,
    /// 검색 쿼리
    Query,
}

impl EmbedTask {
    fn as_api_str(self) -> &'static str {
        match self {
            EmbedTask::Document => "RETRIEVAL_DOCUMENT",
            EmbedTask::Query => "RETRIEVAL_QUERY",
        }
    }
}

/// 임베딩 프로바이더 트레이트
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// 단일 텍스트 임베딩
    ///
    /// 일시적 실패는 `Unavailable`, 재시도해도 소용없는 실패는 `Rejected`.
    async fn embed(&self, text: &str, task: EmbedTask) -> Result<Vec<f32>, EmbedError>;

    /// 임베딩 차원 수
    fn dimension(&self) -> usize;
}

// ============================================================================
// Google Gemini Embedding
// ============================================================================

/// Gemini 임베딩 구현체
///
/// 내부 재시도 없음. 429/5xx/네트워크 실패만 인덱스 연결 실패로 올라갑니다.
#[derive(Debug, Clone)]
pub struct GeminiEmbedding {
    api_key: String,
    client: reqwest::Client,
    dimension: usize,
    rate_limiter: Arc<Mutex<RateLimiter>>,
}

impl GeminiEmbedding {
    /// 차원을 지정하여 생성
    ///
    /// # Arguments
    /// * `api_key` - Google AI API 키
    /// * `dimension` - 임베딩 차원 (768, 1536, 3072 중 선택)
    pub fn with_dimension(api_key: String, dimension: usize) -> Result<Self> {
        if ![768, 1536, 3072].contains(&dimension) {
            anyhow::bail!(
                "Invalid dimension: {}. Must be 768, 1536, or 3072",
                dimension
            );
        }

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            api_key,
            client,
            dimension,
            rate_limiter: Arc::new(Mutex::new(RateLimiter::new(60, Duration::from_secs(60)))),
        })
    }

    /// 환경변수의 API 키로 생성 (기본 차원)
    pub fn from_env() -> Result<Self> {
        Self::with_dimension(get_api_key()?, DEFAULT_DIMENSION)
    }
}

#[derive(Debug, Serialize)]
struct EmbedRequest<'a> {
    model: &'static str,
    content: EmbedContent<'a>,
    #[serde(rename = "taskType")]
    task_type: &'static str,
    #[serde(rename = "outputDimensionality")]
    output_dimensionality: usize,
}

#[derive(Debug, Serialize)]
struct EmbedContent<'a> {
    parts: [EmbedPart<'a>; 1],
}

#[derive(Debug, Serialize)]
struct EmbedPart<'a> {
    text: &'a str,
}

#[derive(Debug, Deserialize)]
struct EmbedResponse {
    embedding: EmbeddingValues,
}

#[derive(Debug, Deserialize)]
struct EmbeddingValues {
    values: Vec<f32>,
}

/// HTTP 상태와 본문으로 임베딩 결과 판정
fn interpret_embedding(status: u16, body: &str, dimension: usize) -> Result<Vec<f32>, EmbedError> {
    if status == 429 || status >= 500 {
        return Err(EmbedError::Unavailable(format!("HTTP {}", status)));
    }

    if !(200..300).contains(&status) {
        let detail: String = body.chars().take(200).collect();
        return Err(EmbedError::Rejected(format!("HTTP {}: {}", status, detail)));
    }

    let parsed: EmbedResponse = serde_json::from_str(body)
        .map_err(|e| EmbedError::Rejected(format!("Failed to parse embedding response: {}", e)))?;

    if parsed.embedding.values.len() != dimension {
        return Err(EmbedError::Rejected(format!(
            "Embedding dimension mismatch: expected {}, got {}",
            dimension,
            parsed.embedding.values.len()
        )));
    }

    Ok(parsed.embedding.values)
}

#[async_trait]
impl EmbeddingProvider for GeminiEmbedding {
    async fn embed(&self, text: &str, task: EmbedTask) -> Result<Vec<f32>, EmbedError> {
        if text.trim().is_empty() {
            return Ok(vec![0.0; self.dimension]);
        }

        let request = EmbedRequest {
            model: "models/gemini-embedding-001",
            content: EmbedContent {
                parts: [EmbedPart { text }],
            },
            task_type: task.as_api_str(),
            output_dimensionality: self.dimension,
        };

        self.rate_limiter.lock().await.acquire().await;

        let response = self
            .client
            .post(GEMINI_EMBED_URL)
            .header("x-goog-api-key", &self.api_key)
            .json(&request)
            .send()
            .await
            .map_err(|e| EmbedError::Unavailable(format!("Failed to send embedding request: {}", e)))?;

        let status = response.status().as_u16();
        let body = response
            .text()
            .await
            .map_err(|e| EmbedError::Unavailable(format!("Failed to read embedding response: {}", e)))?;

        interpret_embedding(status, &body, self.dimension)
    }

    fn dimension(&self) -> usize {
        self.dimension
    }
}

// ============================================================================
// Tests
// ============================================================================
