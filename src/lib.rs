//! palank-crag - 자기 교정(corrective) RAG 오케스트레이션
//!
//! 검색 → 관련성 평가 → (쿼리 재작성) → 생성 → 검증을 명시적 상태 머신으로
//! 실행합니다. 모든 재시도는 실행별 예산으로 제한되어 항상 유한 단계에 종료합니다.

pub mod cli;
pub mod components;
pub mod config;
pub mod embedding;
pub mod error;
pub mod graph;
pub mod index;
pub mod llm;
pub mod scraper;

#[cfg(test)]
pub(crate) mod testing;

// Re-exports
pub use config::{get_data_dir, RunConfig};
pub use embedding::{EmbedTask, EmbeddingProvider, GeminiEmbedding};
pub use error::{EmbedError, ErrorKind, IndexError, LlmError, RagError};
pub use graph::{
    Confidence, GraphState, Orchestrator, Passage, Query, RunResult, VerificationOutcome,
};
pub use index::{IndexHit, LanceIndex, MemoryIndex, TokenChunker, VectorIndex};
pub use llm::{get_api_key, has_api_key, GeminiModel, LanguageModel, Prompt};
pub use scraper::{LoadedPage, PageLoader};
