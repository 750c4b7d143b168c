//! Graph 모듈 - 자기 교정 RAG 상태 머신
//!
//! ```text
//! RETRIEVING -> GRADING -> GENERATING -> VERIFYING -> DONE
//!                  |            ^            |
//!                  v            |            | (off-topic)
//!              REWRITING -------+ <----------+
//!                  |
//!                  +-> RETRIEVING (새 쿼리)
//! ```
//!
//! - `state`: 실행 상태와 결과 타입
//! - `transition`: 순수 전이 함수
//! - `orchestrator`: 외부 호출을 수행하는 비동기 루프

mod orchestrator;
mod state;
mod transition;

pub use orchestrator::Orchestrator;
pub use state::{
    Confidence, GradedPassage, GraphState, Passage, Query, Relevance, RunResult, RunState,
    VerificationOutcome,
};
pub use transition::{advance, Event, INSUFFICIENT_INFORMATION_ANSWER};
