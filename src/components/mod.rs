//! Components 모듈 - 파이프라인 단계
//!
//! 모든 컴포넌트는 요청/응답만 수행하며 내부 재시도를 하지 않습니다.
//! 실패는 [`RagError`](crate::error::RagError)로 분류되어 오케스트레이터로 올라갑니다.
//!
//! - Retriever: 벡터 인덱스 검색 -> Passage
//! - RelevanceGrader: 패시지별 관련성 평가
//! - QueryRewriter: 근거 부족 시 쿼리 재작성 (정체 감지)
//! - Generator: 패시지 기반 답변 생성
//! - AnswerVerifier: 근거성 + 질문 해결 여부 검증

mod generator;
mod grader;
pub mod prompts;
mod retriever;
mod rewriter;
mod verifier;

pub use generator::Generator;
pub use grader::{parse_score, RelevanceGrader, Score};
pub use retriever::Retriever;
pub use rewriter::QueryRewriter;
pub use verifier::AnswerVerifier;
