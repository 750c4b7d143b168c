//! AnswerVerifier - 근거성 및 질문 해결 여부 검증
//!
//! 1. 근거성 평가: no -> `Hallucinated`
//! 2. 답변 평가: yes -> `GroundedAndAnswers`, partial -> `GroundedButIncomplete`, no -> `OffTopic`

use std::sync::Arc;

use super::grader::{parse_score, Score};
use super::prompts;
use crate::error::RagError;
use crate::graph::{Passage, Query, VerificationOutcome};
use crate::llm::LanguageModel;

/// 답변 검증기
pub struct AnswerVerifier {
    model: Arc<dyn LanguageModel>,
}

impl AnswerVerifier {
    pub fn new(model: Arc<dyn LanguageModel>) -> Self {
        Self { model }
    }

    /// 답변 분류
    pub async fn verify(
        &self,
        query: &Query,
        answer: &str,
        passages: &[Passage],
    ) -> Result<VerificationOutcome, RagError> {
        let grounded = self
            .model
            .complete(&prompts::groundedness(answer, passages))
            .await
            .map_err(|e| e.classify(RagError::ModelUnavailable))?;

        // 해석 불가는 근거 없음으로 취급
        if parse_score(&grounded) != Some(Score::Yes) {
            return Ok(VerificationOutcome::Hallucinated);
        }

        let resolves = self
            .model
            .complete(&prompts::answer_check(query.text(), answer))
            .await
            .map_err(|e| e.classify(RagError::ModelUnavailable))?;

        let outcome = match parse_score(&resolves) {
            Some(Score::Yes) => VerificationOutcome::GroundedAndAnswers,
            Some(Score::No) => VerificationOutcome::OffTopic,
            Some(Score::Partial) | None => VerificationOutcome::GroundedButIncomplete,
        };
        Ok(outcome)
    }
}
