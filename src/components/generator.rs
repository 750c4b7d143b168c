//! Generator - 패시지 기반 답변 생성

use std::sync::Arc;

use super::prompts;
use crate::error::RagError;
use crate::graph::{Passage, Query};
use crate::llm::LanguageModel;

/// 답변 생성기
pub struct Generator {
    model: Arc<dyn LanguageModel>,
}

impl Generator {
    pub fn new(model: Arc<dyn LanguageModel>) -> Self {
        Self { model }
    }

    /// 답변 생성
    ///
    /// 패시지가 없으면 `InsufficientEvidence` (호출 계약 위반).
    pub async fn generate(&self, query: &Query, passages: &[Passage]) -> Result<String, RagError> {
        if passages.is_empty() {
            return Err(RagError::InsufficientEvidence);
        }

        let answer = self
            .model
            .complete(&prompts::generation(query.text(), passages))
            .await
            .map_err(|e| e.classify(RagError::ModelUnavailable))?;

        let answer = answer.trim();
        if answer.is_empty() {
            return Err(RagError::ModelUnavailable("empty completion".to_string()));
        }

        Ok(answer.to_string())
    }
}
