//! RelevanceGrader - 패시지별 관련성 평가

use std::sync::Arc;

use serde::Deserialize;

use super::prompts;
use crate::error::RagError;
use crate::graph::{GradedPassage, Passage, Query, Relevance};
use crate::llm::LanguageModel;

// ============================================================================
// Score Parsing
// ============================================================================

/// 그레이더 점수
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Score {
    Yes,
    Partial,
    No,
}

#[derive(Debug, Deserialize)]
struct BinaryScore {
    binary_score: String,
}

fn word_to_score(word: &str) -> Option<Score> {
    match word.trim().trim_matches(|c: char| !c.is_alphanumeric()).to_lowercase().as_str() {
        "yes" | "true" | "relevant" => Some(Score::Yes),
        "partial" | "partially" => Some(Score::Partial),
        "no" | "false" | "irrelevant" => Some(Score::No),
        _ => None,
    }
}

/// 모델 응답에서 점수 추출
///
/// `{"binary_score": "yes"}` JSON(코드 펜스 허용) 또는 첫 단어 yes/partial/no를 인식합니다.
pub fn parse_score(raw: &str) -> Option<Score> {
    let trimmed = raw
        .trim()
        .trim_start_matches("```json")
        .trim_start_matches("```")
        .trim_end_matches("```")
        .trim();

    if let (Some(start), Some(end)) = (trimmed.find('{'), trimmed.rfind('}')) {
        if start < end {
            if let Ok(parsed) = serde_json::from_str::<BinaryScore>(&trimmed[start..=end]) {
                return word_to_score(&parsed.binary_score);
            }
        }
    }

    trimmed.split_whitespace().next().and_then(word_to_score)
}

// ============================================================================
// RelevanceGrader
// ============================================================================

/// 관련성 평가기
pub struct RelevanceGrader {
    model: Arc<dyn LanguageModel>,
}

impl RelevanceGrader {
    pub fn new(model: Arc<dyn LanguageModel>) -> Self {
        Self { model }
    }

    /// 패시지마다 relevant/irrelevant 라벨 부여
    ///
    /// 해석할 수 없는 응답은 irrelevant로 봅니다.
    pub async fn grade(
        &self,
        query: &Query,
        passages: &[Passage],
    ) -> Result<Vec<GradedPassage>, RagError> {
        let mut graded = Vec::with_capacity(passages.len());

        for passage in passages {
            let raw = self
                .model
                .complete(&prompts::relevance(query.text(), passage))
                .await
                .map_err(|e| e.classify(RagError::GradingUnavailable))?;

            let relevance = match parse_score(&raw) {
                Some(Score::Yes) => Relevance::Relevant,
                Some(_) => Relevance::Irrelevant,
                None => {
                    tracing::warn!("Unparseable relevance grade: {:?}", raw);
                    Relevance::Irrelevant
                }
            };

            graded.push(GradedPassage {
                passage: passage.clone(),
                relevance,
            });
        }

        Ok(graded)
    }
}
