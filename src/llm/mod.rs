//! 언어 모델 모듈 - 단일 completion 능력
//!
//! 평가/재작성/생성/검증 단계는 모두 `complete(prompt) -> text` 하나만 사용합니다.
//! 백엔드(로컬 모델, 원격 API)는 [`LanguageModel`] 구현만 교체하면 됩니다.
//!
//! ## 사용법
//! ```rust,ignore
//! let model = GeminiModel::from_env()?;
//! let text = model.complete(&Prompt::new("You are a grader.", "Is the sky blue?")).await?;
//! ```

mod gemini;
mod rate_limit;

use async_trait::async_trait;

use crate::error::LlmError;

pub use gemini::{get_api_key, has_api_key, GeminiModel, DEFAULT_MODEL};
pub(crate) use rate_limit::RateLimiter;

// ============================================================================
// Prompt
// ============================================================================

/// 프롬프트 (시스템 프리앰블 + 사용자 메시지)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Prompt {
    /// 역할 지시문
    pub preamble: String,
    /// 사용자 메시지
    pub message: String,
}

impl Prompt {
    pub fn new(preamble: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            preamble: preamble.into(),
            message: message.into(),
        }
    }
}

// ============================================================================
// LanguageModel Trait
// ============================================================================

/// 언어 모델 트레이트
///
/// 구현체는 내부 재시도를 하지 않습니다. 재시도 예산은 오케스트레이터만 가집니다.
#[async_trait]
pub trait LanguageModel: Send + Sync {
    /// 프롬프트 완성
    async fn complete(&self, prompt: &Prompt) -> Result<String, LlmError>;

    /// 모델 이름
    fn name(&self) -> &str;
}
