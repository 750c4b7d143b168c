//! Gemini generateContent 백엔드
//!
//! source: https://ai.google.dev/api/generate-content
//!
//! 응답 분류:
//! - 429 / 5xx / 네트워크 에러 -> `LlmError::Unavailable` (재시도 가능)
//! - `promptFeedback.blockReason`, `finishReason == SAFETY` -> `LlmError::ContentPolicy`
//! - 그 외 4xx, 파싱 불가 응답 -> `LlmError::Fatal`

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use super::rate_limit::{RateLimiter, DEFAULT_RPM};
use super::{LanguageModel, Prompt};
use crate::error::LlmError;

/// Gemini API 베이스 URL
const GEMINI_API_BASE: &str = "https://generativelanguage.googleapis.com/v1beta/models";

/// 기본 생성 모델
pub const DEFAULT_MODEL: &str = "gemini-2.0-flash";

/// 모델 선택 환경변수
const MODEL_ENV: &str = "PALANK_CRAG_MODEL";

/// 최대 출력 토큰
const MAX_OUTPUT_TOKENS: u32 = 1024;

/// 정책 차단으로 취급하는 finishReason
const BLOCKED_FINISH_REASONS: [&str; 4] = ["SAFETY", "PROHIBITED_CONTENT", "BLOCKLIST", "SPII"];

// ============================================================================
// GeminiModel
// ============================================================================

/// Gemini 생성 모델 클라이언트
///
/// 그레이더와 생성기가 같은 인스턴스를 공유합니다 (temperature 0).
#[derive(Debug, Clone)]
pub struct GeminiModel {
    api_key: String,
    model: String,
    client: reqwest::Client,
    rate_limiter: Arc<Mutex<RateLimiter>>,
}

impl GeminiModel {
    /// 새 클라이언트 생성
    ///
    /// # Arguments
    /// * `api_key` - Google AI API 키
    /// * `model` - 모델 이름 (예: gemini-2.0-flash)
    pub fn new(api_key: String, model: impl Into<String>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(60))
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            api_key,
            model: model.into(),
            client,
            rate_limiter: Arc::new(Mutex::new(RateLimiter::new(
                DEFAULT_RPM,
                Duration::from_secs(60),
            ))),
        })
    }

    /// 환경변수에서 생성
    ///
    /// 모델: `PALANK_CRAG_MODEL` (없으면 [`DEFAULT_MODEL`])
    pub fn from_env() -> Result<Self> {
        let api_key = get_api_key()?;
        let model = std::env::var(MODEL_ENV)
            .ok()
            .filter(|m| !m.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_MODEL.to_string());
        Self::new(api_key, model)
    }

    fn endpoint(&self) -> String {
        format!("{}/{}:generateContent", GEMINI_API_BASE, self.model)
    }
}

// ============================================================================
// Wire Types
// ============================================================================

#[derive(Debug, Serialize)]
struct GenerateRequest<'a> {
    #[serde(rename = "systemInstruction")]
    system_instruction: Content<'a>,
    contents: Vec<Content<'a>>,
    #[serde(rename = "generationConfig")]
    generation_config: GenerationConfig,
}

#[derive(Debug, Serialize)]
struct Content<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    role: Option<&'a str>,
    parts: Vec<Part<'a>>,
}

#[derive(Debug, Serialize)]
struct Part<'a> {
    text: &'a str,
}

#[derive(Debug, Serialize)]
struct GenerationConfig {
    temperature: f32,
    #[serde(rename = "maxOutputTokens")]
    max_output_tokens: u32,
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
    #[serde(rename = "promptFeedback")]
    prompt_feedback: Option<PromptFeedback>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    content: Option<CandidateContent>,
    #[serde(rename = "finishReason")]
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<CandidatePart>,
}

#[derive(Debug, Deserialize)]
struct CandidatePart {
    #[serde(default)]
    text: String,
}

#[derive(Debug, Deserialize)]
struct PromptFeedback {
    #[serde(rename = "blockReason")]
    block_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ApiError {
    error: ApiErrorDetail,
}

#[derive(Debug, Deserialize)]
struct ApiErrorDetail {
    message: String,
    #[serde(default)]
    status: String,
}

// ============================================================================
// Response Classification
// ============================================================================

/// HTTP 상태와 본문을 텍스트 또는 분류된 에러로 변환
fn interpret_response(status: u16, body: &str) -> Result<String, LlmError> {
    if status == 429 || status >= 500 {
        return Err(LlmError::Unavailable(format!("HTTP {}", status)));
    }

    if !(200..300).contains(&status) {
        let detail = serde_json::from_str::<ApiError>(body)
            .map(|e| format!("{} ({})", e.error.message, e.error.status))
            .unwrap_or_else(|_| body.chars().take(200).collect());
        return Err(LlmError::Fatal(format!("HTTP {}: {}", status, detail)));
    }

    let response: GenerateResponse = serde_json::from_str(body)
        .map_err(|e| LlmError::Fatal(format!("Failed to parse response: {}", e)))?;

    if let Some(reason) = response.prompt_feedback.and_then(|f| f.block_reason) {
        return Err(LlmError::ContentPolicy(reason));
    }

    let candidate = response
        .candidates
        .into_iter()
        .next()
        .ok_or_else(|| LlmError::Fatal("Response has no candidates".to_string()))?;

    if let Some(reason) = candidate
        .finish_reason
        .as_deref()
        .filter(|r| BLOCKED_FINISH_REASONS.contains(r))
    {
        return Err(LlmError::ContentPolicy(reason.to_string()));
    }

    let text: String = candidate
        .content
        .map(|c| c.parts.into_iter().map(|p| p.text).collect())
        .unwrap_or_default();

    Ok(text)
}

#[async_trait]
impl LanguageModel for GeminiModel {
    async fn complete(&self, prompt: &Prompt) -> Result<String, LlmError> {
        let request = GenerateRequest {
            system_instruction: Content {
                role: None,
                parts: vec![Part {
                    text: &prompt.preamble,
                }],
            },
            contents: vec![Content {
                role: Some("user"),
                parts: vec![Part {
                    text: &prompt.message,
                }],
            }],
            generation_config: GenerationConfig {
                temperature: 0.0,
                max_output_tokens: MAX_OUTPUT_TOKENS,
            },
        };

        // 호출자의 타임아웃 안에서 대기
        self.rate_limiter.lock().await.acquire().await;

        let response = self
            .client
            .post(self.endpoint())
            .header("x-goog-api-key", &self.api_key)
            .json(&request)
            .send()
            .await
            .map_err(|e| LlmError::Unavailable(format!("Request failed: {}", e)))?;

        let status = response.status().as_u16();
        let body = response
            .text()
            .await
            .map_err(|e| LlmError::Unavailable(format!("Failed to read body: {}", e)))?;

        let result = interpret_response(status, &body);
        if let Err(ref e) = result {
            tracing::warn!(model = %self.model, "Gemini completion failed: {}", e);
        }
        result
    }

    fn name(&self) -> &str {
        &self.model
    }
}

// ============================================================================
// API Key Management
// ============================================================================

/// API 키 로드 (환경변수에서)
///
/// 우선순위:
/// 1. `GEMINI_API_KEY`
/// 2. `GOOGLE_AI_API_KEY`
pub fn get_api_key() -> Result<String> {
    for var in ["GEMINI_API_KEY", "GOOGLE_AI_API_KEY"] {
        if let Ok(key) = std::env::var(var) {
            if !key.is_empty() {
                tracing::debug!("Using API key from {}", var);
                return Ok(key);
            }
        }
    }

    anyhow::bail!(
        "API key not found. Set GEMINI_API_KEY or GOOGLE_AI_API_KEY environment variable.\n\
         Get your API key at: https://aistudio.google.com/app/apikey"
    )
}

/// API 키 존재 여부
pub fn has_api_key() -> bool {
    get_api_key().is_ok()
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_success_text_joined() {
        let body = r#"{"candidates":[{"content":{"parts":[{"text":"Paris "},{"text":"is the capital."}]},"finishReason":"STOP"}]}"#;
        assert_eq!(
            interpret_response(200, body),
            Ok("Paris is the capital.".to_string())
        );
    }

    #[test]
    fn test_rate_limit_is_unavailable() {
        let result = interpret_response(429, "{}");
        assert!(matches!(result, Err(LlmError::Unavailable(_))));
    }

    #[test]
    fn test_server_error_is_unavailable() {
        let result = interpret_response(503, "overloaded");
        assert!(matches!(result, Err(LlmError::Unavailable(_))));
    }

    #[test]
    fn test_prompt_block_is_content_policy() {
        let body = r#"{"promptFeedback":{"blockReason":"SAFETY"}}"#;
        assert_eq!(
            interpret_response(200, body),
            Err(LlmError::ContentPolicy("SAFETY".to_string()))
        );
    }

    #[test]
    fn test_safety_finish_is_content_policy() {
        let body = r#"{"candidates":[{"finishReason":"SAFETY"}]}"#;
        assert!(matches!(
            interpret_response(200, body),
            Err(LlmError::ContentPolicy(_))
        ));
    }

    #[test]
    fn test_auth_error_is_fatal() {
        let body = r#"{"error":{"code":403,"message":"API key not valid","status":"PERMISSION_DENIED"}}"#;
        let result = interpret_response(403, body);
        match result {
            Err(LlmError::Fatal(msg)) => assert!(msg.contains("API key not valid")),
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn test_garbage_body_is_fatal() {
        assert!(matches!(
            interpret_response(200, "not json"),
            Err(LlmError::Fatal(_))
        ));
    }

    #[test]
    fn test_request_serialization() {
        let request = GenerateRequest {
            system_instruction: Content {
                role: None,
                parts: vec![Part { text: "be terse" }],
            },
            contents: vec![Content {
                role: Some("user"),
                parts: vec![Part { text: "hi" }],
            }],
            generation_config: GenerationConfig {
                temperature: 0.0,
                max_output_tokens: 16,
            },
        };
        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(json["systemInstruction"]["parts"][0]["text"], "be terse");
        assert!(json["systemInstruction"].get("role").is_none());
        assert_eq!(json["contents"][0]["role"], "user");
        assert_eq!(json["generationConfig"]["maxOutputTokens"], 16);
    }

    #[test]
    fn test_model_name() {
        let model = GeminiModel::new("fake_key".to_string(), "gemini-test").unwrap();
        assert_eq!(model.name(), "gemini-test");
        assert!(model.endpoint().ends_with("gemini-test:generateContent"));
    }
}
