//! 에러 모듈 - 컴포넌트 실패 분류
//!
//! 모든 컴포넌트 실패는 오케스트레이터가 처리하기 전에
//! [`ErrorKind`] 중 하나로 분류됩니다.
//!
//! - `TransientUnavailable`: 재시도 예산 내에서 재시도
//! - `ContentPolicyViolation`: 즉시 실패 (재시도 없음)
//! - `RewriteStalled`: 실패가 아닌 폴백 트리거
//! - `ContractViolation`: 프로그래머 에러, 항상 치명적
//! - `Cancelled`: 외부 취소 신호

use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

// ============================================================================
// ErrorKind
// ============================================================================

/// 에러 분류
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    TransientUnavailable,
    ContentPolicyViolation,
    RewriteStalled,
    ContractViolation,
    Cancelled,
}

impl ErrorKind {
    /// 재시도 가능 여부
    pub fn is_retryable(self) -> bool {
        matches!(self, ErrorKind::TransientUnavailable)
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ErrorKind::TransientUnavailable => "transient_unavailable",
            ErrorKind::ContentPolicyViolation => "content_policy_violation",
            ErrorKind::RewriteStalled => "rewrite_stalled",
            ErrorKind::ContractViolation => "contract_violation",
            ErrorKind::Cancelled => "cancelled",
        };
        f.write_str(s)
    }
}

// ============================================================================
// RagError
// ============================================================================

/// 파이프라인 컴포넌트 에러
#[derive(Debug, Clone, PartialEq, Error)]
pub enum RagError {
    #[error("vector index unavailable: {0}")]
    IndexUnavailable(String),

    #[error("relevance grading unavailable: {0}")]
    GradingUnavailable(String),

    #[error("language model unavailable: {0}")]
    ModelUnavailable(String),

    #[error("content policy violation: {0}")]
    ContentPolicy(String),

    #[error("query rewrite stalled: no new query could be produced")]
    RewriteStalled,

    #[error("generator called without supporting passages")]
    InsufficientEvidence,

    #[error("contract violation: {0}")]
    ContractViolation(String),

    #[error("{stage} timed out after {timeout:?}")]
    Timeout { stage: &'static str, timeout: Duration },

    #[error("run cancelled")]
    Cancelled,
}

impl RagError {
    /// 에러 분류
    ///
    /// 타임아웃은 해당 단계의 일시적 실패와 동일하게 취급됩니다.
    pub fn kind(&self) -> ErrorKind {
        match self {
            RagError::IndexUnavailable(_)
            | RagError::GradingUnavailable(_)
            | RagError::ModelUnavailable(_)
            | RagError::Timeout { .. } => ErrorKind::TransientUnavailable,
            RagError::ContentPolicy(_) => ErrorKind::ContentPolicyViolation,
            RagError::RewriteStalled => ErrorKind::RewriteStalled,
            RagError::InsufficientEvidence | RagError::ContractViolation(_) => {
                ErrorKind::ContractViolation
            }
            RagError::Cancelled => ErrorKind::Cancelled,
        }
    }
}

// ============================================================================
// Backend Errors
// ============================================================================

/// 언어 모델 백엔드 에러
#[derive(Debug, Clone, PartialEq, Error)]
pub enum LlmError {
    /// 일시적 사용 불가 (429, 5xx, 네트워크)
    #[error("model backend unavailable: {0}")]
    Unavailable(String),

    /// 콘텐츠 정책 차단 (재시도 불가)
    #[error("blocked by content policy: {0}")]
    ContentPolicy(String),

    /// 인증 실패, 잘못된 요청, 파싱 불가 응답
    #[error("model backend error: {0}")]
    Fatal(String),
}

impl LlmError {
    /// 컴포넌트 에러로 변환
    ///
    /// `unavailable`은 일시적 실패를 해당 단계의 에러로 감싸는 생성자입니다.
    pub fn classify(self, unavailable: fn(String) -> RagError) -> RagError {
        match self {
            LlmError::Unavailable(msg) => unavailable(msg),
            LlmError::ContentPolicy(msg) => RagError::ContentPolicy(msg),
            LlmError::Fatal(msg) => RagError::ContractViolation(msg),
        }
    }
}

/// 임베딩 백엔드 에러
#[derive(Debug, Clone, PartialEq, Error)]
pub enum EmbedError {
    /// 일시적 사용 불가 (429, 5xx, 네트워크)
    #[error("embedding backend unavailable: {0}")]
    Unavailable(String),

    /// 인증 실패, 잘못된 요청, 파싱 불가 응답, 차원 불일치
    #[error("embedding rejected: {0}")]
    Rejected(String),
}

/// 벡터 인덱스 에러
#[derive(Debug, Error)]
pub enum IndexError {
    /// 연결 실패 또는 임베딩 백엔드 사용 불가
    #[error("index unreachable: {0}")]
    Unavailable(String),

    /// 저장소 포맷/스키마 에러
    #[error("index storage error: {0}")]
    Storage(String),
}

impl From<IndexError> for RagError {
    fn from(err: IndexError) -> Self {
        match err {
            IndexError::Unavailable(msg) => RagError::IndexUnavailable(msg),
            IndexError::Storage(msg) => RagError::ContractViolation(msg),
        }
    }
}

impl From<EmbedError> for IndexError {
    fn from(err: EmbedError) -> Self {
        match err {
            EmbedError::Unavailable(msg) => IndexError::Unavailable(msg),
            EmbedError::Rejected(msg) => IndexError::Storage(msg),
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
