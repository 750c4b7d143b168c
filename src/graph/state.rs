//! 실행 상태 타입
//!
//! `RunState`는 실행 1회 동안 오케스트레이터가 독점 소유하며,
//! [`RunState::finish`]로 소비되어 `RunResult`가 됩니다.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{ErrorKind, RagError};
use crate::index::IndexHit;

// ============================================================================
// Query
// ============================================================================

/// 검색 쿼리 (불변)
///
/// 재작성 시 새 값으로 교체되며 `attempt`가 1 증가합니다.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Query {
    text: String,
    attempt: u32,
}

impl Query {
    /// 사용자 원본 질문 (attempt 0)
    pub fn original(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            attempt: 0,
        }
    }

    /// 이 쿼리를 대체할 재작성 쿼리
    pub fn rewritten(&self, text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            attempt: self.attempt + 1,
        }
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn attempt(&self) -> u32 {
        self.attempt
    }
}

// ============================================================================
// Passage
// ============================================================================

/// 검색된 패시지 (불변)
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Passage {
    chunk_id: String,
    source: String,
    text: String,
    score: f32,
}

impl Passage {
    pub fn new(
        chunk_id: impl Into<String>,
        source: impl Into<String>,
        text: impl Into<String>,
        score: f32,
    ) -> Self {
        Self {
            chunk_id: chunk_id.into(),
            source: source.into(),
            text: text.into(),
            score,
        }
    }

    /// 청크 식별자
    pub fn chunk_id(&self) -> &str {
        &self.chunk_id
    }

    /// 원본 문서 식별자 (URL 등)
    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    /// 유사도 스코어
    pub fn score(&self) -> f32 {
        self.score
    }
}

impl From<IndexHit> for Passage {
    fn from(hit: IndexHit) -> Self {
        Self {
            chunk_id: hit.chunk_id,
            source: hit.source,
            text: hit.text,
            score: hit.score,
        }
    }
}

/// 관련성 라벨
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Relevance {
    Relevant,
    Irrelevant,
}

/// 관련성 라벨이 붙은 패시지
#[derive(Debug, Clone, PartialEq)]
pub struct GradedPassage {
    pub passage: Passage,
    pub relevance: Relevance,
}

// ============================================================================
// Outcomes
// ============================================================================

/// 답변 검증 결과
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VerificationOutcome {
    /// 근거 있고 질문을 해결함
    GroundedAndAnswers,
    /// 근거 있으나 질문 일부만 해결
    GroundedButIncomplete,
    /// 패시지에 근거하지 않음
    Hallucinated,
    /// 질문과 무관 (근거 자체가 잘못됨)
    OffTopic,
}

/// 오케스트레이션 그래프 상태
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum GraphState {
    Retrieving,
    Grading,
    Rewriting,
    Generating,
    Verifying,
    Done,
    Failed,
}

impl GraphState {
    pub fn is_terminal(self) -> bool {
        matches!(self, GraphState::Done | GraphState::Failed)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            GraphState::Retrieving => "RETRIEVING",
            GraphState::Grading => "GRADING",
            GraphState::Rewriting => "REWRITING",
            GraphState::Generating => "GENERATING",
            GraphState::Verifying => "VERIFYING",
            GraphState::Done => "DONE",
            GraphState::Failed => "FAILED",
        }
    }
}

impl std::fmt::Display for GraphState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 답변 신뢰도
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Confidence {
    Normal,
    Low,
}

// ============================================================================
// RunState
// ============================================================================

/// 실행 1회의 상태
#[derive(Debug)]
pub struct RunState {
    pub(crate) run_id: Uuid,
    pub(crate) original_query: Query,
    pub(crate) current_query: Query,
    /// 채택된 패시지 (chunk_id 기준 중복 없음)
    pub(crate) accepted: Vec<Passage>,
    /// 검색 직후, 평가 대기 중인 패시지
    pub(crate) candidates: Vec<Passage>,
    /// 현재 쿼리에서 기각된 패시지 (재작성 입력)
    pub(crate) rejected: Vec<Passage>,
    pub(crate) answer: Option<String>,
    pub(crate) retrieval_retries: u32,
    pub(crate) generation_retries: u32,
    pub(crate) transient_retries: u32,
    /// GENERATING 진입 횟수
    pub(crate) generation_entries: u32,
    pub(crate) outcome: Option<VerificationOutcome>,
    /// 최선 노력(best-effort) 폴백을 거쳤는지
    pub(crate) degraded: bool,
    pub(crate) error: Option<RagError>,
    pub(crate) path: Vec<GraphState>,
    terminal: bool,
}

impl RunState {
    /// 원본 질문으로 초기 상태 생성 (RETRIEVING에서 시작)
    pub fn new(question: &str) -> Self {
        let query = Query::original(question);
        Self {
            run_id: Uuid::new_v4(),
            original_query: query.clone(),
            current_query: query,
            accepted: Vec::new(),
            candidates: Vec::new(),
            rejected: Vec::new(),
            answer: None,
            retrieval_retries: 0,
            generation_retries: 0,
            transient_retries: 0,
            generation_entries: 0,
            outcome: None,
            degraded: false,
            error: None,
            path: vec![GraphState::Retrieving],
            terminal: false,
        }
    }

    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    pub fn original_query(&self) -> &Query {
        &self.original_query
    }

    pub fn current_query(&self) -> &Query {
        &self.current_query
    }

    pub fn accepted(&self) -> &[Passage] {
        &self.accepted
    }

    pub fn path(&self) -> &[GraphState] {
        &self.path
    }

    pub fn is_terminal(&self) -> bool {
        self.terminal
    }

    /// 채택 목록에 추가 (이미 있으면 무시)
    pub(crate) fn accept(&mut self, passages: Vec<Passage>) {
        let mut seen: HashSet<String> =
            self.accepted.iter().map(|p| p.chunk_id.clone()).collect();
        for passage in passages {
            if seen.insert(passage.chunk_id.clone()) {
                self.accepted.push(passage);
            }
        }
    }

    /// 실행 종료
    ///
    /// `terminal`은 여기서 한 번만, 마지막 변경으로 설정됩니다.
    pub fn finish(mut self, state: GraphState) -> RunResult {
        debug_assert!(state.is_terminal());
        debug_assert!(!self.terminal);

        let (answer, confidence) = match state {
            GraphState::Done => {
                let normal = !self.degraded
                    && self.outcome == Some(VerificationOutcome::GroundedAndAnswers);
                let confidence = if normal {
                    Confidence::Normal
                } else {
                    Confidence::Low
                };
                (self.answer.take(), confidence)
            }
            _ => (None, Confidence::Low),
        };

        let result = RunResult {
            run_id: self.run_id,
            terminal: state,
            answer,
            confidence,
            error_kind: self.error.as_ref().map(RagError::kind),
            error: self.error.as_ref().map(|e| e.to_string()),
            outcome: self.outcome,
            final_query: self.current_query.text.clone(),
            sources: self.accepted.iter().map(|p| p.source.clone()).collect(),
            retrieval_retries: self.retrieval_retries,
            generation_retries: self.generation_retries,
            transient_retries: self.transient_retries,
            path: std::mem::take(&mut self.path),
        };

        self.terminal = true;
        result
    }
}

// ============================================================================
// RunResult
// ============================================================================

/// 실행 결과
#[derive(Debug, Clone, Serialize)]
pub struct RunResult {
    pub run_id: Uuid,
    /// 도달한 종료 상태 (DONE / FAILED)
    pub terminal: GraphState,
    /// 최종 답변 (FAILED면 없음)
    pub answer: Option<String>,
    pub confidence: Confidence,
    /// FAILED 원인 분류
    pub error_kind: Option<ErrorKind>,
    pub error: Option<String>,
    /// 마지막 검증 결과
    pub outcome: Option<VerificationOutcome>,
    /// 마지막으로 사용한 쿼리
    pub final_query: String,
    /// 채택된 패시지의 출처
    pub sources: Vec<String>,
    pub retrieval_retries: u32,
    pub generation_retries: u32,
    pub transient_retries: u32,
    /// 방문한 상태 순서 (진단용)
    pub path: Vec<GraphState>,
}

impl RunResult {
    /// 특정 상태 진입 횟수
    pub fn visits(&self, state: GraphState) -> usize {
        self.path.iter().filter(|s| **s == state).count()
    }

    pub fn is_done(&self) -> bool {
        self.terminal == GraphState::Done
    }
}

// ============================================================================
// Tests
// ============================================================================
