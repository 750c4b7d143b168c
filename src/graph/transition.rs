//! 상태 전이 함수
//!
//! `advance(state, run, event, config)`는 (현재 상태, 실행 상태, 단계 결과)에 대한
//! 전체 함수입니다. 외부 호출은 하지 않고 `RunState`의 카운터와 패시지 목록만 갱신합니다.
//!
//! 재시도 카운터는 설정된 최대값을 넘지 않습니다.
//! - RETRIEVING 진입 횟수 ≤ max_retrieval_retries + 1
//! - GENERATING 진입 횟수 ≤ max_generation_retries + 1

use super::state::{GradedPassage, GraphState, Passage, Query, Relevance, RunState, VerificationOutcome};
use crate::config::RunConfig;
use crate::error::{ErrorKind, RagError};

/// 근거가 하나도 없을 때의 고정 답변
pub const INSUFFICIENT_INFORMATION_ANSWER: &str =
    "I could not find enough information in the indexed documents to answer this question.";

// ============================================================================
// Event
// ============================================================================

/// 한 상태의 작업 결과
#[derive(Debug, Clone)]
pub enum Event {
    /// 검색 완료 (0건 포함)
    Retrieved(Vec<Passage>),
    /// 관련성 평가 완료
    Graded(Vec<GradedPassage>),
    /// 새 쿼리 생성
    Rewritten(Query),
    /// 후보 답변 생성
    Generated(String),
    /// 채택된 패시지 없이 GENERATING에 진입
    NoEvidence,
    /// 답변 검증 완료
    Verified(VerificationOutcome),
    /// 분류된 컴포넌트 실패 (타임아웃 포함)
    Failed(RagError),
    /// 외부 취소 신호
    Cancelled,
}

impl Event {
    pub fn name(&self) -> &'static str {
        match self {
            Event::Retrieved(_) => "retrieved",
            Event::Graded(_) => "graded",
            Event::Rewritten(_) => "rewritten",
            Event::Generated(_) => "generated",
            Event::NoEvidence => "no_evidence",
            Event::Verified(_) => "verified",
            Event::Failed(_) => "failed",
            Event::Cancelled => "cancelled",
        }
    }
}

// ============================================================================
// Transition
// ============================================================================

/// 다음 상태 계산
///
/// 상태가 바뀌면 `run.path`에 다음 상태를 추가합니다.
/// 일시적 실패의 재시도는 같은 상태에 머무르므로 경로에 남지 않습니다.
pub fn advance(state: GraphState, run: &mut RunState, event: Event, config: &RunConfig) -> GraphState {
    if state.is_terminal() {
        tracing::debug!("[{}] Ignoring {} in terminal state {}", run.run_id, event.name(), state);
        return state;
    }

    let next = match event {
        Event::Cancelled => fail(run, RagError::Cancelled),
        Event::Failed(err) => on_failure(state, run, err, config),
        event => on_success(state, run, event, config),
    };

    if next != state {
        run.path.push(next);
    }
    next
}

fn on_success(state: GraphState, run: &mut RunState, event: Event, config: &RunConfig) -> GraphState {
    match (state, event) {
        (GraphState::Retrieving, Event::Retrieved(passages)) => {
            run.candidates = passages;
            GraphState::Grading
        }

        (GraphState::Grading, Event::Graded(graded)) => {
            run.candidates.clear();

            let mut relevant = Vec::new();
            for GradedPassage { passage, relevance } in graded {
                match relevance {
                    Relevance::Relevant => relevant.push(passage),
                    Relevance::Irrelevant => run.rejected.push(passage),
                }
            }
            let any_relevant = !relevant.is_empty();
            run.accept(relevant);

            if any_relevant && run.accepted.len() >= config.evidence_threshold() {
                enter_generating(run, config)
            } else if run.retrieval_retries < config.max_retrieval_retries {
                tracing::info!(
                    "[{}] Insufficient evidence ({} accepted), rewriting query",
                    run.run_id,
                    run.accepted.len()
                );
                GraphState::Rewriting
            } else {
                tracing::warn!(
                    "[{}] Retrieval retries exhausted ({}), generating best effort",
                    run.run_id,
                    run.retrieval_retries
                );
                fall_back_to_generation(run, config)
            }
        }

        (GraphState::Rewriting, Event::Rewritten(query)) => {
            if run.retrieval_retries >= config.max_retrieval_retries {
                return fall_back_to_generation(run, config);
            }
            run.current_query = query;
            run.retrieval_retries += 1;
            run.rejected.clear();
            GraphState::Retrieving
        }

        (GraphState::Generating, Event::Generated(answer)) => {
            run.answer = Some(answer);
            GraphState::Verifying
        }

        (GraphState::Generating, Event::NoEvidence) => {
            run.answer = Some(INSUFFICIENT_INFORMATION_ANSWER.to_string());
            run.degraded = true;
            GraphState::Done
        }

        (GraphState::Verifying, Event::Verified(outcome)) => {
            run.outcome = Some(outcome);
            on_verified(run, outcome, config)
        }

        (state, event) => fail(
            run,
            RagError::ContractViolation(format!(
                "event '{}' is not valid in state {}",
                event.name(),
                state
            )),
        ),
    }
}

fn on_verified(run: &mut RunState, outcome: VerificationOutcome, config: &RunConfig) -> GraphState {
    let can_regenerate = run.generation_retries < config.max_generation_retries;

    match outcome {
        VerificationOutcome::GroundedAndAnswers => GraphState::Done,

        VerificationOutcome::Hallucinated | VerificationOutcome::GroundedButIncomplete => {
            if can_regenerate {
                tracing::info!("[{}] Answer {:?}, regenerating", run.run_id, outcome);
                enter_generating(run, config)
            } else {
                tracing::warn!("[{}] Generation retries exhausted, returning best answer", run.run_id);
                GraphState::Done
            }
        }

        VerificationOutcome::OffTopic => {
            // 재검색 후에도 GENERATING에 한 번 더 들어가야 하므로 생성 예산도 확인
            if run.retrieval_retries < config.max_retrieval_retries && can_regenerate {
                tracing::info!("[{}] Answer off topic, discarding evidence", run.run_id);
                let discarded = std::mem::take(&mut run.accepted);
                run.rejected.extend(discarded);
                GraphState::Rewriting
            } else if can_regenerate {
                enter_generating(run, config)
            } else {
                GraphState::Done
            }
        }
    }
}

fn on_failure(state: GraphState, run: &mut RunState, err: RagError, config: &RunConfig) -> GraphState {
    match err.kind() {
        ErrorKind::ContentPolicyViolation | ErrorKind::ContractViolation | ErrorKind::Cancelled => {
            tracing::error!("[{}] {} failed: {}", run.run_id, state, err);
            fail(run, err)
        }

        ErrorKind::RewriteStalled if state == GraphState::Rewriting => {
            tracing::warn!("[{}] Rewrite stalled, generating best effort", run.run_id);
            fall_back_to_generation(run, config)
        }

        ErrorKind::RewriteStalled => fail(
            run,
            RagError::ContractViolation(format!("rewrite stall reported in state {}", state)),
        ),

        ErrorKind::TransientUnavailable if state == GraphState::Generating => {
            if run.generation_retries < config.max_generation_retries {
                run.generation_retries += 1;
                tracing::warn!(
                    "[{}] Generation failed ({}), retry {}/{}",
                    run.run_id,
                    err,
                    run.generation_retries,
                    config.max_generation_retries
                );
                GraphState::Generating
            } else {
                tracing::error!("[{}] Generation retries exhausted: {}", run.run_id, err);
                fail(run, err)
            }
        }

        ErrorKind::TransientUnavailable => {
            if run.transient_retries < config.max_transient_retries {
                run.transient_retries += 1;
                tracing::warn!(
                    "[{}] {} failed ({}), retry {}/{}",
                    run.run_id,
                    state,
                    err,
                    run.transient_retries,
                    config.max_transient_retries
                );
                return state;
            }

            tracing::warn!("[{}] Transient retries exhausted in {}: {}", run.run_id, state, err);
            match state {
                GraphState::Rewriting => fall_back_to_generation(run, config),
                GraphState::Verifying => {
                    run.degraded = true;
                    GraphState::Done
                }
                _ => fail(run, err),
            }
        }
    }
}

/// GENERATING 진입
///
/// 첫 진입 이후의 모든 진입은 생성 재시도 1회를 소비합니다.
fn enter_generating(run: &mut RunState, config: &RunConfig) -> GraphState {
    if run.generation_entries > 0 {
        if run.generation_retries >= config.max_generation_retries {
            run.degraded = true;
            return if run.answer.is_some() {
                GraphState::Done
            } else {
                fail(
                    run,
                    RagError::ContractViolation("generation budget exhausted without an answer".into()),
                )
            };
        }
        run.generation_retries += 1;
    }
    run.generation_entries += 1;
    GraphState::Generating
}

fn fall_back_to_generation(run: &mut RunState, config: &RunConfig) -> GraphState {
    run.degraded = true;
    enter_generating(run, config)
}

fn fail(run: &mut RunState, err: RagError) -> GraphState {
    run.error = Some(err);
    GraphState::Failed
}

// ============================================================================
// Tests
// ============================================================================
