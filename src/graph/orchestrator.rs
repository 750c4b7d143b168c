//! Orchestrator - 교정형(corrective) RAG 루프 실행
//!
//! 상태 하나당 외부 호출 하나를 수행하고, 결과를 [`Event`]로 바꿔
//! [`advance`]에 넘깁니다. 취소 신호는 상태 사이에서만 확인합니다.
//!
//! ## 사용법
//! ```rust,ignore
//! let orchestrator = Orchestrator::new(index, model);
//! let result = orchestrator.run("What is an ETF?", &RunConfig::default()).await;
//! println!("{:?} {:?}", result.terminal, result.answer);
//! ```

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use super::state::{GraphState, RunResult, RunState};
use super::transition::{advance, Event};
use crate::components::{AnswerVerifier, Generator, QueryRewriter, RelevanceGrader, Retriever};
use crate::config::RunConfig;
use crate::error::RagError;
use crate::index::VectorIndex;
use crate::llm::LanguageModel;

/// 실행 1회분 컴포넌트
///
/// 재작성기의 발급 기록이 실행 범위가 되도록 실행마다 새로 만듭니다.
struct Stages {
    retriever: Retriever,
    grader: RelevanceGrader,
    rewriter: QueryRewriter,
    generator: Generator,
    verifier: AnswerVerifier,
}

/// 오케스트레이션 그래프
///
/// 공유 자원은 인덱스와 모델 핸들뿐이므로 여러 실행을 동시에 돌릴 수 있습니다.
///
/// 호출당 타임아웃(`call_timeout_secs`)은 백엔드의 속도 제한 대기를 포함합니다.
/// 속도 제한에 막힌 시간도 타임아웃 예산을 소모하며, 초과하면 일시적 실패로 재시도됩니다.
#[derive(Clone)]
pub struct Orchestrator {
    index: Arc<dyn VectorIndex>,
    model: Arc<dyn LanguageModel>,
}

impl Orchestrator {
    pub fn new(index: Arc<dyn VectorIndex>, model: Arc<dyn LanguageModel>) -> Self {
        Self { index, model }
    }

    /// 질문 하나 실행
    pub async fn run(&self, question: &str, config: &RunConfig) -> RunResult {
        self.run_with_cancel(question, config, CancellationToken::new())
            .await
    }

    /// 취소 가능한 실행
    ///
    /// 항상 `RunResult`를 반환합니다. 재시도 예산 소진은 낮은 신뢰도의 답변이나
    /// 원인 에러가 붙은 FAILED 결과가 됩니다.
    pub async fn run_with_cancel(
        &self,
        question: &str,
        config: &RunConfig,
        cancel: CancellationToken,
    ) -> RunResult {
        let mut run = RunState::new(question);
        let run_id = run.run_id();
        let mut state = GraphState::Retrieving;

        tracing::info!("[{}] Run started ({}): {:?}", run_id, self.model.name(), question);

        if let Err(e) = config.validate() {
            let event = Event::Failed(RagError::ContractViolation(e.to_string()));
            state = advance(state, &mut run, event, config);
        }

        let stages = self.stages(config);

        while !state.is_terminal() {
            let event = if cancel.is_cancelled() {
                Event::Cancelled
            } else {
                self.step(state, &run, &stages, config).await
            };

            let next = advance(state, &mut run, event, config);
            if next != state {
                tracing::info!("[{}] {} -> {}", run_id, state, next);
            }
            state = next;
        }

        let result = run.finish(state);
        tracing::info!(
            "[{}] Run finished: {} ({:?}, {} retrieval / {} generation retries)",
            run_id,
            result.terminal,
            result.confidence,
            result.retrieval_retries,
            result.generation_retries
        );
        result
    }

    fn stages(&self, config: &RunConfig) -> Stages {
        Stages {
            retriever: Retriever::new(self.index.clone(), config.top_k),
            grader: RelevanceGrader::new(self.model.clone()),
            rewriter: QueryRewriter::new(self.model.clone()),
            generator: Generator::new(self.model.clone()),
            verifier: AnswerVerifier::new(self.model.clone()),
        }
    }

    /// 현재 상태의 작업 1회 수행
    async fn step(&self, state: GraphState, run: &RunState, stages: &Stages, config: &RunConfig) -> Event {
        let timeout = config.call_timeout();

        let result = match state {
            GraphState::Retrieving => {
                with_timeout("retrieval", timeout, stages.retriever.retrieve(run.current_query()))
                    .await
                    .map(Event::Retrieved)
            }
            GraphState::Grading => with_timeout(
                "grading",
                timeout,
                stages.grader.grade(run.current_query(), &run.candidates),
            )
            .await
            .map(Event::Graded),
            GraphState::Rewriting => with_timeout(
                "rewrite",
                timeout,
                stages
                    .rewriter
                    .rewrite(run.original_query(), run.current_query(), &run.rejected),
            )
            .await
            .map(Event::Rewritten),
            GraphState::Generating if run.accepted().is_empty() => Ok(Event::NoEvidence),
            GraphState::Generating => with_timeout(
                "generation",
                timeout,
                stages.generator.generate(run.original_query(), run.accepted()),
            )
            .await
            .map(Event::Generated),
            GraphState::Verifying => match run.answer.as_deref() {
                Some(answer) => with_timeout(
                    "verification",
                    timeout,
                    stages.verifier.verify(run.original_query(), answer, run.accepted()),
                )
                .await
                .map(Event::Verified),
                None => Err(RagError::ContractViolation(
                    "verification without a candidate answer".to_string(),
                )),
            },
            GraphState::Done | GraphState::Failed => Err(RagError::ContractViolation(format!(
                "no work in terminal state {}",
                state
            ))),
        };

        result.unwrap_or_else(Event::Failed)
    }
}

/// 외부 호출 타임아웃 (해당 단계의 일시적 실패로 취급)
///
/// 시간은 `call` 전체에 대해 잽니다. 구현체 안의 속도 제한 대기도 포함됩니다.
async fn with_timeout<T>(
    stage: &'static str,
    timeout: Duration,
    call: impl Future<Output = Result<T, RagError>>,
) -> Result<T, RagError> {
    match tokio::time::timeout(timeout, call).await {
        Ok(result) => result,
        Err(_) => Err(RagError::Timeout { stage, timeout }),
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use crate::error::{ErrorKind, IndexError, LlmError};
    use crate::graph::state::{Confidence, VerificationOutcome};
    use crate::graph::transition::INSUFFICIENT_INFORMATION_ANSWER;
    use crate::index::MemoryIndex;
    use crate::testing::{hit, FnIndex, KeywordEmbedder, PromptRole, ScriptedModel};

    const YES: &str = r#"{"binary_score": "yes"}"#;
    const NO: &str = r#"{"binary_score": "no"}"#;

    fn paris_index() -> Arc<FnIndex> {
        Arc::new(FnIndex::new(|_, _| {
            Ok(vec![hit("paris", "Paris is the capital of France.", 0.92)])
        }))
    }

    /// 모든 평가가 긍정인 모델
    fn agreeable_model() -> Arc<ScriptedModel> {
        Arc::new(ScriptedModel::new(|role, _| match role {
            PromptRole::Generation => Ok("Paris is the capital of France.".to_string()),
            PromptRole::Rewrite => Ok("capital city of France".to_string()),
            _ => Ok(YES.to_string()),
        }))
    }

    /// 매번 다른 쿼리를 내는 재작성 응답
    fn distinct_rewrites() -> impl Fn() -> String + Send + Sync + 'static {
        let counter = AtomicUsize::new(0);
        move || format!("query variant {}", counter.fetch_add(1, Ordering::SeqCst))
    }

    #[tokio::test]
    async fn test_capital_of_france_happy_path() {
        let model = agreeable_model();
        let orchestrator = Orchestrator::new(paris_index(), model.clone());

        let result = orchestrator
            .run("What is the capital of France?", &RunConfig::default())
            .await;

        assert_eq!(
            result.path,
            vec![
                GraphState::Retrieving,
                GraphState::Grading,
                GraphState::Generating,
                GraphState::Verifying,
                GraphState::Done
            ]
        );
        assert!(result.answer.as_deref().unwrap().contains("Paris"));
        assert_eq!(result.confidence, Confidence::Normal);
        assert_eq!(result.outcome, Some(VerificationOutcome::GroundedAndAnswers));
        assert_eq!(result.sources, vec!["test://paris".to_string()]);
        assert!(result.error_kind.is_none());
    }

    #[tokio::test]
    async fn test_always_irrelevant_retrieves_three_times() {
        let rewrite = distinct_rewrites();
        let model = Arc::new(ScriptedModel::new(move |role, _| match role {
            PromptRole::Relevance => Ok(NO.to_string()),
            PromptRole::Rewrite => Ok(rewrite()),
            _ => Ok(YES.to_string()),
        }));
        let index = Arc::new(FnIndex::new(|_, _| {
            Ok(vec![hit("banana", "Bananas are yellow.", 0.4)])
        }));
        let config = RunConfig {
            max_retrieval_retries: 2,
            ..RunConfig::default()
        };

        let result = Orchestrator::new(index.clone(), model.clone())
            .run("What is the capital of France?", &config)
            .await;

        assert_eq!(result.visits(GraphState::Retrieving), 3);
        assert_eq!(index.calls(), 3);
        assert_eq!(result.visits(GraphState::Generating), 1);
        assert_eq!(result.terminal, GraphState::Done);
        assert_eq!(result.confidence, Confidence::Low);
        assert_eq!(result.answer.as_deref(), Some(INSUFFICIENT_INFORMATION_ANSWER));
        assert_eq!(result.final_query, "query variant 1");
        // 근거 없이 생성기를 부르지 않음
        assert_eq!(model.calls(PromptRole::Generation), 0);
    }

    #[tokio::test]
    async fn test_zero_passages_terminates_low_confidence() {
        let model = Arc::new(ScriptedModel::new(|role, _| match role {
            // 원본 질문을 되풀이 -> 정체
            PromptRole::Rewrite => Ok("What is an ETF?".to_string()),
            _ => Ok(YES.to_string()),
        }));
        let index = Arc::new(FnIndex::new(|_, _| Ok(vec![])));

        let result = Orchestrator::new(index, model.clone())
            .run("What is an ETF?", &RunConfig::default())
            .await;

        assert_eq!(
            result.path,
            vec![
                GraphState::Retrieving,
                GraphState::Grading,
                GraphState::Rewriting,
                GraphState::Generating,
                GraphState::Done
            ]
        );
        assert_eq!(result.confidence, Confidence::Low);
        assert_eq!(model.calls(PromptRole::Relevance), 0);
    }

    #[tokio::test]
    async fn test_content_policy_fails_regardless_of_budget() {
        let model = Arc::new(ScriptedModel::new(|role, _| match role {
            PromptRole::Generation => Err(LlmError::ContentPolicy("SAFETY".into())),
            _ => Ok(YES.to_string()),
        }));
        let config = RunConfig {
            max_generation_retries: 5,
            max_transient_retries: 5,
            ..RunConfig::default()
        };

        let result = Orchestrator::new(paris_index(), model.clone())
            .run("What is the capital of France?", &config)
            .await;

        assert_eq!(result.terminal, GraphState::Failed);
        assert_eq!(result.error_kind, Some(ErrorKind::ContentPolicyViolation));
        assert!(result.answer.is_none());
        assert_eq!(model.calls(PromptRole::Generation), 1);
    }

    #[tokio::test]
    async fn test_generation_outage_exhausts_generation_budget() {
        let model = Arc::new(ScriptedModel::new(|role, _| match role {
            PromptRole::Generation => Err(LlmError::Unavailable("503".into())),
            _ => Ok(YES.to_string()),
        }));

        let result = Orchestrator::new(paris_index(), model.clone())
            .run("What is the capital of France?", &RunConfig::default())
            .await;

        assert_eq!(result.terminal, GraphState::Failed);
        assert_eq!(result.error_kind, Some(ErrorKind::TransientUnavailable));
        assert_eq!(model.calls(PromptRole::Generation), 3);
        assert_eq!(result.visits(GraphState::Generating), 1);
    }

    #[tokio::test]
    async fn test_persistent_hallucination_returns_low_confidence() {
        let model = Arc::new(ScriptedModel::new(|role, _| match role {
            PromptRole::Groundedness => Ok(NO.to_string()),
            PromptRole::Generation => Ok("Lyon.".to_string()),
            _ => Ok(YES.to_string()),
        }));

        let result = Orchestrator::new(paris_index(), model.clone())
            .run("What is the capital of France?", &RunConfig::default())
            .await;

        assert_eq!(result.terminal, GraphState::Done);
        assert_eq!(result.confidence, Confidence::Low);
        assert_eq!(result.outcome, Some(VerificationOutcome::Hallucinated));
        assert_eq!(result.visits(GraphState::Generating), 3);
        assert_eq!(model.calls(PromptRole::Generation), 3);
        assert_eq!(model.calls(PromptRole::AnswerCheck), 0);
    }

    #[tokio::test]
    async fn test_off_topic_answer_stays_within_bounds() {
        let rewrite = distinct_rewrites();
        let model = Arc::new(ScriptedModel::new(move |role, _| match role {
            PromptRole::AnswerCheck => Ok(NO.to_string()),
            PromptRole::Rewrite => Ok(rewrite()),
            PromptRole::Generation => Ok("Something else.".to_string()),
            _ => Ok(YES.to_string()),
        }));
        let config = RunConfig::default();

        let result = Orchestrator::new(paris_index(), model)
            .run("What is the capital of France?", &config)
            .await;

        assert_eq!(result.terminal, GraphState::Done);
        assert_eq!(result.confidence, Confidence::Low);
        assert!(result.visits(GraphState::Retrieving) <= config.max_retrieval_retries as usize + 1);
        assert!(result.visits(GraphState::Generating) <= config.max_generation_retries as usize + 1);
        assert!(result.visits(GraphState::Rewriting) >= 1);
    }

    #[tokio::test]
    async fn test_index_outage_fails_after_transient_budget() {
        let index = Arc::new(FnIndex::new(|_, _| {
            Err(IndexError::Unavailable("connection refused".into()))
        }));

        let result = Orchestrator::new(index.clone(), agreeable_model())
            .run("q", &RunConfig::default())
            .await;

        assert_eq!(result.terminal, GraphState::Failed);
        assert_eq!(result.error_kind, Some(ErrorKind::TransientUnavailable));
        assert_eq!(index.calls(), 3);
        assert_eq!(result.transient_retries, 2);
        assert_eq!(result.path, vec![GraphState::Retrieving, GraphState::Failed]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_grading_timeout_is_transient() {
        let model = ScriptedModel::new(|_, _| Ok(YES.to_string()))
            .with_delay(PromptRole::Relevance, Duration::from_secs(60));
        let config = RunConfig {
            call_timeout_secs: 1,
            ..RunConfig::default()
        };

        let result = Orchestrator::new(paris_index(), Arc::new(model))
            .run("What is the capital of France?", &config)
            .await;

        assert_eq!(result.terminal, GraphState::Failed);
        assert_eq!(result.error_kind, Some(ErrorKind::TransientUnavailable));
        assert!(result.error.as_deref().unwrap().contains("grading timed out"));
        assert_eq!(result.transient_retries, 2);
    }

    /// 응답 전에 공유 슬롯을 기다리는 모델 (속도 제한 대기열)
    struct QueuedModel {
        slot: Arc<tokio::sync::Mutex<()>>,
    }

    #[async_trait::async_trait]
    impl LanguageModel for QueuedModel {
        async fn complete(&self, _prompt: &crate::llm::Prompt) -> Result<String, LlmError> {
            let _slot = self.slot.lock().await;
            Ok(YES.to_string())
        }

        fn name(&self) -> &str {
            "queued"
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_call_timeout_includes_queueing_for_a_slot() {
        let slot = Arc::new(tokio::sync::Mutex::new(()));
        let _held = slot.clone().lock_owned().await;
        let config = RunConfig {
            call_timeout_secs: 2,
            ..RunConfig::default()
        };

        let started = tokio::time::Instant::now();
        let result = Orchestrator::new(paris_index(), Arc::new(QueuedModel { slot }))
            .run("What is the capital of France?", &config)
            .await;

        assert_eq!(result.terminal, GraphState::Failed);
        assert_eq!(result.error_kind, Some(ErrorKind::TransientUnavailable));
        assert!(result.error.as_deref().unwrap().contains("grading timed out"));
        // 최초 시도 + 재시도 2회, 각각 타임아웃까지 대기
        let elapsed = started.elapsed();
        assert!(elapsed >= Duration::from_secs(6) && elapsed < Duration::from_secs(7));
    }

    #[tokio::test]
    async fn test_cancel_before_start_makes_no_calls() {
        let index = paris_index();
        let cancel = CancellationToken::new();
        cancel.cancel();

        let result = Orchestrator::new(index.clone(), agreeable_model())
            .run_with_cancel("q", &RunConfig::default(), cancel)
            .await;

        assert_eq!(result.terminal, GraphState::Failed);
        assert_eq!(result.error_kind, Some(ErrorKind::Cancelled));
        assert_eq!(result.path, vec![GraphState::Retrieving, GraphState::Failed]);
        assert_eq!(index.calls(), 0);
    }

    #[tokio::test]
    async fn test_cancel_between_states_stops_further_calls() {
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        let model = Arc::new(ScriptedModel::new(move |role, _| match role {
            PromptRole::Generation => {
                trigger.cancel();
                Ok("Paris.".to_string())
            }
            _ => Ok(YES.to_string()),
        }));

        let result = Orchestrator::new(paris_index(), model.clone())
            .run_with_cancel("What is the capital of France?", &RunConfig::default(), cancel)
            .await;

        assert_eq!(result.terminal, GraphState::Failed);
        assert_eq!(result.error_kind, Some(ErrorKind::Cancelled));
        assert_eq!(model.calls(PromptRole::Groundedness), 0);
        assert_eq!(result.visits(GraphState::Verifying), 1);
    }

    #[tokio::test]
    async fn test_invalid_config_fails_without_calls() {
        let index = paris_index();
        let config = RunConfig {
            top_k: 0,
            ..RunConfig::default()
        };

        let result = Orchestrator::new(index.clone(), agreeable_model())
            .run("q", &config)
            .await;

        assert_eq!(result.error_kind, Some(ErrorKind::ContractViolation));
        assert_eq!(index.calls(), 0);
    }

    #[tokio::test]
    async fn test_concurrent_runs_share_index() {
        let index = Arc::new(MemoryIndex::new(Arc::new(KeywordEmbedder::default())));
        index
            .add_chunks(
                "geo",
                &[
                    "Paris is the capital of France.".to_string(),
                    "Berlin is the capital of Germany.".to_string(),
                ],
            )
            .await
            .unwrap();

        let model = Arc::new(ScriptedModel::new(|role, prompt| match role {
            PromptRole::Generation if prompt.message.contains("Germany") => {
                Ok("Berlin is the capital of Germany.".to_string())
            }
            PromptRole::Generation => Ok("Paris is the capital of France.".to_string()),
            _ => Ok(YES.to_string()),
        }));
        let orchestrator = Orchestrator::new(index, model);
        let config = RunConfig {
            top_k: 1,
            ..RunConfig::default()
        };

        let (france, germany) = tokio::join!(
            orchestrator.run("What is the capital of France?", &config),
            orchestrator.run("What is the capital of Germany?", &config),
        );

        assert!(france.is_done() && germany.is_done());
        assert_ne!(france.run_id, germany.run_id);
        assert!(france.answer.as_deref().unwrap().contains("Paris"));
        assert!(germany.answer.as_deref().unwrap().contains("Berlin"));
    }
}
