//! 테스트 전용 대역 (스크립트 모델, 키워드 임베더, 클로저 인덱스)

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;

use crate::components::prompts;
use crate::embedding::{EmbedTask, EmbeddingProvider};
use crate::error::{EmbedError, IndexError, LlmError};
use crate::index::{IndexHit, VectorIndex};
use crate::llm::{LanguageModel, Prompt};

// ============================================================================
// ScriptedModel
// ============================================================================

/// 프롬프트 용도 (프리앰블로 판별)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PromptRole {
    Relevance,
    Groundedness,
    AnswerCheck,
    Rewrite,
    Generation,
}

impl PromptRole {
    pub fn of(prompt: &Prompt) -> Self {
        match prompt.preamble.as_str() {
            p if p == prompts::RELEVANCE_PREAMBLE => PromptRole::Relevance,
            p if p == prompts::GROUNDEDNESS_PREAMBLE => PromptRole::Groundedness,
            p if p == prompts::ANSWER_PREAMBLE => PromptRole::AnswerCheck,
            p if p == prompts::REWRITE_PREAMBLE => PromptRole::Rewrite,
            p if p == prompts::GENERATION_PREAMBLE => PromptRole::Generation,
            other => panic!("unknown preamble: {}", other),
        }
    }
}

type Script = Box<dyn Fn(PromptRole, &Prompt) -> Result<String, LlmError> + Send + Sync>;

/// 용도별로 응답을 정하는 언어 모델
pub struct ScriptedModel {
    script: Script,
    calls: Mutex<HashMap<PromptRole, usize>>,
    delay: Option<(PromptRole, Duration)>,
}

impl ScriptedModel {
    pub fn new<F>(script: F) -> Self
    where
        F: Fn(PromptRole, &Prompt) -> Result<String, LlmError> + Send + Sync + 'static,
    {
        Self {
            script: Box::new(script),
            calls: Mutex::new(HashMap::new()),
            delay: None,
        }
    }

    /// 특정 용도의 호출을 지연
    pub fn with_delay(mut self, role: PromptRole, delay: Duration) -> Self {
        self.delay = Some((role, delay));
        self
    }

    /// 용도별 호출 횟수
    pub fn calls(&self, role: PromptRole) -> usize {
        self.calls.lock().unwrap().get(&role).copied().unwrap_or(0)
    }
}

#[async_trait]
impl LanguageModel for ScriptedModel {
    async fn complete(&self, prompt: &Prompt) -> Result<String, LlmError> {
        let role = PromptRole::of(prompt);
        *self.calls.lock().unwrap().entry(role).or_insert(0) += 1;

        if let Some((delayed, delay)) = self.delay {
            if delayed == role {
                tokio::time::sleep(delay).await;
            }
        }

        (self.script)(role, prompt)
    }

    fn name(&self) -> &str {
        "scripted"
    }
}

// ============================================================================
// KeywordEmbedder
// ============================================================================

/// 해시 기반 bag-of-words 임베더 (L2 정규화)
pub struct KeywordEmbedder {
    dimension: usize,
}

impl Default for KeywordEmbedder {
    fn default() -> Self {
        Self { dimension: 256 }
    }
}

fn fnv1a(word: &str) -> u64 {
    word.bytes().fold(0xcbf29ce484222325u64, |hash, b| {
        (hash ^ b as u64).wrapping_mul(0x100000001b3)
    })
}

#[async_trait]
impl EmbeddingProvider for KeywordEmbedder {
    async fn embed(&self, text: &str, _task: EmbedTask) -> Result<Vec<f32>, EmbedError> {
        let mut vector = vec![0.0f32; self.dimension];
        for word in text
            .split(|c: char| !c.is_alphanumeric())
            .filter(|w| !w.is_empty())
        {
            let slot = (fnv1a(&word.to_lowercase()) % self.dimension as u64) as usize;
            vector[slot] += 1.0;
        }

        let norm = vector.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > 0.0 {
            vector.iter_mut().for_each(|x| *x /= norm);
        }
        Ok(vector)
    }

    fn dimension(&self) -> usize {
        self.dimension
    }
}

// ============================================================================
// FnIndex
// ============================================================================

type Search = Box<dyn Fn(&str, usize) -> Result<Vec<IndexHit>, IndexError> + Send + Sync>;

/// 클로저로 검색 결과를 정하는 인덱스
pub struct FnIndex {
    search: Search,
    calls: AtomicUsize,
}

impl FnIndex {
    pub fn new<F>(search: F) -> Self
    where
        F: Fn(&str, usize) -> Result<Vec<IndexHit>, IndexError> + Send + Sync + 'static,
    {
        Self {
            search: Box::new(search),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl VectorIndex for FnIndex {
    async fn search(&self, text: &str, k: usize) -> Result<Vec<IndexHit>, IndexError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        (self.search)(text, k)
    }
}

/// 테스트용 검색 결과
pub fn hit(chunk_id: &str, text: &str, score: f32) -> IndexHit {
    IndexHit {
        chunk_id: chunk_id.to_string(),
        source: format!("test://{}", chunk_id),
        text: text.to_string(),
        score,
    }
}
