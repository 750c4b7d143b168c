//! 프롬프트 템플릿
//!
//! 각 단계는 고정 프리앰블 + 입력별 메시지로 구성됩니다.
//! 그레이더는 `{"binary_score": "..."}` JSON 한 줄로 답하도록 지시합니다.

use crate::graph::Passage;
use crate::llm::Prompt;

pub const RELEVANCE_PREAMBLE: &str = "You are a grader assessing relevance of a retrieved document to a user question. \
If the document contains keyword(s) or semantic meaning related to the user question, grade it as relevant. \
Respond with a single JSON object {\"binary_score\": \"yes\"} or {\"binary_score\": \"no\"} and nothing else.";

pub const GROUNDEDNESS_PREAMBLE: &str = "You are a grader assessing whether an LLM generation is grounded in / supported by a set of retrieved facts. \
'yes' means that every claim of the answer is supported by the facts. \
Respond with a single JSON object {\"binary_score\": \"yes\"} or {\"binary_score\": \"no\"} and nothing else.";

pub const ANSWER_PREAMBLE: &str = "You are a grader assessing whether an answer addresses / resolves a question. \
'yes' means the answer fully resolves the question, 'partial' means it is on topic but leaves part of the question open, \
'no' means it does not address the question. \
Respond with a single JSON object {\"binary_score\": \"yes\"}, {\"binary_score\": \"partial\"} or {\"binary_score\": \"no\"} and nothing else.";

pub const REWRITE_PREAMBLE: &str = "You are a question re-writer that converts an input question to a better version optimized for vectorstore retrieval. \
Look at the input and reason about the underlying semantic intent. The documents listed as unhelpful were retrieved for the previous query and did not help; \
steer away from them. Respond with the improved question only, on a single line.";

pub const GENERATION_PREAMBLE: &str = "You are an assistant for question-answering tasks. \
Use the following pieces of retrieved context to answer the question. \
If you don't know the answer, just say that you don't know. \
Use three sentences maximum and keep the answer concise.";

/// 패시지 1개 관련성 평가
pub fn relevance(question: &str, passage: &Passage) -> Prompt {
    Prompt::new(
        RELEVANCE_PREAMBLE,
        format!(
            "Retrieved document:\n\n{}\n\nUser question: {}",
            passage.text(),
            question
        ),
    )
}

/// 답변이 패시지에 근거하는지 평가
pub fn groundedness(answer: &str, passages: &[Passage]) -> Prompt {
    Prompt::new(
        GROUNDEDNESS_PREAMBLE,
        format!(
            "Set of facts:\n\n{}\n\nLLM generation: {}",
            format_passages(passages),
            answer
        ),
    )
}

/// 답변이 질문을 해결하는지 평가
pub fn answer_check(question: &str, answer: &str) -> Prompt {
    Prompt::new(
        ANSWER_PREAMBLE,
        format!("User question:\n\n{}\n\nLLM generation: {}", question, answer),
    )
}

/// 쿼리 재작성
pub fn rewrite(original: &str, current: &str, rejected: &[Passage]) -> Prompt {
    let mut message = format!("Original question: {}\n", original);
    if current != original {
        message.push_str(&format!("Previous query: {}\n", current));
    }
    if !rejected.is_empty() {
        message.push_str("\nUnhelpful documents:\n");
        for passage in rejected {
            message.push_str(&format!("- {}\n", snippet(passage.text(), 200)));
        }
    }
    message.push_str("\nImproved question:");
    Prompt::new(REWRITE_PREAMBLE, message)
}

/// 근거 기반 답변 생성
pub fn generation(question: &str, passages: &[Passage]) -> Prompt {
    Prompt::new(
        GENERATION_PREAMBLE,
        format!(
            "Context:\n\n{}\n\nQuestion: {}\nAnswer:",
            format_passages(passages),
            question
        ),
    )
}

/// `[n] (source) text` 형식으로 나열
fn format_passages(passages: &[Passage]) -> String {
    passages
        .iter()
        .enumerate()
        .map(|(i, p)| format!("[{}] ({}) {}", i + 1, p.source(), p.text()))
        .collect::<Vec<_>>()
        .join("\n\n")
}

fn snippet(text: &str, max_chars: usize) -> String {
    let flat = text.split_whitespace().collect::<Vec<_>>().join(" ");
    if flat.chars().count() <= max_chars {
        flat
    } else {
        format!("{}...", flat.chars().take(max_chars).collect::<String>())
    }
}
