//! QueryRewriter - 근거 부족 시 쿼리 재작성
//!
//! 새 쿼리는 현재 쿼리와 달라야 합니다. 같은 쿼리가 다시 나오면 루프이므로
//! `RewriteStalled`로 실패합니다. 재작성기는 실행마다 새로 만들어지므로
//! 발급 기록도 실행 범위입니다.

use std::collections::HashSet;
use std::sync::{Arc, Mutex, OnceLock};

use regex::Regex;

use super::prompts;
use crate::error::RagError;
use crate::graph::{Passage, Query};
use crate::llm::LanguageModel;

/// 응답 앞에 붙는 라벨 ("Improved question:", "Query:" 등)
fn label_prefix() -> Option<&'static Regex> {
    static LABEL: OnceLock<Option<Regex>> = OnceLock::new();
    LABEL
        .get_or_init(|| Regex::new(r"(?i)^(?:improved|rewritten|better)?\s*(?:question|query)\s*:\s*").ok())
        .as_ref()
}

/// 쿼리 재작성기
pub struct QueryRewriter {
    model: Arc<dyn LanguageModel>,
    issued: Mutex<HashSet<String>>,
}

impl QueryRewriter {
    pub fn new(model: Arc<dyn LanguageModel>) -> Self {
        Self {
            model,
            issued: Mutex::new(HashSet::new()),
        }
    }

    /// 새 쿼리 생성
    ///
    /// 빈 응답, 현재/원본 쿼리와 같은 응답, 이미 발급한 쿼리는 `RewriteStalled`.
    pub async fn rewrite(
        &self,
        original: &Query,
        current: &Query,
        rejected: &[Passage],
    ) -> Result<Query, RagError> {
        let raw = self
            .model
            .complete(&prompts::rewrite(original.text(), current.text(), rejected))
            .await
            .map_err(|e| e.classify(RagError::ModelUnavailable))?;

        let candidate = clean_rewrite(&raw);
        let key = normalize(&candidate);

        if key.is_empty() || key == normalize(current.text()) || key == normalize(original.text())
        {
            tracing::warn!("Rewrite produced no new query: {:?}", candidate);
            return Err(RagError::RewriteStalled);
        }

        {
            let mut issued = self
                .issued
                .lock()
                .map_err(|e| RagError::ContractViolation(format!("Lock error: {}", e)))?;
            if !issued.insert(key) {
                tracing::warn!("Rewrite repeated an earlier query: {:?}", candidate);
                return Err(RagError::RewriteStalled);
            }
        }

        tracing::info!("Query rewritten: {:?} -> {:?}", current.text(), candidate);
        Ok(current.rewritten(candidate))
    }
}

/// 첫 비어있지 않은 줄에서 라벨/따옴표 제거
fn clean_rewrite(raw: &str) -> String {
    let line = raw.lines().map(str::trim).find(|l| !l.is_empty()).unwrap_or("");

    let without_label = match label_prefix() {
        Some(re) => re.replace(line, ""),
        None => line.into(),
    };

    without_label
        .trim()
        .trim_matches(|c| c == '"' || c == '\'' || c == '`')
        .trim()
        .to_string()
}

/// 비교용 정규화 (소문자, 영숫자 단어만)
fn normalize(text: &str) -> String {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .map(str::to_lowercase)
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{ErrorKind, LlmError};
    use crate::testing::ScriptedModel;

    fn rewriter(reply: &'static str) -> QueryRewriter {
        QueryRewriter::new(Arc::new(ScriptedModel::new(move |_, _| Ok(reply.to_string()))))
    }

    #[test]
    fn test_clean_rewrite() {
        assert_eq!(clean_rewrite("Improved question: \"What is an ETF?\""), "What is an ETF?");
        assert_eq!(clean_rewrite("\n\n  etf definition  \nextra"), "etf definition");
        assert_eq!(clean_rewrite("Query: etf fees"), "etf fees");
        assert_eq!(clean_rewrite(""), "");
    }

    #[test]
    fn test_normalize_ignores_case_and_punctuation() {
        assert_eq!(normalize("What is an ETF?"), normalize("what is an etf"));
    }

    #[tokio::test]
    async fn test_rewrite_produces_new_query() {
        let rewriter = rewriter("exchange traded fund definition");
        let original = Query::original("What is an ETF?");

        let rewritten = rewriter.rewrite(&original, &original, &[]).await.unwrap();
        assert_eq!(rewritten.text(), "exchange traded fund definition");
        assert_eq!(rewritten.attempt(), 1);
    }

    #[tokio::test]
    async fn test_identical_second_call_stalls() {
        let rewriter = rewriter("exchange traded fund definition");
        let original = Query::original("What is an ETF?");

        assert!(rewriter.rewrite(&original, &original, &[]).await.is_ok());
        let second = rewriter.rewrite(&original, &original, &[]).await;
        assert_eq!(second, Err(RagError::RewriteStalled));
    }

    #[tokio::test]
    async fn test_echo_of_current_query_stalls() {
        let rewriter = rewriter("what is an etf");
        let original = Query::original("What is an ETF?");
        let err = rewriter.rewrite(&original, &original, &[]).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::RewriteStalled);
    }

    #[tokio::test]
    async fn test_cycling_back_to_original_stalls() {
        let rewriter = rewriter("What is an ETF?");
        let original = Query::original("What is an ETF?");
        let current = original.rewritten("etf meaning");
        let err = rewriter.rewrite(&original, &current, &[]).await.unwrap_err();
        assert_eq!(err, RagError::RewriteStalled);
    }

    #[tokio::test]
    async fn test_blank_reply_stalls() {
        let rewriter = rewriter("   ");
        let q = Query::original("q");
        assert_eq!(rewriter.rewrite(&q, &q, &[]).await, Err(RagError::RewriteStalled));
    }

    #[tokio::test]
    async fn test_content_policy_surfaces() {
        let rewriter = QueryRewriter::new(Arc::new(ScriptedModel::new(|_, _| {
            Err(LlmError::ContentPolicy("SAFETY".into()))
        })));
        let q = Query::original("q");
        let err = rewriter.rewrite(&q, &q, &[]).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ContentPolicyViolation);
    }
}
