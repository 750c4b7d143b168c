//! CLI 모듈
//!
//! palank-crag CLI 명령어 정의 및 구현

use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use tokio_util::sync::CancellationToken;

use crate::config::{get_data_dir, RunConfig, CONFIG_FILE_NAME};
use crate::embedding::GeminiEmbedding;
use crate::graph::{GraphState, Orchestrator, RunResult};
use crate::index::{LanceIndex, TokenChunker, VectorIndex};
use crate::llm::{has_api_key, GeminiModel, LanguageModel};
use crate::scraper::PageLoader;

/// 벡터 인덱스 디렉토리 이름 (데이터 디렉토리 내)
const INDEX_DIR_NAME: &str = "vectors.lance";

// ============================================================================
// CLI Definition
// ============================================================================

#[derive(Parser)]
#[command(name = "palank-crag")]
#[command(version, about = "자기 교정 RAG 질의응답", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// URL 또는 텍스트를 인덱스에 추가
    Ingest {
        /// 수집할 URL
        #[arg(short, long)]
        url: Option<String>,

        /// 직접 입력할 텍스트
        #[arg(short, long)]
        text: Option<String>,

        /// 문서 식별자 (기본: URL 또는 "direct-input")
        #[arg(short, long)]
        source: Option<String>,
    },

    /// 질문에 답변 (검색/평가/재작성/생성/검증 루프)
    Ask {
        /// 질문
        question: String,

        #[command(flatten)]
        run: RunArgs,

        /// 결과를 JSON으로 출력
        #[arg(long)]
        json: bool,
    },

    /// 인덱스 직접 검색
    Search {
        /// 검색 쿼리
        query: String,

        /// 결과 개수 제한
        #[arg(short, long, default_value = "5")]
        limit: usize,
    },

    /// 상태 확인
    Status,
}

/// 실행 설정 플래그 (설정 파일 값을 덮어씀)
#[derive(Args, Debug, Default)]
pub struct RunArgs {
    /// 설정 파일 경로 (TOML)
    #[arg(long)]
    config: Option<PathBuf>,

    /// 검색 결과 개수
    #[arg(long)]
    top_k: Option<usize>,

    /// 충분한 근거로 보는 최소 관련 패시지 수
    #[arg(long)]
    min_relevant: Option<usize>,

    /// 쿼리 재작성 최대 횟수
    #[arg(long)]
    max_retrieval_retries: Option<u32>,

    /// 답변 재생성 최대 횟수
    #[arg(long)]
    max_generation_retries: Option<u32>,

    /// 외부 호출 타임아웃 (초)
    #[arg(long)]
    timeout: Option<u64>,
}

impl RunArgs {
    /// 설정 파일 로드 후 플래그 적용
    fn resolve(&self) -> Result<RunConfig> {
        let base = RunConfig::load(self.config.as_deref())?;
        let config = self.apply(base);
        config.validate()?;
        Ok(config)
    }

    fn apply(&self, mut config: RunConfig) -> RunConfig {
        if let Some(top_k) = self.top_k {
            config.top_k = top_k;
        }
        if let Some(min) = self.min_relevant {
            config.min_relevant_passages = min;
        }
        if let Some(n) = self.max_retrieval_retries {
            config.max_retrieval_retries = n;
        }
        if let Some(n) = self.max_generation_retries {
            config.max_generation_retries = n;
        }
        if let Some(secs) = self.timeout {
            config.call_timeout_secs = secs;
        }
        config
    }
}

// ============================================================================
// CLI Runner
// ============================================================================

/// CLI 명령어 실행
pub async fn run(cli: Cli) -> Result<()> {
    match cli.command {
        Commands::Ingest { url, text, source } => cmd_ingest(url, text, source).await,
        Commands::Ask {
            question,
            run,
            json,
        } => cmd_ask(&question, &run, json).await,
        Commands::Search { query, limit } => cmd_search(&query, limit).await,
        Commands::Status => cmd_status().await,
    }
}

// ============================================================================
// Command Implementations
// ============================================================================

fn require_api_key() -> Result<()> {
    if !has_api_key() {
        bail!(
            "API 키가 설정되지 않았습니다.\n\n\
             설정 방법:\n  \
             export GEMINI_API_KEY=your-api-key\n  \
             또는\n  \
             export GOOGLE_AI_API_KEY=your-api-key\n\n\
             API 키 발급: https://aistudio.google.com/app/apikey"
        );
    }
    Ok(())
}

/// 기본 위치의 LanceDB 인덱스 열기
async fn open_index() -> Result<LanceIndex> {
    let embedder = GeminiEmbedding::from_env().context("임베딩 프로바이더 생성 실패")?;
    let chunker = TokenChunker::with_defaults()?;

    LanceIndex::open(
        &get_data_dir().join(INDEX_DIR_NAME),
        Arc::new(embedder),
        chunker,
    )
    .await
    .context("벡터 인덱스 열기 실패")
}

/// 문서 수집 명령어 (ingest)
///
/// URL 페이지 또는 텍스트를 청크로 나누어 임베딩 후 저장합니다.
/// 같은 source로 다시 수집하면 기존 청크를 교체합니다.
async fn cmd_ingest(url: Option<String>, text: Option<String>, source: Option<String>) -> Result<()> {
    require_api_key()?;

    let (content, default_source) = if let Some(ref url_str) = url {
        println!("[*] 페이지 로드 중: {}", url_str);
        let loader = PageLoader::new()?;
        let page = loader.load(url_str).await.context("페이지 로드 실패")?;
        (page.document_text(), page.url)
    } else if let Some(text_content) = text {
        (text_content, "direct-input".to_string())
    } else {
        bail!("--url 또는 --text 중 하나를 지정해야 합니다");
    };

    let source = source.unwrap_or(default_source);
    let index = open_index().await?;

    println!("[*] 청크 분할 및 임베딩 생성 중...");
    let added = index
        .add_document(&source, &content)
        .await
        .context("문서 추가 실패")?;

    if added == 0 {
        println!("[!] 저장할 본문이 없습니다: {}", source);
    } else {
        println!("[OK] {} 청크 추가됨", added);
        println!("     Source: {}", source);
    }

    Ok(())
}

/// 질문 명령어 (ask)
///
/// Ctrl-C는 현재 단계가 끝난 뒤 실행을 취소합니다.
async fn cmd_ask(question: &str, args: &RunArgs, json: bool) -> Result<()> {
    require_api_key()?;

    let config = args.resolve()?;
    let index = open_index().await?;
    let model = GeminiModel::from_env().context("언어 모델 생성 실패")?;
    tracing::debug!("Using model {} with {:?}", model.name(), config);

    let cancel = CancellationToken::new();
    let ctrl_c = {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                eprintln!("[!] 취소 요청됨, 현재 단계가 끝나면 중단합니다");
                cancel.cancel();
            }
        })
    };

    let orchestrator = Orchestrator::new(Arc::new(index), Arc::new(model));
    let result = orchestrator.run_with_cancel(question, &config, cancel).await;
    ctrl_c.abort();

    if json {
        println!(
            "{}",
            serde_json::to_string_pretty(&result).context("결과 직렬화 실패")?
        );
    } else {
        print_result(&result);
    }

    if result.terminal == GraphState::Failed {
        bail!(
            "실행 실패 ({})",
            result
                .error_kind
                .map(|k| k.to_string())
                .unwrap_or_else(|| "unknown".to_string())
        );
    }

    Ok(())
}

fn print_result(result: &RunResult) {
    match &result.answer {
        Some(answer) => println!("\n{}\n", answer),
        None => println!("\n[!] 답변 없음\n"),
    }

    println!("신뢰도: {:?}", result.confidence);
    println!("경로: {}", format_path(&result.path));
    if result.retrieval_retries > 0 {
        println!("최종 쿼리: {}", result.final_query);
    }
    if let Some(ref error) = result.error {
        println!("에러: {}", error);
    }

    let sources = unique_sources(&result.sources);
    if !sources.is_empty() {
        println!("출처:");
        for source in sources {
            println!("  - {}", source);
        }
    }
}

/// 첫 등장 순서를 유지한 중복 제거
fn unique_sources(sources: &[String]) -> Vec<&str> {
    let mut seen = HashSet::new();
    sources
        .iter()
        .map(String::as_str)
        .filter(|s| seen.insert(*s))
        .collect()
}

/// 검색 명령어 (search)
async fn cmd_search(query: &str, limit: usize) -> Result<()> {
    require_api_key()?;

    println!("[*] 검색 중: \"{}\"", query);
    let index = open_index().await?;
    let hits = index.search(query, limit).await.context("검색 실패")?;

    if hits.is_empty() {
        println!("\n[!] 검색 결과가 없습니다.");
        return Ok(());
    }

    println!("\n[OK] 검색 결과 ({} 건):\n", hits.len());
    for (i, hit) in hits.iter().enumerate() {
        println!("{}. [점수: {:.4}] {}", i + 1, hit.score, hit.chunk_id);
        println!("   Source: {}", hit.source);
        println!("   내용: {}", truncate_text(&hit.text, 200));
        println!();
    }

    Ok(())
}

/// 상태 명령어 (status)
async fn cmd_status() -> Result<()> {
    println!("palank-crag 상태\n");

    let data_dir = get_data_dir();
    println!("[*] 데이터 디렉토리: {}", data_dir.display());

    let config_path = data_dir.join(CONFIG_FILE_NAME);
    if config_path.exists() {
        println!("[OK] 설정 파일: {}", config_path.display());
    } else {
        println!("[-] 설정 파일 없음 (기본값 사용)");
    }

    if has_api_key() {
        println!("[OK] API 키 설정됨");
    } else {
        println!("[!] API 키 없음 (GEMINI_API_KEY 또는 GOOGLE_AI_API_KEY)");
        return Ok(());
    }

    match open_index().await {
        Ok(index) => match index.count().await {
            Ok(count) => println!("[OK] 벡터 인덱스: {} 청크", count),
            Err(e) => tracing::debug!("청크 수 조회 실패: {}", e),
        },
        Err(e) => println!("[!] 벡터 인덱스 열기 실패: {}", e),
    }

    Ok(())
}

// ============================================================================
// Helper Functions
// ============================================================================

/// 텍스트 자르기 (UTF-8 안전)
fn truncate_text(text: &str, max_chars: usize) -> String {
    let cleaned = text.replace('\n', " ").replace('\r', "");
    let cleaned = cleaned.trim();

    if cleaned.chars().count() <= max_chars {
        cleaned.to_string()
    } else {
        let truncated: String = cleaned.chars().take(max_chars).collect();
        format!("{}...", truncated)
    }
}

/// 상태 경로 표시
fn format_path(path: &[GraphState]) -> String {
    path.iter()
        .map(|s| s.as_str())
        .collect::<Vec<_>>()
        .join(" -> ")
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truncate_text() {
        assert_eq!(truncate_text("hello", 10), "hello");
        assert_eq!(truncate_text("hello world", 5), "hello...");
        assert_eq!(truncate_text("hello\nworld", 20), "hello world");
    }

    #[test]
    fn test_truncate_unicode() {
        assert_eq!(truncate_text("안녕하세요 세계", 5), "안녕하세요...");
    }

    #[test]
    fn test_format_path() {
        let path = [GraphState::Retrieving, GraphState::Grading, GraphState::Done];
        assert_eq!(format_path(&path), "RETRIEVING -> GRADING -> DONE");
    }

    #[test]
    fn test_run_args_override_config() {
        let args = RunArgs {
            top_k: Some(8),
            max_retrieval_retries: Some(0),
            timeout: Some(5),
            ..RunArgs::default()
        };
        let config = args.apply(RunConfig::default());

        assert_eq!(config.top_k, 8);
        assert_eq!(config.max_retrieval_retries, 0);
        assert_eq!(config.call_timeout_secs, 5);
        assert_eq!(config.max_generation_retries, 2);
    }

    #[test]
    fn test_flags_repair_out_of_range_config_file() {
        let temp_dir = tempfile::TempDir::new().unwrap();
        let path = temp_dir.path().join("run.toml");
        std::fs::write(&path, "call_timeout_secs = 0\ntop_k = 6\n").unwrap();

        let args = RunArgs {
            config: Some(path.clone()),
            timeout: Some(5),
            ..RunArgs::default()
        };
        let config = args.resolve().unwrap();
        assert_eq!(config.call_timeout_secs, 5);
        assert_eq!(config.top_k, 6);

        let args = RunArgs {
            config: Some(path),
            ..RunArgs::default()
        };
        assert!(args.resolve().is_err());
    }

    #[test]
    fn test_unique_sources_keeps_first_occurrence_order() {
        let sources: Vec<String> = ["a", "b", "a", "c", "b"].iter().map(|s| s.to_string()).collect();
        assert_eq!(unique_sources(&sources), vec!["a", "b", "c"]);
        assert!(unique_sources(&[]).is_empty());
    }

    #[test]
    fn test_cli_parses_ask_flags() {
        let cli = Cli::try_parse_from([
            "palank-crag",
            "ask",
            "What is an ETF?",
            "--top-k",
            "3",
            "--max-generation-retries",
            "1",
            "--json",
        ])
        .unwrap();

        match cli.command {
            Commands::Ask { question, run, json } => {
                assert_eq!(question, "What is an ETF?");
                assert_eq!(run.top_k, Some(3));
                assert_eq!(run.max_generation_retries, Some(1));
                assert!(json);
            }
            _ => panic!("expected ask"),
        }
    }
}
