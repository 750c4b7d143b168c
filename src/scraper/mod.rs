//! 페이지 로더 모듈 - 인덱싱용 HTML 본문 추출
//!
//! URL을 가져와 제목과 본문 텍스트만 남깁니다.
//! script/style/nav/footer 등 본문이 아닌 요소의 텍스트는 버립니다.

use std::time::Duration;

use anyhow::{bail, Context, Result};
use scraper::{ElementRef, Html, Node, Selector};

/// 본문으로 인정하는 최소 길이 (문자)
const MIN_MAIN_TEXT: usize = 100;

/// 텍스트를 버리는 태그
const SKIPPED_TAGS: [&str; 8] = [
    "script", "style", "noscript", "nav", "footer", "header", "aside", "template",
];

/// 본문 후보 셀렉터 (우선순위 순)
const MAIN_SELECTORS: [&str; 5] = ["article", "main", "[role=main]", "#content", ".content"];

/// 불러온 페이지
#[derive(Debug, Clone)]
pub struct LoadedPage {
    /// 원본 URL
    pub url: String,
    /// 페이지 제목
    pub title: Option<String>,
    /// 본문 텍스트
    pub text: String,
}

impl LoadedPage {
    /// 인덱싱할 문서 텍스트 (제목 포함)
    pub fn document_text(&self) -> String {
        match &self.title {
            Some(title) => format!("{}\n\n{}", title, self.text),
            None => self.text.clone(),
        }
    }
}

/// HTML 페이지 로더
pub struct PageLoader {
    client: reqwest::Client,
}

impl PageLoader {
    pub fn new() -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("palank-crag/", env!("CARGO_PKG_VERSION")))
            .timeout(Duration::from_secs(30))
            .build()
            .context("HTTP 클라이언트 생성 실패")?;

        Ok(Self { client })
    }

    /// URL에서 페이지 로드
    pub async fn load(&self, url: &str) -> Result<LoadedPage> {
        let parsed = url::Url::parse(url).with_context(|| format!("잘못된 URL: {}", url))?;
        if !matches!(parsed.scheme(), "http" | "https") {
            bail!("지원하지 않는 URL 스킴: {}", parsed.scheme());
        }

        tracing::info!("Loading page: {}", url);

        let response = self
            .client
            .get(parsed.as_str())
            .send()
            .await
            .context("HTTP 요청 실패")?;

        let status = response.status();
        if !status.is_success() {
            bail!("HTTP {} from {}", status, url);
        }

        let html = response.text().await.context("응답 본문 읽기 실패")?;
        Ok(parse_page(url, &html))
    }
}

/// HTML 문자열에서 제목/본문 추출
pub fn parse_page(url: &str, html: &str) -> LoadedPage {
    let document = Html::parse_document(html);

    LoadedPage {
        url: url.to_string(),
        title: extract_title(&document),
        text: extract_main_text(&document),
    }
}

fn first_text(document: &Html, selector: &str) -> Option<String> {
    let selector = Selector::parse(selector).ok()?;
    let element = document.select(&selector).next()?;
    let text = normalize_whitespace(&element.text().collect::<String>());
    (!text.is_empty()).then_some(text)
}

/// 제목: <title>, 없으면 첫 <h1>
fn extract_title(document: &Html) -> Option<String> {
    first_text(document, "title").or_else(|| first_text(document, "h1"))
}

/// 본문: 후보 셀렉터 중 충분히 긴 첫 요소, 없으면 <body>
fn extract_main_text(document: &Html) -> String {
    for candidate in MAIN_SELECTORS {
        let Ok(selector) = Selector::parse(candidate) else {
            continue;
        };
        if let Some(element) = document.select(&selector).next() {
            let text = visible_text(element);
            if text.chars().count() >= MIN_MAIN_TEXT {
                return text;
            }
        }
    }

    Selector::parse("body")
        .ok()
        .and_then(|s| document.select(&s).next())
        .map(visible_text)
        .unwrap_or_default()
}

/// 건너뛸 태그를 제외한 텍스트 노드 수집
fn visible_text(root: ElementRef<'_>) -> String {
    let mut parts: Vec<&str> = Vec::new();
    let mut stack = vec![*root];

    while let Some(node) = stack.pop() {
        match node.value() {
            Node::Text(text) => parts.push(&**text),
            Node::Element(element) if SKIPPED_TAGS.contains(&element.name()) => continue,
            _ => {}
        }
        // 자식을 역순으로 쌓아 문서 순서 유지
        let children: Vec<_> = node.children().collect();
        stack.extend(children.into_iter().rev());
    }

    normalize_whitespace(&parts.join(" "))
}

/// 연속 공백 정리
fn normalize_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}
