//! 토큰 예산 청커
//!
//! cl100k_base BPE로 토큰 수를 세어 `max_tokens` 이하의 청크를 만듭니다.
//! 분할 우선순위: 문단(빈 줄) > 문장 > 단어 > 토큰 구간

use anyhow::Result;
use tiktoken_rs::CoreBPE;

/// 청킹 설정
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkConfig {
    /// 청크당 최대 토큰 수
    pub max_tokens: usize,
    /// 이전 청크 꼬리에서 가져올 토큰 수
    pub overlap_tokens: usize,
}

impl Default for ChunkConfig {
    fn default() -> Self {
        Self {
            max_tokens: 512,
            overlap_tokens: 0,
        }
    }
}

/// 분할 단위
#[derive(Debug)]
struct Piece {
    text: String,
    /// 앞 단위와 이어 붙일 구분자
    joiner: &'static str,
}

impl Piece {
    fn new(text: impl Into<String>, joiner: &'static str) -> Self {
        Self {
            text: text.into(),
            joiner,
        }
    }
}

/// 토큰 예산 청커
pub struct TokenChunker {
    bpe: CoreBPE,
    config: ChunkConfig,
}

impl TokenChunker {
    /// 설정으로 생성
    pub fn new(config: ChunkConfig) -> Result<Self> {
        if config.max_tokens == 0 {
            anyhow::bail!("max_tokens must be at least 1");
        }
        if config.overlap_tokens >= config.max_tokens {
            anyhow::bail!("overlap_tokens must be smaller than max_tokens");
        }

        let bpe = tiktoken_rs::cl100k_base()
            .map_err(|e| anyhow::anyhow!("Failed to load cl100k_base tokenizer: {}", e))?;

        Ok(Self { bpe, config })
    }

    /// 기본 설정 (512 토큰, 오버랩 없음)
    pub fn with_defaults() -> Result<Self> {
        Self::new(ChunkConfig::default())
    }

    /// 토큰 수
    pub fn count_tokens(&self, text: &str) -> usize {
        self.bpe.encode_with_special_tokens(text).len()
    }

    /// 텍스트를 청크로 분할
    ///
    /// 모든 청크는 오버랩을 포함해 `max_tokens` 이하입니다.
    pub fn chunk(&self, text: &str) -> Vec<String> {
        let pieces = self.split_pieces(text);
        let chunks = self.pack(pieces);
        self.apply_overlap(chunks)
    }

    /// 오버랩을 뺀 본문 예산
    fn budget(&self) -> usize {
        self.config.max_tokens - self.config.overlap_tokens
    }

    /// 문단 -> 문장 -> 단어 -> 토큰 구간 순으로 예산 이하 조각 생성
    fn split_pieces(&self, text: &str) -> Vec<Piece> {
        let budget = self.budget();
        let mut pieces = Vec::new();

        for paragraph in text.split("\n\n") {
            let paragraph = paragraph.trim();
            if paragraph.is_empty() {
                continue;
            }

            if self.count_tokens(paragraph) <= budget {
                pieces.push(Piece::new(paragraph, "\n\n"));
                continue;
            }

            let mut joiner = "\n\n";
            for sentence in split_sentences(paragraph) {
                if self.count_tokens(sentence) <= budget {
                    pieces.push(Piece::new(sentence, joiner));
                    joiner = " ";
                    continue;
                }

                for word in sentence.split_whitespace() {
                    if self.count_tokens(word) <= budget {
                        pieces.push(Piece::new(word, joiner));
                    } else {
                        // 공백 없는 긴 구간 (CJK, URL, 해시)
                        for (i, window) in self.split_by_tokens(word).into_iter().enumerate() {
                            pieces.push(Piece::new(window, if i == 0 { joiner } else { "" }));
                        }
                    }
                    joiner = " ";
                }
            }
        }

        pieces
    }

    /// 토큰 구간으로 자르기
    ///
    /// 구간 끝이 UTF-8 문자 중간이거나 재인코딩이 예산을 넘으면 구간을 줄입니다.
    fn split_by_tokens(&self, text: &str) -> Vec<String> {
        let budget = self.budget();
        let tokens = self.bpe.encode_with_special_tokens(text);
        let mut windows = Vec::new();
        let mut start = 0;

        while start < tokens.len() {
            let mut end = (start + budget).min(tokens.len());
            let mut found = None;

            while end > start {
                if let Ok(decoded) = self.bpe.decode(tokens[start..end].to_vec()) {
                    if self.count_tokens(&decoded) <= budget {
                        found = Some(decoded);
                        break;
                    }
                }
                end -= 1;
            }

            match found {
                Some(decoded) => windows.push(decoded),
                None => {
                    // 예산 안에 문자 경계가 없음 (극히 작은 예산)
                    end = (start + budget).min(tokens.len());
                    tracing::warn!("Dropping {} undecodable tokens", end - start);
                }
            }
            start = end;
        }

        windows
    }

    /// 조각을 예산 안에서 탐욕적으로 묶기 (실제 토큰 수로 확인)
    fn pack(&self, pieces: Vec<Piece>) -> Vec<String> {
        let budget = self.budget();
        let mut chunks = Vec::new();
        let mut current = String::new();

        for piece in pieces {
            if current.is_empty() {
                current = piece.text;
                continue;
            }

            let candidate = format!("{}{}{}", current, piece.joiner, piece.text);
            if self.count_tokens(&candidate) <= budget {
                current = candidate;
            } else {
                chunks.push(std::mem::replace(&mut current, piece.text));
            }
        }

        if !current.is_empty() {
            chunks.push(current);
        }

        chunks
    }

    /// 이전 청크 꼬리 단어를 다음 청크 앞에 붙이기
    fn apply_overlap(&self, chunks: Vec<String>) -> Vec<String> {
        if self.config.overlap_tokens == 0 || chunks.len() < 2 {
            return chunks;
        }

        let mut result = Vec::with_capacity(chunks.len());
        for (i, chunk) in chunks.iter().enumerate() {
            if i == 0 {
                result.push(chunk.clone());
                continue;
            }

            let mut tail: Vec<&str> = Vec::new();
            let mut tail_tokens = 0;
            for word in chunks[i - 1].split_whitespace().rev() {
                let t = self.count_tokens(word);
                if tail_tokens + t > self.config.overlap_tokens {
                    break;
                }
                tail_tokens += t;
                tail.push(word);
            }
            tail.reverse();

            // 합친 결과가 예산을 넘으면 앞 단어부터 버림
            let mut merged = chunk.clone();
            while !tail.is_empty() {
                let candidate = format!("{} {}", tail.join(" "), chunk);
                if self.count_tokens(&candidate) <= self.config.max_tokens {
                    merged = candidate;
                    break;
                }
                tail.remove(0);
            }
            result.push(merged);
        }

        result
    }
}

/// 문장 단위 분할 (., !, ? 뒤 공백 기준)
fn split_sentences(text: &str) -> Vec<&str> {
    let mut sentences = Vec::new();
    let mut start = 0;
    let mut prev_terminal = false;

    for (i, c) in text.char_indices() {
        if prev_terminal && c.is_whitespace() {
            let sentence = text[start..i].trim();
            if !sentence.is_empty() {
                sentences.push(sentence);
            }
            start = i;
        }
        prev_terminal = matches!(c, '.' | '!' | '?' | '。');
    }

    let rest = text[start..].trim();
    if !rest.is_empty() {
        sentences.push(rest);
    }

    sentences
}

// ============================================================================
// Tests
// ============================================================================
