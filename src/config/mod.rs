//! 설정 모듈 - 실행 설정 및 데이터 디렉토리
//!
//! 오케스트레이션 한 번의 실행(run)에 주입되는 설정입니다.
//! 전역 상태를 두지 않고 `Orchestrator::run`에 직접 전달합니다.
//!
//! 우선순위: CLI 플래그 > TOML 파일 > 기본값

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};

/// 설정 파일 이름 (데이터 디렉토리 내)
pub const CONFIG_FILE_NAME: &str = "config.toml";

// ============================================================================
// Data Directory
// ============================================================================

/// 데이터 디렉토리 경로 (~/.palank-crag/)
pub fn get_data_dir() -> PathBuf {
    dirs::data_local_dir()
        .or_else(dirs::home_dir)
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".palank-crag")
}

// ============================================================================
// RunConfig
// ============================================================================

/// 실행 설정
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunConfig {
    /// 검색 결과 최대 개수
    pub top_k: usize,
    /// "충분한 근거" 판정 최소 관련 패시지 수
    pub min_relevant_passages: usize,
    /// 쿼리 재작성 후 재검색 최대 횟수
    pub max_retrieval_retries: u32,
    /// 답변 재생성 최대 횟수
    pub max_generation_retries: u32,
    /// 일시적 I/O 실패 재시도 예산 (실행당)
    pub max_transient_retries: u32,
    /// 외부 호출 1회당 타임아웃 (초)
    pub call_timeout_secs: u64,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            top_k: 4,
            min_relevant_passages: 1,
            max_retrieval_retries: 2,
            max_generation_retries: 2,
            max_transient_retries: 2,
            call_timeout_secs: 30,
        }
    }
}

impl RunConfig {
    /// TOML 파일에서 로드
    ///
    /// 값 검증은 호출자가 덮어쓰기를 적용한 뒤 `validate`로 수행합니다.
    pub fn from_file(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        let config: RunConfig = toml::from_str(&raw)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;
        Ok(config)
    }

    /// 설정 로드
    ///
    /// 명시한 경로가 있으면 그 파일을, 없으면 데이터 디렉토리의
    /// `config.toml`이 존재할 때만 읽습니다.
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        if let Some(path) = explicit {
            return Self::from_file(path);
        }

        let default_path = get_data_dir().join(CONFIG_FILE_NAME);
        if default_path.exists() {
            tracing::debug!("Loading config from {:?}", default_path);
            return Self::from_file(&default_path);
        }

        Ok(Self::default())
    }

    /// 값 검증
    pub fn validate(&self) -> Result<()> {
        if self.top_k == 0 {
            bail!("top_k must be at least 1");
        }
        if self.call_timeout_secs == 0 {
            bail!("call_timeout_secs must be at least 1");
        }
        Ok(())
    }

    /// 외부 호출 타임아웃
    pub fn call_timeout(&self) -> Duration {
        Duration::from_secs(self.call_timeout_secs)
    }

    /// 유효 최소 관련 패시지 수 (최소 1)
    pub fn evidence_threshold(&self) -> usize {
        self.min_relevant_passages.max(1)
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_defaults() {
        let config = RunConfig::default();
        assert_eq!(config.top_k, 4);
        assert_eq!(config.min_relevant_passages, 1);
        assert_eq!(config.max_retrieval_retries, 2);
        assert_eq!(config.max_generation_retries, 2);
        assert_eq!(config.call_timeout(), Duration::from_secs(30));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_evidence_threshold_clamped() {
        let config = RunConfig {
            min_relevant_passages: 0,
            ..Default::default()
        };
        assert_eq!(config.evidence_threshold(), 1);
    }

    #[test]
    fn test_validate_rejects_zero_top_k() {
        let config = RunConfig {
            top_k: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("config.toml");
        std::fs::write(&path, "top_k = 8\nmax_retrieval_retries = 5\n").unwrap();

        let config = RunConfig::from_file(&path).unwrap();
        assert_eq!(config.top_k, 8);
        assert_eq!(config.max_retrieval_retries, 5);
        assert_eq!(config.max_generation_retries, 2);
    }

    #[test]
    fn test_out_of_range_values_load_unvalidated() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("config.toml");
        std::fs::write(&path, "call_timeout_secs = 0\n").unwrap();

        let mut config = RunConfig::from_file(&path).unwrap();
        assert!(config.validate().is_err());

        config.call_timeout_secs = 5;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_invalid_toml_is_error() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("config.toml");
        std::fs::write(&path, "top_k = \"many\"").unwrap();

        let result = RunConfig::from_file(&path);
        assert!(result.is_err());
    }

    #[test]
    fn test_load_explicit_missing_file() {
        let result = RunConfig::load(Some(Path::new("/nonexistent/palank-crag.toml")));
        assert!(result.is_err());
    }
}
