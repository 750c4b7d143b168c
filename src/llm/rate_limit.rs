//! 요청 속도 제한기
//!
//! Gemini 무료 티어(60 RPM) 기준. 생성과 임베딩 클라이언트가 각각 하나씩 가집니다.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

/// 기본 분당 요청 수
pub(crate) const DEFAULT_RPM: u32 = 60;
/// 호출 간 최소 간격
const DEFAULT_MIN_GAP: Duration = Duration::from_millis(1000);

/// 슬라이딩 윈도우 + 최소 간격 속도 제한기
#[derive(Debug)]
pub(crate) struct RateLimiter {
    sent: VecDeque<Instant>,
    max_requests: usize,
    window: Duration,
    min_gap: Duration,
}

impl RateLimiter {
    pub(crate) fn new(max_requests: u32, window: Duration) -> Self {
        Self::with_min_gap(max_requests, window, DEFAULT_MIN_GAP)
    }

    pub(crate) fn with_min_gap(max_requests: u32, window: Duration, min_gap: Duration) -> Self {
        Self {
            sent: VecDeque::new(),
            max_requests: max_requests.max(1) as usize,
            window,
            min_gap,
        }
    }

    /// 다음 요청 전까지 기다려야 할 시간
    pub(crate) fn delay_until_ready(&mut self, now: Instant) -> Duration {
        while let Some(&oldest) = self.sent.front() {
            if now.duration_since(oldest) >= self.window {
                self.sent.pop_front();
            } else {
                break;
            }
        }

        let gap_wait = self
            .sent
            .back()
            .map(|&last| self.min_gap.saturating_sub(now.duration_since(last)))
            .unwrap_or_default();

        let window_wait = if self.sent.len() >= self.max_requests {
            self.sent
                .front()
                .map(|&oldest| self.window.saturating_sub(now.duration_since(oldest)))
                .unwrap_or_default()
        } else {
            Duration::ZERO
        };

        gap_wait.max(window_wait)
    }

    /// 슬롯 확보 (필요하면 대기)
    pub(crate) async fn acquire(&mut self) {
        let wait = self.delay_until_ready(Instant::now());
        if !wait.is_zero() {
            tracing::debug!("Rate limiter: waiting {:?}", wait);
            tokio::time::sleep(wait).await;
        }
        self.sent.push_back(Instant::now());
    }
}
