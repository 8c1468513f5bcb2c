//! 재연결 백오프
//!
//! 연결 실패마다 대기 시간을 두 배로 늘리고 상한에서 멈춤.
//! 성공하면 초기값으로 리셋. initial = 0이면 매번 바로 재시도.

use std::time::Duration;

use tokio::time::Instant;

#[derive(Debug, Clone)]
pub struct ReconnectBackoff {
    pub initial: Duration,
    pub max: Duration,

    /// 다음 실패 시 적용할 대기
    current: Duration,

    /// 이 시각 전에는 재시도 안 함
    next_attempt: Option<Instant>,

    /// 연속 실패 수
    pub failures: u32,
}

impl ReconnectBackoff {
    pub fn new(initial: Duration, max: Duration) -> Self {
        Self {
            initial,
            max,
            current: initial,
            next_attempt: None,
            failures: 0,
        }
    }

    pub fn from_millis(initial_ms: u64, max_ms: u64) -> Self {
        Self::new(Duration::from_millis(initial_ms), Duration::from_millis(max_ms))
    }

    /// 지금 재시도해도 되는지
    pub fn ready(&self) -> bool {
        self.ready_at(Instant::now())
    }

    pub fn ready_at(&self, now: Instant) -> bool {
        match self.next_attempt {
            Some(deadline) => now >= deadline,
            None => true,
        }
    }

    /// 남은 대기 시간
    pub fn remaining(&self) -> Duration {
        self.next_attempt
            .map(|deadline| deadline.saturating_duration_since(Instant::now()))
            .unwrap_or_default()
    }

    /// 실패 기록 후 다음 시도 시각 계산
    pub fn record_failure(&mut self) {
        self.failures = self.failures.saturating_add(1);
        if self.current.is_zero() {
            self.next_attempt = None;
            return;
        }

        self.next_attempt = Some(Instant::now() + self.current);
        self.current = (self.current * 2).min(self.max);
    }

    /// 성공 시 리셋
    pub fn reset(&mut self) {
        self.current = self.initial;
        self.next_attempt = None;
        self.failures = 0;
    }
}
