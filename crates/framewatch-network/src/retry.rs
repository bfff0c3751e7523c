//! 재시도 정책.
//!
//! 고정 지연으로 최대 횟수까지 재시도한다. 대용량 전송은 한 번만 시도하고
//! 다음 주기에 자연스럽게 다시 시도되도록 둔다. 재시도 불가 에러는 즉시 반환한다.

use framewatch_core::error::CoreError;
use std::future::Future;
use std::time::Duration;
use tracing::warn;

/// 기본 최대 시도 횟수
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

/// 기본 재시도 지연
pub const DEFAULT_RETRY_DELAY: Duration = Duration::from_secs(2);

/// 단일 시도 대상 크기 기준 (20 MiB 초과)
pub const DEFAULT_LARGE_THRESHOLD: u64 = 20 * 1024 * 1024;

/// 재시도 정책
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// 최대 시도 횟수 (첫 시도 포함)
    pub max_attempts: u32,
    /// 시도 간 고정 지연
    pub delay: Duration,
    /// 이 크기를 넘으면 한 번만 시도
    pub large_threshold: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            delay: DEFAULT_RETRY_DELAY,
            large_threshold: DEFAULT_LARGE_THRESHOLD,
        }
    }
}

impl RetryPolicy {
    /// 전송 크기에 따른 시도 횟수
    pub fn attempts_for(&self, size: u64) -> u32 {
        if size > self.large_threshold {
            1
        } else {
            self.max_attempts.max(1)
        }
    }

    /// 주어진 횟수만큼 시도
    pub async fn run<F, Fut, T>(&self, attempts: u32, label: &str, operation: F) -> Result<T, CoreError>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<T, CoreError>>,
    {
        let attempts = attempts.max(1);
        let mut attempt = 1;
        loop {
            match operation().await {
                Ok(value) => return Ok(value),
                Err(e) if !e.is_retryable() || attempt >= attempts => return Err(e),
                Err(e) => {
                    warn!(
                        "{label} 실패 (시도 {attempt}/{attempts}): {e}, {:?} 후 재시도",
                        self.delay
                    );
                    tokio::time::sleep(self.delay).await;
                    attempt += 1;
                }
            }
        }
    }
}
