//! 캡처 게이트.
//!
//! 캡처 전송 계층의 스레드에서 호출되며 절대 대기하지 않는다.
//! 순서: 백프레셔 → 최소 간격 → 시그니처 중복 → 버퍼 복사 → 큐 투입.
//! 어느 단계에서든 드롭되면 이전 상태(마지막 시그니처/시각)는 그대로 남는다.

use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;

use chrono::Utc;
use framewatch_core::config_manager::ConfigManager;
use framewatch_core::error::CoreError;
use framewatch_core::models::frame::{OwnedFrame, RawFrame, ScaleHint};
use tokio::sync::mpsc;
use tracing::{debug, trace, warn};

use crate::signature::compute_signature;

/// 감지 빈도가 0 이하일 때 사용하는 하한 (회/초)
pub const MIN_DETECT_PER_SECOND: f32 = 1.0;

const NO_ADMISSION: i64 = i64::MIN;
// 시그니처는 63비트이므로 u64::MAX는 실제 값과 겹치지 않는다
const NO_SIGNATURE: u64 = u64::MAX;

/// 처리 중 플래그: 게이트와 워커가 공유
#[derive(Debug, Clone, Default)]
pub struct BackpressureFlag(Arc<AtomicBool>);

impl BackpressureFlag {
    /// 처리 중 여부
    pub fn is_set(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }

    /// 비어 있을 때만 원자적으로 점유
    fn try_claim(&self) -> Option<Claim<'_>> {
        self.0
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Claim {
                flag: self,
                committed: false,
            })
    }

    fn clear(&self) {
        self.0.store(false, Ordering::Release);
    }

    /// Drop 시 플래그를 해제하는 가드 (패닉 언와인드 포함)
    pub fn release_on_drop(&self) -> ProcessingGuard {
        ProcessingGuard {
            flag: self.clone(),
        }
    }
}

/// 게이트가 점유한 플래그. 큐 투입 전에 드롭되면 해제된다.
struct Claim<'a> {
    flag: &'a BackpressureFlag,
    committed: bool,
}

impl Claim<'_> {
    /// 큐 투입 성공: 해제는 워커 몫
    fn commit(mut self) {
        self.committed = true;
    }
}

impl Drop for Claim<'_> {
    fn drop(&mut self) {
        if !self.committed {
            self.flag.clear();
        }
    }
}

/// 처리 완료 시 백프레셔 해제
#[must_use]
pub struct ProcessingGuard {
    flag: BackpressureFlag,
}

impl Drop for ProcessingGuard {
    fn drop(&mut self) {
        self.flag.clear();
    }
}

/// 게이트 판정 결과
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    /// 워커 큐에 투입됨
    Admitted,
    /// 드롭됨
    Dropped(DropReason),
}

/// 드롭 사유
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DropReason {
    /// 게이트가 닫힘 (종료 중)
    Closed,
    /// 이전 프레임 처리 중
    Busy,
    /// 최소 간격 미달
    RateLimited,
    /// 직전 허용 프레임과 시그니처 동일
    Unchanged,
    /// 버퍼 크기 불일치 또는 시그니처/복사 실패
    InvalidFrame,
    /// 워커 큐 사용 불가
    QueueUnavailable,
}

/// 게이트 카운터
#[derive(Debug, Default)]
struct GateCounters {
    admitted: AtomicU64,
    closed: AtomicU64,
    busy: AtomicU64,
    rate_limited: AtomicU64,
    unchanged: AtomicU64,
    invalid: AtomicU64,
    queue_unavailable: AtomicU64,
}

/// 게이트 통계 스냅샷
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct GateStats {
    /// 허용된 프레임
    pub admitted: u64,
    /// 종료 후 드롭
    pub closed: u64,
    /// 백프레셔 드롭
    pub busy: u64,
    /// 간격 미달 드롭
    pub rate_limited: u64,
    /// 중복 드롭
    pub unchanged: u64,
    /// 잘못된 프레임 드롭
    pub invalid: u64,
    /// 큐 사용 불가 드롭
    pub queue_unavailable: u64,
}

impl GateStats {
    /// 전체 드롭 수
    pub fn dropped(&self) -> u64 {
        self.closed
            + self.busy
            + self.rate_limited
            + self.unchanged
            + self.invalid
            + self.queue_unavailable
    }
}

/// 워커 쪽 큐: 게이트가 허용한 프레임을 FIFO로 받는다
pub struct FrameQueue {
    pub(crate) rx: mpsc::Receiver<OwnedFrame>,
    pub(crate) flag: BackpressureFlag,
}

/// 프레임 허용 게이트
pub struct CaptureGate {
    config: Arc<ConfigManager>,
    /// 설정 잠금 경합 시 사용하는 마지막 감지 빈도 (f32 비트)
    cached_rate: AtomicU32,
    last_admitted_ms: AtomicI64,
    last_signature: AtomicU64,
    flag: BackpressureFlag,
    tx: mpsc::Sender<OwnedFrame>,
    closed: AtomicBool,
    counters: GateCounters,
}

impl CaptureGate {
    /// 게이트 + 워커 큐 생성 (큐 용량 1: 처리 중에는 백프레셔로 드롭)
    pub fn new(config: Arc<ConfigManager>) -> (Self, FrameQueue) {
        let (tx, rx) = mpsc::channel(1);
        let flag = BackpressureFlag::default();
        let rate = config.read(|c| c.detect_per_second);

        let gate = Self {
            config,
            cached_rate: AtomicU32::new(rate.to_bits()),
            last_admitted_ms: AtomicI64::new(NO_ADMISSION),
            last_signature: AtomicU64::new(NO_SIGNATURE),
            flag: flag.clone(),
            tx,
            closed: AtomicBool::new(false),
            counters: GateCounters::default(),
        };
        (gate, FrameQueue { rx, flag })
    }

    /// 캡처 콜백 진입점: 현재 시각으로 판정
    pub fn on_frame(&self, pixels: &[u8], width: u32, height: u32, scale_hint: u32) -> Admission {
        self.admit(RawFrame {
            pixels,
            width,
            height,
            scale_hint: ScaleHint::from_factor(scale_hint),
            captured_at: Utc::now(),
        })
    }

    /// 프레임 판정 (`captured_at`을 허용 시각으로 사용)
    pub fn admit(&self, frame: RawFrame<'_>) -> Admission {
        let verdict = self.evaluate(&frame);
        self.count(verdict);
        verdict
    }

    fn evaluate(&self, frame: &RawFrame<'_>) -> Admission {
        if self.closed.load(Ordering::Acquire) {
            return Admission::Dropped(DropReason::Closed);
        }

        let Some(claim) = self.flag.try_claim() else {
            trace!("게이트: 처리 중 드롭");
            return Admission::Dropped(DropReason::Busy);
        };

        let now_ms = frame.captured_at.timestamp_millis();
        let last_ms = self.last_admitted_ms.load(Ordering::Acquire);
        if last_ms != NO_ADMISSION && now_ms.saturating_sub(last_ms) < self.min_interval_ms() {
            return Admission::Dropped(DropReason::RateLimited);
        }

        let signature = match compute_signature(frame) {
            Ok(sig) => sig,
            Err(e) => {
                warn!("게이트: 시그니처 계산 실패, 드롭: {e}");
                return Admission::Dropped(DropReason::InvalidFrame);
            }
        };
        if self.last_signature.load(Ordering::Acquire) == signature.value() {
            trace!("게이트: 동일 장면 드롭");
            return Admission::Dropped(DropReason::Unchanged);
        }

        let owned = match copy_frame(frame) {
            Ok(owned) => owned,
            Err(e) => {
                warn!("게이트: 프레임 복사 실패, 드롭: {e}");
                return Admission::Dropped(DropReason::InvalidFrame);
            }
        };

        match self.tx.try_send(owned) {
            Ok(()) => {
                claim.commit();
                self.last_signature
                    .store(signature.value(), Ordering::Release);
                self.last_admitted_ms.store(now_ms, Ordering::Release);
                debug!(
                    "게이트: 프레임 허용 {}x{} (sig={:#x})",
                    frame.width,
                    frame.height,
                    signature.value()
                );
                Admission::Admitted
            }
            Err(e) => {
                drop(claim);
                debug!("게이트: 워커 큐 사용 불가: {e}");
                Admission::Dropped(DropReason::QueueUnavailable)
            }
        }
    }

    /// 최소 허용 간격 (ms). 설정 쓰기 중이면 마지막 값을 사용해 대기하지 않는다.
    fn min_interval_ms(&self) -> i64 {
        let rate = match self.config.try_read(|c| c.detect_per_second) {
            Some(rate) => {
                self.cached_rate.store(rate.to_bits(), Ordering::Relaxed);
                rate
            }
            None => f32::from_bits(self.cached_rate.load(Ordering::Relaxed)),
        };
        let rate = if rate.is_finite() && rate > 0.0 {
            rate
        } else {
            MIN_DETECT_PER_SECOND
        };
        (1000.0 / rate) as i64
    }

    fn count(&self, verdict: Admission) {
        let counter = match verdict {
            Admission::Admitted => &self.counters.admitted,
            Admission::Dropped(DropReason::Closed) => &self.counters.closed,
            Admission::Dropped(DropReason::Busy) => &self.counters.busy,
            Admission::Dropped(DropReason::RateLimited) => &self.counters.rate_limited,
            Admission::Dropped(DropReason::Unchanged) => &self.counters.unchanged,
            Admission::Dropped(DropReason::InvalidFrame) => &self.counters.invalid,
            Admission::Dropped(DropReason::QueueUnavailable) => &self.counters.queue_unavailable,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    /// 통계 스냅샷
    pub fn stats(&self) -> GateStats {
        let c = &self.counters;
        GateStats {
            admitted: c.admitted.load(Ordering::Relaxed),
            closed: c.closed.load(Ordering::Relaxed),
            busy: c.busy.load(Ordering::Relaxed),
            rate_limited: c.rate_limited.load(Ordering::Relaxed),
            unchanged: c.unchanged.load(Ordering::Relaxed),
            invalid: c.invalid.load(Ordering::Relaxed),
            queue_unavailable: c.queue_unavailable.load(Ordering::Relaxed),
        }
    }

    /// 처리 중 여부
    pub fn is_busy(&self) -> bool {
        self.flag.is_set()
    }

    /// 신규 프레임 허용 중단 (종료 1단계)
    pub fn close(&self) {
        self.closed.store(true, Ordering::Release);
    }

    /// 닫혔는지 여부
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}

/// 정확히 `width * height * 4` 바이트만 복사
fn copy_frame(frame: &RawFrame<'_>) -> Result<OwnedFrame, CoreError> {
    let expected = frame.expected_len();
    if frame.pixels.len() < expected {
        return Err(CoreError::SizeMismatch {
            expected,
            actual: frame.pixels.len(),
        });
    }

    let mut pixels = Vec::new();
    pixels
        .try_reserve_exact(expected)
        .map_err(|e| CoreError::Internal(format!("프레임 버퍼 할당 실패: {e}")))?;
    pixels.extend_from_slice(&frame.pixels[..expected]);

    Ok(OwnedFrame {
        pixels,
        width: frame.width,
        height: frame.height,
        scale_hint: frame.scale_hint,
        captured_at: frame.captured_at,
    })
}
