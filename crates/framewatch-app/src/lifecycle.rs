//! 라이프사이클 관리.
//!
//! 종료 신호 전파, OS 시그널 대기, 처리 워커 유예 종료.

use std::time::Duration;
use framewatch_vision::gate::CaptureGate;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

/// 처리 워커 종료 유예 시간
pub const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

/// 라이프사이클 관리자
pub struct LifecycleManager {
    shutdown_tx: watch::Sender<bool>,
    shutdown_rx: watch::Receiver<bool>,
}

impl LifecycleManager {
    /// 새 라이프사이클 관리자 생성
    pub fn new() -> Self {
        let (tx, rx) = watch::channel(false);
        Self {
            shutdown_tx: tx,
            shutdown_rx: rx,
        }
    }

    /// 종료 수신기 복제
    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.shutdown_rx.clone()
    }

    /// 종료 신호 발송
    pub fn shutdown(&self) {
        info!("종료 신호 발송");
        let _ = self.shutdown_tx.send(true);
    }

    /// 입력 차단 후 종료 신호 발송.
    ///
    /// 워커와 주기 작업이 신호를 받는 시점에는 게이트가 이미 닫혀 있다.
    pub fn begin_shutdown(&self, gate: &CaptureGate) {
        gate.close();
        self.shutdown();
    }

    /// OS 시그널 대기 (SIGINT, SIGTERM). 종료 신호는 보내지 않는다.
    pub async fn wait_for_signal(&self) {
        #[cfg(unix)]
        {
            use tokio::signal::unix::{signal, SignalKind};
            match (
                signal(SignalKind::interrupt()),
                signal(SignalKind::terminate()),
            ) {
                (Ok(mut sigint), Ok(mut sigterm)) => {
                    tokio::select! {
                        _ = sigint.recv() => info!("SIGINT 수신"),
                        _ = sigterm.recv() => info!("SIGTERM 수신"),
                    }
                }
                _ => {
                    warn!("시그널 핸들러 등록 실패, Ctrl+C만 대기");
                    wait_ctrl_c().await;
                }
            }
        }

        #[cfg(not(unix))]
        wait_ctrl_c().await;
    }
}

impl Default for LifecycleManager {
    fn default() -> Self {
        Self::new()
    }
}

async fn wait_ctrl_c() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => info!("Ctrl+C 수신"),
        Err(e) => error!("Ctrl+C 핸들러 등록 실패: {e}"),
    }
}

/// 유예 시간 안에 끝나기를 기다리고, 넘기면 중단.
///
/// 제시간에 끝났으면 `true`.
pub async fn drain_within(mut task: JoinHandle<()>, grace: Duration, name: &str) -> bool {
    match tokio::time::timeout(grace, &mut task).await {
        Ok(Ok(())) => true,
        Ok(Err(e)) => {
            warn!("{name} 비정상 종료: {e}");
            true
        }
        Err(_) => {
            warn!("{name} 종료 유예 {:?} 초과, 강제 중단", grace);
            task.abort();
            false
        }
    }
}
