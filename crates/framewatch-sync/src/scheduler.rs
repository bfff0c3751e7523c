//! 주기 작업 스케줄러.
//!
//! 작업마다 독립 타이머 루프를 돌리고, 작업별 `RunGuard`로 이전 실행이
//! 끝나지 않았으면 이번 주기를 건너뛴다. 종료 신호를 받으면 모든 루프가 멈춘다.

use futures::future::{BoxFuture, FutureExt};
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info};

/// "이미 실행 중" 가드 (잠금이 아닌 건너뛰기 플래그)
#[derive(Debug, Clone)]
pub struct RunGuard {
    name: &'static str,
    running: Arc<AtomicBool>,
}

impl RunGuard {
    /// 새 가드
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            running: Arc::new(AtomicBool::new(false)),
        }
    }

    /// 작업 이름
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// 실행 중 여부
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// 실행 권한 획득. 이미 실행 중이면 `None`
    pub fn try_acquire(&self) -> Option<RunToken> {
        self.running
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| RunToken {
                running: Arc::clone(&self.running),
            })
    }
}

/// 실행 권한. drop 시 가드 해제
#[derive(Debug)]
pub struct RunToken {
    running: Arc<AtomicBool>,
}

impl Drop for RunToken {
    fn drop(&mut self) {
        self.running.store(false, Ordering::Release);
    }
}

/// 작업별 실행 통계
#[derive(Debug, Default)]
pub struct JobStats {
    runs: AtomicU64,
    skipped: AtomicU64,
}

impl JobStats {
    /// 시작된 실행 수
    pub fn runs(&self) -> u64 {
        self.runs.load(Ordering::Relaxed)
    }

    /// 이전 실행이 끝나지 않아 건너뛴 주기 수
    pub fn skipped(&self) -> u64 {
        self.skipped.load(Ordering::Relaxed)
    }
}

type JobTask = Arc<dyn Fn() -> BoxFuture<'static, ()> + Send + Sync>;

struct PeriodicJob {
    name: &'static str,
    period: Duration,
    guard: RunGuard,
    task: JobTask,
    stats: Arc<JobStats>,
}

/// 이름 있는 주기 작업 모음
#[derive(Default)]
pub struct JobScheduler {
    jobs: Vec<PeriodicJob>,
}

impl JobScheduler {
    /// 빈 스케줄러
    pub fn new() -> Self {
        Self::default()
    }

    /// 작업 등록. 첫 실행은 `spawn` 직후.
    pub fn add<F, Fut>(&mut self, name: &'static str, period: Duration, task: F) -> Arc<JobStats>
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let stats = Arc::new(JobStats::default());
        self.jobs.push(PeriodicJob {
            name,
            period: period.max(Duration::from_millis(1)),
            guard: RunGuard::new(name),
            task: Arc::new(move || task().boxed()),
            stats: Arc::clone(&stats),
        });
        stats
    }

    /// 등록된 작업 이름
    pub fn job_names(&self) -> Vec<&'static str> {
        self.jobs.iter().map(|job| job.name).collect()
    }

    /// 모든 작업 루프 시작
    pub fn spawn(self, shutdown: watch::Receiver<bool>) -> Vec<JoinHandle<()>> {
        info!(
            "스케줄러 시작: {}",
            self.jobs
                .iter()
                .map(|job| format!("{}={}s", job.name, job.period.as_secs()))
                .collect::<Vec<_>>()
                .join(", ")
        );

        self.jobs
            .into_iter()
            .map(|job| tokio::spawn(run_job(job, shutdown.clone())))
            .collect()
    }
}

async fn run_job(job: PeriodicJob, mut shutdown: watch::Receiver<bool>) {
    let mut ticker = tokio::time::interval(job.period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                match job.guard.try_acquire() {
                    Some(token) => {
                        job.stats.runs.fetch_add(1, Ordering::Relaxed);
                        let run = (job.task)();
                        tokio::spawn(async move {
                            run.await;
                            drop(token);
                        });
                    }
                    None => {
                        job.stats.skipped.fetch_add(1, Ordering::Relaxed);
                        debug!("{} 실행 중, 이번 주기 건너뜀", job.name);
                    }
                }
            }
            _ = shutdown.changed() => {
                info!("{} 루프 종료", job.name);
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn guard_is_exclusive_until_token_dropped() {
        let guard = RunGuard::new("upload");
        let token = guard.try_acquire().unwrap();
        assert!(guard.is_running());
        assert!(guard.clone().try_acquire().is_none());
        drop(token);
        assert!(!guard.is_running());
        assert!(guard.try_acquire().is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn runs_every_period() {
        let (_tx, rx) = watch::channel(false);
        let count = Arc::new(AtomicUsize::new(0));
        let mut scheduler = JobScheduler::new();
        let c = Arc::clone(&count);
        let stats = scheduler.add("tick", Duration::from_secs(10), move || {
            let c = Arc::clone(&c);
            async move {
                c.fetch_add(1, Ordering::SeqCst);
            }
        });
        assert_eq!(scheduler.job_names(), vec!["tick"]);
        let _handles = scheduler.spawn(rx);

        tokio::time::sleep(Duration::from_secs(35)).await;
        assert_eq!(stats.runs(), 4);
        assert_eq!(stats.skipped(), 0);
        assert_eq!(count.load(Ordering::SeqCst), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn overlapping_runs_are_skipped() {
        let (_tx, rx) = watch::channel(false);
        let active = Arc::new(AtomicUsize::new(0));
        let max_active = Arc::new(AtomicUsize::new(0));
        let mut scheduler = JobScheduler::new();
        let (a, m) = (Arc::clone(&active), Arc::clone(&max_active));
        let stats = scheduler.add("slow", Duration::from_secs(10), move || {
            let (a, m) = (Arc::clone(&a), Arc::clone(&m));
            async move {
                let now = a.fetch_add(1, Ordering::SeqCst) + 1;
                m.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_secs(25)).await;
                a.fetch_sub(1, Ordering::SeqCst);
            }
        });
        let _handles = scheduler.spawn(rx);

        // 실행: 0s, 30s / 건너뜀: 10s, 20s, 40s
        tokio::time::sleep(Duration::from_secs(45)).await;
        assert_eq!(stats.runs(), 2);
        assert_eq!(stats.skipped(), 3);
        assert_eq!(max_active.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_stops_all_loops() {
        let (tx, rx) = watch::channel(false);
        let mut scheduler = JobScheduler::new();
        scheduler.add("a", Duration::from_secs(5), || async {});
        scheduler.add("b", Duration::from_secs(7), || async {});
        let handles = scheduler.spawn(rx);

        tokio::time::sleep(Duration::from_secs(12)).await;
        tx.send(true).unwrap();
        for handle in handles {
            handle.await.unwrap();
        }
    }
}
