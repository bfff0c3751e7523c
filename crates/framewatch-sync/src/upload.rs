//! 아티팩트/로그 업로드.
//!
//! 안정화 기간이 지난 파일만 보낸다. 업로드가 확인된 파일만 로컬에서 지우고,
//! 실패한 파일은 다음 주기에 다시 시도된다.

use framewatch_core::config::join_remote;
use framewatch_core::models::artifact::{ArtifactKind, StoredArtifact};
use framewatch_core::ports::transport::UploadBody;
use framewatch_storage::artifact_storage::scan_artifacts;
use std::path::Path;
use std::time::{Duration, SystemTime};
use tokio::fs;
use tracing::{debug, info, warn};

use crate::manager::SyncManager;

/// 이미지 안정화 기간
pub const IMAGE_STABLE_AGE: Duration = Duration::from_secs(10);

/// 동영상 안정화 기간
pub const VIDEO_STABLE_AGE: Duration = Duration::from_secs(60);

/// 로그 안정화 기간
pub const LOG_STABLE_AGE: Duration = Duration::from_secs(60);

/// 동영상 크기 재확인 대기
pub const VIDEO_SETTLE_DELAY: Duration = Duration::from_secs(2);

/// 업로드 결과
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UploadReport {
    /// 전송 후 로컬 삭제
    pub uploaded: usize,
    /// 원격에 이미 있어 전달된 것으로 처리
    pub already_present: usize,
    /// 실패 (로컬 유지)
    pub failed: usize,
    /// 안정화 전이라 다음 주기로 미룸
    pub deferred: usize,
}

fn stable_age(kind: ArtifactKind) -> Duration {
    match kind {
        ArtifactKind::Image => IMAGE_STABLE_AGE,
        ArtifactKind::Video => VIDEO_STABLE_AGE,
        ArtifactKind::Log => LOG_STABLE_AGE,
    }
}

impl SyncManager {
    /// 이미지/동영상 업로드.
    ///
    /// 이전 실행이 끝나지 않았으면 `None`. 대용량 파일은 한 번만 시도한다.
    pub async fn upload_artifacts(&self, now: SystemTime) -> Option<UploadReport> {
        let Some(_token) = self.upload_guard.try_acquire() else {
            debug!("아티팩트 업로드 실행 중, 건너뜀");
            return None;
        };

        let mut report = UploadReport::default();
        let Some(transport) = self.transport() else {
            debug!("바인딩된 엔드포인트 없음, 아티팩트 업로드 생략");
            return Some(report);
        };

        let mut artifacts = match self.storage.media_artifacts().await {
            Ok(artifacts) => artifacts,
            Err(e) => {
                warn!("아티팩트 스캔 실패: {e}");
                return Some(report);
            }
        };
        artifacts.sort_by_key(|a| a.modified);

        let remote_base = transport.endpoint().remote_upload_dir.clone();
        for artifact in artifacts {
            if !self.is_stable(&artifact, now).await {
                report.deferred += 1;
                continue;
            }

            let remote_dir = remote_dir_for(&remote_base, self.storage.root(), &artifact.path);
            let name = artifact.file_name();
            let attempts = self.retry.attempts_for(artifact.size);
            let result = self
                .retry
                .run(attempts, "아티팩트 업로드", || {
                    transport.upload(
                        &remote_dir,
                        &name,
                        UploadBody::File(artifact.path.clone()),
                        true,
                    )
                })
                .await;

            match result {
                Ok(_) => match fs::remove_file(&artifact.path).await {
                    Ok(()) => report.uploaded += 1,
                    Err(e) => warn!("업로드 후 로컬 삭제 실패: {}: {e}", artifact.path.display()),
                },
                Err(e) => {
                    warn!("업로드 실패, 다음 주기에 재시도: {name}: {e}");
                    report.failed += 1;
                }
            }
        }

        if report.uploaded > 0 || report.failed > 0 {
            info!(
                "아티팩트 업로드: 성공 {}개, 실패 {}개, 보류 {}개",
                report.uploaded, report.failed, report.deferred
            );
        }
        Some(report)
    }

    /// 로그 업로드.
    ///
    /// 열린 로그를 먼저 교체한 뒤 닫힌 로그만 보낸다. 원격에 같은 이름이 있으면
    /// 덮어쓰지 않고 전달된 것으로 본다.
    pub async fn upload_logs(&self, now: SystemTime) -> Option<UploadReport> {
        let Some(_token) = self.log_guard.try_acquire() else {
            debug!("로그 업로드 실행 중, 건너뜀");
            return None;
        };

        let mut report = UploadReport::default();
        let Some(transport) = self.transport() else {
            debug!("바인딩된 엔드포인트 없음, 로그 업로드 생략");
            return Some(report);
        };

        match self.log_rotator.rotate() {
            Ok(Some(closed)) => debug!("로그 교체: {}", closed.display()),
            Ok(None) => {}
            Err(e) => warn!("로그 교체 실패: {e}"),
        }
        let active = self.log_rotator.active_file();

        let logs = match scan_artifacts(&self.paths.logs_dir).await {
            Ok(found) => found,
            Err(e) => {
                warn!("로그 디렉토리 스캔 실패: {e}");
                return Some(report);
            }
        };

        let remote_dir = transport.endpoint().logs_dir();
        for log in logs.into_iter().filter(|a| a.kind == ArtifactKind::Log) {
            if active.as_deref() == Some(log.path.as_path()) || log.age(now) < LOG_STABLE_AGE {
                report.deferred += 1;
                continue;
            }

            let name = log.file_name();
            let result = self
                .retry
                .run(self.retry.attempts_for(log.size), "로그 업로드", || {
                    transport.upload(&remote_dir, &name, UploadBody::File(log.path.clone()), false)
                })
                .await;

            match result {
                Ok(sent) => {
                    if sent {
                        report.uploaded += 1;
                    } else {
                        debug!("원격에 같은 로그 존재, 전달된 것으로 처리: {name}");
                        report.already_present += 1;
                    }
                    if let Err(e) = fs::remove_file(&log.path).await {
                        warn!("로그 삭제 실패: {}: {e}", log.path.display());
                    }
                }
                Err(e) => {
                    warn!("로그 업로드 실패: {name}: {e}");
                    report.failed += 1;
                }
            }
        }

        Some(report)
    }

    /// 안정화 기간 경과 여부. 동영상은 잠시 후 크기가 그대로인지 한 번 더 본다.
    async fn is_stable(&self, artifact: &StoredArtifact, now: SystemTime) -> bool {
        if artifact.age(now) < stable_age(artifact.kind) {
            return false;
        }
        if artifact.kind != ArtifactKind::Video {
            return true;
        }

        tokio::time::sleep(self.video_settle).await;
        match fs::metadata(&artifact.path).await {
            Ok(meta) if meta.len() == artifact.size => true,
            Ok(_) => {
                debug!("동영상 기록 중, 보류: {}", artifact.path.display());
                false
            }
            Err(_) => false,
        }
    }
}

/// 저장 루트 기준 상대 경로를 원격 업로드 디렉토리 아래에 그대로 둔다
fn remote_dir_for(remote_base: &str, root: &Path, path: &Path) -> String {
    let relative = path
        .parent()
        .and_then(|parent| parent.strip_prefix(root).ok())
        .map(|rel| {
            rel.components()
                .filter_map(|c| c.as_os_str().to_str())
                .collect::<Vec<_>>()
                .join("/")
        })
        .unwrap_or_default();
    join_remote(remote_base, &relative)
}
