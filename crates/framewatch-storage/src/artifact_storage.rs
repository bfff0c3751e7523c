//! 아티팩트 파일 저장소.
//!
//! 구조:
//! - `<root>/<screenshotDir>/YYYYMMDD/capture_<label>_<timestamp>.png`
//! - `<root>/<screenshotDir>/YYYYMMDD/forced_<timestamp>.png`
//! - `<root>/<videoDir>/...` (녹화 계층이 기록, 여기서는 스캔/정리만)
//!
//! 디렉토리 이름은 호출 시점의 라이브 설정에서 읽는다.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use framewatch_core::config_manager::ConfigManager;
use framewatch_core::error::CoreError;
use framewatch_core::models::artifact::{ArtifactKind, StoredArtifact};
use framewatch_core::ports::capture_store::{CaptureLabel, CaptureStore};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tokio::fs;
use tracing::{debug, info, warn};

/// 용량 정리 최소 보존 기간
pub const EVICTION_MIN_AGE: Duration = Duration::from_secs(5 * 60);

/// 용량 정리 결과
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EvictionReport {
    /// 스캔한 파일 수
    pub scanned: usize,
    /// 삭제한 파일 수
    pub deleted: usize,
    /// 확보한 용량 (bytes)
    pub freed_bytes: u64,
    /// 정리 후 총 용량 (bytes)
    pub remaining_bytes: u64,
    /// 보존 기간 때문에 한도를 넘긴 채 종료
    pub overflow: bool,
}

/// 아티팩트 저장소
pub struct ArtifactStorage {
    root: PathBuf,
    config: Arc<ConfigManager>,
}

impl ArtifactStorage {
    /// 저장소 생성 (스크린샷/동영상 디렉토리 생성)
    pub async fn new(root: PathBuf, config: Arc<ConfigManager>) -> Result<Self, CoreError> {
        let storage = Self { root, config };

        for dir in [storage.screenshots_dir(), storage.videos_dir()] {
            fs::create_dir_all(&dir).await.map_err(|e| {
                CoreError::Internal(format!("저장 디렉토리 생성 실패: {}: {e}", dir.display()))
            })?;
        }

        info!(
            "아티팩트 저장소 초기화: {} (한도 {}MB)",
            storage.root.display(),
            storage.config.read(|c| c.storage_quota_mb)
        );
        Ok(storage)
    }

    /// 저장 루트
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// 스크린샷 디렉토리
    pub fn screenshots_dir(&self) -> PathBuf {
        self.root.join(self.config.read(|c| c.screenshot_dir.clone()))
    }

    /// 동영상 디렉토리
    pub fn videos_dir(&self) -> PathBuf {
        self.root.join(self.config.read(|c| c.video_dir.clone()))
    }

    /// 캡처 PNG 저장.
    ///
    /// 임시 파일에 쓴 뒤 이름을 바꾸므로 스캐너는 완성된 파일만 본다.
    pub async fn save_png(
        &self,
        label: &CaptureLabel,
        captured_at: DateTime<Utc>,
        png: &[u8],
    ) -> Result<PathBuf, CoreError> {
        let day_dir = self
            .screenshots_dir()
            .join(captured_at.format("%Y%m%d").to_string());
        fs::create_dir_all(&day_dir)
            .await
            .map_err(|e| CoreError::Internal(format!("일자 폴더 생성 실패: {e}")))?;

        let stamp = captured_at.format("%Y%m%d_%H%M%S_%3f");
        let stem = match label {
            CaptureLabel::Matched(name) => format!("capture_{}_{stamp}", sanitize_label(name)),
            CaptureLabel::Forced => format!("forced_{stamp}"),
        };
        let filename = free_file_name(&day_dir, &stem).await?;
        let file_path = day_dir.join(&filename);
        let tmp_path = day_dir.join(format!("{filename}.tmp"));

        fs::write(&tmp_path, png)
            .await
            .map_err(|e| CoreError::Internal(format!("캡처 파일 저장 실패: {e}")))?;
        fs::rename(&tmp_path, &file_path)
            .await
            .map_err(|e| CoreError::Internal(format!("캡처 파일 이름 변경 실패: {e}")))?;

        debug!("캡처 저장: {} ({}bytes)", file_path.display(), png.len());
        Ok(file_path)
    }

    /// 업로드/정리 대상 이미지 + 동영상 목록
    pub async fn media_artifacts(&self) -> Result<Vec<StoredArtifact>, CoreError> {
        let mut artifacts = scan_artifacts(&self.screenshots_dir()).await?;
        artifacts.extend(scan_artifacts(&self.videos_dir()).await?);
        artifacts.retain(|a| matches!(a.kind, ArtifactKind::Image | ArtifactKind::Video));
        Ok(artifacts)
    }

    /// 이미지 + 동영상 총 용량 (bytes)
    pub async fn total_size(&self) -> Result<u64, CoreError> {
        Ok(self.media_artifacts().await?.iter().map(|a| a.size).sum())
    }

    /// 용량 한도 강제.
    ///
    /// 오래된 순으로 한도 이하가 될 때까지 삭제한다. `min_age`보다 최근 파일은
    /// 한도를 넘더라도 삭제하지 않고 경고만 남긴다.
    pub async fn enforce_quota(
        &self,
        now: SystemTime,
        min_age: Duration,
    ) -> Result<EvictionReport, CoreError> {
        let quota = self.config.read(|c| c.storage_quota_bytes());
        let mut artifacts = self.media_artifacts().await?;
        let mut total: u64 = artifacts.iter().map(|a| a.size).sum();

        let mut report = EvictionReport {
            scanned: artifacts.len(),
            ..EvictionReport::default()
        };

        if total > quota {
            artifacts.sort_by_key(|a| a.modified);

            for artifact in &artifacts {
                if total <= quota {
                    break;
                }
                // 오래된 순 정렬이므로 이후 파일도 모두 보존 기간 이내
                if artifact.age(now) < min_age {
                    break;
                }

                match fs::remove_file(&artifact.path).await {
                    Ok(()) => {
                        total = total.saturating_sub(artifact.size);
                        report.deleted += 1;
                        report.freed_bytes += artifact.size;
                        debug!("용량 정리 삭제: {}", artifact.path.display());
                        remove_empty_parent(&artifact.path).await;
                    }
                    Err(e) => warn!("용량 정리 삭제 실패: {}: {e}", artifact.path.display()),
                }
            }
        }

        report.remaining_bytes = total;
        report.overflow = total > quota;

        if report.deleted > 0 {
            info!(
                "용량 정리: {}개 삭제, {}bytes 확보",
                report.deleted, report.freed_bytes
            );
        }
        if report.overflow {
            warn!(
                "용량 한도 초과 지속: {}bytes > {}bytes (최근 파일은 보존)",
                total, quota
            );
        }

        Ok(report)
    }
}

#[async_trait]
impl CaptureStore for ArtifactStorage {
    async fn save_capture(
        &self,
        label: &CaptureLabel,
        captured_at: DateTime<Utc>,
        png: &[u8],
    ) -> Result<PathBuf, CoreError> {
        self.save_png(label, captured_at, png).await
    }
}

/// `<stem>.png`, 이미 있으면 `<stem>_<n>.png`
async fn free_file_name(dir: &Path, stem: &str) -> Result<String, CoreError> {
    let mut filename = format!("{stem}.png");
    let mut suffix = 1u32;
    while fs::try_exists(dir.join(&filename)).await? {
        filename = format!("{stem}_{suffix}.png");
        suffix += 1;
    }
    Ok(filename)
}

/// 파일명에 쓸 수 없는 문자 치환
fn sanitize_label(label: &str) -> String {
    label
        .chars()
        .map(|c| {
            if c.is_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect()
}

/// 디렉토리를 재귀적으로 훑어 알려진 종류의 아티팩트 수집.
///
/// 디렉토리가 없으면 빈 목록.
pub async fn scan_artifacts(dir: &Path) -> Result<Vec<StoredArtifact>, CoreError> {
    let mut found = Vec::new();
    if fs::metadata(dir).await.is_err() {
        return Ok(found);
    }

    let mut pending = vec![dir.to_path_buf()];
    while let Some(current) = pending.pop() {
        let mut entries = fs::read_dir(&current)
            .await
            .map_err(|e| CoreError::Internal(format!("디렉토리 읽기 실패: {e}")))?;

        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| CoreError::Internal(format!("항목 읽기 실패: {e}")))?
        {
            let path = entry.path();
            // 스캔 도중 삭제된 파일은 건너뜀
            let Ok(metadata) = fs::metadata(&path).await else {
                continue;
            };

            if metadata.is_dir() {
                pending.push(path);
            } else if metadata.is_file() {
                if let Some(kind) = ArtifactKind::from_path(&path) {
                    found.push(StoredArtifact {
                        path,
                        kind,
                        size: metadata.len(),
                        modified: metadata.modified().unwrap_or(SystemTime::UNIX_EPOCH),
                    });
                }
            }
        }
    }

    Ok(found)
}

/// 비어있는 일자 디렉토리 제거 (실패 무시)
async fn remove_empty_parent(path: &Path) {
    if let Some(parent) = path.parent() {
        if let Ok(mut entries) = fs::read_dir(parent).await {
            if let Ok(None) = entries.next_entry().await {
                let _ = fs::remove_dir(parent).await;
            }
        }
    }
}
