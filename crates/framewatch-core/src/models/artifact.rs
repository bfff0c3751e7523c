//! 로컬 저장 아티팩트 모델.
//!
//! 생성(프레임 처리기) → 업로드 시도(Sync Manager) → 업로드 확인 시 삭제,
//! 또는 안정화 기간 경과 후 용량 초과 시 오래된 순 강제 삭제.

use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

/// 아티팩트 종류
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ArtifactKind {
    /// 캡처 이미지
    Image,
    /// 녹화 동영상
    Video,
    /// 로그 파일
    Log,
}

impl ArtifactKind {
    /// 확장자로 종류 판별 (대소문자 무시)
    pub fn from_path(path: &Path) -> Option<Self> {
        let ext = path.extension()?.to_str()?.to_ascii_lowercase();
        match ext.as_str() {
            "png" | "jpg" | "jpeg" | "webp" => Some(ArtifactKind::Image),
            "mp4" | "webm" | "mkv" => Some(ArtifactKind::Video),
            "log" => Some(ArtifactKind::Log),
            _ => None,
        }
    }
}

/// 로컬 파일 시스템의 아티팩트
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredArtifact {
    /// 절대 경로
    pub path: PathBuf,
    /// 종류
    pub kind: ArtifactKind,
    /// 크기 (bytes)
    pub size: u64,
    /// 수정 시각
    pub modified: SystemTime,
}

impl StoredArtifact {
    /// 수정 이후 경과 시간 (미래 시각이면 0)
    pub fn age(&self, now: SystemTime) -> Duration {
        now.duration_since(self.modified).unwrap_or_default()
    }

    /// 파일 이름
    pub fn file_name(&self) -> String {
        self.path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default()
    }
}
