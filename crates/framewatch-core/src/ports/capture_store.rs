//! 캡처 저장 포트.
//!
//! 구현: `framewatch-storage::artifact_storage::ArtifactStorage`

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::path::PathBuf;

use crate::error::CoreError;

/// 저장 라벨: 매칭 캡처와 주기 강제 저장을 구분
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CaptureLabel {
    /// 매칭된 템플릿 라벨 (약한 매칭이면 `weak_` 접두사 포함)
    Matched(String),
    /// 매칭과 무관한 주기적 생존 증거
    Forced,
}

/// 캡처 이미지 저장소
#[async_trait]
pub trait CaptureStore: Send + Sync {
    /// PNG 바이트를 일자별 디렉토리에 저장하고 경로 반환
    async fn save_capture(
        &self,
        label: &CaptureLabel,
        captured_at: DateTime<Utc>,
        png: &[u8],
    ) -> Result<PathBuf, CoreError>;
}
