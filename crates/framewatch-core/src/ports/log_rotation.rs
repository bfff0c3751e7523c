//! 로그 파일 회전 포트.
//!
//! 구현: `framewatch-storage::log_file::RotatingLogFile`

use std::path::PathBuf;

use crate::error::CoreError;

/// 현재 열린 로그 파일을 닫고 새 파일로 전환
pub trait LogRotator: Send + Sync {
    /// 회전 실행. 닫힌 파일 경로 반환 (열린 파일이 없었으면 `None`)
    fn rotate(&self) -> Result<Option<PathBuf>, CoreError>;

    /// 현재 기록 중인 파일 경로
    fn active_file(&self) -> Option<PathBuf>;
}
