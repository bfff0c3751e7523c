//! # framewatch-sync
//!
//! 원격 엔드포인트와의 주기적 동기화.
//!
//! ## 모듈
//! - `scheduler`: 이름 있는 주기 작업 + 작업별 "실행 중" 가드
//! - `manager`: Sync Manager (설정 갱신, 템플릿 갱신, 용량 정리)
//! - `upload`: 아티팩트/로그 업로드

pub mod manager;
pub mod scheduler;
pub mod upload;

pub use manager::{ConfigRefresh, SyncManager, SyncPaths, TemplateRefreshReport};
pub use scheduler::{JobScheduler, RunGuard};
pub use upload::UploadReport;

#[cfg(test)]
pub(crate) mod testing;
