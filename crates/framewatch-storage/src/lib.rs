//! # framewatch-storage
//!
//! 로컬 저장소 어댑터.
//! 캡처 이미지를 일자별 디렉토리에 저장하고, 업로드/정리를 위해
//! 아티팩트를 스캔하며, 용량 한도를 오래된 순으로 강제한다.
//!
//! ## 모듈
//! - `artifact_storage`: 캡처 저장 (`CaptureStore` 구현), 스캔, 용량 정리
//! - `log_file`: 교체 가능한 로그 파일 (`LogRotator` 구현)

pub mod artifact_storage;
pub mod log_file;
