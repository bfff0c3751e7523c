//! # framewatch-network
//!
//! 원격 동기화용 네트워크 어댑터.
//!
//! ## 모듈
//! - `webdav_client`: reqwest 기반 `RemoteTransport` / `TransportFactory` 구현
//! - `endpoint`: 사설망 주소 우선 엔드포인트 정렬
//! - `retry`: 고정 지연 재시도 정책 (대용량 단일 시도)

pub mod endpoint;
pub mod retry;
pub mod webdav_client;
