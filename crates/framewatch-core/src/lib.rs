//! # framewatch-core
//!
//! FrameWatch 도메인 모델, 포트(trait) 정의, 에러 타입.
//! 모든 크레이트가 공유하는 핵심 타입과 인터페이스를 제공한다.
//!
//! ## 구조
//!
//! - [`models`]: 프레임, 시그니처, 템플릿, 매칭 결과, 저장 아티팩트
//! - [`ports`]: Hexagonal Architecture 포트 인터페이스 (상관도 연산, 원격 전송, 로그 회전)
//! - [`error`]: 핵심 에러 타입 (thiserror)
//! - [`config`]: 모니터 설정 + 원격 설정 문서
//! - [`config_manager`]: 설정 캐시 파일 관리 (로드/병합/저장)

pub mod config;
pub mod config_manager;
pub mod error;
pub mod models;
pub mod ports;
