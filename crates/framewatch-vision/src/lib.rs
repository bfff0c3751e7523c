//! # framewatch-vision
//!
//! 캡처 프레임 처리 크레이트.
//! 캡처 콜백 위의 저비용 게이트, 빈 화면 품질 검사,
//! 멀티스케일 템플릿 매칭, 단일 처리 워커를 담당한다.
//!
//! 상관 연산 자체는 `CorrelationPrimitive` 포트 뒤에 있으며,
//! 기본 구현은 [`zncc::ZnccCorrelator`]이다.

pub mod convert;
pub mod downscale;
pub mod gate;
pub mod matcher;
pub mod processor;
pub mod quality;
pub mod signature;
pub mod template_store;
pub mod zncc;
