//! FrameWatch 도메인 모델.
//!
//! 캡처 프레임, 프레임 시그니처, 템플릿 집합, 매칭 결과, 저장 아티팩트를 정의한다.

pub mod artifact;
pub mod frame;
pub mod matching;
pub mod template;
