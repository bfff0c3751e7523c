//! 상관도 연산 포트.
//!
//! 동일 채널 깊이의 그레이스케일 두 래스터(이미지 ≥ 템플릿)를 받아
//! 정규화 유사도 최고 점수와 그 위치를 반환하는 수치 프리미티브.
//! 구현: `framewatch-vision::zncc` (기본 어댑터), 테스트 목.

use image::GrayImage;

use crate::error::CoreError;

/// 최고 점수 + 위치
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CorrelationPeak {
    /// 정규화 유사도 [-1, 1]
    pub score: f32,
    /// 템플릿 좌상단 위치 (x, y)
    pub location: (u32, u32),
}

/// 상관도 연산 프리미티브
///
/// 동기 연산이며 비용은 이미지/템플릿 면적에 비례한다.
pub trait CorrelationPrimitive: Send + Sync {
    /// 이미지 안에서 템플릿의 최고 상관도 계산
    fn match_score(
        &self,
        image: &GrayImage,
        template: &GrayImage,
    ) -> Result<CorrelationPeak, CoreError>;
}
