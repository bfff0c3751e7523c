//! 그레이스케일 리사이즈.
//!
//! fast_image_resize 기반. 처리 해상도 상한 적용과 템플릿 스케일링에 공용으로 쓴다.

use fast_image_resize::{images::Image as FirImage, PixelType, ResizeAlg, ResizeOptions, Resizer};
use framewatch_core::error::CoreError;
use image::GrayImage;
use tracing::debug;

/// 처리 해상도 상한 (최장 변, 픽셀)
pub const PROCESSING_MAX_EDGE: u32 = 1280;

/// 그레이스케일 래스터를 지정 크기로 리사이즈
pub fn resize_gray(src: &GrayImage, width: u32, height: u32) -> Result<GrayImage, CoreError> {
    let (src_w, src_h) = src.dimensions();
    if src_w == width && src_h == height {
        return Ok(src.clone());
    }
    if src_w == 0 || src_h == 0 {
        return Err(CoreError::Image("소스 이미지 크기 0".to_string()));
    }
    if width == 0 || height == 0 {
        return Err(CoreError::Image("목표 이미지 크기 0".to_string()));
    }

    let src_image = FirImage::from_vec_u8(src_w, src_h, src.as_raw().clone(), PixelType::U8)
        .map_err(|e| CoreError::Image(format!("소스 이미지 생성 실패: {e}")))?;
    let mut dst_image = FirImage::new(width, height, PixelType::U8);

    let mut resizer = Resizer::new();
    let options = ResizeOptions::new().resize_alg(ResizeAlg::Convolution(
        fast_image_resize::FilterType::Bilinear,
    ));
    resizer
        .resize(&src_image, &mut dst_image, &options)
        .map_err(|e| CoreError::Image(format!("리사이즈 실패: {e}")))?;

    GrayImage::from_raw(width, height, dst_image.into_vec())
        .ok_or_else(|| CoreError::Image("결과 이미지 생성 실패".to_string()))
}

/// 최장 변이 `max_edge`를 넘으면 비율을 유지해 한 번 축소
pub fn fit_within(src: GrayImage, max_edge: u32) -> Result<GrayImage, CoreError> {
    let (w, h) = src.dimensions();
    let longest = w.max(h);
    if longest <= max_edge {
        return Ok(src);
    }

    let ratio = max_edge as f64 / longest as f64;
    let target_w = ((w as f64 * ratio).round() as u32).max(1);
    let target_h = ((h as f64 * ratio).round() as u32).max(1);
    debug!("다운스케일: {w}x{h} → {target_w}x{target_h}");
    resize_gray(&src, target_w, target_h)
}

/// 스케일 배율 적용 크기 (반올림)
pub fn scaled_dimensions(width: u32, height: u32, scale: f32) -> (u32, u32) {
    (
        (width as f32 * scale).round() as u32,
        (height as f32 * scale).round() as u32,
    )
}
