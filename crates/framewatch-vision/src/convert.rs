//! RGBA → 그레이스케일 변환.

use framewatch_core::error::CoreError;
use framewatch_core::models::frame::BYTES_PER_PIXEL;
use image::GrayImage;

/// BT.601 정수 근사 휘도 (0..=255)
#[inline]
pub fn luma(r: u8, g: u8, b: u8) -> u8 {
    ((299 * u32::from(r) + 587 * u32::from(g) + 114 * u32::from(b)) / 1000) as u8
}

/// RGBA 버퍼를 그레이스케일 래스터로 변환
pub fn rgba_to_gray(pixels: &[u8], width: u32, height: u32) -> Result<GrayImage, CoreError> {
    let expected = width as usize * height as usize * BYTES_PER_PIXEL;
    if width == 0 || height == 0 {
        return Err(CoreError::Image("빈 프레임".to_string()));
    }
    if pixels.len() < expected {
        return Err(CoreError::SizeMismatch {
            expected,
            actual: pixels.len(),
        });
    }

    let gray: Vec<u8> = pixels[..expected]
        .chunks_exact(BYTES_PER_PIXEL)
        .map(|px| luma(px[0], px[1], px[2]))
        .collect();

    GrayImage::from_raw(width, height, gray)
        .ok_or_else(|| CoreError::Image("그레이스케일 버퍼 생성 실패".to_string()))
}
