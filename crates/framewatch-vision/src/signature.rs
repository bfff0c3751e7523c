//! 9점 휘도 샘플 기반 프레임 시그니처.
//!
//! 모서리 4개, 변 중점 4개, 중앙 1개를 정규화 좌표 (0.05 / 0.5 / 0.95)에서 샘플링한다.
//! 전체 버퍼를 훑지 않으므로 캡처 콜백 안에서 호출해도 비용이 상수다.

use framewatch_core::error::CoreError;
use framewatch_core::models::frame::{
    FrameSignature, RawFrame, BYTES_PER_PIXEL, SIGNATURE_SAMPLES,
};

use crate::convert::luma;

/// 샘플 정규화 좌표 (축별)
const SAMPLE_POSITIONS: [f32; 3] = [0.05, 0.5, 0.95];

/// 프레임 시그니처 계산
pub fn compute_signature(frame: &RawFrame<'_>) -> Result<FrameSignature, CoreError> {
    if frame.width == 0 || frame.height == 0 {
        return Err(CoreError::Validation {
            field: "frame".to_string(),
            message: "프레임 크기 0".to_string(),
        });
    }

    let stride = frame.width as usize * BYTES_PER_PIXEL;
    let mut samples = [0u8; SIGNATURE_SAMPLES];

    for (i, sample) in samples.iter_mut().enumerate() {
        let nx = SAMPLE_POSITIONS[i % 3];
        let ny = SAMPLE_POSITIONS[i / 3];
        let x = sample_index(frame.width, nx);
        let y = sample_index(frame.height, ny);
        let offset = y * stride + x * BYTES_PER_PIXEL;

        let px = frame
            .pixels
            .get(offset..offset + 3)
            .ok_or(CoreError::SizeMismatch {
                expected: frame.expected_len(),
                actual: frame.pixels.len(),
            })?;
        *sample = luma(px[0], px[1], px[2]);
    }

    Ok(FrameSignature::pack(&samples))
}

#[inline]
fn sample_index(extent: u32, normalized: f32) -> usize {
    let max = extent.saturating_sub(1) as f32;
    (max * normalized).round() as usize
}
