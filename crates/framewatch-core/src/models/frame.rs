//! 캡처 프레임 + 프레임 시그니처 모델.
//!
//! `RawFrame`은 캡처 콜백 동안만 유효한 빌린 버퍼이고,
//! 게이트를 통과한 프레임만 `OwnedFrame`으로 복사되어 워커 큐로 넘어간다.

use chrono::{DateTime, Utc};

/// 픽셀당 바이트 수 (RGBA, row-major, 패딩 없음)
pub const BYTES_PER_PIXEL: usize = 4;

/// 시그니처 샘플 수 (모서리 4 + 변 중점 4 + 중앙 1)
pub const SIGNATURE_SAMPLES: usize = 9;

/// 샘플당 비트 수
pub const SIGNATURE_BITS_PER_SAMPLE: u32 = 7;

/// 캡처 스케일 힌트
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScaleHint {
    /// 원본 해상도
    Full,
    /// 캡처 계층에서 이미 1/2 축소됨
    Half,
}

impl ScaleHint {
    /// 정수 힌트 변환 (2 이상이면 Half, 그 외 Full)
    pub fn from_factor(factor: u32) -> Self {
        if factor >= 2 {
            ScaleHint::Half
        } else {
            ScaleHint::Full
        }
    }

    /// 원본 대비 축소 배율
    pub fn factor(self) -> u32 {
        match self {
            ScaleHint::Full => 1,
            ScaleHint::Half => 2,
        }
    }
}

/// 캡처 콜백에서 전달된 원시 프레임 (빌린 버퍼)
#[derive(Debug, Clone, Copy)]
pub struct RawFrame<'a> {
    /// RGBA 픽셀 버퍼
    pub pixels: &'a [u8],
    /// 너비 (픽셀)
    pub width: u32,
    /// 높이 (픽셀)
    pub height: u32,
    /// 스케일 힌트
    pub scale_hint: ScaleHint,
    /// 캡처 시각
    pub captured_at: DateTime<Utc>,
}

impl RawFrame<'_> {
    /// 기대 버퍼 크기 (`width * height * 4`)
    pub fn expected_len(&self) -> usize {
        self.width as usize * self.height as usize * BYTES_PER_PIXEL
    }
}

/// 워커 큐가 소유하는 프레임 복사본
#[derive(Clone)]
pub struct OwnedFrame {
    /// RGBA 픽셀 버퍼 (정확히 `width * height * 4` 바이트)
    pub pixels: Vec<u8>,
    /// 너비 (픽셀)
    pub width: u32,
    /// 높이 (픽셀)
    pub height: u32,
    /// 스케일 힌트
    pub scale_hint: ScaleHint,
    /// 캡처 시각
    pub captured_at: DateTime<Utc>,
}

impl std::fmt::Debug for OwnedFrame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OwnedFrame")
            .field("width", &self.width)
            .field("height", &self.height)
            .field("bytes", &self.pixels.len())
            .field("scale_hint", &self.scale_hint)
            .field("captured_at", &self.captured_at)
            .finish()
    }
}

/// 프레임 시그니처: 9개 샘플 휘도를 7비트씩 패킹한 63비트 정수.
///
/// 직전 시그니처와의 동등 비교에만 사용한다. 충돌 보장이 있는 해시가 아니다.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FrameSignature(u64);

impl FrameSignature {
    /// 8비트 휘도 샘플을 상위 7비트만 남겨 패킹
    pub fn pack(samples: &[u8; SIGNATURE_SAMPLES]) -> Self {
        let packed = samples.iter().fold(0u64, |acc, &luma| {
            (acc << SIGNATURE_BITS_PER_SAMPLE) | u64::from(luma >> 1)
        });
        Self(packed)
    }

    /// 원시 값
    pub fn value(self) -> u64 {
        self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn signature_fits_in_63_bits() {
        let sig = FrameSignature::pack(&[255; SIGNATURE_SAMPLES]);
        assert_eq!(sig.value(), (1u64 << 63) - 1);
    }

    #[test]
    fn signature_ignores_lowest_bit() {
        let a = FrameSignature::pack(&[10, 20, 30, 40, 50, 60, 70, 80, 90]);
        let b = FrameSignature::pack(&[11, 21, 31, 41, 51, 61, 71, 81, 91]);
        let c = FrameSignature::pack(&[12, 20, 30, 40, 50, 60, 70, 80, 90]);
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn scale_hint_from_factor() {
        assert_eq!(ScaleHint::from_factor(0), ScaleHint::Full);
        assert_eq!(ScaleHint::from_factor(1), ScaleHint::Full);
        assert_eq!(ScaleHint::from_factor(2), ScaleHint::Half);
        assert_eq!(ScaleHint::Half.factor(), 2);
    }
}
