//! 빈 화면 품질 검사.
//!
//! 중앙 80%×80% 영역의 휘도 표준편차가 임계값 미만이면 거의 단색 화면으로 본다.

use image::GrayImage;

/// 빈 화면 판정 표준편차 임계값
pub const BLANK_STDDEV_THRESHOLD: f64 = 5.0;

/// 표본 수 상한 (대형 프레임은 격자 간격을 넓혀 샘플링)
const MAX_SAMPLES: usize = 65_536;

/// 중앙 80% 영역의 휘도 표준편차
pub fn central_stddev(image: &GrayImage) -> f64 {
    let (w, h) = image.dimensions();
    if w == 0 || h == 0 {
        return 0.0;
    }

    let (x0, x1) = (w / 10, w - w / 10);
    let (y0, y1) = (h / 10, h - h / 10);
    let area = (x1 - x0) as usize * (y1 - y0) as usize;
    let step = ((area as f64 / MAX_SAMPLES as f64).sqrt().ceil() as u32).max(1);

    let mut count = 0u64;
    let mut sum = 0f64;
    let mut sum_sq = 0f64;
    for y in (y0..y1).step_by(step as usize) {
        for x in (x0..x1).step_by(step as usize) {
            let v = f64::from(image.get_pixel(x, y).0[0]);
            sum += v;
            sum_sq += v * v;
            count += 1;
        }
    }

    if count == 0 {
        return 0.0;
    }
    let n = count as f64;
    let mean = sum / n;
    (sum_sq / n - mean * mean).max(0.0).sqrt()
}

/// 거의 단색 화면인지 여부
pub fn is_blank(image: &GrayImage) -> bool {
    central_stddev(image) < BLANK_STDDEV_THRESHOLD
}
