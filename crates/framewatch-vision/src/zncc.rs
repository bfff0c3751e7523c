//! ZNCC 상관 연산 기본 어댑터.
//!
//! 영평균 정규화 상호상관(ZNCC)을 이미지 피라미드 위에서 계산한다.
//! 1. 이미지와 템플릿을 2x2 박스 필터로 같은 단계만큼 축소한다.
//! 2. 최상위(가장 작은) 단계에서 모든 배치를 적분 영상으로 평가하고 상위 후보를 고른다.
//! 3. 한 단계씩 내려오며 후보 주변 `REFINE_RADIUS` 안에서만 다시 평가한다.
//!
//! 원본 해상도의 전수 탐색은 [`ZnccCorrelator::exhaustive`]로 쓸 수 있다.

use std::borrow::Cow;

use framewatch_core::error::CoreError;
use framewatch_core::ports::correlation::{CorrelationPeak, CorrelationPrimitive};
use image::GrayImage;

/// 평탄한 템플릿 판정 분산
const MIN_TEMPLATE_VARIANCE: f64 = 1e-6;

/// 평탄한 이미지 창 판정 분산 (해당 위치 건너뜀)
const MIN_WINDOW_VARIANCE: f64 = 1e-3;

/// 기본 피라미드 축소 횟수
pub const DEFAULT_PYRAMID_LEVELS: usize = 3;

/// 축소 단계 템플릿 최소 변 길이
const MIN_LEVEL_TEMPLATE_SIDE: u32 = 8;

/// 최상위 단계에서 유지하는 후보 수
const TOP_CANDIDATES: usize = 5;

/// 후보 간 최소 간격 (최상위 단계 픽셀, 체비셰프 거리)
const CANDIDATE_NMS_RADIUS: u32 = 2;

/// 하위 단계 재탐색 반경
const REFINE_RADIUS: u32 = 2;

/// ZNCC 상관 연산기
#[derive(Debug, Clone, Copy)]
pub struct ZnccCorrelator {
    max_levels: usize,
}

impl Default for ZnccCorrelator {
    fn default() -> Self {
        Self {
            max_levels: DEFAULT_PYRAMID_LEVELS,
        }
    }
}

impl ZnccCorrelator {
    /// 최대 축소 횟수 지정 (0이면 원본 전수 탐색)
    pub fn with_levels(max_levels: usize) -> Self {
        Self { max_levels }
    }

    /// 원본 해상도 전수 탐색
    pub fn exhaustive() -> Self {
        Self::with_levels(0)
    }
}

/// 영평균 템플릿
struct TemplatePlan {
    width: usize,
    height: usize,
    t_prime: Vec<f32>,
    var_t: f64,
}

impl TemplatePlan {
    fn new(template: &GrayImage) -> Result<Self, CoreError> {
        let (w, h) = template.dimensions();
        let raw = template.as_raw();
        let n = raw.len() as f64;
        let mean = raw.iter().map(|&v| f64::from(v)).sum::<f64>() / n;

        let t_prime: Vec<f32> = raw.iter().map(|&v| (f64::from(v) - mean) as f32).collect();
        let var_t: f64 = t_prime.iter().map(|&t| f64::from(t) * f64::from(t)).sum();
        if var_t <= MIN_TEMPLATE_VARIANCE {
            return Err(CoreError::Correlation("평탄한 템플릿".to_string()));
        }

        Ok(Self {
            width: w as usize,
            height: h as usize,
            t_prime,
            var_t,
        })
    }
}

/// 합 / 제곱합 적분 영상
struct IntegralImage {
    stride: usize,
    sum: Vec<u64>,
    sum_sq: Vec<u64>,
}

impl IntegralImage {
    fn new(image: &GrayImage) -> Self {
        let (w, h) = (image.width() as usize, image.height() as usize);
        let stride = w + 1;
        let mut sum = vec![0u64; stride * (h + 1)];
        let mut sum_sq = vec![0u64; stride * (h + 1)];
        let raw = image.as_raw();

        for y in 0..h {
            let mut row_sum = 0u64;
            let mut row_sq = 0u64;
            for x in 0..w {
                let v = u64::from(raw[y * w + x]);
                row_sum += v;
                row_sq += v * v;
                let idx = (y + 1) * stride + x + 1;
                sum[idx] = sum[idx - stride] + row_sum;
                sum_sq[idx] = sum_sq[idx - stride] + row_sq;
            }
        }

        Self {
            stride,
            sum,
            sum_sq,
        }
    }

    fn window(&self, x: usize, y: usize, w: usize, h: usize) -> (u64, u64) {
        let s = self.stride;
        let (a, b, c, d) = (y * s + x, y * s + x + w, (y + h) * s + x, (y + h) * s + x + w);
        (
            self.sum[d] + self.sum[a] - self.sum[b] - self.sum[c],
            self.sum_sq[d] + self.sum_sq[a] - self.sum_sq[b] - self.sum_sq[c],
        )
    }
}

/// 2x2 박스 필터 1/2 축소: `(a + b + c + d + 2) / 4`
fn half(image: &GrayImage) -> GrayImage {
    let src_w = image.width() as usize;
    let (w, h) = (image.width() / 2, image.height() / 2);
    let raw = image.as_raw();

    let mut out = Vec::with_capacity(w as usize * h as usize);
    for y in 0..h as usize {
        let top = &raw[2 * y * src_w..];
        let bottom = &raw[(2 * y + 1) * src_w..];
        for x in 0..w as usize {
            let sum = u16::from(top[2 * x])
                + u16::from(top[2 * x + 1])
                + u16::from(bottom[2 * x])
                + u16::from(bottom[2 * x + 1]);
            out.push(((sum + 2) / 4) as u8);
        }
    }
    GrayImage::from_raw(w, h, out).unwrap_or_else(|| GrayImage::new(w, h))
}

/// 피라미드 한 단계
struct Level<'a> {
    image: Cow<'a, GrayImage>,
    plan: TemplatePlan,
}

impl Level<'_> {
    fn max_x(&self) -> u32 {
        self.image.width() - self.plan.width as u32
    }

    fn max_y(&self) -> u32 {
        self.image.height() - self.plan.height as u32
    }

    /// (x, y) 배치의 ZNCC. 창이 평탄하면 `None`.
    ///
    /// 적분 영상이 없으면 창 합/제곱합을 내적과 같은 순회에서 구한다.
    fn score_at(&self, x: usize, y: usize, integral: Option<&IntegralImage>) -> Option<f32> {
        let (tw, th) = (self.plan.width, self.plan.height);
        let n = (tw * th) as f64;
        let image_width = self.image.width() as usize;
        let raw = self.image.as_raw();

        let precomputed = integral.map(|ii| ii.window(x, y, tw, th));
        if let Some((sum_i, sum_i2)) = precomputed {
            if window_variance(sum_i, sum_i2, n) <= MIN_WINDOW_VARIANCE {
                return None;
            }
        }

        let mut dot = 0f64;
        let mut sum_i = 0u64;
        let mut sum_i2 = 0u64;
        for ty in 0..th {
            let row_start = (y + ty) * image_width + x;
            let img_row = &raw[row_start..row_start + tw];
            let tpl_row = &self.plan.t_prime[ty * tw..(ty + 1) * tw];
            let row_dot: f32 = img_row
                .iter()
                .zip(tpl_row)
                .map(|(&v, &t)| f32::from(v) * t)
                .sum();
            dot += f64::from(row_dot);
            if precomputed.is_none() {
                for &v in img_row {
                    sum_i += u64::from(v);
                    sum_i2 += u64::from(v) * u64::from(v);
                }
            }
        }

        let var_i = match precomputed {
            Some((s, s2)) => window_variance(s, s2, n),
            None => {
                let var_i = window_variance(sum_i, sum_i2, n);
                if var_i <= MIN_WINDOW_VARIANCE {
                    return None;
                }
                var_i
            }
        };

        let score = (dot / (self.plan.var_t * var_i).sqrt()) as f32;
        score.is_finite().then_some(score)
    }

    /// 모든 배치 평가 후 간격을 둔 상위 후보 선택
    fn scan_all(&self) -> Vec<CorrelationPeak> {
        let integral = IntegralImage::new(&self.image);
        let mut peaks = Vec::new();
        for y in 0..=self.max_y() {
            for x in 0..=self.max_x() {
                if let Some(score) = self.score_at(x as usize, y as usize, Some(&integral)) {
                    peaks.push(CorrelationPeak {
                        score,
                        location: (x, y),
                    });
                }
            }
        }

        peaks.sort_by(|a, b| b.score.total_cmp(&a.score));
        let mut kept: Vec<CorrelationPeak> = Vec::with_capacity(TOP_CANDIDATES);
        for peak in peaks {
            let isolated = kept
                .iter()
                .all(|k| chebyshev(k.location, peak.location) > CANDIDATE_NMS_RADIUS);
            if isolated {
                kept.push(peak);
                if kept.len() == TOP_CANDIDATES {
                    break;
                }
            }
        }
        kept
    }

    /// 윗 단계 위치 주변 재탐색
    fn refine(&self, coarse: (u32, u32)) -> Option<CorrelationPeak> {
        let (cx, cy) = (coarse.0 * 2, coarse.1 * 2);
        let xs = cx.saturating_sub(REFINE_RADIUS)..=(cx + REFINE_RADIUS).min(self.max_x());
        let ys = cy.saturating_sub(REFINE_RADIUS)..=(cy + REFINE_RADIUS).min(self.max_y());

        let mut best: Option<CorrelationPeak> = None;
        for y in ys {
            for x in xs.clone() {
                if let Some(score) = self.score_at(x as usize, y as usize, None) {
                    if best.map_or(true, |b| score > b.score) {
                        best = Some(CorrelationPeak {
                            score,
                            location: (x, y),
                        });
                    }
                }
            }
        }
        best
    }
}

fn window_variance(sum: u64, sum_sq: u64, n: f64) -> f64 {
    sum_sq as f64 - (sum as f64 * sum as f64) / n
}

fn chebyshev(a: (u32, u32), b: (u32, u32)) -> u32 {
    a.0.abs_diff(b.0).max(a.1.abs_diff(b.1))
}

impl ZnccCorrelator {
    /// 원본부터 최대 `max_levels`번 축소한 단계 목록.
    ///
    /// 템플릿이 너무 작아지거나 평탄해지면 거기서 멈춘다.
    fn build_levels<'a>(
        &self,
        image: &'a GrayImage,
        template: &GrayImage,
    ) -> Result<Vec<Level<'a>>, CoreError> {
        let mut levels = vec![Level {
            image: Cow::Borrowed(image),
            plan: TemplatePlan::new(template)?,
        }];

        let mut tpl = Cow::Borrowed(template);
        while levels.len() <= self.max_levels {
            if tpl.width() / 2 < MIN_LEVEL_TEMPLATE_SIDE || tpl.height() / 2 < MIN_LEVEL_TEMPLATE_SIDE {
                break;
            }
            let next_tpl = half(&tpl);
            let Ok(plan) = TemplatePlan::new(&next_tpl) else {
                break;
            };
            let next_image = match levels.last() {
                Some(level) => half(&level.image),
                None => break,
            };
            levels.push(Level {
                image: Cow::Owned(next_image),
                plan,
            });
            tpl = Cow::Owned(next_tpl);
        }
        Ok(levels)
    }
}

impl CorrelationPrimitive for ZnccCorrelator {
    fn match_score(
        &self,
        image: &GrayImage,
        template: &GrayImage,
    ) -> Result<CorrelationPeak, CoreError> {
        let (iw, ih) = image.dimensions();
        let (tw, th) = template.dimensions();
        if tw == 0 || th == 0 {
            return Err(CoreError::Correlation("빈 템플릿".to_string()));
        }
        if tw > iw || th > ih {
            return Err(CoreError::Correlation(format!(
                "템플릿({tw}x{th})이 이미지({iw}x{ih})보다 큼"
            )));
        }

        let levels = self.build_levels(image, template)?;
        let Some((top, lower)) = levels.split_last() else {
            return Err(CoreError::Correlation("피라미드 없음".to_string()));
        };

        let mut candidates = top.scan_all();
        for level in lower.iter().rev() {
            candidates = candidates
                .iter()
                .filter_map(|c| level.refine(c.location))
                .collect();
        }

        // 모든 창이 평탄하면 상관 없음
        Ok(candidates
            .into_iter()
            .max_by(|a, b| a.score.total_cmp(&b.score))
            .unwrap_or(CorrelationPeak {
                score: 0.0,
                location: (0, 0),
            }))
    }
}
