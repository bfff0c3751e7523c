//! 멀티스케일 템플릿 매칭 엔진.
//!
//! 템플릿마다 2단계 스케일 탐색을 한다.
//! 1. 대략 탐색: 1.0 / 0.7 / 0.5
//! 2. 최고 점수가 `θ - EARLY_EXIT_MARGIN` 미만이면 이 템플릿은 종료
//! 3. 정밀 탐색: 대략 탐색 최고 스케일에 따라 구간 선택
//!
//! 고정 순서로 순회하며 강한/약한 임계값을 처음 넘는 템플릿을 반환한다.

use std::borrow::Cow;
use std::sync::Arc;
use std::time::Instant;

use framewatch_core::models::matching::{MatchKind, MatchResult};
use framewatch_core::models::template::{Template, TemplateSet};
use framewatch_core::ports::correlation::{CorrelationPeak, CorrelationPrimitive};
use image::GrayImage;
use tracing::{debug, trace};

use crate::downscale::{resize_gray, scaled_dimensions};

/// 대략 탐색 스케일
pub const COARSE_SCALES: [f32; 3] = [1.0, 0.7, 0.5];

/// 대략 탐색 최고 스케일 ≥ 0.85 일 때 정밀 탐색 스케일
pub const HIGH_RANGE_SCALES: [f32; 5] = [0.97, 0.95, 0.92, 0.90, 0.85];

/// 대략 탐색 최고 스케일 < 0.6 일 때 정밀 탐색 스케일
pub const LOW_RANGE_SCALES: [f32; 3] = [0.6, 0.45, 0.4];

/// 중간 구간 정밀 탐색 폭 (±)
pub const MID_RANGE_SPAN: f32 = 0.05;

/// 조기 종료 여유폭
pub const EARLY_EXIT_MARGIN: f32 = 0.25;

/// 축소 템플릿 최소 변 길이 (픽셀)
pub const MIN_TEMPLATE_SIDE: u32 = 16;

/// 상관 연산 실패 시 점수
pub const FAILED_SCORE: f32 = -1.0;

/// 매칭 임계값 (호출 시점 설정에서 읽음)
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MatchThresholds {
    /// 강한 매칭 θ
    pub threshold: f32,
    /// 약한 매칭 여유폭
    pub weak_offset: f32,
}

impl MatchThresholds {
    /// 약한 매칭 하한
    pub fn weak_floor(&self) -> f32 {
        self.threshold - self.weak_offset
    }
}

/// 템플릿 하나의 스케일 탐색 결과
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScaleSearch {
    /// 최고 점수
    pub score: f32,
    /// 최고 점수 스케일
    pub scale: f32,
    /// 최고 점수 위치
    pub location: (u32, u32),
    /// 정밀 탐색 수행 여부
    pub refined: bool,
}

/// 정밀 탐색 스케일 구간
pub fn fine_scales(coarse_best_scale: f32) -> Vec<f32> {
    if coarse_best_scale >= 0.85 {
        HIGH_RANGE_SCALES.to_vec()
    } else if coarse_best_scale >= 0.6 {
        vec![
            coarse_best_scale - MID_RANGE_SPAN,
            coarse_best_scale + MID_RANGE_SPAN,
        ]
    } else {
        LOW_RANGE_SCALES.to_vec()
    }
}

/// 매칭 엔진
pub struct MatcherEngine {
    primitive: Arc<dyn CorrelationPrimitive>,
}

impl MatcherEngine {
    /// 상관 연산 어댑터로 생성
    pub fn new(primitive: Arc<dyn CorrelationPrimitive>) -> Self {
        Self { primitive }
    }

    /// 집합을 고정 순서로 순회하며 첫 번째 허용 매칭 반환
    pub fn find_match(
        &self,
        image: &GrayImage,
        templates: &TemplateSet,
        thresholds: MatchThresholds,
    ) -> Option<MatchResult> {
        let started = Instant::now();

        for template in templates.templates() {
            let Some(search) = self.search_template(image, template, thresholds) else {
                continue;
            };

            let kind = if search.score >= thresholds.threshold {
                MatchKind::Strong
            } else if search.score >= thresholds.weak_floor() {
                MatchKind::Weak
            } else {
                trace!(
                    "매칭 미달: {} (score={:.3}, scale={:.2})",
                    template.name,
                    search.score,
                    search.scale
                );
                continue;
            };

            let result = MatchResult {
                template_name: MatchResult::label_for(&template.name, kind),
                score: search.score,
                scale: search.scale,
                location: search.location,
                elapsed: started.elapsed(),
                kind,
            };
            debug!(
                "매칭: {} (score={:.3}, scale={:.2}, {:?})",
                result.template_name, result.score, result.scale, result.elapsed
            );
            return Some(result);
        }

        None
    }

    /// 템플릿 하나에 대한 2단계 스케일 탐색.
    ///
    /// 평가 가능한 스케일이 하나도 없으면 `None`.
    pub fn search_template(
        &self,
        image: &GrayImage,
        template: &Template,
        thresholds: MatchThresholds,
    ) -> Option<ScaleSearch> {
        let mut best: Option<ScaleSearch> = None;

        for &scale in &COARSE_SCALES {
            self.evaluate(image, template, scale, &mut best);
        }

        let coarse = best?;
        if coarse.score < thresholds.threshold - EARLY_EXIT_MARGIN {
            trace!(
                "조기 종료: {} (coarse={:.3})",
                template.name,
                coarse.score
            );
            return Some(coarse);
        }

        for scale in fine_scales(coarse.scale) {
            self.evaluate(image, template, scale, &mut best);
        }

        best.map(|b| ScaleSearch { refined: true, ..b })
    }

    /// 한 스케일 평가. 범위를 벗어나거나 너무 작으면 건너뛴다.
    fn evaluate(
        &self,
        image: &GrayImage,
        template: &Template,
        scale: f32,
        best: &mut Option<ScaleSearch>,
    ) {
        let (tw, th) = template.dimensions();
        let (sw, sh) = scaled_dimensions(tw, th, scale);
        if sw < MIN_TEMPLATE_SIDE || sh < MIN_TEMPLATE_SIDE {
            return;
        }
        if sw > image.width() || sh > image.height() {
            return;
        }

        let peak = match self.scaled(template, sw, sh) {
            Ok(raster) => self.correlate(image, &raster, &template.name, scale),
            Err(e) => {
                debug!("템플릿 스케일 실패: {} @ {scale:.2}: {e}", template.name);
                CorrelationPeak {
                    score: FAILED_SCORE,
                    location: (0, 0),
                }
            }
        };

        if best.map_or(true, |b| peak.score > b.score) {
            *best = Some(ScaleSearch {
                score: peak.score,
                scale,
                location: peak.location,
                refined: false,
            });
        }
    }

    fn scaled<'a>(
        &self,
        template: &'a Template,
        width: u32,
        height: u32,
    ) -> Result<Cow<'a, GrayImage>, framewatch_core::error::CoreError> {
        if template.dimensions() == (width, height) {
            Ok(Cow::Borrowed(&template.raster))
        } else {
            resize_gray(&template.raster, width, height).map(Cow::Owned)
        }
    }

    fn correlate(&self, image: &GrayImage, raster: &GrayImage, name: &str, scale: f32) -> CorrelationPeak {
        match self.primitive.match_score(image, raster) {
            Ok(peak) if peak.score.is_finite() => peak,
            Ok(_) => CorrelationPeak {
                score: FAILED_SCORE,
                location: (0, 0),
            },
            Err(e) => {
                debug!("상관 연산 실패: {name} @ {scale:.2}: {e}");
                CorrelationPeak {
                    score: FAILED_SCORE,
                    location: (0, 0),
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use framewatch_core::error::CoreError;
    use parking_lot::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// 템플릿 너비로 점수를 정하는 모의 연산기
    struct WidthScored {
        calls: AtomicUsize,
        widths: Mutex<Vec<u32>>,
        score: Box<dyn Fn(u32) -> Result<f32, CoreError> + Send + Sync>,
    }

    impl WidthScored {
        fn new(score: impl Fn(u32) -> Result<f32, CoreError> + Send + Sync + 'static) -> Arc<Self> {
            Arc::new(Self {
                calls: AtomicUsize::new(0),
                widths: Mutex::new(Vec::new()),
                score: Box::new(score),
            })
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    impl CorrelationPrimitive for WidthScored {
        fn match_score(
            &self,
            _image: &GrayImage,
            template: &GrayImage,
        ) -> Result<CorrelationPeak, CoreError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.widths.lock().push(template.width());
            (self.score)(template.width()).map(|score| CorrelationPeak {
                score,
                location: (5, 7),
            })
        }
    }

    fn thresholds(threshold: f32) -> MatchThresholds {
        MatchThresholds {
            threshold,
            weak_offset: 0.05,
        }
    }

    fn set(templates: Vec<Template>) -> TemplateSet {
        TemplateSet::new(templates, 1)
    }

    fn tpl(name: &str, side: u32) -> Template {
        Template::new(name, GrayImage::new(side, side))
    }

    /// 0.92 배율에서 최고점인 점수 곡선
    fn peak_at_092(width: u32) -> Result<f32, CoreError> {
        Ok(1.0 - (width as f32 / 100.0 - 0.92).abs() * 2.0)
    }

    #[test]
    fn strong_match_refines_to_092() {
        let primitive = WidthScored::new(peak_at_092);
        let engine = MatcherEngine::new(primitive.clone());
        let image = GrayImage::new(400, 400);

        let result = engine
            .find_match(&image, &set(vec![tpl("dialog", 100)]), thresholds(0.92))
            .unwrap();
        assert_eq!(result.template_name, "dialog");
        assert_eq!(result.kind, MatchKind::Strong);
        assert!((result.scale - 0.92).abs() < 1e-6);
        assert_eq!(result.location, (5, 7));
        // 대략 3 + 정밀 5
        assert_eq!(primitive.calls(), 8);
    }

    #[test]
    fn weak_match_is_tagged() {
        let primitive = WidthScored::new(|_| Ok(0.89));
        let engine = MatcherEngine::new(primitive);
        let image = GrayImage::new(400, 400);

        let result = engine
            .find_match(&image, &set(vec![tpl("dialog", 100)]), thresholds(0.92))
            .unwrap();
        assert_eq!(result.kind, MatchKind::Weak);
        assert_eq!(result.template_name, "weak_dialog");
    }

    #[test]
    fn below_weak_floor_is_none() {
        let primitive = WidthScored::new(|_| Ok(0.80));
        let engine = MatcherEngine::new(primitive);
        let image = GrayImage::new(400, 400);
        assert!(engine
            .find_match(&image, &set(vec![tpl("dialog", 100)]), thresholds(0.92))
            .is_none());
    }

    #[test]
    fn early_exit_skips_fine_phase() {
        let primitive = WidthScored::new(|_| Ok(0.2));
        let engine = MatcherEngine::new(primitive.clone());
        let image = GrayImage::new(400, 400);

        assert!(engine
            .find_match(&image, &set(vec![tpl("absent", 100)]), thresholds(0.8))
            .is_none());
        assert_eq!(primitive.calls(), 3);
    }

    #[test]
    fn first_acceptable_template_wins() {
        // 두 번째 템플릿이 더 높은 점수여도 첫 번째가 선택된다
        let primitive = WidthScored::new(|w| Ok(if w <= 60 { 0.99 } else { 0.95 }));
        let engine = MatcherEngine::new(primitive);
        let image = GrayImage::new(400, 400);

        let result = engine
            .find_match(
                &image,
                &set(vec![tpl("first", 200), tpl("second", 60)]),
                thresholds(0.9),
            )
            .unwrap();
        assert_eq!(result.template_name, "first");
    }

    #[test]
    fn primitive_failure_counts_as_worst_score() {
        let primitive = WidthScored::new(|w| {
            if w == 100 {
                Err(CoreError::Correlation("boom".to_string()))
            } else {
                Ok(0.1)
            }
        });
        let engine = MatcherEngine::new(primitive.clone());
        let image = GrayImage::new(400, 400);

        let search = engine
            .search_template(&image, &tpl("t", 100), thresholds(0.8))
            .unwrap();
        assert!((search.score - 0.1).abs() < 1e-6);
        assert!(!search.refined);
        assert_eq!(primitive.calls(), 3);
    }

    #[test]
    fn oversized_and_tiny_scales_skipped() {
        let primitive = WidthScored::new(|_| Ok(0.0));
        let engine = MatcherEngine::new(primitive.clone());

        // 1.0 배율(120)은 이미지(100)보다 큼 → 0.7, 0.5만 평가
        let image = GrayImage::new(100, 100);
        engine.search_template(&image, &tpl("big", 120), thresholds(0.8));
        assert_eq!(*primitive.widths.lock(), vec![84, 60]);

        // 20px 템플릿: 0.7 → 14px, 0.5 → 10px 는 최소 크기 미달
        primitive.widths.lock().clear();
        engine.search_template(&image, &tpl("small", 20), thresholds(0.8));
        assert_eq!(*primitive.widths.lock(), vec![20]);
    }

    #[test]
    fn no_evaluable_scale_is_none() {
        let primitive = WidthScored::new(|_| Ok(1.0));
        let engine = MatcherEngine::new(primitive.clone());
        let image = GrayImage::new(10, 10);
        assert!(engine
            .search_template(&image, &tpl("t", 40), thresholds(0.8))
            .is_none());
        assert_eq!(primitive.calls(), 0);
    }

    #[test]
    fn fine_brackets_by_coarse_scale() {
        assert_eq!(fine_scales(1.0), HIGH_RANGE_SCALES.to_vec());
        let mid = fine_scales(0.7);
        assert!((mid[0] - 0.65).abs() < 1e-6 && (mid[1] - 0.75).abs() < 1e-6);
        assert_eq!(fine_scales(0.5), LOW_RANGE_SCALES.to_vec());
    }
}
