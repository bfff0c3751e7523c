//! 프레임 처리기 + 단일 워커.
//!
//! 워커는 게이트가 허용한 프레임을 FIFO로 하나씩 처리한다.
//! CPU 작업(변환, 다운스케일, 품질 검사, 매칭, PNG 인코딩)은 `spawn_blocking`에서 실행하고,
//! 저장만 비동기로 한다. 처리 중 생성한 래스터는 클로저 스코프를 벗어나면서 해제된다.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use framewatch_core::config_manager::ConfigManager;
use framewatch_core::error::CoreError;
use framewatch_core::models::frame::{OwnedFrame, ScaleHint};
use framewatch_core::models::matching::MatchResult;
use framewatch_core::models::template::TemplateSet;
use framewatch_core::ports::capture_store::{CaptureLabel, CaptureStore};
use framewatch_core::ports::correlation::CorrelationPrimitive;
use image::codecs::png::PngEncoder;
use image::{ExtendedColorType, ImageEncoder};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::convert::rgba_to_gray;
use crate::downscale::{fit_within, PROCESSING_MAX_EDGE};
use crate::gate::FrameQueue;
use crate::matcher::{MatchThresholds, MatcherEngine};
use crate::quality::{central_stddev, BLANK_STDDEV_THRESHOLD};
use crate::template_store::TemplateStore;

/// 강제 저장 간격
pub const FORCE_SAVE_INTERVAL: Duration = Duration::from_secs(30 * 60);

/// 프레임 하나의 처리 결과
#[derive(Debug, Clone, PartialEq)]
pub enum ProcessOutcome {
    /// 템플릿 없음 (이미지 변환 전 종료)
    NoTemplates,
    /// 빈 화면
    Blank {
        /// 중앙 영역 표준편차
        stddev: f64,
    },
    /// 쿨다운 중이라 매칭 생략
    Cooldown,
    /// 매칭 없음
    NoMatch,
    /// 매칭
    Matched {
        /// 매칭 결과
        result: MatchResult,
        /// 저장 경로 (저장 실패 시 `None`)
        saved: Option<PathBuf>,
    },
    /// 처리 실패 (프레임 폐기)
    Failed(String),
}

/// blocking 구간 결과
struct Analysis {
    stddev: f64,
    matched: Option<MatchResult>,
    png: Option<Vec<u8>>,
}

/// 프레임 처리기
pub struct FrameProcessor {
    config: Arc<ConfigManager>,
    store: Arc<TemplateStore>,
    matcher: Arc<MatcherEngine>,
    sink: Arc<dyn CaptureStore>,
    versions: watch::Receiver<u64>,
    force_save_interval: Duration,
    last_force_save: Instant,
    last_match: Option<Instant>,
}

impl FrameProcessor {
    /// 새 처리기 생성 (첫 강제 저장은 생성 후 한 간격 뒤)
    pub fn new(
        config: Arc<ConfigManager>,
        store: Arc<TemplateStore>,
        primitive: Arc<dyn CorrelationPrimitive>,
        sink: Arc<dyn CaptureStore>,
    ) -> Self {
        let versions = store.subscribe();
        Self {
            config,
            store,
            matcher: Arc::new(MatcherEngine::new(primitive)),
            sink,
            versions,
            force_save_interval: FORCE_SAVE_INTERVAL,
            last_force_save: Instant::now(),
            last_match: None,
        }
    }

    /// 강제 저장 간격 변경
    pub fn with_force_save_interval(mut self, interval: Duration) -> Self {
        self.force_save_interval = interval;
        self
    }

    /// 프레임 하나 처리
    pub async fn process(&mut self, frame: OwnedFrame) -> ProcessOutcome {
        if self.versions.has_changed().unwrap_or(false) {
            let version = *self.versions.borrow_and_update();
            info!("템플릿 집합 갱신 감지: v{version}");
        }

        let templates = self.store.snapshot();
        if templates.is_empty() {
            return ProcessOutcome::NoTemplates;
        }

        let (thresholds, cooldown) = self.config.read(|c| {
            (
                MatchThresholds {
                    threshold: c.match_threshold,
                    weak_offset: c.weak_match_offset,
                },
                c.match_cooldown(),
            )
        });
        let force_due = self.last_force_save.elapsed() >= self.force_save_interval;
        let cooling = self
            .last_match
            .is_some_and(|at| at.elapsed() < cooldown);
        let captured_at = frame.captured_at;

        let matcher = Arc::clone(&self.matcher);
        let analysis = tokio::task::spawn_blocking(move || {
            analyze(frame, &templates, &matcher, thresholds, force_due, cooling)
        })
        .await;

        let analysis = match analysis {
            Ok(Ok(analysis)) => analysis,
            Ok(Err(e)) => {
                warn!("프레임 처리 실패, 폐기: {e}");
                return ProcessOutcome::Failed(e.to_string());
            }
            Err(e) => {
                error!("프레임 처리 작업 중단: {e}");
                return ProcessOutcome::Failed(format!("처리 작업 중단: {e}"));
            }
        };

        if analysis.stddev < BLANK_STDDEV_THRESHOLD {
            debug!("빈 화면 건너뜀 (stddev={:.2})", analysis.stddev);
            return ProcessOutcome::Blank {
                stddev: analysis.stddev,
            };
        }

        if force_due {
            self.last_force_save = Instant::now();
            if let Some(png) = analysis.png.as_deref() {
                self.save(&CaptureLabel::Forced, captured_at, png).await;
            }
        }

        if cooling {
            return ProcessOutcome::Cooldown;
        }

        match analysis.matched {
            Some(result) => {
                self.last_match = Some(Instant::now());
                let saved = match analysis.png.as_deref() {
                    Some(png) => {
                        let label = CaptureLabel::Matched(result.template_name.clone());
                        self.save(&label, captured_at, png).await
                    }
                    None => None,
                };
                ProcessOutcome::Matched { result, saved }
            }
            None => ProcessOutcome::NoMatch,
        }
    }

    async fn save(
        &self,
        label: &CaptureLabel,
        captured_at: DateTime<Utc>,
        png: &[u8],
    ) -> Option<PathBuf> {
        match self.sink.save_capture(label, captured_at, png).await {
            Ok(path) => {
                info!("캡처 저장: {}", path.display());
                Some(path)
            }
            Err(e) => {
                warn!("캡처 저장 실패 ({label:?}): {e}");
                None
            }
        }
    }
}

/// 변환 → 다운스케일 → 품질 검사 → 매칭 → 필요 시 PNG 인코딩
fn analyze(
    frame: OwnedFrame,
    templates: &TemplateSet,
    matcher: &MatcherEngine,
    thresholds: MatchThresholds,
    force_due: bool,
    cooling: bool,
) -> Result<Analysis, CoreError> {
    let gray = rgba_to_gray(&frame.pixels, frame.width, frame.height)?;
    let gray = fit_within(gray, PROCESSING_MAX_EDGE)?;
    if frame.scale_hint == ScaleHint::Half {
        debug!("1/2 축소 캡처: {}x{}", gray.width(), gray.height());
    }

    let stddev = central_stddev(&gray);
    if stddev < BLANK_STDDEV_THRESHOLD {
        return Ok(Analysis {
            stddev,
            matched: None,
            png: None,
        });
    }

    let matched = if cooling {
        None
    } else {
        matcher.find_match(&gray, templates, thresholds)
    };
    drop(gray);

    let png = if force_due || matched.is_some() {
        Some(encode_png(&frame)?)
    } else {
        None
    };

    Ok(Analysis {
        stddev,
        matched,
        png,
    })
}

/// 원본 컬러 프레임 PNG 인코딩
fn encode_png(frame: &OwnedFrame) -> Result<Vec<u8>, CoreError> {
    let mut out = Vec::new();
    PngEncoder::new(&mut out).write_image(
        &frame.pixels,
        frame.width,
        frame.height,
        ExtendedColorType::Rgba8,
    )?;
    Ok(out)
}

/// 단일 처리 워커
pub struct FrameWorker {
    processor: FrameProcessor,
    queue: FrameQueue,
    reports: Option<mpsc::UnboundedSender<ProcessOutcome>>,
}

impl FrameWorker {
    /// 처리기와 게이트 큐로 워커 구성
    pub fn new(processor: FrameProcessor, queue: FrameQueue) -> Self {
        Self {
            processor,
            queue,
            reports: None,
        }
    }

    /// 프레임별 처리 결과 보고 채널 연결
    pub fn with_reports(mut self, reports: mpsc::UnboundedSender<ProcessOutcome>) -> Self {
        self.reports = Some(reports);
        self
    }

    /// 워커 태스크 시작.
    ///
    /// 대기 중에만 종료 신호를 확인한다. 처리 중인 프레임은 끝까지 처리하며,
    /// 종료 유예 시간 초과 시 호출자가 핸들을 abort한다.
    pub fn spawn(self, mut shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        let Self {
            mut processor,
            queue,
            reports,
        } = self;
        let FrameQueue { mut rx, flag } = queue;

        tokio::spawn(async move {
            info!("프레임 워커 시작");
            loop {
                tokio::select! {
                    frame = rx.recv() => {
                        let Some(frame) = frame else { break };
                        // 패닉/abort 시에도 Drop에서 백프레셔 해제
                        let _guard = flag.release_on_drop();
                        let outcome = processor.process(frame).await;
                        debug!("프레임 처리 결과: {outcome:?}");
                        if let Some(tx) = &reports {
                            let _ = tx.send(outcome);
                        }
                    }
                    changed = shutdown.changed() => {
                        if changed.is_err() || *shutdown.borrow() {
                            break;
                        }
                    }
                }
            }
            info!("프레임 워커 종료");
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gate::{Admission, CaptureGate};
    use async_trait::async_trait;
    use framewatch_core::config::MonitorConfig;
    use framewatch_core::models::template::Template;
    use framewatch_core::ports::correlation::CorrelationPeak;
    use image::{GrayImage, Luma};
    use parking_lot::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct MemorySink {
        saved: Mutex<Vec<CaptureLabel>>,
    }

    #[async_trait]
    impl CaptureStore for MemorySink {
        async fn save_capture(
            &self,
            label: &CaptureLabel,
            _captured_at: DateTime<Utc>,
            png: &[u8],
        ) -> Result<PathBuf, CoreError> {
            assert!(png.starts_with(&[0x89, b'P', b'N', b'G']));
            self.saved.lock().push(label.clone());
            Ok(PathBuf::from(format!("mem/{}", self.saved.lock().len())))
        }
    }

    struct Scripted {
        calls: AtomicUsize,
        score: f32,
    }

    impl CorrelationPrimitive for Scripted {
        fn match_score(
            &self,
            _image: &GrayImage,
            _template: &GrayImage,
        ) -> Result<CorrelationPeak, CoreError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(CorrelationPeak {
                score: self.score,
                location: (0, 0),
            })
        }
    }

    struct Fixture {
        processor: FrameProcessor,
        primitive: Arc<Scripted>,
        sink: Arc<MemorySink>,
        store: Arc<TemplateStore>,
        config: Arc<ConfigManager>,
    }

    fn fixture(score: f32, with_templates: bool) -> Fixture {
        let config = Arc::new(ConfigManager::with_config(
            MonitorConfig {
                match_threshold: 0.9,
                match_cooldown_ms: 60_000,
                detect_per_second: 1000.0,
                ..MonitorConfig::default()
            },
            PathBuf::from("unused.json"),
        ));
        let store = Arc::new(TemplateStore::new());
        if with_templates {
            store.replace(vec![Template::new("button", GrayImage::new(32, 32))]);
        }
        let primitive = Arc::new(Scripted {
            calls: AtomicUsize::new(0),
            score,
        });
        let sink = Arc::new(MemorySink::default());
        let processor = FrameProcessor::new(
            config.clone(),
            store.clone(),
            primitive.clone(),
            sink.clone(),
        );
        Fixture {
            processor,
            primitive,
            sink,
            store,
            config,
        }
    }

    fn frame_from(gray: &GrayImage) -> OwnedFrame {
        let pixels = gray
            .pixels()
            .flat_map(|p| [p.0[0], p.0[0], p.0[0], 255])
            .collect();
        OwnedFrame {
            pixels,
            width: gray.width(),
            height: gray.height(),
            scale_hint: ScaleHint::Full,
            captured_at: Utc::now(),
        }
    }

    fn busy_frame(seed: u32) -> OwnedFrame {
        frame_from(&GrayImage::from_fn(200, 150, |x, y| {
            Luma([((x * 3 + y * 5 + seed) % 256) as u8])
        }))
    }

    #[tokio::test]
    async fn no_templates_is_noop() {
        let mut f = fixture(1.0, false);
        let outcome = f.processor.process(busy_frame(0)).await;
        assert_eq!(outcome, ProcessOutcome::NoTemplates);
        assert_eq!(f.primitive.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn blank_frame_skips_matching() {
        let mut f = fixture(1.0, true);
        let blank = frame_from(&GrayImage::from_pixel(1000, 1000, Luma([128])));
        let outcome = f.processor.process(blank).await;
        assert!(matches!(outcome, ProcessOutcome::Blank { .. }));
        assert_eq!(f.primitive.calls.load(Ordering::SeqCst), 0);
        assert!(f.sink.saved.lock().is_empty());
    }

    #[tokio::test]
    async fn match_persists_then_cooldown() {
        let mut f = fixture(0.95, true);

        let outcome = f.processor.process(busy_frame(0)).await;
        let ProcessOutcome::Matched { result, saved } = outcome else {
            panic!("매칭 기대: {outcome:?}");
        };
        assert_eq!(result.template_name, "button");
        assert!(saved.is_some());
        let calls = f.primitive.calls.load(Ordering::SeqCst);
        assert!(calls > 0);

        let outcome = f.processor.process(busy_frame(7)).await;
        assert_eq!(outcome, ProcessOutcome::Cooldown);
        assert_eq!(f.primitive.calls.load(Ordering::SeqCst), calls);
        assert_eq!(
            *f.sink.saved.lock(),
            vec![CaptureLabel::Matched("button".to_string())]
        );
    }

    #[tokio::test]
    async fn weak_match_label_persisted() {
        let mut f = fixture(0.87, true);
        let outcome = f.processor.process(busy_frame(0)).await;
        assert!(matches!(outcome, ProcessOutcome::Matched { .. }));
        assert_eq!(
            *f.sink.saved.lock(),
            vec![CaptureLabel::Matched("weak_button".to_string())]
        );
    }

    #[tokio::test]
    async fn force_save_independent_of_matching() {
        let f = fixture(0.1, true);
        let mut processor = f.processor.with_force_save_interval(Duration::ZERO);

        let outcome = processor.process(busy_frame(0)).await;
        assert_eq!(outcome, ProcessOutcome::NoMatch);
        assert_eq!(*f.sink.saved.lock(), vec![CaptureLabel::Forced]);
    }

    #[tokio::test]
    async fn first_force_save_waits_one_interval() {
        let mut f = fixture(0.1, true);
        f.processor.process(busy_frame(0)).await;
        assert!(f.sink.saved.lock().is_empty());
    }

    #[tokio::test]
    async fn worker_processes_and_releases_backpressure() {
        let f = fixture(0.95, true);
        let (gate, queue) = CaptureGate::new(f.config.clone());
        let (report_tx, mut report_rx) = mpsc::unbounded_channel();
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let handle = FrameWorker::new(f.processor, queue)
            .with_reports(report_tx)
            .spawn(shutdown_rx);

        let frame = busy_frame(0);
        assert_eq!(
            gate.on_frame(&frame.pixels, frame.width, frame.height, 1),
            Admission::Admitted
        );

        let outcome = report_rx.recv().await.unwrap();
        assert!(matches!(outcome, ProcessOutcome::Matched { .. }));
        // 보고 전송 직후 가드가 해제되므로 잠시 대기
        for _ in 0..50 {
            if !gate.is_busy() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(!gate.is_busy());

        shutdown_tx.send(true).unwrap();
        handle.await.unwrap();
        assert_eq!(f.store.snapshot().len(), 1);
    }
}
