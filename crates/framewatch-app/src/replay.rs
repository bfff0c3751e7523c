//! 디렉토리 재생 캡처 소스.
//!
//! 실제 캡처 계층 대신 이미지 파일을 RGBA 프레임으로 디코딩해 일정 간격으로
//! 게이트에 밀어 넣는다. 목록 끝에 닿으면 처음부터 반복한다.

use framewatch_core::error::CoreError;
use framewatch_core::models::artifact::ArtifactKind;
use framewatch_vision::gate::{Admission, CaptureGate};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};

/// 최소 재생 간격
const MIN_REPLAY_PERIOD: Duration = Duration::from_millis(1);

/// 최대 재생 간격
const MAX_REPLAY_PERIOD: Duration = Duration::from_secs(3600);

/// fps → 프레임 간격. 유효하지 않은 fps는 1fps로 본다.
fn frame_period(fps: f32) -> Duration {
    let fps = if fps.is_finite() && fps > 0.0 { fps } else { 1.0 };
    Duration::try_from_secs_f32(1.0 / fps)
        .unwrap_or(MAX_REPLAY_PERIOD)
        .clamp(MIN_REPLAY_PERIOD, MAX_REPLAY_PERIOD)
}

struct ReplayFrame {
    name: String,
    pixels: Vec<u8>,
    width: u32,
    height: u32,
}

/// 이미지 디렉토리 재생기
pub struct ReplaySource {
    frames: Vec<ReplayFrame>,
    period: Duration,
}

impl ReplaySource {
    /// 디렉토리의 이미지를 파일명 순으로 디코딩
    pub fn load(dir: &Path, fps: f32) -> Result<Self, CoreError> {
        let mut paths: Vec<PathBuf> = std::fs::read_dir(dir)?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|path| ArtifactKind::from_path(path) == Some(ArtifactKind::Image))
            .collect();
        paths.sort();

        let mut frames = Vec::with_capacity(paths.len());
        for path in paths {
            match image::open(&path) {
                Ok(img) => {
                    let rgba = img.to_rgba8();
                    let (width, height) = rgba.dimensions();
                    frames.push(ReplayFrame {
                        name: path.display().to_string(),
                        pixels: rgba.into_raw(),
                        width,
                        height,
                    });
                }
                Err(e) => warn!("재생 프레임 디코딩 실패, 건너뜀: {}: {e}", path.display()),
            }
        }

        if frames.is_empty() {
            return Err(CoreError::NotFound {
                resource_type: "ReplayFrame".to_string(),
                id: dir.display().to_string(),
            });
        }

        Ok(Self {
            frames,
            period: frame_period(fps),
        })
    }

    /// 프레임 수
    pub fn len(&self) -> usize {
        self.frames.len()
    }

    /// 프레임 간격
    pub fn period(&self) -> Duration {
        self.period
    }

    /// 재생 태스크 시작
    pub fn spawn(self, gate: Arc<CaptureGate>, mut shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        tokio::spawn(async move {
            info!("프레임 재생 시작: {}개, 간격 {:?}", self.frames.len(), self.period);
            let mut ticker = tokio::time::interval(self.period);
            let mut index = 0usize;

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        if gate.is_closed() {
                            break;
                        }
                        let frame = &self.frames[index % self.frames.len()];
                        match gate.on_frame(&frame.pixels, frame.width, frame.height, 1) {
                            Admission::Admitted => debug!("재생 프레임 허용: {}", frame.name),
                            Admission::Dropped(reason) => trace!("재생 프레임 거부: {reason:?}"),
                        }
                        index = index.wrapping_add(1);
                    }
                    changed = shutdown.changed() => {
                        if changed.is_err() || *shutdown.borrow() {
                            break;
                        }
                    }
                }
            }
            info!("프레임 재생 종료");
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use framewatch_core::config::MonitorConfig;
    use framewatch_core::config_manager::ConfigManager;
    use image::{Rgba, RgbaImage};
    use tempfile::TempDir;

    #[test]
    fn loads_images_in_name_order() {
        let dir = TempDir::new().unwrap();
        RgbaImage::from_pixel(8, 6, Rgba([1, 2, 3, 255]))
            .save(dir.path().join("b.png"))
            .unwrap();
        RgbaImage::from_pixel(4, 4, Rgba([9, 9, 9, 255]))
            .save(dir.path().join("a.png"))
            .unwrap();
        std::fs::write(dir.path().join("notes.txt"), b"skip").unwrap();
        std::fs::write(dir.path().join("corrupt.png"), b"not png").unwrap();

        let source = ReplaySource::load(dir.path(), 4.0).unwrap();
        assert_eq!(source.len(), 2);
        assert_eq!(source.period(), Duration::from_millis(250));
        assert_eq!((source.frames[0].width, source.frames[0].height), (4, 4));
        assert_eq!(source.frames[1].pixels.len(), 8 * 6 * 4);
    }

    #[test]
    fn frame_period_is_clamped() {
        assert_eq!(frame_period(4.0), Duration::from_millis(250));
        assert_eq!(frame_period(1e9), MIN_REPLAY_PERIOD);
        assert_eq!(frame_period(f32::MAX), MIN_REPLAY_PERIOD);
        assert_eq!(frame_period(1e-30), MAX_REPLAY_PERIOD);
        assert_eq!(frame_period(0.0), Duration::from_secs(1));
        assert_eq!(frame_period(f32::NAN), Duration::from_secs(1));
    }

    #[tokio::test]
    async fn very_high_fps_replays_until_shutdown() {
        let dir = TempDir::new().unwrap();
        RgbaImage::from_pixel(4, 4, Rgba([7, 7, 7, 255]))
            .save(dir.path().join("a.png"))
            .unwrap();
        let source = ReplaySource::load(dir.path(), 1e12).unwrap();
        assert_eq!(source.period(), MIN_REPLAY_PERIOD);

        let config = ConfigManager::with_config(MonitorConfig::default(), PathBuf::from("unused.json"));
        let (gate, _queue) = CaptureGate::new(Arc::new(config));
        let gate = Arc::new(gate);
        let (tx, rx) = watch::channel(false);

        let task = source.spawn(Arc::clone(&gate), rx);
        tokio::time::sleep(Duration::from_millis(20)).await;
        tx.send(true).unwrap();
        task.await.unwrap();
        assert!(gate.stats().admitted >= 1);
    }

    #[test]
    fn empty_directory_is_an_error() {
        let dir = TempDir::new().unwrap();
        assert!(matches!(
            ReplaySource::load(dir.path(), 2.0),
            Err(CoreError::NotFound { .. })
        ));
    }
}
