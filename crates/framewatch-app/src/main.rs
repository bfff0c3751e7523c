//! # framewatch-app
//!
//! FrameWatch 바이너리 진입점.
//! 설정 로드, 어댑터 와이어링, 프레임 워커/주기 작업 시작, 종료 순서 관리.

mod lifecycle;
mod replay;

use anyhow::Result;
use clap::Parser;
use directories::ProjectDirs;
use framewatch_core::config::{LOCAL_CONFIG_FILE_NAME, LOGS_DIR_NAME, TEMPLATES_DIR_NAME};
use framewatch_core::config_manager::ConfigManager;
use framewatch_core::ports::correlation::CorrelationPrimitive;
use framewatch_network::webdav_client::WebDavConnector;
use framewatch_storage::artifact_storage::ArtifactStorage;
use framewatch_storage::log_file::RotatingLogFile;
use framewatch_sync::{JobScheduler, SyncManager, SyncPaths};
use framewatch_vision::gate::CaptureGate;
use framewatch_vision::processor::{FrameProcessor, FrameWorker};
use framewatch_vision::template_store::TemplateStore;
use framewatch_vision::zncc::ZnccCorrelator;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

use crate::lifecycle::{drain_within, LifecycleManager, SHUTDOWN_GRACE};
use crate::replay::ReplaySource;

/// 화면 템플릿 감시 에이전트
#[derive(Parser, Debug)]
#[command(name = "framewatch")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// 외부 저장소 루트 (설정의 외부 저장소 우선 옵션과 함께 사용)
    #[arg(long)]
    data_dir: Option<PathBuf>,

    /// 앱 내부 디렉토리 (설정 캐시, 로그)
    #[arg(long)]
    app_dir: Option<PathBuf>,

    /// 로그 레벨 (trace, debug, info, warn, error)
    #[arg(long, short = 'l', default_value = "info")]
    log_level: String,

    /// 오프라인 모드 (원격 동기화 없이 용량 정리만 실행)
    #[arg(long, short = 'o')]
    offline: bool,

    /// 템플릿 디렉토리 지정 (기본: `<root>/Templates`)
    #[arg(long)]
    templates: Option<PathBuf>,

    /// 이미지 디렉토리를 캡처 입력으로 재생
    #[arg(long)]
    replay: Option<PathBuf>,

    /// 재생 프레임 속도 (프레임/초)
    #[arg(long, default_value = "5")]
    replay_fps: f32,
}

/// 앱 내부 디렉토리 결정 (CLI 인자 또는 플랫폼별 기본 경로)
///
/// - macOS: `~/Library/Application Support/com.framewatch.monitor`
/// - Windows: `%APPDATA%\framewatch\monitor\data`
/// - Linux: `~/.local/share/monitor`
fn resolve_app_dir(app_dir: Option<&Path>) -> PathBuf {
    app_dir
        .map(Path::to_path_buf)
        .or_else(|| {
            ProjectDirs::from("com", "framewatch", "monitor").map(|p| p.data_dir().to_path_buf())
        })
        .unwrap_or_else(|| PathBuf::from("./framewatch"))
}

/// 콘솔 + 로그 파일 tracing 초기화
fn init_tracing(log_level: &str, log_file: RotatingLogFile) -> WorkerGuard {
    let log_filter = [
        "framewatch",
        "framewatch_core",
        "framewatch_vision",
        "framewatch_storage",
        "framewatch_network",
        "framewatch_sync",
    ]
    .iter()
    .map(|target| format!("{target}={log_level}"))
    .collect::<Vec<_>>()
    .join(",");

    let (file_writer, guard) = tracing_appender::non_blocking(log_file);
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&log_filter)))
        .with(fmt::layer())
        .with(fmt::layer().with_writer(file_writer).with_ansi(false))
        .init();
    guard
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let app_dir = resolve_app_dir(args.app_dir.as_deref());
    let logs_dir = app_dir.join(LOGS_DIR_NAME);
    let log_file = RotatingLogFile::open(&logs_dir)?;
    let _log_guard = init_tracing(&args.log_level, log_file.clone());

    info!("FrameWatch 시작: {}", app_dir.display());
    if args.offline {
        info!("오프라인 모드: 원격 동기화 비활성화");
    }

    // ── 설정 ──
    let config = Arc::new(ConfigManager::load(app_dir.join(LOCAL_CONFIG_FILE_NAME))?);
    let root = config.read(|c| c.storage_root(&app_dir, args.data_dir.as_deref()));
    let templates_dir = args
        .templates
        .clone()
        .unwrap_or_else(|| root.join(TEMPLATES_DIR_NAME));
    std::fs::create_dir_all(&templates_dir)?;

    // ── 어댑터 생성 (DI 와이어링) ──
    let storage = Arc::new(ArtifactStorage::new(root.clone(), Arc::clone(&config)).await?);

    let templates = Arc::new(TemplateStore::new());
    {
        let store = Arc::clone(&templates);
        let dir = templates_dir.clone();
        match tokio::task::spawn_blocking(move || store.reload_from_dir(&dir)).await? {
            Ok(version) => info!("로컬 템플릿 로드: v{version}"),
            Err(e) => warn!("로컬 템플릿 로드 실패, 빈 집합으로 시작: {e}"),
        }
    }

    let lifecycle = LifecycleManager::new();

    // ── 프레임 파이프라인 ──
    let (gate, queue) = CaptureGate::new(Arc::clone(&config));
    let gate = Arc::new(gate);
    let primitive: Arc<dyn CorrelationPrimitive> = Arc::new(ZnccCorrelator::default());
    let processor = FrameProcessor::new(
        Arc::clone(&config),
        Arc::clone(&templates),
        primitive,
        storage.clone(),
    );
    let worker = FrameWorker::new(processor, queue).spawn(lifecycle.subscribe());

    // ── 동기화 + 주기 작업 ──
    let sync = Arc::new(SyncManager::new(
        Arc::clone(&config),
        Arc::new(WebDavConnector::with_defaults()?),
        Arc::clone(&templates),
        Arc::clone(&storage),
        Arc::new(log_file.clone()),
        SyncPaths {
            templates_dir,
            logs_dir,
        },
    ));
    let mut scheduler = JobScheduler::new();
    sync.schedule(&mut scheduler, config.read(|c| c.sync), args.offline);
    let jobs = scheduler.spawn(lifecycle.subscribe());

    let replay = match args.replay.as_deref() {
        Some(dir) => {
            let source = ReplaySource::load(dir, args.replay_fps)?;
            info!(
                "재생 소스: {} ({}개, {:?} 간격)",
                dir.display(),
                source.len(),
                source.period()
            );
            Some(source.spawn(Arc::clone(&gate), lifecycle.subscribe()))
        }
        None => None,
    };

    info!("FrameWatch 실행 중 (Ctrl+C로 종료)");
    lifecycle.wait_for_signal().await;

    // ── 종료: 입력 차단 → 워커 유예 → 템플릿 해제 ──
    lifecycle.begin_shutdown(&gate);
    if let Some(replay) = replay {
        drain_within(replay, SHUTDOWN_GRACE, "프레임 재생").await;
    }
    drain_within(worker, SHUTDOWN_GRACE, "프레임 워커").await;
    for job in jobs {
        job.abort();
    }
    templates.release();

    let stats = gate.stats();
    info!(
        "FrameWatch 종료: 허용 {}개, 거부 {}개",
        stats.admitted,
        stats.dropped()
    );
    Ok(())
}
