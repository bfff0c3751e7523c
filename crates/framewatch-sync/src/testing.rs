//! 테스트 공용 메모리 전송 + 픽스처

use async_trait::async_trait;
use framewatch_core::config::{MonitorConfig, WebDavServer, LOCAL_CONFIG_FILE_NAME};
use framewatch_core::config_manager::ConfigManager;
use framewatch_core::error::CoreError;
use framewatch_core::ports::log_rotation::LogRotator;
use framewatch_core::ports::transport::{RemoteTransport, TransportFactory, UploadBody};
use framewatch_network::retry::RetryPolicy;
use framewatch_storage::artifact_storage::ArtifactStorage;
use framewatch_vision::template_store::TemplateStore;
use image::{GrayImage, ImageFormat, Luma};
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashSet};
use std::io::Cursor;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

use crate::manager::{SyncManager, SyncPaths};

pub(crate) fn server(url: &str) -> WebDavServer {
    WebDavServer {
        url: url.to_string(),
        username: "monitor".to_string(),
        password: "secret".to_string(),
        monitor_dir: "monitor".to_string(),
        remote_upload_dir: "monitor/uploads".to_string(),
        template_dir: "monitor/Templates".to_string(),
    }
}

pub(crate) fn template_png(w: u32, h: u32) -> Vec<u8> {
    let img = GrayImage::from_fn(w, h, |x, y| Luma([((x * 7 + y * 13) % 251) as u8]));
    let mut buf = Vec::new();
    img.write_to(&mut Cursor::new(&mut buf), ImageFormat::Png)
        .unwrap();
    buf
}

fn key(dir: &str, name: &str) -> (String, String) {
    (dir.trim_matches('/').to_string(), name.to_string())
}

/// 메모리 원격 저장소
pub(crate) struct MemoryTransport {
    server: WebDavServer,
    reachable: AtomicBool,
    list_broken: AtomicBool,
    files: Mutex<BTreeMap<(String, String), Vec<u8>>>,
    broken_downloads: Mutex<HashSet<String>>,
    transient_upload_failures: AtomicU32,
    pub probes: AtomicUsize,
    pub lists: AtomicUsize,
    pub uploads: AtomicUsize,
}

impl MemoryTransport {
    pub fn new(server: WebDavServer) -> Arc<Self> {
        Arc::new(Self {
            server,
            reachable: AtomicBool::new(true),
            list_broken: AtomicBool::new(false),
            files: Mutex::new(BTreeMap::new()),
            broken_downloads: Mutex::new(HashSet::new()),
            transient_upload_failures: AtomicU32::new(0),
            probes: AtomicUsize::new(0),
            lists: AtomicUsize::new(0),
            uploads: AtomicUsize::new(0),
        })
    }

    pub fn set_reachable(&self, reachable: bool) {
        self.reachable.store(reachable, Ordering::SeqCst);
    }

    pub fn set_list_broken(&self, broken: bool) {
        self.list_broken.store(broken, Ordering::SeqCst);
    }

    pub fn put_file(&self, dir: &str, name: &str, bytes: &[u8]) {
        self.files.lock().insert(key(dir, name), bytes.to_vec());
    }

    pub fn file(&self, dir: &str, name: &str) -> Option<Vec<u8>> {
        self.files.lock().get(&key(dir, name)).cloned()
    }

    pub fn break_download(&self, name: &str) {
        self.broken_downloads.lock().insert(name.to_string());
    }

    pub fn fail_next_uploads(&self, count: u32) {
        self.transient_upload_failures.store(count, Ordering::SeqCst);
    }

    fn check_reachable(&self) -> Result<(), CoreError> {
        if self.reachable.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(CoreError::Network(format!("연결 거부: {}", self.server.url)))
        }
    }
}

#[async_trait]
impl RemoteTransport for MemoryTransport {
    fn endpoint(&self) -> &WebDavServer {
        &self.server
    }

    async fn probe(&self) -> Result<(), CoreError> {
        self.probes.fetch_add(1, Ordering::SeqCst);
        self.check_reachable()
    }

    async fn upload(
        &self,
        dir: &str,
        name: &str,
        body: UploadBody,
        overwrite: bool,
    ) -> Result<bool, CoreError> {
        self.check_reachable()?;
        self.uploads.fetch_add(1, Ordering::SeqCst);

        let pending = self.transient_upload_failures.load(Ordering::SeqCst);
        if pending > 0 {
            self.transient_upload_failures
                .store(pending - 1, Ordering::SeqCst);
            return Err(CoreError::Network("일시 장애".to_string()));
        }

        if !overwrite && self.files.lock().contains_key(&key(dir, name)) {
            return Ok(false);
        }
        let bytes = match body {
            UploadBody::Bytes(bytes) => bytes,
            UploadBody::File(path) => tokio::fs::read(path).await?,
        };
        self.files.lock().insert(key(dir, name), bytes);
        Ok(true)
    }

    async fn download(&self, dir: &str, name: &str) -> Result<Vec<u8>, CoreError> {
        self.check_reachable()?;
        if self.broken_downloads.lock().contains(name) {
            return Err(CoreError::Network(format!("다운로드 중단: {name}")));
        }
        self.file(dir, name).ok_or_else(|| CoreError::NotFound {
            resource_type: "RemoteFile".to_string(),
            id: format!("{dir}/{name}"),
        })
    }

    async fn list(&self, dir: &str) -> Result<Vec<String>, CoreError> {
        self.check_reachable()?;
        self.lists.fetch_add(1, Ordering::SeqCst);
        if self.list_broken.load(Ordering::SeqCst) {
            return Err(CoreError::Network("목록 실패".to_string()));
        }
        let dir = dir.trim_matches('/');
        Ok(self
            .files
            .lock()
            .keys()
            .filter(|(d, _)| d == dir)
            .map(|(_, n)| n.clone())
            .collect())
    }

    async fn delete(&self, dir: &str, name: &str) -> Result<bool, CoreError> {
        self.check_reachable()?;
        Ok(self.files.lock().remove(&key(dir, name)).is_some())
    }
}

/// URL로 메모리 전송을 찾아 주는 팩토리
pub(crate) struct MemoryFactory {
    transports: Vec<Arc<MemoryTransport>>,
    connects: AtomicUsize,
}

impl TransportFactory for MemoryFactory {
    fn connect(&self, server: &WebDavServer) -> Result<Arc<dyn RemoteTransport>, CoreError> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        self.transports
            .iter()
            .find(|t| t.server.url == server.url)
            .map(|t| Arc::clone(t) as Arc<dyn RemoteTransport>)
            .ok_or_else(|| CoreError::Config(format!("알 수 없는 엔드포인트: {}", server.url)))
    }
}

/// 회전만 기록하는 로그 회전기
#[derive(Default)]
pub(crate) struct RecordingRotator {
    pub active: Mutex<Option<PathBuf>>,
    pub rotations: AtomicUsize,
}

impl LogRotator for RecordingRotator {
    fn rotate(&self) -> Result<Option<PathBuf>, CoreError> {
        self.rotations.fetch_add(1, Ordering::SeqCst);
        Ok(None)
    }

    fn active_file(&self) -> Option<PathBuf> {
        self.active.lock().clone()
    }
}

pub(crate) struct Fixture {
    pub manager: SyncManager,
    pub config: Arc<ConfigManager>,
    pub templates: Arc<TemplateStore>,
    pub storage: Arc<ArtifactStorage>,
    pub rotator: Arc<RecordingRotator>,
    factory: Arc<MemoryFactory>,
    pub _dir: TempDir,
}

impl Fixture {
    pub fn factory_connects(&self) -> usize {
        self.factory.connects.load(Ordering::SeqCst)
    }

    pub fn logs_dir(&self) -> PathBuf {
        self.manager.paths.logs_dir.clone()
    }
}

/// 엔드포인트 순서 그대로 설정에 넣은 픽스처 (재시도 지연 없음)
pub(crate) async fn fixture(transports: Vec<Arc<MemoryTransport>>) -> Fixture {
    fixture_with_retry(
        transports,
        RetryPolicy {
            delay: Duration::ZERO,
            ..RetryPolicy::default()
        },
    )
    .await
}

pub(crate) async fn fixture_with_retry(
    transports: Vec<Arc<MemoryTransport>>,
    retry: RetryPolicy,
) -> Fixture {
    let dir = TempDir::new().unwrap();
    let root = dir.path().join("root");
    let app = dir.path().join("app");
    std::fs::create_dir_all(&app).unwrap();

    let config = MonitorConfig {
        webdav_servers: transports.iter().map(|t| t.server.clone()).collect(),
        ..MonitorConfig::default()
    };
    let config = Arc::new(ConfigManager::with_config(
        config,
        app.join(LOCAL_CONFIG_FILE_NAME),
    ));
    let storage = Arc::new(
        ArtifactStorage::new(root.clone(), Arc::clone(&config))
            .await
            .unwrap(),
    );
    let templates = Arc::new(TemplateStore::new());
    let rotator = Arc::new(RecordingRotator::default());
    let factory = Arc::new(MemoryFactory {
        transports,
        connects: AtomicUsize::new(0),
    });

    let paths = SyncPaths {
        templates_dir: root.join("Templates"),
        logs_dir: app.join("Logs"),
    };
    std::fs::create_dir_all(&paths.logs_dir).unwrap();

    let manager = SyncManager::new(
        Arc::clone(&config),
        factory.clone(),
        Arc::clone(&templates),
        Arc::clone(&storage),
        rotator.clone(),
        paths,
    )
    .with_retry_policy(retry)
    .with_video_settle_delay(Duration::ZERO);

    Fixture {
        manager,
        config,
        templates,
        storage,
        rotator,
        factory,
        _dir: dir,
    }
}
