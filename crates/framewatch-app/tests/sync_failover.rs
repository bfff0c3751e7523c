//! 엔드포인트 장애 조치 + 업로드 통합 시나리오

use async_trait::async_trait;
use chrono::Utc;
use framewatch_core::config::{MonitorConfig, WebDavServer, LOCAL_CONFIG_FILE_NAME};
use framewatch_core::config_manager::ConfigManager;
use framewatch_core::error::CoreError;
use framewatch_core::ports::capture_store::CaptureLabel;
use framewatch_core::ports::transport::{RemoteTransport, TransportFactory, UploadBody};
use framewatch_network::retry::RetryPolicy;
use framewatch_storage::artifact_storage::ArtifactStorage;
use framewatch_storage::log_file::RotatingLogFile;
use framewatch_sync::{ConfigRefresh, SyncManager, SyncPaths};
use framewatch_vision::template_store::TemplateStore;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tempfile::TempDir;

const REMOTE_DOC: &str = r#"{
  "webdavServers": [],
  "detectPerSecond": 4,
  "matchThreshold": 0.88,
  "matchCooldownMs": 15000,
  "screenshotDir": "Screenshots"
}"#;

fn endpoint(url: &str) -> WebDavServer {
    WebDavServer {
        url: url.to_string(),
        username: "monitor".to_string(),
        password: "secret".to_string(),
        monitor_dir: "monitor".to_string(),
        remote_upload_dir: "monitor/uploads".to_string(),
        template_dir: "monitor/Templates".to_string(),
    }
}

/// 응답 가능 여부를 URL별로 지정하는 원격 저장소
struct FakeRemote {
    server: WebDavServer,
    up: bool,
    files: Mutex<HashMap<String, Vec<u8>>>,
}

impl FakeRemote {
    fn new(url: &str, up: bool) -> Arc<Self> {
        let remote = Arc::new(Self {
            server: endpoint(url),
            up,
            files: Mutex::new(HashMap::new()),
        });
        remote
            .files
            .lock()
            .insert("monitor/monitor_config.json".to_string(), REMOTE_DOC.as_bytes().to_vec());
        remote
    }

    fn gate(&self) -> Result<(), CoreError> {
        if self.up {
            Ok(())
        } else {
            Err(CoreError::Timeout { timeout_ms: 10_000 })
        }
    }

    fn keys(&self) -> Vec<String> {
        self.files.lock().keys().cloned().collect()
    }
}

#[async_trait]
impl RemoteTransport for FakeRemote {
    fn endpoint(&self) -> &WebDavServer {
        &self.server
    }

    async fn probe(&self) -> Result<(), CoreError> {
        self.gate()
    }

    async fn upload(&self, dir: &str, name: &str, body: UploadBody, overwrite: bool) -> Result<bool, CoreError> {
        self.gate()?;
        let key = format!("{dir}/{name}");
        if !overwrite && self.files.lock().contains_key(&key) {
            return Ok(false);
        }
        let bytes = match body {
            UploadBody::Bytes(bytes) => bytes,
            UploadBody::File(path) => tokio::fs::read(path).await?,
        };
        self.files.lock().insert(key, bytes);
        Ok(true)
    }

    async fn download(&self, dir: &str, name: &str) -> Result<Vec<u8>, CoreError> {
        self.gate()?;
        self.files
            .lock()
            .get(&format!("{dir}/{name}"))
            .cloned()
            .ok_or_else(|| CoreError::NotFound {
                resource_type: "RemoteFile".to_string(),
                id: name.to_string(),
            })
    }

    async fn list(&self, dir: &str) -> Result<Vec<String>, CoreError> {
        self.gate()?;
        let prefix = format!("{dir}/");
        Ok(self
            .files
            .lock()
            .keys()
            .filter_map(|k| k.strip_prefix(&prefix))
            .filter(|rest| !rest.contains('/'))
            .map(str::to_string)
            .collect())
    }

    async fn delete(&self, dir: &str, name: &str) -> Result<bool, CoreError> {
        self.gate()?;
        Ok(self.files.lock().remove(&format!("{dir}/{name}")).is_some())
    }
}

struct FakeConnector(Vec<Arc<FakeRemote>>);

impl TransportFactory for FakeConnector {
    fn connect(&self, server: &WebDavServer) -> Result<Arc<dyn RemoteTransport>, CoreError> {
        self.0
            .iter()
            .find(|r| r.server.url == server.url)
            .map(|r| Arc::clone(r) as Arc<dyn RemoteTransport>)
            .ok_or_else(|| CoreError::Config(server.url.clone()))
    }
}

struct Setup {
    manager: SyncManager,
    config: Arc<ConfigManager>,
    storage: Arc<ArtifactStorage>,
    _dir: TempDir,
}

async fn setup(remotes: Vec<Arc<FakeRemote>>) -> Setup {
    let dir = TempDir::new().unwrap();
    let app = dir.path().join("app");
    let root = dir.path().join("root");
    std::fs::create_dir_all(&app).unwrap();

    let config = MonitorConfig {
        webdav_servers: remotes.iter().map(|r| r.server.clone()).collect(),
        ..MonitorConfig::default()
    };
    let config = Arc::new(ConfigManager::with_config(config, app.join(LOCAL_CONFIG_FILE_NAME)));
    let storage = Arc::new(ArtifactStorage::new(root.clone(), Arc::clone(&config)).await.unwrap());
    let logs = RotatingLogFile::open(app.join("Logs")).unwrap();

    let manager = SyncManager::new(
        Arc::clone(&config),
        Arc::new(FakeConnector(remotes)),
        Arc::new(TemplateStore::new()),
        Arc::clone(&storage),
        Arc::new(logs),
        SyncPaths {
            templates_dir: root.join("Templates"),
            logs_dir: app.join("Logs"),
        },
    )
    .with_retry_policy(RetryPolicy {
        delay: Duration::ZERO,
        ..RetryPolicy::default()
    });

    Setup {
        manager,
        config,
        storage,
        _dir: dir,
    }
}

#[tokio::test]
async fn private_endpoint_down_binds_public_and_persists_document() {
    let private = FakeRemote::new("http://192.168.0.20:5005/dav", false);
    let public = FakeRemote::new("https://files.example.org/dav", true);
    let s = setup(vec![private, public]).await;

    let outcome = s.manager.refresh_config().await;
    assert_eq!(
        outcome,
        ConfigRefresh::Bound {
            url: "https://files.example.org/dav".to_string(),
            changed: true,
        }
    );

    let live = s.config.get();
    assert_eq!(live.detect_per_second, 4.0);
    assert_eq!(live.match_cooldown_ms, 15_000);
    assert!((live.match_threshold - 0.88).abs() < f32::EPSILON);

    // 캐시 파일에 원문 저장, 다시 로드하면 같은 설정
    let persisted = std::fs::read_to_string(s.config.cache_path()).unwrap();
    assert_eq!(persisted, REMOTE_DOC);
    let reloaded = ConfigManager::load(s.config.cache_path().to_path_buf()).unwrap();
    assert!((reloaded.read(|c| c.match_threshold) - 0.88).abs() < f32::EPSILON);
}

#[tokio::test]
async fn uploads_go_to_bound_endpoint_only() {
    let private = FakeRemote::new("http://192.168.0.20:5005/dav", false);
    let public = FakeRemote::new("https://files.example.org/dav", true);
    let s = setup(vec![private.clone(), public.clone()]).await;
    s.manager.refresh_config().await;

    let saved = s
        .storage
        .save_png(&CaptureLabel::Matched("dialog".to_string()), Utc::now(), b"png")
        .await
        .unwrap();

    let later = SystemTime::now() + Duration::from_secs(60);
    let report = s.manager.upload_artifacts(later).await.unwrap();
    assert_eq!(report.uploaded, 1);
    assert!(!saved.exists());

    let name = saved.file_name().unwrap().to_str().unwrap().to_string();
    assert!(public.keys().iter().any(|k| k.ends_with(&name)));
    assert!(private.keys().iter().all(|k| !k.ends_with(&name)));
}

#[tokio::test]
async fn everything_down_keeps_running_on_local_state() {
    let a = FakeRemote::new("http://10.1.1.1/dav", false);
    let b = FakeRemote::new("https://files.example.org/dav", false);
    let s = setup(vec![a, b]).await;
    let before = s.config.get();

    assert_eq!(s.manager.refresh_config().await, ConfigRefresh::Unreachable);
    assert_eq!(s.config.get(), before);
    assert!(!s.config.cache_path().exists());

    let report = s.manager.upload_artifacts(SystemTime::now()).await.unwrap();
    assert_eq!(report.uploaded, 0);
}
