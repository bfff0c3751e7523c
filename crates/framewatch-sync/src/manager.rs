//! Sync Manager.
//!
//! 원격 설정 갱신(사설망 엔드포인트 우선 장애 조치), 템플릿 갱신, 용량 정리를
//! 담당한다. 업로드는 `upload` 모듈. 모든 작업은 실패해도 로그만 남기고
//! 마지막으로 유효했던 로컬 설정/템플릿을 유지한다.

use framewatch_core::config::{SyncSchedule, WebDavServer, REMOTE_CONFIG_FILE_NAME};
use framewatch_core::config_manager::{ApplyOutcome, ConfigManager};
use framewatch_core::error::CoreError;
use framewatch_core::ports::log_rotation::LogRotator;
use framewatch_core::ports::transport::{RemoteTransport, TransportFactory};
use framewatch_network::endpoint::order_endpoints;
use framewatch_network::retry::RetryPolicy;
use framewatch_storage::artifact_storage::{ArtifactStorage, EvictionReport, EVICTION_MIN_AGE};
use framewatch_vision::template_store::{is_template_file, template_files, TemplateStore};
use parking_lot::Mutex;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tokio::fs;
use tracing::{debug, info, warn};

use crate::scheduler::{JobScheduler, RunGuard};
use crate::upload::VIDEO_SETTLE_DELAY;

/// 로컬 동기화 경로
#[derive(Debug, Clone)]
pub struct SyncPaths {
    /// 템플릿 디렉토리 (`<root>/Templates`)
    pub templates_dir: PathBuf,
    /// 로그 디렉토리 (`<appInternal>/Logs`)
    pub logs_dir: PathBuf,
}

/// 설정 갱신 결과
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigRefresh {
    /// 엔드포인트 미설정
    NoEndpoints,
    /// 바인딩 유지, 문서 변경 없음
    Reused { url: String },
    /// 엔드포인트 (재)바인딩 또는 문서 적용
    Bound { url: String, changed: bool },
    /// 모든 엔드포인트 실패 (로컬 설정 유지)
    Unreachable,
}

/// 템플릿 갱신 결과
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TemplateRefreshReport {
    /// 원격 템플릿 파일 수
    pub listed: usize,
    /// 내려받아 반영한 파일 수
    pub downloaded: usize,
    /// 다운로드 실패로 건너뛴 파일 수
    pub failed: usize,
    /// 원격에 없어 삭제한 로컬 파일 수
    pub removed: usize,
    /// 교체 후 템플릿 집합 버전
    pub version: u64,
}

/// 원격 동기화 관리자
pub struct SyncManager {
    pub(crate) config: Arc<ConfigManager>,
    connector: Arc<dyn TransportFactory>,
    templates: Arc<TemplateStore>,
    pub(crate) storage: Arc<ArtifactStorage>,
    pub(crate) log_rotator: Arc<dyn LogRotator>,
    pub(crate) paths: SyncPaths,
    pub(crate) retry: RetryPolicy,
    pub(crate) video_settle: Duration,
    bound: Mutex<Option<Arc<dyn RemoteTransport>>>,
    template_guard: RunGuard,
    pub(crate) upload_guard: RunGuard,
    pub(crate) log_guard: RunGuard,
}

impl SyncManager {
    /// 새 관리자 (바인딩된 엔드포인트 없음)
    pub fn new(
        config: Arc<ConfigManager>,
        connector: Arc<dyn TransportFactory>,
        templates: Arc<TemplateStore>,
        storage: Arc<ArtifactStorage>,
        log_rotator: Arc<dyn LogRotator>,
        paths: SyncPaths,
    ) -> Self {
        Self {
            config,
            connector,
            templates,
            storage,
            log_rotator,
            paths,
            retry: RetryPolicy::default(),
            video_settle: VIDEO_SETTLE_DELAY,
            bound: Mutex::new(None),
            template_guard: RunGuard::new("template_refresh"),
            upload_guard: RunGuard::new("artifact_upload"),
            log_guard: RunGuard::new("log_upload"),
        }
    }

    /// 재시도 정책 지정
    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// 동영상 크기 재확인 대기 시간 지정
    pub fn with_video_settle_delay(mut self, delay: Duration) -> Self {
        self.video_settle = delay;
        self
    }

    /// 현재 바인딩된 엔드포인트
    pub fn bound_endpoint(&self) -> Option<WebDavServer> {
        self.bound.lock().as_ref().map(|t| t.endpoint().clone())
    }

    pub(crate) fn transport(&self) -> Option<Arc<dyn RemoteTransport>> {
        self.bound.lock().clone()
    }

    /// 원격 설정 갱신.
    ///
    /// 바인딩된 엔드포인트가 응답하고 문서가 같으면 그대로 쓴다. 아니면 사설망
    /// 주소를 먼저 시도하여 처음 성공한 엔드포인트에 바인딩한다. 문서가 바뀌었거나
    /// 바인딩이 바뀌면 템플릿도 갱신한다.
    pub async fn refresh_config(&self) -> ConfigRefresh {
        if let Some(transport) = self.transport() {
            let url = transport.endpoint().url.clone();
            match self.fetch_document(transport.as_ref()).await {
                Ok(raw) if self.config.is_current_document(&raw) => {
                    debug!("원격 설정 변경 없음: {url}");
                    return ConfigRefresh::Reused { url };
                }
                Ok(raw) => match self.config.apply_remote(&raw) {
                    Ok(outcome) => {
                        self.refresh_templates_logged().await;
                        return ConfigRefresh::Bound {
                            url,
                            changed: matches!(outcome, ApplyOutcome::Applied { .. }),
                        };
                    }
                    Err(e) => warn!("원격 설정 적용 실패: {url}: {e}"),
                },
                Err(e) => warn!("바인딩된 엔드포인트 응답 없음: {url}: {e}"),
            }
            *self.bound.lock() = None;
        }

        let servers = order_endpoints(&self.config.read(|c| c.webdav_servers.clone()));
        if servers.is_empty() {
            debug!("WebDAV 엔드포인트 미설정, 설정 갱신 생략");
            return ConfigRefresh::NoEndpoints;
        }

        for server in &servers {
            let transport = match self.connector.connect(server) {
                Ok(transport) => transport,
                Err(e) => {
                    warn!("엔드포인트 클라이언트 생성 실패: {}: {e}", server.url);
                    continue;
                }
            };

            let raw = match self.fetch_document(transport.as_ref()).await {
                Ok(raw) => raw,
                Err(e) => {
                    warn!("엔드포인트 연결 실패, 다음 후보 시도: {}: {e}", server.url);
                    continue;
                }
            };

            let changed = match self.config.apply_remote(&raw) {
                Ok(outcome) => matches!(outcome, ApplyOutcome::Applied { .. }),
                Err(e) => {
                    warn!("원격 설정 적용 실패, 다음 후보 시도: {}: {e}", server.url);
                    continue;
                }
            };

            info!("엔드포인트 바인딩: {}", server.url);
            *self.bound.lock() = Some(transport);
            self.refresh_templates_logged().await;
            return ConfigRefresh::Bound {
                url: server.url.clone(),
                changed,
            };
        }

        warn!(
            "모든 엔드포인트 연결 실패 ({}개), 로컬 설정 유지",
            servers.len()
        );
        ConfigRefresh::Unreachable
    }

    /// 연결 확인 후 설정 문서 다운로드
    async fn fetch_document(&self, transport: &dyn RemoteTransport) -> Result<String, CoreError> {
        transport.probe().await?;
        let monitor_dir = transport.endpoint().monitor_dir.clone();
        let bytes = self
            .retry
            .run(self.retry.max_attempts, "설정 다운로드", || {
                transport.download(&monitor_dir, REMOTE_CONFIG_FILE_NAME)
            })
            .await?;

        String::from_utf8(bytes).map_err(|e| CoreError::Validation {
            field: REMOTE_CONFIG_FILE_NAME.to_string(),
            message: format!("UTF-8 아님: {e}"),
        })
    }

    /// 템플릿 갱신.
    ///
    /// 원격 목록의 템플릿을 `.part`로 받은 뒤 이름을 바꾸고, 원격에 없는 로컬
    /// 템플릿을 지운 다음 저장소를 교체한다. 개별 다운로드 실패는 건너뛴다.
    /// 이미 실행 중이면 `Ok(None)`.
    pub async fn refresh_templates(&self) -> Result<Option<TemplateRefreshReport>, CoreError> {
        let Some(_token) = self.template_guard.try_acquire() else {
            debug!("템플릿 갱신 실행 중, 건너뜀");
            return Ok(None);
        };
        let transport = self.transport().ok_or_else(|| CoreError::NotFound {
            resource_type: "Endpoint".to_string(),
            id: "bound".to_string(),
        })?;

        let remote_dir = transport.endpoint().template_dir.clone();
        let names: Vec<String> = self
            .retry
            .run(self.retry.max_attempts, "템플릿 목록", || transport.list(&remote_dir))
            .await?
            .into_iter()
            .filter(|name| is_plain_file_name(name) && is_template_file(Path::new(name)))
            .collect();

        let dir = self.paths.templates_dir.clone();
        fs::create_dir_all(&dir).await?;

        let mut report = TemplateRefreshReport {
            listed: names.len(),
            ..TemplateRefreshReport::default()
        };

        for name in &names {
            let downloaded = self
                .retry
                .run(self.retry.max_attempts, "템플릿 다운로드", || {
                    transport.download(&remote_dir, name)
                })
                .await;

            match downloaded {
                Ok(bytes) => match stage_file(&dir, name, &bytes).await {
                    Ok(()) => report.downloaded += 1,
                    Err(e) => {
                        warn!("템플릿 저장 실패, 건너뜀: {name}: {e}");
                        report.failed += 1;
                    }
                },
                Err(e) => {
                    warn!("템플릿 다운로드 실패, 건너뜀: {name}: {e}");
                    report.failed += 1;
                }
            }
        }

        let keep: HashSet<String> = names.into_iter().collect();
        let store = Arc::clone(&self.templates);
        let (removed, version) = tokio::task::spawn_blocking(move || {
            let removed = remove_absent(&dir, &keep)?;
            let version = store.reload_from_dir(&dir)?;
            Ok::<_, CoreError>((removed, version))
        })
        .await
        .map_err(|e| CoreError::Internal(format!("템플릿 교체 작업 실패: {e}")))??;

        report.removed = removed;
        report.version = version;
        Ok(Some(report))
    }

    async fn refresh_templates_logged(&self) {
        match self.refresh_templates().await {
            Ok(Some(report)) => info!(
                "템플릿 갱신: 원격 {}개, 다운로드 {}개, 실패 {}개, 삭제 {}개 (v{})",
                report.listed, report.downloaded, report.failed, report.removed, report.version
            ),
            Ok(None) => {}
            Err(e) => warn!("템플릿 갱신 실패, 기존 집합 유지: {e}"),
        }
    }

    /// 용량 정리 (최소 보존 기간 적용)
    pub async fn evict(&self, now: SystemTime) -> Result<EvictionReport, CoreError> {
        self.storage.enforce_quota(now, EVICTION_MIN_AGE).await
    }

    /// 주기 작업 등록.
    ///
    /// 오프라인이면 네트워크 작업은 빼고 용량 정리만 등록한다.
    pub fn schedule(self: &Arc<Self>, scheduler: &mut JobScheduler, schedule: SyncSchedule, offline: bool) {
        if !offline {
            let manager = Arc::clone(self);
            scheduler.add("config_refresh", schedule.config_refresh, move || {
                let manager = Arc::clone(&manager);
                async move {
                    manager.refresh_config().await;
                }
            });

            let manager = Arc::clone(self);
            scheduler.add("artifact_upload", schedule.artifact_upload, move || {
                let manager = Arc::clone(&manager);
                async move {
                    manager.upload_artifacts(SystemTime::now()).await;
                }
            });

            let manager = Arc::clone(self);
            scheduler.add("log_upload", schedule.log_upload, move || {
                let manager = Arc::clone(&manager);
                async move {
                    manager.upload_logs(SystemTime::now()).await;
                }
            });
        }

        let manager = Arc::clone(self);
        scheduler.add("eviction", schedule.eviction, move || {
            let manager = Arc::clone(&manager);
            async move {
                if let Err(e) = manager.evict(SystemTime::now()).await {
                    warn!("용량 정리 실패: {e}");
                }
            }
        });
    }
}

/// 경로 구분자 없는 일반 파일 이름
fn is_plain_file_name(name: &str) -> bool {
    !name.is_empty() && !name.starts_with('.') && !name.contains(['/', '\\'])
}

/// `.part`에 쓴 뒤 이름 변경
async fn stage_file(dir: &Path, name: &str, bytes: &[u8]) -> Result<(), CoreError> {
    let target = dir.join(name);
    let part = dir.join(format!("{name}.part"));

    fs::write(&part, bytes).await?;
    if let Err(e) = fs::rename(&part, &target).await {
        let _ = fs::remove_file(&part).await;
        return Err(e.into());
    }
    Ok(())
}

/// `keep`에 없는 로컬 템플릿 삭제
fn remove_absent(dir: &Path, keep: &HashSet<String>) -> Result<usize, CoreError> {
    let mut removed = 0;
    for path in template_files(dir)? {
        let known = path
            .file_name()
            .and_then(|n| n.to_str())
            .is_some_and(|n| keep.contains(n));
        if known {
            continue;
        }
        match std::fs::remove_file(&path) {
            Ok(()) => {
                debug!("원격에 없는 템플릿 삭제: {}", path.display());
                removed += 1;
            }
            Err(e) => warn!("템플릿 삭제 실패: {}: {e}", path.display()),
        }
    }
    Ok(removed)
}
