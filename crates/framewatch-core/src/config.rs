//! 모니터 설정 구조체.
//!
//! 감지 주기, 매칭 임계값, 쿨다운, 저장 경로/용량, WebDAV 엔드포인트 등
//! 런타임 설정을 정의한다. 원격 설정 문서(`RemoteConfigDocument`)는
//! camelCase JSON이며, 인식 가능한 필드만 라이브 설정에 병합된다.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::warn;

/// 원격 설정 문서 파일 이름 (엔드포인트의 `monitorDir` 아래)
pub const REMOTE_CONFIG_FILE_NAME: &str = "monitor_config.json";

/// 로컬 캐시 파일 이름 (`<appInternal>/` 아래)
pub const LOCAL_CONFIG_FILE_NAME: &str = "monitor_config_default.json";

/// 템플릿 디렉토리 이름 (`<root>/` 아래)
pub const TEMPLATES_DIR_NAME: &str = "Templates";

/// 로그 디렉토리 이름 (`<appInternal>/` 아래)
pub const LOGS_DIR_NAME: &str = "Logs";

// ============================================================
// WebDAV 엔드포인트
// ============================================================

/// WebDAV 엔드포인트 기술자: URL, 자격증명, 용도별 원격 하위 경로
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WebDavServer {
    /// 서버 루트 URL (예: `http://192.168.1.10:5005/dav`)
    pub url: String,
    /// 사용자명
    #[serde(default)]
    pub username: String,
    /// 비밀번호
    #[serde(default)]
    pub password: String,
    /// 설정 문서 + 로그가 위치한 원격 디렉토리
    #[serde(default = "default_monitor_dir")]
    pub monitor_dir: String,
    /// 캡처 아티팩트 업로드 디렉토리
    #[serde(default = "default_remote_upload_dir")]
    pub remote_upload_dir: String,
    /// 템플릿 디렉토리
    #[serde(default = "default_template_dir")]
    pub template_dir: String,
}

impl WebDavServer {
    /// 원격 로그 디렉토리 (`<monitorDir>/Logs`)
    pub fn logs_dir(&self) -> String {
        join_remote(&self.monitor_dir, LOGS_DIR_NAME)
    }
}

// 비밀번호는 로그에 남기지 않는다
impl fmt::Debug for WebDavServer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WebDavServer")
            .field("url", &self.url)
            .field("username", &self.username)
            .field("password", &"***")
            .field("monitor_dir", &self.monitor_dir)
            .field("remote_upload_dir", &self.remote_upload_dir)
            .field("template_dir", &self.template_dir)
            .finish()
    }
}

fn default_monitor_dir() -> String {
    "monitor".to_string()
}

fn default_remote_upload_dir() -> String {
    "monitor/uploads".to_string()
}

fn default_template_dir() -> String {
    "monitor/Templates".to_string()
}

/// 원격 경로 결합 (`a/b`, 중복 슬래시 제거)
pub fn join_remote(base: &str, name: &str) -> String {
    let base = base.trim_matches('/');
    let name = name.trim_matches('/');
    if base.is_empty() {
        name.to_string()
    } else if name.is_empty() {
        base.to_string()
    } else {
        format!("{base}/{name}")
    }
}

// ============================================================
// 원격 설정 문서
// ============================================================

/// 원격 설정 문서 (JSON, camelCase)
///
/// 알 수 없는 필드는 무시되고, 누락된 필드는 라이브 설정을 바꾸지 않는다.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteConfigDocument {
    /// WebDAV 엔드포인트 목록
    #[serde(default)]
    pub webdav_servers: Vec<WebDavServer>,
    /// 초당 감지 횟수
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detect_per_second: Option<f32>,
    /// 매칭 쿨다운 (밀리초)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub match_cooldown_ms: Option<u64>,
    /// 매칭 임계값 θ ∈ (0,1)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub match_threshold: Option<f32>,
    /// 약한 매칭 오프셋
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub weak_match_offset: Option<f32>,
    /// 외부 저장소 우선 사용
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prefer_external_storage: Option<bool>,
    /// 스크린샷 디렉토리 이름
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub screenshot_dir: Option<String>,
    /// 동영상 디렉토리 이름
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub video_dir: Option<String>,
    /// 로컬 저장 용량 한도 (MB)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub storage_quota_mb: Option<u64>,
}

impl RemoteConfigDocument {
    /// JSON 문자열 파싱
    pub fn parse(raw: &str) -> Result<Self, crate::error::CoreError> {
        Ok(serde_json::from_str(raw)?)
    }
}

// ============================================================
// 동기화 주기
// ============================================================

/// Sync Manager 주기 작업 간격
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyncSchedule {
    /// 원격 설정 갱신 간격
    pub config_refresh: Duration,
    /// 아티팩트 업로드 간격
    pub artifact_upload: Duration,
    /// 로그 업로드 간격
    pub log_upload: Duration,
    /// 용량 정리 간격
    pub eviction: Duration,
}

impl Default for SyncSchedule {
    fn default() -> Self {
        Self {
            config_refresh: Duration::from_secs(300),
            artifact_upload: Duration::from_secs(60),
            log_upload: Duration::from_secs(1800),
            eviction: Duration::from_secs(600),
        }
    }
}

// ============================================================
// 모니터 설정
// ============================================================

/// 라이브 모니터 설정
///
/// 프로세스 진입점이 한 번 생성하여 `ConfigManager`로 각 컴포넌트에 주입한다.
#[derive(Debug, Clone, PartialEq)]
pub struct MonitorConfig {
    /// 초당 감지 횟수 (0 이하이면 게이트가 하한값 사용)
    pub detect_per_second: f32,
    /// 매칭 임계값 θ ∈ (0,1)
    pub match_threshold: f32,
    /// 약한 매칭 오프셋 (θ - offset 이상이면 약한 매칭)
    pub weak_match_offset: f32,
    /// 매칭 쿨다운 (밀리초)
    pub match_cooldown_ms: u64,
    /// 외부 저장소 우선 사용
    pub prefer_external_storage: bool,
    /// 스크린샷 디렉토리 이름 (`<root>/` 아래)
    pub screenshot_dir: String,
    /// 동영상 디렉토리 이름 (`<root>/` 아래)
    pub video_dir: String,
    /// 로컬 저장 용량 한도 (MB)
    pub storage_quota_mb: u64,
    /// WebDAV 엔드포인트 목록
    pub webdav_servers: Vec<WebDavServer>,
    /// 주기 작업 간격
    pub sync: SyncSchedule,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            detect_per_second: 2.0,
            match_threshold: 0.80,
            weak_match_offset: 0.05,
            match_cooldown_ms: 30_000,
            prefer_external_storage: false,
            screenshot_dir: "Screenshots".to_string(),
            video_dir: "Videos".to_string(),
            storage_quota_mb: 2048,
            webdav_servers: Vec::new(),
            sync: SyncSchedule::default(),
        }
    }
}

impl MonitorConfig {
    /// 문서로부터 설정 생성 (기본값 + 문서 필드 + 엔드포인트 목록)
    pub fn from_document(doc: &RemoteConfigDocument) -> Self {
        let mut config = Self::default();
        config.merge_remote(doc);
        config.webdav_servers = doc.webdav_servers.clone();
        config
    }

    /// 원격 문서의 인식 가능한 필드만 병합.
    ///
    /// 범위를 벗어난 값은 경고 후 무시한다. 엔드포인트 목록은 병합 대상이 아니다
    /// (문서가 로컬에 저장되므로 다음 시작 시 반영된다).
    ///
    /// # Returns
    /// 실제로 변경된 필드 이름 목록
    pub fn merge_remote(&mut self, doc: &RemoteConfigDocument) -> Vec<&'static str> {
        let mut changed = Vec::new();

        if let Some(rate) = doc.detect_per_second {
            if rate.is_finite() && rate != self.detect_per_second {
                self.detect_per_second = rate;
                changed.push("detectPerSecond");
            }
        }

        if let Some(threshold) = doc.match_threshold {
            if threshold > 0.0 && threshold < 1.0 {
                if threshold != self.match_threshold {
                    self.match_threshold = threshold;
                    changed.push("matchThreshold");
                }
            } else {
                warn!("원격 matchThreshold 범위 초과, 무시: {threshold}");
            }
        }

        if let Some(offset) = doc.weak_match_offset {
            if offset >= 0.0 && offset < self.match_threshold {
                if offset != self.weak_match_offset {
                    self.weak_match_offset = offset;
                    changed.push("weakMatchOffset");
                }
            } else {
                warn!("원격 weakMatchOffset 범위 초과, 무시: {offset}");
            }
        }

        if let Some(cooldown) = doc.match_cooldown_ms {
            if cooldown != self.match_cooldown_ms {
                self.match_cooldown_ms = cooldown;
                changed.push("matchCooldownMs");
            }
        }

        if let Some(prefer) = doc.prefer_external_storage {
            if prefer != self.prefer_external_storage {
                self.prefer_external_storage = prefer;
                changed.push("preferExternalStorage");
            }
        }

        if let Some(dir) = doc.screenshot_dir.as_deref() {
            if !dir.is_empty() && dir != self.screenshot_dir {
                self.screenshot_dir = dir.to_string();
                changed.push("screenshotDir");
            }
        }

        if let Some(dir) = doc.video_dir.as_deref() {
            if !dir.is_empty() && dir != self.video_dir {
                self.video_dir = dir.to_string();
                changed.push("videoDir");
            }
        }

        if let Some(quota) = doc.storage_quota_mb {
            if quota > 0 && quota != self.storage_quota_mb {
                self.storage_quota_mb = quota;
                changed.push("storageQuotaMb");
            }
        }

        changed
    }

    /// 약한 매칭 하한 점수 (θ - offset)
    pub fn weak_threshold(&self) -> f32 {
        self.match_threshold - self.weak_match_offset
    }

    /// 매칭 쿨다운
    pub fn match_cooldown(&self) -> Duration {
        Duration::from_millis(self.match_cooldown_ms)
    }

    /// 저장 용량 한도 (bytes)
    pub fn storage_quota_bytes(&self) -> u64 {
        self.storage_quota_mb.saturating_mul(1024 * 1024)
    }

    /// 아티팩트 저장 루트 결정
    ///
    /// 외부 저장소 우선 + 외부 경로가 있으면 외부, 아니면 앱 내부 경로.
    pub fn storage_root(&self, internal: &Path, external: Option<&Path>) -> PathBuf {
        match external {
            Some(ext) if self.prefer_external_storage => ext.to_path_buf(),
            _ => internal.to_path_buf(),
        }
    }
}
