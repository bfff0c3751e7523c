//! 설정 캐시 관리.
//!
//! 시작 시 로컬 캐시(`monitor_config_default.json`) 또는 번들 기본 문서에서
//! 한 번 로드하고, 원격 문서를 성공적으로 받을 때마다 병합 + 캐시에 저장한다.

use crate::config::{MonitorConfig, RemoteConfigDocument};
use crate::error::CoreError;
use parking_lot::RwLock;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// 번들 기본 설정 문서
const BUNDLED_DEFAULT: &str = include_str!("default_config.json");

/// 원격 문서 적용 결과
#[derive(Debug, Clone, PartialEq)]
pub enum ApplyOutcome {
    /// 마지막으로 적용한 문서와 동일
    Unchanged,
    /// 새 문서 적용 (변경된 필드 목록)
    Applied { changed_fields: Vec<&'static str> },
}

/// 설정 관리자
///
/// 라이브 설정과 마지막으로 적용한 원격 문서 원문을 보관한다.
#[derive(Debug)]
pub struct ConfigManager {
    /// 현재 설정 (스레드 안전)
    config: RwLock<MonitorConfig>,
    /// 마지막으로 적용/로드한 문서 원문 (변경 감지용)
    last_document: RwLock<Option<String>>,
    /// 로컬 캐시 파일 경로
    cache_path: PathBuf,
}

impl ConfigManager {
    /// 캐시 파일에서 로드, 없거나 손상되었으면 번들 기본값 사용 후 캐시 생성
    pub fn load(cache_path: PathBuf) -> Result<Self, CoreError> {
        if let Some(parent) = cache_path.parent() {
            if !parent.exists() {
                fs::create_dir_all(parent).map_err(|e| {
                    CoreError::Config(format!(
                        "설정 디렉토리 생성 실패: {}: {}",
                        parent.display(),
                        e
                    ))
                })?;
                info!("설정 디렉토리 생성: {}", parent.display());
            }
        }

        let cached = match fs::read_to_string(&cache_path) {
            Ok(raw) => match RemoteConfigDocument::parse(&raw) {
                Ok(doc) => Some((raw, doc)),
                Err(e) => {
                    warn!("설정 캐시 파싱 실패, 기본값 사용: {}: {e}", cache_path.display());
                    None
                }
            },
            Err(_) => None,
        };

        let (raw, doc) = match cached {
            Some(pair) => {
                debug!("설정 캐시 로드 완료: {}", cache_path.display());
                pair
            }
            None => {
                let doc = RemoteConfigDocument::parse(BUNDLED_DEFAULT)?;
                Self::write_cache(&cache_path, BUNDLED_DEFAULT)?;
                info!("기본 설정 캐시 생성: {}", cache_path.display());
                (BUNDLED_DEFAULT.to_string(), doc)
            }
        };

        Ok(Self {
            config: RwLock::new(MonitorConfig::from_document(&doc)),
            last_document: RwLock::new(Some(raw)),
            cache_path,
        })
    }

    /// 지정된 설정으로 생성 (캐시 파일은 원격 문서 적용 시에만 기록)
    pub fn with_config(config: MonitorConfig, cache_path: PathBuf) -> Self {
        Self {
            config: RwLock::new(config),
            last_document: RwLock::new(None),
            cache_path,
        }
    }

    /// 현재 설정 반환 (복제본)
    pub fn get(&self) -> MonitorConfig {
        self.config.read().clone()
    }

    /// 설정 일부 읽기 (복제 없이)
    pub fn read<R>(&self, f: impl FnOnce(&MonitorConfig) -> R) -> R {
        f(&self.config.read())
    }

    /// 잠금 경합 시 대기하지 않고 읽기 (쓰기 중이면 `None`)
    pub fn try_read<R>(&self, f: impl FnOnce(&MonitorConfig) -> R) -> Option<R> {
        self.config.try_read().map(|guard| f(&guard))
    }

    /// 원문이 마지막 적용 문서와 같은지 확인
    pub fn is_current_document(&self, raw: &str) -> bool {
        self.last_document.read().as_deref() == Some(raw)
    }

    /// 원격 문서 적용.
    ///
    /// 원문이 마지막 문서와 같으면 아무것도 하지 않는다. 다르면 인식 가능한
    /// 필드를 병합하고 캐시 파일에 원문을 저장한다. 파싱에 실패하면 라이브 설정과
    /// 캐시 모두 그대로 둔다.
    pub fn apply_remote(&self, raw: &str) -> Result<ApplyOutcome, CoreError> {
        if self.is_current_document(raw) {
            return Ok(ApplyOutcome::Unchanged);
        }

        let doc = RemoteConfigDocument::parse(raw)?;
        let changed_fields = {
            let mut config = self.config.write();
            config.merge_remote(&doc)
        };

        Self::write_cache(&self.cache_path, raw)?;
        *self.last_document.write() = Some(raw.to_string());

        info!("원격 설정 적용: 변경 필드 {:?}", changed_fields);
        Ok(ApplyOutcome::Applied { changed_fields })
    }

    /// 설정 캐시 파일 경로
    pub fn cache_path(&self) -> &Path {
        &self.cache_path
    }

    /// 캐시 파일 기록 (임시 파일 → rename)
    fn write_cache(path: &Path, raw: &str) -> Result<(), CoreError> {
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, raw).map_err(|e| {
            CoreError::Config(format!("설정 캐시 저장 실패: {}: {}", tmp.display(), e))
        })?;
        fs::rename(&tmp, path).map_err(|e| {
            CoreError::Config(format!("설정 캐시 교체 실패: {}: {}", path.display(), e))
        })?;
        Ok(())
    }
}
