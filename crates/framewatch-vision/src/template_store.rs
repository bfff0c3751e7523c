//! 템플릿 저장소 + 디렉토리 로더.
//!
//! 활성 집합은 `Arc<TemplateSet>` 하나로 통째로 교체된다. 검색은 시작 시점의 스냅샷을
//! 끝까지 사용하므로 교체 도중에도 옛 집합이나 새 집합 중 하나만 보게 된다.
//! 옛 집합은 마지막 스냅샷이 해제될 때 함께 해제된다.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use framewatch_core::error::CoreError;
use framewatch_core::models::template::{Template, TemplateSet, TEMPLATE_MAX_EDGE};
use parking_lot::RwLock;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::downscale::fit_within;

/// 템플릿으로 인식하는 확장자
const TEMPLATE_EXTENSIONS: [&str; 3] = ["png", "jpg", "jpeg"];

/// 템플릿 저장소 (단일 writer, 다수 reader)
pub struct TemplateStore {
    current: RwLock<Arc<TemplateSet>>,
    next_version: AtomicU64,
    version_tx: watch::Sender<u64>,
}

impl Default for TemplateStore {
    fn default() -> Self {
        Self::new()
    }
}

impl TemplateStore {
    /// 빈 저장소 생성
    pub fn new() -> Self {
        let (version_tx, _) = watch::channel(0);
        Self {
            current: RwLock::new(Arc::new(TemplateSet::empty())),
            next_version: AtomicU64::new(1),
            version_tx,
        }
    }

    /// 현재 집합 스냅샷 (검색 동안 유지)
    pub fn snapshot(&self) -> Arc<TemplateSet> {
        Arc::clone(&self.current.read())
    }

    /// 비어있는지 여부
    pub fn is_empty(&self) -> bool {
        self.current.read().is_empty()
    }

    /// 교체 알림 구독: 교체마다 새 버전이 발행된다
    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.version_tx.subscribe()
    }

    /// 집합 교체 후 새 버전 반환
    pub fn replace(&self, templates: Vec<Template>) -> u64 {
        let version = self.next_version.fetch_add(1, Ordering::Relaxed);
        let count = templates.len();
        let next = Arc::new(TemplateSet::new(templates, version));

        let previous = std::mem::replace(&mut *self.current.write(), next);
        // 잠금 해제 후 옛 집합 참조를 놓는다
        drop(previous);

        self.version_tx.send_replace(version);
        info!("템플릿 집합 교체: v{version}, {count}개");
        version
    }

    /// 디렉토리에서 다시 로드하여 교체.
    ///
    /// 디렉토리를 읽지 못하면 기존 집합을 유지하고 에러를 반환한다.
    pub fn reload_from_dir(&self, dir: &Path) -> Result<u64, CoreError> {
        let templates = load_templates(dir)?;
        Ok(self.replace(templates))
    }

    /// 모든 템플릿 해제 (종료 마지막 단계)
    pub fn release(&self) {
        *self.current.write() = Arc::new(TemplateSet::empty());
        debug!("템플릿 저장소 해제");
    }
}

/// 템플릿 파일 목록 (파일명 순)
pub fn template_files(dir: &Path) -> Result<Vec<PathBuf>, CoreError> {
    let entries = fs::read_dir(dir).map_err(|e| {
        CoreError::Internal(format!("템플릿 디렉토리 읽기 실패: {}: {e}", dir.display()))
    })?;

    let mut files: Vec<PathBuf> = entries
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|path| path.is_file() && is_template_file(path))
        .collect();
    files.sort();
    Ok(files)
}

/// 템플릿 확장자 여부 (대소문자 무시)
pub fn is_template_file(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| {
            TEMPLATE_EXTENSIONS
                .iter()
                .any(|known| ext.eq_ignore_ascii_case(known))
        })
        .unwrap_or(false)
}

/// 디렉토리의 템플릿을 그레이스케일로 로드.
///
/// 디코딩 실패 파일은 경고 후 건너뛴다. 최장 변이 400px를 넘으면 한 번 축소한다.
pub fn load_templates(dir: &Path) -> Result<Vec<Template>, CoreError> {
    let mut templates = Vec::new();

    for path in template_files(dir)? {
        let name = match path.file_stem().and_then(|s| s.to_str()) {
            Some(stem) => stem.to_string(),
            None => continue,
        };

        let gray = match image::open(&path) {
            Ok(img) => img.to_luma8(),
            Err(e) => {
                warn!("템플릿 디코딩 실패, 건너뜀: {}: {e}", path.display());
                continue;
            }
        };

        let raster = match fit_within(gray, TEMPLATE_MAX_EDGE) {
            Ok(raster) => raster,
            Err(e) => {
                warn!("템플릿 축소 실패, 건너뜀: {}: {e}", path.display());
                continue;
            }
        };

        debug!("템플릿 로드: {name} ({}x{})", raster.width(), raster.height());
        templates.push(Template::new(name, raster));
    }

    Ok(templates)
}
