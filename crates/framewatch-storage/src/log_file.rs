//! 교체 가능한 로그 파일.
//!
//! `tracing-appender::non_blocking`의 writer로 쓰이며, 복제본끼리 활성 파일을 공유한다.
//! 로그 업로드 전에 `rotate()`로 활성 파일을 닫아 업로드 대상으로 만든다.
//! 파일명: `rustdesk_<YYYYMMDD_HHMMSS>.log`

use chrono::Local;
use framewatch_core::error::CoreError;
use framewatch_core::ports::log_rotation::LogRotator;
use parking_lot::Mutex;
use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// 로그 파일 접두사
pub const LOG_FILE_PREFIX: &str = "rustdesk_";

/// 로그 파일 확장자
pub const LOG_FILE_EXTENSION: &str = "log";

struct ActiveLog {
    file: Option<File>,
    path: Option<PathBuf>,
}

/// 교체 가능한 로그 파일 writer
#[derive(Clone)]
pub struct RotatingLogFile {
    dir: PathBuf,
    active: Arc<Mutex<ActiveLog>>,
}

impl RotatingLogFile {
    /// 디렉토리를 만들고 새 활성 파일을 연다
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self, CoreError> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        let (file, path) = open_next(&dir)?;
        Ok(Self {
            dir,
            active: Arc::new(Mutex::new(ActiveLog {
                file: Some(file),
                path: Some(path),
            })),
        })
    }

    /// 로그 디렉토리
    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

/// 같은 초에 교체되면 `_N` 접미사로 구분
fn open_next(dir: &Path) -> io::Result<(File, PathBuf)> {
    let stamp = Local::now().format("%Y%m%d_%H%M%S").to_string();
    let mut suffix = 0u32;
    loop {
        let name = if suffix == 0 {
            format!("{LOG_FILE_PREFIX}{stamp}.{LOG_FILE_EXTENSION}")
        } else {
            format!("{LOG_FILE_PREFIX}{stamp}_{suffix}.{LOG_FILE_EXTENSION}")
        };
        let path = dir.join(name);
        match OpenOptions::new().write(true).create_new(true).open(&path) {
            Ok(file) => return Ok((file, path)),
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => suffix += 1,
            Err(e) => return Err(e),
        }
    }
}

impl Write for RotatingLogFile {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self.active.lock().file.as_mut() {
            Some(file) => file.write(buf),
            // 교체 중 새 파일 열기에 실패했으면 버림
            None => Ok(buf.len()),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self.active.lock().file.as_mut() {
            Some(file) => file.flush(),
            None => Ok(()),
        }
    }
}

impl LogRotator for RotatingLogFile {
    fn rotate(&self) -> Result<Option<PathBuf>, CoreError> {
        let mut active = self.active.lock();
        if let Some(mut file) = active.file.take() {
            file.flush()?;
        }
        let closed = active.path.take();

        let (file, path) = open_next(&self.dir)?;
        active.file = Some(file);
        active.path = Some(path);
        Ok(closed)
    }

    fn active_file(&self) -> Option<PathBuf> {
        self.active.lock().path.clone()
    }
}
