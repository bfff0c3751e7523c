//! 원격 객체 저장소 전송 포트.
//!
//! 구현: `framewatch-network` crate (reqwest 기반 WebDAV).
//! 재시도 횟수/지연, 대용량 무재시도 정책은 코어(Sync Manager)가 결정한다.

use async_trait::async_trait;
use std::path::PathBuf;
use std::sync::Arc;

use crate::config::WebDavServer;
use crate::error::CoreError;

/// 업로드 본문
#[derive(Debug, Clone)]
pub enum UploadBody {
    /// 메모리 바이트
    Bytes(Vec<u8>),
    /// 로컬 파일 (스트리밍 전송)
    File(PathBuf),
}

/// 엔드포인트에 바인딩된 원격 전송 클라이언트
#[async_trait]
pub trait RemoteTransport: Send + Sync {
    /// 바인딩된 엔드포인트
    fn endpoint(&self) -> &WebDavServer;

    /// 연결 확인 (서버 루트 응답 여부)
    async fn probe(&self) -> Result<(), CoreError>;

    /// 업로드.
    ///
    /// `overwrite`가 false이고 같은 이름이 이미 있으면 전송하지 않고 `Ok(false)`.
    async fn upload(
        &self,
        dir: &str,
        name: &str,
        body: UploadBody,
        overwrite: bool,
    ) -> Result<bool, CoreError>;

    /// 다운로드
    async fn download(&self, dir: &str, name: &str) -> Result<Vec<u8>, CoreError>;

    /// 디렉토리의 파일 이름 목록 (하위 디렉토리 제외)
    async fn list(&self, dir: &str) -> Result<Vec<String>, CoreError>;

    /// 삭제 (없으면 `Ok(false)`)
    async fn delete(&self, dir: &str, name: &str) -> Result<bool, CoreError>;
}

/// 엔드포인트 기술자로부터 전송 클라이언트 생성
pub trait TransportFactory: Send + Sync {
    /// 클라이언트 생성 (네트워크 접근 없음)
    fn connect(&self, server: &WebDavServer) -> Result<Arc<dyn RemoteTransport>, CoreError>;
}
