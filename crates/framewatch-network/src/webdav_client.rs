//! WebDAV 원격 전송 클라이언트.
//!
//! `RemoteTransport` 포트 구현. Basic 인증, 연결/읽기 타임아웃, 상태 코드별 에러 매핑.
//! - 목록: `PROPFIND Depth: 1` (하위 컬렉션 제외)
//! - 연결 확인: `PROPFIND Depth: 0` (서버 루트)
//! - 업로드: `PUT` (덮어쓰기 금지 시 `HEAD`로 선확인, 409면 `MKCOL` 후 1회 재시도)

use async_trait::async_trait;
use framewatch_core::config::WebDavServer;
use framewatch_core::error::CoreError;
use framewatch_core::ports::transport::{RemoteTransport, TransportFactory, UploadBody};
use reqwest::{Method, StatusCode};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};
use url::Url;

/// 기본 연결 타임아웃
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// 기본 읽기 타임아웃
pub const DEFAULT_READ_TIMEOUT: Duration = Duration::from_secs(60);

const PROPFIND_BODY: &str = r#"<?xml version="1.0" encoding="utf-8"?>
<D:propfind xmlns:D="DAV:"><D:prop><D:resourcetype/></D:prop></D:propfind>"#;

/// 엔드포인트 하나에 바인딩된 WebDAV 클라이언트
pub struct WebDavClient {
    client: reqwest::Client,
    server: WebDavServer,
    base: Url,
    read_timeout: Duration,
}

impl WebDavClient {
    /// 새 클라이언트 생성 (네트워크 접근 없음)
    pub fn new(server: WebDavServer, connect_timeout: Duration, read_timeout: Duration) -> Result<Self, CoreError> {
        let client = build_http_client(connect_timeout, read_timeout)?;
        Self::with_client(client, server, read_timeout)
    }

    fn with_client(
        client: reqwest::Client,
        server: WebDavServer,
        read_timeout: Duration,
    ) -> Result<Self, CoreError> {
        let base = Url::parse(server.url.trim_end_matches('/'))
            .map_err(|e| CoreError::Config(format!("잘못된 엔드포인트 URL: {}: {e}", server.url)))?;
        if base.cannot_be_a_base() {
            return Err(CoreError::Config(format!(
                "잘못된 엔드포인트 URL: {}",
                server.url
            )));
        }

        Ok(Self {
            client,
            server,
            base,
            read_timeout,
        })
    }

    /// `<base>/<dir>/<name>` 또는 컬렉션이면 `<base>/<dir>/`
    fn resource_url(&self, dir: &str, name: Option<&str>) -> Result<Url, CoreError> {
        let mut url = self.base.clone();
        {
            let mut segments = url
                .path_segments_mut()
                .map_err(|_| CoreError::Config(format!("잘못된 엔드포인트 URL: {}", self.server.url)))?;
            segments.pop_if_empty();
            segments.extend(dir.split('/').filter(|s| !s.is_empty()));
            match name {
                Some(name) => segments.push(name),
                None => segments.push(""),
            };
        }
        Ok(url)
    }

    fn request(&self, method: Method, url: Url) -> reqwest::RequestBuilder {
        self.client
            .request(method, url)
            .basic_auth(&self.server.username, Some(&self.server.password))
    }

    async fn send(&self, request: reqwest::RequestBuilder, what: &str) -> Result<reqwest::Response, CoreError> {
        request.send().await.map_err(|e| self.map_transport_error(e, what))
    }

    fn map_transport_error(&self, e: reqwest::Error, what: &str) -> CoreError {
        if e.is_timeout() {
            CoreError::Timeout {
                timeout_ms: self.read_timeout.as_millis() as u64,
            }
        } else {
            CoreError::Network(format!("{what} 요청 실패: {e}"))
        }
    }

    async fn propfind(&self, url: Url, depth: &str) -> Result<reqwest::Response, CoreError> {
        let request = self
            .request(dav_method("PROPFIND")?, url)
            .header("Depth", depth)
            .header("Content-Type", "application/xml; charset=utf-8")
            .body(PROPFIND_BODY);
        let resp = self.send(request, "PROPFIND").await?;
        check_response(resp, "PROPFIND").await
    }

    async fn exists(&self, url: &Url) -> Result<bool, CoreError> {
        let resp = self.send(self.request(Method::HEAD, url.clone()), "HEAD").await?;
        match resp.status() {
            s if s.is_success() => Ok(true),
            StatusCode::NOT_FOUND => Ok(false),
            _ => check_response(resp, "HEAD").await.map(|_| true),
        }
    }

    async fn put(&self, url: &Url, body: &UploadBody) -> Result<reqwest::Response, CoreError> {
        let payload = match body {
            UploadBody::Bytes(bytes) => reqwest::Body::from(bytes.clone()),
            UploadBody::File(path) => {
                let file = tokio::fs::File::open(path).await?;
                reqwest::Body::from(file)
            }
        };
        self.send(self.request(Method::PUT, url.clone()).body(payload), "PUT")
            .await
    }

    /// `dir`의 각 상위 컬렉션을 순서대로 생성 (이미 있으면 무시)
    async fn ensure_collections(&self, dir: &str) -> Result<(), CoreError> {
        let mut prefix = String::new();
        for segment in dir.split('/').filter(|s| !s.is_empty()) {
            if !prefix.is_empty() {
                prefix.push('/');
            }
            prefix.push_str(segment);

            let url = self.resource_url(&prefix, None)?;
            let resp = self
                .send(self.request(dav_method("MKCOL")?, url), "MKCOL")
                .await?;
            match resp.status() {
                s if s.is_success() => debug!("원격 디렉토리 생성: {prefix}"),
                StatusCode::METHOD_NOT_ALLOWED => {}
                _ => {
                    check_response(resp, "MKCOL").await?;
                }
            }
        }
        Ok(())
    }
}

#[async_trait]
impl RemoteTransport for WebDavClient {
    fn endpoint(&self) -> &WebDavServer {
        &self.server
    }

    async fn probe(&self) -> Result<(), CoreError> {
        let url = self.resource_url("", None)?;
        self.propfind(url, "0").await?;
        debug!("엔드포인트 응답 확인: {}", self.server.url);
        Ok(())
    }

    async fn upload(
        &self,
        dir: &str,
        name: &str,
        body: UploadBody,
        overwrite: bool,
    ) -> Result<bool, CoreError> {
        let url = self.resource_url(dir, Some(name))?;

        if !overwrite && self.exists(&url).await? {
            debug!("원격 파일 존재, 업로드 생략: {dir}/{name}");
            return Ok(false);
        }

        let mut resp = self.put(&url, &body).await?;
        if resp.status() == StatusCode::CONFLICT {
            self.ensure_collections(dir).await?;
            resp = self.put(&url, &body).await?;
        }
        check_response(resp, "PUT").await?;

        debug!("업로드 완료: {dir}/{name}");
        Ok(true)
    }

    async fn download(&self, dir: &str, name: &str) -> Result<Vec<u8>, CoreError> {
        let url = self.resource_url(dir, Some(name))?;
        let resp = self.send(self.request(Method::GET, url), "GET").await?;
        let resp = check_response(resp, "GET").await?;
        let bytes = resp
            .bytes()
            .await
            .map_err(|e| self.map_transport_error(e, "GET 본문"))?;
        Ok(bytes.to_vec())
    }

    async fn list(&self, dir: &str) -> Result<Vec<String>, CoreError> {
        let url = self.resource_url(dir, None)?;
        let resp = self.propfind(url, "1").await?;
        let body = resp
            .text()
            .await
            .map_err(|e| self.map_transport_error(e, "PROPFIND 본문"))?;

        let names: Vec<String> = parse_multistatus(&body)
            .into_iter()
            .filter(|entry| !entry.is_collection)
            .filter_map(|entry| file_name_from_href(&entry.href))
            .collect();
        debug!("원격 목록 {dir}: {}개", names.len());
        Ok(names)
    }

    async fn delete(&self, dir: &str, name: &str) -> Result<bool, CoreError> {
        let url = self.resource_url(dir, Some(name))?;
        let resp = self.send(self.request(Method::DELETE, url), "DELETE").await?;
        if resp.status() == StatusCode::NOT_FOUND {
            return Ok(false);
        }
        check_response(resp, "DELETE").await?;
        Ok(true)
    }
}

/// 엔드포인트별 WebDAV 클라이언트 생성기 (HTTP 커넥션 풀 공유)
pub struct WebDavConnector {
    client: reqwest::Client,
    read_timeout: Duration,
}

impl WebDavConnector {
    /// 타임아웃 지정 생성
    pub fn new(connect_timeout: Duration, read_timeout: Duration) -> Result<Self, CoreError> {
        Ok(Self {
            client: build_http_client(connect_timeout, read_timeout)?,
            read_timeout,
        })
    }

    /// 기본 타임아웃 (연결 10초, 읽기 60초)
    pub fn with_defaults() -> Result<Self, CoreError> {
        Self::new(DEFAULT_CONNECT_TIMEOUT, DEFAULT_READ_TIMEOUT)
    }
}

impl TransportFactory for WebDavConnector {
    fn connect(&self, server: &WebDavServer) -> Result<Arc<dyn RemoteTransport>, CoreError> {
        let client = WebDavClient::with_client(self.client.clone(), server.clone(), self.read_timeout)?;
        Ok(Arc::new(client))
    }
}

fn build_http_client(connect_timeout: Duration, read_timeout: Duration) -> Result<reqwest::Client, CoreError> {
    reqwest::Client::builder()
        .connect_timeout(connect_timeout)
        .read_timeout(read_timeout)
        .build()
        .map_err(|e| CoreError::Network(format!("HTTP 클라이언트 빌드 실패: {e}")))
}

fn dav_method(name: &str) -> Result<Method, CoreError> {
    Method::from_bytes(name.as_bytes())
        .map_err(|e| CoreError::Internal(format!("HTTP 메서드 생성 실패: {name}: {e}")))
}

/// 응답 상태 코드 확인 및 에러 매핑
async fn check_response(resp: reqwest::Response, what: &str) -> Result<reqwest::Response, CoreError> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }

    let url = resp.url().to_string();
    let text = resp.text().await.unwrap_or_else(|e| {
        warn!("응답 본문 읽기 실패: {e}");
        String::new()
    });

    match status.as_u16() {
        401 | 403 => Err(CoreError::Config(format!("{what} 인증 실패 ({status}): {url}"))),
        404 => Err(CoreError::NotFound {
            resource_type: "RemoteFile".to_string(),
            id: url,
        }),
        408 | 429 | 500..=599 => Err(CoreError::Network(format!("{what} 서버 에러 ({status}): {text}"))),
        _ => Err(CoreError::Internal(format!("{what} 실패 ({status}): {text}"))),
    }
}

/// multistatus 응답 항목
#[derive(Debug, Clone, PartialEq, Eq)]
struct DavEntry {
    href: String,
    is_collection: bool,
}

/// multistatus 본문에서 href와 컬렉션 여부만 추출.
///
/// 네임스페이스 접두사는 무시하고 로컬 이름으로 비교한다.
fn parse_multistatus(body: &str) -> Vec<DavEntry> {
    let mut entries = Vec::new();
    let mut current: Option<DavEntry> = None;
    let mut rest = body;

    while let Some(open) = rest.find('<') {
        let Some(close) = rest[open..].find('>') else {
            break;
        };
        let tag = &rest[open + 1..open + close];
        let after = &rest[open + close + 1..];

        let closing = tag.starts_with('/');
        let tag_name = tag
            .trim_start_matches('/')
            .trim_end_matches('/')
            .split_whitespace()
            .next()
            .unwrap_or("");
        let local = tag_name.rsplit(':').next().unwrap_or("").to_ascii_lowercase();

        match (local.as_str(), closing) {
            ("response", false) => {
                current = Some(DavEntry {
                    href: String::new(),
                    is_collection: false,
                });
            }
            ("response", true) => {
                if let Some(entry) = current.take() {
                    entries.push(entry);
                }
            }
            ("href", false) => {
                if let Some(entry) = current.as_mut() {
                    let end = after.find('<').unwrap_or(after.len());
                    entry.href = decode_entities(after[..end].trim());
                }
            }
            ("collection", false) => {
                if let Some(entry) = current.as_mut() {
                    entry.is_collection = true;
                }
            }
            _ => {}
        }

        rest = after;
    }

    entries
}

/// href 마지막 경로 세그먼트를 디코딩한 파일 이름
fn file_name_from_href(href: &str) -> Option<String> {
    let path = href.split(['?', '#']).next().unwrap_or(href);
    let segment = path.trim_end_matches('/').rsplit('/').next()?;
    if segment.is_empty() {
        return None;
    }
    Some(percent_decode(segment))
}

/// XML 문자 참조 해제 (`&amp;` 등 기본 5종 + `&#N;` / `&#xN;`).
///
/// 알 수 없는 참조는 그대로 둔다.
fn decode_entities(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    let mut rest = input;
    while let Some(pos) = rest.find('&') {
        out.push_str(&rest[..pos]);
        let tail = &rest[pos..];
        let decoded = tail.find(';').and_then(|end| {
            let name = &tail[1..end];
            let ch = match name {
                "amp" => Some('&'),
                "lt" => Some('<'),
                "gt" => Some('>'),
                "quot" => Some('"'),
                "apos" => Some('\''),
                _ => {
                    let code = if let Some(hex) = name.strip_prefix("#x").or_else(|| name.strip_prefix("#X")) {
                        u32::from_str_radix(hex, 16).ok()
                    } else {
                        name.strip_prefix('#').and_then(|dec| dec.parse::<u32>().ok())
                    };
                    code.and_then(char::from_u32)
                }
            };
            ch.map(|c| (c, end))
        });

        match decoded {
            Some((c, end)) => {
                out.push(c);
                rest = &tail[end + 1..];
            }
            None => {
                out.push('&');
                rest = &tail[1..];
            }
        }
    }
    out.push_str(rest);
    out
}

fn percent_decode(input: &str) -> String {
    let bytes = input.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' && i + 2 < bytes.len() {
            let hex = std::str::from_utf8(&bytes[i + 1..i + 3]).ok();
            if let Some(value) = hex.and_then(|h| u8::from_str_radix(h, 16).ok()) {
                out.push(value);
                i += 3;
                continue;
            }
        }
        out.push(bytes[i]);
        i += 1;
    }
    String::from_utf8_lossy(&out).into_owned()
}
