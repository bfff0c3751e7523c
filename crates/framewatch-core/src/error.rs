//! FrameWatch 핵심 에러 타입.
//!
//! 모든 어댑터 crate는 `CoreError`를 그대로 반환한다.
//! 경계 메서드(캡처 콜백, 워커 루프, 스케줄 작업)는 이 에러를 로그로만 남기고 전파하지 않는다.

use thiserror::Error;

/// 코어 레이어 에러.
#[derive(Debug, Error)]
pub enum CoreError {
    /// JSON 직렬화/역직렬화 실패
    #[error("직렬화 에러: {0}")]
    Serialization(#[from] serde_json::Error),

    /// 설정값 오류
    #[error("설정 에러: {0}")]
    Config(String),

    /// 필드 유효성 검증 실패
    #[error("유효성 검증 실패: {field}: {message}")]
    Validation {
        /// 검증 실패한 필드명
        field: String,
        /// 실패 사유
        message: String,
    },

    /// 리소스를 찾을 수 없음
    #[error("{resource_type} 미발견: {id}")]
    NotFound {
        /// 리소스 종류 (예: "RemoteFile", "Template")
        resource_type: String,
        /// 리소스 식별자
        id: String,
    },

    /// 내부 에러 (예상치 못한 상황)
    #[error("내부 에러: {0}")]
    Internal(String),

    /// 네트워크 에러 (연결 실패, I/O 실패)
    #[error("네트워크 에러: {0}")]
    Network(String),

    /// 연결/읽기 타임아웃
    #[error("타임아웃: {timeout_ms}ms 초과")]
    Timeout {
        /// 초과된 타임아웃 시간 (밀리초)
        timeout_ms: u64,
    },

    /// I/O 에러
    #[error("I/O 에러: {0}")]
    Io(#[from] std::io::Error),

    /// 이미지 디코딩/인코딩 실패
    #[error("이미지 에러: {0}")]
    Image(String),

    /// 상관도 연산 실패 (해당 스케일은 최저 점수로 처리)
    #[error("상관도 연산 실패: {0}")]
    Correlation(String),

    /// 캡처 버퍼 크기 불일치 (캡처 전송 계층 버그)
    #[error("버퍼 크기 불일치: expected={expected}, actual={actual}")]
    SizeMismatch {
        /// 기대 바이트 수 (width * height * 4)
        expected: usize,
        /// 실제 바이트 수
        actual: usize,
    },
}

impl CoreError {
    /// 재시도 가능한 에러인지 판별 (네트워크/타임아웃만)
    pub fn is_retryable(&self) -> bool {
        matches!(self, CoreError::Network(_) | CoreError::Timeout { .. })
    }
}

impl From<image::ImageError> for CoreError {
    fn from(e: image::ImageError) -> Self {
        CoreError::Image(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryable_classification() {
        assert!(CoreError::Network("reset".to_string()).is_retryable());
        assert!(CoreError::Timeout { timeout_ms: 10_000 }.is_retryable());
        assert!(!CoreError::Config("bad".to_string()).is_retryable());
        assert!(!CoreError::NotFound {
            resource_type: "RemoteFile".to_string(),
            id: "a.png".to_string(),
        }
        .is_retryable());
    }

    #[test]
    fn size_mismatch_message() {
        let err = CoreError::SizeMismatch {
            expected: 16,
            actual: 8,
        };
        let msg = err.to_string();
        assert!(msg.contains("expected=16"));
        assert!(msg.contains("actual=8"));
    }
}
