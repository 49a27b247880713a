//! 엔진 에러 타입
//!
//! [`EngineError`]는 XDP 엔진 내부(어태치, 맵, 소켓, 큐 스레드)에서 발생하는 에러를 표현합니다.
//! `From<EngineError> for IronsiftError` 변환이 구현되어 있어
//! 상위 레이어에서 `?` 연산자로 전파할 수 있습니다.

use ironsift_core::error::{CaptureError, IronsiftError, PipelineError};

/// XDP 엔진 도메인 에러
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// 네트워크 인터페이스 없음
    #[error("interface not found: {0}")]
    InterfaceNotFound(String),

    /// 권한 부족
    #[error("permission denied: {0}")]
    PermissionDenied(String),

    /// XDP 오브젝트 로드 실패
    #[error("program load failed: {0}")]
    ProgramLoad(String),

    /// XDP 어태치 실패
    #[error("attach failed on {interface}: {reason}")]
    Attach {
        /// 인터페이스 이름
        interface: String,
        /// 실패 사유
        reason: String,
    },

    /// BPF 맵 접근 실패
    #[error("map '{map}': {reason}")]
    Map {
        /// 맵 이름
        map: String,
        /// 실패 사유
        reason: String,
    },

    /// 프레임 전송 계층 에러 (AF_XDP 소켓, UMEM)
    #[error("transport error on queue {queue_id}: {reason}")]
    Transport {
        /// NIC 큐 ID
        queue_id: u32,
        /// 실패 사유
        reason: String,
    },

    /// 큐 처리 스레드 생성/종료 실패
    #[error("queue worker error: {0}")]
    Worker(String),

    /// 현재 플랫폼에서 지원하지 않는 기능
    #[error("unsupported: {0}")]
    Unsupported(String),

    /// I/O 에러
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl EngineError {
    /// 전송 계층 에러를 생성합니다.
    pub fn transport(queue_id: u32, reason: impl std::fmt::Display) -> Self {
        Self::Transport {
            queue_id,
            reason: reason.to_string(),
        }
    }

    /// 맵 에러를 생성합니다.
    pub fn map(map: &str, reason: impl std::fmt::Display) -> Self {
        Self::Map {
            map: map.to_owned(),
            reason: reason.to_string(),
        }
    }
}

impl From<EngineError> for IronsiftError {
    fn from(err: EngineError) -> Self {
        match err {
            EngineError::InterfaceNotFound(interface) => {
                CaptureError::InterfaceNotFound { interface }.into()
            }
            EngineError::PermissionDenied(reason) => CaptureError::PermissionDenied(reason).into(),
            EngineError::ProgramLoad(reason) => CaptureError::ProgramLoad(reason).into(),
            EngineError::Attach { interface, reason } => {
                CaptureError::AttachFailed { interface, reason }.into()
            }
            EngineError::Map { .. } => CaptureError::MapAccess(err.to_string()).into(),
            EngineError::Transport { .. } => CaptureError::Socket(err.to_string()).into(),
            EngineError::Unsupported(reason) => CaptureError::Unsupported(reason).into(),
            EngineError::Worker(reason) => PipelineError::InitFailed(reason).into(),
            EngineError::Io(e) => IronsiftError::Io(e),
        }
    }
}
