//! 에러 타입 — 도메인별 에러 정의

/// Ironsift 최상위 에러 타입
#[derive(Debug, thiserror::Error)]
pub enum IronsiftError {
    /// 설정 관련 에러
    #[error("config error: {0}")]
    Config(#[from] ConfigError),

    /// 파이프라인 생명주기 에러
    #[error("pipeline error: {0}")]
    Pipeline(#[from] PipelineError),

    /// 캡처 설정(어태치, 소켓, 맵) 에러
    #[error("capture error: {0}")]
    Capture(#[from] CaptureError),

    /// I/O 에러
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// 설정 관련 에러
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// 설정 파일을 찾을 수 없음
    #[error("config file not found: {path}")]
    FileNotFound { path: String },

    /// 설정 파싱 실패
    #[error("failed to parse config: {reason}")]
    ParseFailed { reason: String },

    /// 유효하지 않은 설정 값
    #[error("invalid config value for '{field}': {reason}")]
    InvalidValue { field: String, reason: String },
}

/// 파이프라인 생명주기 에러
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    /// 이미 실행 중
    #[error("pipeline is already running")]
    AlreadyRunning,

    /// 실행 중이 아님
    #[error("pipeline is not running")]
    NotRunning,

    /// 초기화 실패
    #[error("pipeline init failed: {0}")]
    InitFailed(String),

    /// 정지 대기 시간 초과
    #[error("timed out: {0}")]
    Timeout(String),
}

/// 캡처 설정 에러
///
/// 시작 단계에서만 발생하며, 발생 시 부분 어태치 상태를 남기지 않습니다.
#[derive(Debug, thiserror::Error)]
pub enum CaptureError {
    /// 네트워크 인터페이스 없음
    #[error("interface not found: {interface}")]
    InterfaceNotFound { interface: String },

    /// 권한 부족 (CAP_NET_ADMIN / CAP_BPF 필요)
    #[error("permission denied: {0}")]
    PermissionDenied(String),

    /// XDP 프로그램 로드 실패
    #[error("xdp program load failed: {0}")]
    ProgramLoad(String),

    /// XDP 어태치 실패
    #[error("xdp attach failed on {interface}: {reason}")]
    AttachFailed { interface: String, reason: String },

    /// BPF 맵 접근 실패
    #[error("bpf map error: {0}")]
    MapAccess(String),

    /// AF_XDP 소켓 생성/바인드 실패
    #[error("af_xdp socket error: {0}")]
    Socket(String),

    /// 프레임 풀/링 메모리 할당 실패
    #[error("memory allocation failed: {0}")]
    MemoryAllocation(String),

    /// 현재 플랫폼에서 지원하지 않음
    #[error("unsupported: {0}")]
    Unsupported(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn capture_error_converts_to_top_level() {
        let err: IronsiftError = CaptureError::InterfaceNotFound {
            interface: "eth9".to_owned(),
        }
        .into();
        assert!(matches!(err, IronsiftError::Capture(_)));
        assert!(err.to_string().contains("eth9"));
    }

    #[test]
    fn attach_failed_display() {
        let err = CaptureError::AttachFailed {
            interface: "ens3".to_owned(),
            reason: "device busy".to_owned(),
        };
        let msg = err.to_string();
        assert!(msg.contains("ens3"));
        assert!(msg.contains("device busy"));
    }

    #[test]
    fn pipeline_error_messages_are_stable() {
        assert_eq!(
            PipelineError::AlreadyRunning.to_string(),
            "pipeline is already running"
        );
        assert_eq!(PipelineError::NotRunning.to_string(), "pipeline is not running");
    }

    #[test]
    fn io_error_converts() {
        let io = std::io::Error::new(std::io::ErrorKind::Other, "boom");
        let err: IronsiftError = io.into();
        assert!(matches!(err, IronsiftError::Io(_)));
    }
}
