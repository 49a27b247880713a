//! 설정 관리 — ironsift.toml 파싱 및 런타임 설정
//!
//! [`IronsiftConfig`]는 모든 섹션을 담는 최상위 구조체입니다.
//!
//! # 설정 로딩 우선순위
//! 1. CLI 인자 (최고 우선)
//! 2. 환경변수 (`IRONSIFT_CAPTURE_INTERFACE=eth0` 형식)
//! 3. 설정 파일 (`ironsift.toml`)
//! 4. 기본값 (`Default` 구현)
//!
//! 로드된 설정은 불변입니다. 캡처 경로가 사용 중인 설정을 바꾸려면 엔진을 정지한 뒤
//! 새 설정으로 다시 시작해야 합니다.
//!
//! # 사용 예시
//! ```no_run
//! # async fn example() -> Result<(), ironsift_core::error::IronsiftError> {
//! use ironsift_core::config::IronsiftConfig;
//!
//! // 파일에서 로드 + 환경변수 오버라이드
//! let config = IronsiftConfig::load("ironsift.toml").await?;
//!
//! // TOML 문자열에서 직접 파싱
//! let config = IronsiftConfig::parse("[capture]\nsampling_rate = 10")?;
//! # Ok(())
//! # }
//! ```

use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::{ConfigError, IronsiftError};

/// AF_XDP 청크 크기 하한
pub const MIN_FRAME_SIZE: u32 = 2048;
/// AF_XDP 청크 크기 상한 (페이지 크기)
pub const MAX_FRAME_SIZE: u32 = 4096;
/// 한 엔진이 다룰 수 있는 최대 큐 수
pub const MAX_QUEUES: u32 = 64;
/// 링 버퍼 한 슬롯의 크기 (특징 레코드 와이어 크기)
pub const RING_RECORD_BYTES: usize = 48;

/// Ironsift 통합 설정
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IronsiftConfig {
    /// 일반 설정
    #[serde(default)]
    pub general: GeneralConfig,
    /// 캡처 설정
    #[serde(default)]
    pub capture: CaptureConfig,
    /// 메트릭 노출 설정
    #[serde(default)]
    pub metrics: MetricsConfig,
}

impl IronsiftConfig {
    /// TOML 파일에서 설정을 로드하고 환경변수 오버라이드를 적용합니다.
    pub async fn load(path: impl AsRef<Path>) -> Result<Self, IronsiftError> {
        let mut config = Self::from_file(path).await?;
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// TOML 파일에서 설정을 로드합니다 (환경변수 오버라이드 없음).
    pub async fn from_file(path: impl AsRef<Path>) -> Result<Self, IronsiftError> {
        let path = path.as_ref();
        let content = tokio::fs::read_to_string(path).await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                IronsiftError::Config(ConfigError::FileNotFound {
                    path: path.display().to_string(),
                })
            } else {
                IronsiftError::Io(e)
            }
        })?;
        let config = Self::parse(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// TOML 문자열에서 설정을 파싱합니다.
    pub fn parse(toml_str: &str) -> Result<Self, IronsiftError> {
        toml::from_str(toml_str).map_err(|e| {
            IronsiftError::Config(ConfigError::ParseFailed {
                reason: e.to_string(),
            })
        })
    }

    /// 환경변수로 설정값을 오버라이드합니다.
    ///
    /// 환경변수 네이밍 규칙: `IRONSIFT_{SECTION}_{FIELD}`
    /// 예: `IRONSIFT_CAPTURE_INTERFACE=ens3`
    pub fn apply_env_overrides(&mut self) {
        // General
        override_string(&mut self.general.log_level, "IRONSIFT_GENERAL_LOG_LEVEL");
        override_string(&mut self.general.log_format, "IRONSIFT_GENERAL_LOG_FORMAT");

        // Capture
        let c = &mut self.capture;
        override_string(&mut c.interface, "IRONSIFT_CAPTURE_INTERFACE");
        override_u32(&mut c.queue_id, "IRONSIFT_CAPTURE_QUEUE_ID");
        override_u32(&mut c.queue_count, "IRONSIFT_CAPTURE_QUEUE_COUNT");
        override_string(&mut c.xdp_mode, "IRONSIFT_CAPTURE_XDP_MODE");
        override_string(&mut c.xdp_program_path, "IRONSIFT_CAPTURE_XDP_PROGRAM_PATH");
        override_u32(&mut c.sampling_rate, "IRONSIFT_CAPTURE_SAMPLING_RATE");
        override_u32(&mut c.max_ml_rate, "IRONSIFT_CAPTURE_MAX_ML_RATE");
        override_bool(&mut c.enable_tcp, "IRONSIFT_CAPTURE_ENABLE_TCP");
        override_bool(&mut c.enable_udp, "IRONSIFT_CAPTURE_ENABLE_UDP");
        override_bool(&mut c.enable_icmp, "IRONSIFT_CAPTURE_ENABLE_ICMP");
        override_bool(&mut c.enable_other, "IRONSIFT_CAPTURE_ENABLE_OTHER");
        override_u32(&mut c.batch_size, "IRONSIFT_CAPTURE_BATCH_SIZE");
        override_usize(&mut c.buffer_size, "IRONSIFT_CAPTURE_BUFFER_SIZE");
        override_bool(&mut c.zero_copy_mode, "IRONSIFT_CAPTURE_ZERO_COPY_MODE");
        override_u32(&mut c.frame_count, "IRONSIFT_CAPTURE_FRAME_COUNT");
        override_u32(&mut c.frame_size, "IRONSIFT_CAPTURE_FRAME_SIZE");
        override_u64(&mut c.poll_timeout_ms, "IRONSIFT_CAPTURE_POLL_TIMEOUT_MS");
        override_u64(
            &mut c.stats_interval_secs,
            "IRONSIFT_CAPTURE_STATS_INTERVAL_SECS",
        );

        // Flow tracking
        override_bool(
            &mut c.flow_tracking.enabled,
            "IRONSIFT_FLOW_TRACKING_ENABLED",
        );
        override_usize(
            &mut c.flow_tracking.max_flows,
            "IRONSIFT_FLOW_TRACKING_MAX_FLOWS",
        );
        override_u64(
            &mut c.flow_tracking.timeout_secs,
            "IRONSIFT_FLOW_TRACKING_TIMEOUT_SECS",
        );

        // Metrics
        override_bool(&mut self.metrics.enabled, "IRONSIFT_METRICS_ENABLED");
        override_string(&mut self.metrics.listen_addr, "IRONSIFT_METRICS_LISTEN_ADDR");
        override_u16(&mut self.metrics.port, "IRONSIFT_METRICS_PORT");
    }

    /// 설정값의 유효성을 검증합니다.
    pub fn validate(&self) -> Result<(), IronsiftError> {
        // log_level 검증
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.general.log_level.as_str()) {
            return Err(invalid(
                "general.log_level",
                format!("must be one of: {}", valid_levels.join(", ")),
            ));
        }

        // log_format 검증
        let valid_formats = ["json", "pretty"];
        if !valid_formats.contains(&self.general.log_format.as_str()) {
            return Err(invalid(
                "general.log_format",
                format!("must be one of: {}", valid_formats.join(", ")),
            ));
        }

        self.capture.validate()?;

        if self.metrics.enabled && self.metrics.endpoint != "/metrics" {
            return Err(invalid(
                "metrics.endpoint",
                "only '/metrics' is supported".to_owned(),
            ));
        }
        Ok(())
    }
}

fn invalid(field: &str, reason: String) -> IronsiftError {
    ConfigError::InvalidValue {
        field: field.to_owned(),
        reason,
    }
    .into()
}

/// 일반 설정
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    /// 로그 레벨 (trace, debug, info, warn, error)
    pub log_level: String,
    /// 로그 형식 (json, pretty)
    pub log_format: String,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_owned(),
            log_format: "json".to_owned(),
        }
    }
}

/// 캡처 설정
///
/// 커널 XDP 필터, 프레임 풀, 수용 제어, 처리 루프가 공유합니다.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureConfig {
    /// 캡처할 네트워크 인터페이스
    pub interface: String,
    /// 첫 번째 NIC 큐 ID
    pub queue_id: u32,
    /// 사용할 큐 수 (`queue_id..queue_id + queue_count`)
    pub queue_count: u32,
    /// XDP 어태치 모드 (skb, native, hw)
    pub xdp_mode: String,
    /// 컴파일된 XDP 오브젝트 경로
    pub xdp_program_path: String,
    /// N개 중 1개 샘플링 (1 = 전체)
    pub sampling_rate: u32,
    /// 초당 분석 경로 전달 상한 (0 = 무제한)
    pub max_ml_rate: u32,
    /// TCP 처리 여부
    pub enable_tcp: bool,
    /// UDP 처리 여부
    pub enable_udp: bool,
    /// ICMP 처리 여부
    pub enable_icmp: bool,
    /// TCP/UDP/ICMP 외 프로토콜 처리 여부
    pub enable_other: bool,
    /// 한 번의 폴링에서 처리할 최대 프레임 수
    pub batch_size: u32,
    /// 특징 링 버퍼 크기 (바이트)
    pub buffer_size: usize,
    /// AF_XDP 제로 카피 모드 (false면 링 버퍼 모드)
    pub zero_copy_mode: bool,
    /// 큐당 프레임 풀 크기 (프레임 수)
    pub frame_count: u32,
    /// 프레임 크기 (바이트, 2의 거듭제곱)
    pub frame_size: u32,
    /// 폴링 대기 상한 (ms)
    pub poll_timeout_ms: u64,
    /// 통계 보고 주기 (초)
    pub stats_interval_secs: u64,
    /// 플로우 추적 설정
    #[serde(default)]
    pub flow_tracking: FlowTrackingConfig,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            interface: "eth0".to_owned(),
            queue_id: 0,
            queue_count: 1,
            xdp_mode: "skb".to_owned(),
            xdp_program_path: "crates/xdp-engine/ebpf/target/bpfel-unknown-none/release/ironsift-ebpf".to_owned(),
            sampling_rate: 100,
            max_ml_rate: 10_000,
            enable_tcp: true,
            enable_udp: true,
            enable_icmp: false,
            enable_other: false,
            batch_size: 64,
            buffer_size: 256 * 1024, // 256KB
            zero_copy_mode: true,
            frame_count: 4096,
            frame_size: 4096,
            poll_timeout_ms: 1000,
            stats_interval_secs: 1,
            flow_tracking: FlowTrackingConfig::default(),
        }
    }
}

impl CaptureConfig {
    /// 캡처 설정의 유효성을 검증합니다.
    pub fn validate(&self) -> Result<(), IronsiftError> {
        if self.interface.is_empty() {
            return Err(invalid(
                "capture.interface",
                "interface must not be empty".to_owned(),
            ));
        }

        let valid_modes = ["skb", "native", "hw"];
        if !valid_modes.contains(&self.xdp_mode.as_str()) {
            return Err(invalid(
                "capture.xdp_mode",
                format!("must be one of: {}", valid_modes.join(", ")),
            ));
        }

        if self.sampling_rate == 0 {
            return Err(invalid(
                "capture.sampling_rate",
                "must be at least 1".to_owned(),
            ));
        }

        if self.batch_size == 0 {
            return Err(invalid("capture.batch_size", "must be at least 1".to_owned()));
        }

        if self.queue_count == 0 || self.queue_count > MAX_QUEUES {
            return Err(invalid(
                "capture.queue_count",
                format!("must be between 1 and {MAX_QUEUES}"),
            ));
        }

        if !self.frame_size.is_power_of_two()
            || !(MIN_FRAME_SIZE..=MAX_FRAME_SIZE).contains(&self.frame_size)
        {
            return Err(invalid(
                "capture.frame_size",
                format!("must be a power of two between {MIN_FRAME_SIZE} and {MAX_FRAME_SIZE}"),
            ));
        }

        if self.frame_count < self.batch_size {
            return Err(invalid(
                "capture.frame_count",
                format!("must be at least batch_size ({})", self.batch_size),
            ));
        }

        if self.buffer_size < RING_RECORD_BYTES {
            return Err(invalid(
                "capture.buffer_size",
                format!("must hold at least one record ({RING_RECORD_BYTES} bytes)"),
            ));
        }

        if self.poll_timeout_ms == 0 {
            return Err(invalid(
                "capture.poll_timeout_ms",
                "must be greater than 0".to_owned(),
            ));
        }

        if self.stats_interval_secs == 0 {
            return Err(invalid(
                "capture.stats_interval_secs",
                "must be greater than 0".to_owned(),
            ));
        }

        if self.flow_tracking.enabled && self.flow_tracking.max_flows == 0 {
            return Err(invalid(
                "capture.flow_tracking.max_flows",
                "must be at least 1 when flow tracking is enabled".to_owned(),
            ));
        }

        Ok(())
    }

    /// 처리 대상 큐 ID 목록
    pub fn queue_ids(&self) -> impl Iterator<Item = u32> + '_ {
        (0..self.queue_count).map(move |i| self.queue_id + i)
    }
}

/// 플로우 추적 설정
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FlowTrackingConfig {
    /// 활성화 여부 (비활성이면 도착 간격은 항상 알 수 없음)
    pub enabled: bool,
    /// 동시에 추적할 최대 플로우 수
    pub max_flows: usize,
    /// 이 시간 동안 패킷이 없으면 플로우를 제거 (초)
    pub timeout_secs: u64,
}

impl Default for FlowTrackingConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            max_flows: 65_536,
            timeout_secs: 60,
        }
    }
}

/// 메트릭 노출 설정
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MetricsConfig {
    /// Prometheus 엔드포인트 활성화 여부
    pub enabled: bool,
    /// 바인드 주소
    pub listen_addr: String,
    /// 포트
    pub port: u16,
    /// HTTP 경로
    pub endpoint: String,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            listen_addr: "127.0.0.1".to_owned(),
            port: 9100,
            endpoint: "/metrics".to_owned(),
        }
    }
}

// --- 환경변수 오버라이드 헬퍼 ---

fn override_string(target: &mut String, env_key: &str) {
    if let Ok(val) = std::env::var(env_key) {
        *target = val;
    }
}

fn override_parsed<T: std::str::FromStr>(target: &mut T, env_key: &str, type_name: &str) {
    if let Ok(val) = std::env::var(env_key) {
        match val.parse::<T>() {
            Ok(parsed) => *target = parsed,
            Err(_) => warn!(
                env_key,
                value = val.as_str(),
                expected = type_name,
                "failed to parse env var, ignoring"
            ),
        }
    }
}

fn override_bool(target: &mut bool, env_key: &str) {
    override_parsed(target, env_key, "bool");
}

fn override_usize(target: &mut usize, env_key: &str) {
    override_parsed(target, env_key, "usize");
}

fn override_u16(target: &mut u16, env_key: &str) {
    override_parsed(target, env_key, "u16");
}

fn override_u32(target: &mut u32, env_key: &str) {
    override_parsed(target, env_key, "u32");
}

fn override_u64(target: &mut u64, env_key: &str) {
    override_parsed(target, env_key, "u64");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_has_documented_values() {
        let config = IronsiftConfig::default();
        let c = &config.capture;
        assert_eq!(c.sampling_rate, 100);
        assert_eq!(c.max_ml_rate, 10_000);
        assert!(c.enable_tcp && c.enable_udp);
        assert!(!c.enable_icmp);
        assert_eq!(c.batch_size, 64);
        assert_eq!(c.buffer_size, 262_144);
        assert!(c.zero_copy_mode);
        assert_eq!(c.interface, "eth0");
        assert_eq!(c.queue_id, 0);
        assert!(!c.flow_tracking.enabled);
    }

    #[test]
    fn default_config_passes_validation() {
        IronsiftConfig::default().validate().unwrap();
    }

    #[test]
    fn from_str_empty_toml_uses_defaults() {
        let config = IronsiftConfig::parse("").unwrap();
        assert_eq!(config.general.log_level, "info");
        assert_eq!(config.capture.frame_count, 4096);
    }

    #[test]
    fn from_str_partial_toml_merges_with_defaults() {
        let toml = r#"
[general]
log_level = "debug"

[capture]
interface = "ens3"
sampling_rate = 10

[capture.flow_tracking]
enabled = true
max_flows = 128
"#;
        let config = IronsiftConfig::parse(toml).unwrap();
        assert_eq!(config.general.log_level, "debug");
        // log_format은 기본값 유지
        assert_eq!(config.general.log_format, "json");
        assert_eq!(config.capture.interface, "ens3");
        assert_eq!(config.capture.sampling_rate, 10);
        assert_eq!(config.capture.batch_size, 64);
        assert!(config.capture.flow_tracking.enabled);
        assert_eq!(config.capture.flow_tracking.max_flows, 128);
        assert_eq!(config.capture.flow_tracking.timeout_secs, 60);
    }

    #[test]
    fn from_str_invalid_toml_returns_error() {
        let err = IronsiftConfig::parse("invalid = [[[toml").unwrap_err();
        assert!(matches!(
            err,
            IronsiftError::Config(ConfigError::ParseFailed { .. })
        ));
    }

    #[test]
    fn validate_rejects_zero_sampling_rate() {
        let mut config = IronsiftConfig::default();
        config.capture.sampling_rate = 0;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("sampling_rate"));
    }

    #[test]
    fn validate_rejects_bad_frame_size() {
        let mut config = IronsiftConfig::default();
        config.capture.frame_size = 3000;
        assert!(config.validate().unwrap_err().to_string().contains("frame_size"));
        config.capture.frame_size = 1024;
        assert!(config.validate().is_err());
        config.capture.frame_size = 2048;
        config.validate().unwrap();
    }

    #[test]
    fn validate_rejects_frame_pool_smaller_than_batch() {
        let mut config = IronsiftConfig::default();
        config.capture.frame_count = 16;
        config.capture.batch_size = 64;
        assert!(config.validate().unwrap_err().to_string().contains("frame_count"));
    }

    #[test]
    fn validate_rejects_tiny_ring() {
        let mut config = IronsiftConfig::default();
        config.capture.buffer_size = 47;
        assert!(config.validate().unwrap_err().to_string().contains("buffer_size"));
    }

    #[test]
    fn validate_rejects_unknown_xdp_mode() {
        let mut config = IronsiftConfig::default();
        config.capture.xdp_mode = "turbo".to_owned();
        assert!(config.validate().unwrap_err().to_string().contains("xdp_mode"));
    }

    #[test]
    fn validate_rejects_invalid_log_level() {
        let mut config = IronsiftConfig::default();
        config.general.log_level = "verbose".to_owned();
        assert!(config.validate().unwrap_err().to_string().contains("log_level"));
    }

    #[test]
    fn validate_rejects_zero_max_flows_when_tracking() {
        let mut config = IronsiftConfig::default();
        config.capture.flow_tracking.enabled = true;
        config.capture.flow_tracking.max_flows = 0;
        assert!(config.validate().unwrap_err().to_string().contains("max_flows"));
    }

    #[test]
    fn queue_ids_span_queue_count() {
        let mut c = CaptureConfig::default();
        c.queue_id = 2;
        c.queue_count = 3;
        assert_eq!(c.queue_ids().collect::<Vec<_>>(), vec![2, 3, 4]);
    }
}
