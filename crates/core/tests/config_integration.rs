//! ironsift.toml 통합 설정 테스트
//!
//! - ironsift.toml.example 파싱 테스트
//! - 파일 로딩 테스트
//! - 환경변수 우선순위 테스트
//! - 잘못된 형식 / 잘못된 값 에러 테스트

use std::io::Write;

use ironsift_core::config::IronsiftConfig;
use ironsift_core::error::{ConfigError, IronsiftError};

const EXAMPLE: &str = include_str!("../../../ironsift.toml.example");

/// 환경변수를 설정한 채로 `f`를 실행하고 원래 값으로 되돌립니다.
fn with_env<R>(key: &str, value: &str, f: impl FnOnce() -> R) -> R {
    let original = std::env::var(key).ok();
    // SAFETY: 테스트는 serial_test로 직렬화되어 환경변수 조작이 안전합니다.
    unsafe {
        std::env::set_var(key, value);
    }

    let result = f();

    // SAFETY: 테스트 정리
    unsafe {
        match original {
            Some(val) => std::env::set_var(key, val),
            None => std::env::remove_var(key),
        }
    }
    result
}

// =============================================================================
// ironsift.toml.example 파싱 테스트
// =============================================================================

#[test]
fn example_config_parses_successfully() {
    let config = IronsiftConfig::parse(EXAMPLE).expect("example config should parse");
    assert_eq!(config.general.log_level, "info");
    assert_eq!(config.general.log_format, "json");
}

#[test]
fn example_config_passes_validation() {
    let config = IronsiftConfig::parse(EXAMPLE).expect("should parse");
    config
        .validate()
        .expect("example config should pass validation");
}

#[test]
fn example_config_matches_defaults() {
    let parsed = IronsiftConfig::parse(EXAMPLE).expect("should parse");
    let defaults = IronsiftConfig::default();

    // 예시 파일은 기본값을 그대로 문서화해야 함
    let a = serde_json::to_value(&parsed).expect("serialize");
    let b = serde_json::to_value(&defaults).expect("serialize");
    assert_eq!(a, b);
}

#[test]
fn example_config_has_capture_section() {
    let config = IronsiftConfig::parse(EXAMPLE).expect("should parse");
    let c = &config.capture;
    assert_eq!(c.interface, "eth0");
    assert_eq!(c.sampling_rate, 100);
    assert_eq!(c.max_ml_rate, 10000);
    assert_eq!(c.buffer_size, 262144);
    assert!(c.zero_copy_mode);
    assert!(!c.flow_tracking.enabled);
    assert_eq!(c.flow_tracking.max_flows, 65536);
}

// =============================================================================
// 파일 로딩 테스트
// =============================================================================

#[tokio::test]
async fn from_file_reads_toml() {
    let mut file = tempfile::NamedTempFile::new().expect("tempfile");
    writeln!(file, "[capture]\ninterface = \"ens5\"\nqueue_count = 4").expect("write");

    let config = IronsiftConfig::from_file(file.path())
        .await
        .expect("should load");
    assert_eq!(config.capture.interface, "ens5");
    assert_eq!(config.capture.queue_ids().collect::<Vec<_>>(), vec![0, 1, 2, 3]);
}

#[tokio::test]
async fn from_file_missing_returns_file_not_found() {
    let err = IronsiftConfig::from_file("/nonexistent/ironsift.toml")
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        IronsiftError::Config(ConfigError::FileNotFound { .. })
    ));
}

#[tokio::test]
async fn from_file_rejects_invalid_values() {
    let mut file = tempfile::NamedTempFile::new().expect("tempfile");
    writeln!(file, "[capture]\nsampling_rate = 0").expect("write");

    let err = IronsiftConfig::from_file(file.path()).await.unwrap_err();
    assert!(matches!(
        err,
        IronsiftError::Config(ConfigError::InvalidValue { ref field, .. }) if field == "capture.sampling_rate"
    ));
}

#[tokio::test]
#[serial_test::serial]
async fn load_applies_env_overrides() {
    let mut file = tempfile::NamedTempFile::new().expect("tempfile");
    writeln!(file, "[capture]\nbatch_size = 32").expect("write");
    let path = file.path().to_path_buf();

    let original = std::env::var("IRONSIFT_CAPTURE_BATCH_SIZE").ok();
    // SAFETY: 테스트는 serial_test로 직렬화되어 환경변수 조작이 안전합니다.
    unsafe {
        std::env::set_var("IRONSIFT_CAPTURE_BATCH_SIZE", "128");
    }

    let result = IronsiftConfig::load(&path).await;

    // SAFETY: 테스트 정리
    unsafe {
        match original {
            Some(val) => std::env::set_var("IRONSIFT_CAPTURE_BATCH_SIZE", val),
            None => std::env::remove_var("IRONSIFT_CAPTURE_BATCH_SIZE"),
        }
    }

    assert_eq!(result.expect("should load").capture.batch_size, 128);
}

// =============================================================================
// 환경변수 오버라이드 테스트
// =============================================================================

#[test]
#[serial_test::serial]
fn env_override_takes_precedence_over_file() {
    let toml = r#"
[capture]
interface = "eth1"
"#;
    let result = with_env("IRONSIFT_CAPTURE_INTERFACE", "wlan0", || {
        let mut config = IronsiftConfig::parse(toml).expect("should parse");
        config.apply_env_overrides();
        config.capture.interface
    });
    assert_eq!(result, "wlan0");
}

#[test]
#[serial_test::serial]
fn env_override_bool_field() {
    let result = with_env("IRONSIFT_CAPTURE_ENABLE_ICMP", "true", || {
        let mut config = IronsiftConfig::parse("").expect("should parse");
        config.apply_env_overrides();
        config.capture.enable_icmp
    });
    assert!(result);
}

#[test]
#[serial_test::serial]
fn env_override_flow_tracking() {
    let result = with_env("IRONSIFT_FLOW_TRACKING_MAX_FLOWS", "1024", || {
        let mut config = IronsiftConfig::parse("").expect("should parse");
        config.apply_env_overrides();
        config.capture.flow_tracking.max_flows
    });
    assert_eq!(result, 1024);
}

#[test]
#[serial_test::serial]
fn env_override_invalid_number_is_ignored() {
    let result = with_env("IRONSIFT_CAPTURE_SAMPLING_RATE", "lots", || {
        let mut config = IronsiftConfig::parse("[capture]\nsampling_rate = 7").expect("parse");
        config.apply_env_overrides();
        config.capture.sampling_rate
    });
    assert_eq!(result, 7);
}

// =============================================================================
// 에러 테스트
// =============================================================================

#[test]
fn wrong_type_returns_parse_error() {
    let err = IronsiftConfig::parse("[capture]\nbatch_size = \"big\"").unwrap_err();
    assert!(matches!(
        err,
        IronsiftError::Config(ConfigError::ParseFailed { .. })
    ));
}

#[test]
fn queue_count_over_limit_is_rejected() {
    let config = IronsiftConfig::parse("[capture]\nqueue_count = 65").expect("parse");
    let err = config.validate().unwrap_err();
    assert!(err.to_string().contains("queue_count"));
}

#[test]
fn unsupported_metrics_endpoint_is_rejected() {
    let config = IronsiftConfig::parse("[metrics]\nendpoint = \"/stats\"").expect("parse");
    assert!(config.validate().is_err());
}
