//! 메트릭 상수 및 설명 등록
//!
//! 모든 Prometheus 메트릭의 이름과 설명을 중앙에서 정의합니다.
//! 통계 리포터는 이 상수로 `metrics::counter!()`, `metrics::gauge!()`를 호출합니다.
//!
//! # 네이밍 컨벤션
//!
//! - 접두어: `ironsift_`
//! - 영역: `capture_`, `kernel_`, `daemon_`
//! - 접미어: `_total` (counter), 단위 접미어 (gauge)
//!
//! # 사용 예시
//!
//! ```ignore
//! use metrics::counter;
//!
//! counter!(ironsift_core::metrics::CAPTURE_PACKETS_TOTAL).absolute(42);
//! ```

// ─── 레이블 키 상수 ────────────────────────────────────────────────

/// 프로토콜 레이블 키 (tcp, udp, icmp, other)
pub const LABEL_PROTOCOL: &str = "protocol";

/// 파싱 거부 사유 레이블 키
pub const LABEL_REASON: &str = "reason";

/// 폐기 원인 레이블 키 (malformed, pool_exhausted, ring_full)
pub const LABEL_CAUSE: &str = "cause";

// ─── Capture 메트릭 ────────────────────────────────────────────────

/// Capture: 파서에 도달한 전체 프레임 수 (counter)
pub const CAPTURE_PACKETS_TOTAL: &str = "ironsift_capture_packets_total";

/// Capture: 프로토콜 필터를 통과한 패킷 수 (counter)
pub const CAPTURE_FILTERED_TOTAL: &str = "ironsift_capture_filtered_total";

/// Capture: 프로토콜 비활성으로 관찰만 한 패킷 수 (counter)
pub const CAPTURE_PROTOCOL_DISABLED_TOTAL: &str = "ironsift_capture_protocol_disabled_total";

/// Capture: 샘플링에 선택된 패킷 수 (counter)
pub const CAPTURE_SAMPLED_TOTAL: &str = "ironsift_capture_sampled_total";

/// Capture: 분석 경로로 전달된 패킷 수 (counter)
pub const CAPTURE_REDIRECTED_TOTAL: &str = "ironsift_capture_redirected_total";

/// Capture: 폐기된 패킷 수 (counter, label: cause)
pub const CAPTURE_DROPPED_TOTAL: &str = "ironsift_capture_dropped_total";

/// Capture: 사유별 파싱 거부 수 (counter, label: reason)
pub const CAPTURE_MALFORMED_TOTAL: &str = "ironsift_capture_malformed_total";

/// Capture: 프로토콜별 패킷 수 (counter, label: protocol)
pub const CAPTURE_PROTOCOL_PACKETS_TOTAL: &str = "ironsift_capture_protocol_packets_total";

/// Capture: 파싱된 프레임 바이트 합 (counter)
pub const CAPTURE_BYTES_TOTAL: &str = "ironsift_capture_bytes_total";

/// Capture: 분석기가 0이 아닌 값을 반환한 수 (counter)
pub const CAPTURE_ML_PREDICTIONS_TOTAL: &str = "ironsift_capture_ml_predictions_total";

/// Capture: 분석기 패닉 수 (counter)
pub const CAPTURE_CALLBACK_FAILURES_TOTAL: &str = "ironsift_capture_callback_failures_total";

/// Capture: 초당 상한으로 Sample로 강등된 수 (counter)
pub const CAPTURE_ML_RATE_LIMITED_TOTAL: &str = "ironsift_capture_ml_rate_limited_total";

/// Capture: 초당 처리 패킷 수 (gauge)
pub const CAPTURE_PACKETS_PER_SECOND: &str = "ironsift_capture_packets_per_second";

/// Capture: 패킷당 평균 처리 시간 (gauge, ns)
pub const CAPTURE_AVG_PROCESSING_NS: &str = "ironsift_capture_avg_processing_ns";

/// Capture: 패킷당 최대 처리 시간 (gauge, ns)
pub const CAPTURE_MAX_PROCESSING_NS: &str = "ironsift_capture_max_processing_ns";

// ─── Kernel 메트릭 ─────────────────────────────────────────────────

/// Kernel: XDP 프로그램이 본 전체 프레임 수 (counter)
pub const KERNEL_PACKETS_TOTAL: &str = "ironsift_kernel_packets_total";

/// Kernel: XDP 프로그램이 리다이렉트/방출한 수 (counter)
pub const KERNEL_REDIRECTED_TOTAL: &str = "ironsift_kernel_redirected_total";

/// Kernel: XDP 프로그램에서 폐기된 수 (counter)
pub const KERNEL_DROPPED_TOTAL: &str = "ironsift_kernel_dropped_total";

// ─── Daemon 메트릭 ──────────────────────────────────────────────────

/// Daemon: 프로세스 CPU 사용률 (gauge, %)
pub const DAEMON_CPU_PERCENT: &str = "ironsift_daemon_cpu_percent";

/// Daemon: 최대 상주 메모리 (gauge, KB)
pub const DAEMON_PEAK_MEMORY_KB: &str = "ironsift_daemon_peak_memory_kb";

/// Daemon: 가동 시간 (gauge, 초)
pub const DAEMON_UPTIME_SECONDS: &str = "ironsift_daemon_uptime_seconds";

// ─── 설명 등록 함수 ─────────────────────────────────────────────────

/// 모든 메트릭의 설명(description)을 등록합니다.
///
/// 전역 레코더 설치 후 한 번만 호출합니다. 일반적으로 `ironsift-daemon` 시작 시점입니다.
pub fn describe_all() {
    use metrics::{describe_counter, describe_gauge};

    // Capture
    describe_counter!(
        CAPTURE_PACKETS_TOTAL,
        "Total number of frames that reached the packet parser"
    );
    describe_counter!(
        CAPTURE_FILTERED_TOTAL,
        "Packets whose protocol passed the protocol filter"
    );
    describe_counter!(
        CAPTURE_PROTOCOL_DISABLED_TOTAL,
        "Packets observed but not analyzed because their protocol is disabled"
    );
    describe_counter!(
        CAPTURE_SAMPLED_TOTAL,
        "Packets selected by deterministic 1-in-N sampling"
    );
    describe_counter!(
        CAPTURE_REDIRECTED_TOTAL,
        "Packets delivered to the analysis callback"
    );
    describe_counter!(
        CAPTURE_DROPPED_TOTAL,
        "Packets dropped (malformed, frame pool exhausted, ring full)"
    );
    describe_counter!(
        CAPTURE_MALFORMED_TOTAL,
        "Frames rejected by the parser, by rejection reason"
    );
    describe_counter!(
        CAPTURE_PROTOCOL_PACKETS_TOTAL,
        "Parsed packets per protocol (tcp, udp, icmp, other)"
    );
    describe_counter!(CAPTURE_BYTES_TOTAL, "Total frame bytes of parsed packets");
    describe_counter!(
        CAPTURE_ML_PREDICTIONS_TOTAL,
        "Analyzer invocations that returned a non-zero verdict"
    );
    describe_counter!(
        CAPTURE_CALLBACK_FAILURES_TOTAL,
        "Analyzer invocations that panicked"
    );
    describe_counter!(
        CAPTURE_ML_RATE_LIMITED_TOTAL,
        "Redirect candidates downgraded to sample by max_ml_rate"
    );
    describe_gauge!(
        CAPTURE_PACKETS_PER_SECOND,
        "Packets processed per second over the last reporting interval"
    );
    describe_gauge!(
        CAPTURE_AVG_PROCESSING_NS,
        "Average per-packet processing time in nanoseconds"
    );
    describe_gauge!(
        CAPTURE_MAX_PROCESSING_NS,
        "Maximum per-packet processing time in nanoseconds"
    );

    // Kernel
    describe_counter!(
        KERNEL_PACKETS_TOTAL,
        "Frames seen by the XDP program (summed over CPUs)"
    );
    describe_counter!(
        KERNEL_REDIRECTED_TOTAL,
        "Frames redirected or emitted to the ring by the XDP program"
    );
    describe_counter!(
        KERNEL_DROPPED_TOTAL,
        "Frames dropped or rejected inside the XDP program"
    );

    // Daemon
    describe_gauge!(DAEMON_CPU_PERCENT, "Process CPU usage in percent");
    describe_gauge!(DAEMON_PEAK_MEMORY_KB, "Peak resident set size in kilobytes");
    describe_gauge!(DAEMON_UPTIME_SECONDS, "Ironsift daemon uptime in seconds");
}

#[cfg(test)]
mod tests {
    use super::*;

    const ALL_METRIC_NAMES: &[&str] = &[
        CAPTURE_PACKETS_TOTAL,
        CAPTURE_FILTERED_TOTAL,
        CAPTURE_PROTOCOL_DISABLED_TOTAL,
        CAPTURE_SAMPLED_TOTAL,
        CAPTURE_REDIRECTED_TOTAL,
        CAPTURE_DROPPED_TOTAL,
        CAPTURE_MALFORMED_TOTAL,
        CAPTURE_PROTOCOL_PACKETS_TOTAL,
        CAPTURE_BYTES_TOTAL,
        CAPTURE_ML_PREDICTIONS_TOTAL,
        CAPTURE_CALLBACK_FAILURES_TOTAL,
        CAPTURE_ML_RATE_LIMITED_TOTAL,
        CAPTURE_PACKETS_PER_SECOND,
        CAPTURE_AVG_PROCESSING_NS,
        CAPTURE_MAX_PROCESSING_NS,
        KERNEL_PACKETS_TOTAL,
        KERNEL_REDIRECTED_TOTAL,
        KERNEL_DROPPED_TOTAL,
        DAEMON_CPU_PERCENT,
        DAEMON_PEAK_MEMORY_KB,
        DAEMON_UPTIME_SECONDS,
    ];

    #[test]
    fn all_metrics_start_with_ironsift_prefix() {
        for name in ALL_METRIC_NAMES {
            assert!(
                name.starts_with("ironsift_"),
                "Metric '{}' does not start with 'ironsift_' prefix",
                name
            );
        }
    }

    #[test]
    fn metric_names_are_unique() {
        let mut names = ALL_METRIC_NAMES.to_vec();
        names.sort_unstable();
        names.dedup();
        assert_eq!(names.len(), ALL_METRIC_NAMES.len());
    }

    #[test]
    fn counters_end_with_total() {
        for name in ALL_METRIC_NAMES.iter().filter(|n| n.contains("_total")) {
            assert!(name.ends_with("_total"), "{name}");
        }
    }

    #[test]
    fn describe_all_does_not_panic() {
        // 레코더가 없어도 패닉하지 않아야 함
        describe_all();
    }

    #[test]
    fn label_keys_are_lowercase() {
        for label in [LABEL_PROTOCOL, LABEL_REASON, LABEL_CAUSE] {
            assert_eq!(label.to_lowercase(), label);
        }
    }
}
