//! Periodic status reporting.
//!
//! Each cycle combines the engine's latest [`Report`] with its
//! [`HealthStatus`] into one structured log line. The severity follows
//! the health: Healthy -> info, Degraded -> warn, Unhealthy -> error.

use serde::Serialize;

use ironsift_core::pipeline::HealthStatus;
use ironsift_xdp_engine::Report;

/// One status cycle.
#[derive(Debug, Clone, Serialize)]
pub struct DaemonStatus {
    /// Engine health at the time of the cycle.
    pub status: HealthStatus,
    /// Seconds since the engine started.
    pub uptime_secs: u64,
    /// Packets per second since the previous report.
    pub packets_per_second: f64,
    /// Drop ratio since the previous report.
    pub drop_ratio: f64,
    /// Records handed to the analyzer so far.
    pub delivered: u64,
    /// Non-zero analyzer verdicts so far.
    pub predictions: u64,
    /// Average per-packet processing time.
    pub avg_latency_ns: f64,
    /// Process CPU usage.
    pub cpu_percent: f64,
    /// Peak resident memory.
    pub peak_memory_kb: u64,
}

impl DaemonStatus {
    /// Build a status line. Before the first report all rates are zero.
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    pub fn new(status: HealthStatus, report: Option<&Report>) -> Self {
        let Some(r) = report else {
            return Self {
                status,
                uptime_secs: 0,
                packets_per_second: 0.0,
                drop_ratio: 0.0,
                delivered: 0,
                predictions: 0,
                avg_latency_ns: 0.0,
                cpu_percent: 0.0,
                peak_memory_kb: 0,
            };
        };
        Self {
            status,
            uptime_secs: r.elapsed_secs as u64,
            packets_per_second: r.packets_per_second,
            drop_ratio: r.interval_drop_ratio,
            delivered: r.snapshot.delivered,
            predictions: r.snapshot.ml_predictions,
            avg_latency_ns: r.avg_latency_ns,
            cpu_percent: r.cpu_percent,
            peak_memory_kb: r.peak_memory_kb,
        }
    }

    /// Emit the status through `tracing`.
    pub fn log(&self) {
        macro_rules! emit {
            ($level:ident, $s:ident, $reason:expr) => {
                tracing::$level!(
                    reason = $reason,
                    uptime_secs = $s.uptime_secs,
                    pps = $s.packets_per_second,
                    drop_ratio = $s.drop_ratio,
                    delivered = $s.delivered,
                    predictions = $s.predictions,
                    avg_latency_ns = $s.avg_latency_ns,
                    cpu_percent = $s.cpu_percent,
                    peak_memory_kb = $s.peak_memory_kb,
                    "capture status"
                )
            };
        }
        let s = self;
        match &s.status {
            HealthStatus::Healthy => emit!(info, s, "healthy"),
            HealthStatus::Degraded(reason) => emit!(warn, s, reason.as_str()),
            HealthStatus::Unhealthy(reason) => emit!(error, s, reason.as_str()),
        }
    }
}
