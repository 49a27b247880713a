//! 통계 수집 — 원자적 카운터 배열과 주기적 보고
//!
//! [`StatsTable`]은 시작 시 한 번 할당되는 고정 크기 `AtomicU64` 배열입니다.
//! 큐 스레드는 `fetch_add`로만 갱신하고, 보고 태스크는 락 없이 스냅샷을 읽습니다.
//! 카운터는 실행 중 초기화되지 않습니다.
//!
//! # 데이터 흐름
//! ```text
//! queue threads ──fetch_add──▶ StatsTable ──snapshot──▶ StatsReporter ──update──▶ Report
//! PerCpuArray (kernel) ──sum──▶ KernelCounters ──────────┘                (rate, cpu, memory)
//! ```

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use ironsift_core::metrics as m;
use ironsift_xdp_common::{
    PROTO_ICMP, PROTO_TCP, PROTO_UDP, ParseReject, STATS_IDX_DROPPED, STATS_IDX_FILTERED,
    STATS_IDX_PROCESSING_NS, STATS_IDX_REDIRECTED, STATS_IDX_SAMPLED, STATS_IDX_TCP,
    STATS_IDX_TOTAL, STATS_IDX_UDP, STATS_MAX_ENTRIES,
};
use serde::Serialize;

use crate::admission::{Admission, Fate};

/// 이름 있는 단조 증가 카운터
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(usize)]
pub enum StatCounter {
    /// 파서에 도달한 프레임
    Total,
    /// 프로토콜 필터 통과
    Filtered,
    /// 프로토콜 비활성
    ProtocolDisabled,
    /// 샘플링 선택
    Sampled,
    /// 샘플링 비선택
    NotSampled,
    /// 분석 경로 전달 결정
    Redirected,
    /// 선택되었지만 분석 경로 아님
    SampledOnly,
    /// 폐기 합계 (Malformed + PoolExhausted + RingOverrun)
    Dropped,
    /// 파싱 거부
    Malformed,
    /// 프레임 풀 고갈로 수신 실패
    PoolExhausted,
    /// 특징 링 가득참. Redirected의 부분 집계 (리다이렉트 결정 후 전달 전에 잃은 레코드)
    RingOverrun,
    /// TCP
    Tcp,
    /// UDP
    Udp,
    /// ICMP
    Icmp,
    /// 기타 프로토콜
    Other,
    /// 파싱된 프레임 바이트 합
    TotalBytes,
    /// 분석기 호출 수
    Delivered,
    /// 분석기가 0이 아닌 값을 반환한 수
    MlPredictions,
    /// 분석기 패닉 수
    CallbackFailures,
    /// 초당 상한 강등
    MlRateLimited,
    /// 처리 시간 합 (ns)
    ProcessingTimeNs,
    /// 처리 시간이 측정된 패킷 수
    TimedPackets,
}

impl StatCounter {
    /// 카운터 수
    pub const COUNT: usize = 22;

    /// 모든 카운터
    pub const ALL: [StatCounter; Self::COUNT] = [
        Self::Total,
        Self::Filtered,
        Self::ProtocolDisabled,
        Self::Sampled,
        Self::NotSampled,
        Self::Redirected,
        Self::SampledOnly,
        Self::Dropped,
        Self::Malformed,
        Self::PoolExhausted,
        Self::RingOverrun,
        Self::Tcp,
        Self::Udp,
        Self::Icmp,
        Self::Other,
        Self::TotalBytes,
        Self::Delivered,
        Self::MlPredictions,
        Self::CallbackFailures,
        Self::MlRateLimited,
        Self::ProcessingTimeNs,
        Self::TimedPackets,
    ];

    /// 배열 인덱스
    pub const fn index(self) -> usize {
        self as usize
    }
}

/// 커널 PerCpuArray 카운터 (CPU 합산)
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct KernelCounters {
    /// XDP 프로그램이 본 프레임
    pub total: u64,
    /// 프로토콜 필터 통과
    pub filtered: u64,
    /// 샘플링 선택
    pub sampled: u64,
    /// 리다이렉트/방출
    pub redirected: u64,
    /// 파싱 실패 또는 링 가득참
    pub dropped: u64,
    /// TCP
    pub tcp: u64,
    /// UDP
    pub udp: u64,
    /// 처리 시간 합 (ns)
    pub processing_ns: u64,
}

impl KernelCounters {
    /// 인덱스별 합산 값에서 생성합니다.
    pub fn from_raw(raw: &[u64; STATS_MAX_ENTRIES as usize]) -> Self {
        let at = |i: u32| raw[i as usize];
        Self {
            total: at(STATS_IDX_TOTAL),
            filtered: at(STATS_IDX_FILTERED),
            sampled: at(STATS_IDX_SAMPLED),
            redirected: at(STATS_IDX_REDIRECTED),
            dropped: at(STATS_IDX_DROPPED),
            tcp: at(STATS_IDX_TCP),
            udp: at(STATS_IDX_UDP),
            processing_ns: at(STATS_IDX_PROCESSING_NS),
        }
    }
}

#[derive(Debug)]
struct StatsInner {
    counters: [AtomicU64; StatCounter::COUNT],
    malformed: [AtomicU64; ParseReject::COUNT],
    min_latency_ns: AtomicU64,
    max_latency_ns: AtomicU64,
    kernel: Mutex<Option<KernelCounters>>,
}

/// 프로세스 전역 카운터 테이블 핸들
///
/// 복제 비용이 낮으며(`Arc`), 컴포넌트 그래프를 따라 명시적으로 전달됩니다.
#[derive(Debug, Clone)]
pub struct StatsTable {
    inner: Arc<StatsInner>,
}

impl Default for StatsTable {
    fn default() -> Self {
        Self::new()
    }
}

impl StatsTable {
    /// 0으로 초기화된 테이블을 생성합니다.
    pub fn new() -> Self {
        Self {
            inner: Arc::new(StatsInner {
                counters: std::array::from_fn(|_| AtomicU64::new(0)),
                malformed: std::array::from_fn(|_| AtomicU64::new(0)),
                min_latency_ns: AtomicU64::new(u64::MAX),
                max_latency_ns: AtomicU64::new(0),
                kernel: Mutex::new(None),
            }),
        }
    }

    /// 카운터를 1 증가시킵니다.
    #[inline]
    pub fn incr(&self, counter: StatCounter) {
        self.add(counter, 1);
    }

    /// 카운터에 값을 더합니다.
    #[inline]
    pub fn add(&self, counter: StatCounter, n: u64) {
        self.inner.counters[counter.index()].fetch_add(n, Ordering::Relaxed);
    }

    /// 카운터 값을 읽습니다.
    pub fn get(&self, counter: StatCounter) -> u64 {
        self.inner.counters[counter.index()].load(Ordering::Relaxed)
    }

    /// 파싱 거부를 기록합니다 (Malformed, Dropped, 사유별).
    pub fn record_malformed(&self, reason: ParseReject) {
        self.incr(StatCounter::Malformed);
        self.incr(StatCounter::Dropped);
        self.inner.malformed[reason.index()].fetch_add(1, Ordering::Relaxed);
    }

    /// 사유별 파싱 거부 수
    pub fn malformed(&self, reason: ParseReject) -> u64 {
        self.inner.malformed[reason.index()].load(Ordering::Relaxed)
    }

    /// 프레임 풀 고갈로 잃은 프레임을 기록합니다.
    pub fn record_pool_exhausted(&self, n: u64) {
        if n > 0 {
            self.add(StatCounter::PoolExhausted, n);
            self.add(StatCounter::Dropped, n);
        }
    }

    /// 링 가득참으로 잃은 레코드를 기록합니다.
    ///
    /// 해당 패킷은 이미 Redirected로 집계되어 있습니다. 링 모드에서 정지 후에는
    /// `redirected == delivered + ring_overrun`이 성립합니다.
    pub fn record_ring_overrun(&self) {
        self.incr(StatCounter::RingOverrun);
        self.incr(StatCounter::Dropped);
    }

    /// 파싱된 패킷의 프로토콜과 길이를 기록합니다.
    pub fn record_protocol(&self, protocol: u8, frame_len: u64) {
        let counter = match protocol {
            PROTO_TCP => StatCounter::Tcp,
            PROTO_UDP => StatCounter::Udp,
            PROTO_ICMP => StatCounter::Icmp,
            _ => StatCounter::Other,
        };
        self.incr(counter);
        self.add(StatCounter::TotalBytes, frame_len);
    }

    /// 수용 제어 결과를 기록합니다.
    ///
    /// 운명별 종단 카운터 하나와 그 상위 집계(Filtered, Sampled)를 증가시킵니다.
    pub fn record_admission(&self, admission: &Admission) {
        match admission.fate {
            Fate::ProtocolDisabled => self.incr(StatCounter::ProtocolDisabled),
            Fate::NotSampled => {
                self.incr(StatCounter::Filtered);
                self.incr(StatCounter::NotSampled);
            }
            Fate::SampledOnly => {
                self.incr(StatCounter::Filtered);
                self.incr(StatCounter::Sampled);
                self.incr(StatCounter::SampledOnly);
            }
            Fate::Redirected => {
                self.incr(StatCounter::Filtered);
                self.incr(StatCounter::Sampled);
                self.incr(StatCounter::Redirected);
            }
        }
        if admission.rate_limited {
            self.incr(StatCounter::MlRateLimited);
        }
    }

    /// 분석기 호출 결과를 기록합니다. `None`은 패닉.
    pub fn record_verdict(&self, verdict: Option<i32>) {
        self.incr(StatCounter::Delivered);
        match verdict {
            Some(0) => {}
            Some(_) => self.incr(StatCounter::MlPredictions),
            None => {
                self.incr(StatCounter::CallbackFailures);
                self.incr(StatCounter::MlPredictions);
            }
        }
    }

    /// 패킷 하나의 처리 시간을 기록합니다.
    pub fn record_latency(&self, elapsed: Duration) {
        let ns = u64::try_from(elapsed.as_nanos()).unwrap_or(u64::MAX);
        self.add(StatCounter::ProcessingTimeNs, ns);
        self.incr(StatCounter::TimedPackets);
        self.inner.min_latency_ns.fetch_min(ns, Ordering::Relaxed);
        self.inner.max_latency_ns.fetch_max(ns, Ordering::Relaxed);
    }

    /// 커널 카운터를 갱신합니다.
    pub fn set_kernel(&self, counters: KernelCounters) {
        *self.inner.kernel.lock().unwrap_or_else(|e| e.into_inner()) = Some(counters);
    }

    /// 시점 스냅샷을 만듭니다. 카운터 간 읽기 순서는 일관되지 않을 수 있습니다.
    pub fn snapshot(&self) -> StatsSnapshot {
        let c = |counter| self.get(counter);
        let min = self.inner.min_latency_ns.load(Ordering::Relaxed);
        let malformed_by_reason = ParseReject::ALL
            .iter()
            .map(|&r| (r.as_str(), self.malformed(r)))
            .filter(|&(_, n)| n > 0)
            .collect();

        StatsSnapshot {
            total: c(StatCounter::Total),
            filtered: c(StatCounter::Filtered),
            protocol_disabled: c(StatCounter::ProtocolDisabled),
            sampled: c(StatCounter::Sampled),
            not_sampled: c(StatCounter::NotSampled),
            redirected: c(StatCounter::Redirected),
            sampled_only: c(StatCounter::SampledOnly),
            dropped: c(StatCounter::Dropped),
            malformed: c(StatCounter::Malformed),
            pool_exhausted: c(StatCounter::PoolExhausted),
            ring_overrun: c(StatCounter::RingOverrun),
            tcp: c(StatCounter::Tcp),
            udp: c(StatCounter::Udp),
            icmp: c(StatCounter::Icmp),
            other: c(StatCounter::Other),
            total_bytes: c(StatCounter::TotalBytes),
            delivered: c(StatCounter::Delivered),
            ml_predictions: c(StatCounter::MlPredictions),
            callback_failures: c(StatCounter::CallbackFailures),
            ml_rate_limited: c(StatCounter::MlRateLimited),
            processing_time_ns: c(StatCounter::ProcessingTimeNs),
            timed_packets: c(StatCounter::TimedPackets),
            min_latency_ns: if min == u64::MAX { 0 } else { min },
            max_latency_ns: self.inner.max_latency_ns.load(Ordering::Relaxed),
            malformed_by_reason,
            kernel: *self.inner.kernel.lock().unwrap_or_else(|e| e.into_inner()),
        }
    }
}

/// 시점 통계 스냅샷
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct StatsSnapshot {
    pub total: u64,
    pub filtered: u64,
    pub protocol_disabled: u64,
    pub sampled: u64,
    pub not_sampled: u64,
    /// 분석 경로(ML) 전달 결정
    pub redirected: u64,
    pub sampled_only: u64,
    pub dropped: u64,
    pub malformed: u64,
    pub pool_exhausted: u64,
    /// 리다이렉트 후 링 가득참으로 잃은 레코드 (`redirected`에 포함)
    pub ring_overrun: u64,
    pub tcp: u64,
    pub udp: u64,
    pub icmp: u64,
    pub other: u64,
    pub total_bytes: u64,
    /// 분석기 호출 수
    pub delivered: u64,
    pub ml_predictions: u64,
    pub callback_failures: u64,
    pub ml_rate_limited: u64,
    pub processing_time_ns: u64,
    pub timed_packets: u64,
    pub min_latency_ns: u64,
    pub max_latency_ns: u64,
    /// 사유별 파싱 거부 (0 제외)
    pub malformed_by_reason: BTreeMap<&'static str, u64>,
    /// 커널 프로그램 카운터 (커널 백엔드에서만)
    pub kernel: Option<KernelCounters>,
}

impl StatsSnapshot {
    /// 패킷당 평균 처리 시간 (ns)
    #[allow(clippy::cast_precision_loss)]
    pub fn avg_latency_ns(&self) -> f64 {
        if self.timed_packets == 0 {
            return 0.0;
        }
        self.processing_time_ns as f64 / self.timed_packets as f64
    }

    /// 수신 시도 대비 폐기 비율 (0.0-1.0)
    #[allow(clippy::cast_precision_loss)]
    pub fn drop_ratio(&self) -> f64 {
        let seen = self.total + self.pool_exhausted;
        if seen == 0 {
            return 0.0;
        }
        self.dropped as f64 / seen as f64
    }
}

/// 프로세스 자원 사용량
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct ResourceUsage {
    /// 사용자 + 시스템 CPU 시간
    #[serde(skip)]
    pub cpu_time: Duration,
    /// 최대 상주 메모리 (KB)
    pub peak_memory_kb: u64,
}

impl ResourceUsage {
    /// `getrusage(RUSAGE_SELF)`로 현재 사용량을 읽습니다.
    #[cfg(unix)]
    pub fn sample() -> Self {
        // SAFETY: rusage는 POD이며 getrusage가 전부 채웁니다.
        let mut usage: libc::rusage = unsafe { std::mem::zeroed() };
        // SAFETY: 유효한 포인터를 전달합니다.
        let rc = unsafe { libc::getrusage(libc::RUSAGE_SELF, &mut usage) };
        if rc != 0 {
            return Self::default();
        }
        let tv = |t: libc::timeval| {
            Duration::from_secs(u64::try_from(t.tv_sec).unwrap_or(0))
                + Duration::from_micros(u64::try_from(t.tv_usec).unwrap_or(0))
        };
        // Linux의 ru_maxrss 단위는 KB, macOS는 바이트
        let maxrss = u64::try_from(usage.ru_maxrss).unwrap_or(0);
        let peak_memory_kb = if cfg!(target_os = "macos") {
            maxrss / 1024
        } else {
            maxrss
        };
        Self {
            cpu_time: tv(usage.ru_utime) + tv(usage.ru_stime),
            peak_memory_kb,
        }
    }

    /// 지원하지 않는 플랫폼에서는 0을 반환합니다.
    #[cfg(not(unix))]
    pub fn sample() -> Self {
        Self::default()
    }
}

/// 한 번의 보고 결과
#[derive(Debug, Clone, Default, Serialize)]
pub struct Report {
    /// 누적 스냅샷
    pub snapshot: StatsSnapshot,
    /// 보고기 생성 이후 경과 시간 (초)
    pub elapsed_secs: f64,
    /// 직전 보고 이후 초당 처리 패킷
    pub packets_per_second: f64,
    /// 전체 기간 평균 초당 처리 패킷
    pub average_pps: f64,
    /// 패킷당 평균 처리 시간 (ns)
    pub avg_latency_ns: f64,
    /// 최소 처리 시간 (ns)
    pub min_latency_ns: u64,
    /// 최대 처리 시간 (ns)
    pub max_latency_ns: u64,
    /// 직전 보고 이후 폐기 비율
    pub interval_drop_ratio: f64,
    /// 직전 보고 이후 CPU 사용률 (%)
    pub cpu_percent: f64,
    /// 최대 상주 메모리 (KB)
    pub peak_memory_kb: u64,
}

/// 주기적 보고기
///
/// `update()`를 호출할 때마다 직전 스냅샷과의 차이를 경과 시간으로 나누어 속도를 계산하고
/// 결과를 `metrics` 파사드로 내보냅니다. 자원 사용량은 여기서만 읽습니다.
#[derive(Debug)]
pub struct StatsReporter {
    started: Instant,
    last_poll: Option<Instant>,
    prev: Option<StatsSnapshot>,
    prev_usage: ResourceUsage,
}

impl Default for StatsReporter {
    fn default() -> Self {
        Self::new()
    }
}

impl StatsReporter {
    /// 새 보고기를 생성합니다.
    pub fn new() -> Self {
        Self {
            started: Instant::now(),
            last_poll: None,
            prev: None,
            prev_usage: ResourceUsage::sample(),
        }
    }

    /// 새 스냅샷으로 보고서를 만듭니다.
    pub fn update(&mut self, snapshot: StatsSnapshot) -> Report {
        let now = Instant::now();
        let usage = ResourceUsage::sample();
        let report = self.derive(snapshot, now, usage);

        self.prev = Some(report.snapshot.clone());
        self.last_poll = Some(now);
        self.prev_usage = usage;

        publish(&report);
        report
    }

    #[allow(clippy::cast_precision_loss)]
    fn derive(&self, snapshot: StatsSnapshot, now: Instant, usage: ResourceUsage) -> Report {
        let elapsed_secs = now.duration_since(self.started).as_secs_f64();
        let since_last = now
            .duration_since(self.last_poll.unwrap_or(self.started))
            .as_secs_f64();

        let prev = self.prev.clone().unwrap_or_default();
        let delta_total = snapshot.total.saturating_sub(prev.total);
        let delta_seen = delta_total + snapshot.pool_exhausted.saturating_sub(prev.pool_exhausted);
        let delta_dropped = snapshot.dropped.saturating_sub(prev.dropped);

        let (packets_per_second, average_pps, interval_drop_ratio) = (
            if since_last > 0.0 {
                delta_total as f64 / since_last
            } else {
                0.0
            },
            if elapsed_secs > 0.0 {
                snapshot.total as f64 / elapsed_secs
            } else {
                0.0
            },
            if delta_seen > 0 {
                delta_dropped as f64 / delta_seen as f64
            } else {
                0.0
            },
        );

        let cpu_delta = usage.cpu_time.saturating_sub(self.prev_usage.cpu_time);
        let cpu_percent = if since_last > 0.0 {
            cpu_delta.as_secs_f64() / since_last * 100.0
        } else {
            0.0
        };

        Report {
            elapsed_secs,
            packets_per_second,
            average_pps,
            avg_latency_ns: snapshot.avg_latency_ns(),
            min_latency_ns: snapshot.min_latency_ns,
            max_latency_ns: snapshot.max_latency_ns,
            interval_drop_ratio,
            cpu_percent,
            peak_memory_kb: usage.peak_memory_kb,
            snapshot,
        }
    }
}

/// 보고서를 Prometheus 메트릭으로 내보냅니다.
#[allow(clippy::cast_precision_loss)]
fn publish(report: &Report) {
    let s = &report.snapshot;

    metrics::counter!(m::CAPTURE_PACKETS_TOTAL).absolute(s.total);
    metrics::counter!(m::CAPTURE_FILTERED_TOTAL).absolute(s.filtered);
    metrics::counter!(m::CAPTURE_PROTOCOL_DISABLED_TOTAL).absolute(s.protocol_disabled);
    metrics::counter!(m::CAPTURE_SAMPLED_TOTAL).absolute(s.sampled);
    metrics::counter!(m::CAPTURE_REDIRECTED_TOTAL).absolute(s.redirected);
    metrics::counter!(m::CAPTURE_BYTES_TOTAL).absolute(s.total_bytes);
    metrics::counter!(m::CAPTURE_ML_PREDICTIONS_TOTAL).absolute(s.ml_predictions);
    metrics::counter!(m::CAPTURE_CALLBACK_FAILURES_TOTAL).absolute(s.callback_failures);
    metrics::counter!(m::CAPTURE_ML_RATE_LIMITED_TOTAL).absolute(s.ml_rate_limited);

    for (cause, n) in [
        ("malformed", s.malformed),
        ("pool_exhausted", s.pool_exhausted),
        ("ring_full", s.ring_overrun),
    ] {
        metrics::counter!(m::CAPTURE_DROPPED_TOTAL, m::LABEL_CAUSE => cause).absolute(n);
    }

    for (&reason, &n) in &s.malformed_by_reason {
        metrics::counter!(m::CAPTURE_MALFORMED_TOTAL, m::LABEL_REASON => reason).absolute(n);
    }

    for (proto, n) in [
        ("tcp", s.tcp),
        ("udp", s.udp),
        ("icmp", s.icmp),
        ("other", s.other),
    ] {
        metrics::counter!(m::CAPTURE_PROTOCOL_PACKETS_TOTAL, m::LABEL_PROTOCOL => proto)
            .absolute(n);
    }

    if let Some(k) = &s.kernel {
        metrics::counter!(m::KERNEL_PACKETS_TOTAL).absolute(k.total);
        metrics::counter!(m::KERNEL_REDIRECTED_TOTAL).absolute(k.redirected);
        metrics::counter!(m::KERNEL_DROPPED_TOTAL).absolute(k.dropped);
    }

    metrics::gauge!(m::CAPTURE_PACKETS_PER_SECOND).set(report.packets_per_second);
    metrics::gauge!(m::CAPTURE_AVG_PROCESSING_NS).set(report.avg_latency_ns);
    metrics::gauge!(m::CAPTURE_MAX_PROCESSING_NS).set(report.max_latency_ns as f64);
    metrics::gauge!(m::DAEMON_PEAK_MEMORY_KB).set(report.peak_memory_kb as f64);
    metrics::gauge!(m::DAEMON_CPU_PERCENT).set(report.cpu_percent);
    metrics::gauge!(m::DAEMON_UPTIME_SECONDS).set(report.elapsed_secs);
}

#[cfg(test)]
mod tests {
    use super::*;
    use ironsift_core::types::Action;

    fn admission(fate: Fate) -> Admission {
        let action = match fate {
            Fate::ProtocolDisabled | Fate::NotSampled => Action::Pass,
            Fate::SampledOnly => Action::Sample,
            Fate::Redirected => Action::Redirect,
        };
        Admission {
            action,
            fate,
            rate_limited: false,
        }
    }

    #[test]
    fn counter_indices_are_dense() {
        for (i, c) in StatCounter::ALL.iter().enumerate() {
            assert_eq!(c.index(), i);
        }
    }

    #[test]
    fn new_table_is_zeroed() {
        let s = StatsTable::new().snapshot();
        assert_eq!(s, StatsSnapshot::default());
        assert_eq!(s.avg_latency_ns(), 0.0);
        assert_eq!(s.drop_ratio(), 0.0);
    }

    #[test]
    fn admission_fates_keep_conservation() {
        let stats = StatsTable::new();
        let fates = [
            Fate::ProtocolDisabled,
            Fate::NotSampled,
            Fate::NotSampled,
            Fate::SampledOnly,
            Fate::Redirected,
            Fate::Redirected,
        ];
        for fate in fates {
            stats.incr(StatCounter::Total);
            stats.record_admission(&admission(fate));
        }
        let s = stats.snapshot();
        assert_eq!(s.total, s.filtered + s.protocol_disabled + s.malformed);
        assert_eq!(s.filtered, s.sampled + s.not_sampled);
        assert_eq!(s.sampled, s.redirected + s.sampled_only);
        assert_eq!(s.redirected, 2);
    }

    #[test]
    fn malformed_counts_dropped_and_reason() {
        let stats = StatsTable::new();
        stats.record_malformed(ParseReject::TruncatedUdp);
        stats.record_malformed(ParseReject::TruncatedUdp);
        stats.record_malformed(ParseReject::NotIpv4);
        let s = stats.snapshot();
        assert_eq!(s.malformed, 3);
        assert_eq!(s.dropped, 3);
        assert_eq!(s.malformed_by_reason.get("truncated_udp"), Some(&2));
        assert_eq!(stats.malformed(ParseReject::NotIpv4), 1);
    }

    #[test]
    fn resource_drops_feed_dropped() {
        let stats = StatsTable::new();
        stats.record_pool_exhausted(5);
        stats.record_pool_exhausted(0);
        stats.record_ring_overrun();
        let s = stats.snapshot();
        assert_eq!(s.pool_exhausted, 5);
        assert_eq!(s.ring_overrun, 1);
        assert_eq!(s.dropped, 6);
    }

    #[test]
    fn protocol_breakdown() {
        let stats = StatsTable::new();
        stats.record_protocol(PROTO_TCP, 60);
        stats.record_protocol(PROTO_UDP, 100);
        stats.record_protocol(PROTO_ICMP, 98);
        stats.record_protocol(47, 200);
        let s = stats.snapshot();
        assert_eq!((s.tcp, s.udp, s.icmp, s.other), (1, 1, 1, 1));
        assert_eq!(s.total_bytes, 458);
    }

    #[test]
    fn verdicts_and_failures() {
        let stats = StatsTable::new();
        stats.record_verdict(Some(0));
        stats.record_verdict(Some(3));
        stats.record_verdict(None);
        let s = stats.snapshot();
        assert_eq!(s.delivered, 3);
        assert_eq!(s.ml_predictions, 2);
        assert_eq!(s.callback_failures, 1);
    }

    #[test]
    fn latency_min_max_avg() {
        let stats = StatsTable::new();
        stats.record_latency(Duration::from_nanos(100));
        stats.record_latency(Duration::from_nanos(300));
        let s = stats.snapshot();
        assert_eq!(s.min_latency_ns, 100);
        assert_eq!(s.max_latency_ns, 300);
        assert_eq!(s.avg_latency_ns(), 200.0);
    }

    #[test]
    fn clones_share_counters() {
        let a = StatsTable::new();
        let b = a.clone();
        b.incr(StatCounter::Total);
        assert_eq!(a.get(StatCounter::Total), 1);
    }

    #[test]
    fn concurrent_increments_are_not_lost() {
        let stats = StatsTable::new();
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let s = stats.clone();
                std::thread::spawn(move || {
                    for _ in 0..10_000 {
                        s.incr(StatCounter::Total);
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(stats.get(StatCounter::Total), 40_000);
    }

    #[test]
    fn kernel_counters_from_raw() {
        let mut raw = [0u64; STATS_MAX_ENTRIES as usize];
        raw[STATS_IDX_TOTAL as usize] = 10;
        raw[STATS_IDX_REDIRECTED as usize] = 4;
        let k = KernelCounters::from_raw(&raw);
        assert_eq!(k.total, 10);
        assert_eq!(k.redirected, 4);

        let stats = StatsTable::new();
        stats.set_kernel(k);
        assert_eq!(stats.snapshot().kernel, Some(k));
    }

    #[test]
    fn reporter_computes_interval_drop_ratio() {
        let stats = StatsTable::new();
        let mut reporter = StatsReporter::new();

        stats.add(StatCounter::Total, 100);
        let first = reporter.update(stats.snapshot());
        assert_eq!(first.interval_drop_ratio, 0.0);

        stats.add(StatCounter::Total, 10);
        stats.record_pool_exhausted(10);
        let second = reporter.update(stats.snapshot());
        assert!((second.interval_drop_ratio - 0.5).abs() < 1e-9);
        assert!(second.elapsed_secs >= first.elapsed_secs);
    }

    #[test]
    fn report_serializes() {
        let mut reporter = StatsReporter::new();
        let report = reporter.update(StatsTable::new().snapshot());
        let json = serde_json::to_string(&report).unwrap();
        assert!(json.contains("packets_per_second"));
        assert!(json.contains("\"kernel\":null"));
    }

    #[test]
    fn resource_usage_is_readable() {
        let usage = ResourceUsage::sample();
        #[cfg(unix)]
        assert!(usage.peak_memory_kb > 0);
        let _ = usage;
    }
}
