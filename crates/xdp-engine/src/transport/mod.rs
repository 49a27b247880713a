//! 프레임 전송 계층
//!
//! 처리 루프는 [`FrameTransport`]만 알고 있으며, 프레임이 어디서 오는지는 구현체가 결정합니다.
//!
//! - [`umem::MemoryTransport`]: 프로세스 내 NIC 모델 (테스트, 리플레이)
//! - [`xsk::XskTransport`]: AF_XDP 소켓 (Linux 전용)
//! - [`ring::FeatureRing`]: 조기 필터가 특징 레코드만 내보내는 SPSC 링
//!
//! # 프레임 소유권
//! ```text
//! fill ──(수신)──▶ rx ──receive()──▶ 처리 루프 ──release()──▶ fill
//! ```
//! 프레임은 한 시점에 하나의 소유자만 가지며 `release()` 이후에는 읽을 수 없습니다.
//! 프레임 타입이 값으로 이동하므로 이 규칙은 타입 시스템이 강제합니다.

use std::future::Future;
use std::time::Duration;

use crate::error::EngineError;

pub mod ring;
pub mod umem;
#[cfg(target_os = "linux")]
pub mod xsk;

/// 큐 하나의 프레임 수신 경로
pub trait FrameTransport: Send {
    /// 수신된 프레임 핸들
    type Frame: Send;

    /// NIC 큐 ID
    fn queue_id(&self) -> u32;

    /// 수신 가능한 프레임이 생길 때까지 최대 `timeout` 대기합니다.
    ///
    /// 처리 루프가 일시 정지하는 유일한 지점입니다. 시간 초과면 `Ok(false)`.
    fn wait_rx(
        &mut self,
        timeout: Duration,
    ) -> impl Future<Output = Result<bool, EngineError>> + Send;

    /// 최대 `max`개 프레임을 `out`에 추가하고 추가한 수를 반환합니다.
    fn receive(&mut self, max: usize, out: &mut Vec<Self::Frame>) -> Result<usize, EngineError>;

    /// 프레임 바이트
    fn frame_data<'a>(&'a self, frame: &'a Self::Frame) -> &'a [u8];

    /// 수신 시각 (단조 증가 ns)
    fn frame_timestamp(&self, frame: &Self::Frame) -> u64;

    /// 프레임을 fill 큐로 돌려줍니다.
    fn release(&mut self, frame: Self::Frame);

    /// 프레임 풀 고갈로 수신하지 못한 누적 프레임 수
    fn rx_dropped(&self) -> u64;
}

/// 단조 증가 시계 (ns)
///
/// 커널 XDP 프로그램의 `bpf_ktime_get_ns()`와 같은 시계(`CLOCK_MONOTONIC`)입니다.
#[cfg(unix)]
pub fn monotonic_ns() -> u64 {
    // SAFETY: timespec은 POD이며 clock_gettime이 채웁니다.
    let mut ts: libc::timespec = unsafe { std::mem::zeroed() };
    // SAFETY: 유효한 포인터와 지원되는 클럭 ID를 전달합니다.
    unsafe { libc::clock_gettime(libc::CLOCK_MONOTONIC, &mut ts) };
    let secs = u64::try_from(ts.tv_sec).unwrap_or(0);
    let nanos = u64::try_from(ts.tv_nsec).unwrap_or(0);
    secs.saturating_mul(1_000_000_000).saturating_add(nanos)
}

/// 단조 증가 시계 (ns, 프로세스 시작 기준)
#[cfg(not(unix))]
pub fn monotonic_ns() -> u64 {
    use std::sync::OnceLock;
    use std::time::Instant;

    static EPOCH: OnceLock<Instant> = OnceLock::new();
    let epoch = EPOCH.get_or_init(Instant::now);
    u64::try_from(epoch.elapsed().as_nanos()).unwrap_or(u64::MAX)
}
