#![no_std]
#![no_main]

//! Ironsift XDP 프로그램
//!
//! 두 프로그램 모두 유저스페이스와 같은 `ironsift-xdp-common` 파서/정책을 사용합니다.
//!
//! - `ironsift_ring`: 조기 필터. 리다이렉트 대상 패킷의 특징 레코드를 `FEATURES`
//!   RingBuf에 넣고 패킷 자체는 항상 통과시킵니다.
//! - `ironsift_redirect`: 리다이렉트 대상 패킷을 수신 큐의 AF_XDP 소켓(`XSKS`)으로 보냅니다.
//!
//! 파싱 실패와 비활성 프로토콜은 손대지 않고 `XDP_PASS`로 돌려보냅니다.

use aya_ebpf::bindings::xdp_action;
use aya_ebpf::helpers::bpf_ktime_get_ns;
use aya_ebpf::macros::{map, xdp};
use aya_ebpf::maps::{Array, PerCpuArray, RingBuf, XskMap};
use aya_ebpf::programs::XdpContext;
use aya_log_ebpf::debug;
use ironsift_xdp_common::{
    ACTION_PASS, ACTION_REDIRECT, ACTION_SAMPLE, FEATURES_RING_BYTES, FeatureWire,
    INTER_ARRIVAL_UNKNOWN, PROTO_TCP, PROTO_UDP, PacketBytes, PacketHeaders, STATS_IDX_DROPPED,
    STATS_IDX_FILTERED, STATS_IDX_PROCESSING_NS, STATS_IDX_REDIRECTED, STATS_IDX_SAMPLED,
    STATS_IDX_TCP, STATS_IDX_TOTAL, STATS_IDX_UDP, STATS_MAX_ENTRIES, SamplerState,
    XSKS_MAX_ENTRIES, XdpConfigValue, classify, parse_packet, protocol_enabled, sample_hit,
    selected_action,
};

// =============================================================================
// 맵
// =============================================================================

#[map]
static CONFIG: Array<XdpConfigValue> = Array::with_max_entries(1, 0);

#[map]
static STATS: PerCpuArray<u64> = PerCpuArray::with_max_entries(STATS_MAX_ENTRIES, 0);

#[map]
static SAMPLER: PerCpuArray<SamplerState> = PerCpuArray::with_max_entries(1, 0);

#[map]
static FEATURES: RingBuf = RingBuf::with_byte_size(FEATURES_RING_BYTES, 0);

#[map]
static XSKS: XskMap = XskMap::with_max_entries(XSKS_MAX_ENTRIES, 0);

// =============================================================================
// 프로그램
// =============================================================================

/// 링 버퍼 모드 조기 필터
#[xdp]
pub fn ironsift_ring(ctx: XdpContext) -> u32 {
    let started = now_ns();
    if let Some((headers, action)) = admit(&ctx, started) {
        if action == ACTION_REDIRECT {
            emit(&ctx, &headers, started, action);
        }
    }
    stat_add(STATS_IDX_PROCESSING_NS, now_ns().wrapping_sub(started));
    xdp_action::XDP_PASS
}

/// 제로 카피 모드: 리다이렉트 대상만 AF_XDP 소켓으로
#[xdp]
pub fn ironsift_redirect(ctx: XdpContext) -> u32 {
    let started = now_ns();
    let verdict = match admit(&ctx, started) {
        Some((_, ACTION_REDIRECT)) => {
            // SAFETY: ctx.ctx는 커널이 넘겨준 유효한 xdp_md 포인터입니다.
            let queue = unsafe { (*ctx.ctx).rx_queue_index };
            match XSKS.redirect(queue, 0) {
                Ok(action) => action,
                Err(_) => {
                    debug!(&ctx, "no AF_XDP socket on queue {}", queue);
                    stat_add(STATS_IDX_DROPPED, 1);
                    xdp_action::XDP_PASS
                }
            }
        }
        _ => xdp_action::XDP_PASS,
    };
    stat_add(STATS_IDX_PROCESSING_NS, now_ns().wrapping_sub(started));
    verdict
}

// =============================================================================
// 공통 경로
// =============================================================================

/// 파싱 → 프로토콜 필터 → 샘플링 → 분류/상한. 액션을 반환합니다.
///
/// 파싱 실패와 비활성 프로토콜은 `None`, 비샘플 패킷은 `ACTION_PASS`.
#[inline(always)]
fn admit(ctx: &XdpContext, now: u64) -> Option<(PacketHeaders, u8)> {
    stat_add(STATS_IDX_TOTAL, 1);

    let headers = match parse_packet(&Frame(ctx)) {
        Ok(h) => h,
        Err(_) => {
            stat_add(STATS_IDX_DROPPED, 1);
            return None;
        }
    };
    match headers.protocol {
        PROTO_TCP => stat_add(STATS_IDX_TCP, 1),
        PROTO_UDP => stat_add(STATS_IDX_UDP, 1),
        _ => {}
    }

    let config = CONFIG
        .get(0)
        .copied()
        .unwrap_or(XdpConfigValue::fallback());
    if !protocol_enabled(config.protocol_mask, headers.protocol) {
        return None;
    }
    stat_add(STATS_IDX_FILTERED, 1);

    let state = SAMPLER.get_ptr_mut(0)?;
    // SAFETY: PerCpuArray 엔트리는 현재 CPU 전용이며 프로그램 실행 중 선점되지 않습니다.
    let state = unsafe { &mut *state };
    state.counter = state.counter.wrapping_add(1);
    if !sample_hit(state.counter, config.sampling_rate) {
        return Some((headers, ACTION_PASS));
    }
    stat_add(STATS_IDX_SAMPLED, 1);

    let mut action = selected_action(classify(
        headers.src_port,
        headers.dst_port,
        headers.protocol,
    ));
    if action == ACTION_REDIRECT && !state.window.try_acquire(now, config.max_ml_rate) {
        action = ACTION_SAMPLE;
    }
    if action == ACTION_REDIRECT {
        stat_add(STATS_IDX_REDIRECTED, 1);
    }
    Some((headers, action))
}

/// 특징 레코드를 RingBuf에 씁니다. 가득 차면 폐기 카운터만 올립니다.
#[inline(always)]
fn emit(ctx: &XdpContext, headers: &PacketHeaders, now: u64, action: u8) {
    match FEATURES.reserve::<FeatureWire>(0) {
        Some(mut entry) => {
            entry.write(FeatureWire::from_headers(
                headers,
                now,
                None,
                INTER_ARRIVAL_UNKNOWN,
                action,
            ));
            entry.submit(0);
        }
        None => {
            debug!(ctx, "feature ring full");
            stat_add(STATS_IDX_DROPPED, 1);
        }
    }
}

#[inline(always)]
fn stat_add(index: u32, n: u64) {
    if let Some(slot) = STATS.get_ptr_mut(index) {
        // SAFETY: CPU별 슬롯이므로 동시 쓰기가 없습니다.
        unsafe { *slot = (*slot).wrapping_add(n) };
    }
}

#[inline(always)]
fn now_ns() -> u64 {
    // SAFETY: 인자 없는 BPF 헬퍼입니다.
    unsafe { bpf_ktime_get_ns() }
}

/// 검증기가 이해하는 경계 검사로 패킷 데이터를 읽는 래퍼
struct Frame<'a>(&'a XdpContext);

impl PacketBytes for Frame<'_> {
    #[inline(always)]
    fn byte_len(&self) -> usize {
        self.0.data_end() - self.0.data()
    }

    #[inline(always)]
    fn read<const N: usize>(&self, offset: usize) -> Option<[u8; N]> {
        let start = self.0.data().checked_add(offset)?;
        if start + N > self.0.data_end() {
            return None;
        }
        // SAFETY: [start, start + N)이 패킷 범위 안임을 위에서 확인했습니다.
        Some(unsafe { core::ptr::read_unaligned(start as *const [u8; N]) })
    }
}

#[cfg(not(test))]
#[panic_handler]
fn panic(_info: &core::panic::PanicInfo) -> ! {
    loop {}
}
