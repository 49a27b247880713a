//! XDP 커널/유저스페이스 공유 계약
//!
//! 이 크레이트는 `#![no_std]` 환경에서 사용 가능한 공통 타입과 순수 함수를 정의합니다.
//! 커널 XDP 프로그램과 유저스페이스 소비자가 **같은 코드**로 패킷을 파싱하고
//! 같은 규칙으로 분류/샘플링하도록 보장합니다.
//!
//! # 구성
//! - [`parser`]: 경계 검사 커서 기반 Ethernet/IPv4/TCP/UDP 헤더 파서
//! - [`policy`]: 플로우 해시, 트래픽 분류, 방향 추정, 샘플링, ML 레이트 윈도우
//! - [`wire`]: 링 버퍼로 전달되는 고정 크기 특징 레코드 레이아웃
//!
//! # 맵 타입 선택 근거
//! - **Array** (`CONFIG`): 단일 엔트리 설정. 유저스페이스가 시작 시 한 번 기록
//! - **PerCpuArray** (`STATS`, `SAMPLER`): CPU별 독립 카운터와 샘플링 상태, 락 프리
//! - **RingBuf** (`FEATURES`): 특징 레코드 전달 (링 버퍼 모드)
//! - **XskMap** (`XSKS`): 큐 인덱스 → AF_XDP 소켓 (제로 카피 모드)

#![cfg_attr(not(test), no_std)]

pub mod parser;
pub mod policy;
pub mod wire;

pub use parser::{PacketBytes, PacketHeaders, ParseReject, parse_packet};
pub use policy::{
    MlRateWindow, classify, direction, flow_hash, protocol_enabled, sample_hit, selected_action,
};
pub use wire::{FEATURE_WIRE_SIZE, FeatureWire};

// =============================================================================
// 맵 이름 상수
// =============================================================================

/// 설정 Array 맵 이름
pub const MAP_CONFIG: &str = "CONFIG";
/// 통계 PerCpuArray 맵 이름
pub const MAP_STATS: &str = "STATS";
/// 샘플링 카운터/ML 레이트 윈도우 PerCpuArray 맵 이름
pub const MAP_SAMPLER: &str = "SAMPLER";
/// 특징 레코드 RingBuf 맵 이름
pub const MAP_FEATURES: &str = "FEATURES";
/// AF_XDP 소켓 XskMap 맵 이름
pub const MAP_XSKS: &str = "XSKS";

/// 링 버퍼 모드 XDP 프로그램 이름
pub const PROG_RING: &str = "ironsift_ring";
/// 제로 카피(리다이렉트) 모드 XDP 프로그램 이름
pub const PROG_REDIRECT: &str = "ironsift_redirect";

/// XskMap 최대 큐 수
pub const XSKS_MAX_ENTRIES: u32 = 64;
/// 특징 RingBuf 기본 크기 (바이트)
pub const FEATURES_RING_BYTES: u32 = 256 * 1024;

// =============================================================================
// 프로토콜 상수
// =============================================================================

/// IPv4 EtherType
pub const ETH_P_IPV4: u16 = 0x0800;
/// ICMP 프로토콜 번호
pub const PROTO_ICMP: u8 = 1;
/// TCP 프로토콜 번호
pub const PROTO_TCP: u8 = 6;
/// UDP 프로토콜 번호
pub const PROTO_UDP: u8 = 17;

/// 프로토콜 활성화 마스크: TCP
pub const PROTO_MASK_TCP: u8 = 0x01;
/// 프로토콜 활성화 마스크: UDP
pub const PROTO_MASK_UDP: u8 = 0x02;
/// 프로토콜 활성화 마스크: ICMP
pub const PROTO_MASK_ICMP: u8 = 0x04;
/// 프로토콜 활성화 마스크: TCP/UDP/ICMP 외 프로토콜
pub const PROTO_MASK_OTHER: u8 = 0x08;

// =============================================================================
// 분류 / 방향 / 액션 코드
// =============================================================================

/// 일반 트래픽
pub const CLASS_NORMAL: u8 = 0;
/// 의심 트래픽 (고포트 쌍, TCP/UDP 외 프로토콜)
pub const CLASS_SUSPICIOUS: u8 = 1;
/// 우선 트래픽 (SSH, DNS, HTTP, HTTPS)
pub const CLASS_PRIORITY: u8 = 2;

/// 인바운드
pub const DIR_INBOUND: u8 = 0;
/// 아웃바운드
pub const DIR_OUTBOUND: u8 = 1;

/// 관찰만 하고 분석 경로로 보내지 않음
pub const ACTION_PASS: u8 = 0;
/// 샘플로 기록 (일반 분류)
pub const ACTION_SAMPLE: u8 = 1;
/// 분석 경로로 리다이렉트
pub const ACTION_REDIRECT: u8 = 2;
/// 파싱 실패 또는 자원 고갈로 폐기 (패킷 자체는 커널 스택으로 통과)
pub const ACTION_DROP: u8 = 3;

/// 플로우 추적 정보가 없을 때의 도착 간격 값
pub const INTER_ARRIVAL_UNKNOWN: u32 = u32::MAX;

/// 와이어 플래그: 엔트로피가 계산되지 않음 (커널 링 경로)
pub const WIRE_FLAG_ENTROPY_UNKNOWN: u8 = 0x01;

// =============================================================================
// Stats 맵 인덱스 (PerCpuArray)
// =============================================================================

/// 관찰한 전체 패킷 수
pub const STATS_IDX_TOTAL: u32 = 0;
/// 프로토콜 필터를 통과한 패킷 수
pub const STATS_IDX_FILTERED: u32 = 1;
/// 샘플링에 선택된 패킷 수
pub const STATS_IDX_SAMPLED: u32 = 2;
/// 분석 경로로 리다이렉트된 패킷 수
pub const STATS_IDX_REDIRECTED: u32 = 3;
/// 파싱 실패/링 가득참으로 폐기된 수
pub const STATS_IDX_DROPPED: u32 = 4;
/// TCP 패킷 수
pub const STATS_IDX_TCP: u32 = 5;
/// UDP 패킷 수
pub const STATS_IDX_UDP: u32 = 6;
/// 처리 시간 합계 (ns)
pub const STATS_IDX_PROCESSING_NS: u32 = 7;
/// PerCpuArray 최대 엔트리 수
pub const STATS_MAX_ENTRIES: u32 = 8;

// =============================================================================
// 공유 데이터 구조
// =============================================================================

/// 커널 프로그램 설정
///
/// `Array<XdpConfigValue>` 맵의 0번 엔트리에 저장됩니다.
/// 커널은 읽기만 하며, 갱신은 엔진 재시작으로만 이루어집니다.
///
/// # 메모리 레이아웃 (12 바이트, 4바이트 정렬)
/// ```text
/// offset  field          size
/// 0       sampling_rate  4
/// 4       max_ml_rate    4
/// 8       protocol_mask  1
/// 9       _pad           3
/// ```
#[repr(C)]
#[derive(Clone, Copy)]
#[cfg_attr(feature = "user", derive(Debug, PartialEq, Eq))]
pub struct XdpConfigValue {
    /// N개 중 1개 샘플링 (0은 1로 취급)
    pub sampling_rate: u32,
    /// 초당 리다이렉트 상한 (0이면 무제한)
    pub max_ml_rate: u32,
    /// 활성화된 프로토콜 비트 마스크 (`PROTO_MASK_*`)
    pub protocol_mask: u8,
    /// 4바이트 정렬을 위한 패딩
    pub _pad: [u8; 3],
}

// SAFETY: XdpConfigValue는 #[repr(C)]이며 모든 필드가 Plain Old Data입니다.
// 패딩은 명시적으로 정의되어 있습니다.
#[cfg(feature = "user")]
unsafe impl aya::Pod for XdpConfigValue {}

impl XdpConfigValue {
    /// 커널 프로그램이 맵을 읽지 못했을 때 사용하는 기본값입니다.
    pub const fn fallback() -> Self {
        Self {
            sampling_rate: 100,
            max_ml_rate: 0,
            protocol_mask: PROTO_MASK_TCP | PROTO_MASK_UDP,
            _pad: [0; 3],
        }
    }
}

/// CPU별 샘플링 상태
///
/// `PerCpuArray<SamplerState>`의 0번 엔트리입니다.
/// 커널의 샘플링 카운터와 ML 레이트 윈도우를 CPU마다 독립적으로 유지합니다.
#[repr(C)]
#[derive(Clone, Copy)]
#[cfg_attr(feature = "user", derive(Debug))]
pub struct SamplerState {
    /// 샘플링 대상 패킷 카운터
    pub counter: u64,
    /// ML 레이트 윈도우
    pub window: MlRateWindow,
}

// SAFETY: SamplerState는 #[repr(C)]이며 모든 필드가 Plain Old Data입니다.
#[cfg(feature = "user")]
unsafe impl aya::Pod for SamplerState {}

impl SamplerState {
    /// 제로 초기화된 상태를 생성합니다.
    pub const fn zeroed() -> Self {
        Self {
            counter: 0,
            window: MlRateWindow::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_value_layout_is_twelve_bytes() {
        assert_eq!(core::mem::size_of::<XdpConfigValue>(), 12);
        assert_eq!(core::mem::offset_of!(XdpConfigValue, protocol_mask), 8);
    }

    #[test]
    fn fallback_config_enables_tcp_and_udp() {
        let cfg = XdpConfigValue::fallback();
        assert_eq!(cfg.sampling_rate, 100);
        assert!(protocol_enabled(cfg.protocol_mask, PROTO_TCP));
        assert!(protocol_enabled(cfg.protocol_mask, PROTO_UDP));
        assert!(!protocol_enabled(cfg.protocol_mask, PROTO_ICMP));
    }

    #[test]
    fn sampler_state_layout() {
        assert_eq!(core::mem::size_of::<SamplerState>(), 24);
        let s = SamplerState::zeroed();
        assert_eq!(s.counter, 0);
    }
}
