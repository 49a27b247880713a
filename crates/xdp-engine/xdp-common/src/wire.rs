//! 특징 레코드 와이어 포맷
//!
//! 커널 RingBuf와 유저스페이스 [`FeatureWire`] 링 버퍼가 공유하는 고정 크기 레이아웃입니다.
//! 필드 순서와 폭은 고정이며, 암묵적 패딩 없이 모든 바이트가 필드 또는 `_pad`에 속합니다.
//! 멀티바이트 필드는 호스트 바이트 오더로 저장됩니다 (생산자와 소비자가 같은 호스트).

use crate::WIRE_FLAG_ENTROPY_UNKNOWN;
use crate::parser::PacketHeaders;
use crate::policy::{classify, direction, flow_hash};

/// 와이어 레코드 크기 (바이트)
pub const FEATURE_WIRE_SIZE: usize = 48;

/// 링 버퍼로 전달되는 특징 레코드
///
/// # 메모리 레이아웃 (48 바이트, 8바이트 정렬)
/// ```text
/// offset  field             size
/// 0       flow_hash         8
/// 8       timestamp_ns      8
/// 16      src_ip            4
/// 20      dst_ip            4
/// 24      inter_arrival_us  4   (u32::MAX = 알 수 없음)
/// 28      src_port          2
/// 30      dst_port          2
/// 32      pkt_len           2
/// 34      payload_len       2
/// 36      window_size       2
/// 38      protocol          1
/// 39      tcp_flags         1
/// 40      ttl               1
/// 41      entropy           1   (flags에 WIRE_FLAG_ENTROPY_UNKNOWN이면 무의미)
/// 42      traffic_class     1
/// 43      direction         1
/// 44      action            1
/// 45      flags             1   (`WIRE_FLAG_*`)
/// 46      _pad              2
/// ```
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FeatureWire {
    /// 5-튜플 플로우 해시
    pub flow_hash: u64,
    /// 캡처 시각 (단조 증가 ns)
    pub timestamp_ns: u64,
    /// 출발지 IPv4 주소 (호스트 정수)
    pub src_ip: u32,
    /// 목적지 IPv4 주소 (호스트 정수)
    pub dst_ip: u32,
    /// 같은 플로우 직전 패킷과의 간격 (µs)
    pub inter_arrival_us: u32,
    /// 출발지 포트
    pub src_port: u16,
    /// 목적지 포트
    pub dst_port: u16,
    /// 프레임 길이 (u16 포화)
    pub pkt_len: u16,
    /// 페이로드 길이 (u16 포화)
    pub payload_len: u16,
    /// TCP 윈도우
    pub window_size: u16,
    /// IP 프로토콜 번호
    pub protocol: u8,
    /// TCP 플래그
    pub tcp_flags: u8,
    /// TTL
    pub ttl: u8,
    /// 페이로드 엔트로피 (0-255)
    pub entropy: u8,
    /// `CLASS_*`
    pub traffic_class: u8,
    /// `DIR_*`
    pub direction: u8,
    /// `ACTION_*`
    pub action: u8,
    /// `WIRE_FLAG_*` 비트
    pub flags: u8,
    /// 8바이트 정렬을 위한 패딩
    pub _pad: [u8; 2],
}

const _: () = {
    assert!(core::mem::size_of::<FeatureWire>() == FEATURE_WIRE_SIZE);
    assert!(core::mem::align_of::<FeatureWire>() == 8);
    assert!(core::mem::offset_of!(FeatureWire, timestamp_ns) == 8);
    assert!(core::mem::offset_of!(FeatureWire, src_ip) == 16);
    assert!(core::mem::offset_of!(FeatureWire, inter_arrival_us) == 24);
    assert!(core::mem::offset_of!(FeatureWire, src_port) == 28);
    assert!(core::mem::offset_of!(FeatureWire, window_size) == 36);
    assert!(core::mem::offset_of!(FeatureWire, protocol) == 38);
    assert!(core::mem::offset_of!(FeatureWire, action) == 44);
    assert!(core::mem::offset_of!(FeatureWire, flags) == 45);
};

// SAFETY: FeatureWire는 #[repr(C)]이며 모든 필드가 Plain Old Data입니다.
// 패딩은 명시적으로 정의되어 있고 크기는 컴파일 타임에 검증됩니다.
#[cfg(feature = "user")]
unsafe impl aya::Pod for FeatureWire {}

#[inline(always)]
fn sat_u16(v: usize) -> u16 {
    if v > u16::MAX as usize {
        u16::MAX
    } else {
        v as u16
    }
}

impl FeatureWire {
    /// 제로 초기화된 레코드를 생성합니다.
    pub const fn zeroed() -> Self {
        Self {
            flow_hash: 0,
            timestamp_ns: 0,
            src_ip: 0,
            dst_ip: 0,
            inter_arrival_us: 0,
            src_port: 0,
            dst_port: 0,
            pkt_len: 0,
            payload_len: 0,
            window_size: 0,
            protocol: 0,
            tcp_flags: 0,
            ttl: 0,
            entropy: 0,
            traffic_class: 0,
            direction: 0,
            action: 0,
            flags: 0,
            _pad: [0; 2],
        }
    }

    /// 파싱된 헤더에서 기본 분류 규칙으로 레코드를 만듭니다.
    ///
    /// 엔트로피와 도착 간격은 호출자가 계산해 전달합니다
    /// (커널은 각각 `None`, `INTER_ARRIVAL_UNKNOWN`).
    #[inline(always)]
    pub fn from_headers(
        h: &PacketHeaders,
        timestamp_ns: u64,
        entropy: Option<u8>,
        inter_arrival_us: u32,
        action: u8,
    ) -> Self {
        Self {
            flow_hash: flow_hash(h.src_ip, h.dst_ip, h.src_port, h.dst_port, h.protocol),
            timestamp_ns,
            src_ip: h.src_ip,
            dst_ip: h.dst_ip,
            inter_arrival_us,
            src_port: h.src_port,
            dst_port: h.dst_port,
            pkt_len: sat_u16(h.frame_len),
            payload_len: sat_u16(h.payload_len()),
            window_size: h.window_size,
            protocol: h.protocol,
            tcp_flags: h.tcp_flags,
            ttl: h.ttl,
            entropy: match entropy {
                Some(e) => e,
                None => 0,
            },
            traffic_class: classify(h.src_port, h.dst_port, h.protocol),
            direction: direction(h.src_port, h.dst_port),
            action,
            flags: match entropy {
                Some(_) => 0,
                None => WIRE_FLAG_ENTROPY_UNKNOWN,
            },
            _pad: [0; 2],
        }
    }

    /// 엔트로피 (계산되지 않았으면 `None`)
    #[inline(always)]
    pub fn entropy(&self) -> Option<u8> {
        if self.flags & WIRE_FLAG_ENTROPY_UNKNOWN != 0 {
            None
        } else {
            Some(self.entropy)
        }
    }

    /// 고정 오프셋으로 직렬화합니다.
    pub fn to_bytes(&self) -> [u8; FEATURE_WIRE_SIZE] {
        let mut b = [0u8; FEATURE_WIRE_SIZE];
        b[0..8].copy_from_slice(&self.flow_hash.to_ne_bytes());
        b[8..16].copy_from_slice(&self.timestamp_ns.to_ne_bytes());
        b[16..20].copy_from_slice(&self.src_ip.to_ne_bytes());
        b[20..24].copy_from_slice(&self.dst_ip.to_ne_bytes());
        b[24..28].copy_from_slice(&self.inter_arrival_us.to_ne_bytes());
        b[28..30].copy_from_slice(&self.src_port.to_ne_bytes());
        b[30..32].copy_from_slice(&self.dst_port.to_ne_bytes());
        b[32..34].copy_from_slice(&self.pkt_len.to_ne_bytes());
        b[34..36].copy_from_slice(&self.payload_len.to_ne_bytes());
        b[36..38].copy_from_slice(&self.window_size.to_ne_bytes());
        b[38] = self.protocol;
        b[39] = self.tcp_flags;
        b[40] = self.ttl;
        b[41] = self.entropy;
        b[42] = self.traffic_class;
        b[43] = self.direction;
        b[44] = self.action;
        b[45] = self.flags;
        b
    }

    /// 고정 오프셋으로 역직렬화합니다. 길이가 모자라면 `None`.
    pub fn from_bytes(b: &[u8]) -> Option<Self> {
        if b.len() < FEATURE_WIRE_SIZE {
            return None;
        }
        let u64_at = |o: usize| {
            let mut a = [0u8; 8];
            a.copy_from_slice(&b[o..o + 8]);
            u64::from_ne_bytes(a)
        };
        let u32_at = |o: usize| {
            let mut a = [0u8; 4];
            a.copy_from_slice(&b[o..o + 4]);
            u32::from_ne_bytes(a)
        };
        let u16_at = |o: usize| u16::from_ne_bytes([b[o], b[o + 1]]);
        Some(Self {
            flow_hash: u64_at(0),
            timestamp_ns: u64_at(8),
            src_ip: u32_at(16),
            dst_ip: u32_at(20),
            inter_arrival_us: u32_at(24),
            src_port: u16_at(28),
            dst_port: u16_at(30),
            pkt_len: u16_at(32),
            payload_len: u16_at(34),
            window_size: u16_at(36),
            protocol: b[38],
            tcp_flags: b[39],
            ttl: b[40],
            entropy: b[41],
            traffic_class: b[42],
            direction: b[43],
            action: b[44],
            flags: b[45],
            _pad: [0; 2],
        })
    }
}
