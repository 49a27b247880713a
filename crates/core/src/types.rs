//! 도메인 타입 — 특징 레코드와 분류/방향/액션

use std::fmt;
use std::net::Ipv4Addr;

use serde::{Deserialize, Serialize};

/// 트래픽 분류
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
#[repr(u8)]
pub enum TrafficClass {
    /// 일반
    Normal = 0,
    /// 의심 (고포트 쌍 또는 TCP/UDP 외 프로토콜)
    Suspicious = 1,
    /// 우선 (SSH, DNS, HTTP, HTTPS)
    Priority = 2,
}

impl TrafficClass {
    /// 와이어 코드
    pub fn code(self) -> u8 {
        self as u8
    }

    /// 와이어 코드에서 변환합니다. 알 수 없는 코드는 `None`.
    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            0 => Some(Self::Normal),
            1 => Some(Self::Suspicious),
            2 => Some(Self::Priority),
            _ => None,
        }
    }

    /// 분석 경로로 보내야 하는 분류인지 여부
    pub fn wants_redirect(self) -> bool {
        matches!(self, Self::Suspicious | Self::Priority)
    }
}

impl fmt::Display for TrafficClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Normal => write!(f, "normal"),
            Self::Suspicious => write!(f, "suspicious"),
            Self::Priority => write!(f, "priority"),
        }
    }
}

/// 패킷 방향
///
/// `src_port > dst_port`이면 Outbound로 보는 단순 포트 비교 휴리스틱이며,
/// 라우팅 정보에 기반한 판단이 아닙니다.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
#[repr(u8)]
pub enum Direction {
    /// 인바운드
    Inbound = 0,
    /// 아웃바운드
    Outbound = 1,
}

impl Direction {
    /// 와이어 코드
    pub fn code(self) -> u8 {
        self as u8
    }

    /// 와이어 코드에서 변환합니다.
    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            0 => Some(Self::Inbound),
            1 => Some(Self::Outbound),
            _ => None,
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Inbound => write!(f, "inbound"),
            Self::Outbound => write!(f, "outbound"),
        }
    }
}

/// 수용 제어 결과
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
#[repr(u8)]
pub enum Action {
    /// 관찰만 하고 분석하지 않음
    Pass = 0,
    /// 샘플로 기록
    Sample = 1,
    /// 분석 경로로 전달
    Redirect = 2,
    /// 폐기 (파싱 실패, 자원 고갈)
    Drop = 3,
}

impl Action {
    /// 와이어 코드
    pub fn code(self) -> u8 {
        self as u8
    }

    /// 와이어 코드에서 변환합니다.
    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            0 => Some(Self::Pass),
            1 => Some(Self::Sample),
            2 => Some(Self::Redirect),
            3 => Some(Self::Drop),
            _ => None,
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pass => write!(f, "pass"),
            Self::Sample => write!(f, "sample"),
            Self::Redirect => write!(f, "redirect"),
            Self::Drop => write!(f, "drop"),
        }
    }
}

/// 패킷 하나에서 추출한 특징 레코드
///
/// 모든 헤더 경계 검사를 통과한 뒤에만 생성됩니다. 각 필드는 파싱된 값이거나
/// 파싱된 값의 순수 함수입니다.
///
/// IPv4 주소는 네트워크 바이트 오더로 읽은 값을 정수로 보관합니다
/// (`10.0.0.1` → `0x0A00_0001`). [`src_addr`](Self::src_addr)로 주소 타입을 얻을 수 있습니다.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeatureRecord {
    /// 출발지 IPv4 주소
    pub src_ip: u32,
    /// 목적지 IPv4 주소
    pub dst_ip: u32,
    /// 출발지 포트 (TCP/UDP 외에는 0)
    pub src_port: u16,
    /// 목적지 포트 (TCP/UDP 외에는 0)
    pub dst_port: u16,
    /// IANA 프로토콜 번호
    pub protocol: u8,
    /// 프레임 길이
    pub pkt_len: u16,
    /// 페이로드 길이
    pub payload_len: u16,
    /// TCP 플래그 (TCP에서만 유효)
    pub tcp_flags: u8,
    /// TCP 윈도우 크기 (TCP에서만 유효)
    pub window_size: u16,
    /// TTL
    pub ttl: u8,
    /// 캡처 시각 (단조 증가 ns)
    pub timestamp_ns: u64,
    /// 5-튜플 플로우 해시
    pub flow_hash: u64,
    /// 페이로드 엔트로피 (0-255). 커널 링 경로처럼 계산하지 않았으면 `None`.
    pub packet_entropy: Option<u8>,
    /// 트래픽 분류
    pub traffic_class: TrafficClass,
    /// 방향
    pub direction: Direction,
    /// 같은 플로우 직전 패킷과의 간격 (µs). 첫 패킷이거나 추적 비활성이면 `None`.
    pub inter_arrival_us: Option<u32>,
}

impl FeatureRecord {
    /// TCP 프로토콜 번호
    pub const PROTO_TCP: u8 = 6;
    /// UDP 프로토콜 번호
    pub const PROTO_UDP: u8 = 17;
    /// ICMP 프로토콜 번호
    pub const PROTO_ICMP: u8 = 1;

    /// 출발지 주소
    pub fn src_addr(&self) -> Ipv4Addr {
        Ipv4Addr::from(self.src_ip)
    }

    /// 목적지 주소
    pub fn dst_addr(&self) -> Ipv4Addr {
        Ipv4Addr::from(self.dst_ip)
    }

    /// TCP 여부
    pub fn is_tcp(&self) -> bool {
        self.protocol == Self::PROTO_TCP
    }

    /// TCP 플래그 (TCP가 아니면 `None`)
    pub fn tcp_flags(&self) -> Option<u8> {
        self.is_tcp().then_some(self.tcp_flags)
    }
}

/// 계산되지 않은 엔트로피는 `-`로 표시합니다.
struct Entropy(Option<u8>);

impl fmt::Display for Entropy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0 {
            Some(e) => write!(f, "{e}"),
            None => f.write_str("-"),
        }
    }
}

impl fmt::Display for FeatureRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{} -> {}:{} proto={} len={} entropy={} class={} dir={}",
            self.src_addr(),
            self.src_port,
            self.dst_addr(),
            self.dst_port,
            self.protocol,
            self.pkt_len,
            Entropy(self.packet_entropy),
            self.traffic_class,
            self.direction,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> FeatureRecord {
        FeatureRecord {
            src_ip: 0x0A00_0001,
            dst_ip: 0xC0A8_0102,
            src_port: 5000,
            dst_port: 53,
            protocol: FeatureRecord::PROTO_UDP,
            pkt_len: 100,
            payload_len: 58,
            tcp_flags: 0x12,
            window_size: 0,
            ttl: 64,
            timestamp_ns: 1,
            flow_hash: 42,
            packet_entropy: Some(0),
            traffic_class: TrafficClass::Priority,
            direction: Direction::Outbound,
            inter_arrival_us: None,
        }
    }

    #[test]
    fn ip_accessors_use_network_order() {
        let r = sample();
        assert_eq!(r.src_addr(), Ipv4Addr::new(10, 0, 0, 1));
        assert_eq!(r.dst_addr(), Ipv4Addr::new(192, 168, 1, 2));
    }

    #[test]
    fn tcp_flags_only_for_tcp() {
        let mut r = sample();
        assert_eq!(r.tcp_flags(), None);
        r.protocol = FeatureRecord::PROTO_TCP;
        assert_eq!(r.tcp_flags(), Some(0x12));
    }

    #[test]
    fn codes_convert_both_ways() {
        for c in [TrafficClass::Normal, TrafficClass::Suspicious, TrafficClass::Priority] {
            assert_eq!(TrafficClass::from_code(c.code()), Some(c));
        }
        for a in [Action::Pass, Action::Sample, Action::Redirect, Action::Drop] {
            assert_eq!(Action::from_code(a.code()), Some(a));
        }
        assert_eq!(Direction::from_code(1), Some(Direction::Outbound));
        assert_eq!(TrafficClass::from_code(9), None);
    }

    #[test]
    fn display_is_human_readable() {
        let s = sample().to_string();
        assert!(s.contains("10.0.0.1:5000"));
        assert!(s.contains("class=priority"));
        assert!(s.contains("dir=outbound"));

        let mut unknown = sample();
        unknown.packet_entropy = None;
        assert!(unknown.to_string().contains("entropy=-"));
    }

    #[test]
    fn serializes_enums_lowercase() {
        let json = serde_json::to_string(&sample()).unwrap();
        assert!(json.contains("\"traffic_class\":\"priority\""));
        assert!(json.contains("\"inter_arrival_us\":null"));
    }
}
