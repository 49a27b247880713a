//! 패킷 헤더 파서
//!
//! Ethernet → IPv4 → TCP/UDP 순서로 헤더를 읽습니다. 모든 단계는 [`Cursor`]를 통해
//! 경계 검사를 먼저 통과해야만 해당 영역을 읽을 수 있으며, 실패한 단계마다 서로 다른
//! [`ParseReject`]를 반환합니다.
//!
//! 바이트 소스는 [`PacketBytes`]로 추상화되어 있어 유저스페이스에서는 `[u8]`,
//! 커널에서는 XDP 컨텍스트의 `data..data_end` 범위가 같은 파서를 사용합니다.
//!
//! # 오프셋
//! ```text
//! Ethernet  0..14   ethertype @12
//! IPv4      +0..20  ver/ihl @0, tot_len @2, ttl @8, proto @9, saddr @12, daddr @16
//! UDP       +0..8   sport @0, dport @2
//! TCP       +0..20  sport @0, dport @2, doff @12, flags @13, window @14
//! ```

use crate::{ETH_P_IPV4, PROTO_TCP, PROTO_UDP};

/// Ethernet 헤더 길이
pub const ETH_HLEN: usize = 14;
/// 옵션 없는 IPv4 헤더 길이
pub const IPV4_MIN_HLEN: usize = 20;
/// UDP 헤더 길이
pub const UDP_HLEN: usize = 8;
/// 옵션 없는 TCP 헤더 길이
pub const TCP_MIN_HLEN: usize = 20;

/// 경계 검사가 가능한 바이트 소스
///
/// `read`는 `offset..offset + N`이 소스 길이 안에 있을 때만 값을 반환해야 합니다.
pub trait PacketBytes {
    /// 읽을 수 있는 전체 바이트 수
    fn byte_len(&self) -> usize;

    /// `offset`에서 `N` 바이트를 읽습니다. 범위를 벗어나면 `None`.
    fn read<const N: usize>(&self, offset: usize) -> Option<[u8; N]>;
}

impl PacketBytes for [u8] {
    #[inline(always)]
    fn byte_len(&self) -> usize {
        self.len()
    }

    #[inline(always)]
    fn read<const N: usize>(&self, offset: usize) -> Option<[u8; N]> {
        let end = offset.checked_add(N)?;
        let bytes = self.get(offset..end)?;
        let mut out = [0u8; N];
        out.copy_from_slice(bytes);
        Some(out)
    }
}

/// 파싱 거부 사유
///
/// 각 변형은 실패한 파싱 단계 하나에 대응합니다.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ParseReject {
    /// Ethernet 헤더(14바이트) 미만
    TruncatedEthernet = 0,
    /// EtherType이 IPv4가 아님
    NotIpv4 = 1,
    /// 최소 IPv4 헤더(20바이트) 미만
    TruncatedIpv4 = 2,
    /// IP 버전 필드가 4가 아님
    BadIpVersion = 3,
    /// IHL < 5
    BadIhl = 4,
    /// IHL×4 만큼의 헤더가 남아있지 않음
    TruncatedIpOptions = 5,
    /// UDP 헤더(8바이트) 미만
    TruncatedUdp = 6,
    /// TCP 헤더(20바이트) 미만
    TruncatedTcp = 7,
    /// TCP data offset < 5
    BadTcpDataOffset = 8,
    /// data offset×4 만큼의 TCP 헤더가 남아있지 않음
    TruncatedTcpOptions = 9,
}

impl ParseReject {
    /// 거부 사유 개수
    pub const COUNT: usize = 10;

    /// 모든 거부 사유 (인덱스 순)
    pub const ALL: [ParseReject; Self::COUNT] = [
        ParseReject::TruncatedEthernet,
        ParseReject::NotIpv4,
        ParseReject::TruncatedIpv4,
        ParseReject::BadIpVersion,
        ParseReject::BadIhl,
        ParseReject::TruncatedIpOptions,
        ParseReject::TruncatedUdp,
        ParseReject::TruncatedTcp,
        ParseReject::BadTcpDataOffset,
        ParseReject::TruncatedTcpOptions,
    ];

    /// 카운터 배열 인덱스
    pub const fn index(self) -> usize {
        self as usize
    }

    /// 메트릭 레이블용 이름
    pub const fn as_str(self) -> &'static str {
        match self {
            ParseReject::TruncatedEthernet => "truncated_ethernet",
            ParseReject::NotIpv4 => "not_ipv4",
            ParseReject::TruncatedIpv4 => "truncated_ipv4",
            ParseReject::BadIpVersion => "bad_ip_version",
            ParseReject::BadIhl => "bad_ihl",
            ParseReject::TruncatedIpOptions => "truncated_ip_options",
            ParseReject::TruncatedUdp => "truncated_udp",
            ParseReject::TruncatedTcp => "truncated_tcp",
            ParseReject::BadTcpDataOffset => "bad_tcp_data_offset",
            ParseReject::TruncatedTcpOptions => "truncated_tcp_options",
        }
    }
}

/// 경계 검사 커서
///
/// 현재 헤더의 시작 위치를 가리키며, `advance`는 남은 길이를 확인한 뒤에만 전진합니다.
pub struct Cursor<'a, B: PacketBytes + ?Sized> {
    bytes: &'a B,
    offset: usize,
}

impl<'a, B: PacketBytes + ?Sized> Cursor<'a, B> {
    /// 0 오프셋에서 시작하는 커서를 생성합니다.
    #[inline(always)]
    pub fn new(bytes: &'a B) -> Self {
        Self { bytes, offset: 0 }
    }

    /// 현재 오프셋
    #[inline(always)]
    pub fn offset(&self) -> usize {
        self.offset
    }

    /// 현재 위치부터 남은 바이트 수
    #[inline(always)]
    pub fn remaining(&self) -> usize {
        self.bytes.byte_len().saturating_sub(self.offset)
    }

    /// 현재 위치부터 `len` 바이트가 남아있는지 확인합니다.
    #[inline(always)]
    pub fn require(&self, len: usize, reject: ParseReject) -> Result<(), ParseReject> {
        if self.remaining() < len {
            return Err(reject);
        }
        Ok(())
    }

    /// 현재 헤더 기준 상대 오프셋 `at`에서 `N` 바이트를 읽습니다.
    #[inline(always)]
    pub fn read<const N: usize>(&self, at: usize, reject: ParseReject) -> Result<[u8; N], ParseReject> {
        let abs = self.offset.checked_add(at).ok_or(reject)?;
        self.bytes.read::<N>(abs).ok_or(reject)
    }

    /// 1바이트를 읽습니다.
    #[inline(always)]
    pub fn read_u8(&self, at: usize, reject: ParseReject) -> Result<u8, ParseReject> {
        let [b] = self.read::<1>(at, reject)?;
        Ok(b)
    }

    /// 빅 엔디언 u16을 읽습니다.
    #[inline(always)]
    pub fn read_be16(&self, at: usize, reject: ParseReject) -> Result<u16, ParseReject> {
        Ok(u16::from_be_bytes(self.read::<2>(at, reject)?))
    }

    /// 빅 엔디언 u32를 읽습니다.
    #[inline(always)]
    pub fn read_be32(&self, at: usize, reject: ParseReject) -> Result<u32, ParseReject> {
        Ok(u32::from_be_bytes(self.read::<4>(at, reject)?))
    }

    /// `len` 바이트를 확인한 뒤 전진합니다.
    #[inline(always)]
    pub fn advance(&mut self, len: usize, reject: ParseReject) -> Result<(), ParseReject> {
        self.require(len, reject)?;
        self.offset += len;
        Ok(())
    }
}

/// 파싱된 헤더 필드
///
/// IPv4 주소는 네트워크 바이트 오더로 읽은 값을 호스트 정수로 보관합니다
/// (`10.0.0.1` → `0x0A00_0001`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PacketHeaders {
    /// 출발지 IPv4 주소
    pub src_ip: u32,
    /// 목적지 IPv4 주소
    pub dst_ip: u32,
    /// 출발지 포트 (TCP/UDP 외에는 0)
    pub src_port: u16,
    /// 목적지 포트 (TCP/UDP 외에는 0)
    pub dst_port: u16,
    /// IP 프로토콜 번호
    pub protocol: u8,
    /// TTL
    pub ttl: u8,
    /// IPv4 total length 필드
    pub ip_total_len: u16,
    /// TCP 플래그 바이트 (TCP 외에는 0)
    pub tcp_flags: u8,
    /// TCP 윈도우 크기 (TCP 외에는 0)
    pub window_size: u16,
    /// 프레임 전체 길이
    pub frame_len: usize,
    /// 페이로드 시작 오프셋 (프레임 기준)
    pub payload_offset: usize,
}

impl PacketHeaders {
    /// 페이로드 길이 (프레임 기준)
    #[inline(always)]
    pub fn payload_len(&self) -> usize {
        self.frame_len.saturating_sub(self.payload_offset)
    }
}

/// 프레임을 파싱합니다.
///
/// 할당하지 않으며 `bytes.byte_len()`을 넘어서는 읽기를 하지 않습니다.
/// TCP/UDP 외의 IPv4 프로토콜은 포트 0으로 파싱되고, 페이로드는 IP 헤더 직후에서 시작합니다.
#[inline(always)]
pub fn parse_packet<B: PacketBytes + ?Sized>(bytes: &B) -> Result<PacketHeaders, ParseReject> {
    let mut cur = Cursor::new(bytes);

    // Ethernet
    cur.require(ETH_HLEN, ParseReject::TruncatedEthernet)?;
    let ethertype = cur.read_be16(12, ParseReject::TruncatedEthernet)?;
    if ethertype != ETH_P_IPV4 {
        return Err(ParseReject::NotIpv4);
    }
    cur.advance(ETH_HLEN, ParseReject::TruncatedEthernet)?;

    // IPv4
    cur.require(IPV4_MIN_HLEN, ParseReject::TruncatedIpv4)?;
    let ver_ihl = cur.read_u8(0, ParseReject::TruncatedIpv4)?;
    if ver_ihl >> 4 != 4 {
        return Err(ParseReject::BadIpVersion);
    }
    let ihl = (ver_ihl & 0x0f) as usize;
    if ihl < 5 {
        return Err(ParseReject::BadIhl);
    }
    let ip_hlen = ihl * 4;
    cur.require(ip_hlen, ParseReject::TruncatedIpOptions)?;

    let ip_total_len = cur.read_be16(2, ParseReject::TruncatedIpv4)?;
    let ttl = cur.read_u8(8, ParseReject::TruncatedIpv4)?;
    let protocol = cur.read_u8(9, ParseReject::TruncatedIpv4)?;
    let src_ip = cur.read_be32(12, ParseReject::TruncatedIpv4)?;
    let dst_ip = cur.read_be32(16, ParseReject::TruncatedIpv4)?;
    cur.advance(ip_hlen, ParseReject::TruncatedIpOptions)?;

    let mut headers = PacketHeaders {
        src_ip,
        dst_ip,
        src_port: 0,
        dst_port: 0,
        protocol,
        ttl,
        ip_total_len,
        tcp_flags: 0,
        window_size: 0,
        frame_len: bytes.byte_len(),
        payload_offset: cur.offset(),
    };

    // Transport
    match protocol {
        PROTO_UDP => {
            cur.require(UDP_HLEN, ParseReject::TruncatedUdp)?;
            headers.src_port = cur.read_be16(0, ParseReject::TruncatedUdp)?;
            headers.dst_port = cur.read_be16(2, ParseReject::TruncatedUdp)?;
            cur.advance(UDP_HLEN, ParseReject::TruncatedUdp)?;
        }
        PROTO_TCP => {
            cur.require(TCP_MIN_HLEN, ParseReject::TruncatedTcp)?;
            headers.src_port = cur.read_be16(0, ParseReject::TruncatedTcp)?;
            headers.dst_port = cur.read_be16(2, ParseReject::TruncatedTcp)?;
            let doff = (cur.read_u8(12, ParseReject::TruncatedTcp)? >> 4) as usize;
            headers.tcp_flags = cur.read_u8(13, ParseReject::TruncatedTcp)?;
            headers.window_size = cur.read_be16(14, ParseReject::TruncatedTcp)?;
            if doff < 5 {
                return Err(ParseReject::BadTcpDataOffset);
            }
            cur.advance(doff * 4, ParseReject::TruncatedTcpOptions)?;
        }
        _ => {}
    }

    headers.payload_offset = cur.offset();
    Ok(headers)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn eth_ipv4(proto: u8, ihl: u8, l4: &[u8], payload: &[u8]) -> std::vec::Vec<u8> {
        let mut f = std::vec::Vec::new();
        f.extend_from_slice(&[0xaa; 6]);
        f.extend_from_slice(&[0xbb; 6]);
        f.extend_from_slice(&ETH_P_IPV4.to_be_bytes());
        let ip_hlen = ihl as usize * 4;
        let total = (ip_hlen + l4.len() + payload.len()) as u16;
        let mut ip = std::vec![0u8; ip_hlen.max(20)];
        ip[0] = 0x40 | ihl;
        ip[2..4].copy_from_slice(&total.to_be_bytes());
        ip[8] = 64;
        ip[9] = proto;
        ip[12..16].copy_from_slice(&[10, 0, 0, 1]);
        ip[16..20].copy_from_slice(&[192, 168, 1, 2]);
        f.extend_from_slice(&ip[..ip_hlen.max(20)]);
        f.extend_from_slice(l4);
        f.extend_from_slice(payload);
        f
    }

    fn udp(sport: u16, dport: u16) -> [u8; 8] {
        let mut h = [0u8; 8];
        h[0..2].copy_from_slice(&sport.to_be_bytes());
        h[2..4].copy_from_slice(&dport.to_be_bytes());
        h
    }

    fn tcp(sport: u16, dport: u16, doff: u8, flags: u8, window: u16) -> [u8; 20] {
        let mut h = [0u8; 20];
        h[0..2].copy_from_slice(&sport.to_be_bytes());
        h[2..4].copy_from_slice(&dport.to_be_bytes());
        h[12] = doff << 4;
        h[13] = flags;
        h[14..16].copy_from_slice(&window.to_be_bytes());
        h
    }

    // =============================================================================
    // 정상 파싱
    // =============================================================================

    #[test]
    fn parses_udp_frame() {
        let frame = eth_ipv4(PROTO_UDP, 5, &udp(5000, 53), &[0u8; 58]);
        assert_eq!(frame.len(), 100);
        let h = parse_packet(frame.as_slice()).unwrap();
        assert_eq!(h.src_ip, 0x0A00_0001);
        assert_eq!(h.dst_ip, 0xC0A8_0102);
        assert_eq!(h.src_port, 5000);
        assert_eq!(h.dst_port, 53);
        assert_eq!(h.protocol, PROTO_UDP);
        assert_eq!(h.ttl, 64);
        assert_eq!(h.tcp_flags, 0);
        assert_eq!(h.payload_offset, 42);
        assert_eq!(h.payload_len(), 58);
    }

    #[test]
    fn parses_tcp_frame_with_options() {
        let mut l4 = std::vec::Vec::from(tcp(443, 51000, 8, 0x12, 65535));
        l4.extend_from_slice(&[1u8; 12]); // 옵션 12바이트
        let frame = eth_ipv4(PROTO_TCP, 5, &l4, b"hello");
        let h = parse_packet(frame.as_slice()).unwrap();
        assert_eq!(h.src_port, 443);
        assert_eq!(h.dst_port, 51000);
        assert_eq!(h.tcp_flags, 0x12);
        assert_eq!(h.window_size, 65535);
        assert_eq!(h.payload_offset, 14 + 20 + 32);
        assert_eq!(h.payload_len(), 5);
    }

    #[test]
    fn parses_ip_options() {
        let mut frame = eth_ipv4(PROTO_UDP, 6, &[], &[]);
        frame.extend_from_slice(&udp(1, 2));
        let h = parse_packet(frame.as_slice()).unwrap();
        assert_eq!(h.payload_offset, 14 + 24 + 8);
    }

    #[test]
    fn non_tcp_udp_has_zero_ports() {
        let frame = eth_ipv4(1, 5, &[8, 0, 0, 0], &[]);
        let h = parse_packet(frame.as_slice()).unwrap();
        assert_eq!(h.protocol, 1);
        assert_eq!(h.src_port, 0);
        assert_eq!(h.dst_port, 0);
        assert_eq!(h.payload_offset, 34);
        assert_eq!(h.payload_len(), 4);
    }

    // =============================================================================
    // 거부 사유
    // =============================================================================

    #[test]
    fn rejects_short_ethernet() {
        assert_eq!(parse_packet(&[0u8; 13][..]), Err(ParseReject::TruncatedEthernet));
        assert_eq!(parse_packet(&[0u8; 0][..]), Err(ParseReject::TruncatedEthernet));
    }

    #[test]
    fn rejects_non_ipv4_ethertype() {
        let mut frame = eth_ipv4(PROTO_UDP, 5, &udp(1, 2), &[]);
        frame[12..14].copy_from_slice(&0x86ddu16.to_be_bytes());
        assert_eq!(parse_packet(frame.as_slice()), Err(ParseReject::NotIpv4));
    }

    #[test]
    fn rejects_truncated_ipv4() {
        let frame = eth_ipv4(PROTO_UDP, 5, &[], &[]);
        assert_eq!(parse_packet(&frame[..33]), Err(ParseReject::TruncatedIpv4));
    }

    #[test]
    fn rejects_bad_version_and_ihl() {
        let mut frame = eth_ipv4(PROTO_UDP, 5, &udp(1, 2), &[]);
        frame[14] = 0x65;
        assert_eq!(parse_packet(frame.as_slice()), Err(ParseReject::BadIpVersion));
        frame[14] = 0x44;
        assert_eq!(parse_packet(frame.as_slice()), Err(ParseReject::BadIhl));
    }

    #[test]
    fn rejects_ihl_past_end() {
        let mut frame = eth_ipv4(PROTO_UDP, 5, &[], &[]);
        frame[14] = 0x4f; // 60바이트 헤더 요구, 20바이트만 존재
        assert_eq!(parse_packet(frame.as_slice()), Err(ParseReject::TruncatedIpOptions));
    }

    #[test]
    fn rejects_truncated_transport() {
        let frame = eth_ipv4(PROTO_UDP, 5, &udp(1, 2), &[]);
        assert_eq!(parse_packet(&frame[..41]), Err(ParseReject::TruncatedUdp));

        let frame = eth_ipv4(PROTO_TCP, 5, &tcp(1, 2, 5, 0, 0), &[]);
        assert_eq!(parse_packet(&frame[..53]), Err(ParseReject::TruncatedTcp));
    }

    #[test]
    fn rejects_bad_tcp_data_offset() {
        let frame = eth_ipv4(PROTO_TCP, 5, &tcp(1, 2, 4, 0, 0), &[]);
        assert_eq!(parse_packet(frame.as_slice()), Err(ParseReject::BadTcpDataOffset));
        let frame = eth_ipv4(PROTO_TCP, 5, &tcp(1, 2, 6, 0, 0), &[]);
        assert_eq!(parse_packet(frame.as_slice()), Err(ParseReject::TruncatedTcpOptions));
    }

    #[test]
    fn reject_indices_are_dense() {
        for (i, r) in ParseReject::ALL.iter().enumerate() {
            assert_eq!(r.index(), i);
        }
    }

    // =============================================================================
    // 경계 검사: 읽기 범위를 기록하는 소스
    // =============================================================================

    struct Watched<'a> {
        bytes: &'a [u8],
        limit: usize,
        max_end: core::cell::Cell<usize>,
    }

    impl PacketBytes for Watched<'_> {
        fn byte_len(&self) -> usize {
            self.limit
        }
        fn read<const N: usize>(&self, offset: usize) -> Option<[u8; N]> {
            let end = offset + N;
            if end > self.limit {
                return None;
            }
            self.max_end.set(self.max_end.get().max(end));
            self.bytes[..self.limit].read::<N>(offset)
        }
    }

    mod proptests {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #[test]
            fn never_reads_past_length(bytes in prop::collection::vec(any::<u8>(), 0..64)) {
                let watched = Watched { bytes: &bytes, limit: bytes.len(), max_end: core::cell::Cell::new(0) };
                let _ = parse_packet(&watched);
                prop_assert!(watched.max_end.get() <= bytes.len());
            }

            #[test]
            fn every_truncation_of_valid_frame_is_safe(cut in 0usize..64, sport in any::<u16>(), dport in any::<u16>()) {
                let frame = eth_ipv4(PROTO_TCP, 5, &tcp(sport, dport, 5, 0x18, 1024), &[7u8; 10]);
                let limit = cut.min(frame.len());
                let watched = Watched { bytes: &frame, limit, max_end: core::cell::Cell::new(0) };
                let result = parse_packet(&watched);
                prop_assert!(watched.max_end.get() <= limit);
                if limit < 54 {
                    prop_assert!(result.is_err());
                } else {
                    prop_assert!(result.is_ok());
                }
            }

            #[test]
            fn arbitrary_bytes_do_not_panic(bytes in prop::collection::vec(any::<u8>(), 0..1500)) {
                let _ = parse_packet(bytes.as_slice());
            }
        }
    }
}
