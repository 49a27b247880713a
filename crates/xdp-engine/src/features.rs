//! 특징 파생 — 엔트로피, 레코드 조립, 와이어 변환
//!
//! 파서가 돌려준 [`PacketHeaders`]에서 [`FeatureRecord`]를 만듭니다.
//! 모든 헤더 경계 검사를 통과한 뒤에만 호출되므로 부분적으로 채워진 레코드는 생기지 않습니다.

use std::panic::{AssertUnwindSafe, catch_unwind};

use ironsift_core::pipeline::TrafficClassifier;
use ironsift_core::types::{Action, Direction, FeatureRecord, TrafficClass};
use ironsift_xdp_common::{
    FeatureWire, INTER_ARRIVAL_UNKNOWN, PacketHeaders, WIRE_FLAG_ENTROPY_UNKNOWN, classify,
    direction, flow_hash,
};

use crate::flow::FlowTable;

/// 엔트로피 스케일 (비트당 32)
pub const ENTROPY_SCALE: f64 = 32.0;

/// 페이로드 바이트 분포의 섀넌 엔트로피를 0-255로 스케일합니다.
///
/// `round(H × 32)`을 255로 포화시킵니다. 빈 페이로드는 0입니다.
pub fn payload_entropy(payload: &[u8]) -> u8 {
    if payload.is_empty() {
        return 0;
    }

    let mut histogram = [0u32; 256];
    for &b in payload {
        histogram[b as usize] += 1;
    }

    #[allow(clippy::cast_precision_loss)]
    let len = payload.len() as f64;
    let h: f64 = histogram
        .iter()
        .filter(|&&n| n > 0)
        .map(|&n| {
            let p = f64::from(n) / len;
            -p * p.log2()
        })
        .sum();

    let scaled = (h * ENTROPY_SCALE).round();
    if scaled >= 255.0 {
        255
    } else if scaled <= 0.0 {
        0
    } else {
        scaled as u8
    }
}

#[inline]
fn sat_u16(v: usize) -> u16 {
    u16::try_from(v).unwrap_or(u16::MAX)
}

/// 파싱된 헤더에서 특징 레코드를 조립합니다.
///
/// `frame`은 헤더가 파싱된 원본 프레임이며 엔트로피는 `payload_offset` 이후 바이트로 계산합니다.
/// 플로우 테이블이 주어지면 같은 플로우 직전 패킷과의 간격을 채웁니다.
pub fn build_record(
    headers: &PacketHeaders,
    frame: &[u8],
    timestamp_ns: u64,
    flows: Option<&FlowTable>,
) -> FeatureRecord {
    let hash = flow_hash(
        headers.src_ip,
        headers.dst_ip,
        headers.src_port,
        headers.dst_port,
        headers.protocol,
    );
    let payload = frame.get(headers.payload_offset..).unwrap_or(&[]);
    let inter_arrival_us = flows.and_then(|table| table.observe(hash, timestamp_ns));

    FeatureRecord {
        src_ip: headers.src_ip,
        dst_ip: headers.dst_ip,
        src_port: headers.src_port,
        dst_port: headers.dst_port,
        protocol: headers.protocol,
        pkt_len: sat_u16(headers.frame_len),
        payload_len: sat_u16(headers.payload_len()),
        tcp_flags: headers.tcp_flags,
        window_size: headers.window_size,
        ttl: headers.ttl,
        timestamp_ns,
        flow_hash: hash,
        packet_entropy: Some(payload_entropy(payload)),
        traffic_class: class_from_code(classify(
            headers.src_port,
            headers.dst_port,
            headers.protocol,
        )),
        direction: direction_from_code(direction(headers.src_port, headers.dst_port)),
        inter_arrival_us,
    }
}

/// 사용자 분류기를 적용합니다.
///
/// 분류기가 패닉하면 기본 분류를 유지하고 `false`를 반환합니다.
pub fn apply_classifier(classifier: &dyn TrafficClassifier, record: &mut FeatureRecord) -> bool {
    let snapshot = *record;
    match catch_unwind(AssertUnwindSafe(|| classifier.classify(&snapshot))) {
        Ok(class) => {
            record.traffic_class = class;
            true
        }
        Err(_) => false,
    }
}

fn class_from_code(code: u8) -> TrafficClass {
    TrafficClass::from_code(code).unwrap_or(TrafficClass::Normal)
}

fn direction_from_code(code: u8) -> Direction {
    Direction::from_code(code).unwrap_or(Direction::Inbound)
}

/// 레코드를 링 버퍼 와이어 포맷으로 변환합니다.
pub fn to_wire(record: &FeatureRecord, action: Action) -> FeatureWire {
    FeatureWire {
        flow_hash: record.flow_hash,
        timestamp_ns: record.timestamp_ns,
        src_ip: record.src_ip,
        dst_ip: record.dst_ip,
        inter_arrival_us: record.inter_arrival_us.unwrap_or(INTER_ARRIVAL_UNKNOWN),
        src_port: record.src_port,
        dst_port: record.dst_port,
        pkt_len: record.pkt_len,
        payload_len: record.payload_len,
        window_size: record.window_size,
        protocol: record.protocol,
        tcp_flags: record.tcp_flags,
        ttl: record.ttl,
        entropy: record.packet_entropy.unwrap_or(0),
        traffic_class: record.traffic_class.code(),
        direction: record.direction.code(),
        action: action.code(),
        flags: if record.packet_entropy.is_some() {
            0
        } else {
            WIRE_FLAG_ENTROPY_UNKNOWN
        },
        _pad: [0; 2],
    }
}

/// 와이어 레코드를 특징 레코드로 변환합니다.
///
/// 알 수 없는 분류/방향 코드는 Normal/Inbound로 읽습니다.
pub fn from_wire(wire: &FeatureWire) -> FeatureRecord {
    FeatureRecord {
        src_ip: wire.src_ip,
        dst_ip: wire.dst_ip,
        src_port: wire.src_port,
        dst_port: wire.dst_port,
        protocol: wire.protocol,
        pkt_len: wire.pkt_len,
        payload_len: wire.payload_len,
        tcp_flags: wire.tcp_flags,
        window_size: wire.window_size,
        ttl: wire.ttl,
        timestamp_ns: wire.timestamp_ns,
        flow_hash: wire.flow_hash,
        packet_entropy: wire.entropy(),
        traffic_class: class_from_code(wire.traffic_class),
        direction: direction_from_code(wire.direction),
        inter_arrival_us: (wire.inter_arrival_us != INTER_ARRIVAL_UNKNOWN)
            .then_some(wire.inter_arrival_us),
    }
}
