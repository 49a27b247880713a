#![no_main]

use ironsift_xdp_engine::features::{build_record, from_wire, to_wire};
use ironsift_xdp_engine::ironsift_xdp_common::parse_packet;
use ironsift_core::types::Action;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let Ok(headers) = parse_packet(data) else {
        return;
    };
    let record = build_record(&headers, data, 1, None);
    assert!(usize::from(record.payload_len) <= data.len());

    // 와이어 변환은 플로우 간격 외의 필드를 보존해야 한다
    let back = from_wire(&to_wire(&record, Action::Redirect));
    assert_eq!(back.flow_hash, record.flow_hash);
    assert_eq!(back.packet_entropy, record.packet_entropy);
    assert_eq!(back.traffic_class, record.traffic_class);
});
