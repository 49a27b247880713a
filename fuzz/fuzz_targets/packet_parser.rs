#![no_main]

use ironsift_xdp_engine::ironsift_xdp_common::parse_packet;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    // 패닉 없이 Ok 또는 Err을 반환해야 하고, 오프셋은 프레임 안에 있어야 한다
    if let Ok(headers) = parse_packet(data) {
        assert!(headers.payload_offset <= data.len());
        assert_eq!(headers.frame_len, data.len());
    }
});
