//! 특징 파생 및 수용 정책의 순수 함수
//!
//! 커널 프로그램과 유저스페이스가 동일한 결과를 내도록 부동소수점과 할당 없이 구현합니다.

use crate::{
    ACTION_REDIRECT, ACTION_SAMPLE, CLASS_NORMAL, CLASS_PRIORITY, CLASS_SUSPICIOUS, DIR_INBOUND,
    DIR_OUTBOUND, PROTO_ICMP, PROTO_MASK_ICMP, PROTO_MASK_OTHER, PROTO_MASK_TCP, PROTO_MASK_UDP,
    PROTO_TCP, PROTO_UDP,
};

/// 우선 처리 포트 (SSH, DNS, HTTP, HTTPS)
pub const PRIORITY_PORTS: [u16; 4] = [22, 53, 80, 443];

/// 이 값보다 큰 포트 쌍은 의심 트래픽
pub const EPHEMERAL_PORT_FLOOR: u16 = 49152;

const NS_PER_SEC: u64 = 1_000_000_000;

/// 5-튜플 플로우 해시
///
/// `src_ip ^ (dst_ip << 32) ^ (src_port << 16) ^ (dst_port << 48) ^ (protocol << 8)`
/// 방향에 민감하며 암호학적 식별자가 아닙니다.
#[inline(always)]
pub fn flow_hash(src_ip: u32, dst_ip: u32, src_port: u16, dst_port: u16, protocol: u8) -> u64 {
    (src_ip as u64)
        ^ ((dst_ip as u64) << 32)
        ^ ((src_port as u64) << 16)
        ^ ((dst_port as u64) << 48)
        ^ ((protocol as u64) << 8)
}

/// 포트 기반 트래픽 분류
///
/// Priority 검사를 먼저 수행하고, 해당하지 않을 때만 Suspicious를 검사합니다.
#[inline(always)]
pub fn classify(src_port: u16, dst_port: u16, protocol: u8) -> u8 {
    let mut i = 0;
    while i < PRIORITY_PORTS.len() {
        if src_port == PRIORITY_PORTS[i] || dst_port == PRIORITY_PORTS[i] {
            return CLASS_PRIORITY;
        }
        i += 1;
    }
    if (src_port > EPHEMERAL_PORT_FLOOR && dst_port > EPHEMERAL_PORT_FLOOR)
        || (protocol != PROTO_TCP && protocol != PROTO_UDP)
    {
        return CLASS_SUSPICIOUS;
    }
    CLASS_NORMAL
}

/// 방향 추정
///
/// 라우팅 테이블을 보지 않는 단순 휴리스틱입니다: `src_port > dst_port`이면 아웃바운드.
#[inline(always)]
pub fn direction(src_port: u16, dst_port: u16) -> u8 {
    if src_port > dst_port {
        DIR_OUTBOUND
    } else {
        DIR_INBOUND
    }
}

/// 프로토콜이 활성화 마스크에 포함되는지 확인합니다.
///
/// TCP/UDP/ICMP 외의 프로토콜은 `PROTO_MASK_OTHER` 비트를 따릅니다.
#[inline(always)]
pub fn protocol_enabled(mask: u8, protocol: u8) -> bool {
    let bit = match protocol {
        PROTO_TCP => PROTO_MASK_TCP,
        PROTO_UDP => PROTO_MASK_UDP,
        PROTO_ICMP => PROTO_MASK_ICMP,
        _ => PROTO_MASK_OTHER,
    };
    mask & bit != 0
}

/// 결정적 샘플링 판정
///
/// `counter`는 이번 패킷까지 증가된 값입니다. `rate`가 0 또는 1이면 모두 선택합니다.
#[inline(always)]
pub fn sample_hit(counter: u64, rate: u32) -> bool {
    if rate <= 1 {
        return true;
    }
    counter % rate as u64 == 0
}

/// 샘플링에 선택된 패킷의 액션
#[inline(always)]
pub fn selected_action(class: u8) -> u8 {
    if class == CLASS_PRIORITY || class == CLASS_SUSPICIOUS {
        ACTION_REDIRECT
    } else {
        ACTION_SAMPLE
    }
}

/// 1초 고정 윈도우 기반 리다이렉트 상한
///
/// # 메모리 레이아웃 (16 바이트, 8바이트 정렬)
/// ```text
/// offset  field            size
/// 0       window_start_ns  8
/// 8       count            4
/// 12      _pad             4
/// ```
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MlRateWindow {
    /// 현재 윈도우 시작 시각 (ns)
    pub window_start_ns: u64,
    /// 현재 윈도우에서 허용된 리다이렉트 수
    pub count: u32,
    /// 8바이트 정렬을 위한 패딩
    pub _pad: u32,
}

impl MlRateWindow {
    /// 빈 윈도우를 생성합니다.
    pub const fn new() -> Self {
        Self {
            window_start_ns: 0,
            count: 0,
            _pad: 0,
        }
    }

    /// 리다이렉트 슬롯을 하나 얻습니다.
    ///
    /// `max_per_sec`이 0이면 항상 허용합니다. 시각이 윈도우 밖(또는 과거)이면 윈도우를 새로 엽니다.
    #[inline(always)]
    pub fn try_acquire(&mut self, now_ns: u64, max_per_sec: u32) -> bool {
        if max_per_sec == 0 {
            return true;
        }
        if now_ns < self.window_start_ns || now_ns - self.window_start_ns >= NS_PER_SEC {
            self.window_start_ns = now_ns;
            self.count = 0;
        }
        if self.count >= max_per_sec {
            return false;
        }
        self.count += 1;
        true
    }
}

impl Default for MlRateWindow {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{ACTION_REDIRECT, ACTION_SAMPLE};

    #[test]
    fn flow_hash_matches_formula() {
        let h = flow_hash(0x0A00_0001, 0xC0A8_0102, 5000, 53, 17);
        let expected = 0x0A00_0001u64
            ^ (0xC0A8_0102u64 << 32)
            ^ (5000u64 << 16)
            ^ (53u64 << 48)
            ^ (17u64 << 8);
        assert_eq!(h, expected);
        assert_eq!(h, 0xC09D_0102_1988_1101);
    }

    #[test]
    fn flow_hash_is_direction_sensitive() {
        let a = flow_hash(1, 2, 1000, 2000, 6);
        let b = flow_hash(2, 1, 2000, 1000, 6);
        assert_ne!(a, b);
        assert_eq!(a, flow_hash(1, 2, 1000, 2000, 6));
    }

    #[test]
    fn classify_priority_wins_over_suspicious() {
        assert_eq!(classify(53, 60000, 17), CLASS_PRIORITY);
        assert_eq!(classify(60000, 443, 6), CLASS_PRIORITY);
        assert_eq!(classify(22, 0, 1), CLASS_PRIORITY);
    }

    #[test]
    fn classify_suspicious_cases() {
        assert_eq!(classify(50000, 50001, 6), CLASS_SUSPICIOUS);
        assert_eq!(classify(0, 0, PROTO_ICMP), CLASS_SUSPICIOUS);
        // 49152 자체는 경계 밖
        assert_eq!(classify(49152, 50000, 6), CLASS_NORMAL);
    }

    #[test]
    fn classify_normal() {
        assert_eq!(classify(1234, 8080, 6), CLASS_NORMAL);
    }

    #[test]
    fn direction_follows_port_order() {
        assert_eq!(direction(5000, 53), DIR_OUTBOUND);
        assert_eq!(direction(53, 5000), DIR_INBOUND);
        assert_eq!(direction(80, 80), DIR_INBOUND);
    }

    #[test]
    fn protocol_mask_bits() {
        let mask = PROTO_MASK_TCP | PROTO_MASK_UDP;
        assert!(protocol_enabled(mask, PROTO_TCP));
        assert!(protocol_enabled(mask, PROTO_UDP));
        assert!(!protocol_enabled(mask, PROTO_ICMP));
        assert!(!protocol_enabled(mask, 47));
        assert!(protocol_enabled(PROTO_MASK_OTHER, 47));
    }

    #[test]
    fn sampling_is_modulo() {
        let hits: usize = (1..=100u64).filter(|c| sample_hit(*c, 10)).count();
        assert_eq!(hits, 10);
        assert!(!sample_hit(1, 10));
        assert!(sample_hit(10, 10));
        assert!(sample_hit(7, 1));
        assert!(sample_hit(7, 0));
    }

    #[test]
    fn selected_action_by_class() {
        assert_eq!(selected_action(CLASS_PRIORITY), ACTION_REDIRECT);
        assert_eq!(selected_action(CLASS_SUSPICIOUS), ACTION_REDIRECT);
        assert_eq!(selected_action(CLASS_NORMAL), ACTION_SAMPLE);
    }

    #[test]
    fn rate_window_caps_per_second() {
        let mut w = MlRateWindow::new();
        assert!(w.try_acquire(100, 2));
        assert!(w.try_acquire(200, 2));
        assert!(!w.try_acquire(300, 2));
        // 다음 윈도우
        assert!(w.try_acquire(100 + NS_PER_SEC, 2));
        assert_eq!(w.count, 1);
    }

    #[test]
    fn rate_window_zero_is_unlimited() {
        let mut w = MlRateWindow::new();
        for t in 0..1000 {
            assert!(w.try_acquire(t, 0));
        }
        assert_eq!(w.count, 0);
    }

    #[test]
    fn rate_window_resets_on_clock_going_back() {
        let mut w = MlRateWindow::new();
        assert!(w.try_acquire(5 * NS_PER_SEC, 1));
        assert!(!w.try_acquire(5 * NS_PER_SEC + 1, 1));
        assert!(w.try_acquire(NS_PER_SEC, 1));
    }
}
