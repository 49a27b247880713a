//! 엔진 설정 — core 캡처 설정에서 파생되는 런타임 값
//!
//! [`EngineConfig`]는 core의 [`CaptureConfig`]를 감싸 커널 맵에 기록할
//! [`XdpConfigValue`]와 유저스페이스 [`AdmissionPolicy`]를 만들어 냅니다.
//! 한 번 엔진에 넘겨지면 `Arc`로 공유되며 처리 중에 변경되지 않습니다.

use std::time::Duration;

use ironsift_core::config::CaptureConfig;
use ironsift_xdp_common::{
    PROTO_MASK_ICMP, PROTO_MASK_OTHER, PROTO_MASK_TCP, PROTO_MASK_UDP, XdpConfigValue,
};
use serde::{Deserialize, Serialize};

use crate::admission::AdmissionPolicy;

/// XDP 어태치 모드
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum XdpMode {
    /// 일반 드라이버 경로 (generic XDP)
    Skb,
    /// 드라이버 네이티브 XDP
    Native,
    /// NIC 오프로드
    Hw,
}

impl XdpMode {
    /// 설정 문자열을 파싱합니다. 알 수 없는 값은 `Skb`.
    pub fn parse(s: &str) -> Self {
        match s {
            "native" => Self::Native,
            "hw" => Self::Hw,
            _ => Self::Skb,
        }
    }
}

/// XDP 엔진 설정
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EngineConfig {
    /// core에서 가져온 캡처 설정
    #[serde(flatten)]
    pub base: CaptureConfig,
}

impl EngineConfig {
    /// core CaptureConfig에서 엔진 설정을 생성합니다.
    pub fn from_core(config: &CaptureConfig) -> Self {
        Self {
            base: config.clone(),
        }
    }

    /// 활성화된 프로토콜 비트 마스크
    pub fn protocol_mask(&self) -> u8 {
        let c = &self.base;
        let mut mask = 0;
        if c.enable_tcp {
            mask |= PROTO_MASK_TCP;
        }
        if c.enable_udp {
            mask |= PROTO_MASK_UDP;
        }
        if c.enable_icmp {
            mask |= PROTO_MASK_ICMP;
        }
        if c.enable_other {
            mask |= PROTO_MASK_OTHER;
        }
        mask
    }

    /// 커널 CONFIG 맵에 기록할 값
    pub fn kernel_config(&self) -> XdpConfigValue {
        XdpConfigValue {
            sampling_rate: self.base.sampling_rate.max(1),
            max_ml_rate: self.base.max_ml_rate,
            protocol_mask: self.protocol_mask(),
            _pad: [0; 3],
        }
    }

    /// 유저스페이스 수용 정책
    pub fn admission_policy(&self) -> AdmissionPolicy {
        AdmissionPolicy::new(
            self.base.sampling_rate,
            self.base.max_ml_rate,
            self.protocol_mask(),
        )
    }

    /// XDP 어태치 모드
    pub fn xdp_mode(&self) -> XdpMode {
        XdpMode::parse(&self.base.xdp_mode)
    }

    /// 폴링 대기 상한
    pub fn poll_timeout(&self) -> Duration {
        Duration::from_millis(self.base.poll_timeout_ms)
    }

    /// 통계 보고 주기
    pub fn stats_interval(&self) -> Duration {
        Duration::from_secs(self.base.stats_interval_secs)
    }

    /// 배치 크기
    pub fn batch_size(&self) -> usize {
        self.base.batch_size as usize
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_mask_is_tcp_and_udp() {
        let config = EngineConfig::default();
        assert_eq!(config.protocol_mask(), PROTO_MASK_TCP | PROTO_MASK_UDP);
    }

    #[test]
    fn mask_reflects_every_switch() {
        let mut base = CaptureConfig::default();
        base.enable_tcp = false;
        base.enable_icmp = true;
        base.enable_other = true;
        let config = EngineConfig::from_core(&base);
        assert_eq!(
            config.protocol_mask(),
            PROTO_MASK_UDP | PROTO_MASK_ICMP | PROTO_MASK_OTHER
        );
    }

    #[test]
    fn kernel_config_carries_rates() {
        let mut base = CaptureConfig::default();
        base.sampling_rate = 10;
        base.max_ml_rate = 500;
        let value = EngineConfig::from_core(&base).kernel_config();
        assert_eq!(value.sampling_rate, 10);
        assert_eq!(value.max_ml_rate, 500);
        assert_eq!(value._pad, [0; 3]);
    }

    #[test]
    fn xdp_mode_parses() {
        assert_eq!(XdpMode::parse("native"), XdpMode::Native);
        assert_eq!(XdpMode::parse("hw"), XdpMode::Hw);
        assert_eq!(XdpMode::parse("skb"), XdpMode::Skb);
    }

    #[test]
    fn durations_follow_config() {
        let config = EngineConfig::default();
        assert_eq!(config.poll_timeout(), Duration::from_millis(1000));
        assert_eq!(config.stats_interval(), Duration::from_secs(1));
        assert_eq!(config.batch_size(), 64);
    }
}
