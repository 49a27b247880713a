//! 파이프라인 trait — 모듈 생명주기와 분석 확장 포인트 정의

use std::future::Future;

use serde::Serialize;

use crate::error::IronsiftError;
use crate::types::{FeatureRecord, TrafficClass};

/// 모듈 상태
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum HealthStatus {
    /// 정상
    Healthy,
    /// 동작 중이지만 성능 저하
    Degraded(String),
    /// 동작 불가
    Unhealthy(String),
}

impl HealthStatus {
    /// 정상 여부
    pub fn is_healthy(&self) -> bool {
        matches!(self, Self::Healthy)
    }

    /// 동작 불가 여부
    pub fn is_unhealthy(&self) -> bool {
        matches!(self, Self::Unhealthy(_))
    }
}

/// 시작/정지/상태 확인 생명주기를 갖는 모듈
pub trait Pipeline: Send {
    /// 모듈을 시작합니다. 이미 실행 중이면 `PipelineError::AlreadyRunning`.
    fn start(&mut self) -> impl Future<Output = Result<(), IronsiftError>> + Send;

    /// 모듈을 정지합니다. 실행 중이 아니면 `PipelineError::NotRunning`.
    fn stop(&mut self) -> impl Future<Output = Result<(), IronsiftError>> + Send;

    /// 현재 상태를 보고합니다.
    fn health_check(&self) -> impl Future<Output = HealthStatus> + Send;
}

/// 특징 레코드 분석기
///
/// 리다이렉트된 레코드마다 최대 한 번 호출됩니다. 0은 정상, 0이 아닌 값은
/// 이상 징후/조치 필요를 뜻하며 통계에만 반영됩니다.
/// 패킷 처리 경로에서 인라인으로 실행되므로 무기한 블로킹해서는 안 됩니다.
///
/// 사용자 컨텍스트는 구현체(또는 클로저)가 직접 캡처합니다.
///
/// ```
/// use ironsift_core::pipeline::FeatureAnalyzer;
/// use ironsift_core::types::FeatureRecord;
///
/// let threshold = 200u8;
/// let analyzer = move |f: &FeatureRecord| i32::from(f.packet_entropy.is_some_and(|e| e > threshold));
/// # fn takes(_: impl FeatureAnalyzer) {}
/// takes(analyzer);
/// ```
pub trait FeatureAnalyzer: Send + Sync {
    /// 레코드를 분석합니다.
    fn analyze(&self, feature: &FeatureRecord) -> i32;
}

impl<F> FeatureAnalyzer for F
where
    F: Fn(&FeatureRecord) -> i32 + Send + Sync,
{
    fn analyze(&self, feature: &FeatureRecord) -> i32 {
        self(feature)
    }
}

/// 트래픽 분류기
///
/// 설치하면 유저스페이스 경로의 기본 포트 휴리스틱을 대체합니다.
/// 입력 레코드의 `traffic_class`에는 기본 분류 결과가 들어 있습니다.
pub trait TrafficClassifier: Send + Sync {
    /// 레코드의 분류를 결정합니다.
    fn classify(&self, feature: &FeatureRecord) -> TrafficClass;
}

impl<F> TrafficClassifier for F
where
    F: Fn(&FeatureRecord) -> TrafficClass + Send + Sync,
{
    fn classify(&self, feature: &FeatureRecord) -> TrafficClass {
        self(feature)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Direction;

    fn record(entropy: u8) -> FeatureRecord {
        FeatureRecord {
            src_ip: 1,
            dst_ip: 2,
            src_port: 1000,
            dst_port: 2000,
            protocol: 6,
            pkt_len: 60,
            payload_len: 6,
            tcp_flags: 0,
            window_size: 0,
            ttl: 64,
            timestamp_ns: 0,
            flow_hash: 0,
            packet_entropy: Some(entropy),
            traffic_class: TrafficClass::Normal,
            direction: Direction::Inbound,
            inter_arrival_us: None,
        }
    }

    struct Threshold(u8);

    impl FeatureAnalyzer for Threshold {
        fn analyze(&self, feature: &FeatureRecord) -> i32 {
            i32::from(feature.packet_entropy.is_some_and(|e| e > self.0))
        }
    }

    #[test]
    fn closure_is_an_analyzer() {
        let a = |f: &FeatureRecord| i32::from(f.packet_entropy.unwrap_or(0));
        assert_eq!(a.analyze(&record(7)), 7);
    }

    #[test]
    fn struct_analyzer_as_trait_object() {
        let a: Box<dyn FeatureAnalyzer> = Box::new(Threshold(100));
        assert_eq!(a.analyze(&record(200)), 1);
        assert_eq!(a.analyze(&record(10)), 0);
    }

    #[test]
    fn closure_classifier_overrides() {
        let c = |_: &FeatureRecord| TrafficClass::Suspicious;
        assert_eq!(c.classify(&record(0)), TrafficClass::Suspicious);
    }

    #[test]
    fn health_status_predicates() {
        assert!(HealthStatus::Healthy.is_healthy());
        assert!(HealthStatus::Unhealthy("x".to_owned()).is_unhealthy());
        assert!(!HealthStatus::Degraded("x".to_owned()).is_healthy());
    }
}
