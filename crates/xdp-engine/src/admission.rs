//! 수용 제어 — 프로토콜 필터, 결정적 샘플링, 분류 기반 리다이렉트
//!
//! 정책 순서:
//! 1. 프로토콜 비활성 → Pass (필터 제외 카운터)
//! 2. N개 중 1개 결정적 샘플링, 비선택 → Pass
//! 3. 선택된 패킷: Priority/Suspicious → Redirect, Normal → Sample
//!
//! 초당 리다이렉트 상한(`max_ml_rate`)을 넘은 Redirect 후보는 Sample로 강등됩니다.
//! 같은 정책과 같은 패킷 순서는 항상 같은 액션 순서를 만듭니다.

use ironsift_core::types::{Action, FeatureRecord};
use ironsift_xdp_common::{MlRateWindow, protocol_enabled, sample_hit};
use serde::Serialize;

/// 패킷 하나의 최종 운명
///
/// 파싱에 성공한 패킷은 정확히 하나의 운명으로 끝납니다.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Fate {
    /// 프로토콜 비활성 (관찰만)
    ProtocolDisabled,
    /// 샘플링에 선택되지 않음
    NotSampled,
    /// 선택되었지만 분석 경로로 보내지 않음 (Normal 또는 상한 강등)
    SampledOnly,
    /// 분석 경로로 전달
    Redirected,
}

/// 수용 제어 결과
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Admission {
    /// 액션
    pub action: Action,
    /// 최종 운명
    pub fate: Fate,
    /// 초당 상한으로 강등되었는지 여부
    pub rate_limited: bool,
}

impl Admission {
    fn new(action: Action, fate: Fate) -> Self {
        Self {
            action,
            fate,
            rate_limited: false,
        }
    }
}

/// 불변 수용 정책
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AdmissionPolicy {
    sampling_rate: u32,
    max_ml_rate: u32,
    protocol_mask: u8,
}

impl AdmissionPolicy {
    /// 정책을 생성합니다. `sampling_rate` 0은 1로 취급합니다.
    pub fn new(sampling_rate: u32, max_ml_rate: u32, protocol_mask: u8) -> Self {
        Self {
            sampling_rate: sampling_rate.max(1),
            max_ml_rate,
            protocol_mask,
        }
    }

    /// 커널이 이미 샘플링한 프레임용 정책 (샘플링 비율 1).
    pub fn pre_admitted(&self) -> Self {
        Self {
            sampling_rate: 1,
            ..*self
        }
    }

    /// 샘플링 비율
    pub fn sampling_rate(&self) -> u32 {
        self.sampling_rate
    }

    /// 초당 리다이렉트 상한 (0 = 무제한)
    pub fn max_ml_rate(&self) -> u32 {
        self.max_ml_rate
    }

    /// 프로토콜 비트 마스크
    pub fn protocol_mask(&self) -> u8 {
        self.protocol_mask
    }
}

/// 큐별 수용 상태 (샘플링 카운터 + 리다이렉트 윈도우)
///
/// 큐 스레드가 단독 소유하므로 원자 연산이 필요 없습니다.
#[derive(Debug, Clone, Default)]
pub struct AdmissionState {
    sample_counter: u64,
    window: MlRateWindow,
}

impl AdmissionState {
    /// 초기 상태를 생성합니다.
    pub fn new() -> Self {
        Self::default()
    }

    /// 지금까지 프로토콜 필터를 통과한 패킷 수
    pub fn eligible(&self) -> u64 {
        self.sample_counter
    }
}

/// 수용 제어를 수행합니다.
///
/// 레코드의 `traffic_class`(사용자 분류기가 적용된 값)와 `timestamp_ns`를 사용합니다.
pub fn admit(
    record: &FeatureRecord,
    policy: &AdmissionPolicy,
    state: &mut AdmissionState,
) -> Admission {
    if !protocol_enabled(policy.protocol_mask, record.protocol) {
        return Admission::new(Action::Pass, Fate::ProtocolDisabled);
    }

    state.sample_counter = state.sample_counter.wrapping_add(1);
    if !sample_hit(state.sample_counter, policy.sampling_rate) {
        return Admission::new(Action::Pass, Fate::NotSampled);
    }

    if !record.traffic_class.wants_redirect() {
        return Admission::new(Action::Sample, Fate::SampledOnly);
    }

    if state
        .window
        .try_acquire(record.timestamp_ns, policy.max_ml_rate)
    {
        Admission::new(Action::Redirect, Fate::Redirected)
    } else {
        Admission {
            action: Action::Sample,
            fate: Fate::SampledOnly,
            rate_limited: true,
        }
    }
}
