#![doc = include_str!("../README.md")]
//!
//! # 모듈 구성
//! - [`config`]: core 캡처 설정에서 파생되는 커널/유저스페이스 런타임 값
//! - [`engine`]: XdpEngine — 어태치/해제, 큐 스레드, Pipeline trait 구현
//! - [`processor`]: 큐별 처리 루프와 특징 링 분석 루프
//! - [`admission`]: 프로토콜 필터, 결정적 샘플링, ML 속도 상한
//! - [`features`]: 엔트로피, 도착 간격, 레코드 변환
//! - [`flow`]: 플로우 추적 테이블
//! - [`stats`]: 원자적 카운터 테이블과 주기 보고기
//! - [`transport`]: 프레임 풀, AF_XDP 소켓, 특징 링
//!
//! # 공유 타입
//! 커널/유저스페이스 공유 타입은 [`ironsift_xdp_common`] 크레이트에 정의되어 있습니다.

pub mod admission;
pub mod config;
pub mod engine;
pub mod error;
pub mod features;
pub mod flow;
#[cfg(target_os = "linux")]
pub mod kernel;
pub mod processor;
pub mod stats;
pub mod transport;

// --- 주요 타입 re-export ---

// 엔진
pub use engine::{CaptureBackend, XdpEngine, XdpEngineBuilder};

// 설정
pub use config::{EngineConfig, XdpMode};

// 에러
pub use error::EngineError;

// 처리 루프
pub use processor::{Dispatch, FrameProcessor, ProcessingContext, RingProcessor};

// 통계
pub use stats::{KernelCounters, Report, StatCounter, StatsReporter, StatsSnapshot, StatsTable};

// 전송 계층
pub use transport::FrameTransport;
pub use transport::ring::{FeatureRing, RecordSource, RingConsumer, RingProducer};
pub use transport::umem::{FrameInjector, InjectError, MemoryTransport, PoolFrame};

#[cfg(target_os = "linux")]
pub use kernel::has_capture_privileges;

// 공유 타입 (커널/유저스페이스 공통)
pub use ironsift_xdp_common;
