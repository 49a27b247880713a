//! 처리 루프 — 큐 하나를 담당하는 단일 스레드 상태 기계
//!
//! ```text
//!        ┌──────── stop ────────┐
//!        ▼                      │
//!      Idle ──▶ Polling ──(ready)──▶ Draining(batch) ──▶ Idle
//!                  │ (timeout)                              ▲
//!                  └────────────────────────────────────────┘
//! ```
//!
//! 프레임 하나의 경로: 파싱 → 특징 파생 → (분류기) → 수용 제어 → 전달 → 해제.
//! 해제는 거부/통과/샘플/리다이렉트와 분석기 패닉을 포함한 모든 분기에서 실행됩니다.
//! 일시 정지는 Polling의 제한 시간 대기에서만 일어나며, 정지 신호는 그 대기도 깨웁니다.
//! 정지 신호를 받으면 이미 rx 큐(또는 특징 링)에 들어온 항목을 모두 처리한 뒤 종료합니다.

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::time::{Duration, Instant};

use ironsift_core::pipeline::{FeatureAnalyzer, TrafficClassifier};
use ironsift_core::types::FeatureRecord;
use ironsift_xdp_common::parse_packet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace};

use crate::admission::{Admission, AdmissionPolicy, AdmissionState, Fate, admit};
use crate::config::EngineConfig;
use crate::error::EngineError;
use crate::features::{apply_classifier, build_record, from_wire, to_wire};
use crate::flow::FlowTable;
use crate::stats::{StatCounter, StatsTable};
use crate::transport::FrameTransport;
use crate::transport::ring::{RecordSource, RingProducer};

/// 정지 시 rx 큐를 비우는 최대 배치 수 (계속 유입되는 큐에서 무한히 돌지 않도록)
const STOP_DRAIN_MAX_BATCHES: usize = 1024;

/// 큐 루프들이 공유하는 불변 처리 설정
#[derive(Clone)]
pub struct ProcessingContext {
    policy: AdmissionPolicy,
    stats: StatsTable,
    flows: Option<Arc<FlowTable>>,
    classifier: Option<Arc<dyn TrafficClassifier>>,
    batch_size: usize,
    poll_timeout: Duration,
}

impl ProcessingContext {
    /// 엔진 설정에서 컨텍스트를 만듭니다.
    ///
    /// 플로우 추적이 켜져 있으면 새 플로우 테이블을 만듭니다.
    pub fn new(config: &EngineConfig, stats: StatsTable) -> Self {
        let tracking = &config.base.flow_tracking;
        Self {
            policy: config.admission_policy(),
            stats,
            flows: tracking
                .enabled
                .then(|| Arc::new(FlowTable::new(tracking))),
            classifier: None,
            batch_size: config.batch_size().max(1),
            poll_timeout: config.poll_timeout(),
        }
    }

    /// 사용자 분류기를 설치합니다.
    pub fn with_classifier(mut self, classifier: Option<Arc<dyn TrafficClassifier>>) -> Self {
        self.classifier = classifier;
        self
    }

    /// 수용 정책을 교체합니다.
    pub fn with_policy(mut self, policy: AdmissionPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// 통계 테이블
    pub fn stats(&self) -> &StatsTable {
        &self.stats
    }

    /// 수용 정책
    pub fn policy(&self) -> &AdmissionPolicy {
        &self.policy
    }

    /// 플로우 테이블 (추적 비활성이면 `None`)
    pub fn flows(&self) -> Option<&FlowTable> {
        self.flows.as_deref()
    }

    /// 프레임 하나를 평가합니다: 파싱 → 특징 → 분류 → 수용 제어.
    ///
    /// 카운터를 갱신하고, 파싱에 실패하면 `None`을 반환합니다.
    pub fn evaluate(
        &self,
        frame: &[u8],
        timestamp_ns: u64,
        state: &mut AdmissionState,
    ) -> Option<(FeatureRecord, Admission)> {
        self.stats.incr(StatCounter::Total);

        let headers = match parse_packet(frame) {
            Ok(headers) => headers,
            Err(reason) => {
                self.stats.record_malformed(reason);
                return None;
            }
        };
        self.stats
            .record_protocol(headers.protocol, frame.len() as u64);

        let mut record = build_record(&headers, frame, timestamp_ns, self.flows());
        if let Some(classifier) = &self.classifier {
            if !apply_classifier(classifier.as_ref(), &mut record) {
                self.stats.incr(StatCounter::CallbackFailures);
            }
        }

        let admission = admit(&record, &self.policy, state);
        self.stats.record_admission(&admission);
        Some((record, admission))
    }
}

/// 분석기를 호출합니다. 패닉하면 `None`.
pub fn invoke_analyzer(analyzer: &dyn FeatureAnalyzer, record: &FeatureRecord) -> Option<i32> {
    catch_unwind(AssertUnwindSafe(|| analyzer.analyze(record))).ok()
}

/// 리다이렉트된 레코드의 전달 경로
pub enum Dispatch {
    /// 분석기를 인라인으로 호출 (없으면 계수만)
    Inline(Option<Arc<dyn FeatureAnalyzer>>),
    /// 특징 링으로 방출 (조기 필터)
    Ring(RingProducer),
}

impl Dispatch {
    fn deliver(&mut self, stats: &StatsTable, record: &FeatureRecord, admission: &Admission) {
        if admission.fate != Fate::Redirected {
            return;
        }
        match self {
            Self::Inline(Some(analyzer)) => {
                stats.record_verdict(invoke_analyzer(analyzer.as_ref(), record));
            }
            Self::Inline(None) => {}
            Self::Ring(producer) => {
                if !producer.push(&to_wire(record, admission.action)) {
                    stats.record_ring_overrun();
                }
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LoopState {
    Idle,
    Polling,
    Draining,
}

/// 프레임 전송 계층 하나를 소비하는 처리 루프
pub struct FrameProcessor<T: FrameTransport> {
    transport: T,
    ctx: ProcessingContext,
    dispatch: Dispatch,
    state: AdmissionState,
    batch: Vec<T::Frame>,
    seen_rx_dropped: u64,
}

impl<T: FrameTransport> FrameProcessor<T> {
    /// 처리 루프를 만듭니다.
    pub fn new(transport: T, ctx: ProcessingContext, dispatch: Dispatch) -> Self {
        let batch = Vec::with_capacity(ctx.batch_size);
        let seen_rx_dropped = transport.rx_dropped();
        Self {
            transport,
            ctx,
            dispatch,
            state: AdmissionState::new(),
            batch,
            seen_rx_dropped,
        }
    }

    /// 특징 링으로 방출하는 조기 필터를 만듭니다.
    ///
    /// 커널 XDP 필터의 유저스페이스 판으로, 원본 프레임 대신 레코드만 링에 넣습니다.
    pub fn early_filter(transport: T, ctx: ProcessingContext, producer: RingProducer) -> Self {
        Self::new(transport, ctx, Dispatch::Ring(producer))
    }

    /// 전송 계층
    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// 정지 신호가 올 때까지 루프를 실행하고, rx 큐에 남은 프레임을 처리한 뒤 반환합니다.
    ///
    /// 반환 시점에는 처리 중인 프레임이 모두 해제되어 있습니다.
    pub async fn run(mut self, cancel: CancellationToken) -> Result<(), EngineError> {
        let queue_id = self.transport.queue_id();
        info!(queue_id, "queue loop started");

        let mut state = LoopState::Idle;
        let result = loop {
            state = match state {
                LoopState::Idle => {
                    if cancel.is_cancelled() {
                        break Ok(());
                    }
                    LoopState::Polling
                }
                LoopState::Polling => {
                    let polled = tokio::select! {
                        biased;
                        () = cancel.cancelled() => None,
                        ready = self.transport.wait_rx(self.ctx.poll_timeout) => Some(ready),
                    };
                    let Some(ready) = polled else {
                        break Ok(());
                    };
                    self.sync_pool_drops();
                    match ready {
                        Ok(true) => LoopState::Draining,
                        Ok(false) => LoopState::Idle,
                        Err(e) => break Err(e),
                    }
                }
                LoopState::Draining => match self.drain_batch() {
                    Ok(_) => LoopState::Idle,
                    Err(e) => break Err(e),
                },
            };
        };

        let result = result.and_then(|()| self.drain_pending());
        self.sync_pool_drops();
        match &result {
            Ok(()) => info!(queue_id, "queue loop stopped"),
            Err(e) => error!(queue_id, error = %e, "queue loop failed"),
        }
        result
    }

    /// rx 큐에서 최대 `batch_size` 프레임을 처리하고 처리한 수를 반환합니다.
    pub fn drain_batch(&mut self) -> Result<usize, EngineError> {
        let mut batch = std::mem::take(&mut self.batch);
        let received = self.transport.receive(self.ctx.batch_size, &mut batch);

        for frame in batch.drain(..) {
            let started = Instant::now();
            let data = self.transport.frame_data(&frame);
            let timestamp_ns = self.transport.frame_timestamp(&frame);
            if let Some((record, admission)) =
                self.ctx.evaluate(data, timestamp_ns, &mut self.state)
            {
                self.dispatch.deliver(&self.ctx.stats, &record, &admission);
            }
            self.ctx.stats.record_latency(started.elapsed());
            self.transport.release(frame);
        }
        self.batch = batch;

        let n = received?;
        trace!(queue_id = self.transport.queue_id(), frames = n, "batch drained");
        Ok(n)
    }

    /// 정지 시점에 rx 큐에 남은 프레임을 처리합니다.
    fn drain_pending(&mut self) -> Result<(), EngineError> {
        let mut drained = 0;
        for _ in 0..STOP_DRAIN_MAX_BATCHES {
            let n = self.drain_batch()?;
            if n == 0 {
                break;
            }
            drained += n;
        }
        if drained > 0 {
            debug!(
                queue_id = self.transport.queue_id(),
                frames = drained,
                "drained rx queue on stop"
            );
        }
        Ok(())
    }

    fn sync_pool_drops(&mut self) {
        let total = self.transport.rx_dropped();
        let delta = total.saturating_sub(self.seen_rx_dropped);
        self.seen_rx_dropped = total;
        if delta > 0 {
            debug!(
                queue_id = self.transport.queue_id(),
                frames = delta,
                "frames lost to pool exhaustion"
            );
        }
        self.ctx.stats.record_pool_exhausted(delta);
    }
}

/// 특징 링(또는 커널 RingBuf)을 소비하는 분석 루프
pub struct RingProcessor<S: RecordSource> {
    source: S,
    analyzer: Option<Arc<dyn FeatureAnalyzer>>,
    stats: StatsTable,
    batch_size: usize,
    poll_timeout: Duration,
}

impl<S: RecordSource> RingProcessor<S> {
    /// 분석 루프를 만듭니다.
    pub fn new(
        source: S,
        analyzer: Option<Arc<dyn FeatureAnalyzer>>,
        stats: StatsTable,
        batch_size: usize,
        poll_timeout: Duration,
    ) -> Self {
        Self {
            source,
            analyzer,
            stats,
            batch_size: batch_size.max(1),
            poll_timeout,
        }
    }

    /// 정지 신호가 올 때까지 루프를 실행하고, 이후 생산자가 닫힐 때까지 링을 비웁니다.
    pub async fn run(mut self, cancel: CancellationToken) -> Result<(), EngineError> {
        info!("feature ring consumer started");
        let mut state = LoopState::Idle;
        let result = loop {
            state = match state {
                LoopState::Idle => {
                    if cancel.is_cancelled() {
                        break Ok(());
                    }
                    LoopState::Polling
                }
                LoopState::Polling => {
                    let polled = tokio::select! {
                        biased;
                        () = cancel.cancelled() => None,
                        ready = self.source.wait_ready(self.poll_timeout) => Some(ready),
                    };
                    let Some(ready) = polled else {
                        break Ok(());
                    };
                    match ready {
                        Ok(true) => LoopState::Draining,
                        Ok(false) => LoopState::Idle,
                        Err(e) => break Err(e),
                    }
                }
                LoopState::Draining => {
                    self.drain_batch();
                    LoopState::Idle
                }
            };
        };
        let result = match result {
            Ok(()) => self.finish().await,
            Err(e) => Err(e),
        };
        info!("feature ring consumer stopped");
        result
    }

    /// 생산자가 닫힐 때까지 기다리며 링을 끝까지 비웁니다.
    ///
    /// 닫힘을 먼저 확인한 뒤 비우므로, 닫힌 뒤 빈 링을 보면 남은 레코드가 없습니다.
    async fn finish(&mut self) -> Result<(), EngineError> {
        let mut drained = 0;
        loop {
            let closed = self.source.is_closed();
            let n = self.drain_batch();
            drained += n;
            if n > 0 {
                continue;
            }
            if closed {
                break;
            }
            self.source.wait_ready(self.poll_timeout).await?;
        }
        if drained > 0 {
            debug!(records = drained, "drained feature ring on stop");
        }
        Ok(())
    }

    /// 최대 `batch_size` 레코드를 분석하고 처리한 수를 반환합니다.
    pub fn drain_batch(&mut self) -> usize {
        let mut n = 0;
        while n < self.batch_size {
            let Some(wire) = self.source.next_record() else {
                break;
            };
            n += 1;
            if let Some(analyzer) = &self.analyzer {
                let record = from_wire(&wire);
                self.stats
                    .record_verdict(invoke_analyzer(analyzer.as_ref(), &record));
            }
        }
        n
    }
}
