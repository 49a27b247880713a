//! XDP 엔진 — 어태치/해제, 큐 스레드, 통계 보고 수명주기
//!
//! [`XdpEngine`]은 빌더([`XdpEngineBuilder`])로 생성하며 [`Pipeline`] trait을 구현합니다.
//!
//! # 아키텍처
//! ```text
//! zero_copy_mode = true
//! ┌──────────────┐ redirect ┌────────────┐     ┌────────────────┐
//! │ XDP program  │─────────▶│ AF_XDP/UMEM│────▶│ FrameProcessor │──▶ FeatureAnalyzer
//! │ (kernel)     │          │ (per queue)│     │ (per thread)   │
//! └──────────────┘          └────────────┘     └────────────────┘
//!
//! zero_copy_mode = false
//! ┌──────────────┐  records ┌────────────┐     ┌────────────────┐
//! │ XDP program  │─────────▶│ FEATURES   │────▶│ RingProcessor  │──▶ FeatureAnalyzer
//! │ (early filter)│         │ RingBuf    │     │                │
//! └──────────────┘          └────────────┘     └────────────────┘
//! ```
//!
//! 인메모리 백엔드([`CaptureBackend::Memory`])는 같은 구조를 커널 없이 재현합니다.
//! 링 모드에서는 [`FrameProcessor::early_filter`]가 커널 필터 역할을 맡습니다.
//!
//! # 사용 예시
//! ```ignore
//! let mut engine = XdpEngine::builder()
//!     .config(EngineConfig::from_core(&config.capture))
//!     .analyzer(|f: &FeatureRecord| i32::from(f.packet_entropy.is_some_and(|e| e > 200)))
//!     .build()?;
//!
//! engine.start().await?;
//! // ...
//! engine.stop().await?;
//! ```

use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use ironsift_core::error::{IronsiftError, PipelineError};
use ironsift_core::pipeline::{FeatureAnalyzer, HealthStatus, Pipeline, TrafficClassifier};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::EngineConfig;
use crate::error::EngineError;
use crate::processor::{Dispatch, FrameProcessor, ProcessingContext, RingProcessor};
use crate::stats::{KernelCounters, Report, StatsReporter, StatsSnapshot, StatsTable};
use crate::transport::FrameTransport;
use crate::transport::ring::FeatureRing;
use crate::transport::umem::{FrameInjector, MemoryTransport};

#[cfg(target_os = "linux")]
use crate::kernel::KernelAttachment;

/// 구간 폐기 비율이 이 값을 넘으면 Degraded
const DEGRADED_DROP_RATIO: f64 = 0.10;

/// 정지 시 큐 스레드 합류 대기 여유
const STOP_GRACE: Duration = Duration::from_secs(5);

type KernelPoll = Box<dyn FnMut() -> KernelCounters + Send>;

/// 프레임 공급 방식
pub enum CaptureBackend {
    /// 커널 XDP 프로그램 + AF_XDP 소켓 또는 커널 RingBuf (Linux)
    Kernel,
    /// 프로세스 내 프레임 풀 (큐마다 하나, 한 번만 시작 가능)
    Memory(Vec<MemoryTransport>),
}

impl CaptureBackend {
    /// 설정의 큐마다 프레임 풀을 만들고 백엔드와 주입 핸들을 반환합니다.
    pub fn memory(config: &EngineConfig) -> (Self, Vec<FrameInjector>) {
        let base = &config.base;
        let (transports, injectors) = base
            .queue_ids()
            .map(|queue_id| {
                MemoryTransport::new(queue_id, base.frame_count as usize, base.frame_size as usize)
            })
            .unzip();
        (Self::Memory(transports), injectors)
    }
}

struct Worker {
    name: String,
    handle: std::thread::JoinHandle<()>,
}

/// XDP 특징 추출 엔진
pub struct XdpEngine {
    config: Arc<EngineConfig>,
    analyzer: Option<Arc<dyn FeatureAnalyzer>>,
    classifier: Option<Arc<dyn TrafficClassifier>>,
    backend: Option<CaptureBackend>,
    stats: StatsTable,
    running: bool,
    cancel: CancellationToken,
    workers: Vec<Worker>,
    failures: Arc<AtomicUsize>,
    reporter: Option<JoinHandle<()>>,
    latest: Arc<Mutex<Option<Report>>>,
    #[cfg(target_os = "linux")]
    attachment: Option<KernelAttachment>,
}

/// XDP 엔진 빌더
pub struct XdpEngineBuilder {
    config: Option<EngineConfig>,
    analyzer: Option<Arc<dyn FeatureAnalyzer>>,
    classifier: Option<Arc<dyn TrafficClassifier>>,
    backend: CaptureBackend,
}

impl XdpEngineBuilder {
    fn new() -> Self {
        Self {
            config: None,
            analyzer: None,
            classifier: None,
            backend: CaptureBackend::Kernel,
        }
    }

    /// 엔진 설정을 지정합니다.
    pub fn config(mut self, config: EngineConfig) -> Self {
        self.config = Some(config);
        self
    }

    /// 리다이렉트된 레코드마다 호출할 분석기를 지정합니다.
    pub fn analyzer(mut self, analyzer: impl FeatureAnalyzer + 'static) -> Self {
        self.analyzer = Some(Arc::new(analyzer));
        self
    }

    /// 기본 포트 휴리스틱을 대체할 분류기를 지정합니다 (유저스페이스 경로 전용).
    pub fn classifier(mut self, classifier: impl TrafficClassifier + 'static) -> Self {
        self.classifier = Some(Arc::new(classifier));
        self
    }

    /// 프레임 공급 방식을 지정합니다 (기본: [`CaptureBackend::Kernel`]).
    pub fn backend(mut self, backend: CaptureBackend) -> Self {
        self.backend = backend;
        self
    }

    /// 엔진을 생성합니다.
    ///
    /// # 에러
    /// - `PipelineError::InitFailed`: 설정이 누락된 경우
    /// - `ConfigError`: 설정 검증 실패
    pub fn build(self) -> Result<XdpEngine, IronsiftError> {
        let config = self
            .config
            .ok_or_else(|| PipelineError::InitFailed("config is required".to_owned()))?;
        config.base.validate()?;

        Ok(XdpEngine {
            config: Arc::new(config),
            analyzer: self.analyzer,
            classifier: self.classifier,
            backend: Some(self.backend),
            stats: StatsTable::new(),
            running: false,
            cancel: CancellationToken::new(),
            workers: Vec::new(),
            failures: Arc::new(AtomicUsize::new(0)),
            reporter: None,
            latest: Arc::new(Mutex::new(None)),
            #[cfg(target_os = "linux")]
            attachment: None,
        })
    }
}

impl XdpEngine {
    /// 빌더를 반환합니다.
    pub fn builder() -> XdpEngineBuilder {
        XdpEngineBuilder::new()
    }

    /// 현재 설정
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// 실행 중 여부
    pub fn is_running(&self) -> bool {
        self.running
    }

    /// 누적 통계 스냅샷
    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    /// 가장 최근의 주기 보고서. 첫 보고 전이면 `None`.
    pub fn report(&self) -> Option<Report> {
        self.latest
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// 설정을 교체합니다. 실행 중이면 `PipelineError::AlreadyRunning`.
    ///
    /// 처리 경로가 사용하는 설정은 제자리에서 바뀌지 않으며, 다음 `start()`부터 적용됩니다.
    pub fn update_config(&mut self, config: EngineConfig) -> Result<(), IronsiftError> {
        if self.running {
            return Err(PipelineError::AlreadyRunning.into());
        }
        config.base.validate()?;
        self.config = Arc::new(config);
        Ok(())
    }

    fn processing_context(&self) -> ProcessingContext {
        ProcessingContext::new(&self.config, self.stats.clone())
            .with_classifier(self.classifier.clone())
    }

    /// 큐 루프 하나를 전용 스레드(current-thread 런타임)에서 실행합니다.
    fn spawn_worker<F, Fut>(&mut self, name: String, task: F) -> Result<(), EngineError>
    where
        F: FnOnce(CancellationToken) -> Fut + Send + 'static,
        Fut: Future<Output = Result<(), EngineError>>,
    {
        let cancel = self.cancel.clone();
        let failures = Arc::clone(&self.failures);
        let thread_name = name.clone();
        let handle = std::thread::Builder::new()
            .name(name.clone())
            .spawn(move || {
                let runtime = match tokio::runtime::Builder::new_current_thread()
                    .enable_all()
                    .build()
                {
                    Ok(runtime) => runtime,
                    Err(e) => {
                        error!(worker = thread_name.as_str(), error = %e, "failed to build worker runtime");
                        failures.fetch_add(1, Ordering::Relaxed);
                        return;
                    }
                };
                if runtime.block_on(task(cancel)).is_err() {
                    failures.fetch_add(1, Ordering::Relaxed);
                }
            })
            .map_err(|e| EngineError::Worker(format!("{name}: {e}")))?;

        debug!(worker = name.as_str(), "queue worker spawned");
        self.workers.push(Worker { name, handle });
        Ok(())
    }

    /// 인메모리 백엔드로 큐 루프를 띄웁니다.
    fn start_memory(&mut self, transports: Vec<MemoryTransport>) -> Result<(), EngineError> {
        let ctx = self.processing_context();
        let config = Arc::clone(&self.config);
        let base = &config.base;

        for transport in transports {
            let queue_id = transport.queue_id();
            if base.zero_copy_mode {
                let processor =
                    FrameProcessor::new(transport, ctx.clone(), Dispatch::Inline(self.analyzer.clone()));
                self.spawn_worker(format!("ironsift-q{queue_id}"), move |cancel| {
                    processor.run(cancel)
                })?;
            } else {
                let (producer, consumer) = FeatureRing::with_bytes(base.buffer_size);
                let filter = FrameProcessor::early_filter(transport, ctx.clone(), producer);
                let analysis = RingProcessor::new(
                    consumer,
                    self.analyzer.clone(),
                    self.stats.clone(),
                    config.batch_size(),
                    config.poll_timeout(),
                );
                self.spawn_worker(format!("ironsift-ring-q{queue_id}"), move |cancel| {
                    analysis.run(cancel)
                })?;
                self.spawn_worker(format!("ironsift-q{queue_id}"), move |cancel| {
                    filter.run(cancel)
                })?;
            }
        }
        Ok(())
    }

    /// 커널 XDP 프로그램을 로드하고 큐 루프를 띄운 뒤 마지막에 어태치합니다.
    #[cfg(target_os = "linux")]
    fn start_kernel(&mut self) -> Result<KernelPoll, EngineError> {
        use crate::transport::xsk::XskTransport;

        let config = Arc::clone(&self.config);
        let base = &config.base;

        let mut attachment = KernelAttachment::load(&config)?;
        let kernel_stats = attachment.take_stats()?;

        if base.zero_copy_mode {
            let sockets = base
                .queue_ids()
                .map(|queue_id| {
                    XskTransport::open(
                        &base.interface,
                        queue_id,
                        base.frame_count,
                        base.frame_size,
                        true,
                    )
                })
                .collect::<Result<Vec<_>, _>>()?;
            attachment.register_sockets(&sockets)?;

            let ctx = self.processing_context();
            let pre_admitted = ctx.policy().pre_admitted();
            let ctx = ctx.with_policy(pre_admitted);
            for socket in sockets {
                let queue_id = socket.queue_id();
                let processor =
                    FrameProcessor::new(socket, ctx.clone(), Dispatch::Inline(self.analyzer.clone()));
                self.spawn_worker(format!("ironsift-q{queue_id}"), move |cancel| {
                    processor.run(cancel)
                })?;
            }
        } else {
            let ring = attachment.take_feature_ring()?;
            let analysis = RingProcessor::new(
                ring,
                self.analyzer.clone(),
                self.stats.clone(),
                config.batch_size(),
                config.poll_timeout(),
            );
            self.spawn_worker("ironsift-ring".to_owned(), move |cancel| analysis.run(cancel))?;
        }

        attachment.attach()?;
        self.attachment = Some(attachment);
        Ok(Box::new(move || kernel_stats.read()))
    }

    #[cfg(not(target_os = "linux"))]
    fn start_kernel(&mut self) -> Result<KernelPoll, EngineError> {
        Err(EngineError::Unsupported(
            "XDP capture is only supported on Linux".to_owned(),
        ))
    }

    fn launch(&mut self) -> Result<Option<KernelPoll>, EngineError> {
        match self.backend.take() {
            Some(CaptureBackend::Kernel) => {
                self.backend = Some(CaptureBackend::Kernel);
                self.start_kernel().map(Some)
            }
            Some(CaptureBackend::Memory(transports)) => {
                self.start_memory(transports)?;
                Ok(None)
            }
            None => Err(EngineError::Worker(
                "memory backend was consumed by a previous run".to_owned(),
            )),
        }
    }

    fn spawn_reporter(&mut self, mut kernel: Option<KernelPoll>) {
        let period = self.config.stats_interval();
        let cancel = self.cancel.clone();
        let stats = self.stats.clone();
        let latest = Arc::clone(&self.latest);

        self.reporter = Some(tokio::spawn(async move {
            let mut reporter = StatsReporter::new();
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            ticker.tick().await;

            loop {
                let stopped = tokio::select! {
                    biased;
                    () = cancel.cancelled() => true,
                    _ = ticker.tick() => false,
                };
                if let Some(poll) = kernel.as_mut() {
                    stats.set_kernel(poll());
                }
                let report = reporter.update(stats.snapshot());
                debug!(
                    total = report.snapshot.total,
                    pps = report.packets_per_second,
                    drop_ratio = report.interval_drop_ratio,
                    "stats report"
                );
                *latest.lock().unwrap_or_else(PoisonError::into_inner) = Some(report);
                if stopped {
                    break;
                }
            }
        }));
    }

    /// 큐 스레드를 정지 대기 시간 안에 합류시킵니다. 초과하면 스레드를 분리합니다.
    async fn join_workers(&mut self) -> Result<(), IronsiftError> {
        let workers = std::mem::take(&mut self.workers);
        if workers.is_empty() {
            return Ok(());
        }

        let failures = Arc::clone(&self.failures);
        let join = tokio::task::spawn_blocking(move || {
            for worker in workers {
                if worker.handle.join().is_err() {
                    error!(worker = worker.name.as_str(), "queue worker panicked");
                    failures.fetch_add(1, Ordering::Relaxed);
                }
            }
        });

        let grace = STOP_GRACE + self.config.poll_timeout();
        match tokio::time::timeout(grace, join).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => Err(EngineError::Worker(format!("join task failed: {e}")).into()),
            Err(_) => {
                warn!(grace_ms = grace.as_millis() as u64, "queue workers did not stop in time, detaching");
                Err(PipelineError::Timeout(format!(
                    "queue workers still running after {grace:?}"
                ))
                .into())
            }
        }
    }

    #[cfg(target_os = "linux")]
    fn detach(&mut self) {
        if let Some(mut attachment) = self.attachment.take() {
            if let Err(e) = attachment.detach() {
                warn!(error = %e, "xdp detach failed");
            }
        }
    }

    #[cfg(not(target_os = "linux"))]
    fn detach(&mut self) {}
}

impl Pipeline for XdpEngine {
    /// 엔진을 시작합니다.
    ///
    /// 1. 큐 스레드 생성 (커널 백엔드: 프로그램 로드, 소켓/링 연결)
    /// 2. 커널 백엔드면 인터페이스 어태치 (마지막 단계)
    /// 3. 통계 보고 태스크 스폰
    ///
    /// 어느 단계에서 실패하든 이미 띄운 스레드를 정리하고 어태치를 해제한 뒤 에러를 반환합니다.
    async fn start(&mut self) -> Result<(), IronsiftError> {
        if self.running {
            return Err(PipelineError::AlreadyRunning.into());
        }

        info!(
            interface = self.config.base.interface.as_str(),
            queues = self.config.base.queue_count,
            zero_copy = self.config.base.zero_copy_mode,
            sampling_rate = self.config.base.sampling_rate,
            "starting xdp engine"
        );

        self.cancel = CancellationToken::new();
        self.failures.store(0, Ordering::Relaxed);

        let kernel = match self.launch() {
            Ok(kernel) => kernel,
            Err(e) => {
                error!(error = %e, "xdp engine failed to start");
                self.cancel.cancel();
                self.detach();
                if let Err(join_err) = self.join_workers().await {
                    warn!(error = %join_err, "cleanup after failed start incomplete");
                }
                return Err(e.into());
            }
        };

        self.spawn_reporter(kernel);
        self.running = true;
        info!(workers = self.workers.len(), "xdp engine started");
        Ok(())
    }

    /// 엔진을 정지합니다.
    ///
    /// 1. XDP 프로그램 해제 (항상 시도, 새 트래픽 유입 차단)
    /// 2. 정지 신호 (대기 중인 폴링도 깨움)
    /// 3. 큐 스레드 합류 (남은 rx 프레임과 링 레코드를 처리한 뒤 종료)
    /// 4. 마지막 보고서 갱신
    async fn stop(&mut self) -> Result<(), IronsiftError> {
        if !self.running {
            return Err(PipelineError::NotRunning.into());
        }

        info!("stopping xdp engine");
        self.detach();
        self.cancel.cancel();
        let joined = self.join_workers().await;

        if let Some(reporter) = self.reporter.take() {
            if let Err(e) = reporter.await {
                warn!(error = %e, "stats reporter task failed");
            }
        }

        self.running = false;
        let s = self.stats.snapshot();
        info!(
            total = s.total,
            redirected = s.redirected,
            dropped = s.dropped,
            "xdp engine stopped"
        );
        joined
    }

    /// 엔진의 현재 상태를 확인합니다.
    async fn health_check(&self) -> HealthStatus {
        if !self.running {
            return HealthStatus::Unhealthy("not running".to_owned());
        }

        let failed = self.failures.load(Ordering::Relaxed);
        if failed > 0 && failed >= self.workers.len() {
            return HealthStatus::Unhealthy("all queue loops exited with an error".to_owned());
        }
        if failed > 0 {
            return HealthStatus::Degraded(format!("{failed} queue loop(s) exited with an error"));
        }

        if let Some(report) = self.report() {
            if report.interval_drop_ratio > DEGRADED_DROP_RATIO {
                return HealthStatus::Degraded(format!(
                    "drop ratio {:.1}% in the last interval",
                    report.interval_drop_ratio * 100.0
                ));
            }
        }

        HealthStatus::Healthy
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ironsift_core::config::CaptureConfig;

    fn memory_config(zero_copy: bool) -> EngineConfig {
        let mut base = CaptureConfig::default();
        base.zero_copy_mode = zero_copy;
        base.frame_count = 64;
        base.frame_size = 2048;
        base.batch_size = 16;
        base.poll_timeout_ms = 20;
        EngineConfig::from_core(&base)
    }

    #[test]
    fn build_requires_config() {
        let result = XdpEngine::builder().build();
        assert!(matches!(
            result,
            Err(IronsiftError::Pipeline(PipelineError::InitFailed(_)))
        ));
    }

    #[test]
    fn build_rejects_invalid_config() {
        let mut config = memory_config(true);
        config.base.sampling_rate = 0;
        assert!(XdpEngine::builder().config(config).build().is_err());
    }

    #[test]
    fn memory_backend_creates_one_pool_per_queue() {
        let mut config = memory_config(true);
        config.base.queue_id = 2;
        config.base.queue_count = 3;
        let (backend, injectors) = CaptureBackend::memory(&config);
        assert_eq!(injectors.len(), 3);
        let CaptureBackend::Memory(transports) = backend else {
            panic!("expected memory backend");
        };
        let ids: Vec<u32> = transports.iter().map(|t| t.queue_id()).collect();
        assert_eq!(ids, vec![2, 3, 4]);
        assert_eq!(injectors[0].free_frames(), 64);
    }

    #[tokio::test]
    async fn lifecycle_errors() {
        let config = memory_config(true);
        let (backend, _injectors) = CaptureBackend::memory(&config);
        let mut engine = XdpEngine::builder()
            .config(config.clone())
            .backend(backend)
            .build()
            .unwrap();

        assert!(engine.health_check().await.is_unhealthy());
        assert!(matches!(
            engine.stop().await,
            Err(IronsiftError::Pipeline(PipelineError::NotRunning))
        ));

        engine.start().await.unwrap();
        assert!(engine.is_running());
        assert!(matches!(
            engine.start().await,
            Err(IronsiftError::Pipeline(PipelineError::AlreadyRunning))
        ));
        assert!(matches!(
            engine.update_config(config.clone()),
            Err(IronsiftError::Pipeline(PipelineError::AlreadyRunning))
        ));
        assert!(engine.health_check().await.is_healthy());

        engine.stop().await.unwrap();
        assert!(!engine.is_running());
        assert!(engine.update_config(config).is_ok());

        // 인메모리 백엔드는 재사용할 수 없습니다.
        assert!(engine.start().await.is_err());
        assert!(!engine.is_running());
    }

    #[cfg(not(target_os = "linux"))]
    #[tokio::test]
    async fn kernel_backend_is_unsupported_off_linux() {
        let mut engine = XdpEngine::builder()
            .config(memory_config(true))
            .build()
            .unwrap();
        assert!(engine.start().await.is_err());
        assert!(!engine.is_running());
    }
}
