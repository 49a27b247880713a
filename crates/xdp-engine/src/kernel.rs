//! 커널 XDP 프로그램 로드/어태치 (Linux 전용)
//!
//! [`KernelAttachment`]는 eBPF 오브젝트 하나의 수명을 관리합니다.
//!
//! 시작 순서는 실패 시 부분 상태가 남지 않도록 짜여 있습니다:
//! 1. 권한 확인, 인터페이스 확인, 오브젝트 로드, `CONFIG` 기록, 프로그램 검증기 로드
//! 2. 모드별 자원 연결 (`XSKS` 소켓 등록 또는 `FEATURES` 링 인수)
//! 3. 마지막에 인터페이스 어태치
//!
//! 어태치 이후의 실패와 정상 종료 모두 [`KernelAttachment::detach`]를 거치며,
//! `Drop`에서도 한 번 더 시도합니다.

use std::os::fd::AsRawFd;
use std::time::Duration;

use aya::maps::{Array, MapData, PerCpuArray, RingBuf, XskMap};
use aya::programs::xdp::XdpLinkId;
use aya::programs::{Xdp, XdpFlags};
use aya::{Ebpf, EbpfLoader};
use aya_log::EbpfLogger;
use ironsift_xdp_common::{
    FEATURE_WIRE_SIZE, FeatureWire, MAP_CONFIG, MAP_FEATURES, MAP_STATS, MAP_XSKS, PROG_REDIRECT,
    PROG_RING, STATS_MAX_ENTRIES, XdpConfigValue,
};
use tokio::io::unix::AsyncFd;
use tracing::{debug, info, warn};

use crate::config::{EngineConfig, XdpMode};
use crate::error::EngineError;
use crate::stats::KernelCounters;
use crate::transport::ring::RecordSource;
use crate::transport::xsk::{XskTransport, interface_index};

const PAGE_SIZE: usize = 4096;

/// 캡처에 필요한 권한이 있는지 확인합니다 (유효 UID 0).
pub fn has_capture_privileges() -> bool {
    // SAFETY: geteuid는 실패하지 않습니다.
    unsafe { libc::geteuid() == 0 }
}

/// 커널 RingBuf 크기: 페이지 크기의 2의 거듭제곱 배
fn ring_bytes(buffer_size: usize) -> u32 {
    let bytes = buffer_size.max(PAGE_SIZE).next_power_of_two();
    u32::try_from(bytes).unwrap_or(1 << 31)
}

impl From<XdpMode> for XdpFlags {
    fn from(mode: XdpMode) -> Self {
        match mode {
            XdpMode::Skb => XdpFlags::SKB_MODE,
            XdpMode::Native => XdpFlags::DRV_MODE,
            XdpMode::Hw => XdpFlags::HW_MODE,
        }
    }
}

/// 로드된 eBPF 오브젝트와 어태치 상태
pub struct KernelAttachment {
    bpf: Ebpf,
    _logger: Option<EbpfLogger>,
    program: &'static str,
    interface: String,
    mode: XdpMode,
    link: Option<XdpLinkId>,
}

impl KernelAttachment {
    /// 오브젝트를 로드하고 설정을 기록한 뒤 프로그램을 검증기에 올립니다.
    ///
    /// 이 단계까지는 인터페이스에 아무것도 어태치하지 않습니다.
    pub fn load(config: &EngineConfig) -> Result<Self, EngineError> {
        let base = &config.base;
        if !has_capture_privileges() {
            return Err(EngineError::PermissionDenied(
                "loading XDP programs requires root (CAP_BPF + CAP_NET_ADMIN)".to_owned(),
            ));
        }
        interface_index(&base.interface)?;

        let program = if base.zero_copy_mode {
            PROG_REDIRECT
        } else {
            PROG_RING
        };

        let mut bpf = EbpfLoader::new()
            .set_max_entries(MAP_FEATURES, ring_bytes(base.buffer_size))
            .load_file(&base.xdp_program_path)
            .map_err(|e| {
                EngineError::ProgramLoad(format!("{}: {e}", base.xdp_program_path))
            })?;

        let logger = match EbpfLogger::init(&mut bpf) {
            Ok(logger) => Some(logger),
            Err(e) => {
                debug!(error = %e, "eBPF logger not initialized");
                None
            }
        };

        {
            let map = bpf
                .map_mut(MAP_CONFIG)
                .ok_or_else(|| EngineError::map(MAP_CONFIG, "not found in object"))?;
            let mut array: Array<_, XdpConfigValue> =
                Array::try_from(map).map_err(|e| EngineError::map(MAP_CONFIG, e.to_string()))?;
            array
                .set(0, config.kernel_config(), 0)
                .map_err(|e| EngineError::map(MAP_CONFIG, e.to_string()))?;
        }

        let xdp = Self::xdp_program(&mut bpf, program)?;
        xdp.load()
            .map_err(|e| EngineError::ProgramLoad(format!("{program}: {e}")))?;

        info!(
            program,
            path = base.xdp_program_path.as_str(),
            "xdp program loaded"
        );

        Ok(Self {
            bpf,
            _logger: logger,
            program,
            interface: base.interface.clone(),
            mode: config.xdp_mode(),
            link: None,
        })
    }

    fn xdp_program<'a>(bpf: &'a mut Ebpf, name: &str) -> Result<&'a mut Xdp, EngineError> {
        bpf.program_mut(name)
            .ok_or_else(|| EngineError::ProgramLoad(format!("program '{name}' not found")))?
            .try_into()
            .map_err(|e| EngineError::ProgramLoad(format!("{name}: {e}")))
    }

    /// AF_XDP 소켓을 큐 번호로 `XSKS` 맵에 등록합니다.
    pub fn register_sockets(&mut self, sockets: &[XskTransport]) -> Result<(), EngineError> {
        use crate::transport::FrameTransport;

        let map = self
            .bpf
            .map_mut(MAP_XSKS)
            .ok_or_else(|| EngineError::map(MAP_XSKS, "not found in object"))?;
        let mut xsks =
            XskMap::try_from(map).map_err(|e| EngineError::map(MAP_XSKS, e.to_string()))?;
        for socket in sockets {
            xsks.set(socket.queue_id(), socket.as_raw_fd(), 0)
                .map_err(|e| EngineError::map(MAP_XSKS, e.to_string()))?;
        }
        Ok(())
    }

    /// `FEATURES` 링을 인수해 레코드 공급원으로 만듭니다.
    pub fn take_feature_ring(&mut self) -> Result<KernelRing, EngineError> {
        let map = self
            .bpf
            .take_map(MAP_FEATURES)
            .ok_or_else(|| EngineError::map(MAP_FEATURES, "not found in object"))?;
        let ring =
            RingBuf::try_from(map).map_err(|e| EngineError::map(MAP_FEATURES, e.to_string()))?;
        Ok(KernelRing {
            readiness: None,
            ring,
            pending: None,
        })
    }

    /// `STATS` 카운터 배열을 인수합니다.
    pub fn take_stats(&mut self) -> Result<KernelStatsReader, EngineError> {
        let map = self
            .bpf
            .take_map(MAP_STATS)
            .ok_or_else(|| EngineError::map(MAP_STATS, "not found in object"))?;
        let array =
            PerCpuArray::try_from(map).map_err(|e| EngineError::map(MAP_STATS, e.to_string()))?;
        Ok(KernelStatsReader { array })
    }

    /// 인터페이스에 프로그램을 어태치합니다.
    pub fn attach(&mut self) -> Result<(), EngineError> {
        if self.link.is_some() {
            return Ok(());
        }
        let interface = self.interface.clone();
        let flags = XdpFlags::from(self.mode);
        let program = self.program;
        let xdp = Self::xdp_program(&mut self.bpf, program)?;
        let link = xdp
            .attach(&interface, flags)
            .map_err(|e| EngineError::Attach {
                interface: interface.clone(),
                reason: e.to_string(),
            })?;
        self.link = Some(link);
        info!(interface = interface.as_str(), program, mode = ?self.mode, "xdp program attached");
        Ok(())
    }

    /// 인터페이스에서 프로그램을 떼어냅니다. 어태치되지 않았으면 아무것도 하지 않습니다.
    pub fn detach(&mut self) -> Result<(), EngineError> {
        let Some(link) = self.link.take() else {
            return Ok(());
        };
        let program = self.program;
        let xdp = Self::xdp_program(&mut self.bpf, program)?;
        xdp.detach(link).map_err(|e| EngineError::Attach {
            interface: self.interface.clone(),
            reason: format!("detach: {e}"),
        })?;
        info!(interface = self.interface.as_str(), "xdp program detached");
        Ok(())
    }
}

impl Drop for KernelAttachment {
    fn drop(&mut self) {
        if let Err(e) = self.detach() {
            warn!(error = %e, "failed to detach xdp program on drop");
        }
    }
}

/// 커널 `STATS` PerCpuArray 읽기
pub struct KernelStatsReader {
    array: PerCpuArray<MapData, u64>,
}

impl KernelStatsReader {
    /// 모든 CPU 값을 합산해 읽습니다. 읽지 못한 인덱스는 0.
    pub fn read(&self) -> KernelCounters {
        let mut raw = [0u64; STATS_MAX_ENTRIES as usize];
        for (index, slot) in (0..STATS_MAX_ENTRIES).zip(raw.iter_mut()) {
            if let Ok(values) = self.array.get(&index, 0) {
                *slot = values.iter().fold(0u64, |acc, v| acc.wrapping_add(*v));
            }
        }
        KernelCounters::from_raw(&raw)
    }
}

/// 커널 `FEATURES` RingBuf 소비자
pub struct KernelRing {
    readiness: Option<AsyncFd<std::os::fd::RawFd>>,
    ring: RingBuf<MapData>,
    pending: Option<FeatureWire>,
}

impl KernelRing {
    fn read_one(ring: &mut RingBuf<MapData>) -> Option<FeatureWire> {
        loop {
            let item = ring.next()?;
            if item.len() < FEATURE_WIRE_SIZE {
                warn!(len = item.len(), "short record in feature ring, skipping");
                continue;
            }
            // SAFETY: 길이를 확인했고 FeatureWire는 #[repr(C)] POD입니다.
            return Some(unsafe { std::ptr::read_unaligned(item.as_ptr().cast::<FeatureWire>()) });
        }
    }
}

// SAFETY: RingBuf의 매핑은 이 소비자가 단독 소유하며 한 스레드에서만 읽습니다.
unsafe impl Send for KernelRing {}

impl RecordSource for KernelRing {
    async fn wait_ready(&mut self, timeout: Duration) -> Result<bool, EngineError> {
        if self.pending.is_some() {
            return Ok(true);
        }
        if let Some(record) = Self::read_one(&mut self.ring) {
            self.pending = Some(record);
            return Ok(true);
        }
        if self.readiness.is_none() {
            self.readiness = Some(AsyncFd::new(self.ring.as_raw_fd())?);
        }

        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let Some(readiness) = self.readiness.as_ref() else {
                return Ok(false);
            };
            match tokio::time::timeout_at(deadline, readiness.readable()).await {
                Err(_) => return Ok(false),
                Ok(Err(e)) => return Err(EngineError::Io(e)),
                Ok(Ok(mut guard)) => guard.clear_ready(),
            }
            if let Some(record) = Self::read_one(&mut self.ring) {
                self.pending = Some(record);
                return Ok(true);
            }
        }
    }

    fn next_record(&mut self) -> Option<FeatureWire> {
        self.pending
            .take()
            .or_else(|| Self::read_one(&mut self.ring))
    }

    /// 엔진은 소비자를 멈추기 전에 프로그램을 해제하므로, 정지 시점 이후로는 새 레코드가 없습니다.
    fn is_closed(&self) -> bool {
        true
    }
}
