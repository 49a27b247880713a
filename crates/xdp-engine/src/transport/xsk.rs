//! AF_XDP 소켓 전송 계층 (Linux 전용)
//!
//! 큐마다 UMEM 영역 하나와 fill/rx 링 한 쌍을 가집니다. XDP 프로그램이 `XSKS` 맵을 통해
//! 프레임을 이 소켓으로 리다이렉트하면 커널이 fill 큐의 프레임을 채워 rx 링에 올립니다.
//! 처리 루프는 rx 링에서 디스크립터를 꺼내고, 처리 후 프레임 주소를 fill 링으로 되돌립니다.
//!
//! 복사 없이 UMEM 영역을 직접 읽으며, 영역은 시작 시 한 번 매핑된 뒤 해제 시점까지 유지됩니다.

use std::ffi::CString;
use std::io;
use std::mem;
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd, RawFd};
use std::ptr;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use tokio::io::unix::AsyncFd;
use tracing::{debug, info};

use super::{FrameTransport, monotonic_ns};
use crate::error::EngineError;

const AF_XDP: i32 = 44;
const SOL_XDP: i32 = 283;
const XDP_MMAP_OFFSETS: i32 = 1;
const XDP_RX_RING: i32 = 2;
const XDP_UMEM_REG: i32 = 4;
const XDP_UMEM_FILL_RING: i32 = 5;
const XDP_UMEM_COMPLETION_RING: i32 = 6;
const XDP_STATISTICS: i32 = 7;

const XDP_COPY: u16 = 1 << 1;
const XDP_ZEROCOPY: u16 = 1 << 2;
const XDP_USE_NEED_WAKEUP: u16 = 1 << 3;

const XDP_RING_NEED_WAKEUP: u32 = 1 << 0;

const XDP_PGOFF_RX_RING: i64 = 0;
const XDP_UMEM_PGOFF_FILL_RING: i64 = 0x1_0000_0000;

#[repr(C)]
#[derive(Default)]
#[allow(dead_code)]
struct XdpUmemReg {
    addr: u64,
    len: u64,
    chunk_size: u32,
    headroom: u32,
    flags: u32,
}

#[repr(C)]
#[derive(Default, Clone, Copy)]
struct XdpRingOffset {
    producer: u64,
    consumer: u64,
    desc: u64,
    flags: u64,
}

#[repr(C)]
#[derive(Default)]
#[allow(dead_code)]
struct XdpMmapOffsets {
    rx: XdpRingOffset,
    tx: XdpRingOffset,
    fr: XdpRingOffset,
    cr: XdpRingOffset,
}

#[repr(C)]
#[derive(Clone, Copy, Default)]
#[allow(dead_code)]
struct XdpDesc {
    addr: u64,
    len: u32,
    options: u32,
}

#[repr(C)]
#[allow(dead_code)]
struct SockaddrXdp {
    sxdp_family: u16,
    sxdp_flags: u16,
    sxdp_ifindex: u32,
    sxdp_queue_id: u32,
    sxdp_shared_umem_fd: u32,
}

/// 커널 소켓 통계 (오래된 커널은 앞의 세 필드만 채웁니다)
#[repr(C)]
#[derive(Default)]
#[allow(dead_code)]
struct XdpStatistics {
    rx_dropped: u64,
    rx_invalid_descs: u64,
    tx_invalid_descs: u64,
    rx_ring_full: u64,
    rx_fill_ring_empty_descs: u64,
    tx_ring_empty_descs: u64,
}

/// 익명 매핑된 UMEM 영역
struct Umem {
    area: *mut u8,
    size: usize,
    frame_size: u32,
    free_frames: Vec<u64>,
}

impl Umem {
    fn new(frame_count: u32, frame_size: u32) -> io::Result<Self> {
        let size = frame_count as usize * frame_size as usize;
        // SAFETY: 새 익명 매핑을 요청합니다.
        let area = unsafe {
            libc::mmap(
                ptr::null_mut(),
                size,
                libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_PRIVATE | libc::MAP_ANONYMOUS,
                -1,
                0,
            )
        };
        if area == libc::MAP_FAILED {
            return Err(io::Error::last_os_error());
        }

        Ok(Self {
            area: area.cast(),
            size,
            frame_size,
            free_frames: (0..u64::from(frame_count))
                .map(|i| i * u64::from(frame_size))
                .collect(),
        })
    }

    fn data(&self, addr: u64, len: u32) -> &[u8] {
        let start = usize::try_from(addr).unwrap_or(usize::MAX);
        let len = len as usize;
        if start.checked_add(len).is_none_or(|end| end > self.size) {
            return &[];
        }
        // SAFETY: [start, start+len)이 매핑 범위 안에 있음을 위에서 확인했습니다.
        unsafe { std::slice::from_raw_parts(self.area.add(start), len) }
    }

    /// 디스크립터 주소(헤드룸 포함)를 청크 시작 주소로 되돌립니다.
    fn chunk_base(&self, addr: u64) -> u64 {
        addr & !(u64::from(self.frame_size) - 1)
    }
}

impl Drop for Umem {
    fn drop(&mut self) {
        // SAFETY: new()에서 같은 크기로 매핑한 영역입니다.
        unsafe { libc::munmap(self.area.cast(), self.size) };
    }
}

/// mmap된 생산자/소비자 링
struct XdpRing {
    base: *mut u8,
    map_size: usize,
    producer: *mut AtomicU32,
    consumer: *mut AtomicU32,
    flags: *mut u32,
    ring: *mut u8,
    size: u32,
    mask: u32,
}

impl XdpRing {
    fn map(fd: RawFd, pgoff: i64, offsets: &XdpRingOffset, size: u32, entry: usize) -> io::Result<Self> {
        let map_size = offsets.desc as usize + size as usize * entry;
        // SAFETY: 소켓 fd의 링 영역을 공유 매핑합니다.
        let base = unsafe {
            libc::mmap(
                ptr::null_mut(),
                map_size,
                libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_SHARED | libc::MAP_POPULATE,
                fd,
                pgoff,
            )
        };
        if base == libc::MAP_FAILED {
            return Err(io::Error::last_os_error());
        }
        let base: *mut u8 = base.cast();
        // SAFETY: 커널이 알려준 오프셋은 매핑 범위 안에 있습니다.
        unsafe {
            Ok(Self {
                base,
                map_size,
                producer: base.add(offsets.producer as usize).cast(),
                consumer: base.add(offsets.consumer as usize).cast(),
                flags: base.add(offsets.flags as usize).cast(),
                ring: base.add(offsets.desc as usize),
                size,
                mask: size - 1,
            })
        }
    }

    fn producer(&self) -> u32 {
        // SAFETY: 매핑이 살아 있는 동안 유효한 정렬된 포인터입니다.
        unsafe { (*self.producer).load(Ordering::Acquire) }
    }

    fn consumer(&self) -> u32 {
        // SAFETY: 위와 같음
        unsafe { (*self.consumer).load(Ordering::Acquire) }
    }

    fn advance_producer(&self, n: u32) {
        // SAFETY: 위와 같음
        unsafe { (*self.producer).fetch_add(n, Ordering::Release) };
    }

    fn advance_consumer(&self, n: u32) {
        // SAFETY: 위와 같음
        unsafe { (*self.consumer).fetch_add(n, Ordering::Release) };
    }

    fn needs_wakeup(&self) -> bool {
        // SAFETY: 위와 같음
        unsafe { ptr::read_volatile(self.flags) & XDP_RING_NEED_WAKEUP != 0 }
    }
}

impl Drop for XdpRing {
    fn drop(&mut self) {
        // SAFETY: map()에서 같은 크기로 매핑한 영역입니다.
        unsafe { libc::munmap(self.base.cast(), self.map_size) };
    }
}

/// rx 링에서 꺼낸 프레임
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct XskFrame {
    addr: u64,
    len: u32,
    timestamp_ns: u64,
}

/// AF_XDP 소켓 하나 (큐 하나)
pub struct XskTransport {
    // 필드는 선언 순서로 해제됩니다: 등록 해제 → 링/UMEM 매핑 해제 → fd 닫기
    readiness: Option<AsyncFd<RawFd>>,
    fill: XdpRing,
    rx: XdpRing,
    umem: Umem,
    fd: OwnedFd,
    queue_id: u32,
    zero_copy: bool,
}

// SAFETY: 링과 UMEM 포인터는 이 구조체가 단독 소유하며 큐 스레드 하나만 접근합니다.
unsafe impl Send for XskTransport {}

fn sockopt<T>(fd: RawFd, name: i32, value: &T) -> io::Result<()> {
    // SAFETY: value는 name이 기대하는 #[repr(C)] 레이아웃입니다.
    let rc = unsafe {
        libc::setsockopt(
            fd,
            SOL_XDP,
            name,
            ptr::from_ref(value).cast(),
            mem::size_of::<T>() as libc::socklen_t,
        )
    };
    if rc < 0 {
        Err(io::Error::last_os_error())
    } else {
        Ok(())
    }
}

/// 인터페이스 이름을 인덱스로 변환합니다.
pub fn interface_index(interface: &str) -> Result<u32, EngineError> {
    let name = CString::new(interface)
        .map_err(|_| EngineError::InterfaceNotFound(interface.to_owned()))?;
    // SAFETY: NUL 종료 문자열을 전달합니다.
    let index = unsafe { libc::if_nametoindex(name.as_ptr()) };
    if index == 0 {
        Err(EngineError::InterfaceNotFound(interface.to_owned()))
    } else {
        Ok(index)
    }
}

impl XskTransport {
    /// 소켓을 열고 UMEM을 등록한 뒤 인터페이스 큐에 바인드합니다.
    ///
    /// `zero_copy`면 제로카피 바인드를 먼저 시도하고 실패하면 복사 모드로 내려갑니다.
    /// 중간에 실패하면 그때까지 만든 매핑과 fd는 모두 해제됩니다.
    pub fn open(
        interface: &str,
        queue_id: u32,
        frame_count: u32,
        frame_size: u32,
        zero_copy: bool,
    ) -> Result<Self, EngineError> {
        let ifindex = interface_index(interface)?;
        let err = |e: io::Error| EngineError::transport(queue_id, e.to_string());

        // SAFETY: 새 소켓을 만듭니다.
        let raw = unsafe { libc::socket(AF_XDP, libc::SOCK_RAW | libc::SOCK_CLOEXEC, 0) };
        if raw < 0 {
            let e = io::Error::last_os_error();
            if e.raw_os_error() == Some(libc::EPERM) {
                return Err(EngineError::PermissionDenied(format!(
                    "AF_XDP socket requires CAP_NET_RAW: {e}"
                )));
            }
            return Err(err(e));
        }
        // SAFETY: 방금 생성한 유효한 fd의 소유권을 가져옵니다.
        let fd = unsafe { OwnedFd::from_raw_fd(raw) };

        let umem = Umem::new(frame_count, frame_size).map_err(err)?;
        sockopt(
            raw,
            XDP_UMEM_REG,
            &XdpUmemReg {
                addr: umem.area as u64,
                len: umem.size as u64,
                chunk_size: frame_size,
                headroom: 0,
                flags: 0,
            },
        )
        .map_err(err)?;

        let ring_size = frame_count.next_power_of_two();
        for opt in [XDP_UMEM_FILL_RING, XDP_UMEM_COMPLETION_RING, XDP_RX_RING] {
            sockopt(raw, opt, &ring_size).map_err(err)?;
        }

        let mut offsets = XdpMmapOffsets::default();
        let mut optlen = mem::size_of::<XdpMmapOffsets>() as libc::socklen_t;
        // SAFETY: offsets는 커널이 채울 #[repr(C)] 구조체입니다.
        let rc = unsafe {
            libc::getsockopt(
                raw,
                SOL_XDP,
                XDP_MMAP_OFFSETS,
                ptr::from_mut(&mut offsets).cast(),
                &mut optlen,
            )
        };
        if rc < 0 {
            return Err(err(io::Error::last_os_error()));
        }

        let fill = XdpRing::map(
            raw,
            XDP_UMEM_PGOFF_FILL_RING,
            &offsets.fr,
            ring_size,
            mem::size_of::<u64>(),
        )
        .map_err(err)?;
        let rx = XdpRing::map(
            raw,
            XDP_PGOFF_RX_RING,
            &offsets.rx,
            ring_size,
            mem::size_of::<XdpDesc>(),
        )
        .map_err(err)?;

        let bind = |flags: u16| {
            let addr = SockaddrXdp {
                sxdp_family: AF_XDP as u16,
                sxdp_flags: flags | XDP_USE_NEED_WAKEUP,
                sxdp_ifindex: ifindex,
                sxdp_queue_id: queue_id,
                sxdp_shared_umem_fd: 0,
            };
            // SAFETY: sockaddr_xdp 레이아웃과 크기를 전달합니다.
            let rc = unsafe {
                libc::bind(
                    raw,
                    ptr::from_ref(&addr).cast(),
                    mem::size_of::<SockaddrXdp>() as libc::socklen_t,
                )
            };
            if rc == 0 {
                Ok(())
            } else {
                Err(io::Error::last_os_error())
            }
        };

        let bound_zero_copy = if zero_copy {
            match bind(XDP_ZEROCOPY) {
                Ok(()) => true,
                Err(e) => {
                    debug!(queue_id, error = %e, "zero-copy bind failed, falling back to copy mode");
                    bind(XDP_COPY).map_err(err)?;
                    false
                }
            }
        } else {
            bind(XDP_COPY).map_err(err)?;
            false
        };

        let mut transport = Self {
            readiness: None,
            fill,
            rx,
            umem,
            fd,
            queue_id,
            zero_copy: bound_zero_copy,
        };
        transport.refill();

        info!(
            interface,
            queue_id,
            frame_count,
            frame_size,
            zero_copy = bound_zero_copy,
            "af_xdp socket bound"
        );
        Ok(transport)
    }

    /// 제로카피 모드로 바인드되었는지 여부
    pub fn is_zero_copy(&self) -> bool {
        self.zero_copy
    }

    /// 빈 프레임을 fill 링에 넣습니다.
    fn refill(&mut self) {
        let in_flight = self.fill.producer().wrapping_sub(self.fill.consumer());
        let space = self.fill.size.saturating_sub(in_flight);
        let prod = self.fill.producer();
        let mut filled = 0u32;
        while filled < space {
            let Some(addr) = self.umem.free_frames.pop() else {
                break;
            };
            let idx = (prod.wrapping_add(filled) & self.fill.mask) as usize;
            // SAFETY: idx는 mask 안이며 fill 링 엔트리는 u64입니다.
            unsafe { *self.fill.ring.cast::<u64>().add(idx) = addr };
            filled += 1;
        }
        if filled > 0 {
            self.fill.advance_producer(filled);
            if self.fill.needs_wakeup() {
                self.kick();
            }
        }
    }

    fn kick(&self) {
        // SAFETY: 빈 버퍼로 recvfrom을 호출해 커널 수신 경로를 깨웁니다.
        unsafe {
            libc::recvfrom(
                self.fd.as_raw_fd(),
                ptr::null_mut(),
                0,
                libc::MSG_DONTWAIT,
                ptr::null_mut(),
                ptr::null_mut(),
            );
        }
    }

    fn rx_available(&self) -> u32 {
        self.rx.producer().wrapping_sub(self.rx.consumer())
    }
}

impl AsRawFd for XskTransport {
    fn as_raw_fd(&self) -> RawFd {
        self.fd.as_raw_fd()
    }
}

impl FrameTransport for XskTransport {
    type Frame = XskFrame;

    fn queue_id(&self) -> u32 {
        self.queue_id
    }

    async fn wait_rx(&mut self, timeout: Duration) -> Result<bool, EngineError> {
        if self.rx_available() > 0 {
            return Ok(true);
        }
        if self.fill.needs_wakeup() {
            self.kick();
        }
        if self.readiness.is_none() {
            self.readiness = Some(AsyncFd::new(self.fd.as_raw_fd())?);
        }
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let Some(readiness) = self.readiness.as_ref() else {
                return Ok(false);
            };
            match tokio::time::timeout_at(deadline, readiness.readable()).await {
                Err(_) => return Ok(self.rx_available() > 0),
                Ok(Err(e)) => return Err(EngineError::Io(e)),
                Ok(Ok(mut guard)) => guard.clear_ready(),
            }
            if self.rx_available() > 0 {
                return Ok(true);
            }
        }
    }

    fn receive(&mut self, max: usize, out: &mut Vec<XskFrame>) -> Result<usize, EngineError> {
        self.refill();

        let available = self.rx_available() as usize;
        let n = available.min(max);
        if n == 0 {
            return Ok(0);
        }

        let cons = self.rx.consumer();
        let timestamp_ns = monotonic_ns();
        for i in 0..n {
            let idx = (cons.wrapping_add(i as u32) & self.rx.mask) as usize;
            // SAFETY: idx는 mask 안이며 커널이 Release로 발행한 디스크립터입니다.
            let desc = unsafe { *self.rx.ring.cast::<XdpDesc>().add(idx) };
            out.push(XskFrame {
                addr: desc.addr,
                len: desc.len,
                timestamp_ns,
            });
        }
        self.rx.advance_consumer(n as u32);
        Ok(n)
    }

    fn frame_data<'a>(&'a self, frame: &'a XskFrame) -> &'a [u8] {
        self.umem.data(frame.addr, frame.len)
    }

    fn frame_timestamp(&self, frame: &XskFrame) -> u64 {
        frame.timestamp_ns
    }

    fn release(&mut self, frame: XskFrame) {
        let base = self.umem.chunk_base(frame.addr);
        self.umem.free_frames.push(base);
    }

    fn rx_dropped(&self) -> u64 {
        let mut stats = XdpStatistics::default();
        let mut optlen = mem::size_of::<XdpStatistics>() as libc::socklen_t;
        // SAFETY: stats는 커널이 채울 #[repr(C)] 구조체이며 optlen이 크기를 제한합니다.
        let rc = unsafe {
            libc::getsockopt(
                self.fd.as_raw_fd(),
                SOL_XDP,
                XDP_STATISTICS,
                ptr::from_mut(&mut stats).cast(),
                &mut optlen,
            )
        };
        if rc < 0 {
            return 0;
        }
        stats.rx_dropped + stats.rx_fill_ring_empty_descs
    }
}

impl Drop for XskTransport {
    fn drop(&mut self) {
        debug!(queue_id = self.queue_id, "closing af_xdp socket");
    }
}
