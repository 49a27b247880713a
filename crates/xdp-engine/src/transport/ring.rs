//! 특징 레코드 링 버퍼 — 단일 생산자/단일 소비자
//!
//! 링 모드에서 조기 필터는 원본 프레임 대신 고정 크기 [`FeatureWire`]만 내보냅니다.
//! 용량은 레코드 수가 아니라 바이트(`buffer_size`)로 지정하며, 가득 차면 생산자는
//! 레코드를 버리고 `false`를 반환합니다. 생산자는 절대 블로킹하지 않습니다.
//!
//! 커널 RingBuf 소비자도 같은 [`RecordSource`] 인터페이스를 구현합니다.
//! 생산자가 드롭되면 링은 닫히며, 소비자는 남은 레코드를 모두 읽은 뒤 종료할 수 있습니다.

use std::cell::UnsafeCell;
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use ironsift_xdp_common::{FEATURE_WIRE_SIZE, FeatureWire};
use tokio::sync::Notify;

use crate::error::EngineError;

/// 특징 레코드 공급원
pub trait RecordSource: Send {
    /// 레코드가 생길 때까지 최대 `timeout` 대기합니다. 시간 초과면 `Ok(false)`.
    fn wait_ready(
        &mut self,
        timeout: Duration,
    ) -> impl Future<Output = Result<bool, EngineError>> + Send;

    /// 레코드 하나를 꺼냅니다.
    fn next_record(&mut self) -> Option<FeatureWire>;

    /// 더 이상 새 레코드가 들어오지 않으면 `true`. 이미 들어온 레코드는 남아 있을 수 있습니다.
    fn is_closed(&self) -> bool;
}

struct RingShared {
    slots: Box<[UnsafeCell<FeatureWire>]>,
    /// 소비자가 다음에 읽을 위치 (단조 증가)
    head: AtomicUsize,
    /// 생산자가 다음에 쓸 위치 (단조 증가)
    tail: AtomicUsize,
    /// 생산자 드롭 여부
    closed: AtomicBool,
    ready: Notify,
}

// SAFETY: 슬롯 [head, tail)은 소비자만, 나머지는 생산자만 접근합니다.
// 경계 이동은 Release 저장/Acquire 읽기로 발행되므로 같은 슬롯에 대한 동시 접근이 없습니다.
unsafe impl Sync for RingShared {}
// SAFETY: FeatureWire는 Send이며 공유 상태는 위 규칙으로 보호됩니다.
unsafe impl Send for RingShared {}

impl RingShared {
    fn capacity(&self) -> usize {
        self.slots.len()
    }

    fn len(&self) -> usize {
        self.tail
            .load(Ordering::Acquire)
            .wrapping_sub(self.head.load(Ordering::Acquire))
    }
}

/// 바이트 단위로 크기를 정하는 SPSC 링
pub struct FeatureRing;

impl FeatureRing {
    /// `buffer_bytes`를 담을 수 있는 링을 만들고 생산자/소비자 쌍을 반환합니다.
    ///
    /// 용량은 `buffer_bytes / 48` 레코드 (최소 1).
    pub fn with_bytes(buffer_bytes: usize) -> (RingProducer, RingConsumer) {
        let capacity = (buffer_bytes / FEATURE_WIRE_SIZE).max(1);
        let slots = (0..capacity)
            .map(|_| UnsafeCell::new(FeatureWire::zeroed()))
            .collect();
        let shared = Arc::new(RingShared {
            slots,
            head: AtomicUsize::new(0),
            tail: AtomicUsize::new(0),
            closed: AtomicBool::new(false),
            ready: Notify::new(),
        });
        (
            RingProducer {
                shared: Arc::clone(&shared),
            },
            RingConsumer { shared },
        )
    }
}

/// 링 생산자 (조기 필터 쪽)
pub struct RingProducer {
    shared: Arc<RingShared>,
}

impl RingProducer {
    /// 레코드를 넣습니다. 링이 가득 차 있으면 버리고 `false`.
    pub fn push(&mut self, record: &FeatureWire) -> bool {
        let shared = &self.shared;
        let tail = shared.tail.load(Ordering::Relaxed);
        let head = shared.head.load(Ordering::Acquire);
        if tail.wrapping_sub(head) >= shared.capacity() {
            return false;
        }

        let slot = &shared.slots[tail % shared.capacity()];
        // SAFETY: tail 슬롯은 소비자가 아직 볼 수 없는 생산자 전용 영역입니다.
        unsafe { *slot.get() = *record };
        shared.tail.store(tail.wrapping_add(1), Ordering::Release);

        if tail == head {
            shared.ready.notify_one();
        }
        true
    }

    /// 링 용량 (레코드 수)
    pub fn capacity(&self) -> usize {
        self.shared.capacity()
    }
}

impl Drop for RingProducer {
    fn drop(&mut self) {
        // 마지막 push 이후에 발행되어, 닫힘을 본 소비자는 남은 레코드도 모두 봅니다.
        self.shared.closed.store(true, Ordering::Release);
        self.shared.ready.notify_one();
    }
}

/// 링 소비자 (분석 쪽)
pub struct RingConsumer {
    shared: Arc<RingShared>,
}

impl RingConsumer {
    /// 레코드 하나를 꺼냅니다.
    pub fn pop(&mut self) -> Option<FeatureWire> {
        let shared = &self.shared;
        let head = shared.head.load(Ordering::Relaxed);
        let tail = shared.tail.load(Ordering::Acquire);
        if head == tail {
            return None;
        }

        let slot = &shared.slots[head % shared.capacity()];
        // SAFETY: head 슬롯은 생산자가 Release로 발행한 소비자 전용 영역입니다.
        let record = unsafe { *slot.get() };
        shared.head.store(head.wrapping_add(1), Ordering::Release);
        Some(record)
    }

    /// 대기 중인 레코드 수
    pub fn len(&self) -> usize {
        self.shared.len()
    }

    /// 비어 있는지 여부
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// 링 용량 (레코드 수)
    pub fn capacity(&self) -> usize {
        self.shared.capacity()
    }
}

impl RecordSource for RingConsumer {
    async fn wait_ready(&mut self, timeout: Duration) -> Result<bool, EngineError> {
        if !self.is_empty() {
            return Ok(true);
        }
        let _ = tokio::time::timeout(timeout, self.shared.ready.notified()).await;
        Ok(!self.is_empty())
    }

    fn next_record(&mut self) -> Option<FeatureWire> {
        self.pop()
    }

    fn is_closed(&self) -> bool {
        self.shared.closed.load(Ordering::Acquire)
    }
}
