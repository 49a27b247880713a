//! 프로세스 내 프레임 풀 — UMEM 모델
//!
//! 시작 시 `frame_count × frame_size` 버퍼를 한 번 할당하고, 이후에는 fill 큐와
//! rx 큐 사이를 이동시키기만 합니다. 실행 중 재할당이나 증설은 없습니다.
//!
//! [`FrameInjector`]가 NIC 역할(fill → rx)을, [`MemoryTransport`]가 처리 루프 쪽
//! 수신 경로(rx → 처리 → fill)를 맡습니다. fill 큐가 비면 주입은 실패하고
//! 고갈 카운터가 증가합니다. 소비자가 프레임을 돌려줄 때까지의 자연스러운 배압입니다.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tokio::sync::Notify;
use tracing::{info, warn};

use super::{FrameTransport, monotonic_ns};
use crate::error::EngineError;

/// 프레임 주입 실패
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum InjectError {
    /// fill 큐가 비어 있음
    #[error("frame pool exhausted")]
    PoolExhausted,

    /// 프레임 크기 초과
    #[error("frame of {len} bytes exceeds frame size {frame_size}")]
    FrameTooLarge {
        /// 주입하려던 길이
        len: usize,
        /// 프레임 크기
        frame_size: usize,
    },
}

/// 수신된 프레임
///
/// 풀 버퍼의 소유권을 가지며, [`FrameTransport::release`]로만 풀에 돌아갑니다.
#[derive(Debug)]
pub struct PoolFrame {
    buf: Box<[u8]>,
    len: usize,
    timestamp_ns: u64,
}

impl PoolFrame {
    /// 프레임 바이트
    pub fn data(&self) -> &[u8] {
        &self.buf[..self.len]
    }
}

#[derive(Debug)]
struct PoolQueues {
    fill: Vec<Box<[u8]>>,
    rx: VecDeque<PoolFrame>,
}

#[derive(Debug)]
struct Pool {
    queue_id: u32,
    frame_size: usize,
    frame_count: usize,
    queues: Mutex<PoolQueues>,
    rx_ready: Notify,
    exhausted: AtomicU64,
    starved: AtomicBool,
}

impl Pool {
    fn queues(&self) -> MutexGuard<'_, PoolQueues> {
        self.queues.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// 프레임 풀에 패킷을 넣는 NIC 측 핸들
#[derive(Debug, Clone)]
pub struct FrameInjector {
    pool: Arc<Pool>,
}

impl FrameInjector {
    /// 현재 시각으로 프레임을 주입합니다.
    pub fn inject(&self, data: &[u8]) -> Result<(), InjectError> {
        self.inject_at(data, monotonic_ns())
    }

    /// 지정한 수신 시각으로 프레임을 주입합니다.
    pub fn inject_at(&self, data: &[u8], timestamp_ns: u64) -> Result<(), InjectError> {
        let pool = &self.pool;
        if data.len() > pool.frame_size {
            return Err(InjectError::FrameTooLarge {
                len: data.len(),
                frame_size: pool.frame_size,
            });
        }

        let mut queues = pool.queues();
        let Some(mut buf) = queues.fill.pop() else {
            drop(queues);
            pool.exhausted.fetch_add(1, Ordering::Relaxed);
            if !pool.starved.swap(true, Ordering::Relaxed) {
                warn!(queue_id = pool.queue_id, "frame pool exhausted, dropping frames");
            }
            return Err(InjectError::PoolExhausted);
        };

        buf[..data.len()].copy_from_slice(data);
        let was_empty = queues.rx.is_empty();
        queues.rx.push_back(PoolFrame {
            buf,
            len: data.len(),
            timestamp_ns,
        });
        drop(queues);

        if was_empty {
            pool.rx_ready.notify_one();
        }
        Ok(())
    }

    /// fill 큐에 남은 프레임 수
    pub fn free_frames(&self) -> usize {
        self.pool.queues().fill.len()
    }

    /// rx 큐에서 처리를 기다리는 프레임 수
    pub fn pending(&self) -> usize {
        self.pool.queues().rx.len()
    }

    /// 고갈로 잃은 누적 프레임 수
    pub fn exhausted(&self) -> u64 {
        self.pool.exhausted.load(Ordering::Relaxed)
    }
}

/// 프로세스 내 프레임 전송 계층
#[derive(Debug)]
pub struct MemoryTransport {
    pool: Arc<Pool>,
}

impl MemoryTransport {
    /// 큐 하나의 프레임 풀을 만들고 수신 경로와 주입 핸들을 반환합니다.
    pub fn new(queue_id: u32, frame_count: usize, frame_size: usize) -> (Self, FrameInjector) {
        let fill = (0..frame_count)
            .map(|_| vec![0u8; frame_size].into_boxed_slice())
            .collect();
        let pool = Arc::new(Pool {
            queue_id,
            frame_size,
            frame_count,
            queues: Mutex::new(PoolQueues {
                fill,
                rx: VecDeque::with_capacity(frame_count),
            }),
            rx_ready: Notify::new(),
            exhausted: AtomicU64::new(0),
            starved: AtomicBool::new(false),
        });
        (
            Self {
                pool: Arc::clone(&pool),
            },
            FrameInjector { pool },
        )
    }

    /// 풀 전체 프레임 수
    pub fn frame_count(&self) -> usize {
        self.pool.frame_count
    }

    /// 새 주입 핸들
    pub fn injector(&self) -> FrameInjector {
        FrameInjector {
            pool: Arc::clone(&self.pool),
        }
    }
}

impl FrameTransport for MemoryTransport {
    type Frame = PoolFrame;

    fn queue_id(&self) -> u32 {
        self.pool.queue_id
    }

    async fn wait_rx(&mut self, timeout: Duration) -> Result<bool, EngineError> {
        if !self.pool.queues().rx.is_empty() {
            return Ok(true);
        }
        // notify_one은 대기자가 없으면 허가를 남기므로 검사와 대기 사이의 주입을 놓치지 않습니다.
        let _ = tokio::time::timeout(timeout, self.pool.rx_ready.notified()).await;
        Ok(!self.pool.queues().rx.is_empty())
    }

    fn receive(&mut self, max: usize, out: &mut Vec<PoolFrame>) -> Result<usize, EngineError> {
        let mut queues = self.pool.queues();
        let n = max.min(queues.rx.len());
        out.extend(queues.rx.drain(..n));
        Ok(n)
    }

    fn frame_data<'a>(&'a self, frame: &'a PoolFrame) -> &'a [u8] {
        frame.data()
    }

    fn frame_timestamp(&self, frame: &PoolFrame) -> u64 {
        frame.timestamp_ns
    }

    fn release(&mut self, frame: PoolFrame) {
        self.pool.queues().fill.push(frame.buf);
        if self.pool.starved.swap(false, Ordering::Relaxed) {
            info!(queue_id = self.pool.queue_id, "frame pool recovered");
        }
    }

    fn rx_dropped(&self) -> u64 {
        self.pool.exhausted.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn frames_cycle_between_fill_and_rx() {
        let (mut transport, injector) = MemoryTransport::new(0, 2, 64);
        assert_eq!(injector.free_frames(), 2);

        injector.inject_at(&[1, 2, 3], 42).unwrap();
        assert_eq!(injector.free_frames(), 1);
        assert_eq!(injector.pending(), 1);

        assert!(transport.wait_rx(Duration::from_millis(10)).await.unwrap());
        let mut frames = Vec::new();
        assert_eq!(transport.receive(8, &mut frames).unwrap(), 1);
        assert_eq!(transport.frame_data(&frames[0]), &[1, 2, 3]);
        assert_eq!(transport.frame_timestamp(&frames[0]), 42);

        for frame in frames.drain(..) {
            transport.release(frame);
        }
        assert_eq!(injector.free_frames(), 2);
        assert_eq!(injector.pending(), 0);
    }

    #[test]
    fn exhaustion_counts_and_recovers() {
        let (mut transport, injector) = MemoryTransport::new(3, 1, 64);
        injector.inject(&[0; 10]).unwrap();
        assert_eq!(injector.inject(&[0; 10]), Err(InjectError::PoolExhausted));
        assert_eq!(injector.inject(&[0; 10]), Err(InjectError::PoolExhausted));
        assert_eq!(transport.rx_dropped(), 2);

        let mut frames = Vec::new();
        transport.receive(1, &mut frames).unwrap();
        transport.release(frames.pop().unwrap());

        assert!(injector.inject(&[0; 10]).is_ok());
        assert_eq!(transport.rx_dropped(), 2);
    }

    #[test]
    fn oversized_frame_is_rejected_without_consuming_pool() {
        let (_transport, injector) = MemoryTransport::new(0, 1, 16);
        assert_eq!(
            injector.inject(&[0; 17]),
            Err(InjectError::FrameTooLarge {
                len: 17,
                frame_size: 16
            })
        );
        assert_eq!(injector.free_frames(), 1);
        assert_eq!(injector.exhausted(), 0);
    }

    #[test]
    fn receive_respects_batch_limit() {
        let (mut transport, injector) = MemoryTransport::new(0, 8, 32);
        for i in 0..5u8 {
            injector.inject(&[i]).unwrap();
        }
        let mut frames = Vec::new();
        assert_eq!(transport.receive(3, &mut frames).unwrap(), 3);
        assert_eq!(transport.frame_data(&frames[2]), &[2]);
        assert_eq!(injector.pending(), 2);
    }

    #[tokio::test]
    async fn wait_times_out_without_traffic() {
        let (mut transport, _injector) = MemoryTransport::new(0, 4, 32);
        let ready = transport.wait_rx(Duration::from_millis(20)).await.unwrap();
        assert!(!ready);
    }

    #[tokio::test]
    async fn wait_wakes_on_injection() {
        let (mut transport, injector) = MemoryTransport::new(0, 4, 32);
        let handle = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            injector.inject(&[9]).unwrap();
        });
        let ready = transport.wait_rx(Duration::from_secs(5)).await.unwrap();
        assert!(ready);
        handle.await.unwrap();
    }
}
