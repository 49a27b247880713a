//! 플로우 추적 — 도착 간격 계산용 제한 크기 테이블
//!
//! 플로우 해시 → {마지막 관측 시각, 패킷 수}. 단일 뮤텍스가 조회와 갱신을 함께 감쌉니다.
//! 만료 제거는 별도 타이머 없이 새 플로우를 삽입할 때 수행하며,
//! 상한에 도달하면 가장 오래 관측되지 않은 플로우부터 제거합니다.

use std::collections::{BTreeSet, HashMap};
use std::sync::Mutex;

use ironsift_core::config::FlowTrackingConfig;

/// 플로우 상태
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FlowEntry {
    /// 마지막 관측 시각 (ns)
    pub last_seen_ns: u64,
    /// 관측한 패킷 수
    pub packet_count: u64,
}

#[derive(Debug, Default)]
struct FlowMap {
    entries: HashMap<u64, FlowEntry>,
    /// (last_seen_ns, flow_hash) 순서 인덱스
    by_age: BTreeSet<(u64, u64)>,
}

impl FlowMap {
    fn remove_oldest(&mut self) -> bool {
        match self.by_age.pop_first() {
            Some((_, hash)) => {
                self.entries.remove(&hash);
                true
            }
            None => false,
        }
    }

    fn evict_expired(&mut self, now_ns: u64, timeout_ns: u64) -> usize {
        let mut evicted = 0;
        while let Some(&(seen, _)) = self.by_age.first() {
            if now_ns.saturating_sub(seen) <= timeout_ns {
                break;
            }
            self.remove_oldest();
            evicted += 1;
        }
        evicted
    }
}

/// 제한 크기 플로우 테이블
#[derive(Debug)]
pub struct FlowTable {
    inner: Mutex<FlowMap>,
    max_flows: usize,
    timeout_ns: u64,
}

impl FlowTable {
    /// 설정으로 테이블을 생성합니다. `max_flows`는 최소 1.
    pub fn new(config: &FlowTrackingConfig) -> Self {
        Self {
            inner: Mutex::new(FlowMap::default()),
            max_flows: config.max_flows.max(1),
            timeout_ns: config.timeout_secs.saturating_mul(1_000_000_000),
        }
    }

    /// 패킷 하나를 관측하고 같은 플로우 직전 패킷과의 간격(µs)을 반환합니다.
    ///
    /// 첫 패킷(또는 만료 후 재등장)이면 `None`. 간격은 `u32::MAX - 1`로 포화됩니다.
    /// 직전 관측보다 이른 타임스탬프(큐 간 순서 역전)도 간격을 알 수 없으므로 `None`이며,
    /// 이때 항목의 마지막 관측 시각은 뒤로 돌아가지 않습니다.
    pub fn observe(&self, flow_hash: u64, now_ns: u64) -> Option<u32> {
        let mut map = self.inner.lock().unwrap_or_else(|e| e.into_inner());

        if let Some(entry) = map.entries.get(&flow_hash).copied() {
            if now_ns.saturating_sub(entry.last_seen_ns) <= self.timeout_ns {
                let last = entry.last_seen_ns.max(now_ns);
                map.by_age.remove(&(entry.last_seen_ns, flow_hash));
                map.by_age.insert((last, flow_hash));
                map.entries.insert(
                    flow_hash,
                    FlowEntry {
                        last_seen_ns: last,
                        packet_count: entry.packet_count + 1,
                    },
                );
                if now_ns < entry.last_seen_ns {
                    return None;
                }
                let gap_us = (now_ns - entry.last_seen_ns) / 1_000;
                return Some(u32::try_from(gap_us).unwrap_or(u32::MAX).min(u32::MAX - 1));
            }
            // 만료된 항목은 새 플로우로 취급
            map.by_age.remove(&(entry.last_seen_ns, flow_hash));
            map.entries.remove(&flow_hash);
        }

        map.evict_expired(now_ns, self.timeout_ns);
        while map.entries.len() >= self.max_flows {
            if !map.remove_oldest() {
                break;
            }
        }
        map.entries.insert(
            flow_hash,
            FlowEntry {
                last_seen_ns: now_ns,
                packet_count: 1,
            },
        );
        map.by_age.insert((now_ns, flow_hash));
        None
    }

    /// 플로우 상태를 조회합니다.
    pub fn get(&self, flow_hash: u64) -> Option<FlowEntry> {
        let map = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        map.entries.get(&flow_hash).copied()
    }

    /// 추적 중인 플로우 수
    pub fn len(&self) -> usize {
        self.inner
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .entries
            .len()
    }

    /// 비어 있는지 여부
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// 최대 플로우 수
    pub fn max_flows(&self) -> usize {
        self.max_flows
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MS: u64 = 1_000_000;
    const SEC: u64 = 1_000_000_000;

    fn table(max_flows: usize, timeout_secs: u64) -> FlowTable {
        FlowTable::new(&FlowTrackingConfig {
            enabled: true,
            max_flows,
            timeout_secs,
        })
    }

    #[test]
    fn first_packet_has_no_gap() {
        let t = table(8, 60);
        assert_eq!(t.observe(1, 10 * MS), None);
        assert_eq!(t.observe(1, 12 * MS), Some(2_000));
        assert_eq!(t.get(1).unwrap().packet_count, 2);
    }

    #[test]
    fn expired_flow_restarts() {
        let t = table(8, 1);
        t.observe(1, 0);
        assert_eq!(t.observe(1, 2 * SEC), None);
        assert_eq!(t.get(1).unwrap().packet_count, 1);
    }

    #[test]
    fn cap_evicts_least_recently_seen() {
        let t = table(2, 60);
        t.observe(1, MS);
        t.observe(2, 2 * MS);
        // 1을 다시 보면 2가 가장 오래됨
        t.observe(1, 3 * MS);
        t.observe(3, 4 * MS);
        assert_eq!(t.len(), 2);
        assert!(t.get(2).is_none());
        assert!(t.get(1).is_some());
        assert!(t.get(3).is_some());
    }

    #[test]
    fn insert_evicts_expired_entries() {
        let t = table(100, 1);
        for h in 0..10 {
            t.observe(h, h * MS);
        }
        assert_eq!(t.len(), 10);
        t.observe(999, 5 * SEC);
        assert_eq!(t.len(), 1);
    }

    #[test]
    fn out_of_order_timestamp_does_not_rewind() {
        let t = table(8, 60);
        t.observe(7, 10 * MS);
        assert_eq!(t.observe(7, 5 * MS), None);
        let entry = t.get(7).unwrap();
        assert_eq!(entry.last_seen_ns, 10 * MS);
        assert_eq!(entry.packet_count, 2);
        // 다음 정상 패킷의 간격은 가장 늦은 관측 기준
        assert_eq!(t.observe(7, 13 * MS), Some(3_000));
    }

    #[test]
    fn huge_gap_saturates_below_unknown_marker() {
        let t = FlowTable::new(&FlowTrackingConfig {
            enabled: true,
            max_flows: 4,
            timeout_secs: u64::MAX,
        });
        t.observe(1, 0);
        assert_eq!(t.observe(1, u64::MAX), Some(u32::MAX - 1));
    }
}
