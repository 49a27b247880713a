//! Built-in sample analyzer.
//!
//! Stands in for an ML model: flags high-entropy payloads and bare SYN
//! probes between ephemeral ports. Non-zero verdicts only show up in the
//! statistics (`ml_predictions`).

use ironsift_core::pipeline::FeatureAnalyzer;
use ironsift_core::types::{FeatureRecord, TrafficClass};

const TCP_SYN: u8 = 0x02;
const TCP_ACK: u8 = 0x10;

/// Verdict codes returned by [`EntropyAnalyzer`].
pub mod verdict {
    /// Nothing notable.
    pub const CLEAN: i32 = 0;
    /// Payload entropy above the threshold.
    pub const HIGH_ENTROPY: i32 = 1;
    /// SYN without ACK on suspicious traffic.
    pub const SYN_PROBE: i32 = 2;
}

/// Threshold-based analyzer.
#[derive(Debug, Clone, Copy)]
pub struct EntropyAnalyzer {
    threshold: u8,
}

impl EntropyAnalyzer {
    /// Create an analyzer flagging payloads with entropy above `threshold`.
    pub fn new(threshold: u8) -> Self {
        Self { threshold }
    }
}

impl FeatureAnalyzer for EntropyAnalyzer {
    fn analyze(&self, feature: &FeatureRecord) -> i32 {
        if feature.traffic_class == TrafficClass::Suspicious {
            if let Some(flags) = feature.tcp_flags() {
                if flags & TCP_SYN != 0 && flags & TCP_ACK == 0 {
                    return verdict::SYN_PROBE;
                }
            }
        }
        if feature.packet_entropy.is_some_and(|e| e > self.threshold) {
            return verdict::HIGH_ENTROPY;
        }
        verdict::CLEAN
    }
}
