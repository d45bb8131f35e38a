use std::sync::atomic::{AtomicU32, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

const END_TO_END_COUNTER_MASK: u32 = 0x000F_FFFF;

/// Allocates hop-by-hop and end-to-end identifiers for outbound requests.
///
/// Hop-by-hop ids increase monotonically from a random seed. End-to-end ids
/// carry the low 12 bits of the start time in their high bits and a
/// counter seeded at random in the low 20 bits (RFC 6733 §3).
#[derive(Debug)]
pub struct IdGenerator {
    hop_by_hop: AtomicU32,
    end_to_end_prefix: u32,
    end_to_end: AtomicU32,
}

impl IdGenerator {
    pub fn new() -> Self {
        let secs = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0);
        Self::with_seed(rand::random(), (secs as u32) << 20, rand::random())
    }

    /// Deterministic generator; `end_to_end_prefix` keeps only its high 12 bits
    pub fn with_seed(hop_by_hop: u32, end_to_end_prefix: u32, end_to_end: u32) -> Self {
        Self {
            hop_by_hop: AtomicU32::new(hop_by_hop),
            end_to_end_prefix: end_to_end_prefix & !END_TO_END_COUNTER_MASK,
            end_to_end: AtomicU32::new(end_to_end),
        }
    }

    pub fn next_hop_by_hop(&self) -> u32 {
        self.hop_by_hop.fetch_add(1, Ordering::Relaxed)
    }

    pub fn next_end_to_end(&self) -> u32 {
        let counter = self.end_to_end.fetch_add(1, Ordering::Relaxed);
        self.end_to_end_prefix | (counter & END_TO_END_COUNTER_MASK)
    }
}

impl Default for IdGenerator {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hop_by_hop_increments_and_wraps() {
        let ids = IdGenerator::with_seed(u32::MAX, 0, 0);
        assert_eq!(ids.next_hop_by_hop(), u32::MAX);
        assert_eq!(ids.next_hop_by_hop(), 0);
        assert_eq!(ids.next_hop_by_hop(), 1);
    }

    #[test]
    fn test_end_to_end_layout() {
        let ids = IdGenerator::with_seed(0, 0xABC0_0000, 0x000F_FFFF);
        assert_eq!(ids.next_end_to_end(), 0xABCF_FFFF);
        // counter wraps inside its 20 bits, the time prefix stays
        assert_eq!(ids.next_end_to_end(), 0xABC0_0000);
    }
}
