use std::time::Duration;

use crate::config::UploadConfig;

/// Picks the length of the next transfer.
///
/// Doubles after a chunk that finished in under half the target duration,
/// halves after a timeout, and never leaves `[min, max]`.
#[derive(Debug, Clone)]
pub struct ChunkSizer {
    current: u64,
    min: u64,
    max: u64,
    target: Duration,
}

impl ChunkSizer {
    pub fn new(initial: u64, min: u64, max: u64, target: Duration) -> Self {
        let min = min.max(1);
        let max = max.max(min);
        Self {
            current: initial.clamp(min, max),
            min,
            max,
            target,
        }
    }

    pub fn from_config(config: &UploadConfig) -> Self {
        Self::new(
            config.chunk_size,
            config.min_chunk_size,
            config.max_chunk_size,
            config.chunk_target_duration,
        )
    }

    pub fn current(&self) -> u64 {
        self.current
    }

    /// Length of the chunk starting at `offset` in a payload of `total` bytes.
    pub fn next_len(&self, offset: u64, total: u64) -> u64 {
        self.current.min(total.saturating_sub(offset))
    }

    pub fn record_success(&mut self, elapsed: Duration) {
        if elapsed < self.target / 2 {
            self.current = self.current.saturating_mul(2).min(self.max);
        }
    }

    pub fn record_timeout(&mut self) {
        self.current = (self.current / 2).max(self.min);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MIB: u64 = 1024 * 1024;

    fn sizer() -> ChunkSizer {
        ChunkSizer::new(4 * MIB, MIB, 16 * MIB, Duration::from_secs(10))
    }

    #[test]
    fn last_chunk_is_truncated() {
        let s = sizer();
        assert_eq!(s.next_len(0, 10 * MIB), 4 * MIB);
        assert_eq!(s.next_len(8 * MIB, 10 * MIB), 2 * MIB);
        assert_eq!(s.next_len(10 * MIB, 10 * MIB), 0);
    }

    #[test]
    fn fast_chunks_grow_up_to_max() {
        let mut s = sizer();
        s.record_success(Duration::from_secs(1));
        assert_eq!(s.current(), 8 * MIB);
        s.record_success(Duration::from_secs(1));
        s.record_success(Duration::from_secs(1));
        assert_eq!(s.current(), 16 * MIB);
    }

    #[test]
    fn slow_chunks_keep_size() {
        let mut s = sizer();
        s.record_success(Duration::from_secs(6));
        assert_eq!(s.current(), 4 * MIB);
    }

    #[test]
    fn timeouts_shrink_down_to_min() {
        let mut s = sizer();
        s.record_timeout();
        assert_eq!(s.current(), 2 * MIB);
        s.record_timeout();
        s.record_timeout();
        assert_eq!(s.current(), MIB);
    }

    #[test]
    fn fixed_bounds_never_change() {
        let mut s = ChunkSizer::new(1_000_000, 1_000_000, 1_000_000, Duration::from_secs(10));
        s.record_success(Duration::ZERO);
        s.record_timeout();
        assert_eq!(s.current(), 1_000_000);
    }
}
