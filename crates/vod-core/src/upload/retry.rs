use std::time::Duration;

/// Ordered backoff delays for consecutive transient failures.
///
/// Attempt `n` (zero-based) waits `delays[n]`; past the end the last delay repeats.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetrySchedule {
    delays: Vec<Duration>,
}

impl RetrySchedule {
    pub fn new(delays: Vec<Duration>) -> Self {
        Self { delays }
    }

    pub fn delay_for(&self, attempt: u32) -> Duration {
        let idx = attempt as usize;
        self.delays
            .get(idx)
            .or_else(|| self.delays.last())
            .copied()
            .unwrap_or(Duration::ZERO)
    }

    pub fn delays(&self) -> &[Duration] {
        &self.delays
    }
}
