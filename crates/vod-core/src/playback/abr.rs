//! Level selection while `Auto` quality is selected.
//!
//! The policy is a seam: [`PlaybackSession`](super::PlaybackSession) only
//! feeds it throughput samples and buffer health and applies its decisions.
//! [`ThroughputPolicy`] is the default, a dual-EWMA bandwidth estimator with
//! hysteresis on both switch directions.

use std::time::Duration;

use serde::Serialize;
use tokio::time::Instant;
use tracing::debug;

use super::manifest::QualityLevel;
use crate::config::AbrConfig;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ThroughputSample {
    pub bytes: u64,
    pub duration: Duration,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AbrReason {
    Initial,
    ManualOverride,
    /// Reported by the pipeline rather than decided here.
    Engine,
    UpSwitch,
    DownSwitch,
    UrgentDownSwitch,
    MinInterval,
    NoEstimate,
    BufferTooLowForUpSwitch,
    AlreadyOptimal,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AbrDecision {
    pub target: usize,
    pub reason: AbrReason,
    pub changed: bool,
}

impl AbrDecision {
    fn stay(current: usize, reason: AbrReason) -> Self {
        Self {
            target: current,
            reason,
            changed: false,
        }
    }
}

pub trait LevelPolicy: Send {
    fn record_sample(&mut self, sample: ThroughputSample);

    /// Picks a level from `levels` (ascending bitrate). `current` is `None` before playback starts.
    fn choose(
        &mut self,
        levels: &[QualityLevel],
        current: Option<usize>,
        buffered_ahead_secs: f64,
        now: Instant,
    ) -> AbrDecision;

    /// Forgets switch history, e.g. after a manual override ends.
    fn reset(&mut self) {}
}

#[derive(Debug, Clone)]
struct Ewma {
    alpha: f64,
    last_estimate: f64,
    total_weight: f64,
}

impl Ewma {
    fn new(half_life_secs: f64) -> Self {
        Self {
            alpha: f64::exp(0.5_f64.ln() / half_life_secs.max(0.001)),
            last_estimate: 0.0,
            total_weight: 0.0,
        }
    }

    fn add_sample(&mut self, weight: f64, value: f64) {
        let adj_alpha = self.alpha.powf(weight.max(0.0));
        self.last_estimate = value * (1.0 - adj_alpha) + adj_alpha * self.last_estimate;
        self.total_weight += weight.max(0.0);
    }

    fn estimate(&self) -> f64 {
        if self.total_weight <= 0.0 {
            return 0.0;
        }
        let zero_factor = 1.0 - self.alpha.powf(self.total_weight);
        self.last_estimate / zero_factor.max(1e-6)
    }
}

#[derive(Debug, Clone)]
pub struct ThroughputPolicy {
    cfg: AbrConfig,
    fast: Ewma,
    slow: Ewma,
    last_switch: Option<Instant>,
}

impl ThroughputPolicy {
    const MIN_DURATION_MS: f64 = 0.5;

    pub fn new(cfg: AbrConfig) -> Self {
        Self {
            fast: Ewma::new(cfg.fast_half_life_secs),
            slow: Ewma::new(cfg.slow_half_life_secs),
            cfg,
            last_switch: None,
        }
    }

    /// Conservative estimate in bits per second: the lower of both averages.
    pub fn estimate_bps(&self) -> Option<f64> {
        let est = self.fast.estimate().min(self.slow.estimate());
        (est > 0.0).then_some(est)
    }

    fn can_switch_now(&self, now: Instant) -> bool {
        self.last_switch
            .is_none_or(|t| now.saturating_duration_since(t) >= self.cfg.min_switch_interval)
    }
}

impl Default for ThroughputPolicy {
    fn default() -> Self {
        Self::new(AbrConfig::default())
    }
}

impl LevelPolicy for ThroughputPolicy {
    fn record_sample(&mut self, sample: ThroughputSample) {
        if sample.bytes < self.cfg.min_sample_bytes {
            return;
        }
        let dur_ms = (sample.duration.as_secs_f64() * 1000.0).max(Self::MIN_DURATION_MS);
        let bps = sample.bytes as f64 * 8000.0 / dur_ms;
        let weight = dur_ms / 1000.0;
        self.fast.add_sample(weight, bps);
        self.slow.add_sample(weight, bps);
    }

    fn choose(
        &mut self,
        levels: &[QualityLevel],
        current: Option<usize>,
        buffered_ahead_secs: f64,
        now: Instant,
    ) -> AbrDecision {
        let Some(lowest) = levels.first() else {
            return AbrDecision::stay(current.unwrap_or(0), AbrReason::AlreadyOptimal);
        };
        let estimate = self.estimate_bps();

        let Some(current) = current.filter(|&i| i < levels.len()) else {
            // Start at the best level the estimate affords, or the lowest one.
            let target = estimate
                .map(|bps| best_under(levels, bps / self.cfg.throughput_safety_factor))
                .unwrap_or(lowest.index);
            return AbrDecision {
                target,
                reason: AbrReason::Initial,
                changed: true,
            };
        };

        let Some(estimate_bps) = estimate else {
            return AbrDecision::stay(current, AbrReason::NoEstimate);
        };

        let adjusted_bps = (estimate_bps / self.cfg.throughput_safety_factor).max(0.0);
        let current_bw = levels[current].bitrate as f64;
        let candidate = best_under(levels, adjusted_bps);
        let candidate_bw = levels[candidate].bitrate as f64;
        let urgent = buffered_ahead_secs <= self.cfg.urgent_down_switch_buffer_secs;

        debug!(
            current,
            candidate,
            estimate_bps,
            adjusted_bps,
            buffered_ahead_secs,
            "ABR evaluating"
        );

        if candidate_bw < current_bw && urgent {
            self.last_switch = Some(now);
            return AbrDecision {
                target: candidate,
                reason: AbrReason::UrgentDownSwitch,
                changed: true,
            };
        }

        if !self.can_switch_now(now) {
            return AbrDecision::stay(current, AbrReason::MinInterval);
        }

        if candidate_bw > current_bw {
            let buffer_ok = self.cfg.min_buffer_for_up_switch_secs <= 0.0
                || buffered_ahead_secs >= self.cfg.min_buffer_for_up_switch_secs;
            let headroom_ok = adjusted_bps >= candidate_bw * self.cfg.up_hysteresis_ratio;
            if buffer_ok && headroom_ok {
                self.last_switch = Some(now);
                return AbrDecision {
                    target: candidate,
                    reason: AbrReason::UpSwitch,
                    changed: true,
                };
            }
            return AbrDecision::stay(current, AbrReason::BufferTooLowForUpSwitch);
        }

        if candidate_bw < current_bw && adjusted_bps <= current_bw * self.cfg.down_hysteresis_ratio {
            self.last_switch = Some(now);
            return AbrDecision {
                target: candidate,
                reason: AbrReason::DownSwitch,
                changed: true,
            };
        }

        AbrDecision::stay(current, AbrReason::AlreadyOptimal)
    }

    fn reset(&mut self) {
        self.last_switch = None;
    }
}

/// Highest level whose bitrate fits `bps`, or the lowest level.
fn best_under(levels: &[QualityLevel], bps: f64) -> usize {
    levels
        .iter()
        .filter(|l| l.bitrate as f64 <= bps)
        .max_by_key(|l| l.bitrate)
        .or_else(|| levels.first())
        .map_or(0, |l| l.index)
}
