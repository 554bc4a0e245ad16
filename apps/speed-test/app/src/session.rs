use std::time::Instant;

use serde::Serialize;
use speed_test_types::{REFERENCE_PAYLOAD_MB, ROUNDS};

use crate::errors::SpeedTestError;

/// State of one measurement run between connection open and close.
#[derive(Debug)]
pub struct Session {
    round: usize,
    round_start: Instant,
    /// Round trip times in milliseconds, in round order.
    samples: Vec<f64>,
}

impl Session {
    /// Starts round 1 at `now`.
    pub(crate) fn start(now: Instant) -> Self {
        Self {
            round: 1,
            round_start: now,
            samples: Vec::with_capacity(ROUNDS),
        }
    }

    /// Round whose reply is currently awaited (1-based).
    pub fn round(&self) -> usize {
        self.round
    }

    pub fn rounds_completed(&self) -> usize {
        self.samples.len()
    }

    pub fn samples(&self) -> &[f64] {
        &self.samples
    }

    pub fn is_complete(&self) -> bool {
        self.samples.len() == ROUNDS
    }

    /// Records the reply of the current round, returning the sample in ms.
    pub(crate) fn record_reply(&mut self, now: Instant) -> Result<f64, SpeedTestError> {
        debug_assert!(self.samples.len() < ROUNDS);
        let elapsed = now
            .checked_duration_since(self.round_start)
            .ok_or(SpeedTestError::NegativeSample { round: self.round })?;
        let sample = elapsed.as_secs_f64() * 1000.0;
        self.samples.push(sample);
        Ok(sample)
    }

    /// Marks the current round's request as sent at `now`.
    pub(crate) fn request_sent(&mut self, now: Instant) {
        self.round_start = now;
    }

    pub(crate) fn next_round(&mut self) {
        self.round += 1;
    }

    pub(crate) fn into_report(self) -> RunReport {
        RunReport::from_samples(self.samples)
    }
}

/// Outcome of a completed run.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunReport {
    pub samples_ms: Vec<f64>,
    pub mean_ms: f64,
    /// Implied throughput in MB/s.
    pub rate_mb_per_s: f64,
}

impl RunReport {
    pub fn from_samples(samples_ms: Vec<f64>) -> Self {
        let mean_ms = mean_round_trip_ms(&samples_ms);
        Self {
            rate_mb_per_s: implied_rate(mean_ms),
            mean_ms,
            samples_ms,
        }
    }
}

/// Arithmetic mean of the samples; 0 for an empty slice.
pub fn mean_round_trip_ms(samples: &[f64]) -> f64 {
    if samples.is_empty() {
        return 0.0;
    }
    samples.iter().sum::<f64>() / samples.len() as f64
}

/// Throughput in MB/s implied by moving the reference payload once per mean round trip.
///
/// A zero mean yields `f64::INFINITY`.
pub fn implied_rate(mean_ms: f64) -> f64 {
    REFERENCE_PAYLOAD_MB / (mean_ms / 1000.0)
}
