//! Round-trip latency instrumentation. Diagnostic only.

use crate::sync::Timestamp;
use std::collections::VecDeque;

/// One answered request.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct LatencySample {
    pub request_timestamp: Timestamp,
    pub round_trip_ms: f64,
    pub generator_process_ms: f64,
}

/// Rolling statistics over the sample window.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct LatencyStats {
    pub samples: usize,
    pub mean_round_trip_ms: f64,
    pub max_round_trip_ms: f64,
    pub mean_process_ms: f64,
    pub max_process_ms: f64,
}

/// Keeps the last `capacity` samples.
#[derive(Clone, Debug)]
pub struct LatencyMonitor {
    window: VecDeque<LatencySample>,
    capacity: usize,
}

impl LatencyMonitor {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            window: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Record a reply that echoed `request_timestamp`, received at `now`.
    pub fn record(&mut self, request_timestamp: Timestamp, now: Timestamp, generator_process_ms: f64) -> LatencySample {
        let sample = LatencySample {
            request_timestamp,
            round_trip_ms: now.saturating_sub(request_timestamp) as f64 / 1_000.0,
            generator_process_ms,
        };
        if self.window.len() == self.capacity {
            self.window.pop_front();
        }
        self.window.push_back(sample);
        log::trace!(
            "[LATENCY] round trip {:.2}ms, generator {:.2}ms",
            sample.round_trip_ms,
            sample.generator_process_ms
        );
        sample
    }

    pub fn stats(&self) -> LatencyStats {
        if self.window.is_empty() {
            return LatencyStats::default();
        }
        let n = self.window.len() as f64;
        let mut stats = LatencyStats {
            samples: self.window.len(),
            ..LatencyStats::default()
        };
        for sample in &self.window {
            stats.mean_round_trip_ms += sample.round_trip_ms / n;
            stats.mean_process_ms += sample.generator_process_ms / n;
            stats.max_round_trip_ms = stats.max_round_trip_ms.max(sample.round_trip_ms);
            stats.max_process_ms = stats.max_process_ms.max(sample.generator_process_ms);
        }
        stats
    }

    pub fn clear(&mut self) {
        self.window.clear();
    }
}
