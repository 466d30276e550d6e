//! Simulation metrics.

use std::collections::VecDeque;

use serde::Serialize;

/// Simulation metrics.
#[derive(Debug, Clone)]
pub struct SimulationMetrics {
    /// Total transfers attempted.
    pub total_transfers: u64,
    /// Committed transfers.
    pub successful_transfers: u64,
    /// Failed transfers.
    pub failed_transfers: u64,
    /// Failures the store marked retryable (lock timeouts, deadlocks).
    pub retryable_failures: u64,
    /// Latency samples (µs).
    latency_samples: VecDeque<u64>,
    /// Maximum samples to keep.
    max_samples: usize,
}

/// Serializable snapshot of [`SimulationMetrics`].
#[derive(Debug, Clone, Serialize)]
pub struct MetricsSummary {
    pub total_transfers: u64,
    pub successful_transfers: u64,
    pub failed_transfers: u64,
    pub retryable_failures: u64,
    pub success_rate: f64,
    pub average_latency_us: u64,
    pub p50_latency_us: u64,
    pub p99_latency_us: u64,
}

impl SimulationMetrics {
    /// Create new metrics.
    pub fn new() -> Self {
        Self {
            total_transfers: 0,
            successful_transfers: 0,
            failed_transfers: 0,
            retryable_failures: 0,
            latency_samples: VecDeque::with_capacity(10000),
            max_samples: 10000,
        }
    }

    /// Record a committed transfer.
    pub fn record_success(&mut self, latency_us: u64) {
        self.total_transfers += 1;
        self.successful_transfers += 1;

        if self.latency_samples.len() >= self.max_samples {
            self.latency_samples.pop_front();
        }
        self.latency_samples.push_back(latency_us);
    }

    /// Record a failed transfer.
    pub fn record_failure(&mut self, retryable: bool) {
        self.total_transfers += 1;
        self.failed_transfers += 1;
        if retryable {
            self.retryable_failures += 1;
        }
    }

    /// Get average latency in µs.
    pub fn average_latency_us(&self) -> u64 {
        if self.latency_samples.is_empty() {
            return 0;
        }

        let sum: u64 = self.latency_samples.iter().sum();
        sum / self.latency_samples.len() as u64
    }

    /// Get p50 latency.
    pub fn p50_latency_us(&self) -> u64 {
        self.percentile_latency(50)
    }

    /// Get p99 latency.
    pub fn p99_latency_us(&self) -> u64 {
        self.percentile_latency(99)
    }

    fn percentile_latency(&self, percentile: usize) -> u64 {
        if self.latency_samples.is_empty() {
            return 0;
        }

        let mut sorted: Vec<_> = self.latency_samples.iter().copied().collect();
        sorted.sort_unstable();

        let idx = (sorted.len() * percentile / 100).min(sorted.len() - 1);
        sorted[idx]
    }

    /// Get success rate.
    pub fn success_rate(&self) -> f64 {
        if self.total_transfers == 0 {
            return 0.0;
        }

        self.successful_transfers as f64 / self.total_transfers as f64
    }

    pub fn summary(&self) -> MetricsSummary {
        MetricsSummary {
            total_transfers: self.total_transfers,
            successful_transfers: self.successful_transfers,
            failed_transfers: self.failed_transfers,
            retryable_failures: self.retryable_failures,
            success_rate: self.success_rate(),
            average_latency_us: self.average_latency_us(),
            p50_latency_us: self.p50_latency_us(),
            p99_latency_us: self.p99_latency_us(),
        }
    }
}

impl Default for SimulationMetrics {
    fn default() -> Self {
        Self::new()
    }
}
