use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::warn;

use loadbeat_common::ResponseTimeStats;

use crate::executor::RequestOutcome;

/// Default number of raw latency samples retained per run.
pub const DEFAULT_SAMPLE_CAPACITY: usize = 10_000;

/// One point of the per-tick throughput series.
#[derive(Debug, Clone, Serialize)]
pub struct ThroughputPoint {
    pub timestamp: DateTime<Utc>,
    pub achieved_rps: f64,
    pub target_rps: f64,
}

/// One point of the per-tick error-rate series.
#[derive(Debug, Clone, Serialize)]
pub struct ErrorRatePoint {
    pub timestamp: DateTime<Utc>,
    pub error_rate_percent: f64,
}

/// Exact all-time request counters for one run.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct RequestCounts {
    pub total: u64,
    pub successful: u64,
    pub failed: u64,
    pub skipped: u64,
}

/// Per-run metrics aggregator.
///
/// Counters are exact for the life of the run; raw latency samples are
/// bounded by a ring buffer so memory stays flat no matter how long a run
/// lasts. Outcomes may arrive out of dispatch order; only their completion
/// timestamps matter for the time series.
pub struct MetricsAggregator {
    total_requests: AtomicU64,
    successful_requests: AtomicU64,
    failed_requests: AtomicU64,
    skipped_dispatches: AtomicU64,
    /// Set once the run reaches a terminal state; late outcomes from
    /// abandoned in-flight requests are dropped so terminal accounting
    /// stays exact.
    frozen: AtomicBool,
    inner: Mutex<Inner>,
}

struct Inner {
    samples: VecDeque<f64>,
    sample_capacity: usize,
    /// Exact running accumulators over every outcome ever recorded.
    latency_sum_ms: f64,
    latency_sq_sum_ms: f64,
    /// Outcomes since the last reporting tick.
    window_total: u64,
    window_failed: u64,
    throughput: VecDeque<ThroughputPoint>,
    error_rates: VecDeque<ErrorRatePoint>,
    series_capacity: usize,
}

impl MetricsAggregator {
    pub fn new(sample_capacity: usize, series_capacity: usize) -> Self {
        Self {
            total_requests: AtomicU64::new(0),
            successful_requests: AtomicU64::new(0),
            failed_requests: AtomicU64::new(0),
            skipped_dispatches: AtomicU64::new(0),
            frozen: AtomicBool::new(false),
            inner: Mutex::new(Inner {
                samples: VecDeque::with_capacity(sample_capacity),
                sample_capacity,
                latency_sum_ms: 0.0,
                latency_sq_sum_ms: 0.0,
                window_total: 0,
                window_failed: 0,
                throughput: VecDeque::new(),
                error_rates: VecDeque::new(),
                series_capacity,
            }),
        }
    }

    fn lock_inner(&self) -> MutexGuard<'_, Inner> {
        match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => {
                warn!("Metrics mutex was poisoned, recovering");
                poisoned.into_inner()
            }
        }
    }

    /// Record one completed request. O(1) amortized.
    pub fn record(&self, outcome: &RequestOutcome) {
        if self.frozen.load(Ordering::Relaxed) {
            return;
        }

        self.total_requests.fetch_add(1, Ordering::Relaxed);
        if outcome.success {
            self.successful_requests.fetch_add(1, Ordering::Relaxed);
        } else {
            self.failed_requests.fetch_add(1, Ordering::Relaxed);
        }

        let latency_ms = outcome.latency.as_secs_f64() * 1000.0;
        let mut inner = self.lock_inner();
        inner.latency_sum_ms += latency_ms;
        inner.latency_sq_sum_ms += latency_ms * latency_ms;
        if inner.samples.len() == inner.sample_capacity {
            inner.samples.pop_front();
        }
        inner.samples.push_back(latency_ms);
        inner.window_total += 1;
        if !outcome.success {
            inner.window_failed += 1;
        }
    }

    /// Count dispatches dropped because the worker pool was saturated.
    /// Skips were never sent and stay out of `total`.
    pub fn record_skipped(&self, count: u64) {
        self.skipped_dispatches.fetch_add(count, Ordering::Relaxed);
    }

    /// Count in-flight requests abandoned at run teardown as failed, keeping
    /// `total == successful + failed` exact at terminal states.
    pub fn record_abandoned(&self, count: u64) {
        self.total_requests.fetch_add(count, Ordering::Relaxed);
        self.failed_requests.fetch_add(count, Ordering::Relaxed);
    }

    /// Stop accepting outcomes; called once the run is terminal.
    pub fn freeze(&self) {
        self.frozen.store(true, Ordering::Relaxed);
    }

    pub fn counts(&self) -> RequestCounts {
        RequestCounts {
            total: self.total_requests.load(Ordering::Relaxed),
            successful: self.successful_requests.load(Ordering::Relaxed),
            failed: self.failed_requests.load(Ordering::Relaxed),
            skipped: self.skipped_dispatches.load(Ordering::Relaxed),
        }
    }

    /// Percentile statistics over the currently retained samples.
    pub fn response_time_stats(&self) -> ResponseTimeStats {
        let inner = self.lock_inner();
        let samples: Vec<f64> = inner.samples.iter().copied().collect();
        drop(inner);
        compute_percentiles(&samples)
    }

    /// Exact all-time mean latency from the running accumulators, which
    /// unlike the sample window never discards anything.
    pub fn all_time_mean_ms(&self) -> f64 {
        let total = self.total_requests.load(Ordering::Relaxed);
        if total == 0 {
            return 0.0;
        }
        let inner = self.lock_inner();
        inner.latency_sum_ms / total as f64
    }

    /// Close the current reporting window: append one throughput and one
    /// error-rate point and return the achieved RPS for that window.
    pub fn tick_point(&self, window: Duration, target_rps: f64) -> f64 {
        let timestamp = Utc::now();
        let window_secs = window.as_secs_f64().max(f64::EPSILON);

        let mut inner = self.lock_inner();
        let achieved_rps = inner.window_total as f64 / window_secs;
        let error_rate_percent = if inner.window_total == 0 {
            0.0
        } else {
            inner.window_failed as f64 / inner.window_total as f64 * 100.0
        };
        inner.window_total = 0;
        inner.window_failed = 0;

        if inner.throughput.len() == inner.series_capacity {
            inner.throughput.pop_front();
        }
        inner.throughput.push_back(ThroughputPoint {
            timestamp,
            achieved_rps,
            target_rps,
        });
        if inner.error_rates.len() == inner.series_capacity {
            inner.error_rates.pop_front();
        }
        inner.error_rates.push_back(ErrorRatePoint {
            timestamp,
            error_rate_percent,
        });

        achieved_rps
    }

    /// Time series oldest-first, truncated to the most recent `limit` points.
    pub fn time_series(&self, limit: usize) -> (Vec<ThroughputPoint>, Vec<ErrorRatePoint>) {
        let inner = self.lock_inner();
        let throughput = tail(&inner.throughput, limit);
        let error_rates = tail(&inner.error_rates, limit);
        (throughput, error_rates)
    }
}

fn tail<T: Clone>(points: &VecDeque<T>, limit: usize) -> Vec<T> {
    let skip = points.len().saturating_sub(limit);
    points.iter().skip(skip).cloned().collect()
}

/// Percentile statistics over a latency sample set (milliseconds).
///
/// Sorts a copy ascending and linearly interpolates between bracketing order
/// statistics at index `p/100 * (n-1)`. An empty set yields the zero value
/// rather than an error; a single sample is every statistic at once with a
/// standard deviation of zero.
pub fn compute_percentiles(samples: &[f64]) -> ResponseTimeStats {
    if samples.is_empty() {
        return ResponseTimeStats::default();
    }

    let mut sorted = samples.to_vec();
    sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));

    let n = sorted.len();
    let mean = sorted.iter().sum::<f64>() / n as f64;
    let std_dev = if n <= 1 {
        0.0
    } else {
        let variance =
            sorted.iter().map(|x| (x - mean).powi(2)).sum::<f64>() / (n as f64 - 1.0);
        variance.sqrt()
    };

    ResponseTimeStats {
        min_ms: sorted[0],
        max_ms: sorted[n - 1],
        mean_ms: mean,
        median_ms: percentile(&sorted, 50.0),
        p95_ms: percentile(&sorted, 95.0),
        p99_ms: percentile(&sorted, 99.0),
        std_dev_ms: std_dev,
    }
}

fn percentile(sorted: &[f64], p: f64) -> f64 {
    let n = sorted.len();
    if n == 1 {
        return sorted[0];
    }
    let rank = p / 100.0 * (n - 1) as f64;
    let lower = rank.floor() as usize;
    let upper = rank.ceil() as usize;
    if lower == upper {
        sorted[lower]
    } else {
        sorted[lower] + (rank - lower as f64) * (sorted[upper] - sorted[lower])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_sample_set_yields_zero_values() {
        let stats = compute_percentiles(&[]);
        assert_eq!(stats, ResponseTimeStats::default());
    }

    #[test]
    fn single_sample_is_every_statistic() {
        let stats = compute_percentiles(&[100.0]);
        assert_eq!(stats.min_ms, 100.0);
        assert_eq!(stats.max_ms, 100.0);
        assert_eq!(stats.mean_ms, 100.0);
        assert_eq!(stats.median_ms, 100.0);
        assert_eq!(stats.p95_ms, 100.0);
        assert_eq!(stats.p99_ms, 100.0);
        assert_eq!(stats.std_dev_ms, 0.0);
    }

    #[test]
    fn median_interpolates_between_order_statistics() {
        let stats = compute_percentiles(&[10.0, 20.0, 30.0, 40.0]);
        // rank = 0.5 * 3 = 1.5 -> halfway between 20 and 30
        assert_eq!(stats.median_ms, 25.0);
    }

    #[test]
    fn percentiles_are_monotonic() {
        let samples: Vec<f64> = (1..=500).map(|i| (i * 7 % 211) as f64).collect();
        let stats = compute_percentiles(&samples);
        assert!(stats.min_ms <= stats.median_ms);
        assert!(stats.median_ms <= stats.p95_ms);
        assert!(stats.p95_ms <= stats.p99_ms);
        assert!(stats.p99_ms <= stats.max_ms);
    }

    #[test]
    fn sample_window_is_bounded_while_counters_stay_exact() {
        let aggregator = MetricsAggregator::new(8, 16);
        for i in 0..100u64 {
            aggregator.record(&fake_outcome(i as f64, true));
        }

        assert_eq!(aggregator.counts().total, 100);
        assert_eq!(aggregator.counts().successful, 100);

        let stats = aggregator.response_time_stats();
        // Only the 8 most recent samples (92..=99) remain.
        assert_eq!(stats.min_ms, 92.0);
        assert_eq!(stats.max_ms, 99.0);
    }

    #[test]
    fn frozen_aggregator_drops_late_outcomes() {
        let aggregator = MetricsAggregator::new(16, 16);
        aggregator.record(&fake_outcome(5.0, true));
        aggregator.freeze();
        aggregator.record(&fake_outcome(5.0, false));

        let counts = aggregator.counts();
        assert_eq!(counts.total, 1);
        assert_eq!(counts.failed, 0);
    }

    #[test]
    fn abandoned_requests_count_as_failed() {
        let aggregator = MetricsAggregator::new(16, 16);
        aggregator.record(&fake_outcome(5.0, true));
        aggregator.freeze();
        aggregator.record_abandoned(3);

        let counts = aggregator.counts();
        assert_eq!(counts.total, 4);
        assert_eq!(counts.successful + counts.failed, counts.total);
    }

    #[test]
    fn tick_point_drains_the_window() {
        let aggregator = MetricsAggregator::new(16, 16);
        aggregator.record(&fake_outcome(5.0, true));
        aggregator.record(&fake_outcome(5.0, false));

        let achieved = aggregator.tick_point(Duration::from_secs(1), 10.0);
        assert_eq!(achieved, 2.0);

        // Window reset: the next point sees nothing.
        let achieved = aggregator.tick_point(Duration::from_secs(1), 10.0);
        assert_eq!(achieved, 0.0);

        let (throughput, error_rates) = aggregator.time_series(10);
        assert_eq!(throughput.len(), 2);
        assert_eq!(error_rates[0].error_rate_percent, 50.0);
    }

    fn fake_outcome(latency_ms: f64, success: bool) -> RequestOutcome {
        RequestOutcome {
            completed_at: Utc::now(),
            latency: Duration::from_secs_f64(latency_ms / 1000.0),
            success,
            status: if success { Some(200) } else { None },
            error: if success { None } else { Some("boom".to_string()) },
            response_bytes: 2,
        }
    }
}
