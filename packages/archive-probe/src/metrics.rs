//! Per-job counters, reported through `tracing` when the job ends.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;
use tracing::info;

/// Lock-free counters shared by every task of a job.
#[derive(Debug, Default)]
pub struct JobMetrics {
    bytes_fetched: AtomicU64,
    coordinates_fetched: AtomicUsize,
    pages_fetched: AtomicUsize,
    retries: AtomicUsize,
    matches_emitted: AtomicU64,
    in_flight: AtomicUsize,
    peak_in_flight: AtomicUsize,
}

impl JobMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_bytes(&self, bytes: u64) {
        self.bytes_fetched.fetch_add(bytes, Ordering::Relaxed);
    }

    pub fn record_coordinate(&self) {
        self.coordinates_fetched.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_page(&self) {
        self.pages_fetched.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_retry(&self) {
        self.retries.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_match(&self) {
        self.matches_emitted.fetch_add(1, Ordering::Relaxed);
    }

    /// Track one more running fetch pipeline; the guard decrements on drop.
    pub fn enter_fetch(&self) -> InFlightGuard<'_> {
        let now = self.in_flight.fetch_add(1, Ordering::AcqRel) + 1;
        self.peak_in_flight.fetch_max(now, Ordering::AcqRel);
        InFlightGuard { metrics: self }
    }

    pub fn bytes_fetched(&self) -> u64 {
        self.bytes_fetched.load(Ordering::Relaxed)
    }

    pub fn matches_emitted(&self) -> u64 {
        self.matches_emitted.load(Ordering::Relaxed)
    }

    pub fn pages_fetched(&self) -> usize {
        self.pages_fetched.load(Ordering::Relaxed)
    }

    pub fn retries(&self) -> usize {
        self.retries.load(Ordering::Relaxed)
    }

    pub fn peak_in_flight(&self) -> usize {
        self.peak_in_flight.load(Ordering::Acquire)
    }

    /// Log a one-line report of the job.
    pub fn report(&self, elapsed: Duration) {
        let secs = elapsed.as_secs_f64().max(f64::EPSILON);
        let bytes = self.bytes_fetched();
        info!(
            bytes_fetched = bytes,
            coordinates = self.coordinates_fetched.load(Ordering::Relaxed),
            pages = self.pages_fetched(),
            retries = self.retries(),
            matches = self.matches_emitted(),
            peak_in_flight = self.peak_in_flight(),
            mib_per_sec = format!("{:.2}", bytes as f64 / secs / (1024.0 * 1024.0)),
            elapsed_ms = elapsed.as_millis() as u64,
            "job metrics"
        );
    }
}

/// Decrements the in-flight gauge when dropped.
#[derive(Debug)]
pub struct InFlightGuard<'a> {
    metrics: &'a JobMetrics,
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.metrics.in_flight.fetch_sub(1, Ordering::AcqRel);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_in_flight_peak() {
        let metrics = JobMetrics::new();
        {
            let _a = metrics.enter_fetch();
            let _b = metrics.enter_fetch();
        }
        let _c = metrics.enter_fetch();
        assert_eq!(metrics.peak_in_flight(), 2);
    }
}
