//! Exchange counters and per-kind latency for one session.
//!
//! Catalog fetches and inferences are timed apart: a catalog round trip is
//! a few hundred bytes, an inference carries whole tiles, and mixing them
//! would hide either.

use std::collections::VecDeque;
use std::time::Duration;

/// Samples kept per kind for percentiles. Totals cover every sample.
pub const RECENT_SAMPLES: usize = 512;

/// Which round trip a latency sample belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExchangeKind {
    Catalog,
    Inference,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct LatencySummary {
    pub count: u64,
    pub min_us: u64,
    pub max_us: u64,
    pub mean_us: f64,
    /// Nearest-rank percentiles over the last [`RECENT_SAMPLES`] exchanges.
    pub p50_us: u64,
    pub p95_us: u64,
}

#[derive(Debug, Clone, Default)]
pub struct ExchangeStatsSnapshot {
    pub connects: u64,
    pub teardowns: u64,
    pub catalogs: u64,
    pub sent: u64,
    pub received: u64,
    pub errors: u64,
    pub catalog_latency: LatencySummary,
    pub inference_latency: LatencySummary,
}

#[derive(Debug, Default)]
pub struct ExchangeStats {
    connects: u64,
    teardowns: u64,
    catalogs: u64,
    sent: u64,
    received: u64,
    errors: u64,
    catalog: LatencyWindow,
    inference: LatencyWindow,
}

impl ExchangeStats {
    pub fn on_connect(&mut self) {
        self.connects += 1;
    }

    pub fn on_teardown(&mut self) {
        self.teardowns += 1;
    }

    pub fn on_catalog(&mut self) {
        self.catalogs += 1;
    }

    pub fn on_sent(&mut self) {
        self.sent += 1;
    }

    pub fn on_received(&mut self, kind: ExchangeKind, dt: Duration) {
        self.received += 1;
        match kind {
            ExchangeKind::Catalog => self.catalog.record(dt),
            ExchangeKind::Inference => self.inference.record(dt),
        }
    }

    pub fn on_error(&mut self) {
        self.errors += 1;
    }

    pub fn snapshot(&self) -> ExchangeStatsSnapshot {
        ExchangeStatsSnapshot {
            connects: self.connects,
            teardowns: self.teardowns,
            catalogs: self.catalogs,
            sent: self.sent,
            received: self.received,
            errors: self.errors,
            catalog_latency: self.catalog.summary(),
            inference_latency: self.inference.summary(),
        }
    }
}

#[derive(Debug, Default)]
struct LatencyWindow {
    count: u64,
    total_us: u128,
    min_us: u64,
    max_us: u64,
    recent: VecDeque<u64>,
}

impl LatencyWindow {
    fn record(&mut self, dt: Duration) {
        let us = u64::try_from(dt.as_micros()).unwrap_or(u64::MAX);
        self.min_us = if self.count == 0 { us } else { self.min_us.min(us) };
        self.max_us = self.max_us.max(us);
        self.count += 1;
        self.total_us += u128::from(us);
        if self.recent.len() == RECENT_SAMPLES {
            self.recent.pop_front();
        }
        self.recent.push_back(us);
    }

    fn summary(&self) -> LatencySummary {
        if self.count == 0 {
            return LatencySummary::default();
        }
        let mut sorted: Vec<u64> = self.recent.iter().copied().collect();
        sorted.sort_unstable();
        LatencySummary {
            count: self.count,
            min_us: self.min_us,
            max_us: self.max_us,
            mean_us: self.total_us as f64 / self.count as f64,
            p50_us: nearest_rank(&sorted, 0.50),
            p95_us: nearest_rank(&sorted, 0.95),
        }
    }
}

/// `sorted` must be non-empty and ascending.
fn nearest_rank(sorted: &[u64], q: f64) -> u64 {
    let rank = (q * sorted.len() as f64).ceil() as usize;
    sorted[rank.clamp(1, sorted.len()) - 1]
}
