//! Process-wide counters. Plain atomics rather than a metrics crate: the counter set
//! is small, fixed, and the teacher's own `/metrics`-shaped endpoints favor a direct
//! JSON snapshot over a Prometheus exposition format.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

#[derive(Debug, Default)]
pub struct Metrics {
    requests_ok: AtomicU64,
    requests_client_error: AtomicU64,
    requests_upstream_error: AtomicU64,
    requests_cancelled: AtomicU64,
    requests_timeout: AtomicU64,

    cache_hits: AtomicU64,
    cache_misses: AtomicU64,
    cache_stores: AtomicU64,
    cache_evictions: AtomicU64,
    cache_bytes: AtomicU64,

    stream_keepalives_sent: AtomicU64,
    stream_drain_waits: AtomicU64,
    stream_watchdog_fires: AtomicU64,

    latency_ms_sum: AtomicU64,
    latency_ms_count: AtomicU64,
    time_to_first_event_ms_sum: AtomicU64,
    time_to_first_event_ms_count: AtomicU64,
}

#[derive(Debug, Clone, Copy)]
pub enum Outcome {
    Ok,
    ClientError,
    UpstreamError,
    Cancelled,
    Timeout,
}

impl Metrics {
    pub fn record_request(&self, outcome: Outcome, latency_ms: u64) {
        let counter = match outcome {
            Outcome::Ok => &self.requests_ok,
            Outcome::ClientError => &self.requests_client_error,
            Outcome::UpstreamError => &self.requests_upstream_error,
            Outcome::Cancelled => &self.requests_cancelled,
            Outcome::Timeout => &self.requests_timeout,
        };
        counter.fetch_add(1, Ordering::Relaxed);
        self.latency_ms_sum.fetch_add(latency_ms, Ordering::Relaxed);
        self.latency_ms_count.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_time_to_first_event(&self, ms: u64) {
        self.time_to_first_event_ms_sum.fetch_add(ms, Ordering::Relaxed);
        self.time_to_first_event_ms_count.fetch_add(1, Ordering::Relaxed);
    }

    pub fn cache_hit(&self) {
        self.cache_hits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn cache_miss(&self) {
        self.cache_misses.fetch_add(1, Ordering::Relaxed);
    }

    pub fn cache_store(&self, bytes_delta: i64) {
        self.cache_stores.fetch_add(1, Ordering::Relaxed);
        if bytes_delta >= 0 {
            self.cache_bytes.fetch_add(bytes_delta as u64, Ordering::Relaxed);
        } else {
            self.cache_bytes.fetch_sub((-bytes_delta) as u64, Ordering::Relaxed);
        }
    }

    pub fn cache_eviction(&self, bytes_freed: u64) {
        self.cache_evictions.fetch_add(1, Ordering::Relaxed);
        self.cache_bytes.fetch_sub(bytes_freed, Ordering::Relaxed);
    }

    pub fn keepalive_sent(&self) {
        self.stream_keepalives_sent.fetch_add(1, Ordering::Relaxed);
    }

    pub fn drain_wait(&self) {
        self.stream_drain_waits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn watchdog_fired(&self) {
        self.stream_watchdog_fires.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        let load = |c: &AtomicU64| c.load(Ordering::Relaxed);

        MetricsSnapshot {
            requests_total: RequestsTotal {
                ok: load(&self.requests_ok),
                client_error: load(&self.requests_client_error),
                upstream_error: load(&self.requests_upstream_error),
                cancelled: load(&self.requests_cancelled),
                timeout: load(&self.requests_timeout),
            },
            cache_hits: load(&self.cache_hits),
            cache_misses: load(&self.cache_misses),
            cache_stores: load(&self.cache_stores),
            cache_evictions: load(&self.cache_evictions),
            cache_bytes: load(&self.cache_bytes),
            stream_keepalives_sent: load(&self.stream_keepalives_sent),
            stream_drain_waits: load(&self.stream_drain_waits),
            stream_watchdog_fires: load(&self.stream_watchdog_fires),
            latency_ms_avg: average(load(&self.latency_ms_sum), load(&self.latency_ms_count)),
            time_to_first_event_ms_avg: average(
                load(&self.time_to_first_event_ms_sum),
                load(&self.time_to_first_event_ms_count),
            ),
        }
    }
}

fn average(sum: u64, count: u64) -> f64 {
    if count == 0 { 0.0 } else { sum as f64 / count as f64 }
}

#[derive(Debug, Serialize)]
pub struct RequestsTotal {
    pub ok: u64,
    pub client_error: u64,
    pub upstream_error: u64,
    pub cancelled: u64,
    pub timeout: u64,
}

#[derive(Debug, Serialize)]
pub struct MetricsSnapshot {
    pub requests_total: RequestsTotal,
    pub cache_hits: u64,
    pub cache_misses: u64,
    pub cache_stores: u64,
    pub cache_evictions: u64,
    pub cache_bytes: u64,
    pub stream_keepalives_sent: u64,
    pub stream_drain_waits: u64,
    pub stream_watchdog_fires: u64,
    pub latency_ms_avg: f64,
    pub time_to_first_event_ms_avg: f64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn records_accumulate_across_calls() {
        let metrics = Metrics::default();
        metrics.record_request(Outcome::Ok, 100);
        metrics.record_request(Outcome::Ok, 300);
        metrics.cache_hit();
        metrics.cache_miss();

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.requests_total.ok, 2);
        assert_eq!(snapshot.latency_ms_avg, 200.0);
        assert_eq!(snapshot.cache_hits, 1);
        assert_eq!(snapshot.cache_misses, 1);
    }

    #[test]
    fn eviction_reduces_cache_bytes() {
        let metrics = Metrics::default();
        metrics.cache_store(1000);
        metrics.cache_eviction(400);
        assert_eq!(metrics.snapshot().cache_bytes, 600);
    }
}
