//! Content-addressed cache for non-streaming, cache-eligible responses. Keyed by the
//! request [`Fingerprint`](crate::translate::Fingerprint), LRU-evicted under a byte
//! budget, with single-flight so concurrent callers for the same fingerprint share one
//! upstream call.

use std::{
    collections::HashMap,
    future::Future,
    sync::{Arc, Mutex},
};

use tokio::sync::Notify;

use crate::{error::RelayError, metrics::Metrics, translate::Fingerprint};

struct CacheEntry {
    response_bytes: Vec<u8>,
    size_bytes: usize,
}

#[derive(Default)]
struct State {
    entries: HashMap<Fingerprint, CacheEntry>,
    recency: HashMap<Fingerprint, u64>,
    clock: u64,
    in_flight: HashMap<Fingerprint, Arc<Notify>>,
}

pub struct RequestCache {
    max_bytes: u64,
    state: Mutex<State>,
}

impl RequestCache {
    pub fn new(max_bytes: u64) -> Self {
        Self {
            max_bytes,
            state: Mutex::new(State::default()),
        }
    }

    /// `0` disables the cache entirely: every lookup misses and nothing is stored.
    pub fn is_enabled(&self) -> bool {
        self.max_bytes > 0
    }

    fn lookup_locked(state: &mut State, fingerprint: &Fingerprint) -> Option<Vec<u8>> {
        state.clock += 1;
        let clock = state.clock;
        let bytes = state.entries.get(fingerprint)?.response_bytes.clone();
        state.recency.insert(*fingerprint, clock);
        Some(bytes)
    }

    pub fn lookup(&self, fingerprint: &Fingerprint) -> Option<Vec<u8>> {
        if !self.is_enabled() {
            return None;
        }
        let mut state = self.state.lock().expect("cache mutex poisoned");
        Self::lookup_locked(&mut state, fingerprint)
    }

    fn store_locked(&self, state: &mut State, fingerprint: Fingerprint, bytes: Vec<u8>, metrics: &Metrics) {
        state.clock += 1;
        let clock = state.clock;
        let size_bytes = bytes.len();

        if let Some(previous) = state.entries.insert(fingerprint, CacheEntry { response_bytes: bytes, size_bytes }) {
            metrics.cache_store(size_bytes as i64 - previous.size_bytes as i64);
        } else {
            metrics.cache_store(size_bytes as i64);
        }
        state.recency.insert(fingerprint, clock);

        self.evict_over_budget(state, metrics);
    }

    fn evict_over_budget(&self, state: &mut State, metrics: &Metrics) {
        let mut total: u64 = state.entries.values().map(|entry| entry.size_bytes as u64).sum();

        while total > self.max_bytes {
            let Some((&victim, _)) = state.recency.iter().min_by_key(|&(_, &clock)| clock) else {
                break;
            };
            state.recency.remove(&victim);
            if let Some(entry) = state.entries.remove(&victim) {
                total -= entry.size_bytes as u64;
                metrics.cache_eviction(entry.size_bytes as u64);
            }
        }
    }

    /// Returns the cached response for `fingerprint`, computing it via `compute` on a
    /// miss. Concurrent callers for the same fingerprint observe exactly one
    /// invocation of `compute`; all others await its result.
    pub async fn get_or_compute<Fut>(
        &self,
        fingerprint: Fingerprint,
        metrics: &Metrics,
        compute: impl FnOnce() -> Fut,
    ) -> Result<Vec<u8>, RelayError>
    where
        Fut: Future<Output = Result<Vec<u8>, RelayError>>,
    {
        if !self.is_enabled() {
            return compute().await;
        }

        loop {
            let wait_on = {
                let mut state = self.state.lock().expect("cache mutex poisoned");
                if let Some(hit) = Self::lookup_locked(&mut state, &fingerprint) {
                    metrics.cache_hit();
                    return Ok(hit);
                }
                match state.in_flight.get(&fingerprint) {
                    Some(notify) => Some(notify.clone()),
                    None => {
                        state.in_flight.insert(fingerprint, Arc::new(Notify::new()));
                        None
                    }
                }
            };

            match wait_on {
                Some(notify) => notify.notified().await,
                None => break,
            }
        }

        metrics.cache_miss();
        let result = compute().await;

        let mut state = self.state.lock().expect("cache mutex poisoned");
        let notify = state.in_flight.remove(&fingerprint);
        if let Ok(bytes) = &result {
            self.store_locked(&mut state, fingerprint, bytes.clone(), metrics);
        }
        drop(state);

        if let Some(notify) = notify {
            notify.notify_waiters();
        }

        result
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};

    use super::*;

    fn fingerprint_from(seed: &str) -> Fingerprint {
        let request: crate::protocol::anthropic::Request = serde_json::from_str(&format!(
            r#"{{"model":"m","max_tokens":10,"messages":[{{"role":"user","content":"{seed}"}}]}}"#
        ))
        .unwrap();
        crate::translate::translate(&request).unwrap().fingerprint
    }

    #[tokio::test]
    async fn hits_after_store() {
        let cache = RequestCache::new(1024);
        let metrics = Metrics::default();
        let fingerprint = fingerprint_from("hi");

        let result = cache
            .get_or_compute(fingerprint, &metrics, || async { Ok(b"cached".to_vec()) })
            .await
            .unwrap();
        assert_eq!(result, b"cached");
        assert_eq!(metrics.snapshot().cache_misses, 1);

        let result = cache.get_or_compute(fingerprint, &metrics, || async { unreachable!() }).await.unwrap();
        assert_eq!(result, b"cached");
        assert_eq!(metrics.snapshot().cache_hits, 1);
    }

    #[tokio::test]
    async fn disabled_cache_never_stores() {
        let cache = RequestCache::new(0);
        let metrics = Metrics::default();
        let fingerprint = fingerprint_from("hi");

        cache.get_or_compute(fingerprint, &metrics, || async { Ok(b"x".to_vec()) }).await.unwrap();
        assert!(cache.lookup(&fingerprint).is_none());
    }

    #[tokio::test]
    async fn eviction_drops_least_recently_used() {
        let cache = RequestCache::new(6);
        let metrics = Metrics::default();
        let a = fingerprint_from("aaa");
        let b = fingerprint_from("bbb");

        cache.get_or_compute(a, &metrics, || async { Ok(b"aaa".to_vec()) }).await.unwrap();
        cache.get_or_compute(b, &metrics, || async { Ok(b"bbbbbb".to_vec()) }).await.unwrap();

        assert!(cache.lookup(&a).is_none());
        assert!(cache.lookup(&b).is_some());
    }

    #[tokio::test]
    async fn concurrent_callers_share_one_computation() {
        let cache = Arc::new(RequestCache::new(1024));
        let metrics = Arc::new(Metrics::default());
        let fingerprint = fingerprint_from("hi");
        let calls = Arc::new(AtomicU32::new(0));

        let mut handles = Vec::new();
        for _ in 0..8 {
            let cache = cache.clone();
            let metrics = metrics.clone();
            let calls = calls.clone();
            handles.push(tokio::spawn(async move {
                cache
                    .get_or_compute(fingerprint, &metrics, || async move {
                        calls.fetch_add(1, Ordering::SeqCst);
                        tokio::task::yield_now().await;
                        Ok(b"shared".to_vec())
                    })
                    .await
                    .unwrap()
            }));
        }

        for handle in handles {
            assert_eq!(handle.await.unwrap(), b"shared");
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
