use std::sync::Arc;

use relay_config::Config;

use crate::{backend::Backend, cache::RequestCache, metrics::Metrics, request_log::RequestLogSink, trace::TraceSink};

/// Shared state handed to every request handler. Cheap to clone: everything behind an
/// `Arc`.
#[derive(Clone)]
pub struct RelayState(Arc<Inner>);

struct Inner {
    config: Config,
    backend: Backend,
    cache: RequestCache,
    metrics: Metrics,
    request_log: RequestLogSink,
    trace: TraceSink,
}

impl RelayState {
    pub fn new(config: Config) -> anyhow::Result<Self> {
        let backend = Backend::new(&config);
        let cache = RequestCache::new(config.cache_max_bytes);
        let trace = TraceSink::new(config.trace_dir.clone());
        // The configuration surface exposes one directory (`trace_dir`) for filesystem
        // sinks; the request log is written alongside the trace files under it rather
        // than introducing a second, unconfigured path.
        let request_log_path = config.trace_dir.as_ref().map(|dir| dir.join("requests.jsonl"));
        let request_log = RequestLogSink::spawn(request_log_path);

        Ok(Self(Arc::new(Inner {
            config,
            backend,
            cache,
            metrics: Metrics::default(),
            request_log,
            trace,
        })))
    }

    pub fn config(&self) -> &Config {
        &self.0.config
    }

    pub fn backend(&self) -> &Backend {
        &self.0.backend
    }

    pub fn cache(&self) -> &RequestCache {
        &self.0.cache
    }

    pub fn metrics(&self) -> &Metrics {
        &self.0.metrics
    }

    pub fn request_log(&self) -> &RequestLogSink {
        &self.0.request_log
    }

    pub fn trace(&self) -> &TraceSink {
        &self.0.trace
    }
}
