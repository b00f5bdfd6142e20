use super::core::Dispatcher;
use crate::backend::Backend;
use crate::cache::{CacheStore, FingerprintGenerator};
use crate::candidate::{CandidateResolver, CandidateSource, DEFAULT_CACHE_SEED};
use crate::error::{Error, ErrorContext};
use crate::filter::{AcceptAll, ResponseFilter};
use crate::telemetry::{NoopTelemetrySink, RecordQueue, TelemetrySink};
use crate::Result;
use std::sync::Arc;
use std::time::Duration;

const TELEMETRY_TIMEOUT_ENV: &str = "AI_DISPATCH_TELEMETRY_TIMEOUT_MS";
const ATTEMPT_TIMEOUT_ENV: &str = "AI_DISPATCH_ATTEMPT_TIMEOUT_MS";
const DEFAULT_TELEMETRY_TIMEOUT_MS: u64 = 250;

/// Builder for [`Dispatcher`].
///
/// Only the backend is required. Without a cache store every attempt is a
/// live call; without a telemetry sink records are dropped; without a filter
/// every response is accepted.
pub struct DispatcherBuilder {
    backend: Option<Arc<dyn Backend>>,
    cache: Option<CacheStore>,
    telemetry: Option<Arc<dyn TelemetrySink>>,
    filter: Option<Arc<dyn ResponseFilter>>,
    candidates: Option<Arc<CandidateSource>>,
    default_cache_seed: u64,
    fingerprint_salt: Option<String>,
    telemetry_timeout: Option<Duration>,
    attempt_timeout: Option<Duration>,
}

impl DispatcherBuilder {
    pub fn new() -> Self {
        Self {
            backend: None,
            cache: None,
            telemetry: None,
            filter: None,
            candidates: None,
            default_cache_seed: DEFAULT_CACHE_SEED,
            fingerprint_salt: None,
            telemetry_timeout: None,
            attempt_timeout: None,
        }
    }

    pub fn backend(mut self, backend: Arc<dyn Backend>) -> Self {
        self.backend = Some(backend);
        self
    }

    pub fn cache(mut self, store: CacheStore) -> Self {
        self.cache = Some(store);
        self
    }

    pub fn telemetry(mut self, sink: Arc<dyn TelemetrySink>) -> Self {
        self.telemetry = Some(sink);
        self
    }

    pub fn filter(mut self, filter: Arc<dyn ResponseFilter>) -> Self {
        self.filter = Some(filter);
        self
    }

    pub fn candidates(mut self, source: Arc<CandidateSource>) -> Self {
        self.candidates = Some(source);
        self
    }

    /// Partition for candidates without a cache hint (default 41).
    pub fn default_cache_seed(mut self, seed: u64) -> Self {
        self.default_cache_seed = seed;
        self
    }

    pub fn fingerprint_salt(mut self, salt: impl Into<String>) -> Self {
        self.fingerprint_salt = Some(salt.into());
        self
    }

    /// Bound on a single telemetry `record` call.
    pub fn telemetry_timeout(mut self, timeout: Duration) -> Self {
        self.telemetry_timeout = Some(timeout);
        self
    }

    /// Live-call timeout for candidates that do not set `timeout_ms`.
    pub fn attempt_timeout(mut self, timeout: Duration) -> Self {
        self.attempt_timeout = Some(timeout);
        self
    }

    pub fn build(self) -> Result<Dispatcher> {
        let backend = self.backend.ok_or_else(|| {
            Error::configuration_with_context(
                "dispatcher requires a backend",
                ErrorContext::new()
                    .with_field_path("backend")
                    .with_source("dispatcher_builder"),
            )
        })?;

        let telemetry_timeout = self.telemetry_timeout.unwrap_or_else(|| {
            Duration::from_millis(
                std::env::var(TELEMETRY_TIMEOUT_ENV)
                    .ok()
                    .and_then(|s| s.parse::<u64>().ok())
                    .filter(|ms| *ms > 0)
                    .unwrap_or(DEFAULT_TELEMETRY_TIMEOUT_MS),
            )
        });

        let attempt_timeout = self.attempt_timeout.or_else(|| {
            std::env::var(ATTEMPT_TIMEOUT_ENV)
                .ok()
                .and_then(|s| s.parse::<u64>().ok())
                .filter(|ms| *ms > 0)
                .map(Duration::from_millis)
        });

        let fingerprints = match self.fingerprint_salt {
            Some(salt) => FingerprintGenerator::new().with_salt(salt),
            None => FingerprintGenerator::new(),
        };

        Ok(Dispatcher {
            backend,
            cache: self.cache,
            telemetry: RecordQueue::new(
                self.telemetry
                    .unwrap_or_else(|| Arc::new(NoopTelemetrySink)),
                telemetry_timeout,
            ),
            filter: self.filter.unwrap_or_else(|| Arc::new(AcceptAll)),
            resolver: CandidateResolver::new().with_default_cache_seed(self.default_cache_seed),
            fingerprints,
            candidates: self.candidates,
            attempt_timeout,
        })
    }
}

impl Default for DispatcherBuilder {
    fn default() -> Self {
        Self::new()
    }
}
