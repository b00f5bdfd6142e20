use super::classify::{classify, FailureKind};
use super::policy::{decide, Decision};
use super::types::{
    Accepted, AttemptFailure, AttemptRecord, CancelToken, DispatchError, DispatchErrorKind,
    DispatchOutcome, FilterVerdict,
};
use crate::backend::{Backend, BackendError};
use crate::cache::{timestamp, CacheStore, CachedEntry, FingerprintGenerator, RequestFingerprint};
use crate::candidate::{CandidateConfig, CandidateResolver, CandidateSource, ResolvedCandidate};
use crate::filter::{self, ResponseFilter};
use crate::pricing::response_cost;
use crate::telemetry::RecordQueue;
use crate::types::{LlmResponse, LogicalRequest};
use futures::StreamExt;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn, Instrument};

/// Per-call knobs for [`Dispatcher::dispatch_with`].
#[derive(Clone, Default)]
pub struct DispatchOptions {
    /// Replaces the dispatcher's filter for this call.
    pub filter: Option<Arc<dyn ResponseFilter>>,
    pub cancel: Option<CancelToken>,
}

impl DispatchOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn filter(mut self, filter: Arc<dyn ResponseFilter>) -> Self {
        self.filter = Some(filter);
        self
    }

    pub fn cancel_token(mut self, token: CancelToken) -> Self {
        self.cancel = Some(token);
        self
    }
}

/// Walks an ordered candidate list for one logical request: cache lookup,
/// live call, filter, fallthrough.
///
/// Stateless between calls. The only shared mutable state is the cache
/// store, which may be shared between dispatchers.
pub struct Dispatcher {
    pub(crate) backend: Arc<dyn Backend>,
    pub(crate) cache: Option<CacheStore>,
    pub(crate) telemetry: RecordQueue,
    pub(crate) filter: Arc<dyn ResponseFilter>,
    pub(crate) resolver: CandidateResolver,
    pub(crate) fingerprints: FingerprintGenerator,
    pub(crate) candidates: Option<Arc<CandidateSource>>,
    pub(crate) attempt_timeout: Option<Duration>,
}

/// Response in hand, waiting for the filter.
struct Obtained {
    response: LlmResponse,
    cost: f64,
    cached: bool,
}

impl Dispatcher {
    pub fn builder() -> super::DispatcherBuilder {
        super::DispatcherBuilder::new()
    }

    pub fn cache(&self) -> Option<&CacheStore> {
        self.cache.as_ref()
    }

    pub fn candidate_source(&self) -> Option<&Arc<CandidateSource>> {
        self.candidates.as_ref()
    }

    pub fn fingerprint_generator(&self) -> &FingerprintGenerator {
        &self.fingerprints
    }

    /// Wait until every attempt record emitted so far has reached the
    /// telemetry sink, then flush the sink.
    pub async fn flush_telemetry(&self) {
        self.telemetry.flush().await
    }

    /// Dispatch against the configured candidate source.
    pub async fn dispatch(&self, request: &LogicalRequest) -> DispatchOutcome {
        self.dispatch_with(request, None, &DispatchOptions::default())
            .await
    }

    /// Dispatch against an explicit candidate list.
    pub async fn dispatch_candidates(
        &self,
        request: &LogicalRequest,
        candidates: &[CandidateConfig],
    ) -> DispatchOutcome {
        self.dispatch_with(request, Some(candidates), &DispatchOptions::default())
            .await
    }

    /// Dispatch with per-call options. `candidates = None` uses a snapshot of
    /// the candidate source taken now; a concurrent reload does not affect it.
    pub async fn dispatch_with(
        &self,
        request: &LogicalRequest,
        candidates: Option<&[CandidateConfig]>,
        options: &DispatchOptions,
    ) -> DispatchOutcome {
        let invocation_id = uuid::Uuid::new_v4().to_string();
        let span = tracing::info_span!("dispatch", invocation_id = %invocation_id);

        async {
            let snapshot;
            let base: &[CandidateConfig] = match candidates {
                Some(list) => list,
                None => match &self.candidates {
                    Some(source) => {
                        snapshot = source.snapshot();
                        snapshot.as_slice()
                    }
                    None => {
                        return Err(DispatchError::config("no candidate list configured")
                            .with_invocation(&invocation_id))
                    }
                },
            };

            let resolved = self
                .resolver
                .resolve(request, base)
                .map_err(|e| DispatchError::config(e.to_string()).with_invocation(&invocation_id))?;

            self.run(request, &resolved, options, &invocation_id).await
        }
        .instrument(span)
        .await
    }

    /// Dispatch independent requests with bounded concurrency. Outcomes are
    /// returned in input order; each dispatch is still sequential over its
    /// candidates.
    pub async fn dispatch_batch(
        &self,
        requests: Vec<LogicalRequest>,
        concurrency: usize,
    ) -> Vec<DispatchOutcome> {
        let n = requests.len();
        let mut out: Vec<Option<DispatchOutcome>> = (0..n).map(|_| None).collect();

        let results: Vec<(usize, DispatchOutcome)> = futures::stream::iter(requests.into_iter().enumerate())
            .map(|(idx, req)| async move { (idx, self.dispatch(&req).await) })
            .buffer_unordered(concurrency.max(1))
            .collect()
            .await;

        for (idx, r) in results {
            out[idx] = Some(r);
        }

        out.into_iter()
            .map(|o| {
                o.unwrap_or_else(|| {
                    Err(DispatchError::new(DispatchErrorKind::Unknown, "batch result missing"))
                })
            })
            .collect()
    }

    async fn run(
        &self,
        request: &LogicalRequest,
        candidates: &[ResolvedCandidate],
        options: &DispatchOptions,
        invocation_id: &str,
    ) -> DispatchOutcome {
        let filter: &dyn ResponseFilter = options
            .filter
            .as_deref()
            .unwrap_or(self.filter.as_ref());
        let last = candidates.len().saturating_sub(1);
        let cancelled = || options.cancel.as_ref().map_or(false, |t| t.is_cancelled());

        for (i, cand) in candidates.iter().enumerate() {
            let is_last = i == last;
            if cancelled() {
                info!(candidate_index = i, "dispatch cancelled");
                return Err(DispatchError::cancelled()
                    .at(i, &cand.config)
                    .with_invocation(invocation_id));
            }

            let fp = self.fingerprints.fingerprint(&cand.params);
            let started = Instant::now();
            let ts = timestamp();

            let obtained = match self.lookup_or_call(cand, &fp, &cancelled, invocation_id).await {
                Ok(o) => o,
                Err(LiveFailure::Cancelled) => {
                    info!(candidate_index = i, "dispatch cancelled");
                    return Err(DispatchError::cancelled()
                        .at(i, &cand.config)
                        .with_invocation(invocation_id));
                }
                Err(LiveFailure::Backend(err)) => {
                    let kind = classify(&err);
                    warn!(
                        candidate_index = i,
                        candidate = %cand.params.target,
                        model = %cand.params.model,
                        failure = %kind,
                        duration_ms = started.elapsed().as_millis() as u64,
                        error = %err,
                        "live call failed"
                    );
                    self.telemetry.push(AttemptRecord {
                        invocation_id: invocation_id.to_string(),
                        candidate_index: i,
                        candidate: cand.params.target.clone(),
                        model: cand.params.model.clone(),
                        fingerprint: fp,
                        cached: false,
                        verdict: None,
                        cost: 0.0,
                        timestamp: ts,
                        duration_ms: started.elapsed().as_millis() as u64,
                        error: Some(AttemptFailure {
                            kind,
                            code: err.code.clone(),
                            detail: err.detail.clone(),
                        }),
                    });

                    match decide(kind, is_last) {
                        Decision::Fallback => continue,
                        Decision::Fail => {
                            return Err(DispatchError::new(kind.into(), err.to_string())
                                .at(i, &cand.config)
                                .exhausted(is_last && kind != FailureKind::ContentPolicy)
                                .with_invocation(invocation_id));
                        }
                    }
                }
            };

            let accepted = filter::evaluate(filter, &obtained.response, request.context.as_ref());
            let verdict = match (accepted, is_last) {
                (true, _) => FilterVerdict::Accepted,
                (false, true) => FilterVerdict::ForceAccepted,
                (false, false) => FilterVerdict::Rejected,
            };

            self.telemetry.push(AttemptRecord {
                invocation_id: invocation_id.to_string(),
                candidate_index: i,
                candidate: cand.params.target.clone(),
                model: cand.params.model.clone(),
                fingerprint: fp.clone(),
                cached: obtained.cached,
                verdict: Some(verdict),
                cost: obtained.cost,
                timestamp: ts,
                duration_ms: started.elapsed().as_millis() as u64,
                error: None,
            });

            if !verdict.returns() {
                debug!(
                    candidate_index = i,
                    fingerprint = %fp.short(),
                    cached = obtained.cached,
                    "filter rejected response; trying next candidate"
                );
                continue;
            }
            if verdict == FilterVerdict::ForceAccepted {
                warn!(candidate_index = i, "filter rejected the last candidate; returning it anyway");
            }

            info!(
                candidate_index = i,
                candidate = %cand.params.target,
                model = %cand.params.model,
                cached = obtained.cached,
                cost = obtained.cost,
                duration_ms = started.elapsed().as_millis() as u64,
                "dispatch accepted"
            );
            return Ok(Accepted {
                response: obtained.response,
                invocation_id: invocation_id.to_string(),
                candidate_index: i,
                candidate: cand.params.target.clone(),
                model: cand.params.model.clone(),
                fingerprint: fp,
                cached: obtained.cached,
                cost: obtained.cost,
                forced: verdict == FilterVerdict::ForceAccepted,
            });
        }

        // The last candidate either returns or fails above.
        Err(DispatchError::new(
            DispatchErrorKind::ExhaustedCandidates,
            "no candidate produced an acceptable response",
        )
        .exhausted(true)
        .with_invocation(invocation_id))
    }

    /// CACHE_CHECK then, on a miss, LIVE_CALL and the cache write.
    async fn lookup_or_call(
        &self,
        cand: &ResolvedCandidate,
        fp: &RequestFingerprint,
        cancelled: &(dyn Fn() -> bool + Sync),
        invocation_id: &str,
    ) -> Result<Obtained, LiveFailure> {
        let partition = match (&self.cache, cand.cache_seed) {
            (Some(store), Some(seed)) => Some(store.acquire(seed).await),
            _ => None,
        };

        if let Some(p) = &partition {
            match p.get(fp).await {
                Ok(Some(entry)) if !entry.response.is_empty() => {
                    debug!(
                        candidate_index = cand.index,
                        fingerprint = %fp.short(),
                        cache_seed = p.seed(),
                        "cache hit"
                    );
                    return Ok(Obtained {
                        response: entry.response,
                        cost: entry.cost,
                        cached: true,
                    });
                }
                Ok(_) => {}
                Err(e) => {
                    warn!(fingerprint = %fp.short(), error = %e, "cache read failed; treating as miss")
                }
            }
        }

        if cancelled() {
            return Err(LiveFailure::Cancelled);
        }

        let response = self.call_backend(cand, invocation_id).await?;
        let cost = response_cost(&response, cand.pricing.as_ref(), &cand.params.model);

        if let Some(p) = &partition {
            let entry = CachedEntry::new(response.clone(), cost);
            if let Err(e) = p.put(fp, &entry).await {
                warn!(fingerprint = %fp.short(), error = %e, "cache write failed; continuing");
            }
        }

        Ok(Obtained {
            response,
            cost,
            cached: false,
        })
    }

    async fn call_backend(
        &self,
        cand: &ResolvedCandidate,
        invocation_id: &str,
    ) -> Result<LlmResponse, LiveFailure> {
        debug!(
            invocation_id = invocation_id,
            candidate_index = cand.index,
            candidate = %cand.params.target,
            model = %cand.params.model,
            "live call"
        );
        let call = self.backend.call(&cand.params);
        let result = match cand.params.timeout.or(self.attempt_timeout) {
            Some(t) => match tokio::time::timeout(t, call).await {
                Ok(r) => r,
                Err(_) => Err(BackendError::timeout(format!(
                    "attempt timed out after {}ms",
                    t.as_millis()
                ))
                .with_code("timeout")),
            },
            None => call.await,
        };
        match result {
            Ok(resp) if resp.is_empty() => Err(LiveFailure::Backend(BackendError::empty_response(
                "backend returned no content and no tool calls",
            ))),
            Ok(resp) => Ok(resp),
            Err(e) => Err(LiveFailure::Backend(e)),
        }
    }
}

enum LiveFailure {
    Cancelled,
    Backend(BackendError),
}
