//! Dispatcher behavior against a scripted in-process backend.

use ai_dispatch::cache::{CacheBackend, CacheStore, FingerprintGenerator, MemoryCache};
use ai_dispatch::candidate::{CacheHint, CandidateResolver};
use ai_dispatch::dispatch::FilterVerdict;
use ai_dispatch::filter::KeywordFilter;
use ai_dispatch::telemetry::InMemoryTelemetrySink;
use ai_dispatch::{
    cancel_pair, Backend, BackendError, BackendParams, CandidateConfig, CandidateSource,
    DispatchErrorKind, DispatchOptions, Dispatcher, FailureKind, LlmResponse, LogicalRequest,
    Message, TelemetrySink, Usage,
};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

#[derive(Clone)]
enum Behavior {
    Reply(LlmResponse),
    Fail(BackendError),
    Sleep(Duration, LlmResponse),
}

/// Backend answering per target name, recording the call order.
#[derive(Default)]
struct ScriptedBackend {
    behaviors: Mutex<HashMap<String, Behavior>>,
    calls: Mutex<Vec<String>>,
}

impl ScriptedBackend {
    fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn on(self: &Arc<Self>, target: &str, behavior: Behavior) -> Arc<Self> {
        self.behaviors
            .lock()
            .unwrap()
            .insert(target.to_string(), behavior);
        self.clone()
    }

    fn replies(self: &Arc<Self>, target: &str, text: &str) -> Arc<Self> {
        self.on(target, Behavior::Reply(LlmResponse::text(text)))
    }

    fn fails(self: &Arc<Self>, target: &str, err: BackendError) -> Arc<Self> {
        self.on(target, Behavior::Fail(err))
    }

    fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }
}

#[async_trait]
impl Backend for ScriptedBackend {
    async fn call(&self, params: &BackendParams) -> Result<LlmResponse, BackendError> {
        self.calls.lock().unwrap().push(params.target.clone());
        let behavior = self.behaviors.lock().unwrap().get(&params.target).cloned();
        match behavior {
            Some(Behavior::Reply(r)) => Ok(r),
            Some(Behavior::Fail(e)) => Err(e),
            Some(Behavior::Sleep(d, r)) => {
                tokio::time::sleep(d).await;
                Ok(r)
            }
            None => Err(BackendError::connect("no script")),
        }
    }
}

struct Harness {
    backend: Arc<ScriptedBackend>,
    telemetry: Arc<InMemoryTelemetrySink>,
    cache: CacheStore,
    dispatcher: Dispatcher,
}

fn harness(backend: Arc<ScriptedBackend>) -> Harness {
    let telemetry = Arc::new(InMemoryTelemetrySink::default());
    let cache = CacheStore::new(Arc::new(MemoryCache::new()));
    let dispatcher = Dispatcher::builder()
        .backend(backend.clone())
        .cache(cache.clone())
        .telemetry(telemetry.clone())
        .build()
        .unwrap();
    Harness {
        backend,
        telemetry,
        cache,
        dispatcher,
    }
}

fn request() -> LogicalRequest {
    LogicalRequest::new(vec![Message::system("be brief"), Message::user("hello")])
}

fn candidates(names: &[&str]) -> Vec<CandidateConfig> {
    names
        .iter()
        .map(|n| CandidateConfig::new(*n, "test-model"))
        .collect()
}

fn reject(text: &'static str) -> DispatchOptions {
    DispatchOptions::new().filter(Arc::new(KeywordFilter::new().block(text)))
}

#[tokio::test]
async fn scenario_a_single_live_call_accepted() {
    let h = harness(ScriptedBackend::new().replies("a", "hi there"));
    let accepted = h
        .dispatcher
        .dispatch_candidates(&request(), &candidates(&["a"]))
        .await
        .unwrap();

    assert_eq!(accepted.content(), "hi there");
    assert_eq!(accepted.candidate_index, 0);
    assert!(!accepted.cached);
    assert!(!accepted.forced);

    h.dispatcher.flush_telemetry().await;
    let records = h.telemetry.records();
    assert_eq!(records.len(), 1);
    assert!(!records[0].cached);
    assert!(records[0].is_success());
    assert_eq!(records[0].verdict, Some(FilterVerdict::Accepted));
    assert_eq!(records[0].invocation_id, accepted.invocation_id);
}

#[tokio::test]
async fn scenario_b_cached_rejection_falls_through() {
    let h = harness(
        ScriptedBackend::new()
            .replies("a", "sorry, cannot help")
            .replies("b", "here you go"),
    );
    // Warm the cache for candidate a.
    h.dispatcher
        .dispatch_candidates(&request(), &candidates(&["a"]))
        .await
        .unwrap();
    h.dispatcher.flush_telemetry().await;
    h.telemetry.clear();

    let accepted = h
        .dispatcher
        .dispatch_with(&request(), Some(&candidates(&["a", "b"])[..]), &reject("sorry"))
        .await
        .unwrap();

    assert_eq!(accepted.content(), "here you go");
    assert_eq!(accepted.candidate_index, 1);
    assert_eq!(h.backend.calls(), vec!["a", "b"]);

    h.dispatcher.flush_telemetry().await;
    let records = h.telemetry.records();
    assert_eq!(records.len(), 2);
    assert!(records[0].cached);
    assert_eq!(records[0].verdict, Some(FilterVerdict::Rejected));
    assert!(!records[1].cached);
    assert_eq!(records[1].verdict, Some(FilterVerdict::Accepted));
}

#[tokio::test(start_paused = true)]
async fn scenario_c_timeout_then_success() {
    let backend = ScriptedBackend::new()
        .on(
            "a",
            Behavior::Sleep(Duration::from_secs(30), LlmResponse::text("late")),
        )
        .replies("b", "on time");
    let h = harness(backend);
    let list = vec![
        CandidateConfig::new("a", "slow").with_timeout(Duration::from_millis(100)),
        CandidateConfig::new("b", "fast"),
    ];

    let accepted = h.dispatcher.dispatch_candidates(&request(), &list).await.unwrap();
    assert_eq!(accepted.content(), "on time");
    assert_eq!(accepted.candidate_index, 1);

    h.dispatcher.flush_telemetry().await;
    let records = h.telemetry.records();
    assert_eq!(records.len(), 2);
    assert_eq!(
        records[0].error.as_ref().map(|e| e.kind),
        Some(FailureKind::Timeout)
    );
    assert!(records[1].is_success());
}

#[tokio::test]
async fn scenario_d_content_policy_is_terminal_and_uncached() {
    let h = harness(ScriptedBackend::new().fails("a", BackendError::content_filter("blocked")));
    let err = h
        .dispatcher
        .dispatch_candidates(&request(), &candidates(&["a"]))
        .await
        .unwrap_err();

    assert_eq!(err.kind, DispatchErrorKind::ContentPolicy);
    assert_eq!(err.candidate_index, Some(0));
    h.dispatcher.flush_telemetry().await;
    let records = h.telemetry.records();
    assert_eq!(records.len(), 1);
    assert!(!records[0].is_success());
    assert_eq!(h.cache.stats().writes, 0);
    assert_eq!(h.cache.len().await.unwrap(), 0);
}

#[tokio::test]
async fn first_candidate_hit_issues_no_live_calls() {
    let h = harness(ScriptedBackend::new().replies("a", "memo").replies("b", "other"));
    let list = candidates(&["a", "b"]);
    let first = h.dispatcher.dispatch_candidates(&request(), &list).await.unwrap();
    assert_eq!(h.backend.call_count(), 1);

    let second = h.dispatcher.dispatch_candidates(&request(), &list).await.unwrap();
    assert_eq!(h.backend.call_count(), 1);
    assert!(second.cached);
    assert_eq!(first.response, second.response);
    assert_eq!(first.fingerprint, second.fingerprint);
}

#[tokio::test]
async fn content_policy_stops_later_candidates() {
    let h = harness(
        ScriptedBackend::new()
            .fails("a", BackendError::connect("refused"))
            .fails("b", BackendError::http(400, "nope").with_code("content_filter"))
            .replies("c", "never"),
    );
    let err = h
        .dispatcher
        .dispatch_candidates(&request(), &candidates(&["a", "b", "c"]))
        .await
        .unwrap_err();

    assert_eq!(err.kind, DispatchErrorKind::ContentPolicy);
    assert_eq!(err.candidate_index, Some(1));
    assert!(!err.exhausted);
    assert_eq!(h.backend.calls(), vec!["a", "b"]);
}

#[tokio::test]
async fn all_transport_failures_report_last_candidate() {
    let h = harness(
        ScriptedBackend::new()
            .fails("a", BackendError::connect("refused"))
            .fails("b", BackendError::http(503, "busy"))
            .fails("c", BackendError::connect("reset")),
    );
    let list = candidates(&["a", "b", "c"]);
    let err = h.dispatcher.dispatch_candidates(&request(), &list).await.unwrap_err();

    assert_eq!(err.kind, DispatchErrorKind::Transport);
    assert_eq!(err.candidate_index, Some(2));
    assert_eq!(err.candidate.as_ref(), Some(&list[2]));
    assert!(err.exhausted);
    assert_eq!(h.backend.calls(), vec!["a", "b", "c"]);
    h.dispatcher.flush_telemetry().await;
    assert_eq!(h.telemetry.len(), 3);
    assert!(!err.to_string().is_empty());
}

#[tokio::test]
async fn candidates_are_tried_in_order_at_most_once() {
    let h = harness(
        ScriptedBackend::new()
            .fails("a", BackendError::other("boom"))
            .replies("b", "rejected")
            .replies("c", "rejected too")
            .replies("d", "fine"),
    );
    let accepted = h
        .dispatcher
        .dispatch_with(
            &request(),
            Some(&candidates(&["a", "b", "c", "d"])[..]),
            &reject("rejected"),
        )
        .await
        .unwrap();

    assert_eq!(accepted.candidate_index, 3);
    assert_eq!(h.backend.calls(), vec!["a", "b", "c", "d"]);
}

#[tokio::test]
async fn last_candidate_is_force_accepted() {
    let h = harness(
        ScriptedBackend::new()
            .replies("a", "bad answer")
            .replies("b", "bad again"),
    );
    let accepted = h
        .dispatcher
        .dispatch_with(&request(), Some(&candidates(&["a", "b"])[..]), &reject("bad"))
        .await
        .unwrap();

    assert_eq!(accepted.content(), "bad again");
    assert!(accepted.forced);
    h.dispatcher.flush_telemetry().await;
    let records = h.telemetry.records();
    assert_eq!(records[1].verdict, Some(FilterVerdict::ForceAccepted));
}

#[tokio::test]
async fn filter_rejection_keeps_cache_entry() {
    let h = harness(
        ScriptedBackend::new()
            .replies("a", "sorry")
            .replies("b", "ok"),
    );
    let list = candidates(&["a", "b"]);
    h.dispatcher
        .dispatch_with(&request(), Some(list.as_slice()), &reject("sorry"))
        .await
        .unwrap();

    let resolved = CandidateResolver::new().resolve(&request(), &list).unwrap();
    let fp = FingerprintGenerator::new().fingerprint(&resolved[0].params);
    let entry = h.cache.acquire(41).await.get(&fp).await.unwrap().unwrap();
    assert_eq!(entry.response.content_str(), "sorry");
}

#[tokio::test]
async fn empty_response_counts_as_failure() {
    let h = harness(
        ScriptedBackend::new()
            .on("a", Behavior::Reply(LlmResponse::text("   ")))
            .replies("b", "real content"),
    );
    let accepted = h
        .dispatcher
        .dispatch_candidates(&request(), &candidates(&["a", "b"]))
        .await
        .unwrap();

    assert_eq!(accepted.candidate_index, 1);
    h.dispatcher.flush_telemetry().await;
    let records = h.telemetry.records();
    assert_eq!(
        records[0].error.as_ref().map(|e| e.kind),
        Some(FailureKind::Unknown)
    );
    // Only the non-empty response was cached.
    assert_eq!(h.cache.stats().writes, 1);
}

#[tokio::test]
async fn tool_calls_alone_are_not_empty() {
    let call = ai_dispatch::ToolCall {
        id: Some("call_1".into()),
        name: "search".into(),
        parameters: serde_json::json!({"q": "rust"}),
    };
    let h = harness(ScriptedBackend::new().on(
        "a",
        Behavior::Reply(LlmResponse::default().with_tool_calls(vec![call])),
    ));
    let accepted = h
        .dispatcher
        .dispatch_candidates(&request(), &candidates(&["a"]))
        .await
        .unwrap();
    assert_eq!(accepted.response.tool_calls[0].name, "search");
}

#[tokio::test]
async fn panicking_filter_is_a_rejection() {
    let h = harness(ScriptedBackend::new().replies("a", "x").replies("b", "y"));
    let panicky = |r: &LlmResponse, _: Option<&serde_json::Value>| -> bool {
        if r.content_str() == "x" {
            panic!("filter bug");
        }
        true
    };
    let accepted = h
        .dispatcher
        .dispatch_with(
            &request(),
            Some(&candidates(&["a", "b"])[..]),
            &DispatchOptions::new().filter(Arc::new(panicky)),
        )
        .await
        .unwrap();
    assert_eq!(accepted.content(), "y");
}

#[tokio::test]
async fn filter_sees_request_context() {
    let h = harness(ScriptedBackend::new().replies("a", "short").replies("b", "a much longer answer"));
    let min_len = |r: &LlmResponse, ctx: Option<&serde_json::Value>| {
        let n = ctx
            .and_then(|c| c.get("min_len"))
            .and_then(|v| v.as_u64())
            .unwrap_or(0);
        r.content_str().len() as u64 >= n
    };
    let req = request().with_context(serde_json::json!({"min_len": 10}));
    let accepted = h
        .dispatcher
        .dispatch_with(
            &req,
            Some(&candidates(&["a", "b"])[..]),
            &DispatchOptions::new().filter(Arc::new(min_len)),
        )
        .await
        .unwrap();
    assert_eq!(accepted.candidate_index, 1);
}

struct BrokenSink;

#[async_trait]
impl TelemetrySink for BrokenSink {
    async fn record(&self, _: ai_dispatch::AttemptRecord) -> ai_dispatch::Result<()> {
        Err(ai_dispatch::Error::telemetry("sink offline"))
    }
}

struct PanickingSink;

#[async_trait]
impl TelemetrySink for PanickingSink {
    async fn record(&self, _: ai_dispatch::AttemptRecord) -> ai_dispatch::Result<()> {
        panic!("sink bug")
    }
}

struct StuckSink;

#[async_trait]
impl TelemetrySink for StuckSink {
    async fn record(&self, _: ai_dispatch::AttemptRecord) -> ai_dispatch::Result<()> {
        tokio::time::sleep(Duration::from_secs(3600)).await;
        Ok(())
    }
}

#[tokio::test(start_paused = true)]
async fn telemetry_failures_never_change_the_outcome() {
    let sinks: Vec<Arc<dyn TelemetrySink>> =
        vec![Arc::new(BrokenSink), Arc::new(PanickingSink), Arc::new(StuckSink)];
    for sink in sinks {
        let backend = ScriptedBackend::new().replies("a", "fine");
        let dispatcher = Dispatcher::builder()
            .backend(backend.clone())
            .telemetry(sink)
            .telemetry_timeout(Duration::from_millis(50))
            .build()
            .unwrap();
        let accepted = dispatcher
            .dispatch_candidates(&request(), &candidates(&["a"]))
            .await
            .unwrap();
        assert_eq!(accepted.content(), "fine");
        dispatcher.flush_telemetry().await;
    }
}

#[tokio::test]
async fn stalled_sink_adds_no_latency() {
    let backend = ScriptedBackend::new()
        .replies("a", "nope")
        .replies("b", "nope")
        .replies("c", "nope");
    let dispatcher = Dispatcher::builder()
        .backend(backend.clone())
        .telemetry(Arc::new(StuckSink))
        .telemetry_timeout(Duration::from_secs(5))
        .build()
        .unwrap();

    let started = std::time::Instant::now();
    let accepted = dispatcher
        .dispatch_with(&request(), Some(&candidates(&["a", "b", "c"])[..]), &reject("nope"))
        .await
        .unwrap();
    assert!(accepted.forced);
    assert!(started.elapsed() < Duration::from_secs(1));
}

struct FailingCache;

#[async_trait]
impl CacheBackend for FailingCache {
    async fn get(&self, _: &str) -> ai_dispatch::Result<Option<Vec<u8>>> {
        Err(ai_dispatch::Error::cache_with_context(
            "store down",
            ai_dispatch::ErrorContext::new(),
        ))
    }
    async fn set(&self, _: &str, _: &[u8]) -> ai_dispatch::Result<()> {
        Err(ai_dispatch::Error::cache_with_context(
            "store down",
            ai_dispatch::ErrorContext::new(),
        ))
    }
    async fn delete(&self, _: &str) -> ai_dispatch::Result<bool> {
        Ok(false)
    }
    async fn clear(&self) -> ai_dispatch::Result<()> {
        Ok(())
    }
    async fn len(&self) -> ai_dispatch::Result<usize> {
        Ok(0)
    }
    fn name(&self) -> &'static str {
        "failing"
    }
}

#[tokio::test]
async fn cache_failures_are_swallowed() {
    let backend = ScriptedBackend::new().replies("a", "fine");
    let cache = CacheStore::new(Arc::new(FailingCache));
    let dispatcher = Dispatcher::builder()
        .backend(backend.clone())
        .cache(cache.clone())
        .build()
        .unwrap();

    let accepted = dispatcher
        .dispatch_candidates(&request(), &candidates(&["a"]))
        .await
        .unwrap();
    assert_eq!(accepted.content(), "fine");
    assert_eq!(cache.stats().errors, 2);
}

#[tokio::test]
async fn disabled_cache_hint_always_calls_live() {
    let h = harness(ScriptedBackend::new().replies("a", "fresh"));
    let list = vec![CandidateConfig::new("a", "m").with_cache(CacheHint::Disabled)];
    h.dispatcher.dispatch_candidates(&request(), &list).await.unwrap();
    h.dispatcher.dispatch_candidates(&request(), &list).await.unwrap();
    assert_eq!(h.backend.call_count(), 2);
    assert_eq!(h.cache.len().await.unwrap(), 0);
}

#[tokio::test]
async fn cache_seeds_partition_entries() {
    let h = harness(ScriptedBackend::new().replies("a", "v"));
    let seeded = |seed| vec![CandidateConfig::new("a", "m").with_cache(CacheHint::Seed(seed))];
    h.dispatcher.dispatch_candidates(&request(), &seeded(1)).await.unwrap();
    h.dispatcher.dispatch_candidates(&request(), &seeded(2)).await.unwrap();
    h.dispatcher.dispatch_candidates(&request(), &seeded(1)).await.unwrap();
    assert_eq!(h.backend.call_count(), 2);
}

#[tokio::test]
async fn cached_hit_reports_stored_cost() {
    let reply = LlmResponse::text("priced").with_usage(Usage::new(1000, 1000));
    let h = harness(ScriptedBackend::new().on("a", Behavior::Reply(reply)));
    let list = vec![CandidateConfig::new("a", "m").with_price(ai_dispatch::candidate::PriceSpec::Split([0.01, 0.02]))];

    let live = h.dispatcher.dispatch_candidates(&request(), &list).await.unwrap();
    let cached = h.dispatcher.dispatch_candidates(&request(), &list).await.unwrap();
    assert!((live.cost - 0.03).abs() < 1e-9);
    assert!(cached.cached);
    assert!((cached.cost - 0.03).abs() < 1e-9);
}

#[tokio::test]
async fn non_finite_price_is_a_config_error() {
    let h = harness(ScriptedBackend::new().replies("a", "x"));
    let list = vec![CandidateConfig::new("a", "m").with_price(ai_dispatch::candidate::PriceSpec::Flat(f64::NAN))];
    let err = h.dispatcher.dispatch_candidates(&request(), &list).await.unwrap_err();
    assert!(err.is_config());
    assert_eq!(h.backend.call_count(), 0);
}

#[tokio::test]
async fn non_finite_reported_cost_stays_cacheable() {
    let mut reply = LlmResponse::text("odd cost");
    reply.cost = Some(f64::NAN);
    let h = harness(ScriptedBackend::new().on("a", Behavior::Reply(reply)));
    let list = candidates(&["a"]);

    let live = h.dispatcher.dispatch_candidates(&request(), &list).await.unwrap();
    let again = h.dispatcher.dispatch_candidates(&request(), &list).await.unwrap();
    assert_eq!(live.cost, 0.0);
    assert!(again.cached);
    assert_eq!(h.backend.call_count(), 1);
    assert_eq!(h.cache.stats().errors, 0);
}

#[tokio::test]
async fn config_errors_are_raised_before_any_call() {
    let h = harness(ScriptedBackend::new().replies("a", "x"));
    let err = h
        .dispatcher
        .dispatch_candidates(&request(), &[])
        .await
        .unwrap_err();
    assert_eq!(err.kind, DispatchErrorKind::Config);

    let bad = vec![CandidateConfig::new("a", "m").with_temperature(5.0)];
    let err = h.dispatcher.dispatch_candidates(&request(), &bad).await.unwrap_err();
    assert!(err.is_config());

    let err = h.dispatcher.dispatch(&request()).await.unwrap_err();
    assert!(err.is_config());
    assert_eq!(h.backend.call_count(), 0);
    h.dispatcher.flush_telemetry().await;
    assert!(h.telemetry.is_empty());
}

#[tokio::test]
async fn cancelled_dispatch_makes_no_calls() {
    let h = harness(ScriptedBackend::new().replies("a", "x"));
    let (handle, token) = cancel_pair();
    handle.cancel();
    let err = h
        .dispatcher
        .dispatch_with(
            &request(),
            Some(&candidates(&["a"])[..]),
            &DispatchOptions::new().cancel_token(token),
        )
        .await
        .unwrap_err();
    assert_eq!(err.kind, DispatchErrorKind::Cancelled);
    assert_eq!(h.backend.call_count(), 0);
}

/// Fails every call and cancels the dispatch while doing so.
struct CancellingBackend {
    handle: ai_dispatch::dispatch::CancelHandle,
    calls: Mutex<Vec<String>>,
}

#[async_trait]
impl Backend for CancellingBackend {
    async fn call(&self, params: &BackendParams) -> Result<LlmResponse, BackendError> {
        self.calls.lock().unwrap().push(params.target.clone());
        self.handle.cancel();
        Err(BackendError::connect("refused"))
    }
}

#[tokio::test]
async fn cancel_during_a_call_stops_before_the_next_candidate() {
    let (handle, token) = cancel_pair();
    let backend = Arc::new(CancellingBackend {
        handle,
        calls: Mutex::new(Vec::new()),
    });
    let dispatcher = Dispatcher::builder().backend(backend.clone()).build().unwrap();

    let err = dispatcher
        .dispatch_with(
            &request(),
            Some(&candidates(&["a", "b"])[..]),
            &DispatchOptions::new().cancel_token(token),
        )
        .await
        .unwrap_err();
    assert_eq!(err.kind, DispatchErrorKind::Cancelled);
    assert_eq!(err.candidate_index, Some(1));
    assert_eq!(*backend.calls.lock().unwrap(), vec!["a".to_string()]);
}

#[tokio::test]
async fn dispatch_uses_candidate_source_snapshot() {
    let backend = ScriptedBackend::new().replies("a", "from a").replies("b", "from b");
    let source = Arc::new(CandidateSource::new(candidates(&["a"])));
    let dispatcher = Dispatcher::builder()
        .backend(backend.clone())
        .candidates(source.clone())
        .build()
        .unwrap();

    assert_eq!(dispatcher.dispatch(&request()).await.unwrap().content(), "from a");
    source.replace(candidates(&["b"]));
    assert_eq!(dispatcher.dispatch(&request()).await.unwrap().content(), "from b");
}

#[tokio::test]
async fn batch_preserves_input_order() {
    let backend = ScriptedBackend::new().replies("a", "answer");
    let source = Arc::new(CandidateSource::new(candidates(&["a"])));
    let dispatcher = Dispatcher::builder()
        .backend(backend.clone())
        .candidates(source)
        .build()
        .unwrap();

    let requests = vec![
        LogicalRequest::new(vec![Message::user("one")]),
        LogicalRequest::default(),
        LogicalRequest::new(vec![Message::user("three")]),
    ];
    let outcomes = dispatcher.dispatch_batch(requests, 2).await;
    assert_eq!(outcomes.len(), 3);
    assert!(outcomes[0].is_ok());
    assert_eq!(outcomes[1].as_ref().unwrap_err().kind, DispatchErrorKind::Config);
    assert!(outcomes[2].is_ok());
}

#[tokio::test]
async fn shared_cache_across_concurrent_dispatchers() {
    let backend = ScriptedBackend::new().replies("a", "shared");
    let cache = CacheStore::new(Arc::new(MemoryCache::new()));
    let build = || {
        Dispatcher::builder()
            .backend(backend.clone())
            .cache(cache.clone())
            .build()
            .unwrap()
    };
    let (d1, d2) = (build(), build());
    let list = candidates(&["a"]);
    let req = request();

    let (r1, r2) = tokio::join!(
        d1.dispatch_candidates(&req, &list),
        d2.dispatch_candidates(&req, &list)
    );
    assert_eq!(r1.unwrap().response, r2.unwrap().response);
    // Racing duplicates are allowed; the entry exists exactly once.
    assert!(backend.call_count() <= 2);
    assert_eq!(cache.len().await.unwrap(), 1);

    let again = d1.dispatch_candidates(&req, &list).await.unwrap();
    assert!(again.cached);
}

#[tokio::test(start_paused = true)]
async fn exclusive_cache_serializes_concurrent_dispatchers() {
    let backend = ScriptedBackend::new().on(
        "a",
        Behavior::Sleep(Duration::from_millis(200), LlmResponse::text("once")),
    );
    let cache = CacheStore::exclusive(Arc::new(MemoryCache::new()));
    let build = || {
        Dispatcher::builder()
            .backend(backend.clone())
            .cache(cache.clone())
            .build()
            .unwrap()
    };
    let (d1, d2) = (build(), build());
    let list = candidates(&["a"]);
    let req = request();

    let (r1, r2) = tokio::join!(
        d1.dispatch_candidates(&req, &list),
        d2.dispatch_candidates(&req, &list)
    );
    let (r1, r2) = (r1.unwrap(), r2.unwrap());
    assert_eq!(backend.call_count(), 1);
    assert_eq!(r1.response, r2.response);
    assert!(r1.cached != r2.cached);
    assert_eq!(cache.stats().writes, 1);
}
