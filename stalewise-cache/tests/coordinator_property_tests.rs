//! Property-Based Tests for the Fetch Coordinator
//!
//! Covers the cache contract end to end through a scripted transport:
//! staleness, dedupe, shared in-flight fetches, base key invalidation,
//! failure handling and poll teardown.

use std::sync::Arc;
use std::time::Duration;

use futures_util::future::join_all;
use proptest::prelude::*;
use proptest::test_runner::TestCaseError;
use serde_json::{json, Value};
use stalewise_cache::{
    CacheConfig, CacheMode, Clock, FetchCoordinator, FetchError, FetchOptions, HttpError,
    MutateOptions, QueryOptions, QueryParams, QueryResult,
};
use stalewise_test_utils::generators::{arb_base_key, arb_payload, arb_query_params};
use stalewise_test_utils::{ManualClock, MockTransport, RecordingInvalidator};
use tokio::time::sleep;

// ============================================================================
// TEST CONFIGURATION
// ============================================================================

type TestCoordinator = FetchCoordinator<MockTransport, RecordingInvalidator>;

struct Harness {
    coordinator: TestCoordinator,
    transport: Arc<MockTransport>,
    invalidator: Arc<RecordingInvalidator>,
    clock: Arc<ManualClock>,
}

fn harness() -> Harness {
    let transport = Arc::new(MockTransport::new());
    let invalidator = Arc::new(RecordingInvalidator::new());
    let clock = Arc::new(ManualClock::fixed());
    let coordinator = FetchCoordinator::new(
        Arc::clone(&transport),
        Arc::clone(&invalidator),
        CacheConfig::default(),
    )
    .with_clock(clock.clone());

    Harness {
        coordinator,
        transport,
        invalidator,
        clock,
    }
}

fn runtime() -> Result<tokio::runtime::Runtime, TestCaseError> {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .map_err(|e| TestCaseError::fail(format!("Failed to create runtime: {}", e)))
}

fn deployments_page(page: u32) -> FetchOptions {
    FetchOptions::new().with_params(
        QueryParams::new()
            .with("env", "production")
            .with("page", page),
    )
}

fn is_stale(harness: &Harness, key: &str) -> bool {
    harness
        .coordinator
        .store()
        .get(key)
        .map(|entry| {
            entry.must_revalidate(
                harness.coordinator.config().dedupe_window(),
                harness.clock.now(),
            )
        })
        .unwrap_or(true)
}

// ============================================================================
// STALENESS AND DEDUPE
// ============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    /// A key never fetched must revalidate, and a get issues exactly one call.
    #[test]
    fn prop_never_fetched_key_fetches_once(
        base_key in arb_base_key(),
        params in prop::option::of(arb_query_params()),
        payload in arb_payload(),
    ) {
        let rt = runtime()?;
        rt.block_on(async {
            let h = harness();
            let params = params.unwrap_or_default();
            let computed = stalewise_test_utils::compute_key(&base_key, Some(&params));
            h.transport.route(computed.clone(), Ok(payload.clone()));

            prop_assert!(is_stale(&h, &computed));

            let value = h
                .coordinator
                .get_value(&base_key, FetchOptions::new().with_params(params))
                .await
                .map_err(|e| TestCaseError::fail(e.to_string()))?;

            prop_assert_eq!(value, payload);
            prop_assert_eq!(h.transport.call_count(), 1);
            prop_assert_eq!(h.transport.calls_to(&computed), 1);
            Ok(())
        })?;
    }

    /// Within the dedupe interval a get is served from cache; past it the
    /// key is fetched again.
    #[test]
    fn prop_dedupe_interval_governs_refetch(elapsed_ms in 0i64..6000) {
        let rt = runtime()?;
        rt.block_on(async {
            let h = harness();
            h.transport.route("/api/v1/apps", Ok(json!([])));

            h.coordinator
                .get_value("/api/v1/apps", FetchOptions::new())
                .await
                .map_err(|e| TestCaseError::fail(e.to_string()))?;
            h.clock.advance_millis(elapsed_ms);
            h.coordinator
                .get_value("/api/v1/apps", FetchOptions::new())
                .await
                .map_err(|e| TestCaseError::fail(e.to_string()))?;

            let expected = if elapsed_ms > 2000 { 2 } else { 1 };
            prop_assert_eq!(h.transport.call_count(), expected);
            Ok(())
        })?;
    }

    /// Concurrent gets on one uncached key share one call and one result.
    #[test]
    fn prop_concurrent_gets_share_one_fetch(callers in 2usize..16, fail in any::<bool>()) {
        let rt = runtime()?;
        rt.block_on(async {
            let h = harness();
            let response = if fail {
                Err(FetchError::from(HttpError::new(500)))
            } else {
                Ok(json!({ "id": 1 }))
            };
            h.transport.route("/api/v1/apps/1", response.clone());
            h.transport.hold();

            let gets = join_all((0..callers).map(|_| {
                h.coordinator.get_value("/api/v1/apps/1", FetchOptions::new())
            }));
            let release = async {
                h.transport.wait_for_calls(1).await;
                tokio::task::yield_now().await;
                h.transport.release();
            };
            let (results, ()) = tokio::join!(gets, release);

            prop_assert_eq!(h.transport.call_count(), 1);
            prop_assert_eq!(results.len(), callers);
            for result in results {
                prop_assert_eq!(&result, &response);
            }
            Ok(())
        })?;
    }

    /// Invalidating a base key stales all and only the entries derived from it.
    #[test]
    fn prop_invalidation_reaches_all_and_only_derived_keys(
        entries in prop::collection::vec(
            (arb_base_key(), prop::option::of(arb_query_params())),
            1..12,
        ),
        target in any::<prop::sample::Index>(),
    ) {
        let rt = runtime()?;
        rt.block_on(async {
            let h = harness();
            let mut computed = Vec::new();
            for (base_key, params) in &entries {
                let options = match params {
                    Some(params) => FetchOptions::new().with_params(params.clone()),
                    None => FetchOptions::new(),
                };
                h.coordinator
                    .get_value(base_key, options)
                    .await
                    .map_err(|e| TestCaseError::fail(e.to_string()))?;
                computed.push((
                    base_key.clone(),
                    stalewise_test_utils::compute_key(base_key, params.as_ref()),
                ));
            }

            let target = &entries[target.index(entries.len())].0;
            let invalidated = h.coordinator.invalidate(&[target]).await;

            for (base_key, key) in &computed {
                let derived = base_key == target;
                prop_assert_eq!(is_stale(&h, key), derived, "key {}", key);
                prop_assert_eq!(invalidated.contains(key), derived, "key {}", key);
            }
            Ok(())
        })?;
    }
}

// ============================================================================
// INVALIDATION SCENARIOS
// ============================================================================

#[tokio::test]
async fn invalidating_deployments_leaves_app_and_health_fresh() {
    let h = harness();
    h.coordinator
        .get_value("/api/v1/apps/1", FetchOptions::new())
        .await
        .unwrap();
    for page in [1, 2] {
        h.coordinator
            .get_value("/api/v1/apps/1/deployments", deployments_page(page))
            .await
            .unwrap();
    }
    h.coordinator
        .get_value("/api/v1/health", FetchOptions::new())
        .await
        .unwrap();

    let keys = h
        .coordinator
        .invalidate(&["/api/v1/apps/1/deployments"])
        .await;

    assert_eq!(
        keys,
        vec![
            "/api/v1/apps/1/deployments?env=production&page=1".to_string(),
            "/api/v1/apps/1/deployments?env=production&page=2".to_string(),
        ]
    );
    assert!(!is_stale(&h, "/api/v1/apps/1"));
    assert!(!is_stale(&h, "/api/v1/health"));
    assert_eq!(h.invalidator.invalidated_keys(), keys);
}

#[tokio::test]
async fn put_invalidates_url_and_declared_base_keys() {
    let h = harness();
    h.coordinator
        .get_value("/api/v1/apps/1", FetchOptions::new())
        .await
        .unwrap();
    for page in [1, 2] {
        h.coordinator
            .get_value("/api/v1/apps/1/deployments", deployments_page(page))
            .await
            .unwrap();
    }

    let _: Value = h
        .coordinator
        .put(
            "/api/v1/apps/1",
            Some(&json!({ "name": "web" })),
            MutateOptions::new().invalidate("/api/v1/apps/1/deployments"),
        )
        .await
        .unwrap();

    assert!(is_stale(&h, "/api/v1/apps/1"));
    assert!(is_stale(&h, "/api/v1/apps/1/deployments?env=production&page=1"));
    assert!(is_stale(&h, "/api/v1/apps/1/deployments?env=production&page=2"));
    assert_eq!(h.invalidator.invalidated_keys().len(), 3);
}

#[tokio::test]
async fn invalidating_twice_is_a_no_op_beyond_the_first() {
    let h = harness();
    h.coordinator
        .get_value("/api/v1/apps/1", FetchOptions::new())
        .await
        .unwrap();
    let entry = h.coordinator.store().get("/api/v1/apps/1").unwrap();

    entry.invalidate();
    let once = (entry.snapshot(), entry.last_revalidated_at());
    entry.invalidate();

    assert_eq!((entry.snapshot(), entry.last_revalidated_at()), once);
    h.coordinator
        .get_value("/api/v1/apps/1", FetchOptions::new())
        .await
        .unwrap();
    assert_eq!(h.transport.call_count(), 2);
}

// ============================================================================
// FAILURES
// ============================================================================

#[tokio::test]
async fn failed_revalidation_keeps_data_and_next_success_clears_error() {
    let h = harness();
    h.transport
        .enqueue("/api/v1/apps/1", Ok(json!({ "id": 1 })))
        .enqueue("/api/v1/apps/1", Err(FetchError::transport("connection reset")))
        .enqueue("/api/v1/apps/1", Ok(json!({ "id": 1, "name": "web" })));

    h.coordinator
        .get_value("/api/v1/apps/1", FetchOptions::new())
        .await
        .unwrap();

    let failed = h
        .coordinator
        .get_value("/api/v1/apps/1", FetchOptions::new().no_store())
        .await;
    assert_eq!(failed, Err(FetchError::transport("connection reset")));

    let view: QueryResult = h.coordinator.query("/api/v1/apps/1", QueryOptions::new());
    let snapshot = view.snapshot();
    assert_eq!(snapshot.data, Some(json!({ "id": 1 })));
    assert_eq!(snapshot.error, Some(FetchError::transport("connection reset")));

    h.coordinator
        .get_value("/api/v1/apps/1", FetchOptions::new().no_store())
        .await
        .unwrap();
    let snapshot = view.snapshot();
    assert_eq!(snapshot.data, Some(json!({ "id": 1, "name": "web" })));
    assert_eq!(snapshot.error, None);
}

#[tokio::test]
async fn query_swallows_background_failure_into_error() {
    let h = harness();
    h.transport
        .route("/api/v1/jobs", Err(HttpError::new(401).into()));

    let view: QueryResult = h.coordinator.query("/api/v1/jobs", QueryOptions::new());
    assert!(view.is_loading());

    // Joins the background fetch
    let _ = view.entry().wait().await;

    let snapshot = view.snapshot();
    assert!(!snapshot.loading);
    assert_eq!(snapshot.data, None);
    assert_eq!(snapshot.error.and_then(|err| err.status()), Some(401));
}

// ============================================================================
// QUERIES AND POLLING
// ============================================================================

#[tokio::test]
async fn query_serves_fresh_data_without_fetching() {
    let h = harness();
    h.coordinator.seed("/api/v1/targets", None, json!([{ "id": 1 }]));

    let view: QueryResult<Vec<Value>> = h.coordinator.query("/api/v1/targets", QueryOptions::new());

    assert!(!view.is_loading());
    assert_eq!(view.data(), Some(vec![json!({ "id": 1 })]));
    assert_eq!(h.transport.call_count(), 0);
}

#[tokio::test]
async fn query_subscriber_sees_loading_then_data() {
    let h = harness();
    h.transport.route("/api/v1/registries", Ok(json!(["r1"])));
    let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();

    let view: QueryResult<Vec<String>> =
        h.coordinator.query("/api/v1/registries", QueryOptions::new());
    let _subscription = view.subscribe(move |snapshot| {
        let _ = tx.send((snapshot.loading, snapshot.data.clone()));
    });

    assert_eq!(rx.recv().await, Some((true, None)));
    assert_eq!(rx.recv().await, Some((false, Some(vec!["r1".to_string()]))));
}

#[tokio::test(start_paused = true)]
async fn stopping_a_polled_query_prevents_further_calls() {
    let h = harness();
    let key = "/api/v1/apps/1/deployments/3/logs";
    let view: QueryResult = h.coordinator.query(
        key,
        QueryOptions::new()
            .with_cache(CacheMode::NoStore)
            .with_refresh_interval(Duration::from_millis(1000)),
    );

    let subscription = view.subscribe(|_| {});
    sleep(Duration::from_millis(2500)).await;
    // Initial revalidation plus ticks at 1s and 2s
    assert_eq!(h.transport.calls_to(key), 3);

    // The next tick is already scheduled for 3s
    sleep(Duration::from_millis(400)).await;
    subscription.unsubscribe();
    sleep(Duration::from_secs(10)).await;

    assert_eq!(h.transport.calls_to(key), 3);
    assert!(!view.is_polling());
}

#[tokio::test(start_paused = true)]
async fn poll_ticks_respect_the_dedupe_interval() {
    let h = harness();
    let view: QueryResult = h.coordinator.query(
        "/api/v1/apps/1",
        QueryOptions::new().with_refresh_interval(Duration::from_millis(500)),
    );
    let _subscription = view.subscribe(|_| {});

    sleep(Duration::from_millis(1600)).await;
    assert_eq!(h.transport.call_count(), 1);

    h.clock.advance_millis(2001);
    sleep(Duration::from_millis(500)).await;
    assert_eq!(h.transport.call_count(), 2);
}

#[tokio::test(start_paused = true)]
async fn polling_runs_while_any_subscriber_remains() {
    let h = harness();
    let key = "/api/v1/apps/1/deployments/3";
    let view: QueryResult = h.coordinator.query(
        key,
        QueryOptions::new()
            .with_cache(CacheMode::NoStore)
            .with_refresh_interval(Duration::from_millis(1000)),
    );

    let first = view.subscribe(|_| {});
    let second = view.clone().subscribe(|_| {});
    first.unsubscribe();

    sleep(Duration::from_millis(1500)).await;
    assert_eq!(h.transport.calls_to(key), 2);

    drop(second);
    sleep(Duration::from_secs(5)).await;
    assert_eq!(h.transport.calls_to(key), 2);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_tasks_share_one_fetch() {
    let h = harness();
    h.transport.route("/api/v1/health", Ok(json!("ok")));
    let coordinator = h.coordinator.clone();

    let tasks: Vec<_> = (0..32)
        .map(|_| {
            let coordinator = coordinator.clone();
            tokio::spawn(async move {
                coordinator
                    .get_value("/api/v1/health", FetchOptions::new())
                    .await
            })
        })
        .collect();

    for task in join_all(tasks).await {
        assert_eq!(task.unwrap(), Ok(json!("ok")));
    }
    assert_eq!(h.transport.call_count(), 1);
}
