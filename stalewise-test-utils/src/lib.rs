//! stalewise Test Utilities
//!
//! Shared test infrastructure for the stalewise workspace:
//! - Scripted mock transport with a call log and an in-flight gate
//! - Manual clock for deterministic staleness decisions
//! - Recording invalidation notifier
//! - Proptest generators for keys and query parameters
//! - JSON fixtures shaped like API responses

pub use stalewise_core::{
    base_key_of, compute_key, CacheConfig, CacheMode, Clock, FetchError, FetchResult, HttpError,
    Invalidator, Method, QueryParams, Request, RequestBody, Timestamp, Transport,
};

use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use chrono::DateTime;
use serde_json::Value;
use tokio::sync::watch;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

// ============================================================================
// MANUAL CLOCK
// ============================================================================

/// Clock that only moves when told to.
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<Timestamp>,
}

impl ManualClock {
    pub fn new(start: Timestamp) -> Self {
        Self {
            now: Mutex::new(start),
        }
    }

    /// Clock starting at a fixed, arbitrary instant.
    pub fn fixed() -> Self {
        // 2024-01-01T00:00:00Z
        Self::new(DateTime::from_timestamp(1_704_067_200, 0).unwrap_or(DateTime::UNIX_EPOCH))
    }

    pub fn advance(&self, by: chrono::Duration) {
        let mut now = lock(&self.now);
        *now += by;
    }

    pub fn advance_millis(&self, millis: i64) {
        self.advance(chrono::Duration::milliseconds(millis));
    }

    pub fn set(&self, at: Timestamp) {
        *lock(&self.now) = at;
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::fixed()
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Timestamp {
        *lock(&self.now)
    }
}

// ============================================================================
// MOCK TRANSPORT
// ============================================================================

struct MockState {
    fallback: FetchResult<Value>,
    queued: HashMap<String, VecDeque<FetchResult<Value>>>,
    routes: HashMap<String, FetchResult<Value>>,
    calls: Vec<Request>,
}

/// Scripted transport.
///
/// Responses are looked up per URL: one-shot responses queued with
/// [`MockTransport::enqueue`] first, then persistent [`MockTransport::route`]
/// responses, then the fallback. Every request is recorded before it waits on
/// the gate, so a held request is already visible in the call log.
pub struct MockTransport {
    state: Mutex<MockState>,
    gate: watch::Sender<bool>,
    call_count: watch::Sender<usize>,
}

impl MockTransport {
    /// Transport answering every request with `Null`.
    pub fn new() -> Self {
        Self::with_fallback(Ok(Value::Null))
    }

    pub fn with_fallback(fallback: FetchResult<Value>) -> Self {
        let (gate, _) = watch::channel(true);
        let (call_count, _) = watch::channel(0);
        Self {
            state: Mutex::new(MockState {
                fallback,
                queued: HashMap::new(),
                routes: HashMap::new(),
                calls: Vec::new(),
            }),
            gate,
            call_count,
        }
    }

    /// Answer the next request to `url` with `response`.
    pub fn enqueue(&self, url: impl Into<String>, response: FetchResult<Value>) -> &Self {
        lock(&self.state)
            .queued
            .entry(url.into())
            .or_default()
            .push_back(response);
        self
    }

    /// Answer every request to `url` with `response`.
    pub fn route(&self, url: impl Into<String>, response: FetchResult<Value>) -> &Self {
        lock(&self.state).routes.insert(url.into(), response);
        self
    }

    pub fn set_fallback(&self, response: FetchResult<Value>) {
        lock(&self.state).fallback = response;
    }

    /// Keep subsequent requests in flight until [`MockTransport::release`].
    pub fn hold(&self) {
        self.gate.send_replace(false);
    }

    pub fn release(&self) {
        self.gate.send_replace(true);
    }

    pub fn calls(&self) -> Vec<Request> {
        lock(&self.state).calls.clone()
    }

    pub fn call_count(&self) -> usize {
        lock(&self.state).calls.len()
    }

    pub fn calls_to(&self, url: &str) -> usize {
        lock(&self.state)
            .calls
            .iter()
            .filter(|request| request.url == url)
            .count()
    }

    pub fn last_call(&self) -> Option<Request> {
        lock(&self.state).calls.last().cloned()
    }

    /// Wait until at least `count` requests have been recorded.
    pub async fn wait_for_calls(&self, count: usize) {
        let mut rx = self.call_count.subscribe();
        // The sender lives as long as self, so the channel cannot close here
        let _ = rx.wait_for(|seen| *seen >= count).await;
    }

    fn respond(&self, url: &str) -> FetchResult<Value> {
        let mut state = lock(&self.state);
        if let Some(response) = state.queued.get_mut(url).and_then(VecDeque::pop_front) {
            return response;
        }
        if let Some(response) = state.routes.get(url) {
            return response.clone();
        }
        state.fallback.clone()
    }
}

impl Default for MockTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn send(&self, request: Request) -> FetchResult<Value> {
        let url = request.url.clone();
        let recorded = {
            let mut state = lock(&self.state);
            state.calls.push(request);
            state.calls.len()
        };
        self.call_count.send_replace(recorded);

        let mut gate = self.gate.subscribe();
        let _ = gate.wait_for(|open| *open).await;

        self.respond(&url)
    }
}

// ============================================================================
// RECORDING INVALIDATOR
// ============================================================================

/// One notification received by [`RecordingInvalidator`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notification {
    Keys(Vec<String>),
    All,
}

/// Invalidator keeping every notification it receives.
#[derive(Debug, Default)]
pub struct RecordingInvalidator {
    notifications: Mutex<Vec<Notification>>,
}

impl RecordingInvalidator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn notifications(&self) -> Vec<Notification> {
        lock(&self.notifications).clone()
    }

    /// Every key passed to `invalidate`, in call order.
    pub fn invalidated_keys(&self) -> Vec<String> {
        lock(&self.notifications)
            .iter()
            .filter_map(|notification| match notification {
                Notification::Keys(keys) => Some(keys.clone()),
                Notification::All => None,
            })
            .flatten()
            .collect()
    }

    pub fn invalidate_all_count(&self) -> usize {
        lock(&self.notifications)
            .iter()
            .filter(|notification| **notification == Notification::All)
            .count()
    }
}

#[async_trait]
impl Invalidator for RecordingInvalidator {
    async fn invalidate(&self, keys: &[String]) {
        lock(&self.notifications).push(Notification::Keys(keys.to_vec()));
    }

    async fn invalidate_all(&self) {
        lock(&self.notifications).push(Notification::All);
    }
}

// ============================================================================
// PROPTEST GENERATORS
// ============================================================================

pub mod generators {
    //! Proptest strategies for keys and query parameters.

    use super::*;
    use proptest::prelude::*;

    /// Generate an API resource path such as `/api/v1/apps/12`.
    pub fn arb_base_key() -> impl Strategy<Value = String> {
        (
            prop::sample::select(vec!["apps", "deployments", "targets", "registries", "jobs"]),
            prop::option::of(1u32..1000),
        )
            .prop_map(|(resource, id)| match id {
                Some(id) => format!("/api/v1/{}/{}", resource, id),
                None => format!("/api/v1/{}", resource),
            })
    }

    /// Generate a query parameter name.
    pub fn arb_param_name() -> impl Strategy<Value = String> {
        "[a-z][a-z_]{0,7}"
    }

    /// Generate a query parameter value, including characters needing escapes.
    pub fn arb_param_value() -> impl Strategy<Value = String> {
        "[a-zA-Z0-9 &=?/%-]{0,12}"
    }

    /// Generate a non-empty parameter set.
    pub fn arb_query_params() -> impl Strategy<Value = QueryParams> {
        prop::collection::btree_map(arb_param_name(), arb_param_value(), 1..5).prop_map(|pairs| {
            pairs
                .into_iter()
                .fold(QueryParams::new(), |params, (name, value)| {
                    params.with(name, value)
                })
        })
    }

    /// Generate a JSON object with optional (nullable) filter fields.
    pub fn arb_filters() -> impl Strategy<Value = Value> {
        (
            prop::option::of(1u32..50),
            prop::option::of(prop::sample::select(vec!["production", "staging", "preview"])),
        )
            .prop_map(|(page, environment)| {
                serde_json::json!({ "page": page, "environment": environment })
            })
    }

    /// Generate a small JSON payload.
    pub fn arb_payload() -> impl Strategy<Value = Value> {
        (any::<u32>(), "[a-z]{1,10}")
            .prop_map(|(id, name)| serde_json::json!({ "id": id, "name": name }))
    }
}

// ============================================================================
// TEST FIXTURES
// ============================================================================

pub mod fixtures {
    //! JSON documents shaped like API responses.

    use serde_json::{json, Value};

    pub fn app(id: u64, slug: &str) -> Value {
        json!({
            "id": id,
            "slug": slug,
            "environments": [
                { "id": 1, "name": "production" },
                { "id": 2, "name": "staging" }
            ]
        })
    }

    pub fn deployment(id: u64, app_id: u64, environment: &str) -> Value {
        json!({
            "id": id,
            "app_id": app_id,
            "environment": environment,
            "status": "HEALTHY",
            "is_current_production": environment == "production"
        })
    }

    /// A paginated list envelope.
    pub fn page(results: Vec<Value>, total: u64, page: u64) -> Value {
        json!({
            "count": total,
            "page": page,
            "next": null,
            "previous": null,
            "results": results
        })
    }

    pub fn validation_failure(fields: &[(&str, &str)]) -> Value {
        let detail: serde_json::Map<String, Value> = fields
            .iter()
            .map(|(name, code)| (name.to_string(), json!({ "code": code })))
            .collect();
        json!({ "code": "validation_failed", "detail": detail })
    }
}
