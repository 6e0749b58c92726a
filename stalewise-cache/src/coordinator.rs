//! Fetch coordination over the cache store.
//!
//! The coordinator decides, per request, whether to serve cached data, join
//! the fetch in flight or start a new one. Mutations go straight to the
//! transport and then invalidate every entry derived from the touched base
//! keys before notifying the invalidator.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use futures_util::FutureExt;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use stalewise_core::{
    CacheConfig, CacheMode, Clock, FetchError, FetchResult, FormPart, Invalidator, Method,
    QueryParams, Request, RequestBody, SystemClock, Timestamp, Transport,
};
use tokio::runtime::Handle;
use tracing::{debug, trace, warn};

use crate::entry::{CacheEntry, InFlight, UpdateTicket};
use crate::poll::{spawn_poll_loop, Tick};
use crate::reactive::{PollStarter, QueryResult, SharedPoller, Teardown};
use crate::store::CacheStore;

/// Marks the computed key a read depends on.
pub type DependsFn = Arc<dyn Fn(&str) + Send + Sync>;

/// Placeholder body for mutations sending none.
pub const NO_BODY: Option<&()> = None;

/// Options of a read.
#[derive(Clone, Default)]
pub struct FetchOptions {
    /// Query parameters appended to the key.
    pub params: Option<QueryParams>,
    /// Cache strategy; `NoStore` always fetches.
    pub cache: CacheMode,
    /// Called with the computed key, cached or not.
    pub depends: Option<DependsFn>,
}

impl FetchOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_params(mut self, params: QueryParams) -> Self {
        self.params = Some(params);
        self
    }

    pub fn with_cache(mut self, cache: CacheMode) -> Self {
        self.cache = cache;
        self
    }

    pub fn no_store(self) -> Self {
        self.with_cache(CacheMode::NoStore)
    }

    pub fn with_depends(mut self, depends: impl Fn(&str) + Send + Sync + 'static) -> Self {
        self.depends = Some(Arc::new(depends));
        self
    }
}

impl std::fmt::Debug for FetchOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FetchOptions")
            .field("params", &self.params)
            .field("cache", &self.cache)
            .field("depends", &self.depends.is_some())
            .finish()
    }
}

/// Options of a live query.
#[derive(Debug, Clone, Default)]
pub struct QueryOptions {
    pub fetch: FetchOptions,
    /// Revalidate on this interval while the query has subscribers.
    pub refresh_interval: Option<Duration>,
}

impl QueryOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_params(mut self, params: QueryParams) -> Self {
        self.fetch = self.fetch.with_params(params);
        self
    }

    pub fn with_cache(mut self, cache: CacheMode) -> Self {
        self.fetch = self.fetch.with_cache(cache);
        self
    }

    pub fn with_depends(mut self, depends: impl Fn(&str) + Send + Sync + 'static) -> Self {
        self.fetch = self.fetch.with_depends(depends);
        self
    }

    pub fn with_refresh_interval(mut self, interval: Duration) -> Self {
        self.refresh_interval = Some(interval);
        self
    }
}

impl From<FetchOptions> for QueryOptions {
    fn from(fetch: FetchOptions) -> Self {
        Self {
            fetch,
            refresh_interval: None,
        }
    }
}

/// Options of a mutation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MutateOptions {
    /// Extra base keys to invalidate on success.
    pub invalidate: Vec<String>,
    /// Do not invalidate the mutated URL itself.
    pub skip_url_invalidate: bool,
}

impl MutateOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn invalidate(mut self, base_key: impl Into<String>) -> Self {
        self.invalidate.push(base_key.into());
        self
    }

    pub fn invalidate_all<I, S>(mut self, base_keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.invalidate.extend(base_keys.into_iter().map(Into::into));
        self
    }

    pub fn skip_url_invalidate(mut self) -> Self {
        self.skip_url_invalidate = true;
        self
    }
}

/// Entry point for reads and writes of remote resources.
pub struct FetchCoordinator<T, N> {
    transport: Arc<T>,
    invalidator: Arc<N>,
    store: Arc<CacheStore>,
    config: CacheConfig,
    clock: Arc<dyn Clock>,
}

impl<T, N> Clone for FetchCoordinator<T, N> {
    fn clone(&self) -> Self {
        Self {
            transport: Arc::clone(&self.transport),
            invalidator: Arc::clone(&self.invalidator),
            store: Arc::clone(&self.store),
            config: self.config.clone(),
            clock: Arc::clone(&self.clock),
        }
    }
}

impl<T, N> std::fmt::Debug for FetchCoordinator<T, N> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FetchCoordinator")
            .field("store", &self.store)
            .field("config", &self.config)
            .finish()
    }
}

impl<T, N> FetchCoordinator<T, N>
where
    T: Transport + 'static,
    N: Invalidator + 'static,
{
    pub fn new(transport: Arc<T>, invalidator: Arc<N>, config: CacheConfig) -> Self {
        Self {
            transport,
            invalidator,
            store: Arc::new(CacheStore::new()),
            config,
            clock: Arc::new(SystemClock),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Use a prepared store, typically seeded with bootstrapped entries.
    pub fn with_store(mut self, store: Arc<CacheStore>) -> Self {
        self.store = store;
        self
    }

    pub fn store(&self) -> &Arc<CacheStore> {
        &self.store
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    pub fn transport(&self) -> &Arc<T> {
        &self.transport
    }

    pub fn now(&self) -> Timestamp {
        self.clock.now()
    }

    /// Put a value in the cache without fetching it.
    pub fn seed(&self, key: &str, params: Option<&QueryParams>, value: Value) -> Arc<CacheEntry> {
        let entry = self.store.get_or_create(key, params);
        entry.set(value, self.now());
        entry
    }

    /// Read a key: cached if fresh, fetched otherwise.
    ///
    /// A fresh entry with a fetch in flight resolves with that fetch. A fresh
    /// entry holding only an error returns the error.
    pub async fn get_value(&self, key: &str, options: FetchOptions) -> FetchResult<Value> {
        let now = self.now();
        let entry = self.store.get_or_create(key, options.params.as_ref());

        if let Some(depends) = &options.depends {
            depends(entry.key());
        }

        match self.begin(&entry, options.cache, now) {
            UpdateTicket::Leader(in_flight) => {
                debug!(key = %entry.key(), cache = ?options.cache, "Cache miss, revalidating");
                self.fetch(in_flight, options.cache).await
            }
            UpdateTicket::Follower(waiter) => {
                debug!(key = %entry.key(), "Joined in-flight fetch");
                waiter.wait().await
            }
            UpdateTicket::Fresh => {
                debug!(key = %entry.key(), "Cache hit");
                let snapshot = entry.snapshot();
                match (snapshot.data, snapshot.error) {
                    (Some(value), _) => Ok(value),
                    (None, Some(err)) => Err(err),
                    (None, None) => Ok(Value::Null),
                }
            }
        }
    }

    /// Typed [`FetchCoordinator::get_value`].
    pub async fn get<R: DeserializeOwned>(
        &self,
        key: &str,
        options: FetchOptions,
    ) -> FetchResult<R> {
        let value = self.get_value(key, options).await?;
        decode(key, value)
    }

    /// Live view of a key.
    ///
    /// A stale entry is revalidated in the background; failures only show up
    /// in the view's `error`. With a refresh interval, polling runs while the
    /// view has subscribers.
    pub fn query<R: DeserializeOwned + 'static>(
        &self,
        key: &str,
        options: QueryOptions,
    ) -> QueryResult<R> {
        let now = self.now();
        let QueryOptions {
            fetch,
            refresh_interval,
        } = options;
        let entry = self.store.get_or_create(key, fetch.params.as_ref());

        if let Some(depends) = &fetch.depends {
            depends(entry.key());
        }

        self.try_revalidate(&entry, fetch.cache, now);

        let poller = refresh_interval.map(|interval| self.poller(&entry, fetch.cache, interval));
        QueryResult::new(entry, poller)
    }

    pub async fn post<R, B>(
        &self,
        url: &str,
        body: Option<&B>,
        options: MutateOptions,
    ) -> FetchResult<R>
    where
        R: DeserializeOwned,
        B: Serialize + ?Sized,
    {
        let value = self.mutate(Method::Post, url, body, options).await?;
        decode(url, value)
    }

    pub async fn put<R, B>(
        &self,
        url: &str,
        body: Option<&B>,
        options: MutateOptions,
    ) -> FetchResult<R>
    where
        R: DeserializeOwned,
        B: Serialize + ?Sized,
    {
        let value = self.mutate(Method::Put, url, body, options).await?;
        decode(url, value)
    }

    pub async fn patch<R, B>(
        &self,
        url: &str,
        body: Option<&B>,
        options: MutateOptions,
    ) -> FetchResult<R>
    where
        R: DeserializeOwned,
        B: Serialize + ?Sized,
    {
        let value = self.mutate(Method::Patch, url, body, options).await?;
        decode(url, value)
    }

    pub async fn delete(&self, url: &str, options: MutateOptions) -> FetchResult<()> {
        self.mutate(Method::Delete, url, NO_BODY, options).await?;
        Ok(())
    }

    /// POST a multipart form.
    pub async fn post_multipart<R: DeserializeOwned>(
        &self,
        url: &str,
        parts: Vec<FormPart>,
        options: MutateOptions,
    ) -> FetchResult<R> {
        let request = Request::mutation(Method::Post, url, Some(RequestBody::Multipart(parts)));
        let value = self.send_mutation(request, options).await?;
        decode(url, value)
    }

    /// Send a mutation with an optional JSON body.
    ///
    /// On success the URL's base key (unless skipped) and every base key in
    /// `options.invalidate` are invalidated. A failed request invalidates
    /// nothing.
    pub async fn mutate<B: Serialize + ?Sized>(
        &self,
        method: Method,
        url: &str,
        body: Option<&B>,
        options: MutateOptions,
    ) -> FetchResult<Value> {
        let body = body
            .map(|body| {
                serde_json::to_value(body)
                    .map(RequestBody::Json)
                    .map_err(|err| FetchError::Encode {
                        url: url.to_string(),
                        reason: err.to_string(),
                    })
            })
            .transpose()?;

        self.send_mutation(Request::mutation(method, url, body), options)
            .await
    }

    /// Invalidate every entry derived from the given base keys and notify.
    pub async fn invalidate<S: AsRef<str>>(&self, base_keys: &[S]) -> Vec<String> {
        let keys = self.store.invalidate(base_keys);
        if !keys.is_empty() {
            self.invalidator.invalidate(&keys).await;
        }
        keys
    }

    /// Drop the whole cache, e.g. when the session changes.
    pub async fn reset(&self) {
        self.store.clear();
        debug!("Cache reset");
        self.invalidator.invalidate_all().await;
    }

    async fn send_mutation(&self, request: Request, options: MutateOptions) -> FetchResult<Value> {
        let method = request.method;
        let url = request.url.clone();
        let value = self.transport.send(request).await?;

        let MutateOptions {
            invalidate,
            skip_url_invalidate,
        } = options;
        let mut base_keys = Vec::with_capacity(invalidate.len() + 1);
        if !skip_url_invalidate {
            base_keys.push(url.clone());
        }
        base_keys.extend(invalidate);

        let keys = self.invalidate(&base_keys).await;
        debug!(method = %method, url = %url, invalidated = keys.len(), "Mutation applied");
        Ok(value)
    }

    /// Begin a fetch when the cache mode or staleness asks for one.
    fn begin(&self, entry: &Arc<CacheEntry>, cache: CacheMode, at: Timestamp) -> UpdateTicket {
        if cache == CacheMode::NoStore {
            entry.begin_update(at)
        } else {
            entry.begin_revalidation(self.config.dedupe_window(), at)
        }
    }

    fn fetch(
        &self,
        in_flight: InFlight,
        cache: CacheMode,
    ) -> impl Future<Output = FetchResult<Value>> + Send + 'static {
        let request = Request::get(in_flight.key(), cache);
        let transport = Arc::clone(&self.transport);
        in_flight.run(move || async move { transport.send(request).await })
    }

    /// Start a background revalidation if the entry is stale.
    fn try_revalidate(&self, entry: &Arc<CacheEntry>, cache: CacheMode, at: Timestamp) {
        let Ok(handle) = Handle::try_current() else {
            warn!(key = %entry.key(), "No Tokio runtime, background revalidation skipped");
            return;
        };

        let UpdateTicket::Leader(in_flight) = self.begin(entry, cache, at) else {
            trace!(key = %entry.key(), "Entry fresh or already loading");
            return;
        };

        let key = entry.key().to_string();
        let fetch = self.fetch(in_flight, cache);
        handle.spawn(async move {
            if let Err(err) = fetch.await {
                debug!(key = %key, error = %err, "Background revalidation failed");
            }
        });
    }

    async fn poll_tick(&self, entry: &Arc<CacheEntry>, cache: CacheMode) {
        let result = match self.begin(entry, cache, self.now()) {
            UpdateTicket::Leader(in_flight) => self.fetch(in_flight, cache).await,
            UpdateTicket::Follower(waiter) => waiter.wait().await,
            UpdateTicket::Fresh => {
                trace!(key = %entry.key(), "Poll tick skipped, entry fresh");
                return;
            }
        };

        if let Err(err) = result {
            debug!(key = %entry.key(), error = %err, "Poll revalidation failed");
        }
    }

    fn poller(
        &self,
        entry: &Arc<CacheEntry>,
        cache: CacheMode,
        interval: Duration,
    ) -> Arc<SharedPoller> {
        let interval = self.config.refresh_interval(interval);
        let coordinator = self.clone();
        let entry = Arc::clone(entry);

        let starter: PollStarter = Arc::new(move || -> Teardown {
            let Ok(handle) = Handle::try_current() else {
                warn!(key = %entry.key(), "No Tokio runtime, polling disabled");
                return Box::new(|| {});
            };

            let tick: Tick = {
                let coordinator = coordinator.clone();
                let entry = Arc::clone(&entry);
                Arc::new(move || {
                    let coordinator = coordinator.clone();
                    let entry = Arc::clone(&entry);
                    async move { coordinator.poll_tick(&entry, cache).await }.boxed()
                })
            };
            spawn_poll_loop(&handle, interval, entry.key().to_string(), tick)
        });

        Arc::new(SharedPoller::new(starter))
    }
}

fn decode<R: DeserializeOwned>(key: &str, value: Value) -> FetchResult<R> {
    serde_json::from_value(value).map_err(|err| FetchError::Decode {
        key: key.to_string(),
        reason: err.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use serde_json::json;
    use stalewise_core::HttpError;
    use stalewise_test_utils::{ManualClock, MockTransport, Notification, RecordingInvalidator};

    type TestCoordinator = FetchCoordinator<MockTransport, RecordingInvalidator>;

    fn setup() -> (
        TestCoordinator,
        Arc<MockTransport>,
        Arc<RecordingInvalidator>,
        Arc<ManualClock>,
    ) {
        let transport = Arc::new(MockTransport::new());
        let invalidator = Arc::new(RecordingInvalidator::new());
        let clock = Arc::new(ManualClock::fixed());
        let coordinator = FetchCoordinator::new(
            Arc::clone(&transport),
            Arc::clone(&invalidator),
            CacheConfig::default(),
        )
        .with_clock(clock.clone());
        (coordinator, transport, invalidator, clock)
    }

    #[derive(Debug, Deserialize, PartialEq)]
    struct App {
        id: u64,
    }

    #[tokio::test]
    async fn test_get_decodes_typed_value() {
        let (coordinator, transport, _, _) = setup();
        transport.route("/api/v1/apps/1", Ok(json!({ "id": 1 })));

        let app: App = coordinator.get("/api/v1/apps/1", FetchOptions::new()).await.unwrap();
        assert_eq!(app, App { id: 1 });
    }

    #[tokio::test]
    async fn test_get_decode_failure() {
        let (coordinator, transport, _, _) = setup();
        transport.route("/api/v1/apps/1", Ok(json!("nope")));

        let err = coordinator
            .get::<App>("/api/v1/apps/1", FetchOptions::new())
            .await
            .unwrap_err();
        assert!(matches!(err, FetchError::Decode { .. }));
    }

    #[tokio::test]
    async fn test_get_sends_computed_key_and_cache_mode() {
        let (coordinator, transport, _, _) = setup();
        let options = FetchOptions::new()
            .with_params(QueryParams::new().with("page", 2))
            .no_store();

        coordinator.get_value("/api/v1/jobs", options).await.unwrap();

        let call = transport.last_call().unwrap();
        assert_eq!(call.url, "/api/v1/jobs?page=2");
        assert_eq!(call.method, Method::Get);
        assert_eq!(call.cache, CacheMode::NoStore);
    }

    #[tokio::test]
    async fn test_depends_sees_computed_key_on_hit_and_miss() {
        let (coordinator, _, _, _) = setup();
        let seen = Arc::new(std::sync::Mutex::new(Vec::new()));
        let options = {
            let seen = Arc::clone(&seen);
            FetchOptions::new()
                .with_params(QueryParams::new().with("page", 1))
                .with_depends(move |key| seen.lock().unwrap().push(key.to_string()))
        };

        coordinator.get_value("/api/v1/apps", options.clone()).await.unwrap();
        coordinator.get_value("/api/v1/apps", options).await.unwrap();

        assert_eq!(
            *seen.lock().unwrap(),
            vec!["/api/v1/apps?page=1".to_string(), "/api/v1/apps?page=1".to_string()]
        );
    }

    #[tokio::test]
    async fn test_fresh_error_is_returned_from_cache() {
        let (coordinator, transport, _, _) = setup();
        transport.route("/api/v1/apps/9", Err(HttpError::new(404).into()));

        let first = coordinator.get_value("/api/v1/apps/9", FetchOptions::new()).await;
        let second = coordinator.get_value("/api/v1/apps/9", FetchOptions::new()).await;

        assert_eq!(first, second);
        assert_eq!(first.unwrap_err().status(), Some(404));
        assert_eq!(transport.call_count(), 1);
    }

    #[tokio::test]
    async fn test_mutation_body_and_invalidation() {
        let (coordinator, transport, invalidator, _) = setup();
        coordinator.get_value("/api/v1/apps", FetchOptions::new()).await.unwrap();
        coordinator.get_value("/api/v1/apps/1", FetchOptions::new()).await.unwrap();

        let _: Value = coordinator
            .patch(
                "/api/v1/apps/1",
                Some(&json!({ "name": "web" })),
                MutateOptions::new().invalidate("/api/v1/apps"),
            )
            .await
            .unwrap();

        let call = transport.last_call().unwrap();
        assert_eq!(call.method, Method::Patch);
        assert_eq!(call.body, Some(RequestBody::Json(json!({ "name": "web" }))));
        assert_eq!(
            invalidator.notifications(),
            vec![Notification::Keys(vec![
                "/api/v1/apps/1".to_string(),
                "/api/v1/apps".to_string()
            ])]
        );
    }

    #[tokio::test]
    async fn test_failed_mutation_invalidates_nothing() {
        let (coordinator, transport, invalidator, clock) = setup();
        coordinator.get_value("/api/v1/apps/1", FetchOptions::new()).await.unwrap();
        transport.route("/api/v1/apps/1", Err(HttpError::new(500).into()));

        let err = coordinator
            .delete("/api/v1/apps/1", MutateOptions::new())
            .await
            .unwrap_err();

        assert_eq!(err.status(), Some(500));
        assert!(invalidator.notifications().is_empty());
        let entry = coordinator.store().get("/api/v1/apps/1").unwrap();
        assert!(!entry.must_revalidate(coordinator.config().dedupe_window(), clock.now()));
    }

    #[tokio::test]
    async fn test_skip_url_invalidate() {
        let (coordinator, _, invalidator, _) = setup();
        coordinator.get_value("/api/v1/registries/1", FetchOptions::new()).await.unwrap();
        coordinator.get_value("/api/v1/registries", FetchOptions::new()).await.unwrap();

        coordinator
            .delete(
                "/api/v1/registries/1",
                MutateOptions::new().invalidate("/api/v1/registries").skip_url_invalidate(),
            )
            .await
            .unwrap();

        assert_eq!(invalidator.invalidated_keys(), vec!["/api/v1/registries".to_string()]);
    }

    #[tokio::test]
    async fn test_multipart_post() {
        let (coordinator, transport, _, _) = setup();
        let parts = vec![FormPart::File {
            name: "archive".to_string(),
            file_name: "app.tar.gz".to_string(),
            bytes: vec![1, 2, 3],
        }];

        let _: Value = coordinator
            .post_multipart("/api/v1/apps/1/deployments", parts.clone(), MutateOptions::new())
            .await
            .unwrap();

        assert_eq!(
            transport.last_call().unwrap().body,
            Some(RequestBody::Multipart(parts))
        );
    }

    #[tokio::test]
    async fn test_reset_clears_store_and_notifies() {
        let (coordinator, _, invalidator, _) = setup();
        coordinator.seed("/api/v1/profile", None, json!({ "email": "a@b.c" }));
        assert_eq!(coordinator.store().len(), 1);

        coordinator.reset().await;

        assert!(coordinator.store().is_empty());
        assert_eq!(invalidator.invalidate_all_count(), 1);
    }

    #[tokio::test]
    async fn test_seeded_value_is_served_without_fetch() {
        let (coordinator, transport, _, _) = setup();
        coordinator.seed("/api/v1/apps", None, json!([]));

        let value = coordinator.get_value("/api/v1/apps", FetchOptions::new()).await.unwrap();
        assert_eq!(value, json!([]));
        assert_eq!(transport.call_count(), 0);
    }

    #[test]
    fn test_query_without_runtime_keeps_entry_stale() {
        let (coordinator, transport, _, clock) = setup();
        let result: QueryResult = coordinator.query("/api/v1/apps", QueryOptions::new());

        assert!(!result.is_loading());
        assert_eq!(transport.call_count(), 0);
        assert!(result
            .entry()
            .must_revalidate(coordinator.config().dedupe_window(), clock.now()));
    }
}
