//! A single cached value and its fetch lifecycle.
//!
//! Every state transition happens inside a short synchronous critical
//! section, so a transition is atomic with respect to every other caller on
//! any runtime flavor. The only suspension point is the producer future of
//! the caller leading a fetch.

use std::collections::BTreeMap;
use std::future::Future;
use std::sync::{Arc, Mutex};

use serde_json::Value;
use stalewise_core::{base_key_of, FetchError, FetchResult, Timestamp};
use tokio::sync::oneshot;
use tracing::{debug, trace};

use crate::lock;
use crate::reactive::{StartNotifier, Subscription};

type WaiterQueue = Vec<oneshot::Sender<FetchResult<Value>>>;
type Listener = Arc<dyn Fn(&EntrySnapshot) + Send + Sync>;

/// Observable state of an entry.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EntrySnapshot {
    pub data: Option<Value>,
    pub error: Option<FetchError>,
    pub loading: bool,
}

#[derive(Default)]
struct EntryState {
    data: Option<Value>,
    error: Option<FetchError>,
    last_revalidated_at: Option<Timestamp>,
    /// Present exactly while a fetch is in flight.
    waiters: Option<WaiterQueue>,
}

impl EntryState {
    fn snapshot(&self) -> EntrySnapshot {
        EntrySnapshot {
            data: self.data.clone(),
            error: self.error.clone(),
            loading: self.waiters.is_some(),
        }
    }
}

#[derive(Default)]
struct Listeners {
    next_id: u64,
    by_id: BTreeMap<u64, Listener>,
}

/// One cached response, keyed by its computed key.
pub struct CacheEntry {
    key: String,
    base_key: String,
    state: Mutex<EntryState>,
    listeners: Mutex<Listeners>,
    /// Serializes listener dispatch so observers see changes in order.
    dispatch: Mutex<()>,
}

impl CacheEntry {
    /// Entry for a computed key; the base key is the part before the first `?`.
    pub fn new(key: impl Into<String>) -> Self {
        let key = key.into();
        let base_key = base_key_of(&key).to_string();
        Self::with_base_key(key, base_key)
    }

    pub fn with_base_key(key: impl Into<String>, base_key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            base_key: base_key.into(),
            state: Mutex::new(EntryState::default()),
            listeners: Mutex::new(Listeners::default()),
            dispatch: Mutex::new(()),
        }
    }

    /// Entry already holding a value, as if it had just been fetched at `at`.
    pub fn seeded(key: impl Into<String>, value: Value, at: Timestamp) -> Self {
        let entry = Self::new(key);
        entry.set(value, at);
        entry
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn base_key(&self) -> &str {
        &self.base_key
    }

    /// True if the entry was never revalidated (or was invalidated), or if
    /// more than `dedupe_interval` elapsed since the last fetch started.
    pub fn must_revalidate(&self, dedupe_interval: chrono::Duration, at: Timestamp) -> bool {
        match lock(&self.state).last_revalidated_at {
            None => true,
            Some(last) => at.signed_duration_since(last) > dedupe_interval,
        }
    }

    pub fn last_revalidated_at(&self) -> Option<Timestamp> {
        lock(&self.state).last_revalidated_at
    }

    pub fn is_loading(&self) -> bool {
        lock(&self.state).waiters.is_some()
    }

    pub fn snapshot(&self) -> EntrySnapshot {
        lock(&self.state).snapshot()
    }

    /// Store a value directly: sets data, clears the error and stamps the
    /// revalidation time.
    pub fn set(&self, value: Value, at: Timestamp) {
        {
            let mut state = lock(&self.state);
            state.data = Some(value);
            state.error = None;
            state.last_revalidated_at = Some(at);
        }
        self.notify();
    }

    /// Forget the revalidation time so the next staleness check fetches.
    ///
    /// Cached data and errors stay readable.
    pub fn invalidate(&self) {
        lock(&self.state).last_revalidated_at = None;
    }

    /// Start a fetch, or join the one already in flight.
    ///
    /// The leader gets an [`InFlight`] ticket and must run the producer; the
    /// revalidation time is stamped now, at the start of the attempt. Every
    /// other caller gets a [`Waiter`] settled with the leader's result.
    pub fn begin_update(self: &Arc<Self>, at: Timestamp) -> UpdateTicket {
        self.begin(at, None)
    }

    /// Like [`CacheEntry::begin_update`], but an entry still fresh at `at`
    /// yields [`UpdateTicket::Fresh`] instead of a fetch. The staleness check
    /// and the start of the fetch are one atomic step.
    pub fn begin_revalidation(
        self: &Arc<Self>,
        dedupe_interval: chrono::Duration,
        at: Timestamp,
    ) -> UpdateTicket {
        self.begin(at, Some(dedupe_interval))
    }

    fn begin(
        self: &Arc<Self>,
        at: Timestamp,
        dedupe_interval: Option<chrono::Duration>,
    ) -> UpdateTicket {
        {
            let mut state = lock(&self.state);
            if let Some(waiters) = state.waiters.as_mut() {
                let (tx, rx) = oneshot::channel();
                waiters.push(tx);
                trace!(key = %self.key, waiters = waiters.len(), "Joined in-flight fetch");
                return UpdateTicket::Follower(Waiter {
                    key: self.key.clone(),
                    rx,
                });
            }
            if let (Some(dedupe_interval), Some(last)) =
                (dedupe_interval, state.last_revalidated_at)
            {
                if at.signed_duration_since(last) <= dedupe_interval {
                    return UpdateTicket::Fresh;
                }
            }
            state.last_revalidated_at = Some(at);
            state.waiters = Some(Vec::new());
        }

        debug!(key = %self.key, "Fetch started");
        self.notify();
        UpdateTicket::Leader(InFlight {
            entry: Arc::clone(self),
            settled: false,
        })
    }

    /// Fetch through `producer`, or share the result of the fetch already in
    /// flight (in which case `producer` is never called).
    pub async fn update<F, Fut>(self: &Arc<Self>, at: Timestamp, producer: F) -> FetchResult<Value>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = FetchResult<Value>>,
    {
        match self.begin_update(at) {
            UpdateTicket::Leader(in_flight) => in_flight.run(producer).await,
            UpdateTicket::Follower(waiter) => waiter.wait().await,
            UpdateTicket::Fresh => Ok(self.snapshot().data.unwrap_or(Value::Null)),
        }
    }

    /// Current data, or the outcome of the fetch in flight.
    pub async fn wait(&self) -> FetchResult<Option<Value>> {
        let waiter = {
            let mut state = lock(&self.state);
            match state.waiters.as_mut() {
                None => return Ok(state.data.clone()),
                Some(waiters) => {
                    let (tx, rx) = oneshot::channel();
                    waiters.push(tx);
                    Waiter {
                        key: self.key.clone(),
                        rx,
                    }
                }
            }
        };
        waiter.wait().await.map(Some)
    }

    /// Observe state changes.
    ///
    /// `on_change` is called immediately with the current snapshot and again
    /// after every change. `start` runs once the listener is registered; the
    /// teardown it returns runs when the subscription ends.
    ///
    /// Listeners run synchronously while changes are dispatched: they must
    /// not subscribe to, update or unsubscribe from this same entry. Once the
    /// subscription ends no further call to `on_change` is made.
    pub fn subscribe<F>(
        self: &Arc<Self>,
        on_change: F,
        start: Option<StartNotifier>,
    ) -> Subscription
    where
        F: Fn(&EntrySnapshot) + Send + Sync + 'static,
    {
        let listener: Listener = Arc::new(on_change);
        let id = {
            let _dispatch = lock(&self.dispatch);
            let id = {
                let mut listeners = lock(&self.listeners);
                let id = listeners.next_id;
                listeners.next_id += 1;
                listeners.by_id.insert(id, Arc::clone(&listener));
                id
            };
            listener(&self.snapshot());
            id
        };

        let stop = start.map(|start| start());
        let entry = Arc::clone(self);
        Subscription::new(Box::new(move || {
            {
                // Waits out a dispatch that may already hold this listener
                let _dispatch = lock(&entry.dispatch);
                lock(&entry.listeners).by_id.remove(&id);
            }
            if let Some(stop) = stop {
                stop();
            }
        }))
    }

    pub fn subscriber_count(&self) -> usize {
        lock(&self.listeners).by_id.len()
    }

    fn notify(&self) {
        let _dispatch = lock(&self.dispatch);
        let listeners: Vec<Listener> = lock(&self.listeners).by_id.values().cloned().collect();
        if listeners.is_empty() {
            return;
        }

        // Read after taking the dispatch lock so the last delivery is the latest state
        let snapshot = self.snapshot();
        for listener in listeners {
            listener(&snapshot);
        }
    }

    fn settle(&self, result: &FetchResult<Value>) {
        let waiters = {
            let mut state = lock(&self.state);
            match result {
                Ok(value) => {
                    state.data = Some(value.clone());
                    state.error = None;
                }
                Err(err) => state.error = Some(err.clone()),
            }
            state.waiters.take().unwrap_or_default()
        };

        match result {
            Ok(_) => debug!(key = %self.key, waiters = waiters.len(), "Fetch settled"),
            Err(err) => {
                debug!(key = %self.key, waiters = waiters.len(), error = %err, "Fetch failed")
            }
        }

        self.notify();
        for waiter in waiters {
            // A waiter that stopped listening is not an error
            let _ = waiter.send(result.clone());
        }
    }

    fn abandon(&self) {
        let waiters = {
            let mut state = lock(&self.state);
            state.last_revalidated_at = None;
            state.waiters.take().unwrap_or_default()
        };
        debug!(key = %self.key, waiters = waiters.len(), "Fetch abandoned before settling");
        // Dropping the senders settles every waiter with `Cancelled`
        drop(waiters);
        self.notify();
    }
}

impl std::fmt::Debug for CacheEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = lock(&self.state);
        f.debug_struct("CacheEntry")
            .field("key", &self.key)
            .field("base_key", &self.base_key)
            .field("has_data", &state.data.is_some())
            .field("error", &state.error)
            .field("loading", &state.waiters.is_some())
            .field("last_revalidated_at", &state.last_revalidated_at)
            .finish()
    }
}

/// Outcome of [`CacheEntry::begin_update`].
#[derive(Debug)]
pub enum UpdateTicket {
    /// No fetch was in flight; the holder must run it.
    Leader(InFlight),
    /// A fetch was already in flight; the holder awaits its result.
    Follower(Waiter),
    /// The entry is within its dedupe interval (revalidation only).
    Fresh,
}

/// The right, and duty, to settle the fetch in flight.
///
/// Dropping it before the producer settles rolls the entry back: loading
/// ends, the revalidation time is cleared and every waiter receives
/// [`FetchError::Cancelled`].
pub struct InFlight {
    entry: Arc<CacheEntry>,
    settled: bool,
}

impl InFlight {
    pub fn key(&self) -> &str {
        self.entry.key()
    }

    /// Run the producer and fan its result out to the entry and every waiter.
    pub async fn run<F, Fut>(mut self, producer: F) -> FetchResult<Value>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = FetchResult<Value>>,
    {
        let result = producer().await;
        self.entry.settle(&result);
        self.settled = true;
        result
    }
}

impl Drop for InFlight {
    fn drop(&mut self) {
        if !self.settled {
            self.entry.abandon();
        }
    }
}

impl std::fmt::Debug for InFlight {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InFlight")
            .field("key", &self.entry.key)
            .field("settled", &self.settled)
            .finish()
    }
}

/// A caller queued behind the fetch in flight.
#[derive(Debug)]
pub struct Waiter {
    key: String,
    rx: oneshot::Receiver<FetchResult<Value>>,
}

impl Waiter {
    pub async fn wait(self) -> FetchResult<Value> {
        let Waiter { key, rx } = self;
        match rx.await {
            Ok(result) => result,
            Err(_) => Err(FetchError::Cancelled { key }),
        }
    }
}
