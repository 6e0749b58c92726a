//! Live views over cache entries.
//!
//! A [`Subscription`] ends when unsubscribed or dropped. A [`SharedPoller`]
//! runs one background job for any number of subscribers: started by the
//! first, stopped by the last.

use std::marker::PhantomData;
use std::sync::{Arc, Mutex};

use serde::de::DeserializeOwned;
use serde_json::Value;
use stalewise_core::FetchError;

use crate::entry::{CacheEntry, EntrySnapshot};
use crate::lock;

/// Cleanup run once when something stops.
pub type Teardown = Box<dyn FnOnce() + Send>;

/// Called when a subscription starts; returns what to run when it stops.
pub type StartNotifier = Box<dyn FnOnce() -> Teardown + Send>;

/// Starts a background job and returns its teardown.
pub type PollStarter = Arc<dyn Fn() -> Teardown + Send + Sync>;

/// Handle to an active subscription.
#[must_use = "dropping a subscription unsubscribes immediately"]
pub struct Subscription {
    teardown: Option<Teardown>,
}

impl Subscription {
    pub fn new(teardown: Teardown) -> Self {
        Self {
            teardown: Some(teardown),
        }
    }

    pub fn unsubscribe(mut self) {
        self.stop();
    }

    fn stop(&mut self) {
        if let Some(teardown) = self.teardown.take() {
            teardown();
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.stop();
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("active", &self.teardown.is_some())
            .finish()
    }
}

#[derive(Default)]
struct PollerState {
    subscribers: usize,
    teardown: Option<Teardown>,
}

/// Ref-counted start/stop of a background job.
pub struct SharedPoller {
    starter: PollStarter,
    state: Mutex<PollerState>,
}

impl SharedPoller {
    pub fn new(starter: PollStarter) -> Self {
        Self {
            starter,
            state: Mutex::new(PollerState::default()),
        }
    }

    /// Register a subscriber, starting the job for the first one.
    ///
    /// The returned teardown releases this subscriber.
    pub fn acquire(self: &Arc<Self>) -> Teardown {
        {
            let mut state = lock(&self.state);
            state.subscribers += 1;
            if state.subscribers == 1 {
                state.teardown = Some((self.starter)());
            }
        }

        let poller = Arc::clone(self);
        Box::new(move || poller.release())
    }

    pub fn subscriber_count(&self) -> usize {
        lock(&self.state).subscribers
    }

    pub fn is_running(&self) -> bool {
        lock(&self.state).teardown.is_some()
    }

    fn release(&self) {
        let teardown = {
            let mut state = lock(&self.state);
            state.subscribers = state.subscribers.saturating_sub(1);
            if state.subscribers == 0 {
                state.teardown.take()
            } else {
                None
            }
        };
        if let Some(teardown) = teardown {
            teardown();
        }
    }
}

impl std::fmt::Debug for SharedPoller {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = lock(&self.state);
        f.debug_struct("SharedPoller")
            .field("subscribers", &state.subscribers)
            .field("running", &state.teardown.is_some())
            .finish()
    }
}

/// Typed view of an entry's state.
#[derive(Debug, Clone, PartialEq)]
pub struct QuerySnapshot<T> {
    /// Last fetched data, `None` if not fetched yet.
    pub data: Option<T>,
    /// Error of the last retrieval, if any.
    pub error: Option<FetchError>,
    /// Is a fetch currently in flight.
    pub loading: bool,
}

impl<T: DeserializeOwned> QuerySnapshot<T> {
    fn decode(key: &str, snapshot: &EntrySnapshot) -> Self {
        let (data, decode_error) = match &snapshot.data {
            None => (None, None),
            Some(value) => match serde_json::from_value::<T>(value.clone()) {
                Ok(data) => (Some(data), None),
                Err(err) => (
                    None,
                    Some(FetchError::Decode {
                        key: key.to_string(),
                        reason: err.to_string(),
                    }),
                ),
            },
        };

        Self {
            data,
            error: snapshot.error.clone().or(decode_error),
            loading: snapshot.loading,
        }
    }
}

/// Live result of a query.
///
/// Clones share the same poller, so polling runs while any clone has a
/// subscriber.
pub struct QueryResult<T = Value> {
    entry: Arc<CacheEntry>,
    poller: Option<Arc<SharedPoller>>,
    _marker: PhantomData<fn() -> T>,
}

impl<T> Clone for QueryResult<T> {
    fn clone(&self) -> Self {
        Self {
            entry: Arc::clone(&self.entry),
            poller: self.poller.clone(),
            _marker: PhantomData,
        }
    }
}

impl<T> std::fmt::Debug for QueryResult<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueryResult")
            .field("entry", &self.entry)
            .field("poller", &self.poller)
            .finish()
    }
}

impl<T: DeserializeOwned + 'static> QueryResult<T> {
    pub(crate) fn new(entry: Arc<CacheEntry>, poller: Option<Arc<SharedPoller>>) -> Self {
        Self {
            entry,
            poller,
            _marker: PhantomData,
        }
    }

    pub fn key(&self) -> &str {
        self.entry.key()
    }

    pub fn entry(&self) -> &Arc<CacheEntry> {
        &self.entry
    }

    pub fn is_polling(&self) -> bool {
        self.poller.as_ref().is_some_and(|poller| poller.is_running())
    }

    pub fn snapshot(&self) -> QuerySnapshot<T> {
        QuerySnapshot::decode(self.entry.key(), &self.entry.snapshot())
    }

    pub fn data(&self) -> Option<T> {
        self.snapshot().data
    }

    pub fn error(&self) -> Option<FetchError> {
        self.snapshot().error
    }

    pub fn is_loading(&self) -> bool {
        self.entry.is_loading()
    }

    /// Observe the query. Polling, if configured, runs while at least one
    /// subscription is alive.
    pub fn subscribe<F>(&self, on_change: F) -> Subscription
    where
        F: Fn(&QuerySnapshot<T>) + Send + Sync + 'static,
    {
        let key = self.entry.key().to_string();
        let start = self.poller.clone().map(|poller| {
            let start: StartNotifier = Box::new(move || poller.acquire());
            start
        });

        self.entry.subscribe(
            move |snapshot| on_change(&QuerySnapshot::decode(&key, snapshot)),
            start,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use serde_json::json;
    use stalewise_test_utils::{Clock, ManualClock};
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Debug, Deserialize, PartialEq)]
    struct App {
        id: u64,
    }

    fn counting_poller() -> (Arc<SharedPoller>, Arc<AtomicUsize>, Arc<AtomicUsize>) {
        let started = Arc::new(AtomicUsize::new(0));
        let stopped = Arc::new(AtomicUsize::new(0));
        let starter: PollStarter = {
            let started = Arc::clone(&started);
            let stopped = Arc::clone(&stopped);
            Arc::new(move || -> Teardown {
                started.fetch_add(1, Ordering::SeqCst);
                let stopped = Arc::clone(&stopped);
                Box::new(move || {
                    stopped.fetch_add(1, Ordering::SeqCst);
                })
            })
        };
        (Arc::new(SharedPoller::new(starter)), started, stopped)
    }

    #[test]
    fn test_subscription_teardown_runs_once() {
        let count = Arc::new(AtomicUsize::new(0));
        let subscription = {
            let count = Arc::clone(&count);
            Subscription::new(Box::new(move || {
                count.fetch_add(1, Ordering::SeqCst);
            }))
        };

        subscription.unsubscribe();
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_poller_starts_on_first_and_stops_on_last() {
        let (poller, started, stopped) = counting_poller();

        let first = poller.acquire();
        let second = poller.acquire();
        assert_eq!(started.load(Ordering::SeqCst), 1);
        assert!(poller.is_running());

        first();
        assert_eq!(stopped.load(Ordering::SeqCst), 0);
        second();
        assert_eq!(stopped.load(Ordering::SeqCst), 1);
        assert!(!poller.is_running());

        let third = poller.acquire();
        assert_eq!(started.load(Ordering::SeqCst), 2);
        third();
        assert_eq!(poller.subscriber_count(), 0);
    }

    #[test]
    fn test_query_result_decodes_data() {
        let entry = Arc::new(CacheEntry::seeded(
            "/api/v1/apps/1",
            json!({ "id": 1, "slug": "web" }),
            ManualClock::fixed().now(),
        ));
        let result: QueryResult<App> = QueryResult::new(entry, None);

        assert_eq!(result.data(), Some(App { id: 1 }));
        assert_eq!(result.error(), None);
        assert!(!result.is_loading());
    }

    #[test]
    fn test_undecodable_data_surfaces_as_error() {
        let entry = Arc::new(CacheEntry::seeded(
            "/api/v1/apps/1",
            json!("not an app"),
            ManualClock::fixed().now(),
        ));
        let result: QueryResult<App> = QueryResult::new(entry, None);

        let snapshot = result.snapshot();
        assert_eq!(snapshot.data, None);
        assert!(matches!(snapshot.error, Some(FetchError::Decode { .. })));
    }

    #[test]
    fn test_subscribers_share_the_poller() {
        let (poller, started, stopped) = counting_poller();
        let entry = Arc::new(CacheEntry::new("/api/v1/apps"));
        let result: QueryResult = QueryResult::new(entry, Some(poller));
        let clone = result.clone();

        let first = result.subscribe(|_| {});
        let second = clone.subscribe(|_| {});
        assert_eq!(started.load(Ordering::SeqCst), 1);
        assert!(result.is_polling());

        drop(first);
        assert!(clone.is_polling());
        second.unsubscribe();
        assert_eq!(stopped.load(Ordering::SeqCst), 1);
        assert!(!result.is_polling());
    }
}
