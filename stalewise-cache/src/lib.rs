//! stalewise cache - stale-while-revalidate fetch coordination
//!
//! A keyed store of cached responses with a dedupe policy deciding when a
//! key must be refetched, a waiter queue letting concurrent readers share
//! one fetch, and invalidation by base key so one mutation stales every
//! paginated or filtered variant of a resource.
//!
//! ```text
//! FetchCoordinator ──> CacheStore ──> CacheEntry (data, error, loading, waiters)
//!        │                 └── base key index
//!        ├──> Transport   (HTTP)
//!        └──> Invalidator (re-render signal)
//! ```

use std::sync::{Mutex, MutexGuard, PoisonError};

pub mod coordinator;
pub mod entry;
pub mod notify;
mod poll;
pub mod reactive;
pub mod store;

pub use coordinator::{
    DependsFn, FetchCoordinator, FetchOptions, MutateOptions, QueryOptions, NO_BODY,
};
pub use entry::{CacheEntry, EntrySnapshot, InFlight, UpdateTicket, Waiter};
pub use notify::{BroadcastInvalidator, InvalidationEvent, DEFAULT_NOTIFY_CAPACITY};
pub use reactive::{
    PollStarter, QueryResult, QuerySnapshot, SharedPoller, StartNotifier, Subscription, Teardown,
};
pub use store::CacheStore;

// Re-export the core contracts so most users only need this crate
pub use stalewise_core::{
    CacheConfig, CacheMode, Clock, FetchError, FetchResult, FormPart, HttpError, Invalidator,
    Method, NoopInvalidator, QueryParams, Request, RequestBody, SystemClock, Timestamp, Transport,
};

/// Critical sections never panic, so a poisoned lock still holds valid state.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
