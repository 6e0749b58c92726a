//! Resource services over the fetch coordinator.
//!
//! Each service only picks keys, parameters and invalidation targets; caching
//! and deduplication live in [`FetchCoordinator`].

pub mod apps;
pub mod deployments;
pub mod healthcheck;
pub mod jobs;
pub mod registries;
pub mod sessions;
pub mod targets;

use std::time::Duration;

use serde::{Deserialize, Serialize};
use stalewise_cache::FetchCoordinator;
use stalewise_core::{Invalidator, Transport};

pub use apps::AppsService;
pub use deployments::DeploymentsService;
pub use healthcheck::HealthcheckService;
pub use jobs::JobsService;
pub use registries::RegistriesService;
pub use sessions::SessionsService;
pub use targets::TargetsService;

/// One page of a listing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Paginated<T> {
    pub data: Vec<T>,
    pub page: u32,
    #[serde(rename = "first_page")]
    pub is_first_page: bool,
    #[serde(rename = "last_page")]
    pub is_last_page: bool,
    pub per_page: u32,
    pub total: u64,
}

/// User who triggered an action.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ByUser {
    pub id: String,
    pub email: String,
}

/// Explicitly set, explicitly removed, or left untouched by an update.
///
/// `Remove` serializes to `null`; skip `Keep` fields with
/// `#[serde(skip_serializing_if = "Patch::is_keep")]`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Patch<T> {
    Keep,
    Remove,
    Set(T),
}

impl<T> Patch<T> {
    pub fn is_keep(&self) -> bool {
        matches!(self, Self::Keep)
    }
}

impl<T> Default for Patch<T> {
    fn default() -> Self {
        Self::Keep
    }
}

impl<T: Serialize> Serialize for Patch<T> {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Self::Set(value) => value.serialize(serializer),
            Self::Keep | Self::Remove => serializer.serialize_none(),
        }
    }
}

/// Refresh intervals of polled queries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollingIntervals {
    pub resources: Duration,
    pub logs: Duration,
}

/// Every resource service sharing one coordinator.
pub struct Services<T, N> {
    pub apps: AppsService<T, N>,
    pub deployments: DeploymentsService<T, N>,
    pub targets: TargetsService<T, N>,
    pub registries: RegistriesService<T, N>,
    pub jobs: JobsService<T, N>,
    pub sessions: SessionsService<T, N>,
    pub healthcheck: HealthcheckService<T, N>,
}

impl<T, N> Services<T, N>
where
    T: Transport + 'static,
    N: Invalidator + 'static,
{
    pub fn new(fetcher: FetchCoordinator<T, N>, intervals: PollingIntervals) -> Self {
        Self {
            apps: AppsService::new(fetcher.clone(), intervals.resources),
            deployments: DeploymentsService::new(fetcher.clone(), intervals),
            targets: TargetsService::new(fetcher.clone(), intervals.resources),
            registries: RegistriesService::new(fetcher.clone(), intervals.resources),
            jobs: JobsService::new(fetcher.clone(), intervals.resources),
            sessions: SessionsService::new(fetcher.clone()),
            healthcheck: HealthcheckService::new(fetcher),
        }
    }
}
