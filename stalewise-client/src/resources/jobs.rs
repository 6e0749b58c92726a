//! Background jobs queued on the server.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use stalewise_cache::{FetchCoordinator, FetchOptions, MutateOptions, QueryOptions, QueryResult};
use stalewise_core::{FetchResult, Invalidator, QueryParams, Transport};

use super::Paginated;

pub const JOBS_PATH: &str = "/api/v1/jobs";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Job {
    pub id: String,
    pub resource_id: String,
    pub group: String,
    pub message_name: String,
    pub message_data: String,
    pub queued_at: String,
    pub not_before: String,
    #[serde(default)]
    pub error_code: Option<String>,
    /// Bit set of [`JobPolicy`] flags.
    pub policy: u8,
    pub retrieved: bool,
}

impl Job {
    pub fn has_policy(&self, policy: JobPolicy) -> bool {
        self.policy & policy as u8 != 0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum JobPolicy {
    PreserveOrder = 1,
    WaitForOthersResourceId = 2,
    Cancellable = 4,
}

fn page_params(page: u32) -> QueryParams {
    QueryParams::new().with("page", page)
}

pub struct JobsService<T, N> {
    fetcher: FetchCoordinator<T, N>,
    polling_interval: Duration,
}

impl<T, N> JobsService<T, N>
where
    T: Transport + 'static,
    N: Invalidator + 'static,
{
    pub fn new(fetcher: FetchCoordinator<T, N>, polling_interval: Duration) -> Self {
        Self {
            fetcher,
            polling_interval,
        }
    }

    /// Cancel a job; every page goes stale.
    pub async fn delete(&self, id: &str) -> FetchResult<()> {
        self.fetcher
            .delete(
                &format!("{JOBS_PATH}/{id}"),
                MutateOptions::new().invalidate(JOBS_PATH),
            )
            .await
    }

    pub async fn fetch_all(&self, page: u32, options: FetchOptions) -> FetchResult<Paginated<Job>> {
        self.fetcher
            .get(JOBS_PATH, options.with_params(page_params(page)))
            .await
    }

    pub fn query_all(&self, page: u32) -> QueryResult<Paginated<Job>> {
        self.fetcher.query(
            JOBS_PATH,
            QueryOptions::new()
                .with_params(page_params(page))
                .with_refresh_interval(self.polling_interval),
        )
    }
}
