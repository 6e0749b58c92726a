use serde::{Deserialize, Serialize};
use stalewise_cache::{FetchCoordinator, FetchOptions};
use stalewise_core::{FetchResult, Invalidator, Transport};

pub const HEALTHCHECK_PATH: &str = "/api/v1/healthcheck";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthCheck {
    pub version: String,
    pub domain: String,
}

pub struct HealthcheckService<T, N> {
    fetcher: FetchCoordinator<T, N>,
}

impl<T, N> HealthcheckService<T, N>
where
    T: Transport + 'static,
    N: Invalidator + 'static,
{
    pub fn new(fetcher: FetchCoordinator<T, N>) -> Self {
        Self { fetcher }
    }

    pub async fn check(&self, options: FetchOptions) -> FetchResult<HealthCheck> {
        self.fetcher.get(HEALTHCHECK_PATH, options).await
    }
}
