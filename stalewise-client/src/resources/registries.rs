//! Container registries.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use stalewise_cache::{FetchCoordinator, FetchOptions, MutateOptions, QueryOptions, QueryResult};
use stalewise_core::{FetchResult, Invalidator, Transport};

use super::{ByUser, Patch};

pub const REGISTRIES_PATH: &str = "/api/v1/registries";

pub fn registry_path(id: &str) -> String {
    format!("{REGISTRIES_PATH}/{id}")
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Registry {
    pub id: String,
    pub name: String,
    pub url: String,
    #[serde(default)]
    pub credentials: Option<Credentials>,
    pub created_at: String,
    pub created_by: ByUser,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CreateRegistry {
    pub name: String,
    pub url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub credentials: Option<Credentials>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UpdateCredentials {
    pub username: String,
    /// Left out to keep the current password.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct UpdateRegistry {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(skip_serializing_if = "Patch::is_keep")]
    pub credentials: Patch<UpdateCredentials>,
}

pub struct RegistriesService<T, N> {
    fetcher: FetchCoordinator<T, N>,
    polling_interval: Duration,
}

impl<T, N> RegistriesService<T, N>
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

    pub async fn create(&self, payload: &CreateRegistry) -> FetchResult<Registry> {
        self.fetcher
            .post(REGISTRIES_PATH, Some(payload), MutateOptions::new())
            .await
    }

    pub async fn update(&self, id: &str, payload: &UpdateRegistry) -> FetchResult<Registry> {
        self.fetcher
            .patch(&registry_path(id), Some(payload), MutateOptions::new())
            .await
    }

    /// Delete a registry. Only the listing goes stale: the deleted entry
    /// keeps its last data until it is dropped.
    pub async fn delete(&self, id: &str) -> FetchResult<()> {
        self.fetcher
            .delete(
                &registry_path(id),
                MutateOptions::new()
                    .invalidate(REGISTRIES_PATH)
                    .skip_url_invalidate(),
            )
            .await
    }

    pub async fn fetch_all(&self, options: FetchOptions) -> FetchResult<Vec<Registry>> {
        self.fetcher.get(REGISTRIES_PATH, options).await
    }

    pub async fn fetch_by_id(&self, id: &str, options: FetchOptions) -> FetchResult<Registry> {
        self.fetcher.get(&registry_path(id), options).await
    }

    pub fn query_all(&self) -> QueryResult<Vec<Registry>> {
        self.fetcher.query(
            REGISTRIES_PATH,
            QueryOptions::new().with_refresh_interval(self.polling_interval),
        )
    }
}
