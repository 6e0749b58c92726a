//! Applications.

use std::collections::BTreeMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use stalewise_cache::{FetchCoordinator, FetchOptions, MutateOptions, QueryOptions, QueryResult};
use stalewise_core::{FetchResult, Invalidator, Transport};

use super::deployments::Deployment;
use super::{ByUser, Patch};

pub const APPS_PATH: &str = "/api/v1/apps";

pub fn app_path(id: &str) -> String {
    format!("{APPS_PATH}/{id}")
}

/// Environment name -> service name -> variable name -> value.
pub type EnvironmentVariables = BTreeMap<String, BTreeMap<String, BTreeMap<String, String>>>;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct App {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub cleanup_requested_at: Option<String>,
    pub created_at: String,
    pub created_by: ByUser,
    /// Latest deployment per environment, if any.
    #[serde(default)]
    pub environments: BTreeMap<String, Option<Deployment>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VcsConfig {
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
}

/// An application with its configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AppDetail {
    #[serde(flatten)]
    pub app: App,
    #[serde(default)]
    pub vcs: Option<VcsConfig>,
    #[serde(default)]
    pub env: Option<EnvironmentVariables>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CreateApp {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub env: Option<EnvironmentVariables>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub vcs: Option<VcsConfig>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct UpdateVcs {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(skip_serializing_if = "Patch::is_keep")]
    pub token: Patch<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct UpdateApp {
    #[serde(skip_serializing_if = "Patch::is_keep")]
    pub vcs: Patch<UpdateVcs>,
    #[serde(skip_serializing_if = "Patch::is_keep")]
    pub env: Patch<EnvironmentVariables>,
}

pub struct AppsService<T, N> {
    fetcher: FetchCoordinator<T, N>,
    polling_interval: Duration,
}

impl<T, N> AppsService<T, N>
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

    pub async fn create(&self, payload: &CreateApp) -> FetchResult<AppDetail> {
        self.fetcher
            .post(APPS_PATH, Some(payload), MutateOptions::new())
            .await
    }

    /// Update an app; the app itself and the list go stale.
    pub async fn update(&self, id: &str, payload: &UpdateApp) -> FetchResult<AppDetail> {
        self.fetcher
            .patch(
                &app_path(id),
                Some(payload),
                MutateOptions::new().invalidate(APPS_PATH),
            )
            .await
    }

    pub async fn delete(&self, id: &str) -> FetchResult<()> {
        self.fetcher
            .delete(&app_path(id), MutateOptions::new().invalidate(APPS_PATH))
            .await
    }

    pub async fn fetch_all(&self, options: FetchOptions) -> FetchResult<Vec<App>> {
        self.fetcher.get(APPS_PATH, options).await
    }

    pub async fn fetch_by_id(&self, id: &str, options: FetchOptions) -> FetchResult<AppDetail> {
        self.fetcher.get(&app_path(id), options).await
    }

    pub fn poll_all(&self) -> QueryResult<Vec<App>> {
        self.fetcher.query(
            APPS_PATH,
            QueryOptions::new().with_refresh_interval(self.polling_interval),
        )
    }

    pub fn poll_by_id(&self, id: &str) -> QueryResult<AppDetail> {
        self.fetcher.query(
            &app_path(id),
            QueryOptions::new().with_refresh_interval(self.polling_interval),
        )
    }
}
