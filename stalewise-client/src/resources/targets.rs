//! Deployment targets.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use stalewise_cache::{FetchCoordinator, FetchOptions, MutateOptions, QueryOptions, QueryResult};
use stalewise_core::{FetchResult, Invalidator, Method, QueryParams, Transport};

use super::{ByUser, Patch};

pub const TARGETS_PATH: &str = "/api/v1/targets";

pub fn target_path(id: &str) -> String {
    format!("{TARGETS_PATH}/{id}")
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum TargetStatus {
    Configuring,
    Failed,
    Ready,
}

impl TryFrom<u8> for TargetStatus {
    type Error = String;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Self::Configuring),
            1 => Ok(Self::Failed),
            2 => Ok(Self::Ready),
            other => Err(format!("unknown target status {other}")),
        }
    }
}

impl From<TargetStatus> for u8 {
    fn from(status: TargetStatus) -> Self {
        match status {
            TargetStatus::Configuring => 0,
            TargetStatus::Failed => 1,
            TargetStatus::Ready => 2,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TargetState {
    pub status: TargetStatus,
    #[serde(default)]
    pub error_code: Option<String>,
    #[serde(default)]
    pub last_ready_version: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DockerConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub private_key: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "data", rename_all = "lowercase")]
pub enum ProviderConfig {
    Docker(DockerConfig),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Target {
    pub id: String,
    pub name: String,
    pub url: String,
    pub provider: ProviderConfig,
    pub state: TargetState,
    #[serde(default)]
    pub cleanup_requested_at: Option<String>,
    pub created_at: String,
    pub created_by: ByUser,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CreateTarget {
    pub name: String,
    pub url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub docker: Option<DockerConfig>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct UpdateDocker {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub host: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,
    #[serde(skip_serializing_if = "Patch::is_keep")]
    pub private_key: Patch<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct UpdateTarget {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub docker: Option<UpdateDocker>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TargetFilters {
    pub active_only: Option<bool>,
}

impl TargetFilters {
    pub fn params(&self) -> QueryParams {
        QueryParams::new().with_opt("active_only", self.active_only)
    }
}

pub struct TargetsService<T, N> {
    fetcher: FetchCoordinator<T, N>,
    polling_interval: Duration,
}

impl<T, N> TargetsService<T, N>
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

    pub async fn create(&self, payload: &CreateTarget) -> FetchResult<Target> {
        self.fetcher
            .post(TARGETS_PATH, Some(payload), MutateOptions::new())
            .await
    }

    pub async fn update(&self, id: &str, payload: &UpdateTarget) -> FetchResult<Target> {
        self.fetcher
            .patch(
                &target_path(id),
                Some(payload),
                MutateOptions::new().invalidate(TARGETS_PATH),
            )
            .await
    }

    pub async fn delete(&self, id: &str) -> FetchResult<()> {
        self.fetcher
            .delete(&target_path(id), MutateOptions::new().invalidate(TARGETS_PATH))
            .await
    }

    /// Ask the server to configure the target again.
    pub async fn reconfigure(&self, id: &str) -> FetchResult<()> {
        let url = format!("{}/reconfigure", target_path(id));
        self.fetcher
            .mutate(
                Method::Post,
                &url,
                stalewise_cache::NO_BODY,
                MutateOptions::new().invalidate_all([target_path(id), TARGETS_PATH.to_string()]),
            )
            .await?;
        Ok(())
    }

    pub async fn fetch_all(
        &self,
        filters: TargetFilters,
        options: FetchOptions,
    ) -> FetchResult<Vec<Target>> {
        self.fetcher
            .get(TARGETS_PATH, options.with_params(filters.params()))
            .await
    }

    pub async fn fetch_by_id(&self, id: &str, options: FetchOptions) -> FetchResult<Target> {
        self.fetcher.get(&target_path(id), options).await
    }

    pub fn query_all(&self) -> QueryResult<Vec<Target>> {
        self.fetcher.query(
            TARGETS_PATH,
            QueryOptions::new().with_refresh_interval(self.polling_interval),
        )
    }
}
