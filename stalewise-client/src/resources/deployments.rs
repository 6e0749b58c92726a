//! Deployments of an application.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use stalewise_cache::{FetchCoordinator, FetchOptions, MutateOptions, QueryOptions, QueryResult};
use stalewise_core::{FetchResult, FormPart, Invalidator, QueryParams, Transport};

use super::apps::{app_path, APPS_PATH};
use super::{ByUser, Paginated, PollingIntervals};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum DeploymentStatus {
    Pending,
    Running,
    Failed,
    Succeeded,
}

impl TryFrom<u8> for DeploymentStatus {
    type Error = String;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Self::Pending),
            1 => Ok(Self::Running),
            2 => Ok(Self::Failed),
            3 => Ok(Self::Succeeded),
            other => Err(format!("unknown deployment status {other}")),
        }
    }
}

impl From<DeploymentStatus> for u8 {
    fn from(status: DeploymentStatus) -> Self {
        match status {
            DeploymentStatus::Pending => 0,
            DeploymentStatus::Running => 1,
            DeploymentStatus::Failed => 2,
            DeploymentStatus::Succeeded => 3,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    Production,
    Staging,
}

impl Environment {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Production => "production",
            Self::Staging => "staging",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    Archive,
    Git,
    Raw,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceMeta {
    pub kind: SourceKind,
    pub data: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Service {
    pub name: String,
    pub image: String,
    #[serde(default)]
    pub url: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeploymentState {
    pub status: DeploymentStatus,
    #[serde(default)]
    pub error_code: Option<String>,
    #[serde(default)]
    pub started_at: Option<String>,
    #[serde(default)]
    pub finished_at: Option<String>,
    #[serde(default)]
    pub services: Vec<Service>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Deployment {
    pub app_id: String,
    pub deployment_number: u32,
    pub environment: Environment,
    pub meta: SourceMeta,
    pub state: DeploymentState,
    pub requested_at: String,
    pub requested_by: ByUser,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GitSource {
    pub branch: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hash: Option<String>,
}

/// What to deploy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueueDeployment {
    /// Raw compose-like definition.
    Raw {
        environment: Environment,
        raw: String,
    },
    Git {
        environment: Environment,
        git: GitSource,
    },
    /// A tar.gz archive sent as a multipart form.
    Archive {
        environment: Environment,
        file_name: String,
        bytes: Vec<u8>,
    },
}

#[derive(Serialize)]
struct QueueJsonBody<'a> {
    environment: Environment,
    #[serde(skip_serializing_if = "Option::is_none")]
    raw: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    git: Option<&'a GitSource>,
}

/// Filters of a deployment listing.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeploymentFilters {
    pub page: Option<u32>,
    pub environment: Option<Environment>,
}

impl DeploymentFilters {
    pub fn params(&self) -> QueryParams {
        QueryParams::new()
            .with_opt("page", self.page)
            .with_opt("environment", self.environment.map(|env| env.as_str()))
    }
}

pub fn deployments_path(app_id: &str) -> String {
    format!("{}/deployments", app_path(app_id))
}

pub fn deployment_path(app_id: &str, number: u32) -> String {
    format!("{}/{number}", deployments_path(app_id))
}

pub struct DeploymentsService<T, N> {
    fetcher: FetchCoordinator<T, N>,
    intervals: PollingIntervals,
}

impl<T, N> DeploymentsService<T, N>
where
    T: Transport + 'static,
    N: Invalidator + 'static,
{
    pub fn new(fetcher: FetchCoordinator<T, N>, intervals: PollingIntervals) -> Self {
        Self { fetcher, intervals }
    }

    /// Queue a new deployment of an app.
    pub async fn queue(&self, app_id: &str, payload: &QueueDeployment) -> FetchResult<Deployment> {
        let url = deployments_path(app_id);
        let options = self.app_related(app_id);

        match payload {
            QueueDeployment::Raw { environment, raw } => {
                let body = QueueJsonBody {
                    environment: *environment,
                    raw: Some(raw.as_str()),
                    git: None,
                };
                self.fetcher.post(&url, Some(&body), options).await
            }
            QueueDeployment::Git { environment, git } => {
                let body = QueueJsonBody {
                    environment: *environment,
                    raw: None,
                    git: Some(git),
                };
                self.fetcher.post(&url, Some(&body), options).await
            }
            QueueDeployment::Archive {
                environment,
                file_name,
                bytes,
            } => {
                let parts = vec![
                    FormPart::Text {
                        name: "environment".to_string(),
                        value: environment.as_str().to_string(),
                    },
                    FormPart::File {
                        name: "archive".to_string(),
                        file_name: file_name.clone(),
                        bytes: bytes.clone(),
                    },
                ];
                self.fetcher.post_multipart(&url, parts, options).await
            }
        }
    }

    /// Deploy the sources of an existing deployment again.
    pub async fn redeploy(&self, app_id: &str, number: u32) -> FetchResult<Deployment> {
        let url = format!("{}/redeploy", deployment_path(app_id, number));
        self.fetcher
            .post(&url, stalewise_cache::NO_BODY, self.new_deployment(app_id))
            .await
    }

    /// Deploy a staging deployment to production.
    pub async fn promote(&self, app_id: &str, number: u32) -> FetchResult<Deployment> {
        let url = format!("{}/promote", deployment_path(app_id, number));
        self.fetcher
            .post(&url, stalewise_cache::NO_BODY, self.new_deployment(app_id))
            .await
    }

    /// Paginated deployments of an app; each filter combination is cached
    /// on its own.
    pub fn query_all_by_app(
        &self,
        app_id: &str,
        filters: &DeploymentFilters,
    ) -> QueryResult<Paginated<Deployment>> {
        self.fetcher.query(
            &deployments_path(app_id),
            QueryOptions::new().with_params(filters.params()),
        )
    }

    pub async fn fetch_by_app_and_number(
        &self,
        app_id: &str,
        number: u32,
        options: FetchOptions,
    ) -> FetchResult<Deployment> {
        self.fetcher
            .get(&deployment_path(app_id, number), options)
            .await
    }

    pub fn poll_by_app_and_number(&self, app_id: &str, number: u32) -> QueryResult<Deployment> {
        self.fetcher.query(
            &deployment_path(app_id, number),
            QueryOptions::new().with_refresh_interval(self.intervals.resources),
        )
    }

    /// Logs are always refetched: stale conditional responses are never
    /// acceptable for them.
    pub fn poll_logs(&self, app_id: &str, number: u32) -> QueryResult<String> {
        self.fetcher.query(
            &format!("{}/logs", deployment_path(app_id, number)),
            QueryOptions::from(FetchOptions::new().no_store())
                .with_refresh_interval(self.intervals.logs),
        )
    }

    pub fn logs_polling_interval(&self) -> Duration {
        self.intervals.logs
    }

    fn app_related(&self, app_id: &str) -> MutateOptions {
        MutateOptions::new()
            .invalidate(app_path(app_id))
            .invalidate(APPS_PATH)
    }

    /// Mutations posted under a deployment's own URL still add to the app's
    /// listing, which their URL does not cover.
    fn new_deployment(&self, app_id: &str) -> MutateOptions {
        self.app_related(app_id)
            .skip_url_invalidate()
            .invalidate(deployments_path(app_id))
    }
}
