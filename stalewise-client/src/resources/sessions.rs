//! Sessions and the current user's profile.

use serde::{Deserialize, Serialize};
use stalewise_cache::{FetchCoordinator, FetchOptions, MutateOptions};
use stalewise_core::{FetchResult, Invalidator, Transport};
use tracing::info;

pub const SESSIONS_PATH: &str = "/api/v1/sessions";
pub const SESSION_PATH: &str = "/api/v1/session";
pub const PROFILE_PATH: &str = "/api/v1/profile";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Profile {
    pub id: String,
    pub email: String,
    pub api_key: String,
    pub registered_at: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct UpdateProfile {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
}

#[derive(Serialize)]
struct Credentials<'a> {
    email: &'a str,
    password: &'a str,
}

pub struct SessionsService<T, N> {
    fetcher: FetchCoordinator<T, N>,
}

impl<T, N> SessionsService<T, N>
where
    T: Transport + 'static,
    N: Invalidator + 'static,
{
    pub fn new(fetcher: FetchCoordinator<T, N>) -> Self {
        Self { fetcher }
    }

    /// Log in. Everything cached so far belonged to another session, so the
    /// whole cache is dropped on success.
    pub async fn login(&self, email: &str, password: &str) -> FetchResult<Profile> {
        let profile = self
            .fetcher
            .post(
                SESSIONS_PATH,
                Some(&Credentials { email, password }),
                MutateOptions::new().skip_url_invalidate(),
            )
            .await?;
        self.fetcher.reset().await;
        info!(email = %email, "Logged in");
        Ok(profile)
    }

    pub async fn logout(&self) -> FetchResult<()> {
        self.fetcher
            .delete(SESSION_PATH, MutateOptions::new().skip_url_invalidate())
            .await
    }

    pub async fn current(&self, options: FetchOptions) -> FetchResult<Profile> {
        self.fetcher.get(PROFILE_PATH, options).await
    }

    pub async fn update_profile(&self, payload: &UpdateProfile) -> FetchResult<Profile> {
        self.fetcher
            .patch(PROFILE_PATH, Some(payload), MutateOptions::new())
            .await
    }
}
