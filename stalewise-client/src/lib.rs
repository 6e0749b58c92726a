//! stalewise client
//!
//! Wires the fetch coordinator to a real HTTP API: reqwest transport, TOML
//! configuration, tracing setup and one service per API resource.

pub mod cli;
pub mod config;
pub mod error;
pub mod http;
pub mod resources;
pub mod telemetry;

use std::sync::Arc;

use stalewise_cache::{BroadcastInvalidator, FetchCoordinator, DEFAULT_NOTIFY_CAPACITY};

pub use config::{AuthConfig, ClientConfig, ClientConfigError, LogConfig, LogFormat};
pub use error::{ClientError, ClientResult};
pub use http::HttpTransport;
pub use resources::{Paginated, Patch, PollingIntervals, Services};

/// Coordinator used by the binary.
pub type HttpCoordinator = FetchCoordinator<HttpTransport, BroadcastInvalidator>;

/// A configured client: one coordinator shared by every service.
pub struct Client {
    fetcher: HttpCoordinator,
    invalidator: Arc<BroadcastInvalidator>,
    services: Services<HttpTransport, BroadcastInvalidator>,
}

impl Client {
    pub fn new(config: &ClientConfig) -> ClientResult<Self> {
        let transport = Arc::new(HttpTransport::new(config)?);
        let invalidator = Arc::new(BroadcastInvalidator::new(DEFAULT_NOTIFY_CAPACITY));
        let fetcher =
            FetchCoordinator::new(transport, Arc::clone(&invalidator), config.cache_config());
        let services = Services::new(
            fetcher.clone(),
            PollingIntervals {
                resources: config.polling_interval(),
                logs: config.logs_polling_interval(),
            },
        );

        Ok(Self {
            fetcher,
            invalidator,
            services,
        })
    }

    pub fn fetcher(&self) -> &HttpCoordinator {
        &self.fetcher
    }

    /// Invalidation events, for callers re-rendering on change.
    pub fn invalidator(&self) -> &Arc<BroadcastInvalidator> {
        &self.invalidator
    }

    pub fn services(&self) -> &Services<HttpTransport, BroadcastInvalidator> {
        &self.services
    }
}
