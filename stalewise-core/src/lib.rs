//! stalewise core - shared types
//!
//! Cache keys, errors, clock and the contracts of the collaborators (HTTP
//! transport and invalidation notifier). Every other crate depends on this
//! one; it holds no cache logic.

pub mod clock;
pub mod config;
pub mod error;
pub mod key;
pub mod transport;

pub use clock::{Clock, SystemClock, Timestamp};
pub use config::{CacheConfig, DEFAULT_DEDUPE_INTERVAL, DEFAULT_MIN_REFRESH_INTERVAL};
pub use error::{
    ConfigError, FetchError, FetchResult, HttpError, HttpErrorKind, ParamsError, StalewiseError,
    StalewiseResult, VALIDATION_FAILED_CODE,
};
pub use key::{base_key_of, compute_key, QueryParams};
pub use transport::{
    CacheMode, FormPart, Invalidator, Method, NoopInvalidator, Request, RequestBody, Transport,
};
