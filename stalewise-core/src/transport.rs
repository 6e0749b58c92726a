//! Contracts of the collaborators the cache talks to.
//!
//! The transport performs the actual HTTP exchange; the invalidator tells the
//! hosting application which cached keys became stale.

use async_trait::async_trait;
use serde_json::Value;

use crate::error::FetchResult;

/// HTTP verbs used by the fetch layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Method {
    Get,
    Post,
    Put,
    Patch,
    Delete,
}

impl Method {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Get => "GET",
            Self::Post => "POST",
            Self::Put => "PUT",
            Self::Patch => "PATCH",
            Self::Delete => "DELETE",
        }
    }

    /// True for verbs that change server state.
    pub fn is_mutation(&self) -> bool {
        !matches!(self, Self::Get)
    }
}

impl std::fmt::Display for Method {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Cache strategy requested for a single call.
///
/// `NoStore` also bypasses the dedupe interval of the in-memory cache; the
/// other modes are only forwarded to the transport.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum CacheMode {
    #[default]
    Default,
    NoStore,
    NoCache,
    Reload,
}

impl CacheMode {
    /// `Cache-Control` request header value, if the mode maps to one.
    pub fn cache_control(&self) -> Option<&'static str> {
        match self {
            Self::Default => None,
            Self::NoStore => Some("no-store"),
            Self::NoCache | Self::Reload => Some("no-cache"),
        }
    }
}

/// One part of a multipart body.
#[derive(Debug, Clone, PartialEq)]
pub enum FormPart {
    Text {
        name: String,
        value: String,
    },
    File {
        name: String,
        file_name: String,
        bytes: Vec<u8>,
    },
}

/// Request payload.
#[derive(Debug, Clone, PartialEq)]
pub enum RequestBody {
    Json(Value),
    Multipart(Vec<FormPart>),
}

/// A request handed to the transport.
#[derive(Debug, Clone, PartialEq)]
pub struct Request {
    pub method: Method,
    /// Path relative to the API base (the computed cache key for reads).
    pub url: String,
    pub body: Option<RequestBody>,
    pub cache: CacheMode,
}

impl Request {
    pub fn get(url: impl Into<String>, cache: CacheMode) -> Self {
        Self {
            method: Method::Get,
            url: url.into(),
            body: None,
            cache,
        }
    }

    pub fn mutation(method: Method, url: impl Into<String>, body: Option<RequestBody>) -> Self {
        Self {
            method,
            url: url.into(),
            body,
            cache: CacheMode::Default,
        }
    }
}

/// Performs HTTP requests and parses response bodies.
///
/// Implementations return `Value::Null` when the response has no body, a JSON
/// string for `text/plain` bodies and the parsed document otherwise. A
/// non-success status must surface as [`crate::FetchError::Http`].
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(&self, request: Request) -> FetchResult<Value>;
}

/// Receives "please re-render" signals once cache state is already updated.
#[async_trait]
pub trait Invalidator: Send + Sync {
    /// The given computed keys became stale.
    async fn invalidate(&self, keys: &[String]);

    /// Every cached key became stale.
    async fn invalidate_all(&self);
}

/// Invalidator for consumers that do not track dependencies.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopInvalidator;

#[async_trait]
impl Invalidator for NoopInvalidator {
    async fn invalidate(&self, _keys: &[String]) {}

    async fn invalidate_all(&self) {}
}
