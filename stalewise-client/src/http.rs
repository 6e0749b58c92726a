//! reqwest-backed transport.

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, ACCEPT, CACHE_CONTROL, CONTENT_TYPE};
use reqwest::multipart::{Form, Part};
use serde_json::Value;
use stalewise_core::{
    FetchError, FetchResult, FormPart, HttpError, Method, Request, RequestBody, Transport,
};
use tracing::{debug, warn};

use crate::config::{AuthConfig, ClientConfig};
use crate::error::ClientError;

/// Sends requests to the API relative to a base URL.
#[derive(Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
    base_url: String,
    headers: HeaderMap,
}

impl HttpTransport {
    pub fn new(config: &ClientConfig) -> Result<Self, ClientError> {
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout())
            .build()
            .map_err(|e| ClientError::Transport(e.to_string()))?;

        let headers = build_headers(&config.auth)?;
        Ok(Self {
            client,
            base_url: config.api_base_url.trim_end_matches('/').to_string(),
            headers,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn url_for(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }
}

impl std::fmt::Debug for HttpTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpTransport")
            .field("base_url", &self.base_url)
            .finish()
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn send(&self, request: Request) -> FetchResult<Value> {
        let Request {
            method,
            url,
            body,
            cache,
        } = request;

        let mut builder = self
            .client
            .request(to_reqwest_method(method), self.url_for(&url))
            .headers(self.headers.clone())
            .header(ACCEPT, "application/json");
        if let Some(cache_control) = cache.cache_control() {
            builder = builder.header(CACHE_CONTROL, cache_control);
        }
        builder = match body {
            None => builder,
            Some(RequestBody::Json(value)) => builder.json(&value),
            Some(RequestBody::Multipart(parts)) => builder.multipart(build_form(parts)),
        };

        let response = builder.send().await.map_err(|err| {
            warn!(method = %method, url = %url, error = %err, "Request failed");
            FetchError::transport(err.to_string())
        })?;

        let status = response.status().as_u16();
        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .map(str::to_string);
        let text = response
            .text()
            .await
            .map_err(|err| FetchError::transport(err.to_string()))?;

        debug!(method = %method, url = %url, status, "Response received");
        parse_response(&url, status, content_type.as_deref(), &text)
    }
}

/// Turn a raw response into the value handed to the cache.
///
/// No content type yields `Null`, `text/plain` a JSON string and anything
/// else is parsed as JSON. Non-success statuses become [`HttpError`]s
/// carrying the JSON payload when there is one.
pub fn parse_response(
    url: &str,
    status: u16,
    content_type: Option<&str>,
    body: &str,
) -> FetchResult<Value> {
    let is_json = content_type.is_some_and(|ct| ct.starts_with("application/json"));

    if !(200..300).contains(&status) {
        let payload = if is_json {
            serde_json::from_str(body).ok()
        } else {
            None
        };
        return Err(FetchError::Http(HttpError { status, payload }));
    }

    let Some(content_type) = content_type else {
        return Ok(Value::Null);
    };
    if content_type.starts_with("text/plain") {
        return Ok(Value::String(body.to_string()));
    }
    if body.trim().is_empty() {
        return Ok(Value::Null);
    }
    serde_json::from_str(body).map_err(|err| FetchError::Decode {
        key: url.to_string(),
        reason: err.to_string(),
    })
}

fn to_reqwest_method(method: Method) -> reqwest::Method {
    match method {
        Method::Get => reqwest::Method::GET,
        Method::Post => reqwest::Method::POST,
        Method::Put => reqwest::Method::PUT,
        Method::Patch => reqwest::Method::PATCH,
        Method::Delete => reqwest::Method::DELETE,
    }
}

fn build_form(parts: Vec<FormPart>) -> Form {
    parts.into_iter().fold(Form::new(), |form, part| match part {
        FormPart::Text { name, value } => form.text(name, value),
        FormPart::File {
            name,
            file_name,
            bytes,
        } => form.part(name, Part::bytes(bytes).file_name(file_name)),
    })
}

fn build_headers(auth: &AuthConfig) -> Result<HeaderMap, ClientError> {
    let mut headers = HeaderMap::new();
    if let Some(api_key) = &auth.api_key {
        headers.insert(
            HeaderName::from_static("x-api-key"),
            HeaderValue::from_str(api_key).map_err(|e| ClientError::Transport(e.to_string()))?,
        );
    }
    Ok(headers)
}
