use serde::de::DeserializeOwned;
use serde_json::Value;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use crate::auth::{Authenticator, BackendErrorBody};
use crate::cache::ResponseCache;
use crate::error::RequestError;
use crate::transport::{HttpMethod, HttpRequest, HttpResponse, Transport};

/// Identification header sent with every gateway request
pub const CLIENT_HEADER: (&str, &str) = ("X-Requested-With", "XMLHttpRequest");

/// Per-call request options
#[derive(Debug, Clone)]
pub struct RequestOptions {
    pub method: HttpMethod,
    pub body: Option<Value>,
    pub headers: Vec<(String, String)>,
}

impl Default for RequestOptions {
    fn default() -> Self {
        Self::get()
    }
}

impl RequestOptions {
    pub fn get() -> Self {
        Self {
            method: HttpMethod::Get,
            body: None,
            headers: Vec::new(),
        }
    }

    pub fn post(body: Value) -> Self {
        Self {
            method: HttpMethod::Post,
            body: Some(body),
            headers: Vec::new(),
        }
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }
}

/// Successful gateway response
#[derive(Debug, Clone)]
pub struct ApiResponse {
    pub status: u16,
    pub headers: HashMap<String, String>,
    pub body: String,
    /// Whether this came from the retry after a token refresh
    pub retried: bool,
}

impl ApiResponse {
    pub fn json<T: DeserializeOwned>(&self) -> Result<T, RequestError> {
        serde_json::from_str(&self.body)
            .map_err(|e| RequestError::InvalidResponse(format!("Failed to parse body: {}", e)))
    }
}

/// Authenticated request gateway
///
/// Attaches credentials, and on a 401 refreshes the session and retries
/// exactly once. Owns the response cache for read endpoints.
pub struct ApiGateway {
    transport: Arc<dyn Transport>,
    auth: Arc<dyn Authenticator>,
    base_url: String,
    cache: ResponseCache,
}

impl ApiGateway {
    /// Create a new gateway
    pub fn new(
        transport: Arc<dyn Transport>,
        auth: Arc<dyn Authenticator>,
        base_url: impl Into<String>,
        cache_ttl: Duration,
    ) -> Self {
        Self {
            transport,
            auth,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            cache: ResponseCache::new(cache_ttl),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Execute a request against `endpoint` (a path under the base URL)
    ///
    /// Outcomes:
    /// - 401: refresh the session and retry once; if the refresh fails,
    ///   log out and return `AuthenticationFailed`
    /// - 403 / 429: `Forbidden` / `RateLimited`, no retry
    /// - other non-2xx: `HttpError`
    /// - connection failures: `NetworkError`
    pub async fn request(
        &self,
        endpoint: &str,
        options: RequestOptions,
    ) -> Result<ApiResponse, RequestError> {
        let token = self.auth.access_token().await;
        let response = self.send(endpoint, &options, token.as_deref()).await?;

        if response.status != 401 {
            return classify(endpoint, response, false);
        }

        tracing::warn!(endpoint = %endpoint, "Received 401, refreshing session and retrying...");

        let session = match self.auth.refresh().await {
            Ok(session) => session,
            Err(e) => {
                tracing::error!(endpoint = %endpoint, "Session refresh failed: {}", e);
                self.auth.logout().await;
                return Err(RequestError::AuthenticationFailed(e.to_string()));
            }
        };

        let retry = self
            .send(endpoint, &options, Some(&session.access_token))
            .await
            .map_err(RequestError::after_retry)?;

        classify(endpoint, retry, true).map_err(RequestError::after_retry)
    }

    /// GET `endpoint` and decode the JSON body
    pub async fn get_json<T: DeserializeOwned>(&self, endpoint: &str) -> Result<T, RequestError> {
        self.request(endpoint, RequestOptions::get()).await?.json()
    }

    /// Return a cached value for `key`, or run `fetcher` and cache its result
    pub async fn cached_get<F, Fut>(
        &self,
        key: &str,
        ttl: Duration,
        fetcher: F,
    ) -> Result<Value, RequestError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Value, RequestError>>,
    {
        self.cache.get_or_fetch(key, ttl, fetcher).await
    }

    /// Cached GET of `endpoint` under `key` with the default TTL
    pub async fn cached_json<T: DeserializeOwned>(
        &self,
        key: &str,
        endpoint: &str,
    ) -> Result<T, RequestError> {
        let value = self
            .cached_get(key, self.cache.ttl(), || self.get_json::<Value>(endpoint))
            .await?;
        serde_json::from_value(value)
            .map_err(|e| RequestError::InvalidResponse(format!("{}: {}", endpoint, e)))
    }

    pub fn cache(&self) -> &ResponseCache {
        &self.cache
    }

    /// Drop every cached response; call after state-changing requests
    pub fn invalidate_all(&self) {
        self.cache.invalidate_all();
    }

    async fn send(
        &self,
        endpoint: &str,
        options: &RequestOptions,
        token: Option<&str>,
    ) -> Result<HttpResponse, RequestError> {
        let url = format!("{}{}", self.base_url, endpoint);
        let mut request = HttpRequest::new(options.method, url)
            .header("Accept", "application/json")
            .header(CLIENT_HEADER.0, CLIENT_HEADER.1);

        if let Some(body) = &options.body {
            request = request.json_body(body);
        }
        for (name, value) in &options.headers {
            request = request.header(name, value.clone());
        }
        if let Some(token) = token {
            request = request.header("Authorization", format!("Bearer {}", token));
        }

        tracing::debug!(
            method = options.method.as_str(),
            endpoint = %endpoint,
            authenticated = token.is_some(),
            "Sending HTTP request"
        );

        self.transport.send(request).await.map_err(|e| {
            tracing::error!(endpoint = %endpoint, error = %e, "HTTP request failed");
            RequestError::from(e)
        })
    }
}

fn classify(endpoint: &str, response: HttpResponse, retried: bool) -> Result<ApiResponse, RequestError> {
    let status = response.status;

    if response.is_success() {
        tracing::debug!(status = status, endpoint = %endpoint, "Request successful");
        return Ok(ApiResponse {
            status,
            headers: response.headers,
            body: response.body,
            retried,
        });
    }

    tracing::warn!(
        status = status,
        endpoint = %endpoint,
        retried = retried,
        response_body = %response.body,
        "Received error response"
    );

    Err(match status {
        401 => RequestError::Unauthorized,
        403 => RequestError::Forbidden,
        429 => RequestError::RateLimited,
        _ => RequestError::HttpError {
            status,
            message: BackendErrorBody::describe(&response.body),
        },
    })
}
