// HTTP transport seam
// The gateway and the auth backend wrap a transport instead of patching a global client

use anyhow::Context;
use async_trait::async_trait;
use reqwest::Client;
use std::collections::HashMap;
use std::time::Duration;

use crate::error::TransportError;

/// HTTP method
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum HttpMethod {
    Get,
    Post,
    Put,
    Delete,
}

impl HttpMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Get => "GET",
            Self::Post => "POST",
            Self::Put => "PUT",
            Self::Delete => "DELETE",
        }
    }
}

/// Outbound request
#[derive(Clone, Debug)]
pub struct HttpRequest {
    pub method: HttpMethod,
    pub url: String,
    /// Header names are stored lowercase
    pub headers: HashMap<String, String>,
    pub body: Option<String>,
}

impl HttpRequest {
    pub fn new(method: HttpMethod, url: impl Into<String>) -> Self {
        Self {
            method,
            url: url.into(),
            headers: HashMap::new(),
            body: None,
        }
    }

    pub fn header(mut self, name: &str, value: impl Into<String>) -> Self {
        self.headers.insert(name.to_lowercase(), value.into());
        self
    }

    pub fn json_body(mut self, body: &serde_json::Value) -> Self {
        self.headers
            .insert("content-type".to_string(), "application/json".to_string());
        self.body = Some(body.to_string());
        self
    }

    pub fn header_value(&self, name: &str) -> Option<&str> {
        self.headers.get(&name.to_lowercase()).map(String::as_str)
    }
}

/// Inbound response
#[derive(Clone, Debug)]
pub struct HttpResponse {
    pub status: u16,
    pub headers: HashMap<String, String>,
    pub body: String,
}

impl HttpResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// HTTP transport interface
#[async_trait]
pub trait Transport: Send + Sync {
    /// Perform one HTTP exchange. HTTP error statuses are not errors here.
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse, TransportError>;
}

/// reqwest-backed transport with connection pooling
pub struct ReqwestTransport {
    client: Client,
}

impl ReqwestTransport {
    /// Create a new transport
    pub fn new(connect_timeout: u64, request_timeout: u64) -> anyhow::Result<Self> {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(connect_timeout))
            .timeout(Duration::from_secs(request_timeout))
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self { client })
    }

    /// Get the underlying HTTP client
    pub fn client(&self) -> &Client {
        &self.client
    }
}

#[async_trait]
impl Transport for ReqwestTransport {
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse, TransportError> {
        let mut builder = match request.method {
            HttpMethod::Get => self.client.get(&request.url),
            HttpMethod::Post => self.client.post(&request.url),
            HttpMethod::Put => self.client.put(&request.url),
            HttpMethod::Delete => self.client.delete(&request.url),
        };

        for (name, value) in &request.headers {
            builder = builder.header(name, value);
        }
        if let Some(body) = request.body {
            builder = builder.body(body);
        }

        let response = builder.send().await.map_err(|e| {
            let error_kind = if e.is_timeout() {
                "timeout"
            } else if e.is_connect() {
                "connection_failed"
            } else if e.is_request() {
                "request_error"
            } else {
                "unknown"
            };

            tracing::warn!(
                error_kind = error_kind,
                error = %e,
                method = request.method.as_str(),
                url = %request.url,
                "HTTP request error"
            );

            if e.is_timeout() {
                TransportError::Timeout(e.to_string())
            } else if e.is_connect() {
                TransportError::Connect(e.to_string())
            } else {
                TransportError::Other(e.to_string())
            }
        })?;

        let status = response.status().as_u16();
        let headers = response
            .headers()
            .iter()
            .filter_map(|(k, v)| {
                v.to_str()
                    .ok()
                    .map(|v| (k.as_str().to_lowercase(), v.to_string()))
            })
            .collect();

        let body = response
            .text()
            .await
            .map_err(|e| TransportError::Other(format!("Failed to read response body: {}", e)))?;

        Ok(HttpResponse {
            status,
            headers,
            body,
        })
    }
}

/// Scripted transport for tests
///
/// Responses are served in the order they were queued; the default
/// response is used once the queue is empty.
#[cfg(any(test, feature = "test-utils"))]
pub mod mock {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::{Mutex, MutexGuard};

    fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
        mutex.lock().unwrap_or_else(|e| e.into_inner())
    }

    #[derive(Default)]
    pub struct MockTransport {
        queue: Mutex<VecDeque<Result<HttpResponse, TransportError>>>,
        by_path: Mutex<HashMap<String, VecDeque<Result<HttpResponse, TransportError>>>>,
        default_response: Mutex<Option<HttpResponse>>,
        history: Mutex<Vec<HttpRequest>>,
        delay: Mutex<Option<Duration>>,
    }

    impl MockTransport {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn response(status: u16, body: &str) -> HttpResponse {
            HttpResponse {
                status,
                headers: HashMap::new(),
                body: body.to_string(),
            }
        }

        /// Queue a response for any URL
        pub fn push(&self, status: u16, body: &str) -> &Self {
            lock(&self.queue).push_back(Ok(Self::response(status, body)));
            self
        }

        /// Queue a transport failure for any URL
        pub fn push_error(&self, err: TransportError) -> &Self {
            lock(&self.queue).push_back(Err(err));
            self
        }

        /// Queue a response for URLs ending with `suffix`; takes precedence over the shared queue
        pub fn push_for(&self, suffix: &str, status: u16, body: &str) -> &Self {
            lock(&self.by_path)
                .entry(suffix.to_string())
                .or_default()
                .push_back(Ok(Self::response(status, body)));
            self
        }

        pub fn set_default(&self, status: u16, body: &str) -> &Self {
            *lock(&self.default_response) = Some(Self::response(status, body));
            self
        }

        /// Hold every response for `delay` before returning it
        pub fn set_delay(&self, delay: Duration) -> &Self {
            *lock(&self.delay) = Some(delay);
            self
        }

        pub fn requests(&self) -> Vec<HttpRequest> {
            lock(&self.history).clone()
        }

        /// Number of requests whose URL ends with `suffix`
        pub fn count(&self, suffix: &str) -> usize {
            lock(&self.history)
                .iter()
                .filter(|r| r.url.ends_with(suffix))
                .count()
        }
    }

    #[async_trait]
    impl Transport for MockTransport {
        async fn send(&self, request: HttpRequest) -> Result<HttpResponse, TransportError> {
            lock(&self.history).push(request.clone());

            let delay = *lock(&self.delay);
            if let Some(delay) = delay {
                tokio::time::sleep(delay).await;
            }

            {
                let mut by_path = lock(&self.by_path);
                for (suffix, queue) in by_path.iter_mut() {
                    if request.url.ends_with(suffix.as_str()) {
                        if let Some(next) = queue.pop_front() {
                            return next;
                        }
                    }
                }
            }

            if let Some(next) = lock(&self.queue).pop_front() {
                return next;
            }

            lock(&self.default_response)
                .clone()
                .ok_or_else(|| TransportError::Other(format!("no scripted response for {}", request.url)))
        }
    }

}
