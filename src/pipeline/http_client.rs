//! HTTP client abstraction underneath the request pipeline.
//!
//! The pipeline talks to this seam only, so tests can swap in a mock
//! and assert on exactly what would have gone over the wire.

use std::collections::HashMap;
use std::fmt::Debug;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use reqwest::{Method, StatusCode};
use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio::sync::Mutex;

/// Simple HTTP response structure for standardized response handling
#[derive(Debug, Clone)]
pub struct HttpResponse {
    /// HTTP status code
    pub status: StatusCode,
    /// Response headers
    pub headers: HeaderMap,
    /// Response body as text
    pub body: String,
}

impl HttpResponse {
    /// Parse the response body as JSON
    pub fn json<T: DeserializeOwned>(&self) -> Result<T> {
        Ok(serde_json::from_str(&self.body)?)
    }

    /// Check if the response is successful (status code 200-299)
    pub fn is_success(&self) -> bool {
        self.status.is_success()
    }
}

/// HTTP client trait for abstracting request dispatch
#[async_trait]
pub trait HttpClient: Send + Sync + Debug {
    /// Send a request with the given method, absolute URL, headers,
    /// and optional JSON body
    async fn request(
        &self,
        method: Method,
        url: &str,
        headers: &HashMap<String, String>,
        body: Option<&Value>,
    ) -> Result<HttpResponse>;
}

/// Implementation of HttpClient using reqwest
#[derive(Debug, Clone)]
pub struct ReqwestHttpClient {
    client: reqwest::Client,
}

impl ReqwestHttpClient {
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::new(),
        }
    }
}

impl Default for ReqwestHttpClient {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl HttpClient for ReqwestHttpClient {
    async fn request(
        &self,
        method: Method,
        url: &str,
        headers: &HashMap<String, String>,
        body: Option<&Value>,
    ) -> Result<HttpResponse> {
        let mut request_builder = self.client.request(method, url);

        let mut header_map = HeaderMap::new();
        for (key, value) in headers {
            let header_name = HeaderName::from_str(key)?;
            let header_value = HeaderValue::from_str(value)?;
            header_map.insert(header_name, header_value);
        }
        request_builder = request_builder.headers(header_map);

        if let Some(body) = body {
            request_builder = request_builder.json(body);
        }

        let response = request_builder.send().await?;
        let status = response.status();
        let headers = response.headers().clone();
        let body = response.text().await?;

        Ok(HttpResponse {
            status,
            headers,
            body,
        })
    }
}

/// A canned reply for the mock client
#[derive(Debug, Clone)]
pub struct MockResponse {
    pub status: StatusCode,
    pub body: String,
    /// Hold the reply back for this long, for concurrency tests
    pub delay: Option<Duration>,
}

impl MockResponse {
    pub fn new(status: StatusCode, body: impl Into<String>) -> Self {
        Self {
            status,
            body: body.into(),
            delay: None,
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }
}

/// One dispatched request as the mock saw it
#[derive(Debug, Clone)]
pub struct RecordedRequest {
    pub method: Method,
    pub url: String,
    pub headers: HashMap<String, String>,
    pub body: Option<Value>,
}

/// Mock HTTP client for testing.
///
/// Responses are registered against `"METHOD /path"` keys and matched
/// by URL suffix, so tests don't care what base URL the pipeline was
/// built with. Every dispatched request is recorded for assertions.
#[derive(Debug, Clone, Default)]
pub struct MockHttpClient {
    responses: Arc<Mutex<HashMap<String, MockResponse>>>,
    requests: Arc<Mutex<Vec<RecordedRequest>>>,
}

impl MockHttpClient {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a reply for a method and path
    pub async fn add_response(&self, method: Method, path: &str, response: MockResponse) {
        self.responses
            .lock()
            .await
            .insert(format!("{} {}", method, path), response);
    }

    /// Register a JSON reply for a method and path
    pub async fn add_json_response<T: serde::Serialize>(
        &self,
        method: Method,
        path: &str,
        status: StatusCode,
        data: &T,
    ) -> Result<()> {
        let body = serde_json::to_string(data)?;
        self.add_response(method, path, MockResponse::new(status, body))
            .await;
        Ok(())
    }

    /// Everything dispatched so far
    pub async fn recorded(&self) -> Vec<RecordedRequest> {
        self.requests.lock().await.clone()
    }

    /// The most recent request to a path, if any
    pub async fn last_request_to(&self, path: &str) -> Option<RecordedRequest> {
        self.requests
            .lock()
            .await
            .iter()
            .rev()
            .find(|r| url_path(&r.url) == path)
            .cloned()
    }
}

fn url_path(url: &str) -> &str {
    let without_query = url.split('?').next().unwrap_or(url);
    match without_query.find("://") {
        Some(scheme_end) => {
            let rest = &without_query[scheme_end + 3..];
            match rest.find('/') {
                Some(slash) => &rest[slash..],
                None => "/",
            }
        }
        None => without_query,
    }
}

#[async_trait]
impl HttpClient for MockHttpClient {
    async fn request(
        &self,
        method: Method,
        url: &str,
        headers: &HashMap<String, String>,
        body: Option<&Value>,
    ) -> Result<HttpResponse> {
        self.requests.lock().await.push(RecordedRequest {
            method: method.clone(),
            url: url.to_string(),
            headers: headers.clone(),
            body: body.cloned(),
        });

        let key = format!("{} {}", method, url_path(url));
        let response = {
            let responses = self.responses.lock().await;
            responses.get(&key).cloned()
        };

        match response {
            Some(response) => {
                if let Some(delay) = response.delay {
                    tokio::time::sleep(delay).await;
                }
                Ok(HttpResponse {
                    status: response.status,
                    headers: HeaderMap::new(),
                    body: response.body,
                })
            }
            None => Err(anyhow::anyhow!("No mock response for: {}", key)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_mock_http_client() {
        let client = MockHttpClient::new();
        client
            .add_json_response(
                Method::GET,
                "/students",
                StatusCode::OK,
                &json!([{"id": "s-1"}]),
            )
            .await
            .unwrap();

        let response = client
            .request(
                Method::GET,
                "http://testserver/students",
                &HashMap::new(),
                None,
            )
            .await
            .unwrap();
        assert_eq!(response.status, StatusCode::OK);

        let data: Value = response.json().unwrap();
        assert_eq!(data[0]["id"], "s-1");

        let recorded = client.recorded().await;
        assert_eq!(recorded.len(), 1);
        assert_eq!(recorded[0].method, Method::GET);
    }

    #[tokio::test]
    async fn test_mock_unmatched_request_errors() {
        let client = MockHttpClient::new();
        let result = client
            .request(Method::GET, "http://testserver/nothing", &HashMap::new(), None)
            .await;
        assert!(result.is_err());
    }

    #[test]
    fn test_url_path_extraction() {
        assert_eq!(url_path("http://host:9000/a/b?x=1"), "/a/b");
        assert_eq!(url_path("/a/b"), "/a/b");
        assert_eq!(url_path("https://host"), "/");
    }

    #[tokio::test]
    async fn test_reqwest_client_round_trip() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/ping")
            .with_status(200)
            .with_body(r#"{"ok":true}"#)
            .create_async()
            .await;

        let client = ReqwestHttpClient::new();
        let response = client
            .request(
                Method::GET,
                &format!("{}/ping", server.url()),
                &HashMap::new(),
                None,
            )
            .await
            .unwrap();

        assert!(response.is_success());
        let body: Value = response.json().unwrap();
        assert_eq!(body["ok"], true);
        mock.assert_async().await;
    }
}
