//! The request augmentation pipeline.
//!
//! Every outgoing request passes through one fixed, declared list of
//! stages: identity and tenant headers go on before dispatch, traffic
//! accounting and failure translation wrap dispatch. The order lives
//! in exactly one place, [`RequestPipeline::new`], and is an invariant
//! rather than a registration accident.

mod http_client;
mod traffic;

pub use http_client::{
    HttpClient, HttpResponse, MockHttpClient, MockResponse, RecordedRequest, ReqwestHttpClient,
};
pub use traffic::TrafficGauge;

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use reqwest::Method;
use serde_json::Value;
use tokio::sync::watch;
use tracing::{debug, warn};

use crate::auth::store::TokenStore;
use crate::channel::ChannelBridge;
use crate::error::{request_failed, unauthorized, CoreError, CoreResult};
use crate::events::{EventBus, SessionEvent};
use crate::session::SessionStore;

/// Endpoints that must never carry a prior token
const PUBLIC_PATHS: [&str; 3] = ["/auth/login", "/auth/register", "/tenants/exists"];

/// Endpoints exempt from busy-indicator accounting; these poll in the
/// background and would make the indicator flicker
const TRAFFIC_EXEMPT_PATHS: [&str; 2] = ["/presence/heartbeat", "/notifications/unread-count"];

/// The tenant-creation endpoint has no tenant to scope to yet
const TENANT_CREATE_PATH: &str = "/tenants";

/// An outgoing request before augmentation
#[derive(Debug, Clone)]
pub struct OutboundRequest {
    pub method: Method,
    /// Path relative to the API base URL, starting with '/'
    pub path: String,
    pub headers: HashMap<String, String>,
    pub body: Option<Value>,
}

impl OutboundRequest {
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            headers: HashMap::new(),
            body: None,
        }
    }

    pub fn with_body(mut self, body: Value) -> Self {
        self.body = Some(body);
        self
    }

    fn route(&self) -> &str {
        self.path.split('?').next().unwrap_or(&self.path)
    }
}

/// One ordered step applied to every request/response pair.
///
/// `before` runs ahead of dispatch in declared order; `after` runs
/// once the outcome is known, in reverse order, so later stages wrap
/// earlier ones. Stages annotate and re-raise; they never swallow an
/// error.
#[async_trait]
pub trait RequestStage: Send + Sync {
    fn name(&self) -> &'static str;

    async fn before(&self, _request: &mut OutboundRequest) {}

    async fn after(
        &self,
        _request: &OutboundRequest,
        _outcome: &mut CoreResult<HttpResponse>,
    ) {
    }
}

/// Attaches `Authorization: Bearer <token>` outside the public allow-list
struct IdentityStage {
    tokens: Arc<TokenStore>,
}

#[async_trait]
impl RequestStage for IdentityStage {
    fn name(&self) -> &'static str {
        "identity"
    }

    async fn before(&self, request: &mut OutboundRequest) {
        if PUBLIC_PATHS.contains(&request.route()) {
            return;
        }
        if let Some(token) = self.tokens.read() {
            request
                .headers
                .insert("Authorization".to_string(), format!("Bearer {}", token));
        }
    }
}

/// Attaches `X-Tenant-ID` except on tenant creation
struct TenantStage {
    tokens: Arc<TokenStore>,
}

#[async_trait]
impl RequestStage for TenantStage {
    fn name(&self) -> &'static str {
        "tenant"
    }

    async fn before(&self, request: &mut OutboundRequest) {
        if request.method == Method::POST && request.route() == TENANT_CREATE_PATH {
            return;
        }
        if let Some(tenant_id) = self.tokens.tenant_id() {
            request
                .headers
                .insert("X-Tenant-ID".to_string(), tenant_id);
        }
    }
}

/// Counts in-flight requests around dispatch
struct TrafficStage {
    gauge: Arc<TrafficGauge>,
}

impl TrafficStage {
    fn exempt(request: &OutboundRequest) -> bool {
        TRAFFIC_EXEMPT_PATHS.contains(&request.route())
    }
}

#[async_trait]
impl RequestStage for TrafficStage {
    fn name(&self) -> &'static str {
        "traffic"
    }

    async fn before(&self, request: &mut OutboundRequest) {
        if !Self::exempt(request) {
            self.gauge.begin();
        }
    }

    async fn after(&self, request: &OutboundRequest, _outcome: &mut CoreResult<HttpResponse>) {
        if !Self::exempt(request) {
            self.gauge.end();
        }
    }
}

/// Converts transport failures into session transitions and
/// user-facing errors
struct FailureStage {
    session: Arc<SessionStore>,
    tokens: Arc<TokenStore>,
    bridge: Arc<ChannelBridge>,
    events: Arc<EventBus>,
}

impl FailureStage {
    /// The 401 path: tear the session down exactly once, no matter how
    /// many concurrent requests observe it.
    async fn force_sign_out(&self) {
        if self.session.deauthenticate_once() {
            warn!("Received 401, forcing sign-out");
            self.tokens.clear();
            self.bridge.disconnect().await;
            self.events
                .publish(SessionEvent::RedirectToSignIn { redirect_url: None })
                .await;
        } else if self.tokens.read().is_some() {
            // A stale persisted token with no live session; drop it so
            // it stops being attached
            self.tokens.clear();
        }
    }
}

#[async_trait]
impl RequestStage for FailureStage {
    fn name(&self) -> &'static str {
        "failure"
    }

    async fn after(&self, request: &OutboundRequest, outcome: &mut CoreResult<HttpResponse>) {
        match outcome {
            Ok(response) if response.status.as_u16() == 401 => {
                self.force_sign_out().await;
                *outcome = Err(unauthorized());
            }
            Ok(response) if response.status.is_client_error() || response.status.is_server_error() => {
                let error = CoreError::from_status(response.status.as_u16(), &response.body);
                self.events
                    .publish(SessionEvent::TransportFailure {
                        status: response.status.as_u16(),
                        message: error.message.clone(),
                    })
                    .await;
                *outcome = Err(error);
            }
            Err(error) => {
                self.events
                    .publish(SessionEvent::TransportFailure {
                        status: 0,
                        message: error.message.clone(),
                    })
                    .await;
                debug!(path = %request.path, error = %error, "Request failed before a response arrived");
            }
            Ok(_) => {}
        }
    }
}

/// The assembled pipeline every outgoing request goes through
pub struct RequestPipeline {
    base_url: String,
    http: Arc<dyn HttpClient>,
    stages: Vec<Arc<dyn RequestStage>>,
    gauge: Arc<TrafficGauge>,
}

impl RequestPipeline {
    /// Build the pipeline with its fixed stage order: identity, tenant,
    /// traffic accounting, failure translation.
    pub fn new(
        base_url: impl Into<String>,
        http: Arc<dyn HttpClient>,
        tokens: Arc<TokenStore>,
        session: Arc<SessionStore>,
        bridge: Arc<ChannelBridge>,
        events: Arc<EventBus>,
    ) -> Self {
        let gauge = Arc::new(TrafficGauge::new());
        let stages: Vec<Arc<dyn RequestStage>> = vec![
            Arc::new(IdentityStage {
                tokens: Arc::clone(&tokens),
            }),
            Arc::new(TenantStage {
                tokens: Arc::clone(&tokens),
            }),
            Arc::new(TrafficStage {
                gauge: Arc::clone(&gauge),
            }),
            Arc::new(FailureStage {
                session,
                tokens,
                bridge,
                events,
            }),
        ];

        Self {
            base_url: base_url.into(),
            http,
            stages,
            gauge,
        }
    }

    /// Observe the global busy indicator
    pub fn busy(&self) -> watch::Receiver<bool> {
        self.gauge.busy()
    }

    /// Run a request through every stage and dispatch it
    pub async fn execute(&self, mut request: OutboundRequest) -> CoreResult<HttpResponse> {
        for stage in &self.stages {
            stage.before(&mut request).await;
        }

        let url = format!("{}{}", self.base_url, request.path);
        debug!(method = %request.method, url = %url, "Dispatching request");
        let mut outcome = match self
            .http
            .request(
                request.method.clone(),
                &url,
                &request.headers,
                request.body.as_ref(),
            )
            .await
        {
            Ok(response) => Ok(response),
            Err(error) => Err(request_failed(&request.path, &error)),
        };

        for stage in self.stages.iter().rev() {
            stage.after(&request, &mut outcome).await;
        }

        outcome
    }

    /// GET a path
    pub async fn get(&self, path: &str) -> CoreResult<HttpResponse> {
        self.execute(OutboundRequest::new(Method::GET, path)).await
    }

    /// POST a JSON body to a path
    pub async fn post(&self, path: &str, body: Value) -> CoreResult<HttpResponse> {
        self.execute(OutboundRequest::new(Method::POST, path).with_body(body))
            .await
    }
}
