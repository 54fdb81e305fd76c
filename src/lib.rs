//! Session and authorization core for a multi-tenant school-management
//! client.
//!
//! The crate owns the signed session token and everything derived from
//! it: the session state machine, the request augmentation pipeline,
//! the route authorization gates, and the reconnecting session
//! channel. Domain screens consume these pieces; they never reach into
//! ambient state.

use std::sync::Arc;

use tracing_subscriber::{filter::EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

pub mod auth;
pub mod channel;
pub mod config;
pub mod error;
pub mod events;
pub mod gate;
pub mod pipeline;
pub mod session;

pub use auth::{AuthService, Claims, Credentials, Role, TokenStore, User};
pub use channel::{user_queue_topic, ChannelBridge, ChannelFrame, PRESENCE_TOPIC};
pub use config::ClientConfig;
pub use error::{CoreError, CoreResult, ErrorCode, ErrorSeverity};
pub use events::{EventBus, SessionEvent, SessionNotice};
pub use gate::{AuthGate, GateDecision, PermissionGate, RoleGate};
pub use pipeline::{HttpClient, OutboundRequest, RequestPipeline, ReqwestHttpClient};
pub use session::{Session, SessionStore, SessionToken, Transition};

/// Initialize the tracing subscriber for structured logging.
///
/// Safe to call more than once; later calls are ignored.
pub fn init_tracing() {
    let _ = tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| "campuslink=info,warn".into()))
        .with(tracing_subscriber::fmt::layer().with_target(true))
        .try_init();
}

/// The assembled session core, wired the way the client boots it.
///
/// Construction order matters only in that the pipeline needs every
/// other piece; nothing here opens a connection or reads storage until
/// asked to.
pub struct SessionCore {
    pub config: ClientConfig,
    pub tokens: Arc<TokenStore>,
    pub session: Arc<SessionStore>,
    pub events: Arc<EventBus>,
    pub bridge: Arc<ChannelBridge>,
    pub pipeline: Arc<RequestPipeline>,
    pub auth: Arc<AuthService>,
}

impl SessionCore {
    /// Wire the core against the real HTTP client
    pub fn new(config: ClientConfig) -> Self {
        Self::with_http(config, Arc::new(ReqwestHttpClient::new()))
    }

    /// Wire the core against any HTTP client implementation
    pub fn with_http(config: ClientConfig, http: Arc<dyn HttpClient>) -> Self {
        let tokens = Arc::new(TokenStore::new(&config.data_dir));
        let session = Arc::new(SessionStore::new());
        let events = Arc::new(EventBus::new());
        let bridge = Arc::new(ChannelBridge::new(
            config.channel_url.clone(),
            Arc::clone(&tokens),
        ));
        let pipeline = Arc::new(RequestPipeline::new(
            config.api_base_url.clone(),
            http,
            Arc::clone(&tokens),
            Arc::clone(&session),
            Arc::clone(&bridge),
            Arc::clone(&events),
        ));
        let auth = Arc::new(AuthService::new(
            Arc::clone(&pipeline),
            Arc::clone(&tokens),
            Arc::clone(&session),
            Arc::clone(&bridge),
            Arc::clone(&events),
        ));

        Self {
            config,
            tokens,
            session,
            events,
            bridge,
            pipeline,
            auth,
        }
    }
}
