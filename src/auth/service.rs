//! Orchestration of sign-in, sign-out, and startup rehydration across
//! the token store, session state machine, pipeline, and channel
//! bridge.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{info, instrument, warn};

use crate::auth::claims::{Claims, Role, User};
use crate::auth::store::TokenStore;
use crate::channel::ChannelBridge;
use crate::error::{response_invalid, token_invalid, validation, CoreResult};
use crate::events::{EventBus, SessionEvent};
use crate::pipeline::RequestPipeline;
use crate::session::{SessionStore, SessionToken, Transition};

/// Sign-in credentials as entered by the user
#[derive(Debug, Clone, Serialize)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

/// Reply shape of the sign-in endpoint
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoginReply {
    pub token: String,
    #[serde(default)]
    pub token_type: Option<String>,
    pub username: String,
    #[serde(default)]
    pub roles: Vec<String>,
    /// Accepted but unused until fine-grained permission checks land
    #[serde(default)]
    pub permissions: Vec<String>,
    pub tenant_id: String,
    #[serde(default)]
    pub user: Option<User>,
}

/// Entry point for everything that changes who is signed in
pub struct AuthService {
    pipeline: Arc<RequestPipeline>,
    tokens: Arc<TokenStore>,
    session: Arc<SessionStore>,
    bridge: Arc<ChannelBridge>,
    events: Arc<EventBus>,
}

impl AuthService {
    pub fn new(
        pipeline: Arc<RequestPipeline>,
        tokens: Arc<TokenStore>,
        session: Arc<SessionStore>,
        bridge: Arc<ChannelBridge>,
        events: Arc<EventBus>,
    ) -> Self {
        Self {
            pipeline,
            tokens,
            session,
            bridge,
            events,
        }
    }

    /// Sign in with the given credentials.
    ///
    /// A second attempt while one is in flight is refused without
    /// touching the session. On success the token and tenant are
    /// persisted, the session becomes authenticated, and the channel
    /// connects; on failure the previous session state is kept with
    /// the error recorded.
    #[instrument(skip(self, credentials), fields(username = %credentials.username))]
    pub async fn login(&self, credentials: &Credentials) -> CoreResult<User> {
        if !self.session.begin_login() {
            warn!("Refusing sign-in attempt while another is in flight");
            return Err(validation("A sign-in attempt is already in progress"));
        }

        match self.perform_login(credentials).await {
            Ok(user) => {
                info!(user_id = %user.id, "Sign-in succeeded");
                self.events
                    .publish(SessionEvent::SignedIn {
                        user_id: user.id.clone(),
                    })
                    .await;
                Ok(user)
            }
            Err(error) => {
                self.session.apply(Transition::LoginFailed {
                    error: error.message.clone(),
                });
                Err(error)
            }
        }
    }

    async fn perform_login(&self, credentials: &Credentials) -> CoreResult<User> {
        let response = self
            .pipeline
            .post(
                "/auth/login",
                json!({
                    "username": credentials.username,
                    "password": credentials.password,
                }),
            )
            .await?;

        let reply: LoginReply = response
            .json()
            .map_err(|e| response_invalid("/auth/login", e))?;

        let claims = Claims::decode(&reply.token).ok_or_else(token_invalid)?;
        if claims.is_expired() {
            return Err(token_invalid());
        }

        let user = match reply.user {
            Some(user) => user,
            None => User {
                id: claims.sub.clone(),
                username: reply.username.clone(),
                first_name: String::new(),
                last_name: String::new(),
                email: String::new(),
                roles: reply
                    .roles
                    .iter()
                    .filter_map(|r| Role::from_wire(r))
                    .collect(),
                tenant_id: reply.tenant_id.clone(),
            },
        };

        self.tokens.save(&reply.token)?;
        self.tokens.save_tenant(&reply.tenant_id)?;
        self.tokens.cache_user(&user)?;

        self.session.apply(Transition::LoginSucceeded {
            user: user.clone(),
            token: SessionToken {
                raw: reply.token,
                claims,
            },
        });

        self.bridge.connect(&user.id).await;
        Ok(user)
    }

    /// Sign out: disconnect the channel, clear persisted state, and
    /// reset the session to its initial value.
    #[instrument(skip(self))]
    pub async fn logout(&self) {
        self.session.apply(Transition::LogoutStarted);
        self.bridge.disconnect().await;
        self.tokens.clear();
        self.session.apply(Transition::LogoutCompleted);
        self.events.publish(SessionEvent::SignedOut).await;
        info!("Signed out");
    }

    /// Startup rehydration: restore the session from whatever the
    /// store currently holds.
    ///
    /// Reads the store exactly once per call and has no side effect
    /// beyond clearing storage when the held token is unusable. Safe
    /// to call repeatedly.
    #[instrument(skip(self))]
    pub async fn check_auth_status(&self) {
        match (self.tokens.read(), self.tokens.decode()) {
            (Some(raw), Some(claims)) if !claims.is_expired() => {
                let user = self
                    .tokens
                    .cached_user()
                    .unwrap_or_else(|| User::from_claims(&claims));
                info!(user_id = %user.id, "Restored session from stored token");
                self.session.apply(Transition::Rehydrated {
                    user,
                    token: SessionToken { raw, claims },
                });
            }
            _ => {
                self.tokens.clear();
                self.session.apply(Transition::LogoutCompleted);
            }
        }
    }

    /// Clear the session error only
    pub fn clear_error(&self) {
        self.session.apply(Transition::ErrorCleared);
    }
}
