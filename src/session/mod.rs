//! The session state machine, the single source of truth for the
//! current identity.
//!
//! The state is held behind a `watch` channel: every component reads
//! snapshots or subscribes for changes, and mutation happens only
//! through the named transitions applied via [`SessionStore`]. UI code
//! never writes to the session directly.

use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tracing::debug;

use crate::auth::claims::{Claims, Role, User};

/// The token pair the session holds: the raw signed string and its
/// decoded claims.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionToken {
    pub raw: String,
    pub claims: Claims,
}

/// Client-held representation of the current identity.
///
/// `authenticated == true` implies `token` is present; both are set
/// together by the reducer and never independently.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub user: Option<User>,
    pub token: Option<SessionToken>,
    pub authenticated: bool,
    pub loading: bool,
    pub error: Option<String>,
}

impl Session {
    /// First role in issuer order, if a user is present
    pub fn primary_role(&self) -> Option<Role> {
        self.user.as_ref().and_then(|u| u.primary_role())
    }

    /// Tenant of the signed-in user, if any
    pub fn tenant_id(&self) -> Option<String> {
        self.user.as_ref().map(|u| u.tenant_id.clone())
    }
}

/// The only operations that may mutate the session
#[derive(Debug, Clone)]
pub enum Transition {
    LoginStarted,
    LoginSucceeded { user: User, token: SessionToken },
    LoginFailed { error: String },
    LogoutStarted,
    LogoutCompleted,
    Rehydrated { user: User, token: SessionToken },
    ErrorCleared,
}

impl Transition {
    fn name(&self) -> &'static str {
        match self {
            Transition::LoginStarted => "login_started",
            Transition::LoginSucceeded { .. } => "login_succeeded",
            Transition::LoginFailed { .. } => "login_failed",
            Transition::LogoutStarted => "logout_started",
            Transition::LogoutCompleted => "logout_completed",
            Transition::Rehydrated { .. } => "rehydrated",
            Transition::ErrorCleared => "error_cleared",
        }
    }
}

/// Holder of the mutable session, injected into every component that
/// needs identity.
#[derive(Debug)]
pub struct SessionStore {
    tx: watch::Sender<Session>,
}

impl SessionStore {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(Session::default());
        Self { tx }
    }

    /// Observe the session; the receiver always sees the latest value
    pub fn subscribe(&self) -> watch::Receiver<Session> {
        self.tx.subscribe()
    }

    /// Clone of the current session
    pub fn snapshot(&self) -> Session {
        self.tx.borrow().clone()
    }

    /// Apply a named transition
    pub fn apply(&self, transition: Transition) {
        debug!(transition = transition.name(), "Applying session transition");
        self.tx.send_modify(|session| reduce(session, transition));
    }

    /// Start a sign-in attempt, refusing if one is already in flight.
    ///
    /// Returns false without touching the session when `loading` is
    /// already set; sign-in attempts are serialized client-side.
    pub fn begin_login(&self) -> bool {
        self.tx.send_if_modified(|session| {
            if session.loading {
                false
            } else {
                session.loading = true;
                session.error = None;
                true
            }
        })
    }

    /// Drop to the unauthenticated state, but only if currently
    /// authenticated.
    ///
    /// This is the forced sign-out entry used by the 401 path: when N
    /// concurrent requests all see a 401, exactly one caller gets
    /// `true` and performs the surrounding teardown.
    pub fn deauthenticate_once(&self) -> bool {
        self.tx.send_if_modified(|session| {
            if session.authenticated {
                *session = Session::default();
                true
            } else {
                false
            }
        })
    }

    // Selectors

    pub fn is_authenticated(&self) -> bool {
        self.tx.borrow().authenticated
    }

    pub fn primary_role(&self) -> Option<Role> {
        self.tx.borrow().primary_role()
    }

    pub fn tenant_id(&self) -> Option<String> {
        self.tx.borrow().tenant_id()
    }

    pub fn current_user(&self) -> Option<User> {
        self.tx.borrow().user.clone()
    }
}

impl Default for SessionStore {
    fn default() -> Self {
        Self::new()
    }
}

/// The transition reducer. Every successful transition clears `error`;
/// a failed transition leaves the previous session intact apart from
/// `loading` and `error`.
fn reduce(session: &mut Session, transition: Transition) {
    match transition {
        Transition::LoginStarted | Transition::LogoutStarted => {
            session.loading = true;
            session.error = None;
        }
        Transition::LoginSucceeded { user, token } | Transition::Rehydrated { user, token } => {
            session.user = Some(user);
            session.token = Some(token);
            session.authenticated = true;
            session.loading = false;
            session.error = None;
        }
        Transition::LoginFailed { error } => {
            session.loading = false;
            session.error = Some(error);
        }
        Transition::LogoutCompleted => {
            *session = Session::default();
        }
        Transition::ErrorCleared => {
            session.error = None;
        }
    }
}
