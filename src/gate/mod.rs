//! Pre-navigation authorization gates.
//!
//! A gate never throws and never blocks forever: it resolves to a
//! decision, and a decision that cannot be reached inside its bound is
//! a denial. Denials are redirects, not errors.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tracing::{debug, warn};

use crate::auth::claims::Role;
use crate::config::ROLE_WAIT_MS;
use crate::session::{Session, SessionStore};

/// Where denied navigations land
pub const SIGN_IN_PATH: &str = "/auth/sign-in";

/// Outcome of evaluating a gate for a requested path
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GateDecision {
    Allow,
    Redirect {
        path: String,
        /// The originally requested path, carried so sign-in can send
        /// the user back where they were headed
        redirect_url: Option<String>,
    },
}

impl GateDecision {
    pub fn allowed(&self) -> bool {
        matches!(self, GateDecision::Allow)
    }

    fn to_sign_in(requested: &str) -> GateDecision {
        GateDecision::Redirect {
            path: SIGN_IN_PATH.to_string(),
            redirect_url: Some(requested.to_string()),
        }
    }

    /// Render the redirect as a location string with the query
    /// contract (`redirectUrl=<requested>`)
    pub fn location(&self) -> Option<String> {
        match self {
            GateDecision::Allow => None,
            GateDecision::Redirect { path, redirect_url } => Some(match redirect_url {
                Some(url) => format!("{}?redirectUrl={}", path, url),
                None => path.clone(),
            }),
        }
    }
}

/// Wait for the first value a selector produces from the watched
/// state, up to a deadline.
///
/// Takes the current value if the selector already matches, otherwise
/// consumes the first matching change. Once the deadline passes the
/// answer is `None` and any later resolution is discarded along with
/// the receiver.
pub async fn first_within<S, T, F>(
    mut rx: watch::Receiver<S>,
    wait: Duration,
    select: F,
) -> Option<T>
where
    F: Fn(&S) -> Option<T>,
{
    if let Some(value) = select(&rx.borrow_and_update()) {
        return Some(value);
    }

    let deadline = tokio::time::Instant::now() + wait;
    loop {
        match tokio::time::timeout_at(deadline, rx.changed()).await {
            Ok(Ok(())) => {
                if let Some(value) = select(&rx.borrow_and_update()) {
                    return Some(value);
                }
            }
            // Publisher dropped or deadline passed
            Ok(Err(_)) | Err(_) => return None,
        }
    }
}

/// Passes any authenticated session; everything else is sent to
/// sign-in with the requested path preserved.
pub struct AuthGate {
    session: Arc<SessionStore>,
}

impl AuthGate {
    pub fn new(session: Arc<SessionStore>) -> Self {
        Self { session }
    }

    pub fn evaluate(&self, requested: &str) -> GateDecision {
        if self.session.is_authenticated() {
            GateDecision::Allow
        } else {
            debug!(requested = %requested, "Unauthenticated navigation, redirecting to sign-in");
            GateDecision::to_sign_in(requested)
        }
    }
}

/// Passes only sessions whose primary role is on the route's allow
/// list.
///
/// The primary role may not be populated yet right after a cold start,
/// so the gate waits for the first available value, bounded. A role
/// that never arrives is a denial; slow resolution must not grant
/// access.
pub struct RoleGate {
    session: Arc<SessionStore>,
    allowed: Vec<Role>,
}

impl RoleGate {
    pub fn new(session: Arc<SessionStore>, allowed: Vec<Role>) -> Self {
        Self { session, allowed }
    }

    pub async fn evaluate(&self, requested: &str) -> GateDecision {
        let role = first_within(
            self.session.subscribe(),
            Duration::from_millis(ROLE_WAIT_MS),
            Session::primary_role,
        )
        .await;

        match role {
            Some(role) if self.allowed.contains(&role) => GateDecision::Allow,
            Some(role) => {
                debug!(requested = %requested, role = %role, "Role not allowed for route, redirecting");
                GateDecision::to_sign_in(requested)
            }
            None => {
                warn!(requested = %requested, "No role resolved inside the wait bound, denying");
                GateDecision::to_sign_in(requested)
            }
        }
    }
}

/// Placeholder until fine-grained permission checks land: allows any
/// user holding at least one recognized role.
pub struct PermissionGate {
    session: Arc<SessionStore>,
}

impl PermissionGate {
    pub fn new(session: Arc<SessionStore>) -> Self {
        Self { session }
    }

    pub fn evaluate(&self, requested: &str) -> GateDecision {
        let has_role = self
            .session
            .current_user()
            .map(|user| !user.roles.is_empty())
            .unwrap_or(false);
        if has_role {
            GateDecision::Allow
        } else {
            GateDecision::to_sign_in(requested)
        }
    }
}
