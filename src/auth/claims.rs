//! Decoded token claims and the identities derived from them.
//!
//! The client never validates token signatures; it only reads the
//! payload of an externally issued token. Decoding is therefore strict
//! about shape (required fields must be present) but must never fail
//! loudly: any malformed input is simply "no claims".

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::Utc;
use serde::{Deserialize, Serialize};

/// Decoded payload of a session token.
///
/// `exp` and `iat` are seconds since the epoch, as issued.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claims {
    /// Subject, the user id
    pub sub: String,
    /// Role names in issuer order; the first entry is the primary role
    pub roles: Vec<String>,
    /// Tenant the token is scoped to
    #[serde(rename = "tenantId")]
    pub tenant_id: String,
    /// Expiry, seconds since epoch
    pub exp: i64,
    /// Issue time, seconds since epoch
    pub iat: i64,
}

impl Claims {
    /// Decode the payload segment of a signed token.
    ///
    /// Returns `None` for anything that is not a three-segment token
    /// with a base64url JSON payload carrying every required field.
    /// Never panics and never returns an error.
    pub fn decode(raw: &str) -> Option<Claims> {
        let payload = raw.split('.').nth(1)?;
        // Tolerate both padded and unpadded encoders
        let bytes = URL_SAFE_NO_PAD.decode(payload.trim_end_matches('=')).ok()?;
        serde_json::from_slice(&bytes).ok()
    }

    /// Whether the token has already expired
    pub fn is_expired(&self) -> bool {
        self.exp <= Utc::now().timestamp()
    }

    /// Whether the token is still valid but expires within the window
    pub fn expires_within(&self, window_secs: i64) -> bool {
        let now = Utc::now().timestamp();
        self.exp > now && self.exp - now <= window_secs
    }

    /// Recognized roles, in issuer order
    pub fn roles(&self) -> Vec<Role> {
        self.roles.iter().filter_map(|r| Role::from_wire(r)).collect()
    }

    /// First recognized role, if any
    pub fn primary_role(&self) -> Option<Role> {
        self.roles().into_iter().next()
    }
}

/// Closed set of roles the client understands.
///
/// Wire names outside this set are dropped during conversion, so a user
/// carrying only unrecognized roles resolves to no primary role and
/// passes no role gate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Role {
    Admin,
    Teacher,
    Student,
    Guardian,
    Accountant,
    Librarian,
    Receptionist,
}

impl Role {
    /// Parse a role name as issued by the backend.
    ///
    /// Accepts the Spring-style `ROLE_` prefix and the alias pairs the
    /// backend has used over time (`PRINCIPAL` for admins, `PARENT`
    /// for guardians).
    pub fn from_wire(name: &str) -> Option<Role> {
        let name = name.trim();
        let name = name.strip_prefix("ROLE_").unwrap_or(name);
        match name.to_ascii_uppercase().as_str() {
            "ADMIN" | "PRINCIPAL" => Some(Role::Admin),
            "TEACHER" => Some(Role::Teacher),
            "STUDENT" => Some(Role::Student),
            "PARENT" | "GUARDIAN" => Some(Role::Guardian),
            "ACCOUNTANT" => Some(Role::Accountant),
            "LIBRARIAN" => Some(Role::Librarian),
            "RECEPTIONIST" => Some(Role::Receptionist),
            _ => None,
        }
    }

    /// Canonical wire name
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Admin => "ADMIN",
            Role::Teacher => "TEACHER",
            Role::Student => "STUDENT",
            Role::Guardian => "GUARDIAN",
            Role::Accountant => "ACCOUNTANT",
            Role::Librarian => "LIBRARIAN",
            Role::Receptionist => "RECEPTIONIST",
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// The signed-in user as held by the session.
///
/// Owned exclusively by the session state machine; everything else
/// reads clones.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: String,
    pub username: String,
    #[serde(default)]
    pub first_name: String,
    #[serde(default)]
    pub last_name: String,
    #[serde(default)]
    pub email: String,
    pub roles: Vec<Role>,
    pub tenant_id: String,
}

impl User {
    /// Synthesize a user from token claims alone.
    ///
    /// Used on startup rehydration when no cached profile is available;
    /// the claims carry identity and roles but no profile fields.
    pub fn from_claims(claims: &Claims) -> User {
        User {
            id: claims.sub.clone(),
            username: claims.sub.clone(),
            first_name: String::new(),
            last_name: String::new(),
            email: String::new(),
            roles: claims.roles(),
            tenant_id: claims.tenant_id.clone(),
        }
    }

    /// First role in issuer order, if any
    pub fn primary_role(&self) -> Option<Role> {
        self.roles.first().copied()
    }
}
