//! File-backed persistence for the session token, tenant id, and the
//! cached user profile.
//!
//! Everything lives in one store file so that `clear` removes all of it
//! together. Read failures of any kind are logged and treated as "no
//! session"; only writes surface errors to callers.

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::auth::claims::{Claims, User};
use crate::config::REFRESH_LOOKAHEAD_SECS;
use crate::error::{storage_failed, CoreResult};

/// Store filename inside the data directory
const STORE_FILENAME: &str = "campuslink.session.json";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct PersistedSession {
    token: Option<String>,
    tenant_id: Option<String>,
    user: Option<User>,
}

/// Persistent store for the client-side session state.
///
/// Written only on successful sign-in and on `clear`; read by the
/// session state machine at startup and by the pipeline on every
/// request.
#[derive(Debug, Clone)]
pub struct TokenStore {
    path: PathBuf,
}

impl TokenStore {
    /// Create a store rooted at the given data directory
    pub fn new(data_dir: impl AsRef<Path>) -> Self {
        let data_dir = data_dir.as_ref().to_path_buf();
        if let Err(e) = fs::create_dir_all(&data_dir) {
            warn!(error = %e, dir = %data_dir.display(), "Failed to create session store directory");
        }
        TokenStore {
            path: data_dir.join(STORE_FILENAME),
        }
    }

    fn load(&self) -> PersistedSession {
        let raw = match fs::read_to_string(&self.path) {
            Ok(raw) => raw,
            Err(_) => return PersistedSession::default(),
        };
        match serde_json::from_str(&raw) {
            Ok(state) => state,
            Err(e) => {
                warn!(error = %e, "Session store file is unreadable, treating as empty");
                PersistedSession::default()
            }
        }
    }

    fn persist(&self, state: &PersistedSession) -> CoreResult<()> {
        let json = serde_json::to_string(state).map_err(|e| storage_failed("serialize", e))?;
        fs::write(&self.path, json).map_err(|e| storage_failed("write", e))
    }

    /// Persist the raw token string, overwriting any previous value
    pub fn save(&self, raw_token: &str) -> CoreResult<()> {
        let mut state = self.load();
        state.token = Some(raw_token.to_string());
        self.persist(&state)
    }

    /// The raw stored token, unvalidated
    pub fn read(&self) -> Option<String> {
        self.load().token
    }

    /// Decode the stored token's claims. Malformed or absent tokens
    /// yield `None`, never an error.
    pub fn decode(&self) -> Option<Claims> {
        Claims::decode(&self.read()?)
    }

    /// True if there is no token, the token cannot be decoded, or its
    /// expiry has passed
    pub fn is_expired(&self) -> bool {
        match self.decode() {
            Some(claims) => claims.is_expired(),
            None => true,
        }
    }

    /// True if the token is valid but inside the refresh lookahead
    /// window before expiry
    pub fn should_refresh(&self) -> bool {
        self.decode()
            .map(|claims| claims.expires_within(REFRESH_LOOKAHEAD_SECS))
            .unwrap_or(false)
    }

    /// Persist the tenant id. Kept separate from the token so tenant
    /// scoped endpoints can be called before a token exists.
    pub fn save_tenant(&self, tenant_id: &str) -> CoreResult<()> {
        let mut state = self.load();
        state.tenant_id = Some(tenant_id.to_string());
        self.persist(&state)
    }

    /// The persisted tenant id, if any
    pub fn tenant_id(&self) -> Option<String> {
        self.load().tenant_id
    }

    /// Cache the signed-in user's profile alongside the token
    pub fn cache_user(&self, user: &User) -> CoreResult<()> {
        let mut state = self.load();
        state.user = Some(user.clone());
        self.persist(&state)
    }

    /// The cached user profile, if any
    pub fn cached_user(&self) -> Option<User> {
        self.load().user
    }

    /// Remove token, tenant id, and cached user together.
    ///
    /// Failures are logged and swallowed; a stale file must never keep
    /// the client from signing out.
    pub fn clear(&self) {
        match fs::remove_file(&self.path) {
            Ok(()) => debug!("Session store cleared"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!(error = %e, "Failed to remove session store file"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use base64::engine::general_purpose::URL_SAFE_NO_PAD;
    use base64::Engine;
    use chrono::Utc;
    use serde_json::json;

    fn token_with_exp(exp: i64) -> String {
        let payload = json!({
            "sub": "u-7",
            "roles": ["STUDENT"],
            "tenantId": "eastgate",
            "exp": exp,
            "iat": exp - 60,
        });
        format!(
            "h.{}.s",
            URL_SAFE_NO_PAD.encode(payload.to_string().as_bytes())
        )
    }

    #[test]
    fn test_save_read_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let store = TokenStore::new(dir.path());

        assert_eq!(store.read(), None);
        store.save("raw-token").unwrap();
        assert_eq!(store.read().as_deref(), Some("raw-token"));

        store.clear();
        assert_eq!(store.read(), None);
    }

    #[test]
    fn test_clear_removes_everything_together() {
        let dir = tempfile::tempdir().unwrap();
        let store = TokenStore::new(dir.path());

        let token = token_with_exp(Utc::now().timestamp() + 3_600);
        store.save(&token).unwrap();
        store.save_tenant("eastgate").unwrap();
        let user = User::from_claims(&store.decode().unwrap());
        store.cache_user(&user).unwrap();

        store.clear();
        assert_eq!(store.read(), None);
        assert_eq!(store.tenant_id(), None);
        assert_eq!(store.cached_user(), None);
    }

    #[test]
    fn test_expiry_evaluation() {
        let dir = tempfile::tempdir().unwrap();
        let store = TokenStore::new(dir.path());
        let now = Utc::now().timestamp();

        // No token at all
        assert!(store.is_expired());

        // Expired one second ago
        store.save(&token_with_exp(now - 1)).unwrap();
        assert!(store.is_expired());
        assert!(!store.should_refresh());

        // Valid and outside the lookahead window
        store.save(&token_with_exp(now + 7_200)).unwrap();
        assert!(!store.is_expired());
        assert!(!store.should_refresh());

        // Valid and refresh-due
        store.save(&token_with_exp(now + 600)).unwrap();
        assert!(!store.is_expired());
        assert!(store.should_refresh());
    }

    #[test]
    fn test_garbage_token_never_errors() {
        let dir = tempfile::tempdir().unwrap();
        let store = TokenStore::new(dir.path());

        store.save("garbage").unwrap();
        assert_eq!(store.decode(), None);
        assert!(store.is_expired());
        assert!(!store.should_refresh());
    }

    #[test]
    fn test_corrupt_store_file_treated_as_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = TokenStore::new(dir.path());
        fs::write(dir.path().join(STORE_FILENAME), "{{{{").unwrap();

        assert_eq!(store.read(), None);
        assert_eq!(store.tenant_id(), None);
    }
}
