//! Shared helpers for the integration suites.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use serde_json::json;

/// Build an unsigned token whose payload carries the standard claim
/// set. The signature segment is junk; the client never verifies it.
pub fn make_token(sub: &str, roles: &[&str], tenant: &str, exp: i64) -> String {
    let header = URL_SAFE_NO_PAD.encode(br#"{"alg":"HS512","typ":"JWT"}"#);
    let payload = json!({
        "sub": sub,
        "roles": roles,
        "tenantId": tenant,
        "exp": exp,
        "iat": exp - 7_200,
    });
    let body = URL_SAFE_NO_PAD.encode(payload.to_string().as_bytes());
    format!("{}.{}.junksig", header, body)
}
