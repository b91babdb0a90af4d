//! Account naming.
//!
//! A new account is named `"{preferred_username} ({sub})"`. The username is
//! taken from UserInfo, then from the ID token itself, then falls back to
//! the configured application name.

use serde_json::{Map, Value};

use crate::oidc::IdTokenClaims;

/// Display name for a freshly authorized account.
pub fn account_name(
    claims: Option<&IdTokenClaims>,
    user_info: Option<&Map<String, Value>>,
    app_name: &str,
) -> String {
    let from_user_info = user_info
        .and_then(|info| info.get("preferred_username"))
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty());
    let from_claims = claims
        .and_then(|c| c.preferred_username.as_deref())
        .filter(|s| !s.is_empty());
    let username = from_user_info.or(from_claims).unwrap_or(app_name);

    match claims.and_then(|c| c.sub.as_deref()).filter(|s| !s.is_empty()) {
        Some(sub) => format!("{username} ({sub})"),
        None => username.to_string(),
    }
}
