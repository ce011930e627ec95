use serde::Deserialize;

use crate::crypto::token::{TokenKey, decode_identity};
use crate::models::identity::Identity;

/// Query parameters of every session-opening endpoint.
#[derive(Debug, Default, Deserialize)]
pub struct TokenParams {
    /// The identity token, already form-decoded.
    #[serde(default)]
    pub mcp_id: Option<String>,
}

/// Undoes what URL handling does to a base64 token: surrounding whitespace
/// is trimmed, percent escapes decoded, and spaces (a `+` read as a form
/// space) turned back into `+`.
pub fn normalize_token(raw: &str) -> String {
    let trimmed = raw.trim();
    let decoded = match urlencoding::decode(trimmed) {
        Ok(decoded) => decoded.into_owned(),
        Err(_) => {
            tracing::debug!("Token is not valid percent-encoding, using it as is");
            trimmed.to_string()
        }
    };
    decoded.replace(' ', "+")
}

/// Opens an identity token taken from a URL.
///
/// Every failure, including a claim without a name, is absorbed and reported
/// as `None` so the caller falls back to an anonymous session.
pub fn resolve_identity(raw: &str, key: &TokenKey) -> Option<Identity> {
    let token = normalize_token(raw);
    if token.is_empty() {
        return None;
    }

    match decode_identity(&token, key) {
        Ok(identity) if !identity.name.is_empty() => {
            tracing::debug!("Token resolved: user={}, role={}", identity.name, identity.role);
            Some(identity)
        }
        Ok(_) => {
            tracing::warn!("Token carries no user name, ignoring it");
            None
        }
        Err(e) => {
            tracing::warn!("Rejected identity token: {}", e);
            None
        }
    }
}
