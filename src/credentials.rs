//! Ephemeral TURN credentials
//!
//! Implements the shared-secret scheme from draft-uberti-behave-turn-rest:
//! the username is the expiry timestamp and the password is
//! `base64(HMAC-SHA1(secret, username))`. The TURN server holds the same
//! secret and recomputes the digest, so nothing is stored here.

use std::time::{SystemTime, UNIX_EPOCH};

use base64::{engine::general_purpose::STANDARD, Engine};
use ring::hmac;
use serde::{Deserialize, Serialize};
use tracing::error;

use crate::config::{TurnServerConfig, Urls};
use crate::error::CredentialError;

/// Default credential lifetime in seconds
pub const DEFAULT_TTL_SECS: u64 = 86400;

/// Credential set for one TURN server
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credential {
    /// Unix expiry timestamp, as a string
    pub username: String,
    /// Base64 HMAC-SHA1 of `username`
    pub credential: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub urls: Option<Urls>,
}

/// Issue credentials for a connection at the current time.
///
/// Never fails: disallowed origins and internal errors both yield an
/// empty list, so clients fall back to no relay candidates.
pub fn issue(
    origin: Option<&str>,
    servers: &[TurnServerConfig],
    allowed_origins: &[String],
) -> Vec<Credential> {
    issue_at(unix_now(), origin, servers, allowed_origins)
}

/// Issue credentials as of `now` (unix seconds).
pub fn issue_at(
    now: u64,
    origin: Option<&str>,
    servers: &[TurnServerConfig],
    allowed_origins: &[String],
) -> Vec<Credential> {
    if !origin_allowed(origin, allowed_origins) {
        return Vec::new();
    }

    let signed: Result<Vec<Credential>, CredentialError> = servers
        .iter()
        .enumerate()
        .map(|(index, server)| sign(now, index, server))
        .collect();

    match signed {
        Ok(credentials) => credentials,
        Err(e) => {
            error!("Failed to generate TURN credentials: {}", e);
            Vec::new()
        }
    }
}

fn origin_allowed(origin: Option<&str>, allowed_origins: &[String]) -> bool {
    if allowed_origins.is_empty() {
        return true;
    }
    origin.is_some_and(|origin| allowed_origins.iter().any(|allowed| allowed == origin))
}

fn sign(now: u64, index: usize, server: &TurnServerConfig) -> Result<Credential, CredentialError> {
    let secret = server
        .secret
        .as_deref()
        .ok_or(CredentialError::MissingSecret(index))?;

    let ttl = server.expiry.filter(|ttl| *ttl > 0).unwrap_or(DEFAULT_TTL_SECS);
    let username = now.saturating_add(ttl).to_string();

    Ok(Credential {
        credential: digest(secret, &username),
        username,
        urls: server.urls().cloned(),
    })
}

/// `base64(HMAC-SHA1(secret, username))`
pub fn digest(secret: &str, username: &str) -> String {
    let key = hmac::Key::new(hmac::HMAC_SHA1_FOR_LEGACY_USE_ONLY, secret.as_bytes());
    let tag = hmac::sign(&key, username.as_bytes());
    STANDARD.encode(tag.as_ref())
}

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}
