//! Authentication: login handshake, session credentials, session keys.
//!
//! ## Handshake
//!
//! The Integrate login is a two-step TOTP exchange against the sign-on
//! server:
//!
//! 1. `GET login/{api_token}` with an `api_secret` header returns an
//!    `otp_token`.
//! 2. `POST token` with the `otp_token`, the caller's TOTP and an access code
//!    (`sha256(otp_token + otp + api_secret)`, hex encoded) returns the
//!    account identifiers and both session keys.
//!
//! ## Session keys
//!
//! - `api_session_key` is injected as the `Authorization` header on REST calls.
//! - `ws_session_key` (the server calls it `susertoken`) authenticates the
//!   streaming session's login frame.
//!
//! Session keys can be exported with [`SessionCredentials::session_keys`] and
//! restored later with [`SessionCredentials::set_session_keys`] to skip the
//! handshake while they are still valid.

#[cfg(feature = "http")]
pub mod client;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

// ============================================================================
// Credential provider
// ============================================================================

/// Read-only view of the credentials the streaming session needs.
///
/// The session never derives these itself; they come from a prior login
/// handshake or from stored session keys.
pub trait CredentialProvider: Send + Sync {
    fn user_id(&self) -> &str;
    fn account_id(&self) -> &str;
    fn api_session_key(&self) -> &str;
    fn streaming_secret(&self) -> &str;
}

// ============================================================================
// Session credentials
// ============================================================================

/// Identifiers and session keys produced by the login handshake.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionCredentials {
    pub uid: String,
    pub actid: String,
    api_session_key: String,
    ws_session_key: String,
}

impl SessionCredentials {
    pub fn new(
        uid: impl Into<String>,
        actid: impl Into<String>,
        api_session_key: impl Into<String>,
        ws_session_key: impl Into<String>,
    ) -> Self {
        Self {
            uid: uid.into(),
            actid: actid.into(),
            api_session_key: api_session_key.into(),
            ws_session_key: ws_session_key.into(),
        }
    }

    /// `(uid, actid, api_session_key, ws_session_key)`.
    pub fn session_keys(&self) -> (&str, &str, &str, &str) {
        (
            &self.uid,
            &self.actid,
            &self.api_session_key,
            &self.ws_session_key,
        )
    }

    /// Replace all identifiers and keys, e.g. with values saved from an earlier login.
    pub fn set_session_keys(
        &mut self,
        uid: impl Into<String>,
        actid: impl Into<String>,
        api_session_key: impl Into<String>,
        ws_session_key: impl Into<String>,
    ) {
        *self = Self::new(uid, actid, api_session_key, ws_session_key);
    }
}

// Keys stay out of logs.
impl std::fmt::Debug for SessionCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionCredentials")
            .field("uid", &self.uid)
            .field("actid", &self.actid)
            .field("api_session_key", &"<redacted>")
            .field("ws_session_key", &"<redacted>")
            .finish()
    }
}

impl CredentialProvider for SessionCredentials {
    fn user_id(&self) -> &str {
        &self.uid
    }

    fn account_id(&self) -> &str {
        &self.actid
    }

    fn api_session_key(&self) -> &str {
        &self.api_session_key
    }

    fn streaming_secret(&self) -> &str {
        &self.ws_session_key
    }
}

// ============================================================================
// Wire types
// ============================================================================

/// Access code for the second handshake step: hex(sha256(otp_token + otp + api_secret)).
pub fn access_code(otp_token: &str, otp: &str, api_secret: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(otp_token.as_bytes());
    hasher.update(otp.as_bytes());
    hasher.update(api_secret.as_bytes());
    hex::encode(hasher.finalize())
}

/// Response from `GET login/{api_token}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OtpTokenResponse {
    pub otp_token: String,
    #[serde(default)]
    pub message: Option<String>,
}

/// Body for `POST token`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenRequest {
    pub otp_token: String,
    pub otp: String,
    pub ac: String,
}

/// Response from `POST token`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenResponse {
    pub uid: String,
    pub actid: String,
    pub api_session_key: String,
    pub susertoken: String,
}

impl From<TokenResponse> for SessionCredentials {
    fn from(resp: TokenResponse) -> Self {
        SessionCredentials::new(resp.uid, resp.actid, resp.api_session_key, resp.susertoken)
    }
}
