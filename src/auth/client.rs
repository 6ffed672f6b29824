//! Auth sub-client: login handshake, session keys, logout.

use crate::auth::{access_code, OtpTokenResponse, SessionCredentials, TokenRequest, TokenResponse};
use crate::client::IntegrateClient;
use crate::error::{AuthError, HttpError, SdkError};
use crate::http::RoutePrefix;

/// Sub-client for authentication operations.
pub struct Auth<'a> {
    pub(crate) client: &'a IntegrateClient,
}

impl<'a> Auth<'a> {
    /// Run the TOTP login handshake and store the resulting session.
    ///
    /// `totp` is the current one-time password from the caller's
    /// authenticator. On success the API session key is injected into every
    /// later request and the returned credentials can be handed to the
    /// streaming session.
    pub async fn login(
        &self,
        api_token: &str,
        api_secret: &str,
        totp: &str,
    ) -> Result<SessionCredentials, SdkError> {
        if api_token.is_empty() || api_secret.is_empty() {
            return Err(AuthError::InvalidCredentials(
                "api_token and api_secret are required".into(),
            )
            .into());
        }
        if totp.is_empty() {
            return Err(AuthError::InvalidCredentials("totp is required".into()).into());
        }

        let route = format!("login/{}", urlencoding::encode(api_token));
        let otp: OtpTokenResponse = self
            .client
            .http
            .get(RoutePrefix::Login, &route, &[], &[("api_secret", api_secret)])
            .await
            .map_err(rejected)?;

        let request = TokenRequest {
            ac: access_code(&otp.otp_token, totp, api_secret),
            otp_token: otp.otp_token,
            otp: totp.to_string(),
        };
        let token: TokenResponse = self
            .client
            .http
            .post(RoutePrefix::Login, "token", &request, &[])
            .await
            .map_err(rejected)?;

        let credentials = SessionCredentials::from(token);
        tracing::info!(uid = %credentials.uid, actid = %credentials.actid, "Logged in");
        self.store(credentials.clone()).await;
        Ok(credentials)
    }

    /// Restore a session from previously exported keys, skipping the handshake.
    pub async fn set_session_keys(
        &self,
        uid: &str,
        actid: &str,
        api_session_key: &str,
        ws_session_key: &str,
    ) {
        self.store(SessionCredentials::new(uid, actid, api_session_key, ws_session_key))
            .await;
    }

    /// Current credentials (if logged in).
    pub async fn credentials(&self) -> Option<SessionCredentials> {
        self.client.credentials.read().await.clone()
    }

    /// Whether session keys are present. The server may still reject them as expired.
    pub async fn is_authenticated(&self) -> bool {
        self.client.credentials.read().await.is_some() && self.client.http.has_api_session_key().await
    }

    /// Forget the stored session locally.
    pub async fn logout(&self) {
        self.client.http.set_api_session_key(None).await;
        *self.client.credentials.write().await = None;
    }

    async fn store(&self, credentials: SessionCredentials) {
        let (_, _, api_key, _) = credentials.session_keys();
        self.client
            .http
            .set_api_session_key(Some(api_key.to_string()))
            .await;
        *self.client.credentials.write().await = Some(credentials);
    }
}

fn rejected(err: HttpError) -> SdkError {
    match err {
        HttpError::Unauthorized => AuthError::LoginRejected("unauthorized".into()).into(),
        HttpError::Api { message } => AuthError::LoginRejected(message).into(),
        HttpError::Decode(reason) => AuthError::LoginFailed(reason).into(),
        other => other.into(),
    }
}
