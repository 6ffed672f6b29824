//! High-level client: `IntegrateClient` with sub-client accessors.
//!
//! Holds the HTTP layer, the logged-in session and the streaming endpoint
//! settings. Streaming sessions are created from it but not owned by it:
//! their lifetime belongs to the application.

use crate::auth::client::Auth;
use crate::auth::SessionCredentials;
use crate::error::{AuthError, SdkError};
use crate::http::{IntegrateHttp, SessionExpiredHook};
use crate::symbols::SymbolResolver;
use crate::ws::{ConnectOptions, IntegrateStream};

use async_lock::RwLock;
use std::sync::Arc;
use std::time::Duration;

pub use crate::auth::client::Auth as AuthClient;

/// The primary entry point for the SDK.
pub struct IntegrateClient {
    pub(crate) http: IntegrateHttp,
    pub(crate) credentials: Arc<RwLock<Option<SessionCredentials>>>,
    pub(crate) ws_url: String,
    pub(crate) proxy: Option<String>,
    pub(crate) resolver: Option<Arc<dyn SymbolResolver>>,
}

impl IntegrateClient {
    pub fn builder() -> IntegrateClientBuilder {
        IntegrateClientBuilder::default()
    }

    pub fn auth(&self) -> Auth<'_> {
        Auth { client: self }
    }

    /// The underlying HTTP client, for endpoints without a typed wrapper.
    pub fn http(&self) -> &IntegrateHttp {
        &self.http
    }

    /// Connect options pointing at this client's streaming endpoint and proxy.
    pub fn connect_options(&self) -> ConnectOptions {
        ConnectOptions {
            server_url: self.ws_url.clone(),
            proxy: self.proxy.clone(),
            ..ConnectOptions::default()
        }
    }

    /// A streaming session for the logged-in account.
    ///
    /// Fails with [`AuthError::NotAuthenticated`] before a login or
    /// [`Auth::set_session_keys`].
    pub async fn stream(&self) -> Result<IntegrateStream, SdkError> {
        let credentials = self
            .credentials
            .read()
            .await
            .clone()
            .ok_or(AuthError::NotAuthenticated)?;

        let mut builder = IntegrateStream::builder(credentials);
        if let Some(resolver) = &self.resolver {
            builder = builder.resolver(resolver.clone());
        }
        Ok(builder.build())
    }
}

impl Clone for IntegrateClient {
    fn clone(&self) -> Self {
        Self {
            http: self.http.clone(),
            credentials: self.credentials.clone(),
            ws_url: self.ws_url.clone(),
            proxy: self.proxy.clone(),
            resolver: self.resolver.clone(),
        }
    }
}

// ═════════════════════════════════════════════════════════════════════════════
// Builder
// ═════════════════════════════════════════════════════════════════════════════

pub struct IntegrateClientBuilder {
    login_url: String,
    base_url: String,
    ws_url: String,
    timeout: Duration,
    proxy: Option<String>,
    credentials: Option<SessionCredentials>,
    resolver: Option<Arc<dyn SymbolResolver>>,
    on_session_expired: Option<SessionExpiredHook>,
}

impl Default for IntegrateClientBuilder {
    fn default() -> Self {
        Self {
            login_url: crate::network::DEFAULT_LOGIN_URL.to_string(),
            base_url: crate::network::DEFAULT_API_URL.to_string(),
            ws_url: crate::network::DEFAULT_WS_URL.to_string(),
            timeout: Duration::from_secs(10),
            proxy: None,
            credentials: None,
            resolver: None,
            on_session_expired: None,
        }
    }
}

impl IntegrateClientBuilder {
    pub fn login_url(mut self, url: &str) -> Self {
        self.login_url = url.to_string();
        self
    }

    pub fn base_url(mut self, url: &str) -> Self {
        self.base_url = url.to_string();
        self
    }

    pub fn ws_url(mut self, url: &str) -> Self {
        self.ws_url = url.to_string();
        self
    }

    /// Per-request HTTP timeout.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Proxy for both REST calls and the streaming connection.
    pub fn proxy(mut self, proxy: &str) -> Self {
        self.proxy = Some(proxy.to_string());
        self
    }

    /// Pre-set session credentials on construction.
    pub fn credentials(mut self, credentials: SessionCredentials) -> Self {
        self.credentials = Some(credentials);
        self
    }

    /// Symbol resolver handed to every stream this client creates.
    pub fn resolver(mut self, resolver: Arc<dyn SymbolResolver>) -> Self {
        self.resolver = Some(resolver);
        self
    }

    /// Called whenever a REST response reports `Session Expired`.
    pub fn on_session_expired(mut self, hook: impl Fn() + Send + Sync + 'static) -> Self {
        self.on_session_expired = Some(Arc::new(hook));
        self
    }

    pub fn build(self) -> Result<IntegrateClient, SdkError> {
        let mut http = IntegrateHttp::new(
            &self.login_url,
            &self.base_url,
            self.timeout,
            self.proxy.as_deref(),
        )?;
        http.set_session_expired_hook(self.on_session_expired);
        if let Some(credentials) = &self.credentials {
            let (_, _, api_key, _) = credentials.session_keys();
            http.preset_api_session_key(api_key);
        }

        Ok(IntegrateClient {
            http,
            credentials: Arc::new(RwLock::new(self.credentials)),
            ws_url: self.ws_url,
            proxy: self.proxy,
            resolver: self.resolver,
        })
    }
}
