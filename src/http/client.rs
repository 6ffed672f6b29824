//! Low-level HTTP client: `IntegrateHttp`.
//!
//! Composes URLs against the login or API base, injects the session key,
//! dispatches on the response content type and turns `{"status": "ERROR"}`
//! bodies into structured errors. Layer 5 wraps this.

use crate::error::HttpError;

use async_lock::RwLock;
use reqwest::header::CONTENT_TYPE;
use reqwest::{Client, Method};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;

/// Invoked when a response reports that the session has expired.
pub type SessionExpiredHook = Arc<dyn Fn() + Send + Sync>;

/// Which base URL a route is relative to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoutePrefix {
    /// The sign-on server.
    Login,
    /// The trading/data API.
    Api,
}

/// Successful response body, by content type.
#[derive(Debug, Clone, PartialEq)]
pub enum ResponseBody {
    Json(serde_json::Value),
    /// `text/csv`, split into lines.
    Csv(Vec<String>),
}

impl ResponseBody {
    fn json<T: DeserializeOwned>(self) -> Result<T, HttpError> {
        match self {
            ResponseBody::Json(value) => {
                serde_json::from_value(value).map_err(|e| HttpError::Decode(e.to_string()))
            }
            ResponseBody::Csv(_) => Err(HttpError::UnexpectedContentType("text/csv".into())),
        }
    }

    fn csv(self) -> Result<Vec<String>, HttpError> {
        match self {
            ResponseBody::Csv(lines) => Ok(lines),
            ResponseBody::Json(_) => {
                Err(HttpError::UnexpectedContentType("application/json".into()))
            }
        }
    }
}

/// Low-level HTTP client for the Integrate REST API.
pub struct IntegrateHttp {
    login_url: String,
    base_url: String,
    client: Client,
    /// Sent as the `Authorization` header once a login has succeeded.
    api_session_key: Arc<RwLock<Option<String>>>,
    on_session_expired: Option<SessionExpiredHook>,
}

impl IntegrateHttp {
    pub fn new(
        login_url: &str,
        base_url: &str,
        timeout: Duration,
        proxy: Option<&str>,
    ) -> Result<Self, HttpError> {
        let mut builder = Client::builder()
            .timeout(timeout)
            .pool_max_idle_per_host(10);
        if let Some(proxy) = proxy {
            builder = builder.proxy(reqwest::Proxy::all(proxy)?);
        }

        Ok(Self {
            login_url: login_url.to_string(),
            base_url: base_url.to_string(),
            client: builder.build()?,
            api_session_key: Arc::new(RwLock::new(None)),
            on_session_expired: None,
        })
    }

    pub fn login_url(&self) -> &str {
        &self.login_url
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub(crate) fn set_session_expired_hook(&mut self, hook: Option<SessionExpiredHook>) {
        self.on_session_expired = hook;
    }

    /// Seed the session key at construction time.
    pub(crate) fn preset_api_session_key(&mut self, key: &str) {
        self.api_session_key = Arc::new(RwLock::new(Some(key.to_string())));
    }

    pub(crate) async fn set_api_session_key(&self, key: Option<String>) {
        *self.api_session_key.write().await = key;
    }

    pub(crate) async fn has_api_session_key(&self) -> bool {
        self.api_session_key.read().await.is_some()
    }

    /// Absolute URL for `route` under the given prefix, with URL-encoded query params.
    pub fn url(&self, prefix: RoutePrefix, route: &str, query: &[(&str, &str)]) -> String {
        let base = match prefix {
            RoutePrefix::Login => &self.login_url,
            RoutePrefix::Api => &self.base_url,
        };
        join_url(base, route, query)
    }

    // ── Request helpers ──────────────────────────────────────────────────

    pub async fn get<T: DeserializeOwned>(
        &self,
        prefix: RoutePrefix,
        route: &str,
        query: &[(&str, &str)],
        headers: &[(&str, &str)],
    ) -> Result<T, HttpError> {
        let url = self.url(prefix, route, query);
        self.do_request(Method::GET, &url, None::<&()>, headers)
            .await?
            .json()
    }

    pub async fn post<T: DeserializeOwned, B: Serialize>(
        &self,
        prefix: RoutePrefix,
        route: &str,
        body: &B,
        headers: &[(&str, &str)],
    ) -> Result<T, HttpError> {
        let url = self.url(prefix, route, &[]);
        self.do_request(Method::POST, &url, Some(body), headers)
            .await?
            .json()
    }

    /// GET a `text/csv` route (historical bars), one string per non-empty line.
    pub async fn get_csv(
        &self,
        prefix: RoutePrefix,
        route: &str,
        query: &[(&str, &str)],
        headers: &[(&str, &str)],
    ) -> Result<Vec<String>, HttpError> {
        let url = self.url(prefix, route, query);
        self.do_request(Method::GET, &url, None::<&()>, headers)
            .await?
            .csv()
    }

    async fn do_request<B: Serialize>(
        &self,
        method: Method,
        url: &str,
        body: Option<&B>,
        headers: &[(&str, &str)],
    ) -> Result<ResponseBody, HttpError> {
        let mut req = self.client.request(method.clone(), url);

        if let Some(key) = self.api_session_key.read().await.as_ref() {
            req = req.header("Authorization", key.as_str());
        }
        for (name, value) in headers {
            req = req.header(*name, *value);
        }
        if let Some(b) = body {
            req = req.json(b);
        }

        tracing::debug!(%method, url, "Integrate request");
        let resp = req.send().await?;
        let status = resp.status();
        let content_type = resp
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_string();
        let body_text = resp.text().await?;
        tracing::debug!(status = status.as_u16(), url, "Integrate response");

        if content_type.contains("json") {
            // Error envelopes can arrive with any status code.
            match serde_json::from_str::<serde_json::Value>(&body_text) {
                Ok(value) => {
                    self.check_error_envelope(&value)?;
                    if status.is_success() {
                        return Ok(ResponseBody::Json(value));
                    }
                }
                Err(e) if status.is_success() => return Err(HttpError::Decode(e.to_string())),
                Err(_) => {}
            }
        } else if content_type.contains("text/csv") && status.is_success() {
            return Ok(ResponseBody::Csv(csv_lines(&body_text)));
        }

        if status.is_success() {
            return Err(HttpError::UnexpectedContentType(content_type));
        }

        let status_code = status.as_u16();
        match status_code {
            401 => Err(HttpError::Unauthorized),
            404 => Err(HttpError::NotFound(body_text)),
            400..=499 => Err(HttpError::BadRequest(body_text)),
            _ => Err(HttpError::ServerError {
                status: status_code,
                body: body_text,
            }),
        }
    }

    fn check_error_envelope(&self, value: &serde_json::Value) -> Result<(), HttpError> {
        if value.get("status").and_then(|s| s.as_str()) != Some("ERROR") {
            return Ok(());
        }
        let message = value
            .get("message")
            .and_then(|m| m.as_str())
            .unwrap_or("unknown error")
            .to_string();

        if message.contains("Session Expired") {
            tracing::warn!("Integrate session expired: {}", message);
            if let Some(hook) = &self.on_session_expired {
                hook();
            }
            return Err(HttpError::SessionExpired(message));
        }
        Err(HttpError::Api { message })
    }
}

impl Clone for IntegrateHttp {
    fn clone(&self) -> Self {
        Self {
            login_url: self.login_url.clone(),
            base_url: self.base_url.clone(),
            client: self.client.clone(),
            api_session_key: self.api_session_key.clone(),
            on_session_expired: self.on_session_expired.clone(),
        }
    }
}

fn csv_lines(body: &str) -> Vec<String> {
    body.lines()
        .map(|line| line.trim_end_matches('\r'))
        .filter(|line| !line.is_empty())
        .map(str::to_string)
        .collect()
}

fn join_url(base: &str, route: &str, query: &[(&str, &str)]) -> String {
    let mut url = format!(
        "{}/{}",
        base.trim_end_matches('/'),
        route.trim_start_matches('/')
    );
    if !query.is_empty() {
        let params = query
            .iter()
            .map(|(k, v)| format!("{}={}", urlencoding::encode(k), urlencoding::encode(v)))
            .collect::<Vec<_>>()
            .join("&");
        url = format!("{}?{}", url, params);
    }
    url
}
