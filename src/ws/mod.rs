//! Streaming layer: wire messages, connection options, the session.
//!
//! The session event loop is transport-agnostic: it drives any
//! [`transport::Connector`]. The `ws-native` feature provides
//! [`native::NativeConnector`] (`tokio-tungstenite` over `native-tls`).
//!
//! This module defines the shared message and state types.

pub mod dispatch;
pub mod handler;
pub mod reconnect;
pub mod session;
pub mod subscriptions;
pub mod transport;

#[cfg(feature = "ws-native")]
pub mod native;

use std::time::Duration;

use serde::Serialize;

use crate::auth::CredentialProvider;
use crate::error::WsError;
use crate::shared::{join_keys, SubscriptionKey, SubscriptionKind};

pub use handler::StreamHandler;
pub use session::{IntegrateStream, IntegrateStreamBuilder, StreamHandle};
pub use subscriptions::{SubscriptionRegistry, SubscriptionSnapshot};

/// `source` value the server expects in the login frame.
pub const LOGIN_SOURCE: &str = "TRTP";

// ─── Outbound messages ───────────────────────────────────────────────────────

/// Messages sent from client to server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "t")]
pub enum MessageOut {
    #[serde(rename = "c")]
    Login {
        uid: String,
        actid: String,
        source: String,
        susertoken: String,
    },
    #[serde(rename = "t")]
    SubscribeTicks { k: String },
    #[serde(rename = "d")]
    SubscribeDepth { k: String },
    #[serde(rename = "o")]
    SubscribeOrders { actid: String },
    #[serde(rename = "u")]
    UnsubscribeTicks { k: String },
    #[serde(rename = "ud")]
    UnsubscribeDepth { k: String },
    #[serde(rename = "uo")]
    UnsubscribeOrders { actid: String },
}

impl MessageOut {
    pub fn login(credentials: &dyn CredentialProvider) -> Self {
        MessageOut::Login {
            uid: credentials.user_id().to_string(),
            actid: credentials.account_id().to_string(),
            source: LOGIN_SOURCE.to_string(),
            susertoken: credentials.streaming_secret().to_string(),
        }
    }

    /// Subscribe frame. For ticks and depth, `keys` is the full set for that kind.
    pub fn subscribe<'a>(
        kind: SubscriptionKind,
        keys: impl IntoIterator<Item = &'a SubscriptionKey>,
        actid: &str,
    ) -> Self {
        match kind {
            SubscriptionKind::Tick => MessageOut::SubscribeTicks { k: join_keys(keys) },
            SubscriptionKind::Depth => MessageOut::SubscribeDepth { k: join_keys(keys) },
            SubscriptionKind::Order => MessageOut::SubscribeOrders {
                actid: actid.to_string(),
            },
        }
    }

    /// Unsubscribe frame listing only the removed keys.
    pub fn unsubscribe<'a>(
        kind: SubscriptionKind,
        keys: impl IntoIterator<Item = &'a SubscriptionKey>,
        actid: &str,
    ) -> Self {
        match kind {
            SubscriptionKind::Tick => MessageOut::UnsubscribeTicks { k: join_keys(keys) },
            SubscriptionKind::Depth => MessageOut::UnsubscribeDepth { k: join_keys(keys) },
            SubscriptionKind::Order => MessageOut::UnsubscribeOrders {
                actid: actid.to_string(),
            },
        }
    }

    pub fn to_json(&self) -> Result<String, WsError> {
        serde_json::to_string(self).map_err(|e| WsError::SendFailed(e.to_string()))
    }
}

// ─── Inbound messages ────────────────────────────────────────────────────────

/// Discriminator (`t` field) of an inbound frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Kind {
    /// `ck`
    LoginAck,
    /// `tk`
    TickAck,
    /// `ok`
    OrderAck,
    /// `dk`
    DepthAck,
    /// `uk`
    TickUnsubAck,
    /// `uok`
    OrderUnsubAck,
    /// `udk`
    DepthUnsubAck,
    /// `tf`
    Tick,
    /// `om`
    OrderUpdate,
    /// `df`
    Depth,
}

impl Kind {
    pub fn from_code(code: &str) -> Option<Self> {
        Some(match code {
            "ck" => Kind::LoginAck,
            "tk" => Kind::TickAck,
            "ok" => Kind::OrderAck,
            "dk" => Kind::DepthAck,
            "uk" => Kind::TickUnsubAck,
            "uok" => Kind::OrderUnsubAck,
            "udk" => Kind::DepthUnsubAck,
            "tf" => Kind::Tick,
            "om" => Kind::OrderUpdate,
            "df" => Kind::Depth,
            _ => return None,
        })
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Kind::LoginAck => "ck",
            Kind::TickAck => "tk",
            Kind::OrderAck => "ok",
            Kind::DepthAck => "dk",
            Kind::TickUnsubAck => "uk",
            Kind::OrderUnsubAck => "uok",
            Kind::DepthUnsubAck => "udk",
            Kind::Tick => "tf",
            Kind::OrderUpdate => "om",
            Kind::Depth => "df",
        }
    }
}

/// A decoded inbound frame. `payload` is the whole JSON object, untouched.
#[derive(Debug, Clone, PartialEq)]
pub struct MessageIn {
    pub kind: Kind,
    pub payload: serde_json::Value,
}

impl MessageIn {
    pub fn parse(text: &str) -> Result<Self, WsError> {
        let malformed = |reason: String| WsError::MalformedMessage {
            reason,
            raw: text.to_string(),
        };

        let payload: serde_json::Value =
            serde_json::from_str(text).map_err(|e| malformed(e.to_string()))?;
        let code = payload
            .as_object()
            .ok_or_else(|| malformed("expected a JSON object".into()))?
            .get("t")
            .and_then(|t| t.as_str())
            .ok_or_else(|| malformed("missing `t` discriminator".into()))?;
        let kind = Kind::from_code(code).ok_or_else(|| WsError::UnknownMessage(code.to_string()))?;

        Ok(MessageIn { kind, payload })
    }

    /// Whether a `ck` frame reports a successful login.
    pub fn login_ok(&self) -> bool {
        self.payload.get("s").and_then(|s| s.as_str()) == Some("OK")
    }
}

// ─── Connection state ────────────────────────────────────────────────────────

/// Session connection state, shared between the event loop and handles.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ConnectionState {
    Disconnected = 0,
    Connecting = 1,
    Open = 2,
    LoggingIn = 3,
    LoggedIn = 4,
    Closing = 5,
}

impl From<u8> for ConnectionState {
    fn from(v: u8) -> Self {
        match v {
            1 => ConnectionState::Connecting,
            2 => ConnectionState::Open,
            3 => ConnectionState::LoggingIn,
            4 => ConnectionState::LoggedIn,
            5 => ConnectionState::Closing,
            _ => ConnectionState::Disconnected,
        }
    }
}

// ─── Connect options ─────────────────────────────────────────────────────────

/// Options for [`IntegrateStream::connect`].
#[derive(Debug, Clone)]
pub struct ConnectOptions {
    pub server_url: String,
    /// Run the event loop on a dedicated thread and return immediately.
    pub run_in_background: bool,
    pub reconnect: bool,
    /// Clamped to at most 300.
    pub reconnect_max_attempts: u32,
    /// Clamped to at least 5 seconds.
    pub reconnect_max_delay: Duration,
    pub connect_timeout: Duration,
    pub tls_verify: bool,
    /// HTTP CONNECT proxy, e.g. `http://proxy.local:3128`.
    pub proxy: Option<String>,
    /// Auto-ping period. `Duration::ZERO` disables auto-ping.
    pub ping_interval: Duration,
    /// How long to wait for the pong before treating the connection as dead.
    pub ping_timeout: Duration,
    /// Upper bound on the close handshake before the socket is dropped.
    pub close_timeout: Duration,
}

impl Default for ConnectOptions {
    fn default() -> Self {
        Self {
            server_url: crate::network::DEFAULT_WS_URL.to_string(),
            run_in_background: false,
            reconnect: true,
            reconnect_max_attempts: reconnect::DEFAULT_MAX_ATTEMPTS,
            reconnect_max_delay: reconnect::DEFAULT_MAX_DELAY,
            connect_timeout: Duration::from_secs(30),
            tls_verify: true,
            proxy: None,
            ping_interval: Duration::from_secs(10),
            ping_timeout: Duration::from_secs(5),
            close_timeout: Duration::from_secs(10),
        }
    }
}
