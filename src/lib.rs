//! # Integrate SDK
//!
//! Rust client for the Definedge Integrate brokerage API, centred on the
//! streaming session: one long-lived, authenticated WebSocket connection
//! that delivers tick, order and market-depth updates through named callbacks
//! and survives drops by reconnecting, re-logging in and resubscribing.
//!
//! ## Architecture
//!
//! The SDK is organized in layers:
//!
//! 1. **Core**: Exchanges, subscription keys, errors, URL constants
//! 2. **Auth**: TOTP login handshake and session keys
//! 3. **HTTP API**: `IntegrateHttp` request helper
//! 4. **Streaming**: `IntegrateStream` session over a pluggable transport
//! 5. **High-Level Client**: `IntegrateClient` tying login and streaming together
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use integrate_sdk::prelude::*;
//!
//! let client = IntegrateClient::builder().build()?;
//! client.auth().login(&api_token, &api_secret, &totp).await?;
//!
//! let stream = client.stream().await?;
//! let handle = stream.handle();
//! tokio::spawn(stream.run(client.connect_options(), MyHandler));
//! ```
//!
//! Outside a runtime, `stream.connect(options, handler)` blocks the calling
//! thread, or runs the session on its own thread with `run_in_background`.

// ── Layer 1: Core ────────────────────────────────────────────────────────────

/// Exchanges, subscription kinds and keys.
pub mod shared;

/// Unified SDK error types.
pub mod error;

/// Network URL constants.
pub mod network;

/// Symbol master loading and token lookup.
pub mod symbols;

// ── Layer 2: Auth ────────────────────────────────────────────────────────────

/// Authentication: login handshake, credentials, session keys.
pub mod auth;

// ── Layer 3: HTTP API ────────────────────────────────────────────────────────

/// HTTP client for the sign-on server and REST API.
#[cfg(feature = "http")]
pub mod http;

// ── Layer 4: Streaming ───────────────────────────────────────────────────────

/// Streaming session: messages, subscriptions, reconnection, transport.
pub mod ws;

// ── Layer 5: High-Level Client ───────────────────────────────────────────────

/// `IntegrateClient`: the primary entry point.
#[cfg(feature = "http")]
pub mod client;

// ── Prelude ──────────────────────────────────────────────────────────────────

pub mod prelude {
    // Shared types
    pub use crate::shared::{Exchange, SubscriptionKey, SubscriptionKind};

    // Errors
    pub use crate::error::{AuthError, SdkError, ValidationError, WsError};

    // Network
    pub use crate::network::{DEFAULT_API_URL, DEFAULT_LOGIN_URL, DEFAULT_WS_URL};

    // Auth
    pub use crate::auth::{CredentialProvider, SessionCredentials};

    // Symbols
    pub use crate::symbols::{SymbolMaster, SymbolRecord, SymbolResolver};

    // HTTP client
    #[cfg(feature = "http")]
    pub use crate::client::{AuthClient, IntegrateClient, IntegrateClientBuilder};

    // Streaming
    pub use crate::ws::{
        ConnectOptions, ConnectionState, IntegrateStream, IntegrateStreamBuilder, StreamHandle,
        StreamHandler, SubscriptionSnapshot,
    };
    #[cfg(feature = "ws-native")]
    pub use crate::ws::native::NativeConnector;
}
