//! Unified SDK error types.

use thiserror::Error;

/// Top-level SDK error.
#[derive(Error, Debug)]
pub enum SdkError {
    #[error("HTTP error: {0}")]
    Http(#[from] HttpError),

    #[error("WebSocket error: {0}")]
    Ws(#[from] WsError),

    #[error("Auth error: {0}")]
    Auth(#[from] AuthError),

    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("Symbol master error: {0}")]
    Symbols(#[from] SymbolError),
}

/// HTTP-layer errors.
#[derive(Error, Debug)]
pub enum HttpError {
    #[cfg(feature = "http")]
    #[error("Request failed: {0}")]
    Reqwest(#[from] reqwest::Error),

    #[error("Server error {status}: {body}")]
    ServerError { status: u16, body: String },

    #[error("Unauthorized")]
    Unauthorized,

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Unexpected content type: {0}")]
    UnexpectedContentType(String),

    #[error("API error: {message}")]
    Api { message: String },

    #[error("Session expired: {0}")]
    SessionExpired(String),

    #[error("Decode error: {0}")]
    Decode(String),
}

/// Streaming transport and protocol errors.
#[derive(Error, Debug)]
pub enum WsError {
    #[error("Not connected")]
    NotConnected,

    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Connection timed out after {0:?}")]
    ConnectTimeout(std::time::Duration),

    #[error("Send failed: {0}")]
    SendFailed(String),

    #[error("Malformed message: {reason} (raw: {raw})")]
    MalformedMessage { reason: String, raw: String },

    #[error("Unknown message type: {0}")]
    UnknownMessage(String),

    #[error("Session stopped")]
    SessionStopped,

    #[error("Session event loop is already running")]
    AlreadyRunning,

    #[error("Runtime error: {0}")]
    Runtime(String),
}

/// Authentication errors.
#[derive(Error, Debug)]
pub enum AuthError {
    #[error("Invalid credentials: {0}")]
    InvalidCredentials(String),

    #[error("Not authenticated")]
    NotAuthenticated,

    #[error("Login rejected by server: {0}")]
    LoginRejected(String),

    #[error("Login failed: {0}")]
    LoginFailed(String),
}

/// Caller errors detected before any network interaction.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Invalid exchange type: {0}")]
    InvalidExchange(String),

    #[error("Invalid subscription type: {0}")]
    InvalidSubscriptionKind(String),

    #[error("{token} in {exchange} not found in symbols file")]
    TokenNotFound { exchange: String, token: String },

    #[error("{0} is not subscribed")]
    NotSubscribed(String),

    #[error("No tokens given for {0} subscription")]
    MissingTokens(String),
}

/// Symbol master loading errors.
#[derive(Error, Debug)]
pub enum SymbolError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
}
