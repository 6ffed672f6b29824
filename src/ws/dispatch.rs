//! Message dispatcher: classifies inbound frames and tracks login state.
//!
//! The dispatcher never calls user code itself. It turns each frame into a
//! [`Dispatch`] that the session delivers to the handler, one frame at a
//! time, in arrival order.

use serde_json::Value;

use crate::error::{AuthError, WsError};
use crate::ws::{Kind, MessageIn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoginState {
    AwaitingLogin,
    LoggedIn,
}

/// What a single inbound frame means for the session.
#[derive(Debug)]
pub enum Dispatch {
    /// `ck` with `s == "OK"`: acknowledgement, then login.
    LoggedIn(Value),
    /// `ck` with any other status: acknowledgement, then an auth error.
    LoginRejected(Value, AuthError),
    /// Subscribe/unsubscribe acknowledgement.
    Acknowledgement(Value),
    Tick(Value),
    OrderUpdate(Value),
    Depth(Value),
    /// Undecodable or unrecognised frame. State is unchanged.
    Error(WsError),
}

#[derive(Debug)]
pub struct Dispatcher {
    state: LoginState,
}

impl Default for Dispatcher {
    fn default() -> Self {
        Self::new()
    }
}

impl Dispatcher {
    pub fn new() -> Self {
        Self {
            state: LoginState::AwaitingLogin,
        }
    }

    pub fn state(&self) -> LoginState {
        self.state
    }

    /// Back to `AwaitingLogin` for a fresh connection.
    pub fn reset(&mut self) {
        self.state = LoginState::AwaitingLogin;
    }

    pub fn dispatch(&mut self, text: &str) -> Dispatch {
        let msg = match MessageIn::parse(text) {
            Ok(msg) => msg,
            Err(e) => return Dispatch::Error(e),
        };

        match msg.kind {
            Kind::LoginAck => {
                if msg.login_ok() {
                    self.state = LoginState::LoggedIn;
                    Dispatch::LoggedIn(msg.payload)
                } else {
                    let reason = msg
                        .payload
                        .get("emsg")
                        .or_else(|| msg.payload.get("s"))
                        .and_then(|v| v.as_str())
                        .unwrap_or("login not acknowledged")
                        .to_string();
                    Dispatch::LoginRejected(msg.payload, AuthError::LoginRejected(reason))
                }
            }
            Kind::Tick => Dispatch::Tick(msg.payload),
            Kind::OrderUpdate => Dispatch::OrderUpdate(msg.payload),
            Kind::Depth => Dispatch::Depth(msg.payload),
            Kind::TickAck
            | Kind::OrderAck
            | Kind::DepthAck
            | Kind::TickUnsubAck
            | Kind::OrderUnsubAck
            | Kind::DepthUnsubAck => Dispatch::Acknowledgement(msg.payload),
        }
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────
