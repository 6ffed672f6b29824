//! Transport seam between the session event loop and a concrete socket.
//!
//! A [`Connector`] makes one connection attempt and hands back a
//! [`Connection`]: a pair of channels to an I/O task that owns the socket.
//! The session only ever sees text frames in and a single `Closed` event.

use futures_util::future::BoxFuture;
use tokio::sync::mpsc;

use crate::error::WsError;
use crate::ws::{ConnectOptions, MessageOut};

/// Frames from the session to the socket.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outbound {
    Text(String),
    /// Start the close handshake.
    Close { code: u16, reason: String },
}

/// Events from the socket to the session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    Message(String),
    /// Delivered at most once, last.
    Closed {
        code: u16,
        reason: String,
        clean: bool,
    },
}

/// Session side of an open connection.
#[derive(Debug)]
pub struct Connection {
    pub outbound: mpsc::UnboundedSender<Outbound>,
    pub events: mpsc::UnboundedReceiver<TransportEvent>,
}

/// I/O-task side of an open connection.
#[derive(Debug)]
pub struct TransportPeer {
    pub outbound: mpsc::UnboundedReceiver<Outbound>,
    pub events: mpsc::UnboundedSender<TransportEvent>,
}

impl Connection {
    /// Linked session/peer channel pair.
    pub fn channel() -> (Connection, TransportPeer) {
        let (out_tx, out_rx) = mpsc::unbounded_channel();
        let (ev_tx, ev_rx) = mpsc::unbounded_channel();
        (
            Connection {
                outbound: out_tx,
                events: ev_rx,
            },
            TransportPeer {
                outbound: out_rx,
                events: ev_tx,
            },
        )
    }

    pub fn send(&self, msg: &MessageOut) -> Result<(), WsError> {
        let json = msg.to_json()?;
        self.outbound
            .send(Outbound::Text(json))
            .map_err(|_| WsError::NotConnected)
    }

    pub fn close(&self, code: u16, reason: &str) -> Result<(), WsError> {
        self.outbound
            .send(Outbound::Close {
                code,
                reason: reason.to_string(),
            })
            .map_err(|_| WsError::NotConnected)
    }
}

/// Opens connections to the streaming endpoint.
///
/// `connect` makes exactly one attempt, bounded by `options.connect_timeout`;
/// retrying is the session's job. An `Err` is a handshake failure.
pub trait Connector: Send + Sync {
    fn connect<'a>(&'a self, options: &'a ConnectOptions)
        -> BoxFuture<'a, Result<Connection, WsError>>;
}
