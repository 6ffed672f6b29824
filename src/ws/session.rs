//! Streaming session: `IntegrateStream` facade, `StreamHandle`, event loop.
//!
//! One facade is one logical session. It outlives any number of transport
//! connections and owns:
//! - a single-threaded event loop (caller's thread or a dedicated thread)
//! - the subscription registry, shared with every handle behind a mutex
//! - the reconnection policy and the dispatcher
//!
//! Handles never touch the socket. They record subscriptions and push
//! commands onto an unbounded queue the event loop drains, so they are safe
//! to use from any thread and from inside callbacks.
//!
//! The queue's receiving end is parked in the shared state between runs, so
//! a facade whose loop has ended (without `stop`) can be run again and keeps
//! its registry.

use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::JoinHandle;

use tokio::sync::mpsc;
use tracing::Instrument;

use crate::auth::CredentialProvider;
use crate::error::{SdkError, ValidationError, WsError};
use crate::shared::{SubscriptionKey, SubscriptionKind};
use crate::symbols::SymbolResolver;
use crate::ws::dispatch::{Dispatch, Dispatcher};
use crate::ws::handler::StreamHandler;
use crate::ws::reconnect::{Decision, ReconnectPolicy};
use crate::ws::subscriptions::{SubscriptionRegistry, SubscriptionSnapshot};
use crate::ws::transport::{Connection, Connector, TransportEvent};
use crate::ws::{ConnectOptions, ConnectionState, MessageOut};

/// Close code used by [`StreamHandle::stop`] and [`StreamHandle::close_on_exception`].
pub const NORMAL_CLOSE: u16 = 1000;

/// Name of the background event-loop thread.
pub const THREAD_NAME: &str = "integrate-ws";

// ─── Commands from handles to the event loop ─────────────────────────────────

#[derive(Debug)]
enum Command {
    /// Frame built by the registry. Sent only once logged in.
    Send(MessageOut),
    Resubscribe,
    Close { code: u16, reason: String },
    StopRetry,
}

// ─── State shared between handles and the loop ───────────────────────────────

struct Shared {
    registry: Mutex<SubscriptionRegistry>,
    state: AtomicU8,
    stopped: AtomicBool,
    actid: String,
    resolver: Option<Arc<dyn SymbolResolver>>,
    /// `None` while an event loop owns it.
    commands: Mutex<Option<mpsc::UnboundedReceiver<Command>>>,
}

impl Shared {
    fn registry(&self) -> MutexGuard<'_, SubscriptionRegistry> {
        // The registry holds no invariants a panicking callback could break.
        self.registry.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn take_commands(&self) -> Option<mpsc::UnboundedReceiver<Command>> {
        self.commands.lock().unwrap_or_else(|e| e.into_inner()).take()
    }

    fn park_commands(&self, rx: mpsc::UnboundedReceiver<Command>) {
        *self.commands.lock().unwrap_or_else(|e| e.into_inner()) = Some(rx);
    }

    fn state(&self) -> ConnectionState {
        ConnectionState::from(self.state.load(Ordering::SeqCst))
    }

    fn set_state(&self, state: ConnectionState) {
        self.state.store(state as u8, Ordering::SeqCst);
    }
}

// ─── StreamHandle ────────────────────────────────────────────────────────────

/// Thread-safe command surface of a session.
///
/// Validation failures are returned synchronously; everything that happens
/// on the wire is reported through [`StreamHandler`] callbacks.
#[derive(Clone)]
pub struct StreamHandle {
    shared: Arc<Shared>,
    cmd_tx: mpsc::UnboundedSender<Command>,
}

impl std::fmt::Debug for StreamHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamHandle")
            .field("actid", &self.shared.actid)
            .field("state", &self.state())
            .finish()
    }
}

impl StreamHandle {
    fn ensure_running(&self) -> Result<(), SdkError> {
        if self.shared.stopped.load(Ordering::SeqCst) {
            return Err(WsError::SessionStopped.into());
        }
        Ok(())
    }

    fn command(&self, cmd: Command) {
        if self.cmd_tx.send(cmd).is_err() {
            tracing::debug!("Event loop has exited; command dropped");
        }
    }

    /// Check keys against the symbol resolver, if one is configured.
    ///
    /// A resolver may map a trading symbol to its token; the resolved token
    /// is what gets recorded.
    fn resolve(&self, keys: &[SubscriptionKey]) -> Result<Vec<SubscriptionKey>, ValidationError> {
        let Some(resolver) = &self.shared.resolver else {
            return Ok(keys.to_vec());
        };
        keys.iter()
            .map(|key| {
                resolver
                    .lookup(key.exchange, &key.token)
                    .map(|token| SubscriptionKey::new(key.exchange, token))
                    .ok_or_else(|| ValidationError::TokenNotFound {
                        exchange: key.exchange.to_string(),
                        token: key.token.clone(),
                    })
            })
            .collect()
    }

    /// Subscribe to ticks or depth for `keys`, or to order updates (`keys` ignored).
    ///
    /// The registry is updated immediately. The frame goes out once the
    /// session is logged in; before that, the login replay covers it.
    pub fn subscribe(&self, kind: SubscriptionKind, keys: &[SubscriptionKey]) -> Result<(), SdkError> {
        self.ensure_running()?;
        let keys = match kind {
            SubscriptionKind::Order => Vec::new(),
            _ => self.resolve(keys)?,
        };
        // Queue under the lock: frames must leave in registry order.
        let mut registry = self.shared.registry();
        let frame = registry.subscribe(kind, &keys, &self.shared.actid)?;
        self.command(Command::Send(frame));
        Ok(())
    }

    /// Remove subscriptions. Fails if any key was never subscribed.
    pub fn unsubscribe(&self, kind: SubscriptionKind, keys: &[SubscriptionKey]) -> Result<(), SdkError> {
        self.ensure_running()?;
        let keys = match kind {
            SubscriptionKind::Order => Vec::new(),
            _ => self.resolve(keys)?,
        };
        let mut registry = self.shared.registry();
        let frame = registry.unsubscribe(kind, &keys, &self.shared.actid)?;
        self.command(Command::Send(frame));
        Ok(())
    }

    /// [`subscribe`](Self::subscribe) with raw codes, e.g. `("TICK", &[("NSE", "11536")])`.
    pub fn subscribe_raw(&self, kind: &str, tokens: &[(&str, &str)]) -> Result<(), SdkError> {
        let (kind, keys) = parse_raw(kind, tokens)?;
        self.subscribe(kind, &keys)
    }

    /// [`unsubscribe`](Self::unsubscribe) with raw codes.
    pub fn unsubscribe_raw(&self, kind: &str, tokens: &[(&str, &str)]) -> Result<(), SdkError> {
        let (kind, keys) = parse_raw(kind, tokens)?;
        self.unsubscribe(kind, &keys)
    }

    /// Re-send the whole registry. A no-op until the session is logged in.
    pub fn resubscribe(&self) -> Result<(), SdkError> {
        self.ensure_running()?;
        self.command(Command::Resubscribe);
        Ok(())
    }

    /// Stop reconnecting and close the connection gracefully. Idempotent.
    pub fn close(&self, code: u16, reason: &str) {
        self.command(Command::Close {
            code,
            reason: reason.to_string(),
        });
    }

    /// Graceful close (code 1000), meant to be called from `on_exception`.
    pub fn close_on_exception(&self, reason: &str) {
        self.close(NORMAL_CLOSE, reason);
    }

    /// Close and end the session for good. Later calls on any handle fail
    /// with [`WsError::SessionStopped`].
    pub fn stop(&self) {
        if !self.shared.stopped.swap(true, Ordering::SeqCst) {
            tracing::info!("Stopping stream session");
        }
        self.close(NORMAL_CLOSE, "Client stopped");
    }

    /// Cancel pending and future reconnection attempts. An open connection is left alone.
    pub fn stop_retry(&self) {
        self.command(Command::StopRetry);
    }

    pub fn state(&self) -> ConnectionState {
        self.shared.state()
    }

    /// Whether a transport connection is up (logged in or not).
    pub fn is_connected(&self) -> bool {
        matches!(
            self.state(),
            ConnectionState::Open | ConnectionState::LoggingIn | ConnectionState::LoggedIn
        )
    }

    pub fn is_logged_in(&self) -> bool {
        self.state() == ConnectionState::LoggedIn
    }

    pub fn is_stopped(&self) -> bool {
        self.shared.stopped.load(Ordering::SeqCst)
    }

    pub fn subscriptions(&self) -> SubscriptionSnapshot {
        self.shared.registry().snapshot()
    }
}

fn parse_raw(
    kind: &str,
    tokens: &[(&str, &str)],
) -> Result<(SubscriptionKind, Vec<SubscriptionKey>), ValidationError> {
    let kind: SubscriptionKind = kind.parse()?;
    let keys = tokens
        .iter()
        .map(|(exchange, token)| SubscriptionKey::parse(exchange, *token))
        .collect::<Result<Vec<_>, _>>()?;
    Ok((kind, keys))
}

// ─── IntegrateStream ─────────────────────────────────────────────────────────

/// The streaming session facade.
///
/// ```rust,ignore
/// let stream = IntegrateStream::new(credentials);
/// let handle = stream.handle();
/// stream.connect(ConnectOptions::default(), MyHandler)?; // blocks until the session ends
/// ```
///
/// Once a run ends without [`StreamHandle::stop`] (reconnect exhaustion, a
/// close, a drop with reconnection off) the same facade can be connected
/// again; the new run replays the registry after login.
pub struct IntegrateStream {
    credentials: Arc<dyn CredentialProvider>,
    connector: Option<Arc<dyn Connector>>,
    span: tracing::Span,
    handle: StreamHandle,
}

impl IntegrateStream {
    pub fn new(credentials: impl CredentialProvider + 'static) -> Self {
        Self::builder(credentials).build()
    }

    pub fn builder(credentials: impl CredentialProvider + 'static) -> IntegrateStreamBuilder {
        IntegrateStreamBuilder {
            credentials: Arc::new(credentials),
            resolver: None,
            connector: None,
            span: None,
        }
    }

    /// A handle for subscribing and closing, usable from any thread.
    pub fn handle(&self) -> StreamHandle {
        self.handle.clone()
    }

    /// Run the session.
    ///
    /// With `run_in_background == false` this blocks the calling thread on a
    /// current-thread runtime until the session ends (stop, close, reconnect
    /// exhaustion, or a drop with reconnection disabled) and returns `None`.
    /// Otherwise the same loop runs on a dedicated thread whose handle is
    /// returned immediately.
    ///
    /// Fails with [`WsError::SessionStopped`] after a stop and with
    /// [`WsError::AlreadyRunning`] while another run is in progress.
    /// Must not be called from inside a tokio runtime; use [`run`](Self::run) there.
    pub fn connect<H>(
        &self,
        options: ConnectOptions,
        handler: H,
    ) -> Result<Option<JoinHandle<()>>, SdkError>
    where
        H: StreamHandler + 'static,
    {
        let background = options.run_in_background;
        let event_loop = self.event_loop(options, handler)?;
        let span = self.span.clone();
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(|e| WsError::Runtime(e.to_string()))?;

        if !background {
            runtime.block_on(event_loop.run().instrument(span));
            return Ok(None);
        }

        let thread = std::thread::Builder::new()
            .name(THREAD_NAME.to_string())
            .spawn(move || runtime.block_on(event_loop.run().instrument(span)))
            .map_err(|e| WsError::Runtime(e.to_string()))?;
        Ok(Some(thread))
    }

    /// The session event loop as a future, for callers already inside tokio.
    ///
    /// The future does not borrow the facade, so it can be handed to
    /// `tokio::spawn`. Its command queue is claimed when `run` is called.
    pub fn run<H>(
        &self,
        options: ConnectOptions,
        handler: H,
    ) -> impl Future<Output = Result<(), SdkError>> + Send + 'static
    where
        H: StreamHandler + 'static,
    {
        let event_loop = self.event_loop(options, handler);
        let span = self.span.clone();
        async move {
            let event_loop = event_loop?;
            event_loop.run().instrument(span).await;
            Ok::<(), SdkError>(())
        }
    }

    fn event_loop<H>(&self, options: ConnectOptions, handler: H) -> Result<EventLoop<H>, SdkError> {
        if self.handle.is_stopped() {
            return Err(WsError::SessionStopped.into());
        }
        let connector = self.connector.clone().ok_or_else(no_connector)?;
        let mut cmd_rx = self
            .handle
            .shared
            .take_commands()
            .ok_or(WsError::AlreadyRunning)?;
        // Left over from an earlier run; the registry already reflects them.
        while cmd_rx.try_recv().is_ok() {}

        Ok(EventLoop {
            policy: ReconnectPolicy::from_options(&options),
            handler,
            handle: self.handle.clone(),
            credentials: self.credentials.clone(),
            connector,
            options,
            dispatcher: Dispatcher::new(),
            cmd_rx,
            is_reconnection: false,
        })
    }
}

fn no_connector() -> SdkError {
    WsError::Runtime("no transport connector configured".into()).into()
}

#[cfg(feature = "ws-native")]
fn default_connector() -> Option<Arc<dyn Connector>> {
    Some(Arc::new(crate::ws::native::NativeConnector))
}

#[cfg(not(feature = "ws-native"))]
fn default_connector() -> Option<Arc<dyn Connector>> {
    None
}

pub struct IntegrateStreamBuilder {
    credentials: Arc<dyn CredentialProvider>,
    resolver: Option<Arc<dyn SymbolResolver>>,
    connector: Option<Arc<dyn Connector>>,
    span: Option<tracing::Span>,
}

impl IntegrateStreamBuilder {
    /// Validate subscription tokens against this resolver.
    pub fn resolver(mut self, resolver: Arc<dyn SymbolResolver>) -> Self {
        self.resolver = Some(resolver);
        self
    }

    /// Replace the default native transport.
    pub fn connector(mut self, connector: Arc<dyn Connector>) -> Self {
        self.connector = Some(connector);
        self
    }

    /// Span the event loop runs in. Defaults to `integrate_stream{actid}`.
    pub fn span(mut self, span: tracing::Span) -> Self {
        self.span = Some(span);
        self
    }

    pub fn build(self) -> IntegrateStream {
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let actid = self.credentials.account_id().to_string();
        let span = self
            .span
            .unwrap_or_else(|| tracing::info_span!("integrate_stream", actid = %actid));

        let shared = Arc::new(Shared {
            registry: Mutex::new(SubscriptionRegistry::new()),
            state: AtomicU8::new(ConnectionState::Disconnected as u8),
            stopped: AtomicBool::new(false),
            actid,
            resolver: self.resolver,
            commands: Mutex::new(Some(cmd_rx)),
        });

        IntegrateStream {
            credentials: self.credentials,
            connector: self.connector.or_else(default_connector),
            span,
            handle: StreamHandle { shared, cmd_tx },
        }
    }
}

// ─── Event loop ──────────────────────────────────────────────────────────────

enum Opened {
    Connected(Connection),
    Failed(WsError),
    Cancelled,
}

enum Next {
    Reconnect,
    Exit,
}

struct EventLoop<H> {
    handler: H,
    handle: StreamHandle,
    credentials: Arc<dyn CredentialProvider>,
    connector: Arc<dyn Connector>,
    options: ConnectOptions,
    policy: ReconnectPolicy,
    dispatcher: Dispatcher,
    cmd_rx: mpsc::UnboundedReceiver<Command>,
    is_reconnection: bool,
}

impl<H: StreamHandler> EventLoop<H> {
    async fn run(mut self) {
        tracing::info!(url = %self.options.server_url, "Starting stream session");

        loop {
            // ── 1. Attempt connection ────────────────────────────────────
            self.set_state(ConnectionState::Connecting);
            match self.open().await {
                Opened::Connected(conn) => {
                    self.policy.on_open();
                    self.run_connected(conn).await;
                    self.is_reconnection = true;
                }
                Opened::Failed(e) => {
                    self.set_state(ConnectionState::Disconnected);
                    tracing::warn!("Stream connection failed: {}", e);
                    self.handler.on_error(&self.handle, 1006, &e.to_string());
                }
                Opened::Cancelled => break,
            }

            // ── 2. Reconnection decision ─────────────────────────────────
            match self.backoff().await {
                Next::Reconnect => continue,
                Next::Exit => break,
            }
        }

        self.set_state(ConnectionState::Disconnected);
        tracing::info!("Stream session ended");
    }

    /// One connection attempt. A close request cancels it.
    async fn open(&mut self) -> Opened {
        let attempt = self.connector.connect(&self.options);
        tokio::pin!(attempt);

        loop {
            tokio::select! {
                biased;

                cmd = self.cmd_rx.recv() => match cmd {
                    Some(Command::Close { .. }) | None => {
                        self.policy.stop();
                        tracing::info!("Close requested while connecting");
                        return Opened::Cancelled;
                    }
                    Some(Command::StopRetry) => self.policy.stop(),
                    Some(Command::Send(_)) | Some(Command::Resubscribe) => {
                        tracing::debug!("Not logged in; frame deferred to login replay");
                    }
                },
                result = &mut attempt => {
                    return match result {
                        Ok(conn) => Opened::Connected(conn),
                        Err(e) => Opened::Failed(e),
                    };
                }
            }
        }
    }

    /// Drive an open connection until the transport reports it closed.
    async fn run_connected(&mut self, mut conn: Connection) {
        // ── Login strictly before anything else ──────────────────────────
        self.set_state(ConnectionState::Open);
        if let Err(e) = conn.send(&MessageOut::login(self.credentials.as_ref())) {
            self.exception(e.into());
        }
        self.set_state(ConnectionState::LoggingIn);
        self.dispatcher.reset();
        tracing::info!(
            reconnection = self.is_reconnection,
            "Stream connected, logging in"
        );
        self.handler.on_connect(&self.handle);

        let mut closing = false;
        loop {
            tokio::select! {
                // Commands first: frames queued before the login ack are
                // dropped here and covered by the replay.
                biased;

                cmd = self.cmd_rx.recv() => match cmd {
                    Some(Command::Send(frame)) => {
                        if self.state() == ConnectionState::LoggedIn {
                            if let Err(e) = conn.send(&frame) {
                                self.exception(e.into());
                            }
                        } else {
                            tracing::debug!("Not logged in; frame deferred to login replay");
                        }
                    }
                    Some(Command::Resubscribe) => {
                        if self.state() == ConnectionState::LoggedIn {
                            self.replay(&conn);
                        }
                    }
                    Some(Command::Close { code, reason }) => {
                        self.policy.stop();
                        if !closing {
                            closing = true;
                            tracing::info!(code, reason = %reason, "Closing stream");
                            self.set_state(ConnectionState::Closing);
                            if let Err(e) = conn.close(code, &reason) {
                                tracing::debug!("Close on a dead transport: {}", e);
                            }
                        }
                    }
                    Some(Command::StopRetry) => {
                        tracing::info!("Reconnection disabled by caller");
                        self.policy.stop();
                    }
                    None => {
                        self.policy.stop();
                        let _ = conn.close(NORMAL_CLOSE, "Session dropped");
                    }
                },

                event = conn.events.recv() => match event {
                    Some(TransportEvent::Message(text)) => self.on_frame(&conn, &text),
                    Some(TransportEvent::Closed { code, reason, clean }) => {
                        self.on_closed(code, &reason, clean);
                        return;
                    }
                    None => {
                        self.on_closed(1006, "Transport task ended", false);
                        return;
                    }
                },
            }
        }
    }

    fn on_frame(&mut self, conn: &Connection, text: &str) {
        match self.dispatcher.dispatch(text) {
            Dispatch::LoggedIn(ack) => {
                self.handler.on_acknowledgement(&self.handle, &ack);
                self.set_state(ConnectionState::LoggedIn);
                tracing::info!("Stream login acknowledged");

                let has_subscriptions = !self.handle.shared.registry().is_empty();
                if self.is_reconnection || has_subscriptions {
                    self.replay(conn);
                }
                self.handler.on_open(&self.handle);
                self.handler.on_login(&self.handle);
            }
            Dispatch::LoginRejected(ack, err) => {
                self.handler.on_acknowledgement(&self.handle, &ack);
                self.exception(err.into());
            }
            Dispatch::Acknowledgement(ack) => self.handler.on_acknowledgement(&self.handle, &ack),
            Dispatch::Tick(tick) => self.handler.on_tick_update(&self.handle, &tick),
            Dispatch::OrderUpdate(order) => self.handler.on_order_update(&self.handle, &order),
            Dispatch::Depth(depth) => self.handler.on_depth_update(&self.handle, &depth),
            Dispatch::Error(e) => self.exception(e.into()),
        }
    }

    /// Send the whole registry on this connection.
    fn replay(&mut self, conn: &Connection) {
        let frames = self.handle.shared.registry().replay(&self.handle.shared.actid);
        if frames.is_empty() {
            return;
        }
        tracing::info!("Resubscribing {} subscription frame(s)", frames.len());
        for frame in &frames {
            if let Err(e) = conn.send(frame) {
                self.exception(e.into());
            }
        }
    }

    fn on_closed(&mut self, code: u16, reason: &str, clean: bool) {
        self.set_state(ConnectionState::Disconnected);
        if !clean {
            tracing::warn!(code, reason, "Stream connection lost");
            self.handler.on_error(&self.handle, code, reason);
        }
        tracing::info!(code, reason, "Stream connection closed");
        self.handler.on_close(&self.handle, code, reason);
    }

    /// Apply the reconnection policy, sleeping through the backoff delay.
    async fn backoff(&mut self) -> Next {
        let (attempt, delay) = match self.policy.next_attempt() {
            Decision::Retry { attempt, delay } => (attempt, delay),
            Decision::Exhausted => {
                tracing::warn!(
                    "Giving up after {} reconnection attempt(s)",
                    self.policy.max_attempts()
                );
                self.handler.on_stop_reconnection(&self.handle);
                return Next::Exit;
            }
            Decision::Stopped => return Next::Exit,
        };

        tracing::info!(
            "Reconnect attempt {}/{} in {:?}",
            attempt,
            self.policy.max_attempts(),
            delay
        );
        self.handler.on_reconnection(&self.handle, attempt);

        let sleep = tokio::time::sleep(delay);
        tokio::pin!(sleep);
        loop {
            tokio::select! {
                () = &mut sleep => return Next::Reconnect,
                cmd = self.cmd_rx.recv() => match cmd {
                    Some(Command::Close { .. }) | Some(Command::StopRetry) | None => {
                        tracing::info!("Pending reconnection cancelled");
                        self.policy.stop();
                        return Next::Exit;
                    }
                    Some(Command::Send(_)) | Some(Command::Resubscribe) => {
                        tracing::debug!("Not connected; frame deferred to login replay");
                    }
                },
            }
        }
    }

    fn exception(&mut self, error: SdkError) {
        tracing::warn!("Stream exception: {}", error);
        self.handler.on_exception(&self.handle, &error);
    }

    fn state(&self) -> ConnectionState {
        self.handle.shared.state()
    }

    fn set_state(&self, state: ConnectionState) {
        self.handle.shared.set_state(state);
    }
}

impl<H> Drop for EventLoop<H> {
    fn drop(&mut self) {
        // Park the queue so the facade can run again, even after an abort.
        let (_, placeholder) = mpsc::unbounded_channel();
        let cmd_rx = std::mem::replace(&mut self.cmd_rx, placeholder);
        self.handle.shared.park_commands(cmd_rx);
        self.handle.shared.set_state(ConnectionState::Disconnected);
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::SessionCredentials;
    use crate::shared::Exchange;
    use crate::ws::transport::{Outbound, TransportPeer};
    use futures_util::future::BoxFuture;
    use serde_json::{json, Value};
    use std::collections::{HashMap, VecDeque};
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    // ── Scripted connector ───────────────────────────────────────────────

    /// Pops one outcome per attempt (`true` = connect); fails once the script runs out.
    struct MockConnector {
        script: Mutex<VecDeque<bool>>,
        attempts: AtomicUsize,
        peers: mpsc::UnboundedSender<TransportPeer>,
    }

    impl MockConnector {
        fn new(script: &[bool]) -> (Arc<Self>, mpsc::UnboundedReceiver<TransportPeer>) {
            let (tx, rx) = mpsc::unbounded_channel();
            let connector = Arc::new(Self {
                script: Mutex::new(script.iter().copied().collect()),
                attempts: AtomicUsize::new(0),
                peers: tx,
            });
            (connector, rx)
        }

        fn attempts(&self) -> usize {
            self.attempts.load(Ordering::SeqCst)
        }
    }

    impl Connector for MockConnector {
        fn connect<'a>(
            &'a self,
            _options: &'a ConnectOptions,
        ) -> BoxFuture<'a, Result<Connection, WsError>> {
            Box::pin(async move {
                self.attempts.fetch_add(1, Ordering::SeqCst);
                let succeed = self.script.lock().unwrap().pop_front().unwrap_or(false);
                if !succeed {
                    return Err(WsError::ConnectionFailed("connection refused".into()));
                }
                let (conn, peer) = Connection::channel();
                self.peers.send(peer).unwrap();
                Ok(conn)
            })
        }
    }

    // ── Recording handler ────────────────────────────────────────────────

    #[derive(Debug, Clone, PartialEq)]
    enum Ev {
        Connect,
        Open,
        Login,
        Close(u16, String),
        Error(u16, String),
        Reconnection(u32),
        StopReconnection,
        Exception(String),
        Tick(Value),
        Order(Value),
        Depth(Value),
        Ack(Value),
    }

    #[derive(Default)]
    struct Recorder {
        events: Option<mpsc::UnboundedSender<Ev>>,
        subscribe_on_login: Vec<SubscriptionKey>,
        stop_retry_on_reconnection: bool,
    }

    impl Recorder {
        fn new() -> (Self, mpsc::UnboundedReceiver<Ev>) {
            let (tx, rx) = mpsc::unbounded_channel();
            (
                Self {
                    events: Some(tx),
                    ..Default::default()
                },
                rx,
            )
        }

        fn push(&self, ev: Ev) {
            if let Some(tx) = &self.events {
                let _ = tx.send(ev);
            }
        }
    }

    impl StreamHandler for Recorder {
        fn on_connect(&mut self, _: &StreamHandle) {
            self.push(Ev::Connect);
        }
        fn on_open(&mut self, _: &StreamHandle) {
            self.push(Ev::Open);
        }
        fn on_login(&mut self, stream: &StreamHandle) {
            self.push(Ev::Login);
            if !self.subscribe_on_login.is_empty() {
                stream
                    .subscribe(SubscriptionKind::Tick, &self.subscribe_on_login)
                    .unwrap();
            }
        }
        fn on_close(&mut self, _: &StreamHandle, code: u16, reason: &str) {
            self.push(Ev::Close(code, reason.to_string()));
        }
        fn on_error(&mut self, _: &StreamHandle, code: u16, reason: &str) {
            self.push(Ev::Error(code, reason.to_string()));
        }
        fn on_reconnection(&mut self, stream: &StreamHandle, attempt: u32) {
            self.push(Ev::Reconnection(attempt));
            if self.stop_retry_on_reconnection {
                stream.stop_retry();
            }
        }
        fn on_stop_reconnection(&mut self, _: &StreamHandle) {
            self.push(Ev::StopReconnection);
        }
        fn on_exception(&mut self, _: &StreamHandle, error: &SdkError) {
            self.push(Ev::Exception(error.to_string()));
        }
        fn on_tick_update(&mut self, _: &StreamHandle, tick: &Value) {
            self.push(Ev::Tick(tick.clone()));
        }
        fn on_order_update(&mut self, _: &StreamHandle, order: &Value) {
            self.push(Ev::Order(order.clone()));
        }
        fn on_depth_update(&mut self, _: &StreamHandle, depth: &Value) {
            self.push(Ev::Depth(depth.clone()));
        }
        fn on_acknowledgement(&mut self, _: &StreamHandle, ack: &Value) {
            self.push(Ev::Ack(ack.clone()));
        }
    }

    struct MapResolver(HashMap<(Exchange, String), String>);

    impl SymbolResolver for MapResolver {
        fn lookup(&self, exchange: Exchange, token_or_symbol: &str) -> Option<String> {
            self.0.get(&(exchange, token_or_symbol.to_string())).cloned()
        }
    }

    // ── Helpers ──────────────────────────────────────────────────────────

    fn credentials() -> SessionCredentials {
        SessionCredentials::new("U1", "A1", "api-key", "sus-token")
    }

    fn options(max_attempts: u32) -> ConnectOptions {
        ConnectOptions {
            reconnect_max_attempts: max_attempts,
            ..ConnectOptions::default()
        }
    }

    fn stream_with(connector: Arc<MockConnector>) -> IntegrateStream {
        IntegrateStream::builder(credentials())
            .connector(connector)
            .build()
    }

    fn key(token: &str) -> SubscriptionKey {
        SubscriptionKey::new(Exchange::Nse, token)
    }

    async fn next_frame(peer: &mut TransportPeer) -> Value {
        match peer.outbound.recv().await {
            Some(Outbound::Text(text)) => serde_json::from_str(&text).unwrap(),
            other => panic!("expected text frame, got {:?}", other),
        }
    }

    fn inject(peer: &TransportPeer, frame: Value) {
        peer.events
            .send(TransportEvent::Message(frame.to_string()))
            .unwrap();
    }

    fn login_frame() -> Value {
        json!({"t": "c", "uid": "U1", "actid": "A1", "source": "TRTP", "susertoken": "sus-token"})
    }

    async fn expect(events: &mut mpsc::UnboundedReceiver<Ev>, expected: &[Ev]) {
        for want in expected {
            let got = events.recv().await.expect("event stream ended");
            assert_eq!(&got, want);
        }
    }

    /// Close from the handle and let the peer complete the handshake.
    async fn close_session(handle: &StreamHandle, peer: &mut TransportPeer) {
        handle.close(1000, "bye");
        match peer.outbound.recv().await {
            Some(Outbound::Close { code, reason }) => {
                peer.events
                    .send(TransportEvent::Closed {
                        code,
                        reason,
                        clean: true,
                    })
                    .unwrap();
            }
            other => panic!("expected close, got {:?}", other),
        }
    }

    // ── Lifecycle ────────────────────────────────────────────────────────

    #[tokio::test(start_paused = true)]
    async fn test_login_first_then_subscribe_from_on_login() {
        let (connector, mut peers) = MockConnector::new(&[true]);
        let stream = stream_with(connector.clone());
        let handle = stream.handle();
        let (mut recorder, mut events) = Recorder::new();
        recorder.subscribe_on_login = vec![key("11536")];
        let task = tokio::spawn(stream.run(ConnectOptions::default(), recorder));

        let mut peer = peers.recv().await.unwrap();
        assert_eq!(next_frame(&mut peer).await, login_frame());
        expect(&mut events, &[Ev::Connect]).await;
        assert_eq!(handle.state(), ConnectionState::LoggingIn);

        inject(&peer, json!({"t": "ck", "s": "OK", "uid": "U1"}));
        assert_eq!(next_frame(&mut peer).await, json!({"t": "t", "k": "NSE|11536"}));
        expect(
            &mut events,
            &[
                Ev::Ack(json!({"t": "ck", "s": "OK", "uid": "U1"})),
                Ev::Open,
                Ev::Login,
            ],
        )
        .await;
        assert!(handle.is_logged_in());

        inject(&peer, json!({"t": "tf", "tk": "11536", "lp": "3500.05"}));
        inject(&peer, json!({"t": "om", "norenordno": "42"}));
        inject(&peer, json!({"t": "df", "tk": "11536", "bp1": "3500.00"}));
        inject(&peer, json!({"t": "tk", "tk": "11536"}));
        expect(
            &mut events,
            &[
                Ev::Tick(json!({"t": "tf", "tk": "11536", "lp": "3500.05"})),
                Ev::Order(json!({"t": "om", "norenordno": "42"})),
                Ev::Depth(json!({"t": "df", "tk": "11536", "bp1": "3500.00"})),
                Ev::Ack(json!({"t": "tk", "tk": "11536"})),
            ],
        )
        .await;

        close_session(&handle, &mut peer).await;
        expect(&mut events, &[Ev::Close(1000, "bye".into())]).await;
        task.await.unwrap().unwrap();
        assert_eq!(handle.state(), ConnectionState::Disconnected);
        assert_eq!(connector.attempts(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_reconnect_relogs_in_and_replays_registry() {
        let (connector, mut peers) = MockConnector::new(&[true, true]);
        let stream = stream_with(connector.clone());
        let handle = stream.handle();
        let (recorder, mut events) = Recorder::new();
        let task = tokio::spawn(stream.run(ConnectOptions::default(), recorder));

        let mut peer = peers.recv().await.unwrap();
        assert_eq!(next_frame(&mut peer).await, login_frame());
        inject(&peer, json!({"t": "ck", "s": "OK"}));
        expect(&mut events, &[Ev::Connect, Ev::Ack(json!({"t": "ck", "s": "OK"})), Ev::Open, Ev::Login]).await;

        handle.subscribe(SubscriptionKind::Tick, &[key("11536")]).unwrap();
        handle.subscribe(SubscriptionKind::Tick, &[key("11536")]).unwrap();
        assert_eq!(next_frame(&mut peer).await, json!({"t": "t", "k": "NSE|11536"}));
        assert_eq!(next_frame(&mut peer).await, json!({"t": "t", "k": "NSE|11536"}));

        peer.events
            .send(TransportEvent::Closed {
                code: 1006,
                reason: "Connection lost".into(),
                clean: false,
            })
            .unwrap();
        expect(
            &mut events,
            &[
                Ev::Error(1006, "Connection lost".into()),
                Ev::Close(1006, "Connection lost".into()),
                Ev::Reconnection(1),
            ],
        )
        .await;
        assert!(!handle.is_connected());

        // Backoff elapses on the paused clock.
        let mut peer = peers.recv().await.unwrap();
        assert_eq!(next_frame(&mut peer).await, login_frame());
        inject(&peer, json!({"t": "ck", "s": "OK"}));
        assert_eq!(next_frame(&mut peer).await, json!({"t": "t", "k": "NSE|11536"}));
        expect(&mut events, &[Ev::Connect, Ev::Ack(json!({"t": "ck", "s": "OK"})), Ev::Open, Ev::Login]).await;

        close_session(&handle, &mut peer).await;
        task.await.unwrap().unwrap();
        assert!(peer.outbound.recv().await.is_none());
        assert_eq!(connector.attempts(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_subscribe_before_login_is_replayed_once() {
        let (connector, mut peers) = MockConnector::new(&[true]);
        let stream = stream_with(connector);
        let handle = stream.handle();
        handle.subscribe(SubscriptionKind::Depth, &[key("22")]).unwrap();
        handle.subscribe(SubscriptionKind::Order, &[]).unwrap();

        let (recorder, mut events) = Recorder::new();
        let task = tokio::spawn(stream.run(ConnectOptions::default(), recorder));

        let mut peer = peers.recv().await.unwrap();
        assert_eq!(next_frame(&mut peer).await, login_frame());
        expect(&mut events, &[Ev::Connect]).await;
        inject(&peer, json!({"t": "ck", "s": "OK"}));
        assert_eq!(next_frame(&mut peer).await, json!({"t": "o", "actid": "A1"}));
        assert_eq!(next_frame(&mut peer).await, json!({"t": "d", "k": "NSE|22"}));
        expect(&mut events, &[Ev::Ack(json!({"t": "ck", "s": "OK"})), Ev::Open, Ev::Login]).await;

        handle.resubscribe().unwrap();
        assert_eq!(next_frame(&mut peer).await, json!({"t": "o", "actid": "A1"}));
        assert_eq!(next_frame(&mut peer).await, json!({"t": "d", "k": "NSE|22"}));

        close_session(&handle, &mut peer).await;
        task.await.unwrap().unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_unsubscribe_sends_removed_tokens_only() {
        let (connector, mut peers) = MockConnector::new(&[true]);
        let stream = stream_with(connector);
        let handle = stream.handle();
        let (recorder, mut events) = Recorder::new();
        let task = tokio::spawn(stream.run(ConnectOptions::default(), recorder));

        let mut peer = peers.recv().await.unwrap();
        next_frame(&mut peer).await;
        inject(&peer, json!({"t": "ck", "s": "OK"}));
        expect(&mut events, &[Ev::Connect, Ev::Ack(json!({"t": "ck", "s": "OK"})), Ev::Open, Ev::Login]).await;

        handle.subscribe(SubscriptionKind::Tick, &[key("1"), key("2")]).unwrap();
        handle.unsubscribe(SubscriptionKind::Tick, &[key("1")]).unwrap();
        assert_eq!(next_frame(&mut peer).await, json!({"t": "t", "k": "NSE|1#NSE|2"}));
        assert_eq!(next_frame(&mut peer).await, json!({"t": "u", "k": "NSE|1"}));
        assert_eq!(handle.subscriptions().ticks, vec![key("2")]);

        close_session(&handle, &mut peer).await;
        task.await.unwrap().unwrap();
    }

    // ── Dispatch errors ──────────────────────────────────────────────────

    #[tokio::test(start_paused = true)]
    async fn test_login_rejected_keeps_connection_open() {
        let (connector, mut peers) = MockConnector::new(&[true]);
        let stream = stream_with(connector);
        let handle = stream.handle();
        let (mut recorder, mut events) = Recorder::new();
        recorder.subscribe_on_login = vec![key("1")];
        let task = tokio::spawn(stream.run(ConnectOptions::default(), recorder));

        let mut peer = peers.recv().await.unwrap();
        next_frame(&mut peer).await;
        inject(&peer, json!({"t": "ck", "s": "NOT_OK"}));
        expect(&mut events, &[Ev::Connect, Ev::Ack(json!({"t": "ck", "s": "NOT_OK"}))]).await;
        match events.recv().await.unwrap() {
            Ev::Exception(msg) => assert!(msg.contains("NOT_OK"), "{}", msg),
            other => panic!("expected exception, got {:?}", other),
        }
        assert_eq!(handle.state(), ConnectionState::LoggingIn);
        assert!(handle.is_connected());

        close_session(&handle, &mut peer).await;
        expect(&mut events, &[Ev::Close(1000, "bye".into())]).await;
        task.await.unwrap().unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_bad_frames_go_to_on_exception() {
        let (connector, mut peers) = MockConnector::new(&[true]);
        let stream = stream_with(connector);
        let handle = stream.handle();
        let (recorder, mut events) = Recorder::new();
        let task = tokio::spawn(stream.run(ConnectOptions::default(), recorder));

        let mut peer = peers.recv().await.unwrap();
        next_frame(&mut peer).await;
        expect(&mut events, &[Ev::Connect]).await;

        peer.events.send(TransportEvent::Message("garbage".into())).unwrap();
        inject(&peer, json!({"t": "zz"}));
        inject(&peer, json!({"t": "tf", "lp": "1"}));

        assert!(matches!(events.recv().await.unwrap(), Ev::Exception(m) if m.contains("Malformed")));
        assert!(matches!(events.recv().await.unwrap(), Ev::Exception(m) if m.contains("zz")));
        expect(&mut events, &[Ev::Tick(json!({"t": "tf", "lp": "1"}))]).await;

        close_session(&handle, &mut peer).await;
        task.await.unwrap().unwrap();
    }

    // ── Reconnection policy ──────────────────────────────────────────────

    #[tokio::test(start_paused = true)]
    async fn test_max_attempts_then_stop_reconnection_once() {
        let (connector, _peers) = MockConnector::new(&[]);
        let stream = stream_with(connector.clone());
        let (recorder, mut events) = Recorder::new();

        let started = tokio::time::Instant::now();
        stream.run(options(3), recorder).await.unwrap();
        let elapsed = started.elapsed();

        let refused = || Ev::Error(1006, "Connection failed: connection refused".into());
        expect(
            &mut events,
            &[
                refused(),
                Ev::Reconnection(1),
                refused(),
                Ev::Reconnection(2),
                refused(),
                Ev::Reconnection(3),
                refused(),
                Ev::StopReconnection,
            ],
        )
        .await;
        assert!(events.try_recv().is_err());
        assert_eq!(connector.attempts(), 4);
        // 5s + 10s + 20s of backoff
        assert!(elapsed >= Duration::from_secs(35), "{:?}", elapsed);
        assert!(elapsed < Duration::from_secs(36), "{:?}", elapsed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_retry_cancels_without_stop_reconnection() {
        let (connector, _peers) = MockConnector::new(&[]);
        let stream = stream_with(connector.clone());
        let (mut recorder, mut events) = Recorder::new();
        recorder.stop_retry_on_reconnection = true;

        stream.run(options(30), recorder).await.unwrap();

        expect(
            &mut events,
            &[
                Ev::Error(1006, "Connection failed: connection refused".into()),
                Ev::Reconnection(1),
            ],
        )
        .await;
        assert!(events.try_recv().is_err());
        assert_eq!(connector.attempts(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_reconnect_disabled() {
        let (connector, _peers) = MockConnector::new(&[]);
        let stream = stream_with(connector.clone());
        let (recorder, mut events) = Recorder::new();
        let opts = ConnectOptions {
            reconnect: false,
            ..ConnectOptions::default()
        };

        stream.run(opts, recorder).await.unwrap();

        assert!(matches!(events.recv().await.unwrap(), Ev::Error(1006, _)));
        assert!(events.try_recv().is_err());
        assert_eq!(connector.attempts(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_retry_keeps_open_connection() {
        let (connector, mut peers) = MockConnector::new(&[true, true]);
        let stream = stream_with(connector.clone());
        let handle = stream.handle();
        let (recorder, mut events) = Recorder::new();
        let task = tokio::spawn(stream.run(ConnectOptions::default(), recorder));

        let mut peer = peers.recv().await.unwrap();
        next_frame(&mut peer).await;
        inject(&peer, json!({"t": "ck", "s": "OK"}));
        expect(&mut events, &[Ev::Connect, Ev::Ack(json!({"t": "ck", "s": "OK"})), Ev::Open, Ev::Login]).await;

        handle.stop_retry();
        inject(&peer, json!({"t": "tf", "lp": "2"}));
        expect(&mut events, &[Ev::Tick(json!({"t": "tf", "lp": "2"}))]).await;
        assert!(handle.is_logged_in());

        peer.events
            .send(TransportEvent::Closed {
                code: 1006,
                reason: "Auto ping timeout".into(),
                clean: false,
            })
            .unwrap();
        task.await.unwrap().unwrap();
        expect(
            &mut events,
            &[
                Ev::Error(1006, "Auto ping timeout".into()),
                Ev::Close(1006, "Auto ping timeout".into()),
            ],
        )
        .await;
        assert!(events.try_recv().is_err());
        assert_eq!(connector.attempts(), 1);
    }

    // ── Close / stop ─────────────────────────────────────────────────────

    #[tokio::test(start_paused = true)]
    async fn test_close_is_idempotent() {
        let (connector, mut peers) = MockConnector::new(&[true]);
        let stream = stream_with(connector);
        let handle = stream.handle();
        let (recorder, mut events) = Recorder::new();
        let task = tokio::spawn(stream.run(ConnectOptions::default(), recorder));

        let mut peer = peers.recv().await.unwrap();
        next_frame(&mut peer).await;
        expect(&mut events, &[Ev::Connect]).await;

        handle.close(1000, "first");
        handle.close(1000, "second");
        assert_eq!(
            peer.outbound.recv().await,
            Some(Outbound::Close {
                code: 1000,
                reason: "first".into()
            })
        );
        assert_eq!(handle.state(), ConnectionState::Closing);
        peer.events
            .send(TransportEvent::Closed {
                code: 1000,
                reason: "first".into(),
                clean: true,
            })
            .unwrap();
        task.await.unwrap().unwrap();
        assert!(peer.outbound.recv().await.is_none());
        expect(&mut events, &[Ev::Close(1000, "first".into())]).await;

        // Closing an ended session is a no-op.
        handle.close(1000, "again");
    }

    #[tokio::test(start_paused = true)]
    async fn test_close_during_backoff_exits() {
        let (connector, _peers) = MockConnector::new(&[]);
        let stream = stream_with(connector.clone());
        let handle = stream.handle();
        let (recorder, mut events) = Recorder::new();
        let task = tokio::spawn(stream.run(options(30), recorder));

        expect(
            &mut events,
            &[
                Ev::Error(1006, "Connection failed: connection refused".into()),
                Ev::Reconnection(1),
            ],
        )
        .await;
        handle.close_on_exception("giving up");
        task.await.unwrap().unwrap();
        assert_eq!(connector.attempts(), 1);
    }

    #[tokio::test]
    async fn test_stop_rejects_later_calls() {
        let (connector, _peers) = MockConnector::new(&[]);
        let stream = stream_with(connector.clone());
        let handle = stream.handle();

        handle.stop();
        assert!(handle.is_stopped());
        assert!(matches!(
            handle.subscribe(SubscriptionKind::Tick, &[key("1")]),
            Err(SdkError::Ws(WsError::SessionStopped))
        ));
        assert!(matches!(handle.resubscribe(), Err(SdkError::Ws(WsError::SessionStopped))));

        let (recorder, _events) = Recorder::new();
        assert!(matches!(
            stream.run(ConnectOptions::default(), recorder).await,
            Err(SdkError::Ws(WsError::SessionStopped))
        ));
        assert!(matches!(
            stream.connect(ConnectOptions::default(), Recorder::default()),
            Err(SdkError::Ws(WsError::SessionStopped))
        ));
        assert_eq!(connector.attempts(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_fresh_run_after_exhaustion_replays_registry() {
        let (connector, mut peers) = MockConnector::new(&[false, false, true]);
        let stream = stream_with(connector.clone());
        let handle = stream.handle();
        handle.subscribe(SubscriptionKind::Tick, &[key("11536")]).unwrap();

        let (recorder, mut events) = Recorder::new();
        stream.run(options(1), recorder).await.unwrap();
        let refused = || Ev::Error(1006, "Connection failed: connection refused".into());
        expect(
            &mut events,
            &[refused(), Ev::Reconnection(1), refused(), Ev::StopReconnection],
        )
        .await;
        assert_eq!(handle.state(), ConnectionState::Disconnected);
        assert!(!handle.is_stopped());

        // Recorded while idle; the stale close is discarded by the next run.
        handle.subscribe(SubscriptionKind::Tick, &[key("22")]).unwrap();
        handle.close(1000, "stale");

        let (recorder, mut events) = Recorder::new();
        let task = tokio::spawn(stream.run(ConnectOptions::default(), recorder));
        let mut peer = peers.recv().await.unwrap();
        assert_eq!(next_frame(&mut peer).await, login_frame());
        inject(&peer, json!({"t": "ck", "s": "OK"}));
        assert_eq!(
            next_frame(&mut peer).await,
            json!({"t": "t", "k": "NSE|11536#NSE|22"})
        );
        expect(&mut events, &[Ev::Connect, Ev::Ack(json!({"t": "ck", "s": "OK"})), Ev::Open, Ev::Login]).await;

        assert!(matches!(
            stream.run(ConnectOptions::default(), Recorder::default()).await,
            Err(SdkError::Ws(WsError::AlreadyRunning))
        ));

        close_session(&handle, &mut peer).await;
        task.await.unwrap().unwrap();
        assert_eq!(connector.attempts(), 3);
    }

    #[tokio::test]
    async fn test_concurrent_subscribes_send_growing_snapshots() {
        const PER_THREAD: usize = 300;

        let (connector, mut peers) = MockConnector::new(&[true]);
        let stream = stream_with(connector);
        let handle = stream.handle();
        let (recorder, mut events) = Recorder::new();
        let task = tokio::spawn(stream.run(ConnectOptions::default(), recorder));

        let mut peer = peers.recv().await.unwrap();
        next_frame(&mut peer).await;
        inject(&peer, json!({"t": "ck", "s": "OK"}));
        expect(&mut events, &[Ev::Connect, Ev::Ack(json!({"t": "ck", "s": "OK"})), Ev::Open, Ev::Login]).await;

        let workers: Vec<_> = (0..2)
            .map(|worker| {
                let handle = handle.clone();
                std::thread::spawn(move || {
                    for i in 0..PER_THREAD {
                        let token = format!("{}{:04}", worker, i);
                        handle.subscribe(SubscriptionKind::Tick, &[key(&token)]).unwrap();
                    }
                })
            })
            .collect();
        for worker in workers {
            worker.join().unwrap();
        }

        // Each frame is the full tick set, one key larger than the last.
        for expected in 1..=2 * PER_THREAD {
            let frame = next_frame(&mut peer).await;
            let keys = frame["k"].as_str().unwrap().split('#').count();
            assert_eq!(keys, expected);
        }

        close_session(&handle, &mut peer).await;
        task.await.unwrap().unwrap();
    }

    // ── Validation ───────────────────────────────────────────────────────

    #[test]
    fn test_validation_errors_are_synchronous() {
        let (connector, _peers) = MockConnector::new(&[]);
        let stream = stream_with(connector);
        let handle = stream.handle();

        assert!(matches!(
            handle.subscribe_raw("TICK", &[("XYZ", "1")]),
            Err(SdkError::Validation(ValidationError::InvalidExchange(e))) if e == "XYZ"
        ));
        assert!(matches!(
            handle.subscribe_raw("QUOTE", &[("NSE", "1")]),
            Err(SdkError::Validation(ValidationError::InvalidSubscriptionKind(_)))
        ));
        assert!(matches!(
            handle.unsubscribe(SubscriptionKind::Depth, &[key("9")]),
            Err(SdkError::Validation(ValidationError::NotSubscribed(_)))
        ));
        assert!(matches!(
            handle.subscribe(SubscriptionKind::Tick, &[]),
            Err(SdkError::Validation(ValidationError::MissingTokens(_)))
        ));
        assert_eq!(handle.subscriptions(), SubscriptionSnapshot::default());

        handle.subscribe_raw("tick", &[("NSE", "11536")]).unwrap();
        handle.unsubscribe_raw("TICK", &[("NSE", "11536")]).unwrap();
        assert!(handle.subscriptions().ticks.is_empty());
    }

    #[test]
    fn test_resolver_validates_and_resolves_tokens() {
        let mut map = HashMap::new();
        map.insert((Exchange::Nse, "11536".to_string()), "11536".to_string());
        map.insert((Exchange::Nse, "TCS-EQ".to_string()), "11536".to_string());
        let (connector, _peers) = MockConnector::new(&[]);
        let stream = IntegrateStream::builder(credentials())
            .connector(connector)
            .resolver(Arc::new(MapResolver(map)))
            .build();
        let handle = stream.handle();

        assert!(matches!(
            handle.subscribe(SubscriptionKind::Tick, &[key("11536"), key("404")]),
            Err(SdkError::Validation(ValidationError::TokenNotFound { token, .. })) if token == "404"
        ));
        assert!(handle.subscriptions().ticks.is_empty());

        handle.subscribe(SubscriptionKind::Tick, &[key("TCS-EQ")]).unwrap();
        assert_eq!(handle.subscriptions().ticks, vec![key("11536")]);
    }

    // ── Blocking / background modes ──────────────────────────────────────

    #[test]
    fn test_blocking_connect_returns_when_session_ends() {
        let (connector, _peers) = MockConnector::new(&[]);
        let stream = stream_with(connector.clone());
        let (recorder, mut events) = Recorder::new();
        let opts = ConnectOptions {
            reconnect: false,
            ..ConnectOptions::default()
        };

        let thread = stream.connect(opts, recorder).unwrap();
        assert!(thread.is_none());
        assert!(matches!(events.try_recv(), Ok(Ev::Error(1006, _))));
        assert_eq!(connector.attempts(), 1);
    }

    #[test]
    fn test_background_connect_runs_on_named_thread() {
        struct ThreadName(std::sync::mpsc::Sender<Option<String>>);

        impl StreamHandler for ThreadName {
            fn on_error(&mut self, _: &StreamHandle, _: u16, _: &str) {
                let name = std::thread::current().name().map(str::to_string);
                let _ = self.0.send(name);
            }
        }

        let (connector, _peers) = MockConnector::new(&[]);
        let stream = stream_with(connector);
        let (tx, rx) = std::sync::mpsc::channel();
        let opts = ConnectOptions {
            run_in_background: true,
            reconnect: false,
            ..ConnectOptions::default()
        };

        let thread = stream.connect(opts, ThreadName(tx)).unwrap().unwrap();
        thread.join().unwrap();
        assert_eq!(rx.recv().unwrap().as_deref(), Some(THREAD_NAME));
    }
}
