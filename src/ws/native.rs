//! Native transport: `tokio-tungstenite` over `native-tls`.
//!
//! - Direct TCP or an HTTP CONNECT proxy
//! - TLS verification can be switched off for test endpoints
//! - Spawned I/O task per connection with WS-level ping/pong health check
//! - Close handshake bounded by `close_timeout`

use std::time::Duration;

use futures_util::future::BoxFuture;
use futures_util::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::WebSocketStream;
use url::Url;

use crate::error::WsError;
use crate::ws::transport::{Connection, Connector, Outbound, TransportEvent, TransportPeer};
use crate::ws::ConnectOptions;

const MAX_PROXY_RESPONSE: usize = 8 * 1024;

/// Default [`Connector`] for native targets.
#[derive(Debug, Clone, Default)]
pub struct NativeConnector;

impl Connector for NativeConnector {
    fn connect<'a>(
        &'a self,
        options: &'a ConnectOptions,
    ) -> BoxFuture<'a, Result<Connection, WsError>> {
        Box::pin(async move {
            let ws = tokio::time::timeout(options.connect_timeout, handshake(options))
                .await
                .map_err(|_| WsError::ConnectTimeout(options.connect_timeout))??;

            let (conn, peer) = Connection::channel();
            tokio::spawn(run_io(
                ws,
                peer,
                options.ping_interval,
                options.ping_timeout,
                options.close_timeout,
            ));
            Ok(conn)
        })
    }
}

// ─── Handshake ───────────────────────────────────────────────────────────────

async fn handshake(
    options: &ConnectOptions,
) -> Result<WebSocketStream<tokio_tungstenite::MaybeTlsStream<TcpStream>>, WsError> {
    let url = Url::parse(&options.server_url)
        .map_err(|e| WsError::ConnectionFailed(format!("invalid url: {}", e)))?;
    let host = url
        .host_str()
        .ok_or_else(|| WsError::ConnectionFailed("url has no host".into()))?
        .to_string();
    let port = url
        .port_or_known_default()
        .ok_or_else(|| WsError::ConnectionFailed("url has no port".into()))?;

    let tcp = match &options.proxy {
        Some(proxy) => connect_via_proxy(proxy, &host, port).await?,
        None => TcpStream::connect((host.as_str(), port))
            .await
            .map_err(|e| WsError::ConnectionFailed(e.to_string()))?,
    };
    tcp.set_nodelay(true).ok();

    let tls = native_tls::TlsConnector::builder()
        .danger_accept_invalid_certs(!options.tls_verify)
        .danger_accept_invalid_hostnames(!options.tls_verify)
        .build()
        .map_err(|e| WsError::ConnectionFailed(format!("tls: {}", e)))?;

    let (ws, _response) = tokio_tungstenite::client_async_tls_with_config(
        url.as_str(),
        tcp,
        None,
        Some(tokio_tungstenite::Connector::NativeTls(tls)),
    )
    .await
    .map_err(|e| WsError::ConnectionFailed(e.to_string()))?;

    tracing::debug!(url = %url, "WebSocket handshake complete");
    Ok(ws)
}

/// Open a tunnel to `host:port` through an HTTP CONNECT proxy.
async fn connect_via_proxy(proxy: &str, host: &str, port: u16) -> Result<TcpStream, WsError> {
    let proxy_url =
        Url::parse(proxy).map_err(|e| WsError::ConnectionFailed(format!("invalid proxy: {}", e)))?;
    let proxy_host = proxy_url
        .host_str()
        .ok_or_else(|| WsError::ConnectionFailed("proxy has no host".into()))?;
    let proxy_port = proxy_url.port_or_known_default().unwrap_or(8080);

    let mut stream = TcpStream::connect((proxy_host, proxy_port))
        .await
        .map_err(|e| WsError::ConnectionFailed(format!("proxy: {}", e)))?;
    proxy_tunnel(&mut stream, host, port).await?;
    Ok(stream)
}

async fn proxy_tunnel<S>(stream: &mut S, host: &str, port: u16) -> Result<(), WsError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let target = format!("{}:{}", host, port);
    let request = format!(
        "CONNECT {target} HTTP/1.1\r\nHost: {target}\r\nProxy-Connection: Keep-Alive\r\n\r\n"
    );
    stream
        .write_all(request.as_bytes())
        .await
        .map_err(|e| WsError::ConnectionFailed(format!("proxy: {}", e)))?;

    // Read up to the end of the response head only; the tunnel starts right after.
    let mut head = Vec::with_capacity(256);
    let mut byte = [0u8; 1];
    while !head.ends_with(b"\r\n\r\n") {
        if head.len() >= MAX_PROXY_RESPONSE {
            return Err(WsError::ConnectionFailed("proxy response too large".into()));
        }
        let n = stream
            .read(&mut byte)
            .await
            .map_err(|e| WsError::ConnectionFailed(format!("proxy: {}", e)))?;
        if n == 0 {
            return Err(WsError::ConnectionFailed("proxy closed the connection".into()));
        }
        head.push(byte[0]);
    }

    let head = String::from_utf8_lossy(&head);
    let status_line = head.lines().next().unwrap_or_default();
    match status_line.split_whitespace().nth(1) {
        Some("200") => Ok(()),
        _ => Err(WsError::ConnectionFailed(format!(
            "proxy refused tunnel: {}",
            status_line
        ))),
    }
}

// ─── I/O task ────────────────────────────────────────────────────────────────

/// Owns the socket until it closes, then reports `Closed` exactly once.
async fn run_io<S>(
    ws: WebSocketStream<S>,
    mut peer: TransportPeer,
    ping_interval: Duration,
    ping_timeout: Duration,
    close_timeout: Duration,
) where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    let (mut sink, mut stream) = ws.split();

    // A zero interval turns auto-ping off.
    let mut ping = (!ping_interval.is_zero()).then(|| {
        let mut interval = tokio::time::interval(ping_interval);
        interval.reset(); // skip immediate first tick
        interval
    });

    let mut pong_deadline: Option<tokio::time::Instant> = None;
    let far_future = tokio::time::Instant::now() + Duration::from_secs(86400);
    let pong_sleep = tokio::time::sleep_until(far_future);
    tokio::pin!(pong_sleep);

    let (code, reason, clean) = loop {
        tokio::select! {
            // ── a) Incoming frame ────────────────────────────────────────
            msg = stream.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        let text_str: &str = text.as_ref();
                        let _ = peer.events.send(TransportEvent::Message(text_str.to_string()));
                    }
                    Some(Ok(Message::Binary(data))) => match String::from_utf8(data.to_vec()) {
                        Ok(text) => {
                            let _ = peer.events.send(TransportEvent::Message(text));
                        }
                        Err(_) => tracing::debug!("Ignoring non-UTF-8 binary frame"),
                    },
                    Some(Ok(Message::Ping(data))) => {
                        let _ = sink.send(Message::Pong(data)).await;
                    }
                    Some(Ok(Message::Pong(_))) => {
                        pong_deadline = None;
                        pong_sleep.as_mut().reset(far_future);
                    }
                    Some(Ok(Message::Close(frame))) => {
                        let (code, reason) = extract_close(frame.as_ref());
                        let _ = tokio::time::timeout(close_timeout, sink.close()).await;
                        break (code, reason, true);
                    }
                    Some(Ok(_)) => {} // raw Frame
                    Some(Err(e)) => break (1006, e.to_string(), false),
                    None => break (1006, "Connection lost".to_string(), false),
                }
            }

            // ── b) Frame from the session ────────────────────────────────
            out = peer.outbound.recv() => {
                match out {
                    Some(Outbound::Text(text)) => {
                        if let Err(e) = sink.send(Message::Text(text.into())).await {
                            break (1006, e.to_string(), false);
                        }
                    }
                    Some(Outbound::Close { code, reason }) => {
                        let _ = sink
                            .send(Message::Close(Some(CloseFrame {
                                code: CloseCode::from(code),
                                reason: reason.clone().into(),
                            })))
                            .await;
                        // Wait for the server's close frame.
                        let drain = async {
                            while let Some(Ok(msg)) = stream.next().await {
                                if matches!(msg, Message::Close(_)) {
                                    break;
                                }
                            }
                        };
                        if tokio::time::timeout(close_timeout, drain).await.is_err() {
                            tracing::debug!("Close handshake timed out");
                        }
                        break (code, reason, true);
                    }
                    None => {
                        // Session dropped the connection.
                        let _ = sink.close().await;
                        return;
                    }
                }
            }

            // ── c) Ping interval ─────────────────────────────────────────
            () = next_ping(&mut ping) => {
                if let Err(e) = sink.send(Message::Ping(Default::default())).await {
                    break (1006, e.to_string(), false);
                }
                if pong_deadline.is_none() {
                    let deadline = tokio::time::Instant::now() + ping_timeout;
                    pong_deadline = Some(deadline);
                    pong_sleep.as_mut().reset(deadline);
                }
            }

            // ── d) Pong timeout ──────────────────────────────────────────
            () = &mut pong_sleep, if pong_deadline.is_some() => {
                tracing::warn!("Pong timeout: no response within {:?}", ping_timeout);
                let _ = tokio::time::timeout(close_timeout, sink.close()).await;
                break (1006, "Auto ping timeout".to_string(), false);
            }
        }
    };

    let _ = peer.events.send(TransportEvent::Closed {
        code,
        reason,
        clean,
    });
}

async fn next_ping(ping: &mut Option<tokio::time::Interval>) {
    match ping {
        Some(interval) => {
            interval.tick().await;
        }
        None => std::future::pending().await,
    }
}

/// Extract close code and reason from an optional CloseFrame.
fn extract_close(frame: Option<&CloseFrame>) -> (u16, String) {
    match frame {
        Some(f) => (f.code.into(), f.reason.to_string()),
        None => (1005, "No status received".into()),
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────
