//! Reconnecting WebSocket client with per-venue keep-alive.
//!
//! The keep-alive protocol differs between venues: Binance uses WebSocket
//! protocol frames (the server pings, we answer with a pong frame), while
//! OKX expects a text "ping" from the client and answers with a text
//! "pong". Both paths are handled here so the venue codecs never see
//! heartbeat traffic.

use std::time::Duration;

use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use rand::Rng;
use thiserror::Error;
use tokio::net::TcpStream;
use tokio::time::{interval, timeout, Instant, Interval};
use tokio_tungstenite::tungstenite::protocol::Message;
use tokio_tungstenite::tungstenite::Error as TungsteniteError;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, warn};

use vigil_common::config::BackoffConfig;

/// Errors surfaced by the WebSocket layer.
#[derive(Debug, Error)]
pub enum WsError {
    #[error("connection failed: {0}")]
    Connection(String),

    #[error("connect timed out")]
    ConnectTimeout,

    #[error("pong not received within timeout")]
    PongTimeout,

    #[error("stream ended unexpectedly")]
    StreamEnded,

    #[error("closed by server: {0}")]
    ClosedByServer(String),

    #[error("websocket error: {0}")]
    Protocol(#[from] TungsteniteError),
}

/// Keep-alive protocol variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeepAlive {
    /// WebSocket Ping/Pong frames. The server pings; we also ping on our
    /// own interval and expect a pong frame back.
    ProtocolFrames,
    /// Text "ping"/"pong" messages originated by the client.
    TextPingPong,
}

/// Connection parameters for one venue socket.
#[derive(Debug, Clone)]
pub struct WsConfig {
    pub url: String,
    pub connect_timeout: Duration,
    pub ping_interval: Duration,
    pub pong_timeout: Duration,
    pub keep_alive: KeepAlive,
}

/// A payload event from the socket, heartbeats already stripped.
#[derive(Debug)]
pub enum WsEvent {
    /// A text frame for the venue codec.
    Text(String),
}

type WsSink = SplitSink<WebSocketStream<MaybeTlsStream<TcpStream>>, Message>;
type WsSource = SplitStream<WebSocketStream<MaybeTlsStream<TcpStream>>>;

/// One live WebSocket connection.
pub struct WsConnection {
    write: WsSink,
    read: WsSource,
    keep_alive: KeepAlive,
    ping_timer: Interval,
    pong_timeout: Duration,
    /// Set when a ping is outstanding; cleared by the matching pong.
    awaiting_pong_since: Option<Instant>,
}

impl WsConnection {
    /// Open a connection and send the given subscribe messages.
    pub async fn open(config: &WsConfig, subscribe: &[String]) -> Result<Self, WsError> {
        let connect = timeout(config.connect_timeout, connect_async(&config.url)).await;
        let (stream, _response) = match connect {
            Ok(Ok(pair)) => pair,
            Ok(Err(e)) => return Err(WsError::Connection(e.to_string())),
            Err(_) => return Err(WsError::ConnectTimeout),
        };

        let (mut write, read) = stream.split();

        for message in subscribe {
            write.send(Message::Text(message.clone().into())).await?;
        }

        let mut ping_timer = interval(config.ping_interval);
        // First tick fires immediately; skip it so we do not ping on connect.
        ping_timer.reset();

        Ok(Self {
            write,
            read,
            keep_alive: config.keep_alive,
            ping_timer,
            pong_timeout: config.pong_timeout,
            awaiting_pong_since: None,
        })
    }

    /// Send a text message.
    pub async fn send_text(&mut self, text: &str) -> Result<(), WsError> {
        self.write.send(Message::Text(text.to_string().into())).await?;
        Ok(())
    }

    /// Receive the next payload event, transparently handling heartbeats.
    ///
    /// Returns an error on close, stream end, protocol failure, or a pong
    /// timeout; the caller reconnects on any error.
    pub async fn next_event(&mut self) -> Result<WsEvent, WsError> {
        loop {
            let pong_deadline = self
                .awaiting_pong_since
                .map(|since| since + self.pong_timeout);

            tokio::select! {
                frame = self.read.next() => {
                    match frame {
                        Some(Ok(Message::Text(text))) => {
                            let text: &str = &text;
                            if self.keep_alive == KeepAlive::TextPingPong {
                                if text == "pong" {
                                    debug!("Received text pong");
                                    self.awaiting_pong_since = None;
                                    continue;
                                }
                                if text == "ping" {
                                    self.write.send(Message::Text("pong".to_string().into())).await?;
                                    continue;
                                }
                            }
                            return Ok(WsEvent::Text(text.to_string()));
                        }
                        Some(Ok(Message::Ping(data))) => {
                            debug!("Received ping frame, sending pong");
                            self.write.send(Message::Pong(data)).await?;
                        }
                        Some(Ok(Message::Pong(_))) => {
                            debug!("Received pong frame");
                            self.awaiting_pong_since = None;
                        }
                        Some(Ok(Message::Close(frame))) => {
                            let reason = frame
                                .map(|f| f.reason.to_string())
                                .unwrap_or_else(|| "no reason".to_string());
                            return Err(WsError::ClosedByServer(reason));
                        }
                        Some(Ok(_)) => {
                            // Binary and raw frames are not used by either venue.
                        }
                        Some(Err(e)) => return Err(WsError::Protocol(e)),
                        None => return Err(WsError::StreamEnded),
                    }
                }

                _ = self.ping_timer.tick() => {
                    if self.awaiting_pong_since.is_none() {
                        match self.keep_alive {
                            KeepAlive::ProtocolFrames => {
                                self.write.send(Message::Ping(Vec::new().into())).await?;
                            }
                            KeepAlive::TextPingPong => {
                                self.write.send(Message::Text("ping".to_string().into())).await?;
                            }
                        }
                        self.awaiting_pong_since = Some(Instant::now());
                    }
                }

                _ = async {
                    match pong_deadline {
                        Some(deadline) => tokio::time::sleep_until(deadline).await,
                        None => std::future::pending().await,
                    }
                } => {
                    warn!("Pong timeout after {:?}", self.pong_timeout);
                    return Err(WsError::PongTimeout);
                }
            }
        }
    }

    /// Close the socket gracefully.
    pub async fn close(&mut self) {
        let _ = self.write.send(Message::Close(None)).await;
    }
}

/// Exponential reconnection backoff with jitter.
#[derive(Debug)]
pub struct Backoff {
    config: BackoffConfig,
    attempt: u32,
}

impl Backoff {
    pub fn new(config: BackoffConfig) -> Self {
        Self { config, attempt: 0 }
    }

    /// Delay before the next attempt, with +/-20% jitter. Increments the
    /// attempt counter.
    pub fn next_delay(&mut self) -> Duration {
        let base = self.config.initial_delay.as_millis() as u64;
        let exp = base.saturating_mul(1u64 << self.attempt.min(20));
        let capped = exp.min(self.config.max_delay.as_millis() as u64).max(1);

        let jitter = rand::thread_rng().gen_range(0.8..1.2);
        let with_jitter = ((capped as f64) * jitter) as u64;

        self.attempt = self.attempt.saturating_add(1);
        Duration::from_millis(with_jitter.max(1))
    }

    /// True once the configured attempt budget is spent.
    pub fn exhausted(&self) -> bool {
        self.attempt >= self.config.max_attempts
    }

    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    /// Reset after a successful connection.
    pub fn reset(&mut self) {
        self.attempt = 0;
    }
}
