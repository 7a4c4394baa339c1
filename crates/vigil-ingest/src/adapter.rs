//! Per-venue adapter task.
//!
//! Owns the WebSocket connection, the venue codec, sequence/silence
//! tracking, and the REST fallback. Emits normalized events into a bounded
//! channel and publishes a health projection on a watch channel.
//!
//! Connection lifecycle: connecting -> connected/streaming; on failure ->
//! reconnecting with exponential backoff; after the attempt budget is
//! spent -> degraded (REST polling at the configured cadence) while
//! reconnection continues in the background. Every reconnection produces a
//! per-instrument GapMarker spanning (last message, first post-reconnect
//! message).

use std::collections::{HashMap, VecDeque};

use chrono::{DateTime, Utc};
use thiserror::Error;
use tokio::sync::{broadcast, mpsc, watch};
use tokio::time::interval;
use tracing::{debug, info, warn};

use vigil_common::config::{FeatureConfig, InstrumentConfig, VenueConfig};
use vigil_common::health::{ConnectionStatus, GapMarker, GapReason, HealthSnapshot};
use vigil_common::types::{OrderBookSnapshot, SnapshotSource, TickerSnapshot, Venue};

use crate::binance::BinanceCodec;
use crate::gap::SequenceTracker;
use crate::okx::OkxCodec;
use crate::rest::{RestClient, RestError};
use crate::ws::{Backoff, KeepAlive, WsConfig, WsConnection, WsError, WsEvent};

/// Errors that terminate or restart a venue adapter connection.
#[derive(Debug, Error)]
pub enum AdapterError {
    #[error(transparent)]
    Ws(#[from] WsError),

    #[error(transparent)]
    Rest(#[from] RestError),

    #[error("event channel closed")]
    ChannelClosed,
}

/// One normalized message parsed from a venue wire frame.
#[derive(Debug)]
pub enum VenueMessage {
    Book(OrderBookSnapshot),
    Ticker(TickerSnapshot),
}

/// Events emitted by an adapter onto the snapshot bus.
#[derive(Debug, Clone)]
pub enum AdapterEvent {
    Book(OrderBookSnapshot),
    Ticker(TickerSnapshot),
    Gap(GapMarker),
}

/// Venue codec dispatch.
pub enum Codec {
    Binance(BinanceCodec),
    Okx(OkxCodec),
}

impl Codec {
    fn ws_url(&self, base: &str) -> String {
        match self {
            Codec::Binance(codec) => codec.ws_url(base),
            Codec::Okx(codec) => codec.ws_url(base),
        }
    }

    fn subscribe_messages(&self) -> Vec<String> {
        match self {
            Codec::Binance(codec) => codec.subscribe_messages(),
            Codec::Okx(codec) => codec.subscribe_messages(),
        }
    }

    fn keep_alive(&self) -> KeepAlive {
        match self {
            Codec::Binance(codec) => codec.keep_alive(),
            Codec::Okx(codec) => codec.keep_alive(),
        }
    }

    fn parse(
        &mut self,
        text: &str,
        local_timestamp: DateTime<Utc>,
    ) -> Result<Option<VenueMessage>, crate::normalize::NormalizeError> {
        match self {
            Codec::Binance(codec) => codec.parse(text, local_timestamp),
            Codec::Okx(codec) => codec.parse(text, local_timestamp),
        }
    }

    async fn fetch_book(
        &self,
        rest: &RestClient,
        instrument_id: &str,
        local_timestamp: DateTime<Utc>,
    ) -> Result<Option<VenueMessage>, RestError> {
        match self {
            Codec::Binance(codec) => codec.fetch_book(rest, instrument_id, local_timestamp).await,
            Codec::Okx(codec) => codec.fetch_book(rest, instrument_id, local_timestamp).await,
        }
    }

    fn instrument_ids(&self) -> Vec<String> {
        match self {
            Codec::Binance(codec) => codec.instrument_ids(),
            Codec::Okx(codec) => codec.instrument_ids(),
        }
    }
}

/// A continuously supervised subscription to one venue.
pub struct VenueAdapter {
    config: VenueConfig,
    codec: Codec,
    tracker: SequenceTracker,
    rest: RestClient,
    events: mpsc::Sender<AdapterEvent>,
    health_tx: watch::Sender<HealthSnapshot>,

    status: ConnectionStatus,
    message_count: u64,
    reconnect_count: u32,
    /// Gap timestamps from the last hour, pruned on health publication.
    gap_times: VecDeque<DateTime<Utc>>,
    /// Instruments awaiting their first post-reconnect message, with the
    /// disconnect boundary (last message time, last sequence).
    pending_reconnect_gaps: HashMap<String, (DateTime<Utc>, u64)>,
}

impl VenueAdapter {
    /// Build an adapter for one venue over the enabled instruments.
    pub fn new(
        config: VenueConfig,
        instruments: &[&InstrumentConfig],
        features: &FeatureConfig,
        events: mpsc::Sender<AdapterEvent>,
    ) -> Result<(Self, watch::Receiver<HealthSnapshot>), AdapterError> {
        let codec = match config.venue {
            Venue::Binance => Codec::Binance(BinanceCodec::new(instruments)),
            Venue::Okx => Codec::Okx(OkxCodec::new(instruments)),
        };
        let rest = RestClient::new(config.rest_url.clone(), config.connect_timeout)?;
        let tracker = SequenceTracker::new(config.venue, features.silence_gap);

        let (health_tx, health_rx) = watch::channel(HealthSnapshot::disconnected(config.venue));

        Ok((
            Self {
                config,
                codec,
                tracker,
                rest,
                events,
                health_tx,
                status: ConnectionStatus::Disconnected,
                message_count: 0,
                reconnect_count: 0,
                gap_times: VecDeque::new(),
                pending_reconnect_gaps: HashMap::new(),
            },
            health_rx,
        ))
    }

    pub fn venue(&self) -> Venue {
        self.config.venue
    }

    /// Run until shutdown. Reconnects with backoff on any failure; enters
    /// degraded REST polling once the attempt budget is spent.
    pub async fn run(mut self, mut shutdown: broadcast::Receiver<()>) {
        let mut backoff = Backoff::new(self.config.backoff.clone());

        loop {
            if shutdown.try_recv().is_ok() {
                info!(venue = %self.venue(), "Adapter: shutdown before connect");
                break;
            }

            self.set_status(ConnectionStatus::Reconnecting);
            let connection = match self.open_connection().await {
                Ok(connection) => connection,
                Err(e) => {
                    warn!(venue = %self.venue(), error = %e, "Connect failed");
                    if backoff.exhausted() {
                        match self.run_degraded(&mut shutdown).await {
                            Ok(Some(connection)) => {
                                backoff.reset();
                                connection
                            }
                            Ok(None) => break,
                            Err(e) => {
                                warn!(venue = %self.venue(), error = %e, "Degraded loop failed");
                                break;
                            }
                        }
                    } else {
                        let delay = backoff.next_delay();
                        debug!(venue = %self.venue(), ?delay, "Reconnecting after backoff");
                        tokio::select! {
                            _ = tokio::time::sleep(delay) => continue,
                            _ = shutdown.recv() => break,
                        }
                    }
                }
            };

            backoff.reset();
            match self.run_connection(connection, &mut shutdown).await {
                Ok(()) => {
                    info!(venue = %self.venue(), "Adapter: clean shutdown");
                    break;
                }
                Err(AdapterError::ChannelClosed) => {
                    warn!(venue = %self.venue(), "Adapter: downstream closed, stopping");
                    break;
                }
                Err(e) => {
                    warn!(venue = %self.venue(), error = %e, "Stream failed, will reconnect");
                    self.note_disconnect();
                    self.reconnect_count += 1;
                }
            }
        }

        self.set_status(ConnectionStatus::Disconnected);
    }

    async fn open_connection(&self) -> Result<WsConnection, AdapterError> {
        let ws_config = WsConfig {
            url: self.codec.ws_url(&self.config.ws_url),
            connect_timeout: self.config.connect_timeout,
            ping_interval: self.config.ping_interval,
            pong_timeout: self.config.pong_timeout,
            keep_alive: self.codec.keep_alive(),
        };
        info!(venue = %self.venue(), url = %ws_config.url, "Connecting");
        let connection = WsConnection::open(&ws_config, &self.codec.subscribe_messages()).await?;
        Ok(connection)
    }

    /// Drive one WebSocket connection until error or shutdown.
    async fn run_connection(
        &mut self,
        mut connection: WsConnection,
        shutdown: &mut broadcast::Receiver<()>,
    ) -> Result<(), AdapterError> {
        info!(venue = %self.venue(), "Connected and subscribed");
        self.set_status(ConnectionStatus::Connected);

        let mut silence_timer = interval(std::time::Duration::from_secs(1));
        let mut health_timer = interval(std::time::Duration::from_secs(1));

        loop {
            tokio::select! {
                event = connection.next_event() => {
                    match event {
                        Ok(WsEvent::Text(text)) => self.handle_text(&text).await?,
                        Err(e) => {
                            connection.close().await;
                            return Err(e.into());
                        }
                    }
                }

                _ = silence_timer.tick() => {
                    let gaps = self.tracker.check_silence(Utc::now());
                    for gap in gaps {
                        self.emit_gap(gap).await?;
                    }
                }

                _ = health_timer.tick() => {
                    self.publish_health();
                }

                _ = shutdown.recv() => {
                    info!(venue = %self.venue(), "Adapter: shutdown signal received");
                    connection.close().await;
                    return Ok(());
                }
            }
        }
    }

    /// Degraded mode: REST polling at the configured cadence while retrying
    /// the socket in the background. Returns a fresh connection on success,
    /// None on shutdown.
    async fn run_degraded(
        &mut self,
        shutdown: &mut broadcast::Receiver<()>,
    ) -> Result<Option<WsConnection>, AdapterError> {
        warn!(
            venue = %self.venue(),
            "Reconnect budget exhausted, entering degraded REST polling"
        );
        self.set_status(ConnectionStatus::Degraded);

        let mut poll_timer = interval(self.config.rest_poll_interval);
        let mut retry_timer = interval(self.config.backoff.max_delay);
        // Consume the immediate first tick so the first retry waits.
        retry_timer.tick().await;
        let mut health_timer = interval(std::time::Duration::from_secs(1));

        loop {
            tokio::select! {
                _ = poll_timer.tick() => {
                    for instrument_id in self.codec.instrument_ids() {
                        match self.codec.fetch_book(&self.rest, &instrument_id, Utc::now()).await {
                            Ok(Some(message)) => self.handle_message(message).await?,
                            Ok(None) => {}
                            Err(e) => {
                                warn!(venue = %self.venue(), instrument = %instrument_id,
                                      error = %e, "REST poll failed");
                            }
                        }
                    }
                }

                _ = retry_timer.tick() => {
                    match self.open_connection().await {
                        Ok(connection) => {
                            info!(venue = %self.venue(), "Reconnected from degraded mode");
                            self.reconnect_count += 1;
                            return Ok(Some(connection));
                        }
                        Err(e) => {
                            debug!(venue = %self.venue(), error = %e, "Background reconnect failed");
                        }
                    }
                }

                _ = health_timer.tick() => {
                    self.publish_health();
                }

                _ = shutdown.recv() => {
                    info!(venue = %self.venue(), "Adapter: shutdown during degraded mode");
                    return Ok(None);
                }
            }
        }
    }

    /// Parse one frame; parse and validation failures are logged drops.
    async fn handle_text(&mut self, text: &str) -> Result<(), AdapterError> {
        let local_timestamp = Utc::now();
        match self.codec.parse(text, local_timestamp) {
            Ok(Some(message)) => self.handle_message(message).await,
            Ok(None) => Ok(()),
            Err(e) => {
                warn!(venue = %self.venue(), error = %e, "Dropping unparsable message");
                Ok(())
            }
        }
    }

    async fn handle_message(&mut self, message: VenueMessage) -> Result<(), AdapterError> {
        match message {
            VenueMessage::Book(snapshot) => {
                // First message after a reconnect closes the disconnect gap.
                if let Some((gap_start, seq_before)) =
                    self.pending_reconnect_gaps.remove(&snapshot.instrument)
                {
                    let gap = GapMarker::new(
                        self.venue(),
                        snapshot.instrument.clone(),
                        gap_start,
                        snapshot.local_timestamp,
                        GapReason::Disconnect,
                        Some(seq_before),
                        Some(snapshot.sequence_id),
                    );
                    self.emit_gap(gap).await?;
                }

                match snapshot.source {
                    SnapshotSource::Stream => {
                        let gap = self.tracker.observe(
                            &snapshot.instrument,
                            snapshot.sequence_id,
                            snapshot.local_timestamp,
                        );
                        if let Some(gap) = gap {
                            warn!(
                                venue = %self.venue(),
                                instrument = %snapshot.instrument,
                                reason = %gap.reason,
                                seq_before = ?gap.sequence_before,
                                seq_after = ?gap.sequence_after,
                                "Sequence gap detected"
                            );
                            self.emit_gap(gap).await?;
                        }
                    }
                    SnapshotSource::RestPoll => {
                        // REST sequence ids are not comparable with the
                        // streamed counter.
                        self.tracker
                            .touch(&snapshot.instrument, snapshot.local_timestamp);
                    }
                }

                self.message_count += 1;
                self.events
                    .send(AdapterEvent::Book(snapshot))
                    .await
                    .map_err(|_| AdapterError::ChannelClosed)
            }
            VenueMessage::Ticker(snapshot) => {
                self.message_count += 1;
                self.events
                    .send(AdapterEvent::Ticker(snapshot))
                    .await
                    .map_err(|_| AdapterError::ChannelClosed)
            }
        }
    }

    /// Record the disconnect boundary for every tracked instrument.
    fn note_disconnect(&mut self) {
        for (instrument, last_seq, last_message_at) in self.tracker.tracked_state() {
            self.pending_reconnect_gaps
                .entry(instrument)
                .or_insert((last_message_at, last_seq));
        }
    }

    async fn emit_gap(&mut self, gap: GapMarker) -> Result<(), AdapterError> {
        self.gap_times.push_back(gap.gap_end);
        self.events
            .send(AdapterEvent::Gap(gap))
            .await
            .map_err(|_| AdapterError::ChannelClosed)
    }

    fn set_status(&mut self, status: ConnectionStatus) {
        if self.status != status {
            info!(venue = %self.venue(), from = %self.status, to = %status, "Connection status");
            self.status = status;
        }
        self.publish_health();
    }

    fn publish_health(&mut self) {
        let now = Utc::now();
        let hour_ago = now - chrono::Duration::hours(1);
        while let Some(front) = self.gap_times.front() {
            if *front < hour_ago {
                self.gap_times.pop_front();
            } else {
                break;
            }
        }

        let last_message_at = self.tracker.last_message_at();
        let lag_ms = last_message_at
            .map(|at| (now - at).num_milliseconds().max(0) as u64)
            .unwrap_or(0);

        let _ = self.health_tx.send(HealthSnapshot {
            venue: self.venue(),
            status: self.status,
            last_message_at,
            message_count: self.message_count,
            lag_ms,
            reconnect_count: self.reconnect_count,
            gaps_last_hour: self.gap_times.len() as u32,
        });
    }
}
