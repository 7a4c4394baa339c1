//! Binance venue codec.
//!
//! Subscription is composed into the connection URL as a combined-stream
//! query string (`/stream?streams=a/b/c`); every payload arrives wrapped in
//! a `{"stream": ..., "data": ...}` envelope. Keep-alive uses WebSocket
//! protocol frames (the server pings, we answer with a pong frame).
//!
//! Two order book wire formats exist:
//! 1. Futures diff/partial depth: has `"e": "depthUpdate"` and the symbol.
//! 2. Spot partial depth: only `lastUpdateId` + `bids` + `asks`; the
//!    instrument is resolved from the stream name in the envelope.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::Value;
use tracing::debug;

use vigil_common::config::InstrumentConfig;
use vigil_common::types::{InstrumentKind, SnapshotSource, TickerSnapshot, Venue};

use crate::adapter::VenueMessage;
use crate::normalize::{
    build_snapshot, parse_decimal, parse_levels, parse_timestamp_ms, NormalizeError,
};
use crate::rest::{RestClient, RestError};
use crate::ws::KeepAlive;

/// Futures diff/partial depth update ("e": "depthUpdate").
#[derive(Debug, Deserialize)]
struct DepthUpdate {
    /// Event time in milliseconds.
    #[serde(rename = "E")]
    event_time: i64,
    /// Symbol (e.g., "BTCUSDT").
    #[serde(rename = "s")]
    symbol: String,
    /// Final update id in this event.
    #[serde(rename = "u")]
    last_update_id: u64,
    /// Bid levels as (price, quantity) strings.
    #[serde(rename = "b")]
    bids: Vec<(String, String)>,
    /// Ask levels as (price, quantity) strings.
    #[serde(rename = "a")]
    asks: Vec<(String, String)>,
}

/// Spot partial depth snapshot (no event type, no symbol).
#[derive(Debug, Deserialize)]
struct SpotPartialDepth {
    #[serde(rename = "lastUpdateId")]
    last_update_id: u64,
    bids: Vec<(String, String)>,
    asks: Vec<(String, String)>,
}

/// 24hr rolling ticker ("e": "24hrTicker").
#[derive(Debug, Clone, Deserialize)]
struct Ticker24hr {
    #[serde(rename = "E")]
    event_time: i64,
    #[serde(rename = "s")]
    symbol: String,
    /// Last price.
    #[serde(rename = "c")]
    last_price: String,
    #[serde(rename = "h")]
    high_24h: String,
    #[serde(rename = "l")]
    low_24h: String,
    /// Base asset volume.
    #[serde(rename = "v")]
    volume: String,
    /// Quote asset volume.
    #[serde(rename = "q")]
    quote_volume: String,
}

/// Mark price update, perpetuals only ("e": "markPriceUpdate").
#[derive(Debug, Clone, Deserialize)]
struct MarkPriceUpdate {
    #[serde(rename = "s")]
    symbol: String,
    /// Mark price.
    #[serde(rename = "p")]
    mark_price: String,
    /// Index price.
    #[serde(rename = "i")]
    index_price: String,
    /// Funding rate.
    #[serde(rename = "r")]
    funding_rate: String,
    /// Next funding time in milliseconds.
    #[serde(rename = "T")]
    next_funding_time: i64,
}

#[derive(Debug, Clone)]
struct StreamedInstrument {
    id: String,
    symbol: String,
    kind: InstrumentKind,
    depth_levels: u16,
    book_stream: String,
    ticker_stream: Option<String>,
    mark_price_stream: Option<String>,
}

/// Binance codec: stream composition, wire parsing, ticker joining.
pub struct BinanceCodec {
    instruments: Vec<StreamedInstrument>,
    /// symbol -> latest 24hr ticker, joined with mark price on emission.
    ticker_cache: HashMap<String, Ticker24hr>,
    /// symbol -> latest mark price update.
    mark_cache: HashMap<String, MarkPriceUpdate>,
}

impl BinanceCodec {
    pub fn new(instruments: &[&InstrumentConfig]) -> Self {
        let mut streamed = Vec::new();
        for instrument in instruments {
            let Some(symbol) = instrument.symbol_for(Venue::Binance) else {
                continue;
            };
            let lower = symbol.symbol.to_lowercase();
            let book_stream = symbol
                .book_stream
                .clone()
                .unwrap_or_else(|| format!("{}@depth{}@100ms", lower, instrument.depth_levels));
            streamed.push(StreamedInstrument {
                id: instrument.id.clone(),
                symbol: symbol.symbol.to_uppercase(),
                kind: instrument.kind,
                depth_levels: instrument.depth_levels,
                book_stream,
                ticker_stream: symbol
                    .ticker_stream
                    .clone()
                    .or_else(|| Some(format!("{}@ticker", lower))),
                mark_price_stream: symbol.mark_price_stream.clone().or_else(|| {
                    (instrument.kind == InstrumentKind::Perpetual)
                        .then(|| format!("{}@markPrice", lower))
                }),
            });
        }
        Self {
            instruments: streamed,
            ticker_cache: HashMap::new(),
            mark_cache: HashMap::new(),
        }
    }

    pub fn venue(&self) -> Venue {
        Venue::Binance
    }

    pub fn keep_alive(&self) -> KeepAlive {
        KeepAlive::ProtocolFrames
    }

    /// All stream names for the combined-stream subscription.
    pub fn streams(&self) -> Vec<String> {
        let mut streams = Vec::new();
        for instrument in &self.instruments {
            streams.push(instrument.book_stream.clone());
            if let Some(ticker) = &instrument.ticker_stream {
                streams.push(ticker.clone());
            }
            if let Some(mark) = &instrument.mark_price_stream {
                streams.push(mark.clone());
            }
        }
        streams
    }

    /// Combined-stream URL; Binance composes subscriptions in the query
    /// string rather than with subscribe messages.
    pub fn ws_url(&self, base: &str) -> String {
        format!("{}?streams={}", base, self.streams().join("/"))
    }

    /// Binance needs no post-connect subscribe messages.
    pub fn subscribe_messages(&self) -> Vec<String> {
        Vec::new()
    }

    /// Parse one text frame into at most one normalized message.
    ///
    /// Subscription acks and unknown events return `Ok(None)`; parse and
    /// validation failures return an error for the adapter to log and drop.
    pub fn parse(
        &mut self,
        text: &str,
        local_timestamp: DateTime<Utc>,
    ) -> Result<Option<VenueMessage>, NormalizeError> {
        let value: Value =
            serde_json::from_str(text).map_err(|_| NormalizeError::BadJson(truncate(text)))?;

        // Combined-stream envelope; bare payloads also occur on reconnect.
        let (stream_name, data) = match (value.get("stream"), value.get("data")) {
            (Some(stream), Some(data)) => (stream.as_str().map(String::from), data.clone()),
            _ => (None, value),
        };

        // Subscription acks look like {"result": null, "id": 1}
        if data.get("result").is_some() || data.get("id").is_some() {
            debug!("Ignoring Binance subscription ack");
            return Ok(None);
        }

        match data.get("e").and_then(Value::as_str) {
            Some("depthUpdate") => self.parse_depth_update(data, local_timestamp),
            Some("24hrTicker") => self.parse_ticker(data, local_timestamp),
            Some("markPriceUpdate") => self.parse_mark_price(data, local_timestamp),
            Some(_) => Ok(None),
            None => {
                if data.get("lastUpdateId").is_some() {
                    self.parse_spot_partial(stream_name.as_deref(), data, local_timestamp)
                } else {
                    Ok(None)
                }
            }
        }
    }

    fn parse_depth_update(
        &self,
        data: Value,
        local_timestamp: DateTime<Utc>,
    ) -> Result<Option<VenueMessage>, NormalizeError> {
        let update: DepthUpdate =
            serde_json::from_value(data).map_err(|_| NormalizeError::MissingField("depthUpdate"))?;

        let Some(instrument) = self.find_by_symbol(&update.symbol) else {
            debug!(symbol = %update.symbol, "Unknown Binance symbol");
            return Ok(None);
        };

        let snapshot = build_snapshot(
            Venue::Binance,
            &instrument.id,
            parse_timestamp_ms(update.event_time)?,
            local_timestamp,
            update.last_update_id,
            parse_levels("bid", &update.bids)?,
            parse_levels("ask", &update.asks)?,
            instrument.depth_levels,
            SnapshotSource::Stream,
        )?;
        Ok(Some(VenueMessage::Book(snapshot)))
    }

    fn parse_spot_partial(
        &self,
        stream_name: Option<&str>,
        data: Value,
        local_timestamp: DateTime<Utc>,
    ) -> Result<Option<VenueMessage>, NormalizeError> {
        let partial: SpotPartialDepth = serde_json::from_value(data)
            .map_err(|_| NormalizeError::MissingField("lastUpdateId"))?;

        // Spot partial depth carries no symbol; resolve from the envelope
        // stream name.
        let Some(instrument) = stream_name.and_then(|name| self.find_by_stream(name)) else {
            debug!(stream = ?stream_name, "No instrument for spot partial depth stream");
            return Ok(None);
        };

        let snapshot = build_snapshot(
            Venue::Binance,
            &instrument.id,
            // Spot partial depth has no venue timestamp; local receipt
            // stands in for both.
            local_timestamp,
            local_timestamp,
            partial.last_update_id,
            parse_levels("bid", &partial.bids)?,
            parse_levels("ask", &partial.asks)?,
            instrument.depth_levels,
            SnapshotSource::Stream,
        )?;
        Ok(Some(VenueMessage::Book(snapshot)))
    }

    fn parse_ticker(
        &mut self,
        data: Value,
        local_timestamp: DateTime<Utc>,
    ) -> Result<Option<VenueMessage>, NormalizeError> {
        let ticker: Ticker24hr =
            serde_json::from_value(data).map_err(|_| NormalizeError::MissingField("24hrTicker"))?;
        let symbol = ticker.symbol.to_uppercase();
        self.ticker_cache.insert(symbol.clone(), ticker);
        self.emit_ticker(&symbol, local_timestamp)
    }

    fn parse_mark_price(
        &mut self,
        data: Value,
        local_timestamp: DateTime<Utc>,
    ) -> Result<Option<VenueMessage>, NormalizeError> {
        let mark: MarkPriceUpdate = serde_json::from_value(data)
            .map_err(|_| NormalizeError::MissingField("markPriceUpdate"))?;
        let symbol = mark.symbol.to_uppercase();
        self.mark_cache.insert(symbol.clone(), mark);
        self.emit_ticker(&symbol, local_timestamp)
    }

    /// Join the cached 24hr ticker with the cached mark price (if any) into
    /// one normalized ticker. Nothing is emitted until the 24hr leg exists.
    fn emit_ticker(
        &self,
        symbol: &str,
        local_timestamp: DateTime<Utc>,
    ) -> Result<Option<VenueMessage>, NormalizeError> {
        let Some(instrument) = self.find_by_symbol(symbol) else {
            return Ok(None);
        };
        let Some(ticker) = self.ticker_cache.get(symbol) else {
            return Ok(None);
        };
        let mark = self.mark_cache.get(symbol);

        let snapshot = TickerSnapshot {
            venue: Venue::Binance,
            instrument: instrument.id.clone(),
            timestamp: parse_timestamp_ms(ticker.event_time)?,
            local_timestamp,
            last_price: parse_decimal("last_price", &ticker.last_price)?,
            mark_price: mark
                .map(|m| parse_decimal("mark_price", &m.mark_price))
                .transpose()?,
            index_price: mark
                .map(|m| parse_decimal("index_price", &m.index_price))
                .transpose()?,
            volume_24h: parse_decimal("volume_24h", &ticker.volume)?,
            volume_24h_usd: parse_decimal("volume_24h_usd", &ticker.quote_volume)?,
            high_24h: parse_decimal("high_24h", &ticker.high_24h)?,
            low_24h: parse_decimal("low_24h", &ticker.low_24h)?,
            funding_rate: mark
                .map(|m| parse_decimal("funding_rate", &m.funding_rate))
                .transpose()?,
            next_funding_time: mark
                .map(|m| parse_timestamp_ms(m.next_funding_time))
                .transpose()?,
        };
        Ok(Some(VenueMessage::Ticker(snapshot)))
    }

    /// REST order book fetch for the degraded-mode poller.
    pub async fn fetch_book(
        &self,
        rest: &RestClient,
        instrument_id: &str,
        local_timestamp: DateTime<Utc>,
    ) -> Result<Option<VenueMessage>, RestError> {
        let Some(instrument) = self.instruments.iter().find(|i| i.id == instrument_id) else {
            return Ok(None);
        };

        let path = match instrument.kind {
            InstrumentKind::Perpetual => format!(
                "/fapi/v1/depth?symbol={}&limit={}",
                instrument.symbol, instrument.depth_levels
            ),
            InstrumentKind::Spot => format!(
                "/api/v3/depth?symbol={}&limit={}",
                instrument.symbol, instrument.depth_levels
            ),
        };

        let body = rest.get_json(&path).await?;
        let depth: SpotPartialDepth = serde_json::from_value(body)
            .map_err(|e| RestError::BadResponse(format!("binance depth: {}", e)))?;

        let snapshot = build_snapshot(
            Venue::Binance,
            &instrument.id,
            local_timestamp,
            local_timestamp,
            depth.last_update_id,
            parse_levels("bid", &depth.bids)?,
            parse_levels("ask", &depth.asks)?,
            instrument.depth_levels,
            SnapshotSource::RestPoll,
        )?;
        Ok(Some(VenueMessage::Book(snapshot)))
    }

    /// Instrument ids this codec streams.
    pub fn instrument_ids(&self) -> Vec<String> {
        self.instruments.iter().map(|i| i.id.clone()).collect()
    }

    fn find_by_symbol(&self, symbol: &str) -> Option<&StreamedInstrument> {
        let upper = symbol.to_uppercase();
        self.instruments.iter().find(|i| i.symbol == upper)
    }

    fn find_by_stream(&self, stream: &str) -> Option<&StreamedInstrument> {
        self.instruments.iter().find(|i| i.book_stream == stream)
    }
}

fn truncate(text: &str) -> String {
    text.chars().take(120).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use vigil_common::config::{InstrumentConfig, VenueSymbol};
    use vigil_common::types::OrderBookSnapshot;

    fn perp_config() -> InstrumentConfig {
        InstrumentConfig {
            id: "BTC-USDT-PERP".to_string(),
            kind: InstrumentKind::Perpetual,
            depth_levels: 20,
            enabled: true,
            symbols: vec![VenueSymbol {
                venue: Venue::Binance,
                symbol: "BTCUSDT".to_string(),
                book_stream: Some("btcusdt@depth20@100ms".to_string()),
                ticker_stream: Some("btcusdt@ticker".to_string()),
                mark_price_stream: Some("btcusdt@markPrice".to_string()),
            }],
        }
    }

    fn spot_config() -> InstrumentConfig {
        InstrumentConfig {
            id: "BTC-USDT-SPOT".to_string(),
            kind: InstrumentKind::Spot,
            depth_levels: 20,
            enabled: true,
            symbols: vec![VenueSymbol {
                venue: Venue::Binance,
                symbol: "BTCUSDT".to_string(),
                book_stream: Some("btcusdt@depth20@100ms-spot".to_string()),
                ticker_stream: None,
                mark_price_stream: None,
            }],
        }
    }

    fn codec() -> BinanceCodec {
        let perp = perp_config();
        BinanceCodec::new(&[&perp])
    }

    fn expect_book(message: Option<VenueMessage>) -> OrderBookSnapshot {
        match message {
            Some(VenueMessage::Book(snapshot)) => snapshot,
            other => panic!("expected book, got {:?}", other),
        }
    }

    #[test]
    fn test_ws_url_combines_streams() {
        let codec = codec();
        let url = codec.ws_url("wss://fstream.binance.com/stream");
        assert!(url.starts_with("wss://fstream.binance.com/stream?streams="));
        assert!(url.contains("btcusdt@depth20@100ms"));
        assert!(url.contains("btcusdt@ticker"));
        assert!(url.contains("btcusdt@markPrice"));
        assert!(codec.subscribe_messages().is_empty());
    }

    #[test]
    fn test_parse_depth_update() {
        let mut codec = codec();
        let msg = r#"{
            "stream": "btcusdt@depth20@100ms",
            "data": {
                "e": "depthUpdate",
                "E": 1704067200000,
                "s": "BTCUSDT",
                "U": 100,
                "u": 105,
                "b": [["49999.50", "1.5"], ["49999.00", "2.0"]],
                "a": [["50000.50", "1.0"], ["50001.00", "3.0"]]
            }
        }"#;

        let snapshot = expect_book(codec.parse(msg, Utc::now()).unwrap());
        assert_eq!(snapshot.instrument, "BTC-USDT-PERP");
        assert_eq!(snapshot.sequence_id, 105);
        assert_eq!(snapshot.best_bid(), Some(dec!(49999.50)));
        assert_eq!(snapshot.best_ask(), Some(dec!(50000.50)));
        assert_eq!(snapshot.source, SnapshotSource::Stream);
    }

    #[test]
    fn test_parse_spot_partial_depth_resolved_by_stream() {
        let spot = spot_config();
        let mut codec = BinanceCodec::new(&[&spot]);
        let msg = r#"{
            "stream": "btcusdt@depth20@100ms-spot",
            "data": {
                "lastUpdateId": 160,
                "bids": [["49999.00", "1.0"]],
                "asks": [["50001.00", "1.0"]]
            }
        }"#;

        let snapshot = expect_book(codec.parse(msg, Utc::now()).unwrap());
        assert_eq!(snapshot.instrument, "BTC-USDT-SPOT");
        assert_eq!(snapshot.sequence_id, 160);
    }

    #[test]
    fn test_parse_rejects_crossed_book() {
        let mut codec = codec();
        let msg = r#"{
            "data": {
                "e": "depthUpdate",
                "E": 1704067200000,
                "s": "BTCUSDT",
                "u": 105,
                "b": [["50002.00", "1.0"]],
                "a": [["50001.00", "1.0"]]
            },
            "stream": "btcusdt@depth20@100ms"
        }"#;
        assert!(codec.parse(msg, Utc::now()).is_err());
    }

    #[test]
    fn test_parse_subscription_ack_ignored() {
        let mut codec = codec();
        assert!(codec
            .parse(r#"{"result":null,"id":1}"#, Utc::now())
            .unwrap()
            .is_none());
    }

    #[test]
    fn test_parse_invalid_json_is_error() {
        let mut codec = codec();
        assert!(codec.parse("not json", Utc::now()).is_err());
    }

    #[test]
    fn test_unknown_symbol_dropped() {
        let mut codec = codec();
        let msg = r#"{
            "data": {
                "e": "depthUpdate",
                "E": 1704067200000,
                "s": "DOGEUSDT",
                "u": 105,
                "b": [["0.10", "1.0"]],
                "a": [["0.11", "1.0"]]
            },
            "stream": "dogeusdt@depth20@100ms"
        }"#;
        assert!(codec.parse(msg, Utc::now()).unwrap().is_none());
    }

    #[test]
    fn test_ticker_join_with_mark_price() {
        let mut codec = codec();
        let now = Utc::now();

        // 24hr ticker alone emits with empty perp fields
        let ticker = r#"{
            "data": {
                "e": "24hrTicker",
                "E": 1704067200000,
                "s": "BTCUSDT",
                "c": "50000.00",
                "h": "51000.00",
                "l": "49000.00",
                "v": "1000.5",
                "q": "50025000.00"
            },
            "stream": "btcusdt@ticker"
        }"#;
        let message = codec.parse(ticker, now).unwrap();
        let Some(VenueMessage::Ticker(snapshot)) = message else {
            panic!("expected ticker");
        };
        assert_eq!(snapshot.last_price, dec!(50000.00));
        assert!(snapshot.mark_price.is_none());
        assert!(!snapshot.is_perpetual());

        // Mark price joins with the cached 24hr leg
        let mark = r#"{
            "data": {
                "e": "markPriceUpdate",
                "E": 1704067201000,
                "s": "BTCUSDT",
                "p": "50001.50",
                "i": "49999.00",
                "r": "0.0001",
                "T": 1704096000000
            },
            "stream": "btcusdt@markPrice"
        }"#;
        let message = codec.parse(mark, now).unwrap();
        let Some(VenueMessage::Ticker(snapshot)) = message else {
            panic!("expected ticker");
        };
        assert_eq!(snapshot.mark_price, Some(dec!(50001.50)));
        assert_eq!(snapshot.index_price, Some(dec!(49999.00)));
        assert_eq!(snapshot.funding_rate, Some(dec!(0.0001)));
        assert!(snapshot.is_perpetual());
    }

    #[test]
    fn test_mark_price_before_ticker_emits_nothing() {
        let mut codec = codec();
        let mark = r#"{
            "data": {
                "e": "markPriceUpdate",
                "E": 1704067201000,
                "s": "BTCUSDT",
                "p": "50001.50",
                "i": "49999.00",
                "r": "0.0001",
                "T": 1704096000000
            },
            "stream": "btcusdt@markPrice"
        }"#;
        assert!(codec.parse(mark, Utc::now()).unwrap().is_none());
    }
}
