//! OKX venue codec.
//!
//! Subscription uses JSON `{"op": "subscribe", "args": [...]}` messages on
//! a single public endpoint. Keep-alive is a client-originated text
//! "ping" answered by a text "pong"; failing to handle the text form would
//! cause a spurious reconnect every ping interval.
//!
//! Channels: `books5` (top 5 levels), `tickers`, `mark-price`,
//! `index-tickers`, `funding-rate`. Mark, index, and funding updates are
//! cached per instId and joined onto the latest ticker.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use vigil_common::config::InstrumentConfig;
use vigil_common::types::{InstrumentKind, PriceLevel, SnapshotSource, TickerSnapshot, Venue};

use crate::adapter::VenueMessage;
use crate::normalize::{
    build_snapshot, parse_decimal, parse_timestamp_ms, NormalizeError,
};
use crate::rest::{RestClient, RestError};
use crate::ws::KeepAlive;

/// Subscribe request argument.
#[derive(Debug, Serialize)]
struct SubscribeArg {
    channel: &'static str,
    #[serde(rename = "instId")]
    inst_id: String,
}

/// Subscribe request envelope.
#[derive(Debug, Serialize)]
struct SubscribeRequest {
    op: &'static str,
    args: Vec<SubscribeArg>,
}

/// Push message envelope: {"arg": {...}, "data": [...]}.
#[derive(Debug, Deserialize)]
struct PushEnvelope {
    arg: PushArg,
    data: Vec<Value>,
}

#[derive(Debug, Deserialize)]
struct PushArg {
    channel: String,
    #[serde(rename = "instId")]
    inst_id: String,
}

/// books5 payload entry. Levels are [price, qty, deprecated, order_count].
#[derive(Debug, Deserialize)]
struct BookData {
    bids: Vec<Vec<String>>,
    asks: Vec<Vec<String>>,
    ts: String,
    #[serde(rename = "seqId")]
    seq_id: u64,
}

/// tickers payload entry.
#[derive(Debug, Clone, Deserialize)]
struct TickerData {
    last: String,
    #[serde(rename = "vol24h")]
    vol_24h: String,
    #[serde(rename = "volCcy24h")]
    vol_ccy_24h: String,
    #[serde(rename = "high24h")]
    high_24h: String,
    #[serde(rename = "low24h")]
    low_24h: String,
    ts: String,
}

/// mark-price payload entry.
#[derive(Debug, Clone, Deserialize)]
struct MarkPriceData {
    #[serde(rename = "markPx")]
    mark_px: String,
}

/// index-tickers payload entry.
#[derive(Debug, Clone, Deserialize)]
struct IndexTickerData {
    #[serde(rename = "idxPx")]
    idx_px: String,
}

/// funding-rate payload entry.
#[derive(Debug, Clone, Deserialize)]
struct FundingRateData {
    #[serde(rename = "fundingRate")]
    funding_rate: String,
    #[serde(rename = "fundingTime")]
    funding_time: String,
}

#[derive(Debug, Clone)]
struct StreamedInstrument {
    id: String,
    inst_id: String,
    kind: InstrumentKind,
    depth_levels: u16,
}

/// OKX codec: JSON subscription, wire parsing, ticker joining.
pub struct OkxCodec {
    instruments: Vec<StreamedInstrument>,
    ticker_cache: HashMap<String, TickerData>,
    mark_cache: HashMap<String, MarkPriceData>,
    index_cache: HashMap<String, IndexTickerData>,
    funding_cache: HashMap<String, FundingRateData>,
}

impl OkxCodec {
    pub fn new(instruments: &[&InstrumentConfig]) -> Self {
        let streamed = instruments
            .iter()
            .filter_map(|instrument| {
                instrument.symbol_for(Venue::Okx).map(|symbol| StreamedInstrument {
                    id: instrument.id.clone(),
                    inst_id: symbol.symbol.clone(),
                    kind: instrument.kind,
                    depth_levels: instrument.depth_levels,
                })
            })
            .collect();
        Self {
            instruments: streamed,
            ticker_cache: HashMap::new(),
            mark_cache: HashMap::new(),
            index_cache: HashMap::new(),
            funding_cache: HashMap::new(),
        }
    }

    pub fn venue(&self) -> Venue {
        Venue::Okx
    }

    pub fn keep_alive(&self) -> KeepAlive {
        KeepAlive::TextPingPong
    }

    /// OKX uses a fixed public endpoint; no stream composition in the URL.
    pub fn ws_url(&self, base: &str) -> String {
        base.to_string()
    }

    /// JSON subscribe messages sent after connect.
    pub fn subscribe_messages(&self) -> Vec<String> {
        let mut args = Vec::new();
        for instrument in &self.instruments {
            args.push(SubscribeArg {
                channel: "books5",
                inst_id: instrument.inst_id.clone(),
            });
            args.push(SubscribeArg {
                channel: "tickers",
                inst_id: instrument.inst_id.clone(),
            });
            if instrument.kind == InstrumentKind::Perpetual {
                args.push(SubscribeArg {
                    channel: "mark-price",
                    inst_id: instrument.inst_id.clone(),
                });
                args.push(SubscribeArg {
                    channel: "index-tickers",
                    inst_id: instrument.inst_id.clone(),
                });
                args.push(SubscribeArg {
                    channel: "funding-rate",
                    inst_id: instrument.inst_id.clone(),
                });
            }
        }

        let request = SubscribeRequest {
            op: "subscribe",
            args,
        };
        vec![serde_json::to_string(&request).expect("static subscribe request serializes")]
    }

    /// Parse one text frame into at most one normalized message.
    pub fn parse(
        &mut self,
        text: &str,
        local_timestamp: DateTime<Utc>,
    ) -> Result<Option<VenueMessage>, NormalizeError> {
        let value: Value = serde_json::from_str(text)
            .map_err(|_| NormalizeError::BadJson(text.chars().take(120).collect()))?;

        // Subscription acks and errors: {"event": "subscribe"/"error", ...}
        if value.get("event").is_some() {
            debug!(payload = %text, "OKX control message");
            return Ok(None);
        }

        let envelope: PushEnvelope = match serde_json::from_value(value) {
            Ok(envelope) => envelope,
            Err(_) => return Ok(None),
        };

        let Some(instrument) = self.find_by_inst_id(&envelope.arg.inst_id) else {
            debug!(inst_id = %envelope.arg.inst_id, "Unknown OKX instId");
            return Ok(None);
        };
        let instrument = instrument.clone();

        let Some(first) = envelope.data.into_iter().next() else {
            return Ok(None);
        };

        match envelope.arg.channel.as_str() {
            "books5" => self.parse_book(&instrument, first, local_timestamp),
            "tickers" => {
                let ticker: TickerData = serde_json::from_value(first)
                    .map_err(|_| NormalizeError::MissingField("tickers"))?;
                self.ticker_cache.insert(instrument.inst_id.clone(), ticker);
                self.emit_ticker(&instrument, local_timestamp)
            }
            "mark-price" => {
                let mark: MarkPriceData = serde_json::from_value(first)
                    .map_err(|_| NormalizeError::MissingField("mark-price"))?;
                self.mark_cache.insert(instrument.inst_id.clone(), mark);
                self.emit_ticker(&instrument, local_timestamp)
            }
            "index-tickers" => {
                let index: IndexTickerData = serde_json::from_value(first)
                    .map_err(|_| NormalizeError::MissingField("index-tickers"))?;
                self.index_cache.insert(instrument.inst_id.clone(), index);
                self.emit_ticker(&instrument, local_timestamp)
            }
            "funding-rate" => {
                let funding: FundingRateData = serde_json::from_value(first)
                    .map_err(|_| NormalizeError::MissingField("funding-rate"))?;
                self.funding_cache.insert(instrument.inst_id.clone(), funding);
                self.emit_ticker(&instrument, local_timestamp)
            }
            _ => Ok(None),
        }
    }

    fn parse_book(
        &self,
        instrument: &StreamedInstrument,
        data: Value,
        local_timestamp: DateTime<Utc>,
    ) -> Result<Option<VenueMessage>, NormalizeError> {
        let book: BookData =
            serde_json::from_value(data).map_err(|_| NormalizeError::MissingField("books5"))?;

        let ts_ms: i64 = book
            .ts
            .parse()
            .map_err(|_| NormalizeError::BadTimestamp(0))?;

        let snapshot = build_snapshot(
            Venue::Okx,
            &instrument.id,
            parse_timestamp_ms(ts_ms)?,
            local_timestamp,
            book.seq_id,
            parse_okx_levels("bid", &book.bids)?,
            parse_okx_levels("ask", &book.asks)?,
            instrument.depth_levels,
            SnapshotSource::Stream,
        )?;
        Ok(Some(VenueMessage::Book(snapshot)))
    }

    /// Join cached ticker, mark, index, and funding legs.
    fn emit_ticker(
        &self,
        instrument: &StreamedInstrument,
        local_timestamp: DateTime<Utc>,
    ) -> Result<Option<VenueMessage>, NormalizeError> {
        let Some(ticker) = self.ticker_cache.get(&instrument.inst_id) else {
            return Ok(None);
        };
        let mark = self.mark_cache.get(&instrument.inst_id);
        let index = self.index_cache.get(&instrument.inst_id);
        let funding = self.funding_cache.get(&instrument.inst_id);

        let ts_ms: i64 = ticker
            .ts
            .parse()
            .map_err(|_| NormalizeError::BadTimestamp(0))?;

        let snapshot = TickerSnapshot {
            venue: Venue::Okx,
            instrument: instrument.id.clone(),
            timestamp: parse_timestamp_ms(ts_ms)?,
            local_timestamp,
            last_price: parse_decimal("last_price", &ticker.last)?,
            mark_price: mark
                .map(|m| parse_decimal("mark_price", &m.mark_px))
                .transpose()?,
            index_price: index
                .map(|i| parse_decimal("index_price", &i.idx_px))
                .transpose()?,
            volume_24h: parse_decimal("volume_24h", &ticker.vol_24h)?,
            volume_24h_usd: parse_decimal("volume_24h_usd", &ticker.vol_ccy_24h)?,
            high_24h: parse_decimal("high_24h", &ticker.high_24h)?,
            low_24h: parse_decimal("low_24h", &ticker.low_24h)?,
            funding_rate: funding
                .map(|f| parse_decimal("funding_rate", &f.funding_rate))
                .transpose()?,
            next_funding_time: funding
                .and_then(|f| f.funding_time.parse::<i64>().ok())
                .map(parse_timestamp_ms)
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

        let path = format!(
            "/api/v5/market/books?instId={}&sz={}",
            instrument.inst_id, instrument.depth_levels
        );
        let body = rest.get_json(&path).await?;

        let data = body
            .get("data")
            .and_then(Value::as_array)
            .and_then(|rows| rows.first())
            .cloned()
            .ok_or_else(|| RestError::BadResponse("okx books: empty data".to_string()))?;

        #[derive(Debug, Deserialize)]
        struct RestBook {
            bids: Vec<Vec<String>>,
            asks: Vec<Vec<String>>,
            ts: String,
        }

        let book: RestBook = serde_json::from_value(data)
            .map_err(|e| RestError::BadResponse(format!("okx books: {}", e)))?;
        let ts_ms: i64 = book.ts.parse().unwrap_or(0);
        let timestamp = if ts_ms > 0 {
            parse_timestamp_ms(ts_ms)?
        } else {
            local_timestamp
        };

        let snapshot = build_snapshot(
            Venue::Okx,
            &instrument.id,
            timestamp,
            local_timestamp,
            // REST books carry no seqId; zero never regresses an empty tracker.
            0,
            parse_okx_levels("bid", &book.bids)?,
            parse_okx_levels("ask", &book.asks)?,
            instrument.depth_levels,
            SnapshotSource::RestPoll,
        )?;
        Ok(Some(VenueMessage::Book(snapshot)))
    }

    /// Instrument ids this codec streams.
    pub fn instrument_ids(&self) -> Vec<String> {
        self.instruments.iter().map(|i| i.id.clone()).collect()
    }

    fn find_by_inst_id(&self, inst_id: &str) -> Option<&StreamedInstrument> {
        self.instruments.iter().find(|i| i.inst_id == inst_id)
    }
}

/// OKX levels are [price, qty, deprecated, order_count] string arrays.
fn parse_okx_levels(
    side: &'static str,
    raw: &[Vec<String>],
) -> Result<Vec<PriceLevel>, NormalizeError> {
    let mut levels = Vec::with_capacity(raw.len());
    for entry in raw {
        let price = entry.first().ok_or(NormalizeError::MissingField("price"))?;
        let quantity = entry.get(1).ok_or(NormalizeError::MissingField("quantity"))?;
        levels.push(PriceLevel::new(
            parse_decimal(side, price)?,
            parse_decimal(side, quantity)?,
        ));
    }
    Ok(levels)
}
