//! Strict normalization of wire values.
//!
//! Every numeric wire value is parsed as a `Decimal` directly from its
//! string form. Validation failures are logged and the message is dropped;
//! they never kill the stream.

use chrono::{DateTime, TimeZone, Utc};
use rust_decimal::Decimal;
use thiserror::Error;

use vigil_common::types::{
    BookValidationError, OrderBookSnapshot, PriceLevel, SnapshotSource, Venue,
};

/// Errors raised while normalizing a wire message.
#[derive(Debug, Error)]
pub enum NormalizeError {
    #[error("unparsable payload: {0:?}")]
    BadJson(String),

    #[error("unparsable decimal in {field}: {value:?}")]
    BadDecimal { field: &'static str, value: String },

    #[error("unparsable timestamp: {0}")]
    BadTimestamp(i64),

    #[error("missing field: {0}")]
    MissingField(&'static str),

    #[error(transparent)]
    Book(#[from] BookValidationError),
}

/// Parse a wire string into a Decimal, attributing failures to `field`.
pub fn parse_decimal(field: &'static str, value: &str) -> Result<Decimal, NormalizeError> {
    value.parse().map_err(|_| NormalizeError::BadDecimal {
        field,
        value: value.to_string(),
    })
}

/// Parse a millisecond epoch timestamp.
pub fn parse_timestamp_ms(ms: i64) -> Result<DateTime<Utc>, NormalizeError> {
    Utc.timestamp_millis_opt(ms)
        .single()
        .ok_or(NormalizeError::BadTimestamp(ms))
}

/// Parse raw (price, quantity) string pairs into sorted-as-received levels.
pub fn parse_levels(
    side: &'static str,
    raw: &[(String, String)],
) -> Result<Vec<PriceLevel>, NormalizeError> {
    let mut levels = Vec::with_capacity(raw.len());
    for (price, quantity) in raw {
        levels.push(PriceLevel::new(
            parse_decimal(side, price)?,
            parse_decimal(side, quantity)?,
        ));
    }
    Ok(levels)
}

/// Assemble and validate a normalized snapshot.
///
/// The book invariants (positive values, strictly sorted sides, uncrossed)
/// are checked here so no invalid snapshot can leave an adapter.
#[allow(clippy::too_many_arguments)]
pub fn build_snapshot(
    venue: Venue,
    instrument: &str,
    timestamp: DateTime<Utc>,
    local_timestamp: DateTime<Utc>,
    sequence_id: u64,
    bids: Vec<PriceLevel>,
    asks: Vec<PriceLevel>,
    depth_levels: u16,
    source: SnapshotSource,
) -> Result<OrderBookSnapshot, NormalizeError> {
    let snapshot = OrderBookSnapshot {
        venue,
        instrument: instrument.to_string(),
        timestamp,
        local_timestamp,
        sequence_id,
        bids,
        asks,
        depth_levels,
        source,
    };
    snapshot.validate()?;
    Ok(snapshot)
}
