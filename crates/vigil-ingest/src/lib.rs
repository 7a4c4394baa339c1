//! Venue adapter framework.
//!
//! One [`adapter::VenueAdapter`] task per venue maintains a continuously
//! healthy subscription, normalizes every wire format into
//! `vigil_common` types before anything leaves the adapter, records gaps
//! faithfully, and falls back to REST polling when the socket cannot be
//! kept alive.
//!
//! ## Modules
//!
//! - `ws`: reconnecting WebSocket client with per-venue keep-alive
//! - `binance` / `okx`: venue codecs (subscription, wire parsing)
//! - `normalize`: strict decimal parsing and book validation
//! - `gap`: sequence and silence gap detection
//! - `rest`: REST fallback client
//! - `adapter`: the per-venue task tying it all together

pub mod adapter;
pub mod binance;
pub mod gap;
pub mod normalize;
pub mod okx;
pub mod rest;
pub mod ws;

pub use adapter::{AdapterError, AdapterEvent, VenueAdapter};
pub use binance::BinanceCodec;
pub use gap::SequenceTracker;
pub use normalize::NormalizeError;
pub use okx::OkxCodec;
pub use rest::{RestClient, RestError};
pub use ws::{Backoff, KeepAlive, WsConfig, WsConnection, WsError, WsEvent};
