//! Pipeline composition for the vigil surveillance system.
//!
//! Wires adapters, the metrics engine, the anomaly detector, and the two
//! storage projections together with typed bounded channels. Hot-state
//! writes are fire-and-forget (loss acceptable, recomputable); cold-store
//! writes apply backpressure (loss unacceptable).
//!
//! ## Modules
//!
//! - `hot`: hot-state store (key-value projection + pub/sub topic)
//! - `cold`: batched append-only writer with retry and fallback queue
//! - `pipeline`: task wiring, supervision, graceful shutdown

pub mod cold;
pub mod hot;
pub mod pipeline;

pub use cold::{ColdEvent, ColdWriter, ColdWriterStats};
pub use hot::{keys, HotRecord, HotStore, HotUpdate, HotWriter, InMemoryHotStore};
pub use pipeline::{Pipeline, PipelineError};
