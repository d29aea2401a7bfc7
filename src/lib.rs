// src/lib.rs
// Public library surface for the binary and integration tests.

pub mod api;
pub mod config;
pub mod envelope;
pub mod error;
pub mod extract;
pub mod ingest;
pub mod metrics;
pub mod nats;
pub mod service;

// ---- Re-exports for stable public API ----
pub use crate::api::router;
pub use crate::config::Config;
pub use crate::envelope::{OutboundMessage, RawItem};
pub use crate::extract::{extract, ExtractedSignals};
pub use crate::service::{RelayService, RelayStatus};
