//! Ingestion front door for Pulse
//!
//! The [`Collector`] accepts single items and batches, applies rate
//! limiting, validation, and deduplication, and hands batches to the
//! pipeline on flush.

pub mod collector;
pub mod dedup;
pub mod rate_limit;

pub use collector::{CollectOutcome, Collector, CollectorConfig};
pub use dedup::DedupCache;
pub use rate_limit::RateLimiter;
