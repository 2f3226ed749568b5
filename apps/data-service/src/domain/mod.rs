//! Domain Layer - Core market data types and business rules.
//!
//! This layer contains the value types the service reasons about, with
//! no I/O. All types here are plain Rust with serialization support.

/// Cached time ranges and gap detection.
pub mod coverage;

/// Client lifecycle types.
pub mod consumer;

/// Preload work items, ordering and deduplication.
pub mod preload;

/// Market data streaming types (candles, trades, mark price, open interest).
pub mod streaming;

/// Subscription keys and listener identity.
pub mod subscription;
