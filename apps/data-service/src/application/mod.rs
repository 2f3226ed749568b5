//! Application Layer - Use cases and port definitions.
//!
//! This layer contains the application services and port interfaces
//! that define how the domain interacts with external systems.

/// Port interfaces for external systems (upstream streams, REST sources).
pub mod ports;

/// Application services for consumer lifecycle and live streaming.
pub mod services;
