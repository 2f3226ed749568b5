//! Application Services
//!
//! Services that orchestrate domain logic and coordinate between ports.
//!
//! - `ConsumerRegistry`: Tracks client processes and drives idle auto-shutdown
//! - `LiveStreamManager`: Reference-counted push stream connections with fan-out
//! - `OpenInterestManager`: Reference-counted open interest polling
//! - `StreamRegistry`: Per-key state shared by the stream managers

mod consumer_registry;
mod listeners;
mod live_stream;
mod open_interest;
mod reconnect;
mod stream_registry;

pub use consumer_registry::{ConsumerRegistry, ConsumerRegistryConfig, IdleCallback};
pub use listeners::{Listener, ListenerSet, dispatch, listener};
pub use live_stream::{LiveStreamConfig, LiveStreamError, LiveStreamManager, Subscription};
pub use open_interest::{OpenInterestConfig, OpenInterestManager};
pub use reconnect::{ReconnectConfig, ReconnectPolicy};
pub use stream_registry::{Detach, StreamRegistry};
