//! Interface layer - Surface exposed to the consuming runtime
//!
//! This layer handles:
//! - The bridge emitter (ingest, dispatch, delivery)
//! - Listener registration and event streams
//! - Metrics

pub mod emitter;
pub mod listener;
pub mod metrics;

pub use emitter::BridgeEmitter;
pub use listener::{event_channel, BridgeListener, ChannelListener, EventStream, ListenerId};
