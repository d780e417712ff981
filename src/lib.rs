//! Callbridge - Cross-runtime call event bridge
//!
//! Normalizes raw events from a native media stack, runs them through a call
//! session state machine and delivers the resulting events, in order, to listeners
//! living in another runtime. Commands travel the other way.

pub mod application;
pub mod config;
pub mod domain;
pub mod infrastructure;
pub mod interface;

// Re-export commonly used types
pub use application::BridgeRegistry;
pub use domain::call::{
    BridgeEvent, CallReport, CallRequest, CallSession, CallState, Command, EventPayload,
    NativeCallSystem,
};
pub use domain::shared::error::DomainError;
pub use domain::shared::result::Result;
pub use infrastructure::normalizer::RawNativeEvent;
pub use interface::emitter::BridgeEmitter;
pub use interface::listener::{BridgeListener, ListenerId};
