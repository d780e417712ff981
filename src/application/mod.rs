//! Application layer - Use cases and application services
//!
//! This layer coordinates call bridges across sessions.

pub mod registry;

pub use registry::BridgeRegistry;
