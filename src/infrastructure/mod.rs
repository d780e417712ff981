//! Infrastructure layer - Technical implementations
//!
//! This layer contains:
//! - Native payload normalization
//! - The ordered delivery queue
//! - An in-process loopback native call system

pub mod loopback;
pub mod normalizer;
pub mod queue;
