//! Shared kernel - Common types used across the bridge

pub mod error;
pub mod events;
pub mod result;
pub mod value_objects;

pub use error::{DomainError, NormalizationError};
pub use result::Result;
pub use value_objects::*;
