//! Domain layer - Core business logic and rules
//!
//! This layer contains:
//! - Aggregates: Consistency boundaries
//! - Entities: Objects with identity
//! - Value Objects: Immutable objects without identity
//! - Ports: Interfaces to the native call system
//! - Domain Events: Things that happened in the domain

pub mod call;
pub mod shared;

// Re-export commonly used types
pub use shared::{DomainError, Result};
