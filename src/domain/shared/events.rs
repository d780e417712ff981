//! Domain events infrastructure

use chrono::{DateTime, Utc};

/// Base trait for all events published by the bridge
pub trait DomainEvent: Send + Sync {
    /// Returns the event type name
    fn event_type(&self) -> &'static str;

    /// Returns when the event occurred
    fn occurred_at(&self) -> DateTime<Utc>;
}
