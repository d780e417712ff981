//! Call bounded context - the call session lifecycle model

pub mod aggregate;
pub mod command;
pub mod entity;
pub mod event;
pub mod native;
pub mod value_object;

pub use aggregate::CallSession;
pub use command::{CallReport, Command};
pub use entity::Participant;
pub use event::{BridgeEvent, BridgeFault, EventPayload, NativeEvent};
pub use native::NativeCallSystem;
pub use value_object::{CallRequest, CallState, MediaKind, NetworkQuality, NetworkThreshold, Trigger};
