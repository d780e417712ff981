//! Call events
//!
//! Two families live here:
//! - [`NativeEvent`]: the canonical form of what the native call system reported,
//!   produced by the normalizer and applied to the [`CallSession`](super::CallSession).
//! - [`BridgeEvent`]: what the bridge publishes to its listeners, stamped with a
//!   sequence number by the delivery queue.

use crate::domain::call::aggregate::CallSession;
use crate::domain::call::entity::Participant;
use crate::domain::call::value_object::{CallRequest, CallState, MediaKind, NetworkQuality};
use crate::domain::shared::events::DomainEvent;
use crate::domain::shared::value_objects::{ParticipantId, SessionId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Canonical native event
#[derive(Debug, Clone, PartialEq)]
pub enum NativeEvent {
    /// Native stack joined the call; may carry the local participant
    Joined { local: Option<Participant> },
    /// Native stack left the call
    Left,
    /// Network connection interrupted
    NetworkLost,
    /// Network connection restored
    Reconnected,
    ParticipantJoined { participant: Participant },
    /// Participant state update; `None` flags are unchanged
    ParticipantUpdated {
        participant_id: ParticipantId,
        display_name: Option<String>,
        audio: Option<bool>,
        video: Option<bool>,
    },
    ParticipantLeft { participant_id: ParticipantId },
    /// A single track started or stopped
    TrackChanged {
        participant_id: ParticipantId,
        media: MediaKind,
        enabled: bool,
    },
    NetworkQuality { quality: NetworkQuality },
    /// Non-fatal camera/microphone failure
    MediaError { message: String },
    /// Unrecoverable failure of the native call
    Fatal { message: String },
    /// Platform call system asked to start, abort or end the call
    CallRequest { request: CallRequest },
}

impl NativeEvent {
    pub fn name(&self) -> &'static str {
        match self {
            NativeEvent::Joined { .. } => "joined",
            NativeEvent::Left => "left",
            NativeEvent::NetworkLost => "network_lost",
            NativeEvent::Reconnected => "reconnected",
            NativeEvent::ParticipantJoined { .. } => "participant_joined",
            NativeEvent::ParticipantUpdated { .. } => "participant_updated",
            NativeEvent::ParticipantLeft { .. } => "participant_left",
            NativeEvent::TrackChanged { .. } => "track_changed",
            NativeEvent::NetworkQuality { .. } => "network_quality",
            NativeEvent::MediaError { .. } => "media_error",
            NativeEvent::Fatal { .. } => "fatal",
            NativeEvent::CallRequest { .. } => "call_request",
        }
    }
}

/// Error conditions surfaced to listeners as `Error` events
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum BridgeFault {
    /// Listener absent or too slow; events in `first_dropped..=last_dropped` were lost
    QueueOverflow {
        dropped: u64,
        first_dropped: u64,
        last_dropped: u64,
    },
    /// Native call system reported an unrecoverable error
    Fatal { message: String },
    /// Network did not recover within the configured window
    ReconnectTimeout { timeout_ms: u64 },
    /// Camera or microphone failure; the call goes on
    Media { message: String },
}

impl BridgeFault {
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            BridgeFault::Fatal { .. } | BridgeFault::ReconnectTimeout { .. }
        )
    }
}

/// Payload of a published event, before sequencing
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EventPayload {
    /// Call state changed; `snapshot` is set on synthetic resync events
    StateChanged {
        previous: Option<CallState>,
        state: CallState,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        snapshot: Option<CallSession>,
    },
    ParticipantJoined {
        participant: Participant,
    },
    ParticipantLeft {
        participant_id: ParticipantId,
    },
    MediaFlagChanged {
        participant_id: ParticipantId,
        media: MediaKind,
        enabled: bool,
    },
    NetworkQualityChanged {
        quality: NetworkQuality,
    },
    Error {
        error: BridgeFault,
    },
    /// The platform call system raised a request the consumer should know about
    CallRequested {
        request: CallRequest,
    },
}

impl EventPayload {
    pub fn state_changed(previous: CallState, state: CallState) -> Self {
        EventPayload::StateChanged {
            previous: Some(previous),
            state,
            snapshot: None,
        }
    }

    /// Full-state resync event for late subscribers
    pub fn snapshot(session: &CallSession) -> Self {
        EventPayload::StateChanged {
            previous: None,
            state: session.state(),
            snapshot: Some(session.clone()),
        }
    }

    /// Wire name of the event
    pub fn name(&self) -> &'static str {
        match self {
            EventPayload::StateChanged { .. } => "state-changed",
            EventPayload::ParticipantJoined { .. } => "participant-joined",
            EventPayload::ParticipantLeft { .. } => "participant-left",
            EventPayload::MediaFlagChanged { .. } => "media-flag-changed",
            EventPayload::NetworkQualityChanged { .. } => "network-quality-changed",
            EventPayload::Error { .. } => "error",
            EventPayload::CallRequested { .. } => "call-requested",
        }
    }
}

/// Sequenced event delivered to bridge listeners
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BridgeEvent {
    pub sequence: u64,
    pub session_id: SessionId,
    pub emitted_at: DateTime<Utc>,
    #[serde(flatten)]
    pub payload: EventPayload,
}

impl BridgeEvent {
    pub fn new(sequence: u64, session_id: SessionId, payload: EventPayload) -> Self {
        Self {
            sequence,
            session_id,
            emitted_at: Utc::now(),
            payload,
        }
    }

    pub fn name(&self) -> &'static str {
        self.payload.name()
    }

    /// Whether this is a synthetic full-state snapshot
    pub fn is_snapshot(&self) -> bool {
        matches!(
            self.payload,
            EventPayload::StateChanged {
                snapshot: Some(_),
                ..
            }
        )
    }

    pub fn is_overflow(&self) -> bool {
        matches!(
            self.payload,
            EventPayload::Error {
                error: BridgeFault::QueueOverflow { .. }
            }
        )
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}

impl DomainEvent for BridgeEvent {
    fn event_type(&self) -> &'static str {
        self.name()
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        self.emitted_at
    }
}
