//! Call value objects

use serde::{Deserialize, Serialize};
use std::fmt;

/// Call state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CallState {
    /// No call in progress yet
    Idle,
    /// Join requested, waiting for the native stack to confirm
    Joining,
    /// In the call, media is flowing
    Joined,
    /// Network connection lost, waiting for the native stack to recover
    Reconnecting,
    /// Leave requested, waiting for the native stack to confirm
    Leaving,
    /// Call has ended normally
    Left,
    /// Call ended in an unrecoverable failure
    Failed,
}

impl CallState {
    pub fn as_str(&self) -> &'static str {
        match self {
            CallState::Idle => "idle",
            CallState::Joining => "joining",
            CallState::Joined => "joined",
            CallState::Reconnecting => "reconnecting",
            CallState::Leaving => "leaving",
            CallState::Left => "left",
            CallState::Failed => "failed",
        }
    }

    /// Resolve the state reached from `self` on `trigger`.
    ///
    /// Returns `None` when the trigger is not applicable in this state.
    pub fn next(&self, trigger: Trigger) -> Option<CallState> {
        use CallState::*;

        match (self, trigger) {
            (Idle, Trigger::Join) => Some(Joining),

            (Joining, Trigger::NativeJoined) => Some(Joined),
            (Reconnecting, Trigger::NativeJoined) => Some(Joined),

            (Joined, Trigger::NetworkLoss) => Some(Reconnecting),
            (Reconnecting, Trigger::ReconnectTimeout) => Some(Failed),

            (Joining | Joined | Reconnecting, Trigger::Leave) => Some(Leaving),
            (Leaving, Trigger::NativeLeft) => Some(Left),

            // Nothing leaves a terminal state, not even another fatal error
            (Left | Failed, _) => None,
            (_, Trigger::FatalError) => Some(Failed),

            _ => None,
        }
    }

    pub fn can_transition(&self, trigger: Trigger) -> bool {
        self.next(trigger).is_some()
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, CallState::Left | CallState::Failed)
    }

    /// Participant, media and network activity is only meaningful while the call is live
    pub fn accepts_activity(&self) -> bool {
        matches!(
            self,
            CallState::Joining | CallState::Joined | CallState::Reconnecting | CallState::Leaving
        )
    }

    /// Media toggles can be forwarded to the native stack in these states
    pub fn accepts_media_commands(&self) -> bool {
        matches!(
            self,
            CallState::Joining | CallState::Joined | CallState::Reconnecting
        )
    }
}

impl fmt::Display for CallState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Input driving the call state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Trigger {
    /// Consumer asked to join
    Join,
    /// Consumer asked to leave
    Leave,
    /// Native stack confirmed the call is (again) connected
    NativeJoined,
    /// Native stack lost its network connection
    NetworkLoss,
    /// Native stack confirmed the call has been left
    NativeLeft,
    /// Native stack reported an unrecoverable error
    FatalError,
    /// Reconnect window elapsed without recovery
    ReconnectTimeout,
}

impl Trigger {
    pub fn as_str(&self) -> &'static str {
        match self {
            Trigger::Join => "command:join",
            Trigger::Leave => "command:leave",
            Trigger::NativeJoined => "native:joined",
            Trigger::NetworkLoss => "native:network_loss",
            Trigger::NativeLeft => "native:left",
            Trigger::FatalError => "native:fatal_error",
            Trigger::ReconnectTimeout => "timeout:reconnect",
        }
    }
}

impl fmt::Display for Trigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Call-control request raised by the platform's call system (lock screen, car
/// kit, headset) rather than by the consumer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CallRequest {
    /// Platform wants the call started
    Start,
    /// Platform gave up on a call that was still being set up
    AbortStart,
    /// Platform wants the call ended
    End,
}

impl CallRequest {
    pub fn as_str(&self) -> &'static str {
        match self {
            CallRequest::Start => "start_call",
            CallRequest::AbortStart => "abort_starting_call",
            CallRequest::End => "end_call",
        }
    }
}

impl fmt::Display for CallRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Media track kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    Audio,
    Video,
}

impl MediaKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MediaKind::Audio => "audio",
            MediaKind::Video => "video",
        }
    }
}

/// Coarse network quality bucket reported by the media stack
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum NetworkThreshold {
    Good,
    Low,
    VeryLow,
}

impl NetworkThreshold {
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "good" => Some(NetworkThreshold::Good),
            "low" => Some(NetworkThreshold::Low),
            "very-low" => Some(NetworkThreshold::VeryLow),
            _ => None,
        }
    }
}

/// Network quality sample
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct NetworkQuality {
    pub threshold: NetworkThreshold,
    /// Raw quality score (0-100), when the stack provides one
    pub score: Option<f64>,
}
