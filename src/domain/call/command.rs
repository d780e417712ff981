//! Call-control commands issued by the consuming runtime

use crate::domain::call::value_object::{CallRequest, CallState, MediaKind, Trigger};
use crate::domain::shared::value_objects::SessionId;
use serde::{Deserialize, Serialize};

/// Command travelling from the consumer towards the native call system
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "command", rename_all = "snake_case")]
pub enum Command {
    Join { session_id: SessionId },
    Leave { session_id: SessionId },
    SetAudioEnabled { session_id: SessionId, enabled: bool },
    SetVideoEnabled { session_id: SessionId, enabled: bool },
}

impl Command {
    pub fn join(session_id: impl Into<SessionId>) -> Self {
        Command::Join {
            session_id: session_id.into(),
        }
    }

    pub fn leave(session_id: impl Into<SessionId>) -> Self {
        Command::Leave {
            session_id: session_id.into(),
        }
    }

    pub fn set_audio(session_id: impl Into<SessionId>, enabled: bool) -> Self {
        Command::SetAudioEnabled {
            session_id: session_id.into(),
            enabled,
        }
    }

    pub fn set_video(session_id: impl Into<SessionId>, enabled: bool) -> Self {
        Command::SetVideoEnabled {
            session_id: session_id.into(),
            enabled,
        }
    }

    /// Command the native stack has to carry out for a platform call request
    pub fn for_request(session_id: impl Into<SessionId>, request: CallRequest) -> Self {
        match request {
            CallRequest::Start => Command::join(session_id),
            CallRequest::AbortStart | CallRequest::End => Command::leave(session_id),
        }
    }

    pub fn session_id(&self) -> &SessionId {
        match self {
            Command::Join { session_id }
            | Command::Leave { session_id }
            | Command::SetAudioEnabled { session_id, .. }
            | Command::SetVideoEnabled { session_id, .. } => session_id,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Command::Join { .. } => "join",
            Command::Leave { .. } => "leave",
            Command::SetAudioEnabled { .. } => "set_audio_enabled",
            Command::SetVideoEnabled { .. } => "set_video_enabled",
        }
    }

    /// State-machine trigger for commands that move the call state
    pub fn trigger(&self) -> Option<Trigger> {
        match self {
            Command::Join { .. } => Some(Trigger::Join),
            Command::Leave { .. } => Some(Trigger::Leave),
            _ => None,
        }
    }

    /// Media toggle carried by the command, if any
    pub fn media_toggle(&self) -> Option<(MediaKind, bool)> {
        match self {
            Command::SetAudioEnabled { enabled, .. } => Some((MediaKind::Audio, *enabled)),
            Command::SetVideoEnabled { enabled, .. } => Some((MediaKind::Video, *enabled)),
            _ => None,
        }
    }
}

/// Outcome report sent to the platform's call system so it can keep its own call
/// UI (notification, lock screen, connection service) in step with the call
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "report", rename_all = "snake_case")]
pub enum CallReport {
    Started { session_id: SessionId },
    Failed { session_id: SessionId },
    Ended { session_id: SessionId },
}

impl CallReport {
    /// Report owed to the platform for a state change, if any
    pub fn for_transition(
        session_id: &SessionId,
        previous: CallState,
        current: CallState,
    ) -> Option<Self> {
        if previous == current {
            return None;
        }
        let session_id = session_id.clone();
        match (previous, current) {
            (CallState::Joining, CallState::Joined) => Some(CallReport::Started { session_id }),
            (_, CallState::Failed) => Some(CallReport::Failed { session_id }),
            (_, CallState::Left) => Some(CallReport::Ended { session_id }),
            _ => None,
        }
    }

    pub fn session_id(&self) -> &SessionId {
        match self {
            CallReport::Started { session_id }
            | CallReport::Failed { session_id }
            | CallReport::Ended { session_id } => session_id,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            CallReport::Started { .. } => "call_started",
            CallReport::Failed { .. } => "call_failed",
            CallReport::Ended { .. } => "call_ended",
        }
    }
}
