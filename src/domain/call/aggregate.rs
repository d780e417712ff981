//! Call session aggregate root

use crate::domain::call::command::Command;
use crate::domain::call::entity::Participant;
use crate::domain::call::event::{BridgeFault, EventPayload, NativeEvent};
use crate::domain::call::value_object::{
    CallRequest, CallState, MediaKind, NetworkQuality, Trigger,
};
use crate::domain::shared::error::DomainError;
use crate::domain::shared::result::Result;
use crate::domain::shared::value_objects::{ParticipantId, SessionId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Call session aggregate root
///
/// Owns the call state machine and the participant roster. Every mutation goes
/// through [`apply_native_event`](Self::apply_native_event),
/// [`submit_command`](Self::submit_command) or
/// [`expire_reconnect`](Self::expire_reconnect); a rejected input leaves the
/// session untouched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CallSession {
    id: SessionId,
    state: CallState,
    participants: Vec<Participant>,
    created_at: DateTime<Utc>,
    /// Most recent network quality sample
    network_quality: Option<NetworkQuality>,
    /// Message of the failure that ended the call, if any
    last_error: Option<String>,
}

impl CallSession {
    pub fn new(id: SessionId) -> Self {
        Self {
            id,
            state: CallState::Idle,
            participants: Vec::new(),
            created_at: Utc::now(),
            network_quality: None,
            last_error: None,
        }
    }

    /// Validate a consumer command against the current state.
    ///
    /// Join and Leave move the state locally; the native stack confirms later with
    /// an event. Media toggles leave the state as is. Returns the transition taken.
    pub fn submit_command(&mut self, command: &Command) -> Result<Option<(CallState, CallState)>> {
        if command.session_id() != &self.id {
            return Err(DomainError::SessionMismatch {
                expected: self.id.to_string(),
                actual: command.session_id().to_string(),
            });
        }

        if let Some(trigger) = command.trigger() {
            return self.transition(trigger).map(Some);
        }

        if !self.state.accepts_media_commands() {
            return Err(DomainError::invalid_transition(
                self.state,
                format!("command:{}", command.name()),
            ));
        }

        Ok(None)
    }

    /// Apply a canonical native event, returning the payloads to publish
    pub fn apply_native_event(&mut self, event: NativeEvent) -> Result<Vec<EventPayload>> {
        match event {
            NativeEvent::Joined { local } => {
                let (previous, state) = self.transition(Trigger::NativeJoined)?;
                let mut payloads = vec![EventPayload::state_changed(previous, state)];

                if let Some(local) = local {
                    if self.participant(local.id()).is_none() {
                        self.participants.push(local.clone());
                        payloads.push(EventPayload::ParticipantJoined { participant: local });
                    }
                }

                Ok(payloads)
            }

            NativeEvent::Reconnected => {
                if self.state != CallState::Reconnecting {
                    return Err(DomainError::invalid_transition(
                        self.state,
                        "native:reconnected",
                    ));
                }
                self.transition_payload(Trigger::NativeJoined)
            }

            NativeEvent::NetworkLost => self.transition_payload(Trigger::NetworkLoss),

            NativeEvent::Left => self.transition_payload(Trigger::NativeLeft),

            NativeEvent::Fatal { message } => {
                let (previous, state) = self.transition(Trigger::FatalError)?;
                self.last_error = Some(message.clone());

                Ok(vec![
                    EventPayload::state_changed(previous, state),
                    EventPayload::Error {
                        error: BridgeFault::Fatal { message },
                    },
                ])
            }

            NativeEvent::ParticipantJoined { participant } => {
                self.ensure_live("native:participant_joined")?;
                if self.participant(participant.id()).is_some() {
                    return Err(DomainError::AlreadyExists(format!(
                        "participant {}",
                        participant.id()
                    )));
                }

                self.participants.push(participant.clone());
                Ok(vec![EventPayload::ParticipantJoined { participant }])
            }

            NativeEvent::ParticipantUpdated {
                participant_id,
                display_name,
                audio,
                video,
            } => {
                self.ensure_live("native:participant_updated")?;
                let participant = self.participant_mut(&participant_id)?;

                if display_name.is_some() {
                    participant.set_display_name(display_name);
                }

                let mut payloads = Vec::new();
                for (media, flag) in [(MediaKind::Audio, audio), (MediaKind::Video, video)] {
                    if let Some(enabled) = flag {
                        if participant.set_media_enabled(media, enabled) {
                            payloads.push(EventPayload::MediaFlagChanged {
                                participant_id: participant_id.clone(),
                                media,
                                enabled,
                            });
                        }
                    }
                }

                Ok(payloads)
            }

            NativeEvent::ParticipantLeft { participant_id } => {
                self.ensure_live("native:participant_left")?;
                let index = self
                    .participants
                    .iter()
                    .position(|p| p.id() == &participant_id)
                    .ok_or_else(|| {
                        DomainError::NotFound(format!("participant {}", participant_id))
                    })?;

                self.participants.remove(index);
                Ok(vec![EventPayload::ParticipantLeft { participant_id }])
            }

            NativeEvent::TrackChanged {
                participant_id,
                media,
                enabled,
            } => {
                self.ensure_live("native:track_changed")?;
                let participant = self.participant_mut(&participant_id)?;

                if participant.set_media_enabled(media, enabled) {
                    Ok(vec![EventPayload::MediaFlagChanged {
                        participant_id,
                        media,
                        enabled,
                    }])
                } else {
                    Ok(Vec::new())
                }
            }

            NativeEvent::NetworkQuality { quality } => {
                self.ensure_live("native:network_quality")?;
                self.network_quality = Some(quality);
                Ok(vec![EventPayload::NetworkQualityChanged { quality }])
            }

            NativeEvent::MediaError { message } => {
                if self.state.is_terminal() {
                    return Err(DomainError::invalid_transition(self.state, "native:media_error"));
                }
                Ok(vec![EventPayload::Error {
                    error: BridgeFault::Media { message },
                }])
            }

            NativeEvent::CallRequest { request } => self.apply_call_request(request),
        }
    }

    /// A platform request moves the call like the matching consumer command would.
    /// Repeating a request the call is already carrying out only notifies.
    fn apply_call_request(&mut self, request: CallRequest) -> Result<Vec<EventPayload>> {
        let trigger = match (request, self.state) {
            (CallRequest::Start, CallState::Idle) => Some(Trigger::Join),
            (CallRequest::Start, CallState::Joining) => None,
            (CallRequest::AbortStart, CallState::Joining) => Some(Trigger::Leave),
            (
                CallRequest::End,
                CallState::Joining | CallState::Joined | CallState::Reconnecting,
            ) => Some(Trigger::Leave),
            (CallRequest::AbortStart | CallRequest::End, CallState::Leaving) => None,
            (request, state) => {
                return Err(DomainError::invalid_transition(
                    state,
                    format!("native:{}", request),
                ))
            }
        };

        let mut payloads = match trigger {
            Some(trigger) => self.transition_payload(trigger)?,
            None => Vec::new(),
        };
        payloads.push(EventPayload::CallRequested { request });
        Ok(payloads)
    }

    /// Fail a call that stayed in `Reconnecting` past the reconnect window
    pub fn expire_reconnect(&mut self, timeout_ms: u64) -> Result<Vec<EventPayload>> {
        let (previous, state) = self.transition(Trigger::ReconnectTimeout)?;
        self.last_error = Some(format!("network did not recover within {}ms", timeout_ms));

        Ok(vec![
            EventPayload::state_changed(previous, state),
            EventPayload::Error {
                error: BridgeFault::ReconnectTimeout { timeout_ms },
            },
        ])
    }

    fn transition(&mut self, trigger: Trigger) -> Result<(CallState, CallState)> {
        let next = self
            .state
            .next(trigger)
            .ok_or_else(|| DomainError::invalid_transition(self.state, trigger.as_str()))?;

        let previous = self.state;
        self.state = next;
        Ok((previous, next))
    }

    fn transition_payload(&mut self, trigger: Trigger) -> Result<Vec<EventPayload>> {
        let (previous, state) = self.transition(trigger)?;
        Ok(vec![EventPayload::state_changed(previous, state)])
    }

    fn ensure_live(&self, trigger: &str) -> Result<()> {
        if self.state.accepts_activity() {
            Ok(())
        } else {
            Err(DomainError::invalid_transition(self.state, trigger))
        }
    }

    fn participant_mut(&mut self, id: &ParticipantId) -> Result<&mut Participant> {
        self.participants
            .iter_mut()
            .find(|p| p.id() == id)
            .ok_or_else(|| DomainError::NotFound(format!("participant {}", id)))
    }

    // Getters
    pub fn id(&self) -> &SessionId {
        &self.id
    }

    pub fn state(&self) -> CallState {
        self.state
    }

    pub fn participants(&self) -> &[Participant] {
        &self.participants
    }

    pub fn participant(&self, id: &ParticipantId) -> Option<&Participant> {
        self.participants.iter().find(|p| p.id() == id)
    }

    pub fn created_at(&self) -> &DateTime<Utc> {
        &self.created_at
    }

    pub fn network_quality(&self) -> Option<&NetworkQuality> {
        self.network_quality.as_ref()
    }

    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    pub fn is_terminal(&self) -> bool {
        self.state.is_terminal()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::call::value_object::NetworkThreshold;

    fn session() -> CallSession {
        CallSession::new(SessionId::from("room-a"))
    }

    fn joined_session() -> CallSession {
        let mut session = session();
        session.submit_command(&Command::join("room-a")).unwrap();
        session
            .apply_native_event(NativeEvent::Joined { local: None })
            .unwrap();
        session
    }

    fn remote(id: &str) -> Participant {
        Participant::new(ParticipantId::from(id), Some(id.to_uppercase())).with_media(true, true)
    }

    #[test]
    fn test_call_lifecycle() {
        let mut session = session();
        assert_eq!(session.state(), CallState::Idle);

        let transition = session.submit_command(&Command::join("room-a")).unwrap();
        assert_eq!(transition, Some((CallState::Idle, CallState::Joining)));

        let payloads = session
            .apply_native_event(NativeEvent::Joined { local: None })
            .unwrap();
        assert_eq!(
            payloads,
            vec![EventPayload::state_changed(CallState::Joining, CallState::Joined)]
        );

        session.apply_native_event(NativeEvent::NetworkLost).unwrap();
        assert_eq!(session.state(), CallState::Reconnecting);

        session.apply_native_event(NativeEvent::Reconnected).unwrap();
        assert_eq!(session.state(), CallState::Joined);

        session.submit_command(&Command::leave("room-a")).unwrap();
        assert_eq!(session.state(), CallState::Leaving);

        session.apply_native_event(NativeEvent::Left).unwrap();
        assert_eq!(session.state(), CallState::Left);
        assert!(session.is_terminal());
    }

    #[test]
    fn test_join_confirmation_while_idle_is_rejected() {
        let mut session = session();

        let result = session.apply_native_event(NativeEvent::Joined { local: None });
        assert!(matches!(
            result,
            Err(DomainError::InvalidTransition {
                state: CallState::Idle,
                ..
            })
        ));
        assert_eq!(session.state(), CallState::Idle);
    }

    #[test]
    fn test_leave_while_idle_is_rejected() {
        let mut session = session();
        let result = session.submit_command(&Command::leave("room-a"));
        assert!(matches!(result, Err(DomainError::InvalidTransition { .. })));
        assert_eq!(session.state(), CallState::Idle);
    }

    #[test]
    fn test_command_for_other_session_is_rejected() {
        let mut session = session();
        let result = session.submit_command(&Command::join("room-b"));
        assert!(matches!(result, Err(DomainError::SessionMismatch { .. })));
        assert_eq!(session.state(), CallState::Idle);
    }

    #[test]
    fn test_media_commands_require_live_call() {
        let mut session = session();
        assert!(session.submit_command(&Command::set_audio("room-a", false)).is_err());

        let mut session = joined_session();
        assert_eq!(
            session.submit_command(&Command::set_video("room-a", false)).unwrap(),
            None
        );
        assert_eq!(session.state(), CallState::Joined);
    }

    #[test]
    fn test_local_participant_added_on_join() {
        let mut session = session();
        session.submit_command(&Command::join("room-a")).unwrap();

        let local = Participant::new(ParticipantId::from("local"), None).with_local(true);
        let payloads = session
            .apply_native_event(NativeEvent::Joined { local: Some(local) })
            .unwrap();

        assert_eq!(payloads.len(), 2);
        assert!(matches!(payloads[1], EventPayload::ParticipantJoined { .. }));
        assert!(session.participants()[0].is_local());
    }

    #[test]
    fn test_platform_call_requests() {
        let mut session = session();
        let payloads = session
            .apply_native_event(NativeEvent::CallRequest {
                request: CallRequest::Start,
            })
            .unwrap();
        assert_eq!(
            payloads,
            vec![
                EventPayload::state_changed(CallState::Idle, CallState::Joining),
                EventPayload::CallRequested {
                    request: CallRequest::Start
                },
            ]
        );

        // Start repeated while joining only notifies
        let payloads = session
            .apply_native_event(NativeEvent::CallRequest {
                request: CallRequest::Start,
            })
            .unwrap();
        assert_eq!(payloads.len(), 1);
        assert_eq!(session.state(), CallState::Joining);

        session
            .apply_native_event(NativeEvent::CallRequest {
                request: CallRequest::AbortStart,
            })
            .unwrap();
        assert_eq!(session.state(), CallState::Leaving);

        session.apply_native_event(NativeEvent::Left).unwrap();
        let result = session.apply_native_event(NativeEvent::CallRequest {
            request: CallRequest::End,
        });
        assert!(matches!(
            result,
            Err(DomainError::InvalidTransition {
                state: CallState::Left,
                ..
            })
        ));
    }

    #[test]
    fn test_abort_after_join_is_rejected() {
        let mut session = joined_session();
        let result = session.apply_native_event(NativeEvent::CallRequest {
            request: CallRequest::AbortStart,
        });
        assert!(matches!(result, Err(DomainError::InvalidTransition { .. })));
        assert_eq!(session.state(), CallState::Joined);

        let payloads = session
            .apply_native_event(NativeEvent::CallRequest {
                request: CallRequest::End,
            })
            .unwrap();
        assert_eq!(
            payloads[0],
            EventPayload::state_changed(CallState::Joined, CallState::Leaving)
        );
    }

    #[test]
    fn test_participant_roster() {
        let mut session = joined_session();

        session
            .apply_native_event(NativeEvent::ParticipantJoined {
                participant: remote("p-1"),
            })
            .unwrap();
        assert_eq!(session.participants().len(), 1);

        let duplicate = session.apply_native_event(NativeEvent::ParticipantJoined {
            participant: remote("p-1"),
        });
        assert!(matches!(duplicate, Err(DomainError::AlreadyExists(_))));
        assert_eq!(session.participants().len(), 1);

        let payloads = session
            .apply_native_event(NativeEvent::ParticipantLeft {
                participant_id: ParticipantId::from("p-1"),
            })
            .unwrap();
        assert_eq!(payloads.len(), 1);
        assert!(session.participants().is_empty());

        let unknown = session.apply_native_event(NativeEvent::ParticipantLeft {
            participant_id: ParticipantId::from("p-1"),
        });
        assert!(matches!(unknown, Err(DomainError::NotFound(_))));
    }

    #[test]
    fn test_participant_update_emits_only_changed_flags() {
        let mut session = joined_session();
        session
            .apply_native_event(NativeEvent::ParticipantJoined {
                participant: remote("p-1"),
            })
            .unwrap();

        let payloads = session
            .apply_native_event(NativeEvent::ParticipantUpdated {
                participant_id: ParticipantId::from("p-1"),
                display_name: None,
                audio: Some(false),
                video: Some(true),
            })
            .unwrap();

        assert_eq!(
            payloads,
            vec![EventPayload::MediaFlagChanged {
                participant_id: ParticipantId::from("p-1"),
                media: MediaKind::Audio,
                enabled: false,
            }]
        );

        let participant = session.participant(&ParticipantId::from("p-1")).unwrap();
        assert!(!participant.media_enabled(MediaKind::Audio));
        assert!(participant.media_enabled(MediaKind::Video));
    }

    #[test]
    fn test_activity_rejected_outside_live_call() {
        let mut session = session();

        let result = session.apply_native_event(NativeEvent::ParticipantJoined {
            participant: remote("p-1"),
        });
        assert!(matches!(result, Err(DomainError::InvalidTransition { .. })));
        assert!(session.participants().is_empty());

        let result = session.apply_native_event(NativeEvent::NetworkQuality {
            quality: NetworkQuality {
                threshold: NetworkThreshold::Low,
                score: None,
            },
        });
        assert!(result.is_err());
        assert!(session.network_quality().is_none());
    }

    #[test]
    fn test_fatal_error_fails_call() {
        let mut session = joined_session();

        let payloads = session
            .apply_native_event(NativeEvent::Fatal {
                message: "meeting ended".to_string(),
            })
            .unwrap();

        assert_eq!(session.state(), CallState::Failed);
        assert_eq!(session.last_error(), Some("meeting ended"));
        assert_eq!(payloads.len(), 2);

        // Terminal: nothing moves the call any more
        assert!(session.submit_command(&Command::leave("room-a")).is_err());
        assert!(session
            .apply_native_event(NativeEvent::Fatal {
                message: "again".to_string()
            })
            .is_err());
        assert_eq!(session.last_error(), Some("meeting ended"));
    }

    #[test]
    fn test_reconnect_expiry() {
        let mut session = joined_session();
        assert!(session.expire_reconnect(1_000).is_err());

        session.apply_native_event(NativeEvent::NetworkLost).unwrap();
        let payloads = session.expire_reconnect(1_000).unwrap();

        assert_eq!(session.state(), CallState::Failed);
        assert_eq!(
            payloads[1],
            EventPayload::Error {
                error: BridgeFault::ReconnectTimeout { timeout_ms: 1_000 }
            }
        );
    }

    #[test]
    fn test_reconnected_only_from_reconnecting() {
        let mut session = joined_session();
        let result = session.apply_native_event(NativeEvent::Reconnected);
        assert!(matches!(
            result,
            Err(DomainError::InvalidTransition {
                state: CallState::Joined,
                ..
            })
        ));
    }
}
