//! Native event normalizer
//!
//! Turns raw native payloads into [`NativeEvent`]s. Payloads are JSON objects tagged
//! with an `action` field, following the media stack's event naming
//! (`joined-meeting`, `participant-joined`, `network-quality-change`, ...), plus the
//! platform call-system requests (`start-call`, `abort-starting-call`, `end-call`).
//!
//! Anything that does not match the expected shape is rejected with a
//! [`NormalizationError`]; nothing half-parsed ever reaches the call session.

use crate::domain::call::entity::Participant;
use crate::domain::call::event::NativeEvent;
use crate::domain::call::value_object::{
    CallRequest, MediaKind, NetworkQuality, NetworkThreshold,
};
use crate::domain::shared::error::NormalizationError;
use crate::domain::shared::value_objects::{ParticipantId, SessionId};
use serde_json::{Map, Value};

/// Key the native side uses for the local participant
const LOCAL_PARTICIPANT_ID: &str = "local";

/// Field carrying the session (room URL) a payload belongs to
const SESSION_FIELD: &str = "roomUrl";

/// Raw payload as received from the native side
#[derive(Debug, Clone, PartialEq)]
pub struct RawNativeEvent(Value);

impl RawNativeEvent {
    pub fn new(value: Value) -> Self {
        Self(value)
    }

    /// Parse a payload delivered as JSON text
    pub fn from_json(text: &str) -> Result<Self, NormalizationError> {
        serde_json::from_str(text)
            .map(Self)
            .map_err(|e| NormalizationError::InvalidJson(e.to_string()))
    }

    /// The `action` tag, if present, for logging
    pub fn action(&self) -> Option<&str> {
        self.0.get("action").and_then(Value::as_str)
    }

    /// Session named by the payload, if any
    pub fn session_hint(&self) -> Option<SessionId> {
        self.0
            .get(SESSION_FIELD)
            .and_then(Value::as_str)
            .map(SessionId::from)
    }

    pub fn as_value(&self) -> &Value {
        &self.0
    }
}

impl From<Value> for RawNativeEvent {
    fn from(value: Value) -> Self {
        Self(value)
    }
}

/// Normalizer bound to one call session
#[derive(Debug, Clone)]
pub struct EventNormalizer {
    session_id: SessionId,
}

impl EventNormalizer {
    pub fn new(session_id: SessionId) -> Self {
        Self { session_id }
    }

    pub fn session_id(&self) -> &SessionId {
        &self.session_id
    }

    /// Convert a raw payload into its canonical form
    pub fn normalize(&self, raw: &RawNativeEvent) -> Result<NativeEvent, NormalizationError> {
        let object = raw.as_value().as_object().ok_or(NormalizationError::NotAnObject)?;

        let action = match object.get("action") {
            Some(Value::String(action)) => action.as_str(),
            Some(_) => {
                return Err(NormalizationError::UnexpectedType {
                    action: "<unknown>".to_string(),
                    field: "action".to_string(),
                    expected: "a string",
                })
            }
            None => {
                return Err(NormalizationError::MissingField {
                    action: "<unknown>".to_string(),
                    field: "action".to_string(),
                })
            }
        };

        let fields = Fields { action, object };
        self.check_session(&fields)?;

        match action {
            "joined-meeting" => {
                let local = match fields.optional_object("participants")? {
                    Some(participants) => {
                        let participants = Fields {
                            action,
                            object: participants,
                        };
                        participants
                            .optional_object(LOCAL_PARTICIPANT_ID)?
                            .map(|local| parse_participant(action, local, true))
                            .transpose()?
                    }
                    None => None,
                };
                Ok(NativeEvent::Joined { local })
            }

            "left-meeting" => Ok(NativeEvent::Left),

            "participant-joined" => {
                let participant = parse_participant(action, fields.object("participant")?, false)?;
                Ok(NativeEvent::ParticipantJoined { participant })
            }

            "participant-updated" => {
                let participant = Fields {
                    action,
                    object: fields.object("participant")?,
                };
                Ok(NativeEvent::ParticipantUpdated {
                    participant_id: ParticipantId::from(participant.string("session_id")?),
                    display_name: participant.optional_string("user_name")?.map(str::to_string),
                    audio: participant.optional_bool("audio")?,
                    video: participant.optional_bool("video")?,
                })
            }

            "participant-left" => {
                let participant = Fields {
                    action,
                    object: fields.object("participant")?,
                };
                Ok(NativeEvent::ParticipantLeft {
                    participant_id: ParticipantId::from(participant.string("session_id")?),
                })
            }

            "track-started" | "track-stopped" => {
                let participant = Fields {
                    action,
                    object: fields.object("participant")?,
                };
                let track = Fields {
                    action,
                    object: fields.object("track")?,
                };
                let media = match track.string("kind")? {
                    "audio" => MediaKind::Audio,
                    "video" => MediaKind::Video,
                    other => return Err(fields.unsupported("track.kind", other)),
                };

                Ok(NativeEvent::TrackChanged {
                    participant_id: ParticipantId::from(participant.string("session_id")?),
                    media,
                    enabled: action == "track-started",
                })
            }

            "network-quality-change" => {
                let threshold = fields.string("threshold")?;
                let threshold = NetworkThreshold::parse(threshold)
                    .ok_or_else(|| fields.unsupported("threshold", threshold))?;

                Ok(NativeEvent::NetworkQuality {
                    quality: NetworkQuality {
                        threshold,
                        score: fields.optional_number("quality")?,
                    },
                })
            }

            "network-connection" => match fields.string("event")? {
                "interrupted" => Ok(NativeEvent::NetworkLost),
                "connected" => Ok(NativeEvent::Reconnected),
                other => Err(fields.unsupported("event", other)),
            },

            "camera-error" => {
                let message = fields
                    .optional_string("errorMsg")?
                    .unwrap_or("camera or microphone unavailable")
                    .to_string();
                Ok(NativeEvent::MediaError { message })
            }

            "error" => Ok(NativeEvent::Fatal {
                message: fields.string("errorMsg")?.to_string(),
            }),

            // Call-system requests always name their room
            "start-call" | "abort-starting-call" | "end-call" => {
                fields.string(SESSION_FIELD)?;
                let request = match action {
                    "start-call" => CallRequest::Start,
                    "abort-starting-call" => CallRequest::AbortStart,
                    _ => CallRequest::End,
                };
                Ok(NativeEvent::CallRequest { request })
            }

            other => Err(NormalizationError::UnknownAction(other.to_string())),
        }
    }

    fn check_session(&self, fields: &Fields<'_>) -> Result<(), NormalizationError> {
        match fields.optional_string(SESSION_FIELD)? {
            Some(room) if room != self.session_id.as_str() => {
                Err(NormalizationError::ForeignSession {
                    expected: self.session_id.to_string(),
                    actual: room.to_string(),
                })
            }
            _ => Ok(()),
        }
    }
}

fn parse_participant(
    action: &str,
    object: &Map<String, Value>,
    local: bool,
) -> Result<Participant, NormalizationError> {
    let fields = Fields { action, object };

    let id = if local {
        fields
            .optional_string("session_id")?
            .unwrap_or(LOCAL_PARTICIPANT_ID)
    } else {
        fields.string("session_id")?
    };

    let participant = Participant::new(
        ParticipantId::from(id),
        fields.optional_string("user_name")?.map(str::to_string),
    )
    .with_media(
        fields.optional_bool("audio")?.unwrap_or(false),
        fields.optional_bool("video")?.unwrap_or(false),
    )
    .with_local(local || fields.optional_bool("local")?.unwrap_or(false));

    Ok(participant)
}

/// Typed accessors over one JSON object, attributing failures to `action`
struct Fields<'a> {
    action: &'a str,
    object: &'a Map<String, Value>,
}

impl<'a> Fields<'a> {
    fn missing(&self, field: &str) -> NormalizationError {
        NormalizationError::MissingField {
            action: self.action.to_string(),
            field: field.to_string(),
        }
    }

    fn mistyped(&self, field: &str, expected: &'static str) -> NormalizationError {
        NormalizationError::UnexpectedType {
            action: self.action.to_string(),
            field: field.to_string(),
            expected,
        }
    }

    fn unsupported(&self, field: &str, value: &str) -> NormalizationError {
        NormalizationError::UnsupportedValue {
            action: self.action.to_string(),
            field: field.to_string(),
            value: value.to_string(),
        }
    }

    /// Required, non-empty string
    fn string(&self, field: &str) -> Result<&'a str, NormalizationError> {
        match self.optional_string(field)? {
            Some(value) if !value.is_empty() => Ok(value),
            _ => Err(self.missing(field)),
        }
    }

    fn optional_string(&self, field: &str) -> Result<Option<&'a str>, NormalizationError> {
        match self.object.get(field) {
            None | Some(Value::Null) => Ok(None),
            Some(Value::String(value)) => Ok(Some(value.as_str())),
            Some(_) => Err(self.mistyped(field, "a string")),
        }
    }

    fn optional_bool(&self, field: &str) -> Result<Option<bool>, NormalizationError> {
        match self.object.get(field) {
            None | Some(Value::Null) => Ok(None),
            Some(Value::Bool(value)) => Ok(Some(*value)),
            Some(_) => Err(self.mistyped(field, "a boolean")),
        }
    }

    fn optional_number(&self, field: &str) -> Result<Option<f64>, NormalizationError> {
        match self.object.get(field) {
            None | Some(Value::Null) => Ok(None),
            Some(Value::Number(value)) => Ok(value.as_f64()),
            Some(_) => Err(self.mistyped(field, "a number")),
        }
    }

    fn object(&self, field: &str) -> Result<&'a Map<String, Value>, NormalizationError> {
        self.optional_object(field)?
            .ok_or_else(|| self.missing(field))
    }

    fn optional_object(
        &self,
        field: &str,
    ) -> Result<Option<&'a Map<String, Value>>, NormalizationError> {
        match self.object.get(field) {
            None | Some(Value::Null) => Ok(None),
            Some(Value::Object(value)) => Ok(Some(value)),
            Some(_) => Err(self.mistyped(field, "an object")),
        }
    }
}
