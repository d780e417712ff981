//! Call entities

use crate::domain::call::value_object::MediaKind;
use crate::domain::shared::value_objects::ParticipantId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Participant in a call
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Participant {
    /// Participant identifier (native session id)
    id: ParticipantId,
    /// Display name
    display_name: Option<String>,
    /// Whether this is the participant on this device
    local: bool,
    audio_enabled: bool,
    video_enabled: bool,
    joined_at: DateTime<Utc>,
}

impl Participant {
    pub fn new(id: ParticipantId, display_name: Option<String>) -> Self {
        Self {
            id,
            display_name,
            local: false,
            audio_enabled: false,
            video_enabled: false,
            joined_at: Utc::now(),
        }
    }

    pub fn with_media(mut self, audio_enabled: bool, video_enabled: bool) -> Self {
        self.audio_enabled = audio_enabled;
        self.video_enabled = video_enabled;
        self
    }

    pub fn with_local(mut self, local: bool) -> Self {
        self.local = local;
        self
    }

    pub fn id(&self) -> &ParticipantId {
        &self.id
    }

    pub fn display_name(&self) -> Option<&str> {
        self.display_name.as_deref()
    }

    pub fn set_display_name(&mut self, name: Option<String>) {
        self.display_name = name;
    }

    pub fn is_local(&self) -> bool {
        self.local
    }

    pub fn joined_at(&self) -> &DateTime<Utc> {
        &self.joined_at
    }

    pub fn media_enabled(&self, kind: MediaKind) -> bool {
        match kind {
            MediaKind::Audio => self.audio_enabled,
            MediaKind::Video => self.video_enabled,
        }
    }

    /// Set a media flag, returning whether it actually changed
    pub fn set_media_enabled(&mut self, kind: MediaKind, enabled: bool) -> bool {
        let flag = match kind {
            MediaKind::Audio => &mut self.audio_enabled,
            MediaKind::Video => &mut self.video_enabled,
        };
        let changed = *flag != enabled;
        *flag = enabled;
        changed
    }
}
