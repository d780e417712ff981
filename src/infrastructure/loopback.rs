//! Loopback native call system
//!
//! In-process stand-in for a real media stack. Records every command it receives
//! and, when echo is enabled, answers with the raw events a real stack would send
//! back once the command took effect. Call reports are recorded as well.

use crate::application::registry::BridgeRegistry;
use crate::domain::call::command::{CallReport, Command};
use crate::domain::call::native::NativeCallSystem;
use crate::infrastructure::normalizer::RawNativeEvent;
use serde_json::json;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

pub struct LoopbackCallSystem {
    sent: Mutex<Vec<Command>>,
    reports: Mutex<Vec<CallReport>>,
    echo: Option<mpsc::UnboundedSender<RawNativeEvent>>,
    user_name: Option<String>,
}

impl LoopbackCallSystem {
    /// Record commands without answering them
    pub fn new() -> Self {
        Self {
            sent: Mutex::new(Vec::new()),
            reports: Mutex::new(Vec::new()),
            echo: None,
            user_name: None,
        }
    }

    /// Record commands and answer them on the returned channel
    pub fn with_echo() -> (Self, mpsc::UnboundedReceiver<RawNativeEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let system = Self {
            echo: Some(tx),
            ..Self::new()
        };
        (system, rx)
    }

    /// Display name reported for the local participant
    pub fn with_user_name(mut self, name: impl Into<String>) -> Self {
        self.user_name = Some(name.into());
        self
    }

    /// Commands received so far, oldest first
    pub fn sent(&self) -> Vec<Command> {
        self.sent
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Call reports received so far, oldest first
    pub fn reports(&self) -> Vec<CallReport> {
        self.reports
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Raw events a media stack emits once `command` has been carried out
    pub fn answer(&self, command: &Command) -> RawNativeEvent {
        let room = command.session_id().as_str();
        let value = match command {
            Command::Join { .. } => json!({
                "action": "joined-meeting",
                "roomUrl": room,
                "participants": {
                    "local": {
                        "session_id": "local",
                        "user_name": self.user_name,
                        "audio": true,
                        "video": true,
                        "local": true,
                    }
                }
            }),
            Command::Leave { .. } => json!({
                "action": "left-meeting",
                "roomUrl": room,
            }),
            Command::SetAudioEnabled { enabled, .. } => json!({
                "action": "participant-updated",
                "roomUrl": room,
                "participant": { "session_id": "local", "audio": enabled },
            }),
            Command::SetVideoEnabled { enabled, .. } => json!({
                "action": "participant-updated",
                "roomUrl": room,
                "participant": { "session_id": "local", "video": enabled },
            }),
        };
        RawNativeEvent::new(value)
    }
}

impl Default for LoopbackCallSystem {
    fn default() -> Self {
        Self::new()
    }
}

impl NativeCallSystem for LoopbackCallSystem {
    fn send_command(&self, command: Command) {
        debug!(
            session_id = %command.session_id(),
            command = command.name(),
            "Loopback received command"
        );

        if let Some(echo) = &self.echo {
            if echo.send(self.answer(&command)).is_err() {
                debug!("Loopback echo receiver dropped");
            }
        }

        self.sent
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(command);
    }

    fn report_call(&self, report: CallReport) {
        debug!(
            session_id = %report.session_id(),
            report = report.name(),
            "Loopback received call report"
        );
        self.reports
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(report);
    }
}

/// Feed echoed events back into the registry.
///
/// Holds the registry weakly, so the task ends once the registry and its bridges
/// are gone and the echo channel closes.
pub fn spawn_echo_router(
    mut events: mpsc::UnboundedReceiver<RawNativeEvent>,
    registry: &Arc<BridgeRegistry>,
) -> JoinHandle<()> {
    let registry = Arc::downgrade(registry);
    tokio::spawn(async move {
        while let Some(raw) = events.recv().await {
            let Some(registry) = registry.upgrade() else {
                break;
            };
            if let Err(e) = registry.route(&raw).await {
                warn!(
                    action = raw.action().unwrap_or("<none>"),
                    error = %e,
                    "Loopback event was not accepted"
                );
            }
        }
    })
}
