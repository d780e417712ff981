//! Bridge registry
//!
//! Keeps one bridge per active call session and routes raw native payloads to the
//! session they name. All bridges share the same native call system; commands carry
//! their session id so the native side can tell them apart.

use crate::config::BridgeConfig;
use crate::domain::call::native::NativeCallSystem;
use crate::domain::shared::error::DomainError;
use crate::domain::shared::result::Result;
use crate::domain::shared::value_objects::SessionId;
use crate::infrastructure::normalizer::RawNativeEvent;
use crate::interface::emitter::BridgeEmitter;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{info, warn};

pub struct BridgeRegistry {
    /// Active bridges (session_id -> bridge)
    bridges: Arc<RwLock<HashMap<SessionId, BridgeEmitter>>>,
    config: BridgeConfig,
    native: Arc<dyn NativeCallSystem>,
}

impl BridgeRegistry {
    pub fn new(config: BridgeConfig, native: Arc<dyn NativeCallSystem>) -> Self {
        Self {
            bridges: Arc::new(RwLock::new(HashMap::new())),
            config,
            native,
        }
    }

    /// Create the bridge for a new session
    pub async fn create(&self, session_id: SessionId) -> Result<BridgeEmitter> {
        let mut bridges = self.bridges.write().await;
        if bridges.contains_key(&session_id) {
            return Err(DomainError::AlreadyExists(format!("session {}", session_id)));
        }

        let bridge = BridgeEmitter::new(
            session_id.clone(),
            self.config.clone(),
            Arc::clone(&self.native),
        );
        bridges.insert(session_id.clone(), bridge.clone());

        info!("Registered call bridge: {}", session_id);
        Ok(bridge)
    }

    pub async fn get(&self, session_id: &SessionId) -> Option<BridgeEmitter> {
        self.bridges.read().await.get(session_id).cloned()
    }

    /// Forget a session. Its delivery task, if any, is told to stop.
    pub async fn remove(&self, session_id: &SessionId) -> Option<BridgeEmitter> {
        let removed = self.bridges.write().await.remove(session_id);
        if let Some(bridge) = &removed {
            bridge.shutdown();
            info!("Removed call bridge: {}", session_id);
        }
        removed
    }

    pub async fn sessions(&self) -> Vec<SessionId> {
        self.bridges.read().await.keys().cloned().collect()
    }

    pub async fn len(&self) -> usize {
        self.bridges.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.bridges.read().await.is_empty()
    }

    /// Hand a raw payload to the bridge of the session it names.
    ///
    /// Payloads without a `roomUrl` go to the only registered session, if there is
    /// exactly one.
    pub async fn route(&self, raw: &RawNativeEvent) -> Result<Vec<u64>> {
        let bridge = {
            let bridges = self.bridges.read().await;
            match raw.session_hint() {
                Some(session_id) => bridges.get(&session_id).cloned().ok_or_else(|| {
                    DomainError::NotFound(format!("session {}", session_id))
                })?,
                None if bridges.len() == 1 => match bridges.values().next() {
                    Some(bridge) => bridge.clone(),
                    None => return Err(DomainError::NotFound("session".to_string())),
                },
                None => {
                    warn!(
                        "Cannot route {} without a session ({} active)",
                        raw.action().unwrap_or("<none>"),
                        bridges.len()
                    );
                    return Err(DomainError::ValidationError(
                        "native event does not name a session".to_string(),
                    ));
                }
            }
        };

        bridge.ingest(raw)
    }
}
