use callbridge::application::BridgeRegistry;
use callbridge::config::Config;
use callbridge::domain::call::{BridgeEvent, CallState, Command};
use callbridge::domain::shared::value_objects::SessionId;
use callbridge::infrastructure::loopback::{spawn_echo_router, LoopbackCallSystem};
use callbridge::infrastructure::normalizer::RawNativeEvent;
use callbridge::interface::emitter::BridgeEmitter;
use callbridge::interface::metrics::describe_metrics;
use serde_json::json;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

const DEMO_ROOM: &str = "https://demo.daily.co/callbridge";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Optional config file as first argument
    let config_path = std::env::args().nth(1).map(PathBuf::from);
    let config = Config::load(config_path.as_deref())?;

    // Initialize tracing
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.logging.level))?;
    tracing_subscriber::fmt().with_env_filter(filter).init();

    info!("Starting callbridge demo");
    info!("Configuration loaded: {:?}", config);
    describe_metrics();

    let (loopback, echoes) = LoopbackCallSystem::with_echo();
    let registry = Arc::new(BridgeRegistry::new(
        config.bridge.clone(),
        Arc::new(loopback.with_user_name("Demo User")),
    ));
    let router = spawn_echo_router(echoes, &registry);

    let bridge = registry.create(SessionId::from(DEMO_ROOM)).await?;
    bridge.subscribe(Arc::new(|event: &BridgeEvent| match event.to_json() {
        Ok(json) => info!(sequence = event.sequence, "Event: {}", json),
        Err(e) => warn!(sequence = event.sequence, error = %e, "Failed to encode event"),
    }));
    let delivery = bridge.spawn_delivery();

    demo_call_lifecycle(&registry, &bridge).await?;

    info!(
        "Call finished in state {} after {} events",
        bridge.state(),
        bridge.last_sequence()
    );

    registry.remove(bridge.session_id()).await;
    delivery.await?;
    drop(bridge);
    drop(registry);
    router.await?;

    Ok(())
}

/// Walk one call through join, participant activity, a network drop and leave
async fn demo_call_lifecycle(
    registry: &BridgeRegistry,
    bridge: &BridgeEmitter,
) -> anyhow::Result<()> {
    bridge.dispatch(Command::join(DEMO_ROOM))?;
    wait_for_state(bridge, CallState::Joined).await?;

    let native_events = [
        json!({
            "action": "participant-joined",
            "roomUrl": DEMO_ROOM,
            "participant": { "session_id": "remote-1", "user_name": "Alice", "audio": true, "video": false }
        }),
        json!({
            "action": "track-started",
            "roomUrl": DEMO_ROOM,
            "participant": { "session_id": "remote-1" },
            "track": { "kind": "video" }
        }),
        json!({ "action": "network-quality-change", "roomUrl": DEMO_ROOM, "threshold": "low", "quality": 42 }),
        json!({ "action": "network-connection", "roomUrl": DEMO_ROOM, "type": "sfu", "event": "interrupted" }),
        json!({ "action": "network-connection", "roomUrl": DEMO_ROOM, "type": "sfu", "event": "connected" }),
        // Malformed: dropped by the normalizer, logged, no event
        json!({ "action": "participant-left", "roomUrl": DEMO_ROOM, "participant": {} }),
        json!({
            "action": "participant-left",
            "roomUrl": DEMO_ROOM,
            "participant": { "session_id": "remote-1" }
        }),
    ];

    for event in native_events {
        if let Err(e) = registry.route(&RawNativeEvent::new(event)).await {
            warn!("Native event rejected: {}", e);
        }
    }

    bridge.dispatch(Command::set_audio(DEMO_ROOM, false))?;
    bridge.dispatch(Command::leave(DEMO_ROOM))?;
    wait_for_state(bridge, CallState::Left).await?;

    Ok(())
}

async fn wait_for_state(bridge: &BridgeEmitter, state: CallState) -> anyhow::Result<()> {
    tokio::time::timeout(Duration::from_secs(5), async {
        while bridge.state() != state {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .map_err(|_| anyhow::anyhow!("call did not reach {} in time", state))
}
