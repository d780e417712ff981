//! Bridge emitter
//!
//! The single point of contact between the consuming runtime and a call session.
//!
//! Native side: [`BridgeEmitter::ingest`] normalizes a raw payload, applies it to the
//! call session and sequences the resulting events into the delivery queue.
//!
//! Consumer side: listeners registered with [`BridgeEmitter::subscribe`] receive the
//! queued events in sequence order, either synchronously through
//! [`BridgeEmitter::flush`] or from a tokio task started with
//! [`BridgeEmitter::spawn_delivery`]. Commands go back to the native stack through
//! [`BridgeEmitter::dispatch`], and call outcomes are reported to the platform's call
//! system through [`NativeCallSystem::report_call`].

use crate::config::BridgeConfig;
use crate::domain::call::aggregate::CallSession;
use crate::domain::call::command::{CallReport, Command};
use crate::domain::call::event::{BridgeEvent, EventPayload, NativeEvent};
use crate::domain::call::native::NativeCallSystem;
use crate::domain::call::value_object::CallState;
use crate::domain::shared::result::Result;
use crate::domain::shared::value_objects::SessionId;
use crate::infrastructure::normalizer::{EventNormalizer, RawNativeEvent};
use crate::infrastructure::queue::OrderedQueue;
use crate::interface::listener::{BridgeListener, ListenerId};
use crate::interface::metrics;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Session state and its queue, guarded together so that sequence order is
/// exactly the order in which events were applied.
struct BridgeState {
    session: CallSession,
    queue: OrderedQueue,
    reconnect: Option<ReconnectWindow>,
    reconnect_epoch: u64,
}

#[derive(Debug, Clone, Copy)]
struct ReconnectWindow {
    epoch: u64,
    deadline: Instant,
}

struct ListenerEntry {
    id: ListenerId,
    listener: Arc<dyn BridgeListener>,
    /// Highest sequence number delivered to this listener
    cursor: u64,
    /// Resync events owed to this listener alone, delivered before the queue
    prelude: Vec<BridgeEvent>,
}

struct Inner {
    session_id: SessionId,
    config: BridgeConfig,
    normalizer: EventNormalizer,
    native: Arc<dyn NativeCallSystem>,
    // Lock order: state, then listeners
    state: Mutex<BridgeState>,
    listeners: Mutex<Vec<ListenerEntry>>,
    /// Serializes deliveries so no listener ever sees two flushes interleave
    delivery: Mutex<()>,
    notify: Notify,
    shutdown: AtomicBool,
}

/// Session-scoped bridge between a native call system and its listeners
#[derive(Clone)]
pub struct BridgeEmitter {
    inner: Arc<Inner>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl BridgeEmitter {
    pub fn new(
        session_id: SessionId,
        config: BridgeConfig,
        native: Arc<dyn NativeCallSystem>,
    ) -> Self {
        info!(
            session_id = %session_id,
            queue_capacity = config.queue_capacity,
            reconnect_timeout_ms = config.reconnect_timeout_ms,
            "Creating call bridge"
        );

        let state = BridgeState {
            session: CallSession::new(session_id.clone()),
            queue: OrderedQueue::new(session_id.clone(), config.queue_capacity),
            reconnect: None,
            reconnect_epoch: 0,
        };

        Self {
            inner: Arc::new(Inner {
                normalizer: EventNormalizer::new(session_id.clone()),
                session_id,
                config,
                native,
                state: Mutex::new(state),
                listeners: Mutex::new(Vec::new()),
                delivery: Mutex::new(()),
                notify: Notify::new(),
                shutdown: AtomicBool::new(false),
            }),
        }
    }

    pub fn session_id(&self) -> &SessionId {
        &self.inner.session_id
    }

    pub fn config(&self) -> &BridgeConfig {
        &self.inner.config
    }

    /// Current call state
    pub fn state(&self) -> CallState {
        lock(&self.inner.state).session.state()
    }

    /// Copy of the full call session
    pub fn snapshot(&self) -> CallSession {
        lock(&self.inner.state).session.clone()
    }

    /// Events waiting for at least one listener
    pub fn pending(&self) -> usize {
        lock(&self.inner.state).queue.len()
    }

    /// Highest sequence number issued so far
    pub fn last_sequence(&self) -> u64 {
        lock(&self.inner.state).queue.last_sequence()
    }

    pub fn listener_count(&self) -> usize {
        lock(&self.inner.listeners).len()
    }

    /// Accept a raw payload from the native side.
    ///
    /// Returns the sequence numbers of the events it produced. Malformed payloads
    /// and events that do not fit the current call state are logged and rejected;
    /// they never produce events.
    pub fn ingest(&self, raw: &RawNativeEvent) -> Result<Vec<u64>> {
        let event = match self.inner.normalizer.normalize(raw) {
            Ok(event) => event,
            Err(e) => {
                warn!(
                    session_id = %self.inner.session_id,
                    action = raw.action().unwrap_or("<none>"),
                    error = %e,
                    "Dropping malformed native event"
                );
                metrics::record_normalization_error(e.kind());
                return Err(e.into());
            }
        };

        self.apply_native_event(event)
    }

    /// Accept a raw payload delivered as JSON text
    pub fn ingest_json(&self, text: &str) -> Result<Vec<u64>> {
        match RawNativeEvent::from_json(text) {
            Ok(raw) => self.ingest(&raw),
            Err(e) => {
                warn!(session_id = %self.inner.session_id, error = %e, "Dropping unparsable native event");
                metrics::record_normalization_error(e.kind());
                Err(e.into())
            }
        }
    }

    /// Apply an already-normalized native event
    pub fn apply_native_event(&self, event: NativeEvent) -> Result<Vec<u64>> {
        let name = event.name();
        let request = match &event {
            NativeEvent::CallRequest { request } => Some(*request),
            _ => None,
        };

        let (sequences, follow_up, report) = {
            let mut state = lock(&self.inner.state);
            let previous = state.session.state();

            let payloads = match state.session.apply_native_event(event) {
                Ok(payloads) => payloads,
                Err(e) => {
                    warn!(
                        session_id = %self.inner.session_id,
                        event = name,
                        state = %previous,
                        error = %e,
                        "Rejected native event"
                    );
                    metrics::record_rejected("native", e.kind());
                    return Err(e);
                }
            };

            let current = state.session.state();
            if previous != current {
                info!(
                    session_id = %self.inner.session_id,
                    from = %previous,
                    to = %current,
                    "Call state changed"
                );
            }
            self.track_reconnect_window(&mut state, previous, current);

            // A platform request that moved the call still has to reach the media stack
            let follow_up = request
                .filter(|_| previous != current)
                .map(|request| Command::for_request(self.inner.session_id.clone(), request));
            let report = CallReport::for_transition(&self.inner.session_id, previous, current);

            (self.publish(&mut state, payloads), follow_up, report)
        };

        if let Some(command) = follow_up {
            info!(
                session_id = %self.inner.session_id,
                command = command.name(),
                "Forwarding platform call request"
            );
            self.inner.native.send_command(command);
        }
        if let Some(report) = report {
            self.report(report);
        }

        self.inner.notify.notify_one();
        Ok(sequences)
    }

    /// Validate a command against the call state and forward it to the native stack.
    ///
    /// Forwarding is fire-and-forget; the outcome arrives later as a native event.
    pub fn dispatch(&self, command: Command) -> Result<()> {
        {
            let mut state = lock(&self.inner.state);
            let previous = state.session.state();

            match state.session.submit_command(&command) {
                Ok(Some((from, to))) => {
                    info!(
                        session_id = %self.inner.session_id,
                        command = command.name(),
                        from = %from,
                        to = %to,
                        "Command accepted"
                    );
                    self.track_reconnect_window(&mut state, previous, to);
                }
                Ok(None) => {
                    if let Some((media, enabled)) = command.media_toggle() {
                        debug!(
                            session_id = %self.inner.session_id,
                            media = media.as_str(),
                            enabled,
                            "Media command accepted"
                        );
                    }
                }
                Err(e) => {
                    warn!(
                        session_id = %self.inner.session_id,
                        command = command.name(),
                        state = %previous,
                        error = %e,
                        "Rejected command"
                    );
                    metrics::record_rejected("command", e.kind());
                    return Err(e);
                }
            }
        }

        self.inner.native.send_command(command);
        Ok(())
    }

    /// Register a listener.
    ///
    /// A listener joining a session that already has history first receives a
    /// synthetic `StateChanged` event carrying the full session, followed by copies
    /// of the error events still queued (overflow marker, fatal errors). Other
    /// queued events are not replayed to it. The snapshot and the copies take fresh
    /// sequence numbers and reach only the new listener.
    pub fn subscribe(&self, listener: Arc<dyn BridgeListener>) -> ListenerId {
        let id = ListenerId::new();
        {
            let mut state = lock(&self.inner.state);
            let has_history =
                state.queue.last_sequence() > 0 || state.session.state() != CallState::Idle;

            let prelude = if has_history {
                self.resync_events(&mut state)
            } else {
                Vec::new()
            };
            let cursor = prelude
                .last()
                .map_or(state.queue.last_sequence(), |event| event.sequence);
            let replayed = prelude.len().saturating_sub(1);

            lock(&self.inner.listeners).push(ListenerEntry {
                id,
                listener,
                cursor,
                prelude,
            });

            info!(
                session_id = %self.inner.session_id,
                listener_id = %id,
                snapshot = has_history,
                replayed,
                "Listener subscribed"
            );
        }

        self.inner.notify.notify_one();
        id
    }

    /// Stop delivering to a listener. Queued events stay in the queue.
    pub fn unsubscribe(&self, id: ListenerId) -> bool {
        let mut listeners = lock(&self.inner.listeners);
        let before = listeners.len();
        listeners.retain(|entry| entry.id != id);
        let removed = listeners.len() != before;

        if removed {
            info!(session_id = %self.inner.session_id, listener_id = %id, "Listener unsubscribed");
        }
        removed
    }

    /// Deliver every queued event to every listener, in sequence order.
    ///
    /// Returns the number of (listener, event) deliveries made.
    pub fn flush(&self) -> usize {
        let _delivery = lock(&self.inner.delivery);
        let mut delivered = 0;

        loop {
            let batch: Vec<_> = {
                let state = lock(&self.inner.state);
                let mut listeners = lock(&self.inner.listeners);
                listeners
                    .iter_mut()
                    .filter_map(|entry| {
                        let mut events = std::mem::take(&mut entry.prelude);
                        events.extend(state.queue.events_after(entry.cursor).cloned());
                        if events.is_empty() {
                            None
                        } else {
                            Some((entry.id, Arc::clone(&entry.listener), events))
                        }
                    })
                    .collect()
            };

            if batch.is_empty() {
                break;
            }

            // Listeners run without any bridge lock held
            for (id, listener, events) in batch {
                for event in &events {
                    listener.on_event(event);
                }
                delivered += events.len();

                if let Some(last) = events.last() {
                    let mut listeners = lock(&self.inner.listeners);
                    if let Some(entry) = listeners.iter_mut().find(|entry| entry.id == id) {
                        entry.cursor = entry.cursor.max(last.sequence);
                    }
                }
            }

            self.acknowledge_delivered();
        }

        if delivered > 0 {
            metrics::record_delivered(delivered);
            debug!(session_id = %self.inner.session_id, delivered, "Flushed events");
        }
        delivered
    }

    /// Fail the call if it has been reconnecting for longer than the configured window.
    ///
    /// The tokio timer armed on entering `Reconnecting` does this automatically; this
    /// is for callers driving the bridge without a runtime.
    pub fn check_timeouts(&self) -> Result<Vec<u64>> {
        let expired = {
            let state = lock(&self.inner.state);
            state
                .reconnect
                .filter(|window| Instant::now() >= window.deadline)
                .map(|window| window.epoch)
        };

        match expired {
            Some(epoch) => self.expire_reconnect(epoch),
            None => Ok(Vec::new()),
        }
    }

    /// Run delivery on a tokio task, woken whenever new events are queued
    pub fn spawn_delivery(&self) -> JoinHandle<()> {
        let emitter = self.clone();
        tokio::spawn(async move {
            debug!(session_id = %emitter.inner.session_id, "Delivery task started");
            loop {
                emitter.flush();
                if emitter.inner.shutdown.load(Ordering::Acquire) {
                    break;
                }
                emitter.inner.notify.notified().await;
            }
            debug!(session_id = %emitter.inner.session_id, "Delivery task stopped");
        })
    }

    /// Stop the delivery task after one last flush
    pub fn shutdown(&self) {
        self.inner.shutdown.store(true, Ordering::Release);
        self.inner.notify.notify_one();
    }

    fn publish(&self, state: &mut BridgeState, payloads: Vec<EventPayload>) -> Vec<u64> {
        let dropped_before = state.queue.dropped_total();

        let sequences = payloads
            .into_iter()
            .map(|payload| state.queue.enqueue(payload))
            .collect();

        let dropped = state.queue.dropped_total() - dropped_before;
        if dropped > 0 {
            metrics::record_queue_dropped(dropped);
        }
        metrics::update_queue_depth(state.queue.len());
        sequences
    }

    fn acknowledge_delivered(&self) {
        let mut state = lock(&self.inner.state);
        let listeners = lock(&self.inner.listeners);

        // Nobody listening: keep everything for the next subscriber
        if let Some(cursor) = listeners.iter().map(|entry| entry.cursor).min() {
            state.queue.acknowledge(cursor);
            metrics::update_queue_depth(state.queue.len());
        }
    }

    /// Arm the reconnect timer when entering `Reconnecting`, disarm it when leaving
    fn track_reconnect_window(&self, state: &mut BridgeState, previous: CallState, current: CallState) {
        if current != CallState::Reconnecting {
            state.reconnect = None;
            return;
        }
        if previous == CallState::Reconnecting {
            return;
        }

        state.reconnect_epoch += 1;
        let window = ReconnectWindow {
            epoch: state.reconnect_epoch,
            deadline: Instant::now() + self.inner.config.reconnect_timeout(),
        };
        state.reconnect = Some(window);

        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                let weak: Weak<Inner> = Arc::downgrade(&self.inner);
                handle.spawn(async move {
                    tokio::time::sleep_until(window.deadline).await;
                    if let Some(inner) = weak.upgrade() {
                        // A stale window is a no-op, nothing to report
                        let _ = BridgeEmitter { inner }.expire_reconnect(window.epoch);
                    }
                });
            }
            Err(_) => {
                debug!(
                    session_id = %self.inner.session_id,
                    "No tokio runtime, reconnect timeout relies on check_timeouts"
                );
            }
        }
    }

    fn expire_reconnect(&self, epoch: u64) -> Result<Vec<u64>> {
        let (sequences, report) = {
            let mut state = lock(&self.inner.state);
            match state.reconnect {
                Some(window) if window.epoch == epoch => {}
                _ => return Ok(Vec::new()),
            }
            state.reconnect = None;

            let previous = state.session.state();
            let timeout_ms = self.inner.config.reconnect_timeout_ms;
            let payloads = state.session.expire_reconnect(timeout_ms)?;
            warn!(
                session_id = %self.inner.session_id,
                timeout_ms,
                "Network did not recover in time, call failed"
            );

            let report =
                CallReport::for_transition(&self.inner.session_id, previous, state.session.state());
            (self.publish(&mut state, payloads), report)
        };

        if let Some(report) = report {
            self.report(report);
        }

        self.inner.notify.notify_one();
        Ok(sequences)
    }

    /// Snapshot plus copies of the queued error events, numbered after everything
    /// issued so far
    fn resync_events(&self, state: &mut BridgeState) -> Vec<BridgeEvent> {
        let retained: Vec<EventPayload> = state
            .queue
            .drain()
            .filter(|event| matches!(event.payload, EventPayload::Error { .. }))
            .map(|event| event.payload.clone())
            .collect();

        let snapshot = EventPayload::snapshot(&state.session);
        std::iter::once(snapshot)
            .chain(retained)
            .map(|payload| {
                let sequence = state.queue.reserve_sequence();
                BridgeEvent::new(sequence, self.inner.session_id.clone(), payload)
            })
            .collect()
    }

    fn report(&self, report: CallReport) {
        info!(
            session_id = %self.inner.session_id,
            report = report.name(),
            "Reporting call outcome"
        );
        self.inner.native.report_call(report);
    }
}

impl std::fmt::Debug for BridgeEmitter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BridgeEmitter")
            .field("session_id", &self.inner.session_id)
            .field("state", &self.state())
            .field("listeners", &self.listener_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::call::event::BridgeFault;
    use crate::domain::call::native::MockNativeCallSystem;
    use crate::domain::call::value_object::CallRequest;
    use crate::domain::shared::error::DomainError;
    use serde_json::json;

    const ROOM: &str = "https://example.daily.co/room";

    fn config() -> BridgeConfig {
        BridgeConfig {
            reconnect_timeout_ms: 1_000,
            queue_capacity: 8,
        }
    }

    fn bridge_with(native: MockNativeCallSystem, config: BridgeConfig) -> BridgeEmitter {
        BridgeEmitter::new(SessionId::from(ROOM), config, Arc::new(native))
    }

    fn accepting_native() -> MockNativeCallSystem {
        let mut native = MockNativeCallSystem::new();
        native.expect_send_command().returning(|_| ());
        native.expect_report_call().returning(|_| ());
        native
    }

    fn recorder() -> (Arc<dyn BridgeListener>, Arc<Mutex<Vec<BridgeEvent>>>) {
        let events = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&events);
        let listener = move |event: &BridgeEvent| sink.lock().unwrap().push(event.clone());
        (Arc::new(listener), events)
    }

    fn raw(value: serde_json::Value) -> RawNativeEvent {
        RawNativeEvent::new(value)
    }

    fn join(bridge: &BridgeEmitter) {
        bridge.dispatch(Command::join(ROOM)).unwrap();
        bridge.ingest(&raw(json!({ "action": "joined-meeting" }))).unwrap();
    }

    #[test]
    fn test_join_forwards_command_and_emits_state_change() {
        let mut native = MockNativeCallSystem::new();
        native
            .expect_send_command()
            .withf(|command| matches!(command, Command::Join { .. }))
            .times(1)
            .returning(|_| ());
        native
            .expect_report_call()
            .withf(|report| matches!(report, CallReport::Started { .. }))
            .times(1)
            .returning(|_| ());
        let bridge = bridge_with(native, config());

        let (listener, events) = recorder();
        bridge.subscribe(listener);

        bridge.dispatch(Command::join(ROOM)).unwrap();
        assert_eq!(bridge.state(), CallState::Joining);

        let sequences = bridge.ingest(&raw(json!({ "action": "joined-meeting" }))).unwrap();
        assert_eq!(sequences, vec![1]);
        assert_eq!(bridge.flush(), 1);

        let events = events.lock().unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].sequence, 1);
        assert_eq!(
            events[0].payload,
            EventPayload::state_changed(CallState::Joining, CallState::Joined)
        );
    }

    #[test]
    fn test_rejected_command_is_not_forwarded() {
        let mut native = MockNativeCallSystem::new();
        native.expect_send_command().times(0);
        native.expect_report_call().times(0);
        let bridge = bridge_with(native, config());

        let result = bridge.dispatch(Command::leave(ROOM));
        assert!(matches!(result, Err(DomainError::InvalidTransition { .. })));
        assert_eq!(bridge.state(), CallState::Idle);
    }

    #[test]
    fn test_malformed_payload_produces_no_event() {
        let bridge = bridge_with(accepting_native(), config());
        let (listener, events) = recorder();
        bridge.subscribe(listener);
        join(&bridge);

        let result = bridge.ingest(&raw(json!({
            "action": "participant-joined",
            "participant": { "user_name": "Bob" }
        })));

        assert!(matches!(result, Err(DomainError::Normalization(_))));
        assert!(bridge.snapshot().participants().is_empty());

        bridge.flush();
        assert!(events
            .lock()
            .unwrap()
            .iter()
            .all(|event| !matches!(event.payload, EventPayload::ParticipantJoined { .. })));
    }

    #[test]
    fn test_invalid_native_event_leaves_state_unchanged() {
        let bridge = bridge_with(accepting_native(), config());

        let result = bridge.ingest(&raw(json!({ "action": "joined-meeting" })));
        assert!(matches!(
            result,
            Err(DomainError::InvalidTransition {
                state: CallState::Idle,
                ..
            })
        ));
        assert_eq!(bridge.state(), CallState::Idle);
        assert_eq!(bridge.last_sequence(), 0);
    }

    #[test]
    fn test_late_subscriber_starts_with_snapshot() {
        let bridge = bridge_with(accepting_native(), config());
        join(&bridge);
        bridge
            .ingest(&raw(json!({
                "action": "participant-joined",
                "participant": { "session_id": "p-1", "audio": true }
            })))
            .unwrap();

        let (listener, events) = recorder();
        bridge.subscribe(listener);
        bridge.flush();

        let events = events.lock().unwrap();
        assert_eq!(events.len(), 1);
        assert!(events[0].is_snapshot());
        match &events[0].payload {
            EventPayload::StateChanged {
                previous,
                state,
                snapshot: Some(snapshot),
            } => {
                assert_eq!(*previous, None);
                assert_eq!(*state, CallState::Joined);
                assert_eq!(snapshot.participants().len(), 1);
            }
            other => panic!("expected snapshot, got {:?}", other),
        }

        // Backlog superseded by the snapshot has been released
        assert_eq!(bridge.pending(), 0);
    }

    #[test]
    fn test_first_subscriber_of_fresh_session_gets_no_snapshot() {
        let bridge = bridge_with(accepting_native(), config());
        let (listener, events) = recorder();
        bridge.subscribe(listener);

        assert_eq!(bridge.flush(), 0);
        assert!(events.lock().unwrap().is_empty());
        assert_eq!(bridge.last_sequence(), 0);
    }

    #[test]
    fn test_unsubscribe_stops_delivery_and_retains_events() {
        let bridge = bridge_with(accepting_native(), config());
        let (listener, events) = recorder();
        let id = bridge.subscribe(listener);

        join(&bridge);
        bridge.flush();
        assert_eq!(events.lock().unwrap().len(), 1);

        assert!(bridge.unsubscribe(id));
        assert!(!bridge.unsubscribe(id));

        bridge
            .ingest(&raw(json!({ "action": "network-quality-change", "threshold": "low" })))
            .unwrap();
        assert_eq!(bridge.flush(), 0);
        assert_eq!(events.lock().unwrap().len(), 1);
        assert_eq!(bridge.pending(), 1);
    }

    #[test]
    fn test_late_snapshot_only_reaches_new_listener() {
        let bridge = bridge_with(accepting_native(), config());
        let (first, first_events) = recorder();
        bridge.subscribe(first);
        join(&bridge);
        bridge.flush();

        // Two listeners arrive late, each gets its own snapshot
        let (second, second_events) = recorder();
        bridge.subscribe(second);
        let (third, third_events) = recorder();
        bridge.subscribe(third);
        bridge
            .ingest(&raw(json!({ "action": "network-quality-change", "threshold": "low" })))
            .unwrap();
        bridge.flush();
        bridge.flush();

        let sequences = |events: &Arc<Mutex<Vec<BridgeEvent>>>| -> Vec<u64> {
            events.lock().unwrap().iter().map(|e| e.sequence).collect()
        };
        assert_eq!(sequences(&first_events), vec![1, 4]);
        assert_eq!(sequences(&second_events), vec![2, 4]);
        assert_eq!(sequences(&third_events), vec![3, 4]);

        assert!(first_events.lock().unwrap().iter().all(|e| !e.is_snapshot()));
        assert!(second_events.lock().unwrap()[0].is_snapshot());
        assert!(third_events.lock().unwrap()[0].is_snapshot());
        assert_eq!(bridge.pending(), 0);
    }

    #[test]
    fn test_resubscribed_listener_receives_errors_queued_while_away() {
        let bridge = bridge_with(
            accepting_native(),
            BridgeConfig {
                queue_capacity: 3,
                ..config()
            },
        );
        let (listener, events) = recorder();
        let id = bridge.subscribe(listener);
        join(&bridge);
        bridge.flush();
        assert!(bridge.unsubscribe(id));

        for _ in 0..4 {
            bridge
                .ingest(&raw(json!({ "action": "network-quality-change", "threshold": "low" })))
                .unwrap();
        }
        bridge
            .ingest(&raw(json!({ "action": "error", "errorMsg": "boom" })))
            .unwrap();
        assert_eq!(bridge.state(), CallState::Failed);

        let (listener, events_after) = recorder();
        bridge.subscribe(listener);
        bridge.flush();

        assert_eq!(events.lock().unwrap().len(), 1);
        let received = events_after.lock().unwrap();
        assert_eq!(received.len(), 3);
        assert!(received[0].is_snapshot());
        assert!(received[1].is_overflow());
        assert_eq!(
            received[2].payload,
            EventPayload::Error {
                error: BridgeFault::Fatal {
                    message: "boom".to_string()
                }
            }
        );
        assert_eq!(
            received.iter().map(|e| e.sequence).collect::<Vec<_>>(),
            vec![8, 9, 10]
        );
        assert_eq!(bridge.pending(), 0);
    }

    #[test]
    fn test_platform_end_request_leaves_and_reports() {
        let mut native = MockNativeCallSystem::new();
        native.expect_send_command().times(2).returning(|_| ());
        native
            .expect_report_call()
            .withf(|report| matches!(report, CallReport::Started { .. }))
            .times(1)
            .returning(|_| ());
        native
            .expect_report_call()
            .withf(|report| matches!(report, CallReport::Ended { .. }))
            .times(1)
            .returning(|_| ());
        let bridge = bridge_with(native, config());
        let (listener, events) = recorder();
        bridge.subscribe(listener);
        join(&bridge);

        bridge
            .ingest(&raw(json!({ "action": "end-call", "roomUrl": ROOM })))
            .unwrap();
        assert_eq!(bridge.state(), CallState::Leaving);

        // Asked twice: nothing more to forward
        bridge
            .ingest(&raw(json!({ "action": "end-call", "roomUrl": ROOM })))
            .unwrap();
        bridge.ingest(&raw(json!({ "action": "left-meeting" }))).unwrap();
        assert_eq!(bridge.state(), CallState::Left);

        bridge.flush();
        let requests = events
            .lock()
            .unwrap()
            .iter()
            .filter(|e| {
                e.payload
                    == EventPayload::CallRequested {
                        request: CallRequest::End,
                    }
            })
            .count();
        assert_eq!(requests, 2);
    }

    #[test]
    fn test_platform_start_request_joins() {
        let mut native = MockNativeCallSystem::new();
        native
            .expect_send_command()
            .withf(|command| matches!(command, Command::Join { .. }))
            .times(1)
            .returning(|_| ());
        native.expect_report_call().times(0);
        let bridge = bridge_with(native, config());

        let sequences = bridge
            .ingest(&raw(json!({ "action": "start-call", "roomUrl": ROOM })))
            .unwrap();
        assert_eq!(sequences, vec![1, 2]);
        assert_eq!(bridge.state(), CallState::Joining);

        // A consumer join on top of it is a conflict
        assert!(bridge.dispatch(Command::join(ROOM)).is_err());
    }

    #[test]
    fn test_overflow_surfaces_single_marker() {
        let bridge = bridge_with(
            accepting_native(),
            BridgeConfig {
                queue_capacity: 4,
                ..config()
            },
        );
        join(&bridge);
        bridge
            .ingest(&raw(json!({
                "action": "participant-joined",
                "participant": { "session_id": "p-1" }
            })))
            .unwrap();

        for _ in 0..6 {
            bridge
                .ingest(&raw(json!({
                    "action": "track-started",
                    "participant": { "session_id": "p-1" },
                    "track": { "kind": "audio" }
                })))
                .ok();
            bridge
                .ingest(&raw(json!({
                    "action": "track-stopped",
                    "participant": { "session_id": "p-1" },
                    "track": { "kind": "audio" }
                })))
                .ok();
        }

        let state = lock(&bridge.inner.state);
        let markers: Vec<_> = state.queue.drain().filter(|event| event.is_overflow()).collect();
        assert_eq!(markers.len(), 1);
        assert!(matches!(
            markers[0].payload,
            EventPayload::Error {
                error: BridgeFault::QueueOverflow { .. }
            }
        ));
    }

    #[test]
    fn test_check_timeouts_without_runtime() {
        let bridge = bridge_with(
            accepting_native(),
            BridgeConfig {
                reconnect_timeout_ms: 1,
                ..config()
            },
        );
        join(&bridge);
        bridge
            .ingest(&raw(json!({ "action": "network-connection", "event": "interrupted" })))
            .unwrap();
        assert_eq!(bridge.state(), CallState::Reconnecting);

        std::thread::sleep(std::time::Duration::from_millis(5));
        let sequences = bridge.check_timeouts().unwrap();
        assert_eq!(sequences.len(), 2);
        assert_eq!(bridge.state(), CallState::Failed);

        // Already expired: nothing more happens
        assert!(bridge.check_timeouts().unwrap().is_empty());
    }
}
