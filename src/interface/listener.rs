//! Listener registration types

use crate::domain::call::event::BridgeEvent;
use futures::Stream;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::sync::mpsc;
use uuid::Uuid;

/// Handle identifying a registered listener
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ListenerId(Uuid);

impl ListenerId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ListenerId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ListenerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Receiver of bridge events.
///
/// Called from the delivery context, one event at a time, in sequence order.
/// Implementations must not call back into `BridgeEmitter::flush`.
pub trait BridgeListener: Send + Sync {
    fn on_event(&self, event: &BridgeEvent);
}

impl<F> BridgeListener for F
where
    F: Fn(&BridgeEvent) + Send + Sync,
{
    fn on_event(&self, event: &BridgeEvent) {
        self(event)
    }
}

/// Listener forwarding events into an [`EventStream`]
pub struct ChannelListener {
    tx: mpsc::UnboundedSender<BridgeEvent>,
}

impl BridgeListener for ChannelListener {
    fn on_event(&self, event: &BridgeEvent) {
        // A dropped stream just means nobody is reading any more
        let _ = self.tx.send(event.clone());
    }
}

/// Async stream of bridge events for consumers living on a tokio runtime
pub struct EventStream {
    rx: mpsc::UnboundedReceiver<BridgeEvent>,
}

impl Stream for EventStream {
    type Item = BridgeEvent;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.rx.poll_recv(cx)
    }
}

/// Create a connected listener/stream pair
pub fn event_channel() -> (ChannelListener, EventStream) {
    let (tx, rx) = mpsc::unbounded_channel();
    (ChannelListener { tx }, EventStream { rx })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::call::event::EventPayload;
    use crate::domain::call::value_object::CallState;
    use crate::domain::shared::value_objects::SessionId;
    use futures::StreamExt;
    use tokio_test::{assert_pending, assert_ready_eq, task};

    fn event(sequence: u64) -> BridgeEvent {
        BridgeEvent::new(
            sequence,
            SessionId::from("room-a"),
            EventPayload::state_changed(CallState::Joining, CallState::Joined),
        )
    }

    #[test]
    fn test_event_stream_yields_in_order() {
        let (listener, stream) = event_channel();
        let mut stream = task::spawn(stream);

        assert_pending!(stream.poll_next());

        listener.on_event(&event(1));
        listener.on_event(&event(2));

        assert!(stream.is_woken());
        let first = match stream.poll_next() {
            Poll::Ready(Some(event)) => event,
            other => panic!("expected an event, got {:?}", other),
        };
        assert_eq!(first.sequence, 1);

        drop(listener);
        let second = match stream.poll_next() {
            Poll::Ready(Some(event)) => event.sequence,
            other => panic!("expected an event, got {:?}", other),
        };
        assert_eq!(second, 2);
        assert_ready_eq!(stream.poll_next(), None);
    }

    #[tokio::test]
    async fn test_closure_listener() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let listener = move |event: &BridgeEvent| {
            let _ = tx.send(event.sequence);
        };

        listener.on_event(&event(5));
        assert_eq!(rx.recv().await, Some(5));

        let (listener, stream) = event_channel();
        listener.on_event(&event(9));
        drop(listener);
        let collected: Vec<u64> = stream.map(|e| e.sequence).collect().await;
        assert_eq!(collected, vec![9]);
    }
}
