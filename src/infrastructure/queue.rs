//! Ordered delivery queue
//!
//! Sequences published events and holds them until every listener has consumed
//! them. When nobody drains the queue it fills up to `capacity`; past that point the
//! oldest unacknowledged events are dropped and a single `QueueOverflow` marker is
//! kept at the head of the queue for as long as the overflow episode lasts.

use crate::domain::call::event::{BridgeEvent, BridgeFault, EventPayload};
use crate::domain::shared::value_objects::SessionId;
use std::collections::VecDeque;
use tracing::{debug, warn};

/// Smallest usable capacity: the overflow marker plus one event
pub const MIN_CAPACITY: usize = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct OverflowEpisode {
    dropped: u64,
    first_dropped: u64,
    last_dropped: u64,
}

#[derive(Debug)]
pub struct OrderedQueue {
    session_id: SessionId,
    capacity: usize,
    events: VecDeque<BridgeEvent>,
    next_sequence: u64,
    acknowledged: u64,
    /// Set while the overflow marker sits at the head of `events`
    overflow: Option<OverflowEpisode>,
    dropped_total: u64,
}

impl OrderedQueue {
    pub fn new(session_id: SessionId, capacity: usize) -> Self {
        let capacity = capacity.max(MIN_CAPACITY);
        Self {
            session_id,
            capacity,
            events: VecDeque::with_capacity(capacity),
            next_sequence: 1,
            acknowledged: 0,
            overflow: None,
            dropped_total: 0,
        }
    }

    /// Append a payload with the next sequence number
    pub fn enqueue(&mut self, payload: EventPayload) -> u64 {
        let sequence = self.next_sequence;
        self.next_sequence += 1;

        while self.events.len() >= self.capacity {
            if !self.drop_oldest() {
                break;
            }
        }

        debug!(
            session_id = %self.session_id,
            sequence,
            event = payload.name(),
            "Event enqueued"
        );
        self.events
            .push_back(BridgeEvent::new(sequence, self.session_id.clone(), payload));
        sequence
    }

    /// Issue the next sequence number for an event that is delivered outside the
    /// queue, such as a listener's resync snapshot
    pub fn reserve_sequence(&mut self) -> u64 {
        let sequence = self.next_sequence;
        self.next_sequence += 1;
        sequence
    }

    /// Unacknowledged events in sequence order.
    ///
    /// Lazy and finite; calling it again restarts from the last acknowledged event.
    pub fn drain(&self) -> impl Iterator<Item = &BridgeEvent> + '_ {
        self.events.iter()
    }

    /// Unacknowledged events with a sequence number above `sequence`
    pub fn events_after(&self, sequence: u64) -> impl Iterator<Item = &BridgeEvent> + '_ {
        self.events
            .iter()
            .skip_while(move |event| event.sequence <= sequence)
    }

    /// Release every event up to and including `sequence`
    pub fn acknowledge(&mut self, sequence: u64) -> usize {
        let mut released = 0;
        while self
            .events
            .front()
            .map_or(false, |event| event.sequence <= sequence)
        {
            if let Some(event) = self.events.pop_front() {
                if event.is_overflow() && self.overflow.is_some() {
                    debug!(session_id = %self.session_id, "Overflow episode acknowledged");
                    self.overflow = None;
                }
            }
            released += 1;
        }

        self.acknowledged = self.acknowledged.max(sequence.min(self.last_sequence()));
        released
    }

    /// Drop the oldest undelivered event and install or refresh the overflow marker.
    ///
    /// Returns false when there is nothing left to drop.
    fn drop_oldest(&mut self) -> bool {
        let (dropped, episode) = match self.overflow {
            Some(episode) => match self.events.remove(1) {
                Some(dropped) => {
                    self.events.pop_front();
                    (dropped, episode)
                }
                None => return false,
            },
            None => match self.events.pop_front() {
                Some(dropped) => {
                    warn!(
                        session_id = %self.session_id,
                        capacity = self.capacity,
                        "Delivery queue full, dropping oldest events"
                    );
                    let episode = OverflowEpisode {
                        dropped: 0,
                        first_dropped: dropped.sequence,
                        last_dropped: dropped.sequence,
                    };
                    (dropped, episode)
                }
                None => return false,
            },
        };

        let episode = OverflowEpisode {
            dropped: episode.dropped + 1,
            first_dropped: episode.first_dropped.min(dropped.sequence),
            last_dropped: dropped.sequence,
        };
        self.overflow = Some(episode);
        self.dropped_total += 1;

        // The marker reuses the last dropped sequence number so it sorts right
        // before the surviving events.
        self.events.push_front(BridgeEvent::new(
            episode.last_dropped,
            self.session_id.clone(),
            EventPayload::Error {
                error: BridgeFault::QueueOverflow {
                    dropped: episode.dropped,
                    first_dropped: episode.first_dropped,
                    last_dropped: episode.last_dropped,
                },
            },
        ));
        true
    }

    pub fn session_id(&self) -> &SessionId {
        &self.session_id
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// Highest sequence number issued so far (0 before the first event)
    pub fn last_sequence(&self) -> u64 {
        self.next_sequence - 1
    }

    pub fn acknowledged(&self) -> u64 {
        self.acknowledged
    }

    pub fn is_overflowing(&self) -> bool {
        self.overflow.is_some()
    }

    /// Events dropped over the lifetime of the queue
    pub fn dropped_total(&self) -> u64 {
        self.dropped_total
    }
}
