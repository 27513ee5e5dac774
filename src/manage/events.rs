use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

use crate::kernel::states::{DelegationState, PendingState, ReservationState};
use crate::util::id::{DelegationId, ReservationId, SliceId};

/// Events surfaced to management-plane subscribers.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub enum ActorEvent {
    SliceAdded { slice_id: SliceId, name: String },
    SliceRemoved { slice_id: SliceId },
    ReservationStateChanged {
        rid: ReservationId,
        slice_id: SliceId,
        state: ReservationState,
        pending: PendingState,
    },
    ReservationFailed { rid: ReservationId, slice_id: SliceId, message: String },
    DelegationStateChanged { delegation_id: DelegationId, state: DelegationState },
}

impl ActorEvent {
    fn slice_id(&self) -> Option<SliceId> {
        match self {
            ActorEvent::SliceAdded { slice_id, .. }
            | ActorEvent::SliceRemoved { slice_id }
            | ActorEvent::ReservationStateChanged { slice_id, .. }
            | ActorEvent::ReservationFailed { slice_id, .. } => Some(*slice_id),
            ActorEvent::DelegationStateChanged { .. } => None,
        }
    }

    fn rid(&self) -> Option<ReservationId> {
        match self {
            ActorEvent::ReservationStateChanged { rid, .. }
            | ActorEvent::ReservationFailed { rid, .. } => Some(*rid),
            _ => None,
        }
    }
}

/// Subscription filter; empty fields match everything.
#[derive(Serialize, Deserialize, Debug, Clone, Default)]
pub struct EventFilter {
    pub slice_id: Option<SliceId>,
    pub rid: Option<ReservationId>,
}

impl EventFilter {
    fn matches(&self, event: &ActorEvent) -> bool {
        if let Some(want) = self.slice_id {
            if event.slice_id() != Some(want) {
                return false;
            }
        }
        if let Some(want) = self.rid {
            if event.rid() != Some(want) {
                return false;
            }
        }
        true
    }
}

struct Subscription {
    id: u64,
    filter: EventFilter,
    queue: VecDeque<ActorEvent>,
}

/// Owned by the kernel thread; subscribers poll their queue through the
/// management plane.
#[derive(Default)]
pub struct EventManager {
    subscriptions: Vec<Subscription>,
    next_id: u64,
}

const MAX_QUEUED_EVENTS: usize = 4096;

impl EventManager {
    pub fn new() -> Self {
        EventManager { subscriptions: Vec::new(), next_id: 1 }
    }

    pub fn subscribe(&mut self, filter: EventFilter) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        self.subscriptions.push(Subscription { id, filter, queue: VecDeque::new() });
        id
    }

    pub fn unsubscribe(&mut self, id: u64) -> bool {
        let before = self.subscriptions.len();
        self.subscriptions.retain(|s| s.id != id);
        self.subscriptions.len() != before
    }

    pub fn publish(&mut self, event: ActorEvent) {
        for sub in &mut self.subscriptions {
            if sub.filter.matches(&event) {
                if sub.queue.len() >= MAX_QUEUED_EVENTS {
                    // Slow subscriber; oldest events are dropped.
                    sub.queue.pop_front();
                }
                sub.queue.push_back(event.clone());
            }
        }
    }

    pub fn drain(&mut self, id: u64) -> Option<Vec<ActorEvent>> {
        self.subscriptions.iter_mut().find(|s| s.id == id).map(|s| s.queue.drain(..).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn filter_restricts_delivery() {
        let mut manager = EventManager::new();
        let watched = SliceId::new();
        let other = SliceId::new();

        let all = manager.subscribe(EventFilter::default());
        let scoped = manager.subscribe(EventFilter { slice_id: Some(watched), rid: None });

        manager.publish(ActorEvent::SliceAdded { slice_id: watched, name: "a".into() });
        manager.publish(ActorEvent::SliceAdded { slice_id: other, name: "b".into() });

        assert_eq!(manager.drain(all).unwrap().len(), 2);
        assert_eq!(manager.drain(scoped).unwrap().len(), 1);
        assert!(manager.drain(scoped).unwrap().is_empty());
        assert!(manager.drain(999).is_none());
    }
}
