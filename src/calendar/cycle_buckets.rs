use std::collections::{BTreeMap, HashSet};

use crate::time::clock::Cycle;
use crate::util::id::ReservationId;

/// `cycle -> set(reservation)` bucket for operations scheduled at a cycle
/// (renewing, redeeming, closing). Entries whose cycle has passed are
/// surfaced together on the next tick, so a stalled actor catches up.
#[derive(Debug, Default)]
pub struct CycleBucket {
    slots: BTreeMap<Cycle, HashSet<ReservationId>>,
}

impl CycleBucket {
    pub fn new() -> Self {
        CycleBucket::default()
    }

    pub fn add(&mut self, rid: ReservationId, cycle: Cycle) {
        self.slots.entry(cycle).or_default().insert(rid);
    }

    /// All reservations due at or before `cycle`, without draining them.
    pub fn due(&self, cycle: Cycle) -> Vec<ReservationId> {
        self.slots.range(..=cycle).flat_map(|(_, set)| set.iter().copied()).collect()
    }

    /// Drains and returns every reservation due at or before `cycle`.
    pub fn take_due(&mut self, cycle: Cycle) -> Vec<ReservationId> {
        let mut taken = Vec::new();
        let keys: Vec<Cycle> = self.slots.range(..=cycle).map(|(c, _)| *c).collect();
        for key in keys {
            if let Some(set) = self.slots.remove(&key) {
                taken.extend(set);
            }
        }
        taken
    }

    /// Sweeps the reservation out of every slot.
    pub fn remove(&mut self, rid: ReservationId) {
        self.slots.retain(|_, set| {
            set.remove(&rid);
            !set.is_empty()
        });
    }

    /// Frees slots at or before `cycle`.
    pub fn tick(&mut self, cycle: Cycle) {
        let keys: Vec<Cycle> = self.slots.range(..=cycle).map(|(c, _)| *c).collect();
        for key in keys {
            self.slots.remove(&key);
        }
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn contains(&self, rid: ReservationId) -> bool {
        self.slots.values().any(|set| set.contains(&rid))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn take_due_drains_past_slots() {
        let mut bucket = CycleBucket::new();
        let (a, b, c) = (ReservationId::new(), ReservationId::new(), ReservationId::new());
        bucket.add(a, 3);
        bucket.add(b, 5);
        bucket.add(c, 7);

        let due: HashSet<_> = bucket.take_due(5).into_iter().collect();
        assert!(due.contains(&a) && due.contains(&b));
        assert!(!due.contains(&c));
        assert!(bucket.take_due(5).is_empty());
        assert_eq!(bucket.take_due(7), vec![c]);
    }

    #[test]
    fn remove_sweeps_all_slots() {
        let mut bucket = CycleBucket::new();
        let rid = ReservationId::new();
        bucket.add(rid, 2);
        bucket.add(rid, 9);
        bucket.remove(rid);
        assert!(bucket.is_empty());
    }
}
