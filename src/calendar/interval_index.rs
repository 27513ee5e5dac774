use std::collections::{BTreeMap, HashMap};

use crate::time::clock::Cycle;
use crate::util::id::{ActorGuid, ReservationId};

/// Interval index answering `active_at(when)` without a full scan.
///
/// Entries are keyed by their end cycle: everything still alive at `when`
/// sits in the tail range `end > when`, and `tick` prunes dead intervals, so
/// a query touches only live entries instead of the whole history.
#[derive(Debug, Default)]
pub struct IntervalIndex {
    by_end: BTreeMap<Cycle, HashMap<ReservationId, Cycle>>,
    by_rid: HashMap<ReservationId, (Cycle, Cycle)>,
}

impl IntervalIndex {
    pub fn new() -> Self {
        IntervalIndex::default()
    }

    /// Inserts `[start, end)` for the reservation, replacing any previous
    /// interval it held.
    pub fn add(&mut self, rid: ReservationId, start: Cycle, end: Cycle) {
        assert!(start < end, "interval start must precede end");
        self.remove(rid);
        self.by_end.entry(end).or_default().insert(rid, start);
        self.by_rid.insert(rid, (start, end));
    }

    pub fn remove(&mut self, rid: ReservationId) {
        if let Some((_, end)) = self.by_rid.remove(&rid) {
            if let Some(slot) = self.by_end.get_mut(&end) {
                slot.remove(&rid);
                if slot.is_empty() {
                    self.by_end.remove(&end);
                }
            }
        }
    }

    /// Reservations whose interval contains `when`.
    pub fn active_at(&self, when: Cycle) -> Vec<ReservationId> {
        self.by_end
            .range(when + 1..)
            .flat_map(|(_, slot)| slot.iter())
            .filter(|(_, start)| **start <= when)
            .map(|(rid, _)| *rid)
            .collect()
    }

    pub fn interval(&self, rid: ReservationId) -> Option<(Cycle, Cycle)> {
        self.by_rid.get(&rid).copied()
    }

    /// Frees intervals that ended at or before `cycle`.
    pub fn tick(&mut self, cycle: Cycle) {
        let dead: Vec<Cycle> = self.by_end.range(..=cycle).map(|(end, _)| *end).collect();
        for end in dead {
            if let Some(slot) = self.by_end.remove(&end) {
                for rid in slot.keys() {
                    self.by_rid.remove(rid);
                }
            }
        }
    }

    pub fn len(&self) -> usize {
        self.by_rid.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_rid.is_empty()
    }
}

/// Per-source interval index used for outlays: what an actor has carved out
/// of each upstream site's delegated capacity.
#[derive(Debug, Default)]
pub struct SourceOutlays {
    sources: HashMap<ActorGuid, IntervalIndex>,
}

impl SourceOutlays {
    pub fn new() -> Self {
        SourceOutlays::default()
    }

    pub fn add(&mut self, source: ActorGuid, rid: ReservationId, start: Cycle, end: Cycle) {
        self.sources.entry(source).or_default().add(rid, start, end);
    }

    pub fn active_at(&self, source: ActorGuid, when: Cycle) -> Vec<ReservationId> {
        self.sources.get(&source).map(|idx| idx.active_at(when)).unwrap_or_default()
    }

    pub fn remove(&mut self, rid: ReservationId) {
        for idx in self.sources.values_mut() {
            idx.remove(rid);
        }
    }

    pub fn tick(&mut self, cycle: Cycle) {
        for idx in self.sources.values_mut() {
            idx.tick(cycle);
        }
        self.sources.retain(|_, idx| !idx.is_empty());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn active_at_honours_half_open_interval() {
        let mut index = IntervalIndex::new();
        let rid = ReservationId::new();
        index.add(rid, 5, 10);

        assert!(index.active_at(4).is_empty());
        assert_eq!(index.active_at(5), vec![rid]);
        assert_eq!(index.active_at(9), vec![rid]);
        assert!(index.active_at(10).is_empty());
    }

    #[test]
    fn re_add_replaces_interval() {
        let mut index = IntervalIndex::new();
        let rid = ReservationId::new();
        index.add(rid, 5, 10);
        index.add(rid, 5, 14);

        assert_eq!(index.interval(rid), Some((5, 14)));
        assert_eq!(index.active_at(12), vec![rid]);
        assert_eq!(index.len(), 1);
    }

    #[test]
    fn tick_prunes_expired_intervals() {
        let mut index = IntervalIndex::new();
        let old = ReservationId::new();
        let live = ReservationId::new();
        index.add(old, 1, 4);
        index.add(live, 1, 20);

        index.tick(5);
        assert_eq!(index.len(), 1);
        assert_eq!(index.active_at(6), vec![live]);
    }

    #[test]
    fn outlays_are_tracked_per_source() {
        let mut outlays = SourceOutlays::new();
        let (site_a, site_b) = (ActorGuid::new(), ActorGuid::new());
        let rid = ReservationId::new();
        outlays.add(site_a, rid, 2, 8);

        assert_eq!(outlays.active_at(site_a, 3), vec![rid]);
        assert!(outlays.active_at(site_b, 3).is_empty());
    }
}
