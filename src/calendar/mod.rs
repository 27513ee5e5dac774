pub mod cycle_buckets;
pub mod interval_index;

use std::collections::HashSet;

use crate::calendar::cycle_buckets::CycleBucket;
use crate::calendar::interval_index::{IntervalIndex, SourceOutlays};
use crate::time::clock::Cycle;
use crate::util::id::{ActorGuid, ReservationId};

/// Per-actor scheduling structure. Policies insert reservations into the
/// buckets; the kernel drains the cycle buckets on tick. Only ids are stored
/// here — entities live in the kernel's registries.
#[derive(Debug, Default)]
pub struct ActorCalendar {
    /// Demanded reservations awaiting their first bid.
    demand: HashSet<ReservationId>,
    /// Reservations with an outstanding remote operation the policy tracks.
    pending: HashSet<ReservationId>,
    renewing: CycleBucket,
    redeeming: CycleBucket,
    closing: CycleBucket,
    /// Resources this actor holds, indexed by term.
    holdings: IntervalIndex,
    /// Resources promised out of upstream delegations, per source site.
    outlays: SourceOutlays,
}

impl ActorCalendar {
    pub fn new() -> Self {
        ActorCalendar::default()
    }

    pub fn add_demand(&mut self, rid: ReservationId) {
        self.demand.insert(rid);
    }

    pub fn take_demand(&mut self) -> Vec<ReservationId> {
        self.demand.drain().collect()
    }

    pub fn add_pending(&mut self, rid: ReservationId) {
        self.pending.insert(rid);
    }

    pub fn remove_pending(&mut self, rid: ReservationId) {
        self.pending.remove(&rid);
    }

    pub fn pending(&self) -> Vec<ReservationId> {
        self.pending.iter().copied().collect()
    }

    pub fn add_renewing(&mut self, rid: ReservationId, cycle: Cycle) {
        self.renewing.add(rid, cycle);
    }

    pub fn remove_renewing(&mut self, rid: ReservationId) {
        self.renewing.remove(rid);
    }

    pub fn take_renewing(&mut self, cycle: Cycle) -> Vec<ReservationId> {
        self.renewing.take_due(cycle)
    }

    pub fn add_redeeming(&mut self, rid: ReservationId, cycle: Cycle) {
        self.redeeming.add(rid, cycle);
    }

    pub fn remove_redeeming(&mut self, rid: ReservationId) {
        self.redeeming.remove(rid);
    }

    pub fn take_redeeming(&mut self, cycle: Cycle) -> Vec<ReservationId> {
        self.redeeming.take_due(cycle)
    }

    pub fn add_closing(&mut self, rid: ReservationId, cycle: Cycle) {
        self.closing.add(rid, cycle);
    }

    pub fn remove_closing(&mut self, rid: ReservationId) {
        self.closing.remove(rid);
    }

    pub fn take_closing(&mut self, cycle: Cycle) -> Vec<ReservationId> {
        self.closing.take_due(cycle)
    }

    pub fn add_holdings(&mut self, rid: ReservationId, start: Cycle, end: Cycle) {
        self.holdings.add(rid, start, end);
    }

    pub fn remove_holdings(&mut self, rid: ReservationId) {
        self.holdings.remove(rid);
    }

    pub fn holdings_at(&self, when: Cycle) -> Vec<ReservationId> {
        self.holdings.active_at(when)
    }

    pub fn add_outlay(&mut self, source: ActorGuid, rid: ReservationId, start: Cycle, end: Cycle) {
        self.outlays.add(source, rid, start, end);
    }

    pub fn outlays_at(&self, source: ActorGuid, when: Cycle) -> Vec<ReservationId> {
        self.outlays.active_at(source, when)
    }

    /// Cancels anything scheduled or in progress for the reservation without
    /// touching holdings; used when a close preempts other operations.
    pub fn remove_scheduled(&mut self, rid: ReservationId) {
        self.demand.remove(&rid);
        self.pending.remove(&rid);
        self.renewing.remove(rid);
        self.redeeming.remove(rid);
        self.closing.remove(rid);
    }

    /// Sweeps the reservation out of every bucket.
    pub fn remove(&mut self, rid: ReservationId) {
        self.remove_scheduled(rid);
        self.holdings.remove(rid);
        self.outlays.remove(rid);
    }

    /// Advances internal cursors, freeing past buckets.
    pub fn tick(&mut self, cycle: Cycle) {
        self.renewing.tick(cycle);
        self.redeeming.tick(cycle);
        self.closing.tick(cycle);
        self.holdings.tick(cycle);
        self.outlays.tick(cycle);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn remove_sweeps_every_bucket() {
        let mut calendar = ActorCalendar::new();
        let rid = ReservationId::new();
        let source = ActorGuid::new();

        calendar.add_demand(rid);
        calendar.add_pending(rid);
        calendar.add_renewing(rid, 4);
        calendar.add_redeeming(rid, 5);
        calendar.add_closing(rid, 9);
        calendar.add_holdings(rid, 5, 10);
        calendar.add_outlay(source, rid, 5, 10);

        calendar.remove(rid);

        assert!(calendar.take_demand().is_empty());
        assert!(calendar.pending().is_empty());
        assert!(calendar.take_renewing(10).is_empty());
        assert!(calendar.take_redeeming(10).is_empty());
        assert!(calendar.take_closing(10).is_empty());
        assert!(calendar.holdings_at(6).is_empty());
        assert!(calendar.outlays_at(source, 6).is_empty());
    }
}
