use crate::calendar::ActorCalendar;
use crate::error::Result;
use crate::kernel::delegation::Delegation;
use crate::kernel::reservation::Reservation;
use crate::kernel::resource_set::{Concrete, ResourceSet, Ticket};
use crate::manage::PoolInfo;
use crate::policy::inventory::{Inventory, PoolAdvert};
use crate::policy::{Allocation, BindOutcome, Policy, ReservationTable};
use crate::time::clock::Cycle;
use crate::util::id::ActorGuid;

/// Notice sent when a request cannot be covered by delegated capacity.
pub const CANNOT_SATISFY: &str = "server cannot satisfy request";

/// Batch-on-tick broker policy: incoming ticket requests queue up and one
/// allocation pass per tick carves them out of the delegated inventory.
pub struct BrokerSimplePolicy {
    guid: ActorGuid,
    inventory: Inventory,
}

impl BrokerSimplePolicy {
    pub fn new(guid: ActorGuid) -> Self {
        BrokerSimplePolicy { guid, inventory: Inventory::new() }
    }

    fn try_allocate(&mut self, r: &mut Reservation, calendar: &mut ActorCalendar) -> BindOutcome {
        let term = *r.requested_term();
        let rtype = r.requested_resources().rtype().clone();
        let units = r.requested_resources().units();

        let Some((source, _site, site_guid)) = self.inventory.source_for(&rtype) else {
            return BindOutcome::Denied { message: CANNOT_SATISFY.to_string() };
        };
        let source = source.clone();

        if self.inventory.available(&rtype, &term) < units {
            return BindOutcome::Denied { message: CANNOT_SATISFY.to_string() };
        }
        if self.inventory.reserve(&rtype, r.rid(), term, units).is_err() {
            return BindOutcome::Denied { message: CANNOT_SATISFY.to_string() };
        }
        calendar.add_outlay(site_guid, r.rid(), term.start(), term.end());

        let mut resources = ResourceSet::new(units, rtype);
        resources.set_concrete(Concrete::Ticket(Ticket {
            source,
            issuer: self.guid,
            units,
            term,
        }));
        BindOutcome::Granted { term, resources }
    }
}

impl Policy for BrokerSimplePolicy {
    fn name(&self) -> &str {
        "broker-simple"
    }

    fn bind(&mut self, r: &mut Reservation, calendar: &mut ActorCalendar, _cycle: Cycle) -> Result<BindOutcome> {
        // Queue for the next allocation pass.
        calendar.add_demand(r.rid());
        Ok(BindOutcome::Deferred)
    }

    fn extend(&mut self, r: &mut Reservation, calendar: &mut ActorCalendar, _cycle: Cycle) -> Result<BindOutcome> {
        // Extensions ride the same batch; the request term is already the
        // extended one.
        self.inventory.release(r.rid());
        calendar.remove(r.rid());
        calendar.add_demand(r.rid());
        Ok(BindOutcome::Deferred)
    }

    fn allocate(
        &mut self,
        _cycle: Cycle,
        table: &mut ReservationTable,
        calendar: &mut ActorCalendar,
    ) -> Vec<Allocation> {
        let mut outcomes = Vec::new();
        for rid in calendar.take_demand() {
            let Some(r) = table.get_mut(&rid) else {
                continue;
            };
            if r.is_terminal() {
                continue;
            }
            let outcome = self.try_allocate(r, calendar);
            outcomes.push(Allocation { rid, outcome });
        }
        outcomes
    }

    fn donate(&mut self, delegation: &mut Delegation) -> Result<()> {
        let Some(blob) = delegation.graph() else {
            return Ok(());
        };
        for advert in PoolAdvert::decode_all(blob)? {
            self.inventory.donate(delegation.delegation_id().clone(), advert);
        }
        Ok(())
    }

    fn retract(&mut self, delegation: &Delegation) {
        self.inventory.retract(delegation.delegation_id());
    }

    fn release(&mut self, r: &Reservation, calendar: &mut ActorCalendar) {
        self.inventory.release(r.rid());
        calendar.remove(r.rid());
    }

    fn revisit(&mut self, r: &Reservation, calendar: &mut ActorCalendar) -> Result<()> {
        // Re-record the outlay for grants that survived the restart.
        // Delegations are revisited before reservations, so the pools are
        // already in place.
        if r.permits_units() || r.is_ticketed() {
            if let Some(ticket) = r.granted_resources().and_then(|rs| rs.ticket()) {
                let term = ticket.term;
                let units = ticket.units;
                let rtype = r.requested_resources().rtype().clone();
                let site_guid = self.inventory.source_for(&rtype).map(|(_, _, guid)| guid);
                let _ = self.inventory.reserve(&rtype, r.rid(), term, units);
                if let Some(site_guid) = site_guid {
                    calendar.add_outlay(site_guid, r.rid(), term.start(), term.end());
                }
            }
        }
        Ok(())
    }

    fn pools(&self) -> Vec<PoolInfo> {
        self.inventory.snapshot()
    }
}
