use std::collections::HashMap;

use crate::calendar::ActorCalendar;
use crate::error::Result;
use crate::kernel::delegation::Delegation;
use crate::kernel::reservation::Reservation;
use crate::kernel::resource_set::{Concrete, Lease, ResourceSet, ResourceType};
use crate::manage::PoolInfo;
use crate::policy::inventory::PoolAdvert;
use crate::policy::{BindOutcome, Policy};
use crate::time::clock::Cycle;
use crate::time::term::Term;
use crate::util::id::{ActorGuid, ActorName, ReservationId};

#[derive(Debug, Clone)]
struct Assignment {
    rid: ReservationId,
    term: Term,
    units: u64,
}

#[derive(Debug)]
struct SitePool {
    total: u64,
    assignments: Vec<Assignment>,
}

impl SitePool {
    fn available(&self, term: &Term) -> u64 {
        let committed: u64 = self
            .assignments
            .iter()
            .filter(|a| a.term.start() < term.end() && term.start() < a.term.end())
            .map(|a| a.units)
            .sum();
        self.total.saturating_sub(committed)
    }
}

/// Authority policy assigning concrete units from configured site pools to
/// redeemed tickets. Assignment is immediate: a valid redeem is answered
/// within the event that delivered it.
pub struct AuthorityUnitPolicy {
    name: ActorName,
    guid: ActorGuid,
    pools: HashMap<ResourceType, SitePool>,
}

impl AuthorityUnitPolicy {
    pub fn new(name: ActorName, guid: ActorGuid, pools: Vec<(ResourceType, u64)>) -> Self {
        let pools = pools
            .into_iter()
            .map(|(rtype, total)| (rtype, SitePool { total, assignments: Vec::new() }))
            .collect();
        AuthorityUnitPolicy { name, guid, pools }
    }

    fn assign(&mut self, r: &Reservation, term: Term) -> BindOutcome {
        // A redeem must present the ticket the broker issued.
        let Some(ticket) = r.requested_resources().ticket() else {
            return BindOutcome::Denied { message: "redeem without a ticket".to_string() };
        };
        let units = ticket.units;
        let rtype = r.requested_resources().rtype().clone();

        let Some(pool) = self.pools.get_mut(&rtype) else {
            return BindOutcome::Denied { message: format!("no site pool of type {}", rtype) };
        };
        if pool.available(&term) < units {
            return BindOutcome::Denied { message: format!("site pool {} exhausted", rtype) };
        }
        pool.assignments.retain(|a| a.rid != r.rid());
        pool.assignments.push(Assignment { rid: r.rid(), term, units });

        let mut resources = ResourceSet::new(units, rtype);
        resources.set_concrete(Concrete::Lease(Lease {
            authority: self.guid,
            units,
            term,
            // The kernel fills these in after creating the unit records.
            unit_ids: Vec::new(),
        }));
        BindOutcome::Granted { term, resources }
    }
}

impl Policy for AuthorityUnitPolicy {
    fn name(&self) -> &str {
        "authority-unit"
    }

    fn bind(&mut self, r: &mut Reservation, calendar: &mut ActorCalendar, _cycle: Cycle) -> Result<BindOutcome> {
        let term = *r.requested_term();
        let outcome = self.assign(r, term);
        if let BindOutcome::Granted { term, .. } = &outcome {
            calendar.add_holdings(r.rid(), term.start(), term.end());
        }
        Ok(outcome)
    }

    fn extend(&mut self, r: &mut Reservation, calendar: &mut ActorCalendar, _cycle: Cycle) -> Result<BindOutcome> {
        let term = *r.requested_term();
        let outcome = self.assign(r, term);
        if let BindOutcome::Granted { term, .. } = &outcome {
            calendar.remove_holdings(r.rid());
            calendar.add_holdings(r.rid(), term.start(), term.end());
        }
        Ok(outcome)
    }

    fn donate(&mut self, delegation: &mut Delegation) -> Result<()> {
        // Advertise every site pool under this delegation.
        let adverts: Vec<PoolAdvert> = self
            .pools
            .iter()
            .map(|(rtype, pool)| PoolAdvert {
                rtype: rtype.clone(),
                units: pool.total,
                site: self.name.clone(),
                site_guid: self.guid,
            })
            .collect();
        delegation.set_graph(PoolAdvert::encode_all(&adverts));
        Ok(())
    }

    fn release(&mut self, r: &Reservation, calendar: &mut ActorCalendar) {
        for pool in self.pools.values_mut() {
            pool.assignments.retain(|a| a.rid != r.rid());
        }
        calendar.remove(r.rid());
    }

    fn revisit(&mut self, r: &Reservation, calendar: &mut ActorCalendar) -> Result<()> {
        if r.permits_units() {
            if let Some(lease) = r.granted_resources().and_then(|rs| rs.lease()) {
                let rtype = r.requested_resources().rtype().clone();
                if let Some(pool) = self.pools.get_mut(&rtype) {
                    pool.assignments.push(Assignment { rid: r.rid(), term: lease.term, units: lease.units });
                }
                calendar.add_holdings(r.rid(), lease.term.start(), lease.term.end());
            }
        }
        Ok(())
    }

    fn pools(&self) -> Vec<PoolInfo> {
        self.pools
            .iter()
            .map(|(rtype, pool)| {
                let committed: u64 = pool.assignments.iter().map(|a| a.units).sum();
                PoolInfo {
                    rtype: rtype.clone(),
                    total: pool.total,
                    free: pool.total.saturating_sub(committed),
                }
            })
            .collect()
    }
}
