use crate::calendar::ActorCalendar;
use crate::error::Result;
use crate::kernel::reservation::Reservation;
use crate::policy::client_simple::ClientSimplePolicy;
use crate::policy::{BindOutcome, Policy, ReservationTable};
use crate::time::clock::Cycle;
use crate::util::id::ReservationId;

/// Orchestrator policy that reviews each bid round before any ticket leaves
/// the actor. All reservations demanded in one round form a review batch:
/// if any member fails admission, every member fails with it. Reservations
/// not yet demanded are untouched and join a later batch.
pub struct ClientTicketReviewPolicy {
    inner: ClientSimplePolicy,
    /// Per-reservation admission cap; a request above it fails review.
    unit_cap: u64,
}

impl ClientTicketReviewPolicy {
    pub fn new(unit_cap: u64) -> Self {
        ClientTicketReviewPolicy { inner: ClientSimplePolicy::new(), unit_cap }
    }

    fn review(&self, r: &Reservation) -> std::result::Result<(), String> {
        let units = r.requested_resources().units();
        if units == 0 {
            return Err("ticket review failed: zero units requested".to_string());
        }
        if units > self.unit_cap {
            return Err(format!(
                "ticket review failed: {} units exceeds the cap of {}",
                units, self.unit_cap
            ));
        }
        Ok(())
    }
}

impl Policy for ClientTicketReviewPolicy {
    fn name(&self) -> &str {
        "client-ticket-review"
    }

    fn demand(&mut self, r: &mut Reservation, calendar: &mut ActorCalendar, cycle: Cycle) {
        self.inner.demand(r, calendar, cycle)
    }

    fn formulate_bids(
        &mut self,
        cycle: Cycle,
        table: &mut ReservationTable,
        calendar: &mut ActorCalendar,
    ) -> Vec<ReservationId> {
        let batch = calendar.take_demand();
        if batch.is_empty() {
            return Vec::new();
        }

        let mut verdicts: Vec<(ReservationId, std::result::Result<(), String>)> = Vec::new();
        for rid in &batch {
            if let Some(r) = table.get(rid) {
                verdicts.push((*rid, self.review(r)));
            }
        }

        let first_failure = verdicts.iter().find_map(|(rid, v)| v.as_ref().err().map(|m| (*rid, m.clone())));

        if let Some((failed_rid, message)) = first_failure {
            // One bad member sinks the whole batch, before any ticket is
            // issued.
            for (rid, _) in verdicts {
                let Some(r) = table.get_mut(&rid) else {
                    continue;
                };
                if rid == failed_rid {
                    r.fail(message.clone());
                } else {
                    r.fail(format!("failing due to failure of peer reservation #{}", failed_rid));
                }
                calendar.remove_scheduled(rid);
                calendar.add_closing(rid, cycle + 1);
            }
            return Vec::new();
        }

        // Whole batch admitted; bid it the simple way.
        let mut bids = Vec::new();
        for rid in batch {
            let Some(r) = table.get_mut(&rid) else {
                continue;
            };
            if !r.is_nascent() || !r.is_no_pending() {
                continue;
            }
            let term = *r.requested_term();
            let resources = r.requested_resources().clone();
            r.approve(term, resources);
            bids.push(rid);
        }
        bids
    }

    fn bind(&mut self, r: &mut Reservation, calendar: &mut ActorCalendar, cycle: Cycle) -> Result<BindOutcome> {
        self.inner.bind(r, calendar, cycle)
    }

    fn extend(&mut self, r: &mut Reservation, calendar: &mut ActorCalendar, cycle: Cycle) -> Result<BindOutcome> {
        self.inner.extend(r, calendar, cycle)
    }

    fn check_pending(&mut self, table: &mut ReservationTable, calendar: &mut ActorCalendar, cycle: Cycle) {
        self.inner.check_pending(table, calendar, cycle)
    }

    fn correlate_update(&mut self, r: &mut Reservation, calendar: &mut ActorCalendar, cycle: Cycle) {
        self.inner.correlate_update(r, calendar, cycle)
    }

    fn release(&mut self, r: &Reservation, calendar: &mut ActorCalendar) {
        self.inner.release(r, calendar)
    }

    fn revisit(&mut self, r: &Reservation, calendar: &mut ActorCalendar) -> Result<()> {
        self.inner.revisit(r, calendar)
    }
}
