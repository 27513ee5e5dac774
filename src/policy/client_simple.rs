use crate::calendar::ActorCalendar;
use crate::error::{Error, Result};
use crate::kernel::reservation::Reservation;
use crate::policy::{BindOutcome, Policy, ReservationTable};
use crate::time::clock::Cycle;

/// Calendar-driven orchestrator policy: demanded reservations are bid as
/// soon as the next tick, completed operations install the reservation into
/// the holdings/redeeming/closing/renewing buckets.
pub struct ClientSimplePolicy;

impl ClientSimplePolicy {
    pub fn new() -> Self {
        ClientSimplePolicy
    }

    /// Bookkeeping after a remote operation completed for `rid`. Installs
    /// the reservation into the calendar buckets its new state calls for.
    fn settle_completed(&self, r: &mut Reservation, calendar: &mut ActorCalendar, cycle: Cycle) {
        let rid = r.rid();
        if r.is_ticketed() {
            // First ticket obtained: plan the whole lifecycle.
            let term = *r.effective_term();
            calendar.add_holdings(rid, term.start(), term.end());
            calendar.add_redeeming(rid, self.redeem_cycle(r));
            calendar.add_closing(rid, self.close_cycle(r, &term));
            if r.is_renewable() {
                let renew = self.renew_cycle(r);
                r.set_renew_time(renew);
                calendar.add_renewing(rid, renew);
            }
        } else if r.is_active_ticketed() {
            // Extended ticket in hand: reschedule the close against the
            // extended term and plan the lease extension.
            let term = *r.effective_term();
            calendar.remove_closing(rid);
            calendar.add_closing(rid, self.close_cycle(r, &term));
            calendar.add_holdings(rid, term.start(), term.end());
            calendar.add_redeeming(rid, term.new_start().saturating_sub(1));
            if r.is_renewable() {
                let renew = self.renew_cycle(r);
                r.set_renew_time(renew);
                calendar.add_renewing(rid, renew);
            }
        } else if r.is_active() {
            // Lease call completed. Reschedule the close against the term
            // the site actually granted, which may differ from ours.
            let term = *r.effective_term();
            calendar.remove_closing(rid);
            calendar.add_closing(rid, self.close_cycle(r, &term));
            if r.is_renewable() && r.renew_time() == 0 {
                let renew = cycle + 1;
                r.set_renew_time(renew);
                calendar.add_renewing(rid, renew);
            }
        }
        calendar.remove_pending(rid);
    }
}

impl Default for ClientSimplePolicy {
    fn default() -> Self {
        ClientSimplePolicy::new()
    }
}

impl Policy for ClientSimplePolicy {
    fn name(&self) -> &str {
        "client-simple"
    }

    fn demand(&mut self, r: &mut Reservation, calendar: &mut ActorCalendar, _cycle: Cycle) {
        if !r.is_nascent() {
            log::error!("demand on a reservation that is not nascent: {}", r);
            return;
        }
        calendar.add_demand(r.rid());
    }

    fn formulate_bids(
        &mut self,
        _cycle: Cycle,
        table: &mut ReservationTable,
        calendar: &mut ActorCalendar,
    ) -> Vec<crate::util::id::ReservationId> {
        let mut bids = Vec::new();
        for rid in calendar.take_demand() {
            let Some(r) = table.get_mut(&rid) else {
                continue;
            };
            if !r.is_nascent() || !r.is_no_pending() {
                log::warn!("skipping bid for {}; not ready", r);
                continue;
            }
            let term = *r.requested_term();
            let resources = r.requested_resources().clone();
            r.approve(term, resources);
            bids.push(rid);
        }
        bids
    }

    fn bind(&mut self, r: &mut Reservation, _calendar: &mut ActorCalendar, _cycle: Cycle) -> Result<BindOutcome> {
        Err(Error::InvalidArguments(format!("client policy cannot admit server request for {}", r.rid())))
    }

    fn extend(&mut self, r: &mut Reservation, _calendar: &mut ActorCalendar, _cycle: Cycle) -> Result<BindOutcome> {
        Err(Error::InvalidArguments(format!("client policy cannot admit server request for {}", r.rid())))
    }

    fn check_pending(&mut self, table: &mut ReservationTable, calendar: &mut ActorCalendar, cycle: Cycle) {
        for rid in calendar.pending() {
            let Some(r) = table.get_mut(&rid) else {
                calendar.remove_pending(rid);
                continue;
            };

            if r.is_failed() {
                // Failed reservations leave the pending list and get closed
                // on the next cycle so the failure stays observable.
                calendar.remove_scheduled(rid);
                calendar.add_closing(rid, cycle + 1);
            } else if r.is_closed() && r.is_no_pending() {
                calendar.remove_pending(rid);
            } else if r.is_no_pending() && !r.is_pending_recover() {
                self.settle_completed(r, calendar, cycle);
            }
        }
    }

    fn correlate_update(&mut self, r: &mut Reservation, _calendar: &mut ActorCalendar, _cycle: Cycle) {
        let approved = r.approved_term().copied();
        let granted = r.granted_term().copied();
        let (Some(approved), Some(granted)) = (approved, granted) else {
            return;
        };
        // The server may legally shift the term; surface it to the client
        // so the echo explains the schedule it actually got.
        if granted.start() != approved.start() || granted.end() != approved.end() {
            log::debug!(
                "reservation {} granted {} against approved {}",
                r.rid(),
                granted,
                approved
            );
            r.update_data_mut().post(format!("granted term {} differs from requested {}", granted, approved));
        }
    }

    fn release(&mut self, r: &Reservation, calendar: &mut ActorCalendar) {
        calendar.remove(r.rid());
    }

    fn revisit(&mut self, r: &Reservation, calendar: &mut ActorCalendar) -> Result<()> {
        use crate::kernel::states::ReservationState::*;
        let rid = r.rid();
        match r.state() {
            Nascent | Closed | Failed | CloseWait => {}
            Ticketed => {
                let term = *r.effective_term();
                calendar.add_holdings(rid, term.start(), term.end());
                calendar.add_closing(rid, self.close_cycle(r, &term));
                if r.is_no_pending() {
                    calendar.add_redeeming(rid, self.redeem_cycle(r));
                }
            }
            Active => {
                let term = *r.effective_term();
                calendar.add_holdings(rid, term.start(), term.end());
                calendar.add_closing(rid, self.close_cycle(r, &term));
                if r.is_renewable() && r.renew_time() > 0 && r.is_no_pending() {
                    calendar.add_renewing(rid, r.renew_time());
                }
            }
            ActiveTicketed => {
                let term = *r.effective_term();
                calendar.add_holdings(rid, term.start(), term.end());
                calendar.add_closing(rid, self.close_cycle(r, &term));
                if r.is_no_pending() {
                    calendar.add_redeeming(rid, term.new_start().saturating_sub(1));
                }
            }
        }
        if !r.is_no_pending() && !r.is_terminal() {
            calendar.add_pending(rid);
        }
        Ok(())
    }
}
