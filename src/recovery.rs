use crate::error::{Error, Result};
use crate::kernel::states::{PendingState, ReservationCategory};
use crate::kernel::Kernel;
use crate::util::id::ReservationId;

/// What a restart brought back.
pub struct RecoveryReport {
    pub slices: usize,
    pub reservations: usize,
    pub delegations: usize,
    /// Reservations whose in-flight request must be re-sent.
    pub reissue: Vec<ReservationId>,
}

/// `(category, pending)` combinations that cannot legally be observed in
/// storage: server-side reservations never carry client-side pendings.
/// Recovering one means the store is corrupt or foreign; starting would
/// animate a state machine outside its own transition graph.
fn unreachable_at_recovery(category: ReservationCategory, pending: PendingState) -> bool {
    matches!(category, ReservationCategory::Broker | ReservationCategory::Authority)
        && matches!(
            pending,
            PendingState::Redeeming | PendingState::ExtendingTicket | PendingState::ExtendingLease
        )
}

/// Rebuilds in-memory state and the calendar from the gateway. The actor
/// refuses inbound events until this completes: the kernel thread only
/// starts afterwards, so queued events wait.
pub fn recover(kernel: &mut Kernel) -> Result<RecoveryReport> {
    kernel.ensure_actor_record()?;

    let mut report = RecoveryReport { slices: 0, reservations: 0, delegations: 0, reissue: Vec::new() };

    let slices = kernel.store.slices_by_actor(&kernel.name)?;
    report.slices = slices.len();

    for slice in slices {
        let slice_id = slice.slice_id();
        kernel.slices.insert(slice_id, slice);

        // Delegations first: broker pools must exist before reservations
        // are revisited against them.
        for mut delegation in kernel.store.delegations_by_slice(slice_id)? {
            if delegation.is_delegated() {
                if let Err(e) = kernel.policy.donate(&mut delegation) {
                    log::error!("recovered delegation {} rejected by policy: {}", delegation.delegation_id(), e);
                }
            }
            report.delegations += 1;
            kernel.delegations.insert(delegation.delegation_id().clone(), delegation);
        }

        for mut reservation in kernel.store.reservations_by_slice(slice_id)? {
            let rid = reservation.rid();
            if unreachable_at_recovery(reservation.category(), reservation.pending()) {
                return Err(Error::Internal(format!(
                    "reservation {} recovered in unreachable state ({}, {})",
                    rid,
                    reservation.state(),
                    reservation.pending()
                )));
            }

            if reservation.pending().is_mutating() {
                reservation.set_pending_recover(true);
                report.reissue.push(rid);
            }

            kernel.policy.revisit(&reservation, &mut kernel.calendar)?;

            for unit in kernel.store.units_by_reservation(rid)? {
                kernel.units.insert(unit.unit_id(), unit);
            }

            report.reservations += 1;
            kernel.reservations.insert(rid, reservation);
        }
    }

    kernel.recovered = true;
    Ok(report)
}

/// Re-sends the interrupted request of every `pending_recover` reservation.
/// Runs after recovery, once the RPC engine can carry traffic again.
pub fn reissue(kernel: &mut Kernel, rids: Vec<ReservationId>) {
    for rid in rids {
        kernel.reissue_recovered(rid);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn server_side_client_pendings_are_unreachable() {
        assert!(unreachable_at_recovery(ReservationCategory::Broker, PendingState::Redeeming));
        assert!(unreachable_at_recovery(ReservationCategory::Authority, PendingState::ExtendingLease));
        assert!(unreachable_at_recovery(ReservationCategory::Broker, PendingState::ExtendingTicket));

        // Client reservations recover the same pendings via re-issue.
        assert!(!unreachable_at_recovery(ReservationCategory::Client, PendingState::Redeeming));
        assert!(!unreachable_at_recovery(ReservationCategory::Client, PendingState::ExtendingTicket));
        // Server-side mutating pendings that are legal.
        assert!(!unreachable_at_recovery(ReservationCategory::Authority, PendingState::Closing));
    }
}
