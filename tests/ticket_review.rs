mod common;

use common::{Testbed, VM};
use slicebed::kernel::states::ReservationState;
use slicebed::policy::ClientTicketReviewPolicy;

const REVIEW_CAP: u64 = 10;

/// One bad member fails the whole review batch before any ticket is
/// issued; a later submission in the same slice is unaffected.
#[test]
fn review_failure_sinks_the_batch() {
    let bed = Testbed::start(Box::new(ClientTicketReviewPolicy::new(REVIEW_CAP)));
    let slice = bed.add_client_slice("workload");
    let (start, end) = (5, 10);

    // r1 exceeds the review cap; r2 would pass on its own.
    let r1 = bed.add_reservation(slice, REVIEW_CAP + 90, VM, start, end, false);
    let r2 = bed.add_reservation(slice, 1, VM, start, end, false);
    bed.demand(r1);
    bed.demand(r2);

    bed.tick(1);
    assert_eq!(bed.orch_info(r1).state, ReservationState::Failed);
    assert_eq!(bed.orch_info(r2).state, ReservationState::Failed);
    // No ticket ever left the orchestrator.
    assert!(bed.broker_info(r1).is_none());
    assert!(bed.broker_info(r2).is_none());

    bed.tick(2);
    assert_eq!(bed.orch_info(r1).state, ReservationState::Closed);
    assert_eq!(bed.orch_info(r2).state, ReservationState::Closed);

    let notice = bed.orch_info(r2).error_message.unwrap();
    assert!(notice.contains("peer reservation"), "notice was: {}", notice);

    // A separately submitted reservation forms its own batch.
    let r3 = bed.add_reservation(slice, 1, VM, start, end, false);
    bed.demand(r3);
    bed.tick(3);
    assert_eq!(bed.orch_info(r3).state, ReservationState::Ticketed);

    for cycle in 4..=end + 1 {
        bed.tick(cycle);
    }
    assert_eq!(bed.orch_info(r3).state, ReservationState::Closed);
    assert_eq!(bed.orch_info(r1).state, ReservationState::Closed);
    assert_eq!(bed.orch_info(r2).state, ReservationState::Closed);

    bed.stop();
}

/// A batch where every member passes review behaves like the simple
/// policy.
#[test]
fn clean_batch_proceeds() {
    let bed = Testbed::start(Box::new(ClientTicketReviewPolicy::new(REVIEW_CAP)));
    let slice = bed.add_client_slice("workload");

    let r1 = bed.add_reservation(slice, 2, VM, 4, 8, false);
    let r2 = bed.add_reservation(slice, 3, VM, 4, 8, false);
    bed.demand(r1);
    bed.demand(r2);

    for cycle in 1..=9 {
        bed.tick(cycle);
    }
    assert_eq!(bed.orch_info(r1).state, ReservationState::Closed);
    assert_eq!(bed.orch_info(r2).state, ReservationState::Closed);
    assert!(bed.orch_info(r1).error_message.is_none());

    bed.stop();
}
