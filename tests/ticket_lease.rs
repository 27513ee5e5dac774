mod common;

use common::{Testbed, VM};
use slicebed::kernel::states::{PendingState, ReservationState};
use slicebed::manage::{ManageOp, ManageResponse};
use slicebed::policy::ClientSimplePolicy;

/// Full lifecycle of one client reservation: demand, ticket from the
/// broker, redeem against the site, close at term end.
#[test]
fn happy_ticket_then_lease() {
    let bed = Testbed::start(Box::new(ClientSimplePolicy::new()));
    let slice = bed.add_client_slice("workload");
    let rid = bed.add_reservation(slice, 2, VM, 5, 10, false);
    bed.demand(rid);

    for cycle in 1..=12 {
        bed.tick(cycle);
        let info = bed.orch_info(rid);
        let expected = match cycle {
            1..=4 => ReservationState::Ticketed,
            5..=9 => ReservationState::Active,
            _ => ReservationState::Closed,
        };
        assert_eq!(info.state, expected, "cycle {}: {:?}", cycle, info);
    }

    let info = bed.orch_info(rid);
    assert_eq!(info.pending, PendingState::None);
    assert!(info.error_message.is_none());

    // The broker's shadow reservation was granted a ticket; the site's
    // shadow went through its own close.
    let broker_side = bed.broker_info(rid).expect("broker shadow exists");
    assert_eq!(broker_side.state, ReservationState::Ticketed);

    bed.stop();
}

/// An undemanded reservation stays nascent while its sibling advances, and
/// catches up once demanded.
#[test]
fn nascent_undemanded_coexistence() {
    let bed = Testbed::start(Box::new(ClientSimplePolicy::new()));
    let slice = bed.add_client_slice("workload");
    let (start, end) = (8, 13);

    let r1 = bed.add_reservation(slice, 1, VM, start, end, false);
    let r2 = bed.add_reservation(slice, 1, VM, start, end, false);
    bed.demand(r1);

    for cycle in 1..=end + 2 {
        bed.tick(cycle);

        if cycle == start - 3 {
            assert_eq!(bed.orch_info(r1).state, ReservationState::Ticketed);
            assert_eq!(bed.orch_info(r2).state, ReservationState::Nascent);
            bed.demand(r2);
        }
        if (start..end - 1).contains(&cycle) {
            assert_eq!(bed.orch_info(r1).state, ReservationState::Active, "cycle {}", cycle);
            assert_eq!(bed.orch_info(r2).state, ReservationState::Active, "cycle {}", cycle);
        }
        if cycle > end {
            assert_eq!(bed.orch_info(r1).state, ReservationState::Closed);
            assert_eq!(bed.orch_info(r2).state, ReservationState::Closed);
        }
    }

    bed.stop();
}

/// A renewable reservation extends its ticket, then its lease, and stays
/// active past the original term end until it is closed explicitly.
#[test]
fn renewable_reservation_extends() {
    let bed = Testbed::start(Box::new(ClientSimplePolicy::new()));
    let slice = bed.add_client_slice("workload");
    let rid = bed.add_reservation(slice, 2, VM, 5, 9, true);
    bed.demand(rid);

    let mut saw_active_ticketed = false;
    for cycle in 1..=10 {
        bed.tick(cycle);
        let info = bed.orch_info(rid);
        if info.state == ReservationState::ActiveTicketed {
            saw_active_ticketed = true;
        }
        if cycle >= 9 {
            // Original end has passed; the extension keeps it active.
            assert_eq!(info.state, ReservationState::Active, "cycle {}: {:?}", cycle, info);
            assert!(info.end > 9, "term should have been extended");
        }
    }
    assert!(saw_active_ticketed, "extension should pass through ActiveTicketed");

    bed.manage(&bed.orch, ManageOp::CloseReservation { rid }).unwrap();
    bed.settle_all();
    bed.tick(11);
    assert_eq!(bed.orch_info(rid).state, ReservationState::Closed);

    bed.stop();
}

/// A closed-and-confirmed reservation can be removed; a live one cannot.
#[test]
fn remove_requires_terminal_state() {
    let bed = Testbed::start(Box::new(ClientSimplePolicy::new()));
    let slice = bed.add_client_slice("workload");
    let rid = bed.add_reservation(slice, 1, VM, 3, 6, false);
    bed.demand(rid);
    bed.tick(1);

    let err = bed.manage(&bed.orch, ManageOp::RemoveReservation { rid });
    assert!(err.is_err(), "live reservation must not be removable");

    for cycle in 2..=7 {
        bed.tick(cycle);
    }
    assert_eq!(bed.orch_info(rid).state, ReservationState::Closed);

    match bed.manage(&bed.orch, ManageOp::RemoveReservation { rid }).unwrap() {
        ManageResponse::Ok => {}
        other => panic!("unexpected response {:?}", other),
    }
    assert!(common::reservation_info(&bed.orch, rid).is_none());

    // Slice is empty now, so it can go too.
    bed.manage(&bed.orch, ManageOp::RemoveSlice { slice_id: slice }).unwrap();

    bed.stop();
}
