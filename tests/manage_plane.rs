mod common;

use common::{Testbed, VM};
use slicebed::error::ErrorCode;
use slicebed::kernel::event::KernelEvent;
use slicebed::kernel::resource_set::{PropertyBag, ResourceSet, ResourceType};
use slicebed::kernel::slice::SliceKind;
use slicebed::kernel::states::ReservationState;
use slicebed::kernel::ActorRole;
use slicebed::manage::events::{ActorEvent, EventFilter};
use slicebed::manage::{ManageOp, ManageResponse};
use slicebed::policy::ClientSimplePolicy;
use slicebed::rpc::wire::{RequestBody, ReservationRequest, WireRecord};
use slicebed::security::{AccessChecker, AuthToken, KeyringValidator, PermitAll};
use slicebed::time::Term;
use slicebed::util::id::{ActorGuid, ActorName, ReservationId, SliceId};

/// Event subscribers see the reservation walk its state machine.
#[test]
fn subscribers_observe_state_changes() {
    let bed = Testbed::start(Box::new(ClientSimplePolicy::new()));
    let slice = bed.add_client_slice("workload");

    let subscription = match bed
        .manage(&bed.orch, ManageOp::Subscribe { filter: EventFilter { slice_id: Some(slice), rid: None } })
        .unwrap()
    {
        ManageResponse::Subscription(id) => id,
        other => panic!("unexpected response {:?}", other),
    };

    let rid = bed.add_reservation(slice, 1, VM, 3, 6, false);
    bed.demand(rid);
    for cycle in 1..=7 {
        bed.tick(cycle);
    }

    let events = match bed.manage(&bed.orch, ManageOp::DrainEvents { subscription }).unwrap() {
        ManageResponse::Events(events) => events,
        other => panic!("unexpected response {:?}", other),
    };

    let states: Vec<ReservationState> = events
        .iter()
        .filter_map(|event| match event {
            ActorEvent::ReservationStateChanged { rid: r, state, .. } if *r == rid => Some(*state),
            _ => None,
        })
        .collect();
    assert!(states.contains(&ReservationState::Ticketed), "states: {:?}", states);
    assert!(states.contains(&ReservationState::Active), "states: {:?}", states);
    assert!(states.contains(&ReservationState::Closed), "states: {:?}", states);

    bed.manage(&bed.orch, ManageOp::Unsubscribe { subscription }).unwrap();
    bed.stop();
}

/// Delivering the same inbound record twice produces the same state as
/// delivering it once.
#[test]
fn duplicate_inbound_rpc_is_idempotent() {
    let bed = Testbed::start(Box::new(ClientSimplePolicy::new()));

    let rid = ReservationId::new();
    let record = WireRecord::new(
        ActorName::new("orchestrator"),
        AuthToken::new("orchestrator", ActorGuid::new()),
        1,
        RequestBody::Ticket(ReservationRequest {
            rid,
            slice_id: SliceId::new(),
            slice_name: "dup".into(),
            resources: ResourceSet::new(1, ResourceType::new(VM)),
            term: Term::new(5, 10),
        }),
    );

    let queue = bed.broker.queue();
    queue.post(KernelEvent::Incoming(record.clone())).unwrap();
    queue.post(KernelEvent::Incoming(record.clone())).unwrap();
    bed.broker.external_tick(1).unwrap();
    bed.broker.settle().unwrap();

    let info = common::reservation_info(&bed.broker, rid).expect("broker shadow created");
    assert_eq!(info.state, ReservationState::Ticketed);

    // One unit allocated, not two.
    match bed.manage(&bed.broker, ManageOp::GetPoolInfo).unwrap() {
        ManageResponse::Pools(pools) => {
            let vm = pools.iter().find(|p| p.rtype == ResourceType::new(VM)).unwrap();
            assert_eq!(vm.free, common::SITE_POOL_UNITS - 1);
        }
        other => panic!("unexpected response {:?}", other),
    }

    // A third, late duplicate changes nothing either.
    queue.post(KernelEvent::Incoming(record)).unwrap();
    bed.broker.settle().unwrap();
    match bed.manage(&bed.broker, ManageOp::GetPoolInfo).unwrap() {
        ManageResponse::Pools(pools) => {
            let vm = pools.iter().find(|p| p.rtype == ResourceType::new(VM)).unwrap();
            assert_eq!(vm.free, common::SITE_POOL_UNITS - 1);
        }
        other => panic!("unexpected response {:?}", other),
    }

    bed.stop();
}

/// Unauthenticated and unauthorized management calls return distinct
/// error codes.
#[test]
fn management_access_is_checked() {
    let clock = slicebed::time::ActorClock::new(0, 3_600_000);
    let context = slicebed::context::Context::new(clock, common::fast_retry());
    let mut dirs = Vec::new();

    let mut keys = std::collections::HashMap::new();
    keys.insert("operator".to_string(), "secret".to_string());

    let orch = slicebed::kernel::ActorHandle::spawn(slicebed::kernel::ActorSpec {
        name: ActorName::new("orchestrator"),
        guid: ActorGuid::new(),
        role: ActorRole::Orchestrator,
        policy: Box::new(ClientSimplePolicy::new()),
        store: common::temp_store(&mut dirs),
        context,
        access: AccessChecker::new(Box::new(KeyringValidator::new(keys)), Box::new(PermitAll)),
        default_broker: None,
        default_authority: None,
    })
    .unwrap();

    let add_slice = || ManageOp::AddSlice {
        name: "demo".into(),
        kind: SliceKind::Client,
        graph_id: None,
        properties: PropertyBag::new(),
    };

    let anonymous = AuthToken::new("operator", ActorGuid::new());
    let err = orch.manage(anonymous, add_slice()).unwrap_err();
    assert_eq!(err.code(), ErrorCode::AuthenticationFailure);

    let wrong = AuthToken::new("operator", ActorGuid::new()).with_token("wrong");
    let err = orch.manage(wrong, add_slice()).unwrap_err();
    assert_eq!(err.code(), ErrorCode::AuthenticationFailure);

    let operator = AuthToken::new("operator", ActorGuid::new()).with_token("secret");
    assert!(orch.manage(operator, add_slice()).is_ok());

    orch.stop();
}

/// Actor directory answers and pool snapshots flow through the plane.
#[test]
fn directory_and_pools_are_visible() {
    let bed = Testbed::start(Box::new(ClientSimplePolicy::new()));

    match bed.manage(&bed.orch, ManageOp::GetBrokers).unwrap() {
        ManageResponse::Actors(brokers) => {
            assert_eq!(brokers.len(), 1);
            assert_eq!(brokers[0].name, ActorName::new("broker"));
        }
        other => panic!("unexpected response {:?}", other),
    }

    match bed.manage(&bed.orch, ManageOp::GetActors).unwrap() {
        ManageResponse::Actors(actors) => assert_eq!(actors.len(), 3),
        other => panic!("unexpected response {:?}", other),
    }

    match bed.manage(&bed.site, ManageOp::GetPoolInfo).unwrap() {
        ManageResponse::Pools(pools) => {
            assert_eq!(pools.len(), 1);
            assert_eq!(pools[0].total, common::SITE_POOL_UNITS);
        }
        other => panic!("unexpected response {:?}", other),
    }

    bed.stop();
}
