mod common;

use std::sync::Arc;
use std::time::{Duration, Instant};

use common::{delegation_info, spawn_actor, temp_store, BlackholeProxy};
use slicebed::context::Context;
use slicebed::kernel::slice::SliceKind;
use slicebed::kernel::states::DelegationState;
use slicebed::kernel::ActorRole;
use slicebed::manage::{ManageOp, ManageResponse};
use slicebed::kernel::resource_set::PropertyBag;
use slicebed::policy::BrokerSimplePolicy;
use slicebed::time::ActorClock;
use slicebed::util::id::{ActorName, DelegationId};

/// A claim against a site that never answers times out after the per-call
/// deadline; the delegation fails with a transport-timeout notice.
#[test]
fn unanswered_claim_times_out() {
    let clock = ActorClock::new(0, 3_600_000);
    let context = Context::new(clock, common::fast_retry());
    let mut dirs = Vec::new();

    // The site accepts records and never replies.
    context.registry().register(Arc::new(BlackholeProxy::new("silent-site")));

    let broker_guid = slicebed::util::id::ActorGuid::new();
    let broker = spawn_actor(
        &context,
        "broker",
        ActorRole::Broker,
        Box::new(BrokerSimplePolicy::new(broker_guid)),
        temp_store(&mut dirs),
        None,
        None,
    );

    let slice_id = match broker
        .manage(broker.identity(), ManageOp::AddSlice {
            name: "upstream".into(),
            kind: SliceKind::Inventory,
            graph_id: None,
            properties: PropertyBag::new(),
        })
        .unwrap()
    {
        ManageResponse::Slice(slice_id) => slice_id,
        other => panic!("unexpected response {:?}", other),
    };

    broker
        .manage(broker.identity(), ManageOp::AddDelegation {
            slice_id,
            delegation_id: DelegationId::new("del-lost"),
            site: Some(ActorName::new("silent-site")),
            graph: None,
        })
        .unwrap();
    broker
        .manage(broker.identity(), ManageOp::ClaimDelegation {
            delegation_id: DelegationId::new("del-lost"),
        })
        .unwrap();

    // The deadline is 250 ms in the test retry policy.
    let deadline = Instant::now() + Duration::from_secs(5);
    let failed = loop {
        broker.settle().unwrap();
        let info = delegation_info(&broker, "del-lost").unwrap();
        if info.state == DelegationState::Failed {
            break info;
        }
        assert!(Instant::now() < deadline, "claim never timed out: {:?}", info);
        std::thread::sleep(Duration::from_millis(20));
    };

    let notice = failed.error_message.unwrap();
    assert!(notice.contains("TransportTimeout"), "notice was: {}", notice);
    assert_eq!(context.engine().outstanding(), 0);

    broker.stop();
}

/// A claim towards an unreachable peer exhausts its retries and fails with
/// a transport failure rather than hanging forever.
#[test]
fn unreachable_site_exhausts_retries() {
    let clock = ActorClock::new(0, 3_600_000);
    let context = Context::new(clock, common::fast_retry());
    let mut dirs = Vec::new();

    let broker_guid = slicebed::util::id::ActorGuid::new();
    let broker = spawn_actor(
        &context,
        "broker",
        ActorRole::Broker,
        Box::new(BrokerSimplePolicy::new(broker_guid)),
        temp_store(&mut dirs),
        None,
        None,
    );

    let slice_id = match broker
        .manage(broker.identity(), ManageOp::AddSlice {
            name: "upstream".into(),
            kind: SliceKind::Inventory,
            graph_id: None,
            properties: PropertyBag::new(),
        })
        .unwrap()
    {
        ManageResponse::Slice(slice_id) => slice_id,
        other => panic!("unexpected response {:?}", other),
    };

    broker
        .manage(broker.identity(), ManageOp::AddDelegation {
            slice_id,
            delegation_id: DelegationId::new("del-nowhere"),
            site: Some(ActorName::new("no-such-site")),
            graph: None,
        })
        .unwrap();
    broker
        .manage(broker.identity(), ManageOp::ClaimDelegation {
            delegation_id: DelegationId::new("del-nowhere"),
        })
        .unwrap();

    let deadline = Instant::now() + Duration::from_secs(5);
    let failed = loop {
        broker.settle().unwrap();
        let info = delegation_info(&broker, "del-nowhere").unwrap();
        if info.state == DelegationState::Failed {
            break info;
        }
        assert!(Instant::now() < deadline, "claim never failed: {:?}", info);
        std::thread::sleep(Duration::from_millis(20));
    };

    let notice = failed.error_message.unwrap();
    assert!(
        notice.contains("TransportFailure") || notice.contains("TransportTimeout"),
        "notice was: {}",
        notice
    );

    broker.stop();
}
