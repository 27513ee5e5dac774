mod common;

use std::time::{Duration, Instant};

use common::Testbed;
use slicebed::kernel::resource_set::PropertyBag;
use slicebed::manage::{ManageOp, ManageResponse};
use slicebed::policy::ClientSimplePolicy;
use slicebed::util::id::ActorName;

/// Query round-trip: the orchestrator asks the broker for its pools and
/// polls the answer out of the kernel.
#[test]
fn query_reaches_the_broker_and_back() {
    let bed = Testbed::start(Box::new(ClientSimplePolicy::new()));

    let mut properties = PropertyBag::new();
    properties.insert("want".to_string(), "pools".to_string());

    let request_id = match bed
        .manage(&bed.orch, ManageOp::QueryActor { actor: ActorName::new("broker"), properties })
        .unwrap()
    {
        ManageResponse::Query(request_id) => request_id,
        other => panic!("unexpected response {:?}", other),
    };

    let deadline = Instant::now() + Duration::from_secs(5);
    let answer = loop {
        bed.settle_all();
        match bed.manage(&bed.orch, ManageOp::PollQuery { request_id }).unwrap() {
            ManageResponse::Properties(Some(answer)) => break answer,
            ManageResponse::Properties(None) => {
                assert!(Instant::now() < deadline, "query never answered");
                std::thread::sleep(Duration::from_millis(10));
            }
            other => panic!("unexpected response {:?}", other),
        }
    };

    assert_eq!(answer.get("role").map(String::as_str), Some("broker"));
    // The broker's claimed vm pool shows up in the answer.
    assert!(answer.keys().any(|k| k == "pool.vm"), "answer was: {:?}", answer);

    bed.stop();
}

/// Version information is exposed on the management plane.
#[test]
fn version_is_reported() {
    let bed = Testbed::start(Box::new(ClientSimplePolicy::new()));
    match bed.manage(&bed.orch, ManageOp::GetVersion).unwrap() {
        ManageResponse::Version(version) => {
            assert!(!version.version.is_empty());
            assert!(!version.gitsha1.is_empty());
        }
        other => panic!("unexpected response {:?}", other),
    }
    bed.stop();
}
