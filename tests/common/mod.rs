#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use slicebed::context::Context;
use slicebed::error::Result;
use slicebed::kernel::resource_set::{PropertyBag, ResourceType};
use slicebed::kernel::slice::SliceKind;
use slicebed::kernel::{ActorHandle, ActorRole, ActorSpec};
use slicebed::manage::{DelegationInfo, ManageOp, ManageResponse, ReservationInfo};
use slicebed::policy::{AuthorityUnitPolicy, BrokerSimplePolicy, Policy};
use slicebed::proxy::ActorProxy;
use slicebed::rpc::wire::WireRecord;
use slicebed::rpc::RetryPolicy;
use slicebed::security::AccessChecker;
use slicebed::store::SledStore;
use slicebed::time::clock::Cycle;
use slicebed::time::ActorClock;
use slicebed::util::id::{ActorGuid, ActorName, DelegationId, ReservationId, SliceId};

pub const SITE_POOL_UNITS: u64 = 16;
pub const VM: &str = "vm";

/// Short deadlines so timeout scenarios finish in test time.
pub fn fast_retry() -> RetryPolicy {
    RetryPolicy {
        max_retries: 2,
        backoff_base: Duration::from_millis(10),
        claim_timeout: Duration::from_millis(250),
        query_timeout: Duration::from_millis(250),
    }
}

/// Accepts every record and drops it: a peer that never answers.
pub struct BlackholeProxy {
    name: ActorName,
}

impl BlackholeProxy {
    pub fn new(name: impl Into<String>) -> Self {
        BlackholeProxy { name: ActorName::new(name) }
    }
}

impl ActorProxy for BlackholeProxy {
    fn name(&self) -> &ActorName {
        &self.name
    }

    fn deliver(&self, _record: WireRecord) -> Result<()> {
        Ok(())
    }
}

/// One orchestrator, one broker, one authority wired through local proxies,
/// with a claimed `vm` delegation seeding the broker's inventory.
pub struct Testbed {
    pub context: Arc<Context>,
    pub orch: ActorHandle,
    pub broker: ActorHandle,
    pub site: ActorHandle,
    dirs: Vec<tempfile::TempDir>,
}

pub fn spawn_actor(
    context: &Arc<Context>,
    name: &str,
    role: ActorRole,
    policy: Box<dyn Policy>,
    store: Arc<SledStore>,
    default_broker: Option<&str>,
    default_authority: Option<&str>,
) -> ActorHandle {
    ActorHandle::spawn(ActorSpec {
        name: ActorName::new(name),
        guid: ActorGuid::new(),
        role,
        policy,
        store,
        context: context.clone(),
        access: AccessChecker::open(),
        default_broker: default_broker.map(ActorName::new),
        default_authority: default_authority.map(ActorName::new),
    })
    .expect("actor failed to start")
}

pub fn temp_store(dirs: &mut Vec<tempfile::TempDir>) -> Arc<SledStore> {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(SledStore::open(dir.path().join("db")).unwrap());
    dirs.push(dir);
    store
}

impl Testbed {
    pub fn start(orch_policy: Box<dyn Policy>) -> Testbed {
        Self::start_with_orch_store(orch_policy, None)
    }

    /// Variant keeping the orchestrator's store in the caller's hands, for
    /// crash-recovery scenarios.
    pub fn start_with_orch_store(
        orch_policy: Box<dyn Policy>,
        orch_store: Option<Arc<SledStore>>,
    ) -> Testbed {
        let clock = ActorClock::new(0, 3_600_000);
        let context = Context::new(clock, fast_retry());
        let mut dirs = Vec::new();

        let site_guid = ActorGuid::new();
        let site = ActorHandle::spawn(ActorSpec {
            name: ActorName::new("site"),
            guid: site_guid,
            role: ActorRole::Authority,
            policy: Box::new(AuthorityUnitPolicy::new(
                ActorName::new("site"),
                site_guid,
                vec![(ResourceType::new(VM), SITE_POOL_UNITS)],
            )),
            store: temp_store(&mut dirs),
            context: context.clone(),
            access: AccessChecker::open(),
            default_broker: None,
            default_authority: None,
        })
        .expect("site failed to start");

        let broker_guid = ActorGuid::new();
        let broker = ActorHandle::spawn(ActorSpec {
            name: ActorName::new("broker"),
            guid: broker_guid,
            role: ActorRole::Broker,
            policy: Box::new(BrokerSimplePolicy::new(broker_guid)),
            store: temp_store(&mut dirs),
            context: context.clone(),
            access: AccessChecker::open(),
            default_broker: None,
            default_authority: None,
        })
        .expect("broker failed to start");

        let store = orch_store.unwrap_or_else(|| temp_store(&mut dirs));
        let orch = spawn_actor(
            &context,
            "orchestrator",
            ActorRole::Orchestrator,
            orch_policy,
            store,
            Some("broker"),
            Some("site"),
        );

        let bed = Testbed { context, orch, broker, site, dirs };
        bed.seed_delegation("del-vm");
        bed
    }

    /// Advertises the site pools and claims them into the broker.
    fn seed_delegation(&self, delegation: &str) {
        let delegation_id = DelegationId::new(delegation);

        let site_slice = match self
            .manage(&self.site, ManageOp::AddSlice {
                name: "inventory".into(),
                kind: SliceKind::Inventory,
                graph_id: None,
                properties: PropertyBag::new(),
            })
            .unwrap()
        {
            ManageResponse::Slice(slice_id) => slice_id,
            other => panic!("unexpected response {:?}", other),
        };
        self.manage(&self.site, ManageOp::AddDelegation {
            slice_id: site_slice,
            delegation_id: delegation_id.clone(),
            site: None,
            graph: None,
        })
        .unwrap();

        let broker_slice = match self
            .manage(&self.broker, ManageOp::AddSlice {
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
        self.manage(&self.broker, ManageOp::AddDelegation {
            slice_id: broker_slice,
            delegation_id: delegation_id.clone(),
            site: Some(ActorName::new("site")),
            graph: None,
        })
        .unwrap();
        self.manage(&self.broker, ManageOp::ClaimDelegation { delegation_id }).unwrap();

        self.settle_all();
    }

    pub fn manage(&self, actor: &ActorHandle, op: ManageOp) -> Result<ManageResponse> {
        actor.manage(actor.identity(), op)
    }

    /// Lets every in-flight record land and be absorbed.
    pub fn settle_all(&self) {
        for _ in 0..3 {
            self.orch.settle().unwrap();
            self.broker.settle().unwrap();
            self.site.settle().unwrap();
        }
    }

    /// Drives one cycle across all actors, settling between them so the
    /// cross-actor chains complete within the cycle.
    pub fn tick(&self, cycle: Cycle) {
        self.orch.external_tick(cycle).unwrap();
        self.orch.settle().unwrap();
        self.broker.external_tick(cycle).unwrap();
        self.broker.settle().unwrap();
        self.site.external_tick(cycle).unwrap();
        self.site.settle().unwrap();
        self.settle_all();
    }

    pub fn add_client_slice(&self, name: &str) -> SliceId {
        match self
            .manage(&self.orch, ManageOp::AddSlice {
                name: name.into(),
                kind: SliceKind::Client,
                graph_id: None,
                properties: PropertyBag::new(),
            })
            .unwrap()
        {
            ManageResponse::Slice(slice_id) => slice_id,
            other => panic!("unexpected response {:?}", other),
        }
    }

    pub fn add_reservation(
        &self,
        slice_id: SliceId,
        units: u64,
        rtype: &str,
        start: Cycle,
        end: Cycle,
        renewable: bool,
    ) -> ReservationId {
        match self
            .manage(&self.orch, ManageOp::AddReservation {
                slice_id,
                units,
                rtype: ResourceType::new(rtype),
                start,
                end,
                renewable,
                broker: None,
                authority: None,
            })
            .unwrap()
        {
            ManageResponse::Reservation(rid) => rid,
            other => panic!("unexpected response {:?}", other),
        }
    }

    pub fn demand(&self, rid: ReservationId) {
        self.manage(&self.orch, ManageOp::DemandReservation { rid }).unwrap();
    }

    pub fn orch_info(&self, rid: ReservationId) -> ReservationInfo {
        reservation_info(&self.orch, rid).expect("reservation not found on orchestrator")
    }

    pub fn broker_info(&self, rid: ReservationId) -> Option<ReservationInfo> {
        reservation_info(&self.broker, rid)
    }

    pub fn stop(self) {
        self.orch.stop();
        self.broker.stop();
        self.site.stop();
        drop(self.dirs);
    }
}

pub fn reservation_info(actor: &ActorHandle, rid: ReservationId) -> Option<ReservationInfo> {
    match actor
        .manage(actor.identity(), ManageOp::GetReservations { slice_id: None, state: None })
        .unwrap()
    {
        ManageResponse::Reservations(list) => list.into_iter().find(|info| info.rid == rid),
        other => panic!("unexpected response {:?}", other),
    }
}

pub fn delegation_info(actor: &ActorHandle, delegation: &str) -> Option<DelegationInfo> {
    match actor
        .manage(actor.identity(), ManageOp::GetDelegations { slice_id: None })
        .unwrap()
    {
        ManageResponse::Delegations(list) => {
            list.into_iter().find(|info| info.delegation_id == DelegationId::new(delegation))
        }
        other => panic!("unexpected response {:?}", other),
    }
}
