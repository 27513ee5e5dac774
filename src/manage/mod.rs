pub mod events;

use serde::{Deserialize, Serialize};

use crate::error::ErrorCode;
use crate::kernel::resource_set::{PropertyBag, ResourceType};
use crate::kernel::slice::SliceKind;
use crate::kernel::states::{
    DelegationState, JoinState, PendingState, ReservationCategory, ReservationState, UnitState,
};
use crate::manage::events::{ActorEvent, EventFilter};
use crate::security::{ActionId, ResourceKind};
use crate::time::clock::Cycle;
use crate::util::id::{ActorGuid, ActorName, DelegationId, Guid, ReservationId, SliceId, UnitId};

/// Management-plane operations. Every variant travels over the kernel queue
/// and is answered synchronously on the kernel thread; the same payloads are
/// accepted from the bus as typed wire records.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub enum ManageOp {
    AddSlice {
        name: String,
        kind: SliceKind,
        graph_id: Option<String>,
        properties: PropertyBag,
    },
    UpdateSlice {
        slice_id: SliceId,
        name: Option<String>,
        graph_id: Option<String>,
        properties: Option<PropertyBag>,
    },
    RemoveSlice { slice_id: SliceId },
    GetSlices,

    AddReservation {
        slice_id: SliceId,
        units: u64,
        rtype: ResourceType,
        start: Cycle,
        end: Cycle,
        renewable: bool,
        broker: Option<ActorName>,
        authority: Option<ActorName>,
    },
    UpdateReservation { rid: ReservationId, units: Option<u64>, renewable: Option<bool> },
    DemandReservation { rid: ReservationId },
    ExtendReservation { rid: ReservationId, length: u64 },
    ModifyReservation { rid: ReservationId, properties: PropertyBag },
    CloseReservation { rid: ReservationId },
    RemoveReservation { rid: ReservationId },
    GetReservations { slice_id: Option<SliceId>, state: Option<ReservationState> },

    AddDelegation {
        slice_id: SliceId,
        delegation_id: DelegationId,
        site: Option<ActorName>,
        graph: Option<Vec<u8>>,
    },
    ClaimDelegation { delegation_id: DelegationId },
    ReclaimDelegation { delegation_id: DelegationId },
    GetDelegations { slice_id: Option<SliceId> },

    GetUnits { rid: ReservationId },
    GetActors,
    GetBrokers,
    GetPoolInfo,
    GetVersion,

    /// Sends a free-form property query to a peer actor; the reply is
    /// fetched with `PollQuery` once it lands.
    QueryActor { actor: ActorName, properties: PropertyBag },
    PollQuery { request_id: Guid },

    Subscribe { filter: EventFilter },
    Unsubscribe { subscription: u64 },
    DrainEvents { subscription: u64 },

    /// Round-trips through the queue without side effects; a successful
    /// reply proves every earlier event has been processed.
    Ping,
}

impl ManageOp {
    /// (action, resource kind, resource id) part of the authorization
    /// tuple; the kernel supplies its own actor role as the fourth element
    /// when it consults the decision point.
    pub fn access_tuple(&self) -> (ActionId, ResourceKind, String) {
        use ManageOp::*;
        match self {
            AddSlice { name, .. } => (ActionId::Add, ResourceKind::Slice, name.clone()),
            UpdateSlice { slice_id, .. } => (ActionId::Update, ResourceKind::Slice, slice_id.to_string()),
            RemoveSlice { slice_id } => (ActionId::Remove, ResourceKind::Slice, slice_id.to_string()),
            GetSlices => (ActionId::Query, ResourceKind::Slice, String::new()),
            AddReservation { slice_id, .. } => (ActionId::Add, ResourceKind::Reservation, slice_id.to_string()),
            UpdateReservation { rid, .. } => (ActionId::Update, ResourceKind::Reservation, rid.to_string()),
            DemandReservation { rid } => (ActionId::Demand, ResourceKind::Reservation, rid.to_string()),
            ExtendReservation { rid, .. } => (ActionId::Extend, ResourceKind::Reservation, rid.to_string()),
            ModifyReservation { rid, .. } => (ActionId::Update, ResourceKind::Reservation, rid.to_string()),
            CloseReservation { rid } => (ActionId::Close, ResourceKind::Reservation, rid.to_string()),
            RemoveReservation { rid } => (ActionId::Remove, ResourceKind::Reservation, rid.to_string()),
            GetReservations { .. } => (ActionId::Query, ResourceKind::Reservation, String::new()),
            AddDelegation { delegation_id, .. } => (ActionId::Add, ResourceKind::Delegation, delegation_id.to_string()),
            ClaimDelegation { delegation_id } => (ActionId::Claim, ResourceKind::Delegation, delegation_id.to_string()),
            ReclaimDelegation { delegation_id } => (ActionId::Reclaim, ResourceKind::Delegation, delegation_id.to_string()),
            GetDelegations { .. } => (ActionId::Query, ResourceKind::Delegation, String::new()),
            GetUnits { rid } => (ActionId::Query, ResourceKind::Unit, rid.to_string()),
            QueryActor { actor, .. } => (ActionId::Query, ResourceKind::Actor, actor.to_string()),
            GetActors | GetBrokers | GetPoolInfo | GetVersion | Subscribe { .. } | Unsubscribe { .. }
            | DrainEvents { .. } | PollQuery { .. } | Ping => (ActionId::Query, ResourceKind::Actor, String::new()),
        }
    }
}

// --- snapshots -----------------------------------------------------------
//
// Management replies are snapshots assembled on the kernel thread; callers
// never see live entities.

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct SliceInfo {
    pub slice_id: SliceId,
    pub name: String,
    pub kind: SliceKind,
    pub owner: String,
    pub graph_id: Option<String>,
    pub reservations: usize,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct ReservationInfo {
    pub rid: ReservationId,
    pub slice_id: SliceId,
    pub category: ReservationCategory,
    pub state: ReservationState,
    pub pending: PendingState,
    pub join: JoinState,
    pub units: u64,
    pub rtype: ResourceType,
    pub start: Cycle,
    pub end: Cycle,
    pub renewable: bool,
    pub pending_recover: bool,
    pub notices: Vec<String>,
    pub error_message: Option<String>,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct DelegationInfo {
    pub delegation_id: DelegationId,
    pub slice_id: SliceId,
    pub state: DelegationState,
    pub error_message: Option<String>,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct UnitInfo {
    pub unit_id: UnitId,
    pub reservation_id: ReservationId,
    pub rtype: ResourceType,
    pub state: UnitState,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct ActorInfo {
    pub name: ActorName,
    pub guid: ActorGuid,
    pub role: String,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct PoolInfo {
    pub rtype: ResourceType,
    pub total: u64,
    pub free: u64,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct VersionInfo {
    pub version: String,
    pub gitsha1: String,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub enum ManageResponse {
    Ok,
    Slice(SliceId),
    Slices(Vec<SliceInfo>),
    Reservation(ReservationId),
    Reservations(Vec<ReservationInfo>),
    Delegations(Vec<DelegationInfo>),
    Units(Vec<UnitInfo>),
    Actors(Vec<ActorInfo>),
    Pools(Vec<PoolInfo>),
    Version(VersionInfo),
    Subscription(u64),
    Events(Vec<ActorEvent>),
    Query(Guid),
    Properties(Option<PropertyBag>),
}

/// Wire-friendly error: code plus rendered message.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct ManageError {
    pub code_name: String,
    pub message: String,
}

impl ManageError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        ManageError { code_name: format!("{:?}", code), message: message.into() }
    }
}
