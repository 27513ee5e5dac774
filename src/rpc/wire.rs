use serde::{Deserialize, Serialize};

use crate::kernel::resource_set::{PropertyBag, ResourceSet};
use crate::kernel::states::DelegationState;
use crate::manage::{ManageError, ManageOp, ManageResponse};
use crate::security::AuthToken;
use crate::time::term::Term;
use crate::util::id::{ActorName, DelegationId, Guid, ReservationId, SliceId};
use crate::util::update_data::UpdateData;

/// Enumerated record kinds carried on the bus. Management requests that do
/// not map to a dedicated kind travel as `Manage`.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RequestKind {
    Claim,
    Reclaim,
    Ticket,
    ExtendTicket,
    Relinquish,
    Redeem,
    ExtendLease,
    ModifyLease,
    Close,
    UpdateTicket,
    UpdateLease,
    UpdateDelegation,
    Query,
    QueryResult,
    FailedRpc,
    AddSlice,
    RemoveSlice,
    UpdateSlice,
    GetSlices,
    AddReservation,
    RemoveReservation,
    UpdateReservation,
    GetReservations,
    AddDelegation,
    GetDelegations,
    GetUnits,
    GetActors,
    GetPoolInfo,
    GetBrokers,
    Manage,
    ManageResult,
}

/// Failure classification attached to a failed-RPC record; drives the retry
/// decision on the requesting side.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureCode {
    /// Transport hiccup; the engine retries with back-off.
    Transient,
    /// Delivery is hopeless; the request is abandoned.
    Permanent,
    /// The per-call deadline expired with no answer.
    Timeout,
    /// The peer processed the request and rejected it.
    Remote,
}

/// Request payload naming a reservation, with the slice context the server
/// side needs to shadow it.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct ReservationRequest {
    pub rid: ReservationId,
    pub slice_id: SliceId,
    pub slice_name: String,
    pub resources: ResourceSet,
    pub term: Term,
}

/// Update payload flowing back along the chain.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct ReservationUpdate {
    pub rid: ReservationId,
    pub resources: ResourceSet,
    pub term: Term,
    pub update_data: UpdateData,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct FailedRpcBody {
    /// Message id of the request that failed.
    pub request_id: Guid,
    pub kind: RequestKind,
    pub rid: Option<ReservationId>,
    pub delegation_id: Option<DelegationId>,
    pub code: FailureCode,
    pub message: String,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub enum RequestBody {
    Claim { delegation_id: DelegationId, slice_id: SliceId, slice_name: String },
    Reclaim { delegation_id: DelegationId },
    Ticket(ReservationRequest),
    ExtendTicket(ReservationRequest),
    Relinquish { rid: ReservationId },
    Redeem(ReservationRequest),
    ExtendLease(ReservationRequest),
    ModifyLease { rid: ReservationId, properties: PropertyBag },
    Close { rid: ReservationId },
    UpdateTicket(ReservationUpdate),
    UpdateLease(ReservationUpdate),
    UpdateDelegation {
        delegation_id: DelegationId,
        state: DelegationState,
        graph: Option<Vec<u8>>,
        update_data: UpdateData,
    },
    Query { properties: PropertyBag },
    QueryResult { request_id: Guid, properties: PropertyBag },
    FailedRpc(FailedRpcBody),
    Manage { op: ManageOp },
    ManageResult { request_id: Guid, result: Result<ManageResponse, ManageError> },
}

impl RequestBody {
    pub fn kind(&self) -> RequestKind {
        match self {
            RequestBody::Claim { .. } => RequestKind::Claim,
            RequestBody::Reclaim { .. } => RequestKind::Reclaim,
            RequestBody::Ticket(_) => RequestKind::Ticket,
            RequestBody::ExtendTicket(_) => RequestKind::ExtendTicket,
            RequestBody::Relinquish { .. } => RequestKind::Relinquish,
            RequestBody::Redeem(_) => RequestKind::Redeem,
            RequestBody::ExtendLease(_) => RequestKind::ExtendLease,
            RequestBody::ModifyLease { .. } => RequestKind::ModifyLease,
            RequestBody::Close { .. } => RequestKind::Close,
            RequestBody::UpdateTicket(_) => RequestKind::UpdateTicket,
            RequestBody::UpdateLease(_) => RequestKind::UpdateLease,
            RequestBody::UpdateDelegation { .. } => RequestKind::UpdateDelegation,
            RequestBody::Query { .. } => RequestKind::Query,
            RequestBody::QueryResult { .. } => RequestKind::QueryResult,
            RequestBody::FailedRpc(_) => RequestKind::FailedRpc,
            RequestBody::ManageResult { .. } => RequestKind::ManageResult,
            RequestBody::Manage { op } => match op {
                ManageOp::AddSlice { .. } => RequestKind::AddSlice,
                ManageOp::RemoveSlice { .. } => RequestKind::RemoveSlice,
                ManageOp::UpdateSlice { .. } => RequestKind::UpdateSlice,
                ManageOp::GetSlices => RequestKind::GetSlices,
                ManageOp::AddReservation { .. } => RequestKind::AddReservation,
                ManageOp::RemoveReservation { .. } => RequestKind::RemoveReservation,
                ManageOp::UpdateReservation { .. } => RequestKind::UpdateReservation,
                ManageOp::GetReservations { .. } => RequestKind::GetReservations,
                ManageOp::AddDelegation { .. } => RequestKind::AddDelegation,
                ManageOp::GetDelegations { .. } => RequestKind::GetDelegations,
                ManageOp::GetUnits { .. } => RequestKind::GetUnits,
                ManageOp::GetActors => RequestKind::GetActors,
                ManageOp::GetPoolInfo => RequestKind::GetPoolInfo,
                ManageOp::GetBrokers => RequestKind::GetBrokers,
                _ => RequestKind::Manage,
            },
        }
    }

    /// Reservation the record refers to, for the sequence gate.
    pub fn rid(&self) -> Option<ReservationId> {
        match self {
            RequestBody::Ticket(r)
            | RequestBody::ExtendTicket(r)
            | RequestBody::Redeem(r)
            | RequestBody::ExtendLease(r) => Some(r.rid),
            RequestBody::Relinquish { rid }
            | RequestBody::ModifyLease { rid, .. }
            | RequestBody::Close { rid } => Some(*rid),
            RequestBody::UpdateTicket(u) | RequestBody::UpdateLease(u) => Some(u.rid),
            RequestBody::FailedRpc(f) => f.rid,
            _ => None,
        }
    }

    pub fn delegation_id(&self) -> Option<&DelegationId> {
        match self {
            RequestBody::Claim { delegation_id, .. }
            | RequestBody::Reclaim { delegation_id }
            | RequestBody::UpdateDelegation { delegation_id, .. } => Some(delegation_id),
            RequestBody::FailedRpc(f) => f.delegation_id.as_ref(),
            _ => None,
        }
    }
}

/// One record on the bus. `callback_topic` names the topic updates and
/// failures travel back on; `sequence` is scoped to the reservation or
/// delegation the body names.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct WireRecord {
    pub message_id: Guid,
    pub callback_topic: ActorName,
    pub auth: AuthToken,
    pub sequence: u64,
    pub body: RequestBody,
}

impl WireRecord {
    pub fn new(callback_topic: ActorName, auth: AuthToken, sequence: u64, body: RequestBody) -> Self {
        WireRecord { message_id: Guid::new(), callback_topic, auth, sequence, body }
    }

    pub fn kind(&self) -> RequestKind {
        self.body.kind()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::util::id::ActorGuid;

    #[test]
    fn records_roundtrip_through_bincode() {
        let record = WireRecord::new(
            ActorName::new("orchestrator"),
            AuthToken::new("orchestrator", ActorGuid::new()),
            7,
            RequestBody::Close { rid: ReservationId::new() },
        );

        let bytes = bincode::serialize(&record).unwrap();
        let decoded: WireRecord = bincode::deserialize(&bytes).unwrap();
        assert_eq!(decoded.message_id, record.message_id);
        assert_eq!(decoded.sequence, 7);
        assert_eq!(decoded.kind(), RequestKind::Close);
        assert_eq!(decoded.body.rid(), record.body.rid());
    }
}
