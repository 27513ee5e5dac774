pub mod sled_store;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::kernel::delegation::Delegation;
use crate::kernel::reservation::Reservation;
use crate::kernel::slice::{Slice, SliceKind};
use crate::kernel::states::{DelegationState, JoinState, PendingState, ReservationCategory, ReservationState, UnitState};
use crate::kernel::unit::Unit;
use crate::util::id::{ActorGuid, ActorName, DelegationId, Guid, ReservationId, SliceId, UnitId};

pub use sled_store::SledStore;

/// Blob schema version. Bump when an entity gains or loses fields in a way
/// serde defaults cannot paper over.
pub const SCHEMA_VERSION: u16 = 1;

/// Versioned, self-describing envelope around every persisted entity, so
/// blobs survive process upgrades and out-of-band inspection.
#[derive(Serialize, Deserialize)]
struct Envelope<T> {
    v: u16,
    entity: T,
}

pub fn encode_entity<T: Serialize>(entity: &T) -> Result<Vec<u8>> {
    serde_json::to_vec(&Envelope { v: SCHEMA_VERSION, entity })
        .map_err(|e| Error::Database(format!("entity serialization failed: {}", e)))
}

pub fn decode_entity<T: DeserializeOwned>(blob: &[u8]) -> Result<T> {
    let envelope: Envelope<T> = serde_json::from_slice(blob)
        .map_err(|e| Error::Database(format!("entity deserialization failed: {}", e)))?;
    if envelope.v > SCHEMA_VERSION {
        return Err(Error::Database(format!("blob schema v{} is newer than this build", envelope.v)));
    }
    Ok(envelope.entity)
}

// --- rows ---------------------------------------------------------------
//
// Each row carries the scalar columns recovery and the management plane
// filter on, plus the full entity blob.

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct ActorRecord {
    pub name: ActorName,
    pub guid: ActorGuid,
    pub role: String,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct SliceRow {
    pub slice_id: SliceId,
    pub owner_actor: ActorName,
    pub kind: SliceKind,
    pub graph_id: Option<String>,
    pub blob: Vec<u8>,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct ReservationRow {
    pub rid: ReservationId,
    pub slice_id: SliceId,
    pub category: ReservationCategory,
    pub state: ReservationState,
    pub pending: PendingState,
    pub join: JoinState,
    pub blob: Vec<u8>,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct DelegationRow {
    pub delegation_id: DelegationId,
    pub slice_id: SliceId,
    pub state: DelegationState,
    pub blob: Vec<u8>,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct UnitRow {
    pub unit_id: UnitId,
    pub parent_id: Option<UnitId>,
    pub reservation_id: ReservationId,
    pub state: UnitState,
    pub blob: Vec<u8>,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct ProxyRecord {
    pub name: ActorName,
    pub kind: String,
    pub addr: Option<String>,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct ClientRecord {
    pub name: String,
    pub guid: Guid,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct ManagerObjectRecord {
    pub id: Guid,
    pub kind: String,
    pub actor: Option<ActorName>,
    pub blob: Vec<u8>,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct PluginRecord {
    pub kind: String,
    pub description: String,
}

/// Transactional snapshot gateway for every persisted entity. All kernel
/// mutations flow through here; recovery streams entities back by category.
pub trait ActorStore: Send + Sync {
    fn put_actor(&self, record: &ActorRecord) -> Result<()>;
    fn get_actor(&self, name: &ActorName) -> Result<Option<ActorRecord>>;

    fn put_slice(&self, owner: &ActorName, slice: &Slice) -> Result<()>;
    fn remove_slice(&self, slice_id: SliceId) -> Result<()>;
    fn get_slice(&self, slice_id: SliceId) -> Result<Option<Slice>>;
    fn slices_by_actor(&self, owner: &ActorName) -> Result<Vec<Slice>>;

    fn put_reservation(&self, r: &Reservation) -> Result<()>;
    fn remove_reservation(&self, rid: ReservationId) -> Result<()>;
    fn get_reservation(&self, rid: ReservationId) -> Result<Option<Reservation>>;
    fn reservations_by_slice(&self, slice_id: SliceId) -> Result<Vec<Reservation>>;

    fn put_delegation(&self, d: &Delegation) -> Result<()>;
    fn remove_delegation(&self, id: &DelegationId) -> Result<()>;
    fn delegations_by_slice(&self, slice_id: SliceId) -> Result<Vec<Delegation>>;

    fn put_unit(&self, u: &Unit) -> Result<()>;
    fn remove_unit(&self, id: UnitId) -> Result<()>;
    fn units_by_reservation(&self, rid: ReservationId) -> Result<Vec<Unit>>;

    fn put_proxy(&self, p: &ProxyRecord) -> Result<()>;
    fn proxies(&self) -> Result<Vec<ProxyRecord>>;

    fn put_client(&self, c: &ClientRecord) -> Result<()>;
    fn clients(&self) -> Result<Vec<ClientRecord>>;

    fn put_manager_object(&self, m: &ManagerObjectRecord) -> Result<()>;
    fn manager_objects(&self) -> Result<Vec<ManagerObjectRecord>>;

    fn put_plugin(&self, p: &PluginRecord) -> Result<()>;
    fn plugins(&self) -> Result<Vec<PluginRecord>>;

    fn set_config_mapping(&self, key: &str, value: &str) -> Result<()>;
    fn get_config_mapping(&self, key: &str) -> Result<Option<String>>;

    fn set_misc(&self, key: &str, blob: &[u8]) -> Result<()>;
    fn get_misc(&self, key: &str) -> Result<Option<Vec<u8>>>;

    /// Durability barrier; called on shutdown and after recovery-critical
    /// writes.
    fn flush(&self) -> Result<()>;
}
