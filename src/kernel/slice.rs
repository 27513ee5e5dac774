use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;

use crate::error::{Error, Result};
use crate::kernel::resource_set::PropertyBag;
use crate::security::AuthToken;
use crate::util::id::{DelegationId, ReservationId, SliceId};

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub enum SliceKind {
    /// Holds the resources an actor owns outright (authority inventory).
    Inventory,
    /// Groups reservations made on behalf of a user workload.
    Client,
    /// Broker-side shadow of a client at another actor.
    BrokerClient,
}

/// Named container grouping related reservations under one owner. Ownership
/// is arena-style: the slice holds ids, the kernel registries hold the
/// entities, and removal requires the slice to be empty.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct Slice {
    slice_id: SliceId,
    name: String,
    owner: AuthToken,
    kind: SliceKind,
    /// Resource-model graph attached to this slice, if any.
    graph_id: Option<String>,
    properties: PropertyBag,

    reservations: HashSet<ReservationId>,
    delegations: HashSet<DelegationId>,

    #[serde(skip)]
    dirty: bool,
}

impl Slice {
    pub fn new(slice_id: SliceId, name: impl Into<String>, owner: AuthToken, kind: SliceKind) -> Self {
        Slice {
            slice_id,
            name: name.into(),
            owner,
            kind,
            graph_id: None,
            properties: PropertyBag::new(),
            reservations: HashSet::new(),
            delegations: HashSet::new(),
            dirty: true,
        }
    }

    pub fn slice_id(&self) -> SliceId {
        self.slice_id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn set_name(&mut self, name: impl Into<String>) {
        self.name = name.into();
        self.dirty = true;
    }

    pub fn owner(&self) -> &AuthToken {
        &self.owner
    }

    pub fn kind(&self) -> SliceKind {
        self.kind
    }

    pub fn graph_id(&self) -> Option<&str> {
        self.graph_id.as_deref()
    }

    pub fn set_graph_id(&mut self, graph_id: impl Into<String>) {
        self.graph_id = Some(graph_id.into());
        self.dirty = true;
    }

    pub fn properties(&self) -> &PropertyBag {
        &self.properties
    }

    pub fn properties_mut(&mut self) -> &mut PropertyBag {
        self.dirty = true;
        &mut self.properties
    }

    pub fn register_reservation(&mut self, rid: ReservationId) {
        self.reservations.insert(rid);
        self.dirty = true;
    }

    pub fn unregister_reservation(&mut self, rid: ReservationId) {
        self.reservations.remove(&rid);
        self.dirty = true;
    }

    pub fn register_delegation(&mut self, id: DelegationId) {
        self.delegations.insert(id);
        self.dirty = true;
    }

    pub fn unregister_delegation(&mut self, id: &DelegationId) {
        self.delegations.remove(id);
        self.dirty = true;
    }

    pub fn reservations(&self) -> impl Iterator<Item = ReservationId> + '_ {
        self.reservations.iter().copied()
    }

    pub fn delegations(&self) -> impl Iterator<Item = &DelegationId> {
        self.delegations.iter()
    }

    pub fn is_empty(&self) -> bool {
        self.reservations.is_empty() && self.delegations.is_empty()
    }

    /// Guard for slice removal: a slice with live reservations or
    /// delegations cannot be removed.
    pub fn ensure_removable(&self) -> Result<()> {
        if self.is_empty() {
            Ok(())
        } else {
            Err(Error::InvalidSlice {
                slice_id: self.slice_id,
                message: format!(
                    "slice has {} reservations and {} delegations",
                    self.reservations.len(),
                    self.delegations.len()
                ),
            })
        }
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub fn set_dirty(&mut self) {
        self.dirty = true;
    }

    pub fn clear_dirty(&mut self) {
        self.dirty = false;
    }
}

impl fmt::Display for Slice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({:?}, {} reservations) owned by {}", self.name, self.kind, self.reservations.len(), self.owner)
    }
}
