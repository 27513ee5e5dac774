use serde::{Deserialize, Serialize};

use crate::kernel::resource_set::{PropertyBag, ResourceType};
use crate::kernel::states::UnitState;
use crate::util::id::{ReservationId, UnitId};

/// Leaf resource record owned by an authority-side reservation: one VM, one
/// circuit, one switch port.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct Unit {
    unit_id: UnitId,
    /// Set when this unit was carved out of a larger parent unit.
    parent_id: Option<UnitId>,
    reservation_id: ReservationId,
    rtype: ResourceType,
    state: UnitState,
    properties: PropertyBag,

    #[serde(skip)]
    dirty: bool,
}

impl Unit {
    pub fn new(unit_id: UnitId, reservation_id: ReservationId, rtype: ResourceType) -> Self {
        Unit {
            unit_id,
            parent_id: None,
            reservation_id,
            rtype,
            state: UnitState::Default,
            properties: PropertyBag::new(),
            dirty: true,
        }
    }

    pub fn unit_id(&self) -> UnitId {
        self.unit_id
    }

    pub fn parent_id(&self) -> Option<UnitId> {
        self.parent_id
    }

    pub fn set_parent_id(&mut self, parent: UnitId) {
        self.parent_id = Some(parent);
        self.dirty = true;
    }

    pub fn reservation_id(&self) -> ReservationId {
        self.reservation_id
    }

    pub fn rtype(&self) -> &ResourceType {
        &self.rtype
    }

    pub fn state(&self) -> UnitState {
        self.state
    }

    pub fn transition(&mut self, state: UnitState) {
        log::debug!("Unit #{}: {:?} -> {:?}", self.unit_id, self.state, state);
        self.state = state;
        self.dirty = true;
    }

    pub fn properties(&self) -> &PropertyBag {
        &self.properties
    }

    pub fn properties_mut(&mut self) -> &mut PropertyBag {
        self.dirty = true;
        &mut self.properties
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub fn clear_dirty(&mut self) {
        self.dirty = false;
    }
}
