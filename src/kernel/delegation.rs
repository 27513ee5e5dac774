use serde::{Deserialize, Serialize};
use std::fmt;

use crate::kernel::states::DelegationState;
use crate::util::id::{ActorName, DelegationId, SliceId};
use crate::util::update_data::UpdateData;

/// Signed offer of a resource pool from an authority to a broker. The graph
/// it carries is an opaque property blob signed by its issuer; the kernel
/// moves it around but never interprets it.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct Delegation {
    delegation_id: DelegationId,
    slice_id: SliceId,
    state: DelegationState,

    sequence_in: u64,
    sequence_out: u64,

    update_data: UpdateData,

    /// Opaque serialized resource-model graph.
    graph: Option<Vec<u8>>,

    /// Site that issued the delegation (routing target for claim/reclaim).
    site: Option<ActorName>,
    /// Callback topic for updates on the owning side.
    callback: Option<ActorName>,

    pending_recover: bool,

    #[serde(skip)]
    dirty: bool,
}

impl Delegation {
    pub fn new(delegation_id: DelegationId, slice_id: SliceId) -> Self {
        Delegation {
            delegation_id,
            slice_id,
            state: DelegationState::Nascent,
            sequence_in: 0,
            sequence_out: 0,
            update_data: UpdateData::new(),
            graph: None,
            site: None,
            callback: None,
            pending_recover: false,
            dirty: true,
        }
    }

    pub fn delegation_id(&self) -> &DelegationId {
        &self.delegation_id
    }

    pub fn slice_id(&self) -> SliceId {
        self.slice_id
    }

    pub fn state(&self) -> DelegationState {
        self.state
    }

    pub fn transition(&mut self, prefix: &str, state: DelegationState) {
        assert!(
            self.state.can_transition_to(state),
            "delegation {} illegal transition {} -> {} ({})",
            self.delegation_id,
            self.state,
            state,
            prefix
        );
        log::debug!("Delegation #{} {}: {} -> {}", self.delegation_id, prefix, self.state, state);
        self.state = state;
        self.dirty = true;
    }

    pub fn fail(&mut self, message: impl Into<String>) {
        let message = message.into();
        log::warn!("Delegation #{} failed: {}", self.delegation_id, message);
        self.update_data.error(message);
        self.state = DelegationState::Failed;
        self.dirty = true;
    }

    pub fn graph(&self) -> Option<&[u8]> {
        self.graph.as_deref()
    }

    pub fn set_graph(&mut self, graph: Vec<u8>) {
        self.graph = Some(graph);
        self.dirty = true;
    }

    pub fn site(&self) -> Option<&ActorName> {
        self.site.as_ref()
    }

    pub fn set_site(&mut self, site: ActorName) {
        self.site = Some(site);
        self.dirty = true;
    }

    pub fn callback(&self) -> Option<&ActorName> {
        self.callback.as_ref()
    }

    pub fn set_callback(&mut self, callback: ActorName) {
        self.callback = Some(callback);
        self.dirty = true;
    }

    pub fn sequence_out(&self) -> u64 {
        self.sequence_out
    }

    pub fn next_sequence_out(&mut self) -> u64 {
        self.sequence_out += 1;
        self.dirty = true;
        self.sequence_out
    }

    pub fn accept_inbound(&mut self, sequence: u64) -> bool {
        if sequence <= self.sequence_in {
            return false;
        }
        self.sequence_in = sequence;
        self.dirty = true;
        true
    }

    pub fn update_data(&self) -> &UpdateData {
        &self.update_data
    }

    pub fn update_data_mut(&mut self) -> &mut UpdateData {
        self.dirty = true;
        &mut self.update_data
    }

    pub fn is_delegated(&self) -> bool {
        self.state == DelegationState::Delegated
    }

    pub fn is_failed(&self) -> bool {
        self.state == DelegationState::Failed
    }

    pub fn is_closed(&self) -> bool {
        self.state == DelegationState::Closed
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

    pub fn is_pending_recover(&self) -> bool {
        self.pending_recover
    }

    pub fn set_pending_recover(&mut self, value: bool) {
        self.pending_recover = value;
        self.dirty = true;
    }
}

impl fmt::Display for Delegation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{} [{}] slice {}", self.delegation_id, self.state, self.slice_id)
    }
}
