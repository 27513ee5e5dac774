use serde::{Deserialize, Serialize};
use std::fmt;

use crate::kernel::resource_set::ResourceSet;
use crate::kernel::states::{JoinState, PendingState, ReservationCategory, ReservationState};
use crate::time::clock::Cycle;
use crate::time::term::Term;
use crate::util::id::{ActorName, ReservationId, SliceId};
use crate::util::update_data::UpdateData;

/// Contract for a bounded quantity of resources over a term.
///
/// One entity serves all three categories; the kernel dispatches on
/// `category`, which is fixed at creation. Peer actors are referenced by
/// name and resolved through the proxy registry — never by in-memory
/// pointer — so the entity survives serialization unchanged.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct Reservation {
    rid: ReservationId,
    slice_id: SliceId,
    category: ReservationCategory,

    state: ReservationState,
    pending: PendingState,
    join: JoinState,

    requested_term: Term,
    approved_term: Option<Term>,
    granted_term: Option<Term>,
    previous_term: Option<Term>,

    requested: ResourceSet,
    approved: Option<ResourceSet>,
    granted: Option<ResourceSet>,

    sequence_in: u64,
    sequence_out: u64,

    update_data: UpdateData,

    renewable: bool,
    renew_time: Cycle,

    /// Broker this client reservation tickets against.
    broker: Option<ActorName>,
    /// Authority this client reservation redeems against.
    authority: Option<ActorName>,
    /// Callback topic for server-side categories: where updates go.
    callback: Option<ActorName>,

    /// Set when a restart interrupted a mutating pending operation; the
    /// request is re-issued once the RPC engine is released.
    pending_recover: bool,

    #[serde(skip)]
    dirty: bool,
}

impl Reservation {
    pub fn new(
        rid: ReservationId,
        slice_id: SliceId,
        category: ReservationCategory,
        resources: ResourceSet,
        term: Term,
    ) -> Self {
        Reservation {
            rid,
            slice_id,
            category,
            state: ReservationState::Nascent,
            pending: PendingState::None,
            join: JoinState::None,
            requested_term: term,
            approved_term: None,
            granted_term: None,
            previous_term: None,
            requested: resources,
            approved: None,
            granted: None,
            sequence_in: 0,
            sequence_out: 0,
            update_data: UpdateData::new(),
            renewable: false,
            renew_time: 0,
            broker: None,
            authority: None,
            callback: None,
            pending_recover: false,
            dirty: true,
        }
    }

    pub fn rid(&self) -> ReservationId {
        self.rid
    }

    pub fn slice_id(&self) -> SliceId {
        self.slice_id
    }

    pub fn category(&self) -> ReservationCategory {
        self.category
    }

    pub fn state(&self) -> ReservationState {
        self.state
    }

    pub fn pending(&self) -> PendingState {
        self.pending
    }

    pub fn join(&self) -> JoinState {
        self.join
    }

    pub fn set_join(&mut self, join: JoinState) {
        self.join = join;
        self.dirty = true;
    }

    /// Advances the composite state. Primary-state regressions violate a
    /// kernel invariant and abort.
    pub fn transition(&mut self, prefix: &str, state: ReservationState, pending: PendingState) {
        assert!(
            self.state.can_transition_to(state),
            "reservation {} illegal transition {} -> {} ({})",
            self.rid,
            self.state,
            state,
            prefix
        );
        log::debug!(
            "Reservation #{} {}: ({}, {}) -> ({}, {})",
            self.rid,
            prefix,
            self.state,
            self.pending,
            state,
            pending
        );
        self.state = state;
        self.pending = pending;
        self.dirty = true;
    }

    /// Fails the reservation, recording the notice for the client echo.
    pub fn fail(&mut self, message: impl Into<String>) {
        let message = message.into();
        log::warn!("Reservation #{} failed: {}", self.rid, message);
        self.update_data.error(message);
        self.state = ReservationState::Failed;
        self.pending = PendingState::None;
        self.dirty = true;
    }

    // --- terms -----------------------------------------------------------

    pub fn requested_term(&self) -> &Term {
        &self.requested_term
    }

    pub fn set_requested_term(&mut self, term: Term) {
        self.requested_term = term;
        self.dirty = true;
    }

    pub fn approved_term(&self) -> Option<&Term> {
        self.approved_term.as_ref()
    }

    pub fn approve(&mut self, term: Term, resources: ResourceSet) {
        self.approved_term = Some(term);
        self.approved = Some(resources);
        self.dirty = true;
    }

    pub fn granted_term(&self) -> Option<&Term> {
        self.granted_term.as_ref()
    }

    /// Installs a newly granted term/resource pair, retiring the previous
    /// grant.
    pub fn grant(&mut self, term: Term, resources: ResourceSet) {
        self.previous_term = self.granted_term.take();
        self.granted_term = Some(term);
        self.granted = Some(resources);
        self.dirty = true;
    }

    pub fn previous_term(&self) -> Option<&Term> {
        self.previous_term.as_ref()
    }

    /// Term governing scheduling decisions: the granted term once one
    /// exists, the requested term before that.
    pub fn effective_term(&self) -> &Term {
        self.granted_term.as_ref().unwrap_or(&self.requested_term)
    }

    // --- resources -------------------------------------------------------

    pub fn requested_resources(&self) -> &ResourceSet {
        &self.requested
    }

    pub fn set_requested_resources(&mut self, resources: ResourceSet) {
        self.requested = resources;
        self.dirty = true;
    }

    pub fn approved_resources(&self) -> Option<&ResourceSet> {
        self.approved.as_ref()
    }

    pub fn granted_resources(&self) -> Option<&ResourceSet> {
        self.granted.as_ref()
    }

    // --- sequences -------------------------------------------------------

    pub fn sequence_out(&self) -> u64 {
        self.sequence_out
    }

    /// Strictly increasing; called once per outbound message for this
    /// reservation.
    pub fn next_sequence_out(&mut self) -> u64 {
        self.sequence_out += 1;
        self.dirty = true;
        self.sequence_out
    }

    pub fn sequence_in(&self) -> u64 {
        self.sequence_in
    }

    /// Sequence gate: stale messages are acknowledged but produce no effect.
    pub fn accept_inbound(&mut self, sequence: u64) -> bool {
        if sequence <= self.sequence_in {
            return false;
        }
        self.sequence_in = sequence;
        self.dirty = true;
        true
    }

    // --- notices ---------------------------------------------------------

    pub fn update_data(&self) -> &UpdateData {
        &self.update_data
    }

    pub fn update_data_mut(&mut self) -> &mut UpdateData {
        self.dirty = true;
        &mut self.update_data
    }

    // --- renewal ---------------------------------------------------------

    pub fn is_renewable(&self) -> bool {
        self.renewable
    }

    pub fn set_renewable(&mut self, renewable: bool) {
        self.renewable = renewable;
        self.dirty = true;
    }

    pub fn renew_time(&self) -> Cycle {
        self.renew_time
    }

    pub fn set_renew_time(&mut self, cycle: Cycle) {
        self.renew_time = cycle;
        self.dirty = true;
    }

    // --- peer routing ----------------------------------------------------

    pub fn broker(&self) -> Option<&ActorName> {
        self.broker.as_ref()
    }

    pub fn set_broker(&mut self, broker: ActorName) {
        self.broker = Some(broker);
        self.dirty = true;
    }

    pub fn authority(&self) -> Option<&ActorName> {
        self.authority.as_ref()
    }

    pub fn set_authority(&mut self, authority: ActorName) {
        self.authority = Some(authority);
        self.dirty = true;
    }

    pub fn callback(&self) -> Option<&ActorName> {
        self.callback.as_ref()
    }

    pub fn set_callback(&mut self, callback: ActorName) {
        self.callback = Some(callback);
        self.dirty = true;
    }

    // --- flags -----------------------------------------------------------

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

    // --- predicates ------------------------------------------------------

    pub fn is_nascent(&self) -> bool {
        self.state == ReservationState::Nascent
    }

    pub fn is_ticketed(&self) -> bool {
        self.state == ReservationState::Ticketed
    }

    pub fn is_active(&self) -> bool {
        self.state == ReservationState::Active
    }

    pub fn is_active_ticketed(&self) -> bool {
        self.state == ReservationState::ActiveTicketed
    }

    pub fn is_closed(&self) -> bool {
        self.state == ReservationState::Closed
    }

    pub fn is_failed(&self) -> bool {
        self.state == ReservationState::Failed
    }

    pub fn is_terminal(&self) -> bool {
        self.state.is_terminal()
    }

    pub fn is_no_pending(&self) -> bool {
        self.pending == PendingState::None
    }

    /// Pending gate: true when a new mutating operation may be issued.
    pub fn may_issue(&self) -> bool {
        self.pending == PendingState::None && !self.is_terminal()
    }

    /// True while the reservation is in a state that permits held resource
    /// units.
    pub fn permits_units(&self) -> bool {
        matches!(
            self.state,
            ReservationState::Ticketed
                | ReservationState::Active
                | ReservationState::ActiveTicketed
                | ReservationState::CloseWait
        )
    }
}

impl fmt::Display for Reservation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "#{} [{:?}] ({}, {}) slice {} {} {}",
            self.rid,
            self.category,
            self.state,
            self.pending,
            self.slice_id,
            self.requested,
            self.effective_term()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kernel::resource_set::ResourceType;

    fn fresh() -> Reservation {
        Reservation::new(
            ReservationId::new(),
            SliceId::new(),
            ReservationCategory::Client,
            ResourceSet::new(2, ResourceType::new("vm")),
            Term::new(5, 10),
        )
    }

    #[test]
    fn sequence_gate_ignores_stale_messages() {
        let mut r = fresh();
        assert!(r.accept_inbound(1));
        assert!(r.accept_inbound(2));
        assert!(!r.accept_inbound(2));
        assert!(!r.accept_inbound(1));
        assert!(r.accept_inbound(5));
    }

    #[test]
    fn outbound_sequence_strictly_increases() {
        let mut r = fresh();
        let a = r.next_sequence_out();
        let b = r.next_sequence_out();
        assert!(b > a);
    }

    #[test]
    fn pending_gate_blocks_while_pending() {
        let mut r = fresh();
        assert!(r.may_issue());
        r.transition("ticket", ReservationState::Nascent, PendingState::Ticketing);
        assert!(!r.may_issue());
        r.transition("update ticket", ReservationState::Ticketed, PendingState::None);
        assert!(r.may_issue());
    }

    #[test]
    fn blocked_pending_is_gated() {
        let mut r = fresh();
        r.transition("block", ReservationState::Nascent, PendingState::Blocked);
        assert!(!r.may_issue());
    }

    #[test]
    #[should_panic(expected = "illegal transition")]
    fn primary_regression_panics() {
        let mut r = fresh();
        r.transition("ticket", ReservationState::Ticketed, PendingState::None);
        r.transition("lease", ReservationState::Active, PendingState::None);
        r.transition("bogus", ReservationState::Nascent, PendingState::None);
    }

    #[test]
    fn grant_retires_previous_term() {
        let mut r = fresh();
        let first = Term::new(5, 10);
        let second = first.extend_by(5);
        r.grant(first, ResourceSet::new(2, ResourceType::new("vm")));
        r.grant(second, ResourceSet::new(2, ResourceType::new("vm")));
        assert_eq!(r.previous_term(), Some(&first));
        assert_eq!(r.granted_term(), Some(&second));
    }
}
