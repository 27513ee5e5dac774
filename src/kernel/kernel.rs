use std::collections::HashMap;
use std::sync::Arc;

use crate::calendar::ActorCalendar;
use crate::context::Context;
use crate::error::{Error, Result};
use crate::kernel::actor::ActorRole;
use crate::kernel::delegation::Delegation;
use crate::kernel::event::KernelEvent;
use crate::kernel::queue::QueueHandle;
use crate::kernel::reservation::Reservation;
use crate::kernel::resource_set::{Concrete, ResourceSet};
use crate::kernel::slice::{Slice, SliceKind};
use crate::kernel::states::{
    DelegationState, PendingState, ReservationCategory, ReservationState, UnitState,
};
use crate::kernel::unit::Unit;
use crate::manage::events::{ActorEvent, EventManager};
use crate::manage::{
    DelegationInfo, ManageError, ManageOp, ManageResponse, ReservationInfo, SliceInfo, UnitInfo,
};
use crate::policy::{Allocation, BindOutcome, Policy};
use crate::rpc::{FailedRpcBody, FailureCode, Outbound, RequestBody, WireRecord};
use crate::rpc::wire::{RequestKind, ReservationRequest, ReservationUpdate};
use crate::security::{AccessChecker, AuthToken};
use crate::store::{ActorRecord, ActorStore};
use crate::time::clock::Cycle;
use crate::time::term::Term;
use crate::util::id::{ActorGuid, ActorName, DelegationId, ReservationId, SliceId, UnitId};

/// Everything needed to assemble one actor kernel.
pub struct ActorSpec {
    pub name: ActorName,
    pub guid: ActorGuid,
    pub role: ActorRole,
    pub policy: Box<dyn Policy>,
    pub store: Arc<dyn ActorStore>,
    pub context: Arc<Context>,
    pub access: AccessChecker,
    /// Broker demanded client reservations ticket against, unless the
    /// reservation names its own.
    pub default_broker: Option<ActorName>,
    /// Authority redeemed client reservations are sent to by default.
    pub default_authority: Option<ActorName>,
}

/// Single-threaded dispatcher owning all actor state. Only the kernel
/// thread touches the registries and the calendar; everything else talks to
/// it through the work queue.
pub struct Kernel {
    pub(crate) name: ActorName,
    pub(crate) guid: ActorGuid,
    pub(crate) role: ActorRole,
    pub(crate) identity: AuthToken,
    pub(crate) queue: QueueHandle,

    pub(crate) slices: HashMap<SliceId, Slice>,
    pub(crate) reservations: HashMap<ReservationId, Reservation>,
    pub(crate) delegations: HashMap<DelegationId, Delegation>,
    pub(crate) units: HashMap<UnitId, Unit>,
    pub(crate) calendar: ActorCalendar,

    pub(crate) policy: Box<dyn Policy>,
    pub(crate) store: Arc<dyn ActorStore>,
    pub(crate) context: Arc<Context>,
    pub(crate) access: AccessChecker,
    pub(crate) events: EventManager,

    pub(crate) current_cycle: Cycle,
    pub(crate) recovered: bool,
    pub(crate) default_broker: Option<ActorName>,
    pub(crate) default_authority: Option<ActorName>,

    published: HashMap<ReservationId, (ReservationState, PendingState)>,
    published_delegations: HashMap<DelegationId, DelegationState>,
    /// Answered queries awaiting pickup through `PollQuery`.
    query_results: HashMap<crate::util::id::Guid, crate::kernel::resource_set::PropertyBag>,
}

impl Kernel {
    pub fn new(spec: ActorSpec, queue: QueueHandle) -> Self {
        let identity = AuthToken::new(spec.name.as_str(), spec.guid);
        Kernel {
            name: spec.name,
            guid: spec.guid,
            role: spec.role,
            identity,
            queue,
            slices: HashMap::new(),
            reservations: HashMap::new(),
            delegations: HashMap::new(),
            units: HashMap::new(),
            calendar: ActorCalendar::new(),
            policy: spec.policy,
            store: spec.store,
            context: spec.context,
            access: spec.access,
            events: EventManager::new(),
            current_cycle: 0,
            recovered: false,
            default_broker: spec.default_broker,
            default_authority: spec.default_authority,
            published: HashMap::new(),
            published_delegations: HashMap::new(),
            query_results: HashMap::new(),
        }
    }

    /// Records this actor and its active policy in the store on first boot.
    pub(crate) fn ensure_actor_record(&mut self) -> Result<()> {
        if self.store.get_actor(&self.name)?.is_none() {
            self.store.put_actor(&ActorRecord {
                name: self.name.clone(),
                guid: self.guid,
                role: self.role.as_str().to_string(),
            })?;
        }
        self.store.put_plugin(&crate::store::PluginRecord {
            kind: self.policy.name().to_string(),
            description: format!("{} policy for {}", self.role.as_str(), self.name),
        })?;
        Ok(())
    }

    /// Drains the queue until shutdown. Every event is followed by a flush
    /// of dirty entities so persistence precedes the acknowledgement the
    /// next event may depend on.
    pub fn run(mut self) {
        log::info!("kernel {} ({}) entering event loop", self.name, self.role.as_str());
        while let Some(event) = self.queue.wait_next() {
            match event {
                KernelEvent::Tick { cycle } => self.handle_tick(cycle),
                KernelEvent::Incoming(record) => self.handle_incoming(record),
                KernelEvent::FailedOutbound(body) => self.handle_failed(body, false),
                KernelEvent::Manage { token, op, reply } => {
                    let response = self.handle_manage(&token, op);
                    // Persist before acknowledging.
                    self.flush_dirty();
                    let _ = reply.send(response);
                }
                KernelEvent::Stop => {
                    self.shutdown();
                    break;
                }
            }
            self.flush_dirty();
        }
        log::info!("kernel {} stopped", self.name);
    }

    fn shutdown(&mut self) {
        log::info!("kernel {} shutting down", self.name);
        self.context.engine().abort_for(&self.name);
        self.flush_dirty();
        if let Err(e) = self.store.flush() {
            log::error!("final persistence flush failed: {}", e);
        }
        self.context.registry().unregister(&self.name);
        self.context.withdraw(&self.name);
        self.queue.close();
    }

    // --- tick pipeline ---------------------------------------------------

    fn handle_tick(&mut self, cycle: Cycle) {
        if cycle < self.current_cycle {
            log::warn!("tick {} behind current cycle {}; ignored", cycle, self.current_cycle);
            return;
        }
        self.current_cycle = cycle;
        self.policy.prepare(cycle);

        for rid in self.calendar.take_closing(cycle) {
            self.close_reservation(rid, "term expired");
        }
        for rid in self.calendar.take_renewing(cycle) {
            self.renew_reservation(rid);
            self.reap_if_failed(rid);
        }
        for rid in self.calendar.take_redeeming(cycle) {
            self.redeem_reservation(rid);
            self.reap_if_failed(rid);
        }

        let bids = {
            let Kernel { policy, reservations, calendar, .. } = self;
            policy.formulate_bids(cycle, reservations, calendar)
        };
        for rid in bids {
            self.issue_ticket(rid);
            self.reap_if_failed(rid);
        }

        let allocations = {
            let Kernel { policy, reservations, calendar, .. } = self;
            policy.allocate(cycle, reservations, calendar)
        };
        for allocation in allocations {
            self.apply_allocation(allocation);
        }

        self.sweep_close_wait();
        self.run_check_pending();

        let Kernel { policy, calendar, .. } = self;
        policy.finish(cycle, calendar);
    }

    /// A client reservation that failed before any request left the actor
    /// is not on the pending list; schedule its close directly.
    fn reap_if_failed(&mut self, rid: ReservationId) {
        if let Some(r) = self.reservations.get(&rid) {
            if r.category() == ReservationCategory::Client && r.is_failed() {
                self.calendar.remove_scheduled(rid);
                self.calendar.add_closing(rid, self.current_cycle + 1);
            }
        }
    }

    fn run_check_pending(&mut self) {
        let cycle = self.current_cycle;
        let Kernel { policy, reservations, calendar, .. } = self;
        policy.check_pending(reservations, calendar, cycle);
    }

    // --- outbound client operations --------------------------------------

    fn send_to(&self, target: ActorName, sequence: u64, body: RequestBody) {
        let record = WireRecord::new(self.name.clone(), self.identity.clone(), sequence, body);
        self.context.engine().dispatch(Outbound {
            from: self.name.clone(),
            reply_queue: self.queue.clone(),
            target,
            record,
        });
    }

    fn reservation_request(&self, r: &Reservation, term: Term, resources: ResourceSet) -> ReservationRequest {
        let slice_name = self
            .slices
            .get(&r.slice_id())
            .map(|s| s.name().to_string())
            .unwrap_or_default();
        ReservationRequest { rid: r.rid(), slice_id: r.slice_id(), slice_name, resources, term }
    }

    fn issue_ticket(&mut self, rid: ReservationId) {
        let prepared = {
            let Some(r) = self.reservations.get_mut(&rid) else {
                return;
            };
            if !r.may_issue() {
                log::warn!("pending gate holds ticket for {}", r);
                None
            } else if r.broker().is_none() {
                r.fail("no broker to ticket against");
                None
            } else {
                let term = r.approved_term().copied().unwrap_or(*r.requested_term());
                let resources = r
                    .approved_resources()
                    .cloned()
                    .unwrap_or_else(|| r.requested_resources().clone());
                let target = r.broker().cloned().unwrap();
                r.transition("ticket requested", r.state(), PendingState::Ticketing);
                let sequence = r.next_sequence_out();
                Some((target, sequence, term, resources))
            }
        };

        if let Some((target, sequence, term, resources)) = prepared {
            let request = {
                let r = &self.reservations[&rid];
                self.reservation_request(r, term, resources)
            };
            self.calendar.add_pending(rid);
            self.send_to(target, sequence, RequestBody::Ticket(request));
        }
    }

    fn renew_reservation(&mut self, rid: ReservationId) {
        let prepared = {
            let Some(r) = self.reservations.get_mut(&rid) else {
                return;
            };
            if !r.is_active() || !r.may_issue() {
                log::debug!("skipping renew for {}", r);
                return;
            }
            let Some(granted) = r.granted_term().copied() else {
                return;
            };
            // A management extend may have staged a custom extension.
            let extended = if r.requested_term().extends(&granted) {
                *r.requested_term()
            } else {
                granted.extend_by(granted.length().max(1))
            };
            r.set_requested_term(extended);
            let resources = r.requested_resources().clone();
            r.approve(extended, resources.clone());
            let Some(target) = r.broker().cloned() else {
                r.fail("no broker to extend against");
                return;
            };
            r.transition("extend ticket requested", ReservationState::Active, PendingState::ExtendingTicket);
            let sequence = r.next_sequence_out();
            (target, sequence, extended, resources)
        };

        let (target, sequence, term, resources) = prepared;
        let request = {
            let r = &self.reservations[&rid];
            self.reservation_request(r, term, resources)
        };
        self.calendar.add_pending(rid);
        self.send_to(target, sequence, RequestBody::ExtendTicket(request));
    }

    /// Drains the redeeming bucket: first-time redeems for ticketed
    /// reservations, lease extensions for active-ticketed ones.
    fn redeem_reservation(&mut self, rid: ReservationId) {
        enum Op {
            Redeem,
            ExtendLease,
        }

        let prepared = {
            let Some(r) = self.reservations.get_mut(&rid) else {
                return;
            };
            if !r.may_issue() {
                log::warn!("pending gate holds redeem for {}", r);
                return;
            }
            let Some(target) = r.authority().cloned() else {
                r.fail("no authority to redeem against");
                return;
            };
            let Some(term) = r.granted_term().copied() else {
                r.fail("redeem without a granted term");
                return;
            };
            let Some(resources) = r.granted_resources().cloned() else {
                r.fail("redeem without granted resources");
                return;
            };
            match r.state() {
                ReservationState::Ticketed => {
                    r.transition("redeem dispatched", ReservationState::Ticketed, PendingState::Redeeming);
                    (Op::Redeem, target, r.next_sequence_out(), term, resources)
                }
                ReservationState::ActiveTicketed => {
                    r.transition(
                        "extend lease dispatched",
                        ReservationState::ActiveTicketed,
                        PendingState::ExtendingLease,
                    );
                    (Op::ExtendLease, target, r.next_sequence_out(), term, resources)
                }
                _ => {
                    log::debug!("redeem skipped for {}", r);
                    return;
                }
            }
        };

        let (op, target, sequence, term, resources) = prepared;
        let request = {
            let r = &self.reservations[&rid];
            self.reservation_request(r, term, resources)
        };
        self.calendar.add_pending(rid);
        let body = match op {
            Op::Redeem => RequestBody::Redeem(request),
            Op::ExtendLease => RequestBody::ExtendLease(request),
        };
        self.send_to(target, sequence, body);
    }

    /// Closes a reservation, by category. Client closes propagate to the
    /// remote side holding the concrete resources; server closes retire
    /// local state.
    fn close_reservation(&mut self, rid: ReservationId, reason: &str) {
        enum Wire {
            None,
            Relinquish(ActorName, u64),
            Close(ActorName, u64),
        }

        let wire = {
            let Some(r) = self.reservations.get_mut(&rid) else {
                return;
            };
            if r.is_closed() {
                return;
            }
            log::debug!("closing {} ({})", r, reason);
            match r.category() {
                ReservationCategory::Client => {
                    if r.is_failed() {
                        r.transition("close failed reservation", ReservationState::Closed, PendingState::None);
                        Wire::None
                    } else if !r.is_no_pending() {
                        // Close while an operation is in flight: park until
                        // the pending operation clears.
                        r.transition("close deferred", r.state(), PendingState::ClosingJoining);
                        return;
                    } else {
                        match r.state() {
                            ReservationState::Nascent => {
                                r.transition("close", ReservationState::Closed, PendingState::None);
                                Wire::None
                            }
                            ReservationState::Ticketed => {
                                // Never redeemed: give the ticket back.
                                let target = r.broker().cloned();
                                r.transition("relinquish", ReservationState::Closed, PendingState::None);
                                match target {
                                    Some(target) => Wire::Relinquish(target, r.next_sequence_out()),
                                    None => Wire::None,
                                }
                            }
                            ReservationState::Active | ReservationState::ActiveTicketed => {
                                let target = r.authority().cloned();
                                r.transition("close dispatched", ReservationState::Closed, PendingState::Closing);
                                match target {
                                    Some(target) => Wire::Close(target, r.next_sequence_out()),
                                    None => Wire::None,
                                }
                            }
                            ReservationState::CloseWait => {
                                r.transition("close", ReservationState::Closed, PendingState::None);
                                Wire::None
                            }
                            _ => Wire::None,
                        }
                    }
                }
                ReservationCategory::Broker => {
                    r.transition("close", ReservationState::Closed, PendingState::None);
                    Wire::None
                }
                ReservationCategory::Authority => {
                    // Units wind down first; the sweep finishes the close
                    // and notifies the client.
                    if !r.is_failed() {
                        r.transition("close wait", ReservationState::CloseWait, PendingState::None);
                    }
                    Wire::None
                }
            }
        };

        match wire {
            Wire::None => {}
            Wire::Relinquish(target, sequence) => {
                self.send_to(target, sequence, RequestBody::Relinquish { rid });
            }
            Wire::Close(target, sequence) => {
                self.calendar.add_pending(rid);
                self.send_to(target, sequence, RequestBody::Close { rid });
            }
        }

        let r = &self.reservations[&rid];
        if r.category() == ReservationCategory::Authority && r.state() == ReservationState::CloseWait {
            self.begin_unit_teardown(rid);
        } else if r.is_closed() && r.is_no_pending() {
            self.retire_reservation(rid);
        }
    }

    fn begin_unit_teardown(&mut self, rid: ReservationId) {
        for unit in self.units.values_mut() {
            if unit.reservation_id() == rid && unit.state() != UnitState::Closing {
                unit.transition(UnitState::Closing);
            }
        }
    }

    /// Releases policy bookkeeping for a reservation that reached a
    /// terminal state with no pending operation.
    fn retire_reservation(&mut self, rid: ReservationId) {
        {
            let Kernel { policy, reservations, calendar, .. } = self;
            if let Some(r) = reservations.get(&rid) {
                policy.release(r, calendar);
            }
        }
        self.calendar.remove(rid);
        let dead_units: Vec<UnitId> = self
            .units
            .values()
            .filter(|u| u.reservation_id() == rid)
            .map(|u| u.unit_id())
            .collect();
        for unit_id in dead_units {
            self.units.remove(&unit_id);
            if let Err(e) = self.store.remove_unit(unit_id) {
                log::error!("failed to remove unit {}: {}", unit_id, e);
            }
        }
    }

    /// Authority sweep: close-waiting reservations whose units finished
    /// tearing down become closed and the client is notified.
    fn sweep_close_wait(&mut self) {
        let ready: Vec<ReservationId> = self
            .reservations
            .values()
            .filter(|r| {
                r.category() == ReservationCategory::Authority
                    && r.state() == ReservationState::CloseWait
            })
            .map(|r| r.rid())
            .collect();

        for rid in ready {
            let update = {
                let r = self.reservations.get_mut(&rid).unwrap();
                r.transition("close complete", ReservationState::Closed, PendingState::None);
                r.update_data_mut().post("lease closed");
                let term = r.granted_term().copied().unwrap_or(*r.requested_term());
                let resources = r
                    .granted_resources()
                    .cloned()
                    .unwrap_or_else(|| r.requested_resources().clone());
                let callback = r.callback().cloned();
                let sequence = r.next_sequence_out();
                let update_data = r.update_data().clone();
                (callback, sequence, ReservationUpdate { rid, resources, term, update_data })
            };
            let (callback, sequence, payload) = update;
            if let Some(callback) = callback {
                self.send_to(callback, sequence, RequestBody::UpdateLease(payload));
            }
            self.retire_reservation(rid);
        }
    }

    /// Re-sends the request a restart interrupted. The pending state is
    /// already set, so this skips the gate and only rebuilds the wire
    /// record; `pending_recover` clears when the answer is absorbed.
    pub(crate) fn reissue_recovered(&mut self, rid: ReservationId) {
        let prepared = {
            let Some(r) = self.reservations.get(&rid) else {
                return;
            };
            let broker = r.broker().cloned();
            let authority = r.authority().cloned();
            let approved_term = r.approved_term().copied().unwrap_or(*r.requested_term());
            let approved_resources = r
                .approved_resources()
                .cloned()
                .unwrap_or_else(|| r.requested_resources().clone());
            let granted_term = r.granted_term().copied();
            let granted_resources = r.granted_resources().cloned();

            match r.pending() {
                PendingState::Ticketing => broker.map(|target| {
                    (target, RequestBody::Ticket(self.reservation_request(r, approved_term, approved_resources)))
                }),
                PendingState::ExtendingTicket => broker.map(|target| {
                    (target, RequestBody::ExtendTicket(self.reservation_request(r, approved_term, approved_resources)))
                }),
                PendingState::Redeeming => match (authority, granted_term, granted_resources) {
                    (Some(target), Some(term), Some(resources)) => {
                        Some((target, RequestBody::Redeem(self.reservation_request(r, term, resources))))
                    }
                    _ => None,
                },
                PendingState::ExtendingLease => match (authority, granted_term, granted_resources) {
                    (Some(target), Some(term), Some(resources)) => {
                        Some((target, RequestBody::ExtendLease(self.reservation_request(r, term, resources))))
                    }
                    _ => None,
                },
                PendingState::ModifyingLease => {
                    let properties = granted_resources
                        .map(|rs| rs.properties().clone())
                        .unwrap_or_default();
                    authority.map(|target| (target, RequestBody::ModifyLease { rid, properties }))
                }
                PendingState::Closing => authority.map(|target| (target, RequestBody::Close { rid })),
                _ => None,
            }
        };

        let Some((target, body)) = prepared else {
            log::warn!("cannot re-issue interrupted request for {}", rid);
            return;
        };
        let sequence = {
            let r = self.reservations.get_mut(&rid).unwrap();
            r.next_sequence_out()
        };
        log::info!("re-issuing {:?} for recovered reservation {}", body.kind(), rid);
        self.calendar.add_pending(rid);
        self.send_to(target, sequence, body);
    }

    // --- broker allocation ------------------------------------------------

    fn apply_allocation(&mut self, allocation: Allocation) {
        let rid = allocation.rid;
        let update = {
            let Some(r) = self.reservations.get_mut(&rid) else {
                return;
            };
            match allocation.outcome {
                BindOutcome::Deferred => return,
                BindOutcome::Granted { term, resources } => {
                    r.grant(term, resources.clone());
                    if r.is_nascent() {
                        r.transition("ticket granted", ReservationState::Ticketed, PendingState::None);
                    } else {
                        r.transition("ticket extended", r.state(), PendingState::None);
                    }
                    let callback = r.callback().cloned();
                    let sequence = r.next_sequence_out();
                    let update_data = r.update_data().clone();
                    (callback, sequence, ReservationUpdate { rid, resources, term, update_data })
                }
                BindOutcome::Denied { message } => {
                    r.fail(message);
                    let callback = r.callback().cloned();
                    let sequence = r.next_sequence_out();
                    let update_data = r.update_data().clone();
                    let term = *r.requested_term();
                    let resources = r.requested_resources().clone();
                    (callback, sequence, ReservationUpdate { rid, resources, term, update_data })
                }
            }
        };

        let (callback, sequence, payload) = update;
        match callback {
            Some(callback) => self.send_to(callback, sequence, RequestBody::UpdateTicket(payload)),
            None => log::error!("allocation for {} has no callback", rid),
        }
    }

    // --- inbound dispatch -------------------------------------------------

    fn handle_incoming(&mut self, record: WireRecord) {
        log::debug!("{} <- {:?} from {}", self.name, record.kind(), record.callback_topic);
        match record.body.clone() {
            RequestBody::Ticket(request) => self.handle_ticket(record, request, false),
            RequestBody::ExtendTicket(request) => self.handle_ticket(record, request, true),
            RequestBody::Relinquish { rid } => self.handle_relinquish(record, rid),
            RequestBody::Redeem(request) => self.handle_redeem(record, request, false),
            RequestBody::ExtendLease(request) => self.handle_redeem(record, request, true),
            RequestBody::ModifyLease { rid, properties } => self.handle_modify_lease(record, rid, properties),
            RequestBody::Close { rid } => self.handle_close(record, rid),
            RequestBody::Claim { delegation_id, .. } => self.handle_claim(record, delegation_id, false),
            RequestBody::Reclaim { delegation_id } => self.handle_claim(record, delegation_id, true),
            RequestBody::UpdateTicket(update) => self.handle_update_ticket(record, update),
            RequestBody::UpdateLease(update) => self.handle_update_lease(record, update),
            RequestBody::UpdateDelegation { delegation_id, state, graph, update_data } => {
                self.handle_update_delegation(record, delegation_id, state, graph, update_data)
            }
            RequestBody::Query { properties } => self.handle_query(record, properties),
            RequestBody::QueryResult { request_id, properties } => {
                self.context.engine().complete(request_id);
                log::debug!("query result for {}: {} properties", request_id, properties.len());
                self.query_results.insert(request_id, properties);
            }
            RequestBody::FailedRpc(body) => self.handle_failed(body, true),
            RequestBody::Manage { op } => self.handle_manage_record(record, op),
            RequestBody::ManageResult { request_id, result } => {
                self.context.engine().complete(request_id);
                log::debug!("management result for {}: {:?}", request_id, result.is_ok());
            }
        }
    }

    /// Finds or creates the server-side shadow slice for an inbound
    /// request.
    fn shadow_slice(&mut self, slice_id: SliceId, name: &str, owner: &AuthToken) -> &mut Slice {
        let kind = match self.role {
            ActorRole::Broker => SliceKind::BrokerClient,
            _ => SliceKind::Client,
        };
        self.slices.entry(slice_id).or_insert_with(|| {
            log::info!("creating shadow slice {} ({})", name, slice_id);
            Slice::new(slice_id, name, owner.clone(), kind)
        })
    }

    fn handle_ticket(&mut self, record: WireRecord, request: ReservationRequest, extend: bool) {
        if self.role != ActorRole::Broker {
            self.reject(&record, "ticket sent to a non-broker");
            return;
        }
        let rid = request.rid;

        if !self.reservations.contains_key(&rid) {
            self.shadow_slice(request.slice_id, &request.slice_name, &record.auth)
                .register_reservation(rid);
            let mut r = Reservation::new(
                rid,
                request.slice_id,
                ReservationCategory::Broker,
                request.resources.clone(),
                request.term,
            );
            r.set_callback(record.callback_topic.clone());
            self.reservations.insert(rid, r);
        }

        let outcome = {
            let Kernel { policy, reservations, calendar, current_cycle, .. } = self;
            let r = reservations.get_mut(&rid).unwrap();
            if !r.accept_inbound(record.sequence) {
                log::info!("stale {:?} for {} ignored", record.kind(), rid);
                return;
            }
            if extend {
                r.set_requested_term(request.term);
                policy.extend(r, calendar, *current_cycle)
            } else {
                policy.bind(r, calendar, *current_cycle)
            }
        };

        match outcome {
            Ok(BindOutcome::Deferred) => {}
            Ok(outcome) => self.apply_allocation(Allocation { rid, outcome }),
            Err(e) => {
                self.apply_allocation(Allocation {
                    rid,
                    outcome: BindOutcome::Denied { message: e.to_string() },
                });
            }
        }
    }

    fn handle_relinquish(&mut self, record: WireRecord, rid: ReservationId) {
        if self.role != ActorRole::Broker {
            self.reject(&record, "relinquish sent to a non-broker");
            return;
        }
        let Some(r) = self.reservations.get_mut(&rid) else {
            log::info!("relinquish for unknown reservation {}", rid);
            return;
        };
        if !r.accept_inbound(record.sequence) {
            return;
        }
        if !r.is_closed() {
            r.transition("relinquished", ReservationState::Closed, PendingState::None);
        }
        self.retire_reservation(rid);
    }

    fn handle_redeem(&mut self, record: WireRecord, request: ReservationRequest, extend: bool) {
        if self.role != ActorRole::Authority {
            self.reject(&record, "redeem sent to a non-authority");
            return;
        }
        let rid = request.rid;

        if !self.reservations.contains_key(&rid) {
            if extend {
                self.reject(&record, "extend lease for unknown reservation");
                return;
            }
            self.shadow_slice(request.slice_id, &request.slice_name, &record.auth)
                .register_reservation(rid);
            let mut r = Reservation::new(
                rid,
                request.slice_id,
                ReservationCategory::Authority,
                request.resources.clone(),
                request.term,
            );
            r.set_callback(record.callback_topic.clone());
            // The redeem carries the broker's ticket.
            r.transition("ticket absorbed", ReservationState::Ticketed, PendingState::None);
            self.reservations.insert(rid, r);
        }

        let outcome = {
            let Kernel { policy, reservations, calendar, current_cycle, .. } = self;
            let r = reservations.get_mut(&rid).unwrap();
            if !r.accept_inbound(record.sequence) {
                log::info!("stale {:?} for {} ignored", record.kind(), rid);
                return;
            }
            if extend {
                r.set_requested_term(request.term);
                policy.extend(r, calendar, *current_cycle)
            } else {
                policy.bind(r, calendar, *current_cycle)
            }
        };

        let update = match outcome {
            Ok(BindOutcome::Granted { term, mut resources }) => {
                // Concrete units come to life here, under the kernel's eye.
                if !extend {
                    let unit_ids = self.create_units(rid, &resources);
                    if let Some(Concrete::Lease(lease)) = resources.concrete_mut() {
                        lease.unit_ids = unit_ids;
                    }
                }
                let r = self.reservations.get_mut(&rid).unwrap();
                r.grant(term, resources.clone());
                if r.state() == ReservationState::Ticketed {
                    r.transition("lease granted", ReservationState::Active, PendingState::None);
                } else {
                    r.transition("lease extended", ReservationState::Active, PendingState::None);
                }
                let sequence = r.next_sequence_out();
                let update_data = r.update_data().clone();
                Some((sequence, ReservationUpdate { rid, resources, term, update_data }))
            }
            Ok(BindOutcome::Denied { message }) => {
                let r = self.reservations.get_mut(&rid).unwrap();
                r.fail(message);
                let sequence = r.next_sequence_out();
                let update_data = r.update_data().clone();
                let term = request.term;
                let resources = request.resources.clone();
                Some((sequence, ReservationUpdate { rid, resources, term, update_data }))
            }
            Ok(BindOutcome::Deferred) => None,
            Err(e) => {
                let r = self.reservations.get_mut(&rid).unwrap();
                r.fail(e.to_string());
                let sequence = r.next_sequence_out();
                let update_data = r.update_data().clone();
                Some((sequence, ReservationUpdate {
                    rid,
                    resources: request.resources.clone(),
                    term: request.term,
                    update_data,
                }))
            }
        };

        if let Some((sequence, payload)) = update {
            self.send_to(record.callback_topic, sequence, RequestBody::UpdateLease(payload));
        }
    }

    fn create_units(&mut self, rid: ReservationId, resources: &ResourceSet) -> Vec<UnitId> {
        let count = resources.units();
        let rtype = resources.rtype().clone();
        let mut ids = Vec::with_capacity(count as usize);
        for _ in 0..count {
            let unit_id = UnitId::new();
            let mut unit = Unit::new(unit_id, rid, rtype.clone());
            unit.transition(UnitState::Active);
            self.units.insert(unit_id, unit);
            ids.push(unit_id);
        }
        ids
    }

    fn handle_modify_lease(
        &mut self,
        record: WireRecord,
        rid: ReservationId,
        properties: crate::kernel::resource_set::PropertyBag,
    ) {
        if self.role != ActorRole::Authority {
            self.reject(&record, "modify lease sent to a non-authority");
            return;
        }
        let update = {
            let Some(r) = self.reservations.get_mut(&rid) else {
                self.reject(&record, "modify lease for unknown reservation");
                return;
            };
            if !r.accept_inbound(record.sequence) {
                return;
            }
            if !r.is_active() {
                self.reject(&record, "modify lease on a reservation that is not active");
                return;
            }
            let mut resources = r
                .granted_resources()
                .cloned()
                .unwrap_or_else(|| r.requested_resources().clone());
            resources.properties_mut().extend(properties);
            let term = r.granted_term().copied().unwrap_or(*r.requested_term());
            r.grant(term, resources.clone());
            r.update_data_mut().post("lease modified");
            let sequence = r.next_sequence_out();
            let update_data = r.update_data().clone();
            (sequence, ReservationUpdate { rid, resources, term, update_data })
        };

        for unit in self.units.values_mut() {
            if unit.reservation_id() == rid {
                unit.transition(UnitState::Modifying);
                unit.transition(UnitState::Active);
            }
        }

        let (sequence, payload) = update;
        self.send_to(record.callback_topic, sequence, RequestBody::UpdateLease(payload));
    }

    fn handle_close(&mut self, record: WireRecord, rid: ReservationId) {
        if self.role != ActorRole::Authority {
            self.reject(&record, "close sent to a non-authority");
            return;
        }
        {
            let Some(r) = self.reservations.get_mut(&rid) else {
                log::info!("close for unknown reservation {}", rid);
                return;
            };
            if !r.accept_inbound(record.sequence) {
                return;
            }
        }
        self.close_reservation(rid, "client close");
    }

    fn handle_claim(&mut self, record: WireRecord, delegation_id: DelegationId, reclaim: bool) {
        if self.role != ActorRole::Authority {
            self.reject(&record, "claim sent to a non-authority");
            return;
        }
        let update = {
            let Some(d) = self.delegations.get_mut(&delegation_id) else {
                self.reject(&record, "no such delegation");
                return;
            };
            if !d.accept_inbound(record.sequence) {
                return;
            }
            if reclaim {
                d.transition("reclaimed", DelegationState::Reclaimed);
            } else {
                d.transition("claim granted", DelegationState::Delegated);
            }
            d.set_callback(record.callback_topic.clone());
            let sequence = d.next_sequence_out();
            (sequence, d.state(), d.graph().map(|g| g.to_vec()), d.update_data().clone())
        };

        let (sequence, state, graph, update_data) = update;
        self.send_to(
            record.callback_topic,
            sequence,
            RequestBody::UpdateDelegation { delegation_id, state, graph, update_data },
        );
    }

    // --- inbound updates (client side) ------------------------------------

    fn handle_update_ticket(&mut self, record: WireRecord, update: ReservationUpdate) {
        let rid = update.rid;
        let close_after = {
            let Some(r) = self.reservations.get_mut(&rid) else {
                log::warn!("ticket update for unknown reservation {}", rid);
                return;
            };
            if !r.accept_inbound(record.sequence) {
                return;
            }
            self.context.engine().complete_for_reservation(rid);
            r.set_pending_recover(false);

            let closing = r.pending() == PendingState::ClosingJoining;
            r.update_data_mut().absorb(&update.update_data);

            if !update.update_data.successful() {
                let notice = update
                    .update_data
                    .message()
                    .unwrap_or("ticket request failed")
                    .to_string();
                r.fail(notice);
                false
            } else {
                r.grant(update.term, update.resources.clone());
                match (r.state(), r.pending()) {
                    (ReservationState::Nascent, PendingState::Ticketing) => {
                        r.transition("ticket absorbed", ReservationState::Ticketed, PendingState::None);
                    }
                    (ReservationState::Active, PendingState::ExtendingTicket) => {
                        r.transition("extend ticket absorbed", ReservationState::ActiveTicketed, PendingState::None);
                    }
                    (state, PendingState::ClosingJoining) => {
                        // Park result, resume the deferred close below.
                        let next = if state == ReservationState::Nascent {
                            ReservationState::Ticketed
                        } else {
                            state
                        };
                        r.transition("ticket absorbed while closing", next, PendingState::None);
                    }
                    (state, pending) => {
                        log::warn!("unexpected ticket update for {} in ({}, {})", rid, state, pending);
                    }
                }
                closing
            }
        };

        self.correlate_update(rid);
        self.run_check_pending();
        if close_after {
            self.close_reservation(rid, "deferred close resumed");
        }
    }

    /// Lets the policy correlate a just-absorbed update with the request
    /// that produced it, before the pending bookkeeping runs.
    fn correlate_update(&mut self, rid: ReservationId) {
        let cycle = self.current_cycle;
        let Kernel { policy, reservations, calendar, .. } = self;
        if let Some(r) = reservations.get_mut(&rid) {
            policy.correlate_update(r, calendar, cycle);
        }
    }

    fn handle_update_lease(&mut self, record: WireRecord, update: ReservationUpdate) {
        let rid = update.rid;
        let mut retire_after = false;
        let close_after = {
            let Some(r) = self.reservations.get_mut(&rid) else {
                log::warn!("lease update for unknown reservation {}", rid);
                return;
            };
            if !r.accept_inbound(record.sequence) {
                return;
            }
            self.context.engine().complete_for_reservation(rid);
            r.set_pending_recover(false);

            let closing = r.pending() == PendingState::ClosingJoining;
            r.update_data_mut().absorb(&update.update_data);

            if r.is_closed() {
                // Close confirmation from the site.
                r.transition("close confirmed", ReservationState::Closed, PendingState::None);
                retire_after = true;
                false
            } else if !update.update_data.successful() {
                let notice = update
                    .update_data
                    .message()
                    .unwrap_or("lease request failed")
                    .to_string();
                r.fail(notice);
                false
            } else {
                r.grant(update.term, update.resources.clone());
                match (r.state(), r.pending()) {
                    (ReservationState::Ticketed, PendingState::Redeeming) => {
                        r.transition("lease absorbed", ReservationState::Active, PendingState::None);
                    }
                    (ReservationState::ActiveTicketed, PendingState::ExtendingLease) => {
                        r.transition("extended lease absorbed", ReservationState::Active, PendingState::None);
                    }
                    (ReservationState::Active, PendingState::ModifyingLease) => {
                        r.transition("modify absorbed", ReservationState::Active, PendingState::None);
                    }
                    (state, PendingState::ClosingJoining) => {
                        let next = if state == ReservationState::Ticketed {
                            ReservationState::Active
                        } else {
                            state
                        };
                        r.transition("lease absorbed while closing", next, PendingState::None);
                    }
                    (state, pending) => {
                        log::warn!("unexpected lease update for {} in ({}, {})", rid, state, pending);
                    }
                }
                closing
            }
        };

        self.correlate_update(rid);
        self.run_check_pending();
        if retire_after {
            self.retire_reservation(rid);
        }
        if close_after {
            self.close_reservation(rid, "deferred close resumed");
        }
    }

    fn handle_update_delegation(
        &mut self,
        record: WireRecord,
        delegation_id: DelegationId,
        state: DelegationState,
        graph: Option<Vec<u8>>,
        update_data: crate::util::update_data::UpdateData,
    ) {
        let Kernel { policy, delegations, context, .. } = self;
        let Some(d) = delegations.get_mut(&delegation_id) else {
            log::warn!("delegation update for unknown delegation {}", delegation_id);
            return;
        };
        if !d.accept_inbound(record.sequence) {
            return;
        }
        context.engine().complete_for_delegation(&delegation_id);
        d.update_data_mut().absorb(&update_data);

        if !update_data.successful() {
            d.fail(update_data.message().unwrap_or("delegation update failed").to_string());
            return;
        }

        if let Some(graph) = graph {
            d.set_graph(graph);
        }
        d.transition("update absorbed", state);

        match state {
            DelegationState::Delegated => {
                if let Err(e) = policy.donate(d) {
                    d.fail(format!("delegation rejected by policy: {}", e));
                }
            }
            DelegationState::Reclaimed | DelegationState::Closed => policy.retract(d),
            _ => {}
        }
    }

    fn handle_query(&mut self, record: WireRecord, properties: crate::kernel::resource_set::PropertyBag) {
        log::debug!("query with {} properties", properties.len());
        let mut response = crate::kernel::resource_set::PropertyBag::new();
        response.insert("name".to_string(), self.name.to_string());
        response.insert("role".to_string(), self.role.as_str().to_string());
        for pool in self.policy.pools() {
            response.insert(format!("pool.{}", pool.rtype), format!("{}/{}", pool.free, pool.total));
        }
        self.send_to(
            record.callback_topic,
            0,
            RequestBody::QueryResult { request_id: record.message_id, properties: response },
        );
    }

    /// Failure of a prior outbound request: synthesized locally by the
    /// engine (timeouts, dead transport) or reported by the peer.
    fn handle_failed(&mut self, body: FailedRpcBody, remote: bool) {
        if remote {
            if self.context.engine().correlate_remote_failure(&body) == crate::rpc::RemoteDisposition::Retried {
                return;
            }
        }

        let code_name = match body.code {
            FailureCode::Timeout => "TransportTimeout",
            FailureCode::Transient | FailureCode::Permanent => "TransportFailure",
            FailureCode::Remote => "RemoteError",
        };
        let notice = format!("{}: {:?} failed: {}", code_name, body.kind, body.message);
        log::warn!("{}", notice);

        if let Some(rid) = body.rid {
            if let Some(r) = self.reservations.get_mut(&rid) {
                if !r.is_terminal() {
                    r.fail(notice.clone());
                }
            }
            self.run_check_pending();
        }
        if let Some(delegation_id) = body.delegation_id {
            if let Some(d) = self.delegations.get_mut(&delegation_id) {
                if !d.is_closed() {
                    d.fail(notice);
                }
            }
        }
    }

    /// Sends a failed-RPC record back for an inbound request this kernel
    /// cannot process. Never replies to a failed-RPC with a failed-RPC.
    fn reject(&self, record: &WireRecord, message: &str) {
        log::warn!("rejecting {:?} from {}: {}", record.kind(), record.callback_topic, message);
        if record.kind() == RequestKind::FailedRpc {
            return;
        }
        let body = FailedRpcBody {
            request_id: record.message_id,
            kind: record.kind(),
            rid: record.body.rid(),
            delegation_id: record.body.delegation_id().cloned(),
            code: FailureCode::Remote,
            message: message.to_string(),
        };
        self.send_to(record.callback_topic.clone(), 0, RequestBody::FailedRpc(body));
    }

    fn handle_manage_record(&mut self, record: WireRecord, op: ManageOp) {
        let result = self
            .handle_manage(&record.auth, op)
            .map_err(|e| ManageError::new(e.code(), e.to_string()));
        let body = RequestBody::ManageResult { request_id: record.message_id, result };
        self.send_to(record.callback_topic, 0, body);
    }

    // --- dirty flush & events ---------------------------------------------

    fn flush_dirty(&mut self) {
        let mut events = Vec::new();

        for slice in self.slices.values_mut() {
            if slice.is_dirty() {
                match self.store.put_slice(&self.name, slice) {
                    Ok(()) => slice.clear_dirty(),
                    Err(e) => log::error!("persisting slice {} failed: {}", slice.slice_id(), e),
                }
            }
        }
        for r in self.reservations.values_mut() {
            if r.is_dirty() {
                match self.store.put_reservation(r) {
                    Ok(()) => r.clear_dirty(),
                    Err(e) => log::error!("persisting reservation {} failed: {}", r.rid(), e),
                }
            }
            let snapshot = (r.state(), r.pending());
            if self.published.get(&r.rid()) != Some(&snapshot) {
                self.published.insert(r.rid(), snapshot);
                events.push(ActorEvent::ReservationStateChanged {
                    rid: r.rid(),
                    slice_id: r.slice_id(),
                    state: snapshot.0,
                    pending: snapshot.1,
                });
                if r.is_failed() {
                    events.push(ActorEvent::ReservationFailed {
                        rid: r.rid(),
                        slice_id: r.slice_id(),
                        message: r.update_data().message().unwrap_or("").to_string(),
                    });
                }
            }
        }
        for d in self.delegations.values_mut() {
            if d.is_dirty() {
                match self.store.put_delegation(d) {
                    Ok(()) => d.clear_dirty(),
                    Err(e) => log::error!("persisting delegation {} failed: {}", d.delegation_id(), e),
                }
            }
            if self.published_delegations.get(d.delegation_id()) != Some(&d.state()) {
                self.published_delegations.insert(d.delegation_id().clone(), d.state());
                events.push(ActorEvent::DelegationStateChanged {
                    delegation_id: d.delegation_id().clone(),
                    state: d.state(),
                });
            }
        }
        for unit in self.units.values_mut() {
            if unit.is_dirty() {
                match self.store.put_unit(unit) {
                    Ok(()) => unit.clear_dirty(),
                    Err(e) => log::error!("persisting unit {} failed: {}", unit.unit_id(), e),
                }
            }
        }

        for event in events {
            self.events.publish(event);
        }
    }

    // --- management plane -------------------------------------------------

    fn handle_manage(&mut self, token: &AuthToken, op: ManageOp) -> Result<ManageResponse> {
        let (action, resource, resource_id) = op.access_tuple();
        self.access.check_access(token, action, resource, &resource_id, self.role)?;

        match op {
            ManageOp::AddSlice { name, kind, graph_id, properties } => {
                let slice_id = SliceId::new();
                let mut slice = Slice::new(slice_id, name.clone(), token.clone(), kind);
                if let Some(graph_id) = graph_id {
                    slice.set_graph_id(graph_id);
                }
                *slice.properties_mut() = properties;
                self.slices.insert(slice_id, slice);
                self.events.publish(ActorEvent::SliceAdded { slice_id, name });
                Ok(ManageResponse::Slice(slice_id))
            }
            ManageOp::UpdateSlice { slice_id, name, graph_id, properties } => {
                let slice = self.slices.get_mut(&slice_id).ok_or(Error::NoSuchSlice(slice_id))?;
                if let Some(name) = name {
                    slice.set_name(name);
                }
                if let Some(graph_id) = graph_id {
                    slice.set_graph_id(graph_id);
                }
                if let Some(properties) = properties {
                    *slice.properties_mut() = properties;
                }
                Ok(ManageResponse::Ok)
            }
            ManageOp::RemoveSlice { slice_id } => {
                let slice = self.slices.get(&slice_id).ok_or(Error::NoSuchSlice(slice_id))?;
                slice.ensure_removable()?;
                self.slices.remove(&slice_id);
                self.store.remove_slice(slice_id)?;
                self.events.publish(ActorEvent::SliceRemoved { slice_id });
                Ok(ManageResponse::Ok)
            }
            ManageOp::GetSlices => {
                let slices = self.slices.values().map(slice_info).collect();
                Ok(ManageResponse::Slices(slices))
            }
            ManageOp::AddReservation { slice_id, units, rtype, start, end, renewable, broker, authority } => {
                if self.role != ActorRole::Orchestrator {
                    return Err(Error::InvalidArguments(
                        "reservations are added on the orchestrator".to_string(),
                    ));
                }
                if start >= end {
                    return Err(Error::InvalidArguments("reservation term is empty".to_string()));
                }
                let slice = self.slices.get_mut(&slice_id).ok_or(Error::NoSuchSlice(slice_id))?;
                let rid = ReservationId::new();
                slice.register_reservation(rid);

                let mut r = Reservation::new(
                    rid,
                    slice_id,
                    ReservationCategory::Client,
                    ResourceSet::new(units, rtype),
                    Term::new(start, end),
                );
                r.set_renewable(renewable);
                if let Some(broker) = broker.or_else(|| self.default_broker.clone()) {
                    r.set_broker(broker);
                }
                if let Some(authority) = authority.or_else(|| self.default_authority.clone()) {
                    r.set_authority(authority);
                }
                self.reservations.insert(rid, r);
                Ok(ManageResponse::Reservation(rid))
            }
            ManageOp::UpdateReservation { rid, units, renewable } => {
                let r = self.reservations.get_mut(&rid).ok_or(Error::NoSuchReservation(rid))?;
                if !r.is_nascent() {
                    return Err(Error::InvalidReservation {
                        rid,
                        message: "only nascent reservations can be updated".to_string(),
                    });
                }
                if let Some(units) = units {
                    let rtype = r.requested_resources().rtype().clone();
                    let mut resources = ResourceSet::new(units, rtype);
                    *resources.properties_mut() = r.requested_resources().properties().clone();
                    r.set_requested_resources(resources);
                }
                if let Some(renewable) = renewable {
                    r.set_renewable(renewable);
                }
                Ok(ManageResponse::Ok)
            }
            ManageOp::DemandReservation { rid } => {
                let cycle = self.current_cycle;
                let Kernel { policy, reservations, calendar, .. } = self;
                let r = reservations.get_mut(&rid).ok_or(Error::NoSuchReservation(rid))?;
                if !r.is_nascent() {
                    return Err(Error::InvalidReservation {
                        rid,
                        message: format!("demand on a {} reservation", r.state()),
                    });
                }
                if r.broker().is_none() {
                    return Err(Error::NoSuchBroker("no broker configured".to_string()));
                }
                policy.demand(r, calendar, cycle);
                Ok(ManageResponse::Ok)
            }
            ManageOp::ExtendReservation { rid, length } => {
                if length == 0 {
                    return Err(Error::InvalidArguments("zero-length extension".to_string()));
                }
                let cycle = self.current_cycle;
                let r = self.reservations.get_mut(&rid).ok_or(Error::NoSuchReservation(rid))?;
                if !r.is_active() {
                    return Err(Error::InvalidReservation {
                        rid,
                        message: "only active reservations can be extended".to_string(),
                    });
                }
                let granted = *r.granted_term().ok_or(Error::InvalidReservation {
                    rid,
                    message: "no granted term to extend".to_string(),
                })?;
                r.set_requested_term(granted.extend_by(length));
                self.calendar.remove_renewing(rid);
                self.calendar.add_renewing(rid, cycle + 1);
                Ok(ManageResponse::Ok)
            }
            ManageOp::ModifyReservation { rid, properties } => {
                let prepared = {
                    let r = self.reservations.get_mut(&rid).ok_or(Error::NoSuchReservation(rid))?;
                    if !r.is_active() || !r.may_issue() {
                        return Err(Error::InvalidReservation {
                            rid,
                            message: "modify requires an active, idle reservation".to_string(),
                        });
                    }
                    let target = r.authority().cloned().ok_or(Error::InvalidReservation {
                        rid,
                        message: "no authority to modify against".to_string(),
                    })?;
                    r.transition("modify dispatched", ReservationState::Active, PendingState::AbsorbUpdate);
                    (target, r.next_sequence_out())
                };
                let (target, sequence) = prepared;
                self.calendar.add_pending(rid);
                self.send_to(target, sequence, RequestBody::ModifyLease { rid, properties });
                Ok(ManageResponse::Ok)
            }
            ManageOp::CloseReservation { rid } => {
                if !self.reservations.contains_key(&rid) {
                    return Err(Error::NoSuchReservation(rid));
                }
                self.close_reservation(rid, "management close");
                Ok(ManageResponse::Ok)
            }
            ManageOp::RemoveReservation { rid } => {
                let r = self.reservations.get(&rid).ok_or(Error::NoSuchReservation(rid))?;
                if !r.is_terminal() {
                    return Err(Error::InvalidReservation {
                        rid,
                        message: "only closed or failed reservations can be removed".to_string(),
                    });
                }
                let slice_id = r.slice_id();
                self.reservations.remove(&rid);
                self.calendar.remove(rid);
                self.published.remove(&rid);
                if let Some(slice) = self.slices.get_mut(&slice_id) {
                    slice.unregister_reservation(rid);
                }
                self.store.remove_reservation(rid)?;
                Ok(ManageResponse::Ok)
            }
            ManageOp::GetReservations { slice_id, state } => {
                let reservations = self
                    .reservations
                    .values()
                    .filter(|r| slice_id.map_or(true, |sid| r.slice_id() == sid))
                    .filter(|r| state.map_or(true, |s| r.state() == s))
                    .map(reservation_info)
                    .collect();
                Ok(ManageResponse::Reservations(reservations))
            }
            ManageOp::AddDelegation { slice_id, delegation_id, site, graph } => {
                if !self.slices.contains_key(&slice_id) {
                    return Err(Error::NoSuchSlice(slice_id));
                }
                if self.delegations.contains_key(&delegation_id) {
                    return Err(Error::InvalidArguments(format!(
                        "delegation {} already exists",
                        delegation_id
                    )));
                }
                let mut d = Delegation::new(delegation_id.clone(), slice_id);
                if let Some(site) = site {
                    d.set_site(site);
                }
                match graph {
                    Some(graph) => d.set_graph(graph),
                    None => self.policy.donate(&mut d)?,
                }
                self.slices
                    .get_mut(&slice_id)
                    .unwrap()
                    .register_delegation(delegation_id);
                self.delegations.insert(d.delegation_id().clone(), d);
                Ok(ManageResponse::Ok)
            }
            ManageOp::ClaimDelegation { delegation_id } => {
                let prepared = {
                    let d = self
                        .delegations
                        .get_mut(&delegation_id)
                        .ok_or_else(|| Error::NoSuchDelegation(delegation_id.to_string()))?;
                    let site = d.site().cloned().ok_or_else(|| {
                        Error::InvalidArguments(format!("delegation {} names no site", delegation_id))
                    })?;
                    (site, d.slice_id(), d.next_sequence_out())
                };
                let (site, slice_id, sequence) = prepared;
                let slice_name = self
                    .slices
                    .get(&slice_id)
                    .map(|s| s.name().to_string())
                    .unwrap_or_default();
                self.send_to(site, sequence, RequestBody::Claim { delegation_id, slice_id, slice_name });
                Ok(ManageResponse::Ok)
            }
            ManageOp::ReclaimDelegation { delegation_id } => {
                let prepared = {
                    let d = self
                        .delegations
                        .get_mut(&delegation_id)
                        .ok_or_else(|| Error::NoSuchDelegation(delegation_id.to_string()))?;
                    if !d.is_delegated() {
                        return Err(Error::InvalidArguments(format!(
                            "delegation {} is not delegated",
                            delegation_id
                        )));
                    }
                    let site = d.site().cloned().ok_or_else(|| {
                        Error::InvalidArguments(format!("delegation {} names no site", delegation_id))
                    })?;
                    (site, d.next_sequence_out())
                };
                let (site, sequence) = prepared;
                self.send_to(site, sequence, RequestBody::Reclaim { delegation_id });
                Ok(ManageResponse::Ok)
            }
            ManageOp::GetDelegations { slice_id } => {
                let delegations = self
                    .delegations
                    .values()
                    .filter(|d| slice_id.map_or(true, |sid| d.slice_id() == sid))
                    .map(delegation_info)
                    .collect();
                Ok(ManageResponse::Delegations(delegations))
            }
            ManageOp::GetUnits { rid } => {
                let units = self
                    .units
                    .values()
                    .filter(|u| u.reservation_id() == rid)
                    .map(|u| UnitInfo {
                        unit_id: u.unit_id(),
                        reservation_id: u.reservation_id(),
                        rtype: u.rtype().clone(),
                        state: u.state(),
                    })
                    .collect();
                Ok(ManageResponse::Units(units))
            }
            ManageOp::QueryActor { actor, properties } => {
                let record = WireRecord::new(
                    self.name.clone(),
                    self.identity.clone(),
                    0,
                    RequestBody::Query { properties },
                );
                let request_id = record.message_id;
                self.context.engine().dispatch(Outbound {
                    from: self.name.clone(),
                    reply_queue: self.queue.clone(),
                    target: actor,
                    record,
                });
                Ok(ManageResponse::Query(request_id))
            }
            ManageOp::PollQuery { request_id } => {
                Ok(ManageResponse::Properties(self.query_results.remove(&request_id)))
            }
            ManageOp::GetActors => Ok(ManageResponse::Actors(self.context.actors())),
            ManageOp::GetBrokers => Ok(ManageResponse::Actors(self.context.brokers())),
            ManageOp::GetPoolInfo => Ok(ManageResponse::Pools(self.policy.pools())),
            ManageOp::GetVersion => Ok(ManageResponse::Version(self.context.version().clone())),
            ManageOp::Subscribe { filter } => Ok(ManageResponse::Subscription(self.events.subscribe(filter))),
            ManageOp::Unsubscribe { subscription } => {
                if self.events.unsubscribe(subscription) {
                    Ok(ManageResponse::Ok)
                } else {
                    Err(Error::InvalidArguments(format!("unknown subscription {}", subscription)))
                }
            }
            ManageOp::DrainEvents { subscription } => {
                let events = self
                    .events
                    .drain(subscription)
                    .ok_or_else(|| Error::InvalidArguments(format!("unknown subscription {}", subscription)))?;
                Ok(ManageResponse::Events(events))
            }
            ManageOp::Ping => Ok(ManageResponse::Ok),
        }
    }
}

fn slice_info(slice: &Slice) -> SliceInfo {
    SliceInfo {
        slice_id: slice.slice_id(),
        name: slice.name().to_string(),
        kind: slice.kind(),
        owner: slice.owner().name.clone(),
        graph_id: slice.graph_id().map(str::to_string),
        reservations: slice.reservations().count(),
    }
}

fn reservation_info(r: &Reservation) -> ReservationInfo {
    let term = r.effective_term();
    ReservationInfo {
        rid: r.rid(),
        slice_id: r.slice_id(),
        category: r.category(),
        state: r.state(),
        pending: r.pending(),
        join: r.join(),
        units: r.requested_resources().units(),
        rtype: r.requested_resources().rtype().clone(),
        start: term.start(),
        end: term.end(),
        renewable: r.is_renewable(),
        pending_recover: r.is_pending_recover(),
        notices: r.update_data().events().to_vec(),
        error_message: r.update_data().message().map(str::to_string),
    }
}

fn delegation_info(d: &Delegation) -> DelegationInfo {
    DelegationInfo {
        delegation_id: d.delegation_id().clone(),
        slice_id: d.slice_id(),
        state: d.state(),
        error_message: d.update_data().message().map(str::to_string),
    }
}
