pub mod authority;
pub mod broker;
pub mod client_simple;
pub mod inventory;
pub mod ticket_review;

use std::collections::HashMap;

use crate::calendar::ActorCalendar;
use crate::error::Result;
use crate::kernel::delegation::Delegation;
use crate::kernel::reservation::Reservation;
use crate::kernel::resource_set::ResourceSet;
use crate::manage::PoolInfo;
use crate::time::clock::Cycle;
use crate::time::term::Term;
use crate::util::id::ReservationId;

pub use authority::AuthorityUnitPolicy;
pub use broker::BrokerSimplePolicy;
pub use client_simple::ClientSimplePolicy;
pub use ticket_review::ClientTicketReviewPolicy;

use crate::error::Error;
use crate::kernel::resource_set::ResourceType;
use crate::util::id::{ActorGuid, ActorName};

/// The kernel's view of the reservation registry, handed to policies that
/// need to walk more than one reservation in a single decision.
pub type ReservationTable = HashMap<ReservationId, Reservation>;

/// Context a policy constructor receives: the hosting actor's identity and
/// its configured pools.
pub struct PolicyParams {
    pub name: ActorName,
    pub guid: ActorGuid,
    pub pools: Vec<(ResourceType, u64)>,
    /// Per-reservation admission cap for review policies.
    pub review_cap: u64,
}

type PolicyCtor = Box<dyn Fn(&PolicyParams) -> Box<dyn Policy> + Send + Sync>;

/// Policies are selected by a stable kind string named in the actor
/// configuration; the registry is populated at build time and extended by
/// explicit registration, never by loading code at runtime.
pub struct PolicyRegistry {
    ctors: HashMap<String, PolicyCtor>,
}

impl PolicyRegistry {
    pub fn with_builtins() -> Self {
        let mut registry = PolicyRegistry { ctors: HashMap::new() };
        registry.register("client-simple", |_| Box::new(ClientSimplePolicy::new()));
        registry.register("client-ticket-review", |params| {
            Box::new(ClientTicketReviewPolicy::new(params.review_cap))
        });
        registry.register("broker-simple", |params| Box::new(BrokerSimplePolicy::new(params.guid)));
        registry.register("authority-unit", |params| {
            Box::new(AuthorityUnitPolicy::new(params.name.clone(), params.guid, params.pools.clone()))
        });
        registry
    }

    pub fn register(
        &mut self,
        kind: impl Into<String>,
        ctor: impl Fn(&PolicyParams) -> Box<dyn Policy> + Send + Sync + 'static,
    ) {
        self.ctors.insert(kind.into(), Box::new(ctor));
    }

    pub fn build(&self, kind: &str, params: &PolicyParams) -> Result<Box<dyn Policy>> {
        let ctor = self
            .ctors
            .get(kind)
            .ok_or_else(|| Error::InvalidArguments(format!("unknown policy kind '{}'", kind)))?;
        Ok(ctor(params))
    }

    pub fn kinds(&self) -> Vec<String> {
        self.ctors.keys().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtin_kinds_resolve() {
        let registry = PolicyRegistry::with_builtins();
        let params = PolicyParams {
            name: ActorName::new("site"),
            guid: ActorGuid::new(),
            pools: vec![(ResourceType::new("vm"), 4)],
            review_cap: 8,
        };
        for kind in ["client-simple", "client-ticket-review", "broker-simple", "authority-unit"] {
            let policy = registry.build(kind, &params).unwrap();
            assert_eq!(policy.name(), kind);
        }
        assert!(registry.build("no-such-kind", &params).is_err());
    }
}

/// Outcome of a server-side admission decision.
#[derive(Debug, Clone)]
pub enum BindOutcome {
    /// Queued; the policy will answer from `allocate` on a later tick.
    Deferred,
    /// Admitted with the approved term and concrete resources.
    Granted { term: Term, resources: ResourceSet },
    /// Refused; the message becomes the client-visible notice.
    Denied { message: String },
}

/// Result of a batch allocation round.
#[derive(Debug)]
pub struct Allocation {
    pub rid: ReservationId,
    pub outcome: BindOutcome,
}

/// Pluggable admission/allocation/renewal logic. The kernel hands the
/// policy reservations and the calendar; the policy mutates approved
/// terms/resources and calendar buckets. Its decisions are hints — the
/// kernel still enforces the state machine and the pending gate.
///
/// Defaults are no-ops so each role implements only its capabilities.
pub trait Policy: Send {
    fn name(&self) -> &str;

    /// Start-of-tick hook, before any bucket is drained.
    fn prepare(&mut self, _cycle: Cycle) {}

    /// Client side: a reservation was demanded; note it for bidding.
    fn demand(&mut self, _r: &mut Reservation, _calendar: &mut ActorCalendar, _cycle: Cycle) {}

    /// Client side: turn demanded reservations into ticket bids. The policy
    /// may fail reservations here (admission review); returned ids get a
    /// ticket request issued by the kernel.
    fn formulate_bids(
        &mut self,
        _cycle: Cycle,
        _table: &mut ReservationTable,
        _calendar: &mut ActorCalendar,
    ) -> Vec<ReservationId> {
        Vec::new()
    }

    /// Server side: admission for an incoming ticket/redeem request.
    fn bind(
        &mut self,
        r: &mut Reservation,
        calendar: &mut ActorCalendar,
        cycle: Cycle,
    ) -> Result<BindOutcome>;

    /// Server side: admission for an extension of an existing grant.
    fn extend(
        &mut self,
        r: &mut Reservation,
        calendar: &mut ActorCalendar,
        cycle: Cycle,
    ) -> Result<BindOutcome>;

    /// Server side: batch allocation pass, run once per tick.
    fn allocate(
        &mut self,
        _cycle: Cycle,
        _table: &mut ReservationTable,
        _calendar: &mut ActorCalendar,
    ) -> Vec<Allocation> {
        Vec::new()
    }

    /// Client side: bookkeeping for completed remote operations. Runs every
    /// tick and immediately after an update is absorbed.
    fn check_pending(
        &mut self,
        _table: &mut ReservationTable,
        _calendar: &mut ActorCalendar,
        _cycle: Cycle,
    ) {
    }

    /// Client side: correlate an absorbed update with the request that
    /// produced it.
    fn correlate_update(
        &mut self,
        _r: &mut Reservation,
        _calendar: &mut ActorCalendar,
        _cycle: Cycle,
    ) {
    }

    /// Cycle at which a renewable reservation starts its extension.
    fn renew_cycle(&self, r: &Reservation) -> Cycle {
        let term = r.effective_term();
        term.end().saturating_sub(2).max(term.new_start())
    }

    /// Cycle at which a ticketed reservation is redeemed.
    fn redeem_cycle(&self, r: &Reservation) -> Cycle {
        r.effective_term().start()
    }

    /// Cycle at which the reservation is closed.
    fn close_cycle(&self, _r: &Reservation, term: &Term) -> Cycle {
        term.end()
    }

    /// Delegation passing through this actor: an authority fills the graph
    /// from its pools, a broker absorbs it into inventory.
    fn donate(&mut self, _delegation: &mut Delegation) -> Result<()> {
        Ok(())
    }

    /// Reverse of `donate`, for reclaimed or closed delegations.
    fn retract(&mut self, _delegation: &Delegation) {}

    /// Resources held for the reservation are no longer needed.
    fn release(&mut self, _r: &Reservation, _calendar: &mut ActorCalendar) {}

    /// Recovery: re-insert a reloaded reservation into the right calendar
    /// buckets based on its persisted composite state.
    fn revisit(&mut self, r: &Reservation, calendar: &mut ActorCalendar) -> Result<()>;

    /// End-of-tick hook; advances the calendar.
    fn finish(&mut self, cycle: Cycle, calendar: &mut ActorCalendar) {
        calendar.tick(cycle);
    }

    /// Pool snapshot for the management plane.
    fn pools(&self) -> Vec<PoolInfo> {
        Vec::new()
    }
}
