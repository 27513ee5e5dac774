use serde::{Deserialize, Serialize};
use std::fmt;

/// Primary reservation states. Terminal states are `Closed` and `Failed`.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum ReservationState {
    Nascent = 1,
    Ticketed = 2,
    Active = 3,
    ActiveTicketed = 4,
    Closed = 5,
    CloseWait = 6,
    Failed = 7,
}

impl ReservationState {
    /// Legal forward transitions of the primary state machine. A regression
    /// is a kernel bug, not a recoverable condition.
    pub fn can_transition_to(self, next: ReservationState) -> bool {
        use ReservationState::*;
        if self == next {
            return true;
        }
        match (self, next) {
            (Nascent, Ticketed) | (Nascent, Closed) | (Nascent, Failed) => true,
            (Ticketed, Active) | (Ticketed, ActiveTicketed) | (Ticketed, Closed) | (Ticketed, CloseWait) | (Ticketed, Failed) => true,
            (Active, ActiveTicketed) | (Active, Closed) | (Active, CloseWait) | (Active, Failed) => true,
            (ActiveTicketed, Active) | (ActiveTicketed, Closed) | (ActiveTicketed, CloseWait) | (ActiveTicketed, Failed) => true,
            (CloseWait, Closed) | (CloseWait, Failed) => true,
            // A failed reservation is still closed to reap its bookkeeping.
            (Failed, Closed) => true,
            _ => false,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, ReservationState::Closed | ReservationState::Failed)
    }
}

impl fmt::Display for ReservationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

/// Pending operation states. `None` means the reservation accepts a new
/// mutating operation; anything else gates further outbound requests.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum PendingState {
    None = 1,
    Ticketing = 2,
    Redeeming = 3,
    ExtendingTicket = 4,
    ExtendingLease = 5,
    Priming = 6,
    /// Gated like every other non-`None` pending; nothing on the tick path
    /// promotes it, only explicit policy or management action does.
    Blocked = 7,
    Closing = 8,
    Probing = 9,
    ClosingJoining = 10,
    ModifyingLease = 11,
    SendUpdate = 12,
}

impl PendingState {
    /// Historical alias: lease modification absorbs the peer's update in
    /// place, and both names ended up on the same wire value. Resolved to a
    /// single state; see the regression test below.
    #[allow(non_upper_case_globals)]
    pub const AbsorbUpdate: PendingState = PendingState::ModifyingLease;

    /// States carrying an in-flight outbound request that must be re-issued
    /// if the actor restarts while they are set.
    pub fn is_mutating(self) -> bool {
        matches!(
            self,
            PendingState::Ticketing
                | PendingState::Redeeming
                | PendingState::ExtendingTicket
                | PendingState::ExtendingLease
                | PendingState::ModifyingLease
                | PendingState::Closing
        )
    }

    pub fn is_none(self) -> bool {
        self == PendingState::None
    }
}

impl fmt::Display for PendingState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

/// Join states, used only by controller-side reservations whose resources
/// must join a slice-wide configuration sequence.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum JoinState {
    None = 1,
    NoJoin = 2,
    BlockedJoin = 3,
    BlockedRedeem = 4,
    Joining = 5,
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum DelegationState {
    Nascent = 1,
    Delegated = 2,
    Reclaimed = 3,
    Closed = 4,
    Failed = 5,
}

impl DelegationState {
    pub fn can_transition_to(self, next: DelegationState) -> bool {
        use DelegationState::*;
        if self == next {
            return true;
        }
        match (self, next) {
            (_, Closed) | (_, Failed) => true,
            (Nascent, Delegated) => true,
            (Delegated, Reclaimed) | (Reclaimed, Delegated) => true,
            _ => false,
        }
    }
}

impl fmt::Display for DelegationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

/// States of a leaf resource unit held under an authority-side reservation.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum UnitState {
    Default = 1,
    Priming = 2,
    Active = 3,
    Modifying = 4,
    Closing = 5,
    Failed = 6,
    CloseWait = 7,
}

/// Reservation categories, fixed at creation.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ReservationCategory {
    /// Held by an orchestrator on behalf of a user slice.
    Client,
    /// Server side of a ticket request at a broker.
    Broker,
    /// Server side of a redeem at an authority.
    Authority,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn absorb_update_aliases_modifying_lease() {
        // Two historical enumerators shared the value 11; they must stay one
        // state with one wire value.
        assert_eq!(PendingState::AbsorbUpdate, PendingState::ModifyingLease);
        assert_eq!(PendingState::AbsorbUpdate as u8, 11);
        assert_eq!(PendingState::ModifyingLease as u8, 11);
        assert_eq!(PendingState::SendUpdate as u8, 12);
    }

    #[test]
    fn primary_transitions_follow_the_machine() {
        use ReservationState::*;
        assert!(Nascent.can_transition_to(Ticketed));
        assert!(Ticketed.can_transition_to(Active));
        assert!(Active.can_transition_to(ActiveTicketed));
        assert!(ActiveTicketed.can_transition_to(Active));
        assert!(Active.can_transition_to(Closed));
        assert!(Nascent.can_transition_to(Failed));

        // Failed reservations may still be reaped into Closed.
        assert!(Failed.can_transition_to(Closed));

        // Regressions are illegal.
        assert!(!Active.can_transition_to(Nascent));
        assert!(!Closed.can_transition_to(Active));
        assert!(!Failed.can_transition_to(Nascent));
        assert!(!Closed.can_transition_to(Failed));
    }

    #[test]
    fn delegation_reclaim_is_reversible() {
        use DelegationState::*;
        assert!(Nascent.can_transition_to(Delegated));
        assert!(Delegated.can_transition_to(Reclaimed));
        assert!(Reclaimed.can_transition_to(Delegated));
        assert!(Delegated.can_transition_to(Closed));
        assert!(!Nascent.can_transition_to(Reclaimed));
    }
}
