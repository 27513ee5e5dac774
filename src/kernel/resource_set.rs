use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use crate::time::term::Term;
use crate::util::id::{ActorGuid, DelegationId, UnitId};

/// Opaque resource-type label ("vm", "bandwidth", ...). The kernel never
/// interprets it; policies match it against delegated pools.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ResourceType(pub String);

impl ResourceType {
    pub fn new(label: impl Into<String>) -> Self {
        ResourceType(label.into())
    }
}

impl fmt::Display for ResourceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Ordered so serialized blobs are stable across runs.
pub type PropertyBag = BTreeMap<String, String>;

/// Concrete claim returned by a broker: a carve-out of a delegated pool.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct Ticket {
    pub source: DelegationId,
    pub issuer: ActorGuid,
    pub units: u64,
    pub term: Term,
}

/// Concrete claim returned by an authority for a redeemed ticket.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct Lease {
    pub authority: ActorGuid,
    pub units: u64,
    pub term: Term,
    pub unit_ids: Vec<UnitId>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub enum Concrete {
    Ticket(Ticket),
    Lease(Lease),
}

/// Abstract resource request plus the concrete bundle backing it, once one
/// has been granted.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct ResourceSet {
    units: u64,
    rtype: ResourceType,
    properties: PropertyBag,
    concrete: Option<Concrete>,
}

impl ResourceSet {
    pub fn new(units: u64, rtype: ResourceType) -> Self {
        ResourceSet { units, rtype, properties: PropertyBag::new(), concrete: None }
    }

    pub fn with_properties(mut self, properties: PropertyBag) -> Self {
        self.properties = properties;
        self
    }

    pub fn units(&self) -> u64 {
        self.units
    }

    pub fn set_units(&mut self, units: u64) {
        self.units = units;
    }

    pub fn rtype(&self) -> &ResourceType {
        &self.rtype
    }

    pub fn properties(&self) -> &PropertyBag {
        &self.properties
    }

    pub fn properties_mut(&mut self) -> &mut PropertyBag {
        &mut self.properties
    }

    pub fn concrete(&self) -> Option<&Concrete> {
        self.concrete.as_ref()
    }

    pub fn concrete_mut(&mut self) -> Option<&mut Concrete> {
        self.concrete.as_mut()
    }

    pub fn set_concrete(&mut self, concrete: Concrete) {
        self.concrete = Some(concrete);
    }

    pub fn ticket(&self) -> Option<&Ticket> {
        match &self.concrete {
            Some(Concrete::Ticket(ticket)) => Some(ticket),
            _ => None,
        }
    }

    pub fn lease(&self) -> Option<&Lease> {
        match &self.concrete {
            Some(Concrete::Lease(lease)) => Some(lease),
            _ => None,
        }
    }
}

impl fmt::Display for ResourceSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} x {}", self.units, self.rtype)?;
        match &self.concrete {
            Some(Concrete::Ticket(t)) => write!(f, " (ticket from {})", t.issuer),
            Some(Concrete::Lease(l)) => write!(f, " (lease from {})", l.authority),
            None => Ok(()),
        }
    }
}
