use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::error::{Error, Result};
use crate::kernel::resource_set::ResourceType;
use crate::manage::PoolInfo;
use crate::time::term::Term;
use crate::util::id::{ActorGuid, ActorName, DelegationId, ReservationId};

/// Pool description carried inside a delegation graph blob. The kernel
/// moves the blob around untouched; only policies encode and decode it.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct PoolAdvert {
    pub rtype: ResourceType,
    pub units: u64,
    pub site: ActorName,
    pub site_guid: ActorGuid,
}

impl PoolAdvert {
    /// Encodes a set of adverts as a delegation graph blob.
    pub fn encode_all(adverts: &[PoolAdvert]) -> Vec<u8> {
        bincode::serialize(adverts).expect("pool advert serialization cannot fail")
    }

    pub fn decode_all(blob: &[u8]) -> Result<Vec<PoolAdvert>> {
        bincode::deserialize(blob)
            .map_err(|e| Error::InvalidArguments(format!("undecodable delegation graph: {}", e)))
    }
}

#[derive(Debug, Clone)]
struct Outlay {
    rid: ReservationId,
    term: Term,
    units: u64,
}

#[derive(Debug)]
struct Pool {
    source: DelegationId,
    site: ActorName,
    site_guid: ActorGuid,
    total: u64,
    outlays: Vec<Outlay>,
}

impl Pool {
    /// Units still free across the whole of `term`. Overlapping outlays are
    /// summed, which is conservative for staggered terms.
    fn available(&self, term: &Term) -> u64 {
        let committed: u64 = self
            .outlays
            .iter()
            .filter(|o| o.term.start() < term.end() && term.start() < o.term.end())
            .map(|o| o.units)
            .sum();
        self.total.saturating_sub(committed)
    }
}

/// Broker-side view of delegated capacity, keyed by resource type.
#[derive(Debug, Default)]
pub struct Inventory {
    pools: HashMap<ResourceType, Pool>,
}

impl Inventory {
    pub fn new() -> Self {
        Inventory::default()
    }

    /// Installs (or refreshes) the pool a delegation advertises.
    pub fn donate(&mut self, source: DelegationId, advert: PoolAdvert) {
        log::info!("inventory: pool {} x {} from {}", advert.units, advert.rtype, advert.site);
        let outlays = self
            .pools
            .remove(&advert.rtype)
            .map(|p| p.outlays)
            .unwrap_or_default();
        self.pools.insert(
            advert.rtype.clone(),
            Pool {
                source,
                site: advert.site,
                site_guid: advert.site_guid,
                total: advert.units,
                outlays,
            },
        );
    }

    /// Drops the pool backed by the delegation; outstanding outlays are
    /// abandoned with it.
    pub fn retract(&mut self, source: &DelegationId) {
        self.pools.retain(|_, pool| &pool.source != source);
    }

    pub fn source_for(&self, rtype: &ResourceType) -> Option<(&DelegationId, &ActorName, ActorGuid)> {
        self.pools.get(rtype).map(|pool| (&pool.source, &pool.site, pool.site_guid))
    }

    pub fn available(&self, rtype: &ResourceType, term: &Term) -> u64 {
        self.pools.get(rtype).map(|pool| pool.available(term)).unwrap_or(0)
    }

    /// Commits `units` of the pool to a reservation for `term`.
    pub fn reserve(&mut self, rtype: &ResourceType, rid: ReservationId, term: Term, units: u64) -> Result<()> {
        let pool = self
            .pools
            .get_mut(rtype)
            .ok_or_else(|| Error::InvalidArguments(format!("no pool of type {}", rtype)))?;
        if pool.available(&term) < units {
            return Err(Error::InvalidArguments(format!("pool {} exhausted", rtype)));
        }
        pool.outlays.push(Outlay { rid, term, units });
        Ok(())
    }

    pub fn release(&mut self, rid: ReservationId) {
        for pool in self.pools.values_mut() {
            pool.outlays.retain(|o| o.rid != rid);
        }
    }

    pub fn snapshot(&self) -> Vec<PoolInfo> {
        self.pools
            .iter()
            .map(|(rtype, pool)| {
                let committed: u64 = pool.outlays.iter().map(|o| o.units).sum();
                PoolInfo {
                    rtype: rtype.clone(),
                    total: pool.total,
                    free: pool.total.saturating_sub(committed),
                }
            })
            .collect()
    }
}
