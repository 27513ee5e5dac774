use std::path::Path;

use crate::error::{Error, Result};
use crate::kernel::delegation::Delegation;
use crate::kernel::reservation::Reservation;
use crate::kernel::slice::Slice;
use crate::kernel::unit::Unit;
use crate::store::{
    decode_entity, encode_entity, ActorRecord, ActorStore, ClientRecord, DelegationRow,
    ManagerObjectRecord, PluginRecord, ProxyRecord, ReservationRow, SliceRow, UnitRow,
};
use crate::util::id::{ActorName, DelegationId, ReservationId, SliceId, UnitId};

/// Sled-backed gateway: one tree per table, each row a bincode record of
/// scalar predicate columns plus the JSON entity envelope. A single-key
/// insert is atomic, which gives per-entity transactionality.
pub struct SledStore {
    db: sled::Db,
    actors: sled::Tree,
    slices: sled::Tree,
    reservations: sled::Tree,
    delegations: sled::Tree,
    units: sled::Tree,
    proxies: sled::Tree,
    clients: sled::Tree,
    manager_objects: sled::Tree,
    plugins: sled::Tree,
    config_mappings: sled::Tree,
    misc: sled::Tree,
}

impl SledStore {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let db = sled::open(path)?;
        Ok(SledStore {
            actors: db.open_tree("actors")?,
            slices: db.open_tree("slices")?,
            reservations: db.open_tree("reservations")?,
            delegations: db.open_tree("delegations")?,
            units: db.open_tree("units")?,
            proxies: db.open_tree("proxies")?,
            clients: db.open_tree("clients")?,
            manager_objects: db.open_tree("manager_objects")?,
            plugins: db.open_tree("plugins")?,
            config_mappings: db.open_tree("config_mappings")?,
            misc: db.open_tree("miscellaneous")?,
            db,
        })
    }

    fn encode_row<T: serde::Serialize>(row: &T) -> Result<Vec<u8>> {
        bincode::serialize(row).map_err(|e| Error::Database(format!("row serialization failed: {}", e)))
    }

    fn decode_row<T: serde::de::DeserializeOwned>(bytes: &[u8]) -> Result<T> {
        bincode::deserialize(bytes).map_err(|e| Error::Database(format!("row deserialization failed: {}", e)))
    }
}

impl ActorStore for SledStore {
    fn put_actor(&self, record: &ActorRecord) -> Result<()> {
        self.actors.insert(record.name.as_str(), Self::encode_row(record)?)?;
        Ok(())
    }

    fn get_actor(&self, name: &ActorName) -> Result<Option<ActorRecord>> {
        match self.actors.get(name.as_str())? {
            Some(bytes) => Ok(Some(Self::decode_row(&bytes)?)),
            None => Ok(None),
        }
    }

    fn put_slice(&self, owner: &ActorName, slice: &Slice) -> Result<()> {
        let row = SliceRow {
            slice_id: slice.slice_id(),
            owner_actor: owner.clone(),
            kind: slice.kind(),
            graph_id: slice.graph_id().map(str::to_string),
            blob: encode_entity(slice)?,
        };
        self.slices.insert(slice.slice_id().to_string().as_bytes(), Self::encode_row(&row)?)?;
        Ok(())
    }

    fn remove_slice(&self, slice_id: SliceId) -> Result<()> {
        self.slices.remove(slice_id.to_string().as_bytes())?;
        Ok(())
    }

    fn get_slice(&self, slice_id: SliceId) -> Result<Option<Slice>> {
        match self.slices.get(slice_id.to_string().as_bytes())? {
            Some(bytes) => {
                let row: SliceRow = Self::decode_row(&bytes)?;
                Ok(Some(decode_entity(&row.blob)?))
            }
            None => Ok(None),
        }
    }

    fn slices_by_actor(&self, owner: &ActorName) -> Result<Vec<Slice>> {
        let mut slices = Vec::new();
        for entry in self.slices.iter() {
            let (_, bytes) = entry?;
            let row: SliceRow = Self::decode_row(&bytes)?;
            if &row.owner_actor == owner {
                slices.push(decode_entity(&row.blob)?);
            }
        }
        Ok(slices)
    }

    fn put_reservation(&self, r: &Reservation) -> Result<()> {
        let row = ReservationRow {
            rid: r.rid(),
            slice_id: r.slice_id(),
            category: r.category(),
            state: r.state(),
            pending: r.pending(),
            join: r.join(),
            blob: encode_entity(r)?,
        };
        self.reservations.insert(r.rid().to_string().as_bytes(), Self::encode_row(&row)?)?;
        Ok(())
    }

    fn remove_reservation(&self, rid: ReservationId) -> Result<()> {
        self.reservations.remove(rid.to_string().as_bytes())?;
        Ok(())
    }

    fn get_reservation(&self, rid: ReservationId) -> Result<Option<Reservation>> {
        match self.reservations.get(rid.to_string().as_bytes())? {
            Some(bytes) => {
                let row: ReservationRow = Self::decode_row(&bytes)?;
                Ok(Some(decode_entity(&row.blob)?))
            }
            None => Ok(None),
        }
    }

    fn reservations_by_slice(&self, slice_id: SliceId) -> Result<Vec<Reservation>> {
        let mut reservations = Vec::new();
        for entry in self.reservations.iter() {
            let (_, bytes) = entry?;
            let row: ReservationRow = Self::decode_row(&bytes)?;
            if row.slice_id == slice_id {
                reservations.push(decode_entity(&row.blob)?);
            }
        }
        Ok(reservations)
    }

    fn put_delegation(&self, d: &Delegation) -> Result<()> {
        let row = DelegationRow {
            delegation_id: d.delegation_id().clone(),
            slice_id: d.slice_id(),
            state: d.state(),
            blob: encode_entity(d)?,
        };
        self.delegations.insert(d.delegation_id().0.as_bytes(), Self::encode_row(&row)?)?;
        Ok(())
    }

    fn remove_delegation(&self, id: &DelegationId) -> Result<()> {
        self.delegations.remove(id.0.as_bytes())?;
        Ok(())
    }

    fn delegations_by_slice(&self, slice_id: SliceId) -> Result<Vec<Delegation>> {
        let mut delegations = Vec::new();
        for entry in self.delegations.iter() {
            let (_, bytes) = entry?;
            let row: DelegationRow = Self::decode_row(&bytes)?;
            if row.slice_id == slice_id {
                delegations.push(decode_entity(&row.blob)?);
            }
        }
        Ok(delegations)
    }

    fn put_unit(&self, u: &Unit) -> Result<()> {
        let row = UnitRow {
            unit_id: u.unit_id(),
            parent_id: u.parent_id(),
            reservation_id: u.reservation_id(),
            state: u.state(),
            blob: encode_entity(u)?,
        };
        self.units.insert(u.unit_id().to_string().as_bytes(), Self::encode_row(&row)?)?;
        Ok(())
    }

    fn remove_unit(&self, id: UnitId) -> Result<()> {
        self.units.remove(id.to_string().as_bytes())?;
        Ok(())
    }

    fn units_by_reservation(&self, rid: ReservationId) -> Result<Vec<Unit>> {
        let mut units = Vec::new();
        for entry in self.units.iter() {
            let (_, bytes) = entry?;
            let row: UnitRow = Self::decode_row(&bytes)?;
            if row.reservation_id == rid {
                units.push(decode_entity(&row.blob)?);
            }
        }
        Ok(units)
    }

    fn put_proxy(&self, p: &ProxyRecord) -> Result<()> {
        self.proxies.insert(p.name.as_str(), Self::encode_row(p)?)?;
        Ok(())
    }

    fn proxies(&self) -> Result<Vec<ProxyRecord>> {
        self.proxies.iter().map(|entry| Self::decode_row(&entry?.1)).collect()
    }

    fn put_client(&self, c: &ClientRecord) -> Result<()> {
        self.clients.insert(c.name.as_bytes(), Self::encode_row(c)?)?;
        Ok(())
    }

    fn clients(&self) -> Result<Vec<ClientRecord>> {
        self.clients.iter().map(|entry| Self::decode_row(&entry?.1)).collect()
    }

    fn put_manager_object(&self, m: &ManagerObjectRecord) -> Result<()> {
        self.manager_objects.insert(m.id.to_string().as_bytes(), Self::encode_row(m)?)?;
        Ok(())
    }

    fn manager_objects(&self) -> Result<Vec<ManagerObjectRecord>> {
        self.manager_objects.iter().map(|entry| Self::decode_row(&entry?.1)).collect()
    }

    fn put_plugin(&self, p: &PluginRecord) -> Result<()> {
        self.plugins.insert(p.kind.as_bytes(), Self::encode_row(p)?)?;
        Ok(())
    }

    fn plugins(&self) -> Result<Vec<PluginRecord>> {
        self.plugins.iter().map(|entry| Self::decode_row(&entry?.1)).collect()
    }

    fn set_config_mapping(&self, key: &str, value: &str) -> Result<()> {
        self.config_mappings.insert(key.as_bytes(), value.as_bytes())?;
        Ok(())
    }

    fn get_config_mapping(&self, key: &str) -> Result<Option<String>> {
        Ok(self
            .config_mappings
            .get(key.as_bytes())?
            .map(|bytes| String::from_utf8_lossy(&bytes).into_owned()))
    }

    fn set_misc(&self, key: &str, blob: &[u8]) -> Result<()> {
        self.misc.insert(key.as_bytes(), blob)?;
        Ok(())
    }

    fn get_misc(&self, key: &str) -> Result<Option<Vec<u8>>> {
        Ok(self.misc.get(key.as_bytes())?.map(|bytes| bytes.to_vec()))
    }

    fn flush(&self) -> Result<()> {
        self.db.flush()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kernel::resource_set::{ResourceSet, ResourceType};
    use crate::kernel::slice::SliceKind;
    use crate::kernel::states::{PendingState, ReservationCategory, ReservationState};
    use crate::security::AuthToken;
    use crate::time::term::Term;
    use crate::util::id::ActorGuid;

    fn store() -> (tempfile::TempDir, SledStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = SledStore::open(dir.path().join("db")).unwrap();
        (dir, store)
    }

    #[test]
    fn reservation_roundtrips_through_the_gateway() {
        let (_dir, store) = store();
        let slice_id = SliceId::new();
        let mut r = Reservation::new(
            ReservationId::new(),
            slice_id,
            ReservationCategory::Client,
            ResourceSet::new(2, ResourceType::new("vm")),
            Term::new(5, 10),
        );
        r.transition("ticket", ReservationState::Ticketed, PendingState::Redeeming);
        r.next_sequence_out();

        store.put_reservation(&r).unwrap();
        let loaded = store.get_reservation(r.rid()).unwrap().unwrap();

        assert_eq!(loaded.rid(), r.rid());
        assert_eq!(loaded.state(), ReservationState::Ticketed);
        assert_eq!(loaded.pending(), PendingState::Redeeming);
        assert_eq!(loaded.sequence_out(), 1);
        // Transient flags are rebound on load, not persisted.
        assert!(!loaded.is_dirty());

        let by_slice = store.reservations_by_slice(slice_id).unwrap();
        assert_eq!(by_slice.len(), 1);
        assert!(store.reservations_by_slice(SliceId::new()).unwrap().is_empty());
    }

    #[test]
    fn slices_stream_back_by_owner() {
        let (_dir, store) = store();
        let me = ActorName::new("orchestrator");
        let other = ActorName::new("broker");
        let owner = AuthToken::new("orchestrator", ActorGuid::new());

        store.put_slice(&me, &Slice::new(SliceId::new(), "one", owner.clone(), SliceKind::Client)).unwrap();
        store.put_slice(&me, &Slice::new(SliceId::new(), "two", owner.clone(), SliceKind::Client)).unwrap();
        store.put_slice(&other, &Slice::new(SliceId::new(), "theirs", owner, SliceKind::Client)).unwrap();

        assert_eq!(store.slices_by_actor(&me).unwrap().len(), 2);
        assert_eq!(store.slices_by_actor(&other).unwrap().len(), 1);
    }
}
