//! The provided in memory partition. Entries live in a copy on write btree
//! keyed by normalised dn: searches scan a stable snapshot while a single
//! writer applies its changes transactionally. An error before commit rolls
//! the whole write back.

use std::sync::Arc;
use std::time::Duration;

use atrium_proto::message::ProtoPartialReason;
use concread::bptree::BptreeMap;

use super::{Partition, SearchOutcome};
use crate::filter::{Filter, SearchScope};
use crate::modify::ModifyList;
use crate::prelude::*;
use crate::schema::Schema;
use crate::utils::duration_from_epoch_now;

pub struct BtreePartition {
    suffix: Dn,
    // Rename maintains the rdn attribute values on the moved entry, which
    // needs value construction against the live schema.
    schema: Arc<Schema>,
    inner: BptreeMap<String, Arc<Entry>>,
}

impl BtreePartition {
    pub fn new(suffix: Dn, schema: Arc<Schema>) -> Self {
        BtreePartition {
            suffix,
            schema,
            inner: BptreeMap::new(),
        }
    }
}

impl Partition for BtreePartition {
    fn suffix(&self) -> &Dn {
        &self.suffix
    }

    fn lookup(&self, dn: &Dn) -> Result<Arc<Entry>, OperationError> {
        self.inner
            .read()
            .get(dn.norm())
            .cloned()
            .ok_or(OperationError::NoSuchObject)
    }

    fn exists(&self, dn: &Dn) -> bool {
        self.inner.read().contains_key(dn.norm())
    }

    fn has_children(&self, dn: &Dn) -> bool {
        self.inner
            .read()
            .iter()
            .any(|(_, e)| e.dn().is_child_of(dn))
    }

    fn add(&self, entry: Entry) -> Result<(), OperationError> {
        if !entry.dn().is_under(&self.suffix) {
            return Err(OperationError::NoSuchNamingContext);
        }
        let mut wr = self.inner.write();
        let key = entry.dn().norm().to_string();
        if wr.contains_key(key.as_str()) {
            return Err(OperationError::AlreadyExists);
        }
        if entry.dn() != &self.suffix {
            // Parent must exist. The suffix entry is exempt, its parent
            // lives outside this naming context.
            let parent = entry.dn().parent().ok_or(OperationError::NoSuchObject)?;
            if !wr.contains_key(parent.norm()) {
                return Err(OperationError::NoSuchObject);
            }
        }
        wr.insert(key, Arc::new(entry));
        wr.commit();
        Ok(())
    }

    fn delete(&self, dn: &Dn) -> Result<(), OperationError> {
        let mut wr = self.inner.write();
        let key = dn.norm().to_string();
        if !wr.contains_key(key.as_str()) {
            return Err(OperationError::NoSuchObject);
        }
        if wr.iter().any(|(_, e)| e.dn().is_child_of(dn)) {
            return Err(OperationError::NotAllowedOnNonLeaf);
        }
        wr.remove(&key);
        wr.commit();
        Ok(())
    }

    fn modify(&self, dn: &Dn, mods: &ModifyList) -> Result<(), OperationError> {
        let mut wr = self.inner.write();
        let key = dn.norm().to_string();
        let entry = wr
            .get(key.as_str())
            .cloned()
            .ok_or(OperationError::NoSuchObject)?;
        let mut entry = (*entry).clone();
        entry.apply_modlist(mods)?;
        wr.insert(key, Arc::new(entry));
        wr.commit();
        Ok(())
    }

    fn search(
        &self,
        base: &Dn,
        scope: SearchScope,
        filter: &Filter,
        limits: &Limits,
        ctime: Duration,
    ) -> Result<SearchOutcome, OperationError> {
        let rd = self.inner.read();
        if !rd.contains_key(base.norm()) {
            return Err(OperationError::NoSuchObject);
        }
        let deadline = ctime.checked_add(limits.search_time);

        let mut tested: u64 = 0;
        let mut entries: Vec<Arc<Entry>> = Vec::new();
        for (_, e) in rd.iter() {
            if !scope.covers(base, e.dn()) {
                continue;
            }
            if let Some(d) = deadline {
                if duration_from_epoch_now() >= d {
                    return Ok(SearchOutcome {
                        entries,
                        partial: Some(ProtoPartialReason::TimeLimit),
                    });
                }
            }
            tested += 1;
            if tested > limits.search_max_filter_test {
                return Ok(SearchOutcome {
                    entries,
                    partial: Some(ProtoPartialReason::SizeLimit),
                });
            }
            if e.matches_filter(filter) {
                if entries.len() as u64 >= limits.search_max_results {
                    return Ok(SearchOutcome {
                        entries,
                        partial: Some(ProtoPartialReason::SizeLimit),
                    });
                }
                entries.push(e.clone());
            }
        }

        Ok(SearchOutcome {
            entries,
            partial: None,
        })
    }

    fn rename(&self, dn: &Dn, new_rdn: &Rdn, delete_old_rdn: bool) -> Result<Dn, OperationError> {
        if dn == &self.suffix {
            return Err(OperationError::SystemProtectedObject);
        }
        let new_dn = dn
            .with_rdn(new_rdn.clone())
            .ok_or(OperationError::NoSuchObject)?;

        let mut wr = self.inner.write();
        let old_key = dn.norm().to_string();
        let entry = wr
            .get(old_key.as_str())
            .cloned()
            .ok_or(OperationError::NoSuchObject)?;
        let new_key = new_dn.norm().to_string();
        if new_key != old_key && wr.contains_key(new_key.as_str()) {
            return Err(OperationError::AlreadyExists);
        }

        // Maintain the rdn attribute values: old rdn values drop first when
        // asked, then the new rdn values assert, so an ava shared by both
        // forms survives.
        let schema = self.schema.read();
        let mut entry = (*entry).clone();
        if delete_old_rdn {
            if let Some(old_rdn) = dn.rdn() {
                for ava in old_rdn.avas() {
                    let s_attr = schema
                        .resolve_attr(&ava.attr)
                        .map_err(OperationError::SchemaViolation)?;
                    let pv = schema.partial_value_from_raw(s_attr, &ava.value)?;
                    entry.remove_ava(&ava.attr, &pv);
                }
            }
        }
        for ava in new_rdn.avas() {
            let s_attr = schema
                .resolve_attr(&ava.attr)
                .map_err(OperationError::SchemaViolation)?;
            let value = schema.value_from_raw(s_attr, &ava.value)?;
            entry.add_ava(&ava.attr, value)?;
        }
        entry.set_dn(new_dn.clone());
        entry
            .validate(&schema)
            .map_err(OperationError::SchemaViolation)?;

        // Rebase any descendants onto the renamed entry.
        let descendants: Vec<Arc<Entry>> = wr
            .iter()
            .filter(|(_, e)| e.dn().is_under(dn) && e.dn() != dn)
            .map(|(_, e)| e.clone())
            .collect();
        wr.remove(&old_key);
        for d in descendants.iter() {
            let k = d.dn().norm().to_string();
            wr.remove(&k);
        }
        for d in descendants {
            let nd = d
                .dn()
                .rebase(dn, &new_dn)
                .ok_or(OperationError::InvalidState)?;
            let mut de = (*d).clone();
            de.set_dn(nd);
            wr.insert(de.dn().norm().to_string(), Arc::new(de));
        }
        wr.insert(new_key, Arc::new(entry));
        wr.commit();
        Ok(new_dn)
    }

    fn move_subtree(&self, dn: &Dn, new_parent: &Dn) -> Result<Dn, OperationError> {
        if dn == &self.suffix {
            return Err(OperationError::SystemProtectedObject);
        }
        if new_parent.is_under(dn) {
            // A subtree can not move under itself.
            return Err(OperationError::NamingViolation(new_parent.to_string()));
        }
        let rdn = dn.rdn().ok_or(OperationError::NoSuchObject)?.clone();
        let new_dn = new_parent.child(rdn);

        let mut wr = self.inner.write();
        if !wr.contains_key(dn.norm()) {
            return Err(OperationError::NoSuchObject);
        }
        if !wr.contains_key(new_parent.norm()) {
            return Err(OperationError::NoSuchObject);
        }
        if wr.contains_key(new_dn.norm()) {
            return Err(OperationError::AlreadyExists);
        }

        let moved: Vec<Arc<Entry>> = wr
            .iter()
            .filter(|(_, e)| e.dn().is_under(dn))
            .map(|(_, e)| e.clone())
            .collect();
        for e in moved.iter() {
            let k = e.dn().norm().to_string();
            wr.remove(&k);
        }
        for e in moved {
            let nd = e
                .dn()
                .rebase(dn, &new_dn)
                .ok_or(OperationError::InvalidState)?;
            let mut ne = (*e).clone();
            ne.set_dn(nd);
            wr.insert(ne.dn().norm().to_string(), Arc::new(ne));
        }
        wr.commit();
        Ok(new_dn)
    }

    fn extract_subtree(&self, base: &Dn) -> Result<Vec<Arc<Entry>>, OperationError> {
        let rd = self.inner.read();
        if !rd.contains_key(base.norm()) {
            return Err(OperationError::NoSuchObject);
        }
        let mut out: Vec<Arc<Entry>> = rd
            .iter()
            .filter(|(_, e)| e.dn().is_under(base))
            .map(|(_, e)| e.clone())
            .collect();
        out.sort_by_key(|e| e.dn().depth());
        Ok(out)
    }

    fn add_subtree(&self, entries: Vec<Entry>) -> Result<(), OperationError> {
        let mut wr = self.inner.write();
        for e in entries.iter() {
            if !e.dn().is_under(&self.suffix) {
                return Err(OperationError::NoSuchNamingContext);
            }
            if wr.contains_key(e.dn().norm()) {
                return Err(OperationError::AlreadyExists);
            }
        }
        // Parents must resolve within the map or the batch itself.
        for e in entries.iter() {
            if e.dn() == &self.suffix {
                continue;
            }
            let parent = e.dn().parent().ok_or(OperationError::NoSuchObject)?;
            let present = wr.contains_key(parent.norm())
                || entries.iter().any(|o| o.dn() == &parent);
            if !present {
                return Err(OperationError::NoSuchObject);
            }
        }
        for e in entries {
            wr.insert(e.dn().norm().to_string(), Arc::new(e));
        }
        wr.commit();
        Ok(())
    }

    fn delete_subtree(&self, base: &Dn) -> Result<(), OperationError> {
        let mut wr = self.inner.write();
        if !wr.contains_key(base.norm()) {
            return Err(OperationError::NoSuchObject);
        }
        let doomed: Vec<String> = wr
            .iter()
            .filter(|(_, e)| e.dn().is_under(base))
            .map(|(k, _)| k.clone())
            .collect();
        for k in doomed {
            wr.remove(&k);
        }
        wr.commit();
        Ok(())
    }

    fn verify(&self) -> Vec<Result<(), ConsistencyError>> {
        let rd = self.inner.read();
        let mut results = Vec::new();
        for (k, e) in rd.iter() {
            if k != e.dn().norm() || !e.dn().is_under(&self.suffix) {
                results.push(Err(ConsistencyError::EntryDnInvalid(e.dn().to_string())));
                continue;
            }
            if e.dn() != &self.suffix {
                let parent_present = e
                    .dn()
                    .parent()
                    .map(|p| rd.contains_key(p.norm()))
                    .unwrap_or(false);
                if !parent_present {
                    results.push(Err(ConsistencyError::EntryDnInvalid(e.dn().to_string())));
                }
            }
        }
        results
    }
}
