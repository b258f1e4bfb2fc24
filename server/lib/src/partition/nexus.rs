//! Routes operations to the partition that owns their target dn. The mount
//! table is copy on write, so routing never blocks on a mount in progress.
//! Mounting only happens during bootstrap.
//!
//! Most operations route to exactly one partition. The exception is a move
//! whose destination lives in a different naming context, which becomes an
//! extract, an add of the rebased subtree, then a delete at the source. The
//! delete only runs once the destination holds the whole subtree, so a fault
//! can duplicate the subtree but never lose it.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use concread::cowcell::*;

use super::{Partition, SearchOutcome};
use crate::filter::{Filter, SearchScope};
use crate::modify::ModifyList;
use crate::prelude::*;

pub struct PartitionNexus {
    partitions: CowCell<BTreeMap<String, Arc<dyn Partition>>>,
}

impl Default for PartitionNexus {
    fn default() -> Self {
        PartitionNexus {
            partitions: CowCell::new(BTreeMap::new()),
        }
    }
}

impl PartitionNexus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mount a partition at its suffix. Suffixes may not nest, else routing
    /// by longest match would shadow the outer partition.
    pub fn mount(&self, partition: Arc<dyn Partition>) -> Result<(), OperationError> {
        let suffix = partition.suffix().clone();
        let mut wr = self.partitions.write();
        if wr.contains_key(suffix.norm()) {
            return Err(OperationError::AlreadyExists);
        }
        for mounted in wr.values() {
            if suffix.is_under(mounted.suffix()) || mounted.suffix().is_under(&suffix) {
                return Err(OperationError::NamingViolation(suffix.to_string()));
            }
        }
        admin_info!(suffix = %suffix, "Mounted partition");
        wr.insert(suffix.norm().to_string(), partition);
        wr.commit();
        Ok(())
    }

    fn route(&self, dn: &Dn) -> Result<Arc<dyn Partition>, OperationError> {
        self.partitions
            .read()
            .values()
            .filter(|p| dn.is_under(p.suffix()))
            .max_by_key(|p| p.suffix().depth())
            .cloned()
            .ok_or(OperationError::NoSuchNamingContext)
    }

    pub fn naming_contexts(&self) -> Vec<Dn> {
        self.partitions
            .read()
            .values()
            .map(|p| p.suffix().clone())
            .collect()
    }

    pub fn is_naming_context(&self, dn: &Dn) -> bool {
        self.partitions
            .read()
            .values()
            .any(|p| p.suffix() == dn)
    }

    pub fn exists(&self, dn: &Dn) -> bool {
        match self.route(dn) {
            Ok(p) => p.exists(dn),
            Err(_) => false,
        }
    }

    pub fn has_children(&self, dn: &Dn) -> bool {
        match self.route(dn) {
            Ok(p) => p.has_children(dn),
            Err(_) => false,
        }
    }

    pub fn lookup(&self, dn: &Dn) -> Result<Arc<Entry>, OperationError> {
        self.route(dn)?.lookup(dn)
    }

    pub fn add(&self, entry: Entry) -> Result<(), OperationError> {
        self.route(entry.dn())?.add(entry)
    }

    pub fn delete(&self, dn: &Dn, subtree: bool) -> Result<(), OperationError> {
        let p = self.route(dn)?;
        if subtree {
            p.delete_subtree(dn)
        } else {
            p.delete(dn)
        }
    }

    pub fn modify(&self, dn: &Dn, mods: &ModifyList) -> Result<(), OperationError> {
        self.route(dn)?.modify(dn, mods)
    }

    pub fn search(
        &self,
        base: &Dn,
        scope: SearchScope,
        filter: &Filter,
        limits: &Limits,
        ctime: Duration,
    ) -> Result<SearchOutcome, OperationError> {
        self.route(base)?.search(base, scope, filter, limits, ctime)
    }

    pub fn rename(
        &self,
        dn: &Dn,
        new_rdn: &Rdn,
        delete_old_rdn: bool,
    ) -> Result<Dn, OperationError> {
        self.route(dn)?.rename(dn, new_rdn, delete_old_rdn)
    }

    pub fn move_subtree(&self, dn: &Dn, new_parent: &Dn) -> Result<Dn, OperationError> {
        let src = self.route(dn)?;
        let dst = self.route(new_parent)?;
        if src.suffix() == dst.suffix() {
            return src.move_subtree(dn, new_parent);
        }

        if new_parent.is_under(dn) {
            // A subtree can not move under itself.
            return Err(OperationError::NamingViolation(new_parent.to_string()));
        }
        let rdn = dn.rdn().ok_or(OperationError::NoSuchObject)?.clone();
        let new_dn = new_parent.child(rdn);
        if !dst.exists(new_parent) {
            return Err(OperationError::NoSuchObject);
        }
        if dst.exists(&new_dn) {
            return Err(OperationError::AlreadyExists);
        }

        let extracted = src.extract_subtree(dn)?;
        let mut rebased = Vec::with_capacity(extracted.len());
        for e in extracted {
            let nd = e
                .dn()
                .rebase(dn, &new_dn)
                .ok_or(OperationError::InvalidState)?;
            let mut ne = (*e).clone();
            ne.set_dn(nd);
            rebased.push(ne);
        }
        dst.add_subtree(rebased)?;

        // The destination holds the subtree now. If the source delete fails
        // both copies stay live and an operator has to reconcile, so shout.
        if let Err(e) = src.delete_subtree(dn) {
            security_critical!(
                ?e,
                source = %dn,
                destination = %new_dn,
                "Cross partition move could not remove the source subtree"
            );
            return Err(OperationError::PartialFailure(
                "source subtree retained after cross partition move".to_string(),
            ));
        }
        Ok(new_dn)
    }

    pub fn verify(&self) -> Vec<Result<(), ConsistencyError>> {
        let parts = self.partitions.read();
        let mut results = Vec::new();
        for (a, p) in parts.iter() {
            for (b, q) in parts.iter() {
                if a != b && p.suffix().is_under(q.suffix()) {
                    results.push(Err(ConsistencyError::EntryDnInvalid(
                        p.suffix().to_string(),
                    )));
                }
            }
            results.extend(p.verify());
        }
        results
    }
}
