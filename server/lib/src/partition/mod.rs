//! Storage partitions and the nexus that routes between them.
//!
//! A partition owns one naming context. Operations land here after the whole
//! chain has run: names are normalised, schema holds, access was checked.
//! What remains is storage with typed outcomes.

pub mod btree;
pub mod nexus;

use std::sync::Arc;
use std::time::Duration;

use atrium_proto::message::ProtoPartialReason;

use crate::filter::{Filter, SearchScope};
use crate::modify::ModifyList;
use crate::prelude::*;

pub use self::btree::BtreePartition;
pub use self::nexus::PartitionNexus;

/// What a bounded search produced. Truncation by a limit is an outcome, not
/// an error - the entries gathered so far come back with the reason.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct SearchOutcome {
    pub entries: Vec<Arc<Entry>>,
    pub partial: Option<ProtoPartialReason>,
}

/// One naming context's storage. Implementations serialise their writers and
/// run readers over snapshots, so two concurrent writers to one name never
/// both succeed silently and a search never observes a half applied write.
pub trait Partition: Send + Sync {
    /// The naming context this partition owns.
    fn suffix(&self) -> &Dn;

    fn lookup(&self, dn: &Dn) -> Result<Arc<Entry>, OperationError>;

    fn exists(&self, dn: &Dn) -> bool;

    fn has_children(&self, dn: &Dn) -> bool;

    /// Insert a new entry. The parent must exist, except for the suffix
    /// entry itself whose parent lives outside this partition.
    fn add(&self, entry: Entry) -> Result<(), OperationError>;

    /// Remove a single leaf entry. Subtree removal is explicit, via
    /// [`Partition::delete_subtree`].
    fn delete(&self, dn: &Dn) -> Result<(), OperationError>;

    fn modify(&self, dn: &Dn, mods: &ModifyList) -> Result<(), OperationError>;

    fn search(
        &self,
        base: &Dn,
        scope: SearchScope,
        filter: &Filter,
        limits: &Limits,
        ctime: Duration,
    ) -> Result<SearchOutcome, OperationError>;

    /// Change the leaf rdn of an entry in place, rebasing any descendants
    /// and maintaining the rdn attribute values on the entry.
    fn rename(&self, dn: &Dn, new_rdn: &Rdn, delete_old_rdn: bool) -> Result<Dn, OperationError>;

    /// Move the subtree rooted at `dn` under `new_parent`, both within this
    /// partition.
    fn move_subtree(&self, dn: &Dn, new_parent: &Dn) -> Result<Dn, OperationError>;

    /// A consistent copy of the subtree rooted at `base`, parents before
    /// children. The cross partition move in the nexus builds on this.
    fn extract_subtree(&self, base: &Dn) -> Result<Vec<Arc<Entry>>, OperationError>;

    /// Insert a previously extracted (and rebased) subtree in one write,
    /// refused wholesale if any entry already exists.
    fn add_subtree(&self, entries: Vec<Entry>) -> Result<(), OperationError>;

    /// Remove the subtree rooted at `base` in one write.
    fn delete_subtree(&self, base: &Dn) -> Result<(), OperationError>;

    fn verify(&self) -> Vec<Result<(), ConsistencyError>>;
}
