//! The chain every operation runs through. Each stage wraps the remainder:
//! it may delegate unchanged, rewrite the context first, short circuit with
//! its own result, or fail and abort everything below it. The terminal
//! dispatch hands the operation to the partition nexus.
//!
//! Stage order matters and is fixed at configuration time. Dispatch takes a
//! snapshot of the stage list, so recomposition is never visible to an
//! operation already in flight. Between stages the chain observes the
//! abandon flag; a mutation the nexus has already started commits or rolls
//! back whole.

pub mod authn;
pub mod authz;
pub mod exception;
pub mod normalization;
pub mod operational;
pub mod schema;
pub mod subentry;

use std::sync::Arc;

use concread::cowcell::*;

use crate::event::{
    AddEvent, BindEvent, CompareEvent, DeleteEvent, ModifyEvent, MoveAndRenameEvent, MoveEvent,
    RenameEvent, SearchEvent, SearchReply, UnbindEvent,
};
use crate::partition::PartitionNexus;
use crate::prelude::*;

pub use self::authn::Authentication;
pub use self::authz::Authorization;
pub use self::exception::ExceptionTranslation;
pub use self::normalization::Normalization;
pub use self::operational::OperationalAttrs;
pub use self::schema::SchemaValidation;
pub use self::subentry::SubentryManager;

// Registered names of the provided stages, in canonical order.
pub const INTERCEPTOR_NORMALIZATION: &str = "normalization";
pub const INTERCEPTOR_SCHEMA: &str = "schema";
pub const INTERCEPTOR_OPERATIONAL: &str = "operational";
pub const INTERCEPTOR_AUTHN: &str = "authn";
pub const INTERCEPTOR_AUTHZ: &str = "authz";
pub const INTERCEPTOR_SUBENTRY: &str = "subentry";
pub const INTERCEPTOR_EXCEPTION: &str = "exception";

/// One stage of the chain. Every handler defaults to pure delegation, so a
/// stage only implements the operation kinds it cares about.
pub trait Interceptor: Send + Sync {
    fn name(&self) -> &'static str;

    fn add(&self, ev: &mut AddEvent, next: Next<'_>) -> Result<(), OperationError> {
        next.add(ev)
    }

    fn delete(&self, ev: &mut DeleteEvent, next: Next<'_>) -> Result<(), OperationError> {
        next.delete(ev)
    }

    fn modify(&self, ev: &mut ModifyEvent, next: Next<'_>) -> Result<(), OperationError> {
        next.modify(ev)
    }

    fn search(&self, ev: &mut SearchEvent, next: Next<'_>) -> Result<SearchReply, OperationError> {
        next.search(ev)
    }

    fn compare(&self, ev: &mut CompareEvent, next: Next<'_>) -> Result<bool, OperationError> {
        next.compare(ev)
    }

    fn bind(&self, ev: &mut BindEvent, next: Next<'_>) -> Result<Identity, OperationError> {
        next.bind(ev)
    }

    fn unbind(&self, ev: &mut UnbindEvent, next: Next<'_>) -> Result<(), OperationError> {
        next.unbind(ev)
    }

    fn rename(&self, ev: &mut RenameEvent, next: Next<'_>) -> Result<Dn, OperationError> {
        next.rename(ev)
    }

    fn move_subtree(&self, ev: &mut MoveEvent, next: Next<'_>) -> Result<Dn, OperationError> {
        next.move_subtree(ev)
    }

    fn move_and_rename(
        &self,
        ev: &mut MoveAndRenameEvent,
        next: Next<'_>,
    ) -> Result<Dn, OperationError> {
        next.move_and_rename(ev)
    }
}

/// A cursor into one dispatch's chain snapshot. Invoking an operation on it
/// runs the remaining stages and finally the nexus. Copyable so a stage can
/// both delegate and issue sub-operations.
#[derive(Clone, Copy)]
pub struct Next<'a> {
    chain: &'a [Arc<dyn Interceptor>],
    pos: usize,
    nexus: &'a PartitionNexus,
}

macro_rules! dispatch_step {
    ($self:ident, $ev:ident, $op:ident) => {
        if let Some(stage) = $self.chain.get($self.pos) {
            let next = Next {
                pos: $self.pos + 1,
                ..$self
            };
            if $ev.op.is_bypassed(stage.name()) {
                return next.$op($ev);
            }
            return stage.$op($ev, next);
        }
    };
}

impl<'a> Next<'a> {
    /// Re-enter the chain from the first stage. A stage issuing an internal
    /// sub-operation pairs this with a bypass set naming itself, so the
    /// sub-operation sees the whole pipeline without recursing.
    pub fn restart(self) -> Next<'a> {
        Next { pos: 0, ..self }
    }

    fn abandoned(op: &crate::event::Operation) -> Result<(), OperationError> {
        if op.is_abandoned() {
            Err(OperationError::Abandoned)
        } else {
            Ok(())
        }
    }

    pub fn add(self, ev: &mut AddEvent) -> Result<(), OperationError> {
        Self::abandoned(&ev.op)?;
        dispatch_step!(self, ev, add);
        self.nexus.add(ev.entry.resolved()?.clone())
    }

    pub fn delete(self, ev: &mut DeleteEvent) -> Result<(), OperationError> {
        Self::abandoned(&ev.op)?;
        dispatch_step!(self, ev, delete);
        self.nexus.delete(ev.target.resolved()?, ev.subtree)
    }

    pub fn modify(self, ev: &mut ModifyEvent) -> Result<(), OperationError> {
        Self::abandoned(&ev.op)?;
        dispatch_step!(self, ev, modify);
        self.nexus
            .modify(ev.target.resolved()?, ev.modlist.resolved()?)
    }

    pub fn search(self, ev: &mut SearchEvent) -> Result<SearchReply, OperationError> {
        Self::abandoned(&ev.op)?;
        dispatch_step!(self, ev, search);
        let limits = ev.effective_limits();
        let outcome = self.nexus.search(
            ev.base.resolved()?,
            ev.scope,
            ev.filter.resolved()?,
            &limits,
            ev.op.ctime,
        )?;
        Ok(SearchReply {
            entries: outcome
                .entries
                .into_iter()
                .map(|e| e.as_ref().clone())
                .collect(),
            partial: outcome.partial,
        })
    }

    pub fn compare(self, ev: &mut CompareEvent) -> Result<bool, OperationError> {
        Self::abandoned(&ev.op)?;
        dispatch_step!(self, ev, compare);
        let entry = self.nexus.lookup(ev.target.resolved()?)?;
        // A present entry without the asserted value compares false; that is
        // an answer, not a fault.
        Ok(entry.attribute_equality(&ev.attr, ev.value.resolved()?))
    }

    pub fn bind(self, ev: &mut BindEvent) -> Result<Identity, OperationError> {
        Self::abandoned(&ev.op)?;
        dispatch_step!(self, ev, bind);
        // No stage claimed the bind. A chain without an authentication stage
        // must never let a credential through.
        security_error!("No authentication stage accepted a bind request");
        Err(OperationError::AuthenticationFailure)
    }

    pub fn unbind(self, ev: &mut UnbindEvent) -> Result<(), OperationError> {
        Self::abandoned(&ev.op)?;
        dispatch_step!(self, ev, unbind);
        Ok(())
    }

    pub fn rename(self, ev: &mut RenameEvent) -> Result<Dn, OperationError> {
        Self::abandoned(&ev.op)?;
        dispatch_step!(self, ev, rename);
        self.nexus
            .rename(ev.target.resolved()?, ev.new_rdn.resolved()?, ev.delete_old_rdn)
    }

    pub fn move_subtree(self, ev: &mut MoveEvent) -> Result<Dn, OperationError> {
        Self::abandoned(&ev.op)?;
        dispatch_step!(self, ev, move_subtree);
        self.nexus
            .move_subtree(ev.target.resolved()?, ev.new_superior.resolved()?)
    }

    pub fn move_and_rename(self, ev: &mut MoveAndRenameEvent) -> Result<Dn, OperationError> {
        Self::abandoned(&ev.op)?;
        dispatch_step!(self, ev, move_and_rename);
        // Composed as rename-in-place then move. The failure modes of the
        // second leg are checked up front so the rename is not left behind
        // by a move that was never going to succeed.
        let target = ev.target.resolved()?;
        let new_superior = ev.new_superior.resolved()?;
        let new_rdn = ev.new_rdn.resolved()?;
        if new_superior.is_under(target) {
            return Err(OperationError::NamingViolation(new_superior.to_string()));
        }
        if !self.nexus.exists(new_superior) {
            return Err(OperationError::NoSuchObject);
        }
        let final_dn = new_superior.child(new_rdn.clone());
        if final_dn != *target && self.nexus.exists(&final_dn) {
            return Err(OperationError::AlreadyExists);
        }
        let renamed = self.nexus.rename(target, new_rdn, ev.delete_old_rdn)?;
        if renamed.is_child_of(new_superior) {
            // Already under the requested superior; the move leg is a no-op.
            return Ok(renamed);
        }
        self.nexus.move_subtree(&renamed, new_superior).map_err(|e| {
            security_critical!(
                ?e,
                target = %renamed,
                destination = %new_superior,
                "Entry renamed but could not move to its new superior"
            );
            OperationError::PartialFailure(
                "entry renamed but not moved to its new superior".to_string(),
            )
        })
    }
}

/// The assembled pipeline. Stages are recomposed only at configuration time;
/// every dispatch runs over an immutable snapshot.
pub struct InterceptorChain {
    stages: CowCell<Vec<Arc<dyn Interceptor>>>,
    nexus: Arc<PartitionNexus>,
}

impl InterceptorChain {
    pub fn new(nexus: Arc<PartitionNexus>) -> Self {
        InterceptorChain {
            stages: CowCell::new(Vec::new()),
            nexus,
        }
    }

    fn start<'a>(&'a self, snapshot: &'a [Arc<dyn Interceptor>]) -> Next<'a> {
        Next {
            chain: snapshot,
            pos: 0,
            nexus: &self.nexus,
        }
    }

    #[instrument(level = "debug", skip_all)]
    pub fn add(&self, ev: &mut AddEvent) -> Result<(), OperationError> {
        let snapshot = self.stages.read();
        self.start(&snapshot).add(ev)
    }

    #[instrument(level = "debug", skip_all)]
    pub fn delete(&self, ev: &mut DeleteEvent) -> Result<(), OperationError> {
        let snapshot = self.stages.read();
        self.start(&snapshot).delete(ev)
    }

    #[instrument(level = "debug", skip_all)]
    pub fn modify(&self, ev: &mut ModifyEvent) -> Result<(), OperationError> {
        let snapshot = self.stages.read();
        self.start(&snapshot).modify(ev)
    }

    #[instrument(level = "debug", skip_all)]
    pub fn search(&self, ev: &mut SearchEvent) -> Result<SearchReply, OperationError> {
        let snapshot = self.stages.read();
        self.start(&snapshot).search(ev)
    }

    #[instrument(level = "debug", skip_all)]
    pub fn compare(&self, ev: &mut CompareEvent) -> Result<bool, OperationError> {
        let snapshot = self.stages.read();
        self.start(&snapshot).compare(ev)
    }

    #[instrument(level = "debug", skip_all)]
    pub fn bind(&self, ev: &mut BindEvent) -> Result<Identity, OperationError> {
        let snapshot = self.stages.read();
        self.start(&snapshot).bind(ev)
    }

    #[instrument(level = "debug", skip_all)]
    pub fn unbind(&self, ev: &mut UnbindEvent) -> Result<(), OperationError> {
        let snapshot = self.stages.read();
        self.start(&snapshot).unbind(ev)
    }

    #[instrument(level = "debug", skip_all)]
    pub fn rename(&self, ev: &mut RenameEvent) -> Result<Dn, OperationError> {
        let snapshot = self.stages.read();
        self.start(&snapshot).rename(ev)
    }

    #[instrument(level = "debug", skip_all)]
    pub fn move_subtree(&self, ev: &mut MoveEvent) -> Result<Dn, OperationError> {
        let snapshot = self.stages.read();
        self.start(&snapshot).move_subtree(ev)
    }

    #[instrument(level = "debug", skip_all)]
    pub fn move_and_rename(&self, ev: &mut MoveAndRenameEvent) -> Result<Dn, OperationError> {
        let snapshot = self.stages.read();
        self.start(&snapshot).move_and_rename(ev)
    }

    // == composition, configuration time only ==

    pub fn append(&self, stage: Arc<dyn Interceptor>) -> Result<(), OperationError> {
        let mut wr = self.stages.write();
        if wr.iter().any(|s| s.name() == stage.name()) {
            return Err(OperationError::AlreadyExists);
        }
        wr.push(stage);
        wr.commit();
        Ok(())
    }

    pub fn insert_before(
        &self,
        name: &str,
        stage: Arc<dyn Interceptor>,
    ) -> Result<(), OperationError> {
        self.insert_at(name, stage, 0)
    }

    pub fn insert_after(
        &self,
        name: &str,
        stage: Arc<dyn Interceptor>,
    ) -> Result<(), OperationError> {
        self.insert_at(name, stage, 1)
    }

    fn insert_at(
        &self,
        name: &str,
        stage: Arc<dyn Interceptor>,
        offset: usize,
    ) -> Result<(), OperationError> {
        let mut wr = self.stages.write();
        if wr.iter().any(|s| s.name() == stage.name()) {
            return Err(OperationError::AlreadyExists);
        }
        let pos = wr
            .iter()
            .position(|s| s.name() == name)
            .ok_or(OperationError::NoSuchObject)?;
        wr.insert(pos + offset, stage);
        wr.commit();
        Ok(())
    }

    pub fn remove(&self, name: &str) -> Result<(), OperationError> {
        let mut wr = self.stages.write();
        let pos = wr
            .iter()
            .position(|s| s.name() == name)
            .ok_or(OperationError::NoSuchObject)?;
        wr.remove(pos);
        wr.commit();
        Ok(())
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.stages.read().iter().map(|s| s.name()).collect()
    }
}
