//! Last stage before storage. Checks the existence preconditions every
//! mutation shares, and masks internal fault kinds on the way back out so a
//! client only ever sees protocol-facing errors. Stages above this one can
//! rely on their delegated call returning presentable errors.

use std::sync::Arc;

use crate::event::{
    AddEvent, CompareEvent, DeleteEvent, ModifyEvent, MoveAndRenameEvent, MoveEvent, RenameEvent,
    SearchEvent, SearchReply,
};
use crate::interceptor::{Interceptor, Next, INTERCEPTOR_EXCEPTION};
use crate::partition::PartitionNexus;
use crate::prelude::*;

pub struct ExceptionTranslation {
    nexus: Arc<PartitionNexus>,
}

impl ExceptionTranslation {
    pub fn new(nexus: Arc<PartitionNexus>) -> Self {
        ExceptionTranslation { nexus }
    }

    /// Collapse internal fault kinds to the one the protocol may carry. The
    /// original is logged here, at the only point that sees all of them.
    fn translate<T>(res: Result<T, OperationError>) -> Result<T, OperationError> {
        res.map_err(|e| match e {
            OperationError::Backend
            | OperationError::InvalidState
            | OperationError::ConsistencyError(_) => {
                admin_warn!(?e, "Masking an internal fault");
                OperationError::OperationsError
            }
            e => e,
        })
    }

    fn require_exists(&self, dn: &Dn) -> Result<(), OperationError> {
        if self.nexus.exists(dn) {
            Ok(())
        } else {
            request_error!(name = %dn, "Target entry does not exist");
            Err(OperationError::NoSuchObject)
        }
    }
}

impl Interceptor for ExceptionTranslation {
    fn name(&self) -> &'static str {
        INTERCEPTOR_EXCEPTION
    }

    fn add(&self, ev: &mut AddEvent, next: Next<'_>) -> Result<(), OperationError> {
        {
            let dn = ev.entry.resolved()?.dn();
            // Naming context roots have no parent to check.
            if !self.nexus.is_naming_context(dn) {
                let parent = dn.parent().ok_or(OperationError::NoSuchObject)?;
                if !self.nexus.exists(&parent) {
                    request_error!(name = %dn, parent = %parent, "Add parent does not exist");
                    return Err(OperationError::NoSuchObject);
                }
            }
            if self.nexus.exists(dn) {
                request_error!(name = %dn, "Add target already exists");
                return Err(OperationError::AlreadyExists);
            }
        }
        Self::translate(next.add(ev))
    }

    fn delete(&self, ev: &mut DeleteEvent, next: Next<'_>) -> Result<(), OperationError> {
        {
            let target = ev.target.resolved()?;
            self.require_exists(target)?;
            if !ev.subtree && self.nexus.has_children(target) {
                request_error!(name = %target, "Refusing to delete an entry with children");
                return Err(OperationError::NotAllowedOnNonLeaf);
            }
        }
        Self::translate(next.delete(ev))
    }

    fn modify(&self, ev: &mut ModifyEvent, next: Next<'_>) -> Result<(), OperationError> {
        self.require_exists(ev.target.resolved()?)?;
        Self::translate(next.modify(ev))
    }

    fn search(&self, ev: &mut SearchEvent, next: Next<'_>) -> Result<SearchReply, OperationError> {
        Self::translate(next.search(ev))
    }

    fn compare(&self, ev: &mut CompareEvent, next: Next<'_>) -> Result<bool, OperationError> {
        self.require_exists(ev.target.resolved()?)?;
        Self::translate(next.compare(ev))
    }

    fn rename(&self, ev: &mut RenameEvent, next: Next<'_>) -> Result<Dn, OperationError> {
        self.require_exists(ev.target.resolved()?)?;
        Self::translate(next.rename(ev))
    }

    fn move_subtree(&self, ev: &mut MoveEvent, next: Next<'_>) -> Result<Dn, OperationError> {
        self.require_exists(ev.target.resolved()?)?;
        self.require_exists(ev.new_superior.resolved()?)?;
        Self::translate(next.move_subtree(ev))
    }

    fn move_and_rename(
        &self,
        ev: &mut MoveAndRenameEvent,
        next: Next<'_>,
    ) -> Result<Dn, OperationError> {
        self.require_exists(ev.target.resolved()?)?;
        self.require_exists(ev.new_superior.resolved()?)?;
        Self::translate(next.move_and_rename(ev))
    }
}
