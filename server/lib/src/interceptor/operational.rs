//! The attributes the server itself maintains. An add is stamped with its
//! birth records before it reaches storage; a modify carries fresh change
//! stamps alongside the client's own changes so both land in the same write.
//! Rename and move restamp the entry once it has settled under its new name.
//! On the way out of a search, operational attributes are stripped unless
//! the request named them.

use std::collections::BTreeSet;
use std::sync::Arc;

use time::OffsetDateTime;

use crate::event::{
    AddEvent, ModifyEvent, MoveAndRenameEvent, MoveEvent, RenameEvent, SearchEvent, SearchReply,
};
use crate::interceptor::{Interceptor, Next, INTERCEPTOR_OPERATIONAL};
use crate::prelude::*;
use crate::repl::csn::CsnFactory;
use crate::schema::Schema;
use crate::utils::duration_from_epoch_now;

pub struct OperationalAttrs {
    schema: Arc<Schema>,
    csn_factory: Arc<CsnFactory>,
}

impl OperationalAttrs {
    pub fn new(schema: Arc<Schema>, csn_factory: Arc<CsnFactory>) -> Self {
        OperationalAttrs {
            schema,
            csn_factory,
        }
    }

    fn now() -> OffsetDateTime {
        OffsetDateTime::UNIX_EPOCH + duration_from_epoch_now()
    }

    /// The modifications every change to an entry carries.
    fn change_stamps(&self, stamp_name: &str) -> Vec<Modify> {
        vec![
            m_purge(ATTR_MODIFY_TIMESTAMP),
            m_pres(ATTR_MODIFY_TIMESTAMP, &Value::new_datetime(Self::now())),
            m_purge(ATTR_MODIFIERS_NAME),
            m_pres(ATTR_MODIFIERS_NAME, &Value::new_dn(stamp_name.to_string())),
            m_purge(ATTR_ENTRY_CSN),
            m_pres(ATTR_ENTRY_CSN, &Value::new_csn(self.csn_factory.next())),
        ]
    }

    /// Restamp an entry that just changed name. The restamp is an internal
    /// modify issued from the top of the chain, with this stage bypassed so
    /// it does not stamp itself a second time.
    fn restamp(&self, ident: &Identity, dn: Dn, next: Next<'_>) -> Result<(), OperationError> {
        let mods = ModifyList::new(self.change_stamps(ident.stamp_name()));
        let mut sub = ModifyEvent::new_internal(dn, mods);
        sub.op.bypass.insert(INTERCEPTOR_OPERATIONAL);
        next.restart().modify(&mut sub)
    }
}

impl Interceptor for OperationalAttrs {
    fn name(&self) -> &'static str {
        INTERCEPTOR_OPERATIONAL
    }

    fn add(&self, ev: &mut AddEvent, next: Next<'_>) -> Result<(), OperationError> {
        let stamp_name = ev.op.ident.stamp_name().to_string();
        let entry = ev.entry.resolved_mut()?;
        // Stamps already present, from bootstrap or a replicated change,
        // are kept as-is.
        if !entry.attribute_pres(ATTR_ENTRY_UUID) {
            entry.add_ava(ATTR_ENTRY_UUID, Value::new_uuid(Uuid::new_v4()))?;
        }
        if !entry.attribute_pres(ATTR_ENTRY_CSN) {
            entry.add_ava(ATTR_ENTRY_CSN, Value::new_csn(self.csn_factory.next()))?;
        }
        if !entry.attribute_pres(ATTR_CREATE_TIMESTAMP) {
            entry.add_ava(ATTR_CREATE_TIMESTAMP, Value::new_datetime(Self::now()))?;
        }
        if !entry.attribute_pres(ATTR_CREATORS_NAME) {
            entry.add_ava(ATTR_CREATORS_NAME, Value::new_dn(stamp_name))?;
        }
        next.add(ev)
    }

    fn modify(&self, ev: &mut ModifyEvent, next: Next<'_>) -> Result<(), OperationError> {
        let stamps = self.change_stamps(ev.op.ident.stamp_name());
        let mods = ev.modlist.resolved_mut()?;
        for m in stamps {
            mods.push_mod(m);
        }
        next.modify(ev)
    }

    fn search(&self, ev: &mut SearchEvent, next: Next<'_>) -> Result<SearchReply, OperationError> {
        let mut reply = next.search(ev)?;
        let sr = self.schema.read();
        reply.entries = reply
            .entries
            .iter()
            .map(|e| {
                // `*` selects every user attribute alongside any named
                // operational ones; no request means user attributes only.
                let keep: BTreeSet<AttrString> = match &ev.attrs {
                    Some(requested) => e
                        .attribute_names()
                        .filter(|a| {
                            requested.contains(*a)
                                || (requested.contains("*") && !sr.is_operational(a))
                        })
                        .map(|a| attr_fold(a))
                        .collect(),
                    None => e
                        .attribute_names()
                        .filter(|a| !sr.is_operational(a))
                        .map(|a| attr_fold(a))
                        .collect(),
                };
                e.reduce_attributes(&keep)
            })
            .collect();
        Ok(reply)
    }

    fn rename(&self, ev: &mut RenameEvent, next: Next<'_>) -> Result<Dn, OperationError> {
        let renamed = next.rename(ev)?;
        self.restamp(&ev.op.ident, renamed.clone(), next)?;
        Ok(renamed)
    }

    fn move_subtree(&self, ev: &mut MoveEvent, next: Next<'_>) -> Result<Dn, OperationError> {
        let moved = next.move_subtree(ev)?;
        self.restamp(&ev.op.ident, moved.clone(), next)?;
        Ok(moved)
    }

    fn move_and_rename(
        &self,
        ev: &mut MoveAndRenameEvent,
        next: Next<'_>,
    ) -> Result<Dn, OperationError> {
        let moved = next.move_and_rename(ev)?;
        self.restamp(&ev.op.ident, moved.clone(), next)?;
        Ok(moved)
    }
}
