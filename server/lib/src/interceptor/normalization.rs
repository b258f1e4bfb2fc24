//! First stage of the chain. Every raw payload is bound to its schema form
//! here: target names become [`Dn`]s, wire entries become [`Entry`]s, filters
//! and assertion values normalise under their attributes' matching rules.
//! Everything below this stage only ever compares normalised forms, which is
//! what makes two spellings of one name behave identically.
//!
//! Internal operations arrive already resolved and pass through untouched.

use std::sync::Arc;

use crate::event::{
    AddEvent, BindEvent, CompareEvent, DeleteEvent, ModifyEvent, MoveAndRenameEvent, MoveEvent,
    RenameEvent, SearchEvent, SearchReply,
};
use crate::filter::Filter;
use crate::interceptor::{Interceptor, Next, INTERCEPTOR_NORMALIZATION};
use crate::modify::ModifyList;
use crate::prelude::*;
use crate::schema::Schema;

pub struct Normalization {
    schema: Arc<Schema>,
}

impl Normalization {
    pub fn new(schema: Arc<Schema>) -> Self {
        Normalization { schema }
    }

    /// Parse a raw rename target: exactly one rdn component.
    fn rdn_from_raw(
        raw: &str,
        schema: &(impl SchemaTransaction + ?Sized),
    ) -> Result<Rdn, OperationError> {
        let dn = Dn::parse(raw, schema)?;
        match (dn.depth(), dn.rdn()) {
            (1, Some(rdn)) => Ok(rdn.clone()),
            _ => Err(OperationError::NamingViolation(raw.to_string())),
        }
    }
}

impl Interceptor for Normalization {
    fn name(&self) -> &'static str {
        INTERCEPTOR_NORMALIZATION
    }

    fn add(&self, ev: &mut AddEvent, next: Next<'_>) -> Result<(), OperationError> {
        let sr = self.schema.read();
        ev.entry.resolve_with(|pe| Entry::from_proto(pe, &sr))?;
        next.add(ev)
    }

    fn delete(&self, ev: &mut DeleteEvent, next: Next<'_>) -> Result<(), OperationError> {
        let sr = self.schema.read();
        ev.target.resolve_with(|raw| Dn::parse(raw, &sr))?;
        next.delete(ev)
    }

    fn modify(&self, ev: &mut ModifyEvent, next: Next<'_>) -> Result<(), OperationError> {
        let sr = self.schema.read();
        ev.target.resolve_with(|raw| Dn::parse(raw, &sr))?;
        ev.modlist
            .resolve_with(|pl| ModifyList::from_proto(pl, &sr))?;
        next.modify(ev)
    }

    fn search(&self, ev: &mut SearchEvent, next: Next<'_>) -> Result<SearchReply, OperationError> {
        let sr = self.schema.read();
        ev.base.resolve_with(|raw| Dn::parse(raw, &sr))?;
        ev.filter
            .resolve_with(|pf| Filter::from_proto(pf, &sr))?;
        if let Some(attrs) = ev.attrs.take() {
            ev.attrs = Some(attrs.iter().map(|a| sr.normalise_attr_name(a)).collect());
        }
        next.search(ev)
    }

    fn compare(&self, ev: &mut CompareEvent, next: Next<'_>) -> Result<bool, OperationError> {
        let sr = self.schema.read();
        ev.target.resolve_with(|raw| Dn::parse(raw, &sr))?;
        let s_attr = sr
            .resolve_attr(&ev.attr)
            .map_err(OperationError::SchemaViolation)?
            .clone();
        ev.attr = s_attr.name.clone();
        ev.value
            .resolve_with(|raw| sr.partial_value_from_raw(&s_attr, raw))?;
        next.compare(ev)
    }

    fn bind(&self, ev: &mut BindEvent, next: Next<'_>) -> Result<Identity, OperationError> {
        let sr = self.schema.read();
        // An empty name parses to the root dn, which authn reads as the
        // anonymous bind.
        ev.target.resolve_with(|raw| Dn::parse(raw, &sr))?;
        next.bind(ev)
    }

    fn rename(&self, ev: &mut RenameEvent, next: Next<'_>) -> Result<Dn, OperationError> {
        let sr = self.schema.read();
        ev.target.resolve_with(|raw| Dn::parse(raw, &sr))?;
        ev.new_rdn
            .resolve_with(|raw| Self::rdn_from_raw(raw, &sr))?;
        next.rename(ev)
    }

    fn move_subtree(&self, ev: &mut MoveEvent, next: Next<'_>) -> Result<Dn, OperationError> {
        let sr = self.schema.read();
        ev.target.resolve_with(|raw| Dn::parse(raw, &sr))?;
        ev.new_superior.resolve_with(|raw| Dn::parse(raw, &sr))?;
        next.move_subtree(ev)
    }

    fn move_and_rename(
        &self,
        ev: &mut MoveAndRenameEvent,
        next: Next<'_>,
    ) -> Result<Dn, OperationError> {
        let sr = self.schema.read();
        ev.target.resolve_with(|raw| Dn::parse(raw, &sr))?;
        ev.new_superior.resolve_with(|raw| Dn::parse(raw, &sr))?;
        ev.new_rdn
            .resolve_with(|raw| Self::rdn_from_raw(raw, &sr))?;
        next.move_and_rename(ev)
    }
}
