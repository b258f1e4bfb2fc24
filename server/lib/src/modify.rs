//! Modification expressions. A `ModifyList` is the ordered series of state
//! assertions a modify operation applies to an entry: values that should be
//! present, values that should be removed, attributes that should be purged
//! entirely.

use std::slice;

use atrium_proto::message::{ProtoModify, ProtoModifyList, ProtoModifyOp};

use crate::prelude::*;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Modify {
    // This value *should* exist.
    Present(AttrString, Value),
    // This value *should not* exist.
    Removed(AttrString, PartialValue),
    // This attr *should not* exist.
    Purged(AttrString),
}

pub fn m_pres(attr: &str, v: &Value) -> Modify {
    Modify::Present(attr_fold(attr), v.clone())
}

pub fn m_remove(attr: &str, pv: &PartialValue) -> Modify {
    Modify::Removed(attr_fold(attr), pv.clone())
}

pub fn m_purge(attr: &str) -> Modify {
    Modify::Purged(attr_fold(attr))
}

impl Modify {
    /// The attribute this change touches.
    pub fn attr(&self) -> &AttrString {
        match self {
            Modify::Present(a, _) => a,
            Modify::Removed(a, _) => a,
            Modify::Purged(a) => a,
        }
    }
}

/// The order of the list matters. Each change is applied in sequence.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ModifyList {
    mods: Vec<Modify>,
}

impl<'a> IntoIterator for &'a ModifyList {
    type IntoIter = slice::Iter<'a, Modify>;
    type Item = &'a Modify;

    fn into_iter(self) -> Self::IntoIter {
        self.mods.iter()
    }
}

impl ModifyList {
    pub fn new(mods: Vec<Modify>) -> Self {
        ModifyList { mods }
    }

    pub fn new_purge_and_set(attr: &str, v: Value) -> Self {
        Self::new(vec![m_purge(attr), Modify::Present(attr_fold(attr), v)])
    }

    pub fn new_append(attr: &str, v: Value) -> Self {
        Self::new(vec![Modify::Present(attr_fold(attr), v)])
    }

    pub fn new_remove(attr: &str, pv: PartialValue) -> Self {
        Self::new(vec![Modify::Removed(attr_fold(attr), pv)])
    }

    pub fn new_purge(attr: &str) -> Self {
        Self::new(vec![m_purge(attr)])
    }

    pub fn push_mod(&mut self, modify: Modify) {
        self.mods.push(modify)
    }

    pub fn iter(&self) -> slice::Iter<'_, Modify> {
        self.mods.iter()
    }

    pub fn len(&self) -> usize {
        self.mods.len()
    }

    pub fn is_empty(&self) -> bool {
        self.mods.is_empty()
    }

    /// Resolve a raw protocol modification list against the schema. Attribute
    /// names canonicalise, values bind to their syntax. An `add` carries at
    /// least one value; a `delete` without values purges the attribute; a
    /// `replace` purges then re-adds.
    pub fn from_proto(
        pl: &ProtoModifyList,
        schema: &(impl SchemaTransaction + ?Sized),
    ) -> Result<Self, OperationError> {
        if pl.mods.is_empty() {
            return Err(OperationError::EmptyRequest);
        }
        let mut mods = Vec::with_capacity(pl.mods.len());
        for pm in &pl.mods {
            Self::resolve_one(pm, schema, &mut mods)?;
        }
        Ok(ModifyList { mods })
    }

    fn resolve_one(
        pm: &ProtoModify,
        schema: &(impl SchemaTransaction + ?Sized),
        mods: &mut Vec<Modify>,
    ) -> Result<(), OperationError> {
        let s_attr = schema
            .resolve_attr(&pm.attr)
            .map_err(OperationError::SchemaViolation)?;
        let attr = s_attr.name.clone();
        match pm.op {
            ProtoModifyOp::Add => {
                if pm.values.is_empty() {
                    admin_error!(attr = %attr, "add modification without values");
                    return Err(OperationError::EmptyRequest);
                }
                for raw in &pm.values {
                    let v = schema.value_from_raw(s_attr, raw)?;
                    mods.push(Modify::Present(attr.clone(), v));
                }
            }
            ProtoModifyOp::Delete => {
                if pm.values.is_empty() {
                    mods.push(Modify::Purged(attr));
                } else {
                    for raw in &pm.values {
                        let pv = schema.partial_value_from_raw(s_attr, raw)?;
                        mods.push(Modify::Removed(attr.clone(), pv));
                    }
                }
            }
            ProtoModifyOp::Replace => {
                mods.push(Modify::Purged(attr.clone()));
                for raw in &pm.values {
                    let v = schema.value_from_raw(s_attr, raw)?;
                    mods.push(Modify::Present(attr.clone(), v));
                }
            }
        }
        Ok(())
    }
}
