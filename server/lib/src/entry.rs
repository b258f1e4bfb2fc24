//! Entries are the base unit of object storage in the server. This is one of
//! the foundational concepts along with [`Dn`] and [`crate::schema`] that
//! everything else builds upon.
//!
//! An [`Entry`] is a collection of attribute-value sets addressed by a name.
//! The attribute is a "key" and it holds one to many associated values with
//! no ordering. A pseudo example, minus schema and typing:
//!
//! ```text
//! Entry "cn=claire,ou=people,ou=system" {
//!   "objectclass": ["top", "person"],
//!   "cn": ["claire"],
//!   "sn": ["meadows"],
//! };
//! ```
//!
//! Attribute names are folded on the way in, so `CN` and `cn` address the
//! same value set. Whether the *content* is valid is the schema's call:
//! [`Entry::validate`] checks the full invariant set before any mutation is
//! allowed to commit.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use atrium_proto::message::ProtoEntry;

use crate::prelude::*;
use crate::schema::{ClassKind, SchemaClass};

/// One directory object: a name and its attribute-value sets.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entry {
    dn: Dn,
    attrs: BTreeMap<AttrString, ValueSet>,
}

impl Entry {
    pub fn new(dn: Dn) -> Self {
        Entry {
            dn,
            attrs: BTreeMap::new(),
        }
    }

    /// Bind a wire entry to its typed form. Attribute names resolve through
    /// the schema and every raw value is parsed under its attribute's syntax.
    pub fn from_proto(
        pe: &ProtoEntry,
        schema: &(impl SchemaTransaction + ?Sized),
    ) -> Result<Self, OperationError> {
        let dn = Dn::parse(&pe.dn, schema)?;
        let mut entry = Entry::new(dn);
        for (attr, raws) in &pe.attrs {
            let s_attr = schema
                .resolve_attr(attr)
                .map_err(OperationError::SchemaViolation)?
                .clone();
            for raw in raws {
                entry.add_ava(&s_attr.name, schema.value_from_raw(&s_attr, raw)?)?;
            }
        }
        Ok(entry)
    }

    pub fn dn(&self) -> &Dn {
        &self.dn
    }

    /// Rebind the entry under a new name. The caller is responsible for
    /// re-validating, since the naming ava changes with the name.
    pub fn set_dn(&mut self, dn: Dn) {
        self.dn = dn;
    }

    /// Insert one value. `Ok(false)` when an equal value was already
    /// present. All values of an attribute share one syntax family; a value
    /// of another family is rejected.
    pub fn add_ava(&mut self, attr: &str, value: Value) -> Result<bool, OperationError> {
        let attr = attr_fold(attr);
        match self.attrs.get_mut(&attr) {
            Some(vs) => vs.insert_checked(value),
            None => {
                self.attrs.insert(attr, ValueSet::new(value));
                Ok(true)
            }
        }
    }

    /// Replace the whole value set of this attribute.
    pub fn set_ava(&mut self, attr: &str, vs: ValueSet) {
        self.attrs.insert(attr_fold(attr), vs);
    }

    pub fn get_ava(&self, attr: &str) -> Option<&ValueSet> {
        self.attrs.get(attr_fold(attr).as_str())
    }

    pub fn attribute_pres(&self, attr: &str) -> bool {
        self.get_ava(attr).is_some()
    }

    pub fn attribute_equality(&self, attr: &str, value: &PartialValue) -> bool {
        self.get_ava(attr)
            .map(|vs| vs.contains(value))
            .unwrap_or(false)
    }

    pub fn attribute_substring(
        &self,
        attr: &str,
        initial: Option<&str>,
        any: &[String],
        last: Option<&str>,
    ) -> bool {
        self.get_ava(attr)
            .map(|vs| vs.matches_sub(initial, any, last))
            .unwrap_or(false)
    }

    pub fn get_ava_single(&self, attr: &str) -> Option<Value> {
        self.get_ava(attr).and_then(|vs| vs.single_value())
    }

    fn get_ava_single_str(&self, attr: &str, syntax: SyntaxType) -> Option<&str> {
        self.get_ava(attr)
            .filter(|vs| vs.syntax() == syntax)
            .and_then(|vs| vs.single_str())
    }

    pub fn get_ava_single_utf8(&self, attr: &str) -> Option<&str> {
        self.get_ava_single_str(attr, SyntaxType::Utf8String)
    }

    pub fn get_ava_single_iutf8(&self, attr: &str) -> Option<&str> {
        self.get_ava_single_str(attr, SyntaxType::Utf8StringInsensitive)
    }

    pub fn get_ava_single_oid(&self, attr: &str) -> Option<&str> {
        self.get_ava_single_str(attr, SyntaxType::Oid)
    }

    pub fn get_ava_single_dn(&self, attr: &str) -> Option<&str> {
        self.get_ava_single_str(attr, SyntaxType::DistinguishedName)
    }

    pub fn get_ava_single_bool(&self, attr: &str) -> Option<bool> {
        self.get_ava(attr).and_then(|vs| vs.single_bool())
    }

    pub fn get_ava_single_syntax(&self, attr: &str) -> Option<SyntaxType> {
        self.get_ava(attr).and_then(|vs| vs.single_syntax())
    }

    pub fn get_ava_single_uuid(&self, attr: &str) -> Option<Uuid> {
        self.get_ava(attr).and_then(|vs| vs.single_uuid())
    }

    pub fn get_ava_single_csn(&self, attr: &str) -> Option<Csn> {
        self.get_ava(attr).and_then(|vs| vs.single_csn())
    }

    pub fn get_ava_iter_iutf8(&self, attr: &str) -> Option<Box<dyn Iterator<Item = &str> + '_>> {
        self.get_ava(attr)
            .filter(|vs| vs.syntax() == SyntaxType::Utf8StringInsensitive)
            .and_then(|vs| vs.as_str_iter())
    }

    pub fn get_ava_iter_dn(&self, attr: &str) -> Option<Box<dyn Iterator<Item = &str> + '_>> {
        self.get_ava(attr)
            .filter(|vs| vs.syntax() == SyntaxType::DistinguishedName)
            .and_then(|vs| vs.as_str_iter())
    }

    pub fn get_uuid(&self) -> Option<Uuid> {
        self.get_ava_single_uuid(ATTR_ENTRY_UUID)
    }

    pub fn get_csn(&self) -> Option<Csn> {
        self.get_ava_single_csn(ATTR_ENTRY_CSN)
    }

    /// Remove one value. If the ava doesn't exist we don't do anything else,
    /// since we are asserting the absence of a value.
    pub fn remove_ava(&mut self, attr: &str, value: &PartialValue) {
        let attr = attr_fold(attr);
        let empty = match self.attrs.get_mut(&attr) {
            Some(vs) => {
                vs.remove(value);
                vs.is_empty()
            }
            None => false,
        };
        if empty {
            self.attrs.remove(&attr);
        }
    }

    /// Remove all values of this attribute. Asserting the absence of an
    /// attribute that is already absent is a no-op.
    pub fn purge_ava(&mut self, attr: &str) {
        self.attrs.remove(attr_fold(attr).as_str());
    }

    /// Remove the value set, returning it.
    pub fn pop_ava(&mut self, attr: &str) -> Option<ValueSet> {
        self.attrs.remove(attr_fold(attr).as_str())
    }

    /// Apply the content of this modlist, enforcing the expressed state.
    pub fn apply_modlist(&mut self, modlist: &ModifyList) -> Result<(), OperationError> {
        for modify in modlist.iter() {
            match modify {
                Modify::Present(attr, value) => {
                    self.add_ava(attr, value.clone())?;
                }
                Modify::Removed(attr, value) => {
                    self.remove_ava(attr, value);
                }
                Modify::Purged(attr) => {
                    self.purge_ava(attr);
                }
            }
        }
        Ok(())
    }

    pub fn iter_attrs(&self) -> impl Iterator<Item = (&AttrString, &ValueSet)> {
        self.attrs.iter()
    }

    pub fn attribute_names(&self) -> impl Iterator<Item = &str> {
        self.attrs.keys().map(|k| k.as_str())
    }

    /// A copy of this entry holding only the listed attributes. Used after
    /// authorization to reduce a result to what the reader may see.
    pub fn reduce_attributes(&self, allowed: &BTreeSet<AttrString>) -> Entry {
        let attrs = self
            .attrs
            .iter()
            .filter(|(k, _)| allowed.contains(k.as_str()))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        Entry {
            dn: self.dn.clone(),
            attrs,
        }
    }

    /// Render this entry for a client reply, keeping only the requested
    /// attributes. With no request, every user attribute is returned;
    /// operational attributes appear only when named. A literal `*` selects
    /// all user attributes alongside any named operational ones.
    pub fn to_proto(
        &self,
        attrs: Option<&BTreeSet<AttrString>>,
        schema: &(impl SchemaTransaction + ?Sized),
    ) -> ProtoEntry {
        let mut pe = ProtoEntry::new(self.dn.to_string());
        for (attr, vs) in &self.attrs {
            let keep = match attrs {
                Some(named) => {
                    named.contains(attr.as_str())
                        || (named.contains("*") && !schema.is_operational(attr.as_str()))
                }
                None => !schema.is_operational(attr.as_str()),
            };
            if keep {
                pe.attrs.insert(attr.to_string(), vs.as_proto_strings());
            }
        }
        pe
    }

    pub fn matches_filter(&self, filter: &Filter) -> bool {
        match filter {
            Filter::Eq(attr, value) => self.attribute_equality(attr, value),
            Filter::Sub(attr, sub) => self.attribute_substring(
                attr,
                sub.initial.as_deref(),
                &sub.any,
                sub.last.as_deref(),
            ),
            Filter::Pres(attr) => self.attribute_pres(attr),
            Filter::And(fs) => fs.iter().all(|f| self.matches_filter(f)),
            Filter::Or(fs) => fs.iter().any(|f| self.matches_filter(f)),
            Filter::Not(f) => !self.matches_filter(f),
        }
    }

    /// Check the full schema contract for this entry:
    ///
    /// * every objectclass value resolves to a registered class,
    /// * the structural classes form exactly one superclass chain,
    /// * every must attribute of the effective classes is present,
    /// * every present attribute is known, of the right syntax and value
    ///   count, and allowed by some effective class (or operational),
    /// * the naming ava appears among the entry's own values.
    pub fn validate(&self, schema: &(impl SchemaTransaction + ?Sized)) -> Result<(), SchemaError> {
        let oc = self
            .get_ava(ATTR_OBJECTCLASS)
            .ok_or_else(|| SchemaError::MissingMustAttribute(vec![ATTR_OBJECTCLASS.to_string()]))?;

        let mut classes: Vec<Arc<SchemaClass>> = Vec::with_capacity(oc.len());
        let mut unknown = Vec::new();
        if let Some(iter) = oc.as_str_iter() {
            for name in iter {
                match schema.resolve_class(name) {
                    Ok(class) => classes.push(class.clone()),
                    Err(_) => unknown.push(name.to_string()),
                }
            }
        }
        if !unknown.is_empty() {
            return Err(SchemaError::InvalidClass(unknown));
        }

        let structural: Vec<&Arc<SchemaClass>> = classes
            .iter()
            .filter(|c| c.kind == ClassKind::Structural)
            .collect();
        if structural.is_empty() {
            return Err(SchemaError::NoStructuralClass);
        }
        // One chain only: some structural class must descend from all the
        // others. person + organizationalunit has no such class.
        let chained = structural.iter().any(|cand| {
            structural
                .iter()
                .all(|other| schema.is_descendant(&cand.name, &other.name).unwrap_or(false))
        });
        if !chained {
            return Err(SchemaError::InvalidClass(
                structural.iter().map(|c| c.name.to_string()).collect(),
            ));
        }

        // Close over superclasses so inherited must/may apply.
        let mut effective: BTreeMap<AttrString, Arc<SchemaClass>> = BTreeMap::new();
        let mut stack = classes;
        while let Some(class) = stack.pop() {
            if let Some(sup) = &class.sup {
                if !effective.contains_key(attr_fold(sup).as_str()) {
                    stack.push(schema.resolve_class(sup)?.clone());
                }
            }
            effective.insert(attr_fold(&class.name), class);
        }

        let extensible = effective.contains_key(CLASS_EXTENSIBLE_OBJECT);

        let mut must: BTreeSet<AttrString> = BTreeSet::new();
        let mut allowed: BTreeSet<AttrString> = BTreeSet::new();
        for class in effective.values() {
            for attr in &class.must {
                let attr = attr_fold(attr);
                allowed.insert(attr.clone());
                must.insert(attr);
            }
            for attr in &class.may {
                allowed.insert(attr_fold(attr));
            }
        }

        let missing: Vec<String> = must
            .iter()
            .filter(|attr| !self.attrs.contains_key(attr.as_str()))
            .map(|attr| attr.to_string())
            .collect();
        if !missing.is_empty() {
            return Err(SchemaError::MissingMustAttribute(missing));
        }

        for (attr, vs) in self.attrs.iter() {
            let def = schema.resolve_attr(attr)?;
            if vs.syntax() != def.syntax || (!def.multivalue && vs.len() > 1) {
                return Err(SchemaError::InvalidAttributeSyntax(def.name.to_string()));
            }
            if !def.operational && !extensible && !allowed.contains(attr.as_str()) {
                return Err(SchemaError::AttributeNotValidForClass(def.name.to_string()));
            }
        }

        // The naming ava must exist among the entry's own values.
        if let Some(rdn) = self.dn.rdn() {
            for ava in rdn.avas() {
                let def = schema.resolve_attr(&ava.attr)?;
                let pv = schema
                    .partial_value_from_raw(def, &ava.value)
                    .map_err(|_| SchemaError::InvalidAttributeSyntax(def.name.to_string()))?;
                if !self.attribute_equality(&def.name, &pv) {
                    return Err(SchemaError::RdnNotPresent(def.name.to_string()));
                }
            }
        }

        Ok(())
    }
}
