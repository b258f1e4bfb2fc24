//! [`Schema`] is one of the foundational concepts of the server. It provides
//! the set of rules that [`Entry`] avas must comply with to be considered
//! valid for commit, and the resolution tables every stage of the pipeline
//! consults: attribute and class definitions, and the matching rules that
//! decide how values normalise and compare.
//!
//! To define this structure we define [`SchemaAttribute`]s that provide rules
//! for how an ava must be structured, and [`SchemaClass`]es that define which
//! attributes may or must exist on an [`Entry`]. An entry carries one
//! structural class chain and any number of auxiliary classes; classes are
//! additive.
//!
//! The working set lives behind [`CowCell`]s. Readers take a snapshot and
//! never observe a half-applied reload; a write transaction publishes
//! atomically on commit.

use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;

use concread::cowcell::*;
use hashbrown::HashMap;

use crate::matching::{Comparator, MatchingRule, Normalizer};
use crate::prelude::*;

/// Whether a class can stand alone on an entry, and how it composes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClassKind {
    /// Never instantiable alone; exists to be extended.
    Abstract,
    /// Exactly one structural chain is required per entry.
    Structural,
    /// Composes onto a structural chain.
    Auxiliary,
}

impl fmt::Display for ClassKind {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(match self {
            ClassKind::Abstract => "abstract",
            ClassKind::Structural => "structural",
            ClassKind::Auxiliary => "auxiliary",
        })
    }
}

impl TryFrom<&str> for ClassKind {
    type Error = ();

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        match value.trim().to_lowercase().as_str() {
            "abstract" => Ok(ClassKind::Abstract),
            "structural" => Ok(ClassKind::Structural),
            "auxiliary" => Ok(ClassKind::Auxiliary),
            _ => Err(()),
        }
    }
}

/// An attribute type definition: the rules an ava of this attribute must
/// follow. `operational` attributes are maintained by the server, exempt
/// from class membership checks, and hidden from the must/may model.
#[derive(Debug, Clone)]
pub struct SchemaAttribute {
    pub name: AttrString,
    pub oid: String,
    pub description: String,
    pub multivalue: bool,
    pub operational: bool,
    pub syntax: SyntaxType,
    pub equality: Arc<MatchingRule>,
    pub ordering: Option<Arc<MatchingRule>>,
    pub substring: Option<Arc<MatchingRule>>,
}

impl PartialEq for SchemaAttribute {
    fn eq(&self, other: &Self) -> bool {
        // Description is display text, not identity. Re-registering a
        // definition that differs only in description is a no-op.
        self.name == other.name
            && self.oid == other.oid
            && self.multivalue == other.multivalue
            && self.operational == other.operational
            && self.syntax == other.syntax
            && self.equality == other.equality
            && self.ordering == other.ordering
            && self.substring == other.substring
    }
}

impl Eq for SchemaAttribute {}

impl SchemaAttribute {
    /// Build a definition from an `attributetype` entry under `ou=schema`.
    pub fn try_from(
        value: &Entry,
        schema: &(impl SchemaTransaction + ?Sized),
    ) -> Result<Self, OperationError> {
        let invalid = |attr: &str| {
            OperationError::SchemaViolation(SchemaError::InvalidAttributeSyntax(attr.to_string()))
        };

        if !value.attribute_equality(ATTR_OBJECTCLASS, &PartialValue::new_iutf8(CLASS_ATTRIBUTE_TYPE))
        {
            admin_error!("class {} not present - {}", CLASS_ATTRIBUTE_TYPE, value.dn());
            return Err(OperationError::SchemaViolation(SchemaError::InvalidClass(
                vec![CLASS_ATTRIBUTE_TYPE.to_string()],
            )));
        }

        let name = value
            .get_ava_single_iutf8(ATTR_ATTRIBUTE_NAME)
            .map(AttrString::from)
            .ok_or_else(|| invalid(ATTR_ATTRIBUTE_NAME))?;
        let oid = value
            .get_ava_single_oid(ATTR_OID)
            .map(str::to_string)
            .ok_or_else(|| invalid(ATTR_OID))?;
        let description = value
            .get_ava_single_utf8(ATTR_DESCRIPTION)
            .unwrap_or_default()
            .to_string();
        let multivalue = value
            .get_ava_single_bool(ATTR_MULTIVALUE)
            .ok_or_else(|| invalid(ATTR_MULTIVALUE))?;
        let operational = value
            .get_ava_single_bool(ATTR_OPERATIONAL)
            .ok_or_else(|| invalid(ATTR_OPERATIONAL))?;
        let syntax = value
            .get_ava_single_syntax(ATTR_SYNTAX)
            .ok_or_else(|| invalid(ATTR_SYNTAX))?;

        let equality = match value.get_ava_single_iutf8(ATTR_EQUALITY) {
            Some(rule) => schema
                .resolve_matching_rule(rule)
                .map_err(OperationError::SchemaViolation)?
                .clone(),
            None => schema
                .resolve_matching_rule(MatchingRule::default_equality_name(syntax))
                .map_err(OperationError::SchemaViolation)?
                .clone(),
        };
        let ordering = MatchingRule::default_ordering_name(syntax)
            .and_then(|n| schema.resolve_matching_rule(n).ok())
            .cloned();
        let substring = MatchingRule::default_substrings_name(syntax)
            .and_then(|n| schema.resolve_matching_rule(n).ok())
            .cloned();

        Ok(SchemaAttribute {
            name,
            oid,
            description,
            multivalue,
            operational,
            syntax,
            equality,
            ordering,
            substring,
        })
    }

    /// Check a stored value is of this attribute's syntax family.
    pub fn validate_value(&self, v: &Value) -> Result<(), SchemaError> {
        if v.syntax() == self.syntax {
            Ok(())
        } else {
            Err(SchemaError::InvalidAttributeSyntax(self.name.to_string()))
        }
    }

    pub fn validate_partialvalue(&self, v: &PartialValue) -> Result<(), SchemaError> {
        if v.syntax() == self.syntax {
            Ok(())
        } else {
            Err(SchemaError::InvalidAttributeSyntax(self.name.to_string()))
        }
    }
}

/// An object class definition: which attributes an entry of this class must
/// and may carry.
#[derive(Debug, Clone)]
pub struct SchemaClass {
    pub name: AttrString,
    pub oid: String,
    pub description: String,
    pub kind: ClassKind,
    /// Single superclass; only `top` has none. Multiple inheritance is out
    /// of the supported subset.
    pub sup: Option<AttrString>,
    pub must: Vec<AttrString>,
    pub may: Vec<AttrString>,
}

impl PartialEq for SchemaClass {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name
            && self.oid == other.oid
            && self.kind == other.kind
            && self.sup == other.sup
            && self.must == other.must
            && self.may == other.may
    }
}

impl Eq for SchemaClass {}

impl SchemaClass {
    /// Build a definition from a `classtype` entry under `ou=schema`.
    pub fn try_from(value: &Entry) -> Result<Self, OperationError> {
        let invalid = |attr: &str| {
            OperationError::SchemaViolation(SchemaError::InvalidAttributeSyntax(attr.to_string()))
        };

        if !value.attribute_equality(ATTR_OBJECTCLASS, &PartialValue::new_iutf8(CLASS_CLASS_TYPE)) {
            admin_error!("class {} not present - {}", CLASS_CLASS_TYPE, value.dn());
            return Err(OperationError::SchemaViolation(SchemaError::InvalidClass(
                vec![CLASS_CLASS_TYPE.to_string()],
            )));
        }

        let name = value
            .get_ava_single_iutf8(ATTR_CLASS_NAME)
            .map(AttrString::from)
            .ok_or_else(|| invalid(ATTR_CLASS_NAME))?;
        let oid = value
            .get_ava_single_oid(ATTR_OID)
            .map(str::to_string)
            .ok_or_else(|| invalid(ATTR_OID))?;
        let description = value
            .get_ava_single_utf8(ATTR_DESCRIPTION)
            .unwrap_or_default()
            .to_string();
        let kind = value
            .get_ava_single_iutf8(ATTR_CLASS_KIND)
            .and_then(|k| ClassKind::try_from(k).ok())
            .ok_or_else(|| invalid(ATTR_CLASS_KIND))?;
        let sup = value.get_ava_single_iutf8(ATTR_SUP).map(AttrString::from);
        let must = value
            .get_ava_iter_iutf8(ATTR_MUST)
            .map(|i| i.map(AttrString::from).collect())
            .unwrap_or_default();
        let may = value
            .get_ava_iter_iutf8(ATTR_MAY)
            .map(|i| i.map(AttrString::from).collect())
            .unwrap_or_default();

        Ok(SchemaClass {
            name,
            oid,
            description,
            kind,
            sup,
            must,
            may,
        })
    }
}

/// One registrable schema object.
pub enum SchemaDefinition {
    Attribute(SchemaAttribute),
    Class(SchemaClass),
    MatchingRule(Arc<MatchingRule>),
}

/// The read interface shared by read and write transactions. Lookups accept
/// a name in any casing, or a numeric oid.
pub trait SchemaTransaction {
    fn get_attributes(&self) -> &HashMap<AttrString, Arc<SchemaAttribute>>;
    fn get_classes(&self) -> &HashMap<AttrString, Arc<SchemaClass>>;
    fn get_matching_rules(&self) -> &HashMap<AttrString, Arc<MatchingRule>>;

    fn resolve_attr(&self, name_or_oid: &str) -> Result<&Arc<SchemaAttribute>, SchemaError> {
        let key = attr_fold(name_or_oid);
        self.get_attributes()
            .get(key.as_str())
            .ok_or_else(|| SchemaError::AttributeNotFound(name_or_oid.to_string()))
    }

    fn resolve_class(&self, name_or_oid: &str) -> Result<&Arc<SchemaClass>, SchemaError> {
        let key = attr_fold(name_or_oid);
        self.get_classes()
            .get(key.as_str())
            .ok_or_else(|| SchemaError::ClassNotFound(name_or_oid.to_string()))
    }

    fn resolve_matching_rule(&self, name_or_oid: &str) -> Result<&Arc<MatchingRule>, SchemaError> {
        let key = attr_fold(name_or_oid);
        self.get_matching_rules()
            .get(key.as_str())
            .ok_or_else(|| SchemaError::MatchingRuleNotFound(name_or_oid.to_string()))
    }

    /// The normalisation capability of a rule, for callers that need to
    /// canonicalise assertion text themselves.
    fn get_normalizer(&self, rule: &str) -> Result<Arc<dyn Normalizer>, SchemaError> {
        self.resolve_matching_rule(rule).map(|mr| mr.normalizer())
    }

    fn get_comparator(&self, rule: &str) -> Result<Arc<dyn Comparator>, SchemaError> {
        self.resolve_matching_rule(rule).map(|mr| mr.comparator())
    }

    /// Reflexive, transitive superclass check: is `class` equal to
    /// `ancestor` or derived from it?
    fn is_descendant(&self, class: &str, ancestor: &str) -> Result<bool, SchemaError> {
        let ancestor = self.resolve_class(ancestor)?;
        let mut cur = self.resolve_class(class)?;
        let mut seen = BTreeSet::new();
        loop {
            if cur.oid == ancestor.oid {
                return Ok(true);
            }
            if !seen.insert(cur.oid.clone()) {
                // Cycle. validate() reports it; resolution just terminates.
                return Ok(false);
            }
            match &cur.sup {
                Some(sup) => cur = self.resolve_class(sup)?,
                None => return Ok(false),
            }
        }
    }

    /// Canonical name for an attribute, or the folded input when the
    /// attribute is unknown.
    fn normalise_attr_name(&self, an: &str) -> AttrString {
        match self.resolve_attr(an) {
            Ok(a) => a.name.clone(),
            Err(_) => attr_fold(an),
        }
    }

    fn is_multivalue(&self, attr: &str) -> Result<bool, SchemaError> {
        self.resolve_attr(attr).map(|a| a.multivalue)
    }

    fn is_operational(&self, attr: &str) -> bool {
        self.resolve_attr(attr)
            .map(|a| a.operational)
            .unwrap_or(false)
    }

    /// Build a stored value of `attr`'s syntax from raw protocol text.
    /// Name-syntax values parse and normalise through this same snapshot.
    fn value_from_raw(&self, attr: &SchemaAttribute, raw: &str) -> Result<Value, OperationError> {
        let invalid = || {
            OperationError::SchemaViolation(SchemaError::InvalidAttributeSyntax(
                attr.name.to_string(),
            ))
        };
        match attr.syntax {
            SyntaxType::DistinguishedName => {
                let dn = Dn::parse(raw, self).map_err(|_| invalid())?;
                if dn.is_root() {
                    return Err(invalid());
                }
                Ok(Value::new_dn(dn.norm().to_string()))
            }
            syntax => Value::from_raw(syntax, raw).map_err(|_| invalid()),
        }
    }

    /// As [`value_from_raw`](Self::value_from_raw), for assertion values.
    fn partial_value_from_raw(
        &self,
        attr: &SchemaAttribute,
        raw: &str,
    ) -> Result<PartialValue, OperationError> {
        let invalid = || {
            OperationError::SchemaViolation(SchemaError::InvalidAttributeSyntax(
                attr.name.to_string(),
            ))
        };
        match attr.syntax {
            SyntaxType::DistinguishedName => {
                let dn = Dn::parse(raw, self).map_err(|_| invalid())?;
                if dn.is_root() {
                    return Err(invalid());
                }
                Ok(PartialValue::new_dn(dn.norm().to_string()))
            }
            syntax => PartialValue::from_raw(syntax, raw).map_err(|_| invalid()),
        }
    }

    /// Consistency sweep over the working set: superclass chains resolve
    /// without cycles, must/may lists resolve, oids are unique.
    fn validate(&self) -> Vec<Result<(), ConsistencyError>> {
        let mut res = Vec::new();

        let mut seen_oids: HashMap<String, usize> = HashMap::new();
        let mut attr_oids = BTreeSet::new();
        for a in self.get_attributes().values() {
            if attr_oids.insert(a.oid.as_str()) {
                *seen_oids.entry(a.oid.clone()).or_insert(0) += 1;
            }
        }
        let mut class_oids = BTreeSet::new();
        for c in self.get_classes().values() {
            if class_oids.insert(c.oid.as_str()) {
                *seen_oids.entry(c.oid.clone()).or_insert(0) += 1;
            }
        }
        let mut rule_oids = BTreeSet::new();
        for mr in self.get_matching_rules().values() {
            if rule_oids.insert(mr.oid.as_str()) {
                *seen_oids.entry(mr.oid.clone()).or_insert(0) += 1;
            }
        }
        for (oid, n) in seen_oids.iter() {
            if *n > 1 {
                res.push(Err(ConsistencyError::SchemaOidNotUnique(oid.clone())));
            }
        }

        let mut checked = BTreeSet::new();
        for c in self.get_classes().values() {
            if !checked.insert(c.oid.as_str()) {
                // Each def appears under both its alias keys.
                continue;
            }
            for attr in c.must.iter().chain(c.may.iter()) {
                if self.resolve_attr(attr).is_err() {
                    res.push(Err(ConsistencyError::SchemaClassMissingAttribute(
                        c.name.to_string(),
                        attr.to_string(),
                    )));
                }
            }
            if let Some(sup) = &c.sup {
                match self.is_descendant(&c.name, CLASS_TOP) {
                    Ok(true) => {}
                    // Broken or cyclic superclass chain.
                    _ => res.push(Err(ConsistencyError::SchemaClassMissingClass(
                        c.name.to_string(),
                        sup.to_string(),
                    ))),
                }
            }
        }

        res
    }
}

/// A writable transaction over the working schema set. Commit publishes the
/// new snapshot atomically; in-flight readers keep the snapshot they took.
pub struct SchemaWriteTransaction<'a> {
    attributes: CowCellWriteTxn<'a, HashMap<AttrString, Arc<SchemaAttribute>>>,
    classes: CowCellWriteTxn<'a, HashMap<AttrString, Arc<SchemaClass>>>,
    matching_rules: CowCellWriteTxn<'a, HashMap<AttrString, Arc<MatchingRule>>>,
}

/// A readonly snapshot of the working schema set.
pub struct SchemaReadTransaction {
    attributes: CowCellReadTxn<HashMap<AttrString, Arc<SchemaAttribute>>>,
    classes: CowCellReadTxn<HashMap<AttrString, Arc<SchemaClass>>>,
    matching_rules: CowCellReadTxn<HashMap<AttrString, Arc<MatchingRule>>>,
}

impl SchemaTransaction for SchemaWriteTransaction<'_> {
    fn get_attributes(&self) -> &HashMap<AttrString, Arc<SchemaAttribute>> {
        &self.attributes
    }

    fn get_classes(&self) -> &HashMap<AttrString, Arc<SchemaClass>> {
        &self.classes
    }

    fn get_matching_rules(&self) -> &HashMap<AttrString, Arc<MatchingRule>> {
        &self.matching_rules
    }
}

impl SchemaTransaction for SchemaReadTransaction {
    fn get_attributes(&self) -> &HashMap<AttrString, Arc<SchemaAttribute>> {
        &self.attributes
    }

    fn get_classes(&self) -> &HashMap<AttrString, Arc<SchemaClass>> {
        &self.classes
    }

    fn get_matching_rules(&self) -> &HashMap<AttrString, Arc<MatchingRule>> {
        &self.matching_rules
    }
}

impl<'a> SchemaWriteTransaction<'a> {
    pub fn commit(self) -> Result<(), OperationError> {
        let SchemaWriteTransaction {
            attributes,
            classes,
            matching_rules,
        } = self;
        matching_rules.commit();
        attributes.commit();
        classes.commit();
        Ok(())
    }

    /// Register an attribute definition. `DuplicateOid` when the oid or the
    /// name is already bound to a different definition; re-registering an
    /// identical definition is an accepted no-op.
    pub fn register_attribute(&mut self, attr: SchemaAttribute) -> Result<(), SchemaError> {
        if let Some(existing) = self.attributes.get(attr.oid.as_str()) {
            return if **existing == attr {
                Ok(())
            } else {
                Err(SchemaError::DuplicateOid(attr.oid.clone()))
            };
        }
        if self.classes.contains_key(attr.oid.as_str())
            || self.matching_rules.contains_key(attr.oid.as_str())
        {
            return Err(SchemaError::DuplicateOid(attr.oid.clone()));
        }
        if let Some(existing) = self.attributes.get(attr.name.as_str()) {
            if existing.oid != attr.oid {
                return Err(SchemaError::DuplicateOid(attr.name.to_string()));
            }
        }
        let attr = Arc::new(attr);
        self.attributes
            .insert(AttrString::from(attr.oid.as_str()), attr.clone());
        self.attributes.insert(attr.name.clone(), attr);
        Ok(())
    }

    pub fn register_class(&mut self, class: SchemaClass) -> Result<(), SchemaError> {
        if let Some(existing) = self.classes.get(class.oid.as_str()) {
            return if **existing == class {
                Ok(())
            } else {
                Err(SchemaError::DuplicateOid(class.oid.clone()))
            };
        }
        if self.attributes.contains_key(class.oid.as_str())
            || self.matching_rules.contains_key(class.oid.as_str())
        {
            return Err(SchemaError::DuplicateOid(class.oid.clone()));
        }
        if let Some(existing) = self.classes.get(class.name.as_str()) {
            if existing.oid != class.oid {
                return Err(SchemaError::DuplicateOid(class.name.to_string()));
            }
        }
        let class = Arc::new(class);
        self.classes
            .insert(AttrString::from(class.oid.as_str()), class.clone());
        self.classes.insert(class.name.clone(), class);
        Ok(())
    }

    pub fn register_matching_rule(&mut self, rule: Arc<MatchingRule>) -> Result<(), SchemaError> {
        if let Some(existing) = self.matching_rules.get(rule.oid.as_str()) {
            return if **existing == *rule {
                Ok(())
            } else {
                Err(SchemaError::DuplicateOid(rule.oid.clone()))
            };
        }
        if self.attributes.contains_key(rule.oid.as_str())
            || self.classes.contains_key(rule.oid.as_str())
        {
            return Err(SchemaError::DuplicateOid(rule.oid.clone()));
        }
        if let Some(existing) = self.matching_rules.get(rule.name.as_str()) {
            if existing.oid != rule.oid {
                return Err(SchemaError::DuplicateOid(rule.name.to_string()));
            }
        }
        self.matching_rules
            .insert(AttrString::from(rule.oid.as_str()), rule.clone());
        self.matching_rules.insert(rule.name.clone(), rule);
        Ok(())
    }

    pub fn register(&mut self, def: SchemaDefinition) -> Result<(), SchemaError> {
        match def {
            SchemaDefinition::Attribute(a) => self.register_attribute(a),
            SchemaDefinition::Class(c) => self.register_class(c),
            SchemaDefinition::MatchingRule(mr) => self.register_matching_rule(mr),
        }
    }

    fn bootstrap_rule(&self, name: &str) -> Result<Arc<MatchingRule>, OperationError> {
        self.matching_rules
            .get(name)
            .cloned()
            .ok_or(OperationError::InvalidState)
    }

    fn bootstrap_attr(
        &mut self,
        name: &str,
        oid: &str,
        description: &str,
        multivalue: bool,
        operational: bool,
        syntax: SyntaxType,
    ) -> Result<(), OperationError> {
        let equality = self.bootstrap_rule(MatchingRule::default_equality_name(syntax))?;
        let ordering = MatchingRule::default_ordering_name(syntax)
            .map(|n| self.bootstrap_rule(n))
            .transpose()?;
        let substring = MatchingRule::default_substrings_name(syntax)
            .map(|n| self.bootstrap_rule(n))
            .transpose()?;
        self.register_attribute(SchemaAttribute {
            name: AttrString::from(name),
            oid: oid.to_string(),
            description: description.to_string(),
            multivalue,
            operational,
            syntax,
            equality,
            ordering,
            substring,
        })
        .map_err(OperationError::SchemaViolation)
    }

    fn bootstrap_class(
        &mut self,
        name: &str,
        oid: &str,
        description: &str,
        kind: ClassKind,
        sup: Option<&str>,
        must: &[&str],
        may: &[&str],
    ) -> Result<(), OperationError> {
        self.register_class(SchemaClass {
            name: AttrString::from(name),
            oid: oid.to_string(),
            description: description.to_string(),
            kind,
            sup: sup.map(AttrString::from),
            must: must.iter().map(|a| AttrString::from(*a)).collect(),
            may: may.iter().map(|a| AttrString::from(*a)).collect(),
        })
        .map_err(OperationError::SchemaViolation)
    }

    /// Bootstrap in the definitions of our own core schema. The system
    /// partition is the system of record for these; the working set is
    /// rebuilt from it on reload.
    pub fn generate_in_memory(&mut self) -> Result<(), OperationError> {
        self.attributes.clear();
        self.classes.clear();
        self.matching_rules.clear();

        for mr in MatchingRule::well_known() {
            self.register_matching_rule(mr)
                .map_err(OperationError::SchemaViolation)?;
        }

        // Core attribute types.
        self.bootstrap_attr(
            ATTR_OBJECTCLASS,
            OID_ATTR_OBJECTCLASS,
            "The set of classes defining an object",
            true,
            false,
            SyntaxType::Utf8StringInsensitive,
        )?;
        self.bootstrap_attr(
            ATTR_OU,
            OID_ATTR_OU,
            "The name of an organizational unit",
            true,
            false,
            SyntaxType::Utf8StringInsensitive,
        )?;
        self.bootstrap_attr(
            ATTR_O,
            OID_ATTR_O,
            "The name of an organization",
            true,
            false,
            SyntaxType::Utf8StringInsensitive,
        )?;
        self.bootstrap_attr(
            ATTR_CN,
            OID_ATTR_CN,
            "The common name of an object",
            true,
            false,
            SyntaxType::Utf8StringInsensitive,
        )?;
        self.bootstrap_attr(
            ATTR_SN,
            OID_ATTR_SN,
            "The surname of a person",
            true,
            false,
            SyntaxType::Utf8StringInsensitive,
        )?;
        self.bootstrap_attr(
            ATTR_UID,
            OID_ATTR_UID,
            "A user shortname or login id",
            true,
            false,
            SyntaxType::Utf8StringInsensitive,
        )?;
        self.bootstrap_attr(
            ATTR_DC,
            OID_ATTR_DC,
            "A domain component",
            false,
            false,
            SyntaxType::Utf8StringInsensitive,
        )?;
        self.bootstrap_attr(
            ATTR_DESCRIPTION,
            OID_ATTR_DESCRIPTION,
            "A freetext description of the object",
            true,
            false,
            SyntaxType::Utf8String,
        )?;
        self.bootstrap_attr(
            ATTR_DISPLAY_NAME,
            OID_ATTR_DISPLAYNAME,
            "The preferred display name",
            false,
            false,
            SyntaxType::Utf8String,
        )?;
        self.bootstrap_attr(
            ATTR_GIVEN_NAME,
            OID_ATTR_GIVENNAME,
            "The given name of a person",
            true,
            false,
            SyntaxType::Utf8StringInsensitive,
        )?;
        self.bootstrap_attr(
            ATTR_MAIL,
            OID_ATTR_MAIL,
            "A mail address",
            true,
            false,
            SyntaxType::Utf8StringInsensitive,
        )?;
        self.bootstrap_attr(
            ATTR_TELEPHONE_NUMBER,
            OID_ATTR_TELEPHONENUMBER,
            "A telephone number",
            true,
            false,
            SyntaxType::Utf8StringInsensitive,
        )?;
        self.bootstrap_attr(
            ATTR_MEMBER,
            OID_ATTR_MEMBER,
            "The members of a group, by name",
            true,
            false,
            SyntaxType::DistinguishedName,
        )?;
        self.bootstrap_attr(
            ATTR_SEE_ALSO,
            OID_ATTR_SEEALSO,
            "A reference to a related object",
            true,
            false,
            SyntaxType::DistinguishedName,
        )?;
        self.bootstrap_attr(
            ATTR_USER_PASSWORD,
            OID_ATTR_USERPASSWORD,
            "The credential used by simple binds",
            false,
            false,
            SyntaxType::SecretUtf8String,
        )?;

        // Operational attributes, stamped by the server on every write.
        self.bootstrap_attr(
            ATTR_CREATE_TIMESTAMP,
            OID_ATTR_CREATETIMESTAMP,
            "The time the entry was created",
            false,
            true,
            SyntaxType::GeneralizedTime,
        )?;
        self.bootstrap_attr(
            ATTR_MODIFY_TIMESTAMP,
            OID_ATTR_MODIFYTIMESTAMP,
            "The time the entry was last changed",
            false,
            true,
            SyntaxType::GeneralizedTime,
        )?;
        self.bootstrap_attr(
            ATTR_CREATORS_NAME,
            OID_ATTR_CREATORSNAME,
            "The name of the identity that created the entry",
            false,
            true,
            SyntaxType::DistinguishedName,
        )?;
        self.bootstrap_attr(
            ATTR_MODIFIERS_NAME,
            OID_ATTR_MODIFIERSNAME,
            "The name of the identity that last changed the entry",
            false,
            true,
            SyntaxType::DistinguishedName,
        )?;
        self.bootstrap_attr(
            ATTR_ENTRY_UUID,
            OID_ATTR_ENTRYUUID,
            "The universal unique id of the entry",
            false,
            true,
            SyntaxType::Uuid,
        )?;
        self.bootstrap_attr(
            ATTR_ENTRY_CSN,
            OID_ATTR_ENTRYCSN,
            "The change sequence number of the last write to the entry",
            false,
            true,
            SyntaxType::Csn,
        )?;

        // Administrative model.
        self.bootstrap_attr(
            ATTR_ADMINISTRATIVE_ROLE,
            OID_ATTR_ADMINISTRATIVEROLE,
            "Marks the entry as an administrative point",
            true,
            true,
            SyntaxType::Utf8StringInsensitive,
        )?;
        self.bootstrap_attr(
            ATTR_SUBTREE_SPECIFICATION,
            OID_ATTR_SUBTREESPECIFICATION,
            "The scope of a subentry within its administrative area",
            false,
            true,
            SyntaxType::Utf8String,
        )?;
        self.bootstrap_attr(
            ATTR_PRESCRIPTIVE_ACI,
            OID_ATTR_PRESCRIPTIVEACI,
            "An access control item prescribed over an administrative area",
            true,
            true,
            SyntaxType::AciItem,
        )?;

        // Schema definition entries describe themselves with these.
        self.bootstrap_attr(
            ATTR_ATTRIBUTE_NAME,
            OID_ATTR_ATTRIBUTENAME,
            "The canonical name of an attribute type definition",
            false,
            false,
            SyntaxType::Utf8StringInsensitive,
        )?;
        self.bootstrap_attr(
            ATTR_CLASS_NAME,
            OID_ATTR_CLASSNAME,
            "The canonical name of a class definition",
            false,
            false,
            SyntaxType::Utf8StringInsensitive,
        )?;
        self.bootstrap_attr(
            ATTR_OID,
            OID_ATTR_SCHEMA_OID,
            "The oid of a schema definition",
            false,
            false,
            SyntaxType::Oid,
        )?;
        self.bootstrap_attr(
            ATTR_SYNTAX,
            OID_ATTR_SYNTAX,
            "The value syntax of an attribute type definition",
            false,
            false,
            SyntaxType::SyntaxId,
        )?;
        self.bootstrap_attr(
            ATTR_MULTIVALUE,
            OID_ATTR_MULTIVALUE,
            "Whether an attribute type holds more than one value",
            false,
            false,
            SyntaxType::Boolean,
        )?;
        self.bootstrap_attr(
            ATTR_OPERATIONAL,
            OID_ATTR_OPERATIONAL,
            "Whether an attribute type is maintained by the server",
            false,
            false,
            SyntaxType::Boolean,
        )?;
        self.bootstrap_attr(
            ATTR_EQUALITY,
            OID_ATTR_EQUALITY,
            "The equality matching rule bound to an attribute type",
            false,
            false,
            SyntaxType::Utf8StringInsensitive,
        )?;
        self.bootstrap_attr(
            ATTR_SUP,
            OID_ATTR_SUP,
            "The superclass of a class definition",
            false,
            false,
            SyntaxType::Utf8StringInsensitive,
        )?;
        self.bootstrap_attr(
            ATTR_MUST,
            OID_ATTR_MUST,
            "The attributes an entry of this class must carry",
            true,
            false,
            SyntaxType::Utf8StringInsensitive,
        )?;
        self.bootstrap_attr(
            ATTR_MAY,
            OID_ATTR_MAY,
            "The attributes an entry of this class may carry",
            true,
            false,
            SyntaxType::Utf8StringInsensitive,
        )?;
        self.bootstrap_attr(
            ATTR_CLASS_KIND,
            OID_ATTR_CLASSKIND,
            "Whether a class is abstract, structural or auxiliary",
            false,
            false,
            SyntaxType::Utf8StringInsensitive,
        )?;

        // Core classes.
        self.bootstrap_class(
            CLASS_TOP,
            OID_CLASS_TOP,
            "The root of the class hierarchy",
            ClassKind::Abstract,
            None,
            &[ATTR_OBJECTCLASS],
            &[],
        )?;
        self.bootstrap_class(
            CLASS_ORGANIZATIONAL_UNIT,
            OID_CLASS_ORGANIZATIONALUNIT,
            "An organizational unit container",
            ClassKind::Structural,
            Some(CLASS_TOP),
            &[ATTR_OU],
            &[ATTR_DESCRIPTION, ATTR_SEE_ALSO, ATTR_TELEPHONE_NUMBER],
        )?;
        self.bootstrap_class(
            CLASS_ORGANIZATION,
            OID_CLASS_ORGANIZATION,
            "An organization",
            ClassKind::Structural,
            Some(CLASS_TOP),
            &[ATTR_O],
            &[ATTR_DESCRIPTION, ATTR_SEE_ALSO, ATTR_TELEPHONE_NUMBER],
        )?;
        self.bootstrap_class(
            CLASS_DOMAIN,
            OID_CLASS_DOMAIN,
            "A domain component object",
            ClassKind::Structural,
            Some(CLASS_TOP),
            &[ATTR_DC],
            &[ATTR_DESCRIPTION, ATTR_O, ATTR_SEE_ALSO],
        )?;
        self.bootstrap_class(
            CLASS_PERSON,
            OID_CLASS_PERSON,
            "A person",
            ClassKind::Structural,
            Some(CLASS_TOP),
            &[ATTR_CN, ATTR_SN],
            &[
                ATTR_DESCRIPTION,
                ATTR_SEE_ALSO,
                ATTR_TELEPHONE_NUMBER,
                ATTR_USER_PASSWORD,
            ],
        )?;
        self.bootstrap_class(
            CLASS_ORGANIZATIONAL_PERSON,
            OID_CLASS_ORGANIZATIONALPERSON,
            "A person within an organization",
            ClassKind::Structural,
            Some(CLASS_PERSON),
            &[],
            &[ATTR_OU],
        )?;
        self.bootstrap_class(
            CLASS_INET_ORG_PERSON,
            OID_CLASS_INETORGPERSON,
            "A person on a network",
            ClassKind::Structural,
            Some(CLASS_ORGANIZATIONAL_PERSON),
            &[],
            &[ATTR_DISPLAY_NAME, ATTR_GIVEN_NAME, ATTR_MAIL, ATTR_UID],
        )?;
        self.bootstrap_class(
            CLASS_GROUP_OF_NAMES,
            OID_CLASS_GROUPOFNAMES,
            "A named group of objects",
            ClassKind::Structural,
            Some(CLASS_TOP),
            &[ATTR_CN, ATTR_MEMBER],
            &[ATTR_DESCRIPTION, ATTR_O, ATTR_OU, ATTR_SEE_ALSO],
        )?;
        self.bootstrap_class(
            CLASS_ACCOUNT,
            OID_CLASS_ACCOUNT,
            "A login account",
            ClassKind::Structural,
            Some(CLASS_TOP),
            &[ATTR_UID],
            &[
                ATTR_DESCRIPTION,
                ATTR_O,
                ATTR_OU,
                ATTR_SEE_ALSO,
                ATTR_USER_PASSWORD,
            ],
        )?;
        self.bootstrap_class(
            CLASS_SUBENTRY,
            OID_CLASS_SUBENTRY,
            "An administrative subentry",
            ClassKind::Structural,
            Some(CLASS_TOP),
            &[ATTR_CN],
            &[ATTR_DESCRIPTION, ATTR_SUBTREE_SPECIFICATION],
        )?;
        self.bootstrap_class(
            CLASS_ACCESS_CONTROL_SUBENTRY,
            OID_CLASS_ACCESSCONTROLSUBENTRY,
            "A subentry prescribing access controls",
            ClassKind::Auxiliary,
            Some(CLASS_TOP),
            &[],
            &[ATTR_PRESCRIPTIVE_ACI],
        )?;
        self.bootstrap_class(
            CLASS_EXTENSIBLE_OBJECT,
            OID_CLASS_EXTENSIBLEOBJECT,
            "Permits any user attribute",
            ClassKind::Auxiliary,
            Some(CLASS_TOP),
            &[],
            &[],
        )?;
        self.bootstrap_class(
            CLASS_ATTRIBUTE_TYPE,
            OID_CLASS_ATTRIBUTETYPE,
            "An attribute type definition",
            ClassKind::Structural,
            Some(CLASS_TOP),
            &[
                ATTR_ATTRIBUTE_NAME,
                ATTR_OID,
                ATTR_SYNTAX,
                ATTR_MULTIVALUE,
                ATTR_OPERATIONAL,
            ],
            &[ATTR_DESCRIPTION, ATTR_EQUALITY],
        )?;
        self.bootstrap_class(
            CLASS_CLASS_TYPE,
            OID_CLASS_CLASSTYPE,
            "A class definition",
            ClassKind::Structural,
            Some(CLASS_TOP),
            &[ATTR_CLASS_NAME, ATTR_OID, ATTR_CLASS_KIND],
            &[ATTR_DESCRIPTION, ATTR_SUP, ATTR_MUST, ATTR_MAY],
        )?;

        Ok(())
    }

    /// Render the working set as entries for `ou=schema` in the system
    /// partition.
    pub fn to_entries(&self) -> Result<Vec<Entry>, OperationError> {
        let mut out = Vec::new();

        let mut seen = BTreeSet::new();
        for attr in self.attributes.values() {
            if !seen.insert(attr.oid.clone()) {
                continue;
            }
            let dn = Dn::parse(
                &format!("{}={},{}", ATTR_ATTRIBUTE_NAME, attr.name, DN_SCHEMA),
                self,
            )?;
            let mut e = Entry::new(dn);
            e.add_ava(ATTR_OBJECTCLASS, Value::new_iutf8(CLASS_TOP))?;
            e.add_ava(ATTR_OBJECTCLASS, Value::new_iutf8(CLASS_ATTRIBUTE_TYPE))?;
            e.add_ava(ATTR_ATTRIBUTE_NAME, Value::new_iutf8(&attr.name))?;
            e.add_ava(ATTR_OID, Value::new_oid(&attr.oid))?;
            e.add_ava(ATTR_SYNTAX, Value::new_syntax(attr.syntax))?;
            e.add_ava(ATTR_MULTIVALUE, Value::new_bool(attr.multivalue))?;
            e.add_ava(ATTR_OPERATIONAL, Value::new_bool(attr.operational))?;
            e.add_ava(ATTR_EQUALITY, Value::new_iutf8(&attr.equality.name))?;
            if !attr.description.is_empty() {
                e.add_ava(ATTR_DESCRIPTION, Value::new_utf8s(&attr.description))?;
            }
            out.push(e);
        }

        let mut seen = BTreeSet::new();
        for class in self.classes.values() {
            if !seen.insert(class.oid.clone()) {
                continue;
            }
            let dn = Dn::parse(
                &format!("{}={},{}", ATTR_CLASS_NAME, class.name, DN_SCHEMA),
                self,
            )?;
            let mut e = Entry::new(dn);
            e.add_ava(ATTR_OBJECTCLASS, Value::new_iutf8(CLASS_TOP))?;
            e.add_ava(ATTR_OBJECTCLASS, Value::new_iutf8(CLASS_CLASS_TYPE))?;
            e.add_ava(ATTR_CLASS_NAME, Value::new_iutf8(&class.name))?;
            e.add_ava(ATTR_OID, Value::new_oid(&class.oid))?;
            e.add_ava(ATTR_CLASS_KIND, Value::new_iutf8(&class.kind.to_string()))?;
            if let Some(sup) = &class.sup {
                e.add_ava(ATTR_SUP, Value::new_iutf8(sup))?;
            }
            for attr in &class.must {
                e.add_ava(ATTR_MUST, Value::new_iutf8(attr))?;
            }
            for attr in &class.may {
                e.add_ava(ATTR_MAY, Value::new_iutf8(attr))?;
            }
            if !class.description.is_empty() {
                e.add_ava(ATTR_DESCRIPTION, Value::new_utf8s(&class.description))?;
            }
            out.push(e);
        }

        out.sort_by(|a, b| a.dn().cmp(b.dn()));
        Ok(out)
    }
}

/// The schema registry. All access is through transactions.
pub struct Schema {
    attributes: CowCell<HashMap<AttrString, Arc<SchemaAttribute>>>,
    classes: CowCell<HashMap<AttrString, Arc<SchemaClass>>>,
    matching_rules: CowCell<HashMap<AttrString, Arc<MatchingRule>>>,
}

impl Schema {
    pub fn new() -> Result<Self, OperationError> {
        let s = Schema {
            attributes: CowCell::new(HashMap::with_capacity(128)),
            classes: CowCell::new(HashMap::with_capacity(64)),
            matching_rules: CowCell::new(HashMap::with_capacity(32)),
        };
        let mut sw = s.write();
        sw.generate_in_memory()?;
        sw.commit()?;
        Ok(s)
    }

    pub fn read(&self) -> SchemaReadTransaction {
        SchemaReadTransaction {
            attributes: self.attributes.read(),
            classes: self.classes.read(),
            matching_rules: self.matching_rules.read(),
        }
    }

    pub fn write(&self) -> SchemaWriteTransaction<'_> {
        SchemaWriteTransaction {
            attributes: self.attributes.write(),
            classes: self.classes.write(),
            matching_rules: self.matching_rules.write(),
        }
    }
}
