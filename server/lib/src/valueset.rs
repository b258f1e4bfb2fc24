//! The set container behind every attribute of an entry. Each set is typed
//! by its syntax family so that insert and membership work on normalized
//! identity, keeping duplicate values out regardless of the input casing.

use std::collections::BTreeSet;

use atrium_proto::OperationError;
use smolset::SmolSet;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::repl::csn::Csn;
use crate::value::{PartialValue, SyntaxType, Value};

#[derive(Debug, Clone)]
enum I {
    Utf8(BTreeSet<String>),
    Iutf8(BTreeSet<String>),
    Dn(BTreeSet<String>),
    Integer(BTreeSet<i64>),
    Bool(SmolSet<[bool; 1]>),
    Oid(BTreeSet<String>),
    DateTime(SmolSet<[OffsetDateTime; 1]>),
    Csn(SmolSet<[Csn; 1]>),
    Uuid(SmolSet<[Uuid; 1]>),
    Secret(SmolSet<[String; 1]>),
    Aci(BTreeSet<String>),
    Syntax(SmolSet<[SyntaxType; 1]>),
}

#[derive(Debug, Clone)]
pub struct ValueSet {
    inner: I,
}

// SmolSet backed variants compare by membership, not storage order.
macro_rules! eqsets {
    ($a:expr, $b:expr) => {
        $a.len() == $b.len() && $a.iter().all(|v| $b.contains(v))
    };
}

impl PartialEq for ValueSet {
    fn eq(&self, other: &Self) -> bool {
        match (&self.inner, &other.inner) {
            (I::Utf8(a), I::Utf8(b)) => a == b,
            (I::Iutf8(a), I::Iutf8(b)) => a == b,
            (I::Dn(a), I::Dn(b)) => a == b,
            (I::Integer(a), I::Integer(b)) => a == b,
            (I::Bool(a), I::Bool(b)) => eqsets!(a, b),
            (I::Oid(a), I::Oid(b)) => a == b,
            (I::DateTime(a), I::DateTime(b)) => eqsets!(a, b),
            (I::Csn(a), I::Csn(b)) => eqsets!(a, b),
            (I::Uuid(a), I::Uuid(b)) => eqsets!(a, b),
            (I::Secret(a), I::Secret(b)) => eqsets!(a, b),
            (I::Aci(a), I::Aci(b)) => a == b,
            (I::Syntax(a), I::Syntax(b)) => eqsets!(a, b),
            _ => false,
        }
    }
}

impl Eq for ValueSet {}

macro_rules! mergesets {
    ($a:expr, $b:expr) => {{
        $b.iter().for_each(|v| {
            $a.insert(v.clone());
        });
        Ok(())
    }};
}

impl ValueSet {
    pub fn new(value: Value) -> Self {
        ValueSet {
            inner: match value {
                Value::Utf8(s) => I::Utf8(btreeset![s]),
                Value::Iutf8(s) => I::Iutf8(btreeset![s]),
                Value::Dn(s) => I::Dn(btreeset![s]),
                Value::Integer(i) => I::Integer(btreeset![i]),
                Value::Bool(b) => I::Bool(smolset![b]),
                Value::Oid(s) => I::Oid(btreeset![s]),
                Value::DateTime(odt) => I::DateTime(smolset![odt]),
                Value::Csn(c) => I::Csn(smolset![c]),
                Value::Uuid(u) => I::Uuid(smolset![u]),
                Value::Secret(s) => I::Secret(smolset![s]),
                Value::Aci(s) => I::Aci(btreeset![s]),
                Value::Syntax(s) => I::Syntax(smolset![s]),
            },
        }
    }

    /// Insert a value of the same syntax family. Idempotent: inserting a
    /// value already present returns `Ok(false)`. A value of a different
    /// family is a caller bug surfaced as `InvalidState`.
    pub fn insert_checked(&mut self, value: Value) -> Result<bool, OperationError> {
        match (&mut self.inner, value) {
            (I::Utf8(set), Value::Utf8(s)) => Ok(set.insert(s)),
            (I::Iutf8(set), Value::Iutf8(s)) => Ok(set.insert(s)),
            (I::Dn(set), Value::Dn(s)) => Ok(set.insert(s)),
            (I::Integer(set), Value::Integer(i)) => Ok(set.insert(i)),
            (I::Bool(set), Value::Bool(b)) => Ok(set.insert(b)),
            (I::Oid(set), Value::Oid(s)) => Ok(set.insert(s)),
            (I::DateTime(set), Value::DateTime(odt)) => Ok(set.insert(odt)),
            (I::Csn(set), Value::Csn(c)) => Ok(set.insert(c)),
            (I::Uuid(set), Value::Uuid(u)) => Ok(set.insert(u)),
            (I::Secret(set), Value::Secret(s)) => Ok(set.insert(s)),
            (I::Aci(set), Value::Aci(s)) => Ok(set.insert(s)),
            (I::Syntax(set), Value::Syntax(s)) => Ok(set.insert(s)),
            _ => Err(OperationError::InvalidState),
        }
    }

    pub fn merge(&mut self, other: &ValueSet) -> Result<(), OperationError> {
        match (&mut self.inner, &other.inner) {
            (I::Utf8(a), I::Utf8(b)) => mergesets!(a, b),
            (I::Iutf8(a), I::Iutf8(b)) => mergesets!(a, b),
            (I::Dn(a), I::Dn(b)) => mergesets!(a, b),
            (I::Integer(a), I::Integer(b)) => mergesets!(a, b),
            (I::Bool(a), I::Bool(b)) => mergesets!(a, b),
            (I::Oid(a), I::Oid(b)) => mergesets!(a, b),
            (I::DateTime(a), I::DateTime(b)) => mergesets!(a, b),
            (I::Csn(a), I::Csn(b)) => mergesets!(a, b),
            (I::Uuid(a), I::Uuid(b)) => mergesets!(a, b),
            (I::Secret(a), I::Secret(b)) => mergesets!(a, b),
            (I::Aci(a), I::Aci(b)) => mergesets!(a, b),
            (I::Syntax(a), I::Syntax(b)) => mergesets!(a, b),
            _ => Err(OperationError::InvalidState),
        }
    }

    pub fn contains(&self, pv: &PartialValue) -> bool {
        match (&self.inner, pv) {
            (I::Utf8(set), PartialValue::Utf8(s)) => set.contains(s),
            (I::Iutf8(set), PartialValue::Iutf8(s)) => set.contains(s),
            (I::Dn(set), PartialValue::Dn(s)) => set.contains(s),
            (I::Integer(set), PartialValue::Integer(i)) => set.contains(i),
            (I::Bool(set), PartialValue::Bool(b)) => set.contains(b),
            (I::Oid(set), PartialValue::Oid(s)) => set.contains(s),
            (I::DateTime(set), PartialValue::DateTime(odt)) => set.contains(odt),
            (I::Csn(set), PartialValue::Csn(c)) => set.contains(c),
            (I::Uuid(set), PartialValue::Uuid(u)) => set.contains(u),
            (I::Secret(set), PartialValue::Secret(s)) => set.contains(s),
            (I::Aci(set), PartialValue::Aci(s)) => set.contains(s),
            (I::Syntax(set), PartialValue::Syntax(s)) => set.contains(s),
            _ => false,
        }
    }

    pub fn remove(&mut self, pv: &PartialValue) -> bool {
        match (&mut self.inner, pv) {
            (I::Utf8(set), PartialValue::Utf8(s)) => set.remove(s),
            (I::Iutf8(set), PartialValue::Iutf8(s)) => set.remove(s),
            (I::Dn(set), PartialValue::Dn(s)) => set.remove(s),
            (I::Integer(set), PartialValue::Integer(i)) => set.remove(i),
            (I::Bool(set), PartialValue::Bool(b)) => set.remove(b),
            (I::Oid(set), PartialValue::Oid(s)) => set.remove(s),
            (I::DateTime(set), PartialValue::DateTime(odt)) => set.remove(odt),
            (I::Csn(set), PartialValue::Csn(c)) => set.remove(c),
            (I::Uuid(set), PartialValue::Uuid(u)) => set.remove(u),
            (I::Secret(set), PartialValue::Secret(s)) => set.remove(s),
            (I::Aci(set), PartialValue::Aci(s)) => set.remove(s),
            (I::Syntax(set), PartialValue::Syntax(s)) => set.remove(s),
            _ => false,
        }
    }

    pub fn len(&self) -> usize {
        match &self.inner {
            I::Utf8(set) => set.len(),
            I::Iutf8(set) => set.len(),
            I::Dn(set) => set.len(),
            I::Integer(set) => set.len(),
            I::Bool(set) => set.len(),
            I::Oid(set) => set.len(),
            I::DateTime(set) => set.len(),
            I::Csn(set) => set.len(),
            I::Uuid(set) => set.len(),
            I::Secret(set) => set.len(),
            I::Aci(set) => set.len(),
            I::Syntax(set) => set.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn syntax(&self) -> SyntaxType {
        match &self.inner {
            I::Utf8(_) => SyntaxType::Utf8String,
            I::Iutf8(_) => SyntaxType::Utf8StringInsensitive,
            I::Dn(_) => SyntaxType::DistinguishedName,
            I::Integer(_) => SyntaxType::Integer,
            I::Bool(_) => SyntaxType::Boolean,
            I::Oid(_) => SyntaxType::Oid,
            I::DateTime(_) => SyntaxType::GeneralizedTime,
            I::Csn(_) => SyntaxType::Csn,
            I::Uuid(_) => SyntaxType::Uuid,
            I::Secret(_) => SyntaxType::SecretUtf8String,
            I::Aci(_) => SyntaxType::AciItem,
            I::Syntax(_) => SyntaxType::SyntaxId,
        }
    }

    pub fn to_value_iter(&self) -> Box<dyn Iterator<Item = Value> + '_> {
        match &self.inner {
            I::Utf8(set) => Box::new(set.iter().cloned().map(Value::Utf8)),
            I::Iutf8(set) => Box::new(set.iter().cloned().map(Value::Iutf8)),
            I::Dn(set) => Box::new(set.iter().cloned().map(Value::Dn)),
            I::Integer(set) => Box::new(set.iter().copied().map(Value::Integer)),
            I::Bool(set) => Box::new(set.iter().copied().map(Value::Bool)),
            I::Oid(set) => Box::new(set.iter().cloned().map(Value::Oid)),
            I::DateTime(set) => Box::new(set.iter().copied().map(Value::DateTime)),
            I::Csn(set) => Box::new(set.iter().copied().map(Value::Csn)),
            I::Uuid(set) => Box::new(set.iter().copied().map(Value::Uuid)),
            I::Secret(set) => Box::new(set.iter().cloned().map(Value::Secret)),
            I::Aci(set) => Box::new(set.iter().cloned().map(Value::Aci)),
            I::Syntax(set) => Box::new(set.iter().copied().map(Value::Syntax)),
        }
    }

    pub fn as_proto_strings(&self) -> Vec<String> {
        self.to_value_iter().map(|v| v.to_proto_string()).collect()
    }

    /// Iterate the member strings of a string-family set. `None` for
    /// non-string syntaxes.
    pub fn as_str_iter(&self) -> Option<Box<dyn Iterator<Item = &str> + '_>> {
        match &self.inner {
            I::Utf8(set) => Some(Box::new(set.iter().map(|s| s.as_str()))),
            I::Iutf8(set) => Some(Box::new(set.iter().map(|s| s.as_str()))),
            I::Dn(set) => Some(Box::new(set.iter().map(|s| s.as_str()))),
            I::Oid(set) => Some(Box::new(set.iter().map(|s| s.as_str()))),
            I::Aci(set) => Some(Box::new(set.iter().map(|s| s.as_str()))),
            _ => None,
        }
    }

    /// Substring assertion over the normalized member strings. `any` parts
    /// must appear in order, without overlapping, between the anchors.
    pub fn matches_sub(&self, initial: Option<&str>, any: &[String], last: Option<&str>) -> bool {
        let Some(iter) = self.as_str_iter() else {
            return false;
        };
        for s in iter {
            let mut pos = 0;
            let mut ok = true;
            if let Some(init) = initial {
                if let Some(rest) = s.strip_prefix(init) {
                    pos = s.len() - rest.len();
                } else {
                    continue;
                }
            }
            for part in any {
                match s.get(pos..).and_then(|r| r.find(part.as_str())) {
                    Some(idx) => pos = pos + idx + part.len(),
                    None => {
                        ok = false;
                        break;
                    }
                }
            }
            if !ok {
                continue;
            }
            if let Some(fin) = last {
                match s.get(pos..) {
                    Some(rest) if rest.ends_with(fin) => {}
                    _ => continue,
                }
            }
            return true;
        }
        false
    }

    pub fn single_value(&self) -> Option<Value> {
        if self.len() == 1 {
            self.to_value_iter().next()
        } else {
            None
        }
    }

    pub fn single_str(&self) -> Option<&str> {
        if self.len() == 1 {
            self.as_str_iter().and_then(|mut it| it.next())
        } else {
            None
        }
    }

    pub fn single_uuid(&self) -> Option<Uuid> {
        match &self.inner {
            I::Uuid(set) if set.len() == 1 => set.iter().next().copied(),
            _ => None,
        }
    }

    pub fn single_csn(&self) -> Option<Csn> {
        match &self.inner {
            I::Csn(set) if set.len() == 1 => set.iter().next().copied(),
            _ => None,
        }
    }

    pub fn single_bool(&self) -> Option<bool> {
        match &self.inner {
            I::Bool(set) if set.len() == 1 => set.iter().next().copied(),
            _ => None,
        }
    }

    pub fn single_syntax(&self) -> Option<SyntaxType> {
        match &self.inner {
            I::Syntax(set) if set.len() == 1 => set.iter().next().copied(),
            _ => None,
        }
    }

    pub fn single_secret(&self) -> Option<&str> {
        match &self.inner {
            I::Secret(set) if set.len() == 1 => set.iter().next().map(|s| s.as_str()),
            _ => None,
        }
    }

    /// Secrets never equal an assertion through the generic contains path
    /// unless the caller is explicitly comparing credentials.
    pub fn contains_secret(&self, cleartext: &str) -> bool {
        match &self.inner {
            I::Secret(set) => set.iter().any(|s| s == cleartext),
            _ => false,
        }
    }
}

impl FromIterator<Value> for Option<ValueSet> {
    fn from_iter<T: IntoIterator<Item = Value>>(iter: T) -> Self {
        let mut it = iter.into_iter();
        let mut vs = ValueSet::new(it.next()?);
        for v in it {
            vs.insert_checked(v).ok()?;
        }
        Some(vs)
    }
}
