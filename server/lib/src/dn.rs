//! Distinguished names. A [`Dn`] is an immutable, leaf-first sequence of
//! [`Rdn`]s. Parsing resolves every attribute through the schema and
//! normalises every value with that attribute's equality rule, so two
//! spellings of the same name compare equal. Equality, ordering and hashing
//! use only the normalised form; the original spelling is kept for display.

use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};

use atrium_proto::{AttrString, OperationError};

use crate::schema::SchemaTransaction;

/// One attribute-value pair inside an rdn.
#[derive(Debug, Clone)]
pub struct Ava {
    /// Canonical attribute name from the schema.
    pub attr: AttrString,
    /// The attribute's oid. Multi-ava rdns sort on this, which makes the
    /// canonical form independent of the order the client wrote them.
    pub oid: String,
    /// Value as supplied, unescaped.
    pub value: String,
    /// Value normalised by the attribute's equality rule.
    pub norm: String,
}

#[derive(Debug, Clone)]
pub struct Rdn {
    avas: Vec<Ava>,
}

impl Rdn {
    pub fn new(avas: Vec<Ava>) -> Option<Self> {
        if avas.is_empty() {
            return None;
        }
        let mut avas = avas;
        avas.sort_by(|a, b| a.oid.cmp(&b.oid));
        Some(Rdn { avas })
    }

    pub fn avas(&self) -> &[Ava] {
        &self.avas
    }

    /// The first ava. Single valued rdns are the overwhelmingly common case.
    pub fn ava(&self) -> &Ava {
        &self.avas[0]
    }

    fn fmt_with(&self, f: &mut String, norm: bool) {
        let mut first = true;
        for ava in &self.avas {
            if !first {
                f.push('+');
            }
            first = false;
            f.push_str(&ava.attr);
            f.push('=');
            let v = if norm { &ava.norm } else { &ava.value };
            f.push_str(&escape_value(v));
        }
    }
}

/// A distinguished name. `rdns[0]` is the leaf; the last rdn is closest to
/// the root. The root itself is the empty sequence.
#[derive(Clone)]
pub struct Dn {
    rdns: Vec<Rdn>,
    text: String,
    norm: String,
}

impl Dn {
    pub fn root() -> Self {
        Dn {
            rdns: Vec::new(),
            text: String::new(),
            norm: String::new(),
        }
    }

    pub fn is_root(&self) -> bool {
        self.rdns.is_empty()
    }

    /// Parse and normalise a raw name. Unknown attribute types, malformed
    /// escapes and empty components all fail with `NamingViolation`.
    pub fn parse(
        raw: &str,
        schema: &(impl SchemaTransaction + ?Sized),
    ) -> Result<Self, OperationError> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Ok(Dn::root());
        }
        let err = || OperationError::NamingViolation(raw.to_string());

        let mut rdns = Vec::new();
        for rdn_raw in split_unescaped(trimmed, ',') {
            let mut avas = Vec::new();
            for ava_raw in split_unescaped(&rdn_raw, '+') {
                let (attr_raw, value_raw) = split_ava(&ava_raw).ok_or_else(err)?;
                let attr_def = schema.resolve_attr(attr_raw).map_err(|_| err())?;
                let value = unescape_value(value_raw.trim()).ok_or_else(err)?;
                let norm = attr_def.equality.normalise(&value);
                if norm.is_empty() {
                    return Err(err());
                }
                avas.push(Ava {
                    attr: attr_def.name.clone(),
                    oid: attr_def.oid.clone(),
                    value,
                    norm,
                });
            }
            rdns.push(Rdn::new(avas).ok_or_else(err)?);
        }
        Ok(Dn::from_rdns(rdns))
    }

    fn from_rdns(rdns: Vec<Rdn>) -> Self {
        let mut text = String::new();
        let mut norm = String::new();
        for (i, rdn) in rdns.iter().enumerate() {
            if i != 0 {
                text.push(',');
                norm.push(',');
            }
            rdn.fmt_with(&mut text, false);
            rdn.fmt_with(&mut norm, true);
        }
        Dn { rdns, text, norm }
    }

    /// The canonical normalised text form. Stable for use as a map key.
    pub fn norm(&self) -> &str {
        &self.norm
    }

    pub fn rdns(&self) -> &[Rdn] {
        &self.rdns
    }

    /// The leaf rdn. `None` for the root.
    pub fn rdn(&self) -> Option<&Rdn> {
        self.rdns.first()
    }

    pub fn depth(&self) -> usize {
        self.rdns.len()
    }

    pub fn parent(&self) -> Option<Dn> {
        if self.rdns.is_empty() {
            None
        } else {
            Some(Dn::from_rdns(self.rdns[1..].to_vec()))
        }
    }

    /// True when `self` is `base` or any descendant of it. Everything is
    /// under the root.
    pub fn is_under(&self, base: &Dn) -> bool {
        if base.is_root() {
            return true;
        }
        let skip = match self.rdns.len().checked_sub(base.rdns.len()) {
            Some(n) => n,
            None => return false,
        };
        self.rdns[skip..]
            .iter()
            .zip(base.rdns.iter())
            .all(|(a, b)| rdn_norm(a) == rdn_norm(b))
    }

    pub fn is_child_of(&self, parent: &Dn) -> bool {
        self.depth() == parent.depth() + 1 && self.is_under(parent)
    }

    /// A new name one level below `self`.
    pub fn child(&self, rdn: Rdn) -> Dn {
        let mut rdns = Vec::with_capacity(self.rdns.len() + 1);
        rdns.push(rdn);
        rdns.extend(self.rdns.iter().cloned());
        Dn::from_rdns(rdns)
    }

    /// Replace the leaf rdn, keeping the superior. `None` for the root.
    pub fn with_rdn(&self, rdn: Rdn) -> Option<Dn> {
        if self.rdns.is_empty() {
            return None;
        }
        let mut rdns = self.rdns.clone();
        rdns[0] = rdn;
        Some(Dn::from_rdns(rdns))
    }

    /// Re-anchor a name under a new base. `self` must be under `old_base`.
    pub fn rebase(&self, old_base: &Dn, new_base: &Dn) -> Option<Dn> {
        if !self.is_under(old_base) {
            return None;
        }
        let keep = self.rdns.len() - old_base.rdns.len();
        let mut rdns = self.rdns[..keep].to_vec();
        rdns.extend(new_base.rdns.iter().cloned());
        Some(Dn::from_rdns(rdns))
    }
}

fn rdn_norm(rdn: &Rdn) -> String {
    let mut s = String::new();
    rdn.fmt_with(&mut s, true);
    s
}

impl PartialEq for Dn {
    fn eq(&self, other: &Self) -> bool {
        self.norm == other.norm
    }
}

impl Eq for Dn {}

impl PartialOrd for Dn {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Dn {
    fn cmp(&self, other: &Self) -> Ordering {
        self.norm.cmp(&other.norm)
    }
}

impl Hash for Dn {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.norm.hash(state);
    }
}

impl fmt::Display for Dn {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(&self.text)
    }
}

impl fmt::Debug for Dn {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "Dn({})", self.norm)
    }
}

const ESCAPED: &[char] = &[',', '+', '"', '\\', '<', '>', ';', '=', '#'];

/// Split on an unescaped separator, keeping escape sequences intact for the
/// later unescape pass.
fn split_unescaped(s: &str, sep: char) -> Vec<String> {
    let mut parts = Vec::new();
    let mut cur = String::new();
    let mut escaped = false;
    for c in s.chars() {
        if escaped {
            cur.push(c);
            escaped = false;
        } else if c == '\\' {
            cur.push(c);
            escaped = true;
        } else if c == sep {
            parts.push(std::mem::take(&mut cur));
        } else {
            cur.push(c);
        }
    }
    parts.push(cur);
    parts
}

/// Split one ava on the first unescaped `=`. The attribute side must be a
/// plain descriptor, so any escape before the separator is malformed.
fn split_ava(s: &str) -> Option<(&str, &str)> {
    let idx = s.find('=')?;
    let (attr, value) = s.split_at(idx);
    let attr = attr.trim();
    if attr.is_empty() || attr.contains('\\') {
        return None;
    }
    Some((attr, &value[1..]))
}

fn unescape_value(s: &str) -> Option<String> {
    let mut out = String::with_capacity(s.len());
    let mut chars = s.chars().peekable();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        let e = chars.next()?;
        if ESCAPED.contains(&e) || e == ' ' {
            out.push(e);
        } else if e.is_ascii_hexdigit() {
            let e2 = chars.next()?;
            if !e2.is_ascii_hexdigit() {
                return None;
            }
            let byte = u8::from_str_radix(&format!("{}{}", e, e2), 16).ok()?;
            out.push(byte as char);
        } else {
            return None;
        }
    }
    if out.is_empty() {
        return None;
    }
    Some(out)
}

fn escape_value(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let last = s.chars().count().saturating_sub(1);
    for (i, c) in s.chars().enumerate() {
        if ESCAPED.contains(&c) || (c == ' ' && (i == 0 || i == last)) {
            out.push('\\');
        }
        out.push(c);
    }
    out
}
