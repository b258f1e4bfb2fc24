//! Raw request and reply shapes exchanged with front-ends.
//!
//! These are the untrusted forms: strings for DNs, attribute names and
//! values, exactly as a wire decoder hands them over. The server core
//! resolves them against the schema before anything executes, so nothing
//! here performs validation beyond what serde requires.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// An entry as presented to or by a client. The `attrs` map is keyed by
/// attribute name as sent; canonicalisation happens server-side.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq, Default)]
pub struct ProtoEntry {
    pub dn: String,
    pub attrs: BTreeMap<String, Vec<String>>,
}

impl ProtoEntry {
    pub fn new(dn: String) -> Self {
        ProtoEntry {
            dn,
            attrs: BTreeMap::new(),
        }
    }

    pub fn push_ava(&mut self, attr: &str, value: &str) {
        self.attrs
            .entry(attr.to_string())
            .or_default()
            .push(value.to_string());
    }
}

impl fmt::Display for ProtoEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "dn: {}", self.dn)?;
        self.attrs
            .iter()
            .try_for_each(|(k, vs)| vs.iter().try_for_each(|v| writeln!(f, "{}: {}", k, v)))
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ProtoModifyOp {
    Add,
    Delete,
    Replace,
}

impl fmt::Display for ProtoModifyOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProtoModifyOp::Add => write!(f, "add"),
            ProtoModifyOp::Delete => write!(f, "delete"),
            ProtoModifyOp::Replace => write!(f, "replace"),
        }
    }
}

/// One change to one attribute. `delete` with no values removes the whole
/// attribute; `replace` swaps the current value set for `values`.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct ProtoModify {
    pub op: ProtoModifyOp,
    pub attr: String,
    pub values: Vec<String>,
}

impl ProtoModify {
    pub fn add(attr: &str, value: &str) -> Self {
        ProtoModify {
            op: ProtoModifyOp::Add,
            attr: attr.to_string(),
            values: vec![value.to_string()],
        }
    }

    pub fn delete(attr: &str, value: &str) -> Self {
        ProtoModify {
            op: ProtoModifyOp::Delete,
            attr: attr.to_string(),
            values: vec![value.to_string()],
        }
    }

    pub fn delete_all(attr: &str) -> Self {
        ProtoModify {
            op: ProtoModifyOp::Delete,
            attr: attr.to_string(),
            values: Vec::with_capacity(0),
        }
    }

    pub fn replace(attr: &str, values: Vec<String>) -> Self {
        ProtoModify {
            op: ProtoModifyOp::Replace,
            attr: attr.to_string(),
            values,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq, Default)]
pub struct ProtoModifyList {
    pub mods: Vec<ProtoModify>,
}

impl ProtoModifyList {
    pub fn new_list(mods: Vec<ProtoModify>) -> Self {
        ProtoModifyList { mods }
    }
}

/// Raw search filter. Attribute names and assertion values are carried
/// verbatim; the normalization stage folds them through the schema.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ProtoFilter {
    Eq(String, String),
    Sub {
        attr: String,
        initial: Option<String>,
        any: Vec<String>,
        last: Option<String>,
    },
    Pres(String),
    And(Vec<ProtoFilter>),
    Or(Vec<ProtoFilter>),
    Not(Box<ProtoFilter>),
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum ProtoSearchScope {
    Base,
    #[serde(alias = "one")]
    OneLevel,
    #[default]
    #[serde(alias = "sub")]
    Subtree,
}

/// A decoded client request, one variant per protocol operation. The
/// front-end builds these and hands them to a session; it never touches
/// server internals directly.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum DirectoryRequest {
    Add {
        entry: ProtoEntry,
    },
    Delete {
        dn: String,
        subtree: bool,
    },
    Modify {
        dn: String,
        list: ProtoModifyList,
    },
    Search {
        base: String,
        scope: ProtoSearchScope,
        filter: ProtoFilter,
        attrs: Vec<String>,
        size_limit: Option<u64>,
        time_limit: Option<u64>,
    },
    Compare {
        dn: String,
        attr: String,
        value: String,
    },
    Bind {
        dn: String,
        credential: String,
    },
    Unbind,
    Rename {
        dn: String,
        new_rdn: String,
        delete_old_rdn: bool,
    },
    Move {
        dn: String,
        new_superior: String,
    },
    MoveAndRename {
        dn: String,
        new_superior: String,
        new_rdn: String,
        delete_old_rdn: bool,
    },
}

/// Why a search stopped short of the full result set.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ProtoPartialReason {
    SizeLimit,
    TimeLimit,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum DirectoryReply {
    Success,
    Entries {
        entries: Vec<ProtoEntry>,
        partial: Option<ProtoPartialReason>,
    },
    Compared(bool),
    Bound {
        dn: String,
    },
}
