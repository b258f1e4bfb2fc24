use serde::{Deserialize, Serialize};

pub use smartstring::alias::String as AttrString;

/// Attribute names are compared case-insensitively everywhere in the
/// directory. This is the single fold used for map keys and lookups so that
/// `ObjectClass`, `objectclass` and `OBJECTCLASS` address the same state.
pub fn attr_fold(name: &str) -> AttrString {
    let mut out = AttrString::new();
    out.extend(name.trim().chars().map(|c| c.to_ascii_lowercase()));
    out
}

/// One attribute assertion as a front-end submits it: the attribute name as
/// typed by the client, and the raw value text.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ProtoAva {
    pub attr: AttrString,
    pub value: String,
}

impl ProtoAva {
    pub fn new(attr: &str, value: &str) -> Self {
        ProtoAva {
            attr: AttrString::from(attr),
            value: value.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_attr_fold_is_case_insensitive() {
        assert_eq!(attr_fold("ObjectClass"), attr_fold("objectclass"));
        assert_eq!(attr_fold("  OU "), AttrString::from("ou"));
    }
}
