//! Search filters in their resolved form. A raw `ProtoFilter` carries
//! attribute names and assertion text exactly as the client sent them; here
//! every name is canonicalised and every assertion is bound to the
//! attribute's syntax, so that entry matching is a plain comparison of
//! normalised forms with no schema access on the hot path.

use atrium_proto::message::{ProtoFilter, ProtoSearchScope};

use crate::prelude::*;

/// How much of the tree below (and including) the base a search examines.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SearchScope {
    Base,
    OneLevel,
    #[default]
    Subtree,
}

impl From<ProtoSearchScope> for SearchScope {
    fn from(s: ProtoSearchScope) -> Self {
        match s {
            ProtoSearchScope::Base => SearchScope::Base,
            ProtoSearchScope::OneLevel => SearchScope::OneLevel,
            ProtoSearchScope::Subtree => SearchScope::Subtree,
        }
    }
}

impl SearchScope {
    pub fn covers(&self, base: &Dn, candidate: &Dn) -> bool {
        match self {
            SearchScope::Base => candidate == base,
            SearchScope::OneLevel => candidate.is_child_of(base),
            SearchScope::Subtree => candidate.is_under(base),
        }
    }
}

/// Substring assertion fragments, already normalised by the attribute's
/// substring rule.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubFilter {
    pub initial: Option<String>,
    pub any: Vec<String>,
    pub last: Option<String>,
}

impl SubFilter {
    fn is_empty(&self) -> bool {
        self.initial.is_none() && self.any.is_empty() && self.last.is_none()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Filter {
    Eq(AttrString, PartialValue),
    Sub(AttrString, SubFilter),
    Pres(AttrString),
    And(Vec<Filter>),
    Or(Vec<Filter>),
    Not(Box<Filter>),
}

impl Filter {
    /// Equality on an already resolved assertion. The caller folds the
    /// attribute name.
    pub fn eq(attr: &str, pv: PartialValue) -> Self {
        Filter::Eq(attr_fold(attr), pv)
    }

    pub fn pres(attr: &str) -> Self {
        Filter::Pres(attr_fold(attr))
    }

    /// Presence of `objectclass`, the conventional match-everything filter.
    pub fn all_entries() -> Self {
        Filter::Pres(AttrString::from(ATTR_OBJECTCLASS))
    }

    /// Resolve a raw filter against the schema. Unknown attributes reject
    /// rather than silently matching nothing, and an empty `and`/`or` list
    /// is refused outright.
    pub fn from_proto(
        pf: &ProtoFilter,
        schema: &(impl SchemaTransaction + ?Sized),
    ) -> Result<Self, OperationError> {
        match pf {
            ProtoFilter::Eq(attr, raw) => {
                let s_attr = schema
                    .resolve_attr(attr)
                    .map_err(OperationError::SchemaViolation)?;
                let pv = schema.partial_value_from_raw(s_attr, raw)?;
                Ok(Filter::Eq(s_attr.name.clone(), pv))
            }
            ProtoFilter::Sub {
                attr,
                initial,
                any,
                last,
            } => {
                let s_attr = schema
                    .resolve_attr(attr)
                    .map_err(OperationError::SchemaViolation)?;
                let rule = s_attr.substring.as_ref().ok_or_else(|| {
                    filter_error!(attr = %s_attr.name, "attribute has no substring rule");
                    OperationError::SchemaViolation(SchemaError::InvalidAttributeSyntax(
                        s_attr.name.to_string(),
                    ))
                })?;
                let sub = SubFilter {
                    initial: initial.as_deref().map(|s| rule.normalise(s)),
                    any: any.iter().map(|s| rule.normalise(s)).collect(),
                    last: last.as_deref().map(|s| rule.normalise(s)),
                };
                if sub.is_empty() {
                    return Err(OperationError::SchemaViolation(SchemaError::EmptyFilter));
                }
                Ok(Filter::Sub(s_attr.name.clone(), sub))
            }
            ProtoFilter::Pres(attr) => {
                let s_attr = schema
                    .resolve_attr(attr)
                    .map_err(OperationError::SchemaViolation)?;
                Ok(Filter::Pres(s_attr.name.clone()))
            }
            ProtoFilter::And(fs) => {
                if fs.is_empty() {
                    return Err(OperationError::SchemaViolation(SchemaError::EmptyFilter));
                }
                let inner = fs
                    .iter()
                    .map(|f| Filter::from_proto(f, schema))
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(Filter::And(inner))
            }
            ProtoFilter::Or(fs) => {
                if fs.is_empty() {
                    return Err(OperationError::SchemaViolation(SchemaError::EmptyFilter));
                }
                let inner = fs
                    .iter()
                    .map(|f| Filter::from_proto(f, schema))
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(Filter::Or(inner))
            }
            ProtoFilter::Not(f) => {
                let inner = Filter::from_proto(f, schema)?;
                Ok(Filter::Not(Box::new(inner)))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use atrium_proto::message::ProtoFilter;

    use crate::prelude::*;

    fn test_entry(schema: &SchemaReadTransaction) -> Entry {
        let dn = Dn::parse("uid=claire,ou=people,ou=system", schema).expect("failed to parse dn");
        let mut e = Entry::new(dn);
        e.add_ava(ATTR_OBJECTCLASS, Value::new_iutf8(CLASS_INET_ORG_PERSON))
            .expect("wrong family");
        e.add_ava(ATTR_CN, Value::new_iutf8("Claire"))
            .expect("wrong family");
        e.add_ava(ATTR_SN, Value::new_iutf8("Oldfield"))
            .expect("wrong family");
        e.add_ava(ATTR_MAIL, Value::new_iutf8("claire@example.com"))
            .expect("wrong family");
        e
    }

    #[test]
    fn test_filter_from_proto_folds_names_and_values() {
        let schema = Schema::new().expect("failed to bootstrap schema");
        let sr = schema.read();
        let e = test_entry(&sr);

        let f = Filter::from_proto(
            &ProtoFilter::Eq("CN".to_string(), "CLAIRE".to_string()),
            &sr,
        )
        .expect("failed to resolve filter");
        assert_eq!(
            f,
            Filter::Eq(AttrString::from("cn"), PartialValue::new_iutf8("claire"))
        );
        assert!(e.matches_filter(&f));
    }

    #[test]
    fn test_filter_from_proto_unknown_attribute() {
        let schema = Schema::new().expect("failed to bootstrap schema");
        let sr = schema.read();

        match Filter::from_proto(
            &ProtoFilter::Pres("favouritecolour".to_string()),
            &sr,
        ) {
            Err(OperationError::SchemaViolation(SchemaError::AttributeNotFound(a))) => {
                assert_eq!(a, "favouritecolour")
            }
            other => panic!("unexpected outcome {:?}", other),
        }
    }

    #[test]
    fn test_filter_from_proto_empty_junction() {
        let schema = Schema::new().expect("failed to bootstrap schema");
        let sr = schema.read();

        assert_eq!(
            Filter::from_proto(&ProtoFilter::And(vec![]), &sr),
            Err(OperationError::SchemaViolation(SchemaError::EmptyFilter))
        );
        assert_eq!(
            Filter::from_proto(&ProtoFilter::Or(vec![]), &sr),
            Err(OperationError::SchemaViolation(SchemaError::EmptyFilter))
        );
    }

    #[test]
    fn test_filter_substring_folds_fragments() {
        let schema = Schema::new().expect("failed to bootstrap schema");
        let sr = schema.read();
        let e = test_entry(&sr);

        let f = Filter::from_proto(
            &ProtoFilter::Sub {
                attr: "MAIL".to_string(),
                initial: Some("CLAIRE".to_string()),
                any: vec!["EXAMPLE".to_string()],
                last: Some(".COM".to_string()),
            },
            &sr,
        )
        .expect("failed to resolve filter");
        assert!(e.matches_filter(&f));

        let f = Filter::from_proto(
            &ProtoFilter::Sub {
                attr: "mail".to_string(),
                initial: Some("bob".to_string()),
                any: vec![],
                last: None,
            },
            &sr,
        )
        .expect("failed to resolve filter");
        assert!(!e.matches_filter(&f));
    }

    #[test]
    fn test_filter_substring_needs_a_rule() {
        let schema = Schema::new().expect("failed to bootstrap schema");
        let sr = schema.read();

        // member is dn syntax, which has no substring rule.
        match Filter::from_proto(
            &ProtoFilter::Sub {
                attr: "member".to_string(),
                initial: Some("uid=".to_string()),
                any: vec![],
                last: None,
            },
            &sr,
        ) {
            Err(OperationError::SchemaViolation(SchemaError::InvalidAttributeSyntax(a))) => {
                assert_eq!(a, "member")
            }
            other => panic!("unexpected outcome {:?}", other),
        }
    }

    #[test]
    fn test_filter_junction_logic() {
        let schema = Schema::new().expect("failed to bootstrap schema");
        let sr = schema.read();
        let e = test_entry(&sr);

        let f = Filter::And(vec![
            Filter::eq("objectclass", PartialValue::new_iutf8("inetorgperson")),
            Filter::Not(Box::new(Filter::pres("userpassword"))),
        ]);
        assert!(e.matches_filter(&f));

        let f = Filter::Or(vec![
            Filter::eq("cn", PartialValue::new_iutf8("someone else")),
            Filter::pres("mail"),
        ]);
        assert!(e.matches_filter(&f));

        let f = Filter::And(vec![
            Filter::pres("mail"),
            Filter::eq("cn", PartialValue::new_iutf8("someone else")),
        ]);
        assert!(!e.matches_filter(&f));
    }

    #[test]
    fn test_search_scope_covers() {
        let schema = Schema::new().expect("failed to bootstrap schema");
        let sr = schema.read();
        let base = Dn::parse("ou=people,ou=system", &sr).expect("failed to parse dn");
        let child = Dn::parse("uid=claire,ou=people,ou=system", &sr).expect("failed to parse dn");
        let grandchild =
            Dn::parse("cn=laptop,uid=claire,ou=people,ou=system", &sr).expect("failed to parse dn");

        assert!(SearchScope::Base.covers(&base, &base));
        assert!(!SearchScope::Base.covers(&base, &child));

        assert!(!SearchScope::OneLevel.covers(&base, &base));
        assert!(SearchScope::OneLevel.covers(&base, &child));
        assert!(!SearchScope::OneLevel.covers(&base, &grandchild));

        assert!(SearchScope::Subtree.covers(&base, &base));
        assert!(SearchScope::Subtree.covers(&base, &child));
        assert!(SearchScope::Subtree.covers(&base, &grandchild));
    }
}
