//! Matching rules bind a syntax to the normalisation and comparison applied
//! to assertions against that syntax. Each rule carries its behaviour as a
//! [`Normalizer`] + [`Comparator`] capability pair; the well known rules are
//! built here and registered into the schema at bootstrap, where names and
//! oids resolve against them.

use std::cmp::Ordering;
use std::fmt;
use std::sync::Arc;

use atrium_proto::AttrString;

use crate::constants::*;
use crate::value::{normalise_oid, value_fold, SyntaxType};

/// Canonicalise raw assertion text for one syntax family.
pub trait Normalizer: Send + Sync {
    fn normalise(&self, raw: &str) -> String;
}

/// Order two already normalised text forms. Equality is `Ordering::Equal`.
pub trait Comparator: Send + Sync {
    fn compare(&self, a: &str, b: &str) -> Ordering;
}

struct FoldNormalizer;

impl Normalizer for FoldNormalizer {
    fn normalise(&self, raw: &str) -> String {
        value_fold(raw)
    }
}

struct TrimNormalizer;

impl Normalizer for TrimNormalizer {
    fn normalise(&self, raw: &str) -> String {
        raw.trim().to_string()
    }
}

struct OidNormalizer;

impl Normalizer for OidNormalizer {
    fn normalise(&self, raw: &str) -> String {
        normalise_oid(raw).unwrap_or_else(|| value_fold(raw))
    }
}

struct IdentityNormalizer;

impl Normalizer for IdentityNormalizer {
    fn normalise(&self, raw: &str) -> String {
        raw.to_string()
    }
}

struct TextComparator;

impl Comparator for TextComparator {
    fn compare(&self, a: &str, b: &str) -> Ordering {
        a.cmp(b)
    }
}

struct IntegerComparator;

impl Comparator for IntegerComparator {
    fn compare(&self, a: &str, b: &str) -> Ordering {
        match (a.parse::<i64>(), b.parse::<i64>()) {
            (Ok(ia), Ok(ib)) => ia.cmp(&ib),
            // Unparseable forms fall back to text order so the result is
            // still total.
            _ => a.cmp(b),
        }
    }
}

/// A named comparison behaviour, resolvable through the schema by name or
/// oid. Identity is the oid.
pub struct MatchingRule {
    pub name: AttrString,
    pub oid: String,
    pub syntax: SyntaxType,
    normalizer: Arc<dyn Normalizer>,
    comparator: Arc<dyn Comparator>,
}

impl fmt::Debug for MatchingRule {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("MatchingRule")
            .field("name", &self.name)
            .field("oid", &self.oid)
            .field("syntax", &self.syntax)
            .finish()
    }
}

impl PartialEq for MatchingRule {
    fn eq(&self, other: &Self) -> bool {
        self.oid == other.oid
    }
}

impl Eq for MatchingRule {}

impl MatchingRule {
    fn new(
        name: &str,
        oid: &str,
        syntax: SyntaxType,
        normalizer: Arc<dyn Normalizer>,
        comparator: Arc<dyn Comparator>,
    ) -> Arc<Self> {
        Arc::new(MatchingRule {
            name: AttrString::from(name),
            oid: oid.to_string(),
            syntax,
            normalizer,
            comparator,
        })
    }

    pub fn normalise(&self, raw: &str) -> String {
        self.normalizer.normalise(raw)
    }

    pub fn compare(&self, a: &str, b: &str) -> Ordering {
        self.comparator.compare(a, b)
    }

    pub fn matches(&self, a: &str, b: &str) -> bool {
        self.compare(a, b) == Ordering::Equal
    }

    pub fn normalizer(&self) -> Arc<dyn Normalizer> {
        self.normalizer.clone()
    }

    pub fn comparator(&self) -> Arc<dyn Comparator> {
        self.comparator.clone()
    }

    /// The well known rules registered at schema bootstrap. The set is
    /// closed: a rule name in an attribute definition must resolve here.
    pub fn well_known() -> Vec<Arc<MatchingRule>> {
        let fold: Arc<dyn Normalizer> = Arc::new(FoldNormalizer);
        let trim: Arc<dyn Normalizer> = Arc::new(TrimNormalizer);
        let oid: Arc<dyn Normalizer> = Arc::new(OidNormalizer);
        let identity: Arc<dyn Normalizer> = Arc::new(IdentityNormalizer);
        let text: Arc<dyn Comparator> = Arc::new(TextComparator);
        let integer: Arc<dyn Comparator> = Arc::new(IntegerComparator);

        vec![
            MatchingRule::new(
                MR_CASEIGNORE,
                OID_MR_CASEIGNORE,
                SyntaxType::Utf8StringInsensitive,
                fold.clone(),
                text.clone(),
            ),
            MatchingRule::new(
                MR_CASEIGNORE_SUBSTRINGS,
                OID_MR_CASEIGNORE_SUBSTRINGS,
                SyntaxType::Utf8StringInsensitive,
                fold.clone(),
                text.clone(),
            ),
            MatchingRule::new(
                MR_CASEEXACT,
                OID_MR_CASEEXACT,
                SyntaxType::Utf8String,
                trim.clone(),
                text.clone(),
            ),
            MatchingRule::new(
                MR_CASEEXACT_SUBSTRINGS,
                OID_MR_CASEEXACT_SUBSTRINGS,
                SyntaxType::Utf8String,
                trim.clone(),
                text.clone(),
            ),
            // Name assertions are normalised through the schema before they
            // reach the rule, so only the fold remains here.
            MatchingRule::new(
                MR_DISTINGUISHEDNAME,
                OID_MR_DISTINGUISHEDNAME,
                SyntaxType::DistinguishedName,
                fold.clone(),
                text.clone(),
            ),
            MatchingRule::new(
                MR_INTEGER,
                OID_MR_INTEGER,
                SyntaxType::Integer,
                trim.clone(),
                integer.clone(),
            ),
            MatchingRule::new(
                MR_INTEGER_ORDERING,
                OID_MR_INTEGER_ORDERING,
                SyntaxType::Integer,
                trim.clone(),
                integer,
            ),
            MatchingRule::new(
                MR_BOOLEAN,
                OID_MR_BOOLEAN,
                SyntaxType::Boolean,
                fold.clone(),
                text.clone(),
            ),
            MatchingRule::new(
                MR_OBJECTIDENTIFIER,
                OID_MR_OBJECTIDENTIFIER,
                SyntaxType::Oid,
                oid,
                text.clone(),
            ),
            // Canonical generalized time is fixed width utc, so text order
            // is chronological order.
            MatchingRule::new(
                MR_GENERALIZEDTIME,
                OID_MR_GENERALIZEDTIME,
                SyntaxType::GeneralizedTime,
                trim.clone(),
                text.clone(),
            ),
            MatchingRule::new(
                MR_GENERALIZEDTIME_ORDERING,
                OID_MR_GENERALIZEDTIME_ORDERING,
                SyntaxType::GeneralizedTime,
                trim,
                text.clone(),
            ),
            MatchingRule::new(
                MR_OCTETSTRING,
                OID_MR_OCTETSTRING,
                SyntaxType::SecretUtf8String,
                identity,
                text.clone(),
            ),
            MatchingRule::new(
                MR_UUID,
                OID_MR_UUID,
                SyntaxType::Uuid,
                fold.clone(),
                text.clone(),
            ),
            // Csn text form is fixed width hex, so text order is causal
            // order.
            MatchingRule::new(MR_CSN, OID_MR_CSN, SyntaxType::Csn, fold, text),
        ]
    }

    /// The equality rule name assumed for a syntax when an attribute
    /// definition does not bind one explicitly.
    pub fn default_equality_name(syntax: SyntaxType) -> &'static str {
        match syntax {
            SyntaxType::Utf8String => MR_CASEEXACT,
            SyntaxType::Utf8StringInsensitive => MR_CASEIGNORE,
            SyntaxType::DistinguishedName => MR_DISTINGUISHEDNAME,
            SyntaxType::Integer => MR_INTEGER,
            SyntaxType::Boolean => MR_BOOLEAN,
            SyntaxType::Oid => MR_OBJECTIDENTIFIER,
            SyntaxType::GeneralizedTime => MR_GENERALIZEDTIME,
            SyntaxType::Csn => MR_CSN,
            SyntaxType::Uuid => MR_UUID,
            SyntaxType::SecretUtf8String => MR_OCTETSTRING,
            // Aci and syntax identifiers assert as folded text.
            SyntaxType::AciItem => MR_CASEIGNORE,
            SyntaxType::SyntaxId => MR_CASEIGNORE,
        }
    }

    pub fn default_ordering_name(syntax: SyntaxType) -> Option<&'static str> {
        match syntax {
            SyntaxType::Integer => Some(MR_INTEGER_ORDERING),
            SyntaxType::GeneralizedTime => Some(MR_GENERALIZEDTIME_ORDERING),
            SyntaxType::Csn => Some(MR_CSN),
            _ => None,
        }
    }

    pub fn default_substrings_name(syntax: SyntaxType) -> Option<&'static str> {
        match syntax {
            SyntaxType::Utf8String => Some(MR_CASEEXACT_SUBSTRINGS),
            SyntaxType::Utf8StringInsensitive => Some(MR_CASEIGNORE_SUBSTRINGS),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::cmp::Ordering;

    use super::MatchingRule;
    use crate::value::SyntaxType;

    fn find(name: &str) -> std::sync::Arc<MatchingRule> {
        MatchingRule::well_known()
            .into_iter()
            .find(|mr| mr.name == name)
            .expect("rule must exist")
    }

    #[test]
    fn test_case_ignore_normalises_before_compare() {
        let mr = find("caseignorematch");
        let a = mr.normalise("  Engineering ");
        let b = mr.normalise("ENGINEERING");
        assert!(mr.matches(&a, &b));
        assert!(!mr.matches(&a, "support"));
    }

    #[test]
    fn test_integer_compares_numerically() {
        let mr = find("integermatch");
        // Text order would put "9" after "10".
        assert_eq!(mr.compare("9", "10"), Ordering::Less);
        assert_eq!(mr.compare("-3", "2"), Ordering::Less);
    }

    #[test]
    fn test_rule_identity_is_the_oid() {
        let a = find("caseignorematch");
        let b = find("caseignoresubstringsmatch");
        assert_ne!(*a, *b);
        assert_eq!(a.oid, "2.5.13.2");
    }

    #[test]
    fn test_default_rules_exist_only_where_meaningful() {
        assert_eq!(
            MatchingRule::default_equality_name(SyntaxType::Utf8StringInsensitive),
            "caseignorematch"
        );
        assert!(MatchingRule::default_ordering_name(SyntaxType::GeneralizedTime).is_some());
        assert!(MatchingRule::default_ordering_name(SyntaxType::Boolean).is_none());
        assert!(MatchingRule::default_substrings_name(SyntaxType::Utf8StringInsensitive).is_some());
        assert!(MatchingRule::default_substrings_name(SyntaxType::Integer).is_none());
    }
}
