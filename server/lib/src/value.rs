//! Inside an entry, the key-value pairs are stored in these [`Value`] types.
//! Construction from raw protocol text is schema-driven: the attribute's
//! syntax selects the variant and applies the canonical normalisation, so
//! that later comparisons are plain typed equality.

use std::convert::TryFrom;
use std::fmt;
use std::str::FromStr;

use atrium_proto::SchemaError;
use regex::Regex;
use time::{Date, Month, OffsetDateTime, PrimitiveDateTime, Time};
use uuid::Uuid;

use crate::repl::csn::Csn;

lazy_static! {
    static ref NUMERIC_OID_RE: Regex = {
        #[allow(clippy::expect_used)]
        Regex::new(r"^\d+(\.\d+)+$").expect("Invalid oid regex found")
    };
    static ref DESCR_RE: Regex = {
        #[allow(clippy::expect_used)]
        Regex::new(r"^[a-zA-Z][a-zA-Z0-9-]*$").expect("Invalid descriptor regex found")
    };
}

/// The syntaxes the server understands. Each attribute type binds to exactly
/// one of these, which selects the [`Value`] variant used for storage and the
/// normalisation applied on the way in.
#[derive(Hash, Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum SyntaxType {
    Utf8String,
    Utf8StringInsensitive,
    DistinguishedName,
    Integer,
    Boolean,
    Oid,
    GeneralizedTime,
    Csn,
    Uuid,
    SecretUtf8String,
    AciItem,
    SyntaxId,
}

impl TryFrom<&str> for SyntaxType {
    type Error = ();

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        let n_value = value.to_uppercase();
        match n_value.as_str() {
            "UTF8STRING" => Ok(SyntaxType::Utf8String),
            "UTF8STRING_INSENSITIVE" => Ok(SyntaxType::Utf8StringInsensitive),
            "DISTINGUISHED_NAME" => Ok(SyntaxType::DistinguishedName),
            "INTEGER" => Ok(SyntaxType::Integer),
            "BOOLEAN" => Ok(SyntaxType::Boolean),
            "OID" => Ok(SyntaxType::Oid),
            "GENERALIZED_TIME" => Ok(SyntaxType::GeneralizedTime),
            "CSN" => Ok(SyntaxType::Csn),
            "UUID" => Ok(SyntaxType::Uuid),
            "SECRET_UTF8STRING" => Ok(SyntaxType::SecretUtf8String),
            "ACI_ITEM" => Ok(SyntaxType::AciItem),
            "SYNTAX_ID" => Ok(SyntaxType::SyntaxId),
            _ => Err(()),
        }
    }
}

impl fmt::Display for SyntaxType {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(match self {
            SyntaxType::Utf8String => "UTF8STRING",
            SyntaxType::Utf8StringInsensitive => "UTF8STRING_INSENSITIVE",
            SyntaxType::DistinguishedName => "DISTINGUISHED_NAME",
            SyntaxType::Integer => "INTEGER",
            SyntaxType::Boolean => "BOOLEAN",
            SyntaxType::Oid => "OID",
            SyntaxType::GeneralizedTime => "GENERALIZED_TIME",
            SyntaxType::Csn => "CSN",
            SyntaxType::Uuid => "UUID",
            SyntaxType::SecretUtf8String => "SECRET_UTF8STRING",
            SyntaxType::AciItem => "ACI_ITEM",
            SyntaxType::SyntaxId => "SYNTAX_ID",
        })
    }
}

/// Fold used by every case-insensitive string syntax.
pub fn value_fold(s: &str) -> String {
    s.trim().to_lowercase()
}

/// Validate an oid-syntax value: either a numeric oid or a descriptor name.
/// Returns the canonical (lowercased) form.
pub fn normalise_oid(s: &str) -> Option<String> {
    let t = s.trim();
    if NUMERIC_OID_RE.is_match(t) {
        Some(t.to_string())
    } else if DESCR_RE.is_match(t) {
        Some(t.to_lowercase())
    } else {
        None
    }
}

/// Parse a generalized time string `YYYYMMDDHHMMSS[.fff]Z`. Fractional
/// seconds are accepted and truncated; the canonical precision is seconds.
pub fn parse_generalized_time(s: &str) -> Option<OffsetDateTime> {
    let t = s.trim().strip_suffix('Z')?;
    let t = t.split('.').next()?;
    if t.len() != 14 || !t.is_ascii() {
        return None;
    }
    let year: i32 = t.get(0..4)?.parse().ok()?;
    let month: u8 = t.get(4..6)?.parse().ok()?;
    let day: u8 = t.get(6..8)?.parse().ok()?;
    let hour: u8 = t.get(8..10)?.parse().ok()?;
    let minute: u8 = t.get(10..12)?.parse().ok()?;
    let second: u8 = t.get(12..14)?.parse().ok()?;

    let date = Date::from_calendar_date(year, Month::try_from(month).ok()?, day).ok()?;
    let time = Time::from_hms(hour, minute, second).ok()?;
    Some(PrimitiveDateTime::new(date, time).assume_utc())
}

/// Render a timestamp in the canonical generalized time form.
pub fn fmt_generalized_time(odt: &OffsetDateTime) -> String {
    let odt = odt.to_offset(time::UtcOffset::UTC);
    format!(
        "{:04}{:02}{:02}{:02}{:02}{:02}Z",
        odt.year(),
        u8::from(odt.month()),
        odt.day(),
        odt.hour(),
        odt.minute(),
        odt.second()
    )
}

/// A single stored attribute value. Variants correspond to syntax families;
/// case-insensitive strings are folded on construction so that equality is
/// direct.
#[derive(Clone, PartialEq, Eq, Hash)]
pub enum Value {
    Utf8(String),
    Iutf8(String),
    // The normalized text form of the name.
    Dn(String),
    Integer(i64),
    Bool(bool),
    Oid(String),
    DateTime(OffsetDateTime),
    Csn(Csn),
    Uuid(Uuid),
    Secret(String),
    Aci(String),
    Syntax(SyntaxType),
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Value::Utf8(s) => write!(f, "Utf8({})", s),
            Value::Iutf8(s) => write!(f, "Iutf8({})", s),
            Value::Dn(s) => write!(f, "Dn({})", s),
            Value::Integer(i) => write!(f, "Integer({})", i),
            Value::Bool(b) => write!(f, "Bool({})", b),
            Value::Oid(s) => write!(f, "Oid({})", s),
            Value::DateTime(odt) => write!(f, "DateTime({})", fmt_generalized_time(odt)),
            Value::Csn(c) => write!(f, "Csn({})", c),
            Value::Uuid(u) => write!(f, "Uuid({})", u),
            // Never disclose secret material through debug or logs.
            Value::Secret(_) => write!(f, "Secret(hidden)"),
            Value::Aci(s) => write!(f, "Aci({})", s),
            Value::Syntax(s) => write!(f, "Syntax({})", s),
        }
    }
}

impl Value {
    pub fn new_utf8(s: String) -> Self {
        Value::Utf8(s)
    }

    pub fn new_utf8s(s: &str) -> Self {
        Value::Utf8(s.to_string())
    }

    pub fn new_iutf8(s: &str) -> Self {
        Value::Iutf8(value_fold(s))
    }

    /// `norm` must already be a normalized name text form.
    pub fn new_dn(norm: String) -> Self {
        Value::Dn(norm)
    }

    pub fn new_bool(b: bool) -> Self {
        Value::Bool(b)
    }

    pub fn new_uuid(u: Uuid) -> Self {
        Value::Uuid(u)
    }

    pub fn new_csn(c: Csn) -> Self {
        Value::Csn(c)
    }

    pub fn new_datetime(odt: OffsetDateTime) -> Self {
        Value::DateTime(odt.replace_millisecond(0).unwrap_or(odt))
    }

    pub fn new_secret(s: &str) -> Self {
        Value::Secret(s.to_string())
    }

    pub fn new_syntax(s: SyntaxType) -> Self {
        Value::Syntax(s)
    }

    pub fn new_integer(i: i64) -> Self {
        Value::Integer(i)
    }

    pub fn new_oid(s: &str) -> Self {
        Value::Oid(s.trim().to_string())
    }

    pub fn new_aci(s: &str) -> Self {
        Value::Aci(s.to_string())
    }

    /// The syntax family this value belongs to.
    pub fn syntax(&self) -> SyntaxType {
        match self {
            Value::Utf8(_) => SyntaxType::Utf8String,
            Value::Iutf8(_) => SyntaxType::Utf8StringInsensitive,
            Value::Dn(_) => SyntaxType::DistinguishedName,
            Value::Integer(_) => SyntaxType::Integer,
            Value::Bool(_) => SyntaxType::Boolean,
            Value::Oid(_) => SyntaxType::Oid,
            Value::DateTime(_) => SyntaxType::GeneralizedTime,
            Value::Csn(_) => SyntaxType::Csn,
            Value::Uuid(_) => SyntaxType::Uuid,
            Value::Secret(_) => SyntaxType::SecretUtf8String,
            Value::Aci(_) => SyntaxType::AciItem,
            Value::Syntax(_) => SyntaxType::SyntaxId,
        }
    }

    /// Build a value of the given syntax from raw protocol text, applying
    /// the syntax's normalisation. Name-syntax values cannot be built here
    /// as they need a schema snapshot; see
    /// [`SchemaTransaction::value_from_raw`](crate::schema::SchemaTransaction::value_from_raw).
    pub fn from_raw(syntax: SyntaxType, raw: &str) -> Result<Self, SchemaError> {
        let invalid = || SchemaError::InvalidAttributeSyntax(raw.to_string());
        match syntax {
            SyntaxType::Utf8String => Ok(Value::Utf8(raw.to_string())),
            SyntaxType::Utf8StringInsensitive => Ok(Value::Iutf8(value_fold(raw))),
            SyntaxType::DistinguishedName => Err(invalid()),
            SyntaxType::Integer => raw
                .trim()
                .parse::<i64>()
                .map(Value::Integer)
                .map_err(|_| invalid()),
            SyntaxType::Boolean => match value_fold(raw).as_str() {
                "true" => Ok(Value::Bool(true)),
                "false" => Ok(Value::Bool(false)),
                _ => Err(invalid()),
            },
            SyntaxType::Oid => normalise_oid(raw).map(Value::Oid).ok_or_else(invalid),
            SyntaxType::GeneralizedTime => parse_generalized_time(raw)
                .map(Value::DateTime)
                .ok_or_else(invalid),
            SyntaxType::Csn => Csn::from_str(raw.trim()).map(Value::Csn).map_err(|_| invalid()),
            SyntaxType::Uuid => Uuid::parse_str(raw.trim())
                .map(Value::Uuid)
                .map_err(|_| invalid()),
            SyntaxType::SecretUtf8String => Ok(Value::Secret(raw.to_string())),
            // Aci text keeps its exact form; the grammar is enforced by the
            // aci parser at subentry write time.
            SyntaxType::AciItem => Ok(Value::Aci(raw.to_string())),
            SyntaxType::SyntaxId => SyntaxType::try_from(raw.trim())
                .map(Value::Syntax)
                .map_err(|_| invalid()),
        }
    }

    /// The text form a front-end renders for this value.
    pub fn to_proto_string(&self) -> String {
        match self {
            Value::Utf8(s) | Value::Iutf8(s) | Value::Dn(s) | Value::Aci(s) | Value::Oid(s) => {
                s.clone()
            }
            Value::Integer(i) => i.to_string(),
            Value::Bool(b) => b.to_string(),
            Value::DateTime(odt) => fmt_generalized_time(odt),
            Value::Csn(c) => c.to_string(),
            Value::Uuid(u) => u.to_string(),
            Value::Secret(s) => s.clone(),
            Value::Syntax(s) => s.to_string(),
        }
    }

    /// The normalized string used for substring matching, where the syntax
    /// supports it.
    pub fn norm_str(&self) -> Option<&str> {
        match self {
            Value::Utf8(s) | Value::Iutf8(s) | Value::Dn(s) | Value::Oid(s) | Value::Aci(s) => {
                Some(s.as_str())
            }
            _ => None,
        }
    }

    pub fn to_partialvalue(&self) -> PartialValue {
        match self {
            Value::Utf8(s) => PartialValue::Utf8(s.clone()),
            Value::Iutf8(s) => PartialValue::Iutf8(s.clone()),
            Value::Dn(s) => PartialValue::Dn(s.clone()),
            Value::Integer(i) => PartialValue::Integer(*i),
            Value::Bool(b) => PartialValue::Bool(*b),
            Value::Oid(s) => PartialValue::Oid(s.clone()),
            Value::DateTime(odt) => PartialValue::DateTime(*odt),
            Value::Csn(c) => PartialValue::Csn(*c),
            Value::Uuid(u) => PartialValue::Uuid(*u),
            Value::Secret(s) => PartialValue::Secret(s.clone()),
            Value::Aci(s) => PartialValue::Aci(s.clone()),
            Value::Syntax(s) => PartialValue::Syntax(*s),
        }
    }

    pub fn as_uuid(&self) -> Option<Uuid> {
        match self {
            Value::Uuid(u) => Some(*u),
            _ => None,
        }
    }

    pub fn as_csn(&self) -> Option<Csn> {
        match self {
            Value::Csn(c) => Some(*c),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Utf8(s) | Value::Iutf8(s) | Value::Dn(s) | Value::Oid(s) | Value::Aci(s) => {
                Some(s.as_str())
            }
            _ => None,
        }
    }

    pub fn as_secret(&self) -> Option<&str> {
        match self {
            Value::Secret(s) => Some(s.as_str()),
            _ => None,
        }
    }

    pub fn as_syntax(&self) -> Option<SyntaxType> {
        match self {
            Value::Syntax(s) => Some(*s),
            _ => None,
        }
    }
}

/// An assertion value, as used in filters, compares and modifications.
/// Mirrors [`Value`] with the same normalisation rules applied.
#[derive(Clone, PartialEq, Eq, Hash)]
pub enum PartialValue {
    Utf8(String),
    Iutf8(String),
    Dn(String),
    Integer(i64),
    Bool(bool),
    Oid(String),
    DateTime(OffsetDateTime),
    Csn(Csn),
    Uuid(Uuid),
    Secret(String),
    Aci(String),
    Syntax(SyntaxType),
}

impl fmt::Debug for PartialValue {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            PartialValue::Secret(_) => write!(f, "Secret(hidden)"),
            PartialValue::Utf8(s) => write!(f, "Utf8({})", s),
            PartialValue::Iutf8(s) => write!(f, "Iutf8({})", s),
            PartialValue::Dn(s) => write!(f, "Dn({})", s),
            PartialValue::Integer(i) => write!(f, "Integer({})", i),
            PartialValue::Bool(b) => write!(f, "Bool({})", b),
            PartialValue::Oid(s) => write!(f, "Oid({})", s),
            PartialValue::DateTime(odt) => write!(f, "DateTime({})", fmt_generalized_time(odt)),
            PartialValue::Csn(c) => write!(f, "Csn({})", c),
            PartialValue::Uuid(u) => write!(f, "Uuid({})", u),
            PartialValue::Aci(s) => write!(f, "Aci({})", s),
            PartialValue::Syntax(s) => write!(f, "Syntax({})", s),
        }
    }
}

impl PartialValue {
    pub fn new_utf8s(s: &str) -> Self {
        PartialValue::Utf8(s.to_string())
    }

    pub fn new_iutf8(s: &str) -> Self {
        PartialValue::Iutf8(value_fold(s))
    }

    /// `norm` must already be a normalized name text form.
    pub fn new_dn(norm: String) -> Self {
        PartialValue::Dn(norm)
    }

    pub fn new_uuid(u: Uuid) -> Self {
        PartialValue::Uuid(u)
    }

    pub fn new_bool(b: bool) -> Self {
        PartialValue::Bool(b)
    }

    pub fn new_secret(s: &str) -> Self {
        PartialValue::Secret(s.to_string())
    }

    /// The syntax family this assertion belongs to.
    pub fn syntax(&self) -> SyntaxType {
        match self {
            PartialValue::Utf8(_) => SyntaxType::Utf8String,
            PartialValue::Iutf8(_) => SyntaxType::Utf8StringInsensitive,
            PartialValue::Dn(_) => SyntaxType::DistinguishedName,
            PartialValue::Integer(_) => SyntaxType::Integer,
            PartialValue::Bool(_) => SyntaxType::Boolean,
            PartialValue::Oid(_) => SyntaxType::Oid,
            PartialValue::DateTime(_) => SyntaxType::GeneralizedTime,
            PartialValue::Csn(_) => SyntaxType::Csn,
            PartialValue::Uuid(_) => SyntaxType::Uuid,
            PartialValue::Secret(_) => SyntaxType::SecretUtf8String,
            PartialValue::Aci(_) => SyntaxType::AciItem,
            PartialValue::Syntax(_) => SyntaxType::SyntaxId,
        }
    }

    /// Assertion counterpart of [`Value::from_raw`]; the same restriction
    /// on name-syntax values applies.
    pub fn from_raw(syntax: SyntaxType, raw: &str) -> Result<Self, SchemaError> {
        Value::from_raw(syntax, raw).map(|v| v.to_partialvalue())
    }
}

#[cfg(test)]
mod tests {
    use std::convert::TryFrom;

    use super::*;

    #[test]
    fn test_value_iutf8_folds_on_construction() {
        let v = Value::new_iutf8("  OrganizationalUnit ");
        assert_eq!(v, Value::Iutf8("organizationalunit".to_string()));
        assert_eq!(
            v.to_partialvalue(),
            PartialValue::new_iutf8("ORGANIZATIONALUNIT")
        );
    }

    #[test]
    fn test_value_from_raw_boolean() {
        assert_eq!(
            Value::from_raw(SyntaxType::Boolean, " TRUE "),
            Ok(Value::Bool(true))
        );
        assert!(Value::from_raw(SyntaxType::Boolean, "yes").is_err());
    }

    #[test]
    fn test_value_from_raw_integer() {
        assert_eq!(
            Value::from_raw(SyntaxType::Integer, "-42"),
            Ok(Value::Integer(-42))
        );
        assert!(Value::from_raw(SyntaxType::Integer, "4.2").is_err());
    }

    #[test]
    fn test_value_oid_normalisation() {
        assert_eq!(
            Value::from_raw(SyntaxType::Oid, "2.5.4.11"),
            Ok(Value::Oid("2.5.4.11".to_string()))
        );
        assert_eq!(
            Value::from_raw(SyntaxType::Oid, "OrganizationalUnitName"),
            Ok(Value::Oid("organizationalunitname".to_string()))
        );
        assert!(Value::from_raw(SyntaxType::Oid, "2..5").is_err());
        assert!(Value::from_raw(SyntaxType::Oid, "-bad").is_err());
    }

    #[test]
    fn test_generalized_time_round_trip() {
        let odt = parse_generalized_time("20230817143000Z").expect("failed to parse");
        assert_eq!(fmt_generalized_time(&odt), "20230817143000Z");
        // Fractional seconds are accepted and truncated.
        let odt2 = parse_generalized_time("20230817143000.123Z").expect("failed to parse");
        assert_eq!(odt, odt2);
        assert!(parse_generalized_time("2023-08-17").is_none());
        assert!(parse_generalized_time("20231340143000Z").is_none());
    }

    #[test]
    fn test_syntax_type_round_trip() {
        let s = SyntaxType::try_from("utf8string_insensitive").expect("failed to parse");
        assert_eq!(s, SyntaxType::Utf8StringInsensitive);
        assert_eq!(s.to_string(), "UTF8STRING_INSENSITIVE");
        assert!(SyntaxType::try_from("jpeg").is_err());
    }

    #[test]
    fn test_secret_value_never_debugs_content() {
        let v = Value::new_secret("hunter2");
        let dbg = format!("{:?}", v);
        assert!(!dbg.contains("hunter2"));
        assert_eq!(v.as_secret(), Some("hunter2"));
    }
}
