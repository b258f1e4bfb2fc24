//! Numeric oids and well known names used by the in-memory schema. The
//! bootstrap definitions in [`crate::schema`] reference these so that the
//! wire-visible identifiers stay stable across releases.

// IF YOU CHANGE THESE VALUES YOU BREAK EVERYTHING

// -- standard attribute types

pub const OID_ATTR_OBJECTCLASS: &str = "2.5.4.0";
pub const OID_ATTR_CN: &str = "2.5.4.3";
pub const OID_ATTR_SN: &str = "2.5.4.4";
pub const OID_ATTR_O: &str = "2.5.4.10";
pub const OID_ATTR_OU: &str = "2.5.4.11";
pub const OID_ATTR_DESCRIPTION: &str = "2.5.4.13";
pub const OID_ATTR_TELEPHONENUMBER: &str = "2.5.4.20";
pub const OID_ATTR_MEMBER: &str = "2.5.4.31";
pub const OID_ATTR_SEEALSO: &str = "2.5.4.34";
pub const OID_ATTR_USERPASSWORD: &str = "2.5.4.35";
pub const OID_ATTR_GIVENNAME: &str = "2.5.4.42";
pub const OID_ATTR_DISPLAYNAME: &str = "2.16.840.1.113730.3.1.241";
pub const OID_ATTR_UID: &str = "0.9.2342.19200300.100.1.1";
pub const OID_ATTR_MAIL: &str = "0.9.2342.19200300.100.1.3";
pub const OID_ATTR_DC: &str = "0.9.2342.19200300.100.1.25";

// -- operational attribute types

pub const OID_ATTR_CREATETIMESTAMP: &str = "2.5.18.1";
pub const OID_ATTR_MODIFYTIMESTAMP: &str = "2.5.18.2";
pub const OID_ATTR_CREATORSNAME: &str = "2.5.18.3";
pub const OID_ATTR_MODIFIERSNAME: &str = "2.5.18.4";
pub const OID_ATTR_ADMINISTRATIVEROLE: &str = "2.5.18.5";
pub const OID_ATTR_SUBTREESPECIFICATION: &str = "2.5.18.6";
pub const OID_ATTR_ENTRYUUID: &str = "1.3.6.1.1.16.4";
pub const OID_ATTR_ENTRYCSN: &str = "1.3.6.1.4.1.4203.666.1.7";
pub const OID_ATTR_PRESCRIPTIVEACI: &str = "1.3.6.1.4.1.18060.0.4.1.2.25";

// -- object classes

pub const OID_CLASS_TOP: &str = "2.5.6.0";
pub const OID_CLASS_ORGANIZATION: &str = "2.5.6.4";
pub const OID_CLASS_ORGANIZATIONALUNIT: &str = "2.5.6.5";
pub const OID_CLASS_PERSON: &str = "2.5.6.6";
pub const OID_CLASS_ORGANIZATIONALPERSON: &str = "2.5.6.7";
pub const OID_CLASS_GROUPOFNAMES: &str = "2.5.6.9";
pub const OID_CLASS_SUBENTRY: &str = "2.5.17.0";
pub const OID_CLASS_ACCESSCONTROLSUBENTRY: &str = "2.5.17.1";
pub const OID_CLASS_INETORGPERSON: &str = "2.16.840.1.113730.3.2.2";
pub const OID_CLASS_EXTENSIBLEOBJECT: &str = "1.3.6.1.4.1.1466.101.120.111";
pub const OID_CLASS_DOMAIN: &str = "0.9.2342.19200300.100.4.13";
pub const OID_CLASS_ACCOUNT: &str = "0.9.2342.19200300.100.4.5";

// -- matching rules

pub const MR_OBJECTIDENTIFIER: &str = "objectidentifiermatch";
pub const OID_MR_OBJECTIDENTIFIER: &str = "2.5.13.0";
pub const MR_DISTINGUISHEDNAME: &str = "distinguishednamematch";
pub const OID_MR_DISTINGUISHEDNAME: &str = "2.5.13.1";
pub const MR_CASEIGNORE: &str = "caseignorematch";
pub const OID_MR_CASEIGNORE: &str = "2.5.13.2";
pub const MR_CASEIGNORE_SUBSTRINGS: &str = "caseignoresubstringsmatch";
pub const OID_MR_CASEIGNORE_SUBSTRINGS: &str = "2.5.13.4";
pub const MR_CASEEXACT: &str = "caseexactmatch";
pub const OID_MR_CASEEXACT: &str = "2.5.13.5";
pub const MR_CASEEXACT_SUBSTRINGS: &str = "caseexactsubstringsmatch";
pub const OID_MR_CASEEXACT_SUBSTRINGS: &str = "2.5.13.7";
pub const MR_BOOLEAN: &str = "booleanmatch";
pub const OID_MR_BOOLEAN: &str = "2.5.13.13";
pub const MR_INTEGER: &str = "integermatch";
pub const OID_MR_INTEGER: &str = "2.5.13.14";
pub const MR_INTEGER_ORDERING: &str = "integerorderingmatch";
pub const OID_MR_INTEGER_ORDERING: &str = "2.5.13.15";
pub const MR_OCTETSTRING: &str = "octetstringmatch";
pub const OID_MR_OCTETSTRING: &str = "2.5.13.17";
pub const MR_GENERALIZEDTIME: &str = "generalizedtimematch";
pub const OID_MR_GENERALIZEDTIME: &str = "2.5.13.27";
pub const MR_GENERALIZEDTIME_ORDERING: &str = "generalizedtimeorderingmatch";
pub const OID_MR_GENERALIZEDTIME_ORDERING: &str = "2.5.13.28";
pub const MR_UUID: &str = "uuidmatch";
pub const OID_MR_UUID: &str = "1.3.6.1.1.16.2";
pub const MR_CSN: &str = "csnmatch";
pub const OID_MR_CSN: &str = "1.3.6.1.4.1.4203.666.11.2.2";

// -- the atrium private arc, for schema meta attributes that have no
// standard assignment. 58750 is our pen.

pub const OID_ATTR_ATTRIBUTENAME: &str = "1.3.6.1.4.1.58750.1.1";
pub const OID_ATTR_CLASSNAME: &str = "1.3.6.1.4.1.58750.1.2";
pub const OID_ATTR_SCHEMA_OID: &str = "1.3.6.1.4.1.58750.1.3";
pub const OID_ATTR_SYNTAX: &str = "1.3.6.1.4.1.58750.1.4";
pub const OID_ATTR_MULTIVALUE: &str = "1.3.6.1.4.1.58750.1.5";
pub const OID_ATTR_OPERATIONAL: &str = "1.3.6.1.4.1.58750.1.6";
pub const OID_ATTR_EQUALITY: &str = "1.3.6.1.4.1.58750.1.7";
pub const OID_ATTR_SUP: &str = "1.3.6.1.4.1.58750.1.8";
pub const OID_ATTR_MUST: &str = "1.3.6.1.4.1.58750.1.9";
pub const OID_ATTR_MAY: &str = "1.3.6.1.4.1.58750.1.10";
pub const OID_ATTR_CLASSKIND: &str = "1.3.6.1.4.1.58750.1.11";
pub const OID_CLASS_ATTRIBUTETYPE: &str = "1.3.6.1.4.1.58750.1.20";
pub const OID_CLASS_CLASSTYPE: &str = "1.3.6.1.4.1.58750.1.21";

// -- administrative role values

pub const ROLE_AUTONOMOUS_AREA: &str = "autonomousarea";
pub const ROLE_ACCESS_CONTROL_SPECIFIC_AREA: &str = "accesscontrolspecificarea";
pub const ROLE_ACCESS_CONTROL_INNER_AREA: &str = "accesscontrolinnerarea";
