//! Because consistency is great!
//!
//! Names shared between the server core, front-ends and tests. Attribute and
//! class names are matched case-insensitively by the server; the constants
//! here are the canonical (lowercase) spellings.

use std::time::Duration;

// IF YOU CHANGE THESE VALUES YOU BREAK EVERYTHING
pub const ATTR_OBJECTCLASS: &str = "objectclass";
pub const ATTR_OU: &str = "ou";
pub const ATTR_O: &str = "o";
pub const ATTR_CN: &str = "cn";
pub const ATTR_SN: &str = "sn";
pub const ATTR_UID: &str = "uid";
pub const ATTR_DC: &str = "dc";
pub const ATTR_DESCRIPTION: &str = "description";
pub const ATTR_DISPLAY_NAME: &str = "displayname";
pub const ATTR_GIVEN_NAME: &str = "givenname";
pub const ATTR_MAIL: &str = "mail";
pub const ATTR_MEMBER: &str = "member";
pub const ATTR_SEE_ALSO: &str = "seealso";
pub const ATTR_TELEPHONE_NUMBER: &str = "telephonenumber";
pub const ATTR_USER_PASSWORD: &str = "userpassword";

// Operational attributes. Maintained by the server, never writable by a
// client directly.
pub const ATTR_CREATE_TIMESTAMP: &str = "createtimestamp";
pub const ATTR_CREATORS_NAME: &str = "creatorsname";
pub const ATTR_MODIFY_TIMESTAMP: &str = "modifytimestamp";
pub const ATTR_MODIFIERS_NAME: &str = "modifiersname";
pub const ATTR_ENTRY_UUID: &str = "entryuuid";
pub const ATTR_ENTRY_CSN: &str = "entrycsn";

// Administrative model attributes.
pub const ATTR_ADMINISTRATIVE_ROLE: &str = "administrativerole";
pub const ATTR_PRESCRIPTIVE_ACI: &str = "prescriptiveaci";
pub const ATTR_SUBTREE_SPECIFICATION: &str = "subtreespecification";

// Schema definition entries under ou=schema describe themselves with these.
pub const ATTR_ATTRIBUTE_NAME: &str = "attributename";
pub const ATTR_CLASS_NAME: &str = "classname";
pub const ATTR_OID: &str = "oid";
pub const ATTR_SYNTAX: &str = "syntax";
pub const ATTR_MULTIVALUE: &str = "multivalue";
pub const ATTR_OPERATIONAL: &str = "operational";
pub const ATTR_EQUALITY: &str = "equality";
pub const ATTR_SUP: &str = "sup";
pub const ATTR_MUST: &str = "must";
pub const ATTR_MAY: &str = "may";
pub const ATTR_CLASS_KIND: &str = "classkind";

pub const CLASS_TOP: &str = "top";
pub const CLASS_ORGANIZATIONAL_UNIT: &str = "organizationalunit";
pub const CLASS_ORGANIZATION: &str = "organization";
pub const CLASS_PERSON: &str = "person";
pub const CLASS_ORGANIZATIONAL_PERSON: &str = "organizationalperson";
pub const CLASS_INET_ORG_PERSON: &str = "inetorgperson";
pub const CLASS_GROUP_OF_NAMES: &str = "groupofnames";
pub const CLASS_DOMAIN: &str = "domain";
pub const CLASS_SUBENTRY: &str = "subentry";
pub const CLASS_ACCESS_CONTROL_SUBENTRY: &str = "accesscontrolsubentry";
pub const CLASS_EXTENSIBLE_OBJECT: &str = "extensibleobject";
pub const CLASS_ACCOUNT: &str = "account";
pub const CLASS_ATTRIBUTE_TYPE: &str = "attributetype";
pub const CLASS_CLASS_TYPE: &str = "classtype";

/// The naming context of the system partition.
pub const DN_SYSTEM: &str = "ou=system";
/// The administrator account. Sessions bound as this principal bypass
/// access-control evaluation.
pub const DN_ADMIN: &str = "uid=admin,ou=system";
/// Container for the schema subentries inside the system partition.
pub const DN_SCHEMA: &str = "ou=schema,ou=system";
/// Container for group entries inside the system partition.
pub const DN_GROUPS: &str = "ou=groups,ou=system";
/// Container for user entries inside the system partition.
pub const DN_USERS: &str = "ou=users,ou=system";
/// Members of this group hold the same rights as the admin account.
pub const DN_ADMINISTRATORS: &str = "cn=administrators,ou=groups,ou=system";

/// Default bound on entries returned by one search.
pub const DEFAULT_LIMIT_SEARCH_MAX_RESULTS: u64 = 256;
/// Default bound on candidate entries tested by one search scan.
pub const DEFAULT_LIMIT_SEARCH_MAX_FILTER_TEST: u64 = 512;
/// Default wall-clock bound on one search scan.
pub const DEFAULT_LIMIT_SEARCH_TIME: Duration = Duration::from_secs(30);

/// Default delay granted to sessions to acknowledge a disconnect notice
/// during graceful shutdown.
pub const DEFAULT_GRACEFUL_SHUTDOWN_DELAY: Duration = Duration::from_secs(5);

/// Default refresh interval for a replication consumer.
pub const DEFAULT_REPL_REFRESH_INTERVAL: Duration = Duration::from_secs(60);
