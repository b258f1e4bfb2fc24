//! The identity that initiated an operation. Access controls are applied to
//! this, and its `Limits` bound how many resources one operation may consume.

use std::collections::BTreeSet;
use std::fmt;
use std::time::Duration;

use uuid::uuid;

use crate::prelude::*;

/// Resource bounds applied to one search. The defaults protect the server
/// from runaway scans; internal operations run unlimited.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Limits {
    pub search_max_results: u64,
    pub search_max_filter_test: u64,
    pub search_time: Duration,
}

impl Default for Limits {
    fn default() -> Self {
        Limits {
            search_max_results: DEFAULT_LIMIT_SEARCH_MAX_RESULTS,
            search_max_filter_test: DEFAULT_LIMIT_SEARCH_MAX_FILTER_TEST,
            search_time: DEFAULT_LIMIT_SEARCH_TIME,
        }
    }
}

impl Limits {
    pub fn unlimited() -> Self {
        Limits {
            search_max_results: u64::MAX,
            search_max_filter_test: u64::MAX,
            search_time: Duration::MAX,
        }
    }
}

/// A bound account. Group membership is resolved once at bind time; the
/// evaluator only ever consults this snapshot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdentUser {
    pub dn: Dn,
    pub uuid: Uuid,
    pub groups: BTreeSet<Dn>,
}

/// The origin of an operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IdentType {
    User(IdentUser),
    Anonymous,
    Internal,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub origin: IdentType,
    pub(crate) session_id: Uuid,
    pub(crate) limits: Limits,
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.origin {
            IdentType::Internal => write!(f, "Internal"),
            IdentType::Anonymous => write!(f, "Anonymous ({})", self.session_id),
            IdentType::User(u) => write!(f, "User( {} ) ({})", u.dn, self.session_id),
        }
    }
}

impl Identity {
    /// Server-origin identity. Bypasses authn and authz by definition, so
    /// it must never be handed to anything driven by client input.
    pub fn from_internal() -> Self {
        Identity {
            origin: IdentType::Internal,
            session_id: uuid!("00000000-0000-0000-0000-000000000000"),
            limits: Limits::unlimited(),
        }
    }

    pub fn from_anonymous(session_id: Uuid) -> Self {
        Identity {
            origin: IdentType::Anonymous,
            session_id,
            limits: Limits::default(),
        }
    }

    pub fn from_user(dn: Dn, uuid: Uuid, groups: BTreeSet<Dn>, session_id: Uuid) -> Self {
        Identity {
            origin: IdentType::User(IdentUser { dn, uuid, groups }),
            session_id,
            limits: Limits::default(),
        }
    }

    pub fn session_id(&self) -> Uuid {
        self.session_id
    }

    pub fn limits(&self) -> &Limits {
        &self.limits
    }

    pub fn is_internal(&self) -> bool {
        matches!(self.origin, IdentType::Internal)
    }

    pub fn is_anonymous(&self) -> bool {
        matches!(self.origin, IdentType::Anonymous)
    }

    /// The admin account and members of the administrators group hold
    /// unconditional rights, including shutdown.
    pub fn is_admin(&self) -> bool {
        match &self.origin {
            IdentType::Internal | IdentType::Anonymous => false,
            IdentType::User(u) => {
                u.dn.norm() == DN_ADMIN
                    || u.groups.iter().any(|g| g.norm() == DN_ADMINISTRATORS)
            }
        }
    }

    pub fn user_dn(&self) -> Option<&Dn> {
        match &self.origin {
            IdentType::Internal | IdentType::Anonymous => None,
            IdentType::User(u) => Some(&u.dn),
        }
    }

    pub fn get_uuid(&self) -> Option<Uuid> {
        match &self.origin {
            IdentType::Internal | IdentType::Anonymous => None,
            IdentType::User(u) => Some(u.uuid),
        }
    }

    pub fn is_memberof(&self, group: &Dn) -> bool {
        match &self.origin {
            IdentType::Internal | IdentType::Anonymous => false,
            IdentType::User(u) => u.groups.contains(group),
        }
    }

    /// The name stamped into `creatorsName`/`modifiersName` for writes made
    /// under this identity.
    pub fn stamp_name(&self) -> &str {
        match &self.origin {
            IdentType::Internal => DN_ADMIN,
            IdentType::Anonymous => "",
            IdentType::User(u) => u.dn.norm(),
        }
    }

    #[cfg(test)]
    pub(crate) fn from_impersonate_user(dn: Dn, groups: BTreeSet<Dn>) -> Self {
        Identity {
            origin: IdentType::User(IdentUser {
                dn,
                uuid: Uuid::new_v4(),
                groups,
            }),
            session_id: Uuid::new_v4(),
            limits: Limits::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;

    use crate::prelude::*;

    #[test]
    fn test_identity_admin_by_account_or_group() {
        let schema = Schema::new().expect("failed to bootstrap schema");
        let sr = schema.read();

        let admin = Dn::parse(DN_ADMIN, &sr).expect("failed to parse dn");
        let i = Identity::from_impersonate_user(admin, BTreeSet::new());
        assert!(i.is_admin());

        let user = Dn::parse("uid=claire,ou=users,ou=system", &sr).expect("failed to parse dn");
        let i = Identity::from_impersonate_user(user.clone(), BTreeSet::new());
        assert!(!i.is_admin());

        let admins = Dn::parse(DN_ADMINISTRATORS, &sr).expect("failed to parse dn");
        let mut groups = BTreeSet::new();
        groups.insert(admins);
        let i = Identity::from_impersonate_user(user, groups);
        assert!(i.is_admin());
    }

    #[test]
    fn test_identity_internal_is_not_admin_user() {
        let i = Identity::from_internal();
        assert!(i.is_internal());
        assert!(!i.is_admin());
        assert!(i.user_dn().is_none());
        assert_eq!(i.limits().search_max_results, u64::MAX);
    }

    #[test]
    fn test_identity_anonymous() {
        let i = Identity::from_anonymous(Uuid::new_v4());
        assert!(i.is_anonymous());
        assert!(!i.is_internal());
        assert!(!i.is_admin());
        assert_eq!(
            i.limits().search_max_results,
            DEFAULT_LIMIT_SEARCH_MAX_RESULTS
        );
    }
}
