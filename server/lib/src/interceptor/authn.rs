//! Simple bind handling. A bind terminates here: the stage either mints the
//! session's new identity or refuses, and the outcome never reaches the
//! stages below. Every refusal is the same error, so a caller cannot probe
//! which names exist.

use std::collections::BTreeSet;
use std::sync::Arc;

use crate::event::BindEvent;
use crate::filter::{Filter, SearchScope};
use crate::interceptor::{Interceptor, Next, INTERCEPTOR_AUTHN};
use crate::partition::PartitionNexus;
use crate::prelude::*;

pub struct Authentication {
    nexus: Arc<PartitionNexus>,
}

impl Authentication {
    pub fn new(nexus: Arc<PartitionNexus>) -> Self {
        Authentication { nexus }
    }

    /// Groups naming this entry as a member. Resolved once here; the minted
    /// identity carries the snapshot for its whole session.
    fn groups_of(&self, dn: &Dn, ctime: Duration) -> BTreeSet<Dn> {
        let filter = Filter::And(vec![
            Filter::eq(
                ATTR_OBJECTCLASS,
                PartialValue::new_iutf8(CLASS_GROUP_OF_NAMES),
            ),
            Filter::eq(ATTR_MEMBER, PartialValue::new_dn(dn.norm().to_string())),
        ]);
        let limits = Limits::unlimited();
        let mut groups = BTreeSet::new();
        for base in self.nexus.naming_contexts() {
            match self
                .nexus
                .search(&base, SearchScope::Subtree, &filter, &limits, ctime)
            {
                Ok(outcome) => {
                    groups.extend(outcome.entries.iter().map(|e| e.dn().clone()));
                }
                Err(e) => {
                    // Memberships this bind cannot see weaken it, they do
                    // not block it.
                    admin_warn!(?e, base = %base, "Unable to resolve group memberships");
                }
            }
        }
        groups
    }
}

impl Interceptor for Authentication {
    fn name(&self) -> &'static str {
        INTERCEPTOR_AUTHN
    }

    fn bind(&self, ev: &mut BindEvent, _next: Next<'_>) -> Result<Identity, OperationError> {
        let dn = ev.target.resolved()?;
        let session_id = ev.op.ident.session_id();

        if dn.is_root() {
            // An empty name with an empty credential is the anonymous bind.
            if ev.credential.is_empty() {
                security_info!(%session_id, "Anonymous bind");
                return Ok(Identity::from_anonymous(session_id));
            }
            security_error!(%session_id, "Credential presented with an empty bind name");
            return Err(OperationError::AuthenticationFailure);
        }

        let entry = self.nexus.lookup(dn).map_err(|_| {
            security_error!(name = %dn, "Bind to an unknown name");
            OperationError::AuthenticationFailure
        })?;

        if !entry.attribute_equality(ATTR_USER_PASSWORD, &PartialValue::new_secret(&ev.credential))
        {
            security_error!(name = %dn, "Bind credential verification failed");
            return Err(OperationError::AuthenticationFailure);
        }

        let uuid = entry.get_uuid().ok_or_else(|| {
            admin_error!(name = %dn, "Stored entry is missing its uuid stamp");
            OperationError::InvalidState
        })?;
        let groups = self.groups_of(dn, ev.op.ctime);
        security_info!(name = %dn, "Bind succeeded");
        Ok(Identity::from_user(dn.clone(), uuid, groups, session_id))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::event::BindEvent;
    use crate::interceptor::{InterceptorChain, Normalization};
    use crate::partition::{BtreePartition, Partition};
    use crate::schema::{Schema, SchemaReadTransaction};

    fn ou_entry(sr: &SchemaReadTransaction, dn: &str, ou: &str) -> Entry {
        let mut e = Entry::new(Dn::parse(dn, sr).expect("failed to parse dn"));
        e.add_ava(ATTR_OBJECTCLASS, Value::new_iutf8(CLASS_TOP))
            .expect("wrong family");
        e.add_ava(ATTR_OBJECTCLASS, Value::new_iutf8(CLASS_ORGANIZATIONAL_UNIT))
            .expect("wrong family");
        e.add_ava(ATTR_OU, Value::new_iutf8(ou)).expect("wrong family");
        e
    }

    fn account_entry(sr: &SchemaReadTransaction, dn: &str, uid: &str, password: &str) -> Entry {
        let mut e = Entry::new(Dn::parse(dn, sr).expect("failed to parse dn"));
        e.add_ava(ATTR_OBJECTCLASS, Value::new_iutf8(CLASS_TOP))
            .expect("wrong family");
        e.add_ava(ATTR_OBJECTCLASS, Value::new_iutf8(CLASS_ACCOUNT))
            .expect("wrong family");
        e.add_ava(ATTR_UID, Value::new_utf8s(uid))
            .expect("wrong family");
        e.add_ava(ATTR_USER_PASSWORD, Value::new_secret(password))
            .expect("wrong family");
        e.add_ava(ATTR_ENTRY_UUID, Value::new_uuid(Uuid::new_v4()))
            .expect("wrong family");
        e
    }

    fn chain_fixture(schema: &Arc<Schema>) -> InterceptorChain {
        let sr = schema.read();
        let suffix = Dn::parse(DN_SYSTEM, &sr).expect("failed to parse dn");
        let p = BtreePartition::new(suffix, schema.clone());
        p.add(ou_entry(&sr, DN_SYSTEM, "system"))
            .expect("failed to add suffix entry");
        p.add(account_entry(
            &sr,
            "uid=claire,ou=system",
            "claire",
            "meadows-42",
        ))
        .expect("failed to add account");
        p.add(ou_entry(&sr, DN_GROUPS, "groups"))
            .expect("failed to add groups ou");

        let staff_dn = Dn::parse("cn=staff,ou=groups,ou=system", &sr).expect("failed to parse dn");
        let mut group = Entry::new(staff_dn);
        group
            .add_ava(ATTR_OBJECTCLASS, Value::new_iutf8(CLASS_TOP))
            .expect("wrong family");
        group
            .add_ava(ATTR_OBJECTCLASS, Value::new_iutf8(CLASS_GROUP_OF_NAMES))
            .expect("wrong family");
        group
            .add_ava(ATTR_CN, Value::new_utf8s("staff"))
            .expect("wrong family");
        group
            .add_ava(ATTR_MEMBER, Value::new_dn("uid=claire,ou=system".to_string()))
            .expect("wrong family");
        p.add(group).expect("failed to add group");

        let nexus = Arc::new(PartitionNexus::new());
        nexus.mount(Arc::new(p)).expect("failed to mount partition");
        let chain = InterceptorChain::new(nexus.clone());
        chain
            .append(Arc::new(Normalization::new(schema.clone())))
            .expect("failed to append stage");
        chain
            .append(Arc::new(Authentication::new(nexus)))
            .expect("failed to append stage");
        chain
    }

    fn bind(chain: &InterceptorChain, dn: &str, credential: &str) -> Result<Identity, OperationError> {
        let mut ev = BindEvent::from_message(
            Identity::from_anonymous(Uuid::new_v4()),
            dn.to_string(),
            credential.to_string(),
        );
        chain.bind(&mut ev)
    }

    #[test]
    fn test_authn_stage_anonymous_bind() {
        let schema = Arc::new(Schema::new().expect("failed to bootstrap schema"));
        let chain = chain_fixture(&schema);

        let ident = bind(&chain, "", "").expect("anonymous bind refused");
        assert!(ident.is_anonymous());

        // A credential with no name is not anonymous, it is wrong.
        assert_eq!(
            bind(&chain, "", "meadows-42"),
            Err(OperationError::AuthenticationFailure)
        );
    }

    #[test]
    fn test_authn_stage_verifies_credential() {
        let schema = Arc::new(Schema::new().expect("failed to bootstrap schema"));
        let chain = chain_fixture(&schema);

        let ident = bind(&chain, "UID=Claire, OU=System", "meadows-42").expect("bind refused");
        let dn = ident.user_dn().expect("no user dn");
        assert_eq!(dn.norm(), "uid=claire,ou=system");

        assert_eq!(
            bind(&chain, "uid=claire,ou=system", "wrong"),
            Err(OperationError::AuthenticationFailure)
        );
    }

    #[test]
    fn test_authn_stage_does_not_disclose_unknown_names() {
        let schema = Arc::new(Schema::new().expect("failed to bootstrap schema"));
        let chain = chain_fixture(&schema);

        // Unknown name and wrong credential are indistinguishable.
        assert_eq!(
            bind(&chain, "uid=nobody,ou=system", "meadows-42"),
            Err(OperationError::AuthenticationFailure)
        );
        assert_eq!(
            bind(&chain, "uid=claire,ou=system", "wrong"),
            Err(OperationError::AuthenticationFailure)
        );
    }

    #[test]
    fn test_authn_stage_resolves_groups() {
        let schema = Arc::new(Schema::new().expect("failed to bootstrap schema"));
        let sr = schema.read();
        let chain = chain_fixture(&schema);

        let ident = bind(&chain, "uid=claire,ou=system", "meadows-42").expect("bind refused");
        let staff = Dn::parse("cn=staff,ou=groups,ou=system", &sr).expect("failed to parse dn");
        let other = Dn::parse("cn=other,ou=groups,ou=system", &sr).expect("failed to parse dn");
        assert!(ident.is_memberof(&staff));
        assert!(!ident.is_memberof(&other));
        assert!(!ident.is_admin());
    }

    #[test]
    fn test_authn_stage_refuses_entry_without_credential() {
        let schema = Arc::new(Schema::new().expect("failed to bootstrap schema"));
        let chain = chain_fixture(&schema);

        // The groups ou exists but carries no userPassword at all.
        assert_eq!(
            bind(&chain, DN_GROUPS, "anything"),
            Err(OperationError::AuthenticationFailure)
        );
    }
}
