//! Permission enforcement. Runs after authentication so the acting identity
//! is settled; internal operations bypass this stage by name. Writes are
//! checked before anything happens. Searches are checked both ways: the
//! base up front, then every candidate entry and attribute on the way out,
//! so a result can only shrink below this stage.

use std::collections::BTreeSet;
use std::sync::Arc;

use crate::event::{
    AddEvent, CompareEvent, DeleteEvent, ModifyEvent, MoveAndRenameEvent, MoveEvent, RenameEvent,
    SearchEvent, SearchReply,
};
use crate::interceptor::{Interceptor, Next, INTERCEPTOR_AUTHZ};
use crate::prelude::*;
use crate::server::access::aci::Permission;
use crate::server::access::AccessControls;

pub struct Authorization {
    access: Arc<AccessControls>,
}

impl Authorization {
    pub fn new(access: Arc<AccessControls>) -> Self {
        Authorization { access }
    }

    fn require(
        &self,
        ident: &Identity,
        perm: Permission,
        target: &Dn,
        attr: Option<&str>,
    ) -> Result<(), OperationError> {
        if self
            .access
            .read()
            .check_permission(ident, perm, target, attr)
        {
            Ok(())
        } else {
            Err(OperationError::AuthorizationDenied)
        }
    }
}

impl Interceptor for Authorization {
    fn name(&self) -> &'static str {
        INTERCEPTOR_AUTHZ
    }

    fn add(&self, ev: &mut AddEvent, next: Next<'_>) -> Result<(), OperationError> {
        self.require(
            &ev.op.ident,
            Permission::Add,
            ev.entry.resolved()?.dn(),
            None,
        )?;
        next.add(ev)
    }

    fn delete(&self, ev: &mut DeleteEvent, next: Next<'_>) -> Result<(), OperationError> {
        self.require(&ev.op.ident, Permission::Remove, ev.target.resolved()?, None)?;
        next.delete(ev)
    }

    fn modify(&self, ev: &mut ModifyEvent, next: Next<'_>) -> Result<(), OperationError> {
        let target = ev.target.resolved()?;
        for m in ev.modlist.resolved()?.iter() {
            self.require(
                &ev.op.ident,
                Permission::Modify,
                target,
                Some(m.attr().as_str()),
            )?;
        }
        next.modify(ev)
    }

    fn search(&self, ev: &mut SearchEvent, next: Next<'_>) -> Result<SearchReply, OperationError> {
        self.require(&ev.op.ident, Permission::Browse, ev.base.resolved()?, None)?;
        let mut reply = next.search(ev)?;
        let rd = self.access.read();
        let ident = &ev.op.ident;
        reply.entries = reply
            .entries
            .iter()
            .filter(|e| rd.check_permission(ident, Permission::Browse, e.dn(), None))
            .map(|e| {
                let attrs: BTreeSet<AttrString> =
                    e.attribute_names().map(|a| attr_fold(a)).collect();
                let readable = rd.reduce_read_attributes(ident, e.dn(), &attrs);
                e.reduce_attributes(&readable)
            })
            .collect();
        Ok(reply)
    }

    fn compare(&self, ev: &mut CompareEvent, next: Next<'_>) -> Result<bool, OperationError> {
        self.require(
            &ev.op.ident,
            Permission::Compare,
            ev.target.resolved()?,
            Some(ev.attr.as_str()),
        )?;
        next.compare(ev)
    }

    fn rename(&self, ev: &mut RenameEvent, next: Next<'_>) -> Result<Dn, OperationError> {
        self.require(&ev.op.ident, Permission::Rename, ev.target.resolved()?, None)?;
        next.rename(ev)
    }

    fn move_subtree(&self, ev: &mut MoveEvent, next: Next<'_>) -> Result<Dn, OperationError> {
        self.require(&ev.op.ident, Permission::Export, ev.target.resolved()?, None)?;
        self.require(
            &ev.op.ident,
            Permission::Import,
            ev.new_superior.resolved()?,
            None,
        )?;
        next.move_subtree(ev)
    }

    fn move_and_rename(
        &self,
        ev: &mut MoveAndRenameEvent,
        next: Next<'_>,
    ) -> Result<Dn, OperationError> {
        self.require(&ev.op.ident, Permission::Rename, ev.target.resolved()?, None)?;
        self.require(&ev.op.ident, Permission::Export, ev.target.resolved()?, None)?;
        self.require(
            &ev.op.ident,
            Permission::Import,
            ev.new_superior.resolved()?,
            None,
        )?;
        next.move_and_rename(ev)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;
    use std::sync::Arc;

    use atrium_proto::message::{
        ProtoEntry, ProtoFilter, ProtoModify, ProtoModifyList, ProtoSearchScope,
    };

    use super::*;
    use crate::interceptor::{InterceptorChain, Normalization};
    use crate::partition::{BtreePartition, Partition, PartitionNexus};
    use crate::schema::{Schema, SchemaReadTransaction};
    use crate::server::access::aci::AciItem;
    use crate::server::access::AccessArea;

    const BROWSE_READ_ACI: &str = r#"{ identificationTag "anonBrowse", precedence 10, authenticationLevel none, itemOrUserFirst userFirst: { userClasses { allUsers }, userPermissions { { protectedItems {entry, allUserAttributeTypesAndValues}, grantsAndDenials { grantBrowse, grantRead } } } } }"#;

    fn ou_entry(sr: &SchemaReadTransaction, dn: &str, ou: &str) -> Entry {
        let mut e = Entry::new(Dn::parse(dn, sr).expect("failed to parse dn"));
        e.add_ava(ATTR_OBJECTCLASS, Value::new_iutf8(CLASS_TOP))
            .expect("wrong family");
        e.add_ava(ATTR_OBJECTCLASS, Value::new_iutf8(CLASS_ORGANIZATIONAL_UNIT))
            .expect("wrong family");
        e.add_ava(ATTR_OU, Value::new_iutf8(ou)).expect("wrong family");
        e
    }

    fn install(
        access: &AccessControls,
        sr: &SchemaReadTransaction,
        point: &str,
        items: &[&str],
    ) -> Uuid {
        let uuid = Uuid::new_v4();
        let subentry = Dn::parse(&format!("cn=area,{}", point), sr).expect("failed to parse dn");
        let point = Dn::parse(point, sr).expect("failed to parse dn");
        let area = AccessArea {
            point,
            subentry,
            items: items
                .iter()
                .map(|raw| AciItem::parse(raw, sr).expect("failed to parse item"))
                .collect(),
        };
        let mut wr = access.write();
        wr.update_subentry(uuid, area);
        wr.commit();
        uuid
    }

    fn chain_fixture(
        schema: &Arc<Schema>,
    ) -> (InterceptorChain, Arc<AccessControls>, Arc<PartitionNexus>) {
        let sr = schema.read();
        let suffix = Dn::parse(DN_SYSTEM, &sr).expect("failed to parse dn");
        let p = BtreePartition::new(suffix, schema.clone());
        p.add(ou_entry(&sr, DN_SYSTEM, "system"))
            .expect("failed to add suffix entry");
        let nexus = Arc::new(PartitionNexus::new());
        nexus.mount(Arc::new(p)).expect("failed to mount partition");

        let access = Arc::new(AccessControls::default());
        let chain = InterceptorChain::new(nexus.clone());
        chain
            .append(Arc::new(Normalization::new(schema.clone())))
            .expect("failed to append stage");
        chain
            .append(Arc::new(Authorization::new(access.clone())))
            .expect("failed to append stage");
        (chain, access, nexus)
    }

    fn proto_ou(dn: &str, ou: &str) -> ProtoEntry {
        ProtoEntry {
            dn: dn.to_string(),
            attrs: BTreeMap::from([
                (
                    ATTR_OBJECTCLASS.to_string(),
                    vec![CLASS_TOP.to_string(), CLASS_ORGANIZATIONAL_UNIT.to_string()],
                ),
                (ATTR_OU.to_string(), vec![ou.to_string()]),
            ]),
        }
    }

    #[test]
    fn test_authz_stage_denies_without_grant() {
        let schema = Arc::new(Schema::new().expect("failed to bootstrap schema"));
        let (chain, _access, nexus) = chain_fixture(&schema);

        let mut ev = AddEvent::from_message(
            Identity::from_anonymous(Uuid::new_v4()),
            proto_ou("ou=people,ou=system", "people"),
        );
        assert_eq!(chain.add(&mut ev), Err(OperationError::AuthorizationDenied));

        let sr = schema.read();
        let dn = Dn::parse("ou=people,ou=system", &sr).expect("failed to parse dn");
        assert!(!nexus.exists(&dn));
    }

    #[test]
    fn test_authz_stage_grants_add() {
        let schema = Arc::new(Schema::new().expect("failed to bootstrap schema"));
        let sr = schema.read();
        let (chain, access, nexus) = chain_fixture(&schema);

        let add_aci = r#"{ identificationTag "addAci", precedence 14, authenticationLevel none, itemOrUserFirst userFirst: { userClasses { allUsers }, userPermissions { { protectedItems {entry, allUserAttributeTypesAndValues}, grantsAndDenials { grantAdd, grantBrowse } } } } }"#;
        install(&access, &sr, DN_SYSTEM, &[add_aci]);

        let mut ev = AddEvent::from_message(
            Identity::from_anonymous(Uuid::new_v4()),
            proto_ou("ou=people,ou=system", "people"),
        );
        chain.add(&mut ev).expect("failed to add entry");

        let dn = Dn::parse("ou=people,ou=system", &sr).expect("failed to parse dn");
        assert!(nexus.exists(&dn));
    }

    #[test]
    fn test_authz_stage_checks_each_modified_attribute() {
        let schema = Arc::new(Schema::new().expect("failed to bootstrap schema"));
        let sr = schema.read();
        let (chain, access, nexus) = chain_fixture(&schema);

        let mut ev = AddEvent::new_internal(ou_entry(
            &sr,
            "ou=people,ou=system",
            "people",
        ));
        chain.add(&mut ev).expect("failed to add entry");

        let desc_only = r#"{ identificationTag "descOnly", precedence 10, authenticationLevel none, itemOrUserFirst userFirst: { userClasses { allUsers }, userPermissions { { protectedItems { attributeType { description } }, grantsAndDenials { grantModify } } } } }"#;
        install(&access, &sr, DN_SYSTEM, &[desc_only]);

        let pl = ProtoModifyList::new_list(vec![ProtoModify::add(ATTR_DESCRIPTION, "our people")]);
        let mut ev = ModifyEvent::from_message(
            Identity::from_anonymous(Uuid::new_v4()),
            "ou=people,ou=system".to_string(),
            pl,
        );
        chain.modify(&mut ev).expect("failed to modify entry");

        let pl = ProtoModifyList::new_list(vec![
            ProtoModify::add(ATTR_DESCRIPTION, "still fine"),
            ProtoModify::add(ATTR_SEE_ALSO, "ou=system"),
        ]);
        let mut ev = ModifyEvent::from_message(
            Identity::from_anonymous(Uuid::new_v4()),
            "ou=people,ou=system".to_string(),
            pl,
        );
        assert_eq!(
            chain.modify(&mut ev),
            Err(OperationError::AuthorizationDenied)
        );

        // The denied list must not have been applied at all.
        let dn = Dn::parse("ou=people,ou=system", &sr).expect("failed to parse dn");
        let entry = nexus.lookup(&dn).expect("failed to lookup entry");
        assert!(!entry.attribute_equality(
            ATTR_DESCRIPTION,
            &PartialValue::new_utf8s("still fine")
        ));
    }

    #[test]
    fn test_authz_stage_reduces_search_results() {
        let schema = Arc::new(Schema::new().expect("failed to bootstrap schema"));
        let sr = schema.read();
        let (chain, access, _nexus) = chain_fixture(&schema);

        for (dn, ou) in [
            ("ou=people,ou=system", "people"),
            ("ou=secret,ou=system", "secret"),
        ] {
            let mut ev = AddEvent::new_internal(ou_entry(&sr, dn, ou));
            chain.add(&mut ev).expect("failed to add entry");
        }

        // Browse everywhere under the suffix, but under ou=secret a deeper
        // administrative point is in force that grants nothing.
        install(&access, &sr, DN_SYSTEM, &[BROWSE_READ_ACI]);
        let unrelated = r#"{ identificationTag "vault", precedence 10, authenticationLevel none, itemOrUserFirst userFirst: { userClasses { allUsers }, userPermissions { { protectedItems {entry}, grantsAndDenials { grantAdd } } } } }"#;
        install(&access, &sr, "ou=secret,ou=system", &[unrelated]);

        let mut ev = SearchEvent::from_message(
            Identity::from_anonymous(Uuid::new_v4()),
            DN_SYSTEM.to_string(),
            ProtoSearchScope::Subtree,
            ProtoFilter::Pres(ATTR_OBJECTCLASS.to_string()),
            Vec::new(),
            None,
            None,
        );
        let reply = chain.search(&mut ev).expect("failed to search");
        let dns: Vec<&str> = reply.entries.iter().map(|e| e.dn().norm()).collect();
        assert!(dns.contains(&"ou=system"));
        assert!(dns.contains(&"ou=people,ou=system"));
        assert!(!dns.contains(&"ou=secret,ou=system"));
    }

    #[test]
    fn test_authz_stage_reduces_readable_attributes() {
        let schema = Arc::new(Schema::new().expect("failed to bootstrap schema"));
        let sr = schema.read();
        let (chain, access, _nexus) = chain_fixture(&schema);

        let mut ev = AddEvent::new_internal(ou_entry(
            &sr,
            "ou=people,ou=system",
            "people",
        ));
        chain.add(&mut ev).expect("failed to add entry");

        let ou_only = r#"{ identificationTag "ouOnly", precedence 10, authenticationLevel none, itemOrUserFirst userFirst: { userClasses { allUsers }, userPermissions { { protectedItems {entry, attributeType { ou }}, grantsAndDenials { grantBrowse, grantRead } } } } }"#;
        install(&access, &sr, DN_SYSTEM, &[ou_only]);

        let mut ev = SearchEvent::from_message(
            Identity::from_anonymous(Uuid::new_v4()),
            "ou=people,ou=system".to_string(),
            ProtoSearchScope::Base,
            ProtoFilter::Pres(ATTR_OU.to_string()),
            Vec::new(),
            None,
            None,
        );
        let reply = chain.search(&mut ev).expect("failed to search");
        assert_eq!(reply.entries.len(), 1);
        let entry = &reply.entries[0];
        assert!(entry.attribute_pres(ATTR_OU));
        assert!(!entry.attribute_pres(ATTR_OBJECTCLASS));
    }

    #[test]
    fn test_authz_stage_denies_unbrowsable_base() {
        let schema = Arc::new(Schema::new().expect("failed to bootstrap schema"));
        let (chain, _access, _nexus) = chain_fixture(&schema);

        let mut ev = SearchEvent::from_message(
            Identity::from_anonymous(Uuid::new_v4()),
            DN_SYSTEM.to_string(),
            ProtoSearchScope::Subtree,
            ProtoFilter::Pres(ATTR_OBJECTCLASS.to_string()),
            Vec::new(),
            None,
            None,
        );
        assert_eq!(
            chain.search(&mut ev),
            Err(OperationError::AuthorizationDenied)
        );
    }

    #[test]
    fn test_authz_stage_move_needs_both_ends() {
        let schema = Arc::new(Schema::new().expect("failed to bootstrap schema"));
        let sr = schema.read();
        let (chain, access, nexus) = chain_fixture(&schema);

        for (dn, ou) in [
            ("ou=src,ou=system", "src"),
            ("ou=box,ou=src,ou=system", "box"),
            ("ou=dst,ou=system", "dst"),
        ] {
            let mut ev = AddEvent::new_internal(ou_entry(&sr, dn, ou));
            chain.add(&mut ev).expect("failed to add entry");
        }

        // Export is granted at the source point only; the destination point
        // shadows it and grants nothing, so the import leg is refused.
        let export = r#"{ identificationTag "out", precedence 10, authenticationLevel none, itemOrUserFirst userFirst: { userClasses { allUsers }, userPermissions { { protectedItems {entry}, grantsAndDenials { grantExport } } } } }"#;
        install(&access, &sr, "ou=src,ou=system", &[export]);
        let unrelated = r#"{ identificationTag "closed", precedence 10, authenticationLevel none, itemOrUserFirst userFirst: { userClasses { allUsers }, userPermissions { { protectedItems {entry}, grantsAndDenials { grantBrowse } } } } }"#;
        let dst_uuid = install(&access, &sr, "ou=dst,ou=system", &[unrelated]);

        let mut ev = MoveEvent::from_message(
            Identity::from_anonymous(Uuid::new_v4()),
            "ou=box,ou=src,ou=system".to_string(),
            "ou=dst,ou=system".to_string(),
        );
        assert_eq!(
            chain.move_subtree(&mut ev),
            Err(OperationError::AuthorizationDenied)
        );

        // Re-prescribe the destination with import and the move goes through.
        let import = r#"{ identificationTag "open", precedence 10, authenticationLevel none, itemOrUserFirst userFirst: { userClasses { allUsers }, userPermissions { { protectedItems {entry}, grantsAndDenials { grantImport } } } } }"#;
        let area = AccessArea {
            point: Dn::parse("ou=dst,ou=system", &sr).expect("failed to parse dn"),
            subentry: Dn::parse("cn=area,ou=dst,ou=system", &sr).expect("failed to parse dn"),
            items: vec![AciItem::parse(import, &sr).expect("failed to parse item")],
        };
        let mut wr = access.write();
        wr.update_subentry(dst_uuid, area);
        wr.commit();

        let mut ev = MoveEvent::from_message(
            Identity::from_anonymous(Uuid::new_v4()),
            "ou=box,ou=src,ou=system".to_string(),
            "ou=dst,ou=system".to_string(),
        );
        let moved = chain.move_subtree(&mut ev).expect("failed to move entry");
        assert_eq!(moved.norm(), "ou=box,ou=dst,ou=system");
        assert!(nexus.exists(&moved));
    }
}
