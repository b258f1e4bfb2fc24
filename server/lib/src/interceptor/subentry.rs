//! Administrative-area maintenance. An access-control subentry carries
//! `prescriptiveACI` text; this stage keeps the parsed form in the evaluator
//! cache in step with the stored entries. Every item parses *before* the
//! write is applied, so one malformed value rejects the whole operation and
//! the evaluator never holds half an area. Subentries are administrative
//! plumbing: plain searches skip them unless the request asks, either by
//! basing at the subentry itself or by naming the subentry class in the
//! filter.

use std::sync::Arc;

use crate::event::{
    AddEvent, DeleteEvent, ModifyEvent, MoveAndRenameEvent, MoveEvent, RenameEvent, SearchEvent,
    SearchReply,
};
use crate::interceptor::{Interceptor, Next, INTERCEPTOR_SUBENTRY};
use crate::partition::PartitionNexus;
use crate::prelude::*;
use crate::schema::Schema;
use crate::server::access::aci::AciItem;
use crate::server::access::{AccessArea, AccessControls};

pub struct SubentryManager {
    schema: Arc<Schema>,
    access: Arc<AccessControls>,
    nexus: Arc<PartitionNexus>,
}

impl SubentryManager {
    pub fn new(
        schema: Arc<Schema>,
        access: Arc<AccessControls>,
        nexus: Arc<PartitionNexus>,
    ) -> Self {
        SubentryManager {
            schema,
            access,
            nexus,
        }
    }

    fn entry_is_subentry(entry: &Entry, sr: &(impl SchemaTransaction + ?Sized)) -> bool {
        entry
            .get_ava_iter_iutf8(ATTR_OBJECTCLASS)
            .map(|mut classes| {
                classes.any(|c| sr.is_descendant(c, CLASS_SUBENTRY).unwrap_or(false))
            })
            .unwrap_or(false)
    }

    fn is_subentry(&self, entry: &Entry) -> bool {
        let sr = self.schema.read();
        Self::entry_is_subentry(entry, &sr)
    }

    /// The auxiliary class is what makes a subentry prescribe access
    /// controls. A subentry without it is still hidden and placement
    /// checked, but installs nothing.
    fn is_access_control_subentry(entry: &Entry) -> bool {
        entry.attribute_equality(
            ATTR_OBJECTCLASS,
            &PartialValue::new_iutf8(CLASS_ACCESS_CONTROL_SUBENTRY),
        )
    }

    fn parse_items(&self, entry: &Entry) -> Result<Vec<AciItem>, OperationError> {
        let sr = self.schema.read();
        entry
            .get_ava(ATTR_PRESCRIPTIVE_ACI)
            .and_then(|vs| vs.as_str_iter())
            .map(|texts| texts.map(|t| AciItem::parse(t, &sr)).collect())
            .unwrap_or_else(|| Ok(Vec::new()))
    }

    /// Subentries hang directly off an administrative point.
    fn require_admin_point(&self, point: &Dn, subentry: &Dn) -> Result<(), OperationError> {
        let entry = self.nexus.lookup(point)?;
        if entry.attribute_pres(ATTR_ADMINISTRATIVE_ROLE) {
            Ok(())
        } else {
            request_error!(
                name = %subentry,
                parent = %point,
                "Subentries may only sit under an administrative point"
            );
            Err(OperationError::NamingViolation(point.norm().to_string()))
        }
    }

    fn admin_point_of(&self, dn: &Dn) -> Result<Dn, OperationError> {
        let parent = dn.parent().ok_or_else(|| {
            request_error!(name = %dn, "A subentry cannot be a naming context root");
            OperationError::NamingViolation(dn.norm().to_string())
        })?;
        self.require_admin_point(&parent, dn)?;
        Ok(parent)
    }

    /// Everything needed to install the area for `entry`, or `None` when the
    /// entry prescribes nothing. Placement is checked for every subentry so
    /// a plain one cannot sit outside an administrative area either.
    fn stage(&self, entry: &Entry) -> Result<Option<(Uuid, AccessArea)>, OperationError> {
        if !self.is_subentry(entry) {
            return Ok(None);
        }
        let point = self.admin_point_of(entry.dn())?;
        if !Self::is_access_control_subentry(entry) {
            return Ok(None);
        }
        let items = self.parse_items(entry)?;
        let uuid = entry.get_uuid().ok_or_else(|| {
            admin_error!(name = %entry.dn(), "Subentry reached installation without an entryUUID");
            OperationError::InvalidState
        })?;
        Ok(Some((
            uuid,
            AccessArea {
                point,
                subentry: entry.dn().clone(),
                items,
            },
        )))
    }

    /// Bring the evaluator cache in line with the stored entry after a
    /// write already succeeded. Failures here only shed the stale area; the
    /// write itself stands.
    fn refresh(&self, dn: &Dn) {
        let Ok(entry) = self.nexus.lookup(dn) else {
            return;
        };
        let Some(uuid) = entry.get_uuid() else {
            return;
        };
        let staged = match self.stage(&entry) {
            Ok(staged) => staged,
            Err(e) => {
                admin_warn!(?e, name = %dn, "Dropping an access control area that no longer re-installs");
                None
            }
        };
        let mut txn = self.access.write();
        match staged {
            Some((uuid, area)) => txn.update_subentry(uuid, area),
            None => txn.remove_subentry(uuid),
        }
        txn.commit();
    }

    /// Re-key every cached area whose subentry moved with `old`. The point
    /// is re-derived; it is always the subentry's direct parent.
    fn rebase_areas(&self, old: &Dn, new: &Dn) {
        let moved: Vec<(Uuid, AccessArea)> = {
            let rd = self.access.read();
            let snap = rd.get_areas();
            snap.iter()
                .filter(|(_, a)| a.subentry.is_under(old))
                .map(|(u, a)| {
                    let subentry = a
                        .subentry
                        .rebase(old, new)
                        .unwrap_or_else(|| a.subentry.clone());
                    let point = subentry.parent().unwrap_or_else(|| a.point.clone());
                    (
                        *u,
                        AccessArea {
                            point,
                            subentry,
                            items: a.items.clone(),
                        },
                    )
                })
                .collect()
        };
        if moved.is_empty() {
            return;
        }
        let mut txn = self.access.write();
        for (uuid, area) in moved {
            txn.update_subentry(uuid, area);
        }
        txn.commit();
    }

    /// A subentry may only relocate under another administrative point.
    fn check_destination(&self, target: &Dn, new_superior: &Dn) -> Result<(), OperationError> {
        let is_sub = self
            .nexus
            .lookup(target)
            .map(|e| self.is_subentry(&e))
            .unwrap_or(false);
        if is_sub {
            self.require_admin_point(new_superior, target)?;
        }
        Ok(())
    }

    /// Does the filter ask for subentries by class? Naming the class is the
    /// explicit request that lifts the default hiding.
    fn filter_names_subentries(f: &Filter, sr: &(impl SchemaTransaction + ?Sized)) -> bool {
        match f {
            Filter::Eq(attr, PartialValue::Iutf8(class)) => {
                attr.as_str() == ATTR_OBJECTCLASS
                    && (sr.is_descendant(class, CLASS_SUBENTRY).unwrap_or(false)
                        || class.as_str() == CLASS_ACCESS_CONTROL_SUBENTRY)
            }
            Filter::And(fs) | Filter::Or(fs) => {
                fs.iter().any(|f| Self::filter_names_subentries(f, sr))
            }
            Filter::Not(f) => Self::filter_names_subentries(f, sr),
            _ => false,
        }
    }
}

impl Interceptor for SubentryManager {
    fn name(&self) -> &'static str {
        INTERCEPTOR_SUBENTRY
    }

    fn add(&self, ev: &mut AddEvent, next: Next<'_>) -> Result<(), OperationError> {
        let staged = self.stage(ev.entry.resolved()?)?;
        next.add(ev)?;
        if let Some((uuid, area)) = staged {
            security_info!(
                subentry = %area.subentry,
                point = %area.point,
                items = area.items.len(),
                "Installing access control area"
            );
            let mut txn = self.access.write();
            txn.update_subentry(uuid, area);
            txn.commit();
        }
        Ok(())
    }

    fn modify(&self, ev: &mut ModifyEvent, next: Next<'_>) -> Result<(), OperationError> {
        let target = ev.target.resolved()?.clone();
        let touches_aci = {
            let modlist = ev.modlist.resolved()?;
            let sr = self.schema.read();
            let mut touches = false;
            for m in modlist.iter() {
                if m.attr().as_str() != ATTR_PRESCRIPTIVE_ACI {
                    continue;
                }
                touches = true;
                if let Modify::Present(_, Value::Aci(text)) = m {
                    // Malformed items reject the modify before it applies.
                    AciItem::parse(text, &sr)?;
                }
            }
            touches
        };
        let was_subentry = self
            .nexus
            .lookup(&target)
            .map(|e| self.is_subentry(&e))
            .unwrap_or(false);

        next.modify(ev)?;

        if was_subentry || touches_aci {
            self.refresh(&target);
        }
        Ok(())
    }

    fn delete(&self, ev: &mut DeleteEvent, next: Next<'_>) -> Result<(), OperationError> {
        let target = ev.target.resolved()?.clone();
        next.delete(ev)?;
        // A subtree delete can take any number of subentries with it.
        let doomed: Vec<Uuid> = {
            let rd = self.access.read();
            let snap = rd.get_areas();
            snap.iter()
                .filter(|(_, a)| a.subentry.is_under(&target))
                .map(|(u, _)| *u)
                .collect()
        };
        if !doomed.is_empty() {
            security_info!(name = %target, areas = doomed.len(), "Removing access control areas");
            let mut txn = self.access.write();
            for uuid in doomed {
                txn.remove_subentry(uuid);
            }
            txn.commit();
        }
        Ok(())
    }

    fn search(&self, ev: &mut SearchEvent, next: Next<'_>) -> Result<SearchReply, OperationError> {
        let mut reply = next.search(ev)?;
        if matches!(ev.scope, SearchScope::Base) {
            return Ok(reply);
        }
        let sr = self.schema.read();
        if Self::filter_names_subentries(ev.filter.resolved()?, &sr) {
            return Ok(reply);
        }
        reply.entries.retain(|e| !Self::entry_is_subentry(e, &sr));
        Ok(reply)
    }

    fn rename(&self, ev: &mut RenameEvent, next: Next<'_>) -> Result<Dn, OperationError> {
        let target = ev.target.resolved()?.clone();
        let renamed = next.rename(ev)?;
        self.rebase_areas(&target, &renamed);
        Ok(renamed)
    }

    fn move_subtree(&self, ev: &mut MoveEvent, next: Next<'_>) -> Result<Dn, OperationError> {
        let target = ev.target.resolved()?.clone();
        self.check_destination(&target, ev.new_superior.resolved()?)?;
        let moved = next.move_subtree(ev)?;
        self.rebase_areas(&target, &moved);
        Ok(moved)
    }

    fn move_and_rename(
        &self,
        ev: &mut MoveAndRenameEvent,
        next: Next<'_>,
    ) -> Result<Dn, OperationError> {
        let target = ev.target.resolved()?.clone();
        self.check_destination(&target, ev.new_superior.resolved()?)?;
        let moved = next.move_and_rename(ev)?;
        self.rebase_areas(&target, &moved);
        Ok(moved)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;
    use std::sync::Arc;

    use atrium_proto::message::{ProtoEntry, ProtoModify, ProtoModifyList};

    use super::*;
    use crate::interceptor::{InterceptorChain, Normalization, OperationalAttrs, SchemaValidation};
    use crate::partition::{BtreePartition, Partition};
    use crate::repl::csn::CsnFactory;
    use crate::schema::SchemaReadTransaction;
    use crate::server::access::AccessControlsTransaction;

    const AREA_ACI: &str = r#"{ identificationTag "addAci", precedence 14, authenticationLevel none, itemOrUserFirst userFirst: { userClasses { allUsers }, userPermissions { { protectedItems {entry, allUserAttributeTypesAndValues}, grantsAndDenials { grantAdd, grantBrowse } } } } }"#;

    fn proto_entry(dn: &str, avas: &[(&str, &[&str])]) -> ProtoEntry {
        ProtoEntry {
            dn: dn.to_string(),
            attrs: avas
                .iter()
                .map(|(a, vs)| (a.to_string(), vs.iter().map(|v| v.to_string()).collect()))
                .collect::<BTreeMap<_, _>>(),
        }
    }

    fn area_subentry(dn: &str, cn: &str, aci: &str) -> ProtoEntry {
        proto_entry(
            dn,
            &[
                (
                    ATTR_OBJECTCLASS,
                    &[CLASS_TOP, CLASS_SUBENTRY, CLASS_ACCESS_CONTROL_SUBENTRY],
                ),
                (ATTR_CN, &[cn]),
                (ATTR_PRESCRIPTIVE_ACI, &[aci]),
            ],
        )
    }

    fn admin_ou(sr: &SchemaReadTransaction, dn: &str, ou: &str) -> Entry {
        let mut e = Entry::new(Dn::parse(dn, sr).expect("failed to parse dn"));
        e.add_ava(ATTR_OBJECTCLASS, Value::new_iutf8(CLASS_TOP))
            .expect("wrong family");
        e.add_ava(ATTR_OBJECTCLASS, Value::new_iutf8(CLASS_ORGANIZATIONAL_UNIT))
            .expect("wrong family");
        e.add_ava(ATTR_OU, Value::new_iutf8(ou)).expect("wrong family");
        e.add_ava(
            ATTR_ADMINISTRATIVE_ROLE,
            Value::new_iutf8("accessControlSpecificArea"),
        )
        .expect("wrong family");
        e
    }

    fn chain_fixture(
        schema: &Arc<Schema>,
    ) -> (InterceptorChain, Arc<AccessControls>, Arc<PartitionNexus>) {
        let sr = schema.read();
        let p = BtreePartition::new(
            Dn::parse(DN_SYSTEM, &sr).expect("failed to parse dn"),
            schema.clone(),
        );
        p.add(admin_ou(&sr, DN_SYSTEM, "system"))
            .expect("failed to add suffix entry");

        let nexus = Arc::new(PartitionNexus::new());
        nexus.mount(Arc::new(p)).expect("failed to mount partition");
        let access = Arc::new(AccessControls::default());
        let chain = InterceptorChain::new(nexus.clone());
        chain
            .append(Arc::new(Normalization::new(schema.clone())))
            .expect("failed to append stage");
        chain
            .append(Arc::new(SchemaValidation::new(
                schema.clone(),
                nexus.clone(),
            )))
            .expect("failed to append stage");
        chain
            .append(Arc::new(OperationalAttrs::new(
                schema.clone(),
                Arc::new(CsnFactory::new(1)),
            )))
            .expect("failed to append stage");
        chain
            .append(Arc::new(SubentryManager::new(
                schema.clone(),
                access.clone(),
                nexus.clone(),
            )))
            .expect("failed to append stage");
        (chain, access, nexus)
    }

    fn add_subentry(chain: &InterceptorChain, dn: &str, cn: &str, aci: &str) {
        let mut ev = AddEvent::from_message(
            Identity::from_anonymous(Uuid::new_v4()),
            area_subentry(dn, cn, aci),
        );
        chain.add(&mut ev).expect("failed to add subentry");
    }

    fn uuid_of(nexus: &PartitionNexus, sr: &SchemaReadTransaction, dn: &str) -> Uuid {
        nexus
            .lookup(&Dn::parse(dn, sr).expect("failed to parse dn"))
            .expect("failed to lookup entry")
            .get_uuid()
            .expect("entry has no uuid")
    }

    #[test]
    fn test_subentry_stage_installs_area_on_add() {
        let schema = Arc::new(Schema::new().expect("failed to bootstrap schema"));
        let sr = schema.read();
        let (chain, access, nexus) = chain_fixture(&schema);

        add_subentry(&chain, "cn=area,ou=system", "area", AREA_ACI);

        let uuid = uuid_of(&nexus, &sr, "cn=area,ou=system");
        let rd = access.read();
        let snap = rd.get_areas();
        let area = snap.get(&uuid).expect("area not installed");
        assert_eq!(area.point.norm(), DN_SYSTEM);
        assert_eq!(area.subentry.norm(), "cn=area,ou=system");
        assert_eq!(area.items.len(), 1);
    }

    #[test]
    fn test_subentry_stage_rejects_malformed_aci() {
        let schema = Arc::new(Schema::new().expect("failed to bootstrap schema"));
        let sr = schema.read();
        let (chain, access, nexus) = chain_fixture(&schema);

        let mut ev = AddEvent::from_message(
            Identity::from_anonymous(Uuid::new_v4()),
            area_subentry("cn=broken,ou=system", "broken", r#"{ identificationTag "broken""#),
        );
        match chain.add(&mut ev) {
            Err(OperationError::SchemaViolation(SchemaError::InvalidAttributeSyntax(a))) => {
                assert_eq!(a, ATTR_PRESCRIPTIVE_ACI);
            }
            other => panic!("unexpected outcome {:?}", other),
        }

        // Nothing stored, nothing installed.
        let dn = Dn::parse("cn=broken,ou=system", &sr).expect("failed to parse dn");
        assert!(!nexus.exists(&dn));
        assert!(access.read().get_areas().iter().next().is_none());
    }

    #[test]
    fn test_subentry_stage_requires_admin_point() {
        let schema = Arc::new(Schema::new().expect("failed to bootstrap schema"));
        let sr = schema.read();
        let (chain, access, nexus) = chain_fixture(&schema);

        let mut ev = AddEvent::from_message(
            Identity::from_anonymous(Uuid::new_v4()),
            proto_entry(
                "ou=plain,ou=system",
                &[
                    (ATTR_OBJECTCLASS, &[CLASS_TOP, CLASS_ORGANIZATIONAL_UNIT]),
                    (ATTR_OU, &["plain"]),
                ],
            ),
        );
        chain.add(&mut ev).expect("failed to add entry");

        let mut ev = AddEvent::from_message(
            Identity::from_anonymous(Uuid::new_v4()),
            area_subentry("cn=area,ou=plain,ou=system", "area", AREA_ACI),
        );
        match chain.add(&mut ev) {
            Err(OperationError::NamingViolation(parent)) => {
                assert_eq!(parent, "ou=plain,ou=system");
            }
            other => panic!("unexpected outcome {:?}", other),
        }
        let dn = Dn::parse("cn=area,ou=plain,ou=system", &sr).expect("failed to parse dn");
        assert!(!nexus.exists(&dn));
        assert!(access.read().get_areas().iter().next().is_none());
    }

    #[test]
    fn test_subentry_stage_refreshes_on_modify() {
        let schema = Arc::new(Schema::new().expect("failed to bootstrap schema"));
        let sr = schema.read();
        let (chain, access, nexus) = chain_fixture(&schema);

        add_subentry(&chain, "cn=area,ou=system", "area", AREA_ACI);
        let uuid = uuid_of(&nexus, &sr, "cn=area,ou=system");

        let second = r#"{ identificationTag "compare", precedence 8, authenticationLevel none, itemOrUserFirst userFirst: { userClasses { allUsers }, userPermissions { { protectedItems {allUserAttributeTypesAndValues}, grantsAndDenials { grantCompare } } } } }"#;
        let pl = ProtoModifyList::new_list(vec![ProtoModify::replace(
            ATTR_PRESCRIPTIVE_ACI,
            vec![AREA_ACI.to_string(), second.to_string()],
        )]);
        let mut ev = ModifyEvent::from_message(
            Identity::from_anonymous(Uuid::new_v4()),
            "cn=area,ou=system".to_string(),
            pl,
        );
        chain.modify(&mut ev).expect("failed to modify subentry");
        {
            let rd = access.read();
            let snap = rd.get_areas();
            let area = snap.get(&uuid).expect("area not installed");
            assert_eq!(area.items.len(), 2);
        }

        // A malformed replacement rejects before anything changes.
        let pl = ProtoModifyList::new_list(vec![ProtoModify::replace(
            ATTR_PRESCRIPTIVE_ACI,
            vec!["{ not an item }".to_string()],
        )]);
        let mut ev = ModifyEvent::from_message(
            Identity::from_anonymous(Uuid::new_v4()),
            "cn=area,ou=system".to_string(),
            pl,
        );
        match chain.modify(&mut ev) {
            Err(OperationError::SchemaViolation(SchemaError::InvalidAttributeSyntax(_))) => {}
            other => panic!("unexpected outcome {:?}", other),
        }
        let rd = access.read();
        let snap = rd.get_areas();
        let area = snap.get(&uuid).expect("area not installed");
        assert_eq!(area.items.len(), 2);
    }

    #[test]
    fn test_subentry_stage_removes_area_on_delete() {
        let schema = Arc::new(Schema::new().expect("failed to bootstrap schema"));
        let sr = schema.read();
        let (chain, access, nexus) = chain_fixture(&schema);

        add_subentry(&chain, "cn=area,ou=system", "area", AREA_ACI);
        let mut ev = DeleteEvent::from_message(
            Identity::from_anonymous(Uuid::new_v4()),
            "cn=area,ou=system".to_string(),
            false,
        );
        chain.delete(&mut ev).expect("failed to delete subentry");
        assert!(access.read().get_areas().iter().next().is_none());

        // A subtree delete of the administrative point sweeps its areas too.
        let mut ev = AddEvent::new_internal(admin_ou(&sr, "ou=region,ou=system", "region"));
        chain.add(&mut ev).expect("failed to add entry");
        add_subentry(&chain, "cn=area,ou=region,ou=system", "area", AREA_ACI);
        assert!(access.read().get_areas().iter().next().is_some());

        let mut ev = DeleteEvent::from_message(
            Identity::from_anonymous(Uuid::new_v4()),
            "ou=region,ou=system".to_string(),
            true,
        );
        chain.delete(&mut ev).expect("failed to delete subtree");
        let dn = Dn::parse("ou=region,ou=system", &sr).expect("failed to parse dn");
        assert!(!nexus.exists(&dn));
        assert!(access.read().get_areas().iter().next().is_none());
    }

    #[test]
    fn test_subentry_stage_hides_subentries_from_search() {
        let schema = Arc::new(Schema::new().expect("failed to bootstrap schema"));
        let sr = schema.read();
        let (chain, _access, _nexus) = chain_fixture(&schema);

        add_subentry(&chain, "cn=area,ou=system", "area", AREA_ACI);

        let base = Dn::parse(DN_SYSTEM, &sr).expect("failed to parse dn");
        let mut ev = SearchEvent::new_impersonate(
            Identity::from_anonymous(Uuid::new_v4()),
            base.clone(),
            SearchScope::Subtree,
            Filter::all_entries(),
        );
        let reply = chain.search(&mut ev).expect("failed to search");
        let names: Vec<&str> = reply.entries.iter().map(|e| e.dn().norm()).collect();
        assert!(names.contains(&DN_SYSTEM));
        assert!(!names.contains(&"cn=area,ou=system"));

        // Naming the class in the filter asks for them.
        let mut ev = SearchEvent::new_impersonate(
            Identity::from_anonymous(Uuid::new_v4()),
            base,
            SearchScope::Subtree,
            Filter::eq(
                ATTR_OBJECTCLASS,
                PartialValue::new_iutf8(CLASS_ACCESS_CONTROL_SUBENTRY),
            ),
        );
        let reply = chain.search(&mut ev).expect("failed to search");
        assert_eq!(reply.entries.len(), 1);
        assert_eq!(reply.entries[0].dn().norm(), "cn=area,ou=system");

        // So does basing the search at the subentry itself.
        let sub = Dn::parse("cn=area,ou=system", &sr).expect("failed to parse dn");
        let mut ev = SearchEvent::new_impersonate(
            Identity::from_anonymous(Uuid::new_v4()),
            sub,
            SearchScope::Base,
            Filter::all_entries(),
        );
        let reply = chain.search(&mut ev).expect("failed to search");
        assert_eq!(reply.entries.len(), 1);
    }

    #[test]
    fn test_subentry_stage_relocates_area_on_rename() {
        let schema = Arc::new(Schema::new().expect("failed to bootstrap schema"));
        let sr = schema.read();
        let (chain, access, nexus) = chain_fixture(&schema);

        add_subentry(&chain, "cn=area,ou=system", "area", AREA_ACI);
        let uuid = uuid_of(&nexus, &sr, "cn=area,ou=system");

        let mut ev = RenameEvent::from_message(
            Identity::from_anonymous(Uuid::new_v4()),
            "cn=area,ou=system".to_string(),
            "cn=acl".to_string(),
            true,
        );
        let renamed = chain.rename(&mut ev).expect("failed to rename subentry");
        assert_eq!(renamed.norm(), "cn=acl,ou=system");

        let rd = access.read();
        let snap = rd.get_areas();
        let area = snap.get(&uuid).expect("area not installed");
        assert_eq!(area.subentry.norm(), "cn=acl,ou=system");
        assert_eq!(area.point.norm(), DN_SYSTEM);
    }

    #[test]
    fn test_subentry_stage_checks_move_destination() {
        let schema = Arc::new(Schema::new().expect("failed to bootstrap schema"));
        let sr = schema.read();
        let (chain, access, _nexus) = chain_fixture(&schema);

        add_subentry(&chain, "cn=area,ou=system", "area", AREA_ACI);
        let mut ev = AddEvent::from_message(
            Identity::from_anonymous(Uuid::new_v4()),
            proto_entry(
                "ou=plain,ou=system",
                &[
                    (ATTR_OBJECTCLASS, &[CLASS_TOP, CLASS_ORGANIZATIONAL_UNIT]),
                    (ATTR_OU, &["plain"]),
                ],
            ),
        );
        chain.add(&mut ev).expect("failed to add entry");
        let mut ev = AddEvent::new_internal(admin_ou(&sr, "ou=region,ou=system", "region"));
        chain.add(&mut ev).expect("failed to add entry");

        // Not an administrative point: refused.
        let mut ev = MoveEvent::from_message(
            Identity::from_anonymous(Uuid::new_v4()),
            "cn=area,ou=system".to_string(),
            "ou=plain,ou=system".to_string(),
        );
        match chain.move_subtree(&mut ev) {
            Err(OperationError::NamingViolation(parent)) => {
                assert_eq!(parent, "ou=plain,ou=system");
            }
            other => panic!("unexpected outcome {:?}", other),
        }

        // An administrative point: moved, and the area follows.
        let mut ev = MoveEvent::from_message(
            Identity::from_anonymous(Uuid::new_v4()),
            "cn=area,ou=system".to_string(),
            "ou=region,ou=system".to_string(),
        );
        let moved = chain.move_subtree(&mut ev).expect("failed to move subentry");
        assert_eq!(moved.norm(), "cn=area,ou=region,ou=system");

        let rd = access.read();
        let snap = rd.get_areas();
        let (_, area) = snap.iter().next().expect("area not installed");
        assert_eq!(area.subentry.norm(), "cn=area,ou=region,ou=system");
        assert_eq!(area.point.norm(), "ou=region,ou=system");
    }
}
