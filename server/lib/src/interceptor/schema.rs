//! Schema enforcement for writes. Add payloads validate as-is; a modify is
//! applied to a copy of the current entry and the *result* validates, so an
//! edit that would strip a must attribute or break the structural class
//! chain never reaches storage. Client writes naming operational attributes
//! are refused here, before the operational stage stamps the real values.

use std::sync::Arc;

use hashbrown::HashSet;

use crate::event::{AddEvent, ModifyEvent, SearchEvent, SearchReply};
use crate::filter::Filter;
use crate::interceptor::{Interceptor, Next, INTERCEPTOR_SCHEMA};
use crate::partition::PartitionNexus;
use crate::prelude::*;
use crate::schema::Schema;

// Operational attributes a client may still write. The administrative model
// is configured through these; everything else operational is stamped by the
// server and forgery is refused.
lazy_static! {
    static ref USER_SETTABLE_OPERATIONAL: HashSet<&'static str> = {
        let mut m = HashSet::with_capacity(4);
        m.insert(ATTR_ADMINISTRATIVE_ROLE);
        m.insert(ATTR_PRESCRIPTIVE_ACI);
        m.insert(ATTR_SUBTREE_SPECIFICATION);
        m
    };
}

pub struct SchemaValidation {
    schema: Arc<Schema>,
    nexus: Arc<PartitionNexus>,
}

impl SchemaValidation {
    pub fn new(schema: Arc<Schema>, nexus: Arc<PartitionNexus>) -> Self {
        SchemaValidation { schema, nexus }
    }

    fn refuse_operational(
        sr: &(impl SchemaTransaction + ?Sized),
        attr: &str,
    ) -> Result<(), OperationError> {
        if sr.is_operational(attr) && !USER_SETTABLE_OPERATIONAL.contains(attr) {
            request_error!(%attr, "Refusing client write to an operational attribute");
            Err(OperationError::SchemaViolation(
                SchemaError::OperationalAttributeWrite(attr.to_string()),
            ))
        } else {
            Ok(())
        }
    }

    fn check_filter(
        f: &Filter,
        sr: &(impl SchemaTransaction + ?Sized),
    ) -> Result<(), OperationError> {
        match f {
            Filter::Eq(attr, _) | Filter::Sub(attr, _) | Filter::Pres(attr) => sr
                .resolve_attr(attr)
                .map(|_| ())
                .map_err(OperationError::SchemaViolation),
            Filter::And(fs) | Filter::Or(fs) => {
                fs.iter().try_for_each(|f| Self::check_filter(f, sr))
            }
            Filter::Not(f) => Self::check_filter(f, sr),
        }
    }
}

impl Interceptor for SchemaValidation {
    fn name(&self) -> &'static str {
        INTERCEPTOR_SCHEMA
    }

    fn add(&self, ev: &mut AddEvent, next: Next<'_>) -> Result<(), OperationError> {
        let sr = self.schema.read();
        let entry = ev.entry.resolved()?;
        if !ev.op.ident.is_internal() {
            for attr in entry.attribute_names() {
                Self::refuse_operational(&sr, attr)?;
            }
        }
        entry
            .validate(&sr)
            .map_err(OperationError::SchemaViolation)?;
        next.add(ev)
    }

    fn modify(&self, ev: &mut ModifyEvent, next: Next<'_>) -> Result<(), OperationError> {
        let sr = self.schema.read();
        let mods = ev.modlist.resolved()?;
        if !ev.op.ident.is_internal() {
            for m in mods.iter() {
                Self::refuse_operational(&sr, m.attr())?;
            }
        }
        // Validate the entry this modify would produce, not the request.
        let current = self.nexus.lookup(ev.target.resolved()?)?;
        let mut candidate = (*current).clone();
        candidate.apply_modlist(mods)?;
        candidate
            .validate(&sr)
            .map_err(OperationError::SchemaViolation)?;
        next.modify(ev)
    }

    fn search(&self, ev: &mut SearchEvent, next: Next<'_>) -> Result<SearchReply, OperationError> {
        let sr = self.schema.read();
        Self::check_filter(ev.filter.resolved()?, &sr)?;
        next.search(ev)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;
    use std::sync::Arc;

    use atrium_proto::message::{ProtoEntry, ProtoModify, ProtoModifyList};

    use super::*;
    use crate::interceptor::{InterceptorChain, Normalization};
    use crate::partition::{BtreePartition, Partition};
    use crate::schema::Schema;

    fn proto_entry(dn: &str, avas: &[(&str, &[&str])]) -> ProtoEntry {
        ProtoEntry {
            dn: dn.to_string(),
            attrs: avas
                .iter()
                .map(|(a, vs)| (a.to_string(), vs.iter().map(|v| v.to_string()).collect()))
                .collect::<BTreeMap<_, _>>(),
        }
    }

    fn chain_fixture(schema: &Arc<Schema>) -> InterceptorChain {
        let sr = schema.read();
        let suffix = Dn::parse(DN_SYSTEM, &sr).expect("failed to parse dn");
        let p = BtreePartition::new(suffix, schema.clone());
        let mut root = Entry::new(Dn::parse(DN_SYSTEM, &sr).expect("failed to parse dn"));
        root.add_ava(ATTR_OBJECTCLASS, Value::new_iutf8(CLASS_TOP))
            .expect("wrong family");
        root.add_ava(ATTR_OBJECTCLASS, Value::new_iutf8(CLASS_ORGANIZATIONAL_UNIT))
            .expect("wrong family");
        root.add_ava(ATTR_OU, Value::new_iutf8("system"))
            .expect("wrong family");
        p.add(root).expect("failed to add suffix entry");

        let nexus = Arc::new(crate::partition::PartitionNexus::new());
        nexus.mount(Arc::new(p)).expect("failed to mount partition");
        let chain = InterceptorChain::new(nexus.clone());
        chain
            .append(Arc::new(Normalization::new(schema.clone())))
            .expect("failed to append stage");
        chain
            .append(Arc::new(SchemaValidation::new(schema.clone(), nexus)))
            .expect("failed to append stage");
        chain
    }

    #[test]
    fn test_schema_stage_accepts_valid_add() {
        let schema = Arc::new(Schema::new().expect("failed to bootstrap schema"));
        let chain = chain_fixture(&schema);

        let mut ev = AddEvent::from_message(
            Identity::from_anonymous(Uuid::new_v4()),
            proto_entry(
                "cn=claire,ou=system",
                &[
                    (ATTR_OBJECTCLASS, &[CLASS_TOP, CLASS_PERSON]),
                    (ATTR_CN, &["claire"]),
                    (ATTR_SN, &["meadows"]),
                ],
            ),
        );
        chain.add(&mut ev).expect("failed to add entry");
    }

    #[test]
    fn test_schema_stage_rejects_missing_must() {
        let schema = Arc::new(Schema::new().expect("failed to bootstrap schema"));
        let chain = chain_fixture(&schema);

        let mut ev = AddEvent::from_message(
            Identity::from_anonymous(Uuid::new_v4()),
            proto_entry(
                "cn=claire,ou=system",
                &[
                    (ATTR_OBJECTCLASS, &[CLASS_TOP, CLASS_PERSON]),
                    (ATTR_CN, &["claire"]),
                ],
            ),
        );
        match chain.add(&mut ev) {
            Err(OperationError::SchemaViolation(SchemaError::MissingMustAttribute(attrs))) => {
                assert_eq!(attrs, vec![ATTR_SN.to_string()]);
            }
            other => panic!("unexpected outcome {:?}", other),
        }
    }

    #[test]
    fn test_schema_stage_rejects_abstract_only_class() {
        let schema = Arc::new(Schema::new().expect("failed to bootstrap schema"));
        let chain = chain_fixture(&schema);

        let mut ev = AddEvent::from_message(
            Identity::from_anonymous(Uuid::new_v4()),
            proto_entry("ou=thing,ou=system", &[(ATTR_OBJECTCLASS, &[CLASS_TOP])]),
        );
        match chain.add(&mut ev) {
            Err(OperationError::SchemaViolation(SchemaError::NoStructuralClass)) => {}
            other => panic!("unexpected outcome {:?}", other),
        }
    }

    #[test]
    fn test_schema_stage_rejects_operational_forgery() {
        let schema = Arc::new(Schema::new().expect("failed to bootstrap schema"));
        let chain = chain_fixture(&schema);

        let mut ev = AddEvent::from_message(
            Identity::from_anonymous(Uuid::new_v4()),
            proto_entry(
                "cn=claire,ou=system",
                &[
                    (ATTR_OBJECTCLASS, &[CLASS_TOP, CLASS_PERSON]),
                    (ATTR_CN, &["claire"]),
                    (ATTR_SN, &["meadows"]),
                    (ATTR_ENTRY_UUID, &["d2b49e10-99a1-4f29-add3-64fe1f51c8b0"]),
                ],
            ),
        );
        match chain.add(&mut ev) {
            Err(OperationError::SchemaViolation(SchemaError::OperationalAttributeWrite(a))) => {
                assert_eq!(a, ATTR_ENTRY_UUID);
            }
            other => panic!("unexpected outcome {:?}", other),
        }
    }

    #[test]
    fn test_schema_stage_allows_admin_model_attributes() {
        let schema = Arc::new(Schema::new().expect("failed to bootstrap schema"));
        let chain = chain_fixture(&schema);

        // administrativeRole and prescriptiveACI are operational but set by
        // clients, unlike the stamps.
        let mut ev = AddEvent::from_message(
            Identity::from_anonymous(Uuid::new_v4()),
            proto_entry(
                "ou=region,ou=system",
                &[
                    (ATTR_OBJECTCLASS, &[CLASS_TOP, CLASS_ORGANIZATIONAL_UNIT]),
                    (ATTR_OU, &["region"]),
                    (ATTR_ADMINISTRATIVE_ROLE, &["accessControlSpecificArea"]),
                ],
            ),
        );
        chain.add(&mut ev).expect("failed to add entry");

        let mut ev = AddEvent::from_message(
            Identity::from_anonymous(Uuid::new_v4()),
            proto_entry(
                "cn=area,ou=region,ou=system",
                &[
                    (
                        ATTR_OBJECTCLASS,
                        &[CLASS_TOP, CLASS_SUBENTRY, CLASS_ACCESS_CONTROL_SUBENTRY],
                    ),
                    (ATTR_CN, &["area"]),
                    (ATTR_PRESCRIPTIVE_ACI, &["{ identificationTag \"x\" }"]),
                ],
            ),
        );
        chain.add(&mut ev).expect("failed to add entry");
    }

    #[test]
    fn test_schema_stage_validates_modify_result() {
        let schema = Arc::new(Schema::new().expect("failed to bootstrap schema"));
        let chain = chain_fixture(&schema);

        let mut ev = AddEvent::from_message(
            Identity::from_anonymous(Uuid::new_v4()),
            proto_entry(
                "cn=claire,ou=system",
                &[
                    (ATTR_OBJECTCLASS, &[CLASS_TOP, CLASS_PERSON]),
                    (ATTR_CN, &["claire"]),
                    (ATTR_SN, &["meadows"]),
                ],
            ),
        );
        chain.add(&mut ev).expect("failed to add entry");

        // Stripping sn would leave a person without a must attribute.
        let pl = ProtoModifyList::new_list(vec![ProtoModify::delete_all(ATTR_SN)]);
        let mut ev = ModifyEvent::from_message(
            Identity::from_anonymous(Uuid::new_v4()),
            "cn=claire,ou=system".to_string(),
            pl,
        );
        match chain.modify(&mut ev) {
            Err(OperationError::SchemaViolation(SchemaError::MissingMustAttribute(_))) => {}
            other => panic!("unexpected outcome {:?}", other),
        }

        // A legal edit passes and commits.
        let pl = ProtoModifyList::new_list(vec![ProtoModify::add(
            ATTR_DESCRIPTION,
            "a test person",
        )]);
        let mut ev = ModifyEvent::from_message(
            Identity::from_anonymous(Uuid::new_v4()),
            "cn=claire,ou=system".to_string(),
            pl,
        );
        chain.modify(&mut ev).expect("failed to modify entry");
    }

    #[test]
    fn test_schema_stage_allows_internal_operational_writes() {
        let schema = Arc::new(Schema::new().expect("failed to bootstrap schema"));
        let sr = schema.read();
        let chain = chain_fixture(&schema);

        let mut ev = AddEvent::from_message(
            Identity::from_anonymous(Uuid::new_v4()),
            proto_entry(
                "cn=claire,ou=system",
                &[
                    (ATTR_OBJECTCLASS, &[CLASS_TOP, CLASS_PERSON]),
                    (ATTR_CN, &["claire"]),
                    (ATTR_SN, &["meadows"]),
                ],
            ),
        );
        chain.add(&mut ev).expect("failed to add entry");

        let dn = Dn::parse("cn=claire,ou=system", &sr).expect("failed to parse dn");
        let mods = ModifyList::new_append(
            ATTR_ENTRY_UUID,
            Value::new_uuid(uuid!("d2b49e10-99a1-4f29-add3-64fe1f51c8b0")),
        );
        let mut ev = ModifyEvent::new_internal(dn, mods);
        chain
            .modify(&mut ev)
            .expect("internal stamping must be allowed");
    }
}
