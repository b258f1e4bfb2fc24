//! The assembled directory server: schema, partitions, the interceptor
//! chain and the session registry, held together behind one shareable
//! handle. Cloning the handle is cheap and every clone operates on the
//! same state, so front-ends, background tasks and tests all hold their
//! own copy.

pub(crate) mod access;
pub mod identity;

use std::sync::Arc;

use concread::cowcell::*;
use serde::Deserialize;
use tokio::sync::watch;
use tokio::time::{timeout_at, Instant};

use crate::event::AddEvent;
use crate::interceptor::{
    Authentication, Authorization, ExceptionTranslation, InterceptorChain, Normalization,
    OperationalAttrs, SchemaValidation, SubentryManager,
};
use crate::partition::{BtreePartition, PartitionNexus};
use crate::prelude::*;
use crate::repl::csn::CsnFactory;
use crate::session::{Session, SessionRegistry};

use self::access::AccessControls;

/// Default prescriptions installed over `ou=system` at bootstrap.
/// Authenticated principals may browse and read; nobody reads stored
/// credentials back. The administrator bypasses evaluation entirely, so no
/// grant for it appears here.
const ACI_AUTHENTICATED_ACCESS: &str = r#"{ identificationTag "authenticatedAccess", precedence 10, authenticationLevel simple, itemOrUserFirst userFirst: { userClasses { allUsers }, userPermissions { { protectedItems {entry, allUserAttributeTypesAndValues}, grantsAndDenials { grantBrowse, grantRead, grantCompare, grantDiscloseOnError } } } } }"#;

const ACI_PROTECT_SECRETS: &str = r#"{ identificationTag "protectSecrets", precedence 20, authenticationLevel none, itemOrUserFirst userFirst: { userClasses { allUsers }, userPermissions { { protectedItems { attributeType { userpassword } }, grantsAndDenials { denyRead, denyCompare } } } } }"#;

/// Where the server is in its lifecycle. Operations are admitted only
/// while `Running`; anything else answers `Unavailable`.
#[derive(Debug, Clone, Copy, PartialOrd, PartialEq, Eq)]
pub(crate) enum ServerPhase {
    Bootstrap,
    Running,
    ShuttingDown,
}

/// Startup configuration. Everything has a workable default, so front-ends
/// deserialise whatever subset their config file provides.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DirectoryConfig {
    /// Identifier stamped into every change number this server issues.
    /// Replicas of one another must not share a value.
    pub replica_id: u16,
    /// Naming contexts mounted beside `ou=system`, for example
    /// `dc=example,dc=com`. Each becomes its own partition with a root
    /// entry inferred from its naming attribute.
    pub contexts: Vec<String>,
    /// Initial credential of the administrator account.
    pub admin_password: String,
}

impl Default for DirectoryConfig {
    fn default() -> Self {
        DirectoryConfig {
            replica_id: 1,
            contexts: Vec::new(),
            admin_password: "secret".to_string(),
        }
    }
}

#[derive(Clone)]
pub struct DirectoryServer {
    phase: Arc<CowCell<ServerPhase>>,
    schema: Arc<Schema>,
    // Read only from tests; the chain interceptors hold their own clones.
    #[allow(dead_code)]
    accesscontrols: Arc<AccessControls>,
    nexus: Arc<PartitionNexus>,
    chain: Arc<InterceptorChain>,
    sessions: Arc<SessionRegistry>,
    unbind_tx: Arc<watch::Sender<bool>>,
}

impl DirectoryServer {
    /// Assemble and bootstrap a server. On return the system partition
    /// holds its well-known entries, the schema subentries are published
    /// under `ou=schema`, the default access policy is in force and the
    /// phase is `Running`.
    pub fn new(config: DirectoryConfig) -> Result<Self, OperationError> {
        let schema = Arc::new(Schema::new()?);
        let nexus = Arc::new(PartitionNexus::new());

        let mut contexts = Vec::with_capacity(config.contexts.len() + 1);
        {
            let sr = schema.read();
            let system = Dn::parse(DN_SYSTEM, &sr)?;
            nexus.mount(Arc::new(BtreePartition::new(system, schema.clone())))?;
            for raw in &config.contexts {
                let suffix = Dn::parse(raw, &sr)?;
                nexus.mount(Arc::new(BtreePartition::new(
                    suffix.clone(),
                    schema.clone(),
                )))?;
                contexts.push(suffix);
            }
        }

        let accesscontrols = Arc::new(AccessControls::default());
        let csn_factory = Arc::new(CsnFactory::new(config.replica_id));

        let chain = Arc::new(InterceptorChain::new(nexus.clone()));
        chain.append(Arc::new(Normalization::new(schema.clone())))?;
        chain.append(Arc::new(SchemaValidation::new(
            schema.clone(),
            nexus.clone(),
        )))?;
        chain.append(Arc::new(OperationalAttrs::new(schema.clone(), csn_factory)))?;
        chain.append(Arc::new(Authentication::new(nexus.clone())))?;
        chain.append(Arc::new(Authorization::new(accesscontrols.clone())))?;
        chain.append(Arc::new(SubentryManager::new(
            schema.clone(),
            accesscontrols.clone(),
            nexus.clone(),
        )))?;
        chain.append(Arc::new(ExceptionTranslation::new(nexus.clone())))?;

        let (unbind_tx, _) = watch::channel(false);

        let server = DirectoryServer {
            phase: Arc::new(CowCell::new(ServerPhase::Bootstrap)),
            schema,
            accesscontrols,
            nexus,
            chain,
            sessions: Arc::new(SessionRegistry::default()),
            unbind_tx: Arc::new(unbind_tx),
        };

        server.bootstrap(&config, &contexts)?;

        let mut phase = server.phase.write();
        *phase = ServerPhase::Running;
        phase.commit();

        admin_info!("Directory server ready");
        Ok(server)
    }

    /// Populate the well-known entries through the ordinary chain, so the
    /// same stamping and validation applies to them as to everything else.
    #[instrument(level = "debug", skip_all)]
    fn bootstrap(&self, config: &DirectoryConfig, contexts: &[Dn]) -> Result<(), OperationError> {
        let sr = self.schema.read();
        let system = Dn::parse(DN_SYSTEM, &sr)?;
        let admin = Dn::parse(DN_ADMIN, &sr)?;
        let schema_base = Dn::parse(DN_SCHEMA, &sr)?;
        let users = Dn::parse(DN_USERS, &sr)?;
        let groups = Dn::parse(DN_GROUPS, &sr)?;
        let administrators = Dn::parse(DN_ADMINISTRATORS, &sr)?;
        let access_policy = Dn::parse("cn=accessPolicy,ou=system", &sr)?;
        drop(sr);

        // The system suffix doubles as the administrative point for the
        // default access policy.
        let mut e = Entry::new(system);
        e.add_ava(ATTR_OBJECTCLASS, Value::new_iutf8(CLASS_TOP))?;
        e.add_ava(ATTR_OBJECTCLASS, Value::new_iutf8(CLASS_ORGANIZATIONAL_UNIT))?;
        e.add_ava(ATTR_OU, Value::new_iutf8("system"))?;
        e.add_ava(
            ATTR_ADMINISTRATIVE_ROLE,
            Value::new_iutf8(ROLE_ACCESS_CONTROL_SPECIFIC_AREA),
        )?;
        self.internal_add(e)?;

        for suffix in contexts {
            self.internal_add(self.context_root(suffix)?)?;
        }

        self.add_container(schema_base, "schema")?;
        let schema_entries = self.schema.write().to_entries()?;
        for entry in schema_entries {
            self.internal_add(entry)?;
        }

        self.add_container(users, "users")?;
        self.add_container(groups, "groups")?;

        let mut e = Entry::new(admin.clone());
        for class in [
            CLASS_TOP,
            CLASS_PERSON,
            CLASS_ORGANIZATIONAL_PERSON,
            CLASS_INET_ORG_PERSON,
        ] {
            e.add_ava(ATTR_OBJECTCLASS, Value::new_iutf8(class))?;
        }
        e.add_ava(ATTR_UID, Value::new_iutf8("admin"))?;
        e.add_ava(ATTR_CN, Value::new_iutf8("system administrator"))?;
        e.add_ava(ATTR_SN, Value::new_iutf8("administrator"))?;
        e.add_ava(ATTR_DISPLAY_NAME, Value::new_utf8s("Directory Superuser"))?;
        e.add_ava(ATTR_USER_PASSWORD, Value::new_secret(&config.admin_password))?;
        self.internal_add(e)?;

        let mut e = Entry::new(administrators);
        e.add_ava(ATTR_OBJECTCLASS, Value::new_iutf8(CLASS_TOP))?;
        e.add_ava(ATTR_OBJECTCLASS, Value::new_iutf8(CLASS_GROUP_OF_NAMES))?;
        e.add_ava(ATTR_CN, Value::new_iutf8("administrators"))?;
        e.add_ava(ATTR_MEMBER, Value::new_dn(admin.norm().to_string()))?;
        self.internal_add(e)?;

        // Installing the subentry switches access control on for every
        // non-administrator principal.
        let mut e = Entry::new(access_policy);
        e.add_ava(ATTR_OBJECTCLASS, Value::new_iutf8(CLASS_TOP))?;
        e.add_ava(ATTR_OBJECTCLASS, Value::new_iutf8(CLASS_SUBENTRY))?;
        e.add_ava(
            ATTR_OBJECTCLASS,
            Value::new_iutf8(CLASS_ACCESS_CONTROL_SUBENTRY),
        )?;
        e.add_ava(ATTR_CN, Value::new_iutf8("accessPolicy"))?;
        e.add_ava(ATTR_PRESCRIPTIVE_ACI, Value::new_aci(ACI_AUTHENTICATED_ACCESS))?;
        e.add_ava(ATTR_PRESCRIPTIVE_ACI, Value::new_aci(ACI_PROTECT_SECRETS))?;
        self.internal_add(e)?;

        Ok(())
    }

    fn internal_add(&self, entry: Entry) -> Result<(), OperationError> {
        let mut ev = AddEvent::new_internal(entry);
        self.chain.add(&mut ev)
    }

    fn add_container(&self, dn: Dn, ou: &str) -> Result<(), OperationError> {
        let mut e = Entry::new(dn);
        e.add_ava(ATTR_OBJECTCLASS, Value::new_iutf8(CLASS_TOP))?;
        e.add_ava(ATTR_OBJECTCLASS, Value::new_iutf8(CLASS_ORGANIZATIONAL_UNIT))?;
        e.add_ava(ATTR_OU, Value::new_iutf8(ou))?;
        self.internal_add(e)
    }

    /// The root entry for an extra naming context, with its structural
    /// class inferred from the naming attribute of the suffix.
    fn context_root(&self, suffix: &Dn) -> Result<Entry, OperationError> {
        let rdn = suffix.rdn().ok_or_else(|| {
            OperationError::NamingViolation("a naming context needs a name".to_string())
        })?;
        let ava = rdn.ava();
        let class = match ava.attr.as_str() {
            ATTR_DC => CLASS_DOMAIN,
            ATTR_OU => CLASS_ORGANIZATIONAL_UNIT,
            ATTR_O => CLASS_ORGANIZATION,
            other => {
                admin_error!(
                    attr = %other,
                    "No structural class is known for this naming attribute"
                );
                return Err(OperationError::NamingViolation(suffix.to_string()));
            }
        };
        let mut e = Entry::new(suffix.clone());
        e.add_ava(ATTR_OBJECTCLASS, Value::new_iutf8(CLASS_TOP))?;
        e.add_ava(ATTR_OBJECTCLASS, Value::new_iutf8(class))?;
        e.add_ava(ava.attr.as_str(), Value::new_iutf8(&ava.value))?;
        Ok(e)
    }

    pub(crate) fn assert_running(&self) -> Result<(), OperationError> {
        if *self.phase.read() == ServerPhase::Running {
            Ok(())
        } else {
            Err(OperationError::Unavailable)
        }
    }

    pub(crate) fn chain(&self) -> &InterceptorChain {
        &self.chain
    }

    pub(crate) fn schema(&self) -> &Schema {
        &self.schema
    }

    pub(crate) fn registry(&self) -> &SessionRegistry {
        &self.sessions
    }

    pub fn naming_contexts(&self) -> Vec<Dn> {
        self.nexus.naming_contexts()
    }

    /// Open a client session. Sessions begin anonymous; a bind upgrades
    /// them. The phase gate applies per operation, so a session obtained
    /// during shutdown simply finds every request refused.
    pub fn connect(&self) -> Session {
        let session_id = Uuid::new_v4();
        let (interrupt, notice_rx) = self.sessions.register(session_id);
        request_info!(%session_id, "session opened");
        Session::new(self.clone(), session_id, interrupt, notice_rx)
    }

    /// A watch the front-end listeners hold. It flips to true when they
    /// should stop accepting connections.
    pub fn subscribe_unbind(&self) -> watch::Receiver<bool> {
        self.unbind_tx.subscribe()
    }

    /// Stop admitting work, give every other session `delay` to
    /// acknowledge its disconnect notice, then abandon and close whatever
    /// remains and signal the listeners to unbind. Only the administrator,
    /// or the server acting on its own behalf, may request this.
    #[instrument(level = "info", skip_all)]
    pub async fn graceful_shutdown(
        &self,
        ident: &Identity,
        delay: Duration,
    ) -> Result<(), OperationError> {
        if !ident.is_internal() && !ident.is_admin() {
            security_error!(ident = %ident, "Refusing shutdown request");
            return Err(OperationError::AuthorizationDenied);
        }

        admin_info!(?delay, "Beginning graceful shutdown");
        let mut phase = self.phase.write();
        *phase = ServerPhase::ShuttingDown;
        phase.commit();

        let acks = self.sessions.notify_all(ident.session_id());
        let deadline = Instant::now() + delay;
        for (session_id, rx) in acks {
            // An acknowledgement, or the session dropping its end, both
            // settle the notice. Once the deadline passes, stop polling;
            // the sweep below deals with everything still registered.
            match timeout_at(deadline, rx).await {
                Ok(_) => self.sessions.remove(session_id),
                Err(_) => break,
            }
        }

        let leftover = self.sessions.interrupt_all();
        if leftover != 0 {
            admin_warn!(
                sessions = leftover,
                "Forcing disconnection of unacknowledged sessions"
            );
        }

        self.unbind_tx.send_replace(true);
        admin_info!("Graceful shutdown complete");
        Ok(())
    }

    /// Full consistency sweep: schema invariants, every partition, and the
    /// entries the server itself cannot operate without.
    pub fn verify(&self) -> Vec<Result<(), ConsistencyError>> {
        let mut results = self.schema.read().validate();
        results.extend(self.nexus.verify());

        let sr = self.schema.read();
        let admin = Dn::parse(DN_ADMIN, &sr)
            .ok()
            .and_then(|dn| self.nexus.lookup(&dn).ok());
        if admin.is_none() {
            results.push(Err(ConsistencyError::RequiredEntryMissing(
                DN_ADMIN.to_string(),
            )));
        }
        results
    }
}
