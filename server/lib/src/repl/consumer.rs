//! A refresh-driven replication consumer. Each refresh searches the
//! provider for entries stamped after the consumer's resume point, applies
//! them locally through ordinary session operations, and advances a
//! persisted cookie so a restart carries on from the last applied change.
//!
//! The consumer converges the local copy towards the provider: new entries
//! are added, existing ones have their user attributes rewritten to match.
//! Entries removed on the provider are not reaped by a refresh. Apply runs
//! through the sessions the host supplies, so the local session must be
//! bound with rights to write under the refresh base, and the base's
//! superior must already exist locally.

use std::str::FromStr;
use std::sync::{Arc, Mutex};

use atrium_proto::message::{ProtoEntry, ProtoFilter, ProtoModify, ProtoModifyList, ProtoSearchScope};
use base64::{engine::general_purpose, Engine as _};
use serde::{Deserialize, Serialize};

use crate::prelude::*;
use crate::utils::jitter;

/// Stamps the local server issues itself. They are requested from the
/// provider for resume tracking but never written through.
const PROVIDER_STAMPS: &[&str] = &[
    ATTR_ENTRY_CSN,
    ATTR_ENTRY_UUID,
    ATTR_CREATE_TIMESTAMP,
    ATTR_CREATORS_NAME,
    ATTR_MODIFY_TIMESTAMP,
    ATTR_MODIFIERS_NAME,
];

/// The resume point a consumer persists between refreshes: the replica it
/// follows and the highest change stamp it has applied from that replica.
/// Hosts treat the base64 form as opaque.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct ConsumerCookie {
    pub replica_id: u16,
    pub last_csn: Csn,
}

impl ConsumerCookie {
    pub fn new(replica_id: u16) -> Self {
        ConsumerCookie {
            replica_id,
            last_csn: Csn::initial(),
        }
    }

    pub fn to_b64(&self) -> Result<String, OperationError> {
        serde_json::to_vec(self)
            .map(|bytes| general_purpose::STANDARD.encode(bytes))
            .map_err(|_| OperationError::InvalidState)
    }

    pub fn from_b64(raw: &str) -> Result<Self, OperationError> {
        let bytes = general_purpose::STANDARD
            .decode(raw)
            .map_err(|_| OperationError::InvalidState)?;
        serde_json::from_slice(&bytes).map_err(|_| OperationError::InvalidState)
    }
}

/// Where a consumer keeps its cookie between runs. Hosts provide durable
/// storage; tests and ephemeral consumers use [`MemoryCookieStore`].
pub trait CookieStore: Send + Sync {
    fn load(&self) -> Option<String>;
    fn store(&self, cookie: &str);
}

#[derive(Default)]
pub struct MemoryCookieStore {
    inner: Mutex<Option<String>>,
}

impl CookieStore for MemoryCookieStore {
    fn load(&self) -> Option<String> {
        self.inner.lock().ok().and_then(|guard| guard.clone())
    }

    fn store(&self, cookie: &str) {
        if let Ok(mut guard) = self.inner.lock() {
            *guard = Some(cookie.to_string());
        }
    }
}

#[derive(Debug, Clone)]
pub struct ReplConsumerConfig {
    /// Subtree to pull from the provider.
    pub base: String,
    pub filter: ProtoFilter,
    /// Attributes to request. Empty means every user attribute.
    pub attrs: Vec<String>,
    pub refresh_interval: Duration,
    /// The provider replica this consumer follows. A stored cookie from a
    /// different replica is discarded and a full refresh runs instead.
    pub replica_id: u16,
}

impl ReplConsumerConfig {
    pub fn new(base: String, replica_id: u16) -> Self {
        ReplConsumerConfig {
            base,
            filter: ProtoFilter::Pres(ATTR_OBJECTCLASS.to_string()),
            attrs: Vec::new(),
            refresh_interval: DEFAULT_REPL_REFRESH_INTERVAL,
            replica_id,
        }
    }
}

pub struct ReplConsumer {
    config: ReplConsumerConfig,
    store: Arc<dyn CookieStore>,
}

impl ReplConsumer {
    pub fn new(config: ReplConsumerConfig, store: Arc<dyn CookieStore>) -> Self {
        ReplConsumer { config, store }
    }

    /// How long to wait before the next refresh. Jittered so a fleet of
    /// consumers does not hit the provider in lock step.
    pub fn next_refresh(&self) -> Duration {
        jitter(self.config.refresh_interval, self.config.refresh_interval / 10)
    }

    /// An unreadable or foreign cookie means the resume point cannot be
    /// trusted, so the consumer falls back to a full refresh. Reapplying
    /// old changes is safe because apply converges rather than appends.
    fn cookie(&self) -> ConsumerCookie {
        let Some(raw) = self.store.load() else {
            return ConsumerCookie::new(self.config.replica_id);
        };
        match ConsumerCookie::from_b64(&raw) {
            Ok(cookie) if cookie.replica_id == self.config.replica_id => cookie,
            Ok(cookie) => {
                admin_warn!(
                    found = cookie.replica_id,
                    expected = self.config.replica_id,
                    "Stored cookie follows a different replica; running a full refresh"
                );
                ConsumerCookie::new(self.config.replica_id)
            }
            Err(_) => {
                admin_warn!("Stored cookie is unreadable; running a full refresh");
                ConsumerCookie::new(self.config.replica_id)
            }
        }
    }

    /// Run one refresh cycle: pull entries stamped after the cookie from
    /// `provider` and converge `local` to match, returning how many
    /// entries changed. The cookie advances only after apply, so a
    /// failure mid-cycle replays the remainder next time.
    pub fn refresh_once(
        &self,
        provider: &mut Session,
        local: &mut Session,
    ) -> Result<usize, OperationError> {
        let mut cookie = self.cookie();

        // Request the change stamp alongside whatever the host wants so
        // every result carries its resume point.
        let mut attrs = if self.config.attrs.is_empty() {
            vec!["*".to_string()]
        } else {
            self.config.attrs.clone()
        };
        attrs.push(ATTR_ENTRY_CSN.to_string());

        let (mut entries, partial) = provider.search(
            self.config.base.clone(),
            ProtoSearchScope::Subtree,
            self.config.filter.clone(),
            attrs,
            None,
            None,
        )?;
        if let Some(reason) = partial {
            request_warn!(
                ?reason,
                "Provider truncated the refresh; applying what arrived"
            );
        }

        // A child's name is strictly longer than its parent's, so length
        // order applies parents before children.
        entries.sort_by_key(|e| e.dn.len());

        let mut applied = 0;
        let mut highest = cookie.last_csn;
        for entry in entries {
            let Some(csn) = entry
                .attrs
                .get(ATTR_ENTRY_CSN)
                .and_then(|vs| vs.first())
                .and_then(|v| Csn::from_str(v).ok())
            else {
                request_warn!(dn = %entry.dn, "Skipping refresh entry without a change stamp");
                continue;
            };
            if csn <= cookie.last_csn {
                continue;
            }
            self.apply(local, entry)?;
            applied += 1;
            highest = highest.max(csn);
        }

        if highest > cookie.last_csn {
            cookie.last_csn = highest;
            self.store.store(&cookie.to_b64()?);
        }
        request_info!(applied = applied, "Replication refresh complete");
        Ok(applied)
    }

    fn apply(&self, local: &mut Session, mut entry: ProtoEntry) -> Result<(), OperationError> {
        entry
            .attrs
            .retain(|attr, _| !PROVIDER_STAMPS.contains(&attr.as_str()));

        match local.add(entry.clone()) {
            Ok(()) => Ok(()),
            Err(OperationError::AlreadyExists) => {
                // Converge the existing entry: purge user attributes the
                // provider no longer sends, then rewrite the rest.
                let (existing, _) = local.search(
                    entry.dn.clone(),
                    ProtoSearchScope::Base,
                    ProtoFilter::Pres(ATTR_OBJECTCLASS.to_string()),
                    Vec::new(),
                    None,
                    None,
                )?;
                let mut mods = Vec::new();
                if let Some(current) = existing.first() {
                    for attr in current.attrs.keys() {
                        if !entry.attrs.contains_key(attr) {
                            mods.push(ProtoModify::delete_all(attr));
                        }
                    }
                }
                for (attr, values) in &entry.attrs {
                    mods.push(ProtoModify::replace(attr, values.clone()));
                }
                local.modify(entry.dn, ProtoModifyList::new_list(mods))
            }
            Err(e) => Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::str::FromStr;
    use std::sync::Arc;

    use atrium_proto::message::{ProtoEntry, ProtoFilter, ProtoModify, ProtoModifyList, ProtoSearchScope};

    use super::{ConsumerCookie, CookieStore, MemoryCookieStore, ReplConsumer, ReplConsumerConfig};
    use crate::prelude::*;
    use crate::testkit::setup_test;

    fn replica(replica_id: u16) -> DirectoryServer {
        setup_test(DirectoryConfig {
            replica_id,
            ..Default::default()
        })
    }

    fn admin_session(server: &DirectoryServer) -> Session {
        let mut session = server.connect();
        session
            .bind(DN_ADMIN.to_string(), "secret".to_string())
            .expect("failed to bind");
        session
    }

    fn entry_csn(session: &mut Session, dn: &str) -> Csn {
        let (entries, _) = session
            .search(
                dn.to_string(),
                ProtoSearchScope::Base,
                ProtoFilter::Pres(ATTR_OBJECTCLASS.to_string()),
                vec![ATTR_ENTRY_CSN.to_string()],
                None,
                None,
            )
            .expect("search failed");
        let raw = entries
            .first()
            .and_then(|e| e.attrs.get(ATTR_ENTRY_CSN))
            .and_then(|vs| vs.first())
            .expect("entry has no change stamp");
        Csn::from_str(raw).expect("failed to parse csn")
    }

    #[test]
    fn test_consumer_cookie_round_trip() {
        let cookie = ConsumerCookie {
            replica_id: 3,
            last_csn: Csn::new_count(42),
        };
        let b64 = cookie.to_b64().expect("failed to encode");
        let back = ConsumerCookie::from_b64(&b64).expect("failed to decode");
        assert_eq!(cookie, back);

        assert!(ConsumerCookie::from_b64("not base64 at all!").is_err());
        assert!(ConsumerCookie::from_b64("aGVsbG8=").is_err());
    }

    #[test]
    fn test_consumer_refresh_and_resume() {
        let provider = replica(1);
        let secondary = replica(2);
        let mut prov = admin_session(&provider);
        let mut local = admin_session(&secondary);

        let dn = "uid=ingrid,ou=users,ou=system";
        let mut pe = ProtoEntry::new(dn.to_string());
        pe.push_ava(ATTR_OBJECTCLASS, CLASS_TOP);
        pe.push_ava(ATTR_OBJECTCLASS, CLASS_PERSON);
        pe.push_ava(ATTR_OBJECTCLASS, CLASS_ORGANIZATIONAL_PERSON);
        pe.push_ava(ATTR_OBJECTCLASS, CLASS_INET_ORG_PERSON);
        pe.push_ava(ATTR_UID, "ingrid");
        pe.push_ava(ATTR_CN, "ingrid");
        pe.push_ava(ATTR_SN, "larsen");
        pe.push_ava(ATTR_DESCRIPTION, "sales");
        prov.add(pe).expect("failed to add");

        let store: Arc<MemoryCookieStore> = Arc::new(MemoryCookieStore::default());
        let consumer = ReplConsumer::new(
            ReplConsumerConfig::new(DN_USERS.to_string(), 1),
            store.clone(),
        );

        // First refresh carries the container and the new user.
        let applied = consumer
            .refresh_once(&mut prov, &mut local)
            .expect("refresh failed");
        assert_eq!(applied, 2);
        let (entries, _) = local
            .search(
                dn.to_string(),
                ProtoSearchScope::Base,
                ProtoFilter::Pres(ATTR_OBJECTCLASS.to_string()),
                Vec::new(),
                None,
                None,
            )
            .expect("search failed");
        assert_eq!(entries.len(), 1);
        assert_eq!(
            entries[0].attrs.get(ATTR_SN),
            Some(&vec!["larsen".to_string()])
        );

        // The replica stamps its own copy; the provider's stamp does not
        // write through.
        assert_eq!(entry_csn(&mut prov, dn).replica_id, 1);
        assert_eq!(entry_csn(&mut local, dn).replica_id, 2);

        // The cookie now points at the provider's newest change, so an
        // unchanged provider yields an empty refresh.
        let cookie = store
            .load()
            .map(|raw| ConsumerCookie::from_b64(&raw).expect("failed to decode"))
            .expect("no cookie stored");
        assert_eq!(cookie.replica_id, 1);
        assert!(cookie.last_csn > Csn::initial());
        let applied = consumer
            .refresh_once(&mut prov, &mut local)
            .expect("refresh failed");
        assert_eq!(applied, 0);

        // A provider-side change lands past the cookie and flows through.
        prov.modify(
            dn.to_string(),
            ProtoModifyList::new_list(vec![ProtoModify::replace(
                ATTR_DESCRIPTION,
                vec!["on sabbatical".to_string()],
            )]),
        )
        .expect("failed to modify");
        let applied = consumer
            .refresh_once(&mut prov, &mut local)
            .expect("refresh failed");
        assert_eq!(applied, 1);
        assert!(local
            .compare(
                dn.to_string(),
                ATTR_DESCRIPTION,
                "on sabbatical".to_string(),
            )
            .expect("compare failed"));
        let advanced = store
            .load()
            .map(|raw| ConsumerCookie::from_b64(&raw).expect("failed to decode"))
            .expect("no cookie stored");
        assert!(advanced.last_csn > cookie.last_csn);
    }

    #[test]
    fn test_consumer_foreign_cookie_forces_full_refresh() {
        let provider = replica(1);
        let secondary = replica(2);
        let mut prov = admin_session(&provider);
        let mut local = admin_session(&secondary);

        // A cookie from some other replica, claiming to be far ahead.
        let store: Arc<MemoryCookieStore> = Arc::new(MemoryCookieStore::default());
        let foreign = ConsumerCookie {
            replica_id: 9,
            last_csn: Csn::new_count(u32::MAX as u64),
        };
        store.store(&foreign.to_b64().expect("failed to encode"));

        let consumer = ReplConsumer::new(
            ReplConsumerConfig::new(DN_GROUPS.to_string(), 1),
            store.clone(),
        );
        let applied = consumer
            .refresh_once(&mut prov, &mut local)
            .expect("refresh failed");
        // The foreign resume point is discarded, so the full subtree
        // applies and the stored cookie is rewritten for this replica.
        assert!(applied >= 1);
        let cookie = store
            .load()
            .map(|raw| ConsumerCookie::from_b64(&raw).expect("failed to decode"))
            .expect("no cookie stored");
        assert_eq!(cookie.replica_id, 1);
    }
}
