//! Operation contexts. One is built per client request (or internal
//! sub-request), carries the acting identity and the request payload through
//! the interceptor chain, and is destroyed when the operation completes.
//!
//! Payload fields arrive as raw protocol text and are bound to their schema
//! forms by the normalization stage; internal constructors start out
//! resolved, which is why an internal operation never needs that stage.

use std::collections::BTreeSet;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use atrium_proto::message::{
    ProtoEntry, ProtoFilter, ProtoModifyList, ProtoPartialReason, ProtoSearchScope,
};

use crate::interceptor::{INTERCEPTOR_AUTHN, INTERCEPTOR_AUTHZ};
use crate::prelude::*;
use crate::utils::duration_from_epoch_now;

/// A request value in one of two states: raw as the front-end decoded it,
/// or resolved against the schema. Stages behind normalization only ever
/// see `Resolved`; reaching one with a raw payload is a misconfigured chain.
#[derive(Debug, Clone)]
pub enum Payload<R, T> {
    Raw(R),
    Resolved(T),
}

impl<R, T> Payload<R, T> {
    pub fn resolved(&self) -> Result<&T, OperationError> {
        match self {
            Payload::Resolved(t) => Ok(t),
            Payload::Raw(_) => Err(OperationError::InvalidState),
        }
    }

    pub fn resolved_mut(&mut self) -> Result<&mut T, OperationError> {
        match self {
            Payload::Resolved(t) => Ok(t),
            Payload::Raw(_) => Err(OperationError::InvalidState),
        }
    }

    /// Bind a raw payload with `f`. Already-resolved payloads pass through
    /// untouched, so internal operations cross the stage as a no-op.
    pub fn resolve_with<F>(&mut self, f: F) -> Result<(), OperationError>
    where
        F: FnOnce(&R) -> Result<T, OperationError>,
    {
        if let Payload::Raw(r) = self {
            *self = Payload::Resolved(f(r)?);
        }
        Ok(())
    }
}

/// The header every operation context embeds.
#[derive(Debug, Clone)]
pub struct Operation {
    pub ident: Identity,
    /// Interceptor names this operation skips. Internal sub-operations use
    /// this so the issuing stage does not re-enter itself.
    pub bypass: BTreeSet<&'static str>,
    /// Shared with the front-end, which flips it when the client abandons
    /// the request. Observed between stages.
    abandon: Arc<AtomicBool>,
    /// Receive time, as a duration from the unix epoch.
    pub ctime: Duration,
}

impl Operation {
    pub fn new(ident: Identity) -> Self {
        Operation {
            ident,
            bypass: BTreeSet::new(),
            abandon: Arc::new(AtomicBool::new(false)),
            ctime: duration_from_epoch_now(),
        }
    }

    /// A server-origin operation. Authentication and authorization do not
    /// apply to the server acting on its own behalf.
    pub fn new_internal() -> Self {
        let mut op = Operation::new(Identity::from_internal());
        op.bypass.insert(INTERCEPTOR_AUTHN);
        op.bypass.insert(INTERCEPTOR_AUTHZ);
        op
    }

    pub fn is_bypassed(&self, name: &str) -> bool {
        self.bypass.contains(name)
    }

    pub fn bypass_stage(mut self, name: &'static str) -> Self {
        self.bypass.insert(name);
        self
    }

    pub fn is_abandoned(&self) -> bool {
        self.abandon.load(Ordering::Acquire)
    }

    /// The flag handle the front-end keeps to signal abandonment.
    pub fn abandon_handle(&self) -> Arc<AtomicBool> {
        self.abandon.clone()
    }

    /// Replace the abandon flag with one owned by the caller. Sessions use
    /// this to share a single interrupt flag across the operations they
    /// dispatch.
    pub(crate) fn set_abandon_handle(&mut self, handle: Arc<AtomicBool>) {
        self.abandon = handle;
    }
}

pub struct AddEvent {
    pub op: Operation,
    pub entry: Payload<ProtoEntry, Entry>,
}

impl AddEvent {
    pub fn from_message(ident: Identity, entry: ProtoEntry) -> Self {
        AddEvent {
            op: Operation::new(ident),
            entry: Payload::Raw(entry),
        }
    }

    pub fn new_internal(entry: Entry) -> Self {
        AddEvent {
            op: Operation::new_internal(),
            entry: Payload::Resolved(entry),
        }
    }

    #[cfg(test)]
    #[allow(dead_code)]
    pub(crate) fn new_impersonate(ident: Identity, entry: Entry) -> Self {
        AddEvent {
            op: Operation::new(ident),
            entry: Payload::Resolved(entry),
        }
    }
}

pub struct DeleteEvent {
    pub op: Operation,
    pub target: Payload<String, Dn>,
    /// Delete the whole subtree rather than requiring a leaf.
    pub subtree: bool,
}

impl DeleteEvent {
    pub fn from_message(ident: Identity, dn: String, subtree: bool) -> Self {
        DeleteEvent {
            op: Operation::new(ident),
            target: Payload::Raw(dn),
            subtree,
        }
    }

    pub fn new_internal(dn: Dn, subtree: bool) -> Self {
        DeleteEvent {
            op: Operation::new_internal(),
            target: Payload::Resolved(dn),
            subtree,
        }
    }

    #[cfg(test)]
    #[allow(dead_code)]
    pub(crate) fn new_impersonate(ident: Identity, dn: Dn, subtree: bool) -> Self {
        DeleteEvent {
            op: Operation::new(ident),
            target: Payload::Resolved(dn),
            subtree,
        }
    }
}

pub struct ModifyEvent {
    pub op: Operation,
    pub target: Payload<String, Dn>,
    pub modlist: Payload<ProtoModifyList, ModifyList>,
}

impl ModifyEvent {
    pub fn from_message(ident: Identity, dn: String, list: ProtoModifyList) -> Self {
        ModifyEvent {
            op: Operation::new(ident),
            target: Payload::Raw(dn),
            modlist: Payload::Raw(list),
        }
    }

    pub fn new_internal(dn: Dn, modlist: ModifyList) -> Self {
        ModifyEvent {
            op: Operation::new_internal(),
            target: Payload::Resolved(dn),
            modlist: Payload::Resolved(modlist),
        }
    }

    #[cfg(test)]
    #[allow(dead_code)]
    pub(crate) fn new_impersonate(ident: Identity, dn: Dn, modlist: ModifyList) -> Self {
        ModifyEvent {
            op: Operation::new(ident),
            target: Payload::Resolved(dn),
            modlist: Payload::Resolved(modlist),
        }
    }
}

pub struct SearchEvent {
    pub op: Operation,
    pub base: Payload<String, Dn>,
    pub scope: SearchScope,
    pub filter: Payload<ProtoFilter, Filter>,
    /// Attribute names the client asked for, folded. `None` returns every
    /// user attribute; operational attributes only appear when named.
    pub attrs: Option<BTreeSet<AttrString>>,
    pub size_limit: Option<u64>,
    pub time_limit: Option<Duration>,
}

impl SearchEvent {
    #[allow(clippy::too_many_arguments)]
    pub fn from_message(
        ident: Identity,
        base: String,
        scope: ProtoSearchScope,
        filter: ProtoFilter,
        attrs: Vec<String>,
        size_limit: Option<u64>,
        time_limit: Option<u64>,
    ) -> Self {
        let attrs = if attrs.is_empty() {
            None
        } else {
            Some(attrs.iter().map(|a| attr_fold(a)).collect())
        };
        SearchEvent {
            op: Operation::new(ident),
            base: Payload::Raw(base),
            scope: scope.into(),
            filter: Payload::Raw(filter),
            attrs,
            size_limit,
            time_limit: time_limit.map(Duration::from_secs),
        }
    }

    pub fn new_internal(base: Dn, scope: SearchScope, filter: Filter) -> Self {
        SearchEvent {
            op: Operation::new_internal(),
            base: Payload::Resolved(base),
            scope,
            filter: Payload::Resolved(filter),
            attrs: None,
            size_limit: None,
            time_limit: None,
        }
    }

    #[cfg(test)]
    pub(crate) fn new_impersonate(
        ident: Identity,
        base: Dn,
        scope: SearchScope,
        filter: Filter,
    ) -> Self {
        SearchEvent {
            op: Operation::new(ident),
            base: Payload::Resolved(base),
            scope,
            filter: Payload::Resolved(filter),
            attrs: None,
            size_limit: None,
            time_limit: None,
        }
    }

    /// Session limits tightened by whatever the request asked for. A
    /// request can never widen the session's own bounds.
    pub fn effective_limits(&self) -> Limits {
        let session = self.op.ident.limits();
        let mut limits = *session;
        if let Some(s) = self.size_limit {
            if s > 0 {
                limits.search_max_results = limits.search_max_results.min(s);
            }
        }
        if let Some(t) = self.time_limit {
            if !t.is_zero() {
                limits.search_time = limits.search_time.min(t);
            }
        }
        limits
    }
}

/// The outcome of a search. `partial` marks result sets truncated by a
/// resource limit; truncation is an outcome, not a failure.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct SearchReply {
    pub entries: Vec<Entry>,
    pub partial: Option<ProtoPartialReason>,
}

pub struct CompareEvent {
    pub op: Operation,
    pub target: Payload<String, Dn>,
    pub attr: AttrString,
    pub value: Payload<String, PartialValue>,
}

impl CompareEvent {
    pub fn from_message(ident: Identity, dn: String, attr: &str, value: String) -> Self {
        CompareEvent {
            op: Operation::new(ident),
            target: Payload::Raw(dn),
            attr: attr_fold(attr),
            value: Payload::Raw(value),
        }
    }

    pub fn new_internal(dn: Dn, attr: &str, value: PartialValue) -> Self {
        CompareEvent {
            op: Operation::new_internal(),
            target: Payload::Resolved(dn),
            attr: attr_fold(attr),
            value: Payload::Resolved(value),
        }
    }
}

pub struct BindEvent {
    pub op: Operation,
    /// The root name binds anonymously.
    pub target: Payload<String, Dn>,
    pub credential: String,
}

impl BindEvent {
    pub fn from_message(ident: Identity, dn: String, credential: String) -> Self {
        BindEvent {
            op: Operation::new(ident),
            target: Payload::Raw(dn),
            credential,
        }
    }
}

impl fmt::Debug for BindEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BindEvent")
            .field("target", &self.target)
            .field("credential", &"<redacted>")
            .finish()
    }
}

pub struct UnbindEvent {
    pub op: Operation,
}

impl UnbindEvent {
    pub fn from_message(ident: Identity) -> Self {
        UnbindEvent {
            op: Operation::new(ident),
        }
    }
}

pub struct RenameEvent {
    pub op: Operation,
    pub target: Payload<String, Dn>,
    pub new_rdn: Payload<String, Rdn>,
    pub delete_old_rdn: bool,
}

impl RenameEvent {
    pub fn from_message(ident: Identity, dn: String, new_rdn: String, delete_old_rdn: bool) -> Self {
        RenameEvent {
            op: Operation::new(ident),
            target: Payload::Raw(dn),
            new_rdn: Payload::Raw(new_rdn),
            delete_old_rdn,
        }
    }

    pub fn new_internal(dn: Dn, new_rdn: Rdn, delete_old_rdn: bool) -> Self {
        RenameEvent {
            op: Operation::new_internal(),
            target: Payload::Resolved(dn),
            new_rdn: Payload::Resolved(new_rdn),
            delete_old_rdn,
        }
    }
}

pub struct MoveEvent {
    pub op: Operation,
    pub target: Payload<String, Dn>,
    pub new_superior: Payload<String, Dn>,
}

impl MoveEvent {
    pub fn from_message(ident: Identity, dn: String, new_superior: String) -> Self {
        MoveEvent {
            op: Operation::new(ident),
            target: Payload::Raw(dn),
            new_superior: Payload::Raw(new_superior),
        }
    }

    pub fn new_internal(dn: Dn, new_superior: Dn) -> Self {
        MoveEvent {
            op: Operation::new_internal(),
            target: Payload::Resolved(dn),
            new_superior: Payload::Resolved(new_superior),
        }
    }
}

pub struct MoveAndRenameEvent {
    pub op: Operation,
    pub target: Payload<String, Dn>,
    pub new_superior: Payload<String, Dn>,
    pub new_rdn: Payload<String, Rdn>,
    pub delete_old_rdn: bool,
}

impl MoveAndRenameEvent {
    pub fn from_message(
        ident: Identity,
        dn: String,
        new_superior: String,
        new_rdn: String,
        delete_old_rdn: bool,
    ) -> Self {
        MoveAndRenameEvent {
            op: Operation::new(ident),
            target: Payload::Raw(dn),
            new_superior: Payload::Raw(new_superior),
            new_rdn: Payload::Raw(new_rdn),
            delete_old_rdn,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[test]
    fn test_event_payload_resolution() {
        let mut p: Payload<String, u32> = Payload::Raw("17".to_string());
        assert_eq!(p.resolved(), Err(OperationError::InvalidState));

        p.resolve_with(|r| r.parse::<u32>().map_err(|_| OperationError::InvalidState))
            .expect("failed to resolve");
        assert_eq!(p.resolved(), Ok(&17));

        // A second resolution pass is a no-op, not a re-parse.
        p.resolve_with(|_| Err(OperationError::InvalidState))
            .expect("resolved payload must pass through");
        assert_eq!(p.resolved(), Ok(&17));
    }

    #[test]
    fn test_event_internal_bypasses_auth_stages() {
        let op = Operation::new_internal();
        assert!(op.ident.is_internal());
        assert!(op.is_bypassed(crate::interceptor::INTERCEPTOR_AUTHN));
        assert!(op.is_bypassed(crate::interceptor::INTERCEPTOR_AUTHZ));
        assert!(!op.is_bypassed(crate::interceptor::INTERCEPTOR_SCHEMA));
    }

    #[test]
    fn test_event_abandon_flag_is_shared() {
        let op = Operation::new(Identity::from_anonymous(Uuid::new_v4()));
        assert!(!op.is_abandoned());
        let handle = op.abandon_handle();
        handle.store(true, std::sync::atomic::Ordering::Release);
        assert!(op.is_abandoned());
    }

    #[test]
    fn test_event_effective_limits_only_tighten() {
        let schema = Schema::new().expect("failed to bootstrap schema");
        let sr = schema.read();
        let base = Dn::parse(DN_SYSTEM, &sr).expect("failed to parse dn");

        let mut ev = SearchEvent::new_impersonate(
            Identity::from_anonymous(Uuid::new_v4()),
            base,
            SearchScope::Subtree,
            Filter::all_entries(),
        );

        // Tighter than the session: honoured.
        ev.size_limit = Some(10);
        ev.time_limit = Some(Duration::from_secs(1));
        let l = ev.effective_limits();
        assert_eq!(l.search_max_results, 10);
        assert_eq!(l.search_time, Duration::from_secs(1));

        // Wider than the session: clamped back.
        ev.size_limit = Some(u64::MAX);
        ev.time_limit = Some(Duration::from_secs(86_400));
        let l = ev.effective_limits();
        assert_eq!(l.search_max_results, DEFAULT_LIMIT_SEARCH_MAX_RESULTS);
        assert_eq!(l.search_time, DEFAULT_LIMIT_SEARCH_TIME);

        // Zero means "no request-side limit", not zero results.
        ev.size_limit = Some(0);
        ev.time_limit = Some(Duration::ZERO);
        let l = ev.effective_limits();
        assert_eq!(l.search_max_results, DEFAULT_LIMIT_SEARCH_MAX_RESULTS);
        assert_eq!(l.search_time, DEFAULT_LIMIT_SEARCH_TIME);
    }

    #[test]
    fn test_event_bind_debug_redacts_credential() {
        let ev = BindEvent::from_message(
            Identity::from_anonymous(Uuid::new_v4()),
            DN_ADMIN.to_string(),
            "hunter2".to_string(),
        );
        let out = format!("{:?}", ev);
        assert!(!out.contains("hunter2"));
        assert!(out.contains("<redacted>"));
    }
}
