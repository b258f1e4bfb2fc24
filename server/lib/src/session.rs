//! Client sessions and the registry that tracks them. A session is one
//! client's conversation with the server: it owns the identity the chain
//! sees, runs every operation on the calling task, and listens for the
//! disconnect notice the server sends when it shuts down.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use atrium_proto::message::{
    DirectoryReply, DirectoryRequest, ProtoEntry, ProtoFilter, ProtoModifyList,
    ProtoPartialReason, ProtoSearchScope,
};
use concread::cowcell::*;
use hashbrown::HashMap;
use tokio::sync::{mpsc, oneshot};

use crate::event::{
    AddEvent, BindEvent, CompareEvent, DeleteEvent, ModifyEvent, MoveAndRenameEvent, MoveEvent,
    RenameEvent, SearchEvent, UnbindEvent,
};
use crate::prelude::*;

/// Sent to every live session when the server begins shutting down. The
/// receiver calls [`DisconnectNotice::ack`] once it has stopped issuing
/// work; sessions that never answer are force-closed when the shutdown
/// delay expires.
pub struct DisconnectNotice {
    ack: oneshot::Sender<()>,
}

impl DisconnectNotice {
    /// Tell the server this session is done. Acknowledging after the
    /// deadline is harmless; the server has already moved on.
    pub fn ack(self) {
        let _ = self.ack.send(());
    }
}

#[derive(Clone)]
struct SessionHandle {
    notice_tx: mpsc::Sender<DisconnectNotice>,
    interrupt: Arc<AtomicBool>,
}

/// Bookkeeping for live sessions. The server consults it only at shutdown,
/// so it holds notification handles, never the sessions themselves.
pub struct SessionRegistry {
    inner: CowCell<HashMap<Uuid, SessionHandle>>,
}

impl Default for SessionRegistry {
    fn default() -> Self {
        SessionRegistry {
            inner: CowCell::new(HashMap::new()),
        }
    }
}

impl SessionRegistry {
    /// Register a session, returning its interrupt flag and the receiver
    /// its disconnect notice will arrive on.
    pub(crate) fn register(
        &self,
        session_id: Uuid,
    ) -> (Arc<AtomicBool>, mpsc::Receiver<DisconnectNotice>) {
        let (notice_tx, notice_rx) = mpsc::channel(1);
        let interrupt = Arc::new(AtomicBool::new(false));
        let mut wr = self.inner.write();
        wr.insert(
            session_id,
            SessionHandle {
                notice_tx,
                interrupt: interrupt.clone(),
            },
        );
        wr.commit();
        (interrupt, notice_rx)
    }

    pub(crate) fn remove(&self, session_id: Uuid) {
        let mut wr = self.inner.write();
        if wr.remove(&session_id).is_some() {
            wr.commit();
        }
    }

    /// Queue a disconnect notice to every session except `except`,
    /// returning the acknowledgement receivers. Queueing never blocks; a
    /// session that is not listening misses its notice and is swept at
    /// the deadline instead.
    pub(crate) fn notify_all(&self, except: Uuid) -> Vec<(Uuid, oneshot::Receiver<()>)> {
        let rd = self.inner.read();
        let mut acks = Vec::with_capacity(rd.len());
        for (session_id, handle) in rd.iter() {
            if *session_id == except {
                continue;
            }
            let (tx, rx) = oneshot::channel();
            if handle.notice_tx.try_send(DisconnectNotice { ack: tx }).is_ok() {
                acks.push((*session_id, rx));
            }
        }
        acks
    }

    /// Raise every remaining session's interrupt flag and clear the
    /// registry. Returns how many sessions were swept.
    pub(crate) fn interrupt_all(&self) -> usize {
        let mut wr = self.inner.write();
        let count = wr.len();
        for handle in wr.values() {
            handle.interrupt.store(true, Ordering::Release);
        }
        wr.clear();
        wr.commit();
        count
    }

    // Read only from tests.
    #[allow(dead_code)]
    pub(crate) fn count(&self) -> usize {
        self.inner.read().len()
    }
}

/// One client's conversation with the server. Sessions start anonymous; a
/// successful bind upgrades the identity in place, and every operation
/// runs through the full interceptor chain on the calling task.
pub struct Session {
    server: DirectoryServer,
    ident: Identity,
    session_id: Uuid,
    interrupt: Arc<AtomicBool>,
    notice_rx: mpsc::Receiver<DisconnectNotice>,
}

impl Session {
    pub(crate) fn new(
        server: DirectoryServer,
        session_id: Uuid,
        interrupt: Arc<AtomicBool>,
        notice_rx: mpsc::Receiver<DisconnectNotice>,
    ) -> Self {
        Session {
            ident: Identity::from_anonymous(session_id),
            server,
            session_id,
            interrupt,
            notice_rx,
        }
    }

    /// Every operation passes this gate before entering the chain: the
    /// server must be running, and any stale interrupt from an earlier
    /// abandonment is lowered so it cannot poison this request.
    fn begin(&self) -> Result<(), OperationError> {
        self.server.assert_running()?;
        self.interrupt.store(false, Ordering::Release);
        Ok(())
    }

    pub fn add(&mut self, entry: ProtoEntry) -> Result<(), OperationError> {
        self.begin()?;
        let mut ev = AddEvent::from_message(self.ident.clone(), entry);
        ev.op.set_abandon_handle(self.interrupt.clone());
        self.server.chain().add(&mut ev)
    }

    pub fn delete(&mut self, dn: String, subtree: bool) -> Result<(), OperationError> {
        self.begin()?;
        let mut ev = DeleteEvent::from_message(self.ident.clone(), dn, subtree);
        ev.op.set_abandon_handle(self.interrupt.clone());
        self.server.chain().delete(&mut ev)
    }

    pub fn modify(&mut self, dn: String, list: ProtoModifyList) -> Result<(), OperationError> {
        self.begin()?;
        let mut ev = ModifyEvent::from_message(self.ident.clone(), dn, list);
        ev.op.set_abandon_handle(self.interrupt.clone());
        self.server.chain().modify(&mut ev)
    }

    /// Run a search and project the results for the wire. The attribute
    /// selection semantics live in [`Entry::to_proto`].
    pub fn search(
        &mut self,
        base: String,
        scope: ProtoSearchScope,
        filter: ProtoFilter,
        attrs: Vec<String>,
        size_limit: Option<u64>,
        time_limit: Option<u64>,
    ) -> Result<(Vec<ProtoEntry>, Option<ProtoPartialReason>), OperationError> {
        self.begin()?;
        let mut ev = SearchEvent::from_message(
            self.ident.clone(),
            base,
            scope,
            filter,
            attrs,
            size_limit,
            time_limit,
        );
        ev.op.set_abandon_handle(self.interrupt.clone());
        let reply = self.server.chain().search(&mut ev)?;

        let sr = self.server.schema().read();
        let entries = reply
            .entries
            .iter()
            .map(|e| e.to_proto(ev.attrs.as_ref(), &sr))
            .collect();
        Ok((entries, reply.partial))
    }

    pub fn compare(&mut self, dn: String, attr: &str, value: String) -> Result<bool, OperationError> {
        self.begin()?;
        let mut ev = CompareEvent::from_message(self.ident.clone(), dn, attr, value);
        ev.op.set_abandon_handle(self.interrupt.clone());
        self.server.chain().compare(&mut ev)
    }

    /// Authenticate this session. On success the identity is replaced; on
    /// failure the association falls back to anonymous, never to the
    /// previously bound identity.
    pub fn bind(&mut self, dn: String, credential: String) -> Result<(), OperationError> {
        self.begin()?;
        let mut ev = BindEvent::from_message(self.ident.clone(), dn, credential);
        ev.op.set_abandon_handle(self.interrupt.clone());
        match self.server.chain().bind(&mut ev) {
            Ok(ident) => {
                self.ident = ident;
                Ok(())
            }
            Err(e) => {
                self.ident = Identity::from_anonymous(self.session_id);
                Err(e)
            }
        }
    }

    /// Drop authentication and deregister from shutdown notifications.
    /// Deliberately not phase-gated: a client saying goodbye during
    /// shutdown is doing exactly what was asked of it.
    pub fn unbind(&mut self) -> Result<(), OperationError> {
        let mut ev = UnbindEvent::from_message(self.ident.clone());
        ev.op.set_abandon_handle(self.interrupt.clone());
        self.server.chain().unbind(&mut ev)?;
        self.ident = Identity::from_anonymous(self.session_id);
        self.server.registry().remove(self.session_id);
        Ok(())
    }

    pub fn rename(
        &mut self,
        dn: String,
        new_rdn: String,
        delete_old_rdn: bool,
    ) -> Result<Dn, OperationError> {
        self.begin()?;
        let mut ev = RenameEvent::from_message(self.ident.clone(), dn, new_rdn, delete_old_rdn);
        ev.op.set_abandon_handle(self.interrupt.clone());
        self.server.chain().rename(&mut ev)
    }

    pub fn move_to(&mut self, dn: String, new_superior: String) -> Result<Dn, OperationError> {
        self.begin()?;
        let mut ev = MoveEvent::from_message(self.ident.clone(), dn, new_superior);
        ev.op.set_abandon_handle(self.interrupt.clone());
        self.server.chain().move_subtree(&mut ev)
    }

    pub fn move_and_rename(
        &mut self,
        dn: String,
        new_superior: String,
        new_rdn: String,
        delete_old_rdn: bool,
    ) -> Result<Dn, OperationError> {
        self.begin()?;
        let mut ev = MoveAndRenameEvent::from_message(
            self.ident.clone(),
            dn,
            new_superior,
            new_rdn,
            delete_old_rdn,
        );
        ev.op.set_abandon_handle(self.interrupt.clone());
        self.server.chain().move_and_rename(&mut ev)
    }

    /// The name this session is bound as, if any.
    pub fn whoami(&self) -> Option<&Dn> {
        self.ident.user_dn()
    }

    /// A handle another task may use to abandon whatever this session is
    /// currently running. The flag resets at the start of each operation.
    pub fn interrupt_handle(&self) -> Arc<AtomicBool> {
        self.interrupt.clone()
    }

    /// Wait for a shutdown disconnect notice. Returns `None` once the
    /// server has dropped this session's registration.
    pub async fn recv_disconnect(&mut self) -> Option<DisconnectNotice> {
        self.notice_rx.recv().await
    }

    /// Dispatch one decoded protocol request. Front-ends that do not need
    /// typed results use this single entry point.
    pub fn execute(&mut self, req: DirectoryRequest) -> Result<DirectoryReply, OperationError> {
        match req {
            DirectoryRequest::Add { entry } => self.add(entry).map(|()| DirectoryReply::Success),
            DirectoryRequest::Delete { dn, subtree } => {
                self.delete(dn, subtree).map(|()| DirectoryReply::Success)
            }
            DirectoryRequest::Modify { dn, list } => {
                self.modify(dn, list).map(|()| DirectoryReply::Success)
            }
            DirectoryRequest::Search {
                base,
                scope,
                filter,
                attrs,
                size_limit,
                time_limit,
            } => self
                .search(base, scope, filter, attrs, size_limit, time_limit)
                .map(|(entries, partial)| DirectoryReply::Entries { entries, partial }),
            DirectoryRequest::Compare { dn, attr, value } => {
                self.compare(dn, &attr, value).map(DirectoryReply::Compared)
            }
            DirectoryRequest::Bind { dn, credential } => {
                self.bind(dn, credential).map(|()| DirectoryReply::Bound {
                    dn: self.whoami().map(|d| d.to_string()).unwrap_or_default(),
                })
            }
            DirectoryRequest::Unbind => self.unbind().map(|()| DirectoryReply::Success),
            DirectoryRequest::Rename {
                dn,
                new_rdn,
                delete_old_rdn,
            } => self
                .rename(dn, new_rdn, delete_old_rdn)
                .map(|_| DirectoryReply::Success),
            DirectoryRequest::Move { dn, new_superior } => self
                .move_to(dn, new_superior)
                .map(|_| DirectoryReply::Success),
            DirectoryRequest::MoveAndRename {
                dn,
                new_superior,
                new_rdn,
                delete_old_rdn,
            } => self
                .move_and_rename(dn, new_superior, new_rdn, delete_old_rdn)
                .map(|_| DirectoryReply::Success),
        }
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.server.registry().remove(self.session_id);
    }
}
