//! Access control enforcement.
//!
//! This is a pretty important and security sensitive part of the code - it's
//! responsible for making sure that who is allowed to do what is enforced, as
//! well as who is *not* allowed to do what.
//!
//! Prescriptive items live as text on subentries; the parsed form is cached
//! here, keyed by the subentry uuid, beside the administrative point each
//! subentry governs. An operation is checked against the nearest ancestor
//! point only: every subentry of that point applies, outer points are
//! shadowed. Within the applicable items the highest precedence band wins, a
//! denial beats a grant inside that band, and a requester with no explicit
//! grant is refused.

pub mod aci;

use std::collections::BTreeSet;
use std::sync::Arc;

use concread::bptree::{BptreeMap, BptreeMapReadSnapshot, BptreeMapReadTxn, BptreeMapWriteTxn};

use self::aci::{AciItem, AuthLevel, Permission};
use crate::prelude::*;

/// One access control area: the administrative point that anchors it, the
/// subentry that prescribes it, and the items in force.
#[derive(Debug, Clone)]
pub struct AccessArea {
    pub point: Dn,
    pub subentry: Dn,
    pub items: Vec<AciItem>,
}

#[derive(Default)]
pub struct AccessControls {
    inner: BptreeMap<Uuid, Arc<AccessArea>>,
}

impl AccessControls {
    pub fn read(&self) -> AccessControlsReadTransaction<'_> {
        AccessControlsReadTransaction {
            inner: self.inner.read(),
        }
    }

    pub fn write(&self) -> AccessControlsWriteTransaction<'_> {
        AccessControlsWriteTransaction {
            inner: self.inner.write(),
        }
    }
}

pub struct AccessControlsReadTransaction<'a> {
    inner: BptreeMapReadTxn<'a, Uuid, Arc<AccessArea>>,
}

pub struct AccessControlsWriteTransaction<'a> {
    inner: BptreeMapWriteTxn<'a, Uuid, Arc<AccessArea>>,
}

/// The precedence band walk. Only items the requester satisfies
/// (authentication level and user class) and that speak to this permission
/// and attribute count; the highest precedence among them decides, with
/// denial beating grant at equal precedence. Nothing applicable means
/// refusal.
fn decide<'a, I>(items: I, ident: &Identity, level: AuthLevel, perm: Permission, attr: Option<&str>) -> bool
where
    I: IntoIterator<Item = &'a AciItem>,
{
    let mut band: Option<u8> = None;
    let mut granted = false;
    let mut denied = false;

    for item in items {
        if item.auth_level > level || !item.applies_to(ident) {
            continue;
        }
        let g = item.grants(perm, attr);
        let d = item.denies(perm, attr);
        if !g && !d {
            continue;
        }
        match band {
            Some(b) if b > item.precedence => continue,
            Some(b) if b == item.precedence => {
                granted |= g;
                denied |= d;
            }
            _ => {
                band = Some(item.precedence);
                granted = g;
                denied = d;
            }
        }
    }

    granted && !denied
}

pub trait AccessControlsTransaction {
    fn get_areas(&self) -> BptreeMapReadSnapshot<'_, Uuid, Arc<AccessArea>>;

    /// The areas in force at `target`: every subentry of the nearest
    /// ancestor administrative point covering the target. Subentries of one
    /// point all apply together; outer points are shadowed entirely.
    /// Entries outside every area have no prescriptions, so nothing can be
    /// granted there.
    fn areas_for(&self, target: &Dn) -> Vec<Arc<AccessArea>> {
        let snap = self.get_areas();
        let nearest = snap
            .iter()
            .filter(|(_, area)| target.is_under(&area.point))
            .map(|(_, area)| area.point.depth())
            .max();
        match nearest {
            Some(depth) => snap
                .iter()
                .filter(|(_, area)| {
                    area.point.depth() == depth && target.is_under(&area.point)
                })
                .map(|(_, area)| area.clone())
                .collect(),
            None => Vec::new(),
        }
    }

    fn check_permission(
        &self,
        ident: &Identity,
        perm: Permission,
        target: &Dn,
        attr: Option<&str>,
    ) -> bool {
        if ident.is_internal() || ident.is_admin() {
            return true;
        }

        let areas = self.areas_for(target);
        let granted = !areas.is_empty()
            && decide(
                areas.iter().flat_map(|area| area.items.iter()),
                ident,
                AuthLevel::for_identity(ident),
                perm,
                attr,
            );

        security_access!(
            ident = %ident,
            target = %target,
            ?perm,
            granted,
            "access decision"
        );

        granted
    }

    /// The subset of `attrs` the identity may read on `target`. Used to
    /// reduce search results after the entry itself passed its browse check.
    fn reduce_read_attributes(
        &self,
        ident: &Identity,
        target: &Dn,
        attrs: &BTreeSet<AttrString>,
    ) -> BTreeSet<AttrString> {
        if ident.is_internal() || ident.is_admin() {
            return attrs.clone();
        }

        let areas = self.areas_for(target);
        if areas.is_empty() {
            return BTreeSet::new();
        }
        let level = AuthLevel::for_identity(ident);

        attrs
            .iter()
            .filter(|a| {
                decide(
                    areas.iter().flat_map(|area| area.items.iter()),
                    ident,
                    level,
                    Permission::Read,
                    Some(a.as_str()),
                )
            })
            .cloned()
            .collect()
    }
}

impl AccessControlsTransaction for AccessControlsReadTransaction<'_> {
    fn get_areas(&self) -> BptreeMapReadSnapshot<'_, Uuid, Arc<AccessArea>> {
        self.inner.to_snapshot()
    }
}

impl AccessControlsTransaction for AccessControlsWriteTransaction<'_> {
    fn get_areas(&self) -> BptreeMapReadSnapshot<'_, Uuid, Arc<AccessArea>> {
        self.inner.to_snapshot()
    }
}

impl<'a> AccessControlsWriteTransaction<'a> {
    /// Install the items one subentry prescribes, replacing whatever that
    /// subentry held before. The caller parses first - a malformed item
    /// never reaches this point.
    pub fn update_subentry(&mut self, uuid: Uuid, area: AccessArea) {
        self.inner.insert(uuid, Arc::new(area));
    }

    pub fn remove_subentry(&mut self, uuid: Uuid) {
        self.inner.remove(&uuid);
    }

    pub fn clear(&mut self) {
        self.inner.clear();
    }

    pub fn commit(self) {
        self.inner.commit();
    }
}
