use std::sync::{RwLock, RwLockWriteGuard};

use crate::cache::EntityCache;
use crate::error::{Error, Result};
use crate::models::{Application, Candidate, Country, Document, EntityKind, JobRequisition, Tag};

use super::Engine;

/// The caches an operation locks for writing.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub(crate) struct LockSet {
    country: bool,
    requisition: bool,
    candidate: bool,
    application: bool,
    tag: bool,
}

impl LockSet {
    pub const ALL: LockSet = LockSet {
        country: true,
        requisition: true,
        candidate: true,
        application: true,
        tag: true,
    };

    pub const fn of(kinds: &[EntityKind]) -> Self {
        let mut set = LockSet {
            country: false,
            requisition: false,
            candidate: false,
            application: false,
            tag: false,
        };
        let mut i = 0;
        while i < kinds.len() {
            match kinds[i] {
                EntityKind::Country => set.country = true,
                EntityKind::JobRequisition => set.requisition = true,
                EntityKind::Candidate => set.candidate = true,
                EntityKind::Application => set.application = true,
                EntityKind::Tag => set.tag = true,
            }
            i += 1;
        }
        set
    }
}

type Slot<'a, T> = Option<RwLockWriteGuard<'a, EntityCache<T>>>;

/// Write guards held by one operation. Fields are in lock order.
pub(crate) struct Guards<'a> {
    pub country: Slot<'a, Country>,
    pub requisition: Slot<'a, JobRequisition>,
    pub candidate: Slot<'a, Candidate>,
    pub application: Slot<'a, Application>,
    pub tag: Slot<'a, Tag>,
}

fn acquire<T: Document>(lock: &RwLock<EntityCache<T>>, wanted: bool) -> Result<Slot<'_, T>> {
    if !wanted {
        return Ok(None);
    }
    lock.write()
        .map(Some)
        .map_err(|_| Error::LockPoisoned { entity: T::KIND })
}

impl Engine {
    pub(crate) fn lock(&self, set: LockSet) -> Result<Guards<'_>> {
        let country = acquire(&self.countries, set.country)?;
        let requisition = acquire(&self.requisitions, set.requisition)?;
        let candidate = acquire(&self.candidates, set.candidate)?;
        let application = acquire(&self.applications, set.application)?;
        let tag = acquire(&self.tags, set.tag)?;
        Ok(Guards {
            country,
            requisition,
            candidate,
            application,
            tag,
        })
    }
}

fn not_held(entity: EntityKind) -> Error {
    Error::consistency("lock", format!("{entity} cache used without its lock"))
}

pub(crate) fn held<'g, T: Document>(slot: &'g mut Slot<'_, T>) -> Result<&'g mut EntityCache<T>> {
    slot.as_deref_mut().ok_or_else(|| not_held(T::KIND))
}

pub(crate) fn held_ref<'g, T: Document>(slot: &'g Slot<'_, T>) -> Result<&'g EntityCache<T>> {
    slot.as_deref().ok_or_else(|| not_held(T::KIND))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lock_set_from_kinds() {
        let set = LockSet::of(&[EntityKind::Tag, EntityKind::Country]);
        assert!(set.country && set.tag);
        assert!(!set.candidate && !set.requisition && !set.application);
        assert_eq!(LockSet::of(&EntityKind::ALL), LockSet::ALL);
    }

    #[test]
    fn unheld_cache_is_reported() {
        let (_store, engine) = super::super::testing::engine();
        let mut g = engine.lock(LockSet::of(&[EntityKind::Tag])).unwrap();
        assert!(held(&mut g.tag).is_ok());
        assert!(matches!(
            held_ref(&g.candidate),
            Err(Error::Consistency { .. })
        ));
    }
}
