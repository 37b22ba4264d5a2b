//! The consistency engine: one lock-protected cache per entity type, cascades
//! across them, and the CRUD surface handed to the routing layer.
//!
//! Lock order is the declaration order of `EntityKind`:
//! Country < JobRequisition < Candidate < Application < Tag. Reads take one
//! read lock. Writes take every write lock they need up front, in that order,
//! and keep them until the affected caches have been refreshed.

mod application;
mod candidate;
mod country;
mod locks;
mod requisition;
mod tag;

use chrono::{DateTime, Utc};
use std::sync::{Arc, RwLock, RwLockReadGuard};
use tracing::{info, warn};

use crate::cache::{hydrate_candidates, hydrate_requisitions, EntityCache};
use crate::error::{Error, Result};
use crate::ids::IdAllocator;
use crate::models::{Application, Candidate, Country, Document, EntityKind, JobRequisition, Tag};
use crate::store::DocumentStore;

pub(crate) use locks::{held, held_ref, Guards, LockSet};

/// CRUD surface per entity, as consumed by a routing layer.
pub trait Crud<T: Document> {
    fn list(&self) -> Result<Vec<T>>;
    fn get(&self, id: i64) -> Result<T>;
    fn create(&self, entity: T) -> Result<T>;
    /// `id` is the caller's target (e.g. a path parameter) and must equal `entity`'s ID.
    fn update(&self, id: i64, entity: T) -> Result<T>;
    fn delete(&self, id: i64) -> Result<()>;
}

/// Entities whose cache lives in the engine.
pub trait Cached: Document {
    fn slot(engine: &Engine) -> &RwLock<EntityCache<Self>>;
}

#[derive(Debug, Clone)]
pub struct CacheStatus {
    pub kind: EntityKind,
    pub entries: usize,
    pub max_id: i64,
    /// The ID the next create would receive.
    pub next_id: i64,
    pub refreshed_at: Option<DateTime<Utc>>,
}

pub struct Engine {
    store: Arc<dyn DocumentStore>,
    allocator: IdAllocator,
    countries: RwLock<EntityCache<Country>>,
    requisitions: RwLock<EntityCache<JobRequisition>>,
    candidates: RwLock<EntityCache<Candidate>>,
    applications: RwLock<EntityCache<Application>>,
    tags: RwLock<EntityCache<Tag>>,
}

impl Engine {
    /// Loads the ID high-water marks and every cache.
    pub fn open(store: Arc<dyn DocumentStore>) -> Result<Self> {
        let allocator = IdAllocator::load(store.as_ref())?;
        let engine = Self {
            store,
            allocator,
            countries: RwLock::new(EntityCache::new()),
            requisitions: RwLock::new(EntityCache::new()),
            candidates: RwLock::new(EntityCache::new()),
            applications: RwLock::new(EntityCache::new()),
            tags: RwLock::new(EntityCache::new()),
        };
        engine.refresh_all()?;
        info!("engine ready");
        Ok(engine)
    }

    pub(crate) fn store(&self) -> &dyn DocumentStore {
        self.store.as_ref()
    }

    /// Full reconciliation of every cache with the store.
    pub fn refresh_all(&self) -> Result<()> {
        let mut g = self.lock(LockSet::ALL)?;
        self.refresh_held(&mut g, &EntityKind::ALL)
    }

    pub fn status(&self) -> Result<Vec<CacheStatus>> {
        Ok(vec![
            self.status_of::<Country>()?,
            self.status_of::<JobRequisition>()?,
            self.status_of::<Candidate>()?,
            self.status_of::<Application>()?,
            self.status_of::<Tag>()?,
        ])
    }

    fn status_of<T: Cached>(&self) -> Result<CacheStatus> {
        let cache = self.read::<T>()?;
        Ok(CacheStatus {
            kind: T::KIND,
            entries: cache.len(),
            max_id: cache.max_id(),
            next_id: self.allocator.peek(&*cache)?,
            refreshed_at: cache.refreshed_at(),
        })
    }

    // --- Reads ---

    fn read<T: Cached>(&self) -> Result<RwLockReadGuard<'_, EntityCache<T>>> {
        T::slot(self)
            .read()
            .map_err(|_| Error::LockPoisoned { entity: T::KIND })
    }

    pub fn list_all<T: Cached>(&self) -> Result<Vec<T>> {
        Ok(self.read::<T>()?.list())
    }

    pub fn find<T: Cached>(&self, id: i64) -> Result<T> {
        self.read::<T>()?.get(id).cloned()
    }

    /// Read-only filter over one cache, sorted by ID.
    pub(crate) fn select<T: Cached>(&self, keep: impl Fn(&T) -> bool) -> Result<Vec<T>> {
        let mut out: Vec<T> = self.read::<T>()?.values().filter(|e| keep(e)).cloned().collect();
        out.sort_by_key(|e| e.id());
        Ok(out)
    }

    // --- Refresh ---

    /// Reloads the requested caches, authoritative collections first, then
    /// re-derives the mirrors of the parents being reloaded.
    pub(crate) fn refresh_held(&self, g: &mut Guards<'_>, kinds: &[EntityKind]) -> Result<()> {
        let store = self.store();
        let wants = |kind| kinds.contains(&kind);

        if wants(EntityKind::Country) {
            held(&mut g.country)?.refresh(store)?;
        }
        if wants(EntityKind::Tag) {
            held(&mut g.tag)?.refresh(store)?;
        }
        if wants(EntityKind::Application) {
            held(&mut g.application)?.refresh(store)?;
        }
        if wants(EntityKind::JobRequisition) {
            let requisitions = held(&mut g.requisition)?;
            requisitions.refresh(store)?;
            hydrate_requisitions(requisitions, held_ref(&g.country)?, held_ref(&g.application)?);
        }
        if wants(EntityKind::Candidate) {
            let candidates = held(&mut g.candidate)?;
            candidates.refresh(store)?;
            hydrate_candidates(
                candidates,
                held_ref(&g.country)?,
                held_ref(&g.application)?,
                held_ref(&g.tag)?,
            );
        }
        Ok(())
    }

    /// Refreshes after a write, whatever its outcome. A failed write keeps
    /// its own error even when the refresh fails too.
    pub(crate) fn settle<T>(
        &self,
        g: &mut Guards<'_>,
        kinds: &[EntityKind],
        outcome: Result<T>,
    ) -> Result<T> {
        let refreshed = self.refresh_held(g, kinds);
        match (outcome, refreshed) {
            (Ok(value), Ok(())) => Ok(value),
            (Ok(_), Err(e)) => Err(e),
            (Err(e), Ok(())) => Err(e),
            (Err(e), Err(refresh_err)) => {
                warn!(error = %refresh_err, "refresh after failed write also failed");
                Err(e)
            }
        }
    }
}

pub(crate) fn check_target(entity: EntityKind, path_id: i64, body_id: i64) -> Result<()> {
    if path_id != body_id {
        return Err(Error::IdMismatch {
            entity,
            path_id,
            body_id,
        });
    }
    Ok(())
}

impl Cached for Country {
    fn slot(engine: &Engine) -> &RwLock<EntityCache<Self>> {
        &engine.countries
    }
}

impl Cached for JobRequisition {
    fn slot(engine: &Engine) -> &RwLock<EntityCache<Self>> {
        &engine.requisitions
    }
}

impl Cached for Candidate {
    fn slot(engine: &Engine) -> &RwLock<EntityCache<Self>> {
        &engine.candidates
    }
}

impl Cached for Application {
    fn slot(engine: &Engine) -> &RwLock<EntityCache<Self>> {
        &engine.applications
    }
}

impl Cached for Tag {
    fn slot(engine: &Engine) -> &RwLock<EntityCache<Self>> {
        &engine.tags
    }
}
