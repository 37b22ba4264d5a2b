use tracing::{info, warn};

use crate::error::{Error, Result};
use crate::models::{Application, Candidate, Document, EntityKind};
use crate::saga::{Saga, Write};
use crate::store::{to_document, to_patch, Filter};
use crate::tags::resolve_tags;
use crate::validation::{validate_candidate, Mode};

use super::{check_target, held, held_ref, Crud, Engine, Guards, LockSet};

const WRITE_LOCKS: LockSet = LockSet::of(&[
    EntityKind::Country,
    EntityKind::Candidate,
    EntityKind::Application,
    EntityKind::Tag,
]);
const REFRESH: [EntityKind; 2] = [EntityKind::Tag, EntityKind::Candidate];

impl Engine {
    pub fn applications_of_candidate(&self, candidate_id: i64) -> Result<Vec<Application>> {
        self.select(|a: &Application| a.candidate_profile_id == candidate_id)
    }

    fn create_candidate(&self, candidate: Candidate) -> Result<Candidate> {
        let mut g = self.lock(WRITE_LOCKS)?;
        let outcome = self.insert_candidate(&mut g, candidate);
        let id = self.settle(&mut g, &REFRESH, outcome)?;
        held_ref(&g.candidate)?.get(id).cloned()
    }

    fn insert_candidate(&self, g: &mut Guards<'_>, mut candidate: Candidate) -> Result<i64> {
        let countries = held_ref(&g.country)?;
        validate_candidate(&candidate, countries, Mode::Create)?;
        candidate.country = countries.get(candidate.country_id).ok().cloned();

        let mut saga = Saga::new("create candidate", self.store());
        let tags = std::mem::take(&mut candidate.tags);
        candidate.tags = resolve_tags(tags, held(&mut g.tag)?, &self.allocator, &mut saga)?;

        candidate.id = match self.allocator.next_id(held_ref(&g.candidate)?, self.store()) {
            Ok(id) => id,
            Err(e) => return Err(saga.abort("allocate candidate id", e)),
        };
        saga.step(
            "insert candidate",
            Write::Insert {
                collection: Candidate::KIND.collection(),
                doc: to_document(&candidate)?,
            },
            None,
        )?;
        saga.commit();
        info!(id = candidate.id, tags = candidate.tags.len(), "candidate created");
        Ok(candidate.id)
    }

    fn update_candidate(&self, id: i64, candidate: Candidate) -> Result<Candidate> {
        check_target(EntityKind::Candidate, id, candidate.id)?;
        let mut g = self.lock(WRITE_LOCKS)?;
        self.update_candidate_in(&mut g, candidate)
    }

    /// Update under locks the caller already holds. The stored JobsApplied
    /// mirror is kept, whatever the payload carries.
    pub(super) fn update_candidate_in(
        &self,
        g: &mut Guards<'_>,
        candidate: Candidate,
    ) -> Result<Candidate> {
        let outcome = self.save_candidate(g, candidate);
        let id = self.settle(g, &REFRESH, outcome)?;
        held_ref(&g.candidate)?.get(id).cloned()
    }

    fn save_candidate(&self, g: &mut Guards<'_>, mut candidate: Candidate) -> Result<i64> {
        let existing = held_ref(&g.candidate)?.get(candidate.id)?;
        candidate.jobs_applied = existing.jobs_applied.clone();

        let countries = held_ref(&g.country)?;
        validate_candidate(&candidate, countries, Mode::Update)?;
        candidate.country = countries.get(candidate.country_id).ok().cloned();

        let mut saga = Saga::new(format!("update candidate {}", candidate.id), self.store());
        let tags = std::mem::take(&mut candidate.tags);
        candidate.tags = resolve_tags(tags, held(&mut g.tag)?, &self.allocator, &mut saga)?;

        saga.step(
            "save candidate",
            Write::Update {
                collection: Candidate::KIND.collection(),
                filter: Filter::id(candidate.id),
                patch: to_patch(&candidate)?,
            },
            None,
        )?;
        saga.commit();
        info!(id = candidate.id, "candidate updated");
        Ok(candidate.id)
    }

    /// Deletes every application of the candidate through the application
    /// delete path, then the candidate. Applications already deleted stay
    /// deleted if a later one fails.
    fn delete_candidate(&self, id: i64) -> Result<()> {
        let mut g = self.lock(LockSet::ALL)?;
        let applications: Vec<i64> = held_ref(&g.candidate)?
            .get(id)?
            .jobs_applied
            .iter()
            .map(|a| a.id)
            .collect();

        let total = applications.len();
        for (completed, application_id) in applications.into_iter().enumerate() {
            if let Err(e) = self.delete_application_in(&mut g, application_id) {
                warn!(id, application_id, completed, total, error = %e, "candidate delete aborted");
                return Err(Error::CascadeAborted {
                    operation: "delete candidate",
                    id,
                    completed,
                    total,
                    source: Box::new(e),
                });
            }
        }

        let outcome = Write::Delete {
            collection: Candidate::KIND.collection(),
            filter: Filter::id(id),
        }
        .apply(self.store());
        self.settle(&mut g, &[EntityKind::Candidate], outcome)?;
        info!(id, applications = total, "candidate deleted");
        Ok(())
    }
}

impl Crud<Candidate> for Engine {
    fn list(&self) -> Result<Vec<Candidate>> {
        self.list_all()
    }

    fn get(&self, id: i64) -> Result<Candidate> {
        self.find(id)
    }

    fn create(&self, entity: Candidate) -> Result<Candidate> {
        self.create_candidate(entity)
    }

    fn update(&self, id: i64, entity: Candidate) -> Result<Candidate> {
        self.update_candidate(id, entity)
    }

    fn delete(&self, id: i64) -> Result<()> {
        self.delete_candidate(id)
    }
}
