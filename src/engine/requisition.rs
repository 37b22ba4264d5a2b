use tracing::{info, warn};

use crate::error::{Error, Result};
use crate::models::{Application, Document, EntityKind, JobRequisition};
use crate::saga::Write;
use crate::store::{to_document, to_patch, Filter};
use crate::validation::{validate_requisition, Mode};

use super::{check_target, held_ref, Crud, Engine, Guards, LockSet};

const WRITE_LOCKS: LockSet = LockSet::of(&[
    EntityKind::Country,
    EntityKind::JobRequisition,
    EntityKind::Application,
]);
const REFRESH: [EntityKind; 1] = [EntityKind::JobRequisition];

impl Engine {
    /// Requisitions open to new applications.
    pub fn posted_requisitions(&self) -> Result<Vec<JobRequisition>> {
        self.select(|jr: &JobRequisition| jr.posting_status)
    }

    pub fn is_requisition_posted(&self, id: i64) -> Result<bool> {
        Ok(self.find::<JobRequisition>(id)?.posting_status)
    }

    pub fn applications_of_requisition(&self, requisition_id: i64) -> Result<Vec<Application>> {
        self.select(|a: &Application| a.job_requisition_id == requisition_id)
    }

    fn create_requisition(&self, mut requisition: JobRequisition) -> Result<JobRequisition> {
        let mut g = self.lock(WRITE_LOCKS)?;
        let countries = held_ref(&g.country)?;
        validate_requisition(&requisition, countries, Mode::Create)?;
        requisition.country = countries.get(requisition.country_id).ok().cloned();

        requisition.id = self
            .allocator
            .next_id(held_ref(&g.requisition)?, self.store())?;
        let outcome = self
            .store()
            .insert_one(
                JobRequisition::KIND.collection(),
                to_document(&requisition)?,
            )
            .map_err(Error::from);
        self.settle(&mut g, &REFRESH, outcome)?;
        info!(id = requisition.id, posted = requisition.posting_status, "job requisition created");
        held_ref(&g.requisition)?.get(requisition.id).cloned()
    }

    fn update_requisition(&self, id: i64, requisition: JobRequisition) -> Result<JobRequisition> {
        check_target(EntityKind::JobRequisition, id, requisition.id)?;
        let mut g = self.lock(WRITE_LOCKS)?;
        self.update_requisition_in(&mut g, requisition)
    }

    /// Update under locks the caller already holds. The stored Applicants
    /// mirror is kept, whatever the payload carries.
    pub(super) fn update_requisition_in(
        &self,
        g: &mut Guards<'_>,
        mut requisition: JobRequisition,
    ) -> Result<JobRequisition> {
        let existing = held_ref(&g.requisition)?.get(requisition.id)?;
        requisition.applicants = existing.applicants.clone();

        let countries = held_ref(&g.country)?;
        validate_requisition(&requisition, countries, Mode::Update)?;
        requisition.country = countries.get(requisition.country_id).ok().cloned();

        let outcome = Write::Update {
            collection: JobRequisition::KIND.collection(),
            filter: Filter::id(requisition.id),
            patch: to_patch(&requisition)?,
        }
        .apply(self.store());
        self.settle(g, &REFRESH, outcome)?;
        info!(id = requisition.id, posted = requisition.posting_status, "job requisition updated");
        held_ref(&g.requisition)?.get(requisition.id).cloned()
    }

    /// Deletes every applicant's application through the application delete
    /// path, then the requisition.
    fn delete_requisition(&self, id: i64) -> Result<()> {
        let mut g = self.lock(LockSet::ALL)?;
        let applications: Vec<i64> = held_ref(&g.requisition)?
            .get(id)?
            .applicants
            .iter()
            .map(|a| a.id)
            .collect();

        let total = applications.len();
        for (completed, application_id) in applications.into_iter().enumerate() {
            if let Err(e) = self.delete_application_in(&mut g, application_id) {
                warn!(id, application_id, completed, total, error = %e, "job requisition delete aborted");
                return Err(Error::CascadeAborted {
                    operation: "delete job requisition",
                    id,
                    completed,
                    total,
                    source: Box::new(e),
                });
            }
        }

        let outcome = Write::Delete {
            collection: JobRequisition::KIND.collection(),
            filter: Filter::id(id),
        }
        .apply(self.store());
        self.settle(&mut g, &REFRESH, outcome)?;
        info!(id, applications = total, "job requisition deleted");
        Ok(())
    }
}

impl Crud<JobRequisition> for Engine {
    fn list(&self) -> Result<Vec<JobRequisition>> {
        self.list_all()
    }

    fn get(&self, id: i64) -> Result<JobRequisition> {
        self.find(id)
    }

    fn create(&self, entity: JobRequisition) -> Result<JobRequisition> {
        self.create_requisition(entity)
    }

    fn update(&self, id: i64, entity: JobRequisition) -> Result<JobRequisition> {
        self.update_requisition(id, entity)
    }

    fn delete(&self, id: i64) -> Result<()> {
        self.delete_requisition(id)
    }
}
