use tracing::{error, info};

use crate::error::{Error, Result};
use crate::models::{Candidate, Country, Document, EntityKind, JobRequisition};
use crate::saga::Write;
use crate::store::{to_document, to_patch, Filter};
use crate::validation::{validate_country, Mode};

use super::{check_target, held_ref, Crud, Engine, Guards, LockSet};

const CREATE_LOCKS: LockSet = LockSet::of(&[EntityKind::Country]);
const DELETE_LOCKS: LockSet = LockSet::of(&[
    EntityKind::Country,
    EntityKind::JobRequisition,
    EntityKind::Candidate,
]);

impl Engine {
    pub fn candidates_with_country(&self, country_id: i64) -> Result<Vec<Candidate>> {
        self.select(|c: &Candidate| c.country_id == country_id)
    }

    pub fn requisitions_with_country(&self, country_id: i64) -> Result<Vec<JobRequisition>> {
        self.select(|jr: &JobRequisition| jr.country_id == country_id)
    }

    fn create_country(&self, mut country: Country) -> Result<Country> {
        let mut g = self.lock(CREATE_LOCKS)?;
        let countries = held_ref(&g.country)?;
        validate_country(&country, countries, Mode::Create)?;

        country.id = self.allocator.next_id(countries, self.store())?;
        self.store()
            .insert_one(Country::KIND.collection(), to_document(&country)?)?;
        info!(id = country.id, code = %country.code, "country created");

        self.refresh_held(&mut g, &[EntityKind::Country])?;
        held_ref(&g.country)?.get(country.id).cloned()
    }

    /// Saves the country, then re-saves every candidate and requisition that
    /// references it through their own update paths so their embedded copies
    /// follow.
    fn update_country(&self, id: i64, country: Country) -> Result<Country> {
        check_target(EntityKind::Country, id, country.id)?;
        let mut g = self.lock(LockSet::ALL)?;
        let outcome = self.save_country(&mut g, &country);
        self.settle(&mut g, &[EntityKind::Country], outcome)?;

        let candidates: Vec<Candidate> = held_ref(&g.candidate)?
            .values()
            .filter(|c| c.country_id == id)
            .cloned()
            .collect();
        for candidate in candidates {
            let candidate_id = candidate.id;
            if let Err(e) = self.update_candidate_in(&mut g, candidate) {
                return Err(propagation_fault(id, EntityKind::Candidate, candidate_id, e));
            }
        }

        let requisitions: Vec<JobRequisition> = held_ref(&g.requisition)?
            .values()
            .filter(|jr| jr.country_id == id)
            .cloned()
            .collect();
        for requisition in requisitions {
            let requisition_id = requisition.id;
            if let Err(e) = self.update_requisition_in(&mut g, requisition) {
                return Err(propagation_fault(id, EntityKind::JobRequisition, requisition_id, e));
            }
        }

        info!(id, "country updated");
        held_ref(&g.country)?.get(id).cloned()
    }

    fn save_country(&self, g: &mut Guards<'_>, country: &Country) -> Result<()> {
        let countries = held_ref(&g.country)?;
        countries.get(country.id)?;
        validate_country(country, countries, Mode::Update)?;
        Write::Update {
            collection: Country::KIND.collection(),
            filter: Filter::id(country.id),
            patch: to_patch(country)?,
        }
        .apply(self.store())
    }

    fn delete_country(&self, id: i64) -> Result<()> {
        let mut g = self.lock(DELETE_LOCKS)?;
        held_ref(&g.country)?.get(id)?;

        let candidates = held_ref(&g.candidate)?
            .values()
            .filter(|c| c.country_id == id)
            .count();
        let requisitions = held_ref(&g.requisition)?
            .values()
            .filter(|jr| jr.country_id == id)
            .count();
        if candidates + requisitions > 0 {
            return Err(Error::conflict(
                EntityKind::Country,
                format!(
                    "Country '{id}' is still referenced by {candidates} candidate(s) and {requisitions} job requisition(s)"
                ),
            ));
        }

        let outcome = Write::Delete {
            collection: Country::KIND.collection(),
            filter: Filter::id(id),
        }
        .apply(self.store());
        self.settle(&mut g, &[EntityKind::Country], outcome)?;
        info!(id, "country deleted");
        Ok(())
    }
}

fn propagation_fault(country_id: i64, kind: EntityKind, id: i64, cause: Error) -> Error {
    error!(country_id, dependent = %kind, id, error = %cause, "country change not propagated");
    Error::consistency(
        "update country",
        format!("{kind} {id} still embeds the old copy of country {country_id}: {cause}"),
    )
}

impl Crud<Country> for Engine {
    fn list(&self) -> Result<Vec<Country>> {
        self.list_all()
    }

    fn get(&self, id: i64) -> Result<Country> {
        self.find(id)
    }

    fn create(&self, entity: Country) -> Result<Country> {
        self.create_country(entity)
    }

    fn update(&self, id: i64, entity: Country) -> Result<Country> {
        self.update_country(id, entity)
    }

    fn delete(&self, id: i64) -> Result<()> {
        self.delete_country(id)
    }
}
