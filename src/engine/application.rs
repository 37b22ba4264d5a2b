//! Applications are the only entities whose writes touch three documents: the
//! application itself plus the Applicants mirror of its requisition and the
//! JobsApplied mirror of its candidate. Mirrors are written first so that a
//! failed step can be undone by restoring the previous array.

use serde_json::Value;
use tracing::{error, info};

use crate::error::{Error, Result, StoreError};
use crate::models::{Application, Document, EntityKind};
use crate::saga::{Saga, Write};
use crate::store::{field_patch, to_document, to_patch, DocumentStore, Filter};
use crate::validation::{validate_application, Mode};

use super::{check_target, held_ref, Crud, Engine, Guards, LockSet};

const REFRESH: [EntityKind; 3] = [
    EntityKind::Application,
    EntityKind::JobRequisition,
    EntityKind::Candidate,
];

/// The parent side of an application.
#[derive(Debug, Clone, Copy)]
enum Parent {
    Requisition(i64),
    Candidate(i64),
}

impl Parent {
    fn kind(self) -> EntityKind {
        match self {
            Parent::Requisition(_) => EntityKind::JobRequisition,
            Parent::Candidate(_) => EntityKind::Candidate,
        }
    }

    fn id(self) -> i64 {
        match self {
            Parent::Requisition(id) | Parent::Candidate(id) => id,
        }
    }

    fn field(self) -> &'static str {
        match self {
            Parent::Requisition(_) => "Applicants",
            Parent::Candidate(_) => "JobsApplied",
        }
    }

    fn of(app: &Application) -> [Parent; 2] {
        [
            Parent::Requisition(app.job_requisition_id),
            Parent::Candidate(app.candidate_profile_id),
        ]
    }

    /// The parent's current mirror, from its cache.
    fn mirror(self, g: &Guards<'_>) -> Result<Vec<Application>> {
        let found = match self {
            Parent::Requisition(id) => held_ref(&g.requisition)?
                .get(id)
                .map(|jr| jr.applicants.clone()),
            Parent::Candidate(id) => held_ref(&g.candidate)?
                .get(id)
                .map(|c| c.jobs_applied.clone()),
        };
        found.map_err(|_| {
            error!(parent = %self.kind(), parent_id = self.id(), "application references a missing parent");
            Error::consistency(
                "application mirror",
                format!("{} {} referenced by an application is missing", self.kind(), self.id()),
            )
        })
    }

    /// Application IDs listed in the parent's stored mirror. The cached
    /// mirror is derived from the Application collection and cannot show drift.
    fn stored(self, store: &dyn DocumentStore) -> Result<Vec<i64>> {
        let docs = store.find_all(self.kind().collection(), &["ID", self.field()])?;
        let Some(doc) = docs.iter().find(|d| d["ID"].as_i64() == Some(self.id())) else {
            error!(parent = %self.kind(), parent_id = self.id(), "parent missing from the store");
            return Err(Error::consistency(
                "application mirror",
                format!("{} {} is not in the store", self.kind(), self.id()),
            ));
        };
        Ok(doc[self.field()]
            .as_array()
            .map(|apps| apps.iter().filter_map(|a| a["ID"].as_i64()).collect())
            .unwrap_or_default())
    }

    fn write(self, apps: &[Application]) -> Result<Write> {
        let value: Value = serde_json::to_value(apps).map_err(StoreError::from)?;
        Ok(Write::Update {
            collection: self.kind().collection(),
            filter: Filter::id(self.id()),
            patch: field_patch(self.field(), value),
        })
    }

    /// Replaces the mirror as one saga step, undone by restoring `before`.
    fn rewrite(
        self,
        saga: &mut Saga<'_>,
        before: &[Application],
        after: &[Application],
    ) -> Result<()> {
        saga.step(
            format!("rewrite {} of {} {}", self.field(), self.kind(), self.id()),
            self.write(after)?,
            Some(self.write(before)?),
        )
    }
}

/// The stored mirror must list the application before it is changed or
/// retracted.
fn require_mirrored(
    parent: Parent,
    store: &dyn DocumentStore,
    application_id: i64,
    operation: &str,
) -> Result<()> {
    if parent.stored(store)?.contains(&application_id) {
        return Ok(());
    }
    error!(
        application_id,
        parent = %parent.kind(),
        parent_id = parent.id(),
        "application missing from its parent's mirror"
    );
    Err(Error::consistency(
        operation,
        format!(
            "application {application_id} is not in {} of {} {}",
            parent.field(),
            parent.kind(),
            parent.id()
        ),
    ))
}

fn without(mirror: &[Application], application_id: i64) -> Vec<Application> {
    mirror
        .iter()
        .filter(|a| a.id != application_id)
        .cloned()
        .collect()
}

fn with(mirror: &[Application], app: &Application) -> Vec<Application> {
    let mut out = without(mirror, app.id);
    out.push(app.clone());
    out.sort_by_key(|a| a.id);
    out
}

impl Engine {
    fn create_application(&self, application: Application) -> Result<Application> {
        let mut g = self.lock(LockSet::ALL)?;
        let outcome = self.insert_application(&mut g, application);
        let id = self.settle(&mut g, &REFRESH, outcome)?;
        held_ref(&g.application)?.get(id).cloned()
    }

    fn insert_application(&self, g: &mut Guards<'_>, mut app: Application) -> Result<i64> {
        validate_application(
            &app,
            held_ref(&g.candidate)?,
            held_ref(&g.requisition)?,
            Mode::Create,
        )?;
        app.id = self
            .allocator
            .next_id(held_ref(&g.application)?, self.store())?;

        let mirrors = Parent::of(&app)
            .into_iter()
            .map(|parent| Ok::<_, Error>((parent, parent.mirror(&*g)?)))
            .collect::<Result<Vec<_>>>()?;

        let mut saga = Saga::new(format!("create application {}", app.id), self.store());
        for (parent, mirror) in &mirrors {
            parent.rewrite(&mut saga, mirror, &with(mirror, &app))?;
        }
        saga.step(
            "insert application",
            Write::Insert {
                collection: Application::KIND.collection(),
                doc: to_document(&app)?,
            },
            None,
        )?;
        saga.commit();
        info!(
            id = app.id,
            candidate = app.candidate_profile_id,
            requisition = app.job_requisition_id,
            "application created"
        );
        Ok(app.id)
    }

    fn update_application(&self, id: i64, application: Application) -> Result<Application> {
        check_target(EntityKind::Application, id, application.id)?;
        let mut g = self.lock(LockSet::ALL)?;
        let outcome = self.save_application(&mut g, application);
        self.settle(&mut g, &REFRESH, outcome)?;
        held_ref(&g.application)?.get(id).cloned()
    }

    /// Moves the application between mirrors when a reference changes.
    /// The posting gate applies to creation only.
    fn save_application(&self, g: &mut Guards<'_>, app: Application) -> Result<()> {
        let old = held_ref(&g.application)?.get(app.id)?.clone();
        validate_application(
            &app,
            held_ref(&g.candidate)?,
            held_ref(&g.requisition)?,
            Mode::Update,
        )?;

        let operation = format!("update application {}", app.id);
        let mut moves = Vec::with_capacity(2);
        for (from, to) in Parent::of(&old).into_iter().zip(Parent::of(&app)) {
            let old_mirror = from.mirror(g)?;
            require_mirrored(from, self.store(), old.id, &operation)?;
            let new_mirror = if from.id() == to.id() {
                None
            } else {
                Some(to.mirror(g)?)
            };
            moves.push((from, old_mirror, to, new_mirror));
        }

        let mut saga = Saga::new(operation, self.store());
        for (from, old_mirror, to, new_mirror) in &moves {
            match new_mirror {
                None => from.rewrite(&mut saga, old_mirror, &with(old_mirror, &app))?,
                Some(new_mirror) => {
                    from.rewrite(&mut saga, old_mirror, &without(old_mirror, old.id))?;
                    to.rewrite(&mut saga, new_mirror, &with(new_mirror, &app))?;
                }
            }
        }
        saga.step(
            "save application",
            Write::Update {
                collection: Application::KIND.collection(),
                filter: Filter::id(app.id),
                patch: to_patch(&app)?,
            },
            None,
        )?;
        saga.commit();
        info!(id = app.id, "application updated");
        Ok(())
    }

    fn delete_application(&self, id: i64) -> Result<()> {
        let mut g = self.lock(LockSet::ALL)?;
        self.delete_application_in(&mut g, id)
    }

    /// Delete under locks the caller already holds. Caches are refreshed
    /// before returning, whatever the outcome.
    pub(super) fn delete_application_in(&self, g: &mut Guards<'_>, id: i64) -> Result<()> {
        let outcome = self.retract_application(g, id);
        self.settle(g, &REFRESH, outcome)
    }

    fn retract_application(&self, g: &mut Guards<'_>, id: i64) -> Result<()> {
        let app = held_ref(&g.application)?.get(id)?.clone();
        let operation = format!("delete application {id}");

        // every mirror is checked before anything is written
        let mut plan = Vec::with_capacity(2);
        for parent in Parent::of(&app) {
            let mirror = parent.mirror(g)?;
            require_mirrored(parent, self.store(), id, &operation)?;
            plan.push((parent, mirror));
        }

        let mut saga = Saga::new(operation, self.store());
        for (parent, mirror) in &plan {
            parent.rewrite(&mut saga, mirror, &without(mirror, id))?;
        }
        saga.step(
            "delete application",
            Write::Delete {
                collection: Application::KIND.collection(),
                filter: Filter::id(id),
            },
            None,
        )?;
        saga.commit();
        info!(id, "application deleted");
        Ok(())
    }
}

impl Crud<Application> for Engine {
    fn list(&self) -> Result<Vec<Application>> {
        self.list_all()
    }

    fn get(&self, id: i64) -> Result<Application> {
        self.find(id)
    }

    fn create(&self, entity: Application) -> Result<Application> {
        self.create_application(entity)
    }

    fn update(&self, id: i64, entity: Application) -> Result<Application> {
        self.update_application(id, entity)
    }

    fn delete(&self, id: i64) -> Result<()> {
        self.delete_application(id)
    }
}

#[cfg(test)]
mod tests {
    use super::super::testing::*;
    use super::*;
    use crate::memory::StoreOp;
    use crate::models::{Candidate, JobRequisition};
    use crate::store::DocumentStore;
    use serde_json::json;

    fn mirrors_match_applications(engine: &Engine) {
        let apps = Crud::<Application>::list(engine).unwrap();
        for jr in Crud::<JobRequisition>::list(engine).unwrap() {
            let expected: Vec<_> = apps
                .iter()
                .filter(|a| a.job_requisition_id == jr.id)
                .cloned()
                .collect();
            assert_eq!(jr.applicants, expected);
        }
        for c in Crud::<Candidate>::list(engine).unwrap() {
            let expected: Vec<_> = apps
                .iter()
                .filter(|a| a.candidate_profile_id == c.id)
                .cloned()
                .collect();
            assert_eq!(c.jobs_applied, expected);
        }
    }

    #[test]
    fn brazil_scenario() {
        let (store, engine) = engine();
        let br = brazil(&engine);
        let ana = engine.create(candidate("Ana", br.id)).unwrap();
        let jr = engine
            .create(JobRequisition {
                country_id: br.id,
                ..requisition("Engineer", true)
            })
            .unwrap();

        let app = engine.create(application(ana.id, jr.id)).unwrap();
        assert_eq!(app.id, 1);

        let jr: JobRequisition = engine.find(jr.id).unwrap();
        let ana: Candidate = engine.find(ana.id).unwrap();
        assert_eq!(jr.applicants, vec![app.clone()]);
        assert_eq!(ana.jobs_applied, vec![app.clone()]);
        assert_eq!(store.documents("Requisitions")[0]["Applicants"][0]["ID"], json!(1));
        assert_eq!(store.documents("Candidates")[0]["JobsApplied"][0]["ID"], json!(1));
        mirrors_match_applications(&engine);
    }

    #[test]
    fn unposted_requisition_takes_no_applications() {
        let (store, engine) = engine();
        let ana = engine.create(candidate("Ana", 0)).unwrap();
        let jr = engine.create(requisition("Draft", false)).unwrap();

        let err = engine.create(application(ana.id, jr.id)).unwrap_err();
        assert!(matches!(err, Error::RequisitionNotPosted { id } if id == jr.id));
        assert!(err.is_client_error());
        assert!(store.documents("Applications").is_empty());
        assert_eq!(store.documents("Requisitions")[0]["Applicants"], json!([]));
    }

    #[test]
    fn dangling_references_are_validation_errors() {
        let (_store, engine) = engine();
        let jr = engine.create(requisition("Engineer", true)).unwrap();
        let err = engine.create(application(9, jr.id)).unwrap_err();
        match err {
            Error::Validation { fields, .. } => assert_eq!(fields, vec!["CandidateProfileID"]),
            other => panic!("expected validation error, got {other:?}"),
        }
    }

    #[test]
    fn candidate_side_failure_retracts_requisition_side() {
        let (store, engine) = engine();
        let ana = engine.create(candidate("Ana", 0)).unwrap();
        let jr = engine.create(requisition("Engineer", true)).unwrap();

        store.fail_next(StoreOp::Update, "Candidates");
        let err = engine.create(application(ana.id, jr.id)).unwrap_err();

        assert!(matches!(err, Error::Store(StoreError::Unavailable { .. })));
        assert!(store.documents("Applications").is_empty());
        assert_eq!(store.documents("Requisitions")[0]["Applicants"], json!([]));
        assert!(Crud::<Application>::list(&engine).unwrap().is_empty());
        mirrors_match_applications(&engine);
    }

    #[test]
    fn failed_insert_retracts_both_mirrors() {
        let (store, engine) = engine();
        let ana = engine.create(candidate("Ana", 0)).unwrap();
        let jr = engine.create(requisition("Engineer", true)).unwrap();

        store.fail_next(StoreOp::Insert, "Applications");
        engine.create(application(ana.id, jr.id)).unwrap_err();

        assert_eq!(store.documents("Requisitions")[0]["Applicants"], json!([]));
        assert_eq!(store.documents("Candidates")[0]["JobsApplied"], json!([]));
    }

    #[test]
    fn failed_compensation_is_a_consistency_fault() {
        let (store, engine) = engine();
        let ana = engine.create(candidate("Ana", 0)).unwrap();
        let jr = engine.create(requisition("Engineer", true)).unwrap();

        store.fail_next(StoreOp::Update, "Candidates");
        // the forward requisition write succeeds, its undo fails
        store.fail_after(StoreOp::Update, "Requisitions", 1);
        let err = engine.create(application(ana.id, jr.id)).unwrap_err();

        assert!(matches!(err, Error::Consistency { .. }));
        assert!(!err.is_client_error());
        // the stored mirror is stale, the refreshed cache is not
        assert_eq!(store.documents("Requisitions")[0]["Applicants"][0]["ID"], json!(1));
        let jr: JobRequisition = engine.find(jr.id).unwrap();
        assert!(jr.applicants.is_empty());
    }

    #[test]
    fn update_moves_application_between_requisitions() {
        let (_store, engine) = engine();
        let ana = engine.create(candidate("Ana", 0)).unwrap();
        let first = engine.create(requisition("First", true)).unwrap();
        let second = engine.create(requisition("Second", false)).unwrap();
        let app = engine.create(application(ana.id, first.id)).unwrap();

        let moved = engine
            .update(
                app.id,
                Application {
                    job_requisition_id: second.id,
                    salary_expectation: "120k".into(),
                    ..app.clone()
                },
            )
            .unwrap();
        assert_eq!(moved.job_requisition_id, second.id);

        let first: JobRequisition = engine.find(first.id).unwrap();
        let second: JobRequisition = engine.find(second.id).unwrap();
        assert!(first.applicants.is_empty());
        assert_eq!(second.applicants, vec![moved.clone()]);
        let ana: Candidate = engine.find(ana.id).unwrap();
        assert_eq!(ana.jobs_applied[0].salary_expectation, "120k");
        mirrors_match_applications(&engine);
    }

    #[test]
    fn delete_with_missing_parent_is_a_consistency_fault() {
        let (store, engine) = engine();
        let ana = engine.create(candidate("Ana", 0)).unwrap();
        store
            .insert_one(
                "Applications",
                json!({"ID": 50, "CandidateProfileID": ana.id, "JobRequisitionID": 404}),
            )
            .unwrap();
        engine.refresh_all().unwrap();

        let err = Crud::<Application>::delete(&engine, 50).unwrap_err();
        assert!(matches!(err, Error::Consistency { .. }));
        assert_eq!(store.documents("Applications").len(), 1);
        assert_eq!(store.documents("Candidates")[0]["JobsApplied"], json!([]));
    }

    #[test]
    fn unmirrored_application_is_a_consistency_fault() {
        let (store, engine) = engine();
        let ana = engine.create(candidate("Ana", 0)).unwrap();
        let jr = engine.create(requisition("Engineer", true)).unwrap();
        store
            .insert_one(
                "Applications",
                json!({"ID": 9, "CandidateProfileID": ana.id, "JobRequisitionID": jr.id}),
            )
            .unwrap();
        engine.refresh_all().unwrap();
        // the cache derives the mirror, the stored arrays stay empty
        let cached: JobRequisition = engine.find(jr.id).unwrap();
        assert_eq!(cached.applicants.len(), 1);

        let err = Crud::<Application>::delete(&engine, 9).unwrap_err();
        assert!(matches!(err, Error::Consistency { .. }));

        let app: Application = engine.find(9).unwrap();
        let err = engine
            .update(
                9,
                Application {
                    salary_expectation: "90k".into(),
                    ..app
                },
            )
            .unwrap_err();
        assert!(matches!(err, Error::Consistency { .. }));

        assert_eq!(store.documents("Applications").len(), 1);
        assert_eq!(store.documents("Applications")[0].get("SalaryExpectation"), None);
        assert_eq!(store.documents("Requisitions")[0]["Applicants"], json!([]));
        assert_eq!(store.documents("Candidates")[0]["JobsApplied"], json!([]));
    }

    #[test]
    fn failed_candidate_retraction_restores_requisition_mirror() {
        let (store, engine) = engine();
        let ana = engine.create(candidate("Ana", 0)).unwrap();
        let jr = engine.create(requisition("Engineer", true)).unwrap();
        let app = engine.create(application(ana.id, jr.id)).unwrap();

        store.fail_next(StoreOp::Update, "Candidates");
        let err = Crud::<Application>::delete(&engine, app.id).unwrap_err();

        assert!(matches!(err, Error::Store(StoreError::Unavailable { .. })));
        assert_eq!(store.documents("Applications").len(), 1);
        assert_eq!(store.documents("Requisitions")[0]["Applicants"][0]["ID"], json!(app.id));
        assert_eq!(store.documents("Candidates")[0]["JobsApplied"][0]["ID"], json!(app.id));
        mirrors_match_applications(&engine);

        Crud::<Application>::delete(&engine, app.id).unwrap();
        assert!(store.documents("Applications").is_empty());
    }

    #[test]
    fn delete_unknown_application_is_not_found() {
        let (_store, engine) = engine();
        assert!(matches!(
            Crud::<Application>::delete(&engine, 3),
            Err(Error::NotFound { .. })
        ));
    }
}
