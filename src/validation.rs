//! Field, uniqueness and reference checks run before any store mutation.
//!
//! Every check is pure: it reads caches and never writes. Missing or malformed
//! fields are collected and reported together as one `Error::Validation`.

use crate::cache::EntityCache;
use crate::error::{Error, Result};
use crate::models::{
    Application, Candidate, Country, Document, EntityKind, JobRequisition, Tag,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Create,
    Update,
}

fn blank(value: &str) -> bool {
    value.trim().is_empty()
}

fn finish(entity: EntityKind, failed: Vec<&str>) -> Result<()> {
    if failed.is_empty() {
        Ok(())
    } else {
        Err(Error::validation(entity, failed))
    }
}

fn id_check<T: Document>(entity: &T, mode: Mode, failed: &mut Vec<&str>) {
    // the allocator, not the caller, assigns IDs
    if mode == Mode::Create && entity.id() != 0 {
        failed.push("ID");
    }
}

/// 0 means "no country selected".
fn country_ref_ok(country_id: i64, countries: &EntityCache<Country>) -> bool {
    country_id == 0 || countries.contains(country_id)
}

pub fn validate_country(c: &Country, countries: &EntityCache<Country>, mode: Mode) -> Result<()> {
    let mut failed = Vec::new();
    id_check(c, mode, &mut failed);
    if blank(&c.name) {
        failed.push("Name");
    }
    if blank(&c.code) {
        failed.push("Code");
    }
    finish(EntityKind::Country, failed)?;

    if countries.values().any(|o| o.id != c.id && o.code == c.code) {
        return Err(Error::conflict(
            EntityKind::Country,
            format!("Country with CODE '{}' already exists", c.code),
        ));
    }
    Ok(())
}

pub fn validate_tag(t: &Tag, tags: &EntityCache<Tag>, mode: Mode) -> Result<()> {
    let mut failed = Vec::new();
    id_check(t, mode, &mut failed);
    if blank(&t.label) {
        failed.push("Label");
    }
    finish(EntityKind::Tag, failed)?;

    if tags.values().any(|o| o.id != t.id && o.label == t.label) {
        return Err(Error::conflict(
            EntityKind::Tag,
            format!("Tag '{}' already exists", t.label),
        ));
    }
    Ok(())
}

pub fn validate_candidate(
    c: &Candidate,
    countries: &EntityCache<Country>,
    mode: Mode,
) -> Result<()> {
    let mut failed = Vec::new();
    id_check(c, mode, &mut failed);
    if mode == Mode::Create && !c.jobs_applied.is_empty() {
        failed.push("JobsApplied");
    }
    if blank(&c.first_name) {
        failed.push("FirstName");
    }
    if blank(&c.last_name) {
        failed.push("LastName");
    }
    if blank(&c.email) {
        failed.push("Email");
    }
    if !country_ref_ok(c.country_id, countries) {
        failed.push("CountryID");
    }
    if c.tags.iter().any(|t| blank(&t.label)) {
        failed.push("Tags");
    }
    finish(EntityKind::Candidate, failed)
}

pub fn validate_requisition(
    jr: &JobRequisition,
    countries: &EntityCache<Country>,
    mode: Mode,
) -> Result<()> {
    let mut failed = Vec::new();
    id_check(jr, mode, &mut failed);
    if mode == Mode::Create && !jr.applicants.is_empty() {
        failed.push("Applicants");
    }
    if blank(&jr.title) {
        failed.push("Title");
    }
    if blank(&jr.job_description) {
        failed.push("JobDescription");
    }
    if !country_ref_ok(jr.country_id, countries) {
        failed.push("CountryID");
    }
    finish(EntityKind::JobRequisition, failed)
}

/// On create the referenced requisition must be posted; that failure is
/// reported as `RequisitionNotPosted`, after the field checks pass.
pub fn validate_application(
    a: &Application,
    candidates: &EntityCache<Candidate>,
    requisitions: &EntityCache<JobRequisition>,
    mode: Mode,
) -> Result<()> {
    let mut failed = Vec::new();
    id_check(a, mode, &mut failed);
    if a.candidate_profile_id == 0 || !candidates.contains(a.candidate_profile_id) {
        failed.push("CandidateProfileID");
    }
    if a.job_requisition_id == 0 || !requisitions.contains(a.job_requisition_id) {
        failed.push("JobRequisitionID");
    }
    finish(EntityKind::Application, failed)?;

    if mode == Mode::Create && !requisitions.get(a.job_requisition_id)?.posting_status {
        return Err(Error::RequisitionNotPosted {
            id: a.job_requisition_id,
        });
    }
    Ok(())
}
