use chrono::{DateTime, Utc};
use std::collections::HashMap;
use tracing::{debug, warn};

use crate::error::{Error, Result, StoreError};
use crate::models::{Application, Candidate, Country, Document, JobRequisition, Tag};
use crate::store::DocumentStore;

/// In-memory mirror of one collection. The only source for reads.
#[derive(Debug, Clone)]
pub struct EntityCache<T> {
    entries: HashMap<i64, T>,
    refreshed_at: Option<DateTime<Utc>>,
}

impl<T: Document> Default for EntityCache<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Document> EntityCache<T> {
    pub fn new() -> Self {
        Self {
            entries: HashMap::new(),
            refreshed_at: None,
        }
    }

    /// Reloads every document of the collection. On failure the previous
    /// mapping is kept untouched.
    pub fn refresh(&mut self, store: &dyn DocumentStore) -> Result<usize> {
        let docs = store.find_all(T::KIND.collection(), T::FIELDS)?;

        let mut entries = HashMap::with_capacity(docs.len());
        for doc in docs {
            let entity: T = serde_json::from_value(doc).map_err(StoreError::from)?;
            let id = entity.id();
            if entries.insert(id, entity).is_some() {
                warn!(collection = T::KIND.collection(), id, "duplicate document ID, keeping the later one");
            }
        }

        let count = entries.len();
        self.entries = entries;
        self.refreshed_at = Some(Utc::now());
        debug!(collection = T::KIND.collection(), count, "cache refreshed");
        Ok(count)
    }

    pub fn get(&self, id: i64) -> Result<&T> {
        self.entries
            .get(&id)
            .ok_or_else(|| Error::not_found(T::KIND, id))
    }

    pub fn contains(&self, id: i64) -> bool {
        self.entries.contains_key(&id)
    }

    /// All entities in unspecified order.
    pub fn list(&self) -> Vec<T> {
        self.entries.values().cloned().collect()
    }

    pub fn values(&self) -> impl Iterator<Item = &T> {
        self.entries.values()
    }

    pub fn values_mut(&mut self) -> impl Iterator<Item = &mut T> {
        self.entries.values_mut()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Highest ID present, 0 when empty.
    pub fn max_id(&self) -> i64 {
        self.entries.keys().copied().max().unwrap_or(0)
    }

    pub fn refreshed_at(&self) -> Option<DateTime<Utc>> {
        self.refreshed_at
    }

    /// Makes a just-persisted entity visible before the next refresh.
    pub(crate) fn put(&mut self, entity: T) {
        self.entries.insert(entity.id(), entity);
    }
}

// --- Mirror hydration ---
//
// Mirrors are recomputed from the authoritative caches after every reload, so
// a skipped propagation step heals on the next refresh.

fn group_applications(
    applications: &EntityCache<Application>,
    key: impl Fn(&Application) -> i64,
) -> HashMap<i64, Vec<Application>> {
    let mut grouped: HashMap<i64, Vec<Application>> = HashMap::new();
    for app in applications.values() {
        grouped.entry(key(app)).or_default().push(app.clone());
    }
    for apps in grouped.values_mut() {
        apps.sort_by_key(|a| a.id);
    }
    grouped
}

pub(crate) fn hydrate_requisitions(
    requisitions: &mut EntityCache<JobRequisition>,
    countries: &EntityCache<Country>,
    applications: &EntityCache<Application>,
) {
    let mut by_requisition = group_applications(applications, |a| a.job_requisition_id);
    for jr in requisitions.values_mut() {
        jr.country = countries.get(jr.country_id).ok().cloned();
        jr.applicants = by_requisition.remove(&jr.id).unwrap_or_default();
    }
}

pub(crate) fn hydrate_candidates(
    candidates: &mut EntityCache<Candidate>,
    countries: &EntityCache<Country>,
    applications: &EntityCache<Application>,
    tags: &EntityCache<Tag>,
) {
    let mut by_candidate = group_applications(applications, |a| a.candidate_profile_id);
    for candidate in candidates.values_mut() {
        candidate.country = countries.get(candidate.country_id).ok().cloned();
        candidate.jobs_applied = by_candidate.remove(&candidate.id).unwrap_or_default();
        for tag in candidate.tags.iter_mut() {
            if let Ok(current) = tags.get(tag.id) {
                tag.label = current.label.clone();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::{MemoryStore, StoreOp};
    use crate::models::EntityKind;
    use serde_json::json;

    fn seeded() -> MemoryStore {
        let store = MemoryStore::new();
        store
            .insert_one("Countries", json!({"ID": 1, "Name": "Brazil", "Code": "BR"}))
            .unwrap();
        store
            .insert_one(
                "Requisitions",
                json!({"ID": 7, "Title": "Engineer", "JobDescription": "Build", "PostingStatus": true,
                       "CountryID": 1, "Applicants": [{"ID": 99}]}),
            )
            .unwrap();
        for (id, jr) in [(2, 7), (1, 7), (3, 8)] {
            store
                .insert_one(
                    "Applications",
                    json!({"ID": id, "CandidateProfileID": 1, "JobRequisitionID": jr}),
                )
                .unwrap();
        }
        store
    }

    #[test]
    fn get_reports_not_found() {
        let cache: EntityCache<Country> = EntityCache::new();
        let err = cache.get(4).unwrap_err();
        assert!(matches!(err, Error::NotFound { entity: EntityKind::Country, id: 4 }));
        assert_eq!(cache.max_id(), 0);
        assert!(cache.refreshed_at().is_none());
    }

    #[test]
    fn refresh_replaces_contents() {
        let store = seeded();
        let mut countries: EntityCache<Country> = EntityCache::new();
        countries.put(Country {
            id: 50,
            name: "Stale".into(),
            code: "ST".into(),
        });

        assert_eq!(countries.refresh(&store).unwrap(), 1);
        assert!(!countries.contains(50));
        assert_eq!(countries.get(1).unwrap().code, "BR");
        assert!(countries.refreshed_at().is_some());
    }

    #[test]
    fn failed_refresh_keeps_previous_mapping() {
        let store = seeded();
        let mut countries: EntityCache<Country> = EntityCache::new();
        countries.refresh(&store).unwrap();

        store.fail_next(StoreOp::Find, "Countries");
        assert!(countries.refresh(&store).is_err());
        assert_eq!(countries.len(), 1);
    }

    #[test]
    fn hydration_ignores_stored_mirror_and_recomputes() {
        let store = seeded();
        let mut countries: EntityCache<Country> = EntityCache::new();
        let mut applications: EntityCache<Application> = EntityCache::new();
        let mut requisitions: EntityCache<JobRequisition> = EntityCache::new();
        countries.refresh(&store).unwrap();
        applications.refresh(&store).unwrap();
        requisitions.refresh(&store).unwrap();

        hydrate_requisitions(&mut requisitions, &countries, &applications);

        let jr = requisitions.get(7).unwrap();
        let ids: Vec<i64> = jr.applicants.iter().map(|a| a.id).collect();
        assert_eq!(ids, vec![1, 2]);
        assert_eq!(jr.country.as_ref().map(|c| c.code.as_str()), Some("BR"));
    }

    #[test]
    fn candidate_tags_follow_current_labels() {
        let store = seeded();
        store
            .insert_one("Tags", json!({"ID": 5, "Label": "principal"}))
            .unwrap();
        store
            .insert_one(
                "Candidates",
                json!({"ID": 1, "FirstName": "Ana", "LastName": "Lima", "Email": "a@x.com",
                       "Tags": [{"ID": 5, "Label": "senior"}, {"ID": 6, "Label": "gone"}]}),
            )
            .unwrap();

        let countries: EntityCache<Country> = EntityCache::new();
        let mut applications: EntityCache<Application> = EntityCache::new();
        let mut tags: EntityCache<Tag> = EntityCache::new();
        let mut candidates: EntityCache<Candidate> = EntityCache::new();
        applications.refresh(&store).unwrap();
        tags.refresh(&store).unwrap();
        candidates.refresh(&store).unwrap();

        hydrate_candidates(&mut candidates, &countries, &applications, &tags);

        let c = candidates.get(1).unwrap();
        assert_eq!(c.tags[0].label, "principal");
        assert_eq!(c.tags[1].label, "gone");
        assert_eq!(c.jobs_applied.len(), 3);
        assert!(c.country.is_none());
    }
}
