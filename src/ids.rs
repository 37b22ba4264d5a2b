use serde::Deserialize;
use serde_json::json;
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use crate::cache::EntityCache;
use crate::error::{Error, Result, StoreError};
use crate::models::{Document, EntityKind};
use crate::store::{field_patch, DocumentStore, Filter};

const COUNTERS: &str = "Counters";

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct Counter {
    collection: String,
    last: i64,
}

/// Issues IDs as 1 + max(highest cached ID, highest ID ever issued).
///
/// The high-water mark is persisted per collection, so a deleted maximum is
/// not handed out again, even across restarts. Each kind has its own lock,
/// so allocations for different kinds never wait on each other.
#[derive(Debug)]
pub struct IdAllocator {
    /// Indexed by `EntityKind` declaration order.
    issued: [Mutex<i64>; EntityKind::ALL.len()],
}

impl IdAllocator {
    pub fn load(store: &dyn DocumentStore) -> Result<Self> {
        let mut marks: HashMap<EntityKind, i64> = HashMap::new();
        for doc in store.find_all(COUNTERS, &["Collection", "Last"])? {
            let counter: Counter = serde_json::from_value(doc).map_err(StoreError::from)?;
            if let Some(kind) = EntityKind::ALL
                .into_iter()
                .find(|k| k.collection() == counter.collection)
            {
                let last = marks.entry(kind).or_insert(0);
                *last = (*last).max(counter.last);
            }
        }
        Ok(Self {
            issued: EntityKind::ALL.map(|kind| Mutex::new(marks.get(&kind).copied().unwrap_or(0))),
        })
    }

    fn mark<T: Document>(&self) -> Result<MutexGuard<'_, i64>> {
        self.issued[T::KIND as usize]
            .lock()
            .map_err(|_| Error::LockPoisoned { entity: T::KIND })
    }

    /// The ID `next_id` would hand out, without reserving it.
    pub fn peek<T: Document>(&self, cache: &EntityCache<T>) -> Result<i64> {
        Ok(cache.max_id().max(*self.mark::<T>()?) + 1)
    }

    /// Reserves the next ID. A reserved ID whose insert later fails is burned.
    pub fn next_id<T: Document>(
        &self,
        cache: &EntityCache<T>,
        store: &dyn DocumentStore,
    ) -> Result<i64> {
        let mut last = self.mark::<T>()?;
        let next = cache.max_id().max(*last) + 1;

        let collection = T::KIND.collection();
        let matched = store.update_one(
            COUNTERS,
            &Filter::eq("Collection", collection),
            &field_patch("Last", json!(next)),
        )?;
        if matched == 0 {
            store.insert_one(COUNTERS, json!({"Collection": collection, "Last": next}))?;
        }

        *last = next;
        Ok(next)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::{MemoryStore, StoreOp};
    use crate::models::{Country, Tag};
    use proptest::prelude::*;
    use std::collections::HashSet;

    fn insert_tag(store: &MemoryStore, id: i64) {
        store
            .insert_one("Tags", json!({"ID": id, "Label": format!("t{id}")}))
            .unwrap();
    }

    #[test]
    fn empty_cache_starts_at_one() {
        let store = MemoryStore::new();
        let allocator = IdAllocator::load(&store).unwrap();
        let cache: EntityCache<Tag> = EntityCache::new();
        assert_eq!(allocator.peek(&cache).unwrap(), 1);
        assert_eq!(allocator.next_id(&cache, &store).unwrap(), 1);
        assert_eq!(allocator.next_id(&cache, &store).unwrap(), 2);
    }

    #[test]
    fn skips_past_externally_inserted_ids() {
        let store = MemoryStore::new();
        insert_tag(&store, 40);
        let allocator = IdAllocator::load(&store).unwrap();
        let mut cache: EntityCache<Tag> = EntityCache::new();
        cache.refresh(&store).unwrap();
        assert_eq!(allocator.next_id(&cache, &store).unwrap(), 41);
    }

    #[test]
    fn deleted_maximum_is_not_reissued_after_reload() {
        let store = MemoryStore::new();
        let allocator = IdAllocator::load(&store).unwrap();
        let mut cache: EntityCache<Tag> = EntityCache::new();

        let id = allocator.next_id(&cache, &store).unwrap();
        insert_tag(&store, id);
        cache.refresh(&store).unwrap();
        store.delete_one("Tags", &Filter::id(id)).unwrap();
        cache.refresh(&store).unwrap();

        let reloaded = IdAllocator::load(&store).unwrap();
        assert_eq!(reloaded.next_id(&cache, &store).unwrap(), id + 1);
    }

    #[test]
    fn counter_write_failure_surfaces_store_error() {
        let store = MemoryStore::new();
        let allocator = IdAllocator::load(&store).unwrap();
        let cache: EntityCache<Tag> = EntityCache::new();
        store.fail_next(StoreOp::Update, COUNTERS);
        assert!(matches!(
            allocator.next_id(&cache, &store),
            Err(Error::Store(StoreError::Unavailable { .. }))
        ));
    }

    #[test]
    fn kinds_allocate_independently() {
        let store = MemoryStore::new();
        let allocator = IdAllocator::load(&store).unwrap();
        let tags: EntityCache<Tag> = EntityCache::new();
        let countries: EntityCache<Country> = EntityCache::new();

        let held = allocator.mark::<Tag>().unwrap();
        assert_eq!(allocator.next_id(&countries, &store).unwrap(), 1);
        assert_eq!(allocator.next_id(&countries, &store).unwrap(), 2);
        drop(held);

        assert_eq!(allocator.next_id(&tags, &store).unwrap(), 1);
        assert_eq!(store.documents(COUNTERS).len(), 2);
    }

    proptest! {
        #[test]
        fn never_collides_and_never_reissues(ops in prop::collection::vec(any::<(bool, u8)>(), 1..40)) {
            let store = MemoryStore::new();
            let allocator = IdAllocator::load(&store).unwrap();
            let mut cache: EntityCache<Tag> = EntityCache::new();
            let mut issued = HashSet::new();

            for (create, pick) in ops {
                if create || cache.is_empty() {
                    let id = allocator.next_id(&cache, &store).unwrap();
                    prop_assert!(id > 0);
                    prop_assert!(!cache.contains(id));
                    prop_assert!(issued.insert(id));
                    insert_tag(&store, id);
                } else {
                    let mut ids: Vec<i64> = cache.values().map(|t| t.id).collect();
                    ids.sort();
                    let victim = ids[pick as usize % ids.len()];
                    store.delete_one("Tags", &Filter::id(victim)).unwrap();
                }
                cache.refresh(&store).unwrap();
            }
        }
    }
}
