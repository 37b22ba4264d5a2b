use tracing::info;

use crate::cache::EntityCache;
use crate::error::Result;
use crate::ids::IdAllocator;
use crate::models::{Document, Tag};
use crate::saga::{Saga, Write};
use crate::store::{to_document, Filter};

/// Rewrites each tag to the stored tag with the same label, creating the
/// missing ones. Client-supplied IDs are ignored and repeated labels collapse
/// to their first occurrence.
///
/// New tags are inserted as steps of `saga`, so they are removed again if the
/// caller's cascade is rolled back. They are also put in `tags` right away so
/// a label seen twice resolves to one ID.
pub(crate) fn resolve_tags(
    input: Vec<Tag>,
    tags: &mut EntityCache<Tag>,
    allocator: &IdAllocator,
    saga: &mut Saga<'_>,
) -> Result<Vec<Tag>> {
    let collection = Tag::KIND.collection();
    let mut resolved: Vec<Tag> = Vec::with_capacity(input.len());

    for tag in input {
        if resolved.iter().any(|r| r.label == tag.label) {
            continue;
        }
        if let Some(existing) = tags.values().find(|t| t.label == tag.label) {
            resolved.push(existing.clone());
            continue;
        }

        let id = match allocator.next_id(tags, saga.store()) {
            Ok(id) => id,
            Err(e) => return Err(saga.abort("allocate tag id", e)),
        };
        let created = Tag {
            id,
            label: tag.label,
        };
        saga.step(
            format!("insert tag '{}'", created.label),
            Write::Insert {
                collection,
                doc: to_document(&created)?,
            },
            Some(Write::Delete {
                collection,
                filter: Filter::id(id),
            }),
        )?;
        info!(id, label = %created.label, "tag created");
        tags.put(created.clone());
        resolved.push(created);
    }

    Ok(resolved)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use crate::memory::{MemoryStore, StoreOp};
    use crate::store::DocumentStore;
    use serde_json::json;

    fn setup() -> (MemoryStore, EntityCache<Tag>, IdAllocator) {
        let store = MemoryStore::new();
        store
            .insert_one("Tags", json!({"ID": 1, "Label": "rust"}))
            .unwrap();
        let mut tags = EntityCache::new();
        tags.refresh(&store).unwrap();
        let allocator = IdAllocator::load(&store).unwrap();
        (store, tags, allocator)
    }

    #[test]
    fn existing_label_wins_over_client_id() {
        let (store, mut tags, allocator) = setup();
        let mut saga = Saga::new("resolve", &store);
        let input = vec![Tag {
            id: 42,
            label: "rust".into(),
        }];
        let out = resolve_tags(input, &mut tags, &allocator, &mut saga).unwrap();
        assert_eq!(out, vec![Tag { id: 1, label: "rust".into() }]);
        assert_eq!(store.documents("Tags").len(), 1);
    }

    #[test]
    fn resolving_twice_is_idempotent() {
        let (store, mut tags, allocator) = setup();

        let mut saga = Saga::new("resolve", &store);
        let first = resolve_tags(vec![Tag::labelled("senior")], &mut tags, &allocator, &mut saga)
            .unwrap();
        saga.commit();
        tags.refresh(&store).unwrap();

        let mut saga = Saga::new("resolve", &store);
        let second = resolve_tags(vec![Tag::labelled("senior")], &mut tags, &allocator, &mut saga)
            .unwrap();

        assert_eq!(first, second);
        assert_eq!(first[0].id, 2);
        let seniors = store
            .documents("Tags")
            .iter()
            .filter(|d| d["Label"] == json!("senior"))
            .count();
        assert_eq!(seniors, 1);
    }

    #[test]
    fn repeated_labels_collapse() {
        let (store, mut tags, allocator) = setup();
        let mut saga = Saga::new("resolve", &store);
        let input = vec![
            Tag::labelled("go"),
            Tag::labelled("rust"),
            Tag::labelled("go"),
        ];
        let out = resolve_tags(input, &mut tags, &allocator, &mut saga).unwrap();
        let labels: Vec<_> = out.iter().map(|t| t.label.as_str()).collect();
        assert_eq!(labels, vec!["go", "rust"]);
        assert_eq!(store.documents("Tags").len(), 2);
    }

    #[test]
    fn failed_insert_removes_tags_created_earlier() {
        let (store, mut tags, allocator) = setup();
        let mut saga = Saga::new("resolve", &store);
        store.fail_after(StoreOp::Insert, "Tags", 1);

        let input = vec![Tag::labelled("a"), Tag::labelled("b")];
        let err = resolve_tags(input, &mut tags, &allocator, &mut saga).unwrap_err();

        assert!(matches!(err, Error::Store(_)));
        assert_eq!(store.documents("Tags").len(), 1);
    }
}
