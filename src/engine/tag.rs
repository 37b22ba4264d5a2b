use tracing::info;

use crate::error::{Error, Result};
use crate::models::{Document, EntityKind, Tag};
use crate::saga::{Saga, Write};
use crate::store::{to_document, to_patch, Filter};
use crate::tags;
use crate::validation::{validate_tag, Mode};

use super::{check_target, held, held_ref, Crud, Engine, LockSet};

const CREATE_LOCKS: LockSet = LockSet::of(&[EntityKind::Tag]);
const UPDATE_LOCKS: LockSet = LockSet::of(&[
    EntityKind::Country,
    EntityKind::Candidate,
    EntityKind::Application,
    EntityKind::Tag,
]);
const DELETE_LOCKS: LockSet = LockSet::of(&[EntityKind::Candidate, EntityKind::Tag]);

impl Engine {
    pub fn tag_by_label(&self, label: &str) -> Result<Option<Tag>> {
        Ok(self
            .select(|t: &Tag| t.label == label)?
            .into_iter()
            .next())
    }

    /// Maps labels to stored tags, creating the missing ones.
    pub fn resolve_tags(&self, input: Vec<Tag>) -> Result<Vec<Tag>> {
        if input.iter().any(|t| t.label.trim().is_empty()) {
            return Err(Error::validation(EntityKind::Tag, vec!["Label"]));
        }
        let mut g = self.lock(CREATE_LOCKS)?;
        let mut saga = Saga::new("resolve tags", self.store());
        let outcome = tags::resolve_tags(input, held(&mut g.tag)?, &self.allocator, &mut saga);
        if outcome.is_ok() {
            saga.commit();
        }
        self.settle(&mut g, &[EntityKind::Tag], outcome)
    }

    fn create_tag(&self, mut tag: Tag) -> Result<Tag> {
        let mut g = self.lock(CREATE_LOCKS)?;
        let tags = held_ref(&g.tag)?;
        validate_tag(&tag, tags, Mode::Create)?;

        tag.id = self.allocator.next_id(tags, self.store())?;
        let outcome = self
            .store()
            .insert_one(Tag::KIND.collection(), to_document(&tag)?)
            .map_err(Error::from);
        self.settle(&mut g, &[EntityKind::Tag], outcome)?;
        info!(id = tag.id, label = %tag.label, "tag created");
        held_ref(&g.tag)?.get(tag.id).cloned()
    }

    /// Candidates keep the tag ID; their labels follow on refresh.
    fn update_tag(&self, id: i64, tag: Tag) -> Result<Tag> {
        check_target(EntityKind::Tag, id, tag.id)?;
        let mut g = self.lock(UPDATE_LOCKS)?;
        let tags = held_ref(&g.tag)?;
        tags.get(id)?;
        validate_tag(&tag, tags, Mode::Update)?;

        let outcome = Write::Update {
            collection: Tag::KIND.collection(),
            filter: Filter::id(id),
            patch: to_patch(&tag)?,
        }
        .apply(self.store());
        self.settle(&mut g, &[EntityKind::Tag, EntityKind::Candidate], outcome)?;
        info!(id, label = %tag.label, "tag updated");
        held_ref(&g.tag)?.get(id).cloned()
    }

    fn delete_tag(&self, id: i64) -> Result<()> {
        let mut g = self.lock(DELETE_LOCKS)?;
        held_ref(&g.tag)?.get(id)?;
        let carriers = held_ref(&g.candidate)?
            .values()
            .filter(|c| c.tags.iter().any(|t| t.id == id))
            .count();
        if carriers > 0 {
            return Err(Error::conflict(
                EntityKind::Tag,
                format!("Tag '{id}' is still carried by {carriers} candidate(s)"),
            ));
        }

        let outcome = Write::Delete {
            collection: Tag::KIND.collection(),
            filter: Filter::id(id),
        }
        .apply(self.store());
        self.settle(&mut g, &[EntityKind::Tag], outcome)?;
        info!(id, "tag deleted");
        Ok(())
    }
}

impl Crud<Tag> for Engine {
    fn list(&self) -> Result<Vec<Tag>> {
        self.list_all()
    }

    fn get(&self, id: i64) -> Result<Tag> {
        self.find(id)
    }

    fn create(&self, entity: Tag) -> Result<Tag> {
        self.create_tag(entity)
    }

    fn update(&self, id: i64, entity: Tag) -> Result<Tag> {
        self.update_tag(id, entity)
    }

    fn delete(&self, id: i64) -> Result<()> {
        self.delete_tag(id)
    }
}
