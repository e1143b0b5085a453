use std::collections::BTreeMap;

use crate::entity::{Entity, EntityId, GridPos, Owner};

/// Arena of every live entity. Ownership edges are ids plus a parent
/// back-pointer, so attaching and detaching never touches more than the two
/// owners involved.
#[derive(Debug, Default, Clone)]
pub struct EntityStore {
    entities: BTreeMap<EntityId, Entity>,
}

impl EntityStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, entity: Entity) {
        self.entities.insert(entity.id, entity);
    }

    pub fn remove(&mut self, id: EntityId) -> Option<Entity> {
        self.entities.remove(&id)
    }

    pub fn get(&self, id: EntityId) -> Option<&Entity> {
        self.entities.get(&id)
    }

    pub fn get_mut(&mut self, id: EntityId) -> Option<&mut Entity> {
        self.entities.get_mut(&id)
    }

    pub fn contains(&self, id: EntityId) -> bool {
        self.entities.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.entities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }

    /// Entities in ascending id order.
    pub fn iter(&self) -> impl Iterator<Item = &Entity> {
        self.entities.values()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut Entity> {
        self.entities.values_mut()
    }

    pub fn ids(&self) -> Vec<EntityId> {
        self.entities.keys().copied().collect()
    }

    pub fn owner(&self, id: EntityId) -> Owner {
        self.get(id).map(|entity| entity.owner).unwrap_or(Owner::Nowhere)
    }

    /// Container or whole directly holding `id`.
    pub fn parent(&self, id: EntityId) -> Option<EntityId> {
        match self.owner(id) {
            Owner::Container(parent) | Owner::Whole(parent) => Some(parent),
            Owner::Nowhere | Owner::Tile { .. } => None,
        }
    }

    /// Topmost owner in the chain, which is `id` itself for tile-level entities.
    pub fn root(&self, id: EntityId) -> EntityId {
        let mut current = id;
        while let Some(parent) = self.parent(current) {
            current = parent;
        }
        current
    }

    /// True when `candidate` is `ancestor` or sits somewhere below it.
    pub fn is_descendant(&self, candidate: EntityId, ancestor: EntityId) -> bool {
        let mut current = Some(candidate);
        while let Some(id) = current {
            if id == ancestor {
                return true;
            }
            current = self.parent(id);
        }
        false
    }

    /// First agent up the ownership chain, excluding `id` itself.
    pub fn holder_agent(&self, id: EntityId) -> Option<EntityId> {
        let mut current = self.parent(id);
        while let Some(parent) = current {
            if self.get(parent).is_some_and(Entity::is_agent) {
                return Some(parent);
            }
            current = self.parent(parent);
        }
        None
    }

    /// `root` followed by its contents and parts, depth first.
    pub fn subtree(&self, root: EntityId) -> Vec<EntityId> {
        let mut out = Vec::new();
        let mut stack = vec![root];
        while let Some(id) = stack.pop() {
            let Some(entity) = self.get(id) else {
                continue;
            };
            out.push(id);
            for child in entity.parts.iter().rev() {
                stack.push(*child);
            }
            for child in entity.contents.iter().rev() {
                stack.push(*child);
            }
        }
        out
    }

    /// Drop the parent's edge to `id` for container and part owners and mark
    /// `id` as owned by nowhere. Tile slots are the grid's business; the
    /// previous owner is returned so the caller can clear them.
    pub fn unlink(&mut self, id: EntityId) -> Owner {
        let previous = self.owner(id);
        match previous {
            Owner::Container(parent) => {
                if let Some(parent) = self.get_mut(parent) {
                    parent.contents.retain(|child| *child != id);
                }
            }
            Owner::Whole(parent) => {
                if let Some(parent) = self.get_mut(parent) {
                    parent.parts.retain(|child| *child != id);
                }
            }
            Owner::Nowhere | Owner::Tile { .. } => {}
        }
        if let Some(entity) = self.get_mut(id) {
            entity.owner = Owner::Nowhere;
            entity.position = GridPos::NOWHERE;
        }
        previous
    }

    pub fn display_name(&self, id: EntityId) -> String {
        self.get(id)
            .map(|entity| entity.name.clone())
            .unwrap_or_else(|| format!("#{id}"))
    }
}
