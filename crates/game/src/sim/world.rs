use glam::Vec3;

use super::input::InputStateVec;
use crate::net::messages::Aabb;

/// Stable for the lifetime of a session; shared verbatim across the wire.
pub type EntityId = u32;

/// World-space size of an entity, used for the replicated bounding box.
pub const ENTITY_HALF_EXTENT: f32 = 0.5;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntityKind {
    /// Controlled by a connected client.
    Player,
    /// Replicated, non-predicted entity.
    Npc,
}

#[derive(Debug, Clone)]
pub struct Entity {
    pub id: EntityId,
    pub kind: EntityKind,
    pub position: Vec3,
    /// Where this entity was at the start of the current tick, for render
    /// interpolation.
    pub previous_position: Vec3,
    pub velocity: Vec3,
    pub inputs: InputStateVec,
    /// Set when this entity's state changed this tick and the replication
    /// filter should consider it.
    pub dirty: bool,
}

impl Entity {
    fn new(id: EntityId, kind: EntityKind, position: Vec3) -> Self {
        Self {
            id,
            kind,
            position,
            previous_position: position,
            velocity: Vec3::ZERO,
            inputs: InputStateVec::default(),
            dirty: false,
        }
    }

    pub fn bounds(&self) -> Aabb {
        Aabb::centered_at(self.position, Vec3::splat(ENTITY_HALF_EXTENT))
    }
}

/// Playable area, in tiles. One tile is one world unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MapExtent {
    pub width: u32,
    pub height: u32,
}

impl MapExtent {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    pub fn width_units(&self) -> f32 {
        self.width as f32
    }

    pub fn height_units(&self) -> f32 {
        self.height as f32
    }
}

impl Default for MapExtent {
    fn default() -> Self {
        Self::new(64, 64)
    }
}

/// Slot-map entity storage.
///
/// Ids index directly into the slot vector, so lookups are O(1) and ids
/// stay stable for as long as the entity lives. Cross-references (client
/// entries, the owned-entity handle) are by id, never by pointer, so they
/// survive entity destruction as a lookup miss instead of a dangling ref.
#[derive(Debug, Default)]
pub struct World {
    slots: Vec<Option<Entity>>,
    free: Vec<EntityId>,
    map: MapExtent,
    spawn_point: Vec3,
}

impl World {
    pub fn new(map: MapExtent, spawn_point: Vec3) -> Self {
        Self {
            slots: Vec::new(),
            free: Vec::new(),
            map,
            spawn_point,
        }
    }

    pub fn map(&self) -> &MapExtent {
        &self.map
    }

    pub fn set_map(&mut self, map: MapExtent) {
        self.map = map;
    }

    pub fn spawn_point(&self) -> Vec3 {
        self.spawn_point
    }

    /// Creates an entity at the given position and returns its id.
    pub fn spawn(&mut self, kind: EntityKind, position: Vec3) -> EntityId {
        if let Some(id) = self.free.pop() {
            self.slots[id as usize] = Some(Entity::new(id, kind, position));
            return id;
        }

        let id = self.slots.len() as EntityId;
        self.slots.push(Some(Entity::new(id, kind, position)));
        id
    }

    /// Creates an entity under an id assigned elsewhere (the client side,
    /// where the server owns id allocation).
    pub fn spawn_with_id(&mut self, id: EntityId, kind: EntityKind, position: Vec3) {
        let index = id as usize;
        if index >= self.slots.len() {
            self.slots.resize_with(index + 1, || None);
        }
        debug_assert!(self.slots[index].is_none(), "entity {id} spawned twice");
        self.slots[index] = Some(Entity::new(id, kind, position));
        self.free.retain(|&free_id| free_id != id);
    }

    pub fn despawn(&mut self, id: EntityId) -> Option<Entity> {
        let slot = self.slots.get_mut(id as usize)?;
        let entity = slot.take();
        if entity.is_some() {
            self.free.push(id);
        }
        entity
    }

    pub fn contains(&self, id: EntityId) -> bool {
        self.slots
            .get(id as usize)
            .is_some_and(|slot| slot.is_some())
    }

    pub fn get(&self, id: EntityId) -> Option<&Entity> {
        self.slots.get(id as usize)?.as_ref()
    }

    pub fn get_mut(&mut self, id: EntityId) -> Option<&mut Entity> {
        self.slots.get_mut(id as usize)?.as_mut()
    }

    pub fn entities(&self) -> impl Iterator<Item = &Entity> {
        self.slots.iter().filter_map(|slot| slot.as_ref())
    }

    pub fn entities_mut(&mut self) -> impl Iterator<Item = &mut Entity> {
        self.slots.iter_mut().filter_map(|slot| slot.as_mut())
    }

    pub fn entity_count(&self) -> usize {
        self.slots.iter().filter(|slot| slot.is_some()).count()
    }

    pub fn dirty_ids(&self) -> Vec<EntityId> {
        self.entities()
            .filter(|entity| entity.dirty)
            .map(|entity| entity.id)
            .collect()
    }

    pub fn clear_dirty(&mut self) {
        for entity in self.entities_mut() {
            entity.dirty = false;
        }
    }

    /// Drops all entities. Used when the client's connection resets.
    pub fn clear(&mut self) {
        self.slots.clear();
        self.free.clear();
    }
}
