use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use sim_runtime::{AttributeValue, RunMetadata};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::{
    archetype::ArchetypeTable,
    config::SimulationConfig,
    entity::{Entity, EntityId, GridPos, Layer, Owner},
    feed::DiscoveryFeed,
    grid::{EntityQuery, WorldGrid},
    history::{HistoryError, SnapshotHistory},
    ids::IdAllocator,
    metrics::SimulationMetrics,
    store::EntityStore,
    turn::TurnLedger,
    use_handlers::UseRegistry,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum OwnershipError {
    #[error("entity {0} does not exist")]
    UnknownEntity(EntityId),
    #[error("entity {0} is not a container")]
    NotAContainer(EntityId),
    #[error("placing {item} under {owner} would make it its own ancestor")]
    Cycle { item: EntityId, owner: EntityId },
    #[error("agent {0} cannot be stored inside another entity")]
    AgentNotStorable(EntityId),
}

/// Everything that happened during one [`World::tick`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TickSummary {
    pub tick: u64,
    pub autopilot_steps: usize,
    pub expired_effects: usize,
    pub ended_dialogs: usize,
    pub snapshot_bytes: usize,
    pub snapshot_hash: u64,
}

/// The simulation: entity arena, tile grid, and the per-tick bookkeeping
/// around them. Owned by exactly one thread; every operation is a
/// synchronous state transition.
#[derive(Debug)]
pub struct World {
    pub(crate) config: Arc<SimulationConfig>,
    pub(crate) archetypes: Arc<ArchetypeTable>,
    pub(crate) uses: UseRegistry,
    pub(crate) store: EntityStore,
    pub(crate) grid: WorldGrid,
    pub(crate) ids: IdAllocator,
    pub(crate) tick: u64,
    pub(crate) turns: TurnLedger,
    pub(crate) locations: BTreeMap<String, GridPos>,
    pub(crate) feed: DiscoveryFeed,
    pub(crate) task_scores: BTreeMap<String, f64>,
    pub(crate) history: SnapshotHistory,
    pub(crate) metrics: SimulationMetrics,
    pub(crate) dirty: BTreeSet<GridPos>,
    pub(crate) default_agent: Option<EntityId>,
    pub(crate) scenario_name: String,
    started: Instant,
}

impl World {
    pub fn new(config: Arc<SimulationConfig>, archetypes: Arc<ArchetypeTable>) -> Self {
        let uses = archetypes.use_registry();
        let grid = WorldGrid::new(config.grid_size_x, config.grid_size_y);
        let history = SnapshotHistory::new(config.snapshots.compression_level);
        let ids = IdAllocator::new(config.seed);
        info!(
            target: "tileworld::world",
            size_x = config.grid_size_x,
            size_y = config.grid_size_y,
            seed = config.seed,
            "world.created"
        );
        Self {
            config,
            archetypes,
            uses,
            store: EntityStore::new(),
            grid,
            ids,
            tick: 0,
            turns: TurnLedger::new(),
            locations: BTreeMap::new(),
            feed: DiscoveryFeed::default(),
            task_scores: BTreeMap::new(),
            history,
            metrics: SimulationMetrics::default(),
            dirty: BTreeSet::new(),
            default_agent: None,
            scenario_name: String::new(),
            started: Instant::now(),
        }
    }

    pub fn config(&self) -> &SimulationConfig {
        &self.config
    }

    pub fn archetypes(&self) -> &ArchetypeTable {
        &self.archetypes
    }

    pub fn use_registry_mut(&mut self) -> &mut UseRegistry {
        &mut self.uses
    }

    pub fn current_tick(&self) -> u64 {
        self.tick
    }

    pub fn grid(&self) -> &WorldGrid {
        &self.grid
    }

    pub fn entity(&self, id: EntityId) -> Option<&Entity> {
        self.store.get(id)
    }

    pub fn entity_mut(&mut self, id: EntityId) -> Option<&mut Entity> {
        self.store.get_mut(id)
    }

    pub fn entities(&self) -> impl Iterator<Item = &Entity> {
        self.store.iter()
    }

    pub fn entity_count(&self) -> usize {
        self.store.len()
    }

    pub fn store(&self) -> &EntityStore {
        &self.store
    }

    pub fn history(&self) -> &SnapshotHistory {
        &self.history
    }

    pub fn metrics(&self) -> &SimulationMetrics {
        &self.metrics
    }

    pub fn feed(&self) -> &DiscoveryFeed {
        &self.feed
    }

    pub fn turns(&self) -> &TurnLedger {
        &self.turns
    }

    pub fn scenario_name(&self) -> &str {
        &self.scenario_name
    }

    pub fn set_scenario_name(&mut self, name: impl Into<String>) {
        self.scenario_name = name.into();
    }

    pub fn runtime_seconds(&self) -> f64 {
        self.started.elapsed().as_secs_f64()
    }

    /// Agent that commands without an explicit `agent` field are routed to.
    pub fn default_agent(&self) -> Option<EntityId> {
        self.default_agent
    }

    pub fn set_default_agent(&mut self, agent: EntityId) {
        self.default_agent = Some(agent);
    }

    /// Mark an agent as driven from outside; its autopilot stays idle.
    pub fn set_external(&mut self, agent: EntityId, external: bool) -> bool {
        match self.store.get_mut(agent).and_then(|entity| entity.agent.as_mut()) {
            Some(state) => {
                state.external = external;
                true
            }
            None => false,
        }
    }

    pub fn add_location(&mut self, name: impl Into<String>, pos: GridPos) -> bool {
        if !self.grid.in_bounds(pos) {
            warn!(target: "tileworld::world", pos = %pos, "location.out_of_bounds");
            return false;
        }
        self.locations.insert(name.into(), pos);
        true
    }

    pub fn location(&self, name: &str) -> Option<GridPos> {
        self.locations
            .iter()
            .find(|(known, _)| known.eq_ignore_ascii_case(name.trim()))
            .map(|(_, pos)| *pos)
    }

    pub fn locations(&self) -> &BTreeMap<String, GridPos> {
        &self.locations
    }

    pub fn set_task_score(&mut self, name: impl Into<String>, score: f64) {
        self.task_scores.insert(name.into(), score);
    }

    pub fn task_scores(&self) -> &BTreeMap<String, f64> {
        &self.task_scores
    }

    pub fn allocate_id(&mut self) -> EntityId {
        self.ids.next_id()
    }

    /// Register a fully built entity, owned by nowhere until placed.
    pub fn insert_entity(&mut self, mut entity: Entity) -> EntityId {
        self.ids.reserve(entity.id);
        entity.owner = Owner::Nowhere;
        entity.position = GridPos::NOWHERE;
        let id = entity.id;
        self.store.insert(entity);
        id
    }

    /// Detach `id` from wherever it is and append it to `layer` at `pos`.
    /// Out-of-bounds placements are logged and leave the entity untouched.
    pub fn add_entity(&mut self, pos: GridPos, layer: Layer, id: EntityId) -> bool {
        if !self.grid.in_bounds(pos) {
            warn!(
                target: "tileworld::world",
                entity = %id,
                pos = %pos,
                "add_entity.out_of_bounds"
            );
            return false;
        }
        if !self.store.contains(id) {
            warn!(target: "tileworld::world", entity = %id, "add_entity.unknown_entity");
            return false;
        }
        self.detach(id);
        self.grid.push(pos, layer, id);
        if let Some(entity) = self.store.get_mut(id) {
            entity.owner = Owner::Tile { pos, layer };
            entity.position = pos;
        }
        self.mark_dirty(pos);
        true
    }

    /// Take `id` out of the grid or its container; it stays alive, owned by nowhere.
    pub fn remove_entity(&mut self, id: EntityId) -> bool {
        if !self.store.contains(id) {
            return false;
        }
        self.detach(id);
        true
    }

    /// Remove `id` and everything it contains or is made of.
    pub fn destroy_entity(&mut self, id: EntityId) -> Vec<EntityId> {
        if !self.store.contains(id) {
            return Vec::new();
        }
        let subtree = self.store.subtree(id);
        for member in &subtree {
            if self.dialog_partner(*member).is_some() {
                self.end_dialog(*member);
            }
        }
        self.detach(id);
        for member in &subtree {
            self.store.remove(*member);
        }
        if self.default_agent.is_some_and(|agent| subtree.contains(&agent)) {
            self.default_agent = None;
        }
        debug!(
            target: "tileworld::world",
            entity = %id,
            removed = subtree.len(),
            "entity.destroyed"
        );
        subtree
    }

    pub fn add_to_container(
        &mut self,
        item: EntityId,
        container: EntityId,
    ) -> Result<(), OwnershipError> {
        let holder = self
            .store
            .get(container)
            .ok_or(OwnershipError::UnknownEntity(container))?;
        if !holder.is_container() {
            return Err(OwnershipError::NotAContainer(container));
        }
        let entity = self
            .store
            .get(item)
            .ok_or(OwnershipError::UnknownEntity(item))?;
        if entity.is_agent() {
            return Err(OwnershipError::AgentNotStorable(item));
        }
        if self.store.is_descendant(container, item) {
            return Err(OwnershipError::Cycle {
                item,
                owner: container,
            });
        }
        self.mark_entity_dirty(container);
        self.detach(item);
        if let Some(holder) = self.store.get_mut(container) {
            holder.contents.push(item);
        }
        if let Some(entity) = self.store.get_mut(item) {
            entity.owner = Owner::Container(container);
        }
        Ok(())
    }

    /// Attach `part` permanently to `whole`.
    pub fn add_part(&mut self, part: EntityId, whole: EntityId) -> Result<(), OwnershipError> {
        if !self.store.contains(whole) {
            return Err(OwnershipError::UnknownEntity(whole));
        }
        if !self.store.contains(part) {
            return Err(OwnershipError::UnknownEntity(part));
        }
        if self.store.is_descendant(whole, part) {
            return Err(OwnershipError::Cycle { item: part, owner: whole });
        }
        self.detach(part);
        if let Some(owner) = self.store.get_mut(whole) {
            owner.parts.push(part);
        }
        if let Some(entity) = self.store.get_mut(part) {
            entity.owner = Owner::Whole(whole);
        }
        self.mark_entity_dirty(whole);
        Ok(())
    }

    fn detach(&mut self, id: EntityId) {
        let dirty_at = self.world_position(id);
        if let Owner::Tile { pos, layer } = self.store.owner(id) {
            self.grid.remove(pos, layer, id);
        }
        self.store.unlink(id);
        if dirty_at.is_placed() {
            self.mark_dirty(dirty_at);
        }
    }

    /// Tile position of `id`, or of whatever tile-level entity ultimately holds it.
    pub fn world_position(&self, id: EntityId) -> GridPos {
        let root = self.store.root(id);
        match self.store.owner(root) {
            Owner::Tile { pos, .. } => pos,
            _ => GridPos::NOWHERE,
        }
    }

    pub fn layer_of(&self, id: EntityId) -> Option<Layer> {
        match self.store.owner(id) {
            Owner::Tile { layer, .. } => Some(layer),
            _ => None,
        }
    }

    pub fn entities_at(&self, pos: GridPos, query: &EntityQuery) -> Vec<EntityId> {
        let Some(tile) = self.grid.tile(pos) else {
            return Vec::new();
        };
        let mut out = Vec::new();
        if query.stop_at_obscuring {
            for (_, id) in tile.top_down() {
                self.collect(id, query, &mut out);
                if self.store.get(id).is_some_and(Entity::obscures_below) {
                    break;
                }
            }
        } else {
            for (_, id) in tile.bottom_up() {
                self.collect(id, query, &mut out);
            }
        }
        out
    }

    fn collect(&self, id: EntityId, query: &EntityQuery, out: &mut Vec<EntityId>) {
        let Some(entity) = self.store.get(id) else {
            return;
        };
        out.push(id);
        let closed = query.respect_container_status && entity.is_container() && !entity.is_open_container();
        let skip_contents = !query.include_contents
            || closed
            || query.exclude_inventory_of == Some(id)
            || (query.skip_agent_inventories && entity.is_agent());
        if !skip_contents {
            for child in &entity.contents {
                self.collect(*child, query, out);
            }
        }
        if query.include_parts {
            for part in &entity.parts {
                self.collect(*part, query, out);
            }
        }
    }

    /// Entities an agent facing `pos` can reach: top-down until something
    /// obscures the rest, through open containers only.
    pub fn interactable_at(&self, agent: EntityId, pos: GridPos) -> Vec<EntityId> {
        self.entities_at(pos, &EntityQuery::interactable(agent))
    }

    /// Items held directly by `agent`.
    pub fn inventory(&self, agent: EntityId) -> Vec<EntityId> {
        self.store
            .get(agent)
            .map(|entity| entity.contents.clone())
            .unwrap_or_default()
    }

    /// Inventory items plus whatever sits inside open containers they hold.
    pub fn inventory_tree(&self, agent: EntityId) -> Vec<EntityId> {
        let query = EntityQuery {
            include_contents: true,
            include_parts: true,
            respect_container_status: true,
            ..EntityQuery::default()
        };
        let mut out = Vec::new();
        for item in self.inventory(agent) {
            self.collect(item, &query, &mut out);
        }
        out
    }

    pub fn facing_tile(&self, agent: EntityId) -> Option<GridPos> {
        let entity = self.store.get(agent)?;
        let facing = entity.facing()?;
        let pos = self.world_position(agent);
        pos.is_placed().then(|| pos.step(facing))
    }

    /// Everything `agent` may name in a command this tick.
    pub fn accessible_from(&self, agent: EntityId) -> Vec<EntityId> {
        let mut out = self.inventory_tree(agent);
        if let Some(pos) = self.facing_tile(agent) {
            for id in self.interactable_at(agent, pos) {
                if !out.contains(&id) {
                    out.push(id);
                }
            }
        }
        out
    }

    /// Whether an agent could step onto `pos`, and the topmost blocker if not.
    pub fn is_passable(&self, pos: GridPos) -> (bool, Option<EntityId>) {
        if !self.grid.in_bounds(pos) {
            return (false, None);
        }
        let query = EntityQuery {
            include_contents: true,
            include_parts: true,
            skip_agent_inventories: true,
            ..EntityQuery::default()
        };
        let mut on_tile = self.entities_at(pos, &query);
        on_tile.reverse();
        let blocker = on_tile
            .into_iter()
            .find(|id| self.store.get(*id).is_some_and(|entity| !entity.is_passable()));
        (blocker.is_none(), blocker)
    }

    pub fn mark_dirty(&mut self, pos: GridPos) {
        if self.grid.in_bounds(pos) {
            self.dirty.insert(pos);
        }
    }

    pub fn mark_entity_dirty(&mut self, id: EntityId) {
        let pos = self.world_position(id);
        self.mark_dirty(pos);
    }

    /// Drain the tiles whose render cache must be rebuilt.
    pub fn take_dirty_tiles(&mut self) -> Vec<GridPos> {
        std::mem::take(&mut self.dirty).into_iter().collect()
    }

    /// Advance one tick: NPC autopilots, timed effects, dialog proximity,
    /// then append the tick's snapshot to history.
    pub fn tick(&mut self) -> Result<TickSummary, HistoryError> {
        let autopilot_steps = self.run_autopilots();
        let expired_effects = self.tick_effects();
        let ended_dialogs = self.end_distant_dialogs();
        self.turns.advance();
        self.tick += 1;

        let snapshot = self.capture_snapshot();
        let snapshot_hash = snapshot.hash;
        let snapshot_bytes = self.history.record(&snapshot)?;
        self.metrics
            .record_tick(self.tick, self.store.len(), snapshot_bytes, autopilot_steps);

        info!(
            target: "tileworld::world",
            tick = self.tick,
            entities = self.store.len(),
            autopilot_steps,
            expired_effects,
            ended_dialogs,
            snapshot_bytes,
            "world.tick"
        );
        Ok(TickSummary {
            tick: self.tick,
            autopilot_steps,
            expired_effects,
            ended_dialogs,
            snapshot_bytes,
            snapshot_hash,
        })
    }

    /// Record the pre-run state as tick 0.
    pub fn record_initial_snapshot(&mut self) -> Result<usize, HistoryError> {
        let snapshot = self.capture_snapshot();
        let bytes = self.history.record(&snapshot)?;
        self.metrics.snapshot_bytes += bytes as u64;
        Ok(bytes)
    }

    fn tick_effects(&mut self) -> usize {
        let mut expired = 0;
        let mut touched = Vec::new();
        for entity in self.store.iter_mut() {
            if entity.active_effects.is_empty() {
                continue;
            }
            for effect in entity.active_effects.iter_mut() {
                effect.remaining_ticks = effect.remaining_ticks.saturating_sub(1);
            }
            let (done, live): (Vec<_>, Vec<_>) = entity
                .active_effects
                .drain(..)
                .partition(|effect| effect.remaining_ticks == 0);
            entity.active_effects = live;
            for effect in done {
                let still_active = entity
                    .active_effects
                    .iter()
                    .any(|other| other.attribute == effect.attribute);
                if !still_active {
                    entity.attributes.remove(&effect.attribute);
                }
                expired += 1;
                touched.push(entity.id);
            }
        }
        for id in touched {
            self.mark_entity_dirty(id);
        }
        expired
    }

    /// Set an attribute, returning the previous value.
    pub fn set_attribute(
        &mut self,
        id: EntityId,
        key: impl Into<String>,
        value: AttributeValue,
    ) -> Option<AttributeValue> {
        let previous = self
            .store
            .get_mut(id)
            .and_then(|entity| entity.attributes.insert(key.into(), value));
        self.mark_entity_dirty(id);
        previous
    }

    pub fn run_metadata(&self) -> RunMetadata {
        RunMetadata {
            run_name: self.config.run_name.clone(),
            scenario: self.scenario_name.clone(),
            seed: self.config.seed,
            grid_size_x: self.config.grid_size_x,
            grid_size_y: self.config.grid_size_y,
        }
    }

    /// Write the recorded history as size-capped compressed parts.
    pub fn export_history(&self, dir: &Path, prefix: &str) -> Result<Vec<PathBuf>, HistoryError> {
        self.history.write_export(
            dir,
            prefix,
            &self.run_metadata(),
            self.config.snapshots.export_part_max_bytes,
        )
    }
}
