use sim_runtime::{EntityState, TaskScore, TickSnapshot};

use crate::{
    entity::{EntityId, Layer, Owner},
    World,
};

impl World {
    /// Structural copy of the whole entity graph at the current tick.
    pub fn capture_snapshot(&self) -> TickSnapshot {
        let (size_x, size_y) = self.grid.size();
        let mut grid = vec![vec![Vec::new(); size_y as usize]; size_x as usize];
        for pos in self.grid.positions() {
            let Some(tile) = self.grid.tile(pos) else {
                continue;
            };
            grid[pos.x as usize][pos.y as usize] = tile
                .bottom_up()
                .filter_map(|(layer, id)| self.entity_state(id, Some(layer)))
                .collect();
        }

        let unplaced = self
            .store
            .iter()
            .filter(|entity| entity.owner == Owner::Nowhere)
            .filter_map(|entity| self.entity_state(entity.id, None))
            .collect();

        let task_scores = self
            .task_scores
            .iter()
            .map(|(name, score)| TaskScore {
                name: name.clone(),
                score: *score,
            })
            .collect();

        TickSnapshot {
            tick: self.tick,
            grid_size_x: size_x,
            grid_size_y: size_y,
            grid,
            unplaced,
            auxiliary_feed_state: self.feed.state().clone(),
            task_scores,
            runtime_seconds: self.runtime_seconds(),
            hash: 0,
        }
        .finalize()
    }

    /// Snapshot form of one entity and everything below it.
    pub fn entity_state(&self, id: EntityId, layer: Option<Layer>) -> Option<EntityState> {
        let entity = self.store.get(id)?;
        Some(EntityState {
            id: entity.id.0,
            name: entity.name.clone(),
            kind: entity.kind.clone(),
            sprite: entity.sprite.clone(),
            x: entity.position.x,
            y: entity.position.y,
            layer: layer.map(|layer| layer as u8),
            facing: entity.facing().map(|facing| facing.name().to_string()),
            flags: entity.flag_names().map(str::to_string).collect(),
            attributes: entity.attributes.clone(),
            contents: entity
                .contents
                .iter()
                .filter_map(|child| self.entity_state(*child, None))
                .collect(),
            parts: entity
                .parts
                .iter()
                .filter_map(|part| self.entity_state(*part, None))
                .collect(),
        })
    }
}
