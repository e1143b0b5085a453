use crate::entity::{EntityId, GridPos, Layer};

/// One cell: an additive list per layer, in insertion order.
#[derive(Debug, Default, Clone)]
pub struct Tile {
    layers: [Vec<EntityId>; 5],
}

impl Tile {
    pub fn layer(&self, layer: Layer) -> &[EntityId] {
        &self.layers[layer.index()]
    }

    /// `(layer, entity)` pairs, bottom layer first.
    pub fn bottom_up(&self) -> impl Iterator<Item = (Layer, EntityId)> + '_ {
        Layer::ALL
            .into_iter()
            .flat_map(move |layer| self.layer(layer).iter().map(move |id| (layer, *id)))
    }

    /// `(layer, entity)` pairs, topmost first; later arrivals sit on top.
    pub fn top_down(&self) -> impl Iterator<Item = (Layer, EntityId)> + '_ {
        Layer::ALL
            .into_iter()
            .rev()
            .flat_map(move |layer| self.layer(layer).iter().rev().map(move |id| (layer, *id)))
    }

    pub fn is_empty(&self) -> bool {
        self.layers.iter().all(Vec::is_empty)
    }
}

/// Fixed-size tile array. Holds ids only; the entity arena lives in
/// [`crate::store::EntityStore`].
#[derive(Debug, Clone)]
pub struct WorldGrid {
    size_x: u32,
    size_y: u32,
    tiles: Vec<Tile>,
}

impl WorldGrid {
    pub fn new(size_x: u32, size_y: u32) -> Self {
        Self {
            size_x,
            size_y,
            tiles: vec![Tile::default(); (size_x as usize) * (size_y as usize)],
        }
    }

    pub fn size(&self) -> (u32, u32) {
        (self.size_x, self.size_y)
    }

    pub fn in_bounds(&self, pos: GridPos) -> bool {
        pos.x >= 0 && pos.y >= 0 && (pos.x as u32) < self.size_x && (pos.y as u32) < self.size_y
    }

    fn index(&self, pos: GridPos) -> Option<usize> {
        self.in_bounds(pos)
            .then(|| pos.y as usize * self.size_x as usize + pos.x as usize)
    }

    pub fn tile(&self, pos: GridPos) -> Option<&Tile> {
        self.index(pos).map(|index| &self.tiles[index])
    }

    pub fn push(&mut self, pos: GridPos, layer: Layer, id: EntityId) -> bool {
        match self.index(pos) {
            Some(index) => {
                self.tiles[index].layers[layer.index()].push(id);
                true
            }
            None => false,
        }
    }

    pub fn remove(&mut self, pos: GridPos, layer: Layer, id: EntityId) -> bool {
        let Some(index) = self.index(pos) else {
            return false;
        };
        let slot = &mut self.tiles[index].layers[layer.index()];
        let before = slot.len();
        slot.retain(|existing| *existing != id);
        slot.len() != before
    }

    /// Every in-bounds position, column-major (`x` outer, `y` inner).
    pub fn positions(&self) -> impl Iterator<Item = GridPos> {
        let (size_x, size_y) = (self.size_x as i32, self.size_y as i32);
        (0..size_x).flat_map(move |x| (0..size_y).map(move |y| GridPos::new(x, y)))
    }
}

/// Options for [`crate::World::entities_at`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EntityQuery {
    /// Descend into container contents.
    pub include_contents: bool,
    /// Descend into permanent parts.
    pub include_parts: bool,
    /// Do not descend into closed containers.
    pub respect_container_status: bool,
    /// Skip the contents of this agent's inventory.
    pub exclude_inventory_of: Option<EntityId>,
    /// Skip every agent's inventory.
    pub skip_agent_inventories: bool,
    /// Walk top-down and stop after the first entity that obscures what lies below.
    pub stop_at_obscuring: bool,
}

impl EntityQuery {
    pub fn top_level() -> Self {
        Self::default()
    }

    pub fn flattened() -> Self {
        Self {
            include_contents: true,
            include_parts: true,
            ..Self::default()
        }
    }

    /// What an agent facing the tile can reach.
    pub fn interactable(agent: EntityId) -> Self {
        Self {
            include_contents: true,
            include_parts: true,
            respect_container_status: true,
            exclude_inventory_of: None,
            skip_agent_inventories: true,
            stop_at_obscuring: true,
        }
        .excluding_inventory_of(agent)
    }

    pub fn excluding_inventory_of(mut self, agent: EntityId) -> Self {
        self.exclude_inventory_of = Some(agent);
        self
    }

    pub fn respecting_container_status(mut self) -> Self {
        self.respect_container_status = true;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn layers_are_additive_and_ordered() {
        let mut grid = WorldGrid::new(4, 3);
        let pos = GridPos::new(3, 2);
        assert!(grid.push(pos, Layer::Object, EntityId(1)));
        assert!(grid.push(pos, Layer::Object, EntityId(2)));
        assert!(grid.push(pos, Layer::Terrain, EntityId(3)));
        let tile = grid.tile(pos).expect("in bounds");
        assert_eq!(tile.layer(Layer::Object), &[EntityId(1), EntityId(2)]);
        assert_eq!(
            tile.bottom_up().map(|(_, id)| id).collect::<Vec<_>>(),
            vec![EntityId(3), EntityId(1), EntityId(2)]
        );
        assert_eq!(
            tile.top_down().map(|(_, id)| id).collect::<Vec<_>>(),
            vec![EntityId(2), EntityId(1), EntityId(3)]
        );
    }

    #[test]
    fn bounds_are_enforced() {
        let mut grid = WorldGrid::new(4, 3);
        assert!(!grid.push(GridPos::new(4, 0), Layer::Agent, EntityId(1)));
        assert!(!grid.push(GridPos::NOWHERE, Layer::Agent, EntityId(1)));
        assert!(grid.tile(GridPos::new(0, 3)).is_none());
        assert_eq!(grid.positions().count(), 12);
        assert!(!grid.remove(GridPos::new(0, 0), Layer::Agent, EntityId(9)));
    }
}
