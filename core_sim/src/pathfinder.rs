//! Four-directional A* over a per-query cost grid.
//!
//! Costs are rebuilt from the live world on every query, so a path never
//! reflects a stale grid.

use std::cmp::Ordering;
use std::collections::BinaryHeap;

use crate::{
    config::PathfindingConfig,
    entity::{EntityId, GridPos},
    grid::EntityQuery,
    World,
};

/// Cost of an untraversable tile.
pub const BLOCKED: i32 = -1;

/// Neighbor expansion order; ties always resolve the same way.
const NEIGHBORS: [(i32, i32); 4] = [(0, -1), (1, 0), (0, 1), (-1, 0)];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CostGrid {
    width: i32,
    height: i32,
    costs: Vec<i32>,
}

impl CostGrid {
    pub fn from_costs(width: i32, height: i32, costs: Vec<i32>) -> Self {
        debug_assert_eq!(costs.len(), (width * height) as usize);
        Self {
            width,
            height,
            costs,
        }
    }

    /// Step cost of every tile for `mover`: closed passages are expensive,
    /// other blockers are impassable, other agents add congestion.
    pub fn build(world: &World, config: &PathfindingConfig, mover: Option<EntityId>) -> Self {
        let (size_x, size_y) = world.grid().size();
        let (width, height) = (size_x as i32, size_y as i32);
        let mut costs = vec![BLOCKED; (width * height) as usize];
        let query = EntityQuery {
            include_parts: true,
            ..EntityQuery::default()
        };
        for pos in world.grid().positions() {
            let mut hard = false;
            let mut closed_passage = false;
            let mut agents = 0u32;
            for id in world.entities_at(pos, &query) {
                let Some(entity) = world.entity(id) else {
                    continue;
                };
                if entity.is_agent() {
                    if Some(id) != mover {
                        agents += 1;
                    }
                    continue;
                }
                if !entity.is_passable() {
                    if entity.is_passage() {
                        closed_passage = true;
                    } else {
                        hard = true;
                    }
                }
            }
            let cost = if hard {
                BLOCKED
            } else {
                let base = if closed_passage {
                    config.closed_passage_cost
                } else {
                    config.normal_cost
                };
                (base + agents * config.congestion_penalty) as i32
            };
            costs[(pos.y * width + pos.x) as usize] = cost;
        }
        Self {
            width,
            height,
            costs,
        }
    }

    fn index(&self, pos: GridPos) -> Option<usize> {
        (pos.x >= 0 && pos.y >= 0 && pos.x < self.width && pos.y < self.height)
            .then(|| (pos.y * self.width + pos.x) as usize)
    }

    pub fn cost(&self, pos: GridPos) -> i32 {
        self.index(pos).map(|index| self.costs[index]).unwrap_or(BLOCKED)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PathGoal {
    Tile(GridPos),
    /// Any tile orthogonally next to the target.
    Adjacent(GridPos),
}

impl PathGoal {
    fn reached(self, pos: GridPos) -> bool {
        match self {
            PathGoal::Tile(target) => pos == target,
            PathGoal::Adjacent(target) => pos.manhattan(target) == 1,
        }
    }

    fn heuristic(self, pos: GridPos) -> u32 {
        match self {
            PathGoal::Tile(target) => pos.manhattan(target) as u32,
            PathGoal::Adjacent(target) => (pos.manhattan(target) as u32).saturating_sub(1),
        }
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
struct HeapEntry {
    estimate: u32,
    heuristic: u32,
    seq: u64,
    idx: usize,
}

impl PartialOrd for HeapEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for HeapEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .estimate
            .cmp(&self.estimate)
            .then_with(|| other.heuristic.cmp(&self.heuristic))
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

/// Cheapest path from `start` to `goal`, excluding `start`. `Some(vec![])`
/// when `start` already satisfies the goal.
pub fn find_path(grid: &CostGrid, start: GridPos, goal: PathGoal) -> Option<Vec<GridPos>> {
    let start_idx = grid.index(start)?;
    if goal.reached(start) {
        return Some(Vec::new());
    }
    let total = grid.costs.len();
    let mut best = vec![u32::MAX; total];
    let mut came_from: Vec<Option<usize>> = vec![None; total];
    let mut heap = BinaryHeap::new();
    let mut seq = 0u64;

    best[start_idx] = 0;
    heap.push(HeapEntry {
        estimate: goal.heuristic(start),
        heuristic: goal.heuristic(start),
        seq,
        idx: start_idx,
    });

    while let Some(HeapEntry { estimate, heuristic, idx, .. }) = heap.pop() {
        let here = GridPos::new(idx as i32 % grid.width, idx as i32 / grid.width);
        if estimate - heuristic > best[idx] {
            continue;
        }
        if goal.reached(here) {
            return Some(reconstruct(grid, &came_from, idx, start_idx));
        }
        for (dx, dy) in NEIGHBORS {
            let next = GridPos::new(here.x + dx, here.y + dy);
            let Some(next_idx) = grid.index(next) else {
                continue;
            };
            let step = grid.costs[next_idx];
            if step < 0 {
                continue;
            }
            let cost = best[idx] + step as u32;
            if cost < best[next_idx] {
                best[next_idx] = cost;
                came_from[next_idx] = Some(idx);
                seq += 1;
                let h = goal.heuristic(next);
                heap.push(HeapEntry {
                    estimate: cost + h,
                    heuristic: h,
                    seq,
                    idx: next_idx,
                });
            }
        }
    }
    None
}

fn reconstruct(grid: &CostGrid, came_from: &[Option<usize>], end: usize, start: usize) -> Vec<GridPos> {
    let mut path = Vec::new();
    let mut current = end;
    while current != start {
        path.push(GridPos::new(current as i32 % grid.width, current as i32 / grid.width));
        match came_from[current] {
            Some(previous) => current = previous,
            None => break,
        }
    }
    path.reverse();
    path
}

/// First tile to step onto on the way to `goal`.
pub fn next_step(grid: &CostGrid, start: GridPos, goal: PathGoal) -> Option<GridPos> {
    find_path(grid, start, goal).and_then(|path| path.first().copied())
}

impl World {
    pub fn cost_grid_for(&self, mover: Option<EntityId>) -> CostGrid {
        CostGrid::build(self, &self.config.pathfinding, mover)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{agent_at, place, test_world};
    use sim_runtime::Direction;

    fn open_grid(width: i32, height: i32) -> CostGrid {
        CostGrid::from_costs(width, height, vec![1; (width * height) as usize])
    }

    #[test]
    fn straight_line_path() {
        let grid = open_grid(5, 5);
        let path = find_path(&grid, GridPos::new(0, 2), PathGoal::Tile(GridPos::new(3, 2))).expect("path");
        assert_eq!(
            path,
            vec![GridPos::new(1, 2), GridPos::new(2, 2), GridPos::new(3, 2)]
        );
        assert_eq!(
            find_path(&grid, GridPos::new(1, 1), PathGoal::Tile(GridPos::new(1, 1))),
            Some(Vec::new())
        );
    }

    #[test]
    fn repeated_queries_agree() {
        let grid = open_grid(6, 6);
        let goal = PathGoal::Tile(GridPos::new(5, 5));
        let first = next_step(&grid, GridPos::new(0, 0), goal);
        for _ in 0..10 {
            assert_eq!(next_step(&grid, GridPos::new(0, 0), goal), first);
        }
        assert!(first.is_some());
    }

    #[test]
    fn blocked_tiles_never_appear_in_paths() {
        // Wall across x = 2 with a single gap at y = 4.
        let mut costs = vec![1; 25];
        for y in 0..4 {
            costs[y * 5 + 2] = BLOCKED;
        }
        let grid = CostGrid::from_costs(5, 5, costs);
        let path = find_path(&grid, GridPos::new(0, 0), PathGoal::Tile(GridPos::new(4, 0))).expect("path");
        assert!(path.iter().all(|pos| grid.cost(*pos) != BLOCKED));
        assert!(path.contains(&GridPos::new(2, 4)));

        let mut sealed = vec![1; 25];
        for y in 0..5 {
            sealed[y * 5 + 2] = BLOCKED;
        }
        let grid = CostGrid::from_costs(5, 5, sealed);
        assert!(find_path(&grid, GridPos::new(0, 0), PathGoal::Tile(GridPos::new(4, 0))).is_none());
    }

    #[test]
    fn closed_passage_beats_no_path() {
        let mut world = test_world();
        for y in 0..10 {
            if y == 5 {
                place(&mut world, "door", 4, y);
            } else {
                place(&mut world, "wall", 4, y);
            }
        }
        let grid = world.cost_grid_for(None);
        assert_eq!(grid.cost(GridPos::new(4, 5)), 20);
        assert_eq!(grid.cost(GridPos::new(4, 4)), BLOCKED);
        let path = find_path(&grid, GridPos::new(1, 5), PathGoal::Tile(GridPos::new(8, 5))).expect("path");
        assert!(path.contains(&GridPos::new(4, 5)));
    }

    #[test]
    fn other_agents_add_congestion_not_walls() {
        let mut world = test_world();
        let mover = agent_at(&mut world, 0, 0, Direction::East);
        agent_at(&mut world, 3, 3, Direction::East);
        let grid = world.cost_grid_for(Some(mover));
        assert_eq!(grid.cost(GridPos::new(3, 3)), 11);
        assert_eq!(grid.cost(GridPos::new(0, 0)), 1);
    }

    #[test]
    fn adjacent_goal_stops_next_to_target() {
        let grid = open_grid(5, 5);
        let path = find_path(&grid, GridPos::new(0, 0), PathGoal::Adjacent(GridPos::new(3, 0))).expect("path");
        assert_eq!(path.last(), Some(&GridPos::new(2, 0)));
    }
}
