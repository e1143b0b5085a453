//! Scenario files: a grid, named locations, and archetype placements.
//!
//! A scenario is checked in full before any entity is created, so a bad
//! file never produces a half-built world.

use std::{
    collections::{BTreeMap, BTreeSet},
    fs, io,
    path::{Path, PathBuf},
    sync::Arc,
};

use serde::Deserialize;
use sim_runtime::Direction;
use thiserror::Error;
use tracing::info;

use crate::{
    archetype::ArchetypeTable,
    autopilot::AutopilotAction,
    config::SimulationConfig,
    entity::{Capabilities, EntityId, GridPos, Layer},
    World,
};

#[derive(Debug, Error)]
pub enum ScenarioError {
    #[error("failed to read scenario from {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to parse scenario: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("scenario has {} problem(s):\n  {}", .0.len(), .0.join("\n  "))]
    Invalid(Vec<String>),
}

/// One autopilot entry. Items and containers name other placements.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum AutopilotSpec {
    Goto {
        x: i32,
        y: i32,
        #[serde(default)]
        priority: i32,
    },
    Pickup {
        item: String,
        #[serde(default)]
        priority: i32,
    },
    PlaceInContainer {
        item: String,
        container: String,
        #[serde(default)]
        priority: i32,
    },
    Wander {
        steps: u32,
        #[serde(default)]
        priority: i32,
    },
    Wait {
        ticks: u32,
        #[serde(default)]
        priority: i32,
    },
}

impl AutopilotSpec {
    fn priority(&self) -> i32 {
        match self {
            AutopilotSpec::Goto { priority, .. }
            | AutopilotSpec::Pickup { priority, .. }
            | AutopilotSpec::PlaceInContainer { priority, .. }
            | AutopilotSpec::Wander { priority, .. }
            | AutopilotSpec::Wait { priority, .. } => *priority,
        }
    }

    fn references(&self) -> Vec<&str> {
        match self {
            AutopilotSpec::Pickup { item, .. } => vec![item.as_str()],
            AutopilotSpec::PlaceInContainer { item, container, .. } => {
                vec![item.as_str(), container.as_str()]
            }
            _ => Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct Placement {
    pub archetype: String,
    pub x: i32,
    pub y: i32,
    #[serde(default)]
    pub layer: Option<Layer>,
    #[serde(default)]
    pub facing: Option<Direction>,
    /// Display name override; also the handle autopilot entries refer to.
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub external: bool,
    #[serde(default)]
    pub autopilot: Vec<AutopilotSpec>,
}

impl Placement {
    fn handle(&self) -> &str {
        self.name.as_deref().unwrap_or(&self.archetype)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct Scenario {
    pub name: String,
    #[serde(default)]
    pub grid_size: Option<[u32; 2]>,
    /// Terrain archetype laid on every tile before placements.
    #[serde(default)]
    pub fill_terrain: Option<String>,
    #[serde(default)]
    pub locations: BTreeMap<String, [i32; 2]>,
    #[serde(default)]
    pub placements: Vec<Placement>,
    #[serde(default)]
    pub task_scores: BTreeMap<String, f64>,
}

impl Scenario {
    pub fn from_json_str(json: &str) -> Result<Self, ScenarioError> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn from_file(path: &Path) -> Result<Self, ScenarioError> {
        let contents = fs::read_to_string(path).map_err(|source| ScenarioError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Scenario::from_json_str(&contents)
    }

    /// Every problem in the file, in document order.
    pub fn validate(&self, config: &SimulationConfig, table: &ArchetypeTable) -> Vec<String> {
        let mut problems = Vec::new();
        let [size_x, size_y] = self.size(config);
        if size_x == 0 || size_y == 0 {
            problems.push(format!("grid size must be non-zero, got {size_x}x{size_y}"));
        }
        let in_bounds = |x: i32, y: i32| {
            x >= 0 && y >= 0 && (x as u32) < size_x && (y as u32) < size_y
        };

        if let Some(fill) = &self.fill_terrain {
            match table.get(fill) {
                None => problems.push(format!("fill_terrain: unknown archetype '{fill}'")),
                Some(archetype) if archetype.layer != Layer::Terrain => problems.push(format!(
                    "fill_terrain: archetype '{fill}' is not a terrain archetype"
                )),
                Some(_) => {}
            }
        }
        for (name, [x, y]) in &self.locations {
            if !in_bounds(*x, *y) {
                problems.push(format!("location '{name}' at ({x}, {y}) is outside the grid"));
            }
        }

        let mut handles = BTreeSet::new();
        for placement in &self.placements {
            if let Some(name) = &placement.name {
                if !handles.insert(name.as_str()) {
                    problems.push(format!("placement name '{name}' is used more than once"));
                }
            }
        }
        let known: BTreeSet<&str> = self.placements.iter().map(Placement::handle).collect();

        for (index, placement) in self.placements.iter().enumerate() {
            let label = format!("placement {index} ({})", placement.handle());
            if !in_bounds(placement.x, placement.y) {
                problems.push(format!(
                    "{label}: ({}, {}) is outside the grid",
                    placement.x, placement.y
                ));
            }
            let Some(archetype) = table.get(&placement.archetype) else {
                problems.push(format!("{label}: unknown archetype '{}'", placement.archetype));
                continue;
            };
            let is_agent = archetype.capabilities.contains(Capabilities::AGENT);
            if !is_agent {
                if placement.facing.is_some() {
                    problems.push(format!("{label}: only agents have a facing"));
                }
                if placement.external {
                    problems.push(format!("{label}: only agents can be external"));
                }
                if !placement.autopilot.is_empty() {
                    problems.push(format!("{label}: only agents take autopilot entries"));
                }
            }
            for (step, entry) in placement.autopilot.iter().enumerate() {
                if let AutopilotSpec::Goto { x, y, .. } = entry {
                    if !in_bounds(*x, *y) {
                        problems.push(format!(
                            "{label}: autopilot entry {step} targets ({x}, {y}) outside the grid"
                        ));
                    }
                }
                for reference in entry.references() {
                    if !known.contains(reference) {
                        problems.push(format!(
                            "{label}: autopilot entry {step} names unknown placement '{reference}'"
                        ));
                    }
                }
            }
        }
        problems
    }

    /// Validate, then instantiate. The first external agent becomes the
    /// world's default agent.
    pub fn build(
        &self,
        config: Arc<SimulationConfig>,
        table: Arc<ArchetypeTable>,
    ) -> Result<World, ScenarioError> {
        let problems = self.validate(&config, &table);
        if !problems.is_empty() {
            return Err(ScenarioError::Invalid(problems));
        }
        let config = match self.grid_size {
            Some([size_x, size_y]) => {
                let mut resized = (*config).clone();
                resized.grid_size_x = size_x;
                resized.grid_size_y = size_y;
                Arc::new(resized)
            }
            None => config,
        };
        let mut world = World::new(config, table);
        world.set_scenario_name(self.name.clone());

        if let Some(fill) = &self.fill_terrain {
            let positions: Vec<GridPos> = world.grid().positions().collect();
            for pos in positions {
                world.spawn_at(fill, pos);
            }
        }
        for (name, [x, y]) in &self.locations {
            world.add_location(name.clone(), GridPos::new(*x, *y));
        }

        let mut problems = Vec::new();
        let mut spawned: Vec<(usize, EntityId)> = Vec::new();
        let mut by_handle: BTreeMap<&str, EntityId> = BTreeMap::new();
        for (index, placement) in self.placements.iter().enumerate() {
            let pos = GridPos::new(placement.x, placement.y);
            let placed = match placement.layer {
                Some(layer) => world.spawn(&placement.archetype).and_then(|id| {
                    if world.add_entity(pos, layer, id) {
                        Some(id)
                    } else {
                        world.destroy_entity(id);
                        None
                    }
                }),
                None => world.spawn_at(&placement.archetype, pos),
            };
            let Some(id) = placed else {
                problems.push(format!("placement {index} ({}) could not be placed", placement.handle()));
                continue;
            };
            if let Some(entity) = world.entity_mut(id) {
                if let Some(name) = &placement.name {
                    entity.name = name.clone();
                }
                if let (Some(agent), Some(facing)) = (entity.agent.as_mut(), placement.facing) {
                    agent.facing = facing;
                }
            }
            if placement.external {
                world.set_external(id, true);
                if world.default_agent().is_none() {
                    world.set_default_agent(id);
                }
            }
            by_handle.entry(placement.handle()).or_insert(id);
            spawned.push((index, id));
        }

        for (index, id) in spawned {
            for entry in &self.placements[index].autopilot {
                let lookup = |handle: &str| by_handle.get(handle).copied();
                let action = match entry {
                    AutopilotSpec::Goto { x, y, .. } => Some(AutopilotAction::Goto {
                        target: GridPos::new(*x, *y),
                    }),
                    AutopilotSpec::Pickup { item, .. } => {
                        lookup(item).map(|item| AutopilotAction::Pickup { item })
                    }
                    AutopilotSpec::PlaceInContainer { item, container, .. } => lookup(item)
                        .zip(lookup(container))
                        .map(|(item, container)| AutopilotAction::PlaceInContainer { item, container }),
                    AutopilotSpec::Wander { steps, .. } => Some(AutopilotAction::Wander { steps: *steps }),
                    AutopilotSpec::Wait { ticks, .. } => Some(AutopilotAction::Wait { ticks: *ticks }),
                };
                match action {
                    Some(action) => {
                        world.queue_autopilot(id, action, entry.priority());
                    }
                    None => problems.push(format!(
                        "placement {index}: autopilot entry refers to a placement that was not created"
                    )),
                }
            }
        }
        if !problems.is_empty() {
            return Err(ScenarioError::Invalid(problems));
        }

        for (name, score) in &self.task_scores {
            world.set_task_score(name.clone(), *score);
        }
        info!(
            target: "tileworld::scenario",
            scenario = %self.name,
            placements = self.placements.len(),
            entities = world.entity_count(),
            "scenario.built"
        );
        Ok(world)
    }

    fn size(&self, config: &SimulationConfig) -> [u32; 2] {
        self.grid_size
            .unwrap_or([config.grid_size_x, config.grid_size_y])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grid::EntityQuery;

    const LAB: &str = r#"{
        "name": "lab",
        "grid_size": [12, 12],
        "fill_terrain": "floor",
        "locations": { "lab": [6, 6] },
        "placements": [
            { "archetype": "player", "x": 5, "y": 5, "facing": "south", "external": true, "name": "ada" },
            { "archetype": "box", "x": 5, "y": 6 },
            { "archetype": "apple", "x": 2, "y": 2, "name": "snack" },
            { "archetype": "guard", "x": 9, "y": 9, "autopilot": [
                { "action": "pickup", "item": "snack", "priority": 5 },
                { "action": "place_in_container", "item": "snack", "container": "box" },
                { "action": "wait", "ticks": 3 }
            ] }
        ],
        "task_scores": { "sorting": 0.5 }
    }"#;

    fn build(json: &str) -> Result<World, ScenarioError> {
        Scenario::from_json_str(json)?.build(SimulationConfig::builtin(), ArchetypeTable::builtin())
    }

    #[test]
    fn builds_the_world_with_overrides() {
        let world = build(LAB).expect("scenario builds");
        assert_eq!(world.scenario_name(), "lab");
        assert_eq!(world.grid().size(), (12, 12));
        let ada = world.default_agent().expect("default agent");
        let agent = world.entity(ada).expect("ada");
        assert_eq!(agent.name, "ada");
        assert_eq!(agent.facing(), Some(Direction::South));
        assert!(agent.agent.as_ref().is_some_and(|state| state.external));
        assert_eq!(world.location("LAB"), Some(GridPos::new(6, 6)));
        assert_eq!(world.task_scores().get("sorting"), Some(&0.5));

        let corner = world.entities_at(GridPos::new(0, 11), &EntityQuery::top_level());
        assert_eq!(corner.len(), 1);
        assert_eq!(world.layer_of(corner[0]), Some(Layer::Terrain));

        let guard = world
            .entities()
            .find(|entity| entity.name == "guard")
            .expect("guard");
        let queue = &guard.agent.as_ref().expect("agent state").autopilot;
        assert_eq!(queue.len(), 3);
        assert_eq!(queue.head().map(|entry| entry.priority), Some(5));
    }

    #[test]
    fn reports_every_problem_at_once() {
        let json = r#"{
            "name": "broken",
            "locations": { "far": [40, 1] },
            "placements": [
                { "archetype": "dragon", "x": 1, "y": 1 },
                { "archetype": "apple", "x": -1, "y": 3, "facing": "north" },
                { "archetype": "player", "x": 2, "y": 2, "autopilot": [
                    { "action": "goto", "x": 99, "y": 0 },
                    { "action": "pickup", "item": "ghost" }
                ] }
            ]
        }"#;
        let Err(ScenarioError::Invalid(problems)) = build(json) else {
            panic!("expected an invalid scenario");
        };
        assert_eq!(problems.len(), 6, "{problems:#?}");
        assert!(problems.iter().any(|p| p.contains("unknown archetype 'dragon'")));
        assert!(problems.iter().any(|p| p.contains("only agents have a facing")));
        assert!(problems.iter().any(|p| p.contains("unknown placement 'ghost'")));
    }

    #[test]
    fn malformed_json_is_a_parse_error() {
        assert!(matches!(build("{ \"name\": 3 }"), Err(ScenarioError::Parse(_))));
    }
}
