//! Data-driven entity templates and the factory that instantiates them.
//!
//! Tables are validated as a whole when loaded; every problem is reported
//! at once so a broken content drop can be fixed in one pass.

use std::{
    collections::{BTreeMap, BTreeSet},
    fs, io,
    path::{Path, PathBuf},
    sync::Arc,
};

use serde::Deserialize;
use sim_runtime::{AttributeValue, Direction};
use thiserror::Error;
use tracing::{debug, warn};

use crate::{
    dialog::{Dialog, DialogGraph},
    entity::{Capabilities, Entity, EntityId, GridPos, IngestedEffect, Layer, StatusFlags},
    use_handlers::{MeasureHandler, RecipeHandler, UseRegistry},
    World,
};

pub const BUILTIN_ARCHETYPES: &str = include_str!("data/archetypes.json");

#[derive(Debug, Error)]
pub enum ArchetypeError {
    #[error("failed to read archetype table from {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to parse archetype table: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("archetype table has {} problem(s):\n  {}", .0.len(), .0.join("\n  "))]
    Invalid(Vec<String>),
}

fn default_layer() -> Layer {
    Layer::Object
}

#[derive(Debug, Clone, Deserialize)]
struct ArchetypeSpec {
    #[serde(default)]
    kind: Option<String>,
    #[serde(default = "default_layer")]
    layer: Layer,
    #[serde(default)]
    sprite: Option<String>,
    #[serde(default)]
    capabilities: Vec<String>,
    #[serde(default)]
    status: Vec<String>,
    #[serde(default)]
    attributes: BTreeMap<String, serde_json::Value>,
    #[serde(default)]
    parts: Vec<String>,
    #[serde(default)]
    contents: Vec<String>,
    #[serde(default)]
    ingested_effects: Vec<EffectSpec>,
    #[serde(default)]
    dialog: Option<DialogGraph>,
    #[serde(default)]
    facing: Option<Direction>,
}

#[derive(Debug, Clone, Deserialize)]
struct EffectSpec {
    attribute: String,
    value: serde_json::Value,
    #[serde(default)]
    duration_ticks: Option<u32>,
}

/// Using `primary` on `secondary` (or on nothing) yields `produces`.
#[derive(Debug, Clone, Deserialize)]
pub struct RecipeSpec {
    pub primary: String,
    #[serde(default)]
    pub secondary: Option<String>,
    pub produces: Vec<String>,
    #[serde(default)]
    pub consume_inputs: bool,
    #[serde(default)]
    pub message: Option<String>,
}

/// Using `tool` on `target` (or on anything) reports `attribute`.
#[derive(Debug, Clone, Deserialize)]
pub struct MeasureSpec {
    pub tool: String,
    #[serde(default)]
    pub target: Option<String>,
    pub attribute: String,
    #[serde(default)]
    pub unit: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
struct ArchetypeFile {
    #[serde(default)]
    archetypes: BTreeMap<String, ArchetypeSpec>,
    #[serde(default)]
    recipes: Vec<RecipeSpec>,
    #[serde(default)]
    measures: Vec<MeasureSpec>,
}

/// A validated template.
#[derive(Debug, Clone)]
pub struct Archetype {
    pub name: String,
    pub kind: String,
    pub layer: Layer,
    pub sprite: Option<String>,
    pub capabilities: Capabilities,
    pub status: StatusFlags,
    pub attributes: BTreeMap<String, AttributeValue>,
    pub parts: Vec<String>,
    pub contents: Vec<String>,
    pub ingested_effects: Vec<IngestedEffect>,
    pub dialog: Option<Arc<DialogGraph>>,
    pub facing: Option<Direction>,
}

#[derive(Debug, Clone, Default)]
pub struct ArchetypeTable {
    archetypes: BTreeMap<String, Archetype>,
    recipes: Vec<RecipeSpec>,
    measures: Vec<MeasureSpec>,
}

impl ArchetypeTable {
    pub fn builtin() -> Arc<Self> {
        Arc::new(
            ArchetypeTable::from_json_str(BUILTIN_ARCHETYPES)
                .expect("builtin archetype table should validate"),
        )
    }

    pub fn from_json_str(json: &str) -> Result<Self, ArchetypeError> {
        let file: ArchetypeFile = serde_json::from_str(json)?;
        ArchetypeTable::compile(file)
    }

    pub fn from_file(path: &Path) -> Result<Self, ArchetypeError> {
        let contents = fs::read_to_string(path).map_err(|source| ArchetypeError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        ArchetypeTable::from_json_str(&contents)
    }

    pub fn get(&self, name: &str) -> Option<&Archetype> {
        self.archetypes.get(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.archetypes.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.archetypes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.archetypes.is_empty()
    }

    fn compile(file: ArchetypeFile) -> Result<Self, ArchetypeError> {
        let mut problems = Vec::new();
        let mut archetypes = BTreeMap::new();

        for (name, spec) in &file.archetypes {
            let mut capabilities = Capabilities::empty();
            for flag in &spec.capabilities {
                match Capabilities::from_attribute_name(flag) {
                    Some(capability) => capabilities |= capability,
                    None => problems.push(format!("archetype '{name}': unknown capability '{flag}'")),
                }
            }
            let mut status = StatusFlags::empty();
            for flag in &spec.status {
                match StatusFlags::from_attribute_name(flag) {
                    Some(state) => status |= state,
                    None => problems.push(format!("archetype '{name}': unknown status flag '{flag}'")),
                }
            }

            let mut attributes = BTreeMap::new();
            for (key, raw) in &spec.attributes {
                match AttributeValue::from_json(raw) {
                    Ok(value) => {
                        attributes.insert(key.clone(), value);
                    }
                    Err(reason) => {
                        problems.push(format!("archetype '{name}': attribute '{key}': {reason}"))
                    }
                }
            }

            let mut ingested_effects = Vec::new();
            for effect in &spec.ingested_effects {
                match AttributeValue::from_json(&effect.value) {
                    Ok(value) => ingested_effects.push(IngestedEffect {
                        attribute: effect.attribute.clone(),
                        value,
                        duration_ticks: effect.duration_ticks,
                    }),
                    Err(reason) => problems.push(format!(
                        "archetype '{name}': ingested effect '{}': {reason}",
                        effect.attribute
                    )),
                }
            }

            for reference in spec.parts.iter().chain(&spec.contents) {
                match file.archetypes.get(reference) {
                    None => problems.push(format!(
                        "archetype '{name}': unknown component archetype '{reference}'"
                    )),
                    Some(component) if component.capabilities.iter().any(|c| c == "isAgent") => {
                        problems.push(format!(
                            "archetype '{name}': agent archetype '{reference}' cannot be a component"
                        ))
                    }
                    Some(_) => {}
                }
            }
            if !spec.contents.is_empty() && !capabilities.contains(Capabilities::CONTAINER) {
                problems.push(format!(
                    "archetype '{name}': declares contents but is not a container"
                ));
            }

            if let Some(dialog) = &spec.dialog {
                for problem in dialog.problems() {
                    problems.push(format!("archetype '{name}': dialog: {problem}"));
                }
                if !capabilities.contains(Capabilities::DIALOGABLE) {
                    problems.push(format!(
                        "archetype '{name}': has a dialog but is not isDialogable"
                    ));
                }
            }

            archetypes.insert(
                name.clone(),
                Archetype {
                    name: name.clone(),
                    kind: spec.kind.clone().unwrap_or_else(|| name.clone()),
                    layer: spec.layer,
                    sprite: spec.sprite.clone(),
                    capabilities,
                    status,
                    attributes,
                    parts: spec.parts.clone(),
                    contents: spec.contents.clone(),
                    ingested_effects,
                    dialog: spec.dialog.clone().map(Arc::new),
                    facing: spec.facing,
                },
            );
        }

        for name in file.archetypes.keys() {
            if let Some(path) = composition_cycle(&file.archetypes, name) {
                problems.push(format!(
                    "archetype '{name}' contains itself via {}",
                    path.join(" -> ")
                ));
            }
        }

        for recipe in &file.recipes {
            let referenced = std::iter::once(&recipe.primary)
                .chain(recipe.secondary.as_ref())
                .chain(&recipe.produces);
            for reference in referenced {
                if !file.archetypes.contains_key(reference) {
                    problems.push(format!(
                        "recipe '{}': unknown archetype '{reference}'",
                        recipe.primary
                    ));
                }
            }
            if recipe.produces.is_empty() {
                problems.push(format!("recipe '{}': produces nothing", recipe.primary));
            }
        }
        for measure in &file.measures {
            for reference in std::iter::once(&measure.tool).chain(measure.target.as_ref()) {
                if !file.archetypes.contains_key(reference) {
                    problems.push(format!(
                        "measure '{}': unknown archetype '{reference}'",
                        measure.tool
                    ));
                }
            }
        }

        if !problems.is_empty() {
            return Err(ArchetypeError::Invalid(problems));
        }
        Ok(Self {
            archetypes,
            recipes: file.recipes,
            measures: file.measures,
        })
    }

    fn kind_of(&self, name: &str) -> String {
        self.get(name)
            .map(|archetype| archetype.kind.clone())
            .unwrap_or_else(|| name.to_string())
    }

    /// Handlers for every recipe and measure, keyed by the kinds involved.
    pub fn use_registry(&self) -> UseRegistry {
        let mut registry = UseRegistry::new();
        for recipe in &self.recipes {
            registry.register(
                self.kind_of(&recipe.primary),
                recipe.secondary.as_deref().map(|name| self.kind_of(name)),
                Arc::new(RecipeHandler {
                    produces: recipe.produces.clone(),
                    consume_inputs: recipe.consume_inputs,
                    message: recipe.message.clone(),
                }),
            );
        }
        for measure in &self.measures {
            registry.register(
                self.kind_of(&measure.tool),
                measure.target.as_deref().map(|name| self.kind_of(name)),
                Arc::new(MeasureHandler {
                    attribute: measure.attribute.clone(),
                    unit: measure.unit.clone(),
                }),
            );
        }
        registry
    }
}

/// Path from `start` back to itself through parts and contents, if any.
fn composition_cycle(specs: &BTreeMap<String, ArchetypeSpec>, start: &str) -> Option<Vec<String>> {
    fn visit(
        specs: &BTreeMap<String, ArchetypeSpec>,
        start: &str,
        current: &str,
        path: &mut Vec<String>,
        seen: &mut BTreeSet<String>,
    ) -> bool {
        let Some(spec) = specs.get(current) else {
            return false;
        };
        for child in spec.parts.iter().chain(&spec.contents) {
            path.push(child.clone());
            if child == start {
                return true;
            }
            if seen.insert(child.clone()) && visit(specs, start, child, path, seen) {
                return true;
            }
            path.pop();
        }
        false
    }

    let mut path = vec![start.to_string()];
    let mut seen = BTreeSet::new();
    visit(specs, start, start, &mut path, &mut seen).then_some(path)
}

impl World {
    /// Instantiate archetype `name` with its parts and contents. The new
    /// entity is owned by nowhere until placed.
    pub fn spawn(&mut self, name: &str) -> Option<EntityId> {
        let table = Arc::clone(&self.archetypes);
        let Some(archetype) = table.get(name) else {
            warn!(target: "tileworld::archetype", archetype = name, "spawn.unknown_archetype");
            return None;
        };
        let id = self.instantiate(&table, archetype);
        debug!(target: "tileworld::archetype", archetype = name, entity = %id, "entity.spawned");
        Some(id)
    }

    /// Spawn `name` and place it on its archetype's layer at `pos`.
    pub fn spawn_at(&mut self, name: &str, pos: GridPos) -> Option<EntityId> {
        let id = self.spawn(name)?;
        let layer = self.archetypes.get(name).map(|a| a.layer).unwrap_or(Layer::Object);
        if self.add_entity(pos, layer, id) {
            Some(id)
        } else {
            self.destroy_entity(id);
            None
        }
    }

    fn instantiate(&mut self, table: &ArchetypeTable, archetype: &Archetype) -> EntityId {
        let id = self.ids.next_id();
        let mut entity = Entity::new(id, archetype.name.clone(), archetype.kind.clone())
            .with_capabilities(archetype.capabilities)
            .with_status(archetype.status);
        entity.sprite = archetype.sprite.clone();
        entity.attributes = archetype.attributes.clone();
        entity.ingested_effects = archetype.ingested_effects.clone();
        entity.dialog = archetype.dialog.clone().map(Dialog::new);
        if let (Some(agent), Some(facing)) = (entity.agent.as_mut(), archetype.facing) {
            agent.facing = facing;
        }
        self.store.insert(entity);

        for part_name in &archetype.parts {
            let Some(part) = table.get(part_name) else {
                continue;
            };
            let part_id = self.instantiate(table, part);
            if let Err(err) = self.add_part(part_id, id) {
                warn!(target: "tileworld::archetype", error = %err, "spawn.part_rejected");
            }
        }
        for content_name in &archetype.contents {
            let Some(content) = table.get(content_name) else {
                continue;
            };
            let content_id = self.instantiate(table, content);
            if let Err(err) = self.add_to_container(content_id, id) {
                warn!(target: "tileworld::archetype", error = %err, "spawn.content_rejected");
            }
        }
        id
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::Owner;
    use crate::test_support::test_world;

    #[test]
    fn builtin_table_validates() {
        let table = ArchetypeTable::builtin();
        assert!(table.get("box").is_some());
        let mushroom = table.get("red_mushroom").expect("red mushroom");
        assert_eq!(mushroom.kind, "mushroom");
        assert!(mushroom.capabilities.contains(Capabilities::POISONOUS));
        assert_eq!(table.use_registry().len(), 2);
    }

    #[test]
    fn every_problem_is_reported() {
        let json = r#"{
            "archetypes": {
                "lamp": {"capabilities": ["isShiny"], "parts": ["bulb"]},
                "shelf": {"contents": ["shelf"]},
                "ghost": {"attributes": {"mood": null}},
                "npc": {"dialog": {"root": "nowhere", "nodes": []}}
            },
            "recipes": [{"primary": "lamp", "produces": ["light"]}]
        }"#;
        let Err(ArchetypeError::Invalid(problems)) = ArchetypeTable::from_json_str(json) else {
            panic!("expected validation failure");
        };
        let joined = problems.join("\n");
        assert!(joined.contains("unknown capability 'isShiny'"));
        assert!(joined.contains("unknown component archetype 'bulb'"));
        assert!(joined.contains("declares contents but is not a container"));
        assert!(joined.contains("'shelf' contains itself via shelf -> shelf"));
        assert!(joined.contains("attribute 'mood'"));
        assert!(joined.contains("root node 'nowhere'"));
        assert!(joined.contains("is not isDialogable"));
        assert!(joined.contains("unknown archetype 'light'"));
        assert_eq!(problems.len(), 8);
    }

    #[test]
    fn spawn_wires_parts_and_contents() {
        let mut world = test_world();
        let supplies = world.spawn("supply_box").expect("supply box");
        let entity = world.entity(supplies).expect("entity");
        assert_eq!(entity.kind, "box");
        assert_eq!(entity.contents.len(), 2);
        for item in entity.contents.clone() {
            assert_eq!(world.store().owner(item), Owner::Container(supplies));
        }

        let reactor = world.spawn("reactor").expect("reactor");
        for part in world.entity(reactor).expect("reactor").parts.clone() {
            assert_eq!(world.store().owner(part), Owner::Whole(reactor));
        }
        assert!(world.spawn("unicorn").is_none());
    }

    #[test]
    fn spawn_at_places_on_archetype_layer() {
        let mut world = test_world();
        let guard = world.spawn_at("guard", GridPos::new(1, 1)).expect("guard");
        assert_eq!(world.layer_of(guard), Some(Layer::Agent));
        assert_eq!(world.entity(guard).and_then(Entity::facing), Some(Direction::South));
        assert!(world.spawn_at("apple", GridPos::new(40, 1)).is_none());
    }
}
