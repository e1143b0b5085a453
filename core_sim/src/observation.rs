//! What one agent can see this tick, for renderers and prompt builders.

use serde::Serialize;
use sim_runtime::AttributeValue;
use std::collections::BTreeMap;

use crate::{
    entity::{ActionRecord, EntityId, GridPos},
    grid::EntityQuery,
    World,
};

/// Number of action records carried in an observation.
pub const RECENT_ACTIONS: usize = 5;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ObservedEntity {
    pub id: u64,
    pub name: String,
    pub kind: String,
    pub sprite: Option<String>,
    pub x: i32,
    pub y: i32,
    pub flags: Vec<String>,
    pub attributes: BTreeMap<String, AttributeValue>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DialogView {
    pub partner_id: u64,
    pub partner_name: String,
    pub line: String,
    /// Index in this list is the dialog option number.
    pub options: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Observation {
    pub tick: u64,
    pub agent: ObservedEntity,
    pub facing: String,
    pub inventory: Vec<ObservedEntity>,
    pub facing_tile: Option<GridPos>,
    pub facing_tile_contents: Vec<ObservedEntity>,
    pub viewport_radius: i32,
    pub viewport: Vec<ObservedEntity>,
    pub dialog: Option<DialogView>,
    pub recent_actions: Vec<ActionRecord>,
}

impl Observation {
    /// `None` when `agent` is not a live agent.
    pub fn build(world: &World, agent: EntityId) -> Option<Self> {
        let entity = world.entity(agent)?;
        let state = entity.agent.as_ref()?;
        let here = world.world_position(agent);
        let radius = world.config().observation.viewport_radius.max(0);

        let facing_tile = world.facing_tile(agent).filter(|pos| world.grid().in_bounds(*pos));
        let facing_tile_contents = facing_tile
            .map(|pos| {
                world
                    .interactable_at(agent, pos)
                    .into_iter()
                    .filter_map(|id| observe(world, id))
                    .collect()
            })
            .unwrap_or_default();

        let mut viewport = Vec::new();
        if here.is_placed() {
            for pos in world.grid().positions() {
                if pos.chebyshev(here) > radius {
                    continue;
                }
                for id in world.entities_at(pos, &EntityQuery::top_level()) {
                    if id != agent {
                        viewport.extend(observe(world, id));
                    }
                }
            }
        }

        let dialog = world.dialog_owner(agent).and_then(|npc| {
            let node = world.entity(npc)?.dialog.as_ref()?.current_node()?;
            Some(DialogView {
                partner_id: npc.0,
                partner_name: world.store().display_name(npc),
                line: node.line.clone(),
                options: node.options(),
            })
        });

        Some(Self {
            tick: world.current_tick(),
            agent: observe(world, agent)?,
            facing: state.facing.name().to_string(),
            inventory: world
                .inventory(agent)
                .into_iter()
                .filter_map(|id| observe(world, id))
                .collect(),
            facing_tile,
            facing_tile_contents,
            viewport_radius: radius,
            viewport,
            dialog,
            recent_actions: state.recent(RECENT_ACTIONS).cloned().collect(),
        })
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}

fn observe(world: &World, id: EntityId) -> Option<ObservedEntity> {
    let entity = world.entity(id)?;
    let pos = world.world_position(id);
    Some(ObservedEntity {
        id: id.0,
        name: entity.name.clone(),
        kind: entity.kind.clone(),
        sprite: entity.sprite.clone(),
        x: pos.x,
        y: pos.y,
        flags: entity.flag_names().map(str::to_string).collect(),
        attributes: entity.attributes.clone(),
    })
}
