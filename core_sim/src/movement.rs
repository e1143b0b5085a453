//! Facing, stepping and fast travel for agents.

use sim_runtime::{ActionKind, ActionResult, CommandArg, Direction};
use tracing::debug;

use crate::{
    entity::{EntityId, GridPos, Layer},
    grid::EntityQuery,
    interpreter::{Guard, ResolvedArgs},
    World,
};

impl World {
    pub(crate) fn move_forward(&mut self, agent: EntityId) -> Guard<ActionResult> {
        let facing = self.facing_of(agent);
        let destination = self.checked_destination(agent, facing)?;
        self.step_agent(agent, destination);
        Ok(ActionResult::ok(format!("You move forward, {}.", facing.name())))
    }

    pub(crate) fn move_backward(&mut self, agent: EntityId) -> Guard<ActionResult> {
        let facing = self.facing_of(agent);
        let destination = self.checked_destination(agent, facing.opposite())?;
        self.step_agent(agent, destination);
        Ok(ActionResult::ok(format!(
            "You step backward, {}.",
            facing.opposite().name()
        )))
    }

    pub(crate) fn rotate_by(&mut self, agent: EntityId, clockwise: bool) -> Guard<ActionResult> {
        let facing = self.facing_of(agent);
        let turned = if clockwise {
            facing.rotate_cw()
        } else {
            facing.rotate_ccw()
        };
        self.set_facing(agent, turned);
        Ok(ActionResult::ok(format!("You turn to face {}.", turned.name())))
    }

    /// Face `arg1` and take one step that way. A blocked step leaves the
    /// agent exactly as it was, facing included.
    pub(crate) fn move_direction(
        &mut self,
        agent: EntityId,
        arg: Option<&CommandArg>,
    ) -> Guard<ActionResult> {
        let direction = parse_direction(ActionKind::MoveDirection, arg)?;
        let destination = self.checked_destination(agent, direction)?;
        self.set_facing(agent, direction);
        self.step_agent(agent, destination);
        Ok(ActionResult::ok(format!("You move {}.", direction.name())))
    }

    pub(crate) fn rotate_direction(
        &mut self,
        agent: EntityId,
        arg: Option<&CommandArg>,
    ) -> Guard<ActionResult> {
        let direction = parse_direction(ActionKind::RotateDirection, arg)?;
        self.set_facing(agent, direction);
        Ok(ActionResult::ok(format!("You turn to face {}.", direction.name())))
    }

    /// Land on the named location, or the first free tile around it.
    pub(crate) fn teleport_to_location(
        &mut self,
        agent: EntityId,
        arg: Option<&CommandArg>,
    ) -> Guard<ActionResult> {
        let Some(name) = arg.map(CommandArg::as_text) else {
            return Err(ActionResult::rejected(
                "TELEPORT_TO_LOCATION needs a location name.",
            ));
        };
        let Some(center) = self.location(&name) else {
            let known: Vec<&str> = self.locations.keys().map(String::as_str).collect();
            return Err(ActionResult::rejected(format!(
                "Unknown location '{}'. Known locations: {}.",
                name.trim(),
                if known.is_empty() {
                    "none".to_string()
                } else {
                    known.join(", ")
                }
            )));
        };
        let radius = self.config.interpreter.teleport_search_radius.max(0);
        let landing = (0..=radius)
            .flat_map(|ring| ring_positions(center, ring))
            .find(|pos| self.can_stand(agent, *pos))
            .ok_or_else(|| {
                ActionResult::rejected(format!(
                    "There is no room to arrive at {}.",
                    name.trim()
                ))
            })?;
        self.step_agent(agent, landing);
        Ok(ActionResult::ok(format!("You teleport to {}.", name.trim())))
    }

    /// Land beside the target (north, east, south, west) and face it.
    pub(crate) fn teleport_to_object(
        &mut self,
        agent: EntityId,
        args: &ResolvedArgs,
    ) -> Guard<ActionResult> {
        let target = args.first(ActionKind::TeleportToObject)?;
        let name = self.name_of(target);
        if target == agent {
            return Err(ActionResult::rejected("You are already next to yourself."));
        }
        let target_pos = self.world_position(target);
        let landing = Direction::ALL
            .into_iter()
            .map(|direction| target_pos.step(direction))
            .find(|pos| self.can_stand(agent, *pos))
            .ok_or_else(|| {
                ActionResult::rejected(format!("There is no free space next to the {name}."))
            })?;
        self.step_agent(agent, landing);
        if let Some(direction) = landing.direction_to(target_pos) {
            self.set_facing(agent, direction);
        }
        Ok(ActionResult::ok(format!("You teleport next to the {name}.")))
    }

    pub(crate) fn facing_of(&self, agent: EntityId) -> Direction {
        self.store
            .get(agent)
            .and_then(|entity| entity.facing())
            .unwrap_or(Direction::South)
    }

    pub(crate) fn set_facing(&mut self, agent: EntityId, direction: Direction) {
        if let Some(state) = self.store.get_mut(agent).and_then(|e| e.agent.as_mut()) {
            state.facing = direction;
        }
        self.mark_entity_dirty(agent);
    }

    /// The neighbouring tile toward `direction`, if the agent may step there.
    fn checked_destination(&self, agent: EntityId, direction: Direction) -> Guard<GridPos> {
        let destination = self.world_position(agent).step(direction);
        match self.is_passable(destination) {
            (true, _) => Ok(destination),
            (false, Some(blocker)) => Err(ActionResult::rejected(format!(
                "The way {} is blocked by the {}.",
                direction.name(),
                self.name_of(blocker)
            ))),
            (false, None) => Err(ActionResult::rejected(
                "You cannot move past the edge of the world.",
            )),
        }
    }

    fn step_agent(&mut self, agent: EntityId, destination: GridPos) {
        let from = self.world_position(agent);
        self.add_entity(destination, Layer::Agent, agent);
        debug!(
            target: "tileworld::movement",
            agent = %agent,
            from = %from,
            to = %destination,
            "agent.moved"
        );
    }

    /// In bounds, and nothing but `agent` itself blocks the tile.
    fn can_stand(&self, agent: EntityId, pos: GridPos) -> bool {
        if !self.grid.in_bounds(pos) {
            return false;
        }
        let query = EntityQuery {
            include_parts: true,
            ..EntityQuery::default()
        };
        self.entities_at(pos, &query).into_iter().all(|id| {
            id == agent || self.store.get(id).map_or(true, |entity| entity.is_passable())
        })
    }
}

fn parse_direction(action: ActionKind, arg: Option<&CommandArg>) -> Guard<Direction> {
    let Some(arg) = arg else {
        return Err(ActionResult::rejected(format!(
            "{action} needs a direction (north, east, south or west)."
        )));
    };
    Direction::parse(&arg.as_text()).ok_or_else(|| {
        ActionResult::rejected(format!(
            "'{arg}' is not a direction. Use north, east, south or west."
        ))
    })
}

/// Tiles at exactly Chebyshev distance `ring` from `center`, row by row.
fn ring_positions(center: GridPos, ring: i32) -> Vec<GridPos> {
    let mut out = Vec::new();
    for dy in -ring..=ring {
        for dx in -ring..=ring {
            if dx.abs().max(dy.abs()) == ring {
                out.push(GridPos::new(center.x + dx, center.y + dy));
            }
        }
    }
    out
}
