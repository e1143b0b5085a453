//! Pick up, drop, put, open/close, activate/deactivate and read.

use sim_runtime::{ActionKind, ActionResult};

use crate::{
    entity::{Capabilities, EntityId, Layer, Owner, StatusFlags},
    interpreter::{Guard, ResolvedArgs},
    world::OwnershipError,
    World,
};

impl World {
    pub(crate) fn pickup(&mut self, agent: EntityId, args: &ResolvedArgs) -> Guard<ActionResult> {
        let target = args.first(ActionKind::Pickup)?;
        let name = self.name_of(target);
        if target == agent {
            return Err(ActionResult::rejected("You cannot pick yourself up."));
        }
        self.within_reach(agent, target)?;
        self.ensure_loose(target)?;
        if self.inventory(agent).contains(&target) {
            return Err(ActionResult::rejected(format!(
                "You are already holding the {name}."
            )));
        }
        self.add_to_container(target, agent)
            .map_err(|err| ActionResult::rejected(err.to_string()))?;
        Ok(ActionResult::ok(format!("You pick up the {name}.")))
    }

    /// Drop onto the agent's own tile.
    pub(crate) fn drop_item(&mut self, agent: EntityId, args: &ResolvedArgs) -> Guard<ActionResult> {
        let target = args.first(ActionKind::Drop)?;
        let name = self.name_of(target);
        self.ensure_loose(target)?;
        let here = self.world_position(agent);
        if !self.add_entity(here, Layer::Object, target) {
            return Err(ActionResult::rejected(format!(
                "There is nowhere to drop the {name}."
            )));
        }
        Ok(ActionResult::ok(format!("You drop the {name}.")))
    }

    pub(crate) fn put(&mut self, agent: EntityId, args: &ResolvedArgs) -> Guard<ActionResult> {
        let item = args.first(ActionKind::Put)?;
        let container = args.second(ActionKind::Put)?;
        let item_name = self.name_of(item);
        let container_name = self.name_of(container);
        if item == container {
            return Err(ActionResult::rejected(format!(
                "You cannot put the {item_name} inside itself."
            )));
        }
        self.within_reach(agent, container)?;
        self.ensure_loose(item)?;
        let Some(holder) = self.store.get(container) else {
            return Err(ActionResult::rejected(format!(
                "The {container_name} is gone."
            )));
        };
        if !holder.is_container() {
            return Err(ActionResult::rejected(format!(
                "The {container_name} is not a container."
            )));
        }
        if !holder.is_open_container() {
            return Err(ActionResult::rejected(format!(
                "The {container_name} is not open."
            )));
        }
        self.add_to_container(item, container).map_err(|err| match err {
            OwnershipError::Cycle { .. } => ActionResult::rejected(format!(
                "You cannot put the {item_name} inside the {container_name}, it is inside the {item_name}."
            )),
            other => ActionResult::rejected(other.to_string()),
        })?;
        Ok(ActionResult::ok(format!(
            "You put the {item_name} in the {container_name}."
        )))
    }

    pub(crate) fn open(&mut self, agent: EntityId, args: &ResolvedArgs) -> Guard<ActionResult> {
        self.set_open(agent, args, true)
    }

    pub(crate) fn close(&mut self, agent: EntityId, args: &ResolvedArgs) -> Guard<ActionResult> {
        self.set_open(agent, args, false)
    }

    /// Containers and passages keep separate open flags.
    fn set_open(&mut self, agent: EntityId, args: &ResolvedArgs, open: bool) -> Guard<ActionResult> {
        let (action, verb) = if open {
            (ActionKind::Open, "open")
        } else {
            (ActionKind::Close, "close")
        };
        let target = args.first(action)?;
        let name = self.name_of(target);
        self.within_reach(agent, target)?;
        let Some(entity) = self.store.get(target) else {
            return Err(ActionResult::rejected(format!("The {name} is gone.")));
        };
        if !entity.is_openable() {
            return Err(ActionResult::rejected(format!(
                "The {name} cannot be {verb}d."
            )));
        }
        let (flag, currently_open) = if entity.is_container() {
            (StatusFlags::OPEN_CONTAINER, entity.is_open_container())
        } else {
            (StatusFlags::OPEN_PASSAGE, entity.is_open_passage())
        };
        if currently_open == open {
            return Err(ActionResult::rejected(format!(
                "The {name} is already {}.",
                if open { "open" } else { "closed" }
            )));
        }
        if let Some(entity) = self.store.get_mut(target) {
            entity.status.set(flag, open);
        }
        self.mark_entity_dirty(target);
        Ok(ActionResult::ok(format!("You {verb} the {name}.")))
    }

    pub(crate) fn set_activated(
        &mut self,
        agent: EntityId,
        args: &ResolvedArgs,
        on: bool,
    ) -> Guard<ActionResult> {
        let (action, state) = if on {
            (ActionKind::Activate, "activated")
        } else {
            (ActionKind::Deactivate, "deactivated")
        };
        let target = args.first(action)?;
        let name = self.name_of(target);
        self.within_reach(agent, target)?;
        let Some(entity) = self.store.get(target) else {
            return Err(ActionResult::rejected(format!("The {name} is gone.")));
        };
        if !entity.has(Capabilities::ACTIVATABLE) {
            return Err(ActionResult::rejected(format!(
                "The {name} cannot be {state}."
            )));
        }
        if entity.is_activated() == on {
            return Err(ActionResult::rejected(format!(
                "The {name} is already {state}."
            )));
        }
        if let Some(entity) = self.store.get_mut(target) {
            entity.status.set(StatusFlags::ACTIVATED, on);
        }
        self.mark_entity_dirty(target);
        Ok(ActionResult::ok(format!(
            "You {} the {name}.",
            if on { "activate" } else { "deactivate" }
        )))
    }

    pub(crate) fn read(&mut self, agent: EntityId, args: &ResolvedArgs) -> Guard<ActionResult> {
        let target = args.first(ActionKind::Read)?;
        let name = self.name_of(target);
        self.within_reach(agent, target)?;
        let Some(entity) = self.store.get(target) else {
            return Err(ActionResult::rejected(format!("The {name} is gone.")));
        };
        if !entity.has(Capabilities::READABLE) {
            return Err(ActionResult::rejected(format!(
                "There is nothing to read on the {name}."
            )));
        }
        Ok(match entity.attribute("text").and_then(|text| text.as_str()) {
            Some(text) => ActionResult::ok(format!("The {name} reads: \"{text}\"")).high(),
            None => ActionResult::ok(format!("The {name} is blank.")),
        })
    }

    /// Parts stay with their whole; agents are never carried.
    pub(crate) fn ensure_loose(&self, target: EntityId) -> Guard<()> {
        let name = self.name_of(target);
        let Some(entity) = self.store.get(target) else {
            return Err(ActionResult::rejected(format!("The {name} is gone.")));
        };
        if let Owner::Whole(whole) = entity.owner {
            return Err(ActionResult::rejected(format!(
                "The {name} is part of the {} and cannot be removed.",
                self.name_of(whole)
            )));
        }
        if entity.is_agent() || !entity.is_movable() {
            return Err(ActionResult::rejected(format!(
                "The {name} cannot be picked up."
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use crate::entity::{EntityId, GridPos};
    use crate::grid::EntityQuery;
    use crate::test_support::{agent_at, place, test_world};
    use crate::World;
    use sim_runtime::{ActionCommand, ActionKind, ActionResult, Direction, Importance};

    fn act(world: &mut World, agent: EntityId, kind: ActionKind, args: &[u64]) -> ActionResult {
        let mut command = ActionCommand::new(kind);
        if let Some(first) = args.first() {
            command = command.with_arg1(*first);
        }
        if let Some(second) = args.get(1) {
            command = command.with_arg2(*second);
        }
        let result = world.execute(agent, &command);
        world.tick().expect("tick");
        result
    }

    #[test]
    fn put_requires_an_open_container() {
        let mut world = test_world();
        let agent = agent_at(&mut world, 5, 5, Direction::South);
        let chest = place(&mut world, "box", 5, 6);
        let apple = world.spawn("apple").expect("apple");
        world.add_to_container(apple, agent).expect("hold apple");

        let closed = act(&mut world, agent, ActionKind::Put, &[apple.0, chest.0]);
        assert!(!closed.success);
        assert_eq!(closed.message, "The box is not open.");

        assert!(act(&mut world, agent, ActionKind::Open, &[chest.0]).success);
        let stored = act(&mut world, agent, ActionKind::Put, &[apple.0, chest.0]);
        assert!(stored.success, "{stored:?}");
        assert!(world
            .entities_at(GridPos::new(5, 6), &EntityQuery::flattened())
            .contains(&apple));
    }

    #[test]
    fn open_and_close_are_not_idempotent() {
        let mut world = test_world();
        let agent = agent_at(&mut world, 2, 2, Direction::East);
        let door = place(&mut world, "door", 3, 2);
        assert!(act(&mut world, agent, ActionKind::Open, &[door.0]).success);
        let again = act(&mut world, agent, ActionKind::Open, &[door.0]);
        assert_eq!(again.message, "The door is already open.");
        assert!(world.entity(door).expect("door").is_open_passage());
        assert!(act(&mut world, agent, ActionKind::Close, &[door.0]).success);
        assert_eq!(
            act(&mut world, agent, ActionKind::Close, &[door.0]).message,
            "The door is already closed."
        );
    }

    #[test]
    fn activation_guards() {
        let mut world = test_world();
        let agent = agent_at(&mut world, 2, 2, Direction::East);
        let reactor = place(&mut world, "reactor", 3, 2);
        assert!(act(&mut world, agent, ActionKind::Activate, &[reactor.0]).success);
        assert_eq!(
            act(&mut world, agent, ActionKind::Activate, &[reactor.0]).message,
            "The reactor is already activated."
        );
        assert!(act(&mut world, agent, ActionKind::Deactivate, &[reactor.0]).success);
        assert_eq!(
            act(&mut world, agent, ActionKind::Deactivate, &[reactor.0]).message,
            "The reactor is already deactivated."
        );
    }

    #[test]
    fn parts_are_not_removable() {
        let mut world = test_world();
        let agent = agent_at(&mut world, 2, 2, Direction::East);
        let reactor = place(&mut world, "reactor", 3, 2);
        let housing = world.entity(reactor).expect("reactor").parts[0];
        let result = act(&mut world, agent, ActionKind::Pickup, &[housing.0]);
        assert!(!result.success);
        assert!(result.message.contains("part of the reactor"), "{}", result.message);
    }

    #[test]
    fn pickup_then_drop_lands_on_own_tile() {
        let mut world = test_world();
        let agent = agent_at(&mut world, 4, 4, Direction::North);
        let apple = place(&mut world, "apple", 4, 3);
        assert!(act(&mut world, agent, ActionKind::Pickup, &[apple.0]).success);
        assert_eq!(world.world_position(apple), GridPos::new(4, 4));
        assert!(world.inventory(agent).contains(&apple));

        let drop = act(&mut world, agent, ActionKind::Drop, &[apple.0]);
        assert!(drop.success, "{drop:?}");
        assert!(world.inventory(agent).is_empty());
        assert_eq!(world.layer_of(apple), Some(crate::entity::Layer::Object));
        assert_eq!(world.world_position(apple), GridPos::new(4, 4));
    }

    #[test]
    fn reading_is_high_importance() {
        let mut world = test_world();
        let agent = agent_at(&mut world, 4, 4, Direction::North);
        let notebook = place(&mut world, "notebook", 4, 3);
        let result = act(&mut world, agent, ActionKind::Read, &[notebook.0]);
        assert!(result.success);
        assert_eq!(result.importance, Importance::High);
        assert!(result.message.starts_with("The notebook reads: \"Day 3"));
    }
}
