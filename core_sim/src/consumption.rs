//! Eating and "use A on B".

use sim_runtime::{ActionKind, ActionResult, AttributeValue, ItemSummary};
use tracing::{debug, warn};

use crate::{
    entity::{ActiveEffect, Capabilities, EntityId, IngestedEffect, Layer},
    interpreter::{Guard, ResolvedArgs},
    use_handlers::UseContext,
    World,
};

const POISONED: &str = "isPoisoned";

impl World {
    /// Consume the target and everything inside or attached to it, applying
    /// every ingested effect in the subtree to the eater.
    pub(crate) fn eat(&mut self, agent: EntityId, args: &ResolvedArgs) -> Guard<ActionResult> {
        let target = args.first(ActionKind::Eat)?;
        let name = self.name_of(target);
        if target == agent {
            return Err(ActionResult::rejected("You cannot eat yourself."));
        }
        self.within_reach(agent, target)?;
        let edible = self
            .store
            .get(target)
            .is_some_and(|entity| entity.has(Capabilities::EDIBLE));
        if !edible {
            return Err(ActionResult::rejected(format!("The {name} is not edible.")));
        }
        self.ensure_loose(target)?;

        let subtree = self.store.subtree(target);
        let mut effects: Vec<IngestedEffect> = Vec::new();
        let mut poisoned = false;
        for id in &subtree {
            if let Some(entity) = self.store.get(*id) {
                effects.extend(entity.ingested_effects.iter().cloned());
                poisoned |= entity.has(Capabilities::POISONOUS);
            }
        }
        if poisoned {
            effects.push(IngestedEffect {
                attribute: POISONED.to_string(),
                value: AttributeValue::Bool(true),
                duration_ticks: Some(self.config.interpreter.poison_duration_ticks),
            });
        }
        self.apply_ingested(agent, target, &effects);
        let removed = self.destroy_entity(target);
        debug!(
            target: "tileworld::consumption",
            agent = %agent,
            entity = %target,
            removed = removed.len(),
            effects = effects.len(),
            poisoned,
            "entity.eaten"
        );

        Ok(if poisoned {
            ActionResult::ok(format!("You eat the {name}. You feel very sick.")).high()
        } else {
            ActionResult::ok(format!("You eat the {name}."))
        })
    }

    fn apply_ingested(&mut self, eater: EntityId, source: EntityId, effects: &[IngestedEffect]) {
        let Some(entity) = self.store.get_mut(eater) else {
            return;
        };
        for effect in effects {
            entity
                .attributes
                .insert(effect.attribute.clone(), effect.value.clone());
            if let Some(ticks) = effect.duration_ticks {
                entity.active_effects.push(ActiveEffect {
                    attribute: effect.attribute.clone(),
                    remaining_ticks: ticks,
                    source,
                });
            }
        }
        if !effects.is_empty() {
            self.mark_entity_dirty(eater);
        }
    }

    /// Dispatch to the handler registered for the kinds involved and apply
    /// its outcome. Generated entities land in the user's inventory.
    pub(crate) fn use_item(&mut self, agent: EntityId, args: &ResolvedArgs) -> Guard<ActionResult> {
        let primary = args.first(ActionKind::Use)?;
        let secondary = args.optional_second(ActionKind::Use)?;
        let primary_name = self.name_of(primary);
        self.within_reach(agent, primary)?;
        if let Some(secondary) = secondary {
            self.within_reach(agent, secondary)?;
            if secondary == primary {
                return Err(ActionResult::rejected(format!(
                    "You cannot use the {primary_name} on itself."
                )));
            }
        }
        let Some(tool) = self.store.get(primary) else {
            return Err(ActionResult::rejected(format!("The {primary_name} is gone.")));
        };
        if !tool.has(Capabilities::USABLE) {
            return Err(ActionResult::rejected(format!(
                "The {primary_name} cannot be used."
            )));
        }
        let target = secondary.and_then(|id| self.store.get(id));
        let Some(handler) = self
            .uses
            .lookup(&tool.kind, target.map(|entity| entity.kind.as_str()))
        else {
            return Err(ActionResult::rejected(match target {
                Some(target) => format!(
                    "Nothing happens when you use the {primary_name} on the {}.",
                    target.name
                ),
                None => format!("Nothing happens when you use the {primary_name}."),
            }));
        };

        let outcome = handler.apply(&UseContext {
            world: self,
            agent,
            primary: tool,
            secondary: target,
        });
        if !outcome.success {
            let mut rejection = ActionResult::rejected(outcome.message);
            rejection.importance = outcome.importance;
            return Err(rejection);
        }

        for change in outcome.attribute_changes {
            match change.value {
                Some(value) => {
                    self.set_attribute(change.entity, change.key, value);
                }
                None => {
                    if let Some(entity) = self.store.get_mut(change.entity) {
                        entity.attributes.remove(&change.key);
                    }
                    self.mark_entity_dirty(change.entity);
                }
            }
        }
        for consumed in outcome.consume {
            self.destroy_entity(consumed);
        }
        let mut generated = Vec::new();
        for archetype in &outcome.generate {
            let Some(id) = self.spawn(archetype) else {
                warn!(target: "tileworld::consumption", archetype = %archetype, "use.unknown_product");
                continue;
            };
            if self.add_to_container(id, agent).is_err() {
                let here = self.world_position(agent);
                self.add_entity(here, Layer::Object, id);
            }
            if let Some(entity) = self.store.get(id) {
                generated.push(ItemSummary {
                    id: id.0,
                    name: entity.name.clone(),
                    kind: entity.kind.clone(),
                });
            }
        }

        let mut result = ActionResult::ok(outcome.message).with_generated(generated);
        result.importance = outcome.importance;
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{agent_at, place, test_world};
    use sim_runtime::{ActionCommand, Direction, Importance};

    #[test]
    fn eating_consumes_the_whole_subtree() {
        let mut world = test_world();
        let agent = agent_at(&mut world, 4, 4, Direction::South);
        let apple = place(&mut world, "apple", 4, 5);
        let result = world.execute(agent, &ActionCommand::new(ActionKind::Eat).with_arg1(apple.0));
        assert!(result.success, "{result:?}");
        assert!(world.entity(apple).is_none());
        let eater = world.entity(agent).expect("agent");
        assert_eq!(eater.attribute("isFed"), Some(&AttributeValue::Bool(true)));
        assert_eq!(eater.active_effects.len(), 1);
        assert_eq!(eater.active_effects[0].remaining_ticks, 50);
    }

    #[test]
    fn poison_wears_off_after_its_duration() {
        let mut world = test_world();
        let agent = agent_at(&mut world, 4, 4, Direction::South);
        let cap = place(&mut world, "red_mushroom", 4, 5);
        let result = world.execute(agent, &ActionCommand::new(ActionKind::Eat).with_arg1(cap.0));
        assert!(result.success);
        assert_eq!(result.importance, Importance::High);
        let duration = world.config().interpreter.poison_duration_ticks;
        for _ in 0..duration - 1 {
            world.tick().expect("tick");
        }
        assert!(world.entity(agent).expect("agent").attribute(POISONED).is_some());
        world.tick().expect("tick");
        assert!(world.entity(agent).expect("agent").attribute(POISONED).is_none());
    }

    #[test]
    fn walls_are_not_food() {
        let mut world = test_world();
        let agent = agent_at(&mut world, 4, 4, Direction::South);
        let wall = place(&mut world, "wall", 4, 5);
        let result = world.execute(agent, &ActionCommand::new(ActionKind::Eat).with_arg1(wall.0));
        assert_eq!(result.message, "The wall is not edible.");
        assert!(world.entity(wall).is_some());
    }

    #[test]
    fn mixing_puts_the_product_in_the_inventory() {
        let mut world = test_world();
        let agent = agent_at(&mut world, 4, 4, Direction::South);
        let powder = world.spawn("red_powder").expect("powder");
        let liquid = world.spawn("blue_liquid").expect("liquid");
        world.add_to_container(powder, agent).expect("hold");
        world.add_to_container(liquid, agent).expect("hold");

        let result = world.execute(
            agent,
            &ActionCommand::new(ActionKind::Use)
                .with_arg1(powder.0)
                .with_arg2(liquid.0),
        );
        assert!(result.success, "{result:?}");
        let generated = result.generated_items();
        assert_eq!(generated.len(), 1);
        assert_eq!(generated[0].name, "purple_paste");
        assert!(world.entity(powder).is_none());
        assert!(world.entity(liquid).is_none());
        assert_eq!(world.inventory(agent), vec![EntityId(generated[0].id)]);
    }

    #[test]
    fn thermometer_reads_temperature() {
        let mut world = test_world();
        let agent = agent_at(&mut world, 4, 4, Direction::South);
        let thermometer = world.spawn("thermometer").expect("thermometer");
        world.add_to_container(thermometer, agent).expect("hold");
        let reactor = place(&mut world, "reactor", 4, 5);
        let result = world.execute(
            agent,
            &ActionCommand::new(ActionKind::Use)
                .with_arg1(thermometer.0)
                .with_arg2(reactor.0),
        );
        assert!(result.success, "{result:?}");
        assert_eq!(result.message, "The thermometer reads 350 C for the reactor.");
        assert!(world.entity(thermometer).is_some());
    }
}
