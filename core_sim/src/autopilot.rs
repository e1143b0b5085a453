//! NPC autopilot: a priority-ordered queue of behavior primitives, one
//! incremental step per tick for the head action only.

use rand::{rngs::SmallRng, Rng, SeedableRng};
use sim_runtime::Direction;
use tracing::debug;

use crate::{
    entity::{ActionRecord, EntityId, GridPos, Layer, StatusFlags},
    grid::EntityQuery,
    hashing::stable_seed,
    pathfinder::{next_step, PathGoal},
    World,
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AutopilotAction {
    Goto { target: GridPos },
    Pickup { item: EntityId },
    PlaceInContainer { item: EntityId, container: EntityId },
    Wander { steps: u32 },
    Wait { ticks: u32 },
}

impl AutopilotAction {
    pub fn name(&self) -> &'static str {
        match self {
            AutopilotAction::Goto { .. } => "AUTOPILOT_GOTO",
            AutopilotAction::Pickup { .. } => "AUTOPILOT_PICKUP",
            AutopilotAction::PlaceInContainer { .. } => "AUTOPILOT_PLACE_IN_CONTAINER",
            AutopilotAction::Wander { .. } => "AUTOPILOT_WANDER",
            AutopilotAction::Wait { .. } => "AUTOPILOT_WAIT",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActionStatus {
    InProgress,
    Completed,
    Failed,
    Invalid,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueuedAction {
    pub action: AutopilotAction,
    pub priority: i32,
    seq: u64,
    /// Consecutive steps spent waiting on an agent in the way.
    blocked_ticks: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct PendingClose {
    passage: EntityId,
    entered: bool,
}

/// Ordered by priority (highest first), then insertion order.
#[derive(Debug, Clone, Default)]
pub struct AutopilotQueue {
    entries: Vec<QueuedAction>,
    next_seq: u64,
    pending_close: Option<PendingClose>,
}

impl AutopilotQueue {
    pub fn push(&mut self, action: AutopilotAction, priority: i32) {
        let seq = self.next_seq;
        self.next_seq += 1;
        let index = self
            .entries
            .iter()
            .position(|entry| entry.priority < priority)
            .unwrap_or(self.entries.len());
        self.entries.insert(
            index,
            QueuedAction {
                action,
                priority,
                seq,
                blocked_ticks: 0,
            },
        );
    }

    pub fn head(&self) -> Option<&QueuedAction> {
        self.entries.first()
    }

    pub fn pop_head(&mut self) -> Option<QueuedAction> {
        (!self.entries.is_empty()).then(|| self.entries.remove(0))
    }

    /// Count one more blocked step on the head action and return the total.
    fn note_blocked(&mut self) -> u32 {
        match self.entries.first_mut() {
            Some(head) => {
                head.blocked_ticks += 1;
                head.blocked_ticks
            }
            None => 0,
        }
    }

    fn clear_blocked(&mut self) {
        if let Some(head) = self.entries.first_mut() {
            head.blocked_ticks = 0;
        }
    }

    fn replace_head(&mut self, action: AutopilotAction) {
        if let Some(head) = self.entries.first_mut() {
            head.action = action;
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = &QueuedAction> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    fn has_work(&self) -> bool {
        !self.entries.is_empty() || self.pending_close.is_some()
    }
}

impl World {
    pub fn queue_autopilot(&mut self, npc: EntityId, action: AutopilotAction, priority: i32) -> bool {
        match self.store.get_mut(npc).and_then(|entity| entity.agent.as_mut()) {
            Some(agent) => {
                agent.autopilot.push(action, priority);
                true
            }
            None => false,
        }
    }

    /// Step every idle, internally driven agent once, in id order.
    pub(crate) fn run_autopilots(&mut self) -> usize {
        let ready: Vec<EntityId> = self
            .store
            .iter()
            .filter(|entity| {
                entity.agent.as_ref().is_some_and(|agent| {
                    !agent.external && agent.in_dialog_with.is_none() && agent.autopilot.has_work()
                })
            })
            .filter(|entity| entity.dialog.as_ref().and_then(|d| d.partner()).is_none())
            .map(|entity| entity.id)
            .collect();
        let mut stepped = 0;
        for npc in ready {
            if self.step_autopilot(npc).is_some() {
                stepped += 1;
            }
        }
        stepped
    }

    /// Run one step of `npc`'s head action. Non-`InProgress` results pop it.
    pub fn step_autopilot(&mut self, npc: EntityId) -> Option<ActionStatus> {
        let head = self
            .store
            .get(npc)
            .and_then(|entity| entity.agent.as_ref())
            .and_then(|agent| agent.autopilot.head().cloned());

        let status = head.as_ref().map(|queued| {
            let (status, next) = self.execute_autopilot(npc, &queued.action);
            if let (ActionStatus::InProgress, Some(next)) = (status, next) {
                if let Some(agent) = self.store.get_mut(npc).and_then(|e| e.agent.as_mut()) {
                    agent.autopilot.replace_head(next);
                }
            }
            status
        });

        self.close_passage_behind(npc);

        if let (Some(queued), Some(status)) = (head, status) {
            if status != ActionStatus::InProgress {
                let limit = self.config.interpreter.action_history_limit;
                let tick = self.tick;
                if let Some(agent) = self.store.get_mut(npc).and_then(|e| e.agent.as_mut()) {
                    agent.autopilot.pop_head();
                    agent.push_record(
                        ActionRecord {
                            action_type: queued.action.name().to_string(),
                            arg1: None,
                            arg2: None,
                            success: status == ActionStatus::Completed,
                            tick,
                            message: format!("{status:?}"),
                        },
                        limit,
                    );
                }
                debug!(
                    target: "tileworld::autopilot",
                    npc = %npc,
                    action = queued.action.name(),
                    status = ?status,
                    "autopilot.finished"
                );
            }
        }
        status
    }

    fn execute_autopilot(
        &mut self,
        npc: EntityId,
        action: &AutopilotAction,
    ) -> (ActionStatus, Option<AutopilotAction>) {
        match action {
            AutopilotAction::Goto { target } => (self.autopilot_goto(npc, *target), None),
            AutopilotAction::Pickup { item } => (self.autopilot_pickup(npc, *item), None),
            AutopilotAction::PlaceInContainer { item, container } => {
                (self.autopilot_place(npc, *item, *container), None)
            }
            AutopilotAction::Wander { steps } => {
                if *steps == 0 {
                    return (ActionStatus::Completed, None);
                }
                self.wander_step(npc);
                if *steps <= 1 {
                    (ActionStatus::Completed, None)
                } else {
                    (
                        ActionStatus::InProgress,
                        Some(AutopilotAction::Wander { steps: steps - 1 }),
                    )
                }
            }
            AutopilotAction::Wait { ticks } => {
                if *ticks <= 1 {
                    (ActionStatus::Completed, None)
                } else {
                    (
                        ActionStatus::InProgress,
                        Some(AutopilotAction::Wait { ticks: ticks - 1 }),
                    )
                }
            }
        }
    }

    fn autopilot_goto(&mut self, npc: EntityId, target: GridPos) -> ActionStatus {
        if !self.grid.in_bounds(target) {
            return ActionStatus::Invalid;
        }
        if self.world_position(npc) == target {
            return ActionStatus::Completed;
        }
        let status = self.step_toward(npc, PathGoal::Tile(target));
        if status == ActionStatus::InProgress && self.world_position(npc) == target {
            ActionStatus::Completed
        } else {
            status
        }
    }

    fn autopilot_pickup(&mut self, npc: EntityId, item: EntityId) -> ActionStatus {
        let Some(entity) = self.store.get(item) else {
            return ActionStatus::Invalid;
        };
        if !entity.is_movable() || entity.is_agent() {
            return ActionStatus::Invalid;
        }
        if self.store.is_descendant(item, npc) {
            return ActionStatus::Completed;
        }
        if self.store.holder_agent(item).is_some() {
            return ActionStatus::Failed;
        }
        let item_pos = self.world_position(item);
        if !item_pos.is_placed() {
            return ActionStatus::Failed;
        }
        match self.reach(npc, item_pos) {
            Reach::Within => {
                let reachable = self
                    .entities_at(item_pos, &EntityQuery::flattened().respecting_container_status())
                    .contains(&item);
                if reachable && self.add_to_container(item, npc).is_ok() {
                    ActionStatus::Completed
                } else {
                    ActionStatus::Failed
                }
            }
            Reach::Turned => ActionStatus::InProgress,
            Reach::Away => self.step_toward(npc, PathGoal::Adjacent(item_pos)),
        }
    }

    fn autopilot_place(&mut self, npc: EntityId, item: EntityId, container: EntityId) -> ActionStatus {
        let (Some(_), Some(holder)) = (self.store.get(item), self.store.get(container)) else {
            return ActionStatus::Invalid;
        };
        if !holder.is_container() {
            return ActionStatus::Invalid;
        }
        if !self.store.is_descendant(item, npc) {
            return ActionStatus::Failed;
        }
        let container_pos = self.world_position(container);
        if !container_pos.is_placed() {
            return ActionStatus::Failed;
        }
        match self.reach(npc, container_pos) {
            Reach::Within => {
                let closed = self
                    .store
                    .get(container)
                    .is_some_and(|holder| !holder.is_open_container());
                if closed {
                    if let Some(holder) = self.store.get_mut(container) {
                        holder.status.insert(StatusFlags::OPEN_CONTAINER);
                    }
                    self.mark_dirty(container_pos);
                    return ActionStatus::InProgress;
                }
                match self.add_to_container(item, container) {
                    Ok(()) => ActionStatus::Completed,
                    Err(_) => ActionStatus::Failed,
                }
            }
            Reach::Turned => ActionStatus::InProgress,
            Reach::Away => self.step_toward(npc, PathGoal::Adjacent(container_pos)),
        }
    }

    /// Whether `npc` can act on `pos` now, turned toward it this step, or
    /// still has to walk.
    fn reach(&mut self, npc: EntityId, pos: GridPos) -> Reach {
        let here = self.world_position(npc);
        if here == pos {
            return Reach::Within;
        }
        let Some(direction) = here.direction_to(pos) else {
            return Reach::Away;
        };
        if self.face(npc, direction) {
            Reach::Turned
        } else {
            Reach::Within
        }
    }

    /// Turn `npc` toward `direction`; true when that took the step.
    fn face(&mut self, npc: EntityId, direction: Direction) -> bool {
        let Some(agent) = self.store.get_mut(npc).and_then(|e| e.agent.as_mut()) else {
            return false;
        };
        if agent.facing == direction {
            return false;
        }
        agent.facing = direction;
        self.mark_entity_dirty(npc);
        true
    }

    fn step_toward(&mut self, npc: EntityId, goal: PathGoal) -> ActionStatus {
        let here = self.world_position(npc);
        let grid = self.cost_grid_for(Some(npc));
        match next_step(&grid, here, goal) {
            Some(next) => self.advance_to(npc, next),
            None => ActionStatus::Failed,
        }
    }

    /// Rotate toward `next`, or, already facing it, open what blocks it or step.
    fn advance_to(&mut self, npc: EntityId, next: GridPos) -> ActionStatus {
        let here = self.world_position(npc);
        let Some(direction) = here.direction_to(next) else {
            return ActionStatus::Failed;
        };
        if self.face(npc, direction) {
            return ActionStatus::InProgress;
        }
        let (passable, blocker) = self.is_passable(next);
        if passable {
            self.add_entity(next, Layer::Agent, npc);
            if let Some(agent) = self.store.get_mut(npc).and_then(|e| e.agent.as_mut()) {
                agent.autopilot.clear_blocked();
            }
            return ActionStatus::InProgress;
        }
        let Some(blocker) = blocker.and_then(|id| self.store.get(id)) else {
            return ActionStatus::Failed;
        };
        if blocker.is_agent() {
            let blocker_id = blocker.id;
            let limit = self.config.pathfinding.max_blocked_ticks;
            let waited = self
                .store
                .get_mut(npc)
                .and_then(|e| e.agent.as_mut())
                .map(|agent| agent.autopilot.note_blocked())
                .unwrap_or_default();
            if waited > limit {
                debug!(
                    target: "tileworld::autopilot",
                    npc = %npc,
                    blocker = %blocker_id,
                    waited,
                    "autopilot.gave_up"
                );
                return ActionStatus::Failed;
            }
            return ActionStatus::InProgress;
        }
        if blocker.is_passage() && !blocker.is_open_passage() {
            let passage = blocker.id;
            if let Some(door) = self.store.get_mut(passage) {
                door.status.insert(StatusFlags::OPEN_PASSAGE);
            }
            self.mark_dirty(next);
            if let Some(agent) = self.store.get_mut(npc).and_then(|e| e.agent.as_mut()) {
                agent.autopilot.pending_close = Some(PendingClose {
                    passage,
                    entered: false,
                });
            }
            debug!(target: "tileworld::autopilot", npc = %npc, passage = %passage, "autopilot.opened_passage");
            return ActionStatus::InProgress;
        }
        ActionStatus::Failed
    }

    fn wander_step(&mut self, npc: EntityId) {
        let here = self.world_position(npc);
        let mut rng = SmallRng::seed_from_u64(stable_seed(self.config.seed, "wander", npc.0 ^ self.tick));
        let options: Vec<Direction> = Direction::ALL
            .into_iter()
            .filter(|direction| self.is_passable(here.step(*direction)).0)
            .collect();
        if options.is_empty() {
            return;
        }
        let direction = options[rng.gen_range(0..options.len())];
        if let Some(agent) = self.store.get_mut(npc).and_then(|e| e.agent.as_mut()) {
            agent.facing = direction;
        }
        self.add_entity(here.step(direction), Layer::Agent, npc);
    }

    /// Close a passage this NPC opened once it has walked through and off it.
    fn close_passage_behind(&mut self, npc: EntityId) {
        let Some(pending) = self
            .store
            .get(npc)
            .and_then(|entity| entity.agent.as_ref())
            .and_then(|agent| agent.autopilot.pending_close)
        else {
            return;
        };
        let here = self.world_position(npc);
        let passage_pos = self.world_position(pending.passage);
        let update = if !self.store.contains(pending.passage) {
            None
        } else if here == passage_pos {
            Some(PendingClose {
                entered: true,
                ..pending
            })
        } else if pending.entered {
            let occupied = self
                .entities_at(passage_pos, &EntityQuery::top_level())
                .iter()
                .any(|id| self.store.get(*id).is_some_and(|e| e.is_agent()));
            if occupied {
                Some(pending)
            } else {
                if let Some(door) = self.store.get_mut(pending.passage) {
                    door.status.remove(StatusFlags::OPEN_PASSAGE);
                }
                self.mark_dirty(passage_pos);
                debug!(target: "tileworld::autopilot", npc = %npc, passage = %pending.passage, "autopilot.closed_passage");
                None
            }
        } else {
            Some(pending)
        };
        if let Some(agent) = self.store.get_mut(npc).and_then(|e| e.agent.as_mut()) {
            agent.autopilot.pending_close = update;
        }
    }
}

enum Reach {
    Within,
    Turned,
    Away,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{npc_at, place, test_world};

    #[test]
    fn queue_orders_by_priority_then_fifo() {
        let mut queue = AutopilotQueue::default();
        queue.push(AutopilotAction::Wait { ticks: 1 }, 0);
        queue.push(AutopilotAction::Wander { steps: 1 }, 5);
        queue.push(AutopilotAction::Wait { ticks: 2 }, 0);
        queue.push(AutopilotAction::Goto { target: GridPos::new(1, 1) }, 5);
        let order: Vec<_> = queue.iter().map(|entry| entry.action.clone()).collect();
        assert_eq!(
            order,
            vec![
                AutopilotAction::Wander { steps: 1 },
                AutopilotAction::Goto { target: GridPos::new(1, 1) },
                AutopilotAction::Wait { ticks: 1 },
                AutopilotAction::Wait { ticks: 2 },
            ]
        );
        assert_eq!(queue.pop_head().map(|entry| entry.priority), Some(5));
        assert_eq!(queue.len(), 3);
    }

    #[test]
    fn goto_rotates_before_moving() {
        let mut world = test_world();
        let npc = npc_at(&mut world, 1, 1, Direction::North);
        world.queue_autopilot(npc, AutopilotAction::Goto { target: GridPos::new(3, 1) }, 0);

        assert_eq!(world.step_autopilot(npc), Some(ActionStatus::InProgress));
        assert_eq!(world.world_position(npc), GridPos::new(1, 1));
        assert_eq!(world.entity(npc).and_then(|e| e.facing()), Some(Direction::East));

        assert_eq!(world.step_autopilot(npc), Some(ActionStatus::InProgress));
        assert_eq!(world.world_position(npc), GridPos::new(2, 1));
        assert_eq!(world.step_autopilot(npc), Some(ActionStatus::Completed));
        assert_eq!(world.world_position(npc), GridPos::new(3, 1));
        assert_eq!(world.step_autopilot(npc), None);

        let history = &world.entity(npc).and_then(|e| e.agent.as_ref()).expect("agent").history;
        assert_eq!(history.back().map(|r| r.action_type.as_str()), Some("AUTOPILOT_GOTO"));
    }

    #[test]
    fn opens_door_and_closes_it_behind() {
        let mut world = test_world();
        for y in 0..10 {
            if y != 2 {
                place(&mut world, "wall", 3, y);
            }
        }
        let door = place(&mut world, "door", 3, 2);
        let npc = npc_at(&mut world, 2, 2, Direction::East);
        world.queue_autopilot(npc, AutopilotAction::Goto { target: GridPos::new(5, 2) }, 0);

        world.step_autopilot(npc);
        assert!(world.entity(door).expect("door").is_open_passage());
        assert_eq!(world.world_position(npc), GridPos::new(2, 2));

        world.step_autopilot(npc);
        assert_eq!(world.world_position(npc), GridPos::new(3, 2));
        assert!(world.entity(door).expect("door").is_open_passage());

        world.step_autopilot(npc);
        assert_eq!(world.world_position(npc), GridPos::new(4, 2));
        assert!(!world.entity(door).expect("door").is_open_passage());

        assert_eq!(world.step_autopilot(npc), Some(ActionStatus::Completed));
    }

    #[test]
    fn an_agent_parked_on_the_goal_fails_the_goto_after_waiting() {
        let mut world = test_world();
        let npc = npc_at(&mut world, 1, 1, Direction::East);
        npc_at(&mut world, 3, 1, Direction::North);
        world.queue_autopilot(npc, AutopilotAction::Goto { target: GridPos::new(3, 1) }, 0);
        world.queue_autopilot(npc, AutopilotAction::Wait { ticks: 1 }, 0);

        let limit = world.config().pathfinding.max_blocked_ticks;
        let mut statuses = Vec::new();
        for _ in 0..limit + 2 {
            statuses.push(world.step_autopilot(npc));
        }
        assert_eq!(world.world_position(npc), GridPos::new(2, 1));
        assert_eq!(statuses.last(), Some(&Some(ActionStatus::Failed)));
        assert!(statuses[..statuses.len() - 1]
            .iter()
            .all(|status| *status == Some(ActionStatus::InProgress)));

        let queue = &world.entity(npc).and_then(|e| e.agent.as_ref()).expect("npc").autopilot;
        assert_eq!(queue.len(), 1);
        assert_eq!(
            queue.head().map(|entry| entry.action.clone()),
            Some(AutopilotAction::Wait { ticks: 1 })
        );
    }

    #[test]
    fn pickup_walks_over_and_collects() {
        let mut world = test_world();
        let npc = npc_at(&mut world, 0, 0, Direction::South);
        let apple = place(&mut world, "apple", 0, 3);
        world.queue_autopilot(npc, AutopilotAction::Pickup { item: apple }, 0);
        let mut last = None;
        for _ in 0..6 {
            last = world.step_autopilot(npc);
            if last != Some(ActionStatus::InProgress) {
                break;
            }
        }
        assert_eq!(last, Some(ActionStatus::Completed));
        assert!(world.store().is_descendant(apple, npc));
    }

    #[test]
    fn invalid_targets_pop_immediately() {
        let mut world = test_world();
        let npc = npc_at(&mut world, 0, 0, Direction::South);
        world.queue_autopilot(npc, AutopilotAction::Pickup { item: EntityId(12345) }, 0);
        world.queue_autopilot(npc, AutopilotAction::Goto { target: GridPos::new(50, 50) }, 0);
        assert_eq!(world.step_autopilot(npc), Some(ActionStatus::Invalid));
        assert_eq!(world.step_autopilot(npc), Some(ActionStatus::Invalid));
        assert_eq!(world.step_autopilot(npc), None);
    }

    #[test]
    fn wander_is_seeded() {
        let run = || {
            let mut world = test_world();
            let npc = npc_at(&mut world, 5, 5, Direction::South);
            world.queue_autopilot(npc, AutopilotAction::Wander { steps: 4 }, 0);
            let mut trail = Vec::new();
            for _ in 0..4 {
                world.tick().expect("tick");
                trail.push(world.world_position(npc));
            }
            trail
        };
        assert_eq!(run(), run());
    }
}
