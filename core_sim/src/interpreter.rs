//! Validates and applies one agent command against the world.
//!
//! Every command runs the same outer pipeline: dialog gating, the one
//! action per tick check, argument resolution, the action's own guard chain,
//! then bookkeeping. Guards short-circuit with a rejected [`ActionResult`];
//! nothing here returns an error to the caller.

use sim_runtime::{
    ActionCommand, ActionKind, ActionResult, CommandArg, CommandEnvelope, CommandPayload,
};
use tracing::{debug, warn};

use crate::{
    entity::{ActionRecord, EntityId},
    history::HistoryError,
    World,
};

/// A guard either yields a value or ends the command with a rejection.
pub(crate) type Guard<T> = Result<T, ActionResult>;

/// Where an entity argument may be found.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Scope {
    /// Inventory plus the interactable set of the faced tile.
    Accessible,
    /// Inventory tree only.
    Inventory,
    /// Anything placed somewhere in the world.
    Anywhere,
}

/// Entity arguments after resolution. Failures are kept as messages and
/// only reject the command if the handler needs that argument.
#[derive(Debug, Default)]
pub(crate) struct ResolvedArgs {
    pub arg1: Option<EntityId>,
    pub arg2: Option<EntityId>,
    pub errors: Vec<String>,
    arg2_given: bool,
}

impl ResolvedArgs {
    pub fn first(&self, action: ActionKind) -> Guard<EntityId> {
        self.arg1
            .ok_or_else(|| ActionResult::rejected(format!("{action} needs a target.")))
    }

    pub fn second(&self, action: ActionKind) -> Guard<EntityId> {
        self.arg2
            .ok_or_else(|| ActionResult::rejected(format!("{action} needs a second target.")))
    }

    /// The second argument when it was supplied; a supplied but unresolved
    /// argument still rejects.
    pub fn optional_second(&self, action: ActionKind) -> Guard<Option<EntityId>> {
        if self.arg2_given {
            self.second(action).map(Some)
        } else {
            Ok(None)
        }
    }
}

/// Scopes for `(arg1, arg2)` of actions whose arguments name entities.
fn argument_scopes(action: ActionKind) -> Option<(Scope, Scope)> {
    match action {
        ActionKind::TeleportToObject => Some((Scope::Anywhere, Scope::Anywhere)),
        ActionKind::Drop => Some((Scope::Inventory, Scope::Inventory)),
        ActionKind::Put => Some((Scope::Inventory, Scope::Accessible)),
        ActionKind::Pickup
        | ActionKind::Open
        | ActionKind::Close
        | ActionKind::Activate
        | ActionKind::Deactivate
        | ActionKind::Talk
        | ActionKind::Eat
        | ActionKind::Read
        | ActionKind::Use => Some((Scope::Accessible, Scope::Accessible)),
        _ => None,
    }
}

impl World {
    /// Route an envelope to its agent. `Tick` payloads advance the world and
    /// are the only path that can fail.
    pub fn submit(&mut self, envelope: &CommandEnvelope) -> Result<ActionResult, HistoryError> {
        let agent = envelope.agent.map(EntityId).or(self.default_agent);
        match &envelope.payload {
            CommandPayload::Tick { steps } => {
                for _ in 0..*steps {
                    self.tick()?;
                }
                Ok(ActionResult::ok(format!(
                    "Advanced {} tick(s) to tick {}.",
                    steps, self.tick
                )))
            }
            CommandPayload::Action(command) => Ok(match agent {
                Some(agent) => self.execute(agent, command),
                None => ActionResult::rejected("No agent to act for."),
            }),
            CommandPayload::DialogOption { index } => Ok(match agent {
                Some(agent) => self.choose_dialog_option(agent, *index),
                None => ActionResult::rejected("No agent to act for."),
            }),
        }
    }

    /// Validate and apply one action for `agent`.
    pub fn execute(&mut self, agent: EntityId, command: &ActionCommand) -> ActionResult {
        if !self.store.get(agent).is_some_and(|entity| entity.is_agent()) {
            warn!(target: "tileworld::interpreter", agent = %agent, "execute.not_an_agent");
            return ActionResult::rejected(format!("Entity {agent} is not an agent."));
        }
        let result = self
            .run_guards(agent, command)
            .unwrap_or_else(|rejection| rejection);
        self.finish_action(
            agent,
            command.action.name(),
            command.arg1.clone(),
            command.arg2.clone(),
            !command.action.is_read_only(),
            &result,
        );
        result
    }

    fn run_guards(&mut self, agent: EntityId, command: &ActionCommand) -> Guard<ActionResult> {
        if self.dialog_partner(agent).is_some() {
            return Err(ActionResult::rejected(
                "You are in a conversation. Choose one of the numbered dialog options.",
            ));
        }
        let action = command.action;
        if !action.is_read_only() && self.turns.check(agent).is_err() {
            return Err(ActionResult::rejected("You have already acted this step."));
        }

        let args = match argument_scopes(action) {
            Some((first, second)) => self.resolve_args(agent, command, first, second),
            None => ResolvedArgs::default(),
        };
        let outcome = match action {
            ActionKind::MoveForward => self.move_forward(agent),
            ActionKind::MoveBackward => self.move_backward(agent),
            ActionKind::RotateCw => self.rotate_by(agent, true),
            ActionKind::RotateCcw => self.rotate_by(agent, false),
            ActionKind::MoveDirection => self.move_direction(agent, command.arg1.as_ref()),
            ActionKind::RotateDirection => self.rotate_direction(agent, command.arg1.as_ref()),
            ActionKind::TeleportToLocation => {
                self.teleport_to_location(agent, command.arg1.as_ref())
            }
            ActionKind::TeleportToObject => self.teleport_to_object(agent, &args),
            ActionKind::Pickup => self.pickup(agent, &args),
            ActionKind::Drop => self.drop_item(agent, &args),
            ActionKind::Put => self.put(agent, &args),
            ActionKind::Open => self.open(agent, &args),
            ActionKind::Close => self.close(agent, &args),
            ActionKind::Activate => self.set_activated(agent, &args, true),
            ActionKind::Deactivate => self.set_activated(agent, &args, false),
            ActionKind::Talk => self.talk(agent, &args),
            ActionKind::Eat => self.eat(agent, &args),
            ActionKind::Read => self.read(agent, &args),
            ActionKind::Use => self.use_item(agent, &args),
            ActionKind::DiscoveryFeedGetUpdates => Ok(self.feed_updates(command.arg1.as_ref())),
            ActionKind::DiscoveryFeedGetArticles => Ok(self.feed_articles(command.arg1.as_ref())),
            ActionKind::DiscoveryFeedGetPostById => self.feed_post(command.arg1.as_ref()),
            ActionKind::DiscoveryFeedCreateUpdate => {
                self.feed_create_update(agent, command.arg1.as_ref())
            }
            ActionKind::DiscoveryFeedCreateArticle => {
                self.feed_create_article(agent, command.arg1.as_ref(), command.arg2.as_ref())
            }
        };
        outcome
            .map(|result| result.with_errors(args.errors.clone()))
            .map_err(|result| result.with_errors(args.errors))
    }

    /// History record, metrics and the turn slot for one attempt.
    pub(crate) fn finish_action(
        &mut self,
        agent: EntityId,
        action_type: &str,
        arg1: Option<CommandArg>,
        arg2: Option<CommandArg>,
        uses_turn: bool,
        result: &ActionResult,
    ) {
        let limit = self.config.interpreter.action_history_limit;
        let tick = self.tick;
        if let Some(state) = self.store.get_mut(agent).and_then(|e| e.agent.as_mut()) {
            state.push_record(
                ActionRecord {
                    action_type: action_type.to_string(),
                    arg1,
                    arg2,
                    success: result.success,
                    tick,
                    message: result.message.clone(),
                },
                limit,
            );
        }
        self.metrics.record_action(result.success);
        // Rejected attempts spend the turn too; only read-only queries are free.
        if uses_turn && !self.turns.has_acted(agent) {
            let _ = self.turns.mark_acted(agent);
        }
        debug!(
            target: "tileworld::interpreter",
            tick,
            agent = %agent,
            action = action_type,
            success = result.success,
            message = %result.message,
            "action.applied"
        );
    }

    pub(crate) fn resolve_args(
        &self,
        agent: EntityId,
        command: &ActionCommand,
        first: Scope,
        second: Scope,
    ) -> ResolvedArgs {
        let mut resolved = ResolvedArgs {
            arg2_given: command.arg2.is_some(),
            ..ResolvedArgs::default()
        };
        if let Some(arg) = &command.arg1 {
            match self.resolve(agent, arg, first) {
                Ok(id) => resolved.arg1 = Some(id),
                Err(message) => resolved.errors.push(message),
            }
        }
        if let Some(arg) = &command.arg2 {
            match self.resolve(agent, arg, second) {
                Ok(id) => resolved.arg2 = Some(id),
                Err(message) => resolved.errors.push(message),
            }
        }
        resolved
    }

    /// Resolve an id, or a display name ignoring case, within `scope`.
    fn resolve(&self, agent: EntityId, arg: &CommandArg, scope: Scope) -> Result<EntityId, String> {
        let candidates = match scope {
            Scope::Accessible => self.accessible_from(agent),
            Scope::Inventory => self.inventory_tree(agent),
            Scope::Anywhere => self
                .store
                .iter()
                .filter(|entity| self.world_position(entity.id).is_placed())
                .map(|entity| entity.id)
                .collect(),
        };
        let found = match arg.as_id() {
            Some(id) => candidates.into_iter().find(|candidate| candidate.0 == id),
            None => {
                let name = arg.as_text();
                candidates.into_iter().find(|candidate| {
                    self.store
                        .get(*candidate)
                        .is_some_and(|entity| entity.name.eq_ignore_ascii_case(name.trim()))
                })
            }
        };
        found.ok_or_else(|| match scope {
            Scope::Inventory => format!("You are not holding '{arg}'."),
            Scope::Accessible => format!("There is no '{arg}' within reach."),
            Scope::Anywhere => format!("There is no '{arg}' anywhere in the world."),
        })
    }

    /// Chebyshev distance of at most one between the agent and `target`.
    pub(crate) fn within_reach(&self, agent: EntityId, target: EntityId) -> Guard<()> {
        let here = self.world_position(agent);
        let there = self.world_position(target);
        if here.is_placed() && there.is_placed() && here.chebyshev(there) <= 1 {
            Ok(())
        } else {
            Err(ActionResult::rejected(format!(
                "The {} is too far away.",
                self.store.display_name(target)
            )))
        }
    }

    pub(crate) fn name_of(&self, id: EntityId) -> String {
        self.store.display_name(id)
    }
}
