//! Per-NPC conversation graphs and the world-level dialog protocol.
//!
//! Both participants carry a pointer to the other while engaged. Every way a
//! dialog can end goes through [`World::end_dialog`], which clears both.

use std::sync::Arc;

use serde::Deserialize;
use sim_runtime::AttributeValue;
use thiserror::Error;
use tracing::debug;

use crate::{entity::EntityId, World};

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct DialogEdge {
    /// Exact reply text the partner must send.
    pub reply: String,
    pub to: String,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct DialogNode {
    pub id: String,
    pub line: String,
    #[serde(default)]
    pub set_flags: Vec<String>,
    #[serde(default)]
    pub clear_flags: Vec<String>,
    #[serde(default)]
    pub replies: Vec<DialogEdge>,
}

impl DialogNode {
    pub fn is_terminal(&self) -> bool {
        self.replies.is_empty()
    }

    pub fn options(&self) -> Vec<String> {
        self.replies.iter().map(|edge| edge.reply.clone()).collect()
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct DialogGraph {
    pub root: String,
    pub nodes: Vec<DialogNode>,
}

impl DialogGraph {
    pub fn node(&self, id: &str) -> Option<&DialogNode> {
        self.nodes.iter().find(|node| node.id == id)
    }

    /// Every structural problem: missing root, duplicate ids, dangling edges.
    pub fn problems(&self) -> Vec<String> {
        let mut problems = Vec::new();
        if self.node(&self.root).is_none() {
            problems.push(format!("root node '{}' is not defined", self.root));
        }
        for (index, node) in self.nodes.iter().enumerate() {
            if self.nodes[..index].iter().any(|other| other.id == node.id) {
                problems.push(format!("node '{}' is defined more than once", node.id));
            }
            for edge in &node.replies {
                if self.node(&edge.to).is_none() {
                    problems.push(format!(
                        "node '{}' reply '{}' leads to unknown node '{}'",
                        node.id, edge.reply, edge.to
                    ));
                }
            }
        }
        problems
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DialogState {
    Idle,
    Engaged { partner: EntityId, node: String },
}

/// What entering a node did: the line to show, the flags it touched and
/// whether the conversation is over.
#[derive(Debug, Clone, PartialEq)]
pub struct Transition {
    pub line: String,
    pub options: Vec<String>,
    pub set_flags: Vec<String>,
    pub clear_flags: Vec<String>,
    pub ended: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DialogError {
    #[error("not engaged in a dialog")]
    NotEngaged,
    #[error("dialog is engaged with {expected}, not {got}")]
    WrongPartner { expected: EntityId, got: EntityId },
    #[error("'{0}' is not a valid reply here")]
    UnknownReply(String),
    #[error("dialog graph has no node '{0}'")]
    MissingNode(String),
    #[error("{0} has nothing to say")]
    NoDialog(EntityId),
}

/// Conversation state machine owned by a dialogable entity.
#[derive(Debug, Clone)]
pub struct Dialog {
    graph: Arc<DialogGraph>,
    state: DialogState,
}

impl Dialog {
    pub fn new(graph: Arc<DialogGraph>) -> Self {
        Self {
            graph,
            state: DialogState::Idle,
        }
    }

    pub fn state(&self) -> &DialogState {
        &self.state
    }

    pub fn partner(&self) -> Option<EntityId> {
        match &self.state {
            DialogState::Engaged { partner, .. } => Some(*partner),
            DialogState::Idle => None,
        }
    }

    pub fn current_node(&self) -> Option<&DialogNode> {
        match &self.state {
            DialogState::Engaged { node, .. } => self.graph.node(node),
            DialogState::Idle => None,
        }
    }

    /// Reset to the root node and engage `partner`.
    pub fn initiate(&mut self, partner: EntityId) -> Result<Transition, DialogError> {
        let root = self.graph.root.clone();
        self.enter(partner, &root)
    }

    pub fn say(&mut self, partner: EntityId, text: &str) -> Result<Transition, DialogError> {
        let DialogState::Engaged {
            partner: expected,
            node,
        } = &self.state
        else {
            return Err(DialogError::NotEngaged);
        };
        if *expected != partner {
            return Err(DialogError::WrongPartner {
                expected: *expected,
                got: partner,
            });
        }
        let current = self
            .graph
            .node(node)
            .ok_or_else(|| DialogError::MissingNode(node.clone()))?;
        let destination = current
            .replies
            .iter()
            .find(|edge| edge.reply == text)
            .map(|edge| edge.to.clone())
            .ok_or_else(|| DialogError::UnknownReply(text.to_string()))?;
        self.enter(partner, &destination)
    }

    pub fn end(&mut self) {
        self.state = DialogState::Idle;
    }

    fn enter(&mut self, partner: EntityId, node_id: &str) -> Result<Transition, DialogError> {
        let graph = Arc::clone(&self.graph);
        let node = graph
            .node(node_id)
            .ok_or_else(|| DialogError::MissingNode(node_id.to_string()))?;
        let ended = node.is_terminal();
        self.state = if ended {
            DialogState::Idle
        } else {
            DialogState::Engaged {
                partner,
                node: node.id.clone(),
            }
        };
        Ok(Transition {
            line: node.line.clone(),
            options: node.options(),
            set_flags: node.set_flags.clone(),
            clear_flags: node.clear_flags.clone(),
            ended,
        })
    }
}

impl World {
    /// Engage `npc` in conversation with `initiator`.
    pub fn initiate_dialog(
        &mut self,
        initiator: EntityId,
        npc: EntityId,
    ) -> Result<Transition, DialogError> {
        let dialog = self
            .store
            .get_mut(npc)
            .and_then(|entity| entity.dialog.as_mut())
            .ok_or(DialogError::NoDialog(npc))?;
        if let Some(current) = dialog.partner() {
            if current != initiator {
                return Err(DialogError::WrongPartner {
                    expected: current,
                    got: initiator,
                });
            }
        }
        let transition = dialog.initiate(initiator)?;
        self.apply_dialog_flags(npc, &transition);
        if transition.ended {
            self.clear_dialog_state([npc, initiator]);
        } else {
            self.set_dialog_pointer(initiator, Some(npc));
            self.set_dialog_pointer(npc, Some(initiator));
        }
        debug!(
            target: "tileworld::dialog",
            initiator = %initiator,
            npc = %npc,
            ended = transition.ended,
            "dialog.initiated"
        );
        Ok(transition)
    }

    /// Send reply `text` from `speaker` to whoever it is engaged with.
    pub fn say_in_dialog(
        &mut self,
        speaker: EntityId,
        npc: EntityId,
        text: &str,
    ) -> Result<Transition, DialogError> {
        let dialog = self
            .store
            .get_mut(npc)
            .and_then(|entity| entity.dialog.as_mut())
            .ok_or(DialogError::NoDialog(npc))?;
        let transition = dialog.say(speaker, text)?;
        self.apply_dialog_flags(npc, &transition);
        if transition.ended {
            self.clear_dialog_state([npc, speaker]);
        }
        Ok(transition)
    }

    /// End whatever dialog `participant` is part of, on both sides.
    pub fn end_dialog(&mut self, participant: EntityId) {
        let partner = self.dialog_partner(participant).unwrap_or(participant);
        self.clear_dialog_state([participant, partner]);
        debug!(target: "tileworld::dialog", participant = %participant, "dialog.ended");
    }

    fn clear_dialog_state(&mut self, participants: [EntityId; 2]) {
        for id in participants {
            if let Some(entity) = self.store.get_mut(id) {
                if let Some(dialog) = entity.dialog.as_mut() {
                    dialog.end();
                }
                if let Some(agent) = entity.agent.as_mut() {
                    agent.in_dialog_with = None;
                }
            }
        }
    }

    /// The other side of an engaged dialog, from either participant's view.
    pub fn dialog_partner(&self, id: EntityId) -> Option<EntityId> {
        let entity = self.store.get(id)?;
        entity
            .agent
            .as_ref()
            .and_then(|agent| agent.in_dialog_with)
            .or_else(|| entity.dialog.as_ref().and_then(Dialog::partner))
    }

    /// The dialog-owning side of `participant`'s conversation.
    pub fn dialog_owner(&self, participant: EntityId) -> Option<EntityId> {
        let entity = self.store.get(participant)?;
        if entity
            .dialog
            .as_ref()
            .is_some_and(|dialog| dialog.partner().is_some())
        {
            return Some(participant);
        }
        let partner = self.dialog_partner(participant)?;
        self.store
            .get(partner)?
            .dialog
            .as_ref()
            .filter(|dialog| dialog.partner() == Some(participant))
            .map(|_| partner)
    }

    fn set_dialog_pointer(&mut self, id: EntityId, partner: Option<EntityId>) {
        if let Some(agent) = self.store.get_mut(id).and_then(|entity| entity.agent.as_mut()) {
            agent.in_dialog_with = partner;
        }
    }

    fn apply_dialog_flags(&mut self, npc: EntityId, transition: &Transition) {
        let Some(entity) = self.store.get_mut(npc) else {
            return;
        };
        for flag in &transition.set_flags {
            entity
                .attributes
                .insert(flag.clone(), AttributeValue::Bool(true));
        }
        for flag in &transition.clear_flags {
            entity.attributes.remove(flag);
        }
        if !transition.set_flags.is_empty() || !transition.clear_flags.is_empty() {
            self.mark_entity_dirty(npc);
        }
    }

    /// End engaged dialogs whose participants drifted out of reach.
    pub(crate) fn end_distant_dialogs(&mut self) -> usize {
        let engaged: Vec<(EntityId, EntityId)> = self
            .store
            .iter()
            .filter_map(|entity| {
                entity
                    .dialog
                    .as_ref()
                    .and_then(Dialog::partner)
                    .map(|partner| (entity.id, partner))
            })
            .collect();
        let mut ended = 0;
        for (npc, partner) in engaged {
            let apart = !self.store.contains(partner)
                || self
                    .world_position(npc)
                    .chebyshev(self.world_position(partner))
                    > 1;
            if apart {
                self.end_dialog(npc);
                ended += 1;
            }
        }
        ended
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn guard_graph() -> Arc<DialogGraph> {
        let json = r#"{
            "root": "hello",
            "nodes": [
                {"id": "hello", "line": "Halt. State your business.",
                 "replies": [{"reply": "I am lost.", "to": "lost"},
                             {"reply": "Goodbye.", "to": "bye"}]},
                {"id": "lost", "line": "The lab is east.", "set_flags": ["gave_directions"],
                 "replies": [{"reply": "Thanks.", "to": "bye"}]},
                {"id": "bye", "line": "Move along."}
            ]
        }"#;
        Arc::new(serde_json::from_str(json).expect("graph parses"))
    }

    #[test]
    fn walks_graph_to_terminal_node() {
        let mut dialog = Dialog::new(guard_graph());
        let opening = dialog.initiate(EntityId(7)).expect("initiate");
        assert_eq!(opening.options, vec!["I am lost.", "Goodbye."]);
        assert_eq!(dialog.partner(), Some(EntityId(7)));

        let lost = dialog.say(EntityId(7), "I am lost.").expect("reply");
        assert_eq!(lost.set_flags, vec!["gave_directions"]);
        assert!(!lost.ended);

        let bye = dialog.say(EntityId(7), "Thanks.").expect("reply");
        assert!(bye.ended);
        assert_eq!(dialog.state(), &DialogState::Idle);
    }

    #[test]
    fn rejects_third_party_and_unknown_replies() {
        let mut dialog = Dialog::new(guard_graph());
        dialog.initiate(EntityId(7)).expect("initiate");
        assert_eq!(
            dialog.say(EntityId(8), "Goodbye."),
            Err(DialogError::WrongPartner {
                expected: EntityId(7),
                got: EntityId(8)
            })
        );
        assert_eq!(
            dialog.say(EntityId(7), "goodbye."),
            Err(DialogError::UnknownReply("goodbye.".to_string()))
        );
        dialog.end();
        assert_eq!(dialog.say(EntityId(7), "Goodbye."), Err(DialogError::NotEngaged));
    }

    #[test]
    fn graph_problems_are_enumerated() {
        let graph = DialogGraph {
            root: "start".to_string(),
            nodes: vec![
                DialogNode {
                    id: "a".to_string(),
                    line: String::new(),
                    set_flags: Vec::new(),
                    clear_flags: Vec::new(),
                    replies: vec![DialogEdge {
                        reply: "x".to_string(),
                        to: "missing".to_string(),
                    }],
                },
                DialogNode {
                    id: "a".to_string(),
                    line: String::new(),
                    set_flags: Vec::new(),
                    clear_flags: Vec::new(),
                    replies: Vec::new(),
                },
            ],
        };
        assert_eq!(graph.problems().len(), 3);
    }
}
