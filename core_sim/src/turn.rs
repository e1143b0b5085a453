use std::collections::HashSet;

use crate::entity::EntityId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum TurnError {
    #[error("agent {0} already acted this step")]
    AlreadyActed(EntityId),
}

/// Tracks which agents have spent their one action for the current tick.
/// Application order is submission order; nothing is reordered.
#[derive(Debug, Clone, Default)]
pub struct TurnLedger {
    acted: HashSet<EntityId>,
    order: Vec<EntityId>,
    current_tick: u64,
}

impl TurnLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn current_tick(&self) -> u64 {
        self.current_tick
    }

    pub fn has_acted(&self, agent: EntityId) -> bool {
        self.acted.contains(&agent)
    }

    pub fn check(&self, agent: EntityId) -> Result<(), TurnError> {
        if self.has_acted(agent) {
            Err(TurnError::AlreadyActed(agent))
        } else {
            Ok(())
        }
    }

    pub fn mark_acted(&mut self, agent: EntityId) -> Result<(), TurnError> {
        if !self.acted.insert(agent) {
            return Err(TurnError::AlreadyActed(agent));
        }
        self.order.push(agent);
        Ok(())
    }

    /// Agents in the order their actions were applied this tick.
    pub fn acted_this_tick(&self) -> &[EntityId] {
        &self.order
    }

    pub fn advance(&mut self) {
        self.current_tick = self.current_tick.wrapping_add(1);
        self.acted.clear();
        self.order.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn one_action_per_agent_per_tick() {
        let mut ledger = TurnLedger::new();
        ledger.mark_acted(EntityId(2)).expect("first action");
        ledger.mark_acted(EntityId(1)).expect("other agent");
        assert_eq!(
            ledger.mark_acted(EntityId(2)),
            Err(TurnError::AlreadyActed(EntityId(2)))
        );
        assert_eq!(ledger.acted_this_tick(), &[EntityId(2), EntityId(1)]);

        ledger.advance();
        assert_eq!(ledger.current_tick(), 1);
        assert!(ledger.check(EntityId(2)).is_ok());
        assert!(ledger.acted_this_tick().is_empty());
    }
}
