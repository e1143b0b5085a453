//! "Use A on B" dispatch. Handlers are keyed by the kinds involved and return
//! a plan; the interpreter applies it.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use sim_runtime::{AttributeValue, Importance};

use crate::{
    entity::{Entity, EntityId},
    World,
};

pub struct UseContext<'a> {
    pub world: &'a World,
    pub agent: EntityId,
    pub primary: &'a Entity,
    pub secondary: Option<&'a Entity>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct AttributeChange {
    pub entity: EntityId,
    pub key: String,
    /// `None` removes the attribute.
    pub value: Option<AttributeValue>,
}

/// Effects of a use, applied by the interpreter in order: attribute
/// changes, consumption, then generated archetypes into the user's inventory.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct UseOutcome {
    pub success: bool,
    pub message: String,
    pub importance: Importance,
    pub generate: Vec<String>,
    pub consume: Vec<EntityId>,
    pub attribute_changes: Vec<AttributeChange>,
}

impl UseOutcome {
    pub fn success(message: impl Into<String>) -> Self {
        Self {
            success: true,
            message: message.into(),
            ..Self::default()
        }
    }

    pub fn failure(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: message.into(),
            ..Self::default()
        }
    }
}

pub trait UseHandler: fmt::Debug + Send + Sync {
    fn apply(&self, ctx: &UseContext<'_>) -> UseOutcome;
}

type HandlerKey = (String, Option<String>);

#[derive(Debug, Clone, Default)]
pub struct UseRegistry {
    handlers: BTreeMap<HandlerKey, Arc<dyn UseHandler>>,
}

impl UseRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// `secondary == None` registers the fallback for using `primary` on
    /// anything (or nothing).
    pub fn register(
        &mut self,
        primary: impl Into<String>,
        secondary: Option<String>,
        handler: Arc<dyn UseHandler>,
    ) {
        self.handlers.insert((primary.into(), secondary), handler);
    }

    /// Exact `(primary, secondary)` pair first, then the primary-only fallback.
    pub fn lookup(&self, primary: &str, secondary: Option<&str>) -> Option<Arc<dyn UseHandler>> {
        if let Some(secondary) = secondary {
            if let Some(handler) = self
                .handlers
                .get(&(primary.to_string(), Some(secondary.to_string())))
            {
                return Some(Arc::clone(handler));
            }
        }
        self.handlers
            .get(&(primary.to_string(), None))
            .map(Arc::clone)
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

/// Combine inputs into new archetypes.
#[derive(Debug, Clone)]
pub struct RecipeHandler {
    pub produces: Vec<String>,
    pub consume_inputs: bool,
    pub message: Option<String>,
}

impl UseHandler for RecipeHandler {
    fn apply(&self, ctx: &UseContext<'_>) -> UseOutcome {
        let mut consume = Vec::new();
        if self.consume_inputs {
            consume.push(ctx.primary.id);
            consume.extend(ctx.secondary.map(|entity| entity.id));
        }
        let message = self.message.clone().unwrap_or_else(|| match ctx.secondary {
            Some(secondary) => format!(
                "Using the {} on the {} produced {}.",
                ctx.primary.name,
                secondary.name,
                self.produces.join(", ")
            ),
            None => format!(
                "Using the {} produced {}.",
                ctx.primary.name,
                self.produces.join(", ")
            ),
        });
        UseOutcome {
            generate: self.produces.clone(),
            consume,
            ..UseOutcome::success(message)
        }
    }
}

/// Instruments: report one attribute of the thing they are used on.
#[derive(Debug, Clone)]
pub struct MeasureHandler {
    pub attribute: String,
    pub unit: Option<String>,
}

impl UseHandler for MeasureHandler {
    fn apply(&self, ctx: &UseContext<'_>) -> UseOutcome {
        let Some(target) = ctx.secondary else {
            return UseOutcome::failure(format!(
                "Use the {} on something to measure its {}.",
                ctx.primary.name, self.attribute
            ));
        };
        match target.attribute(&self.attribute) {
            Some(value) => {
                let reading = match value {
                    AttributeValue::Text(text) => text.clone(),
                    other => other.to_string(),
                };
                let unit = self
                    .unit
                    .as_deref()
                    .map(|unit| format!(" {unit}"))
                    .unwrap_or_default();
                UseOutcome::success(format!(
                    "The {} reads {}{} for the {}.",
                    ctx.primary.name, reading, unit, target.name
                ))
            }
            None => UseOutcome::failure(format!(
                "The {} shows no {} reading for the {}.",
                ctx.primary.name, self.attribute, target.name
            )),
        }
    }
}
