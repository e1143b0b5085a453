//! Core simulation kernel for the tile-world prototype.
//!
//! A [`World`] owns every entity, the layered tile grid, and the per-tick
//! bookkeeping. Agents act through [`World::submit`] / [`World::execute`];
//! [`World::tick`] advances time, steps NPC autopilots, and records a
//! compressed [`sim_runtime::TickSnapshot`] into the history.

mod archetype;
mod autopilot;
mod config;
mod consumption;
mod dialog;
mod entity;
mod feed;
mod grid;
mod hashing;
mod history;
mod ids;
mod interpreter;
pub mod knowledge;
pub mod metrics;
mod movement;
mod object_actions;
pub mod observation;
pub mod pathfinder;
pub mod scenario;
mod snapshot;
mod social;
mod store;
mod turn;
mod use_handlers;
mod world;

pub use archetype::{Archetype, ArchetypeError, ArchetypeTable, MeasureSpec, RecipeSpec};
pub use autopilot::{ActionStatus, AutopilotAction, AutopilotQueue, QueuedAction};
pub use config::{
    ConfigError, InterpreterConfig, ObservationConfig, PathfindingConfig, SimulationConfig,
    SnapshotConfig, CONFIG_PATH_ENV,
};
pub use dialog::{Dialog, DialogEdge, DialogError, DialogGraph, DialogNode, DialogState, Transition};
pub use entity::{
    ActionRecord, ActiveEffect, AgentState, Capabilities, Entity, EntityId, GridPos,
    IngestedEffect, Layer, Owner, StatusFlags,
};
pub use feed::{DiscoveryFeed, FEED_PAGE_SIZE};
pub use grid::{EntityQuery, Tile, WorldGrid};
pub use hashing::stable_seed;
pub use history::{EncodedPart, HistoryError, SnapshotHistory};
pub use knowledge::{
    Hypothesis, HypothesisScore, Measurement, MeasurementScore, ObjectProperty, ObjectReference,
    Operator, ReferenceSelector,
};
pub use metrics::SimulationMetrics;
pub use observation::Observation;
pub use scenario::{Scenario, ScenarioError};
pub use social::{render_transition, DIALOG_OPTION_ACTION};
pub use store::EntityStore;
pub use turn::{TurnError, TurnLedger};
pub use use_handlers::{
    AttributeChange, MeasureHandler, RecipeHandler, UseContext, UseHandler, UseOutcome,
    UseRegistry,
};
pub use world::{OwnershipError, TickSummary, World};
