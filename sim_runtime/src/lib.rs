//! Shared runtime contracts for the tile-world kernel.
//!
//! This crate re-exports the snapshot contracts from `sim_schema` and adds the
//! command surface agents talk to: the action enum, the wire envelope, the
//! structured result, and a line-oriented text parser. None of it depends on
//! the simulation state in `core_sim`.

pub use sim_schema::*;

mod command_text;
mod commands;

pub use command_text::{parse_command_line, CommandParseError};
pub use commands::{
    command_schema_json, ActionCommand, ActionData, ActionKind, ActionResult, CommandArg,
    CommandDecodeError, CommandEnvelope, CommandPayload, Direction, Importance, ItemSummary,
    WireCommand,
};
