use std::fmt;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Every action an agent can request in a single tick.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, JsonSchema,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ActionKind {
    MoveForward,
    MoveBackward,
    RotateCw,
    RotateCcw,
    MoveDirection,
    RotateDirection,
    TeleportToLocation,
    TeleportToObject,
    Pickup,
    Drop,
    Put,
    Open,
    Close,
    Activate,
    Deactivate,
    Talk,
    Eat,
    Read,
    Use,
    DiscoveryFeedGetUpdates,
    DiscoveryFeedGetArticles,
    DiscoveryFeedGetPostById,
    DiscoveryFeedCreateUpdate,
    DiscoveryFeedCreateArticle,
}

impl ActionKind {
    pub const ALL: [ActionKind; 24] = [
        ActionKind::MoveForward,
        ActionKind::MoveBackward,
        ActionKind::RotateCw,
        ActionKind::RotateCcw,
        ActionKind::MoveDirection,
        ActionKind::RotateDirection,
        ActionKind::TeleportToLocation,
        ActionKind::TeleportToObject,
        ActionKind::Pickup,
        ActionKind::Drop,
        ActionKind::Put,
        ActionKind::Open,
        ActionKind::Close,
        ActionKind::Activate,
        ActionKind::Deactivate,
        ActionKind::Talk,
        ActionKind::Eat,
        ActionKind::Read,
        ActionKind::Use,
        ActionKind::DiscoveryFeedGetUpdates,
        ActionKind::DiscoveryFeedGetArticles,
        ActionKind::DiscoveryFeedGetPostById,
        ActionKind::DiscoveryFeedCreateUpdate,
        ActionKind::DiscoveryFeedCreateArticle,
    ];

    pub fn name(self) -> &'static str {
        match self {
            ActionKind::MoveForward => "MOVE_FORWARD",
            ActionKind::MoveBackward => "MOVE_BACKWARD",
            ActionKind::RotateCw => "ROTATE_CW",
            ActionKind::RotateCcw => "ROTATE_CCW",
            ActionKind::MoveDirection => "MOVE_DIRECTION",
            ActionKind::RotateDirection => "ROTATE_DIRECTION",
            ActionKind::TeleportToLocation => "TELEPORT_TO_LOCATION",
            ActionKind::TeleportToObject => "TELEPORT_TO_OBJECT",
            ActionKind::Pickup => "PICKUP",
            ActionKind::Drop => "DROP",
            ActionKind::Put => "PUT",
            ActionKind::Open => "OPEN",
            ActionKind::Close => "CLOSE",
            ActionKind::Activate => "ACTIVATE",
            ActionKind::Deactivate => "DEACTIVATE",
            ActionKind::Talk => "TALK",
            ActionKind::Eat => "EAT",
            ActionKind::Read => "READ",
            ActionKind::Use => "USE",
            ActionKind::DiscoveryFeedGetUpdates => "DISCOVERY_FEED_GET_UPDATES",
            ActionKind::DiscoveryFeedGetArticles => "DISCOVERY_FEED_GET_ARTICLES",
            ActionKind::DiscoveryFeedGetPostById => "DISCOVERY_FEED_GET_POST_BY_ID",
            ActionKind::DiscoveryFeedCreateUpdate => "DISCOVERY_FEED_CREATE_UPDATE",
            ActionKind::DiscoveryFeedCreateArticle => "DISCOVERY_FEED_CREATE_ARTICLE",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|kind| kind.name().eq_ignore_ascii_case(name.trim()))
    }

    /// Movement, rotation, teleport and feed actions never check distance.
    pub fn requires_adjacency(self) -> bool {
        !matches!(
            self,
            ActionKind::MoveForward
                | ActionKind::MoveBackward
                | ActionKind::RotateCw
                | ActionKind::RotateCcw
                | ActionKind::MoveDirection
                | ActionKind::RotateDirection
                | ActionKind::TeleportToLocation
                | ActionKind::TeleportToObject
                | ActionKind::DiscoveryFeedGetUpdates
                | ActionKind::DiscoveryFeedGetArticles
                | ActionKind::DiscoveryFeedGetPostById
                | ActionKind::DiscoveryFeedCreateUpdate
                | ActionKind::DiscoveryFeedCreateArticle
        )
    }

    /// Queries that leave the world untouched and do not use up the agent's turn.
    pub fn is_read_only(self) -> bool {
        matches!(
            self,
            ActionKind::DiscoveryFeedGetUpdates
                | ActionKind::DiscoveryFeedGetArticles
                | ActionKind::DiscoveryFeedGetPostById
        )
    }
}

impl fmt::Display for ActionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Cardinal facing. `y` grows toward the south.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    North,
    East,
    South,
    West,
}

impl Direction {
    pub const ALL: [Direction; 4] = [
        Direction::North,
        Direction::East,
        Direction::South,
        Direction::West,
    ];

    pub fn delta(self) -> (i32, i32) {
        match self {
            Direction::North => (0, -1),
            Direction::East => (1, 0),
            Direction::South => (0, 1),
            Direction::West => (-1, 0),
        }
    }

    pub fn rotate_cw(self) -> Self {
        match self {
            Direction::North => Direction::East,
            Direction::East => Direction::South,
            Direction::South => Direction::West,
            Direction::West => Direction::North,
        }
    }

    pub fn rotate_ccw(self) -> Self {
        match self {
            Direction::North => Direction::West,
            Direction::West => Direction::South,
            Direction::South => Direction::East,
            Direction::East => Direction::North,
        }
    }

    pub fn opposite(self) -> Self {
        self.rotate_cw().rotate_cw()
    }

    pub fn name(self) -> &'static str {
        match self {
            Direction::North => "north",
            Direction::East => "east",
            Direction::South => "south",
            Direction::West => "west",
        }
    }

    pub fn parse(token: &str) -> Option<Self> {
        match token.trim().to_ascii_lowercase().as_str() {
            "north" | "n" | "up" => Some(Direction::North),
            "east" | "e" | "right" => Some(Direction::East),
            "south" | "s" | "down" => Some(Direction::South),
            "west" | "w" | "left" => Some(Direction::West),
            _ => None,
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Command argument: an entity id or free text (direction, location, post body).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(untagged)]
pub enum CommandArg {
    Id(u64),
    Text(String),
}

impl CommandArg {
    /// Numeric ids may also arrive as strings from text-based agents.
    pub fn as_id(&self) -> Option<u64> {
        match self {
            CommandArg::Id(id) => Some(*id),
            CommandArg::Text(text) => text.trim().parse().ok(),
        }
    }

    pub fn as_text(&self) -> String {
        match self {
            CommandArg::Id(id) => id.to_string(),
            CommandArg::Text(text) => text.clone(),
        }
    }
}

impl From<u64> for CommandArg {
    fn from(value: u64) -> Self {
        CommandArg::Id(value)
    }
}

impl From<&str> for CommandArg {
    fn from(value: &str) -> Self {
        CommandArg::Text(value.to_string())
    }
}

impl fmt::Display for CommandArg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.as_text())
    }
}

/// Tagged action record `{action, arg1?, arg2?}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct ActionCommand {
    pub action: ActionKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub arg1: Option<CommandArg>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub arg2: Option<CommandArg>,
}

impl ActionCommand {
    pub fn new(action: ActionKind) -> Self {
        Self {
            action,
            arg1: None,
            arg2: None,
        }
    }

    pub fn with_arg1(mut self, arg: impl Into<CommandArg>) -> Self {
        self.arg1 = Some(arg.into());
        self
    }

    pub fn with_arg2(mut self, arg: impl Into<CommandArg>) -> Self {
        self.arg2 = Some(arg.into());
        self
    }
}

/// High-level command handed to the kernel.
#[derive(Debug, Clone, PartialEq)]
pub enum CommandPayload {
    Action(ActionCommand),
    /// Only legal while the agent is engaged in a dialog.
    DialogOption {
        index: i64,
    },
    Tick {
        steps: u32,
    },
}

/// JSON wire shape of a command.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(untagged)]
pub enum WireCommand {
    Action(ActionCommand),
    DialogChoice { chosen_dialog_option_int: i64 },
    Tick { tick: u32 },
}

impl From<WireCommand> for CommandPayload {
    fn from(value: WireCommand) -> Self {
        match value {
            WireCommand::Action(command) => CommandPayload::Action(command),
            WireCommand::DialogChoice {
                chosen_dialog_option_int,
            } => CommandPayload::DialogOption {
                index: chosen_dialog_option_int,
            },
            WireCommand::Tick { tick } => CommandPayload::Tick { steps: tick },
        }
    }
}

impl From<&CommandPayload> for WireCommand {
    fn from(value: &CommandPayload) -> Self {
        match value {
            CommandPayload::Action(command) => WireCommand::Action(command.clone()),
            CommandPayload::DialogOption { index } => WireCommand::DialogChoice {
                chosen_dialog_option_int: *index,
            },
            CommandPayload::Tick { steps } => WireCommand::Tick { tick: *steps },
        }
    }
}

/// Command plus the agent it is addressed to (`None` = the default agent).
#[derive(Debug, Clone, PartialEq)]
pub struct CommandEnvelope {
    pub agent: Option<u64>,
    pub payload: CommandPayload,
}

#[derive(Debug, Error)]
pub enum CommandDecodeError {
    #[error("malformed json: {0}")]
    Json(#[from] serde_json::Error),
    #[error("command must be a json object")]
    NotAnObject,
    #[error("invalid agent id {0}")]
    InvalidAgent(String),
    #[error("unrecognized command: {0}")]
    UnrecognizedShape(String),
}

impl CommandEnvelope {
    pub fn new(agent: Option<u64>, payload: CommandPayload) -> Self {
        Self { agent, payload }
    }

    /// Decode `{"agent"?: id, "action": ..., "arg1"?: ..., "arg2"?: ...}`,
    /// `{"chosen_dialog_option_int": n}` or `{"tick": n}`.
    pub fn from_json(text: &str) -> Result<Self, CommandDecodeError> {
        let mut value: serde_json::Value = serde_json::from_str(text)?;
        let object = value
            .as_object_mut()
            .ok_or(CommandDecodeError::NotAnObject)?;
        let agent = match object.remove("agent") {
            None | Some(serde_json::Value::Null) => None,
            Some(raw) => Some(
                raw.as_u64()
                    .ok_or_else(|| CommandDecodeError::InvalidAgent(raw.to_string()))?,
            ),
        };
        let wire: WireCommand = serde_json::from_value(value)
            .map_err(|err| CommandDecodeError::UnrecognizedShape(err.to_string()))?;
        Ok(Self {
            agent,
            payload: wire.into(),
        })
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        let mut value = serde_json::to_value(WireCommand::from(&self.payload))?;
        if let (Some(agent), Some(object)) = (self.agent, value.as_object_mut()) {
            object.insert("agent".to_string(), agent.into());
        }
        serde_json::to_string(&value)
    }
}

#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Importance {
    #[default]
    Normal,
    /// Presentation layers surface these as a modal.
    High,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct ItemSummary {
    pub id: u64,
    pub name: String,
    pub kind: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ActionData {
    #[serde(default)]
    pub generated_items: Vec<ItemSummary>,
    #[serde(default)]
    pub feed_post_ids: Vec<u64>,
}

/// Outcome of one command. Guard failures are reported here, never raised.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct ActionResult {
    pub errors: Vec<String>,
    pub success: bool,
    pub message: String,
    pub importance: Importance,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<ActionData>,
}

impl ActionResult {
    pub fn ok(message: impl Into<String>) -> Self {
        Self {
            errors: Vec::new(),
            success: true,
            message: message.into(),
            importance: Importance::Normal,
            data: None,
        }
    }

    pub fn rejected(message: impl Into<String>) -> Self {
        Self {
            success: false,
            ..Self::ok(message)
        }
    }

    pub fn high(mut self) -> Self {
        self.importance = Importance::High;
        self
    }

    pub fn with_errors(mut self, errors: Vec<String>) -> Self {
        self.errors.extend(errors);
        self
    }

    pub fn with_generated(mut self, items: Vec<ItemSummary>) -> Self {
        if !items.is_empty() {
            self.data.get_or_insert_with(ActionData::default).generated_items = items;
        }
        self
    }

    pub fn with_feed_posts(mut self, ids: Vec<u64>) -> Self {
        self.data.get_or_insert_with(ActionData::default).feed_post_ids = ids;
        self
    }

    pub fn generated_items(&self) -> &[ItemSummary] {
        self.data
            .as_ref()
            .map(|data| data.generated_items.as_slice())
            .unwrap_or(&[])
    }
}

/// JSON Schema for the command and result wire types.
pub fn command_schema_json() -> serde_json::Value {
    let command = schemars::schema_for!(WireCommand);
    let result = schemars::schema_for!(ActionResult);
    serde_json::json!({
        "command": command,
        "result": result,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn action_names_match_serde_names() {
        for kind in ActionKind::ALL {
            let json = serde_json::to_value(kind).expect("serialize kind");
            assert_eq!(json, serde_json::Value::String(kind.name().to_string()));
            assert_eq!(ActionKind::from_name(&kind.name().to_lowercase()), Some(kind));
        }
    }

    #[test]
    fn adjacency_exemptions() {
        assert!(ActionKind::Pickup.requires_adjacency());
        assert!(ActionKind::Use.requires_adjacency());
        assert!(!ActionKind::TeleportToObject.requires_adjacency());
        assert!(!ActionKind::RotateCw.requires_adjacency());
        assert!(ActionKind::DiscoveryFeedGetUpdates.is_read_only());
        assert!(!ActionKind::DiscoveryFeedCreateUpdate.is_read_only());
    }

    #[test]
    fn direction_rotation_cycles() {
        assert_eq!(Direction::North.rotate_cw(), Direction::East);
        assert_eq!(Direction::North.rotate_ccw(), Direction::West);
        assert_eq!(Direction::South.opposite(), Direction::North);
        assert_eq!(Direction::South.delta(), (0, 1));
        assert_eq!(Direction::parse("W"), Some(Direction::West));
        assert_eq!(Direction::parse("sideways"), None);
    }

    #[test]
    fn envelope_decodes_action_with_agent() {
        let envelope =
            CommandEnvelope::from_json(r#"{"agent": 9, "action": "PUT", "arg1": 12, "arg2": "34"}"#)
                .expect("decode");
        assert_eq!(envelope.agent, Some(9));
        let CommandPayload::Action(command) = &envelope.payload else {
            panic!("expected action payload");
        };
        assert_eq!(command.action, ActionKind::Put);
        assert_eq!(command.arg1.as_ref().and_then(CommandArg::as_id), Some(12));
        assert_eq!(command.arg2.as_ref().and_then(CommandArg::as_id), Some(34));

        let encoded = envelope.to_json().expect("encode");
        let decoded = CommandEnvelope::from_json(&encoded).expect("re-decode");
        assert_eq!(decoded, envelope);
    }

    #[test]
    fn envelope_decodes_dialog_choice_and_tick() {
        let choice = CommandEnvelope::from_json(r#"{"chosen_dialog_option_int": 1}"#)
            .expect("decode choice");
        assert_eq!(choice.payload, CommandPayload::DialogOption { index: 1 });

        let tick = CommandEnvelope::from_json(r#"{"tick": 3}"#).expect("decode tick");
        assert_eq!(tick.payload, CommandPayload::Tick { steps: 3 });
    }

    #[test]
    fn envelope_rejects_malformed_commands() {
        assert!(matches!(
            CommandEnvelope::from_json("[1, 2]"),
            Err(CommandDecodeError::NotAnObject)
        ));
        assert!(matches!(
            CommandEnvelope::from_json(r#"{"action": "FLY"}"#),
            Err(CommandDecodeError::UnrecognizedShape(_))
        ));
        assert!(matches!(
            CommandEnvelope::from_json(r#"{"agent": "me", "action": "EAT"}"#),
            Err(CommandDecodeError::InvalidAgent(_))
        ));
    }

    #[test]
    fn result_wire_shape() {
        let result = ActionResult::rejected("The box is not open.").high();
        let json = serde_json::to_value(&result).expect("serialize");
        assert_eq!(json["success"], false);
        assert_eq!(json["importance"], "HIGH");
        assert!(json.get("data").is_none());

        let generated = ActionResult::ok("mixed").with_generated(vec![ItemSummary {
            id: 5,
            name: "green paste".to_string(),
            kind: "paste".to_string(),
        }]);
        let json = serde_json::to_value(&generated).expect("serialize");
        assert_eq!(json["data"]["generatedItems"][0]["id"], 5);
    }

    #[test]
    fn schema_mentions_every_wire_shape() {
        let schema = command_schema_json().to_string();
        assert!(schema.contains("chosen_dialog_option_int"));
        assert!(schema.contains("DISCOVERY_FEED_CREATE_ARTICLE"));
        assert!(schema.contains("importance"));
    }
}
