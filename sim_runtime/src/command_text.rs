use std::num::ParseIntError;

use thiserror::Error;

use crate::{ActionCommand, ActionKind, CommandArg, CommandPayload, Direction};

#[derive(Debug, Error)]
pub enum CommandParseError {
    #[error("empty command")]
    Empty,
    #[error("unknown command: {0}")]
    UnknownCommand(String),
    #[error("missing argument: {0}")]
    MissingArgument(&'static str),
    #[error("invalid integer '{value}' for {context}: {source}")]
    InvalidInteger {
        value: String,
        context: &'static str,
        source: ParseIntError,
    },
    #[error("invalid direction '{0}'")]
    InvalidDirection(String),
}

/// Parse a console-style command line such as `pickup 42`, `move north`,
/// `put 42 17`, `say 0`, `article Findings | The red ones glow` or `tick 3`.
/// Canonical action names (`PICKUP`, `ROTATE_CW`, ...) are accepted too.
pub fn parse_command_line(input: &str) -> Result<CommandPayload, CommandParseError> {
    let trimmed = input.trim();
    if trimmed.is_empty() {
        return Err(CommandParseError::Empty);
    }

    let (verb, rest) = match trimmed.split_once(char::is_whitespace) {
        Some((verb, rest)) => (verb.to_ascii_lowercase(), rest.trim()),
        None => (trimmed.to_ascii_lowercase(), ""),
    };
    let mut parts = rest.split_whitespace();

    let action = |kind: ActionKind| -> Result<CommandPayload, CommandParseError> {
        Ok(CommandPayload::Action(ActionCommand::new(kind)))
    };

    match verb.as_str() {
        "tick" | "wait" => {
            let steps = parse_u32(parts.next().unwrap_or("1"), "tick steps")?;
            Ok(CommandPayload::Tick { steps })
        }
        "say" | "option" | "choose" => {
            let token = parts
                .next()
                .ok_or(CommandParseError::MissingArgument("dialog option"))?;
            let index = token
                .parse::<i64>()
                .map_err(|source| CommandParseError::InvalidInteger {
                    value: token.to_string(),
                    context: "dialog option",
                    source,
                })?;
            Ok(CommandPayload::DialogOption { index })
        }
        "forward" | "f" => action(ActionKind::MoveForward),
        "back" | "backward" | "b" => action(ActionKind::MoveBackward),
        "cw" | "right_turn" => action(ActionKind::RotateCw),
        "ccw" | "left_turn" => action(ActionKind::RotateCcw),
        "move" | "go" => {
            let direction = parse_direction(parts.next())?;
            Ok(with_args(ActionKind::MoveDirection, Some(direction), None))
        }
        "face" | "turn" => {
            let direction = parse_direction(parts.next())?;
            Ok(with_args(ActionKind::RotateDirection, Some(direction), None))
        }
        "teleport" => {
            if rest.is_empty() {
                return Err(CommandParseError::MissingArgument("location"));
            }
            Ok(with_args(
                ActionKind::TeleportToLocation,
                Some(CommandArg::Text(rest.to_string())),
                None,
            ))
        }
        "teleport_to" | "goto_object" => {
            let id = parse_entity(parts.next(), "target object")?;
            Ok(with_args(ActionKind::TeleportToObject, Some(id), None))
        }
        "updates" => Ok(with_args(
            ActionKind::DiscoveryFeedGetUpdates,
            optional_index(parts.next())?,
            None,
        )),
        "articles" => Ok(with_args(
            ActionKind::DiscoveryFeedGetArticles,
            optional_index(parts.next())?,
            None,
        )),
        "post" => {
            let id = parse_entity(parts.next(), "post id")?;
            Ok(with_args(ActionKind::DiscoveryFeedGetPostById, Some(id), None))
        }
        "update" => {
            if rest.is_empty() {
                return Err(CommandParseError::MissingArgument("update text"));
            }
            Ok(with_args(
                ActionKind::DiscoveryFeedCreateUpdate,
                Some(CommandArg::Text(rest.to_string())),
                None,
            ))
        }
        "article" => {
            let (title, body) = rest
                .split_once('|')
                .ok_or(CommandParseError::MissingArgument("article title | body"))?;
            Ok(with_args(
                ActionKind::DiscoveryFeedCreateArticle,
                Some(CommandArg::Text(title.trim().to_string())),
                Some(CommandArg::Text(body.trim().to_string())),
            ))
        }
        other => {
            let kind = object_verb(other)
                .or_else(|| ActionKind::from_name(other))
                .ok_or_else(|| CommandParseError::UnknownCommand(other.to_string()))?;
            let arg1 = parts.next().map(text_or_id);
            let arg2 = parts.next().map(text_or_id);
            Ok(with_args(kind, arg1, arg2))
        }
    }
}

fn object_verb(verb: &str) -> Option<ActionKind> {
    let kind = match verb {
        "pickup" | "take" | "get" => ActionKind::Pickup,
        "drop" => ActionKind::Drop,
        "put" | "place" => ActionKind::Put,
        "open" => ActionKind::Open,
        "close" => ActionKind::Close,
        "activate" | "on" => ActionKind::Activate,
        "deactivate" | "off" => ActionKind::Deactivate,
        "talk" => ActionKind::Talk,
        "eat" => ActionKind::Eat,
        "read" => ActionKind::Read,
        "use" => ActionKind::Use,
        _ => return None,
    };
    Some(kind)
}

fn with_args(kind: ActionKind, arg1: Option<CommandArg>, arg2: Option<CommandArg>) -> CommandPayload {
    CommandPayload::Action(ActionCommand {
        action: kind,
        arg1,
        arg2,
    })
}

fn text_or_id(token: &str) -> CommandArg {
    match token.parse::<u64>() {
        Ok(id) => CommandArg::Id(id),
        Err(_) => CommandArg::Text(token.to_string()),
    }
}

fn parse_direction(token: Option<&str>) -> Result<CommandArg, CommandParseError> {
    let token = token.ok_or(CommandParseError::MissingArgument("direction"))?;
    Direction::parse(token)
        .map(|direction| CommandArg::Text(direction.name().to_string()))
        .ok_or_else(|| CommandParseError::InvalidDirection(token.to_string()))
}

fn parse_entity(token: Option<&str>, context: &'static str) -> Result<CommandArg, CommandParseError> {
    let token = token.ok_or(CommandParseError::MissingArgument(context))?;
    token
        .parse::<u64>()
        .map(CommandArg::Id)
        .map_err(|source| CommandParseError::InvalidInteger {
            value: token.to_string(),
            context,
            source,
        })
}

fn optional_index(token: Option<&str>) -> Result<Option<CommandArg>, CommandParseError> {
    token.map(|value| parse_entity(Some(value), "start index")).transpose()
}

fn parse_u32(value: &str, context: &'static str) -> Result<u32, CommandParseError> {
    value
        .parse::<u32>()
        .map_err(|source| CommandParseError::InvalidInteger {
            value: value.to_string(),
            context,
            source,
        })
}
