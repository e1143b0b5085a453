use std::collections::{BTreeMap, VecDeque};
use std::fmt;

use bitflags::bitflags;
use serde::{Deserialize, Serialize};
use sim_runtime::{AttributeValue, CommandArg, Direction};

use crate::{autopilot::AutopilotQueue, dialog::Dialog};

/// Process-unique entity identifier handed out by [`crate::ids::IdAllocator`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EntityId(pub u64);

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Grid coordinate. `(-1, -1)` marks an entity that is not placed on a tile.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct GridPos {
    pub x: i32,
    pub y: i32,
}

impl GridPos {
    pub const NOWHERE: GridPos = GridPos { x: -1, y: -1 };

    pub const fn new(x: i32, y: i32) -> Self {
        Self { x, y }
    }

    pub fn is_placed(self) -> bool {
        self != Self::NOWHERE
    }

    pub fn step(self, direction: Direction) -> Self {
        let (dx, dy) = direction.delta();
        Self::new(self.x + dx, self.y + dy)
    }

    pub fn chebyshev(self, other: GridPos) -> i32 {
        (self.x - other.x).abs().max((self.y - other.y).abs())
    }

    pub fn manhattan(self, other: GridPos) -> i32 {
        (self.x - other.x).abs() + (self.y - other.y).abs()
    }

    /// Cardinal direction toward an orthogonally adjacent tile.
    pub fn direction_to(self, other: GridPos) -> Option<Direction> {
        Direction::ALL
            .into_iter()
            .find(|direction| self.step(*direction) == other)
    }
}

impl fmt::Display for GridPos {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {})", self.x, self.y)
    }
}

/// Z-ordered tile layers, lowest first.
#[repr(u8)]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Layer {
    Terrain = 0,
    Structure = 1,
    Furniture = 2,
    Object = 3,
    Agent = 4,
}

impl Layer {
    pub const ALL: [Layer; 5] = [
        Layer::Terrain,
        Layer::Structure,
        Layer::Furniture,
        Layer::Object,
        Layer::Agent,
    ];

    pub fn index(self) -> usize {
        self as usize
    }
}

bitflags! {
    /// What an entity can take part in. Checked by guards, never dispatched on.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
    pub struct Capabilities: u32 {
        const MOVABLE = 1 << 0;
        const CONTAINER = 1 << 1;
        const OPENABLE = 1 << 2;
        const PASSABLE = 1 << 3;
        const ACTIVATABLE = 1 << 4;
        const EDIBLE = 1 << 5;
        const READABLE = 1 << 6;
        const USABLE = 1 << 7;
        const DIALOGABLE = 1 << 8;
        const AGENT = 1 << 9;
        const POISONOUS = 1 << 10;
        const OBSCURES_BELOW = 1 << 11;
    }
}

const CAPABILITY_NAMES: [(&str, Capabilities); 12] = [
    ("isMovable", Capabilities::MOVABLE),
    ("isContainer", Capabilities::CONTAINER),
    ("isOpenable", Capabilities::OPENABLE),
    ("isPassable", Capabilities::PASSABLE),
    ("isActivatable", Capabilities::ACTIVATABLE),
    ("isEdible", Capabilities::EDIBLE),
    ("isReadable", Capabilities::READABLE),
    ("isUsable", Capabilities::USABLE),
    ("isDialogable", Capabilities::DIALOGABLE),
    ("isAgent", Capabilities::AGENT),
    ("isPoisonous", Capabilities::POISONOUS),
    ("obscuresObjectsBelow", Capabilities::OBSCURES_BELOW),
];

impl Capabilities {
    /// Look up a flag by its archetype attribute name, e.g. `isContainer`.
    pub fn from_attribute_name(name: &str) -> Option<Self> {
        CAPABILITY_NAMES
            .iter()
            .find(|(flag_name, _)| *flag_name == name)
            .map(|(_, flag)| *flag)
    }

    pub fn flag_names(self) -> impl Iterator<Item = &'static str> {
        CAPABILITY_NAMES
            .into_iter()
            .filter(move |(_, flag)| self.contains(*flag))
            .map(|(name, _)| name)
    }
}

bitflags! {
    /// Mutable state axes. Container and passage openness are independent.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
    pub struct StatusFlags: u8 {
        const OPEN_CONTAINER = 1 << 0;
        const OPEN_PASSAGE = 1 << 1;
        const ACTIVATED = 1 << 2;
    }
}

const STATUS_NAMES: [(&str, StatusFlags); 3] = [
    ("isOpenContainer", StatusFlags::OPEN_CONTAINER),
    ("isOpenPassage", StatusFlags::OPEN_PASSAGE),
    ("isActivated", StatusFlags::ACTIVATED),
];

impl StatusFlags {
    pub fn from_attribute_name(name: &str) -> Option<Self> {
        STATUS_NAMES
            .iter()
            .find(|(flag_name, _)| *flag_name == name)
            .map(|(_, flag)| *flag)
    }

    pub fn flag_names(self) -> impl Iterator<Item = &'static str> {
        STATUS_NAMES
            .into_iter()
            .filter(move |(_, flag)| self.contains(*flag))
            .map(|(name, _)| name)
    }
}

/// The single owner of an entity. Ownership is a tree: attaching anywhere
/// detaches from the previous owner first.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Owner {
    Nowhere,
    Tile { pos: GridPos, layer: Layer },
    Container(EntityId),
    Whole(EntityId),
}

/// Attribute change applied to whoever eats the carrying entity.
#[derive(Debug, Clone, PartialEq)]
pub struct IngestedEffect {
    pub attribute: String,
    pub value: AttributeValue,
    /// `None` makes the change permanent.
    pub duration_ticks: Option<u32>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ActiveEffect {
    pub attribute: String,
    pub remaining_ticks: u32,
    pub source: EntityId,
}

/// Immutable record of one command attempt.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ActionRecord {
    pub action_type: String,
    pub arg1: Option<CommandArg>,
    pub arg2: Option<CommandArg>,
    pub success: bool,
    pub tick: u64,
    pub message: String,
}

/// Per-agent state: facing, dialog pointer, action feed and NPC autopilot.
#[derive(Debug, Clone)]
pub struct AgentState {
    pub facing: Direction,
    pub in_dialog_with: Option<EntityId>,
    pub history: VecDeque<ActionRecord>,
    pub autopilot: AutopilotQueue,
    /// Driven by a human or external agent; the autopilot stays idle.
    pub external: bool,
}

impl AgentState {
    pub fn new(facing: Direction) -> Self {
        Self {
            facing,
            in_dialog_with: None,
            history: VecDeque::new(),
            autopilot: AutopilotQueue::default(),
            external: false,
        }
    }

    pub fn push_record(&mut self, record: ActionRecord, limit: usize) {
        if limit == 0 {
            return;
        }
        while self.history.len() >= limit {
            self.history.pop_front();
        }
        self.history.push_back(record);
    }

    pub fn recent(&self, count: usize) -> impl Iterator<Item = &ActionRecord> {
        let skip = self.history.len().saturating_sub(count);
        self.history.iter().skip(skip)
    }
}

#[derive(Debug, Clone)]
pub struct Entity {
    pub id: EntityId,
    pub name: String,
    /// Archetype kind; use-handlers and measurements select on it.
    pub kind: String,
    pub sprite: Option<String>,
    pub position: GridPos,
    pub owner: Owner,
    pub capabilities: Capabilities,
    pub status: StatusFlags,
    pub attributes: BTreeMap<String, AttributeValue>,
    pub contents: Vec<EntityId>,
    pub parts: Vec<EntityId>,
    pub ingested_effects: Vec<IngestedEffect>,
    pub active_effects: Vec<ActiveEffect>,
    pub agent: Option<AgentState>,
    pub dialog: Option<Dialog>,
}

impl Entity {
    pub fn new(id: EntityId, name: impl Into<String>, kind: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            kind: kind.into(),
            sprite: None,
            position: GridPos::NOWHERE,
            owner: Owner::Nowhere,
            capabilities: Capabilities::empty(),
            status: StatusFlags::empty(),
            attributes: BTreeMap::new(),
            contents: Vec::new(),
            parts: Vec::new(),
            ingested_effects: Vec::new(),
            active_effects: Vec::new(),
            agent: None,
            dialog: None,
        }
    }

    pub fn with_capabilities(mut self, capabilities: Capabilities) -> Self {
        self.capabilities |= capabilities;
        if capabilities.contains(Capabilities::AGENT) && self.agent.is_none() {
            self.agent = Some(AgentState::new(Direction::South));
        }
        self
    }

    pub fn with_status(mut self, status: StatusFlags) -> Self {
        self.status |= status;
        self
    }

    pub fn with_attribute(mut self, key: impl Into<String>, value: AttributeValue) -> Self {
        self.attributes.insert(key.into(), value);
        self
    }

    pub fn has(&self, capability: Capabilities) -> bool {
        self.capabilities.contains(capability)
    }

    pub fn is_movable(&self) -> bool {
        self.has(Capabilities::MOVABLE)
    }

    pub fn is_container(&self) -> bool {
        self.has(Capabilities::CONTAINER)
    }

    pub fn is_openable(&self) -> bool {
        self.has(Capabilities::OPENABLE)
    }

    pub fn is_agent(&self) -> bool {
        self.has(Capabilities::AGENT)
    }

    pub fn obscures_below(&self) -> bool {
        self.has(Capabilities::OBSCURES_BELOW)
    }

    /// Openable non-containers (doors, hatches) gate movement.
    pub fn is_passage(&self) -> bool {
        self.is_openable() && !self.is_container()
    }

    /// Containers without a lid are always open.
    pub fn is_open_container(&self) -> bool {
        self.is_container()
            && (!self.is_openable() || self.status.contains(StatusFlags::OPEN_CONTAINER))
    }

    pub fn is_open_passage(&self) -> bool {
        self.status.contains(StatusFlags::OPEN_PASSAGE)
    }

    pub fn is_activated(&self) -> bool {
        self.status.contains(StatusFlags::ACTIVATED)
    }

    pub fn is_passable(&self) -> bool {
        if self.is_passage() {
            self.is_open_passage()
        } else {
            self.has(Capabilities::PASSABLE)
        }
    }

    pub fn attribute(&self, key: &str) -> Option<&AttributeValue> {
        self.attributes.get(key)
    }

    pub fn facing(&self) -> Option<Direction> {
        self.agent.as_ref().map(|agent| agent.facing)
    }

    /// Every flag name that is set, capability and status alike.
    pub fn flag_names(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.capabilities
            .flag_names()
            .chain(self.status.flag_names())
    }
}
