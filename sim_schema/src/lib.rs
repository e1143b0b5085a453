use ahash::RandomState;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::hash::{BuildHasher, Hasher};
use thiserror::Error;

/// Default zstd level for per-tick snapshots and export parts.
pub const DEFAULT_COMPRESSION_LEVEL: i32 = 3;

/// Capability and state flag names as they appear in snapshots and queries.
pub const FLAG_NAMES: &[&str] = &[
    "isMovable",
    "isContainer",
    "isOpenable",
    "isPassable",
    "isActivatable",
    "isEdible",
    "isReadable",
    "isUsable",
    "isDialogable",
    "isAgent",
    "isPoisonous",
    "obscuresObjectsBelow",
    "isOpenContainer",
    "isOpenPassage",
    "isActivated",
];

/// Heterogeneous value stored in an entity's attribute bag.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttributeValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
    Set(BTreeSet<String>),
    List(Vec<AttributeValue>),
    Ref(u64),
}

impl AttributeValue {
    pub fn text(value: impl Into<String>) -> Self {
        AttributeValue::Text(value.into())
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            AttributeValue::Int(value) => Some(*value as f64),
            AttributeValue::Float(value) => Some(*value),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            AttributeValue::Text(value) => Some(value.as_str()),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            AttributeValue::Bool(value) => Some(*value),
            _ => None,
        }
    }

    /// Equality used by queries: numbers compare numerically across int/float
    /// and text compares without regard to ASCII case.
    pub fn loosely_eq(&self, other: &AttributeValue) -> bool {
        if let (Some(a), Some(b)) = (self.as_f64(), other.as_f64()) {
            return a == b;
        }
        match (self, other) {
            (AttributeValue::Text(a), AttributeValue::Text(b)) => a.eq_ignore_ascii_case(b),
            (AttributeValue::Set(a), AttributeValue::List(b))
            | (AttributeValue::List(b), AttributeValue::Set(a)) => {
                a.len() == b.len() && b.iter().all(|item| contains_text(a, item))
            }
            _ => self == other,
        }
    }

    /// Ordering for numeric and textual values; `None` for everything else.
    pub fn compare(&self, other: &AttributeValue) -> Option<Ordering> {
        if let (Some(a), Some(b)) = (self.as_f64(), other.as_f64()) {
            return a.partial_cmp(&b);
        }
        match (self, other) {
            (AttributeValue::Text(a), AttributeValue::Text(b)) => {
                Some(a.to_ascii_lowercase().cmp(&b.to_ascii_lowercase()))
            }
            _ => None,
        }
    }

    /// Whether a set or list value contains `needle`. A list needle requires
    /// every element to be present.
    pub fn contains_value(&self, needle: &AttributeValue) -> bool {
        if let AttributeValue::List(items) = needle {
            return !items.is_empty() && items.iter().all(|item| self.contains_value(item));
        }
        if let AttributeValue::Set(items) = needle {
            return !items.is_empty()
                && items
                    .iter()
                    .all(|item| self.contains_value(&AttributeValue::Text(item.clone())));
        }
        match self {
            AttributeValue::Set(items) => contains_text(items, needle),
            AttributeValue::List(items) => items.iter().any(|item| item.loosely_eq(needle)),
            _ => false,
        }
    }

    /// Convert authoring JSON (archetype tables, scenario files) into a value.
    pub fn from_json(value: &serde_json::Value) -> Result<Self, String> {
        match value {
            serde_json::Value::Null => Err("null is not a valid attribute value".to_string()),
            serde_json::Value::Bool(flag) => Ok(AttributeValue::Bool(*flag)),
            serde_json::Value::Number(number) => {
                if let Some(int) = number.as_i64() {
                    Ok(AttributeValue::Int(int))
                } else if let Some(float) = number.as_f64() {
                    Ok(AttributeValue::Float(float))
                } else {
                    Err(format!("number {number} is out of range"))
                }
            }
            serde_json::Value::String(text) => Ok(AttributeValue::Text(text.clone())),
            serde_json::Value::Array(items) => {
                if items.iter().all(|item| item.is_string()) {
                    Ok(AttributeValue::Set(
                        items
                            .iter()
                            .filter_map(|item| item.as_str().map(str::to_string))
                            .collect(),
                    ))
                } else {
                    items
                        .iter()
                        .map(AttributeValue::from_json)
                        .collect::<Result<Vec<_>, _>>()
                        .map(AttributeValue::List)
                }
            }
            serde_json::Value::Object(map) => match (map.len(), map.get("ref")) {
                (1, Some(reference)) => reference
                    .as_u64()
                    .map(AttributeValue::Ref)
                    .ok_or_else(|| format!("reference {reference} is not an entity id")),
                _ => Err("objects are only supported as {\"ref\": <id>}".to_string()),
            },
        }
    }
}

fn contains_text(items: &BTreeSet<String>, needle: &AttributeValue) -> bool {
    match needle {
        AttributeValue::Text(text) => items.iter().any(|item| item.eq_ignore_ascii_case(text)),
        _ => false,
    }
}

impl fmt::Display for AttributeValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AttributeValue::Bool(value) => write!(f, "{value}"),
            AttributeValue::Int(value) => write!(f, "{value}"),
            AttributeValue::Float(value) => write!(f, "{value}"),
            AttributeValue::Text(value) => write!(f, "\"{value}\""),
            AttributeValue::Set(items) => {
                let joined: Vec<&str> = items.iter().map(String::as_str).collect();
                write!(f, "{{{}}}", joined.join(", "))
            }
            AttributeValue::List(items) => {
                let joined: Vec<String> = items.iter().map(ToString::to_string).collect();
                write!(f, "[{}]", joined.join(", "))
            }
            AttributeValue::Ref(id) => write!(f, "#{id}"),
        }
    }
}

/// Point-in-time structural copy of one entity and everything it owns.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EntityState {
    pub id: u64,
    pub name: String,
    pub kind: String,
    pub sprite: Option<String>,
    pub x: i32,
    pub y: i32,
    pub layer: Option<u8>,
    pub facing: Option<String>,
    pub flags: BTreeSet<String>,
    pub attributes: BTreeMap<String, AttributeValue>,
    pub contents: Vec<EntityState>,
    pub parts: Vec<EntityState>,
}

impl EntityState {
    /// Look up a property the way measurement queries see it: structural
    /// fields first, then the attribute bag, then capability flags.
    pub fn property(&self, name: &str) -> Option<AttributeValue> {
        match name {
            "id" => return Some(AttributeValue::Int(self.id as i64)),
            "name" => return Some(AttributeValue::Text(self.name.clone())),
            "type" | "kind" => return Some(AttributeValue::Text(self.kind.clone())),
            "x" => return Some(AttributeValue::Int(self.x as i64)),
            "y" => return Some(AttributeValue::Int(self.y as i64)),
            _ => {}
        }
        if let Some(value) = self.attributes.get(name) {
            return Some(value.clone());
        }
        if self.flags.contains(name) {
            return Some(AttributeValue::Bool(true));
        }
        if FLAG_NAMES.contains(&name) {
            return Some(AttributeValue::Bool(false));
        }
        None
    }

    /// Pre-order walk over this entity, its contents and its parts.
    pub fn descendants(&self) -> Vec<&EntityState> {
        let mut out = Vec::new();
        self.collect_into(&mut out);
        out
    }

    fn collect_into<'a>(&'a self, out: &mut Vec<&'a EntityState>) {
        out.push(self);
        for child in &self.contents {
            child.collect_into(out);
        }
        for part in &self.parts {
            part.collect_into(out);
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FeedPostKind {
    Update,
    Article,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FeedPost {
    pub id: u64,
    pub kind: FeedPostKind,
    pub author_id: u64,
    pub author_name: String,
    pub tick: u64,
    pub title: Option<String>,
    pub content: String,
}

/// Discovery feed contents carried alongside each tick snapshot.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FeedState {
    pub posts: Vec<FeedPost>,
    pub next_post_id: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskScore {
    pub name: String,
    pub score: f64,
}

/// Full structural copy of the world for one tick.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TickSnapshot {
    pub tick: u64,
    pub grid_size_x: u32,
    pub grid_size_y: u32,
    /// Indexed `grid[x][y]`; each tile lists its top-level entities bottom layer first.
    pub grid: Vec<Vec<Vec<EntityState>>>,
    /// Entities that exist but are not owned by a tile, container or whole.
    pub unplaced: Vec<EntityState>,
    pub auxiliary_feed_state: FeedState,
    pub task_scores: Vec<TaskScore>,
    pub runtime_seconds: f64,
    pub hash: u64,
}

impl TickSnapshot {
    pub fn finalize(mut self) -> Self {
        self.hash = hash_snapshot(&self);
        self
    }

    /// Every entity in the snapshot, including nested contents and parts.
    pub fn entities(&self) -> Vec<&EntityState> {
        let mut out = Vec::new();
        for column in &self.grid {
            for tile in column {
                for entity in tile {
                    entity.collect_into(&mut out);
                }
            }
        }
        for entity in &self.unplaced {
            entity.collect_into(&mut out);
        }
        out
    }

    pub fn find(&self, id: u64) -> Option<&EntityState> {
        self.entities().into_iter().find(|entity| entity.id == id)
    }

    pub fn tile(&self, x: i32, y: i32) -> Option<&[EntityState]> {
        if x < 0 || y < 0 {
            return None;
        }
        self.grid
            .get(x as usize)
            .and_then(|column| column.get(y as usize))
            .map(Vec::as_slice)
    }
}

/// Deterministic content hash; wall-clock runtime is excluded.
pub fn hash_snapshot(snapshot: &TickSnapshot) -> u64 {
    let mut clone = snapshot.clone();
    clone.hash = 0;
    clone.runtime_seconds = 0.0;
    let encoded = bincode::serialize(&clone).expect("snapshot serialization for hashing");
    let mut hasher = RandomState::with_seeds(0, 0, 0, 0).build_hasher();
    hasher.write(&encoded);
    hasher.finish()
}

#[derive(Debug, Error)]
pub enum SnapshotCodecError {
    #[error("bincode encoding failed: {0}")]
    Encode(#[source] bincode::Error),
    #[error("bincode decoding failed: {0}")]
    Decode(#[source] bincode::Error),
    #[error("json codec failed: {0}")]
    Json(#[from] serde_json::Error),
    #[error("zstd compression failed: {0}")]
    Compress(#[source] std::io::Error),
    #[error("zstd decompression failed: {0}")]
    Decompress(#[source] std::io::Error),
}

/// Serialize with bincode and compress with zstd.
pub fn encode_snapshot(snapshot: &TickSnapshot, level: i32) -> Result<Vec<u8>, SnapshotCodecError> {
    let serialized = bincode::serialize(snapshot).map_err(SnapshotCodecError::Encode)?;
    zstd::encode_all(&serialized[..], level).map_err(SnapshotCodecError::Compress)
}

pub fn decode_snapshot(bytes: &[u8]) -> Result<TickSnapshot, SnapshotCodecError> {
    let serialized = zstd::decode_all(bytes).map_err(SnapshotCodecError::Decompress)?;
    bincode::deserialize(&serialized).map_err(SnapshotCodecError::Decode)
}

pub fn encode_snapshot_json(snapshot: &TickSnapshot) -> serde_json::Result<String> {
    serde_json::to_string(snapshot)
}

pub fn decode_snapshot_json(data: &str) -> serde_json::Result<TickSnapshot> {
    serde_json::from_str(data)
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunMetadata {
    pub run_name: String,
    pub scenario: String,
    pub seed: u64,
    pub grid_size_x: u32,
    pub grid_size_y: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportHeader {
    pub tick_range_start: u64,
    pub tick_range_end: u64,
    pub part_index: u32,
    pub part_count: u32,
    #[serde(flatten)]
    pub run: RunMetadata,
}

/// One size-bounded slice of a bulk history export.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExportPart {
    pub header: ExportHeader,
    pub ticks: Vec<TickSnapshot>,
}

/// Export parts are JSON for downstream tooling, compressed independently.
pub fn encode_export_part(part: &ExportPart, level: i32) -> Result<Vec<u8>, SnapshotCodecError> {
    let json = serde_json::to_vec(part)?;
    zstd::encode_all(&json[..], level).map_err(SnapshotCodecError::Compress)
}

pub fn decode_export_part(bytes: &[u8]) -> Result<ExportPart, SnapshotCodecError> {
    let json = zstd::decode_all(bytes).map_err(SnapshotCodecError::Decompress)?;
    Ok(serde_json::from_slice(&json)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mushroom(id: u64, color: &str) -> EntityState {
        let mut attributes = BTreeMap::new();
        attributes.insert("color".to_string(), AttributeValue::text(color));
        EntityState {
            id,
            name: format!("{color} mushroom"),
            kind: "mushroom".to_string(),
            sprite: None,
            x: 1,
            y: 2,
            layer: Some(3),
            facing: None,
            flags: ["isEdible".to_string()].into_iter().collect(),
            attributes,
            contents: Vec::new(),
            parts: Vec::new(),
        }
    }

    fn snapshot_with(entities: Vec<EntityState>) -> TickSnapshot {
        TickSnapshot {
            tick: 7,
            grid_size_x: 2,
            grid_size_y: 3,
            grid: vec![vec![Vec::new(); 3], vec![Vec::new(), Vec::new(), entities]],
            unplaced: Vec::new(),
            auxiliary_feed_state: FeedState::default(),
            task_scores: Vec::new(),
            runtime_seconds: 0.5,
            hash: 0,
        }
        .finalize()
    }

    #[test]
    fn property_lookup_prefers_attributes_then_flags() {
        let entity = mushroom(4, "red");
        assert_eq!(entity.property("color"), Some(AttributeValue::text("red")));
        assert_eq!(entity.property("isEdible"), Some(AttributeValue::Bool(true)));
        assert_eq!(entity.property("isMovable"), Some(AttributeValue::Bool(false)));
        assert_eq!(entity.property("type"), Some(AttributeValue::text("mushroom")));
        assert_eq!(entity.property("weight"), None);
    }

    #[test]
    fn loose_equality_crosses_numeric_types_and_case() {
        assert!(AttributeValue::Int(2).loosely_eq(&AttributeValue::Float(2.0)));
        assert!(AttributeValue::text("Red").loosely_eq(&AttributeValue::text("red")));
        assert!(!AttributeValue::Bool(true).loosely_eq(&AttributeValue::Int(1)));
        assert_eq!(
            AttributeValue::Int(3).compare(&AttributeValue::Float(2.5)),
            Some(Ordering::Greater)
        );
        assert_eq!(AttributeValue::Bool(true).compare(&AttributeValue::Bool(false)), None);
    }

    #[test]
    fn contains_value_handles_sets_and_lists() {
        let set = AttributeValue::Set(["iron".to_string(), "copper".to_string()].into());
        assert!(set.contains_value(&AttributeValue::text("IRON")));
        assert!(set.contains_value(&AttributeValue::List(vec![
            AttributeValue::text("iron"),
            AttributeValue::text("copper"),
        ])));
        assert!(!set.contains_value(&AttributeValue::text("tin")));
        assert!(!AttributeValue::Int(3).contains_value(&AttributeValue::Int(3)));
    }

    #[test]
    fn json_authoring_values_convert() {
        let json = serde_json::json!({
            "flag": true,
            "count": 3,
            "ratio": 0.5,
            "tags": ["a", "b"],
            "mixed": [1, "x"],
            "owner": {"ref": 12}
        });
        let map = json.as_object().expect("object");
        assert_eq!(
            AttributeValue::from_json(&map["flag"]),
            Ok(AttributeValue::Bool(true))
        );
        assert_eq!(AttributeValue::from_json(&map["count"]), Ok(AttributeValue::Int(3)));
        assert_eq!(
            AttributeValue::from_json(&map["ratio"]),
            Ok(AttributeValue::Float(0.5))
        );
        assert!(matches!(
            AttributeValue::from_json(&map["tags"]),
            Ok(AttributeValue::Set(_))
        ));
        assert!(matches!(
            AttributeValue::from_json(&map["mixed"]),
            Ok(AttributeValue::List(_))
        ));
        assert_eq!(AttributeValue::from_json(&map["owner"]), Ok(AttributeValue::Ref(12)));
        assert!(AttributeValue::from_json(&serde_json::Value::Null).is_err());
    }

    #[test]
    fn hash_ignores_runtime_seconds() {
        let a = snapshot_with(vec![mushroom(1, "red")]);
        let mut b = a.clone();
        b.runtime_seconds = 42.0;
        assert_eq!(hash_snapshot(&a), hash_snapshot(&b));

        let c = snapshot_with(vec![mushroom(1, "blue")]);
        assert_ne!(a.hash, c.hash);
    }

    #[test]
    fn compressed_snapshot_round_trips_nested_entities() {
        let mut chest = mushroom(10, "brown");
        chest.contents.push(mushroom(11, "red"));
        chest.contents[0].parts.push(mushroom(12, "white"));
        let snapshot = snapshot_with(vec![chest]);

        let bytes = encode_snapshot(&snapshot, DEFAULT_COMPRESSION_LEVEL).expect("encode");
        let decoded = decode_snapshot(&bytes).expect("decode");
        assert_eq!(decoded, snapshot);
        assert_eq!(decoded.entities().len(), 3);
        assert_eq!(decoded.find(12).map(|e| e.name.as_str()), Some("white mushroom"));
        assert_eq!(decoded.tile(1, 2).map(<[EntityState]>::len), Some(1));
    }

    #[test]
    fn export_part_header_is_flat_json() {
        let part = ExportPart {
            header: ExportHeader {
                tick_range_start: 1,
                tick_range_end: 1,
                part_index: 0,
                part_count: 1,
                run: RunMetadata {
                    run_name: "demo".to_string(),
                    ..RunMetadata::default()
                },
            },
            ticks: vec![snapshot_with(Vec::new())],
        };
        let json = serde_json::to_value(&part).expect("json");
        assert_eq!(json["header"]["tickRangeStart"], 1);
        assert_eq!(json["header"]["runName"], "demo");
        assert!(json["ticks"][0]["auxiliaryFeedState"].is_object());

        let bytes = encode_export_part(&part, DEFAULT_COMPRESSION_LEVEL).expect("encode");
        assert_eq!(decode_export_part(&bytes).expect("decode"), part);
    }
}
