//! Measurement and hypothesis queries scored against a tick snapshot.
//!
//! A [`Measurement`] selects a subject set with an [`ObjectReference`] and
//! checks one [`ObjectProperty`] claim over it. Evaluation is a pure function
//! of the query and the snapshot; the live world is never consulted.

use std::cmp::Ordering;
use std::fmt;

use serde::{Deserialize, Deserializer};
use sim_runtime::{AttributeValue, EntityState, TickSnapshot};

use crate::{history::HistoryError, World};

/// Exactly one way of picking candidate entities.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReferenceSelector {
    Id(u64),
    Name(String),
    #[serde(alias = "type")]
    Kind(String),
}

impl ReferenceSelector {
    fn selects(&self, entity: &EntityState) -> bool {
        match self {
            ReferenceSelector::Id(id) => entity.id == *id,
            ReferenceSelector::Name(name) => entity.name == *name,
            ReferenceSelector::Kind(kind) => entity.kind == *kind,
        }
    }
}

impl fmt::Display for ReferenceSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReferenceSelector::Id(id) => write!(f, "id == {id}"),
            ReferenceSelector::Name(name) => write!(f, "name == \"{name}\""),
            ReferenceSelector::Kind(kind) => write!(f, "kind == \"{kind}\""),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Operator {
    Equals,
    LessThan,
    GreaterThan,
    Le,
    Ge,
    NotEqual,
    ContainsList,
}

impl Operator {
    pub fn name(self) -> &'static str {
        match self {
            Operator::Equals => "EQUALS",
            Operator::LessThan => "LESS_THAN",
            Operator::GreaterThan => "GREATER_THAN",
            Operator::Le => "LE",
            Operator::Ge => "GE",
            Operator::NotEqual => "NOT_EQUAL",
            Operator::ContainsList => "CONTAINS_LIST",
        }
    }

    /// Apply to `actual` (the entity's value) and `claim`.
    pub fn holds(self, actual: &AttributeValue, claim: &AttributeValue) -> bool {
        match self {
            Operator::Equals => actual.loosely_eq(claim),
            Operator::NotEqual => !actual.loosely_eq(claim),
            Operator::LessThan => actual.compare(claim) == Some(Ordering::Less),
            Operator::GreaterThan => actual.compare(claim) == Some(Ordering::Greater),
            Operator::Le => matches!(
                actual.compare(claim),
                Some(Ordering::Less | Ordering::Equal)
            ),
            Operator::Ge => matches!(
                actual.compare(claim),
                Some(Ordering::Greater | Ordering::Equal)
            ),
            Operator::ContainsList => actual.contains_value(claim),
        }
    }
}

impl fmt::Display for Operator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// `name operator value`, checked against a snapshot entity.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ObjectProperty {
    pub name: String,
    pub operator: Operator,
    #[serde(deserialize_with = "claim_value")]
    pub value: AttributeValue,
}

#[derive(Debug, Clone, PartialEq)]
enum Check {
    Holds(AttributeValue),
    Fails(AttributeValue),
    Missing,
}

impl ObjectProperty {
    pub fn new(name: impl Into<String>, operator: Operator, value: AttributeValue) -> Self {
        Self {
            name: name.into(),
            operator,
            value,
        }
    }

    /// Entities lacking the property never satisfy it, whatever the operator.
    pub fn matches(&self, entity: &EntityState) -> bool {
        matches!(self.check(entity), Check::Holds(_))
    }

    fn check(&self, entity: &EntityState) -> Check {
        match entity.property(&self.name) {
            Some(actual) if self.operator.holds(&actual, &self.value) => Check::Holds(actual),
            Some(actual) => Check::Fails(actual),
            None => Check::Missing,
        }
    }
}

impl fmt::Display for ObjectProperty {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} {}", self.name, self.operator, self.value)
    }
}

fn claim_value<'de, D>(deserializer: D) -> Result<AttributeValue, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = serde_json::Value::deserialize(deserializer)?;
    AttributeValue::from_json(&raw).map_err(serde::de::Error::custom)
}

/// Selector plus narrowing predicates.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ObjectReference {
    pub selector: ReferenceSelector,
    #[serde(default)]
    pub properties: Vec<ObjectProperty>,
}

impl ObjectReference {
    pub fn new(selector: ReferenceSelector) -> Self {
        Self {
            selector,
            properties: Vec::new(),
        }
    }

    pub fn with_property(mut self, property: ObjectProperty) -> Self {
        self.properties.push(property);
        self
    }

    /// Matching snapshot entities, in snapshot walk order.
    pub fn resolve<'a>(&self, snapshot: &'a TickSnapshot) -> Vec<&'a EntityState> {
        snapshot
            .entities()
            .into_iter()
            .filter(|entity| self.selector.selects(entity))
            .filter(|entity| self.properties.iter().all(|property| property.matches(entity)))
            .collect()
    }
}

impl fmt::Display for ObjectReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.selector)?;
        for (index, property) in self.properties.iter().enumerate() {
            let joiner = if index == 0 { " where " } else { " and " };
            write!(f, "{joiner}{property}")?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Measurement {
    pub reference: ObjectReference,
    pub property: ObjectProperty,
}

#[derive(Debug, Clone, PartialEq)]
pub struct MeasurementScore {
    pub tick: u64,
    pub score: f64,
    pub matched: usize,
    pub satisfied: usize,
    pub justification: Vec<String>,
}

impl MeasurementScore {
    pub fn justification_text(&self) -> String {
        self.justification.join("\n")
    }
}

impl Measurement {
    pub fn new(reference: ObjectReference, property: ObjectProperty) -> Self {
        Self {
            reference,
            property,
        }
    }

    /// Fraction of referenced entities satisfying the claim; 0 when the
    /// reference selects nothing.
    pub fn evaluate(&self, snapshot: &TickSnapshot) -> MeasurementScore {
        let subjects = self.reference.resolve(snapshot);
        let mut justification = vec![format!(
            "tick {}: reference {} matched {} entit{}",
            snapshot.tick,
            self.reference,
            subjects.len(),
            if subjects.len() == 1 { "y" } else { "ies" }
        )];
        if subjects.is_empty() {
            justification.push("no entity matches the reference; score 0".to_string());
            return MeasurementScore {
                tick: snapshot.tick,
                score: 0.0,
                matched: 0,
                satisfied: 0,
                justification,
            };
        }

        let mut satisfied = 0;
        for entity in &subjects {
            let line = match self.property.check(entity) {
                Check::Holds(actual) => {
                    satisfied += 1;
                    format!(
                        "#{} {}: {} = {} satisfies {}",
                        entity.id, entity.name, self.property.name, actual, self.property
                    )
                }
                Check::Fails(actual) => format!(
                    "#{} {}: {} = {} fails {}",
                    entity.id, entity.name, self.property.name, actual, self.property
                ),
                Check::Missing => format!(
                    "#{} {}: has no {}",
                    entity.id, entity.name, self.property.name
                ),
            };
            justification.push(line);
        }
        let score = satisfied as f64 / subjects.len() as f64;
        justification.push(format!("score {satisfied}/{} = {score}", subjects.len()));
        MeasurementScore {
            tick: snapshot.tick,
            score,
            matched: subjects.len(),
            satisfied,
            justification,
        }
    }
}

/// A named conjunction of measurements.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Hypothesis {
    pub name: String,
    pub measurements: Vec<Measurement>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct HypothesisScore {
    pub name: String,
    pub score: f64,
    /// Every measurement scored exactly 1. An empty hypothesis is unsupported.
    pub supported: bool,
    pub measurements: Vec<MeasurementScore>,
}

impl Hypothesis {
    pub fn evaluate(&self, snapshot: &TickSnapshot) -> HypothesisScore {
        let measurements: Vec<MeasurementScore> = self
            .measurements
            .iter()
            .map(|measurement| measurement.evaluate(snapshot))
            .collect();
        let score = if measurements.is_empty() {
            0.0
        } else {
            measurements.iter().map(|m| m.score).sum::<f64>() / measurements.len() as f64
        };
        let supported = !measurements.is_empty() && measurements.iter().all(|m| m.score == 1.0);
        HypothesisScore {
            name: self.name.clone(),
            score,
            supported,
            measurements,
        }
    }
}

impl World {
    /// Score `measurement` against the recorded snapshot for `tick`.
    pub fn evaluate_measurement(
        &self,
        measurement: &Measurement,
        tick: u64,
    ) -> Result<MeasurementScore, HistoryError> {
        let snapshot = self.history.at(tick)?;
        Ok(measurement.evaluate(&snapshot))
    }

    pub fn evaluate_hypothesis(
        &self,
        hypothesis: &Hypothesis,
        tick: u64,
    ) -> Result<HypothesisScore, HistoryError> {
        let snapshot = self.history.at(tick)?;
        Ok(hypothesis.evaluate(&snapshot))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::{BTreeMap, BTreeSet};

    use sim_runtime::FeedState;

    fn mushroom(id: u64, name: &str, color: Option<&str>, radius: i64) -> EntityState {
        let mut attributes = BTreeMap::new();
        if let Some(color) = color {
            attributes.insert("color".to_string(), AttributeValue::text(color));
        }
        attributes.insert("cap_radius".to_string(), AttributeValue::Int(radius));
        attributes.insert(
            "habitats".to_string(),
            AttributeValue::Set(BTreeSet::from(["cave".to_string(), "forest".to_string()])),
        );
        EntityState {
            id,
            name: name.to_string(),
            kind: "mushroom".to_string(),
            sprite: None,
            x: id as i32,
            y: 0,
            layer: Some(3),
            facing: None,
            flags: BTreeSet::from(["isEdible".to_string()]),
            attributes,
            contents: Vec::new(),
            parts: Vec::new(),
        }
    }

    fn snapshot() -> TickSnapshot {
        let mut grid = vec![vec![Vec::new(); 1]; 5];
        grid[1][0].push(mushroom(11, "red_mushroom", Some("red"), 3));
        grid[2][0].push(mushroom(12, "blue_mushroom", Some("blue"), 2));
        grid[3][0].push(mushroom(13, "yellow_mushroom", Some("yellow"), 4));
        grid[4][0].push(mushroom(14, "white_mushroom", None, 1));
        TickSnapshot {
            tick: 7,
            grid_size_x: 5,
            grid_size_y: 1,
            grid,
            unplaced: Vec::new(),
            auxiliary_feed_state: FeedState::default(),
            task_scores: Vec::new(),
            runtime_seconds: 0.0,
            hash: 0,
        }
    }

    fn color_is_red() -> Measurement {
        Measurement::new(
            ObjectReference::new(ReferenceSelector::Kind("mushroom".to_string())),
            ObjectProperty::new("color", Operator::Equals, AttributeValue::text("red")),
        )
    }

    #[test]
    fn one_red_mushroom_in_four_scores_a_quarter() {
        let score = color_is_red().evaluate(&snapshot());
        assert_eq!(score.score, 0.25);
        assert_eq!(score.matched, 4);
        assert_eq!(score.satisfied, 1);
        insta::assert_snapshot!(score.justification_text(), @r###"
        tick 7: reference kind == "mushroom" matched 4 entities
        #11 red_mushroom: color = "red" satisfies color EQUALS "red"
        #12 blue_mushroom: color = "blue" fails color EQUALS "red"
        #13 yellow_mushroom: color = "yellow" fails color EQUALS "red"
        #14 white_mushroom: has no color
        score 1/4 = 0.25
        "###);
    }

    #[test]
    fn empty_reference_scores_zero() {
        let measurement = Measurement::new(
            ObjectReference::new(ReferenceSelector::Name("toadstool".to_string())),
            ObjectProperty::new("color", Operator::Equals, AttributeValue::text("red")),
        );
        let score = measurement.evaluate(&snapshot());
        assert_eq!(score.score, 0.0);
        assert_eq!(score.matched, 0);
        assert_eq!(score.justification.len(), 2);
    }

    #[test]
    fn narrowing_properties_and_ordering_operators() {
        let reference = ObjectReference::new(ReferenceSelector::Kind("mushroom".to_string()))
            .with_property(ObjectProperty::new(
                "cap_radius",
                Operator::Ge,
                AttributeValue::Int(3),
            ));
        let snapshot = snapshot();
        let ids: Vec<u64> = reference.resolve(&snapshot).iter().map(|e| e.id).collect();
        assert_eq!(ids, vec![11, 13]);

        let measurement = Measurement::new(
            reference,
            ObjectProperty::new("cap_radius", Operator::LessThan, AttributeValue::Float(3.5)),
        );
        assert_eq!(measurement.evaluate(&snapshot).score, 0.5);
    }

    #[test]
    fn contains_list_requires_every_element() {
        let snapshot = snapshot();
        let reference = ObjectReference::new(ReferenceSelector::Id(12));
        let both = Measurement::new(
            reference.clone(),
            ObjectProperty::new(
                "habitats",
                Operator::ContainsList,
                AttributeValue::Set(BTreeSet::from(["forest".to_string(), "cave".to_string()])),
            ),
        );
        assert_eq!(both.evaluate(&snapshot).score, 1.0);
        let with_extra = Measurement::new(
            reference,
            ObjectProperty::new(
                "habitats",
                Operator::ContainsList,
                AttributeValue::Set(BTreeSet::from(["forest".to_string(), "swamp".to_string()])),
            ),
        );
        assert_eq!(with_extra.evaluate(&snapshot).score, 0.0);
    }

    #[test]
    fn hypotheses_need_every_measurement() {
        let json = r#"{
            "name": "edible mushrooms",
            "measurements": [
                {"reference": {"selector": {"type": "mushroom"}},
                 "property": {"name": "isEdible", "operator": "EQUALS", "value": true}},
                {"reference": {"selector": {"kind": "mushroom"}},
                 "property": {"name": "color", "operator": "NOT_EQUAL", "value": "purple"}}
            ]
        }"#;
        let hypothesis: Hypothesis = serde_json::from_str(json).expect("hypothesis parses");
        let score = hypothesis.evaluate(&snapshot());
        assert!(!score.supported);
        assert_eq!(score.measurements[0].score, 1.0);
        assert_eq!(score.measurements[1].score, 0.75);
        assert!((score.score - 0.875).abs() < 1e-9);

        let empty = Hypothesis {
            name: "nothing".to_string(),
            measurements: Vec::new(),
        };
        let score = empty.evaluate(&snapshot());
        assert_eq!(score.score, 0.0);
        assert!(!score.supported);
    }
}
