//! Aggregation stage vocabulary.
//!
//! Stages serialize to document-store notation so a pipeline can be logged or
//! shipped to an engine verbatim:
//!
//! ```json
//! [{"$match": {"@type": "Receive"}}, {"$unwind": "$devices"}]
//! ```

use chrono::{DateTime, SecondsFormat, Utc};
use serde::ser::{SerializeMap, Serializer};
use serde::Serialize;
use serde_json::Value;

/// Dotted path to a document field, e.g. `_id.month`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FieldPath(String);

impl FieldPath {
    pub fn new(path: impl Into<String>) -> Self {
        Self(path.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn segments(&self) -> impl Iterator<Item = &str> {
        self.0.split('.')
    }
}

impl Serialize for FieldPath {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&format!("${}", self.0))
    }
}

/// Constant value used in filters and expressions.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Literal {
    Null,
    Bool(bool),
    Int(i64),
    String(String),
    Timestamp(DateTime<Utc>),
}

impl Literal {
    /// Plain JSON form; timestamps become RFC 3339 strings as stored in
    /// event documents.
    pub fn to_json(&self) -> Value {
        match self {
            Literal::Null => Value::Null,
            Literal::Bool(b) => Value::Bool(*b),
            Literal::Int(n) => Value::from(*n),
            Literal::String(s) => Value::String(s.clone()),
            Literal::Timestamp(t) => Value::String(rfc3339(t)),
        }
    }
}

impl From<&str> for Literal {
    fn from(s: &str) -> Self {
        Literal::String(s.to_string())
    }
}

impl From<DateTime<Utc>> for Literal {
    fn from(t: DateTime<Utc>) -> Self {
        Literal::Timestamp(t)
    }
}

impl Serialize for Literal {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Literal::Timestamp(t) => {
                let mut map = serializer.serialize_map(Some(1))?;
                map.serialize_entry("$date", &rfc3339(t))?;
                map.end()
            }
            other => other.to_json().serialize(serializer),
        }
    }
}

fn rfc3339(t: &DateTime<Utc>) -> String {
    t.to_rfc3339_opts(SecondsFormat::Secs, true)
}

/// Predicate on a single field.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Condition {
    Eq(Literal),
    Gte(Literal),
}

impl Serialize for Condition {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Condition::Eq(lit) => lit.serialize(serializer),
            Condition::Gte(lit) => {
                let mut map = serializer.serialize_map(Some(1))?;
                map.serialize_entry("$gte", lit)?;
                map.end()
            }
        }
    }
}

/// Conjunction of field conditions evaluated by a single match stage.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct Filter {
    conditions: Vec<(FieldPath, Condition)>,
}

impl Filter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn where_eq(mut self, field: &str, value: impl Into<Literal>) -> Self {
        self.conditions
            .push((FieldPath::new(field), Condition::Eq(value.into())));
        self
    }

    pub fn where_gte(mut self, field: &str, value: impl Into<Literal>) -> Self {
        self.conditions
            .push((FieldPath::new(field), Condition::Gte(value.into())));
        self
    }

    pub fn conditions(&self) -> &[(FieldPath, Condition)] {
        &self.conditions
    }

    /// Condition attached to `field`, if any.
    pub fn condition_for(&self, field: &str) -> Option<&Condition> {
        self.conditions
            .iter()
            .find(|(path, _)| path.as_str() == field)
            .map(|(_, cond)| cond)
    }
}

impl Serialize for Filter {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.conditions.len()))?;
        for (field, cond) in &self.conditions {
            map.serialize_entry(field.as_str(), cond)?;
        }
        map.end()
    }
}

/// Value expression evaluated against one document.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Expr {
    Field(FieldPath),
    Literal(Literal),
    /// Calendar month (1-12) of a timestamp field.
    Month(FieldPath),
    /// Length of an array.
    Size(Box<Expr>),
    /// Element of an array field; missing when out of range.
    ArrayElemAt(FieldPath, usize),
}

impl Expr {
    pub fn field(path: &str) -> Self {
        Expr::Field(FieldPath::new(path))
    }
}

impl Serialize for Expr {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Expr::Field(path) => path.serialize(serializer),
            Expr::Literal(lit) => single_entry(serializer, "$literal", lit),
            Expr::Month(path) => single_entry(serializer, "$month", path),
            Expr::Size(inner) => single_entry(serializer, "$size", inner.as_ref()),
            Expr::ArrayElemAt(path, idx) => single_entry(serializer, "$arrayElemAt", &(path, idx)),
        }
    }
}

fn single_entry<S: Serializer, V: Serialize + ?Sized>(
    serializer: S,
    key: &str,
    value: &V,
) -> Result<S::Ok, S::Error> {
    let mut map = serializer.serialize_map(Some(1))?;
    map.serialize_entry(key, value)?;
    map.end()
}

/// Grouping key: either one expression or a compound document of named
/// expressions.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum GroupId {
    Expr(Expr),
    Fields(Vec<(String, Expr)>),
}

impl Serialize for GroupId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            GroupId::Expr(expr) => expr.serialize(serializer),
            GroupId::Fields(fields) => serialize_named(serializer, fields),
        }
    }
}

fn serialize_named<S: Serializer, V: Serialize>(
    serializer: S,
    fields: &[(String, V)],
) -> Result<S::Ok, S::Error> {
    let mut map = serializer.serialize_map(Some(fields.len()))?;
    for (name, value) in fields {
        map.serialize_entry(name, value)?;
    }
    map.end()
}

/// Per-group accumulator.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Accumulator {
    /// Collect values in arrival order.
    Push(Expr),
    /// Add a constant per document.
    Sum(i64),
}

impl Serialize for Accumulator {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Accumulator::Push(expr) => single_entry(serializer, "$push", expr),
            Accumulator::Sum(n) => single_entry(serializer, "$sum", n),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Group {
    pub id: GroupId,
    pub accumulators: Vec<(String, Accumulator)>,
}

impl Serialize for Group {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.accumulators.len() + 1))?;
        map.serialize_entry("_id", &self.id)?;
        for (name, acc) in &self.accumulators {
            map.serialize_entry(name, acc)?;
        }
        map.end()
    }
}

/// Output document shape. Only the listed fields survive the stage.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Projection {
    pub fields: Vec<(String, Expr)>,
}

impl Serialize for Projection {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serialize_named(serializer, &self.fields)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SortOrder {
    Ascending,
    Descending,
}

impl Serialize for SortOrder {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            SortOrder::Ascending => serializer.serialize_i8(1),
            SortOrder::Descending => serializer.serialize_i8(-1),
        }
    }
}

/// Ordered sort keys; earlier keys take precedence.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SortSpec(pub Vec<(FieldPath, SortOrder)>);

impl Serialize for SortSpec {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.0.len()))?;
        for (field, order) in &self.0 {
            map.serialize_entry(field.as_str(), order)?;
        }
        map.end()
    }
}

/// One stage of an aggregation pipeline.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub enum Stage {
    #[serde(rename = "$match")]
    Match(Filter),
    #[serde(rename = "$unwind")]
    Unwind(FieldPath),
    #[serde(rename = "$group")]
    Group(Group),
    #[serde(rename = "$project")]
    Project(Projection),
    #[serde(rename = "$sort")]
    Sort(SortSpec),
}

impl Stage {
    pub fn name(&self) -> &'static str {
        match self {
            Stage::Match(_) => "$match",
            Stage::Unwind(_) => "$unwind",
            Stage::Group(_) => "$group",
            Stage::Project(_) => "$project",
            Stage::Sort(_) => "$sort",
        }
    }
}
