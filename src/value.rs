//! Payload values carried by ledger events.
//!
//! Event payloads are trees: records of named fields whose leaves are
//! primitives, identifiers, or further records and lists. The set of leaf
//! kinds is closed so matchers and the capture store can match on it
//! exhaustively.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::error::ValidationError;
use crate::event::{ContractId, Party};

/// Discriminant of a [`Value`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValueKind {
    Unit,
    Bool,
    Text,
    Int,
    Decimal,
    Party,
    ContractId,
    Timestamp,
    Date,
    Record,
    List,
    Optional,
    Variant,
    Enum,
}

impl ValueKind {
    /// Kinds with a total order usable by comparison clauses.
    #[must_use]
    pub const fn is_orderable(self) -> bool {
        matches!(self, Self::Int | Self::Decimal | Self::Timestamp | Self::Date)
    }

    /// Kinds whose leaves are rendered as plain text for regex clauses.
    #[must_use]
    pub const fn is_textual(self) -> bool {
        matches!(self, Self::Text | Self::Party | Self::ContractId | Self::Enum)
    }

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Unit => "unit",
            Self::Bool => "bool",
            Self::Text => "text",
            Self::Int => "int",
            Self::Decimal => "decimal",
            Self::Party => "party",
            Self::ContractId => "contract_id",
            Self::Timestamp => "timestamp",
            Self::Date => "date",
            Self::Record => "record",
            Self::List => "list",
            Self::Optional => "optional",
            Self::Variant => "variant",
            Self::Enum => "enum",
        }
    }
}

impl fmt::Display for ValueKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A payload value.
///
/// # Examples
///
/// ```
/// use ledger_observe::{Record, Value, ValueKind};
///
/// let record = Record::new().with("count", 3i64).with("note", "hi");
/// let value = Value::Record(record);
///
/// assert_eq!(value.kind(), ValueKind::Record);
/// assert_eq!(value.as_record().and_then(|r| r.field("count")), Some(&Value::Int(3)));
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum Value {
    Unit,
    Bool(bool),
    Text(String),
    Int(i64),
    Decimal(Decimal),
    Party(Party),
    ContractId(ContractId),
    Timestamp(DateTime<Utc>),
    Date(NaiveDate),
    Record(Record),
    List(Vec<Value>),
    Optional(Option<Box<Value>>),
    Variant {
        constructor: String,
        value: Box<Value>,
    },
    Enum(String),
}

impl Value {
    #[must_use]
    pub const fn kind(&self) -> ValueKind {
        match self {
            Self::Unit => ValueKind::Unit,
            Self::Bool(_) => ValueKind::Bool,
            Self::Text(_) => ValueKind::Text,
            Self::Int(_) => ValueKind::Int,
            Self::Decimal(_) => ValueKind::Decimal,
            Self::Party(_) => ValueKind::Party,
            Self::ContractId(_) => ValueKind::ContractId,
            Self::Timestamp(_) => ValueKind::Timestamp,
            Self::Date(_) => ValueKind::Date,
            Self::Record(_) => ValueKind::Record,
            Self::List(_) => ValueKind::List,
            Self::Optional(_) => ValueKind::Optional,
            Self::Variant { .. } => ValueKind::Variant,
            Self::Enum(_) => ValueKind::Enum,
        }
    }

    /// Returns a human-readable type name.
    #[must_use]
    pub const fn type_name(&self) -> &'static str {
        self.kind().as_str()
    }

    pub const fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(v) => Some(*v),
            _ => None,
        }
    }

    pub const fn as_int(&self) -> Option<i64> {
        match self {
            Self::Int(v) => Some(*v),
            _ => None,
        }
    }

    pub const fn as_decimal(&self) -> Option<Decimal> {
        match self {
            Self::Decimal(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(v) => Some(v),
            _ => None,
        }
    }

    pub const fn as_party(&self) -> Option<&Party> {
        match self {
            Self::Party(v) => Some(v),
            _ => None,
        }
    }

    pub const fn as_contract_id(&self) -> Option<&ContractId> {
        match self {
            Self::ContractId(v) => Some(v),
            _ => None,
        }
    }

    pub const fn as_record(&self) -> Option<&Record> {
        match self {
            Self::Record(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[Value]> {
        match self {
            Self::List(v) => Some(v),
            _ => None,
        }
    }

    /// Textual rendering of identifier-like leaves, used by regex clauses.
    #[must_use]
    pub fn as_textual(&self) -> Option<&str> {
        match self {
            Self::Text(v) | Self::Enum(v) => Some(v),
            Self::Party(p) => Some(p.as_str()),
            Self::ContractId(c) => Some(c.as_str()),
            _ => None,
        }
    }

    /// Looks through present optionals. An absent optional is returned as is.
    #[must_use]
    pub fn unwrap_optional(&self) -> &Self {
        match self {
            Self::Optional(Some(inner)) => inner.unwrap_optional(),
            other => other,
        }
    }

    /// Compares two values of the same orderable kind.
    ///
    /// Returns `None` across kinds or for kinds without an order.
    #[must_use]
    pub fn compare(&self, other: &Self) -> Option<std::cmp::Ordering> {
        match (self, other) {
            (Self::Int(a), Self::Int(b)) => Some(a.cmp(b)),
            (Self::Decimal(a), Self::Decimal(b)) => Some(a.cmp(b)),
            (Self::Timestamp(a), Self::Timestamp(b)) => Some(a.cmp(b)),
            (Self::Date(a), Self::Date(b)) => Some(a.cmp(b)),
            _ => None,
        }
    }

    /// Resolves a nested value.
    ///
    /// Optionals are transparent; a variant is entered either by naming its
    /// constructor or transparently.
    #[must_use]
    pub fn lookup(&self, path: &FieldPath) -> Option<&Value> {
        let mut current = self;
        for segment in path.segments() {
            current = step(current, segment)?;
        }
        Some(current)
    }
}

fn step<'a>(value: &'a Value, segment: &PathSegment) -> Option<&'a Value> {
    match (value, segment) {
        (Value::Record(r), PathSegment::Field(name)) => r.field(name),
        (Value::List(items), PathSegment::Index(i)) => items.get(*i),
        (Value::Optional(Some(inner)), _) => step(inner, segment),
        (Value::Variant { constructor, value }, PathSegment::Field(name)) if constructor == name => {
            Some(value)
        }
        (Value::Variant { value, .. }, _) => step(value, segment),
        _ => None,
    }
}

impl Default for Value {
    fn default() -> Self {
        Self::Unit
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unit => write!(f, "()"),
            Self::Bool(v) => write!(f, "{v}"),
            Self::Text(v) => write!(f, "{v:?}"),
            Self::Int(v) => write!(f, "{v}"),
            Self::Decimal(v) => write!(f, "{v}"),
            Self::Party(v) => write!(f, "party:{v}"),
            Self::ContractId(v) => write!(f, "cid:{v}"),
            Self::Timestamp(v) => write!(f, "{}", v.to_rfc3339()),
            Self::Date(v) => write!(f, "{v}"),
            Self::Record(v) => write!(f, "{v}"),
            Self::List(items) => {
                write!(f, "[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{item}")?;
                }
                write!(f, "]")
            }
            Self::Optional(None) => write!(f, "none"),
            Self::Optional(Some(v)) => write!(f, "some({v})"),
            Self::Variant { constructor, value } => write!(f, "{constructor}({value})"),
            Self::Enum(v) => write!(f, "{v}"),
        }
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Self::Int(i64::from(v))
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Self::Int(v)
    }
}

impl From<Decimal> for Value {
    fn from(v: Decimal) -> Self {
        Self::Decimal(v)
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Self::Text(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Self::Text(v.to_string())
    }
}

impl From<Party> for Value {
    fn from(v: Party) -> Self {
        Self::Party(v)
    }
}

impl From<ContractId> for Value {
    fn from(v: ContractId) -> Self {
        Self::ContractId(v)
    }
}

impl From<DateTime<Utc>> for Value {
    fn from(v: DateTime<Utc>) -> Self {
        Self::Timestamp(v)
    }
}

impl From<NaiveDate> for Value {
    fn from(v: NaiveDate) -> Self {
        Self::Date(v)
    }
}

impl From<Record> for Value {
    fn from(v: Record) -> Self {
        Self::Record(v)
    }
}

impl From<Vec<Value>> for Value {
    fn from(v: Vec<Value>) -> Self {
        Self::List(v)
    }
}

/// An ordered set of named fields.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Record {
    fields: Vec<(String, Value)>,
}

impl Record {
    #[must_use]
    pub const fn new() -> Self {
        Self { fields: Vec::new() }
    }

    /// Adds or replaces a field, keeping declaration order.
    #[must_use]
    pub fn with(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.set(name, value);
        self
    }

    pub fn set(&mut self, name: impl Into<String>, value: impl Into<Value>) {
        let name = name.into();
        let value = value.into();
        match self.fields.iter_mut().find(|(n, _)| *n == name) {
            Some((_, slot)) => *slot = value,
            None => self.fields.push((name, value)),
        }
    }

    #[must_use]
    pub fn field(&self, name: &str) -> Option<&Value> {
        self.fields.iter().find(|(n, _)| n == name).map(|(_, v)| v)
    }

    /// Resolves a dotted path relative to this record.
    #[must_use]
    pub fn path(&self, path: &FieldPath) -> Option<&Value> {
        let (first, rest) = path.segments().split_first()?;
        let PathSegment::Field(name) = first else {
            return None;
        };
        let mut current = self.field(name)?;
        for segment in rest {
            current = step(current, segment)?;
        }
        Some(current)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.fields.iter().map(|(n, v)| (n.as_str(), v))
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

impl fmt::Display for Record {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{{")?;
        for (i, (name, value)) in self.fields.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{name}: {value}")?;
        }
        write!(f, "}}")
    }
}

/// One step of a [`FieldPath`].
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum PathSegment {
    Field(String),
    Index(usize),
}

/// A dotted path into a payload, e.g. `terms.amount` or `items.0`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FieldPath {
    raw: String,
    segments: Vec<PathSegment>,
}

impl FieldPath {
    /// Parses a dotted path. Purely numeric segments index into lists.
    pub fn parse(raw: &str) -> Result<Self, ValidationError> {
        let raw = raw.trim();
        if raw.is_empty() {
            return Err(ValidationError::InvalidFieldPath {
                path: raw.to_string(),
                reason: "path is empty".to_string(),
            });
        }

        let mut segments = Vec::new();
        for part in raw.split('.') {
            let part = part.trim();
            if part.is_empty() {
                return Err(ValidationError::InvalidFieldPath {
                    path: raw.to_string(),
                    reason: "empty segment".to_string(),
                });
            }
            match part.parse::<usize>() {
                Ok(i) => segments.push(PathSegment::Index(i)),
                Err(_) => segments.push(PathSegment::Field(part.to_string())),
            }
        }

        Ok(Self {
            raw: raw.to_string(),
            segments,
        })
    }

    #[must_use]
    pub fn segments(&self) -> &[PathSegment] {
        &self.segments
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.raw
    }
}

impl FromStr for FieldPath {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for FieldPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Record {
        Record::new()
            .with("owner", Party::new("alice"))
            .with(
                "terms",
                Record::new()
                    .with("amount", Decimal::new(1050, 2))
                    .with("note", "rent"),
            )
            .with("items", vec![Value::Int(1), Value::Int(2)])
            .with("maybe", Value::Optional(Some(Box::new(Value::Record(Record::new().with("x", 7i64))))))
    }

    #[test]
    fn test_value_kind_and_accessors() {
        let val = Value::Int(42);
        assert_eq!(val.kind(), ValueKind::Int);
        assert_eq!(val.as_int(), Some(42));
        assert!(val.as_decimal().is_none());
        assert_eq!(val.type_name(), "int");
    }

    #[test]
    fn test_record_set_replaces_in_place() {
        let mut r = Record::new().with("a", 1i64).with("b", 2i64);
        r.set("a", 3i64);
        let names: Vec<&str> = r.iter().map(|(n, _)| n).collect();
        assert_eq!(names, vec!["a", "b"]);
        assert_eq!(r.field("a"), Some(&Value::Int(3)));
    }

    #[test]
    fn test_path_lookup_nested() {
        let r = sample();
        let amount = r.path(&FieldPath::parse("terms.amount").unwrap());
        assert_eq!(amount, Some(&Value::Decimal(Decimal::new(1050, 2))));

        let second = r.path(&FieldPath::parse("items.1").unwrap());
        assert_eq!(second, Some(&Value::Int(2)));

        let through_optional = r.path(&FieldPath::parse("maybe.x").unwrap());
        assert_eq!(through_optional, Some(&Value::Int(7)));

        assert!(r.path(&FieldPath::parse("terms.missing").unwrap()).is_none());
        assert!(r.path(&FieldPath::parse("items.9").unwrap()).is_none());
    }

    #[test]
    fn test_variant_lookup_by_constructor() {
        let v = Value::Variant {
            constructor: "Some".to_string(),
            value: Box::new(Value::Record(Record::new().with("n", 1i64))),
        };
        assert_eq!(v.lookup(&FieldPath::parse("Some.n").unwrap()), Some(&Value::Int(1)));
        assert_eq!(v.lookup(&FieldPath::parse("n").unwrap()), Some(&Value::Int(1)));
    }

    #[test]
    fn test_field_path_rejects_empty_segments() {
        assert!(FieldPath::parse("").is_err());
        assert!(FieldPath::parse("a..b").is_err());
        assert!(FieldPath::parse("a.").is_err());
    }

    #[test]
    fn test_unwrap_optional_layers() {
        let nested = Value::Optional(Some(Box::new(Value::Optional(Some(Box::new(Value::Int(3)))))));
        assert_eq!(nested.unwrap_optional(), &Value::Int(3));
        assert_eq!(Value::Optional(None).unwrap_optional(), &Value::Optional(None));
        assert_eq!(Value::Int(3).unwrap_optional(), &Value::Int(3));
    }

    #[test]
    fn test_compare_same_kind_only() {
        use std::cmp::Ordering;
        assert_eq!(Value::Int(1).compare(&Value::Int(2)), Some(Ordering::Less));
        assert_eq!(Value::Int(1).compare(&Value::Decimal(Decimal::ONE)), None);
        assert_eq!(Value::Text("a".into()).compare(&Value::Text("b".into())), None);
    }

    #[test]
    fn test_textual_rendering() {
        assert_eq!(Value::Party(Party::new("bob")).as_textual(), Some("bob"));
        assert_eq!(Value::ContractId(ContractId::new("#1:0")).as_textual(), Some("#1:0"));
        assert_eq!(Value::Int(1).as_textual(), None);
    }

    #[test]
    fn test_value_display() {
        assert_eq!(format!("{}", Value::Bool(true)), "true");
        assert_eq!(format!("{}", Value::Text("hi".into())), "\"hi\"");
        assert_eq!(format!("{}", Value::Optional(None)), "none");
        let r = Record::new().with("a", 1i64);
        assert_eq!(format!("{}", Value::Record(r)), "{a: 1}");
    }

    #[test]
    fn test_value_serialization() {
        let val = Value::Record(sample());
        let json = serde_json::to_string(&val).unwrap();
        let back: Value = serde_json::from_str(&json).unwrap();
        assert_eq!(val, back);
    }
}
