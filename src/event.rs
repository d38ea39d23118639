//! Ledger event model.
//!
//! Events are immutable records of what happened to a contract: it was
//! created, archived, or had a choice exercised on it. Each event is
//! witnessed by one or more parties, which is how the dispatcher decides
//! which subscriber channels receive it.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::ValidationError;
use crate::value::{FieldPath, Record, Value};

/// Unique identifier for a delivered event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EventId(Uuid);

impl EventId {
    /// Creates a new random event id.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    #[must_use]
    pub const fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

impl Default for EventId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for EventId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Opaque contract identifier assigned by the ledger.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ContractId(String);

impl ContractId {
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ContractId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A ledger party.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Party(String);

impl Party {
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Party {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Party {
    fn from(name: &str) -> Self {
        Self::new(name)
    }
}

/// Identity of a subscriber stream; in practice the party the harness acts as.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SubscriberKey(String);

impl SubscriberKey {
    #[must_use]
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SubscriberKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for SubscriberKey {
    fn from(key: &str) -> Self {
        Self::new(key)
    }
}

impl From<String> for SubscriberKey {
    fn from(key: String) -> Self {
        Self(key)
    }
}

impl From<&Party> for SubscriberKey {
    fn from(party: &Party) -> Self {
        Self::new(party.as_str())
    }
}

impl From<Party> for SubscriberKey {
    fn from(party: Party) -> Self {
        Self(party.0)
    }
}

/// Qualified template name, `Module:Entity`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TemplateId {
    pub module: String,
    pub entity: String,
}

impl TemplateId {
    #[must_use]
    pub fn new(module: impl Into<String>, entity: impl Into<String>) -> Self {
        Self {
            module: module.into(),
            entity: entity.into(),
        }
    }
}

impl fmt::Display for TemplateId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.module, self.entity)
    }
}

impl FromStr for TemplateId {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || ValidationError::InvalidTemplateId {
            value: s.to_string(),
        };
        let (module, entity) = s.trim().rsplit_once(':').ok_or_else(invalid)?;
        if module.is_empty() || entity.is_empty() {
            return Err(invalid());
        }
        Ok(Self::new(module, entity))
    }
}

/// Ledger position of an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Offset(pub u64);

impl fmt::Display for Offset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:016}", self.0)
    }
}

/// What happened to the contract.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EventKind {
    Created,
    Archived,
    Exercised { choice: String },
}

impl EventKind {
    /// Kind label without choice details.
    #[must_use]
    pub const fn label(&self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::Archived => "archived",
            Self::Exercised { .. } => "exercised",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Exercised { choice } => write!(f, "exercised {choice}"),
            other => f.write_str(other.label()),
        }
    }
}

/// One event on a subscriber's stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LedgerEvent {
    pub event_id: EventId,
    pub kind: EventKind,
    pub template_id: TemplateId,
    pub contract_id: ContractId,
    /// Create arguments, choice argument, or empty for archivals.
    pub payload: Record,
    pub witnesses: Vec<Party>,
    pub offset: Offset,
    pub effective_at: DateTime<Utc>,
}

impl LedgerEvent {
    fn new(kind: EventKind, template_id: TemplateId, contract_id: ContractId, payload: Record) -> Self {
        Self {
            event_id: EventId::new(),
            kind,
            template_id,
            contract_id,
            payload,
            witnesses: Vec::new(),
            offset: Offset::default(),
            effective_at: Utc::now(),
        }
    }

    #[must_use]
    pub fn created(template_id: TemplateId, contract_id: ContractId, payload: Record) -> Self {
        Self::new(EventKind::Created, template_id, contract_id, payload)
    }

    #[must_use]
    pub fn archived(template_id: TemplateId, contract_id: ContractId) -> Self {
        Self::new(EventKind::Archived, template_id, contract_id, Record::new())
    }

    #[must_use]
    pub fn exercised(
        template_id: TemplateId,
        contract_id: ContractId,
        choice: impl Into<String>,
        argument: Record,
    ) -> Self {
        Self::new(
            EventKind::Exercised {
                choice: choice.into(),
            },
            template_id,
            contract_id,
            argument,
        )
    }

    #[must_use]
    pub fn witnessed_by<I, P>(mut self, parties: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: Into<Party>,
    {
        self.witnesses.extend(parties.into_iter().map(Into::into));
        self
    }

    #[must_use]
    pub fn at_offset(mut self, offset: Offset) -> Self {
        self.offset = offset;
        self
    }

    #[must_use]
    pub fn field(&self, path: &FieldPath) -> Option<&Value> {
        self.payload.path(path)
    }

    #[must_use]
    pub fn is_witnessed_by(&self, party: &Party) -> bool {
        self.witnesses.contains(party)
    }
}

impl fmt::Display for LedgerEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} {} @{}",
            self.kind, self.template_id, self.contract_id, self.offset
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_template_id_parse_and_display() {
        let t: TemplateId = "Main.Iou:Iou".parse().unwrap();
        assert_eq!(t.module, "Main.Iou");
        assert_eq!(t.entity, "Iou");
        assert_eq!(t.to_string(), "Main.Iou:Iou");

        assert!("NoColon".parse::<TemplateId>().is_err());
        assert!(":Entity".parse::<TemplateId>().is_err());
        assert!("Module:".parse::<TemplateId>().is_err());
    }

    #[test]
    fn test_event_constructors() {
        let t = TemplateId::new("Main", "Ping");
        let ev = LedgerEvent::created(t.clone(), ContractId::new("#1:0"), Record::new().with("n", 1i64))
            .witnessed_by(["alice", "bob"])
            .at_offset(Offset(7));

        assert_eq!(ev.kind, EventKind::Created);
        assert!(ev.is_witnessed_by(&Party::new("bob")));
        assert!(!ev.is_witnessed_by(&Party::new("carol")));
        assert_eq!(ev.field(&FieldPath::parse("n").unwrap()), Some(&Value::Int(1)));
        assert_eq!(ev.offset, Offset(7));

        let arch = LedgerEvent::archived(t, ContractId::new("#1:0"));
        assert_eq!(arch.kind.label(), "archived");
        assert!(arch.payload.is_empty());
    }

    #[test]
    fn test_event_display() {
        let ev = LedgerEvent::exercised(
            TemplateId::new("Main", "Ping"),
            ContractId::new("#2:0"),
            "Respond",
            Record::new(),
        );
        let s = ev.to_string();
        assert!(s.contains("exercised Respond"));
        assert!(s.contains("Main:Ping"));
        assert!(s.contains("#2:0"));
    }

    #[test]
    fn test_subscriber_key_from_party() {
        let key: SubscriberKey = Party::new("alice").into();
        assert_eq!(key, SubscriberKey::from("alice"));
    }
}
