//! Declarative patterns over ledger events.
//!
//! An [`EventPattern`] is a conjunction of clauses plus capture directives.
//! Type-tag clauses (event kind, template, contract, witness) are checked
//! before any payload clause. Every shape problem the pattern can know about
//! up front (bad regex, unorderable comparison bound, clauses disagreeing on
//! a field's kind, fields the template schema does not declare) is reported
//! by [`PatternBuilder::build`], so scanning never fails halfway.

use std::collections::HashMap;
use std::fmt;

use regex::Regex;

use crate::error::ValidationError;
use crate::event::{ContractId, EventKind, LedgerEvent, Party, TemplateId};
use crate::matcher::{Bindings, MatchOutcome, Matcher};
use crate::schema::{SchemaCache, TemplateSchema};
use crate::value::{FieldPath, Value, ValueKind};

/// Ordering operator for comparison clauses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CompareOp {
    Lt,
    Le,
    Gt,
    Ge,
}

impl CompareOp {
    fn holds(self, ordering: std::cmp::Ordering) -> bool {
        use std::cmp::Ordering::{Equal, Greater, Less};
        match self {
            Self::Lt => ordering == Less,
            Self::Le => matches!(ordering, Less | Equal),
            Self::Gt => ordering == Greater,
            Self::Ge => matches!(ordering, Greater | Equal),
        }
    }

    const fn symbol(self) -> &'static str {
        match self {
            Self::Lt => "<",
            Self::Le => "<=",
            Self::Gt => ">",
            Self::Ge => ">=",
        }
    }
}

/// Event kind filter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KindFilter {
    Created,
    Archived,
    /// Any exercise, or only the named choice.
    Exercised(Option<String>),
}

impl KindFilter {
    fn accepts(&self, kind: &EventKind) -> bool {
        match (self, kind) {
            (Self::Created, EventKind::Created) | (Self::Archived, EventKind::Archived) => true,
            (Self::Exercised(None), EventKind::Exercised { .. }) => true,
            (Self::Exercised(Some(want)), EventKind::Exercised { choice }) => want == choice,
            _ => false,
        }
    }
}

impl fmt::Display for KindFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Created => f.write_str("created"),
            Self::Archived => f.write_str("archived"),
            Self::Exercised(None) => f.write_str("exercised"),
            Self::Exercised(Some(choice)) => write!(f, "exercised {choice}"),
        }
    }
}

#[derive(Debug, Clone)]
enum TagClause {
    Kind(KindFilter),
    Template(TemplateId),
    Contract(ContractId),
    Witness(Party),
}

impl TagClause {
    fn accepts(&self, event: &LedgerEvent) -> bool {
        match self {
            Self::Kind(k) => k.accepts(&event.kind),
            Self::Template(t) => *t == event.template_id,
            Self::Contract(c) => *c == event.contract_id,
            Self::Witness(p) => event.is_witnessed_by(p),
        }
    }
}

#[derive(Debug, Clone)]
enum FieldClause {
    Equals { path: FieldPath, expected: Value },
    Compare { path: FieldPath, op: CompareOp, bound: Value },
    Matches { path: FieldPath, regex: Regex },
}

impl FieldClause {
    fn accepts(&self, event: &LedgerEvent) -> bool {
        match self {
            Self::Equals { path, expected } => event
                .field(path)
                .is_some_and(|v| v == expected || v.unwrap_optional() == expected),
            Self::Compare { path, op, bound } => event
                .field(path)
                .and_then(|v| v.unwrap_optional().compare(bound))
                .is_some_and(|ord| op.holds(ord)),
            Self::Matches { path, regex } => event
                .field(path)
                .map(Value::unwrap_optional)
                .and_then(Value::as_textual)
                .is_some_and(|s| regex.is_match(s)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum CaptureTarget {
    Field(FieldPath),
    ContractId,
    Payload,
}

#[derive(Debug, Clone)]
struct Capture {
    key: String,
    target: CaptureTarget,
}

impl Capture {
    fn extract(&self, event: &LedgerEvent) -> Option<Value> {
        match &self.target {
            CaptureTarget::Field(path) => event.field(path).cloned(),
            CaptureTarget::ContractId => Some(Value::ContractId(event.contract_id.clone())),
            CaptureTarget::Payload => Some(Value::Record(event.payload.clone())),
        }
    }
}

/// A validated pattern over [`LedgerEvent`]s.
#[derive(Debug, Clone)]
pub struct EventPattern {
    tags: Vec<TagClause>,
    fields: Vec<FieldClause>,
    alternatives: Vec<EventPattern>,
    captures: Vec<Capture>,
    description: String,
}

impl EventPattern {
    #[must_use]
    pub fn builder() -> PatternBuilder {
        PatternBuilder::new()
    }

    /// Shorthand for a creation of `template`.
    #[must_use]
    pub fn created(template: TemplateId) -> PatternBuilder {
        PatternBuilder::new().kind(KindFilter::Created).template(template)
    }

    /// Shorthand for an archival of `template`.
    #[must_use]
    pub fn archived(template: TemplateId) -> PatternBuilder {
        PatternBuilder::new().kind(KindFilter::Archived).template(template)
    }

    /// Shorthand for an exercise of `choice` on `template`.
    #[must_use]
    pub fn exercised(template: TemplateId, choice: impl Into<String>) -> PatternBuilder {
        PatternBuilder::new()
            .kind(KindFilter::Exercised(Some(choice.into())))
            .template(template)
    }

    /// Capture keys this pattern publishes on success.
    pub fn capture_keys(&self) -> impl Iterator<Item = &str> {
        self.captures.iter().map(|c| c.key.as_str())
    }
}

impl Matcher<LedgerEvent> for EventPattern {
    fn evaluate(&self, event: &LedgerEvent) -> MatchOutcome {
        if !self.tags.iter().all(|c| c.accepts(event)) {
            return MatchOutcome::NoMatch;
        }
        if !self.fields.iter().all(|c| c.accepts(event)) {
            return MatchOutcome::NoMatch;
        }

        let mut bindings = Bindings::new();
        if !self.alternatives.is_empty() {
            let Some(inner) = self.alternatives.iter().find_map(|alt| match alt.evaluate(event) {
                MatchOutcome::Match(b) => Some(b),
                MatchOutcome::NoMatch => None,
            }) else {
                return MatchOutcome::NoMatch;
            };
            bindings.extend(inner);
        }

        for capture in &self.captures {
            // A target missing from this event fails the whole match so that
            // bindings stay all-or-nothing.
            let Some(value) = capture.extract(event) else {
                return MatchOutcome::NoMatch;
            };
            bindings.insert(capture.key.clone(), value);
        }

        MatchOutcome::Match(bindings)
    }

    fn describe(&self) -> String {
        self.description.clone()
    }
}

impl fmt::Display for EventPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.description)
    }
}

#[derive(Debug, Clone)]
enum FieldSpec {
    Equals(String, Value),
    Compare(String, CompareOp, Value),
    Matches(String, String),
}

#[derive(Debug, Clone)]
enum CaptureSpec {
    Field(String, String),
    ContractId(String),
    Payload(String),
}

/// Builder for [`EventPattern`].
///
/// Paths and regexes are kept as written until [`PatternBuilder::build`],
/// which reports the first problem found.
#[derive(Debug, Clone, Default)]
pub struct PatternBuilder {
    kind: Option<KindFilter>,
    template: Option<Result<TemplateId, ValidationError>>,
    contract: Option<ContractId>,
    witnesses: Vec<Party>,
    fields: Vec<FieldSpec>,
    alternatives: Vec<EventPattern>,
    captures: Vec<CaptureSpec>,
}

impl PatternBuilder {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn kind(mut self, kind: KindFilter) -> Self {
        self.kind = Some(kind);
        self
    }

    #[must_use]
    pub fn template(mut self, template: TemplateId) -> Self {
        self.template = Some(Ok(template));
        self
    }

    /// Template given as `Module:Entity`.
    #[must_use]
    pub fn template_named(mut self, name: &str) -> Self {
        self.template = Some(name.parse());
        self
    }

    #[must_use]
    pub fn contract_id(mut self, contract_id: ContractId) -> Self {
        self.contract = Some(contract_id);
        self
    }

    #[must_use]
    pub fn witnessed_by(mut self, party: impl Into<Party>) -> Self {
        self.witnesses.push(party.into());
        self
    }

    #[must_use]
    pub fn field_eq(mut self, path: &str, expected: impl Into<Value>) -> Self {
        self.fields.push(FieldSpec::Equals(path.to_string(), expected.into()));
        self
    }

    #[must_use]
    pub fn field_cmp(mut self, path: &str, op: CompareOp, bound: impl Into<Value>) -> Self {
        self.fields
            .push(FieldSpec::Compare(path.to_string(), op, bound.into()));
        self
    }

    #[must_use]
    pub fn field_matches(mut self, path: &str, regex: &str) -> Self {
        self.fields
            .push(FieldSpec::Matches(path.to_string(), regex.to_string()));
        self
    }

    /// Requires at least one of `patterns` to match as well.
    #[must_use]
    pub fn any_of(mut self, patterns: impl IntoIterator<Item = EventPattern>) -> Self {
        self.alternatives.extend(patterns);
        self
    }

    /// Publishes the value at `path` under `key` on success.
    #[must_use]
    pub fn capture(mut self, path: &str, key: &str) -> Self {
        self.captures
            .push(CaptureSpec::Field(path.to_string(), key.to_string()));
        self
    }

    #[must_use]
    pub fn capture_contract_id(mut self, key: &str) -> Self {
        self.captures.push(CaptureSpec::ContractId(key.to_string()));
        self
    }

    /// Publishes the whole payload record under `key` on success.
    #[must_use]
    pub fn capture_payload(mut self, key: &str) -> Self {
        self.captures.push(CaptureSpec::Payload(key.to_string()));
        self
    }

    /// Validates the pattern shape without a schema.
    pub fn build(self) -> Result<EventPattern, ValidationError> {
        self.build_inner(None)
    }

    /// Validates the pattern shape, and against the template's declared
    /// fields when `schemas` knows the template.
    pub fn build_with(self, schemas: &SchemaCache) -> Result<EventPattern, ValidationError> {
        let schema = match &self.template {
            Some(Ok(t)) => schemas.get(t),
            _ => None,
        };
        self.build_inner(schema.as_ref())
    }

    fn build_inner(self, schema: Option<&TemplateSchema>) -> Result<EventPattern, ValidationError> {
        let mut tags = Vec::new();
        let mut desc = Vec::new();

        if let Some(kind) = self.kind {
            desc.push(kind.to_string());
            tags.push(TagClause::Kind(kind));
        }
        if let Some(template) = self.template {
            let template = template?;
            desc.push(template.to_string());
            tags.push(TagClause::Template(template));
        }
        if let Some(cid) = self.contract {
            desc.push(format!("cid {cid}"));
            tags.push(TagClause::Contract(cid));
        }
        for party in self.witnesses {
            desc.push(format!("seen by {party}"));
            tags.push(TagClause::Witness(party));
        }

        let mut kinds = KindLedger::new(schema);
        let mut fields = Vec::with_capacity(self.fields.len());
        for spec in self.fields {
            let clause = match spec {
                FieldSpec::Equals(raw, expected) => {
                    let path = FieldPath::parse(&raw)?;
                    kinds.check(&path, expected.kind())?;
                    desc.push(format!("{path} == {expected}"));
                    FieldClause::Equals { path, expected }
                }
                FieldSpec::Compare(raw, op, bound) => {
                    let path = FieldPath::parse(&raw)?;
                    if !bound.kind().is_orderable() {
                        return Err(ValidationError::NotOrderable { kind: bound.kind() });
                    }
                    kinds.check(&path, bound.kind())?;
                    desc.push(format!("{path} {} {bound}", op.symbol()));
                    FieldClause::Compare { path, op, bound }
                }
                FieldSpec::Matches(raw, pattern) => {
                    let path = FieldPath::parse(&raw)?;
                    kinds.check_textual(&path)?;
                    let regex = Regex::new(&pattern).map_err(|e| ValidationError::InvalidRegex {
                        pattern: pattern.clone(),
                        reason: e.to_string(),
                    })?;
                    desc.push(format!("{path} ~ /{pattern}/"));
                    FieldClause::Matches { path, regex }
                }
            };
            fields.push(clause);
        }

        if !self.alternatives.is_empty() {
            let alts: Vec<String> = self.alternatives.iter().map(|p| format!("({p})")).collect();
            desc.push(format!("any of {}", alts.join(" | ")));
        }

        let mut captures = Vec::with_capacity(self.captures.len());
        for spec in self.captures {
            let (key, target) = match spec {
                CaptureSpec::Field(raw, key) => {
                    let path = FieldPath::parse(&raw)?;
                    kinds.check_known(&path)?;
                    (key, CaptureTarget::Field(path))
                }
                CaptureSpec::ContractId(key) => (key, CaptureTarget::ContractId),
                CaptureSpec::Payload(key) => (key, CaptureTarget::Payload),
            };
            if key.trim().is_empty() {
                return Err(ValidationError::EmptyCaptureKey);
            }
            desc.push(format!("capture {key}"));
            captures.push(Capture { key, target });
        }

        let description = if desc.is_empty() {
            "any event".to_string()
        } else {
            desc.join(" ")
        };

        Ok(EventPattern {
            tags,
            fields,
            alternatives: self.alternatives,
            captures,
            description,
        })
    }
}

/// Tracks the kind each clause expects at a path so that clauses disagree
/// at build time rather than silently never matching.
struct KindLedger<'a> {
    schema: Option<&'a TemplateSchema>,
    seen: HashMap<FieldPath, ValueKind>,
}

impl<'a> KindLedger<'a> {
    fn new(schema: Option<&'a TemplateSchema>) -> Self {
        Self {
            schema,
            seen: HashMap::new(),
        }
    }

    fn declared(&self, path: &FieldPath) -> Option<ValueKind> {
        self.schema
            .and_then(|s| s.kind_of(path))
            .or_else(|| self.seen.get(path).copied())
    }

    fn check_known(&self, path: &FieldPath) -> Result<(), ValidationError> {
        match self.schema {
            Some(schema) if !schema.covers(path) => Err(ValidationError::UnknownField {
                template: schema.template_id().to_string(),
                path: path.to_string(),
            }),
            _ => Ok(()),
        }
    }

    fn check(&mut self, path: &FieldPath, expected: ValueKind) -> Result<(), ValidationError> {
        self.check_known(path)?;
        match self.declared(path) {
            // Optionals are looked through during evaluation.
            Some(ValueKind::Optional) | None => {}
            Some(declared) if declared != expected => {
                return Err(ValidationError::KindMismatch {
                    path: path.to_string(),
                    declared,
                    expected,
                });
            }
            Some(_) => {}
        }
        self.seen.entry(path.clone()).or_insert(expected);
        Ok(())
    }

    fn check_textual(&self, path: &FieldPath) -> Result<(), ValidationError> {
        self.check_known(path)?;
        match self.declared(path) {
            Some(kind) if kind != ValueKind::Optional && !kind.is_textual() => {
                Err(ValidationError::NotTextual {
                    path: path.to_string(),
                    kind,
                })
            }
            _ => Ok(()),
        }
    }
}
