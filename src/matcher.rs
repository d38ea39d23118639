//! Matcher protocol.
//!
//! A matcher classifies one event and, on success, extracts named bindings.
//! Matchers own no state; the same matcher may be evaluated from several
//! threads at once.

use std::fmt;
use std::marker::PhantomData;

use crate::value::Value;

/// Named values extracted by a successful match, in capture order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Bindings {
    entries: Vec<(String, Value)>,
}

impl Bindings {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            entries: Vec::new(),
        }
    }

    /// Adds a binding. A later binding for the same key wins.
    pub fn insert(&mut self, key: impl Into<String>, value: Value) {
        let key = key.into();
        match self.entries.iter_mut().find(|(k, _)| *k == key) {
            Some((_, slot)) => *slot = value,
            None => self.entries.push((key, value)),
        }
    }

    pub fn extend(&mut self, other: Bindings) {
        for (k, v) in other {
            self.insert(k, v);
        }
    }

    #[must_use]
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.entries.iter().find(|(k, _)| k == key).map(|(_, v)| v)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }
}

impl IntoIterator for Bindings {
    type Item = (String, Value);
    type IntoIter = std::vec::IntoIter<(String, Value)>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.into_iter()
    }
}

/// Result of evaluating a matcher against one event.
#[derive(Debug, Clone, PartialEq)]
pub enum MatchOutcome {
    NoMatch,
    Match(Bindings),
}

impl MatchOutcome {
    /// A match with no bindings.
    #[must_use]
    pub const fn matched() -> Self {
        Self::Match(Bindings::new())
    }

    #[must_use]
    pub const fn is_match(&self) -> bool {
        matches!(self, Self::Match(_))
    }

    #[must_use]
    pub fn from_bool(matched: bool) -> Self {
        if matched {
            Self::matched()
        } else {
            Self::NoMatch
        }
    }
}

/// Stateless classification plus extraction.
pub trait Matcher<E>: Send + Sync {
    fn evaluate(&self, event: &E) -> MatchOutcome;

    /// Short description used in diagnostics and error messages.
    fn describe(&self) -> String {
        "<matcher>".to_string()
    }
}

impl<E, M: Matcher<E> + ?Sized> Matcher<E> for &M {
    fn evaluate(&self, event: &E) -> MatchOutcome {
        (**self).evaluate(event)
    }

    fn describe(&self) -> String {
        (**self).describe()
    }
}

impl<E, M: Matcher<E> + ?Sized> Matcher<E> for Box<M> {
    fn evaluate(&self, event: &E) -> MatchOutcome {
        (**self).evaluate(event)
    }

    fn describe(&self) -> String {
        (**self).describe()
    }
}

impl<E, M: Matcher<E> + ?Sized> Matcher<E> for std::sync::Arc<M> {
    fn evaluate(&self, event: &E) -> MatchOutcome {
        (**self).evaluate(event)
    }

    fn describe(&self) -> String {
        (**self).describe()
    }
}

/// Wraps a boolean predicate. Never binds anything.
pub struct FnMatcher<E, F> {
    predicate: F,
    label: String,
    _event: PhantomData<fn(&E)>,
}

impl<E, F> FnMatcher<E, F>
where
    F: Fn(&E) -> bool + Send + Sync,
{
    pub fn new(label: impl Into<String>, predicate: F) -> Self {
        Self {
            predicate,
            label: label.into(),
            _event: PhantomData,
        }
    }
}

impl<E, F> fmt::Debug for FnMatcher<E, F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FnMatcher").field("label", &self.label).finish_non_exhaustive()
    }
}

impl<E, F> Matcher<E> for FnMatcher<E, F>
where
    F: Fn(&E) -> bool + Send + Sync,
{
    fn evaluate(&self, event: &E) -> MatchOutcome {
        MatchOutcome::from_bool((self.predicate)(event))
    }

    fn describe(&self) -> String {
        self.label.clone()
    }
}

/// Builds a predicate matcher.
pub fn predicate<E, F>(label: impl Into<String>, f: F) -> FnMatcher<E, F>
where
    F: Fn(&E) -> bool + Send + Sync,
{
    FnMatcher::new(label, f)
}

/// Matches every event.
#[derive(Debug, Clone, Copy, Default)]
pub struct AnyEvent;

impl<E> Matcher<E> for AnyEvent {
    fn evaluate(&self, _event: &E) -> MatchOutcome {
        MatchOutcome::matched()
    }

    fn describe(&self) -> String {
        "any event".to_string()
    }
}

/// Conjunction: every matcher must match the same event.
///
/// Bindings are merged in order and published only if all clauses match.
pub struct AllOf<E> {
    matchers: Vec<Box<dyn Matcher<E>>>,
}

impl<E> AllOf<E> {
    #[must_use]
    pub fn new(matchers: Vec<Box<dyn Matcher<E>>>) -> Self {
        Self { matchers }
    }
}

impl<E> Matcher<E> for AllOf<E> {
    fn evaluate(&self, event: &E) -> MatchOutcome {
        let mut bindings = Bindings::new();
        for m in &self.matchers {
            match m.evaluate(event) {
                MatchOutcome::NoMatch => return MatchOutcome::NoMatch,
                MatchOutcome::Match(b) => bindings.extend(b),
            }
        }
        MatchOutcome::Match(bindings)
    }

    fn describe(&self) -> String {
        let parts: Vec<String> = self.matchers.iter().map(|m| m.describe()).collect();
        format!("all of [{}]", parts.join(", "))
    }
}
