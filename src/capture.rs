//! Capture store shared across observation steps.
//!
//! Successful matches publish named values here; later steps read them to
//! build commands or patterns that depend on earlier results. Writes are
//! last-write-wins and nothing expires on its own: a caller that treats a
//! capture as single-use removes it (or uses [`CaptureStore::take`]).

use std::collections::HashMap;

use parking_lot::RwLock;
use rust_decimal::Decimal;

use crate::error::{CaptureError, ObserveResult};
use crate::event::{ContractId, Party};
use crate::matcher::Bindings;
use crate::value::{Record, Value, ValueKind};

/// Thread-safe keyed map of captured values.
///
/// Individual operations are atomic. Read-modify-write sequences spanning
/// several calls are not.
#[derive(Debug, Default)]
pub struct CaptureStore {
    values: RwLock<HashMap<String, Value>>,
}

impl CaptureStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores `value` under `key`, replacing any previous value.
    pub fn put(&self, key: impl Into<String>, value: impl Into<Value>) {
        let key = key.into();
        let value = value.into();
        tracing::debug!(key = %key, kind = %value.kind(), "capture stored");
        self.values.write().insert(key, value);
    }

    /// Publishes every binding of a successful match.
    pub fn merge(&self, bindings: Bindings) {
        if bindings.is_empty() {
            return;
        }
        let mut values = self.values.write();
        for (key, value) in bindings {
            tracing::debug!(key = %key, kind = %value.kind(), "capture bound");
            values.insert(key, value);
        }
    }

    pub fn get(&self, key: &str) -> ObserveResult<Value> {
        self.values
            .read()
            .get(key)
            .cloned()
            .ok_or_else(|| not_found(key))
    }

    /// Removes `key`. Removing an absent key is a no-op.
    pub fn remove(&self, key: &str) {
        self.values.write().remove(key);
    }

    /// Reads and removes `key` in one step.
    pub fn take(&self, key: &str) -> ObserveResult<Value> {
        self.values.write().remove(key).ok_or_else(|| not_found(key))
    }

    #[must_use]
    pub fn contains(&self, key: &str) -> bool {
        self.values.read().contains_key(key)
    }

    /// Captured keys, sorted.
    #[must_use]
    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.values.read().keys().cloned().collect();
        keys.sort();
        keys
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.values.read().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.values.read().is_empty()
    }

    pub fn clear(&self) {
        self.values.write().clear();
    }

    pub fn as_contract_id(&self, key: &str) -> ObserveResult<ContractId> {
        self.typed(key, ValueKind::ContractId, |v| v.as_contract_id().cloned())
    }

    pub fn as_party(&self, key: &str) -> ObserveResult<Party> {
        self.typed(key, ValueKind::Party, |v| v.as_party().cloned())
    }

    pub fn as_record(&self, key: &str) -> ObserveResult<Record> {
        self.typed(key, ValueKind::Record, |v| v.as_record().cloned())
    }

    pub fn as_text(&self, key: &str) -> ObserveResult<String> {
        self.typed(key, ValueKind::Text, |v| v.as_text().map(str::to_string))
    }

    pub fn as_int(&self, key: &str) -> ObserveResult<i64> {
        self.typed(key, ValueKind::Int, Value::as_int)
    }

    pub fn as_decimal(&self, key: &str) -> ObserveResult<Decimal> {
        self.typed(key, ValueKind::Decimal, Value::as_decimal)
    }

    pub fn as_bool(&self, key: &str) -> ObserveResult<bool> {
        self.typed(key, ValueKind::Bool, Value::as_bool)
    }

    fn typed<T>(
        &self,
        key: &str,
        requested: ValueKind,
        extract: impl FnOnce(&Value) -> Option<T>,
    ) -> ObserveResult<T> {
        let values = self.values.read();
        let value = values.get(key).ok_or_else(|| not_found(key))?;
        extract(value).ok_or_else(|| {
            CaptureError::TypeMismatch {
                key: key.to_string(),
                requested,
                actual: value.kind(),
            }
            .into()
        })
    }
}

fn not_found(key: &str) -> crate::error::ObserveError {
    CaptureError::KeyNotFound {
        key: key.to_string(),
    }
    .into()
}
