//! Harness configuration.
//!
//! Loaded from JSON or built in code. Every field has a default, so an empty
//! object is a valid configuration.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::dispatcher::DispatcherConfig;
use crate::error::{ObserveResult, ValidationError};
use crate::event::SubscriberKey;

/// How `assert_absent` decides that nothing matching has happened.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum NegativeAssertionPolicy {
    /// Inspect only events already buffered. Never blocks.
    #[default]
    Snapshot,
    /// Also watch events arriving during a short window.
    GraceWindow { window_ms: u64 },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct HarnessConfig {
    /// Timeout applied by `observe_default`.
    pub default_timeout_ms: u64,
    /// Keys whose channels exist before the transport subscription starts,
    /// so no early event is missed.
    pub preregistered_keys: Vec<SubscriberKey>,
    /// Create channels for unknown keys on their first event.
    pub auto_register: bool,
    pub negative_assertion: NegativeAssertionPolicy,
    /// Capacity of the transport-to-dispatcher queue.
    pub transport_queue_capacity: usize,
}

impl Default for HarnessConfig {
    fn default() -> Self {
        Self {
            default_timeout_ms: 5_000,
            preregistered_keys: Vec::new(),
            auto_register: true,
            negative_assertion: NegativeAssertionPolicy::Snapshot,
            transport_queue_capacity: 4096,
        }
    }
}

impl HarnessConfig {
    pub fn from_json_str(json: &str) -> ObserveResult<Self> {
        let cfg: Self = serde_json::from_str(json).map_err(|e| ValidationError::InvalidConfig {
            reason: e.to_string(),
        })?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn from_file(path: impl AsRef<Path>) -> ObserveResult<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|e| ValidationError::InvalidConfig {
            reason: format!("cannot read {}: {e}", path.display()),
        })?;
        Self::from_json_str(&raw)
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.default_timeout_ms == 0 {
            return Err(ValidationError::InvalidConfig {
                reason: "default_timeout_ms must be positive".to_string(),
            });
        }
        if self.transport_queue_capacity == 0 {
            return Err(ValidationError::InvalidConfig {
                reason: "transport_queue_capacity must be positive".to_string(),
            });
        }
        if let NegativeAssertionPolicy::GraceWindow { window_ms } = self.negative_assertion {
            if window_ms == 0 || window_ms > self.default_timeout_ms {
                return Err(ValidationError::InvalidConfig {
                    reason: format!(
                        "grace window of {window_ms}ms must be positive and at most default_timeout_ms ({}ms)",
                        self.default_timeout_ms
                    ),
                });
            }
        }
        Ok(())
    }

    #[must_use]
    pub const fn default_timeout(&self) -> Duration {
        Duration::from_millis(self.default_timeout_ms)
    }

    #[must_use]
    pub fn with_default_timeout(mut self, timeout: Duration) -> Self {
        self.default_timeout_ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX);
        self
    }

    #[must_use]
    pub fn with_key(mut self, key: impl Into<SubscriberKey>) -> Self {
        self.preregistered_keys.push(key.into());
        self
    }

    #[must_use]
    pub fn with_negative_assertion(mut self, policy: NegativeAssertionPolicy) -> Self {
        self.negative_assertion = policy;
        self
    }

    #[must_use]
    pub fn with_auto_register(mut self, enabled: bool) -> Self {
        self.auto_register = enabled;
        self
    }

    #[must_use]
    pub const fn dispatcher_config(&self) -> DispatcherConfig {
        DispatcherConfig {
            auto_register: self.auto_register,
            queue_capacity: self.transport_queue_capacity,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_empty_object_is_default() {
        let cfg = HarnessConfig::from_json_str("{}").unwrap();
        assert_eq!(cfg, HarnessConfig::default());
        assert_eq!(cfg.default_timeout(), Duration::from_secs(5));
    }

    #[test]
    fn test_parses_policy_and_keys() {
        let cfg = HarnessConfig::from_json_str(
            r#"{
                "default_timeout_ms": 250,
                "preregistered_keys": ["alice", "bob"],
                "negative_assertion": { "mode": "grace_window", "window_ms": 100 }
            }"#,
        )
        .unwrap();
        assert_eq!(cfg.default_timeout(), Duration::from_millis(250));
        assert_eq!(cfg.preregistered_keys, vec![SubscriberKey::from("alice"), SubscriberKey::from("bob")]);
        assert_eq!(cfg.negative_assertion, NegativeAssertionPolicy::GraceWindow { window_ms: 100 });
    }

    #[test]
    fn test_rejects_zero_timeout_and_unknown_fields() {
        assert!(HarnessConfig::from_json_str(r#"{"default_timeout_ms": 0}"#).is_err());
        let err = HarnessConfig::from_json_str(r#"{"timeout": 1}"#).unwrap_err();
        assert!(err.is_validation());
    }

    #[test]
    fn test_rejects_out_of_range_grace_window() {
        let zero = HarnessConfig::from_json_str(r#"{"negative_assertion": {"mode": "grace_window", "window_ms": 0}}"#);
        assert!(zero.unwrap_err().is_validation());

        let huge = HarnessConfig::from_json_str(&format!(
            r#"{{"negative_assertion": {{"mode": "grace_window", "window_ms": {}}}}}"#,
            u64::MAX
        ));
        assert!(huge.unwrap_err().is_validation());

        let longer_than_timeout = HarnessConfig::default()
            .with_default_timeout(Duration::from_millis(100))
            .with_negative_assertion(NegativeAssertionPolicy::GraceWindow { window_ms: 101 });
        assert!(longer_than_timeout.validate().is_err());
    }

    #[test]
    fn test_loads_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"auto_register": false}}"#).unwrap();
        let cfg = HarnessConfig::from_file(file.path()).unwrap();
        assert!(!cfg.auto_register);
        assert!(!cfg.dispatcher_config().auto_register);

        let missing = HarnessConfig::from_file(file.path().with_extension("missing"));
        assert!(missing.is_err());
    }

    #[test]
    fn test_builder_methods() {
        let cfg = HarnessConfig::default()
            .with_default_timeout(Duration::from_millis(20))
            .with_key("alice")
            .with_auto_register(false);
        assert_eq!(cfg.default_timeout_ms, 20);
        assert_eq!(cfg.preregistered_keys.len(), 1);
        assert!(!cfg.auto_register);
    }
}
