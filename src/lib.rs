//! # ledger-observe - Event observation for ledger integration tests
//!
//! A test harness drives a transactional ledger from the outside and needs
//! to wait until the ledger has *reacted*: a contract was created, a choice
//! was exercised, a contract was archived. This crate buffers the events a
//! ledger streams to each subscriber and lets test code block until one of
//! them matches a pattern, capturing values out of the match for later steps.
//!
//! ## Core Concepts
//!
//! - **EventChannel**: ordered, consumable buffer of events for one subscriber
//! - **Dispatcher**: routes transport batches into per-subscriber channels
//! - **Matcher / EventPattern**: decides whether an event matches and what it binds
//! - **CaptureStore**: named values published by successful observations
//! - **Observer**: blocking `observe` / `assert_absent` queries with deadlines
//!
//! ## Usage
//!
//! ```rust,ignore
//! use std::time::Duration;
//! use ledger_observe::{EventPattern, HarnessConfig, ObserveSession, ReplaySource, StreamOffset, TemplateId};
//!
//! let session = ObserveSession::for_ledger(HarnessConfig::default().with_key("alice"))?;
//! session.connect(&source, StreamOffset::Begin)?;
//!
//! let created = EventPattern::created(TemplateId::new("Main", "Iou"))
//!     .field_eq("currency", "USD")
//!     .capture_contract_id("iou")
//!     .build()?;
//! session.observer().observe("alice", &created, Duration::from_secs(5))?;
//! let iou = session.captures().as_contract_id("iou")?;
//! ```

#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

// Data model
pub mod error;
pub mod event;
pub mod schema;
pub mod value;

// Matching and captures
pub mod capture;
pub mod matcher;
pub mod pattern;

// Delivery and observation
pub mod cancel;
pub mod channel;
pub mod config;
pub mod dispatcher;
pub mod observer;
pub mod session;
pub mod transport;

// Re-export primary types at crate root for convenience
pub use cancel::CancellationToken;
pub use capture::CaptureStore;
pub use channel::{ChannelStats, EventChannel, ScanFailure, Sequenced};
pub use config::{HarnessConfig, NegativeAssertionPolicy};
pub use dispatcher::{Dispatcher, DispatcherConfig, DispatcherWorker, KeyResolver, WitnessResolver};
pub use error::{
	CaptureError, ObservationError, ObserveError, ObserveResult, TransportError, ValidationError,
};
pub use event::{
	ContractId, EventId, EventKind, LedgerEvent, Offset, Party, SubscriberKey, TemplateId,
};
pub use matcher::{predicate, AllOf, AnyEvent, Bindings, FnMatcher, MatchOutcome, Matcher};
pub use observer::Observer;
pub use pattern::{CompareOp, EventPattern, KindFilter, PatternBuilder};
pub use schema::{SchemaCache, TemplateSchema};
pub use session::ObserveSession;
pub use transport::{
    EventSource, ReplaySource, StreamOffset, SubscriptionId, TransportBatch, TransportMessage, TransportSink,
};
pub use value::{FieldPath, PathSegment, Record, Value, ValueKind};
