//! Test-session wiring.
//!
//! An [`ObserveSession`] owns one dispatcher, its producer thread, the
//! capture store and an observer over them, all configured from a
//! [`HarnessConfig`]. Channels for the configured keys exist before any
//! transport is connected. Dropping the session stops its producer thread;
//! transports still holding its sinks see their sends fail.

use std::sync::Arc;

use crate::capture::CaptureStore;
use crate::config::HarnessConfig;
use crate::dispatcher::{Dispatcher, DispatcherWorker, KeyResolver, WitnessResolver};
use crate::error::ObserveResult;
use crate::event::{LedgerEvent, SubscriberKey};
use crate::observer::Observer;
use crate::transport::{EventSource, StreamOffset, SubscriptionId, TransportSink};

/// Everything one test session needs to observe a ledger.
#[derive(Debug)]
pub struct ObserveSession<E> {
    config: HarnessConfig,
    observer: Observer<E>,
    worker: DispatcherWorker<E>,
}

impl ObserveSession<LedgerEvent> {
    /// Session routing ledger events to their witnesses.
    pub fn for_ledger(config: HarnessConfig) -> ObserveResult<Self> {
        Self::new(config, WitnessResolver)
    }
}

impl<E: Clone + Send + Sync + 'static> ObserveSession<E> {
    pub fn new(config: HarnessConfig, resolver: impl KeyResolver<E> + 'static) -> ObserveResult<Self> {
        config.validate()?;

        let dispatcher = Arc::new(Dispatcher::new(config.dispatcher_config(), resolver));
        for key in &config.preregistered_keys {
            dispatcher.register(key.clone());
        }

        let worker = DispatcherWorker::spawn(Arc::clone(&dispatcher))?;
        let observer = Observer::new(dispatcher, Arc::new(CaptureStore::new()))
            .with_default_timeout(config.default_timeout())
            .with_negative_policy(config.negative_assertion);

        tracing::info!(
            keys = config.preregistered_keys.len(),
            timeout_ms = config.default_timeout_ms,
            "observe session started"
        );

        Ok(Self {
            config,
            observer,
            worker,
        })
    }

    /// Subscribes `source` at `offset`, feeding this session's dispatcher.
    ///
    /// Each connection is its own subscription: when one source ends, the
    /// others keep delivering.
    pub fn connect(&self, source: &dyn EventSource<E>, offset: StreamOffset) -> ObserveResult<SubscriptionId> {
        let sink = self.worker.sink();
        let subscription = sink.subscription();
        tracing::info!(?offset, subscription = %subscription, "connecting transport");
        source.subscribe(offset, sink)?;
        Ok(subscription)
    }

    /// Raw producer handle for a new subscription, for transports driven by
    /// the caller.
    #[must_use]
    pub fn sink(&self) -> TransportSink<E> {
        self.worker.sink()
    }

    #[must_use]
    pub const fn observer(&self) -> &Observer<E> {
        &self.observer
    }

    #[must_use]
    pub const fn captures(&self) -> &Arc<CaptureStore> {
        self.observer.captures()
    }

    #[must_use]
    pub const fn config(&self) -> &HarnessConfig {
        &self.config
    }

    /// Tears down the channel for `key`; blocked observers fail with
    /// `ChannelClosed`.
    pub fn close_subscriber(&self, key: &SubscriberKey) -> bool {
        self.observer.dispatcher().unregister(key)
    }
}
