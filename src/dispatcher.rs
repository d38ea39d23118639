//! Event dispatcher and transport worker.
//!
//! The dispatcher demultiplexes transport batches into per-subscriber
//! channels, preserving batch order per key. The worker owns the producer
//! thread: it drains a bounded queue fed by [`TransportSink`]s and hands each
//! message to the dispatcher.
//!
//! Every sink belongs to its own subscription. Ending one subscription stops
//! only that subscription's batches; the others keep flowing. Transport
//! failures are logged and remembered, never raised into blocked observers.
//! Those simply time out because nothing further arrives.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crossbeam_channel::{bounded, select, Receiver, Sender};
use parking_lot::{Mutex, RwLock};

use crate::channel::EventChannel;
use crate::error::{ObserveError, ObserveResult, TransportError};
use crate::event::{LedgerEvent, SubscriberKey};
use crate::transport::{SubscriptionId, TransportBatch, TransportMessage, TransportSink};

/// Decides which subscribers an event is relevant to.
pub trait KeyResolver<E>: Send + Sync {
    fn resolve(&self, event: &E) -> Vec<SubscriberKey>;
}

impl<E, F> KeyResolver<E> for F
where
    F: Fn(&E) -> Vec<SubscriberKey> + Send + Sync,
{
    fn resolve(&self, event: &E) -> Vec<SubscriberKey> {
        self(event)
    }
}

/// Routes a ledger event to every witnessing party.
#[derive(Debug, Clone, Copy, Default)]
pub struct WitnessResolver;

impl KeyResolver<LedgerEvent> for WitnessResolver {
    fn resolve(&self, event: &LedgerEvent) -> Vec<SubscriberKey> {
        event.witnesses.iter().map(SubscriberKey::from).collect()
    }
}

#[derive(Debug, Clone)]
pub struct DispatcherConfig {
    /// Create a channel the first time an event names an unknown key.
    /// When false, such events are dropped and counted.
    pub auto_register: bool,
    /// Capacity of the transport-to-worker queue.
    pub queue_capacity: usize,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            auto_register: true,
            queue_capacity: 4096,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
enum SubscriptionState {
    Live,
    Ended(Option<TransportError>),
}

/// Per-key demultiplexer.
pub struct Dispatcher<E> {
    cfg: DispatcherConfig,
    resolver: Box<dyn KeyResolver<E>>,
    channels: RwLock<HashMap<SubscriberKey, Arc<EventChannel<E>>>>,
    subscriptions: Mutex<HashMap<SubscriptionId, SubscriptionState>>,
    next_subscription: AtomicU64,
    last_error: Mutex<Option<TransportError>>,
    delivered: AtomicU64,
    dropped: AtomicU64,
}

impl<E> std::fmt::Debug for Dispatcher<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("cfg", &self.cfg)
            .field("channels", &self.channels.read().len())
            .field("subscriptions", &self.subscriptions.lock().len())
            .finish_non_exhaustive()
    }
}

impl<E: Clone + Send + 'static> Dispatcher<E> {
    pub fn new(cfg: DispatcherConfig, resolver: impl KeyResolver<E> + 'static) -> Self {
        Self {
            cfg,
            resolver: Box::new(resolver),
            channels: RwLock::new(HashMap::new()),
            subscriptions: Mutex::new(HashMap::new()),
            next_subscription: AtomicU64::new(1),
            last_error: Mutex::new(None),
            delivered: AtomicU64::new(0),
            dropped: AtomicU64::new(0),
        }
    }

    /// Returns the channel for `key`, creating it if needed.
    pub fn register(&self, key: impl Into<SubscriberKey>) -> Arc<EventChannel<E>> {
        let key = key.into();
        if let Some(ch) = self.channels.read().get(&key) {
            return Arc::clone(ch);
        }
        let mut channels = self.channels.write();
        Arc::clone(channels.entry(key.clone()).or_insert_with(|| {
            tracing::info!(key = %key, "subscriber channel registered");
            Arc::new(EventChannel::new(key.clone()))
        }))
    }

    #[must_use]
    pub fn channel(&self, key: &SubscriberKey) -> Option<Arc<EventChannel<E>>> {
        self.channels.read().get(key).cloned()
    }

    /// Removes and closes the channel for `key`. Returns false if unknown.
    pub fn unregister(&self, key: &SubscriberKey) -> bool {
        let removed = self.channels.write().remove(key);
        match removed {
            Some(ch) => {
                ch.close();
                tracing::info!(key = %key, "subscriber channel torn down");
                true
            }
            None => false,
        }
    }

    /// Registered keys, sorted.
    #[must_use]
    pub fn keys(&self) -> Vec<SubscriberKey> {
        let mut keys: Vec<SubscriberKey> = self.channels.read().keys().cloned().collect();
        keys.sort();
        keys
    }

    /// Allocates a live transport subscription.
    pub fn open_subscription(&self) -> SubscriptionId {
        let id = SubscriptionId(self.next_subscription.fetch_add(1, Ordering::Relaxed));
        self.subscriptions.lock().insert(id, SubscriptionState::Live);
        tracing::debug!(subscription = %id, "transport subscription opened");
        id
    }

    /// Dispatches a batch read by `subscription`.
    ///
    /// Batches arriving after that subscription ended are dropped and
    /// counted; other subscriptions are unaffected.
    pub fn dispatch_from(&self, subscription: SubscriptionId, batch: TransportBatch<E>) {
        let ended = matches!(
            self.subscriptions.lock().get(&subscription),
            Some(SubscriptionState::Ended(_))
        );
        if ended {
            let n = batch.events.len() as u64;
            self.dropped.fetch_add(n, Ordering::Relaxed);
            tracing::warn!(subscription = %subscription, events = n, "batch received after termination, dropped");
            return;
        }
        self.dispatch_batch(batch);
    }

    /// Pushes every event of `batch` into each relevant channel, in order.
    pub fn dispatch_batch(&self, batch: TransportBatch<E>) {
        let TransportBatch { key, events } = batch;
        for event in events {
            let mut keys = match &key {
                Some(k) => vec![k.clone()],
                None => self.resolver.resolve(&event),
            };
            keys.sort();
            keys.dedup();

            if keys.is_empty() {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                tracing::debug!("event resolved to no subscriber, dropped");
                continue;
            }

            let last = keys.len() - 1;
            let mut event = Some(event);
            for (i, k) in keys.into_iter().enumerate() {
                let Some(channel) = self.route(&k) else {
                    self.dropped.fetch_add(1, Ordering::Relaxed);
                    tracing::debug!(key = %k, "event for unregistered subscriber dropped");
                    continue;
                };
                // Move into the last channel, clone for the others.
                let payload = if i == last { event.take() } else { event.clone() };
                if let Some(payload) = payload {
                    if channel.push(payload) {
                        self.delivered.fetch_add(1, Ordering::Relaxed);
                    } else {
                        self.dropped.fetch_add(1, Ordering::Relaxed);
                    }
                }
            }
        }
    }

    fn route(&self, key: &SubscriberKey) -> Option<Arc<EventChannel<E>>> {
        if let Some(ch) = self.channel(key) {
            return Some(ch);
        }
        self.cfg.auto_register.then(|| self.register(key.clone()))
    }

    /// Records the end of one transport subscription.
    ///
    /// Buffered events stay consumable and channels stay open. Observers fed
    /// only by this subscription will time out.
    pub fn end_subscription(&self, subscription: SubscriptionId, error: Option<TransportError>) {
        let still_live = {
            let mut subscriptions = self.subscriptions.lock();
            subscriptions.insert(subscription, SubscriptionState::Ended(error.clone()));
            subscriptions
                .values()
                .filter(|state| **state == SubscriptionState::Live)
                .count()
        };
        match error {
            Some(err) => {
                tracing::warn!(
                    subscription = %subscription,
                    error = %err,
                    live_subscriptions = still_live,
                    "transport subscription failed, no further events from it will be delivered"
                );
                *self.last_error.lock() = Some(err);
            }
            None => tracing::info!(
                subscription = %subscription,
                live_subscriptions = still_live,
                "transport subscription completed"
            ),
        }
    }

    fn end_all_subscriptions(&self) {
        let mut subscriptions = self.subscriptions.lock();
        for state in subscriptions.values_mut() {
            if *state == SubscriptionState::Live {
                *state = SubscriptionState::Ended(None);
            }
        }
    }

    #[must_use]
    pub fn is_subscription_live(&self, subscription: SubscriptionId) -> bool {
        self.subscriptions.lock().get(&subscription) == Some(&SubscriptionState::Live)
    }

    #[must_use]
    pub fn live_subscriptions(&self) -> usize {
        self.subscriptions
            .lock()
            .values()
            .filter(|state| **state == SubscriptionState::Live)
            .count()
    }

    /// Failure that ended `subscription`, if it ended abnormally.
    #[must_use]
    pub fn subscription_error(&self, subscription: SubscriptionId) -> Option<TransportError> {
        match self.subscriptions.lock().get(&subscription) {
            Some(SubscriptionState::Ended(error)) => error.clone(),
            _ => None,
        }
    }

    /// Most recent failure reported by any subscription.
    #[must_use]
    pub fn last_transport_error(&self) -> Option<TransportError> {
        self.last_error.lock().clone()
    }

    #[must_use]
    pub fn delivered_events(&self) -> u64 {
        self.delivered.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn dropped_events(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    #[must_use]
    pub const fn config(&self) -> &DispatcherConfig {
        &self.cfg
    }
}

/// Dedicated producer thread feeding a [`Dispatcher`].
///
/// Dropping the worker stops its thread even while transports still hold
/// sinks; their later sends fail with [`TransportError::Disconnected`].
#[derive(Debug)]
pub struct DispatcherWorker<E> {
    dispatcher: Arc<Dispatcher<E>>,
    tx: Sender<TransportMessage<E>>,
    shutdown: Option<Sender<()>>,
    join: Option<JoinHandle<()>>,
}

impl<E: Clone + Send + Sync + 'static> DispatcherWorker<E> {
    pub fn spawn(dispatcher: Arc<Dispatcher<E>>) -> ObserveResult<Self> {
        let capacity = dispatcher.config().queue_capacity.max(1);
        let (tx, rx) = bounded::<TransportMessage<E>>(capacity);
        let (shutdown_tx, shutdown_rx) = bounded::<()>(0);

        let thread_dispatcher = Arc::clone(&dispatcher);
        let join = thread::Builder::new()
            .name("ledger-observe-dispatch".to_string())
            .spawn(move || worker_loop(&thread_dispatcher, &rx, &shutdown_rx))
            .map_err(|e| ObserveError::internal(format!("failed to spawn dispatcher worker: {e}")))?;

        Ok(Self {
            dispatcher,
            tx,
            shutdown: Some(shutdown_tx),
            join: Some(join),
        })
    }

    /// A producer handle for a new transport subscription.
    #[must_use]
    pub fn sink(&self) -> TransportSink<E> {
        TransportSink::new(self.dispatcher.open_subscription(), self.tx.clone())
    }
}

impl<E> DispatcherWorker<E> {
    /// Messages queued but not yet dispatched.
    #[must_use]
    pub fn backlog(&self) -> usize {
        self.tx.len()
    }
}

impl<E> Drop for DispatcherWorker<E> {
    fn drop(&mut self) {
        // Disconnecting the shutdown channel wakes the worker's select.
        drop(self.shutdown.take());
        // Detach: the thread exits on its own and releases the dispatcher.
        drop(self.join.take());
    }
}

fn worker_loop<E: Clone + Send + 'static>(
    dispatcher: &Dispatcher<E>,
    rx: &Receiver<TransportMessage<E>>,
    shutdown_rx: &Receiver<()>,
) {
    loop {
        select! {
            recv(rx) -> msg => match msg {
                Ok(TransportMessage::Batch { subscription, batch }) => {
                    dispatcher.dispatch_from(subscription, batch);
                }
                Ok(TransportMessage::Terminated { subscription, error }) => {
                    dispatcher.end_subscription(subscription, error);
                }
                Err(_) => break,
            },
            recv(shutdown_rx) -> _ => break,
        }
    }
    dispatcher.end_all_subscriptions();
    tracing::info!(
        delivered = dispatcher.delivered_events(),
        dropped = dispatcher.dropped_events(),
        "dispatcher worker stopped"
    );
}
