//! Inbound transport contract.
//!
//! The engine does not speak any wire protocol. A transport collaborator
//! subscribes at a starting offset and pushes ordered batches into a
//! [`TransportSink`], then reports termination exactly once. Each sink is
//! bound to one [`SubscriptionId`]; ending one subscription leaves the
//! others sharing the dispatcher untouched. The sink feeds the dispatcher
//! worker's bounded queue.

use std::fmt;
use std::sync::Arc;

use crossbeam_channel::Sender;
use parking_lot::Mutex;

use crate::error::{ObserveResult, TransportError};
use crate::event::SubscriberKey;

/// Where a subscription starts reading.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum StreamOffset {
    /// Replay everything the ledger has recorded.
    Begin,
    /// Only events recorded after the subscription starts.
    #[default]
    End,
}

/// An ordered group of events delivered together.
#[derive(Debug, Clone, PartialEq)]
pub struct TransportBatch<E> {
    /// Subscription the batch was read for. When absent, the dispatcher
    /// resolves keys per event.
    pub key: Option<SubscriberKey>,
    pub events: Vec<E>,
}

impl<E> TransportBatch<E> {
    #[must_use]
    pub const fn new(events: Vec<E>) -> Self {
        Self { key: None, events }
    }

    #[must_use]
    pub fn for_key(key: impl Into<SubscriberKey>, events: Vec<E>) -> Self {
        Self {
            key: Some(key.into()),
            events,
        }
    }
}

/// Identity of one transport subscription feeding a dispatcher.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionId(pub u64);

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sub-{}", self.0)
    }
}

/// Messages flowing from a transport to the dispatcher worker.
#[derive(Debug, Clone, PartialEq)]
pub enum TransportMessage<E> {
    Batch {
        subscription: SubscriptionId,
        batch: TransportBatch<E>,
    },
    /// End of one subscription, with the failure if it did not end cleanly.
    Terminated {
        subscription: SubscriptionId,
        error: Option<TransportError>,
    },
}

/// Producer handle given to a transport.
///
/// Clones share the subscription they were created for.
#[derive(Debug)]
pub struct TransportSink<E> {
    subscription: SubscriptionId,
    tx: Sender<TransportMessage<E>>,
}

impl<E> Clone for TransportSink<E> {
    fn clone(&self) -> Self {
        Self {
            subscription: self.subscription,
            tx: self.tx.clone(),
        }
    }
}

impl<E> TransportSink<E> {
    pub(crate) const fn new(subscription: SubscriptionId, tx: Sender<TransportMessage<E>>) -> Self {
        Self { subscription, tx }
    }

    #[must_use]
    pub const fn subscription(&self) -> SubscriptionId {
        self.subscription
    }

    /// Queues a batch. Blocks while the dispatcher queue is full so that no
    /// event is lost.
    ///
    /// Fails with [`TransportError::Disconnected`] once the dispatcher worker
    /// has stopped.
    pub fn deliver(&self, batch: TransportBatch<E>) -> ObserveResult<()> {
        self.send(TransportMessage::Batch {
            subscription: self.subscription,
            batch,
        })
    }

    /// Reports the end of this sink's subscription.
    pub fn terminate(&self, error: Option<TransportError>) -> ObserveResult<()> {
        self.send(TransportMessage::Terminated {
            subscription: self.subscription,
            error,
        })
    }

    fn send(&self, message: TransportMessage<E>) -> ObserveResult<()> {
        self.tx.send(message).map_err(|_| {
            TransportError::Disconnected {
                path: "dispatcher_queue".to_string(),
            }
            .into()
        })
    }
}

/// Inbound transport collaborator.
pub trait EventSource<E>: Send + Sync {
    /// Starts delivering batches from `offset` into `sink`.
    fn subscribe(&self, offset: StreamOffset, sink: TransportSink<E>) -> ObserveResult<()>;
}

/// In-memory ledger log that replays and then follows appended batches.
#[derive(Debug)]
pub struct ReplaySource<E> {
    inner: Mutex<ReplayState<E>>,
}

#[derive(Debug)]
struct ReplayState<E> {
    log: Vec<TransportBatch<E>>,
    subscribers: Vec<TransportSink<E>>,
    terminated: bool,
}

impl<E> Default for ReplaySource<E> {
    fn default() -> Self {
        Self {
            inner: Mutex::new(ReplayState {
                log: Vec::new(),
                subscribers: Vec::new(),
                terminated: false,
            }),
        }
    }
}

impl<E: Clone> ReplaySource<E> {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn shared() -> Arc<Self> {
        Arc::new(Self::new())
    }

    /// Records a batch and forwards it to live subscribers.
    ///
    /// Subscribers whose dispatcher has gone away are dropped.
    pub fn append(&self, batch: TransportBatch<E>) {
        let mut state = self.inner.lock();
        state.subscribers.retain(|sink| {
            let live = sink.deliver(batch.clone()).is_ok();
            if !live {
                tracing::debug!(subscription = %sink.subscription(), "dropping detached subscriber");
            }
            live
        });
        state.log.push(batch);
    }

    /// Ends every live subscription with `error`.
    pub fn terminate(&self, error: Option<TransportError>) {
        let mut state = self.inner.lock();
        for sink in state.subscribers.drain(..) {
            let _ = sink.terminate(error.clone());
        }
        state.terminated = true;
    }

    /// Subscribers still attached, as of the last append or subscribe.
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.inner.lock().subscribers.len()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.lock().log.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inner.lock().log.is_empty()
    }
}

impl<E: Clone + Send> EventSource<E> for ReplaySource<E> {
    fn subscribe(&self, offset: StreamOffset, sink: TransportSink<E>) -> ObserveResult<()> {
        let mut state = self.inner.lock();
        if offset == StreamOffset::Begin {
            for batch in &state.log {
                sink.deliver(batch.clone())?;
            }
        }
        if state.terminated {
            sink.terminate(Some(TransportError::UnexpectedCompletion))?;
            return Ok(());
        }
        state.subscribers.push(sink);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crossbeam_channel::{unbounded, Receiver};

    const SUB: SubscriptionId = SubscriptionId(1);

    fn messages(rx: &Receiver<TransportMessage<u32>>) -> Vec<TransportMessage<u32>> {
        rx.try_iter().collect()
    }

    fn batch(events: Vec<u32>) -> TransportMessage<u32> {
        TransportMessage::Batch {
            subscription: SUB,
            batch: TransportBatch::new(events),
        }
    }

    #[test]
    fn test_begin_replays_log_then_follows() {
        let source = ReplaySource::new();
        source.append(TransportBatch::new(vec![1, 2]));

        let (tx, rx) = unbounded();
        source.subscribe(StreamOffset::Begin, TransportSink::new(SUB, tx)).unwrap();
        source.append(TransportBatch::new(vec![3]));

        assert_eq!(messages(&rx), vec![batch(vec![1, 2]), batch(vec![3])]);
    }

    #[test]
    fn test_end_skips_history() {
        let source = ReplaySource::new();
        source.append(TransportBatch::new(vec![1]));

        let (tx, rx) = unbounded();
        source.subscribe(StreamOffset::End, TransportSink::new(SUB, tx)).unwrap();
        source.append(TransportBatch::new(vec![2]));

        assert_eq!(messages(&rx), vec![batch(vec![2])]);
    }

    #[test]
    fn test_terminate_is_tagged_with_subscription() {
        let source: ReplaySource<u32> = ReplaySource::new();
        let (tx, rx) = unbounded();
        source.subscribe(StreamOffset::End, TransportSink::new(SubscriptionId(7), tx)).unwrap();

        let err = TransportError::SubscriptionFailed {
            message: "reset".to_string(),
        };
        source.terminate(Some(err.clone()));
        assert_eq!(
            messages(&rx),
            vec![TransportMessage::Terminated {
                subscription: SubscriptionId(7),
                error: Some(err),
            }]
        );
    }

    #[test]
    fn test_deliver_to_dropped_queue_is_disconnected() {
        let (tx, rx) = unbounded::<TransportMessage<u32>>();
        drop(rx);
        let err = TransportSink::new(SUB, tx).deliver(TransportBatch::new(vec![1])).unwrap_err();
        assert!(err.is_transport());
    }

    #[test]
    fn test_append_prunes_detached_subscribers() {
        let source = ReplaySource::new();
        let (live_tx, live_rx) = unbounded();
        let (gone_tx, gone_rx) = unbounded();
        source.subscribe(StreamOffset::End, TransportSink::new(SubscriptionId(1), live_tx)).unwrap();
        source.subscribe(StreamOffset::End, TransportSink::new(SubscriptionId(2), gone_tx)).unwrap();
        assert_eq!(source.subscriber_count(), 2);

        drop(gone_rx);
        source.append(TransportBatch::new(vec![5]));

        assert_eq!(source.subscriber_count(), 1);
        assert_eq!(messages(&live_rx), vec![batch(vec![5])]);
    }
}
