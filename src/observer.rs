//! Blocking query surface.
//!
//! `observe` walks a subscriber's channel forward until an event matches,
//! publishing the match's bindings to the shared capture store, or fails at
//! the deadline. `assert_absent` proves a negative without consuming
//! anything, so later positive checks still see every buffered event.
//!
//! A single call moves through `Scanning -> Matched`, or
//! `Scanning -> Waiting -> Scanning ...` until it matches, times out, is
//! cancelled, or its channel is torn down. There are no internal retries.

use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::cancel::CancellationToken;
use crate::capture::CaptureStore;
use crate::channel::{EventChannel, ScanFailure, Sequenced};
use crate::config::NegativeAssertionPolicy;
use crate::dispatcher::Dispatcher;
use crate::error::{ObservationError, ObserveError, ObserveResult};
use crate::event::SubscriberKey;
use crate::matcher::Matcher;

/// Blocking observation API over a dispatcher's channels.
#[derive(Debug)]
pub struct Observer<E> {
    dispatcher: Arc<Dispatcher<E>>,
    captures: Arc<CaptureStore>,
    default_timeout: Duration,
    negative_policy: NegativeAssertionPolicy,
}

impl<E> Clone for Observer<E> {
    fn clone(&self) -> Self {
        Self {
            dispatcher: Arc::clone(&self.dispatcher),
            captures: Arc::clone(&self.captures),
            default_timeout: self.default_timeout,
            negative_policy: self.negative_policy,
        }
    }
}

impl<E: Clone + Send + 'static> Observer<E> {
    pub fn new(dispatcher: Arc<Dispatcher<E>>, captures: Arc<CaptureStore>) -> Self {
        Self {
            dispatcher,
            captures,
            default_timeout: Duration::from_secs(5),
            negative_policy: NegativeAssertionPolicy::Snapshot,
        }
    }

    #[must_use]
    pub fn with_default_timeout(mut self, timeout: Duration) -> Self {
        self.default_timeout = timeout;
        self
    }

    #[must_use]
    pub fn with_negative_policy(mut self, policy: NegativeAssertionPolicy) -> Self {
        self.negative_policy = policy;
        self
    }

    /// Shared capture store written by successful observations.
    #[must_use]
    pub const fn captures(&self) -> &Arc<CaptureStore> {
        &self.captures
    }

    #[must_use]
    pub const fn dispatcher(&self) -> &Arc<Dispatcher<E>> {
        &self.dispatcher
    }

    /// Blocks until an event on `key` matches, or `timeout` elapses.
    pub fn observe<M>(&self, key: impl Into<SubscriberKey>, matcher: &M, timeout: Duration) -> ObserveResult<E>
    where
        M: Matcher<E> + ?Sized,
    {
        self.observe_sequenced(key.into(), matcher, timeout, None)
            .map(|s| s.event)
    }

    /// [`Observer::observe`] with the configured default timeout.
    pub fn observe_default<M>(&self, key: impl Into<SubscriberKey>, matcher: &M) -> ObserveResult<E>
    where
        M: Matcher<E> + ?Sized,
    {
        self.observe(key, matcher, self.default_timeout)
    }

    /// [`Observer::observe`] that also fails with `Cancelled` as soon as
    /// `token` is cancelled.
    pub fn observe_with_cancel<M>(
        &self,
        key: impl Into<SubscriberKey>,
        matcher: &M,
        timeout: Duration,
        token: &CancellationToken,
    ) -> ObserveResult<E>
    where
        M: Matcher<E> + ?Sized,
    {
        self.observe_sequenced(key.into(), matcher, timeout, Some(token))
            .map(|s| s.event)
    }

    /// Like [`Observer::observe`] but also returns the arrival sequence.
    pub fn observe_sequenced<M>(
        &self,
        key: SubscriberKey,
        matcher: &M,
        timeout: Duration,
        token: Option<&CancellationToken>,
    ) -> ObserveResult<Sequenced<E>>
    where
        M: Matcher<E> + ?Sized,
    {
        // Timeouts too large to represent as an instant wait without limit.
        let deadline = Instant::now().checked_add(timeout);
        let channel = self.channel_for(&key);
        tracing::debug!(
            key = %key,
            pattern = %matcher.describe(),
            timeout_ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
            "observing"
        );

        channel
            .scan_and_consume(matcher, deadline, &self.captures, token)
            .map_err(|failure| {
                let stats = channel.stats();
                tracing::debug!(
                    key = %key,
                    pattern = %matcher.describe(),
                    ?failure,
                    discarded = stats.discarded,
                    "observation failed"
                );
                scan_error(failure, key, matcher.describe(), timeout)
            })
    }

    /// Fails with `UnexpectedMatch` if an event matching `matcher` is
    /// buffered for `key` (or, under a grace-window policy, arrives during
    /// the window). Never consumes events or publishes bindings.
    pub fn assert_absent<M>(&self, key: impl Into<SubscriberKey>, matcher: &M) -> ObserveResult<()>
    where
        M: Matcher<E> + ?Sized,
    {
        let key = key.into();
        let channel = self.channel_for(&key);

        let found = match self.negative_policy {
            NegativeAssertionPolicy::Snapshot => channel.find_unconsumed(matcher),
            NegativeAssertionPolicy::GraceWindow { window_ms } => {
                let deadline = Instant::now().checked_add(Duration::from_millis(window_ms));
                channel
                    .await_unconsumed(matcher, deadline, None)
                    .map_err(|failure| scan_error(failure, key.clone(), matcher.describe(), Duration::from_millis(window_ms)))?
            }
        };

        match found {
            None => Ok(()),
            Some(hit) => {
                tracing::debug!(key = %key, sequence = hit.sequence, "negative assertion violated");
                Err(ObservationError::UnexpectedMatch {
                    key,
                    pattern: matcher.describe(),
                    sequence: hit.sequence,
                }
                .into())
            }
        }
    }

    /// Observers currently blocked on `key`.
    #[must_use]
    pub fn pending(&self, key: &SubscriberKey) -> usize {
        self.dispatcher
            .channel(key)
            .map_or(0, |ch| ch.stats().waiting)
    }

    /// Buffered events for `key`, oldest first.
    #[must_use]
    pub fn unconsumed(&self, key: &SubscriberKey) -> Vec<Sequenced<E>> {
        self.dispatcher
            .channel(key)
            .map(|ch| ch.peek_all_unconsumed())
            .unwrap_or_default()
    }

    /// Channels are created on first use so a query issued before the
    /// first event still waits on the right buffer.
    fn channel_for(&self, key: &SubscriberKey) -> Arc<EventChannel<E>> {
        self.dispatcher.register(key.clone())
    }
}

fn scan_error(failure: ScanFailure, key: SubscriberKey, pattern: String, timeout: Duration) -> ObserveError {
    match failure {
        ScanFailure::TimedOut => ObservationError::Timeout { key, pattern, timeout },
        ScanFailure::Cancelled => ObservationError::Cancelled { key, pattern },
        ScanFailure::Closed => ObservationError::ChannelClosed { key },
    }
    .into()
}
