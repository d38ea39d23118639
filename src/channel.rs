//! Per-subscriber event channel.
//!
//! Each channel is a monitor: one mutex guarding an ordered buffer of
//! not-yet-consumed events, and one condition variable signalled on every
//! push. Scans are destructive and move strictly forward. Once a scan
//! settles on a match, a timeout, or a closed channel, every event it
//! examined is gone for good. A cancelled scan leaves the buffer untouched.

use std::collections::VecDeque;
use std::sync::{Arc, Weak};
use std::time::Instant;

use parking_lot::{Condvar, Mutex, MutexGuard};

use crate::cancel::{CancelWaker, CancellationToken};
use crate::capture::CaptureStore;
use crate::event::SubscriberKey;
use crate::matcher::{MatchOutcome, Matcher};

/// An event tagged with its arrival position on the channel.
#[derive(Debug, Clone, PartialEq)]
pub struct Sequenced<E> {
    pub sequence: u64,
    pub event: E,
}

/// Why a scan ended without a match.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanFailure {
    TimedOut,
    Cancelled,
    Closed,
}

/// Point-in-time channel counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ChannelStats {
    pub pushed: u64,
    pub consumed: u64,
    pub discarded: u64,
    pub buffered: usize,
    pub waiting: usize,
    pub next_sequence: u64,
}

#[derive(Debug)]
struct ChannelState<E> {
    buffer: VecDeque<Sequenced<E>>,
    next_sequence: u64,
    open: bool,
    consumed: u64,
    discarded: u64,
    waiting: usize,
}

impl<E> ChannelState<E> {
    /// Drops buffered events up to and including sequence `through`.
    fn discard_through(&mut self, through: Option<u64>) -> u64 {
        let Some(through) = through else { return 0 };
        let mut n = 0;
        while self.buffer.front().is_some_and(|item| item.sequence <= through) {
            self.buffer.pop_front();
            n += 1;
        }
        self.discarded += n;
        n
    }
}

/// Ordered, consumable buffer of events for one subscriber.
#[derive(Debug)]
pub struct EventChannel<E> {
    key: SubscriberKey,
    state: Mutex<ChannelState<E>>,
    arrivals: Condvar,
}

impl<E> EventChannel<E> {
    #[must_use]
    pub fn new(key: SubscriberKey) -> Self {
        Self {
            key,
            state: Mutex::new(ChannelState {
                buffer: VecDeque::new(),
                next_sequence: 0,
                open: true,
                consumed: 0,
                discarded: 0,
                waiting: 0,
            }),
            arrivals: Condvar::new(),
        }
    }

    #[must_use]
    pub const fn key(&self) -> &SubscriberKey {
        &self.key
    }

    /// Appends an event and wakes blocked scanners.
    ///
    /// Returns false, dropping the event, once the channel has been closed.
    pub fn push(&self, event: E) -> bool {
        let mut state = self.state.lock();
        if !state.open {
            return false;
        }
        let sequence = state.next_sequence;
        state.next_sequence += 1;
        state.buffer.push_back(Sequenced { sequence, event });
        tracing::trace!(key = %self.key, sequence, buffered = state.buffer.len(), "event buffered");
        drop(state);
        self.arrivals.notify_all();
        true
    }

    /// Stops accepting events and wakes every waiter.
    ///
    /// Buffered events stay available to scans.
    pub fn close(&self) {
        let mut state = self.state.lock();
        if !state.open {
            return;
        }
        state.open = false;
        tracing::debug!(key = %self.key, buffered = state.buffer.len(), "channel closed");
        drop(state);
        self.arrivals.notify_all();
    }

    #[must_use]
    pub fn is_open(&self) -> bool {
        self.state.lock().open
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.state.lock().buffer.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.state.lock().buffer.is_empty()
    }

    #[must_use]
    pub fn stats(&self) -> ChannelStats {
        let state = self.state.lock();
        ChannelStats {
            pushed: state.next_sequence,
            consumed: state.consumed,
            discarded: state.discarded,
            buffered: state.buffer.len(),
            waiting: state.waiting,
            next_sequence: state.next_sequence,
        }
    }

    /// Finds the first buffered event matching `matcher` without consuming
    /// anything or publishing bindings.
    pub fn find_unconsumed<M>(&self, matcher: &M) -> Option<Sequenced<E>>
    where
        M: Matcher<E> + ?Sized,
        E: Clone,
    {
        let state = self.state.lock();
        state
            .buffer
            .iter()
            .find(|item| matcher.evaluate(&item.event).is_match())
            .cloned()
    }
}

impl<E: Clone> EventChannel<E> {
    /// Snapshot of every buffered event, oldest first. Does not consume.
    #[must_use]
    pub fn peek_all_unconsumed(&self) -> Vec<Sequenced<E>> {
        self.state.lock().buffer.iter().cloned().collect()
    }
}

impl<E: Send + 'static> EventChannel<E> {
    /// Scans forward from the head until an event matches, blocking for new
    /// pushes until `deadline`. `None` waits without limit.
    ///
    /// On a match the bindings are merged into `captures`, and the match plus
    /// every event before it leave the buffer. Events examined without a
    /// match are discarded when the scan times out or finds the channel
    /// closed. A cancelled scan consumes nothing.
    pub fn scan_and_consume<M>(
        self: &Arc<Self>,
        matcher: &M,
        deadline: Option<Instant>,
        captures: &CaptureStore,
        cancel: Option<&CancellationToken>,
    ) -> Result<Sequenced<E>, ScanFailure>
    where
        M: Matcher<E> + ?Sized,
    {
        let _registration = cancel.map(|token| {
            let weak: Weak<dyn CancelWaker> = Arc::downgrade(self) as Weak<dyn CancelWaker>;
            token.register(weak)
        });
        let is_cancelled = || cancel.is_some_and(CancellationToken::is_cancelled);

        // Highest sequence evaluated without a match.
        let mut examined: Option<u64> = None;
        let mut state = self.state.lock();
        loop {
            if is_cancelled() {
                return Err(ScanFailure::Cancelled);
            }

            let from = examined.map_or(0, |seq| seq + 1);
            let mut hit = None;
            for (index, item) in state.buffer.iter().enumerate() {
                if item.sequence < from {
                    continue;
                }
                match matcher.evaluate(&item.event) {
                    MatchOutcome::Match(bindings) => {
                        hit = Some((index, bindings));
                        break;
                    }
                    MatchOutcome::NoMatch => examined = Some(item.sequence),
                }
                if is_cancelled() {
                    return Err(ScanFailure::Cancelled);
                }
            }

            if let Some((index, bindings)) = hit {
                let skipped = state.buffer.drain(..index).count() as u64;
                state.discarded += skipped;
                if let Some(item) = state.buffer.pop_front() {
                    state.consumed += 1;
                    tracing::debug!(
                        key = %self.key,
                        sequence = item.sequence,
                        skipped,
                        bindings = bindings.len(),
                        "event matched"
                    );
                    captures.merge(bindings);
                    return Ok(item);
                }
            }

            if !state.open {
                state.discard_through(examined);
                return Err(ScanFailure::Closed);
            }
            if deadline.is_some_and(|deadline| Instant::now() >= deadline) {
                let skipped = state.discard_through(examined);
                tracing::trace!(key = %self.key, skipped, "scan timed out");
                return Err(ScanFailure::TimedOut);
            }

            // Spurious wakeups fall through to a rescan and a fresh deadline check.
            self.wait_for_arrival(&mut state, deadline);
        }
    }

    /// Waits until `deadline` (`None` for no limit) for any buffered or newly
    /// pushed event that matches, without consuming it.
    ///
    /// Events another caller consumes during the wait are not considered.
    pub fn await_unconsumed<M>(
        self: &Arc<Self>,
        matcher: &M,
        deadline: Option<Instant>,
        cancel: Option<&CancellationToken>,
    ) -> Result<Option<Sequenced<E>>, ScanFailure>
    where
        M: Matcher<E> + ?Sized,
        E: Clone,
    {
        let _registration = cancel.map(|token| {
            let weak: Weak<dyn CancelWaker> = Arc::downgrade(self) as Weak<dyn CancelWaker>;
            token.register(weak)
        });

        let mut checked_up_to = 0u64;
        let mut state = self.state.lock();
        loop {
            if cancel.is_some_and(CancellationToken::is_cancelled) {
                return Err(ScanFailure::Cancelled);
            }

            let found = state
                .buffer
                .iter()
                .filter(|item| item.sequence >= checked_up_to)
                .find(|item| matcher.evaluate(&item.event).is_match())
                .cloned();
            if found.is_some() {
                return Ok(found);
            }
            checked_up_to = state.next_sequence;

            if !state.open || deadline.is_some_and(|deadline| Instant::now() >= deadline) {
                return Ok(None);
            }

            self.wait_for_arrival(&mut state, deadline);
        }
    }

    fn wait_for_arrival(&self, state: &mut MutexGuard<'_, ChannelState<E>>, deadline: Option<Instant>) {
        state.waiting += 1;
        match deadline {
            Some(deadline) => {
                let _ = self.arrivals.wait_until(state, deadline);
            }
            None => self.arrivals.wait(state),
        }
        state.waiting -= 1;
    }
}

impl<E: Send> CancelWaker for EventChannel<E> {
    fn wake(&self) {
        // Taking the lock orders this notify after any in-progress
        // check-then-wait in a scanner.
        let _state = self.state.lock();
        self.arrivals.notify_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::matcher::{predicate, AnyEvent, Bindings};
    use crate::value::Value;
    use std::thread;
    use std::time::Duration;

    fn channel() -> Arc<EventChannel<u32>> {
        Arc::new(EventChannel::new(SubscriberKey::from("alice")))
    }

    fn soon(ms: u64) -> Option<Instant> {
        Some(Instant::now() + Duration::from_millis(ms))
    }

    #[test]
    fn test_scan_discards_everything_up_to_the_match() {
        let ch = channel();
        for e in [1, 2, 3, 4] {
            assert!(ch.push(e));
        }
        let store = CaptureStore::new();
        let got = ch
            .scan_and_consume(&predicate("is 3", |e: &u32| *e == 3), soon(50), &store, None)
            .unwrap();
        assert_eq!(got.event, 3);
        assert_eq!(got.sequence, 2);

        let left: Vec<_> = ch.peek_all_unconsumed().into_iter().map(|s| s.event).collect();
        assert_eq!(left, vec![4]);

        let stats = ch.stats();
        assert_eq!(stats.consumed, 1);
        assert_eq!(stats.discarded, 2);
        assert_eq!(stats.pushed, 4);
    }

    #[test]
    fn test_timeout_keeps_discards_discarded() {
        let ch = channel();
        ch.push(1);
        ch.push(2);
        let store = CaptureStore::new();
        let err = ch
            .scan_and_consume(&predicate("never", |_: &u32| false), soon(20), &store, None)
            .unwrap_err();
        assert_eq!(err, ScanFailure::TimedOut);
        assert!(ch.is_empty());
    }

    #[test]
    fn test_blocked_scan_wakes_on_push() {
        let ch = channel();
        let producer = Arc::clone(&ch);
        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(30));
            producer.push(99);
        });

        let store = CaptureStore::new();
        let got = ch.scan_and_consume(&AnyEvent, soon(2_000), &store, None).unwrap();
        assert_eq!(got.event, 99);
        handle.join().unwrap();
    }

    #[test]
    fn test_match_publishes_bindings() {
        struct Bind;
        impl Matcher<u32> for Bind {
            fn evaluate(&self, event: &u32) -> MatchOutcome {
                let mut b = Bindings::new();
                b.insert("seen", Value::Int(i64::from(*event)));
                MatchOutcome::Match(b)
            }
        }

        let ch = channel();
        ch.push(7);
        let store = CaptureStore::new();
        ch.scan_and_consume(&Bind, soon(10), &store, None).unwrap();
        assert_eq!(store.as_int("seen").unwrap(), 7);
    }

    #[test]
    fn test_cancelled_up_front_consumes_nothing() {
        let ch = channel();
        ch.push(1);
        let token = CancellationToken::new();
        token.cancel();
        let store = CaptureStore::new();
        let err = ch
            .scan_and_consume(&AnyEvent, soon(1_000), &store, Some(&token))
            .unwrap_err();
        assert_eq!(err, ScanFailure::Cancelled);
        assert_eq!(ch.len(), 1);
    }

    #[test]
    fn test_cancel_unblocks_waiter_promptly() {
        let ch = channel();
        let token = CancellationToken::new();
        let canceller = token.clone();
        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(30));
            canceller.cancel();
        });

        let started = Instant::now();
        let store = CaptureStore::new();
        let err = ch
            .scan_and_consume(&AnyEvent, soon(5_000), &store, Some(&token))
            .unwrap_err();
        assert_eq!(err, ScanFailure::Cancelled);
        assert!(started.elapsed() < Duration::from_secs(2));
        handle.join().unwrap();
    }

    #[test]
    fn test_closed_channel_rejects_pushes_and_fails_waiters() {
        let ch = channel();
        ch.push(1);
        ch.close();
        assert!(!ch.push(2));

        let store = CaptureStore::new();
        let got = ch.scan_and_consume(&AnyEvent, soon(10), &store, None).unwrap();
        assert_eq!(got.event, 1);
        let err = ch.scan_and_consume(&AnyEvent, soon(1_000), &store, None).unwrap_err();
        assert_eq!(err, ScanFailure::Closed);
    }

    #[test]
    fn test_find_unconsumed_does_not_consume() {
        let ch = channel();
        ch.push(1);
        ch.push(2);
        let found = ch.find_unconsumed(&predicate("is 2", |e: &u32| *e == 2)).unwrap();
        assert_eq!(found.sequence, 1);
        assert_eq!(ch.len(), 2);
    }

    #[test]
    fn test_await_unconsumed_sees_late_arrivals() {
        let ch = channel();
        ch.push(1);
        let producer = Arc::clone(&ch);
        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            producer.push(2);
        });

        let found = ch
            .await_unconsumed(&predicate("is 2", |e: &u32| *e == 2), soon(2_000), None)
            .unwrap();
        assert_eq!(found.map(|s| s.event), Some(2));
        assert_eq!(ch.len(), 2);
        handle.join().unwrap();

        let none = ch
            .await_unconsumed(&predicate("never", |_: &u32| false), soon(20), None)
            .unwrap();
        assert!(none.is_none());
    }

    #[test]
    fn test_cancel_mid_scan_keeps_examined_events() {
        // Cancels from another thread while the scan is mid-evaluation.
        struct CancelOnFirst(CancellationToken);
        impl Matcher<u32> for CancelOnFirst {
            fn evaluate(&self, _event: &u32) -> MatchOutcome {
                let token = self.0.clone();
                thread::spawn(move || token.cancel());
                while !self.0.is_cancelled() {
                    thread::yield_now();
                }
                MatchOutcome::NoMatch
            }
        }

        let ch = channel();
        ch.push(1);
        ch.push(2);
        let token = CancellationToken::new();
        let store = CaptureStore::new();
        let err = ch
            .scan_and_consume(&CancelOnFirst(token.clone()), soon(1_000), &store, Some(&token))
            .unwrap_err();

        assert_eq!(err, ScanFailure::Cancelled);
        assert_eq!(ch.len(), 2);
        assert_eq!(ch.stats().discarded, 0);
    }

    #[test]
    fn test_examined_events_survive_cancel_during_wait() {
        let ch = channel();
        ch.push(1);
        let token = CancellationToken::new();
        let canceller = token.clone();
        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(30));
            canceller.cancel();
        });

        let store = CaptureStore::new();
        let err = ch
            .scan_and_consume(&predicate("never", |_: &u32| false), soon(5_000), &store, Some(&token))
            .unwrap_err();
        assert_eq!(err, ScanFailure::Cancelled);
        assert_eq!(ch.len(), 1);
        handle.join().unwrap();
    }

    #[test]
    fn test_unbounded_deadline_waits_for_push() {
        let ch = channel();
        let producer = Arc::clone(&ch);
        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            producer.push(5);
        });

        let store = CaptureStore::new();
        let got = ch.scan_and_consume(&AnyEvent, None, &store, None).unwrap();
        assert_eq!(got.event, 5);
        assert_eq!(ch.stats().waiting, 0);
        handle.join().unwrap();
    }
}
