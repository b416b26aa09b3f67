//! Delayed-call scheduler over virtual time
//!
//! Each connection owns one reactor. Work that must not run synchronously
//! (the next sender-loop iteration, a pull, a timeout) is queued with
//! [`Reactor::call_later`] and picked up by whoever drives the connection.

use std::collections::{BTreeMap, HashMap};
use std::time::Duration;

/// Handle returned by [`Reactor::call_later`]
pub type CallId = u64;

/// Single-threaded scheduler of delayed tasks
#[derive(Debug)]
pub struct Reactor<T> {
    now: Duration,
    next_id: CallId,
    next_seq: u64,
    calls: BTreeMap<(Duration, u64), (CallId, T)>,
    index: HashMap<CallId, (Duration, u64)>,
}

impl<T> Reactor<T> {
    /// Create an empty reactor at time zero
    pub fn new() -> Self {
        Reactor {
            now: Duration::ZERO,
            next_id: 1,
            next_seq: 0,
            calls: BTreeMap::new(),
            index: HashMap::new(),
        }
    }

    /// Current virtual time
    pub fn now(&self) -> Duration {
        self.now
    }

    /// Run `task` once `delay` has elapsed
    pub fn call_later(&mut self, delay: Duration, task: T) -> CallId {
        let id = self.next_id;
        self.next_id += 1;
        let key = self.key_for(delay);
        self.calls.insert(key, (id, task));
        self.index.insert(id, key);
        id
    }

    /// Drop a pending call; false if it already ran or was cancelled
    pub fn cancel(&mut self, id: CallId) -> bool {
        match self.index.remove(&id) {
            Some(key) => self.calls.remove(&key).is_some(),
            None => false,
        }
    }

    /// Re-arm a pending call to fire `delay` from now
    pub fn reset(&mut self, id: CallId, delay: Duration) -> bool {
        let Some(old_key) = self.index.get(&id).copied() else {
            return false;
        };
        let Some(entry) = self.calls.remove(&old_key) else {
            return false;
        };
        let key = self.key_for(delay);
        self.calls.insert(key, entry);
        self.index.insert(id, key);
        true
    }

    /// Whether a call is still pending
    pub fn is_pending(&self, id: CallId) -> bool {
        self.index.contains_key(&id)
    }

    /// Move virtual time forward
    pub fn advance(&mut self, by: Duration) {
        self.now += by;
    }

    /// Take the earliest call that is due, if any
    pub fn pop_due(&mut self) -> Option<(CallId, T)> {
        let (&key, _) = self.calls.first_key_value()?;
        if key.0 > self.now {
            return None;
        }
        let (id, task) = self.calls.remove(&key)?;
        self.index.remove(&id);
        Some((id, task))
    }

    /// Time until the earliest pending call
    pub fn next_delay(&self) -> Option<Duration> {
        self.calls
            .first_key_value()
            .map(|(&(at, _), _)| at.saturating_sub(self.now))
    }

    /// Number of pending calls
    pub fn pending(&self) -> usize {
        self.calls.len()
    }

    fn key_for(&mut self, delay: Duration) -> (Duration, u64) {
        let seq = self.next_seq;
        self.next_seq += 1;
        (self.now + delay, seq)
    }
}

impl<T> Default for Reactor<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_due_calls_in_time_then_insertion_order() {
        let mut reactor = Reactor::new();
        reactor.call_later(Duration::from_millis(5), "late");
        reactor.call_later(Duration::ZERO, "first");
        reactor.call_later(Duration::ZERO, "second");

        assert_eq!(reactor.pop_due().map(|(_, t)| t), Some("first"));
        assert_eq!(reactor.pop_due().map(|(_, t)| t), Some("second"));
        assert_eq!(reactor.pop_due(), None);

        reactor.advance(Duration::from_millis(5));
        assert_eq!(reactor.pop_due().map(|(_, t)| t), Some("late"));
        assert_eq!(reactor.pending(), 0);
    }

    #[test]
    fn test_zero_delay_added_while_running_is_due() {
        let mut reactor = Reactor::new();
        reactor.call_later(Duration::ZERO, 1);
        let (_, task) = reactor.pop_due().unwrap();
        assert_eq!(task, 1);

        reactor.call_later(Duration::ZERO, 2);
        assert_eq!(reactor.pop_due().map(|(_, t)| t), Some(2));
    }

    #[test]
    fn test_cancel() {
        let mut reactor = Reactor::new();
        let id = reactor.call_later(Duration::from_secs(1), ());
        assert!(reactor.is_pending(id));
        assert!(reactor.cancel(id));
        assert!(!reactor.cancel(id));
        assert!(!reactor.is_pending(id));

        reactor.advance(Duration::from_secs(2));
        assert_eq!(reactor.pop_due(), None);
    }

    #[test]
    fn test_reset_rearms_relative_to_now() {
        let mut reactor = Reactor::new();
        let id = reactor.call_later(Duration::from_secs(10), "idle");

        reactor.advance(Duration::from_secs(8));
        assert!(reactor.reset(id, Duration::from_secs(10)));
        assert_eq!(reactor.next_delay(), Some(Duration::from_secs(10)));

        reactor.advance(Duration::from_secs(9));
        assert_eq!(reactor.pop_due(), None);
        reactor.advance(Duration::from_secs(1));
        assert_eq!(reactor.pop_due(), Some((id, "idle")));
        assert!(!reactor.reset(id, Duration::from_secs(1)));
    }

    #[test]
    fn test_next_delay() {
        let mut reactor: Reactor<()> = Reactor::new();
        assert_eq!(reactor.next_delay(), None);

        reactor.call_later(Duration::from_millis(30), ());
        reactor.advance(Duration::from_millis(50));
        assert_eq!(reactor.next_delay(), Some(Duration::ZERO));
    }
}
