//! Timer Service.
//!
//! Schedules callbacks at an absolute monotonic deadline and supports
//! idempotent cancellation. Grounded on `ke::timer::KTimer` (sorted timer
//! queue, `expire()`) and `thread.c`'s `add_timeout_user`/`thread_timeout`.
//! Re-architected as a `BinaryHeap` keyed by deadline instead of an intrusive
//! sorted linked list — once entries no longer need to live inline on an
//! object, a heap is the natural std replacement for a sorted list walk.

use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap};

use log::trace;

/// A monotonic tick count, per §2: "64-bit monotonic ticks in the server's
/// `current_time` clock."
pub type Tick = u64;

/// Preserved verbatim rather than converted to an absolute deadline (§4.5
/// step 1).
pub const TIMEOUT_INFINITE: Tick = u64::MAX;

/// Opaque handle returned by [`TimerService::schedule`], passed back to
/// [`TimerService::cancel`].
pub type TimerHandle = u64;

struct Entry<T> {
    deadline: Tick,
    payload: T,
}

/// Schedules deadline-triggered payloads and hands them back once their
/// deadline has passed. The service is deliberately pull-based
/// (`poll_expired`) rather than callback-based: the teacher's callbacks run
/// on the main loop and mutate arbitrary thread state, which in a safe Rust
/// rewrite is better modeled as "the event loop asks what fired, then acts"
/// than as a boxed closure capturing the wait engine.
pub struct TimerService<T> {
    next_handle: TimerHandle,
    heap: BinaryHeap<Reverse<(Tick, TimerHandle)>>,
    entries: HashMap<TimerHandle, Entry<T>>,
}

impl<T> TimerService<T> {
    pub fn new() -> Self {
        Self {
            next_handle: 1,
            heap: BinaryHeap::new(),
            entries: HashMap::new(),
        }
    }

    /// Schedules `payload` to fire at `deadline`. `deadline == TIMEOUT_INFINITE`
    /// is accepted but will never be picked up by `poll_expired` under a
    /// realistic clock; callers normally special-case infinite waits upstream
    /// (§4.5 step 8) rather than scheduling a timer for them at all.
    pub fn schedule(&mut self, deadline: Tick, payload: T) -> TimerHandle {
        let handle = self.next_handle;
        self.next_handle += 1;
        self.heap.push(Reverse((deadline, handle)));
        self.entries.insert(handle, Entry { deadline, payload });
        trace!("timer {handle} scheduled for tick {deadline}");
        handle
    }

    /// Idempotent: cancelling an already-fired or already-cancelled handle is
    /// a harmless no-op, matching §4.2's contract.
    pub fn cancel(&mut self, handle: TimerHandle) -> bool {
        let removed = self.entries.remove(&handle).is_some();
        if removed {
            trace!("timer {handle} cancelled");
        }
        removed
    }

    /// Returns every payload whose deadline is `<= now`, in deadline order,
    /// removing them from the service. Stale heap entries left behind by a
    /// `cancel()` are skipped here rather than eagerly removed from the heap.
    pub fn poll_expired(&mut self, now: Tick) -> Vec<T> {
        let mut fired = Vec::new();
        while let Some(&Reverse((deadline, handle))) = self.heap.peek() {
            if deadline > now {
                break;
            }
            self.heap.pop();
            if let Some(entry) = self.entries.remove(&handle) {
                debug_assert_eq!(entry.deadline, deadline);
                fired.push(entry.payload);
            }
        }
        fired
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }
}

impl<T> Default for TimerService<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fires_in_deadline_order() {
        let mut svc = TimerService::new();
        svc.schedule(10, "second");
        svc.schedule(5, "first");
        svc.schedule(20, "third");
        assert_eq!(svc.poll_expired(12), vec!["first", "second"]);
        assert_eq!(svc.poll_expired(20), vec!["third"]);
        assert!(svc.is_empty());
    }

    #[test]
    fn cancel_is_idempotent_before_and_after_fire() {
        let mut svc = TimerService::new();
        let h = svc.schedule(5, "payload");
        assert!(svc.cancel(h));
        assert!(!svc.cancel(h)); // already gone, still safe
        assert!(svc.poll_expired(100).is_empty());
    }

    #[test]
    fn cancel_after_fire_is_a_safe_noop() {
        let mut svc = TimerService::new();
        let h = svc.schedule(1, "payload");
        assert_eq!(svc.poll_expired(1), vec!["payload"]);
        assert!(!svc.cancel(h));
    }

    #[test]
    fn nothing_fires_before_deadline() {
        let mut svc = TimerService::new();
        svc.schedule(100, "payload");
        assert!(svc.poll_expired(99).is_empty());
        assert_eq!(svc.len(), 1);
    }
}
