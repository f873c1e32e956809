//! Object Protocol.
//!
//! Every waitable object — mutex, event, semaphore, APC, thread-as-object —
//! exposes the same small capability set. The wait engine never switches on
//! object kind; it only ever calls through this trait. Grounded on the
//! teacher's `object_ops` vtable pattern (`ke::dispatcher::DispatcherHeader`
//! plus `original_source/server_module/object.h`'s `struct object_ops`),
//! re-architected as a Rust trait with default "never-succeeds" bodies for
//! `is_signaled`/`satisfied`/the wait-queue hooks, per §4.1.

use std::rc::Rc;

use crate::ps::thread::ThreadId;

/// Access mask placeholder: the handle table and its rights bits are an
/// external collaborator's concern (§1); the core only needs something it
/// can pass through `map_access_mask` unchanged by default.
pub type AccessMask = u32;

/// `SYNCHRONIZE`, the one access right the core itself checks (§6).
pub const SYNCHRONIZE: AccessMask = 0x0010_0000;

const GENERIC_READ: AccessMask = 0x8000_0000;
const GENERIC_WRITE: AccessMask = 0x4000_0000;
const GENERIC_EXECUTE: AccessMask = 0x2000_0000;
const GENERIC_ALL: AccessMask = 0x1000_0000;

pub const STANDARD_RIGHTS_READ: AccessMask = 0x0002_0000;
pub const STANDARD_RIGHTS_WRITE: AccessMask = 0x0002_0000;
pub const STANDARD_RIGHTS_EXECUTE: AccessMask = 0x0002_0000;
pub const THREAD_ALL_ACCESS: AccessMask = 0x001F_03FF;

/// §6 generic-rights mapping, applied by whatever resolves a handle before
/// calling through to an object's own `map_access_mask`. Grounded on the
/// platform's established `GENERIC_READ`/`GENERIC_WRITE`/`GENERIC_EXECUTE`/
/// `GENERIC_ALL` translation table; the handle table itself that owns this
/// step is out of scope (§1), but the mapping rule is a pure function this
/// core can still publish for a caller to use.
pub fn map_generic_access(mask: AccessMask) -> AccessMask {
    let mut mapped = mask & !(GENERIC_READ | GENERIC_WRITE | GENERIC_EXECUTE | GENERIC_ALL);
    if mask & GENERIC_READ != 0 {
        mapped |= STANDARD_RIGHTS_READ | SYNCHRONIZE;
    }
    if mask & GENERIC_WRITE != 0 {
        mapped |= STANDARD_RIGHTS_WRITE | SYNCHRONIZE;
    }
    if mask & GENERIC_EXECUTE != 0 {
        mapped |= STANDARD_RIGHTS_EXECUTE;
    }
    if mask & GENERIC_ALL != 0 {
        mapped |= THREAD_ALL_ACCESS;
    }
    mapped
}

/// The capability set every waitable object publishes.
///
/// `is_signaled` is a pure query. `satisfied` is the mutator invoked exactly
/// once when a wait acquires the object (mutex ownership transfer, auto-reset
/// event, semaphore decrement); returning `true` means the acquisition is
/// *abandoned* (e.g. a mutex whose previous owner died) and the wait engine
/// upgrades the reported status accordingly.
///
/// `add_to_wait_queue`/`remove_from_wait_queue` let an object track its own
/// waiters (for `wake_queue`, §4.5); the "grab/release a strong reference"
/// part of the original contract is the wait engine's job, since it is the
/// one holding `Rc<dyn WaitableObject>` handles, not the object itself.
pub trait WaitableObject {
    fn is_signaled(&self, _thread: ThreadId) -> bool {
        false
    }

    fn satisfied(&self, _thread: ThreadId) -> bool {
        false
    }

    fn add_to_wait_queue(&self, _thread: ThreadId) {}

    fn remove_from_wait_queue(&self, _thread: ThreadId) {}

    /// Explicit signal step of a select-and-signal request (§4.5 step 5).
    /// Events, semaphores, and mutexes override this to flip their own
    /// signaled state and report whether the signal actually took
    /// (e.g. a semaphore already at its maximum count fails); APCs and
    /// threads are never signalable this way and take the default
    /// no-op/failure. The wait engine is responsible for waking any other
    /// thread already queued on the object once this returns success —
    /// that is not this method's job.
    fn signal(&self) -> bool {
        false
    }

    /// Called once per object a thread still held when it dies (§4.4
    /// Termination's "abandon held mutexes" step). Only mutex-like objects
    /// do anything with this.
    fn abandon(&self, _owner: ThreadId) {}

    fn map_access_mask(&self, mask: AccessMask) -> AccessMask {
        mask
    }

    /// Threads currently linked into this object's wait queue, in queue
    /// order. Used by [`crate::ke::wait::wake_queue`].
    fn waiting_threads(&self) -> Vec<ThreadId> {
        Vec::new()
    }

    fn destroy(&self) {}
}

/// A shared handle to any waitable object. `Rc`, not `Arc`: the core is
/// single-threaded and cooperative (§5), so there is no cross-thread sharing
/// to pay atomic-refcount overhead for.
pub type ObjectRef = Rc<dyn WaitableObject>;

/// A reusable, embeddable wait queue any `WaitableObject` implementor can
/// hold to satisfy `add_to_wait_queue`/`remove_from_wait_queue`/
/// `waiting_threads` without hand-rolling list bookkeeping. Grounded on
/// `ke::dispatcher::DispatcherHeader`'s intrusive `wait_list`, generalized
/// from an intrusive linked list to a plain `Vec` addressed by `ThreadId`
/// (no raw pointers once threads live in a `slab::Slab`, per DESIGN.md).
#[derive(Debug, Default, Clone)]
pub struct ObjectWaitQueue {
    waiters: Vec<ThreadId>,
}

impl ObjectWaitQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, thread: ThreadId) {
        self.waiters.push(thread);
    }

    /// Removes the first matching entry. A thread enqueues itself on a
    /// given object at most once per wait frame, so one removal per call
    /// is correct.
    pub fn remove(&mut self, thread: ThreadId) {
        if let Some(pos) = self.waiters.iter().position(|&t| t == thread) {
            self.waiters.remove(pos);
        }
    }

    pub fn is_empty(&self) -> bool {
        self.waiters.is_empty()
    }

    pub fn len(&self) -> usize {
        self.waiters.len()
    }

    pub fn snapshot(&self) -> Vec<ThreadId> {
        self.waiters.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use slab::Slab;

    struct NeverSignaled;
    impl WaitableObject for NeverSignaled {}

    #[test]
    fn default_capability_set_never_succeeds() {
        let mut ids: Slab<()> = Slab::new();
        let t = ThreadId::from_raw(ids.insert(()) as u32);
        let obj = NeverSignaled;
        assert!(!obj.is_signaled(t));
        assert!(!obj.satisfied(t));
        assert!(obj.waiting_threads().is_empty());
        assert_eq!(obj.map_access_mask(SYNCHRONIZE), SYNCHRONIZE);
    }

    #[test]
    fn generic_access_maps_to_standard_rights_and_synchronize() {
        assert_eq!(map_generic_access(GENERIC_READ), STANDARD_RIGHTS_READ | SYNCHRONIZE);
        assert_eq!(map_generic_access(GENERIC_ALL), THREAD_ALL_ACCESS);
        assert_eq!(map_generic_access(SYNCHRONIZE), SYNCHRONIZE);
    }

    #[test]
    fn wait_queue_push_remove_restarts_clean() {
        let mut q = ObjectWaitQueue::new();
        let a = ThreadId::from_raw(1);
        let b = ThreadId::from_raw(2);
        q.push(a);
        q.push(b);
        assert_eq!(q.len(), 2);
        q.remove(a);
        assert_eq!(q.snapshot(), vec![b]);
        q.remove(b);
        assert!(q.is_empty());
    }
}
