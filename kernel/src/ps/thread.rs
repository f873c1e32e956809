//! Thread record.
//!
//! Grounded on `ps::ethread::EThread` (`thread_flags`, `suspend()`/`resume()`)
//! and `original_source/server_module/thread.c`'s `struct thread` plus
//! `init_thread_structure`. The fixed `THREAD_POOL`/bitmap allocation becomes
//! a `slab::Slab<ThreadRecord>` owned by [`crate::ps::table::ThreadTable`];
//! intrusive list links (process list, global list, mutex list) become plain
//! `Vec`s addressed by [`ThreadId`] rather than raw pointers.

use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::Rc;

use crate::context::CpuType;
use crate::ke::apc::ApcQueue;
use crate::ke::object::{ObjectRef, ObjectWaitQueue, WaitableObject};
use crate::ke::timer::Tick;
use crate::ke::wait::{WaitChannel, WaitFrame};
use crate::ps::process::ProcessId;

/// A server-assigned, process-unique thread id (§3). Backed by a
/// [`slab::Slab`] key in [`crate::ps::table::ThreadTable`], so ids are
/// reused once freed — exactly the teacher's CID-table behavior, now arena
///-checked instead of raw-pointer-checked.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ThreadId(u32);

impl ThreadId {
    pub fn from_raw(raw: u32) -> Self {
        ThreadId(raw)
    }

    pub fn raw(self) -> u32 {
        self.0
    }
}

impl fmt::Display for ThreadId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#06x}", self.0)
    }
}

/// §3: `state` is one of `{RUNNING, TERMINATED}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThreadState {
    Running,
    Terminated,
}

/// A small fixed-capacity cache matching an ancillary-delivered fd to the
/// request that will reference it (§3, §9, §11). Grounded on
/// `thread_add_inflight_fd`/`thread_get_inflight_fd`: linear scan, no LRU,
/// because the cache's sole role is a short-lived rendezvous.
#[derive(Debug, Default)]
pub struct InflightFdCache {
    capacity: usize,
    entries: Vec<(i32, i32)>, // (client fd, server fd)
}

impl InflightFdCache {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            entries: Vec::with_capacity(capacity),
        }
    }

    /// Adds or replaces the mapping for `client`. Returns `false` if the
    /// cache is full and `client` was not already present.
    pub fn add(&mut self, client: i32, server: i32) -> bool {
        if let Some(slot) = self.entries.iter_mut().find(|(c, _)| *c == client) {
            slot.1 = server;
            return true;
        }
        if self.entries.len() >= self.capacity {
            return false;
        }
        self.entries.push((client, server));
        true
    }

    /// Removes and returns the server fd cached for `client`, if present.
    pub fn take(&mut self, client: i32) -> Option<i32> {
        let pos = self.entries.iter().position(|(c, _)| *c == client)?;
        Some(self.entries.remove(pos).1)
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

/// An opaque, heap-allocated capture of CPU registers (§3, §4.6). The real
/// register layout is an external collaborator's concern; this core only
/// needs to know a snapshot was taken and for which CPU type.
#[derive(Debug, Clone)]
pub struct OpaqueContext {
    pub cpu: CpuType,
    pub data: Vec<u8>,
}

impl crate::context::CpuContextSnapshot for OpaqueContext {
    fn cpu(&self) -> CpuType {
        self.cpu
    }

    fn copy_from(&mut self, other: &Self, flags: crate::context::ContextFlags) {
        debug_assert_eq!(self.cpu, other.cpu);
        // The concrete register layout is out of scope; the opaque blob is
        // copied wholesale whenever any flag is set, which is sufficient for
        // a core that never interprets the bytes itself.
        if !flags.is_empty() {
            self.data = other.data.clone();
        }
    }
}

/// A thread's own "has this thread exited" waitable, letting other threads
/// wait on a thread handle the same way they wait on any other object
/// (§3's "thread-as-object" mention) without the `ThreadRecord` itself
/// needing to live behind an `Rc` — only this small signal does.
pub struct ThreadExitSignal {
    exited: Cell<bool>,
    waiters: RefCell<ObjectWaitQueue>,
}

impl ThreadExitSignal {
    pub fn new() -> Rc<Self> {
        Rc::new(Self {
            exited: Cell::new(false),
            waiters: RefCell::new(ObjectWaitQueue::new()),
        })
    }

    pub fn mark_exited(&self) {
        self.exited.set(true);
    }
}

impl WaitableObject for ThreadExitSignal {
    fn is_signaled(&self, _thread: ThreadId) -> bool {
        self.exited.get()
    }

    fn add_to_wait_queue(&self, thread: ThreadId) {
        self.waiters.borrow_mut().push(thread);
    }

    fn remove_from_wait_queue(&self, thread: ThreadId) {
        self.waiters.borrow_mut().remove(thread);
    }

    fn waiting_threads(&self) -> Vec<ThreadId> {
        self.waiters.borrow().snapshot()
    }
}

/// The server-side record for one guest thread (§3).
pub struct ThreadRecord {
    pub id: ThreadId,
    pub process: ProcessId,

    pub os_pid: Option<u32>,
    pub os_tid: Option<u32>,
    pub teb: Option<u64>,
    pub cpu: Option<CpuType>,
    pub entry_point: Option<u64>,
    pub debug_level: u32,

    pub state: ThreadState,
    pub suspend: u32,
    /// Cached `process.suspend` as of the last suspend/resume broadcast
    /// (§3 "Suspend sum"). Process-wide suspend fan-out is an ambient
    /// bookkeeping detail the full process manager would own; this core
    /// keeps just enough of it to evaluate "is this thread effectively
    /// suspended" without a live cross-table join on every wait check.
    pub process_suspend: u32,
    pub priority: i32,
    pub affinity: u32,
    pub desktop: u32,

    pub impersonation_token: Option<u64>,
    pub current_context: Option<Box<OpaqueContext>>,
    pub suspend_context: Option<Box<OpaqueContext>>,

    pub inflight_fds: InflightFdCache,
    pub apcs: ApcQueue,
    pub mutexes: Vec<ObjectRef>,
    pub wait_stack: Vec<WaitFrame>,

    pub wait_channel: Option<Box<dyn WaitChannel>>,
    /// Non-null once `init-thread`'s handshake has run (§4.4); a second
    /// handshake attempt is rejected.
    pub initialized: bool,
    pub exit_signal: Rc<ThreadExitSignal>,

    pub create_time: Tick,
    pub exit_time: Option<Tick>,
    pub exit_code: i32,

    /// Handles/observers holding a reference beyond the table's own, in the
    /// spirit of `grab_object`/`release_object`. The handle table itself is
    /// out of scope (§1); this is just enough bookkeeping for `snapshot()`
    /// (§4.4) and idempotent destruction to make sense.
    refs: u32,
}

impl ThreadRecord {
    pub fn new(id: ThreadId, process: ProcessId, affinity: u32, desktop: u32, now: Tick) -> Self {
        Self {
            id,
            process,
            os_pid: None,
            os_tid: None,
            teb: None,
            cpu: None,
            entry_point: None,
            debug_level: 0,
            state: ThreadState::Running,
            suspend: 0,
            process_suspend: 0,
            priority: 0,
            affinity,
            desktop,
            impersonation_token: None,
            current_context: None,
            suspend_context: None,
            inflight_fds: InflightFdCache::new(0),
            apcs: ApcQueue::new(),
            mutexes: Vec::new(),
            wait_stack: Vec::new(),
            wait_channel: None,
            initialized: false,
            exit_signal: ThreadExitSignal::new(),
            create_time: now,
            exit_time: None,
            exit_code: 0,
            refs: 1,
        }
    }

    pub fn is_terminated(&self) -> bool {
        self.state == ThreadState::Terminated
    }

    /// §3 "Suspend sum": `thread.suspend + process.suspend > 0`.
    pub fn is_suspended(&self) -> bool {
        self.suspend + self.process_suspend > 0
    }

    pub fn is_waiting(&self) -> bool {
        !self.wait_stack.is_empty()
    }

    /// §4.3 `is_in_apc_wait`: eligible to receive a system APC wake-signal
    /// without needing a fresh OS-level signal, because the thread is
    /// either suspended or already blocked in an interruptible wait.
    pub fn is_in_apc_wait(&self) -> bool {
        self.is_suspended()
            || self
                .wait_stack
                .last()
                .is_some_and(|frame| frame.flags.contains(super::super::ke::wait::WaitFlags::INTERRUPTIBLE))
    }

    pub fn add_ref(&mut self) {
        self.refs += 1;
    }

    /// Releases one reference; returns `true` once the count reaches zero
    /// (the caller should then destroy the record).
    pub fn release_ref(&mut self) -> bool {
        self.refs = self.refs.saturating_sub(1);
        self.refs == 0
    }

    pub fn refs(&self) -> u32 {
        self.refs
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn inflight_cache_replaces_existing_client_entry() {
        let mut cache = InflightFdCache::new(2);
        assert!(cache.add(5, 10));
        assert!(cache.add(5, 11));
        assert_eq!(cache.take(5), Some(11));
        assert_eq!(cache.take(5), None);
    }

    #[test]
    fn inflight_cache_rejects_when_full() {
        let mut cache = InflightFdCache::new(1);
        assert!(cache.add(1, 100));
        assert!(!cache.add(2, 200));
    }

    #[test]
    fn suspend_sum_matches_spec() {
        let mut t = ThreadRecord::new(ThreadId::from_raw(1), ProcessId::from_raw(1), 0xF, 0, 0);
        assert!(!t.is_suspended());
        t.suspend = 1;
        assert!(t.is_suspended());
        t.suspend = 0;
        t.process_suspend = 1;
        assert!(t.is_suspended());
    }

    #[test]
    fn refcount_reaches_zero_exactly_once() {
        let mut t = ThreadRecord::new(ThreadId::from_raw(1), ProcessId::from_raw(1), 0xF, 0, 0);
        t.add_ref();
        assert!(!t.release_ref());
        assert!(t.release_ref());
    }
}
