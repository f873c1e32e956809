//! Asynchronous Procedure Calls.
//!
//! Grounded on `ke::apc::{KApc, KApcState}` (`ki_insert_queue_apc`,
//! `deliver_kernel_apcs`/`deliver_user_apcs`) and `thread.c`'s
//! `get_apc_queue`/`queue_apc`/`thread_dequeue_apc`/`clear_apc_queue`. Kept
//! the two-queue (system/user) split and the FIFO-with-silent-APC_NONE-skip
//! dequeue policy; replaced the teacher's kernel-routine function pointers
//! with a tagged [`ApcCall`] enum, since the concrete APC payload types
//! (virtual memory ops, CPU context, breakpoints) are external collaborators'
//! concerns here (§1) — only their *shape* as a routed, waitable record
//! matters to this core.

use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::rc::Rc;

use log::trace;

use crate::ke::object::{AccessMask, ObjectRef, ObjectWaitQueue, WaitableObject};
use crate::ps::thread::ThreadId;

/// Which of a thread's two queues an APC type routes to (§4.3 Routing).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApcQueueKind {
    System,
    User,
}

/// The tagged union of APC kinds §3 describes. Concrete payload fields are
/// kept minimal opaque scalars/handles; interpreting them is the excluded
/// object-kind layer's job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ApcType {
    None,
    User,
    Timer,
    AsyncIo,
    VirtualAlloc,
    VirtualFree,
    VirtualQuery,
    VirtualProtect,
    MapView,
    UnmapView,
    CreateThread,
    BreakpointHit,
    BreakpointContinue,
}

impl ApcType {
    /// NONE, USER, TIMER go to the user queue; everything else to the
    /// system queue (§4.3).
    pub fn queue_kind(self) -> ApcQueueKind {
        match self {
            ApcType::None | ApcType::User | ApcType::Timer => ApcQueueKind::User,
            _ => ApcQueueKind::System,
        }
    }
}

/// The call arguments carried by an [`ApcRecord`], keyed by [`ApcType`].
#[derive(Debug, Clone)]
pub enum ApcCall {
    None,
    User {
        routine: u64,
        args: [u64; 3],
    },
    Timer {
        timer_id: u64,
    },
    AsyncIo {
        status: i32,
        information: u64,
    },
    VirtualAlloc {
        address: u64,
        size: u64,
        protect: u32,
    },
    VirtualFree {
        address: u64,
        size: u64,
    },
    VirtualQuery {
        address: u64,
    },
    VirtualProtect {
        address: u64,
        size: u64,
        protect: u32,
    },
    /// §8 scenario 6, §11: a cross-process `MAP_VIEW` carries a handle
    /// already resolved into the target process's space by the (excluded)
    /// handle table, rather than a raw source-process handle number.
    MapView {
        section: ObjectRef,
        offset: u64,
        size: u64,
    },
    UnmapView {
        address: u64,
    },
    CreateThread {
        entry: u64,
        arg: u64,
    },
    Breakpoint {
        code: u32,
    },
}

impl ApcCall {
    pub fn apc_type(&self) -> ApcType {
        match self {
            ApcCall::None => ApcType::None,
            ApcCall::User { .. } => ApcType::User,
            ApcCall::Timer { .. } => ApcType::Timer,
            ApcCall::AsyncIo { .. } => ApcType::AsyncIo,
            ApcCall::VirtualAlloc { .. } => ApcType::VirtualAlloc,
            ApcCall::VirtualFree { .. } => ApcType::VirtualFree,
            ApcCall::VirtualQuery { .. } => ApcType::VirtualQuery,
            ApcCall::VirtualProtect { .. } => ApcType::VirtualProtect,
            ApcCall::MapView { .. } => ApcType::MapView,
            ApcCall::UnmapView { .. } => ApcType::UnmapView,
            ApcCall::CreateThread { .. } => ApcType::CreateThread,
            ApcCall::Breakpoint { .. } => ApcType::BreakpointHit,
        }
    }
}

/// Result payload, filled in once an APC has executed client-side and its
/// outcome is posted back via `get-apc-result` (§6).
#[derive(Debug, Clone, Default)]
pub enum ApcResult {
    #[default]
    None,
    Status(i32),
    AsyncIo {
        status: i32,
        information: u64,
    },
    MapView {
        status: i32,
        address: u64,
    },
}

/// An APC record. A waitable object in its own right (§3, §4.3): *signaled*
/// iff `executed`.
pub struct ApcRecord {
    /// The object that posted this APC (§3: "owning object (optional,
    /// strong)") — e.g. a timer or an async I/O request, never the target
    /// thread. Used for same-owner-and-type cancellation (§4.3 Posting);
    /// compared by identity (`Rc::ptr_eq`), never by capability.
    pub owner: Option<ObjectRef>,
    /// Thread that posted the APC, set when it crossed a process boundary.
    pub caller_thread: Option<ThreadId>,
    pub call: ApcCall,
    executed: Cell<bool>,
    result: RefCell<ApcResult>,
    waiters: RefCell<ObjectWaitQueue>,
}

impl ApcRecord {
    pub fn new(owner: Option<ObjectRef>, caller_thread: Option<ThreadId>, call: ApcCall) -> Rc<Self> {
        Rc::new(Self {
            owner,
            caller_thread,
            call,
            executed: Cell::new(false),
            result: RefCell::new(ApcResult::default()),
            waiters: RefCell::new(ObjectWaitQueue::new()),
        })
    }

    pub fn apc_type(&self) -> ApcType {
        self.call.apc_type()
    }

    pub fn is_executed(&self) -> bool {
        self.executed.get()
    }

    pub fn result(&self) -> ApcResult {
        self.result.borrow().clone()
    }

    /// Marks the APC executed exactly once; §8 requires `executed` to be
    /// monotonic (once true, never false), so a second call is a no-op.
    pub fn mark_executed(&self, result: ApcResult) {
        if self.executed.replace(true) {
            return;
        }
        *self.result.borrow_mut() = result;
    }
}

impl WaitableObject for ApcRecord {
    fn is_signaled(&self, _thread: ThreadId) -> bool {
        self.is_executed()
    }

    fn add_to_wait_queue(&self, thread: ThreadId) {
        self.waiters.borrow_mut().push(thread);
    }

    fn remove_from_wait_queue(&self, thread: ThreadId) {
        self.waiters.borrow_mut().remove(thread);
    }

    fn map_access_mask(&self, mask: AccessMask) -> AccessMask {
        mask
    }

    fn waiting_threads(&self) -> Vec<ThreadId> {
        self.waiters.borrow().snapshot()
    }
}

/// Per-thread system/user APC lists (§3, §4.3).
#[derive(Default)]
pub struct ApcQueue {
    system: VecDeque<Rc<ApcRecord>>,
    user: VecDeque<Rc<ApcRecord>>,
}

impl ApcQueue {
    pub fn new() -> Self {
        Self::default()
    }

    fn queue_mut(&mut self, kind: ApcQueueKind) -> &mut VecDeque<Rc<ApcRecord>> {
        match kind {
            ApcQueueKind::System => &mut self.system,
            ApcQueueKind::User => &mut self.user,
        }
    }

    pub fn is_system_empty(&self) -> bool {
        self.system.is_empty()
    }

    pub fn is_user_empty(&self) -> bool {
        self.user.is_empty()
    }

    /// Appends `apc`. Returns `true` if the APC became the new head of its
    /// queue (i.e. the queue was empty beforehand) — the caller uses this to
    /// decide whether to invoke the wake evaluator (§4.3 Posting, last
    /// bullet).
    pub fn enqueue(&mut self, apc: Rc<ApcRecord>) -> bool {
        let kind = apc.apc_type().queue_kind();
        let queue = self.queue_mut(kind);
        let became_head = queue.is_empty();
        queue.push_back(apc);
        became_head
    }

    /// Cancels the first queued APC with the given `owner` and `apc_type`,
    /// if one exists, removing and returning it so the caller can mark it
    /// executed and wake its own waiters (§4.3 Posting, cancellation bullet).
    /// `owner` is compared by identity, not value — two distinct posting
    /// objects (e.g. two timers on the same thread) never match each other.
    pub fn cancel_owner(&mut self, owner: &ObjectRef, apc_type: ApcType) -> Option<Rc<ApcRecord>> {
        let queue = self.queue_mut(apc_type.queue_kind());
        let pos = queue.iter().position(|apc| {
            apc.apc_type() == apc_type && apc.owner.as_ref().is_some_and(|o| Rc::ptr_eq(o, owner))
        })?;
        queue.remove(pos)
    }

    /// Dequeue policy (§4.3): system queue head first; if empty and
    /// `system_only` is false, fall back to the user queue. `APC_NONE`
    /// entries exist only to force a wakeup and are consumed silently —
    /// the caller loops until a real APC or both queues are empty.
    ///
    /// Returns `(apc, consumed_none)` pairs via repeated calls; callers
    /// should loop on `None`-typed results themselves using
    /// [`ApcQueue::dequeue_next`], which already implements that loop.
    fn dequeue_head(&mut self, system_only: bool) -> Option<Rc<ApcRecord>> {
        if let Some(apc) = self.system.pop_front() {
            return Some(apc);
        }
        if system_only {
            return None;
        }
        self.user.pop_front()
    }

    /// Dequeues and returns the next real APC, silently consuming and
    /// marking executed any `APC_NONE` placeholder encountered along the way
    /// (§4.3 Dequeue policy).
    pub fn dequeue_next(&mut self, system_only: bool) -> Option<Rc<ApcRecord>> {
        loop {
            let apc = self.dequeue_head(system_only)?;
            if apc.apc_type() == ApcType::None {
                apc.mark_executed(ApcResult::None);
                trace!("consumed APC_NONE placeholder silently");
                continue;
            }
            return Some(apc);
        }
    }

    /// Drains both queues, marking every APC executed (§4.3 Clearing, used
    /// on thread destruction). The caller is responsible for waking each
    /// APC's own waiters; this just returns the drained records in order.
    pub fn drain_all(&mut self) -> Vec<Rc<ApcRecord>> {
        let mut drained: Vec<Rc<ApcRecord>> = self.system.drain(..).collect();
        drained.extend(self.user.drain(..));
        for apc in &drained {
            apc.mark_executed(ApcResult::None);
        }
        drained
    }
}
