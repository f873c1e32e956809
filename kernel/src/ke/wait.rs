//! Wait Engine.
//!
//! The largest component: turns a list of waitable handles plus a timeout
//! and a handful of flags into either an immediate result or a parked wait
//! frame that later gets woken by an object signalling, a timer firing, or
//! an APC arriving. Grounded on `ke::wait::{KWaitBlock, wait_for_multiple}`
//! (fixed-size wait block array, `status` field) and
//! `original_source/server_module/thread.c`'s `select_on`/`check_wait`/
//! `wake_thread`/`wake_up`/`thread_timeout`. The teacher's fixed-capacity
//! wait-block array becomes a growable `Vec`; the intrusive per-object
//! waiter list becomes [`crate::ke::object::ObjectWaitQueue`]; the
//! callback-driven timeout becomes a [`TimerHandle`] polled by the caller.

use bitflags::bitflags;
use log::{debug, error, warn};

use crate::error::ServerError;
use crate::ke::apc::ApcQueue;
use crate::ke::object::ObjectRef;
use crate::ke::timer::{Tick, TimerHandle, TimerService, TIMEOUT_INFINITE};
use crate::ps::table::ThreadTable;
use crate::ps::thread::ThreadId;

bitflags! {
    /// Flags carried on a `select` request, named after the teacher's
    /// `SELECT_*` constants.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct WaitFlags: u32 {
        /// Wait for every handle, not just one.
        const WAIT_ALL      = 0x0001;
        /// A pending system APC resolves the wait early with `STATUS_USER_APC`.
        const INTERRUPTIBLE = 0x0002;
        /// A pending user APC resolves the wait early with `STATUS_USER_APC`.
        const ALERTABLE     = 0x0004;
    }
}

/// §3, §6 well-known status codes the wait engine reports back to the
/// client. Values match the platform's established `NTSTATUS` constants so
/// that a transport layer downstream doesn't need its own translation table.
/// Kept as the wire-level encoding of [`WaitOutcome`]; nothing in this module
/// hands a bare one of these back to a caller anymore.
pub const STATUS_ABANDONED_WAIT_0: u32 = 0x0000_0080;
pub const STATUS_USER_APC: u32 = 0x0000_00C0;
pub const STATUS_TIMEOUT: u32 = 0x0000_0102;
pub const STATUS_PENDING: u32 = 0x0000_0103;

/// The wait engine's non-terminal outcomes, kept apart from [`ServerError`]
/// so that a bare `Err` always means "the request itself was malformed",
/// never "the wait succeeded with a status the protocol still needs to
/// convey". `Signaled`/`Abandoned` carry the index of the object that
/// resolved the wait (always `0` under `WAIT_ALL`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitOutcome {
    Signaled(u32),
    Abandoned(u32),
    UserApc,
    Timeout,
    Pending,
}

impl WaitOutcome {
    /// The wire status this outcome corresponds to (§3, §6).
    pub fn status(self) -> u32 {
        match self {
            WaitOutcome::Signaled(index) => index,
            WaitOutcome::Abandoned(index) => STATUS_ABANDONED_WAIT_0 + index,
            WaitOutcome::UserApc => STATUS_USER_APC,
            WaitOutcome::Timeout => STATUS_TIMEOUT,
            WaitOutcome::Pending => STATUS_PENDING,
        }
    }

    pub fn is_pending(self) -> bool {
        matches!(self, WaitOutcome::Pending)
    }
}

/// Sentinel the wire protocol uses for `TIMEOUT_INFINITE` before
/// normalization (§4.5 step 1): the platform convention of a maximally
/// negative relative timeout meaning "forever".
pub const RAW_TIMEOUT_INFINITE: i64 = i64::MIN;

/// Converts a raw, possibly-relative timeout into an absolute deadline tick
/// (§4.5 step 1). Positive values are already absolute; zero or negative
/// values are relative to `now` (a negative `LARGE_INTEGER`-style encoding,
/// so `now - raw` is the resulting deadline).
pub fn normalize_timeout(now: Tick, raw: i64) -> Tick {
    if raw == RAW_TIMEOUT_INFINITE {
        return TIMEOUT_INFINITE;
    }
    if raw <= 0 {
        now.wrapping_add(raw.unsigned_abs())
    } else {
        raw as Tick
    }
}

/// A parked wait, pushed onto a thread's `wait_stack` (§3). Nested waits
/// (a wait started from inside an APC delivered during an earlier wait) are
/// simply further entries on the same stack; only the top one is ever live.
pub struct WaitFrame {
    /// Monotonically increasing, assigned by [`WaitSeq::next`] when the
    /// frame is pushed. Lets a timeout callback recognize that the frame it
    /// was scheduled for is no longer the thread's active one, without
    /// comparing raw pointers (§9 Open Question 3's sibling concern).
    pub seq: u64,
    pub entries: Vec<ObjectRef>,
    pub flags: WaitFlags,
    pub deadline: Tick,
    pub timer: Option<TimerHandle>,
    /// Opaque value echoed back to the client alongside the resolved status
    /// (§6 wake-channel framing).
    pub cookie: u64,
}

/// Per-engine monotonic counter for [`WaitFrame::seq`].
#[derive(Debug, Default)]
pub struct WaitSeq(u64);

impl WaitSeq {
    pub fn new() -> Self {
        Self(0)
    }

    pub fn next(&mut self) -> u64 {
        self.0 += 1;
        self.0
    }
}

/// Result of delivering a wakeup to a client over its wait channel (§4.5
/// Wake delivery, §7). The channel itself — a socket, pipe, or anything
/// else a transport layer wants — is this core's one external collaborator
/// in the whole wait path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WakeDeliveryResult {
    Ok,
    /// The peer is gone (`EPIPE`-equivalent): normal death, no error
    /// surfaced past this point.
    Pipe,
    /// Fewer bytes were written than the framing requires.
    Partial,
    /// Any other I/O failure.
    Io,
}

/// Abstracts "park this client until a wake arrives" delivery. A real
/// transport implements this over its socket/pipe; tests use an in-memory
/// stand-in.
pub trait WaitChannel {
    fn send_wakeup(&mut self, cookie: u64, status: u32) -> WakeDeliveryResult;
}

fn timer_payload_for(thread: ThreadId, seq: u64) -> TimeoutPayload {
    TimeoutPayload { thread, seq }
}

/// What fires out of the timer service for a parked wait (§4.5 step 8's
/// timeout callback).
#[derive(Debug, Clone, Copy)]
pub struct TimeoutPayload {
    pub thread: ThreadId,
    pub seq: u64,
}

/// A `select` request (§4.5 steps 1-8).
pub struct SelectRequest {
    pub thread: ThreadId,
    pub cookie: u64,
    pub handles: Vec<ObjectRef>,
    pub flags: WaitFlags,
    /// Raw, not-yet-normalized timeout (see [`normalize_timeout`]).
    pub timeout_raw: i64,
    /// Optional handle to signal as part of the same request (e.g.
    /// `SignalAndWait`), evaluated before the wait is attempted.
    pub signal: Option<ObjectRef>,
}

/// Runs one `select` request to completion or parks it.
///
/// Returns `Ok(WaitOutcome::Pending)` if the wait was parked (the caller
/// should reply `STATUS_PENDING` and wait for a later wake delivery), the
/// resolved outcome if the wait was satisfied immediately, or `Err` for a
/// malformed request.
pub fn select(
    table: &mut ThreadTable,
    timers: &mut TimerService<TimeoutPayload>,
    seq: &mut WaitSeq,
    now: Tick,
    req: SelectRequest,
) -> Result<WaitOutcome, ServerError> {
    let max = table.config().max_wait_objects;
    if req.handles.len() > max {
        return Err(ServerError::InvalidParameter);
    }

    if let Some(obj) = &req.signal {
        if !obj.signal() {
            return Err(ServerError::InvalidParameter);
        }
        // Signaling is externally visible: any other thread already queued
        // on this object must be woken, not just the caller's own upcoming
        // wait (§4.5 step 5).
        wake_queue(table, timers, now, obj);
    }

    let deadline = normalize_timeout(now, req.timeout_raw);

    for obj in &req.handles {
        obj.add_to_wait_queue(req.thread);
    }

    let frame_seq = seq.next();
    let mut frame = WaitFrame {
        seq: frame_seq,
        entries: req.handles,
        flags: req.flags,
        deadline,
        timer: None,
        cookie: req.cookie,
    };

    let outcome = {
        let record = table.get(req.thread).ok_or(ServerError::InvalidCid)?;
        check_wait(&frame, req.thread, &record.apcs, record.is_suspended(), now)
    };

    if !outcome.is_pending() {
        for obj in &frame.entries {
            obj.remove_from_wait_queue(req.thread);
        }
        return Ok(outcome);
    }

    if deadline != TIMEOUT_INFINITE {
        frame.timer = Some(timers.schedule(deadline, timer_payload_for(req.thread, frame_seq)));
    }

    let record = table.get_mut(req.thread).ok_or(ServerError::InvalidCid)?;
    record.wait_stack.push(frame);
    Ok(WaitOutcome::Pending)
}

/// Evaluates whether a parked wait can now resolve (§4.5 step 6).
///
/// Mirrors `check_wait`'s exact branch order: interruptible-system-APC check
/// first, then the suspended gate, then the object test (with `WAIT_ALL`
/// falling through to the alertable/timeout checks if not every object is
/// signaled yet, exactly as the teacher's `goto other_checks` does), then
/// alertable-user-APC, then timeout.
pub fn check_wait(
    frame: &WaitFrame,
    thread: ThreadId,
    apcs: &ApcQueue,
    suspended: bool,
    now: Tick,
) -> WaitOutcome {
    if frame.flags.contains(WaitFlags::INTERRUPTIBLE) && !apcs.is_system_empty() {
        return WaitOutcome::UserApc;
    }

    if suspended {
        return WaitOutcome::Pending;
    }

    if frame.flags.contains(WaitFlags::WAIT_ALL) {
        if frame.entries.iter().all(|o| o.is_signaled(thread)) {
            let abandoned = frame.entries.iter().any(|o| o.satisfied(thread));
            return if abandoned { WaitOutcome::Abandoned(0) } else { WaitOutcome::Signaled(0) };
        }
    } else {
        for (index, obj) in frame.entries.iter().enumerate() {
            if obj.is_signaled(thread) {
                let abandoned = obj.satisfied(thread);
                let index = index as u32;
                return if abandoned {
                    WaitOutcome::Abandoned(index)
                } else {
                    WaitOutcome::Signaled(index)
                };
            }
        }
    }

    if frame.flags.contains(WaitFlags::ALERTABLE) && !apcs.is_user_empty() {
        return WaitOutcome::UserApc;
    }

    if frame.deadline <= now {
        return WaitOutcome::Timeout;
    }

    WaitOutcome::Pending
}

/// Tears down a resolved wait frame: unlinks from every object's wait queue
/// and cancels its timer, if any (§4.5 step 7's cleanup half).
fn end_wait(table: &mut ThreadTable, timers: &mut TimerService<TimeoutPayload>, thread: ThreadId, frame: &WaitFrame) {
    for obj in &frame.entries {
        obj.remove_from_wait_queue(thread);
    }
    if let Some(handle) = frame.timer {
        timers.cancel(handle);
    }
    let _ = table;
}

/// Re-evaluates `thread`'s active wait repeatedly, delivering a wakeup each
/// time one resolves, until the wait stack is empty, a wake fails, or the
/// top frame is no longer resolvable (§4.5 Wake thread).
///
/// Returns the number of frames woken.
pub fn wake_thread(table: &mut ThreadTable, timers: &mut TimerService<TimeoutPayload>, now: Tick, thread: ThreadId) -> usize {
    let mut count = 0;
    loop {
        let resolved = {
            let record = match table.get(thread) {
                Some(r) => r,
                None => break,
            };
            let frame = match record.wait_stack.last() {
                Some(f) => f,
                None => break,
            };
            check_wait(frame, thread, &record.apcs, record.is_suspended(), now)
        };

        if resolved.is_pending() {
            break;
        }

        let frame = {
            let record = table.get_mut(thread).expect("checked above");
            record.wait_stack.pop().expect("top frame just matched")
        };
        end_wait(table, timers, thread, &frame);
        count += 1;

        let delivery = {
            let record = table.get_mut(thread).expect("thread still present");
            match record.wait_channel.as_deref_mut() {
                Some(channel) => channel.send_wakeup(frame.cookie, resolved.status()),
                None => {
                    warn!("thread {thread} woke with no wait channel installed");
                    WakeDeliveryResult::Io
                }
            }
        };

        match delivery {
            WakeDeliveryResult::Ok => continue,
            WakeDeliveryResult::Pipe => {
                debug!("thread {thread} wait channel closed, killing without violence");
                break;
            }
            WakeDeliveryResult::Partial | WakeDeliveryResult::Io => {
                error!("thread {thread} fatal protocol error delivering wakeup");
                break;
            }
        }
    }
    count
}

/// Re-evaluates every thread currently queued on `object` (§4.5 Wake queue).
/// Because waking one thread can mutate the same object's queue (e.g. a
/// mutex changing owners), the scan restarts from the object's current
/// snapshot after each successful wake rather than iterating a fixed list.
pub fn wake_queue(table: &mut ThreadTable, timers: &mut TimerService<TimeoutPayload>, now: Tick, object: &ObjectRef) {
    loop {
        let waiters = object.waiting_threads();
        if waiters.is_empty() {
            break;
        }
        let mut woke_any = false;
        for thread in waiters {
            if wake_thread(table, timers, now, thread) > 0 {
                woke_any = true;
                break;
            }
        }
        if !woke_any {
            break;
        }
    }
}

/// Drains every timer that has fired by `now` and re-evaluates the
/// corresponding thread's wait, if it is still the same frame (§4.5 step 8).
pub fn poll_timeouts(table: &mut ThreadTable, timers: &mut TimerService<TimeoutPayload>, now: Tick) {
    for fired in timers.poll_expired(now) {
        let still_active = table
            .get(fired.thread)
            .and_then(|r| r.wait_stack.last())
            .is_some_and(|f| f.seq == fired.seq);
        if still_active {
            wake_thread(table, timers, now, fired.thread);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ke::object::WaitableObject;
    use std::cell::Cell;
    use std::rc::Rc;

    struct ManualEvent(Cell<bool>);
    impl WaitableObject for ManualEvent {
        fn is_signaled(&self, _thread: ThreadId) -> bool {
            self.0.get()
        }
    }

    /// A recursive test mutex: unowned or re-entered by its current owner
    /// counts as signaled; acquiring it either transfers ownership cleanly
    /// or reports abandonment if the previous owner died holding it.
    struct RecursiveTestMutex {
        owner: Cell<Option<ThreadId>>,
        recursion: Cell<u32>,
        abandoned: Cell<bool>,
    }

    impl RecursiveTestMutex {
        fn new() -> Self {
            Self {
                owner: Cell::new(None),
                recursion: Cell::new(0),
                abandoned: Cell::new(false),
            }
        }
    }

    impl WaitableObject for RecursiveTestMutex {
        fn is_signaled(&self, thread: ThreadId) -> bool {
            match self.owner.get() {
                None => true,
                Some(owner) => owner == thread,
            }
        }

        fn satisfied(&self, thread: ThreadId) -> bool {
            self.owner.set(Some(thread));
            self.recursion.set(self.recursion.get() + 1);
            self.abandoned.replace(false)
        }

        fn abandon(&self, owner: ThreadId) {
            if self.owner.get() == Some(owner) {
                self.owner.set(None);
                self.recursion.set(0);
                self.abandoned.set(true);
            }
        }
    }

    #[test]
    fn recursive_mutex_reports_abandonment_exactly_once() {
        let mutex = RecursiveTestMutex::new();
        let previous_owner = ThreadId::from_raw(7);
        let next_owner = ThreadId::from_raw(8);

        assert!(!mutex.satisfied(previous_owner)); // first acquire of a fresh mutex is never abandoned
        assert!(mutex.is_signaled(previous_owner)); // recursive re-entry
        assert!(!mutex.is_signaled(next_owner));

        mutex.abandon(previous_owner);
        assert!(mutex.is_signaled(next_owner));
        assert!(mutex.satisfied(next_owner));
    }

    #[test]
    fn normalize_timeout_handles_infinite_relative_and_absolute() {
        assert_eq!(normalize_timeout(100, RAW_TIMEOUT_INFINITE), TIMEOUT_INFINITE);
        assert_eq!(normalize_timeout(100, -50), 150);
        assert_eq!(normalize_timeout(100, 500), 500);
    }

    #[test]
    fn check_wait_any_resolves_first_signaled_index() {
        let a: ObjectRef = Rc::new(ManualEvent(Cell::new(false)));
        let b: ObjectRef = Rc::new(ManualEvent(Cell::new(true)));
        let frame = WaitFrame {
            seq: 1,
            entries: vec![a, b],
            flags: WaitFlags::empty(),
            deadline: TIMEOUT_INFINITE,
            timer: None,
            cookie: 0,
        };
        let apcs = ApcQueue::new();
        let outcome = check_wait(&frame, ThreadId::from_raw(1), &apcs, false, 0);
        assert_eq!(outcome, WaitOutcome::Signaled(1));
    }

    #[test]
    fn check_wait_all_falls_through_to_timeout_when_not_all_signaled() {
        let a: ObjectRef = Rc::new(ManualEvent(Cell::new(true)));
        let b: ObjectRef = Rc::new(ManualEvent(Cell::new(false)));
        let frame = WaitFrame {
            seq: 1,
            entries: vec![a, b],
            flags: WaitFlags::WAIT_ALL,
            deadline: 10,
            timer: None,
            cookie: 0,
        };
        let apcs = ApcQueue::new();
        assert_eq!(check_wait(&frame, ThreadId::from_raw(1), &apcs, false, 5), WaitOutcome::Pending);
        assert_eq!(check_wait(&frame, ThreadId::from_raw(1), &apcs, false, 10), WaitOutcome::Timeout);
    }

    #[test]
    fn check_wait_suspended_thread_never_resolves_on_objects() {
        let a: ObjectRef = Rc::new(ManualEvent(Cell::new(true)));
        let frame = WaitFrame {
            seq: 1,
            entries: vec![a],
            flags: WaitFlags::empty(),
            deadline: TIMEOUT_INFINITE,
            timer: None,
            cookie: 0,
        };
        let apcs = ApcQueue::new();
        assert_eq!(check_wait(&frame, ThreadId::from_raw(1), &apcs, true, 0), WaitOutcome::Pending);
    }

    #[test]
    fn abandoned_wait_reports_abandoned_status() {
        assert_eq!(WaitOutcome::Abandoned(2).status(), STATUS_ABANDONED_WAIT_0 + 2);
        assert_eq!(WaitOutcome::Signaled(0).status(), 0);
        assert_eq!(WaitOutcome::UserApc.status(), STATUS_USER_APC);
        assert_eq!(WaitOutcome::Timeout.status(), STATUS_TIMEOUT);
        assert_eq!(WaitOutcome::Pending.status(), STATUS_PENDING);
    }

    /// A minimal auto-reset-event stand-in: `signal()` flips it set and
    /// reports success; `satisfied()` resets it and always returns `false`
    /// (never abandoned).
    struct AutoResetTestEvent(Cell<bool>);

    impl AutoResetTestEvent {
        fn new() -> Self {
            Self(Cell::new(false))
        }
    }

    impl WaitableObject for AutoResetTestEvent {
        fn is_signaled(&self, _thread: ThreadId) -> bool {
            self.0.get()
        }

        fn satisfied(&self, _thread: ThreadId) -> bool {
            self.0.set(false);
            false
        }

        fn signal(&self) -> bool {
            self.0.set(true);
            true
        }

        fn add_to_wait_queue(&self, _thread: ThreadId) {}
        fn remove_from_wait_queue(&self, _thread: ThreadId) {}
    }

    struct RecordingChannel {
        last: Option<(u64, u32)>,
    }

    impl WaitChannel for RecordingChannel {
        fn send_wakeup(&mut self, cookie: u64, status: u32) -> WakeDeliveryResult {
            self.last = Some((cookie, status));
            WakeDeliveryResult::Ok
        }
    }

    fn test_table() -> ThreadTable {
        use crate::config::ServerConfig;
        ThreadTable::new(ServerConfig::default())
    }

    fn spawn_thread(table: &mut ThreadTable) -> ThreadId {
        use crate::ps::process::ProcessId;
        use crate::ps::table::new_thread_record;
        let id = table.insert(new_thread_record(ProcessId::from_raw(0), 0xF, 0));
        table.get_mut(id).unwrap().wait_channel = Some(Box::new(RecordingChannel { last: None }));
        id
    }

    #[test]
    fn select_on_an_already_signaled_object_resolves_immediately() {
        let mut table = test_table();
        let mut timers = TimerService::new();
        let mut seq = WaitSeq::new();
        let thread = spawn_thread(&mut table);
        let event: ObjectRef = Rc::new(AutoResetTestEvent::new());
        event.signal();

        let outcome = select(
            &mut table,
            &mut timers,
            &mut seq,
            0,
            SelectRequest {
                thread,
                cookie: 0x1,
                handles: vec![event],
                flags: WaitFlags::empty(),
                timeout_raw: RAW_TIMEOUT_INFINITE,
                signal: None,
            },
        )
        .unwrap();

        assert_eq!(outcome, WaitOutcome::Signaled(0));
        assert!(table.get(thread).unwrap().wait_stack.is_empty());
    }

    #[test]
    fn select_and_signal_wakes_a_different_thread_already_parked() {
        let mut table = test_table();
        let mut timers = TimerService::new();
        let mut seq = WaitSeq::new();

        let waiter = spawn_thread(&mut table);
        let signaler = spawn_thread(&mut table);
        let event: ObjectRef = Rc::new(AutoResetTestEvent::new());

        // The waiter parks first, on an unsignaled event.
        let parked = select(
            &mut table,
            &mut timers,
            &mut seq,
            0,
            SelectRequest {
                thread: waiter,
                cookie: 0xA1,
                handles: vec![event.clone()],
                flags: WaitFlags::empty(),
                timeout_raw: RAW_TIMEOUT_INFINITE,
                signal: None,
            },
        )
        .unwrap();
        assert!(parked.is_pending());

        // The signaler signals the same event via a select-and-signal
        // request on a handle of its own (e.g. a no-op self wait), which
        // must wake the waiter as a side effect of the signal step.
        let dummy: ObjectRef = Rc::new(AutoResetTestEvent::new());
        dummy.signal();
        let outcome = select(
            &mut table,
            &mut timers,
            &mut seq,
            0,
            SelectRequest {
                thread: signaler,
                cookie: 0xB2,
                handles: vec![dummy],
                flags: WaitFlags::empty(),
                timeout_raw: RAW_TIMEOUT_INFINITE,
                signal: Some(event),
            },
        )
        .unwrap();
        assert_eq!(outcome, WaitOutcome::Signaled(0));

        assert!(table.get(waiter).unwrap().wait_stack.is_empty());
    }

    #[test]
    fn select_and_signal_fails_when_signal_reports_failure() {
        struct NeverSignals;
        impl WaitableObject for NeverSignals {}

        let mut table = test_table();
        let mut timers = TimerService::new();
        let mut seq = WaitSeq::new();
        let thread = spawn_thread(&mut table);
        let never: ObjectRef = Rc::new(NeverSignals);
        let target: ObjectRef = Rc::new(AutoResetTestEvent::new());

        let err = select(
            &mut table,
            &mut timers,
            &mut seq,
            0,
            SelectRequest {
                thread,
                cookie: 0,
                handles: vec![target],
                flags: WaitFlags::empty(),
                timeout_raw: RAW_TIMEOUT_INFINITE,
                signal: Some(never),
            },
        )
        .unwrap_err();
        assert!(matches!(err, ServerError::InvalidParameter));
    }

    #[test]
    fn select_accepts_exactly_max_wait_objects_and_rejects_one_more() {
        let mut table = test_table();
        let mut timers = TimerService::new();
        let mut seq = WaitSeq::new();
        let thread = spawn_thread(&mut table);
        let max = table.config().max_wait_objects;

        let handles: Vec<ObjectRef> = (0..max).map(|_| Rc::new(AutoResetTestEvent::new()) as ObjectRef).collect();
        let outcome = select(
            &mut table,
            &mut timers,
            &mut seq,
            0,
            SelectRequest {
                thread,
                cookie: 0,
                handles,
                flags: WaitFlags::empty(),
                timeout_raw: RAW_TIMEOUT_INFINITE,
                signal: None,
            },
        )
        .unwrap();
        assert!(outcome.is_pending());

        let too_many: Vec<ObjectRef> = (0..=max).map(|_| Rc::new(AutoResetTestEvent::new()) as ObjectRef).collect();
        let err = select(
            &mut table,
            &mut timers,
            &mut seq,
            0,
            SelectRequest {
                thread,
                cookie: 0,
                handles: too_many,
                flags: WaitFlags::empty(),
                timeout_raw: RAW_TIMEOUT_INFINITE,
                signal: None,
            },
        )
        .unwrap_err();
        assert!(matches!(err, ServerError::InvalidParameter));
    }

    #[test]
    fn select_with_timeout_already_elapsed_returns_timeout_without_parking() {
        let mut table = test_table();
        let mut timers = TimerService::new();
        let mut seq = WaitSeq::new();
        let thread = spawn_thread(&mut table);
        let event: ObjectRef = Rc::new(AutoResetTestEvent::new());

        let outcome = select(
            &mut table,
            &mut timers,
            &mut seq,
            100,
            SelectRequest {
                thread,
                cookie: 0,
                handles: vec![event],
                flags: WaitFlags::empty(),
                timeout_raw: 100, // absolute deadline already at `now`
                signal: None,
            },
        )
        .unwrap();
        assert_eq!(outcome, WaitOutcome::Timeout);
        assert!(table.get(thread).unwrap().wait_stack.is_empty());
        assert!(timers.is_empty());
    }

    #[test]
    fn select_with_zero_handles_parks_on_timeout_alone() {
        // `Sleep`/alertable `SleepEx`: no objects, just a deadline (and
        // possibly alertability). §4.5 bounds only the upper end of the
        // handle count.
        let mut table = test_table();
        let mut timers = TimerService::new();
        let mut seq = WaitSeq::new();
        let thread = spawn_thread(&mut table);

        let outcome = select(
            &mut table,
            &mut timers,
            &mut seq,
            0,
            SelectRequest {
                thread,
                cookie: 0,
                handles: vec![],
                flags: WaitFlags::empty(),
                timeout_raw: 50,
                signal: None,
            },
        )
        .unwrap();
        assert!(outcome.is_pending());
        assert_eq!(table.get(thread).unwrap().wait_stack.len(), 1);

        poll_timeouts(&mut table, &mut timers, 50);
        assert!(table.get(thread).unwrap().wait_stack.is_empty());
    }

    #[test]
    fn select_with_zero_handles_and_elapsed_timeout_resolves_immediately() {
        let mut table = test_table();
        let mut timers = TimerService::new();
        let mut seq = WaitSeq::new();
        let thread = spawn_thread(&mut table);

        let outcome = select(
            &mut table,
            &mut timers,
            &mut seq,
            100,
            SelectRequest {
                thread,
                cookie: 0,
                handles: vec![],
                flags: WaitFlags::empty(),
                timeout_raw: 100,
                signal: None,
            },
        )
        .unwrap();
        assert_eq!(outcome, WaitOutcome::Timeout);
        assert!(table.get(thread).unwrap().wait_stack.is_empty());
    }
}
