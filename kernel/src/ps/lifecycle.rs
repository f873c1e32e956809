//! Thread lifecycle operations: creation, the init handshake, suspend/resume,
//! termination, cleanup, and the APC/context request surface that rides on
//! top of a live thread record (§4.4). Grounded directly on
//! `original_source/server_module/thread.c`'s `DECL_HANDLER` functions
//! (`create_thread`, `init_thread`, `terminate_thread`/`kill_thread`,
//! `cleanup_thread`, `suspend_thread`/`resume_thread`, `queue_apc`,
//! `get_thread_context`/`set_thread_context`) and `ps::ethread`'s
//! `PsCreateThread`/`PsTerminateThread`. Free functions over explicit state
//! rather than methods on a god object, since the teacher's handlers
//! likewise just take the global tables as ambient context.

use std::rc::Rc;

use log::{debug, info, warn};

use crate::context::{ContextFlags, ContextRequestOutcome, CpuType};
use crate::error::{Result, ServerError};
use crate::ke::apc::{ApcCall, ApcQueue, ApcRecord, ApcResult, ApcType};
use crate::ke::object::ObjectRef;
use crate::ke::timer::{Tick, TimerService};
use crate::ke::wait::{self, TimeoutPayload, WaitChannel, WaitSeq};
use crate::ps::process::{ProcessId, ProcessTable};
use crate::ps::table::{new_thread_record, ThreadTable};
use crate::ps::thread::{OpaqueContext, ThreadId, ThreadState};

/// Bundles the mutable state every lifecycle operation needs, purely to
/// keep call sites short; each field is still owned and passed around
/// independently elsewhere (e.g. inside the wait engine).
pub struct Engine {
    pub threads: ThreadTable,
    pub processes: ProcessTable,
    pub timers: TimerService<TimeoutPayload>,
    pub seq: WaitSeq,
    pub now: Tick,
}

impl Engine {
    pub fn new(config: crate::config::ServerConfig) -> Self {
        Self {
            threads: ThreadTable::new(config),
            processes: ProcessTable::new(),
            timers: TimerService::new(),
            seq: WaitSeq::new(),
            now: 0,
        }
    }

    pub fn advance_clock(&mut self, now: Tick) {
        debug_assert!(now >= self.now, "clock must not go backwards");
        self.now = now;
        wait::poll_timeouts(&mut self.threads, &mut self.timers, self.now);
    }
}

/// §4.4 Creation: a new thread joins an existing (or brand-new) process,
/// inheriting its affinity unless a narrower mask is requested.
///
/// §6's `new-thread` request surface additionally carries a "create
/// suspended" flag; that is not a separate code path here, since a request
/// handler on a single-threaded cooperative server (§5) can simply call
/// [`suspend_thread`] immediately after this returns, before the new
/// thread's id is ever handed back to anything else.
pub fn create_thread(engine: &mut Engine, process: ProcessId, affinity: u32) -> Result<ThreadId> {
    let proc = engine
        .processes
        .get(process)
        .ok_or(ServerError::InvalidParameter)?;
    if proc.is_terminating {
        return Err(ServerError::ProcessIsTerminating { pid: process.raw() });
    }
    let affinity = affinity & proc.affinity;
    if affinity == 0 {
        return Err(ServerError::InvalidParameter);
    }

    let now = engine.now;
    let id = engine
        .threads
        .insert(new_thread_record(process, affinity, now));
    engine
        .processes
        .get_mut(process)
        .expect("checked above")
        .add_thread(id);
    info!("thread {id} created in process {}", process.raw());
    Ok(id)
}

/// §4.4 Init handshake: the client hands over its TEB pointer, entry point,
/// desired debug level, reports its CPU type, and installs the channel the
/// server will use to deliver wakeups. Exactly one handshake is allowed per
/// thread.
pub fn init_thread(
    engine: &mut Engine,
    id: ThreadId,
    teb: u64,
    entry_point: u64,
    cpu: CpuType,
    os_pid: u32,
    os_tid: u32,
    debug_level: u32,
    wait_channel: Box<dyn WaitChannel>,
) -> Result<()> {
    if teb == 0 || teb % 8 != 0 {
        return Err(ServerError::InvalidParameter);
    }

    let cpu_bit = 1u32 << cpu as u32;
    if engine.threads.config().supported_cpu_mask & cpu_bit == 0 {
        return Err(ServerError::NotSupported);
    }

    let process = {
        let record = engine.threads.get(id).ok_or(ServerError::InvalidCid)?;
        if record.initialized {
            return Err(ServerError::InvalidParameter);
        }
        record.process
    };

    {
        let proc = engine
            .processes
            .get_mut(process)
            .ok_or(ServerError::InvalidParameter)?;
        match proc.cpu {
            None => {
                // First thread of the process: establishes pid, entry point
                // and CPU (§4.4).
                proc.cpu = Some(cpu);
                proc.entry_point = Some(entry_point);
            }
            Some(established) if established != cpu => return Err(ServerError::InvalidParameter),
            Some(_) => {}
        }
        proc.os_pid = Some(os_pid);
    }

    let max_fds = engine.threads.config().max_inflight_fds;
    let record = engine.threads.get_mut(id).ok_or(ServerError::InvalidCid)?;
    record.teb = Some(teb);
    record.entry_point = Some(entry_point);
    record.cpu = Some(cpu);
    record.os_pid = Some(os_pid);
    record.os_tid = Some(os_tid);
    record.debug_level = debug_level;
    record.wait_channel = Some(wait_channel);
    record.inflight_fds = crate::ps::thread::InflightFdCache::new(max_fds);
    record.initialized = true;

    engine.threads.link_pid(id, os_pid);
    debug!("thread {id} initialized (os_tid={os_tid}, os_pid={os_pid})");
    Ok(())
}

/// §4.4 Suspend/Resume: `suspend` saturates at `MAX_SUSPEND`, `resume`
/// floors at zero. Crossing the `0 -> 1` edge on suspend, or `1 -> 0` on
/// resume, is when the thread's effective-suspended state actually flips.
pub fn suspend_thread(engine: &mut Engine, id: ThreadId) -> Result<u32> {
    let max = engine.threads.config().max_suspend;
    let record = engine.threads.get_mut(id).ok_or(ServerError::InvalidCid)?;
    if record.is_terminated() {
        return Err(ServerError::ThreadIsTerminating { tid: id.raw() });
    }
    if record.suspend >= max {
        return Err(ServerError::SuspendCountExceeded);
    }
    let previous = record.suspend;
    record.suspend += 1;
    Ok(previous)
}

pub fn resume_thread(engine: &mut Engine, id: ThreadId) -> Result<u32> {
    let record = engine.threads.get_mut(id).ok_or(ServerError::InvalidCid)?;
    let previous = record.suspend;
    let was_suspended = record.is_suspended();
    record.suspend = record.suspend.saturating_sub(1);
    let became_runnable = was_suspended && !record.is_suspended();
    if became_runnable {
        // The suspend-context snapshot is only valid while actually
        // suspended (§4.6); clear it so the next suspend cycle captures a
        // fresh one rather than rejecting it as a double-suspend.
        record.suspend_context = None;
        wait::wake_thread(&mut engine.threads, &mut engine.timers, engine.now, id);
    }
    Ok(previous)
}

/// Broadcasts a process-wide suspend count change into every live thread's
/// cached `process_suspend` (§3 "Suspend sum"). The process-level
/// suspend/resume operation itself belongs to the (out-of-scope, §1) process
/// object; this is the receiving half the thread subsystem owns — updating
/// the per-thread cache and re-evaluating each thread's wait/APC state if the
/// combined sum just dropped to zero.
pub fn set_process_suspend(engine: &mut Engine, process: ProcessId, count: u32) -> Result<()> {
    let proc = engine
        .processes
        .get_mut(process)
        .ok_or(ServerError::InvalidParameter)?;
    proc.suspend = count;
    let members = proc.threads.clone();

    for tid in members {
        let became_runnable = {
            let Some(record) = engine.threads.get_mut(tid) else { continue };
            let was_suspended = record.is_suspended();
            record.process_suspend = count;
            let became_runnable = was_suspended && !record.is_suspended();
            if became_runnable {
                record.suspend_context = None;
            }
            became_runnable
        };
        if became_runnable {
            wait::wake_thread(&mut engine.threads, &mut engine.timers, engine.now, tid);
        }
    }
    Ok(())
}

/// §4.4 Termination: flips state, abandons held mutexes, clears and wakes
/// every pending APC, tears down any in-progress wait, and flips the
/// thread's exit signal so joiners wake up. Idempotent — killing an
/// already-terminated thread is a no-op.
pub fn kill_thread(engine: &mut Engine, id: ThreadId, exit_code: i32) -> Result<()> {
    let already_dead = engine
        .threads
        .get(id)
        .ok_or(ServerError::InvalidCid)?
        .is_terminated();
    if already_dead {
        return Ok(());
    }

    let (mutexes, apcs, exit_signal, wait_frames) = {
        let record = engine.threads.get_mut(id).expect("checked above");
        record.state = ThreadState::Terminated;
        record.exit_time = Some(engine.now);
        record.exit_code = exit_code;
        let mutexes = std::mem::take(&mut record.mutexes);
        let apcs = record.apcs.drain_all();
        let exit_signal = record.exit_signal.clone();
        let wait_frames: Vec<_> = record.wait_stack.drain(..).collect();
        (mutexes, apcs, exit_signal, wait_frames)
    };

    for mutex in &mutexes {
        mutex.abandon(id);
    }
    for frame in &wait_frames {
        for obj in &frame.entries {
            obj.remove_from_wait_queue(id);
        }
        if let Some(handle) = frame.timer {
            engine.timers.cancel(handle);
        }
    }
    // A thread killed while parked never gets to re-evaluate its own wait
    // (it no longer has one); it still needs its final wakeup so the client
    // isn't left hanging forever (§4.4 Termination, scenario 5).
    if let Some(frame) = wait_frames.last() {
        let cookie = frame.cookie;
        let record = engine.threads.get_mut(id).expect("checked above");
        match record.wait_channel.as_deref_mut() {
            Some(channel) => {
                let _ = channel.send_wakeup(cookie, exit_code as u32);
            }
            None => warn!("thread {id} terminated with a pending wait but no wait channel installed"),
        }
    }
    for apc in apcs {
        let obj: ObjectRef = apc;
        wait::wake_queue(&mut engine.threads, &mut engine.timers, engine.now, &obj);
    }

    exit_signal.mark_exited();
    let exit_obj: ObjectRef = exit_signal;
    wait::wake_queue(&mut engine.threads, &mut engine.timers, engine.now, &exit_obj);

    info!("thread {id} terminated with exit code {exit_code}");
    Ok(())
}

/// §4.4 Cleanup: once the client connection for a thread is gone for good,
/// unlink it from the pid hash and its process, and release the table's own
/// reference. If that was the last reference the record is destroyed here;
/// otherwise it lingers for any outstanding `snapshot()` holder.
pub fn cleanup_thread(engine: &mut Engine, id: ThreadId) -> Result<()> {
    let (process, os_pid) = {
        let record = engine.threads.get(id).ok_or(ServerError::InvalidCid)?;
        (record.process, record.os_pid)
    };

    if let Some(pid) = os_pid {
        engine.threads.unlink_pid(id, pid);
    }
    if let Some(proc) = engine.processes.get_mut(process) {
        proc.remove_thread(id);
        if proc.is_empty() {
            proc.is_terminating = true;
        }
    }

    if engine.threads.release(id).is_some() {
        debug!("thread {id} destroyed");
    } else {
        warn!("thread {id} cleaned up but still referenced");
    }
    Ok(())
}

pub fn lookup_by_tid(engine: &Engine, os_tid: u32) -> Option<ThreadId> {
    engine.threads.lookup_by_tid(os_tid)
}

pub fn lookup_by_pid(engine: &Engine, os_pid: u32) -> Vec<ThreadId> {
    engine.threads.lookup_by_pid(os_pid)
}

/// §6 `open-thread`: resolve a tid to a live thread and grab a reference on
/// the caller's behalf. The returned handle's lifetime is the caller's
/// problem (§1, handle table out of scope) — this just does the "does it
/// exist, take a reference" half.
pub fn open_thread(engine: &mut Engine, tid: u32) -> Result<ThreadId> {
    let id = engine.threads.lookup_by_tid(tid).ok_or(ServerError::InvalidCid)?;
    engine.threads.add_ref(id);
    Ok(id)
}

/// Reply shape for §6 `terminate-thread`: whether the caller terminated
/// itself, and whether it was the last thread left in its process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TerminateOutcome {
    pub is_self: bool,
    pub last_in_process: bool,
}

/// §6 `terminate-thread`: kills `target` and reports whether `caller` just
/// killed itself and whether its process is now empty of threads.
pub fn terminate_thread(engine: &mut Engine, caller: ThreadId, target: ThreadId, exit_code: i32) -> Result<TerminateOutcome> {
    let process = engine.threads.get(target).ok_or(ServerError::InvalidCid)?.process;
    kill_thread(engine, target, exit_code)?;
    let last_in_process = engine
        .processes
        .get(process)
        .is_some_and(|p| p.threads.iter().all(|&t| engine.threads.get(t).map_or(true, |r| r.is_terminated())));
    Ok(TerminateOutcome {
        is_self: caller == target,
        last_in_process,
    })
}

/// §4.4 Snapshot, §11: every live thread plus id-table stats.
pub fn snapshot(engine: &mut Engine) -> (Vec<crate::ps::table::ThreadSnapshotEntry>, crate::ps::table::TableStats) {
    (engine.threads.snapshot(), engine.threads.stats())
}

/// §3, §6 `set-thread-info`'s priority field: validated against the
/// *owning process's* priority class, per §3 ("priority ... validated
/// against process priority class") — not a class supplied by the caller,
/// which could disagree with what the process actually established.
pub fn set_priority(engine: &mut Engine, id: ThreadId, priority: i32) -> Result<()> {
    let process = engine.threads.get(id).ok_or(ServerError::InvalidCid)?.process;
    let class = engine
        .processes
        .get(process)
        .ok_or(ServerError::InvalidParameter)?
        .priority_class;
    if !engine.threads.config().validate_priority(class, priority) {
        return Err(ServerError::InvalidParameter);
    }
    let record = engine.threads.get_mut(id).ok_or(ServerError::InvalidCid)?;
    record.priority = priority;
    Ok(())
}

/// Reply shape for §6 `get-thread-info`'s standard-fields bundle.
#[derive(Debug, Clone, Copy)]
pub struct ThreadInfo {
    pub priority: i32,
    pub affinity: u32,
    pub suspend_count: u32,
    pub exit_code: Option<i32>,
}

pub fn get_thread_info(engine: &Engine, id: ThreadId) -> Result<ThreadInfo> {
    let record = engine.threads.get(id).ok_or(ServerError::InvalidCid)?;
    Ok(ThreadInfo {
        priority: record.priority,
        affinity: record.affinity,
        suspend_count: record.suspend,
        exit_code: record.is_terminated().then_some(record.exit_code),
    })
}

/// §6 `set-thread-info`'s affinity field: narrowed to whatever the owning
/// process still permits, same rule `create_thread` applies at birth.
pub fn set_affinity(engine: &mut Engine, id: ThreadId, affinity: u32) -> Result<()> {
    let process = engine.threads.get(id).ok_or(ServerError::InvalidCid)?.process;
    let proc_affinity = engine
        .processes
        .get(process)
        .ok_or(ServerError::InvalidParameter)?
        .affinity;
    let resolved = affinity & proc_affinity;
    if resolved == 0 {
        return Err(ServerError::InvalidParameter);
    }
    engine.threads.get_mut(id).ok_or(ServerError::InvalidCid)?.affinity = resolved;
    Ok(())
}

/// §6 `set-thread-info`'s token field.
pub fn set_impersonation_token(engine: &mut Engine, id: ThreadId, token: Option<u64>) -> Result<()> {
    let record = engine.threads.get_mut(id).ok_or(ServerError::InvalidCid)?;
    if record.is_terminated() {
        return Err(ServerError::ThreadIsTerminating { tid: id.raw() });
    }
    record.impersonation_token = token;
    Ok(())
}

/// §4.3 Posting target resolution for a process-wide `queue-apc` (no
/// specific thread named): prefer a non-terminated thread already eligible
/// to receive the server's wake-signal without further ado — suspended, or
/// already parked in an interruptible wait — falling back to the first
/// non-terminated thread in the process. `None` if the process has no live
/// thread at all.
fn select_apc_target(engine: &Engine, process: ProcessId) -> Option<ThreadId> {
    let proc = engine.processes.get(process)?;
    let live = |&t: &ThreadId| engine.threads.get(t).is_some_and(|r| !r.is_terminated());
    proc.threads
        .iter()
        .copied()
        .filter(live)
        .find(|&t| engine.threads.get(t).expect("filtered live").is_in_apc_wait())
        .or_else(|| proc.threads.iter().copied().filter(live).next())
}

/// §4.3 Posting via §4.4's surface: queues an APC on `target`, waking it
/// immediately if the queue was empty. `owner` is the posting object's own
/// identity (a timer, an async I/O request, …) — when given, any APC already
/// queued for the same owner and the same call type is cancelled first
/// (§4.3 Posting's cancellation bullet; `thread.c`'s `queue_apc`), regardless
/// of which APC type that is, not just timers.
pub fn queue_apc(
    engine: &mut Engine,
    target: ThreadId,
    owner: Option<ObjectRef>,
    caller: Option<ThreadId>,
    call: ApcCall,
) -> Result<Rc<ApcRecord>> {
    if engine
        .threads
        .get(target)
        .ok_or(ServerError::InvalidCid)?
        .is_terminated()
    {
        return Err(ServerError::ThreadIsTerminating { tid: target.raw() });
    }

    if let Some(owner) = &owner {
        let stale = engine
            .threads
            .get_mut(target)
            .expect("checked above")
            .apcs
            .cancel_owner(owner, call.apc_type());
        if let Some(stale) = stale {
            stale.mark_executed(ApcResult::None);
            let stale_obj: ObjectRef = stale;
            wait::wake_queue(&mut engine.threads, &mut engine.timers, engine.now, &stale_obj);
        }
    }

    let apc = ApcRecord::new(owner, caller, call);
    let record = engine.threads.get_mut(target).expect("checked above");
    let became_head = record.apcs.enqueue(apc.clone());

    if became_head {
        wait::wake_thread(&mut engine.threads, &mut engine.timers, engine.now, target);
    }

    Ok(apc)
}

/// §4.3 Posting with no specific thread named: resolves a target within
/// `process` per [`select_apc_target`] before delegating to [`queue_apc`].
pub fn queue_apc_to_process(
    engine: &mut Engine,
    process: ProcessId,
    owner: Option<ObjectRef>,
    caller: Option<ThreadId>,
    call: ApcCall,
) -> Result<Rc<ApcRecord>> {
    let target = select_apc_target(engine, process).ok_or(ServerError::InvalidParameter)?;
    queue_apc(engine, target, owner, caller, call)
}

/// §4.3 Dequeue surface: the target thread pulling its next APC to run
/// client-side.
pub fn dequeue_apc(engine: &mut Engine, target: ThreadId, system_only: bool) -> Result<Option<Rc<ApcRecord>>> {
    let record = engine.threads.get_mut(target).ok_or(ServerError::InvalidCid)?;
    Ok(record.apcs.dequeue_next(system_only))
}

/// §6 `get-apc-result`: the outcome of an APC once it has executed
/// client-side, or `None` if it is still outstanding. A terminal, non-fallible
/// query — an APC handle that was resolved at all is always safe to ask.
pub fn get_apc_result(apc: &ApcRecord) -> Option<ApcResult> {
    apc.is_executed().then(|| apc.result())
}

fn apc_queue_ref(engine: &Engine, target: ThreadId) -> Result<&ApcQueue> {
    Ok(&engine.threads.get(target).ok_or(ServerError::InvalidCid)?.apcs)
}

pub fn has_pending_apcs(engine: &Engine, target: ThreadId) -> Result<bool> {
    let queue = apc_queue_ref(engine, target)?;
    Ok(!queue.is_system_empty() || !queue.is_user_empty())
}

/// §4.6 `get-thread-context`: a thread always knows its own registers live;
/// anything else needs a suspended snapshot.
pub fn get_thread_context(
    engine: &Engine,
    caller: ThreadId,
    target: ThreadId,
    _flags: ContextFlags,
) -> Result<ContextRequestOutcome> {
    if caller == target {
        return Ok(ContextRequestOutcome::Self_);
    }
    let record = engine.threads.get(target).ok_or(ServerError::InvalidCid)?;
    if record.is_terminated() {
        return Ok(ContextRequestOutcome::Unsuccessful);
    }
    if !record.is_suspended() {
        return Ok(ContextRequestOutcome::Pending);
    }
    Ok(match &record.current_context {
        Some(_) => ContextRequestOutcome::Copied,
        None => ContextRequestOutcome::Pending,
    })
}

/// §4.6 `set-thread-context`: only meaningful while the target is suspended
/// (or is the caller setting its own live registers, handled upstream).
pub fn set_thread_context(engine: &mut Engine, target: ThreadId, context: OpaqueContext, flags: ContextFlags) -> Result<()> {
    let record = engine.threads.get_mut(target).ok_or(ServerError::InvalidCid)?;
    if record.is_terminated() {
        return Err(ServerError::ThreadIsTerminating { tid: target.raw() });
    }
    if !record.is_suspended() {
        return Err(ServerError::AccessDenied);
    }
    match &mut record.current_context {
        Some(existing) => {
            use crate::context::CpuContextSnapshot;
            existing.copy_from(&context, flags);
        }
        None => record.current_context = Some(Box::new(context)),
    }
    Ok(())
}

/// §6 `get-suspend-context`/`set-suspend-context`: a second, explicitly
/// named snapshot slot taken right after a suspend and consulted (or
/// replaced) before the matching resume, kept distinct from
/// `current_context` so a debugger editing live registers mid-suspend
/// cannot be confused with the state captured at suspend time.
pub fn get_suspend_context(engine: &Engine, target: ThreadId) -> Result<Option<&OpaqueContext>> {
    let record = engine.threads.get(target).ok_or(ServerError::InvalidCid)?;
    Ok(record.suspend_context.as_deref())
}

pub fn set_suspend_context(engine: &mut Engine, target: ThreadId, context: OpaqueContext) -> Result<()> {
    let record = engine.threads.get_mut(target).ok_or(ServerError::InvalidCid)?;
    if record.suspend_context.is_some() {
        return Err(ServerError::InvalidParameter);
    }
    record.suspend_context = Some(Box::new(context));
    Ok(())
}

/// §6 `get-selector-entry`: x86 LDT/GDT descriptor lookup. The concrete
/// descriptor-table layout is exactly the kind of CPU-register-shaped detail
/// §1/§4.6 puts out of scope; this core only validates that the request even
/// makes sense for the target's CPU type before handing off to whatever
/// external component actually owns the descriptor tables.
pub fn get_selector_entry(engine: &Engine, target: ThreadId) -> Result<()> {
    let record = engine.threads.get(target).ok_or(ServerError::InvalidCid)?;
    match record.cpu {
        Some(CpuType::X86) => Ok(()),
        Some(_) => Err(ServerError::NotSupported),
        None => Err(ServerError::InvalidParameter),
    }
}
