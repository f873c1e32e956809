//! Minimal process-level state.
//!
//! Process objects themselves — security tokens, the handle table, Win32
//! window-station/desktop plumbing — are out of scope here (§1); what
//! remains is exactly the slice §4.4 leans on to reason about a thread's
//! lifecycle: is the owning process terminating, what is the process-wide
//! suspend count, what CPU type did its first thread establish, and which
//! threads currently belong to it. Grounded on `ps::eprocess::EProcess`
//! (`process_lock`, `unique_process_id`, `active_threads`,
//! `active_process_links`), trimmed to that slice.

use crate::config::PriorityClass;
use crate::context::CpuType;
use crate::ke::timer::Tick;
use crate::ps::thread::ThreadId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ProcessId(u32);

impl ProcessId {
    pub fn from_raw(raw: u32) -> Self {
        ProcessId(raw)
    }

    pub fn raw(self) -> u32 {
        self.0
    }
}

/// One process's bookkeeping, as far as the thread subsystem needs it.
pub struct ProcessRecord {
    pub id: ProcessId,
    pub os_pid: Option<u32>,
    pub priority_class: PriorityClass,
    /// Process-wide suspend count, broadcast into each thread's
    /// `ThreadRecord::process_suspend` cache on change (§3 "Suspend sum").
    pub suspend: u32,
    pub affinity: u32,
    /// CPU type the first thread's `init-thread` handshake established;
    /// every later thread in the same process must agree (§4.4).
    pub cpu: Option<CpuType>,
    /// Entry point the first thread's handshake established (§4.4).
    pub entry_point: Option<u64>,
    pub is_terminating: bool,
    pub create_time: Tick,
    pub threads: Vec<ThreadId>,
}

impl ProcessRecord {
    pub fn new(id: ProcessId, affinity: u32, now: Tick) -> Self {
        Self {
            id,
            os_pid: None,
            priority_class: PriorityClass::Normal,
            suspend: 0,
            affinity,
            cpu: None,
            entry_point: None,
            is_terminating: false,
            create_time: now,
            threads: Vec::new(),
        }
    }

    pub fn add_thread(&mut self, thread: ThreadId) {
        self.threads.push(thread);
    }

    pub fn remove_thread(&mut self, thread: ThreadId) {
        if let Some(pos) = self.threads.iter().position(|&t| t == thread) {
            self.threads.remove(pos);
        }
    }

    pub fn is_empty(&self) -> bool {
        self.threads.is_empty()
    }
}

/// A small table of process records, parallel to
/// [`crate::ps::table::ThreadTable`] but without a pid hash — process ids
/// are looked up far less often than thread ids in this core, so a linear
/// `slab::Slab` scan is enough.
#[derive(Default)]
pub struct ProcessTable {
    processes: slab::Slab<ProcessRecord>,
}

impl ProcessTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, affinity: u32, now: Tick) -> ProcessId {
        let key = self.processes.vacant_key();
        let id = ProcessId::from_raw(key as u32);
        let record = ProcessRecord::new(id, affinity, now);
        let inserted = self.processes.insert(record);
        debug_assert_eq!(inserted, key);
        id
    }

    pub fn get(&self, id: ProcessId) -> Option<&ProcessRecord> {
        self.processes.get(id.raw() as usize)
    }

    pub fn get_mut(&mut self, id: ProcessId) -> Option<&mut ProcessRecord> {
        self.processes.get_mut(id.raw() as usize)
    }

    pub fn remove(&mut self, id: ProcessId) -> Option<ProcessRecord> {
        if self.processes.contains(id.raw() as usize) {
            Some(self.processes.remove(id.raw() as usize))
        } else {
            None
        }
    }

    pub fn contains(&self, id: ProcessId) -> bool {
        self.processes.contains(id.raw() as usize)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn thread_membership_add_remove() {
        let mut p = ProcessRecord::new(ProcessId::from_raw(0), 0xF, 0);
        let t = ThreadId::from_raw(1);
        p.add_thread(t);
        assert!(!p.is_empty());
        p.remove_thread(t);
        assert!(p.is_empty());
    }

    #[test]
    fn table_insert_get_remove() {
        let mut table = ProcessTable::new();
        let id = table.insert(0xF, 0);
        assert!(table.contains(id));
        table.get_mut(id).unwrap().is_terminating = true;
        assert!(table.get(id).unwrap().is_terminating);
        assert!(table.remove(id).is_some());
        assert!(!table.contains(id));
    }
}
