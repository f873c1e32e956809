//! CPU context management seam.
//!
//! The concrete register layout is an external collaborator's concern (out of
//! scope for this core, see the crate-level docs). The wait engine only needs
//! to coordinate *when* a context snapshot is captured relative to suspend and
//! resume, not what is inside it, so the snapshot itself is an opaque blob
//! behind the [`CpuContextSnapshot`] trait.

use bitflags::bitflags;

bitflags! {
    /// Which register groups a get/set-context request touches.
    ///
    /// Named after the teacher's `SERVER_CTX_*` constants (`ke::exception`),
    /// generalized to an opaque bitflags set since the concrete register
    /// layout is out of scope here.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct ContextFlags: u32 {
        const CONTROL           = 0x0001;
        const INTEGER           = 0x0002;
        const SEGMENTS          = 0x0004;
        const FLOATING_POINT    = 0x0008;
        const DEBUG_REGISTERS   = 0x0010;
        const EXTENDED_REGISTERS = 0x0020;
    }
}

/// CPU type a thread's entry/context was established with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CpuType {
    X86,
    X86_64,
    Arm,
    Arm64,
}

impl CpuType {
    /// Register groups that only the OS (not the client) can supply, per
    /// §4.6: "for system registers ... always fetch live from the OS."
    pub fn system_regs(self) -> ContextFlags {
        match self {
            CpuType::X86 | CpuType::X86_64 => ContextFlags::DEBUG_REGISTERS,
            CpuType::Arm | CpuType::Arm64 => ContextFlags::empty(),
        }
    }
}

/// An opaque capture of a thread's CPU registers.
///
/// Implemented by whatever owns the real register layout; the core only
/// needs to copy flagged pieces between two snapshots and know which CPU
/// type a snapshot belongs to.
pub trait CpuContextSnapshot {
    fn cpu(&self) -> CpuType;

    /// Copy the register groups named by `flags` from `other` into `self`.
    fn copy_from(&mut self, other: &Self, flags: ContextFlags)
    where
        Self: Sized;
}

/// Outcome of a `get-thread-context` request (§4.6).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContextRequestOutcome {
    /// The target is the calling thread itself; its own context is
    /// authoritative and the client should use its live registers.
    Self_,
    /// No server-side snapshot exists yet and the target is running; retry
    /// after the target is suspended (the caller may have asked the core to
    /// auto-suspend it first).
    Pending,
    /// The target is terminated; no context can be retrieved.
    Unsuccessful,
    /// A snapshot was copied into the reply.
    Copied,
}
