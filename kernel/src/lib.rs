//! Core thread subsystem: thread lifecycle, the multi-object wait/wake
//! engine, and APC delivery, for a user-space emulator server.
//!
//! Grounded on the teacher kernel's `ke` (synchronization/dispatch) and `ps`
//! (process/thread manager) subsystems, re-architected from a `#![no_std]`
//! raw-pointer kernel into a single-threaded, cooperative, `std`-based
//! server core. See `DESIGN.md` for the full grounding ledger.
//!
//! Object kinds (events, mutexes, semaphores), the handle table, security
//! tokens, and the wire transport are all external collaborators; this
//! crate only defines the seams they plug into ([`ke::object::WaitableObject`],
//! [`ke::wait::WaitChannel`], [`context::CpuContextSnapshot`]).

pub mod config;
pub mod context;
pub mod error;
pub mod ke;
pub mod ps;

pub use config::ServerConfig;
pub use error::{Result, ServerError};
pub use ps::lifecycle::Engine;
