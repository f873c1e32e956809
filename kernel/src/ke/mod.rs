//! Kernel-level synchronization and dispatch primitives: the Object
//! Protocol, Timer Service, APC Queue, and Wait Engine (§4.1-4.3, 4.5).
//! Named after the teacher's `ke` module, which plays the same role for the
//! full kernel.

pub mod apc;
pub mod object;
pub mod timer;
pub mod wait;
