//! Error taxonomy for the thread subsystem core.
//!
//! `ServerError` covers terminal failures only. Non-terminal wait outcomes
//! (pending, alertable-apc, timeout) are modeled separately by
//! [`crate::ke::wait::WaitOutcome`] so that a bare `Result::Err` always means
//! "this operation failed", never "try again later".

use thiserror::Error;

/// A server-assigned 32-bit thread id, echoed in several error variants.
pub type ThreadIdRaw = u32;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ServerError {
    #[error("invalid parameter")]
    InvalidParameter,

    #[error("access denied")]
    AccessDenied,

    #[error("process {pid} is terminating")]
    ProcessIsTerminating { pid: u32 },

    #[error("thread {tid} is terminating")]
    ThreadIsTerminating { tid: ThreadIdRaw },

    #[error("suspend count exceeded")]
    SuspendCountExceeded,

    #[error("invalid client id")]
    InvalidCid,

    #[error("too many opened files")]
    TooManyOpenedFiles,

    #[error("cpu type not supported")]
    NotSupported,

    #[error("fatal protocol error on thread {tid}")]
    FatalProtocol { tid: ThreadIdRaw },

    #[error("operation unsuccessful")]
    Unsuccessful,

    #[error("resource exhausted")]
    ResourceExhaustion,
}

pub type Result<T> = core::result::Result<T, ServerError>;
