//! rtsync - priority-inheritance mutexes for a real-time kernel
//!
//! This is the synchronization core of a preemptive, fixed-priority
//! kernel: a mutex with Normal / ErrorChecking / Recursive semantics and
//! an engine that propagates priority boosts along ownership chains so no
//! owner ever runs below the threads it transitively blocks.
//!
//! The scheduler is modelled as a deterministic single-CPU dispatcher so
//! the whole graph of blocking relationships can be driven and inspected
//! from a host.

#![cfg_attr(not(test), no_std)]

// Configuration and capacities
pub mod config;

// Kernel core: scheduler collaborator and synchronization primitives
pub mod core;

// Re-export key types for convenience
pub use crate::config::{KernelConfig, TraceFlags};
pub use crate::core::Kernel;
pub use crate::core::sched::{Op, Priority, Program, ThreadId, ThreadState};
pub use crate::core::sync::{MutexAttributes, MutexId, MutexType, Protocol};

/// rtsync version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Common error type for rtsync
///
/// `Deadlock`, `NotOwner` and `InvalidArgument` are the status codes
/// returned by `lock`/`unlock`; the rest come from the thread and mutex
/// registries or the dispatcher.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    /// Self-relock of an error-checking mutex, or a cyclic wait
    Deadlock,
    /// Unlock by a thread that does not hold the mutex
    NotOwner,
    /// Invalid argument
    InvalidArgument,
    /// Resource unavailable (table full, counter overflow)
    ResourceUnavailable,
    /// Invalid state
    InvalidState,
    /// The calling context is blocked and nothing else can run; after a
    /// stalled `join` the host runs again, after a stalled `lock` it stays
    /// blocked
    Stalled,
}

impl ::core::fmt::Display for Error {
    fn fmt(&self, f: &mut ::core::fmt::Formatter<'_>) -> ::core::fmt::Result {
        let msg = match self {
            Error::Deadlock => "resource deadlock would occur",
            Error::NotOwner => "operation not permitted: mutex not owned",
            Error::InvalidArgument => "invalid argument",
            Error::ResourceUnavailable => "resource unavailable",
            Error::InvalidState => "invalid state",
            Error::Stalled => "no runnable thread can resume the caller",
        };
        f.write_str(msg)
    }
}

/// Result type for rtsync
pub type Result<T> = ::core::result::Result<T, Error>;
