//! Configuration management
//!
//! This module holds the fixed capacities of the kernel tables and the
//! runtime settings of a [`Kernel`](crate::Kernel) instance.

use bitflags::bitflags;

use crate::core::sched::Priority;

/// Maximum number of threads, host thread included
pub const MAX_THREADS: usize = 32;

/// Maximum number of mutexes
pub const MAX_MUTEXES: usize = 64;

/// Maximum number of mutexes a single thread may hold at once
pub const MAX_OWNED_MUTEXES: usize = 16;

/// Maximum number of operations in a worker program
pub const MAX_PROGRAM_OPS: usize = 8;

/// Longest ownership chain the inheritance engine will walk.
///
/// A chain visits each thread at most once, so any walk longer than this
/// has looped back on itself.
pub const MAX_CHAIN_DEPTH: usize = MAX_THREADS;

/// Priority given to the host thread unless configured otherwise
pub const DEFAULT_HOST_PRIORITY: Priority = 1;

bitflags! {
    /// Which kernel events are traced through `log`
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct TraceFlags: u8 {
        /// Mutex acquisition, blocking and recursion
        const LOCK = 1 << 0;
        /// Mutex release and ownership hand-over
        const UNLOCK = 1 << 1;
        /// Priority boosts and restorations
        const INHERIT = 1 << 2;
        /// Dispatcher decisions and context switches
        const DISPATCH = 1 << 3;
    }
}

impl TraceFlags {
    /// Trace flags selected by the `debug` / `verbose` cargo features
    pub fn from_features() -> Self {
        if cfg!(feature = "verbose") {
            TraceFlags::all()
        } else if cfg!(feature = "debug") {
            TraceFlags::LOCK | TraceFlags::UNLOCK | TraceFlags::INHERIT
        } else {
            TraceFlags::empty()
        }
    }
}

/// Kernel configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KernelConfig {
    /// Base priority of the host thread (the calling context)
    pub host_priority: Priority,
    /// Events traced through `log`
    pub trace: TraceFlags,
}

impl KernelConfig {
    /// Configuration with the given host priority and default tracing
    pub fn with_host_priority(host_priority: Priority) -> Self {
        Self {
            host_priority,
            ..Self::default()
        }
    }
}

impl Default for KernelConfig {
    fn default() -> Self {
        Self {
            host_priority: DEFAULT_HOST_PRIORITY,
            trace: TraceFlags::from_features(),
        }
    }
}
