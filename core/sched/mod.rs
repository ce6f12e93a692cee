//! Scheduler module
//!
//! This module provides the thread control block and the fixed-priority
//! scheduler that the synchronization primitives cooperate with.

pub mod program;
pub mod queue;
pub mod scheduler;

pub use program::{Op, Program};
pub use queue::PriorityQueue;
pub use scheduler::{Scheduler, SchedulerStats};

use heapless::Vec;

use crate::config::MAX_OWNED_MUTEXES;
use crate::core::sync::MutexId;
use crate::{Error, Result};

/// Thread priority, higher value runs first
pub type Priority = u8;

/// Thread ID, an index into the scheduler's thread table
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ThreadId(pub(crate) u16);

impl ThreadId {
    /// Position of the thread in the thread table
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// Thread states
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThreadState {
    /// Thread has been created but not started
    Dormant,
    /// Thread is ready to run
    Ready,
    /// Thread is currently running
    Running,
    /// Thread is blocked (waiting for a mutex or a join)
    Blocked,
    /// Thread has finished execution
    Terminated,
}

/// Thread control block
#[derive(Debug)]
pub struct Thread {
    /// Unique thread ID
    id: ThreadId,
    /// Thread name
    name: &'static str,
    /// Thread state
    state: ThreadState,
    /// Priority assigned by the thread's creator or `set_priority`
    base_priority: Priority,
    /// Priority the scheduler actually uses
    effective_priority: Priority,
    /// Mutex this thread is waiting for
    blocked_on: Option<MutexId>,
    /// Thread this thread is waiting to terminate
    joining: Option<ThreadId>,
    /// Held mutexes in acquisition order
    owned_mutexes: Vec<MutexId, MAX_OWNED_MUTEXES>,
    /// Scripted behaviour, `None` for the host thread
    program: Option<Program>,
}

impl Thread {
    /// Create a new dormant thread
    pub fn new(
        id: ThreadId,
        name: &'static str,
        priority: Priority,
        program: Option<Program>,
    ) -> Self {
        Self {
            id,
            name,
            state: ThreadState::Dormant,
            base_priority: priority,
            effective_priority: priority,
            blocked_on: None,
            joining: None,
            owned_mutexes: Vec::new(),
            program,
        }
    }

    /// Get the thread ID
    pub fn id(&self) -> ThreadId {
        self.id
    }

    /// Get the thread name
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Get the thread state
    pub fn state(&self) -> ThreadState {
        self.state
    }

    /// Get the base priority
    pub fn base_priority(&self) -> Priority {
        self.base_priority
    }

    /// Get the effective priority
    pub fn effective_priority(&self) -> Priority {
        self.effective_priority
    }

    /// Mutex this thread is blocked on, if any
    pub fn blocked_on(&self) -> Option<MutexId> {
        self.blocked_on
    }

    /// Thread this thread is waiting to join, if any
    pub fn joining(&self) -> Option<ThreadId> {
        self.joining
    }

    /// Mutexes currently held, oldest first
    pub fn owned_mutexes(&self) -> &[MutexId] {
        &self.owned_mutexes
    }

    /// Whether the thread can take ownership of one more mutex
    pub fn can_own_more(&self) -> bool {
        !self.owned_mutexes.is_full()
    }

    /// Scripted behaviour of a worker thread
    pub fn program(&self) -> Option<&Program> {
        self.program.as_ref()
    }

    pub(crate) fn set_state(&mut self, state: ThreadState) {
        self.state = state;
    }

    pub(crate) fn set_base_priority(&mut self, priority: Priority) {
        self.base_priority = priority;
    }

    pub(crate) fn set_effective_priority(&mut self, priority: Priority) {
        self.effective_priority = priority;
    }

    pub(crate) fn set_blocked_on(&mut self, mutex: Option<MutexId>) {
        self.blocked_on = mutex;
    }

    pub(crate) fn set_joining(&mut self, target: Option<ThreadId>) {
        self.joining = target;
    }

    pub(crate) fn add_owned(&mut self, mutex: MutexId) -> Result<()> {
        self.owned_mutexes
            .push(mutex)
            .map_err(|_| Error::ResourceUnavailable)
    }

    pub(crate) fn remove_owned(&mut self, mutex: MutexId) -> bool {
        match self.owned_mutexes.iter().position(|&m| m == mutex) {
            Some(pos) => {
                self.owned_mutexes.remove(pos);
                true
            }
            None => false,
        }
    }

    pub(crate) fn program_mut(&mut self) -> Option<&mut Program> {
        self.program.as_mut()
    }
}
