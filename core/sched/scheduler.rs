//! Main scheduler implementation
//!
//! Single-CPU, strictly preemptive fixed-priority scheduler. It owns the
//! thread table, the ready queue and the notion of the running thread.
//! The synchronization core changes priorities and run states only
//! through the methods here and never reorders the ready queue itself.

use heapless::Vec;

use crate::config::{TraceFlags, MAX_THREADS};
use crate::core::sched::{Priority, PriorityQueue, Program, Thread, ThreadId, ThreadState};
use crate::{Error, Result};

/// Scheduler statistics
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SchedulerStats {
    /// Total number of threads
    pub total_threads: usize,
    /// Total context switches
    pub context_switches: u64,
    /// Scheduler runs
    pub scheduler_runs: u64,
    /// Effective priority changes
    pub priority_changes: u64,
}

/// Main scheduler
#[derive(Debug)]
pub struct Scheduler {
    /// Thread control blocks, indexed by thread ID
    threads: Vec<Thread, MAX_THREADS>,
    /// Ready threads; the running thread is not queued
    ready_queue: PriorityQueue<MAX_THREADS>,
    /// Currently running thread
    current: Option<ThreadId>,
    /// Statistics
    stats: SchedulerStats,
    /// Trace settings
    trace: TraceFlags,
}

impl Scheduler {
    /// Create a new scheduler
    pub fn new(trace: TraceFlags) -> Self {
        Self {
            threads: Vec::new(),
            ready_queue: PriorityQueue::new(),
            current: None,
            stats: SchedulerStats::default(),
            trace,
        }
    }

    /// Create a new dormant thread
    pub fn create_thread(
        &mut self,
        name: &'static str,
        priority: Priority,
        program: Option<Program>,
    ) -> Result<ThreadId> {
        let tid = ThreadId(self.threads.len() as u16);
        self.threads
            .push(Thread::new(tid, name, priority, program))
            .map_err(|_| Error::ResourceUnavailable)?;
        self.stats.total_threads += 1;
        log::debug!("Created thread {:?} '{}' at priority {}", tid, name, priority);
        Ok(tid)
    }

    /// Get a thread by ID
    pub fn thread(&self, tid: ThreadId) -> Result<&Thread> {
        self.threads.get(tid.index()).ok_or(Error::InvalidArgument)
    }

    pub(crate) fn thread_mut(&mut self, tid: ThreadId) -> Result<&mut Thread> {
        self.threads.get_mut(tid.index()).ok_or(Error::InvalidArgument)
    }

    /// All threads, in creation order
    pub fn threads(&self) -> impl Iterator<Item = &Thread> {
        self.threads.iter()
    }

    /// Currently running thread
    pub fn current(&self) -> Option<ThreadId> {
        self.current
    }

    /// Ready queue snapshot, next to run first
    pub fn ready_queue(&self) -> &PriorityQueue<MAX_THREADS> {
        &self.ready_queue
    }

    /// Effective priority of a thread
    pub fn effective_priority(&self, tid: ThreadId) -> Result<Priority> {
        Ok(self.thread(tid)?.effective_priority())
    }

    /// Change the effective priority of a thread
    ///
    /// A ready thread moves to the tail of its new priority level. A
    /// running thread keeps the CPU until the next `reschedule`, which
    /// performs the preemption check.
    pub fn set_effective_priority(&mut self, tid: ThreadId, priority: Priority) -> Result<()> {
        let thread = self.thread_mut(tid)?;
        if thread.effective_priority() == priority {
            return Ok(());
        }
        thread.set_effective_priority(priority);
        if thread.state() == ThreadState::Ready {
            self.ready_queue.reposition(tid, priority);
        }
        self.stats.priority_changes += 1;
        Ok(())
    }

    /// Make a dormant thread ready
    pub fn start(&mut self, tid: ThreadId) -> Result<()> {
        if self.thread(tid)?.state() != ThreadState::Dormant {
            return Err(Error::InvalidState);
        }
        self.ready(tid)
    }

    /// Put a thread in the ready queue
    pub fn ready(&mut self, tid: ThreadId) -> Result<()> {
        let thread = self.thread_mut(tid)?;
        let priority = thread.effective_priority();
        match thread.state() {
            ThreadState::Ready | ThreadState::Running => return Ok(()),
            ThreadState::Terminated => return Err(Error::InvalidState),
            ThreadState::Dormant | ThreadState::Blocked => {}
        }
        thread.set_state(ThreadState::Ready);
        self.ready_queue.enqueue(tid, priority)
    }

    /// Take a ready or running thread off the CPU
    pub fn block(&mut self, tid: ThreadId) -> Result<()> {
        let thread = self.thread_mut(tid)?;
        match thread.state() {
            ThreadState::Ready => {
                thread.set_state(ThreadState::Blocked);
                self.ready_queue.dequeue(tid);
            }
            ThreadState::Running => thread.set_state(ThreadState::Blocked),
            _ => return Err(Error::InvalidState),
        }
        Ok(())
    }

    /// Block `waiter` until `target` terminates
    pub fn join_wait(&mut self, waiter: ThreadId, target: ThreadId) -> Result<()> {
        self.block(waiter)?;
        self.thread_mut(waiter)?.set_joining(Some(target));
        Ok(())
    }

    /// Terminate a thread and wake every thread joining it
    pub fn terminate(&mut self, tid: ThreadId) -> Result<()> {
        if self.thread(tid)?.state() == ThreadState::Ready {
            self.ready_queue.dequeue(tid);
        }
        self.thread_mut(tid)?.set_state(ThreadState::Terminated);

        let joiners: Vec<ThreadId, MAX_THREADS> = self
            .threads
            .iter()
            .filter(|t| t.joining() == Some(tid))
            .map(|t| t.id())
            .collect();
        for joiner in joiners {
            self.thread_mut(joiner)?.set_joining(None);
            self.ready(joiner)?;
        }
        Ok(())
    }

    /// Decide which thread runs next
    ///
    /// The running thread is preempted only by a strictly higher priority
    /// ready thread and goes back to the head of its priority level.
    pub fn reschedule(&mut self) -> Result<Option<ThreadId>> {
        self.stats.scheduler_runs += 1;

        if let Some(cur) = self.current {
            let thread = self.thread(cur)?;
            if thread.state() == ThreadState::Running {
                let priority = thread.effective_priority();
                match self.ready_queue.highest_priority() {
                    Some(head) if head > priority => {
                        self.thread_mut(cur)?.set_state(ThreadState::Ready);
                        self.ready_queue.enqueue_front(cur, priority)?;
                    }
                    _ => return Ok(Some(cur)),
                }
            }
        }

        let next = self.ready_queue.dequeue_highest().map(|e| e.thread);
        if let Some(tid) = next {
            self.thread_mut(tid)?.set_state(ThreadState::Running);
        }
        if next != self.current {
            self.stats.context_switches += 1;
            if self.trace.contains(TraceFlags::DISPATCH) {
                log::trace!("Context switch {:?} -> {:?}", self.current, next);
            }
        }
        self.current = next;
        Ok(next)
    }

    /// Get scheduler statistics
    pub fn stats(&self) -> SchedulerStats {
        self.stats
    }
}
