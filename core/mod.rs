//! Core kernel modules
//!
//! This module ties the scheduler and the mutex table together into a
//! [`Kernel`]. Every public call runs on behalf of the host thread with
//! `&mut self` held for its full duration, which is the critical section
//! the ownership graph needs: nothing can observe a half-finished boost or
//! hand-over. After each call the dispatcher runs worker threads until the
//! host is once again the thread the scheduler would pick, the point at
//! which a real preemptive kernel returns to the caller.

pub mod sched;
pub mod sync;


use heapless::Vec;

use crate::config::{KernelConfig, TraceFlags, MAX_THREADS};
use crate::core::sched::{
    Op, Priority, Program, Scheduler, SchedulerStats, Thread, ThreadId, ThreadState,
};
use crate::core::sync::{inherit, MutexAttributes, MutexId, MutexTable};
use crate::{Error, Result};

/// Host-driven kernel instance
#[derive(Debug)]
pub struct Kernel {
    /// Configuration the kernel was created with
    config: KernelConfig,
    /// Thread table, ready queue and running thread
    scheduler: Scheduler,
    /// Mutex table
    mutexes: MutexTable,
    /// Thread the public API acts for
    host: ThreadId,
}

impl Kernel {
    /// Create a kernel whose host thread runs at `config.host_priority`
    pub fn new(config: KernelConfig) -> Result<Self> {
        let mut scheduler = Scheduler::new(config.trace);
        let host = scheduler.create_thread("host", config.host_priority, None)?;
        scheduler.start(host)?;
        scheduler.reschedule()?;

        log::info!("rtsync v{} kernel up, host priority {}", crate::VERSION, config.host_priority);

        Ok(Self {
            config,
            scheduler,
            mutexes: MutexTable::new(config.trace),
            host,
        })
    }

    /// Configuration the kernel was created with
    pub fn config(&self) -> &KernelConfig {
        &self.config
    }

    /// ID of the host thread
    pub fn host(&self) -> ThreadId {
        self.host
    }

    /// Create a mutex
    pub fn create_mutex(&mut self, attrs: MutexAttributes) -> Result<MutexId> {
        self.mutexes.create(attrs)
    }

    /// Create a dormant worker thread
    pub fn create_thread(
        &mut self,
        name: &'static str,
        priority: Priority,
        program: Program,
    ) -> Result<ThreadId> {
        self.scheduler.create_thread(name, priority, Some(program))
    }

    /// Start a worker; it runs at once if it outranks the host
    pub fn start(&mut self, tid: ThreadId) -> Result<()> {
        self.scheduler.start(tid)?;
        self.dispatch()
    }

    /// Wait for a worker to terminate
    ///
    /// If the worker can never terminate because nothing else is runnable,
    /// the wait is abandoned and `Stalled` is returned with the host
    /// running again, e.g. so it can release what the worker waits for.
    pub fn join(&mut self, tid: ThreadId) -> Result<()> {
        if tid == self.host {
            return Err(Error::Deadlock);
        }
        match self.scheduler.thread(tid)?.state() {
            ThreadState::Terminated => Ok(()),
            ThreadState::Dormant => Err(Error::InvalidState),
            _ => {
                self.scheduler.join_wait(self.host, tid)?;
                match self.dispatch() {
                    Err(Error::Stalled) => {
                        self.scheduler.thread_mut(self.host)?.set_joining(None);
                        self.scheduler.ready(self.host)?;
                        self.dispatch()?;
                        Err(Error::Stalled)
                    }
                    other => other,
                }
            }
        }
    }

    /// Lock a mutex from the host thread
    ///
    /// Returns once the host owns the mutex. A contended lock lets the
    /// owner chain run at inherited priority until the mutex is handed
    /// over. `Stalled` means the host is queued on a mutex that can never
    /// be handed to it (a normal mutex it already holds); it stays blocked
    /// and every later call acting for it fails with `InvalidState`.
    pub fn lock(&mut self, mutex: MutexId) -> Result<()> {
        self.mutexes.lock(&mut self.scheduler, self.host, mutex)?;
        self.dispatch()
    }

    /// Unlock a mutex from the host thread
    ///
    /// A waiter that outranks the host after the hand-over runs before
    /// this returns.
    pub fn unlock(&mut self, mutex: MutexId) -> Result<()> {
        self.mutexes.unlock(&mut self.scheduler, self.host, mutex)?;
        self.dispatch()
    }

    /// Base priority of the host thread
    pub fn get_priority(&self) -> Priority {
        self.host_thread().map_or(self.config.host_priority, Thread::base_priority)
    }

    /// Effective priority of the host thread
    pub fn get_effective_priority(&self) -> Priority {
        self.host_thread()
            .map_or(self.config.host_priority, Thread::effective_priority)
    }

    /// Change the base priority of the host thread
    pub fn set_priority(&mut self, priority: Priority) -> Result<()> {
        self.set_thread_priority(self.host, priority)?;
        self.dispatch()
    }

    /// Base priority of any thread
    pub fn priority(&self, tid: ThreadId) -> Result<Priority> {
        Ok(self.scheduler.thread(tid)?.base_priority())
    }

    /// Effective priority of any thread
    pub fn effective_priority(&self, tid: ThreadId) -> Result<Priority> {
        self.scheduler.effective_priority(tid)
    }

    /// Run state of any thread
    pub fn state(&self, tid: ThreadId) -> Result<ThreadState> {
        Ok(self.scheduler.thread(tid)?.state())
    }

    /// Combined status of a worker's mutex operations
    pub fn status(&self, tid: ThreadId) -> Result<Result<()>> {
        self.scheduler
            .thread(tid)?
            .program()
            .map(Program::status)
            .ok_or(Error::InvalidArgument)
    }

    /// Current owner of a mutex
    pub fn owner(&self, mutex: MutexId) -> Result<Option<ThreadId>> {
        Ok(self.mutexes.get(mutex)?.owner())
    }

    /// Lock nesting depth of a mutex
    pub fn lock_count(&self, mutex: MutexId) -> Result<u32> {
        Ok(self.mutexes.get(mutex)?.lock_count())
    }

    /// Threads waiting for a mutex, next to be granted first
    pub fn waiters(&self, mutex: MutexId) -> Result<Vec<ThreadId, MAX_THREADS>> {
        self.mutexes.waiters(mutex)
    }

    /// Scheduler statistics
    pub fn stats(&self) -> SchedulerStats {
        self.scheduler.stats()
    }

    /// Scheduler, for inspection
    pub fn scheduler(&self) -> &Scheduler {
        &self.scheduler
    }

    /// Mutex table, for inspection
    pub fn mutexes(&self) -> &MutexTable {
        &self.mutexes
    }

    fn host_thread(&self) -> Option<&Thread> {
        self.scheduler.thread(self.host).ok()
    }

    fn set_thread_priority(&mut self, tid: ThreadId, priority: Priority) -> Result<()> {
        self.scheduler.thread_mut(tid)?.set_base_priority(priority);
        inherit::restore(&mut self.mutexes, &mut self.scheduler, tid)
    }

    /// Run workers until the host is the running thread again
    fn dispatch(&mut self) -> Result<()> {
        loop {
            match self.scheduler.reschedule()? {
                Some(tid) if tid == self.host => return Ok(()),
                Some(tid) => self.step(tid)?,
                None => {
                    log::warn!("Host thread {:?} blocked with nothing runnable", self.host);
                    return Err(Error::Stalled);
                }
            }
        }
    }

    /// Execute one operation of a worker's program
    fn step(&mut self, tid: ThreadId) -> Result<()> {
        let op = self
            .scheduler
            .thread_mut(tid)?
            .program_mut()
            .and_then(Program::next_op);

        let Some(op) = op else {
            let thread = self.scheduler.thread(tid)?;
            if !thread.owned_mutexes().is_empty() {
                log::warn!(
                    "Thread {:?} '{}' terminated holding {} mutex(es)",
                    tid,
                    thread.name(),
                    thread.owned_mutexes().len()
                );
            }
            if self.config.trace.contains(TraceFlags::DISPATCH) {
                log::trace!("Thread {:?} terminated", tid);
            }
            return self.scheduler.terminate(tid);
        };

        if self.config.trace.contains(TraceFlags::DISPATCH) {
            log::trace!("Thread {:?} runs {:?}", tid, op);
        }
        let outcome = match op {
            Op::Lock(mutex) => self
                .mutexes
                .lock(&mut self.scheduler, tid, mutex)
                .map(|_| ()),
            Op::Unlock(mutex) => self
                .mutexes
                .unlock(&mut self.scheduler, tid, mutex)
                .map(|_| ()),
            Op::SetPriority(priority) => self.set_thread_priority(tid, priority),
        };
        if let Some(program) = self.scheduler.thread_mut(tid)?.program_mut() {
            program.record(outcome);
        }
        Ok(())
    }
}
