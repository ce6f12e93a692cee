//! Mutex implementation for the kernel
//!
//! Mutexes live in a fixed table and refer to threads by ID only; the
//! thread table owned by the scheduler is the single owner of every
//! thread. A contended lock queues the caller by effective priority and,
//! for priority-inheritance mutexes, boosts the ownership chain above it.

use heapless::Vec;

use crate::config::{TraceFlags, MAX_MUTEXES, MAX_THREADS};
use crate::core::sched::{Priority, PriorityQueue, Scheduler, ThreadId, ThreadState};
use crate::core::sync::inherit;
use crate::core::sync::{LockOutcome, MutexAttributes, MutexId, MutexType, Protocol};
use crate::{Error, Result};

/// State of one mutex
#[derive(Debug)]
pub struct MutexControlBlock {
    /// Construction parameters
    attrs: MutexAttributes,
    /// Thread that currently owns the mutex
    owner: Option<ThreadId>,
    /// Number of times the owner has locked the mutex
    lock_count: u32,
    /// Blocked threads, highest effective priority first
    wait_queue: PriorityQueue<MAX_THREADS>,
}

impl MutexControlBlock {
    fn new(attrs: MutexAttributes) -> Self {
        Self {
            attrs,
            owner: None,
            lock_count: 0,
            wait_queue: PriorityQueue::new(),
        }
    }

    /// Mutex type
    pub fn kind(&self) -> MutexType {
        self.attrs.kind
    }

    /// Priority protocol
    pub fn protocol(&self) -> Protocol {
        self.attrs.protocol
    }

    /// Priority ceiling of a priority-protect mutex
    pub fn ceiling(&self) -> Option<Priority> {
        self.attrs.ceiling
    }

    /// Current owner
    pub fn owner(&self) -> Option<ThreadId> {
        self.owner
    }

    /// Lock nesting depth, 0 when unlocked
    pub fn lock_count(&self) -> u32 {
        self.lock_count
    }

    /// Check if the mutex is owned
    pub fn is_locked(&self) -> bool {
        self.owner.is_some()
    }

    /// Threads waiting for the mutex
    pub fn waiters(&self) -> &PriorityQueue<MAX_THREADS> {
        &self.wait_queue
    }

    pub(crate) fn waiters_mut(&mut self) -> &mut PriorityQueue<MAX_THREADS> {
        &mut self.wait_queue
    }

    /// Check whether blocking on this mutex lends priority to its owner
    pub fn inherits(&self) -> bool {
        self.attrs.protocol == Protocol::PriorityInheritance
    }
}

/// Table of every mutex in the kernel
#[derive(Debug)]
pub struct MutexTable {
    mutexes: Vec<MutexControlBlock, MAX_MUTEXES>,
    trace: TraceFlags,
}

impl MutexTable {
    /// Create an empty table
    pub fn new(trace: TraceFlags) -> Self {
        Self {
            mutexes: Vec::new(),
            trace,
        }
    }

    /// Create a new unlocked mutex
    pub fn create(&mut self, attrs: MutexAttributes) -> Result<MutexId> {
        attrs.validate()?;
        let id = MutexId(self.mutexes.len() as u16);
        self.mutexes
            .push(MutexControlBlock::new(attrs))
            .map_err(|_| Error::ResourceUnavailable)?;
        log::debug!("Created mutex {:?} ({:?}, {:?})", id, attrs.kind, attrs.protocol);
        Ok(id)
    }

    /// Get a mutex by ID
    pub fn get(&self, id: MutexId) -> Result<&MutexControlBlock> {
        self.mutexes.get(id.index()).ok_or(Error::InvalidArgument)
    }

    pub(crate) fn get_mut(&mut self, id: MutexId) -> Result<&mut MutexControlBlock> {
        self.mutexes.get_mut(id.index()).ok_or(Error::InvalidArgument)
    }

    /// Number of mutexes
    pub fn len(&self) -> usize {
        self.mutexes.len()
    }

    /// Check if the table is empty
    pub fn is_empty(&self) -> bool {
        self.mutexes.is_empty()
    }

    pub(crate) fn trace(&self) -> TraceFlags {
        self.trace
    }

    /// Lock `id` on behalf of `caller`
    ///
    /// `Blocked` means the caller now waits in the mutex's queue; it
    /// becomes the owner when a matching `unlock` grants it the mutex.
    /// A failed call changes nothing.
    pub fn lock(
        &mut self,
        sched: &mut Scheduler,
        caller: ThreadId,
        id: MutexId,
    ) -> Result<LockOutcome> {
        let thread = sched.thread(caller)?;
        if !matches!(thread.state(), ThreadState::Ready | ThreadState::Running) {
            return Err(Error::InvalidState);
        }
        let base_priority = thread.base_priority();
        let mutex = self.get(id)?;

        if let Some(ceiling) = mutex.ceiling() {
            if base_priority > ceiling {
                return Err(Error::InvalidArgument);
            }
        }

        match mutex.owner() {
            None => {
                self.acquire(sched, caller, id)?;
                if self.trace.contains(TraceFlags::LOCK) {
                    log::debug!("Thread {:?} locked mutex {:?}", caller, id);
                }
                Ok(LockOutcome::Acquired)
            }
            Some(owner) if owner == caller => match mutex.kind() {
                MutexType::Recursive => {
                    let mutex = self.get_mut(id)?;
                    mutex.lock_count = mutex
                        .lock_count
                        .checked_add(1)
                        .ok_or(Error::ResourceUnavailable)?;
                    if self.trace.contains(TraceFlags::LOCK) {
                        log::debug!(
                            "Thread {:?} relocked mutex {:?} (count {})",
                            caller,
                            id,
                            self.get(id)?.lock_count
                        );
                    }
                    Ok(LockOutcome::Acquired)
                }
                MutexType::ErrorChecking => Err(Error::Deadlock),
                MutexType::Normal => {
                    log::warn!("Thread {:?} relocked normal mutex {:?}, blocking forever", caller, id);
                    self.enqueue_waiter(sched, caller, id)?;
                    Ok(LockOutcome::Blocked)
                }
            },
            Some(owner) => {
                if let Err(err) = inherit::check_wait_cycle(self, sched, caller, owner) {
                    log::warn!("Thread {:?} locking mutex {:?} would deadlock", caller, id);
                    return Err(err);
                }
                // A waiter must be able to take the mutex when it is handed over
                if !sched.thread(caller)?.can_own_more() {
                    return Err(Error::ResourceUnavailable);
                }
                let inherits = mutex.inherits();
                self.enqueue_waiter(sched, caller, id)?;
                if self.trace.contains(TraceFlags::LOCK) {
                    log::debug!("Thread {:?} blocked on mutex {:?} owned by {:?}", caller, id, owner);
                }
                if inherits {
                    inherit::raise(self, sched, caller, owner)?;
                }
                Ok(LockOutcome::Blocked)
            }
        }
    }

    /// Unlock `id` on behalf of `caller`
    ///
    /// Returns the thread the mutex was handed to, if any. The previous
    /// owner's effective priority is recomputed from what it still holds.
    pub fn unlock(
        &mut self,
        sched: &mut Scheduler,
        caller: ThreadId,
        id: MutexId,
    ) -> Result<Option<ThreadId>> {
        sched.thread(caller)?;
        let mutex = self.get(id)?;
        if mutex.owner() != Some(caller) {
            return Err(Error::NotOwner);
        }

        if mutex.kind() == MutexType::Recursive && mutex.lock_count() > 1 {
            let mutex = self.get_mut(id)?;
            mutex.lock_count -= 1;
            let count = mutex.lock_count;
            if self.trace.contains(TraceFlags::UNLOCK) {
                log::debug!("Thread {:?} unlocked mutex {:?} (count {})", caller, id, count);
            }
            return Ok(None);
        }

        let next = mutex.waiters().peek().map(|e| e.thread);

        let mutex = self.get_mut(id)?;
        mutex.owner = None;
        mutex.lock_count = 0;
        sched.thread_mut(caller)?.remove_owned(id);

        if let Some(next) = next {
            self.get_mut(id)?.wait_queue.dequeue(next);
            self.hand_over(sched, next, id)?;
            if self.trace.contains(TraceFlags::UNLOCK) {
                log::debug!("Thread {:?} unlocked mutex {:?}, handed to {:?}", caller, id, next);
            }
            inherit::restore(self, sched, next)?;
        } else if self.trace.contains(TraceFlags::UNLOCK) {
            log::debug!("Thread {:?} unlocked mutex {:?}", caller, id);
        }

        inherit::restore(self, sched, caller)?;
        Ok(next)
    }

    /// Threads waiting for a mutex, next to be granted first
    pub fn waiters(&self, id: MutexId) -> Result<Vec<ThreadId, MAX_THREADS>> {
        Ok(self.get(id)?.waiters().iter().map(|e| e.thread).collect())
    }

    fn acquire(&mut self, sched: &mut Scheduler, caller: ThreadId, id: MutexId) -> Result<()> {
        sched.thread_mut(caller)?.add_owned(id)?;
        let mutex = self.get_mut(id)?;
        mutex.owner = Some(caller);
        mutex.lock_count = 1;
        Ok(())
    }

    fn hand_over(&mut self, sched: &mut Scheduler, next: ThreadId, id: MutexId) -> Result<()> {
        self.acquire(sched, next, id)?;
        sched.thread_mut(next)?.set_blocked_on(None);
        sched.ready(next)
    }

    fn enqueue_waiter(&mut self, sched: &mut Scheduler, caller: ThreadId, id: MutexId) -> Result<()> {
        let priority = sched.effective_priority(caller)?;
        self.get_mut(id)?.wait_queue.enqueue(caller, priority)?;
        sched.thread_mut(caller)?.set_blocked_on(Some(id));
        sched.block(caller)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MAX_OWNED_MUTEXES;
    use test_case::test_case;

    fn setup(priorities: &[Priority]) -> (Scheduler, MutexTable) {
        let mut sched = Scheduler::new(TraceFlags::empty());
        for &p in priorities {
            let tid = sched.create_thread("t", p, None).unwrap();
            sched.start(tid).unwrap();
        }
        (sched, MutexTable::new(TraceFlags::empty()))
    }

    const T0: ThreadId = ThreadId(0);
    const T1: ThreadId = ThreadId(1);
    const T2: ThreadId = ThreadId(2);
    const T3: ThreadId = ThreadId(3);
    const T4: ThreadId = ThreadId(4);

    #[test_case(MutexType::Normal ; "normal")]
    #[test_case(MutexType::ErrorChecking ; "error checking")]
    #[test_case(MutexType::Recursive ; "recursive")]
    fn test_uncontended_lock_unlock(kind: MutexType) {
        let (mut sched, mut table) = setup(&[1]);
        let m = table.create(MutexAttributes::inheritance(kind)).unwrap();

        assert_eq!(table.lock(&mut sched, T0, m), Ok(LockOutcome::Acquired));
        assert_eq!(table.get(m).unwrap().owner(), Some(T0));
        assert_eq!(table.get(m).unwrap().lock_count(), 1);
        assert_eq!(sched.thread(T0).unwrap().owned_mutexes(), &[m]);

        assert_eq!(table.unlock(&mut sched, T0, m), Ok(None));
        assert!(!table.get(m).unwrap().is_locked());
        assert_eq!(table.get(m).unwrap().lock_count(), 0);
        assert!(sched.thread(T0).unwrap().owned_mutexes().is_empty());
    }

    #[test]
    fn test_error_checking_relock_is_deadlock() {
        let (mut sched, mut table) = setup(&[1]);
        let m = table
            .create(MutexAttributes::new(MutexType::ErrorChecking, Protocol::None))
            .unwrap();
        table.lock(&mut sched, T0, m).unwrap();
        assert_eq!(table.lock(&mut sched, T0, m), Err(Error::Deadlock));
        assert_eq!(table.get(m).unwrap().lock_count(), 1);
        assert!(table.get(m).unwrap().waiters().is_empty());
    }

    #[test]
    fn test_normal_relock_blocks_owner() {
        let (mut sched, mut table) = setup(&[1]);
        let m = table.create(MutexAttributes::default()).unwrap();
        table.lock(&mut sched, T0, m).unwrap();
        assert_eq!(table.lock(&mut sched, T0, m), Ok(LockOutcome::Blocked));
        let thread = sched.thread(T0).unwrap();
        assert_eq!(thread.state(), ThreadState::Blocked);
        assert_eq!(thread.blocked_on(), Some(m));
        assert_eq!(table.get(m).unwrap().owner(), Some(T0));
    }

    #[test]
    fn test_recursive_nesting() {
        let (mut sched, mut table) = setup(&[1]);
        let m = table
            .create(MutexAttributes::new(MutexType::Recursive, Protocol::None))
            .unwrap();
        for depth in 1..=4 {
            assert_eq!(table.lock(&mut sched, T0, m), Ok(LockOutcome::Acquired));
            assert_eq!(table.get(m).unwrap().lock_count(), depth);
        }
        for _ in 0..3 {
            assert_eq!(table.unlock(&mut sched, T0, m), Ok(None));
            assert_eq!(table.get(m).unwrap().owner(), Some(T0));
        }
        assert_eq!(table.unlock(&mut sched, T0, m), Ok(None));
        assert!(!table.get(m).unwrap().is_locked());
        assert_eq!(table.unlock(&mut sched, T0, m), Err(Error::NotOwner));
    }

    #[test_case(MutexType::Normal ; "normal")]
    #[test_case(MutexType::ErrorChecking ; "error checking")]
    #[test_case(MutexType::Recursive ; "recursive")]
    fn test_unlock_by_non_owner(kind: MutexType) {
        let (mut sched, mut table) = setup(&[1, 2]);
        let m = table.create(MutexAttributes::inheritance(kind)).unwrap();
        assert_eq!(table.unlock(&mut sched, T1, m), Err(Error::NotOwner));

        table.lock(&mut sched, T0, m).unwrap();
        assert_eq!(table.unlock(&mut sched, T1, m), Err(Error::NotOwner));
        assert_eq!(table.get(m).unwrap().owner(), Some(T0));
        assert_eq!(table.get(m).unwrap().lock_count(), 1);
    }

    #[test]
    fn test_grant_order_is_priority_then_arrival() {
        let (mut sched, mut table) = setup(&[1, 5, 7, 7, 6]);
        let m = table.create(MutexAttributes::default()).unwrap();
        table.lock(&mut sched, T0, m).unwrap();
        for waiter in [T1, T2, T3, T4] {
            assert_eq!(table.lock(&mut sched, waiter, m), Ok(LockOutcome::Blocked));
        }
        assert_eq!(table.waiters(m).unwrap().as_slice(), &[T2, T3, T4, T1]);

        let mut owner = T0;
        let mut granted = std::vec::Vec::new();
        while let Some(next) = table.unlock(&mut sched, owner, m).unwrap() {
            assert_eq!(sched.thread(next).unwrap().state(), ThreadState::Ready);
            assert_eq!(sched.thread(next).unwrap().blocked_on(), None);
            granted.push(next);
            owner = next;
        }
        assert_eq!(granted, [T2, T3, T4, T1]);
        assert!(!table.get(m).unwrap().is_locked());
    }

    #[test]
    fn test_no_inheritance_without_protocol() {
        let (mut sched, mut table) = setup(&[1, 9]);
        let m = table.create(MutexAttributes::default()).unwrap();
        table.lock(&mut sched, T0, m).unwrap();
        table.lock(&mut sched, T1, m).unwrap();
        assert_eq!(sched.effective_priority(T0), Ok(1));
    }

    #[test]
    fn test_inheritance_boosts_owner_and_unlock_restores() {
        let (mut sched, mut table) = setup(&[1, 9]);
        let m = table.create(MutexAttributes::inheritance(MutexType::Normal)).unwrap();
        table.lock(&mut sched, T0, m).unwrap();
        table.lock(&mut sched, T1, m).unwrap();
        assert_eq!(sched.effective_priority(T0), Ok(9));

        assert_eq!(table.unlock(&mut sched, T0, m), Ok(Some(T1)));
        assert_eq!(sched.effective_priority(T0), Ok(1));
        assert_eq!(table.get(m).unwrap().owner(), Some(T1));
    }

    #[test]
    fn test_protect_ceiling_bound() {
        let (mut sched, mut table) = setup(&[4, 6]);
        let m = table
            .create(MutexAttributes::protect(MutexType::Normal, 5))
            .unwrap();
        assert_eq!(table.lock(&mut sched, T1, m), Err(Error::InvalidArgument));
        assert!(!table.get(m).unwrap().is_locked());
        assert_eq!(table.lock(&mut sched, T0, m), Ok(LockOutcome::Acquired));
    }

    #[test]
    fn test_blocked_thread_cannot_lock_again() {
        let (mut sched, mut table) = setup(&[1, 2]);
        let a = table.create(MutexAttributes::default()).unwrap();
        let b = table.create(MutexAttributes::default()).unwrap();
        table.lock(&mut sched, T0, a).unwrap();
        table.lock(&mut sched, T0, b).unwrap();
        table.lock(&mut sched, T1, a).unwrap();
        assert_eq!(table.lock(&mut sched, T1, b), Err(Error::InvalidState));
        assert!(table.get(b).unwrap().waiters().is_empty());
    }

    #[test]
    fn test_recursive_count_overflow() {
        let (mut sched, mut table) = setup(&[1]);
        let m = table
            .create(MutexAttributes::new(MutexType::Recursive, Protocol::None))
            .unwrap();
        table.lock(&mut sched, T0, m).unwrap();
        table.get_mut(m).unwrap().lock_count = u32::MAX;

        assert_eq!(table.lock(&mut sched, T0, m), Err(Error::ResourceUnavailable));
        assert_eq!(table.get(m).unwrap().lock_count(), u32::MAX);
        assert_eq!(table.get(m).unwrap().owner(), Some(T0));
        assert!(table.get(m).unwrap().waiters().is_empty());
    }

    #[test]
    fn test_free_lock_with_full_owned_list() {
        let (mut sched, mut table) = setup(&[1]);
        for _ in 0..MAX_OWNED_MUTEXES {
            let held = table.create(MutexAttributes::default()).unwrap();
            table.lock(&mut sched, T0, held).unwrap();
        }
        let m = table.create(MutexAttributes::default()).unwrap();

        assert_eq!(table.lock(&mut sched, T0, m), Err(Error::ResourceUnavailable));
        assert_eq!(table.get(m).unwrap().owner(), None);
        assert_eq!(table.get(m).unwrap().lock_count(), 0);
        assert_eq!(sched.thread(T0).unwrap().owned_mutexes().len(), MAX_OWNED_MUTEXES);
    }

    #[test]
    fn test_waiter_with_full_owned_list_is_refused() {
        let (mut sched, mut table) = setup(&[1, 5]);
        let m = table.create(MutexAttributes::inheritance(MutexType::Normal)).unwrap();
        table.lock(&mut sched, T0, m).unwrap();
        for _ in 0..MAX_OWNED_MUTEXES {
            let held = table.create(MutexAttributes::default()).unwrap();
            table.lock(&mut sched, T1, held).unwrap();
        }

        assert_eq!(table.lock(&mut sched, T1, m), Err(Error::ResourceUnavailable));
        assert!(table.get(m).unwrap().waiters().is_empty());
        assert_eq!(sched.thread(T1).unwrap().blocked_on(), None);
        assert_eq!(sched.thread(T1).unwrap().state(), ThreadState::Ready);
        assert_eq!(sched.effective_priority(T0), Ok(1));

        // The owner can always release
        assert_eq!(table.unlock(&mut sched, T0, m), Ok(None));
        assert!(!table.get(m).unwrap().is_locked());
    }

    #[test]
    fn test_unknown_ids() {
        let (mut sched, mut table) = setup(&[1]);
        assert_eq!(
            table.lock(&mut sched, T0, MutexId(3)),
            Err(Error::InvalidArgument)
        );
        let m = table.create(MutexAttributes::default()).unwrap();
        assert_eq!(table.lock(&mut sched, T4, m), Err(Error::InvalidArgument));
    }
}
