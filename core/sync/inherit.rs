//! Priority inheritance
//!
//! Keeps every owner of a priority-inheritance mutex at or above the
//! effective priority of each thread waiting for it, directly or through
//! a chain of owners that are themselves blocked. Both walks are bounded
//! by [`MAX_CHAIN_DEPTH`]; a walk that does not end within the bound has
//! looped and is reported as `Deadlock`.

use crate::config::{TraceFlags, MAX_CHAIN_DEPTH};
use crate::core::sched::{Priority, Scheduler, ThreadId};
use crate::core::sync::MutexTable;
use crate::{Error, Result};

/// Check that `blocker` waiting for a mutex owned by `owner` closes no cycle
///
/// Walks thread -> blocked-on mutex -> owner without changing anything,
/// so a failed lock leaves the ownership graph untouched.
pub fn check_wait_cycle(
    mutexes: &MutexTable,
    sched: &Scheduler,
    blocker: ThreadId,
    owner: ThreadId,
) -> Result<()> {
    let mut link = owner;
    for _ in 0..MAX_CHAIN_DEPTH {
        if link == blocker {
            return Err(Error::Deadlock);
        }
        let Some(mutex) = sched.thread(link)?.blocked_on() else {
            return Ok(());
        };
        match mutexes.get(mutex)?.owner() {
            Some(next) => link = next,
            None => return Ok(()),
        }
    }
    Err(Error::Deadlock)
}

/// Lend the effective priority of `blocker` up the chain starting at `owner`
///
/// Stops at the first owner that already runs at or above the lent
/// priority, at an owner that is not blocked, or at a mutex that does not
/// inherit.
pub fn raise(
    mutexes: &mut MutexTable,
    sched: &mut Scheduler,
    blocker: ThreadId,
    owner: ThreadId,
) -> Result<()> {
    let (mut blocker, mut owner) = (blocker, owner);
    for _ in 0..MAX_CHAIN_DEPTH {
        let demand = sched.effective_priority(blocker)?;
        let current = sched.effective_priority(owner)?;
        if current >= demand {
            return Ok(());
        }
        if mutexes.trace().contains(TraceFlags::INHERIT) {
            log::debug!("Boosting thread {:?} {} -> {} for {:?}", owner, current, demand, blocker);
        }
        apply(mutexes, sched, owner, demand)?;

        let Some(mutex) = sched.thread(owner)?.blocked_on() else {
            return Ok(());
        };
        let mutex = mutexes.get(mutex)?;
        if !mutex.inherits() {
            return Ok(());
        }
        match mutex.owner() {
            Some(next) => (blocker, owner) = (owner, next),
            None => return Ok(()),
        }
    }
    log::warn!("Priority chain above thread {:?} does not terminate", blocker);
    Err(Error::Deadlock)
}

/// Recompute the effective priority of `thread` from what it still holds
///
/// The change, up or down, is carried to the owner of the mutex `thread`
/// is blocked on, and so on until a link's priority is already right.
pub fn restore(mutexes: &mut MutexTable, sched: &mut Scheduler, thread: ThreadId) -> Result<()> {
    let mut link = thread;
    for _ in 0..MAX_CHAIN_DEPTH {
        let target = inherited_priority(mutexes, sched, link)?;
        let current = sched.effective_priority(link)?;
        if target == current {
            return Ok(());
        }
        if mutexes.trace().contains(TraceFlags::INHERIT) {
            log::debug!("Restoring thread {:?} {} -> {}", link, current, target);
        }
        apply(mutexes, sched, link, target)?;

        let Some(mutex) = sched.thread(link)?.blocked_on() else {
            return Ok(());
        };
        let mutex = mutexes.get(mutex)?;
        if !mutex.inherits() {
            return Ok(());
        }
        match mutex.owner() {
            Some(next) => link = next,
            None => return Ok(()),
        }
    }
    log::warn!("Priority chain above thread {:?} does not terminate", thread);
    Err(Error::Deadlock)
}

/// Priority `thread` is entitled to: its base priority or the highest
/// waiter of any priority-inheritance mutex it owns, whichever is higher
pub fn inherited_priority(
    mutexes: &MutexTable,
    sched: &Scheduler,
    thread: ThreadId,
) -> Result<Priority> {
    let thread = sched.thread(thread)?;
    let mut priority = thread.base_priority();
    for &id in thread.owned_mutexes() {
        let mutex = mutexes.get(id)?;
        if !mutex.inherits() {
            continue;
        }
        if let Some(head) = mutex.waiters().highest_priority() {
            priority = priority.max(head);
        }
    }
    Ok(priority)
}

/// Set the effective priority and keep the wait queue the thread sits in
/// ordered
fn apply(
    mutexes: &mut MutexTable,
    sched: &mut Scheduler,
    thread: ThreadId,
    priority: Priority,
) -> Result<()> {
    sched.set_effective_priority(thread, priority)?;
    if let Some(mutex) = sched.thread(thread)?.blocked_on() {
        mutexes.get_mut(mutex)?.waiters_mut().reposition(thread, priority);
    }
    Ok(())
}
