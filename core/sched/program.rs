//! Scripted worker behaviour
//!
//! A worker thread runs a short list of mutex operations. Each step of
//! the dispatcher executes one operation; the outcome of every operation
//! is folded into a status accumulator that keeps the last failure.

use heapless::Vec;

use crate::config::MAX_PROGRAM_OPS;
use crate::core::sched::Priority;
use crate::core::sync::MutexId;
use crate::{Error, Result};

/// One operation of a worker program
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Op {
    /// Lock a mutex, blocking until it is granted
    Lock(MutexId),
    /// Unlock a mutex
    Unlock(MutexId),
    /// Change the thread's own base priority
    SetPriority(Priority),
}

/// Worker program: operations, program counter and status accumulator
#[derive(Debug, Clone)]
pub struct Program {
    ops: Vec<Op, MAX_PROGRAM_OPS>,
    pc: usize,
    status: Result<()>,
}

impl Program {
    /// Create an empty program
    pub fn new() -> Self {
        Self {
            ops: Vec::new(),
            pc: 0,
            status: Ok(()),
        }
    }

    /// Create a program from a list of operations
    pub fn from_ops(ops: &[Op]) -> Result<Self> {
        let mut program = Self::new();
        for &op in ops {
            program.push(op)?;
        }
        Ok(program)
    }

    /// Lock every mutex in order, then unlock them in the same order
    pub fn lock_then_unlock(mutexes: &[MutexId]) -> Result<Self> {
        let mut program = Self::new();
        for &mutex in mutexes {
            program.push(Op::Lock(mutex))?;
        }
        for &mutex in mutexes {
            program.push(Op::Unlock(mutex))?;
        }
        Ok(program)
    }

    /// Append an operation
    pub fn push(&mut self, op: Op) -> Result<()> {
        self.ops.push(op).map_err(|_| Error::ResourceUnavailable)
    }

    /// Operations of the program
    pub fn ops(&self) -> &[Op] {
        &self.ops
    }

    /// Check if every operation has been issued
    pub fn is_finished(&self) -> bool {
        self.pc >= self.ops.len()
    }

    /// Combined status of every operation issued so far
    pub fn status(&self) -> Result<()> {
        self.status
    }

    /// Take the next operation and advance the program counter
    pub(crate) fn next_op(&mut self) -> Option<Op> {
        let op = self.ops.get(self.pc).copied()?;
        self.pc += 1;
        Some(op)
    }

    /// Fold the outcome of an operation into the status
    pub(crate) fn record(&mut self, outcome: Result<()>) {
        if outcome.is_err() {
            self.status = outcome;
        }
    }
}

impl Default for Program {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lock_then_unlock_order() {
        let program = Program::lock_then_unlock(&[MutexId(2), MutexId(5)]).unwrap();
        assert_eq!(
            program.ops(),
            &[
                Op::Lock(MutexId(2)),
                Op::Lock(MutexId(5)),
                Op::Unlock(MutexId(2)),
                Op::Unlock(MutexId(5)),
            ]
        );
    }

    #[test]
    fn test_next_op_runs_to_completion() {
        let mut program = Program::from_ops(&[Op::SetPriority(3), Op::Lock(MutexId(0))]).unwrap();
        assert_eq!(program.next_op(), Some(Op::SetPriority(3)));
        assert!(!program.is_finished());
        assert_eq!(program.next_op(), Some(Op::Lock(MutexId(0))));
        assert!(program.is_finished());
        assert_eq!(program.next_op(), None);
    }

    #[test]
    fn test_status_keeps_last_failure() {
        let mut program = Program::new();
        program.record(Ok(()));
        assert_eq!(program.status(), Ok(()));
        program.record(Err(Error::NotOwner));
        program.record(Ok(()));
        assert_eq!(program.status(), Err(Error::NotOwner));
        program.record(Err(Error::Deadlock));
        assert_eq!(program.status(), Err(Error::Deadlock));
    }

    #[test]
    fn test_capacity() {
        let ops = [Op::SetPriority(1); MAX_PROGRAM_OPS + 1];
        assert!(matches!(
            Program::from_ops(&ops),
            Err(Error::ResourceUnavailable)
        ));
    }
}
