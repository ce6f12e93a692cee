//! Synchronization primitives
//!
//! This module provides the kernel mutex and the priority-inheritance
//! engine that couples mutex ownership to thread priorities.

pub mod inherit;
pub mod mutex;

pub use mutex::{MutexControlBlock, MutexTable};

use crate::core::sched::Priority;
use crate::{Error, Result};

/// Mutex ID, an index into the mutex table
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct MutexId(pub(crate) u16);

impl MutexId {
    /// Position of the mutex in the mutex table
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// Behaviour on relock by the owner and on unlock by a non-owner
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MutexType {
    /// Relock by the owner blocks the owner forever
    Normal,
    /// Relock by the owner fails with `Deadlock`
    ErrorChecking,
    /// Relock by the owner nests; each lock needs its own unlock
    Recursive,
}

/// Priority protocol of a mutex
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Protocol {
    /// Blocking never changes priorities
    None,
    /// The owner inherits the priority of its highest waiter
    PriorityInheritance,
    /// Priority ceiling; only the ceiling bound is enforced
    PriorityProtect,
}

/// Construction parameters of a mutex
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MutexAttributes {
    /// Mutex type
    pub kind: MutexType,
    /// Priority protocol
    pub protocol: Protocol,
    /// Priority ceiling, only meaningful for `PriorityProtect`
    pub ceiling: Option<Priority>,
}

impl MutexAttributes {
    /// Attributes for a mutex without a ceiling
    pub const fn new(kind: MutexType, protocol: Protocol) -> Self {
        Self {
            kind,
            protocol,
            ceiling: None,
        }
    }

    /// Attributes for a priority-protect mutex
    pub const fn protect(kind: MutexType, ceiling: Priority) -> Self {
        Self {
            kind,
            protocol: Protocol::PriorityProtect,
            ceiling: Some(ceiling),
        }
    }

    /// Attributes for a priority-inheritance mutex
    pub const fn inheritance(kind: MutexType) -> Self {
        Self::new(kind, Protocol::PriorityInheritance)
    }

    /// Reject protocol/ceiling pairings the mutex cannot honour
    pub fn validate(&self) -> Result<()> {
        match (self.protocol, self.ceiling) {
            (Protocol::PriorityProtect, Some(_)) => Ok(()),
            (Protocol::PriorityProtect, None) => Err(Error::InvalidArgument),
            (_, Some(_)) => Err(Error::InvalidArgument),
            (_, None) => Ok(()),
        }
    }
}

impl Default for MutexAttributes {
    fn default() -> Self {
        Self::new(MutexType::Normal, Protocol::None)
    }
}

/// Result of a lock request that did not fail
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockOutcome {
    /// The caller holds the mutex
    Acquired,
    /// The caller was queued and is now blocked
    Blocked,
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    #[test_case(MutexAttributes::default() ; "normal without protocol")]
    #[test_case(MutexAttributes::inheritance(MutexType::Recursive) ; "recursive inheritance")]
    #[test_case(MutexAttributes::protect(MutexType::ErrorChecking, 5) ; "protect with ceiling")]
    fn test_valid_attributes(attrs: MutexAttributes) {
        assert_eq!(attrs.validate(), Ok(()));
    }

    #[test_case(MutexAttributes { kind: MutexType::Normal, protocol: Protocol::PriorityProtect, ceiling: None } ; "protect without ceiling")]
    #[test_case(MutexAttributes { kind: MutexType::Normal, protocol: Protocol::None, ceiling: Some(3) } ; "ceiling without protect")]
    #[test_case(MutexAttributes { kind: MutexType::Recursive, protocol: Protocol::PriorityInheritance, ceiling: Some(3) } ; "ceiling with inheritance")]
    fn test_invalid_attributes(attrs: MutexAttributes) {
        assert_eq!(attrs.validate(), Err(Error::InvalidArgument));
    }
}
