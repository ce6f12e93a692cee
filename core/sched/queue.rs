//! Priority-ordered thread queue
//!
//! Shared by the ready queue and every mutex wait queue. Entries are kept
//! in descending priority; entries of equal priority stay in arrival
//! order, so the head is always the highest-priority, longest-waiting
//! thread.

use heapless::Vec;

use crate::core::sched::{Priority, ThreadId};
use crate::{Error, Result};

/// Queue entry: a thread and the priority it is ordered by
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueEntry {
    /// Queued thread
    pub thread: ThreadId,
    /// Priority snapshot used for ordering
    pub priority: Priority,
}

/// Stable priority queue with a fixed capacity of `N` threads
#[derive(Debug)]
pub struct PriorityQueue<const N: usize> {
    entries: Vec<QueueEntry, N>,
}

impl<const N: usize> PriorityQueue<N> {
    /// Create an empty queue
    pub const fn new() -> Self {
        Self { entries: Vec::new() }
    }

    /// Add a thread behind every queued thread of the same priority
    pub fn enqueue(&mut self, thread: ThreadId, priority: Priority) -> Result<()> {
        let pos = self
            .entries
            .iter()
            .position(|e| e.priority < priority)
            .unwrap_or(self.entries.len());
        self.insert_at(pos, thread, priority)
    }

    /// Add a thread ahead of every queued thread of the same priority
    pub fn enqueue_front(&mut self, thread: ThreadId, priority: Priority) -> Result<()> {
        let pos = self
            .entries
            .iter()
            .position(|e| e.priority <= priority)
            .unwrap_or(self.entries.len());
        self.insert_at(pos, thread, priority)
    }

    fn insert_at(&mut self, pos: usize, thread: ThreadId, priority: Priority) -> Result<()> {
        debug_assert!(!self.contains(thread));
        self.entries
            .insert(pos, QueueEntry { thread, priority })
            .map_err(|_| Error::ResourceUnavailable)
    }

    /// Remove a thread from the queue
    pub fn dequeue(&mut self, thread: ThreadId) -> bool {
        match self.entries.iter().position(|e| e.thread == thread) {
            Some(pos) => {
                self.entries.remove(pos);
                true
            }
            None => false,
        }
    }

    /// Move a queued thread to the tail of its new priority level
    ///
    /// Returns `false` if the thread is not queued.
    pub fn reposition(&mut self, thread: ThreadId, priority: Priority) -> bool {
        if !self.dequeue(thread) {
            return false;
        }
        // Removing one entry freed a slot, the insert cannot fail
        self.enqueue(thread, priority).is_ok()
    }

    /// Get the highest priority entry
    pub fn peek(&self) -> Option<QueueEntry> {
        self.entries.first().copied()
    }

    /// Remove and return the highest priority entry
    pub fn dequeue_highest(&mut self) -> Option<QueueEntry> {
        if self.entries.is_empty() {
            None
        } else {
            Some(self.entries.remove(0))
        }
    }

    /// Priority of the head entry
    pub fn highest_priority(&self) -> Option<Priority> {
        self.peek().map(|e| e.priority)
    }

    /// Check if a thread is queued
    pub fn contains(&self, thread: ThreadId) -> bool {
        self.entries.iter().any(|e| e.thread == thread)
    }

    /// Queued entries, head first
    pub fn iter(&self) -> impl Iterator<Item = &QueueEntry> {
        self.entries.iter()
    }

    /// Get the length of the queue
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Check if the queue is empty
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl<const N: usize> Default for PriorityQueue<N> {
    fn default() -> Self {
        Self::new()
    }
}
