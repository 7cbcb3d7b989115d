//! Deferred message queue
//!
//! Requests that cannot run yet wait here instead of blocking. Each entry carries an
//! eligibility condition:
//!
//! * unconditional - eligible at once
//! * conditional - eligible only while the session lock is clear
//! * delayed - eligible once the queue clock reaches its due time
//!
//! [`MessageQueue::pop_eligible`] returns the oldest eligible entry, so entries are
//! delivered in FIFO order among those that can run. Blocked conditional entries do not
//! hold up unconditional ones queued behind them.

use heapless::Vec;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Condition {
    Always,
    LockClear,
    NotBefore(u32),
}

#[derive(Debug)]
struct Entry<M> {
    message: M,
    condition: Condition,
}

/// Queue is at capacity
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueFull;

/// Bounded FIFO of deferred messages
#[derive(Debug)]
pub struct MessageQueue<M, const N: usize> {
    entries: Vec<Entry<M>, N>,
    now_ms: u32,
}

impl<M, const N: usize> Default for MessageQueue<M, N> {
    fn default() -> Self {
        Self::new()
    }
}

impl<M, const N: usize> MessageQueue<M, N> {
    /// Create an empty queue with its clock at zero
    #[must_use]
    pub const fn new() -> Self {
        Self {
            entries: Vec::new(),
            now_ms: 0,
        }
    }

    fn push_entry(&mut self, message: M, condition: Condition) -> Result<(), QueueFull> {
        self.entries
            .push(Entry { message, condition })
            .map_err(|_| QueueFull)
    }

    /// Queue a message eligible immediately
    ///
    /// # Errors
    ///
    /// Returns [`QueueFull`] if the queue is at capacity.
    pub fn push(&mut self, message: M) -> Result<(), QueueFull> {
        self.push_entry(message, Condition::Always)
    }

    /// Queue a message eligible only while the lock is clear
    ///
    /// # Errors
    ///
    /// Returns [`QueueFull`] if the queue is at capacity.
    pub fn push_conditional(&mut self, message: M) -> Result<(), QueueFull> {
        self.push_entry(message, Condition::LockClear)
    }

    /// Queue a message eligible after `delay_ms`
    ///
    /// # Errors
    ///
    /// Returns [`QueueFull`] if the queue is at capacity.
    pub fn push_later(&mut self, message: M, delay_ms: u32) -> Result<(), QueueFull> {
        let due = self.now_ms.saturating_add(delay_ms);
        self.push_entry(message, Condition::NotBefore(due))
    }

    /// Advance the queue clock
    pub fn advance(&mut self, elapsed_ms: u32) {
        self.now_ms = self.now_ms.saturating_add(elapsed_ms);
    }

    /// Remove and return the oldest entry that may run under `lock`
    pub fn pop_eligible(&mut self, lock: u16) -> Option<M> {
        let now = self.now_ms;
        let index = self.entries.iter().position(|entry| match entry.condition {
            Condition::Always => true,
            Condition::LockClear => lock == 0,
            Condition::NotBefore(due) => now >= due,
        })?;
        Some(self.entries.remove(index).message)
    }

    /// Remove and return the oldest entry matching `predicate`
    pub fn cancel_first(&mut self, predicate: impl Fn(&M) -> bool) -> Option<M> {
        let index = self
            .entries
            .iter()
            .position(|entry| predicate(&entry.message))?;
        Some(self.entries.remove(index).message)
    }

    /// Whether any entry matches `predicate`
    pub fn contains(&self, predicate: impl Fn(&M) -> bool) -> bool {
        self.entries.iter().any(|entry| predicate(&entry.message))
    }

    /// Number of queued entries
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the queue is empty
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
