//! Synchronization events
//!
//! An event is an auto-reset latch with a FIFO of waiting tasks. The
//! waiting sequence owns the tasks; a deadline-ordered index refers back
//! into it by task id so timed waits can be expired without scanning
//! every waiter on every tick.

use crate::context::Context;
use crate::task::Task;
use fiber_types::{Instant, TaskId};
use std::collections::{BTreeMap, VecDeque};

/// One parked task and its deadline, `None` meaning "wait forever"
pub(crate) struct Waiter {
    pub(crate) task: Box<Task>,
    pub(crate) deadline: Option<Instant>,
}

/// A named synchronization object tasks can wait on
///
/// Invariant: every id stored in `timed` names exactly one entry of
/// `waiting`; `waiting` is the source of truth.
pub(crate) struct EventObject {
    /// Latched signal, consumed by the next wait
    pub(crate) signaled: bool,
    /// Waiting tasks in arrival order
    pub(crate) waiting: VecDeque<Waiter>,
    /// Waiters with finite deadlines, bucketed by deadline
    timed: BTreeMap<Instant, Vec<TaskId>>,
}

impl EventObject {
    pub(crate) fn new() -> Self {
        Self {
            signaled: false,
            waiting: VecDeque::new(),
            timed: BTreeMap::new(),
        }
    }

    /// Parks a task at the tail of the waiting sequence and returns a
    /// pointer to its saved context for the upcoming switch.
    pub(crate) fn park(&mut self, task: Box<Task>, deadline: Option<Instant>) -> *mut Context {
        let id = task.id;
        self.waiting.push_back(Waiter { task, deadline });
        if let Some(deadline) = deadline {
            self.timed.entry(deadline).or_default().push(id);
        }
        self.waiting
            .back_mut()
            .expect("waiter was just pushed")
            .task
            .ctx_ptr()
    }

    /// Removes and returns the head of the waiting sequence, dropping its
    /// timed-index entry if it had one.
    pub(crate) fn release_front(&mut self) -> Option<Box<Task>> {
        let waiter = self.waiting.pop_front()?;
        if let Some(deadline) = waiter.deadline {
            self.remove_timed(deadline, waiter.task.id);
        }
        Some(waiter.task)
    }

    /// Removes every waiter whose deadline has passed, in deadline order
    /// then arrival order, and returns them.
    pub(crate) fn take_expired(&mut self, now: Instant) -> Vec<Box<Task>> {
        let mut expired = Vec::new();
        while self
            .timed
            .first_key_value()
            .is_some_and(|(deadline, _)| *deadline <= now)
        {
            let Some((_, ids)) = self.timed.pop_first() else {
                break;
            };
            for id in ids {
                if let Some(pos) = self.waiting.iter().position(|w| w.task.id == id) {
                    if let Some(waiter) = self.waiting.remove(pos) {
                        expired.push(waiter.task);
                    }
                }
            }
        }
        expired
    }

    /// Number of tasks currently waiting
    pub(crate) fn waiting_count(&self) -> usize {
        self.waiting.len()
    }

    /// Number of waiters tracked in the timed index
    pub(crate) fn timed_count(&self) -> usize {
        self.timed.values().map(Vec::len).sum()
    }

    fn remove_timed(&mut self, deadline: Instant, id: TaskId) {
        if let Some(bucket) = self.timed.get_mut(&deadline) {
            bucket.retain(|entry| *entry != id);
            if bucket.is_empty() {
                self.timed.remove(&deadline);
            }
        }
    }
}
