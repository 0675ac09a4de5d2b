//! The cooperative scheduler
//!
//! One scheduler multiplexes many tasks onto the thread that drives it.
//! The host calls [`Scheduler::tick`] in a loop; each tick wakes expired
//! sleepers and timed-out waiters, then runs at most one ready task until
//! it suspends or finishes. Tasks suspend through [`Scheduler::yield_now`],
//! [`Scheduler::sleep`], and [`Scheduler::wait_event`].
//!
//! ## Self-parking
//!
//! Every suspension path moves the running task out of the current slot
//! and into its destination (ready queue, sleep map, or an event's waiting
//! sequence) before switching to the host. The call site knows where the
//! task goes; the host only learns whether the task finished. When the
//! host gets control back with the "suspended" word, the current slot is
//! already empty.
//!
//! ## Ownership
//!
//! At any instant a live task is owned by exactly one of: the current
//! slot, the ready queue, the sleep map, or one event's waiting sequence.
//! The scheduler state sits behind `Rc<RefCell<..>>` so task bodies can
//! call back into it through cloned [`Scheduler`] handles; no borrow is
//! ever held across a context switch.

use crate::clock::{Clock, SystemClock};
use crate::context::{self, Context};
use crate::event::EventObject;
use crate::stack::{DEFAULT_STACK_SIZE, MIN_STACK_SIZE};
use crate::task::Task;
use fiber_types::{Duration, EventId, Instant, TaskId, Timeout};
use log::{debug, error, trace, warn};
use serde::{Deserialize, Serialize};
use std::cell::RefCell;
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::rc::Rc;
use thiserror::Error;

/// Word passed into a task: generic resume (spawn, yield, sleep done,
/// wait timed out)
pub(crate) const RESUME_GENERIC: usize = 0;
/// Word passed into a task: the awaited event was signaled
pub(crate) const RESUME_SIGNALED: usize = 1;
/// Word passed to the host: the task suspended after re-parking itself
pub(crate) const TASK_SUSPENDED: usize = 0;
/// Word passed to the host: the task finished and must be destroyed
pub(crate) const TASK_FINISHED: usize = 1;

/// Scheduler configuration
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Stack size in bytes for every spawned task
    pub stack_size: usize,
}

impl SchedulerConfig {
    /// Returns a copy with the given task stack size
    pub fn with_stack_size(mut self, stack_size: usize) -> Self {
        self.stack_size = stack_size;
        self
    }

    /// Checks the configuration for values the scheduler would reject
    pub fn validate(&self) -> Result<(), SchedulerError> {
        if self.stack_size < MIN_STACK_SIZE {
            return Err(SchedulerError::StackTooSmall {
                size: self.stack_size,
                min: MIN_STACK_SIZE,
            });
        }
        Ok(())
    }
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            stack_size: DEFAULT_STACK_SIZE,
        }
    }
}

/// Configuration errors
#[derive(Debug, Error, PartialEq, Eq)]
pub enum SchedulerError {
    /// The configured task stack is too small to run anything
    #[error("stack size {size} is below the minimum of {min} bytes")]
    StackTooSmall { size: usize, min: usize },
}

/// Why a task left the running state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ParkReason {
    /// Explicit yield back to the tail of the ready queue
    Yielded,
    /// Timed sleep
    Sleeping { until: Instant },
    /// Wait on an event, with an optional deadline
    Waiting {
        event: EventId,
        deadline: Option<Instant>,
    },
}

/// Why a parked task became ready again
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum WakeCause {
    /// Its sleep deadline passed
    SleepExpired,
    /// Its wait deadline passed without a signal
    WaitTimedOut,
    /// The event it waited on was set
    EventSignaled,
    /// The event it waited on was deleted
    EventDeleted,
}

/// How a task terminated
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TaskOutcome {
    /// The user function returned
    Completed,
    /// The user function panicked
    Panicked,
}

/// Scheduling event for the audit trail
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ScheduleEvent {
    /// A task was created and enqueued
    TaskSpawned { task_id: TaskId, at: Instant },
    /// A task was selected to run by a tick
    TaskSelected { task_id: TaskId, at: Instant },
    /// A running task parked itself
    TaskParked {
        task_id: TaskId,
        reason: ParkReason,
        at: Instant,
    },
    /// A parked task moved to the ready queue
    TaskReadied {
        task_id: TaskId,
        cause: WakeCause,
        at: Instant,
    },
    /// A task terminated and was destroyed
    TaskFinished {
        task_id: TaskId,
        outcome: TaskOutcome,
        at: Instant,
    },
    /// An event was created
    EventCreated { event_id: EventId, at: Instant },
    /// An event was deleted
    EventDeleted { event_id: EventId, at: Instant },
}

/// A ready task paired with the word to pass on its next resume
struct ReadyEntry {
    task: Box<Task>,
    resume: usize,
}

/// All scheduler state, owned by the handle's `Rc`
pub(crate) struct SchedulerState {
    /// Saved host context, valid while a task runs
    host: Context,
    /// The running task; empty whenever control is in the host context
    current: Option<Box<Task>>,
    /// Tasks eligible to run, in FIFO order
    ready: VecDeque<ReadyEntry>,
    /// Sleeping tasks bucketed by wake deadline
    sleeping: BTreeMap<Instant, Vec<Box<Task>>>,
    /// Live events by id
    events: HashMap<EventId, EventObject>,
    /// Next event handle to hand out
    next_event_handle: u64,
    clock: Box<dyn Clock>,
    config: SchedulerConfig,
    /// Audit trail of scheduling decisions (inspection and tests)
    audit: Vec<ScheduleEvent>,
    /// Host callback invoked after a task terminates by panic
    panic_hook: Option<Box<dyn FnMut(TaskId, &str)>>,
}

impl SchedulerState {
    pub(crate) fn host_context_ptr(&mut self) -> *mut Context {
        &mut self.host
    }

    /// Moves every sleeper whose deadline has passed to the ready queue.
    fn wake_sleepers(&mut self, now: Instant) {
        while self
            .sleeping
            .first_key_value()
            .is_some_and(|(deadline, _)| *deadline <= now)
        {
            let Some((_, tasks)) = self.sleeping.pop_first() else {
                break;
            };
            for task in tasks {
                trace!("{} woke from sleep", task.id);
                self.audit.push(ScheduleEvent::TaskReadied {
                    task_id: task.id,
                    cause: WakeCause::SleepExpired,
                    at: now,
                });
                self.ready.push_back(ReadyEntry {
                    task,
                    resume: RESUME_GENERIC,
                });
            }
        }
    }

    /// Moves every timed waiter whose deadline has passed to the ready
    /// queue with the "timed out" word.
    fn expire_timed_waits(&mut self, now: Instant) {
        for event in self.events.values_mut() {
            for task in event.take_expired(now) {
                trace!("{} timed out", task.id);
                self.audit.push(ScheduleEvent::TaskReadied {
                    task_id: task.id,
                    cause: WakeCause::WaitTimedOut,
                    at: now,
                });
                self.ready.push_back(ReadyEntry {
                    task,
                    resume: RESUME_GENERIC,
                });
            }
        }
    }
}

/// Handle to a cooperative scheduler
///
/// Cloning is cheap and every clone refers to the same scheduler; task
/// closures capture clones to call back into it. The handle is
/// single-threaded by construction and deliberately not `Send`.
///
/// Dropping the last handle while tasks are still suspended frees their
/// stacks without unwinding the frames on them.
#[derive(Clone)]
pub struct Scheduler {
    state: Rc<RefCell<SchedulerState>>,
}

impl Scheduler {
    /// Creates a scheduler with the default configuration and the OS
    /// monotonic clock
    pub fn new() -> Self {
        Self::with_config(SchedulerConfig::default())
    }

    /// Creates a scheduler with a custom configuration and the OS
    /// monotonic clock
    ///
    /// # Panics
    ///
    /// Panics if the configuration does not pass
    /// [`SchedulerConfig::validate`].
    pub fn with_config(config: SchedulerConfig) -> Self {
        Self::with_clock(config, Box::new(SystemClock::new()))
    }

    /// Creates a scheduler reading time from the given clock
    ///
    /// # Panics
    ///
    /// Panics if the configuration does not pass
    /// [`SchedulerConfig::validate`].
    pub fn with_clock(config: SchedulerConfig, clock: Box<dyn Clock>) -> Self {
        if let Err(e) = config.validate() {
            panic!("invalid scheduler configuration: {}", e);
        }
        Self {
            state: Rc::new(RefCell::new(SchedulerState {
                host: Context::default(),
                current: None,
                ready: VecDeque::new(),
                sleeping: BTreeMap::new(),
                events: HashMap::new(),
                next_event_handle: 1,
                clock,
                config,
                audit: Vec::new(),
                panic_hook: None,
            })),
        }
    }

    /// Creates a new task running `entry` and appends it to the tail of
    /// the ready queue. Callable from the host or from inside a task;
    /// never suspends the caller.
    pub fn spawn<F>(&self, entry: F) -> TaskId
    where
        F: FnOnce() + 'static,
    {
        let mut guard = self.state.borrow_mut();
        let s = &mut *guard;
        let task = Task::spawn(
            Box::new(entry),
            s.config.stack_size,
            Rc::downgrade(&self.state),
        );
        let task_id = task.id;
        let now = s.clock.now();
        debug!("{} spawned ({} byte stack)", task_id, task.stack_size());
        s.audit.push(ScheduleEvent::TaskSpawned { task_id, at: now });
        s.ready.push_back(ReadyEntry {
            task,
            resume: RESUME_GENERIC,
        });
        task_id
    }

    /// Creates a non-signaled event and returns its handle. Never
    /// suspends.
    pub fn create_event(&self) -> EventId {
        let mut guard = self.state.borrow_mut();
        let s = &mut *guard;
        let event_id = EventId::from_raw(s.next_event_handle);
        s.next_event_handle += 1;
        s.events.insert(event_id, EventObject::new());
        let now = s.clock.now();
        debug!("{} created", event_id);
        s.audit.push(ScheduleEvent::EventCreated { event_id, at: now });
        event_id
    }

    /// Waits for an event to be set.
    ///
    /// Returns `true` if the wait was fulfilled by a signal (or the event
    /// was deleted), `false` if it timed out. A latched event is consumed
    /// and the call returns `true` without suspending. A zero timeout
    /// polls: it never suspends and returns whether the latch was set.
    ///
    /// Called outside a task, or with an unknown event id, this returns
    /// `true` without doing anything.
    pub fn wait_event(&self, event_id: EventId, timeout: Timeout) -> bool {
        let (task_ctx, host_ctx) = {
            let mut guard = self.state.borrow_mut();
            let s = &mut *guard;
            if s.current.is_none() {
                return true;
            }
            let host_ctx = &mut s.host as *mut Context;
            let now = s.clock.now();
            let Some(event) = s.events.get_mut(&event_id) else {
                return true;
            };
            if event.signaled {
                event.signaled = false;
                return true;
            }
            if timeout.is_zero() {
                return false;
            }
            let deadline = timeout.deadline_after(now);
            let task = s.current.take().expect("running task checked above");
            let task_id = task.id;
            trace!("{} waiting on {} (deadline {:?})", task_id, event_id, deadline);
            s.audit.push(ScheduleEvent::TaskParked {
                task_id,
                reason: ParkReason::Waiting {
                    event: event_id,
                    deadline,
                },
                at: now,
            });
            (event.park(task, deadline), host_ctx)
        };
        let word = unsafe { context::switch(task_ctx, host_ctx, TASK_SUSPENDED) };
        word == RESUME_SIGNALED
    }

    /// Sets an event.
    ///
    /// If tasks are waiting, releases the one that has waited longest with
    /// a "signaled" resume; the latch stays down. Otherwise raises the
    /// latch, which the next wait will consume. Exactly one task is
    /// released per call. Unknown ids are ignored. Never suspends.
    pub fn set_event(&self, event_id: EventId) {
        let mut guard = self.state.borrow_mut();
        let s = &mut *guard;
        let Some(event) = s.events.get_mut(&event_id) else {
            return;
        };
        match event.release_front() {
            Some(task) => {
                let now = s.clock.now();
                trace!("{} released {}", event_id, task.id);
                s.audit.push(ScheduleEvent::TaskReadied {
                    task_id: task.id,
                    cause: WakeCause::EventSignaled,
                    at: now,
                });
                s.ready.push_back(ReadyEntry {
                    task,
                    resume: RESUME_SIGNALED,
                });
            }
            None => {
                trace!("{} latched", event_id);
                event.signaled = true;
            }
        }
    }

    /// Deletes an event, releasing every waiting task as if the event had
    /// been signaled, in arrival order. Unknown ids are ignored. Never
    /// suspends.
    pub fn delete_event(&self, event_id: EventId) {
        let mut guard = self.state.borrow_mut();
        let s = &mut *guard;
        let Some(event) = s.events.remove(&event_id) else {
            return;
        };
        let now = s.clock.now();
        let released = event.waiting.len();
        for waiter in event.waiting {
            let task_id = waiter.task.id;
            s.audit.push(ScheduleEvent::TaskReadied {
                task_id,
                cause: WakeCause::EventDeleted,
                at: now,
            });
            s.ready.push_back(ReadyEntry {
                task: waiter.task,
                resume: RESUME_SIGNALED,
            });
        }
        debug!("{} deleted, released {} waiters", event_id, released);
        s.audit.push(ScheduleEvent::EventDeleted { event_id, at: now });
    }

    /// Moves the current task to the tail of the ready queue and runs the
    /// next ready task. A no-op when called outside a task.
    pub fn yield_now(&self) {
        let (task_ctx, host_ctx) = {
            let mut guard = self.state.borrow_mut();
            let s = &mut *guard;
            let Some(task) = s.current.take() else {
                return;
            };
            let host_ctx = &mut s.host as *mut Context;
            let now = s.clock.now();
            trace!("{} yielded", task.id);
            s.audit.push(ScheduleEvent::TaskParked {
                task_id: task.id,
                reason: ParkReason::Yielded,
                at: now,
            });
            s.ready.push_back(ReadyEntry {
                task,
                resume: RESUME_GENERIC,
            });
            let task_ctx = s
                .ready
                .back_mut()
                .expect("task was just enqueued")
                .task
                .ctx_ptr();
            (task_ctx, host_ctx)
        };
        unsafe { context::switch(task_ctx, host_ctx, TASK_SUSPENDED) };
    }

    /// Puts the current task to sleep for at least `duration`. The bound
    /// is a floor, not a deadline: the task wakes on the first tick after
    /// it elapses. A zero duration is the same as [`Self::yield_now`]. A
    /// no-op when called outside a task.
    pub fn sleep(&self, duration: Duration) {
        if duration.is_zero() {
            return self.yield_now();
        }
        let (task_ctx, host_ctx) = {
            let mut guard = self.state.borrow_mut();
            let s = &mut *guard;
            let Some(task) = s.current.take() else {
                return;
            };
            let host_ctx = &mut s.host as *mut Context;
            let now = s.clock.now();
            let deadline = now + duration;
            trace!("{} sleeping until {:?}", task.id, deadline);
            s.audit.push(ScheduleEvent::TaskParked {
                task_id: task.id,
                reason: ParkReason::Sleeping { until: deadline },
                at: now,
            });
            let bucket = s.sleeping.entry(deadline).or_default();
            bucket.push(task);
            let task_ctx = bucket
                .last_mut()
                .expect("task was just enqueued")
                .ctx_ptr();
            (task_ctx, host_ctx)
        };
        unsafe { context::switch(task_ctx, host_ctx, TASK_SUSPENDED) };
    }

    /// Drives the scheduler one step: wakes expired sleepers, expires
    /// timed waits, then runs the head of the ready queue until it
    /// suspends or finishes.
    ///
    /// Returns the id of the task that ran, or `None` if nothing was
    /// ready. Time is read once, at the top, and reused for every wake
    /// decision in the same tick.
    ///
    /// Must only be called from the host context; a call from inside a
    /// task is refused without touching any state.
    pub fn tick(&self) -> Option<TaskId> {
        let (task_ctx, host_ctx, resume, task_id) = {
            let mut guard = self.state.borrow_mut();
            let s = &mut *guard;
            if s.current.is_some() {
                warn!("tick invoked from inside a task; refusing");
                return None;
            }
            let now = s.clock.now();
            s.wake_sleepers(now);
            s.expire_timed_waits(now);
            let entry = s.ready.pop_front()?;
            let task_id = entry.task.id;
            trace!("{} selected (resume word {})", task_id, entry.resume);
            s.audit.push(ScheduleEvent::TaskSelected {
                task_id,
                at: now,
            });
            s.current = Some(entry.task);
            let host_ctx = &mut s.host as *mut Context;
            let task_ctx = s
                .current
                .as_mut()
                .expect("task was just installed")
                .ctx_ptr();
            (task_ctx, host_ctx, entry.resume, task_id)
        };
        let word = unsafe { context::switch(host_ctx, task_ctx, resume) };
        if word == TASK_FINISHED {
            self.destroy_finished();
        }
        // Otherwise the task re-parked itself before switching; the
        // current slot is already empty.
        Some(task_id)
    }

    /// Installs a callback invoked from the host context whenever a task
    /// terminates by panicking. Replaces any previous hook.
    pub fn set_panic_hook<F>(&self, hook: F)
    where
        F: FnMut(TaskId, &str) + 'static,
    {
        self.state.borrow_mut().panic_hook = Some(Box::new(hook));
    }

    /// Current scheduler time
    pub fn now(&self) -> Instant {
        self.state.borrow().clock.now()
    }

    /// Number of tasks in the ready queue
    pub fn ready_count(&self) -> usize {
        self.state.borrow().ready.len()
    }

    /// Number of sleeping tasks
    pub fn sleeping_count(&self) -> usize {
        self.state.borrow().sleeping.values().map(Vec::len).sum()
    }

    /// Number of tasks waiting on an event; zero for unknown ids
    pub fn waiting_count(&self, event_id: EventId) -> usize {
        self.state
            .borrow()
            .events
            .get(&event_id)
            .map_or(0, EventObject::waiting_count)
    }

    /// Number of waiters an event tracks in its timed index; zero for
    /// unknown ids
    pub fn timed_wait_count(&self, event_id: EventId) -> usize {
        self.state
            .borrow()
            .events
            .get(&event_id)
            .map_or(0, EventObject::timed_count)
    }

    /// Whether an event with this id currently exists
    pub fn event_exists(&self, event_id: EventId) -> bool {
        self.state.borrow().events.contains_key(&event_id)
    }

    /// Total number of live tasks, wherever they are parked
    pub fn live_task_count(&self) -> usize {
        let s = self.state.borrow();
        s.ready.len()
            + usize::from(s.current.is_some())
            + s.sleeping.values().map(Vec::len).sum::<usize>()
            + s.events.values().map(EventObject::waiting_count).sum::<usize>()
    }

    /// Whether the scheduler has no live tasks at all
    pub fn is_idle(&self) -> bool {
        self.live_task_count() == 0
    }

    /// Snapshot of the audit trail
    pub fn audit_log(&self) -> Vec<ScheduleEvent> {
        self.state.borrow().audit.clone()
    }

    /// Clears the audit trail
    pub fn clear_audit_log(&self) {
        self.state.borrow_mut().audit.clear();
    }

    /// Destroys the task in the current slot after its final switch. Runs
    /// on the host stack; the task's own stack is freed here.
    fn destroy_finished(&self) {
        let (task, hook) = {
            let mut guard = self.state.borrow_mut();
            let s = &mut *guard;
            let Some(task) = s.current.take() else {
                return;
            };
            let now = s.clock.now();
            let outcome = if task.panic_message.is_some() {
                TaskOutcome::Panicked
            } else {
                TaskOutcome::Completed
            };
            s.audit.push(ScheduleEvent::TaskFinished {
                task_id: task.id,
                outcome,
                at: now,
            });
            let hook = if task.panic_message.is_some() {
                s.panic_hook.take()
            } else {
                None
            };
            (task, hook)
        };
        if let Some(message) = &task.panic_message {
            error!("{} terminated by panic: {}", task.id, message);
            if let Some(mut hook) = hook {
                hook(task.id, message);
                // Put the hook back unless the callback installed a new one.
                let mut guard = self.state.borrow_mut();
                if guard.panic_hook.is_none() {
                    guard.panic_hook = Some(hook);
                }
            }
        } else {
            debug!("{} finished", task.id);
        }
        // Dropping the task here frees its stack, on the host stack.
    }
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new()
    }
}
