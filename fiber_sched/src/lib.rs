//! # Fiber Scheduler
//!
//! A single-threaded cooperative scheduler that multiplexes many logical
//! tasks onto one host thread using stackful fibers.
//!
//! ## Philosophy
//!
//! - **Cooperative, not preemptive**: a task runs until it yields, sleeps,
//!   waits, or finishes; a task that never suspends starves the rest
//! - **Explicit ticks**: the host drives the scheduler with repeated
//!   [`Scheduler::tick`] calls; nothing runs behind its back
//! - **Determinism first**: with an injected [`SimClock`], same inputs +
//!   same ticks => same schedule
//! - **Inspectable**: queue depths and a structured audit trail are
//!   directly accessible, so tests assert on behavior instead of timing
//!
//! ## Example
//!
//! ```
//! use fiber_sched::Scheduler;
//! use fiber_types::Duration;
//!
//! let sched = Scheduler::new();
//! let worker = sched.clone();
//! sched.spawn(move || {
//!     worker.yield_now();
//!     worker.sleep(Duration::from_millis(5));
//! });
//! while !sched.is_idle() {
//!     sched.tick();
//! }
//! ```
//!
//! ## Non-Goals
//!
//! This is NOT:
//! - A thread pool: everything runs on the thread that ticks
//! - A real-time system: sleeps and timeouts are lower bounds
//! - An I/O reactor: waits are released by [`Scheduler::set_event`], not
//!   by file descriptors

mod context;
mod event;
mod stack;
mod task;

pub mod clock;
pub mod scheduler;

pub use clock::{Clock, SimClock, SystemClock};
pub use scheduler::{
    ParkReason, ScheduleEvent, Scheduler, SchedulerConfig, SchedulerError, TaskOutcome, WakeCause,
};
pub use stack::{DEFAULT_STACK_SIZE, MIN_STACK_SIZE};

pub use fiber_types::{Duration, EventId, Instant, TaskId, Timeout};
