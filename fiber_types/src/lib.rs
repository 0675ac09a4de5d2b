//! # Fiber Types
//!
//! Shared vocabulary types for the fiber scheduler.
//!
//! ## Philosophy
//!
//! - **Identity is explicit**: tasks and events are named by opaque ids,
//!   never by position or pointer
//! - **Time is virtual-friendly**: instants and durations are plain
//!   millisecond counts so simulated clocks are first-class
//! - **Sentinels are types, not magic values**: "wait forever" is an enum
//!   variant, not `-1`

pub mod ids;
pub mod time;

pub use ids::{EventId, TaskId};
pub use time::{Duration, Instant, Timeout};
