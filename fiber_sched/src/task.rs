//! Task handles
//!
//! A task pairs a user function with an owned stack and the saved context
//! of its most recent suspension. Tasks live behind `Box` from the moment
//! a context is bound to their stack: the trampoline keeps a raw pointer
//! to the task, so the task must never move again.

use crate::context::{self, Context};
use crate::scheduler::{SchedulerState, TASK_FINISHED};
use crate::stack::TaskStack;
use fiber_types::TaskId;
use std::any::Any;
use std::cell::RefCell;
use std::panic::{self, AssertUnwindSafe};
use std::rc::Weak;

/// A user function run by a task
pub(crate) type TaskFn = Box<dyn FnOnce()>;

/// One logical thread of execution with its own stack
pub(crate) struct Task {
    pub(crate) id: TaskId,
    /// Taken exactly once, by the trampoline
    entry: Option<TaskFn>,
    stack: TaskStack,
    /// Register state at the most recent suspension
    pub(crate) ctx: Context,
    /// Back-reference for the trampoline's final switch to the host
    sched: Weak<RefCell<SchedulerState>>,
    /// Set when the user function terminated by panicking
    pub(crate) panic_message: Option<String>,
}

impl Task {
    /// Creates a task with a bound context, ready for its first switch.
    pub(crate) fn spawn(
        entry: TaskFn,
        stack_size: usize,
        sched: Weak<RefCell<SchedulerState>>,
    ) -> Box<Task> {
        let mut task = Box::new(Task {
            id: TaskId::new(),
            entry: Some(entry),
            stack: TaskStack::new(stack_size),
            ctx: Context::default(),
            sched,
            panic_message: None,
        });
        let data = &mut *task as *mut Task as *mut ();
        task.ctx = unsafe { context::prepare(task.stack.top(), task_main, data) };
        task
    }

    /// Pointer to the saved context, valid as long as the boxed task is.
    pub(crate) fn ctx_ptr(&mut self) -> *mut Context {
        &mut self.ctx
    }

    /// Stack size actually allocated for this task
    pub(crate) fn stack_size(&self) -> usize {
        self.stack.size()
    }
}

/// Entry point of every task context.
///
/// Runs the user function with panics contained, then hands control back
/// to the host for destruction. The final switch must happen from here,
/// on the task stack: the host frees that stack only after the switch has
/// left it.
unsafe extern "C" fn task_main(data: *mut (), _first_resume: usize) -> ! {
    let task = unsafe { &mut *(data.cast::<Task>()) };
    if let Some(entry) = task.entry.take() {
        if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(entry)) {
            task.panic_message = Some(panic_message(payload.as_ref()));
        }
    }

    let state = task
        .sched
        .upgrade()
        .expect("scheduler state dropped while one of its tasks was running");
    let host_ctx = state.borrow_mut().host_context_ptr();
    // Keep only raw pointers across the switch; the host's own handle
    // keeps the state alive for as long as this task can run.
    drop(state);

    unsafe { context::switch(&mut task.ctx, host_ctx, TASK_FINISHED) };
    unreachable!("finished task was switched into again");
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stack::DEFAULT_STACK_SIZE;

    #[test]
    fn test_tasks_get_distinct_ids() {
        let a = Task::spawn(Box::new(|| {}), DEFAULT_STACK_SIZE, Weak::new());
        let b = Task::spawn(Box::new(|| {}), DEFAULT_STACK_SIZE, Weak::new());
        assert_ne!(a.id, b.id);
    }

    #[test]
    fn test_requested_stack_size_is_allocated() {
        let task = Task::spawn(Box::new(|| {}), 32 * 1024, Weak::new());
        assert_eq!(task.stack_size(), 32 * 1024);
    }

    #[test]
    fn test_unstarted_task_drops_cleanly() {
        let captured = std::rc::Rc::new(());
        let handle = captured.clone();
        let task = Task::spawn(Box::new(move || drop(handle)), DEFAULT_STACK_SIZE, Weak::new());
        drop(task);
        // The closure was never run, but its captures were released.
        assert_eq!(std::rc::Rc::strong_count(&captured), 1);
    }
}
