// Scoped tasks erase closure lifetimes behind the scope's completion wait
#![allow(unsafe_code)]

//! Keel task scheduler.
//!
//! A fixed pool of worker threads executes a dependency graph of one-shot
//! tasks. Waiting threads never idle while work is available: every wait
//! first runs runnable tasks itself.
//!
//! # Key Concepts
//!
//! - **Task**: an optional body plus the tasks that must complete before it.
//!   Created, wired with [`TaskManager::add_dependency`], then dispatched.
//! - **Queues**: `NORMAL`, `LONG` and `TIME_CRITICAL`. Workers are configured
//!   per queue set and always prefer time-critical work, then normal, then long.
//! - **Scope**: [`TaskManager::scope`] creates tasks that borrow the caller's
//!   stack and waits for all of them before returning.
//! - **Parallel-for**: [`TaskManager::parallel_for`] splits an index range
//!   across all threads.
//!
//! ```ignore
//! let tasks = TaskManager::new(TaskManagerConfig::default());
//! let a = tasks.create_task("load", || load());
//! let b = tasks.create_task("build", || build());
//! tasks.add_dependency(a, b);
//! tasks.dispatch_all(&[a, b], TaskQueueFlags::NORMAL);
//! tasks.wait_for_completion(b, Timeout::INFINITE);
//! ```

mod error;
mod event;
mod manager;
mod parallel_for;
mod queue;
mod scope;
mod timeout;

pub use error::{TaskError, TaskResult};
pub use event::Event;
pub use manager::{
    DEFAULT_MAX_IN_FLIGHT_TASKS, TaskFn, TaskId, TaskManager, TaskManagerConfig, WorkerGroup,
};
pub use queue::TaskQueueFlags;
pub use scope::TaskScope;
pub use timeout::{Timeout, TimeoutCounter};
