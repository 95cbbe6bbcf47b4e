//! Scoped tasks that may borrow from the spawning stack frame.

use std::{
    fmt,
    marker::PhantomData,
    panic::{self, AssertUnwindSafe},
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
};

use parking_lot::Mutex;
use tracing::error;

use crate::{
    TaskId, TaskManager, TaskResult, Timeout,
    manager::{TaskFn, panic_message},
    queue::TaskQueueFlags,
};

/// A scope for creating tasks that borrow non-`'static` data.
///
/// Created by [`TaskManager::scope`]. Every task created through the scope has
/// completed by the time `scope` returns.
pub struct TaskScope<'scope, 'env: 'scope> {
    manager: &'scope TaskManager,
    tasks: Mutex<Vec<TaskId>>,
    panicked: Arc<AtomicBool>,
    scope: PhantomData<&'scope mut &'scope ()>,
    env: PhantomData<&'env mut &'env ()>,
}

impl TaskManager {
    /// Create tasks that may borrow from the caller, and wait for all of them.
    ///
    /// Tasks created in the scope but never dispatched are dispatched to the
    /// normal queue when the closure returns.
    ///
    /// # Panics
    ///
    /// Re-raises a panic from `f`, and panics if any scoped task panicked.
    pub fn scope<'env, F, R>(&self, f: F) -> R
    where
        F: for<'scope> FnOnce(&'scope TaskScope<'scope, 'env>) -> R,
    {
        let scope = TaskScope {
            manager: self,
            tasks: Mutex::new(Vec::new()),
            panicked: Arc::new(AtomicBool::new(false)),
            scope: PhantomData,
            env: PhantomData,
        };

        let result = panic::catch_unwind(AssertUnwindSafe(|| f(&scope)));
        scope.finish();

        match result {
            Err(payload) => panic::resume_unwind(payload),
            Ok(value) => {
                assert!(
                    !scope.panicked.load(Ordering::Acquire),
                    "a scoped task panicked"
                );
                value
            }
        }
    }
}

impl<'scope> TaskScope<'scope, '_> {
    /// Create a task whose body may borrow anything that outlives the scope.
    ///
    /// # Panics
    ///
    /// Panics if every task slot is in flight.
    pub fn create_task<F>(&'scope self, name: &'static str, work: F) -> TaskId
    where
        F: FnOnce() + Send + 'scope,
    {
        let id = self.manager.create_boxed(name, Some(self.erase(name, work)));
        self.tasks.lock().push(id);
        id
    }

    /// Create a scoped task, reporting slot exhaustion as an error.
    pub fn try_create_task<F>(&'scope self, name: &'static str, work: F) -> TaskResult<TaskId>
    where
        F: FnOnce() + Send + 'scope,
    {
        let id = self
            .manager
            .try_create_boxed(name, Some(self.erase(name, work)))?;
        self.tasks.lock().push(id);
        Ok(id)
    }

    /// Create a body-less task owned by the scope.
    ///
    /// # Panics
    ///
    /// Panics if every task slot is in flight.
    pub fn create_join_task(&self, name: &'static str) -> TaskId {
        let id = self.manager.create_join_task(name);
        self.tasks.lock().push(id);
        id
    }

    pub fn add_dependency(&self, predecessor: TaskId, successor: TaskId) {
        self.manager.add_dependency(predecessor, successor);
    }

    pub fn dispatch(&self, task: TaskId, queues: TaskQueueFlags) {
        self.manager.dispatch(task, queues);
    }

    pub fn dispatch_all(&self, tasks: &[TaskId], queues: TaskQueueFlags) {
        self.manager.dispatch_all(tasks, queues);
    }

    #[must_use]
    pub const fn manager(&self) -> &'scope TaskManager {
        self.manager
    }

    fn erase<F>(&self, name: &'static str, work: F) -> TaskFn
    where
        F: FnOnce() + Send + 'scope,
    {
        let panicked = Arc::clone(&self.panicked);
        let guarded = move || {
            if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(work)) {
                error!(
                    task = name,
                    "scoped task panicked: {}",
                    panic_message(payload.as_ref())
                );
                panicked.store(true, Ordering::Release);
            }
        };
        let boxed: Box<dyn FnOnce() + Send + 'scope> = Box::new(guarded);

        // SAFETY: `TaskManager::scope` waits for every task created through
        // this scope before returning, so the body never runs, and is never
        // dropped, after 'scope ends.
        unsafe { std::mem::transmute::<Box<dyn FnOnce() + Send + 'scope>, TaskFn>(boxed) }
    }

    fn finish(&self) {
        let tasks = std::mem::take(&mut *self.tasks.lock());
        for &task in &tasks {
            self.manager.dispatch_if_pending(task);
        }
        for task in tasks {
            self.manager.wait_for_completion(task, Timeout::INFINITE);
        }
    }
}

impl fmt::Debug for TaskScope<'_, '_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskScope")
            .field("tasks", &self.tasks.lock().len())
            .field("panicked", &self.panicked.load(Ordering::Relaxed))
            .finish()
    }
}
