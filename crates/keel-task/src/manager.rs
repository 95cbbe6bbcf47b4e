//! The task manager: a fixed pool of worker threads executing a graph of
//! one-shot tasks.
//!
//! Tasks live in a fixed ring of slots. A task id encodes its slot, and a
//! task counts as complete as soon as its slot has been freed (or reused by a
//! newer task). Every wait assists: before sleeping, the waiting thread runs
//! whatever runnable task it can find.

use std::{
    any::Any,
    fmt,
    panic::{self, AssertUnwindSafe},
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    thread::{self, JoinHandle},
    time::Duration,
};

use parking_lot::{Condvar, Mutex};
use smallvec::SmallVec;
use tracing::{debug, error, trace_span, warn};

use crate::{
    Event, TaskError, TaskResult, Timeout,
    queue::{PRIORITY_ORDER, TaskQueueFlags},
};

/// Default number of task slots.
pub const DEFAULT_MAX_IN_FLIGHT_TASKS: usize = 100_000;

/// How often an event wait re-checks its event while sleeping.
const EVENT_POLL_INTERVAL: Duration = Duration::from_millis(1);

/// A boxed task body.
pub type TaskFn = Box<dyn FnOnce() + Send + 'static>;

/// Identifier of a task slot allocation.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TaskId(u64);

impl TaskId {
    #[must_use]
    pub const fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    #[must_use]
    pub const fn as_raw(self) -> u64 {
        self.0
    }
}

impl fmt::Debug for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TaskId({})", self.0)
    }
}

// ============================================================================
// Configuration
// ============================================================================

/// A set of worker threads that service the same queues.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct WorkerGroup {
    pub queues: TaskQueueFlags,
    pub threads: usize,
}

/// Task manager construction parameters.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TaskManagerConfig {
    /// Worker threads to spawn, grouped by the queues they service.
    pub worker_groups: Vec<WorkerGroup>,
    /// Capacity of the task slot ring.
    pub max_in_flight_tasks: usize,
}

impl Default for TaskManagerConfig {
    /// One long-running worker, and `available_parallelism - 1` workers for
    /// normal and time-critical work.
    fn default() -> Self {
        let parallelism = thread::available_parallelism().map_or(2, |n| n.get());
        Self {
            worker_groups: vec![
                WorkerGroup {
                    queues: TaskQueueFlags::NORMAL | TaskQueueFlags::TIME_CRITICAL,
                    threads: parallelism.saturating_sub(1).max(1),
                },
                WorkerGroup {
                    queues: TaskQueueFlags::LONG,
                    threads: 1,
                },
            ],
            max_in_flight_tasks: DEFAULT_MAX_IN_FLIGHT_TASKS,
        }
    }
}

impl TaskManagerConfig {
    /// A single group of `threads` workers servicing every queue.
    ///
    /// With zero threads, all work runs on threads that wait or assist.
    #[must_use]
    pub fn with_workers(threads: usize) -> Self {
        let worker_groups = if threads == 0 {
            Vec::new()
        } else {
            vec![WorkerGroup {
                queues: TaskQueueFlags::ALL,
                threads,
            }]
        };
        Self {
            worker_groups,
            max_in_flight_tasks: DEFAULT_MAX_IN_FLIGHT_TASKS,
        }
    }

    #[must_use]
    pub fn max_in_flight_tasks(mut self, capacity: usize) -> Self {
        self.max_in_flight_tasks = capacity.max(1);
        self
    }

    /// Total number of worker threads across all groups.
    #[must_use]
    pub fn worker_count(&self) -> usize {
        self.worker_groups.iter().map(|group| group.threads).sum()
    }
}

// ============================================================================
// Slots
// ============================================================================

struct Slot {
    id: u64,
    available: bool,
    dispatched: bool,
    executing: bool,
    name: &'static str,
    work: Option<TaskFn>,
    predecessors: SmallVec<[TaskId; 4]>,
}

impl Slot {
    fn vacant() -> Self {
        Self {
            id: 0,
            available: true,
            dispatched: false,
            executing: false,
            name: "",
            work: None,
            predecessors: SmallVec::new(),
        }
    }
}

/// A task taken off a queue, about to run on the claiming thread.
struct Claimed {
    id: TaskId,
    name: &'static str,
    work: Option<TaskFn>,
}

enum QueueEntry {
    Stale,
    Blocked,
    Ready,
}

/// All scheduling state, guarded by one mutex.
struct Scheduler {
    slots: Box<[Slot]>,
    next_id: u64,
    /// Pending task ids, indexed like `PRIORITY_ORDER`.
    queues: [Vec<TaskId>; PRIORITY_ORDER.len()],
    /// Dispatched tasks that have not completed.
    in_flight: usize,
}

impl Scheduler {
    fn new(capacity: usize) -> Self {
        Self {
            slots: (0..capacity).map(|_| Slot::vacant()).collect(),
            next_id: 1,
            queues: Default::default(),
            in_flight: 0,
        }
    }

    fn capacity(&self) -> usize {
        self.slots.len()
    }

    fn slot_index(&self, id: TaskId) -> usize {
        (id.0 % self.slots.len() as u64) as usize
    }

    fn live(&self, id: TaskId) -> Option<&Slot> {
        let slot = &self.slots[self.slot_index(id)];
        (!slot.available && slot.id == id.0).then_some(slot)
    }

    fn live_mut(&mut self, id: TaskId) -> Option<&mut Slot> {
        let index = self.slot_index(id);
        let slot = &mut self.slots[index];
        (!slot.available && slot.id == id.0).then_some(slot)
    }

    fn is_complete(&self, id: TaskId) -> bool {
        self.live(id).is_none()
    }

    fn allocate(&mut self, name: &'static str, work: Option<TaskFn>) -> TaskResult<TaskId> {
        let capacity = self.slots.len() as u64;
        for _ in 0..capacity {
            let raw = self.next_id;
            self.next_id += 1;
            let slot = &mut self.slots[(raw % capacity) as usize];
            if slot.available {
                *slot = Slot {
                    id: raw,
                    available: false,
                    dispatched: false,
                    executing: false,
                    name,
                    work,
                    predecessors: SmallVec::new(),
                };
                return Ok(TaskId(raw));
            }
        }
        Err(TaskError::SlotsExhausted {
            capacity: self.capacity(),
        })
    }

    fn add_dependency(&mut self, predecessor: TaskId, successor: TaskId) -> TaskResult<()> {
        let pred = self
            .live(predecessor)
            .ok_or(TaskError::UnknownTask(predecessor))?;
        if pred.executing {
            return Err(TaskError::AlreadyExecuting(predecessor));
        }
        if pred.dispatched {
            return Err(TaskError::AlreadyDispatched(predecessor));
        }

        let succ = self
            .live_mut(successor)
            .ok_or(TaskError::UnknownTask(successor))?;
        if succ.executing {
            return Err(TaskError::AlreadyExecuting(successor));
        }
        if succ.dispatched {
            return Err(TaskError::AlreadyDispatched(successor));
        }
        succ.predecessors.push(predecessor);
        Ok(())
    }

    fn dispatch(&mut self, id: TaskId, queues: TaskQueueFlags) -> TaskResult<()> {
        let slot = self.live_mut(id).ok_or(TaskError::UnknownTask(id))?;
        if slot.dispatched {
            return Err(TaskError::AlreadyDispatched(id));
        }
        slot.dispatched = true;

        let queues = if queues.is_empty() {
            TaskQueueFlags::NORMAL
        } else {
            queues
        };
        for (position, queue) in PRIORITY_ORDER.iter().enumerate() {
            if queues.contains(*queue) {
                self.queues[position].push(id);
            }
        }
        self.in_flight += 1;
        Ok(())
    }

    fn is_dispatched(&self, id: TaskId) -> bool {
        self.live(id).is_some_and(|slot| slot.dispatched)
    }

    fn classify(&self, id: TaskId) -> QueueEntry {
        match self.live(id) {
            None => QueueEntry::Stale,
            Some(slot) if slot.executing => QueueEntry::Stale,
            Some(slot) => {
                if slot.predecessors.iter().all(|&pred| self.is_complete(pred)) {
                    QueueEntry::Ready
                } else {
                    QueueEntry::Blocked
                }
            }
        }
    }

    /// Take the first runnable task from the given queues, in priority order.
    ///
    /// Entries of tasks that already ran (a task may sit in several queues)
    /// are dropped along the way.
    fn take_runnable(&mut self, queues: TaskQueueFlags) -> Option<Claimed> {
        for (position, queue) in PRIORITY_ORDER.iter().enumerate() {
            if !queues.contains(*queue) {
                continue;
            }

            let mut i = 0;
            while i < self.queues[position].len() {
                let id = self.queues[position][i];
                match self.classify(id) {
                    QueueEntry::Stale => {
                        self.queues[position].remove(i);
                    }
                    QueueEntry::Blocked => i += 1,
                    QueueEntry::Ready => {
                        self.queues[position].remove(i);
                        let index = self.slot_index(id);
                        let slot = &mut self.slots[index];
                        slot.executing = true;
                        return Some(Claimed {
                            id,
                            name: slot.name,
                            work: slot.work.take(),
                        });
                    }
                }
            }
        }
        None
    }

    fn complete(&mut self, id: TaskId) {
        let Some(slot) = self.live_mut(id) else {
            return;
        };
        let was_dispatched = slot.dispatched;
        slot.available = true;
        slot.dispatched = false;
        slot.executing = false;
        slot.work = None;
        slot.predecessors.clear();
        if was_dispatched {
            self.in_flight -= 1;
        }
    }
}

// ============================================================================
// Task Manager
// ============================================================================

struct Shared {
    scheduler: Mutex<Scheduler>,
    /// Notified whenever a task is dispatched or completes.
    changed: Condvar,
    active: AtomicBool,
}

impl Shared {
    /// Run one task from `queues` on this thread. With `block`, sleeps until
    /// work arrives or the manager shuts down.
    fn run_task(&self, queues: TaskQueueFlags, block: bool) -> bool {
        let claimed = {
            let mut scheduler = self.scheduler.lock();
            loop {
                if let Some(claimed) = scheduler.take_runnable(queues) {
                    break claimed;
                }
                if !block || !self.active.load(Ordering::Acquire) {
                    return false;
                }
                self.changed.wait(&mut scheduler);
            }
        };
        self.execute(claimed);
        true
    }

    fn execute(&self, claimed: Claimed) {
        if let Some(work) = claimed.work {
            let _span = trace_span!("task", task = claimed.name).entered();
            if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(work)) {
                error!(
                    task = claimed.name,
                    "task panicked: {}",
                    panic_message(payload.as_ref())
                );
            }
        }
        self.scheduler.lock().complete(claimed.id);
        self.changed.notify_all();
    }

    /// Block until `done` holds, running tasks from every queue meanwhile.
    fn wait_until(
        &self,
        timeout: Timeout,
        poll_interval: Option<Duration>,
        mut done: impl FnMut(&Scheduler) -> bool,
    ) -> bool {
        let counter = timeout.start();
        loop {
            let claimed = {
                let mut scheduler = self.scheduler.lock();
                loop {
                    if done(&scheduler) {
                        return true;
                    }
                    if counter.has_finished() {
                        return false;
                    }
                    if let Some(claimed) = scheduler.take_runnable(TaskQueueFlags::ALL) {
                        break claimed;
                    }
                    let sleep = match (counter.remaining(), poll_interval) {
                        (Some(remaining), Some(poll)) => Some(remaining.min(poll)),
                        (remaining, poll) => remaining.or(poll),
                    };
                    match sleep {
                        None => self.changed.wait(&mut scheduler),
                        Some(duration) => {
                            self.changed.wait_for(&mut scheduler, duration);
                        }
                    }
                }
            };
            self.execute(claimed);
        }
    }
}

/// Executes a dependency graph of tasks on a fixed pool of worker threads.
///
/// Dropping the manager shuts it down and joins its workers.
pub struct TaskManager {
    shared: Arc<Shared>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    worker_count: usize,
    capacity: usize,
}

impl TaskManager {
    /// Start a task manager, spawning its worker threads.
    ///
    /// A worker that fails to spawn is logged and skipped.
    #[must_use]
    pub fn new(config: TaskManagerConfig) -> Self {
        let capacity = config.max_in_flight_tasks.max(1);
        let shared = Arc::new(Shared {
            scheduler: Mutex::new(Scheduler::new(capacity)),
            changed: Condvar::new(),
            active: AtomicBool::new(true),
        });

        let mut workers = Vec::with_capacity(config.worker_count());
        for group in &config.worker_groups {
            for _ in 0..group.threads {
                let index = workers.len();
                let queues = group.queues;
                let worker_shared = Arc::clone(&shared);
                let spawned = thread::Builder::new()
                    .name(format!("keel-worker-{index}"))
                    .spawn(move || worker_loop(&worker_shared, queues));
                match spawned {
                    Ok(handle) => workers.push(handle),
                    Err(err) => error!(worker = index, %err, "failed to spawn worker thread"),
                }
            }
        }

        let worker_count = workers.len();
        debug!(workers = worker_count, capacity, "task manager started");

        Self {
            shared,
            workers: Mutex::new(workers),
            worker_count,
            capacity,
        }
    }

    /// Number of threads that can execute tasks: the workers plus the
    /// thread that waits.
    #[must_use]
    pub const fn concurrency(&self) -> usize {
        self.worker_count + 1
    }

    #[must_use]
    pub const fn worker_count(&self) -> usize {
        self.worker_count
    }

    /// Capacity of the task slot ring.
    #[must_use]
    pub const fn capacity(&self) -> usize {
        self.capacity
    }

    // ==================== Task Creation ====================

    /// Create a task that runs `work` once dispatched and unblocked.
    ///
    /// # Panics
    ///
    /// Panics if every task slot is in flight.
    pub fn create_task<F>(&self, name: &'static str, work: F) -> TaskId
    where
        F: FnOnce() + Send + 'static,
    {
        self.create_boxed(name, Some(Box::new(work)))
    }

    /// Create a task without a body, used as a synchronization point.
    ///
    /// # Panics
    ///
    /// Panics if every task slot is in flight.
    pub fn create_join_task(&self, name: &'static str) -> TaskId {
        self.create_boxed(name, None)
    }

    /// Create a task, reporting slot exhaustion as an error.
    pub fn try_create_task<F>(&self, name: &'static str, work: F) -> TaskResult<TaskId>
    where
        F: FnOnce() + Send + 'static,
    {
        self.try_create_boxed(name, Some(Box::new(work)))
    }

    pub(crate) fn try_create_boxed(
        &self,
        name: &'static str,
        work: Option<TaskFn>,
    ) -> TaskResult<TaskId> {
        self.shared.scheduler.lock().allocate(name, work)
    }

    pub(crate) fn create_boxed(&self, name: &'static str, work: Option<TaskFn>) -> TaskId {
        match self.try_create_boxed(name, work) {
            Ok(id) => id,
            Err(err) => {
                error!(task = name, %err, "cannot create task");
                panic!("cannot create task {name}: {err}");
            }
        }
    }

    // ==================== Wiring and Dispatch ====================

    /// Make `successor` wait for `predecessor` to complete.
    ///
    /// Both tasks must be live and not yet dispatched.
    pub fn try_add_dependency(&self, predecessor: TaskId, successor: TaskId) -> TaskResult<()> {
        self.shared
            .scheduler
            .lock()
            .add_dependency(predecessor, successor)
    }

    /// Like [`TaskManager::try_add_dependency`]; misuse is logged and asserted
    /// in debug builds.
    pub fn add_dependency(&self, predecessor: TaskId, successor: TaskId) {
        if let Err(err) = self.try_add_dependency(predecessor, successor) {
            error!(?predecessor, ?successor, %err, "invalid task dependency");
            debug_assert!(false, "invalid task dependency: {err}");
        }
    }

    /// Make a task eligible to run in each of `queues`. An empty set means `NORMAL`.
    pub fn try_dispatch(&self, task: TaskId, queues: TaskQueueFlags) -> TaskResult<()> {
        self.shared.scheduler.lock().dispatch(task, queues)?;
        self.shared.changed.notify_all();
        Ok(())
    }

    /// Like [`TaskManager::try_dispatch`]; misuse is logged and asserted in
    /// debug builds.
    pub fn dispatch(&self, task: TaskId, queues: TaskQueueFlags) {
        if let Err(err) = self.try_dispatch(task, queues) {
            error!(?task, %err, "invalid task dispatch");
            debug_assert!(false, "invalid task dispatch: {err}");
        }
    }

    pub fn dispatch_all(&self, tasks: &[TaskId], queues: TaskQueueFlags) {
        let mut failed = None;
        {
            let mut scheduler = self.shared.scheduler.lock();
            for &task in tasks {
                if let Err(err) = scheduler.dispatch(task, queues) {
                    failed = Some(err);
                }
            }
        }
        self.shared.changed.notify_all();

        if let Some(err) = failed {
            error!(%err, "invalid task dispatch");
            debug_assert!(false, "invalid task dispatch: {err}");
        }
    }

    /// Dispatch `task` to the normal queue unless it was already dispatched
    /// or has completed.
    pub(crate) fn dispatch_if_pending(&self, task: TaskId) {
        let dispatched = {
            let mut scheduler = self.shared.scheduler.lock();
            scheduler.live(task).is_some()
                && !scheduler.is_dispatched(task)
                && scheduler.dispatch(task, TaskQueueFlags::NORMAL).is_ok()
        };
        if dispatched {
            self.shared.changed.notify_all();
        }
    }

    // ==================== Queries ====================

    /// True once the task's slot has been freed.
    #[must_use]
    pub fn is_complete(&self, task: TaskId) -> bool {
        self.shared.scheduler.lock().is_complete(task)
    }

    /// True when no dispatched task is pending or running.
    #[must_use]
    pub fn is_idle(&self) -> bool {
        self.shared.scheduler.lock().in_flight == 0
    }

    // ==================== Waiting ====================

    /// Run at most one runnable task from `queues` on the calling thread.
    /// Returns whether a task ran.
    pub fn assist(&self, queues: TaskQueueFlags) -> bool {
        self.shared.run_task(queues, false)
    }

    /// Block until `task` completes, running other tasks meanwhile.
    /// Returns false on timeout.
    pub fn wait_for_completion(&self, task: TaskId, timeout: Timeout) -> bool {
        self.shared
            .wait_until(timeout, None, |scheduler| scheduler.is_complete(task))
    }

    /// Block until no dispatched task remains. Returns false on timeout.
    ///
    /// Calling this from inside a task never succeeds, since the calling task
    /// itself is in flight.
    pub fn wait_for_idle(&self, timeout: Timeout) -> bool {
        self.shared
            .wait_until(timeout, None, |scheduler| scheduler.in_flight == 0)
    }

    /// Block until `event` is signaled, running tasks meanwhile.
    /// Returns false on timeout.
    pub fn wait_for_event(&self, event: &Event, timeout: Timeout) -> bool {
        self.shared
            .wait_until(timeout, Some(EVENT_POLL_INTERVAL), |_| event.is_signaled())
    }

    // ==================== Lifecycle ====================

    /// Stop and join all worker threads. Tasks still queued stay queued and can
    /// be run by waiting threads. Idempotent.
    pub fn shutdown(&self) {
        self.shared.active.store(false, Ordering::Release);
        {
            // Taking the lock orders the store before any worker's next wait.
            let _scheduler = self.shared.scheduler.lock();
            self.shared.changed.notify_all();
        }

        let workers = std::mem::take(&mut *self.workers.lock());
        let joined = workers.len();
        for handle in workers {
            if handle.join().is_err() {
                warn!("worker thread exited with a panic");
            }
        }
        if joined > 0 {
            debug!(workers = joined, "task manager shut down");
        }
    }

    #[must_use]
    pub fn is_active(&self) -> bool {
        self.shared.active.load(Ordering::Acquire)
    }
}

impl Default for TaskManager {
    fn default() -> Self {
        Self::new(TaskManagerConfig::default())
    }
}

impl Drop for TaskManager {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl fmt::Debug for TaskManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskManager")
            .field("workers", &self.worker_count)
            .field("capacity", &self.capacity)
            .field("active", &self.is_active())
            .finish()
    }
}

fn worker_loop(shared: &Shared, queues: TaskQueueFlags) {
    while shared.active.load(Ordering::Acquire) {
        shared.run_task(queues, true);
    }
}

pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> &str {
    payload
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| payload.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("<non-string panic payload>")
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;

    use super::*;

    #[test]
    fn test_slot_ids_are_recycled_by_index() {
        let mut scheduler = Scheduler::new(4);
        let a = scheduler.allocate("a", None).unwrap();
        assert_eq!(a.as_raw(), 1);
        assert!(!scheduler.is_complete(a));

        scheduler.complete(a);
        assert!(scheduler.is_complete(a));

        // The freed slot is handed out again under a new id.
        let ids: Vec<_> = (0..4)
            .map(|_| scheduler.allocate("b", None).unwrap())
            .collect();
        assert!(ids.iter().all(|id| *id != a));
        assert!(scheduler.is_complete(a));
    }

    #[test]
    fn test_exhausted_ring_reports_error() {
        let mut scheduler = Scheduler::new(2);
        scheduler.allocate("a", None).unwrap();
        scheduler.allocate("b", None).unwrap();
        assert_eq!(
            scheduler.allocate("c", None),
            Err(TaskError::SlotsExhausted { capacity: 2 })
        );
    }

    #[test]
    fn test_blocked_task_is_not_taken() {
        let mut scheduler = Scheduler::new(8);
        let first = scheduler.allocate("first", None).unwrap();
        let second = scheduler.allocate("second", None).unwrap();
        scheduler.add_dependency(first, second).unwrap();
        scheduler.dispatch(second, TaskQueueFlags::NORMAL).unwrap();

        assert!(scheduler.take_runnable(TaskQueueFlags::ALL).is_none());

        scheduler.dispatch(first, TaskQueueFlags::NORMAL).unwrap();
        let claimed = scheduler.take_runnable(TaskQueueFlags::ALL).unwrap();
        assert_eq!(claimed.id, first);
        scheduler.complete(first);

        let claimed = scheduler.take_runnable(TaskQueueFlags::ALL).unwrap();
        assert_eq!(claimed.id, second);
    }

    #[test]
    fn test_task_in_several_queues_runs_once() {
        let mut scheduler = Scheduler::new(8);
        let task = scheduler.allocate("multi", None).unwrap();
        scheduler
            .dispatch(task, TaskQueueFlags::NORMAL | TaskQueueFlags::LONG)
            .unwrap();
        assert_eq!(scheduler.in_flight, 1);

        assert!(scheduler.take_runnable(TaskQueueFlags::ALL).is_some());
        assert!(scheduler.take_runnable(TaskQueueFlags::ALL).is_none());
        scheduler.complete(task);
        assert_eq!(scheduler.in_flight, 0);
        assert!(scheduler.queues.iter().all(Vec::is_empty));
    }

    #[test]
    fn test_dependency_after_dispatch_is_rejected() {
        let mut scheduler = Scheduler::new(8);
        let a = scheduler.allocate("a", None).unwrap();
        let b = scheduler.allocate("b", None).unwrap();
        scheduler.dispatch(b, TaskQueueFlags::NORMAL).unwrap();
        assert_eq!(
            scheduler.add_dependency(a, b),
            Err(TaskError::AlreadyDispatched(b))
        );
        assert_eq!(
            scheduler.dispatch(b, TaskQueueFlags::NORMAL),
            Err(TaskError::AlreadyDispatched(b))
        );
    }

    #[test]
    fn test_panicking_task_still_completes() {
        let manager = TaskManager::new(TaskManagerConfig::with_workers(1));
        let ran = Arc::new(AtomicUsize::new(0));

        let bad = manager.create_task("bad", || panic!("boom"));
        let after = {
            let ran = Arc::clone(&ran);
            manager.create_task("after", move || {
                ran.fetch_add(1, Ordering::SeqCst);
            })
        };
        manager.add_dependency(bad, after);
        manager.dispatch_all(&[bad, after], TaskQueueFlags::NORMAL);

        assert!(manager.wait_for_completion(after, Timeout::INFINITE));
        assert_eq!(ran.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_shutdown_is_idempotent() {
        let manager = TaskManager::new(TaskManagerConfig::with_workers(2));
        assert_eq!(manager.concurrency(), 3);
        manager.shutdown();
        manager.shutdown();
        assert!(!manager.is_active());

        // Waiting threads still run work after shutdown.
        let task = manager.create_task("late", || {});
        manager.dispatch(task, TaskQueueFlags::LONG);
        assert!(manager.wait_for_completion(task, Timeout::INFINITE));
    }
}
