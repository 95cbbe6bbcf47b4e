//! Splitting an index range across the task manager's threads.

use std::{
    any::Any,
    panic::{self, AssertUnwindSafe},
    sync::atomic::{AtomicUsize, Ordering},
};

use crossbeam::utils::CachePadded;
use parking_lot::Mutex;
use smallvec::SmallVec;
use tracing::{error, trace_span};

use crate::{Event, TaskId, TaskManager, Timeout, manager::panic_message, queue::TaskQueueFlags};

/// Shared progress of one `parallel_for` call.
struct Progress {
    name: &'static str,
    cursor: CachePadded<AtomicUsize>,
    completed: CachePadded<AtomicUsize>,
    count: usize,
    chunk: usize,
    done: Event,
    /// First panic payload raised by the body.
    panic: Mutex<Option<Box<dyn Any + Send>>>,
}

impl Progress {
    /// Claim chunks until the range is exhausted.
    ///
    /// A panicking chunk still counts as completed and the loop keeps claiming,
    /// so the range always drains and the caller is released.
    fn run<F: Fn(usize)>(&self, body: &F) {
        loop {
            let start = self.cursor.fetch_add(self.chunk, Ordering::Relaxed);
            if start >= self.count {
                break;
            }
            let end = start.saturating_add(self.chunk).min(self.count);

            let result = panic::catch_unwind(AssertUnwindSafe(|| {
                for index in start..end {
                    body(index);
                }
            }));
            if let Err(payload) = result {
                error!(
                    task = self.name,
                    start,
                    end,
                    panic = panic_message(payload.as_ref()),
                    "parallel_for body panicked"
                );
                self.panic.lock().get_or_insert(payload);
            }

            let len = end - start;
            if self.completed.fetch_add(len, Ordering::AcqRel) + len == self.count {
                self.done.signal();
            }
        }
    }
}

/// Chunk size used for `count` items: spread small ranges over every thread,
/// use the caller's granularity otherwise.
pub(crate) fn effective_granularity(count: usize, granularity: usize, concurrency: usize) -> usize {
    let concurrency = concurrency.max(1);
    if count < granularity.saturating_mul(concurrency) {
        count.div_ceil(concurrency)
    } else {
        granularity
    }
}

impl TaskManager {
    /// Call `body(i)` for every `i` in `0..count`, spread across the task
    /// manager's threads in chunks of roughly `granularity` indices.
    ///
    /// Ranges shorter than `granularity` run inline on the calling thread.
    /// Indices are visited in no particular order, possibly concurrently. The
    /// calling thread assists while waiting, so this may be called from inside
    /// a running task.
    ///
    /// # Panics
    ///
    /// Re-raises the first panic from `body` once every chunk has been claimed
    /// and finished. The rest of a panicking chunk is skipped.
    pub fn parallel_for<F>(&self, count: usize, granularity: usize, name: &'static str, body: F)
    where
        F: Fn(usize) + Sync,
    {
        let granularity = granularity.max(1);
        if count == 0 {
            return;
        }
        if count < granularity {
            (0..count).for_each(body);
            return;
        }

        let concurrency = self.concurrency();
        let chunk = effective_granularity(count, granularity, concurrency);
        let _span = trace_span!("parallel_for", task = name, count, chunk).entered();

        let progress = Progress {
            name,
            cursor: CachePadded::new(AtomicUsize::new(0)),
            completed: CachePadded::new(AtomicUsize::new(0)),
            count,
            chunk,
            done: Event::new(),
            panic: Mutex::new(None),
        };

        self.scope(|scope| {
            let tasks: SmallVec<[TaskId; 16]> = (0..concurrency)
                .map(|_| scope.create_task(name, || progress.run(&body)))
                .collect();
            scope.dispatch_all(&tasks, TaskQueueFlags::NORMAL);
            self.wait_for_event(&progress.done, Timeout::INFINITE);
        });

        if let Some(payload) = progress.panic.into_inner() {
            panic::resume_unwind(payload);
        }
    }
}
