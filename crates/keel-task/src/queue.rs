//! Task queues and their service priority.

use bitflags::bitflags;

bitflags! {
    /// The queues a task is placed in, or a worker services.
    ///
    /// When a worker services several queues it always prefers
    /// `TIME_CRITICAL`, then `NORMAL`, then `LONG`.
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
    pub struct TaskQueueFlags: u8 {
        const NORMAL = 1;
        const LONG = 1 << 1;
        const TIME_CRITICAL = 1 << 2;
        const ALL = Self::NORMAL.bits() | Self::LONG.bits() | Self::TIME_CRITICAL.bits();
    }
}

impl Default for TaskQueueFlags {
    fn default() -> Self {
        Self::NORMAL
    }
}

/// Queues in the order they are searched for work.
pub(crate) const PRIORITY_ORDER: [TaskQueueFlags; 3] = [
    TaskQueueFlags::TIME_CRITICAL,
    TaskQueueFlags::NORMAL,
    TaskQueueFlags::LONG,
];
