//! Per-frame timing passed to every system tick.

/// Timing of the frame being ticked.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct FrameTime {
    /// Seconds since the previous frame.
    pub delta_seconds: f32,
    /// Seconds since the first frame, including this one's delta.
    pub total_seconds: f64,
    /// Monotonic frame counter, starting at 0.
    pub frame_index: u64,
}

impl FrameTime {
    #[must_use]
    pub fn first(delta_seconds: f32) -> Self {
        Self {
            delta_seconds,
            total_seconds: f64::from(delta_seconds),
            frame_index: 0,
        }
    }

    /// The frame after this one.
    #[must_use]
    pub fn advance(self, delta_seconds: f32) -> Self {
        Self {
            delta_seconds,
            total_seconds: self.total_seconds + f64::from(delta_seconds),
            frame_index: self.frame_index + 1,
        }
    }
}
