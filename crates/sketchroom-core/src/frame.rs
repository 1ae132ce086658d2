//! Redraw coalescing.

use std::time::{Duration, Instant};

/// Coalesces redraw requests into at most one redraw per frame interval.
///
/// Any mutation path may call [`schedule_redraw`](Self::schedule_redraw);
/// the host asks [`take_frame`](Self::take_frame) once per display refresh
/// and performs a full redraw when it returns true.
#[derive(Debug, Clone)]
pub struct RedrawScheduler {
    interval: Duration,
    pending: bool,
    last_frame: Option<Instant>,
}

impl RedrawScheduler {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            pending: false,
            last_frame: None,
        }
    }

    pub fn schedule_redraw(&mut self) {
        self.pending = true;
    }

    /// Request a redraw that ignores the frame interval, e.g. after a resize.
    pub fn force(&mut self) {
        self.pending = true;
        self.last_frame = None;
    }

    pub fn is_pending(&self) -> bool {
        self.pending
    }

    /// Returns true if a redraw should happen now, consuming the request.
    pub fn take_frame(&mut self, now: Instant) -> bool {
        if !self.pending {
            return false;
        }
        if let Some(last) = self.last_frame {
            if now.saturating_duration_since(last) < self.interval {
                return false;
            }
        }
        self.pending = false;
        self.last_frame = Some(now);
        true
    }
}

impl Default for RedrawScheduler {
    fn default() -> Self {
        Self::new(Duration::from_millis(crate::config::DEFAULT_FRAME_INTERVAL_MS))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_requests_coalesce_into_one_frame() {
        let start = Instant::now();
        let mut frames = RedrawScheduler::new(Duration::from_millis(16));
        for _ in 0..50 {
            frames.schedule_redraw();
        }
        assert!(frames.take_frame(start));
        assert!(!frames.take_frame(start));
    }

    #[test]
    fn test_at_most_one_frame_per_interval() {
        let start = Instant::now();
        let mut frames = RedrawScheduler::new(Duration::from_millis(16));
        frames.schedule_redraw();
        assert!(frames.take_frame(start));

        frames.schedule_redraw();
        assert!(!frames.take_frame(start + Duration::from_millis(8)));
        assert!(frames.is_pending());
        assert!(frames.take_frame(start + Duration::from_millis(16)));
    }

    #[test]
    fn test_idle_scheduler_never_fires() {
        let mut frames = RedrawScheduler::default();
        assert!(!frames.take_frame(Instant::now()));
    }

    #[test]
    fn test_force_skips_interval() {
        let start = Instant::now();
        let mut frames = RedrawScheduler::new(Duration::from_millis(16));
        frames.schedule_redraw();
        assert!(frames.take_frame(start));

        frames.force();
        assert!(frames.take_frame(start + Duration::from_millis(1)));
    }
}
