//! Frame rate measurement

use std::collections::VecDeque;
use std::time::{Duration, Instant};

/// Rolling window FPS calculator
///
/// Keeps the timestamps of frames seen during the last window; the rate is
/// simply how many are left after pruning.
#[derive(Debug, Clone)]
pub struct FpsCalculator {
    /// Frame timestamps in last window
    frame_times: VecDeque<Instant>,
    /// Window duration (default 1 second)
    window: Duration,
}

impl FpsCalculator {
    /// Create a new FPS calculator with 1-second window
    pub fn new() -> Self {
        Self::with_window(Duration::from_secs(1))
    }

    pub fn with_window(window: Duration) -> Self {
        Self {
            frame_times: VecDeque::with_capacity(120), // Max 120fps tracking
            window,
        }
    }

    /// Record a frame at a given instant
    pub fn record_frame_at(&mut self, now: Instant) {
        self.frame_times.push_back(now);
        self.prune(now);
    }

    fn prune(&mut self, now: Instant) {
        let Some(cutoff) = now.checked_sub(self.window) else {
            return;
        };
        while let Some(&oldest) = self.frame_times.front() {
            if oldest < cutoff {
                self.frame_times.pop_front();
            } else {
                break;
            }
        }
    }

    /// Frames recorded during the window ending at the last recorded frame
    pub fn current_fps(&self) -> u32 {
        self.frame_times.len() as u32
    }

    /// Frames recorded during the window ending now
    ///
    /// Unlike [`current_fps`](Self::current_fps) this decays to zero when
    /// frames stop arriving.
    pub fn fps_now(&mut self) -> u32 {
        self.prune(Instant::now());
        self.current_fps()
    }
}

impl Default for FpsCalculator {
    fn default() -> Self {
        Self::new()
    }
}

/// Fixed-window frame counter
///
/// Counts frames and reports the total once per elapsed window, then starts
/// over. This is what the viewer shows as its FPS figure.
#[derive(Debug, Clone)]
pub struct FpsWindow {
    window_start: Instant,
    count: u32,
    window: Duration,
}

impl FpsWindow {
    pub fn new() -> Self {
        Self::starting_at(Instant::now())
    }

    pub fn starting_at(start: Instant) -> Self {
        Self {
            window_start: start,
            count: 0,
            window: Duration::from_secs(1),
        }
    }

    /// Count one frame; returns the completed window's total when a window
    /// boundary has been crossed.
    pub fn tick(&mut self) -> Option<u32> {
        self.tick_at(Instant::now())
    }

    pub fn tick_at(&mut self, now: Instant) -> Option<u32> {
        self.count += 1;
        if now.duration_since(self.window_start) >= self.window {
            let fps = self.count;
            self.count = 0;
            self.window_start = now;
            Some(fps)
        } else {
            None
        }
    }
}

impl Default for FpsWindow {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fps_calculator() {
        let mut calc = FpsCalculator::new();
        assert_eq!(calc.current_fps(), 0);

        let now = Instant::now();
        calc.record_frame_at(now);
        calc.record_frame_at(now);
        calc.record_frame_at(now);

        assert_eq!(calc.current_fps(), 3);
    }

    #[test]
    fn test_fps_calculator_prunes_old_frames() {
        let mut calc = FpsCalculator::new();
        let base = Instant::now();

        for i in 0..10 {
            calc.record_frame_at(base + Duration::from_millis(i * 100));
        }
        assert_eq!(calc.current_fps(), 10);

        // 1.5s later only frames from the last second remain
        calc.record_frame_at(base + Duration::from_millis(1500));
        assert_eq!(calc.current_fps(), 6);
    }

    #[test]
    fn test_fps_window_reports_once_per_second() {
        let base = Instant::now();
        let mut window = FpsWindow::starting_at(base);

        for i in 1..15 {
            assert_eq!(window.tick_at(base + Duration::from_millis(i * 66)), None);
        }
        assert_eq!(window.tick_at(base + Duration::from_millis(1000)), Some(15));
        assert_eq!(window.tick_at(base + Duration::from_millis(1100)), None);
    }
}
