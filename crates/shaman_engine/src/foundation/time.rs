//! Frame timing utilities

use std::time::{Duration, Instant};

/// Measures time between frames, clamped so a stall (window drag, breakpoint,
/// swap chain rebuild) doesn't turn into one huge simulation step
pub struct FrameClock {
    last_frame: Instant,
    max_frame_time: f32,
}

impl FrameClock {
    /// Start timing at `now`
    pub fn new(now: Instant, max_frame_time: f32) -> Self {
        Self {
            last_frame: now,
            max_frame_time,
        }
    }

    /// Seconds since the previous tick, at most `max_frame_time`
    pub fn tick(&mut self, now: Instant) -> f32 {
        let elapsed = now.saturating_duration_since(self.last_frame).as_secs_f32();
        self.last_frame = now;
        elapsed.min(self.max_frame_time)
    }
}

/// Counts frames and reports the rate once per second
pub struct FpsCounter {
    window_start: Instant,
    frames: u32,
}

impl FpsCounter {
    const WINDOW: Duration = Duration::from_secs(1);

    /// Start counting at `now`
    pub fn new(now: Instant) -> Self {
        Self {
            window_start: now,
            frames: 0,
        }
    }

    /// Count one frame; returns frames per second when a full second has elapsed
    pub fn tick(&mut self, now: Instant) -> Option<f32> {
        self.frames += 1;
        let elapsed = now.saturating_duration_since(self.window_start);
        if elapsed < Self::WINDOW {
            return None;
        }

        let fps = self.frames as f32 / elapsed.as_secs_f32();
        self.frames = 0;
        self.window_start = now;
        Some(fps)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_frame_time_is_clamped() {
        let start = Instant::now();
        let mut clock = FrameClock::new(start, 0.25);

        assert_relative_eq!(clock.tick(start + Duration::from_millis(16)), 0.016, epsilon = 1e-6);
        assert_relative_eq!(clock.tick(start + Duration::from_secs(3)), 0.25);
    }

    #[test]
    fn test_fps_reported_once_per_second() {
        let start = Instant::now();
        let mut counter = FpsCounter::new(start);

        for frame in 1..60 {
            assert!(counter.tick(start + Duration::from_millis(frame * 16)).is_none());
        }
        let fps = counter.tick(start + Duration::from_secs(1)).unwrap();
        assert_relative_eq!(fps, 60.0);

        // Counter restarts after reporting
        assert!(counter.tick(start + Duration::from_millis(1016)).is_none());
    }
}
