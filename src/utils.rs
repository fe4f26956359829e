use std::time::{Duration, Instant};

/// A utility for tracking frames per second.
pub struct FpsCounter {
    frame_count: u32,
    last_time: Instant,
    interval: Duration,
}

impl FpsCounter {
    /// Create a new FPS counter reporting once per second.
    pub fn new() -> Self {
        Self::with_interval(Duration::from_secs(1))
    }

    pub fn with_interval(interval: Duration) -> Self {
        Self {
            frame_count: 0,
            last_time: Instant::now(),
            interval,
        }
    }

    /// Counts a frame. Returns Some(fps) once per reporting interval.
    pub fn update(&mut self) -> Option<f32> {
        self.update_at(Instant::now())
    }

    fn update_at(&mut self, now: Instant) -> Option<f32> {
        self.frame_count += 1;
        let elapsed = now.saturating_duration_since(self.last_time);
        if elapsed >= self.interval {
            let fps = self.frame_count as f32 / elapsed.as_secs_f32();
            self.frame_count = 0;
            self.last_time = now;
            Some(fps)
        } else {
            None
        }
    }
}

impl Default for FpsCounter {
    fn default() -> Self {
        Self::new()
    }
}

/// Source of the elapsed time handed to each tick.
#[derive(Debug, Clone)]
pub enum FrameClock {
    /// Seconds since the clock was created.
    Wall { start: Instant },
    /// `frame / fps`, independent of how long frames take.
    Fixed { step: f64, frame: u64 },
}

impl FrameClock {
    pub fn wall() -> Self {
        FrameClock::Wall { start: Instant::now() }
    }

    pub fn fixed(fps: u32) -> Self {
        FrameClock::Fixed {
            step: 1.0 / f64::from(fps.max(1)),
            frame: 0,
        }
    }

    /// Time for the next frame, in seconds.
    pub fn tick_time(&mut self) -> f32 {
        match self {
            FrameClock::Wall { start } => start.elapsed().as_secs_f32(),
            FrameClock::Fixed { step, frame } => {
                let t = *frame as f64 * *step;
                *frame += 1;
                t as f32
            }
        }
    }
}
