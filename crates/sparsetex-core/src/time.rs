//! Frame Timing
//!
//! The residency manager only ever sees `now` as a `Duration` since the
//! start of the run. `FrameClock` produces it, either from the wall clock or
//! from a fixed simulated step so headless runs are reproducible.

use std::time::{Duration, Instant};

/// How a frame clock advances
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClockMode {
    /// Wall-clock time
    RealTime,
    /// A fixed step per frame, independent of wall-clock time
    Fixed(Duration),
}

/// Frame clock for the frame loop
#[derive(Debug)]
pub struct FrameClock {
    mode: ClockMode,
    /// Wall-clock start of the run
    start: Instant,
    /// Time since start as of the last frame
    elapsed: Duration,
    /// Length of the last frame
    delta: Duration,
    /// Frames advanced so far
    frame_count: u64,
}

impl FrameClock {
    /// Clock following the wall clock
    pub fn real_time() -> Self {
        Self::with_mode(ClockMode::RealTime)
    }

    /// Clock advancing by `step` every frame
    pub fn fixed(step: Duration) -> Self {
        Self::with_mode(ClockMode::Fixed(step))
    }

    /// Fixed clock from a frame rate
    pub fn from_hz(hz: f64) -> Self {
        Self::fixed(Duration::from_secs_f64(1.0 / hz.max(f64::EPSILON)))
    }

    fn with_mode(mode: ClockMode) -> Self {
        Self {
            mode,
            start: Instant::now(),
            elapsed: Duration::ZERO,
            delta: Duration::ZERO,
            frame_count: 0,
        }
    }

    /// Advance to the next frame and return its `now`
    pub fn advance(&mut self) -> Duration {
        let next = match self.mode {
            ClockMode::RealTime => self.start.elapsed(),
            ClockMode::Fixed(step) => self.elapsed + step,
        };
        self.delta = next.saturating_sub(self.elapsed);
        self.elapsed = next;
        self.frame_count += 1;
        next
    }

    /// Time since start as of the last frame
    pub fn now(&self) -> Duration {
        self.elapsed
    }

    /// Length of the last frame
    pub fn delta(&self) -> Duration {
        self.delta
    }

    /// Frames advanced so far
    pub fn frame_count(&self) -> u64 {
        self.frame_count
    }

    /// Clock mode
    pub fn mode(&self) -> ClockMode {
        self.mode
    }
}

/// Scoped timer that records duration on drop
pub struct ScopedTimer<'a> {
    name: &'a str,
    start: Instant,
    callback: Option<Box<dyn FnMut(&str, Duration) + 'a>>,
}

impl<'a> ScopedTimer<'a> {
    /// Create a new scoped timer with a callback
    pub fn new<F>(name: &'a str, callback: F) -> Self
    where
        F: FnMut(&str, Duration) + 'a,
    {
        Self {
            name,
            start: Instant::now(),
            callback: Some(Box::new(callback)),
        }
    }

    /// Create a scoped timer that logs to tracing
    pub fn traced(name: &'a str) -> Self {
        Self {
            name,
            start: Instant::now(),
            callback: None,
        }
    }

    /// Get elapsed time so far
    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }
}

impl Drop for ScopedTimer<'_> {
    fn drop(&mut self) {
        let duration = self.start.elapsed();
        if let Some(mut callback) = self.callback.take() {
            callback(self.name, duration);
        } else {
            tracing::debug!(
                target: "timing",
                name = self.name,
                duration_us = duration.as_micros() as u64,
                "Timer completed"
            );
        }
    }
}

/// Rolling average over the last N samples
#[derive(Debug)]
pub struct RollingTimer {
    samples: Vec<Duration>,
    index: usize,
    count: usize,
}

impl RollingTimer {
    /// Create a rolling timer holding `sample_count` samples
    pub fn new(sample_count: usize) -> Self {
        Self {
            samples: vec![Duration::ZERO; sample_count.max(1)],
            index: 0,
            count: 0,
        }
    }

    /// Record a sample
    pub fn record(&mut self, sample: Duration) {
        self.samples[self.index] = sample;
        self.index = (self.index + 1) % self.samples.len();
        self.count = (self.count + 1).min(self.samples.len());
    }

    /// Average of the recorded samples
    pub fn average(&self) -> Duration {
        if self.count == 0 {
            return Duration::ZERO;
        }
        let total: Duration = self.samples.iter().take(self.count).sum();
        total / self.count as u32
    }

    /// Largest recorded sample
    pub fn max(&self) -> Duration {
        self.samples.iter().take(self.count).copied().max().unwrap_or(Duration::ZERO)
    }

    /// Number of recorded samples
    pub fn count(&self) -> usize {
        self.count
    }
}
