//! Rolling average of recent computation durations.
//!
//! Only used to space out polls while a peer holds the lock: a peer that
//! started computing "just now" is expected to finish in about half the
//! average latency. Values are advisory; concurrent updates may interleave
//! freely.

use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::{Duration, Instant};

/// Time-windowed average of computation latencies. One per service instance.
#[derive(Debug)]
pub struct LatencyEstimate {
    window: Duration,
    samples: Mutex<Window>,
}

/// Samples inside the window and their running sum.
#[derive(Debug, Default)]
struct Window {
    samples: VecDeque<(Instant, Duration)>,
    total: Duration,
}

impl Window {
    fn push(&mut self, at: Instant, elapsed: Duration) {
        self.samples.push_back((at, elapsed));
        self.total += elapsed;
    }

    fn prune(&mut self, now: Instant, window: Duration) {
        while let Some(&(at, elapsed)) = self.samples.front() {
            if now.saturating_duration_since(at) <= window {
                break;
            }
            self.samples.pop_front();
            self.total = self.total.saturating_sub(elapsed);
        }
        if self.samples.is_empty() {
            self.total = Duration::ZERO;
        }
    }

    fn average(&self) -> Option<Duration> {
        match self.samples.len() {
            0 => None,
            n => Some(self.total / n as u32),
        }
    }
}

impl LatencyEstimate {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            samples: Mutex::new(Window::default()),
        }
    }

    /// Record one successful computation.
    pub fn record(&self, elapsed: Duration) {
        self.record_at(Instant::now(), elapsed);
    }

    fn record_at(&self, now: Instant, elapsed: Duration) {
        let mut window = self.samples.lock().unwrap_or_else(|e| e.into_inner());
        window.push(now, elapsed);
        window.prune(now, self.window);
    }

    /// Average over the window, or `None` when no samples are recent enough.
    pub fn average(&self) -> Option<Duration> {
        self.average_at(Instant::now())
    }

    fn average_at(&self, now: Instant) -> Option<Duration> {
        let mut window = self.samples.lock().unwrap_or_else(|e| e.into_inner());
        window.prune(now, self.window);
        window.average()
    }

    /// Number of samples currently inside the window.
    pub fn samples(&self) -> usize {
        let mut window = self.samples.lock().unwrap_or_else(|e| e.into_inner());
        window.prune(Instant::now(), self.window);
        window.samples.len()
    }

    /// How long to sleep before the next poll: half the average, or `default`.
    pub fn poll_interval(&self, default: Duration) -> Duration {
        self.average().map(|avg| avg / 2).unwrap_or(default)
    }
}
