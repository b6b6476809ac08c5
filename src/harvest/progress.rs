//! Throughput tracking for a fan-out phase
//!
//! The rate is the number of completions inside a trailing window divided by
//! the window width (or by the time since the phase started, while that is
//! shorter). Timestamps are passed in by the caller.

use indicatif::HumanDuration;
use std::collections::VecDeque;
use std::time::{Duration, Instant};

/// Progress counters of one phase
#[derive(Debug)]
pub struct Progress {
    total: usize,
    done: usize,
    skipped: usize,
    failed: usize,
    started: Instant,
    window: Duration,
    recent: VecDeque<Instant>,
}

impl Progress {
    pub fn new(total: usize, window: Duration, started: Instant) -> Self {
        Self {
            total,
            done: 0,
            skipped: 0,
            failed: 0,
            started,
            window,
            recent: VecDeque::new(),
        }
    }

    /// Counts a completed item and adds it to the rate window
    pub fn record_completion(&mut self, now: Instant) {
        self.done += 1;
        self.recent.push_back(now);
        self.prune(now);
    }

    /// Counts an item that needed no work; it does not affect the rate
    pub fn record_skip(&mut self) {
        self.done += 1;
        self.skipped += 1;
    }

    pub fn record_failure(&mut self) {
        self.failed += 1;
    }

    pub fn total(&self) -> usize {
        self.total
    }

    pub fn done(&self) -> usize {
        self.done
    }

    pub fn skipped(&self) -> usize {
        self.skipped
    }

    pub fn failed(&self) -> usize {
        self.failed
    }

    /// Items neither done nor failed
    pub fn remaining(&self) -> usize {
        self.total.saturating_sub(self.done + self.failed)
    }

    /// Completions per second over the trailing window
    pub fn rate(&mut self, now: Instant) -> f64 {
        self.prune(now);
        let span = now.saturating_duration_since(self.started).min(self.window);
        if span.is_zero() {
            return 0.0;
        }
        self.recent.len() as f64 / span.as_secs_f64()
    }

    /// Estimated time until every remaining item completes
    ///
    /// `None` while nothing completed inside the window.
    pub fn eta(&mut self, now: Instant) -> Option<Duration> {
        let rate = self.rate(now);
        if rate <= 0.0 {
            return None;
        }
        Some(Duration::from_secs_f64(self.remaining() as f64 / rate))
    }

    /// One-line summary: counts, speed, elapsed time and ETA
    pub fn summary(&mut self, now: Instant) -> String {
        let per_minute = (self.rate(now) * 60.0).round();
        let elapsed = HumanDuration(now.saturating_duration_since(self.started));
        let eta = match self.eta(now) {
            Some(eta) => HumanDuration(eta).to_string(),
            None => "unknown".to_string(),
        };
        format!(
            "{}/{}, speed: {}/min, time elapsed: {}, ETA: {}",
            self.done, self.total, per_minute, elapsed, eta
        )
    }

    fn prune(&mut self, now: Instant) {
        while let Some(oldest) = self.recent.front() {
            if now.saturating_duration_since(*oldest) > self.window {
                self.recent.pop_front();
            } else {
                break;
            }
        }
    }
}
