//! Rolling time windows keyed by event timestamp
//!
//! Windows advance only with the timestamps they observe (never wall clock).
//! Each window keeps a high-watermark: the newest timestamp seen so far. After
//! any observation, no retained entry is older than `high_watermark - window`.
//! A late sample that is already outside the window is dropped on arrival.

use std::collections::VecDeque;

/// Shared behavior of every timestamp-bounded window
pub trait RollingWindow {
    /// Window duration in milliseconds
    fn window_ms(&self) -> i64;

    /// Remove entries older than the cutoff timestamp
    fn evict_before(&mut self, cutoff_timestamp: i64);

    /// Number of retained entries
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Result of asking a baseline for its mean
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Baseline {
    Ready(f64),
    /// Fewer samples than the warm-up minimum
    InsufficientData { samples: usize, required: usize },
}

impl Baseline {
    pub fn value(&self) -> Option<f64> {
        match self {
            Baseline::Ready(mean) => Some(*mean),
            Baseline::InsufficientData { .. } => None,
        }
    }
}

/// Summary statistics over the retained samples
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct BaselineStats {
    pub count: usize,
    pub mean: f64,
    /// Sample standard deviation (0 with fewer than two samples)
    pub stdev: f64,
    pub latest: f64,
}

/// Rolling `(timestamp, value)` samples with a warm-up minimum
#[derive(Debug, Clone)]
pub struct BaselineWindow {
    samples: VecDeque<(i64, f64)>,
    window_ms: i64,
    warmup_samples: usize,
    high_watermark: Option<i64>,
}

impl BaselineWindow {
    pub fn new(window_secs: u64, warmup_samples: usize) -> Self {
        Self {
            samples: VecDeque::new(),
            window_ms: window_secs as i64 * 1000,
            warmup_samples,
            high_watermark: None,
        }
    }

    /// Move the window forward to `timestamp` and evict expired samples.
    ///
    /// Returns the effective observation time (never moves backwards).
    pub fn advance_to(&mut self, timestamp: i64) -> i64 {
        let now = self.high_watermark.map_or(timestamp, |hw| hw.max(timestamp));
        self.high_watermark = Some(now);
        self.evict_before(now - self.window_ms);
        now
    }

    /// Insert a sample, evicting anything older than the window
    pub fn push(&mut self, value: f64, timestamp: i64) {
        let now = self.advance_to(timestamp);
        if timestamp < now - self.window_ms {
            log::trace!("dropping late baseline sample at {} (window head {})", timestamp, now);
            return;
        }

        // Keep samples ordered even if the producer delivered out of order
        match self.samples.back() {
            Some(&(last_ts, _)) if timestamp < last_ts => {
                let idx = self.samples.partition_point(|&(ts, _)| ts <= timestamp);
                self.samples.insert(idx, (timestamp, value));
            }
            _ => self.samples.push_back((timestamp, value)),
        }
    }

    /// Arithmetic mean of retained samples, or `InsufficientData` during warm-up
    pub fn baseline(&self) -> Baseline {
        if self.samples.len() < self.warmup_samples {
            return Baseline::InsufficientData {
                samples: self.samples.len(),
                required: self.warmup_samples,
            };
        }
        Baseline::Ready(self.mean())
    }

    fn mean(&self) -> f64 {
        if self.samples.is_empty() {
            return 0.0;
        }
        self.samples.iter().map(|(_, v)| v).sum::<f64>() / self.samples.len() as f64
    }

    pub fn stats(&self) -> BaselineStats {
        let count = self.samples.len();
        if count == 0 {
            return BaselineStats::default();
        }

        let mean = self.mean();
        let stdev = if count > 1 {
            let variance = self
                .samples
                .iter()
                .map(|(_, v)| (v - mean).powi(2))
                .sum::<f64>()
                / (count - 1) as f64;
            variance.sqrt()
        } else {
            0.0
        };

        BaselineStats {
            count,
            mean,
            stdev,
            latest: self.samples.back().map(|(_, v)| *v).unwrap_or(0.0),
        }
    }

    pub fn oldest_timestamp(&self) -> Option<i64> {
        self.samples.front().map(|(ts, _)| *ts)
    }

    pub fn high_watermark(&self) -> Option<i64> {
        self.high_watermark
    }
}

impl RollingWindow for BaselineWindow {
    fn window_ms(&self) -> i64 {
        self.window_ms
    }

    fn evict_before(&mut self, cutoff_timestamp: i64) {
        while matches!(self.samples.front(), Some(&(ts, _)) if ts < cutoff_timestamp) {
            self.samples.pop_front();
        }
    }

    fn len(&self) -> usize {
        self.samples.len()
    }
}

/// Sliding occurrence counter (message counts, keyword hits, emote hits)
#[derive(Debug, Clone)]
pub struct CountWindow {
    stamps: VecDeque<i64>,
    window_ms: i64,
    high_watermark: Option<i64>,
}

impl CountWindow {
    pub fn new(window_secs: u64) -> Self {
        Self {
            stamps: VecDeque::new(),
            window_ms: window_secs as i64 * 1000,
            high_watermark: None,
        }
    }

    pub fn advance_to(&mut self, timestamp: i64) -> i64 {
        let now = self.high_watermark.map_or(timestamp, |hw| hw.max(timestamp));
        self.high_watermark = Some(now);
        self.evict_before(now - self.window_ms);
        now
    }

    /// Record `occurrences` hits at `timestamp`
    pub fn record(&mut self, timestamp: i64, occurrences: usize) {
        let now = self.advance_to(timestamp);
        if timestamp < now - self.window_ms {
            return;
        }
        for _ in 0..occurrences {
            match self.stamps.back() {
                Some(&last) if timestamp < last => {
                    let idx = self.stamps.partition_point(|&ts| ts <= timestamp);
                    self.stamps.insert(idx, timestamp);
                }
                _ => self.stamps.push_back(timestamp),
            }
        }
    }

    pub fn count(&self) -> usize {
        self.stamps.len()
    }

    /// Occurrences per second over the full window length
    pub fn rate_per_sec(&self) -> f64 {
        self.stamps.len() as f64 / (self.window_ms as f64 / 1000.0)
    }

    pub fn clear(&mut self) {
        self.stamps.clear();
    }
}

impl RollingWindow for CountWindow {
    fn window_ms(&self) -> i64 {
        self.window_ms
    }

    fn evict_before(&mut self, cutoff_timestamp: i64) {
        while matches!(self.stamps.front(), Some(&ts) if ts < cutoff_timestamp) {
            self.stamps.pop_front();
        }
    }

    fn len(&self) -> usize {
        self.stamps.len()
    }
}
