//! Wall clock and local calendar used by workers and the daily reset
//!
//! Detection itself runs on event timestamps. The clock is only consulted for
//! housekeeping ticks and for mapping a timestamp to the local calendar day
//! (daily clip counters reset at local midnight).

use chrono::{DateTime, FixedOffset, Local, NaiveDate, Offset, Utc};
use std::sync::atomic::{AtomicI64, Ordering};

pub trait Clock: Send + Sync {
    /// Current Unix time in milliseconds
    fn now_ms(&self) -> i64;

    /// Local calendar date containing `ts_ms`
    fn local_date(&self, ts_ms: i64) -> NaiveDate;
}

/// System time in the host's local timezone
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_ms(&self) -> i64 {
        Utc::now().timestamp_millis()
    }

    fn local_date(&self, ts_ms: i64) -> NaiveDate {
        match DateTime::from_timestamp_millis(ts_ms) {
            Some(utc) => utc.with_timezone(&Local).date_naive(),
            None => Local::now().date_naive(),
        }
    }
}

/// Manually driven clock with a fixed UTC offset
///
/// Pure function of what the test sets; safe to share between workers.
#[derive(Debug)]
pub struct ManualClock {
    now_ms: AtomicI64,
    offset: FixedOffset,
}

impl ManualClock {
    pub fn new(start_ms: i64) -> Self {
        Self::with_offset(start_ms, Utc.fix())
    }

    pub fn with_offset(start_ms: i64, offset: FixedOffset) -> Self {
        Self {
            now_ms: AtomicI64::new(start_ms),
            offset,
        }
    }

    pub fn set(&self, ts_ms: i64) {
        self.now_ms.store(ts_ms, Ordering::SeqCst);
    }

    pub fn advance(&self, delta_ms: i64) {
        self.now_ms.fetch_add(delta_ms, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now_ms(&self) -> i64 {
        self.now_ms.load(Ordering::SeqCst)
    }

    fn local_date(&self, ts_ms: i64) -> NaiveDate {
        DateTime::from_timestamp_millis(ts_ms)
            .unwrap_or_default()
            .with_timezone(&self.offset)
            .date_naive()
    }
}
