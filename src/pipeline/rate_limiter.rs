//! Admission control: per-type cooldowns and the daily clip cap
//!
//! Rules, applied to every raw or combo trigger:
//! 1. Priority triggers (confidence >= HIGH_PRIORITY_CONFIDENCE, any combo,
//!    or viewer_spike) bypass the per-type cooldown.
//! 2. Otherwise reject if `now - last_dispatch[type] < cooldown[type]`.
//! 3. Reject if today's count has reached MAX_CLIPS_PER_DAY. Never bypassed.
//! 4. On acceptance record `last_dispatch[type] = now` and bump the count.
//!
//! `now` is the trigger's own timestamp. The daily count rolls over by
//! comparing the stored date against the local date of the trigger, so a
//! restart neither repeats nor skips a reset.

use super::config::DetectionConfig;
use super::types::{TriggerEvent, TriggerKind};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;

/// Clips dispatched on one local calendar day
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DailyCount {
    pub date: NaiveDate,
    pub count: u32,
}

impl DailyCount {
    pub fn new(date: NaiveDate) -> Self {
        Self { date, count: 0 }
    }
}

/// Per-streamer admission bookkeeping
#[derive(Debug, Clone)]
pub struct CooldownState {
    last_dispatch: HashMap<TriggerKind, i64>,
    daily: DailyCount,
}

impl CooldownState {
    pub fn last_dispatch(&self, kind: TriggerKind) -> Option<i64> {
        self.last_dispatch.get(&kind).copied()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    Accepted {
        bypassed_cooldown: bool,
        clips_today: u32,
    },
    RejectedCooldown {
        remaining_ms: i64,
    },
    RejectedDailyCap {
        cap: u32,
    },
}

impl Admission {
    pub fn is_accepted(&self) -> bool {
        matches!(self, Admission::Accepted { .. })
    }
}

pub struct RateLimiter {
    config: Arc<DetectionConfig>,
    state: CooldownState,
}

impl RateLimiter {
    /// Create a limiter for one streamer
    ///
    /// # Arguments
    /// * `stored` - Daily count loaded from storage, if any
    /// * `today` - Local date at monitoring start
    pub fn new(config: Arc<DetectionConfig>, stored: Option<DailyCount>, today: NaiveDate) -> Self {
        let mut limiter = Self {
            config,
            state: CooldownState {
                last_dispatch: HashMap::new(),
                daily: stored.unwrap_or_else(|| DailyCount::new(today)),
            },
        };
        limiter.roll_day(today);
        limiter
    }

    /// Reset the daily count if `today` is later than the stored date.
    ///
    /// Idempotent: calling it repeatedly with the same date changes nothing.
    pub fn roll_day(&mut self, today: NaiveDate) -> bool {
        if today > self.state.daily.date {
            log::info!(
                "📅 Daily clip count reset ({} -> {}, was {})",
                self.state.daily.date,
                today,
                self.state.daily.count
            );
            self.state.daily = DailyCount::new(today);
            return true;
        }
        false
    }

    pub fn is_priority(&self, trigger: &TriggerEvent) -> bool {
        trigger.confidence >= self.config.high_priority_confidence
            || trigger.kind.is_combo()
            || trigger.kind == TriggerKind::ViewerSpike
    }

    /// Decide whether `trigger` may be dispatched; records it if accepted
    pub fn admit(&mut self, trigger: &TriggerEvent, today: NaiveDate) -> Admission {
        self.roll_day(today);

        let now = trigger.timestamp;
        let bypass = self.is_priority(trigger);

        if !bypass {
            if let Some(last) = self.state.last_dispatch(trigger.kind) {
                let cooldown = self.config.cooldown_ms(trigger.kind);
                let elapsed = now - last;
                if elapsed < cooldown {
                    return Admission::RejectedCooldown {
                        remaining_ms: cooldown - elapsed,
                    };
                }
            }
        }

        let cap = self.config.max_clips_per_day;
        if self.state.daily.count >= cap {
            return Admission::RejectedDailyCap { cap };
        }

        let last = self.state.last_dispatch.entry(trigger.kind).or_insert(now);
        *last = (*last).max(now);
        self.state.daily.count += 1;

        Admission::Accepted {
            bypassed_cooldown: bypass,
            clips_today: self.state.daily.count,
        }
    }

    pub fn daily_count(&self) -> DailyCount {
        self.state.daily
    }

    pub fn state(&self) -> &CooldownState {
        &self.state
    }
}
