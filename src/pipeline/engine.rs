//! Per-streamer detection context
//!
//! `StreamerContext` owns every piece of mutable state for one streamer:
//! baselines, evaluator windows, the combo history and the cooldown state.
//! It is driven by exactly one worker task, so none of it is shared.
//!
//! ## Flow
//!
//! ```text
//! SignalEvent
//!     ↓
//! StreamerContext::process()
//!     ↓
//! evaluators (viewer_spike, chat_velocity, keyword, emote_flood)
//!     ↓
//! ComboDetector::observe()  ──→ combo (immediate)
//!     ↓                            ↓
//! released raw triggers ──────→ RateLimiter::admit()
//!                                  ↓
//!                           Vec<AdmittedTrigger>  (dispatched by the worker)
//! ```

use super::clock::Clock;
use super::combo::ComboDetector;
use super::config::DetectionConfig;
use super::rate_limiter::{Admission, DailyCount, RateLimiter};
use super::triggers::{
    ChatVelocityEvaluator, EmoteFloodEvaluator, KeywordEvaluator, TriggerEvaluator, ViewerSpikeEvaluator,
};
use super::types::{ClipPriority, SignalEvent, SignalPayload, TriggerEvent};
use super::windows::{Baseline, BaselineStats};
use serde::Serialize;
use std::collections::VecDeque;
use std::sync::Arc;

/// Number of triggers kept in `StreamerStatus::recent_triggers`
pub const RECENT_TRIGGER_LIMIT: usize = 20;

/// Worker lifecycle: `Idle → Monitoring → Evaluating → {Dispatching | Monitoring}`,
/// `Dispatching → Monitoring`, terminal `Stopped`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MonitorState {
    Idle,
    Monitoring,
    Evaluating,
    Dispatching,
    Stopped,
}

/// Live snapshot of one streamer, published by its worker
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StreamerStatus {
    pub streamer: String,
    pub state: MonitorState,
    pub last_viewer_count: Option<u64>,
    pub chat_velocity_per_min: f64,
    pub clips_today: u32,
    /// Newest last, at most `RECENT_TRIGGER_LIMIT`
    pub recent_triggers: VecDeque<TriggerEvent>,
    pub pending_triggers: usize,
}

impl StreamerStatus {
    pub fn new(streamer: &str) -> Self {
        Self {
            streamer: streamer.to_string(),
            state: MonitorState::Idle,
            last_viewer_count: None,
            chat_velocity_per_min: 0.0,
            clips_today: 0,
            recent_triggers: VecDeque::new(),
            pending_triggers: 0,
        }
    }
}

/// A trigger that passed admission and must now be dispatched
#[derive(Debug, Clone, PartialEq)]
pub struct AdmittedTrigger {
    pub trigger: TriggerEvent,
    pub priority: ClipPriority,
    /// Daily counter after this admission (persisted with the moment)
    pub daily: DailyCount,
}

/// Everything one step of the context produced
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Evaluation {
    /// Triggers emitted by the evaluators and the combo detector this step
    pub fired: Vec<TriggerEvent>,
    pub admitted: Vec<AdmittedTrigger>,
    pub rejected: Vec<(TriggerEvent, Admission)>,
}

pub struct StreamerContext {
    streamer: String,
    viewer_spike: ViewerSpikeEvaluator,
    chat_velocity: ChatVelocityEvaluator,
    keyword: KeywordEvaluator,
    emote_flood: EmoteFloodEvaluator,
    combo: ComboDetector,
    limiter: RateLimiter,
    status: StreamerStatus,
    /// Newest signal timestamp seen; drives combo expiry
    high_watermark: Option<i64>,
}

impl StreamerContext {
    /// Build a fresh context
    ///
    /// # Arguments
    /// * `stored_daily` - Daily counter loaded from storage (restart safety)
    /// * `today` - Local date at start, used to roll a stale counter
    pub fn new(
        streamer: &str,
        config: Arc<DetectionConfig>,
        stored_daily: Option<DailyCount>,
        today: chrono::NaiveDate,
    ) -> Self {
        let limiter = RateLimiter::new(config.clone(), stored_daily, today);
        let mut status = StreamerStatus::new(streamer);
        status.clips_today = limiter.daily_count().count;

        Self {
            streamer: streamer.to_string(),
            viewer_spike: ViewerSpikeEvaluator::new(&config),
            chat_velocity: ChatVelocityEvaluator::new(&config),
            keyword: KeywordEvaluator::new(&config),
            emote_flood: EmoteFloodEvaluator::new(&config),
            combo: ComboDetector::new(&config),
            limiter,
            status,
            high_watermark: None,
        }
    }

    pub fn streamer(&self) -> &str {
        &self.streamer
    }

    /// Run one signal through evaluators, combo fusion and admission
    pub fn process(&mut self, event: &SignalEvent, clock: &dyn Clock) -> Evaluation {
        if event.streamer != self.streamer {
            log::warn!(
                "⚠️  {} received a signal for {}, ignoring",
                self.streamer,
                event.streamer
            );
            return Evaluation::default();
        }

        let now = self.high_watermark.map_or(event.timestamp, |hw| hw.max(event.timestamp));
        self.high_watermark = Some(now);

        let mut candidates = self.combo.flush_expired(now);
        let mut fired = Vec::new();

        let evaluators: [&mut dyn TriggerEvaluator; 4] = [
            &mut self.viewer_spike,
            &mut self.chat_velocity,
            &mut self.keyword,
            &mut self.emote_flood,
        ];
        let raw: Vec<TriggerEvent> = evaluators
            .into_iter()
            .filter_map(|evaluator| evaluator.evaluate(event))
            .collect();

        for trigger in &raw {
            log::info!("⚡ Trigger: {}", trigger);
        }
        fired.extend(raw.iter().cloned());

        let outcome = self.combo.observe_all(raw);
        // Older released raw triggers are admitted before the fresh combo
        candidates.extend(outcome.released);
        if let Some(combo) = outcome.combo {
            fired.push(combo.clone());
            candidates.push(combo);
        }

        self.update_signal_status(event);
        let mut evaluation = self.admit_all(candidates, clock);
        evaluation.fired = fired;
        self.record_recent(&evaluation.fired);
        evaluation
    }

    /// Release raw triggers whose combo window has passed as of `now_ms`
    pub fn tick(&mut self, now_ms: i64, clock: &dyn Clock) -> Evaluation {
        let released = self.combo.flush_expired(now_ms);
        self.admit_all(released, clock)
    }

    /// Release every pending raw trigger (stop / shutdown)
    pub fn drain(&mut self, clock: &dyn Clock) -> Evaluation {
        let released = self.combo.drain_all();
        self.admit_all(released, clock)
    }

    fn admit_all(&mut self, candidates: Vec<TriggerEvent>, clock: &dyn Clock) -> Evaluation {
        let mut evaluation = Evaluation::default();

        for trigger in candidates {
            let today = clock.local_date(trigger.timestamp);
            match self.limiter.admit(&trigger, today) {
                Admission::Accepted {
                    bypassed_cooldown,
                    clips_today,
                } => {
                    log::debug!(
                        "✅ Admitted {} ({} today{})",
                        trigger,
                        clips_today,
                        if bypassed_cooldown { ", priority" } else { "" }
                    );
                    let priority = if bypassed_cooldown {
                        ClipPriority::High
                    } else {
                        ClipPriority::Normal
                    };
                    evaluation.admitted.push(AdmittedTrigger {
                        trigger,
                        priority,
                        daily: self.limiter.daily_count(),
                    });
                }
                rejection => {
                    log::debug!("⏸️  Rejected {}: {:?}", trigger, rejection);
                    evaluation.rejected.push((trigger, rejection));
                }
            }
        }

        self.status.clips_today = self.limiter.daily_count().count;
        self.status.pending_triggers = self.combo.pending_len();
        evaluation
    }

    fn update_signal_status(&mut self, event: &SignalEvent) {
        match &event.payload {
            SignalPayload::ViewerCount(sample) => self.status.last_viewer_count = Some(sample.count),
            SignalPayload::ChatMessage(_) => {
                self.status.chat_velocity_per_min = self.chat_velocity.last_velocity() * 60.0
            }
        }
    }

    fn record_recent(&mut self, triggers: &[TriggerEvent]) {
        for trigger in triggers {
            if self.status.recent_triggers.len() == RECENT_TRIGGER_LIMIT {
                self.status.recent_triggers.pop_front();
            }
            self.status.recent_triggers.push_back(trigger.clone());
        }
    }

    pub fn set_state(&mut self, state: MonitorState) {
        self.status.state = state;
    }

    pub fn status(&self) -> &StreamerStatus {
        &self.status
    }

    pub fn daily_count(&self) -> DailyCount {
        self.limiter.daily_count()
    }

    pub fn viewer_baseline(&self) -> Baseline {
        self.viewer_spike.baseline()
    }

    pub fn chat_baseline_stats(&self) -> BaselineStats {
        self.chat_velocity.baseline_stats()
    }

    pub fn pending_triggers(&self) -> usize {
        self.combo.pending_len()
    }
}
