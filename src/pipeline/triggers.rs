//! Independent trigger evaluators
//!
//! Each evaluator is stateful per streamer, consumes `SignalEvent`s of the kind
//! it cares about and emits at most one `TriggerEvent` per event.
//!
//! # Triggers
//! - **viewer_spike**: current viewers >= SPIKE_RATIO x baseline (after warm-up)
//! - **chat_velocity**: velocity > dynamic baseline + BUFFER AND velocity >= ABSOLUTE_THRESHOLD
//! - **keyword**: one configured phrase seen KEYWORD_THRESHOLD times in its window
//! - **emote_flood**: one emote seen EMOTE_THRESHOLD times in its window
//!
//! The cooldown each evaluator keeps is a pre-filter against flooding the
//! combo detector. Admission is decided by the rate limiter.

use super::config::DetectionConfig;
use super::excitement::ExcitementScorer;
use super::types::{ChatMessage, SignalEvent, SignalPayload, TriggerEvent, TriggerKind, TriggerMetadata};
use super::windows::{Baseline, BaselineStats, BaselineWindow, CountWindow, RollingWindow};
use std::collections::HashMap;

pub trait TriggerEvaluator: Send {
    fn kind(&self) -> TriggerKind;

    /// Feed one signal; returns a trigger if this evaluator fires
    fn evaluate(&mut self, event: &SignalEvent) -> Option<TriggerEvent>;
}

/// Last-fired bookkeeping shared by all evaluators
#[derive(Debug, Clone)]
pub struct Cooldown {
    cooldown_ms: i64,
    last_fired: Option<i64>,
}

impl Cooldown {
    pub fn new(cooldown_ms: i64) -> Self {
        Self {
            cooldown_ms,
            last_fired: None,
        }
    }

    pub fn is_ready(&self, timestamp: i64) -> bool {
        match self.last_fired {
            Some(last) => timestamp - last >= self.cooldown_ms,
            None => true,
        }
    }

    pub fn mark(&mut self, timestamp: i64) {
        self.last_fired = Some(timestamp);
    }

    pub fn last_fired(&self) -> Option<i64> {
        self.last_fired
    }
}

// ---------------------------------------------------------------------------
// Viewer spike
// ---------------------------------------------------------------------------

pub struct ViewerSpikeEvaluator {
    baseline: BaselineWindow,
    spike_ratio: f64,
    confidence: f64,
    cooldown: Cooldown,
    last_count: Option<u64>,
}

impl ViewerSpikeEvaluator {
    pub fn new(config: &DetectionConfig) -> Self {
        Self {
            baseline: BaselineWindow::new(
                config.viewer_baseline_window_secs,
                config.viewer_warmup_samples,
            ),
            spike_ratio: config.spike_ratio,
            confidence: config.confidence_for(TriggerKind::ViewerSpike),
            cooldown: Cooldown::new(config.cooldown_ms(TriggerKind::ViewerSpike)),
            last_count: None,
        }
    }

    pub fn last_count(&self) -> Option<u64> {
        self.last_count
    }

    pub fn baseline(&self) -> Baseline {
        self.baseline.baseline()
    }
}

impl TriggerEvaluator for ViewerSpikeEvaluator {
    fn kind(&self) -> TriggerKind {
        TriggerKind::ViewerSpike
    }

    fn evaluate(&mut self, event: &SignalEvent) -> Option<TriggerEvent> {
        let SignalPayload::ViewerCount(sample) = &event.payload else {
            return None;
        };

        self.last_count = Some(sample.count);

        // Compare against the baseline BEFORE the new sample joins it
        self.baseline.advance_to(event.timestamp);
        let baseline = self.baseline.baseline();
        self.baseline.push(sample.count as f64, event.timestamp);

        let Baseline::Ready(mean) = baseline else {
            log::debug!(
                "[viewer] {}: {} viewers (building baseline...)",
                event.streamer,
                sample.count
            );
            return None;
        };

        if mean <= 0.0 {
            return None;
        }

        let current = sample.count as f64;
        let ratio = current / mean;
        log::debug!(
            "[viewer] {}: {} viewers | baseline {:.0} | ratio {:.2}x",
            event.streamer,
            sample.count,
            mean,
            ratio
        );

        if current < self.spike_ratio * mean || !self.cooldown.is_ready(event.timestamp) {
            return None;
        }

        self.cooldown.mark(event.timestamp);

        Some(TriggerEvent {
            streamer: event.streamer.clone(),
            kind: TriggerKind::ViewerSpike,
            timestamp: event.timestamp,
            confidence: self.confidence,
            metadata: TriggerMetadata::ViewerSpike {
                viewer_count: sample.count,
                baseline: mean,
                ratio,
            },
        })
    }
}

// ---------------------------------------------------------------------------
// Chat velocity
// ---------------------------------------------------------------------------

/// Both conditions are required: the dynamic buffer alone must not fire on a
/// tiny channel, and the absolute floor alone must not fire on a loud channel
/// at its normal level.
pub fn velocity_exceeds(velocity: f64, dynamic_baseline: f64, buffer: f64, absolute_threshold: f64) -> bool {
    velocity > dynamic_baseline + buffer && velocity >= absolute_threshold
}

pub struct ChatVelocityEvaluator {
    messages: CountWindow,
    velocity_baseline: BaselineWindow,
    buffer: f64,
    absolute_threshold: f64,
    confidence: f64,
    cooldown: Cooldown,
    window_secs: u64,
    last_velocity: f64,
    last_sample_ts: Option<i64>,
}

/// Minimum spacing between velocity samples fed into the dynamic baseline
const VELOCITY_SAMPLE_INTERVAL_MS: i64 = 1000;

impl ChatVelocityEvaluator {
    pub fn new(config: &DetectionConfig) -> Self {
        Self {
            messages: CountWindow::new(config.chat_window_secs),
            velocity_baseline: BaselineWindow::new(
                config.chat_baseline_window_secs,
                config.chat_warmup_samples,
            ),
            buffer: config.chat_velocity_buffer,
            absolute_threshold: config.chat_velocity_threshold,
            confidence: config.confidence_for(TriggerKind::ChatVelocity),
            cooldown: Cooldown::new(config.cooldown_ms(TriggerKind::ChatVelocity)),
            window_secs: config.chat_window_secs,
            last_velocity: 0.0,
            last_sample_ts: None,
        }
    }

    /// Messages per second over the chat window, as of the last message
    pub fn last_velocity(&self) -> f64 {
        self.last_velocity
    }

    pub fn baseline_stats(&self) -> BaselineStats {
        self.velocity_baseline.stats()
    }
}

impl TriggerEvaluator for ChatVelocityEvaluator {
    fn kind(&self) -> TriggerKind {
        TriggerKind::ChatVelocity
    }

    fn evaluate(&mut self, event: &SignalEvent) -> Option<TriggerEvent> {
        if !matches!(event.payload, SignalPayload::ChatMessage(_)) {
            return None;
        }

        self.messages.record(event.timestamp, 1);
        let velocity = self.messages.rate_per_sec();
        self.last_velocity = velocity;

        self.velocity_baseline.advance_to(event.timestamp);
        let baseline = self.velocity_baseline.baseline();

        // One baseline sample per second, so a burst does not drown its own baseline
        let due = self
            .last_sample_ts
            .map_or(true, |last| event.timestamp - last >= VELOCITY_SAMPLE_INTERVAL_MS);
        if due {
            self.velocity_baseline.push(velocity, event.timestamp);
            self.last_sample_ts = Some(event.timestamp);
        }

        let dynamic_baseline = baseline.value()?;

        if !velocity_exceeds(velocity, dynamic_baseline, self.buffer, self.absolute_threshold)
            || !self.cooldown.is_ready(event.timestamp)
        {
            return None;
        }

        self.cooldown.mark(event.timestamp);

        Some(TriggerEvent {
            streamer: event.streamer.clone(),
            kind: TriggerKind::ChatVelocity,
            timestamp: event.timestamp,
            confidence: self.confidence,
            metadata: TriggerMetadata::ChatVelocity {
                velocity,
                dynamic_baseline,
                message_count: self.messages.count(),
                window_secs: self.window_secs,
            },
        })
    }
}

// ---------------------------------------------------------------------------
// Keyword
// ---------------------------------------------------------------------------

struct KeywordCounter {
    keyword: String,
    upper: String,
    hits: CountWindow,
}

pub struct KeywordEvaluator {
    counters: Vec<KeywordCounter>,
    threshold: usize,
    confidence: f64,
    cooldown: Cooldown,
    scorer: ExcitementScorer,
}

impl KeywordEvaluator {
    pub fn new(config: &DetectionConfig) -> Self {
        Self {
            counters: config
                .keywords
                .iter()
                .map(|keyword| KeywordCounter {
                    keyword: keyword.clone(),
                    upper: keyword.to_uppercase(),
                    hits: CountWindow::new(config.keyword_window_secs),
                })
                .collect(),
            threshold: config.keyword_threshold,
            confidence: config.confidence_for(TriggerKind::Keyword),
            cooldown: Cooldown::new(config.cooldown_ms(TriggerKind::Keyword)),
            scorer: ExcitementScorer::new(config),
        }
    }

    /// Current in-window hit count for a configured keyword
    pub fn count(&self, keyword: &str) -> usize {
        self.counters
            .iter()
            .find(|c| c.keyword == keyword)
            .map_or(0, |c| c.hits.count())
    }
}

impl TriggerEvaluator for KeywordEvaluator {
    fn kind(&self) -> TriggerKind {
        TriggerKind::Keyword
    }

    fn evaluate(&mut self, event: &SignalEvent) -> Option<TriggerEvent> {
        let SignalPayload::ChatMessage(message) = &event.payload else {
            return None;
        };

        let upper = message.content.to_uppercase();
        let ready = self.cooldown.is_ready(event.timestamp);
        let mut fired: Option<(String, usize)> = None;

        for counter in self.counters.iter_mut() {
            counter.hits.advance_to(event.timestamp);
            if !upper.contains(counter.upper.as_str()) {
                continue;
            }

            counter.hits.record(event.timestamp, 1);

            if ready && fired.is_none() && counter.hits.count() >= self.threshold {
                fired = Some((counter.keyword.clone(), counter.hits.count()));
                // Start counting afresh after a trigger
                counter.hits.clear();
            }
        }

        let (keyword, count) = fired?;
        self.cooldown.mark(event.timestamp);

        let excitement = self.scorer.check_message(&message.content);

        Some(TriggerEvent {
            streamer: event.streamer.clone(),
            kind: TriggerKind::Keyword,
            timestamp: event.timestamp,
            confidence: self.confidence,
            metadata: TriggerMetadata::Keyword {
                keyword,
                count,
                threshold: self.threshold,
                excitement_score: excitement.score,
            },
        })
    }
}

// ---------------------------------------------------------------------------
// Emote flood
// ---------------------------------------------------------------------------

pub struct EmoteFloodEvaluator {
    counts: HashMap<String, CountWindow>,
    window_secs: u64,
    threshold: usize,
    confidence: f64,
    cooldown: Cooldown,
    scorer: ExcitementScorer,
}

impl EmoteFloodEvaluator {
    pub fn new(config: &DetectionConfig) -> Self {
        Self {
            counts: HashMap::new(),
            window_secs: config.emote_window_secs,
            threshold: config.emote_threshold,
            confidence: config.confidence_for(TriggerKind::EmoteFlood),
            cooldown: Cooldown::new(config.cooldown_ms(TriggerKind::EmoteFlood)),
            scorer: ExcitementScorer::new(config),
        }
    }

    /// Emotes carried by the adapter, or excitement emotes found in the text
    fn emotes_in(&self, message: &ChatMessage) -> Vec<String> {
        if message.emotes.is_empty() {
            self.scorer.emote_tokens(&message.content)
        } else {
            message.emotes.clone()
        }
    }

    pub fn count(&self, emote: &str) -> usize {
        self.counts.get(emote).map_or(0, |w| w.count())
    }
}

impl TriggerEvaluator for EmoteFloodEvaluator {
    fn kind(&self) -> TriggerKind {
        TriggerKind::EmoteFlood
    }

    fn evaluate(&mut self, event: &SignalEvent) -> Option<TriggerEvent> {
        let SignalPayload::ChatMessage(message) = &event.payload else {
            return None;
        };

        for window in self.counts.values_mut() {
            window.advance_to(event.timestamp);
        }
        self.counts.retain(|_, window| !window.is_empty());

        for emote in self.emotes_in(message) {
            let window_secs = self.window_secs;
            self.counts
                .entry(emote)
                .or_insert_with(|| CountWindow::new(window_secs))
                .record(event.timestamp, 1);
        }

        if !self.cooldown.is_ready(event.timestamp) {
            return None;
        }

        // Most repeated emote; ties broken by name for determinism
        let (emote, count) = self
            .counts
            .iter()
            .map(|(emote, window)| (emote.clone(), window.count()))
            .max_by(|a, b| a.1.cmp(&b.1).then_with(|| b.0.cmp(&a.0)))?;

        if count < self.threshold {
            return None;
        }

        self.cooldown.mark(event.timestamp);
        self.counts.remove(&emote);

        let excitement = self.scorer.check_message(&message.content);

        Some(TriggerEvent {
            streamer: event.streamer.clone(),
            kind: TriggerKind::EmoteFlood,
            timestamp: event.timestamp,
            confidence: self.confidence,
            metadata: TriggerMetadata::EmoteFlood {
                emote,
                count,
                threshold: self.threshold,
                excitement_score: excitement.score,
            },
        })
    }
}
