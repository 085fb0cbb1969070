//! Multi-trigger combo fusion
//!
//! Keeps a sliding history of raw triggers per streamer. Each new trigger is
//! checked against the fusion rules in strict priority order:
//!
//! | Combo         | Condition                                  | Confidence |
//! |---------------|--------------------------------------------|------------|
//! | `super_combo` | >= 3 distinct trigger types                | 0.95       |
//! | `clip_worthy` | chat-category + viewer_spike               | 0.85       |
//! | `hype_moment` | chat-category + emote_flood                | 0.80       |
//! | `chat_combo`  | >= 2 distinct chat-category types          | 0.70       |
//!
//! Constituents of a fired combo are marked consumed and never take part in
//! another combo. Raw triggers stay pending until they leave the window; only
//! then are they released for independent dispatch (consumed ones only under
//! `ConsumedTriggerPolicy::AlsoDispatch`).

use super::config::{ConsumedTriggerPolicy, DetectionConfig};
use super::types::{TriggerEvent, TriggerKind, TriggerMetadata};
use std::collections::{BTreeSet, VecDeque};

#[derive(Debug, Clone)]
struct PendingTrigger {
    event: TriggerEvent,
    consumed: bool,
}

/// Result of observing one raw trigger
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ComboOutcome {
    pub combo: Option<TriggerEvent>,
    /// Raw triggers that left the window, oldest first
    pub released: Vec<TriggerEvent>,
}

pub struct ComboDetector {
    history: VecDeque<PendingTrigger>,
    window_ms: i64,
    window_secs: u64,
    policy: ConsumedTriggerPolicy,
    confidences: [(TriggerKind, f64); 4],
}

impl ComboDetector {
    pub fn new(config: &DetectionConfig) -> Self {
        let combo_confidence = |kind| (kind, config.confidence_for(kind));
        Self {
            history: VecDeque::new(),
            window_ms: config.combo_window_ms(),
            window_secs: config.combo_window_secs,
            policy: config.consumed_trigger_policy,
            confidences: [
                combo_confidence(TriggerKind::SuperCombo),
                combo_confidence(TriggerKind::ClipWorthy),
                combo_confidence(TriggerKind::HypeMoment),
                combo_confidence(TriggerKind::ChatCombo),
            ],
        }
    }

    /// Add a raw trigger to the history and run the fusion rules.
    ///
    /// Expired entries (relative to the trigger's timestamp) are released first,
    /// so they never fuse with the new trigger.
    pub fn observe(&mut self, trigger: TriggerEvent) -> ComboOutcome {
        self.observe_all(vec![trigger])
    }

    /// Add every raw trigger one signal produced, then fuse once.
    ///
    /// Triggers fired by the same signal must enter the history together,
    /// otherwise the first pair would fuse into a weaker combo before the
    /// rest are visible.
    pub fn observe_all(&mut self, triggers: Vec<TriggerEvent>) -> ComboOutcome {
        let Some(now) = triggers.iter().map(|t| t.timestamp).max() else {
            return ComboOutcome::default();
        };
        let released = self.flush_expired(now);

        let mut streamer = None;
        for trigger in triggers {
            if trigger.kind.is_combo() {
                log::warn!("⚠️  combo trigger {} fed back into combo detector, ignoring", trigger);
                continue;
            }
            streamer = Some(trigger.streamer.clone());
            self.history.push_back(PendingTrigger {
                event: trigger,
                consumed: false,
            });
        }

        let combo = streamer.and_then(|streamer| self.fuse(&streamer, now));
        ComboOutcome { combo, released }
    }

    fn fuse(&mut self, streamer: &str, now: i64) -> Option<TriggerEvent> {
        let present: BTreeSet<TriggerKind> = self
            .history
            .iter()
            .filter(|p| !p.consumed)
            .map(|p| p.event.kind)
            .collect();

        let has_chat = present.iter().any(|k| k.is_chat_category());
        let chat_kinds = present.iter().filter(|k| k.is_chat_category()).count();

        // Priority order: first match wins
        let (kind, members): (TriggerKind, Vec<TriggerKind>) = if present.len() >= 3 {
            (TriggerKind::SuperCombo, present.iter().copied().collect())
        } else if has_chat && present.contains(&TriggerKind::ViewerSpike) {
            (TriggerKind::ClipWorthy, Self::with_chat(&present, TriggerKind::ViewerSpike))
        } else if has_chat && present.contains(&TriggerKind::EmoteFlood) {
            (TriggerKind::HypeMoment, Self::with_chat(&present, TriggerKind::EmoteFlood))
        } else if chat_kinds >= 2 {
            (TriggerKind::ChatCombo, vec![TriggerKind::ChatVelocity, TriggerKind::Keyword])
        } else {
            return None;
        };

        let mut constituent_count = 0;
        for pending in self.history.iter_mut().filter(|p| !p.consumed) {
            if members.contains(&pending.event.kind) {
                pending.consumed = true;
                constituent_count += 1;
            }
        }

        let confidence = self
            .confidences
            .iter()
            .find(|(k, _)| *k == kind)
            .map_or(0.0, |(_, c)| *c);

        log::info!(
            "🔥 {} combo for {}: {:?} ({} triggers)",
            kind,
            streamer,
            members,
            constituent_count
        );

        Some(TriggerEvent {
            streamer: streamer.to_string(),
            kind,
            timestamp: now,
            confidence,
            metadata: TriggerMetadata::Combo {
                constituents: members,
                constituent_count,
                window_secs: self.window_secs,
            },
        })
    }

    fn with_chat(present: &BTreeSet<TriggerKind>, other: TriggerKind) -> Vec<TriggerKind> {
        present
            .iter()
            .copied()
            .filter(|k| k.is_chat_category() || *k == other)
            .collect()
    }

    /// Release every pending trigger older than `now - window`
    pub fn flush_expired(&mut self, now: i64) -> Vec<TriggerEvent> {
        let cutoff = now - self.window_ms;
        if !self.history.iter().any(|p| p.event.timestamp < cutoff) {
            return Vec::new();
        }

        let (expired, kept): (Vec<_>, Vec<_>) = self
            .history
            .drain(..)
            .partition(|p| p.event.timestamp < cutoff);
        self.history = kept.into();

        self.release(expired)
    }

    /// Release everything still pending (streamer shutdown)
    pub fn drain_all(&mut self) -> Vec<TriggerEvent> {
        let pending: Vec<_> = self.history.drain(..).collect();
        self.release(pending)
    }

    fn release(&self, entries: Vec<PendingTrigger>) -> Vec<TriggerEvent> {
        entries
            .into_iter()
            .filter(|p| !p.consumed || self.policy == ConsumedTriggerPolicy::AlsoDispatch)
            .map(|p| p.event)
            .collect()
    }

    /// Number of raw triggers still inside the window (consumed or not)
    pub fn pending_len(&self) -> usize {
        self.history.len()
    }
}
