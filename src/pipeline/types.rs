//! Core data types flowing through the detection pipeline
//!
//! ```text
//! SignalEvent (viewer sample | chat message)
//!     ↓
//! TriggerEvent (raw: viewer_spike, chat_velocity, keyword, emote_flood)
//!     ↓
//! TriggerEvent (combo: chat_combo, hype_moment, clip_worthy, super_combo)
//!     ↓
//! ClipRequest + MomentRecord
//! ```
//!
//! All timestamps are Unix milliseconds.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Unix timestamp in milliseconds
pub type TimestampMs = i64;

/// Polled viewer count for a live stream
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ViewerCountSample {
    pub count: u64,
}

/// Push-delivered chat message
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ChatMessage {
    pub content: String,
    /// Emote names as delivered by the chat adapter (may repeat)
    pub emotes: Vec<String>,
    pub sender: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SignalKind {
    ViewerCount,
    ChatMessage,
}

#[derive(Debug, Clone, PartialEq)]
pub enum SignalPayload {
    ViewerCount(ViewerCountSample),
    ChatMessage(ChatMessage),
}

/// One observation produced by a viewer poller or chat listener.
///
/// Immutable once created; consumed by the owning streamer's worker.
#[derive(Debug, Clone, PartialEq)]
pub struct SignalEvent {
    pub streamer: String,
    pub timestamp: TimestampMs,
    pub payload: SignalPayload,
}

impl SignalEvent {
    pub fn viewer_count(streamer: &str, count: u64, timestamp: TimestampMs) -> Self {
        Self {
            streamer: streamer.to_string(),
            timestamp,
            payload: SignalPayload::ViewerCount(ViewerCountSample { count }),
        }
    }

    pub fn chat(streamer: &str, timestamp: TimestampMs, content: &str, emotes: Vec<String>) -> Self {
        Self {
            streamer: streamer.to_string(),
            timestamp,
            payload: SignalPayload::ChatMessage(ChatMessage {
                content: content.to_string(),
                emotes,
                sender: None,
            }),
        }
    }

    pub fn kind(&self) -> SignalKind {
        match self.payload {
            SignalPayload::ViewerCount(_) => SignalKind::ViewerCount,
            SignalPayload::ChatMessage(_) => SignalKind::ChatMessage,
        }
    }
}

/// Every trigger type the pipeline can emit, raw and fused
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerKind {
    ViewerSpike,
    ChatVelocity,
    Keyword,
    EmoteFlood,
    ChatCombo,
    HypeMoment,
    ClipWorthy,
    SuperCombo,
}

impl TriggerKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TriggerKind::ViewerSpike => "viewer_spike",
            TriggerKind::ChatVelocity => "chat_velocity",
            TriggerKind::Keyword => "keyword",
            TriggerKind::EmoteFlood => "emote_flood",
            TriggerKind::ChatCombo => "chat_combo",
            TriggerKind::HypeMoment => "hype_moment",
            TriggerKind::ClipWorthy => "clip_worthy",
            TriggerKind::SuperCombo => "super_combo",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        Self::all().into_iter().find(|kind| kind.as_str() == s)
    }

    pub fn all() -> [TriggerKind; 8] {
        [
            TriggerKind::ViewerSpike,
            TriggerKind::ChatVelocity,
            TriggerKind::Keyword,
            TriggerKind::EmoteFlood,
            TriggerKind::ChatCombo,
            TriggerKind::HypeMoment,
            TriggerKind::ClipWorthy,
            TriggerKind::SuperCombo,
        ]
    }

    pub fn is_combo(&self) -> bool {
        matches!(
            self,
            TriggerKind::ChatCombo
                | TriggerKind::HypeMoment
                | TriggerKind::ClipWorthy
                | TriggerKind::SuperCombo
        )
    }

    /// Chat-category triggers: chat_velocity and keyword
    pub fn is_chat_category(&self) -> bool {
        matches!(self, TriggerKind::ChatVelocity | TriggerKind::Keyword)
    }
}

impl fmt::Display for TriggerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Strongly-typed payload carried by each trigger variant
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TriggerMetadata {
    ViewerSpike {
        viewer_count: u64,
        baseline: f64,
        ratio: f64,
    },
    ChatVelocity {
        velocity: f64,
        dynamic_baseline: f64,
        message_count: usize,
        window_secs: u64,
    },
    Keyword {
        keyword: String,
        count: usize,
        threshold: usize,
        excitement_score: f64,
    },
    EmoteFlood {
        emote: String,
        count: usize,
        threshold: usize,
        excitement_score: f64,
    },
    Combo {
        constituents: Vec<TriggerKind>,
        constituent_count: usize,
        window_secs: u64,
    },
}

/// A detected moment. Immutable once emitted.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TriggerEvent {
    pub streamer: String,
    pub kind: TriggerKind,
    pub timestamp: TimestampMs,
    pub confidence: f64,
    pub metadata: TriggerMetadata,
}

impl fmt::Display for TriggerEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}] {} @ {} (confidence {:.2})",
            self.kind, self.streamer, self.timestamp, self.confidence
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ClipPriority {
    Normal,
    High,
}

/// Request handed to the clip-extraction subsystem
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ClipRequest {
    pub streamer: String,
    pub trigger: TriggerEvent,
    pub window_start: TimestampMs,
    pub window_end: TimestampMs,
    pub priority: ClipPriority,
}

impl ClipRequest {
    pub fn trigger_kind(&self) -> TriggerKind {
        self.trigger.kind
    }

    pub fn confidence(&self) -> f64 {
        self.trigger.confidence
    }

    pub fn duration_ms(&self) -> i64 {
        self.window_end - self.window_start
    }
}

/// Row for the `moments` table, keyed by monitoring session
#[derive(Debug, Clone, PartialEq)]
pub struct MomentRecord {
    pub session_id: i64,
    pub stream_elapsed_seconds: f64,
    pub trigger_type: TriggerKind,
    pub trigger_data: serde_json::Value,
    pub processed: bool,
    pub clip_path: Option<String>,
    /// Trigger time the moment was recorded for
    pub created_at: TimestampMs,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_trigger_kind_round_trips_through_str() {
        for kind in TriggerKind::all() {
            assert_eq!(TriggerKind::from_str(kind.as_str()), Some(kind));
        }
        assert_eq!(TriggerKind::from_str("combo"), None);
    }

    #[test]
    fn test_categories() {
        assert!(TriggerKind::Keyword.is_chat_category());
        assert!(TriggerKind::ChatVelocity.is_chat_category());
        assert!(!TriggerKind::EmoteFlood.is_chat_category());
        assert!(TriggerKind::SuperCombo.is_combo());
        assert!(!TriggerKind::ViewerSpike.is_combo());
    }

    #[test]
    fn test_metadata_serializes_with_tag() {
        let metadata = TriggerMetadata::ViewerSpike {
            viewer_count: 3200,
            baseline: 1000.0,
            ratio: 3.2,
        };
        let json = serde_json::to_value(&metadata).unwrap();
        assert_eq!(json["kind"], "viewer_spike");
        assert_eq!(json["viewer_count"], 3200);
    }
}
