//! Detection and runtime configuration from environment variables
//!
//! `DetectionConfig` is loaded once, validated, wrapped in an `Arc` and
//! handed to every component at construction. Nothing mutates it afterwards.

use super::types::TriggerKind;
use crate::error::ConfigError;
use std::env;
use std::str::FromStr;

/// What happens to raw triggers that were absorbed into a combo
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsumedTriggerPolicy {
    /// Consumed triggers never attempt dispatch on their own (default)
    Exclude,
    /// Consumed triggers are still released to the rate limiter as raw triggers
    AlsoDispatch,
}

/// Per-type cooldowns in seconds
#[derive(Debug, Clone, PartialEq)]
pub struct TriggerCooldowns {
    pub viewer_spike: u64,
    pub chat_velocity: u64,
    pub keyword: u64,
    pub emote_flood: u64,
}

impl Default for TriggerCooldowns {
    fn default() -> Self {
        Self {
            viewer_spike: 60,
            chat_velocity: 120,
            keyword: 90,
            emote_flood: 90,
        }
    }
}

/// Fixed confidence scalar per trigger type
#[derive(Debug, Clone, PartialEq)]
pub struct TriggerConfidences {
    pub viewer_spike: f64,
    pub chat_velocity: f64,
    pub keyword: f64,
    pub emote_flood: f64,
    pub chat_combo: f64,
    pub hype_moment: f64,
    pub clip_worthy: f64,
    pub super_combo: f64,
}

impl Default for TriggerConfidences {
    fn default() -> Self {
        Self {
            viewer_spike: 0.75,
            chat_velocity: 0.60,
            keyword: 0.65,
            emote_flood: 0.60,
            chat_combo: 0.70,
            hype_moment: 0.80,
            clip_worthy: 0.85,
            super_combo: 0.95,
        }
    }
}

/// Every threshold, window, cooldown and limit the detection engine uses
#[derive(Debug, Clone, PartialEq)]
pub struct DetectionConfig {
    // Viewer spike
    pub spike_ratio: f64,
    pub viewer_baseline_window_secs: u64,
    pub viewer_warmup_samples: usize,
    pub viewer_poll_interval_secs: u64,
    /// Consecutive failed/offline polls before the streamer is stopped
    pub max_poll_failures: u32,

    // Chat velocity
    pub chat_window_secs: u64,
    pub chat_baseline_window_secs: u64,
    pub chat_warmup_samples: usize,
    pub chat_velocity_buffer: f64,
    pub chat_velocity_threshold: f64,

    // Keyword / emote
    pub keywords: Vec<String>,
    pub keyword_window_secs: u64,
    pub keyword_threshold: usize,
    pub emote_window_secs: u64,
    pub emote_threshold: usize,
    pub excitement_emotes: Vec<String>,
    pub excitement_phrases: Vec<String>,

    // Combo + dispatch
    pub combo_window_secs: u64,
    pub consumed_trigger_policy: ConsumedTriggerPolicy,
    pub clip_before_secs: u64,
    pub clip_after_secs: u64,
    pub max_clips_per_day: u32,
    pub high_priority_confidence: f64,

    pub cooldowns: TriggerCooldowns,
    pub confidences: TriggerConfidences,
}

fn strings(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

impl Default for DetectionConfig {
    fn default() -> Self {
        Self {
            spike_ratio: 3.0,
            viewer_baseline_window_secs: 60,
            viewer_warmup_samples: 3,
            viewer_poll_interval_secs: 10,
            max_poll_failures: 30,

            chat_window_secs: 10,
            chat_baseline_window_secs: 300,
            chat_warmup_samples: 5,
            chat_velocity_buffer: 2.0,
            chat_velocity_threshold: 15.0,

            keywords: strings(&[
                "CLIP IT",
                "CLIP THAT",
                "SOMEONE CLIP",
                "GET THAT CLIP",
                "NO SHOT",
                "INSANE",
                "HOLY SHIT",
                "WHAT THE FUCK",
            ]),
            keyword_window_secs: 10,
            keyword_threshold: 8,
            emote_window_secs: 10,
            emote_threshold: 15,
            excitement_emotes: strings(&[
                "KEKW", "LUL", "OMEGALUL", "PogChamp", "Pog", "POGGERS", "monkaW", "monkaS",
                "LULW", "PepeLaugh",
            ]),
            excitement_phrases: strings(&[
                "NO SHOT", "WHAT", "HOW", "BRO", "DUDE", "HOLY", "WTF", "OMG", "LETS GO",
                "NO WAY", "INSANE", "CLIP IT", "CLIP THAT",
            ]),

            combo_window_secs: 10,
            consumed_trigger_policy: ConsumedTriggerPolicy::Exclude,
            clip_before_secs: 20,
            clip_after_secs: 25,
            max_clips_per_day: 50,
            high_priority_confidence: 0.9,

            cooldowns: TriggerCooldowns::default(),
            confidences: TriggerConfidences::default(),
        }
    }
}

/// Parse `var` from the lookup, falling back to `default` when unset.
///
/// A set-but-unparseable value is a configuration error, never a silent default.
fn parse_var<T: FromStr>(
    lookup: &dyn Fn(&str) -> Option<String>,
    var: &str,
    default: T,
) -> Result<T, ConfigError> {
    match lookup(var) {
        None => Ok(default),
        Some(raw) => raw.trim().parse::<T>().map_err(|_| ConfigError::InvalidValue {
            var: var.to_string(),
            value: raw,
        }),
    }
}

fn parse_list(lookup: &dyn Fn(&str) -> Option<String>, var: &str, default: Vec<String>) -> Vec<String> {
    lookup(var)
        .map(|s| {
            s.split(',')
                .map(|item| item.trim().to_string())
                .filter(|item| !item.is_empty())
                .collect()
        })
        .unwrap_or(default)
}

impl DetectionConfig {
    /// Load configuration from environment variables
    ///
    /// Environment variables (all optional, defaults in parentheses):
    /// - `SPIKE_RATIO` (3.0), `VIEWER_BASELINE_WINDOW_SECS` (60), `VIEWER_WARMUP_SAMPLES` (3)
    /// - `VIEWER_POLL_INTERVAL_SECS` (10), `MAX_POLL_FAILURES` (30)
    /// - `CHAT_WINDOW_SECS` (10), `CHAT_BASELINE_WINDOW_SECS` (300), `CHAT_WARMUP_SAMPLES` (5)
    /// - `CHAT_VELOCITY_BUFFER` (2.0), `CHAT_VELOCITY_THRESHOLD` (15.0)
    /// - `CLIP_KEYWORDS` (comma separated), `KEYWORD_THRESHOLD` (8), `EMOTE_THRESHOLD` (15)
    /// - `COMBO_WINDOW_SECS` (10), `DISPATCH_CONSUMED_TRIGGERS` (false)
    /// - `CLIP_BEFORE_SECS` (20), `CLIP_AFTER_SECS` (25)
    /// - `MAX_CLIPS_PER_DAY` (50), `HIGH_PRIORITY_CONFIDENCE` (0.9)
    /// - `COOLDOWN_VIEWER_SPIKE_SECS`, `COOLDOWN_CHAT_VELOCITY_SECS`, `COOLDOWN_KEYWORD_SECS`,
    ///   `COOLDOWN_EMOTE_FLOOD_SECS`
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(&|var| env::var(var).ok())
    }

    /// Same as `from_env` but reading from an arbitrary lookup (used by tests)
    pub fn from_lookup(lookup: &dyn Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let d = Self::default();

        let dispatch_consumed: bool = parse_var(lookup, "DISPATCH_CONSUMED_TRIGGERS", false)?;

        let config = Self {
            spike_ratio: parse_var(lookup, "SPIKE_RATIO", d.spike_ratio)?,
            viewer_baseline_window_secs: parse_var(
                lookup,
                "VIEWER_BASELINE_WINDOW_SECS",
                d.viewer_baseline_window_secs,
            )?,
            viewer_warmup_samples: parse_var(lookup, "VIEWER_WARMUP_SAMPLES", d.viewer_warmup_samples)?,
            viewer_poll_interval_secs: parse_var(
                lookup,
                "VIEWER_POLL_INTERVAL_SECS",
                d.viewer_poll_interval_secs,
            )?,
            max_poll_failures: parse_var(lookup, "MAX_POLL_FAILURES", d.max_poll_failures)?,

            chat_window_secs: parse_var(lookup, "CHAT_WINDOW_SECS", d.chat_window_secs)?,
            chat_baseline_window_secs: parse_var(
                lookup,
                "CHAT_BASELINE_WINDOW_SECS",
                d.chat_baseline_window_secs,
            )?,
            chat_warmup_samples: parse_var(lookup, "CHAT_WARMUP_SAMPLES", d.chat_warmup_samples)?,
            chat_velocity_buffer: parse_var(lookup, "CHAT_VELOCITY_BUFFER", d.chat_velocity_buffer)?,
            chat_velocity_threshold: parse_var(
                lookup,
                "CHAT_VELOCITY_THRESHOLD",
                d.chat_velocity_threshold,
            )?,

            keywords: parse_list(lookup, "CLIP_KEYWORDS", d.keywords.clone()),
            keyword_window_secs: parse_var(lookup, "KEYWORD_WINDOW_SECS", d.keyword_window_secs)?,
            keyword_threshold: parse_var(lookup, "KEYWORD_THRESHOLD", d.keyword_threshold)?,
            emote_window_secs: parse_var(lookup, "EMOTE_WINDOW_SECS", d.emote_window_secs)?,
            emote_threshold: parse_var(lookup, "EMOTE_THRESHOLD", d.emote_threshold)?,
            excitement_emotes: parse_list(lookup, "EXCITEMENT_EMOTES", d.excitement_emotes.clone()),
            excitement_phrases: parse_list(lookup, "EXCITEMENT_PHRASES", d.excitement_phrases.clone()),

            combo_window_secs: parse_var(lookup, "COMBO_WINDOW_SECS", d.combo_window_secs)?,
            consumed_trigger_policy: if dispatch_consumed {
                ConsumedTriggerPolicy::AlsoDispatch
            } else {
                ConsumedTriggerPolicy::Exclude
            },
            clip_before_secs: parse_var(lookup, "CLIP_BEFORE_SECS", d.clip_before_secs)?,
            clip_after_secs: parse_var(lookup, "CLIP_AFTER_SECS", d.clip_after_secs)?,
            max_clips_per_day: parse_var(lookup, "MAX_CLIPS_PER_DAY", d.max_clips_per_day)?,
            high_priority_confidence: parse_var(
                lookup,
                "HIGH_PRIORITY_CONFIDENCE",
                d.high_priority_confidence,
            )?,

            cooldowns: TriggerCooldowns {
                viewer_spike: parse_var(lookup, "COOLDOWN_VIEWER_SPIKE_SECS", d.cooldowns.viewer_spike)?,
                chat_velocity: parse_var(
                    lookup,
                    "COOLDOWN_CHAT_VELOCITY_SECS",
                    d.cooldowns.chat_velocity,
                )?,
                keyword: parse_var(lookup, "COOLDOWN_KEYWORD_SECS", d.cooldowns.keyword)?,
                emote_flood: parse_var(lookup, "COOLDOWN_EMOTE_FLOOD_SECS", d.cooldowns.emote_flood)?,
            },
            confidences: d.confidences,
        };

        config.validate()?;
        Ok(config)
    }

    /// Reject configurations the engine cannot run with
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(self.spike_ratio > 1.0) {
            return Err(ConfigError::Invalid(format!(
                "spike_ratio must be > 1.0, got {}",
                self.spike_ratio
            )));
        }

        let windows = [
            ("viewer_baseline_window_secs", self.viewer_baseline_window_secs),
            ("chat_window_secs", self.chat_window_secs),
            ("chat_baseline_window_secs", self.chat_baseline_window_secs),
            ("keyword_window_secs", self.keyword_window_secs),
            ("emote_window_secs", self.emote_window_secs),
            ("combo_window_secs", self.combo_window_secs),
            ("viewer_poll_interval_secs", self.viewer_poll_interval_secs),
        ];
        if let Some((name, _)) = windows.iter().find(|(_, secs)| *secs == 0) {
            return Err(ConfigError::Invalid(format!("{} must be non-zero", name)));
        }

        if self.viewer_warmup_samples == 0 || self.chat_warmup_samples == 0 {
            return Err(ConfigError::Invalid("warm-up sample counts must be at least 1".to_string()));
        }

        if self.keyword_threshold == 0 || self.emote_threshold == 0 {
            return Err(ConfigError::Invalid("keyword/emote thresholds must be at least 1".to_string()));
        }

        if self.keywords.is_empty() {
            return Err(ConfigError::Invalid("keyword list cannot be empty".to_string()));
        }

        if !(0.0..=1.0).contains(&self.high_priority_confidence) {
            return Err(ConfigError::Invalid(format!(
                "high_priority_confidence must be within 0..=1, got {}",
                self.high_priority_confidence
            )));
        }

        for kind in TriggerKind::all() {
            let confidence = self.confidence_for(kind);
            if !(0.0..=1.0).contains(&confidence) {
                return Err(ConfigError::Invalid(format!(
                    "confidence for {} must be within 0..=1, got {}",
                    kind, confidence
                )));
            }
        }

        Ok(())
    }

    pub fn confidence_for(&self, kind: TriggerKind) -> f64 {
        let c = &self.confidences;
        match kind {
            TriggerKind::ViewerSpike => c.viewer_spike,
            TriggerKind::ChatVelocity => c.chat_velocity,
            TriggerKind::Keyword => c.keyword,
            TriggerKind::EmoteFlood => c.emote_flood,
            TriggerKind::ChatCombo => c.chat_combo,
            TriggerKind::HypeMoment => c.hype_moment,
            TriggerKind::ClipWorthy => c.clip_worthy,
            TriggerKind::SuperCombo => c.super_combo,
        }
    }

    /// Combos always bypass cooldowns, so they have none
    pub fn cooldown_ms(&self, kind: TriggerKind) -> i64 {
        let secs = match kind {
            TriggerKind::ViewerSpike => self.cooldowns.viewer_spike,
            TriggerKind::ChatVelocity => self.cooldowns.chat_velocity,
            TriggerKind::Keyword => self.cooldowns.keyword,
            TriggerKind::EmoteFlood => self.cooldowns.emote_flood,
            TriggerKind::ChatCombo
            | TriggerKind::HypeMoment
            | TriggerKind::ClipWorthy
            | TriggerKind::SuperCombo => 0,
        };
        secs as i64 * 1000
    }

    pub fn clip_before_ms(&self) -> i64 {
        self.clip_before_secs as i64 * 1000
    }

    pub fn clip_after_ms(&self) -> i64 {
        self.clip_after_secs as i64 * 1000
    }

    pub fn combo_window_ms(&self) -> i64 {
        self.combo_window_secs as i64 * 1000
    }
}

const DEFAULT_PUSHER_WS_URL: &str =
    "wss://ws-us2.pusher.com/app/32cbd69e4b950bf97679?protocol=7&client=js&version=8.4.0-rc2&flash=false";

/// Binary-level runtime settings
#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    /// Path to SQLite database file
    pub db_path: String,

    /// Directory holding the `*.sql` schema files
    pub schema_dir: String,

    /// Streamers to monitor
    pub streamers: Vec<String>,

    /// Bounded input channel size per streamer worker
    pub channel_buffer: usize,

    /// Bounded clip request channel size
    pub clip_buffer: usize,

    /// Kick channel API base URL
    pub kick_api_base: String,

    /// Pusher websocket endpoint carrying Kick chat
    pub pusher_ws_url: String,

    /// Delay between chat reconnect attempts
    pub ws_reconnect_delay_secs: u64,

    /// Reconnect attempts before the chat feed gives up
    pub ws_max_reconnect_attempts: u32,

    /// Where chat-velocity baseline summaries are saved on stop
    pub baseline_snapshot_path: Option<String>,

    /// Worker housekeeping tick (releases expired pending triggers)
    pub tick_interval_ms: u64,

    /// Upper bound on shutdown drain
    pub shutdown_timeout_secs: u64,
}

impl RuntimeConfig {
    /// Load runtime configuration from environment variables
    ///
    /// Environment variables:
    /// - `CLIPWATCH_DB_PATH` (default: data/clips.db)
    /// - `CLIPWATCH_SCHEMA_DIR` (default: sql)
    /// - `CLIPWATCH_STREAMERS` (comma separated, required non-empty)
    /// - `STREAMER_CHANNEL_BUFFER` (default: 1024)
    /// - `CLIP_CHANNEL_BUFFER` (default: 64)
    /// - `KICK_API_BASE` (default: https://kick.com/api/v2/channels)
    /// - `PUSHER_WS_URL` (default: Kick's public Pusher app endpoint)
    /// - `WS_RECONNECT_DELAY_SECS` (default: 5), `WS_MAX_RECONNECT_ATTEMPTS` (default: 10)
    /// - `BASELINE_SNAPSHOT_PATH` (default: data/baselines.json, empty disables)
    /// - `WORKER_TICK_INTERVAL_MS` (default: 1000)
    /// - `SHUTDOWN_TIMEOUT_SECS` (default: 10)
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(&|var| env::var(var).ok())
    }

    pub fn from_lookup(lookup: &dyn Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let streamers = parse_list(lookup, "CLIPWATCH_STREAMERS", Vec::new());
        if streamers.is_empty() {
            return Err(ConfigError::Invalid(
                "CLIPWATCH_STREAMERS must name at least one streamer".to_string(),
            ));
        }

        let baseline_snapshot_path = match lookup("BASELINE_SNAPSHOT_PATH") {
            Some(path) if path.trim().is_empty() => None,
            Some(path) => Some(path),
            None => Some("data/baselines.json".to_string()),
        };

        let config = Self {
            db_path: lookup("CLIPWATCH_DB_PATH").unwrap_or_else(|| "data/clips.db".to_string()),
            schema_dir: lookup("CLIPWATCH_SCHEMA_DIR").unwrap_or_else(|| "sql".to_string()),
            streamers,
            channel_buffer: parse_var(lookup, "STREAMER_CHANNEL_BUFFER", 1024)?,
            clip_buffer: parse_var(lookup, "CLIP_CHANNEL_BUFFER", 64)?,
            kick_api_base: lookup("KICK_API_BASE")
                .unwrap_or_else(|| "https://kick.com/api/v2/channels".to_string()),
            pusher_ws_url: lookup("PUSHER_WS_URL").unwrap_or_else(|| DEFAULT_PUSHER_WS_URL.to_string()),
            ws_reconnect_delay_secs: parse_var(lookup, "WS_RECONNECT_DELAY_SECS", 5)?,
            ws_max_reconnect_attempts: parse_var(lookup, "WS_MAX_RECONNECT_ATTEMPTS", 10)?,
            baseline_snapshot_path,
            tick_interval_ms: parse_var(lookup, "WORKER_TICK_INTERVAL_MS", 1000)?,
            shutdown_timeout_secs: parse_var(lookup, "SHUTDOWN_TIMEOUT_SECS", 10)?,
        };

        if config.channel_buffer == 0 || config.clip_buffer == 0 {
            return Err(ConfigError::Invalid("channel buffers must be non-zero".to_string()));
        }

        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |var| map.get(var).cloned()
    }

    #[test]
    fn test_default_config() {
        let config = DetectionConfig::from_lookup(&lookup_from(&[])).unwrap();

        assert_eq!(config, DetectionConfig::default());
        assert_eq!(config.spike_ratio, 3.0);
        assert_eq!(config.chat_velocity_threshold, 15.0);
        assert_eq!(config.keyword_threshold, 8);
        assert_eq!(config.emote_threshold, 15);
        assert_eq!(config.max_clips_per_day, 50);
        assert_eq!(config.high_priority_confidence, 0.9);
        assert_eq!(config.clip_before_ms(), 20_000);
        assert_eq!(config.clip_after_ms(), 25_000);
        assert_eq!(config.consumed_trigger_policy, ConsumedTriggerPolicy::Exclude);
    }

    #[test]
    fn test_custom_config() {
        let config = DetectionConfig::from_lookup(&lookup_from(&[
            ("SPIKE_RATIO", "2.5"),
            ("CLIP_KEYWORDS", "POG, CLIP IT ,,"),
            ("MAX_CLIPS_PER_DAY", "5"),
            ("DISPATCH_CONSUMED_TRIGGERS", "true"),
            ("COOLDOWN_KEYWORD_SECS", "45"),
        ]))
        .unwrap();

        assert_eq!(config.spike_ratio, 2.5);
        assert_eq!(config.keywords, vec!["POG".to_string(), "CLIP IT".to_string()]);
        assert_eq!(config.max_clips_per_day, 5);
        assert_eq!(config.consumed_trigger_policy, ConsumedTriggerPolicy::AlsoDispatch);
        assert_eq!(config.cooldown_ms(TriggerKind::Keyword), 45_000);
    }

    #[test]
    fn test_unparseable_value_is_an_error() {
        let result = DetectionConfig::from_lookup(&lookup_from(&[("SPIKE_RATIO", "lots")]));
        assert!(matches!(result, Err(ConfigError::InvalidValue { .. })));
    }

    #[test]
    fn test_validation_rejects_bad_values() {
        let mut config = DetectionConfig::default();
        config.spike_ratio = 1.0;
        assert!(config.validate().is_err());

        let mut config = DetectionConfig::default();
        config.combo_window_secs = 0;
        assert!(config.validate().is_err());

        let mut config = DetectionConfig::default();
        config.keywords.clear();
        assert!(config.validate().is_err());

        let mut config = DetectionConfig::default();
        config.high_priority_confidence = 1.5;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_cooldown_and_confidence_tables() {
        let config = DetectionConfig::default();
        assert_eq!(config.cooldown_ms(TriggerKind::ViewerSpike), 60_000);
        assert_eq!(config.cooldown_ms(TriggerKind::ChatVelocity), 120_000);
        assert_eq!(config.cooldown_ms(TriggerKind::EmoteFlood), 90_000);
        for kind in [
            TriggerKind::ChatCombo,
            TriggerKind::HypeMoment,
            TriggerKind::ClipWorthy,
            TriggerKind::SuperCombo,
        ] {
            assert_eq!(config.cooldown_ms(kind), 0);
        }
        assert_eq!(config.confidence_for(TriggerKind::SuperCombo), 0.95);
        assert_eq!(config.confidence_for(TriggerKind::ClipWorthy), 0.85);
        assert_eq!(config.confidence_for(TriggerKind::HypeMoment), 0.80);
        assert_eq!(config.confidence_for(TriggerKind::ChatCombo), 0.70);
    }

    #[test]
    fn test_runtime_config_requires_streamers() {
        assert!(RuntimeConfig::from_lookup(&lookup_from(&[])).is_err());

        let config = RuntimeConfig::from_lookup(&lookup_from(&[
            ("CLIPWATCH_STREAMERS", "xqc, ninja"),
            ("BASELINE_SNAPSHOT_PATH", ""),
        ]))
        .unwrap();
        assert_eq!(config.streamers, vec!["xqc".to_string(), "ninja".to_string()]);
        assert_eq!(config.db_path, "data/clips.db");
        assert_eq!(config.channel_buffer, 1024);
        assert!(config.baseline_snapshot_path.is_none());
    }
}
