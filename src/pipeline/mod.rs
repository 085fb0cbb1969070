//! # Trigger Detection & Rate-Limited Dispatch
//!
//! Turns live-stream signals (viewer counts, chat messages) into clip requests.
//!
//! ## Architecture: One Worker Per Streamer
//!
//! Every monitored streamer gets a dedicated worker task that exclusively owns
//! its `StreamerContext`. Producers never touch detection state; they push
//! `StreamerCommand`s into the worker's bounded channel.
//!
//! ```text
//! viewer poller ─┐
//!                ├─→ mpsc ─→ StreamerWorker ─→ ClipDispatcher ─→ ClipSink
//! chat feed ─────┘              │                    └─→ MomentStore
//!                               └─→ watch<StreamerStatus>
//! ```
//!
//! ## Module Organization
//!
//! - `types` - Signals, triggers, clip requests, moment records
//! - `config` - Thresholds, windows, cooldowns (env driven)
//! - `clock` - Wall clock and local calendar
//! - `windows` - Baseline and count windows
//! - `excitement` - Chat excitement scoring and emote tokens
//! - `triggers` - Raw trigger evaluators
//! - `combo` - Combo detection over recent raw triggers
//! - `rate_limiter` - Cooldowns, priority bypass, daily cap
//! - `db` - Moment store trait, SQLite and in-memory stores
//! - `dispatcher` - Clip request construction and delivery
//! - `engine` - Per-streamer detection context
//! - `baseline_store` - Chat baseline summaries across restarts
//! - `ingestion` - Per-streamer worker loop
//! - `supervisor` - `ClipMonitor`, starts/stops workers

pub mod baseline_store;
pub mod clock;
pub mod combo;
pub mod config;
pub mod db;
pub mod dispatcher;
pub mod engine;
pub mod excitement;
pub mod ingestion;
pub mod rate_limiter;
pub mod supervisor;
pub mod triggers;
pub mod types;
pub mod windows;

// Re-export commonly used types
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{DetectionConfig, RuntimeConfig};
pub use db::{InMemoryMomentStore, MomentStore, SqliteMomentStore};
pub use dispatcher::{ChannelClipSink, ClipSink};
pub use engine::{MonitorState, StreamerContext, StreamerStatus};
pub use ingestion::{ExitReason, StreamerCommand, WorkerExit};
pub use supervisor::ClipMonitor;
pub use types::{ClipPriority, ClipRequest, SignalEvent, TriggerEvent, TriggerKind};
