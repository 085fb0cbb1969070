//! Kick channel API: viewer counts and chatroom lookup
//!
//! ## API Reference
//!
//! Endpoint: `{KICK_API_BASE}/{slug}` (default https://kick.com/api/v2/channels)
//! Returns the channel object; `livestream` is `null` while offline.
//!
//! ```json
//! { "chatroom": { "id": 123 }, "livestream": { "is_live": true, "viewer_count": 5120 } }
//! ```

use crate::error::SourceError;
use crate::pipeline::clock::Clock;
use crate::pipeline::ingestion::StreamerCommand;
use crate::pipeline::types::SignalEvent;
use async_trait::async_trait;
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

#[derive(Debug, Clone, Deserialize)]
struct ChannelResponse {
    chatroom: Option<Chatroom>,
    livestream: Option<Livestream>,
}

#[derive(Debug, Clone, Deserialize)]
struct Chatroom {
    id: u64,
}

#[derive(Debug, Clone, Deserialize)]
struct Livestream {
    #[serde(default)]
    is_live: bool,
    #[serde(default)]
    viewer_count: u64,
}

/// What one poll of a channel returned
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChannelSnapshot {
    pub is_live: bool,
    pub viewer_count: u64,
    pub chatroom_id: Option<u64>,
}

impl ChannelSnapshot {
    /// Parse a channel API body
    pub fn from_json(body: &str) -> Result<Self, SourceError> {
        let response: ChannelResponse =
            serde_json::from_str(body).map_err(|e| SourceError::Decode(e.to_string()))?;
        Ok(Self::from_response(response))
    }

    fn from_response(response: ChannelResponse) -> Self {
        let (is_live, viewer_count) = match response.livestream {
            Some(live) => (live.is_live, live.viewer_count),
            None => (false, 0),
        };
        Self {
            is_live,
            viewer_count,
            chatroom_id: response.chatroom.map(|c| c.id),
        }
    }
}

/// Anything that can report a streamer's current viewer count
#[async_trait]
pub trait ViewerCountSource: Send + Sync {
    async fn fetch(&self, streamer: &str) -> Result<ChannelSnapshot, SourceError>;
}

pub struct KickChannelApi {
    client: reqwest::Client,
    base_url: String,
}

impl KickChannelApi {
    /// # Arguments
    /// * `base_url` - Channel endpoint without trailing slash
    pub fn new(base_url: &str) -> Result<Self, SourceError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(15))
            .user_agent("Mozilla/5.0 (Windows NT 10.0; Win64; x64) clipwatch/0.1")
            .build()?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    pub fn channel_url(&self, streamer: &str) -> String {
        format!("{}/{}", self.base_url, streamer)
    }
}

#[async_trait]
impl ViewerCountSource for KickChannelApi {
    async fn fetch(&self, streamer: &str) -> Result<ChannelSnapshot, SourceError> {
        let response = self.client.get(self.channel_url(streamer)).send().await?;

        if !response.status().is_success() {
            return Err(SourceError::Status(response.status().as_u16()));
        }

        let body = response.text().await?;
        ChannelSnapshot::from_json(&body)
    }
}

/// How a poller run ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollerExit {
    /// Too many consecutive failed/offline polls; `StreamOffline` was sent
    Offline { misses: u32 },
    /// The worker's channel closed
    WorkerGone,
}

/// Poll `source` every `poll_interval` and push samples into the worker.
///
/// A failed or offline poll is a skipped sample. After `max_failures`
/// consecutive misses the poller sends `StreamOffline` and returns.
///
/// # Arguments
/// * `source` - Viewer count source (Kick API in production)
/// * `tx` - The streamer worker's input channel
/// * `clock` - Timestamps the samples
pub async fn run_viewer_poller(
    source: Arc<dyn ViewerCountSource>,
    streamer: String,
    tx: mpsc::Sender<StreamerCommand>,
    clock: Arc<dyn Clock>,
    poll_interval: Duration,
    max_failures: u32,
) -> PollerExit {
    log::info!("👀 Viewer poller started for {} (every {:?})", streamer, poll_interval);

    let mut timer = tokio::time::interval(poll_interval);
    timer.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    let mut misses = 0u32;

    loop {
        tokio::select! {
            _ = timer.tick() => {}
            _ = tx.closed() => return PollerExit::WorkerGone,
        }

        match source.fetch(&streamer).await {
            Ok(snapshot) if snapshot.is_live => {
                misses = 0;
                let event = SignalEvent::viewer_count(&streamer, snapshot.viewer_count, clock.now_ms());
                if tx.send(StreamerCommand::Signal(event)).await.is_err() {
                    return PollerExit::WorkerGone;
                }
            }
            Ok(_) => {
                misses += 1;
                log::debug!("[viewer] {} offline ({}/{})", streamer, misses, max_failures);
            }
            Err(e) => {
                misses += 1;
                log::warn!("⚠️  [viewer] {} poll failed ({}/{}): {}", streamer, misses, max_failures, e);
            }
        }

        if misses >= max_failures {
            let reason = format!("{} consecutive failed or offline polls", misses);
            log::warn!("📴 {}: {}", streamer, reason);
            let _ = tx.send(StreamerCommand::StreamOffline { reason }).await;
            return PollerExit::Offline { misses };
        }
    }
}
