//! Clip dispatch: the only component that crosses the system boundary
//!
//! An accepted trigger becomes a `ClipRequest` covering
//! `[timestamp - CLIP_BEFORE, timestamp + CLIP_AFTER]`, handed to the clip sink,
//! while a `MomentRecord` is written to the store in parallel.

use super::config::DetectionConfig;
use super::rate_limiter::DailyCount;
use super::types::{ClipPriority, ClipRequest, MomentRecord, TriggerEvent};
use super::db::MomentStore;
use crate::error::DispatchError;
use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::mpsc;

/// Consumer of clip requests (the external extraction subsystem)
#[async_trait]
pub trait ClipSink: Send + Sync {
    async fn submit(&self, request: ClipRequest) -> Result<(), DispatchError>;
}

/// Forwards requests over a bounded channel
///
/// A full channel suspends the caller until the consumer catches up.
#[derive(Clone)]
pub struct ChannelClipSink {
    tx: mpsc::Sender<ClipRequest>,
}

impl ChannelClipSink {
    pub fn new(tx: mpsc::Sender<ClipRequest>) -> Self {
        Self { tx }
    }

    /// Sink plus the receiving end, with `buffer` slots
    pub fn channel(buffer: usize) -> (Self, mpsc::Receiver<ClipRequest>) {
        let (tx, rx) = mpsc::channel(buffer);
        (Self { tx }, rx)
    }
}

#[async_trait]
impl ClipSink for ChannelClipSink {
    async fn submit(&self, request: ClipRequest) -> Result<(), DispatchError> {
        let streamer = request.streamer.clone();
        self.tx
            .send(request)
            .await
            .map_err(|_| DispatchError::SinkClosed { streamer })
    }
}

/// Monitoring session the moments are attributed to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Session {
    pub id: i64,
    pub started_at_ms: i64,
}

pub struct ClipDispatcher {
    config: Arc<DetectionConfig>,
    sink: Arc<dyn ClipSink>,
    store: Arc<dyn MomentStore>,
    session: Session,
}

impl ClipDispatcher {
    pub fn new(
        config: Arc<DetectionConfig>,
        sink: Arc<dyn ClipSink>,
        store: Arc<dyn MomentStore>,
        session: Session,
    ) -> Self {
        Self {
            config,
            sink,
            store,
            session,
        }
    }

    pub fn session(&self) -> Session {
        self.session
    }

    pub fn build_request(&self, trigger: &TriggerEvent, priority: ClipPriority) -> ClipRequest {
        ClipRequest {
            streamer: trigger.streamer.clone(),
            trigger: trigger.clone(),
            window_start: trigger.timestamp - self.config.clip_before_ms(),
            window_end: trigger.timestamp + self.config.clip_after_ms(),
            priority,
        }
    }

    pub fn moment_record(&self, trigger: &TriggerEvent) -> Result<MomentRecord, DispatchError> {
        let elapsed_ms = (trigger.timestamp - self.session.started_at_ms).max(0);
        let trigger_data = serde_json::to_value(trigger).map_err(crate::error::StoreError::from)?;

        Ok(MomentRecord {
            session_id: self.session.id,
            stream_elapsed_seconds: elapsed_ms as f64 / 1000.0,
            trigger_type: trigger.kind,
            trigger_data,
            processed: false,
            clip_path: None,
            created_at: trigger.timestamp,
        })
    }

    /// Hand an admitted trigger to the sink and record it.
    ///
    /// The store write and the sink hand-off run concurrently; a store failure
    /// is reported first since it is fatal for the streamer.
    pub async fn dispatch(
        &self,
        trigger: &TriggerEvent,
        priority: ClipPriority,
        daily: DailyCount,
    ) -> Result<ClipRequest, DispatchError> {
        let request = self.build_request(trigger, priority);
        let record = self.moment_record(trigger)?;

        let persist = async {
            self.store.log_moment(&record).await?;
            self.store.save_daily_count(&trigger.streamer, daily).await
        };

        let (stored, submitted) = tokio::join!(persist, self.sink.submit(request.clone()));
        stored?;
        submitted?;

        log::info!(
            "🎬 Clip requested: {} | {} | confidence {:.2} | window {}..{} ({:?})",
            request.streamer,
            request.trigger_kind(),
            request.confidence(),
            request.window_start,
            request.window_end,
            priority
        );

        Ok(request)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::db::InMemoryMomentStore;
    use crate::pipeline::types::{TriggerKind, TriggerMetadata};
    use chrono::NaiveDate;

    fn trigger(ts: i64) -> TriggerEvent {
        TriggerEvent {
            streamer: "xqc".to_string(),
            kind: TriggerKind::ClipWorthy,
            timestamp: ts,
            confidence: 0.85,
            metadata: TriggerMetadata::Combo {
                constituents: vec![TriggerKind::ViewerSpike, TriggerKind::Keyword],
                constituent_count: 2,
                window_secs: 10,
            },
        }
    }

    fn daily() -> DailyCount {
        DailyCount {
            date: NaiveDate::from_ymd_opt(2024, 6, 1).unwrap(),
            count: 1,
        }
    }

    fn dispatcher(sink: Arc<dyn ClipSink>, store: Arc<dyn MomentStore>) -> ClipDispatcher {
        ClipDispatcher::new(
            Arc::new(DetectionConfig::default()),
            sink,
            store,
            Session {
                id: 1,
                started_at_ms: 1_000_000,
            },
        )
    }

    #[tokio::test]
    async fn test_dispatch_builds_window_and_logs_moment() {
        let (sink, mut rx) = ChannelClipSink::channel(4);
        let store = InMemoryMomentStore::new();
        let dispatcher = dispatcher(Arc::new(sink), Arc::new(store.clone()));

        let request = dispatcher
            .dispatch(&trigger(1_090_000), ClipPriority::High, daily())
            .await
            .unwrap();

        assert_eq!(request.window_start, 1_070_000);
        assert_eq!(request.window_end, 1_115_000);
        assert_eq!(request.duration_ms(), 45_000);
        assert_eq!(rx.recv().await.unwrap(), request);

        let moments = store.moments();
        assert_eq!(moments.len(), 1);
        assert_eq!(moments[0].stream_elapsed_seconds, 90.0);
        assert_eq!(moments[0].trigger_type, TriggerKind::ClipWorthy);
        assert_eq!(moments[0].trigger_data["kind"], "clip_worthy");
        assert_eq!(store.load_daily_count("xqc").await.unwrap(), Some(daily()));
    }

    #[tokio::test]
    async fn test_closed_sink_is_reported() {
        let (sink, rx) = ChannelClipSink::channel(1);
        drop(rx);
        let dispatcher = dispatcher(Arc::new(sink), Arc::new(InMemoryMomentStore::new()));

        let result = dispatcher.dispatch(&trigger(1_000_000), ClipPriority::Normal, daily()).await;
        assert!(matches!(result, Err(DispatchError::SinkClosed { .. })));
    }
}
