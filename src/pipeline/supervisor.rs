//! `ClipMonitor`: starts, stops and shuts down per-streamer workers
//!
//! No detection state lives here. The monitor only holds channel senders,
//! status receivers and join handles; each streamer's context is owned by
//! its worker task.

use super::baseline_store::BaselineSnapshotStore;
use super::clock::Clock;
use super::config::DetectionConfig;
use super::db::MomentStore;
use super::dispatcher::{ClipDispatcher, ClipSink, Session};
use super::engine::{StreamerContext, StreamerStatus};
use super::ingestion::{StreamerCommand, StreamerWorker, WorkerExit};
use crate::error::MonitorError;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::Duration;

struct StreamerHandle {
    tx: mpsc::Sender<StreamerCommand>,
    status: watch::Receiver<StreamerStatus>,
    join: JoinHandle<WorkerExit>,
}

pub struct ClipMonitor {
    config: Arc<DetectionConfig>,
    store: Arc<dyn MomentStore>,
    sink: Arc<dyn ClipSink>,
    clock: Arc<dyn Clock>,
    snapshots: Option<Arc<BaselineSnapshotStore>>,
    channel_buffer: usize,
    tick_interval: Duration,
    workers: HashMap<String, StreamerHandle>,
    shutting_down: bool,
}

impl ClipMonitor {
    pub fn new(
        config: Arc<DetectionConfig>,
        store: Arc<dyn MomentStore>,
        sink: Arc<dyn ClipSink>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            config,
            store,
            sink,
            clock,
            snapshots: None,
            channel_buffer: 1024,
            tick_interval: Duration::from_millis(1000),
            workers: HashMap::new(),
            shutting_down: false,
        }
    }

    pub fn with_channel_buffer(mut self, channel_buffer: usize) -> Self {
        self.channel_buffer = channel_buffer.max(1);
        self
    }

    pub fn with_tick_interval(mut self, tick_interval: Duration) -> Self {
        self.tick_interval = tick_interval;
        self
    }

    pub fn with_baseline_snapshots(mut self, snapshots: Arc<BaselineSnapshotStore>) -> Self {
        self.snapshots = Some(snapshots);
        self
    }

    /// Start monitoring a streamer and return the sender producers push into.
    ///
    /// Starting a streamer that is already running returns its existing sender.
    pub async fn start_streamer(&mut self, streamer: &str) -> Result<mpsc::Sender<StreamerCommand>, MonitorError> {
        if self.shutting_down {
            return Err(MonitorError::ShuttingDown);
        }

        if let Some(handle) = self.workers.get(streamer) {
            if !handle.join.is_finished() {
                return Ok(handle.tx.clone());
            }
        }

        let now = self.clock.now_ms();
        let session_id = self.store.start_session(streamer, now).await?;
        let stored_daily = self.store.load_daily_count(streamer).await?;
        let today = self.clock.local_date(now);

        let context = StreamerContext::new(streamer, self.config.clone(), stored_daily, today);
        let dispatcher = ClipDispatcher::new(
            self.config.clone(),
            self.sink.clone(),
            self.store.clone(),
            Session {
                id: session_id,
                started_at_ms: now,
            },
        );

        let (status_tx, status_rx) = watch::channel(context.status().clone());
        let mut worker = StreamerWorker::new(
            context,
            dispatcher,
            self.store.clone(),
            self.clock.clone(),
            status_tx,
        )
        .with_tick_interval(self.tick_interval);
        if let Some(snapshots) = &self.snapshots {
            worker = worker.with_baseline_snapshots(snapshots.clone());
        }

        let (tx, rx) = mpsc::channel(self.channel_buffer);
        let join = tokio::spawn(worker.run(rx));

        self.workers.insert(
            streamer.to_string(),
            StreamerHandle {
                tx: tx.clone(),
                status: status_rx,
                join,
            },
        );

        Ok(tx)
    }

    /// Stop one streamer and wait for its worker to drain
    pub async fn stop_streamer(&mut self, streamer: &str) -> Option<WorkerExit> {
        let handle = self.workers.remove(streamer)?;
        // A worker that already exited has dropped its receiver
        let _ = handle.tx.send(StreamerCommand::Stop).await;

        match handle.join.await {
            Ok(exit) => Some(exit),
            Err(e) => {
                log::error!("❌ Worker for {} panicked or was cancelled: {}", streamer, e);
                None
            }
        }
    }

    pub fn sender(&self, streamer: &str) -> Option<mpsc::Sender<StreamerCommand>> {
        self.workers.get(streamer).map(|h| h.tx.clone())
    }

    pub fn status(&self, streamer: &str) -> Option<StreamerStatus> {
        self.workers.get(streamer).map(|h| h.status.borrow().clone())
    }

    /// Status receiver for callers that want to await changes
    pub fn watch_status(&self, streamer: &str) -> Option<watch::Receiver<StreamerStatus>> {
        self.workers.get(streamer).map(|h| h.status.clone())
    }

    pub fn statuses(&self) -> Vec<StreamerStatus> {
        let mut statuses: Vec<_> = self.workers.values().map(|h| h.status.borrow().clone()).collect();
        statuses.sort_by(|a, b| a.streamer.cmp(&b.streamer));
        statuses
    }

    pub fn streamers(&self) -> Vec<String> {
        let mut names: Vec<_> = self.workers.keys().cloned().collect();
        names.sort();
        names
    }

    /// Collect workers that exited on their own (stream offline, fatal error)
    pub async fn reap_finished(&mut self) -> Vec<WorkerExit> {
        let finished: Vec<String> = self
            .workers
            .iter()
            .filter(|(_, h)| h.join.is_finished())
            .map(|(name, _)| name.clone())
            .collect();

        let mut exits = Vec::new();
        for name in finished {
            if let Some(handle) = self.workers.remove(&name) {
                match handle.join.await {
                    Ok(exit) => exits.push(exit),
                    Err(e) => log::error!("❌ Worker for {} failed: {}", name, e),
                }
            }
        }
        exits
    }

    /// Stop every streamer concurrently and wait for drain, bounded by `timeout`.
    ///
    /// Workers still running when the timeout elapses are aborted.
    pub async fn shutdown(&mut self, timeout: Duration) -> Vec<WorkerExit> {
        self.shutting_down = true;
        let handles: Vec<(String, StreamerHandle)> = self.workers.drain().collect();
        if handles.is_empty() {
            return Vec::new();
        }

        log::info!("🛑 Shutting down {} streamer worker(s)...", handles.len());

        let aborts: Vec<_> = handles
            .iter()
            .map(|(name, h)| (name.clone(), h.join.abort_handle()))
            .collect();

        let mut exits = Vec::new();
        let wait = async {
            // Signal everyone first so they drain in parallel
            for (_, handle) in &handles {
                let _ = handle.tx.send(StreamerCommand::Stop).await;
            }
            for (name, handle) in handles {
                match handle.join.await {
                    Ok(exit) => exits.push(exit),
                    Err(e) => log::error!("❌ Worker for {} failed during shutdown: {}", name, e),
                }
            }
        };

        if tokio::time::timeout(timeout, wait).await.is_err() {
            for (name, abort) in aborts {
                if !abort.is_finished() {
                    log::warn!("⚠️  {} did not drain within {:?}, aborting", name, timeout);
                    abort.abort();
                }
            }
        }

        log::info!("✅ Shutdown complete ({} workers drained)", exits.len());
        exits
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::clock::ManualClock;
    use crate::pipeline::db::InMemoryMomentStore;
    use crate::pipeline::dispatcher::ChannelClipSink;
    use crate::pipeline::engine::MonitorState;
    use crate::pipeline::ingestion::ExitReason;
    use crate::pipeline::types::SignalEvent;

    fn monitor(store: InMemoryMomentStore) -> (ClipMonitor, mpsc::Receiver<crate::pipeline::types::ClipRequest>) {
        let (sink, clips) = ChannelClipSink::channel(16);
        let monitor = ClipMonitor::new(
            Arc::new(DetectionConfig::default()),
            Arc::new(store),
            Arc::new(sink),
            Arc::new(ManualClock::new(0)),
        )
        .with_tick_interval(Duration::from_millis(10));
        (monitor, clips)
    }

    #[tokio::test]
    async fn test_start_is_idempotent_and_stop_ends_session() {
        let store = InMemoryMomentStore::new();
        let (mut monitor, _clips) = monitor(store.clone());

        let tx = monitor.start_streamer("xqc").await.unwrap();
        let again = monitor.start_streamer("xqc").await.unwrap();
        assert!(tx.same_channel(&again));
        assert_eq!(monitor.streamers(), vec!["xqc".to_string()]);

        let exit = monitor.stop_streamer("xqc").await.unwrap();
        assert_eq!(exit.reason, ExitReason::Stopped);
        assert!(monitor.status("xqc").is_none());
        assert!(store.session(1).unwrap().2.is_some());
        assert!(store.session(2).is_none(), "only one session started");
    }

    #[tokio::test]
    async fn test_streamers_are_independent() {
        let store = InMemoryMomentStore::new();
        let (mut monitor, mut clips) = monitor(store.clone());

        let xqc = monitor.start_streamer("xqc").await.unwrap();
        let ninja = monitor.start_streamer("ninja").await.unwrap();

        for i in 0..8 {
            let event = SignalEvent::chat("xqc", i * 500, "CLIP IT", vec!["KEKW".into(), "KEKW".into()]);
            xqc.send(StreamerCommand::Signal(event)).await.unwrap();
            let quiet = SignalEvent::chat("ninja", i * 500, "hello", Vec::new());
            ninja.send(StreamerCommand::Signal(quiet)).await.unwrap();
        }

        let clip = clips.recv().await.unwrap();
        assert_eq!(clip.streamer, "xqc");

        let exits = monitor.shutdown(Duration::from_secs(5)).await;
        assert_eq!(exits.len(), 2);
        let total: u32 = exits.iter().map(|e| e.clips_dispatched).sum();
        assert_eq!(total, 1);
        assert!(matches!(monitor.start_streamer("xqc").await, Err(MonitorError::ShuttingDown)));
    }

    #[tokio::test]
    async fn test_offline_worker_is_reaped() {
        let (mut monitor, _clips) = monitor(InMemoryMomentStore::new());
        let tx = monitor.start_streamer("xqc").await.unwrap();
        let mut status = monitor.watch_status("xqc").unwrap();

        tx.send(StreamerCommand::StreamOffline {
            reason: "offline".to_string(),
        })
        .await
        .unwrap();

        status
            .wait_for(|s| s.state == MonitorState::Stopped)
            .await
            .unwrap();
        // Status is published just before the task returns
        tokio::time::sleep(Duration::from_millis(50)).await;

        let exits = monitor.reap_finished().await;
        assert_eq!(exits.len(), 1);
        assert!(matches!(exits[0].reason, ExitReason::StreamOffline(_)));
        assert!(monitor.streamers().is_empty());
    }

    #[tokio::test]
    async fn test_shutdown_aborts_worker_stuck_on_full_sink() {
        let mut config = DetectionConfig::default();
        config.keyword_threshold = 1;
        config.emote_threshold = 1;
        config.cooldowns.keyword = 0;
        config.cooldowns.emote_flood = 0;

        // Room for one request; nobody reads it
        let (sink, _clips) = ChannelClipSink::channel(1);
        let mut monitor = ClipMonitor::new(
            Arc::new(config),
            Arc::new(InMemoryMomentStore::new()),
            Arc::new(sink),
            Arc::new(ManualClock::new(0)),
        )
        .with_tick_interval(Duration::from_millis(10));

        let tx = monitor.start_streamer("xqc").await.unwrap();
        // Every message is a hype_moment; the second one blocks on the full sink
        for ts in [0, 500] {
            let event = SignalEvent::chat("xqc", ts, "CLIP IT", vec!["KEKW".into()]);
            tx.send(StreamerCommand::Signal(event)).await.unwrap();
        }
        let mut status = monitor.watch_status("xqc").unwrap();
        status
            .wait_for(|s| s.state == MonitorState::Dispatching && s.clips_today == 2)
            .await
            .unwrap();

        let exits = tokio::time::timeout(Duration::from_secs(5), monitor.shutdown(Duration::from_millis(50)))
            .await
            .expect("shutdown is bounded by its timeout");
        assert!(exits.is_empty(), "aborted worker reports no exit");
        assert!(monitor.streamers().is_empty());
        assert!(matches!(monitor.start_streamer("xqc").await, Err(MonitorError::ShuttingDown)));
    }
}
