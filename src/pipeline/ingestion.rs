//! Per-streamer worker: the single consumer of a streamer's signal channel
//!
//! Producers (viewer poller, chat feed) only enqueue `StreamerCommand`s. The
//! worker dequeues them in order and is the only code that touches the
//! streamer's `StreamerContext`, so detection state needs no locking.
//!
//! Main loop:
//! 1. Receives commands via the bounded mpsc channel
//! 2. Runs each signal through the context, dispatches admitted triggers
//! 3. On every tick, releases raw triggers whose combo window has passed
//!
//! On `Stop`, channel close, `StreamOffline` or a fatal store error the worker
//! closes its receiver, drains what is already buffered, releases pending
//! triggers, ends the session and publishes `Stopped`.

use super::baseline_store::{BaselineSnapshotStore, BaselineSummary};
use super::clock::Clock;
use super::db::MomentStore;
use super::dispatcher::ClipDispatcher;
use super::engine::{Evaluation, MonitorState, StreamerContext, StreamerStatus};
use super::types::SignalEvent;
use crate::error::DispatchError;
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tokio::time::{interval, Duration, MissedTickBehavior};

/// Messages accepted by a streamer worker
#[derive(Debug, Clone, PartialEq)]
pub enum StreamerCommand {
    Signal(SignalEvent),
    /// Sustained poll failure: the stream is considered offline
    StreamOffline { reason: String },
    Stop,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExitReason {
    Stopped,
    StreamOffline(String),
    Fatal(String),
}

/// Summary returned when a worker task finishes
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerExit {
    pub streamer: String,
    pub reason: ExitReason,
    pub clips_dispatched: u32,
}

pub struct StreamerWorker {
    context: StreamerContext,
    dispatcher: ClipDispatcher,
    store: Arc<dyn MomentStore>,
    clock: Arc<dyn Clock>,
    status_tx: watch::Sender<StreamerStatus>,
    snapshots: Option<Arc<BaselineSnapshotStore>>,
    tick_interval: Duration,
    clips_dispatched: u32,
}

impl StreamerWorker {
    pub fn new(
        context: StreamerContext,
        dispatcher: ClipDispatcher,
        store: Arc<dyn MomentStore>,
        clock: Arc<dyn Clock>,
        status_tx: watch::Sender<StreamerStatus>,
    ) -> Self {
        Self {
            context,
            dispatcher,
            store,
            clock,
            status_tx,
            snapshots: None,
            tick_interval: Duration::from_millis(1000),
            clips_dispatched: 0,
        }
    }

    pub fn with_tick_interval(mut self, tick_interval: Duration) -> Self {
        self.tick_interval = tick_interval;
        self
    }

    pub fn with_baseline_snapshots(mut self, snapshots: Arc<BaselineSnapshotStore>) -> Self {
        self.snapshots = Some(snapshots);
        self
    }

    fn publish(&mut self, state: MonitorState) {
        self.context.set_state(state);
        self.status_tx.send_replace(self.context.status().clone());
    }

    /// Run until stopped. Consumes the worker; the context is torn down on return.
    pub async fn run(mut self, mut rx: mpsc::Receiver<StreamerCommand>) -> WorkerExit {
        let streamer = self.context.streamer().to_string();

        log::info!("🚀 Monitoring {}", streamer);
        log::info!("   ├─ Session: {}", self.dispatcher.session().id);
        log::info!("   ├─ Clips today: {}", self.context.daily_count().count);
        self.log_saved_baseline(&streamer);
        log::info!("   └─ Waiting for signals...");

        self.publish(MonitorState::Monitoring);

        let mut ticker = interval(self.tick_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let reason = loop {
            tokio::select! {
                command = rx.recv() => match command {
                    Some(StreamerCommand::Signal(event)) => {
                        if let Err(e) = self.handle_signal(&event).await {
                            break ExitReason::Fatal(e.to_string());
                        }
                    }
                    Some(StreamerCommand::StreamOffline { reason }) => {
                        log::warn!("📴 {} went offline: {}", streamer, reason);
                        break ExitReason::StreamOffline(reason);
                    }
                    Some(StreamerCommand::Stop) | None => break ExitReason::Stopped,
                },

                _ = ticker.tick() => {
                    let now = self.clock.now_ms();
                    let evaluation = self.context.tick(now, self.clock.as_ref());
                    if let Err(e) = self.dispatch_all(evaluation).await {
                        break ExitReason::Fatal(e.to_string());
                    }
                }
            }
        };

        self.finish(rx, reason).await
    }

    async fn handle_signal(&mut self, event: &SignalEvent) -> Result<(), DispatchError> {
        self.publish(MonitorState::Evaluating);
        let evaluation = self.context.process(event, self.clock.as_ref());
        self.dispatch_all(evaluation).await
    }

    async fn dispatch_all(&mut self, evaluation: Evaluation) -> Result<(), DispatchError> {
        if evaluation.admitted.is_empty() {
            self.publish(MonitorState::Monitoring);
            return Ok(());
        }

        self.publish(MonitorState::Dispatching);
        for admitted in evaluation.admitted {
            self.dispatcher
                .dispatch(&admitted.trigger, admitted.priority, admitted.daily)
                .await?;
            self.clips_dispatched += 1;
        }
        self.publish(MonitorState::Monitoring);
        Ok(())
    }

    async fn finish(mut self, mut rx: mpsc::Receiver<StreamerCommand>, mut reason: ExitReason) -> WorkerExit {
        let streamer = self.context.streamer().to_string();
        rx.close();

        if matches!(reason, ExitReason::Fatal(_)) {
            log::error!("❌ {} stopping after fatal error: {:?}", streamer, reason);
        } else {
            // Drain events that were enqueued before the close
            let mut drained = 0u32;
            while let Ok(command) = rx.try_recv() {
                if let StreamerCommand::Signal(event) = command {
                    drained += 1;
                    if let Err(e) = self.handle_signal(&event).await {
                        reason = ExitReason::Fatal(e.to_string());
                        break;
                    }
                }
            }
            if drained > 0 {
                log::info!("🔄 {} drained {} buffered signals", streamer, drained);
            }

            if !matches!(reason, ExitReason::Fatal(_)) {
                let evaluation = self.context.drain(self.clock.as_ref());
                if let Err(e) = self.dispatch_all(evaluation).await {
                    reason = ExitReason::Fatal(e.to_string());
                }
            }
        }

        let session = self.dispatcher.session();
        if let Err(e) = self.store.end_session(session.id, self.clock.now_ms()).await {
            log::error!("❌ Failed to end session {} for {}: {}", session.id, streamer, e);
        }

        self.save_baseline(&streamer);
        self.publish(MonitorState::Stopped);

        log::info!(
            "✅ {} stopped ({:?}, {} clips this session)",
            streamer,
            reason,
            self.clips_dispatched
        );

        WorkerExit {
            streamer,
            reason,
            clips_dispatched: self.clips_dispatched,
        }
    }

    fn log_saved_baseline(&self, streamer: &str) {
        let Some(snapshots) = &self.snapshots else {
            return;
        };
        match snapshots.load(streamer) {
            Ok(Some(summary)) => log::info!(
                "   ├─ Last chat baseline: {:.2} msg/s ± {:.2} ({} samples, saved {})",
                summary.mean,
                summary.stdev,
                summary.sample_count,
                summary.saved_at
            ),
            Ok(None) => log::info!("   ├─ No saved chat baseline"),
            Err(e) => log::warn!("⚠️  Could not read baseline snapshot for {}: {}", streamer, e),
        }
    }

    fn save_baseline(&self, streamer: &str) {
        let Some(snapshots) = &self.snapshots else {
            return;
        };
        let stats = self.context.chat_baseline_stats();
        if stats.count == 0 {
            return;
        }
        let summary = BaselineSummary::from_stats(&stats, chrono::Utc::now());
        if let Err(e) = snapshots.save(streamer, summary) {
            log::warn!("⚠️  Could not save baseline snapshot for {}: {}", streamer, e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::clock::ManualClock;
    use crate::pipeline::config::DetectionConfig;
    use crate::pipeline::db::InMemoryMomentStore;
    use crate::pipeline::dispatcher::{ChannelClipSink, Session};
    use crate::pipeline::types::TriggerKind;
    use chrono::NaiveDate;

    const STREAMER: &str = "xqc";

    struct Harness {
        tx: mpsc::Sender<StreamerCommand>,
        clips: mpsc::Receiver<crate::pipeline::types::ClipRequest>,
        status: watch::Receiver<StreamerStatus>,
        store: InMemoryMomentStore,
        join: tokio::task::JoinHandle<WorkerExit>,
    }

    async fn spawn_worker(clock: Arc<ManualClock>) -> Harness {
        spawn_worker_with(clock, None).await
    }

    async fn spawn_worker_with(clock: Arc<ManualClock>, snapshots: Option<Arc<BaselineSnapshotStore>>) -> Harness {
        let config = Arc::new(DetectionConfig::default());
        let store = InMemoryMomentStore::new();
        let session_id = store.start_session(STREAMER, 0).await.unwrap();
        let (sink, clips) = ChannelClipSink::channel(16);

        let context = StreamerContext::new(
            STREAMER,
            config.clone(),
            None,
            NaiveDate::from_ymd_opt(1970, 1, 1).unwrap(),
        );
        let dispatcher = ClipDispatcher::new(
            config,
            Arc::new(sink),
            Arc::new(store.clone()),
            Session {
                id: session_id,
                started_at_ms: 0,
            },
        );
        let (status_tx, status) = watch::channel(context.status().clone());
        let mut worker = StreamerWorker::new(context, dispatcher, Arc::new(store.clone()), clock, status_tx)
            .with_tick_interval(Duration::from_millis(10));
        if let Some(snapshots) = snapshots {
            worker = worker.with_baseline_snapshots(snapshots);
        }

        let (tx, rx) = mpsc::channel(64);
        let join = tokio::spawn(worker.run(rx));

        Harness {
            tx,
            clips,
            status,
            store,
            join,
        }
    }

    #[tokio::test]
    async fn test_stop_drains_buffered_signals_and_pending_triggers() {
        let clock = Arc::new(ManualClock::new(0));
        let mut h = spawn_worker(clock).await;

        for i in 0..=6 {
            let event = SignalEvent::viewer_count(STREAMER, 1000, i * 10_000);
            h.tx.send(StreamerCommand::Signal(event)).await.unwrap();
        }
        let spike = SignalEvent::viewer_count(STREAMER, 3200, 70_000);
        h.tx.send(StreamerCommand::Signal(spike)).await.unwrap();
        h.tx.send(StreamerCommand::Stop).await.unwrap();

        let exit = h.join.await.unwrap();
        assert_eq!(exit.reason, ExitReason::Stopped);
        assert_eq!(exit.clips_dispatched, 1);

        let clip = h.clips.recv().await.unwrap();
        assert_eq!(clip.trigger_kind(), TriggerKind::ViewerSpike);
        assert_eq!(clip.window_start, 50_000);

        assert_eq!(h.store.moments().len(), 1);
        assert!(h.store.session(1).unwrap().2.is_some(), "session ended");
        assert_eq!(h.status.borrow().state, MonitorState::Stopped);
        assert_eq!(h.status.borrow().clips_today, 1);
    }

    #[tokio::test]
    async fn test_stream_offline_stops_worker() {
        let clock = Arc::new(ManualClock::new(0));
        let h = spawn_worker(clock).await;

        h.tx
            .send(StreamerCommand::StreamOffline {
                reason: "30 consecutive failed polls".to_string(),
            })
            .await
            .unwrap();

        let exit = h.join.await.unwrap();
        assert!(matches!(exit.reason, ExitReason::StreamOffline(_)));
        assert_eq!(exit.clips_dispatched, 0);
    }

    #[tokio::test]
    async fn test_closed_clip_sink_is_fatal() {
        let clock = Arc::new(ManualClock::new(0));
        let h = spawn_worker(clock).await;
        drop(h.clips);

        let mut ts = 0;
        for _ in 0..8 {
            let event = SignalEvent::chat(STREAMER, ts, "CLIP IT", vec!["KEKW".into(), "KEKW".into()]);
            h.tx.send(StreamerCommand::Signal(event)).await.unwrap();
            ts += 500;
        }

        let exit = h.join.await.unwrap();
        assert!(matches!(exit.reason, ExitReason::Fatal(_)));
    }

    #[tokio::test]
    async fn test_tick_releases_expired_triggers() {
        let clock = Arc::new(ManualClock::new(0));
        let mut h = spawn_worker(clock.clone()).await;

        for i in 0..=6 {
            let event = SignalEvent::viewer_count(STREAMER, 1000, i * 10_000);
            h.tx.send(StreamerCommand::Signal(event)).await.unwrap();
        }
        let spike = SignalEvent::viewer_count(STREAMER, 3200, 70_000);
        h.tx.send(StreamerCommand::Signal(spike)).await.unwrap();

        // Wall clock moves past the combo window; the next tick releases it
        clock.set(80_001);
        let clip = tokio::time::timeout(Duration::from_secs(5), h.clips.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(clip.trigger_kind(), TriggerKind::ViewerSpike);

        h.tx.send(StreamerCommand::Stop).await.unwrap();
        assert_eq!(h.join.await.unwrap().clips_dispatched, 1);
    }

    #[tokio::test]
    async fn test_stop_saves_chat_baseline_snapshot() {
        let dir = tempfile::tempdir().unwrap();
        let snapshots = Arc::new(BaselineSnapshotStore::new(dir.path().join("baselines.json")));
        let earlier = BaselineSummary {
            mean: 9.0,
            stdev: 1.0,
            sample_count: 30,
            saved_at: chrono::Utc::now(),
        };
        snapshots.save("ninja", earlier.clone()).unwrap();

        let clock = Arc::new(ManualClock::new(0));
        let h = spawn_worker_with(clock, Some(snapshots.clone())).await;

        // One message per second: six baseline samples of 0.1..0.6 msg/s
        for i in 0..6 {
            let event = SignalEvent::chat(STREAMER, i * 1000, "hello", Vec::new());
            h.tx.send(StreamerCommand::Signal(event)).await.unwrap();
        }
        h.tx.send(StreamerCommand::Stop).await.unwrap();
        assert_eq!(h.join.await.unwrap().reason, ExitReason::Stopped);

        let saved = snapshots.load(STREAMER).unwrap().expect("baseline saved on stop");
        assert_eq!(saved.sample_count, 6);
        assert!((saved.mean - 0.35).abs() < 1e-9);
        assert_eq!(snapshots.load("ninja").unwrap(), Some(earlier));
    }

    #[tokio::test]
    async fn test_stop_without_chat_skips_snapshot() {
        let dir = tempfile::tempdir().unwrap();
        let snapshots = Arc::new(BaselineSnapshotStore::new(dir.path().join("baselines.json")));

        let h = spawn_worker_with(Arc::new(ManualClock::new(0)), Some(snapshots.clone())).await;
        h.tx.send(StreamerCommand::Stop).await.unwrap();
        h.join.await.unwrap();

        assert_eq!(snapshots.load(STREAMER).unwrap(), None);
        assert!(!snapshots.path().exists());
    }
}
