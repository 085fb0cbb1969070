//! End-to-end tests: signals in through `ClipMonitor`, clip requests out
//!
//! Every test drives a real worker task with a `ManualClock` pinned at the
//! epoch, so housekeeping ticks never release anything on their own. Pending
//! raw triggers are released by the stop drain.

#[cfg(test)]
mod pipeline_integration_tests {
    use chrono::NaiveDate;
    use clipwatch::pipeline::{
        clock::ManualClock,
        config::DetectionConfig,
        db::{InMemoryMomentStore, MomentStore, SqliteMomentStore},
        dispatcher::ChannelClipSink,
        engine::StreamerContext,
        ingestion::{ExitReason, StreamerCommand},
        rate_limiter::DailyCount,
        supervisor::ClipMonitor,
        types::{ClipPriority, ClipRequest, SignalEvent, TriggerKind},
    };
    use std::sync::Arc;
    use tokio::sync::mpsc;
    use tokio::time::Duration;

    const STREAMER: &str = "xqc";

    fn epoch() -> NaiveDate {
        NaiveDate::from_ymd_opt(1970, 1, 1).unwrap()
    }

    fn monitor(store: Arc<dyn MomentStore>) -> (ClipMonitor, mpsc::Receiver<ClipRequest>) {
        let (sink, clips) = ChannelClipSink::channel(64);
        let monitor = ClipMonitor::new(
            Arc::new(DetectionConfig::default()),
            store,
            Arc::new(sink),
            Arc::new(ManualClock::new(0)),
        )
        .with_tick_interval(Duration::from_millis(10));
        (monitor, clips)
    }

    async fn send(tx: &mpsc::Sender<StreamerCommand>, event: SignalEvent) {
        tx.send(StreamerCommand::Signal(event)).await.unwrap();
    }

    /// Seven flat samples at 1000 viewers, 10s apart (t = 0..60s)
    async fn warm_viewer_baseline(tx: &mpsc::Sender<StreamerCommand>) {
        for i in 0..=6 {
            send(tx, SignalEvent::viewer_count(STREAMER, 1000, i * 10_000)).await;
        }
    }

    async fn drain_clips(clips: &mut mpsc::Receiver<ClipRequest>) -> Vec<ClipRequest> {
        let mut received = Vec::new();
        while let Ok(request) = clips.try_recv() {
            received.push(request);
        }
        received
    }

    #[tokio::test]
    async fn test_viewer_spike_dispatches_once() {
        let store = InMemoryMomentStore::new();
        let (mut monitor, mut clips) = monitor(Arc::new(store.clone()));
        let tx = monitor.start_streamer(STREAMER).await.unwrap();

        warm_viewer_baseline(&tx).await;
        send(&tx, SignalEvent::viewer_count(STREAMER, 3200, 70_000)).await;
        // Still elevated on the next poll: no second clip
        send(&tx, SignalEvent::viewer_count(STREAMER, 3300, 80_000)).await;

        let exit = monitor.stop_streamer(STREAMER).await.unwrap();
        assert_eq!(exit.reason, ExitReason::Stopped);
        assert_eq!(exit.clips_dispatched, 1);

        let received = drain_clips(&mut clips).await;
        assert_eq!(received.len(), 1);
        let clip = &received[0];
        assert_eq!(clip.trigger_kind(), TriggerKind::ViewerSpike);
        assert_eq!(clip.priority, ClipPriority::High);
        assert_eq!(clip.window_start, 70_000 - 20_000);
        assert_eq!(clip.window_end, 70_000 + 25_000);

        let moments = store.moments();
        assert_eq!(moments.len(), 1);
        assert_eq!(moments[0].trigger_type, TriggerKind::ViewerSpike);
        assert_eq!(moments[0].stream_elapsed_seconds, 70.0);
    }

    #[tokio::test]
    async fn test_keyword_repeated_eight_times_dispatches_keyword() {
        let (mut monitor, mut clips) = monitor(Arc::new(InMemoryMomentStore::new()));
        let tx = monitor.start_streamer(STREAMER).await.unwrap();

        for i in 0..8 {
            send(&tx, SignalEvent::chat(STREAMER, i * 500, "CLIP IT", Vec::new())).await;
        }

        let exit = monitor.stop_streamer(STREAMER).await.unwrap();
        assert_eq!(exit.clips_dispatched, 1);

        let received = drain_clips(&mut clips).await;
        assert_eq!(received.len(), 1);
        assert_eq!(received[0].trigger_kind(), TriggerKind::Keyword);
        assert_eq!(received[0].priority, ClipPriority::Normal);
        assert_eq!(received[0].confidence(), 0.65);
    }

    #[tokio::test]
    async fn test_keyword_with_emote_flood_dispatches_single_hype_moment() {
        let (mut monitor, mut clips) = monitor(Arc::new(InMemoryMomentStore::new()));
        let tx = monitor.start_streamer(STREAMER).await.unwrap();

        for i in 0..8 {
            let emotes = vec!["KEKW".to_string(), "KEKW".to_string()];
            send(&tx, SignalEvent::chat(STREAMER, i * 500, "CLIP IT", emotes)).await;
        }

        // The combo goes out immediately, before any stop
        let clip = clips.recv().await.unwrap();
        assert_eq!(clip.trigger_kind(), TriggerKind::HypeMoment);
        assert_eq!(clip.confidence(), 0.80);
        assert_eq!(clip.priority, ClipPriority::High);

        let exit = monitor.stop_streamer(STREAMER).await.unwrap();
        assert_eq!(exit.clips_dispatched, 1);
        assert!(drain_clips(&mut clips).await.is_empty(), "constituents are never dispatched");
    }

    /// viewer_spike, then emote_flood (no rule pairs them), then keyword
    async fn send_three_kind_burst(tx: &mpsc::Sender<StreamerCommand>) {
        warm_viewer_baseline(tx).await;
        send(tx, SignalEvent::viewer_count(STREAMER, 3200, 70_000)).await;

        for i in 1..=8 {
            let emotes = vec!["KEKW".to_string(), "KEKW".to_string()];
            send(tx, SignalEvent::chat(STREAMER, 70_000 + i * 500, "gg", emotes)).await;
        }
        for i in 1..=8 {
            send(tx, SignalEvent::chat(STREAMER, 74_000 + i * 500, "CLIP IT", Vec::new())).await;
        }
    }

    #[tokio::test]
    async fn test_three_trigger_kinds_dispatch_one_super_combo() {
        let (mut monitor, mut clips) = monitor(Arc::new(InMemoryMomentStore::new()));
        let tx = monitor.start_streamer(STREAMER).await.unwrap();
        let status = monitor.watch_status(STREAMER).unwrap();

        send_three_kind_burst(&tx).await;

        let exit = monitor.stop_streamer(STREAMER).await.unwrap();
        assert_eq!(exit.clips_dispatched, 1);

        let received = drain_clips(&mut clips).await;
        assert_eq!(received.len(), 1);
        assert_eq!(received[0].trigger_kind(), TriggerKind::SuperCombo);
        assert_eq!(received[0].confidence(), 0.95);
        assert_eq!(received[0].trigger.timestamp, 78_000);

        let fired: Vec<TriggerKind> = status.borrow().recent_triggers.iter().map(|t| t.kind).collect();
        assert_eq!(
            fired,
            vec![
                TriggerKind::ViewerSpike,
                TriggerKind::EmoteFlood,
                TriggerKind::Keyword,
                TriggerKind::SuperCombo
            ]
        );
    }

    #[tokio::test]
    async fn test_daily_cap_rejects_even_super_combo() {
        let store = InMemoryMomentStore::new();
        store
            .save_daily_count(STREAMER, DailyCount { date: epoch(), count: 50 })
            .await
            .unwrap();
        let (mut monitor, mut clips) = monitor(Arc::new(store.clone()));
        let tx = monitor.start_streamer(STREAMER).await.unwrap();
        let status = monitor.watch_status(STREAMER).unwrap();

        send_three_kind_burst(&tx).await;

        let exit = monitor.stop_streamer(STREAMER).await.unwrap();
        assert_eq!(exit.clips_dispatched, 0);
        assert!(drain_clips(&mut clips).await.is_empty());
        assert!(store.moments().is_empty());

        let status = status.borrow().clone();
        assert_eq!(status.clips_today, 50);
        assert!(status.recent_triggers.iter().any(|t| t.kind == TriggerKind::SuperCombo));
    }

    #[test]
    fn test_moderate_chat_on_quiet_channel_does_not_fire_velocity() {
        let clock = ManualClock::new(0);
        let mut ctx = StreamerContext::new(STREAMER, Arc::new(DetectionConfig::default()), None, epoch());

        let mut fired = Vec::new();
        let mut ts = 0;
        // 30s at 3 msg/s, then 10s at 8 msg/s
        for (secs, per_sec) in [(30, 3), (10, 8)] {
            for _ in 0..secs {
                for j in 0..per_sec {
                    let event = SignalEvent::chat(STREAMER, ts + j * (1000 / per_sec), "hello chat", Vec::new());
                    fired.extend(ctx.process(&event, &clock).fired);
                }
                ts += 1000;
            }
        }

        assert!(fired.iter().all(|t| t.kind != TriggerKind::ChatVelocity));
        assert!(ctx.status().chat_velocity_per_min < 9.0 * 60.0);
    }

    #[tokio::test]
    async fn test_sqlite_store_records_moment_and_daily_count() {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("clips.db");
        let schema_dir = concat!(env!("CARGO_MANIFEST_DIR"), "/sql");
        let store = Arc::new(SqliteMomentStore::open_with_schema(db_path.to_str().unwrap(), schema_dir).unwrap());

        let (mut monitor, _clips) = monitor(store.clone());
        let tx = monitor.start_streamer(STREAMER).await.unwrap();
        for i in 0..8 {
            send(&tx, SignalEvent::chat(STREAMER, i * 500, "clip it", Vec::new())).await;
        }
        let exit = monitor.stop_streamer(STREAMER).await.unwrap();
        assert_eq!(exit.clips_dispatched, 1);

        let moments = store.moments_for_session(1).unwrap();
        assert_eq!(moments.len(), 1);
        assert_eq!(moments[0].trigger_type, TriggerKind::Keyword);
        assert!(!moments[0].processed);
        assert_eq!(moments[0].trigger_data["kind"], "keyword");

        let daily = store.load_daily_count(STREAMER).await.unwrap().unwrap();
        assert_eq!(daily, DailyCount { date: epoch(), count: 1 });

        // A restart on the same day resumes the counter
        drop(monitor);
        let reopened = SqliteMomentStore::open_with_schema(db_path.to_str().unwrap(), schema_dir).unwrap();
        assert_eq!(reopened.load_daily_count(STREAMER).await.unwrap().unwrap().count, 1);
    }
}
