//! clipwatch - live clip trigger runtime
//!
//! Orchestrates one detection worker per streamer:
//! - Initializes SQLite database with schema
//! - Starts a `ClipMonitor` worker per configured streamer
//! - Spawns a Kick viewer poller and a Pusher chat feed per streamer
//! - Logs every clip request the workers emit
//!
//! Usage:
//!   cargo run --release --bin clipwatch
//!
//! Environment variables: see `RuntimeConfig::from_env` and
//! `DetectionConfig::from_env`. `CLIPWATCH_STREAMERS` is required.

use clipwatch::pipeline::{
    baseline_store::BaselineSnapshotStore,
    clock::{Clock, SystemClock},
    config::{DetectionConfig, RuntimeConfig},
    db::{MomentStore, SqliteMomentStore},
    dispatcher::ChannelClipSink,
    ingestion::StreamerCommand,
    supervisor::ClipMonitor,
    types::ClipRequest,
};
use clipwatch::sources::{
    chat::{run_chat_feed, ChatFeedConfig},
    kick::{run_viewer_poller, KickChannelApi, ViewerCountSource},
};
use dotenv::dotenv;
use log::{error, info, warn};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize environment and logging
    dotenv().ok();
    env_logger::init();

    info!("🎬 clipwatch - live clip trigger runtime");
    info!("   └─ Version: {}", env!("CARGO_PKG_VERSION"));

    // Load configuration
    let runtime = RuntimeConfig::from_env()?;
    let detection = Arc::new(DetectionConfig::from_env()?);

    info!("✅ Configuration loaded");
    info!("   ├─ Database: {}", runtime.db_path);
    info!("   ├─ Streamers: {}", runtime.streamers.join(", "));
    info!("   ├─ Spike ratio: {:.1}x", detection.spike_ratio);
    info!("   ├─ Chat velocity threshold: {:.1} msg/s", detection.chat_velocity_threshold);
    info!("   ├─ Combo window: {}s", detection.combo_window_secs);
    info!("   └─ Daily cap: {} clips", detection.max_clips_per_day);

    // Initialize database
    info!("🔧 Initializing database...");
    if let Some(parent) = std::path::Path::new(&runtime.db_path).parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    let store: Arc<dyn MomentStore> =
        Arc::new(SqliteMomentStore::open_with_schema(&runtime.db_path, &runtime.schema_dir)?);
    info!("✅ Database initialized");

    // Clip request consumer
    let (sink, clip_rx) = ChannelClipSink::channel(runtime.clip_buffer);
    let consumer = tokio::spawn(log_clip_requests(clip_rx));

    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let mut monitor = ClipMonitor::new(detection.clone(), store, Arc::new(sink), clock.clone())
        .with_channel_buffer(runtime.channel_buffer)
        .with_tick_interval(Duration::from_millis(runtime.tick_interval_ms));
    if let Some(path) = &runtime.baseline_snapshot_path {
        monitor = monitor.with_baseline_snapshots(Arc::new(BaselineSnapshotStore::new(path.as_str())));
    }

    let api: Arc<dyn ViewerCountSource> = Arc::new(KickChannelApi::new(&runtime.kick_api_base)?);

    info!("🚀 Starting {} streamer(s)...", runtime.streamers.len());
    for streamer in &runtime.streamers {
        let tx = match monitor.start_streamer(streamer).await {
            Ok(tx) => tx,
            Err(e) => {
                error!("❌ Failed to start {}: {}", streamer, e);
                continue;
            }
        };
        spawn_sources(streamer, tx, api.clone(), clock.clone(), &runtime, &detection);
    }

    info!("🔄 Press CTRL+C to shutdown gracefully");

    let mut reap = tokio::time::interval(Duration::from_secs(30));
    loop {
        tokio::select! {
            signal = tokio::signal::ctrl_c() => {
                match signal {
                    Ok(()) => info!("⚠️  Received CTRL+C, shutting down..."),
                    Err(err) => error!("❌ Failed to listen for CTRL+C: {}", err),
                }
                break;
            }
            _ = reap.tick() => {
                for exit in monitor.reap_finished().await {
                    info!(
                        "📴 {} finished: {:?} ({} clips this session)",
                        exit.streamer, exit.reason, exit.clips_dispatched
                    );
                }
                if monitor.streamers().is_empty() {
                    warn!("⚠️  No streamers left to monitor");
                    break;
                }
            }
        }
    }

    let exits = monitor
        .shutdown(Duration::from_secs(runtime.shutdown_timeout_secs))
        .await;
    for exit in &exits {
        info!("   ├─ {}: {} clips this session", exit.streamer, exit.clips_dispatched);
    }

    // Every sink clone is gone once the monitor is dropped
    drop(monitor);
    let _ = tokio::time::timeout(Duration::from_secs(2), consumer).await;

    info!("✅ clipwatch stopped");
    Ok(())
}

/// Spawn the viewer poller and, once the chatroom is known, the chat feed
fn spawn_sources(
    streamer: &str,
    tx: mpsc::Sender<StreamerCommand>,
    api: Arc<dyn ViewerCountSource>,
    clock: Arc<dyn Clock>,
    runtime: &RuntimeConfig,
    detection: &DetectionConfig,
) {
    let streamer = streamer.to_string();
    let poll_interval = Duration::from_secs(detection.viewer_poll_interval_secs);
    let max_failures = detection.max_poll_failures;
    let ws_url = runtime.pusher_ws_url.clone();
    let reconnect_delay = Duration::from_secs(runtime.ws_reconnect_delay_secs);
    let max_reconnect_attempts = runtime.ws_max_reconnect_attempts;

    tokio::spawn(async move {
        match api.fetch(&streamer).await {
            Ok(snapshot) => match snapshot.chatroom_id {
                Some(chatroom_id) => {
                    let config = ChatFeedConfig {
                        ws_url,
                        chatroom_id,
                        reconnect_delay,
                        max_reconnect_attempts,
                    };
                    let (name, chat_tx, chat_clock) = (streamer.clone(), tx.clone(), clock.clone());
                    tokio::spawn(async move {
                        let exit = run_chat_feed(config, name.clone(), chat_tx, chat_clock).await;
                        info!("💬 Chat feed for {} ended: {:?}", name, exit);
                    });
                }
                None => warn!("⚠️  {} has no chatroom, chat triggers disabled", streamer),
            },
            Err(e) => warn!("⚠️  Chatroom lookup for {} failed, chat triggers disabled: {}", streamer, e),
        }

        let exit = run_viewer_poller(api, streamer.clone(), tx, clock, poll_interval, max_failures).await;
        info!("👀 Viewer poller for {} ended: {:?}", streamer, exit);
    });
}

async fn log_clip_requests(mut rx: mpsc::Receiver<ClipRequest>) {
    while let Some(request) = rx.recv().await {
        info!("🎬 CLIP REQUEST: {}", request.streamer);
        info!("   ├─ Trigger: {}", request.trigger_kind());
        info!("   ├─ Confidence: {:.2}", request.confidence());
        info!("   ├─ Window: {} → {}", request.window_start, request.window_end);
        info!("   └─ Priority: {:?}", request.priority);
    }
}
