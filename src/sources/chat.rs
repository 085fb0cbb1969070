//! Kick chat over the Pusher websocket
//!
//! Kick publishes chat on Pusher channel `chatrooms.{id}.v2`. Every frame is a
//! JSON envelope `{"event": ..., "data": ...}` where `data` is itself a JSON
//! encoded string. Chat messages carry event `App\Events\ChatMessageEvent`.
//!
//! Emotes are embedded in content as `[emote:<id>:<name>]`; the names are
//! extracted into `ChatMessage::emotes` and the tags are replaced by the bare
//! name so keyword matching sees plain text.

use crate::error::ChatParseError;
use crate::pipeline::clock::Clock;
use crate::pipeline::ingestion::StreamerCommand;
use crate::pipeline::types::{ChatMessage, SignalEvent, SignalPayload};
use futures_util::{SinkExt, StreamExt};
use regex::Regex;
use serde::Deserialize;
use std::sync::{Arc, OnceLock};
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

const CHAT_MESSAGE_EVENT: &str = "App\\Events\\ChatMessageEvent";
const PING_EVENT: &str = "pusher:ping";
const SUBSCRIBED_EVENT: &str = "pusher_internal:subscription_succeeded";

#[derive(Debug, Deserialize)]
struct PusherEnvelope {
    event: String,
    #[serde(default)]
    data: serde_json::Value,
}

#[derive(Debug, Deserialize)]
struct KickChatPayload {
    content: Option<String>,
    sender: Option<KickSender>,
}

#[derive(Debug, Deserialize)]
struct KickSender {
    username: Option<String>,
}

/// Decoded Pusher frame
#[derive(Debug, Clone, PartialEq)]
pub enum PusherFrame {
    Chat(SignalEvent),
    Ping,
    Subscribed,
    Other(String),
}

fn emote_tag() -> Option<&'static Regex> {
    static EMOTE_TAG: OnceLock<Option<Regex>> = OnceLock::new();
    EMOTE_TAG
        .get_or_init(|| Regex::new(r"\[emote:(\d+):([^\]]+)\]").ok())
        .as_ref()
}

/// Split `[emote:<id>:<name>]` tags out of message content.
///
/// Returns the content with each tag replaced by its name, and the names in
/// order of appearance (repeats kept).
pub fn extract_emotes(content: &str) -> (String, Vec<String>) {
    let Some(re) = emote_tag() else {
        return (content.to_string(), Vec::new());
    };

    let emotes = re
        .captures_iter(content)
        .filter_map(|cap| cap.get(2).map(|m| m.as_str().to_string()))
        .collect();
    let text = re.replace_all(content, "$2").into_owned();

    (text, emotes)
}

/// Decode one raw websocket text frame
///
/// # Arguments
/// * `streamer` - Streamer the chatroom belongs to
/// * `received_at` - Local receive time; becomes the event timestamp so chat
///   and viewer samples share one clock
pub fn decode_frame(streamer: &str, raw: &str, received_at: i64) -> Result<PusherFrame, ChatParseError> {
    let envelope: PusherEnvelope = serde_json::from_str(raw)?;

    match envelope.event.as_str() {
        CHAT_MESSAGE_EVENT => {}
        PING_EVENT => return Ok(PusherFrame::Ping),
        SUBSCRIBED_EVENT => return Ok(PusherFrame::Subscribed),
        other => return Ok(PusherFrame::Other(other.to_string())),
    }

    let payload: KickChatPayload = match envelope.data {
        serde_json::Value::String(encoded) => serde_json::from_str(&encoded)?,
        serde_json::Value::Null => return Err(ChatParseError::MissingField("data")),
        object => serde_json::from_value(object)?,
    };

    let content = payload.content.ok_or(ChatParseError::MissingField("content"))?;
    let (content, emotes) = extract_emotes(&content);

    Ok(PusherFrame::Chat(SignalEvent {
        streamer: streamer.to_string(),
        timestamp: received_at,
        payload: SignalPayload::ChatMessage(ChatMessage {
            content,
            emotes,
            sender: payload.sender.and_then(|s| s.username),
        }),
    }))
}

/// Chat message carried by a frame, if any. Non-chat events are `Ok(None)`.
pub fn parse_pusher_frame(
    streamer: &str,
    raw: &str,
    received_at: i64,
) -> Result<Option<SignalEvent>, ChatParseError> {
    match decode_frame(streamer, raw, received_at)? {
        PusherFrame::Chat(event) => Ok(Some(event)),
        _ => Ok(None),
    }
}

pub fn subscribe_frame(chatroom_id: u64) -> String {
    serde_json::json!({
        "event": "pusher:subscribe",
        "data": { "channel": format!("chatrooms.{}.v2", chatroom_id) }
    })
    .to_string()
}

fn pong_frame() -> String {
    serde_json::json!({ "event": "pusher:pong", "data": {} }).to_string()
}

#[derive(Debug, Clone)]
pub struct ChatFeedConfig {
    pub ws_url: String,
    pub chatroom_id: u64,
    pub reconnect_delay: Duration,
    pub max_reconnect_attempts: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChatFeedExit {
    WorkerGone,
    /// Gave up after this many consecutive failed connections
    ReconnectsExhausted(u32),
}

enum SessionEnd {
    WorkerGone,
    Disconnected,
}

/// Forward chat from the streamer's chatroom into its worker.
///
/// Malformed frames are logged and dropped. The socket is reopened after
/// `reconnect_delay` until `max_reconnect_attempts` consecutive attempts fail.
pub async fn run_chat_feed(
    config: ChatFeedConfig,
    streamer: String,
    tx: mpsc::Sender<StreamerCommand>,
    clock: Arc<dyn Clock>,
) -> ChatFeedExit {
    let mut attempts = 0u32;

    loop {
        match tokio_tungstenite::connect_async(config.ws_url.as_str()).await {
            Ok((ws_stream, _)) => {
                log::info!("💬 Chat connected for {} (chatroom {})", streamer, config.chatroom_id);
                attempts = 0;
                if let SessionEnd::WorkerGone = chat_session(ws_stream, &config, &streamer, &tx, clock.as_ref()).await {
                    return ChatFeedExit::WorkerGone;
                }
            }
            Err(e) => log::warn!("⚠️  [chat] {} connect failed: {}", streamer, e),
        }

        if tx.is_closed() {
            return ChatFeedExit::WorkerGone;
        }

        attempts += 1;
        if attempts > config.max_reconnect_attempts {
            log::error!("❌ [chat] {} giving up after {} reconnect attempts", streamer, attempts - 1);
            return ChatFeedExit::ReconnectsExhausted(attempts - 1);
        }

        log::info!(
            "[chat] {} reconnecting in {:?} (attempt {}/{})",
            streamer,
            config.reconnect_delay,
            attempts,
            config.max_reconnect_attempts
        );
        tokio::time::sleep(config.reconnect_delay).await;
    }
}

async fn chat_session(
    ws_stream: WsStream,
    config: &ChatFeedConfig,
    streamer: &str,
    tx: &mpsc::Sender<StreamerCommand>,
    clock: &dyn Clock,
) -> SessionEnd {
    let (mut write, mut read) = ws_stream.split();

    if let Err(e) = write.send(Message::Text(subscribe_frame(config.chatroom_id))).await {
        log::warn!("⚠️  [chat] {} subscribe failed: {}", streamer, e);
        return SessionEnd::Disconnected;
    }

    loop {
        let frame = tokio::select! {
            frame = read.next() => frame,
            _ = tx.closed() => return SessionEnd::WorkerGone,
        };

        let text = match frame {
            Some(Ok(Message::Text(text))) => text,
            Some(Ok(Message::Ping(data))) => {
                let _ = write.send(Message::Pong(data)).await;
                continue;
            }
            Some(Ok(Message::Close(_))) | None => return SessionEnd::Disconnected,
            Some(Ok(_)) => continue,
            Some(Err(e)) => {
                log::warn!("⚠️  [chat] {} socket error: {}", streamer, e);
                return SessionEnd::Disconnected;
            }
        };

        match route_frame(streamer, &text, clock.now_ms()) {
            FrameAction::Forward(event) => {
                if tx.send(StreamerCommand::Signal(event)).await.is_err() {
                    return SessionEnd::WorkerGone;
                }
            }
            FrameAction::Pong => {
                let _ = write.send(Message::Text(pong_frame())).await;
            }
            FrameAction::Skip => {}
        }
    }
}

/// What the session loop does with one text frame
#[derive(Debug, PartialEq)]
enum FrameAction {
    Forward(SignalEvent),
    Pong,
    Skip,
}

/// Decode a text frame; malformed frames are logged at warn and skipped
fn route_frame(streamer: &str, text: &str, received_at: i64) -> FrameAction {
    match decode_frame(streamer, text, received_at) {
        Ok(PusherFrame::Chat(event)) => FrameAction::Forward(event),
        Ok(PusherFrame::Ping) => FrameAction::Pong,
        Ok(PusherFrame::Subscribed) => {
            log::info!("[chat] {} subscription confirmed", streamer);
            FrameAction::Skip
        }
        Ok(PusherFrame::Other(event)) => {
            log::trace!("[chat] ignoring {}", event);
            FrameAction::Skip
        }
        Err(e) => {
            log::warn!("⚠️  [chat] dropping malformed frame for {}: {}", streamer, e);
            FrameAction::Skip
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chat_frame(data: &str) -> String {
        serde_json::json!({
            "event": "App\\Events\\ChatMessageEvent",
            "data": data,
            "channel": "chatrooms.668.v2"
        })
        .to_string()
    }

    #[test]
    fn test_chat_frame_is_parsed() {
        let data = r#"{"id":"abc","content":"CLIP IT [emote:37226:KEKW] [emote:37226:KEKW]","created_at":"2024-06-01T12:00:00+00:00","sender":{"id":1,"username":"viewer1"}}"#;
        let event = parse_pusher_frame("xqc", &chat_frame(data), 1_000).unwrap().unwrap();

        assert_eq!(event.streamer, "xqc");
        assert_eq!(event.timestamp, 1_000);
        match event.payload {
            SignalPayload::ChatMessage(message) => {
                assert_eq!(message.content, "CLIP IT KEKW KEKW");
                assert_eq!(message.emotes, vec!["KEKW".to_string(), "KEKW".to_string()]);
                assert_eq!(message.sender.as_deref(), Some("viewer1"));
            }
            other => panic!("unexpected payload {:?}", other),
        }
    }

    #[test]
    fn test_non_chat_events_are_none() {
        let ping = r#"{"event":"pusher:ping","data":{}}"#;
        assert_eq!(parse_pusher_frame("xqc", ping, 0).unwrap(), None);
        assert_eq!(decode_frame("xqc", ping, 0).unwrap(), PusherFrame::Ping);

        let subscribed = r#"{"event":"pusher_internal:subscription_succeeded","data":"{}","channel":"chatrooms.668.v2"}"#;
        assert_eq!(decode_frame("xqc", subscribed, 0).unwrap(), PusherFrame::Subscribed);
    }

    #[test]
    fn test_malformed_frames_are_errors() {
        assert!(matches!(
            parse_pusher_frame("xqc", "not json", 0),
            Err(ChatParseError::Json(_))
        ));
        assert!(matches!(
            parse_pusher_frame("xqc", &chat_frame(r#"{"sender":{"username":"a"}}"#), 0),
            Err(ChatParseError::MissingField("content"))
        ));
        assert!(matches!(
            parse_pusher_frame("xqc", r#"{"event":"App\\Events\\ChatMessageEvent"}"#, 0),
            Err(ChatParseError::MissingField("data"))
        ));
    }

    #[test]
    fn test_extract_emotes_without_tags() {
        let (text, emotes) = extract_emotes("just chatting");
        assert_eq!(text, "just chatting");
        assert!(emotes.is_empty());
    }

    #[test]
    fn test_subscribe_frame() {
        let frame: serde_json::Value = serde_json::from_str(&subscribe_frame(668)).unwrap();
        assert_eq!(frame["event"], "pusher:subscribe");
        assert_eq!(frame["data"]["channel"], "chatrooms.668.v2");
    }

    #[test]
    fn test_malformed_frame_is_skipped_and_feed_continues() {
        assert_eq!(route_frame("xqc", "{ truncated", 0), FrameAction::Skip);
        assert_eq!(
            route_frame("xqc", &chat_frame(r#"{"sender":{"username":"a"}}"#), 0),
            FrameAction::Skip
        );
        assert_eq!(route_frame("xqc", r#"{"event":"pusher:ping","data":{}}"#, 0), FrameAction::Pong);

        let next = route_frame("xqc", &chat_frame(r#"{"content":"still here"}"#), 7);
        assert_eq!(
            next,
            FrameAction::Forward(SignalEvent {
                streamer: "xqc".to_string(),
                timestamp: 7,
                payload: SignalPayload::ChatMessage(ChatMessage {
                    content: "still here".to_string(),
                    emotes: Vec::new(),
                    sender: None,
                }),
            })
        );
    }
}
