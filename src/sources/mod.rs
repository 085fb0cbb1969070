//! Signal producers for Kick
//!
//! - `kick` - Channel API poller (viewer counts, chatroom lookup)
//! - `chat` - Pusher websocket chat feed
//!
//! Both only enqueue `StreamerCommand`s into a streamer worker's channel.

pub mod chat;
pub mod kick;

pub use chat::{parse_pusher_frame, run_chat_feed, ChatFeedConfig, ChatFeedExit};
pub use kick::{run_viewer_poller, ChannelSnapshot, KickChannelApi, PollerExit, ViewerCountSource};
