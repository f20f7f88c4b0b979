//! Wire shapes of the LISTEN.moe websocket gateway (v2).
//!
//! ```text
//!   server → { "op": 0, "d": { "message": "...", "heartbeat": 35000 } }     welcome
//!   client → { "op": 0, "d": { "auth": "Bearer <token>" } }                 identify
//!   server → { "op": 1, "t": "TRACK_UPDATE", "d": { song, startTime, ... } } dispatch
//!   client → { "op": 9 }                                                     heartbeat
//!   server → { "op": 10 }                                                    heartbeat ack
//!   client → { "op": 2 }                                                     request track update
//! ```

use serde::Deserialize;
use serde_json::{json, Value};

use crate::model::{EventInfo, NowPlayingSnapshot, Song};

pub const OP_WELCOME: u8 = 0;
pub const OP_DISPATCH: u8 = 1;
pub const OP_TRACK_REQUEST: u8 = 2;
pub const OP_HEARTBEAT: u8 = 9;
pub const OP_HEARTBEAT_ACK: u8 = 10;

const TRACK_EVENTS: &[&str] = &["TRACK_UPDATE", "TRACK_UPDATE_REQUEST"];

#[derive(Debug, Deserialize)]
struct Frame {
    op: u8,
    #[serde(default)]
    d: Option<Value>,
    #[serde(default)]
    t: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Welcome {
    #[serde(default)]
    heartbeat: u64,
}

/// Requesters arrive either as a bare name or as a user object.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum Requester {
    Name(String),
    #[serde(rename_all = "camelCase")]
    User {
        #[serde(default)]
        display_name: Option<String>,
        #[serde(default)]
        username: Option<String>,
    },
}

impl Requester {
    fn into_name(self) -> Option<String> {
        match self {
            Requester::Name(n) => Some(n),
            Requester::User {
                display_name,
                username,
            } => display_name.or(username),
        }
        .filter(|n| !n.is_empty())
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TrackUpdate {
    #[serde(default)]
    song: Option<Song>,
    #[serde(default)]
    start_time: Option<String>,
    #[serde(default)]
    listeners: u32,
    #[serde(default)]
    requester: Option<Requester>,
    #[serde(default)]
    event: Option<EventInfo>,
    #[serde(default)]
    last_played: Vec<Song>,
}

impl From<TrackUpdate> for NowPlayingSnapshot {
    fn from(t: TrackUpdate) -> Self {
        let mut last = t.last_played.into_iter();
        NowPlayingSnapshot {
            song: t.song,
            start_time: t.start_time,
            listeners: t.listeners,
            requester: t.requester.and_then(Requester::into_name),
            event: t.event,
            last_played: [last.next(), last.next()],
        }
    }
}

/// A decoded gateway frame.
#[derive(Debug, Clone, PartialEq)]
pub enum GatewayMessage {
    Welcome { heartbeat_ms: u64 },
    Track(NowPlayingSnapshot),
    HeartbeatAck,
    /// Queue updates, notifications and anything newer than this client.
    Other { op: u8, kind: Option<String> },
}

pub fn parse_frame(text: &str) -> anyhow::Result<GatewayMessage> {
    let frame: Frame = serde_json::from_str(text)?;
    let msg = match frame.op {
        OP_WELCOME => {
            // A bare welcome carries no heartbeat interval.
            let heartbeat_ms = match frame.d {
                Some(d) => serde_json::from_value::<Welcome>(d)?.heartbeat,
                None => 0,
            };
            GatewayMessage::Welcome { heartbeat_ms }
        }
        OP_DISPATCH if frame.t.as_deref().is_some_and(|t| TRACK_EVENTS.contains(&t)) => {
            let d = frame
                .d
                .ok_or_else(|| anyhow::anyhow!("track dispatch without payload"))?;
            let update: TrackUpdate = serde_json::from_value(d)?;
            GatewayMessage::Track(update.into())
        }
        OP_HEARTBEAT_ACK => GatewayMessage::HeartbeatAck,
        op => GatewayMessage::Other { op, kind: frame.t },
    };
    Ok(msg)
}

pub fn identify_frame(token: Option<&str>) -> String {
    let auth = token.map(|t| format!("Bearer {}", t)).unwrap_or_default();
    json!({ "op": OP_WELCOME, "d": { "auth": auth } }).to_string()
}

pub fn heartbeat_frame() -> String {
    json!({ "op": OP_HEARTBEAT }).to_string()
}

pub fn track_request_frame() -> String {
    json!({ "op": OP_TRACK_REQUEST }).to_string()
}
