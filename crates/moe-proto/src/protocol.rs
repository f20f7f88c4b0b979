use serde::{Deserialize, Serialize};

use crate::model::{PlaybackPhase, Preferences};

/// Current protocol version.  Bump this when the wire format changes in a
/// breaking way.  Clients check this on connect and can refuse to talk to an
/// incompatible daemon.
pub const PROTOCOL_VERSION: u32 = 1;

/// Key action carried by a media-button event.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
pub enum KeyAction {
    #[default]
    Down,
    Up,
}

/// Messages sent from a client (or any other command origin) to the daemon.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "cmd")]
pub enum Command {
    PlayPause,
    Play,
    Pause,
    Stop,
    ToggleFavorite,
    /// Ask the push channel for a fresh now-playing snapshot.
    Update,
    /// Sleep timer fired: fade the stream out.
    TimerStop,
    /// Headphones were unplugged.
    AudioBecomingNoisy,
    MediaButton {
        key_code: i32,
        #[serde(default)]
        action: KeyAction,
    },
    AuthStateChanged,
    PlayFromMediaId {
        media_id: String,
    },
    PlayFromSearch {
        query: String,
    },
    SetSleepTimer {
        minutes: u32,
    },
    CancelSleepTimer,
    SetPreferences {
        preferences: Preferences,
    },
    Login {
        token: String,
    },
    Logout,
    GetState,
}

/// Messages sent from the daemon to clients.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "broadcast")]
pub enum Broadcast {
    /// Sent immediately on connect: protocol version + last rendered state.
    Hello {
        protocol_version: u32,
        state: PresentationState,
    },
    State {
        data: PresentationState,
    },
    FavoriteChanged {
        song_id: i64,
        favorite: bool,
    },
    /// A user-facing message (login required, favorite failed, ...).
    Toast {
        message: String,
    },
    Log {
        message: String,
    },
}

// ── presentation outputs ──────────────────────────────────────────────────────

/// Lock-screen / media-control descriptor of the current song.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct SessionMetadata {
    pub title: String,
    pub artist: String,
    pub album: String,
    pub duration_ms: i64,
    /// Only set when the user allows lock-screen art and real art is loaded.
    pub art: Option<String>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum SessionAction {
    Play,
    Pause,
    PlayPause,
    Stop,
    SetRating,
}

/// Standard actions every session state advertises.
pub const SESSION_ACTIONS: &[SessionAction] = &[
    SessionAction::Play,
    SessionAction::Pause,
    SessionAction::PlayPause,
    SessionAction::Stop,
    SessionAction::SetRating,
];

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum FavoriteIcon {
    Outline,
    Filled,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CustomAction {
    pub id: String,
    pub label: String,
    pub icon: FavoriteIcon,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct SessionPlaybackState {
    pub phase: PlaybackPhase,
    pub position_ms: i64,
    pub actions: Vec<SessionAction>,
    pub custom_actions: Vec<CustomAction>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NotificationContent {
    pub title: String,
    pub text: String,
    pub art: Option<String>,
    pub playing: bool,
    /// `None` hides the favorite button (logged out).
    pub favorited: Option<bool>,
}

/// Last rendered presenter output.  `rev` is a monotonically increasing counter
/// bumped on every write, so clients can detect missed updates.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct PresentationState {
    #[serde(default)]
    pub rev: u64,
    pub metadata: Option<SessionMetadata>,
    pub playback: SessionPlaybackState,
    /// `None` when the notification is removed.
    pub notification: Option<NotificationContent>,
    #[serde(default)]
    pub sleep_timer_armed: bool,
    #[serde(default)]
    pub authenticated: bool,
}

/// Wrapper for socket communication
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Message {
    Command(Command),
    Broadcast(Broadcast),
}

impl Message {
    pub fn encode(&self) -> anyhow::Result<Vec<u8>> {
        let json = serde_json::to_vec(self)?;
        let len = json.len() as u32;
        let mut result = Vec::with_capacity(4 + json.len());
        result.extend_from_slice(&len.to_be_bytes());
        result.extend_from_slice(&json);
        Ok(result)
    }

    pub fn decode(data: &[u8]) -> anyhow::Result<(Self, usize)> {
        if data.len() < 4 {
            anyhow::bail!("Insufficient data for length header");
        }
        let len = u32::from_be_bytes([data[0], data[1], data[2], data[3]]) as usize;
        if data.len() < 4 + len {
            anyhow::bail!("Insufficient data for message");
        }
        let msg: Self = serde_json::from_slice(&data[4..4 + len])?;
        Ok((msg, 4 + len))
    }
}
