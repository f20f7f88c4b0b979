//! Narrow contracts for everything the engine talks to but does not own.
//!
//! Inputs arrive as channel receivers ([`Sources`]); outputs and imperative
//! calls go through the traits bundled in [`Collaborators`].

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use moe_proto::model::{NowPlayingSnapshot, PlaybackPhase, Preferences};
use moe_proto::protocol::{NotificationContent, SessionMetadata, SessionPlaybackState};
use tokio::sync::{mpsc, watch};

// ── inbound events ────────────────────────────────────────────────────────────

/// What the push channel delivers.
#[derive(Debug, Clone, PartialEq)]
pub enum PushEvent {
    Snapshot(NowPlayingSnapshot),
    /// Transport dropped; the channel reconnects on its own.
    Failure,
}

/// Network reachability edges.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Connectivity {
    Available,
    Lost,
}

/// Album art the art collaborator finished resolving.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Artwork {
    pub url: Option<String>,
    pub local_path: Option<PathBuf>,
    pub is_default: bool,
}

impl Artwork {
    pub fn default_art() -> Self {
        Self {
            url: None,
            local_path: None,
            is_default: true,
        }
    }

    /// Where presenters should point: the cached file if any, else the URL.
    pub fn location(&self) -> Option<String> {
        self.local_path
            .as_ref()
            .map(|p| p.display().to_string())
            .or_else(|| self.url.clone())
    }
}

/// Receivers the engine merges into its single dispatch queue.
pub struct Sources {
    pub stream: mpsc::Receiver<PlaybackPhase>,
    pub push: mpsc::Receiver<PushEvent>,
    pub connectivity: mpsc::Receiver<Connectivity>,
    pub preferences: watch::Receiver<Preferences>,
    pub artwork: mpsc::Receiver<Artwork>,
}

// ── imperative collaborators ──────────────────────────────────────────────────

/// The audio pipeline.  Phase changes come back through [`Sources::stream`].
#[async_trait]
pub trait StreamControl: Send + Sync {
    async fn play(&self) -> anyhow::Result<()>;
    async fn pause(&self) -> anyhow::Result<()>;
    async fn stop(&self) -> anyhow::Result<()>;
    async fn toggle(&self) -> anyhow::Result<()>;
    async fn fade_out(&self) -> anyhow::Result<()>;
}

/// The push-channel transport.  `reconnect` on a connected channel is a no-op.
#[async_trait]
pub trait PushChannel: Send + Sync {
    async fn connect(&self);
    async fn disconnect(&self);
    async fn reconnect(&self);
    /// Ask the server to resend the current snapshot.
    async fn update(&self);
}

/// Authenticated server calls.
#[async_trait]
pub trait RadioApi: Send + Sync {
    /// Returns the subset of `song_ids` the user has favorited.
    async fn is_favorite(&self, song_ids: &[i64]) -> anyhow::Result<Vec<i64>>;
    async fn toggle_favorite(&self, song_id: i64) -> anyhow::Result<()>;
    async fn change_library(&self, name: &str) -> anyhow::Result<()>;
}

pub trait AuthState: Send + Sync {
    fn is_authenticated(&self) -> bool;
}

/// Starts fetching art; the result arrives through [`Sources::artwork`].
pub trait ArtworkLoader: Send + Sync {
    fn request(&self, url: Option<String>);
}

/// The platform media session.  Every call happens on the engine's dispatch path.
#[async_trait]
pub trait SessionHandle: Send {
    async fn activate(&mut self);
    async fn set_metadata(&mut self, metadata: Option<SessionMetadata>);
    async fn set_playback_state(&mut self, state: SessionPlaybackState);
    async fn release(&mut self);
}

#[async_trait]
pub trait NotificationHandle: Send {
    async fn show(&mut self, content: NotificationContent);
    async fn remove(&mut self);
}

/// Surfaces that live outside the session/notification pair.
#[async_trait]
pub trait UserFeedback: Send + Sync {
    async fn toast(&self, message: &str);
    async fn favorite_changed(&self, song_id: i64, favorite: bool);
    async fn sleep_timer_changed(&self, armed: bool);
}

/// Everything the engine is handed at construction time.
pub struct Collaborators {
    pub stream: Arc<dyn StreamControl>,
    pub channel: Arc<dyn PushChannel>,
    pub api: Arc<dyn RadioApi>,
    pub auth: Arc<dyn AuthState>,
    pub artwork: Arc<dyn ArtworkLoader>,
    pub feedback: Arc<dyn UserFeedback>,
    pub session: Box<dyn SessionHandle>,
    pub notification: Box<dyn NotificationHandle>,
}
