//! Now-playing data model shared by the engine, the daemon and control clients.

use serde::{Deserialize, Serialize};

const COVERS_CDN: &str = "https://cdn.listen.moe/covers/";
const EVENT_CDN: &str = "https://cdn.listen.moe/event/";

/// Phase of the audio stream as reported by the stream source.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
pub enum PlaybackPhase {
    Playing,
    Paused,
    #[default]
    Stopped,
}

impl PlaybackPhase {
    pub fn is_playing(self) -> bool {
        self == PlaybackPhase::Playing
    }

    /// True for every phase except `Stopped`.
    pub fn is_started(self) -> bool {
        self != PlaybackPhase::Stopped
    }
}

/// An artist or album credit attached to a song.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct Credit {
    #[serde(default)]
    pub id: i64,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub name_romaji: Option<String>,
    #[serde(default)]
    pub image: Option<String>,
}

impl Credit {
    fn display(&self, prefer_romaji: bool) -> Option<&str> {
        let romaji = self.name_romaji.as_deref().filter(|s| !s.is_empty());
        match (prefer_romaji, romaji) {
            (true, Some(r)) => Some(r),
            _ => self.name.as_deref().filter(|s| !s.is_empty()).or(romaji),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Song {
    pub id: i64,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub title_romaji: Option<String>,
    #[serde(default)]
    pub artists: Vec<Credit>,
    #[serde(default)]
    pub albums: Vec<Credit>,
    /// Length in seconds.
    #[serde(default)]
    pub duration: f64,
    #[serde(default)]
    pub favorite: bool,
}

impl Default for Song {
    fn default() -> Self {
        Self {
            id: Self::NO_SONG_ID,
            title: None,
            title_romaji: None,
            artists: Vec::new(),
            albums: Vec::new(),
            duration: 0.0,
            favorite: false,
        }
    }
}

impl Song {
    /// Sentinel id the server uses for "no song".
    pub const NO_SONG_ID: i64 = -1;

    pub fn is_valid(&self) -> bool {
        self.id != Self::NO_SONG_ID
    }

    pub fn title_string(&self, prefer_romaji: bool) -> String {
        let romaji = self.title_romaji.as_deref().filter(|s| !s.is_empty());
        match (prefer_romaji, romaji) {
            (true, Some(r)) => r.to_string(),
            _ => self.title.clone().unwrap_or_default(),
        }
    }

    pub fn artists_string(&self, prefer_romaji: bool) -> String {
        join_credits(&self.artists, prefer_romaji)
    }

    pub fn albums_string(&self, prefer_romaji: bool) -> String {
        join_credits(&self.albums, prefer_romaji)
    }

    pub fn duration_ms(&self) -> i64 {
        (self.duration * 1000.0) as i64
    }

    /// Cover of the first album that has one.
    pub fn album_art_url(&self) -> Option<String> {
        self.albums
            .iter()
            .filter_map(|a| a.image.as_deref())
            .find(|img| !img.is_empty())
            .map(|img| cdn_url(COVERS_CDN, img))
    }
}

fn join_credits(credits: &[Credit], prefer_romaji: bool) -> String {
    credits
        .iter()
        .filter_map(|c| c.display(prefer_romaji))
        .collect::<Vec<_>>()
        .join(", ")
}

fn cdn_url(base: &str, image: &str) -> String {
    if image.starts_with("http://") || image.starts_with("https://") {
        image.to_string()
    } else {
        format!("{}{}", base, image)
    }
}

/// A radio event (themed programme) the server may attach to a snapshot.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct EventInfo {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub image: Option<String>,
}

impl EventInfo {
    pub fn image_url(&self) -> Option<String> {
        self.image
            .as_deref()
            .filter(|s| !s.is_empty())
            .map(|img| cdn_url(EVENT_CDN, img))
    }
}

/// One atomic "now playing" update from the push channel.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct NowPlayingSnapshot {
    pub song: Option<Song>,
    /// Raw start timestamp; parsed by the engine.
    pub start_time: Option<String>,
    pub listeners: u32,
    pub requester: Option<String>,
    pub event: Option<EventInfo>,
    pub last_played: [Option<Song>; 2],
}

/// Which catalogue the radio streams.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum Library {
    #[default]
    Jpop,
    Kpop,
}

impl Library {
    pub const MEDIA_ID_JPOP: &'static str = "LIBRARY_JPOP";
    pub const MEDIA_ID_KPOP: &'static str = "LIBRARY_KPOP";

    pub fn name(self) -> &'static str {
        match self {
            Library::Jpop => "jpop",
            Library::Kpop => "kpop",
        }
    }

    pub fn gateway_url(self) -> &'static str {
        match self {
            Library::Jpop => "wss://listen.moe/gateway_v2",
            Library::Kpop => "wss://listen.moe/kpop/gateway_v2",
        }
    }

    pub fn stream_url(self) -> &'static str {
        match self {
            Library::Jpop => "https://listen.moe/stream",
            Library::Kpop => "https://listen.moe/kpop/stream",
        }
    }

    pub fn from_media_id(media_id: &str) -> Option<Self> {
        match media_id {
            Self::MEDIA_ID_JPOP => Some(Library::Jpop),
            Self::MEDIA_ID_KPOP => Some(Library::Kpop),
            _ => None,
        }
    }

    /// Voice-search phrases ("jpop", "K-Pop", ...).
    pub fn from_search_query(query: &str) -> Option<Self> {
        match query.trim().to_lowercase().as_str() {
            "jpop" | "j-pop" => Some(Library::Jpop),
            "kpop" | "k-pop" => Some(Library::Kpop),
            _ => None,
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "jpop" => Some(Library::Jpop),
            "kpop" => Some(Library::Kpop),
            _ => None,
        }
    }
}

/// User display/behaviour preferences the engine reacts to.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct Preferences {
    #[serde(default)]
    pub prefer_romaji: bool,
    #[serde(default = "default_true")]
    pub show_lockscreen_album_art: bool,
    #[serde(default = "default_true")]
    pub pause_on_noisy: bool,
    #[serde(default = "default_true")]
    pub download_images: bool,
}

impl Default for Preferences {
    fn default() -> Self {
        Self {
            prefer_romaji: false,
            show_lockscreen_album_art: true,
            pause_on_noisy: true,
            download_images: true,
        }
    }
}

fn default_true() -> bool {
    true
}
