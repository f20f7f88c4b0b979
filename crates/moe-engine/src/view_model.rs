//! The single authoritative record of what is playing.

use std::time::Instant;

use chrono::{DateTime, Utc};
use moe_proto::model::{EventInfo, NowPlayingSnapshot, Song};
use thiserror::Error;

#[derive(Debug, Error)]
#[error("unparseable start time {raw:?}: {source}")]
pub struct TimestampParseError {
    pub raw: String,
    #[source]
    pub source: chrono::ParseError,
}

/// Anchors song progress to the monotonic clock at the moment a snapshot arrived.
#[derive(Debug, Clone)]
struct SongClock {
    offset_ms: i64,
    received: Instant,
}

#[derive(Debug, Clone, Default)]
pub struct PlaybackViewModel {
    pub current_song: Option<Song>,
    pub listeners: u32,
    pub requester: Option<String>,
    pub event: Option<EventInfo>,
    pub last_song: Option<Song>,
    pub second_last_song: Option<Song>,
    pub is_playing: bool,
    pub is_favorited: bool,
    clock: Option<SongClock>,
}

impl PlaybackViewModel {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn current_song_id(&self) -> Option<i64> {
        self.current_song.as_ref().map(|s| s.id)
    }

    /// Replace every server-owned field at once.
    ///
    /// The snapshot is applied even when its start time is bad; the error is
    /// handed back for logging and progress becomes unknown.
    pub fn apply_snapshot(&mut self, snapshot: NowPlayingSnapshot) -> Result<(), TimestampParseError> {
        self.apply_snapshot_at(snapshot, Utc::now())
    }

    pub fn apply_snapshot_at(
        &mut self,
        snapshot: NowPlayingSnapshot,
        now: DateTime<Utc>,
    ) -> Result<(), TimestampParseError> {
        let NowPlayingSnapshot {
            song,
            start_time,
            listeners,
            requester,
            event,
            last_played: [last, second_last],
        } = snapshot;

        let parsed = start_time.map(|raw| parse_start_time(&raw)).transpose();

        self.listeners = listeners;
        self.requester = requester;
        self.event = event;
        self.is_favorited = song.as_ref().is_some_and(|s| s.favorite);
        self.current_song = song;
        self.last_song = last;
        self.second_last_song = second_last;

        match parsed {
            Ok(started_at) => {
                self.clock = started_at.map(|started_at| SongClock {
                    offset_ms: (now - started_at).num_milliseconds(),
                    received: Instant::now(),
                });
                Ok(())
            }
            Err(e) => {
                self.clock = None;
                Err(e)
            }
        }
    }

    /// Forget everything the server told us.  Playback phase is kept.
    pub fn reset(&mut self) {
        self.current_song = None;
        self.listeners = 0;
        self.requester = None;
        self.event = None;
        self.last_song = None;
        self.second_last_song = None;
        self.is_favorited = false;
        self.clock = None;
    }

    /// Milliseconds into the current song, or 0 when unknown.
    pub fn current_song_progress(&self) -> i64 {
        match (&self.current_song, &self.clock) {
            (Some(_), Some(clock)) => {
                (clock.offset_ms + clock.received.elapsed().as_millis() as i64).max(0)
            }
            _ => 0,
        }
    }

    pub fn has_known_progress(&self) -> bool {
        self.clock.is_some()
    }

    /// Art for the current song, falling back to the event banner.
    pub fn art_url(&self) -> Option<String> {
        self.current_song
            .as_ref()
            .and_then(Song::album_art_url)
            .or_else(|| self.event.as_ref().and_then(EventInfo::image_url))
    }
}

pub fn parse_start_time(raw: &str) -> Result<DateTime<Utc>, TimestampParseError> {
    DateTime::parse_from_rfc3339(raw)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|source| TimestampParseError {
            raw: raw.to_string(),
            source,
        })
}
