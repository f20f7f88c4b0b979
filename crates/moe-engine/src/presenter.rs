//! Pure projections of the view model onto the session and notification.
//!
//! Nothing here keeps state; calling twice with the same input yields the same
//! output, so the engine re-renders freely.

use moe_proto::model::{PlaybackPhase, Preferences};
use moe_proto::protocol::{
    CustomAction, FavoriteIcon, NotificationContent, SessionMetadata, SessionPlaybackState,
    SESSION_ACTIONS,
};

use crate::sources::Artwork;
use crate::view_model::PlaybackViewModel;

pub const TOGGLE_FAVORITE_ACTION: &str = "TOGGLE_FAVORITE";
const FAVORITE_LABEL: &str = "Favorite";
const NOTHING_PLAYING: &str = "Nothing playing";

pub struct SessionPresenter;

impl SessionPresenter {
    /// `None` clears the session metadata (no current song).
    pub fn metadata(
        vm: &PlaybackViewModel,
        prefs: &Preferences,
        art: &Artwork,
    ) -> Option<SessionMetadata> {
        let song = vm.current_song.as_ref()?;
        let romaji = prefs.prefer_romaji;

        let art = if prefs.show_lockscreen_album_art && !art.is_default {
            art.location()
        } else {
            None
        };

        Some(SessionMetadata {
            title: song.title_string(romaji),
            artist: song.artists_string(romaji),
            album: song.albums_string(romaji),
            duration_ms: song.duration_ms(),
            art,
        })
    }

    pub fn playback_state(
        vm: &PlaybackViewModel,
        phase: PlaybackPhase,
        authenticated: bool,
    ) -> SessionPlaybackState {
        let mut custom_actions = Vec::new();
        if authenticated {
            let icon = if vm.current_song.is_some() && vm.is_favorited {
                FavoriteIcon::Filled
            } else {
                FavoriteIcon::Outline
            };
            custom_actions.push(CustomAction {
                id: TOGGLE_FAVORITE_ACTION.to_string(),
                label: FAVORITE_LABEL.to_string(),
                icon,
            });
        }

        SessionPlaybackState {
            phase,
            position_ms: vm.current_song_progress(),
            actions: SESSION_ACTIONS.to_vec(),
            custom_actions,
        }
    }
}

pub struct NotificationPresenter;

impl NotificationPresenter {
    /// `None` means the notification must be removed (stream stopped).
    pub fn render(
        vm: &PlaybackViewModel,
        phase: PlaybackPhase,
        authenticated: bool,
        prefs: &Preferences,
        art: &Artwork,
    ) -> Option<NotificationContent> {
        if !phase.is_started() {
            return None;
        }

        let romaji = prefs.prefer_romaji;
        let (title, text) = match vm.current_song.as_ref() {
            Some(song) => (song.title_string(romaji), song.artists_string(romaji)),
            None => (
                NOTHING_PLAYING.to_string(),
                vm.event
                    .as_ref()
                    .and_then(|e| e.name.clone())
                    .unwrap_or_default(),
            ),
        };

        let favorited = (authenticated && vm.current_song.is_some()).then_some(vm.is_favorited);

        Some(NotificationContent {
            title,
            text,
            art: if art.is_default { None } else { art.location() },
            playing: phase.is_playing(),
            favorited,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use moe_proto::model::{Credit, Song};

    fn vm_with_song(favorited: bool) -> PlaybackViewModel {
        let mut vm = PlaybackViewModel::new();
        vm.current_song = Some(Song {
            id: 42,
            title: Some("残酷な天使のテーゼ".into()),
            title_romaji: Some("Zankoku na Tenshi no Thesis".into()),
            artists: vec![Credit {
                name: Some("高橋洋子".into()),
                name_romaji: Some("Yoko Takahashi".into()),
                ..Credit::default()
            }],
            duration: 245.5,
            favorite: favorited,
            ..Song::default()
        });
        vm.is_favorited = favorited;
        vm
    }

    fn loaded_art() -> Artwork {
        Artwork {
            url: Some("https://cdn.listen.moe/covers/eva.jpg".into()),
            local_path: None,
            is_default: false,
        }
    }

    #[test]
    fn test_metadata_without_song_is_cleared() {
        let vm = PlaybackViewModel::new();
        let meta = SessionPresenter::metadata(&vm, &Preferences::default(), &loaded_art());
        assert!(meta.is_none());
    }

    #[test]
    fn test_metadata_art_respects_preference_and_default() {
        let vm = vm_with_song(false);
        let prefs = Preferences::default();

        let meta = SessionPresenter::metadata(&vm, &prefs, &loaded_art()).unwrap();
        assert_eq!(meta.duration_ms, 245_500);
        assert!(meta.art.is_some());

        let meta = SessionPresenter::metadata(&vm, &prefs, &Artwork::default_art()).unwrap();
        assert!(meta.art.is_none());

        let hidden = Preferences {
            show_lockscreen_album_art: false,
            ..prefs
        };
        let meta = SessionPresenter::metadata(&vm, &hidden, &loaded_art()).unwrap();
        assert!(meta.art.is_none());
    }

    #[test]
    fn test_metadata_romaji() {
        let vm = vm_with_song(false);
        let prefs = Preferences {
            prefer_romaji: true,
            ..Preferences::default()
        };
        let meta = SessionPresenter::metadata(&vm, &prefs, &Artwork::default_art()).unwrap();
        assert_eq!(meta.title, "Zankoku na Tenshi no Thesis");
        assert_eq!(meta.artist, "Yoko Takahashi");
    }

    #[test]
    fn test_favorite_action_only_when_authenticated() {
        let vm = vm_with_song(true);
        let state = SessionPresenter::playback_state(&vm, PlaybackPhase::Playing, false);
        assert!(state.custom_actions.is_empty());

        let state = SessionPresenter::playback_state(&vm, PlaybackPhase::Playing, true);
        assert_eq!(state.custom_actions.len(), 1);
        assert_eq!(state.custom_actions[0].icon, FavoriteIcon::Filled);

        let state =
            SessionPresenter::playback_state(&PlaybackViewModel::new(), PlaybackPhase::Paused, true);
        assert_eq!(state.custom_actions[0].icon, FavoriteIcon::Outline);
        assert_eq!(state.phase, PlaybackPhase::Paused);
    }

    #[test]
    fn test_notification_removed_when_stopped() {
        let vm = vm_with_song(false);
        let prefs = Preferences::default();
        let art = Artwork::default_art();
        assert!(
            NotificationPresenter::render(&vm, PlaybackPhase::Stopped, true, &prefs, &art)
                .is_none()
        );

        let shown =
            NotificationPresenter::render(&vm, PlaybackPhase::Paused, false, &prefs, &art).unwrap();
        assert!(!shown.playing);
        assert_eq!(shown.favorited, None);
        assert_eq!(shown.art, None);
    }

    #[test]
    fn test_notification_tolerates_missing_song() {
        let vm = PlaybackViewModel::new();
        let content = NotificationPresenter::render(
            &vm,
            PlaybackPhase::Playing,
            true,
            &Preferences::default(),
            &loaded_art(),
        )
        .unwrap();
        assert_eq!(content.title, NOTHING_PLAYING);
        assert_eq!(content.favorited, None);
        assert!(content.playing);
    }

    #[test]
    fn test_render_is_idempotent() {
        let vm = vm_with_song(true);
        let prefs = Preferences::default();
        let a = NotificationPresenter::render(&vm, PlaybackPhase::Playing, true, &prefs, &loaded_art());
        let b = NotificationPresenter::render(&vm, PlaybackPhase::Playing, true, &prefs, &loaded_art());
        assert_eq!(a, b);
    }
}
