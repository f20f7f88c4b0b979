//! Optimistic favorite toggling with confirm / rollback.
//!
//! ```text
//!   begin()   : validate, flip song + view model immediately, return the intent
//!   mutate()  : server round-trip, run off the dispatch path
//!   resolve() : success keeps the flip; failure restores `previous`
//! ```

use std::future::Future;
use std::sync::Arc;

use thiserror::Error;

use crate::sources::RadioApi;
use crate::view_model::PlaybackViewModel;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum FavoriteError {
    #[error("no song to favorite")]
    NoSong,
    #[error("log in to favorite songs")]
    Unauthenticated,
    #[error("could not update favorite: {0}")]
    Mutation(String),
}

/// A toggle that has been applied locally but not yet confirmed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FavoriteIntent {
    pub song_id: i64,
    pub previous: bool,
    pub desired: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolution {
    /// Server accepted; the optimistic value stands.
    Confirmed,
    /// Server refused; local state is back to `previous`.
    RolledBack,
    /// Server refused, but the song (or its flag) changed since; nothing to undo.
    Superseded,
}

pub struct FavoriteCoordinator {
    api: Arc<dyn RadioApi>,
}

impl FavoriteCoordinator {
    pub fn new(api: Arc<dyn RadioApi>) -> Self {
        Self { api }
    }

    /// Apply the optimistic flip to the current song.  On error nothing is touched.
    pub fn begin(
        &self,
        vm: &mut PlaybackViewModel,
        authenticated: bool,
    ) -> Result<FavoriteIntent, FavoriteError> {
        let song = vm
            .current_song
            .as_mut()
            .filter(|s| s.is_valid())
            .ok_or(FavoriteError::NoSong)?;
        if !authenticated {
            return Err(FavoriteError::Unauthenticated);
        }

        let intent = FavoriteIntent {
            song_id: song.id,
            previous: song.favorite,
            desired: !song.favorite,
        };
        song.favorite = intent.desired;
        vm.is_favorited = intent.desired;
        Ok(intent)
    }

    /// The server call for `intent`.  Owns everything it needs so it can be spawned.
    pub fn mutate(
        &self,
        intent: FavoriteIntent,
    ) -> impl Future<Output = Result<(), FavoriteError>> + Send + 'static {
        let api = Arc::clone(&self.api);
        async move {
            api.toggle_favorite(intent.song_id)
                .await
                .map_err(|e| FavoriteError::Mutation(e.to_string()))
        }
    }

    pub fn resolve(
        &self,
        vm: &mut PlaybackViewModel,
        intent: FavoriteIntent,
        result: &Result<(), FavoriteError>,
    ) -> Resolution {
        if result.is_ok() {
            return Resolution::Confirmed;
        }

        // Only undo our own flip: a newer snapshot or a second toggle owns the flag now.
        match vm.current_song.as_mut() {
            Some(song) if song.id == intent.song_id && song.favorite == intent.desired => {
                song.favorite = intent.previous;
                vm.is_favorited = intent.previous;
                Resolution::RolledBack
            }
            _ => Resolution::Superseded,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use moe_proto::model::Song;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingApi {
        calls: AtomicUsize,
        fail: bool,
    }

    #[async_trait]
    impl RadioApi for CountingApi {
        async fn is_favorite(&self, _song_ids: &[i64]) -> anyhow::Result<Vec<i64>> {
            Ok(Vec::new())
        }

        async fn toggle_favorite(&self, _song_id: i64) -> anyhow::Result<()> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                anyhow::bail!("HTTP 500");
            }
            Ok(())
        }

        async fn change_library(&self, _name: &str) -> anyhow::Result<()> {
            Ok(())
        }
    }

    fn coordinator(fail: bool) -> (FavoriteCoordinator, Arc<CountingApi>) {
        let api = Arc::new(CountingApi {
            calls: AtomicUsize::new(0),
            fail,
        });
        (FavoriteCoordinator::new(api.clone()), api)
    }

    fn vm_playing(id: i64, favorite: bool) -> PlaybackViewModel {
        let mut vm = PlaybackViewModel::new();
        vm.current_song = Some(Song {
            id,
            favorite,
            ..Song::default()
        });
        vm.is_favorited = favorite;
        vm
    }

    #[test]
    fn test_begin_flips_before_any_network_call() {
        let (coord, api) = coordinator(false);
        let mut vm = vm_playing(42, false);
        let intent = coord.begin(&mut vm, true).unwrap();

        assert_eq!(
            intent,
            FavoriteIntent {
                song_id: 42,
                previous: false,
                desired: true
            }
        );
        assert!(vm.current_song.as_ref().unwrap().favorite);
        assert!(vm.is_favorited);
        assert_eq!(api.calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_unauthenticated_leaves_state_untouched() {
        let (coord, _) = coordinator(false);
        let mut vm = vm_playing(42, false);
        assert_eq!(coord.begin(&mut vm, false), Err(FavoriteError::Unauthenticated));
        assert!(!vm.current_song.as_ref().unwrap().favorite);
        assert!(!vm.is_favorited);
    }

    #[test]
    fn test_sentinel_song_is_rejected() {
        let (coord, _) = coordinator(false);
        let mut vm = vm_playing(Song::NO_SONG_ID, false);
        assert_eq!(coord.begin(&mut vm, true), Err(FavoriteError::NoSong));
        let mut empty = PlaybackViewModel::new();
        assert_eq!(coord.begin(&mut empty, true), Err(FavoriteError::NoSong));
    }

    #[tokio::test]
    async fn test_failure_rolls_back() {
        let (coord, api) = coordinator(true);
        let mut vm = vm_playing(42, true);
        let intent = coord.begin(&mut vm, true).unwrap();
        assert!(!vm.is_favorited);

        let result = coord.mutate(intent).await;
        assert!(matches!(result, Err(FavoriteError::Mutation(_))));
        assert_eq!(coord.resolve(&mut vm, intent, &result), Resolution::RolledBack);
        assert!(vm.is_favorited);
        assert!(vm.current_song.as_ref().unwrap().favorite);
        assert_eq!(api.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_success_keeps_flip() {
        let (coord, _) = coordinator(false);
        let mut vm = vm_playing(42, false);
        let intent = coord.begin(&mut vm, true).unwrap();
        let result = coord.mutate(intent).await;
        assert_eq!(coord.resolve(&mut vm, intent, &result), Resolution::Confirmed);
        assert!(vm.is_favorited);
    }

    #[test]
    fn test_failure_after_song_change_is_superseded() {
        let (coord, _) = coordinator(true);
        let mut vm = vm_playing(42, false);
        let intent = coord.begin(&mut vm, true).unwrap();

        vm = vm_playing(43, false);
        let result = Err(FavoriteError::Mutation("timeout".into()));
        assert_eq!(coord.resolve(&mut vm, intent, &result), Resolution::Superseded);
        assert!(!vm.is_favorited);
        assert_eq!(vm.current_song_id(), Some(43));
    }
}
