use crate::model::Library;
use crate::protocol::{
    NotificationContent, PresentationState, SessionMetadata, SessionPlaybackState,
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::warn;

/// What survives a daemon restart.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersistentState {
    #[serde(default)]
    pub library: Library,
    pub volume: f32,
}

impl Default for PersistentState {
    fn default() -> Self {
        Self {
            library: Library::default(),
            volume: 0.5,
        }
    }
}

/// Holds the last rendered presentation and the persisted playback settings.
///
/// Writers are the engine's presentation sinks; readers are control clients
/// that connect later and need the current picture immediately.
pub struct StateManager {
    state: Arc<RwLock<PresentationState>>,
    persistent: RwLock<PersistentState>,
    state_file: PathBuf,
}

impl StateManager {
    pub fn new(state_file: PathBuf) -> Self {
        let persistent = Self::load_persistent(&state_file);
        Self {
            state: Arc::new(RwLock::new(PresentationState {
                rev: 1,
                ..PresentationState::default()
            })),
            persistent: RwLock::new(persistent),
            state_file,
        }
    }

    pub async fn get_state(&self) -> PresentationState {
        self.state.read().await.clone()
    }

    pub async fn set_metadata(&self, metadata: Option<SessionMetadata>) {
        let mut state = self.state.write().await;
        state.metadata = metadata;
        state.rev += 1;
    }

    pub async fn set_playback(&self, playback: SessionPlaybackState) {
        let mut state = self.state.write().await;
        state.playback = playback;
        state.rev += 1;
    }

    pub async fn set_notification(&self, notification: Option<NotificationContent>) {
        let mut state = self.state.write().await;
        state.notification = notification;
        state.rev += 1;
    }

    pub async fn set_sleep_timer_armed(&self, armed: bool) {
        let mut state = self.state.write().await;
        state.sleep_timer_armed = armed;
        state.rev += 1;
    }

    pub async fn set_authenticated(&self, authenticated: bool) {
        let mut state = self.state.write().await;
        state.authenticated = authenticated;
        state.rev += 1;
    }

    /// Drop everything rendered; used when the session handle is released.
    pub async fn clear(&self) {
        let mut state = self.state.write().await;
        let rev = state.rev + 1;
        let authenticated = state.authenticated;
        *state = PresentationState {
            rev,
            authenticated,
            ..PresentationState::default()
        };
    }

    pub async fn persistent(&self) -> PersistentState {
        self.persistent.read().await.clone()
    }

    pub async fn set_library(&self, library: Library) -> anyhow::Result<()> {
        self.persistent.write().await.library = library;
        self.save().await
    }

    /// First-run library and volume, taken from the config file.
    pub async fn seed(&self, library: Library, volume: f32) -> anyhow::Result<()> {
        {
            let mut persistent = self.persistent.write().await;
            persistent.library = library;
            persistent.volume = volume.clamp(0.0, 1.0);
        }
        self.save().await
    }

    async fn save(&self) -> anyhow::Result<()> {
        let persistent = self.persistent.read().await.clone();

        if let Some(parent) = self.state_file.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let json = serde_json::to_string_pretty(&persistent)?;
        tokio::fs::write(&self.state_file, json).await?;
        Ok(())
    }

    fn load_persistent(state_file: &Path) -> PersistentState {
        let Ok(content) = std::fs::read_to_string(state_file) else {
            return PersistentState::default();
        };
        serde_json::from_str(&content).unwrap_or_else(|e| {
            warn!("Ignoring unreadable state file {:?}: {}", state_file, e);
            PersistentState::default()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_state_file(name: &str) -> PathBuf {
        std::env::temp_dir()
            .join(format!("moe-proto-{}-{}", name, std::process::id()))
            .join("state.json")
    }

    #[tokio::test]
    async fn test_rev_increments_on_every_write() {
        let manager = StateManager::new(temp_state_file("rev"));
        let start = manager.get_state().await.rev;
        manager.set_metadata(None).await;
        manager.set_notification(None).await;
        manager.clear().await;
        assert_eq!(manager.get_state().await.rev, start + 3);
    }

    #[tokio::test]
    async fn test_clear_keeps_login_state() {
        let manager = StateManager::new(temp_state_file("clear"));
        manager.set_authenticated(true).await;
        manager.set_sleep_timer_armed(true).await;
        manager.clear().await;

        let state = manager.get_state().await;
        assert!(state.authenticated);
        assert!(!state.sleep_timer_armed);
    }

    #[tokio::test]
    async fn test_library_survives_reload() {
        let file = temp_state_file("library");
        let manager = StateManager::new(file.clone());
        manager.set_library(Library::Kpop).await.unwrap();

        let reloaded = StateManager::new(file.clone());
        assert_eq!(reloaded.persistent().await.library, Library::Kpop);
        let _ = std::fs::remove_dir_all(file.parent().unwrap());
    }

    #[tokio::test]
    async fn test_seed_writes_configured_volume() {
        let file = temp_state_file("seed");
        let manager = StateManager::new(file.clone());
        manager.seed(Library::Kpop, 0.8).await.unwrap();

        let persistent = StateManager::new(file.clone()).persistent().await;
        assert_eq!(persistent.library, Library::Kpop);
        assert_eq!(persistent.volume, 0.8);

        manager.seed(Library::Jpop, 3.0).await.unwrap();
        assert_eq!(manager.persistent().await.volume, 1.0);
        let _ = std::fs::remove_dir_all(file.parent().unwrap());
    }
}
