//! Commands from control clients that the engine does not own: login state
//! and preferences.  Everything else is forwarded to the engine.

use std::sync::Arc;

use moe_engine::EngineHandle;
use moe_proto::config::Config;
use moe_proto::model::Preferences;
use moe_proto::protocol::Command;
use moe_proto::state::StateManager;
use tokio::sync::{watch, Mutex};
use tracing::info;

use crate::auth::AuthStore;

pub struct Control {
    engine: EngineHandle,
    auth: Arc<AuthStore>,
    state: Arc<StateManager>,
    preferences: watch::Sender<Preferences>,
    config: Mutex<Config>,
}

impl Control {
    pub fn new(
        engine: EngineHandle,
        auth: Arc<AuthStore>,
        state: Arc<StateManager>,
        preferences: watch::Sender<Preferences>,
        config: Config,
    ) -> Self {
        Self {
            engine,
            auth,
            state,
            preferences,
            config: Mutex::new(config),
        }
    }

    pub async fn handle(&self, cmd: Command) -> anyhow::Result<()> {
        match cmd {
            Command::Login { token } => {
                self.auth.login(token).await?;
                self.auth_changed(true).await
            }
            Command::Logout => {
                self.auth.logout().await?;
                self.auth_changed(false).await
            }
            Command::SetPreferences { preferences } => {
                info!("Preferences updated: {:?}", preferences);
                self.preferences.send_replace(preferences);
                let mut config = self.config.lock().await;
                config.preferences = preferences;
                config.save()
            }
            Command::GetState => Ok(()),
            other => Ok(self.engine.dispatch(other).await?),
        }
    }

    async fn auth_changed(&self, authenticated: bool) -> anyhow::Result<()> {
        self.state.set_authenticated(authenticated).await;
        Ok(self.engine.dispatch(Command::AuthStateChanged).await?)
    }
}
