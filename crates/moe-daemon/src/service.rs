//! Server-facing side of the radio: favorites through the API, library
//! switches applied to both the gateway and the stream.

use std::sync::Arc;

use async_trait::async_trait;
use moe_engine::sources::RadioApi;
use moe_proto::model::Library;
use moe_proto::state::StateManager;
use tracing::info;

use crate::api::ApiClient;
use crate::gateway::Gateway;
use crate::mpv::MpvStream;

pub struct RadioService {
    api: ApiClient,
    stream: Arc<MpvStream>,
    gateway: Arc<Gateway>,
    state: Arc<StateManager>,
}

impl RadioService {
    pub fn new(
        api: ApiClient,
        stream: Arc<MpvStream>,
        gateway: Arc<Gateway>,
        state: Arc<StateManager>,
    ) -> Self {
        Self {
            api,
            stream,
            gateway,
            state,
        }
    }
}

#[async_trait]
impl RadioApi for RadioService {
    async fn is_favorite(&self, song_ids: &[i64]) -> anyhow::Result<Vec<i64>> {
        Ok(self.api.check_favorite(song_ids).await?)
    }

    async fn toggle_favorite(&self, song_id: i64) -> anyhow::Result<()> {
        Ok(self.api.favorite_song(song_id).await?)
    }

    async fn change_library(&self, name: &str) -> anyhow::Result<()> {
        let library =
            Library::from_name(name).ok_or_else(|| anyhow::anyhow!("unknown library {:?}", name))?;
        if self.state.persistent().await.library == library {
            return Ok(());
        }

        info!("Switching library to {}", library.name());
        self.state.set_library(library).await?;
        self.gateway.set_url(library.gateway_url()).await;
        self.stream.set_url(library.stream_url()).await
    }
}
