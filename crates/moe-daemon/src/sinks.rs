//! Presentation sinks: engine output lands in the `StateManager` and is
//! pushed to every connected control client.

use std::sync::Arc;

use async_trait::async_trait;
use moe_engine::sources::{NotificationHandle, SessionHandle, UserFeedback};
use moe_proto::protocol::{NotificationContent, SessionMetadata, SessionPlaybackState};
use moe_proto::state::StateManager;
use tokio::sync::broadcast;
use tracing::{debug, info};

use crate::BroadcastMessage;

pub struct SessionSink {
    state: Arc<StateManager>,
    tx: broadcast::Sender<BroadcastMessage>,
}

impl SessionSink {
    pub fn new(state: Arc<StateManager>, tx: broadcast::Sender<BroadcastMessage>) -> Self {
        Self { state, tx }
    }
}

#[async_trait]
impl SessionHandle for SessionSink {
    async fn activate(&mut self) {
        info!("Session active");
    }

    async fn set_metadata(&mut self, metadata: Option<SessionMetadata>) {
        self.state.set_metadata(metadata).await;
        let _ = self.tx.send(BroadcastMessage::StateUpdated);
    }

    async fn set_playback_state(&mut self, state: SessionPlaybackState) {
        self.state.set_playback(state).await;
        let _ = self.tx.send(BroadcastMessage::StateUpdated);
    }

    async fn release(&mut self) {
        info!("Session released");
        self.state.clear().await;
        let _ = self.tx.send(BroadcastMessage::StateUpdated);
    }
}

/// Skips writes that would not change what clients already show.
pub struct NotificationSink {
    state: Arc<StateManager>,
    tx: broadcast::Sender<BroadcastMessage>,
    last: Option<NotificationContent>,
}

impl NotificationSink {
    pub fn new(state: Arc<StateManager>, tx: broadcast::Sender<BroadcastMessage>) -> Self {
        Self {
            state,
            tx,
            last: None,
        }
    }

    async fn publish(&mut self, content: Option<NotificationContent>) {
        if content == self.last {
            return;
        }
        debug!("Notification: {:?}", content.as_ref().map(|c| &c.title));
        self.last = content.clone();
        self.state.set_notification(content).await;
        let _ = self.tx.send(BroadcastMessage::StateUpdated);
    }
}

#[async_trait]
impl NotificationHandle for NotificationSink {
    async fn show(&mut self, content: NotificationContent) {
        self.publish(Some(content)).await;
    }

    async fn remove(&mut self) {
        self.publish(None).await;
    }
}

pub struct FeedbackSink {
    state: Arc<StateManager>,
    tx: broadcast::Sender<BroadcastMessage>,
}

impl FeedbackSink {
    pub fn new(state: Arc<StateManager>, tx: broadcast::Sender<BroadcastMessage>) -> Self {
        Self { state, tx }
    }
}

#[async_trait]
impl UserFeedback for FeedbackSink {
    async fn toast(&self, message: &str) {
        let _ = self.tx.send(BroadcastMessage::Toast(message.to_string()));
    }

    async fn favorite_changed(&self, song_id: i64, favorite: bool) {
        let _ = self
            .tx
            .send(BroadcastMessage::FavoriteChanged { song_id, favorite });
    }

    async fn sleep_timer_changed(&self, armed: bool) {
        self.state.set_sleep_timer_armed(armed).await;
        let _ = self.tx.send(BroadcastMessage::StateUpdated);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn setup() -> (Arc<StateManager>, broadcast::Sender<BroadcastMessage>) {
        let file = std::env::temp_dir()
            .join(format!("moe-daemon-sinks-{}", std::process::id()))
            .join("state.json");
        let (tx, _) = broadcast::channel(16);
        (Arc::new(StateManager::new(file)), tx)
    }

    fn content(title: &str) -> NotificationContent {
        NotificationContent {
            title: title.into(),
            text: String::new(),
            art: None,
            playing: true,
            favorited: None,
        }
    }

    #[tokio::test]
    async fn test_notification_dedupes_identical_content() {
        let (state, tx) = setup();
        let mut rx = tx.subscribe();
        let mut sink = NotificationSink::new(state.clone(), tx);

        sink.show(content("a")).await;
        sink.show(content("a")).await;
        sink.remove().await;
        sink.remove().await;

        assert!(matches!(rx.try_recv(), Ok(BroadcastMessage::StateUpdated)));
        assert!(matches!(rx.try_recv(), Ok(BroadcastMessage::StateUpdated)));
        assert!(rx.try_recv().is_err());
        assert!(state.get_state().await.notification.is_none());
    }

    #[tokio::test]
    async fn test_release_clears_rendered_state() {
        let (state, tx) = setup();
        let mut sink = SessionSink::new(state.clone(), tx);
        sink.set_metadata(Some(SessionMetadata::default())).await;
        sink.release().await;
        assert!(state.get_state().await.metadata.is_none());
    }

    #[tokio::test]
    async fn test_sleep_timer_flag_lands_in_state() {
        let (state, tx) = setup();
        let feedback = FeedbackSink::new(state.clone(), tx);
        feedback.sleep_timer_changed(true).await;
        assert!(state.get_state().await.sleep_timer_armed);
    }
}
