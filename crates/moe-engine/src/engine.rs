/// Engine: single-owner event loop for the playback view model.
///
/// Every input (stream phases, push-channel snapshots, connectivity edges,
/// preference changes, user commands, and the results of the engine's own
/// background calls) is an `EngineEvent` on one mpsc queue.  The loop owns
/// the view model, the session handle and the notification handle
/// exclusively; nothing else mutates them, so no locking is needed.
///
/// After each event the affected presentations are re-rendered from scratch.
/// The engine never rejects an event because of the current state: stream
/// phase and channel state are independent axes and every combination is
/// legal.
///
/// Background work (favorite lookups, favorite mutations, debounce and sleep
/// timers) runs in spawned tasks that hold only a weak sender.  Their results
/// come back as ordinary events; once the loop has exited they are dropped.
use std::future::Future;
use std::ops::ControlFlow;
use std::sync::Arc;
use std::time::Duration;

use moe_proto::config::EngineConfig;
use moe_proto::model::{PlaybackPhase, Preferences, Song};
use moe_proto::protocol::Command;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::{AbortHandle, JoinHandle};
use tracing::{debug, info, warn};

use crate::favorite::{FavoriteCoordinator, FavoriteError, FavoriteIntent, Resolution};
use crate::presenter::{NotificationPresenter, SessionPresenter};
use crate::router::{self, Action};
use crate::sources::{
    Artwork, ArtworkLoader, AuthState, Collaborators, Connectivity, NotificationHandle,
    PushChannel, PushEvent, RadioApi, SessionHandle, Sources, StreamControl, UserFeedback,
};
use crate::view_model::PlaybackViewModel;

// ── public surface ────────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("engine is not running")]
    Closed,
}

/// Why the dispatch loop ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitReason {
    /// The stream reached STOPPED; the hosting process should wind down.
    StreamStopped,
    ShutdownRequested,
    /// Every sender is gone.
    ChannelClosed,
}

/// Push-channel connection state as far as the engine knows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ChannelState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
}

/// A consistent copy of engine state, taken inside the loop.
#[derive(Debug, Clone)]
pub struct EngineSnapshot {
    pub view: PlaybackViewModel,
    pub phase: PlaybackPhase,
    pub channel: ChannelState,
    pub progress_ms: i64,
    pub preferences: Preferences,
    pub sleep_timer_armed: bool,
}

/// Cloneable entry point into a running engine.
#[derive(Clone)]
pub struct EngineHandle {
    tx: mpsc::Sender<EngineEvent>,
}

impl EngineHandle {
    /// The single entry point for commands from every origin.
    pub async fn dispatch(&self, cmd: Command) -> Result<(), EngineError> {
        self.send(EngineEvent::Command(cmd)).await
    }

    pub async fn snapshot(&self) -> Result<EngineSnapshot, EngineError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.send(EngineEvent::Inspect(reply_tx)).await?;
        reply_rx.await.map_err(|_| EngineError::Closed)
    }

    pub async fn shutdown(&self) -> Result<(), EngineError> {
        self.send(EngineEvent::Shutdown).await
    }

    async fn send(&self, evt: EngineEvent) -> Result<(), EngineError> {
        self.tx.send(evt).await.map_err(|_| EngineError::Closed)
    }
}

// ── events ────────────────────────────────────────────────────────────────────

#[derive(Debug)]
enum EngineEvent {
    Command(Command),
    Phase(PlaybackPhase),
    Push(PushEvent),
    Connectivity(Connectivity),
    Preferences(Preferences),
    Artwork(Artwork),
    /// Reply to the "is this song favorited" lookup issued for `song_id`.
    FavoriteStatus {
        song_id: i64,
        result: Result<Vec<i64>, String>,
    },
    FavoriteResolved {
        intent: FavoriteIntent,
        result: Result<(), FavoriteError>,
    },
    ReconnectDue {
        generation: u64,
    },
    Inspect(oneshot::Sender<EngineSnapshot>),
    Shutdown,
}

// ── engine ────────────────────────────────────────────────────────────────────

pub struct Engine {
    debounce: Duration,
    vm: PlaybackViewModel,
    phase: PlaybackPhase,
    channel_state: ChannelState,
    prefs: Preferences,
    artwork: Artwork,
    favorites: FavoriteCoordinator,

    stream: Arc<dyn StreamControl>,
    channel: Arc<dyn PushChannel>,
    api: Arc<dyn RadioApi>,
    auth: Arc<dyn AuthState>,
    art_loader: Arc<dyn ArtworkLoader>,
    feedback: Arc<dyn UserFeedback>,
    session: Box<dyn SessionHandle>,
    notification: Box<dyn NotificationHandle>,
    session_active: bool,

    /// Weak so that background tasks never keep the loop alive.
    events: mpsc::WeakSender<EngineEvent>,
    forwarders: Vec<AbortHandle>,
    /// Bumped on every connectivity edge; a pending reconnect only fires if
    /// its generation is still current.
    reconnect_generation: u64,
    sleep_timer: Option<AbortHandle>,
    active: bool,
}

impl Engine {
    /// Subscribe to every source and start the dispatch loop.
    pub fn start(
        config: &EngineConfig,
        collaborators: Collaborators,
        sources: Sources,
    ) -> (EngineHandle, JoinHandle<ExitReason>) {
        let (tx, rx) = mpsc::channel::<EngineEvent>(config.event_capacity.max(1));

        let Sources {
            stream,
            push,
            connectivity,
            preferences,
            artwork,
        } = sources;
        let prefs = *preferences.borrow();

        let forwarders = vec![
            forward(stream, tx.clone(), EngineEvent::Phase),
            forward(push, tx.clone(), EngineEvent::Push),
            forward(connectivity, tx.clone(), EngineEvent::Connectivity),
            forward(artwork, tx.clone(), EngineEvent::Artwork),
            forward_watch(preferences, tx.clone()),
        ];

        let Collaborators {
            stream,
            channel,
            api,
            auth,
            artwork: art_loader,
            feedback,
            session,
            notification,
        } = collaborators;

        let engine = Engine {
            debounce: config.reconnect_debounce(),
            vm: PlaybackViewModel::new(),
            phase: PlaybackPhase::Stopped,
            channel_state: ChannelState::Disconnected,
            prefs,
            artwork: Artwork::default_art(),
            favorites: FavoriteCoordinator::new(Arc::clone(&api)),
            stream,
            channel,
            api,
            auth,
            art_loader,
            feedback,
            session,
            notification,
            session_active: false,
            events: tx.downgrade(),
            forwarders,
            reconnect_generation: 0,
            sleep_timer: None,
            active: true,
        };

        let join = tokio::spawn(engine.run(rx));
        (EngineHandle { tx }, join)
    }

    async fn run(mut self, mut event_rx: mpsc::Receiver<EngineEvent>) -> ExitReason {
        info!("Engine: starting event loop");
        self.open().await;

        let reason = loop {
            match event_rx.recv().await {
                None => {
                    info!("Engine: event channel closed");
                    break ExitReason::ChannelClosed;
                }
                Some(EngineEvent::Shutdown) => {
                    info!("Engine: shutdown requested");
                    break ExitReason::ShutdownRequested;
                }
                Some(evt) => {
                    if let ControlFlow::Break(reason) = self.handle(evt).await {
                        break reason;
                    }
                }
            }
        };

        self.close(reason).await;
        reason
    }

    async fn open(&mut self) {
        self.session.activate().await;
        self.session_active = true;
        self.channel.connect().await;
        self.channel_state = ChannelState::Connecting;
        self.render_metadata().await;
    }

    async fn close(&mut self, reason: ExitReason) {
        info!("Engine: tearing down ({:?})", reason);
        self.active = false;
        for f in self.forwarders.drain(..) {
            f.abort();
        }
        self.cancel_sleep_timer().await;
        if reason != ExitReason::StreamStopped {
            if let Err(e) = self.stream.stop().await {
                warn!("Engine: failed to stop stream on shutdown: {}", e);
            }
        }
        self.channel.disconnect().await;
        self.channel_state = ChannelState::Disconnected;
        self.notification.remove().await;
        self.session_active = false;
        self.session.release().await;
    }

    async fn handle(&mut self, evt: EngineEvent) -> ControlFlow<ExitReason> {
        match evt {
            EngineEvent::Command(cmd) => {
                debug!("Engine: command {:?}", cmd);
                match router::route(&cmd) {
                    Some(action) => self.perform(action).await,
                    None => debug!("Engine: nothing to do for {:?}", cmd),
                }
                self.render_notification().await;
            }

            EngineEvent::Phase(phase) => return self.on_phase(phase).await,

            EngineEvent::Push(PushEvent::Snapshot(snapshot)) => {
                self.channel_state = ChannelState::Connected;
                let song_id = snapshot.song.as_ref().map(|s| s.id);
                if let Err(e) = self.vm.apply_snapshot(snapshot) {
                    warn!("Engine: {}, progress unknown", e);
                }
                debug!(
                    "Engine: now playing {:?}, {} listeners",
                    song_id, self.vm.listeners
                );

                if let Some(id) = song_id.filter(|id| *id != Song::NO_SONG_ID) {
                    if self.auth.is_authenticated() {
                        self.lookup_favorite(id);
                    }
                }

                let art_url = if self.prefs.download_images {
                    self.vm.art_url()
                } else {
                    None
                };
                if self.artwork.url != art_url {
                    self.artwork = Artwork::default_art();
                }
                self.art_loader.request(art_url);

                self.render_metadata().await;
                self.render_notification().await;
            }

            EngineEvent::Push(PushEvent::Failure) => {
                warn!("Engine: push channel failed, clearing now-playing");
                self.channel_state = ChannelState::Disconnected;
                self.vm.reset();
                self.artwork = Artwork::default_art();
                self.render_notification().await;
            }

            EngineEvent::Connectivity(Connectivity::Lost) => {
                info!("Engine: network lost, disconnecting push channel");
                self.reconnect_generation += 1;
                self.channel.disconnect().await;
                self.channel_state = ChannelState::Disconnected;
            }

            EngineEvent::Connectivity(Connectivity::Available) => {
                self.reconnect_generation += 1;
                if self.debounce.is_zero() {
                    self.reconnect().await;
                } else {
                    let generation = self.reconnect_generation;
                    let delay = self.debounce;
                    self.spawn_reply(async move {
                        tokio::time::sleep(delay).await;
                        EngineEvent::ReconnectDue { generation }
                    });
                }
            }

            EngineEvent::ReconnectDue { generation } => {
                if generation == self.reconnect_generation {
                    self.reconnect().await;
                } else {
                    debug!("Engine: superseded reconnect {} dropped", generation);
                }
            }

            EngineEvent::Preferences(prefs) => {
                debug!("Engine: preferences changed {:?}", prefs);
                self.prefs = prefs;
                self.render_metadata().await;
            }

            EngineEvent::Artwork(artwork) => {
                if !artwork.is_default && artwork.url != self.vm.art_url() {
                    debug!("Engine: dropping art for {:?}, song moved on", artwork.url);
                    return ControlFlow::Continue(());
                }
                self.artwork = artwork;
                self.render_metadata().await;
                self.render_notification().await;
            }

            EngineEvent::FavoriteStatus { song_id, result } => {
                self.on_favorite_status(song_id, result).await;
            }

            EngineEvent::FavoriteResolved { intent, result } => {
                self.on_favorite_resolved(intent, result).await;
            }

            EngineEvent::Inspect(reply) => {
                let _ = reply.send(EngineSnapshot {
                    view: self.vm.clone(),
                    phase: self.phase,
                    channel: self.channel_state,
                    progress_ms: self.vm.current_song_progress(),
                    preferences: self.prefs,
                    sleep_timer_armed: self.sleep_timer.is_some(),
                });
            }

            // Handled by the loop itself.
            EngineEvent::Shutdown => {}
        }
        ControlFlow::Continue(())
    }

    // ── stream ────────────────────────────────────────────────────────────────

    async fn on_phase(&mut self, phase: PlaybackPhase) -> ControlFlow<ExitReason> {
        info!("Engine: stream {:?} → {:?}", self.phase, phase);
        self.phase = phase;
        self.vm.is_playing = phase.is_playing();

        if phase == PlaybackPhase::Stopped {
            self.cancel_sleep_timer().await;
            self.notification.remove().await;
            self.render_playback_state().await;
            return ControlFlow::Break(ExitReason::StreamStopped);
        }

        self.render_notification().await;
        self.render_playback_state().await;
        ControlFlow::Continue(())
    }

    // ── commands ──────────────────────────────────────────────────────────────

    async fn perform(&mut self, action: Action) {
        let result = match action {
            Action::Toggle => self.stream.toggle().await,
            Action::Play => self.stream.play().await,
            Action::Pause => self.stream.pause().await,
            Action::Stop => self.stream.stop().await,
            Action::ToggleFavorite => {
                self.favorite_current_song().await;
                Ok(())
            }
            Action::RequestUpdate => {
                self.channel.update().await;
                Ok(())
            }
            Action::FadeOut => {
                self.cancel_sleep_timer().await;
                self.stream.fade_out().await
            }
            Action::BecomingNoisy => {
                if self.prefs.pause_on_noisy {
                    self.stream.pause().await
                } else {
                    Ok(())
                }
            }
            Action::AuthChanged => {
                self.on_auth_changed().await;
                Ok(())
            }
            Action::ChangeLibrary(library) => self.api.change_library(library.name()).await,
            Action::PlayFromSearch(library) => {
                let switched = match library {
                    Some(library) => self.api.change_library(library.name()).await,
                    None => Ok(()),
                };
                if let Err(e) = switched {
                    warn!("Engine: library switch failed: {}", e);
                }
                if self.phase.is_playing() {
                    Ok(())
                } else {
                    self.stream.play().await
                }
            }
            Action::ArmSleepTimer { minutes } => {
                self.arm_sleep_timer(minutes).await;
                Ok(())
            }
            Action::CancelSleepTimer => {
                self.cancel_sleep_timer().await;
                Ok(())
            }
        };

        if let Err(e) = result {
            warn!("Engine: {:?} failed: {}", action, e);
        }
    }

    async fn on_auth_changed(&mut self) {
        let authenticated = self.auth.is_authenticated();
        info!("Engine: auth changed (authenticated={})", authenticated);
        // Re-identify on the gateway with the new credentials.
        self.channel.disconnect().await;
        self.channel.connect().await;
        self.channel_state = ChannelState::Connecting;
        if !authenticated {
            self.vm.is_favorited = false;
        }
        self.render_playback_state().await;
    }

    async fn reconnect(&mut self) {
        info!("Engine: network available, reconnecting push channel");
        self.channel.reconnect().await;
        if self.channel_state != ChannelState::Connected {
            self.channel_state = ChannelState::Connecting;
        }
    }

    // ── favorites ─────────────────────────────────────────────────────────────

    fn lookup_favorite(&self, song_id: i64) {
        let api = Arc::clone(&self.api);
        self.spawn_reply(async move {
            let result = api
                .is_favorite(&[song_id])
                .await
                .map_err(|e| e.to_string());
            EngineEvent::FavoriteStatus { song_id, result }
        });
    }

    async fn on_favorite_status(&mut self, song_id: i64, result: Result<Vec<i64>, String>) {
        if !self.active {
            return;
        }
        let favorited = match result {
            Ok(ids) => ids.contains(&song_id),
            Err(e) => {
                warn!("Engine: favorite lookup for {} failed: {}", song_id, e);
                return;
            }
        };
        if self.vm.current_song_id() != Some(song_id) || !self.auth.is_authenticated() {
            debug!("Engine: stale favorite status for {} discarded", song_id);
            return;
        }
        if favorited {
            if let Some(song) = self.vm.current_song.as_mut() {
                song.favorite = true;
            }
            self.vm.is_favorited = true;
            self.render_playback_state().await;
            self.render_notification().await;
        }
    }

    async fn favorite_current_song(&mut self) {
        let authenticated = self.auth.is_authenticated();
        let intent = match self.favorites.begin(&mut self.vm, authenticated) {
            Ok(intent) => intent,
            Err(FavoriteError::NoSong) => {
                debug!("Engine: favorite toggle without a song ignored");
                return;
            }
            Err(e) => {
                self.feedback.toast(&e.to_string()).await;
                return;
            }
        };

        info!(
            "Engine: favorite {} → {} (pending)",
            intent.song_id, intent.desired
        );
        let mutation = self.favorites.mutate(intent);
        self.spawn_reply(async move {
            let result = mutation.await;
            EngineEvent::FavoriteResolved { intent, result }
        });
        self.render_playback_state().await;
    }

    async fn on_favorite_resolved(
        &mut self,
        intent: FavoriteIntent,
        result: Result<(), FavoriteError>,
    ) {
        if !self.active {
            return;
        }
        match self.favorites.resolve(&mut self.vm, intent, &result) {
            Resolution::Confirmed => {
                info!("Engine: favorite {} confirmed", intent.song_id);
                self.feedback
                    .favorite_changed(intent.song_id, intent.desired)
                    .await;
            }
            resolution => {
                warn!(
                    "Engine: favorite {} failed ({:?})",
                    intent.song_id, resolution
                );
                if let Err(e) = &result {
                    self.feedback.toast(&e.to_string()).await;
                }
            }
        }
        self.render_notification().await;
        self.render_playback_state().await;
    }

    // ── sleep timer ───────────────────────────────────────────────────────────

    async fn arm_sleep_timer(&mut self, minutes: u32) {
        if let Some(prev) = self.sleep_timer.take() {
            prev.abort();
        }
        if minutes == 0 {
            self.feedback.sleep_timer_changed(false).await;
            return;
        }
        info!("Engine: sleep timer armed for {} min", minutes);
        let delay = Duration::from_secs(u64::from(minutes) * 60);
        let handle = self.spawn_reply(async move {
            tokio::time::sleep(delay).await;
            EngineEvent::Command(Command::TimerStop)
        });
        self.sleep_timer = Some(handle);
        self.feedback.sleep_timer_changed(true).await;
    }

    async fn cancel_sleep_timer(&mut self) {
        if let Some(timer) = self.sleep_timer.take() {
            debug!("Engine: sleep timer cancelled");
            timer.abort();
            self.feedback.sleep_timer_changed(false).await;
        }
    }

    // ── rendering ─────────────────────────────────────────────────────────────

    async fn render_metadata(&mut self) {
        if !self.session_active {
            return;
        }
        let metadata = SessionPresenter::metadata(&self.vm, &self.prefs, &self.artwork);
        self.session.set_metadata(metadata).await;
        self.render_playback_state().await;
    }

    async fn render_playback_state(&mut self) {
        if !self.session_active {
            return;
        }
        let state =
            SessionPresenter::playback_state(&self.vm, self.phase, self.auth.is_authenticated());
        self.session.set_playback_state(state).await;
    }

    async fn render_notification(&mut self) {
        let content = NotificationPresenter::render(
            &self.vm,
            self.phase,
            self.auth.is_authenticated(),
            &self.prefs,
            &self.artwork,
        );
        match content {
            Some(content) => self.notification.show(content).await,
            None => self.notification.remove().await,
        }
    }

    // ── helpers ───────────────────────────────────────────────────────────────

    /// Run `work` off the dispatch path and feed its result back in as an event.
    fn spawn_reply<F>(&self, work: F) -> AbortHandle
    where
        F: Future<Output = EngineEvent> + Send + 'static,
    {
        let events = self.events.clone();
        tokio::spawn(async move {
            let evt = work.await;
            let Some(tx) = events.upgrade() else {
                debug!("Engine: gone, dropping {:?}", evt);
                return;
            };
            if let Err(e) = tx.send(evt).await {
                debug!("Engine: gone, dropping {:?}", e.0);
            }
        })
        .abort_handle()
    }
}

/// Pipe one source into the engine queue.
fn forward<T, F>(
    mut rx: mpsc::Receiver<T>,
    tx: mpsc::Sender<EngineEvent>,
    wrap: F,
) -> AbortHandle
where
    T: Send + 'static,
    F: Fn(T) -> EngineEvent + Send + 'static,
{
    tokio::spawn(async move {
        while let Some(item) = rx.recv().await {
            if tx.send(wrap(item)).await.is_err() {
                break;
            }
        }
    })
    .abort_handle()
}

fn forward_watch(mut rx: watch::Receiver<Preferences>, tx: mpsc::Sender<EngineEvent>) -> AbortHandle {
    tokio::spawn(async move {
        while rx.changed().await.is_ok() {
            let prefs = *rx.borrow_and_update();
            if tx.send(EngineEvent::Preferences(prefs)).await.is_err() {
                break;
            }
        }
    })
    .abort_handle()
}
