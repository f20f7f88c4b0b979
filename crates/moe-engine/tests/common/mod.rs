//! In-memory collaborators for driving the engine without mpv, a gateway or
//! the network.
#![allow(dead_code)]

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use moe_engine::sources::{
    Artwork, ArtworkLoader, AuthState, Collaborators, Connectivity, NotificationHandle,
    PushChannel, PushEvent, RadioApi, SessionHandle, Sources, StreamControl, UserFeedback,
};
use moe_engine::{Engine, EngineHandle, EngineSnapshot, ExitReason};
use moe_proto::config::EngineConfig;
use moe_proto::model::{Credit, NowPlayingSnapshot, PlaybackPhase, Preferences, Song};
use moe_proto::protocol::{NotificationContent, SessionMetadata, SessionPlaybackState};
use tokio::sync::{mpsc, watch, Semaphore};
use tokio::task::JoinHandle;

// ── fakes ─────────────────────────────────────────────────────────────────────

#[derive(Default)]
pub struct FakeStream {
    pub calls: Mutex<Vec<&'static str>>,
}

impl FakeStream {
    pub fn calls(&self) -> Vec<&'static str> {
        self.calls.lock().unwrap().clone()
    }

    fn record(&self, call: &'static str) -> anyhow::Result<()> {
        self.calls.lock().unwrap().push(call);
        Ok(())
    }
}

#[async_trait]
impl StreamControl for FakeStream {
    async fn play(&self) -> anyhow::Result<()> {
        self.record("play")
    }
    async fn pause(&self) -> anyhow::Result<()> {
        self.record("pause")
    }
    async fn stop(&self) -> anyhow::Result<()> {
        self.record("stop")
    }
    async fn toggle(&self) -> anyhow::Result<()> {
        self.record("toggle")
    }
    async fn fade_out(&self) -> anyhow::Result<()> {
        self.record("fade_out")
    }
}

#[derive(Default)]
pub struct FakeChannel {
    pub connects: AtomicUsize,
    pub disconnects: AtomicUsize,
    pub reconnects: AtomicUsize,
    pub updates: AtomicUsize,
}

#[async_trait]
impl PushChannel for FakeChannel {
    async fn connect(&self) {
        self.connects.fetch_add(1, Ordering::SeqCst);
    }
    async fn disconnect(&self) {
        self.disconnects.fetch_add(1, Ordering::SeqCst);
    }
    async fn reconnect(&self) {
        self.reconnects.fetch_add(1, Ordering::SeqCst);
    }
    async fn update(&self) {
        self.updates.fetch_add(1, Ordering::SeqCst);
    }
}

/// Server-side favorites plus gates that hold calls until the test releases them.
pub struct FakeApi {
    pub favorites: Mutex<HashSet<i64>>,
    pub lookups: AtomicUsize,
    pub toggles: AtomicUsize,
    pub fail_toggle: AtomicBool,
    pub lookup_gate: Option<Semaphore>,
    pub toggle_gate: Option<Semaphore>,
    pub libraries: Mutex<Vec<String>>,
}

impl FakeApi {
    pub fn new() -> Self {
        Self {
            favorites: Mutex::new(HashSet::new()),
            lookups: AtomicUsize::new(0),
            toggles: AtomicUsize::new(0),
            fail_toggle: AtomicBool::new(false),
            lookup_gate: None,
            toggle_gate: None,
            libraries: Mutex::new(Vec::new()),
        }
    }

    pub fn with_favorites(self, ids: &[i64]) -> Self {
        *self.favorites.lock().unwrap() = ids.iter().copied().collect();
        self
    }

    pub fn gated_lookups(mut self) -> Self {
        self.lookup_gate = Some(Semaphore::new(0));
        self
    }

    pub fn gated_toggles(mut self) -> Self {
        self.toggle_gate = Some(Semaphore::new(0));
        self
    }

    pub fn failing_toggles(self) -> Self {
        self.fail_toggle.store(true, Ordering::SeqCst);
        self
    }

    pub fn release_lookups(&self, n: usize) {
        if let Some(gate) = &self.lookup_gate {
            gate.add_permits(n);
        }
    }

    pub fn release_toggles(&self, n: usize) {
        if let Some(gate) = &self.toggle_gate {
            gate.add_permits(n);
        }
    }
}

#[async_trait]
impl RadioApi for FakeApi {
    async fn is_favorite(&self, song_ids: &[i64]) -> anyhow::Result<Vec<i64>> {
        self.lookups.fetch_add(1, Ordering::SeqCst);
        if let Some(gate) = &self.lookup_gate {
            gate.acquire().await.unwrap().forget();
        }
        let favorites = self.favorites.lock().unwrap();
        Ok(song_ids
            .iter()
            .copied()
            .filter(|id| favorites.contains(id))
            .collect())
    }

    async fn toggle_favorite(&self, song_id: i64) -> anyhow::Result<()> {
        self.toggles.fetch_add(1, Ordering::SeqCst);
        if let Some(gate) = &self.toggle_gate {
            gate.acquire().await.unwrap().forget();
        }
        if self.fail_toggle.load(Ordering::SeqCst) {
            anyhow::bail!("favoriteSong rejected");
        }
        let mut favorites = self.favorites.lock().unwrap();
        if !favorites.remove(&song_id) {
            favorites.insert(song_id);
        }
        Ok(())
    }

    async fn change_library(&self, name: &str) -> anyhow::Result<()> {
        self.libraries.lock().unwrap().push(name.to_string());
        Ok(())
    }
}

pub struct FakeAuth(pub AtomicBool);

impl FakeAuth {
    pub fn new(authenticated: bool) -> Self {
        Self(AtomicBool::new(authenticated))
    }

    pub fn set(&self, authenticated: bool) {
        self.0.store(authenticated, Ordering::SeqCst);
    }
}

impl AuthState for FakeAuth {
    fn is_authenticated(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

#[derive(Default)]
pub struct FakeArtwork {
    pub requests: Mutex<Vec<Option<String>>>,
}

impl ArtworkLoader for FakeArtwork {
    fn request(&self, url: Option<String>) {
        self.requests.lock().unwrap().push(url);
    }
}

#[derive(Default)]
pub struct FakeFeedback {
    pub toasts: Mutex<Vec<String>>,
    pub favorites: Mutex<Vec<(i64, bool)>>,
    pub timer: Mutex<Vec<bool>>,
}

impl FakeFeedback {
    pub fn toasts(&self) -> Vec<String> {
        self.toasts.lock().unwrap().clone()
    }
}

#[async_trait]
impl UserFeedback for FakeFeedback {
    async fn toast(&self, message: &str) {
        self.toasts.lock().unwrap().push(message.to_string());
    }
    async fn favorite_changed(&self, song_id: i64, favorite: bool) {
        self.favorites.lock().unwrap().push((song_id, favorite));
    }
    async fn sleep_timer_changed(&self, armed: bool) {
        self.timer.lock().unwrap().push(armed);
    }
}

#[derive(Debug, Default)]
pub struct SessionLog {
    pub active: bool,
    pub released: bool,
    pub metadata: Option<SessionMetadata>,
    pub playback: Option<SessionPlaybackState>,
    pub metadata_writes: usize,
}

pub struct RecordingSession(pub Arc<Mutex<SessionLog>>);

#[async_trait]
impl SessionHandle for RecordingSession {
    async fn activate(&mut self) {
        self.0.lock().unwrap().active = true;
    }
    async fn set_metadata(&mut self, metadata: Option<SessionMetadata>) {
        let mut log = self.0.lock().unwrap();
        log.metadata = metadata;
        log.metadata_writes += 1;
    }
    async fn set_playback_state(&mut self, state: SessionPlaybackState) {
        self.0.lock().unwrap().playback = Some(state);
    }
    async fn release(&mut self) {
        let mut log = self.0.lock().unwrap();
        log.active = false;
        log.released = true;
    }
}

#[derive(Debug, Default)]
pub struct NotificationLog {
    pub current: Option<NotificationContent>,
    pub removals: usize,
}

pub struct RecordingNotification(pub Arc<Mutex<NotificationLog>>);

#[async_trait]
impl NotificationHandle for RecordingNotification {
    async fn show(&mut self, content: NotificationContent) {
        self.0.lock().unwrap().current = Some(content);
    }
    async fn remove(&mut self) {
        let mut log = self.0.lock().unwrap();
        log.current = None;
        log.removals += 1;
    }
}

// ── harness ───────────────────────────────────────────────────────────────────

pub struct Harness {
    pub handle: EngineHandle,
    pub join: JoinHandle<ExitReason>,
    pub stream_tx: mpsc::Sender<PlaybackPhase>,
    pub push_tx: mpsc::Sender<PushEvent>,
    pub connectivity_tx: mpsc::Sender<Connectivity>,
    pub prefs_tx: watch::Sender<Preferences>,
    pub artwork_tx: mpsc::Sender<Artwork>,
    pub stream: Arc<FakeStream>,
    pub channel: Arc<FakeChannel>,
    pub api: Arc<FakeApi>,
    pub auth: Arc<FakeAuth>,
    pub artwork: Arc<FakeArtwork>,
    pub feedback: Arc<FakeFeedback>,
    pub session: Arc<Mutex<SessionLog>>,
    pub notification: Arc<Mutex<NotificationLog>>,
}

impl Harness {
    pub fn start(api: FakeApi, authenticated: bool) -> Self {
        Self::start_with(EngineConfig::default(), api, authenticated)
    }

    pub fn start_with(config: EngineConfig, api: FakeApi, authenticated: bool) -> Self {
        let (stream_tx, stream_rx) = mpsc::channel(16);
        let (push_tx, push_rx) = mpsc::channel(16);
        let (connectivity_tx, connectivity_rx) = mpsc::channel(16);
        let (prefs_tx, prefs_rx) = watch::channel(Preferences::default());
        let (artwork_tx, artwork_rx) = mpsc::channel(16);

        let stream = Arc::new(FakeStream::default());
        let channel = Arc::new(FakeChannel::default());
        let api = Arc::new(api);
        let auth = Arc::new(FakeAuth::new(authenticated));
        let artwork = Arc::new(FakeArtwork::default());
        let feedback = Arc::new(FakeFeedback::default());
        let session = Arc::new(Mutex::new(SessionLog::default()));
        let notification = Arc::new(Mutex::new(NotificationLog::default()));

        let collaborators = Collaborators {
            stream: stream.clone(),
            channel: channel.clone(),
            api: api.clone(),
            auth: auth.clone(),
            artwork: artwork.clone(),
            feedback: feedback.clone(),
            session: Box::new(RecordingSession(session.clone())),
            notification: Box::new(RecordingNotification(notification.clone())),
        };
        let sources = Sources {
            stream: stream_rx,
            push: push_rx,
            connectivity: connectivity_rx,
            preferences: prefs_rx,
            artwork: artwork_rx,
        };

        let (handle, join) = Engine::start(&config, collaborators, sources);
        Self {
            handle,
            join,
            stream_tx,
            push_tx,
            connectivity_tx,
            prefs_tx,
            artwork_tx,
            stream,
            channel,
            api,
            auth,
            artwork,
            feedback,
            session,
            notification,
        }
    }

    pub async fn phase(&self, phase: PlaybackPhase) {
        self.stream_tx.send(phase).await.unwrap();
    }

    pub async fn push(&self, snapshot: NowPlayingSnapshot) {
        self.push_tx.send(PushEvent::Snapshot(snapshot)).await.unwrap();
    }

    /// Poll the engine until `pred` holds; panics after a generous number of tries.
    pub async fn wait_for<F>(&self, what: &str, pred: F) -> EngineSnapshot
    where
        F: Fn(&EngineSnapshot) -> bool,
    {
        for _ in 0..200 {
            let snap = self.handle.snapshot().await.unwrap();
            if pred(&snap) {
                return snap;
            }
            settle().await;
        }
        panic!("timed out waiting for {}", what);
    }

    /// Poll a side-channel condition on the fakes.
    pub async fn wait_until<F>(&self, what: &str, pred: F)
    where
        F: Fn() -> bool,
    {
        for _ in 0..200 {
            if pred() {
                return;
            }
            settle().await;
        }
        panic!("timed out waiting for {}", what);
    }
}

/// Let forwarders and spawned calls make progress.
pub async fn settle() {
    for _ in 0..8 {
        tokio::task::yield_now().await;
    }
}

/// Wait for the engine to exit, bounded so a hang fails the test.
pub async fn exit_reason(join: JoinHandle<ExitReason>) -> ExitReason {
    tokio::time::timeout(Duration::from_secs(5), join)
        .await
        .expect("engine did not exit")
        .expect("engine task panicked")
}

// ── fixtures ──────────────────────────────────────────────────────────────────

pub fn song(id: i64, favorite: bool) -> Song {
    Song {
        id,
        title: Some(format!("Song {}", id)),
        title_romaji: Some(format!("Uta {}", id)),
        artists: vec![Credit {
            id: 1,
            name: Some("Artist".into()),
            name_romaji: None,
            image: None,
        }],
        albums: Vec::new(),
        duration: 240.0,
        favorite,
    }
}

pub fn snapshot(song: Song) -> NowPlayingSnapshot {
    NowPlayingSnapshot {
        song: Some(song),
        start_time: Some(chrono::Utc::now().to_rfc3339()),
        listeners: 100,
        ..Default::default()
    }
}
