/// mpv-backed audio stream.
///
/// ```text
///   MpvStream::play()
///         │
///         ├── MpvDriver::spawn_and_connect()   (lazily, once per process)
///         │       ├── writer task  ← MpvRequest via mpsc → socket
///         │       └── reader task  → replies matched by request_id
///         │                         → events → watch_events()
///         └── loadfile <library stream url>
///
///   watch_events():  pause / end-file / reader closed  →  PhaseReporter
/// ```
///
/// Phases go to the engine through an mpsc channel, only when they change.
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use moe_engine::sources::StreamControl;
use moe_proto::model::PlaybackPhase;
use serde_json::{json, Value};
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::sync::{mpsc, oneshot, Mutex};
use tracing::{debug, info, warn};

static NEXT_REQ_ID: AtomicU64 = AtomicU64::new(1);

const OBS_PAUSE: u64 = 1;
const OBS_CORE_IDLE: u64 = 2;

const REPLY_TIMEOUT: Duration = Duration::from_secs(5);
const FADE_STEPS: u32 = 30;

type PendingMap = Arc<Mutex<HashMap<u64, oneshot::Sender<anyhow::Result<Value>>>>>;

struct MpvRequest {
    req_id: u64,
    payload: String,
    reply: oneshot::Sender<anyhow::Result<Value>>,
}

/// An unsolicited line from mpv (event or property change).
#[derive(Debug, Clone)]
pub struct MpvEvent {
    pub raw: Value,
}

impl MpvEvent {
    pub fn property_change(&self) -> Option<(u64, &Value)> {
        if self.name()? != "property-change" {
            return None;
        }
        let id = self.raw.get("id")?.as_u64()?;
        Some((id, self.raw.get("data").unwrap_or(&Value::Null)))
    }

    pub fn name(&self) -> Option<&str> {
        self.raw.get("event")?.as_str()
    }

    /// `end-file` reason: "eof", "stop", "quit", "error", "redirect".
    pub fn end_reason(&self) -> Option<&str> {
        self.raw.get("reason")?.as_str()
    }
}

// ── handle ────────────────────────────────────────────────────────────────────

#[derive(Clone)]
pub struct MpvHandle {
    tx: mpsc::Sender<MpvRequest>,
}

impl MpvHandle {
    pub async fn send(&self, command: Value) -> anyhow::Result<Value> {
        let req_id = NEXT_REQ_ID.fetch_add(1, Ordering::Relaxed);
        let mut payload = serde_json::to_string(&json!({ "command": command, "request_id": req_id }))?;
        payload.push('\n');

        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(MpvRequest {
                req_id,
                payload,
                reply: reply_tx,
            })
            .await
            .map_err(|_| anyhow::anyhow!("mpv writer task gone"))?;

        tokio::time::timeout(REPLY_TIMEOUT, reply_rx)
            .await
            .map_err(|_| anyhow::anyhow!("mpv IPC timeout for req={}", req_id))?
            .map_err(|_| anyhow::anyhow!("mpv reply channel dropped req={}", req_id))?
    }

    pub async fn load(&self, url: &str) -> anyhow::Result<()> {
        self.send(json!(["loadfile", url])).await?;
        Ok(())
    }

    pub async fn set_pause(&self, paused: bool) -> anyhow::Result<()> {
        self.send(json!(["set_property", "pause", paused])).await?;
        Ok(())
    }

    pub async fn stop(&self) -> anyhow::Result<()> {
        self.send(json!(["stop"])).await?;
        Ok(())
    }

    pub async fn set_volume(&self, volume: f32) -> anyhow::Result<()> {
        let pct = (volume * 100.0).clamp(0.0, 100.0);
        self.send(json!(["set_property", "volume", pct])).await?;
        Ok(())
    }

    async fn observe(&self) {
        for (id, name) in [(OBS_PAUSE, "pause"), (OBS_CORE_IDLE, "core-idle")] {
            if let Err(e) = self.send(json!(["observe_property", id, name])).await {
                warn!("mpv: observe_property {} failed: {}", name, e);
            }
        }
    }
}

// ── driver ────────────────────────────────────────────────────────────────────

/// Owns the mpv child process.
pub struct MpvDriver {
    socket_name: String,
    process: Option<tokio::process::Child>,
}

impl MpvDriver {
    pub fn new() -> Self {
        Self {
            socket_name: moe_proto::platform::mpv_socket_name(),
            process: None,
        }
    }

    pub async fn kill(&mut self) {
        if let Some(mut p) = self.process.take() {
            let _ = p.kill().await;
        }
    }

    pub async fn spawn_and_connect(
        &mut self,
        volume: f32,
        event_tx: mpsc::Sender<MpvEvent>,
    ) -> anyhow::Result<MpvHandle> {
        self.kill().await;
        #[cfg(unix)]
        let _ = tokio::fs::remove_file(&self.socket_name).await;

        let binary = moe_proto::platform::find_mpv_binary()
            .ok_or_else(|| anyhow::anyhow!("mpv binary not found"))?;
        info!("mpv: spawning {:?}", binary);

        let child = tokio::process::Command::new(binary)
            .arg("--no-video")
            .arg("--idle=yes")
            .arg("--quiet")
            .arg(moe_proto::platform::mpv_socket_arg())
            .arg(format!(
                "--volume={}",
                (volume * 100.0).clamp(0.0, 100.0).round() as i64
            ))
            .stdout(std::process::Stdio::null())
            .stderr(std::process::Stdio::null())
            .kill_on_drop(true)
            .spawn()?;
        self.process = Some(child);

        for _ in 0..50 {
            tokio::time::sleep(Duration::from_millis(100)).await;
            if let Some(handle) = self.try_connect(event_tx.clone()).await {
                info!("mpv: connected to IPC");
                return Ok(handle);
            }
        }
        anyhow::bail!("mpv IPC endpoint did not appear")
    }

    #[cfg(unix)]
    async fn try_connect(&self, event_tx: mpsc::Sender<MpvEvent>) -> Option<MpvHandle> {
        let stream = tokio::net::UnixStream::connect(&self.socket_name).await.ok()?;
        Some(start_io_tasks(stream, event_tx))
    }

    #[cfg(windows)]
    async fn try_connect(&self, event_tx: mpsc::Sender<MpvEvent>) -> Option<MpvHandle> {
        let pipe = tokio::net::windows::named_pipe::ClientOptions::new()
            .open(format!(r"\\.\pipe\{}", self.socket_name))
            .ok()?;
        Some(start_io_tasks(pipe, event_tx))
    }
}

fn start_io_tasks<S>(stream: S, event_tx: mpsc::Sender<MpvEvent>) -> MpvHandle
where
    S: AsyncRead + AsyncWrite + Send + 'static,
{
    let (read_half, write_half) = tokio::io::split(stream);
    let pending: PendingMap = Arc::new(Mutex::new(HashMap::new()));
    let (cmd_tx, cmd_rx) = mpsc::channel::<MpvRequest>(64);

    tokio::spawn(writer_task(write_half, cmd_rx, pending.clone()));
    tokio::spawn(reader_task(BufReader::new(read_half), pending, event_tx));

    MpvHandle { tx: cmd_tx }
}

async fn fail_all(pending: &PendingMap, reason: &str) {
    for (_, tx) in pending.lock().await.drain() {
        let _ = tx.send(Err(anyhow::anyhow!("mpv IPC {}", reason)));
    }
}

async fn reader_task<R>(mut reader: BufReader<R>, pending: PendingMap, event_tx: mpsc::Sender<MpvEvent>)
where
    R: AsyncRead + Unpin,
{
    let mut line = String::new();
    loop {
        line.clear();
        match reader.read_line(&mut line).await {
            Ok(0) => {
                debug!("mpv reader: connection closed");
                fail_all(&pending, "connection closed").await;
                break;
            }
            Ok(_) => {
                let trimmed = line.trim();
                if trimmed.is_empty() {
                    continue;
                }
                let val: Value = match serde_json::from_str(trimmed) {
                    Ok(v) => v,
                    Err(e) => {
                        debug!("mpv reader: invalid json '{}': {}", trimmed, e);
                        continue;
                    }
                };

                let Some(req_id) = val.get("request_id").and_then(Value::as_u64) else {
                    let _ = event_tx.send(MpvEvent { raw: val }).await;
                    continue;
                };
                if let Some(tx) = pending.lock().await.remove(&req_id) {
                    let result = match val["error"].as_str() {
                        Some("success") => Ok(val),
                        err => Err(anyhow::anyhow!("mpv error: {}", err.unwrap_or("unknown"))),
                    };
                    let _ = tx.send(result);
                }
            }
            Err(e) => {
                warn!("mpv reader: read error: {}", e);
                fail_all(&pending, "read error").await;
                break;
            }
        }
    }
}

async fn writer_task<W>(mut writer: W, mut rx: mpsc::Receiver<MpvRequest>, pending: PendingMap)
where
    W: AsyncWrite + Unpin,
{
    while let Some(req) = rx.recv().await {
        // Register before writing so the reader can always match the reply.
        pending.lock().await.insert(req.req_id, req.reply);
        if let Err(e) = writer.write_all(req.payload.as_bytes()).await {
            warn!("mpv writer: write error: {}", e);
            if let Some(tx) = pending.lock().await.remove(&req.req_id) {
                let _ = tx.send(Err(anyhow::anyhow!("mpv write error: {}", e)));
            }
            break;
        }
    }
    debug!("mpv writer: task exiting");
}

// ── phase reporting ───────────────────────────────────────────────────────────

/// Current phase plus the engine-facing channel; sends only on change.
struct PhaseReporter {
    current: Mutex<PlaybackPhase>,
    tx: mpsc::Sender<PlaybackPhase>,
}

impl PhaseReporter {
    async fn get(&self) -> PlaybackPhase {
        *self.current.lock().await
    }

    async fn set(&self, phase: PlaybackPhase) {
        {
            let mut current = self.current.lock().await;
            if *current == phase {
                return;
            }
            debug!("mpv: phase {:?} → {:?}", *current, phase);
            *current = phase;
        }
        // Send outside the lock; the engine queue may be full.
        let _ = self.tx.send(phase).await;
    }
}

/// Map one mpv event onto the phase it implies, given the current phase.
fn phase_for_event(current: PlaybackPhase, event: &MpvEvent) -> Option<PlaybackPhase> {
    if !current.is_started() {
        return None;
    }
    if let Some((OBS_PAUSE, data)) = event.property_change() {
        return data.as_bool().map(|paused| {
            if paused {
                PlaybackPhase::Paused
            } else {
                PlaybackPhase::Playing
            }
        });
    }
    match (event.name(), event.end_reason()) {
        // Our own stop/loadfile produce "stop"/"redirect"; anything else means the stream died.
        (Some("end-file"), Some("eof" | "error" | "quit")) => Some(PlaybackPhase::Stopped),
        _ => None,
    }
}

// ── stream collaborator ───────────────────────────────────────────────────────

struct Player {
    driver: MpvDriver,
    handle: Option<MpvHandle>,
}

struct Shared {
    player: Mutex<Player>,
    phase: PhaseReporter,
    url: std::sync::RwLock<String>,
    volume: std::sync::RwLock<f32>,
    fade_out: Duration,
    fade: Mutex<Option<tokio::task::JoinHandle<()>>>,
}

pub struct MpvStream {
    shared: Arc<Shared>,
}

impl MpvStream {
    pub fn new(
        url: String,
        volume: f32,
        fade_out: Duration,
        phase_tx: mpsc::Sender<PlaybackPhase>,
    ) -> Self {
        Self {
            shared: Arc::new(Shared {
                player: Mutex::new(Player {
                    driver: MpvDriver::new(),
                    handle: None,
                }),
                phase: PhaseReporter {
                    current: Mutex::new(PlaybackPhase::Stopped),
                    tx: phase_tx,
                },
                url: std::sync::RwLock::new(url),
                volume: std::sync::RwLock::new(volume),
                fade_out,
                fade: Mutex::new(None),
            }),
        }
    }

    /// Switch the stream URL; a started stream reloads at once.
    pub async fn set_url(&self, url: &str) -> anyhow::Result<()> {
        *self.shared.url.write().unwrap_or_else(|e| e.into_inner()) = url.to_string();
        if self.shared.phase.get().await.is_started() {
            let handle = self.shared.handle().await?;
            handle.load(url).await?;
            handle.set_pause(false).await?;
            self.shared.phase.set(PlaybackPhase::Playing).await;
        }
        Ok(())
    }

    pub async fn shutdown(&self) {
        self.shared.player.lock().await.driver.kill().await;
    }
}

impl Shared {
    fn volume(&self) -> f32 {
        *self.volume.read().unwrap_or_else(|e| e.into_inner())
    }

    /// The live IPC handle, spawning mpv on first use or after it died.
    async fn handle(self: &Arc<Self>) -> anyhow::Result<MpvHandle> {
        let mut player = self.player.lock().await;
        if let Some(h) = &player.handle {
            if !h.tx.is_closed() {
                return Ok(h.clone());
            }
        }

        let (event_tx, event_rx) = mpsc::channel(64);
        let handle = player
            .driver
            .spawn_and_connect(self.volume(), event_tx)
            .await?;
        handle.observe().await;
        tokio::spawn(watch_events(Arc::clone(self), event_rx));
        player.handle = Some(handle.clone());
        Ok(handle)
    }

    async fn play(self: &Arc<Self>) -> anyhow::Result<()> {
        self.cancel_fade().await;
        let handle = self.handle().await?;
        if !self.phase.get().await.is_started() {
            let url = self.url.read().unwrap_or_else(|e| e.into_inner()).clone();
            info!("mpv: loading {}", url);
            handle.load(&url).await?;
        }
        handle.set_volume(self.volume()).await?;
        handle.set_pause(false).await?;
        self.phase.set(PlaybackPhase::Playing).await;
        Ok(())
    }

    async fn pause(self: &Arc<Self>) -> anyhow::Result<()> {
        if !self.phase.get().await.is_started() {
            return Ok(());
        }
        self.handle().await?.set_pause(true).await?;
        self.phase.set(PlaybackPhase::Paused).await;
        Ok(())
    }

    async fn stop(self: &Arc<Self>) -> anyhow::Result<()> {
        self.cancel_fade().await;
        if !self.phase.get().await.is_started() {
            return Ok(());
        }
        // Report first: the end-file "stop" event that follows is ours.
        self.phase.set(PlaybackPhase::Stopped).await;
        self.handle().await?.stop().await
    }

    async fn cancel_fade(&self) {
        if let Some(fade) = self.fade.lock().await.take() {
            fade.abort();
        }
    }
}

/// Ramp the volume to zero, stop, then restore the volume for next time.
async fn fade_then_stop(shared: Arc<Shared>) {
    let target = shared.volume();
    let step = shared.fade_out / FADE_STEPS;
    if let Ok(handle) = shared.handle().await {
        for i in (0..FADE_STEPS).rev() {
            let level = target * i as f32 / FADE_STEPS as f32;
            if handle.set_volume(level).await.is_err() {
                break;
            }
            tokio::time::sleep(step).await;
        }
    }
    shared.phase.set(PlaybackPhase::Stopped).await;
    if let Ok(handle) = shared.handle().await {
        let _ = handle.stop().await;
        let _ = handle.set_volume(target).await;
    }
    info!("mpv: fade-out finished");
}

async fn watch_events(shared: Arc<Shared>, mut event_rx: mpsc::Receiver<MpvEvent>) {
    while let Some(event) = event_rx.recv().await {
        let current = shared.phase.get().await;
        if let Some(next) = phase_for_event(current, &event) {
            shared.phase.set(next).await;
        }
    }
    // Reader gone: mpv died or closed its socket.
    warn!("mpv: IPC closed");
    shared.player.lock().await.handle = None;
    shared.phase.set(PlaybackPhase::Stopped).await;
}

#[async_trait]
impl StreamControl for MpvStream {
    async fn play(&self) -> anyhow::Result<()> {
        self.shared.play().await
    }

    async fn pause(&self) -> anyhow::Result<()> {
        self.shared.pause().await
    }

    async fn stop(&self) -> anyhow::Result<()> {
        self.shared.stop().await
    }

    async fn toggle(&self) -> anyhow::Result<()> {
        if self.shared.phase.get().await.is_playing() {
            self.shared.pause().await
        } else {
            self.shared.play().await
        }
    }

    async fn fade_out(&self) -> anyhow::Result<()> {
        if !self.shared.phase.get().await.is_playing() {
            return self.shared.stop().await;
        }
        info!("mpv: fading out over {:?}", self.shared.fade_out);
        let task = tokio::spawn(fade_then_stop(Arc::clone(&self.shared)));
        if let Some(old) = self.shared.fade.lock().await.replace(task) {
            old.abort();
        }
        Ok(())
    }
}
