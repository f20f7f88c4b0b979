/// Websocket push channel to the LISTEN.moe gateway.
///
/// ```text
///   Gateway::connect()
///         │
///         └── session task (one per connect)
///               loop {
///                 connect_async → send identify
///                 select! {
///                   frame      → Snapshot → PushEvent channel
///                   outbound   → sink (track request)
///                   heartbeat  → sink {"op":9}
///                 }
///                 dropped → PushEvent::Failure, sleep(retry + jitter)
///               }
/// ```
///
/// `disconnect()` aborts the task, so no retry outlives it.
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use moe_engine::sources::{PushChannel, PushEvent};
use moe_proto::gateway::{
    heartbeat_frame, identify_frame, parse_frame, track_request_frame, GatewayMessage,
};
use rand::Rng;
use thiserror::Error;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio::time::Interval;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, info, warn};

use crate::auth::AuthStore;

const MAX_JITTER_MS: u64 = 1000;

#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("websocket: {0}")]
    Socket(#[from] tokio_tungstenite::tungstenite::Error),
    #[error("engine stopped listening")]
    Detached,
}

struct Session {
    task: JoinHandle<()>,
    outbound: mpsc::Sender<String>,
    connected: Arc<AtomicBool>,
}

impl Session {
    fn is_running(&self) -> bool {
        !self.task.is_finished()
    }
}

pub struct Gateway {
    url: RwLock<String>,
    auth: Arc<AuthStore>,
    events: mpsc::Sender<PushEvent>,
    retry_delay: Duration,
    session: Mutex<Option<Session>>,
}

impl Gateway {
    pub fn new(
        url: String,
        auth: Arc<AuthStore>,
        events: mpsc::Sender<PushEvent>,
        retry_delay: Duration,
    ) -> Self {
        Self {
            url: RwLock::new(url),
            auth,
            events,
            retry_delay,
            session: Mutex::new(None),
        }
    }

    /// Point at another library's gateway; a running session is restarted.
    pub async fn set_url(&self, url: &str) {
        *self.url.write().unwrap_or_else(|e| e.into_inner()) = url.to_string();
        let mut session = self.session.lock().await;
        if let Some(old) = session.take() {
            old.task.abort();
            *session = Some(self.spawn());
        }
    }

    pub async fn is_connected(&self) -> bool {
        self.session
            .lock()
            .await
            .as_ref()
            .is_some_and(|s| s.connected.load(Ordering::SeqCst))
    }

    fn spawn(&self) -> Session {
        let url = self.url.read().unwrap_or_else(|e| e.into_inner()).clone();
        let (outbound_tx, outbound_rx) = mpsc::channel(8);
        let connected = Arc::new(AtomicBool::new(false));

        info!("Gateway: connecting to {}", url);
        let task = tokio::spawn(run(
            url,
            self.auth.clone(),
            self.events.clone(),
            self.retry_delay,
            outbound_rx,
            connected.clone(),
        ));
        Session {
            task,
            outbound: outbound_tx,
            connected,
        }
    }
}

#[async_trait]
impl PushChannel for Gateway {
    async fn connect(&self) {
        let mut session = self.session.lock().await;
        if session.as_ref().is_some_and(Session::is_running) {
            debug!("Gateway: already running");
            return;
        }
        *session = Some(self.spawn());
    }

    async fn disconnect(&self) {
        if let Some(s) = self.session.lock().await.take() {
            info!("Gateway: disconnecting");
            s.task.abort();
        }
    }

    async fn reconnect(&self) {
        let mut session = self.session.lock().await;
        if let Some(s) = session.as_ref() {
            if s.is_running() && s.connected.load(Ordering::SeqCst) {
                debug!("Gateway: reconnect while connected, ignoring");
                return;
            }
            s.task.abort();
        }
        *session = Some(self.spawn());
    }

    async fn update(&self) {
        if let Some(s) = self.session.lock().await.as_ref() {
            if s.outbound.try_send(track_request_frame()).is_err() {
                debug!("Gateway: track request dropped");
            }
        }
    }
}

async fn run(
    url: String,
    auth: Arc<AuthStore>,
    events: mpsc::Sender<PushEvent>,
    retry_delay: Duration,
    mut outbound: mpsc::Receiver<String>,
    connected: Arc<AtomicBool>,
) {
    loop {
        match session(&url, &auth, &events, &mut outbound, &connected).await {
            Ok(()) => info!("Gateway: connection closed"),
            Err(GatewayError::Detached) => return,
            Err(e) => warn!("Gateway: {}", e),
        }
        connected.store(false, Ordering::SeqCst);
        if events.send(PushEvent::Failure).await.is_err() {
            return;
        }

        let jitter = rand::thread_rng().gen_range(0..MAX_JITTER_MS);
        let delay = retry_delay + Duration::from_millis(jitter);
        debug!("Gateway: retrying in {:?}", delay);
        tokio::time::sleep(delay).await;
    }
}

async fn session(
    url: &str,
    auth: &AuthStore,
    events: &mpsc::Sender<PushEvent>,
    outbound: &mut mpsc::Receiver<String>,
    connected: &AtomicBool,
) -> Result<(), GatewayError> {
    let (ws, _) = tokio_tungstenite::connect_async(url).await?;
    let (mut sink, mut stream) = ws.split();

    sink.send(Message::Text(identify_frame(auth.token().as_deref())))
        .await?;
    connected.store(true, Ordering::SeqCst);
    info!("Gateway: connected");

    let mut heartbeat: Option<Interval> = None;

    loop {
        tokio::select! {
            frame = stream.next() => {
                let text = match frame {
                    None | Some(Ok(Message::Close(_))) => return Ok(()),
                    Some(Err(e)) => return Err(e.into()),
                    Some(Ok(Message::Text(text))) => text,
                    Some(Ok(_)) => continue,
                };
                match parse_frame(&text) {
                    Ok(GatewayMessage::Welcome { heartbeat_ms }) => {
                        debug!("Gateway: welcome, heartbeat every {}ms", heartbeat_ms);
                        if heartbeat_ms > 0 {
                            let period = Duration::from_millis(heartbeat_ms);
                            heartbeat = Some(tokio::time::interval_at(
                                tokio::time::Instant::now() + period,
                                period,
                            ));
                        }
                    }
                    Ok(GatewayMessage::Track(snapshot)) => {
                        debug!(
                            "Gateway: track {:?}",
                            snapshot.song.as_ref().map(|s| s.id)
                        );
                        if events.send(PushEvent::Snapshot(snapshot)).await.is_err() {
                            return Err(GatewayError::Detached);
                        }
                    }
                    Ok(GatewayMessage::HeartbeatAck) => {}
                    Ok(GatewayMessage::Other { op, kind }) => {
                        debug!("Gateway: ignoring op={} t={:?}", op, kind);
                    }
                    Err(e) => warn!("Gateway: skipping malformed frame: {}", e),
                }
            }

            Some(frame) = outbound.recv() => {
                sink.send(Message::Text(frame)).await?;
            }

            _ = next_heartbeat(&mut heartbeat) => {
                sink.send(Message::Text(heartbeat_frame())).await?;
            }
        }
    }
}

async fn next_heartbeat(interval: &mut Option<Interval>) {
    match interval {
        Some(iv) => {
            iv.tick().await;
        }
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    const WELCOME: &str = r#"{"op":0,"d":{"message":"hi","heartbeat":35000}}"#;
    const TRACK: &str = r#"{"op":1,"t":"TRACK_UPDATE","d":{"song":{"id":42,"title":"t","artists":[],"albums":[],"duration":200},"startTime":"2024-01-01T00:00:00.000Z","listeners":9,"requester":null,"event":null,"lastPlayed":[]}}"#;

    fn logged_out() -> Arc<AuthStore> {
        let path = std::env::temp_dir()
            .join(format!("moe-daemon-gw-{}", std::process::id()))
            .join("auth.json");
        Arc::new(AuthStore::load(path))
    }

    /// Accepts websocket clients, answers identify with welcome + one track,
    /// and reports every text frame it receives.
    async fn fake_gateway() -> (String, mpsc::Receiver<String>, Arc<std::sync::atomic::AtomicUsize>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("ws://{}", listener.local_addr().unwrap());
        let (seen_tx, seen_rx) = mpsc::channel(16);
        let accepted = Arc::new(std::sync::atomic::AtomicUsize::new(0));
        let accepted_srv = accepted.clone();

        tokio::spawn(async move {
            while let Ok((tcp, _)) = listener.accept().await {
                accepted_srv.fetch_add(1, Ordering::SeqCst);
                let seen_tx = seen_tx.clone();
                tokio::spawn(async move {
                    let mut ws = tokio_tungstenite::accept_async(tcp).await.unwrap();
                    while let Some(Ok(msg)) = ws.next().await {
                        if let Message::Text(text) = msg {
                            let is_identify = text.contains("\"auth\"");
                            let _ = seen_tx.send(text).await;
                            if is_identify {
                                ws.send(Message::Text(WELCOME.into())).await.unwrap();
                                ws.send(Message::Text(TRACK.into())).await.unwrap();
                            }
                        }
                    }
                });
            }
        });
        (url, seen_rx, accepted)
    }

    async fn next_snapshot(rx: &mut mpsc::Receiver<PushEvent>) -> PushEvent {
        tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .unwrap()
            .unwrap()
    }

    #[tokio::test]
    async fn test_identifies_and_forwards_track_updates() {
        let (url, mut seen, _) = fake_gateway().await;
        let (tx, mut rx) = mpsc::channel(8);
        let gateway = Gateway::new(url, logged_out(), tx, Duration::from_secs(60));

        gateway.connect().await;
        let identify = seen.recv().await.unwrap();
        assert_eq!(identify, identify_frame(None));

        match next_snapshot(&mut rx).await {
            PushEvent::Snapshot(s) => {
                assert_eq!(s.song.map(|s| s.id), Some(42));
                assert_eq!(s.listeners, 9);
            }
            other => panic!("unexpected {:?}", other),
        }
        gateway.disconnect().await;
    }

    #[tokio::test]
    async fn test_update_sends_track_request() {
        let (url, mut seen, _) = fake_gateway().await;
        let (tx, mut rx) = mpsc::channel(8);
        let gateway = Gateway::new(url, logged_out(), tx, Duration::from_secs(60));

        gateway.connect().await;
        seen.recv().await.unwrap();
        next_snapshot(&mut rx).await;

        gateway.update().await;
        let frame = seen.recv().await.unwrap();
        assert_eq!(frame, track_request_frame());
        gateway.disconnect().await;
    }

    #[tokio::test]
    async fn test_reconnect_is_noop_while_connected() {
        let (url, mut seen, accepted) = fake_gateway().await;
        let (tx, mut rx) = mpsc::channel(8);
        let gateway = Gateway::new(url, logged_out(), tx, Duration::from_secs(60));

        gateway.connect().await;
        seen.recv().await.unwrap();
        next_snapshot(&mut rx).await;
        assert!(gateway.is_connected().await);

        gateway.reconnect().await;
        gateway.connect().await;
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(accepted.load(Ordering::SeqCst), 1);
        gateway.disconnect().await;
        assert!(!gateway.is_connected().await);
    }

    #[tokio::test]
    async fn test_unreachable_gateway_reports_failure() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("ws://{}", listener.local_addr().unwrap());
        drop(listener);

        let (tx, mut rx) = mpsc::channel(8);
        let gateway = Gateway::new(url, logged_out(), tx, Duration::from_secs(60));
        gateway.connect().await;

        assert_eq!(next_snapshot(&mut rx).await, PushEvent::Failure);
        gateway.disconnect().await;
    }
}
