mod api;
mod artwork;
mod auth;
mod connectivity;
mod control;
mod gateway;
mod mpv;
mod service;
mod sinks;
mod socket;

use std::sync::Arc;
use std::time::Duration;

use moe_engine::sources::AuthState;
use moe_engine::{Collaborators, Engine, ExitReason, Sources};
use moe_proto::config::Config;
use moe_proto::protocol::Command;
use moe_proto::state::StateManager;
use tokio::sync::{broadcast, mpsc, watch};
use tracing::{info, warn};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

#[derive(Debug, Clone)]
pub enum BroadcastMessage {
    StateUpdated,
    FavoriteChanged { song_id: i64, favorite: bool },
    Toast(String),
    Log(String),
}

/// Forwards WARN and ERROR events to control clients.
struct BroadcastLayer {
    sender: broadcast::Sender<BroadcastMessage>,
}

impl<S> tracing_subscriber::Layer<S> for BroadcastLayer
where
    S: tracing::Subscriber,
{
    fn on_event(&self, event: &tracing::Event<'_>, _ctx: tracing_subscriber::layer::Context<'_, S>) {
        let level = event.metadata().level();
        if !matches!(*level, tracing::Level::WARN | tracing::Level::ERROR) {
            return;
        }

        let mut message = format!("{} [{}] ", chrono::Local::now().format("%H:%M:%S"), level);
        event.record(&mut MessageVisitor(&mut message));
        // No receivers is fine.
        let _ = self.sender.send(BroadcastMessage::Log(message));
    }
}

struct MessageVisitor<'a>(&'a mut String);

impl tracing::field::Visit for MessageVisitor<'_> {
    fn record_debug(&mut self, field: &tracing::field::Field, value: &dyn std::fmt::Debug) {
        if field.name() == "message" {
            self.0.push_str(&format!("{:?}", value));
        } else {
            self.0.push_str(&format!(" {}={:?}", field.name(), value));
        }
    }
}

fn init_logging(broadcast_tx: broadcast::Sender<BroadcastMessage>) -> anyhow::Result<()> {
    let data_dir = moe_proto::platform::data_dir();
    std::fs::create_dir_all(&data_dir)?;
    let log_path = data_dir.join("daemon.log");
    let log_file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&log_path)?;

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(log_file)
                .with_ansi(false),
        )
        .with(BroadcastLayer {
            sender: broadcast_tx,
        })
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                tracing_subscriber::EnvFilter::new("info,moe_daemon=debug,moe_engine=debug")
            }),
        )
        .init();

    info!("Log file: {:?}", log_path);
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let (broadcast_tx, _) = broadcast::channel::<BroadcastMessage>(100);
    init_logging(broadcast_tx.clone())?;

    let config = Config::load()?;
    info!("Config loaded from: {:?}", Config::config_path());

    let first_run = !config.daemon.state_file.exists();
    let state = Arc::new(StateManager::new(config.daemon.state_file.clone()));
    if first_run {
        state
            .seed(config.radio.library, config.radio.volume)
            .await?;
    }
    let persistent = state.persistent().await;
    let library = persistent.library;

    let auth = Arc::new(auth::AuthStore::load(config.daemon.auth_file.clone()));
    state.set_authenticated(auth.is_authenticated()).await;

    // Engine inputs
    let (phase_tx, phase_rx) = mpsc::channel(32);
    let (push_tx, push_rx) = mpsc::channel(32);
    let (connectivity_tx, connectivity_rx) = mpsc::channel(8);
    let (artwork_tx, artwork_rx) = mpsc::channel(8);
    let (prefs_tx, prefs_rx) = watch::channel(config.preferences);

    let stream = Arc::new(mpv::MpvStream::new(
        library.stream_url().to_string(),
        persistent.volume,
        Duration::from_secs(config.radio.fade_out_secs),
        phase_tx,
    ));
    let gateway = Arc::new(gateway::Gateway::new(
        library.gateway_url().to_string(),
        auth.clone(),
        push_tx,
        Duration::from_secs(config.radio.retry_delay_secs),
    ));
    let api = api::ApiClient::new(config.radio.api_url.clone(), auth.clone())?;
    let service = Arc::new(service::RadioService::new(
        api,
        stream.clone(),
        gateway.clone(),
        state.clone(),
    ));
    let artwork = Arc::new(artwork::ArtworkCache::new(
        moe_proto::platform::cache_dir().join("art"),
        artwork_tx,
    )?);
    let probe = connectivity::ConnectivityProbe::from_config(&config.connectivity)
        .spawn(connectivity_tx);

    let collaborators = Collaborators {
        stream: stream.clone(),
        channel: gateway,
        api: service,
        auth: auth.clone(),
        artwork,
        feedback: Arc::new(sinks::FeedbackSink::new(state.clone(), broadcast_tx.clone())),
        session: Box::new(sinks::SessionSink::new(state.clone(), broadcast_tx.clone())),
        notification: Box::new(sinks::NotificationSink::new(
            state.clone(),
            broadcast_tx.clone(),
        )),
    };
    let sources = Sources {
        stream: phase_rx,
        push: push_rx,
        connectivity: connectivity_rx,
        preferences: prefs_rx,
        artwork: artwork_rx,
    };

    let (engine, mut join) = Engine::start(&config.engine, collaborators, sources);

    let listener = socket::bind(&config.daemon.bind_address, config.daemon.control_port).await?;
    let control = Arc::new(control::Control::new(
        engine.clone(),
        auth,
        state.clone(),
        prefs_tx,
        config,
    ));
    let server = socket::serve(listener, state, control, broadcast_tx);

    info!("Daemon initialised, starting playback");
    engine.dispatch(Command::Play).await?;

    let reason = tokio::select! {
        exited = &mut join => exited?,
        _ = tokio::signal::ctrl_c() => {
            info!("Interrupted, shutting down");
            if engine.shutdown().await.is_err() {
                warn!("Engine already gone");
            }
            join.await?
        }
    };
    info!("Engine exited: {:?}", reason);

    server.abort();
    probe.abort();
    stream.shutdown().await;

    if reason == ExitReason::StreamStopped {
        info!("Stream stopped, daemon exiting");
    }
    Ok(())
}
