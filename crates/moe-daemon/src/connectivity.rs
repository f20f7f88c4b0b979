//! Network reachability: a periodic TCP connect to the gateway host.

use std::time::Duration;

use moe_engine::sources::Connectivity;
use moe_proto::config::ConnectivityConfig;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info};

pub struct ConnectivityProbe {
    host: String,
    interval: Duration,
    timeout: Duration,
}

impl ConnectivityProbe {
    pub fn from_config(config: &ConnectivityConfig) -> Self {
        Self {
            host: config.probe_host.clone(),
            interval: Duration::from_secs(config.interval_secs.max(1)),
            timeout: Duration::from_millis(config.timeout_ms),
        }
    }

    pub async fn check(&self) -> bool {
        matches!(
            tokio::time::timeout(self.timeout, TcpStream::connect(&self.host)).await,
            Ok(Ok(_))
        )
    }

    /// Probe forever, sending an edge whenever reachability flips.
    pub fn spawn(self, tx: mpsc::Sender<Connectivity>) -> JoinHandle<()> {
        tokio::spawn(async move {
            info!(
                "Connectivity: probing {} every {:?}",
                self.host, self.interval
            );
            let mut last = None;
            loop {
                let up = self.check().await;
                if let Some(change) = edge(last, up) {
                    debug!("Connectivity: {:?}", change);
                    if tx.send(change).await.is_err() {
                        break;
                    }
                }
                last = Some(up);
                tokio::time::sleep(self.interval).await;
            }
        })
    }
}

/// The network starts out assumed up, so only a first failure is reported.
fn edge(previous: Option<bool>, now: bool) -> Option<Connectivity> {
    match (previous.unwrap_or(true), now) {
        (true, false) => Some(Connectivity::Lost),
        (false, true) => Some(Connectivity::Available),
        _ => None,
    }
}
