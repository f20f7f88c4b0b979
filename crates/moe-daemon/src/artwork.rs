//! Album-art download cache.
//!
//! Each request bumps a generation counter; a download that finishes after a
//! newer request is thrown away instead of being reported.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use moe_engine::sources::{Artwork, ArtworkLoader};
use tokio::sync::mpsc;
use tracing::{debug, warn};

pub struct ArtworkCache {
    dir: PathBuf,
    http: reqwest::Client,
    tx: mpsc::Sender<Artwork>,
    generation: Arc<AtomicU64>,
}

impl ArtworkCache {
    pub fn new(dir: PathBuf, tx: mpsc::Sender<Artwork>) -> anyhow::Result<Self> {
        let http = reqwest::Client::builder()
            .user_agent(crate::api::user_agent())
            .timeout(Duration::from_secs(30))
            .build()?;
        Ok(Self {
            dir,
            http,
            tx,
            generation: Arc::new(AtomicU64::new(0)),
        })
    }
}

impl ArtworkLoader for ArtworkCache {
    fn request(&self, url: Option<String>) {
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let current = Arc::clone(&self.generation);
        let tx = self.tx.clone();
        let http = self.http.clone();
        let dir = self.dir.clone();

        tokio::spawn(async move {
            let artwork = match url {
                None => Artwork::default_art(),
                Some(url) => match fetch(&http, &dir, &url).await {
                    Ok(path) => Artwork {
                        url: Some(url),
                        local_path: Some(path),
                        is_default: false,
                    },
                    Err(e) => {
                        warn!("Artwork: {} failed: {}", url, e);
                        Artwork::default_art()
                    }
                },
            };
            if current.load(Ordering::SeqCst) != generation {
                debug!("Artwork: superseded result dropped");
                return;
            }
            let _ = tx.send(artwork).await;
        });
    }
}

async fn fetch(http: &reqwest::Client, dir: &Path, url: &str) -> anyhow::Result<PathBuf> {
    let path = dir.join(cache_file_name(url));
    if tokio::fs::try_exists(&path).await? {
        return Ok(path);
    }

    let resp = http.get(url).send().await?.error_for_status()?;
    let bytes = resp.bytes().await?;
    tokio::fs::create_dir_all(dir).await?;
    tokio::fs::write(&path, &bytes).await?;
    debug!("Artwork: cached {} ({} bytes)", path.display(), bytes.len());
    Ok(path)
}

/// Last path segment of `url`, made safe for a file name.
fn cache_file_name(url: &str) -> String {
    let tail = url
        .split(['?', '#'])
        .next()
        .unwrap_or(url)
        .rsplit('/')
        .find(|s| !s.is_empty())
        .unwrap_or("art");
    tail.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_') {
                c
            } else {
                '_'
            }
        })
        .collect()
}
