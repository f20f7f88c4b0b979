//! Persisted login token.
//!
//! The gateway and API both read the token from here.  Tokens are stamped
//! with the time they were stored and dropped once they are older than
//! [`TOKEN_MAX_AGE_DAYS`].

use std::path::PathBuf;
use std::sync::RwLock;

use chrono::{DateTime, Duration, Utc};
use moe_engine::sources::AuthState;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

pub const TOKEN_MAX_AGE_DAYS: i64 = 28;

#[derive(Debug, Clone, Serialize, Deserialize)]
struct StoredToken {
    token: String,
    stored_at: DateTime<Utc>,
}

impl StoredToken {
    fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now - self.stored_at > Duration::days(TOKEN_MAX_AGE_DAYS)
    }
}

pub struct AuthStore {
    path: PathBuf,
    token: RwLock<Option<StoredToken>>,
}

impl AuthStore {
    /// Read the token file; an expired or unreadable token counts as logged out.
    pub fn load(path: PathBuf) -> Self {
        let stored = std::fs::read_to_string(&path)
            .ok()
            .and_then(|raw| serde_json::from_str::<StoredToken>(&raw).ok());

        let token = match stored {
            Some(t) if t.is_expired(Utc::now()) => {
                info!("Auth token from {} expired, discarding", t.stored_at);
                if let Err(e) = std::fs::remove_file(&path) {
                    warn!("Failed to remove expired auth file: {}", e);
                }
                None
            }
            other => other,
        };

        Self {
            path,
            token: RwLock::new(token),
        }
    }

    pub fn token(&self) -> Option<String> {
        let guard = self.token.read().unwrap_or_else(|e| e.into_inner());
        guard
            .as_ref()
            .filter(|t| !t.is_expired(Utc::now()))
            .map(|t| t.token.clone())
    }

    /// `Authorization` header value, if logged in.
    pub fn bearer(&self) -> Option<String> {
        self.token().map(|t| format!("Bearer {}", t))
    }

    pub async fn login(&self, token: String) -> anyhow::Result<()> {
        let stored = StoredToken {
            token,
            stored_at: Utc::now(),
        };
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&self.path, serde_json::to_string_pretty(&stored)?).await?;
        *self.token.write().unwrap_or_else(|e| e.into_inner()) = Some(stored);
        info!("Auth: logged in");
        Ok(())
    }

    pub async fn logout(&self) -> anyhow::Result<()> {
        *self.token.write().unwrap_or_else(|e| e.into_inner()) = None;
        match tokio::fs::remove_file(&self.path).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
        info!("Auth: logged out");
        Ok(())
    }
}

impl AuthState for AuthStore {
    fn is_authenticated(&self) -> bool {
        self.token().is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_auth_file(name: &str) -> PathBuf {
        std::env::temp_dir()
            .join(format!("moe-daemon-auth-{}-{}", name, std::process::id()))
            .join("auth.json")
    }

    #[tokio::test]
    async fn test_login_persists_and_logout_clears() {
        let path = temp_auth_file("roundtrip");
        let store = AuthStore::load(path.clone());
        assert!(!store.is_authenticated());

        store.login("abc".into()).await.unwrap();
        assert_eq!(store.bearer().as_deref(), Some("Bearer abc"));
        assert!(AuthStore::load(path.clone()).is_authenticated());

        store.logout().await.unwrap();
        assert!(!store.is_authenticated());
        assert!(!path.exists());
        store.logout().await.unwrap();
        let _ = std::fs::remove_dir_all(path.parent().unwrap());
    }

    #[test]
    fn test_expired_token_is_dropped_on_load() {
        let path = temp_auth_file("expired");
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        let stale = StoredToken {
            token: "old".into(),
            stored_at: Utc::now() - Duration::days(TOKEN_MAX_AGE_DAYS + 1),
        };
        std::fs::write(&path, serde_json::to_string(&stale).unwrap()).unwrap();

        let store = AuthStore::load(path.clone());
        assert!(!store.is_authenticated());
        assert!(!path.exists());
        let _ = std::fs::remove_dir_all(path.parent().unwrap());
    }

    #[test]
    fn test_fresh_token_is_kept() {
        let t = StoredToken {
            token: "t".into(),
            stored_at: Utc::now() - Duration::days(TOKEN_MAX_AGE_DAYS - 1),
        };
        assert!(!t.is_expired(Utc::now()));
    }
}
