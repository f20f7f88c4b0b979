//! LISTEN.moe GraphQL client: favorite lookups and mutations.

use std::sync::Arc;
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};
use thiserror::Error;
use tracing::debug;

use crate::auth::AuthStore;

const CHECK_FAVORITE: &str =
    "query checkFavorite($songs: [Int!]!) { checkFavorite(songs: $songs) }";
const FAVORITE_SONG: &str = "mutation favoriteSong($id: Int!) { favoriteSong(id: $id) { id } }";

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("Login required")]
    Unauthenticated,
    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("server returned {0}")]
    Status(reqwest::StatusCode),
    #[error("{0}")]
    GraphQl(String),
    #[error("response had no data")]
    Empty,
}

#[derive(Debug, Deserialize)]
struct GraphQlResponse<T> {
    data: Option<T>,
    #[serde(default)]
    errors: Vec<GraphQlError>,
}

#[derive(Debug, Deserialize)]
struct GraphQlError {
    message: String,
}

impl<T> GraphQlResponse<T> {
    fn into_data(self) -> Result<T, ApiError> {
        if let Some(first) = self.errors.into_iter().next() {
            return Err(ApiError::GraphQl(first.message));
        }
        self.data.ok_or(ApiError::Empty)
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CheckFavorite {
    #[serde(default)]
    check_favorite: Vec<i64>,
}

pub fn user_agent() -> String {
    format!(
        "moe-radio/{} ({})",
        env!("CARGO_PKG_VERSION"),
        std::env::consts::OS
    )
}

pub struct ApiClient {
    http: reqwest::Client,
    url: String,
    auth: Arc<AuthStore>,
}

impl ApiClient {
    pub fn new(url: String, auth: Arc<AuthStore>) -> anyhow::Result<Self> {
        let http = reqwest::Client::builder()
            .user_agent(user_agent())
            .timeout(Duration::from_secs(30))
            .build()?;
        Ok(Self { http, url, auth })
    }

    /// Which of `song_ids` the logged-in user has favorited.
    pub async fn check_favorite(&self, song_ids: &[i64]) -> Result<Vec<i64>, ApiError> {
        let data: CheckFavorite = self
            .query(CHECK_FAVORITE, json!({ "songs": song_ids }))
            .await?;
        Ok(data.check_favorite)
    }

    /// Flip the favorite flag of `song_id` on the server.
    pub async fn favorite_song(&self, song_id: i64) -> Result<(), ApiError> {
        let _: Value = self.query(FAVORITE_SONG, json!({ "id": song_id })).await?;
        Ok(())
    }

    async fn query<T: DeserializeOwned>(&self, query: &str, variables: Value) -> Result<T, ApiError> {
        let bearer = self.auth.bearer().ok_or(ApiError::Unauthenticated)?;
        debug!("API: {}", query.split('(').next().unwrap_or(query));

        let resp = self
            .http
            .post(&self.url)
            .header(reqwest::header::AUTHORIZATION, bearer)
            .json(&json!({ "query": query, "variables": variables }))
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            return Err(ApiError::Status(status));
        }
        resp.json::<GraphQlResponse<T>>().await?.into_data()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_check_favorite_response() {
        let raw = r#"{"data":{"checkFavorite":[42,7]}}"#;
        let resp: GraphQlResponse<CheckFavorite> = serde_json::from_str(raw).unwrap();
        assert_eq!(resp.into_data().unwrap().check_favorite, vec![42, 7]);
    }

    #[test]
    fn test_graphql_error_wins_over_data() {
        let raw = r#"{"data":null,"errors":[{"message":"Song not found"}]}"#;
        let resp: GraphQlResponse<Value> = serde_json::from_str(raw).unwrap();
        match resp.into_data() {
            Err(ApiError::GraphQl(msg)) => assert_eq!(msg, "Song not found"),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_missing_data_is_an_error() {
        let resp: GraphQlResponse<Value> = serde_json::from_str("{}").unwrap();
        assert!(matches!(resp.into_data(), Err(ApiError::Empty)));
    }

    #[tokio::test]
    async fn test_logged_out_never_hits_network() {
        let path = std::env::temp_dir()
            .join(format!("moe-daemon-api-{}", std::process::id()))
            .join("auth.json");
        let auth = Arc::new(AuthStore::load(path));
        let client = ApiClient::new("http://127.0.0.1:9/graphql".into(), auth).unwrap();
        assert!(matches!(
            client.favorite_song(1).await,
            Err(ApiError::Unauthenticated)
        ));
    }

    #[test]
    fn test_user_agent_names_app() {
        assert!(user_agent().starts_with("moe-radio/"));
    }
}
