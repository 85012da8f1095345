use std::time::Duration;

use reqwest::{Method, RequestBuilder};
use thiserror::Error;
use tracing::debug;

use super::model::{self, NowPlaying, SongInfo};
use crate::config::StationConfig;

pub const REQUEST_OK: &str = "Song requested successfully!";
pub const REQUEST_NOT_AVAILABLE: &str = "Song not available for requests";
pub const REQUEST_RATE_LIMITED: &str = "Too many requests. Please wait before requesting another song.";
pub const REQUEST_FAILED: &str = "Failed to request song";

#[derive(Debug, Error)]
pub enum StationError {
    #[error("station request failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("station returned HTTP {status}")]
    Status { status: u16 },
    #[error("malformed station payload: {0}")]
    Decode(#[from] serde_json::Error),
    #[error("invalid station url: {0}")]
    BadUrl(String),
}

impl StationError {
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Status { status } => Some(*status),
            Self::Transport(e) => e.status().map(|s| s.as_u16()),
            _ => None,
        }
    }

    /// User-facing text for a failed song request.
    pub fn request_message(&self) -> &'static str {
        match self.status() {
            Some(404) => REQUEST_NOT_AVAILABLE,
            Some(429) => REQUEST_RATE_LIMITED,
            _ => REQUEST_FAILED,
        }
    }
}

/// One unit of network work for the synchronizer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Fetch {
    NowPlaying,
    History { limit: usize },
    Queue,
    Requestable { search: Option<String> },
    SubmitRequest { request_id: String },
}

/// Outcome of a [`Fetch`], fed back into `StationSync::apply`.
#[derive(Debug)]
pub enum Reply {
    NowPlaying(Result<NowPlaying, StationError>),
    History(Result<Vec<SongInfo>, StationError>),
    Queue(Result<Vec<SongInfo>, StationError>),
    Requestable(Result<Vec<SongInfo>, StationError>),
    RequestSubmitted(Result<(), StationError>),
}

/// Thin client over the station's REST API.
///
/// Cheap to clone; clones share one connection pool.
#[derive(Clone)]
pub struct StationClient {
    http: reqwest::Client,
    base_url: String,
    station_id: String,
    api_key: Option<String>,
}

impl StationClient {
    pub fn new(config: &StationConfig, api_key: Option<String>) -> Result<Self, StationError> {
        let base_url = config.base_url.trim_end_matches('/').to_string();
        if !(base_url.starts_with("http://") || base_url.starts_with("https://")) {
            return Err(StationError::BadUrl(config.base_url.clone()));
        }

        let http = reqwest::Client::builder()
            .user_agent(config.user_agent.clone())
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()?;

        Ok(Self {
            http,
            base_url,
            station_id: config.station_id.clone(),
            api_key: api_key.filter(|k| !k.is_empty()),
        })
    }

    pub fn has_api_key(&self) -> bool {
        self.api_key.is_some()
    }

    /// Runs one fetch to completion.
    pub async fn perform(&self, fetch: Fetch) -> Reply {
        match fetch {
            Fetch::NowPlaying => Reply::NowPlaying(self.now_playing().await),
            Fetch::History { limit } => Reply::History(self.history(limit).await),
            Fetch::Queue => Reply::Queue(self.queue().await),
            Fetch::Requestable { search } => {
                Reply::Requestable(self.requestable(search.as_deref()).await)
            }
            Fetch::SubmitRequest { request_id } => {
                Reply::RequestSubmitted(self.submit_request(&request_id).await)
            }
        }
    }

    /// Public endpoint, sent without credentials.
    pub async fn now_playing(&self) -> Result<NowPlaying, StationError> {
        let url = format!("{}/api/nowplaying/{}", self.base_url, self.station_id);
        let body = send(self.http.get(url)).await?;
        Ok(model::parse_now_playing(&body)?)
    }

    pub async fn history(&self, limit: usize) -> Result<Vec<SongInfo>, StationError> {
        let req = self
            .station_request(Method::GET, "history")
            .query(&[("limit", limit)]);
        let body = send(req).await?;
        Ok(model::parse_song_list(&body)?)
    }

    pub async fn queue(&self) -> Result<Vec<SongInfo>, StationError> {
        let body = send(self.station_request(Method::GET, "queue")).await?;
        Ok(model::parse_song_list(&body)?)
    }

    /// Songs listeners may request, optionally filtered by a search term.
    pub async fn requestable(&self, search: Option<&str>) -> Result<Vec<SongInfo>, StationError> {
        let mut req = self.station_request(Method::GET, "requests");
        if let Some(term) = search.filter(|t| !t.is_empty()) {
            req = req.query(&[("search", term)]);
        }
        let body = send(req).await?;
        Ok(model::parse_requestable(&body)?)
    }

    pub async fn submit_request(&self, request_id: &str) -> Result<(), StationError> {
        let path = format!("request/{}", request_id);
        send(self.station_request(Method::POST, &path)).await?;
        Ok(())
    }

    fn station_request(&self, method: Method, path: &str) -> RequestBuilder {
        let url = format!("{}/api/station/{}/{}", self.base_url, self.station_id, path);
        let req = self.http.request(method, url);
        match &self.api_key {
            Some(key) => req.bearer_auth(key),
            None => req,
        }
    }
}

async fn send(req: RequestBuilder) -> Result<Vec<u8>, StationError> {
    let resp = req.send().await?;
    let status = resp.status();
    debug!("station {} -> {}", resp.url().path(), status);
    if !status.is_success() {
        return Err(StationError::Status {
            status: status.as_u16(),
        });
    }
    Ok(resp.bytes().await?.to_vec())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_messages() {
        assert_eq!(
            StationError::Status { status: 404 }.request_message(),
            REQUEST_NOT_AVAILABLE
        );
        assert_eq!(
            StationError::Status { status: 429 }.request_message(),
            REQUEST_RATE_LIMITED
        );
        assert_eq!(
            StationError::Status { status: 500 }.request_message(),
            REQUEST_FAILED
        );
        assert_eq!(
            StationError::BadUrl("x".into()).request_message(),
            REQUEST_FAILED
        );
    }

    #[test]
    fn test_rejects_non_http_base_url() {
        let config = StationConfig {
            base_url: "radio.example".into(),
            ..Default::default()
        };
        assert!(matches!(
            StationClient::new(&config, None),
            Err(StationError::BadUrl(_))
        ));
    }

    #[test]
    fn test_blank_api_key_is_dropped() {
        let client = StationClient::new(&StationConfig::default(), Some(String::new())).unwrap();
        assert!(!client.has_api_key());
    }
}
