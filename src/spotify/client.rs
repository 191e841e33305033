//! HTTP client for the Spotify Web API.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{header, StatusCode};
use tokio::sync::Mutex;

use super::auth::{SpotifyAuth, TokenCache};
use super::models::{parse_playback, UserProfile};
use super::{SpotifyError, TrackSource};
use crate::db::{AudioFeatures, Listener, TrackRecord};

const SPOTIFY_API_BASE: &str = "https://api.spotify.com/v1";
const SPOTIFY_TOKEN_URL: &str = "https://accounts.spotify.com/api/token";

/// Fallback when a 429 carries no Retry-After header.
const DEFAULT_RETRY_AFTER_SECS: u64 = 1;

pub struct SpotifyClient {
    http: reqwest::Client,
    api_base: String,
    tokens: TokenCache,
    /// Audio features of the last track looked up; the poller asks for the
    /// same track several times a second.
    last_features: Mutex<Option<(String, Option<AudioFeatures>)>>,
}

impl SpotifyClient {
    pub fn new(auth: SpotifyAuth, timeout_secs: u64) -> Result<Self, SpotifyError> {
        Self::with_endpoints(auth, timeout_secs, SPOTIFY_API_BASE, SPOTIFY_TOKEN_URL)
    }

    fn with_endpoints(
        auth: SpotifyAuth,
        timeout_secs: u64,
        api_base: &str,
        token_url: &str,
    ) -> Result<Self, SpotifyError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .map_err(|source| SpotifyError::Http {
                endpoint: "client setup".to_string(),
                source,
            })?;

        Ok(Self {
            http,
            api_base: api_base.trim_end_matches('/').to_string(),
            tokens: TokenCache::new(auth, token_url.to_string()),
            last_features: Mutex::new(None),
        })
    }

    /// GETs `path` and returns the body, or `None` for 204/404.
    async fn get(&self, path: &str) -> Result<Option<String>, SpotifyError> {
        let endpoint = format!("{}{}", self.api_base, path);
        let token = self.tokens.access_token(&self.http).await?;

        let response = self
            .http
            .get(&endpoint)
            .bearer_auth(token)
            .send()
            .await
            .map_err(|source| SpotifyError::Http {
                endpoint: endpoint.clone(),
                source,
            })?;

        let status = response.status();
        match status {
            StatusCode::NO_CONTENT | StatusCode::NOT_FOUND => return Ok(None),
            StatusCode::UNAUTHORIZED => {
                self.tokens.invalidate().await;
            }
            StatusCode::TOO_MANY_REQUESTS => {
                let retry_after_secs = response
                    .headers()
                    .get(header::RETRY_AFTER)
                    .and_then(|v| v.to_str().ok())
                    .and_then(|v| v.parse().ok())
                    .unwrap_or(DEFAULT_RETRY_AFTER_SECS);
                return Err(SpotifyError::RateLimited { retry_after_secs });
            }
            _ => {}
        }

        let body = response.text().await.map_err(|source| SpotifyError::Http {
            endpoint: endpoint.clone(),
            source,
        })?;

        if !status.is_success() {
            return Err(SpotifyError::Status {
                endpoint,
                status: status.as_u16(),
                body,
            });
        }

        Ok(Some(body))
    }
}

#[async_trait]
impl TrackSource for SpotifyClient {
    async fn current_track(&self) -> Result<Option<TrackRecord>, SpotifyError> {
        let Some(body) = self.get("/me/player").await? else {
            return Ok(None);
        };
        let Some(mut track) = parse_playback(&body).map_err(|source| SpotifyError::Decode {
            endpoint: "/me/player".to_string(),
            source,
        })?
        else {
            return Ok(None);
        };

        // Features are optional metadata; only a rate limit fails the poll.
        track.features = match self.audio_features(&track.id).await {
            Ok(features) => features,
            Err(err @ SpotifyError::RateLimited { .. }) => return Err(err),
            Err(err) => {
                log::warn!("Storing track {} without audio features: {err}", track.id);
                None
            }
        };
        Ok(Some(track))
    }

    /// Looks up features once per track. A failed lookup (other than a rate
    /// limit) is remembered as a miss so it is not retried on every tick.
    async fn audio_features(&self, track_id: &str) -> Result<Option<AudioFeatures>, SpotifyError> {
        let mut last = self.last_features.lock().await;
        if let Some((id, features)) = last.as_ref() {
            if id == track_id {
                return Ok(features.clone());
            }
        }

        let path = format!("/audio-features/{track_id}");
        let fetched = match self.get(&path).await {
            Ok(Some(body)) => serde_json::from_str::<AudioFeatures>(&body)
                .map(Some)
                .map_err(|source| SpotifyError::Decode {
                    endpoint: path.clone(),
                    source,
                }),
            Ok(None) => {
                log::warn!("No audio features found for track {track_id}");
                Ok(None)
            }
            Err(err) => Err(err),
        };

        match fetched {
            Err(err @ SpotifyError::RateLimited { .. }) => Err(err),
            Err(err) => {
                *last = Some((track_id.to_string(), None));
                Err(err)
            }
            Ok(features) => {
                *last = Some((track_id.to_string(), features.clone()));
                Ok(features)
            }
        }
    }

    async fn current_user(&self) -> Result<Option<Listener>, SpotifyError> {
        let Some(body) = self.get("/me").await? else {
            return Ok(None);
        };
        let profile: UserProfile =
            serde_json::from_str(&body).map_err(|source| SpotifyError::Decode {
                endpoint: "/me".to_string(),
                source,
            })?;
        Ok(Some(profile.into()))
    }
}
