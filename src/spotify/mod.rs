//! Streaming-service side of the recorder: what is playing, its audio
//! features and who is listening.

mod auth;
mod client;
pub(crate) mod models;

use async_trait::async_trait;
use thiserror::Error;

use crate::db::{AudioFeatures, Listener, TrackRecord};

pub use auth::{SpotifyAuth, SpotifyCredentials};
pub use client::SpotifyClient;

#[derive(Error, Debug)]
pub enum SpotifyError {
    #[error("request to {endpoint} failed: {source}")]
    Http {
        endpoint: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("{endpoint} returned status {status}: {body}")]
    Status {
        endpoint: String,
        status: u16,
        body: String,
    },
    #[error("rate limited, retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },
    #[error("authorization failed: {0}")]
    Auth(String),
    #[error("could not decode response from {endpoint}: {source}")]
    Decode {
        endpoint: String,
        #[source]
        source: serde_json::Error,
    },
}

/// Anything that can tell the recorder what is playing right now.
#[async_trait]
pub trait TrackSource: Send + Sync {
    /// The track currently playing, with its audio features attached when
    /// the service has them. `None` when nothing trackable is playing.
    async fn current_track(&self) -> Result<Option<TrackRecord>, SpotifyError>;

    async fn audio_features(&self, track_id: &str) -> Result<Option<AudioFeatures>, SpotifyError>;

    async fn current_user(&self) -> Result<Option<Listener>, SpotifyError>;
}
