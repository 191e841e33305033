//! Track metadata as fetched from the streaming service.

use serde::{Deserialize, Serialize};

/// Audio attributes the streaming service computes per track. Every field
/// is optional because the service omits them for some tracks.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AudioFeatures {
    #[serde(default)]
    pub acousticness: Option<f64>,
    #[serde(default)]
    pub danceability: Option<f64>,
    #[serde(default)]
    pub duration_ms: Option<i64>,
    #[serde(default)]
    pub energy: Option<f64>,
    #[serde(default)]
    pub instrumentalness: Option<f64>,
    #[serde(default)]
    pub key: Option<i64>,
    #[serde(default)]
    pub liveness: Option<f64>,
    #[serde(default)]
    pub loudness: Option<f64>,
    #[serde(default)]
    pub mode: Option<i64>,
    #[serde(default)]
    pub speechiness: Option<f64>,
    #[serde(default)]
    pub tempo: Option<f64>,
    #[serde(default)]
    pub time_signature: Option<i64>,
    #[serde(default)]
    pub valence: Option<f64>,
    #[serde(default)]
    pub uri: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrackRecord {
    pub id: String,
    pub name: String,
    pub artists: Vec<String>,
    pub features: Option<AudioFeatures>,
}

impl TrackRecord {
    pub fn artist_line(&self) -> String {
        self.artists.join(", ")
    }
}

/// The account whose playback is being monitored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Listener {
    pub id: String,
    pub display_name: Option<String>,
}
