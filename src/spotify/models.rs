//! Wire payloads of the Spotify Web API, trimmed to the fields we read.

use serde::Deserialize;

use crate::db::{Listener, TrackRecord};

#[derive(Debug, Deserialize)]
pub(crate) struct PlaybackState {
    #[serde(default)]
    pub item: Option<PlaybackItem>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct PlaybackItem {
    /// Null for local files.
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub artists: Vec<ApiArtist>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct ApiArtist {
    pub name: String,
}

#[derive(Debug, Deserialize)]
pub(crate) struct UserProfile {
    pub id: String,
    #[serde(default)]
    pub display_name: Option<String>,
}

impl From<UserProfile> for Listener {
    fn from(profile: UserProfile) -> Self {
        Self {
            id: profile.id,
            display_name: profile.display_name,
        }
    }
}

#[derive(Debug, Deserialize)]
pub(crate) struct TokenResponse {
    pub access_token: String,
    pub expires_in: u64,
    #[serde(default)]
    pub refresh_token: Option<String>,
}

/// Parses a `/v1/me/player` body. An empty body, a missing item or an item
/// without an id all mean nothing we can track is playing.
pub(crate) fn parse_playback(body: &str) -> Result<Option<TrackRecord>, serde_json::Error> {
    if body.trim().is_empty() {
        return Ok(None);
    }
    let state: PlaybackState = serde_json::from_str(body)?;
    Ok(state.item.and_then(|item| {
        let id = item.id?;
        Some(TrackRecord {
            id,
            name: item.name,
            artists: item.artists.into_iter().map(|a| a.name).collect(),
            features: None,
        })
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::AudioFeatures;

    #[test]
    fn test_parse_playback_with_track() {
        let body = r#"{
            "is_playing": true,
            "progress_ms": 1200,
            "item": {
                "id": "4uLU6hMCjMI75M1A2tKUQC",
                "name": "Never Gonna Give You Up",
                "uri": "spotify:track:4uLU6hMCjMI75M1A2tKUQC",
                "artists": [{"id": "0gxyHStUsqpMadRV0Di1Qt", "name": "Rick Astley"}]
            }
        }"#;

        let track = parse_playback(body).unwrap().unwrap();
        assert_eq!(track.id, "4uLU6hMCjMI75M1A2tKUQC");
        assert_eq!(track.name, "Never Gonna Give You Up");
        assert_eq!(track.artists, vec!["Rick Astley"]);
        assert!(track.features.is_none());
    }

    #[test]
    fn test_parse_playback_without_track() {
        assert!(parse_playback("").unwrap().is_none());
        assert!(parse_playback(r#"{"is_playing": false, "item": null}"#)
            .unwrap()
            .is_none());
        assert!(parse_playback(r#"{"item": {"id": null, "name": "local.mp3", "artists": []}}"#)
            .unwrap()
            .is_none());
        assert!(parse_playback("{not json").is_err());
    }

    #[test]
    fn test_audio_features_payload() {
        let body = r#"{
            "acousticness": 0.00242, "danceability": 0.585, "duration_ms": 237040,
            "energy": 0.842, "id": "2takcwOaAZWiXQijPHIx7B", "instrumentalness": 0.00686,
            "key": 9, "liveness": 0.0866, "loudness": -5.883, "mode": 0,
            "speechiness": 0.0556, "tempo": 118.211, "time_signature": 4,
            "track_href": "https://api.spotify.com/v1/tracks/2takcwOaAZWiXQijPHIx7B",
            "type": "audio_features", "uri": "spotify:track:2takcwOaAZWiXQijPHIx7B",
            "valence": 0.428
        }"#;

        let features: AudioFeatures = serde_json::from_str(body).unwrap();
        assert_eq!(features.duration_ms, Some(237040));
        assert_eq!(features.key, Some(9));
        assert_eq!(features.mode, Some(0));
        assert_eq!(features.tempo, Some(118.211));
        assert_eq!(features.uri.as_deref(), Some("spotify:track:2takcwOaAZWiXQijPHIx7B"));
    }
}
