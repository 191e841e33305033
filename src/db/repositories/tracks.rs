use anyhow::{Context, Result};
use rusqlite::{params, Connection, OptionalExtension};

use crate::db::{
    models::{AudioFeatures, Listener, TrackRecord},
    Database,
};

pub struct TrackRepository<'a> {
    conn: &'a Connection,
}

impl<'a> TrackRepository<'a> {
    pub fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    /// Insert or refresh a track row, then add any artist not yet linked to
    /// it. Running it twice with the same record changes nothing, and a later
    /// record without features never erases stored ones.
    pub fn upsert(&self, track: &TrackRecord, listener: Option<&Listener>) -> Result<()> {
        let features = track.features.clone().unwrap_or_default();
        self.conn.execute(
            "INSERT INTO song_metrics (
                id, track_name, acousticness, danceability, duration_ms, energy,
                instrumentalness, key, liveness, loudness, mode, speechiness, tempo,
                time_signature, valence, uri, user_id, user_name
             ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17, ?18)
             ON CONFLICT(id) DO UPDATE SET
                 track_name = excluded.track_name,
                 acousticness = COALESCE(excluded.acousticness, song_metrics.acousticness),
                 danceability = COALESCE(excluded.danceability, song_metrics.danceability),
                 duration_ms = COALESCE(excluded.duration_ms, song_metrics.duration_ms),
                 energy = COALESCE(excluded.energy, song_metrics.energy),
                 instrumentalness = COALESCE(excluded.instrumentalness, song_metrics.instrumentalness),
                 key = COALESCE(excluded.key, song_metrics.key),
                 liveness = COALESCE(excluded.liveness, song_metrics.liveness),
                 loudness = COALESCE(excluded.loudness, song_metrics.loudness),
                 mode = COALESCE(excluded.mode, song_metrics.mode),
                 speechiness = COALESCE(excluded.speechiness, song_metrics.speechiness),
                 tempo = COALESCE(excluded.tempo, song_metrics.tempo),
                 time_signature = COALESCE(excluded.time_signature, song_metrics.time_signature),
                 valence = COALESCE(excluded.valence, song_metrics.valence),
                 uri = COALESCE(excluded.uri, song_metrics.uri),
                 user_id = COALESCE(excluded.user_id, song_metrics.user_id),
                 user_name = COALESCE(excluded.user_name, song_metrics.user_name)",
            params![
                track.id,
                track.name,
                features.acousticness,
                features.danceability,
                features.duration_ms,
                features.energy,
                features.instrumentalness,
                features.key,
                features.liveness,
                features.loudness,
                features.mode,
                features.speechiness,
                features.tempo,
                features.time_signature,
                features.valence,
                features.uri,
                listener.map(|l| l.id.as_str()),
                listener.and_then(|l| l.display_name.as_deref()),
            ],
        )?;

        for artist in &track.artists {
            let linked = self
                .conn
                .query_row(
                    "SELECT 1 FROM artists WHERE song_id = ?1 AND artist_name = ?2",
                    params![track.id, artist],
                    |_| Ok(()),
                )
                .optional()?
                .is_some();
            if !linked {
                self.conn.execute(
                    "INSERT INTO artists (song_id, artist_name) VALUES (?1, ?2)",
                    params![track.id, artist],
                )?;
            }
        }

        Ok(())
    }

    pub fn exists(&self, track_id: &str) -> Result<bool> {
        Ok(self
            .conn
            .query_row(
                "SELECT 1 FROM song_metrics WHERE id = ?1",
                params![track_id],
                |_| Ok(()),
            )
            .optional()?
            .is_some())
    }

    pub fn artists(&self, track_id: &str) -> Result<Vec<String>> {
        let mut stmt = self
            .conn
            .prepare("SELECT artist_name FROM artists WHERE song_id = ?1 ORDER BY id")?;
        let artists = stmt
            .query_map(params![track_id], |row| row.get(0))?
            .collect::<Result<Vec<String>, _>>()?;
        Ok(artists)
    }

    pub fn get(&self, track_id: &str) -> Result<Option<TrackRecord>> {
        let row = self
            .conn
            .query_row(
                "SELECT id, track_name, acousticness, danceability, duration_ms, energy,
                        instrumentalness, key, liveness, loudness, mode, speechiness, tempo,
                        time_signature, valence, uri
                 FROM song_metrics WHERE id = ?1",
                params![track_id],
                |row| {
                    let features = AudioFeatures {
                        acousticness: row.get(2)?,
                        danceability: row.get(3)?,
                        duration_ms: row.get(4)?,
                        energy: row.get(5)?,
                        instrumentalness: row.get(6)?,
                        key: row.get(7)?,
                        liveness: row.get(8)?,
                        loudness: row.get(9)?,
                        mode: row.get(10)?,
                        speechiness: row.get(11)?,
                        tempo: row.get(12)?,
                        time_signature: row.get(13)?,
                        valence: row.get(14)?,
                        uri: row.get(15)?,
                    };
                    Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?, features))
                },
            )
            .optional()?;

        let Some((id, name, features)) = row else {
            return Ok(None);
        };
        let features = (features != AudioFeatures::default()).then_some(features);
        let artists = self
            .artists(&id)
            .with_context(|| format!("failed to load artists for track {id}"))?;

        Ok(Some(TrackRecord {
            id,
            name,
            artists,
            features,
        }))
    }
}

impl Database {
    pub async fn upsert_track(&self, track: &TrackRecord, listener: Option<&Listener>) -> Result<()> {
        let track = track.clone();
        let listener = listener.cloned();
        self.execute(move |conn| {
            let tx = conn.transaction()?;
            TrackRepository::new(&tx)
                .upsert(&track, listener.as_ref())
                .with_context(|| format!("failed to upsert track {}", track.id))?;
            tx.commit()?;
            Ok(())
        })
        .await
    }

    pub async fn track_exists(&self, track_id: &str) -> Result<bool> {
        let track_id = track_id.to_string();
        self.execute(move |conn| TrackRepository::new(conn).exists(&track_id))
            .await
    }

    pub async fn get_track(&self, track_id: &str) -> Result<Option<TrackRecord>> {
        let track_id = track_id.to_string();
        self.execute(move |conn| TrackRepository::new(conn).get(&track_id))
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::migrations::run_migrations;

    fn conn() -> Connection {
        let mut conn = Connection::open_in_memory().unwrap();
        conn.pragma_update(None, "foreign_keys", "ON").unwrap();
        run_migrations(&mut conn).unwrap();
        conn
    }

    fn track() -> TrackRecord {
        TrackRecord {
            id: "track-1".to_string(),
            name: "Windowlicker".to_string(),
            artists: vec!["Aphex Twin".to_string(), "Guest".to_string()],
            features: Some(AudioFeatures {
                energy: Some(0.8),
                tempo: Some(127.0),
                key: Some(5),
                uri: Some("spotify:track:track-1".to_string()),
                ..AudioFeatures::default()
            }),
        }
    }

    fn count(conn: &Connection, table: &str) -> i64 {
        conn.query_row(&format!("SELECT COUNT(*) FROM {table}"), [], |row| row.get(0))
            .unwrap()
    }

    #[test]
    fn test_upsert_is_idempotent() {
        let conn = conn();
        let repo = TrackRepository::new(&conn);
        let listener = Listener {
            id: "user".to_string(),
            display_name: Some("User".to_string()),
        };

        repo.upsert(&track(), Some(&listener)).unwrap();
        repo.upsert(&track(), Some(&listener)).unwrap();

        assert_eq!(count(&conn, "song_metrics"), 1);
        assert_eq!(count(&conn, "artists"), 2);
        assert_eq!(repo.artists("track-1").unwrap(), vec!["Aphex Twin", "Guest"]);
    }

    #[test]
    fn test_upsert_adds_new_artists_only() {
        let conn = conn();
        let repo = TrackRepository::new(&conn);
        repo.upsert(&track(), None).unwrap();

        let mut updated = track();
        updated.name = "Windowlicker (Remaster)".to_string();
        updated.artists.push("Third".to_string());
        repo.upsert(&updated, None).unwrap();

        let stored = repo.get("track-1").unwrap().unwrap();
        assert_eq!(stored.name, "Windowlicker (Remaster)");
        assert_eq!(stored.artists, vec!["Aphex Twin", "Guest", "Third"]);
        assert_eq!(stored.features, track().features);
    }

    #[test]
    fn test_track_without_features_round_trips() {
        let conn = conn();
        let repo = TrackRepository::new(&conn);
        let mut bare = track();
        bare.features = None;
        repo.upsert(&bare, None).unwrap();

        assert!(repo.exists("track-1").unwrap());
        assert!(!repo.exists("missing").unwrap());
        assert_eq!(repo.get("track-1").unwrap().unwrap().features, None);
        assert!(repo.get("missing").unwrap().is_none());
    }

    #[test]
    fn test_upsert_without_features_keeps_stored_ones() {
        let conn = conn();
        let repo = TrackRepository::new(&conn);
        repo.upsert(&track(), None).unwrap();

        let mut bare = track();
        bare.features = None;
        repo.upsert(&bare, None).unwrap();

        let stored = repo.get("track-1").unwrap().unwrap();
        assert_eq!(stored.features, track().features);
    }
}
