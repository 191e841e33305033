use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Local, Utc};
use rusqlite::{params, Connection, Row};
use uuid::Uuid;

use crate::db::{
    helpers::{decode_f64_blob, encode_f64_blob, parse_datetime, to_i64, to_u64},
    models::{CalendarFields, Listener, StoredEegSummary},
    Database,
};
use crate::eeg::EegSummary;

fn reshape(flat: Vec<f64>, bins: usize) -> Result<Vec<Vec<f64>>> {
    if bins == 0 {
        return if flat.is_empty() {
            Ok(Vec::new())
        } else {
            Err(anyhow!("psd has {} values but zero bins", flat.len()))
        };
    }
    if flat.len() % bins != 0 {
        return Err(anyhow!(
            "psd has {} values, not a multiple of {bins} bins",
            flat.len()
        ));
    }
    Ok(flat.chunks(bins).map(<[f64]>::to_vec).collect())
}

fn row_to_summary(row: &Row) -> Result<StoredEegSummary> {
    let timestamp: String = row.get("timestamp")?;
    let psd_bins: i64 = row.get("psd_bins")?;
    let tick_count: i64 = row.get("tick_count")?;
    let blob = |column: &str| -> Result<Vec<f64>> {
        let bytes: Vec<u8> = row.get(column)?;
        decode_f64_blob(&bytes, column)
    };

    let summary = EegSummary {
        psd: reshape(blob("psd")?, to_u64(psd_bins, "psd_bins")? as usize)?,
        alpha: blob("alpha")?,
        beta: blob("beta")?,
        delta: blob("delta")?,
        gamma: blob("gamma")?,
        theta: blob("theta")?,
        focus: row.get("focus_score")?,
        calm: row.get("calm_score")?,
        tick_count: to_u64(tick_count, "tick_count")? as usize,
    };

    Ok(StoredEegSummary {
        id: row.get("id")?,
        track_id: row.get("song_id")?,
        recorded_at: parse_datetime(&timestamp, "timestamp")?,
        summary,
        listener_id: row.get("user_id")?,
        listener_name: row.get("user_name")?,
        calendar: CalendarFields {
            year: row.get("year")?,
            month: row.get("month")?,
            day: row.get("day")?,
            weekday: row.get("weekday")?,
            hour: row.get("hour")?,
        },
    })
}

pub struct EegSummaryRepository<'a> {
    conn: &'a Connection,
}

impl<'a> EegSummaryRepository<'a> {
    pub fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    /// Stores one finalized summary and returns its row id. Calendar fields
    /// come from `recorded_at` in its own timezone.
    pub fn insert(
        &self,
        track_id: &str,
        summary: &EegSummary,
        listener: Option<&Listener>,
        recorded_at: DateTime<Local>,
    ) -> Result<String> {
        let id = Uuid::new_v4().to_string();
        let calendar = CalendarFields::from_datetime(&recorded_at);

        self.conn.execute(
            "INSERT INTO eeg_metrics (
                id, song_id, timestamp, psd, psd_bins, alpha, beta, delta, gamma, theta,
                focus_score, calm_score, tick_count, user_id, user_name,
                year, month, day, weekday, hour
             ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17, ?18, ?19, ?20)",
            params![
                id,
                track_id,
                recorded_at.with_timezone(&Utc).to_rfc3339(),
                encode_f64_blob(&summary.psd_flat()),
                to_i64(summary.psd_bins() as u64)?,
                encode_f64_blob(&summary.alpha),
                encode_f64_blob(&summary.beta),
                encode_f64_blob(&summary.delta),
                encode_f64_blob(&summary.gamma),
                encode_f64_blob(&summary.theta),
                summary.focus,
                summary.calm,
                to_i64(summary.tick_count as u64)?,
                listener.map(|l| l.id.as_str()),
                listener.and_then(|l| l.display_name.as_deref()),
                calendar.year,
                calendar.month,
                calendar.day,
                calendar.weekday,
                calendar.hour,
            ],
        )?;

        Ok(id)
    }

    pub fn for_track(&self, track_id: &str) -> Result<Vec<StoredEegSummary>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, song_id, timestamp, psd, psd_bins, alpha, beta, delta, gamma, theta,
                    focus_score, calm_score, tick_count, user_id, user_name,
                    year, month, day, weekday, hour
             FROM eeg_metrics
             WHERE song_id = ?1
             ORDER BY timestamp ASC",
        )?;

        let mut rows = stmt.query(params![track_id])?;
        let mut summaries = Vec::new();
        while let Some(row) = rows.next()? {
            summaries.push(row_to_summary(row)?);
        }
        Ok(summaries)
    }
}

impl Database {
    pub async fn insert_eeg_summary(
        &self,
        track_id: &str,
        summary: &EegSummary,
        listener: Option<&Listener>,
    ) -> Result<String> {
        let track_id = track_id.to_string();
        let summary = summary.clone();
        let listener = listener.cloned();
        let recorded_at = Local::now();
        self.execute(move |conn| {
            EegSummaryRepository::new(conn)
                .insert(&track_id, &summary, listener.as_ref(), recorded_at)
                .with_context(|| format!("failed to insert EEG summary for track {track_id}"))
        })
        .await
    }

    pub async fn get_eeg_summaries_for_track(&self, track_id: &str) -> Result<Vec<StoredEegSummary>> {
        let track_id = track_id.to_string();
        self.execute(move |conn| EegSummaryRepository::new(conn).for_track(&track_id))
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::migrations::run_migrations;
    use crate::db::models::TrackRecord;
    use crate::db::repositories::tracks::TrackRepository;
    use chrono::TimeZone;

    fn conn() -> Connection {
        let mut conn = Connection::open_in_memory().unwrap();
        conn.pragma_update(None, "foreign_keys", "ON").unwrap();
        run_migrations(&mut conn).unwrap();
        conn
    }

    fn summary() -> EegSummary {
        EegSummary {
            psd: vec![vec![0.1, 0.2, 0.3], vec![1.0 / 3.0, 2.0, -4.5]],
            alpha: vec![1.0; 8],
            beta: vec![2.0; 8],
            delta: vec![3.0; 8],
            gamma: vec![4.0; 8],
            theta: vec![5.0; 8],
            focus: 0.42,
            calm: 0.17,
            tick_count: 12,
        }
    }

    fn seed_track(conn: &Connection, id: &str) {
        TrackRepository::new(conn)
            .upsert(
                &TrackRecord {
                    id: id.to_string(),
                    name: "Song".to_string(),
                    artists: vec!["Artist".to_string()],
                    features: None,
                },
                None,
            )
            .unwrap();
    }

    #[test]
    fn test_insert_and_read_back() {
        let conn = conn();
        seed_track(&conn, "track-1");
        let repo = EegSummaryRepository::new(&conn);
        let listener = Listener {
            id: "user".to_string(),
            display_name: None,
        };
        let at = Local.with_ymd_and_hms(2024, 5, 17, 14, 5, 0).unwrap();

        let id = repo.insert("track-1", &summary(), Some(&listener), at).unwrap();

        let stored = repo.for_track("track-1").unwrap();
        assert_eq!(stored.len(), 1);
        let row = &stored[0];
        assert_eq!(row.id, id);
        assert_eq!(row.track_id, "track-1");
        assert_eq!(row.summary, summary());
        assert_eq!(row.listener_id.as_deref(), Some("user"));
        assert_eq!(row.listener_name, None);
        assert_eq!(row.recorded_at, at.with_timezone(&Utc));
        assert_eq!(row.calendar, CalendarFields::from_datetime(&at));
        assert_eq!(row.calendar.weekday, 4);
        assert_eq!(row.calendar.hour, 14);

        assert!(repo.for_track("other").unwrap().is_empty());
    }

    #[test]
    fn test_summary_requires_known_track() {
        let conn = conn();
        let repo = EegSummaryRepository::new(&conn);
        assert!(repo.insert("nope", &summary(), None, Local::now()).is_err());
    }

    #[test]
    fn test_reshape() {
        assert_eq!(
            reshape(vec![1.0, 2.0, 3.0, 4.0], 2).unwrap(),
            vec![vec![1.0, 2.0], vec![3.0, 4.0]]
        );
        assert!(reshape(vec![1.0, 2.0, 3.0], 2).is_err());
        assert!(reshape(Vec::new(), 0).unwrap().is_empty());
    }
}
