use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum IntervalOutcome {
    Stored { summary_id: String },
    Dropped { reason: String },
    /// The interval ended before any EEG sample was gathered.
    Empty,
}

/// One finished track interval.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IntervalMetrics {
    pub finished_at: DateTime<Utc>,
    pub track_id: Option<String>,
    pub tick_count: usize,
    pub outcome: IntervalOutcome,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatsSnapshot {
    pub tick_count: u64,
    pub skipped_samples: u64,
    pub api_failures: u64,
    pub rate_limits: u64,
    pub track_changes: u64,
    pub summaries_stored: u64,
    pub dropped_offline: u64,
    pub dropped_no_track: u64,
    pub dropped_charging: u64,
    pub recent_intervals: Vec<IntervalMetrics>,
}

impl StatsSnapshot {
    pub fn summaries_dropped(&self) -> u64 {
        self.dropped_offline + self.dropped_no_track + self.dropped_charging
    }
}
