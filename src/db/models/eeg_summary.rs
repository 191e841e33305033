use chrono::{DateTime, Datelike, TimeZone, Timelike, Utc};
use serde::{Deserialize, Serialize};

use crate::eeg::EegSummary;

/// Calendar breakdown stored next to each summary for easy grouping.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CalendarFields {
    pub year: i32,
    pub month: u32,
    pub day: u32,
    /// 0 = Monday, 6 = Sunday.
    pub weekday: u32,
    pub hour: u32,
}

impl CalendarFields {
    pub fn from_datetime<Tz: TimeZone>(at: &DateTime<Tz>) -> Self {
        Self {
            year: at.year(),
            month: at.month(),
            day: at.day(),
            weekday: at.weekday().num_days_from_monday(),
            hour: at.hour(),
        }
    }
}

/// A summary row read back from `eeg_metrics`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredEegSummary {
    pub id: String,
    pub track_id: String,
    pub recorded_at: DateTime<Utc>,
    pub summary: EegSummary,
    pub listener_id: Option<String>,
    pub listener_name: Option<String>,
    pub calendar: CalendarFields,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::FixedOffset;

    #[test]
    fn test_calendar_fields_use_the_given_timezone() {
        // Sunday 2024-03-10 23:30 at UTC-05:00 is Monday 04:30 UTC.
        let offset = FixedOffset::west_opt(5 * 3600).unwrap();
        let local = offset.with_ymd_and_hms(2024, 3, 10, 23, 30, 0).unwrap();

        let fields = CalendarFields::from_datetime(&local);
        assert_eq!(
            fields,
            CalendarFields {
                year: 2024,
                month: 3,
                day: 10,
                weekday: 6,
                hour: 23,
            }
        );

        let utc = CalendarFields::from_datetime(&local.with_timezone(&Utc));
        assert_eq!(utc.weekday, 0);
        assert_eq!(utc.hour, 4);
    }
}
