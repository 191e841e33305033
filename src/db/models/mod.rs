pub mod eeg_summary;
pub mod track;

pub use eeg_summary::{CalendarFields, StoredEegSummary};
pub use track::{AudioFeatures, Listener, TrackRecord};
