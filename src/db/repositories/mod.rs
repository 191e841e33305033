pub mod eeg_summaries;
pub mod tracks;
