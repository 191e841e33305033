mod utils;

pub mod capture;
pub mod correlation;
pub mod db;
pub mod device;
pub mod eeg;
pub mod metrics;
pub mod settings;
pub mod spotify;

pub use capture::{run_capture, wait_for_signal_quality, CaptureReport};
pub use settings::CaptureSettings;
