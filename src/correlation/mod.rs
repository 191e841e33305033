//! The polling loop that pairs EEG intervals with the songs they were
//! recorded during.

mod controller;
mod loop_worker;
mod state;

pub use controller::CorrelationController;
pub use loop_worker::{CorrelationLoop, LoopConfig, LoopMode, TickOutcome};
pub use state::{CorrelationState, DropReason, IntervalHealth};
