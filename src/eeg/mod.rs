pub mod accumulator;
pub mod summary;

pub use accumulator::{AccumulatorError, SongEegAccumulator, DEFAULT_PSD_BINS};
pub use summary::{Band, EegSummary};
