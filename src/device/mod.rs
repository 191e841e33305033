pub mod cache;
pub mod quality;
pub mod simulator;
pub mod source;
pub mod types;

pub use cache::{DeviceFeed, DeviceReadingCache, EegSnapshot, ReadingError, EXPORT_VECTOR_LEN};
pub use quality::{QualityFeed, QualityGate};
pub use simulator::{SimulatedDevice, SimulatorConfig};
pub use source::{DeviceSource, Subscription};
pub use types::{
    ChannelQuality, ContactQuality, DeviceReading, DeviceState, DeviceStatus, Matrix,
    QualityBatch, ReadingChannel,
};
