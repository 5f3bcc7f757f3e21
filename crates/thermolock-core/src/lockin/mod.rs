pub mod accumulator;
pub mod config;
mod integration;
pub mod render;
pub mod runner;
mod types;

pub use accumulator::LockInAccumulator;
pub use config::LockInConfig;
pub use render::{AngleFrame, DisplayRange};
pub use runner::LockInMeasurementRunner;
pub use types::{FramePreprocess, LockInProgress, LockInResult, ProgressReporter, RunOptions};
