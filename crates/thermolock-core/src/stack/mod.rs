pub mod sum;

pub use sum::FrameAccumulator;
