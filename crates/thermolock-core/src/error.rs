use std::time::Duration;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum LockInError {
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error(
        "Frame shape mismatch: expected {expected_width}x{expected_height}, \
         got {width}x{height} ({samples} samples)"
    )]
    ShapeMismatch {
        expected_width: usize,
        expected_height: usize,
        width: usize,
        height: usize,
        samples: usize,
    },

    #[error("No frames accumulated")]
    EmptyAccumulation,

    #[error("No samples in lock-in accumulator")]
    NoSamples,

    #[error(
        "Too few samples: ON@{angle_on:.1}° bin {bin_on} (ON={count_on}), \
         OFF@{angle_off:.1}° bin {bin_off} (OFF={count_off})"
    )]
    InsufficientSamples {
        angle_on: f64,
        bin_on: usize,
        count_on: usize,
        angle_off: f64,
        bin_off: usize,
        count_off: usize,
    },

    #[error("Stimulus error: {0}")]
    Stimulus(String),

    #[error("Frame source error: {0}")]
    FrameSource(String),

    #[error("No frame received within {0:?}")]
    Timeout(Duration),

    #[error("Measurement cancelled")]
    Cancelled,

    #[error("Worker error: {0}")]
    Worker(String),
}

pub type Result<T> = std::result::Result<T, LockInError>;
