use rayon::prelude::*;
use tracing::debug;

use crate::consts::{FULL_SCALE_U16, PARALLEL_PIXEL_THRESHOLD};
use crate::error::{LockInError, Result};
use crate::frame::Frame;

/// Captured dark reference: the raw samples as floats plus the mean of the
/// visible area.
#[derive(Clone, Debug)]
struct DarkReference {
    width: usize,
    height: usize,
    meta_rows: usize,
    samples: Vec<f32>,
    mean: f32,
}

impl DarkReference {
    fn visible_count(&self) -> usize {
        self.width * (self.height - self.meta_rows)
    }
}

/// Fixed-pattern-noise correction against a dark reference frame.
///
/// Each visible sample becomes `raw - reference + mean(reference)`, which
/// removes the per-pixel offset pattern while keeping the overall brightness of
/// the reference. Metadata rows pass through untouched.
#[derive(Clone, Debug, Default)]
pub struct DarkFieldCorrector {
    reference: Option<DarkReference>,
}

impl DarkFieldCorrector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_calibrated(&self) -> bool {
        self.reference.is_some()
    }

    /// Mean of the reference's visible area, if calibrated.
    pub fn reference_mean(&self) -> Option<f32> {
        self.reference.as_ref().map(|r| r.mean)
    }

    /// Replace the dark reference.
    pub fn set_reference(&mut self, frame: &Frame, meta_rows: usize) -> Result<()> {
        if frame.samples().len() != frame.width() * frame.height() {
            return Err(LockInError::ShapeMismatch {
                expected_width: frame.width(),
                expected_height: frame.height(),
                width: frame.width(),
                height: frame.height(),
                samples: frame.samples().len(),
            });
        }
        if meta_rows > frame.height() {
            return Err(LockInError::InvalidArgument(format!(
                "meta_rows {} exceeds frame height {}",
                meta_rows,
                frame.height()
            )));
        }

        let samples: Vec<f32> = frame.samples().iter().map(|&v| v as f32).collect();
        let visible_count = frame.width() * (frame.height() - meta_rows);
        let sum: f64 = samples[..visible_count].iter().map(|&v| v as f64).sum();
        let mean = if visible_count > 0 {
            (sum / visible_count as f64) as f32
        } else {
            0.0
        };

        debug!(
            width = frame.width(),
            height = frame.height(),
            meta_rows,
            mean,
            "Dark reference set"
        );

        self.reference = Some(DarkReference {
            width: frame.width(),
            height: frame.height(),
            meta_rows,
            samples,
            mean,
        });
        Ok(())
    }

    /// Correct `frame` against the reference. Uncalibrated correctors return
    /// the frame unchanged.
    pub fn apply(&self, frame: &Frame) -> Result<Frame> {
        let Some(reference) = &self.reference else {
            return Ok(frame.clone());
        };

        if frame.width() != reference.width
            || frame.height() != reference.height
            || frame.samples().len() != reference.samples.len()
        {
            return Err(LockInError::ShapeMismatch {
                expected_width: reference.width,
                expected_height: reference.height,
                width: frame.width(),
                height: frame.height(),
                samples: frame.samples().len(),
            });
        }

        let visible_count = reference.visible_count();
        let raw = &frame.samples()[..visible_count];
        let dark = &reference.samples[..visible_count];
        let mean = reference.mean;
        let correct = |(&v, &d): (&u16, &f32)| {
            let c = (v as f32 - d + mean).clamp(0.0, FULL_SCALE_U16 as f32);
            (c + 0.5) as u16
        };

        let mut corrected: Vec<u16> = if visible_count >= PARALLEL_PIXEL_THRESHOLD {
            raw.par_iter().zip(dark.par_iter()).map(correct).collect()
        } else {
            raw.iter().zip(dark).map(correct).collect()
        };
        corrected.extend_from_slice(&frame.samples()[visible_count..]);

        Ok(frame.with_samples(corrected))
    }
}
