use crate::consts::FULL_SCALE_U16;
use crate::error::{LockInError, Result};
use crate::frame::Frame;

/// Running per-pixel sum of frames over the visible area.
///
/// Metadata rows at the bottom of each frame are ignored. The sums are 64-bit
/// so that long acquisitions of 16-bit frames cannot overflow.
#[derive(Clone, Debug)]
pub struct FrameAccumulator {
    width: usize,
    height: usize,
    visible_height: usize,
    sum: Vec<u64>,
    count: usize,
}

impl FrameAccumulator {
    pub fn new(width: usize, height: usize, meta_rows: usize) -> Self {
        let visible_height = height.saturating_sub(meta_rows);
        Self {
            width,
            height,
            visible_height,
            sum: vec![0; width * visible_height],
            count: 0,
        }
    }

    pub fn count(&self) -> usize {
        self.count
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn visible_height(&self) -> usize {
        self.visible_height
    }

    /// Add the visible area of `frame` to the running sums.
    pub fn add(&mut self, frame: &Frame) -> Result<()> {
        if frame.width() != self.width
            || frame.height() != self.height
            || frame.samples().len() != self.width * self.height
        {
            return Err(LockInError::ShapeMismatch {
                expected_width: self.width,
                expected_height: self.height,
                width: frame.width(),
                height: frame.height(),
                samples: frame.samples().len(),
            });
        }

        let visible = &frame.samples()[..self.sum.len()];
        for (acc, &v) in self.sum.iter_mut().zip(visible) {
            *acc += v as u64;
        }
        self.count += 1;
        Ok(())
    }

    /// Build a `width x visible_height` frame from the accumulated sums.
    ///
    /// With `normalize == false` each sample is the integer mean `sum / count`.
    /// With `normalize == true` the sums are stretched so that the smallest maps
    /// to 0 and the largest to 65535, which is useful for display.
    pub fn build(&self, normalize: bool) -> Result<Frame> {
        if self.count == 0 {
            return Err(LockInError::EmptyAccumulation);
        }

        let samples: Vec<u16> = if normalize {
            let min = self.sum.iter().copied().min().unwrap_or(0);
            let max = self.sum.iter().copied().max().unwrap_or(0);
            let range = if max > min { (max - min) as u128 } else { 1 };
            self.sum
                .iter()
                .map(|&v| ((v - min) as u128 * FULL_SCALE_U16 as u128 / range) as u16)
                .collect()
        } else {
            let n = self.count as u64;
            self.sum.iter().map(|&v| (v / n) as u16).collect()
        };

        Frame::from_raw(self.width, self.visible_height, samples, 0)
    }
}
