use std::time::Instant;

use crate::error::{LockInError, Result};

/// A single 16-bit thermal camera frame.
///
/// Samples are row-major, `width * height` long. The last `meta_rows` rows
/// carry camera metadata and are excluded from the visible image area.
#[derive(Clone, Debug)]
pub struct Frame {
    width: usize,
    height: usize,
    samples: Vec<u16>,
    preview: Option<Vec<u8>>,
    meta_rows: usize,
    captured_at: Instant,
}

impl Frame {
    /// Build a frame from raw samples, rejecting a sample buffer whose length
    /// is not `width * height`.
    pub fn from_raw(width: usize, height: usize, samples: Vec<u16>, meta_rows: usize) -> Result<Self> {
        if samples.len() != width * height {
            return Err(LockInError::ShapeMismatch {
                expected_width: width,
                expected_height: height,
                width,
                height,
                samples: samples.len(),
            });
        }
        Ok(Self {
            width,
            height,
            samples,
            preview: None,
            meta_rows: meta_rows.min(height),
            captured_at: Instant::now(),
        })
    }

    /// Frame with every sample set to `value`.
    pub fn filled(width: usize, height: usize, value: u16, meta_rows: usize) -> Self {
        Self {
            width,
            height,
            samples: vec![value; width * height],
            preview: None,
            meta_rows: meta_rows.min(height),
            captured_at: Instant::now(),
        }
    }

    /// Attach a precomputed 8-bit preview.
    pub fn with_preview(mut self, preview: Vec<u8>) -> Self {
        self.preview = Some(preview);
        self
    }

    /// Same geometry, metadata-row count and capture time, new samples.
    pub(crate) fn with_samples(&self, samples: Vec<u16>) -> Self {
        debug_assert_eq!(samples.len(), self.samples.len());
        Self {
            width: self.width,
            height: self.height,
            samples,
            preview: None,
            meta_rows: self.meta_rows,
            captured_at: self.captured_at,
        }
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn height(&self) -> usize {
        self.height
    }

    pub fn meta_rows(&self) -> usize {
        self.meta_rows
    }

    pub fn visible_height(&self) -> usize {
        self.height - self.meta_rows
    }

    pub fn visible_pixel_count(&self) -> usize {
        self.width * self.visible_height()
    }

    pub fn samples(&self) -> &[u16] {
        &self.samples
    }

    pub fn visible_samples(&self) -> &[u16] {
        &self.samples[..self.visible_pixel_count()]
    }

    /// The trailing metadata rows, empty when the frame has none.
    pub fn meta_samples(&self) -> &[u16] {
        &self.samples[self.visible_pixel_count()..]
    }

    pub fn preview(&self) -> Option<&[u8]> {
        self.preview.as_deref()
    }

    pub fn captured_at(&self) -> Instant {
        self.captured_at
    }

    /// Min/max stretched 8-bit preview of the visible area.
    pub fn auto_contrast_preview(&self) -> Vec<u8> {
        let visible = self.visible_samples();
        let min = visible.iter().copied().min().unwrap_or(0) as u32;
        let max = visible.iter().copied().max().unwrap_or(0) as u32;
        let range = (max - min).max(1);
        visible
            .iter()
            .map(|&v| (((v as u32 - min) * 255) / range) as u8)
            .collect()
    }
}
