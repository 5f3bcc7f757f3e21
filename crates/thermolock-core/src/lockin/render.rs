use std::f64::consts::PI;

use ndarray::{Array2, Axis, Zip};
use tracing::debug;

use super::accumulator::LockInAccumulator;
use crate::consts::{EXPORT_ANGLE_TOLERANCE_DEG, FLAT_RANGE_EPSILON, FULL_SCALE_U16, MID_GRAY_U16};
use crate::error::{LockInError, Result};
use crate::frame::Frame;

/// Value window mapped onto the 16-bit output range.
///
/// A bound left as `None` is taken from the data (auto min/max).
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct DisplayRange {
    pub min: Option<f64>,
    pub max: Option<f64>,
}

impl DisplayRange {
    pub const AUTO: Self = Self {
        min: None,
        max: None,
    };

    pub fn fixed(min: f64, max: f64) -> Self {
        Self {
            min: Some(min),
            max: Some(max),
        }
    }

    fn resolve(&self, values: &Array2<f64>) -> (f64, f64) {
        let (auto_min, auto_max) = values
            .iter()
            .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), &v| {
                (lo.min(v), hi.max(v))
            });
        (self.min.unwrap_or(auto_min), self.max.unwrap_or(auto_max))
    }
}

/// A differential frame tagged with the bin-centre angle it was rendered at.
#[derive(Clone, Debug)]
pub struct AngleFrame {
    pub angle_deg: f64,
    pub frame: Frame,
}

impl LockInAccumulator {
    /// Per-pixel ON − OFF difference at `angle_deg`, OFF taken 180° away.
    ///
    /// With `use_mean` each side is divided by its bin's sample count, which
    /// makes bins with unequal counts comparable.
    pub fn differential_at_angle(&self, angle_deg: f64, use_mean: bool) -> Result<Array2<f64>> {
        if self.samples == 0 {
            return Err(LockInError::NoSamples);
        }

        let angle_on = angle_deg.rem_euclid(360.0);
        let angle_off = (angle_on + 180.0) % 360.0;
        let bin_on = self.angle_to_bin(angle_on);
        let bin_off = self.angle_to_bin(angle_off);
        let count_on = self.count_on[bin_on];
        let count_off = self.count_off[bin_off];

        if count_on == 0 || count_off == 0 {
            return Err(LockInError::InsufficientSamples {
                angle_on,
                bin_on,
                count_on,
                angle_off,
                bin_off,
                count_off,
            });
        }

        let on = self.sum_on.index_axis(Axis(0), bin_on);
        let off = self.sum_off.index_axis(Axis(0), bin_off);
        let diff = if use_mean {
            let (n_on, n_off) = (count_on as f64, count_off as f64);
            Zip::from(&on)
                .and(&off)
                .map_collect(|&a, &b| a / n_on - b / n_off)
        } else {
            Zip::from(&on).and(&off).map_collect(|&a, &b| a - b)
        };
        Ok(diff)
    }

    /// Differential image at `angle_deg` rescaled to 16 bits.
    ///
    /// A flat difference renders as uniform mid-gray.
    pub fn frame_at_angle(&self, angle_deg: f64, use_mean: bool, range: DisplayRange) -> Result<Frame> {
        let diff = self.differential_at_angle(angle_deg, use_mean)?;
        self.output_frame(rescale_to_u16(&diff, range, MID_GRAY_U16))
    }

    /// Centre angle of every phase bin below `max_angle_deg`, in degrees.
    pub fn bin_center_angles(&self, max_angle_deg: f64) -> Vec<f64> {
        let step = 360.0 / self.phase_bins as f64;
        let limit = max_angle_deg + EXPORT_ANGLE_TOLERANCE_DEG;
        (0..self.phase_bins)
            .map(|bin| (bin as f64 + 0.5) * step)
            .filter(|&angle| angle < limit)
            .collect()
    }

    /// Differential frames at every bin centre below `export_max_angle_deg`.
    ///
    /// Fails on the first angle whose bins lack ON or OFF samples.
    pub fn all_angle_frames(
        &self,
        use_mean: bool,
        export_max_angle_deg: f64,
        range: DisplayRange,
    ) -> Result<Vec<AngleFrame>> {
        let mut frames = Vec::new();
        for angle_deg in self.bin_center_angles(export_max_angle_deg) {
            let frame = self.frame_at_angle(angle_deg, use_mean, range)?;
            frames.push(AngleFrame { angle_deg, frame });
        }
        debug!(count = frames.len(), export_max_angle_deg, "Rendered angle frames");
        Ok(frames)
    }

    /// Amplitude map rescaled to 16 bits. A flat map renders black.
    pub fn amplitude_frame(&self, normalize: bool, range: DisplayRange) -> Result<Frame> {
        if self.samples == 0 {
            return Err(LockInError::NoSamples);
        }
        let amplitude = self.amplitude(normalize, false);
        self.output_frame(rescale_to_u16(&amplitude, range, 0))
    }

    /// Phase map with (−π, π] spread over the full 16-bit range.
    ///
    /// Pixels whose amplitude is below `mask_below` render as 0.
    pub fn phase_frame(&self, normalize: bool, mask_below: Option<f64>) -> Result<Frame> {
        if self.samples == 0 {
            return Err(LockInError::NoSamples);
        }
        let norm = self.amplitude_norm(normalize);
        let threshold = mask_below.unwrap_or(f64::NEG_INFINITY);
        let samples = self
            .iq
            .iter()
            .map(|z| {
                if norm * z.norm() < threshold {
                    0
                } else {
                    phase_to_u16(z.arg())
                }
            })
            .collect();
        self.output_frame(samples)
    }

    fn output_frame(&self, samples: Vec<u16>) -> Result<Frame> {
        Frame::from_raw(self.width, self.visible_height(), samples, 0)
    }
}

fn phase_to_u16(phase: f64) -> u16 {
    let scaled = (phase + PI) / (2.0 * PI) * FULL_SCALE_U16 as f64;
    scaled.clamp(0.0, FULL_SCALE_U16 as f64) as u16
}

/// Linear map of `[lo, hi]` onto `[0, 65535]`, clamping outside values.
/// A window narrower than the flat-range tolerance yields `flat_value`
/// everywhere.
fn rescale_to_u16(values: &Array2<f64>, range: DisplayRange, flat_value: u16) -> Vec<u16> {
    let (lo, hi) = range.resolve(values);
    let span = hi - lo;
    if !(span > FLAT_RANGE_EPSILON) {
        return vec![flat_value; values.len()];
    }
    values
        .iter()
        .map(|&v| {
            let f = (v - lo) / span;
            if f <= 0.0 {
                0
            } else if f >= 1.0 {
                FULL_SCALE_U16
            } else {
                (f * FULL_SCALE_U16 as f64) as u16
            }
        })
        .collect()
}
