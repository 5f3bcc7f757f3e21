use std::f64::consts::TAU;

use ndarray::{Array2, Array3, ArrayView2, Axis, Zip};
use num_complex::Complex64;
use tracing::debug;

use crate::consts::PARALLEL_PIXEL_THRESHOLD;
use crate::error::{LockInError, Result};
use crate::frame::Frame;

/// Phase-binned ON/OFF accumulator with synchronous I/Q demodulation.
///
/// Every accepted frame is correlated against `cos`/`sin` of the stimulus
/// frequency (the I/Q sums) and added to the ON or OFF sum of the phase bin
/// its timestamp falls into. Only time elapsed since the first accepted frame
/// matters; that first timestamp is latched as `t0`.
///
/// Per-bin sums are stored as `[bin][row][col]`, so the pixel loop of a frame
/// walks one contiguous slab.
#[derive(Clone, Debug)]
pub struct LockInAccumulator {
    pub(super) width: usize,
    pub(super) height: usize,
    pub(super) meta_rows: usize,
    pub(super) frequency_hz: f64,
    pub(super) omega: f64,
    pub(super) phase_bins: usize,

    /// In-phase sums in the real part, quadrature sums in the imaginary part.
    pub(super) iq: Array2<Complex64>,
    pub(super) dc_sum: Option<Array2<f64>>,

    pub(super) sum_on: Array3<f64>,
    pub(super) sum_off: Array3<f64>,
    pub(super) count_on: Vec<usize>,
    pub(super) count_off: Vec<usize>,

    pub(super) samples: usize,
    pub(super) t0: Option<f64>,
}

impl LockInAccumulator {
    /// Create an empty accumulator.
    ///
    /// `meta_rows` trailing rows of every frame are ignored. `phase_bins`
    /// partitions one stimulus cycle (36 gives 10° bins). `track_dc` keeps a
    /// plain per-pixel sum alongside the I/Q sums.
    pub fn new(
        width: usize,
        height: usize,
        meta_rows: usize,
        frequency_hz: f64,
        phase_bins: usize,
        track_dc: bool,
    ) -> Result<Self> {
        if width == 0 || height == 0 {
            return Err(LockInError::InvalidArgument(format!(
                "frame dimensions must be positive, got {width}x{height}"
            )));
        }
        if !(frequency_hz > 0.0 && frequency_hz.is_finite()) {
            return Err(LockInError::InvalidArgument(format!(
                "frequency must be positive, got {frequency_hz} Hz"
            )));
        }
        if phase_bins == 0 {
            return Err(LockInError::InvalidArgument(
                "phase_bins must be positive".into(),
            ));
        }

        let meta_rows = meta_rows.min(height);
        let visible_height = height - meta_rows;
        let shape = (visible_height, width);

        debug!(
            width,
            height,
            meta_rows,
            frequency_hz,
            phase_bins,
            track_dc,
            "Lock-in accumulator allocated"
        );

        Ok(Self {
            width,
            height,
            meta_rows,
            frequency_hz,
            omega: TAU * frequency_hz,
            phase_bins,
            iq: Array2::zeros(shape),
            dc_sum: track_dc.then(|| Array2::zeros(shape)),
            sum_on: Array3::zeros((phase_bins, visible_height, width)),
            sum_off: Array3::zeros((phase_bins, visible_height, width)),
            count_on: vec![0; phase_bins],
            count_off: vec![0; phase_bins],
            samples: 0,
            t0: None,
        })
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

    pub fn pixel_count(&self) -> usize {
        self.width * self.visible_height()
    }

    /// Number of frames accepted so far.
    pub fn sample_count(&self) -> usize {
        self.samples
    }

    pub fn frequency_hz(&self) -> f64 {
        self.frequency_hz
    }

    pub fn phase_bins(&self) -> usize {
        self.phase_bins
    }

    /// Time origin latched by the first accepted frame (or by `reset`).
    pub fn t0(&self) -> Option<f64> {
        self.t0
    }

    pub fn tracks_dc(&self) -> bool {
        self.dc_sum.is_some()
    }

    pub fn dc_sum(&self) -> Option<&Array2<f64>> {
        self.dc_sum.as_ref()
    }

    pub fn on_count(&self, bin: usize) -> usize {
        self.count_on.get(bin).copied().unwrap_or(0)
    }

    pub fn off_count(&self, bin: usize) -> usize {
        self.count_off.get(bin).copied().unwrap_or(0)
    }

    /// Clear all sums and counters.
    ///
    /// With `Some(t0)` the time origin is latched immediately; with `None` the
    /// next accepted frame latches it.
    pub fn reset(&mut self, t0_secs: Option<f64>) {
        self.iq.fill(Complex64::new(0.0, 0.0));
        if let Some(dc) = self.dc_sum.as_mut() {
            dc.fill(0.0);
        }
        self.sum_on.fill(0.0);
        self.sum_off.fill(0.0);
        self.count_on.fill(0);
        self.count_off.fill(0);
        self.samples = 0;
        self.t0 = t0_secs;
    }

    /// Reject frames whose geometry differs from the accumulator's.
    pub(crate) fn check_frame(&self, frame: &Frame) -> Result<()> {
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
        Ok(())
    }

    /// Map a phase in `[0, 2π)` to its bin. A phase exactly on a boundary
    /// belongs to the upper bin's lower edge, i.e. rounds down.
    pub(crate) fn phase_to_bin(&self, phase: f64) -> usize {
        let bin = (phase / TAU * self.phase_bins as f64) as usize;
        bin.min(self.phase_bins - 1)
    }

    /// Map an angle in `[0, 360)` degrees to its bin.
    pub(crate) fn angle_to_bin(&self, angle_deg: f64) -> usize {
        let bin = (angle_deg / 360.0 * self.phase_bins as f64) as usize;
        bin.min(self.phase_bins - 1)
    }

    /// Accumulate a frame using raw sample values.
    pub fn add_frame(&mut self, frame: &Frame, time_secs: f64, stimulus_on: bool) -> Result<()> {
        self.add_frame_with(frame, time_secs, stimulus_on, |raw| raw as f64)
    }

    /// Accumulate a frame, transforming each raw sample with `selector` first
    /// (e.g. raw counts to °C).
    ///
    /// Fails with `ShapeMismatch` before touching any state when the frame
    /// does not match the accumulator's geometry.
    pub fn add_frame_with<F>(
        &mut self,
        frame: &Frame,
        time_secs: f64,
        stimulus_on: bool,
        selector: F,
    ) -> Result<()>
    where
        F: Fn(u16) -> f64 + Sync,
    {
        self.check_frame(frame)?;
        let visible_height = self.visible_height();
        let pixels = self.pixel_count();
        let samples = ArrayView2::from_shape((visible_height, self.width), &frame.samples()[..pixels])
            .map_err(|_| LockInError::ShapeMismatch {
                expected_width: self.width,
                expected_height: self.height,
                width: frame.width(),
                height: frame.height(),
                samples: frame.samples().len(),
            })?;

        let t0 = *self.t0.get_or_insert(time_secs);
        let angle = self.omega * (time_secs - t0);
        let bin = self.phase_to_bin(angle.rem_euclid(TAU));
        let (s, c) = angle.sin_cos();

        let sums = if stimulus_on {
            &mut self.sum_on
        } else {
            &mut self.sum_off
        };
        let mut target = sums.index_axis_mut(Axis(0), bin);

        // Returns the selected sample so the DC pass can reuse it.
        let demodulate = |z: &mut Complex64, acc: &mut f64, raw: u16| {
            let x = selector(raw);
            z.re += x * c;
            z.im += x * s;
            *acc += x;
            x
        };
        let parallel = pixels >= PARALLEL_PIXEL_THRESHOLD;
        match self.dc_sum.as_mut() {
            Some(dc) => {
                let zip = Zip::from(&mut self.iq).and(&mut target).and(dc).and(&samples);
                let accumulate = |z: &mut Complex64, acc: &mut f64, d: &mut f64, raw: &u16| {
                    *d += demodulate(z, acc, *raw);
                };
                if parallel {
                    zip.par_for_each(accumulate);
                } else {
                    zip.for_each(accumulate);
                }
            }
            None => {
                let zip = Zip::from(&mut self.iq).and(&mut target).and(&samples);
                let accumulate = |z: &mut Complex64, acc: &mut f64, raw: &u16| {
                    demodulate(z, acc, *raw);
                };
                if parallel {
                    zip.par_for_each(accumulate);
                } else {
                    zip.for_each(accumulate);
                }
            }
        }

        if stimulus_on {
            self.count_on[bin] += 1;
        } else {
            self.count_off[bin] += 1;
        }
        self.samples += 1;
        Ok(())
    }

    /// Per-pixel lock-in amplitude `norm * sqrt(I² + Q²)`, shaped
    /// `(visible_height, width)`.
    ///
    /// With `normalize` the norm is `2/n`, the two-phase estimator for a
    /// sinusoidal reference. A square-wave drive is not compensated for, so
    /// amplitudes are proportional to, not equal to, the square-wave response.
    ///
    /// `remove_dc` is reserved for DC-leakage correction when the run does not
    /// span an integer number of periods. It currently has no effect.
    pub fn amplitude(&self, normalize: bool, remove_dc: bool) -> Array2<f64> {
        let norm = self.amplitude_norm(normalize);
        if remove_dc {
            debug!("DC removal requested; no leakage correction is applied");
        }
        self.map_iq(move |z| norm * z.norm())
    }

    /// Per-pixel phase `atan2(Q, I)` in radians, range (−π, π].
    pub fn phase(&self) -> Array2<f64> {
        self.map_iq(|z| z.arg())
    }

    /// Copies of the raw I and Q sums.
    pub fn iq(&self) -> (Array2<f64>, Array2<f64>) {
        (self.iq.mapv(|z| z.re), self.iq.mapv(|z| z.im))
    }

    pub(super) fn amplitude_norm(&self, normalize: bool) -> f64 {
        if normalize && self.samples > 0 {
            2.0 / self.samples as f64
        } else {
            1.0
        }
    }

    pub(super) fn map_iq<F>(&self, f: F) -> Array2<f64>
    where
        F: Fn(Complex64) -> f64 + Sync + Send,
    {
        let zip = Zip::from(&self.iq);
        if self.pixel_count() >= PARALLEL_PIXEL_THRESHOLD {
            zip.par_map_collect(|z| f(*z))
        } else {
            zip.map_collect(|z| f(*z))
        }
    }
}
