use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::consts::{DEFAULT_DUTY_CYCLE, DEFAULT_PHASE_BINS, DEFAULT_PROGRESS_INTERVAL_MS};
use crate::error::{LockInError, Result};
use crate::frame::Frame;
use crate::lockin::accumulator::LockInAccumulator;
use crate::temperature::SampleSelector;

/// Transform applied to every frame before accumulation (e.g. dark-field
/// correction). A failing frame is dropped.
pub type FramePreprocess = Arc<dyn Fn(&Frame) -> Result<Frame> + Send + Sync>;

/// Snapshot of a running measurement.
#[derive(Clone, Debug, PartialEq)]
pub struct LockInProgress {
    pub elapsed: Duration,
    pub total: Duration,
    /// Frames accepted into the accumulator so far.
    pub frames: usize,
    pub stimulus_on: bool,
    pub frequency_hz: f64,
}

impl LockInProgress {
    pub fn percent(&self) -> f64 {
        if self.total.is_zero() {
            0.0
        } else {
            self.elapsed.as_secs_f64() / self.total.as_secs_f64() * 100.0
        }
    }
}

/// Receives periodic [`LockInProgress`] snapshots from the runner's progress
/// thread.
pub trait ProgressReporter: Send + Sync {
    fn report(&self, progress: &LockInProgress);
}

impl<F> ProgressReporter for F
where
    F: Fn(&LockInProgress) + Send + Sync,
{
    fn report(&self, progress: &LockInProgress) {
        self(progress)
    }
}

/// Parameters for one lock-in measurement.
#[derive(Clone)]
pub struct RunOptions {
    pub frequency_hz: f64,
    /// Measurement window, counted after settling.
    pub duration: Duration,
    pub meta_rows: usize,
    /// Fraction of each period the stimulus is ON, in (0, 1).
    pub duty_cycle: f64,
    pub phase_bins: usize,
    pub track_dc: bool,
    pub settle_before_start: Option<Duration>,
    pub preprocess: Option<FramePreprocess>,
    pub sample_selector: Option<SampleSelector>,
    pub integration_time: Option<Duration>,
    pub progress: Option<Arc<dyn ProgressReporter>>,
    pub progress_interval: Duration,
}

impl RunOptions {
    pub fn new(frequency_hz: f64, duration: Duration) -> Self {
        Self {
            frequency_hz,
            duration,
            meta_rows: 0,
            duty_cycle: DEFAULT_DUTY_CYCLE,
            phase_bins: DEFAULT_PHASE_BINS,
            track_dc: true,
            settle_before_start: None,
            preprocess: None,
            sample_selector: None,
            integration_time: None,
            progress: None,
            progress_interval: Duration::from_millis(DEFAULT_PROGRESS_INTERVAL_MS),
        }
    }

    pub fn with_meta_rows(mut self, meta_rows: usize) -> Self {
        self.meta_rows = meta_rows;
        self
    }

    pub fn with_duty_cycle(mut self, duty_cycle: f64) -> Self {
        self.duty_cycle = duty_cycle;
        self
    }

    pub fn with_phase_bins(mut self, phase_bins: usize) -> Self {
        self.phase_bins = phase_bins;
        self
    }

    pub fn with_dc_tracking(mut self, track_dc: bool) -> Self {
        self.track_dc = track_dc;
        self
    }

    pub fn with_settle(mut self, settle: Duration) -> Self {
        self.settle_before_start = Some(settle);
        self
    }

    pub fn with_preprocess(mut self, preprocess: FramePreprocess) -> Self {
        self.preprocess = Some(preprocess);
        self
    }

    pub fn with_sample_selector(mut self, selector: SampleSelector) -> Self {
        self.sample_selector = Some(selector);
        self
    }

    pub fn with_integration(mut self, integration_time: Duration) -> Self {
        self.integration_time = Some(integration_time);
        self
    }

    pub fn with_progress(mut self, reporter: Arc<dyn ProgressReporter>) -> Self {
        self.progress = Some(reporter);
        self
    }

    pub fn with_progress_interval(mut self, interval: Duration) -> Self {
        self.progress_interval = interval;
        self
    }

    /// Stimulus period. Fails when the frequency is too low for the period
    /// to be a `Duration`.
    pub fn period(&self) -> Result<Duration> {
        Duration::try_from_secs_f64(1.0 / self.frequency_hz).map_err(|_| {
            LockInError::InvalidArgument(format!(
                "frequency {} Hz gives an unrepresentable period",
                self.frequency_hz
            ))
        })
    }

    /// ON and OFF durations of one stimulus cycle.
    pub fn on_off_times(&self) -> Result<(Duration, Duration)> {
        let period = self.period()?.as_secs_f64();
        let split = |fraction: f64| {
            Duration::try_from_secs_f64(period * fraction).map_err(|_| {
                LockInError::InvalidArgument(format!(
                    "duty cycle {} at {} Hz gives an unrepresentable half-cycle",
                    self.duty_cycle, self.frequency_hz
                ))
            })
        };
        Ok((split(self.duty_cycle)?, split(1.0 - self.duty_cycle)?))
    }

    pub fn validate(&self) -> Result<()> {
        if !(self.frequency_hz > 0.0 && self.frequency_hz.is_finite()) {
            return Err(LockInError::InvalidArgument(format!(
                "frequency must be positive, got {} Hz",
                self.frequency_hz
            )));
        }
        if self.duration.is_zero() {
            return Err(LockInError::InvalidArgument(
                "duration must be positive".into(),
            ));
        }
        if !(self.duty_cycle > 0.0 && self.duty_cycle < 1.0) {
            return Err(LockInError::InvalidArgument(format!(
                "duty cycle must be in (0, 1), got {}",
                self.duty_cycle
            )));
        }
        let (on_time, off_time) = self.on_off_times()?;
        let now = Instant::now();
        let settle = self.settle_before_start.unwrap_or_default();
        let cycle = on_time.saturating_add(off_time);
        let reachable = [self.duration, settle, cycle]
            .into_iter()
            .all(|span| now.checked_add(span).is_some());
        if !reachable || settle.checked_add(self.duration).is_none() {
            return Err(LockInError::InvalidArgument(format!(
                "duration {:?} with period {:?} exceeds the clock range",
                self.duration, cycle
            )));
        }
        if self.phase_bins == 0 {
            return Err(LockInError::InvalidArgument(
                "phase_bins must be positive".into(),
            ));
        }
        if self.progress_interval.is_zero() {
            return Err(LockInError::InvalidArgument(
                "progress interval must be positive".into(),
            ));
        }
        Ok(())
    }
}

impl fmt::Debug for RunOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RunOptions")
            .field("frequency_hz", &self.frequency_hz)
            .field("duration", &self.duration)
            .field("meta_rows", &self.meta_rows)
            .field("duty_cycle", &self.duty_cycle)
            .field("phase_bins", &self.phase_bins)
            .field("track_dc", &self.track_dc)
            .field("settle_before_start", &self.settle_before_start)
            .field("preprocess", &self.preprocess.is_some())
            .field("sample_selector", &self.sample_selector.is_some())
            .field("integration_time", &self.integration_time)
            .field("progress", &self.progress.is_some())
            .field("progress_interval", &self.progress_interval)
            .finish()
    }
}

/// Outcome of a completed measurement.
#[derive(Clone, Debug)]
pub struct LockInResult {
    pub accumulator: LockInAccumulator,
    pub duration: Duration,
    pub frequency_hz: f64,
}

impl LockInResult {
    pub fn sample_count(&self) -> usize {
        self.accumulator.sample_count()
    }
}
