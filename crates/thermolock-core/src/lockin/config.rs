use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::consts::{DEFAULT_DUTY_CYCLE, DEFAULT_PHASE_BINS, DEFAULT_PROGRESS_INTERVAL_MS};
use crate::error::{LockInError, Result};
use crate::lockin::types::RunOptions;

/// Serializable run parameters. Hooks (preprocess, selector, progress) are
/// attached to the resulting [`RunOptions`] in code.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LockInConfig {
    pub frequency_hz: f64,
    pub duration_secs: f64,
    pub meta_rows: usize,
    pub duty_cycle: f64,
    pub phase_bins: usize,
    pub track_dc: bool,
    /// Stimulus-off settling time before frames are collected.
    pub settle_ms: Option<u64>,
    /// Average frames over this window before accumulation.
    pub integration_ms: Option<u64>,
    pub progress_interval_ms: u64,
}

impl Default for LockInConfig {
    fn default() -> Self {
        Self {
            frequency_hz: 1.0,
            duration_secs: 10.0,
            meta_rows: 0,
            duty_cycle: DEFAULT_DUTY_CYCLE,
            phase_bins: DEFAULT_PHASE_BINS,
            track_dc: true,
            settle_ms: None,
            integration_ms: None,
            progress_interval_ms: DEFAULT_PROGRESS_INTERVAL_MS,
        }
    }
}

impl LockInConfig {
    pub fn validate(&self) -> Result<()> {
        if !(self.duration_secs > 0.0 && self.duration_secs.is_finite()) {
            return Err(LockInError::InvalidArgument(format!(
                "duration must be positive, got {} s",
                self.duration_secs
            )));
        }
        self.options_unchecked().validate()
    }

    pub fn to_run_options(&self) -> Result<RunOptions> {
        self.validate()?;
        Ok(self.options_unchecked())
    }

    fn options_unchecked(&self) -> RunOptions {
        let duration = Duration::try_from_secs_f64(self.duration_secs).unwrap_or(Duration::ZERO);
        let mut options = RunOptions::new(self.frequency_hz, duration)
            .with_meta_rows(self.meta_rows)
            .with_duty_cycle(self.duty_cycle)
            .with_phase_bins(self.phase_bins)
            .with_dc_tracking(self.track_dc)
            .with_progress_interval(Duration::from_millis(self.progress_interval_ms));
        if let Some(ms) = self.settle_ms {
            options = options.with_settle(Duration::from_millis(ms));
        }
        if let Some(ms) = self.integration_ms {
            options = options.with_integration(Duration::from_millis(ms));
        }
        options
    }
}
