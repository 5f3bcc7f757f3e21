use std::sync::Arc;

use crate::error::{LockInError, Result};

/// Per-sample transform applied before accumulation, e.g. raw counts to °C.
///
/// Called once per visible pixel per frame, possibly from several threads.
pub type SampleSelector = Arc<dyn Fn(u16) -> f64 + Send + Sync>;

/// Identity selector: the raw sample as a float.
pub fn raw_selector() -> SampleSelector {
    Arc::new(|raw| raw as f64)
}

/// Converts raw sensor counts to temperature.
pub trait TemperatureConverter: Send + Sync {
    fn raw_to_celsius(&self, raw: u16) -> f64;

    /// Refresh calibration from the frame's metadata rows.
    fn update_from_meta(&mut self, _meta: &[u16]) {}

    /// Wrap the converter as a [`SampleSelector`].
    fn into_selector(self) -> SampleSelector
    where
        Self: Sized + 'static,
    {
        Arc::new(move |raw| self.raw_to_celsius(raw))
    }
}

/// Linear map from a raw window onto a temperature window.
///
/// Not radiometrically exact; adequate when only relative temperatures matter.
#[derive(Clone, Debug)]
pub struct LinearTemperatureConverter {
    raw_min: u16,
    raw_max: u16,
    t_min_c: f64,
    t_max_c: f64,
}

impl LinearTemperatureConverter {
    pub fn new(raw_min: u16, raw_max: u16, t_min_c: f64, t_max_c: f64) -> Result<Self> {
        if raw_max <= raw_min {
            return Err(LockInError::InvalidArgument(format!(
                "raw_max ({raw_max}) must be greater than raw_min ({raw_min})"
            )));
        }
        Ok(Self {
            raw_min,
            raw_max,
            t_min_c,
            t_max_c,
        })
    }
}

impl TemperatureConverter for LinearTemperatureConverter {
    fn raw_to_celsius(&self, raw: u16) -> f64 {
        let clamped = raw.clamp(self.raw_min, self.raw_max);
        let f = (clamped - self.raw_min) as f64 / (self.raw_max - self.raw_min) as f64;
        self.t_min_c + f * (self.t_max_c - self.t_min_c)
    }
}
