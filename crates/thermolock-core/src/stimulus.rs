use crate::cancel::CancellationToken;
use crate::error::Result;

/// An excitation source that can be switched on and off (heater, lamp,
/// smart plug, GPIO line).
///
/// Implementations report failures as [`LockInError::Stimulus`]; the runner
/// never aborts a measurement because of them.
///
/// [`LockInError::Stimulus`]: crate::error::LockInError::Stimulus
pub trait StimulusController: Send + Sync {
    fn turn_on(&self, cancel: &CancellationToken) -> Result<()>;

    fn turn_off(&self, cancel: &CancellationToken) -> Result<()>;

    /// Descriptive name for logging.
    fn name(&self) -> &str {
        "stimulus"
    }
}
