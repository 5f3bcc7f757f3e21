/// Minimum visible pixel count (h*w) to use Rayon parallelism in per-pixel loops.
pub const PARALLEL_PIXEL_THRESHOLD: usize = 65_536;

/// Largest 16-bit sample value; rendered frames map the top of their range here.
pub const FULL_SCALE_U16: u16 = u16::MAX;

/// Constant emitted for every pixel of a differential frame with a flat range.
pub const MID_GRAY_U16: u16 = 32_768;

/// Value ranges at or below this width are treated as flat when rescaling.
pub const FLAT_RANGE_EPSILON: f64 = 1e-12;

/// Default number of phase bins per stimulus cycle (10° bins).
pub const DEFAULT_PHASE_BINS: usize = 36;

/// Default fraction of each stimulus period spent ON.
pub const DEFAULT_DUTY_CYCLE: f64 = 0.5;

/// Default interval between progress reports, in milliseconds.
pub const DEFAULT_PROGRESS_INTERVAL_MS: u64 = 100;

/// Angles at or above this value are skipped by the angle export.
/// Angles in [180, 360) repeat [0, 180) with ON and OFF swapped.
pub const DEFAULT_EXPORT_MAX_ANGLE_DEG: f64 = 180.0;

/// Tolerance applied to the export upper bound so bin centres that land on it
/// through rounding are still excluded.
pub const EXPORT_ANGLE_TOLERANCE_DEG: f64 = 1e-9;
