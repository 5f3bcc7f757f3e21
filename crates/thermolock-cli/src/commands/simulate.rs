use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Args;
use indicatif::{ProgressBar, ProgressStyle};
use thermolock_core::acquire::{acquire_sum, capture_single_frame};
use thermolock_core::cancel::CancellationToken;
use thermolock_core::filters::DarkFieldCorrector;
use thermolock_core::frame::Frame;
use thermolock_core::lockin::{LockInMeasurementRunner, LockInProgress};
use thermolock_core::sim::{SimulatedHeater, SyntheticCamera};
use thermolock_core::source::FrameSource;
use tracing::{info, warn};

use super::config::SimulationConfig;
use crate::summary;

#[derive(Args)]
pub struct SimulateArgs {
    /// TOML config file with [lockin] and [camera] tables
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Stimulus frequency in Hz
    #[arg(long)]
    pub frequency: Option<f64>,

    /// Measurement duration in seconds
    #[arg(long)]
    pub duration: Option<f64>,

    /// Camera frame rate
    #[arg(long)]
    pub fps: Option<f64>,

    /// Frame width in pixels
    #[arg(long)]
    pub width: Option<usize>,

    /// Frame height in pixels, metadata rows included
    #[arg(long)]
    pub height: Option<usize>,

    /// Number of phase bins per stimulus cycle
    #[arg(long)]
    pub bins: Option<usize>,

    /// Average raw frames over this many milliseconds before accumulation
    #[arg(long)]
    pub integration_ms: Option<u64>,

    /// Let the scene settle this many milliseconds before the first ON edge
    #[arg(long)]
    pub settle_ms: Option<u64>,

    /// Capture a dark reference with the shutter closed and correct every frame against it
    #[arg(long)]
    pub dark_frame: bool,

    /// Averaging time of the dark reference in milliseconds
    #[arg(long, default_value = "500")]
    pub dark_ms: u64,
}

pub fn run(args: &SimulateArgs) -> Result<()> {
    let config = load_config(args)?;
    config.camera.validate().context("Invalid camera config")?;
    let mut options = config
        .lockin
        .to_run_options()
        .context("Invalid lock-in config")?;

    if config.lockin.meta_rows != config.camera.meta_rows {
        warn!(
            lockin = config.lockin.meta_rows,
            camera = config.camera.meta_rows,
            "Metadata row counts differ; metadata may be accumulated as image data"
        );
    }

    summary::print_simulation_summary(&config, args.dark_frame);

    let heater = Arc::new(SimulatedHeater::new());
    let camera = Arc::new(SyntheticCamera::new(config.camera.clone(), &heater)?);
    let cancel = CancellationToken::new();

    if args.dark_frame {
        let corrector = capture_dark_reference(
            &camera,
            config.camera.meta_rows,
            Duration::from_millis(args.dark_ms),
            &cancel,
        )?;
        info!(
            mean = corrector.reference_mean().unwrap_or(0.0),
            "Dark reference captured"
        );
        options = options
            .with_preprocess(Arc::new(move |frame: &Frame| corrector.apply(frame)));
    }

    let pb = ProgressBar::new(100);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{msg:20} [{bar:40}] {pos}%")?
            .progress_chars("=> "),
    );
    pb.set_message("Settling");
    let bar = pb.clone();
    options = options.with_progress(Arc::new(move |p: &LockInProgress| {
        let state = if p.stimulus_on { "ON" } else { "OFF" };
        bar.set_message(format!("{} frames, {state}", p.frames));
        bar.set_position(p.percent().round().min(100.0) as u64);
    }));

    camera.start().context("Failed to start synthetic camera")?;
    let runner = LockInMeasurementRunner::new(camera.clone());
    let outcome = runner.run(heater.clone(), options, &cancel);
    let stopped = camera.stop();

    let result = match outcome {
        Ok(result) => result,
        Err(e) => {
            pb.abandon_with_message("Failed");
            return Err(e).context("Lock-in measurement failed");
        }
    };
    stopped.context("Failed to stop synthetic camera")?;
    pb.finish_with_message("Done");

    summary::print_measurement_summary(&result, heater.switch_count(), camera.frames_published());

    Ok(())
}

fn load_config(args: &SimulateArgs) -> Result<SimulationConfig> {
    let mut config: SimulationConfig = match &args.config {
        Some(path) => {
            let contents = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read config {}", path.display()))?;
            toml::from_str(&contents).context("Invalid simulation config")?
        }
        None => SimulationConfig::default(),
    };

    if let Some(frequency) = args.frequency {
        config.lockin.frequency_hz = frequency;
    }
    if let Some(duration) = args.duration {
        config.lockin.duration_secs = duration;
    }
    if let Some(bins) = args.bins {
        config.lockin.phase_bins = bins;
    }
    if let Some(ms) = args.integration_ms {
        config.lockin.integration_ms = Some(ms);
    }
    if let Some(ms) = args.settle_ms {
        config.lockin.settle_ms = Some(ms);
    }
    if let Some(fps) = args.fps {
        config.camera.fps = fps;
    }
    if let Some(width) = args.width {
        config.camera.width = width;
    }
    if let Some(height) = args.height {
        config.camera.height = height;
    }

    Ok(config)
}

/// Averages frames with the shutter closed. Averaged frames carry no
/// metadata rows, so cameras with metadata fall back to a single frame.
fn capture_dark_reference(
    camera: &SyntheticCamera,
    meta_rows: usize,
    duration: Duration,
    cancel: &CancellationToken,
) -> Result<DarkFieldCorrector> {
    let shutter = ClosedShutter::new(camera);
    let dark = if meta_rows == 0 {
        acquire_sum(camera, duration, 0, None, false, cancel)
    } else {
        camera.start().context("Failed to start synthetic camera")?;
        let frame = capture_single_frame(camera, duration.max(Duration::from_secs(1)));
        camera.stop().context("Failed to stop synthetic camera")?;
        frame
    };
    drop(shutter);

    let dark = dark.context("Failed to capture dark reference")?;
    let mut corrector = DarkFieldCorrector::new();
    corrector
        .set_reference(&dark, meta_rows)
        .context("Unusable dark reference")?;
    Ok(corrector)
}

/// Keeps the shutter closed until dropped, including on early returns.
struct ClosedShutter<'a> {
    camera: &'a SyntheticCamera,
}

impl<'a> ClosedShutter<'a> {
    fn new(camera: &'a SyntheticCamera) -> Self {
        camera.set_shutter_closed(true);
        Self { camera }
    }
}

impl Drop for ClosedShutter<'_> {
    fn drop(&mut self) {
        self.camera.set_shutter_closed(false);
    }
}
