//! Simulated stimulus and camera for running measurements without hardware.

use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::cancel::CancellationToken;
use crate::consts::FULL_SCALE_U16;
use crate::error::{LockInError, Result};
use crate::frame::Frame;
use crate::source::{FrameBroadcaster, FrameCallback, FrameSource, Subscription};
use crate::stimulus::StimulusController;

/// Heater that switches instantly. Cameras built from it see its state.
#[derive(Debug, Default)]
pub struct SimulatedHeater {
    on: Arc<AtomicBool>,
    switches: AtomicUsize,
}

impl SimulatedHeater {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_on(&self) -> bool {
        self.on.load(Ordering::Relaxed)
    }

    /// Number of OFF→ON and ON→OFF transitions so far.
    pub fn switch_count(&self) -> usize {
        self.switches.load(Ordering::Relaxed)
    }

    fn set(&self, on: bool) {
        if self.on.swap(on, Ordering::Relaxed) != on {
            self.switches.fetch_add(1, Ordering::Relaxed);
            debug!(on, "Simulated heater switched");
        }
    }
}

impl StimulusController for SimulatedHeater {
    fn turn_on(&self, _cancel: &CancellationToken) -> Result<()> {
        self.set(true);
        Ok(())
    }

    fn turn_off(&self, _cancel: &CancellationToken) -> Result<()> {
        self.set(false);
        Ok(())
    }

    fn name(&self) -> &str {
        "simulated-heater"
    }
}

/// Scene and timing parameters of a [`SyntheticCamera`].
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyntheticCameraConfig {
    pub width: usize,
    pub height: usize,
    /// Trailing rows carrying a frame counter instead of image data.
    pub meta_rows: usize,
    pub fps: f64,
    /// Mean raw level of the scene.
    pub background: f64,
    /// Peak raw increase at the hot spot once fully heated.
    pub hotspot_amplitude: f64,
    /// Hot spot radius (Gaussian sigma) in pixels.
    pub hotspot_sigma: f64,
    /// First-order thermal lag of the hot spot.
    pub thermal_time_constant_ms: f64,
    /// Half-width of the uniform per-sample noise.
    pub noise: f64,
    /// Half-width of the static per-pixel offset pattern.
    pub fixed_pattern: f64,
    pub seed: u64,
}

impl Default for SyntheticCameraConfig {
    fn default() -> Self {
        Self {
            width: 64,
            height: 48,
            meta_rows: 0,
            fps: 50.0,
            background: 8000.0,
            hotspot_amplitude: 400.0,
            hotspot_sigma: 6.0,
            thermal_time_constant_ms: 150.0,
            noise: 20.0,
            fixed_pattern: 50.0,
            seed: 7,
        }
    }
}

impl SyntheticCameraConfig {
    pub fn validate(&self) -> Result<()> {
        if self.width == 0 || self.height == 0 || self.meta_rows >= self.height {
            return Err(LockInError::InvalidArgument(format!(
                "camera geometry {}x{} with {} metadata rows leaves no image",
                self.width, self.height, self.meta_rows
            )));
        }
        self.frame_interval()?;
        if !(self.hotspot_sigma > 0.0) {
            return Err(LockInError::InvalidArgument(
                "hotspot_sigma must be positive".into(),
            ));
        }
        if self.noise < 0.0 || self.fixed_pattern < 0.0 || self.thermal_time_constant_ms < 0.0 {
            return Err(LockInError::InvalidArgument(
                "noise, fixed_pattern and thermal_time_constant_ms must not be negative".into(),
            ));
        }
        Ok(())
    }

    /// Time between frames.
    pub fn frame_interval(&self) -> Result<Duration> {
        if !(self.fps > 0.0 && self.fps.is_finite()) {
            return Err(LockInError::InvalidArgument(format!(
                "fps must be positive, got {}",
                self.fps
            )));
        }
        Duration::try_from_secs_f64(1.0 / self.fps).map_err(|_| {
            LockInError::InvalidArgument(format!("fps {} is too low", self.fps))
        })
    }

    fn visible_height(&self) -> usize {
        self.height - self.meta_rows
    }
}

/// Static per-pixel description of the scene plus the live inputs.
struct Scene {
    config: SyntheticCameraConfig,
    broadcaster: FrameBroadcaster,
    heater: Arc<AtomicBool>,
    shutter_closed: AtomicBool,
    /// Background plus fixed-pattern offset, per visible pixel.
    base: Vec<f64>,
    /// Fully heated hot spot contribution, per visible pixel.
    hotspot: Vec<f64>,
    published: AtomicU64,
}

impl Scene {
    fn new(config: SyntheticCameraConfig, heater: Arc<AtomicBool>) -> Self {
        let (w, vh) = (config.width, config.visible_height());
        let mut rng = StdRng::seed_from_u64(config.seed.wrapping_add(1));
        let spread = config.fixed_pattern;
        let base = (0..w * vh)
            .map(|_| {
                let offset = if spread > 0.0 { rng.gen_range(-spread..=spread) } else { 0.0 };
                config.background + offset
            })
            .collect();

        let (cx, cy) = ((w as f64 - 1.0) / 2.0, (vh as f64 - 1.0) / 2.0);
        let two_sigma_sq = 2.0 * config.hotspot_sigma * config.hotspot_sigma;
        let hotspot = (0..vh)
            .flat_map(|y| (0..w).map(move |x| (x, y)))
            .map(|(x, y)| {
                let (dx, dy) = (x as f64 - cx, y as f64 - cy);
                config.hotspot_amplitude * (-(dx * dx + dy * dy) / two_sigma_sq).exp()
            })
            .collect();

        Self {
            config,
            broadcaster: FrameBroadcaster::new(),
            heater,
            shutter_closed: AtomicBool::new(false),
            base,
            hotspot,
            published: AtomicU64::new(0),
        }
    }

    fn render(&self, response: f64, index: u64, rng: &mut StdRng) -> Result<Frame> {
        let config = &self.config;
        let shutter_closed = self.shutter_closed.load(Ordering::Relaxed);
        let noise = config.noise;

        let mut samples = Vec::with_capacity(config.width * config.height);
        for (&base, &hot) in self.base.iter().zip(&self.hotspot) {
            let signal = if shutter_closed { 0.0 } else { hot * response };
            let jitter = if noise > 0.0 { rng.gen_range(-noise..=noise) } else { 0.0 };
            let value = (base + signal + jitter).round().clamp(0.0, FULL_SCALE_U16 as f64);
            samples.push(value as u16);
        }
        let meta_len = config.width * config.meta_rows;
        samples.extend((0..meta_len).map(|k| if k == 0 { index as u16 } else { 0 }));

        let frame = Frame::from_raw(config.width, config.height, samples, config.meta_rows)?;
        let preview = frame.auto_contrast_preview();
        Ok(frame.with_preview(preview))
    }
}

/// Frame source rendering a Gaussian hot spot that heats and cools with a
/// [`SimulatedHeater`] through a first-order thermal lag.
///
/// Frames are produced on a background thread between `start()` and
/// `stop()`, with reproducible noise for a given seed.
pub struct SyntheticCamera {
    scene: Arc<Scene>,
    running: Arc<AtomicBool>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl SyntheticCamera {
    pub fn new(config: SyntheticCameraConfig, heater: &SimulatedHeater) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            scene: Arc::new(Scene::new(config, Arc::clone(&heater.on))),
            running: Arc::new(AtomicBool::new(false)),
            worker: Mutex::new(None),
        })
    }

    pub fn config(&self) -> &SyntheticCameraConfig {
        &self.scene.config
    }

    /// With the shutter closed frames show only background, fixed pattern and
    /// noise, which is what a dark reference captures.
    pub fn set_shutter_closed(&self, closed: bool) {
        self.scene.shutter_closed.store(closed, Ordering::Relaxed);
    }

    pub fn is_shutter_closed(&self) -> bool {
        self.scene.shutter_closed.load(Ordering::Relaxed)
    }

    pub fn frames_published(&self) -> u64 {
        self.scene.published.load(Ordering::Relaxed)
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }
}

impl FrameSource for SyntheticCamera {
    fn width(&self) -> usize {
        self.scene.config.width
    }

    fn height(&self) -> usize {
        self.scene.config.height
    }

    fn subscribe(&self, callback: FrameCallback) -> Result<Subscription> {
        Ok(self.scene.broadcaster.subscribe(callback))
    }

    fn start(&self) -> Result<()> {
        let mut worker = self.worker.lock().unwrap_or_else(|e| e.into_inner());
        if worker.is_some() {
            return Ok(());
        }

        let period = self.scene.config.frame_interval()?;
        self.running.store(true, Ordering::Release);
        let scene = Arc::clone(&self.scene);
        let running = Arc::clone(&self.running);
        let handle = thread::Builder::new()
            .name("synthetic-camera".into())
            .spawn(move || produce_frames(&scene, &running, period))
            .map_err(|e| {
                self.running.store(false, Ordering::Release);
                LockInError::FrameSource(format!("failed to start camera thread: {e}"))
            })?;
        *worker = Some(handle);

        info!(
            width = self.scene.config.width,
            height = self.scene.config.height,
            fps = self.scene.config.fps,
            "Synthetic camera started"
        );
        Ok(())
    }

    fn stop(&self) -> Result<()> {
        self.running.store(false, Ordering::Release);
        let handle = self
            .worker
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        if let Some(handle) = handle {
            handle
                .join()
                .map_err(|_| LockInError::FrameSource("camera thread panicked".into()))?;
            debug!(frames = self.frames_published(), "Synthetic camera stopped");
        }
        Ok(())
    }
}

impl Drop for SyntheticCamera {
    fn drop(&mut self) {
        if let Err(e) = self.stop() {
            warn!(error = %e, "Synthetic camera did not stop cleanly");
        }
    }
}

fn produce_frames(scene: &Scene, running: &AtomicBool, period: Duration) {
    let config = &scene.config;
    let mut rng = StdRng::seed_from_u64(config.seed);
    let tau = config.thermal_time_constant_ms / 1000.0;

    let mut response = 0.0f64;
    let mut last = Instant::now();
    let mut next = last;

    while running.load(Ordering::Acquire) {
        let now = Instant::now();
        let dt = (now - last).as_secs_f64();
        last = now;

        let target = if scene.heater.load(Ordering::Relaxed) { 1.0 } else { 0.0 };
        response += if tau > 0.0 {
            (target - response) * (1.0 - (-dt / tau).exp())
        } else {
            target - response
        };

        let index = scene.published.load(Ordering::Relaxed);
        match scene.render(response, index, &mut rng) {
            Ok(frame) => {
                scene.broadcaster.publish(frame);
                scene.published.fetch_add(1, Ordering::Relaxed);
            }
            Err(e) => {
                warn!(error = %e, "Synthetic camera failed to render a frame");
                break;
            }
        }

        next = next.checked_add(period).unwrap_or(now);
        let now = Instant::now();
        if next > now {
            thread::sleep(next - now);
        } else {
            next = now;
        }
    }
}
