use std::any::Any;
use std::borrow::Cow;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::mpsc::{self, Receiver};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use crate::cancel::CancellationToken;
use crate::error::{LockInError, Result};
use crate::frame::Frame;
use crate::lockin::accumulator::LockInAccumulator;
use crate::lockin::integration::Integration;
use crate::lockin::types::{FramePreprocess, LockInProgress, LockInResult, ProgressReporter, RunOptions};
use crate::source::FrameSource;
use crate::stimulus::StimulusController;
use crate::temperature::SampleSelector;

/// State shared by the activities of one run.
#[derive(Debug, Default)]
struct RunState {
    stimulus_on: AtomicBool,
    frames: AtomicUsize,
}

enum IngestMessage {
    Frame {
        frame: Arc<Frame>,
        elapsed: f64,
        stimulus_on: bool,
    },
    Stop,
}

/// Drives a lock-in measurement: toggles the stimulus as a square wave and
/// feeds every frame the source delivers into a fresh [`LockInAccumulator`].
///
/// A run consists of these activities:
/// - the calling thread, which settles, waits out the measurement window and
///   then tears everything down;
/// - a toggler thread switching the stimulus at the configured duty cycle;
/// - an ingestion thread that owns the accumulator. The source callback only
///   timestamps frames and queues them, so a slow accumulation never blocks
///   frame delivery;
/// - an optional progress thread.
///
/// The stimulus is always left OFF when `run` returns, including on error and
/// cancellation. The runner does not start or stop the source.
pub struct LockInMeasurementRunner {
    source: Arc<dyn FrameSource>,
}

impl LockInMeasurementRunner {
    pub fn new(source: Arc<dyn FrameSource>) -> Self {
        Self { source }
    }

    pub fn source(&self) -> &Arc<dyn FrameSource> {
        &self.source
    }

    /// Run one measurement.
    ///
    /// Frames are collected for `options.duration` after the optional settle
    /// period. Returns `Cancelled` if `cancel` fires first.
    pub fn run(
        &self,
        stimulus: Arc<dyn StimulusController>,
        options: RunOptions,
        cancel: &CancellationToken,
    ) -> Result<LockInResult> {
        options.validate()?;

        let (width, height) = (self.source.width(), self.source.height());
        let accumulator = LockInAccumulator::new(
            width,
            height,
            options.meta_rows,
            options.frequency_hz,
            options.phase_bins,
            options.track_dc,
        )?;
        let meta_rows = accumulator.meta_rows();
        warn_on_long_integration(&options);

        let (on_time, off_time) = options.on_off_times()?;

        info!(
            frequency_hz = options.frequency_hz,
            duration_secs = options.duration.as_secs_f64(),
            duty_cycle = options.duty_cycle,
            phase_bins = options.phase_bins,
            width,
            height,
            stimulus = stimulus.name(),
            "Lock-in measurement started"
        );

        let start = Instant::now();
        let deadline = start.checked_add(options.duration).ok_or_else(|| {
            LockInError::InvalidArgument(format!(
                "duration {:?} exceeds the clock range",
                options.duration
            ))
        })?;
        let halt = CancellationToken::new();
        let state = Arc::new(RunState::default());
        let mut guard = SwitchOffGuard {
            stimulus: Arc::clone(&stimulus),
            halt: halt.clone(),
            armed: true,
        };

        let (tx, rx) = mpsc::channel();
        let ingestion = {
            let integration = Integration::new(options.integration_time, width, height, meta_rows);
            let preprocess = options.preprocess.clone();
            let selector = options.sample_selector.clone();
            let state = Arc::clone(&state);
            spawn_activity("lockin-ingest", move || {
                ingest_frames(rx, accumulator, integration, preprocess, selector, &state)
            })?
        };

        let progress = match options.progress.clone() {
            Some(reporter) => {
                let ticker = ProgressTicker {
                    reporter,
                    state: Arc::clone(&state),
                    halt: halt.clone(),
                    cancel: cancel.clone(),
                    start,
                    total: options.duration,
                    interval: options.progress_interval,
                    frequency_hz: options.frequency_hz,
                };
                Some(spawn_activity("lockin-progress", move || ticker.run())?)
            }
            None => None,
        };

        let settle = options.settle_before_start.unwrap_or_default();
        let mut cancelled = cancel.wait_timeout(settle);

        let mut subscription = None;
        let mut toggler = None;
        if !cancelled {
            let sender = tx.clone();
            let flag = Arc::clone(&state);
            subscription = Some(self.source.subscribe(Box::new(move |frame: &Arc<Frame>| {
                let _ = sender.send(IngestMessage::Frame {
                    frame: Arc::clone(frame),
                    elapsed: start.elapsed().as_secs_f64(),
                    stimulus_on: flag.stimulus_on.load(Ordering::Relaxed),
                });
            }))?);

            let toggle = Toggler {
                stimulus: Arc::clone(&stimulus),
                state: Arc::clone(&state),
                halt: halt.clone(),
                cancel: cancel.clone(),
                deadline,
                on_time,
                off_time,
            };
            toggler = Some(spawn_activity("lockin-toggle", move || toggle.run())?);

            cancelled = cancel.wait_timeout(options.duration);
        }

        // Teardown: stimulus off first, then stop intake, then drain.
        halt.cancel();
        if let Err(e) = stimulus.turn_off(&CancellationToken::new()) {
            warn!(error = %e, stimulus = stimulus.name(), "Failed to switch stimulus off");
        }
        let toggled = toggler.map(join_activity).transpose();
        drop(subscription);
        let _ = tx.send(IngestMessage::Stop);
        drop(tx);
        let accumulator = join_activity(ingestion);
        let reported = progress.map(join_activity).transpose();
        guard.armed = false;

        if cancelled {
            info!(
                elapsed_secs = start.elapsed().as_secs_f64(),
                "Lock-in measurement cancelled"
            );
            return Err(LockInError::Cancelled);
        }
        let accumulator = accumulator?;
        toggled?;
        reported?;

        info!(
            frames = accumulator.sample_count(),
            elapsed_secs = start.elapsed().as_secs_f64(),
            "Lock-in measurement finished"
        );
        Ok(LockInResult {
            accumulator,
            duration: options.duration,
            frequency_hz: options.frequency_hz,
        })
    }
}

fn warn_on_long_integration(options: &RunOptions) {
    if let Some(integration) = options.integration_time {
        let half_period = 0.5 / options.frequency_hz;
        if integration.as_secs_f64() > half_period {
            warn!(
                integration_ms = integration.as_millis() as u64,
                half_period_ms = half_period * 1000.0,
                "Integration time exceeds half the stimulus period; integrated frames will mix ON and OFF states"
            );
        }
    }
}

fn spawn_activity<T, F>(name: &str, f: F) -> Result<JoinHandle<T>>
where
    F: FnOnce() -> T + Send + 'static,
    T: Send + 'static,
{
    thread::Builder::new()
        .name(name.into())
        .spawn(f)
        .map_err(|e| LockInError::Worker(format!("failed to spawn {name}: {e}")))
}

fn join_activity<T>(handle: JoinHandle<T>) -> Result<T> {
    let name = handle.thread().name().unwrap_or("lock-in activity").to_string();
    handle
        .join()
        .map_err(|_| LockInError::Worker(format!("{name} panicked")))
}

/// Leaves the stimulus OFF and halts background activities when a run exits
/// before its normal teardown.
struct SwitchOffGuard {
    stimulus: Arc<dyn StimulusController>,
    halt: CancellationToken,
    armed: bool,
}

impl Drop for SwitchOffGuard {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        self.halt.cancel();
        if let Err(e) = self.stimulus.turn_off(&CancellationToken::new()) {
            warn!(error = %e, "Failed to switch stimulus off after aborted run");
        }
    }
}

struct Toggler {
    stimulus: Arc<dyn StimulusController>,
    state: Arc<RunState>,
    halt: CancellationToken,
    cancel: CancellationToken,
    deadline: Instant,
    on_time: Duration,
    off_time: Duration,
}

impl Toggler {
    /// Square-wave the stimulus until the deadline or a halt.
    ///
    /// Edges are scheduled on absolute instants so switching latency does
    /// not accumulate into phase drift. A failed switch is logged and retried
    /// on the next cycle.
    fn run(self) {
        let mut edge = Instant::now();
        let mut is_on = false;
        let mut cycles = 0u64;

        while Instant::now() < self.deadline && !self.stopped() {
            if !is_on {
                match self.stimulus.turn_on(&self.cancel) {
                    Ok(()) => {
                        is_on = true;
                        self.state.stimulus_on.store(true, Ordering::Relaxed);
                    }
                    Err(e) => warn!(error = %e, stimulus = self.stimulus.name(), "Failed to turn stimulus on"),
                }
            }

            edge = edge.checked_add(self.on_time).unwrap_or(self.deadline);
            if self.halt.wait_until(edge) || Instant::now() >= self.deadline {
                break;
            }

            if is_on {
                match self.stimulus.turn_off(&self.cancel) {
                    Ok(()) => {
                        is_on = false;
                        self.state.stimulus_on.store(false, Ordering::Relaxed);
                    }
                    Err(e) => warn!(error = %e, stimulus = self.stimulus.name(), "Failed to turn stimulus off"),
                }
            }

            edge = edge.checked_add(self.off_time).unwrap_or(self.deadline);
            if self.halt.wait_until(edge) {
                break;
            }
            cycles += 1;
        }

        if let Err(e) = self.stimulus.turn_off(&CancellationToken::new()) {
            warn!(error = %e, stimulus = self.stimulus.name(), "Failed to switch stimulus off");
        }
        self.state.stimulus_on.store(false, Ordering::Relaxed);
        debug!(cycles, "Stimulus toggling finished");
    }

    fn stopped(&self) -> bool {
        self.halt.is_cancelled() || self.cancel.is_cancelled()
    }
}

struct ProgressTicker {
    reporter: Arc<dyn ProgressReporter>,
    state: Arc<RunState>,
    halt: CancellationToken,
    cancel: CancellationToken,
    start: Instant,
    total: Duration,
    interval: Duration,
    frequency_hz: f64,
}

impl ProgressTicker {
    fn run(self) {
        while !self.cancel.is_cancelled() && self.start.elapsed() < self.total {
            self.emit(self.start.elapsed());
            if self.halt.wait_timeout(self.interval) {
                break;
            }
        }
        if !self.cancel.is_cancelled() {
            self.emit(self.total);
        }
    }

    fn emit(&self, elapsed: Duration) {
        self.reporter.report(&LockInProgress {
            elapsed: elapsed.min(self.total),
            total: self.total,
            frames: self.state.frames.load(Ordering::Relaxed),
            stimulus_on: self.state.stimulus_on.load(Ordering::Relaxed),
            frequency_hz: self.frequency_hz,
        });
    }
}

/// Ingestion loop. Owns the accumulator until the run stops it.
fn ingest_frames(
    rx: Receiver<IngestMessage>,
    mut accumulator: LockInAccumulator,
    mut integration: Integration,
    preprocess: Option<FramePreprocess>,
    selector: Option<SampleSelector>,
    state: &RunState,
) -> LockInAccumulator {
    let mut dropped = 0usize;

    while let Ok(IngestMessage::Frame {
        frame,
        elapsed,
        stimulus_on,
    }) = rx.recv()
    {
        let ingested = panic::catch_unwind(AssertUnwindSafe(|| {
            ingest_frame(
                &mut accumulator,
                &mut integration,
                &frame,
                elapsed,
                stimulus_on,
                preprocess.as_ref(),
                selector.as_ref(),
            )
        }))
        .unwrap_or_else(|payload| {
            Err(LockInError::Worker(format!(
                "frame hook panicked: {}",
                panic_message(payload.as_ref())
            )))
        });
        match ingested {
            Ok(true) => {
                state.frames.fetch_add(1, Ordering::Relaxed);
            }
            Ok(false) => {}
            Err(e) => {
                dropped += 1;
                debug!(error = %e, elapsed, "Frame dropped");
            }
        }
    }

    if dropped > 0 {
        warn!(dropped, "Frames dropped during lock-in measurement");
    }
    accumulator
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message
    } else {
        "unknown panic"
    }
}

/// Returns whether a (possibly integrated) frame reached the accumulator.
///
/// A panic in `preprocess` drops the frame before anything is touched. A
/// selector that panics mid-frame can leave that frame partially summed into
/// the I/Q and bin sums without being counted.
fn ingest_frame(
    accumulator: &mut LockInAccumulator,
    integration: &mut Integration,
    frame: &Frame,
    elapsed: f64,
    stimulus_on: bool,
    preprocess: Option<&FramePreprocess>,
    selector: Option<&SampleSelector>,
) -> Result<bool> {
    let frame: Cow<'_, Frame> = match preprocess {
        Some(preprocess) => Cow::Owned(preprocess(frame)?),
        None => Cow::Borrowed(frame),
    };
    accumulator.check_frame(&frame)?;

    match integration {
        Integration::Disabled => {
            accumulate(accumulator, &frame, elapsed, stimulus_on, selector)?;
            Ok(true)
        }
        Integration::Enabled(window) => match window.push(&frame, elapsed)? {
            Some((mean, midpoint)) => {
                accumulate(accumulator, &mean, midpoint, stimulus_on, selector)?;
                Ok(true)
            }
            None => Ok(false),
        },
    }
}

fn accumulate(
    accumulator: &mut LockInAccumulator,
    frame: &Frame,
    time_secs: f64,
    stimulus_on: bool,
    selector: Option<&SampleSelector>,
) -> Result<()> {
    match selector {
        Some(select) => accumulator.add_frame_with(frame, time_secs, stimulus_on, |raw| select(raw)),
        None => accumulator.add_frame(frame, time_secs, stimulus_on),
    }
}
