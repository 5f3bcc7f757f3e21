#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use thermolock_core::cancel::CancellationToken;
use thermolock_core::error::{LockInError, Result};
use thermolock_core::frame::Frame;
use thermolock_core::source::{FrameBroadcaster, FrameCallback, FrameSource, Subscription};
use thermolock_core::stimulus::StimulusController;

/// Build a frame from a sample slice, panicking on a length mismatch.
pub fn frame_from(width: usize, height: usize, samples: &[u16], meta_rows: usize) -> Frame {
    Frame::from_raw(width, height, samples.to_vec(), meta_rows).expect("valid frame")
}

pub fn uniform_frame(width: usize, height: usize, value: u16) -> Frame {
    Frame::filled(width, height, value, 0)
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StimulusCall {
    On,
    Off,
}

/// Stimulus double that records every call in order, with the instant it
/// was made.
#[derive(Debug, Default)]
pub struct RecordingStimulus {
    calls: Mutex<Vec<(StimulusCall, Instant)>>,
    fail_on: bool,
}

impl RecordingStimulus {
    pub fn new() -> Self {
        Self::default()
    }

    /// A stimulus whose `turn_on` always fails (the call is still recorded).
    pub fn failing_on() -> Self {
        Self {
            calls: Mutex::new(Vec::new()),
            fail_on: true,
        }
    }

    pub fn calls(&self) -> Vec<StimulusCall> {
        self.timed_calls().into_iter().map(|(call, _)| call).collect()
    }

    pub fn timed_calls(&self) -> Vec<(StimulusCall, Instant)> {
        self.calls.lock().unwrap().clone()
    }

    fn record(&self, call: StimulusCall) {
        self.calls.lock().unwrap().push((call, Instant::now()));
    }

    pub fn count(&self, call: StimulusCall) -> usize {
        self.calls().iter().filter(|&&c| c == call).count()
    }

    pub fn last(&self) -> Option<StimulusCall> {
        self.calls().last().copied()
    }
}

impl StimulusController for RecordingStimulus {
    fn turn_on(&self, _cancel: &CancellationToken) -> Result<()> {
        self.record(StimulusCall::On);
        if self.fail_on {
            return Err(LockInError::Stimulus("relay stuck".into()));
        }
        Ok(())
    }

    fn turn_off(&self, _cancel: &CancellationToken) -> Result<()> {
        self.record(StimulusCall::Off);
        Ok(())
    }
}

/// Frame source driven by the test through [`ManualSource::publish`].
#[derive(Debug)]
pub struct ManualSource {
    width: usize,
    height: usize,
    broadcaster: FrameBroadcaster,
    started: AtomicBool,
}

impl ManualSource {
    pub fn new(width: usize, height: usize) -> Self {
        Self {
            width,
            height,
            broadcaster: FrameBroadcaster::new(),
            started: AtomicBool::new(false),
        }
    }

    pub fn publish(&self, frame: Frame) {
        self.broadcaster.publish(frame);
    }

    pub fn subscriber_count(&self) -> usize {
        self.broadcaster.subscriber_count()
    }

    pub fn is_started(&self) -> bool {
        self.started.load(Ordering::SeqCst)
    }
}

impl FrameSource for ManualSource {
    fn width(&self) -> usize {
        self.width
    }

    fn height(&self) -> usize {
        self.height
    }

    fn subscribe(&self, callback: FrameCallback) -> Result<Subscription> {
        Ok(self.broadcaster.subscribe(callback))
    }

    fn start(&self) -> Result<()> {
        self.started.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn stop(&self) -> Result<()> {
        self.started.store(false, Ordering::SeqCst);
        Ok(())
    }
}

/// Publish clones of `frame` every `interval` until `stop` is set.
/// Returns the number of frames published.
pub fn spawn_publisher(
    source: Arc<ManualSource>,
    frame: Frame,
    interval: Duration,
    stop: Arc<AtomicBool>,
) -> JoinHandle<usize> {
    thread::spawn(move || {
        let mut published = 0;
        while !stop.load(Ordering::SeqCst) {
            source.publish(frame.clone());
            published += 1;
            thread::sleep(interval);
        }
        published
    })
}
