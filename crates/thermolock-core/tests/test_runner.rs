mod common;

use std::sync::atomic::{AtomicBool, AtomicUsize};
use std::sync::atomic::Ordering;
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use approx::assert_relative_eq;

use thermolock_core::cancel::CancellationToken;
use thermolock_core::error::{LockInError, Result};
use thermolock_core::frame::Frame;
use thermolock_core::lockin::{DisplayRange, LockInMeasurementRunner, LockInProgress, RunOptions};
use thermolock_core::sim::{SimulatedHeater, SyntheticCamera, SyntheticCameraConfig};
use thermolock_core::source::FrameSource;
use thermolock_core::temperature::{LinearTemperatureConverter, TemperatureConverter};

use common::{spawn_publisher, uniform_frame, ManualSource, RecordingStimulus, StimulusCall};

fn manual_runner(width: usize, height: usize) -> (Arc<ManualSource>, LockInMeasurementRunner) {
    let source = Arc::new(ManualSource::new(width, height));
    let runner = LockInMeasurementRunner::new(source.clone());
    (source, runner)
}

#[test]
fn test_invalid_options_rejected_before_any_switching() {
    let (_source, runner) = manual_runner(2, 2);
    let stimulus = Arc::new(RecordingStimulus::new());
    let cancel = CancellationToken::new();

    let invalid = [
        RunOptions::new(0.0, Duration::from_secs(1)),
        RunOptions::new(-1.0, Duration::from_secs(1)),
        RunOptions::new(1.0, Duration::ZERO),
        RunOptions::new(1.0, Duration::from_secs(1)).with_duty_cycle(0.0),
        RunOptions::new(1.0, Duration::from_secs(1)).with_duty_cycle(1.0),
        RunOptions::new(1.0, Duration::from_secs(1)).with_phase_bins(0),
        RunOptions::new(1e-20, Duration::from_millis(50)),
        RunOptions::new(1.0, Duration::from_secs(u64::MAX)),
        RunOptions::new(1.0, Duration::from_secs(1)).with_settle(Duration::MAX),
    ];
    for options in invalid {
        let err = runner.run(stimulus.clone(), options, &cancel).unwrap_err();
        assert!(matches!(err, LockInError::InvalidArgument(_)));
    }
    assert!(stimulus.calls().is_empty());
}

#[test]
fn test_settle_longer_than_duration_never_turns_on() {
    let (source, runner) = manual_runner(2, 2);
    let stimulus = Arc::new(RecordingStimulus::new());
    let options = RunOptions::new(5.0, Duration::from_millis(50)).with_settle(Duration::from_millis(150));

    let result = runner
        .run(stimulus.clone(), options, &CancellationToken::new())
        .unwrap();

    assert_eq!(stimulus.count(StimulusCall::On), 0);
    assert_eq!(stimulus.last(), Some(StimulusCall::Off));
    assert_eq!(result.sample_count(), 0);
    assert_eq!(source.subscriber_count(), 0);
}

#[test]
fn test_cancel_mid_run_ends_with_turn_off() {
    let (_source, runner) = manual_runner(2, 2);
    let stimulus = Arc::new(RecordingStimulus::new());
    let cancel = CancellationToken::new();

    let remote = cancel.clone();
    let canceller = thread::spawn(move || {
        thread::sleep(Duration::from_millis(150));
        remote.cancel();
    });

    let started = Instant::now();
    let options = RunOptions::new(20.0, Duration::from_secs(30));
    let err = runner.run(stimulus.clone(), options, &cancel).unwrap_err();
    canceller.join().unwrap();

    assert!(matches!(err, LockInError::Cancelled));
    assert!(started.elapsed() < Duration::from_secs(10));
    assert!(stimulus.count(StimulusCall::On) >= 1);
    assert_eq!(stimulus.last(), Some(StimulusCall::Off));
}

#[test]
fn test_cancel_during_settle() {
    let (source, runner) = manual_runner(2, 2);
    let stimulus = Arc::new(RecordingStimulus::new());
    let cancel = CancellationToken::new();
    cancel.cancel();

    let options = RunOptions::new(1.0, Duration::from_secs(5)).with_settle(Duration::from_secs(5));
    let err = runner.run(stimulus.clone(), options, &cancel).unwrap_err();

    assert!(matches!(err, LockInError::Cancelled));
    assert_eq!(stimulus.count(StimulusCall::On), 0);
    assert_eq!(stimulus.last(), Some(StimulusCall::Off));
    assert_eq!(source.subscriber_count(), 0);
}

#[test]
fn test_failing_stimulus_does_not_abort_run() {
    let (_source, runner) = manual_runner(2, 2);
    let stimulus = Arc::new(RecordingStimulus::failing_on());
    let options = RunOptions::new(20.0, Duration::from_millis(200));

    runner
        .run(stimulus.clone(), options, &CancellationToken::new())
        .unwrap();

    assert!(stimulus.count(StimulusCall::On) >= 2);
    assert_eq!(stimulus.last(), Some(StimulusCall::Off));
}

#[test]
fn test_mismatched_frames_are_dropped() {
    let (source, runner) = manual_runner(4, 4);
    let stop = Arc::new(AtomicBool::new(false));
    let publisher = spawn_publisher(
        source.clone(),
        uniform_frame(3, 3, 100),
        Duration::from_millis(5),
        stop.clone(),
    );

    let stimulus = Arc::new(RecordingStimulus::new());
    let result = runner
        .run(
            stimulus,
            RunOptions::new(5.0, Duration::from_millis(200)),
            &CancellationToken::new(),
        )
        .unwrap();
    stop.store(true, Ordering::SeqCst);
    assert!(publisher.join().unwrap() > 0);

    assert_eq!(result.sample_count(), 0);
    assert_eq!(source.subscriber_count(), 0);
    assert!(matches!(
        result.accumulator.frame_at_angle(0.0, true, DisplayRange::AUTO),
        Err(LockInError::NoSamples)
    ));
}

#[test]
fn test_preprocess_and_selector_applied() {
    let (source, runner) = manual_runner(2, 2);
    let stop = Arc::new(AtomicBool::new(false));
    let publisher = spawn_publisher(
        source.clone(),
        uniform_frame(2, 2, 10),
        Duration::from_millis(5),
        stop.clone(),
    );

    // 20 raw counts span 0..100 °C; the preprocess doubles every sample.
    let celsius = LinearTemperatureConverter::new(0, 20, 0.0, 100.0)
        .unwrap()
        .into_selector();
    let options = RunOptions::new(5.0, Duration::from_millis(200))
        .with_preprocess(Arc::new(|frame: &Frame| -> Result<Frame> {
            Ok(uniform_frame(frame.width(), frame.height(), frame.samples()[0] * 2))
        }))
        .with_sample_selector(celsius);

    let result = runner
        .run(Arc::new(RecordingStimulus::new()), options, &CancellationToken::new())
        .unwrap();
    stop.store(true, Ordering::SeqCst);
    publisher.join().unwrap();

    let n = result.sample_count();
    assert!(n > 0);
    let dc = result.accumulator.dc_sum().unwrap();
    assert_relative_eq!(dc[[1, 1]], 100.0 * n as f64, max_relative = 1e-12);
}

#[test]
fn test_failing_preprocess_drops_frames() {
    let (source, runner) = manual_runner(2, 2);
    let stop = Arc::new(AtomicBool::new(false));
    let publisher = spawn_publisher(
        source.clone(),
        uniform_frame(2, 2, 10),
        Duration::from_millis(5),
        stop.clone(),
    );

    let options = RunOptions::new(5.0, Duration::from_millis(150))
        .with_preprocess(Arc::new(|_: &Frame| -> Result<Frame> {
            Err(LockInError::InvalidArgument("corrupt frame".into()))
        }));
    let result = runner
        .run(Arc::new(RecordingStimulus::new()), options, &CancellationToken::new())
        .unwrap();
    stop.store(true, Ordering::SeqCst);
    publisher.join().unwrap();

    assert_eq!(result.sample_count(), 0);
}

#[test]
fn test_integration_averages_frames() {
    let (source, runner) = manual_runner(2, 2);
    let stop = Arc::new(AtomicBool::new(false));
    let publisher = spawn_publisher(
        source.clone(),
        uniform_frame(2, 2, 40),
        Duration::from_millis(5),
        stop.clone(),
    );

    let options = RunOptions::new(1.0, Duration::from_millis(400))
        .with_integration(Duration::from_millis(50));
    let result = runner
        .run(Arc::new(RecordingStimulus::new()), options, &CancellationToken::new())
        .unwrap();
    stop.store(true, Ordering::SeqCst);
    let published = publisher.join().unwrap();

    let n = result.sample_count();
    assert!(n >= 1, "no integrated samples");
    assert!(n <= 10, "expected about 8 integrated samples, got {n}");
    assert!(n < published);

    // Integrated frames are means of identical frames.
    let dc = result.accumulator.dc_sum().unwrap();
    assert_relative_eq!(dc[[0, 0]], 40.0 * n as f64);
}

#[test]
fn test_simulated_measurement_locates_hot_spot() {
    let heater = Arc::new(SimulatedHeater::new());
    let config = SyntheticCameraConfig {
        width: 16,
        height: 12,
        fps: 100.0,
        background: 100.0,
        hotspot_sigma: 3.0,
        thermal_time_constant_ms: 20.0,
        noise: 5.0,
        fixed_pattern: 0.0,
        ..SyntheticCameraConfig::default()
    };
    let camera = Arc::new(SyntheticCamera::new(config, &heater).unwrap());
    camera.start().unwrap();

    let reports: Arc<Mutex<Vec<LockInProgress>>> = Arc::new(Mutex::new(Vec::new()));
    let sink = reports.clone();
    let options = RunOptions::new(5.0, Duration::from_millis(800))
        .with_progress(Arc::new(move |p: &LockInProgress| {
            sink.lock().unwrap().push(p.clone());
        }))
        .with_progress_interval(Duration::from_millis(50));

    let runner = LockInMeasurementRunner::new(camera.clone());
    let result = runner
        .run(heater.clone(), options, &CancellationToken::new())
        .unwrap();
    camera.stop().unwrap();

    assert!(!heater.is_on());
    assert!(heater.switch_count() >= 4);
    assert!(result.sample_count() > 20);
    assert_relative_eq!(result.frequency_hz, 5.0);

    let amplitude = result.accumulator.amplitude(true, false);
    assert_eq!(amplitude.dim(), (12, 16));
    assert!(
        amplitude[[5, 7]] > 5.0 * amplitude[[0, 0]],
        "hot spot {} vs corner {}",
        amplitude[[5, 7]],
        amplitude[[0, 0]]
    );

    let reports = reports.lock().unwrap();
    assert!(reports.len() >= 2);
    let last = reports.last().unwrap();
    assert_relative_eq!(last.percent(), 100.0);
    assert_relative_eq!(last.frequency_hz, 5.0);
}

#[test]
fn test_stimulus_state_reaches_on_and_off_bins() {
    let (source, runner) = manual_runner(2, 2);
    let stop = Arc::new(AtomicBool::new(false));
    let publisher = spawn_publisher(
        source.clone(),
        uniform_frame(2, 2, 10),
        Duration::from_millis(5),
        stop.clone(),
    );

    let options = RunOptions::new(5.0, Duration::from_millis(400)).with_phase_bins(4);
    let result = runner
        .run(Arc::new(RecordingStimulus::new()), options, &CancellationToken::new())
        .unwrap();
    stop.store(true, Ordering::SeqCst);
    publisher.join().unwrap();

    let acc = &result.accumulator;
    let on: usize = (0..acc.phase_bins()).map(|b| acc.on_count(b)).sum();
    let off: usize = (0..acc.phase_bins()).map(|b| acc.off_count(b)).sum();
    assert!(on > 0, "no frames tagged ON");
    assert!(off > 0, "no frames tagged OFF");
    assert_eq!(on + off, result.sample_count());
}

#[test]
fn test_duty_cycle_sets_on_off_spacing() {
    let (_source, runner) = manual_runner(2, 2);
    let stimulus = Arc::new(RecordingStimulus::new());

    // 200 ms period: 50 ms ON, 150 ms OFF.
    let options = RunOptions::new(5.0, Duration::from_millis(1000)).with_duty_cycle(0.25);
    runner
        .run(stimulus.clone(), options, &CancellationToken::new())
        .unwrap();

    let calls = stimulus.timed_calls();
    let mut on_spans = Vec::new();
    let mut off_spans = Vec::new();
    for pair in calls.windows(2) {
        let ((from, at), (to, next)) = (pair[0], pair[1]);
        let span = next.duration_since(at);
        match (from, to) {
            (StimulusCall::On, StimulusCall::Off) => on_spans.push(span),
            (StimulusCall::Off, StimulusCall::On) => off_spans.push(span),
            _ => {}
        }
    }
    assert!(on_spans.len() >= 3, "only {} ON spans", on_spans.len());
    assert!(off_spans.len() >= 2, "only {} OFF spans", off_spans.len());

    let median = |spans: &mut Vec<Duration>| {
        spans.sort();
        spans[spans.len() / 2].as_secs_f64()
    };
    let on = median(&mut on_spans);
    let off = median(&mut off_spans);
    assert!((0.03..0.09).contains(&on), "ON span {on}");
    let ratio = off / on;
    assert!((2.0..4.5).contains(&ratio), "OFF/ON ratio {ratio}");
}

#[test]
fn test_panicking_preprocess_drops_only_that_frame() {
    let (source, runner) = manual_runner(2, 2);
    let stop = Arc::new(AtomicBool::new(false));
    let publisher = spawn_publisher(
        source.clone(),
        uniform_frame(2, 2, 10),
        Duration::from_millis(5),
        stop.clone(),
    );

    let seen = Arc::new(AtomicUsize::new(0));
    let counter = seen.clone();
    let options = RunOptions::new(5.0, Duration::from_millis(200)).with_preprocess(Arc::new(
        move |frame: &Frame| -> Result<Frame> {
            if counter.fetch_add(1, Ordering::SeqCst) % 2 == 0 {
                panic!("corrupt frame");
            }
            Ok(frame.clone())
        },
    ));
    let result = runner
        .run(Arc::new(RecordingStimulus::new()), options, &CancellationToken::new())
        .unwrap();
    stop.store(true, Ordering::SeqCst);
    publisher.join().unwrap();

    let n = result.sample_count();
    assert!(n > 0);
    assert!(n < seen.load(Ordering::SeqCst));
    assert_relative_eq!(result.accumulator.dc_sum().unwrap()[[0, 0]], 10.0 * n as f64);
}
