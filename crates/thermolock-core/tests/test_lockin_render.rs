mod common;

use std::f64::consts::PI;

use thermolock_core::consts::MID_GRAY_U16;
use thermolock_core::error::LockInError;
use thermolock_core::lockin::{DisplayRange, LockInAccumulator};

use common::{frame_from, uniform_frame};

/// 4x4 pixels, 1 Hz, 90° bins; eight frames over one cycle, ON for the first
/// half at value 100 and OFF for the second half at value 0.
fn half_cycle_scenario() -> LockInAccumulator {
    let mut acc = LockInAccumulator::new(4, 4, 0, 1.0, 4, true).unwrap();
    for k in 0..8 {
        let t = k as f64 * 0.125;
        let on = t < 0.5;
        let frame = uniform_frame(4, 4, if on { 100 } else { 0 });
        acc.add_frame(&frame, t, on).unwrap();
    }
    acc
}

/// Two pixels over two cycles with the stimulus flag alternating every
/// frame, so every bin sees both ON and OFF samples. Pixel 0 reads 100 in the
/// first half of each cycle and 0 in the second; pixel 1 is a constant 50.
/// Frames sit at bin centres.
fn alternating_scenario() -> LockInAccumulator {
    let mut acc = LockInAccumulator::new(2, 1, 0, 1.0, 4, true).unwrap();
    acc.reset(Some(-0.0625));
    for k in 0..16 {
        let hot = if k % 8 < 4 { 100 } else { 0 };
        let frame = frame_from(2, 1, &[hot, 50], 0);
        acc.add_frame(&frame, k as f64 * 0.125, k % 2 == 0).unwrap();
    }
    acc
}

#[test]
fn test_queries_on_empty_accumulator_fail() {
    let acc = LockInAccumulator::new(4, 4, 0, 1.0, 4, true).unwrap();
    assert!(matches!(
        acc.frame_at_angle(0.0, true, DisplayRange::AUTO),
        Err(LockInError::NoSamples)
    ));
    assert!(matches!(
        acc.amplitude_frame(true, DisplayRange::AUTO),
        Err(LockInError::NoSamples)
    ));
    assert!(matches!(acc.phase_frame(true, None), Err(LockInError::NoSamples)));
    assert!(matches!(
        acc.all_angle_frames(true, 180.0, DisplayRange::AUTO),
        Err(LockInError::NoSamples)
    ));
}

#[test]
fn test_half_cycle_positive_differential() {
    let acc = half_cycle_scenario();

    let diff = acc.differential_at_angle(0.0, true).unwrap();
    assert!(diff.iter().all(|&d| (d - 100.0).abs() < 1e-9));

    let frame = acc
        .frame_at_angle(0.0, true, DisplayRange::fixed(-100.0, 100.0))
        .unwrap();
    assert_eq!(frame.width(), 4);
    assert_eq!(frame.height(), 4);
    assert!(frame.samples().iter().all(|&v| v == 65535));
}

#[test]
fn test_half_cycle_has_no_on_samples_at_180() {
    let acc = half_cycle_scenario();
    let err = acc
        .frame_at_angle(180.0, true, DisplayRange::AUTO)
        .unwrap_err();
    assert!(matches!(
        err,
        LockInError::InsufficientSamples {
            bin_on: 2,
            count_on: 0,
            bin_off: 0,
            ..
        }
    ));
}

#[test]
fn test_uniform_differential_renders_mid_gray() {
    let acc = half_cycle_scenario();
    let frame = acc.frame_at_angle(0.0, false, DisplayRange::AUTO).unwrap();
    assert!(frame.samples().iter().all(|&v| v == MID_GRAY_U16));
}

#[test]
fn test_opposite_angles_are_negated() {
    let acc = alternating_scenario();

    let at_0 = acc.differential_at_angle(0.0, true).unwrap();
    let at_180 = acc.differential_at_angle(180.0, true).unwrap();
    for (a, b) in at_0.iter().zip(at_180.iter()) {
        assert!((a + b).abs() < 1e-9);
    }

    let range = DisplayRange::fixed(-100.0, 100.0);
    let frame_0 = acc.frame_at_angle(0.0, true, range).unwrap();
    let frame_180 = acc.frame_at_angle(180.0, true, range).unwrap();
    assert_eq!(frame_0.samples()[0], 65535);
    assert_eq!(frame_180.samples()[0], 0);

    let auto_0 = acc.frame_at_angle(0.0, true, DisplayRange::AUTO).unwrap();
    let auto_180 = acc.frame_at_angle(180.0, true, DisplayRange::AUTO).unwrap();
    assert_eq!(auto_0.samples(), &[65535, 0]);
    assert_eq!(auto_180.samples(), &[0, 65535]);
}

#[test]
fn test_angles_are_periodic() {
    let acc = alternating_scenario();
    for angle in [0.0, 30.0, 100.0, 275.0] {
        let base = acc.frame_at_angle(angle, true, DisplayRange::AUTO).unwrap();
        let wrapped = acc
            .frame_at_angle(angle + 360.0, true, DisplayRange::AUTO)
            .unwrap();
        let negative = acc
            .frame_at_angle(angle - 360.0, true, DisplayRange::AUTO)
            .unwrap();
        assert_eq!(base.samples(), wrapped.samples());
        assert_eq!(base.samples(), negative.samples());
    }
}

#[test]
fn test_all_angle_frames_up_to_limit() {
    let acc = alternating_scenario();

    let half = acc.all_angle_frames(true, 180.0, DisplayRange::AUTO).unwrap();
    let angles: Vec<f64> = half.iter().map(|f| f.angle_deg).collect();
    assert_eq!(angles, vec![45.0, 135.0]);

    let full = acc.all_angle_frames(true, 360.0, DisplayRange::AUTO).unwrap();
    assert_eq!(full.len(), 4);
    assert_eq!(full[2].angle_deg, 225.0);
}

#[test]
fn test_all_angle_frames_propagates_missing_bins() {
    let acc = half_cycle_scenario();
    assert_eq!(
        acc.all_angle_frames(true, 180.0, DisplayRange::AUTO)
            .unwrap()
            .len(),
        2
    );
    assert!(matches!(
        acc.all_angle_frames(true, 360.0, DisplayRange::AUTO),
        Err(LockInError::InsufficientSamples { .. })
    ));
}

#[test]
fn test_amplitude_frame() {
    let acc = alternating_scenario();
    let frame = acc.amplitude_frame(true, DisplayRange::AUTO).unwrap();
    assert_eq!(frame.samples(), &[65535, 0]);

    let flat = half_cycle_scenario();
    let frame = flat.amplitude_frame(true, DisplayRange::AUTO).unwrap();
    assert!(frame.samples().iter().all(|&v| v == 0));
}

#[test]
fn test_phase_frame_with_mask() {
    let acc = alternating_scenario();

    // Pixel 0 responds in quadrature; pixel 1 has no modulation at all.
    let expected = ((PI / 2.0 + PI) / (2.0 * PI) * 65535.0) as u16;
    let frame = acc.phase_frame(true, Some(1.0)).unwrap();
    assert!(frame.samples()[0].abs_diff(expected) <= 1);
    assert_eq!(frame.samples()[1], 0);
}

#[test]
fn test_bin_center_angles() {
    let acc = LockInAccumulator::new(1, 1, 0, 1.0, 36, false).unwrap();
    let angles = acc.bin_center_angles(180.0);
    assert_eq!(angles.len(), 18);
    assert_eq!(angles[0], 5.0);
    assert_eq!(angles[17], 175.0);
    assert_eq!(acc.bin_center_angles(360.0).len(), 36);
}
