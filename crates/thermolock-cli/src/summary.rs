use console::Style;
use thermolock_core::consts::DEFAULT_EXPORT_MAX_ANGLE_DEG;
use thermolock_core::lockin::LockInResult;

use crate::commands::config::SimulationConfig;

struct Styles {
    title: Style,
    header: Style,
    label: Style,
    value: Style,
    method: Style,
    disabled: Style,
}

impl Styles {
    fn new() -> Self {
        Self {
            title: Style::new().cyan().bold(),
            header: Style::new().cyan().bold(),
            label: Style::new().dim(),
            value: Style::new().bold().white(),
            method: Style::new().green(),
            disabled: Style::new().dim().yellow(),
        }
    }
}

pub fn print_simulation_summary(config: &SimulationConfig, dark_frame: bool) {
    let s = Styles::new();
    let lockin = &config.lockin;
    let camera = &config.camera;

    println!();
    println!("  {}", s.title.apply_to("Lock-in Measurement"));
    println!("  {}", s.title.apply_to("\u{2550}".repeat(19)));
    println!();

    println!("  {}", s.header.apply_to("Stimulus"));
    println!(
        "    {:<12}{}",
        s.label.apply_to("Frequency"),
        s.value.apply_to(format!("{} Hz", lockin.frequency_hz))
    );
    println!(
        "    {:<12}{}",
        s.label.apply_to("Duty"),
        s.value.apply_to(format!("{:.0}%", lockin.duty_cycle * 100.0))
    );
    println!(
        "    {:<12}{}",
        s.label.apply_to("Duration"),
        s.value.apply_to(format!("{} s", lockin.duration_secs))
    );
    match lockin.settle_ms {
        Some(ms) => println!(
            "    {:<12}{}",
            s.label.apply_to("Settle"),
            s.value.apply_to(format!("{ms} ms"))
        ),
        None => println!(
            "    {:<12}{}",
            s.label.apply_to("Settle"),
            s.disabled.apply_to("none")
        ),
    }
    println!();

    println!("  {}", s.header.apply_to("Camera"));
    println!(
        "    {:<12}{}",
        s.label.apply_to("Size"),
        s.value.apply_to(format!("{}x{}", camera.width, camera.height))
    );
    println!(
        "    {:<12}{}",
        s.label.apply_to("Rate"),
        s.value.apply_to(format!("{} fps", camera.fps))
    );
    if camera.meta_rows > 0 {
        println!(
            "    {:<12}{}",
            s.label.apply_to("Metadata"),
            s.value.apply_to(format!("{} rows", camera.meta_rows))
        );
    }
    println!(
        "    {:<12}{}",
        s.label.apply_to("Dark frame"),
        if dark_frame {
            s.method.apply_to("enabled")
        } else {
            s.disabled.apply_to("disabled")
        }
    );
    println!();

    println!("  {}", s.header.apply_to("Demodulation"));
    println!(
        "    {:<12}{}",
        s.label.apply_to("Phase bins"),
        s.value.apply_to(lockin.phase_bins)
    );
    match lockin.integration_ms {
        Some(ms) if ms > 0 => println!(
            "    {:<12}{}",
            s.label.apply_to("Integration"),
            s.value.apply_to(format!("{ms} ms"))
        ),
        _ => println!(
            "    {:<12}{}",
            s.label.apply_to("Integration"),
            s.disabled.apply_to("disabled")
        ),
    }
    println!();
}

pub fn print_measurement_summary(result: &LockInResult, switches: usize, published: u64) {
    let s = Styles::new();
    let acc = &result.accumulator;

    println!();
    println!("  {}", s.header.apply_to("Result"));
    println!(
        "    {:<12}{}",
        s.label.apply_to("Frames"),
        s.value
            .apply_to(format!("{} accepted of {published}", acc.sample_count()))
    );
    println!(
        "    {:<12}{}",
        s.label.apply_to("Switches"),
        s.value.apply_to(switches)
    );
    println!(
        "    {:<12}{}",
        s.label.apply_to("Duration"),
        s.value
            .apply_to(format!("{:.2} s", result.duration.as_secs_f64()))
    );

    if acc.sample_count() == 0 {
        println!(
            "    {:<12}{}",
            s.label.apply_to("Amplitude"),
            s.disabled.apply_to("no frames accepted")
        );
        println!();
        return;
    }

    let amplitude = acc.amplitude(true, false);
    let phase = acc.phase();
    let mut min = f64::INFINITY;
    let mut hottest = ((0, 0), f64::NEG_INFINITY);
    for (index, &value) in amplitude.indexed_iter() {
        min = min.min(value);
        if value > hottest.1 {
            hottest = (index, value);
        }
    }
    let ((row, col), max) = hottest;

    println!(
        "    {:<12}{}",
        s.label.apply_to("Amplitude"),
        s.value.apply_to(format!("{min:.2} .. {max:.2}"))
    );
    println!(
        "    {:<12}{}",
        s.label.apply_to("Hot spot"),
        s.value.apply_to(format!("row {row}, col {col}"))
    );
    println!(
        "    {:<12}{}",
        s.label.apply_to("Phase"),
        s.value
            .apply_to(format!("{:.1}\u{b0}", phase[[row, col]].to_degrees()))
    );
    println!();

    println!("  {}", s.header.apply_to("Differential (ON - OFF)"));
    for angle in acc.bin_center_angles(DEFAULT_EXPORT_MAX_ANGLE_DEG) {
        let label = format!("{angle:.1}\u{b0}");
        match acc.differential_at_angle(angle, true) {
            Ok(diff) => println!(
                "    {:<12}{}",
                s.label.apply_to(label),
                s.value.apply_to(format!(
                    "mean {:+.2}  hot spot {:+.2}",
                    diff.mean().unwrap_or(0.0),
                    diff[[row, col]]
                ))
            ),
            Err(e) => println!(
                "    {:<12}{}",
                s.label.apply_to(label),
                s.disabled.apply_to(e)
            ),
        }
    }
    println!();
}
