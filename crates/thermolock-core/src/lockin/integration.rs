use std::time::Duration;

use tracing::debug;

use crate::error::Result;
use crate::frame::Frame;

/// Optional time integration between frame arrival and accumulation.
///
/// With integration enabled, consecutive frames are averaged over a fixed
/// window and the mean frame is accumulated once, stamped at the window's
/// midpoint.
#[derive(Debug)]
pub(crate) enum Integration {
    /// Every frame goes straight to the accumulator.
    Disabled,
    Enabled(IntegrationWindow),
}

impl Integration {
    pub fn new(interval: Option<Duration>, width: usize, height: usize, meta_rows: usize) -> Self {
        match interval {
            Some(interval) if !interval.is_zero() => {
                Self::Enabled(IntegrationWindow::new(interval, width, height, meta_rows))
            }
            _ => Self::Disabled,
        }
    }
}

#[derive(Debug)]
enum WindowState {
    /// No frame seen yet; the first one opens the window.
    Idle,
    Accumulating { opened_at: f64, count: u64 },
}

/// Running per-pixel sum of the frames in the current window.
///
/// Callers validate frame geometry before [`push`](Self::push).
#[derive(Debug)]
pub(crate) struct IntegrationWindow {
    interval_secs: f64,
    width: usize,
    height: usize,
    visible_pixels: usize,
    sum: Vec<u64>,
    meta: Vec<u16>,
    state: WindowState,
}

impl IntegrationWindow {
    fn new(interval: Duration, width: usize, height: usize, meta_rows: usize) -> Self {
        let visible_pixels = width * height.saturating_sub(meta_rows);
        Self {
            interval_secs: interval.as_secs_f64(),
            width,
            height,
            visible_pixels,
            sum: vec![0; visible_pixels],
            meta: Vec::new(),
            state: WindowState::Idle,
        }
    }

    /// Add `frame` arriving at `elapsed` seconds.
    ///
    /// Returns the mean frame and its midpoint time once the window has been
    /// open for at least the interval; the next window opens at `elapsed`.
    pub fn push(&mut self, frame: &Frame, elapsed: f64) -> Result<Option<(Frame, f64)>> {
        let samples = frame.samples();
        for (acc, &v) in self.sum.iter_mut().zip(&samples[..self.visible_pixels]) {
            *acc += v as u64;
        }
        self.meta.clear();
        self.meta.extend_from_slice(&samples[self.visible_pixels..]);

        let (opened_at, count) = match self.state {
            WindowState::Idle => (elapsed, 1),
            WindowState::Accumulating { opened_at, count } => (opened_at, count + 1),
        };

        if elapsed - opened_at < self.interval_secs {
            self.state = WindowState::Accumulating { opened_at, count };
            return Ok(None);
        }

        let mean = self.flush(count, frame.meta_rows())?;
        self.state = WindowState::Accumulating {
            opened_at: elapsed,
            count: 0,
        };
        debug!(frames = count, elapsed, "Integration window flushed");
        Ok(Some((mean, elapsed - self.interval_secs / 2.0)))
    }

    fn flush(&mut self, count: u64, meta_rows: usize) -> Result<Frame> {
        let mut samples = Vec::with_capacity(self.width * self.height);
        samples.extend(self.sum.iter().map(|&s| (s / count) as u16));
        samples.extend_from_slice(&self.meta);
        self.sum.fill(0);
        Frame::from_raw(self.width, self.height, samples, meta_rows)
    }
}
