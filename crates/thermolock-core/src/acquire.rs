use std::sync::mpsc;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tracing::{debug, info};

use crate::cancel::CancellationToken;
use crate::error::{LockInError, Result};
use crate::frame::Frame;
use crate::lockin::FramePreprocess;
use crate::source::FrameSource;
use crate::stack::FrameAccumulator;

/// Wait for the next frame the source delivers.
///
/// The source must already be started. Fails with `Timeout` if nothing
/// arrives within `timeout`.
pub fn capture_single_frame(source: &dyn FrameSource, timeout: Duration) -> Result<Frame> {
    let (tx, rx) = mpsc::sync_channel::<Arc<Frame>>(1);
    let subscription = source.subscribe(Box::new(move |frame: &Arc<Frame>| {
        let _ = tx.try_send(Arc::clone(frame));
    }))?;

    let received = rx.recv_timeout(timeout);
    subscription.unsubscribe();

    match received {
        Ok(frame) => Ok(Arc::unwrap_or_clone(frame)),
        Err(_) => Err(LockInError::Timeout(timeout)),
    }
}

/// Start the source, sum every frame delivered over `duration`, stop it and
/// build the mean (or min/max-normalized) frame.
///
/// Frames that fail preprocessing or do not match the source geometry are
/// skipped. The result covers the visible area only.
pub fn acquire_sum(
    source: &dyn FrameSource,
    duration: Duration,
    meta_rows: usize,
    preprocess: Option<FramePreprocess>,
    normalize: bool,
    cancel: &CancellationToken,
) -> Result<Frame> {
    if duration.is_zero() {
        return Err(LockInError::InvalidArgument(
            "acquisition duration must be positive".into(),
        ));
    }

    let accumulator = Arc::new(Mutex::new(FrameAccumulator::new(
        source.width(),
        source.height(),
        meta_rows,
    )));
    let sink = Arc::clone(&accumulator);
    let subscription = source.subscribe(Box::new(move |frame: &Arc<Frame>| {
        let added = match &preprocess {
            Some(preprocess) => preprocess(frame.as_ref())
                .and_then(|corrected| sink.lock().unwrap_or_else(|e| e.into_inner()).add(&corrected)),
            None => sink.lock().unwrap_or_else(|e| e.into_inner()).add(frame),
        };
        if let Err(e) = added {
            debug!(error = %e, "Frame skipped during acquisition");
        }
    }))?;

    source.start()?;
    let cancelled = cancel.wait_timeout(duration);
    let stopped = source.stop();
    subscription.unsubscribe();
    stopped?;

    if cancelled {
        return Err(LockInError::Cancelled);
    }

    let accumulator = accumulator.lock().unwrap_or_else(|e| e.into_inner());
    info!(
        frames = accumulator.count(),
        duration_ms = duration.as_millis() as u64,
        normalize,
        "Acquisition finished"
    );
    accumulator.build(normalize)
}
