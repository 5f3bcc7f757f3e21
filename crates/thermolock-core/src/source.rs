use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};

use crate::error::Result;
use crate::frame::Frame;

/// Callback invoked for each delivered frame.
///
/// Runs on the source's delivery thread. It must return quickly and must not
/// block; heavy work belongs on another thread.
pub type FrameCallback = Box<dyn Fn(&Arc<Frame>) + Send + Sync>;

/// A push-style stream of frames (typically a camera).
///
/// # Contract
/// - `width()`/`height()` describe every frame the source delivers.
/// - `subscribe()` registers a callback; the registration lasts until the
///   returned [`Subscription`] is dropped.
/// - `start()`/`stop()` control acquisition; callbacks only fire while started.
pub trait FrameSource: Send + Sync {
    fn width(&self) -> usize;

    fn height(&self) -> usize;

    fn subscribe(&self, callback: FrameCallback) -> Result<Subscription>;

    fn start(&self) -> Result<()>;

    fn stop(&self) -> Result<()>;
}

/// Registration handle. Dropping it unsubscribes.
#[must_use = "dropping a Subscription unsubscribes immediately"]
pub struct Subscription {
    release: Option<Box<dyn FnOnce() + Send>>,
}

impl Subscription {
    pub fn new(release: impl FnOnce() + Send + 'static) -> Self {
        Self {
            release: Some(Box::new(release)),
        }
    }

    /// Unsubscribe now rather than at end of scope.
    pub fn unsubscribe(mut self) {
        self.release_now();
    }

    fn release_now(&mut self) {
        if let Some(release) = self.release.take() {
            release();
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.release_now();
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("active", &self.release.is_some())
            .finish()
    }
}

type Subscribers = Mutex<Vec<(u64, Arc<FrameCallback>)>>;

/// Subscriber registry that frame sources embed to fan frames out.
///
/// `publish` snapshots the subscriber list before invoking callbacks, so a
/// callback may subscribe or unsubscribe without deadlocking.
#[derive(Default)]
pub struct FrameBroadcaster {
    subscribers: Arc<Subscribers>,
    next_id: AtomicU64,
}

impl FrameBroadcaster {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self, callback: FrameCallback) -> Subscription {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.subscribers
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push((id, Arc::new(callback)));

        let registry: Weak<Subscribers> = Arc::downgrade(&self.subscribers);
        Subscription::new(move || {
            if let Some(registry) = registry.upgrade() {
                registry
                    .lock()
                    .unwrap_or_else(|e| e.into_inner())
                    .retain(|(sid, _)| *sid != id);
            }
        })
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .len()
    }

    /// Deliver `frame` to every current subscriber.
    pub fn publish(&self, frame: Frame) {
        let frame = Arc::new(frame);
        let snapshot: Vec<Arc<FrameCallback>> = self
            .subscribers
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .map(|(_, cb)| Arc::clone(cb))
            .collect();
        for callback in snapshot {
            callback(&frame);
        }
    }
}

impl fmt::Debug for FrameBroadcaster {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FrameBroadcaster")
            .field("subscribers", &self.subscriber_count())
            .finish()
    }
}
