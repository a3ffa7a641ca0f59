//! Publish/subscribe channel for pipeline state
//!
//! A [`Notifier`] is created by whoever starts a scanning activity and handed
//! to the pipeline; there is no process-wide instance. Emission is synchronous:
//! every current subscriber has been called when an `emit_*` method returns.

use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use tracing::{debug, trace};

use crate::error::ScanError;

/// Receives pipeline signals. All methods default to no-ops.
pub trait ScanObserver: Send + Sync {
    /// Processing started or finished
    fn on_processing_changed(&self, _processing: bool) {}

    /// Text was extracted for a new page
    fn on_text_extracted(&self, _text: &str) {}

    /// A capture or recognition failed
    fn on_error(&self, _error: &ScanError) {}
}

struct Entry {
    id: u64,
    active: AtomicBool,
    observer: Arc<dyn ScanObserver>,
}

#[derive(Default)]
struct Inner {
    observers: Mutex<Vec<Arc<Entry>>>,
    next_id: AtomicU64,
}

/// Observer registry with synchronous fan-out
#[derive(Clone, Default)]
pub struct Notifier {
    inner: Arc<Inner>,
}

impl Notifier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an observer; it receives events until the subscription is cancelled
    pub fn subscribe(&self, observer: Arc<dyn ScanObserver>) -> Subscription {
        let entry = Arc::new(Entry {
            id: self.inner.next_id.fetch_add(1, Ordering::SeqCst),
            active: AtomicBool::new(true),
            observer,
        });
        self.inner.observers.lock().push(entry.clone());
        debug!("Observer {} subscribed", entry.id);

        Subscription {
            entry,
            notifier: Arc::downgrade(&self.inner),
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.inner.observers.lock().len()
    }

    pub fn emit_processing(&self, processing: bool) {
        trace!("Emitting processing={}", processing);
        self.emit(|o| o.on_processing_changed(processing));
    }

    pub fn emit_text(&self, text: &str) {
        trace!("Emitting {} characters of text", text.len());
        self.emit(|o| o.on_text_extracted(text));
    }

    pub fn emit_error(&self, error: &ScanError) {
        trace!("Emitting error: {}", error);
        self.emit(|o| o.on_error(error));
    }

    fn emit(&self, deliver: impl Fn(&dyn ScanObserver)) {
        // Call outside the lock so observers may (un)subscribe from a callback
        let snapshot: Vec<Arc<Entry>> = self.inner.observers.lock().clone();
        for entry in snapshot {
            if entry.active.load(Ordering::SeqCst) {
                deliver(entry.observer.as_ref());
            }
        }
    }
}

/// Handle returned by [`Notifier::subscribe`]
#[must_use = "dropping a Subscription keeps the observer registered; call unsubscribe() to stop events"]
pub struct Subscription {
    entry: Arc<Entry>,
    notifier: Weak<Inner>,
}

impl Subscription {
    /// Stop receiving events. Calling it again is a no-op.
    pub fn unsubscribe(&self) {
        if !self.entry.active.swap(false, Ordering::SeqCst) {
            return;
        }
        if let Some(inner) = self.notifier.upgrade() {
            inner.observers.lock().retain(|e| e.id != self.entry.id);
        }
        debug!("Observer {} unsubscribed", self.entry.id);
    }

    pub fn is_active(&self) -> bool {
        self.entry.active.load(Ordering::SeqCst)
    }
}
