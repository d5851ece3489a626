//! Native watch source abstraction.
//!
//! A [`WatchSource`] is the per-OS primitive the hub opens handles on. It
//! never touches hub state directly: raw events go through an [`EventSink`],
//! which marshals them onto the hub's control task.

use std::fmt;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use super::error::WatchError;
use super::event::RawEvent;
use super::scheduler::SettleCheck;

/// Opaque identifier of an open native watch.
///
/// Valid between the `watch` that returned it and the matching `unwatch`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct WatchHandle(u64);

impl WatchHandle {
    #[must_use]
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }

    #[must_use]
    pub const fn raw(self) -> u64 {
        self.0
    }
}

impl fmt::Display for WatchHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// A per-OS watch primitive.
pub trait WatchSource: Send + 'static {
    /// Open a native watch on `path`.
    ///
    /// # Errors
    ///
    /// Returns [`WatchError::Platform`] if the path does not exist or cannot
    /// be watched.
    fn watch(&mut self, path: &Path) -> Result<WatchHandle, WatchError>;

    /// Release a native watch. Never called twice for the same handle.
    ///
    /// # Errors
    ///
    /// Returns an error if the platform refuses to release the handle. The
    /// hub logs and otherwise ignores it.
    fn unwatch(&mut self, handle: WatchHandle) -> Result<(), WatchError>;

    /// Re-stat used to classify a raw rename.
    fn path_exists(&self, path: &Path) -> bool {
        std::fs::metadata(path).is_ok()
    }
}

/// Messages processed by the hub's control task.
#[derive(Debug)]
pub(crate) enum Control {
    Raw(RawEvent),
    Settle(SettleCheck),
}

/// Callback endpoint handed to a [`WatchSource`] at construction.
///
/// Safe to use from any thread; every event is queued for the control task.
#[derive(Debug, Clone)]
pub struct EventSink {
    tx: mpsc::UnboundedSender<Control>,
}

impl EventSink {
    pub(crate) fn new(tx: mpsc::UnboundedSender<Control>) -> Self {
        Self { tx }
    }

    /// Queue a raw event for dispatch. Returns `false` once the hub is gone.
    pub fn send(&self, event: RawEvent) -> bool {
        self.tx.send(Control::Raw(event)).is_ok()
    }

    pub(crate) fn settle(&self, check: SettleCheck) -> bool {
        self.tx.send(Control::Settle(check)).is_ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::watcher::EventKind;

    #[test]
    fn test_handle_display() {
        assert_eq!(WatchHandle::new(7).to_string(), "#7");
        assert_eq!(WatchHandle::new(7).raw(), 7);
    }

    #[test]
    fn test_sink_reports_closed_hub() {
        let (tx, rx) = mpsc::unbounded_channel();
        let sink = EventSink::new(tx);
        let event = RawEvent::new(EventKind::Change, WatchHandle::new(1), None);

        assert!(sink.send(event.clone()));
        drop(rx);
        assert!(!sink.send(event));
    }
}
