//! Raw and normalized watch events.

use std::fmt;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use super::source::WatchHandle;

/// Kind of a watch event, shared by the raw and normalized vocabularies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventKind {
    /// Contents or metadata changed.
    Change,
    /// The watched path moved elsewhere.
    Rename,
    /// The watched path is gone.
    Delete,
}

impl EventKind {
    /// Lowercase name, as used on the wire.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Change => "change",
            Self::Rename => "rename",
            Self::Delete => "delete",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An unprocessed notification from a native watch source.
///
/// For `Rename`, `path` is the destination when the source knows it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawEvent {
    pub kind: EventKind,
    pub handle: WatchHandle,
    pub path: Option<PathBuf>,
}

impl RawEvent {
    #[must_use]
    pub fn new(kind: EventKind, handle: WatchHandle, path: Option<PathBuf>) -> Self {
        Self { kind, handle, path }
    }
}

/// A normalized event delivered to subscribers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WatchEvent {
    pub kind: EventKind,
    pub path: Option<PathBuf>,
}

impl WatchEvent {
    #[must_use]
    pub fn new(kind: EventKind, path: Option<PathBuf>) -> Self {
        Self { kind, path }
    }

    /// Path carried by the event, if any.
    #[must_use]
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }
}

/// Events seen by the listeners of a single `PathWatcher`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PathWatcherEvent {
    /// A normalized event for the watched path.
    Event(WatchEvent),
    /// The watcher was closed, either by its owner or by a teardown.
    Closed,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_kind_display() {
        assert_eq!(EventKind::Change.to_string(), "change");
        assert_eq!(EventKind::Rename.to_string(), "rename");
        assert_eq!(EventKind::Delete.to_string(), "delete");
    }

    #[test]
    fn test_watch_event_serializes_lowercase_kind() {
        let event = WatchEvent::new(EventKind::Rename, Some(PathBuf::from("/tmp/b.txt")));
        let json = serde_json::to_string(&event).unwrap();
        assert_eq!(json, r#"{"kind":"rename","path":"/tmp/b.txt"}"#);
    }

    #[test]
    fn test_watch_event_null_path() {
        let event: WatchEvent = serde_json::from_str(r#"{"kind":"delete","path":null}"#).unwrap();
        assert_eq!(event.kind, EventKind::Delete);
        assert!(event.path().is_none());
    }
}
