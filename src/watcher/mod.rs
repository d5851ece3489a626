//! Shared path watching.
//!
//! A [`WatchHub`] keeps one native watch per resolved path and fans its events
//! out to every [`PathWatcher`] subscribed to that path. Raw events from the
//! [`WatchSource`] are normalized into `change`, `rename` and `delete`; a raw
//! rename is re-checked after a short grace window so that editors' atomic
//! saves surface as a plain `change`.

mod error;
mod event;
mod handle_watcher;
mod hub;
mod native;
mod path_watcher;
mod paths;
mod registry;
mod scheduler;
mod source;

pub use error::WatchError;
pub use event::{EventKind, PathWatcherEvent, RawEvent, WatchEvent};
pub use hub::WatchHub;
pub use native::NotifySource;
pub use path_watcher::PathWatcher;
pub use paths::resolve_path;
pub use source::{EventSink, WatchHandle, WatchSource};
