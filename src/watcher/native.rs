//! [`WatchSource`] backed by `notify`.
//!
//! Each watched path gets a non-recursive notify watch and a fresh handle.
//! The notify callback runs on notify's own thread; it only translates events
//! and forwards them through the [`EventSink`].

use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use notify::event::{ModifyKind, RenameMode};
use notify::{RecommendedWatcher, RecursiveMode, Watcher};

use super::error::WatchError;
use super::event::{EventKind, RawEvent};
use super::source::{EventSink, WatchHandle, WatchSource};

/// Path/handle routing shared with the notify callback.
///
/// Several handles may share one notify watch; the watch is added with the
/// first handle for a path and removed with the last.
#[derive(Debug, Default)]
struct Routes {
    by_path: HashMap<PathBuf, Vec<WatchHandle>>,
    by_handle: HashMap<WatchHandle, PathBuf>,
}

impl Routes {
    fn own(&self, path: &Path) -> &[WatchHandle] {
        self.by_path.get(path).map_or(&[], Vec::as_slice)
    }

    fn parent(&self, path: &Path) -> &[WatchHandle] {
        path.parent().map_or(&[], |parent| self.own(parent))
    }

    /// Push one event per handle on `path`. Returns whether any were pushed.
    fn push_own(
        &self,
        path: &Path,
        kind: EventKind,
        target: Option<&PathBuf>,
        out: &mut Vec<RawEvent>,
    ) -> bool {
        let handles = self.own(path);
        for &handle in handles {
            out.push(RawEvent::new(kind, handle, target.cloned()));
        }
        !handles.is_empty()
    }

    fn child_change(&self, path: &Path, out: &mut Vec<RawEvent>) {
        for &handle in self.parent(path) {
            out.push(RawEvent::new(
                EventKind::Change,
                handle,
                Some(path.to_path_buf()),
            ));
        }
    }

    /// Record `handle` for `path`. Returns whether it is the first one.
    fn add(&mut self, path: &Path, handle: WatchHandle) -> bool {
        self.by_handle.insert(handle, path.to_path_buf());
        let handles = self.by_path.entry(path.to_path_buf()).or_default();
        handles.push(handle);
        handles.len() == 1
    }

    /// Forget `handle`. Returns its path if it was the last one for it.
    fn remove(&mut self, handle: WatchHandle) -> Option<PathBuf> {
        let path = self.by_handle.remove(&handle)?;
        let handles = self.by_path.get_mut(&path)?;
        handles.retain(|h| *h != handle);
        if handles.is_empty() {
            self.by_path.remove(&path);
            Some(path)
        } else {
            None
        }
    }
}

/// Translate one notify event into raw events for the handles it touches.
///
/// Removal of a watched path is reported as a rename with no destination:
/// editors that save by renaming a temp file over the original surface as a
/// removal of the old inode, and the re-stat decides which case it was.
fn translate(event: &notify::Event, routes: &Routes) -> Vec<RawEvent> {
    let mut out = Vec::new();

    match &event.kind {
        notify::EventKind::Modify(ModifyKind::Name(mode)) => {
            let from = event.paths.first();
            let to = event.paths.get(1);

            let destination = match mode {
                RenameMode::Both => to,
                _ => None,
            };
            let moved = from
                .is_some_and(|p| routes.push_own(p, EventKind::Rename, destination, &mut out));
            if !moved {
                if let Some(to) = to {
                    // Something was moved over the watched path
                    routes.push_own(to, EventKind::Rename, None, &mut out);
                }
            }

            for path in &event.paths {
                routes.child_change(path, &mut out);
            }
        }
        notify::EventKind::Remove(_) => {
            for path in &event.paths {
                if !routes.push_own(path, EventKind::Rename, None, &mut out) {
                    routes.child_change(path, &mut out);
                }
            }
        }
        notify::EventKind::Create(_) | notify::EventKind::Modify(_) => {
            for path in &event.paths {
                if !routes.push_own(path, EventKind::Change, None, &mut out) {
                    routes.child_change(path, &mut out);
                }
            }
        }
        notify::EventKind::Access(_) | notify::EventKind::Any | notify::EventKind::Other => {}
    }

    out
}

fn lock_routes(routes: &Mutex<Routes>) -> MutexGuard<'_, Routes> {
    routes.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Native watch source over the platform's recommended notify backend.
pub struct NotifySource {
    watcher: RecommendedWatcher,
    routes: Arc<Mutex<Routes>>,
    next_handle: u64,
}

impl NotifySource {
    /// Create the notify backend, delivering raw events to `sink`.
    ///
    /// # Errors
    ///
    /// Returns an error if the notify watcher cannot be created.
    pub fn new(sink: EventSink) -> Result<Self, WatchError> {
        let routes = Arc::new(Mutex::new(Routes::default()));
        let callback_routes = Arc::clone(&routes);

        let watcher = notify::recommended_watcher(move |result: notify::Result<notify::Event>| {
            match result {
                Ok(event) => {
                    let raw = translate(&event, &lock_routes(&callback_routes));
                    if raw.is_empty() {
                        tracing::trace!(kind = ?event.kind, paths = ?event.paths, "Unrouted native event");
                    }
                    for event in raw {
                        if !sink.send(event) {
                            return;
                        }
                    }
                }
                Err(e) => {
                    tracing::warn!(error = %e, "Native watch error");
                }
            }
        })?;

        Ok(Self {
            watcher,
            routes,
            next_handle: 0,
        })
    }
}

impl WatchSource for NotifySource {
    fn watch(&mut self, path: &Path) -> Result<WatchHandle, WatchError> {
        self.next_handle += 1;
        let handle = WatchHandle::new(self.next_handle);
        let first = lock_routes(&self.routes).add(path, handle);
        if !first {
            tracing::trace!(%handle, path = %path.display(), "Sharing existing notify watch");
            return Ok(handle);
        }

        if let Err(e) = self.watcher.watch(path, RecursiveMode::NonRecursive) {
            lock_routes(&self.routes).remove(handle);
            return Err(WatchError::platform(path, e));
        }

        tracing::trace!(%handle, path = %path.display(), "notify watch added");
        Ok(handle)
    }

    fn unwatch(&mut self, handle: WatchHandle) -> Result<(), WatchError> {
        let Some(path) = lock_routes(&self.routes).remove(handle) else {
            return Ok(());
        };

        match self.watcher.unwatch(&path) {
            Ok(()) => Ok(()),
            // The kernel already dropped the watch with the inode
            Err(e) if matches!(e.kind, notify::ErrorKind::WatchNotFound) => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

impl fmt::Debug for NotifySource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NotifySource")
            .field("routes", &*lock_routes(&self.routes))
            .finish_non_exhaustive()
    }
}
