//! Per-path watcher that owns one native handle.
//!
//! A `HandleWatcher` turns raw source events into normalized events and fans
//! them out to its subscribers. Raw renames are ambiguous: a file moved away
//! and a file replaced by an editor's temp-file-and-rename save look the same.
//! The watcher releases its handle, waits for the settle delay, then re-stats
//! the original path to tell the two apart.
//!
//! ```text
//! Watching --rename--> PendingRenameCheck --settle(exists)--> Watching (change)
//!    |                        |-----------settle(gone)-----> Watching (rename)
//!    |--delete--> Closed <----|--reopen failed / no target
//! ```

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use super::error::WatchError;
use super::event::{EventKind, WatchEvent};
use super::registry::HandleRegistry;
use super::scheduler::{Scheduler, SettleCheck};
use super::source::{WatchHandle, WatchSource};

/// Identity of a HandleWatcher within a hub.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct WatcherId(u64);

impl WatcherId {
    #[must_use]
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }
}

impl fmt::Display for WatcherId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "w{}", self.0)
    }
}

/// Identity of one subscription on a HandleWatcher.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ListenerId(u64);

impl ListenerId {
    pub(crate) const fn new(raw: u64) -> Self {
        Self(raw)
    }

    /// Unique per process; subscriptions can move between watchers.
    fn next() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        Self(NEXT.fetch_add(1, Ordering::Relaxed))
    }
}

/// Lifecycle state of a HandleWatcher.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatcherState {
    /// Handle open and registered.
    Watching,
    /// Handle released, waiting to re-stat the path after a raw rename.
    PendingRenameCheck,
    /// Terminal.
    Closed,
}

pub(crate) type ChangeListener = Arc<dyn Fn(&WatchEvent) + Send + Sync>;
pub(crate) type CloseListener = Arc<dyn Fn() + Send + Sync>;

pub(crate) struct Subscriber {
    id: ListenerId,
    on_change: ChangeListener,
    on_close: Option<CloseListener>,
}

/// A listener invocation, queued until the hub releases its state lock.
pub(crate) enum Delivery {
    Change(ChangeListener, WatchEvent),
    Close(CloseListener),
}

impl Delivery {
    pub(crate) fn run(self) {
        match self {
            Self::Change(listener, event) => listener(&event),
            Self::Close(listener) => listener(),
        }
    }
}

/// Collaborators borrowed for a single state transition.
pub(crate) struct WatchContext<'a, S: WatchSource> {
    pub source: &'a mut S,
    pub registry: &'a mut HandleRegistry,
    pub scheduler: &'a dyn Scheduler,
    pub settle_delay: Duration,
}

struct PendingRename {
    generation: u64,
    target: Option<PathBuf>,
    cancel: CancellationToken,
}

pub(crate) struct HandleWatcher {
    id: WatcherId,
    path: PathBuf,
    handle: Option<WatchHandle>,
    state: WatcherState,
    generation: u64,
    pending: Option<PendingRename>,
    subscribers: Vec<Subscriber>,
}

impl HandleWatcher {
    /// Create a watcher and open its first native handle.
    ///
    /// On failure nothing is registered.
    pub(crate) fn open<S: WatchSource>(
        id: WatcherId,
        path: PathBuf,
        ctx: &mut WatchContext<'_, S>,
    ) -> Result<Self, WatchError> {
        let mut watcher = Self {
            id,
            path,
            handle: None,
            state: WatcherState::Watching,
            generation: 0,
            pending: None,
            subscribers: Vec::new(),
        };
        watcher.start(ctx)?;
        Ok(watcher)
    }

    #[cfg(test)]
    pub(crate) fn id(&self) -> WatcherId {
        self.id
    }

    pub(crate) fn path(&self) -> &Path {
        &self.path
    }

    #[cfg(test)]
    pub(crate) fn handle(&self) -> Option<WatchHandle> {
        self.handle
    }

    #[cfg(test)]
    pub(crate) fn state(&self) -> WatcherState {
        self.state
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.state == WatcherState::Closed
    }

    pub(crate) fn subscriber_count(&self) -> usize {
        self.subscribers.len()
    }

    pub(crate) fn subscribe(
        &mut self,
        on_change: ChangeListener,
        on_close: Option<CloseListener>,
    ) -> ListenerId {
        let id = ListenerId::next();
        self.subscribers.push(Subscriber {
            id,
            on_change,
            on_close,
        });
        id
    }

    /// Hand every subscription over to another watcher.
    pub(crate) fn take_subscribers(&mut self) -> Vec<Subscriber> {
        std::mem::take(&mut self.subscribers)
    }

    pub(crate) fn adopt(&mut self, subscribers: Vec<Subscriber>) {
        self.subscribers.extend(subscribers);
    }

    pub(crate) fn unsubscribe(&mut self, listener: ListenerId) -> bool {
        let before = self.subscribers.len();
        self.subscribers.retain(|s| s.id != listener);
        self.subscribers.len() != before
    }

    /// Open a native handle on the current path and register it.
    fn start<S: WatchSource>(&mut self, ctx: &mut WatchContext<'_, S>) -> Result<(), WatchError> {
        let handle = ctx.source.watch(&self.path)?;
        if !ctx.registry.register(handle, self.id) {
            if let Err(e) = ctx.source.unwatch(handle) {
                tracing::warn!(
                    watcher = %self.id,
                    %handle,
                    error = %e,
                    "Failed to release refused watch"
                );
            }
            return Err(WatchError::platform(
                self.path.clone(),
                notify::Error::generic("native handle already owned by another watcher"),
            ));
        }
        self.handle = Some(handle);
        self.state = WatcherState::Watching;
        tracing::debug!(
            watcher = %self.id,
            %handle,
            path = %self.path.display(),
            "Opened native watch"
        );
        Ok(())
    }

    fn release_handle<S: WatchSource>(&mut self, ctx: &mut WatchContext<'_, S>) {
        let Some(handle) = self.handle.take() else {
            return;
        };
        ctx.registry.unregister(handle);
        if let Err(e) = ctx.source.unwatch(handle) {
            tracing::warn!(watcher = %self.id, %handle, error = %e, "Failed to release native watch");
        }
        tracing::debug!(watcher = %self.id, %handle, "Released native watch");
    }

    /// Handle a raw event routed from the registry.
    pub(crate) fn on_event<S: WatchSource>(
        &mut self,
        kind: EventKind,
        path: Option<PathBuf>,
        ctx: &mut WatchContext<'_, S>,
        out: &mut Vec<Delivery>,
    ) {
        if self.state != WatcherState::Watching {
            tracing::trace!(watcher = %self.id, state = ?self.state, %kind, "Ignoring raw event");
            return;
        }

        match kind {
            EventKind::Change => self.emit(&WatchEvent::new(EventKind::Change, path), out),
            EventKind::Delete => {
                self.emit(&WatchEvent::new(EventKind::Delete, None), out);
                self.close(ctx, out);
            }
            EventKind::Rename => self.begin_rename_check(path, ctx),
        }
    }

    fn begin_rename_check<S: WatchSource>(
        &mut self,
        target: Option<PathBuf>,
        ctx: &mut WatchContext<'_, S>,
    ) {
        self.release_handle(ctx);
        self.generation += 1;

        let cancel = CancellationToken::new();
        let check = SettleCheck {
            watcher: self.id,
            generation: self.generation,
        };
        ctx.scheduler.schedule(ctx.settle_delay, check, cancel.clone());

        tracing::debug!(
            watcher = %self.id,
            path = %self.path.display(),
            destination = ?target,
            generation = self.generation,
            "Raw rename, waiting to re-stat"
        );
        self.pending = Some(PendingRename {
            generation: self.generation,
            target,
            cancel,
        });
        self.state = WatcherState::PendingRenameCheck;
    }

    /// Resolve a pending rename once the settle delay has elapsed.
    pub(crate) fn settle<S: WatchSource>(
        &mut self,
        generation: u64,
        ctx: &mut WatchContext<'_, S>,
        out: &mut Vec<Delivery>,
    ) {
        let current = self
            .pending
            .as_ref()
            .is_some_and(|p| p.generation == generation);
        if self.state != WatcherState::PendingRenameCheck || !current {
            tracing::trace!(watcher = %self.id, generation, "Stale rename check");
            return;
        }
        let Some(pending) = self.pending.take() else {
            return;
        };

        if ctx.source.path_exists(&self.path) {
            match self.start(ctx) {
                Ok(()) => {
                    tracing::debug!(watcher = %self.id, path = %self.path.display(), "Atomic save");
                    self.emit(&WatchEvent::new(EventKind::Change, None), out);
                }
                Err(e) => self.lose_track(&e, ctx, out),
            }
            return;
        }

        let Some(target) = pending.target else {
            tracing::debug!(
                watcher = %self.id,
                path = %self.path.display(),
                "Moved to an unknown destination"
            );
            self.emit(&WatchEvent::new(EventKind::Delete, None), out);
            self.close(ctx, out);
            return;
        };

        let previous = std::mem::replace(&mut self.path, target);
        match self.start(ctx) {
            Ok(()) => {
                tracing::debug!(
                    watcher = %self.id,
                    from = %previous.display(),
                    to = %self.path.display(),
                    "Renamed"
                );
                self.emit(&WatchEvent::new(EventKind::Rename, Some(self.path.clone())), out);
            }
            Err(e) => self.lose_track(&e, ctx, out),
        }
    }

    fn lose_track<S: WatchSource>(
        &mut self,
        err: &WatchError,
        ctx: &mut WatchContext<'_, S>,
        out: &mut Vec<Delivery>,
    ) {
        tracing::warn!(
            watcher = %self.id,
            path = %self.path.display(),
            error = %err,
            "Could not reopen watch after rename"
        );
        self.emit(&WatchEvent::new(EventKind::Delete, None), out);
        self.close(ctx, out);
    }

    /// Close unconditionally and signal `close` to every subscriber.
    pub(crate) fn close<S: WatchSource>(
        &mut self,
        ctx: &mut WatchContext<'_, S>,
        out: &mut Vec<Delivery>,
    ) {
        if self.state == WatcherState::Closed {
            return;
        }
        if let Some(pending) = self.pending.take() {
            pending.cancel.cancel();
        }
        self.release_handle(ctx);
        self.state = WatcherState::Closed;

        for subscriber in self.subscribers.drain(..) {
            if let Some(on_close) = subscriber.on_close {
                out.push(Delivery::Close(on_close));
            }
        }
        tracing::debug!(watcher = %self.id, path = %self.path.display(), "Closed");
    }

    /// Close if nobody is subscribed. Returns whether the watcher closed.
    pub(crate) fn close_if_no_subscribers<S: WatchSource>(
        &mut self,
        ctx: &mut WatchContext<'_, S>,
        out: &mut Vec<Delivery>,
    ) -> bool {
        if !self.subscribers.is_empty() {
            return false;
        }
        self.close(ctx, out);
        true
    }

    fn emit(&self, event: &WatchEvent, out: &mut Vec<Delivery>) {
        for subscriber in &self.subscribers {
            out.push(Delivery::Change(
                Arc::clone(&subscriber.on_change),
                event.clone(),
            ));
        }
    }
}
