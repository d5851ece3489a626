//! Watch hub: the registry context behind the public API.
//!
//! All registry and HandleWatcher state lives behind one mutex and is only
//! mutated by the hub, either from API calls or from the control task that
//! drains raw events and rename checks. Listeners always run after the lock
//! is released, so they may call back into the hub.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::AtomicBool;
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::Duration;

use tokio::runtime::Handle;
use tokio::sync::{broadcast, mpsc};
use tokio_util::sync::CancellationToken;

use crate::config::WatchConfig;

use super::error::WatchError;
use super::event::{RawEvent, WatchEvent};
use super::handle_watcher::{
    ChangeListener, CloseListener, Delivery, HandleWatcher, ListenerId, WatchContext, WatcherId,
};
use super::native::NotifySource;
use super::path_watcher::{Callback, Detach, PathWatcher};
use super::paths::resolve_path;
use super::registry::HandleRegistry;
use super::scheduler::{Scheduler, SettleCheck, TokioScheduler};
use super::source::{Control, EventSink, WatchSource};

struct WatchState<S: WatchSource> {
    source: S,
    scheduler: Box<dyn Scheduler>,
    registry: HandleRegistry,
    watchers: HashMap<WatcherId, HandleWatcher>,
    by_path: HashMap<PathBuf, WatcherId>,
    /// Watchers folded into another after a rename, keyed to their new owner.
    merged: HashMap<WatcherId, WatcherId>,
    next_watcher: u64,
    settle_delay: Duration,
}

impl<S: WatchSource> WatchState<S> {
    fn parts(&mut self) -> (&mut HashMap<WatcherId, HandleWatcher>, WatchContext<'_, S>) {
        (
            &mut self.watchers,
            WatchContext {
                source: &mut self.source,
                registry: &mut self.registry,
                scheduler: self.scheduler.as_ref(),
                settle_delay: self.settle_delay,
            },
        )
    }

    /// Bring the path index in line with a watcher after a transition.
    fn reconcile(&mut self, id: WatcherId, old_path: &Path, out: &mut Vec<Delivery>) {
        let Some(watcher) = self.watchers.get(&id) else {
            return;
        };
        let path = watcher.path().to_path_buf();

        if watcher.is_closed() {
            self.forget(id);
            self.unindex(old_path, id);
            self.unindex(&path, id);
            return;
        }

        if path.as_path() != old_path {
            self.unindex(old_path, id);
            match self.by_path.get(&path).copied() {
                None => {
                    self.by_path.insert(path, id);
                }
                Some(owner) => self.merge(id, owner, out),
            }
        }
    }

    /// Fold a watcher that was renamed onto an already-watched path into
    /// that path's owner, keeping one native handle per path.
    fn merge(&mut self, from: WatcherId, into: WatcherId, out: &mut Vec<Delivery>) {
        if !self.watchers.contains_key(&into) {
            return;
        }
        let Some(mut renamed) = self.watchers.remove(&from) else {
            return;
        };
        let subscribers = renamed.take_subscribers();
        let count = subscribers.len();
        {
            let (watchers, mut ctx) = self.parts();
            renamed.close(&mut ctx, out);
            if let Some(owner) = watchers.get_mut(&into) {
                owner.adopt(subscribers);
            }
        }

        for owner in self.merged.values_mut() {
            if *owner == from {
                *owner = into;
            }
        }
        self.merged.insert(from, into);
        tracing::debug!(
            watcher = %from,
            owner = %into,
            subscribers = count,
            path = %renamed.path().display(),
            "Renamed onto a watched path, merged into its owner"
        );
    }

    fn forget(&mut self, id: WatcherId) {
        self.watchers.remove(&id);
        self.merged.retain(|from, owner| *from != id && *owner != id);
    }

    fn resolve(&self, id: WatcherId) -> WatcherId {
        self.merged.get(&id).copied().unwrap_or(id)
    }

    fn unindex(&mut self, path: &Path, id: WatcherId) {
        if self.by_path.get(path) == Some(&id) {
            self.by_path.remove(path);
        }
    }
}

struct Shared<S: WatchSource> {
    state: Mutex<WatchState<S>>,
    channel_capacity: usize,
}

impl<S: WatchSource> Shared<S> {
    fn lock(&self) -> MutexGuard<'_, WatchState<S>> {
        self.state.lock().expect("Mutex poisoned")
    }

    fn attach(
        &self,
        path: &Path,
        on_change: ChangeListener,
        on_close: CloseListener,
    ) -> Result<(WatcherId, ListenerId), WatchError> {
        let mut state = self.lock();

        if let Some(id) = state.by_path.get(path).copied() {
            if let Some(watcher) = state.watchers.get_mut(&id) {
                let listener = watcher.subscribe(on_change, Some(on_close));
                tracing::debug!(
                    watcher = %id,
                    path = %path.display(),
                    subscribers = watcher.subscriber_count(),
                    "Joined existing watch"
                );
                return Ok((id, listener));
            }
        }

        state.next_watcher += 1;
        let id = WatcherId::new(state.next_watcher);
        let (watchers, mut ctx) = state.parts();
        let mut watcher = HandleWatcher::open(id, path.to_path_buf(), &mut ctx)?;
        let listener = watcher.subscribe(on_change, Some(on_close));
        watchers.insert(id, watcher);
        state.by_path.insert(path.to_path_buf(), id);
        Ok((id, listener))
    }

    fn dispatch(&self, event: RawEvent) {
        let mut out = Vec::new();
        {
            let mut state = self.lock();
            let Some(id) = state.registry.lookup(event.handle) else {
                tracing::trace!(
                    handle = %event.handle,
                    kind = %event.kind,
                    "Dropping event for closed handle"
                );
                return;
            };
            let (watchers, mut ctx) = state.parts();
            let Some(watcher) = watchers.get_mut(&id) else {
                return;
            };
            let old_path = watcher.path().to_path_buf();
            watcher.on_event(event.kind, event.path, &mut ctx, &mut out);
            state.reconcile(id, &old_path, &mut out);
        }
        deliver(out);
    }

    fn settle(&self, check: SettleCheck) {
        let mut out = Vec::new();
        {
            let mut state = self.lock();
            let (watchers, mut ctx) = state.parts();
            let Some(watcher) = watchers.get_mut(&check.watcher) else {
                tracing::trace!(watcher = %check.watcher, "Rename check for a closed watcher");
                return;
            };
            let old_path = watcher.path().to_path_buf();
            watcher.settle(check.generation, &mut ctx, &mut out);
            state.reconcile(check.watcher, &old_path, &mut out);
        }
        deliver(out);
    }

    fn close_all(&self) {
        let mut out = Vec::new();
        {
            let mut state = self.lock();
            let (watchers, mut ctx) = state.parts();
            let count = watchers.len();
            for watcher in watchers.values_mut() {
                watcher.close(&mut ctx, &mut out);
            }
            watchers.clear();
            state.by_path.clear();
            state.merged.clear();
            state.registry.clear();
            if count > 0 {
                tracing::debug!(count, "Closed all watchers");
            }
        }
        deliver(out);
    }

    fn watched_paths(&self) -> Vec<PathBuf> {
        let state = self.lock();
        let mut paths: Vec<PathBuf> = state
            .watchers
            .values()
            .filter(|w| !w.is_closed())
            .map(|w| w.path().to_path_buf())
            .collect();
        paths.sort();
        paths.dedup();
        paths
    }
}

impl<S: WatchSource> Detach for Shared<S> {
    fn detach(&self, id: WatcherId, listener: ListenerId) {
        let mut out = Vec::new();
        {
            let mut state = self.lock();
            let id = state.resolve(id);
            let (watchers, mut ctx) = state.parts();
            let Some(watcher) = watchers.get_mut(&id) else {
                return;
            };
            if !watcher.unsubscribe(listener) {
                return;
            }
            let old_path = watcher.path().to_path_buf();
            watcher.close_if_no_subscribers(&mut ctx, &mut out);
            state.reconcile(id, &old_path, &mut out);
        }
        deliver(out);
    }
}

fn deliver(out: Vec<Delivery>) {
    for delivery in out {
        delivery.run();
    }
}

async fn control_loop<S: WatchSource>(
    shared: Arc<Shared<S>>,
    mut rx: mpsc::UnboundedReceiver<Control>,
    shutdown: CancellationToken,
) {
    tracing::debug!("Watch control loop started");
    loop {
        tokio::select! {
            biased;

            () = shutdown.cancelled() => break,

            msg = rx.recv() => match msg {
                Some(Control::Raw(event)) => shared.dispatch(event),
                Some(Control::Settle(check)) => shared.settle(check),
                None => break,
            },
        }
    }
    tracing::debug!("Watch control loop stopped");
}

/// Process-scoped registry of shared watches.
///
/// Each distinct resolved path gets at most one native watch, shared by every
/// [`PathWatcher`] created for it. Dropping the hub closes everything.
pub struct WatchHub<S: WatchSource = NotifySource> {
    shared: Arc<Shared<S>>,
    shutdown: CancellationToken,
    settle_delay: Duration,
}

impl WatchHub<NotifySource> {
    /// Create a hub over the platform's recommended notify backend.
    ///
    /// # Errors
    ///
    /// Returns an error if called outside a tokio runtime or if the notify
    /// backend cannot be initialized.
    pub fn new(config: &WatchConfig) -> Result<Self, WatchError> {
        Self::with_source(config, NotifySource::new)
    }
}

impl<S: WatchSource> WatchHub<S> {
    /// Create a hub over a custom [`WatchSource`].
    ///
    /// `make_source` receives the sink the source must deliver raw events to.
    ///
    /// # Errors
    ///
    /// Returns [`WatchError::NoRuntime`] outside a tokio runtime, or whatever
    /// `make_source` fails with.
    pub fn with_source<F>(config: &WatchConfig, make_source: F) -> Result<Self, WatchError>
    where
        F: FnOnce(EventSink) -> Result<S, WatchError>,
    {
        let runtime = Handle::try_current().map_err(|_| WatchError::NoRuntime)?;
        let (tx, rx) = mpsc::unbounded_channel();
        let sink = EventSink::new(tx);
        let source = make_source(sink.clone())?;
        let settle_delay = config.settle_delay();

        let shared = Arc::new(Shared {
            state: Mutex::new(WatchState {
                source,
                scheduler: Box::new(TokioScheduler::new(runtime.clone(), sink)),
                registry: HandleRegistry::new(),
                watchers: HashMap::new(),
                by_path: HashMap::new(),
                merged: HashMap::new(),
                next_watcher: 0,
                settle_delay,
            }),
            channel_capacity: config.channel_capacity.max(1),
        });

        let shutdown = CancellationToken::new();
        runtime.spawn(control_loop(Arc::clone(&shared), rx, shutdown.clone()));
        tracing::debug!(settle_delay = ?settle_delay, "Watch hub started");

        Ok(Self {
            shared,
            shutdown,
            settle_delay,
        })
    }

    /// Watch `path` without a callback; consume events via
    /// [`PathWatcher::subscribe`].
    ///
    /// # Errors
    ///
    /// Returns [`WatchError::Platform`] if the native watch cannot be opened.
    /// No state is left behind on failure.
    ///
    /// # Panics
    ///
    /// Panics if the internal state mutex is poisoned.
    pub fn watch(&self, path: impl AsRef<Path>) -> Result<PathWatcher, WatchError> {
        self.subscribe(path.as_ref(), None)
    }

    /// Watch `path`, invoking `callback` for every normalized event.
    ///
    /// # Errors
    ///
    /// Returns [`WatchError::Platform`] if the native watch cannot be opened.
    /// No state is left behind on failure.
    ///
    /// # Panics
    ///
    /// Panics if the internal state mutex is poisoned.
    pub fn watch_with_callback<F>(
        &self,
        path: impl AsRef<Path>,
        callback: F,
    ) -> Result<PathWatcher, WatchError>
    where
        F: Fn(&WatchEvent) + Send + Sync + 'static,
    {
        self.subscribe(path.as_ref(), Some(Box::new(callback)))
    }

    fn subscribe(&self, path: &Path, callback: Option<Callback>) -> Result<PathWatcher, WatchError> {
        let resolved = resolve_path(path)?;
        let (events, _) = broadcast::channel(self.shared.channel_capacity);
        let closed = Arc::new(AtomicBool::new(false));

        let on_change = PathWatcher::change_listener(callback, Arc::clone(&closed), events.clone());
        let on_close = PathWatcher::close_listener(Arc::clone(&closed), events.clone());
        let (watcher, listener) = self.shared.attach(&resolved, on_change, on_close)?;

        let hub: Weak<Shared<S>> = Arc::downgrade(&self.shared);
        let hub: Weak<dyn Detach> = hub;
        Ok(PathWatcher::new(resolved, watcher, listener, hub, closed, events))
    }

    /// Route a raw event to the watcher that owns its handle.
    ///
    /// Events for handles that are no longer registered are dropped.
    ///
    /// # Panics
    ///
    /// Panics if the internal state mutex is poisoned.
    pub fn dispatch(&self, event: RawEvent) {
        self.shared.dispatch(event);
    }

    /// Force-close every watcher. Pending rename checks become no-ops.
    ///
    /// # Panics
    ///
    /// Panics if the internal state mutex is poisoned.
    pub fn close_all_watchers(&self) {
        self.shared.close_all();
    }

    /// Distinct paths that currently have a live watcher, sorted.
    ///
    /// # Panics
    ///
    /// Panics if the internal state mutex is poisoned.
    #[must_use]
    pub fn watched_paths(&self) -> Vec<PathBuf> {
        self.shared.watched_paths()
    }

    /// Number of open native handles.
    ///
    /// # Panics
    ///
    /// Panics if the internal state mutex is poisoned.
    #[must_use]
    pub fn handle_count(&self) -> usize {
        self.shared.lock().registry.len()
    }

    /// Grace window used to classify raw renames.
    #[must_use]
    pub fn settle_delay(&self) -> Duration {
        self.settle_delay
    }
}

impl<S: WatchSource> Drop for WatchHub<S> {
    fn drop(&mut self) {
        self.shutdown.cancel();
        self.shared.close_all();
    }
}

impl<S: WatchSource> std::fmt::Debug for WatchHub<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WatchHub")
            .field("settle_delay", &self.settle_delay)
            .finish_non_exhaustive()
    }
}
