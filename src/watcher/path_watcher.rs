//! Per-subscription watcher handle returned to callers.

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use tokio::sync::broadcast;
use tokio_stream::wrappers::BroadcastStream;

use super::event::{PathWatcherEvent, WatchEvent};
use super::handle_watcher::{ChangeListener, CloseListener, ListenerId, WatcherId};

/// User callback invoked for every normalized event.
pub(crate) type Callback = Box<dyn Fn(&WatchEvent) + Send + Sync>;

/// The hub side of a subscription, as seen by a `PathWatcher`.
pub(crate) trait Detach: Send + Sync {
    fn detach(&self, watcher: WatcherId, listener: ListenerId);
}

/// One subscription to a watched path.
///
/// Events reach two consumers: the callback passed to
/// [`WatchHub::watch_with_callback`](super::WatchHub::watch_with_callback),
/// and any receivers obtained from [`subscribe`](Self::subscribe).
///
/// Closing (or dropping) a `PathWatcher` only affects this subscription. The
/// native watch is released once the last subscriber for the path is gone.
pub struct PathWatcher {
    path: PathBuf,
    watcher: WatcherId,
    listener: ListenerId,
    hub: Weak<dyn Detach>,
    closed: Arc<AtomicBool>,
    events: broadcast::Sender<PathWatcherEvent>,
}

impl PathWatcher {
    pub(crate) fn new(
        path: PathBuf,
        watcher: WatcherId,
        listener: ListenerId,
        hub: Weak<dyn Detach>,
        closed: Arc<AtomicBool>,
        events: broadcast::Sender<PathWatcherEvent>,
    ) -> Self {
        Self {
            path,
            watcher,
            listener,
            hub,
            closed,
            events,
        }
    }

    /// Listener bound on the HandleWatcher's `change` signal.
    ///
    /// Deliveries run after the hub lock is released, so the watcher may have
    /// closed since this one was queued.
    pub(crate) fn change_listener(
        callback: Option<Callback>,
        closed: Arc<AtomicBool>,
        events: broadcast::Sender<PathWatcherEvent>,
    ) -> ChangeListener {
        Arc::new(move |event: &WatchEvent| {
            if closed.load(Ordering::SeqCst) {
                return;
            }
            // Broadcast first: the callback may close this watcher
            let _ = events.send(PathWatcherEvent::Event(event.clone()));
            if let Some(callback) = &callback {
                callback(event);
            }
        })
    }

    /// Listener bound on the HandleWatcher's `close` signal.
    pub(crate) fn close_listener(
        closed: Arc<AtomicBool>,
        events: broadcast::Sender<PathWatcherEvent>,
    ) -> CloseListener {
        Arc::new(move || {
            if !closed.swap(true, Ordering::SeqCst) {
                let _ = events.send(PathWatcherEvent::Closed);
            }
        })
    }

    /// The resolved absolute path this watcher was created for.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Whether this watcher has been closed, by its owner or by a teardown.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Receive this watcher's events on a broadcast channel.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<PathWatcherEvent> {
        self.events.subscribe()
    }

    /// Like [`subscribe`](Self::subscribe), as a `Stream`.
    #[must_use]
    pub fn stream(&self) -> BroadcastStream<PathWatcherEvent> {
        BroadcastStream::new(self.events.subscribe())
    }

    /// Stop receiving events. Calling this more than once is a no-op.
    pub fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        if let Some(hub) = self.hub.upgrade() {
            hub.detach(self.watcher, self.listener);
        }
        let _ = self.events.send(PathWatcherEvent::Closed);
        tracing::debug!(path = %self.path.display(), watcher = %self.watcher, "Path watcher closed");
    }
}

impl Drop for PathWatcher {
    fn drop(&mut self) {
        self.close();
    }
}

impl fmt::Debug for PathWatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PathWatcher")
            .field("path", &self.path)
            .field("watcher", &self.watcher)
            .field("closed", &self.is_closed())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::watcher::EventKind;
    use std::sync::Mutex;

    #[derive(Default)]
    struct CountingHub {
        detached: Mutex<Vec<(WatcherId, ListenerId)>>,
    }

    impl Detach for CountingHub {
        fn detach(&self, watcher: WatcherId, listener: ListenerId) {
            self.detached.lock().unwrap().push((watcher, listener));
        }
    }

    fn watcher_with(hub: &Arc<CountingHub>) -> PathWatcher {
        let (events, _) = broadcast::channel(8);
        let hub: Weak<CountingHub> = Arc::downgrade(hub);
        let hub: Weak<dyn Detach> = hub;
        PathWatcher::new(
            PathBuf::from("/tmp/a.txt"),
            WatcherId::new(1),
            ListenerId::new(1),
            hub,
            Arc::new(AtomicBool::new(false)),
            events,
        )
    }

    #[test]
    fn test_close_is_idempotent() {
        let hub = Arc::new(CountingHub::default());
        let watcher = watcher_with(&hub);
        let mut rx = watcher.subscribe();

        watcher.close();
        watcher.close();

        assert!(watcher.is_closed());
        assert_eq!(hub.detached.lock().unwrap().len(), 1);
        assert_eq!(rx.try_recv().unwrap(), PathWatcherEvent::Closed);
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_drop_detaches() {
        let hub = Arc::new(CountingHub::default());
        drop(watcher_with(&hub));
        assert_eq!(hub.detached.lock().unwrap().len(), 1);
    }

    #[test]
    fn test_close_after_hub_gone_is_inert() {
        let hub = Arc::new(CountingHub::default());
        let watcher = watcher_with(&hub);
        drop(hub);

        watcher.close();
        assert!(watcher.is_closed());
    }

    #[test]
    fn test_change_listener_feeds_callback_and_channel() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let (events, mut rx) = broadcast::channel(8);
        let listener = PathWatcher::change_listener(
            Some(Box::new(move |e: &WatchEvent| sink.lock().unwrap().push(e.kind))),
            Arc::new(AtomicBool::new(false)),
            events,
        );

        listener(&WatchEvent::new(EventKind::Change, None));

        assert_eq!(*seen.lock().unwrap(), vec![EventKind::Change]);
        assert_eq!(
            rx.try_recv().unwrap(),
            PathWatcherEvent::Event(WatchEvent::new(EventKind::Change, None))
        );
    }

    #[test]
    fn test_close_listener_marks_closed_once() {
        let closed = Arc::new(AtomicBool::new(false));
        let (events, mut rx) = broadcast::channel(8);
        let listener = PathWatcher::close_listener(Arc::clone(&closed), events);

        listener();
        listener();

        assert!(closed.load(Ordering::SeqCst));
        assert_eq!(rx.try_recv().unwrap(), PathWatcherEvent::Closed);
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_change_listener_is_inert_once_closed() {
        let calls = Arc::new(Mutex::new(0));
        let counter = Arc::clone(&calls);
        let closed = Arc::new(AtomicBool::new(false));
        let (events, mut rx) = broadcast::channel(8);
        let listener = PathWatcher::change_listener(
            Some(Box::new(move |_e: &WatchEvent| *counter.lock().unwrap() += 1)),
            Arc::clone(&closed),
            events,
        );

        closed.store(true, Ordering::SeqCst);
        listener(&WatchEvent::new(EventKind::Change, None));

        assert_eq!(*calls.lock().unwrap(), 0);
        assert!(rx.try_recv().is_err());
    }
}
