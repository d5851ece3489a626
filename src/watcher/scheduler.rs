//! Deferred rename checks.

use std::time::Duration;

use tokio::runtime::Handle;
use tokio_util::sync::CancellationToken;

use super::handle_watcher::WatcherId;
use super::source::EventSink;

/// One pending rename check for a HandleWatcher.
///
/// The generation ties the check to the rename that scheduled it, so a check
/// that outlives its rename is ignored.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SettleCheck {
    pub watcher: WatcherId,
    pub generation: u64,
}

/// Runs a [`SettleCheck`] on the control task after a delay.
pub trait Scheduler: Send + 'static {
    /// Schedule `check` to be delivered after `delay` unless `cancel` fires first.
    fn schedule(&self, delay: Duration, check: SettleCheck, cancel: CancellationToken);
}

/// Scheduler backed by tokio timers that posts back onto the control channel.
#[derive(Debug, Clone)]
pub struct TokioScheduler {
    runtime: Handle,
    sink: EventSink,
}

impl TokioScheduler {
    #[must_use]
    pub fn new(runtime: Handle, sink: EventSink) -> Self {
        Self { runtime, sink }
    }
}

impl Scheduler for TokioScheduler {
    fn schedule(&self, delay: Duration, check: SettleCheck, cancel: CancellationToken) {
        let sink = self.sink.clone();
        self.runtime.spawn(async move {
            tokio::select! {
                biased;

                () = cancel.cancelled() => {
                    tracing::trace!(watcher = %check.watcher, "Rename check cancelled");
                }

                () = tokio::time::sleep(delay) => {
                    if !sink.settle(check) {
                        tracing::trace!(watcher = %check.watcher, "Hub gone before rename check");
                    }
                }
            }
        });
    }
}
