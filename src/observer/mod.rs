//! Change-log observation.
//!
//! An observer is a long-lived background task that polls a database's
//! change log and replays new entries to its consumer through a bounded
//! channel. Delivery is pull-based: there is no push channel from writers,
//! so worst-case latency between a write's commit and its delivery is the
//! poll interval.

mod poller;

pub(crate) use poller::spawn_observer;

use crate::types::ChangeLogEntry;
use crossbeam_channel::{Receiver, Sender};
use std::thread::JoinHandle;
use std::time::Duration;

/// Configuration for an observer.
#[derive(Clone, Debug)]
pub struct ObserverConfig {
    /// Delay between poll passes. Default: 1 second.
    pub interval: Duration,

    /// Max buffered entries before delivery backpressures. A full buffer
    /// pauses delivery until the consumer drains; entries are never dropped
    /// or duplicated. Default: 1024.
    pub buffer_size: usize,
}

impl Default for ObserverConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(1),
            buffer_size: 1024,
        }
    }
}

/// Handle owning a running observer.
///
/// Each change-log entry is delivered into the handle's channel exactly once
/// for the lifetime of the handle, in ascending entry-id order. Dropping the
/// handle (or calling [`stop`](Self::stop)) halts the polling task.
pub struct ObserverHandle {
    pub(crate) events: Receiver<ChangeLogEntry>,
    pub(crate) stop: Option<Sender<()>>,
    pub(crate) thread: Option<JoinHandle<()>>,
}

impl ObserverHandle {
    /// Receive the next entry (blocking).
    pub fn recv(&self) -> Result<ChangeLogEntry, crossbeam_channel::RecvError> {
        self.events.recv()
    }

    /// Try to receive an entry (non-blocking).
    pub fn try_recv(&self) -> Result<ChangeLogEntry, crossbeam_channel::TryRecvError> {
        self.events.try_recv()
    }

    /// Receive with timeout.
    pub fn recv_timeout(
        &self,
        timeout: Duration,
    ) -> Result<ChangeLogEntry, crossbeam_channel::RecvTimeoutError> {
        self.events.recv_timeout(timeout)
    }

    /// Stop polling and wait for the background task to exit.
    pub fn stop(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        // Dropping the stop sender wakes the poller out of its interval wait.
        self.stop.take();
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

impl Drop for ObserverHandle {
    fn drop(&mut self) {
        self.shutdown();
    }
}
