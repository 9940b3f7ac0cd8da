//! The observer's polling loop.

use super::{ObserverConfig, ObserverHandle};
use crate::db::open_database;
use crate::engine::{Engine, TxMode};
use crate::error::Result;
use crate::types::{ChangeLogEntry, CHANGE_LOG};
use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender, TrySendError};
use std::collections::HashSet;
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tracing::{debug, warn};

/// Spawn the polling task for one database and hand back its owner.
pub(crate) fn spawn_observer(
    engine: Arc<dyn Engine>,
    db_name: String,
    config: ObserverConfig,
) -> ObserverHandle {
    let (events_tx, events_rx) = bounded(config.buffer_size);
    let (stop_tx, stop_rx) = bounded(0);

    let poller = Poller {
        engine,
        db_name,
        interval: config.interval,
        events: events_tx,
        stop: stop_rx,
        delivered: HashSet::new(),
    };

    let thread = thread::Builder::new()
        .name("journalkv-observer".to_string())
        .spawn(move || poller.run())
        .expect("failed to spawn observer thread");

    ObserverHandle {
        events: events_rx,
        stop: Some(stop_tx),
        thread: Some(thread),
    }
}

struct Poller {
    engine: Arc<dyn Engine>,
    db_name: String,
    interval: Duration,
    events: Sender<ChangeLogEntry>,
    stop: Receiver<()>,
    /// Entry ids already handed to the consumer.
    delivered: HashSet<u64>,
}

impl Poller {
    fn run(mut self) {
        loop {
            match self.poll_once() {
                Ok(true) => {}
                // Consumer side of the handle is gone.
                Ok(false) => break,
                // A failed pass is non-fatal: log it and retry on the next
                // interval. No failure reaches the consumer.
                Err(e) => {
                    warn!(db = %self.db_name, error = %e, "change log poll failed, retrying");
                }
            }

            match self.stop.recv_timeout(self.interval) {
                Err(RecvTimeoutError::Timeout) => continue,
                // Stop signal, or the handle was dropped.
                Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
            }
        }
        debug!(db = %self.db_name, "observer stopped");
    }

    /// One pass over the change log. Returns `Ok(false)` once the consumer
    /// has disconnected and the loop should exit.
    fn poll_once(&mut self) -> Result<bool> {
        let handle = open_database(&*self.engine, &self.db_name, &[])?;
        let mut tx = handle.transaction(&[CHANGE_LOG], TxMode::ReadOnly)?;
        let mut cursor = tx.open_cursor(CHANGE_LOG)?;

        let mut sent = 0usize;
        while let Some(row) = cursor.advance()? {
            let entry: ChangeLogEntry = serde_json::from_value(row.value)?;
            let id = entry.id.0;
            if self.delivered.contains(&id) {
                continue;
            }

            match self.events.try_send(entry) {
                Ok(()) => {
                    // Marked only after a successful send, so an entry held
                    // back by a full buffer is re-offered on a later pass.
                    self.delivered.insert(id);
                    sent += 1;
                }
                Err(TrySendError::Full(_)) => break,
                Err(TrySendError::Disconnected(_)) => return Ok(false),
            }
        }

        if sent > 0 {
            debug!(db = %self.db_name, sent, "delivered change log entries");
        }
        Ok(true)
    }
}
