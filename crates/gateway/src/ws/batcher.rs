// Persistence batcher: drains a session's pending-write queue and performs
// bulk durable writes off the fanout path.

use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::timeout;
use tracing::debug;

use crate::store::{ChatStore, PendingMessage};

/// How long one queue read blocks before the loop re-checks for shutdown.
pub(crate) const FLUSH_INTERVAL: Duration = Duration::from_millis(100);
/// Upper bound on events written in one store round trip.
pub(crate) const MAX_BATCH: usize = 10;
/// Pending-write queue depth. A full queue drops events instead of ever
/// blocking the fanout path.
pub(crate) const QUEUE_DEPTH: usize = 256;

/// Runs for the lifetime of one session. Exits once the queue closes and all
/// remaining events have been drained; write failures are logged by the store
/// and never retried.
pub(crate) async fn run(store: ChatStore, mut queue: mpsc::Receiver<PendingMessage>) {
    loop {
        let first = match timeout(FLUSH_INTERVAL, queue.recv()).await {
            Ok(Some(event)) => event,
            Ok(None) => break,
            Err(_) => continue,
        };

        let mut batch = vec![first];
        while batch.len() < MAX_BATCH {
            match queue.try_recv() {
                Ok(event) => batch.push(event),
                Err(_) => break,
            }
        }

        debug!(batch_len = batch.len(), "flushing pending chat writes");
        store.persist_batch(&batch).await;
    }
}
