use lariat_core::{DeleteTask, Storage};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::warn;

/// Capacity of the deletion queue; handlers block on a full queue.
pub const DELETE_QUEUE_CAPACITY: usize = 1000;

/// Spawns the single deletion consumer.
///
/// The worker drains tasks into [`Storage::mark_deleted`] until the
/// shutdown token fires. Failed deletions are logged and dropped — they are
/// owner-initiated and idempotent, so the contract is best effort and tasks
/// are never retried. Sends racing with shutdown may be dropped.
pub fn spawn(
    storage: Arc<dyn Storage>,
    shutdown: CancellationToken,
) -> (mpsc::Sender<DeleteTask>, JoinHandle<()>) {
    let (sender, mut receiver) = mpsc::channel::<DeleteTask>(DELETE_QUEUE_CAPACITY);

    let handle = tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                task = receiver.recv() => {
                    let Some(task) = task else { break };
                    if let Err(err) = storage
                        .mark_deleted(&shutdown, &task.short_ids, &task.owner)
                        .await
                    {
                        warn!(owner = %task.owner, error = %err, "deletion task failed");
                    }
                }
            }
        }
    });

    (sender, handle)
}
