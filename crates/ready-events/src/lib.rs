use futures_util::StreamExt;
use ready_protocol::{Status, StatusReady};
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;
use tokio_stream::wrappers::BroadcastStream;
use tracing::{debug, warn};

/// Fan-out of status-ready notifications to any number of subscribers.
///
/// Publishing never blocks and never fails: with no subscribers the
/// notification is simply dropped, and slow subscribers observe a lag.
#[derive(Clone, Debug)]
pub struct StatusReadyHub {
    sender: broadcast::Sender<StatusReady>,
}

impl StatusReadyHub {
    pub fn new(buffer: usize) -> Self {
        let (sender, _) = broadcast::channel(buffer.max(1));
        Self { sender }
    }

    pub fn publish(&self, ready: StatusReady) {
        debug!(
            status = %ready.status,
            epoch = ready.epoch,
            satisfied = ready.satisfied.len(),
            missing = ready.missing.len(),
            "status ready"
        );
        let _ = self.sender.send(ready);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<StatusReady> {
        self.sender.subscribe()
    }

    pub fn subscribe_stream(&self) -> BroadcastStream<StatusReady> {
        BroadcastStream::new(self.sender.subscribe())
    }

    pub fn receiver_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

/// Wait on `receiver` for the next notification announcing `status`.
///
/// Lagged notifications are skipped; `None` means the hub is gone.
pub async fn wait_for_status(
    receiver: &mut broadcast::Receiver<StatusReady>,
    status: Status,
) -> Option<StatusReady> {
    loop {
        match receiver.recv().await {
            Ok(ready) if ready.status == status => return Some(ready),
            Ok(_) => continue,
            Err(RecvError::Lagged(skipped)) => {
                warn!(skipped, "status-ready subscriber lagged");
                continue;
            }
            Err(RecvError::Closed) => return None,
        }
    }
}

/// Collect the statuses announced on `stream` until it ends or `limit` is hit.
pub async fn collect_statuses(stream: BroadcastStream<StatusReady>, limit: usize) -> Vec<Status> {
    stream
        .filter_map(|item| async move { item.ok().map(|ready| ready.status) })
        .take(limit)
        .collect()
        .await
}
